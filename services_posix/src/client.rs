//! Client helper
//!
//! Thin synchronous wrappers that turn each server operation into one
//! message and its reply into a `Result`.

use crate::error::ClientError;
use core_types::ObjectId;
use ipc::{
    AttrType, DevCtl, Event, EventMask, IoArgs, IoMode, Message, MessagePayload, ObjectType,
    OpenFlags, Operation, Reply, Subscription, SubscriptionFlags, WaitMode,
};
use kernel_api::{KernelApi, Namespace};
use std::sync::Arc;

/// Synchronous client of a POSIX resource server
#[derive(Clone)]
pub struct PosixClient {
    kernel: Arc<dyn KernelApi>,
    namespace: Arc<dyn Namespace>,
}

impl PosixClient {
    pub fn new(kernel: Arc<dyn KernelApi>, namespace: Arc<dyn Namespace>) -> Self {
        Self { kernel, namespace }
    }

    /// Sends one operation and waits for the reply
    ///
    /// A reply carrying an error code becomes [`ClientError::Posix`].
    pub fn call(&self, oid: ObjectId, operation: Operation) -> Result<Reply, ClientError> {
        let reply = self.kernel.send(Message::new(oid, operation))?;
        match reply.result {
            Ok(_) => Ok(reply),
            Err(code) => Err(ClientError::Posix(code)),
        }
    }

    pub fn lookup(&self, path: &str) -> Result<ObjectId, ClientError> {
        Ok(self.namespace.lookup(path)?)
    }

    /// Creates a pipe through the factory published at
    /// [`PIPES_PATH`](crate::PIPES_PATH)
    pub fn create_pipe(
        &self,
        object_type: ObjectType,
        open: OpenFlags,
    ) -> Result<ObjectId, ClientError> {
        let factory = self.lookup(crate::server::PIPES_PATH)?;
        self.create(factory, object_type, open)
    }

    /// Asks `factory` for a new object
    pub fn create(
        &self,
        factory: ObjectId,
        object_type: ObjectType,
        open: OpenFlags,
    ) -> Result<ObjectId, ClientError> {
        self.call(factory, Operation::Create { object_type, open })?
            .object
            .ok_or(ClientError::MissingField("object"))
    }

    /// Opens an object
    ///
    /// Returns the object the server handed out, which differs from `oid`
    /// for factories such as the pty multiplexer.
    pub fn open(&self, oid: ObjectId, flags: OpenFlags) -> Result<ObjectId, ClientError> {
        let reply = self.call(oid, Operation::Open { flags })?;
        Ok(reply.object.unwrap_or(oid))
    }

    pub fn open_path(&self, path: &str, flags: OpenFlags) -> Result<ObjectId, ClientError> {
        let oid = self.lookup(path)?;
        self.open(oid, flags)
    }

    pub fn close(&self, oid: ObjectId, flags: OpenFlags) -> Result<(), ClientError> {
        self.call(oid, Operation::Close { flags })?;
        Ok(())
    }

    /// Reads up to `size` bytes; an empty result means end of stream
    pub fn read(&self, oid: ObjectId, size: usize, mode: IoMode) -> Result<Vec<u8>, ClientError> {
        let mut args = IoArgs::read(size);
        args.mode = mode;
        Ok(self.call(oid, Operation::Read(args))?.data)
    }

    /// Writes `data`, returning how many bytes the server took
    pub fn write(&self, oid: ObjectId, data: &[u8], mode: IoMode) -> Result<usize, ClientError> {
        let mut args = IoArgs::write(data);
        args.mode = mode;
        let reply = self.call(oid, Operation::Write(args))?;
        Ok(reply.result.unwrap_or_default())
    }

    pub fn link(&self, oid: ObjectId, path: &str) -> Result<(), ClientError> {
        self.call(
            oid,
            Operation::Link {
                path: path.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn unlink(&self, oid: ObjectId, path: &str) -> Result<(), ClientError> {
        self.call(
            oid,
            Operation::Unlink {
                path: path.to_string(),
            },
        )?;
        Ok(())
    }

    /// Opens a new notification queue
    pub fn event_queue(&self) -> Result<ObjectId, ClientError> {
        let factory = self.lookup(crate::server::QUEUE_PATH)?;
        self.call(
            factory,
            Operation::Open {
                flags: OpenFlags::read_write(),
            },
        )?
        .object
        .ok_or(ClientError::MissingField("object"))
    }

    /// Changes what `queue` watches on `oid`
    pub fn subscribe(
        &self,
        queue: ObjectId,
        oid: ObjectId,
        types: EventMask,
        flags: SubscriptionFlags,
    ) -> Result<(), ClientError> {
        self.subscribe_all(queue, &[Subscription::new(oid, types, flags)])
    }

    /// Applies several subscription changes in one write
    pub fn subscribe_all(
        &self,
        queue: ObjectId,
        subscriptions: &[Subscription],
    ) -> Result<(), ClientError> {
        let payload = MessagePayload::new(&subscriptions)?;
        self.call(queue, Operation::Write(IoArgs::write(payload.into_bytes())))?;
        Ok(())
    }

    /// Collects up to `max` pending events from `queue`
    pub fn wait_events(
        &self,
        queue: ObjectId,
        max: usize,
        wait: WaitMode,
    ) -> Result<Vec<Event>, ClientError> {
        let reply = self.call(queue, Operation::Read(IoArgs::read(max).with_wait(wait)))?;
        if reply.data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(MessagePayload::from_bytes(reply.data).deserialize()?)
    }

    /// Reports events through the sink published at
    /// [`SINK_PATH`](crate::SINK_PATH)
    pub fn post_events(&self, events: &[Event]) -> Result<usize, ClientError> {
        let sink = self.lookup(crate::server::SINK_PATH)?;
        let payload = MessagePayload::new(&events)?;
        let reply = self.call(sink, Operation::Write(IoArgs::write(payload.into_bytes())))?;
        Ok(reply.result.unwrap_or_default())
    }

    pub fn get_attr(&self, oid: ObjectId, attr: AttrType) -> Result<u64, ClientError> {
        self.call(oid, Operation::GetAttr { attr })?
            .value
            .ok_or(ClientError::MissingField("value"))
    }

    pub fn set_attr(&self, oid: ObjectId, attr: AttrType, value: u64) -> Result<(), ClientError> {
        self.call(oid, Operation::SetAttr { attr, value })?;
        Ok(())
    }

    /// Polls readiness as an event mask
    pub fn poll_status(&self, oid: ObjectId) -> Result<EventMask, ClientError> {
        let bits = self.get_attr(oid, AttrType::PollStatus)?;
        Ok(EventMask::from_bits(bits as u16))
    }

    pub fn devctl(&self, oid: ObjectId, request: DevCtl) -> Result<(), ClientError> {
        self.call(oid, Operation::DevCtl(request))?;
        Ok(())
    }

    pub fn destroy(&self, oid: ObjectId) -> Result<(), ClientError> {
        self.call(oid, Operation::Destroy)?;
        Ok(())
    }
}
