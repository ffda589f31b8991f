//! Resource variants and the operations they support
//!
//! Each message kind maps to a capability trait. A variant exposes the
//! traits it implements through the `as_*` accessors; a message whose trait
//! the target does not expose is answered with `InvalidOperation` by the
//! dispatcher.

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::event::{EventQueue, EventSink, QueueFactory};
use crate::pipe::{Pipe, PipeFactory};
use crate::pty::{PtyMaster, PtyMultiplexer, PtySlave};
use crate::registry::ResourceRef;
use crate::request::Request;
use crate::special::{NullDevice, ZeroDevice};
use ipc::{AttrType, DevCtl, ObjectType, OpenFlags, Reply};
use services_logger::Logger;

/// What a handler did with its request
#[derive(Debug)]
pub enum Handled {
    /// Answer the request with this reply
    Reply(Request, Reply),
    /// The request is parked on the resource and will be answered later
    Parked,
    /// The handler already answered the request itself
    Answered,
}

impl Handled {
    /// Answers with the outcome of a synchronous operation
    pub fn result(rq: Request, result: Result<Reply, ServerError>) -> Self {
        match result {
            Ok(reply) => Handled::Reply(rq, reply),
            Err(err) => Handled::Reply(rq, Reply::error(err.into())),
        }
    }
}

/// Byte or record streams (read/write)
pub trait Stream {
    fn read(&self, cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled;
    fn write(&self, cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled;
}

/// Objects that track openers (open/close)
pub trait Openable {
    fn open(&self, cx: &ServerContext, this: &ResourceRef, flags: OpenFlags, rq: Request)
        -> Handled;
    fn close(
        &self,
        cx: &ServerContext,
        this: &ResourceRef,
        flags: OpenFlags,
        rq: Request,
    ) -> Handled;
}

/// Objects that create other objects
pub trait Factory {
    fn create(
        &self,
        cx: &ServerContext,
        object_type: ObjectType,
        open: OpenFlags,
    ) -> Result<ResourceRef, ServerError>;
}

/// Objects with queryable or settable attributes
pub trait Attributes {
    fn get_attr(&self, cx: &ServerContext, this: &ResourceRef, attr: AttrType)
        -> Result<u64, ServerError>;
    fn set_attr(
        &self,
        cx: &ServerContext,
        this: &ResourceRef,
        attr: AttrType,
        value: u64,
    ) -> Result<(), ServerError>;
}

/// Objects that count their namespace links
pub trait Linkable {
    fn link(&self, cx: &ServerContext, this: &ResourceRef, path: &str) -> Result<(), ServerError>;
    fn unlink(&self, cx: &ServerContext, this: &ResourceRef, path: &str)
        -> Result<(), ServerError>;
}

/// Device-specific control requests
pub trait DeviceControl {
    fn devctl(&self, cx: &ServerContext, this: &ResourceRef, ctl: DevCtl)
        -> Result<(), ServerError>;
}

/// Objects that can be destroyed on request
pub trait Destroyable {
    fn destroy(&self, cx: &ServerContext, this: &ResourceRef) -> Result<(), ServerError>;
}

/// A server-managed object
pub enum Resource {
    PipeFactory(PipeFactory),
    Pipe(Pipe),
    EventSink(EventSink),
    QueueFactory(QueueFactory),
    EventQueue(EventQueue),
    Null(NullDevice),
    Zero(ZeroDevice),
    PtyMultiplexer(PtyMultiplexer),
    PtyMaster(PtyMaster),
    PtySlave(PtySlave),
}

impl Resource {
    /// Short name used in logs and errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Resource::PipeFactory(_) => "pipe-factory",
            Resource::Pipe(_) => "pipe",
            Resource::EventSink(_) => "event-sink",
            Resource::QueueFactory(_) => "queue-factory",
            Resource::EventQueue(_) => "event-queue",
            Resource::Null(_) => "null",
            Resource::Zero(_) => "zero",
            Resource::PtyMultiplexer(_) => "ptmx",
            Resource::PtyMaster(_) => "pty-master",
            Resource::PtySlave(_) => "pty-slave",
        }
    }

    pub fn as_stream(&self) -> Option<&dyn Stream> {
        match self {
            Resource::Pipe(pipe) => Some(pipe),
            Resource::EventSink(sink) => Some(sink),
            Resource::EventQueue(queue) => Some(queue),
            Resource::Null(null) => Some(null),
            Resource::Zero(zero) => Some(zero),
            Resource::PtyMaster(master) => Some(master),
            Resource::PtySlave(slave) => Some(slave),
            Resource::PipeFactory(_) | Resource::QueueFactory(_) | Resource::PtyMultiplexer(_) => {
                None
            }
        }
    }

    pub fn as_openable(&self) -> Option<&dyn Openable> {
        match self {
            Resource::Pipe(pipe) => Some(pipe),
            Resource::EventSink(sink) => Some(sink),
            Resource::QueueFactory(factory) => Some(factory),
            Resource::EventQueue(queue) => Some(queue),
            Resource::Null(null) => Some(null),
            Resource::Zero(zero) => Some(zero),
            Resource::PtyMultiplexer(ptmx) => Some(ptmx),
            Resource::PtyMaster(master) => Some(master),
            Resource::PtySlave(slave) => Some(slave),
            Resource::PipeFactory(_) => None,
        }
    }

    pub fn as_factory(&self) -> Option<&dyn Factory> {
        match self {
            Resource::PipeFactory(factory) => Some(factory),
            Resource::EventSink(sink) => Some(sink),
            _ => None,
        }
    }

    pub fn as_attributes(&self) -> Option<&dyn Attributes> {
        match self {
            Resource::Pipe(pipe) => Some(pipe),
            Resource::Null(null) => Some(null),
            Resource::Zero(zero) => Some(zero),
            _ => None,
        }
    }

    pub fn as_linkable(&self) -> Option<&dyn Linkable> {
        match self {
            Resource::Pipe(pipe) => Some(pipe),
            _ => None,
        }
    }

    pub fn as_devctl(&self) -> Option<&dyn DeviceControl> {
        match self {
            Resource::PtyMaster(master) => Some(master),
            Resource::PtySlave(slave) => Some(slave),
            _ => None,
        }
    }

    pub fn as_destroyable(&self) -> Option<&dyn Destroyable> {
        match self {
            Resource::Pipe(pipe) => Some(pipe),
            _ => None,
        }
    }

    /// Releases whatever the resource still holds once it is unreachable
    ///
    /// Parked requests are answered here; nothing may stay queued.
    pub(crate) fn teardown(&self, log: &Logger) {
        match self {
            Resource::Pipe(pipe) => pipe.teardown(log),
            Resource::EventQueue(queue) => queue.teardown(log),
            _ => {}
        }
    }
}
