//! In-process harness for handler tests
//!
//! Requests are received from the real server port and dispatched inline on
//! the calling thread, so tests control exactly when each one runs. Parked
//! requests are completed later by whatever request unblocks them.

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::dispatcher;
use crate::request::Request;
use crate::server::{self, NULL_PATH, PIPES_PATH, PTMX_PATH, QUEUE_PATH, SINK_PATH, ZERO_PATH};
use core_types::ObjectId;
use ipc::{Message, ObjectType, OpenFlags, Operation, Reply};
use kernel_api::{Duration, Namespace};
use services_logger::Logger;
use sim_kernel::{PendingReply, SimNamespace, SimulatedKernel};
use std::sync::Arc;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct TestBench {
    kernel: SimulatedKernel,
    namespace: Arc<SimNamespace>,
    cx: Arc<ServerContext>,
}

impl TestBench {
    pub(crate) fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub(crate) fn with_config(config: ServerConfig) -> Self {
        let kernel = SimulatedKernel::new();
        let namespace = Arc::new(SimNamespace::new());
        let cx = Arc::new(
            ServerContext::new(Arc::new(kernel.clone()), namespace.clone(), config).unwrap(),
        );
        server::publish_devices(&cx).unwrap();
        Self {
            kernel,
            namespace,
            cx,
        }
    }

    pub(crate) fn cx(&self) -> &ServerContext {
        &self.cx
    }

    pub(crate) fn context(&self) -> Arc<ServerContext> {
        self.cx.clone()
    }

    pub(crate) fn kernel(&self) -> &SimulatedKernel {
        &self.kernel
    }

    pub(crate) fn namespace(&self) -> &SimNamespace {
        &self.namespace
    }

    pub(crate) fn log(&self) -> &Logger {
        self.cx.log()
    }

    /// Sends a message and receives it as a request, without dispatching
    pub(crate) fn request(&self, oid: ObjectId, operation: Operation) -> (Request, PendingReply) {
        let pending = self
            .kernel
            .send_async(Message::new(oid, operation))
            .unwrap();
        let (message, token) = self.cx.port().receive().unwrap();
        (self.cx.new_request(message, token), pending)
    }

    /// Sends a message and dispatches it on this thread
    pub(crate) fn submit(&self, oid: ObjectId, operation: Operation) -> PendingReply {
        let (rq, pending) = self.request(oid, operation);
        dispatcher::dispatch(&self.cx, rq);
        pending
    }

    /// Sends a message, dispatches it and waits for the reply
    pub(crate) fn call(&self, oid: ObjectId, operation: Operation) -> Reply {
        self.submit(oid, operation)
            .wait_timeout(CALL_TIMEOUT)
            .unwrap()
    }

    pub(crate) fn lookup(&self, path: &str) -> ObjectId {
        self.namespace.lookup(path).unwrap()
    }

    pub(crate) fn null_oid(&self) -> ObjectId {
        self.lookup(NULL_PATH)
    }

    pub(crate) fn zero_oid(&self) -> ObjectId {
        self.lookup(ZERO_PATH)
    }

    pub(crate) fn pipes_oid(&self) -> ObjectId {
        self.lookup(PIPES_PATH)
    }

    pub(crate) fn sink_oid(&self) -> ObjectId {
        self.lookup(SINK_PATH)
    }

    pub(crate) fn queue_factory_oid(&self) -> ObjectId {
        self.lookup(QUEUE_PATH)
    }

    pub(crate) fn ptmx_oid(&self) -> ObjectId {
        self.lookup(PTMX_PATH)
    }

    /// Creates a pipe through the pipe factory
    pub(crate) fn create_pipe(&self, object_type: ObjectType, open: OpenFlags) -> ObjectId {
        let reply = self.call(self.pipes_oid(), Operation::Create { object_type, open });
        reply.object.unwrap()
    }
}
