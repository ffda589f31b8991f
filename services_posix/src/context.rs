//! State shared by every worker of one server

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event::EventEngine;
use crate::registry::Registry;
use crate::request::{Request, RequestId};
use crate::timer::Timer;
use core_types::{ObjectId, PortId, ResourceId};
use ipc::{Message, ResponseToken};
use kernel_api::{KernelApi, MessagePort, Namespace};
use services_logger::{Logger, LoggerConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything a handler may need besides its own resource
pub struct ServerContext {
    port: Arc<dyn MessagePort>,
    kernel: Arc<dyn KernelApi>,
    namespace: Arc<dyn Namespace>,
    registry: Registry,
    events: EventEngine,
    timer: Timer,
    config: ServerConfig,
    log: Logger,
    next_request: AtomicU64,
}

impl ServerContext {
    /// Creates the server port and the shared state around it
    pub fn new(
        kernel: Arc<dyn KernelApi>,
        namespace: Arc<dyn Namespace>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let port = kernel.create_port(config.port_capacity)?;
        let log = Logger::for_source(
            LoggerConfig {
                min_level: config.log_level,
                echo_stderr: config.log_to_stderr,
                ..LoggerConfig::default()
            },
            port.port_id(),
        );

        Ok(Self {
            registry: Registry::new(config.max_resources, log.clone()),
            events: EventEngine::new(),
            timer: Timer::new(),
            port,
            kernel,
            namespace,
            config,
            log,
            next_request: AtomicU64::new(1),
        })
    }

    pub fn port(&self) -> &Arc<dyn MessagePort> {
        &self.port
    }

    pub fn port_id(&self) -> PortId {
        self.port.port_id()
    }

    pub fn kernel(&self) -> &dyn KernelApi {
        self.kernel.as_ref()
    }

    pub fn namespace(&self) -> &dyn Namespace {
        self.namespace.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventEngine {
        &self.events
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Globally addressable id of a local resource
    pub fn oid(&self, id: ResourceId) -> ObjectId {
        ObjectId::new(self.port_id(), id)
    }

    /// Returns whether `oid` lives on this server
    pub fn is_local(&self, oid: &ObjectId) -> bool {
        oid.port == self.port_id()
    }

    /// Wraps a received message into a request
    pub fn new_request(&self, message: Message, token: ResponseToken) -> Request {
        let id = RequestId::new(self.next_request.fetch_add(1, Ordering::Relaxed));
        Request::new(id, message, token, self.port.clone(), self.log.clone())
    }
}
