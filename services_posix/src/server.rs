//! Server bootstrap
//!
//! [`Server::start`] builds the shared context, registers the factories and
//! devices, links them into the namespace and spawns the timer thread and
//! the dispatcher workers. Dropping the server shuts it down.

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::dispatcher;
use crate::error::ServerError;
use crate::event::{EventSink, QueueFactory};
use crate::pipe::PipeFactory;
use crate::pty::PtyMultiplexer;
use crate::resource::Resource;
use crate::special::{NullDevice, ZeroDevice};
use crate::timer;
use core_types::PortId;
use kernel_api::{KernelApi, Namespace};
use services_logger::LogEntry;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Pipe factory
pub const PIPES_PATH: &str = "/dev/posix/pipes";
pub const NULL_PATH: &str = "/dev/null";
pub const ZERO_PATH: &str = "/dev/zero";
/// Event sink
pub const SINK_PATH: &str = "/dev/event/sink";
/// Notification queue factory
pub const QUEUE_PATH: &str = "/dev/event/queue";
/// Pseudo-terminal multiplexer
pub const PTMX_PATH: &str = "/dev/ptmx";

/// Registers the server's fixed objects and links them into the namespace
///
/// Returns the linked paths. On failure every path linked so far is
/// unlinked again.
pub(crate) fn publish_devices(cx: &ServerContext) -> Result<Vec<String>, ServerError> {
    let devices: [(&str, fn() -> Resource); 6] = [
        (PIPES_PATH, || Resource::PipeFactory(PipeFactory)),
        (NULL_PATH, || Resource::Null(NullDevice)),
        (ZERO_PATH, || Resource::Zero(ZeroDevice)),
        (SINK_PATH, || Resource::EventSink(EventSink)),
        (QUEUE_PATH, || Resource::QueueFactory(QueueFactory)),
        (PTMX_PATH, || Resource::PtyMultiplexer(PtyMultiplexer)),
    ];

    let mut published = Vec::with_capacity(devices.len());
    for (path, build) in devices {
        let linked = cx
            .registry()
            .create(|_| build())
            .and_then(|handle| Ok(cx.namespace().link(path, cx.oid(handle.id()))?));
        if let Err(err) = linked {
            unpublish(cx, &published);
            return Err(err);
        }
        published.push(path.to_string());
    }
    Ok(published)
}

fn unpublish(cx: &ServerContext, paths: &[String]) {
    for path in paths {
        if let Err(err) = cx.namespace().unlink(path) {
            cx.log().log(
                LogEntry::warn("device path already gone")
                    .with_field("path", path)
                    .with_field("error", err),
            );
        }
    }
}

/// A running POSIX resource server
pub struct Server {
    cx: Arc<ServerContext>,
    workers: Vec<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    published: Vec<String>,
    stopped: bool,
}

impl Server {
    /// Starts a server on a new port of `kernel`
    pub fn start(
        kernel: Arc<dyn KernelApi>,
        namespace: Arc<dyn Namespace>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let cx = Arc::new(ServerContext::new(kernel, namespace, config)?);
        let published = publish_devices(&cx)?;

        let mut server = Server {
            cx,
            workers: Vec::new(),
            timer: None,
            published,
            stopped: false,
        };

        let timer_cx = server.cx.clone();
        let handle = thread::Builder::new()
            .name("posix-timer".to_string())
            .spawn(move || timer::run(timer_cx))
            .map_err(|e| ServerError::Spawn(format!("timer thread: {}", e)))?;
        server.timer = Some(handle);

        for worker in 0..server.cx.config().workers {
            let worker_cx = server.cx.clone();
            let handle = thread::Builder::new()
                .name(format!("posix-worker-{}", worker))
                .spawn(move || dispatcher::run_worker(&worker_cx, worker))
                .map_err(|e| ServerError::Spawn(format!("worker {}: {}", worker, e)))?;
            server.workers.push(handle);
        }

        server.cx.log().log(
            LogEntry::info("server started")
                .with_field("port", server.cx.port_id())
                .with_field("workers", server.workers.len()),
        );
        Ok(server)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.cx
    }

    pub fn port_id(&self) -> PortId {
        self.cx.port_id()
    }

    /// Stops the workers and the timer, unpublishes the devices and tears
    /// down every resource
    ///
    /// Requests still parked are answered with `BrokenPipe`.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.cx.port().close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                self.cx.log().log(LogEntry::error("worker panicked"));
            }
        }

        self.cx.timer().stop();
        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                self.cx.log().log(LogEntry::error("timer thread panicked"));
            }
        }

        unpublish(&self.cx, &self.published);
        self.published.clear();
        self.cx.registry().shutdown();

        self.cx
            .log()
            .log(LogEntry::info("server stopped").with_field("port", self.cx.port_id()));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
