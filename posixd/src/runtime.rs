//! # Daemon Runtime
//!
//! Boots an in-process kernel and server, then plays a session script
//! against it and records one transcript line per outcome.
//!
//! Operations that may park (open, close, read, write, events) are sent
//! without waiting; if no reply arrives within the settle time the request
//! is reported as parked and its completion is reported once it happens.

use crate::script::{ScriptCommand, ScriptError, ScriptStep, SessionScript};
use core_types::ObjectId;
use ipc::{
    DevCtl, Event, IoArgs, Message, MessagePayload, ObjectType, OpenFlags, Operation, Reply,
};
use kernel_api::{Duration, KernelError};
use services_posix::{ClientError, PosixClient, Server, ServerConfig, ServerError, PTMX_PATH};
use sim_kernel::{PendingReply, SimNamespace, SimulatedKernel};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Daemon runtime error types
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Line {line}: unknown name {name}")]
    UnknownName { line: usize, name: String },
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Configuration of the embedded server
    pub server: ServerConfig,
    /// Optional session script
    pub script: Option<String>,
    /// How long to wait for a reply before reporting a request as parked
    pub settle_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            script: None,
            settle_ms: 100,
        }
    }
}

/// How a reply is rendered and what it binds
#[derive(Debug, Clone)]
enum Expect {
    Done,
    Count,
    Bytes,
    Events,
    Bind { name: String, fallback: ObjectId },
}

struct Parked {
    line: usize,
    expect: Expect,
    pending: PendingReply,
}

/// Daemon runtime
pub struct DaemonRuntime {
    config: DaemonConfig,
    kernel: SimulatedKernel,
    namespace: Arc<SimNamespace>,
    server: Server,
    client: PosixClient,
    script: Option<SessionScript>,
    names: HashMap<String, ObjectId>,
    parked: Vec<Parked>,
    transcript: Vec<String>,
    steps: usize,
}

impl DaemonRuntime {
    /// Starts the server and parses the script
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let script = match &config.script {
            Some(text) => Some(SessionScript::from_text(text)?),
            None => None,
        };

        let kernel = SimulatedKernel::new();
        let namespace = Arc::new(SimNamespace::new());
        let server = Server::start(
            Arc::new(kernel.clone()),
            namespace.clone(),
            config.server.clone(),
        )?;
        let client = PosixClient::new(Arc::new(kernel.clone()), namespace.clone());

        Ok(Self {
            config,
            kernel,
            namespace,
            server,
            client,
            script,
            names: HashMap::new(),
            parked: Vec::new(),
            transcript: Vec::new(),
            steps: 0,
        })
    }

    /// Runs the script to the end
    ///
    /// Requests still parked afterwards get one more settle period, then
    /// are reported as still parked. They are answered when the server
    /// shuts down.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        while let Some(step) = self.script.as_mut().and_then(SessionScript::next_step) {
            self.step(step)?;
        }

        if !self.parked.is_empty() {
            thread::sleep(self.settle().into());
        }
        self.collect();
        for parked in &self.parked {
            self.transcript
                .push(format!("{:>3}: still parked", parked.line));
        }
        Ok(())
    }

    /// Executes one script step
    pub fn step(&mut self, step: ScriptStep) -> Result<(), DaemonError> {
        self.collect();
        self.steps += 1;
        let line = step.line;

        let outcome = match self.execute(&step)? {
            Some(outcome) => outcome,
            None => return Ok(()),
        };
        self.transcript
            .push(format!("{:>3}: {} -> {}", line, step.text, outcome));
        Ok(())
    }

    /// Returns the transcript so far
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Returns the number of steps executed
    pub fn step_count(&self) -> usize {
        self.steps
    }

    /// Returns the object bound to `name`
    pub fn object(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).copied()
    }

    /// Paths currently linked in the namespace
    pub fn published(&self) -> Vec<String> {
        self.namespace.paths()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Stops the server, answering whatever is still parked
    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.config.settle_ms)
    }

    fn lookup_name(&self, line: usize, name: &str) -> Result<ObjectId, DaemonError> {
        self.object(name).ok_or_else(|| DaemonError::UnknownName {
            line,
            name: name.to_string(),
        })
    }

    /// Returns the outcome to record, or `None` when the step only waits
    fn execute(&mut self, step: &ScriptStep) -> Result<Option<String>, DaemonError> {
        let line = step.line;
        let outcome = match &step.command {
            ScriptCommand::Wait(millis) => {
                thread::sleep(std::time::Duration::from_millis(*millis));
                return Ok(None);
            }
            ScriptCommand::Pipe {
                name,
                buffered,
                open,
            } => {
                let object_type = if *buffered {
                    ObjectType::BufferedPipe
                } else {
                    ObjectType::Pipe
                };
                let result = self.client.create_pipe(object_type, *open);
                self.bind(name, result)
            }
            ScriptCommand::Lookup { name, path } => {
                let result = self.client.lookup(path);
                self.bind(name, result)
            }
            ScriptCommand::Open { name, path, flags } => {
                let oid = self.client.lookup(path);
                match oid {
                    Ok(oid) => self.send(
                        line,
                        oid,
                        Operation::Open { flags: *flags },
                        Expect::Bind {
                            name: name.clone(),
                            fallback: oid,
                        },
                    )?,
                    Err(err) => format!("error: {}", err),
                }
            }
            ScriptCommand::Pty { master, slave } => self.open_pty(master, slave),
            ScriptCommand::Close { name, flags } => {
                let oid = self.lookup_name(line, name)?;
                self.send(line, oid, Operation::Close { flags: *flags }, Expect::Done)?
            }
            ScriptCommand::Write { name, data, mode } => {
                let oid = self.lookup_name(line, name)?;
                let mut args = IoArgs::write(data.clone());
                args.mode = *mode;
                self.send(line, oid, Operation::Write(args), Expect::Count)?
            }
            ScriptCommand::Read { name, size, mode } => {
                let oid = self.lookup_name(line, name)?;
                let mut args = IoArgs::read(*size);
                args.mode = *mode;
                self.send(line, oid, Operation::Read(args), Expect::Bytes)?
            }
            ScriptCommand::Link { name, path } => {
                let oid = self.lookup_name(line, name)?;
                render_unit(self.client.link(oid, path))
            }
            ScriptCommand::Unlink { name, path } => {
                let oid = self.lookup_name(line, name)?;
                render_unit(self.client.unlink(oid, path))
            }
            ScriptCommand::Queue { name } => {
                let result = self.client.event_queue();
                self.bind(name, result)
            }
            ScriptCommand::Subscribe {
                queue,
                target,
                types,
                flags,
            } => {
                let queue = self.lookup_name(line, queue)?;
                let target = self.lookup_name(line, target)?;
                render_unit(self.client.subscribe(queue, target, *types, *flags))
            }
            ScriptCommand::Post {
                target,
                event_type,
                count,
            } => {
                let target = self.lookup_name(line, target)?;
                let event = Event::new(target, *event_type, *count);
                match self.client.post_events(&[event]) {
                    Ok(posted) => format!("posted {}", posted),
                    Err(err) => format!("error: {}", err),
                }
            }
            ScriptCommand::Events { queue, max, wait } => {
                let queue = self.lookup_name(line, queue)?;
                let args = IoArgs::read(*max).with_wait(*wait);
                self.send(line, queue, Operation::Read(args), Expect::Events)?
            }
            ScriptCommand::GetAttr { name, attr } => {
                let oid = self.lookup_name(line, name)?;
                match self.client.get_attr(oid, *attr) {
                    Ok(value) => format!("{:#06x}", value),
                    Err(err) => format!("error: {}", err),
                }
            }
            ScriptCommand::Unlock { name } => {
                let oid = self.lookup_name(line, name)?;
                render_unit(self.client.devctl(oid, DevCtl::Unlock))
            }
            ScriptCommand::Destroy { name } => {
                let oid = self.lookup_name(line, name)?;
                render_unit(self.client.destroy(oid))
            }
        };
        Ok(Some(outcome))
    }

    fn bind(&mut self, name: &str, result: Result<ObjectId, ClientError>) -> String {
        match result {
            Ok(oid) => {
                self.names.insert(name.to_string(), oid);
                format!("bound {}", name)
            }
            Err(err) => format!("error: {}", err),
        }
    }

    /// Opens the multiplexer and binds the master and the newly published
    /// slave
    fn open_pty(&mut self, master: &str, slave: &str) -> String {
        let before = self.namespace.paths();
        let opened = self
            .client
            .lookup(PTMX_PATH)
            .and_then(|ptmx| self.client.open(ptmx, OpenFlags::read_write()));
        let master_oid = match opened {
            Ok(oid) => oid,
            Err(err) => return format!("error: {}", err),
        };
        self.names.insert(master.to_string(), master_oid);

        let path = self
            .namespace
            .paths()
            .into_iter()
            .find(|path| path.starts_with("/dev/pts/") && !before.contains(path));
        match path {
            Some(path) => {
                let result = self.client.lookup(&path);
                self.bind(slave, result);
                format!("bound {} and {} at {}", master, slave, path)
            }
            None => format!("bound {}, no slave path", master),
        }
    }

    /// Sends without waiting and records either the reply or the parking
    fn send(
        &mut self,
        line: usize,
        oid: ObjectId,
        operation: Operation,
        expect: Expect,
    ) -> Result<String, DaemonError> {
        let pending = self.kernel.send_async(Message::new(oid, operation))?;
        match pending.wait_timeout(self.settle()) {
            Ok(reply) => Ok(self.render(&expect, reply)),
            Err(KernelError::Timeout) => {
                self.parked.push(Parked {
                    line,
                    expect,
                    pending,
                });
                Ok("parked".to_string())
            }
            Err(err) => Ok(format!("error: {}", err)),
        }
    }

    /// Reports parked requests that completed meanwhile
    fn collect(&mut self) {
        let mut waiting = Vec::new();
        for parked in std::mem::take(&mut self.parked) {
            let line = match parked.pending.try_wait() {
                None => {
                    waiting.push(parked);
                    continue;
                }
                Some(Ok(reply)) => self.render(&parked.expect, reply),
                Some(Err(err)) => format!("error: {}", err),
            };
            self.transcript
                .push(format!("{:>3}: completed -> {}", parked.line, line));
        }
        self.parked = waiting;
    }

    fn render(&mut self, expect: &Expect, reply: Reply) -> String {
        let count = match reply.result {
            Ok(count) => count,
            Err(code) => return format!("error: {}", code),
        };
        match expect {
            Expect::Done => "ok".to_string(),
            Expect::Count => format!("{} bytes", count),
            Expect::Bytes if reply.eof => "eof".to_string(),
            Expect::Bytes => format!("{:?}", String::from_utf8_lossy(&reply.data)),
            Expect::Events => {
                let events: Vec<Event> = MessagePayload::from_bytes(reply.data)
                    .deserialize()
                    .unwrap_or_default();
                let names: Vec<String> = events
                    .iter()
                    .map(|event| {
                        let target = self
                            .names
                            .iter()
                            .find(|(_, oid)| **oid == event.oid)
                            .map_or("?", |(name, _)| name.as_str());
                        format!("{} {} x{}", target, event.event_type, event.count)
                    })
                    .collect();
                format!("[{}]", names.join(", "))
            }
            Expect::Bind { name, fallback } => {
                let oid = reply.object.unwrap_or(*fallback);
                self.names.insert(name.clone(), oid);
                format!("bound {}", name)
            }
        }
    }
}

fn render_unit(result: Result<(), ClientError>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(err) => format!("error: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str) -> DaemonRuntime {
        let config = DaemonConfig {
            script: Some(script.to_string()),
            ..DaemonConfig::default()
        };
        let mut runtime = DaemonRuntime::new(config).unwrap();
        runtime.run().unwrap();
        runtime
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = DaemonRuntime::new(DaemonConfig::default()).unwrap();
        assert_eq!(runtime.step_count(), 0);
        assert!(runtime.published().contains(&"/dev/null".to_string()));
    }

    #[test]
    fn test_runtime_rejects_bad_script() {
        let config = DaemonConfig {
            script: Some("pipe".to_string()),
            ..DaemonConfig::default()
        };
        assert!(matches!(
            DaemonRuntime::new(config),
            Err(DaemonError::Script(_))
        ));
    }

    #[test]
    fn test_pipe_session() {
        let runtime = run("pipe p\nwrite p \"hello\"\nread p 16\nclose p w\nread p 16");
        let transcript = runtime.transcript();
        assert_eq!(transcript.len(), 5);
        assert!(transcript[1].ends_with("-> 5 bytes"));
        assert!(transcript[2].ends_with("-> \"hello\""));
        assert!(transcript[4].ends_with("-> eof"));
        assert_eq!(runtime.step_count(), 5);
    }

    #[test]
    fn test_parked_read_completes_later() {
        let runtime = run("pipe p\nread p 4\nwrite p \"ping\"");
        let transcript = runtime.transcript();
        assert!(transcript[1].ends_with("-> parked"));
        assert!(transcript
            .iter()
            .any(|line| line.contains("completed -> \"ping\"")));
    }

    #[test]
    fn test_unknown_name_aborts() {
        let config = DaemonConfig {
            script: Some("read nowhere 4".to_string()),
            ..DaemonConfig::default()
        };
        let mut runtime = DaemonRuntime::new(config).unwrap();
        assert!(matches!(
            runtime.run(),
            Err(DaemonError::UnknownName { line: 1, .. })
        ));
    }

    #[test]
    fn test_operation_errors_are_recorded() {
        let runtime = run("pipe p\nread p 4 nonblock\nopen x /dev/missing");
        let transcript = runtime.transcript();
        assert!(transcript[1].ends_with("-> error: operation would block"));
        assert!(transcript[2].contains("error:"));
    }

    #[test]
    fn test_event_session() {
        let runtime = run(
            "lookup n /dev/null\nqueue q\nsubscribe q n error\npost n error 2\nevents q 4",
        );
        let transcript = runtime.transcript();
        assert!(transcript[4].ends_with("-> [n error x2]"));
    }

    #[test]
    fn test_pty_session() {
        let mut runtime = run("pty m s\nunlock m\nwrite m \"ls\"\nread s 2");
        assert!(runtime.object("m").is_some());
        assert!(runtime.object("s").is_some());
        let transcript = runtime.transcript().to_vec();
        assert!(transcript[0].contains("/dev/pts/"));
        assert!(transcript[2].ends_with("-> parked"));
        assert!(transcript[3].ends_with("-> \"ls\""));
        assert!(transcript
            .iter()
            .any(|line| line.ends_with("completed -> 2 bytes")));
        runtime.shutdown();
    }
}
