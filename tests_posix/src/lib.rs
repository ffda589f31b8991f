//! POSIX Server Test Utilities
//!
//! This crate provides shared utilities for integration tests of the POSIX
//! resource server.
//!
//! ## Test Philosophy
//!
//! - **Real threads**: every test runs the server with its dispatcher workers
//!   and timer thread, exactly as the daemon does
//! - **Bounded waits**: blocking scenarios send asynchronously and wait with
//!   a timeout, so a regression fails instead of hanging
//! - **Observable lifetime**: tests check the registry and the namespace
//!   after teardown, not only the replies

use core_types::ObjectId;
use ipc::{Message, Operation, Reply};
use kernel_api::Duration;
use services_posix::{PosixClient, Resource, Server, ServerConfig};
use sim_kernel::{PendingReply, SimNamespace, SimulatedKernel};
use std::sync::Arc;

/// Upper bound for any single reply in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Long enough for a request to reach its resource and park
pub const SETTLE: Duration = Duration::from_millis(50);

/// Bootstrap helper for tests
///
/// Starts a kernel, a namespace and a server with its devices published,
/// and returns a client talking to it.
pub fn test_bootstrap() -> (SimulatedKernel, Server, PosixClient) {
    test_bootstrap_with(ServerConfig::default())
}

/// Bootstrap helper with a custom server configuration
pub fn test_bootstrap_with(config: ServerConfig) -> (SimulatedKernel, Server, PosixClient) {
    let kernel = SimulatedKernel::new();
    let namespace = Arc::new(SimNamespace::new());
    let server = Server::start(Arc::new(kernel.clone()), namespace.clone(), config)
        .expect("Failed to start server");
    let client = PosixClient::new(Arc::new(kernel.clone()), namespace);
    (kernel, server, client)
}

/// Sends an operation without waiting for its reply
pub fn send_async(kernel: &SimulatedKernel, oid: ObjectId, operation: Operation) -> PendingReply {
    kernel
        .send_async(Message::new(oid, operation))
        .expect("Failed to send message")
}

/// Waits for a reply, failing the test after [`WAIT`]
pub fn wait_reply(pending: &PendingReply) -> Reply {
    pending.wait_timeout(WAIT).expect("Reply did not arrive")
}

/// Asserts that a request is still parked after [`SETTLE`]
pub fn assert_parked(pending: &PendingReply) {
    assert!(
        pending.wait_timeout(SETTLE).is_err(),
        "request was answered but should be parked"
    );
}

/// Returns where the slave of a pty master is published
pub fn pty_slave_path(server: &Server, master: ObjectId) -> Option<String> {
    let handle = server.context().registry().acquire(master.id).ok()?;
    match handle.resource() {
        Resource::PtyMaster(pty) => Some(pty.slave_path().to_string()),
        _ => None,
    }
}
