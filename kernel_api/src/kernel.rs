//! Kernel API traits

use crate::{Instant, KernelError};
use core_types::{ObjectId, PortId};
use ipc::{Message, Reply, ResponseToken};
use std::sync::Arc;

/// A server-side mailbox
///
/// Clients send [`Message`]s to the port; a server receives them one at a
/// time, each paired with a [`ResponseToken`], and later responds exactly
/// once per token. Any number of threads may receive from one port
/// concurrently.
pub trait MessagePort: Send + Sync {
    /// Returns the identifier clients address this port by
    fn port_id(&self) -> PortId;

    /// Blocks until a message arrives
    ///
    /// Returns [`KernelError::PortClosed`] once the port is closed, which is
    /// how receiving threads learn to shut down.
    fn receive(&self) -> Result<(Message, ResponseToken), KernelError>;

    /// Completes the receive that produced `token`
    ///
    /// Consumes the token, so a receive can never be answered twice.
    fn respond(&self, token: ResponseToken, reply: Reply) -> Result<(), KernelError>;

    /// Closes the port
    ///
    /// Blocked receivers return `PortClosed`; senders still waiting for a
    /// reply observe `PortClosed` too.
    fn close(&self);
}

/// The kernel API trait
///
/// Multiple implementations are possible:
/// - Simulated kernel (in-process, for testing and the host daemon)
/// - Real kernel (syscalls)
pub trait KernelApi: Send + Sync {
    /// Creates a port whose inbound queue holds at most `capacity` messages
    fn create_port(&self, capacity: usize) -> Result<Arc<dyn MessagePort>, KernelError>;

    /// Sends a message to the port named by its target object and waits for
    /// the reply
    fn send(&self, message: Message) -> Result<Reply, KernelError>;

    /// Returns the current time
    fn now(&self) -> Instant;
}

/// Path namespace used to publish and find objects
pub trait Namespace: Send + Sync {
    /// Resolves a path to the object linked there
    fn lookup(&self, path: &str) -> Result<ObjectId, KernelError>;

    /// Publishes an object under a path
    fn link(&self, path: &str, oid: ObjectId) -> Result<(), KernelError>;

    /// Removes a path, returning the object that was linked there
    fn unlink(&self, path: &str) -> Result<ObjectId, KernelError>;
}
