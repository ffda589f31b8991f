//! # Simulated Kernel
//!
//! This crate provides an in-process implementation of the kernel API.
//!
//! ## Purpose
//!
//! The simulated kernel allows running and testing servers without hardware:
//! - Runs under `cargo test`
//! - Real threads, real blocking: ports block receivers and senders exactly
//!   the way a microkernel mailbox would
//! - Inspectable (queued and outstanding messages are observable)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! This is not a "toy" or "mock" - it's a full implementation of the
//! kernel API that happens to run in-process.

pub mod message_queue;
pub mod namespace;
pub mod port;

pub use namespace::SimNamespace;
pub use port::{PendingReply, SimPort};

use core_types::PortId;
use ipc::{Message, Reply};
use kernel_api::{Instant, KernelApi, KernelError, MessagePort};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

struct KernelState {
    ports: Mutex<HashMap<PortId, Arc<SimPort>>>,
    boot: std::time::Instant,
}

/// Simulated kernel
///
/// Cheap to clone; clones share the same ports.
#[derive(Clone)]
pub struct SimulatedKernel {
    state: Arc<KernelState>,
}

impl SimulatedKernel {
    /// Creates a new simulated kernel
    pub fn new() -> Self {
        Self {
            state: Arc::new(KernelState {
                ports: Mutex::new(HashMap::new()),
                boot: std::time::Instant::now(),
            }),
        }
    }

    /// Returns a port by identifier
    pub fn port(&self, id: PortId) -> Option<Arc<SimPort>> {
        self.state
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns the number of ports ever created
    pub fn port_count(&self) -> usize {
        self.state
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sends a message without waiting for its reply
    ///
    /// Blocks only while the target port's queue is full.
    pub fn send_async(&self, message: Message) -> Result<PendingReply, KernelError> {
        let port = self
            .port(message.oid.port)
            .ok_or(KernelError::PortNotFound(message.oid.port))?;
        port.deliver(message)
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelApi for SimulatedKernel {
    fn create_port(&self, capacity: usize) -> Result<Arc<dyn MessagePort>, KernelError> {
        if capacity == 0 {
            return Err(KernelError::ResourceExhausted(
                "port capacity must be non-zero".to_string(),
            ));
        }
        let id = PortId::new();
        let port = Arc::new(SimPort::new(id, capacity));
        self.state
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, port.clone());
        Ok(port)
    }

    fn send(&self, message: Message) -> Result<Reply, KernelError> {
        self.send_async(message)?.wait()
    }

    fn now(&self) -> Instant {
        let elapsed = self.state.boot.elapsed().as_nanos();
        Instant::from_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}
