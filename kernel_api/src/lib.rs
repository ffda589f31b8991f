//! # Kernel API
//!
//! This crate defines the interface between the POSIX resource server and
//! the message-passing substrate it runs on.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Ports (mailboxes with synchronous send/receive/respond)
//! - A path namespace (lookup, link, unlink)
//! - Time (explicit, not ambient)
//!
//! Everything POSIX-shaped (pipes, polling, devices) is built on top of these
//! by a user-space server.
//!
//! ## Design Goals
//!
//! 1. **Testability**: every trait can be implemented in-process
//! 2. **Explicitness**: a receive hands out a token, a respond consumes it
//! 3. **Simplicity**: minimal surface area

pub mod error;
pub mod kernel;
pub mod time;

pub use error::KernelError;
pub use kernel::{KernelApi, MessagePort, Namespace};
pub use time::{Duration, Instant};
