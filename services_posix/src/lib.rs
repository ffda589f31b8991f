//! # POSIX Resource Server
//!
//! This crate implements a user-space server that gives POSIX-shaped
//! resources (pipes, readiness notification, `/dev/null`, `/dev/zero` and
//! pseudo-terminals) to clients of a message-passing kernel.
//!
//! ## Philosophy
//!
//! - **Messages in, replies out**: every resource is driven by the same
//!   message vocabulary from [`ipc`]; a resource answers only the operations
//!   it has a capability for
//! - **Parking, not blocking**: a request that cannot complete yet is kept
//!   by its resource and answered later, so a worker thread never sleeps on
//!   a resource
//! - **Explicit lifetime**: the [`Registry`] counts references; a resource
//!   is torn down exactly once, after it is marked destroyed and the last
//!   reference is gone
//!
//! ## Architecture
//!
//! [`Server::start`] publishes the fixed devices in the namespace and spawns
//! dispatcher workers on one port. Each worker receives a message, resolves
//! its target in the [`Registry`] and hands it to the resource. Notification
//! queues sit on the [`EventEngine`], which coalesces events reported
//! through the event sink and hands them to subscribed queues.
//! [`PosixClient`] wraps the protocol for callers.

pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod pipe;
pub mod pty;
pub mod registry;
pub mod request;
pub mod resource;
pub mod server;
pub mod special;
pub mod timer;

#[cfg(test)]
mod testing;

pub use client::PosixClient;
pub use config::ServerConfig;
pub use context::ServerContext;
pub use error::{ClientError, ConfigError, ServerError};
pub use event::{EventEngine, EventQueue, EventSink, InterestRecord, QueueFactory};
pub use pipe::{Pipe, PipeFactory};
pub use pty::{PtyMaster, PtyMultiplexer, PtySlave};
pub use registry::{Registry, ResourceRef};
pub use request::{Request, RequestId};
pub use resource::{Handled, Resource};
pub use server::{Server, NULL_PATH, PIPES_PATH, PTMX_PATH, QUEUE_PATH, SINK_PATH, ZERO_PATH};
pub use special::{NullDevice, ZeroDevice};
