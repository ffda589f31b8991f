//! # Core Types
//!
//! This crate defines the identifiers shared by every part of the POSIX
//! resource server and its clients.
//!
//! ## Philosophy
//!
//! - **Typed, not integers**: a port is not a resource id, and a resource id
//!   is not a bare index.
//! - **Stale ids never alias**: resource ids carry a generation, so an id
//!   that outlived its resource cannot name whatever reused the slot.
//!
//! ## Key Types
//!
//! - [`PortId`]: address of a message port
//! - [`ResourceId`]: generation-checked handle into a server's registry
//! - [`ObjectId`]: a port plus a resource id on it
//! - [`IdAllocator`]: smallest-free-integer allocator backing the registry

pub mod ids;

pub use ids::{IdAllocator, ObjectId, PortId, ResourceId};
