//! # Inter-Process Communication (IPC)
//!
//! This crate defines the message vocabulary spoken between clients and the
//! POSIX resource server.
//!
//! ## Philosophy
//!
//! - **One vocabulary**: every resource, pipe or notification queue, is driven
//!   by the same small set of message kinds (open, close, read, write, create,
//!   destroy, getattr, setattr, link, unlink, devctl)
//! - **Typed, not stringly-typed**: each kind carries its own payload type
//! - **Failures are values**: replies carry an [`ErrorCode`], nothing is thrown
//!
//! ## Architecture
//!
//! A [`Message`] names its target [`ObjectId`](core_types::ObjectId) and an
//! [`Operation`]. The receiving server answers with exactly one [`Reply`],
//! paired to the receive through a [`ResponseToken`].

pub mod channel;
pub mod events;
pub mod message;

pub use channel::ResponseToken;
pub use events::{
    Event, EventMask, EventType, Subscription, SubscriptionFlags, EVENT_TYPE_COUNT,
};
pub use message::{
    AttrType, DevCtl, ErrorCode, IoArgs, IoMode, Message, MessageKind, MessagePayload,
    ObjectType, OpenFlags, Operation, Reply, WaitMode,
};
