//! # POSIX Host Daemon
//!
//! This crate hosts the POSIX resource server on the simulated kernel.
//!
//! ## Philosophy
//!
//! - **Host owns I/O**: the server never prints; the daemon renders a
//!   transcript of what each scripted operation returned
//! - **Deterministic mode is first-class**: a session script drives the
//!   server exactly as a client would, for demos and tests
//!
//! ## Responsibilities
//!
//! The daemon:
//! - Loads the server configuration (JSON file plus command-line overrides)
//! - Boots a kernel, a namespace and the server with its devices
//! - Plays a session script and reports every outcome
//! - Shuts the server down cleanly

pub mod runtime;
pub mod script;

pub use runtime::{DaemonConfig, DaemonError, DaemonRuntime};
pub use script::{ScriptCommand, ScriptError, ScriptStep, SessionScript};
