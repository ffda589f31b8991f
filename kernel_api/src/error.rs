//! Kernel error types

use core_types::PortId;
use thiserror::Error;

/// Errors that can occur when interacting with the kernel
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The port was closed while the operation was in progress
    #[error("Port closed")]
    PortClosed,

    /// No port with this identifier exists
    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    /// Message send failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Message receive failed
    #[error("Failed to receive message: {0}")]
    ReceiveFailed(String),

    /// The response token does not belong to an outstanding receive
    #[error("Unknown response token: {0}")]
    InvalidToken(u64),

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// No namespace entry at this path
    #[error("Name not found: {0}")]
    NameNotFound(String),

    /// The path is already linked
    #[error("Name already exists: {0}")]
    NameExists(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}
