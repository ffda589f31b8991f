//! Server error types

use ipc::ErrorCode;
use kernel_api::KernelError;
use thiserror::Error;

/// Failure inside the server, before it is turned into a reply
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("resource {0} not found")]
    NotFound(String),

    #[error("resource limit of {0} reached")]
    AllocationFailure(usize),

    #[error("{kind} is not supported by {resource}")]
    InvalidOperation { kind: String, resource: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to spawn {0}")]
    Spawn(String),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<ServerError> for ErrorCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::AllocationFailure(_) => ErrorCode::AllocationFailure,
            ServerError::InvalidOperation { .. } => ErrorCode::InvalidOperation,
            ServerError::InvalidArgument(_) | ServerError::Config(_) => ErrorCode::InvalidArgument,
            ServerError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ServerError::Spawn(_) => ErrorCode::AllocationFailure,
            ServerError::Kernel(err) => match err {
                KernelError::NameNotFound(_) | KernelError::PortNotFound(_) => ErrorCode::NotFound,
                KernelError::NameExists(_) => ErrorCode::InvalidArgument,
                KernelError::Timeout => ErrorCode::Timeout,
                KernelError::ResourceExhausted(_) => ErrorCode::AllocationFailure,
                KernelError::PortClosed
                | KernelError::SendFailed(_)
                | KernelError::ReceiveFailed(_)
                | KernelError::InvalidToken(_) => ErrorCode::BrokenPipe,
            },
        }
    }
}

/// Configuration rejected at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    ZeroWorkers,

    #[error("pipe_capacity must be at least 1")]
    ZeroPipeCapacity,

    #[error("max_resources must be at least 1")]
    ZeroResourceLimit,

    #[error("port_capacity must be at least 1")]
    ZeroPortCapacity,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Failure seen by a client of the server
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("server replied: {0}")]
    Posix(#[from] ErrorCode),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("reply carried no {0}")]
    MissingField(&'static str),
}

impl ClientError {
    /// Returns the server's error code, if the server answered with one
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Posix(code) => Some(*code),
            _ => None,
        }
    }
}
