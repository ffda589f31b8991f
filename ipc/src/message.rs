//! Message types exchanged between clients and resource servers

use core_types::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Discriminant of a message
///
/// Selects which operation of the target resource handles the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Open,
    Close,
    Read,
    Write,
    Create,
    Destroy,
    GetAttr,
    SetAttr,
    Link,
    Unlink,
    DevCtl,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Open => "open",
            MessageKind::Close => "close",
            MessageKind::Read => "read",
            MessageKind::Write => "write",
            MessageKind::Create => "create",
            MessageKind::Destroy => "destroy",
            MessageKind::GetAttr => "getattr",
            MessageKind::SetAttr => "setattr",
            MessageKind::Link => "link",
            MessageKind::Unlink => "unlink",
            MessageKind::DevCtl => "devctl",
        };
        write!(f, "{}", name)
    }
}

/// Flags passed with open, close and create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub nonblock: bool,
}

impl OpenFlags {
    /// Open for reading
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            nonblock: false,
        }
    }

    /// Open for writing
    pub const fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            nonblock: false,
        }
    }

    /// Open for both directions
    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            nonblock: false,
        }
    }

    /// Same flags with non-blocking behaviour
    pub const fn nonblocking(mut self) -> Self {
        self.nonblock = true;
        self
    }
}

/// Blocking behaviour of a read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IoMode {
    #[default]
    Blocking,
    NonBlocking,
}

impl IoMode {
    pub fn is_nonblocking(&self) -> bool {
        matches!(self, IoMode::NonBlocking)
    }
}

/// How long a request may stay parked waiting for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitMode {
    /// Answer immediately, even with nothing to report
    #[default]
    NoWait,
    /// Park until something arrives
    Forever,
    /// Park at most this many milliseconds
    Timeout { millis: u64 },
}

/// Arguments of read and write
///
/// `data` is the caller's input buffer, `size` the capacity of its output
/// buffer (bytes for streams, events for notification queues).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoArgs {
    pub data: Vec<u8>,
    pub size: usize,
    pub mode: IoMode,
    pub wait: WaitMode,
}

impl IoArgs {
    /// Read of up to `size` bytes
    pub fn read(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Write of `data`
    pub fn write(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Same arguments, non-blocking
    pub fn nonblocking(mut self) -> Self {
        self.mode = IoMode::NonBlocking;
        self
    }

    /// Same arguments with a wait policy
    pub fn with_wait(mut self, wait: WaitMode) -> Self {
        self.wait = wait;
        self
    }
}

/// Kinds of object a factory can create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    /// Rendezvous pipe without a buffer
    Pipe,
    /// Pipe backed by a ring buffer
    BufferedPipe,
    /// Notification queue
    EventQueue,
}

/// Attribute selector for getattr/setattr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    /// Current readiness as an event mask
    PollStatus,
    /// Event types somebody subscribed to
    EventMask,
    /// Bytes currently buffered
    Size,
}

/// Device control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevCtl {
    /// Unlock the slave side of a pseudo-terminal
    Unlock,
}

/// Kind-specific message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Open { flags: OpenFlags },
    Close { flags: OpenFlags },
    Read(IoArgs),
    Write(IoArgs),
    Create { object_type: ObjectType, open: OpenFlags },
    Destroy,
    GetAttr { attr: AttrType },
    SetAttr { attr: AttrType, value: u64 },
    Link { path: String },
    Unlink { path: String },
    DevCtl(DevCtl),
}

impl Operation {
    /// Returns the discriminant of this payload
    pub fn kind(&self) -> MessageKind {
        match self {
            Operation::Open { .. } => MessageKind::Open,
            Operation::Close { .. } => MessageKind::Close,
            Operation::Read(_) => MessageKind::Read,
            Operation::Write(_) => MessageKind::Write,
            Operation::Create { .. } => MessageKind::Create,
            Operation::Destroy => MessageKind::Destroy,
            Operation::GetAttr { .. } => MessageKind::GetAttr,
            Operation::SetAttr { .. } => MessageKind::SetAttr,
            Operation::Link { .. } => MessageKind::Link,
            Operation::Unlink { .. } => MessageKind::Unlink,
            Operation::DevCtl(_) => MessageKind::DevCtl,
        }
    }

    /// Returns the read/write arguments, if this is a read or write
    pub fn io(&self) -> Option<&IoArgs> {
        match self {
            Operation::Read(io) | Operation::Write(io) => Some(io),
            _ => None,
        }
    }
}

/// A request addressed to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Target object
    pub oid: ObjectId,
    /// What to do with it
    pub operation: Operation,
}

impl Message {
    /// Creates a message
    pub fn new(oid: ObjectId, operation: Operation) -> Self {
        Self { oid, operation }
    }

    /// Returns the message kind
    pub fn kind(&self) -> MessageKind {
        self.operation.kind()
    }
}

/// Failure reported in a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ErrorCode {
    #[error("no such object")]
    NotFound,
    #[error("out of identifiers or memory")]
    AllocationFailure,
    #[error("operation would block")]
    WouldBlock,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("operation not supported by this object")]
    InvalidOperation,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("permission denied")]
    PermissionDenied,
    #[error("timed out")]
    Timeout,
    #[error("no such device")]
    NoSuchDevice,
    #[error("bad descriptor")]
    BadDescriptor,
}

/// Answer to a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Byte/event count on success
    pub result: Result<usize, ErrorCode>,
    /// Output buffer contents
    pub data: Vec<u8>,
    /// Set on a read that hit end of stream
    pub eof: bool,
    /// Object created or opened by the request
    pub object: Option<ObjectId>,
    /// Attribute value for getattr
    pub value: Option<u64>,
}

impl Reply {
    /// Success carrying a count
    pub fn ok(count: usize) -> Self {
        Self {
            result: Ok(count),
            data: Vec::new(),
            eof: false,
            object: None,
            value: None,
        }
    }

    /// Failure
    pub fn error(code: ErrorCode) -> Self {
        Self {
            result: Err(code),
            ..Self::ok(0)
        }
    }

    /// Success carrying output bytes; the count is their length
    pub fn data(data: Vec<u8>) -> Self {
        Self {
            result: Ok(data.len()),
            data,
            ..Self::ok(0)
        }
    }

    /// Zero-byte read at end of stream
    pub fn eof() -> Self {
        Self {
            eof: true,
            ..Self::ok(0)
        }
    }

    /// Success naming an object
    pub fn object(oid: ObjectId) -> Self {
        Self {
            object: Some(oid),
            ..Self::ok(0)
        }
    }

    /// Success carrying an attribute value
    pub fn value(value: u64) -> Self {
        Self {
            value: Some(value),
            ..Self::ok(0)
        }
    }

    /// Same reply with output bytes attached, count unchanged
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Returns whether the reply reports success
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl From<ErrorCode> for Reply {
    fn from(code: ErrorCode) -> Self {
        Reply::error(code)
    }
}

/// JSON-encoded structured payload carried in a byte buffer
///
/// Notification queues and the event sink exchange arrays of typed records
/// through the plain byte buffers of read and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    data: Vec<u8>,
}

impl MessagePayload {
    /// Creates a new payload from serializable data
    pub fn new<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(data)?;
        Ok(Self { data: json })
    }

    /// Wraps bytes received in a buffer
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Deserializes the payload into a specific type
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Returns the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the payload, returning the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
