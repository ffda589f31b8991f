//! Requests in flight
//!
//! A [`Request`] owns the response token of one received message. It is
//! answered exactly once: either through [`Request::complete`], or, if it is
//! dropped unanswered, with `BrokenPipe` so the client is never left waiting.

use core_types::ObjectId;
use ipc::{ErrorCode, IoArgs, Message, Reply, ResponseToken};
use kernel_api::MessagePort;
use services_logger::{LogEntry, Logger};
use std::fmt;
use std::sync::Arc;

/// Server-local sequence number of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rq#{}", self.0)
    }
}

/// One client operation awaiting its reply
pub struct Request {
    id: RequestId,
    message: Message,
    token: Option<ResponseToken>,
    port: Arc<dyn MessagePort>,
    log: Logger,
}

impl Request {
    pub fn new(
        id: RequestId,
        message: Message,
        token: ResponseToken,
        port: Arc<dyn MessagePort>,
        log: Logger,
    ) -> Self {
        Self {
            id,
            message,
            token: Some(token),
            port,
            log,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Target object of the request
    pub fn oid(&self) -> ObjectId {
        self.message.oid
    }

    /// Read/write arguments, if this is a read or write
    pub fn io(&self) -> Option<&IoArgs> {
        self.message.operation.io()
    }

    /// Answers the client
    pub fn complete(mut self, reply: Reply) {
        self.respond(reply);
    }

    /// Answers the client with an error
    pub fn fail(self, code: ErrorCode) {
        self.complete(Reply::error(code));
    }

    fn respond(&mut self, reply: Reply) {
        let Some(token) = self.token.take() else {
            return;
        };
        if let Err(err) = self.port.respond(token, reply) {
            // The port is closing or the client went away.
            self.log.log(
                LogEntry::debug("reply not delivered")
                    .with_field("request", self.id)
                    .with_field("error", err),
            );
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.token.is_some() {
            self.log.log(
                LogEntry::error("request dropped without reply")
                    .with_field("request", self.id)
                    .with_field("kind", self.message.kind())
                    .with_field("object", self.message.oid),
            );
            self.respond(Reply::error(ErrorCode::BrokenPipe));
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.message.kind())
            .field("oid", &self.message.oid)
            .finish()
    }
}

/// A parked request together with how to finish it
pub(crate) type Completion = (Request, Reply);

/// Answers every completion, in order
pub(crate) fn complete_all(completions: Vec<Completion>) {
    for (rq, reply) in completions {
        rq.complete(reply);
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::TestBench;
    use ipc::{ErrorCode, IoArgs, Operation, Reply};
    use services_logger::LogLevel;

    #[test]
    fn test_complete_answers_once() {
        let bench = TestBench::new();
        let (rq, pending) = bench.request(bench.null_oid(), Operation::Read(IoArgs::read(1)));
        rq.complete(Reply::ok(7));
        assert_eq!(pending.wait().unwrap().result, Ok(7));
    }

    #[test]
    fn test_dropped_request_replies_broken_pipe() {
        let bench = TestBench::new();
        let (rq, pending) = bench.request(bench.null_oid(), Operation::Read(IoArgs::read(1)));
        drop(rq);

        assert_eq!(pending.wait().unwrap().result, Err(ErrorCode::BrokenPipe));
        assert!(bench.log().has_message("request dropped without reply"));
        assert_eq!(bench.log().count(LogLevel::Error), 1);
    }
}
