//! Event sink (`/dev/event/sink`)
//!
//! Anyone may write a batch of events here. The writer is answered before
//! the batch is delivered, so a slow subscriber never holds up a source.

use super::queue::create_queue;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::ResourceRef;
use crate::request::Request;
use crate::resource::{Factory, Handled, Openable, Stream};
use ipc::{ErrorCode, Event, ObjectType, OpenFlags, Reply};
use services_logger::LogEntry;

pub struct EventSink;

impl Stream for EventSink {
    fn read(&self, _cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        Handled::Reply(rq, Reply::error(ErrorCode::InvalidOperation))
    }

    fn write(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        let parsed = rq
            .io()
            .map(|io| serde_json::from_slice::<Vec<Event>>(&io.data));
        let events = match parsed {
            Some(Ok(events)) => events,
            Some(Err(err)) => {
                cx.log().log(LogEntry::warn("malformed event batch").with_field("error", err));
                return Handled::Reply(rq, Reply::error(ErrorCode::InvalidArgument));
            }
            None => return Handled::Reply(rq, Reply::error(ErrorCode::InvalidArgument)),
        };

        rq.complete(Reply::ok(events.len()));
        cx.events().register(cx, &events);
        Handled::Answered
    }
}

impl Openable for EventSink {
    fn open(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }

    fn close(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }
}

impl Factory for EventSink {
    fn create(&self, cx: &ServerContext, object_type: ObjectType, _open: OpenFlags)
        -> Result<ResourceRef, ServerError>
    {
        match object_type {
            ObjectType::EventQueue => create_queue(cx),
            other => Err(ServerError::InvalidArgument(format!(
                "event sink cannot create {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::TestBench;
    use ipc::{ErrorCode, IoArgs, ObjectType, OpenFlags, Operation};

    #[test]
    fn test_create_makes_queue() {
        let bench = TestBench::new();
        let reply = bench.call(
            bench.sink_oid(),
            Operation::Create {
                object_type: ObjectType::EventQueue,
                open: OpenFlags::read_write(),
            },
        );
        let queue = reply.object.unwrap();
        assert_eq!(
            bench.call(queue, Operation::Read(IoArgs::read(1))).result,
            Ok(0)
        );
    }

    #[test]
    fn test_create_rejects_pipes() {
        let bench = TestBench::new();
        let reply = bench.call(
            bench.sink_oid(),
            Operation::Create {
                object_type: ObjectType::Pipe,
                open: OpenFlags::read_write(),
            },
        );
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
    }

    #[test]
    fn test_malformed_batch_rejected() {
        let bench = TestBench::new();
        let reply = bench.call(bench.sink_oid(), Operation::Write(IoArgs::write(b"[1,2".to_vec())));
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
        assert!(bench.log().has_message("malformed event batch"));
    }

    #[test]
    fn test_empty_batch_accepted() {
        let bench = TestBench::new();
        let reply = bench.call(bench.sink_oid(), Operation::Write(IoArgs::write(b"[]".to_vec())));
        assert_eq!(reply.result, Ok(0));
    }
}
