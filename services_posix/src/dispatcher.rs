//! Worker loop
//!
//! Every worker blocks on the server port, turns each message into a
//! [`Request`], resolves its target and hands it to the capability the
//! message kind selects. A handler that parks its request leaves the worker
//! free immediately; the resource answers later.

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::ResourceRef;
use crate::request::Request;
use crate::resource::Handled;
use ipc::{AttrType, DevCtl, ErrorCode, ObjectType, OpenFlags, Operation, Reply};
use kernel_api::KernelError;
use services_logger::LogEntry;

/// Operation arguments detached from the request so it can be moved into
/// the handler
enum Call {
    Open(OpenFlags),
    Close(OpenFlags),
    Read,
    Write,
    Create {
        object_type: ObjectType,
        open: OpenFlags,
    },
    Destroy,
    GetAttr(AttrType),
    SetAttr(AttrType, u64),
    Link(String),
    Unlink(String),
    DevCtl(DevCtl),
}

impl Call {
    fn of(operation: &Operation) -> Self {
        match operation {
            Operation::Open { flags } => Call::Open(*flags),
            Operation::Close { flags } => Call::Close(*flags),
            Operation::Read(_) => Call::Read,
            Operation::Write(_) => Call::Write,
            Operation::Create { object_type, open } => Call::Create {
                object_type: *object_type,
                open: *open,
            },
            Operation::Destroy => Call::Destroy,
            Operation::GetAttr { attr } => Call::GetAttr(*attr),
            Operation::SetAttr { attr, value } => Call::SetAttr(*attr, *value),
            Operation::Link { path } => Call::Link(path.clone()),
            Operation::Unlink { path } => Call::Unlink(path.clone()),
            Operation::DevCtl(ctl) => Call::DevCtl(*ctl),
        }
    }
}

/// Body of one worker thread; returns once the port is closed
pub fn run_worker(cx: &ServerContext, worker: usize) {
    cx.log()
        .log(LogEntry::debug("worker started").with_field("worker", worker));

    loop {
        match cx.port().receive() {
            Ok((message, token)) => dispatch(cx, cx.new_request(message, token)),
            Err(KernelError::PortClosed) => break,
            Err(err) => cx.log().log(
                LogEntry::warn("receive failed")
                    .with_field("worker", worker)
                    .with_field("error", err),
            ),
        }
    }

    cx.log()
        .log(LogEntry::debug("worker stopped").with_field("worker", worker));
}

/// Resolves the target of `rq` and runs its handler
pub fn dispatch(cx: &ServerContext, rq: Request) {
    let oid = rq.oid();
    if !cx.is_local(&oid) {
        rq.fail(ErrorCode::NotFound);
        return;
    }

    let this = match cx.registry().acquire(oid.id) {
        Ok(this) => this,
        Err(err) => {
            cx.log().log(
                LogEntry::debug("request for unknown resource")
                    .with_field("request", rq.id())
                    .with_field("resource", oid.id),
            );
            rq.fail(err.into());
            return;
        }
    };

    let handled = invoke(cx, &this, rq);
    // A client that sees the reply must not find a destroyed resource still registered.
    drop(this);
    if let Handled::Reply(rq, reply) = handled {
        rq.complete(reply);
    }
}

fn unsupported(cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled {
    let err = ServerError::InvalidOperation {
        kind: rq.message().kind().to_string(),
        resource: this.resource().kind_name(),
    };
    cx.log().log(
        LogEntry::warn("operation not supported")
            .with_field("request", rq.id())
            .with_field("resource", this.id())
            .with_field("error", &err),
    );
    Handled::result(rq, Err(err))
}

fn invoke(cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled {
    let resource = this.resource();
    let call = Call::of(&rq.message().operation);
    let ok = |()| Reply::ok(0);

    match call {
        Call::Open(flags) => match resource.as_openable() {
            Some(target) => target.open(cx, this, flags, rq),
            None => unsupported(cx, this, rq),
        },
        Call::Close(flags) => match resource.as_openable() {
            Some(target) => target.close(cx, this, flags, rq),
            None => unsupported(cx, this, rq),
        },
        Call::Read => match resource.as_stream() {
            Some(target) => target.read(cx, this, rq),
            None => unsupported(cx, this, rq),
        },
        Call::Write => match resource.as_stream() {
            Some(target) => target.write(cx, this, rq),
            None => unsupported(cx, this, rq),
        },
        Call::Create { object_type, open } => match resource.as_factory() {
            Some(target) => {
                let created = target
                    .create(cx, object_type, open)
                    .map(|created| Reply::object(cx.oid(created.id())));
                Handled::result(rq, created)
            }
            None => unsupported(cx, this, rq),
        },
        Call::Destroy => match resource.as_destroyable() {
            Some(target) => Handled::result(rq, target.destroy(cx, this).map(ok)),
            None => unsupported(cx, this, rq),
        },
        Call::GetAttr(attr) => match resource.as_attributes() {
            Some(target) => {
                Handled::result(rq, target.get_attr(cx, this, attr).map(Reply::value))
            }
            None => unsupported(cx, this, rq),
        },
        Call::SetAttr(attr, value) => match resource.as_attributes() {
            Some(target) => Handled::result(rq, target.set_attr(cx, this, attr, value).map(ok)),
            None => unsupported(cx, this, rq),
        },
        Call::Link(path) => match resource.as_linkable() {
            Some(target) => Handled::result(rq, target.link(cx, this, &path).map(ok)),
            None => unsupported(cx, this, rq),
        },
        Call::Unlink(path) => match resource.as_linkable() {
            Some(target) => Handled::result(rq, target.unlink(cx, this, &path).map(ok)),
            None => unsupported(cx, this, rq),
        },
        Call::DevCtl(ctl) => match resource.as_devctl() {
            Some(target) => Handled::result(rq, target.devctl(cx, this, ctl).map(ok)),
            None => unsupported(cx, this, rq),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBench;
    use core_types::{ObjectId, PortId};
    use ipc::{IoArgs, Message};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_foreign_port_is_not_found() {
        let bench = TestBench::new();
        let foreign = ObjectId::new(PortId::new(), bench.null_oid().id);
        let pending = bench
            .kernel()
            .send_async(Message::new(bench.null_oid(), Operation::Destroy))
            .unwrap();
        let (mut message, token) = bench.cx().port().receive().unwrap();
        message.oid = foreign;
        dispatch(bench.cx(), bench.cx().new_request(message, token));
        assert_eq!(pending.wait().unwrap().result, Err(ErrorCode::NotFound));
    }

    #[test]
    fn test_missing_capability_is_invalid_operation() {
        let bench = TestBench::new();
        let reply = bench.call(bench.pipes_oid(), Operation::Read(IoArgs::read(4)));
        assert_eq!(reply.result, Err(ErrorCode::InvalidOperation));
        assert!(bench.log().has_message("operation not supported"));

        let reply = bench.call(bench.null_oid(), Operation::Destroy);
        assert_eq!(reply.result, Err(ErrorCode::InvalidOperation));
    }

    #[test]
    fn test_worker_serves_until_port_closes() {
        let bench = TestBench::new();
        let cx = bench.context();
        let worker = thread::spawn(move || run_worker(&cx, 0));

        let reply = bench
            .kernel()
            .send_async(Message::new(bench.zero_oid(), Operation::Read(IoArgs::read(3))))
            .unwrap()
            .wait_timeout(Duration::from_secs(5).into())
            .unwrap();
        assert_eq!(reply.data, vec![0, 0, 0]);

        bench.cx().port().close();
        worker.join().unwrap();
    }
}
