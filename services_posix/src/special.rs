//! `/dev/null` and `/dev/zero`

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::ResourceRef;
use crate::request::Request;
use crate::resource::{Attributes, Handled, Openable, Stream};
use ipc::{AttrType, EventType, OpenFlags, Reply};

/// Both devices are always readable and writable
fn device_attr(attr: AttrType) -> u64 {
    match attr {
        AttrType::PollStatus => {
            u64::from((EventType::DATA_IN.mask() | EventType::DATA_OUT.mask()).bits())
        }
        AttrType::EventMask | AttrType::Size => 0,
    }
}

/// Swallows writes, reads end-of-stream
pub struct NullDevice;

/// Swallows writes, reads zeros
pub struct ZeroDevice;

impl Stream for NullDevice {
    fn read(&self, _cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        Handled::Reply(rq, Reply::eof())
    }

    fn write(&self, _cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        let len = rq.io().map_or(0, |io| io.data.len());
        Handled::Reply(rq, Reply::ok(len))
    }
}

impl Stream for ZeroDevice {
    /// Answers at most `pipe_capacity` zeros; callers loop for more
    fn read(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        let size = rq
            .io()
            .map_or(0, |io| io.size)
            .min(cx.config().pipe_capacity);
        Handled::Reply(rq, Reply::data(vec![0; size]))
    }

    fn write(&self, _cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        let len = rq.io().map_or(0, |io| io.data.len());
        Handled::Reply(rq, Reply::ok(len))
    }
}

macro_rules! device_common {
    ($device:ty) => {
        impl Openable for $device {
            fn open(
                &self,
                _cx: &ServerContext,
                _this: &ResourceRef,
                _flags: OpenFlags,
                rq: Request,
            ) -> Handled {
                Handled::Reply(rq, Reply::ok(0))
            }

            fn close(
                &self,
                _cx: &ServerContext,
                _this: &ResourceRef,
                _flags: OpenFlags,
                rq: Request,
            ) -> Handled {
                Handled::Reply(rq, Reply::ok(0))
            }
        }

        impl Attributes for $device {
            fn get_attr(
                &self,
                _cx: &ServerContext,
                _this: &ResourceRef,
                attr: AttrType,
            ) -> Result<u64, ServerError> {
                Ok(device_attr(attr))
            }

            fn set_attr(
                &self,
                _cx: &ServerContext,
                _this: &ResourceRef,
                _attr: AttrType,
                _value: u64,
            ) -> Result<(), ServerError> {
                Ok(())
            }
        }
    };
}

device_common!(NullDevice);
device_common!(ZeroDevice);

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::testing::TestBench;
    use ipc::{AttrType, IoArgs, OpenFlags, Operation};

    #[test]
    fn test_null_reads_eof_and_swallows_writes() {
        let bench = TestBench::new();
        let null = bench.null_oid();

        assert!(bench.call(null, Operation::Open { flags: OpenFlags::read_write() }).is_ok());
        let read = bench.call(null, Operation::Read(IoArgs::read(16)));
        assert!(read.eof);
        assert!(read.data.is_empty());
        assert_eq!(
            bench.call(null, Operation::Write(IoArgs::write(vec![1; 300]))).result,
            Ok(300)
        );
    }

    #[test]
    fn test_zero_fills_requested_size() {
        let bench = TestBench::new();
        let zero = bench.zero_oid();

        let read = bench.call(zero, Operation::Read(IoArgs::read(64)));
        assert_eq!(read.result, Ok(64));
        assert!(read.data.iter().all(|b| *b == 0));
        assert_eq!(
            bench.call(zero, Operation::Write(IoArgs::write(b"abc".to_vec()))).result,
            Ok(3)
        );
    }

    #[test]
    fn test_zero_read_is_capped_at_pipe_capacity() {
        let bench = TestBench::with_config(ServerConfig {
            pipe_capacity: 128,
            ..ServerConfig::default()
        });

        let read = bench.call(bench.zero_oid(), Operation::Read(IoArgs::read(usize::MAX)));
        assert_eq!(read.result, Ok(128));
        assert_eq!(read.data.len(), 128);
    }

    #[test]
    fn test_devices_always_ready() {
        let bench = TestBench::new();
        let reply = bench.call(bench.null_oid(), Operation::GetAttr { attr: AttrType::PollStatus });
        assert_eq!(reply.value, Some(0b11));
        let reply = bench.call(bench.zero_oid(), Operation::GetAttr { attr: AttrType::Size });
        assert_eq!(reply.value, Some(0));
    }
}
