//! Pipes
//!
//! A pipe moves bytes from writers to readers, either through a fixed ring
//! buffer or, for unbuffered pipes, only by direct hand-off between a
//! writer and a parked reader. Blocked readers, blocked writers and blocked
//! openers wait in three separate FIFO queues.
//!
//! A parked request that moves any bytes is answered with the count it
//! moved; callers retry for the rest.

mod ring;

pub use ring::RingBuffer;

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::ResourceRef;
use crate::request::{complete_all, Completion, Request};
use crate::resource::{
    Attributes, Destroyable, Factory, Handled, Linkable, Openable, Resource, Stream,
};
use ipc::{AttrType, ErrorCode, Event, EventMask, EventType, ObjectType, OpenFlags, Reply};
use services_logger::{LogEntry, Logger};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bytes a write request carries
fn payload(rq: &Request) -> &[u8] {
    rq.io().map(|io| io.data.as_slice()).unwrap_or_default()
}

/// Bytes a read request can take
fn wanted(rq: &Request) -> usize {
    rq.io().map_or(0, |io| io.size)
}

fn nonblocking(rq: &Request) -> bool {
    rq.io().is_some_and(|io| io.mode.is_nonblocking())
}

/// Directions named by open flags; no direction at all means reading
fn direction(flags: OpenFlags) -> (bool, bool) {
    (flags.read || !flags.write, flags.write)
}

struct PipeState {
    /// `None` for unbuffered pipes
    ring: Option<RingBuffer>,
    readers: usize,
    writers: usize,
    links: usize,
    /// Set by every wakeup; a named pipe reports end-of-stream once per mark
    mark: bool,
    blocked_readers: VecDeque<Request>,
    blocked_writers: VecDeque<Request>,
    openers: VecDeque<(Request, OpenFlags)>,
    /// Event types somebody subscribed to
    event_mask: EventMask,
}

impl PipeState {
    fn buffered(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::len)
    }

    fn space(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::space)
    }

    /// Unbuffered pipes are always full
    fn is_full(&self) -> bool {
        self.ring.as_ref().map_or(true, RingBuffer::is_full)
    }

    fn ring_write(&mut self, data: &[u8]) -> usize {
        self.ring.as_mut().map_or(0, |ring| ring.write(data))
    }

    fn ring_read(&mut self, max: usize) -> Vec<u8> {
        self.ring
            .as_mut()
            .map_or_else(Vec::new, |ring| ring.read(max))
    }

    fn is_unused(&self) -> bool {
        self.readers == 0 && self.writers == 0 && self.links == 0
    }

    fn poll_status(&self) -> EventMask {
        let mut status = EventMask::EMPTY;
        if self.buffered() > 0
            || !self.blocked_writers.is_empty()
            || (self.writers == 0 && self.links == 0)
        {
            status.insert(EventType::DATA_IN);
        }
        if (self.space() > 0 || !self.blocked_readers.is_empty())
            && (self.readers > 0 || self.links > 0)
        {
            status.insert(EventType::DATA_OUT);
        }
        if (self.writers == 0 || self.readers == 0) && self.links == 0 {
            status.insert(EventType::GONE);
        }
        status
    }

    fn wake(&mut self, completions: &mut Vec<Completion>, rq: Request, reply: Reply) {
        self.mark = true;
        completions.push((rq, reply));
    }

    fn wake_readers(&mut self, completions: &mut Vec<Completion>, reply: Reply) {
        while let Some(reader) = self.blocked_readers.pop_front() {
            self.wake(completions, reader, reply.clone());
        }
    }

    fn wake_writers(&mut self, completions: &mut Vec<Completion>, reply: Reply) {
        while let Some(writer) = self.blocked_writers.pop_front() {
            self.wake(completions, writer, reply.clone());
        }
    }

    /// Whether an opener with `flags` has somebody on the other end
    fn peer_present(&self, flags: OpenFlags) -> bool {
        match direction(flags) {
            (true, true) => true,
            (_, true) => {
                self.readers > 0 || self.openers.iter().any(|(_, f)| direction(*f).0)
            }
            _ => self.writers > 0 || self.openers.iter().any(|(_, f)| direction(*f).1),
        }
    }

    fn add_opener(&mut self, flags: OpenFlags) {
        let (read, write) = direction(flags);
        if read {
            self.readers += 1;
        }
        if write {
            self.writers += 1;
        }
    }

    /// Answers every parked opener whose peer has now shown up
    fn wake_openers(&mut self, completions: &mut Vec<Completion>) {
        let mut waiting = VecDeque::new();
        while let Some((rq, flags)) = self.openers.pop_front() {
            let present = match direction(flags) {
                (_, true) => self.readers > 0,
                _ => self.writers > 0,
            };
            if present {
                self.add_opener(flags);
                self.wake(completions, rq, Reply::ok(0));
            } else {
                waiting.push_back((rq, flags));
            }
        }
        self.openers = waiting;
    }

    fn event(&self, cx: &ServerContext, this: &ResourceRef, event_type: EventType, count: usize)
        -> Option<Event>
    {
        self.event_mask.contains(event_type).then(|| {
            Event::new(
                cx.oid(this.id()),
                event_type,
                u32::try_from(count).unwrap_or(u32::MAX),
            )
        })
    }
}

/// A unidirectional byte pipe
pub struct Pipe {
    state: Mutex<PipeState>,
}

impl Pipe {
    /// Creates a pipe with a ring of `capacity` bytes, or an unbuffered one
    ///
    /// The initial reader and writer counts follow `open`.
    pub fn new(capacity: Option<usize>, open: OpenFlags) -> Self {
        Self {
            state: Mutex::new(PipeState {
                ring: capacity.map(RingBuffer::new),
                readers: usize::from(open.read),
                writers: usize::from(open.write),
                links: 0,
                mark: false,
                blocked_readers: VecDeque::new(),
                blocked_writers: VecDeque::new(),
                openers: VecDeque::new(),
                event_mask: EventMask::EMPTY,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Readiness as an event mask
    pub fn poll_status(&self) -> EventMask {
        self.lock().poll_status()
    }

    /// Fails every request still parked on the pipe
    pub(crate) fn teardown(&self, log: &Logger) {
        let mut parked: Vec<Request> = Vec::new();
        {
            let mut state = self.lock();
            parked.extend(state.blocked_readers.drain(..));
            parked.extend(state.blocked_writers.drain(..));
            parked.extend(state.openers.drain(..).map(|(rq, _)| rq));
        }

        if !parked.is_empty() {
            log.log(
                LogEntry::debug("pipe torn down with parked requests")
                    .with_field("requests", parked.len()),
            );
        }
        for rq in parked {
            rq.fail(ErrorCode::BrokenPipe);
        }
    }

    fn finish(
        cx: &ServerContext,
        completions: Vec<Completion>,
        events: Option<Event>,
        handled: Handled,
    ) -> Handled {
        complete_all(completions);
        if let Some(event) = events {
            cx.events().register(cx, &[event]);
        }
        handled
    }
}

impl Stream for Pipe {
    fn write(&self, cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled {
        if payload(&rq).is_empty() {
            return Handled::Reply(rq, Reply::ok(0));
        }

        let mut completions = Vec::new();
        let mut state = self.lock();
        if state.readers == 0 && state.links == 0 {
            return Handled::Reply(rq, Reply::error(ErrorCode::BrokenPipe));
        }

        let data = payload(&rq);
        let mut moved = 0;
        while moved < data.len() {
            let Some(reader) = state.blocked_readers.pop_front() else {
                break;
            };
            let count = wanted(&reader).min(data.len() - moved);
            let chunk = data[moved..moved + count].to_vec();
            moved += count;
            state.wake(&mut completions, reader, Reply::data(chunk));
        }
        moved += state.ring_write(&data[moved..]);

        let handled = if moved > 0 {
            Handled::Reply(rq, Reply::ok(moved))
        } else if nonblocking(&rq) {
            Handled::Reply(rq, Reply::error(ErrorCode::WouldBlock))
        } else {
            cx.log().log(
                LogEntry::debug("write parked")
                    .with_field("resource", this.id())
                    .with_field("request", rq.id()),
            );
            state.blocked_writers.push_back(rq);
            Handled::Parked
        };
        let event = state.event(cx, this, EventType::DATA_IN, moved).filter(|_| moved > 0);
        drop(state);

        Self::finish(cx, completions, event, handled)
    }

    fn read(&self, cx: &ServerContext, this: &ResourceRef, rq: Request) -> Handled {
        let size = wanted(&rq);
        if size == 0 {
            return Handled::Reply(rq, Reply::ok(0));
        }

        let mut completions = Vec::new();
        let mut guard = self.lock();
        let state = &mut *guard;

        let was_full = state.is_full();
        let mut out = state.ring_read(size);

        if was_full {
            while out.len() < size {
                let Some(writer) = state.blocked_writers.pop_front() else {
                    break;
                };
                let data = payload(&writer);
                let count = (size - out.len()).min(data.len());
                out.extend_from_slice(&data[..count]);
                state.wake(&mut completions, writer, Reply::ok(count));
            }

            // Refill the ring from whoever is still waiting to write.
            while let Some(writer) = state.blocked_writers.front() {
                let count = match state.ring.as_mut() {
                    Some(ring) => ring.write(payload(writer)),
                    None => 0,
                };
                if count == 0 {
                    break;
                }
                if let Some(writer) = state.blocked_writers.pop_front() {
                    state.wake(&mut completions, writer, Reply::ok(count));
                }
            }
        }

        let moved = out.len();
        let handled = if moved > 0 {
            Handled::Reply(rq, Reply::data(out))
        } else if state.writers == 0 && state.links == 0 {
            Handled::Reply(rq, Reply::eof())
        } else if state.writers == 0 && state.mark {
            state.mark = false;
            Handled::Reply(rq, Reply::eof())
        } else if nonblocking(&rq) {
            Handled::Reply(rq, Reply::error(ErrorCode::WouldBlock))
        } else {
            cx.log().log(
                LogEntry::debug("read parked")
                    .with_field("resource", this.id())
                    .with_field("request", rq.id()),
            );
            state.blocked_readers.push_back(rq);
            Handled::Parked
        };
        let event = state.event(cx, this, EventType::DATA_OUT, moved).filter(|_| moved > 0);
        drop(guard);

        Self::finish(cx, completions, event, handled)
    }
}

impl Openable for Pipe {
    fn open(&self, cx: &ServerContext, this: &ResourceRef, flags: OpenFlags, rq: Request)
        -> Handled
    {
        let mut completions = Vec::new();
        let mut state = self.lock();

        if !state.peer_present(flags) {
            let (_, write) = direction(flags);
            if flags.nonblock && write {
                return Handled::Reply(rq, Reply::error(ErrorCode::NoSuchDevice));
            }
            if !flags.nonblock {
                cx.log().log(
                    LogEntry::debug("open parked")
                        .with_field("resource", this.id())
                        .with_field("request", rq.id()),
                );
                state.openers.push_back((rq, flags));
                return Handled::Parked;
            }
        }

        state.add_opener(flags);
        state.wake_openers(&mut completions);
        drop(state);

        complete_all(completions);
        Handled::Reply(rq, Reply::ok(0))
    }

    fn close(&self, cx: &ServerContext, this: &ResourceRef, flags: OpenFlags, rq: Request)
        -> Handled
    {
        let (read, write) = direction(flags);
        let mut completions = Vec::new();
        let mut state = self.lock();

        if (write && state.writers == 0) || (read && state.readers == 0) {
            return Handled::Reply(rq, Reply::error(ErrorCode::InvalidArgument));
        }

        if write {
            state.writers -= 1;
            if state.writers == 0 && !state.blocked_readers.is_empty() {
                state.wake_readers(&mut completions, Reply::eof());
                // The parked readers received this close's end of stream.
                state.mark = false;
            }
        }
        if read {
            state.readers -= 1;
            if state.readers == 0 && state.links == 0 {
                state.wake_writers(&mut completions, Reply::error(ErrorCode::BrokenPipe));
            }
        }

        let unused = state.is_unused();
        let event = state
            .event(cx, this, EventType::GONE, 1)
            .filter(|_| state.poll_status().contains(EventType::GONE));
        drop(state);

        if unused {
            cx.registry().mark_destroyed(this);
        }
        Self::finish(cx, completions, event, Handled::Reply(rq, Reply::ok(0)))
    }
}

impl Attributes for Pipe {
    fn get_attr(&self, _cx: &ServerContext, _this: &ResourceRef, attr: AttrType)
        -> Result<u64, ServerError>
    {
        let state = self.lock();
        Ok(match attr {
            AttrType::PollStatus => u64::from(state.poll_status().bits()),
            AttrType::EventMask => u64::from(state.event_mask.bits()),
            AttrType::Size => state.buffered() as u64,
        })
    }

    fn set_attr(
        &self,
        _cx: &ServerContext,
        _this: &ResourceRef,
        attr: AttrType,
        value: u64,
    ) -> Result<(), ServerError> {
        match attr {
            AttrType::EventMask => {
                let bits = u16::try_from(value)
                    .map_err(|_| ServerError::InvalidArgument(format!("event mask {value:#x}")))?;
                self.lock().event_mask = EventMask::from_bits(bits);
                Ok(())
            }
            other => Err(ServerError::InvalidArgument(format!(
                "{other:?} is read-only"
            ))),
        }
    }
}

impl Linkable for Pipe {
    fn link(&self, cx: &ServerContext, this: &ResourceRef, path: &str) -> Result<(), ServerError> {
        let mut state = self.lock();
        cx.namespace().link(path, cx.oid(this.id()))?;
        state.links += 1;
        Ok(())
    }

    fn unlink(&self, cx: &ServerContext, this: &ResourceRef, path: &str)
        -> Result<(), ServerError>
    {
        let mut completions = Vec::new();
        let mut state = self.lock();
        if state.links == 0 {
            return Err(ServerError::InvalidArgument(format!("{path} is not linked")));
        }
        // Only names of this pipe may be removed through it.
        if cx.namespace().lookup(path)? != cx.oid(this.id()) {
            return Err(ServerError::InvalidArgument(format!(
                "{path} does not name this pipe"
            )));
        }
        cx.namespace().unlink(path)?;
        state.links -= 1;

        if state.links == 0 {
            if state.writers == 0 {
                state.wake_readers(&mut completions, Reply::eof());
            }
            if state.readers == 0 {
                state.wake_writers(&mut completions, Reply::error(ErrorCode::BrokenPipe));
            }
        }
        let unused = state.is_unused();
        drop(state);

        complete_all(completions);
        if unused {
            cx.registry().mark_destroyed(this);
        }
        Ok(())
    }
}

impl Destroyable for Pipe {
    fn destroy(&self, cx: &ServerContext, this: &ResourceRef) -> Result<(), ServerError> {
        cx.registry().mark_destroyed(this);
        Ok(())
    }
}

/// Creates pipes (`/dev/posix/pipes`)
pub struct PipeFactory;

impl Factory for PipeFactory {
    fn create(&self, cx: &ServerContext, object_type: ObjectType, open: OpenFlags)
        -> Result<ResourceRef, ServerError>
    {
        let capacity = match object_type {
            ObjectType::Pipe => None,
            ObjectType::BufferedPipe => Some(cx.config().pipe_capacity),
            ObjectType::EventQueue => {
                return Err(ServerError::InvalidArgument(
                    "pipe factory cannot create event queues".to_string(),
                ))
            }
        };
        cx.registry()
            .create(|_| Resource::Pipe(Pipe::new(capacity, open)))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::testing::TestBench;
    use ipc::{AttrType, ErrorCode, EventType, IoArgs, ObjectType, OpenFlags, Operation};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn read(size: usize) -> Operation {
        Operation::Read(IoArgs::read(size))
    }

    fn write(data: &[u8]) -> Operation {
        Operation::Write(IoArgs::write(data))
    }

    #[test]
    fn test_bytes_come_out_in_order() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        assert_eq!(bench.call(pipe, write(b"hello ")).result, Ok(6));
        assert_eq!(bench.call(pipe, write(b"world")).result, Ok(5));
        assert_eq!(bench.call(pipe, read(3)).data, b"hel");
        assert_eq!(bench.call(pipe, read(64)).data, b"lo world");
    }

    #[test]
    fn test_direct_handoff_then_ring() {
        let bench = TestBench::with_config(ServerConfig {
            pipe_capacity: 4096,
            ..ServerConfig::default()
        });
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        let reader = bench.submit(pipe, read(100));
        assert!(reader.try_wait().is_none());

        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(bench.call(pipe, write(&data)).result, Ok(4096));

        let handed = reader.wait_timeout(WAIT.into()).unwrap();
        assert_eq!(handed.data, &data[..100]);

        let size = bench.call(pipe, Operation::GetAttr { attr: AttrType::Size });
        assert_eq!(size.value, Some(3996));

        let rest = bench.call(pipe, read(4096));
        assert_eq!(rest.data, &data[100..]);
        assert!(!rest.eof);
    }

    #[test]
    fn test_writer_close_wakes_reader_with_eof() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        let reader = bench.submit(pipe, read(10));
        assert!(reader.try_wait().is_none());

        let closed = bench.call(pipe, Operation::Close { flags: OpenFlags::write_only() });
        assert!(closed.is_ok());

        let reply = reader.wait_timeout(WAIT.into()).unwrap();
        assert_eq!(reply.result, Ok(0));
        assert!(reply.eof);

        // Anonymous: every later read sees the end too.
        assert!(bench.call(pipe, read(10)).eof);
        assert!(bench.call(pipe, read(10)).eof);
    }

    #[test]
    fn test_write_without_readers_is_broken_pipe() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::write_only());
        assert_eq!(
            bench.call(pipe, write(b"x")).result,
            Err(ErrorCode::BrokenPipe)
        );
    }

    #[test]
    fn test_nonblocking_empty_read_would_block() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        let reply = bench.call(pipe, Operation::Read(IoArgs::read(4).nonblocking()));
        assert_eq!(reply.result, Err(ErrorCode::WouldBlock));
    }

    #[test]
    fn test_full_ring_parks_writer_until_read() {
        let bench = TestBench::with_config(ServerConfig {
            pipe_capacity: 4,
            ..ServerConfig::default()
        });
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        assert_eq!(bench.call(pipe, write(b"abcd")).result, Ok(4));
        assert_eq!(
            bench.call(pipe, Operation::Write(IoArgs::write(b"e".to_vec()).nonblocking())).result,
            Err(ErrorCode::WouldBlock)
        );

        let writer = bench.submit(pipe, write(b"efgh"));
        assert!(writer.try_wait().is_none());

        // Reading from the full ring pulls from the parked writer directly.
        assert_eq!(bench.call(pipe, read(6)).data, b"abcdef");
        assert_eq!(writer.wait_timeout(WAIT.into()).unwrap().result, Ok(2));
    }

    #[test]
    fn test_unbuffered_pipe_moves_only_by_handoff() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::Pipe, OpenFlags::read_write());

        let writer = bench.submit(pipe, write(b"ping"));
        assert!(writer.try_wait().is_none());

        assert_eq!(bench.call(pipe, read(2)).data, b"pi");
        assert_eq!(writer.wait_timeout(WAIT.into()).unwrap().result, Ok(2));

        let reader = bench.submit(pipe, read(8));
        assert_eq!(bench.call(pipe, write(b"ng")).result, Ok(2));
        assert_eq!(reader.wait_timeout(WAIT.into()).unwrap().data, b"ng");
    }

    #[test]
    fn test_zero_sized_transfers_complete_at_once() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        assert_eq!(bench.call(pipe, read(0)).result, Ok(0));
        assert_eq!(bench.call(pipe, write(b"")).result, Ok(0));
    }

    #[test]
    fn test_blocking_open_waits_for_peer() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::default());

        assert_eq!(
            bench
                .call(pipe, Operation::Open { flags: OpenFlags::write_only().nonblocking() })
                .result,
            Err(ErrorCode::NoSuchDevice)
        );
        assert!(bench
            .call(pipe, Operation::Open { flags: OpenFlags::read_only().nonblocking() })
            .is_ok());
        bench.call(pipe, Operation::Close { flags: OpenFlags::read_only() });
        // Closing the last reader destroyed the unlinked pipe.
        assert_eq!(
            bench.call(pipe, read(1)).result,
            Err(ErrorCode::NotFound)
        );

        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::default());
        let opener = bench.submit(pipe, Operation::Open { flags: OpenFlags::read_only() });
        assert!(opener.try_wait().is_none());
        assert!(bench.call(pipe, Operation::Open { flags: OpenFlags::write_only() }).is_ok());
        assert!(opener.wait_timeout(WAIT.into()).unwrap().is_ok());

        assert_eq!(bench.call(pipe, write(b"ok")).result, Ok(2));
    }

    #[test]
    fn test_close_of_unopened_direction_is_invalid() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_only());
        assert_eq!(
            bench.call(pipe, Operation::Close { flags: OpenFlags::write_only() }).result,
            Err(ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn test_named_pipe_reports_eof_once_per_writer_close() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        assert!(bench
            .call(pipe, Operation::Link { path: "/tmp/fifo".to_string() })
            .is_ok());

        let reader = bench.submit(pipe, read(4));
        bench.call(pipe, Operation::Close { flags: OpenFlags::write_only() });
        assert!(reader.wait_timeout(WAIT.into()).unwrap().eof);

        // The parked reader took this close's end of stream.
        assert_eq!(
            bench.call(pipe, Operation::Read(IoArgs::read(4).nonblocking())).result,
            Err(ErrorCode::WouldBlock)
        );

        // A new writer generation that hands data off leaves a mark.
        assert!(bench.call(pipe, Operation::Open { flags: OpenFlags::write_only() }).is_ok());
        let reader = bench.submit(pipe, read(4));
        assert_eq!(bench.call(pipe, write(b"ab")).result, Ok(2));
        assert_eq!(reader.wait_timeout(WAIT.into()).unwrap().data, b"ab");
        bench.call(pipe, Operation::Close { flags: OpenFlags::write_only() });

        assert!(bench.call(pipe, read(4)).eof);
        assert_eq!(
            bench.call(pipe, Operation::Read(IoArgs::read(4).nonblocking())).result,
            Err(ErrorCode::WouldBlock)
        );
    }

    #[test]
    fn test_unlink_refuses_names_of_other_objects() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::default());
        assert!(bench
            .call(pipe, Operation::Link { path: "/tmp/fifo".to_string() })
            .is_ok());

        let reply = bench.call(pipe, Operation::Unlink { path: "/dev/null".to_string() });
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
        assert_eq!(bench.lookup("/dev/null"), bench.null_oid());

        let reply = bench.call(pipe, Operation::Unlink { path: "/tmp/missing".to_string() });
        assert_eq!(reply.result, Err(ErrorCode::NotFound));

        // The pipe's own name is still removable and the pipe still alive until then.
        assert!(bench.call(pipe, Operation::GetAttr { attr: AttrType::Size }).is_ok());
        assert!(bench
            .call(pipe, Operation::Unlink { path: "/tmp/fifo".to_string() })
            .is_ok());
        assert!(bench.cx().namespace().lookup("/tmp/fifo").is_err());
    }

    #[test]
    fn test_failed_link_counts_nothing() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        let reply = bench.call(pipe, Operation::Link { path: "/dev/null".to_string() });
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
        assert_eq!(bench.lookup("/dev/null"), bench.null_oid());

        // Without a link, closing both ends destroys the pipe.
        assert!(bench.call(pipe, Operation::Close { flags: OpenFlags::read_write() }).is_ok());
        assert_eq!(
            bench.call(pipe, Operation::GetAttr { attr: AttrType::Size }).result,
            Err(ErrorCode::NotFound)
        );
    }

    #[test]
    fn test_parked_readers_served_in_arrival_order() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());

        let first = bench.submit(pipe, read(2));
        let second = bench.submit(pipe, read(3));
        let third = bench.submit(pipe, read(4));
        assert!(third.try_wait().is_none());

        assert_eq!(bench.call(pipe, write(b"abcdefghi")).result, Ok(9));
        assert_eq!(first.wait_timeout(WAIT.into()).unwrap().data, b"ab");
        assert_eq!(second.wait_timeout(WAIT.into()).unwrap().data, b"cde");
        assert_eq!(third.wait_timeout(WAIT.into()).unwrap().data, b"fghi");
    }

    #[test]
    fn test_parked_writers_drained_in_arrival_order() {
        let bench = TestBench::with_config(ServerConfig {
            pipe_capacity: 4,
            ..ServerConfig::default()
        });
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        assert_eq!(bench.call(pipe, write(b"abcd")).result, Ok(4));

        let writers: Vec<_> = [&b"ef"[..], b"gh", b"ij"]
            .iter()
            .map(|data| bench.submit(pipe, write(data)))
            .collect();
        assert!(writers.iter().all(|writer| writer.try_wait().is_none()));

        assert_eq!(bench.call(pipe, read(10)).data, b"abcdefghij");
        for writer in &writers {
            assert_eq!(writer.wait_timeout(WAIT.into()).unwrap().result, Ok(2));
        }
    }

    #[test]
    fn test_unlink_of_unused_pipe_destroys_it() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::default());
        let path = "/tmp/unused".to_string();

        assert!(bench.call(pipe, Operation::Link { path: path.clone() }).is_ok());
        assert_eq!(bench.cx().namespace().lookup(&path).unwrap(), pipe);
        assert!(bench.call(pipe, Operation::Unlink { path: path.clone() }).is_ok());
        assert!(bench.cx().namespace().lookup(&path).is_err());
        assert_eq!(
            bench.call(pipe, Operation::Unlink { path }).result,
            Err(ErrorCode::NotFound)
        );
    }

    #[test]
    fn test_destroy_fails_parked_requests() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        let reader = bench.submit(pipe, read(4));

        assert!(bench.call(pipe, Operation::Destroy).is_ok());
        assert_eq!(
            reader.wait_timeout(WAIT.into()).unwrap().result,
            Err(ErrorCode::BrokenPipe)
        );
    }

    #[test]
    fn test_poll_status_follows_state() {
        let bench = TestBench::new();
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        let status = |bench: &TestBench| {
            let reply = bench.call(pipe, Operation::GetAttr { attr: AttrType::PollStatus });
            ipc::EventMask::from_bits(reply.value.unwrap() as u16)
        };

        assert_eq!(status(&bench), EventType::DATA_OUT.mask());
        bench.call(pipe, write(b"x"));
        assert_eq!(
            status(&bench),
            EventType::DATA_IN.mask() | EventType::DATA_OUT.mask()
        );
        bench.call(pipe, Operation::Close { flags: OpenFlags::read_only() });
        assert!(status(&bench).contains(EventType::GONE));
    }

    #[test]
    fn test_factory_rejects_event_queue() {
        let bench = TestBench::new();
        let reply = bench.call(
            bench.pipes_oid(),
            Operation::Create {
                object_type: ObjectType::EventQueue,
                open: OpenFlags::read_write(),
            },
        );
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
    }
}
