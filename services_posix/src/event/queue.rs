//! Notification queues

use super::interest::{InterestRecord, RecordState, Update};
use super::{notify_owner, poll_owner};
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::ResourceRef;
use crate::request::{complete_all, Request, RequestId};
use crate::resource::{Handled, Openable, Resource, Stream};
use crate::timer::Deadline;
use core_types::ResourceId;
use ipc::{ErrorCode, Event, MessagePayload, OpenFlags, Reply, Subscription, WaitMode};
use kernel_api::Duration;
use services_logger::{LogEntry, Logger};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Locks `record`, applies `f` and tells the owner about any mask change
/// before unlocking
fn apply<F>(cx: &ServerContext, record: &InterestRecord, f: F) -> Update
where
    F: FnOnce(&mut RecordState) -> Update,
{
    let mut state = record.lock();
    let update = f(&mut state);
    if let Some(mask) = update.notify {
        notify_owner(cx, record.oid(), mask);
    }
    update
}

fn events_reply(events: &[Event]) -> Reply {
    match MessagePayload::new(&events) {
        Ok(payload) => Reply::ok(events.len()).with_data(payload.into_bytes()),
        Err(_) => Reply::error(ErrorCode::InvalidArgument),
    }
}

/// Whether a request that found nothing should wait
fn waits(wait: WaitMode) -> bool {
    match wait {
        WaitMode::NoWait => false,
        WaitMode::Forever => true,
        WaitMode::Timeout { millis } => millis > 0,
    }
}

#[derive(Default)]
struct QueueState {
    /// Records this queue has a watch on, in subscription order
    records: Vec<Arc<InterestRecord>>,
    /// Readers waiting for events, oldest first
    parked: VecDeque<Request>,
    closed: bool,
}

/// A subscriber's notification queue
pub struct EventQueue {
    id: ResourceId,
    state: Mutex<QueueState>,
}

impl EventQueue {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of objects this queue watches
    pub fn watch_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Number of readers waiting for events
    pub fn parked(&self) -> usize {
        self.lock().parked.len()
    }

    fn forget(&self, cx: &ServerContext, state: &mut QueueState, record: &Arc<InterestRecord>) {
        state.records.retain(|kept| !Arc::ptr_eq(kept, record));
        cx.events().prune(record);
    }

    fn subscribe(&self, cx: &ServerContext, state: &mut QueueState, subs: &[Subscription]) {
        for sub in subs {
            let known = state
                .records
                .iter()
                .find(|record| record.oid() == sub.oid)
                .cloned();

            let (record, update) = match known {
                Some(record) => {
                    let update = apply(cx, &record, |rs| {
                        rs.subscribe(self.id, sub.types, &sub.flags)
                    });
                    (record, update)
                }
                None => loop {
                    let record = cx.events().record_or_insert(sub.oid);
                    let mut rs = record.lock();
                    if rs.is_retired() {
                        continue;
                    }
                    let update = rs.subscribe(self.id, sub.types, &sub.flags);
                    if let Some(mask) = update.notify {
                        notify_owner(cx, record.oid(), mask);
                    }
                    drop(rs);
                    state.records.push(record.clone());
                    break (record, update);
                },
            };

            if update.removed {
                self.forget(cx, state, &record);
            }
        }
    }

    /// Level-triggered readiness of every watched object
    fn poll(&self, cx: &ServerContext, state: &QueueState) {
        for record in &state.records {
            let status = poll_owner(cx, record.oid());
            if !status.is_empty() {
                record.lock().poll(self.id, status);
            }
        }
    }

    fn drain(&self, cx: &ServerContext, state: &mut QueueState, max: usize) -> Vec<Event> {
        let mut out = Vec::new();
        let mut emptied = Vec::new();
        for record in &state.records {
            if out.len() >= max {
                break;
            }
            let update = apply(cx, record, |rs| rs.drain(self.id, record.oid(), max, &mut out));
            if update.removed {
                emptied.push(record.clone());
            }
        }
        for record in emptied {
            self.forget(cx, state, &record);
        }
        out
    }

    fn transfer(&self, cx: &ServerContext, rq: Request) -> Handled {
        let (max, wait) = match rq.io() {
            Some(io) => (io.size, io.wait),
            None => return Handled::Reply(rq, Reply::error(ErrorCode::InvalidArgument)),
        };
        let subs: Vec<Subscription> = match rq.io().filter(|io| !io.data.is_empty()) {
            None => Vec::new(),
            Some(io) => match serde_json::from_slice(&io.data) {
                Ok(subs) => subs,
                Err(err) => {
                    cx.log().log(
                        LogEntry::warn("malformed subscriptions")
                            .with_field("resource", self.id)
                            .with_field("error", err),
                    );
                    return Handled::Reply(rq, Reply::error(ErrorCode::InvalidArgument));
                }
            },
        };

        let mut state = self.lock();
        if state.closed {
            return Handled::Reply(rq, Reply::error(ErrorCode::BadDescriptor));
        }

        self.subscribe(cx, &mut state, &subs);
        let events = if max > 0 {
            self.poll(cx, &state);
            self.drain(cx, &mut state, max)
        } else {
            Vec::new()
        };

        if events.is_empty() && max > 0 && waits(wait) {
            if let WaitMode::Timeout { millis } = wait {
                cx.timer().schedule(Deadline {
                    at: cx.kernel().now() + Duration::from_millis(millis),
                    resource: self.id,
                    request: rq.id(),
                });
            }
            cx.log().log(
                LogEntry::debug("queue read parked")
                    .with_field("resource", self.id)
                    .with_field("request", rq.id()),
            );
            state.parked.push_back(rq);
            return Handled::Parked;
        }
        drop(state);

        Handled::Reply(rq, events_reply(&events))
    }

    /// Hands newly pending events to parked readers, oldest first
    pub(crate) fn wakeup(&self, cx: &ServerContext) {
        let mut completions = Vec::new();
        {
            let mut state = self.lock();
            let mut waiting = VecDeque::new();
            while let Some(rq) = state.parked.pop_front() {
                let max = rq.io().map_or(0, |io| io.size);
                let events = self.drain(cx, &mut state, max);
                if events.is_empty() {
                    waiting.push_back(rq);
                } else {
                    completions.push((rq, events_reply(&events)));
                }
            }
            state.parked = waiting;
        }
        complete_all(completions);
    }

    /// Times out a parked reader, if it is still waiting
    pub(crate) fn expire(&self, cx: &ServerContext, request: RequestId) {
        let expired = {
            let mut state = self.lock();
            let position = state.parked.iter().position(|rq| rq.id() == request);
            position.and_then(|position| state.parked.remove(position))
        };

        if let Some(rq) = expired {
            cx.log().log(
                LogEntry::debug("queue wait timed out")
                    .with_field("resource", self.id)
                    .with_field("request", request),
            );
            rq.fail(ErrorCode::Timeout);
        }
    }

    pub(crate) fn teardown(&self, log: &Logger) {
        let parked: Vec<Request> = {
            let mut state = self.lock();
            if !state.records.is_empty() || !state.parked.is_empty() {
                log.log(
                    LogEntry::error("destroying busy queue")
                        .with_field("resource", self.id)
                        .with_field("watches", state.records.len())
                        .with_field("parked", state.parked.len()),
                );
            }
            state.records.clear();
            state.parked.drain(..).collect()
        };

        for rq in parked {
            rq.fail(ErrorCode::BrokenPipe);
        }
    }
}

impl Stream for EventQueue {
    fn read(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        self.transfer(cx, rq)
    }

    fn write(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        self.transfer(cx, rq)
    }
}

impl Openable for EventQueue {
    fn open(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }

    /// Wakes parked readers with `BadDescriptor`, drops every watch and
    /// destroys the queue
    fn close(&self, cx: &ServerContext, this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        let parked: Vec<Request> = {
            let mut state = self.lock();
            state.closed = true;
            let records = std::mem::take(&mut state.records);
            for record in &records {
                apply(cx, record, |rs| rs.unsubscribe(self.id));
                cx.events().prune(record);
            }
            state.parked.drain(..).collect()
        };

        for parked in parked {
            parked.fail(ErrorCode::BadDescriptor);
        }
        cx.registry().mark_destroyed(this);
        Handled::Reply(rq, Reply::ok(0))
    }
}

/// Creates a notification queue
pub(crate) fn create_queue(cx: &ServerContext) -> Result<ResourceRef, ServerError> {
    cx.registry()
        .create(|id| Resource::EventQueue(EventQueue::new(id)))
}

/// Hands out a new queue on every open (`/dev/event/queue`)
pub struct QueueFactory;

impl Openable for QueueFactory {
    fn open(&self, cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        let created = create_queue(cx).map(|queue| Reply::object(cx.oid(queue.id())));
        Handled::result(rq, created)
    }

    fn close(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::TestBench;
    use crate::timer;
    use core_types::{ObjectId, PortId, ResourceId};
    use ipc::{
        ErrorCode, Event, EventMask, EventType, IoArgs, MessagePayload, ObjectType, OpenFlags,
        Operation, Reply, Subscription, SubscriptionFlags, WaitMode,
    };
    use kernel_api::Instant;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn elsewhere() -> ObjectId {
        ObjectId::new(PortId::new(), ResourceId::new(3, 0))
    }

    fn new_queue(bench: &TestBench) -> ObjectId {
        let reply = bench.call(
            bench.queue_factory_oid(),
            Operation::Open {
                flags: OpenFlags::read_write(),
            },
        );
        reply.object.unwrap()
    }

    fn subscribe(
        bench: &TestBench,
        queue: ObjectId,
        oid: ObjectId,
        types: EventMask,
        flags: SubscriptionFlags,
    ) {
        let subs = vec![Subscription::new(oid, types, flags)];
        let data = MessagePayload::new(&subs).unwrap().into_bytes();
        let reply = bench.call(queue, Operation::Write(IoArgs::write(data)));
        assert_eq!(reply.result, Ok(0));
    }

    fn post(bench: &TestBench, events: &[Event]) {
        let data = MessagePayload::new(&events).unwrap().into_bytes();
        let reply = bench.call(bench.sink_oid(), Operation::Write(IoArgs::write(data)));
        assert_eq!(reply.result, Ok(events.len()));
    }

    fn wait_op(max: usize, wait: WaitMode) -> Operation {
        Operation::Read(IoArgs::read(max).with_wait(wait))
    }

    fn events(reply: &Reply) -> Vec<Event> {
        MessagePayload::from_bytes(reply.data.clone())
            .deserialize()
            .unwrap()
    }

    #[test]
    fn test_oneshot_delivers_once_and_drops_watch() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let target = elsewhere();

        subscribe(
            &bench,
            queue,
            target,
            EventType::DATA_IN.mask(),
            SubscriptionFlags::add().with_oneshot(),
        );
        assert!(bench.cx().events().record(&target).is_some());

        post(&bench, &[Event::new(target, EventType::DATA_IN, 1)]);
        let reply = bench.call(queue, wait_op(8, WaitMode::NoWait));
        assert_eq!(reply.result, Ok(1));
        assert_eq!(events(&reply)[0].oid, target);

        // The watch is gone but the queue is still usable.
        assert!(bench.cx().events().record(&target).is_none());
        post(&bench, &[Event::new(target, EventType::DATA_IN, 1)]);
        assert_eq!(bench.call(queue, wait_op(8, WaitMode::NoWait)).result, Ok(0));
    }

    #[test]
    fn test_coalesced_events_arrive_as_one() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let target = elsewhere();
        subscribe(&bench, queue, target, EventType::ERROR.mask(), SubscriptionFlags::add());

        post(
            &bench,
            &[
                Event::new(target, EventType::ERROR, 1).with_flags(0x1),
                Event::new(target, EventType::ERROR, 2).with_flags(0x4),
                Event::new(target, EventType::ERROR, 3).with_flags(0x1),
            ],
        );

        let delivered = events(&bench.call(queue, wait_op(8, WaitMode::NoWait)));
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].count, 6);
        assert_eq!(delivered[0].flags, 0x5);
    }

    #[test]
    fn test_parked_reader_woken_by_sink() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let target = elsewhere();
        subscribe(&bench, queue, target, EventType::GONE.mask(), SubscriptionFlags::add());

        let reader = bench.submit(queue, wait_op(4, WaitMode::Forever));
        assert!(reader.try_wait().is_none());

        post(&bench, &[Event::new(target, EventType::GONE, 1)]);
        let reply = reader.wait_timeout(WAIT.into()).unwrap();
        assert_eq!(reply.result, Ok(1));
        assert_eq!(events(&reply)[0].event_type, EventType::GONE);
    }

    #[test]
    fn test_zero_timeout_does_not_wait() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let reply = bench.call(queue, wait_op(4, WaitMode::Timeout { millis: 0 }));
        assert_eq!(reply.result, Ok(0));
    }

    #[test]
    fn test_timeout_expiry_replies_timeout() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let reader = bench.submit(queue, wait_op(4, WaitMode::Timeout { millis: 10 }));
        assert!(reader.try_wait().is_none());
        assert_eq!(bench.cx().timer().len(), 1);

        for deadline in bench.cx().timer().take_expired(Instant::from_nanos(u64::MAX)) {
            timer::fire(bench.cx(), deadline);
        }
        assert_eq!(
            reader.wait_timeout(WAIT.into()).unwrap().result,
            Err(ErrorCode::Timeout)
        );
    }

    #[test]
    fn test_close_wakes_parked_with_bad_descriptor() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let target = elsewhere();
        subscribe(&bench, queue, target, EventType::DATA_IN.mask(), SubscriptionFlags::add());
        let reader = bench.submit(queue, wait_op(4, WaitMode::Forever));

        let closed = bench.call(queue, Operation::Close { flags: OpenFlags::read_write() });
        assert!(closed.is_ok());
        assert_eq!(
            reader.wait_timeout(WAIT.into()).unwrap().result,
            Err(ErrorCode::BadDescriptor)
        );
        assert!(bench.cx().events().is_empty());
        assert_eq!(
            bench.call(queue, wait_op(4, WaitMode::NoWait)).result,
            Err(ErrorCode::NotFound)
        );
        assert!(!bench.log().has_message("destroying busy queue"));
    }

    #[test]
    fn test_level_poll_reports_pipe_readiness() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        subscribe(&bench, queue, pipe, EventType::DATA_IN.mask(), SubscriptionFlags::add());

        assert_eq!(bench.call(queue, wait_op(4, WaitMode::NoWait)).result, Ok(0));
        bench.call(pipe, Operation::Write(IoArgs::write(b"abc".to_vec())));

        let delivered = events(&bench.call(queue, wait_op(4, WaitMode::NoWait)));
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].oid, pipe);
        assert_eq!(delivered[0].event_type, EventType::DATA_IN);
    }

    #[test]
    fn test_pipe_write_wakes_parked_queue_reader() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let pipe = bench.create_pipe(ObjectType::BufferedPipe, OpenFlags::read_write());
        subscribe(&bench, queue, pipe, EventType::DATA_IN.mask(), SubscriptionFlags::add());

        let reader = bench.submit(queue, wait_op(4, WaitMode::Forever));
        assert!(reader.try_wait().is_none());

        bench.call(pipe, Operation::Write(IoArgs::write(b"hello".to_vec())));
        let delivered = events(&reader.wait_timeout(WAIT.into()).unwrap());
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].count, 5);
    }

    #[test]
    fn test_malformed_subscriptions_rejected() {
        let bench = TestBench::new();
        let queue = new_queue(&bench);
        let reply = bench.call(queue, Operation::Write(IoArgs::write(b"not json".to_vec())));
        assert_eq!(reply.result, Err(ErrorCode::InvalidArgument));
    }
}
