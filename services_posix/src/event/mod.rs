//! Notification engine
//!
//! Event sources report [`Event`]s; notification queues subscribe to
//! objects and read back what happened to them.
//!
//! ## Structure
//!
//! - [`InterestRecord`]: every watch on one object, keyed by object id
//! - [`EventQueue`]: a subscriber's queue, holding the records it watches
//! - [`EventSink`]: endpoint through which anyone can report events
//!
//! Lock order is queue, then record, then the watched object's owner. The
//! engine's map lock is only held to find, insert or retire a record.

mod interest;
mod queue;
mod sink;

pub use interest::InterestRecord;
pub use queue::{EventQueue, QueueFactory};
pub use sink::EventSink;

use crate::context::ServerContext;
use crate::resource::Resource;
use core_types::{ObjectId, ResourceId};
use ipc::{AttrType, Event, EventMask, Message, Operation};
use services_logger::LogEntry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Interest records of every watched object
#[derive(Default)]
pub struct EventEngine {
    records: Mutex<HashMap<ObjectId, Arc<InterestRecord>>>,
}

impl EventEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectId, Arc<InterestRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the record of `oid`, if anybody watches it
    pub fn record(&self, oid: &ObjectId) -> Option<Arc<InterestRecord>> {
        self.lock().get(oid).cloned()
    }

    /// Number of watched objects
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn record_or_insert(&self, oid: ObjectId) -> Arc<InterestRecord> {
        self.lock()
            .entry(oid)
            .or_insert_with(|| Arc::new(InterestRecord::new(oid)))
            .clone()
    }

    /// Forgets a record nobody watches any more
    ///
    /// A retired record is never handed out again; subscribers holding it
    /// look the object up afresh.
    pub(crate) fn prune(&self, record: &Arc<InterestRecord>) {
        let mut records = self.lock();
        let mut state = record.lock();
        if state.has_watches() || state.is_retired() {
            return;
        }
        state.retire();
        if records
            .get(&record.oid())
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            records.remove(&record.oid());
        }
    }

    /// Delivers events to every interested watch and wakes their queues
    pub fn register(&self, cx: &ServerContext, events: &[Event]) {
        let mut wake: BTreeSet<ResourceId> = BTreeSet::new();
        for event in events {
            if let Some(record) = self.record(&event.oid) {
                record.lock().register(event, &mut wake);
            }
        }

        for queue in wake {
            let Ok(handle) = cx.registry().acquire(queue) else {
                continue;
            };
            if let Resource::EventQueue(queue) = handle.resource() {
                queue.wakeup(cx);
            }
        }
    }
}

/// Tells the owner of `oid` which event types have subscribers
pub(crate) fn notify_owner(cx: &ServerContext, oid: ObjectId, mask: EventMask) {
    let value = u64::from(mask.bits());
    let result = if cx.is_local(&oid) {
        cx.registry().acquire(oid.id).and_then(|this| {
            match this.resource().as_attributes() {
                Some(attrs) => attrs.set_attr(cx, &this, AttrType::EventMask, value),
                None => Ok(()),
            }
        })
    } else {
        let message = Message::new(
            oid,
            Operation::SetAttr {
                attr: AttrType::EventMask,
                value,
            },
        );
        cx.kernel().send(message).map(|_| ()).map_err(Into::into)
    };

    if let Err(err) = result {
        cx.log().log(
            LogEntry::debug("event mask not delivered")
                .with_field("object", oid)
                .with_field("error", err),
        );
    }
}

/// Asks the owner of `oid` for its current readiness
///
/// Objects that cannot answer report nothing.
pub(crate) fn poll_owner(cx: &ServerContext, oid: ObjectId) -> EventMask {
    let value = if cx.is_local(&oid) {
        cx.registry().acquire(oid.id).ok().and_then(|this| {
            this.resource()
                .as_attributes()
                .and_then(|attrs| attrs.get_attr(cx, &this, AttrType::PollStatus).ok())
        })
    } else {
        cx.kernel()
            .send(Message::new(
                oid,
                Operation::GetAttr {
                    attr: AttrType::PollStatus,
                },
            ))
            .ok()
            .and_then(|reply| reply.value)
    };

    value
        .and_then(|value| u16::try_from(value).ok())
        .map_or(EventMask::EMPTY, EventMask::from_bits)
}
