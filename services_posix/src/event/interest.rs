//! Interest records and watches
//!
//! An [`InterestRecord`] gathers every [`Watch`] on one watched object and
//! keeps the union of their masks. Changes to that union are what the
//! object's owner gets told about. Everything here runs under the record's
//! own lock; callers turn the returned mask changes into owner
//! notifications.

use core_types::{ObjectId, ResourceId};
use ipc::{Event, EventMask, SubscriptionFlags, EVENT_TYPE_COUNT};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Payload of a pending notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    flags: u32,
    count: u32,
    data: u32,
}

/// One queue's interest in one object
#[derive(Debug)]
pub(crate) struct Watch {
    queue: ResourceId,
    mask: EventMask,
    enabled: EventMask,
    oneshot: EventMask,
    dispatch: EventMask,
    pend: EventMask,
    pending: [Pending; EVENT_TYPE_COUNT],
}

impl Watch {
    fn new(queue: ResourceId) -> Self {
        Self {
            queue,
            mask: EventMask::EMPTY,
            enabled: EventMask::EMPTY,
            oneshot: EventMask::EMPTY,
            dispatch: EventMask::EMPTY,
            pend: EventMask::EMPTY,
            pending: [Pending::default(); EVENT_TYPE_COUNT],
        }
    }

    /// Applies control flags in the order add, delete, enable, disable,
    /// one-shot, dispatch, clear
    fn merge(&mut self, types: EventMask, flags: &SubscriptionFlags) {
        if flags.add {
            self.mask |= types;
            self.enabled |= types;
        }
        if flags.delete {
            self.pend = self.pend & !types;
            self.mask = self.mask & !types;
            self.enabled = self.enabled & !types;
            self.oneshot = self.oneshot & !types;
            self.dispatch = self.dispatch & !types;
        }
        if flags.enable {
            self.enabled |= types;
        }
        if flags.disable {
            self.enabled = self.enabled & !types;
        }
        if flags.oneshot {
            self.oneshot |= types;
        }
        if flags.dispatch {
            self.dispatch |= types;
        }
        if flags.clear {
            self.pend = self.pend & !types;
        }
    }

    fn deliverable(&self) -> EventMask {
        self.pend & self.mask & self.enabled
    }

    /// Merges an event into the pending slot of its type
    ///
    /// Returns true if the type was not pending before.
    fn note(&mut self, event: &Event) -> bool {
        let slot = &mut self.pending[event.event_type.index()];
        let fresh = !self.pend.contains(event.event_type);
        if fresh {
            self.pend.insert(event.event_type);
            slot.flags = event.flags;
            slot.count = event.count;
        } else {
            slot.flags |= event.flags;
            slot.count = slot.count.saturating_add(event.count);
        }
        slot.data = event.data;
        fresh
    }
}

/// Mutable part of an [`InterestRecord`]
#[derive(Debug, Default)]
pub(crate) struct RecordState {
    /// Union of the watch masks, as last told to the owner
    mask: EventMask,
    watches: Vec<Watch>,
    /// Set once the record left the engine's map
    retired: bool,
}

/// What a queue update did to a record
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Update {
    /// New aggregate mask the owner must be told about
    pub notify: Option<EventMask>,
    /// The queue's watch is gone
    pub removed: bool,
}

impl RecordState {
    pub(crate) fn mask(&self) -> EventMask {
        self.mask
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    pub(crate) fn has_watches(&self) -> bool {
        !self.watches.is_empty()
    }

    fn position(&self, queue: ResourceId) -> Option<usize> {
        self.watches.iter().position(|watch| watch.queue == queue)
    }

    /// Recomputes the union of the watch masks, returning it if it changed
    fn recalculate(&mut self) -> Option<EventMask> {
        let mask = self
            .watches
            .iter()
            .fold(EventMask::EMPTY, |mask, watch| mask | watch.mask);
        let changed = mask != self.mask;
        self.mask = mask;
        changed.then_some(mask)
    }

    /// Drops the watch at `index` if its mask went empty
    fn prune_watch(&mut self, index: usize, update: &mut Update) {
        if self.watches[index].mask.is_empty() {
            self.watches.remove(index);
            update.removed = true;
        }
    }

    /// Applies one subscription of `queue`, creating its watch if needed
    pub(crate) fn subscribe(
        &mut self,
        queue: ResourceId,
        types: EventMask,
        flags: &SubscriptionFlags,
    ) -> Update {
        let index = match self.position(queue) {
            Some(index) => index,
            None => {
                self.watches.push(Watch::new(queue));
                self.watches.len() - 1
            }
        };

        let mut update = Update::default();
        let watch = &mut self.watches[index];
        let before = watch.mask;
        watch.merge(types, flags);
        let after = watch.mask;

        if after != before {
            if before.intersects(!after) {
                // Bits were cleared; only the full union can tell.
                update.notify = self.recalculate();
            } else if !self.mask.covers(after) {
                self.mask |= after;
                update.notify = Some(self.mask);
            }
        }

        self.prune_watch(index, &mut update);
        update
    }

    /// Removes the watch of `queue` altogether
    pub(crate) fn unsubscribe(&mut self, queue: ResourceId) -> Update {
        let mut update = Update::default();
        if let Some(index) = self.position(queue) {
            self.watches.remove(index);
            update.removed = true;
            update.notify = self.recalculate();
        }
        update
    }

    /// Records an event on every interested watch, collecting the queues
    /// that went from nothing pending to something pending
    pub(crate) fn register(&mut self, event: &Event, wake: &mut BTreeSet<ResourceId>) {
        if !self.mask.contains(event.event_type) {
            return;
        }
        for watch in &mut self.watches {
            if watch.mask.contains(event.event_type) && watch.note(event) {
                wake.insert(watch.queue);
            }
        }
    }

    /// Marks the types of `status` the watch of `queue` subscribed to as pending
    pub(crate) fn poll(&mut self, queue: ResourceId, status: EventMask) {
        if let Some(index) = self.position(queue) {
            let watch = &mut self.watches[index];
            watch.pend |= status & watch.mask;
        }
    }

    /// Moves up to `max - out.len()` deliverable notifications of `queue` into `out`
    pub(crate) fn drain(
        &mut self,
        queue: ResourceId,
        oid: ObjectId,
        max: usize,
        out: &mut Vec<Event>,
    ) -> Update {
        let mut update = Update::default();
        let Some(index) = self.position(queue) else {
            return update;
        };

        let watch = &mut self.watches[index];
        let mut oneshot_fired = false;
        for event_type in watch.deliverable().types() {
            if out.len() >= max {
                break;
            }
            let slot = std::mem::take(&mut watch.pending[event_type.index()]);
            out.push(Event {
                oid,
                event_type,
                flags: slot.flags,
                count: slot.count,
                data: slot.data,
            });

            if watch.oneshot.contains(event_type) {
                watch.mask.remove(event_type);
                oneshot_fired = true;
            }
            if watch.dispatch.contains(event_type) {
                watch.enabled.remove(event_type);
            }
            watch.pend.remove(event_type);
        }

        if oneshot_fired {
            update.notify = self.recalculate();
        }
        self.prune_watch(index, &mut update);
        update
    }

    #[cfg(test)]
    fn watch(&self, queue: ResourceId) -> Option<&Watch> {
        self.position(queue).map(|index| &self.watches[index])
    }
}

/// Every watch on one object
#[derive(Debug)]
pub struct InterestRecord {
    oid: ObjectId,
    state: Mutex<RecordState>,
}

impl InterestRecord {
    pub(crate) fn new(oid: ObjectId) -> Self {
        Self {
            oid,
            state: Mutex::new(RecordState::default()),
        }
    }

    /// The watched object
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Union of every watch mask
    pub fn mask(&self) -> EventMask {
        self.lock().mask
    }
}
