//! Typed records exchanged with the notification engine.
//!
//! Event sources write arrays of [`Event`] to the event sink; subscribers
//! write arrays of [`Subscription`] to their notification queue and read
//! arrays of [`Event`] back. Both travel JSON-encoded in the plain byte
//! buffers of read/write (see [`MessagePayload`](crate::MessagePayload)).

use core_types::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Number of distinct event types a mask can hold
pub const EVENT_TYPE_COUNT: usize = 16;

/// One event type, an index below [`EVENT_TYPE_COUNT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventType(u8);

impl EventType {
    /// Data can be read without blocking
    pub const DATA_IN: EventType = EventType(0);
    /// Data can be written without blocking
    pub const DATA_OUT: EventType = EventType(1);
    /// The object reports an error condition
    pub const ERROR: EventType = EventType(2);
    /// The peer is gone (hang-up)
    pub const GONE: EventType = EventType(3);

    /// Creates an event type, rejecting indices outside the mask width
    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < EVENT_TYPE_COUNT).then_some(Self(index))
    }

    /// Returns the index of this type
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns the single-bit mask for this type
    pub fn mask(&self) -> EventMask {
        EventMask(1 << self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EventType::DATA_IN => write!(f, "data-in"),
            EventType::DATA_OUT => write!(f, "data-out"),
            EventType::ERROR => write!(f, "error"),
            EventType::GONE => write!(f, "gone"),
            EventType(other) => write!(f, "type-{}", other),
        }
    }
}

/// Set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMask(u16);

impl EventMask {
    /// The empty set
    pub const EMPTY: EventMask = EventMask(0);

    /// Creates a mask from raw bits
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bits
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Returns whether no type is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns whether `event_type` is set
    pub fn contains(&self, event_type: EventType) -> bool {
        self.0 & event_type.mask().0 != 0
    }

    /// Returns whether every type of `other` is set here
    pub fn covers(&self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns whether the masks share a type
    pub fn intersects(&self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Adds a type
    pub fn insert(&mut self, event_type: EventType) {
        self.0 |= event_type.mask().0;
    }

    /// Removes a type
    pub fn remove(&mut self, event_type: EventType) {
        self.0 &= !event_type.mask().0;
    }

    /// Iterates over the types in the mask in index order
    pub fn types(&self) -> impl Iterator<Item = EventType> + '_ {
        (0..EVENT_TYPE_COUNT as u8)
            .map(EventType)
            .filter(move |t| self.contains(*t))
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        EventMask(self.0 & rhs.0)
    }
}

impl Not for EventMask {
    type Output = EventMask;

    fn not(self) -> Self::Output {
        EventMask(!self.0)
    }
}

impl From<EventType> for EventMask {
    fn from(event_type: EventType) -> Self {
        event_type.mask()
    }
}

impl FromIterator<EventType> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        let mut mask = EventMask::EMPTY;
        for event_type in iter {
            mask.insert(event_type);
        }
        mask
    }
}

/// An occurrence reported by an event source, or delivered to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Object the event happened on
    pub oid: ObjectId,
    pub event_type: EventType,
    /// Source-specific flags, OR-ed across coalesced events
    pub flags: u32,
    /// Source-specific count, summed across coalesced events
    pub count: u32,
    /// Source-specific datum, last writer wins
    pub data: u32,
}

impl Event {
    /// Creates an event with zero flags and data
    pub fn new(oid: ObjectId, event_type: EventType, count: u32) -> Self {
        Self {
            oid,
            event_type,
            flags: 0,
            count,
            data: 0,
        }
    }

    /// Same event with flags
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Same event with a datum
    pub fn with_data(mut self, data: u32) -> Self {
        self.data = data;
        self
    }
}

/// Control flags of a subscription
///
/// Flags are applied in the order add, delete, enable, disable, one-shot,
/// dispatch, clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionFlags {
    /// Subscribe to the types (and enable them)
    pub add: bool,
    /// Unsubscribe from the types, dropping anything pending
    pub delete: bool,
    /// Re-arm delivery of the types
    pub enable: bool,
    /// Suspend delivery of the types, keeping the subscription
    pub disable: bool,
    /// Unsubscribe from a type after its first delivery
    pub oneshot: bool,
    /// Disable a type after its first delivery
    pub dispatch: bool,
    /// Drop pending notifications of the types
    pub clear: bool,
}

impl SubscriptionFlags {
    pub fn add() -> Self {
        Self {
            add: true,
            ..Self::default()
        }
    }

    pub fn delete() -> Self {
        Self {
            delete: true,
            ..Self::default()
        }
    }

    pub fn enable() -> Self {
        Self {
            enable: true,
            ..Self::default()
        }
    }

    pub fn disable() -> Self {
        Self {
            disable: true,
            ..Self::default()
        }
    }

    pub fn clear() -> Self {
        Self {
            clear: true,
            ..Self::default()
        }
    }

    pub fn with_oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    pub fn with_dispatch(mut self) -> Self {
        self.dispatch = true;
        self
    }
}

/// Request to change what a queue watches on one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub oid: ObjectId,
    pub types: EventMask,
    pub flags: SubscriptionFlags,
}

impl Subscription {
    pub fn new(oid: ObjectId, types: EventMask, flags: SubscriptionFlags) -> Self {
        Self { oid, types, flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_bounds() {
        assert!(EventType::new(15).is_some());
        assert!(EventType::new(16).is_none());
        assert_eq!(EventType::GONE.index(), 3);
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(format!("{}", EventType::DATA_IN), "data-in");
        assert_eq!(format!("{}", EventType::new(9).unwrap()), "type-9");
    }

    #[test]
    fn test_mask_operations() {
        let mut mask = EventMask::EMPTY;
        assert!(mask.is_empty());

        mask.insert(EventType::DATA_IN);
        mask.insert(EventType::GONE);
        assert!(mask.contains(EventType::DATA_IN));
        assert!(!mask.contains(EventType::DATA_OUT));
        assert_eq!(mask.bits(), 0b1001);

        mask.remove(EventType::DATA_IN);
        assert_eq!(mask, EventType::GONE.mask());
    }

    #[test]
    fn test_mask_set_algebra() {
        let a = EventType::DATA_IN.mask() | EventType::DATA_OUT.mask();
        let b = EventType::DATA_OUT.mask();
        assert!(a.covers(b));
        assert!(!b.covers(a));
        assert!(a.intersects(b));
        assert_eq!(a & !b, EventType::DATA_IN.mask());
    }

    #[test]
    fn test_mask_types_in_order() {
        let mask: EventMask = [EventType::GONE, EventType::DATA_IN].into_iter().collect();
        let types: Vec<EventType> = mask.types().collect();
        assert_eq!(types, vec![EventType::DATA_IN, EventType::GONE]);
    }

    #[test]
    fn test_subscription_flags_builders() {
        let flags = SubscriptionFlags::add().with_oneshot();
        assert!(flags.add);
        assert!(flags.oneshot);
        assert!(!flags.dispatch);
        assert!(SubscriptionFlags::delete().delete);
        assert!(SubscriptionFlags::enable().enable);
        assert!(SubscriptionFlags::disable().disable);
        assert!(SubscriptionFlags::clear().clear);
    }
}
