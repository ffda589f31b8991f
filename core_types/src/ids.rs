//! Identifiers for ports, resources and the objects they form together

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a message port
///
/// A port is the address of a server. Every resource a server hands out is
/// reachable as (port, resource id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(Uuid);

impl PortId {
    /// Creates a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a port ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

/// Generation-checked resource identifier
///
/// `index` is the small integer handed out by [`IdAllocator`] and is reused
/// as soon as it is freed. `generation` is bumped on every reuse, so an id
/// kept past the death of its resource never resolves to the next tenant of
/// the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

impl ResourceId {
    /// Creates a resource id from its parts
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot index
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation of the slot at creation time
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Globally addressable object: the owning port plus the resource id on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub port: PortId,
    pub id: ResourceId,
}

impl ObjectId {
    /// Creates an object id
    pub const fn new(port: PortId, id: ResourceId) -> Self {
        Self { port, id }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.port, self.id)
    }
}

/// Smallest-free-integer allocator
///
/// Freed integers go into an ordered set, so `allocate` always returns the
/// smallest integer not currently in use. All operations are O(log n).
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    /// Freed integers below `next`
    free: BTreeSet<u32>,
    /// First integer never handed out
    next: u32,
    /// Number of integers currently in use
    in_use: usize,
}

impl IdAllocator {
    /// Creates an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the smallest free integer, or `None` once `limit` are in use
    pub fn allocate(&mut self, limit: usize) -> Option<u32> {
        if self.in_use >= limit {
            return None;
        }

        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next = self.next.checked_add(1)?;
                id
            }
        };

        self.in_use += 1;
        Some(id)
    }

    /// Returns whether `id` is currently allocated
    pub fn contains(&self, id: u32) -> bool {
        id < self.next && !self.free.contains(&id)
    }

    /// Returns `id` to the pool. Returns false if it was not allocated.
    pub fn remove(&mut self, id: u32) -> bool {
        if !self.contains(id) {
            return false;
        }

        self.in_use -= 1;

        // Keep `next` tight so the free set only holds holes.
        if id + 1 == self.next {
            self.next = id;
            while let Some(&last) = self.free.last() {
                if last + 1 != self.next {
                    break;
                }
                self.free.pop_last();
                self.next = last;
            }
        } else {
            self.free.insert(id);
        }
        true
    }

    /// Returns the number of integers in use
    pub fn len(&self) -> usize {
        self.in_use
    }

    /// Returns whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }
}
