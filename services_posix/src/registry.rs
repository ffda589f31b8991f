//! Resource registry
//!
//! Maps generation-checked [`ResourceId`]s to live [`Resource`]s and owns
//! their reference counts.
//!
//! Every live resource carries one implicit reference held by the registry
//! itself. [`Registry::mark_destroyed`] drops that reference and hides the
//! resource from [`Registry::acquire`]; the resource is torn down once the
//! last [`ResourceRef`] is dropped. Teardown always runs outside the
//! registry lock.

use crate::error::ServerError;
use crate::resource::Resource;
use core_types::{IdAllocator, ResourceId};
use services_logger::{LogEntry, Logger};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Entry {
    resource: Arc<Resource>,
    refs: usize,
    destroyed: bool,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct RegistryState {
    slots: Vec<Slot>,
    ids: IdAllocator,
    /// Most recently resolved resource
    cache: Option<(ResourceId, Arc<Resource>)>,
    cache_hits: u64,
    closed: bool,
}

impl RegistryState {
    fn entry_mut(&mut self, id: ResourceId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    fn live_entry(&mut self, id: ResourceId) -> Option<&mut Entry> {
        self.entry_mut(id).filter(|entry| !entry.destroyed)
    }

    fn forget_cached(&mut self, id: ResourceId) {
        if matches!(&self.cache, Some((cached, _)) if *cached == id) {
            self.cache = None;
        }
    }

    /// Frees the slot of `id`, returning its resource
    fn remove(&mut self, id: ResourceId) -> Option<Arc<Resource>> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.ids.remove(id.index());
        self.forget_cached(id);
        Some(entry.resource)
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    limit: usize,
    log: Logger,
}

/// Shared registry handle
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates a registry holding at most `limit` live resources
    pub fn new(limit: usize, log: Logger) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                limit,
                log,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new resource
    ///
    /// Fails once the server has shut down.
    ///
    /// The id is reserved first and the resource is built outside the lock;
    /// it only becomes visible to [`acquire`](Self::acquire) once fully
    /// constructed. On failure nothing stays registered.
    pub fn create<F>(&self, build: F) -> Result<ResourceRef, ServerError>
    where
        F: FnOnce(ResourceId) -> Resource,
    {
        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(ServerError::AllocationFailure(self.inner.limit));
            }
            let index = state
                .ids
                .allocate(self.inner.limit)
                .ok_or(ServerError::AllocationFailure(self.inner.limit))?;
            let position = index as usize;
            if position == state.slots.len() {
                state.slots.push(Slot::default());
            }
            ResourceId::new(index, state.slots[position].generation)
        };

        let resource = Arc::new(build(id));
        let kind = resource.kind_name();

        {
            let mut state = self.lock();
            if state.closed {
                // Shut down while building: give the id back and never install.
                let slot = &mut state.slots[id.index() as usize];
                slot.generation = slot.generation.wrapping_add(1);
                state.ids.remove(id.index());
                drop(state);
                resource.teardown(&self.inner.log);
                return Err(ServerError::AllocationFailure(self.inner.limit));
            }
            state.slots[id.index() as usize].entry = Some(Entry {
                resource: resource.clone(),
                // The registry's implicit reference plus the returned handle.
                refs: 2,
                destroyed: false,
            });
        }

        self.inner.log.log(
            LogEntry::info("resource created")
                .with_field("resource", id)
                .with_field("kind", kind),
        );

        Ok(ResourceRef {
            id,
            resource,
            registry: self.clone(),
        })
    }

    /// Takes a reference to a live resource
    pub fn acquire(&self, id: ResourceId) -> Result<ResourceRef, ServerError> {
        let mut state = self.lock();

        let cached = match &state.cache {
            Some((cached, resource)) if *cached == id => Some(resource.clone()),
            _ => None,
        };

        let entry = state
            .live_entry(id)
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        entry.refs += 1;

        let resource = match cached {
            Some(resource) => {
                state.cache_hits += 1;
                resource
            }
            None => {
                let resource = entry.resource.clone();
                state.cache = Some((id, resource.clone()));
                resource
            }
        };

        Ok(ResourceRef {
            id,
            resource,
            registry: self.clone(),
        })
    }

    /// Hides a resource from lookups and drops the registry's reference
    ///
    /// Returns false if it was already marked.
    pub fn mark_destroyed(&self, handle: &ResourceRef) -> bool {
        let mut state = self.lock();
        state.forget_cached(handle.id);
        let marked = match state.live_entry(handle.id) {
            Some(entry) => {
                entry.destroyed = true;
                // `handle` still holds a reference, so this never reaches zero here.
                entry.refs -= 1;
                true
            }
            None => false,
        };
        drop(state);

        if marked {
            self.inner.log.log(
                LogEntry::debug("resource marked destroyed").with_field("resource", handle.id),
            );
        }
        marked
    }

    fn release(&self, id: ResourceId) {
        let mut state = self.lock();
        let finished = state.entry_mut(id).map(|entry| {
            entry.refs -= 1;
            entry.refs == 0 && entry.destroyed
        });
        match finished {
            Some(true) => {}
            Some(false) => return,
            None => {
                let closed = state.closed;
                drop(state);
                if !closed {
                    self.inner.log.log(
                        LogEntry::error("release of unknown resource").with_field("resource", id),
                    );
                }
                return;
            }
        }

        let resource = state.remove(id);
        drop(state);

        if let Some(resource) = resource {
            self.inner.log.log(
                LogEntry::info("resource torn down")
                    .with_field("resource", id)
                    .with_field("kind", resource.kind_name()),
            );
            resource.teardown(&self.inner.log);
        }
    }

    /// Number of registered resources, including destroyed ones still referenced
    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookups served from the single-slot cache
    pub fn cache_hits(&self) -> u64 {
        self.lock().cache_hits
    }

    /// Tears down every resource regardless of outstanding references
    ///
    /// Used when the server stops; handles still alive afterwards release
    /// into empty slots and are ignored.
    pub fn shutdown(&self) {
        let resources: Vec<(ResourceId, Arc<Resource>)> = {
            let mut state = self.lock();
            state.cache = None;
            state.closed = true;
            let ids: Vec<ResourceId> = state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.entry.is_some())
                .map(|(index, slot)| ResourceId::new(index as u32, slot.generation))
                .collect();
            ids.into_iter()
                .filter_map(|id| state.remove(id).map(|resource| (id, resource)))
                .collect()
        };

        for (id, resource) in resources {
            self.inner.log.log(
                LogEntry::debug("resource torn down at shutdown").with_field("resource", id),
            );
            resource.teardown(&self.inner.log);
        }
    }
}

/// Counted reference to a live resource
///
/// Cloning takes another reference; dropping releases it.
pub struct ResourceRef {
    id: ResourceId,
    resource: Arc<Resource>,
    registry: Registry,
}

impl ResourceRef {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

impl Clone for ResourceRef {
    fn clone(&self) -> Self {
        if let Some(entry) = self.registry.lock().entry_mut(self.id) {
            entry.refs += 1;
        }

        Self {
            id: self.id,
            resource: self.resource.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Drop for ResourceRef {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("id", &self.id)
            .field("kind", &self.resource.kind_name())
            .finish()
    }
}
