//! Path namespace of the simulated kernel

use core_types::ObjectId;
use kernel_api::{KernelError, Namespace};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Flat map from absolute path to object
#[derive(Default)]
pub struct SimNamespace {
    entries: Mutex<BTreeMap<String, ObjectId>>,
}

impl SimNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists every linked path in order
    pub fn paths(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Namespace for SimNamespace {
    fn lookup(&self, path: &str) -> Result<ObjectId, KernelError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .ok_or_else(|| KernelError::NameNotFound(path.to_string()))
    }

    fn link(&self, path: &str, oid: ObjectId) -> Result<(), KernelError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(path) {
            return Err(KernelError::NameExists(path.to_string()));
        }
        entries.insert(path.to_string(), oid);
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<ObjectId, KernelError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .ok_or_else(|| KernelError::NameNotFound(path.to_string()))
    }
}
