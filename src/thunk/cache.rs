//! Process-lifetime thunk cache
//!
//! Each identity owns a `OnceCell` slot. The first caller runs synthesis
//! inside the cell; concurrent callers for the same identity block on it and
//! observe the same `Arc`. Other identities are unaffected. Entries are
//! never evicted.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use super::Thunk;
use crate::error::BridgeError;
use crate::types::MethodIdentity;

type Slot = Arc<OnceCell<Arc<Thunk>>>;

#[derive(Default)]
pub struct ThunkCache {
    entries: DashMap<MethodIdentity, Slot>,
}

impl ThunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached thunk for `identity`, synthesizing it at most once
    ///
    /// A failed synthesis leaves no entry behind.
    pub fn get_or_create<F>(&self, identity: &MethodIdentity, create: F) -> Result<Arc<Thunk>, BridgeError>
    where
        F: FnOnce() -> Result<Thunk, BridgeError>,
    {
        if let Some(thunk) = self.get(identity) {
            return Ok(thunk);
        }

        // The shard guard drops at the end of this statement, before synthesis
        let slot: Slot = Arc::clone(&self.entries.entry(identity.clone()).or_default());

        let result = slot.get_or_try_init(|| create().map(Arc::new)).cloned();
        if result.is_err() {
            self.entries.remove_if(identity, |_, slot| slot.get().is_none());
        }
        result
    }

    pub fn get(&self, identity: &MethodIdentity) -> Option<Arc<Thunk>> {
        self.entries.get(identity).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, identity: &MethodIdentity) -> bool {
        self.get(identity).is_some()
    }

    /// Number of synthesized thunks
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
