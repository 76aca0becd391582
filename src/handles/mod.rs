//! Handle table - opaque, pointer-sized tokens for managed objects
//!
//! Design: generational slab behind a `parking_lot::RwLock`.
//!
//! Token layout (64-bit):
//! - bit 0: retention tag (1 = weak)
//! - bits 1..32: slot index + 1
//! - bits 32..64: slot generation
//!
//! Token `0` is the null handle. Releasing a slot bumps its generation, so a
//! stale token never resolves to whatever object later reuses the slot.
//!
//! Weak slots whose object was collected are reclaimed lazily: whenever the
//! slab would otherwise grow, and when a reuse lookup hits a dead entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::managed::{ObjectRef, WeakObjectRef};

const WEAK_TAG: usize = 1;
const INDEX_MASK: usize = 0x7FFF_FFFF;
const MAX_SLOTS: usize = INDEX_MASK - 1;

/// Opaque token the native side holds in place of an object
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(usize);

impl Handle {
    pub const NULL: Handle = Handle(0);

    fn compose(index: usize, generation: u32, retention: Retention) -> Self {
        let tag = match retention {
            Retention::Strong => 0,
            Retention::Weak => WEAK_TAG,
        };
        Self(((generation as usize) << 32) | ((index + 1) << 1) | tag)
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn into_raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_weak(self) -> bool {
        self.0 & WEAK_TAG != 0
    }

    /// Retention mode encoded in the tag bit
    pub const fn retention(self) -> Retention {
        if self.is_weak() {
            Retention::Weak
        } else {
            Retention::Strong
        }
    }

    #[inline]
    fn index(self) -> Option<usize> {
        match (self.0 >> 1) & INDEX_MASK {
            0 => None,
            n => Some(n - 1),
        }
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Handle(null)");
        }
        write!(
            f,
            "Handle({:?} #{} gen {})",
            self.retention(),
            self.index().unwrap_or(0),
            self.generation()
        )
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Whether a handle keeps its object alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retention {
    Strong,
    Weak,
}

enum Target {
    Strong(ObjectRef),
    Weak(WeakObjectRef),
}

impl Target {
    fn upgrade(&self) -> Option<ObjectRef> {
        match self {
            Self::Strong(obj) => Some(obj.clone()),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    fn retention(&self) -> Retention {
        match self {
            Self::Strong(_) => Retention::Strong,
            Self::Weak(_) => Retention::Weak,
        }
    }
}

struct Slot {
    generation: u32,
    target: Option<Target>,
}

#[derive(Default)]
struct Slab {
    slots: Vec<Slot>,
    free: Vec<usize>,
    strong: usize,
    weak: usize,
    /// Object address -> live weak handle, for reuse on the return path
    weak_index: HashMap<usize, Handle>,
    /// Weak slots reclaimed after their object was collected
    swept: u64,
}

impl Slab {
    fn slot(&self, handle: Handle) -> Option<&Slot> {
        let slot = self.slots.get(handle.index()?)?;
        let target = slot.target.as_ref()?;
        (slot.generation == handle.generation() && target.retention() == handle.retention()).then_some(slot)
    }

    fn insert(&mut self, target: Target) -> Handle {
        if self.free.is_empty() && self.weak > 0 && self.slots.len() == self.slots.capacity() {
            self.sweep_collected();
        }
        let retention = target.retention();
        match retention {
            Retention::Strong => self.strong += 1,
            Retention::Weak => self.weak += 1,
        }
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].target = Some(target);
                index
            }
            None => {
                assert!(self.slots.len() < MAX_SLOTS, "handle table exhausted");
                self.slots.push(Slot {
                    generation: 0,
                    target: Some(target),
                });
                self.slots.len() - 1
            }
        };
        Handle::compose(index, self.slots[index].generation, retention)
    }

    /// Vacate the slot behind a validated handle
    fn remove(&mut self, index: usize) -> Option<Target> {
        let slot = &mut self.slots[index];
        let target = slot.target.take()?;
        let generation = slot.generation;
        slot.generation = generation.wrapping_add(1);
        self.free.push(index);
        match &target {
            Target::Strong(_) => self.strong -= 1,
            Target::Weak(weak) => {
                self.weak -= 1;
                let handle = Handle::compose(index, generation, Retention::Weak);
                if self.weak_index.get(&weak.addr()) == Some(&handle) {
                    self.weak_index.remove(&weak.addr());
                }
            }
        }
        Some(target)
    }

    fn is_collected(&self, index: usize) -> bool {
        matches!(&self.slots[index].target, Some(Target::Weak(weak)) if weak.is_collected())
    }

    /// Vacate every weak slot whose object is gone
    fn sweep_collected(&mut self) -> usize {
        let dead: Vec<usize> = (0..self.slots.len()).filter(|&index| self.is_collected(index)).collect();
        for &index in &dead {
            self.remove(index);
        }
        if !dead.is_empty() {
            self.swept += dead.len() as u64;
            trace!(target: "handles", swept = dead.len(), "reclaimed collected weak handles");
        }
        dead.len()
    }
}

/// Snapshot of table occupancy and lifetime counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleStats {
    pub strong: usize,
    pub weak: usize,
    pub capacity: usize,
    pub acquired: u64,
    /// Explicit releases plus collected weak slots reclaimed by the table
    pub released: u64,
}

/// Thread-safe map from handle tokens to managed objects
pub struct HandleTable {
    inner: RwLock<Slab>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Slab {
                slots: Vec::with_capacity(capacity),
                ..Slab::default()
            }),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Issue a fresh token for `object`
    ///
    /// # Panics
    /// If more than 2^31 - 2 handles are live at once.
    pub fn acquire(&self, object: ObjectRef, retention: Retention) -> Handle {
        let target = match retention {
            Retention::Strong => Target::Strong(object),
            Retention::Weak => Target::Weak(object.downgrade()),
        };
        let handle = self.inner.write().insert(target);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        trace!(target: "handles", %handle, ?retention, "acquired");
        handle
    }

    /// Weak handle for `object`, reusing a live one issued earlier
    pub fn acquire_weak_reusing(&self, object: &ObjectRef) -> Handle {
        let mut guard = self.inner.write();
        let slab = &mut *guard;
        let addr = object.addr();
        if let Some(&handle) = slab.weak_index.get(&addr) {
            let live = slab
                .slot(handle)
                .and_then(|slot| slot.target.as_ref())
                .and_then(Target::upgrade)
                .is_some_and(|obj| obj.ptr_eq(object));
            if live {
                return handle;
            }
            // the address was recycled after the indexed object died
            let dead = handle
                .index()
                .filter(|&index| slab.slot(handle).is_some() && slab.is_collected(index));
            if let Some(index) = dead {
                slab.remove(index);
                slab.swept += 1;
            }
        }
        let handle = slab.insert(Target::Weak(object.downgrade()));
        slab.weak_index.insert(addr, handle);
        drop(guard);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        trace!(target: "handles", %handle, "acquired weak");
        handle
    }

    /// Object behind `handle`, or `None` when it was released, collected or never valid
    pub fn resolve(&self, handle: Handle) -> Option<ObjectRef> {
        if handle.is_null() {
            return None;
        }
        let slab = self.inner.read();
        slab.slot(handle)?.target.as_ref()?.upgrade()
    }

    /// Invalidate `handle`; `false` if it was not live
    pub fn release(&self, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        let removed = {
            let mut slab = self.inner.write();
            match handle.index() {
                Some(index) if slab.slot(handle).is_some() => slab.remove(index),
                _ => None,
            }
        };
        // Strong targets drop here, outside the lock
        match removed {
            Some(_) => {
                self.released.fetch_add(1, Ordering::Relaxed);
                trace!(target: "handles", %handle, "released");
                true
            }
            None => false,
        }
    }

    /// Whether `handle` still resolves
    pub fn is_alive(&self, handle: Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Retention of a handle that still occupies its slot
    pub fn mode_of(&self, handle: Handle) -> Option<Retention> {
        let slab = self.inner.read();
        slab.slot(handle).map(|_| handle.retention())
    }

    /// Strong handle for the object behind any live handle
    pub fn promote(&self, handle: Handle) -> Option<Handle> {
        let object = self.resolve(handle)?;
        Some(self.acquire(object, Retention::Strong))
    }

    /// Reclaim every slot whose weak target was collected; returns how many
    ///
    /// Tokens for those slots stop being releasable. The table also does this
    /// on its own before growing.
    pub fn purge_collected(&self) -> usize {
        self.inner.write().sweep_collected()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        let slab = self.inner.read();
        slab.strong + slab.weak
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HandleStats {
        let slab = self.inner.read();
        HandleStats {
            strong: slab.strong,
            weak: slab.weak,
            capacity: slab.slots.len(),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed) + slab.swept,
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests;
