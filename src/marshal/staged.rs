//! Two-phase writes into native memory
//!
//! A call stages every by-reference write and its return value before any
//! native byte changes. Only when all of them succeed are the writes
//! committed; otherwise each staged write is abandoned and whatever it
//! allocated for the native side (strings, strong handles) is reclaimed.

use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::{mem, ptr, slice};

use smallvec::SmallVec;

use super::string::free_c_string;
use crate::handles::{Handle, HandleTable};
use crate::managed::{ManagedValue, ObjectRef};

/// Bytes bound for one native location, plus what was allocated to produce them
pub(crate) struct StagedWrite {
    target: *mut u8,
    bytes: SmallVec<[u8; 16]>,
    strings: SmallVec<[*mut c_char; 1]>,
    issued: SmallVec<[Handle; 1]>,
}

impl StagedWrite {
    pub(crate) fn new(target: *mut c_void) -> Self {
        Self {
            target: target.cast(),
            bytes: SmallVec::new(),
            strings: SmallVec::new(),
            issued: SmallVec::new(),
        }
    }

    /// A write that leaves native memory as it is
    pub(crate) fn skip() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Append the in-memory representation of a primitive or pointer
    pub(crate) fn push<T: Copy>(&mut self, value: T) {
        // SAFETY: only called with integers, floats and raw pointers, which
        // have no padding bytes
        let raw = unsafe { slice::from_raw_parts(ptr::addr_of!(value).cast::<u8>(), mem::size_of::<T>()) };
        self.bytes.extend_from_slice(raw);
    }

    /// Bridge-allocated string this write hands out
    pub(crate) fn own_string(&mut self, raw: *mut c_char) {
        if !raw.is_null() {
            self.strings.push(raw);
        }
    }

    /// Handle this write hands out; only strong ones need reclaiming
    pub(crate) fn own_handle(&mut self, handle: Handle) {
        if !handle.is_null() && !handle.is_weak() {
            self.issued.push(handle);
        }
    }

    /// Copy the staged bytes to their target
    ///
    /// # Safety
    /// The target validated at staging time must still be writable.
    pub(crate) unsafe fn commit(self) {
        if !self.bytes.is_empty() {
            ptr::copy_nonoverlapping(self.bytes.as_ptr(), self.target, self.bytes.len());
        }
    }

    /// Drop the write and reclaim what it would have handed out
    pub(crate) fn abandon(self, handles: &HandleTable) {
        for raw in self.strings {
            // SAFETY: allocated by `into_c_string` and never published
            unsafe { free_c_string(raw) };
        }
        for handle in self.issued {
            handles.release(handle);
        }
    }
}

/// Objects leaving a call whose only owners are the call's own outbound values
///
/// Decided once, before any handle is issued, so issuing a handle for one
/// slot does not change the verdict for another slot carrying the same object.
#[derive(Debug, Default)]
pub(crate) struct Outbound {
    fresh: SmallVec<[usize; 4]>,
}

impl Outbound {
    /// Scan the by-ref values and return value of a finished call
    ///
    /// Every other transient reference held by the call must already be
    /// dropped. Elements of a fresh owned array count the array's storage as
    /// a transient owner.
    pub(crate) fn scan<'v>(values: impl IntoIterator<Item = &'v ManagedValue>) -> Self {
        let mut owners: HashMap<usize, (ObjectRef, usize)> = HashMap::new();
        for value in values {
            if let Some(obj) = value.as_object() {
                owners.entry(obj.addr()).or_insert_with(|| (obj.clone(), 0)).1 += 1;
            }
        }

        // `owners` holds one extra reference per object while scanning
        let is_fresh = |obj: &ObjectRef, occurrences: usize| obj.strong_count() <= occurrences + 1;

        let mut elements: Vec<ObjectRef> = Vec::new();
        for (obj, occurrences) in owners.values() {
            if !is_fresh(obj, *occurrences) {
                continue;
            }
            if let Some(array) = obj.as_array() {
                array.for_each(|element| elements.extend(element.as_object().cloned()));
            }
        }
        for element in elements {
            // the clone in `elements` moves into the map as its extra reference
            let entry = owners.entry(element.addr()).or_insert_with(|| (element, 0));
            entry.1 += 1;
        }

        let fresh = owners
            .iter()
            .filter(|(_, (obj, occurrences))| is_fresh(obj, *occurrences))
            .map(|(addr, _)| *addr)
            .collect();
        Self { fresh }
    }

    #[inline]
    pub(crate) fn is_fresh(&self, obj: &ObjectRef) -> bool {
        self.fresh.contains(&obj.addr())
    }
}
