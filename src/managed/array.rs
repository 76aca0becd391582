//! Managed arrays: owned element vectors or wrapped native memory

use std::ffi::c_void;
use std::fmt;
use std::ptr;

use parking_lot::RwLock;
use tracing::trace;

use super::value::ManagedValue;
use crate::error::ManagedFault;
use crate::marshal::scalar::{with_scalar, Scalar, ScalarKind};
use crate::types::ManagedType;

pub struct ManagedArray {
    element: ManagedType,
    storage: RwLock<Storage>,
}

enum Storage {
    /// Packed native elements; reads and writes go straight to native memory
    Wrapped {
        kind: ScalarKind,
        data: usize,
        len: usize,
    },
    Owned(Vec<ManagedValue>),
}

/// Element `index` of a wrapped region
///
/// # Safety
/// `index < len` of a region that is still attached.
unsafe fn read_wrapped(kind: ScalarKind, data: usize, index: usize) -> ManagedValue {
    with_scalar!(kind, T => ptr::read_unaligned((data as *const T).add(index)).into_managed())
}

impl ManagedArray {
    /// Array owning its elements
    pub fn owned(element: ManagedType, values: Vec<ManagedValue>) -> Self {
        Self {
            element,
            storage: RwLock::new(Storage::Owned(values)),
        }
    }

    /// View over `len` packed native elements of `kind` starting at `data`
    ///
    /// # Safety
    /// `data` must point to `len` initialized elements of `kind` that stay
    /// valid until [`ManagedArray::detach`] is called or the array is dropped.
    pub unsafe fn wrap(kind: ScalarKind, data: *mut c_void, len: usize) -> Self {
        Self {
            element: kind.managed_type(),
            storage: RwLock::new(Storage::Wrapped {
                kind,
                data: data as usize,
                len,
            }),
        }
    }

    #[inline]
    pub fn element_type(&self) -> &ManagedType {
        &self.element
    }

    pub fn len(&self) -> usize {
        match &*self.storage.read() {
            Storage::Wrapped { len, .. } => *len,
            Storage::Owned(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(&*self.storage.read(), Storage::Wrapped { .. })
    }

    /// Native base address while the array still wraps native memory
    pub fn native_data(&self) -> Option<*mut c_void> {
        match &*self.storage.read() {
            Storage::Wrapped { data, .. } => Some(*data as *mut c_void),
            Storage::Owned(_) => None,
        }
    }

    pub fn get(&self, index: usize) -> Option<ManagedValue> {
        match &*self.storage.read() {
            Storage::Wrapped { kind, data, len } => {
                // SAFETY: bounds checked; attached regions stay valid
                (index < *len).then(|| unsafe { read_wrapped(*kind, *data, index) })
            }
            Storage::Owned(values) => values.get(index).cloned(),
        }
    }

    pub fn set(&self, index: usize, value: ManagedValue) -> Result<(), ManagedFault> {
        let mut storage = self.storage.write();
        let len = match &*storage {
            Storage::Wrapped { len, .. } => *len,
            Storage::Owned(values) => values.len(),
        };
        if index >= len {
            return Err(ManagedFault::new(
                "IndexOutOfRangeException",
                format!("index {} outside array of length {}", index, len),
            ));
        }
        match &mut *storage {
            Storage::Wrapped { kind, data, .. } => with_scalar!(*kind, T => {
                let v = T::extract(&value).ok_or_else(|| {
                    ManagedFault::invalid_cast(&self.element.to_string(), value.type_label())
                })?;
                // SAFETY: index is in bounds of the attached region
                unsafe { ptr::write_unaligned((*data as *mut T).add(index), v) };
                Ok(())
            }),
            Storage::Owned(values) => {
                values[index] = value;
                Ok(())
            }
        }
    }

    /// Snapshot of every element
    pub fn to_vec(&self) -> Vec<ManagedValue> {
        match &*self.storage.read() {
            // SAFETY: every index is in bounds of the attached region
            Storage::Wrapped { kind, data, len } => (0..*len).map(|i| unsafe { read_wrapped(*kind, *data, i) }).collect(),
            Storage::Owned(values) => values.clone(),
        }
    }

    /// Visit elements of an owned array without cloning it
    pub(crate) fn for_each(&self, mut f: impl FnMut(&ManagedValue)) {
        if let Storage::Owned(values) = &*self.storage.read() {
            values.iter().for_each(&mut f);
        }
    }

    /// Stop wrapping native memory, keeping a copy of the current elements
    ///
    /// Afterwards the array is an ordinary owned array and never touches the
    /// native buffer again. Returns `false` if it was already owned.
    pub fn detach(&self) -> bool {
        let mut storage = self.storage.write();
        let Storage::Wrapped { kind, data, len } = *storage else {
            return false;
        };
        // SAFETY: still attached until the assignment below
        let snapshot = (0..len).map(|i| unsafe { read_wrapped(kind, data, i) }).collect();
        *storage = Storage::Owned(snapshot);
        trace!(target: "marshal", len, "detached wrapped array");
        true
    }
}

impl fmt::Debug for ManagedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedArray")
            .field("element", &self.element)
            .field("len", &self.len())
            .field("wrapped", &self.is_wrapped())
            .finish()
    }
}
