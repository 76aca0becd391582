//! Single-dimension arrays
//!
//! The slot points at a [`NativeArray`] header. Blittable elements are
//! packed in native memory and wrapped without copying; any other element
//! type is stored as one pointer-width slot per element and copied into an
//! owned managed array.

use std::ffi::c_void;
use std::ptr;

use tracing::trace;

use super::object::issue_handle;
use super::scalar::{with_scalar, Scalar};
use super::{MarshalContext, MarshalStrategy, StagedWrite};
use crate::error::MarshalError;
use crate::handles::Handle;
use crate::managed::{ManagedArray, ManagedValue, ObjectRef};
use crate::types::ManagedType;

/// Native array header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeArray {
    pub data: *mut c_void,
    pub len: usize,
}

impl NativeArray {
    pub fn new(data: *mut c_void, len: usize) -> Self {
        Self { data, len }
    }

    /// Header over a slice of packed elements or element slots
    pub fn from_slice<T>(elements: &mut [T]) -> Self {
        Self {
            data: elements.as_mut_ptr().cast(),
            len: elements.len(),
        }
    }
}

/// Element strategy and element type of an array strategy
fn element_of(strategy: &MarshalStrategy) -> Result<(&MarshalStrategy, &ManagedType), MarshalError> {
    match strategy {
        MarshalStrategy::Array { element, element_type } => Ok((element, element_type)),
        _ => Err(MarshalError::TypeMismatch {
            expected: "array".to_string(),
            found: "scalar slot",
        }),
    }
}

unsafe fn read_header(ctx: &MarshalContext<'_>, slot: *mut c_void) -> Result<NativeArray, MarshalError> {
    let header = ctx.checked::<NativeArray>(slot)?;
    let native = ptr::read_unaligned(header);
    if native.len > 0 && native.data.is_null() {
        return Err(MarshalError::NullPointer);
    }
    Ok(native)
}

/// Decode the array behind `slot`; identical for by-value and by-ref slots
pub(super) unsafe fn decode(
    strategy: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if slot.is_null() {
        return Ok(ManagedValue::Null);
    }
    let (element, element_type) = element_of(strategy)?;
    let native = read_header(ctx, slot)?;
    let array = match element {
        MarshalStrategy::Scalar(kind) => {
            ctx.check_align(native.data, kind.align())?;
            trace!(target: "marshal", len = native.len, "wrapping native array");
            ManagedArray::wrap(*kind, native.data, native.len)
        }
        _ => {
            trace!(target: "marshal", len = native.len, %element_type, "copying array elements");
            let slots = native.data as *const *mut c_void;
            let mut values = Vec::with_capacity(native.len);
            for i in 0..native.len {
                values.push(element.to_managed(ctx, ptr::read_unaligned(slots.add(i)), false)?);
            }
            ManagedArray::owned(element_type.clone(), values)
        }
    };
    Ok(ManagedValue::Object(ObjectRef::new_array(array)))
}

/// Stage a copy of a managed array's elements into the native buffer
///
/// A wrapped array still pointing at the same buffer already shares its
/// storage and is left alone. Lengths must match; the native buffer is
/// never reallocated.
pub(super) unsafe fn write_back(
    strategy: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let array = match value {
        ManagedValue::Null => return Ok(StagedWrite::skip()),
        ManagedValue::Object(obj) => obj.as_array().ok_or(MarshalError::TypeMismatch {
            expected: "array".to_string(),
            found: "object",
        })?,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: "array".to_string(),
                found: other.type_label(),
            })
        }
    };
    let native = read_header(ctx, slot)?;
    if array.native_data() == Some(native.data) {
        return Ok(StagedWrite::skip());
    }
    if array.len() != native.len {
        return Err(MarshalError::LengthMismatch {
            expected: native.len,
            found: array.len(),
        });
    }

    let (element, _) = element_of(strategy)?;
    let values = array.to_vec();
    let mut write = StagedWrite::new(native.data);
    match element {
        MarshalStrategy::Scalar(kind) => with_scalar!(*kind, T => {
            ctx.check_align(native.data, kind.align())?;
            for value in &values {
                let v = T::extract(value).ok_or_else(|| MarshalError::TypeMismatch {
                    expected: kind.managed_type().to_string(),
                    found: value.type_label(),
                })?;
                write.push(v);
            }
        }),
        _ => {
            for value in values {
                let encoded = match element.encode(ctx, value) {
                    Ok(encoded) => encoded,
                    Err(error) => {
                        write.abandon(ctx.handles);
                        return Err(error);
                    }
                };
                match element {
                    MarshalStrategy::String => write.own_string(encoded.cast()),
                    MarshalStrategy::Object => write.own_handle(Handle::from_raw(encoded as usize)),
                    _ => {}
                }
                write.push(encoded);
            }
        }
    }
    Ok(write)
}

/// Returned arrays travel as object handles
pub(super) fn encode(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    issue_handle(ctx, &value).map(|handle| handle.into_raw() as *mut c_void)
}
