//! NUL-terminated UTF-8 strings
//!
//! Incoming strings are always copied; the bridge never frees a pointer the
//! native side passed in. Strings the bridge hands out are allocated with
//! `CString::into_raw` and must come back through [`free_c_string`].

use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;

use super::{MarshalContext, MarshalStrategy, StagedWrite};
use crate::error::MarshalError;
use crate::managed::ManagedValue;

/// Copy a native string; null maps to `Null`
pub(crate) unsafe fn read_c_str(raw: *const c_char) -> Result<ManagedValue, MarshalError> {
    if raw.is_null() {
        return Ok(ManagedValue::Null);
    }
    CStr::from_ptr(raw)
        .to_str()
        .map(|s| ManagedValue::String(s.to_string()))
        .map_err(|_| MarshalError::InvalidUtf8)
}

/// Allocate a bridge-owned copy of a managed string
pub(crate) fn into_c_string(value: &ManagedValue) -> Result<*mut c_char, MarshalError> {
    match value {
        ManagedValue::Null => Ok(ptr::null_mut()),
        ManagedValue::String(s) => CString::new(s.as_str())
            .map(CString::into_raw)
            .map_err(|_| MarshalError::InteriorNul),
        other => Err(MarshalError::TypeMismatch {
            expected: "string".to_string(),
            found: other.type_label(),
        }),
    }
}

/// Release a string previously handed out by the bridge
///
/// # Safety
/// `raw` must be null or a pointer returned by the bridge that has not been
/// freed yet.
pub unsafe fn free_c_string(raw: *mut c_char) {
    if !raw.is_null() {
        drop(CString::from_raw(raw));
    }
}

pub(super) unsafe fn decode<const BY_REF: bool>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if BY_REF {
        let cell = ctx.checked::<*mut c_char>(slot)?;
        read_c_str(ptr::read_unaligned(cell).cast_const())
    } else {
        read_c_str(slot as *const c_char)
    }
}

/// Store a fresh bridge-owned string in the caller's cell
///
/// The previous pointer in the cell stays owned by the native side.
pub(super) unsafe fn write_back(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let cell = ctx.checked::<*mut c_char>(slot)?;
    let raw = into_c_string(value)?;
    let mut write = StagedWrite::new(cell.cast());
    write.push(raw);
    write.own_string(raw);
    Ok(write)
}

pub(super) fn encode(
    _: &MarshalStrategy,
    _: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    into_c_string(&value).map(|raw| raw.cast())
}
