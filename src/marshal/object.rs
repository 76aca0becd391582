//! Object references and opaque pointers

use std::ffi::c_void;
use std::ptr;

use super::{MarshalContext, MarshalStrategy, StagedWrite};
use crate::error::MarshalError;
use crate::handles::{Handle, Retention};
use crate::managed::{ManagedValue, ObjectRef};

/// Resolve a handle token; `0` is `Null`
pub(crate) fn resolve_token(ctx: &MarshalContext<'_>, raw: usize) -> Result<ManagedValue, MarshalError> {
    let handle = Handle::from_raw(raw);
    if handle.is_null() {
        return Ok(ManagedValue::Null);
    }
    ctx.handles
        .resolve(handle)
        .map(ManagedValue::Object)
        .ok_or(MarshalError::UnresolvedHandle(handle))
}

/// Handle for an object travelling back to native code
///
/// Objects the managed side still references get a reused weak handle. An
/// object owned only by the values leaving the call would be collected
/// before the native side saw it, so it gets a strong handle the caller
/// must release. Outside a call, `value` is taken as the only transient owner.
pub(crate) fn issue_handle(ctx: &MarshalContext<'_>, value: &ManagedValue) -> Result<Handle, MarshalError> {
    match value {
        ManagedValue::Null => Ok(Handle::NULL),
        ManagedValue::Object(obj) => Ok(handle_for(ctx, obj)),
        other => Err(MarshalError::TypeMismatch {
            expected: "object".to_string(),
            found: other.type_label(),
        }),
    }
}

fn handle_for(ctx: &MarshalContext<'_>, obj: &ObjectRef) -> Handle {
    let fresh = match ctx.outbound {
        Some(outbound) => outbound.is_fresh(obj),
        None => obj.strong_count() <= 1,
    };
    if fresh {
        ctx.handles.acquire(obj.clone(), Retention::Strong)
    } else {
        ctx.handles.acquire_weak_reusing(obj)
    }
}

pub(super) unsafe fn decode<const BY_REF: bool>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if BY_REF {
        let cell = ctx.checked::<usize>(slot)?;
        resolve_token(ctx, ptr::read_unaligned(cell))
    } else {
        resolve_token(ctx, slot as usize)
    }
}

pub(super) unsafe fn write_back(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let cell = ctx.checked::<usize>(slot)?;
    let handle = issue_handle(ctx, value)?;
    let mut write = StagedWrite::new(cell.cast());
    write.push(handle.into_raw());
    write.own_handle(handle);
    Ok(write)
}

pub(super) fn encode(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    issue_handle(ctx, &value).map(|handle| handle.into_raw() as *mut c_void)
}

// Raw pointers pass through untouched

pub(crate) fn expect_pointer(value: &ManagedValue) -> Result<*mut c_void, MarshalError> {
    match value {
        ManagedValue::Pointer(addr) => Ok(*addr as *mut c_void),
        ManagedValue::Null => Ok(ptr::null_mut()),
        other => Err(MarshalError::TypeMismatch {
            expected: "pointer".to_string(),
            found: other.type_label(),
        }),
    }
}

pub(super) unsafe fn decode_pointer<const BY_REF: bool>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if BY_REF {
        let cell = ctx.checked::<*mut c_void>(slot)?;
        Ok(ManagedValue::Pointer(ptr::read_unaligned(cell) as usize))
    } else {
        Ok(ManagedValue::Pointer(slot as usize))
    }
}

pub(super) unsafe fn write_back_pointer(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let cell = ctx.checked::<*mut c_void>(slot)?;
    let mut write = StagedWrite::new(cell.cast());
    write.push(expect_pointer(value)?);
    Ok(write)
}

pub(super) fn encode_pointer(
    _: &MarshalStrategy,
    _: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    expect_pointer(&value)
}
