//! Primitive scalars and booleans
//!
//! By value, a scalar's bits sit directly in the pointer-width slot, so no
//! per-call boxing happens. By reference, the slot holds a `*mut T` that is
//! read before the call and written after it.

use std::ffi::c_void;
use std::ptr;

use super::{MarshalContext, MarshalStrategy, StagedWrite};
use crate::error::MarshalError;
use crate::managed::ManagedValue;
use crate::types::ManagedType;

/// Blittable primitive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ScalarKind {
    pub fn from_managed_type(ty: &ManagedType) -> Option<Self> {
        Some(match ty {
            ManagedType::I8 => Self::I8,
            ManagedType::I16 => Self::I16,
            ManagedType::I32 => Self::I32,
            ManagedType::I64 => Self::I64,
            ManagedType::U8 => Self::U8,
            ManagedType::U16 => Self::U16,
            ManagedType::U32 => Self::U32,
            ManagedType::U64 => Self::U64,
            ManagedType::F32 => Self::F32,
            ManagedType::F64 => Self::F64,
            _ => return None,
        })
    }

    pub fn managed_type(self) -> ManagedType {
        match self {
            Self::I8 => ManagedType::I8,
            Self::I16 => ManagedType::I16,
            Self::I32 => ManagedType::I32,
            Self::I64 => ManagedType::I64,
            Self::U8 => ManagedType::U8,
            Self::U16 => ManagedType::U16,
            Self::U32 => ManagedType::U32,
            Self::U64 => ManagedType::U64,
            Self::F32 => ManagedType::F32,
            Self::F64 => ManagedType::F64,
        }
    }

    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Natural alignment (same as size for every kind on 64-bit targets)
    pub const fn align(self) -> usize {
        self.size()
    }
}

/// Expand `$body` once per scalar kind with `$T` bound to the Rust type
macro_rules! with_scalar {
    ($kind:expr, $T:ident => $body:expr) => {
        match $kind {
            $crate::marshal::scalar::ScalarKind::I8 => {
                type $T = i8;
                $body
            }
            $crate::marshal::scalar::ScalarKind::I16 => {
                type $T = i16;
                $body
            }
            $crate::marshal::scalar::ScalarKind::I32 => {
                type $T = i32;
                $body
            }
            $crate::marshal::scalar::ScalarKind::I64 => {
                type $T = i64;
                $body
            }
            $crate::marshal::scalar::ScalarKind::U8 => {
                type $T = u8;
                $body
            }
            $crate::marshal::scalar::ScalarKind::U16 => {
                type $T = u16;
                $body
            }
            $crate::marshal::scalar::ScalarKind::U32 => {
                type $T = u32;
                $body
            }
            $crate::marshal::scalar::ScalarKind::U64 => {
                type $T = u64;
                $body
            }
            $crate::marshal::scalar::ScalarKind::F32 => {
                type $T = f32;
                $body
            }
            $crate::marshal::scalar::ScalarKind::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use with_scalar;

/// A primitive that travels inline in a pointer-width slot
pub trait Scalar: Copy + Send + Sync + 'static {
    const KIND: ScalarKind;

    fn from_slot(slot: *mut c_void) -> Self;
    fn into_slot(self) -> *mut c_void;
    fn into_managed(self) -> ManagedValue;
    fn extract(value: &ManagedValue) -> Option<Self>;
}

macro_rules! impl_int_scalar {
    ($($ty:ty => $kind:ident, $variant:ident);* $(;)?) => {
        $(
            impl Scalar for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                #[inline]
                fn from_slot(slot: *mut c_void) -> Self {
                    slot as usize as $ty
                }

                /// Signed values are sign-extended to the full slot
                #[inline]
                fn into_slot(self) -> *mut c_void {
                    self as i64 as usize as *mut c_void
                }

                #[inline]
                fn into_managed(self) -> ManagedValue {
                    ManagedValue::$variant(self)
                }

                #[inline]
                fn extract(value: &ManagedValue) -> Option<Self> {
                    match value {
                        ManagedValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_int_scalar! {
    i8 => I8, I8;
    i16 => I16, I16;
    i32 => I32, I32;
    i64 => I64, I64;
    u8 => U8, U8;
    u16 => U16, U16;
    u32 => U32, U32;
    u64 => U64, U64;
}

impl Scalar for f32 {
    const KIND: ScalarKind = ScalarKind::F32;

    #[inline]
    fn from_slot(slot: *mut c_void) -> Self {
        f32::from_bits(slot as usize as u32)
    }

    #[inline]
    fn into_slot(self) -> *mut c_void {
        self.to_bits() as usize as *mut c_void
    }

    #[inline]
    fn into_managed(self) -> ManagedValue {
        ManagedValue::F32(self)
    }

    #[inline]
    fn extract(value: &ManagedValue) -> Option<Self> {
        match value {
            ManagedValue::F32(v) => Some(*v),
            _ => None,
        }
    }
}

impl Scalar for f64 {
    const KIND: ScalarKind = ScalarKind::F64;

    #[inline]
    fn from_slot(slot: *mut c_void) -> Self {
        f64::from_bits(slot as usize as u64)
    }

    #[inline]
    fn into_slot(self) -> *mut c_void {
        self.to_bits() as usize as *mut c_void
    }

    #[inline]
    fn into_managed(self) -> ManagedValue {
        ManagedValue::F64(self)
    }

    #[inline]
    fn extract(value: &ManagedValue) -> Option<Self> {
        match value {
            ManagedValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

fn mismatch<T: Scalar>(value: &ManagedValue) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: T::KIND.managed_type().to_string(),
        found: value.type_label(),
    }
}

#[inline]
pub(crate) fn read_value<T: Scalar>(slot: *mut c_void) -> ManagedValue {
    T::from_slot(slot).into_managed()
}

pub(crate) unsafe fn read_ref<T: Scalar>(
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    let target = ctx.checked::<T>(slot)?;
    Ok(ptr::read_unaligned(target).into_managed())
}

pub(crate) unsafe fn write_ref<T: Scalar>(
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let target = ctx.checked::<T>(slot)?;
    let v = T::extract(value).ok_or_else(|| mismatch::<T>(value))?;
    let mut write = StagedWrite::new(target.cast());
    write.push(v);
    Ok(write)
}

pub(crate) fn encode_value<T: Scalar>(value: &ManagedValue) -> Result<*mut c_void, MarshalError> {
    T::extract(value)
        .map(Scalar::into_slot)
        .ok_or_else(|| mismatch::<T>(value))
}

// Codec entry points, monomorphized per scalar type and by-ref flag

pub(super) unsafe fn decode<T: Scalar, const BY_REF: bool>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if BY_REF {
        read_ref::<T>(ctx, slot)
    } else {
        Ok(read_value::<T>(slot))
    }
}

pub(super) unsafe fn write_back<T: Scalar>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    write_ref::<T>(ctx, slot, value)
}

pub(super) fn encode<T: Scalar>(
    _: &MarshalStrategy,
    _: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    encode_value::<T>(&value)
}

// Booleans

pub static TRUE_SENTINEL: u8 = 1;
pub static FALSE_SENTINEL: u8 = 0;

/// Fixed, distinct, non-null slot value standing for `value`
#[inline]
pub fn bool_sentinel(value: bool) -> *mut c_void {
    let sentinel = if value { &TRUE_SENTINEL } else { &FALSE_SENTINEL };
    sentinel as *const u8 as *mut c_void
}

pub(crate) fn sentinel_to_bool(slot: *mut c_void) -> Result<bool, MarshalError> {
    if slot == bool_sentinel(true) {
        Ok(true)
    } else if slot == bool_sentinel(false) {
        Ok(false)
    } else {
        Err(MarshalError::InvalidBool { bits: slot as usize })
    }
}

pub(crate) unsafe fn read_bool_ref(
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    let target = ctx.checked::<u8>(slot)?;
    match ptr::read(target) {
        0 => Ok(ManagedValue::Bool(false)),
        1 => Ok(ManagedValue::Bool(true)),
        bits => Err(MarshalError::InvalidBool { bits: bits as usize }),
    }
}

pub(crate) unsafe fn write_bool_ref(
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    let target = ctx.checked::<u8>(slot)?;
    let mut write = StagedWrite::new(target.cast());
    write.push(u8::from(expect_bool(value)?));
    Ok(write)
}

fn expect_bool(value: &ManagedValue) -> Result<bool, MarshalError> {
    match value {
        ManagedValue::Bool(b) => Ok(*b),
        other => Err(MarshalError::TypeMismatch {
            expected: "bool".to_string(),
            found: other.type_label(),
        }),
    }
}

pub(crate) fn encode_bool(value: &ManagedValue) -> Result<*mut c_void, MarshalError> {
    expect_bool(value).map(bool_sentinel)
}

pub(super) unsafe fn decode_bool<const BY_REF: bool>(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
) -> Result<ManagedValue, MarshalError> {
    if BY_REF {
        read_bool_ref(ctx, slot)
    } else {
        sentinel_to_bool(slot).map(ManagedValue::Bool)
    }
}

pub(super) unsafe fn write_back_bool(
    _: &MarshalStrategy,
    ctx: &MarshalContext<'_>,
    slot: *mut c_void,
    value: &ManagedValue,
) -> Result<StagedWrite, MarshalError> {
    write_bool_ref(ctx, slot, value)
}

pub(super) fn encode_bool_return(
    _: &MarshalStrategy,
    _: &MarshalContext<'_>,
    value: ManagedValue,
) -> Result<*mut c_void, MarshalError> {
    encode_bool(&value)
}
