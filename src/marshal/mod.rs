//! Value marshaling between native parameter slots and managed values
//!
//! Every parameter crosses as one pointer-width slot. What the slot holds
//! depends on the declared shape:
//!
//! | shape     | by value                        | by reference          |
//! |-----------|---------------------------------|-----------------------|
//! | scalar    | the value's bits, inline        | `*mut T`              |
//! | bool      | one of two sentinel pointers    | `*mut bool`           |
//! | string    | `*const c_char` (null = null)   | `*mut *mut c_char`    |
//! | object    | handle token (0 = null)         | `*mut usize`          |
//! | array     | `*mut NativeArray`              | `*mut NativeArray`    |
//! | pointer   | the address                     | `*mut *mut c_void`    |
//!
//! A [`MarshalStrategy`] is chosen from the static type. The specialized
//! thunk path bakes the strategy's codec function pointers at synthesis;
//! the generic path calls [`MarshalStrategy::to_managed`] and friends,
//! which dispatch on the strategy every time.
//!
//! By-reference writes are staged rather than applied (see `staged`), so a
//! call that fails part way leaves native memory untouched.

use std::ffi::c_void;
use std::mem;

use crate::error::MarshalError;
use crate::handles::HandleTable;
use crate::managed::ManagedValue;
use crate::types::ManagedType;

mod array;
mod object;
pub mod scalar;
mod staged;
mod string;

pub use array::NativeArray;
pub use scalar::{bool_sentinel, Scalar, ScalarKind};
pub use string::free_c_string;

pub(crate) use staged::{Outbound, StagedWrite};

use scalar::with_scalar;

/// Decode one slot into a managed value
pub(crate) type DecodeFn =
    unsafe fn(&MarshalStrategy, &MarshalContext<'_>, *mut c_void) -> Result<ManagedValue, MarshalError>;

/// Validate and encode a write back through a by-reference slot
pub(crate) type WriteFn = unsafe fn(
    &MarshalStrategy,
    &MarshalContext<'_>,
    *mut c_void,
    &ManagedValue,
) -> Result<StagedWrite, MarshalError>;

/// Encode a managed value as a by-value slot (returns, array elements)
pub(crate) type EncodeFn =
    fn(&MarshalStrategy, &MarshalContext<'_>, ManagedValue) -> Result<*mut c_void, MarshalError>;

/// Per-call marshaling environment
#[derive(Clone, Copy)]
pub struct MarshalContext<'a> {
    handles: &'a HandleTable,
    check_alignment: bool,
    outbound: Option<&'a Outbound>,
}

impl<'a> MarshalContext<'a> {
    pub fn new(handles: &'a HandleTable, check_alignment: bool) -> Self {
        Self {
            handles,
            check_alignment,
            outbound: None,
        }
    }

    /// Same context, with handle retention decided by a finished call's scan
    pub(crate) fn with_outbound<'b>(&self, outbound: &'b Outbound) -> MarshalContext<'b>
    where
        'a: 'b,
    {
        MarshalContext {
            handles: self.handles,
            check_alignment: self.check_alignment,
            outbound: Some(outbound),
        }
    }

    #[inline]
    pub fn handles(&self) -> &'a HandleTable {
        self.handles
    }

    /// Non-null pointer to a `T`, alignment checked when enabled
    #[inline]
    pub(crate) fn checked<T>(&self, slot: *mut c_void) -> Result<*mut T, MarshalError> {
        if slot.is_null() {
            return Err(MarshalError::NullPointer);
        }
        self.check_align(slot, mem::align_of::<T>())?;
        Ok(slot.cast())
    }

    #[inline]
    pub(crate) fn check_align(&self, ptr: *mut c_void, align: usize) -> Result<(), MarshalError> {
        let address = ptr as usize;
        if self.check_alignment && address % align != 0 {
            return Err(MarshalError::Misaligned { address, align });
        }
        Ok(())
    }
}

/// How a declared type crosses the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalStrategy {
    Scalar(ScalarKind),
    Bool,
    String,
    Object,
    Array {
        element: Box<MarshalStrategy>,
        element_type: ManagedType,
    },
    Pointer,
}

impl MarshalStrategy {
    /// Pick the strategy for a slot type; the error is the rejection reason
    pub fn select(ty: &ManagedType) -> Result<Self, String> {
        if let Some(kind) = ScalarKind::from_managed_type(ty) {
            return Ok(Self::Scalar(kind));
        }
        match ty {
            ManagedType::Bool => Ok(Self::Bool),
            ManagedType::String => Ok(Self::String),
            ManagedType::Object(_) => Ok(Self::Object),
            ManagedType::Pointer => Ok(Self::Pointer),
            ManagedType::Array(element) => match element.as_ref() {
                ManagedType::Array(_) => Err(format!("nested array {} is not supported", ty)),
                ManagedType::Void => Err("array of void".to_string()),
                ManagedType::ValueType(name) => {
                    Err(format!("array of by-value struct {} is not supported", name))
                }
                other => Ok(Self::Array {
                    element: Box::new(Self::select(other)?),
                    element_type: other.clone(),
                }),
            },
            ManagedType::ValueType(name) => Err(format!("by-value struct {} has no marshaler", name)),
            ManagedType::Void => Err("void is not a parameter type".to_string()),
            _ => Err(format!("no marshaler for {}", ty)),
        }
    }

    /// Native and managed layouts coincide
    pub fn is_blittable(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Decode a slot
    ///
    /// # Safety
    /// `slot` must follow the slot convention for this strategy and
    /// `by_ref`; any pointer it carries must be valid for the access.
    pub unsafe fn to_managed(
        &self,
        ctx: &MarshalContext<'_>,
        slot: *mut c_void,
        by_ref: bool,
    ) -> Result<ManagedValue, MarshalError> {
        match self {
            Self::Scalar(kind) => with_scalar!(*kind, T => {
                if by_ref {
                    scalar::read_ref::<T>(ctx, slot)
                } else {
                    Ok(scalar::read_value::<T>(slot))
                }
            }),
            Self::Bool if by_ref => scalar::read_bool_ref(ctx, slot),
            Self::Bool => scalar::sentinel_to_bool(slot).map(ManagedValue::Bool),
            Self::String if by_ref => string::decode::<true>(self, ctx, slot),
            Self::String => string::decode::<false>(self, ctx, slot),
            Self::Object if by_ref => object::decode::<true>(self, ctx, slot),
            Self::Object => object::decode::<false>(self, ctx, slot),
            Self::Array { .. } => array::decode(self, ctx, slot),
            Self::Pointer if by_ref => object::decode_pointer::<true>(self, ctx, slot),
            Self::Pointer => object::decode_pointer::<false>(self, ctx, slot),
        }
    }

    /// Write `value` back through a by-reference slot
    ///
    /// # Safety
    /// `slot` must be a by-reference slot for this strategy, valid for writes.
    pub unsafe fn to_native(
        &self,
        ctx: &MarshalContext<'_>,
        slot: *mut c_void,
        value: &ManagedValue,
    ) -> Result<(), MarshalError> {
        self.stage(ctx, slot, value)?.commit();
        Ok(())
    }

    /// Validate and encode a by-reference write without applying it
    pub(crate) unsafe fn stage(
        &self,
        ctx: &MarshalContext<'_>,
        slot: *mut c_void,
        value: &ManagedValue,
    ) -> Result<StagedWrite, MarshalError> {
        match self {
            Self::Scalar(kind) => with_scalar!(*kind, T => scalar::write_ref::<T>(ctx, slot, value)),
            Self::Bool => scalar::write_bool_ref(ctx, slot, value),
            Self::String => string::write_back(self, ctx, slot, value),
            Self::Object => object::write_back(self, ctx, slot, value),
            Self::Array { .. } => array::write_back(self, ctx, slot, value),
            Self::Pointer => object::write_back_pointer(self, ctx, slot, value),
        }
    }

    /// Encode `value` as a by-value slot
    pub fn encode(&self, ctx: &MarshalContext<'_>, value: ManagedValue) -> Result<*mut c_void, MarshalError> {
        match self {
            Self::Scalar(kind) => with_scalar!(*kind, T => scalar::encode_value::<T>(&value)),
            Self::Bool => scalar::encode_bool(&value),
            Self::String => string::encode(self, ctx, value),
            Self::Object => object::encode(self, ctx, value),
            Self::Array { .. } => array::encode(self, ctx, value),
            Self::Pointer => object::encode_pointer(self, ctx, value),
        }
    }

    /// Monomorphized decoder for the specialized path
    pub(crate) fn decoder(&self, by_ref: bool) -> DecodeFn {
        match (self, by_ref) {
            (Self::Scalar(kind), false) => with_scalar!(*kind, T => scalar::decode::<T, false> as DecodeFn),
            (Self::Scalar(kind), true) => with_scalar!(*kind, T => scalar::decode::<T, true> as DecodeFn),
            (Self::Bool, false) => scalar::decode_bool::<false>,
            (Self::Bool, true) => scalar::decode_bool::<true>,
            (Self::String, false) => string::decode::<false>,
            (Self::String, true) => string::decode::<true>,
            (Self::Object, false) => object::decode::<false>,
            (Self::Object, true) => object::decode::<true>,
            (Self::Array { .. }, _) => array::decode,
            (Self::Pointer, false) => object::decode_pointer::<false>,
            (Self::Pointer, true) => object::decode_pointer::<true>,
        }
    }

    /// Write-back step, only baked for by-reference slots
    pub(crate) fn writer(&self) -> WriteFn {
        match self {
            Self::Scalar(kind) => with_scalar!(*kind, T => scalar::write_back::<T> as WriteFn),
            Self::Bool => scalar::write_back_bool,
            Self::String => string::write_back,
            Self::Object => object::write_back,
            Self::Array { .. } => array::write_back,
            Self::Pointer => object::write_back_pointer,
        }
    }

    pub(crate) fn encoder(&self) -> EncodeFn {
        match self {
            Self::Scalar(kind) => with_scalar!(*kind, T => scalar::encode::<T> as EncodeFn),
            Self::Bool => scalar::encode_bool_return,
            Self::String => string::encode,
            Self::Object => object::encode,
            Self::Array { .. } => array::encode,
            Self::Pointer => object::encode_pointer,
        }
    }
}
