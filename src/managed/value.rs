//! Tagged runtime values crossing the managed side of the bridge

use std::fmt;

use super::object::ObjectRef;

/// A managed value as seen by a method body
///
/// Primitive variants are stored inline; only strings and object references
/// own heap data.
#[derive(Clone)]
pub enum ManagedValue {
    Void,
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Object(ObjectRef),
    /// Opaque native address
    Pointer(usize),
}

impl ManagedValue {
    /// Short label used in mismatch diagnostics
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "sbyte",
            Self::I16(_) => "short",
            Self::I32(_) => "int",
            Self::I64(_) => "long",
            Self::U8(_) => "byte",
            Self::U16(_) => "ushort",
            Self::U32(_) => "uint",
            Self::U64(_) => "ulong",
            Self::F32(_) => "float",
            Self::F64(_) => "double",
            Self::String(_) => "string",
            Self::Object(obj) if obj.as_array().is_some() => "array",
            Self::Object(_) => "object",
            Self::Pointer(_) => "pointer",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for ManagedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("Void"),
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => write!(f, "Bool({})", v),
            Self::I8(v) => write!(f, "I8({})", v),
            Self::I16(v) => write!(f, "I16({})", v),
            Self::I32(v) => write!(f, "I32({})", v),
            Self::I64(v) => write!(f, "I64({})", v),
            Self::U8(v) => write!(f, "U8({})", v),
            Self::U16(v) => write!(f, "U16({})", v),
            Self::U32(v) => write!(f, "U32({})", v),
            Self::U64(v) => write!(f, "U64({})", v),
            Self::F32(v) => write!(f, "F32({})", v),
            Self::F64(v) => write!(f, "F64({})", v),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Object(obj) => write!(f, "Object({})", obj.type_name()),
            Self::Pointer(addr) => write!(f, "Pointer({:#x})", addr),
        }
    }
}

/// Identity for objects, bitwise for floats
impl PartialEq for ManagedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::U8(a), Self::U8(b)) => a == b,
            (Self::U16(a), Self::U16(b)) => a == b,
            (Self::U32(a), Self::U32(b)) => a == b,
            (Self::U64(a), Self::U64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ManagedValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl FromManaged for $ty {
                const EXPECTED: &'static str = stringify!($ty);

                #[inline]
                fn from_managed(value: &ManagedValue) -> Option<Self> {
                    match value {
                        ManagedValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl From<String> for ManagedValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ManagedValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<ObjectRef> for ManagedValue {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<Option<ObjectRef>> for ManagedValue {
    fn from(value: Option<ObjectRef>) -> Self {
        value.map_or(Self::Null, Self::Object)
    }
}

impl From<()> for ManagedValue {
    fn from(_: ()) -> Self {
        Self::Void
    }
}

/// Typed extraction of an argument
pub trait FromManaged: Sized {
    /// Name reported when the conversion fails
    const EXPECTED: &'static str;

    fn from_managed(value: &ManagedValue) -> Option<Self>;
}

impl FromManaged for String {
    const EXPECTED: &'static str = "string";

    fn from_managed(value: &ManagedValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromManaged for ObjectRef {
    const EXPECTED: &'static str = "object";

    fn from_managed(value: &ManagedValue) -> Option<Self> {
        value.as_object().cloned()
    }
}

/// `Null` converts to `None`
impl FromManaged for Option<ObjectRef> {
    const EXPECTED: &'static str = "object or null";

    fn from_managed(value: &ManagedValue) -> Option<Self> {
        match value {
            ManagedValue::Null => Some(None),
            ManagedValue::Object(obj) => Some(Some(obj.clone())),
            _ => None,
        }
    }
}

impl FromManaged for ManagedValue {
    const EXPECTED: &'static str = "value";

    fn from_managed(value: &ManagedValue) -> Option<Self> {
        Some(value.clone())
    }
}
