//! Managed type descriptors and method identities
//!
//! A `MethodIdentity` is the structural description of a bound managed
//! method. It is the key of the thunk cache, so equality and hashing cover
//! every field.

use std::fmt;
use std::sync::Arc;

/// Name of a managed type (cheap to clone, compared by content)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName(Arc<str>);

impl TypeName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// Static type of a parameter or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManagedType {
    Void,
    Bool,
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
    String,
    /// Reference to a managed class instance
    Object(TypeName),
    /// Single-dimension array
    Array(Box<ManagedType>),
    /// Opaque native address
    Pointer,
    /// By-value struct. No marshaler exists for these.
    ValueType(TypeName),
}

impl ManagedType {
    pub fn object(name: impl Into<TypeName>) -> Self {
        Self::Object(name.into())
    }

    pub fn array_of(element: ManagedType) -> Self {
        Self::Array(Box::new(element))
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl fmt::Display for ManagedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("bool"),
            Self::I8 => f.write_str("sbyte"),
            Self::I16 => f.write_str("short"),
            Self::I32 => f.write_str("int"),
            Self::I64 => f.write_str("long"),
            Self::U8 => f.write_str("byte"),
            Self::U16 => f.write_str("ushort"),
            Self::U32 => f.write_str("uint"),
            Self::U64 => f.write_str("ulong"),
            Self::F32 => f.write_str("float"),
            Self::F64 => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::Object(name) => write!(f, "{}", name),
            Self::Array(element) => write!(f, "{}[]", element),
            Self::Pointer => f.write_str("void*"),
            Self::ValueType(name) => write!(f, "struct {}", name),
        }
    }
}

/// Declared parameter: type plus by-reference flag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamType {
    pub ty: ManagedType,
    pub by_ref: bool,
}

impl ParamType {
    pub fn value(ty: ManagedType) -> Self {
        Self { ty, by_ref: false }
    }

    pub fn reference(ty: ManagedType) -> Self {
        Self { ty, by_ref: true }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.by_ref {
            write!(f, "ref {}", self.ty)
        } else {
            write!(f, "{}", self.ty)
        }
    }
}

/// Structural descriptor of a bound managed method
///
/// Built once at registration with the builder methods:
///
/// ```
/// use managed_bridge::{ManagedType, MethodIdentity};
///
/// let add = MethodIdentity::new_static("Math", "add")
///     .param(ManagedType::I32)
///     .param(ManagedType::I32)
///     .returns(ManagedType::I32);
/// assert_eq!(add.arity(), 2);
/// assert!(add.has_return());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodIdentity {
    declaring_type: TypeName,
    name: Arc<str>,
    is_static: bool,
    params: Vec<ParamType>,
    return_type: ManagedType,
}

impl MethodIdentity {
    pub fn new_static(declaring_type: impl Into<TypeName>, name: impl AsRef<str>) -> Self {
        Self::new(declaring_type.into(), name.as_ref(), true)
    }

    pub fn new_instance(declaring_type: impl Into<TypeName>, name: impl AsRef<str>) -> Self {
        Self::new(declaring_type.into(), name.as_ref(), false)
    }

    fn new(declaring_type: TypeName, name: &str, is_static: bool) -> Self {
        Self {
            declaring_type,
            name: Arc::from(name),
            is_static,
            params: Vec::new(),
            return_type: ManagedType::Void,
        }
    }

    /// Append a by-value parameter
    pub fn param(mut self, ty: ManagedType) -> Self {
        self.params.push(ParamType::value(ty));
        self
    }

    /// Append a by-reference parameter
    pub fn param_ref(mut self, ty: ManagedType) -> Self {
        self.params.push(ParamType::reference(ty));
        self
    }

    pub fn returns(mut self, ty: ManagedType) -> Self {
        self.return_type = ty;
        self
    }

    #[inline]
    pub fn declaring_type(&self) -> &TypeName {
        &self.declaring_type
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[inline]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn return_type(&self) -> &ManagedType {
        &self.return_type
    }

    #[inline]
    pub fn has_return(&self) -> bool {
        !self.return_type.is_void()
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            f.write_str("static ")?;
        }
        write!(f, "{} {}::{}(", self.return_type, self.declaring_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")
    }
}
