//! Error taxonomy for the bridge
//!
//! Every failure surfaces to the immediate caller of `invoke`. Nothing is
//! retried and no error leaves the handle table or thunk cache in a
//! partially updated state.

use core::fmt;
use std::any::Any;

use crate::handles::Handle;
use crate::registry::MethodToken;
use crate::types::TypeName;

/// Malformed native-side data detected while decoding or writing a slot
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalError {
    NullPointer,
    Misaligned { address: usize, align: usize },
    /// By-value bool slot holding neither sentinel
    InvalidBool { bits: usize },
    InvalidUtf8,
    /// String containing an interior NUL cannot cross as a C string
    InteriorNul,
    /// Handle token that does not resolve to a live object
    UnresolvedHandle(Handle),
    /// Managed value does not fit the declared slot type
    TypeMismatch { expected: String, found: &'static str },
    /// Owned array written back into a native array of another length
    LengthMismatch { expected: usize, found: usize },
    ReceiverMismatch { expected: TypeName, found: TypeName },
}

impl MarshalError {
    /// Attach the slot position, turning unresolved handles into `InvalidHandle`
    pub(crate) fn at(self, position: SlotPosition) -> BridgeError {
        match self {
            Self::UnresolvedHandle(handle) => BridgeError::InvalidHandle { handle },
            error => BridgeError::Marshal { position, error },
        }
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullPointer => write!(f, "unexpected null pointer"),
            Self::Misaligned { address, align } => {
                write!(f, "pointer {:#x} is not aligned to {} bytes", address, align)
            }
            Self::InvalidBool { bits } => {
                write!(f, "slot value {:#x} is not a boolean sentinel", bits)
            }
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::InteriorNul => write!(f, "string contains an interior NUL byte"),
            Self::UnresolvedHandle(handle) => write!(f, "handle {} does not resolve", handle),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {} value, found {}", expected, found)
            }
            Self::LengthMismatch { expected, found } => {
                write!(f, "array length {} does not match native length {}", found, expected)
            }
            Self::ReceiverMismatch { expected, found } => {
                write!(f, "receiver is {}, method belongs to {}", found, expected)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

/// Where in a call a marshaling failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPosition {
    Receiver,
    Param(usize),
    Return,
}

impl fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiver => write!(f, "receiver"),
            Self::Param(index) => write!(f, "parameter {}", index),
            Self::Return => write!(f, "return value"),
        }
    }
}

/// Error raised by the managed method itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFault {
    /// Managed exception type, e.g. `ArgumentException`
    pub kind: String,
    pub message: String,
}

impl ManagedFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn invalid_cast(expected: &str, found: &str) -> Self {
        Self::new(
            "InvalidCastException",
            format!("cannot convert {} to {}", found, expected),
        )
    }

    pub fn argument_out_of_range(index: usize, count: usize) -> Self {
        Self::new(
            "ArgumentOutOfRangeException",
            format!("argument {} requested, method has {}", index, count),
        )
    }

    pub fn null_reference(what: &str) -> Self {
        Self::new("NullReferenceException", format!("{} is null", what))
    }

    /// Convert a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "managed method panicked".to_string()
        };
        Self::new("Panic", message)
    }
}

impl fmt::Display for ManagedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ManagedFault {}

/// Top-level bridge error
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Parameter or return shape cannot be marshaled; fatal for that method only
    UnsupportedSignature { method: String, reason: String },
    InvalidHandle { handle: Handle },
    Marshal { position: SlotPosition, error: MarshalError },
    ManagedFault(ManagedFault),
    UnknownMethod { token: MethodToken },
    NotInitialized,
    Config(String),
}

impl BridgeError {
    /// Stable code reported through the C ABI
    pub const fn error_code(&self) -> i32 {
        match self {
            Self::UnsupportedSignature { .. } => -1,
            Self::InvalidHandle { .. } => -2,
            Self::Marshal { .. } => -3,
            Self::ManagedFault(_) => -4,
            Self::UnknownMethod { .. } => -5,
            Self::NotInitialized => -6,
            Self::Config(_) => -7,
        }
    }

    /// Whether a later call with the same method can succeed
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnsupportedSignature { .. } | Self::UnknownMethod { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSignature { method, reason } => {
                write!(f, "unsupported signature for {}: {}", method, reason)
            }
            Self::InvalidHandle { handle } => write!(f, "invalid handle {}", handle),
            Self::Marshal { position, error } => write!(f, "marshaling {} failed: {}", position, error),
            Self::ManagedFault(fault) => write!(f, "managed fault: {}", fault),
            Self::UnknownMethod { token } => write!(f, "no method registered for token {}", token),
            Self::NotInitialized => write!(f, "bridge is not initialized"),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Marshal { error, .. } => Some(error),
            Self::ManagedFault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<ManagedFault> for BridgeError {
    fn from(fault: ManagedFault) -> Self {
        Self::ManagedFault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_handle_maps_to_invalid_handle() {
        let handle = Handle::from_raw(0x1_0000_0004);
        let err = MarshalError::UnresolvedHandle(handle).at(SlotPosition::Param(0));
        assert_eq!(err, BridgeError::InvalidHandle { handle });

        let err = MarshalError::NullPointer.at(SlotPosition::Param(2));
        assert!(matches!(
            err,
            BridgeError::Marshal { position: SlotPosition::Param(2), error: MarshalError::NullPointer }
        ));
    }

    #[test]
    fn test_error_codes_distinct() {
        let errors = [
            BridgeError::UnsupportedSignature { method: "m".into(), reason: "r".into() },
            BridgeError::InvalidHandle { handle: Handle::NULL },
            BridgeError::Marshal { position: SlotPosition::Return, error: MarshalError::InvalidUtf8 },
            BridgeError::ManagedFault(ManagedFault::new("E", "boom")),
            BridgeError::UnknownMethod { token: MethodToken::from_raw(9) },
            BridgeError::NotInitialized,
            BridgeError::Config("bad".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(BridgeError::error_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c < 0));
    }

    #[test]
    fn test_panic_payload_message() {
        let fault = ManagedFault::from_panic(Box::new("exploded"));
        assert_eq!(fault.kind, "Panic");
        assert_eq!(fault.message, "exploded");

        let fault = ManagedFault::from_panic(Box::new(String::from("owned")));
        assert_eq!(fault.message, "owned");
    }

    #[test]
    fn test_recoverability() {
        assert!(BridgeError::InvalidHandle { handle: Handle::NULL }.is_recoverable());
        assert!(!BridgeError::UnsupportedSignature { method: "m".into(), reason: "r".into() }
            .is_recoverable());
    }
}
