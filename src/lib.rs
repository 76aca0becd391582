//! Managed Bridge - native-to-managed method invocation
//!
//! Native code calls methods living in a managed runtime through one
//! uniform, non-reflective calling convention:
//!
//! ```text
//! invoke(method token, instance handle, params: *mut *mut c_void) -> *mut c_void
//! ```
//!
//! Components, leaves first:
//! - `handles` - opaque strong/weak tokens for managed objects
//! - `marshal` - per-shape slot <-> value conversion, by-ref write-back
//! - `thunk` - per-method call adapters and the single-flight cache
//! - `registry` - method tokens
//! - `dispatch` - the `Bridge` tying them together
//! - `ffi` - C ABI over a process-wide `Bridge`
//!
//! Thunks are synthesized on first call and cached for the life of the
//! process, so per-call cost after that is slot decoding and the managed
//! body itself.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("managed-bridge packs handle generations into the upper half of a 64-bit slot");

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod logging;
pub mod managed;
pub mod marshal;
pub mod registry;
pub mod thunk;
pub mod types;

pub use config::BridgeConfig;
pub use dispatch::Bridge;
pub use error::{BridgeError, ManagedFault, MarshalError, SlotPosition};
pub use handles::{Handle, HandleStats, HandleTable, Retention};
pub use managed::{FromManaged, Invocation, ManagedArray, ManagedMethod, ManagedValue, ObjectRef, WeakObjectRef};
pub use marshal::{bool_sentinel, MarshalContext, MarshalStrategy, NativeArray, ScalarKind};
pub use registry::{MethodRegistry, MethodToken};
pub use thunk::{Thunk, ThunkEntry};
pub use types::{ManagedType, MethodIdentity, ParamType, TypeName};
