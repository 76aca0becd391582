//! Minimal model of the managed runtime the bridge calls into
//!
//! - `value.rs` - tagged values (`ManagedValue`) and typed extraction
//! - `object.rs` - reference-counted heap objects, strong and weak refs
//! - `array.rs` - owned arrays and wrapped views over native memory
//! - `method.rs` - method bodies and the per-call `Invocation`

mod array;
mod method;
mod object;
mod value;

pub use array::ManagedArray;
pub use method::{Invocation, ManagedMethod};
pub use object::{ManagedObject, ObjectRef, WeakObjectRef};
pub use value::{FromManaged, ManagedValue};
