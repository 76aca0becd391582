//! Reference-counted managed heap objects
//!
//! An object is collected when its last `ObjectRef` drops. Weak references
//! (`WeakObjectRef`) stop upgrading at that point, which is how weak handles
//! observe collection.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::array::ManagedArray;
use crate::types::TypeName;

pub struct ManagedObject {
    type_name: TypeName,
    body: ObjectBody,
}

enum ObjectBody {
    Instance(RwLock<Box<dyn Any + Send + Sync>>),
    Array(ManagedArray),
}

/// Strong reference to a managed object
#[derive(Clone)]
pub struct ObjectRef(Arc<ManagedObject>);

impl ObjectRef {
    /// Allocate an instance of `type_name` carrying `state`
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<TypeName>, state: T) -> Self {
        Self(Arc::new(ManagedObject {
            type_name: type_name.into(),
            body: ObjectBody::Instance(RwLock::new(Box::new(state))),
        }))
    }

    /// Allocate an array object; its type name is `element[]`
    pub fn new_array(array: ManagedArray) -> Self {
        let type_name = TypeName::from(format!("{}[]", array.element_type()));
        Self(Arc::new(ManagedObject {
            type_name,
            body: ObjectBody::Array(array),
        }))
    }

    #[inline]
    pub fn type_name(&self) -> &TypeName {
        &self.0.type_name
    }

    pub fn as_array(&self) -> Option<&ManagedArray> {
        match &self.0.body {
            ObjectBody::Array(array) => Some(array),
            ObjectBody::Instance(_) => None,
        }
    }

    /// Read the instance state if it is a `T`
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &self.0.body {
            ObjectBody::Instance(state) => state.read().downcast_ref::<T>().map(f),
            ObjectBody::Array(_) => None,
        }
    }

    /// Mutate the instance state if it is a `T`
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match &self.0.body {
            ObjectBody::Instance(state) => state.write().downcast_mut::<T>().map(f),
            ObjectBody::Array(_) => None,
        }
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address of the object while any reference to it exists
    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type", &self.0.type_name)
            .field("addr", &format_args!("{:#x}", self.addr()))
            .finish()
    }
}

/// Non-owning reference; fails to upgrade once the object is collected
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ManagedObject>);

impl WeakObjectRef {
    #[inline]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    /// Address of the referenced allocation, valid as an identity key
    /// until this weak reference is dropped
    #[inline]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub fn is_collected(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef({:#x})", self.addr())
    }
}
