//! Managed method bodies and the per-call invocation context

use std::fmt;
use std::sync::Arc;

use super::object::ObjectRef;
use super::value::{FromManaged, ManagedValue};
use crate::error::ManagedFault;

type MethodFn = dyn Fn(&mut Invocation<'_>) -> Result<ManagedValue, ManagedFault> + Send + Sync;

/// Body of a bound managed method
#[derive(Clone)]
pub struct ManagedMethod(Arc<MethodFn>);

impl ManagedMethod {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<ManagedValue, ManagedFault> + Send + Sync + 'static,
    {
        Self(Arc::new(body))
    }

    #[inline]
    pub fn call(&self, invocation: &mut Invocation<'_>) -> Result<ManagedValue, ManagedFault> {
        (self.0)(invocation)
    }
}

impl fmt::Debug for ManagedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedMethod({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Receiver and arguments of one managed call
///
/// Arguments written with `set_arg` are what by-reference slots copy back
/// to native memory once the body returns.
pub struct Invocation<'a> {
    this: Option<&'a ObjectRef>,
    args: &'a mut [ManagedValue],
}

impl<'a> Invocation<'a> {
    pub fn new(this: Option<&'a ObjectRef>, args: &'a mut [ManagedValue]) -> Self {
        Self { this, args }
    }

    /// Receiver of an instance method
    pub fn this(&self) -> Result<&ObjectRef, ManagedFault> {
        self.this.ok_or_else(|| ManagedFault::null_reference("this"))
    }

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg_value(&self, index: usize) -> Result<&ManagedValue, ManagedFault> {
        self.args
            .get(index)
            .ok_or_else(|| ManagedFault::argument_out_of_range(index, self.args.len()))
    }

    pub fn arg<T: FromManaged>(&self, index: usize) -> Result<T, ManagedFault> {
        let value = self.arg_value(index)?;
        T::from_managed(value).ok_or_else(|| ManagedFault::invalid_cast(T::EXPECTED, value.type_label()))
    }

    /// Replace an argument, the output half of a by-reference parameter
    pub fn set_arg(&mut self, index: usize, value: impl Into<ManagedValue>) -> Result<(), ManagedFault> {
        let count = self.args.len();
        let slot = self
            .args
            .get_mut(index)
            .ok_or_else(|| ManagedFault::argument_out_of_range(index, count))?;
        *slot = value.into();
        Ok(())
    }

    pub fn args(&self) -> &[ManagedValue] {
        self.args
    }
}
