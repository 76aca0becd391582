//! Call thunks - reusable adapters bound to one method identity
//!
//! Architecture:
//! - `synth.rs` - builds a `Thunk` from a `MethodIdentity`
//! - `cache.rs` - single-flight, process-lifetime identity -> thunk map
//!
//! A thunk carries two substitutable paths over the same marshaling leaves:
//! the specialized path walks per-slot codecs baked at synthesis, the
//! generic path re-derives every strategy from the identity on each call.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::{fmt, iter, ptr};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{BridgeError, ManagedFault, MarshalError, SlotPosition};
use crate::handles::{Handle, HandleTable};
use crate::managed::{Invocation, ManagedArray, ManagedMethod, ManagedValue, ObjectRef, WeakObjectRef};
use crate::marshal::{DecodeFn, EncodeFn, MarshalContext, MarshalStrategy, Outbound, StagedWrite, WriteFn};
use crate::types::{ManagedType, MethodIdentity};

mod cache;
mod synth;

pub use cache::ThunkCache;
pub use synth::ThunkSynthesizer;

/// Fixed native entry point of a specialized thunk
///
/// Returns null on failure and records the error for `bridge_last_error`.
pub type ThunkEntry =
    unsafe extern "C" fn(thunk: *const Thunk, instance: usize, params: *mut *mut c_void) -> *mut c_void;

type Args = SmallVec<[ManagedValue; 8]>;

/// By-ref slot index with the strategy and step that writes it back
type Writer<'s> = (usize, &'s MarshalStrategy, WriteFn);

/// Marshaling step for one parameter position
pub(crate) struct SlotCodec {
    strategy: MarshalStrategy,
    decode: DecodeFn,
    write_back: Option<WriteFn>,
}

impl SlotCodec {
    pub(crate) fn new(strategy: MarshalStrategy, by_ref: bool) -> Self {
        Self {
            decode: strategy.decoder(by_ref),
            write_back: by_ref.then(|| strategy.writer()),
            strategy,
        }
    }
}

pub(crate) struct ReturnCodec {
    strategy: MarshalStrategy,
    encode: EncodeFn,
}

impl ReturnCodec {
    pub(crate) fn new(strategy: MarshalStrategy) -> Self {
        Self {
            encode: strategy.encoder(),
            strategy,
        }
    }
}

/// Per-thunk call options fixed at synthesis
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThunkOptions {
    pub check_alignment: bool,
    pub catch_panics: bool,
}

pub struct Thunk {
    identity: MethodIdentity,
    body: ManagedMethod,
    slots: SmallVec<[SlotCodec; 4]>,
    ret: Option<ReturnCodec>,
    options: ThunkOptions,
    handles: Arc<HandleTable>,
}

impl Thunk {
    pub(crate) fn new(
        identity: MethodIdentity,
        body: ManagedMethod,
        slots: SmallVec<[SlotCodec; 4]>,
        ret: Option<ReturnCodec>,
        options: ThunkOptions,
        handles: Arc<HandleTable>,
    ) -> Self {
        Self {
            identity,
            body,
            slots,
            ret,
            options,
            handles,
        }
    }

    #[inline]
    pub fn identity(&self) -> &MethodIdentity {
        &self.identity
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Native entry point for the specialized path
    #[inline]
    pub fn entry(&self) -> ThunkEntry {
        specialized_entry
    }

    fn context(&self) -> MarshalContext<'_> {
        MarshalContext::new(&self.handles, self.options.check_alignment)
    }

    /// Run the call through the specialized path
    ///
    /// # Safety
    /// `params` must point to `arity()` slots laid out as the identity
    /// declares; pointers inside them must be valid for the access.
    pub unsafe fn call(&self, instance: Handle, params: *mut *mut c_void) -> Result<*mut c_void, BridgeError> {
        let ctx = self.context();
        let this = self.receiver(&ctx, instance)?;
        let slots = self.slot_array(params)?;

        let mut args: Args = SmallVec::with_capacity(self.slots.len());
        for (i, codec) in self.slots.iter().enumerate() {
            let value = (codec.decode)(&codec.strategy, &ctx, slots.add(i).read())
                .map_err(|e| e.at(SlotPosition::Param(i)))?;
            args.push(value);
        }

        let writes: SmallVec<[Writer<'_>; 4]> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, codec)| codec.write_back.map(|write| (i, &codec.strategy, write)))
            .collect();
        let ret = self.ret.as_ref().map(|ret| (&ret.strategy, ret.encode));
        self.finish(&ctx, slots, this, args, &writes, ret)
    }

    /// Run the call through the generic path
    ///
    /// # Safety
    /// Same contract as [`Thunk::call`].
    pub unsafe fn call_generic(
        &self,
        instance: Handle,
        params: *mut *mut c_void,
    ) -> Result<*mut c_void, BridgeError> {
        let ctx = self.context();
        let this = self.receiver(&ctx, instance)?;
        let slots = self.slot_array(params)?;

        let declared = self.identity.params();
        let mut strategies: SmallVec<[MarshalStrategy; 4]> = SmallVec::with_capacity(declared.len());
        let mut args: Args = SmallVec::with_capacity(declared.len());
        for (i, param) in declared.iter().enumerate() {
            let strategy = self.select(&param.ty)?;
            let value = strategy
                .to_managed(&ctx, slots.add(i).read(), param.by_ref)
                .map_err(|e| e.at(SlotPosition::Param(i)))?;
            args.push(value);
            strategies.push(strategy);
        }

        let writes: SmallVec<[Writer<'_>; 4]> = declared
            .iter()
            .zip(&strategies)
            .enumerate()
            .filter(|(_, (param, _))| param.by_ref)
            .map(|(i, (_, strategy))| (i, strategy, MarshalStrategy::stage as WriteFn))
            .collect();
        let returns = match self.identity.has_return() {
            true => Some(self.select(self.identity.return_type())?),
            false => None,
        };
        let ret = returns.as_ref().map(|strategy| (strategy, MarshalStrategy::encode as EncodeFn));
        self.finish(&ctx, slots, this, args, &writes, ret)
    }

    /// Invoke the body, settle the outbound values, then detach wrapped arrays
    ///
    /// Arrays wrapping caller memory are snapshotted whatever the outcome, so
    /// a body that kept one never reads the caller's buffer after return.
    unsafe fn finish(
        &self,
        ctx: &MarshalContext<'_>,
        slots: *mut *mut c_void,
        this: Option<ObjectRef>,
        mut args: Args,
        writes: &[Writer<'_>],
        ret: Option<(&MarshalStrategy, EncodeFn)>,
    ) -> Result<*mut c_void, BridgeError> {
        let wrapped: SmallVec<[WeakObjectRef; 2]> = args
            .iter()
            .filter_map(ManagedValue::as_object)
            .filter(|obj| obj.as_array().is_some_and(ManagedArray::is_wrapped))
            .map(ObjectRef::downgrade)
            .collect();

        let outcome = match self.run(this, &mut args) {
            Ok(result) => self.settle(ctx, slots, args, result, writes, ret),
            Err(e) => Err(e),
        };

        for obj in wrapped.iter().filter_map(WeakObjectRef::upgrade) {
            if let Some(array) = obj.as_array() {
                array.detach();
            }
        }
        outcome
    }

    /// Stage every by-ref write and the return value, commit only if all succeed
    unsafe fn settle(
        &self,
        ctx: &MarshalContext<'_>,
        slots: *mut *mut c_void,
        mut args: Args,
        result: ManagedValue,
        writes: &[Writer<'_>],
        ret: Option<(&MarshalStrategy, EncodeFn)>,
    ) -> Result<*mut c_void, BridgeError> {
        // release what does not leave the call before deciding retention
        for (i, arg) in args.iter_mut().enumerate() {
            if !writes.iter().any(|(slot, ..)| *slot == i) {
                *arg = ManagedValue::Void;
            }
        }
        let result = if ret.is_some() { result } else { ManagedValue::Void };

        let outbound = Outbound::scan(args.iter().chain(iter::once(&result)));
        let ctx = ctx.with_outbound(&outbound);

        let mut staged: SmallVec<[StagedWrite; 4]> = SmallVec::with_capacity(writes.len());
        for &(i, strategy, write) in writes {
            match write(strategy, &ctx, slots.add(i).read(), &args[i]) {
                Ok(pending) => staged.push(pending),
                Err(e) => {
                    staged.into_iter().for_each(|pending| pending.abandon(ctx.handles()));
                    return Err(e.at(SlotPosition::Param(i)));
                }
            }
        }

        let encoded = match ret {
            Some((strategy, encode)) => encode(strategy, &ctx, result),
            None => Ok(ptr::null_mut()),
        };
        match encoded {
            Ok(raw) => {
                trace!(target: "thunk", method = %self.identity, writes = staged.len(), "committing call");
                for pending in staged {
                    pending.commit();
                }
                Ok(raw)
            }
            Err(e) => {
                staged.into_iter().for_each(|pending| pending.abandon(ctx.handles()));
                Err(e.at(SlotPosition::Return))
            }
        }
    }

    fn select(&self, ty: &ManagedType) -> Result<MarshalStrategy, BridgeError> {
        MarshalStrategy::select(ty).map_err(|reason| BridgeError::UnsupportedSignature {
            method: self.identity.to_string(),
            reason,
        })
    }

    fn receiver(&self, ctx: &MarshalContext<'_>, instance: Handle) -> Result<Option<ObjectRef>, BridgeError> {
        if self.identity.is_static() {
            return Ok(None);
        }
        let this = ctx
            .handles()
            .resolve(instance)
            .ok_or(BridgeError::InvalidHandle { handle: instance })?;
        if this.type_name() != self.identity.declaring_type() {
            return Err(MarshalError::ReceiverMismatch {
                expected: self.identity.declaring_type().clone(),
                found: this.type_name().clone(),
            }
            .at(SlotPosition::Receiver));
        }
        Ok(Some(this))
    }

    fn slot_array(&self, params: *mut *mut c_void) -> Result<*mut *mut c_void, BridgeError> {
        if params.is_null() && !self.slots.is_empty() {
            return Err(MarshalError::NullPointer.at(SlotPosition::Param(0)));
        }
        Ok(params)
    }

    /// Invoke the body; the receiver reference is released when it returns
    fn run(&self, this: Option<ObjectRef>, args: &mut [ManagedValue]) -> Result<ManagedValue, BridgeError> {
        trace!(target: "thunk", method = %self.identity, args = args.len(), "invoking managed body");
        let mut invocation = Invocation::new(this.as_ref(), args);
        let outcome = if self.options.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| self.body.call(&mut invocation)))
                .unwrap_or_else(|payload| Err(ManagedFault::from_panic(payload)))
        } else {
            self.body.call(&mut invocation)
        };
        outcome.map_err(BridgeError::ManagedFault)
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("identity", &self.identity.to_string())
            .field("arity", &self.arity())
            .finish()
    }
}

/// Shared `extern "C"` entry for every specialized thunk
unsafe extern "C" fn specialized_entry(
    thunk: *const Thunk,
    instance: usize,
    params: *mut *mut c_void,
) -> *mut c_void {
    let Some(thunk) = thunk.as_ref() else {
        crate::ffi::record_error(&BridgeError::NotInitialized);
        return ptr::null_mut();
    };
    crate::ffi::complete(|| thunk.call(Handle::from_raw(instance), params))
}

#[cfg(test)]
mod tests;
