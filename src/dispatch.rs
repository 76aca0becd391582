//! Invocation dispatcher - the stable, uniform native-facing call
//!
//! `invoke(token, instance, params)` looks up the registered method, gets or
//! synthesizes its thunk through the cache, and runs the specialized path.

use std::ffi::c_void;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ManagedFault};
use crate::handles::{Handle, HandleTable};
use crate::managed::{Invocation, ManagedMethod, ManagedValue};
use crate::registry::{MethodRegistry, MethodToken};
use crate::thunk::{Thunk, ThunkCache, ThunkOptions, ThunkSynthesizer};
use crate::types::MethodIdentity;

pub struct Bridge {
    config: BridgeConfig,
    handles: Arc<HandleTable>,
    registry: MethodRegistry,
    cache: ThunkCache,
    synthesizer: ThunkSynthesizer,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let handles = Arc::new(HandleTable::with_capacity(config.handles.initial_capacity));
        let options = ThunkOptions {
            check_alignment: config.marshal.check_alignment,
            catch_panics: config.dispatch.catch_panics,
        };
        let synthesizer = ThunkSynthesizer::new(Arc::clone(&handles), options, config.dispatch.max_arity);
        Self {
            config,
            handles,
            registry: MethodRegistry::new(),
            cache: ThunkCache::new(),
            synthesizer,
        }
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    #[inline]
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Bind a managed method; synthesis is deferred to the first call
    pub fn register(&self, identity: MethodIdentity, body: ManagedMethod) -> MethodToken {
        self.registry.register(identity, body)
    }

    /// Bind a closure as a managed method
    pub fn register_fn<F>(&self, identity: MethodIdentity, body: F) -> MethodToken
    where
        F: Fn(&mut Invocation<'_>) -> Result<ManagedValue, ManagedFault> + Send + Sync + 'static,
    {
        self.register(identity, ManagedMethod::new(body))
    }

    /// Cached thunk for `token`, synthesizing it on first use
    pub fn thunk(&self, token: MethodToken) -> Result<Arc<Thunk>, BridgeError> {
        let method = self
            .registry
            .lookup(token)
            .ok_or(BridgeError::UnknownMethod { token })?;
        self.cache
            .get_or_create(&method.identity, || self.synthesizer.synthesize(&method.identity, &method.body))
    }

    /// Call a registered method through its specialized thunk
    ///
    /// `instance` is ignored for static methods. The result is the marshaled
    /// return slot, null for `void`.
    ///
    /// # Safety
    /// `params` must point to one slot per declared parameter, each laid out
    /// as described in [`crate::marshal`].
    pub unsafe fn invoke(
        &self,
        token: MethodToken,
        instance: Handle,
        params: *mut *mut c_void,
    ) -> Result<*mut c_void, BridgeError> {
        trace!(target: "dispatch", %token, %instance, "invoke");
        let thunk = self.thunk(token)?;
        thunk.call(instance, params).map_err(|e| report(&thunk, e))
    }

    /// Same call through the generic path, re-deriving every strategy
    ///
    /// # Safety
    /// Same contract as [`Bridge::invoke`].
    pub unsafe fn invoke_reflective(
        &self,
        token: MethodToken,
        instance: Handle,
        params: *mut *mut c_void,
    ) -> Result<*mut c_void, BridgeError> {
        trace!(target: "dispatch", %token, %instance, "invoke reflective");
        let thunk = self.thunk(token)?;
        thunk.call_generic(instance, params).map_err(|e| report(&thunk, e))
    }

    /// Thunks synthesized so far
    pub fn synthesis_count(&self) -> usize {
        self.synthesizer.synthesis_count()
    }

    pub fn cached_thunks(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, identity: &MethodIdentity) -> bool {
        self.cache.contains(identity)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

fn report(thunk: &Thunk, error: BridgeError) -> BridgeError {
    warn!(target: "dispatch", method = %thunk.identity(), code = error.error_code(), %error, "call failed");
    error
}
