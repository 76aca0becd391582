//! Method registration
//!
//! Binding a method records its identity and body and hands back a token.
//! Nothing is synthesized here; thunks are built lazily on first call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::managed::ManagedMethod;
use crate::types::MethodIdentity;

/// Opaque token naming a registered method across the C ABI
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodToken(u64);

impl MethodToken {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredMethod {
    pub identity: MethodIdentity,
    pub body: ManagedMethod,
}

/// Token <-> method tables
pub struct MethodRegistry {
    next: AtomicU64,
    methods: DashMap<MethodToken, Arc<RegisteredMethod>>,
    tokens: DashMap<MethodIdentity, MethodToken>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            methods: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    /// Bind `identity` to `body`
    ///
    /// Registering an identity twice returns the first token and keeps the
    /// first body.
    pub fn register(&self, identity: MethodIdentity, body: ManagedMethod) -> MethodToken {
        match self.tokens.entry(identity) {
            Entry::Occupied(existing) => {
                let token = *existing.get();
                debug!(target: "dispatch", %token, method = %existing.key(), "method already registered");
                token
            }
            Entry::Vacant(slot) => {
                let token = MethodToken(self.next.fetch_add(1, Ordering::Relaxed));
                let identity = slot.key().clone();
                debug!(target: "dispatch", %token, method = %identity, "registered method");
                self.methods.insert(token, Arc::new(RegisteredMethod { identity, body }));
                slot.insert(token);
                token
            }
        }
    }

    pub fn lookup(&self, token: MethodToken) -> Option<Arc<RegisteredMethod>> {
        self.methods.get(&token).map(|entry| Arc::clone(entry.value()))
    }

    pub fn token_of(&self, identity: &MethodIdentity) -> Option<MethodToken> {
        self.tokens.get(identity).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::ManagedValue;
    use crate::types::ManagedType;

    fn noop() -> ManagedMethod {
        ManagedMethod::new(|_| Ok(ManagedValue::Void))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = MethodRegistry::new();
        let id = MethodIdentity::new_static("Math", "add")
            .param(ManagedType::I32)
            .returns(ManagedType::I32);
        let token = registry.register(id.clone(), noop());
        assert_eq!(token.into_raw(), 1);

        let method = registry.lookup(token).unwrap();
        assert_eq!(method.identity, id);
        assert_eq!(registry.token_of(&id), Some(token));
        assert!(registry.lookup(MethodToken::from_raw(99)).is_none());
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = MethodRegistry::new();
        let id = MethodIdentity::new_static("Math", "one").returns(ManagedType::I32);
        let first = registry.register(id.clone(), ManagedMethod::new(|_| Ok(1i32.into())));
        let second = registry.register(id, ManagedMethod::new(|_| Ok(2i32.into())));
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        let method = registry.lookup(first).unwrap();
        let result = method.body.call(&mut crate::managed::Invocation::new(None, &mut []));
        assert_eq!(result, Ok(ManagedValue::I32(1)));
    }

    #[test]
    fn test_distinct_names_distinct_tokens() {
        let registry = MethodRegistry::new();
        let a = registry.register(MethodIdentity::new_static("T", "a"), noop());
        let b = registry.register(MethodIdentity::new_static("T", "b"), noop());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
