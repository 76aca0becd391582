//! Thunk synthesis from a method identity
//!
//! Synthesis is deterministic: the same identity always yields the same
//! slot codecs, or the same rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use super::{ReturnCodec, SlotCodec, Thunk, ThunkOptions};
use crate::error::BridgeError;
use crate::handles::HandleTable;
use crate::managed::ManagedMethod;
use crate::marshal::MarshalStrategy;
use crate::types::MethodIdentity;

pub struct ThunkSynthesizer {
    handles: Arc<HandleTable>,
    options: ThunkOptions,
    max_arity: usize,
    synthesized: AtomicUsize,
}

impl ThunkSynthesizer {
    pub(crate) fn new(handles: Arc<HandleTable>, options: ThunkOptions, max_arity: usize) -> Self {
        Self {
            handles,
            options,
            max_arity,
            synthesized: AtomicUsize::new(0),
        }
    }

    /// Build the thunk for `identity` calling `body`
    pub fn synthesize(&self, identity: &MethodIdentity, body: &ManagedMethod) -> Result<Thunk, BridgeError> {
        let reject = |reason: String| {
            warn!(target: "thunk", method = %identity, %reason, "unsupported signature");
            BridgeError::UnsupportedSignature {
                method: identity.to_string(),
                reason,
            }
        };

        if identity.arity() > self.max_arity {
            return Err(reject(format!(
                "arity {} exceeds the configured maximum of {}",
                identity.arity(),
                self.max_arity
            )));
        }

        let mut slots = SmallVec::with_capacity(identity.arity());
        for (i, param) in identity.params().iter().enumerate() {
            let strategy =
                MarshalStrategy::select(&param.ty).map_err(|reason| reject(format!("parameter {}: {}", i, reason)))?;
            slots.push(SlotCodec::new(strategy, param.by_ref));
        }

        let ret = if identity.has_return() {
            let strategy = MarshalStrategy::select(identity.return_type())
                .map_err(|reason| reject(format!("return: {}", reason)))?;
            Some(ReturnCodec::new(strategy))
        } else {
            None
        };

        self.synthesized.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "thunk",
            method = %identity,
            arity = identity.arity(),
            by_ref = identity.params().iter().filter(|p| p.by_ref).count(),
            "synthesized thunk"
        );

        Ok(Thunk::new(
            identity.clone(),
            body.clone(),
            slots,
            ret,
            self.options,
            Arc::clone(&self.handles),
        ))
    }

    /// Successful syntheses so far
    pub fn synthesis_count(&self) -> usize {
        self.synthesized.load(Ordering::Relaxed)
    }

    pub fn max_arity(&self) -> usize {
        self.max_arity
    }
}
