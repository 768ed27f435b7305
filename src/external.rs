//! Host-side ownership of collector-tracked objects.
//!
//! A host may take references on engine objects and release them on its own
//! schedule, including releasing more than it took. None of these calls fail
//! and none of them crash: an over-released object is parked, and its count
//! simply keeps going down.

use crate::context::ContextId;
use crate::enums::ContextState;
use crate::jsvalue::JSValue;
use crate::object::ObjectFlags;
use crate::refcount::object_ref;
use crate::runtime::{JSRuntime, RuntimeError};

pub trait ExternalOwnership {
    /// Takes one host-owned reference on `val` and tags it as externally held.
    fn adopt_extra_reference(&mut self, val: JSValue);

    /// Gives back one host-owned reference. Frees the object when the count
    /// reaches exactly zero and lets it go negative after that. Returns the
    /// new count.
    fn release_external_reference(&mut self, val: JSValue) -> i32;

    /// Current count of `val`, negative values included.
    fn inspect(&self, val: JSValue) -> i32;

    /// Adopts `val` and returns a token that must be handed back to `release`.
    fn adopt(&mut self, val: JSValue) -> ExternalRef {
        self.adopt_extra_reference(val);
        ExternalRef { val }
    }

    fn release(&mut self, token: ExternalRef) -> i32 {
        self.release_external_reference(token.val)
    }
}

/// One adopted reference. Not `Clone`, so each adoption is released once.
#[must_use = "an adopted reference is held until passed to `release`"]
#[derive(Debug)]
pub struct ExternalRef {
    val: JSValue,
}

impl ExternalRef {
    pub fn value(&self) -> JSValue {
        self.val
    }
}

impl ExternalOwnership for JSRuntime {
    fn adopt_extra_reference(&mut self, val: JSValue) {
        if let Some(obj) = object_ref(val) {
            obj.insert_flags(ObjectFlags::EXTERNAL);
        }
        self.dup_value(val);
    }

    fn release_external_reference(&mut self, val: JSValue) -> i32 {
        self.force_decrement(val)
    }

    fn inspect(&self, val: JSValue) -> i32 {
        self.read_count(val)
    }
}

impl JSRuntime {
    /// Registers `val` as in use by the host on `ctx`, taking one reference
    /// that the context gives back when it is torn down.
    ///
    /// A context already closing releases the reference right away instead.
    pub fn retain_active(&mut self, ctx: ContextId, val: JSValue) -> Result<(), RuntimeError> {
        let state = self.context_state(ctx);
        match state {
            Some(ContextState::Active) => {}
            Some(ContextState::Closing) => return Ok(()),
            _ => return Err(RuntimeError::ContextFreed(ctx)),
        }
        if !val.is_ptr() {
            return Ok(());
        }
        self.dup_value(val);
        self.context_mut(ctx)?.active_values.push(val);
        Ok(())
    }

    /// Drops one registration of `val` on `ctx` and releases its reference.
    /// Returns whether a registration was found. Does nothing once the
    /// context is closing.
    pub fn release_active(&mut self, ctx: ContextId, val: JSValue) -> bool {
        let Ok(context) = self.context_mut(ctx) else {
            return false;
        };
        let Some(pos) = context.active_values.iter().rposition(|&v| v == val) else {
            return false;
        };
        context.active_values.swap_remove(pos);
        self.free_value(val);
        true
    }
}
