//! Reference counting on heap handles.
//!
//! Deallocation never recurses: an object whose count reaches zero is queued
//! on `zero_refs`, and the queue is drained in a loop that releases each
//! object's children, queueing any that reach zero in turn.

use crate::jsvalue::JSValue;
use crate::object::{GcObject, ObjectFlags};
use crate::runtime::JSRuntime;
use crate::teardown::{AnomalyCause, AnomalyDetail, TeardownDiagnostic};
use core::ptr::NonNull;

impl JSRuntime {
    /// Takes one more reference on `val` and returns it. Immediates pass through.
    pub fn dup_value(&self, val: JSValue) -> JSValue {
        if let Some(obj) = object_ref(val) {
            obj.set_ref_count(obj.ref_count() + 1);
        }
        val
    }

    /// Gives back one reference on `val`, freeing the object at zero.
    ///
    /// A count that is already zero or below is left untouched; the attempt
    /// is recorded as a diagnostic instead of freeing twice.
    pub fn free_value(&mut self, val: JSValue) {
        let Some(ptr) = val.as_object() else {
            return;
        };
        // SAFETY: handles reaching this point refer to live or parked headers.
        let obj = unsafe { ptr.as_ref() };
        let count = obj.ref_count();
        if count <= 0 {
            let cause = if obj.has_flag(ObjectFlags::EXTERNAL) {
                AnomalyCause::HostOverRelease
            } else {
                AnomalyCause::EngineDoubleFree
            };
            let detail = AnomalyDetail::ReleaseAtZero {
                class_id: obj.class_id(),
                ref_count: count,
            };
            self.record(TeardownDiagnostic::new(cause, detail));
            return;
        }
        obj.set_ref_count(count - 1);
        if count == 1 {
            self.queue_zero_ref(ptr);
        }
    }

    /// Current count of `val`, including negative values left by host
    /// over-release. Immediates report zero.
    pub fn read_count(&self, val: JSValue) -> i32 {
        object_ref(val).map_or(0, GcObject::ref_count)
    }

    /// Decrements without the zero guard. Frees when the result is exactly
    /// zero and leaves negative counts in place. Returns the new count.
    ///
    /// Only the external ownership bridge calls this.
    pub(crate) fn force_decrement(&mut self, val: JSValue) -> i32 {
        let Some(ptr) = val.as_object() else {
            return 0;
        };
        // SAFETY: handles reaching this point refer to live or parked headers.
        let obj = unsafe { ptr.as_ref() };
        obj.insert_flags(ObjectFlags::EXTERNAL);
        let count = obj.ref_count() - 1;
        obj.set_ref_count(count);
        if count == 0 {
            self.queue_zero_ref(ptr);
        } else if count < 0 {
            let detail = AnomalyDetail::OverReleasedObject {
                class_id: obj.class_id(),
                ref_count: count,
            };
            self.record(TeardownDiagnostic::new(AnomalyCause::HostOverRelease, detail));
        }
        count
    }

    /// Debug sentinel: whether `val` still names an object on the collector
    /// list. Compares pointers only, so it is safe on dangling handles.
    pub fn is_live_object(&self, val: JSValue) -> bool {
        val.as_object()
            .is_some_and(|ptr| self.gc_obj_list.contains(ptr))
    }

    /// Whether `val` names a freed header kept for host misuse. Compares
    /// pointers only.
    pub fn is_parked_object(&self, val: JSValue) -> bool {
        val.as_object().is_some_and(|ptr| self.zombies.contains(&ptr))
    }

    fn queue_zero_ref(&mut self, ptr: NonNull<GcObject>) {
        self.zero_refs.push_back(ptr);
        if self.freeing {
            return;
        }
        self.freeing = true;
        while let Some(next) = self.zero_refs.pop_front() {
            self.free_object(next);
        }
        self.freeing = false;
    }

    fn free_object(&mut self, ptr: NonNull<GcObject>) {
        // SAFETY: queued pointers are live or parked headers.
        let obj = unsafe { ptr.as_ref() };
        if obj.has_flag(ObjectFlags::FREED) {
            return;
        }
        let class_id = obj.class_id();
        let size = obj.alloc_size();
        let park = obj.has_flag(ObjectFlags::EXTERNAL);
        let data = obj.take_data();
        obj.insert_flags(ObjectFlags::FREED);
        self.finalize(class_id, &data);
        for child in data.into_children() {
            self.free_value(child);
        }
        // SAFETY: a header reaching zero for the first time is still linked.
        unsafe { self.release_header(ptr, size, park) };
    }
}

/// Borrows the header behind a heap handle.
pub(crate) fn object_ref<'a>(val: JSValue) -> Option<&'a GcObject> {
    // SAFETY: handles are only dereferenced while their object is live or
    // parked; use after a plain free is outside the API contract.
    val.as_object().map(|ptr| unsafe { ptr.as_ref() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ExternalOwnership;
    use crate::jsvalue::{JS_NULL, JSValue};
    use crate::runtime::JSRuntime;
    use crate::teardown::AnomalyCause;

    #[test]
    fn counts_follow_dup_and_free() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_string("x").expect("alloc");
        for _ in 0..4 {
            rt.dup_value(obj);
        }
        for _ in 0..3 {
            rt.free_value(obj);
        }
        assert_eq!(rt.read_count(obj), 2);
        rt.free_value(obj);
        rt.free_value(obj);
        assert!(!rt.is_live_object(obj));
    }

    #[test]
    fn immediates_have_no_count() {
        let mut rt = JSRuntime::default();
        let val = JSValue::new_short_int(9);
        assert_eq!(rt.dup_value(val), val);
        rt.free_value(val);
        assert_eq!(rt.read_count(val), 0);
        assert!(rt.diagnostics().is_empty());
    }

    #[test]
    fn release_at_zero_is_trapped() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_string("parked").expect("alloc");
        rt.adopt_extra_reference(obj);
        assert_eq!(rt.release_external_reference(obj), 1);
        assert_eq!(rt.release_external_reference(obj), 0);
        assert!(!rt.is_live_object(obj));
        rt.free_value(obj);
        assert_eq!(rt.read_count(obj), 0);
        let last = rt.diagnostics().last().expect("diagnostic");
        assert_eq!(last.cause, AnomalyCause::HostOverRelease);
    }

    #[test]
    fn deep_chain_frees_without_recursion() {
        let mut rt = JSRuntime::default();
        rt.set_gc_threshold(usize::MAX);
        let mut head = rt.new_array_from(JS_NULL, Vec::new()).expect("alloc");
        for _ in 0..100_000 {
            head = rt.new_array_from(JS_NULL, vec![head]).expect("alloc");
        }
        assert_eq!(rt.live_objects(), 100_001);
        rt.free_value(head);
        assert_eq!(rt.live_objects(), 0);
    }

    #[test]
    fn forced_decrement_at_one_frees_once() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_string("once").expect("alloc");
        assert_eq!(rt.force_decrement(obj), 0);
        assert!(!rt.is_live_object(obj));
        assert_eq!(rt.parked_objects(), 1);
        assert!(rt.is_parked_object(obj));
        assert_eq!(rt.force_decrement(obj), -1);
        assert_eq!(rt.force_decrement(obj), -2);
        assert_eq!(rt.parked_objects(), 1);
    }
}
