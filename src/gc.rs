//! Cycle collection by trial deletion.
//!
//! Counts held by listed objects on each other are subtracted from a scratch
//! copy (`gc_refs`) of every count. Objects left with a positive scratch
//! count are referenced from outside the heap graph and seed a reachability
//! pass; everything the pass does not reach is garbage kept alive only by
//! references among itself. `ref_count` is never modified while deciding.
//!
//! Objects whose count is zero or below are never seeds and are never made
//! reachable, so an over-released object cannot survive a pass.

use crate::jsvalue::JSValue;
use crate::object::{GcObject, ObjectFlags};
use crate::refcount::object_ref;
use crate::runtime::JSRuntime;
use core::ptr::NonNull;

/// A listed child still taking part in the current pass.
fn tracked_child<'a>(val: JSValue) -> Option<&'a GcObject> {
    object_ref(val).filter(|child| {
        child.has_flag(ObjectFlags::MARK) && !child.has_flag(ObjectFlags::FREED)
    })
}

impl JSRuntime {
    /// Runs one full collection pass and returns the number of objects freed.
    pub fn run_gc(&mut self) -> usize {
        if self.in_gc {
            return 0;
        }
        self.in_gc = true;

        let objs = self.gc_obj_list.ptrs();
        gc_decref(&objs);
        gc_scan(&objs);
        let freed = self.gc_free_cycles(&objs);

        self.in_gc = false;
        tracing::debug!(scanned = objs.len(), freed, "cycle collection finished");
        freed
    }

    fn gc_free_cycles(&mut self, objs: &[NonNull<GcObject>]) -> usize {
        let mut dead = Vec::new();
        for &ptr in objs {
            // SAFETY: `objs` is a snapshot of linked headers taken this pass.
            let obj = unsafe { ptr.as_ref() };
            if obj.has_flag(ObjectFlags::REACHABLE) {
                obj.remove_flags(ObjectFlags::MARK | ObjectFlags::REACHABLE);
            } else {
                dead.push(ptr);
            }
        }
        if dead.is_empty() {
            return 0;
        }

        // Only dead objects still carry MARK now. Edges between dead objects
        // are dropped as-is; edges into survivors are released afterwards.
        let mut released = Vec::new();
        let mut sizes = Vec::with_capacity(dead.len());
        for &ptr in &dead {
            // SAFETY: dead headers are still linked and allocated.
            let obj = unsafe { ptr.as_ref() };
            sizes.push(obj.alloc_size());
            let data = obj.take_data();
            obj.insert_flags(ObjectFlags::FREED);
            self.finalize(obj.class_id(), &data);
            for child in data.into_children() {
                if tracked_child(child).is_none() && !is_dead(child) {
                    released.push(child);
                }
            }
        }

        for (&ptr, size) in dead.iter().zip(sizes) {
            // SAFETY: dead headers are still linked and allocated.
            let obj = unsafe { ptr.as_ref() };
            let park = obj.has_flag(ObjectFlags::EXTERNAL) || obj.ref_count() <= 0;
            obj.remove_flags(ObjectFlags::MARK);
            obj.set_ref_count(0);
            // SAFETY: `ptr` is linked and its payload was released above.
            unsafe { self.release_header(ptr, size, park) };
        }

        for child in released {
            self.free_value(child);
        }
        dead.len()
    }
}

/// Whether `val` names an object freed earlier in this same pass.
fn is_dead(val: JSValue) -> bool {
    object_ref(val).is_some_and(|obj| {
        obj.has_flag(ObjectFlags::MARK) && obj.has_flag(ObjectFlags::FREED)
    })
}

fn gc_decref(objs: &[NonNull<GcObject>]) {
    for &ptr in objs {
        // SAFETY: `objs` is a snapshot of linked headers taken this pass.
        let obj = unsafe { ptr.as_ref() };
        debug_assert!(!obj.has_flag(ObjectFlags::MARK));
        obj.insert_flags(ObjectFlags::MARK);
        obj.set_gc_refs(obj.ref_count().max(0) as u32);
    }
    for &ptr in objs {
        // SAFETY: as above.
        let obj = unsafe { ptr.as_ref() };
        obj.data().for_each_child(|val| {
            if let Some(child) = tracked_child(val) {
                child.set_gc_refs(child.gc_refs().saturating_sub(1));
            }
        });
    }
}

fn gc_scan(objs: &[NonNull<GcObject>]) {
    let mut stack: Vec<&GcObject> = Vec::new();
    for &ptr in objs {
        // SAFETY: `objs` is a snapshot of linked headers taken this pass.
        let obj = unsafe { ptr.as_ref() };
        if obj.gc_refs() > 0 && obj.ref_count() > 0 {
            obj.insert_flags(ObjectFlags::REACHABLE);
            stack.push(obj);
        }
    }
    while let Some(obj) = stack.pop() {
        obj.data().for_each_child(|val| {
            if let Some(child) = tracked_child(val)
                && !child.has_flag(ObjectFlags::REACHABLE)
                && child.ref_count() > 0
            {
                child.insert_flags(ObjectFlags::REACHABLE);
                stack.push(child);
            }
        });
    }
}
