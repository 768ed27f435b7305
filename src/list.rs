//! Intrusive object list backing the runtime's collector traversal set.
//!
//! Invariants:
//! - Nodes embed their link and must not move while linked (they are boxed).
//! - A node belongs to at most one list at a time.
//! - A node is unlinked before its box is reclaimed.

pub use intrusive_collections::{LinkedList, LinkedListLink, UnsafeRef, intrusive_adapter};

use crate::object::GcObject;
use core::ptr::NonNull;

intrusive_adapter!(pub GcObjectAdapter = UnsafeRef<GcObject>: GcObject { link: LinkedListLink });

/// Owning list of boxed heap objects. Each linked node is a leaked `Box`
/// whose ownership returns to the caller on `unlink`.
pub struct GcObjectList {
    list: LinkedList<GcObjectAdapter>,
    len: usize,
}

impl GcObjectList {
    pub fn new() -> Self {
        Self {
            list: LinkedList::new(GcObjectAdapter::new()),
            len: 0,
        }
    }

    pub fn push_back(&mut self, obj: Box<GcObject>) -> NonNull<GcObject> {
        let raw = Box::into_raw(obj);
        // SAFETY: `raw` comes straight from `Box::into_raw` and is unlinked.
        let (ptr, node) = unsafe { (NonNull::new_unchecked(raw), UnsafeRef::from_raw(raw)) };
        self.list.push_back(node);
        self.len += 1;
        ptr
    }

    /// Moves an unlinked header into this list without transferring any box.
    ///
    /// # Safety
    /// `ptr` must point to a live, unlinked `GcObject` owned by this list's
    /// runtime, allocated through `Box`.
    pub unsafe fn relink(&mut self, ptr: NonNull<GcObject>) {
        // SAFETY: caller guarantees `ptr` is a leaked box that is not linked.
        let node = unsafe { UnsafeRef::from_raw(ptr.as_ptr()) };
        self.list.push_back(node);
        self.len += 1;
    }

    /// Removes `ptr` from the list and hands back ownership of its box.
    ///
    /// # Safety
    /// `ptr` must be currently linked in this list.
    pub unsafe fn unlink(&mut self, ptr: NonNull<GcObject>) -> Box<GcObject> {
        // SAFETY: caller guarantees `ptr` is linked in `self.list`.
        let node = unsafe { self.list.cursor_mut_from_ptr(ptr.as_ptr()).remove() };
        debug_assert!(node.is_some());
        self.len -= 1;
        // SAFETY: every node was created from a `Box` in `push_back`.
        unsafe { UnsafeRef::into_box(node.unwrap_unchecked()) }
    }

    pub fn pop_front(&mut self) -> Option<Box<GcObject>> {
        let node = self.list.pop_front()?;
        self.len -= 1;
        // SAFETY: every node was created from a `Box` in `push_back`.
        Some(unsafe { UnsafeRef::into_box(node) })
    }

    /// Pointer-identity membership test; never dereferences `ptr`.
    pub fn contains(&self, ptr: NonNull<GcObject>) -> bool {
        self.list
            .iter()
            .any(|obj| core::ptr::eq(obj, ptr.as_ptr().cast_const()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GcObject> {
        self.list.iter()
    }

    /// Snapshot of the linked nodes, so callers may unlink while walking.
    pub fn ptrs(&self) -> Vec<NonNull<GcObject>> {
        self.list.iter().map(NonNull::from).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Default for GcObjectList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GcObjectList {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}
