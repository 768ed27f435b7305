use crate::enums::JSObjectClass;
use crate::jsvalue::{JSValue, JS_NULL};
use crate::list::LinkedListLink;
use bitflags::bitflags;
use core::cell::{Cell, RefCell};
use core::ffi::c_void;

bitflags! {
    /// Header bits. `MARK` and `REACHABLE` are only meaningful during a
    /// collection pass and are clear otherwise.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct ObjectFlags: u8 {
        const MARK = 1 << 0;
        const REACHABLE = 1 << 1;
        /// Adopted or force-released by the host at least once.
        const EXTERNAL = 1 << 2;
        /// Payload released; the header is parked until runtime shutdown.
        const FREED = 1 << 3;
    }
}

#[derive(Debug)]
pub struct Property {
    pub key: Box<str>,
    pub value: JSValue,
}

/// Object payload. Every `JSValue` stored here owns one reference.
#[derive(Debug, Default)]
pub enum ObjectData {
    Plain {
        proto: JSValue,
        props: Vec<Property>,
    },
    Array {
        proto: JSValue,
        items: Vec<JSValue>,
    },
    Function {
        proto: JSValue,
        name: Box<str>,
        props: Vec<Property>,
    },
    String(Box<str>),
    Float64(f64),
    User {
        proto: JSValue,
        props: Vec<Property>,
        opaque: *mut c_void,
    },
    #[default]
    Released,
}

impl ObjectData {
    pub fn for_each_child(&self, mut f: impl FnMut(JSValue)) {
        let (proto, props) = match self {
            ObjectData::Plain { proto, props }
            | ObjectData::Function { proto, props, .. }
            | ObjectData::User { proto, props, .. } => (*proto, props.as_slice()),
            ObjectData::Array { proto, items } => {
                f(*proto);
                items.iter().copied().for_each(f);
                return;
            }
            ObjectData::String(_) | ObjectData::Float64(_) | ObjectData::Released => return,
        };
        f(proto);
        for prop in props {
            f(prop.value);
        }
    }

    /// Consumes the payload, yielding every owned child reference.
    pub fn into_children(self) -> Vec<JSValue> {
        let mut children = Vec::new();
        self.for_each_child(|val| {
            if val.is_ptr() {
                children.push(val);
            }
        });
        children
    }

    pub fn proto(&self) -> JSValue {
        match self {
            ObjectData::Plain { proto, .. }
            | ObjectData::Array { proto, .. }
            | ObjectData::Function { proto, .. }
            | ObjectData::User { proto, .. } => *proto,
            _ => JS_NULL,
        }
    }

    pub fn props(&self) -> &[Property] {
        match self {
            ObjectData::Plain { props, .. }
            | ObjectData::Function { props, .. }
            | ObjectData::User { props, .. } => props,
            _ => &[],
        }
    }

    pub fn props_mut(&mut self) -> Option<&mut Vec<Property>> {
        match self {
            ObjectData::Plain { props, .. }
            | ObjectData::Function { props, .. }
            | ObjectData::User { props, .. } => Some(props),
            _ => None,
        }
    }

    /// Rough heap footprint for memory-limit accounting.
    pub fn heap_size(&self) -> usize {
        let value = core::mem::size_of::<JSValue>();
        let prop = core::mem::size_of::<Property>();
        match self {
            ObjectData::Plain { props, .. } | ObjectData::User { props, .. } => {
                props.iter().map(|p| prop + p.key.len()).sum()
            }
            ObjectData::Function { props, name, .. } => {
                name.len() + props.iter().map(|p| prop + p.key.len()).sum::<usize>()
            }
            ObjectData::Array { items, .. } => items.len() * value,
            ObjectData::String(s) => s.len(),
            ObjectData::Float64(_) | ObjectData::Released => 0,
        }
    }
}

/// Heap object header.
///
/// Invariants:
/// - `link` is linked into the runtime's `gc_obj_list` exactly while the
///   object is live; parked headers are unlinked.
/// - The header must not move while linked (it is boxed at allocation).
/// - `ref_count` is only pushed below zero by the external release path.
pub struct GcObject {
    pub(crate) link: LinkedListLink,
    ref_count: Cell<i32>,
    flags: Cell<ObjectFlags>,
    gc_refs: Cell<u32>,
    class_id: u8,
    data: RefCell<ObjectData>,
}

impl GcObject {
    pub fn new(class_id: u8, data: ObjectData) -> Self {
        Self {
            link: LinkedListLink::new(),
            ref_count: Cell::new(1),
            flags: Cell::new(ObjectFlags::empty()),
            gc_refs: Cell::new(0),
            class_id,
            data: RefCell::new(data),
        }
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.get()
    }

    pub(crate) fn set_ref_count(&self, count: i32) {
        self.ref_count.set(count);
    }

    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    pub fn class(&self) -> Option<JSObjectClass> {
        JSObjectClass::from_id(self.class_id)
    }

    pub fn flags(&self) -> ObjectFlags {
        self.flags.get()
    }

    pub(crate) fn insert_flags(&self, flags: ObjectFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    pub(crate) fn remove_flags(&self, flags: ObjectFlags) {
        self.flags.set(self.flags.get() - flags);
    }

    pub fn has_flag(&self, flag: ObjectFlags) -> bool {
        self.flags.get().contains(flag)
    }

    pub(crate) fn gc_refs(&self) -> u32 {
        self.gc_refs.get()
    }

    pub(crate) fn set_gc_refs(&self, refs: u32) {
        self.gc_refs.set(refs);
    }

    pub fn data(&self) -> core::cell::Ref<'_, ObjectData> {
        self.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> core::cell::RefMut<'_, ObjectData> {
        self.data.borrow_mut()
    }

    pub(crate) fn take_data(&self) -> ObjectData {
        core::mem::take(&mut *self.data.borrow_mut())
    }

    pub fn alloc_size(&self) -> usize {
        core::mem::size_of::<GcObject>() + self.data.borrow().heap_size()
    }
}

impl core::fmt::Debug for GcObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GcObject")
            .field("class_id", &self.class_id)
            .field("ref_count", &self.ref_count.get())
            .field("flags", &self.flags.get())
            .finish()
    }
}
