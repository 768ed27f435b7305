use crate::object::GcObject;
use crate::tagged_ptr::TaggedPtr;
use core::ptr::NonNull;

#[cfg(target_pointer_width = "64")]
pub type JSWord = u64;
#[cfg(target_pointer_width = "32")]
pub type JSWord = u32;

/// A value handle: one tagged word.
///
/// `JSValue` is `Copy` and carries no ownership on its own. Heap handles are
/// owned by whoever last obtained them from a constructor or `dup_value`, and
/// must be given back with `free_value`.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JSValue(TaggedPtr);

pub const JSW: JSWord = core::mem::size_of::<JSValue>() as JSWord;

// Low bits select the tag; heap pointers are addr + 1.
pub const JS_TAG_INT: JSWord = 0;
pub const JS_TAG_PTR: JSWord = 1;
pub const JS_TAG_SPECIAL: JSWord = 3;
pub const JS_TAG_BOOL: JSWord = JS_TAG_SPECIAL | ((0 as JSWord) << 2);
pub const JS_TAG_NULL: JSWord = JS_TAG_SPECIAL | ((1 as JSWord) << 2);
pub const JS_TAG_UNDEFINED: JSWord = JS_TAG_SPECIAL | ((2 as JSWord) << 2);
pub const JS_TAG_EXCEPTION: JSWord = JS_TAG_SPECIAL | ((3 as JSWord) << 2);
pub const JS_TAG_UNINITIALIZED: JSWord = JS_TAG_SPECIAL | ((4 as JSWord) << 2);

#[cfg(target_pointer_width = "64")]
pub const JS_TAG_SHORT_FLOAT: JSWord = 5;

pub const JS_TAG_SPECIAL_BITS: u32 = 5;

const PTR_TAG_MASK: usize = (JSW - 1) as usize;

pub const JS_NULL: JSValue = JSValue::make_special(JS_TAG_NULL, 0);
pub const JS_UNDEFINED: JSValue = JSValue::make_special(JS_TAG_UNDEFINED, 0);
pub const JS_UNINITIALIZED: JSValue = JSValue::make_special(JS_TAG_UNINITIALIZED, 0);
pub const JS_FALSE: JSValue = JSValue::make_special(JS_TAG_BOOL, 0);
pub const JS_TRUE: JSValue = JSValue::make_special(JS_TAG_BOOL, 1);
pub const JS_EXCEPTION: JSValue = JSValue::make_special(JS_TAG_EXCEPTION, 0);

pub const JS_SHORTINT_MIN: i32 = -(1 << 30);
pub const JS_SHORTINT_MAX: i32 = (1 << 30) - 1;

/// Tag dispatch for a handle. Decided from the bits alone; a boxed double is
/// reported as `Object` because telling it apart requires the heap header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueTag {
    Int,
    Float,
    Bool,
    Null,
    Undefined,
    Uninitialized,
    Exception,
    Object,
}

#[cfg(target_pointer_width = "64")]
const JS_FLOAT64_VALUE_EXP_MIN: i64 = 1023 - 127;
#[cfg(target_pointer_width = "64")]
const JS_FLOAT64_VALUE_ADDEND: u64 =
    ((JS_FLOAT64_VALUE_EXP_MIN - ((JS_TAG_SHORT_FLOAT as i64) << 8)) as u64) << 52;

impl JSValue {
    pub(crate) const fn from_bits(bits: JSWord) -> Self {
        Self(TaggedPtr::from_bits(bits as usize))
    }

    pub(crate) fn raw_bits(self) -> JSWord {
        self.0.addr() as JSWord
    }

    pub const fn make_special(tag: JSWord, v: u32) -> Self {
        Self::from_bits(tag | ((v as JSWord) << JS_TAG_SPECIAL_BITS))
    }

    pub const fn new_short_int(val: i32) -> Self {
        Self::from_bits(((val as u32 as JSWord) << 1) | JS_TAG_INT)
    }

    pub const fn new_bool(val: bool) -> Self {
        Self::make_special(JS_TAG_BOOL, val as u32)
    }

    /// Immediate encoding for `d`, or `None` when it must be boxed.
    pub fn try_short_float(d: f64) -> Option<Self> {
        #[cfg(target_pointer_width = "64")]
        {
            let abs = d.abs();
            if abs >= 2.0_f64.powi(-127) && abs <= 2.0_f64.powi(128) {
                return Some(Self::from_bits(
                    d.to_bits()
                        .wrapping_sub(JS_FLOAT64_VALUE_ADDEND)
                        .rotate_left(4) as JSWord,
                ));
            }
            None
        }
        #[cfg(target_pointer_width = "32")]
        {
            let _ = d;
            None
        }
    }

    pub(crate) fn from_object(ptr: NonNull<GcObject>) -> Self {
        Self(TaggedPtr::from_ptr(ptr, JS_TAG_PTR as usize, PTR_TAG_MASK))
    }

    pub(crate) fn as_object(self) -> Option<NonNull<GcObject>> {
        self.0.to_ptr(JS_TAG_PTR as usize, PTR_TAG_MASK)
    }

    pub fn tag(self) -> ValueTag {
        if self.is_int() {
            return ValueTag::Int;
        }
        if self.is_ptr() {
            return ValueTag::Object;
        }
        #[cfg(target_pointer_width = "64")]
        if self.is_short_float() {
            return ValueTag::Float;
        }
        match self.special_tag() {
            JS_TAG_BOOL => ValueTag::Bool,
            JS_TAG_NULL => ValueTag::Null,
            JS_TAG_UNDEFINED => ValueTag::Undefined,
            JS_TAG_EXCEPTION => ValueTag::Exception,
            _ => ValueTag::Uninitialized,
        }
    }

    pub fn special_tag(self) -> JSWord {
        self.raw_bits() & (((1 as JSWord) << JS_TAG_SPECIAL_BITS) - 1)
    }

    pub fn get_special_value(self) -> i32 {
        ((self.raw_bits() as u32) as i32) >> JS_TAG_SPECIAL_BITS
    }

    pub fn get_int(self) -> i32 {
        ((self.raw_bits() as u32) as i32) >> 1
    }

    #[cfg(target_pointer_width = "64")]
    pub fn get_short_float(self) -> f64 {
        let bits = self.raw_bits();
        f64::from_bits(bits.rotate_left(60).wrapping_add(JS_FLOAT64_VALUE_ADDEND))
    }

    pub fn is_int(self) -> bool {
        (self.raw_bits() & 1) == JS_TAG_INT
    }

    pub fn is_ptr(self) -> bool {
        (self.raw_bits() & (JSW - 1)) == JS_TAG_PTR
    }

    #[cfg(target_pointer_width = "64")]
    pub fn is_short_float(self) -> bool {
        (self.raw_bits() & (JSW - 1)) == JS_TAG_SHORT_FLOAT
    }

    pub fn is_bool(self) -> bool {
        !self.is_int() && !self.is_ptr() && self.special_tag() == JS_TAG_BOOL
    }

    pub fn is_null(self) -> bool {
        self == JS_NULL
    }

    pub fn is_undefined(self) -> bool {
        self == JS_UNDEFINED
    }

    pub fn is_exception(self) -> bool {
        self == JS_EXCEPTION
    }
}
