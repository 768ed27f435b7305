use core::ptr::{self, NonNull};

/// A machine word that is either an immediate bit pattern or a pointer with
/// tag bits folded into its alignment slack.
///
/// Pointer provenance is kept through `map_addr`/`with_addr` so heap handles
/// stay valid under strict provenance.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaggedPtr(*mut u8);

impl TaggedPtr {
    pub const fn from_bits(bits: usize) -> Self {
        Self(ptr::without_provenance_mut(bits))
    }

    pub fn addr(self) -> usize {
        self.0.addr()
    }

    /// Low bits selected by `tag_mask`.
    pub fn tag(self, tag_mask: usize) -> usize {
        self.0.addr() & tag_mask
    }

    pub fn from_ptr<T>(ptr: NonNull<T>, tag: usize, tag_mask: usize) -> Self {
        let raw = ptr.as_ptr().cast::<u8>();
        debug_assert!((raw.addr() & tag_mask) == 0);
        debug_assert!((tag & !tag_mask) == 0);
        Self(raw.map_addr(|addr| addr | tag))
    }

    pub fn to_ptr<T>(self, tag: usize, tag_mask: usize) -> Option<NonNull<T>> {
        if self.tag(tag_mask) != tag {
            return None;
        }
        let untagged = self.0.map_addr(|addr| addr & !tag_mask);
        NonNull::new(untagged.cast::<T>())
    }
}
