use crate::{PAGE_SIZE, VirtualAddress, align_down};
use core::fmt;

/// The page-aligned base of a 4 KiB virtual page.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(VirtualAddress);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn containing(va: VirtualAddress) -> Self {
        Self(VirtualAddress::new(align_down(va.as_u32(), PAGE_SIZE)))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.0
    }

    /// The page `n` pages after this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, n: u32) -> Self {
        Self(VirtualAddress::new(self.0.as_u32() + n * PAGE_SIZE))
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#010X})", self.0.as_u32())
    }
}
