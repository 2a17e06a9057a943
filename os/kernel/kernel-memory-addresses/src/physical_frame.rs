use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// A 4 KiB physical frame, identified by its index.
///
/// Frame `n` covers the physical bytes `[n * 4096, (n + 1) * 4096)`. The
/// frame allocator tracks nothing but one bit per index; there is no
/// per-frame metadata object.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(u32);

impl PhysicalFrame {
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// The frame containing `pa` (the in-frame offset is discarded).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Base address of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// The frame `n` frames after this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}({:#010X})", self.0, self.base().as_u32())
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base(), f)
    }
}
