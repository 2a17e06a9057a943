//! # Page Table (PT)
//!
//! Lowest level. Every present entry maps one 4 KiB frame.

use crate::PageEntryBits;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};

/// Index into a page table (VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PtIndex(u16);

/// A page table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct PtEntry(PageEntryBits);

/// 1024 entries, frame-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES_PER_TABLE],
}

impl PtIndex {
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.table_index() as u16)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PtEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    /// If present, the mapped frame and its entry bits.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<(PhysicalFrame, PageEntryBits)> {
        if !self.is_present() {
            return None;
        }
        Some((self.0.physical_frame(), self.0))
    }

    /// Leaf entry for `frame`. Forces `P=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_4k(frame: PhysicalFrame, mut bits: PageEntryBits) -> Self {
        bits.set_large_page(false);
        bits.set_present(true);
        bits.set_physical_frame(frame);
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0.into()
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PtIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Caller handles TLB invalidation for active mappings.
    #[inline]
    pub const fn set(&mut self, i: PtIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PageFlags;

    #[test]
    fn pte_4k_leaf() {
        let e = PtEntry::make_4k(
            PhysicalFrame::from_index(0x5555),
            PageEntryBits::from_flags(PageFlags::USER),
        );
        let (f, bits) = e.frame().unwrap();
        assert_eq!(f.base().as_u32(), 0x0555_5000);
        assert!(bits.present());
        assert!(bits.user_access());
        assert!(!bits.writable());
        assert!(!bits.large_page());
    }

    #[test]
    fn zero_entry_is_absent() {
        assert!(PtEntry::zero().frame().is_none());
        assert_eq!(PageTable::zeroed().present_count(), 0);
    }
}
