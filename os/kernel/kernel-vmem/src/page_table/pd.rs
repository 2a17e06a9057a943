//! # Page Directory (PD)
//!
//! Top level. A present entry points at a [`PageTable`](super::PageTable);
//! 4 MiB pages (`PS=1`) are not used. Slot
//! [`RECURSIVE_SLOT`](kernel_info::memory::RECURSIVE_SLOT) points back at the
//! directory itself.

use crate::{PageEntryBits, PageFlags};
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_DIRECTORY_START, RECURSIVE_SLOT};
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};

/// Index into the page directory (VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PdIndex(u16);

/// A page directory entry.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct PdEntry(PageEntryBits);

/// 1024 entries, frame-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl PdIndex {
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
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

    /// Whether this slot belongs to the shared kernel half.
    #[inline]
    #[must_use]
    pub const fn is_kernel(self) -> bool {
        self.as_usize() >= KERNEL_DIRECTORY_START
    }

    #[inline]
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        self.as_usize() == RECURSIVE_SLOT
    }
}

impl PdEntry {
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

    /// The page table frame this entry points at, if present.
    #[inline]
    #[must_use]
    pub const fn table(self) -> Option<PhysicalFrame> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "4 MiB pages are not used");
        Some(self.0.physical_frame())
    }

    /// Link to a page table. Forces `P=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_table(table: PhysicalFrame, flags: PageFlags) -> Self {
        let bits = PageEntryBits::from_flags(flags)
            .with_present(true)
            .with_large_page(false)
            .with_physical_frame(table);
        Self(bits)
    }

    /// Add user access to an existing link.
    #[inline]
    #[must_use]
    pub const fn with_user(self) -> Self {
        Self(self.0.with_user_access(true))
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0.into()
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PdIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: PdIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Present slots below the kernel half: the tables this space owns.
    pub fn user_tables(&self) -> impl Iterator<Item = (PdIndex, PhysicalFrame)> + '_ {
        self.entries[..KERNEL_DIRECTORY_START]
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.table().map(|t| (PdIndex::new(i as u16), t)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_link_roundtrip() {
        let e = PdEntry::make_table(PhysicalFrame::from_index(42), PageFlags::WRITABLE);
        assert_eq!(e.table().map(PhysicalFrame::index), Some(42));
        assert!(e.bits().writable());
        assert!(!e.bits().user_access());
        assert!(e.with_user().bits().user_access());
    }

    #[test]
    fn slot_classification() {
        assert!(PdIndex::from(VirtualAddress::new(0xC000_0000)).is_kernel());
        assert!(!PdIndex::from(VirtualAddress::new(0xBFFF_FFFF)).is_kernel());
        assert!(PdIndex::from(VirtualAddress::new(0xFFFF_F000)).is_recursive());
    }

    #[test]
    fn user_tables_skip_kernel_half() {
        let mut pd = PageDirectory::zeroed();
        pd.set(PdIndex::new(1), PdEntry::make_table(PhysicalFrame::from_index(7), PageFlags::WRITABLE));
        pd.set(PdIndex::new(800), PdEntry::make_table(PhysicalFrame::from_index(8), PageFlags::WRITABLE));
        let owned: Vec<_> = pd.user_tables().map(|(i, f)| (i.as_usize(), f.index())).collect();
        assert_eq!(owned, [(1, 7)]);
    }
}
