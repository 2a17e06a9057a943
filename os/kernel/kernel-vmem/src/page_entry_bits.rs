use crate::PageFlags;
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalFrame;

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// Models the common superset of a page-directory entry (PDE) and a
/// page-table entry (PTE) with 4 KiB pages (no PSE, no PAE).
///
/// ### Bit layout
///
/// | Bits  | Name   | Meaning |
/// |-------|--------|---------|
/// | 0     | `P`    | Present |
/// | 1     | `RW`   | Writable |
/// | 2     | `US`   | User-mode accessible |
/// | 3     | `PWT`  | Write-through caching |
/// | 4     | `PCD`  | Cache disabled |
/// | 5     | `A`    | Accessed (set by the CPU) |
/// | 6     | `D`    | Dirty (PTE only, set by the CPU) |
/// | 7     | `PS`   | 4 MiB page (PDE) / PAT (PTE); always 0 here |
/// | 8     | `G`    | Global (PTE only) |
/// | 9–11  | avail  | Free for OS use |
/// | 12–31 | frame  | Physical frame number |
///
/// For a PDE the effective permission of a page is the intersection of the
/// PDE and PTE bits, so a directory entry covering user pages must carry
/// `US` as well.
///
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalFrame;
/// let e = PageEntryBits::new()
///     .with_present(true)
///     .with_writable(true)
///     .with_physical_frame(PhysicalFrame::from_index(0x123));
/// assert_eq!(u32::from(e), 0x0012_3003);
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6); leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Never set by this kernel.
    pub large_page: bool,

    /// Global (G, bit 8); leaf only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    #[inline]
    #[must_use]
    pub const fn physical_frame(&self) -> PhysicalFrame {
        PhysicalFrame::from_index(self.frame_number())
    }

    #[inline]
    pub const fn set_physical_frame(&mut self, frame: PhysicalFrame) {
        self.set_frame_number(frame.index());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_frame(self, frame: PhysicalFrame) -> Self {
        self.with_frame_number(frame.index())
    }

    /// Entry bits for the permission set in `flags`.
    #[inline]
    #[must_use]
    pub const fn from_flags(flags: PageFlags) -> Self {
        Self::new()
            .with_present(flags.contains(PageFlags::PRESENT))
            .with_writable(flags.contains(PageFlags::WRITABLE))
            .with_user_access(flags.contains(PageFlags::USER))
    }

    /// The permission subset of this entry.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> PageFlags {
        let mut f = PageFlags::empty();
        if self.present() {
            f = f.union(PageFlags::PRESENT);
        }
        if self.writable() {
            f = f.union(PageFlags::WRITABLE);
        }
        if self.user_access() {
            f = f.union(PageFlags::USER);
        }
        f
    }
}
