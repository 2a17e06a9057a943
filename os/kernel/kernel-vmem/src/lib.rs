//! # Virtual Memory Support
//!
//! Two-level i386 paging for the kernel and its processes.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at a page directory, with a
//!   shared kernel half and a self-referential (recursive) slot.
//! - i386 page entry bits ([`PageEntryBits`]) and the permission subset
//!   callers pass when mapping ([`PageFlags`]).
//! - Frame-aligned [`PageDirectory`] / [`PageTable`] wrappers.
//! - The hardware-facing seams: [`FrameAlloc`], [`PhysMapper`] and [`Mmu`].
//! - [`sim`]: RAM-backed implementations for hosted builds and tests.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//!  CR3 → Page Directory ──PDE──► Page Table ──PTE──► 4 KiB frame
//!        (1024 × 4 B)            (1024 × 4 B)
//! ```
//!
//! | Level | Table | Entry | Indexed by |
//! |:------|:------|:------|:-----------|
//! | 1 | **PD** (Page Directory) | **PDE** | VA bits 31‒22 |
//! | 2 | **PT** (Page Table) | **PTE** | VA bits 21‒12 |
//!
//! One directory covers 4 GiB; one page table covers 4 MiB.
//!
//! ### Recursive slot
//!
//! Directory slot 1023 points at the directory's own frame. While a space is
//! active its page tables are visible at `0xFFC0_0000` and the directory at
//! `0xFFFF_F000`, so the kernel can edit the active tables without a direct
//! physical map.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;
pub mod sim;

extern crate alloc;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageDirectory, PageTable, PdEntry, PtEntry};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalFrame, VirtualPage};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

bitflags::bitflags! {
    /// Permissions attached to a leaf mapping.
    ///
    /// The mapper never infers these; every caller passes the exact set.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is present in physical memory.
        const PRESENT  = 1 << 0;

        /// Page is writable.
        ///
        /// Without it the page is read-only for user mode (and for the
        /// kernel too when CR0.WP is set).
        const WRITABLE = 1 << 1;

        /// Page is accessible from user mode (CPL=3).
        const USER     = 1 << 2;
    }
}

impl PageFlags {
    /// Kernel read/write data.
    pub const KERNEL_RW: Self = Self::PRESENT.union(Self::WRITABLE);

    /// User read/write data (heap, stack).
    pub const USER_RW: Self = Self::KERNEL_RW.union(Self::USER);
}

/// Source of physical 4 KiB frames for page tables and mapped pages.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one frame. Never returns frame 0.
    fn alloc_frame(&mut self) -> Option<PhysicalFrame>;

    /// Return a frame obtained from [`alloc_frame`](Self::alloc_frame).
    fn free_frame(&mut self, frame: PhysicalFrame);
}

/// Converts physical addresses to *temporarily* usable pointers in the
/// current virtual address space.
///
/// # Safety
/// - The frame behind `pa` must be mapped writable for the lifetime `'a`.
/// - Type `T` must match the bytes at `pa` and must not cross the frame.
/// - The caller must not create aliasing `&mut` references.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Paging hardware of the CPU.
pub trait Mmu {
    /// Install `directory` as the active page directory (CR3).
    fn load_directory(&self, directory: PhysicalFrame);

    /// Drop any cached translation for `page` (invlpg).
    fn invalidate_page(&self, page: VirtualPage);
}

/// `mov cr3` / `invlpg` on 32-bit x86.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Mmu;

#[cfg(target_arch = "x86")]
impl Mmu for X86Mmu {
    #[inline]
    fn load_directory(&self, directory: PhysicalFrame) {
        let cr3 = directory.base().as_u32();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    #[inline]
    fn invalidate_page(&self, page: VirtualPage) {
        let va = page.base().as_u32();
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
        }
    }
}

/// Fill a frame with zeroes.
///
/// The caller must own `frame` (freshly allocated or being recycled).
#[inline]
pub fn zero_frame<M: PhysMapper>(mapper: &M, frame: PhysicalFrame) {
    // SAFETY: the frame is owned by the caller and exactly one page long.
    let bytes = unsafe { mapper.phys_to_mut::<[u8; PAGE_SIZE as usize]>(frame.base()) };
    bytes.fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_flags() {
        assert!(PageFlags::USER_RW.contains(PageFlags::KERNEL_RW));
        assert!(!PageFlags::KERNEL_RW.contains(PageFlags::USER));
        assert_eq!(PageFlags::USER_RW.bits(), 0b111);
    }

    #[test]
    fn zero_frame_clears_every_byte() {
        let ram = sim::SimulatedRam::new(4);
        let frame = PhysicalFrame::from_index(2);
        unsafe {
            ram.phys_to_mut::<[u8; 4096]>(frame.base()).fill(0xAA);
        }
        zero_frame(&ram, frame);
        let bytes = unsafe { ram.phys_to_mut::<[u8; 4096]>(frame.base()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
