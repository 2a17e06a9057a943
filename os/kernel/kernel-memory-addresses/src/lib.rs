//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit addresses, physical frames and virtual
//! pages used by the frame allocator, the page-table mapper and the heap.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`PhysicalFrame`] | A 4 KiB physical frame, identified by its **index**. |
//! | [`VirtualAddress`] | A byte address in a (paged) virtual address space. |
//! | [`VirtualPage`] | The page-aligned base of a 4 KiB virtual page. |
//!
//! Keeping the physical and virtual flavours apart prevents the classic bug of
//! handing a virtual heap pointer to the page-table code (or vice versa).
//!
//! ## Two-level split
//!
//! With classic (non-PAE) i386 paging a virtual address is split into
//!
//! ```text
//! | 31‒22     | 21‒12     | 11‒0   |
//! | directory |   table   | offset |
//! ```
//!
//! [`VirtualAddress::directory_index`] and [`VirtualAddress::table_index`]
//! extract the two 10-bit indices.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xD000_1234);
//! assert_eq!(va.directory_index(), 0x340);
//! assert_eq!(va.table_index(), 0x001);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let frame = PhysicalFrame::containing(PhysicalAddress::new(0x0000_5042));
//! assert_eq!(frame.index(), 5);
//! assert_eq!(frame.base().as_u32(), 0x5000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_frame;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_frame::PhysicalFrame;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page / frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page offset bits.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// assert_eq!(align_down(0x12345, 16), 0x12340);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// assert_eq!(align_up(0x12345, 16), 0x12350);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Number of pages needed to cover `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(4096), 1);
        assert_eq!(pages_for(4097), 2);
    }

    #[test]
    fn alignment_helpers_agree() {
        for x in [0u32, 1, 15, 16, 17, 4095, 4096, 4097, 0x00AB_CDEF] {
            let down = align_down(x, 16);
            let up = align_up(x, 16);
            assert!(down <= x && x <= up);
            assert_eq!(down % 16, 0);
            assert_eq!(up % 16, 0);
            assert!(up - down <= 16);
        }
    }
}
