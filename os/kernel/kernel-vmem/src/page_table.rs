//! # Page Directory and Page Table (i386, two-level)
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! Both levels hold 1024 four-byte entries and occupy exactly one frame.

pub mod pd;
pub mod pt;

use kernel_memory_addresses::VirtualAddress;
pub use pd::{PageDirectory, PdEntry, PdIndex};
pub use pt::{PageTable, PtEntry, PtIndex};

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (PdIndex::from(va), PtIndex::from(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_of_kernel_heap_base() {
        let (pd, pt) = split_indices(VirtualAddress::new(0xD000_1234));
        assert_eq!(pd.as_usize(), 0x340);
        assert_eq!(pt.as_usize(), 1);
    }

    #[test]
    fn tables_are_one_frame() {
        assert_eq!(size_of::<PageDirectory>(), 4096);
        assert_eq!(align_of::<PageTable>(), 4096);
    }
}
