//! Simulated paging hardware for hosted builds.
//!
//! [`SimulatedRam`] is "physical memory": a boxed slice of frame-aligned
//! 4 KiB frames where physical address `n * 4096 + off` is byte `off` of
//! frame `n`. [`RecordingMmu`] remembers what would have been written to CR3
//! and which pages would have been invalidated.

use crate::{Mmu, PhysMapper};
use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalFrame, VirtualPage};

#[repr(C, align(4096))]
struct RamFrame([u8; PAGE_SIZE as usize]);

/// RAM-backed physical memory.
pub struct SimulatedRam {
    frames: Box<[UnsafeCell<RamFrame>]>,
}

impl SimulatedRam {
    /// `frames` zeroed frames, covering physical `0 .. frames * 4096`.
    #[must_use]
    pub fn new(frames: usize) -> Self {
        let frames = (0..frames)
            .map(|_| UnsafeCell::new(RamFrame([0; PAGE_SIZE as usize])))
            .collect();
        Self { frames }
    }

    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }
}

impl core::fmt::Debug for SimulatedRam {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedRam")
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = pa.frame().index() as usize;
        let off = pa.frame_offset() as usize;
        assert!(idx < self.frames.len(), "{pa:?} is outside simulated RAM");
        debug_assert!(off + size_of::<T>() <= PAGE_SIZE as usize, "access crosses a frame");

        // SAFETY: the frame lives as long as `self`; the caller upholds
        // the `PhysMapper` aliasing contract.
        unsafe { &mut *self.frames[idx].get().cast::<u8>().add(off).cast::<T>() }
    }
}

/// Sentinel for "no directory loaded yet".
const NO_DIRECTORY: u32 = u32::MAX;

/// MMU that records instead of touching hardware.
#[derive(Debug)]
pub struct RecordingMmu {
    active: AtomicU32,
    loads: AtomicUsize,
    invalidations: AtomicUsize,
    last_invalidated: AtomicU32,
}

impl RecordingMmu {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicU32::new(NO_DIRECTORY),
            loads: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            last_invalidated: AtomicU32::new(0),
        }
    }

    /// Directory most recently loaded into "CR3".
    pub fn active_directory(&self) -> Option<PhysicalFrame> {
        match self.active.load(Ordering::Acquire) {
            NO_DIRECTORY => None,
            idx => Some(PhysicalFrame::from_index(idx)),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::Acquire)
    }

    pub fn last_invalidated(&self) -> Option<VirtualPage> {
        (self.invalidation_count() > 0).then(|| {
            let va = self.last_invalidated.load(Ordering::Acquire);
            VirtualPage::containing(va.into())
        })
    }
}

impl Default for RecordingMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu for RecordingMmu {
    fn load_directory(&self, directory: PhysicalFrame) {
        self.active.store(directory.index(), Ordering::Release);
        self.loads.fetch_add(1, Ordering::AcqRel);
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.last_invalidated
            .store(page.base().as_u32(), Ordering::Release);
        self.invalidations.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_within_a_frame_are_distinct() {
        let ram = SimulatedRam::new(2);
        unsafe {
            *ram.phys_to_mut::<u32>(PhysicalAddress::new(0x1000)) = 1;
            *ram.phys_to_mut::<u32>(PhysicalAddress::new(0x1FFC)) = 2;
            assert_eq!(*ram.phys_to_mut::<u32>(PhysicalAddress::new(0x1000)), 1);
            assert_eq!(*ram.phys_to_mut::<u32>(PhysicalAddress::new(0x1FFC)), 2);
        }
    }

    #[test]
    #[should_panic(expected = "outside simulated RAM")]
    fn out_of_range_access_panics() {
        let ram = SimulatedRam::new(1);
        let _ = unsafe { ram.phys_to_mut::<u8>(PhysicalAddress::new(0x1000)) };
    }

    #[test]
    fn mmu_records_loads_and_invalidations() {
        let mmu = RecordingMmu::new();
        assert_eq!(mmu.active_directory(), None);
        mmu.load_directory(PhysicalFrame::from_index(9));
        mmu.invalidate_page(VirtualPage::containing(0xD000_0123.into()));
        assert_eq!(mmu.active_directory(), Some(PhysicalFrame::from_index(9)));
        assert_eq!(mmu.load_count(), 1);
        assert_eq!(mmu.last_invalidated().map(|p| p.base().as_u32()), Some(0xD000_0000));
    }
}
