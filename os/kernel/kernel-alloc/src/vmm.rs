//! Minimal Virtual Memory Manager (VMM).
//!
//! Bundles everything a mapping operation needs for one address space: the
//! [`AddressSpace`], the [`PhysMapper`] used to reach table frames, the frame
//! allocator and the [`Mmu`] for TLB maintenance. Built on demand by the
//! caller that holds the frame allocator lock, and dropped with it.
//!
//! # Example
//! ```
//! use kernel_alloc::{frame_alloc::BitmapFrameAlloc, vmm::Vmm};
//! use kernel_memory_addresses::VirtualAddress;
//! use kernel_vmem::{AddressSpace, PageFlags, sim::{RecordingMmu, SimulatedRam}};
//!
//! let ram = SimulatedRam::new(16);
//! let mmu = RecordingMmu::new();
//! let mut frames = BitmapFrameAlloc::with_capacity(16);
//! let space = AddressSpace::bootstrap(&ram, &mut frames).unwrap();
//!
//! let mut vmm = Vmm::new(&space, &ram, &mut frames, &mmu);
//! let va = VirtualAddress::new(0x4000_0000);
//! vmm.map_anon_pages(va, 2, PageFlags::USER_RW).unwrap();
//! assert!(vmm.translate(va + 0x1FFF).is_some());
//! assert_eq!(vmm.unmap_pages(va, 2), 2);
//! ```

use crate::AllocError;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, Mmu, PageFlags, PhysMapper, zero_frame};
use log::{debug, warn};

/// Mapping context for one address space.
pub struct Vmm<'a, M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized> {
    space: &'a AddressSpace,
    mapper: &'a M,
    alloc: &'a mut A,
    mmu: &'a U,
}

impl<'a, M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized> Vmm<'a, M, A, U> {
    pub const fn new(space: &'a AddressSpace, mapper: &'a M, alloc: &'a mut A, mmu: &'a U) -> Self {
        Self {
            space,
            mapper,
            alloc,
            mmu,
        }
    }

    #[must_use]
    pub const fn space(&self) -> &AddressSpace {
        self.space
    }

    /// The frame allocator, for callers that manage frames directly.
    pub fn frames(&mut self) -> &mut A {
        self.alloc
    }

    /// Translate VA→PA if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space.translate(self.mapper, va)
    }

    /// Map one page to an existing frame.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    pub fn map_page(
        &mut self,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        Ok(self.space.map(self.mapper, self.alloc, va, frame, flags)?)
    }

    /// Back `pages` pages starting at `start` with freshly allocated, zeroed
    /// frames (no physical contiguity).
    ///
    /// All or nothing: on failure every page mapped by this call is unmapped
    /// and its frame returned. Pages that are already present are never
    /// replaced.
    ///
    /// # Errors
    /// - [`AllocError::AlreadyMapped`] if any page of the range is present.
    /// - [`AllocError::OutOfFrames`] when frames for the pages or their
    ///   tables run out; other mapping errors are passed through.
    pub fn map_anon_pages(
        &mut self,
        start: VirtualAddress,
        pages: u32,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        debug_assert!(start.is_page_aligned());
        if let Some(taken) = (0..pages)
            .map(|i| start + i * PAGE_SIZE)
            .find(|va| self.translate(*va).is_some())
        {
            warn!("Refusing to map over {taken}");
            return Err(AllocError::AlreadyMapped(taken));
        }
        for i in 0..pages {
            let va = start + i * PAGE_SIZE;
            let result = match self.alloc.alloc_frame() {
                None => Err(AllocError::OutOfFrames),
                Some(frame) => {
                    zero_frame(self.mapper, frame);
                    self.map_page(va, frame, flags).inspect_err(|_| {
                        self.alloc.free_frame(frame);
                    })
                }
            };
            if let Err(e) = result {
                warn!("Mapping page {i} of {pages} at {va} failed: {e}");
                self.unmap_pages(start, i);
                return Err(e);
            }
        }
        debug!("Mapped {pages} anonymous pages at {start}");
        Ok(())
    }

    /// Unmap `pages` pages starting at `start` and free their frames.
    ///
    /// Pages that are not mapped are skipped. Returns how many frames were
    /// freed.
    pub fn unmap_pages(&mut self, start: VirtualAddress, pages: u32) -> u32 {
        let mut freed = 0;
        for i in 0..pages {
            if let Ok(frame) = self.space.unmap(self.mapper, self.mmu, start + i * PAGE_SIZE) {
                self.alloc.free_frame(frame);
                freed += 1;
            }
        }
        freed
    }

    /// Read a plain-data value.
    ///
    /// # Errors
    /// [`AllocError::Map`] if the memory is not mapped.
    pub fn read<T: Copy>(&self, va: VirtualAddress) -> Result<T, AllocError> {
        Ok(self.space.read(self.mapper, va)?)
    }

    /// Write a plain-data value.
    ///
    /// # Errors
    /// [`AllocError::Map`] if the memory is not mapped.
    pub fn write<T: Copy>(&self, va: VirtualAddress, value: &T) -> Result<(), AllocError> {
        Ok(self.space.write(self.mapper, va, value)?)
    }

    /// Fill `len` bytes at `va`.
    ///
    /// # Errors
    /// [`AllocError::Map`] if the memory is not mapped.
    pub fn fill(&self, va: VirtualAddress, value: u8, len: usize) -> Result<(), AllocError> {
        Ok(self.space.fill(self.mapper, va, value, len)?)
    }

    /// Copy `bytes` to `va`.
    ///
    /// # Errors
    /// [`AllocError::Map`] if the memory is not mapped.
    pub fn copy_in(&self, va: VirtualAddress, bytes: &[u8]) -> Result<(), AllocError> {
        Ok(self.space.copy_in(self.mapper, va, bytes)?)
    }

    /// Copy from `va` into `out`.
    ///
    /// # Errors
    /// [`AllocError::Map`] if the memory is not mapped.
    pub fn copy_out(&self, va: VirtualAddress, out: &mut [u8]) -> Result<(), AllocError> {
        Ok(self.space.copy_out(self.mapper, va, out)?)
    }
}
