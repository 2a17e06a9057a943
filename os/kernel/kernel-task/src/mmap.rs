//! Per-process memory-map descriptor.
//!
//! Heap bounds (`start ≤ brk ≤ end`), code and data segment bounds, the
//! user stack slots handed out so far, and a list of non-overlapping
//! regions for `mmap`-style extensions. The heap itself is a
//! [`RegionGrower`] with user-accessible pages, so `brk` moves exactly like
//! the kernel heap's break.
//!
//! The map describes the user half of one address space, so processes that
//! share a space share its map too.

use crate::TaskError;
use alloc::vec::Vec;
use core::ops::Range;
use kernel_alloc::region::RegionGrower;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PageFlags;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionKind {
    Anonymous,
    Stack,
    Image,
}

/// A mapped range `start..end` of a process.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub flags: PageFlags,
    pub kind: RegionKind,
}

impl Region {
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug)]
pub struct MemoryMap {
    heap: RegionGrower,
    code: Range<VirtualAddress>,
    data: Range<VirtualAddress>,
    regions: Vec<Region>,
    next_stack_slot: u32,
}

impl MemoryMap {
    /// Empty map whose heap may grow from `heap_start` up to `heap_end`.
    #[must_use]
    pub const fn new(heap_start: VirtualAddress, heap_end: VirtualAddress) -> Self {
        Self {
            heap: RegionGrower::new(heap_start, heap_end, PageFlags::USER_RW),
            code: heap_start..heap_start,
            data: heap_start..heap_start,
            regions: Vec::new(),
            next_stack_slot: 0,
        }
    }

    #[must_use]
    pub const fn heap_start(&self) -> VirtualAddress {
        self.heap.start()
    }

    /// Current program break.
    #[must_use]
    pub const fn brk(&self) -> VirtualAddress {
        self.heap.top()
    }

    #[must_use]
    pub const fn heap_end(&self) -> VirtualAddress {
        self.heap.limit()
    }

    /// Limit the heap to `bytes` past its start.
    pub fn set_heap_budget(&mut self, bytes: u32) {
        let end = self
            .heap
            .start()
            .checked_add(bytes)
            .unwrap_or(VirtualAddress::new(u32::MAX));
        self.heap.set_limit(end);
    }

    pub(crate) const fn heap_mut(&mut self) -> &mut RegionGrower {
        &mut self.heap
    }

    #[must_use]
    pub const fn heap(&self) -> &RegionGrower {
        &self.heap
    }

    /// Index of the next unused user stack slot.
    #[must_use]
    pub const fn next_stack_slot(&self) -> u32 {
        self.next_stack_slot
    }

    pub(crate) const fn advance_stack_slot(&mut self) {
        self.next_stack_slot += 1;
    }

    /// Record where the program image's code and data were loaded.
    pub fn set_segments(&mut self, code: Range<VirtualAddress>, data: Range<VirtualAddress>) {
        self.code = code;
        self.data = data;
    }

    #[must_use]
    pub fn code(&self) -> Range<VirtualAddress> {
        self.code.clone()
    }

    #[must_use]
    pub fn data(&self) -> Range<VirtualAddress> {
        self.data.clone()
    }

    /// Add a region, keeping the list sorted by start address.
    ///
    /// # Errors
    /// - [`TaskError::InvalidArgument`] for an empty or inverted range.
    /// - [`TaskError::RegionOverlap`] if it intersects an existing region.
    pub fn add_region(&mut self, region: Region) -> Result<(), TaskError> {
        if region.start >= region.end {
            return Err(TaskError::InvalidArgument);
        }
        if self.regions.iter().any(|r| r.overlaps(&region)) {
            return Err(TaskError::RegionOverlap {
                start: region.start,
                end: region.end,
            });
        }
        let at = self.regions.partition_point(|r| r.start < region.start);
        self.regions.insert(at, region);
        Ok(())
    }

    /// Remove the region starting at `start`.
    pub fn remove_region(&mut self, start: VirtualAddress) -> Option<Region> {
        let at = self.regions.iter().position(|r| r.start == start)?;
        Some(self.regions.remove(at))
    }

    /// The region containing `va`.
    #[must_use]
    pub fn region_at(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions.iter().find(|r| r.start <= va && va < r.end)
    }

    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}
