//! Growable virtual region (`sbrk`-style).
//!
//! The region grows upward from `start`. `top` is the current break and
//! `slack` is the mapped but unused tail of the last page behind it:
//!
//! ```text
//! start                        top      top+slack (page aligned)
//!   │ handed out               │ slack  │ unmapped ...         │ limit
//!   ├──────────────────────────┼────────┼──────────────────────┤
//! ```
//!
//! A request that fits in the slack maps nothing. Otherwise exactly
//! `⌈(size - slack) / 4096⌉` zeroed frames are mapped after the slack.

use crate::AllocError;
use crate::vmm::Vmm;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, pages_for};
use kernel_vmem::{FrameAlloc, Mmu, PageFlags, PhysMapper};
use log::{trace, warn};

#[derive(Debug, Clone)]
pub struct RegionGrower {
    start: VirtualAddress,
    top: VirtualAddress,
    slack: u32,
    limit: VirtualAddress,
    flags: PageFlags,
}

impl RegionGrower {
    /// An empty region over `start..limit` whose pages are mapped with
    /// `flags`. `start` must be page aligned.
    #[must_use]
    pub const fn new(start: VirtualAddress, limit: VirtualAddress, flags: PageFlags) -> Self {
        debug_assert!(start.is_page_aligned());
        Self {
            start,
            top: start,
            slack: 0,
            limit,
            flags,
        }
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Current break.
    #[must_use]
    pub const fn top(&self) -> VirtualAddress {
        self.top
    }

    #[must_use]
    pub const fn slack(&self) -> u32 {
        self.slack
    }

    #[must_use]
    pub const fn limit(&self) -> VirtualAddress {
        self.limit
    }

    /// Pages currently backed by frames.
    #[must_use]
    pub fn mapped_pages(&self) -> u32 {
        (self.top - self.start + self.slack) / PAGE_SIZE
    }

    /// Bytes that may still be handed out.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit - self.top
    }

    /// Move the limit, e.g. to apply a per-process budget. Never below the
    /// mapped end.
    pub fn set_limit(&mut self, limit: VirtualAddress) {
        let mapped_end = self.top + self.slack;
        self.limit = if limit < mapped_end { mapped_end } else { limit };
    }

    /// Extend the region by `size` bytes and return the previous break.
    ///
    /// The returned memory is zero-filled. `grow(0)` just reports the break.
    ///
    /// # Errors
    /// - [`AllocError::RegionExhausted`] if the request would pass the limit.
    /// - [`AllocError::OutOfFrames`] if frames run out; the region is left
    ///   unchanged.
    pub fn grow<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &mut self,
        vmm: &mut Vmm<'_, M, A, U>,
        size: u32,
    ) -> Result<VirtualAddress, AllocError> {
        let base = self.top;
        if size <= self.slack {
            self.slack -= size;
            self.top += size;
            trace!("Grew region at {} by {size} bytes from slack", self.start);
            return Ok(base);
        }

        let available = self.remaining();
        if size > available {
            warn!(
                "Region at {} exhausted: {size} bytes requested, {available} available",
                self.start
            );
            return Err(AllocError::RegionExhausted {
                requested: size,
                available,
            });
        }

        let needed = size - self.slack;
        let pages = pages_for(needed);
        let first_new = self.top + self.slack;
        if pages * PAGE_SIZE > self.limit - first_new {
            // The tail of the last page would cross the limit.
            return Err(AllocError::RegionExhausted {
                requested: size,
                available,
            });
        }
        vmm.map_anon_pages(first_new, pages, self.flags)?;

        self.slack = pages * PAGE_SIZE - needed;
        self.top += size;
        trace!(
            "Grew region at {} by {size} bytes, {pages} new pages, slack {}",
            self.start, self.slack
        );
        Ok(base)
    }

    /// Unmap every page of the region, free its frames and reset the break.
    /// Returns the number of frames freed.
    pub fn release<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &mut self,
        vmm: &mut Vmm<'_, M, A, U>,
    ) -> u32 {
        let freed = vmm.unmap_pages(self.start, self.mapped_pages());
        self.top = self.start;
        self.slack = 0;
        freed
    }
}
