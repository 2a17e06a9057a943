//! # Kernel Heap
//!
//! `kmalloc` / `kcalloc` / `kfree` over a [`BlockAllocator`] in the kernel
//! heap window, behind its own [`SpinLock`].
//!
//! The caller supplies a [`Vmm`] for the **kernel** address space (it holds
//! the frame allocator while doing so). Lock order is therefore
//! frames → heap; nothing holding the heap lock takes another lock.

use crate::block::{BlockAllocator, BlockInfo, HeapStats};
use crate::vmm::Vmm;
use kernel_info::memory::{KERNEL_HEAP_END, KERNEL_HEAP_START};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, Mmu, PhysMapper};
use log::warn;

pub struct KernelHeap {
    blocks: SpinLock<BlockAllocator>,
}

impl KernelHeap {
    /// Heap over the configured kernel heap window.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_window(
            VirtualAddress::new(KERNEL_HEAP_START),
            VirtualAddress::new(KERNEL_HEAP_END),
        )
    }

    #[must_use]
    pub const fn with_window(start: VirtualAddress, end: VirtualAddress) -> Self {
        Self {
            blocks: SpinLock::new(BlockAllocator::new(start, end)),
        }
    }

    /// Allocate `size` bytes. `None` when memory is exhausted.
    pub fn kmalloc<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &mut Vmm<'_, M, A, U>,
        size: u32,
    ) -> Option<VirtualAddress> {
        self.blocks
            .lock()
            .allocate(vmm, size)
            .inspect_err(|e| warn!("kmalloc({size}) failed: {e}"))
            .ok()
    }

    /// Allocate `count * size` zeroed bytes. `None` on overflow or when
    /// memory is exhausted.
    pub fn kcalloc<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &mut Vmm<'_, M, A, U>,
        count: u32,
        size: u32,
    ) -> Option<VirtualAddress> {
        let total = count.checked_mul(size)?;
        self.blocks
            .lock()
            .allocate_zeroed(vmm, total)
            .inspect_err(|e| warn!("kcalloc({count}, {size}) failed: {e}"))
            .ok()
    }

    /// Release `ptr`. Null is ignored.
    pub fn kfree<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &mut Vmm<'_, M, A, U>,
        ptr: VirtualAddress,
    ) {
        self.blocks.lock().free(vmm, ptr);
    }

    pub fn usable_size<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
        ptr: VirtualAddress,
    ) -> Option<u32> {
        self.blocks.lock().usable_size(vmm, ptr)
    }

    /// Visit every block in address order.
    pub fn walk<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
        f: impl FnMut(BlockInfo),
    ) {
        self.blocks.lock().walk(vmm, f);
    }

    pub fn stats<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
    ) -> HeapStats {
        self.blocks.lock().stats(vmm)
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}
