//! First-fit block allocator on top of a [`RegionGrower`].
//!
//! Every block starts with a 16-byte header followed by its payload:
//!
//! ```text
//! +------+------+------+------+-------------------------+
//! | size | tag  | next | free |     payload (size)      |
//! +------+------+------+------+-------------------------+
//! ^ block                     ^ block + HEADER_SIZE (returned pointer)
//! ```
//!
//! Blocks tile the region back to back and the list is kept in **address
//! order**: new blocks are only appended at the region top and splits insert
//! the remainder right after the block being split. Freeing merges the block
//! with a free successor and a free predecessor, so no two neighbouring free
//! blocks ever remain separate.
//!
//! Headers carry [`BLOCK_TAG`]. A wrong tag or an absurd size on any block
//! the allocator touches means the heap is corrupt, which is fatal.

use crate::AllocError;
use crate::region::RegionGrower;
use crate::vmm::Vmm;
use kernel_info::memory::{BLOCK_ALIGN, MAX_BLOCK_SIZE};
use kernel_memory_addresses::{VirtualAddress, align_up};
use kernel_vmem::{FrameAlloc, Mmu, PageFlags, PhysMapper};
use log::{error, trace, warn};

/// Sentinel stored in every block header.
pub const BLOCK_TAG: u32 = 0xB10C_4EAD;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct BlockHeader {
    size: u32,
    tag: u32,
    /// Address of the next block; 0 ends the list.
    next: u32,
    free: u32,
}

/// Size of a block header; also the payload alignment.
pub const HEADER_SIZE: u32 = size_of::<BlockHeader>() as u32;

const _: () = assert!(HEADER_SIZE == BLOCK_ALIGN);

impl BlockHeader {
    const fn new(size: u32, free: bool, next: u32) -> Self {
        Self {
            size,
            tag: BLOCK_TAG,
            next,
            free: free as u32,
        }
    }

    const fn is_free(&self) -> bool {
        self.free != 0
    }

    fn next_block(&self) -> Option<VirtualAddress> {
        (self.next != 0).then(|| VirtualAddress::new(self.next))
    }

    fn end(&self, at: VirtualAddress) -> VirtualAddress {
        at + HEADER_SIZE + self.size
    }
}

/// One block as seen by [`BlockAllocator::walk`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    /// Payload address (what `allocate` returned).
    pub payload: VirtualAddress,
    pub size: u32,
    pub free: bool,
}

/// Summary of the block list.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    pub blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes in free blocks.
    pub free_bytes: u32,
    /// Payload bytes in allocated blocks.
    pub used_bytes: u32,
    /// Bytes handed out by the region (headers included).
    pub region_bytes: u32,
}

#[derive(Debug)]
pub struct BlockAllocator {
    region: RegionGrower,
    head: Option<VirtualAddress>,
    tail: Option<VirtualAddress>,
}

impl BlockAllocator {
    /// An empty heap over the kernel window `start..end`.
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        Self {
            region: RegionGrower::new(start, end, PageFlags::KERNEL_RW),
            head: None,
            tail: None,
        }
    }

    #[must_use]
    pub const fn region(&self) -> &RegionGrower {
        &self.region
    }

    fn corrupt(at: VirtualAddress, what: &str) -> ! {
        error!("Kernel heap corrupted at {at}: {what}");
        panic!("kernel heap corrupted at {at}: {what}");
    }

    fn load<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        vmm: &Vmm<'_, M, A, U>,
        at: VirtualAddress,
    ) -> BlockHeader {
        let h: BlockHeader = match vmm.read(at) {
            Ok(h) => h,
            Err(_) => Self::corrupt(at, "block outside the mapped heap"),
        };
        if h.tag != BLOCK_TAG {
            Self::corrupt(at, "bad block tag");
        }
        if h.size > MAX_BLOCK_SIZE {
            Self::corrupt(at, "block size out of range");
        }
        h
    }

    fn store<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        vmm: &Vmm<'_, M, A, U>,
        at: VirtualAddress,
        h: &BlockHeader,
    ) {
        if vmm.write(at, h).is_err() {
            Self::corrupt(at, "block outside the mapped heap");
        }
    }

    /// Allocate at least `size` bytes; the payload is 16-byte aligned.
    ///
    /// Uses the first free block that fits, splitting off the rest when it
    /// is larger than a header; grows the region when nothing fits.
    ///
    /// # Errors
    /// [`AllocError::TooLarge`] above [`MAX_BLOCK_SIZE`]; region growth
    /// errors otherwise.
    pub fn allocate<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &mut self,
        vmm: &mut Vmm<'_, M, A, U>,
        size: u32,
    ) -> Result<VirtualAddress, AllocError> {
        if size > MAX_BLOCK_SIZE - HEADER_SIZE {
            return Err(AllocError::TooLarge(size));
        }
        let size = align_up(size.max(1), BLOCK_ALIGN);

        let mut cur = self.head;
        while let Some(at) = cur {
            let mut h = Self::load(vmm, at);
            if h.is_free() && h.size >= size {
                let remainder = h.size - size;
                if remainder > HEADER_SIZE {
                    let split = at + HEADER_SIZE + size;
                    Self::store(vmm, split, &BlockHeader::new(remainder - HEADER_SIZE, true, h.next));
                    h.next = split.as_u32();
                    h.size = size;
                    if self.tail == Some(at) {
                        self.tail = Some(split);
                    }
                }
                h.free = 0;
                Self::store(vmm, at, &h);
                trace!("Reused block {at} for {size} bytes");
                return Ok(at + HEADER_SIZE);
            }
            cur = h.next_block();
        }

        let at = self.region.grow(vmm, HEADER_SIZE + size)?;
        Self::store(vmm, at, &BlockHeader::new(size, false, 0));
        match self.tail {
            Some(t) => {
                let mut th = Self::load(vmm, t);
                debug_assert_eq!(th.end(t), at, "heap blocks must be contiguous");
                th.next = at.as_u32();
                Self::store(vmm, t, &th);
            }
            None => self.head = Some(at),
        }
        self.tail = Some(at);
        trace!("New block {at} for {size} bytes");
        Ok(at + HEADER_SIZE)
    }

    /// Like [`allocate`](Self::allocate) with the whole usable payload
    /// zeroed, so no stale bytes leak into the new owner.
    ///
    /// # Errors
    /// As [`allocate`](Self::allocate).
    pub fn allocate_zeroed<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &mut self,
        vmm: &mut Vmm<'_, M, A, U>,
        size: u32,
    ) -> Result<VirtualAddress, AllocError> {
        let ptr = self.allocate(vmm, size)?;
        let h = Self::load(vmm, ptr - HEADER_SIZE);
        vmm.fill(ptr, 0, h.size as usize)?;
        Ok(ptr)
    }

    /// Find the block whose payload is `ptr`, with its predecessor.
    fn find<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
        ptr: VirtualAddress,
    ) -> Option<(Option<VirtualAddress>, VirtualAddress, BlockHeader)> {
        let target = VirtualAddress::new(ptr.as_u32().checked_sub(HEADER_SIZE)?);
        let mut prev = None;
        let mut cur = self.head;
        while let Some(at) = cur {
            if at > target {
                return None;
            }
            let h = Self::load(vmm, at);
            if at == target {
                return Some((prev, at, h));
            }
            prev = Some(at);
            cur = h.next_block();
        }
        None
    }

    /// Release the block at `ptr` and merge it with free neighbours.
    ///
    /// A null pointer is ignored. Freeing an unknown or already free pointer
    /// trips a debug assertion and is ignored in release builds.
    pub fn free<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &mut self,
        vmm: &mut Vmm<'_, M, A, U>,
        ptr: VirtualAddress,
    ) {
        if ptr.is_null() {
            return;
        }
        let found = self.find(vmm, ptr).filter(|(_, _, h)| !h.is_free());
        debug_assert!(found.is_some(), "free of unknown or free block {ptr}");
        let Some((prev, at, mut h)) = found else {
            warn!("Ignoring free of {ptr}: not an allocated block");
            return;
        };

        h.free = 1;
        if let Some(next_at) = h.next_block() {
            let next = Self::load(vmm, next_at);
            if next.is_free() && h.end(at) == next_at {
                h.size += HEADER_SIZE + next.size;
                h.next = next.next;
                if self.tail == Some(next_at) {
                    self.tail = Some(at);
                }
            }
        }
        if let Some(prev_at) = prev {
            let mut p = Self::load(vmm, prev_at);
            if p.is_free() && p.end(prev_at) == at {
                p.size += HEADER_SIZE + h.size;
                p.next = h.next;
                Self::store(vmm, prev_at, &p);
                if self.tail == Some(at) {
                    self.tail = Some(prev_at);
                }
                trace!("Freed {ptr} into {prev_at}");
                return;
            }
        }
        Self::store(vmm, at, &h);
        trace!("Freed {ptr}");
    }

    /// Payload capacity of the live allocation at `ptr`.
    pub fn usable_size<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
        ptr: VirtualAddress,
    ) -> Option<u32> {
        self.find(vmm, ptr)
            .filter(|(_, _, h)| !h.is_free())
            .map(|(_, _, h)| h.size)
    }

    /// Visit every block in address order.
    pub fn walk<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
        mut f: impl FnMut(BlockInfo),
    ) {
        let mut cur = self.head;
        while let Some(at) = cur {
            let h = Self::load(vmm, at);
            f(BlockInfo {
                payload: at + HEADER_SIZE,
                size: h.size,
                free: h.is_free(),
            });
            cur = h.next_block();
        }
    }

    pub fn stats<M: PhysMapper, A: FrameAlloc + ?Sized, U: Mmu + ?Sized>(
        &self,
        vmm: &Vmm<'_, M, A, U>,
    ) -> HeapStats {
        let mut stats = HeapStats {
            region_bytes: self.region.top() - self.region.start(),
            ..HeapStats::default()
        };
        self.walk(vmm, |b| {
            stats.blocks += 1;
            if b.free {
                stats.free_blocks += 1;
                stats.free_bytes += b.size;
            } else {
                stats.used_bytes += b.size;
            }
        });
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::BitmapFrameAlloc;
    use kernel_memory_addresses::PAGE_SIZE;
    use kernel_vmem::AddressSpace;
    use kernel_vmem::sim::{RecordingMmu, SimulatedRam};

    const HEAP: u32 = 0xD000_0000;

    struct Fixture {
        ram: SimulatedRam,
        mmu: RecordingMmu,
        frames: BitmapFrameAlloc,
        space: AddressSpace,
    }

    impl Fixture {
        fn new(frames: u32) -> Self {
            let ram = SimulatedRam::new(frames as usize);
            let mut frames = BitmapFrameAlloc::with_capacity(frames);
            let space = AddressSpace::bootstrap(&ram, &mut frames).unwrap();
            Self { ram, mmu: RecordingMmu::new(), frames, space }
        }

        fn vmm(&mut self) -> Vmm<'_, SimulatedRam, BitmapFrameAlloc, RecordingMmu> {
            Vmm::new(&self.space, &self.ram, &mut self.frames, &self.mmu)
        }
    }

    fn heap() -> BlockAllocator {
        BlockAllocator::new(HEAP.into(), (HEAP + 0x10_0000).into())
    }

    #[test]
    fn sizes_are_rounded_and_aligned() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 1).unwrap();
        let b = h.allocate(&mut vmm, 17).unwrap();
        assert_eq!(a.as_u32(), HEAP + HEADER_SIZE);
        assert_eq!(b.as_u32() % BLOCK_ALIGN, 0);
        assert_eq!(h.usable_size(&vmm, a), Some(16));
        assert_eq!(h.usable_size(&vmm, b), Some(32));
    }

    #[test]
    fn freed_block_is_reused_by_smaller_request() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 256).unwrap();
        let _guard = h.allocate(&mut vmm, 16).unwrap();
        h.free(&mut vmm, a);
        let b = h.allocate(&mut vmm, 100).unwrap();
        assert_eq!(a, b);
        // 256 - 112 = 144 left over, split off as a free block
        let s = h.stats(&vmm);
        assert_eq!((s.blocks, s.free_blocks, s.free_bytes), (3, 1, 144 - HEADER_SIZE));
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 64).unwrap();
        let _b = h.allocate(&mut vmm, 16).unwrap();
        h.free(&mut vmm, a);
        let c = h.allocate(&mut vmm, 48).unwrap();
        assert_eq!(c, a);
        assert_eq!(h.usable_size(&vmm, c), Some(64));
    }

    #[test]
    fn free_coalesces_both_neighbours() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 32).unwrap();
        let b = h.allocate(&mut vmm, 32).unwrap();
        let c = h.allocate(&mut vmm, 32).unwrap();
        let _d = h.allocate(&mut vmm, 32).unwrap();
        h.free(&mut vmm, a);
        h.free(&mut vmm, c);
        assert_eq!(h.stats(&vmm).free_blocks, 2);
        h.free(&mut vmm, b);
        let s = h.stats(&vmm);
        assert_eq!(s.free_blocks, 1);
        assert_eq!(s.free_bytes, 3 * 32 + 2 * HEADER_SIZE);
        // The merged block serves a request spanning all three.
        assert_eq!(h.allocate(&mut vmm, 128).unwrap(), a);
    }

    #[test]
    fn tail_tracking_survives_merges() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 32).unwrap();
        let b = h.allocate(&mut vmm, 32).unwrap();
        h.free(&mut vmm, b);
        h.free(&mut vmm, a);
        // Growing must append after the merged tail, not after the stale `b`.
        let big = h.allocate(&mut vmm, 512).unwrap();
        assert!(big > b);
        let mut last = VirtualAddress::new(0);
        h.walk(&vmm, |blk| {
            assert!(blk.payload > last);
            last = blk.payload;
        });
        assert_eq!(last, big);
    }

    #[test]
    fn growth_consumes_frames_lazily() {
        let mut fx = Fixture::new(64);
        let before = fx.frames.free_count();
        let mut vmm = fx.vmm();
        let mut h = heap();
        for _ in 0..(PAGE_SIZE / 32) {
            h.allocate(&mut vmm, 16).unwrap();
        }
        // 4096 bytes of 32-byte blocks: one page and the page table.
        assert_eq!(vmm.frames().free_count(), before - 2);
        h.allocate(&mut vmm, 16).unwrap();
        assert_eq!(vmm.frames().free_count(), before - 3);
    }

    #[test]
    fn oversized_requests_fail() {
        let mut fx = Fixture::new(8);
        let mut vmm = fx.vmm();
        let mut h = heap();
        assert_eq!(h.allocate(&mut vmm, u32::MAX), Err(AllocError::TooLarge(u32::MAX)));
        assert!(matches!(
            h.allocate(&mut vmm, 0x20_0000),
            Err(AllocError::RegionExhausted { .. })
        ));
    }

    #[test]
    fn zeroed_allocation_hides_previous_contents() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 64).unwrap();
        vmm.fill(a, 0xEE, 64).unwrap();
        h.free(&mut vmm, a);
        let b = h.allocate_zeroed(&mut vmm, 40).unwrap();
        assert_eq!(a, b);
        let mut out = [0xFFu8; 64];
        vmm.copy_out(b, &mut out).unwrap();
        assert!(out.iter().all(|&x| x == 0));
    }

    #[test]
    #[should_panic(expected = "bad block tag")]
    fn smashed_header_is_fatal() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 16).unwrap();
        let _b = h.allocate(&mut vmm, 16).unwrap();
        // Overrun `a` into the next header.
        vmm.fill(a, 0x41, 32).unwrap();
        let _ = h.allocate(&mut vmm, 64);
    }

    #[test]
    #[should_panic(expected = "free of unknown or free block")]
    fn double_free_asserts_in_debug() {
        let mut fx = Fixture::new(32);
        let mut vmm = fx.vmm();
        let mut h = heap();
        let a = h.allocate(&mut vmm, 16).unwrap();
        h.free(&mut vmm, a);
        h.free(&mut vmm, a);
    }
}
