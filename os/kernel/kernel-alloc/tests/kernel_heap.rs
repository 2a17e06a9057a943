use kernel_alloc::block::BlockInfo;
use kernel_alloc::frame_alloc::BitmapFrameAlloc;
use kernel_alloc::heap::KernelHeap;
use kernel_alloc::region::RegionGrower;
use kernel_alloc::vmm::Vmm;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::sim::{RecordingMmu, SimulatedRam};
use kernel_vmem::{AddressSpace, PageFlags};

struct Rng(u32);

impl Rng {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

struct Machine {
    ram: SimulatedRam,
    mmu: RecordingMmu,
    frames: BitmapFrameAlloc,
    kernel: AddressSpace,
}

impl Machine {
    fn new(frames: u32) -> Self {
        let ram = SimulatedRam::new(frames as usize);
        let mut frames_alloc = BitmapFrameAlloc::with_capacity(frames);
        let kernel = AddressSpace::bootstrap(&ram, &mut frames_alloc).unwrap();
        Self {
            ram,
            mmu: RecordingMmu::new(),
            frames: frames_alloc,
            kernel,
        }
    }

    fn vmm(&mut self) -> Vmm<'_, SimulatedRam, BitmapFrameAlloc, RecordingMmu> {
        Vmm::new(&self.kernel, &self.ram, &mut self.frames, &self.mmu)
    }
}

#[test]
fn live_allocations_never_alias_and_fit() {
    let mut m = Machine::new(256);
    let heap = KernelHeap::new();
    let mut vmm = m.vmm();
    let mut rng = Rng(0xDEAD_BEEF);
    let mut live: Vec<(VirtualAddress, u32, u8)> = Vec::new();

    for round in 0..1_500u32 {
        if rng.next() % 3 == 0 && !live.is_empty() {
            let (p, n, stamp) = live.swap_remove((rng.next() as usize) % live.len());
            let mut buf = vec![0u8; n as usize];
            vmm.copy_out(p, &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == stamp), "payload at {p} was overwritten");
            heap.kfree(&mut vmm, p);
        } else {
            let size = 1 + rng.next() % 600;
            let p = heap.kmalloc(&mut vmm, size).expect("heap has room");
            let usable = heap.usable_size(&vmm, p).unwrap();
            assert!(usable >= size);
            let stamp = (round % 251) as u8;
            vmm.fill(p, stamp, usable as usize).unwrap();
            live.push((p, usable, stamp));
        }

        let mut spans: Vec<_> = live
            .iter()
            .map(|&(p, n, _)| (p.as_u32(), p.as_u32() + n))
            .collect();
        spans.sort_unstable();
        for w in spans.windows(2) {
            assert!(w[0].1 <= w[1].0, "live blocks overlap: {w:?}");
        }
    }
}

#[test]
fn no_two_adjacent_free_blocks_after_any_free() {
    let mut m = Machine::new(256);
    let heap = KernelHeap::new();
    let mut vmm = m.vmm();
    let mut rng = Rng(99);
    let mut live = Vec::new();

    for _ in 0..800 {
        if rng.next() % 2 == 0 && !live.is_empty() {
            let p = live.swap_remove((rng.next() as usize) % live.len());
            heap.kfree(&mut vmm, p);

            let mut blocks: Vec<BlockInfo> = Vec::new();
            heap.walk(&vmm, |b| blocks.push(b));
            for w in blocks.windows(2) {
                assert!(!(w[0].free && w[1].free), "unmerged neighbours {w:?}");
            }
        } else {
            live.push(heap.kmalloc(&mut vmm, 1 + rng.next() % 300).unwrap());
        }
    }

    for p in live {
        heap.kfree(&mut vmm, p);
    }
    let stats = heap.stats(&vmm);
    assert_eq!((stats.blocks, stats.free_blocks), (1, 1));
}

#[test]
fn kcalloc_zeroes_and_rejects_overflow() {
    let mut m = Machine::new(64);
    let heap = KernelHeap::new();
    let mut vmm = m.vmm();

    let p = heap.kmalloc(&mut vmm, 128).unwrap();
    vmm.fill(p, 0xCC, 128).unwrap();
    heap.kfree(&mut vmm, p);

    let q = heap.kcalloc(&mut vmm, 4, 30).unwrap();
    assert_eq!(p, q);
    let mut buf = [1u8; 128];
    vmm.copy_out(q, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));

    assert!(heap.kcalloc(&mut vmm, u32::MAX, 2).is_none());
}

#[test]
fn kmalloc_reports_exhaustion_as_none() {
    // reserved, directory, table, one page
    let mut m = Machine::new(4);
    let heap = KernelHeap::new();
    let mut vmm = m.vmm();
    assert!(heap.kmalloc(&mut vmm, 4000).is_some());
    assert!(heap.kmalloc(&mut vmm, 4000).is_none());
    assert_eq!(heap.stats(&vmm).blocks, 1);
}

#[test]
fn growing_by_one_byte_costs_one_frame_per_page() {
    let mut m = Machine::new(64);
    let start = VirtualAddress::new(0x4000_0000);
    let mut region = RegionGrower::new(start, start + 16 * PAGE_SIZE, PageFlags::USER_RW);
    let mut vmm = m.vmm();
    let before = vmm.frames().free_count();

    let k = 2 * PAGE_SIZE + 17;
    for _ in 0..k {
        region.grow(&mut vmm, 1).unwrap();
    }
    let page_frames = before - vmm.frames().free_count() - 1; // minus the page table
    assert!(page_frames <= k.div_ceil(PAGE_SIZE));
    assert_eq!(page_frames, 3);
}

#[test]
fn user_region_pages_are_user_accessible() {
    let mut m = Machine::new(32);
    let start = VirtualAddress::new(0x4000_0000);
    let mut region = RegionGrower::new(start, start + 4 * PAGE_SIZE, PageFlags::USER_RW);
    let mut vmm = m.vmm();
    region.grow(&mut vmm, 10).unwrap();
    drop(vmm);
    assert_eq!(m.kernel.flags(&m.ram, start), Some(PageFlags::USER_RW));
}
