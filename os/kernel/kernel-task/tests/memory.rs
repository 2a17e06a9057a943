mod common;

use common::{FRAMES, boot};
use kernel_info::memory::KERNEL_HEAP_END;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_task::{Pid, TaskError};
use kernel_vmem::PageFlags;

#[test]
fn frame_zero_is_never_handed_out() {
    let k = boot();
    assert!(k.frame_in_use(kernel_memory_addresses::PhysicalFrame::from_index(0)));
    assert_eq!(k.total_frame_count(), FRAMES);

    let mut taken = Vec::new();
    while let Some(frame) = k.alloc_frame() {
        assert_ne!(frame.index(), 0);
        taken.push(frame);
    }
    assert_eq!(k.free_frame_count(), 0);
    for frame in taken {
        k.free_frame(frame);
    }
}

#[test]
fn contiguous_frames_come_back_together() {
    let k = boot();
    let free = k.free_frame_count();
    let base = k.alloc_frames(4).unwrap();
    for i in 0..4 {
        assert!(k.frame_in_use(base.offset_by(i)));
    }
    k.free_frames(base, 4);
    assert_eq!(k.free_frame_count(), free);
}

#[test]
fn explicit_mappings_go_through_the_process_space() {
    let k = boot();
    let pid = k.create_process("/bin/mmap", None).unwrap();
    let frame = k.alloc_frame().unwrap();
    let va = VirtualAddress::new(0x6000_0000);

    k.map_address(pid, va, frame, PageFlags::USER_RW).unwrap();
    assert_eq!(k.translate(pid, va + 0x123), Some(frame.base() + 0x123));
    assert_eq!(k.translate(Pid::KERNEL, va), None);

    assert_eq!(k.unmap_address(pid, va), Ok(frame));
    assert_eq!(k.translate(pid, va), None);
    assert_eq!(k.unmap_address(pid, va), Err(TaskError::InvalidArgument));
    assert!(k.frame_in_use(frame), "unmapping does not free");
    k.free_frame(frame);

    assert_eq!(
        k.map_address(Pid::new(42), va, frame, PageFlags::USER_RW),
        Err(TaskError::NoSuchProcess(Pid::new(42)))
    );
}

#[test]
fn kernel_half_mappings_reach_processes_created_earlier() {
    let k = boot();
    let pid = k.create_process("/bin/early", None).unwrap();
    let frame = k.alloc_frame().unwrap();

    let shared = VirtualAddress::new(KERNEL_HEAP_END - PAGE_SIZE);
    k.map_address(Pid::KERNEL, shared, frame, PageFlags::KERNEL_RW)
        .unwrap();
    assert_eq!(k.translate(pid, shared), Some(frame.base()));

    // No boot table covers this slot; a new one would stay private.
    let private = VirtualAddress::new(0xE000_0000);
    for owner in [Pid::KERNEL, pid] {
        assert_eq!(
            k.map_address(owner, private, frame, PageFlags::KERNEL_RW),
            Err(TaskError::InvalidArgument)
        );
    }
    assert_eq!(k.translate(Pid::KERNEL, private), None);

    assert_eq!(k.unmap_address(Pid::KERNEL, shared), Ok(frame));
    assert_eq!(k.translate(pid, shared), None);
    k.free_frame(frame);
}

#[test]
fn kernel_heap_is_visible_from_every_process() {
    let k = boot();
    let block = k.kcalloc(16, 64).unwrap();
    let pid = k.create_process("/bin/late", None).unwrap();

    // The heap window's tables existed before the process was created.
    assert_eq!(k.translate(pid, block), k.translate(Pid::KERNEL, block));

    let stats = k.heap_stats();
    assert!(stats.used_bytes >= 16 * 64);
    k.kfree(block);
    assert!(k.heap_stats().free_bytes >= 16 * 64);
}

#[test]
fn kmalloc_fails_cleanly_when_memory_runs_out() {
    let k = boot();
    let mut blocks = Vec::new();
    while let Some(block) = k.kmalloc(8192) {
        blocks.push(block);
    }
    assert!(!blocks.is_empty());
    assert_eq!(
        k.spawn_kernel_thread(common::noop, 0),
        Err(TaskError::OutOfMemory)
    );
    for block in blocks {
        k.kfree(block);
    }
    assert!(k.spawn_kernel_thread(common::noop, 0).is_ok());
}
