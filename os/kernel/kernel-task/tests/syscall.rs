mod common;

use common::{boot, spawn_user, switch_to};
use kernel_task::{Errno, SyscallFrame, Sysno, ThreadState, WaitReason};

const PAGE: u32 = 4096;

fn sbrk(k: &common::TestKernel, increment: i32) -> i32 {
    k.syscall(Sysno::Sbrk as u32, [increment.cast_unsigned(), 0, 0])
}

#[test]
fn sbrk_maps_only_the_pages_it_needs() {
    let k = boot();
    let pid = k.create_process("/bin/malloc-test", None).unwrap();
    k.set_heap_budget(pid, 3 * PAGE).unwrap();
    let tid = spawn_user(k, pid, 0);
    switch_to(k, tid);

    assert_eq!(sbrk(k, 10), 0x4000_0000);
    assert_eq!(sbrk(k, 4086), 0x4000_000A);
    assert_eq!(sbrk(k, 1), 0x4000_1000);

    let mapped = k
        .with_process(pid, |p| p.mmap().heap().mapped_pages())
        .unwrap();
    assert_eq!(mapped, (10 + 4086 + 1u32).div_ceil(PAGE));
    assert_eq!(sbrk(k, 0), 0x4000_1001);

    let brk = k.with_process(pid, |p| p.mmap().brk()).unwrap();
    assert!(k.translate(pid, brk - 1).is_some());
}

#[test]
fn sbrk_failures_come_back_as_errno() {
    let k = boot();
    let pid = k.create_process("/bin/hog", None).unwrap();
    k.set_heap_budget(pid, 3 * PAGE).unwrap();
    let tid = spawn_user(k, pid, 0);
    switch_to(k, tid);

    assert_eq!(sbrk(k, 100), 0x4000_0000);
    let free = k.free_frame_count();
    assert_eq!(sbrk(k, 3 * PAGE.cast_signed()), Errno::ENOMEM.to_return());
    assert_eq!(k.free_frame_count(), free, "failed growth maps nothing");
    assert_eq!(sbrk(k, -4), Errno::EINVAL.to_return());
    assert_eq!(sbrk(k, 0), 0x4000_0064);
}

#[test]
fn sleep_blocks_the_caller() {
    let k = boot();
    let pid = k.create_process("/bin/sleep", None).unwrap();
    let tid = spawn_user(k, pid, 0);
    switch_to(k, tid);

    assert_eq!(k.syscall(Sysno::Sleep as u32, [30, 0, 0]), 0);
    assert_eq!(
        k.thread_state(tid),
        Some(ThreadState::Waiting(WaitReason::Sleep { remaining: 3 }))
    );
}

#[test]
fn exit_terminates_the_caller() {
    let k = boot();
    let pid = k.create_process("/bin/true", None).unwrap();
    let tid = spawn_user(k, pid, 0);
    switch_to(k, tid);

    assert_eq!(k.syscall(Sysno::GetPid as u32, [0; 3]), pid.as_u32().cast_signed());
    assert_eq!(k.syscall(Sysno::Exit as u32, [0, 0, 0]), 0);
    assert_eq!(k.thread_state(tid), Some(ThreadState::Terminated));
    assert!(k.space_of(pid).is_err());
}

#[test]
fn wait_returns_the_child_pid() {
    let k = boot();
    let parent = k.create_process("/bin/sh", None).unwrap();
    let shell = spawn_user(k, parent, 0);

    switch_to(k, shell);
    let child = k.create_process("/bin/ls", None).unwrap();
    let worker = spawn_user(k, child, 0);

    switch_to(k, worker);
    k.syscall(Sysno::Exit as u32, [3, 0, 0]);
    common::trap(k);

    switch_to(k, shell);
    assert_eq!(
        k.syscall(Sysno::Wait as u32, [0; 3]),
        child.as_u32().cast_signed()
    );
    assert_eq!(k.syscall(Sysno::Wait as u32, [0; 3]), Errno::ECHILD.to_return());
    assert_eq!(k.with_process(child, |_| ()), None);
}

#[test]
fn unknown_numbers_are_not_implemented() {
    let k = boot();
    assert_eq!(k.syscall(0, [0; 3]), -38);
    assert_eq!(k.syscall(99, [0; 3]), -38);
}

#[test]
fn trap_frame_carries_arguments_and_result() {
    let k = boot();
    let pid = k.create_process("/bin/brk", None).unwrap();
    let tid = spawn_user(k, pid, 0);
    switch_to(k, tid);

    let mut frame = SyscallFrame {
        eax: Sysno::Sbrk as u32,
        ebx: 64,
        ..SyscallFrame::default()
    };
    k.handle_syscall(&mut frame);
    assert_eq!(frame.eax, 0x4000_0000);

    frame.eax = 1234;
    k.handle_syscall(&mut frame);
    assert_eq!(frame.eax.cast_signed(), -38);
}
