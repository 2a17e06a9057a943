#![allow(dead_code)]

use kernel_alloc::frame_alloc::BitmapFrameAlloc;
use kernel_memory_addresses::VirtualAddress;
use kernel_task::sim::RecordingCpu;
use kernel_task::{Kernel, Pid, SwitchTo, Thread, ThreadEntry, Tid};
use kernel_vmem::sim::SimulatedRam;

pub type TestKernel = Kernel<SimulatedRam, RecordingCpu>;

pub const FRAMES: u32 = 512;

/// Where user threads of the tests "start".
pub const USER_ENTRY: u32 = 0x0804_8000;

/// A booted kernel with its idle thread and garbage worker.
pub fn boot() -> &'static TestKernel {
    let kernel = Kernel::new(
        SimulatedRam::new(FRAMES as usize),
        RecordingCpu::new(),
        BitmapFrameAlloc::with_capacity(FRAMES),
    )
    .unwrap();
    let kernel: &'static TestKernel = Box::leak(Box::new(kernel));
    kernel.spawn_system_threads().unwrap();
    kernel
}

pub fn noop(_: usize) {}

/// Take the schedule trap once, keeping the outgoing thread's saved stack
/// pointer.
pub fn trap(k: &TestKernel) -> SwitchTo {
    k.on_schedule_trap(current_sp(k))
}

/// Take a timer tick, keeping the outgoing thread's saved stack pointer.
pub fn tick(k: &TestKernel) -> SwitchTo {
    k.on_timer_tick(current_sp(k))
}

fn current_sp(k: &TestKernel) -> u32 {
    k.with_thread(k.current_tid(), Thread::saved_sp).unwrap_or(0)
}

/// Rotate the ready queue until `tid` runs.
pub fn switch_to(k: &TestKernel, tid: Tid) {
    for _ in 0..64 {
        if k.current_tid() == tid {
            return;
        }
        trap(k);
    }
    panic!("{tid} never got scheduled");
}

pub fn spawn_kernel(k: &TestKernel) -> Tid {
    k.spawn_kernel_thread(noop, 0).unwrap()
}

pub fn spawn_user(k: &TestKernel, pid: Pid, arg: u32) -> Tid {
    k.thread_create(
        pid,
        ThreadEntry::User {
            entry: VirtualAddress::new(USER_ENTRY),
            arg,
        },
    )
    .unwrap()
}

pub struct Rng(u32);

impl Rng {
    pub const fn new(seed: u32) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    pub fn below(&mut self, n: usize) -> usize {
        self.next() as usize % n
    }
}
