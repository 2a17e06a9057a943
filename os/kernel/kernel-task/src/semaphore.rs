//! Counting semaphore with a FIFO wait list.
//!
//! `up` hands the unit straight to the longest waiter instead of bumping the
//! count, so a woken thread owns what it waited for when `down` returns and
//! the count never passes the capacity.

use crate::Kernel;
use crate::cpu::Cpu;
use crate::thread::{Tid, WaitReason};
use alloc::collections::VecDeque;
use kernel_sync::SpinLock;
use kernel_vmem::PhysMapper;
use log::trace;

#[derive(Debug)]
struct State {
    count: u32,
    capacity: u32,
    waiters: VecDeque<Tid>,
}

#[derive(Debug)]
pub struct Semaphore {
    state: SpinLock<State>,
}

impl Semaphore {
    /// A semaphore holding `initial` of at most `capacity` units. A larger
    /// `initial` is clamped to `capacity`.
    #[must_use]
    pub const fn new(capacity: u32, initial: u32) -> Self {
        let count = if initial < capacity { initial } else { capacity };
        Self {
            state: SpinLock::new(State {
                count,
                capacity,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Take one unit, blocking the current thread while none is available.
    pub fn down<M: PhysMapper, C: Cpu>(&self, kernel: &Kernel<M, C>) {
        let mut state = self.state.lock_irq(kernel.irq(), kernel.cpu());
        if state.count > 0 {
            state.count -= 1;
            return;
        }
        let tid = kernel.block_current(WaitReason::Semaphore);
        trace!("{tid} blocks on semaphore {:p}", self);
        state.waiters.push_back(tid);
        drop(state);
        kernel.schedule();
    }

    /// Take one unit if available, without blocking.
    pub fn try_down<M: PhysMapper, C: Cpu>(&self, kernel: &Kernel<M, C>) -> bool {
        let mut state = self.state.lock_irq(kernel.irq(), kernel.cpu());
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Release one unit: wake the longest waiter, or count it up to the
    /// capacity.
    pub fn up<M: PhysMapper, C: Cpu>(&self, kernel: &Kernel<M, C>) {
        let mut state = self.state.lock_irq(kernel.irq(), kernel.cpu());
        while let Some(tid) = state.waiters.pop_front() {
            // Threads terminated while blocked are skipped.
            if kernel.wake(tid) {
                trace!("{tid} woken by semaphore {:p}", self);
                return;
            }
        }
        if state.count < state.capacity {
            state.count += 1;
        }
    }

    /// Units currently available.
    pub fn value(&self) -> u32 {
        self.state.lock().count
    }

    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }

    /// Threads blocked on this semaphore, longest waiter first.
    pub fn waiters(&self) -> VecDeque<Tid> {
        self.state.lock().waiters.clone()
    }

    /// Dispose of the semaphore. Nobody may still be waiting on it.
    pub fn free(self) {
        let state = self.state.into_inner();
        debug_assert!(
            state.waiters.is_empty(),
            "semaphore freed with {} waiters",
            state.waiters.len()
        );
    }
}
