//! Round-robin scheduling over FIFO run queues.
//!
//! Switching always happens in one place: the handler of the schedule trap
//! (raised by [`Kernel::schedule`]) or of the timer interrupt. Both hand the
//! interrupted stack pointer to the scheduler and resume whatever
//! [`SwitchTo`] names.
//!
//! - **ready**: runnable threads, served head first.
//! - **waiting**: sleepers (aged by the timer) and semaphore waiters.
//! - **terminated**: exited threads waiting for the garbage worker.

use crate::Kernel;
use crate::cpu::Cpu;
use crate::kernel::KernelState;
use crate::thread::{ThreadKind, ThreadState, Tid, WaitReason};
use alloc::collections::VecDeque;
use kernel_info::sched::MS_PER_TICK;
use kernel_memory_addresses::PhysicalFrame;
use kernel_sync::IrqGuard;
use kernel_vmem::PhysMapper;
use log::{error, trace, warn};

/// Where the trap stub resumes after a scheduling decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchTo {
    pub tid: Tid,
    /// Saved stack pointer of the thread, pointing at its switch frame.
    pub kernel_sp: u32,
    /// Page directory of the thread; already loaded.
    pub directory: PhysicalFrame,
    /// The thread has never run; the switch resumes in its trampoline.
    pub first_run: bool,
}

impl KernelState {
    pub(crate) fn make_ready(&mut self, tid: Tid) {
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.state = ThreadState::Ready;
            self.ready.push_back(tid);
        }
    }

    /// Move a waiting thread to the ready tail. `false` if it is not
    /// waiting (e.g. terminated while blocked).
    pub(crate) fn wake(&mut self, tid: Tid) -> bool {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return false;
        };
        if !thread.state.is_waiting() {
            return false;
        }
        thread.state = ThreadState::Ready;
        self.waiting.retain(|t| *t != tid);
        self.ready.push_back(tid);
        true
    }

    /// Count every sleeper down by one tick; the ones reaching zero become
    /// ready in queue order.
    fn age_sleepers(&mut self) {
        let mut still_waiting = VecDeque::with_capacity(self.waiting.len());
        while let Some(tid) = self.waiting.pop_front() {
            let Some(thread) = self.threads.get_mut(&tid) else {
                continue;
            };
            let expired = match &mut thread.state {
                ThreadState::Waiting(WaitReason::Sleep { remaining }) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                _ => false,
            };
            if expired {
                thread.state = ThreadState::Ready;
                self.ready.push_back(tid);
            } else {
                still_waiting.push_back(tid);
            }
        }
        self.waiting = still_waiting;
    }
}

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Enter the scheduler lock. Nests; interrupts come back on only when
    /// the outermost guard is dropped and only if they were on before.
    pub fn lock_scheduler(&self) -> IrqGuard<'_, C> {
        self.irq().lock(self.cpu())
    }

    /// Give up the CPU by raising the schedule trap.
    ///
    /// Must not be called with the scheduler lock held: the next thread
    /// would inherit it.
    pub fn schedule(&self) {
        debug_assert!(
            !self.irq().is_held(),
            "schedule() with the scheduler lock held"
        );
        self.cpu().raise_schedule_trap();
    }

    /// Handler of the schedule trap.
    ///
    /// # Panics
    /// If no thread is runnable, which the idle thread rules out.
    pub fn on_schedule_trap(&self, saved_sp: u32) -> SwitchTo {
        let mut state = self.state.lock_irq(self.irq(), self.cpu());
        self.reschedule(&mut state, saved_sp)
    }

    /// Handler of the timer interrupt: count the tick, age sleepers, then
    /// rotate the ready queue.
    ///
    /// The tick is acknowledged here unless the switch enters a thread for
    /// the first time. That thread never returns through this handler, so its
    /// trampoline acknowledges the tick instead.
    ///
    /// # Panics
    /// If no thread is runnable.
    pub fn on_timer_tick(&self, saved_sp: u32) -> SwitchTo {
        let mut state = self.state.lock_irq(self.irq(), self.cpu());
        state.ticks += 1;
        state.age_sleepers();
        let switch = self.reschedule(&mut state, saved_sp);
        if switch.first_run {
            state.timer_eoi_pending = true;
        } else {
            self.cpu().acknowledge_timer();
        }
        switch
    }

    fn reschedule(&self, state: &mut KernelState, saved_sp: u32) -> SwitchTo {
        let previous = state.current;
        if let Some(thread) = state.threads.get_mut(&previous) {
            thread.saved_sp = saved_sp;
            if thread.state == ThreadState::Running {
                thread.state = ThreadState::Ready;
                state.ready.push_back(previous);
            }
        }

        let switch = loop {
            let Some(tid) = state.ready.pop_front() else {
                error!("Ready queue empty at a scheduling point (was running {previous})");
                panic!("no runnable thread");
            };
            let Some(thread) = state.threads.get_mut(&tid) else {
                warn!("Dropping unknown {tid} from the ready queue");
                continue;
            };
            match thread.state {
                ThreadState::Ready => {
                    thread.state = ThreadState::Running;
                    let first_run = !core::mem::replace(&mut thread.dispatched, true);
                    if let ThreadKind::User { .. } = thread.kind
                        && let Some(top) = thread.kernel_stack_top()
                    {
                        self.cpu().set_kernel_stack(top);
                    }
                    break SwitchTo {
                        tid,
                        kernel_sp: thread.saved_sp,
                        directory: thread.directory,
                        first_run,
                    };
                }
                ThreadState::Terminated => state.terminated.push_back(tid),
                other => warn!("Dropping {tid} in state {other:?} from the ready queue"),
            }
        };

        state.current = switch.tid;
        if switch.directory != state.active_directory {
            self.cpu().load_directory(switch.directory);
            state.active_directory = switch.directory;
        }
        if switch.tid != previous {
            trace!("Switch {previous} -> {}", switch.tid);
        }
        switch
    }

    /// Mark the current thread waiting and put it on the waiting queue.
    /// The caller yields afterwards.
    pub(crate) fn block_current(&self, reason: WaitReason) -> Tid {
        let mut state = self.state.lock_irq(self.irq(), self.cpu());
        let tid = state.current;
        debug_assert!(state.idle != Some(tid), "the idle thread must not block");
        if let Some(thread) = state.threads.get_mut(&tid) {
            thread.state = ThreadState::Waiting(reason);
        }
        state.waiting.push_back(tid);
        tid
    }

    /// Make a waiting thread ready.
    pub(crate) fn wake(&self, tid: Tid) -> bool {
        self.state.lock_irq(self.irq(), self.cpu()).wake(tid)
    }

    /// Sleep for at least `ticks` timer ticks. `0` just yields.
    pub fn sleep_ticks(&self, ticks: u32) {
        if ticks > 0 {
            self.block_current(WaitReason::Sleep { remaining: ticks });
        }
        self.schedule();
    }

    /// Sleep for at least `ms` milliseconds, rounded up to whole ticks and
    /// never less than one tick.
    pub fn sleep_ms(&self, ms: u32) {
        self.sleep_ticks(ms.div_ceil(MS_PER_TICK).max(1));
    }

    /// Body of the thread trampoline: acknowledge the timer tick that
    /// switched here (if one did), unmask interrupts and run the current
    /// thread.
    ///
    /// A kernel thread that returns from its entry exits with status 0. On
    /// hardware neither path returns.
    ///
    /// # Panics
    /// If there is no current thread.
    pub fn enter_current_thread(&self) {
        let (kind, eoi) = {
            let mut state = self.state.lock_irq(self.irq(), self.cpu());
            let kind = state.threads.get(&state.current).map(|t| t.kind);
            (kind, core::mem::take(&mut state.timer_eoi_pending))
        };
        if eoi {
            self.cpu().acknowledge_timer();
        }
        self.cpu().enable();
        match kind {
            Some(ThreadKind::Kernel { entry, arg }) => {
                entry(arg);
                self.exit_current(0);
            }
            Some(ThreadKind::User { entry, stack, .. }) => {
                self.cpu().enter_user_mode(entry, stack.initial_sp());
            }
            None => {
                error!("Trampoline entered without a current thread");
                panic!("no current thread");
            }
        }
    }
}
