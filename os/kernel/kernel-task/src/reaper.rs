//! Thread and process teardown.
//!
//! Exiting only marks a thread terminated and queues it; its stacks cannot
//! be freed by the thread itself because it is still running on them. The
//! garbage worker ([`Kernel::reap`]) frees them later from its own stack.

use crate::Kernel;
use crate::cpu::Cpu;
use crate::error::TaskError;
use crate::kernel::{DeadSpace, KernelState};
use crate::process::{FileHandle, Pid};
use crate::semaphore::Semaphore;
use crate::thread::{ThreadState, Tid};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kernel_vmem::PhysMapper;
use log::{debug, info, warn};

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Terminate `tid` with `status`.
    ///
    /// The thread leaves whatever queue it was on and joins the terminated
    /// queue. If it was the last thread of its process, the process exits
    /// too: its files are released, its parent is told and its heap is
    /// unmapped unless another process still shares the address space.
    /// Exiting an already terminated thread does nothing.
    ///
    /// # Errors
    /// [`TaskError::NoSuchThread`] if `tid` is unknown.
    pub fn exit_thread(&self, tid: Tid, status: i32) -> Result<(), TaskError> {
        let (files, parent) = {
            let mut guard = self.state.lock_irq(self.irq(), self.cpu());
            let state = &mut *guard;
            let thread = state
                .threads
                .get_mut(&tid)
                .ok_or(TaskError::NoSuchThread(tid))?;
            if thread.state == ThreadState::Terminated {
                return Ok(());
            }
            debug_assert!(state.idle != Some(tid), "the idle thread must not exit");

            let previous = core::mem::replace(&mut thread.state, ThreadState::Terminated);
            let pid = thread.pid;
            match previous {
                ThreadState::Ready => state.ready.retain(|t| *t != tid),
                ThreadState::Waiting(_) => state.waiting.retain(|t| *t != tid),
                ThreadState::New | ThreadState::Running | ThreadState::Terminated => {}
            }
            state.terminated.push_back(tid);
            debug!("{tid} of {pid} exited with {status}");

            let last = state.processes.get_mut(&pid).is_some_and(|process| {
                process.threads.retain(|t| *t != tid);
                process.thread_count.fetch_sub(1, Ordering::AcqRel) == 1
            });
            if last && pid != Pid::KERNEL {
                self.exit_process(state, pid, status)
            } else {
                (Vec::new(), None)
            }
        };

        for file in &files {
            file.release();
        }
        if let Some(parent) = parent {
            parent.up(self);
        }
        self.reaper_wake.up(self);
        Ok(())
    }

    /// Terminate the running thread and give up the CPU.
    pub fn exit_current(&self, status: i32) {
        let tid = self.current_tid();
        if let Err(e) = self.exit_thread(tid, status) {
            warn!("exit of {tid} failed: {e}");
        }
        self.schedule();
    }

    /// Retire process `pid` after its last thread exited. Returns the files
    /// still open and the parent's child semaphore; both are handled once
    /// the state lock is released.
    fn exit_process(
        &self,
        state: &mut KernelState,
        pid: Pid,
        status: i32,
    ) -> (Vec<FileHandle>, Option<Arc<Semaphore>>) {
        let Some(mut process) = state.processes.remove(&pid) else {
            return (Vec::new(), None);
        };

        let shared = state
            .processes
            .values()
            .any(|other| other.shares_space_with(&process));
        let heap_frames = if shared {
            0
        } else {
            let mut mmap = process.mmap.lock();
            self.with_space(&process.space, |vmm| mmap.heap_mut().release(vmm))
        };
        let files = process.files.drain();

        for child in &process.children {
            if let Some(child) = state.processes.get_mut(child) {
                child.parent = None;
            }
        }

        let parent = process
            .parent
            .and_then(|ppid| state.processes.get_mut(&ppid))
            .map(|parent| {
                parent.children.retain(|c| *c != pid);
                parent.exited_children.push_back((pid, status));
                parent.child_exit.clone()
            });

        info!(
            "Process {pid} ({}) exited with {status}: {heap_frames} heap frames freed, {} files open",
            process.path,
            files.len()
        );
        state.dead_spaces.push(DeadSpace {
            pid,
            space: process.space,
            mmap: process.mmap,
        });
        (files, parent)
    }

    /// Free the resources of terminated threads.
    ///
    /// The running thread is skipped: it may be the one that just exited
    /// and still be on its stack. Address spaces of exited processes are
    /// destroyed once none of their threads is left and they are not loaded.
    /// Returns the number of threads reaped.
    pub fn reap(&self) -> usize {
        let mut reaped = 0;
        loop {
            let thread = {
                let mut guard = self.state.lock_irq(self.irq(), self.cpu());
                let state = &mut *guard;
                let current = state.current;
                let Some(at) = state.terminated.iter().position(|t| *t != current) else {
                    break;
                };
                let Some(tid) = state.terminated.remove(at) else {
                    break;
                };
                let Some(thread) = state.threads.remove(&tid) else {
                    continue;
                };

                if let Some(stack) = thread.kind.user_stack() {
                    let owner = match state.processes.get(&thread.pid) {
                        Some(process) => Some((process.space.clone(), process.mmap.clone())),
                        None => state
                            .dead_spaces
                            .iter()
                            .find(|dead| dead.pid == thread.pid)
                            .map(|dead| (dead.space.clone(), dead.mmap.clone())),
                    };
                    if let Some((space, mmap)) = owner {
                        mmap.lock().remove_region(stack.base);
                        let freed =
                            self.with_space(&space, |vmm| vmm.unmap_pages(stack.base, stack.pages));
                        debug!("Freed {freed} user stack frames of {}", thread.tid);
                    }
                }
                thread
            };

            if let Some(stack) = thread.kernel_stack {
                self.kfree(stack);
            }
            debug!("Reaped {} of {}", thread.tid, thread.pid);
            reaped += 1;
        }

        self.destroy_dead_spaces();
        reaped
    }

    fn destroy_dead_spaces(&self) {
        let mut guard = self.state.lock_irq(self.irq(), self.cpu());
        let state = &mut *guard;
        let mut kept = Vec::new();
        for dead in core::mem::take(&mut state.dead_spaces) {
            let pid = dead.pid;
            if state.threads.values().any(|t| t.pid == pid) {
                kept.push(dead);
                continue;
            }
            if dead.space.directory() == state.active_directory {
                warn!("Address space of {pid} is still loaded; deferring teardown");
                kept.push(dead);
                continue;
            }
            match Arc::try_unwrap(dead.space) {
                Ok(space) => {
                    let directory = space.directory();
                    self.with_frames(|frames| space.destroy(self.mapper(), frames));
                    info!("Destroyed address space {directory} of {pid}");
                }
                Err(shared) => debug!(
                    "Address space {} of {pid} is shared; dropping one reference",
                    shared.directory()
                ),
            }
        }
        state.dead_spaces = kept;
    }

    /// Block until a child of `pid` exits and return its pid and status.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchProcess`] if `pid` is not alive.
    /// - [`TaskError::NoChildren`] if it has no children to wait for.
    pub fn wait_child(&self, pid: Pid) -> Result<(Pid, i32), TaskError> {
        let child_exit = {
            let state = self.state.lock_irq(self.irq(), self.cpu());
            let process = state
                .processes
                .get(&pid)
                .ok_or(TaskError::NoSuchProcess(pid))?;
            if process.children.is_empty() && process.exited_children.is_empty() {
                return Err(TaskError::NoChildren);
            }
            process.child_exit.clone()
        };

        child_exit.down(self);

        let mut state = self.state.lock_irq(self.irq(), self.cpu());
        state
            .processes
            .get_mut(&pid)
            .and_then(|process| process.exited_children.pop_front())
            .ok_or(TaskError::NoChildren)
    }
}
