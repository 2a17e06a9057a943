//! # Threads, processes and scheduling
//!
//! The core of the kernel on top of the memory crates: the thread and
//! process model, a round-robin scheduler driven by traps, semaphores, the
//! garbage worker that frees what exited threads leave behind, and the
//! system call table.
//!
//! ## Architecture Overview
//!
//! ```text
//!   int 0x80 ──► syscall ──┐          timer IRQ ──► on_timer_tick ─┐
//!                          │                                       │
//!  Semaphore::down/up ─────┤                                       ▼
//!  sleep_ms / exit_current ┴─► schedule() ── int 0x81 ──► on_schedule_trap
//!                                                                  │
//!                                           ready ─► reschedule ◄──┘
//!                                                        │
//!                                     SwitchTo { kernel_sp, directory, first_run }
//!
//!  exit_thread ─► terminated queue ─► reaper_wake.up ─► reap()
//!                                                      (kfree, unmap, destroy)
//! ```
//!
//! ## Hardware seam
//!
//! Everything that touches the processor goes through [`Cpu`]. On `x86`
//! [`X86Cpu`] executes the real instructions; hosted builds and tests use
//! [`sim::RecordingCpu`], which records instead of trapping so a test can
//! drive the scheduler step by step.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod cpu;
mod error;
mod kernel;
pub mod mmap;
pub mod process;
mod reaper;
mod scheduler;
pub mod semaphore;
pub mod sim;
pub mod syscall;
pub mod thread;

pub use crate::cpu::{Cpu, EFlags, SwitchFrame};
pub use crate::error::{Errno, TaskError};
pub use crate::kernel::Kernel;
pub use crate::mmap::{MemoryMap, Region, RegionKind};
pub use crate::process::{FileHandle, FileRelease, FileTable, Pid, Process};
pub use crate::scheduler::SwitchTo;
pub use crate::semaphore::Semaphore;
pub use crate::syscall::{Sysno, SyscallFrame};
pub use crate::thread::{
    KernelEntry, Thread, ThreadEntry, ThreadKind, ThreadState, Tid, UserStack, WaitReason,
};

#[cfg(target_arch = "x86")]
pub use crate::cpu::X86Cpu;
