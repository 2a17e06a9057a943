//! # Kernel synchronization primitives
//!
//! The kernel runs on a single hardware thread. Mutual exclusion therefore
//! comes from two places:
//!
//! - the **scheduler lock** ([`IrqLock`]): a nestable critical section that
//!   disables interrupts on the outermost acquisition and restores them when
//!   the nesting depth returns to zero, and
//! - [`SpinLock`]s around individual data structures, which on one core never
//!   actually spin as long as they are taken with interrupts disabled.
//!
//! A multi-core port would need a real spinlock per run queue instead of
//! relying on interrupt masking; the [`SpinLock`]s already mark every shared
//! structure that would need one.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard, IrqLock, IrqSpinGuard, SimulatedInterrupts};
pub use spin_lock::{SpinLock, SpinLockGuard};
