//! # Kernel Configuration
//!
//! Compile-time memory layout and tuning constants shared by the frame
//! allocator, the address-space mapper, the kernel heap and the scheduler.
//!
//! ## Virtual Address Space Layout (i386, two-level paging)
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  unmapped (null page guard)     │
//! 0x4000_0000 ├─────────────────────────────────┤ USER_HEAP_START
//!             │  user heap (sbrk)               │
//!             ├─────────────────────────────────┤
//!             │  user stacks, growing down      │
//! 0xBFFF_F000 ├─────────────────────────────────┤ USER_STACK_TOP
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_BASE (directory slot 768)
//!             │  kernel image                   │
//! 0xD000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_START
//!             │  kernel heap (kmalloc)          │
//! 0xD100_0000 ├─────────────────────────────────┤ KERNEL_HEAP_END
//!             │  ...                            │
//! 0xFFC0_0000 ├─────────────────────────────────┤ RECURSIVE_BASE (directory slot 1023)
//!             │  page tables of the active space│
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Every address space shares directory slots
//! [`KERNEL_DIRECTORY_START`](memory::KERNEL_DIRECTORY_START)`..`[`RECURSIVE_SLOT`](memory::RECURSIVE_SLOT)
//! with the kernel and owns everything below.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod sched;
