//! # Kernel Memory Allocation
//!
//! Physical frames, anonymous mappings and the kernel heap.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  KernelHeap (kmalloc / kcalloc / kfree)      │  heap
//! │    BlockAllocator: first-fit, split, merge   │
//! └──────────────────┬───────────────────────────┘
//!                    │ grow(size)
//! ┌──────────────────▼───────────────────────────┐
//! │  RegionGrower: break + slack                 │  region
//! └──────────────────┬───────────────────────────┘
//!                    │ map_anon_pages
//! ┌──────────────────▼───────────────────────────┐
//! │  Vmm: AddressSpace + PhysMapper + Mmu        │  vmm
//! └──────────────────┬───────────────────────────┘
//!                    │ alloc_frame / free_frame
//! ┌──────────────────▼───────────────────────────┐
//! │  BitmapFrameAlloc: one bit per 4 KiB frame   │  frame_alloc
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The same [`RegionGrower`](region::RegionGrower) backs a process heap
//! (`sbrk`) with user-accessible pages.
//!
//! ## Failure model
//!
//! Running out of frames or address space is recoverable and reported as
//! [`AllocError`] (or `None` from the `k*` functions). A damaged heap block
//! is not: the allocator logs and panics.
//!
//! ## Concurrency
//!
//! Nothing in this crate masks interrupts. The frame allocator is owned by
//! whoever holds its lock; [`KernelHeap`](heap::KernelHeap) has its own
//! lock, always taken after the frame allocator's.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod block;
mod error;
pub mod frame_alloc;
pub mod heap;
pub mod region;
pub mod vmm;

pub use error::AllocError;
