//! # Memory Layout

use kernel_memory_addresses::PAGE_SIZE;

/// Size of a physical frame / virtual page.
pub const FRAME_SIZE: u32 = PAGE_SIZE;

/// Entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by one page table (one directory slot).
pub const BYTES_PER_TABLE: u32 = FRAME_SIZE * ENTRIES_PER_TABLE as u32;

/// Where the kernel executes; start of the shared kernel half.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// First directory slot shared between all address spaces.
pub const KERNEL_DIRECTORY_START: usize = (KERNEL_BASE / BYTES_PER_TABLE) as usize;

/// Directory slot that points back at the directory itself.
///
/// With the directory installed in its own last slot, the page tables of the
/// active address space appear at [`RECURSIVE_BASE`] and the directory at
/// [`RECURSIVE_DIRECTORY`].
pub const RECURSIVE_SLOT: usize = ENTRIES_PER_TABLE - 1;

/// Virtual window in which the active space's page tables appear.
pub const RECURSIVE_BASE: u32 = (RECURSIVE_SLOT as u32) * BYTES_PER_TABLE;

/// Virtual address of the active page directory through the recursive slot.
pub const RECURSIVE_DIRECTORY: u32 = RECURSIVE_BASE + (RECURSIVE_SLOT as u32) * FRAME_SIZE;

/// Start of the kernel heap window.
pub const KERNEL_HEAP_START: u32 = 0xD000_0000;

/// Exclusive end of the kernel heap window (16 MiB).
pub const KERNEL_HEAP_END: u32 = 0xD100_0000;

/// Default start of a process heap (`sbrk` region).
pub const USER_HEAP_START: u32 = 0x4000_0000;

/// Default size limit of a process heap.
pub const USER_HEAP_MAX: u32 = 256 * 1024 * 1024;

/// Highest address (exclusive) of the first user stack.
pub const USER_STACK_TOP: u32 = 0xBFFF_F000;

/// Pages backing one user stack.
pub const USER_STACK_PAGES: u32 = 4;

/// Unmapped guard pages between two user stacks.
pub const USER_STACK_GUARD_PAGES: u32 = 1;

/// Size of every kernel stack.
pub const KERNEL_STACK_SIZE: u32 = 8 * 1024;

/// Alignment (and header size) of kernel heap blocks.
pub const BLOCK_ALIGN: u32 = 16;

/// Upper bound for a single heap block; larger sizes indicate corruption.
pub const MAX_BLOCK_SIZE: u32 = KERNEL_HEAP_END - KERNEL_HEAP_START;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(FRAME_SIZE));
    assert!(KERNEL_HEAP_START.is_multiple_of(BYTES_PER_TABLE));
    assert!(KERNEL_HEAP_END.is_multiple_of(BYTES_PER_TABLE));
    assert!(KERNEL_HEAP_START >= KERNEL_BASE);
    assert!(KERNEL_HEAP_END <= RECURSIVE_BASE);
    assert!(USER_HEAP_START + USER_HEAP_MAX <= USER_STACK_TOP);
    assert!(USER_STACK_TOP < KERNEL_BASE);
    assert!(BLOCK_ALIGN.is_power_of_two());
    assert!(KERNEL_DIRECTORY_START == 768);
};
