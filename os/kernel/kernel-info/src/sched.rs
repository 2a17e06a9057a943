//! # Scheduling and Process Limits

/// Timer interrupt frequency.
pub const TIMER_HZ: u32 = 100;

/// Milliseconds per timer tick.
pub const MS_PER_TICK: u32 = 1000 / TIMER_HZ;

/// Priority of ordinary threads. Stored but not used for ordering.
pub const DEFAULT_PRIORITY: u8 = 16;

/// Priority of the idle thread.
pub const IDLE_PRIORITY: u8 = u8::MAX;

/// Open-file slots per process.
pub const MAX_OPEN_FILES: usize = 16;

/// Interrupt vector of the system call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Interrupt vector of the context-switch trap raised by `schedule()`.
pub const SCHEDULE_VECTOR: u8 = 0x81;

/// Kernel code segment selector.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Kernel data/stack segment selector.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// User code segment selector (RPL 3).
pub const USER_CODE_SELECTOR: u16 = 0x1B;

/// User data/stack segment selector (RPL 3).
pub const USER_DATA_SELECTOR: u16 = 0x23;

const _: () = {
    assert!(1000 % TIMER_HZ == 0);
    assert!(SCHEDULE_VECTOR != SYSCALL_VECTOR);
};
