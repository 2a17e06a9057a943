//! Thread records.
//!
//! A thread is an independently scheduled execution context: a kernel stack
//! holding its saved [`SwitchFrame`](crate::cpu::SwitchFrame), a lifecycle
//! state and the process it runs in. User threads additionally own a user
//! stack in their process's address space.
//!
//! ```text
//!  New ──► Ready ◄──────► Running ──► Terminated
//!            ▲               │
//!            └── Waiting ◄───┘
//! ```

use crate::process::Pid;
use core::fmt;
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalFrame, VirtualAddress};

/// Thread identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u32);

impl Tid {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Body of a kernel thread.
pub type KernelEntry = fn(usize);

/// Why a thread is waiting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// Timed sleep; becomes ready when `remaining` ticks have passed.
    Sleep { remaining: u32 },
    /// Blocked on a semaphore's wait list.
    Semaphore,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Ready,
    Running,
    Waiting(WaitReason),
    Terminated,
}

impl ThreadState {
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::Waiting(_))
    }
}

/// Pages of a user stack, growing down from [`top`](Self::top).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserStack {
    pub base: VirtualAddress,
    pub pages: u32,
}

impl UserStack {
    #[must_use]
    pub fn top(&self) -> VirtualAddress {
        self.base + self.pages * PAGE_SIZE
    }

    /// Stack pointer on entry: the argument and a null return address have
    /// been pushed.
    #[must_use]
    pub fn initial_sp(&self) -> VirtualAddress {
        self.top() - 2 * 4
    }

    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.base && va < self.top()
    }
}

/// What a thread runs.
#[derive(Debug, Copy, Clone)]
pub enum ThreadKind {
    /// Runs `entry(arg)` in kernel mode; no user stack.
    Kernel { entry: KernelEntry, arg: usize },
    /// Enters user mode at `entry` on its own stack with `arg` pushed.
    User {
        entry: VirtualAddress,
        arg: u32,
        stack: UserStack,
    },
}

impl ThreadKind {
    #[must_use]
    pub const fn user_stack(&self) -> Option<UserStack> {
        match self {
            Self::Kernel { .. } => None,
            Self::User { stack, .. } => Some(*stack),
        }
    }
}

/// What to start in [`Kernel::thread_create`](crate::Kernel::thread_create).
#[derive(Debug, Copy, Clone)]
pub enum ThreadEntry {
    Kernel { entry: KernelEntry, arg: usize },
    User { entry: VirtualAddress, arg: u32 },
}

#[derive(Debug)]
pub struct Thread {
    pub(crate) tid: Tid,
    pub(crate) pid: Pid,
    pub(crate) kind: ThreadKind,
    pub(crate) state: ThreadState,
    /// Base of the kmalloc'd kernel stack; `None` for the boot thread,
    /// which keeps the stack it booted on.
    pub(crate) kernel_stack: Option<VirtualAddress>,
    pub(crate) saved_sp: u32,
    pub(crate) directory: PhysicalFrame,
    pub(crate) priority: u8,
    /// Whether the scheduler has switched to this thread before.
    pub(crate) dispatched: bool,
}

impl Thread {
    #[must_use]
    pub const fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn kind(&self) -> &ThreadKind {
        &self.kind
    }

    #[must_use]
    pub const fn state(&self) -> ThreadState {
        self.state
    }

    #[must_use]
    pub const fn saved_sp(&self) -> u32 {
        self.saved_sp
    }

    #[must_use]
    pub const fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub const fn kernel_stack(&self) -> Option<VirtualAddress> {
        self.kernel_stack
    }

    /// One past the highest byte of the kernel stack.
    #[must_use]
    pub fn kernel_stack_top(&self) -> Option<VirtualAddress> {
        self.kernel_stack.map(|base| base + KERNEL_STACK_SIZE)
    }

    /// Page directory loaded while this thread runs.
    #[must_use]
    pub const fn directory(&self) -> PhysicalFrame {
        self.directory
    }
}
