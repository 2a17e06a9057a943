//! A CPU that records instead of trapping, for hosted builds.
//!
//! [`RecordingCpu`] masks interrupts through a [`SimulatedInterrupts`] flag
//! and forwards paging to a [`RecordingMmu`]. Raising the schedule trap only
//! counts it: the caller decides when to run the scheduler
//! ([`Kernel::on_schedule_trap`](crate::Kernel::on_schedule_trap)).

use crate::cpu::Cpu;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress, VirtualPage};
use kernel_sync::{InterruptControl, SimulatedInterrupts, SpinLock};
use kernel_vmem::Mmu;
use kernel_vmem::sim::RecordingMmu;

/// Where the synthetic trampoline "lives".
pub const TRAMPOLINE: u32 = 0xC010_0000;

/// A recorded transfer to user mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub entry: VirtualAddress,
    pub stack: VirtualAddress,
}

#[derive(Debug, Default)]
pub struct RecordingCpu {
    interrupts: SimulatedInterrupts,
    mmu: RecordingMmu,
    traps: AtomicUsize,
    eois: AtomicUsize,
    halts: AtomicUsize,
    kernel_stack: AtomicU32,
    user_entries: SpinLock<Vec<UserEntry>>,
}

impl RecordingCpu {
    /// A CPU with interrupts enabled and nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn mmu(&self) -> &RecordingMmu {
        &self.mmu
    }

    /// Schedule traps raised so far.
    pub fn trap_count(&self) -> usize {
        self.traps.load(Ordering::Acquire)
    }

    /// Timer acknowledgements so far.
    pub fn eoi_count(&self) -> usize {
        self.eois.load(Ordering::Acquire)
    }

    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::Acquire)
    }

    /// The ring-0 stack last programmed for traps from user mode.
    pub fn kernel_stack_top(&self) -> Option<VirtualAddress> {
        match self.kernel_stack.load(Ordering::Acquire) {
            0 => None,
            top => Some(VirtualAddress::new(top)),
        }
    }

    pub fn user_entries(&self) -> Vec<UserEntry> {
        self.user_entries.lock().clone()
    }
}

impl InterruptControl for RecordingCpu {
    fn disable(&self) {
        self.interrupts.disable();
    }

    fn enable(&self) {
        self.interrupts.enable();
    }

    fn are_enabled(&self) -> bool {
        self.interrupts.are_enabled()
    }
}

impl Mmu for RecordingCpu {
    fn load_directory(&self, directory: PhysicalFrame) {
        self.mmu.load_directory(directory);
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.mmu.invalidate_page(page);
    }
}

impl Cpu for RecordingCpu {
    fn raise_schedule_trap(&self) {
        self.traps.fetch_add(1, Ordering::AcqRel);
    }

    fn acknowledge_timer(&self) {
        self.eois.fetch_add(1, Ordering::AcqRel);
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::AcqRel);
    }

    fn set_kernel_stack(&self, top: VirtualAddress) {
        self.kernel_stack.store(top.as_u32(), Ordering::Release);
    }

    fn trampoline_address(&self) -> u32 {
        TRAMPOLINE
    }

    fn enter_user_mode(&self, entry: VirtualAddress, stack: VirtualAddress) {
        self.user_entries.lock().push(UserEntry { entry, stack });
    }
}
