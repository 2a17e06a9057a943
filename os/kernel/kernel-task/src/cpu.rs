//! # CPU seam
//!
//! Everything the scheduler needs from the processor beyond interrupt
//! masking and paging: raising the context-switch trap, acknowledging the
//! timer, halting, the ring-0 stack used on traps from user mode, and the
//! first entry into a thread.
//!
//! ## Switch frame
//!
//! A suspended thread's kernel stack ends in a [`SwitchFrame`]: the
//! registers pushed by `pushad` in the trap stub, followed by the `iret`
//! frame the CPU pushed on trap entry. The saved stack pointer of a thread
//! points at the frame's first field:
//!
//! ```text
//! saved_sp ─► edi esi ebp esp ebx edx ecx eax │ eip cs eflags
//!             └──────────── pushad ───────────┘ └──── iret ───┘
//! ```
//!
//! A new thread gets a synthetic frame whose `eip` is the thread trampoline
//! and whose `eflags` has interrupts masked; the trampoline unmasks them once
//! the thread actually runs.

use bitflags::bitflags;
use kernel_info::sched::KERNEL_CODE_SELECTOR;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::InterruptControl;
use kernel_vmem::Mmu;

bitflags! {
    /// The EFLAGS bits the kernel sets up itself.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct EFlags: u32 {
        /// Always reads as one.
        const RESERVED_1 = 1 << 1;
        /// Maskable interrupts enabled.
        const INTERRUPT = 1 << 9;
    }
}

/// Processor operations used by the scheduler.
pub trait Cpu: InterruptControl + Mmu {
    /// Raise the context-switch software interrupt.
    fn raise_schedule_trap(&self);

    /// Signal end-of-interrupt for the timer IRQ.
    fn acknowledge_timer(&self);

    /// Wait for the next interrupt.
    fn halt(&self);

    /// Stack the processor switches to when user mode traps into the
    /// kernel (`esp0` of the task state segment).
    fn set_kernel_stack(&self, top: VirtualAddress);

    /// Address a new thread's first switch returns into.
    fn trampoline_address(&self) -> u32;

    /// Leave the kernel for `entry` on the user stack at `stack`.
    ///
    /// Does not return on hardware.
    fn enter_user_mode(&self, entry: VirtualAddress, stack: VirtualAddress);
}

/// Register frame at the saved stack pointer of a suspended thread.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SwitchFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl SwitchFrame {
    /// Bytes a frame occupies on a kernel stack.
    pub const SIZE: u32 = 11 * 4;

    /// Frame for a thread that has never run: resumes at `trampoline` with
    /// interrupts masked.
    #[must_use]
    pub fn initial(trampoline: u32) -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            eip: trampoline,
            cs: u32::from(KERNEL_CODE_SELECTOR),
            eflags: EFlags::RESERVED_1.bits(),
        }
    }

    #[must_use]
    pub const fn eflags(&self) -> EFlags {
        EFlags::from_bits_retain(self.eflags)
    }
}

const _: () = {
    assert!(size_of::<SwitchFrame>() == SwitchFrame::SIZE as usize);
};

#[cfg(target_arch = "x86")]
pub use x86::X86Cpu;

#[cfg(target_arch = "x86")]
mod x86 {
    use super::{Cpu, EFlags};
    use core::sync::atomic::{AtomicU32, Ordering};
    use kernel_info::sched::{SCHEDULE_VECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
    use kernel_memory_addresses::{PhysicalFrame, VirtualAddress, VirtualPage};
    use kernel_sync::InterruptControl;
    use kernel_sync::irq::X86Interrupts;
    use kernel_vmem::{Mmu, X86Mmu};

    const PIC1_COMMAND: u16 = 0x20;
    const PIC_EOI: u8 = 0x20;

    /// The i386 processor with a legacy PIC.
    #[derive(Debug, Copy, Clone)]
    pub struct X86Cpu {
        trampoline: unsafe extern "C" fn() -> !,
        tss_esp0: &'static AtomicU32,
    }

    impl X86Cpu {
        /// `trampoline` is the assembly stub new threads resume in; it calls
        /// `Kernel::enter_current_thread`. `tss_esp0` is the `esp0` field of
        /// the loaded task state segment.
        #[must_use]
        pub const fn new(
            trampoline: unsafe extern "C" fn() -> !,
            tss_esp0: &'static AtomicU32,
        ) -> Self {
            Self {
                trampoline,
                tss_esp0,
            }
        }
    }

    impl InterruptControl for X86Cpu {
        fn disable(&self) {
            X86Interrupts.disable();
        }

        fn enable(&self) {
            X86Interrupts.enable();
        }

        fn are_enabled(&self) -> bool {
            X86Interrupts.are_enabled()
        }
    }

    impl Mmu for X86Cpu {
        fn load_directory(&self, directory: PhysicalFrame) {
            X86Mmu.load_directory(directory);
        }

        fn invalidate_page(&self, page: VirtualPage) {
            X86Mmu.invalidate_page(page);
        }
    }

    impl Cpu for X86Cpu {
        fn raise_schedule_trap(&self) {
            unsafe { core::arch::asm!("int {v}", v = const SCHEDULE_VECTOR) }
        }

        fn acknowledge_timer(&self) {
            unsafe {
                core::arch::asm!(
                    "out dx, al",
                    in("dx") PIC1_COMMAND, in("al") PIC_EOI,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }

        fn halt(&self) {
            unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
        }

        fn set_kernel_stack(&self, top: VirtualAddress) {
            self.tss_esp0.store(top.as_u32(), Ordering::Relaxed);
        }

        fn trampoline_address(&self) -> u32 {
            self.trampoline as usize as u32
        }

        fn enter_user_mode(&self, entry: VirtualAddress, stack: VirtualAddress) {
            unsafe {
                core::arch::asm!(
                    "mov ds, {sel:x}",
                    "mov es, {sel:x}",
                    "mov fs, {sel:x}",
                    "mov gs, {sel:x}",
                    "push {sel}",
                    "push {esp}",
                    "push {eflags}",
                    "push {cs}",
                    "push {eip}",
                    "iretd",
                    sel = in(reg) u32::from(USER_DATA_SELECTOR),
                    esp = in(reg) stack.as_u32(),
                    eip = in(reg) entry.as_u32(),
                    eflags = const (EFlags::RESERVED_1.bits() | EFlags::INTERRUPT.bits()),
                    cs = const USER_CODE_SELECTOR,
                    options(noreturn)
                )
            }
        }
    }
}
