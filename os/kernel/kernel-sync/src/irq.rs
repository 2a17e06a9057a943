use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Hardware interrupt masking.
///
/// Implemented by the CPU layer (`cli`/`sti` on x86) and by
/// [`SimulatedInterrupts`] for hosted builds and tests.
pub trait InterruptControl {
    /// Mask maskable interrupts.
    fn disable(&self);

    /// Unmask maskable interrupts.
    fn enable(&self);

    /// Whether interrupts are currently unmasked.
    fn are_enabled(&self) -> bool;
}

/// `cli`/`sti` based interrupt control for 32-bit x86.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Interrupts;

#[cfg(target_arch = "x86")]
impl InterruptControl for X86Interrupts {
    #[inline]
    fn disable(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    fn enable(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }

    #[inline]
    fn are_enabled(&self) -> bool {
        let eflags: u32;
        unsafe { core::arch::asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags)) }
        eflags & (1 << 9) != 0
    }
}

/// Interrupt flag kept in memory, for hosted builds.
#[derive(Debug)]
pub struct SimulatedInterrupts {
    enabled: AtomicBool,
}

impl SimulatedInterrupts {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

impl Default for SimulatedInterrupts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterruptControl for SimulatedInterrupts {
    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl<T: InterruptControl + ?Sized> InterruptControl for &T {
    fn disable(&self) {
        (**self).disable();
    }

    fn enable(&self) {
        (**self).enable();
    }

    fn are_enabled(&self) -> bool {
        (**self).are_enabled()
    }
}

/// Nestable interrupt-disable critical section (the scheduler lock).
///
/// The outermost [`lock`](Self::lock) snapshots the interrupt flag and masks
/// interrupts. Inner acquisitions only bump the depth. When the last guard is
/// dropped, interrupts are unmasked again **only** if they were enabled at
/// the outermost acquisition, so taking the lock inside an interrupt or trap
/// handler never re-enables interrupts behind the handler's back.
///
/// Single-core only: masking interrupts is what makes the protected state
/// exclusive.
///
/// # Examples
///
/// ```
/// use kernel_sync::{InterruptControl, IrqLock, SimulatedInterrupts};
///
/// let cpu = SimulatedInterrupts::new(true);
/// let lock = IrqLock::new();
/// {
///     let _outer = lock.lock(&cpu);
///     {
///         let _inner = lock.lock(&cpu);
///         assert_eq!(lock.depth(), 2);
///     }
///     assert!(!cpu.are_enabled());
/// }
/// assert!(cpu.are_enabled());
/// ```
#[derive(Debug, Default)]
pub struct IrqLock {
    depth: AtomicU32,
    restore: AtomicBool,
}

impl IrqLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
            restore: AtomicBool::new(false),
        }
    }

    /// Enter the critical section.
    #[inline]
    pub fn lock<'a, I: InterruptControl + ?Sized>(&'a self, ctl: &'a I) -> IrqGuard<'a, I> {
        if self.depth.load(Ordering::Acquire) == 0 {
            let were_enabled = ctl.are_enabled();
            ctl.disable();
            self.restore.store(were_enabled, Ordering::Relaxed);
        }
        self.depth.fetch_add(1, Ordering::AcqRel);
        IrqGuard { lock: self, ctl }
    }

    /// Current nesting depth.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether any guard is alive.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.depth() > 0
    }
}

/// RAII guard returned by [`IrqLock::lock`].
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    lock: &'a IrqLock,
    ctl: &'a I,
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        let previous = self.lock.depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unbalanced scheduler unlock");
        if previous == 1 && self.lock.restore.load(Ordering::Relaxed) {
            self.ctl.enable();
        }
    }
}

/// A [`SpinLock`] guard that also holds the scheduler lock.
///
/// The data lock is released before the interrupt lock, so interrupts are
/// never unmasked while the data is still locked.
pub struct IrqSpinGuard<'a, T, I: InterruptControl + ?Sized> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<'a, I>,
}

impl<T> SpinLock<T> {
    /// Enter the scheduler lock, then take this lock.
    #[inline]
    pub fn lock_irq<'a, I: InterruptControl + ?Sized>(
        &'a self,
        irq: &'a IrqLock,
        ctl: &'a I,
    ) -> IrqSpinGuard<'a, T, I> {
        let irq = irq.lock(ctl);
        let guard = self.lock();
        IrqSpinGuard { guard, _irq: irq }
    }
}

impl<T, I: InterruptControl + ?Sized> Deref for IrqSpinGuard<'_, T, I> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, I: InterruptControl + ?Sized> DerefMut for IrqSpinGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
