//! The kernel object: memory, processes, threads and run queues.
//!
//! # Locking
//!
//! Every lock below is taken inside the scheduler lock ([`IrqLock`]), which
//! on this single-core kernel is what makes the data exclusive. The order
//! is fixed:
//!
//! ```text
//! irq ─► semaphore ─► state ─► memory map ─► frames ─► heap
//! ```
//!
//! Semaphores are upped only after `state` has been released.

use crate::cpu::{Cpu, SwitchFrame};
use crate::error::TaskError;
use crate::mmap::{MemoryMap, Region, RegionKind};
use crate::process::{FileHandle, Pid, Process, fresh_memory_map};
use crate::semaphore::Semaphore;
use crate::thread::{KernelEntry, Thread, ThreadEntry, ThreadKind, ThreadState, Tid, UserStack};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kernel_alloc::block::HeapStats;
use kernel_alloc::frame_alloc::BitmapFrameAlloc;
use kernel_alloc::heap::KernelHeap;
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::{
    KERNEL_BASE, KERNEL_HEAP_END, KERNEL_HEAP_START, KERNEL_STACK_SIZE, USER_STACK_GUARD_PAGES,
    USER_STACK_PAGES, USER_STACK_TOP,
};
use kernel_info::sched::{DEFAULT_PRIORITY, IDLE_PRIORITY};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_sync::{IrqLock, SpinLock};
use kernel_vmem::{AddressSpace, PageFlags, PhysMapper};
use log::{debug, info, warn};

/// Scheduler and process bookkeeping, guarded by `Kernel::state`.
pub(crate) struct KernelState {
    pub(crate) threads: BTreeMap<Tid, Thread>,
    pub(crate) processes: BTreeMap<Pid, Process>,
    pub(crate) ready: VecDeque<Tid>,
    pub(crate) waiting: VecDeque<Tid>,
    pub(crate) terminated: VecDeque<Tid>,
    pub(crate) current: Tid,
    pub(crate) idle: Option<Tid>,
    pub(crate) active_directory: PhysicalFrame,
    /// Address spaces of exited processes, destroyed by the reaper once
    /// none of their threads is left.
    pub(crate) dead_spaces: Vec<DeadSpace>,
    pub(crate) ticks: u64,
    /// A timer tick switched to a thread that has never run; its trampoline
    /// sends the end-of-interrupt.
    pub(crate) timer_eoi_pending: bool,
    next_tid: u32,
    next_pid: u32,
}

/// The address space of an exited process, kept until its last thread has
/// been reaped.
pub(crate) struct DeadSpace {
    pub(crate) pid: Pid,
    pub(crate) space: Arc<AddressSpace>,
    pub(crate) mmap: Arc<SpinLock<MemoryMap>>,
}

impl KernelState {
    /// The memory map describing `space`, if any process, live or exited,
    /// still uses it.
    fn memory_map_of(&self, space: &Arc<AddressSpace>) -> Option<Arc<SpinLock<MemoryMap>>> {
        self.processes
            .values()
            .find(|p| Arc::ptr_eq(&p.space, space))
            .map(|p| p.mmap.clone())
            .or_else(|| {
                self.dead_spaces
                    .iter()
                    .find(|d| Arc::ptr_eq(&d.space, space))
                    .map(|d| d.mmap.clone())
            })
    }

    fn allocate_pid(&mut self) -> Pid {
        let pid = Pid::new(self.next_pid);
        self.next_pid += 1;
        pid
    }

    pub(crate) fn current_pid(&self) -> Pid {
        self.threads
            .get(&self.current)
            .map_or(Pid::KERNEL, Thread::pid)
    }
}

/// Entry of the boot thread. Never called: the boot context is already
/// running when it is adopted.
fn adopted(_: usize) {}

pub struct Kernel<M: PhysMapper, C: Cpu> {
    mapper: M,
    cpu: C,
    irq: IrqLock,
    kernel_space: Arc<AddressSpace>,
    frames: SpinLock<BitmapFrameAlloc>,
    heap: KernelHeap,
    pub(crate) state: SpinLock<KernelState>,
    pub(crate) reaper_wake: Semaphore,
}

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Bring up the core.
    ///
    /// Builds and activates the kernel address space, creates the page
    /// tables of the whole kernel heap window up front (so every process
    /// space cloned later shares them), creates the kernel process and
    /// adopts the running boot context as its first thread.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`] if the directory or heap tables cannot be
    /// allocated.
    pub fn new(mapper: M, cpu: C, mut frames: BitmapFrameAlloc) -> Result<Self, TaskError> {
        let space = AddressSpace::bootstrap(&mapper, &mut frames)?;
        let tables = space.preallocate_tables(
            &mapper,
            &mut frames,
            VirtualAddress::new(KERNEL_HEAP_START),
            VirtualAddress::new(KERNEL_HEAP_END),
        )?;
        space.activate(&cpu);
        let directory = space.directory();
        let kernel_space = Arc::new(space);

        let boot = Tid::new(0);
        let mut kernel = Process::new(
            Pid::KERNEL,
            None,
            "kernel",
            kernel_space.clone(),
            fresh_memory_map(),
        );
        kernel.threads.push(boot);
        kernel.thread_count.store(1, Ordering::Release);

        let boot_thread = Thread {
            tid: boot,
            pid: Pid::KERNEL,
            kind: ThreadKind::Kernel {
                entry: adopted,
                arg: 0,
            },
            state: ThreadState::Running,
            kernel_stack: None,
            saved_sp: 0,
            directory,
            priority: DEFAULT_PRIORITY,
            dispatched: true,
        };

        info!(
            "Kernel core up: directory {directory}, {tables} heap tables, {} of {} frames free",
            frames.free_count(),
            frames.total_count()
        );

        Ok(Self {
            mapper,
            cpu,
            irq: IrqLock::new(),
            kernel_space,
            frames: SpinLock::new(frames),
            heap: KernelHeap::new(),
            state: SpinLock::new(KernelState {
                threads: BTreeMap::from([(boot, boot_thread)]),
                processes: BTreeMap::from([(Pid::KERNEL, kernel)]),
                ready: VecDeque::new(),
                waiting: VecDeque::new(),
                terminated: VecDeque::new(),
                current: boot,
                idle: None,
                active_directory: directory,
                dead_spaces: Vec::new(),
                ticks: 0,
                timer_eoi_pending: false,
                next_tid: 1,
                next_pid: 1,
            }),
            reaper_wake: Semaphore::new(u32::MAX, 0),
        })
    }

    /// Start the idle thread and the garbage worker.
    ///
    /// The idle thread never blocks, which keeps the ready queue non-empty.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`] if a kernel stack cannot be allocated.
    pub fn spawn_system_threads(&'static self) -> Result<(Tid, Tid), TaskError>
    where
        M: 'static,
        C: 'static,
    {
        let arg = core::ptr::from_ref(self).expose_provenance();
        let idle = self.thread_create(
            Pid::KERNEL,
            ThreadEntry::Kernel {
                entry: idle_main::<M, C>,
                arg,
            },
        )?;
        let reaper = self.thread_create(
            Pid::KERNEL,
            ThreadEntry::Kernel {
                entry: reaper_main::<M, C>,
                arg,
            },
        )?;

        let mut state = self.state.lock_irq(&self.irq, &self.cpu);
        state.idle = Some(idle);
        if let Some(thread) = state.threads.get_mut(&idle) {
            thread.priority = IDLE_PRIORITY;
        }
        info!("Idle thread {idle}, garbage worker {reaper}");
        Ok((idle, reaper))
    }

    #[inline]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The scheduler lock.
    #[inline]
    pub const fn irq(&self) -> &IrqLock {
        &self.irq
    }

    #[inline]
    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    pub(crate) fn with_space<R>(
        &self,
        space: &AddressSpace,
        f: impl FnOnce(&mut Vmm<'_, M, BitmapFrameAlloc, C>) -> R,
    ) -> R {
        let mut frames = self.frames.lock_irq(&self.irq, &self.cpu);
        let mut vmm = Vmm::new(space, &self.mapper, &mut *frames, &self.cpu);
        f(&mut vmm)
    }

    pub(crate) fn with_frames<R>(&self, f: impl FnOnce(&mut BitmapFrameAlloc) -> R) -> R {
        let mut frames = self.frames.lock_irq(&self.irq, &self.cpu);
        f(&mut *frames)
    }

    // Physical frames.

    pub fn alloc_frame(&self) -> Option<PhysicalFrame> {
        self.with_frames(BitmapFrameAlloc::alloc_frame)
    }

    pub fn alloc_frames(&self, n: u32) -> Option<PhysicalFrame> {
        self.with_frames(|f| f.alloc_frames(n))
    }

    pub fn free_frame(&self, frame: PhysicalFrame) {
        self.with_frames(|f| f.free_frame(frame));
    }

    pub fn free_frames(&self, base: PhysicalFrame, n: u32) {
        self.with_frames(|f| f.free_frames(base, n));
    }

    pub fn mark_used(&self, frame: PhysicalFrame) {
        self.with_frames(|f| f.mark_used(frame));
    }

    pub fn free_frame_count(&self) -> u32 {
        self.with_frames(|f| f.free_count())
    }

    pub fn total_frame_count(&self) -> u32 {
        self.with_frames(|f| f.total_count())
    }

    pub fn frame_in_use(&self, frame: PhysicalFrame) -> bool {
        self.with_frames(|f| f.is_used(frame))
    }

    // Kernel heap.

    /// Allocate `size` bytes of kernel heap. `None` when memory runs out.
    pub fn kmalloc(&self, size: u32) -> Option<VirtualAddress> {
        self.with_space(&self.kernel_space, |vmm| self.heap.kmalloc(vmm, size))
    }

    /// Allocate `count * size` zeroed bytes of kernel heap.
    pub fn kcalloc(&self, count: u32, size: u32) -> Option<VirtualAddress> {
        self.with_space(&self.kernel_space, |vmm| {
            self.heap.kcalloc(vmm, count, size)
        })
    }

    pub fn kfree(&self, ptr: VirtualAddress) {
        self.with_space(&self.kernel_space, |vmm| self.heap.kfree(vmm, ptr));
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.with_space(&self.kernel_space, |vmm| self.heap.stats(vmm))
    }

    // Address spaces.

    /// The address space of `pid`.
    ///
    /// # Errors
    /// [`TaskError::NoSuchProcess`] if `pid` is not alive.
    pub fn space_of(&self, pid: Pid) -> Result<Arc<AddressSpace>, TaskError> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state
            .processes
            .get(&pid)
            .map(|p| p.space.clone())
            .ok_or(TaskError::NoSuchProcess(pid))
    }

    /// Map `frame` at `va` in the address space of `pid`.
    ///
    /// The kernel half is shared by every space through the page tables
    /// created at boot, so a kernel-half address is only accepted where such
    /// a table exists; the mapping is then visible in every process.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchProcess`] if `pid` is not alive.
    /// - [`TaskError::InvalidArgument`] for a kernel-half address outside
    ///   the shared tables.
    /// - [`TaskError::OutOfMemory`] if a page table cannot be allocated.
    pub fn map_address(
        &self,
        pid: Pid,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: PageFlags,
    ) -> Result<(), TaskError> {
        let space = self.space_of(pid)?;
        if va.as_u32() >= KERNEL_BASE && !self.kernel_space.has_table(&self.mapper, va) {
            warn!("{va} is in the kernel half but outside its shared tables");
            return Err(TaskError::InvalidArgument);
        }
        Ok(self.with_space(&space, |vmm| vmm.map_page(va, frame, flags))?)
    }

    /// Remove the mapping at `va` in the address space of `pid` and return
    /// the frame that was mapped there. The frame is not freed.
    ///
    /// # Errors
    /// [`TaskError::NoSuchProcess`], or [`TaskError::InvalidArgument`] if
    /// nothing is mapped at `va`.
    pub fn unmap_address(&self, pid: Pid, va: VirtualAddress) -> Result<PhysicalFrame, TaskError> {
        let space = self.space_of(pid)?;
        let _irq = self.irq.lock(&self.cpu);
        space
            .unmap(&self.mapper, &self.cpu, va)
            .map_err(|_| TaskError::InvalidArgument)
    }

    pub fn translate(&self, pid: Pid, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space_of(pid).ok()?.translate(&self.mapper, va)
    }

    // Processes.

    /// Create a process running `path`.
    ///
    /// With `space == None` a fresh address space sharing the kernel half is
    /// built; otherwise `space` is shared (fork support) together with its
    /// memory map, so heap growth and user stacks of all sharing processes
    /// come from one layout. The creating thread's process becomes the
    /// parent.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`] if the directory cannot be allocated.
    pub fn create_process(
        &self,
        path: &str,
        space: Option<Arc<AddressSpace>>,
    ) -> Result<Pid, TaskError> {
        let (space, shared) = match space {
            Some(space) => (space, true),
            None => (
                Arc::new(self.with_frames(|frames| {
                    AddressSpace::create(&self.mapper, frames, &self.kernel_space)
                })?),
                false,
            ),
        };

        let mut guard = self.state.lock_irq(&self.irq, &self.cpu);
        let state = &mut *guard;
        let mmap = if shared {
            state.memory_map_of(&space).unwrap_or_else(fresh_memory_map)
        } else {
            fresh_memory_map()
        };
        let pid = state.allocate_pid();
        let parent = state.current_pid();
        if let Some(p) = state.processes.get_mut(&parent) {
            p.children.push(pid);
        }
        info!(
            "Created process {pid} ({path}) with directory {}, parent {parent}",
            space.directory()
        );
        state
            .processes
            .insert(pid, Process::new(pid, Some(parent), path, space, mmap));
        Ok(pid)
    }

    /// Limit the heap of `pid` to `bytes`.
    ///
    /// # Errors
    /// [`TaskError::NoSuchProcess`].
    pub fn set_heap_budget(&self, pid: Pid, bytes: u32) -> Result<(), TaskError> {
        let mut state = self.state.lock_irq(&self.irq, &self.cpu);
        let process = state
            .processes
            .get_mut(&pid)
            .ok_or(TaskError::NoSuchProcess(pid))?;
        process.mmap.lock().set_heap_budget(bytes);
        Ok(())
    }

    /// Grow the heap of `pid` by `increment` bytes and return the previous
    /// break. `0` only reports the break; shrinking is not supported.
    ///
    /// # Errors
    /// - [`TaskError::InvalidArgument`] for a negative increment.
    /// - [`TaskError::HeapLimit`] past the heap's end.
    /// - [`TaskError::OutOfMemory`] when frames run out.
    pub fn sbrk(&self, pid: Pid, increment: i32) -> Result<VirtualAddress, TaskError> {
        let mut guard = self.state.lock_irq(&self.irq, &self.cpu);
        let process = guard
            .processes
            .get_mut(&pid)
            .ok_or(TaskError::NoSuchProcess(pid))?;
        let Ok(increment) = u32::try_from(increment) else {
            return Err(TaskError::InvalidArgument);
        };
        let space = &process.space;
        let mut mmap = process.mmap.lock();
        let heap = mmap.heap_mut();
        let mut frames = self.frames.lock_irq(&self.irq, &self.cpu);
        let mut vmm = Vmm::new(space, &self.mapper, &mut *frames, &self.cpu);
        let brk = heap.grow(&mut vmm, increment).inspect_err(|e| {
            warn!("sbrk({increment}) for {pid} failed: {e}");
        })?;
        Ok(brk)
    }

    /// Store `file` in the lowest free descriptor of `pid`.
    ///
    /// # Errors
    /// [`TaskError::NoSuchProcess`] or [`TaskError::TooManyOpenFiles`].
    pub fn install_file(&self, pid: Pid, file: FileHandle) -> Result<usize, TaskError> {
        let mut state = self.state.lock_irq(&self.irq, &self.cpu);
        let process = state
            .processes
            .get_mut(&pid)
            .ok_or(TaskError::NoSuchProcess(pid))?;
        process.files.install(file)
    }

    /// Close descriptor `fd` of `pid`.
    ///
    /// # Errors
    /// [`TaskError::NoSuchProcess`] or [`TaskError::BadFileDescriptor`].
    pub fn close_file(&self, pid: Pid, fd: usize) -> Result<(), TaskError> {
        let file = {
            let mut state = self.state.lock_irq(&self.irq, &self.cpu);
            let process = state
                .processes
                .get_mut(&pid)
                .ok_or(TaskError::NoSuchProcess(pid))?;
            process.files.remove(fd)?
        };
        file.release();
        Ok(())
    }

    /// Run `f` on the record of `pid`.
    pub fn with_process<R>(&self, pid: Pid, f: impl FnOnce(&Process) -> R) -> Option<R> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.processes.get(&pid).map(f)
    }

    // Threads.

    /// Create a thread in `pid` and make it ready.
    ///
    /// The thread gets a kernel stack whose top holds a [`SwitchFrame`]
    /// returning into the CPU's trampoline, which enables interrupts,
    /// acknowledges the timer and only then calls into the thread. A user
    /// thread also gets a user stack in its process's address space.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchProcess`] if `pid` is not alive.
    /// - [`TaskError::OutOfMemory`] if the stacks cannot be allocated.
    pub fn thread_create(&self, pid: Pid, entry: ThreadEntry) -> Result<Tid, TaskError> {
        let kernel_stack = self
            .kmalloc(KERNEL_STACK_SIZE)
            .ok_or(TaskError::OutOfMemory)?;
        let sp = kernel_stack + (KERNEL_STACK_SIZE - SwitchFrame::SIZE);
        let frame = SwitchFrame::initial(self.cpu.trampoline_address());

        let result = self
            .kernel_space
            .write(&self.mapper, sp, &frame)
            .map_err(TaskError::from)
            .and_then(|()| self.register_thread(pid, entry, kernel_stack, sp));
        if result.is_err() {
            self.kfree(kernel_stack);
        }
        result
    }

    /// Shorthand for a kernel thread in the kernel process.
    ///
    /// # Errors
    /// See [`thread_create`](Self::thread_create).
    pub fn spawn_kernel_thread(&self, entry: KernelEntry, arg: usize) -> Result<Tid, TaskError> {
        self.thread_create(Pid::KERNEL, ThreadEntry::Kernel { entry, arg })
    }

    fn register_thread(
        &self,
        pid: Pid,
        entry: ThreadEntry,
        kernel_stack: VirtualAddress,
        sp: VirtualAddress,
    ) -> Result<Tid, TaskError> {
        let mut guard = self.state.lock_irq(&self.irq, &self.cpu);
        let state = &mut *guard;
        let process = state
            .processes
            .get_mut(&pid)
            .ok_or(TaskError::NoSuchProcess(pid))?;

        let kind = match entry {
            ThreadEntry::Kernel { entry, arg } => ThreadKind::Kernel { entry, arg },
            ThreadEntry::User { entry, arg } => ThreadKind::User {
                entry,
                arg,
                stack: self.map_user_stack(process, arg)?,
            },
        };

        let tid = Tid::new(state.next_tid);
        state.next_tid += 1;
        process.threads.push(tid);
        process.thread_count.fetch_add(1, Ordering::AcqRel);
        let directory = process.space.directory();
        state.threads.insert(
            tid,
            Thread {
                tid,
                pid,
                kind,
                state: ThreadState::New,
                kernel_stack: Some(kernel_stack),
                saved_sp: sp.as_u32(),
                directory,
                priority: DEFAULT_PRIORITY,
                dispatched: false,
            },
        );
        debug!("Created {tid} in {pid} with kernel stack at {kernel_stack}: {kind:?}");
        state.make_ready(tid);
        Ok(tid)
    }

    /// Map the next free user stack slot of `process`'s address space and
    /// push `arg` and a null return address.
    ///
    /// Slots are laid out downward from [`USER_STACK_TOP`], each followed
    /// (below) by unmapped guard pages.
    fn map_user_stack(&self, process: &Process, arg: u32) -> Result<UserStack, TaskError> {
        let mut mmap = process.mmap.lock();
        let span = (USER_STACK_PAGES + USER_STACK_GUARD_PAGES) * PAGE_SIZE;
        let top = mmap
            .next_stack_slot()
            .checked_mul(span)
            .and_then(|below| USER_STACK_TOP.checked_sub(below))
            .ok_or(TaskError::OutOfMemory)?;
        let stack = UserStack {
            base: VirtualAddress::new(top - USER_STACK_PAGES * PAGE_SIZE),
            pages: USER_STACK_PAGES,
        };
        if stack.base < mmap.heap_end() {
            warn!("{}: user stacks ran into the heap", process.pid);
            return Err(TaskError::OutOfMemory);
        }
        mmap.add_region(Region {
            start: stack.base,
            end: stack.top(),
            flags: PageFlags::USER_RW,
            kind: RegionKind::Stack,
        })?;

        let space = &process.space;
        let mapped = self.with_space(space, |vmm| {
            vmm.map_anon_pages(stack.base, stack.pages, PageFlags::USER_RW)?;
            vmm.write(stack.initial_sp(), &[0u32, arg]).inspect_err(|_| {
                vmm.unmap_pages(stack.base, stack.pages);
            })
        });
        if let Err(e) = mapped {
            mmap.remove_region(stack.base);
            return Err(e.into());
        }

        mmap.advance_stack_slot();
        debug!(
            "User stack for {} at {}..{}",
            process.pid,
            stack.base,
            stack.top()
        );
        Ok(stack)
    }

    // Introspection.

    pub fn current_tid(&self) -> Tid {
        self.state.lock_irq(&self.irq, &self.cpu).current
    }

    pub fn current_pid(&self) -> Pid {
        self.state.lock_irq(&self.irq, &self.cpu).current_pid()
    }

    pub fn idle_tid(&self) -> Option<Tid> {
        self.state.lock_irq(&self.irq, &self.cpu).idle
    }

    pub fn thread_state(&self, tid: Tid) -> Option<ThreadState> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.threads.get(&tid).map(Thread::state)
    }

    /// Run `f` on the record of `tid`.
    pub fn with_thread<R>(&self, tid: Tid, f: impl FnOnce(&Thread) -> R) -> Option<R> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.threads.get(&tid).map(f)
    }

    pub fn ready_queue(&self) -> Vec<Tid> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.ready.iter().copied().collect()
    }

    pub fn waiting_queue(&self) -> Vec<Tid> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.waiting.iter().copied().collect()
    }

    pub fn terminated_queue(&self) -> Vec<Tid> {
        let state = self.state.lock_irq(&self.irq, &self.cpu);
        state.terminated.iter().copied().collect()
    }

    /// Timer ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.state.lock_irq(&self.irq, &self.cpu).ticks
    }
}

/// Recover the kernel from a system thread's argument.
fn kernel_from_arg<M, C>(arg: usize) -> &'static Kernel<M, C>
where
    M: PhysMapper + 'static,
    C: Cpu + 'static,
{
    // SAFETY: `arg` was exposed from a `&'static Kernel<M, C>` in
    // `spawn_system_threads`.
    unsafe { &*core::ptr::with_exposed_provenance::<Kernel<M, C>>(arg) }
}

fn idle_main<M: PhysMapper + 'static, C: Cpu + 'static>(arg: usize) {
    let kernel = kernel_from_arg::<M, C>(arg);
    loop {
        kernel.cpu.halt();
    }
}

fn reaper_main<M: PhysMapper + 'static, C: Cpu + 'static>(arg: usize) {
    let kernel = kernel_from_arg::<M, C>(arg);
    loop {
        kernel.reaper_wake.down(kernel);
        kernel.reap();
    }
}
