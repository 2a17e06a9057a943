//! Process records: an address space plus the resources its threads share.

use crate::TaskError;
use crate::mmap::MemoryMap;
use crate::semaphore::Semaphore;
use crate::thread::Tid;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::{USER_HEAP_MAX, USER_HEAP_START};
use kernel_info::sched::MAX_OPEN_FILES;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{SpinLock, SpinLockGuard};
use kernel_vmem::AddressSpace;

/// Process identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The kernel's own process.
    pub const KERNEL: Self = Self(0);

    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// An open file as far as the process layer is concerned.
///
/// Filesystems implement this; the process layer only keeps handles and
/// releases whatever is still open when the process goes away.
pub trait FileRelease: Send + Sync {
    fn release(&self);
}

pub type FileHandle = Arc<dyn FileRelease>;

/// Fixed-size descriptor table.
pub struct FileTable {
    slots: [Option<FileHandle>; MAX_OPEN_FILES],
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Store `file` in the lowest free slot and return its descriptor.
    ///
    /// # Errors
    /// [`TaskError::TooManyOpenFiles`] when every slot is taken.
    pub fn install(&mut self, file: FileHandle) -> Result<usize, TaskError> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TaskError::TooManyOpenFiles)?;
        self.slots[fd] = Some(file);
        Ok(fd)
    }

    /// Take the handle out of slot `fd`.
    ///
    /// # Errors
    /// [`TaskError::BadFileDescriptor`] if `fd` is out of range or empty.
    pub fn remove(&mut self, fd: usize) -> Result<FileHandle, TaskError> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(TaskError::BadFileDescriptor(fd))
    }

    #[must_use]
    pub fn get(&self, fd: usize) -> Option<&FileHandle> {
        self.slots.get(fd)?.as_ref()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Empty the table, returning every open handle.
    pub fn drain(&mut self) -> Vec<FileHandle> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTable")
            .field("open", &self.open_count())
            .finish()
    }
}

#[derive(Debug)]
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) path: String,
    pub(crate) space: Arc<AddressSpace>,
    pub(crate) mmap: Arc<SpinLock<MemoryMap>>,
    pub(crate) files: FileTable,
    pub(crate) threads: Vec<Tid>,
    pub(crate) thread_count: AtomicU32,
    pub(crate) children: Vec<Pid>,
    pub(crate) exited_children: VecDeque<(Pid, i32)>,
    pub(crate) child_exit: Arc<Semaphore>,
}

/// The memory map of a fresh user address space.
pub(crate) fn fresh_memory_map() -> Arc<SpinLock<MemoryMap>> {
    Arc::new(SpinLock::new(MemoryMap::new(
        VirtualAddress::new(USER_HEAP_START),
        VirtualAddress::new(USER_HEAP_START + USER_HEAP_MAX),
    )))
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        parent: Option<Pid>,
        path: &str,
        space: Arc<AddressSpace>,
        mmap: Arc<SpinLock<MemoryMap>>,
    ) -> Self {
        Self {
            pid,
            parent,
            path: path.into(),
            space,
            mmap,
            files: FileTable::new(),
            threads: Vec::new(),
            thread_count: AtomicU32::new(0),
            children: Vec::new(),
            exited_children: VecDeque::new(),
            child_exit: Arc::new(Semaphore::new(u32::MAX, 0)),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn parent(&self) -> Option<Pid> {
        self.parent
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    /// The memory map of this process's address space, shared with every
    /// process using the same space.
    ///
    /// Process records are only reachable under the kernel's state lock, so
    /// the map lock is never contended.
    #[must_use]
    pub fn mmap(&self) -> SpinLockGuard<'_, MemoryMap> {
        self.mmap.lock()
    }

    /// Whether `other` runs in the same address space.
    #[must_use]
    pub fn shares_space_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.space, &other.space)
    }

    #[must_use]
    pub const fn files(&self) -> &FileTable {
        &self.files
    }

    #[must_use]
    pub fn threads(&self) -> &[Tid] {
        &self.threads
    }

    #[must_use]
    pub fn thread_count(&self) -> u32 {
        self.thread_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counted(AtomicUsize);

    impl FileRelease for Counted {
        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lowest_descriptor_is_reused() {
        let mut table = FileTable::new();
        let file: FileHandle = Arc::new(Counted::default());
        assert_eq!(table.install(file.clone()), Ok(0));
        assert_eq!(table.install(file.clone()), Ok(1));
        assert_eq!(table.install(file.clone()), Ok(2));
        assert!(table.remove(1).is_ok());
        assert_eq!(table.install(file), Ok(1));
        assert_eq!(table.open_count(), 3);
    }

    #[test]
    fn table_fills_up() {
        let mut table = FileTable::new();
        let file: FileHandle = Arc::new(Counted::default());
        for fd in 0..MAX_OPEN_FILES {
            assert_eq!(table.install(file.clone()), Ok(fd));
        }
        assert_eq!(table.install(file), Err(TaskError::TooManyOpenFiles));
        assert_eq!(table.drain().len(), MAX_OPEN_FILES);
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn bad_descriptors() {
        let mut table = FileTable::new();
        assert!(matches!(table.remove(0), Err(TaskError::BadFileDescriptor(0))));
        assert!(matches!(
            table.remove(MAX_OPEN_FILES),
            Err(TaskError::BadFileDescriptor(_))
        ));
    }
}
