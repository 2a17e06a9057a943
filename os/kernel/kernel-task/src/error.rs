use crate::process::Pid;
use crate::thread::Tid;
use kernel_alloc::AllocError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Failure of a thread, process or memory-map operation.
#[derive(Debug, thiserror::Error, Copy, Clone, Eq, PartialEq)]
pub enum TaskError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    #[error("no such thread: {0}")]
    NoSuchThread(Tid),
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(usize),
    #[error("heap limit reached")]
    HeapLimit,
    #[error("region {start}..{end} overlaps an existing region")]
    RegionOverlap {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no child to wait for")]
    NoChildren,
}

impl From<AllocError> for TaskError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::RegionExhausted { .. } => Self::HeapLimit,
            AllocError::AlreadyMapped(_) => Self::InvalidArgument,
            AllocError::OutOfFrames | AllocError::TooLarge(_) | AllocError::Map(_) => {
                Self::OutOfMemory
            }
        }
    }
}

impl From<MapError> for TaskError {
    fn from(value: MapError) -> Self {
        AllocError::from(value).into()
    }
}

/// Error numbers returned to user mode as `-errno`.
#[derive(Debug, thiserror::Error, Copy, Clone, Eq, PartialEq)]
#[repr(i32)]
pub enum Errno {
    #[error("no such process")]
    ESRCH = 3,
    #[error("bad file descriptor")]
    EBADF = 9,
    #[error("no child processes")]
    ECHILD = 10,
    #[error("out of memory")]
    ENOMEM = 12,
    #[error("invalid argument")]
    EINVAL = 22,
    #[error("too many open files")]
    EMFILE = 24,
    #[error("function not implemented")]
    ENOSYS = 38,
}

impl Errno {
    /// The syscall return value for this error.
    #[inline]
    #[must_use]
    pub const fn to_return(self) -> i32 {
        -(self as i32)
    }
}

impl From<TaskError> for Errno {
    fn from(value: TaskError) -> Self {
        match value {
            TaskError::OutOfMemory | TaskError::HeapLimit => Self::ENOMEM,
            TaskError::NoSuchProcess(_) | TaskError::NoSuchThread(_) => Self::ESRCH,
            TaskError::TooManyOpenFiles => Self::EMFILE,
            TaskError::BadFileDescriptor(_) => Self::EBADF,
            TaskError::RegionOverlap { .. } | TaskError::InvalidArgument => Self::EINVAL,
            TaskError::NoChildren => Self::ECHILD,
        }
    }
}
