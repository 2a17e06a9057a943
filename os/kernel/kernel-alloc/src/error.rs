use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Failure of a heap or mapping request.
///
/// All variants are recoverable: the caller reports out-of-memory.
#[derive(Debug, thiserror::Error, Copy, Clone, Eq, PartialEq)]
pub enum AllocError {
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("region exhausted: {requested} bytes requested, {available} available")]
    RegionExhausted { requested: u32, available: u32 },
    #[error("allocation of {0} bytes exceeds the block size limit")]
    TooLarge(u32),
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("mapping failed: {0}")]
    Map(MapError),
}

impl From<MapError> for AllocError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfFrames => Self::OutOfFrames,
            other => Self::Map(other),
        }
    }
}
