use thiserror::Error;

/// Error type for block operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The sector is out of bounds (greater than the block size)
    #[error("sector out of bounds (greater than the block size)")]
    SectorOutOfBounds,
    /// The buffer has an invalid size (not `BLOCK_SECTOR_SIZE`)
    #[error("invalid buffer size (not `BLOCK_SECTOR_SIZE`)")]
    BufferInvalid,
    /// Error reading from the disk
    #[error("error reading from the block device")]
    ReadError,
    /// Error writing to the disk
    #[error("error writing to the block device")]
    WriteError,
    /// Writes to blocks owned by another operating system are refused
    #[error("cannot write to a foreign block device")]
    ForeignWrite,
}
