use super::slot_allocator::SlotIndex;
use crate::block::block_error::BlockError;
use crate::mem::address_space::AddressSpaceId;
use thiserror::Error;

/// Everything that can go wrong while paging to or from swap.
///
/// Only [`SwapError::NoSwapDevice`] leaves the VM subsystem unusable; every other variant aborts
/// just the operation that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwapError {
    /// No block device of swap type was registered at boot
    #[error("no swap device is present")]
    NoSwapDevice,
    /// Every slot run on the swap device is in use
    #[error("swap slots are fully used")]
    SwapExhausted,
    /// A slot run was freed that is not currently allocated
    #[error("swap slot run {0} is not allocated")]
    DoubleFree(SlotIndex),
    /// The page is already tracked by its supplemental page table
    #[error("page {0:#x} already has a supplemental page table entry")]
    DuplicateEntry(usize),
    /// Swap-in was requested for a page that is not on swap
    #[error("page {0:#x} is not swapped out")]
    NotSwapped(usize),
    /// The page has no supplemental page table entry
    #[error("page {0:#x} is not tracked")]
    UntrackedPage(usize),
    /// No frame is currently eligible for eviction
    #[error("no frame can be evicted")]
    NoVictim,
    /// No frame could be found even after evicting
    #[error("out of physical memory")]
    OutOfMemory,
    /// The page already has a hardware translation it should not have
    #[error("page {0:#x} is already mapped")]
    AlreadyMapped(usize),
    /// The frame table and the page tables disagree about a page
    #[error("page table state for {0:#x} is inconsistent")]
    Inconsistent(usize),
    /// The address lies in the kernel half, which user address spaces cannot page
    #[error("{0:#x} is a kernel address")]
    KernelAddress(usize),
    /// Write access to a page mapped read-only
    #[error("page {0:#x} is read-only")]
    WriteProtected(usize),
    #[error("address space {0} does not exist")]
    NoAddressSpace(AddressSpaceId),
    #[error("address space {0} already exists")]
    AddressSpaceExists(AddressSpaceId),
    /// The swap device failed a sector transfer
    #[error("swap device I/O failed: {0}")]
    Io(#[from] BlockError),
}

pub type Result<T> = core::result::Result<T, SwapError>;
