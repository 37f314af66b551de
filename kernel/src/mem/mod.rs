//! Physical and virtual memory bookkeeping for user address spaces.
//!
//! The traits in [`frame_table`] and [`page_table`] are the seams to the rest of the kernel: the
//! frame allocator and the MMU. [`frame_allocator::FramePool`] and [`page_table::SoftPageTable`]
//! implement them over plain memory.

pub mod address_space;
pub mod frame_allocator;
pub mod frame_table;
pub mod page_replacement;
pub mod page_table;
pub mod spt;

pub use address_space::{AddressSpaceId, AddressSpaceTable};
pub use frame_table::{FrameAllocator, FrameHandle, FrameTableEntry};
pub use page_table::HardwarePageTable;
pub use spt::{PageState, SptEntry, SupplementalPageTable};
