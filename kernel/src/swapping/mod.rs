//! Swap space: the block device pages go to when physical memory runs out.
//!
//! [`SwapSpace`] pairs the slot bookkeeping in [`slot_allocator`] with the sector transfers in
//! [`swap_io`]. [`eviction::EvictionCoordinator`] drives both when pages move in and out.

pub mod eviction;
pub mod slot_allocator;
pub mod swap_error;
pub mod swap_io;

use crate::block::block_core::{Block, BlockManager, BlockType};
use log::{info, warn};
use slot_allocator::SlotAllocator;
use swap_error::{Result, SwapError};
use swap_io::SwapIo;

pub use eviction::EvictionCoordinator;
pub use slot_allocator::SlotIndex;

/// Slot usage at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStats {
    pub total_slots: usize,
    pub used_slots: usize,
}

pub struct SwapSpace {
    slots: SlotAllocator,
    io: SwapIo,
}

impl SwapSpace {
    /// Take the swap device out of `manager` and size the slot map to it.
    ///
    /// # Errors
    ///
    /// [`SwapError::NoSwapDevice`] if no device of [`BlockType::Swap`] is registered. Paging
    /// cannot work without one.
    pub fn bind(manager: &mut BlockManager) -> Result<Self> {
        let Some(device) = manager.claim(BlockType::Swap) else {
            warn!("no swap device found");
            return Err(SwapError::NoSwapDevice);
        };
        Ok(Self::with_device(device))
    }

    pub fn with_device(device: Block) -> Self {
        info!("using {} as swap", device);
        let io = SwapIo::new(device);
        Self {
            slots: SlotAllocator::new(io.capacity()),
            io,
        }
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn io(&self) -> &SwapIo {
        &self.io
    }

    pub fn stats(&self) -> SwapStats {
        SwapStats {
            total_slots: self.slots.capacity(),
            used_slots: self.slots.used_slots(),
        }
    }
}
