use crate::block::block_core::{BlockManager, BlockOp, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use alloc::{boxed::Box, vec, vec::Vec};
use swapvm_shared::sizes::SWAP_SECTORS;

/// A block device kept entirely in RAM.
///
/// Useful as a swap partition on machines booted without a second disk, and in tests.
pub struct MemDisk {
    sectors: Vec<[u8; BLOCK_SECTOR_SIZE]>,
}

impl MemDisk {
    /// A zero-filled disk of `sectors` sectors.
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            sectors: vec![[0; BLOCK_SECTOR_SIZE]; sectors as usize],
        }
    }

    /// Register a `SWAP_SECTORS`-sector RAM disk as the swap device, for boots without a swap
    /// partition. Returns its block index.
    pub fn register_swap(manager: &mut BlockManager) -> usize {
        manager.register_block(
            BlockType::Swap,
            "ramswap",
            SWAP_SECTORS,
            Box::new(Self::new(SWAP_SECTORS)),
        )
    }

    // Constructed from a `BlockSector`, so the length always fits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sector_count(&self) -> BlockSector {
        self.sectors.len() as BlockSector
    }
}

impl BlockOp for MemDisk {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        let data = self
            .sectors
            .get(sector as usize)
            .ok_or(BlockError::SectorOutOfBounds)?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        let data = self
            .sectors
            .get_mut(sector as usize)
            .ok_or(BlockError::SectorOutOfBounds)?;
        data.copy_from_slice(buf);
        Ok(())
    }
}
