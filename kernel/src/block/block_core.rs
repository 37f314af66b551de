use crate::block::block_error::BlockError;
use alloc::{boxed::Box, string::String, vec::Vec};
use core::fmt;
use log::info;
use swapvm_shared::sizes::SECTOR_SIZE;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = SECTOR_SIZE as usize;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Types of blocks
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    /// OS Kernel
    Kernel,
    /// File system
    FileSystem,
    /// Scratch
    Scratch,
    /// Swap
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
    /// Owned by another operating system
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::Kernel => write!(f, "Kernel"),
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Scratch => write!(f, "Scratch"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
            BlockType::Foreign => write!(f, "Foreign"),
        }
    }
}

/// Lower-level interface to block device drivers
///
/// Buffers handed to a driver are always exactly `BLOCK_SECTOR_SIZE` bytes and `sector` is always
/// within the device; [`Block`] checks both before calling in.
pub trait BlockOp: Send {
    /// Read a block sector
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Write a block sector
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// A block device
pub struct Block {
    /// Unique and immutable index of the block
    index: usize,
    /// The name of the block device
    block_name: String,

    /// The type of block
    block_type: BlockType,
    /// The block driver
    driver: Box<dyn BlockOp>,

    /// The size of the block device in sectors
    block_size: BlockSector,

    /// The read count
    read_count: u32,
    /// The write count
    write_count: u32,
}

impl Block {
    /// Verifies that `buf` is a valid buffer for reading or writing a block sector.
    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        Ok(())
    }

    /// Verifies that `sector` is a valid offset within the block device.
    fn check_sector(&self, sector: BlockSector) -> Result<(), BlockError> {
        if sector >= self.block_size {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(())
    }

    /// Reads sector `sector` from the block device into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        self.driver.read(sector, buf)?;
        self.read_count += 1;
        Ok(())
    }

    /// Writes sector `sector` from `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes. Returns
    /// after the block device has acknowledged receiving the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        if self.block_type == BlockType::Foreign {
            return Err(BlockError::ForeignWrite);
        }

        self.driver.write(sector, buf)?;
        self.write_count += 1;
        Ok(())
    }

    // Block getters -----------------------------------------------------------

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
    pub fn get_index(&self) -> usize {
        self.index
    }
    pub fn read_count(&self) -> u32 {
        self.read_count
    }
    pub fn write_count(&self) -> u32 {
        self.write_count
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "    {:04} | \"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.index,
            self.block_name,
            self.block_type,
            self.block_size,
            self.read_count,
            self.write_count
        )
    }
}

/// Maintain a list of blocks
pub struct BlockManager {
    /// All the block devices that have not been claimed by a subsystem
    all_blocks: Vec<Block>,
    /// The index handed to the next registered block device
    next_index: usize,
}

impl Default for BlockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockManager {
    /// Create a new block manager
    pub fn new() -> Self {
        BlockManager::with_capacity(10)
    }

    /// Create a new block manager with a given capacity
    pub fn with_capacity(cap: usize) -> Self {
        BlockManager {
            all_blocks: Vec::with_capacity(cap),
            next_index: 0,
        }
    }

    /// Register a block device with the given `name`. The block device's `size` in sectors and its
    /// `block_type` must be provided, as well as the `driver` to access the block.
    ///
    /// Returns the index of the block device.
    pub fn register_block(
        &mut self,
        block_type: BlockType,
        block_name: &str,
        block_size: BlockSector,
        driver: Box<dyn BlockOp>,
    ) -> usize {
        let index = self.next_index;
        self.all_blocks.push(Block {
            index,
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: 0,
            write_count: 0,
        });

        info!(
            "Registered block device \"{}\" ({} type) with {} sectors",
            block_name, block_type, block_size,
        );

        self.next_index += 1;
        index
    }

    /// Get the block device with the given `index`.
    ///
    /// Returns `None` if no such device is registered (or it has been claimed).
    pub fn by_id(&mut self, idx: usize) -> Option<&mut Block> {
        self.all_blocks.iter_mut().find(|b| b.index == idx)
    }

    /// Get the block device with the given `name`.
    ///
    /// **Note:** This function is very inefficient and should be avoided.
    pub fn by_name(&mut self, name: &str) -> Option<&mut Block> {
        self.all_blocks.iter_mut().find(|b| b.block_name == name)
    }

    /// Hand the first device of type `block_type` over to the caller, which becomes its only user.
    pub fn claim(&mut self, block_type: BlockType) -> Option<Block> {
        let position = self
            .all_blocks
            .iter()
            .position(|b| b.block_type == block_type)?;
        Some(self.all_blocks.remove(position))
    }
}

impl fmt::Display for BlockManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Block Devices:")?;
        for block in self.all_blocks.iter() {
            writeln!(f, "{}", block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mem_disk::MemDisk;

    fn manager_with_swap(sectors: BlockSector) -> BlockManager {
        let mut manager = BlockManager::new();
        manager.register_block(
            BlockType::FileSystem,
            "hda",
            16,
            Box::new(MemDisk::new(16)),
        );
        manager.register_block(
            BlockType::Swap,
            "hdb",
            sectors,
            Box::new(MemDisk::new(sectors)),
        );
        manager
    }

    #[test]
    fn test_read_write_sector() {
        let mut manager = manager_with_swap(4);
        let block = manager.by_name("hdb").unwrap();

        let data = [0xabu8; BLOCK_SECTOR_SIZE];
        block.write(3, &data).unwrap();
        let mut buf = [0u8; BLOCK_SECTOR_SIZE];
        block.read(3, &mut buf).unwrap();

        assert_eq!(buf, data);
        assert_eq!(block.read_count(), 1);
        assert_eq!(block.write_count(), 1);
    }

    #[test]
    fn test_rejects_bad_requests() {
        let mut manager = manager_with_swap(4);
        let block = manager.by_id(1).unwrap();

        let mut buf = [0u8; BLOCK_SECTOR_SIZE];
        assert_eq!(block.read(4, &mut buf), Err(BlockError::SectorOutOfBounds));
        assert_eq!(
            block.write(0, &buf[..100]),
            Err(BlockError::BufferInvalid)
        );
        assert_eq!(block.read_count(), 0);
        assert_eq!(block.write_count(), 0);
    }

    #[test]
    fn test_foreign_block_is_read_only() {
        let mut manager = BlockManager::new();
        manager.register_block(BlockType::Foreign, "hdc", 2, Box::new(MemDisk::new(2)));
        let block = manager.by_id(0).unwrap();
        let buf = [0u8; BLOCK_SECTOR_SIZE];
        assert_eq!(block.write(0, &buf), Err(BlockError::ForeignWrite));
    }

    #[test]
    fn test_claim_by_type() {
        let mut manager = manager_with_swap(64);
        let swap = manager.claim(BlockType::Swap).unwrap();
        assert_eq!(swap.get_name(), "hdb");
        assert_eq!(swap.get_size(), 64);
        assert_eq!(swap.get_index(), 1);

        // Claimed devices are no longer visible through the manager.
        assert!(manager.claim(BlockType::Swap).is_none());
        assert!(manager.by_id(1).is_none());
        assert!(manager.by_id(0).is_some());
    }
}
