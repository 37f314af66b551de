use super::slot_allocator::SlotIndex;
use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use crate::sync::mutex::Mutex;
use swapvm_shared::mem::PAGE_FRAME_SIZE;

/// Moves whole pages between frames and slot runs on the swap device.
///
/// Callers must own the slot run they pass in; nothing here checks the allocator.
pub struct SwapIo {
    device: Mutex<Block>,
    capacity: BlockSector,
}

impl SwapIo {
    pub fn new(device: Block) -> Self {
        let capacity = device.get_size();
        Self {
            device: Mutex::new(device),
            capacity,
        }
    }

    /// Size of the swap device in sectors.
    pub fn capacity(&self) -> BlockSector {
        self.capacity
    }

    /// Fill `frame` from the run starting at `slot`, one sector at a time.
    pub fn read_page(&self, slot: SlotIndex, frame: &mut [u8]) -> Result<(), BlockError> {
        if frame.len() != PAGE_FRAME_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        let mut device = self.device.lock();
        for (sector, chunk) in (slot.sector()..).zip(frame.chunks_mut(BLOCK_SECTOR_SIZE)) {
            device.read(sector, chunk)?;
        }
        Ok(())
    }

    /// Copy `frame` into the run starting at `slot`.
    pub fn write_page(&self, slot: SlotIndex, frame: &[u8]) -> Result<(), BlockError> {
        if frame.len() != PAGE_FRAME_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        let mut device = self.device.lock();
        for (sector, chunk) in (slot.sector()..).zip(frame.chunks(BLOCK_SECTOR_SIZE)) {
            device.write(sector, chunk)?;
        }
        Ok(())
    }

    pub fn read_count(&self) -> u32 {
        self.device.lock().read_count()
    }

    pub fn write_count(&self) -> u32 {
        self.device.lock().write_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::{BlockManager, BlockType};
    use crate::drivers::mem_disk::MemDisk;
    use crate::swapping::slot_allocator::SlotAllocator;
    use alloc::boxed::Box;
    use swapvm_shared::mem::SECTORS_PER_PAGE;

    fn swap_io(sectors: BlockSector) -> SwapIo {
        let mut manager = BlockManager::new();
        manager.register_block(BlockType::Swap, "swap", sectors, Box::new(MemDisk::new(sectors)));
        SwapIo::new(manager.claim(BlockType::Swap).unwrap())
    }

    fn pattern(seed: u8) -> Vec<u8> {
        (0..PAGE_FRAME_SIZE)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    #[test]
    fn test_pattern_survives_other_runs() {
        let io = swap_io(64);
        let slots = SlotAllocator::new(64);

        let kept = slots.allocate_slot_run().unwrap();
        io.write_page(kept, &pattern(7)).unwrap();

        let other = slots.allocate_slot_run().unwrap();
        io.write_page(other, &pattern(99)).unwrap();
        slots.free_slot_run(other).unwrap();
        let reused = slots.allocate_slot_run().unwrap();
        assert_eq!(reused, other);
        io.write_page(reused, &[0xff; PAGE_FRAME_SIZE]).unwrap();

        let mut frame = vec![0; PAGE_FRAME_SIZE];
        io.read_page(kept, &mut frame).unwrap();
        assert_eq!(frame, pattern(7));
        assert_eq!(io.write_count(), 3 * SECTORS_PER_PAGE);
        assert_eq!(io.read_count(), SECTORS_PER_PAGE);
    }

    #[test]
    fn test_unaligned_slot() {
        let io = swap_io(32);
        io.write_page(SlotIndex::new(5), &pattern(1)).unwrap();
        let mut frame = vec![0; PAGE_FRAME_SIZE];
        io.read_page(SlotIndex::new(5), &mut frame).unwrap();
        assert_eq!(frame, pattern(1));
    }

    #[test]
    fn test_run_past_end_of_device() {
        let io = swap_io(12);
        let mut frame = vec![0; PAGE_FRAME_SIZE];
        assert_eq!(
            io.read_page(SlotIndex::new(8), &mut frame),
            Err(BlockError::SectorOutOfBounds)
        );
        assert_eq!(
            io.write_page(SlotIndex::new(16), &frame),
            Err(BlockError::SectorOutOfBounds)
        );
    }

    #[test]
    fn test_short_frame() {
        let io = swap_io(8);
        let mut frame = vec![0; BLOCK_SECTOR_SIZE];
        assert_eq!(
            io.read_page(SlotIndex::new(0), &mut frame),
            Err(BlockError::BufferInvalid)
        );
        assert_eq!(io.read_count(), 0);
    }
}
