//! Bookkeeping for which swap slots hold a page.
//!
//! A slot is one sector of the swap device. A page occupies a run of [`SLOTS_PER_PAGE`] contiguous
//! slots, named by the index of its first slot.

use super::swap_error::{Result, SwapError};
use crate::block::block_core::BlockSector;
use crate::sync::mutex::Mutex;
use alloc::{vec, vec::Vec};
use core::fmt;
use log::{debug, trace};
use swapvm_shared::mem::SECTORS_PER_PAGE;

pub const SLOTS_PER_PAGE: usize = SECTORS_PER_PAGE as usize;

const BITS: usize = u64::BITS as usize;

/// Index of the first slot of a run, which is also the first swap device sector it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(BlockSector);

impl SlotIndex {
    pub const fn new(index: BlockSector) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn sector(self) -> BlockSector {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bit per slot for "in use", and one bit per slot marking where a run starts, so a free can
/// tell the head of a run from a slot in its middle.
#[derive(Debug)]
struct SlotMap {
    used: Vec<u64>,
    heads: Vec<u64>,
    capacity: usize,
    used_slots: usize,
}

fn test_bit(bits: &[u64], index: usize) -> bool {
    bits[index / BITS] & (1 << (index % BITS)) != 0
}

fn set_bit(bits: &mut [u64], index: usize, value: bool) {
    let mask = 1 << (index % BITS);
    if value {
        bits[index / BITS] |= mask;
    } else {
        bits[index / BITS] &= !mask;
    }
}

impl SlotMap {
    fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(BITS);
        Self {
            used: vec![0; words],
            heads: vec![0; words],
            capacity,
            used_slots: 0,
        }
    }

    fn is_used(&self, slot: usize) -> bool {
        slot < self.capacity && test_bit(&self.used, slot)
    }

    /// Lowest index starting `SLOTS_PER_PAGE` free slots, searching from `from`.
    fn first_fit(&self, from: usize) -> Option<usize> {
        let mut start = from;
        while start + SLOTS_PER_PAGE <= self.capacity {
            // Count free slots from `start`, up to a full run.
            let free = (start..start + SLOTS_PER_PAGE)
                .take_while(|&slot| !self.is_used(slot))
                .count();
            if free == SLOTS_PER_PAGE {
                return Some(start);
            }
            // Slot `start + free` is used; no run can begin at or before it.
            start += free + 1;
        }
        None
    }

    fn mark(&mut self, start: usize, used: bool) {
        for slot in start..start + SLOTS_PER_PAGE {
            set_bit(&mut self.used, slot, used);
        }
        set_bit(&mut self.heads, start, used);
        if used {
            self.used_slots += SLOTS_PER_PAGE;
        } else {
            self.used_slots -= SLOTS_PER_PAGE;
        }
    }

    fn is_run_head(&self, start: usize) -> bool {
        start < self.capacity && test_bit(&self.heads, start)
    }
}

/// Allocates page-sized slot runs on the swap device.
///
/// Every scan-and-mark and every free happens with the allocator's lock held, so two callers can
/// never be handed overlapping runs.
#[derive(Debug)]
pub struct SlotAllocator {
    map: Mutex<SlotMap>,
}

impl SlotAllocator {
    /// An allocator for a device of `capacity` sectors. Trailing sectors that do not make up a
    /// whole run are never handed out.
    pub fn new(capacity: BlockSector) -> Self {
        debug!(
            "swap slot allocator: {} slots, {} page runs",
            capacity,
            capacity as usize / SLOTS_PER_PAGE
        );
        Self {
            map: Mutex::new(SlotMap::new(capacity as usize)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.map.lock().capacity
    }

    pub fn used_slots(&self) -> usize {
        self.map.lock().used_slots
    }

    /// Number of runs that could still be allocated one after another right now.
    pub fn free_runs(&self) -> usize {
        let map = self.map.lock();
        let mut runs = 0;
        let mut from = 0;
        while let Some(start) = map.first_fit(from) {
            runs += 1;
            from = start + SLOTS_PER_PAGE;
        }
        runs
    }

    pub fn is_allocated(&self, slot: usize) -> bool {
        self.map.lock().is_used(slot)
    }

    /// Reserve the first run of free slots.
    ///
    /// # Errors
    ///
    /// [`SwapError::SwapExhausted`] if no run of [`SLOTS_PER_PAGE`] free slots is left.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate_slot_run(&self) -> Result<SlotIndex> {
        let mut map = self.map.lock();
        let start = map.first_fit(0).ok_or(SwapError::SwapExhausted)?;
        map.mark(start, true);
        trace!("allocated swap slots {}..{}", start, start + SLOTS_PER_PAGE);
        Ok(SlotIndex::new(start as BlockSector))
    }

    /// Give back the run starting at `index`.
    ///
    /// # Errors
    ///
    /// [`SwapError::DoubleFree`] if no allocated run starts at `index`. Nothing is freed then.
    pub fn free_slot_run(&self, index: SlotIndex) -> Result<()> {
        let mut map = self.map.lock();
        if !map.is_run_head(index.index()) {
            return Err(SwapError::DoubleFree(index));
        }
        map.mark(index.index(), false);
        trace!("freed swap slots {}..{}", index, index.index() + SLOTS_PER_PAGE);
        Ok(())
    }

    /// Mark the run at `index` used regardless of first fit.
    #[cfg(test)]
    pub(crate) fn reserve_slot_run_at(&self, index: SlotIndex) {
        let mut map = self.map.lock();
        let start = index.index();
        assert!(start + SLOTS_PER_PAGE <= map.capacity);
        assert!((start..start + SLOTS_PER_PAGE).all(|slot| !map.is_used(slot)));
        map.mark(start, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_first_allocation() {
        let slots = SlotAllocator::new(64);
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(0)));
        assert!((0..8).all(|slot| slots.is_allocated(slot)));
        assert!(!slots.is_allocated(8));
        assert_eq!(slots.used_slots(), 8);
        assert_eq!(slots.free_runs(), 7);
    }

    #[test]
    fn test_exhaustion() {
        let slots = SlotAllocator::new(64);
        for run in 0..8 {
            assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(run * 8)));
        }
        assert_eq!(slots.allocate_slot_run(), Err(SwapError::SwapExhausted));
        assert_eq!(slots.used_slots(), 64);
        assert_eq!(slots.free_runs(), 0);

        slots.free_slot_run(SlotIndex::new(24)).unwrap();
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(24)));
    }

    #[test]
    fn test_partial_run_unused() {
        let slots = SlotAllocator::new(20);
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(0)));
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(8)));
        assert_eq!(slots.allocate_slot_run(), Err(SwapError::SwapExhausted));
        assert!(!slots.is_allocated(16));
    }

    #[test]
    fn test_double_free() {
        let slots = SlotAllocator::new(64);
        let run = slots.allocate_slot_run().unwrap();
        slots.free_slot_run(run).unwrap();
        assert_eq!(slots.free_slot_run(run), Err(SwapError::DoubleFree(run)));
        assert_eq!(slots.used_slots(), 0);
    }

    #[test]
    fn test_free_inside_run() {
        let slots = SlotAllocator::new(64);
        slots.allocate_slot_run().unwrap();
        assert_eq!(
            slots.free_slot_run(SlotIndex::new(3)),
            Err(SwapError::DoubleFree(SlotIndex::new(3)))
        );
        // The run is still whole.
        assert!((0..8).all(|slot| slots.is_allocated(slot)));
        assert_eq!(
            slots.free_slot_run(SlotIndex::new(640)),
            Err(SwapError::DoubleFree(SlotIndex::new(640)))
        );
    }

    #[test]
    fn test_unaligned_reservation_is_skipped() {
        let slots = SlotAllocator::new(32);
        slots.reserve_slot_run_at(SlotIndex::new(5));
        // 0..5 is too short, so the first fit lands after the reserved run.
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(13)));
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(21)));
        // Only 29..32 is left.
        assert_eq!(slots.allocate_slot_run(), Err(SwapError::SwapExhausted));
        slots.free_slot_run(SlotIndex::new(5)).unwrap();
        assert_eq!(slots.allocate_slot_run(), Ok(SlotIndex::new(0)));
    }

    #[test]
    fn test_concurrent_allocation_is_exclusive() {
        const THREADS: usize = 4;
        const RUNS: usize = 32;
        let slots = Arc::new(SlotAllocator::new((THREADS * RUNS * SLOTS_PER_PAGE) as u32));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    (0..RUNS)
                        .map(|_| slots.allocate_slot_run().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut runs: Vec<SlotIndex> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        runs.sort();
        for pair in runs.windows(2) {
            assert!(pair[0].index() + SLOTS_PER_PAGE <= pair[1].index());
        }
        assert_eq!(runs.len(), THREADS * RUNS);
        assert_eq!(slots.allocate_slot_run(), Err(SwapError::SwapExhausted));
    }

    /// First-fit start over a list of live runs, computed the slow way.
    fn model_first_fit(live: &[usize], capacity: usize) -> Option<usize> {
        (0..=capacity.checked_sub(SLOTS_PER_PAGE)?).find(|&start| {
            live.iter()
                .all(|&run| run + SLOTS_PER_PAGE <= start || start + SLOTS_PER_PAGE <= run)
        })
    }

    proptest! {
        #[test]
        fn test_matches_model(capacity in 0u32..160, ops in prop::collection::vec(any::<Option<u8>>(), 0..64)) {
            let slots = SlotAllocator::new(capacity);
            let mut live: Vec<usize> = Vec::new();

            for op in ops {
                match op {
                    None => {
                        let expected = model_first_fit(&live, capacity as usize);
                        match slots.allocate_slot_run() {
                            Ok(run) => {
                                prop_assert_eq!(Some(run.index()), expected);
                                live.push(run.index());
                            }
                            Err(err) => {
                                prop_assert_eq!(err, SwapError::SwapExhausted);
                                prop_assert_eq!(expected, None);
                            }
                        }
                    }
                    Some(pick) if !live.is_empty() => {
                        let run = live.swap_remove(pick as usize % live.len());
                        prop_assert_eq!(slots.free_slot_run(SlotIndex::new(run as u32)), Ok(()));
                        prop_assert_eq!(
                            slots.free_slot_run(SlotIndex::new(run as u32)),
                            Err(SwapError::DoubleFree(SlotIndex::new(run as u32)))
                        );
                    }
                    Some(_) => {}
                }
                prop_assert_eq!(slots.used_slots(), live.len() * SLOTS_PER_PAGE);
            }
        }
    }
}
