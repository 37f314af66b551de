use super::frame_allocator::CoreMapEntry;

/// Chooses which frame gets evicted when physical memory runs out.
pub trait PageReplacementPolicy {
    /// Returns the index of a frame that is allocated, mapped and not pinned, or `None` if no frame
    /// qualifies. The policy may update bookkeeping bits in `core_map` as it goes.
    fn evict_page(&mut self, core_map: &mut [CoreMapEntry]) -> Option<usize>;
}

fn evictable(entry: CoreMapEntry) -> bool {
    entry.allocated() && entry.mapped() && !entry.pinned()
}

/// Second-chance clock: a frame referenced since the hand last passed gets its bit cleared and is
/// skipped once.
#[derive(Debug, Default)]
pub struct ClockEviction {
    hand: usize,
}

impl PageReplacementPolicy for ClockEviction {
    fn evict_page(&mut self, core_map: &mut [CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        if total_frames == 0 {
            return None;
        }
        self.hand %= total_frames;

        // The first lap may only clear reference bits; the second is guaranteed to find a victim
        // if any frame is evictable at all.
        for _ in 0..2 * total_frames {
            let index = self.hand;
            self.hand = (self.hand + 1) % total_frames;

            let entry = core_map[index];
            if !evictable(entry) {
                continue;
            }
            if entry.referenced() {
                core_map[index] = entry.with_referenced(false);
                continue;
            }
            return Some(index);
        }
        None
    }
}

/// Evicts evictable frames strictly in index order, ignoring reference bits.
#[derive(Debug, Default)]
pub struct RoundRobinEviction {
    next: usize,
}

impl PageReplacementPolicy for RoundRobinEviction {
    fn evict_page(&mut self, core_map: &mut [CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        let index = (0..total_frames)
            .map(|offset| (self.next + offset) % total_frames)
            .find(|&index| evictable(core_map[index]))?;
        self.next = (index + 1) % total_frames;
        Some(index)
    }
}
