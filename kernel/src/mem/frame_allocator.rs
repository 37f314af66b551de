use super::frame_table::{FrameAllocator, FrameHandle, FrameTableEntry, MAX_KERNEL_FRAMES};
use super::page_replacement::{ClockEviction, PageReplacementPolicy};
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use log::{trace, warn};
use swapvm_shared::mem::PAGE_FRAME_SIZE;
use swapvm_shared::paging::MAX_FRAME_NUMBER;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    pinned: bool,
    // Holds a user page, i.e. has a frame table entry.
    #[bit(2, rw)]
    mapped: bool,
    // Used since the eviction policy last looked at it.
    #[bit(3, rw)]
    referenced: bool,
}

/// Largest pool whose frames all fit in a page table entry and in the kernel's direct mapping.
pub const MAX_FRAMES: usize = if MAX_KERNEL_FRAMES < MAX_FRAME_NUMBER as usize + 1 {
    MAX_KERNEL_FRAMES
} else {
    MAX_FRAME_NUMBER as usize + 1
};

/// Frame allocator over a fixed block of simulated physical memory.
///
/// Frames are handed out next-fit, one at a time, and reclaimed through a
/// [`PageReplacementPolicy`].
pub struct FramePool<R: PageReplacementPolicy = ClockEviction> {
    memory: Box<[u8]>,
    core_map: Box<[CoreMapEntry]>,
    entries: Box<[Option<FrameTableEntry>]>,
    policy: R,
    /// The next frame number to start searching for free frames.
    position: usize,
    frames_allocated: usize,
}

impl FramePool {
    /// A pool of `frames` frames evicted with [`ClockEviction`].
    pub fn new(frames: usize) -> Self {
        Self::with_policy(frames, ClockEviction::default())
    }
}

impl<R: PageReplacementPolicy> FramePool<R> {
    /// # Panics
    ///
    /// Panics if `frames` is larger than [`MAX_FRAMES`].
    pub fn with_policy(frames: usize, policy: R) -> Self {
        assert!(
            frames <= MAX_FRAMES,
            "{frames} frames cannot be addressed by a page table"
        );
        Self {
            memory: vec![0; frames * PAGE_FRAME_SIZE].into_boxed_slice(),
            core_map: vec![CoreMapEntry::DEFAULT; frames].into_boxed_slice(),
            entries: vec![None; frames].into_boxed_slice(),
            policy,
            position: 0,
            frames_allocated: 0,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.core_map.len()
    }

    pub fn frames_allocated(&self) -> usize {
        self.frames_allocated
    }

    pub fn is_allocated(&self, frame: FrameHandle) -> bool {
        self.core_map
            .get(frame.index())
            .is_some_and(|entry| entry.allocated())
    }

    /// Keep `frame` from being chosen for eviction.
    pub fn pin(&mut self, frame: FrameHandle) {
        let entry = &mut self.core_map[frame.index()];
        *entry = entry.with_pinned(true);
    }

    pub fn unpin(&mut self, frame: FrameHandle) {
        let entry = &mut self.core_map[frame.index()];
        *entry = entry.with_pinned(false);
    }

    fn range_of(frame: FrameHandle) -> core::ops::Range<usize> {
        let start = frame.index() * PAGE_FRAME_SIZE;
        start..start + PAGE_FRAME_SIZE
    }
}

impl<R: PageReplacementPolicy> FrameAllocator for FramePool<R> {
    fn acquire_frame(&mut self) -> Option<FrameHandle> {
        let total_frames = self.total_frames();
        if self.frames_allocated == total_frames {
            return None;
        }

        let index = (0..total_frames)
            .map(|offset| (self.position + offset) % total_frames)
            .find(|&index| !self.core_map[index].allocated())?;

        self.core_map[index] = CoreMapEntry::DEFAULT.with_allocated(true);
        self.position = (index + 1) % total_frames;
        self.frames_allocated += 1;
        trace!("acquired frame {}", index);
        Some(FrameHandle::new(index))
    }

    fn release_frame(&mut self, frame: FrameHandle) {
        if !self.is_allocated(frame) {
            warn!("release of frame {} which is not allocated", frame.index());
            return;
        }
        self.core_map[frame.index()] = CoreMapEntry::DEFAULT;
        self.entries[frame.index()] = None;
        self.frames_allocated -= 1;
        trace!("released frame {}", frame.index());
    }

    fn select_eviction_victim(&mut self) -> Option<FrameHandle> {
        self.policy
            .evict_page(&mut self.core_map)
            .map(FrameHandle::new)
    }

    fn entry(&self, frame: FrameHandle) -> Option<&FrameTableEntry> {
        self.entries.get(frame.index())?.as_ref()
    }

    fn entry_mut(&mut self, frame: FrameHandle) -> Option<&mut FrameTableEntry> {
        self.entries.get_mut(frame.index())?.as_mut()
    }

    fn set_entry(&mut self, frame: FrameHandle, entry: Option<FrameTableEntry>) {
        let core = &mut self.core_map[frame.index()];
        *core = core
            .with_mapped(entry.is_some())
            .with_referenced(entry.is_some());
        self.entries[frame.index()] = entry;
    }

    fn note_access(&mut self, frame: FrameHandle) {
        let core = &mut self.core_map[frame.index()];
        *core = core.with_referenced(true);
    }

    fn frame(&self, frame: FrameHandle) -> &[u8] {
        &self.memory[Self::range_of(frame)]
    }

    fn frame_mut(&mut self, frame: FrameHandle) -> &mut [u8] {
        &mut self.memory[Self::range_of(frame)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::address_space::AddressSpaceId;
    use swapvm_shared::mem::OFFSET;

    #[test]
    fn test_acquire_until_full() {
        let mut pool = FramePool::new(3);
        let frames: Vec<_> = (0..3).map(|_| pool.acquire_frame().unwrap()).collect();
        assert_eq!(
            frames,
            vec![FrameHandle::new(0), FrameHandle::new(1), FrameHandle::new(2)]
        );
        assert_eq!(pool.acquire_frame(), None);
        assert_eq!(pool.frames_allocated(), 3);

        pool.release_frame(FrameHandle::new(1));
        assert!(!pool.is_allocated(FrameHandle::new(1)));
        assert_eq!(pool.acquire_frame(), Some(FrameHandle::new(1)));
    }

    #[test]
    fn test_next_fit_position() {
        let mut pool = FramePool::new(4);
        let a = pool.acquire_frame().unwrap();
        pool.acquire_frame().unwrap();
        pool.release_frame(a);
        // Search resumes after the last frame handed out rather than at the start.
        assert_eq!(pool.acquire_frame(), Some(FrameHandle::new(2)));
    }

    #[test]
    fn test_frames_do_not_overlap() {
        let mut pool = FramePool::new(2);
        let a = pool.acquire_frame().unwrap();
        let b = pool.acquire_frame().unwrap();
        pool.frame_mut(a).fill(0x11);
        pool.frame_mut(b).fill(0x22);
        assert_eq!(pool.frame(a).len(), PAGE_FRAME_SIZE);
        assert!(pool.frame(a).iter().all(|&byte| byte == 0x11));
        assert!(pool.frame(b).iter().all(|&byte| byte == 0x22));
    }

    #[test]
    fn test_victims_are_mapped_frames() {
        let mut pool = FramePool::new(3);
        let a = pool.acquire_frame().unwrap();
        let b = pool.acquire_frame().unwrap();
        assert_eq!(pool.select_eviction_victim(), None);

        pool.set_entry(b, Some(FrameTableEntry::new(AddressSpaceId(1), 0x1000)));
        assert_eq!(pool.entry(b).unwrap().vaddr, 0x1000);
        assert!(pool.entry(a).is_none());
        assert_eq!(pool.select_eviction_victim(), Some(b));

        pool.pin(b);
        assert_eq!(pool.select_eviction_victim(), None);
        pool.unpin(b);

        pool.release_frame(b);
        assert!(pool.entry(b).is_none());
        assert_eq!(pool.select_eviction_victim(), None);
    }

    #[test]
    #[should_panic(expected = "cannot be addressed")]
    fn test_pool_too_large() {
        FramePool::new(MAX_FRAMES + 1);
    }

    #[test]
    fn test_last_frame_alias_in_range() {
        let last = MAX_FRAMES - 1;
        let alias = OFFSET.checked_add(last * PAGE_FRAME_SIZE);
        assert_eq!(alias, Some(FrameHandle::new(last).kernel_vaddr()));
        assert!(last <= MAX_FRAME_NUMBER as usize);
    }

    #[test]
    fn test_entry_dirty_shadow() {
        let mut pool = FramePool::new(1);
        let frame = pool.acquire_frame().unwrap();
        pool.set_entry(frame, Some(FrameTableEntry::new(AddressSpaceId(2), 0x3000)));
        pool.entry_mut(frame).unwrap().dirty = true;
        assert!(pool.entry(frame).unwrap().dirty);
        assert_eq!(pool.entry(frame).unwrap().owner, AddressSpaceId(2));
    }
}
