use super::address_space::AddressSpaceId;
use swapvm_shared::mem::{OFFSET, PAGE_FRAME_SIZE};

/// Number of frames the kernel's direct mapping above `OFFSET` can reach.
pub const MAX_KERNEL_FRAMES: usize = (usize::MAX - OFFSET) / PAGE_FRAME_SIZE + 1;

/// Index of a physical page frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(usize);

impl FrameHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Where the kernel sees this frame in its own direct mapping. Only defined for indices below
    /// [`MAX_KERNEL_FRAMES`].
    pub const fn kernel_vaddr(self) -> usize {
        OFFSET + self.0 * PAGE_FRAME_SIZE
    }
}

/// Which user page a frame currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTableEntry {
    pub owner: AddressSpaceId,
    pub vaddr: usize,
    /// Set when the kernel modified the frame in a way the page table bits do not show.
    pub dirty: bool,
}

impl FrameTableEntry {
    pub const fn new(owner: AddressSpaceId, vaddr: usize) -> Self {
        Self {
            owner,
            vaddr,
            dirty: false,
        }
    }
}

/// The physical frame allocator, its frame table, and its eviction policy.
///
/// Every frame handed out by [`FrameAllocator::acquire_frame`] is `PAGE_FRAME_SIZE` bytes and stays
/// owned by the caller until passed to [`FrameAllocator::release_frame`].
pub trait FrameAllocator {
    /// Take a free frame, or `None` if physical memory is full.
    fn acquire_frame(&mut self) -> Option<FrameHandle>;

    /// Give `frame` back. Its frame table entry is cleared.
    fn release_frame(&mut self, frame: FrameHandle);

    /// Pick a frame holding a user page that may be reclaimed, or `None` if there is none.
    fn select_eviction_victim(&mut self) -> Option<FrameHandle>;

    fn entry(&self, frame: FrameHandle) -> Option<&FrameTableEntry>;

    fn entry_mut(&mut self, frame: FrameHandle) -> Option<&mut FrameTableEntry>;

    /// Record which page `frame` holds (`None` when it holds none).
    fn set_entry(&mut self, frame: FrameHandle, entry: Option<FrameTableEntry>);

    /// Hint for the eviction policy that `frame` was just used.
    fn note_access(&mut self, _frame: FrameHandle) {}

    fn frame(&self, frame: FrameHandle) -> &[u8];

    fn frame_mut(&mut self, frame: FrameHandle) -> &mut [u8];
}
