use super::address_space::AddressSpaceId;
use super::frame_table::FrameHandle;
use alloc::collections::BTreeMap;
use swapvm_shared::mem::{page_number, PAGE_FRAME_SIZE};
use swapvm_shared::paging::PageTableEntry;

/// Accessors for the MMU's view of user memory.
///
/// Addresses are rounded down to their page. Dirty and accessed bits of a page that is not mapped
/// read as clear.
pub trait HardwarePageTable {
    fn get_mapping(&self, space: AddressSpaceId, vaddr: usize) -> Option<FrameHandle>;

    /// Map `vaddr` to `frame` with the accessed and dirty bits clear, replacing any earlier entry.
    fn set_mapping(
        &mut self,
        space: AddressSpaceId,
        vaddr: usize,
        frame: FrameHandle,
        writable: bool,
    );

    /// Remove the translation for `vaddr`, including from the TLB.
    fn clear_mapping(&mut self, space: AddressSpaceId, vaddr: usize);

    fn is_dirty(&self, space: AddressSpaceId, vaddr: usize) -> bool;

    fn set_dirty(&mut self, space: AddressSpaceId, vaddr: usize, dirty: bool);

    fn is_accessed(&self, space: AddressSpaceId, vaddr: usize) -> bool;

    fn set_accessed(&mut self, space: AddressSpaceId, vaddr: usize, accessed: bool);

    /// Drop whatever the page table still holds for a destroyed address space.
    fn release_space(&mut self, _space: AddressSpaceId) {}
}

/// Page tables kept in memory as x86 page table entries, one map per address space.
///
/// Clearing a mapping only drops the present bit, the way the hardware entry would look after
/// `pagedir_clear_page`; the stale dirty and accessed bits stay until overwritten.
#[derive(Default)]
pub struct SoftPageTable {
    entries: BTreeMap<(AddressSpaceId, usize), PageTableEntry>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(space: AddressSpaceId, vaddr: usize) -> (AddressSpaceId, usize) {
        (space, page_number(vaddr))
    }

    fn present(&self, space: AddressSpaceId, vaddr: usize) -> Option<PageTableEntry> {
        self.entries
            .get(&Self::key(space, vaddr))
            .copied()
            .filter(|entry| entry.present())
    }

    fn update(
        &mut self,
        space: AddressSpaceId,
        vaddr: usize,
        f: impl FnOnce(PageTableEntry) -> PageTableEntry,
    ) {
        if let Some(entry) = self.entries.get_mut(&Self::key(space, vaddr)) {
            *entry = f(*entry);
        }
    }

    /// Number of present translations in `space`.
    pub fn mapping_count(&self, space: AddressSpaceId) -> usize {
        self.entries
            .range((space, 0)..=(space, usize::MAX))
            .filter(|(_, entry)| entry.present())
            .count()
    }

    pub fn is_writable(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.present(space, vaddr)
            .is_some_and(|entry| entry.read_write())
    }

    /// Page-aligned addresses of every present translation in `space`.
    pub fn mapped_pages(&self, space: AddressSpaceId) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .range((space, 0)..=(space, usize::MAX))
            .filter(|(_, entry)| entry.present())
            .map(|((_, vpn), _)| vpn * PAGE_FRAME_SIZE)
    }
}

impl HardwarePageTable for SoftPageTable {
    fn get_mapping(&self, space: AddressSpaceId, vaddr: usize) -> Option<FrameHandle> {
        self.present(space, vaddr)
            .map(|entry| FrameHandle::new(entry.frame_number() as usize))
    }

    fn set_mapping(
        &mut self,
        space: AddressSpaceId,
        vaddr: usize,
        frame: FrameHandle,
        writable: bool,
    ) {
        let frame_number = u32::try_from(frame.index()).unwrap_or(u32::MAX);
        self.entries.insert(
            Self::key(space, vaddr),
            PageTableEntry::user_mapping(frame_number, writable),
        );
    }

    fn clear_mapping(&mut self, space: AddressSpaceId, vaddr: usize) {
        self.update(space, vaddr, |entry| entry.with_present(false));
    }

    fn is_dirty(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.present(space, vaddr)
            .is_some_and(|entry| entry.dirty())
    }

    fn set_dirty(&mut self, space: AddressSpaceId, vaddr: usize, dirty: bool) {
        self.update(space, vaddr, |entry| entry.with_dirty(dirty));
    }

    fn is_accessed(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.present(space, vaddr)
            .is_some_and(|entry| entry.accessed())
    }

    fn set_accessed(&mut self, space: AddressSpaceId, vaddr: usize, accessed: bool) {
        self.update(space, vaddr, |entry| entry.with_accessed(accessed));
    }

    fn release_space(&mut self, space: AddressSpaceId) {
        self.entries.retain(|(owner, _), _| *owner != space);
    }
}
