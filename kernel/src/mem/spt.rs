//! Supplemental page table: what the kernel knows about a user page that the hardware page table
//! cannot express.

use super::address_space::AddressSpaceId;
use crate::swapping::slot_allocator::SlotIndex;
use crate::swapping::swap_error::{Result, SwapError};
use alloc::collections::BTreeMap;
use bitbybit::bitfield;
use core::fmt;
use swapvm_shared::mem::page_round_down;

/// Where the contents of a page currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// In a physical frame, or not yet backed by anything if the page was never touched.
    Resident,
    /// On the swap device, in the slot run starting at this index.
    Swapped(SlotIndex),
}

#[bitfield(u8, default = 0)]
pub struct PageFlags {
    #[bit(0, rw)]
    accessed: bool,
    #[bit(1, rw)]
    dirty: bool,
    #[bit(2, rw)]
    writable: bool,
}

pub struct SptEntry {
    vaddr: usize,
    owner: AddressSpaceId,
    state: PageState,
    flags: PageFlags,
}

impl SptEntry {
    fn new(vaddr: usize, owner: AddressSpaceId) -> Self {
        Self {
            vaddr,
            owner,
            state: PageState::Resident,
            flags: PageFlags::DEFAULT.with_writable(true),
        }
    }

    pub fn vaddr(&self) -> usize {
        self.vaddr
    }
    pub fn owner(&self) -> AddressSpaceId {
        self.owner
    }
    pub fn state(&self) -> PageState {
        self.state
    }
    pub fn is_swapped(&self) -> bool {
        matches!(self.state, PageState::Swapped(_))
    }
    pub fn slot(&self) -> Option<SlotIndex> {
        match self.state {
            PageState::Swapped(slot) => Some(slot),
            PageState::Resident => None,
        }
    }

    /// Shadow of the hardware accessed bit, as of the last time the page was unmapped.
    pub fn accessed(&self) -> bool {
        self.flags.accessed()
    }
    pub fn set_accessed(&mut self, accessed: bool) {
        self.flags = self.flags.with_accessed(accessed);
    }

    /// Shadow of the hardware dirty bit, as of the last time the page was unmapped.
    pub fn dirty(&self) -> bool {
        self.flags.dirty()
    }
    pub fn set_dirty(&mut self, dirty: bool) {
        self.flags = self.flags.with_dirty(dirty);
    }

    pub fn writable(&self) -> bool {
        self.flags.writable()
    }
    pub fn set_writable(&mut self, writable: bool) {
        self.flags = self.flags.with_writable(writable);
    }

    /// The page now lives in `slot`. Its contents match the slot, so the dirty shadow is cleared.
    pub fn mark_swapped(&mut self, slot: SlotIndex) {
        self.state = PageState::Swapped(slot);
        self.flags = self.flags.with_dirty(false);
    }

    /// The page is back in a frame. Returns the slot it was read from, if any.
    pub fn mark_resident(&mut self) -> Option<SlotIndex> {
        let slot = self.slot();
        self.state = PageState::Resident;
        self.flags = self.flags.with_dirty(false).with_accessed(true);
        slot
    }
}

impl fmt::Debug for SptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SptEntry")
            .field("vaddr", &format_args!("{:#x}", self.vaddr))
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("accessed", &self.accessed())
            .field("dirty", &self.dirty())
            .field("writable", &self.writable())
            .finish()
    }
}

/// Per-address-space map from page-aligned virtual address to [`SptEntry`].
#[derive(Debug)]
pub struct SupplementalPageTable {
    owner: AddressSpaceId,
    entries: BTreeMap<usize, SptEntry>,
}

impl SupplementalPageTable {
    pub fn new(owner: AddressSpaceId) -> Self {
        Self {
            owner,
            entries: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> AddressSpaceId {
        self.owner
    }

    /// The entry for the page containing `vaddr`.
    pub fn lookup(&self, vaddr: usize) -> Option<&SptEntry> {
        self.entries.get(&page_round_down(vaddr))
    }

    pub fn lookup_mut(&mut self, vaddr: usize) -> Option<&mut SptEntry> {
        self.entries.get_mut(&page_round_down(vaddr))
    }

    /// Start tracking the page containing `vaddr`. The new entry is resident and writable, with
    /// no frame behind it until the page is first touched.
    ///
    /// # Errors
    ///
    /// [`SwapError::DuplicateEntry`] if the page is already tracked; the existing entry is left
    /// alone.
    pub fn allocate(&mut self, vaddr: usize) -> Result<&mut SptEntry> {
        let page = page_round_down(vaddr);
        if self.entries.contains_key(&page) {
            return Err(SwapError::DuplicateEntry(page));
        }
        let owner = self.owner;
        Ok(self
            .entries
            .entry(page)
            .or_insert_with(|| SptEntry::new(page, owner)))
    }

    pub fn remove(&mut self, vaddr: usize) -> Option<SptEntry> {
        self.entries.remove(&page_round_down(vaddr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SptEntry> {
        self.entries.values()
    }

    /// Consume the table, yielding every entry in address order.
    pub fn into_entries(self) -> impl Iterator<Item = SptEntry> {
        self.entries.into_values()
    }
}
