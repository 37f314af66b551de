//! Moving pages between frames and swap.
//!
//! Every operation here runs with the VM lock held from the moment a frame is chosen until the
//! supplemental page table agrees with the hardware page table again. The slot allocator and the
//! swap device have their own locks, which are only ever taken while the VM lock is held.

use super::slot_allocator::SlotIndex;
use super::swap_error::{Result, SwapError};
use super::{SwapSpace, SwapStats};
use crate::mem::{
    AddressSpaceId, AddressSpaceTable, FrameAllocator, FrameHandle, FrameTableEntry,
    HardwarePageTable, PageState,
};
use crate::sync::mutex::{Mutex, MutexGuard};
use log::{debug, trace, warn};
use swapvm_shared::mem::{is_kernel_address, page_round_down};

/// The page containing `vaddr`, which must be in the user half.
fn user_page(vaddr: usize) -> Result<usize> {
    if is_kernel_address(vaddr) {
        return Err(SwapError::KernelAddress(vaddr));
    }
    Ok(page_round_down(vaddr))
}

/// Frame table, page tables and supplemental page tables: everything the VM lock protects.
pub struct VmState<F, P> {
    pub(crate) frames: F,
    pub(crate) page_table: P,
    pub(crate) spaces: AddressSpaceTable,
}

impl<F: FrameAllocator, P: HardwarePageTable> VmState<F, P> {
    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn page_table(&self) -> &P {
        &self.page_table
    }

    pub fn spaces(&self) -> &AddressSpaceTable {
        &self.spaces
    }

    /// A free frame, evicting one page if memory is full.
    fn obtain_frame(&mut self, swap: &SwapSpace) -> Result<FrameHandle> {
        if let Some(frame) = self.frames.acquire_frame() {
            return Ok(frame);
        }
        match self.swap_out(swap) {
            Ok(_) => {}
            Err(SwapError::NoVictim) => return Err(SwapError::OutOfMemory),
            Err(err) => return Err(err),
        }
        self.frames.acquire_frame().ok_or(SwapError::OutOfMemory)
    }

    fn swap_out(&mut self, swap: &SwapSpace) -> Result<FrameHandle> {
        let frame = self
            .frames
            .select_eviction_victim()
            .ok_or(SwapError::NoVictim)?;
        let FrameTableEntry {
            owner,
            vaddr,
            dirty: frame_dirty,
        } = *self
            .frames
            .entry(frame)
            .ok_or(SwapError::Inconsistent(frame.kernel_vaddr()))?;
        let entry = self
            .spaces
            .get_mut(owner)?
            .lookup_mut(vaddr)
            .ok_or(SwapError::UntrackedPage(vaddr))?;
        if entry.is_swapped() || self.page_table.get_mapping(owner, vaddr) != Some(frame) {
            return Err(SwapError::Inconsistent(vaddr));
        }

        // Reserve the slots first so running out of swap changes nothing.
        let slot = swap.slots().allocate_slot_run()?;

        let kernel_alias = frame.kernel_vaddr();
        let accessed = self.page_table.is_accessed(owner, vaddr);
        let owner_dirty = self.page_table.is_dirty(owner, vaddr);
        let dirty = frame_dirty
            || owner_dirty
            || self
                .page_table
                .is_dirty(AddressSpaceId::KERNEL, kernel_alias);

        // The owner must not touch the frame while it is being written out.
        self.page_table.clear_mapping(owner, vaddr);

        if let Err(err) = swap.io().write_page(slot, self.frames.frame(frame)) {
            warn!(
                "writing page {:#x} of space {} to swap slot {} failed: {}",
                vaddr, owner, slot, err
            );
            self.page_table
                .set_mapping(owner, vaddr, frame, entry.writable());
            self.page_table.set_accessed(owner, vaddr, accessed);
            self.page_table.set_dirty(owner, vaddr, owner_dirty);
            swap.slots().free_slot_run(slot)?;
            return Err(err.into());
        }

        if let Some(frame_entry) = self.frames.entry_mut(frame) {
            frame_entry.dirty = false;
        }
        self.page_table.set_dirty(owner, vaddr, false);
        self.page_table
            .set_dirty(AddressSpaceId::KERNEL, kernel_alias, false);
        self.frames.release_frame(frame);

        entry.set_accessed(accessed);
        entry.mark_swapped(slot);
        debug!(
            "swapped out {} page {:#x} of space {} from frame {} to slot {}",
            if dirty { "dirty" } else { "clean" },
            vaddr,
            owner,
            frame.index(),
            slot
        );
        Ok(frame)
    }

    fn swap_in(
        &mut self,
        swap: &SwapSpace,
        space: AddressSpaceId,
        vaddr: usize,
    ) -> Result<FrameHandle> {
        let page = page_round_down(vaddr);
        let slot = self
            .spaces
            .get(space)?
            .lookup(page)
            .ok_or(SwapError::UntrackedPage(page))?
            .slot()
            .ok_or(SwapError::NotSwapped(page))?;
        if self.page_table.get_mapping(space, page).is_some() {
            return Err(SwapError::AlreadyMapped(page));
        }

        let frame = self.obtain_frame(swap)?;
        if let Err(err) = self.fill_from_swap(swap, space, page, slot, frame) {
            self.frames.release_frame(frame);
            return Err(err);
        }
        debug!(
            "swapped in page {:#x} of space {} from slot {} to frame {}",
            page,
            space,
            slot,
            frame.index()
        );
        Ok(frame)
    }

    /// Read `page` back from `slot` into `frame` and make it resident. On error the entry still
    /// points at its slot and the caller keeps `frame`.
    fn fill_from_swap(
        &mut self,
        swap: &SwapSpace,
        space: AddressSpaceId,
        page: usize,
        slot: SlotIndex,
        frame: FrameHandle,
    ) -> Result<()> {
        let entry = self
            .spaces
            .get_mut(space)?
            .lookup_mut(page)
            .ok_or(SwapError::UntrackedPage(page))?;
        swap.io().read_page(slot, self.frames.frame_mut(frame))?;
        // The slot run is only given up once its contents are safely in the frame.
        swap.slots().free_slot_run(slot)?;

        entry.mark_resident();
        self.page_table
            .set_mapping(space, page, frame, entry.writable());
        self.frames
            .set_entry(frame, Some(FrameTableEntry::new(space, page)));
        Ok(())
    }

    /// Back a tracked page that has never been swapped with a zeroed frame.
    fn install_zeroed(
        &mut self,
        swap: &SwapSpace,
        space: AddressSpaceId,
        page: usize,
    ) -> Result<FrameHandle> {
        let writable = self
            .spaces
            .get(space)?
            .lookup(page)
            .ok_or(SwapError::UntrackedPage(page))?
            .writable();
        let frame = self.obtain_frame(swap)?;
        self.frames.frame_mut(frame).fill(0);
        self.page_table.set_mapping(space, page, frame, writable);
        self.frames
            .set_entry(frame, Some(FrameTableEntry::new(space, page)));
        trace!(
            "zero-filled frame {} for page {:#x} of space {}",
            frame.index(),
            page,
            space
        );
        Ok(frame)
    }

    fn resolve_fault(
        &mut self,
        swap: &SwapSpace,
        space: AddressSpaceId,
        vaddr: usize,
    ) -> Result<FrameHandle> {
        let page = user_page(vaddr)?;
        let spt = self.spaces.get_mut(space)?;
        let (state, first_reference) = match spt.lookup(page) {
            Some(entry) => (entry.state(), false),
            None => {
                trace!("first reference to page {:#x} of space {}", page, space);
                (spt.allocate(page)?.state(), true)
            }
        };
        match state {
            PageState::Swapped(_) => self.swap_in(swap, space, page),
            PageState::Resident => match self.page_table.get_mapping(space, page) {
                Some(frame) => Ok(frame),
                None => {
                    let installed = self.install_zeroed(swap, space, page);
                    if installed.is_err() && first_reference {
                        // Leave the page untracked so it can still be set up by `allocate_page`.
                        if let Ok(spt) = self.spaces.get_mut(space) {
                            spt.remove(page);
                        }
                    }
                    installed
                }
            },
        }
    }
}

/// Owns the VM lock and the swap space, and runs every page movement between them.
pub struct EvictionCoordinator<F, P> {
    vm: Mutex<VmState<F, P>>,
    swap: SwapSpace,
}

impl<F: FrameAllocator, P: HardwarePageTable> EvictionCoordinator<F, P> {
    pub fn new(frames: F, page_table: P, swap: SwapSpace) -> Self {
        Self {
            vm: Mutex::new(VmState {
                frames,
                page_table,
                spaces: AddressSpaceTable::new(),
            }),
            swap,
        }
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    /// Lock the VM state for inspection. Any other operation on this coordinator blocks until the
    /// guard is dropped.
    pub fn state(&self) -> MutexGuard<'_, VmState<F, P>> {
        self.vm.lock()
    }

    pub fn swap_stats(&self) -> SwapStats {
        self.swap.stats()
    }

    pub fn create_address_space(&self, space: AddressSpaceId) -> Result<()> {
        self.vm.lock().spaces.create(space)?;
        debug!("created address space {}", space);
        Ok(())
    }

    /// Drop every page of `space`: swapped pages give back their slots, resident pages are unmapped
    /// and their frames released.
    ///
    /// Teardown runs to completion even if some slot cannot be freed; the first such error is
    /// returned.
    pub fn destroy_address_space(&self, space: AddressSpaceId) -> Result<()> {
        let mut guard = self.vm.lock();
        let vm = &mut *guard;
        let spt = vm
            .spaces
            .remove(space)
            .ok_or(SwapError::NoAddressSpace(space))?;

        let mut first_error = None;
        let (mut freed_slots, mut freed_frames) = (0, 0);
        for entry in spt.into_entries() {
            match entry.state() {
                PageState::Swapped(slot) => match self.swap.slots().free_slot_run(slot) {
                    Ok(()) => freed_slots += 1,
                    Err(err) => {
                        warn!("tearing down space {}: {}", space, err);
                        first_error.get_or_insert(err);
                    }
                },
                PageState::Resident => {
                    if let Some(frame) = vm.page_table.get_mapping(space, entry.vaddr()) {
                        vm.page_table.clear_mapping(space, entry.vaddr());
                        vm.page_table
                            .set_dirty(AddressSpaceId::KERNEL, frame.kernel_vaddr(), false);
                        vm.frames.release_frame(frame);
                        freed_frames += 1;
                    }
                }
            }
        }
        vm.page_table.release_space(space);
        debug!(
            "destroyed address space {}: {} frames and {} slot runs released",
            space, freed_frames, freed_slots
        );

        first_error.map_or(Ok(()), Err)
    }

    /// Track the page containing `vaddr`. No frame backs it until it is first touched.
    pub fn allocate_page(&self, space: AddressSpaceId, vaddr: usize, writable: bool) -> Result<()> {
        let page = user_page(vaddr)?;
        self.vm
            .lock()
            .spaces
            .get_mut(space)?
            .allocate(page)?
            .set_writable(writable);
        Ok(())
    }

    pub fn page_state(&self, space: AddressSpaceId, vaddr: usize) -> Result<PageState> {
        let page = page_round_down(vaddr);
        self.vm
            .lock()
            .spaces
            .get(space)?
            .lookup(page)
            .map(|entry| entry.state())
            .ok_or(SwapError::UntrackedPage(page))
    }

    /// Make the page containing `vaddr` resident and return its frame.
    ///
    /// A page seen for the first time is tracked and zero-filled, a swapped page is read back, and
    /// a resident page is left where it is.
    ///
    /// # Errors
    ///
    /// - [`SwapError::KernelAddress`] if `vaddr` is not a user address.
    /// - [`SwapError::OutOfMemory`] if no frame is free and none can be evicted. A page seen for
    ///   the first time is not tracked afterwards.
    /// - [`SwapError::SwapExhausted`] and [`SwapError::Io`] from the eviction made to free a frame
    ///   are passed through as they are, without a second attempt.
    /// - [`SwapError::Io`] from reading a swapped page back leaves it on swap.
    pub fn handle_fault(&self, space: AddressSpaceId, vaddr: usize) -> Result<FrameHandle> {
        self.vm.lock().resolve_fault(&self.swap, space, vaddr)
    }

    /// Bring a swapped page back into memory.
    ///
    /// # Errors
    ///
    /// - [`SwapError::NotSwapped`] if the page is not on swap.
    /// - [`SwapError::AlreadyMapped`] if the page is on swap but still has a translation.
    /// - [`SwapError::OutOfMemory`] if no frame is free and none can be evicted.
    /// - [`SwapError::Io`] if the read fails. The page stays on swap.
    pub fn swap_in(&self, space: AddressSpaceId, vaddr: usize) -> Result<FrameHandle> {
        self.vm.lock().swap_in(&self.swap, space, vaddr)
    }

    /// Evict one page chosen by the frame allocator and return the frame it occupied, which is now
    /// free.
    ///
    /// # Errors
    ///
    /// - [`SwapError::NoVictim`] if no frame may be evicted.
    /// - [`SwapError::SwapExhausted`] if there is no room on swap, or [`SwapError::Io`] if the write
    ///   fails. The page stays resident and mapped in both cases.
    pub fn swap_out(&self) -> Result<FrameHandle> {
        self.vm.lock().swap_out(&self.swap)
    }

    /// Run `f` over the page containing `vaddr` as the owning process would see it, faulting the
    /// page in first. The accessed bit is set, and the dirty bit too when `write` is true.
    pub fn access_page<R>(
        &self,
        space: AddressSpaceId,
        vaddr: usize,
        write: bool,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let page = user_page(vaddr)?;
        let mut guard = self.vm.lock();
        let vm = &mut *guard;
        if write
            && vm
                .spaces
                .get(space)?
                .lookup(page)
                .is_some_and(|entry| !entry.writable())
        {
            return Err(SwapError::WriteProtected(page));
        }

        let frame = vm.resolve_fault(&self.swap, space, page)?;
        vm.page_table.set_accessed(space, page, true);
        if write {
            vm.page_table.set_dirty(space, page, true);
        }
        vm.frames.note_access(frame);
        Ok(f(vm.frames.frame_mut(frame)))
    }
}
