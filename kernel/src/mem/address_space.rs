use super::spt::SupplementalPageTable;
use crate::swapping::swap_error::{Result, SwapError};
use alloc::collections::BTreeMap;
use core::fmt;

/// Identifies an address space. User processes have one each; they share the pid numbering.
///
/// Page metadata refers to its address space through this id rather than a pointer, so tearing a
/// process down cannot leave dangling owners behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(pub u16);

impl AddressSpaceId {
    /// The kernel's own mappings, including the alias every frame has above `OFFSET`.
    pub const KERNEL: Self = Self(0);
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The supplemental page tables of every live address space.
#[derive(Debug, Default)]
pub struct AddressSpaceTable {
    table: BTreeMap<AddressSpaceId, SupplementalPageTable>,
}

impl AddressSpaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the (empty) supplemental page table for a new address space.
    pub fn create(&mut self, space: AddressSpaceId) -> Result<&mut SupplementalPageTable> {
        if space == AddressSpaceId::KERNEL || self.table.contains_key(&space) {
            return Err(SwapError::AddressSpaceExists(space));
        }
        Ok(self
            .table
            .entry(space)
            .or_insert_with(|| SupplementalPageTable::new(space)))
    }

    pub fn remove(&mut self, space: AddressSpaceId) -> Option<SupplementalPageTable> {
        self.table.remove(&space)
    }

    pub fn get(&self, space: AddressSpaceId) -> Result<&SupplementalPageTable> {
        self.table
            .get(&space)
            .ok_or(SwapError::NoAddressSpace(space))
    }

    pub fn get_mut(&mut self, space: AddressSpaceId) -> Result<&mut SupplementalPageTable> {
        self.table
            .get_mut(&space)
            .ok_or(SwapError::NoAddressSpace(space))
    }

    pub fn contains(&self, space: AddressSpaceId) -> bool {
        self.table.contains_key(&space)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
