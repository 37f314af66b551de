//! Demand paging backing store: supplemental page tables, swap slot allocation and the eviction
//! protocol that moves user pages between physical frames and a swap block device.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod drivers;
pub mod mem;
pub mod swapping;
pub mod sync;
