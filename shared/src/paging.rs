// https://wiki.osdev.org/Paging

use arbitrary_int::u20;
use bitbybit::bitfield;

/// Largest frame number a page table entry can address.
pub const MAX_FRAME_NUMBER: u32 = (1 << 20) - 1;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user-accessible entry pointing at `frame_number`, with the accessed and dirty bits
    /// clear.
    ///
    /// # Panics
    ///
    /// Panics if `frame_number` does not fit in 20 bits.
    pub fn user_mapping(frame_number: u32, writable: bool) -> Self {
        assert!(
            frame_number <= MAX_FRAME_NUMBER,
            "frame number {frame_number:#x} does not fit in a page table entry"
        );
        Self::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(true)
            .with_page_frame_address(u20::new(frame_number))
    }

    pub fn frame_number(&self) -> u32 {
        self.page_frame_address().value()
    }
}
