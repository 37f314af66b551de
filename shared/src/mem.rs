use crate::sizes::{KB, SECTOR_SIZE};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

/// Number of disk sectors backing one page frame.
pub const SECTORS_PER_PAGE: u32 = PAGE_FRAME_SIZE as u32 / SECTOR_SIZE;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}

/// Virtual page number of `addr`.
#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr / PAGE_FRAME_SIZE
}

#[inline]
pub const fn is_kernel_address(addr: usize) -> bool {
    addr >= OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_down(0), 0);
        assert_eq!(page_round_down(0x1fff), 0x1000);
        assert_eq!(page_round_down(0x2000), 0x2000);
        assert!(is_page_aligned(0x3000));
        assert!(!is_page_aligned(0x3001));
        assert_eq!(page_number(0x5123), 5);
    }

    #[test]
    fn test_sectors_per_page() {
        assert_eq!(SECTORS_PER_PAGE, 8);
        assert!(is_kernel_address(OFFSET));
        assert!(!is_kernel_address(OFFSET - 1));
    }
}
