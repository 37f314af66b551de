pub const KB: usize = 1024;

/// Size of one disk sector, and of one swap slot.
pub const SECTOR_SIZE: u32 = 512;
/// Capacity of the RAM-backed swap device used when no swap partition is present, in sectors.
pub const SWAP_SECTORS: u32 = 8 * 1024;
