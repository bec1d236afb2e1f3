pub const TYPE_RANGE: std::ops::Range<usize> = 0..4;
pub const SIZE_RANGE: std::ops::Range<usize> = 4..8;

pub const HEADER_LEN: usize = 8;
