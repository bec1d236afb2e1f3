/// Section header block type, which is also the first four bytes of a PCAPNG file.
pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Legacy pcap magic numbers as they appear on disk, in both byte orders,
/// for microsecond and nanosecond resolution.
pub const LEGACY_MAGICS: [[u8; 4]; 4] = [
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0x4d, 0x3c, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
];

pub const PCAP_READER_BUFFER_SIZE: usize = 64 * 1024;

pub const MICROS: f64 = 1e-6;
pub const NANOS: f64 = 1e-9;
