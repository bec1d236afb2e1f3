use std::io::{Read, Seek, SeekFrom};

use super::error::PcapSourceError;
use super::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Legacy,
    PcapNg,
}

/// Peek at the first four bytes, leaving the reader at offset 0.
///
/// # Errors
/// `PcapSourceError::Io` for files shorter than a magic number.
pub fn read_magic_and_rewind<R: Read + Seek>(reader: &mut R) -> Result<[u8; 4], PcapSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

/// Classify a file by its magic bytes.
pub fn capture_format(magic: &[u8; 4]) -> Result<CaptureFormat, PcapSourceError> {
    if magic == &layout::PCAPNG_MAGIC {
        return Ok(CaptureFormat::PcapNg);
    }
    if layout::LEGACY_MAGICS.contains(magic) {
        return Ok(CaptureFormat::Legacy);
    }
    Err(PcapSourceError::NotACapture { magic: *magic })
}

/// Seconds per unit of a legacy record's fractional timestamp field.
pub fn legacy_fraction_unit(nanosecond: bool) -> f64 {
    if nanosecond {
        layout::NANOS
    } else {
        layout::MICROS
    }
}

/// Seconds per tick for a PCAPNG `if_tsresol` value: a power of ten when
/// the high bit is clear, a power of two when it is set.
pub fn tsresol_unit(tsresol: u8) -> f64 {
    let exponent = i32::from(tsresol & 0x7f);
    if tsresol & 0x80 == 0 {
        10f64.powi(-exponent)
    } else {
        2f64.powi(-exponent)
    }
}

/// Timestamp of an enhanced packet block, in seconds since the epoch.
pub fn pcapng_ticks_to_seconds(ts_high: u32, ts_low: u32, unit: f64, offset: i64) -> f64 {
    let ticks = (u64::from(ts_high) << 32) | u64::from(ts_low);
    offset as f64 + ticks as f64 * unit
}
