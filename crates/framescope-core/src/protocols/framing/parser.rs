use crate::config::FramingRules;

use super::error::FramingError;
use super::layout;
use super::reader::FrameReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub type_code: u32,
    pub size: u32,
}

/// One complete frame. `payload.len() == size as usize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub type_code: u32,
    pub size: u32,
    pub payload: Vec<u8>,
}

impl ExtractedFrame {
    /// Header and payload packed back into wire form.
    ///
    /// ```
    /// use framescope_core::protocols::framing::ExtractedFrame;
    ///
    /// let frame = ExtractedFrame { type_code: 7, size: 2, payload: vec![0xaa, 0xbb] };
    /// assert_eq!(frame.encode(), [7, 0, 0, 0, 2, 0, 0, 0, 0xaa, 0xbb]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout::HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.type_code.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decode and validate a header at the start of `buf`.
///
/// Returns `Ok(None)` while the header is incomplete. The type code is
/// checked as soon as its four bytes are present, so a bad stream is
/// rejected without waiting for the length field.
pub fn parse_header(buf: &[u8], rules: &FramingRules) -> Result<Option<FrameHeader>, FramingError> {
    let reader = FrameReader::new(buf);
    if !reader.has(layout::TYPE_RANGE.end) {
        return Ok(None);
    }
    let type_code = reader.read_u32_le(layout::TYPE_RANGE)?;
    check_type(type_code, rules)?;

    if !reader.has(layout::HEADER_LEN) {
        return Ok(None);
    }
    let size = reader.read_u32_le(layout::SIZE_RANGE)?;
    check_size(size, rules)?;

    Ok(Some(FrameHeader { type_code, size }))
}

pub fn check_type(type_code: u32, rules: &FramingRules) -> Result<(), FramingError> {
    if type_code < rules.min_type || type_code > rules.max_type {
        return Err(FramingError::TypeOutOfRange {
            type_code,
            min: rules.min_type,
            max: rules.max_type,
        });
    }
    if rules.excluded_types.contains(&type_code) {
        return Err(FramingError::ExcludedType { type_code });
    }
    Ok(())
}

pub fn check_size(size: u32, rules: &FramingRules) -> Result<(), FramingError> {
    match rules.max_payload_len {
        Some(max) if size > max => Err(FramingError::PayloadTooLarge { size, max }),
        _ => Ok(()),
    }
}
