use super::error::FramingError;

pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn has(&self, needed: usize) -> bool {
        self.buf.len() >= needed
    }

    pub fn read_u32_le(&self, range: std::ops::Range<usize>) -> Result<u32, FramingError> {
        let bytes = self.read_slice(range)?;
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| FramingError::TooShort {
            needed: 4,
            actual: bytes.len(),
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_slice(&self, range: std::ops::Range<usize>) -> Result<&'a [u8], FramingError> {
        self.buf
            .get(range.clone())
            .ok_or(FramingError::TooShort {
                needed: range.end,
                actual: self.buf.len(),
            })
    }
}
