//! Big-endian scalar, varint and length-prefixed helpers.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FormatError, FormatResult, SubBlock};

/// Growable output buffer.
#[derive(Default)]
pub struct SlimeWriter {
    buf: BytesMut,
}

impl SlimeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_varint(&mut self, mut value: u32) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes `bytes` preceded by their varint length.
    pub fn write_prefixed(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Bounds-checked reader over a byte slice.
///
/// Every read that would run past the end reports a corruption of the
/// sub-block the reader was created for, instead of panicking.
pub struct SlimeReader<'a> {
    buf: &'a [u8],
    block: SubBlock,
}

impl<'a> SlimeReader<'a> {
    pub fn new(buf: &'a [u8], block: SubBlock) -> Self {
        Self { buf, block }
    }

    pub fn block(&self) -> SubBlock {
        self.block
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, len: usize) -> FormatResult<()> {
        if self.buf.remaining() < len {
            return Err(FormatError::corrupted(
                self.block,
                format!("unexpected end of data: need {len} bytes, {} left", self.buf.remaining()),
            ));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> FormatResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> FormatResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> FormatResult<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u32(&mut self) -> FormatResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i64(&mut self) -> FormatResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_varint(&mut self) -> FormatResult<u32> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::corrupted(self.block, "varint is too long"))
    }

    pub fn read_bytes(&mut self, len: usize) -> FormatResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a varint length followed by that many bytes.
    pub fn read_prefixed(&mut self) -> FormatResult<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.read_bytes(len)
    }

    /// Fails if anything is left unread.
    pub fn finish(self) -> FormatResult<()> {
        if self.buf.has_remaining() {
            return Err(FormatError::corrupted(
                self.block,
                format!("{} trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        let mut writer = SlimeWriter::new();
        for value in [0u32, 127, 128, 16_383, 16_384, u32::MAX] {
            writer.write_varint(value);
        }
        let bytes = writer.into_vec();
        let mut reader = SlimeReader::new(&bytes, SubBlock::Sections);
        for value in [0u32, 127, 128, 16_383, 16_384, u32::MAX] {
            assert_eq!(reader.read_varint().unwrap(), value);
        }
        reader.finish().unwrap();
    }

    #[test]
    fn test_short_read_is_corruption() {
        let bytes = [0u8, 1, 2];
        let mut reader = SlimeReader::new(&bytes, SubBlock::Heights);
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, FormatError::Corrupted { block: SubBlock::Heights, .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let bytes = [0u8, 1, 2];
        let mut reader = SlimeReader::new(&bytes, SubBlock::Header);
        reader.read_u16().unwrap();
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut writer = SlimeWriter::new();
        writer.write_u16(0xB10B);
        writer.write_i16(-2);
        assert_eq!(writer.into_vec(), vec![0xB1, 0x0B, 0xFF, 0xFE]);
    }
}
