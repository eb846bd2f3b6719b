use crate::error::{FormatError, FormatResult};

/// Number of entries in a section (16 x 16 x 16).
pub const SECTION_VOLUME: usize = 4096;

/// Size in bytes of a packed 4-bit array over a section.
pub const NIBBLE_BYTES: usize = SECTION_VOLUME / 2;

/// 4-bit-per-entry storage over 4096 entries, low nibble first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NibbleArray {
    data: Vec<u8>,
}

impl NibbleArray {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; NIBBLE_BYTES],
        }
    }

    /// Wraps raw packed bytes. Anything other than 2048 bytes is rejected.
    pub fn from_bytes(data: Vec<u8>) -> FormatResult<Self> {
        if data.len() != NIBBLE_BYTES {
            return Err(FormatError::invalid(format!(
                "nibble array must be {NIBBLE_BYTES} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    pub fn get(&self, index: usize) -> u8 {
        let byte = self.data[index >> 1];
        if index & 1 == 0 { byte & 0x0F } else { byte >> 4 }
    }

    pub fn set(&mut self, index: usize, value: u8) {
        let slot = &mut self.data[index >> 1];
        let value = value & 0x0F;
        if index & 1 == 0 {
            *slot = (*slot & 0xF0) | value;
        } else {
            *slot = (*slot & 0x0F) | (value << 4);
        }
    }

    pub fn fill(&mut self, value: u8) {
        let value = value & 0x0F;
        self.data.fill(value | (value << 4));
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_neighbours_independent() {
        let mut nibbles = NibbleArray::new();
        nibbles.set(0, 0xA);
        nibbles.set(1, 0x5);
        nibbles.set(4095, 0xF);
        assert_eq!(nibbles.get(0), 0xA);
        assert_eq!(nibbles.get(1), 0x5);
        assert_eq!(nibbles.get(2), 0);
        assert_eq!(nibbles.get(4095), 0xF);
        assert_eq!(nibbles.as_bytes()[0], 0x5A);
    }

    #[test]
    fn test_values_are_masked() {
        let mut nibbles = NibbleArray::new();
        nibbles.set(3, 0x1F);
        assert_eq!(nibbles.get(3), 0xF);
        assert_eq!(nibbles.get(2), 0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(NibbleArray::from_bytes(vec![0; 2047]).is_err());
        assert!(NibbleArray::from_bytes(vec![0; 4096]).is_err());
        assert!(NibbleArray::from_bytes(vec![0; NIBBLE_BYTES]).is_ok());
    }

    #[test]
    fn test_fill() {
        let mut nibbles = NibbleArray::new();
        assert!(nibbles.is_zero());
        nibbles.fill(15);
        assert!((0..SECTION_VOLUME).all(|i| nibbles.get(i) == 15));
    }
}
