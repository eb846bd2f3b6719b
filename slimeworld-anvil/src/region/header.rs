//! Region file header.
//!
//! The header consists of two tables:
//! - Location table: where each chunk is stored
//! - Timestamp table: when each chunk was last saved

use super::{CHUNKS_PER_REGION, HEADER_BYTES, SECTOR_BYTES};

/// Where one chunk lives inside the region file, in 4 KiB sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub sector_offset: u32,
    pub sector_count: u8,
}

impl Location {
    /// An entry pointing into the header itself means "not generated".
    pub fn is_present(&self) -> bool {
        self.sector_offset >= 2 && self.sector_count > 0
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.sector_offset as usize * SECTOR_BYTES
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.sector_count as usize * SECTOR_BYTES
    }
}

/// MCA file header codec.
pub struct Header;

impl Header {
    /// Reads the 1024 location entries. `data` must hold the full header.
    pub fn parse(data: &[u8]) -> Option<Vec<Location>> {
        if data.len() < HEADER_BYTES {
            return None;
        }
        // Each entry: 3 bytes offset + 1 byte sector count
        let locations = data[..CHUNKS_PER_REGION * 4]
            .chunks_exact(4)
            .map(|entry| Location {
                sector_offset: u32::from_be_bytes([0, entry[0], entry[1], entry[2]]),
                sector_count: entry[3],
            })
            .collect();
        Some(locations)
    }

    /// Builds the 8 KiB header for the given locations, indexed like
    /// [`super::chunk_index`]. Timestamps are left at zero.
    pub fn generate(locations: &[Option<Location>]) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_BYTES];
        for (i, location) in locations.iter().enumerate().take(CHUNKS_PER_REGION) {
            let Some(location) = location else { continue };
            let entry_offset = i * 4;
            let offset = location.sector_offset;
            header[entry_offset] = ((offset >> 16) & 0xFF) as u8;
            header[entry_offset + 1] = ((offset >> 8) & 0xFF) as u8;
            header[entry_offset + 2] = (offset & 0xFF) as u8;
            header[entry_offset + 3] = location.sector_count;
        }
        header
    }
}
