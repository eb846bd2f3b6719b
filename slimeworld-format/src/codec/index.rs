//! Chunk index: the bounding box of present chunks plus a presence bitset.

use std::collections::HashMap;

use crate::buffer::{SlimeReader, SlimeWriter};
use crate::chunk::Chunk;
use crate::error::{FormatError, FormatResult, SubBlock};

/// Area covered by the chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkBounds {
    pub min_x: i16,
    pub min_z: i16,
    pub width: u16,
    pub depth: u16,
}

impl ChunkBounds {
    /// Smallest box covering every chunk, or `WorldTooBig` if any coordinate
    /// does not fit the 16-bit index.
    pub fn covering<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> FormatResult<Self> {
        let mut extent: Option<(i32, i32, i32, i32)> = None;
        for chunk in chunks {
            check_addressable(chunk.x, chunk.z)?;
            extent = Some(match extent {
                None => (chunk.x, chunk.z, chunk.x, chunk.z),
                Some((min_x, min_z, max_x, max_z)) => (
                    min_x.min(chunk.x),
                    min_z.min(chunk.z),
                    max_x.max(chunk.x),
                    max_z.max(chunk.z),
                ),
            });
        }

        let Some((min_x, min_z, max_x, max_z)) = extent else {
            return Ok(Self::default());
        };

        // Both ends fit in i16, so the span is at most 65536.
        let width = max_x - min_x + 1;
        let depth = max_z - min_z + 1;
        if width > u16::MAX as i32 || depth > u16::MAX as i32 {
            return Err(FormatError::WorldTooBig { x: max_x, z: max_z });
        }

        Ok(Self {
            min_x: min_x as i16,
            min_z: min_z as i16,
            width: width as u16,
            depth: depth as u16,
        })
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.depth as usize
    }

    pub fn bitset_len(&self) -> usize {
        self.area().div_ceil(8)
    }

    pub fn index_of(&self, x: i32, z: i32) -> usize {
        (z - self.min_z as i32) as usize * self.width as usize + (x - self.min_x as i32) as usize
    }

    pub fn coords_of(&self, index: usize) -> (i32, i32) {
        let width = self.width as usize;
        (
            self.min_x as i32 + (index % width) as i32,
            self.min_z as i32 + (index / width) as i32,
        )
    }

    pub fn write(&self, writer: &mut SlimeWriter) {
        writer.write_i16(self.min_x);
        writer.write_i16(self.min_z);
        writer.write_u16(self.width);
        writer.write_u16(self.depth);
    }

    pub fn read(reader: &mut SlimeReader<'_>) -> FormatResult<Self> {
        Ok(Self {
            min_x: reader.read_i16()?,
            min_z: reader.read_i16()?,
            width: reader.read_u16()?,
            depth: reader.read_u16()?,
        })
    }
}

/// Rejects coordinates the chunk index cannot address.
pub fn check_addressable(x: i32, z: i32) -> FormatResult<()> {
    let range = i16::MIN as i32..=i16::MAX as i32;
    if !range.contains(&x) || !range.contains(&z) {
        return Err(FormatError::WorldTooBig { x, z });
    }
    Ok(())
}

/// Presence bitset in index order, bit `i` at byte `i / 8`, mask `1 << (i % 8)`.
pub fn build_bitset(bounds: &ChunkBounds, chunks: &HashMap<i64, Chunk>) -> Vec<u8> {
    let mut bits = vec![0u8; bounds.bitset_len()];
    for chunk in chunks.values() {
        let i = bounds.index_of(chunk.x, chunk.z);
        bits[i / 8] |= 1 << (i % 8);
    }
    bits
}

/// Coordinates of every set bit, in index order.
pub fn read_bitset(bounds: &ChunkBounds, bits: &[u8]) -> FormatResult<Vec<(i32, i32)>> {
    // Bits past the covered area must be clear, or the index is lying.
    let area = bounds.area();
    let mut present = Vec::new();
    for (byte_index, byte) in bits.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            let i = byte_index * 8 + bit;
            if i >= area {
                return Err(FormatError::corrupted(
                    SubBlock::ChunkIndex,
                    format!("bit {i} set outside a {}x{} index", bounds.width, bounds.depth),
                ));
            }
            present.push(bounds.coords_of(i));
        }
    }
    Ok(present)
}
