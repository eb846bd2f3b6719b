//! Format revisions and the layout features each one introduced.

/// Oldest revision still decodable.
pub const FIRST_VERSION: u8 = 1;

/// Entity lists are persisted per chunk.
pub const ENTITIES_VERSION: u8 = 2;

/// Flat sections may carry a secondary nibble array for block ids above 255.
pub const EXTENDED_IDS_VERSION: u8 = 3;

/// Height maps are no longer stored; biomes widen from 64 to 256 entries.
pub const WIDE_BIOMES_VERSION: u8 = 4;

/// Sections store a local palette plus packed indices.
pub const PALETTE_VERSION: u8 = 5;

/// Newest revision this codec writes and understands.
pub const LATEST_VERSION: u8 = PALETTE_VERSION;

/// 8 x 8 cells of 2 x 2 columns.
pub const NARROW_BIOMES: usize = 64;

/// One entry per 16 x 16 column.
pub const WIDE_BIOMES: usize = 256;

pub fn is_supported(version: u8) -> bool {
    (FIRST_VERSION..=LATEST_VERSION).contains(&version)
}

pub fn biome_count(version: u8) -> usize {
    if version >= WIDE_BIOMES_VERSION { WIDE_BIOMES } else { NARROW_BIOMES }
}

pub fn has_height_maps(version: u8) -> bool {
    version < WIDE_BIOMES_VERSION
}

pub fn is_paletted(version: u8) -> bool {
    version >= PALETTE_VERSION
}
