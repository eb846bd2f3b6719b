//! In-memory chunk representation.

use std::collections::{BTreeMap, HashMap};

use fastnbt::{IntArray, Value};
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};
use crate::nibble::{NibbleArray, SECTION_VOLUME};
use crate::version;

/// Number of vertical section slots in a chunk.
pub const SECTION_COUNT: usize = 16;

/// An NBT compound.
pub type Compound = HashMap<String, Value>;

/// Key of the int array inside a legacy height-map compound.
pub const HEIGHT_MAP_KEY: &str = "heightMap";

/// Index of a block inside a section: Y lines of Z rows of X.
#[inline]
pub fn block_index(x: usize, y: usize, z: usize) -> usize {
    (y * 16 + z) * 16 + x
}

// --- Single Block ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn air() -> Self {
        Self::new("minecraft:air")
    }
}

/// Per-block state storage; which variant is valid depends on the world version.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStorage {
    /// One byte per block, 4-bit metadata, optional high nibble of the id.
    Flat {
        blocks: Vec<u8>,
        data: NibbleArray,
        extended: Option<NibbleArray>,
    },
    /// Local palette plus one palette index per block.
    Paletted {
        palette: Vec<BlockState>,
        states: Vec<u16>,
    },
}

impl BlockStorage {
    pub fn empty_flat() -> Self {
        BlockStorage::Flat {
            blocks: vec![0u8; SECTION_VOLUME],
            data: NibbleArray::new(),
            extended: None,
        }
    }

    pub fn empty_paletted() -> Self {
        BlockStorage::Paletted {
            palette: vec![BlockState::air()],
            states: vec![0u16; SECTION_VOLUME],
        }
    }

    pub fn empty_for(version: u8) -> Self {
        if version::is_paletted(version) {
            Self::empty_paletted()
        } else {
            Self::empty_flat()
        }
    }

    /// Full 12-bit legacy block id at `index`. Only meaningful for flat storage.
    pub fn legacy_id(&self, index: usize) -> Option<u16> {
        match self {
            BlockStorage::Flat { blocks, extended, .. } => {
                let high = extended.as_ref().map_or(0, |e| e.get(index)) as u16;
                Some((high << 8) | blocks[index] as u16)
            }
            BlockStorage::Paletted { .. } => None,
        }
    }

    /// Whether the block at `index` is anything other than air.
    pub fn is_solid(&self, index: usize) -> bool {
        match self {
            BlockStorage::Flat { .. } => self.legacy_id(index).unwrap_or(0) != 0,
            BlockStorage::Paletted { palette, states } => palette
                .get(states[index] as usize)
                .is_some_and(|state| !is_air(&state.name)),
        }
    }

    fn validate(&self, version: u8) -> FormatResult<()> {
        match self {
            BlockStorage::Flat { blocks, extended, .. } => {
                if version::is_paletted(version) {
                    return Err(FormatError::invalid(format!(
                        "flat section in a version {version} world"
                    )));
                }
                if blocks.len() != SECTION_VOLUME {
                    return Err(FormatError::invalid(format!(
                        "block array must hold {SECTION_VOLUME} entries, got {}",
                        blocks.len()
                    )));
                }
                if extended.is_some() && version < version::EXTENDED_IDS_VERSION {
                    return Err(FormatError::invalid(format!(
                        "extended block ids are not representable in version {version}"
                    )));
                }
            }
            BlockStorage::Paletted { palette, states } => {
                if !version::is_paletted(version) {
                    return Err(FormatError::invalid(format!(
                        "paletted section in a version {version} world"
                    )));
                }
                if palette.is_empty() || palette.len() > SECTION_VOLUME {
                    return Err(FormatError::invalid(format!(
                        "palette size {} out of range",
                        palette.len()
                    )));
                }
                if states.len() != SECTION_VOLUME {
                    return Err(FormatError::invalid(format!(
                        "state array must hold {SECTION_VOLUME} entries, got {}",
                        states.len()
                    )));
                }
                if let Some(bad) = states.iter().find(|s| **s as usize >= palette.len()) {
                    return Err(FormatError::invalid(format!(
                        "palette index {bad} out of range for palette of {}",
                        palette.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn is_air(name: &str) -> bool {
    matches!(name, "minecraft:air" | "minecraft:cave_air" | "minecraft:void_air")
}

// --- Section (16x16x16 Cube) ---
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub blocks: BlockStorage,
    pub block_light: NibbleArray,
    pub sky_light: Option<NibbleArray>,
}

impl Section {
    /// An all-air section with full sky light, laid out for `version`.
    pub fn empty(version: u8) -> Self {
        let mut sky_light = NibbleArray::new();
        sky_light.fill(15);
        Self {
            blocks: BlockStorage::empty_for(version),
            block_light: NibbleArray::new(),
            sky_light: Some(sky_light),
        }
    }

    pub fn validate(&self, version: u8) -> FormatResult<()> {
        self.blocks.validate(version)
    }
}

/// A 16-block wide column of sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub x: i32,
    pub z: i32,
    pub sections: [Option<Section>; SECTION_COUNT],
    /// Legacy height-map compound; present only below the wide-biome version.
    pub height_maps: Option<Compound>,
    pub biomes: Vec<u32>,
    pub tile_entities: Vec<Value>,
    pub entities: Vec<Value>,
}

impl Chunk {
    /// The smallest valid chunk: an empty section 0 and zeroed biomes.
    pub fn new(x: i32, z: i32, version: u8) -> Self {
        let mut sections: [Option<Section>; SECTION_COUNT] = Default::default();
        sections[0] = Some(Section::empty(version));

        let height_maps = version::has_height_maps(version).then(|| {
            let mut compound = Compound::new();
            compound.insert(
                HEIGHT_MAP_KEY.to_string(),
                Value::IntArray(IntArray::new(vec![0; 256])),
            );
            compound
        });

        Self {
            x,
            z,
            sections,
            height_maps,
            biomes: vec![0; version::biome_count(version)],
            tile_entities: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn populated_sections(&self) -> usize {
        self.sections.iter().filter(|s| s.is_some()).count()
    }

    /// Height of the highest non-air block per column plus one, indexed `z * 16 + x`.
    pub fn compute_height_map(&self) -> Vec<i32> {
        let mut heights = vec![0i32; 256];
        for (slot, section) in self.sections.iter().enumerate().rev() {
            let Some(section) = section else { continue };
            for z in 0..16 {
                for x in 0..16 {
                    let column = z * 16 + x;
                    if heights[column] != 0 {
                        continue;
                    }
                    if let Some(y) = (0..16).rev().find(|&y| section.blocks.is_solid(block_index(x, y, z))) {
                        heights[column] = (slot * 16 + y + 1) as i32;
                    }
                }
            }
        }
        heights
    }

    /// Checks every invariant the codec relies on for `version`.
    pub fn validate(&self, version: u8) -> FormatResult<()> {
        let at = |e: FormatError| match e {
            FormatError::InvalidWorld(reason) => {
                FormatError::InvalidWorld(format!("chunk ({}, {}): {reason}", self.x, self.z))
            }
            other => other,
        };

        if self.sections[0].is_none() {
            return Err(at(FormatError::invalid("section 0 must be populated")));
        }
        for section in self.sections.iter().flatten() {
            section.validate(version).map_err(at)?;
        }

        let expected = version::biome_count(version);
        if self.biomes.len() != expected {
            return Err(at(FormatError::invalid(format!(
                "expected {expected} biomes, got {}",
                self.biomes.len()
            ))));
        }
        if version::has_height_maps(version) != self.height_maps.is_some() {
            return Err(at(FormatError::invalid(format!(
                "height map presence does not match version {version}"
            ))));
        }
        if version < version::ENTITIES_VERSION && !self.entities.is_empty() {
            return Err(at(FormatError::invalid(format!(
                "entities are not stored in version {version}"
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk_is_valid_for_every_version() {
        for v in version::FIRST_VERSION..=version::LATEST_VERSION {
            let chunk = Chunk::new(0, 0, v);
            chunk.validate(v).unwrap();
            assert_eq!(chunk.populated_sections(), 1);
        }
    }

    #[test]
    fn test_missing_section_zero_rejected() {
        let mut chunk = Chunk::new(4, 5, 3);
        chunk.sections[0] = None;
        chunk.sections[3] = Some(Section::empty(3));
        let err = chunk.validate(3).unwrap_err();
        assert!(err.to_string().contains("chunk (4, 5)"));
    }

    #[test]
    fn test_wrong_storage_for_version() {
        let chunk = Chunk::new(0, 0, 4);
        assert!(chunk.validate(5).is_err());
    }

    #[test]
    fn test_palette_index_out_of_range() {
        let mut chunk = Chunk::new(0, 0, 5);
        if let Some(section) = chunk.sections[0].as_mut() {
            section.blocks = BlockStorage::Paletted {
                palette: vec![BlockState::air()],
                states: {
                    let mut states = vec![0u16; SECTION_VOLUME];
                    states[10] = 1;
                    states
                },
            };
        }
        assert!(chunk.validate(5).is_err());
    }

    #[test]
    fn test_height_map_finds_topmost_block() {
        let mut chunk = Chunk::new(0, 0, 3);
        let mut section = Section::empty(3);
        if let BlockStorage::Flat { blocks, .. } = &mut section.blocks {
            blocks[block_index(2, 5, 3)] = 1;
        }
        chunk.sections[2] = Some(section);
        if let Some(BlockStorage::Flat { blocks, .. }) = chunk.sections[0].as_mut().map(|s| &mut s.blocks) {
            blocks[block_index(0, 0, 0)] = 7;
        }

        let heights = chunk.compute_height_map();
        assert_eq!(heights[3 * 16 + 2], 2 * 16 + 5 + 1);
        assert_eq!(heights[0], 1);
        assert_eq!(heights[1], 0);
    }

    #[test]
    fn test_extended_ids() {
        let mut storage = BlockStorage::empty_flat();
        if let BlockStorage::Flat { blocks, extended, .. } = &mut storage {
            blocks[0] = 0x34;
            let mut high = NibbleArray::new();
            high.set(0, 0x2);
            *extended = Some(high);
        }
        assert_eq!(storage.legacy_id(0), Some(0x234));
        assert!(storage.is_solid(0));
        assert!(!storage.is_solid(1));
    }
}
