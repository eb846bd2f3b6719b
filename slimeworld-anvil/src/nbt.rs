//! NBT (Named Binary Tag) structures read from anvil worlds.
//!
//! Only the fields the importer needs are declared; fastnbt skips the rest.

use fastnbt::{ByteArray, LongArray, Value};
use serde::{Deserialize, Serialize};
use slimeworld_format::BlockState;

/// Main chunk structure - the root of NBT hierarchy in .mca files.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkData {
    #[serde(rename = "DataVersion", default)]
    pub data_version: i32,

    // Chunk coordinates (absolute, not relative to region)
    #[serde(rename = "xPos")]
    pub x_pos: i32,
    #[serde(rename = "zPos")]
    pub z_pos: i32,

    // "minecraft:full" tells the server the chunk is fully generated.
    #[serde(rename = "Status", default)]
    pub status: Option<String>,

    // Vertical slices of the chunk (16 blocks high each)
    #[serde(default)]
    pub sections: Vec<Section>,

    #[serde(default)]
    pub block_entities: Vec<Value>,

    // Worlds older than the split entity storage keep entities inline.
    #[serde(rename = "Entities", default)]
    pub entities: Vec<Value>,
}

// --- Section (16x16x16 Cube) ---
#[derive(Debug, Serialize, Deserialize)]
pub struct Section {
    // Vertical index of this section (e.g., -4 for the bottom, up to 19)
    #[serde(rename = "Y")]
    pub y: i8,

    #[serde(rename = "block_states", alias = "BlockStates", default)]
    pub block_states: Option<BlockStates>,

    #[serde(rename = "biomes", alias = "Biomes", default)]
    pub biomes: Option<Biomes>,

    #[serde(rename = "BlockLight", default)]
    pub block_light: Option<ByteArray>,

    #[serde(rename = "SkyLight", default)]
    pub sky_light: Option<ByteArray>,
}

// --- Block Palette ---
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStates {
    pub palette: Vec<BlockState>,
    // Indices into the palette. Required if palette length > 1.
    #[serde(default)]
    pub data: Option<LongArray>,
}

// --- Biome Palette ---
#[derive(Debug, Serialize, Deserialize)]
pub struct Biomes {
    pub palette: Vec<String>,
    #[serde(default)]
    pub data: Option<LongArray>,
}

/// Root of an `entities/r.X.Z.mca` chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntityChunk {
    #[serde(rename = "Position", default)]
    pub position: Option<fastnbt::IntArray>,
    #[serde(rename = "Entities", default)]
    pub entities: Vec<Value>,
}

/// `level.dat`, gzip compressed.
#[derive(Debug, Serialize, Deserialize)]
pub struct LevelDat {
    #[serde(rename = "Data")]
    pub data: LevelData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LevelData {
    #[serde(rename = "LevelName", default)]
    pub level_name: Option<String>,
    #[serde(rename = "SpawnX", default)]
    pub spawn_x: Option<i32>,
    #[serde(rename = "SpawnY", default)]
    pub spawn_y: Option<i32>,
    #[serde(rename = "SpawnZ", default)]
    pub spawn_z: Option<i32>,
    #[serde(rename = "Difficulty", default)]
    pub difficulty: Option<i8>,
}

/// Converts a light array to unsigned bytes.
pub fn light_bytes(array: &ByteArray) -> Vec<u8> {
    array.iter().map(|b| *b as u8).collect()
}
