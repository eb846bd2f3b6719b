//! NBT payloads carried inside sub-blocks.

use fastnbt::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chunk::BlockState;
use crate::error::{FormatError, FormatResult, SubBlock};

#[derive(Serialize, Deserialize)]
pub struct TileEntityList {
    pub tiles: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
pub struct EntityList {
    pub entities: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
pub struct PaletteTag {
    pub palette: Vec<BlockState>,
}

pub fn to_nbt<T: Serialize>(value: &T, block: SubBlock) -> FormatResult<Vec<u8>> {
    fastnbt::to_bytes(value)
        .map_err(|e| FormatError::invalid(format!("{block} cannot be written as NBT: {e}")))
}

pub fn from_nbt<T: DeserializeOwned>(bytes: &[u8], block: SubBlock) -> FormatResult<T> {
    fastnbt::from_bytes(bytes).map_err(|e| FormatError::corrupted(block, format!("invalid NBT: {e}")))
}
