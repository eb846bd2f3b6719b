//! Single-version conversions. Each step moves a world exactly one version
//! up or down and returns the reason when the data cannot be represented.

use std::collections::HashMap;

use fastnbt::{IntArray, Value};
use log::debug;
use slimeworld_format::chunk::HEIGHT_MAP_KEY;
use slimeworld_format::nibble::SECTION_VOLUME;
use slimeworld_format::version::{NARROW_BIOMES, WIDE_BIOMES};
use slimeworld_format::{BlockState, BlockStorage, Chunk, Compound, NibbleArray, World};

use crate::legacy;

type StepResult = Result<(), String>;

/// Moves `world` from `from` to `from + 1`.
pub fn upgrade(world: &mut World, from: u8) -> StepResult {
    match from {
        // Entity lists start being persisted; nothing to rewrite.
        1 => Ok(()),
        // Extended ids become representable; flat sections carry over as is.
        2 => Ok(()),
        3 => for_each_chunk(world, widen_biomes),
        4 => for_each_chunk(world, palette_sections),
        other => Err(format!("no upgrade step from version {other}")),
    }
}

/// Moves `world` from `from` to `from - 1`.
pub fn downgrade(world: &mut World, from: u8) -> StepResult {
    match from {
        2 => for_each_chunk(world, require_no_entities),
        3 => for_each_chunk(world, drop_extended_ids),
        4 => for_each_chunk(world, narrow_biomes),
        5 => for_each_chunk(world, flatten_sections),
        other => Err(format!("no downgrade step from version {other}")),
    }
}

fn for_each_chunk(world: &mut World, step: fn(&mut Chunk) -> StepResult) -> StepResult {
    for chunk in world.chunks.values_mut() {
        step(chunk).map_err(|reason| format!("chunk ({}, {}): {reason}", chunk.x, chunk.z))?;
    }
    Ok(())
}

fn require_no_entities(chunk: &mut Chunk) -> StepResult {
    if chunk.entities.is_empty() {
        Ok(())
    } else {
        Err(format!("{} entities cannot be stored", chunk.entities.len()))
    }
}

fn drop_extended_ids(chunk: &mut Chunk) -> StepResult {
    for (slot, section) in chunk.sections.iter_mut().enumerate() {
        let Some(section) = section else { continue };
        if let BlockStorage::Flat { extended, .. } = &mut section.blocks {
            if extended.as_ref().is_some_and(|e| !e.is_zero()) {
                return Err(format!("section {slot} uses block ids above 255"));
            }
            *extended = None;
        }
    }
    Ok(())
}

/// 64 biomes cover 8 x 8 cells of 2 x 2 columns.
fn narrow_index(x: usize, z: usize) -> usize {
    (z / 2) * 8 + x / 2
}

fn widen_biomes(chunk: &mut Chunk) -> StepResult {
    if chunk.biomes.len() != NARROW_BIOMES {
        return Err(format!("expected {NARROW_BIOMES} biomes, found {}", chunk.biomes.len()));
    }
    let mut wide = vec![0u32; WIDE_BIOMES];
    for z in 0..16 {
        for x in 0..16 {
            wide[z * 16 + x] = chunk.biomes[narrow_index(x, z)];
        }
    }
    chunk.biomes = wide;
    chunk.height_maps = None;
    Ok(())
}

fn narrow_biomes(chunk: &mut Chunk) -> StepResult {
    if chunk.biomes.len() != WIDE_BIOMES {
        return Err(format!("expected {WIDE_BIOMES} biomes, found {}", chunk.biomes.len()));
    }
    let mut narrow = vec![0u32; NARROW_BIOMES];
    for z in (0..16).step_by(2) {
        for x in (0..16).step_by(2) {
            narrow[narrow_index(x, z)] = chunk.biomes[z * 16 + x];
        }
    }
    chunk.biomes = narrow;

    let mut height_maps = Compound::new();
    height_maps.insert(
        HEIGHT_MAP_KEY.to_string(),
        Value::IntArray(IntArray::new(chunk.compute_height_map())),
    );
    chunk.height_maps = Some(height_maps);
    Ok(())
}

fn palette_sections(chunk: &mut Chunk) -> StepResult {
    for section in chunk.sections.iter_mut().flatten() {
        let BlockStorage::Flat { data, .. } = &section.blocks else {
            return Err("section is already paletted".to_string());
        };

        let mut palette: Vec<BlockState> = Vec::new();
        let mut lookup: HashMap<(u16, u8), u16> = HashMap::new();
        let mut states = Vec::with_capacity(SECTION_VOLUME);
        for index in 0..SECTION_VOLUME {
            let id = section.blocks.legacy_id(index).unwrap_or(0);
            let meta = data.get(index);
            let entry = *lookup.entry((id, meta)).or_insert_with(|| {
                palette.push(legacy::to_state(id, meta));
                (palette.len() - 1) as u16
            });
            states.push(entry);
        }
        section.blocks = BlockStorage::Paletted { palette, states };
    }
    Ok(())
}

fn flatten_sections(chunk: &mut Chunk) -> StepResult {
    for (slot, section) in chunk.sections.iter_mut().enumerate() {
        let Some(section) = section else { continue };
        let BlockStorage::Paletted { palette, states } = &section.blocks else {
            return Err(format!("section {slot} is already flat"));
        };

        let legacy = palette
            .iter()
            .map(legacy::from_state)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| format!("section {slot}: {reason}"))?;

        let mut blocks = vec![0u8; SECTION_VOLUME];
        let mut data = NibbleArray::new();
        let mut extended = NibbleArray::new();
        for (index, state) in states.iter().enumerate() {
            let (id, meta) = legacy[*state as usize];
            blocks[index] = (id & 0xFF) as u8;
            data.set(index, meta);
            extended.set(index, (id >> 8) as u8);
        }

        section.blocks = BlockStorage::Flat {
            blocks,
            data,
            extended: (!extended.is_zero()).then_some(extended),
        };
    }
    debug!("Flattened chunk ({}, {})", chunk.x, chunk.z);
    Ok(())
}
