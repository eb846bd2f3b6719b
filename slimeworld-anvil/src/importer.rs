//! Anvil world directory to slime world conversion.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use fastnbt::Value;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use slimeworld_format::codec::{ChunkBounds, check_addressable};
use slimeworld_format::nibble::{NIBBLE_BYTES, SECTION_VOLUME};
use slimeworld_format::version::{LATEST_VERSION, WIDE_BIOMES};
use slimeworld_format::{
    BlockStorage, Chunk, Difficulty, FormatError, NibbleArray, SECTION_COUNT, Section, World,
    WorldProperties, palette,
};

use crate::error::{ImportError, ImportResult};
use crate::nbt::{self, ChunkData, EntityChunk, LevelDat};
use crate::region::RegionFile;

/// Extra data key listing biome names; chunk biome values index into it.
pub const IMPORTED_BIOMES_KEY: &str = "importedBiomes";

/// Section whose biomes stand in for the whole column.
const BIOME_SECTION_Y: i8 = 4;

/// Anvil packs block states with at least this many bits per entry.
const MIN_BLOCK_BITS: u8 = 4;

#[derive(Debug, Default)]
struct BiomeRegistry {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl BiomeRegistry {
    fn id_of(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    fn into_value(self) -> Value {
        Value::List(self.names.into_iter().map(Value::String).collect())
    }
}

/// Reads anvil worlds (`region/`, `entities/`, `level.dat`) into slime worlds.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorldImporter;

impl WorldImporter {
    pub fn new() -> Self {
        Self
    }

    /// Imports `dir`, naming the world after the directory.
    pub fn import_from(&self, dir: &Path) -> ImportResult<World> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImportError::invalid(format!("{} has no usable name", dir.display())))?
            .to_string();
        self.import_as(dir, &name)
    }

    pub fn import_as(&self, dir: &Path, name: &str) -> ImportResult<World> {
        let region_dir = dir.join("region");
        if !region_dir.is_dir() {
            return Err(ImportError::invalid(format!(
                "{} has no region directory",
                dir.display()
            )));
        }

        let mut world = World::new(name, LATEST_VERSION, read_level_dat(dir)?);
        let mut biomes = BiomeRegistry::default();

        for path in region_files(&region_dir)? {
            let region = RegionFile::open(&path)?;
            for (index, x, z) in region.present_chunks() {
                let Some(raw) = region.read_chunk(index)? else { continue };
                let data: ChunkData = fastnbt::from_bytes(&raw).map_err(|e| {
                    ImportError::invalid(format!("{}: chunk ({x}, {z}): {e}", path.display()))
                })?;
                match convert_chunk(data, &mut biomes)? {
                    Some(chunk) => {
                        check_addressable(chunk.x, chunk.z).map_err(too_large)?;
                        world.insert_chunk(chunk);
                    }
                    None => debug!("Skipping empty chunk ({}, {})", x, z),
                }
            }
        }

        let entities_dir = dir.join("entities");
        if entities_dir.is_dir() {
            attach_entities(&mut world, &entities_dir)?;
        }

        world
            .extra_data
            .insert(IMPORTED_BIOMES_KEY.to_string(), biomes.into_value());

        // Surface size problems here rather than at serialization time.
        ChunkBounds::covering(world.chunks.values()).map_err(too_large)?;

        info!(
            "Imported world {} from {} ({} chunks)",
            name,
            dir.display(),
            world.chunks.len()
        );
        Ok(world)
    }
}

fn too_large(err: FormatError) -> ImportError {
    match err {
        FormatError::WorldTooBig { x, z } => ImportError::SourceTooLarge { x, z },
        other => ImportError::invalid(other.to_string()),
    }
}

fn region_files(dir: &Path) -> ImportResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ImportError::io(dir, e))? {
        let path = entry.map_err(|e| ImportError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("mca") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Spawn point and difficulty from `level.dat`, when there is one.
fn read_level_dat(dir: &Path) -> ImportResult<WorldProperties> {
    let mut properties = WorldProperties::default();
    let path = dir.join("level.dat");
    if !path.is_file() {
        return Ok(properties);
    }

    let compressed = fs::read(&path).map_err(|e| ImportError::io(&path, e))?;
    let mut raw = Vec::new();
    let parsed = GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| e.to_string())
        .and_then(|_| fastnbt::from_bytes::<LevelDat>(&raw).map_err(|e| e.to_string()));
    let level = match parsed {
        Ok(level) => level.data,
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            return Ok(properties);
        }
    };

    if let (Some(x), Some(y), Some(z)) = (level.spawn_x, level.spawn_y, level.spawn_z) {
        properties.spawn_x = x as f64;
        properties.spawn_y = y as f64;
        properties.spawn_z = z as f64;
    }
    if let Some(difficulty) = level.difficulty {
        properties.difficulty = match difficulty {
            1 => Difficulty::Easy,
            2 => Difficulty::Normal,
            3 => Difficulty::Hard,
            _ => Difficulty::Peaceful,
        };
    }
    Ok(properties)
}

/// Maps one anvil chunk to a slime chunk. `None` if no section fits a slot.
fn convert_chunk(data: ChunkData, biomes: &mut BiomeRegistry) -> ImportResult<Option<Chunk>> {
    let (x, z) = (data.x_pos, data.z_pos);
    let malformed = |what: String| ImportError::invalid(format!("chunk ({x}, {z}): {what}"));

    let mut sections: [Option<Section>; SECTION_COUNT] = Default::default();
    let mut column_biomes = vec![0u32; WIDE_BIOMES];
    let mut dropped = 0;

    for section in &data.sections {
        if section.y == BIOME_SECTION_Y {
            if let Some(section_biomes) = &section.biomes {
                column_biomes = sample_biomes(section_biomes, biomes).map_err(&malformed)?;
            }
        }

        let Some(block_states) = &section.block_states else { continue };
        if !(0..SECTION_COUNT as i8).contains(&section.y) {
            dropped += 1;
            continue;
        }
        let converted = convert_section(section, block_states)
            .map_err(|what| malformed(format!("section {}: {what}", section.y)))?;
        sections[section.y as usize] = Some(converted);
    }
    if dropped > 0 {
        debug!("Chunk ({}, {}): dropped {} sections outside 0..16", x, z, dropped);
    }

    if sections.iter().all(Option::is_none) {
        return Ok(None);
    }
    if sections[0].is_none() {
        sections[0] = Some(Section::empty(LATEST_VERSION));
    }

    Ok(Some(Chunk {
        x,
        z,
        sections,
        height_maps: None,
        biomes: column_biomes,
        tile_entities: data.block_entities,
        entities: data.entities,
    }))
}

fn convert_section(section: &nbt::Section, states: &nbt::BlockStates) -> Result<Section, String> {
    let palette_len = states.palette.len();
    if palette_len == 0 || palette_len > SECTION_VOLUME {
        return Err(format!("palette of {palette_len} entries"));
    }

    let indices = match &states.data {
        Some(words) if palette_len > 1 => {
            let bits = palette::bits_for(palette_len).max(MIN_BLOCK_BITS);
            let needed = palette::section_word_count(bits);
            if words.len() < needed {
                return Err(format!("{} block words, expected {needed}", words.len()));
            }
            palette::unpack(words, bits, SECTION_VOLUME)
        }
        Some(_) | None if palette_len == 1 => vec![0u16; SECTION_VOLUME],
        _ => return Err("block data missing for a multi-entry palette".to_string()),
    };
    if let Some(bad) = indices.iter().find(|i| **i as usize >= palette_len) {
        return Err(format!("palette index {bad} out of range"));
    }

    let block_light = match &section.block_light {
        Some(light) => nibbles(light)?,
        None => NibbleArray::new(),
    };
    let sky_light = section.sky_light.as_ref().map(nibbles).transpose()?;

    Ok(Section {
        blocks: BlockStorage::Paletted {
            palette: states.palette.clone(),
            states: indices,
        },
        block_light,
        sky_light,
    })
}

fn nibbles(light: &fastnbt::ByteArray) -> Result<NibbleArray, String> {
    if light.len() != NIBBLE_BYTES {
        return Err(format!("light array of {} bytes", light.len()));
    }
    NibbleArray::from_bytes(nbt::light_bytes(light)).map_err(|e| e.to_string())
}

/// Expands the 4 x 4 x 4 biome cells of one section into 256 columns,
/// using the bottom layer of cells.
fn sample_biomes(section: &nbt::Biomes, registry: &mut BiomeRegistry) -> Result<Vec<u32>, String> {
    if section.palette.is_empty() {
        return Err("empty biome palette".to_string());
    }
    let ids: Vec<u32> = section.palette.iter().map(|name| registry.id_of(name)).collect();

    let bits = palette::bits_for(ids.len());
    let cells = match &section.data {
        Some(words) if bits > 0 => palette::unpack(words, bits, 64),
        _ => vec![0u16; 64],
    };

    let mut column = vec![0u32; WIDE_BIOMES];
    for z in 0..16 {
        for x in 0..16 {
            let cell = cells[(z / 4) * 4 + x / 4] as usize;
            column[z * 16 + x] = *ids
                .get(cell)
                .ok_or_else(|| format!("biome index {cell} out of range"))?;
        }
    }
    Ok(column)
}

fn attach_entities(world: &mut World, dir: &Path) -> ImportResult<()> {
    let mut attached = 0usize;
    for path in region_files(dir)? {
        let region = RegionFile::open(&path)?;
        for (index, x, z) in region.present_chunks() {
            let Some(raw) = region.read_chunk(index)? else { continue };
            let data: EntityChunk = fastnbt::from_bytes(&raw).map_err(|e| {
                ImportError::invalid(format!("{}: entities ({x}, {z}): {e}", path.display()))
            })?;
            let (x, z) = match data.position.as_deref() {
                Some([px, pz]) => (*px, *pz),
                _ => (x, z),
            };
            match world.chunk_mut(x, z) {
                Some(chunk) => {
                    attached += data.entities.len();
                    chunk.entities.extend(data.entities);
                }
                None if !data.entities.is_empty() => {
                    warn!("Dropping {} entities of missing chunk ({}, {})", data.entities.len(), x, z);
                }
                None => {}
            }
        }
    }
    debug!("Attached {} entities to world {}", attached, world.name());
    Ok(())
}
