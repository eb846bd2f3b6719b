//! Slime region format codec.
//!
//! Layout (all scalars big-endian):
//!
//! ```text
//! [magic:u16 = 0xB10B][version:u8][flags:u8]
//! [min_x:i16][min_z:i16][width:u16][depth:u16][bitset: ceil(width*depth/8)]
//! per present chunk, in bitset order:
//!     [sections block][heights/biomes block][tile entities block][entities block (v2+)]
//! [extra data block][properties block]
//! ```
//!
//! Every block is compressed on its own (see [`crate::compression`]). Any
//! failure aborts the whole decode; the error names the block kind and the
//! chunk it belongs to.

mod index;
mod section;
mod tags;

pub use index::{ChunkBounds, check_addressable};

use log::debug;

use crate::buffer::{SlimeReader, SlimeWriter};
use crate::chunk::{Chunk, Compound};
use crate::compression::{read_block, write_block};
use crate::error::{FormatError, FormatResult, SubBlock};
use crate::version;
use crate::world::{World, WorldProperties};
use tags::{EntityList, TileEntityList, from_nbt, to_nbt};

pub const MAGIC: u16 = 0xB10B;

/// The world was written from a read-only handle. Informational only.
pub const FLAG_READ_ONLY_HINT: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_READ_ONLY_HINT;

/// Everything in front of the chunk data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub bounds: ChunkBounds,
    pub chunks: Vec<(i32, i32)>,
}

impl Header {
    pub fn read_only_hint(&self) -> bool {
        self.flags & FLAG_READ_ONLY_HINT != 0
    }
}

/// Reads the header and chunk index without touching chunk data.
pub fn read_header(bytes: &[u8]) -> FormatResult<Header> {
    let mut reader = SlimeReader::new(bytes, SubBlock::Header);
    read_header_from(&mut reader)
}

fn read_header_from(reader: &mut SlimeReader<'_>) -> FormatResult<Header> {
    let magic = reader.read_u16()?;
    if magic != MAGIC {
        return Err(FormatError::corrupted(
            SubBlock::Header,
            format!("bad magic {magic:#06x}"),
        ));
    }

    // The version decides how everything after it is read, so check it first.
    let version = reader.read_u8()?;
    if version > version::LATEST_VERSION {
        return Err(FormatError::NewerFormatVersion(version));
    }
    if version < version::FIRST_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let flags = reader.read_u8()?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FormatError::corrupted(
            SubBlock::Header,
            format!("unknown flags {flags:#04x}"),
        ));
    }

    let bounds = ChunkBounds::read(reader)?;
    let bits = reader
        .read_bytes(bounds.bitset_len())
        .map_err(|_| FormatError::corrupted(SubBlock::ChunkIndex, "bitset is truncated"))?;
    let chunks = index::read_bitset(&bounds, bits)?;

    Ok(Header {
        version,
        flags,
        bounds,
        chunks,
    })
}

pub fn serialize(world: &World) -> FormatResult<Vec<u8>> {
    world.validate()?;
    let version = world.version;
    let bounds = ChunkBounds::covering(world.chunks.values())?;

    let mut chunks: Vec<&Chunk> = world.chunks.values().collect();
    chunks.sort_by_key(|c| bounds.index_of(c.x, c.z));

    let mut writer = SlimeWriter::with_capacity(chunks.len() * 8 * 1024);
    writer.write_u16(MAGIC);
    writer.write_u8(version);
    writer.write_u8(if world.is_read_only() { FLAG_READ_ONLY_HINT } else { 0 });
    bounds.write(&mut writer);
    writer.write_bytes(&index::build_bitset(&bounds, &world.chunks));

    for chunk in chunks {
        write_chunk(&mut writer, chunk, version)?;
    }

    write_block(&mut writer, &to_nbt(&world.extra_data, SubBlock::ExtraData)?);
    write_block(&mut writer, &to_nbt(&world.properties, SubBlock::Properties)?);

    debug!(
        "Serialized world {} (version {}, {} chunks) into {} bytes",
        world.name(),
        version,
        world.chunks.len(),
        writer.len()
    );
    Ok(writer.into_vec())
}

fn write_chunk(writer: &mut SlimeWriter, chunk: &Chunk, version: u8) -> FormatResult<()> {
    write_block(writer, &section::write_sections(&chunk.sections, version)?);

    let mut heights = SlimeWriter::new();
    if let Some(height_maps) = &chunk.height_maps {
        heights.write_prefixed(&to_nbt(height_maps, SubBlock::Heights)?);
    }
    heights.write_varint(chunk.biomes.len() as u32);
    for biome in &chunk.biomes {
        heights.write_u32(*biome);
    }
    write_block(writer, &heights.into_vec());

    let tiles = TileEntityList {
        tiles: chunk.tile_entities.clone(),
    };
    write_block(writer, &to_nbt(&tiles, SubBlock::TileEntities)?);

    if version >= version::ENTITIES_VERSION {
        let entities = EntityList {
            entities: chunk.entities.clone(),
        };
        write_block(writer, &to_nbt(&entities, SubBlock::Entities)?);
    }
    Ok(())
}

/// Decodes a world. The returned handle is writable; callers opening a world
/// read-only flip `properties.read_only` themselves.
pub fn deserialize(name: &str, bytes: &[u8]) -> FormatResult<World> {
    let mut reader = SlimeReader::new(bytes, SubBlock::Header);
    let header = read_header_from(&mut reader)?;
    let version = header.version;

    let mut world = World::new(name, version, WorldProperties::default());
    for &(x, z) in &header.chunks {
        let chunk = read_chunk(&mut reader, x, z, version).map_err(|e| e.in_chunk(x, z))?;
        world.insert_chunk(chunk);
    }

    let extra = read_block(&mut reader, SubBlock::ExtraData)?;
    world.extra_data = from_nbt::<Compound>(&extra, SubBlock::ExtraData)?;

    let properties = read_block(&mut reader, SubBlock::Properties)?;
    world.properties = from_nbt::<WorldProperties>(&properties, SubBlock::Properties)?;

    if reader.remaining() != 0 {
        return Err(FormatError::corrupted(
            SubBlock::Properties,
            format!("{} trailing bytes after the last block", reader.remaining()),
        ));
    }

    debug!(
        "Deserialized world {} (version {}, {} chunks)",
        name,
        version,
        world.chunks.len()
    );
    Ok(world)
}

fn read_chunk(reader: &mut SlimeReader<'_>, x: i32, z: i32, version: u8) -> FormatResult<Chunk> {
    let raw = read_block(reader, SubBlock::Sections)?;
    let sections = section::read_sections(&raw, version)?;
    if sections[0].is_none() {
        return Err(FormatError::corrupted(SubBlock::Sections, "section 0 is missing"));
    }

    let raw = read_block(reader, SubBlock::Heights)?;
    let mut heights = SlimeReader::new(&raw, SubBlock::Heights);
    let height_maps = if version::has_height_maps(version) {
        Some(from_nbt::<Compound>(heights.read_prefixed()?, SubBlock::Heights)?)
    } else {
        None
    };
    let count = heights.read_varint()? as usize;
    if count != version::biome_count(version) {
        return Err(FormatError::corrupted(
            SubBlock::Heights,
            format!("{count} biomes, expected {}", version::biome_count(version)),
        ));
    }
    let mut biomes = Vec::with_capacity(count);
    for _ in 0..count {
        biomes.push(heights.read_u32()?);
    }
    heights.finish()?;

    let raw = read_block(reader, SubBlock::TileEntities)?;
    let tile_entities = from_nbt::<TileEntityList>(&raw, SubBlock::TileEntities)?.tiles;

    let entities = if version >= version::ENTITIES_VERSION {
        let raw = read_block(reader, SubBlock::Entities)?;
        from_nbt::<EntityList>(&raw, SubBlock::Entities)?.entities
    } else {
        Vec::new()
    };

    Ok(Chunk {
        x,
        z,
        sections,
        height_maps,
        biomes,
        tile_entities,
        entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BlockState, BlockStorage, Section};
    use crate::nibble::SECTION_VOLUME;
    use fastnbt::Value;
    use std::collections::HashMap;

    fn entity(id: &str) -> Value {
        let mut compound = HashMap::new();
        compound.insert("id".to_string(), Value::String(id.to_string()));
        compound.insert("Health".to_string(), Value::Float(20.0));
        Value::Compound(compound)
    }

    fn sample_world(version: u8) -> World {
        let mut world = World::empty("sample", version, WorldProperties::default());
        let mut chunk = Chunk::new(-2, 3, version);
        chunk.sections[4] = Some(Section::empty(version));
        chunk.biomes.iter_mut().enumerate().for_each(|(i, b)| *b = i as u32 % 7);
        chunk.tile_entities.push(entity("minecraft:chest"));
        if version >= version::ENTITIES_VERSION {
            chunk.entities.push(entity("minecraft:cow"));
        }
        world.insert_chunk(chunk);
        world
            .extra_data
            .insert("owner".to_string(), Value::String("builder".to_string()));
        world.properties.difficulty = crate::world::Difficulty::Hard;
        world.properties.spawn_x = 12.5;
        world
    }

    #[test]
    fn test_round_trip_every_version() {
        for v in version::FIRST_VERSION..=version::LATEST_VERSION {
            let world = sample_world(v);
            let bytes = serialize(&world).unwrap();
            let decoded = deserialize("sample", &bytes).unwrap();
            assert_eq!(decoded, world, "version {v}");
        }
    }

    #[test]
    fn test_single_chunk_version_three() {
        let mut world = World::new("test", 3, WorldProperties::default());
        world.insert_chunk(Chunk::new(0, 0, 3));

        let decoded = deserialize("test", &serialize(&world).unwrap()).unwrap();
        assert_eq!(decoded.chunks.len(), 1);
        let chunk = decoded.chunk(0, 0).unwrap();
        assert_eq!(chunk.biomes.len(), 64);
        match &chunk.sections[0].as_ref().unwrap().blocks {
            BlockStorage::Flat { blocks, .. } => assert_eq!(blocks, &vec![0u8; SECTION_VOLUME]),
            other => panic!("unexpected storage {other:?}"),
        }
        assert!(decoded.extra_data.is_empty());
    }

    #[test]
    fn test_minimal_world_and_zero_sections() {
        let world = World::empty("minimal", 5, WorldProperties::default());
        assert!(deserialize("minimal", &serialize(&world).unwrap()).is_ok());

        let mut broken = world.clone();
        broken.chunk_mut(0, 0).unwrap().sections[0] = None;
        assert!(matches!(serialize(&broken), Err(FormatError::InvalidWorld(_))));
    }

    #[test]
    fn test_newer_version_rejected_before_parsing() {
        let mut bytes = serialize(&sample_world(5)).unwrap();
        bytes[2] = version::LATEST_VERSION + 1;
        // Garbage after the version byte must not matter.
        bytes.truncate(4);
        assert!(matches!(
            deserialize("sample", &bytes),
            Err(FormatError::NewerFormatVersion(6))
        ));
    }

    #[test]
    fn test_version_zero_is_retired() {
        let mut bytes = serialize(&sample_world(1)).unwrap();
        bytes[2] = 0;
        assert!(matches!(deserialize("sample", &bytes), Err(FormatError::UnsupportedVersion(0))));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = serialize(&sample_world(4)).unwrap();
        bytes[0] = 0;
        assert!(matches!(
            deserialize("sample", &bytes),
            Err(FormatError::Corrupted { block: SubBlock::Header, .. })
        ));
    }

    #[test]
    fn test_truncated_entities_abort_whole_world() {
        // A single chunk keeps the entity block right before the world blocks.
        let mut world = World::empty("one", 5, WorldProperties::default());
        world.chunk_mut(0, 0).unwrap().entities.push(entity("minecraft:pig"));
        let bytes = serialize(&world).unwrap();

        let extra = to_nbt(&world.extra_data, SubBlock::ExtraData).unwrap();
        let properties = to_nbt(&world.properties, SubBlock::Properties).unwrap();
        let tail = 8
            + crate::compression::compress(&extra).len()
            + 8
            + crate::compression::compress(&properties).len();
        let entity_end = bytes.len() - tail;

        match deserialize("one", &bytes[..entity_end - 4]) {
            Err(FormatError::Corrupted { block, chunk, .. }) => {
                assert_eq!(block, SubBlock::Entities);
                assert_eq!(chunk, Some((0, 0)));
            }
            other => panic!("expected entity corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = serialize(&sample_world(2)).unwrap();
        bytes.push(0);
        assert!(deserialize("sample", &bytes).is_err());
    }

    #[test]
    fn test_read_header_lists_chunks() {
        let world = sample_world(5);
        let header = read_header(&serialize(&world).unwrap()).unwrap();
        assert_eq!(header.version, 5);
        assert!(!header.read_only_hint());
        assert_eq!(header.chunks, vec![(0, 0), (-2, 3)]);
    }

    #[test]
    fn test_read_only_not_persisted() {
        let mut world = sample_world(5);
        world.properties.read_only = true;
        let bytes = serialize(&world).unwrap();
        assert!(read_header(&bytes).unwrap().read_only_hint());
        assert!(!deserialize("sample", &bytes).unwrap().is_read_only());
    }

    #[test]
    fn test_paletted_world_with_mixed_blocks() {
        let mut world = World::empty("mixed", 5, WorldProperties::default());
        let section = world.chunk_mut(0, 0).unwrap().sections[0].as_mut().unwrap();
        let states: Vec<u16> = (0..SECTION_VOLUME).map(|i| if i < 256 { 1 } else { 0 }).collect();
        section.blocks = BlockStorage::Paletted {
            palette: vec![BlockState::air(), BlockState::new("minecraft:bedrock")],
            states,
        };
        let decoded = deserialize("mixed", &serialize(&world).unwrap()).unwrap();
        assert_eq!(decoded, world);
    }

    mod arbitrary {
        use super::*;
        use crate::chunk::SECTION_COUNT;
        use crate::nibble::NibbleArray;
        use crate::world::{Difficulty, Environment};
        use proptest::prelude::*;

        /// Cheap deterministic spread of `seed` over a section.
        fn mix(seed: u32, i: usize) -> u32 {
            let mut x = seed ^ (i as u32).wrapping_mul(0x9E37_79B9);
            x ^= x >> 15;
            x = x.wrapping_mul(0x2C1B_3C6D);
            x ^ (x >> 12)
        }

        fn nibbles(seed: u32) -> NibbleArray {
            let mut array = NibbleArray::new();
            for i in 0..SECTION_VOLUME {
                array.set(i, (mix(seed, i) & 0xF) as u8);
            }
            array
        }

        fn storage(version: u8) -> BoxedStrategy<BlockStorage> {
            if version::is_paletted(version) {
                (1usize..40, any::<u32>())
                    .prop_map(|(len, seed)| BlockStorage::Paletted {
                        palette: (0..len)
                            .map(|i| match i {
                                0 => BlockState::air(),
                                i if i % 2 == 1 => BlockState::new(format!("minecraft:block_{i}"))
                                    .with_property("facing", "north"),
                                i => BlockState::new(format!("minecraft:block_{i}")),
                            })
                            .collect(),
                        states: (0..SECTION_VOLUME)
                            .map(|i| (mix(seed, i) as usize % len) as u16)
                            .collect(),
                    })
                    .boxed()
            } else {
                (any::<u32>(), any::<Option<u32>>())
                    .prop_map(move |(seed, high)| BlockStorage::Flat {
                        blocks: (0..SECTION_VOLUME).map(|i| mix(seed, i) as u8).collect(),
                        data: nibbles(seed.rotate_left(7)),
                        extended: if version >= version::EXTENDED_IDS_VERSION {
                            high.map(nibbles)
                        } else {
                            None
                        },
                    })
                    .boxed()
            }
        }

        fn section(version: u8) -> impl Strategy<Value = Section> {
            (storage(version), any::<u32>(), any::<Option<u32>>()).prop_map(|(blocks, light, sky)| {
                Section {
                    blocks,
                    block_light: nibbles(light),
                    sky_light: sky.map(nibbles),
                }
            })
        }

        fn value() -> impl Strategy<Value = Value> {
            prop_oneof![
                any::<i32>().prop_map(Value::Int),
                any::<i64>().prop_map(Value::Long),
                (-1.0e6f64..1.0e6).prop_map(Value::Double),
                "[a-z ]{0,12}".prop_map(Value::String),
            ]
        }

        fn compound() -> impl Strategy<Value = Compound> {
            prop::collection::hash_map("[a-zA-Z]{1,8}", value(), 0..4)
        }

        fn tag_list() -> impl Strategy<Value = Vec<Value>> {
            prop::collection::vec(compound().prop_map(Value::Compound), 0..3)
        }

        fn chunk(version: u8, x: i32, z: i32) -> BoxedStrategy<Chunk> {
            (
                section(version),
                prop::collection::vec(prop::option::weighted(0.2, section(version)), SECTION_COUNT - 1),
                prop::collection::vec(any::<u32>(), version::biome_count(version)),
                tag_list(),
                tag_list(),
            )
                .prop_map(move |(first, upper, biomes, tiles, entities)| {
                    let mut chunk = Chunk::new(x, z, version);
                    chunk.sections[0] = Some(first);
                    for (slot, section) in upper.into_iter().enumerate() {
                        chunk.sections[slot + 1] = section;
                    }
                    chunk.biomes = biomes;
                    chunk.tile_entities = tiles;
                    if version >= version::ENTITIES_VERSION {
                        chunk.entities = entities;
                    }
                    chunk
                })
                .boxed()
        }

        fn properties() -> impl Strategy<Value = WorldProperties> {
            (
                (-1.0e4f64..1.0e4, 0.0f64..320.0, -1.0e4f64..1.0e4),
                prop_oneof![
                    Just(Difficulty::Peaceful),
                    Just(Difficulty::Easy),
                    Just(Difficulty::Normal),
                    Just(Difficulty::Hard),
                ],
                prop_oneof![
                    Just(Environment::Normal),
                    Just(Environment::Nether),
                    Just(Environment::TheEnd),
                ],
                any::<(bool, bool, bool)>(),
            )
                .prop_map(|((x, y, z), difficulty, environment, (monsters, animals, pvp))| {
                    WorldProperties {
                        spawn_x: x,
                        spawn_y: y,
                        spawn_z: z,
                        difficulty,
                        allow_monsters: monsters,
                        allow_animals: animals,
                        pvp,
                        environment,
                        read_only: false,
                    }
                })
        }

        fn any_world(version: u8) -> BoxedStrategy<World> {
            let chunks = prop::collection::hash_set((-300i32..300, -300i32..300), 0..5)
                .prop_flat_map(move |coords| {
                    coords
                        .into_iter()
                        .map(|(x, z)| chunk(version, x, z))
                        .collect::<Vec<_>>()
                });
            (chunks, compound(), properties())
                .prop_map(move |(chunks, extra_data, properties)| {
                    let mut world = World::new("arbitrary", version, properties);
                    for chunk in chunks {
                        world.insert_chunk(chunk);
                    }
                    world.extra_data = extra_data;
                    world
                })
                .boxed()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn test_any_world_round_trips(
                world in (version::FIRST_VERSION..=version::LATEST_VERSION).prop_flat_map(any_world)
            ) {
                let bytes = serialize(&world).unwrap();
                let header = read_header(&bytes).unwrap();
                prop_assert_eq!(header.version, world.version);
                prop_assert_eq!(header.chunks.len(), world.chunks.len());

                let decoded = deserialize("arbitrary", &bytes).unwrap();
                prop_assert_eq!(decoded, world);
            }
        }
    }
}
