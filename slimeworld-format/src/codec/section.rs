//! Section sub-block encoding.

use crate::buffer::{SlimeReader, SlimeWriter};
use crate::chunk::{BlockStorage, SECTION_COUNT, Section};
use crate::codec::tags::{PaletteTag, from_nbt, to_nbt};
use crate::error::{FormatError, FormatResult, SubBlock};
use crate::nibble::{NIBBLE_BYTES, NibbleArray, SECTION_VOLUME};
use crate::{palette, version};

pub fn write_sections(
    sections: &[Option<Section>; SECTION_COUNT],
    version: u8,
) -> FormatResult<Vec<u8>> {
    let mut writer = SlimeWriter::with_capacity(16 * 1024);

    let mask = sections
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_some())
        .fold(0u16, |mask, (i, _)| mask | (1 << i));
    writer.write_u16(mask);

    for section in sections.iter().flatten() {
        writer.write_bytes(section.block_light.as_bytes());
        write_optional_nibbles(&mut writer, section.sky_light.as_ref());

        match &section.blocks {
            BlockStorage::Flat { blocks, data, extended } => {
                writer.write_bytes(blocks);
                writer.write_bytes(data.as_bytes());
                if version >= version::EXTENDED_IDS_VERSION {
                    write_optional_nibbles(&mut writer, extended.as_ref());
                }
            }
            BlockStorage::Paletted { palette: entries, states } => {
                let tag = PaletteTag { palette: entries.clone() };
                writer.write_prefixed(&to_nbt(&tag, SubBlock::Sections)?);

                let bits = palette::bits_for(entries.len());
                let words = palette::pack(states, bits);
                writer.write_u8(bits);
                writer.write_varint(words.len() as u32);
                for word in words {
                    writer.write_i64(word);
                }
            }
        }
    }
    Ok(writer.into_vec())
}

fn write_optional_nibbles(writer: &mut SlimeWriter, nibbles: Option<&NibbleArray>) {
    match nibbles {
        Some(nibbles) => {
            writer.write_u8(1);
            writer.write_bytes(nibbles.as_bytes());
        }
        None => writer.write_u8(0),
    }
}

pub fn read_sections(raw: &[u8], version: u8) -> FormatResult<[Option<Section>; SECTION_COUNT]> {
    let mut reader = SlimeReader::new(raw, SubBlock::Sections);
    let mask = reader.read_u16()?;
    let mut sections: [Option<Section>; SECTION_COUNT] = Default::default();

    for (slot, target) in sections.iter_mut().enumerate() {
        if mask & (1 << slot) == 0 {
            continue;
        }
        let block_light = read_nibbles(&mut reader)?;
        let sky_light = read_optional_nibbles(&mut reader)?;

        let blocks = if version::is_paletted(version) {
            read_paletted(&mut reader, slot)?
        } else {
            let blocks = reader.read_bytes(SECTION_VOLUME)?.to_vec();
            let data = read_nibbles(&mut reader)?;
            let extended = if version >= version::EXTENDED_IDS_VERSION {
                read_optional_nibbles(&mut reader)?
            } else {
                None
            };
            BlockStorage::Flat { blocks, data, extended }
        };

        *target = Some(Section {
            blocks,
            block_light,
            sky_light,
        });
    }

    reader.finish()?;
    Ok(sections)
}

fn read_nibbles(reader: &mut SlimeReader<'_>) -> FormatResult<NibbleArray> {
    let bytes = reader.read_bytes(NIBBLE_BYTES)?.to_vec();
    // Length was just enforced by the read itself.
    NibbleArray::from_bytes(bytes).map_err(|e| FormatError::corrupted(reader.block(), e.to_string()))
}

fn read_optional_nibbles(reader: &mut SlimeReader<'_>) -> FormatResult<Option<NibbleArray>> {
    match reader.read_u8()? {
        0 => Ok(None),
        1 => read_nibbles(reader).map(Some),
        flag => Err(FormatError::corrupted(reader.block(), format!("invalid presence flag {flag}"))),
    }
}

fn read_paletted(reader: &mut SlimeReader<'_>, slot: usize) -> FormatResult<BlockStorage> {
    let tag: PaletteTag = from_nbt(reader.read_prefixed()?, SubBlock::Sections)?;
    let entries = tag.palette;
    if entries.is_empty() || entries.len() > SECTION_VOLUME {
        return Err(FormatError::corrupted(
            SubBlock::Sections,
            format!("section {slot} has a palette of {} entries", entries.len()),
        ));
    }

    let bits = reader.read_u8()?;
    if bits != palette::bits_for(entries.len()) {
        return Err(FormatError::corrupted(
            SubBlock::Sections,
            format!("section {slot} uses {bits} bits for a palette of {}", entries.len()),
        ));
    }

    let count = reader.read_varint()? as usize;
    if count != palette::section_word_count(bits) {
        return Err(FormatError::corrupted(
            SubBlock::Sections,
            format!("section {slot} has {count} words, expected {}", palette::section_word_count(bits)),
        ));
    }
    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        words.push(reader.read_i64()?);
    }

    let states = palette::unpack(&words, bits, SECTION_VOLUME);
    if let Some(bad) = states.iter().find(|s| **s as usize >= entries.len()) {
        return Err(FormatError::corrupted(
            SubBlock::Sections,
            format!("section {slot} references palette entry {bad} of {}", entries.len()),
        ));
    }

    Ok(BlockStorage::Paletted { palette: entries, states })
}
