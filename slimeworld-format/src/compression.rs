//! Independently compressed, length-prefixed sub-blocks.
//!
//! Framing: `[compressed_len:u32][raw_len:u32][zlib:compressed_len]`.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::buffer::{SlimeReader, SlimeWriter};
use crate::error::{FormatError, FormatResult, SubBlock};

pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Upper bound on up-front allocation; the header length is untrusted.
const MAX_PREALLOC: usize = 1 << 20;

/// Inflates at most `expected_len + 1` bytes, so a lying header cannot make
/// the decoder expand an arbitrarily large stream.
pub fn decompress(data: &[u8], expected_len: usize, block: SubBlock) -> FormatResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len.min(MAX_PREALLOC));
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::corrupted(block, format!("decompression failed: {e}")))?;

    if out.len() != expected_len {
        return Err(FormatError::corrupted(
            block,
            format!("decompressed to {} bytes, header says {expected_len}", out.len()),
        ));
    }
    Ok(out)
}

/// Compresses `raw` and appends it as a framed block.
pub fn write_block(writer: &mut SlimeWriter, raw: &[u8]) {
    let compressed = compress(raw);
    writer.write_u32(compressed.len() as u32);
    writer.write_u32(raw.len() as u32);
    writer.write_bytes(&compressed);
}

/// Reads one framed block and returns its decompressed contents.
pub fn read_block(reader: &mut SlimeReader<'_>, block: SubBlock) -> FormatResult<Vec<u8>> {
    let compressed_len = reader.read_u32().map_err(|e| retag(e, block))? as usize;
    let raw_len = reader.read_u32().map_err(|e| retag(e, block))? as usize;
    let compressed = reader.read_bytes(compressed_len).map_err(|e| retag(e, block))?;
    decompress(compressed, raw_len, block)
}

fn retag(err: FormatError, block: SubBlock) -> FormatError {
    match err {
        FormatError::Corrupted { chunk, reason, .. } => FormatError::Corrupted { block, chunk, reason },
        other => other,
    }
}
