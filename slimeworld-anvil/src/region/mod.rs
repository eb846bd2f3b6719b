//! Anvil region files (`r.X.Z.mca`).
//!
//! 32 x 32 chunks per file. An 8 KiB header maps each chunk to a run of
//! 4 KiB sectors holding `[len:u32][scheme:u8][payload:len-1]`.

pub mod header;

use std::fs;
use std::path::{Path, PathBuf};

pub use header::{Header, Location};

use crate::compression::{CompressionScheme, EXTERNAL_FLAG};
use crate::error::{ImportError, ImportResult};

pub const SECTOR_BYTES: usize = 4096; // minecraft uses 4096 bytes per sector
pub const HEADER_BYTES: usize = 8192; // header is 8192 bytes (2 sectors 8kb)
pub const CHUNKS_PER_REGION: usize = 1024;

#[inline]
pub fn chunk_index(rel_x: i32, rel_z: i32) -> usize {
    // 32x32 chunks in region. index from 0 to 1023.
    ((rel_x & 31) + (rel_z & 31) * 32) as usize
}

/// Absolute chunk coordinates of slot `index` in region (`region_x`, `region_z`).
#[inline]
pub fn chunk_coords(region_x: i32, region_z: i32, index: usize) -> (i32, i32) {
    (
        region_x * 32 + (index % 32) as i32,
        region_z * 32 + (index / 32) as i32,
    )
}

/// Region coordinates from a file name like `r.-1.2.mca`.
pub fn parse_region_name(file_name: &str) -> Option<(i32, i32)> {
    let mut parts = file_name.strip_prefix("r.")?.strip_suffix(".mca")?.split('.');
    let x = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((x, z))
}

/// One region file read fully into memory.
pub struct RegionFile {
    pub region_x: i32,
    pub region_z: i32,
    path: PathBuf,
    data: Vec<u8>,
    locations: Vec<Location>,
}

impl RegionFile {
    pub fn open(path: &Path) -> ImportResult<Self> {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (region_x, region_z) = parse_region_name(file_name).ok_or_else(|| {
            ImportError::invalid(format!("{} is not a region file name", path.display()))
        })?;
        let data = fs::read(path).map_err(|e| ImportError::io(path, e))?;
        Self::from_bytes(path, region_x, region_z, data)
    }

    pub fn from_bytes(path: &Path, region_x: i32, region_z: i32, data: Vec<u8>) -> ImportResult<Self> {
        // Vanilla leaves never-written regions as empty files.
        let locations = if data.is_empty() {
            vec![Location { sector_offset: 0, sector_count: 0 }; CHUNKS_PER_REGION]
        } else {
            Header::parse(&data).ok_or_else(|| {
                ImportError::invalid(format!("{}: truncated region header", path.display()))
            })?
        };
        Ok(Self {
            region_x,
            region_z,
            path: path.to_path_buf(),
            data,
            locations,
        })
    }

    /// Slots that hold a chunk, as `(index, absolute x, absolute z)`.
    pub fn present_chunks(&self) -> Vec<(usize, i32, i32)> {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_present())
            .map(|(i, _)| {
                let (x, z) = chunk_coords(self.region_x, self.region_z, i);
                (i, x, z)
            })
            .collect()
    }

    /// Decompressed NBT of the chunk in slot `index`, or `None` if absent.
    pub fn read_chunk(&self, index: usize) -> ImportResult<Option<Vec<u8>>> {
        let location = self.locations[index];
        if !location.is_present() {
            return Ok(None);
        }
        let (x, z) = chunk_coords(self.region_x, self.region_z, index);
        let malformed = |what: &str| {
            ImportError::invalid(format!("{}: chunk ({x}, {z}) {what}", self.path.display()))
        };

        let start = location.byte_offset();
        let header = self
            .data
            .get(start..start + 5)
            .ok_or_else(|| malformed("points past the end of the file"))?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let scheme_byte = header[4];
        if len == 0 || len + 4 > location.byte_len() {
            return Err(malformed("has an invalid length"));
        }
        let scheme = CompressionScheme::from_byte(scheme_byte)?;

        if scheme_byte & EXTERNAL_FLAG != 0 {
            let external = self.external_path(x, z);
            let payload = fs::read(&external).map_err(|e| ImportError::io(&external, e))?;
            return scheme.decompress(&payload).map(Some);
        }

        let payload = self
            .data
            .get(start + 5..start + 4 + len)
            .ok_or_else(|| malformed("is truncated"))?;
        scheme.decompress(payload).map(Some)
    }

    fn external_path(&self, x: i32, z: i32) -> PathBuf {
        self.path.with_file_name(format!("c.{x}.{z}.mcc"))
    }
}

/// Builds region files. Used to produce fixtures and by tooling that
/// exports worlds back to anvil.
pub struct RegionWriter {
    scheme: CompressionScheme,
    chunks: Vec<Option<Vec<u8>>>,
}

impl RegionWriter {
    pub fn new(scheme: CompressionScheme) -> Self {
        Self {
            scheme,
            chunks: vec![None; CHUNKS_PER_REGION],
        }
    }

    /// Stores raw chunk NBT at region-relative coordinates.
    pub fn insert(&mut self, rel_x: i32, rel_z: i32, nbt: Vec<u8>) {
        self.chunks[chunk_index(rel_x, rel_z)] = Some(nbt);
    }

    pub fn to_bytes(&self) -> ImportResult<Vec<u8>> {
        let mut locations = vec![None; CHUNKS_PER_REGION];
        let mut body = Vec::new();
        // Sector 0-1 are the header itself
        let mut next_sector = 2u32;

        for (i, chunk) in self.chunks.iter().enumerate() {
            let Some(nbt) = chunk else { continue };
            let payload = self.scheme.compress(nbt)?;
            let mut entry = Vec::with_capacity(payload.len() + 5);
            entry.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
            entry.push(self.scheme as u8);
            entry.extend_from_slice(&payload);

            let sectors = entry.len().div_ceil(SECTOR_BYTES);
            entry.resize(sectors * SECTOR_BYTES, 0);
            let sector_count = u8::try_from(sectors)
                .map_err(|_| ImportError::invalid("chunk larger than 255 sectors"))?;

            locations[i] = Some(Location {
                sector_offset: next_sector,
                sector_count,
            });
            next_sector += sectors as u32;
            body.extend_from_slice(&entry);
        }

        let mut out = Header::generate(&locations);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_index_0_0() {
        assert_eq!(chunk_index(0, 0), 0);
        assert_eq!(chunk_index(31, 0), 31);
        assert_eq!(chunk_index(0, 1), 32);
        // Negative absolute coordinates wrap into the region.
        assert_eq!(chunk_index(-1, -1), 1023);
    }

    #[test]
    fn test_round_trip() {
        // Test all possible chunks in a region (32x32)
        for index in 0..CHUNKS_PER_REGION {
            let (x, z) = chunk_coords(-1, 2, index);
            assert_eq!(chunk_index(x, z), index, "Mismatch at {index}");
        }
    }

    #[test]
    fn test_region_names() {
        assert_eq!(parse_region_name("r.0.0.mca"), Some((0, 0)));
        assert_eq!(parse_region_name("r.-3.12.mca"), Some((-3, 12)));
        assert_eq!(parse_region_name("r.1.mca"), None);
        assert_eq!(parse_region_name("r.1.2.3.mca"), None);
        assert_eq!(parse_region_name("c.1.2.mcc"), None);
    }

    #[test]
    fn test_writer_and_reader_agree() {
        let mut writer = RegionWriter::new(CompressionScheme::Zlib);
        writer.insert(3, 4, b"first".to_vec());
        writer.insert(31, 31, vec![7u8; 10_000]);
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(bytes.len() % SECTOR_BYTES, 0);

        let region = RegionFile::from_bytes(Path::new("r.1.0.mca"), 1, 0, bytes).unwrap();
        let present = region.present_chunks();
        assert_eq!(present, vec![(chunk_index(3, 4), 35, 4), (1023, 63, 31)]);
        assert_eq!(region.read_chunk(chunk_index(3, 4)).unwrap().unwrap(), b"first");
        assert_eq!(region.read_chunk(1023).unwrap().unwrap(), vec![7u8; 10_000]);
        assert!(region.read_chunk(0).unwrap().is_none());
    }

    #[test]
    fn test_truncated_region() {
        let mut writer = RegionWriter::new(CompressionScheme::Gzip);
        writer.insert(0, 0, b"chunk".to_vec());
        let mut bytes = writer.to_bytes().unwrap();
        bytes.truncate(HEADER_BYTES + 2);
        let region = RegionFile::from_bytes(Path::new("r.0.0.mca"), 0, 0, bytes).unwrap();
        assert!(matches!(region.read_chunk(0), Err(ImportError::InvalidSourceFormat(_))));
    }

    #[test]
    fn test_empty_region_file() {
        let region = RegionFile::from_bytes(Path::new("r.0.0.mca"), 0, 0, Vec::new()).unwrap();
        assert!(region.present_chunks().is_empty());
    }
}
