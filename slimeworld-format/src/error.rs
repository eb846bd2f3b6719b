//! Error types for the slime region format.

use std::fmt;
use thiserror::Error;

/// Result type for codec operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Which part of a serialized world a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlock {
    Header,
    ChunkIndex,
    Sections,
    Heights,
    TileEntities,
    Entities,
    ExtraData,
    Properties,
}

impl fmt::Display for SubBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubBlock::Header => "header",
            SubBlock::ChunkIndex => "chunk index",
            SubBlock::Sections => "sections",
            SubBlock::Heights => "height/biome data",
            SubBlock::TileEntities => "tile entities",
            SubBlock::Entities => "entities",
            SubBlock::ExtraData => "extra data",
            SubBlock::Properties => "properties",
        };
        f.write_str(name)
    }
}

/// Errors raised while encoding or decoding a world.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The bytes break a structural or length invariant, or fail to decompress.
    #[error("corrupted {block}{}: {reason}", chunk_suffix(.chunk))]
    Corrupted {
        block: SubBlock,
        chunk: Option<(i32, i32)>,
        reason: String,
    },

    /// The version byte is newer than anything this codec understands.
    #[error("world is serialized in a newer slime format version ({0})")]
    NewerFormatVersion(u8),

    /// The version byte belongs to a retired or never-shipped revision.
    #[error("slime format version {0} is not supported")]
    UnsupportedVersion(u8),

    /// The in-memory world cannot be serialized as it stands.
    #[error("invalid world: {0}")]
    InvalidWorld(String),

    /// A chunk lies outside the coordinate range the chunk index can address.
    #[error("world is too big: chunk ({x}, {z}) is outside the addressable chunk range")]
    WorldTooBig { x: i32, z: i32 },
}

fn chunk_suffix(chunk: &Option<(i32, i32)>) -> String {
    match chunk {
        Some((x, z)) => format!(" of chunk ({x}, {z})"),
        None => String::new(),
    }
}

impl FormatError {
    pub(crate) fn corrupted(block: SubBlock, reason: impl Into<String>) -> Self {
        FormatError::Corrupted {
            block,
            chunk: None,
            reason: reason.into(),
        }
    }

    /// Attaches chunk coordinates to a corruption error that has none yet.
    pub(crate) fn in_chunk(self, x: i32, z: i32) -> Self {
        match self {
            FormatError::Corrupted {
                block,
                chunk: None,
                reason,
            } => FormatError::Corrupted {
                block,
                chunk: Some((x, z)),
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        FormatError::InvalidWorld(reason.into())
    }
}
