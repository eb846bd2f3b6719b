use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// The directory is not an anvil world, or something in it is malformed.
    #[error("invalid source world: {0}")]
    InvalidSourceFormat(String),

    /// A chunk lies outside the coordinate range a slime world can address.
    #[error("source world is too large: chunk ({x}, {z}) cannot be stored")]
    SourceTooLarge { x: i32, z: i32 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ImportError::InvalidSourceFormat(reason.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
