use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("unknown world '{0}'")]
    UnknownWorld(String),

    /// Another live owner holds the lock.
    #[error("world '{0}' is in use by another loader")]
    WorldInUse(String),

    /// A name that cannot be stored safely, e.g. one containing a path separator.
    #[error("invalid world name '{0}'")]
    InvalidWorldName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("invalid loader settings: {0}")]
    InvalidSettings(String),
}

impl LoaderError {
    /// Storage-level failure, as opposed to a world or lock condition.
    pub fn is_io_failure(&self) -> bool {
        matches!(self, LoaderError::Io(_) | LoaderError::Database(_) | LoaderError::Pool(_))
    }
}

impl From<deadpool_postgres::PoolError> for LoaderError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        LoaderError::Pool(e.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for LoaderError {
    fn from(e: deadpool_postgres::CreatePoolError) -> Self {
        LoaderError::Pool(e.to_string())
    }
}

pub type LoaderResult<T> = std::result::Result<T, LoaderError>;
