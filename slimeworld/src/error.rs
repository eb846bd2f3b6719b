use slimeworld_anvil::ImportError;
use slimeworld_format::FormatError;
use slimeworld_storage::LoaderError;
use slimeworld_upgrade::UpgradeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlimeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("world {0} already exists")]
    WorldAlreadyExists(String),

    #[error("world {0} is read-only")]
    ReadOnlyWorld(String),

    #[error("no loader registered for data source '{0}'")]
    UnknownLoader(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SlimeError {
    /// Operator-facing explanation, used when a startup world fails to load.
    pub fn describe(&self, world: &str) -> String {
        match self {
            SlimeError::Loader(LoaderError::UnknownWorld(_)) => {
                "world does not exist, is the data source correct?".to_string()
            }
            SlimeError::Loader(LoaderError::WorldInUse(_)) => format!(
                "world is in use! If this is a mistake, run `slimeworld unlock --force {world}`"
            ),
            SlimeError::Format(FormatError::NewerFormatVersion(v)) => format!(
                "world is serialized in a newer slime format version ({v}) that this build does not understand"
            ),
            SlimeError::Format(FormatError::Corrupted { .. }) => {
                format!("world seems to be corrupted ({self})")
            }
            other => other.to_string(),
        }
    }
}

pub type SlimeResult<T> = std::result::Result<T, SlimeError>;
