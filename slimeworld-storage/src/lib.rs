//! World storage backends and the cross-process locking protocol.
//!
//! A loader stores serialized worlds by name. Opening a world for writing
//! takes an exclusive lock owned by the loader instance; the lock is kept
//! alive by a heartbeat task and expires if the owner stops refreshing it.

pub mod error;
pub mod file;
pub mod lock;
pub mod memory;
pub mod postgres;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{LoaderError, LoaderResult};
pub use file::FileLoader;
pub use memory::{MemoryLoader, MemoryStore};
pub use postgres::PostgresLoader;

/// Identity of a loader instance. Also the owner token written into locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaderId(Uuid);

impl LoaderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LoaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LoaderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lock timing shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// A lock not refreshed for this long may be taken over.
    pub staleness: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

impl LockSettings {
    pub fn new(staleness: Duration, heartbeat_interval: Duration) -> LoaderResult<Self> {
        let settings = Self {
            staleness,
            heartbeat_interval,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> LoaderResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(LoaderError::InvalidSettings(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.staleness {
            return Err(LoaderError::InvalidSettings(format!(
                "heartbeat interval {:?} must be shorter than the staleness window {:?}",
                self.heartbeat_interval, self.staleness
            )));
        }
        Ok(())
    }

    pub(crate) fn staleness_millis(&self) -> u64 {
        self.staleness.as_millis() as u64
    }
}

#[async_trait]
pub trait SlimeLoader: Send + Sync {
    fn id(&self) -> LoaderId;

    /// Short backend name for logs, e.g. `file`.
    fn kind(&self) -> &'static str;

    async fn world_exists(&self, name: &str) -> LoaderResult<bool>;

    async fn list_worlds(&self) -> LoaderResult<Vec<String>>;

    /// Returns the stored bytes. Unless `read_only`, the world is locked for
    /// this loader first and stays locked until saved with
    /// `leave_locked = false` or unlocked.
    async fn load_world(&self, name: &str, read_only: bool) -> LoaderResult<Vec<u8>>;

    /// Replaces the stored bytes atomically, creating the world if needed.
    /// Afterwards the lock is either held by this loader or released.
    async fn save_world(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()>;

    /// Releases this loader's lock. A lock held by someone else is left alone.
    async fn unlock_world(&self, name: &str) -> LoaderResult<()>;

    /// Whether a live owner currently holds the lock.
    async fn is_world_locked(&self, name: &str) -> LoaderResult<bool>;

    async fn delete_world(&self, name: &str) -> LoaderResult<()>;

    /// Clears the lock whoever holds it. Operator recovery only.
    async fn force_unlock(&self, name: &str) -> LoaderResult<()>;
}

/// Rejects names that would escape a storage namespace: empty names, `.`
/// and `..`, path separators and NUL.
pub fn validate_world_name(name: &str) -> LoaderResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(LoaderError::InvalidWorldName(name.to_string()));
    }
    Ok(())
}

/// Two handles refer to the same loader instance.
pub fn same_loader(a: &dyn SlimeLoader, b: &dyn SlimeLoader) -> bool {
    a.id() == b.id()
}
