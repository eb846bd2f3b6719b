//! TOML configuration.
//!
//! ```toml
//! target_version = 5
//!
//! [lock]
//! staleness_secs = 300
//! heartbeat_secs = 60
//!
//! [sources.file]
//! path = "slime_worlds"
//!
//! [sources.postgres]
//! url = "postgres://postgres:postgres@db:5432/slime"
//!
//! [worlds.lobby]
//! source = "file"
//! load_on_startup = true
//! read_only = false
//! difficulty = "normal"
//! spawnY = 80.0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use slimeworld_format::version::{self, LATEST_VERSION};
use slimeworld_format::WorldProperties;
use slimeworld_storage::LockSettings;

use crate::error::{SlimeError, SlimeResult};

fn default_target_version() -> u8 {
    LATEST_VERSION
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_target_version")]
    pub target_version: u8,
    pub lock: LockConfig,
    pub sources: SourcesConfig,
    pub worlds: BTreeMap<String, WorldConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_version: LATEST_VERSION,
            lock: LockConfig::default(),
            sources: SourcesConfig::default(),
            worlds: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub staleness_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 300,
            heartbeat_secs: 60,
        }
    }
}

impl LockConfig {
    pub fn settings(&self) -> SlimeResult<LockSettings> {
        Ok(LockSettings::new(
            Duration::from_secs(self.staleness_secs),
            Duration::from_secs(self.heartbeat_secs),
        )?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub file: Option<FileSourceConfig>,
    pub postgres: Option<PostgresSourceConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            file: Some(FileSourceConfig {
                path: PathBuf::from("slime_worlds"),
            }),
            postgres: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSourceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresSourceConfig {
    pub url: String,
}

fn default_source() -> String {
    "file".to_string()
}

fn default_true() -> bool {
    true
}

/// A world the manager knows about, with the properties it is opened with.
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_true")]
    pub load_on_startup: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub properties: WorldProperties,
}

impl WorldConfig {
    pub fn to_properties(&self) -> WorldProperties {
        self.properties.with_read_only(self.read_only)
    }
}

impl Config {
    pub fn load(path: &Path) -> SlimeResult<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| SlimeError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::parse(&data)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(data: &str) -> SlimeResult<Self> {
        let config: Config =
            toml::from_str(data).map_err(|e| SlimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SlimeResult<()> {
        if !version::is_supported(self.target_version) {
            return Err(SlimeError::Config(format!(
                "target_version {} is not a supported slime format version",
                self.target_version
            )));
        }
        self.lock.settings()?;
        Ok(())
    }

    /// `DATABASE_URL` wins over the configured postgres URL.
    pub fn override_database_url(&mut self, url: String) {
        self.sources.postgres = Some(PostgresSourceConfig { url });
    }

    /// Short description for the metrics report header.
    pub fn summary(&self) -> String {
        let mut sources = Vec::new();
        if let Some(file) = &self.sources.file {
            sources.push(format!("file={}", file.path.display()));
        }
        if self.sources.postgres.is_some() {
            sources.push("postgres".to_string());
        }
        format!(
            "target v{}, sources [{}], {} configured worlds",
            self.target_version,
            sources.join(", "),
            self.worlds.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slimeworld_format::Difficulty;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.target_version, LATEST_VERSION);
        assert_eq!(config.lock.staleness_secs, 300);
        assert_eq!(config.sources.file.unwrap().path, PathBuf::from("slime_worlds"));
        assert!(config.sources.postgres.is_none());
        assert!(config.worlds.is_empty());
    }

    #[test]
    fn test_world_entries() {
        let config = Config::parse(
            r#"
            target_version = 4

            [sources.file]
            path = "/srv/worlds"

            [worlds.lobby]
            read_only = true
            difficulty = "hard"
            spawnY = 80.0

            [worlds.arena]
            source = "postgres"
            load_on_startup = false
            "#,
        )
        .unwrap();

        assert_eq!(config.target_version, 4);
        let lobby = &config.worlds["lobby"];
        assert_eq!(lobby.source, "file");
        assert!(lobby.load_on_startup);
        let properties = lobby.to_properties();
        assert!(properties.read_only);
        assert_eq!(properties.difficulty, Difficulty::Hard);
        assert_eq!(properties.spawn_y, 80.0);
        assert!(properties.pvp);

        let arena = &config.worlds["arena"];
        assert_eq!(arena.source, "postgres");
        assert!(!arena.load_on_startup);
        assert!(!arena.to_properties().read_only);
    }

    #[test]
    fn test_rejects_unsupported_target() {
        assert!(matches!(Config::parse("target_version = 9"), Err(SlimeError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_lock_timing() {
        let err = Config::parse("[lock]\nstaleness_secs = 10\nheartbeat_secs = 30").unwrap_err();
        assert!(matches!(err, SlimeError::Loader(_)));
    }

    #[test]
    fn test_database_url_override() {
        let mut config = Config::default();
        config.override_database_url("postgres://localhost/slime".to_string());
        assert_eq!(config.sources.postgres.unwrap().url, "postgres://localhost/slime");
    }
}
