//! In-memory world representation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, Compound};
use crate::error::{FormatError, FormatResult};
use crate::version;

/// Packs chunk coordinates into the key used by [`World::chunks`].
#[inline]
pub fn chunk_key(x: i32, z: i32) -> i64 {
    ((x as i64) << 32) | (z as u32 as i64)
}

#[inline]
pub fn unpack_chunk_key(key: i64) -> (i32, i32) {
    ((key >> 32) as i32, key as i32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Difficulty {
    #[default]
    Peaceful,
    Easy,
    Normal,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Peaceful => "peaceful",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        })
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "peaceful" => Ok(Difficulty::Peaceful),
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Difficulty> for String {
    fn from(value: Difficulty) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    #[default]
    Normal,
    Nether,
    TheEnd,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Normal => "NORMAL",
            Environment::Nether => "NETHER",
            Environment::TheEnd => "THE_END",
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Environment::Normal),
            "NETHER" => Ok(Environment::Nether),
            "THE_END" => Ok(Environment::TheEnd),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.to_string()
    }
}

fn default_spawn_y() -> f64 {
    255.0
}

fn default_true() -> bool {
    true
}

/// World-level settings.
///
/// Defaults: spawn (0, 255, 0), peaceful, monsters and animals allowed,
/// pvp on, normal environment, writable. `read_only` describes the handle
/// and is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldProperties {
    #[serde(default)]
    pub spawn_x: f64,
    #[serde(default = "default_spawn_y")]
    pub spawn_y: f64,
    #[serde(default)]
    pub spawn_z: f64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default = "default_true")]
    pub allow_monsters: bool,
    #[serde(default = "default_true")]
    pub allow_animals: bool,
    #[serde(default = "default_true")]
    pub pvp: bool,
    #[serde(default)]
    pub environment: Environment,
    #[serde(skip)]
    pub read_only: bool,
}

impl Default for WorldProperties {
    fn default() -> Self {
        Self {
            spawn_x: 0.0,
            spawn_y: default_spawn_y(),
            spawn_z: 0.0,
            difficulty: Difficulty::default(),
            allow_monsters: true,
            allow_animals: true,
            pvp: true,
            environment: Environment::default(),
            read_only: false,
        }
    }
}

impl WorldProperties {
    /// Copy of these properties with a different read-only flag.
    pub fn with_read_only(&self, read_only: bool) -> Self {
        Self {
            read_only,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct World {
    name: String,
    pub version: u8,
    pub chunks: HashMap<i64, Chunk>,
    pub extra_data: Compound,
    pub properties: WorldProperties,
}

impl World {
    pub fn new(name: impl Into<String>, version: u8, properties: WorldProperties) -> Self {
        Self {
            name: name.into(),
            version,
            chunks: HashMap::new(),
            extra_data: Compound::new(),
            properties,
        }
    }

    /// A world holding a single chunk at (0, 0) with only section 0 populated.
    pub fn empty(name: impl Into<String>, version: u8, properties: WorldProperties) -> Self {
        let mut world = Self::new(name, version, properties);
        world.insert_chunk(Chunk::new(0, 0, version));
        world
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.properties.read_only
    }

    pub fn chunk(&self, x: i32, z: i32) -> Option<&Chunk> {
        self.chunks.get(&chunk_key(x, z))
    }

    pub fn chunk_mut(&mut self, x: i32, z: i32) -> Option<&mut Chunk> {
        self.chunks.get_mut(&chunk_key(x, z))
    }

    pub fn insert_chunk(&mut self, chunk: Chunk) -> Option<Chunk> {
        self.chunks.insert(chunk_key(chunk.x, chunk.z), chunk)
    }

    /// Copy of this world under another name. Same chunks and extra data,
    /// properties carried over with the given read-only flag.
    pub fn clone_as(&self, name: impl Into<String>, read_only: bool) -> Self {
        Self {
            name: name.into(),
            version: self.version,
            chunks: self.chunks.clone(),
            extra_data: self.extra_data.clone(),
            properties: self.properties.with_read_only(read_only),
        }
    }

    /// Checks the version and every chunk before anything is written.
    pub fn validate(&self) -> FormatResult<()> {
        if !version::is_supported(self.version) {
            return Err(if self.version > version::LATEST_VERSION {
                FormatError::NewerFormatVersion(self.version)
            } else {
                FormatError::UnsupportedVersion(self.version)
            });
        }
        for (key, chunk) in &self.chunks {
            if *key != chunk_key(chunk.x, chunk.z) {
                return Err(FormatError::invalid(format!(
                    "chunk ({}, {}) stored under a foreign key",
                    chunk.x, chunk.z
                )));
            }
            chunk.validate(self.version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_round_trip() {
        for (x, z) in [(0, 0), (1, -1), (-1, 1), (i32::MAX, i32::MIN), (-30_000, 12)] {
            assert_eq!(unpack_chunk_key(chunk_key(x, z)), (x, z));
        }
        assert_ne!(chunk_key(1, 0), chunk_key(0, 1));
    }

    #[test]
    fn test_property_defaults() {
        let props = WorldProperties::default();
        assert_eq!(props.spawn_y, 255.0);
        assert!(props.pvp && props.allow_animals && props.allow_monsters);
        assert_eq!(props.environment.to_string(), "NORMAL");
        assert!(!props.read_only);
    }

    #[test]
    fn test_with_read_only_leaves_original() {
        let props = WorldProperties::default();
        let locked = props.with_read_only(true);
        assert!(locked.read_only);
        assert!(!props.read_only);
        assert_eq!(locked.with_read_only(false), props);
    }

    #[test]
    fn test_empty_world_has_one_chunk() {
        let world = World::empty("lobby", 3, WorldProperties::default());
        assert_eq!(world.chunks.len(), 1);
        assert!(world.chunk(0, 0).is_some());
        world.validate().unwrap();
    }

    #[test]
    fn test_foreign_key_rejected() {
        let mut world = World::new("w", 5, WorldProperties::default());
        world.chunks.insert(chunk_key(1, 1), Chunk::new(0, 0, 5));
        assert!(matches!(world.validate(), Err(FormatError::InvalidWorld(_))));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert_eq!("the_end".parse::<Environment>().unwrap(), Environment::TheEnd);
        assert!("sometimes".parse::<Difficulty>().is_err());
    }
}
