//! Moves worlds between format versions one step at a time.

pub mod error;
pub mod legacy;
mod steps;

pub use error::{UpgradeError, UpgradeResult};

use log::{debug, info};
use slimeworld_format::World;
use slimeworld_format::version::{self, LATEST_VERSION};

/// Converts worlds to a fixed target version.
#[derive(Debug, Clone, Copy)]
pub struct WorldUpgrader {
    target: u8,
}

impl Default for WorldUpgrader {
    fn default() -> Self {
        Self::new(LATEST_VERSION)
    }
}

impl WorldUpgrader {
    pub fn new(target: u8) -> Self {
        Self { target }
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    /// Brings `world` to the target version in whichever direction is needed.
    /// A world already at the target is left untouched.
    pub fn convert(&self, world: &mut World) -> UpgradeResult<()> {
        use std::cmp::Ordering;

        match world.version.cmp(&self.target) {
            Ordering::Equal => {
                self.check_supported(world.version)?;
                Ok(())
            }
            Ordering::Less => self.upgrade(world),
            Ordering::Greater => self.downgrade(world),
        }
    }

    pub fn upgrade(&self, world: &mut World) -> UpgradeResult<()> {
        let from = world.version;
        self.check_supported(from)?;
        if from > self.target {
            return Err(self.unsupported(from, "world is newer than the upgrade target"));
        }
        self.run(world, |staged| {
            let at = staged.version;
            steps::upgrade(staged, at)?;
            staged.version += 1;
            Ok(())
        })
    }

    pub fn downgrade(&self, world: &mut World) -> UpgradeResult<()> {
        let from = world.version;
        self.check_supported(from)?;
        if from < self.target {
            return Err(self.unsupported(from, "world is older than the downgrade target"));
        }
        self.run(world, |staged| {
            let at = staged.version;
            steps::downgrade(staged, at)?;
            staged.version -= 1;
            Ok(())
        })
    }

    /// Applies `step` to a copy until it reaches the target, then swaps the
    /// copy in. On failure `world` is unchanged.
    fn run(
        &self,
        world: &mut World,
        step: impl Fn(&mut World) -> Result<(), String>,
    ) -> UpgradeResult<()> {
        let from = world.version;
        if from == self.target {
            return Ok(());
        }
        info!("Converting world {} from version {} to {}", world.name(), from, self.target);

        let mut staged = world.clone();
        while staged.version != self.target {
            let at = staged.version;
            step(&mut staged).map_err(|reason| self.unsupported(from, reason))?;
            debug!("World {} converted {} -> {}", world.name(), at, staged.version);
        }
        staged
            .validate()
            .map_err(|e| self.unsupported(from, format!("converted world is invalid: {e}")))?;

        *world = staged;
        Ok(())
    }

    fn check_supported(&self, from: u8) -> UpgradeResult<()> {
        if !version::is_supported(from) {
            return Err(self.unsupported(from, format!("version {from} is not a known format version")));
        }
        if !version::is_supported(self.target) {
            return Err(self.unsupported(
                from,
                format!("version {} is not a known format version", self.target),
            ));
        }
        Ok(())
    }

    fn unsupported(&self, from: u8, reason: impl Into<String>) -> UpgradeError {
        UpgradeError::UnsupportedConversion {
            from,
            to: self.target,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastnbt::Value;
    use proptest::prelude::*;
    use slimeworld_format::chunk::block_index;
    use slimeworld_format::{BlockStorage, Chunk, Compound, NibbleArray, WorldProperties};

    fn world_v1() -> World {
        let mut world = World::empty("legacy", 1, WorldProperties::default());
        let mut chunk = Chunk::new(3, -4, 1);
        chunk.biomes = (0..64).map(|i| i % 5).collect();
        if let Some(BlockStorage::Flat { blocks, data, .. }) =
            chunk.sections[0].as_mut().map(|s| &mut s.blocks)
        {
            blocks[block_index(8, 8, 8)] = 17;
            data.set(block_index(8, 8, 8), 2);
        }
        world.insert_chunk(chunk);
        world
    }

    #[test]
    fn test_same_version_is_noop() {
        let mut world = world_v1();
        let before = world.clone();
        WorldUpgrader::new(1).convert(&mut world).unwrap();
        assert_eq!(world, before);
    }

    #[test]
    fn test_upgrade_to_latest() {
        let mut world = world_v1();
        WorldUpgrader::default().convert(&mut world).unwrap();
        assert_eq!(world.version, LATEST_VERSION);
        let chunk = world.chunk(3, -4).unwrap();
        assert_eq!(chunk.biomes.len(), 256);
        assert!(chunk.height_maps.is_none());
        world.validate().unwrap();
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let upgrader = WorldUpgrader::new(4);
        let mut once = world_v1();
        upgrader.convert(&mut once).unwrap();
        let mut twice = once.clone();
        upgrader.convert(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_failed_downgrade_leaves_world_untouched() {
        let mut world = World::empty("mobs", 5, WorldProperties::default());
        world
            .chunk_mut(0, 0)
            .unwrap()
            .entities
            .push(Value::Compound(Compound::new()));
        let before = world.clone();

        let err = WorldUpgrader::new(1).convert(&mut world).unwrap_err();
        let UpgradeError::UnsupportedConversion { from, to, .. } = err;
        assert_eq!((from, to), (5, 1));
        assert_eq!(world, before);
    }

    #[test]
    fn test_unknown_versions() {
        let mut world = world_v1();
        assert!(WorldUpgrader::new(9).convert(&mut world).is_err());
        world.version = 0;
        assert!(WorldUpgrader::new(0).convert(&mut world).is_err());
    }

    #[test]
    fn test_direction_mismatch() {
        let mut world = world_v1();
        assert!(WorldUpgrader::new(3).downgrade(&mut world).is_err());
    }

    #[test]
    fn test_extended_ids_survive_palette_round_trip() {
        let mut world = World::empty("ext", 3, WorldProperties::default());
        if let Some(BlockStorage::Flat { blocks, extended, .. }) =
            world.chunk_mut(0, 0).unwrap().sections[0].as_mut().map(|s| &mut s.blocks)
        {
            blocks[0] = 0x2C;
            let mut high = NibbleArray::new();
            high.set(0, 1);
            *extended = Some(high);
        }

        let mut converted = world.clone();
        WorldUpgrader::new(5).convert(&mut converted).unwrap();
        WorldUpgrader::new(3).convert(&mut converted).unwrap();

        let section = converted.chunk(0, 0).unwrap().sections[0].as_ref().unwrap();
        assert_eq!(section.blocks.legacy_id(0), Some(0x12C));
        // Height map is rebuilt from blocks on the way down.
        assert!(converted.chunk(0, 0).unwrap().height_maps.is_some());
    }

    proptest! {
        #[test]
        fn test_biome_cells_survive_up_and_down(biomes in proptest::collection::vec(0u32..200, 64)) {
            let mut world = World::empty("p", 3, WorldProperties::default());
            world.chunk_mut(0, 0).unwrap().biomes = biomes.clone();
            WorldUpgrader::new(4).convert(&mut world).unwrap();
            WorldUpgrader::new(3).convert(&mut world).unwrap();
            prop_assert_eq!(&world.chunk(0, 0).unwrap().biomes, &biomes);
        }
    }
}
