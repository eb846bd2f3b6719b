//! World lifecycle on top of the loaders: open, create, save, unload, clone,
//! migrate and import.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use slimeworld_anvil::{ImportError, WorldImporter};
use slimeworld_benchmark::BenchmarkMetrics;
use slimeworld_format::codec::Header;
use slimeworld_format::{FormatError, World, WorldProperties};
use slimeworld_storage::{LoaderError, SlimeLoader};
use slimeworld_upgrade::WorldUpgrader;

use crate::config::Config;
use crate::error::{SlimeError, SlimeResult};
use crate::registry::LoaderRegistry;

/// Host-side hook that turns a world snapshot into a live world.
pub trait WorldRuntimeBridge: Send + Sync {
    fn materialize(&self, world: &World) -> SlimeResult<()>;
}

/// A stored world as found on its data source, before any upgrade.
#[derive(Debug, Clone)]
pub struct WorldInfo {
    pub name: String,
    pub source: String,
    pub header: Header,
    pub size_bytes: usize,
    pub locked: bool,
    pub properties: WorldProperties,
}

#[derive(Debug, Clone)]
struct LoadedWorld {
    source: String,
    read_only: bool,
}

pub struct SlimeManager {
    registry: LoaderRegistry,
    upgrader: WorldUpgrader,
    importer: WorldImporter,
    metrics: Arc<BenchmarkMetrics>,
    loaded: Mutex<HashMap<String, LoadedWorld>>,
    bridge: Option<Arc<dyn WorldRuntimeBridge>>,
}

impl SlimeManager {
    pub fn new(registry: LoaderRegistry, target_version: u8) -> Self {
        Self {
            registry,
            upgrader: WorldUpgrader::new(target_version),
            importer: WorldImporter::new(),
            metrics: Arc::new(BenchmarkMetrics::default()),
            loaded: Mutex::new(HashMap::new()),
            bridge: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BenchmarkMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn WorldRuntimeBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<BenchmarkMetrics> {
        &self.metrics
    }

    pub fn target_version(&self) -> u8 {
        self.upgrader.target()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    pub fn loaded_worlds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Opens a stored world with the properties it was saved with.
    pub async fn load_world(&self, source: &str, name: &str, read_only: bool) -> SlimeResult<World> {
        self.open_world(source, name, read_only, None).await
    }

    /// Opens a stored world, replacing its stored properties with `properties`.
    pub async fn load_world_with(
        &self,
        source: &str,
        name: &str,
        properties: WorldProperties,
    ) -> SlimeResult<World> {
        let read_only = properties.read_only;
        self.open_world(source, name, read_only, Some(properties)).await
    }

    async fn open_world(
        &self,
        source: &str,
        name: &str,
        read_only: bool,
        properties: Option<WorldProperties>,
    ) -> SlimeResult<World> {
        if self.is_loaded(name) {
            return Err(SlimeError::InvalidArgument(format!("world {name} is already loaded")));
        }
        let loader = self.registry.get(source)?;
        let start = Instant::now();
        info!("Loading world {}", name);

        let bytes = self.checkout(loader.as_ref(), name, read_only).await?;
        let mut world = match self.decode(name, bytes).await {
            Ok(world) => world,
            Err(e) => {
                // Nobody will use the lock we just took.
                if !read_only {
                    self.release(loader.as_ref(), name).await;
                }
                return Err(e);
            }
        };
        world.properties = match properties {
            Some(properties) => properties,
            None => world.properties.with_read_only(read_only),
        };

        self.track(name, source, read_only);
        self.metrics.record_load(start.elapsed());
        info!("World {} loaded in {}ms", name, start.elapsed().as_millis());
        Ok(world)
    }

    /// Saves a fresh world holding one empty chunk. Writable worlds stay locked.
    pub async fn create_empty_world(
        &self,
        source: &str,
        name: &str,
        properties: WorldProperties,
    ) -> SlimeResult<World> {
        let loader = self.registry.get(source)?;
        if loader.world_exists(name).await? {
            return Err(SlimeError::WorldAlreadyExists(name.to_string()));
        }
        let start = Instant::now();
        info!("Creating empty world {}", name);

        let read_only = properties.read_only;
        let world = World::empty(name, self.target_version(), properties);
        let (world, bytes) = self.encode(world).await?;
        loader.save_world(name, &bytes, !read_only).await?;

        self.track(name, source, read_only);
        info!("World {} created in {}ms", name, start.elapsed().as_millis());
        Ok(world)
    }

    /// Writes a loaded world back to its source; the lock stays held.
    pub async fn save_world(&self, world: &World) -> SlimeResult<()> {
        self.store(world, true).await
    }

    /// Forgets a loaded world, saving it first if asked, and releases its lock.
    pub async fn unload_world(&self, world: &World, save: bool) -> SlimeResult<()> {
        let entry = self.entry(world.name())?;
        if !entry.read_only {
            if save {
                self.store(world, false).await?;
            } else {
                let loader = self.registry.get(&entry.source)?;
                loader.unlock_world(world.name()).await?;
            }
        }
        self.loaded.lock().remove(world.name());
        info!("World {} unloaded", world.name());
        Ok(())
    }

    async fn store(&self, world: &World, leave_locked: bool) -> SlimeResult<()> {
        if world.is_read_only() {
            return Err(SlimeError::ReadOnlyWorld(world.name().to_string()));
        }
        let entry = self.entry(world.name())?;
        let loader = self.registry.get(&entry.source)?;

        let start = Instant::now();
        let (_, bytes) = self.encode(world.clone()).await?;
        loader.save_world(world.name(), &bytes, leave_locked).await?;
        self.metrics.record_save(start.elapsed());
        debug!("Saved world {} ({} bytes) to {}", world.name(), bytes.len(), entry.source);
        Ok(())
    }

    /// Stores a copy of `world` under `new_name` on `source`.
    pub async fn clone_world(
        &self,
        world: &World,
        new_name: &str,
        source: &str,
        read_only: bool,
    ) -> SlimeResult<World> {
        if new_name == world.name() {
            return Err(SlimeError::InvalidArgument(
                "a clone needs a different name".to_string(),
            ));
        }
        let loader = self.registry.get(source)?;
        if loader.world_exists(new_name).await? {
            return Err(SlimeError::WorldAlreadyExists(new_name.to_string()));
        }

        let copy = world.clone_as(new_name, read_only);
        let (copy, bytes) = self.encode(copy).await?;
        loader.save_world(new_name, &bytes, !read_only).await?;
        self.track(new_name, source, read_only);
        info!("Cloned world {} to {} on {}", world.name(), new_name, source);
        Ok(copy)
    }

    /// Moves a stored world between data sources. If the world is open here
    /// from `from`, it keeps its lock on the new source.
    pub async fn migrate_world(&self, name: &str, from: &str, to: &str) -> SlimeResult<()> {
        if from == to {
            return Err(SlimeError::InvalidArgument(format!(
                "world {name} is already stored on {from}"
            )));
        }
        let current = self.registry.get(from)?;
        let target = self.registry.get(to)?;
        if target.world_exists(name).await? {
            return Err(SlimeError::WorldAlreadyExists(name.to_string()));
        }

        let open_writable = self
            .loaded
            .lock()
            .get(name)
            .is_some_and(|e| e.source == from && !e.read_only);
        if open_writable {
            // Our own lock would make the load below fail.
            current.unlock_world(name).await?;
        }

        let bytes = self.checkout(current.as_ref(), name, false).await?;
        if let Err(e) = target.save_world(name, &bytes, open_writable).await {
            self.release(current.as_ref(), name).await;
            return Err(e.into());
        }
        current.delete_world(name).await?;

        if open_writable {
            self.track(name, to, false);
        }
        info!("Migrated world {} from {} to {}", name, from, to);
        Ok(())
    }

    /// Converts an anvil world directory and stores it unlocked on `source`.
    pub async fn import_world(&self, dir: &Path, name: &str, source: &str) -> SlimeResult<World> {
        let loader = self.registry.get(source)?;
        if loader.world_exists(name).await? {
            return Err(SlimeError::WorldAlreadyExists(name.to_string()));
        }
        let start = Instant::now();
        info!("Importing {} as {}", dir.display(), name);

        let importer = self.importer;
        let upgrader = self.upgrader;
        let dir: PathBuf = dir.to_path_buf();
        let world_name = name.to_string();
        let world = tokio::task::spawn_blocking(move || -> SlimeResult<World> {
            let mut world = importer.import_as(&dir, &world_name)?;
            if world.version != upgrader.target() {
                upgrader.convert(&mut world)?;
            }
            Ok(world)
        })
        .await??;

        let (world, bytes) = self.encode(world).await.map_err(|e| match e {
            SlimeError::Format(FormatError::WorldTooBig { x, z }) => {
                SlimeError::Import(ImportError::SourceTooLarge { x, z })
            }
            other => other,
        })?;
        loader.save_world(name, &bytes, false).await?;

        self.metrics.record_import(start.elapsed(), world.chunks.len());
        info!(
            "World {} imported in {}ms ({} chunks)",
            name,
            start.elapsed().as_millis(),
            world.chunks.len()
        );
        Ok(world)
    }

    /// Reads a stored world without locking or upgrading it.
    pub async fn inspect_world(&self, source: &str, name: &str) -> SlimeResult<WorldInfo> {
        let loader = self.registry.get(source)?;
        let bytes = loader.load_world(name, true).await?;
        let header = slimeworld_format::read_header(&bytes)?;
        let world = slimeworld_format::deserialize(name, &bytes)?;
        let locked = loader.is_world_locked(name).await?;
        Ok(WorldInfo {
            name: name.to_string(),
            source: source.to_string(),
            header,
            size_bytes: bytes.len(),
            locked,
            properties: world.properties,
        })
    }

    /// Rewrites a stored world at `target` version, holding its lock meanwhile.
    /// Returns the version it was stored at.
    pub async fn upgrade_stored_world(&self, source: &str, name: &str, target: u8) -> SlimeResult<u8> {
        if self.is_loaded(name) {
            return Err(SlimeError::InvalidArgument(format!("world {name} is loaded")));
        }
        let loader = self.registry.get(source)?;
        let bytes = self.checkout(loader.as_ref(), name, false).await?;

        let metrics = self.metrics.clone();
        let world_name = name.to_string();
        let converted = tokio::task::spawn_blocking(move || -> SlimeResult<(u8, Vec<u8>)> {
            let mut world = slimeworld_format::deserialize(&world_name, &bytes)?;
            let from = world.version;
            let start = Instant::now();
            WorldUpgrader::new(target).convert(&mut world)?;
            metrics.record_upgrade(start.elapsed());

            let start = Instant::now();
            let bytes = slimeworld_format::serialize(&world)?;
            metrics.record_serialization(start.elapsed(), bytes.len(), world.chunks.len());
            Ok((from, bytes))
        })
        .await
        .map_err(SlimeError::from)
        .and_then(|r| r);

        match converted {
            Ok((from, bytes)) => {
                loader.save_world(name, &bytes, false).await?;
                info!("World {} converted from version {} to {}", name, from, target);
                Ok(from)
            }
            Err(e) => {
                self.release(loader.as_ref(), name).await;
                Err(e)
            }
        }
    }

    /// Releases a lock. `force` clears it whoever holds it.
    pub async fn unlock_world(&self, source: &str, name: &str, force: bool) -> SlimeResult<()> {
        let loader = self.registry.get(source)?;
        if !loader.world_exists(name).await? {
            return Err(LoaderError::UnknownWorld(name.to_string()).into());
        }
        if force {
            warn!("Forcibly unlocking world {} on {}", name, source);
            loader.force_unlock(name).await?;
        } else {
            loader.unlock_world(name).await?;
        }
        Ok(())
    }

    pub async fn delete_world(&self, source: &str, name: &str) -> SlimeResult<()> {
        if self.is_loaded(name) {
            return Err(SlimeError::InvalidArgument(format!(
                "world {name} is loaded, unload it first"
            )));
        }
        self.registry.get(source)?.delete_world(name).await?;
        info!("Deleted world {} from {}", name, source);
        Ok(())
    }

    /// Stored world names with their lock state.
    pub async fn list_worlds(&self, source: &str) -> SlimeResult<Vec<(String, bool)>> {
        let loader = self.registry.get(source)?;
        let mut worlds = Vec::new();
        for name in loader.list_worlds().await? {
            let locked = loader.is_world_locked(&name).await?;
            worlds.push((name, locked));
        }
        Ok(worlds)
    }

    /// Opens every `load_on_startup` world in `config`. Returns the opened
    /// worlds and the names of those that failed.
    pub async fn load_startup_worlds(&self, config: &Config) -> (Vec<World>, Vec<String>) {
        let mut worlds = Vec::new();
        let mut errored = Vec::new();
        for (name, entry) in config.worlds.iter().filter(|(_, w)| w.load_on_startup) {
            match self.load_world_with(&entry.source, name, entry.to_properties()).await {
                Ok(world) => worlds.push(world),
                Err(e) => {
                    error!("Failed to load world {}: {}", name, e.describe(name));
                    errored.push(name.clone());
                }
            }
        }
        (worlds, errored)
    }

    /// Hands a world to the host runtime.
    pub fn generate_world(&self, world: &World) -> SlimeResult<()> {
        match &self.bridge {
            Some(bridge) => bridge.materialize(world),
            None => Err(SlimeError::InvalidArgument(
                "no runtime bridge is registered".to_string(),
            )),
        }
    }

    async fn checkout(&self, loader: &dyn SlimeLoader, name: &str, read_only: bool) -> SlimeResult<Vec<u8>> {
        loader.load_world(name, read_only).await.map_err(|e| {
            if matches!(e, LoaderError::WorldInUse(_)) {
                self.metrics.record_lock_conflict();
            }
            e.into()
        })
    }

    /// Decodes and converts to the target version on the blocking pool.
    async fn decode(&self, name: &str, bytes: Vec<u8>) -> SlimeResult<World> {
        let metrics = self.metrics.clone();
        let upgrader = self.upgrader;
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> SlimeResult<World> {
            let start = Instant::now();
            let mut world = slimeworld_format::deserialize(&name, &bytes)?;
            metrics.record_deserialization(start.elapsed(), bytes.len());

            if world.version != upgrader.target() {
                let from = world.version;
                let start = Instant::now();
                upgrader.convert(&mut world)?;
                metrics.record_upgrade(start.elapsed());
                debug!("World {} converted from version {} to {}", name, from, world.version);
            }
            Ok(world)
        })
        .await?
    }

    /// Serializes on the blocking pool and hands the world back.
    async fn encode(&self, world: World) -> SlimeResult<(World, Vec<u8>)> {
        let metrics = self.metrics.clone();
        tokio::task::spawn_blocking(move || -> SlimeResult<(World, Vec<u8>)> {
            let start = Instant::now();
            let bytes = slimeworld_format::serialize(&world)?;
            metrics.record_serialization(start.elapsed(), bytes.len(), world.chunks.len());
            Ok((world, bytes))
        })
        .await?
    }

    async fn release(&self, loader: &dyn SlimeLoader, name: &str) {
        if let Err(e) = loader.unlock_world(name).await {
            warn!("Could not unlock world {} after a failed open: {}", name, e);
        }
    }

    fn track(&self, name: &str, source: &str, read_only: bool) {
        self.loaded.lock().insert(
            name.to_string(),
            LoadedWorld {
                source: source.to_string(),
                read_only,
            },
        );
    }

    fn entry(&self, name: &str) -> SlimeResult<LoadedWorld> {
        self.loaded
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SlimeError::InvalidArgument(format!("world {name} is not loaded")))
    }
}
