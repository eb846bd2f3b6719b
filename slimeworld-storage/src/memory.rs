//! In-process loader.
//!
//! A [`MemoryStore`] plays the role of the shared medium; every
//! [`MemoryLoader`] built on it is a separate lock owner, so several loaders
//! over one store behave like several processes over one directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use parking_lot::Mutex;

use crate::lock::{Heartbeats, LockRecord, LockRefresher, now_millis};
use crate::{LoaderError, LoaderId, LoaderResult, LockSettings, SlimeLoader};

#[derive(Debug, Default)]
struct StoredWorld {
    bytes: Vec<u8>,
    lock: Option<LockRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    worlds: Arc<Mutex<HashMap<String, StoredWorld>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lock record of `name`, stale or not.
    pub fn lock_record(&self, name: &str) -> Option<LockRecord> {
        self.worlds.lock().get(name).and_then(|w| w.lock)
    }
}

#[derive(Debug, Clone)]
struct MemoryBackend {
    store: MemoryStore,
    owner: LoaderId,
    settings: LockSettings,
}

impl MemoryBackend {
    /// Fails with `WorldInUse` while another live owner holds `world`.
    fn check_claim(&self, name: &str, world: &StoredWorld) -> LoaderResult<()> {
        if let Some(record) = world.lock {
            if record.blocks(self.owner, now_millis(), self.settings.staleness_millis()) {
                return Err(LoaderError::WorldInUse(name.to_string()));
            }
            if record.owner != self.owner {
                warn!("Taking over stale lock on world {} from {}", name, record.owner);
            }
        }
        Ok(())
    }

    fn acquire(&self, name: &str) -> LoaderResult<()> {
        let mut worlds = self.store.worlds.lock();
        let world = worlds
            .get_mut(name)
            .ok_or_else(|| LoaderError::UnknownWorld(name.to_string()))?;
        self.check_claim(name, world)?;
        world.lock = Some(LockRecord::new(self.owner));
        Ok(())
    }

    /// Checks the lock, writes the bytes and settles the lock under one
    /// store guard.
    fn save(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()> {
        let mut worlds = self.store.worlds.lock();
        if let Some(world) = worlds.get(name) {
            self.check_claim(name, world)?;
        }
        let world = worlds.entry(name.to_string()).or_default();
        world.bytes = bytes.to_vec();
        world.lock = leave_locked.then(|| LockRecord::new(self.owner));
        Ok(())
    }

    fn release(&self, name: &str, force: bool) {
        if let Some(world) = self.store.worlds.lock().get_mut(name) {
            if world.lock.is_some_and(|r| force || r.owner == self.owner) {
                world.lock = None;
            }
        }
    }

    fn delete(&self, name: &str) -> LoaderResult<()> {
        let mut worlds = self.store.worlds.lock();
        let world = worlds
            .get(name)
            .ok_or_else(|| LoaderError::UnknownWorld(name.to_string()))?;
        if world
            .lock
            .is_some_and(|r| r.blocks(self.owner, now_millis(), self.settings.staleness_millis()))
        {
            return Err(LoaderError::WorldInUse(name.to_string()));
        }
        worlds.remove(name);
        Ok(())
    }
}

#[async_trait]
impl LockRefresher for MemoryBackend {
    async fn refresh(&self, world: &str) -> LoaderResult<bool> {
        let mut worlds = self.store.worlds.lock();
        match worlds.get_mut(world).and_then(|w| w.lock.as_mut()) {
            Some(record) if record.owner == self.owner => {
                record.heartbeat = now_millis();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub struct MemoryLoader {
    backend: Arc<MemoryBackend>,
    heartbeats: Heartbeats,
}

impl MemoryLoader {
    pub fn new(store: MemoryStore, settings: LockSettings) -> LoaderResult<Self> {
        settings.validate()?;
        Ok(Self {
            heartbeats: Heartbeats::new(settings.heartbeat_interval),
            backend: Arc::new(MemoryBackend {
                store,
                owner: LoaderId::new(),
                settings,
            }),
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.backend.store
    }

    pub fn is_heartbeating(&self, name: &str) -> bool {
        self.heartbeats.is_running(name)
    }
}

#[async_trait]
impl SlimeLoader for MemoryLoader {
    fn id(&self) -> LoaderId {
        self.backend.owner
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn world_exists(&self, name: &str) -> LoaderResult<bool> {
        Ok(self.backend.store.worlds.lock().contains_key(name))
    }

    async fn list_worlds(&self) -> LoaderResult<Vec<String>> {
        let mut names: Vec<String> = self.backend.store.worlds.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn load_world(&self, name: &str, read_only: bool) -> LoaderResult<Vec<u8>> {
        if !read_only {
            self.backend.acquire(name)?;
        }
        let bytes = self
            .backend
            .store
            .worlds
            .lock()
            .get(name)
            .map(|w| w.bytes.clone());
        match bytes {
            Some(bytes) => {
                if !read_only {
                    self.heartbeats.start(name, self.backend.clone());
                }
                Ok(bytes)
            }
            None => {
                // Deleted between the lock and the read.
                self.backend.release(name, false);
                Err(LoaderError::UnknownWorld(name.to_string()))
            }
        }
    }

    async fn save_world(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()> {
        self.backend.save(name, bytes, leave_locked)?;
        if leave_locked {
            if !self.heartbeats.is_running(name) {
                self.heartbeats.start(name, self.backend.clone());
            }
        } else {
            self.heartbeats.stop(name);
        }
        Ok(())
    }

    async fn unlock_world(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        self.backend.release(name, false);
        Ok(())
    }

    async fn is_world_locked(&self, name: &str) -> LoaderResult<bool> {
        let worlds = self.backend.store.worlds.lock();
        let world = worlds
            .get(name)
            .ok_or_else(|| LoaderError::UnknownWorld(name.to_string()))?;
        let staleness = self.backend.settings.staleness_millis();
        Ok(world.lock.is_some_and(|r| !r.is_stale(now_millis(), staleness)))
    }

    async fn delete_world(&self, name: &str) -> LoaderResult<()> {
        self.backend.delete(name)?;
        self.heartbeats.stop(name);
        Ok(())
    }

    async fn force_unlock(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        self.backend.release(name, true);
        Ok(())
    }
}
