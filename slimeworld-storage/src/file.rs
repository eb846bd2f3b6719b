//! Filesystem loader.
//!
//! Layout inside the worlds directory:
//!
//! ```text
//! <dir>/
//! ├─ <name>.slime        # serialized world
//! ├─ <name>.slime.lock   # JSON lock record, empty when unlocked
//! └─ <name>.slime.tmp    # staging file, only present mid-save
//! ```
//!
//! Every read-modify-write of a lock record happens under an exclusive
//! advisory lock on the `.lock` file, so loaders in different processes
//! agree on who owns a world.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use log::{info, warn};

use crate::lock::{Heartbeats, LockRecord, LockRefresher, now_millis};
use crate::{LoaderError, LoaderId, LoaderResult, LockSettings, SlimeLoader, validate_world_name};

const WORLD_EXTENSION: &str = "slime";

/// Synchronous half of the loader; runs on the blocking pool.
#[derive(Debug, Clone)]
struct FileBackend {
    dir: PathBuf,
    owner: LoaderId,
    settings: LockSettings,
}

impl FileBackend {
    fn world_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{WORLD_EXTENSION}"))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{WORLD_EXTENSION}.lock"))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{WORLD_EXTENSION}.tmp"))
    }

    fn exists(&self, name: &str) -> bool {
        self.world_path(name).is_file()
    }

    fn list(&self) -> LoaderResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(WORLD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Runs `f` on the lock file while holding the advisory lock.
    fn with_lock_file<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut File) -> LoaderResult<T>,
    ) -> LoaderResult<T> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(name))?;
        file.lock_exclusive()?;
        let result = f(&mut file);
        // Closing the handle releases the lock as well.
        let _ = FileExt::unlock(&file);
        result
    }

    fn read_record(file: &mut File, name: &str) -> LoaderResult<Option<LockRecord>> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable lock record for world {}: {}", name, e);
                Ok(None)
            }
        }
    }

    fn write_record(file: &mut File, record: Option<&LockRecord>) -> LoaderResult<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        if let Some(record) = record {
            let json = serde_json::to_vec(record).map_err(io::Error::other)?;
            file.write_all(&json)?;
        }
        file.sync_data()?;
        Ok(())
    }

    /// Fails with `WorldInUse` while another live owner holds `record`.
    fn check_claim(&self, name: &str, record: Option<LockRecord>) -> LoaderResult<()> {
        let now = now_millis();
        match record {
            Some(record) if record.blocks(self.owner, now, self.settings.staleness_millis()) => {
                Err(LoaderError::WorldInUse(name.to_string()))
            }
            Some(record) if record.owner != self.owner => {
                warn!(
                    "Taking over stale lock on world {} from {} (last heartbeat {} ms ago)",
                    name,
                    record.owner,
                    now.saturating_sub(record.heartbeat)
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn acquire(&self, name: &str) -> LoaderResult<()> {
        self.with_lock_file(name, |file| {
            self.check_claim(name, Self::read_record(file, name)?)?;
            Self::write_record(file, Some(&LockRecord::new(self.owner)))
        })
    }

    /// Writes the world and settles its lock in one critical section, so a
    /// world held by another live owner is never overwritten.
    fn save(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()> {
        self.with_lock_file(name, |file| {
            let record = Self::read_record(file, name)?;
            self.check_claim(name, record)?;
            self.write(name, bytes)?;
            if leave_locked {
                Self::write_record(file, Some(&LockRecord::new(self.owner)))
            } else if record.is_some() {
                Self::write_record(file, None)
            } else {
                Ok(())
            }
        })
    }

    fn refresh_record(&self, name: &str) -> LoaderResult<bool> {
        if !self.lock_path(name).exists() {
            return Ok(false);
        }
        self.with_lock_file(name, |file| match Self::read_record(file, name)? {
            Some(record) if record.owner == self.owner => {
                Self::write_record(file, Some(&LockRecord::new(self.owner)))?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn release(&self, name: &str, force: bool) -> LoaderResult<()> {
        if !self.lock_path(name).exists() {
            return Ok(());
        }
        // Truncate instead of deleting: another process may already be
        // waiting on this inode's advisory lock.
        self.with_lock_file(name, |file| match Self::read_record(file, name)? {
            Some(record) if force || record.owner == self.owner => Self::write_record(file, None),
            _ => Ok(()),
        })
    }

    fn is_locked(&self, name: &str) -> LoaderResult<bool> {
        if !self.exists(name) {
            return Err(LoaderError::UnknownWorld(name.to_string()));
        }
        if !self.lock_path(name).exists() {
            return Ok(false);
        }
        let staleness = self.settings.staleness_millis();
        self.with_lock_file(name, |file| {
            Ok(Self::read_record(file, name)?.is_some_and(|r| !r.is_stale(now_millis(), staleness)))
        })
    }

    fn read(&self, name: &str) -> LoaderResult<Vec<u8>> {
        fs::read(self.world_path(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoaderError::UnknownWorld(name.to_string()),
            _ => LoaderError::Io(e),
        })
    }

    /// Stage, fsync, rename over the old file, fsync the directory.
    fn write(&self, name: &str, bytes: &[u8]) -> LoaderResult<()> {
        let temp = self.temp_path(name);
        let mut file = File::create(&temp)?;
        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        drop(file);

        fs::rename(&temp, self.world_path(name))?;
        sync_directory(&self.dir)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> LoaderResult<()> {
        if !self.exists(name) {
            return Err(LoaderError::UnknownWorld(name.to_string()));
        }
        if self.lock_path(name).exists() {
            self.with_lock_file(name, |file| {
                match Self::read_record(file, name)? {
                    Some(record)
                        if record.blocks(self.owner, now_millis(), self.settings.staleness_millis()) =>
                    {
                        Err(LoaderError::WorldInUse(name.to_string()))
                    }
                    _ => Ok(()),
                }
            })?;
        }
        fs::remove_file(self.world_path(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoaderError::UnknownWorld(name.to_string()),
            _ => LoaderError::Io(e),
        })?;
        match fs::remove_file(self.lock_path(name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        sync_directory(&self.dir)
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> LoaderResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> LoaderResult<()> {
    Ok(())
}

#[async_trait]
impl LockRefresher for FileBackend {
    async fn refresh(&self, world: &str) -> LoaderResult<bool> {
        let backend = self.clone();
        let world = world.to_string();
        blocking(move || backend.refresh_record(&world)).await
    }
}

/// Owned copy of a world name that is safe to turn into a path.
fn checked(name: &str) -> LoaderResult<String> {
    validate_world_name(name)?;
    Ok(name.to_string())
}

async fn blocking<T, F>(f: F) -> LoaderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LoaderResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LoaderError::Io(io::Error::other(e)))?
}

/// Stores each world as a `.slime` file in one directory.
pub struct FileLoader {
    backend: Arc<FileBackend>,
    heartbeats: Heartbeats,
}

impl FileLoader {
    /// Opens (creating if needed) the worlds directory.
    pub fn new(dir: impl Into<PathBuf>, settings: LockSettings) -> LoaderResult<Self> {
        settings.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        if !dir.is_dir() {
            return Err(LoaderError::InvalidSettings(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let backend = FileBackend {
            dir,
            owner: LoaderId::new(),
            settings,
        };
        info!("File loader {} serving {}", backend.owner, backend.dir.display());
        Ok(Self {
            heartbeats: Heartbeats::new(settings.heartbeat_interval),
            backend: Arc::new(backend),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.backend.dir
    }

    /// Whether a heartbeat task is refreshing `name`.
    pub fn is_heartbeating(&self, name: &str) -> bool {
        self.heartbeats.is_running(name)
    }

    async fn run<T, F>(&self, f: F) -> LoaderResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileBackend) -> LoaderResult<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        blocking(move || f(backend.as_ref())).await
    }

    fn start_heartbeat(&self, name: &str) {
        self.heartbeats.start(name, self.backend.clone());
    }
}

#[async_trait]
impl SlimeLoader for FileLoader {
    fn id(&self) -> LoaderId {
        self.backend.owner
    }

    fn kind(&self) -> &'static str {
        "file"
    }

    async fn world_exists(&self, name: &str) -> LoaderResult<bool> {
        let name = checked(name)?;
        self.run(move |b| Ok(b.exists(&name))).await
    }

    async fn list_worlds(&self) -> LoaderResult<Vec<String>> {
        self.run(|b| b.list()).await
    }

    async fn load_world(&self, name: &str, read_only: bool) -> LoaderResult<Vec<u8>> {
        let world = checked(name)?;
        let bytes = self
            .run(move |b| {
                if !b.exists(&world) {
                    return Err(LoaderError::UnknownWorld(world));
                }
                if read_only {
                    return b.read(&world);
                }
                b.acquire(&world)?;
                b.read(&world).inspect_err(|_| {
                    if let Err(e) = b.release(&world, false) {
                        warn!("Failed to release lock on world {}: {}", world, e);
                    }
                })
            })
            .await?;

        if !read_only {
            self.start_heartbeat(name);
        }
        Ok(bytes)
    }

    async fn save_world(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()> {
        let world = checked(name)?;
        let data = bytes.to_vec();
        let was_beating = self.heartbeats.is_running(name);
        if !leave_locked {
            self.heartbeats.stop(name);
        }
        if let Err(e) = self.run(move |b| b.save(&world, &data, leave_locked)).await {
            // The record was left as it was, so keep it alive.
            if was_beating && !self.heartbeats.is_running(name) {
                self.start_heartbeat(name);
            }
            return Err(e);
        }

        if leave_locked && !self.heartbeats.is_running(name) {
            self.start_heartbeat(name);
        }
        Ok(())
    }

    async fn unlock_world(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        let world = checked(name)?;
        self.run(move |b| b.release(&world, false)).await
    }

    async fn is_world_locked(&self, name: &str) -> LoaderResult<bool> {
        let world = checked(name)?;
        self.run(move |b| b.is_locked(&world)).await
    }

    async fn delete_world(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        let world = checked(name)?;
        self.run(move |b| b.delete(&world)).await
    }

    async fn force_unlock(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        let world = checked(name)?;
        self.run(move |b| b.release(&world, true)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_settings() -> LockSettings {
        LockSettings::new(Duration::from_millis(300), Duration::from_millis(50)).unwrap()
    }

    fn lock_contents(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join(format!("{name}.slime.lock"))).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let loader = FileLoader::new(dir.path(), LockSettings::default()).unwrap();

        loader.save_world("lobby", b"world bytes", false).await.unwrap();
        assert!(loader.world_exists("lobby").await.unwrap());
        assert_eq!(loader.load_world("lobby", true).await.unwrap(), b"world bytes");
        assert_eq!(loader.list_worlds().await.unwrap(), vec!["lobby".to_string()]);
        assert!(!dir.path().join("lobby.slime.tmp").exists());
    }

    #[tokio::test]
    async fn test_unknown_world() {
        let dir = TempDir::new().unwrap();
        let loader = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        assert!(matches!(
            loader.load_world("ghost", false).await,
            Err(LoaderError::UnknownWorld(_))
        ));
        assert!(matches!(loader.delete_world("ghost").await, Err(LoaderError::UnknownWorld(_))));
        // A failed load must not leave a lock file behind.
        assert!(!dir.path().join("ghost.slime.lock").exists());
    }

    #[tokio::test]
    async fn test_second_writer_is_refused() {
        let dir = TempDir::new().unwrap();
        let first = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        let second = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        first.save_world("arena", b"v1", false).await.unwrap();

        first.load_world("arena", false).await.unwrap();
        assert!(first.is_heartbeating("arena"));
        assert!(matches!(
            second.load_world("arena", false).await,
            Err(LoaderError::WorldInUse(_))
        ));
        // Read-only access never looks at the lock.
        assert_eq!(second.load_world("arena", true).await.unwrap(), b"v1");
        assert!(second.is_world_locked("arena").await.unwrap());

        // Unlocking from the wrong loader is a no-op.
        second.unlock_world("arena").await.unwrap();
        assert!(first.is_world_locked("arena").await.unwrap());

        first.unlock_world("arena").await.unwrap();
        second.load_world("arena", false).await.unwrap();
        second.unlock_world("arena").await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_by_owner_is_allowed() {
        let dir = TempDir::new().unwrap();
        let loader = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        loader.save_world("hub", b"x", true).await.unwrap();
        loader.load_world("hub", false).await.unwrap();
        loader.unlock_world("hub").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_leave_locked() {
        let dir = TempDir::new().unwrap();
        let owner = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        let other = FileLoader::new(dir.path(), LockSettings::default()).unwrap();

        owner.save_world("build", b"a", true).await.unwrap();
        assert!(owner.is_heartbeating("build"));
        assert!(matches!(other.load_world("build", false).await, Err(LoaderError::WorldInUse(_))));

        owner.save_world("build", b"b", false).await.unwrap();
        assert!(!owner.is_heartbeating("build"));
        assert_eq!(other.load_world("build", false).await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let crashed = FileLoader::new(dir.path(), fast_settings()).unwrap();
        crashed.save_world("pvp", b"p", false).await.unwrap();
        crashed.load_world("pvp", false).await.unwrap();
        // Dropping without unlocking stops the heartbeat but leaves the record.
        drop(crashed);

        let survivor = FileLoader::new(dir.path(), fast_settings()).unwrap();
        assert!(matches!(
            survivor.load_world("pvp", false).await,
            Err(LoaderError::WorldInUse(_))
        ));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!survivor.is_world_locked("pvp").await.unwrap());
        survivor.load_world("pvp", false).await.unwrap();
        assert!(lock_contents(dir.path(), "pvp").contains(&survivor.id().to_string()));
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lock_alive() {
        let dir = TempDir::new().unwrap();
        let holder = FileLoader::new(dir.path(), fast_settings()).unwrap();
        let other = FileLoader::new(dir.path(), fast_settings()).unwrap();
        holder.save_world("spawn", b"s", false).await.unwrap();
        holder.load_world("spawn", false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(other.load_world("spawn", false).await, Err(LoaderError::WorldInUse(_))));
    }

    #[tokio::test]
    async fn test_no_dangling_heartbeat_after_unlock() {
        let dir = TempDir::new().unwrap();
        let loader = FileLoader::new(dir.path(), fast_settings()).unwrap();
        loader.save_world("event", b"e", false).await.unwrap();
        loader.load_world("event", false).await.unwrap();
        loader.unlock_world("event").await.unwrap();

        assert!(!loader.is_heartbeating("event"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(lock_contents(dir.path(), "event").is_empty());
        assert!(!loader.is_world_locked("event").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_refused_while_another_owner_holds_the_world() {
        let dir = TempDir::new().unwrap();
        let owner = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        let intruder = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        owner.save_world("w", b"owner data", true).await.unwrap();

        for leave_locked in [true, false] {
            assert!(matches!(
                intruder.save_world("w", b"intruder", leave_locked).await,
                Err(LoaderError::WorldInUse(_))
            ));
        }
        assert_eq!(owner.load_world("w", true).await.unwrap(), b"owner data");
        assert!(lock_contents(dir.path(), "w").contains(&owner.id().to_string()));
        assert!(!dir.path().join("w.slime.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_refused_while_locked_elsewhere() {
        let dir = TempDir::new().unwrap();
        let holder = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        let other = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        holder.save_world("keep", b"k", true).await.unwrap();

        assert!(matches!(other.delete_world("keep").await, Err(LoaderError::WorldInUse(_))));
        assert!(other.world_exists("keep").await.unwrap());

        // The owner itself may delete.
        holder.delete_world("keep").await.unwrap();
        assert!(!holder.is_heartbeating("keep"));
        assert!(!other.world_exists("keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_names_cannot_escape_the_directory() {
        let root = TempDir::new().unwrap();
        let worlds = root.path().join("worlds");
        let loader = FileLoader::new(&worlds, LockSettings::default()).unwrap();
        fs::write(root.path().join("outside.slime"), b"x").unwrap();

        for name in ["../outside", "a/b", ".."] {
            assert!(matches!(
                loader.save_world(name, b"y", false).await,
                Err(LoaderError::InvalidWorldName(_))
            ));
            assert!(matches!(
                loader.delete_world(name).await,
                Err(LoaderError::InvalidWorldName(_))
            ));
            assert!(matches!(
                loader.load_world(name, true).await,
                Err(LoaderError::InvalidWorldName(_))
            ));
        }
        assert_eq!(fs::read(root.path().join("outside.slime")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_force_unlock_and_delete() {
        let dir = TempDir::new().unwrap();
        let holder = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        let operator = FileLoader::new(dir.path(), LockSettings::default()).unwrap();
        holder.save_world("old", b"o", true).await.unwrap();

        operator.force_unlock("old").await.unwrap();
        assert!(!operator.is_world_locked("old").await.unwrap());

        operator.delete_world("old").await.unwrap();
        assert!(!operator.world_exists("old").await.unwrap());
        assert!(!dir.path().join("old.slime.lock").exists());
    }
}
