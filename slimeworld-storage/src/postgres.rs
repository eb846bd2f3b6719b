use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::lock::{Heartbeats, LockRefresher, now_millis};
use crate::{LoaderError, LoaderId, LoaderResult, LockSettings, SlimeLoader};

#[derive(Clone)]
struct PgBackend {
    pool: Pool,
    owner: LoaderId,
    settings: LockSettings,
}

impl PgBackend {
    /// Oldest heartbeat that still counts as alive.
    fn stale_before(&self) -> i64 {
        now_millis().saturating_sub(self.settings.staleness_millis()) as i64
    }

    async fn acquire(&self, name: &str) -> LoaderResult<()> {
        let client = self.pool.get().await?;
        let owner = self.owner.to_string();
        // Single statement so two loaders cannot both see the lock as free.
        let rows = client
            .query(
                "UPDATE slime_worlds SET locked_by = $2, heartbeat = $3
                 WHERE name = $1 AND (locked_by IS NULL OR locked_by = $2 OR heartbeat < $4)
                 RETURNING name",
                &[&name, &owner, &(now_millis() as i64), &self.stale_before()],
            )
            .await?;
        if !rows.is_empty() {
            return Ok(());
        }

        let exists = client
            .query_opt("SELECT 1 FROM slime_worlds WHERE name = $1", &[&name])
            .await?
            .is_some();
        Err(if exists {
            LoaderError::WorldInUse(name.to_string())
        } else {
            LoaderError::UnknownWorld(name.to_string())
        })
    }

    async fn release(&self, name: &str, force: bool) -> LoaderResult<()> {
        let client = self.pool.get().await?;
        if force {
            client
                .execute("UPDATE slime_worlds SET locked_by = NULL WHERE name = $1", &[&name])
                .await?;
        } else {
            client
                .execute(
                    "UPDATE slime_worlds SET locked_by = NULL WHERE name = $1 AND locked_by = $2",
                    &[&name, &self.owner.to_string()],
                )
                .await?;
        }
        Ok(())
    }

    async fn read(&self, name: &str) -> LoaderResult<Vec<u8>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT world FROM slime_worlds WHERE name = $1", &[&name])
            .await?;
        match row {
            Some(row) => Ok(row.get(0)),
            None => Err(LoaderError::UnknownWorld(name.to_string())),
        }
    }
}

#[async_trait]
impl LockRefresher for PgBackend {
    async fn refresh(&self, world: &str) -> LoaderResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE slime_worlds SET heartbeat = $3 WHERE name = $1 AND locked_by = $2",
                &[&world, &self.owner.to_string(), &(now_millis() as i64)],
            )
            .await?;
        Ok(updated == 1)
    }
}

/// Stores worlds as rows of a `slime_worlds` table.
pub struct PostgresLoader {
    backend: Arc<PgBackend>,
    heartbeats: Heartbeats,
}

impl PostgresLoader {
    pub async fn new(connection_string: &str, settings: LockSettings) -> LoaderResult<Self> {
        settings.validate()?;

        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let loader = Self {
            heartbeats: Heartbeats::new(settings.heartbeat_interval),
            backend: Arc::new(PgBackend {
                pool,
                owner: LoaderId::new(),
                settings,
            }),
        };
        // Ensure connections work and schema exists
        loader.init_schema().await?;
        info!("Postgres loader {} connected", loader.backend.owner);
        Ok(loader)
    }

    async fn init_schema(&self) -> LoaderResult<()> {
        let client = self.backend.pool.get().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS slime_worlds (
                    name TEXT PRIMARY KEY,
                    world BYTEA NOT NULL,
                    locked_by TEXT NULL,
                    heartbeat BIGINT NOT NULL DEFAULT 0
                );",
            )
            .await?;
        Ok(())
    }

    pub fn is_heartbeating(&self, name: &str) -> bool {
        self.heartbeats.is_running(name)
    }
}

#[async_trait]
impl SlimeLoader for PostgresLoader {
    fn id(&self) -> LoaderId {
        self.backend.owner
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn world_exists(&self, name: &str) -> LoaderResult<bool> {
        let client = self.backend.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM slime_worlds WHERE name = $1", &[&name])
            .await?;
        Ok(row.is_some())
    }

    async fn list_worlds(&self) -> LoaderResult<Vec<String>> {
        let client = self.backend.pool.get().await?;
        let rows = client
            .query("SELECT name FROM slime_worlds ORDER BY name", &[])
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn load_world(&self, name: &str, read_only: bool) -> LoaderResult<Vec<u8>> {
        if read_only {
            return self.backend.read(name).await;
        }

        self.backend.acquire(name).await?;
        match self.backend.read(name).await {
            Ok(bytes) => {
                self.heartbeats.start(name, self.backend.clone());
                Ok(bytes)
            }
            Err(e) => {
                if let Err(unlock) = self.backend.release(name, false).await {
                    warn!("Failed to release lock on world {}: {}", name, unlock);
                }
                Err(e)
            }
        }
    }

    async fn save_world(&self, name: &str, bytes: &[u8], leave_locked: bool) -> LoaderResult<()> {
        {
            let client = self.backend.pool.get().await?;
            // The conditional upsert never replaces a world another live
            // owner holds; zero affected rows means the lock was taken.
            let written = client
                .execute(
                    "INSERT INTO slime_worlds (name, world) VALUES ($1, $2)
                     ON CONFLICT (name) DO UPDATE SET world = EXCLUDED.world
                     WHERE slime_worlds.locked_by IS NULL
                        OR slime_worlds.locked_by = $3
                        OR slime_worlds.heartbeat < $4",
                    &[&name, &bytes, &self.backend.owner.to_string(), &self.backend.stale_before()],
                )
                .await?;
            if written == 0 {
                return Err(LoaderError::WorldInUse(name.to_string()));
            }
        }

        if leave_locked {
            self.backend.acquire(name).await?;
            if !self.heartbeats.is_running(name) {
                self.heartbeats.start(name, self.backend.clone());
            }
        } else {
            self.heartbeats.stop(name);
            self.backend.release(name, false).await?;
        }
        Ok(())
    }

    async fn unlock_world(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        self.backend.release(name, false).await
    }

    async fn is_world_locked(&self, name: &str) -> LoaderResult<bool> {
        let client = self.backend.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT locked_by IS NOT NULL AND heartbeat >= $2 FROM slime_worlds WHERE name = $1",
                &[&name, &self.backend.stale_before()],
            )
            .await?;
        match row {
            Some(row) => Ok(row.get(0)),
            None => Err(LoaderError::UnknownWorld(name.to_string())),
        }
    }

    async fn delete_world(&self, name: &str) -> LoaderResult<()> {
        let client = self.backend.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM slime_worlds
                 WHERE name = $1 AND (locked_by IS NULL OR locked_by = $2 OR heartbeat < $3)",
                &[&name, &self.backend.owner.to_string(), &self.backend.stale_before()],
            )
            .await?;
        if deleted == 0 {
            let exists = client
                .query_opt("SELECT 1 FROM slime_worlds WHERE name = $1", &[&name])
                .await?
                .is_some();
            return Err(if exists {
                LoaderError::WorldInUse(name.to_string())
            } else {
                LoaderError::UnknownWorld(name.to_string())
            });
        }
        self.heartbeats.stop(name);
        Ok(())
    }

    async fn force_unlock(&self, name: &str) -> LoaderResult<()> {
        self.heartbeats.stop(name);
        self.backend.release(name, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a reachable server: DATABASE_URL=postgres://... cargo test -- --ignored
    async fn connect() -> PostgresLoader {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PostgresLoader::new(&url, LockSettings::default()).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_lock_protocol() {
        let a = connect().await;
        let b = connect().await;
        let name = format!("test_{}", LoaderId::new());

        a.save_world(&name, b"bytes", false).await.unwrap();
        assert_eq!(a.load_world(&name, false).await.unwrap(), b"bytes");
        assert!(matches!(b.load_world(&name, false).await, Err(LoaderError::WorldInUse(_))));
        assert!(b.is_world_locked(&name).await.unwrap());

        a.unlock_world(&name).await.unwrap();
        assert!(!a.is_heartbeating(&name));
        b.load_world(&name, false).await.unwrap();
        b.delete_world(&name).await.unwrap();
        assert!(!a.world_exists(&name).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_held_world_is_not_overwritten() {
        let a = connect().await;
        let b = connect().await;
        let name = format!("test_{}", LoaderId::new());

        a.save_world(&name, b"owner data", true).await.unwrap();
        assert!(matches!(
            b.save_world(&name, b"intruder", false).await,
            Err(LoaderError::WorldInUse(_))
        ));
        assert!(matches!(b.delete_world(&name).await, Err(LoaderError::WorldInUse(_))));
        assert_eq!(b.load_world(&name, true).await.unwrap(), b"owner data");

        a.delete_world(&name).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_unknown_world() {
        let a = connect().await;
        assert!(matches!(
            a.load_world("definitely_missing_world", false).await,
            Err(LoaderError::UnknownWorld(_))
        ));
    }
}
