//! Lock records and the heartbeat tasks that keep them alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{LoaderId, LoaderResult};

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Who holds a world and when they last proved they are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: LoaderId,
    /// Unix millis of the last refresh.
    pub heartbeat: u64,
}

impl LockRecord {
    pub fn new(owner: LoaderId) -> Self {
        Self {
            owner,
            heartbeat: now_millis(),
        }
    }

    pub fn is_stale(&self, now: u64, staleness_millis: u64) -> bool {
        now.saturating_sub(self.heartbeat) > staleness_millis
    }

    /// Held by someone other than `owner` who is still refreshing.
    pub fn blocks(&self, owner: LoaderId, now: u64, staleness_millis: u64) -> bool {
        self.owner != owner && !self.is_stale(now, staleness_millis)
    }
}

/// Backend hook used by heartbeat tasks.
#[async_trait]
pub trait LockRefresher: Send + Sync {
    /// Bumps the heartbeat if the lock still names this loader. Returns
    /// `false` when the lock is gone or owned by someone else, in which case
    /// nothing is written.
    async fn refresh(&self, world: &str) -> LoaderResult<bool>;
}

/// Heartbeat tasks of one loader, keyed by world name.
///
/// Tasks are aborted when stopped or when the registry is dropped.
pub struct Heartbeats {
    interval: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Heartbeats {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts refreshing `world`, replacing any task already running for it.
    pub fn start(&self, world: &str, refresher: Arc<dyn LockRefresher>) {
        let name = world.to_string();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the lock was just written.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match refresher.refresh(&name).await {
                    Ok(true) => debug!("Refreshed lock on world {}", name),
                    Ok(false) => {
                        warn!("Lost lock on world {}, stopping heartbeat", name);
                        break;
                    }
                    Err(e) => warn!("Failed to refresh lock on world {}: {}", name, e),
                }
            }
        });

        if let Some(previous) = self.tasks.lock().insert(world.to_string(), handle) {
            previous.abort();
        }
    }

    /// Stops the task for `world`, if any. Call before releasing the lock.
    pub fn stop(&self, world: &str) {
        if let Some(handle) = self.tasks.lock().remove(world) {
            handle.abort();
        }
    }

    pub fn is_running(&self, world: &str) -> bool {
        self.tasks
            .lock()
            .get(world)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Heartbeats {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        keep: bool,
    }

    #[async_trait]
    impl LockRefresher for Counting {
        async fn refresh(&self, _world: &str) -> LoaderResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keep)
        }
    }

    #[test]
    fn test_staleness() {
        let owner = LoaderId::new();
        let record = LockRecord {
            owner,
            heartbeat: 1_000,
        };
        assert!(!record.is_stale(1_500, 500));
        assert!(record.is_stale(1_501, 500));
        assert!(!record.blocks(owner, 10_000, 500));
        assert!(record.blocks(LoaderId::new(), 1_200, 500));
        // A clock that went backwards never makes a lock stale.
        assert!(!record.is_stale(0, 500));
    }

    #[test]
    fn test_record_json_shape() {
        let record = LockRecord::new(LoaderId::new());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"owner\":\""));
        assert_eq!(serde_json::from_str::<LockRecord>(&json).unwrap(), record);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_until_stopped() {
        let heartbeats = Heartbeats::new(Duration::from_millis(10));
        let refresher = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            keep: true,
        });
        heartbeats.start("lobby", refresher.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(heartbeats.is_running("lobby"));

        heartbeats.stop("lobby");
        assert!(!heartbeats.is_running("lobby"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = refresher.calls.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_heartbeat_ends_when_lock_lost() {
        let heartbeats = Heartbeats::new(Duration::from_millis(10));
        heartbeats.start(
            "arena",
            Arc::new(Counting {
                calls: AtomicUsize::new(0),
                keep: false,
            }),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!heartbeats.is_running("arena"));
    }
}
