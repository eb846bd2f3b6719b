use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use slimeworld_storage::{FileLoader, PostgresLoader, SlimeLoader};

use crate::config::Config;
use crate::error::{SlimeError, SlimeResult};

/// Loaders by data-source name (`file`, `postgres`, or anything registered).
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Arc<dyn SlimeLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the configured sources. An unreachable database is logged and
    /// skipped so file-backed worlds stay usable.
    pub async fn from_config(config: &Config) -> SlimeResult<Self> {
        let settings = config.lock.settings()?;
        let mut registry = Self::new();

        if let Some(file) = &config.sources.file {
            let loader = FileLoader::new(&file.path, settings)?;
            registry.register("file", Arc::new(loader))?;
        }

        if let Some(postgres) = &config.sources.postgres {
            match PostgresLoader::new(&postgres.url, settings).await {
                Ok(loader) => registry.register("postgres", Arc::new(loader))?,
                Err(e) => warn!("Postgres source unavailable: {}", e),
            }
        }

        info!("Registered data sources: {}", registry.names().join(", "));
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, loader: Arc<dyn SlimeLoader>) -> SlimeResult<()> {
        if self.loaders.contains_key(name) {
            return Err(SlimeError::InvalidArgument(format!(
                "data source '{name}' is already registered"
            )));
        }
        self.loaders.insert(name.to_string(), loader);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SlimeResult<Arc<dyn SlimeLoader>> {
        self.loaders
            .get(name)
            .cloned()
            .ok_or_else(|| SlimeError::UnknownLoader(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.loaders.keys().map(String::as_str).collect()
    }

    /// Data-source name a loader was registered under.
    pub fn name_of(&self, loader: &dyn SlimeLoader) -> Option<&str> {
        self.loaders
            .iter()
            .find(|(_, l)| slimeworld_storage::same_loader(l.as_ref(), loader))
            .map(|(name, _)| name.as_str())
    }
}
