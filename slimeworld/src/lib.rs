//! Slime world management: ties the codec, loaders, upgrader and importer
//! together behind [`SlimeManager`].

pub mod config;
pub mod error;
pub mod manager;
pub mod registry;

pub use config::Config;
pub use error::{SlimeError, SlimeResult};
pub use manager::{SlimeManager, WorldInfo, WorldRuntimeBridge};
pub use registry::LoaderRegistry;
