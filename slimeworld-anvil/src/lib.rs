//! Imports anvil (`.mca`) worlds into slime worlds.

pub mod compression;
pub mod error;
pub mod importer;
pub mod nbt;
pub mod region;

pub use compression::CompressionScheme;
pub use error::{ImportError, ImportResult};
pub use importer::{IMPORTED_BIOMES_KEY, WorldImporter};
pub use region::{RegionFile, RegionWriter};
