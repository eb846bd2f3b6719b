//! In-memory world model and the Slime region binary format.
//!
//! A world is a sparse set of chunks plus world-level extra data and
//! properties. [`codec::serialize`] and [`codec::deserialize`] move it to and
//! from the versioned byte layout; anything that cannot be decoded cleanly
//! fails the whole world.

pub mod buffer;
pub mod chunk;
pub mod codec;
pub mod compression;
pub mod error;
pub mod nibble;
pub mod palette;
pub mod version;
pub mod world;

pub use chunk::{BlockState, BlockStorage, Chunk, Compound, SECTION_COUNT, Section};
pub use codec::{deserialize, read_header, serialize};
pub use error::{FormatError, FormatResult, SubBlock};
pub use nibble::NibbleArray;
pub use version::LATEST_VERSION;
pub use world::{Difficulty, Environment, World, WorldProperties, chunk_key, unpack_chunk_key};
