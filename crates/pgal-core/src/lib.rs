//! pgal-core: types shared by the album producer and the viewer
//!
//! - `types`: asset ids, asset/archive kinds, per-asset metadata records
//! - `error`: the `GalleryError` taxonomy used across every crate
//! - `config`: `pgal.toml` schema

pub mod config;
pub mod error;
pub mod types;

pub use error::{GalleryError, GalleryResult, OPEN_FAILURE_MESSAGE};
pub use types::{ArchiveKind, AssetId, AssetKind, AssetMeta, ChunkId, MANIFEST_FILE};
