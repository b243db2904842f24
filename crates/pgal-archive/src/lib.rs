//! pgal-archive: everything that turns a group of assets into bytes and back
//!
//! # Overview
//! - `archive`: tar-like name → bytes container (512-byte blocks, octal sizes)
//! - `compress`: optional deflate pass over a packed archive, detected by magic
//! - `names`: `thumbN` / `assetN` / `videoN` entry naming and id recovery
//! - `manifest`: album index (chunk ranges, month groups) with validation
//! - `hash`: BLAKE3 content hashing (manifest change detection)

pub mod archive;
pub mod compress;
pub mod hash;
pub mod manifest;
pub mod names;

pub use archive::{pack, unpack, Archive, BLOCK_SIZE};
pub use compress::{compress, decompress, is_compressed};
pub use hash::{hash_bytes, hash_to_hex, Hash};
pub use manifest::{month_groups, month_key, ChunkEntry, Manifest, MonthGroup};
pub use names::{entry_name, parse_entry_id, META_ENTRY};
