//! Manifest-hash cache validation.
//!
//! When the hash matches, stored entries are trusted as-is: chunks are
//! assumed never to change without the manifest changing.

use pgal_archive::{hash_bytes, hash_to_hex};
use pgal_core::GalleryResult;

use crate::store::DiskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheVerdict {
    /// No hash was recorded; this one is now
    FirstSeen,
    Unchanged,
    /// The manifest changed; the store was wiped
    Invalidated,
}

/// Compare the decrypted manifest against the hash recorded in `store`.
pub async fn validate_cache(store: &DiskStore, manifest: &[u8]) -> GalleryResult<CacheVerdict> {
    let hash = hash_to_hex(&hash_bytes(manifest));
    let verdict = match store.manifest_hash().await? {
        None => {
            store.set_manifest_hash(&hash).await?;
            CacheVerdict::FirstSeen
        }
        Some(recorded) if recorded == hash => CacheVerdict::Unchanged,
        Some(recorded) => {
            tracing::info!(old = %recorded, new = %hash, "album manifest changed, dropping cached assets");
            store.clear().await?;
            store.set_manifest_hash(&hash).await?;
            CacheVerdict::Invalidated
        }
    };
    tracing::debug!(?verdict, "cache validated");
    Ok(verdict)
}
