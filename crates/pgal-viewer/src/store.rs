//! Persistent store for decoded assets.
//!
//! One directory per album under the cache root, named by a hash of the
//! album name. Entries are written atomically (temp → rename).
//!
//! Layout: `{cache_dir}/{album_hash}/{partition}/{id}` plus two bookkeeping
//! files: `manifest.hash` (last validated manifest) and `generation`
//! (bumped on every wipe).

use pgal_archive::{hash_bytes, hash_to_hex};
use pgal_core::{ArchiveKind, AssetId, GalleryResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

const HASH_FILE: &str = "manifest.hash";
const GENERATION_FILE: &str = "generation";

/// Named key space within an album's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Archive(ArchiveKind),
    /// Per-asset `{date, type}` records
    Meta,
}

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::Archive(ArchiveKind::Thumbnails),
        Partition::Archive(ArchiveKind::Originals),
        Partition::Archive(ArchiveKind::Videos),
        Partition::Meta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Partition::Archive(kind) => kind.partition(),
            Partition::Meta => "meta",
        }
    }
}

impl From<ArchiveKind> for Partition {
    fn from(kind: ArchiveKind) -> Self {
        Partition::Archive(kind)
    }
}

pub struct DiskStore {
    dir: PathBuf,
    generation: AtomicU64,
}

impl DiskStore {
    /// Open (creating if needed) the store for `album` under `cache_dir`.
    pub async fn open(cache_dir: &Path, album: &str) -> GalleryResult<Self> {
        let album_key = hash_to_hex(&hash_bytes(album.as_bytes()));
        let dir = cache_dir.join(&album_key[..32]);
        fs::create_dir_all(&dir).await?;

        let generation = match fs::read_to_string(dir.join(GENERATION_FILE)).await {
            Ok(s) => s.trim().parse().unwrap_or(0),
            Err(_) => 0,
        };
        tracing::debug!(album, dir = %dir.display(), generation, "store opened");
        Ok(DiskStore {
            dir,
            generation: AtomicU64::new(generation),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, partition: Partition, id: AssetId) -> PathBuf {
        self.dir.join(partition.name()).join(id.to_string())
    }

    /// Look up an entry. Returns `None` if not stored.
    pub async fn get(&self, partition: Partition, id: AssetId) -> GalleryResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(partition, id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an entry atomically, replacing any previous value.
    pub async fn put(&self, partition: Partition, id: AssetId, data: &[u8]) -> GalleryResult<()> {
        let path = self.path_for(partition, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, data).await
    }

    pub async fn contains(&self, partition: Partition, id: AssetId) -> bool {
        fs::try_exists(self.path_for(partition, id)).await.unwrap_or(false)
    }

    /// Bumped by every [`DiskStore::clear`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop every entry and the recorded manifest hash.
    pub async fn clear(&self) -> GalleryResult<()> {
        for partition in Partition::ALL {
            match fs::remove_dir_all(self.dir.join(partition.name())).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        match fs::remove_file(self.dir.join(HASH_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        write_atomic(&self.dir.join(GENERATION_FILE), next.to_string().as_bytes()).await?;
        tracing::info!(dir = %self.dir.display(), generation = next, "store cleared");
        Ok(())
    }

    pub async fn manifest_hash(&self) -> GalleryResult<Option<String>> {
        match fs::read_to_string(self.dir.join(HASH_FILE)).await {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_manifest_hash(&self, hash: &str) -> GalleryResult<()> {
        write_atomic(&self.dir.join(HASH_FILE), hash.as_bytes()).await
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> GalleryResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), "album").await.unwrap();

        store.put(ArchiveKind::Thumbnails.into(), 7, b"hello").await.unwrap();
        let got = store.get(ArchiveKind::Thumbnails.into(), 7).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
        assert!(store.contains(ArchiveKind::Thumbnails.into(), 7).await);
    }

    #[tokio::test]
    async fn partitions_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), "album").await.unwrap();
        store.put(ArchiveKind::Originals.into(), 1, b"o").await.unwrap();
        assert!(store.get(ArchiveKind::Videos.into(), 1).await.unwrap().is_none());
        assert!(store.get(Partition::Meta, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn albums_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let a = DiskStore::open(dir.path(), "a").await.unwrap();
        let b = DiskStore::open(dir.path(), "b").await.unwrap();
        a.put(Partition::Meta, 0, b"x").await.unwrap();
        assert!(b.get(Partition::Meta, 0).await.unwrap().is_none());
        assert_ne!(a.dir(), b.dir());
    }

    #[tokio::test]
    async fn clear_wipes_and_bumps_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), "album").await.unwrap();
        store.put(ArchiveKind::Thumbnails.into(), 0, b"t").await.unwrap();
        store.set_manifest_hash("abc").await.unwrap();
        assert_eq!(store.generation(), 0);

        store.clear().await.unwrap();
        assert_eq!(store.generation(), 1);
        assert!(store.get(ArchiveKind::Thumbnails.into(), 0).await.unwrap().is_none());
        assert!(store.manifest_hash().await.unwrap().is_none());

        // Generation survives reopening
        let reopened = DiskStore::open(dir.path(), "album").await.unwrap();
        assert_eq!(reopened.generation(), 1);
    }
}
