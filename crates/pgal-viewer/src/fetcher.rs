//! Lazy chunk fetcher.
//!
//! Each (archive kind, chunk) pair moves through
//! `unrequested → in-flight → ready | failed`. While in flight, every caller
//! holds a receiver on the same watch channel, so N concurrent requests cost
//! one fetch and one decode pass. The fetch runs in its own task and is
//! never cancelled while the fetcher is live. A failure is delivered to all
//! waiters and left in place; the next explicit request starts over.
//!
//! [`ChunkFetcher::shutdown`] stops every load: a fetch or decode still
//! running is dropped, a load already writing stops before its next store
//! write, and the call returns only once no load task is left. Nothing a
//! closed session decoded can land in the store afterwards.
//!
//! A `ready` chunk is only trusted while the store generation it was
//! written under is current.

use pgal_archive::{parse_entry_id, unpack, Manifest, META_ENTRY};
use pgal_core::{ArchiveKind, AssetId, AssetMeta, ChunkId, GalleryError, GalleryResult};
use pgal_crypto::AlbumKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::ChunkSource;
use crate::store::{DiskStore, Partition};

type Outcome = Result<(), Arc<GalleryError>>;
type SlotKey = (ArchiveKind, ChunkId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Unrequested,
    InFlight,
    Ready,
    Failed,
}

enum Slot {
    InFlight(watch::Receiver<Option<Outcome>>),
    Ready { generation: u64 },
    Failed(Arc<GalleryError>),
}

/// What a caller waits on after [`ChunkFetcher::request`].
pub enum ChunkWait {
    Ready,
    Pending(watch::Receiver<Option<Outcome>>),
}

impl ChunkWait {
    pub async fn wait(self, kind: ArchiveKind, chunk: ChunkId) -> GalleryResult<()> {
        let mut rx = match self {
            ChunkWait::Ready => return Ok(()),
            ChunkWait::Pending(rx) => rx,
        };
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            // Fetch task dropped without reporting: the runtime is going away
            Err(_) => return Err(GalleryError::SessionClosed),
        };
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(GalleryError::ChunkFailed {
                kind,
                chunk,
                source,
            }),
            None => Err(GalleryError::SessionClosed),
        }
    }
}

struct Inner<S> {
    source: S,
    key: AlbumKey,
    manifest: Arc<Manifest>,
    store: Arc<DiskStore>,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    decodes: AtomicU64,
    loads: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

pub struct ChunkFetcher<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ChunkFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Inner<S> {
    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn loads(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.loads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: ChunkSource> ChunkFetcher<S> {
    pub fn new(source: S, key: AlbumKey, manifest: Arc<Manifest>, store: Arc<DiskStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                key,
                manifest,
                store,
                slots: Mutex::new(HashMap::new()),
                decodes: AtomicU64::new(0),
                loads: Mutex::new(JoinSet::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    pub fn store(&self) -> &DiskStore {
        &self.inner.store
    }

    /// Completed decode passes so far.
    pub fn decode_count(&self) -> u64 {
        self.inner.decodes.load(Ordering::SeqCst)
    }

    pub fn state(&self, kind: ArchiveKind, chunk: ChunkId) -> ChunkState {
        let generation = self.inner.store.generation();
        match self.inner.slots().get(&(kind, chunk)) {
            None => ChunkState::Unrequested,
            Some(Slot::InFlight(_)) => ChunkState::InFlight,
            Some(Slot::Ready { generation: g }) if *g == generation => ChunkState::Ready,
            Some(Slot::Ready { .. }) => ChunkState::Unrequested,
            Some(Slot::Failed(_)) => ChunkState::Failed,
        }
    }

    /// Stop accepting requests and wait until every load task has ended.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut loads = std::mem::take(&mut *self.inner.loads());
        while let Some(joined) = loads.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    warn!("chunk load task failed: {e}");
                }
            }
        }
        debug!("chunk fetcher stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Ensure `(kind, chunk)` is ready or on its way. Starts a fetch only if
    /// none is in flight and no current copy is stored.
    pub fn request(&self, kind: ArchiveKind, chunk: ChunkId) -> GalleryResult<ChunkWait> {
        if self.inner.shutdown.is_cancelled() {
            return Err(GalleryError::SessionClosed);
        }
        let entry = self
            .inner
            .manifest
            .chunk(chunk)
            .ok_or_else(|| GalleryError::MalformedManifest(format!("no chunk {chunk}")))?;
        let file = entry
            .file(kind)
            .ok_or_else(|| GalleryError::UnknownAsset(entry.start_index))?
            .to_string();

        let generation = self.inner.store.generation();
        let mut slots = self.inner.slots();
        match slots.get(&(kind, chunk)) {
            Some(Slot::Ready { generation: g }) if *g == generation => return Ok(ChunkWait::Ready),
            Some(Slot::InFlight(rx)) => return Ok(ChunkWait::Pending(rx.clone())),
            Some(Slot::Failed(e)) => debug!(%kind, chunk, "retrying failed chunk: {e}"),
            _ => {}
        }

        let (tx, rx) = watch::channel(None);
        slots.insert((kind, chunk), Slot::InFlight(rx.clone()));
        drop(slots);

        debug!(%kind, chunk, file = %file, "chunk fetch started");
        let inner = Arc::clone(&self.inner);
        let mut loads = self.inner.loads();
        // reap finished loads so the set only holds live ones
        while loads.try_join_next().is_some() {}
        loads.spawn(async move {
            let outcome = inner.load(kind, chunk, &file).await.map_err(Arc::new);
            {
                let mut slots = inner.slots();
                let slot = match &outcome {
                    Ok(()) => Slot::Ready { generation },
                    Err(e) => Slot::Failed(Arc::clone(e)),
                };
                slots.insert((kind, chunk), slot);
            }
            match &outcome {
                Ok(()) => debug!(%kind, chunk, "chunk ready"),
                Err(e) => warn!(%kind, chunk, "chunk failed: {e}"),
            }
            let _ = tx.send(Some(outcome));
        });
        Ok(ChunkWait::Pending(rx))
    }

    /// Bytes of asset `id` in `kind`, fetching its chunk if necessary.
    pub async fn get_asset(&self, kind: ArchiveKind, id: AssetId) -> GalleryResult<Vec<u8>> {
        self.lookup(kind, Partition::Archive(kind), id).await
    }

    /// `{date, type}` of asset `id`, from its thumbnails chunk.
    pub async fn asset_meta(&self, id: AssetId) -> GalleryResult<AssetMeta> {
        let bytes = self.lookup(ArchiveKind::Thumbnails, Partition::Meta, id).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GalleryError::Other(anyhow::anyhow!("stored metadata for {id}: {e}")))
    }

    async fn lookup(&self, kind: ArchiveKind, partition: Partition, id: AssetId) -> GalleryResult<Vec<u8>> {
        let store = &self.inner.store;
        if let Some(bytes) = store.get(partition, id).await? {
            return Ok(bytes);
        }
        let chunk = self
            .inner
            .manifest
            .chunk_for(id)
            .ok_or(GalleryError::UnknownAsset(id))?;
        if chunk.file(kind).is_none() {
            return Err(GalleryError::UnknownAsset(id));
        }
        let chunk_id = chunk.chunk_id;
        self.request(kind, chunk_id)?.wait(kind, chunk_id).await?;
        store
            .get(partition, id)
            .await?
            .ok_or(GalleryError::UnknownAsset(id))
    }
}

impl<S: ChunkSource> Inner<S> {
    /// fetch → open → inflate → unpack → store
    async fn load(&self, kind: ArchiveKind, chunk: ChunkId, file: &str) -> GalleryResult<()> {
        // Nothing is written before decoding finishes, so dropping this is safe
        let archive = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(GalleryError::SessionClosed),
            decoded = self.fetch_and_decode(file) => decoded?,
        };

        let range = self
            .manifest
            .chunk(chunk)
            .map(|c| c.start_index..=c.end_index)
            .ok_or_else(|| GalleryError::MalformedManifest(format!("no chunk {chunk}")))?;

        let mut stored = 0usize;
        for (name, bytes) in archive.into_entries() {
            if kind == ArchiveKind::Thumbnails && name == META_ENTRY {
                let records: BTreeMap<String, AssetMeta> = serde_json::from_slice(&bytes)
                    .map_err(|e| GalleryError::MalformedArchive(format!("{file}: {META_ENTRY}: {e}")))?;
                for (id, meta) in records {
                    match id.parse::<AssetId>() {
                        Ok(id) if range.contains(&id) => {
                            let json = serde_json::to_vec(&meta)
                                .map_err(|e| GalleryError::Other(anyhow::anyhow!("metadata: {e}")))?;
                            self.put(Partition::Meta, id, &json).await?;
                        }
                        _ => warn!(file, id = %id, "ignoring metadata record outside this chunk"),
                    }
                }
                continue;
            }
            match parse_entry_id(kind, &name) {
                Some(id) if range.contains(&id) => {
                    self.put(Partition::Archive(kind), id, &bytes).await?;
                    stored += 1;
                }
                _ => warn!(file, entry = %name, "ignoring entry outside this chunk"),
            }
        }

        self.decodes.fetch_add(1, Ordering::SeqCst);
        info!(%kind, chunk, entries = stored, "chunk decoded");
        Ok(())
    }

    async fn fetch_and_decode(&self, file: &str) -> GalleryResult<pgal_archive::Archive> {
        let envelope = self.source.fetch(file).await?;
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || {
            let plain = pgal_crypto::open(&key, &envelope)?;
            unpack(&plain)
        })
        .await
        .map_err(|e| GalleryError::Other(anyhow::anyhow!("decode task: {e}")))?
    }

    /// Store one entry unless the fetcher has been shut down.
    async fn put(&self, partition: Partition, id: AssetId, data: &[u8]) -> GalleryResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(GalleryError::SessionClosed);
        }
        self.store.put(partition, id, data).await
    }
}
