//! One open album.
//!
//! The session owns its store handle and a single decode context task.
//! Callers talk to that task through [`DecodeRequest`] messages and get a
//! [`DecodeResponse`] back on a oneshot channel. Closing the session (or
//! dropping it) stops the task; callers still waiting get
//! [`GalleryError::SessionClosed`]. The decode context shuts its fetcher down
//! on the way out, so once [`AlbumSession::close`] returns no chunk load of
//! this session can write to the store again.

use pgal_archive::Manifest;
use pgal_core::config::ViewerConfig;
use pgal_core::{ArchiveKind, AssetId, AssetMeta, ChunkId, GalleryError, GalleryResult, MANIFEST_FILE};
use pgal_crypto::{derive_album_key, AlbumKey, KdfParams};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetcher::ChunkFetcher;
use crate::source::ChunkSource;
use crate::store::DiskStore;
use crate::validator::{validate_cache, CacheVerdict};

const REQUEST_QUEUE: usize = 64;

#[derive(Debug)]
pub struct SessionOptions {
    pub album: String,
    pub password: SecretString,
    /// Root of the per-album stores
    pub cache_dir: PathBuf,
    /// Bound on key derivation + manifest fetch and decode
    pub handshake_timeout: Duration,
    pub kdf: KdfParams,
}

impl SessionOptions {
    pub fn new(album: impl Into<String>, password: SecretString, config: &ViewerConfig) -> Self {
        Self {
            album: album.into(),
            password,
            cache_dir: config.cache_dir.clone(),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs.max(1)),
            kdf: KdfParams::default(),
        }
    }
}

#[derive(Debug)]
pub enum DecodeRequest {
    GetAsset {
        kind: ArchiveKind,
        id: AssetId,
        reply: oneshot::Sender<DecodeResponse>,
    },
    AssetMeta {
        id: AssetId,
        reply: oneshot::Sender<DecodeResponse>,
    },
    /// Start fetching a chunk; nobody waits for it
    Prefetch { kind: ArchiveKind, chunk: ChunkId },
    Close,
}

#[derive(Debug)]
pub enum DecodeResponse {
    Asset(Vec<u8>),
    Meta(AssetMeta),
    Failed(GalleryError),
}

pub struct AlbumSession {
    album: String,
    manifest: Arc<Manifest>,
    verdict: CacheVerdict,
    requests: mpsc::Sender<DecodeRequest>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Handshake {
    key: AlbumKey,
    manifest: Manifest,
    store: DiskStore,
    verdict: CacheVerdict,
}

async fn handshake<S: ChunkSource>(source: &S, opts: &SessionOptions) -> GalleryResult<Handshake> {
    let key = {
        let password = SecretString::from(opts.password.expose_secret().to_owned());
        let album = opts.album.clone();
        let kdf = opts.kdf.clone();
        tokio::task::spawn_blocking(move || derive_album_key(&password, &album, &kdf))
            .await
            .map_err(|e| GalleryError::Other(anyhow::anyhow!("key derivation task: {e}")))?
    };

    let sealed = source.fetch(MANIFEST_FILE).await?;
    let plain = pgal_crypto::open(&key, &sealed)?;
    let manifest = Manifest::decode(&plain)?;

    let store = DiskStore::open(&opts.cache_dir, &opts.album).await?;
    let verdict = validate_cache(&store, &plain).await?;
    Ok(Handshake {
        key,
        manifest,
        store,
        verdict,
    })
}

impl AlbumSession {
    /// Derive the key, fetch and decrypt the manifest, validate the local
    /// store, and start the decode context.
    ///
    /// Every failure here aborts the open; show it with
    /// [`GalleryError::user_message`] so a wrong password and a missing album
    /// look the same.
    pub async fn open<S: ChunkSource>(source: S, opts: SessionOptions) -> GalleryResult<Self> {
        let secs = opts.handshake_timeout.as_secs();
        let Handshake {
            key,
            manifest,
            store,
            verdict,
        } = tokio::time::timeout(opts.handshake_timeout, handshake(&source, &opts))
            .await
            .map_err(|_| GalleryError::HandshakeTimeout(secs))??;

        info!(
            album = %opts.album,
            assets = manifest.total_assets,
            chunks = manifest.chunks.len(),
            ?verdict,
            "album opened"
        );

        let manifest = Arc::new(manifest);
        let fetcher = ChunkFetcher::new(source, key, Arc::clone(&manifest), Arc::new(store));
        let (requests, rx) = mpsc::channel(REQUEST_QUEUE);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(decode_context(fetcher, rx, cancel.clone()));

        Ok(Self {
            album: opts.album,
            manifest,
            verdict,
            requests,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn cache_verdict(&self) -> CacheVerdict {
        self.verdict
    }

    async fn call(
        &self,
        make: impl FnOnce(oneshot::Sender<DecodeResponse>) -> DecodeRequest,
    ) -> GalleryResult<DecodeResponse> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| GalleryError::SessionClosed)?;
        rx.await.map_err(|_| GalleryError::SessionClosed)
    }

    /// Decoded bytes of asset `id` from the `kind` archive.
    pub async fn get_asset(&self, kind: ArchiveKind, id: AssetId) -> GalleryResult<Vec<u8>> {
        match self.call(|reply| DecodeRequest::GetAsset { kind, id, reply }).await? {
            DecodeResponse::Asset(bytes) => Ok(bytes),
            DecodeResponse::Failed(e) => Err(e),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn asset_meta(&self, id: AssetId) -> GalleryResult<AssetMeta> {
        match self.call(|reply| DecodeRequest::AssetMeta { id, reply }).await? {
            DecodeResponse::Meta(meta) => Ok(meta),
            DecodeResponse::Failed(e) => Err(e),
            other => Err(unexpected(&other)),
        }
    }

    /// Warm `(kind, chunk)` without waiting for it.
    pub async fn prefetch(&self, kind: ArchiveKind, chunk: ChunkId) -> GalleryResult<()> {
        self.requests
            .send(DecodeRequest::Prefetch { kind, chunk })
            .await
            .map_err(|_| GalleryError::SessionClosed)
    }

    /// Stop the decode context and every chunk load it started.
    /// Outstanding and later calls fail with `SessionClosed`.
    pub async fn close(&self) {
        let _ = self.requests.try_send(DecodeRequest::Close);
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(album = %self.album, "decode context ended abnormally: {e}");
            }
        }
    }
}

impl Drop for AlbumSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn unexpected(response: &DecodeResponse) -> GalleryError {
    GalleryError::Other(anyhow::anyhow!("unexpected decode response: {response:?}"))
}

async fn decode_context<S: ChunkSource>(
    fetcher: ChunkFetcher<S>,
    mut requests: mpsc::Receiver<DecodeRequest>,
    cancel: CancellationToken,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                None | Some(DecodeRequest::Close) => break,
                Some(DecodeRequest::GetAsset { kind, id, reply }) => {
                    let fetcher = fetcher.clone();
                    handlers.spawn(async move {
                        let response = match fetcher.get_asset(kind, id).await {
                            Ok(bytes) => DecodeResponse::Asset(bytes),
                            Err(e) => DecodeResponse::Failed(e),
                        };
                        let _ = reply.send(response);
                    });
                }
                Some(DecodeRequest::AssetMeta { id, reply }) => {
                    let fetcher = fetcher.clone();
                    handlers.spawn(async move {
                        let response = match fetcher.asset_meta(id).await {
                            Ok(meta) => DecodeResponse::Meta(meta),
                            Err(e) => DecodeResponse::Failed(e),
                        };
                        let _ = reply.send(response);
                    });
                }
                Some(DecodeRequest::Prefetch { kind, chunk }) => {
                    if let Err(e) = fetcher.request(kind, chunk) {
                        warn!(%kind, chunk, "prefetch rejected: {e}");
                    }
                }
            },
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }
    // Abandon waiters; their reply senders drop with the tasks
    handlers.abort_all();
    fetcher.shutdown().await;
    debug!("decode context stopped");
}
