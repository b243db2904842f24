//! Parallel, resumable conversion.
//!
//! `P` workers pull scan-order ids from a shared cursor, run the
//! [`Transcoder`] on the blocking pool and persist each result under
//! `<work_dir>/converted/<id>/`. Completions flow back to the orchestrator
//! (the caller of [`ConversionDriver::run`]), which alone updates the
//! progress record. A failed asset is logged and counted; it never aborts
//! the run.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::progress::ProgressWriter;
use crate::scan::SourceAsset;
use crate::transcode::{ConvertedAsset, OutputExts, Transcoder};

/// Converted renditions on disk, keyed by scan-order id.
#[derive(Debug, Clone)]
pub struct ConvertedCache {
    root: PathBuf,
    exts: OutputExts,
}

impl ConvertedCache {
    pub fn new(root: impl Into<PathBuf>, exts: OutputExts) -> Self {
        Self {
            root: root.into(),
            exts,
        }
    }

    pub fn in_dir(work_dir: &Path, exts: OutputExts) -> Self {
        Self::new(work_dir.join("converted"), exts)
    }

    pub fn exts(&self) -> &OutputExts {
        &self.exts
    }

    fn asset_dir(&self, id: u32) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn thumb_path(&self, id: u32) -> PathBuf {
        self.asset_dir(id).join(format!("thumb.{}", self.exts.thumb))
    }

    fn original_path(&self, id: u32) -> PathBuf {
        self.asset_dir(id).join(format!("original.{}", self.exts.image))
    }

    fn video_path(&self, id: u32) -> PathBuf {
        self.asset_dir(id).join(format!("video.{}", self.exts.video))
    }

    pub fn store(&self, id: u32, asset: &ConvertedAsset) -> Result<()> {
        let dir = self.asset_dir(id);
        // A leftover from an interrupted run may hold stale renditions
        if dir.exists() {
            std::fs::remove_dir_all(&dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        std::fs::write(self.thumb_path(id), &asset.thumbnail)?;
        if let Some(original) = &asset.original {
            std::fs::write(self.original_path(id), original)?;
        }
        if let Some(video) = &asset.video {
            std::fs::write(self.video_path(id), video)?;
        }
        Ok(())
    }

    pub fn thumbnail(&self, id: u32) -> Result<Vec<u8>> {
        let path = self.thumb_path(id);
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }

    pub fn original(&self, id: u32) -> Result<Option<Vec<u8>>> {
        read_optional(&self.original_path(id))
    }

    pub fn video(&self, id: u32) -> Result<Option<Vec<u8>>> {
        read_optional(&self.video_path(id))
    }

    /// Original + video bytes of a stored asset, without reading them.
    pub fn payload_bytes(&self, id: u32) -> Result<u64> {
        let size = |path: PathBuf| -> Result<u64> {
            match std::fs::metadata(&path) {
                Ok(m) => Ok(m.len()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
            }
        };
        Ok(size(self.original_path(id))? + size(self.video_path(id))?)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.thumb_path(id).is_file()
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.root.display())),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    /// Scan-order ids with a converted rendition on disk
    pub completed: BTreeSet<u32>,
    /// Converted during this run
    pub converted: usize,
    /// Already complete from an earlier run
    pub resumed: usize,
    /// `(scan-order id, reason)` for every asset that failed
    pub failures: Vec<(u32, String)>,
}

struct Completion {
    id: u32,
    result: Result<()>,
}

pub struct ConversionDriver<T: Transcoder> {
    transcoder: Arc<T>,
    cache: Arc<ConvertedCache>,
    parallelism: usize,
}

impl<T: Transcoder> ConversionDriver<T> {
    pub fn new(transcoder: Arc<T>, cache: Arc<ConvertedCache>, parallelism: usize) -> Self {
        Self {
            transcoder,
            cache,
            parallelism: parallelism.max(1),
        }
    }

    /// Convert every asset not already marked complete in `progress`.
    ///
    /// `on_done(finished, total)` is called from the orchestrator after
    /// each completion or failure.
    pub async fn run(
        &self,
        assets: Arc<Vec<SourceAsset>>,
        progress: &ProgressWriter,
        mut on_done: impl FnMut(usize, usize),
    ) -> Result<ConversionReport> {
        // Trust the record only where the rendition is still on disk
        let already: BTreeSet<u32> = progress
            .snapshot()
            .completed
            .into_iter()
            .filter(|&id| (id as usize) < assets.len() && self.cache.contains(id))
            .collect();
        let pending: Arc<Vec<u32>> = Arc::new(
            (0..assets.len() as u32)
                .filter(|id| !already.contains(id))
                .collect(),
        );

        let mut report = ConversionReport {
            completed: already,
            ..Default::default()
        };
        report.resumed = report.completed.len();
        if report.resumed > 0 {
            info!(resumed = report.resumed, pending = pending.len(), "resuming conversion");
        }

        let total = assets.len();
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel::<Completion>(self.parallelism * 2);

        let workers = self.parallelism.min(pending.len());
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let tx = tx.clone();
            let cursor = Arc::clone(&cursor);
            let pending = Arc::clone(&pending);
            let assets = Arc::clone(&assets);
            let transcoder = Arc::clone(&self.transcoder);
            let cache = Arc::clone(&self.cache);
            handles.push(tokio::spawn(async move {
                loop {
                    let next = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(&id) = pending.get(next) else { break };
                    let assets = Arc::clone(&assets);
                    let transcoder = Arc::clone(&transcoder);
                    let cache = Arc::clone(&cache);
                    let result = tokio::task::spawn_blocking(move || {
                        let converted = transcoder.convert(&assets[id as usize])?;
                        cache.store(id, &converted)
                    })
                    .await
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("conversion task panicked: {e}")));
                    if tx.send(Completion { id, result }).await.is_err() {
                        break;
                    }
                }
                debug!(worker, "conversion worker idle");
            }));
        }
        drop(tx);

        while let Some(Completion { id, result }) = rx.recv().await {
            match result {
                Ok(()) => {
                    report.completed.insert(id);
                    report.converted += 1;
                    progress.update(|r| {
                        r.completed.insert(id);
                    });
                }
                Err(e) => {
                    let source = &assets[id as usize].primary.rel;
                    warn!(id, source = %source, "conversion failed: {e:#}");
                    report.failures.push((id, format!("{e:#}")));
                }
            }
            on_done(report.completed.len() + report.failures.len(), total);
        }

        for handle in handles {
            handle.await.context("conversion worker")?;
        }

        report.failures.sort_by_key(|(id, _)| *id);
        info!(
            converted = report.converted,
            resumed = report.resumed,
            failed = report.failures.len(),
            "conversion finished"
        );
        Ok(report)
    }
}
