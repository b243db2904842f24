//! End-to-end album build.
//!
//! Order of effects on disk:
//! 1. progress record + converted renditions under the work dir
//! 2. chunk files and `manifest.enc`, one chunk at a time, into
//!    `<output>/.pgal-staging`
//! 3. publish: the old `manifest.enc` is withdrawn, staged chunk files
//!    replace the published ones, stale chunk files are deleted and the new
//!    `manifest.enc` is moved in last
//! 4. staging and work dirs removed
//!
//! A published manifest only ever names chunk files from its own build.
//! Interrupting before 3 leaves the previous album untouched; interrupting at
//! any point before 4 leaves a resumable state.

use anyhow::{bail, Context, Result};
use pgal_archive::{month_groups, Manifest};
use pgal_core::config::BuildConfig;
use pgal_core::{ArchiveKind, AssetId, MANIFEST_FILE};
use pgal_crypto::{derive_sealing_key, KdfParams};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::convert::{ConversionDriver, ConvertedCache};
use crate::planner::{plan_chunks, ChunkWriter, PlannedAsset};
use crate::progress::{ProgressLedger, ProgressRecord, ProgressWriter};
use crate::scan::{scan_source, DateExtractor};
use crate::transcode::Transcoder;

/// Progress callback: (done, total, stage)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

const DEFAULT_WORK_DIR: &str = ".pgal-work";
const STAGING_DIR: &str = ".pgal-staging";

#[derive(Debug)]
pub struct BuildOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub album: String,
    pub password: SecretString,
    pub parallelism: usize,
    pub chunk_ceiling: u64,
    /// Deflate level; `None` disables compression
    pub compression: Option<u32>,
    /// Defaults to `<output>/.pgal-work`
    pub work_dir: Option<PathBuf>,
    pub kdf: KdfParams,
}

impl BuildOptions {
    pub fn from_config(
        source: PathBuf,
        output: PathBuf,
        album: String,
        password: SecretString,
        config: &BuildConfig,
    ) -> Self {
        Self {
            source,
            output,
            album,
            password,
            parallelism: config.effective_parallelism(),
            chunk_ceiling: config.chunk_ceiling_bytes(),
            compression: config.compress.then_some(config.compression_level.min(9)),
            work_dir: config.work_dir.clone(),
            kdf: KdfParams::default(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.output.join(DEFAULT_WORK_DIR))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub scanned: usize,
    pub total_assets: u32,
    pub chunks: usize,
    /// Conversions reused from an interrupted run
    pub resumed: usize,
    /// `(source path, reason)` of every skipped asset
    pub failed: Vec<(String, String)>,
    pub bytes_written: u64,
}

/// Build (or resume building) an album from `opts.source` into `opts.output`.
///
/// Per-asset conversion failures are reported in [`BuildReport::failed`];
/// only I/O, sealing and bookkeeping failures abort the build.
pub async fn build_album<T: Transcoder>(
    opts: &BuildOptions,
    transcoder: Arc<T>,
    dates: Arc<dyn DateExtractor>,
    progress: Option<&ProgressFn>,
) -> Result<BuildReport> {
    if opts.album.is_empty() {
        bail!("album name must not be empty");
    }
    if !opts.source.is_dir() {
        bail!("source is not a directory: {}", opts.source.display());
    }
    std::fs::create_dir_all(&opts.output)
        .with_context(|| format!("creating output dir: {}", opts.output.display()))?;
    let work_dir = opts.work_dir();
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("creating work dir: {}", work_dir.display()))?;

    let key = {
        let password = SecretString::from(opts.password.expose_secret().to_owned());
        let album = opts.album.clone();
        let kdf = opts.kdf.clone();
        tokio::task::spawn_blocking(move || derive_sealing_key(&password, &album, &kdf))
            .await
            .context("key derivation task")?
    };

    let scan = {
        let source = absolute(&opts.source);
        let exclude = vec![absolute(&opts.output), absolute(&work_dir)];
        tokio::task::spawn_blocking(move || scan_source(&source, &exclude, dates.as_ref()))
            .await
            .context("scan task")??
    };
    let scanned = scan.len();
    let fingerprints = scan.fingerprints();

    let cache = Arc::new(ConvertedCache::in_dir(&work_dir, transcoder.output_exts()));
    let ledger = ProgressLedger::in_dir(&work_dir);
    let record = match ledger.load() {
        Some(record) if record.matches(&fingerprints) => {
            info!(completed = record.completed.len(), total = scanned, "resuming build");
            record
        }
        Some(_) => {
            warn!("source changed since the interrupted build, starting over");
            cache.clear()?;
            ProgressRecord::new(fingerprints)
        }
        None => {
            cache.clear()?;
            ProgressRecord::new(fingerprints)
        }
    };

    let writer = ProgressWriter::spawn(ledger.clone(), record);
    let assets = Arc::new(scan.assets);
    let driver = ConversionDriver::new(transcoder, Arc::clone(&cache), opts.parallelism);
    let conversion = driver
        .run(Arc::clone(&assets), &writer, |done, total| {
            if let Some(cb) = progress {
                cb(done as u64, total as u64, "converting");
            }
        })
        .await;
    let writes = writer.finish().await?;
    let conversion = conversion?;
    tracing::debug!(writes, "progress record flushed");

    // Dense renumbering: failed assets leave no gaps
    let mut planned = Vec::with_capacity(conversion.completed.len());
    for (id, &source) in conversion.completed.iter().enumerate() {
        let asset = &assets[source as usize];
        planned.push(PlannedAsset {
            id: id as AssetId,
            source,
            kind: asset.kind,
            date: asset.date,
            payload_bytes: cache.payload_bytes(source)?,
        });
    }

    let sizes: Vec<u64> = planned.iter().map(|a| a.payload_bytes).collect();
    let plans = plan_chunks(&sizes, opts.chunk_ceiling);
    info!(assets = planned.len(), chunks = plans.len(), "chunk plan ready");

    let staging = opts.output.join(STAGING_DIR);
    reset_dir(&staging)?;
    let chunk_writer = Arc::new(ChunkWriter::new(
        key,
        staging.clone(),
        opts.compression,
        Arc::clone(&cache),
    ));
    let planned = Arc::new(planned);
    let mut chunks = Vec::with_capacity(plans.len());
    let mut bytes_written = 0u64;
    for plan in &plans {
        let writer = Arc::clone(&chunk_writer);
        let planned = Arc::clone(&planned);
        let plan = *plan;
        let (entry, bytes) = tokio::task::spawn_blocking(move || writer.write_chunk(&plan, &planned))
            .await
            .context("chunk writer task")??;
        bytes_written += bytes;
        chunks.push(entry);
        if let Some(cb) = progress {
            cb(chunks.len() as u64, plans.len() as u64, "sealing");
        }
    }

    let manifest = Manifest {
        total_assets: planned.len() as u32,
        months: month_groups(planned.iter().map(|a| &a.date)),
        chunks,
    };
    let manifest_bytes = manifest.encode()?;
    bytes_written += chunk_writer.emit_sealed(MANIFEST_FILE, &manifest_bytes)?;

    publish_staged(&staging, &opts.output, &manifest)?;

    ledger.remove()?;
    cache.clear()?;
    if opts.work_dir.is_none() {
        // Only the default work dir is ours to delete
        let _ = std::fs::remove_dir(&work_dir);
    }

    let failed = conversion
        .failures
        .into_iter()
        .map(|(id, reason)| (assets[id as usize].primary.rel.clone(), reason))
        .collect::<Vec<_>>();

    info!(
        album = %opts.album,
        assets = manifest.total_assets,
        chunks = manifest.chunks.len(),
        skipped = failed.len(),
        bytes = bytes_written,
        "album built"
    );

    Ok(BuildReport {
        scanned,
        total_assets: manifest.total_assets,
        chunks: manifest.chunks.len(),
        resumed: conversion.resumed,
        failed,
        bytes_written,
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `thumbs-N.enc`, `originals-N.enc` or `videos-N.enc`
fn is_chunk_file(name: &str) -> bool {
    let Some((prefix, number)) = name.strip_suffix(".enc").and_then(|s| s.rsplit_once('-')) else {
        return false;
    };
    number.parse::<u32>().is_ok()
        && ArchiveKind::ALL
            .iter()
            .any(|k| k.file_name(0) == format!("{prefix}-0.enc"))
}

/// Names of every chunk file `manifest` refers to.
fn live_chunk_files(manifest: &Manifest) -> BTreeSet<String> {
    manifest
        .chunks
        .iter()
        .flat_map(|c| {
            [Some(&c.thumbnails_file), c.originals_file.as_ref(), c.videos_file.as_ref()]
                .into_iter()
                .flatten()
                .cloned()
        })
        .collect()
}

fn reset_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("clearing {}", dir.display())),
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}

/// Move a staged build from `staging` into `output`.
///
/// No chunk file changes while a manifest is published, so a reader sees
/// the old album, no album, or the new one.
fn publish_staged(staging: &Path, output: &Path, manifest: &Manifest) -> Result<()> {
    let published = output.join(MANIFEST_FILE);
    match std::fs::remove_file(&published) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("withdrawing {}", published.display())),
    }

    let live = live_chunk_files(manifest);
    for name in &live {
        let (from, to) = (staging.join(name), output.join(name));
        std::fs::rename(&from, &to)
            .with_context(|| format!("publishing {} to {}", from.display(), to.display()))?;
    }
    remove_stale_chunks(output, &live)?;

    std::fs::rename(staging.join(MANIFEST_FILE), &published)
        .with_context(|| format!("publishing {}", published.display()))?;
    std::fs::remove_dir_all(staging).with_context(|| format!("removing {}", staging.display()))?;
    Ok(())
}

/// Delete chunk files not named in `live`.
fn remove_stale_chunks(output: &Path, live: &BTreeSet<String>) -> Result<()> {
    for entry in std::fs::read_dir(output).with_context(|| format!("listing {}", output.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_chunk_file(&name) && !live.contains(&name) {
            tracing::debug!(file = %name, "removing stale chunk file");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
