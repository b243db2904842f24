//! Chunk planning and sealed chunk output.
//!
//! Planning walks assets in id order and keeps a running tally of original
//! and video bytes (thumbnails are not counted). Before adding an asset, a
//! non-empty chunk whose tally would exceed the ceiling is closed. After
//! adding it, a chunk whose tally has reached the ceiling is closed, so an
//! asset larger than the ceiling ends up alone in its own chunk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pgal_archive::{compress, entry_name, pack, Archive, ChunkEntry, META_ENTRY};
use pgal_core::{ArchiveKind, AssetId, AssetKind, AssetMeta, ChunkId};
use pgal_crypto::SealingKey;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::convert::ConvertedCache;

/// An asset that survived conversion, with its final dense id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub id: AssetId,
    /// Scan-order id, i.e. its key in the converted cache
    pub source: u32,
    pub kind: AssetKind,
    pub date: DateTime<Utc>,
    pub payload_bytes: u64,
}

/// Inclusive id range of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_id: ChunkId,
    pub start: AssetId,
    pub end: AssetId,
}

/// Split ids `0..sizes.len()` into chunks under `ceiling` bytes each.
pub fn plan_chunks(sizes: &[u64], ceiling: u64) -> Vec<ChunkPlan> {
    let ceiling = ceiling.max(1);
    let mut plans = Vec::new();
    let mut start: usize = 0;
    let mut tally: u64 = 0;

    let mut close = |start: usize, end: usize| {
        plans.push(ChunkPlan {
            chunk_id: plans.len() as ChunkId,
            start: start as AssetId,
            end: end as AssetId,
        });
    };

    for (id, &size) in sizes.iter().enumerate() {
        if id > start && tally.saturating_add(size) > ceiling {
            close(start, id - 1);
            start = id;
            tally = 0;
        }
        tally = tally.saturating_add(size);
        if tally >= ceiling {
            close(start, id);
            start = id + 1;
            tally = 0;
        }
    }
    if start < sizes.len() {
        close(start, sizes.len() - 1);
    }
    plans
}

/// Pack, optionally deflate, seal and write the archives of one chunk.
pub struct ChunkWriter {
    key: SealingKey,
    out_dir: PathBuf,
    /// Deflate level; `None` leaves archives uncompressed
    compression: Option<u32>,
    cache: Arc<ConvertedCache>,
}

impl ChunkWriter {
    pub fn new(
        key: SealingKey,
        out_dir: impl Into<PathBuf>,
        compression: Option<u32>,
        cache: Arc<ConvertedCache>,
    ) -> Self {
        Self {
            key,
            out_dir: out_dir.into(),
            compression,
            cache,
        }
    }

    /// Write the chunk's files and return its manifest entry plus the
    /// number of sealed bytes written. Archives are built one at a time.
    pub fn write_chunk(&self, plan: &ChunkPlan, assets: &[PlannedAsset]) -> Result<(ChunkEntry, u64)> {
        let members = &assets[plan.start as usize..=plan.end as usize];
        let exts = self.cache.exts();
        let mut written = 0u64;

        let mut thumbs = Archive::new();
        let mut meta: BTreeMap<String, AssetMeta> = BTreeMap::new();
        for asset in members {
            let name = entry_name(ArchiveKind::Thumbnails, asset.id, &exts.thumb);
            thumbs.insert(name, self.cache.thumbnail(asset.source)?)?;
            meta.insert(
                asset.id.to_string(),
                AssetMeta {
                    date: asset.date,
                    kind: asset.kind,
                },
            );
        }
        thumbs.insert(META_ENTRY, serde_json::to_vec(&meta).context("serializing chunk metadata")?)?;
        let thumbnails_file = ArchiveKind::Thumbnails.file_name(plan.chunk_id);
        written += self.emit(&thumbnails_file, &thumbs)?;
        drop(thumbs);

        let mut originals = Archive::new();
        for asset in members.iter().filter(|a| a.kind.has_original()) {
            if let Some(bytes) = self.cache.original(asset.source)? {
                originals.insert(entry_name(ArchiveKind::Originals, asset.id, &exts.image), bytes)?;
            }
        }
        let originals_file = self.emit_if_any(ArchiveKind::Originals, plan.chunk_id, originals, &mut written)?;

        let mut videos = Archive::new();
        for asset in members.iter().filter(|a| a.kind.has_video()) {
            if let Some(bytes) = self.cache.video(asset.source)? {
                videos.insert(entry_name(ArchiveKind::Videos, asset.id, &exts.video), bytes)?;
            }
        }
        let videos_file = self.emit_if_any(ArchiveKind::Videos, plan.chunk_id, videos, &mut written)?;

        tracing::info!(
            chunk = plan.chunk_id,
            start = plan.start,
            end = plan.end,
            bytes = written,
            "chunk sealed"
        );
        Ok((
            ChunkEntry {
                chunk_id: plan.chunk_id,
                thumbnails_file,
                originals_file,
                videos_file,
                start_index: plan.start,
                end_index: plan.end,
            },
            written,
        ))
    }

    fn emit_if_any(
        &self,
        kind: ArchiveKind,
        chunk: ChunkId,
        archive: Archive,
        written: &mut u64,
    ) -> Result<Option<String>> {
        if archive.is_empty() {
            return Ok(None);
        }
        let file = kind.file_name(chunk);
        *written += self.emit(&file, &archive)?;
        Ok(Some(file))
    }

    fn emit(&self, file: &str, archive: &Archive) -> Result<u64> {
        let packed = pack(archive)?;
        let body = match self.compression {
            Some(level) => compress(&packed, level)?,
            None => packed,
        };
        let sealed = pgal_crypto::seal(&self.key, &body)?;
        write_atomic(&self.out_dir.join(file), &sealed)?;
        Ok(sealed.len() as u64)
    }

    /// Seal arbitrary bytes into `file` (used for the manifest).
    pub fn emit_sealed(&self, file: &str, plaintext: &[u8]) -> Result<u64> {
        let sealed = pgal_crypto::seal(&self.key, plaintext)?;
        write_atomic(&self.out_dir.join(file), &sealed)?;
        Ok(sealed.len() as u64)
    }
}

/// Write to a temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data).with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn ranges(plans: &[ChunkPlan]) -> Vec<(u32, u32)> {
        plans.iter().map(|p| (p.start, p.end)).collect()
    }

    #[test]
    fn test_each_asset_over_half_ceiling_gets_own_chunk() {
        let plans = plan_chunks(&[10 * MB, 10 * MB, 10 * MB], 15 * MB);
        assert_eq!(ranges(&plans), [(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_oversized_asset_stands_alone() {
        let plans = plan_chunks(&[MB, 40 * MB, MB, MB], 15 * MB);
        assert_eq!(ranges(&plans), [(0, 0), (1, 1), (2, 3)]);
    }

    #[test]
    fn test_exact_fill_closes_chunk() {
        let plans = plan_chunks(&[5, 10, 3], 15);
        assert_eq!(ranges(&plans), [(0, 1), (2, 2)]);
    }

    #[test]
    fn test_zero_byte_assets_share_a_chunk() {
        let plans = plan_chunks(&[0, 0, 0, 0], 15);
        assert_eq!(ranges(&plans), [(0, 3)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(plan_chunks(&[], 15).is_empty());
    }

    #[test]
    fn test_chunk_ids_are_sequential() {
        let plans = plan_chunks(&[7; 20], 15);
        for (pos, plan) in plans.iter().enumerate() {
            assert_eq!(plan.chunk_id as usize, pos);
        }
    }
}
