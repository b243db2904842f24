//! Source discovery: walk a directory, group live-photo pairs, order by date.
//!
//! A still and a video sharing a directory and (case-insensitive) file stem
//! become one `live` asset. Hidden entries are skipped. The resulting list is
//! sorted by (capture date, relative path), which fixes the scan-order ids
//! used by the progress ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pgal_core::AssetKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "webp", "gif", "tif", "tiff", "avif", "dng",
];
const VIDEO_EXTS: &[&str] = &["mov", "mp4", "m4v", "avi", "mkv", "3gp", "webm"];

/// Capture-date lookup for a source file.
///
/// Implementations may read EXIF or container metadata; returning `None`
/// falls back to the file's modification time.
pub trait DateExtractor: Send + Sync {
    fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>>;
}

/// Uses the filesystem modification time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedTime;

impl DateExtractor for ModifiedTime {
    fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the source root, `/`-separated
    pub rel: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub kind: AssetKind,
    /// The photo, the still half of a live pair, or the video itself
    pub primary: SourceFile,
    /// The motion half of a live pair
    pub companion: Option<SourceFile>,
    pub date: DateTime<Utc>,
}

impl SourceAsset {
    /// The still image, if this asset has one.
    pub fn still(&self) -> Option<&SourceFile> {
        (self.kind != AssetKind::Video).then_some(&self.primary)
    }

    /// The video stream, if this asset has one.
    pub fn motion(&self) -> Option<&SourceFile> {
        match self.kind {
            AssetKind::Photo => None,
            AssetKind::Live => self.companion.as_ref(),
            AssetKind::Video => Some(&self.primary),
        }
    }

    /// `"<rel>[+<rel>]|<total bytes>"`. Stable for unchanged inputs.
    pub fn fingerprint(&self) -> String {
        let files: Vec<&SourceFile> = std::iter::once(&self.primary).chain(self.companion.iter()).collect();
        let names: Vec<&str> = files.iter().map(|f| f.rel.as_str()).collect();
        let total: u64 = files.iter().map(|f| f.size).sum();
        format!("{}|{total}", names.join("+"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceScan {
    pub assets: Vec<SourceAsset>,
}

impl SourceScan {
    pub fn fingerprints(&self) -> Vec<String> {
        self.assets.iter().map(SourceAsset::fingerprint).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

enum Media {
    Image,
    Video,
}

fn classify(path: &Path) -> Option<Media> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTS.contains(&ext.as_str()) {
        Some(Media::Image)
    } else if VIDEO_EXTS.contains(&ext.as_str()) {
        Some(Media::Video)
    } else {
        None
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Default)]
struct StemGroup {
    images: Vec<SourceFile>,
    videos: Vec<SourceFile>,
}

/// Walk `root` and return its media assets in album order.
///
/// Anything under a path in `exclude` is ignored, so an output or work
/// directory nested inside the source is never re-ingested.
pub fn scan_source(root: &Path, exclude: &[PathBuf], dates: &dyn DateExtractor) -> Result<SourceScan> {
    let mut groups: BTreeMap<(String, String), StemGroup> = BTreeMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !exclude.iter().any(|x| e.path().starts_with(x)));

    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(media) = classify(path) else {
            tracing::trace!(path = %path.display(), "not media, skipping");
            continue;
        };
        let size = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        let rel = rel_path(root, path);
        let dir = rel.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let file = SourceFile {
            path: path.to_path_buf(),
            rel,
            size,
        };
        let group = groups.entry((dir, stem)).or_default();
        match media {
            Media::Image => group.images.push(file),
            Media::Video => group.videos.push(file),
        }
    }

    let mut assets = Vec::new();
    for (_, mut group) in groups {
        group.images.sort_by(|a, b| a.rel.cmp(&b.rel));
        group.videos.sort_by(|a, b| a.rel.cmp(&b.rel));
        let mut images = group.images.into_iter();
        let mut videos = group.videos.into_iter();

        // First still + first video of a stem form the live pair
        loop {
            let (kind, primary, companion) = match (images.next(), videos.next()) {
                (Some(i), Some(v)) => (AssetKind::Live, i, Some(v)),
                (Some(i), None) => (AssetKind::Photo, i, None),
                (None, Some(v)) => (AssetKind::Video, v, None),
                (None, None) => break,
            };
            let date = dates
                .capture_date(&primary.path)
                .or_else(|| ModifiedTime.capture_date(&primary.path))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            assets.push(SourceAsset {
                kind,
                primary,
                companion,
                date,
            });
        }
    }

    assets.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.primary.rel.cmp(&b.primary.rel)));

    tracing::info!(root = %root.display(), assets = assets.len(), "scanned source");
    Ok(SourceScan { assets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    /// Dates keyed by file name; unknown names fall back to mtime.
    struct FixedDates(HashMap<&'static str, DateTime<Utc>>);

    impl DateExtractor for FixedDates {
        fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>> {
            let name = path.file_name()?.to_str()?;
            self.0.get(name).copied()
        }
    }

    fn touch(root: &Path, rel: &str, bytes: usize) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_groups_live_pairs_and_orders_by_date() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(root, "a/IMG_1.HEIC", 10);
        touch(root, "a/img_1.mov", 20);
        touch(root, "a/IMG_2.jpg", 5);
        touch(root, "b/clip.mp4", 7);
        touch(root, "b/notes.txt", 1);
        touch(root, ".hidden/x.jpg", 1);

        let dates = FixedDates(HashMap::from([
            ("IMG_1.HEIC", day(3)),
            ("IMG_2.jpg", day(1)),
            ("clip.mp4", day(2)),
        ]));
        let scan = scan_source(root, &[], &dates).unwrap();

        let got: Vec<(AssetKind, &str)> = scan
            .assets
            .iter()
            .map(|a| (a.kind, a.primary.rel.as_str()))
            .collect();
        assert_eq!(
            got,
            [
                (AssetKind::Photo, "a/IMG_2.jpg"),
                (AssetKind::Video, "b/clip.mp4"),
                (AssetKind::Live, "a/IMG_1.HEIC"),
            ]
        );
        assert_eq!(scan.assets[2].fingerprint(), "a/IMG_1.HEIC+a/img_1.mov|30");
        assert_eq!(scan.assets[2].motion().unwrap().rel, "a/img_1.mov");
        assert!(scan.assets[1].still().is_none());
    }

    #[test]
    fn test_same_date_ordered_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "z.jpg", 1);
        touch(tmp.path(), "m.jpg", 1);
        let dates = FixedDates(HashMap::from([("z.jpg", day(1)), ("m.jpg", day(1))]));
        let scan = scan_source(tmp.path(), &[], &dates).unwrap();
        assert_eq!(scan.fingerprints(), ["m.jpg|1", "z.jpg|1"]);
    }

    #[test]
    fn test_excluded_dirs_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "keep.jpg", 1);
        touch(tmp.path(), "out/work/converted/0/thumb.webp", 1);
        let scan = scan_source(tmp.path(), &[tmp.path().join("out")], &ModifiedTime).unwrap();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan.assets[0].primary.rel, "keep.jpg");
    }

    #[test]
    fn test_fingerprint_tracks_size() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.jpg", 3);
        let before = scan_source(tmp.path(), &[], &ModifiedTime).unwrap().fingerprints();
        touch(tmp.path(), "a.jpg", 4);
        let after = scan_source(tmp.path(), &[], &ModifiedTime).unwrap().fingerprints();
        assert_ne!(before, after);
    }
}
