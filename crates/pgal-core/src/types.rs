use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dense zero-based asset id. Doubles as the sort key and the join key between
/// manifest, archive entries and cache records.
pub type AssetId = u32;

/// The sealed album index, always present at the album root.
pub const MANIFEST_FILE: &str = "manifest.enc";

/// Zero-based chunk index within an album.
pub type ChunkId = u32;

/// Logical asset type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Photo,
    /// Still image paired with a short motion clip
    Live,
    Video,
}

impl AssetKind {
    /// Photo and live assets carry a full-size still.
    pub fn has_original(self) -> bool {
        matches!(self, AssetKind::Photo | AssetKind::Live)
    }

    /// Video and live assets carry a motion clip.
    pub fn has_video(self) -> bool {
        matches!(self, AssetKind::Video | AssetKind::Live)
    }
}

/// The three parallel archives a chunk can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Thumbnails,
    Originals,
    Videos,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 3] = [
        ArchiveKind::Thumbnails,
        ArchiveKind::Originals,
        ArchiveKind::Videos,
    ];

    /// Served file name for this archive of chunk `chunk`.
    pub fn file_name(self, chunk: ChunkId) -> String {
        let stem = match self {
            ArchiveKind::Thumbnails => "thumbs",
            ArchiveKind::Originals => "originals",
            ArchiveKind::Videos => "videos",
        };
        format!("{stem}-{chunk}.enc")
    }

    /// Entry-name prefix inside the archive (`thumb12.webp`, `asset12.webp`, ...).
    pub fn entry_prefix(self) -> &'static str {
        match self {
            ArchiveKind::Thumbnails => "thumb",
            ArchiveKind::Originals => "asset",
            ArchiveKind::Videos => "video",
        }
    }

    /// Local store partition holding this kind's decoded entries.
    pub fn partition(self) -> &'static str {
        match self {
            ArchiveKind::Thumbnails => "thumbs",
            ArchiveKind::Originals => "originals",
            ArchiveKind::Videos => "videos",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.partition())
    }
}

/// Per-asset record stored in the thumbnails archive metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMeta {
    /// Capture timestamp, ISO-8601
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AssetKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_file_names() {
        assert_eq!(ArchiveKind::Thumbnails.file_name(0), "thumbs-0.enc");
        assert_eq!(ArchiveKind::Originals.file_name(7), "originals-7.enc");
        assert_eq!(ArchiveKind::Videos.file_name(12), "videos-12.enc");
    }

    #[test]
    fn asset_meta_wire_shape() {
        let meta = AssetMeta {
            date: Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap(),
            kind: AssetKind::Live,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"type\":\"live\""));
        assert!(json.contains("2023-04-05T06:07:08Z"));

        let back: AssetMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn kind_payloads() {
        assert!(AssetKind::Live.has_original() && AssetKind::Live.has_video());
        assert!(!AssetKind::Photo.has_video());
        assert!(!AssetKind::Video.has_original());
    }
}
