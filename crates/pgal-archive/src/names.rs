//! Archive entry naming
//!
//! Asset identity inside a chunk lives only in entry names: `thumb<id>.<ext>`,
//! `asset<id>.<ext>`, `video<id>.<ext>`. The thumbnails archive additionally
//! carries [`META_ENTRY`].

use pgal_core::{ArchiveKind, AssetId};

/// Reserved thumbnails-archive entry: JSON map of string(id) → `{date, type}`
pub const META_ENTRY: &str = "meta.json";

pub fn entry_name(kind: ArchiveKind, id: AssetId, ext: &str) -> String {
    format!("{}{id}.{ext}", kind.entry_prefix())
}

/// Recover the asset id from an entry name of the given kind.
///
/// Returns `None` for the metadata entry, foreign prefixes, and names whose
/// digits are missing or overflow.
pub fn parse_entry_id(kind: ArchiveKind, name: &str) -> Option<AssetId> {
    let rest = name.strip_prefix(kind.entry_prefix())?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    match rest.as_bytes().get(digits_end) {
        None | Some(b'.') => rest[..digits_end].parse().ok(),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for kind in ArchiveKind::ALL {
            let name = entry_name(kind, 4711, "webp");
            assert_eq!(parse_entry_id(kind, &name), Some(4711));
        }
        assert_eq!(entry_name(ArchiveKind::Videos, 3, "mp4"), "video3.mp4");
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(parse_entry_id(ArchiveKind::Thumbnails, META_ENTRY), None);
        assert_eq!(parse_entry_id(ArchiveKind::Thumbnails, "asset3.webp"), None);
        assert_eq!(parse_entry_id(ArchiveKind::Originals, "asset.webp"), None);
        assert_eq!(parse_entry_id(ArchiveKind::Originals, "asset3x.webp"), None);
        assert_eq!(parse_entry_id(ArchiveKind::Originals, "asset99999999999.webp"), None);
    }

    #[test]
    fn extension_optional() {
        assert_eq!(parse_entry_id(ArchiveKind::Videos, "video12"), Some(12));
    }
}
