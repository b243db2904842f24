//! Album manifest: asset count, chunk ranges, month groups
//!
//! Serialized as JSON (camelCase field names) and sealed into `manifest.enc`.
//! Decoding validates the range structure; an inconsistent manifest is
//! treated as corruption and never repaired.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use pgal_core::{ArchiveKind, AssetId, ChunkId, GalleryError, GalleryResult};
use serde::{Deserialize, Serialize};

/// One chunk: an inclusive id range and the files holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub chunk_id: ChunkId,
    pub thumbnails_file: String,
    /// Absent when the chunk holds only videos
    #[serde(default)]
    pub originals_file: Option<String>,
    /// Absent when the chunk holds no video or live assets
    #[serde(default)]
    pub videos_file: Option<String>,
    pub start_index: AssetId,
    pub end_index: AssetId,
}

impl ChunkEntry {
    pub fn contains(&self, id: AssetId) -> bool {
        (self.start_index..=self.end_index).contains(&id)
    }

    pub fn asset_count(&self) -> u32 {
        self.end_index - self.start_index + 1
    }

    pub fn file(&self, kind: ArchiveKind) -> Option<&str> {
        match kind {
            ArchiveKind::Thumbnails => Some(self.thumbnails_file.as_str()),
            ArchiveKind::Originals => self.originals_file.as_deref(),
            ArchiveKind::Videos => self.videos_file.as_deref(),
        }
    }
}

/// Consecutive ids sharing a calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGroup {
    /// `YYYY-MM-01`
    pub date: String,
    pub start_id: AssetId,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub total_assets: u32,
    pub chunks: Vec<ChunkEntry>,
    pub months: Vec<MonthGroup>,
}

impl Manifest {
    /// Serialize to JSON bytes. Refuses to encode an inconsistent manifest.
    pub fn encode(&self) -> GalleryResult<Vec<u8>> {
        self.validate()?;
        serde_json::to_vec(self)
            .map_err(|e| GalleryError::Other(anyhow::anyhow!("manifest serialization: {e}")))
    }

    /// Parse and validate JSON bytes.
    pub fn decode(data: &[u8]) -> GalleryResult<Self> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| GalleryError::MalformedManifest(format!("not a manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check that chunks tile `[0, total_assets)` contiguously in order and
    /// that month groups do the same.
    pub fn validate(&self) -> GalleryResult<()> {
        let bad = |msg: String| -> GalleryResult<()> { Err(GalleryError::MalformedManifest(msg)) };

        let mut next: u64 = 0;
        for (pos, chunk) in self.chunks.iter().enumerate() {
            if chunk.chunk_id as usize != pos {
                return bad(format!("chunk at position {pos} has id {}", chunk.chunk_id));
            }
            if chunk.end_index < chunk.start_index {
                return bad(format!(
                    "chunk {} range [{}, {}] is inverted",
                    chunk.chunk_id, chunk.start_index, chunk.end_index
                ));
            }
            if u64::from(chunk.start_index) != next {
                return bad(format!(
                    "chunk {} starts at {}, expected {next}",
                    chunk.chunk_id, chunk.start_index
                ));
            }
            if chunk.thumbnails_file.is_empty() {
                return bad(format!("chunk {} has no thumbnails file", chunk.chunk_id));
            }
            next = u64::from(chunk.end_index) + 1;
        }
        if next != u64::from(self.total_assets) {
            return bad(format!(
                "chunks cover {next} assets but totalAssets is {}",
                self.total_assets
            ));
        }

        let mut next: u64 = 0;
        for group in &self.months {
            if NaiveDate::parse_from_str(&group.date, "%Y-%m-%d")
                .map(|d| d.day() != 1)
                .unwrap_or(true)
            {
                return bad(format!("month key {:?} is not YYYY-MM-01", group.date));
            }
            if group.count == 0 || u64::from(group.start_id) != next {
                return bad(format!(
                    "month {} [{}, +{}) breaks the id sequence at {next}",
                    group.date, group.start_id, group.count
                ));
            }
            next += u64::from(group.count);
        }
        if next != u64::from(self.total_assets) {
            return bad(format!(
                "months cover {next} assets but totalAssets is {}",
                self.total_assets
            ));
        }
        Ok(())
    }

    /// The chunk owning `id`.
    pub fn chunk_for(&self, id: AssetId) -> Option<&ChunkEntry> {
        let pos = self.chunks.partition_point(|c| c.end_index < id);
        self.chunks.get(pos).filter(|c| c.contains(id))
    }

    /// The month group owning `id`.
    pub fn month_of(&self, id: AssetId) -> Option<&MonthGroup> {
        let pos = self
            .months
            .partition_point(|m| u64::from(m.start_id) + u64::from(m.count) <= u64::from(id));
        self.months
            .get(pos)
            .filter(|m| id >= m.start_id && id - m.start_id < m.count)
    }

    pub fn chunk(&self, chunk: ChunkId) -> Option<&ChunkEntry> {
        self.chunks.get(chunk as usize)
    }
}

/// `YYYY-MM-01` for the month containing `date`.
pub fn month_key(date: &DateTime<Utc>) -> String {
    format!("{:04}-{:02}-01", date.year(), date.month())
}

/// Group dates (given in ascending id order) into runs of equal calendar
/// month. A new group starts whenever the month changes.
pub fn month_groups<'a>(dates: impl IntoIterator<Item = &'a DateTime<Utc>>) -> Vec<MonthGroup> {
    let mut groups: Vec<MonthGroup> = Vec::new();
    for (id, date) in dates.into_iter().enumerate() {
        let key = month_key(date);
        match groups.last_mut() {
            Some(last) if last.date == key => last.count += 1,
            _ => groups.push(MonthGroup {
                date: key,
                start_id: id as AssetId,
                count: 1,
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chunk(id: ChunkId, start: AssetId, end: AssetId) -> ChunkEntry {
        ChunkEntry {
            chunk_id: id,
            thumbnails_file: ArchiveKind::Thumbnails.file_name(id),
            originals_file: Some(ArchiveKind::Originals.file_name(id)),
            videos_file: None,
            start_index: start,
            end_index: end,
        }
    }

    fn sample() -> Manifest {
        Manifest {
            total_assets: 5,
            chunks: vec![chunk(0, 0, 1), chunk(1, 2, 4)],
            months: vec![
                MonthGroup { date: "2023-01-01".into(), start_id: 0, count: 3 },
                MonthGroup { date: "2023-02-01".into(), start_id: 3, count: 2 },
            ],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let m = sample();
        let bytes = m.encode().unwrap();
        assert_eq!(Manifest::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let json = String::from_utf8(sample().encode().unwrap()).unwrap();
        for field in ["totalAssets", "chunkId", "thumbnailsFile", "videosFile", "startIndex", "endIndex", "startId"] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
        assert!(json.contains("\"videosFile\":null"));
    }

    #[test]
    fn gap_rejected() {
        let mut m = sample();
        m.chunks[1].start_index = 3;
        assert!(matches!(Manifest::decode(&serde_json::to_vec(&m).unwrap()), Err(GalleryError::MalformedManifest(_))));
    }

    #[test]
    fn overlap_rejected() {
        let mut m = sample();
        m.chunks[1].start_index = 1;
        assert!(m.validate().is_err());
    }

    #[test]
    fn total_mismatch_rejected() {
        let mut m = sample();
        m.total_assets = 6;
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("totalAssets"), "{err}");
    }

    #[test]
    fn out_of_order_chunk_ids_rejected() {
        let mut m = sample();
        m.chunks[1].chunk_id = 5;
        assert!(m.validate().is_err());
    }

    #[test]
    fn bad_month_rejected() {
        let mut m = sample();
        m.months[1].date = "2023-02-15".into();
        assert!(m.validate().is_err());
        let mut m = sample();
        m.months[1].count = 1;
        assert!(m.validate().is_err());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(Manifest::decode(b"\x00\x01"), Err(GalleryError::MalformedManifest(_))));
    }

    #[test]
    fn empty_album_is_valid() {
        let m = Manifest::default();
        assert_eq!(Manifest::decode(&m.encode().unwrap()).unwrap(), m);
        assert!(m.chunk_for(0).is_none());
    }

    #[test]
    fn lookups() {
        let m = sample();
        assert_eq!(m.chunk_for(0).unwrap().chunk_id, 0);
        assert_eq!(m.chunk_for(1).unwrap().chunk_id, 0);
        assert_eq!(m.chunk_for(2).unwrap().chunk_id, 1);
        assert_eq!(m.chunk_for(4).unwrap().chunk_id, 1);
        assert!(m.chunk_for(5).is_none());
        assert_eq!(m.month_of(2).unwrap().date, "2023-01-01");
        assert_eq!(m.month_of(3).unwrap().date, "2023-02-01");
        assert!(m.month_of(5).is_none());
        assert_eq!(m.chunk(1).unwrap().file(ArchiveKind::Videos), None);
    }

    #[test]
    fn month_grouping_closes_on_change() {
        let d = |y, mo, day| Utc.with_ymd_and_hms(y, mo, day, 12, 0, 0).unwrap();
        let dates = [d(2022, 12, 31), d(2023, 1, 1), d(2023, 1, 30), d(2023, 3, 2), d(2023, 1, 9)];
        let groups = month_groups(&dates);
        let got: Vec<_> = groups.iter().map(|g| (g.date.as_str(), g.start_id, g.count)).collect();
        assert_eq!(
            got,
            [("2022-12-01", 0, 1), ("2023-01-01", 1, 2), ("2023-03-01", 3, 1), ("2023-01-01", 4, 1)]
        );
    }
}
