//! Tar container for a flat namespace of named blobs
//!
//! Packed with the `tar` crate as plain ustar: one 512-byte header per entry
//! (name, octal size, checksum), the blob padded to a block multiple, then
//! two all-zero end blocks. `tar -tf` can list a decompressed archive.
//!
//! Unpacking stops at the first all-zero header. A truncated blob, a missing
//! end block, a bad checksum or an undecodable size rejects the whole archive;
//! no partial entry set is ever returned.

use std::io::Read;

use pgal_core::{GalleryError, GalleryResult};
use tar::{Builder, EntryType, Header};

use crate::compress;

pub const BLOCK_SIZE: usize = 512;

/// Maximum entry name length in bytes (the ustar name field)
pub const NAME_LEN: usize = 100;

/// 11 octal digits
const MAX_ENTRY_SIZE: u64 = (1 << 33) - 1;

/// Ordered name → bytes mapping. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    entries: Vec<(String, Vec<u8>)>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Rejects names that are empty, longer than
    /// [`NAME_LEN`] bytes, contain control characters or path separators,
    /// or already exist.
    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) -> GalleryResult<()> {
        let name = name.into();
        validate_name(&name)?;
        if data.len() as u64 > MAX_ENTRY_SIZE {
            return Err(malformed(format!("entry {name} too large: {} bytes", data.len())));
        }
        if self.get(&name).is_some() {
            return Err(malformed(format!("duplicate entry: {name}")));
        }
        self.entries.push((name, data));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_slice()))
    }

    pub fn into_entries(self) -> Vec<(String, Vec<u8>)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of blob sizes, excluding headers and padding.
    pub fn payload_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, d)| d.len() as u64).sum()
    }
}

fn validate_name(name: &str) -> GalleryResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(malformed(format!("invalid entry name: {name:?}")));
    }
    if name.len() > NAME_LEN {
        return Err(malformed(format!(
            "entry name longer than {NAME_LEN} bytes: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(malformed(format!("entry name has control characters: {name:?}")));
    }
    // the namespace is flat; a separator would become a tar path component
    if name.contains(['/', '\\']) {
        return Err(malformed(format!("entry name has a path separator: {name}")));
    }
    Ok(())
}

fn malformed(msg: String) -> GalleryError {
    GalleryError::MalformedArchive(msg)
}

/// Serialise `archive` as a ustar stream. No compression.
pub fn pack(archive: &Archive) -> GalleryResult<Vec<u8>> {
    let body: usize = archive
        .entries
        .iter()
        .map(|(_, d)| BLOCK_SIZE + padded_len(d.len()))
        .sum();
    let mut builder = Builder::new(Vec::with_capacity(body + 2 * BLOCK_SIZE));

    for (name, data) in &archive.entries {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder
            .append_data(&mut header, name, data.as_slice())
            .map_err(|e| malformed(format!("packing entry {name}: {e}")))?;
    }
    builder
        .into_inner()
        .map_err(|e| malformed(format!("finishing archive: {e}")))
}

/// Parse an archive, inflating it first if it carries the deflate magic.
pub fn unpack(data: &[u8]) -> GalleryResult<Archive> {
    if compress::is_compressed(data) {
        let raw = compress::decompress(data)?;
        return unpack_raw(&raw);
    }
    unpack_raw(data)
}

fn unpack_raw(data: &[u8]) -> GalleryResult<Archive> {
    let mut archive = Archive::new();
    let mut reader = tar::Archive::new(data);
    // offset just past the last blob's padding
    let mut end: u64 = 0;

    let entries = reader
        .entries()
        .map_err(|e| malformed(format!("unreadable archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| malformed(format!("bad header after offset {end}: {e}")))?;
        let off = entry.raw_header_position();
        if !entry.header().entry_type().is_file() {
            return Err(malformed(format!("entry at offset {off} is not a regular file")));
        }
        let name = String::from_utf8(entry.path_bytes().into_owned())
            .map_err(|_| malformed(format!("header at offset {off}: name is not UTF-8")))?;

        let size = entry.size();
        let cap = usize::try_from(size).unwrap_or(usize::MAX).min(data.len());
        let mut blob = Vec::with_capacity(cap);
        entry
            .read_to_end(&mut blob)
            .map_err(|e| malformed(format!("entry {name}: {e}")))?;
        if blob.len() as u64 != size {
            return Err(malformed(format!(
                "entry {name}: truncated blob ({size} bytes declared, {} available)",
                blob.len()
            )));
        }

        end = entry.raw_file_position() + padded_len(blob.len()) as u64;
        archive.insert(name, blob)?;
    }

    // tar readers accept a clean EOF in place of the end marker; this format does not
    let terminated = usize::try_from(end)
        .ok()
        .and_then(|end| data.get(end..end + BLOCK_SIZE))
        .is_some_and(|block| block.iter().all(|b| *b == 0));
    if !terminated {
        return Err(malformed(format!(
            "truncated at offset {end}: missing end-of-archive block"
        )));
    }

    tracing::trace!(entries = archive.len(), "unpacked archive");
    Ok(archive)
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sample() -> Archive {
        let mut a = Archive::new();
        a.insert("thumb0.webp", b"tiny".to_vec()).unwrap();
        a.insert("thumb1.webp", vec![7u8; 1500]).unwrap();
        a.insert("meta.json", b"{}".to_vec()).unwrap();
        a
    }

    #[test]
    fn round_trip_preserves_order() {
        let a = sample();
        let packed = pack(&a).unwrap();
        assert_eq!(packed.len() % BLOCK_SIZE, 0);
        let back = unpack(&packed).unwrap();
        assert_eq!(back, a);
        let names: Vec<_> = back.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["thumb0.webp", "thumb1.webp", "meta.json"]);
    }

    #[test]
    fn layout_is_block_aligned() {
        let a = sample();
        // 3 headers + blobs (1 + 3 + 1 blocks) + 2 end blocks
        assert_eq!(pack(&a).unwrap().len(), (3 + 5 + 2) * BLOCK_SIZE);
    }

    #[test]
    fn empty_archive() {
        let packed = pack(&Archive::new()).unwrap();
        assert_eq!(packed, vec![0u8; 2 * BLOCK_SIZE]);
        assert!(unpack(&packed).unwrap().is_empty());
    }

    #[test]
    fn size_field_is_octal() {
        let mut a = Archive::new();
        a.insert("x", vec![1u8; 8]).unwrap();
        let packed = pack(&a).unwrap();
        assert_eq!(&packed[124..136], b"00000000010\0");
    }

    #[test]
    fn truncated_blob_rejected() {
        let packed = pack(&sample()).unwrap();
        // cut inside the second entry's blob
        let cut = &packed[..BLOCK_SIZE * 3 + 100];
        let err = unpack(cut).unwrap_err();
        assert!(matches!(err, GalleryError::MalformedArchive(_)), "{err}");
    }

    #[test]
    fn missing_end_block_rejected() {
        let packed = pack(&sample()).unwrap();
        let cut = &packed[..packed.len() - 2 * BLOCK_SIZE];
        assert!(matches!(unpack(cut), Err(GalleryError::MalformedArchive(_))));
    }

    #[test]
    fn garbage_size_rejected() {
        let mut packed = pack(&sample()).unwrap();
        let mut header = Header::new_old();
        header.as_mut_bytes().copy_from_slice(&packed[..BLOCK_SIZE]);
        header.as_old_mut().size.copy_from_slice(b"9999zzzz\0\0\0\0");
        // keep the checksum valid so only the size is wrong
        header.set_cksum();
        packed[..BLOCK_SIZE].copy_from_slice(header.as_bytes());
        let err = unpack(&packed).unwrap_err();
        assert!(matches!(err, GalleryError::MalformedArchive(_)), "{err}");
    }

    #[test]
    fn ustar_magic_written() {
        let packed = pack(&sample()).unwrap();
        assert_eq!(&packed[257..263], b"ustar\0");
        assert_eq!(&packed[..11], b"thumb0.webp");
    }

    #[test]
    fn corrupted_header_rejected() {
        let mut packed = pack(&sample()).unwrap();
        packed[3] ^= 0x20;
        assert!(matches!(unpack(&packed), Err(GalleryError::MalformedArchive(_))));
    }

    #[test]
    fn name_rules() {
        let mut a = Archive::new();
        assert!(a.insert("", vec![]).is_err());
        assert!(a.insert("x".repeat(101), vec![]).is_err());
        assert!(a.insert("bad\u{1f}name", vec![]).is_err());
        assert!(a.insert("dir/thumb0.webp", vec![]).is_err());
        assert!(a.insert("..", vec![]).is_err());
        a.insert("x".repeat(100), vec![]).unwrap();
        assert!(a.insert("x".repeat(100), vec![]).is_err(), "duplicates rejected");
    }

    #[test]
    fn compressed_archives_unpack_transparently() {
        let a = sample();
        let packed = crate::compress::compress(&pack(&a).unwrap(), 6).unwrap();
        assert!(crate::compress::is_compressed(&packed));
        assert_eq!(unpack(&packed).unwrap(), a);
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(
            entries in proptest::collection::btree_map(
                "[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,99}",
                proptest::collection::vec(any::<u8>(), 0..2048),
                0..12,
            )
        ) {
            let mut a = Archive::new();
            for (name, data) in &entries {
                a.insert(name.clone(), data.clone()).unwrap();
            }
            let back = unpack(&pack(&a).unwrap()).unwrap();
            let got: BTreeMap<String, Vec<u8>> = back.into_entries().into_iter().collect();
            prop_assert_eq!(got, entries);
        }
    }
}
