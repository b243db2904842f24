//! Whole-archive deflate pass (gzip framing)
//!
//! Packed archives may optionally be compressed before sealing. The gzip
//! magic `1f 8b` marks a compressed stream; an uncompressed archive can never
//! start with it because entry names reject control characters.

use std::io::{Read, Write};

use anyhow::Context;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use pgal_core::{GalleryError, GalleryResult};

/// Two-byte prefix of every compressed archive
pub const MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default deflate level
pub const DEFAULT_LEVEL: u32 = 6;

pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(&MAGIC)
}

/// Deflate `data` at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> GalleryResult<Vec<u8>> {
    let mut enc = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::new(level.min(9)),
    );
    enc.write_all(data).context("deflate archive")?;
    Ok(enc.finish().context("finish deflate stream")?)
}

/// Inflate a stream produced by [`compress`]. Corrupt or truncated input is a
/// malformed archive.
pub fn decompress(data: &[u8]) -> GalleryResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| GalleryError::MalformedArchive(format!("inflate failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_small() {
        let data = b"hello deflated archive";
        let packed = compress(data, DEFAULT_LEVEL).unwrap();
        assert!(is_compressed(&packed));
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn zeros_shrink() {
        let data = vec![0u8; 64 * 1024];
        let packed = compress(&data, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < data.len() / 10);
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let packed = compress(&vec![3u8; 10_000], DEFAULT_LEVEL).unwrap();
        let err = decompress(&packed[..packed.len() / 2]).unwrap_err();
        assert!(matches!(err, GalleryError::MalformedArchive(_)));
    }

    #[test]
    fn raw_archive_is_not_compressed() {
        let raw = crate::archive::pack(&crate::archive::Archive::new()).unwrap();
        assert!(!is_compressed(&raw));
    }

    proptest! {
        #[test]
        fn compress_decompress_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..=65536),
            level in 0u32..=9,
        ) {
            let packed = compress(&data, level).unwrap();
            prop_assert_eq!(decompress(&packed).unwrap(), data);
        }
    }
}
