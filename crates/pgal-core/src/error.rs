use std::sync::Arc;

use thiserror::Error;

use crate::types::{ArchiveKind, AssetId, ChunkId, MANIFEST_FILE};

pub type GalleryResult<T> = Result<T, GalleryError>;

/// Shown for any failure while opening an album. Deliberately identical for a
/// bad password, a missing album and a corrupt manifest.
pub const OPEN_FAILURE_MESSAGE: &str = "wrong password or album not found";

#[derive(Debug, Error)]
pub enum GalleryError {
    /// Envelope tag did not verify: wrong password, wrong album, or corrupted bytes.
    #[error("authentication failed: envelope did not verify")]
    Authentication,

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("transport error fetching {name}: {reason}")]
    Transport { name: String, reason: String },

    #[error("conversion failed for asset {asset}: {reason}")]
    Conversion { asset: AssetId, reason: String },

    /// A chunk fetch/decode failed. Shared between every waiter on that chunk.
    #[error("{kind} chunk {chunk} unavailable: {source}")]
    ChunkFailed {
        kind: ArchiveKind,
        chunk: ChunkId,
        #[source]
        source: Arc<GalleryError>,
    },

    #[error("asset {0} is outside the album")]
    UnknownAsset(AssetId),

    #[error("album session closed")]
    SessionClosed,

    #[error("album open timed out after {0}s")]
    HandshakeTimeout(u64),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GalleryError {
    /// Whether an explicit re-request may succeed. Only chunk-scoped failures
    /// qualify; manifest and key failures abort the session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GalleryError::ChunkFailed { .. } | GalleryError::Transport { .. })
    }

    /// Message suitable for showing to a person.
    ///
    /// Album-open failures all collapse to [`OPEN_FAILURE_MESSAGE`] so the
    /// response does not reveal which check failed.
    pub fn user_message(&self) -> String {
        match self {
            GalleryError::Authentication
            | GalleryError::MalformedManifest(_)
            | GalleryError::HandshakeTimeout(_) => OPEN_FAILURE_MESSAGE.to_string(),
            GalleryError::Transport { name, .. } if name == MANIFEST_FILE => {
                OPEN_FAILURE_MESSAGE.to_string()
            }
            GalleryError::ChunkFailed { kind, chunk, .. } => {
                format!("{kind} for this item could not be loaded (chunk {chunk}); try again")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_share_one_message() {
        let auth = GalleryError::Authentication.user_message();
        let manifest = GalleryError::MalformedManifest("gap at 12".into()).user_message();
        assert_eq!(auth, OPEN_FAILURE_MESSAGE);
        assert_eq!(auth, manifest);
        let missing = GalleryError::Transport {
            name: MANIFEST_FILE.into(),
            reason: "NotFound".into(),
        };
        assert_eq!(missing.user_message(), OPEN_FAILURE_MESSAGE);
    }

    #[test]
    fn chunk_failures_are_retryable() {
        let err = GalleryError::ChunkFailed {
            kind: ArchiveKind::Originals,
            chunk: 3,
            source: Arc::new(GalleryError::Authentication),
        };
        assert!(err.is_retryable());
        assert!(err.user_message().contains("chunk 3"));
        assert!(!GalleryError::Authentication.is_retryable());
    }
}
