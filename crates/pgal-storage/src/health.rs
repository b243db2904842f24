//! Album presence check

use anyhow::Result;
use opendal::Operator;
use pgal_core::MANIFEST_FILE;

/// Verify the backend is reachable and serves an album manifest.
pub async fn check_album(op: &Operator) -> Result<()> {
    op.stat(MANIFEST_FILE)
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("album not available: {e}"))
}

/// Returns true if the album manifest is reachable, false otherwise
pub async fn is_available(op: &Operator) -> bool {
    check_album(op).await.is_ok()
}
