//! Where sealed album files come from.

use opendal::Operator;
use pgal_core::{GalleryError, GalleryResult};
use std::future::Future;

/// Fetch one sealed file of the album by name.
///
/// Failures are reported as [`GalleryError::Transport`].
pub trait ChunkSource: Send + Sync + 'static {
    fn fetch(&self, name: &str) -> impl Future<Output = GalleryResult<Vec<u8>>> + Send;
}

impl ChunkSource for Operator {
    fn fetch(&self, name: &str) -> impl Future<Output = GalleryResult<Vec<u8>>> + Send {
        let op = self.clone();
        let name = name.to_string();
        async move {
            match op.read(&name).await {
                Ok(buf) => {
                    tracing::debug!(file = %name, bytes = buf.len(), "fetched");
                    Ok(buf.to_vec())
                }
                Err(e) => Err(GalleryError::Transport {
                    reason: e.to_string(),
                    name,
                }),
            }
        }
    }
}

impl<S: ChunkSource> ChunkSource for std::sync::Arc<S> {
    fn fetch(&self, name: &str) -> impl Future<Output = GalleryResult<Vec<u8>>> + Send {
        (**self).fetch(name)
    }
}
