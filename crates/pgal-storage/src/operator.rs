//! OpenDAL Operator factory for album backends

use anyhow::{bail, Context, Result};
use opendal::Operator;
use pgal_core::config::StorageConfig;

/// Credentials for the S3 backend.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, falling back to the
    /// `PGAL_` prefixed names.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("PGAL_ACCESS_KEY_ID"))
            .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("PGAL_SECRET_ACCESS_KEY"))
            .context("AWS_SECRET_ACCESS_KEY not set")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Refuse (or warn about) plaintext endpoints.
fn check_tls(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            bail!(
                "endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "endpoint uses plaintext HTTP; album files are sealed but access patterns are visible"
        );
    }
    Ok(())
}

/// Build an operator rooted at the album for `storage.backend`.
///
/// `album_root` overrides `storage.root` (e.g. a directory given on the
/// command line). `credentials` is only consulted for `s3`.
pub fn build_operator(
    storage: &StorageConfig,
    album_root: Option<&str>,
    credentials: Option<&S3Credentials>,
) -> Result<Operator> {
    let root = album_root.unwrap_or(&storage.root);
    let op = match storage.backend.as_str() {
        "fs" => {
            let builder = opendal::services::Fs::default().root(root);
            Operator::new(builder).context("creating OpenDAL fs operator")?.finish()
        }
        "http" => {
            check_tls(storage)?;
            if storage.endpoint.is_empty() {
                bail!("storage.endpoint is required for the http backend");
            }
            let builder = opendal::services::Http::default()
                .endpoint(&storage.endpoint)
                .root(root);
            Operator::new(builder).context("creating OpenDAL http operator")?.finish()
        }
        "s3" => {
            check_tls(storage)?;
            let credentials = match credentials {
                Some(c) => c.clone(),
                None => S3Credentials::from_env()?,
            };
            // Path-style addressing (the opendal default) suits MinIO/SeaweedFS
            let mut builder = opendal::services::S3::default()
                .region(&storage.region)
                .bucket(&storage.bucket)
                .root(root)
                .access_key_id(&credentials.access_key_id)
                .secret_access_key(&credentials.secret_access_key);
            if !storage.endpoint.is_empty() {
                builder = builder.endpoint(&storage.endpoint);
            }
            Operator::new(builder).context("creating OpenDAL S3 operator")?.finish()
        }
        other => bail!("unknown storage backend {other:?} (expected fs, http or s3)"),
    };

    tracing::debug!(backend = %storage.backend, root, "storage operator ready");
    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

/// An empty in-process operator.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}
