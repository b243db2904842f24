use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GalleryError, GalleryResult};

/// Top-level configuration (loaded from pgal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub log: LogConfig,
    pub build: BuildConfig,
    pub transcode: TranscodeConfig,
    pub viewer: ViewerConfig,
    pub storage: StorageConfig,
}

impl GalleryConfig {
    /// Parse a config file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> GalleryResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| GalleryError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Producer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Originals+video byte budget per chunk, in MiB
    pub chunk_ceiling_mb: u64,
    /// Conversion worker count (0 = host parallelism)
    pub parallelism: usize,
    /// Progress ledger and converted-asset cache (default: `<output>/.pgal-work`)
    pub work_dir: Option<PathBuf>,
    /// Deflate the packed archives before sealing
    pub compress: bool,
    /// Deflate level 0-9
    pub compression_level: u32,
}

/// External transcoder invocation. `{input}` and `{output}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub image_command: Vec<String>,
    pub video_command: Vec<String>,
    pub thumbnail_command: Vec<String>,
    /// Thumbnails of videos are taken from a single extracted frame
    pub video_thumbnail_command: Vec<String>,
    pub image_ext: String,
    pub video_ext: String,
    pub thumb_ext: String,
}

/// Consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Local decoded-asset store root; one sub-directory per album
    pub cache_dir: PathBuf,
    /// Bound on key setup + manifest fetch
    pub handshake_timeout_secs: u64,
}

/// Where the sealed album files are served from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "fs", "http" or "s3"
    pub backend: String,
    /// Directory (fs) or path prefix (http/s3)
    pub root: String,
    /// HTTP base URL or S3 endpoint
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            chunk_ceiling_mb: 100,
            parallelism: 0,
            work_dir: None,
            compress: true,
            compression_level: 6,
        }
    }
}

impl BuildConfig {
    pub fn chunk_ceiling_bytes(&self) -> u64 {
        self.chunk_ceiling_mb.max(1) * 1024 * 1024
    }

    /// Configured worker count, falling back to host parallelism.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        let strings = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            image_command: strings(&["magick", "{input}", "-auto-orient", "-quality", "85", "{output}"]),
            video_command: strings(&[
                "ffmpeg", "-y", "-loglevel", "error", "-i", "{input}", "-c:v", "libx264",
                "-preset", "medium", "-crf", "23", "-c:a", "aac", "-movflags", "+faststart",
                "{output}",
            ]),
            thumbnail_command: strings(&[
                "magick", "{input}", "-auto-orient", "-thumbnail", "400x400^", "-quality", "70",
                "{output}",
            ]),
            video_thumbnail_command: strings(&[
                "ffmpeg", "-y", "-loglevel", "error", "-i", "{input}", "-frames:v", "1",
                "-vf", "scale=400:-2", "{output}",
            ]),
            image_ext: "webp".into(),
            video_ext: "mp4".into(),
            thumb_ext: "webp".into(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("~/.cache/pgal"),
            handshake_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: ".".into(),
            endpoint: String::new(),
            region: "us-east-1".into(),
            bucket: "pgal".into(),
            enforce_tls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[build]
chunk_ceiling_mb = 64
parallelism = 3
work_dir = "/var/tmp/pgal"
compress = false

[transcode]
image_ext = "avif"

[viewer]
cache_dir = "/var/cache/pgal"
handshake_timeout_secs = 5

[storage]
backend = "s3"
endpoint = "https://s3.example.com"
bucket = "albums"
enforce_tls = true
"#;
        let config: GalleryConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.build.chunk_ceiling_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.build.effective_parallelism(), 3);
        assert_eq!(config.build.work_dir, Some(PathBuf::from("/var/tmp/pgal")));
        assert!(!config.build.compress);
        assert_eq!(config.transcode.image_ext, "avif");
        assert_eq!(config.transcode.video_ext, "mp4");
        assert_eq!(config.viewer.handshake_timeout_secs, 5);
        assert_eq!(config.storage.backend, "s3");
        assert!(config.storage.enforce_tls);
    }

    #[test]
    fn test_parse_defaults() {
        let config: GalleryConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.build.chunk_ceiling_mb, 100);
        assert!(config.build.compress);
        assert!(config.build.effective_parallelism() >= 1);
        assert_eq!(config.viewer.handshake_timeout_secs, 30);
        assert_eq!(config.storage.backend, "fs");
        assert!(config.transcode.image_command.iter().any(|a| a == "{input}"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = GalleryConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.build.chunk_ceiling_mb, 100);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgal.toml");
        std::fs::write(&path, "[build]\nchunk_ceiling_mb = \"lots\"\n").unwrap();
        let err = GalleryConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, GalleryError::Config(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = GalleryConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: GalleryConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.viewer.cache_dir, parsed.viewer.cache_dir);
        assert_eq!(config.transcode.video_command, parsed.transcode.video_command);
    }
}
