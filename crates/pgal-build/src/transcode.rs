//! Media conversion seam.
//!
//! [`Transcoder`] is synchronous: the conversion driver runs it on the
//! blocking pool. [`CommandTranscoder`] shells out to the commands in
//! `[transcode]` (ImageMagick / ffmpeg by default).

use anyhow::{bail, Context, Result};
use pgal_core::config::TranscodeConfig;
use pgal_core::AssetKind;
use std::path::Path;
use std::process::Command;

use crate::scan::SourceAsset;

/// Output file extensions, which also become archive entry suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputExts {
    pub image: String,
    pub video: String,
    pub thumb: String,
}

impl From<&TranscodeConfig> for OutputExts {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            image: config.image_ext.clone(),
            video: config.video_ext.clone(),
            thumb: config.thumb_ext.clone(),
        }
    }
}

impl Default for OutputExts {
    fn default() -> Self {
        Self::from(&TranscodeConfig::default())
    }
}

/// The display-ready renditions of one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedAsset {
    pub thumbnail: Vec<u8>,
    pub original: Option<Vec<u8>>,
    pub video: Option<Vec<u8>>,
}

impl ConvertedAsset {
    /// Bytes that count toward a chunk's ceiling (thumbnails never do).
    pub fn payload_bytes(&self) -> u64 {
        let original = self.original.as_ref().map_or(0, Vec::len);
        let video = self.video.as_ref().map_or(0, Vec::len);
        (original + video) as u64
    }
}

pub trait Transcoder: Send + Sync + 'static {
    /// Produce a thumbnail plus the renditions `asset.kind` calls for.
    fn convert(&self, asset: &SourceAsset) -> Result<ConvertedAsset>;

    fn output_exts(&self) -> OutputExts;
}

/// Runs external programs; `{input}` and `{output}` in each argv are
/// substituted with real paths.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    config: TranscodeConfig,
}

impl CommandTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    fn run(&self, argv: &[String], input: &Path, output: &Path) -> Result<Vec<u8>> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty transcode command");
        };
        let substitute = |arg: &String| -> String {
            arg.replace("{input}", &input.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        };

        let result = Command::new(substitute(program))
            .args(args.iter().map(substitute))
            .output()
            .with_context(|| format!("spawning {program}"))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!("{program} exited with {}: {}", result.status, stderr.trim());
        }
        std::fs::read(output).with_context(|| format!("{program} produced no output"))
    }
}

impl Transcoder for CommandTranscoder {
    fn convert(&self, asset: &SourceAsset) -> Result<ConvertedAsset> {
        let scratch = tempfile::tempdir().context("creating scratch dir")?;
        let exts = self.output_exts();
        let out = |name: &str, ext: &str| scratch.path().join(format!("{name}.{ext}"));

        let original = match asset.still() {
            Some(still) => Some(self.run(&self.config.image_command, &still.path, &out("original", &exts.image))?),
            None => None,
        };
        let video = match asset.motion() {
            Some(motion) => Some(self.run(&self.config.video_command, &motion.path, &out("video", &exts.video))?),
            None => None,
        };
        let thumbnail = match asset.kind {
            AssetKind::Video => self.run(
                &self.config.video_thumbnail_command,
                &asset.primary.path,
                &out("thumb", &exts.thumb),
            )?,
            AssetKind::Photo | AssetKind::Live => {
                self.run(&self.config.thumbnail_command, &asset.primary.path, &out("thumb", &exts.thumb))?
            }
        };

        Ok(ConvertedAsset {
            thumbnail,
            original,
            video,
        })
    }

    fn output_exts(&self) -> OutputExts {
        OutputExts::from(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SourceFile;
    use chrono::Utc;

    fn photo(path: &Path) -> SourceAsset {
        SourceAsset {
            kind: AssetKind::Photo,
            primary: SourceFile {
                path: path.to_path_buf(),
                rel: "p.jpg".into(),
                size: 3,
            },
            companion: None,
            date: Utc::now(),
        }
    }

    fn copy_config() -> TranscodeConfig {
        let cp = vec!["cp".to_string(), "{input}".to_string(), "{output}".to_string()];
        TranscodeConfig {
            image_command: cp.clone(),
            video_command: cp.clone(),
            thumbnail_command: cp.clone(),
            video_thumbnail_command: cp,
            ..TranscodeConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_substitution() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("p.jpg");
        std::fs::write(&input, b"abc").unwrap();

        let converted = CommandTranscoder::new(copy_config()).convert(&photo(&input)).unwrap();
        assert_eq!(converted.thumbnail, b"abc");
        assert_eq!(converted.original.as_deref(), Some(&b"abc"[..]));
        assert!(converted.video.is_none());
        assert_eq!(converted.payload_bytes(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("missing.jpg");
        let err = CommandTranscoder::new(copy_config()).convert(&photo(&input)).unwrap_err();
        assert!(err.to_string().contains("cp exited"), "{err}");
    }

    #[test]
    fn test_empty_command_rejected() {
        let config = TranscodeConfig {
            image_command: vec![],
            ..copy_config()
        };
        let tmp = tempfile::tempdir().unwrap();
        let err = CommandTranscoder::new(config)
            .convert(&photo(&tmp.path().join("p.jpg")))
            .unwrap_err();
        assert!(err.to_string().contains("empty transcode command"));
    }
}
