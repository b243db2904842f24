//! pgal-build: turns a directory of photos and videos into a sealed album
//!
//! Pipeline:
//! ```text
//! scan → convert (P workers, resumable) → compact ids → plan chunks
//!      → per chunk: pack → deflate → seal → stage
//!      → publish staged chunks → manifest.enc
//! ```

pub mod convert;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod scan;
pub mod transcode;

pub use convert::{ConversionDriver, ConversionReport, ConvertedCache};
pub use pipeline::{build_album, BuildOptions, BuildReport, ProgressFn};
pub use planner::{plan_chunks, ChunkPlan, ChunkWriter, PlannedAsset};
pub use progress::{ProgressLedger, ProgressRecord, ProgressWriter};
pub use scan::{scan_source, DateExtractor, ModifiedTime, SourceAsset, SourceFile, SourceScan};
pub use transcode::{CommandTranscoder, ConvertedAsset, OutputExts, Transcoder};
