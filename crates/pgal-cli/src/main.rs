//! pgal: private gallery album tool
//!
//! Commands:
//!   build <source> <output>           - convert, chunk and seal a directory into an album
//!   info <location>                   - open an album and summarise its manifest
//!   export <location> <id> <out>      - decode one asset through a viewer session
//!   config show                       - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pgal_build::{build_album, BuildOptions, CommandTranscoder, ModifiedTime, ProgressFn};
use pgal_core::config::GalleryConfig;
use pgal_core::error::OPEN_FAILURE_MESSAGE;
use pgal_core::{ArchiveKind, AssetId, GalleryError};
use pgal_storage::{build_operator, is_available, S3Credentials};
use pgal_viewer::{AlbumSession, SessionOptions};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pgal",
    version,
    about = "Private gallery album tool",
    long_about = "pgal: build encrypted, chunked photo/video albums and read them back"
)]
struct Cli {
    /// Path to pgal.toml configuration file
    #[arg(long, short = 'c', env = "PGAL_CONFIG", default_value = "pgal.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "PGAL_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "PGAL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Part {
    Thumb,
    Original,
    Video,
}

impl From<Part> for ArchiveKind {
    fn from(part: Part) -> Self {
        match part {
            Part::Thumb => ArchiveKind::Thumbnails,
            Part::Original => ArchiveKind::Originals,
            Part::Video => ArchiveKind::Videos,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert, chunk and seal a directory of photos and videos
    ///
    /// An interrupted build resumes from its work directory as long as the
    /// source tree is unchanged. Assets that fail to convert are skipped and
    /// reported; they do not fail the build.
    Build {
        /// Source directory
        source: PathBuf,
        /// Output directory for the sealed album
        output: PathBuf,
        /// Album name (part of the key derivation)
        #[arg(long, short = 'a')]
        album: String,
        /// Album password (prompted for when absent)
        #[arg(long, env = "PGAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Conversion workers (default: [build] parallelism, else host parallelism)
        #[arg(long, short = 'j')]
        parallelism: Option<usize>,
        /// Chunk ceiling in MiB (overrides [build] chunk_ceiling_mb)
        #[arg(long)]
        chunk_mb: Option<u64>,
        /// Progress ledger and converted-asset directory (overrides [build] work_dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Skip the deflate pass
        #[arg(long)]
        no_compress: bool,
    },

    /// Open an album and print its manifest summary
    Info {
        /// Album directory (fs backend) or path prefix (http/s3)
        location: String,
        #[arg(long, short = 'a')]
        album: String,
        #[arg(long, env = "PGAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// List every chunk
        #[arg(long)]
        chunks: bool,
    },

    /// Decode one asset and write it to a file
    Export {
        /// Album directory (fs backend) or path prefix (http/s3)
        location: String,
        /// Asset id
        id: AssetId,
        /// Destination file
        out: PathBuf,
        #[arg(long, short = 'a')]
        album: String,
        #[arg(long, env = "PGAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Which rendition to export
        #[arg(long, value_enum, default_value = "original")]
        part: Part,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GalleryConfig::from_file(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "pgal starting"
    );

    match cli.command {
        Commands::Build {
            source,
            output,
            album,
            password,
            parallelism,
            chunk_mb,
            work_dir,
            no_compress,
        } => {
            let mut build = config.build.clone();
            if let Some(p) = parallelism {
                build.parallelism = p;
            }
            if let Some(mb) = chunk_mb {
                build.chunk_ceiling_mb = mb;
            }
            if work_dir.is_some() {
                build.work_dir = work_dir;
            }
            if no_compress {
                build.compress = false;
            }
            let password = resolve_password(password)?;
            let opts = BuildOptions::from_config(source, output, album, password, &build);
            cmd_build(&config, opts).await
        }
        Commands::Info {
            location,
            album,
            password,
            chunks,
        } => cmd_info(&config, &location, &album, resolve_password(password)?, chunks).await,
        Commands::Export {
            location,
            id,
            out,
            album,
            password,
            part,
        } => {
            let password = resolve_password(password)?;
            cmd_export(&config, &location, &album, password, id, part.into(), &out).await
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn resolve_password(given: Option<String>) -> Result<SecretString> {
    let password = match given {
        Some(p) => p,
        None => rpassword::prompt_password("Album password: ").context("reading password")?,
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(SecretString::from(password))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `pgal build` ──────────────────────────────────────────────────────────────

async fn cmd_build(config: &GalleryConfig, opts: BuildOptions) -> Result<()> {
    println!(
        "Building album '{}' from {} → {} ({} workers)",
        opts.album,
        opts.source.display(),
        opts.output.display(),
        opts.parallelism,
    );

    let pb = make_progress_bar("build");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, stage| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(stage.to_string());
    });

    let transcoder = Arc::new(CommandTranscoder::new(config.transcode.clone()));
    let result = build_album(&opts, transcoder, Arc::new(ModifiedTime), Some(&progress)).await;
    pb.finish_and_clear();
    let report = result.with_context(|| format!("building album from {}", opts.source.display()))?;

    println!("  assets:  {} of {} scanned", report.total_assets, report.scanned);
    println!("  chunks:  {}", report.chunks);
    println!("  bytes:   {}", fmt_bytes(report.bytes_written));
    if report.resumed > 0 {
        println!("  resumed: {} conversions reused", report.resumed);
    }
    if !report.failed.is_empty() {
        println!("  skipped: {} assets failed to convert", report.failed.len());
        for (path, reason) in &report.failed {
            println!("    {path}: {reason}");
        }
    }
    Ok(())
}

// ── Viewer commands ───────────────────────────────────────────────────────────

async fn open_session(
    config: &GalleryConfig,
    location: &str,
    album: &str,
    password: SecretString,
) -> Result<AlbumSession> {
    let credentials = match config.storage.backend.as_str() {
        "s3" => Some(S3Credentials::from_env().context("loading S3 credentials")?),
        _ => None,
    };
    let op = build_operator(&config.storage, Some(location), credentials.as_ref())
        .context("building storage operator")?;
    if !is_available(&op).await {
        tracing::debug!(location, "no manifest at album location");
        anyhow::bail!(OPEN_FAILURE_MESSAGE);
    }
    let mut opts = SessionOptions::new(album, password, &config.viewer);
    opts.cache_dir = expand_tilde(&opts.cache_dir);
    AlbumSession::open(op, opts).await.map_err(|e| {
        tracing::debug!("album open failed: {e}");
        anyhow::anyhow!(e.user_message())
    })
}

async fn cmd_info(
    config: &GalleryConfig,
    location: &str,
    album: &str,
    password: SecretString,
    list_chunks: bool,
) -> Result<()> {
    let session = open_session(config, location, album, password).await?;
    let manifest = session.manifest();

    println!("album:    {}", session.album());
    println!("assets:   {}", manifest.total_assets);
    println!("chunks:   {}", manifest.chunks.len());
    println!("cache:    {:?}", session.cache_verdict());
    println!("months:");
    for month in &manifest.months {
        println!("  {}  {:>6} assets from #{}", month_label(&month.date), month.count, month.start_id);
    }
    if list_chunks {
        println!("chunk list:");
        for chunk in &manifest.chunks {
            println!(
                "  {:>4}  [{}, {}]  {} {} {}",
                chunk.chunk_id,
                chunk.start_index,
                chunk.end_index,
                chunk.thumbnails_file,
                chunk.originals_file.as_deref().unwrap_or("-"),
                chunk.videos_file.as_deref().unwrap_or("-"),
            );
        }
    }
    session.close().await;
    Ok(())
}

async fn cmd_export(
    config: &GalleryConfig,
    location: &str,
    album: &str,
    password: SecretString,
    id: AssetId,
    kind: ArchiveKind,
    out: &Path,
) -> Result<()> {
    let session = open_session(config, location, album, password).await?;

    let meta = session.asset_meta(id).await.map_err(describe)?;
    let bytes = session.get_asset(kind, id).await.map_err(describe)?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("writing {}", out.display()))?;

    println!("asset #{id} ({:?}, {})", meta.kind, meta.date.format("%Y-%m-%d %H:%M"));
    println!("  {kind}: {} → {}", fmt_bytes(bytes.len() as u64), out.display());
    session.close().await;
    Ok(())
}

fn describe(e: GalleryError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

// ── `pgal config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &GalleryConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

/// `YYYY-MM` of a month's first day; anything shorter is shown as is.
fn month_label(date: &str) -> &str {
    date.get(..7).unwrap_or(date)
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
