use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use media_io::{FfmpegTools, FrameExtractor, JpegCodec, MediaError, RgbaFrame, RotationLookup, VideoRef};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thumbnails::{FolderStatus, ThumbnailConfig, ThumbnailService};
use tracing::{info, warn};
use walkdir::WalkDir;

const VIDEO_EXTS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm", "avi", "3gp", "ts"];

#[derive(Parser, Debug)]
#[command(name = "thumbs", version, about = "Video thumbnail cache")]
struct Cli {
    /// Override the cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Produce one thumbnail and write it as PNG
    Get {
        video: PathBuf,
        #[arg(long, default_value_t = 200)]
        width: u32,
        #[arg(long, default_value_t = 200)]
        height: u32,
        #[arg(long, default_value = "thumb.png")]
        out: PathBuf,
        /// Only look in the caches
        #[arg(long)]
        cached_only: bool,
    },
    /// Pre-generate thumbnails for every video under a folder
    Warm {
        folder: PathBuf,
        #[arg(long, default_value_t = 200)]
        width: u32,
        #[arg(long, default_value_t = 200)]
        height: u32,
        #[arg(long)]
        json: bool,
    },
    /// Delete every cached thumbnail
    Clear,
}

#[derive(Debug, Serialize)]
struct WarmReport {
    folder: String,
    videos: usize,
    ready: usize,
    status: FolderStatus,
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_config(cli: &Cli) -> Result<ThumbnailConfig> {
    let mut cfg = match &cli.config {
        Some(p) => ThumbnailConfig::load(p).with_context(|| format!("read config {}", p.display()))?,
        None => ThumbnailConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        cfg = cfg.with_cache_dir(dir);
    }
    Ok(cfg)
}

fn scan_folder(tools: &FfmpegTools, folder: &Path) -> Vec<VideoRef> {
    let mut paths: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths.iter().filter_map(|p| match tools.probe(p) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %p.display(), error = %e, "skipping unreadable video");
            None
        }
    }).collect()
}

fn open_service(cfg: &ThumbnailConfig) -> Result<(Arc<FfmpegTools>, ThumbnailService)> {
    let tools = FfmpegTools::locate().context("thumbs needs ffmpeg and ffprobe")?;
    let tools = Arc::new(tools.with_timeout(cfg.extraction_timeout()));
    let svc = ThumbnailService::new(cfg, tools.clone(), tools.clone(), Arc::new(JpegCodec))
        .with_context(|| format!("open cache at {}", cfg.cache_dir.display()))?;
    Ok((tools, svc))
}

/// Stands in for ffmpeg when a command only touches the cache directory.
struct NoTools;

impl FrameExtractor for NoTools {
    fn extract_frame(&self, _locator: &str, _position_secs: f64, _dimension: u32, _prefer_hardware: bool) -> Result<Option<RgbaFrame>, MediaError> {
        Err(MediaError::ToolMissing("ffmpeg"))
    }
}

impl RotationLookup for NoTools {
    fn rotation_degrees(&self, _locator: &str) -> Result<u32, MediaError> {
        Err(MediaError::ToolMissing("ffprobe"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    match cli.cmd {
        Cmd::Get { video, width, height, out, cached_only } => {
            let (tools, svc) = open_service(&cfg)?;
            let probe_tools = tools.clone();
            let path = video.clone();
            let video_ref = tokio::task::spawn_blocking(move || probe_tools.probe(&path)).await?
                .with_context(|| format!("probe {}", video.display()))?;
            let result = if cached_only {
                svc.load_cached_thumbnail(&video_ref, width, height).await
            } else {
                svc.load_thumbnail(&video_ref, width, height).await
            };
            let frame = match result {
                Ok(f) => f,
                Err(e) => bail!("no thumbnail for {}: {}", video.display(), e),
            };
            frame.to_image().save(&out).with_context(|| format!("write {}", out.display()))?;
            info!(out = %out.display(), width = frame.width, height = frame.height, "thumbnail written");
        }
        Cmd::Warm { folder, width, height, json } => {
            let (tools, svc) = open_service(&cfg)?;
            let scan_tools = tools.clone();
            let root = folder.clone();
            let videos = tokio::task::spawn_blocking(move || scan_folder(&scan_tools, &root)).await?;
            let folder_id = folder.to_string_lossy().to_string();
            let ready = svc.subscribe();
            let count = videos.len();
            info!(folder = %folder_id, videos = count, "warming folder");
            svc.start_folder_generation(&folder_id, videos, width, height);
            svc.join_folder(&folder_id).await;
            let report = WarmReport { folder: folder_id.clone(), videos: count, ready: ready.try_iter().count(), status: svc.folder_status(&folder_id) };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}: {} newly ready of {} videos ({:?})", report.folder, report.ready, report.videos, report.status);
            }
        }
        Cmd::Clear => {
            // clearing never decodes, so the media tools are not required
            let svc = ThumbnailService::new(&cfg, Arc::new(NoTools), Arc::new(NoTools), Arc::new(JpegCodec))
                .with_context(|| format!("open cache at {}", cfg.cache_dir.display()))?;
            svc.clear_thumbnail_cache().await;
            println!("cleared {}", cfg.cache_dir.display());
        }
    }
    Ok(())
}
