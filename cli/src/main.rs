use image::ImageReader;
use scroll_stitch_common::config::Config;
use scroll_stitch_common::frame::{Frame, FrameError};
use scroll_stitch_engine::StitchingEngine;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const USAGE: &str = "Usage: scroll-stitch <config.toml> <frame> [<frame> ...]";

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{USAGE}")]
    Usage,
    #[error("failed to read image {0}: {1}")]
    Open(String, std::io::Error),
    #[error("failed to decode image {0}: {1}")]
    Decode(String, image::ImageError),
    #[error("invalid frame {0}: {1}")]
    Frame(String, FrameError),
    #[error("failed to write composite {0}: {1}")]
    Save(String, String),
}

/// Usage: scroll-stitch <config.toml> <frame> [<frame> ...]
///
/// Frames are stitched in the order given and the composite is written as PNG
/// under `[output] directory`.
#[tokio::main]
async fn main() {
    let (config_path, frame_paths) = match parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        frames = frame_paths.len(),
        scale_factor = config.capture.scale_factor,
        parallel = config.stitch.parallel,
        output_dir = %config.output.directory.display(),
        "starting scroll-stitch"
    );

    let engine = StitchingEngine::spawn(config.stitch.clone());
    let mut started = false;
    for path in &frame_paths {
        let frame = match load_frame(path, config.capture.scale_factor) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "skipping frame");
                continue;
            }
        };
        debug!(path = %path.display(), width = frame.width(), height = frame.height(), "frame loaded");
        if started {
            engine.append(frame);
        } else {
            engine.start(frame);
            started = true;
        }
    }

    let composite = match engine.finish().await {
        Ok(Some(c)) => c,
        Ok(None) => {
            error!("no frame could be loaded, nothing to stitch");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "stitching failed");
            std::process::exit(1);
        }
    };

    let out_path = config
        .output
        .composite_path(chrono::Utc::now().timestamp_millis());
    match save_composite(&composite, &out_path) {
        Ok(()) => info!(
            path = %out_path.display(),
            width = composite.width(),
            height = composite.height(),
            "composite saved"
        ),
        Err(e) => {
            error!(error = %e, "failed to save composite");
            std::process::exit(1);
        }
    }
}

/// Split the command line into the config path and at least one frame path.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(PathBuf, Vec<PathBuf>), CliError> {
    let config_path = args.next().map(PathBuf::from).ok_or(CliError::Usage)?;
    let frame_paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if frame_paths.is_empty() {
        return Err(CliError::Usage);
    }
    Ok((config_path, frame_paths))
}

fn load_frame(path: &Path, scale_factor: f64) -> Result<Frame, CliError> {
    let name = path.display().to_string();
    let img = ImageReader::open(path)
        .map_err(|e| CliError::Open(name.clone(), e))?
        .with_guessed_format()
        .map_err(|e| CliError::Open(name.clone(), e))?
        .decode()
        .map_err(|e| CliError::Decode(name.clone(), e))?;
    Frame::from_dynamic(img, scale_factor).map_err(|e| CliError::Frame(name, e))
}

fn save_composite(composite: &Frame, path: &Path) -> Result<(), CliError> {
    let name = path.display().to_string();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| CliError::Save(name.clone(), e.to_string()))?;
    }
    composite
        .clone()
        .into_dynamic()
        .map_err(|e| CliError::Save(name.clone(), e.to_string()))?
        .save(path)
        .map_err(|e| CliError::Save(name, e.to_string()))
}
