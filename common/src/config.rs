use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stitch: StitchConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tuning for overlap search. The defaults are empirically chosen for
/// retina-density screen captures.
#[derive(Debug, Clone, Deserialize)]
pub struct StitchConfig {
    /// Lower bound on the overlap searched, in raw rows.
    #[serde(default = "default_min_overlap_floor")]
    pub min_overlap_floor: u32,
    /// Lower bound on the overlap as a fraction of the shorter frame.
    #[serde(default = "default_min_overlap_fraction")]
    pub min_overlap_fraction: f64,
    /// Only every n-th row of the overlap band is compared.
    #[serde(default = "default_row_stride")]
    pub row_stride: u32,
    /// Column sampling step is `max(1, width / column_divisor)`.
    #[serde(default = "default_column_divisor")]
    pub column_divisor: u32,
    #[serde(default = "default_coarse_step")]
    pub coarse_step: u32,
    #[serde(default = "default_fine_step")]
    pub fine_step: u32,
    /// Height of the band above the minimum overlap scanned with `fine_step`.
    #[serde(default = "default_fine_window")]
    pub fine_window: u32,
    /// Mean squared grayscale difference below which a candidate is accepted
    /// without searching further.
    #[serde(default = "default_good_enough_score")]
    pub good_enough_score: f64,
    /// Overlap substituted, as a fraction of the shorter frame, when an
    /// estimate falls outside the search bounds.
    #[serde(default = "default_fallback_overlap_fraction")]
    pub fallback_overlap_fraction: f64,
    /// Score sampled rows on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            min_overlap_floor: default_min_overlap_floor(),
            min_overlap_fraction: default_min_overlap_fraction(),
            row_stride: default_row_stride(),
            column_divisor: default_column_divisor(),
            coarse_step: default_coarse_step(),
            fine_step: default_fine_step(),
            fine_window: default_fine_window(),
            good_enough_score: default_good_enough_score(),
            fallback_overlap_fraction: default_fallback_overlap_fraction(),
            parallel: default_parallel(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_scale_factor(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            prefix: default_output_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl OutputConfig {
    /// Output path for a composite finished at `finished_at_ms`.
    /// e.g. "./scroll_20260218T093000000Z.png"
    pub fn composite_path(&self, finished_at_ms: i64) -> PathBuf {
        let dt = chrono::DateTime::from_timestamp_millis(finished_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
        self.directory.join(format!("{}_{ts}.png", self.prefix))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_min_overlap_floor() -> u32 {
    20
}
fn default_min_overlap_fraction() -> f64 {
    0.2
}
fn default_row_stride() -> u32 {
    5
}
fn default_column_divisor() -> u32 {
    200
}
fn default_coarse_step() -> u32 {
    10
}
fn default_fine_step() -> u32 {
    5
}
fn default_fine_window() -> u32 {
    50
}
fn default_good_enough_score() -> f64 {
    5.0
}
fn default_fallback_overlap_fraction() -> f64 {
    0.3
}
fn default_parallel() -> bool {
    true
}
fn default_scale_factor() -> f64 {
    2.0
}
fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_output_prefix() -> String {
    "scroll".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.stitch.min_overlap_floor, 20);
        assert_eq!(config.stitch.row_stride, 5);
        assert_eq!(config.stitch.column_divisor, 200);
        assert_eq!(config.stitch.good_enough_score, 5.0);
        assert!(config.stitch.parallel);
        assert_eq!(config.capture.scale_factor, 2.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [stitch]
            row_stride = 3
            parallel = false

            [output]
            prefix = "page"
            "#,
        )
        .unwrap();
        assert_eq!(config.stitch.row_stride, 3);
        assert!(!config.stitch.parallel);
        assert_eq!(config.stitch.coarse_step, 10);
        assert_eq!(config.output.prefix, "page");
        assert_eq!(config.output.directory, PathBuf::from("."));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(Config::parse("[stitch"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/scroll-stitch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }

    #[test]
    fn composite_path_format() {
        // 2025-02-18T09:30:00.000Z
        let output = OutputConfig::default();
        let path = output.composite_path(1739871000000);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "scroll_20250218T093000000Z.png");
        assert!(path.starts_with("."));
    }
}
