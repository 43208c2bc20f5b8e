//! Runtime configuration.
//!
//! Values come from an optional TOML file layered under `SLIDESHOW__*`
//! environment variables. Every field has a default so an empty file (or no
//! file) yields a usable configuration.

use crate::playlist::SortMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SLIDE_DELAY_SECS: f64 = 5.0;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
pub const DEFAULT_IMAGE_CACHE_CAPACITY: usize = 5;
pub const DEFAULT_MAX_DECODE_DIMENSION: u32 = 3840;
pub const DEFAULT_THUMBNAIL_CACHE_CAPACITY: usize = 200;
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 160;
pub const DEFAULT_MAX_VIDEO_FRAME_DIMENSION: u32 = 4096;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 200;
pub const DEFAULT_VISIBLE_RANGE_DEBOUNCE_MS: u64 = 150;

const MIN_SLIDE_DELAY_SECS: f64 = 0.5;
const MAX_THUMBNAIL_SIZE: u32 = 1024;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Slideshow settings handed in by the composition layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlideshowConfig {
    /// Folders scanned recursively for media.
    pub folders: Vec<PathBuf>,
    /// Whether video files join the playlist.
    pub include_videos: bool,
    pub sort_mode: SortMode,
    /// Time each entry stays on screen before auto-advance.
    pub slide_delay_secs: f64,
    /// How often the auto-advance timer re-evaluates.
    pub tick_interval_ms: u64,
    pub image_cache_capacity: usize,
    /// Hard per-axis cap applied to every image decode.
    pub max_decode_dimension: u32,
    pub thumbnail_cache_capacity: usize,
    /// Length of the longer thumbnail axis.
    pub thumbnail_size: u32,
    /// Per-axis cap applied to extracted video frames before scaling.
    pub max_video_frame_dimension: u32,
    /// Path to the `ffmpeg` executable used for video thumbnails.
    pub ffmpeg_path: Option<PathBuf>,
    pub progress_interval_ms: u64,
    pub visible_range_debounce_ms: u64,
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            include_videos: true,
            sort_mode: SortMode::NameAsc,
            slide_delay_secs: DEFAULT_SLIDE_DELAY_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            image_cache_capacity: DEFAULT_IMAGE_CACHE_CAPACITY,
            max_decode_dimension: DEFAULT_MAX_DECODE_DIMENSION,
            thumbnail_cache_capacity: DEFAULT_THUMBNAIL_CACHE_CAPACITY,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            max_video_frame_dimension: DEFAULT_MAX_VIDEO_FRAME_DIMENSION,
            ffmpeg_path: None,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            visible_range_debounce_ms: DEFAULT_VISIBLE_RANGE_DEBOUNCE_MS,
        }
    }
}

impl SlideshowConfig {
    /// Load from an optional TOML file plus environment overrides, then
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SLIDESHOW")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: SlideshowConfig = builder.build()?.try_deserialize()?;
        let cfg = cfg.validate();
        tracing::debug!("Loaded configuration: {:?}", cfg);
        Ok(cfg)
    }

    /// Clamp out-of-range values to something usable.
    pub fn validate(mut self) -> Self {
        if !self.slide_delay_secs.is_finite() || self.slide_delay_secs < MIN_SLIDE_DELAY_SECS {
            tracing::warn!(
                "slide_delay_secs {} too small, using {}",
                self.slide_delay_secs,
                MIN_SLIDE_DELAY_SECS
            );
            self.slide_delay_secs = MIN_SLIDE_DELAY_SECS;
        }
        self.tick_interval_ms = self.tick_interval_ms.max(10);
        self.image_cache_capacity = self.image_cache_capacity.max(1);
        self.max_decode_dimension = self.max_decode_dimension.max(1);
        self.thumbnail_cache_capacity = self.thumbnail_cache_capacity.max(1);
        self.thumbnail_size = self.thumbnail_size.clamp(1, MAX_THUMBNAIL_SIZE);
        self.max_video_frame_dimension = self.max_video_frame_dimension.max(1);
        self.progress_interval_ms = self.progress_interval_ms.max(10);
        self
    }

    pub fn slide_delay(&self) -> Duration {
        Duration::from_secs_f64(self.slide_delay_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn visible_range_debounce(&self) -> Duration {
        Duration::from_millis(self.visible_range_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = SlideshowConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap();
        assert_eq!(cfg.image_cache_capacity, DEFAULT_IMAGE_CACHE_CAPACITY);
        assert_eq!(cfg.thumbnail_size, DEFAULT_THUMBNAIL_SIZE);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "folders = [\"/photos\"]\ninclude_videos = false\nsort_mode = \"date_desc\"\nslide_delay_secs = 8.0"
        )
        .unwrap();

        let cfg = SlideshowConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.folders, vec![PathBuf::from("/photos")]);
        assert!(!cfg.include_videos);
        assert_eq!(cfg.sort_mode, SortMode::DateDesc);
        assert_eq!(cfg.slide_delay(), Duration::from_secs(8));
    }

    #[test]
    fn validate_clamps_nonsense() {
        let cfg = SlideshowConfig {
            slide_delay_secs: 0.0,
            image_cache_capacity: 0,
            thumbnail_size: 100_000,
            ..Default::default()
        }
        .validate();

        assert_eq!(cfg.slide_delay_secs, MIN_SLIDE_DELAY_SECS);
        assert_eq!(cfg.image_cache_capacity, 1);
        assert_eq!(cfg.thumbnail_size, MAX_THUMBNAIL_SIZE);
    }
}
