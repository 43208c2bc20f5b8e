//! Core of a media slideshow: playlist navigation, auto-advance arbitration,
//! bounded image and thumbnail caches, and video playback sequencing.
//!
//! The presentation layer owns the window and draws; this crate decides
//! *what* to show and when, and keeps decoded media within memory bounds.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
#[cfg(feature = "gstreamer")]
pub mod gst_surface;
pub mod loader;
pub mod media;
pub mod orientation;
pub mod playlist;
pub mod thumbnail;
pub mod transition;
pub mod video;

pub use backend::{DecoderAvailability, DecoderProbe, FfmpegBackend, VideoFrameBackend};
pub use cache::{CacheStats, MediaCache};
pub use config::SlideshowConfig;
pub use error::MediaError;
pub use events::{EventSink, SlideshowEvent};
pub use loader::{AnimatedImage, LoadedImage, MediaLoader};
pub use media::{MediaEntry, MediaKind};
pub use orientation::Orientation;
pub use playlist::{PlaylistStore, SortMode};
pub use thumbnail::{Thumbnail, ThumbnailCache, ThumbnailSettings, VisibleRangeLoader};
pub use transition::TransitionController;
pub use video::{PlayCallbacks, PlaybackState, PlaybackSurface, SurfaceEvent, VideoCoordinator};
