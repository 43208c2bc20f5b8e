//! Optional native backend for extracting a representative video frame.
//!
//! The backend is probed lazily: the first extraction attempt decides
//! whether it is usable for the rest of the run, and that verdict lives in a
//! [`DecoderProbe`] owned by whoever builds the thumbnail cache.

use image::RgbaImage;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

/// Oldest `ffmpeg` major version whose CLI flags we rely on.
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Why the backend cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no backend path configured")]
    MissingPath,

    #[error("backend entry point not found at {0}")]
    MissingEntryPoint(PathBuf),

    #[error("incompatible backend version {found} (need {required} or newer)")]
    IncompatibleVersion { found: String, required: u32 },

    #[error("frame extraction failed: {0}")]
    Failed(String),
}

/// Process-wide verdict on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderAvailability {
    #[default]
    Unknown,
    Available(Option<String>),
    Unavailable(String),
}

impl fmt::Display for DecoderAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderAvailability::Unknown => write!(f, "unknown"),
            DecoderAvailability::Available(Some(detail)) => write!(f, "available ({detail})"),
            DecoderAvailability::Available(None) => write!(f, "available"),
            DecoderAvailability::Unavailable(reason) => write!(f, "unavailable: {reason}"),
        }
    }
}

/// Holder for [`DecoderAvailability`]. Set at most once until [`reset`].
///
/// [`reset`]: DecoderProbe::reset
#[derive(Debug, Default)]
pub struct DecoderProbe {
    state: Mutex<DecoderAvailability>,
}

impl DecoderProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DecoderAvailability> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> DecoderAvailability {
        self.lock().clone()
    }

    pub fn is_unknown(&self) -> bool {
        matches!(*self.lock(), DecoderAvailability::Unknown)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(*self.lock(), DecoderAvailability::Unavailable(_))
    }

    /// Record a successful probe. Ignored if a verdict already exists.
    pub fn mark_available(&self, detail: Option<String>) -> bool {
        self.settle(DecoderAvailability::Available(detail))
    }

    /// Record a failed probe. Ignored if a verdict already exists.
    pub fn mark_unavailable(&self, reason: impl Into<String>) -> bool {
        self.settle(DecoderAvailability::Unavailable(reason.into()))
    }

    fn settle(&self, verdict: DecoderAvailability) -> bool {
        let mut state = self.lock();
        if *state != DecoderAvailability::Unknown {
            return false;
        }
        tracing::info!("Video frame backend {}", verdict);
        *state = verdict;
        true
    }

    /// Forget the verdict, e.g. after the backend path was reconfigured.
    pub fn reset(&self) {
        tracing::debug!("Video frame backend probe reset");
        *self.lock() = DecoderAvailability::Unknown;
    }
}

/// RGBA pixels of one extracted frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbaImage,
}

impl VideoFrame {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Backend-side handle for an opened video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHandle {
    pub id: u64,
    pub path: PathBuf,
}

/// Native frame extraction capability.
pub trait VideoFrameBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<VideoHandle, BackendError>;

    /// Decode the frame at `timestamp`, downscaled to fit `max_dimension`
    /// on both axes.
    fn frame_at(
        &self,
        handle: &VideoHandle,
        timestamp: Duration,
        max_dimension: u32,
    ) -> Result<VideoFrame, BackendError>;

    fn close(&self, handle: VideoHandle);
}

/// Frame extraction through an `ffmpeg` executable.
#[derive(Debug)]
pub struct FfmpegBackend {
    executable: Option<PathBuf>,
    /// Outcome of the one-time version check.
    verified: OnceLock<Result<String, BackendError>>,
    next_handle: AtomicU64,
}

impl FfmpegBackend {
    /// `executable` may point at the binary itself or the folder holding it.
    pub fn new(executable: Option<PathBuf>) -> Self {
        let executable = executable.map(|path| {
            if path.is_dir() {
                path.join(if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" })
            } else {
                path
            }
        });
        Self {
            executable,
            verified: OnceLock::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn executable(&self) -> Result<&Path, BackendError> {
        let path = self.executable.as_deref().ok_or(BackendError::MissingPath)?;
        if !path.is_file() {
            return Err(BackendError::MissingEntryPoint(path.to_path_buf()));
        }
        Ok(path)
    }

    /// Run `ffmpeg -version` once and check the major version.
    fn verify(&self) -> Result<&Path, BackendError> {
        let exe = self.executable()?;
        let verdict = self.verified.get_or_init(|| {
            let output = Command::new(exe)
                .arg("-version")
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .map_err(|e| BackendError::Failed(format!("failed to run {:?}: {e}", exe)))?;
            let banner = String::from_utf8_lossy(&output.stdout);
            check_version(&banner)
        });

        match verdict {
            Ok(version) => {
                tracing::trace!("ffmpeg {} verified", version);
                Ok(exe)
            }
            Err(e) => Err(e.clone()),
        }
    }
}

/// Parse the first line of `ffmpeg -version`, e.g.
/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...`.
fn check_version(banner: &str) -> Result<String, BackendError> {
    let version = banner
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("ffmpeg version "))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| BackendError::Failed("unrecognized ffmpeg version banner".into()))?;

    let digits: String = version
        .trim_start_matches(['n', 'N'])
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    match digits.parse::<u32>() {
        Ok(major) if major >= MIN_FFMPEG_MAJOR => Ok(version.to_string()),
        // Git snapshots report e.g. "N-112345-g..." and are assumed current.
        Err(_) if version.starts_with("N-") => Ok(version.to_string()),
        _ => Err(BackendError::IncompatibleVersion {
            found: version.to_string(),
            required: MIN_FFMPEG_MAJOR,
        }),
    }
}

impl VideoFrameBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<VideoHandle, BackendError> {
        self.verify()?;
        if !path.is_file() {
            return Err(BackendError::Failed(format!("{:?} does not exist", path)));
        }
        Ok(VideoHandle {
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
        })
    }

    fn frame_at(
        &self,
        handle: &VideoHandle,
        timestamp: Duration,
        max_dimension: u32,
    ) -> Result<VideoFrame, BackendError> {
        let exe = self.verify()?;
        let scale = format!(
            "scale='min({max},iw)':'min({max},ih)':force_original_aspect_ratio=decrease",
            max = max_dimension
        );

        let output = Command::new(exe)
            .args(["-v", "error", "-nostdin"])
            .args(["-ss", &format!("{:.3}", timestamp.as_secs_f64())])
            .arg("-i")
            .arg(&handle.path)
            .args(["-frames:v", "1", "-vf", &scale])
            .args(["-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackendError::Failed(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Failed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| BackendError::Failed(format!("undecodable frame: {e}")))?
            .into_rgba8();
        Ok(VideoFrame { image })
    }

    fn close(&self, handle: VideoHandle) {
        tracing::trace!("Closing backend handle {} for {:?}", handle.id, handle.path);
    }
}
