//! Playlist entries and media kind detection.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Extensions decoded as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp", "ico"];

/// Extensions decoded frame by frame.
pub const ANIMATED_EXTENSIONS: &[&str] = &["gif"];

/// Extensions handed to the playback surface.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "avi", "wmv", "webm"];

/// What kind of artifact an entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    AnimatedImage,
    Video,
}

impl MediaKind {
    /// Classify a path by extension. Returns `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if ANIMATED_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::AnimatedImage)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn is_video(self) -> bool {
        self == MediaKind::Video
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::AnimatedImage => "animated",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Make a path absolute and drop `.`/`..` components without touching the
/// filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Case-insensitive identity key for a path.
pub fn path_key(path: &Path) -> String {
    normalize_path(path)
        .to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

/// One playable item in the playlist.
///
/// Equality and hashing use the case-insensitive normalized path only.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    path: PathBuf,
    key: String,
    kind: MediaKind,
}

impl MediaEntry {
    /// Build an entry, classifying the kind from the extension.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let kind = MediaKind::from_path(path)?;
        Some(Self::with_kind(path, kind))
    }

    /// Build an entry with an explicit kind.
    pub fn with_kind(path: impl AsRef<Path>, kind: MediaKind) -> Self {
        let path = normalize_path(path.as_ref());
        let key = path_key(&path);
        Self { path, key, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// File name used for name sorting, lowercased.
    pub fn sort_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

impl PartialEq for MediaEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for MediaEntry {}

impl Hash for MediaEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(MediaKind::from_path(Path::new("a.JPG")), Some(MediaKind::Image));
        assert_eq!(
            MediaKind::from_path(Path::new("b.Gif")),
            Some(MediaKind::AnimatedImage)
        );
        assert_eq!(MediaKind::from_path(Path::new("c.MP4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn normalize_resolves_dot_components() {
        let normalized = normalize_path(Path::new("/photos/./trip/../a.jpg"));
        assert_eq!(normalized, PathBuf::from("/photos/a.jpg"));
    }

    #[test]
    fn normalize_makes_relative_paths_absolute() {
        assert!(normalize_path(Path::new("a.jpg")).is_absolute());
    }

    #[test]
    fn identity_ignores_case() {
        let a = MediaEntry::new("/Photos/IMG_1.jpg").unwrap();
        let b = MediaEntry::new("/photos/img_1.JPG").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "/photos/img_1.jpg");
    }

    #[test]
    fn unsupported_extension_yields_no_entry() {
        assert!(MediaEntry::new("/photos/readme.md").is_none());
    }
}
