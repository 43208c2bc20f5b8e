//! Ordered playlist and navigation state.
//!
//! Owns the entry list and the current index. Every mutation goes through
//! [`PlaylistStore`]; the transition controller serializes the ones that move
//! the index.

use crate::events::{EventSink, SlideshowEvent};
use crate::media::{path_key, MediaEntry, MediaKind};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Playlist ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
    /// Fresh shuffle on every call.
    Random,
}

/// Ordered list of media entries plus the current position.
#[derive(Debug, Default)]
pub struct PlaylistStore {
    entries: Vec<MediaEntry>,
    /// `None` iff the playlist is empty or nothing is selected yet.
    current_index: Option<usize>,
    sort_mode: SortMode,
    events: EventSink,
}

impl PlaylistStore {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    /// Replace the playlist with every supported file under `folders`.
    ///
    /// Folders (or entries) that fail to enumerate are skipped.
    pub fn load_entries<P: AsRef<Path>>(&mut self, folders: &[P], include_videos: bool) {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for folder in folders {
            let folder = folder.as_ref();
            tracing::debug!("Scanning {:?}", folder);

            for dir_entry in WalkDir::new(folder)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
                .filter_map(|e| match e {
                    Ok(e) => Some(e),
                    Err(err) => {
                        tracing::debug!("Skipping unreadable entry under {:?}: {}", folder, err);
                        None
                    }
                })
            {
                if !dir_entry.file_type().is_file() {
                    continue;
                }
                let Some(entry) = MediaEntry::new(dir_entry.path()) else {
                    continue;
                };
                if entry.kind().is_video() && !include_videos {
                    continue;
                }
                if seen.insert(entry.key().to_string()) {
                    entries.push(entry);
                }
            }
        }

        tracing::info!(
            "Loaded {} media entries from {} folder(s)",
            entries.len(),
            folders.len()
        );

        self.entries = entries;
        self.current_index = None;
        self.events
            .emit(SlideshowEvent::PlaylistChanged { len: self.entries.len() });
    }

    /// Append a single file if it is supported and not already present.
    pub fn add_entry(&mut self, path: impl AsRef<Path>, include_videos: bool) -> bool {
        let Some(entry) = MediaEntry::new(path) else {
            return false;
        };
        if entry.kind().is_video() && !include_videos {
            return false;
        }
        if self.entries.contains(&entry) {
            return false;
        }

        tracing::debug!("Adding {:?}", entry.path());
        self.entries.push(entry);
        self.events
            .emit(SlideshowEvent::PlaylistChanged { len: self.entries.len() });
        true
    }

    /// Reorder in place and re-clamp the current index.
    pub fn sort(&mut self, mode: SortMode) {
        match mode {
            SortMode::NameAsc => self.entries.sort_by_cached_key(|e| e.sort_name()),
            SortMode::NameDesc => {
                self.entries.sort_by_cached_key(|e| e.sort_name());
                self.entries.reverse();
            }
            SortMode::DateAsc => self.entries.sort_by_cached_key(|e| modified_time(e.path())),
            SortMode::DateDesc => {
                self.entries.sort_by_cached_key(|e| modified_time(e.path()));
                self.entries.reverse();
            }
            SortMode::Random => self.entries.shuffle(&mut rand::thread_rng()),
        }

        self.sort_mode = mode;
        self.current_index = self.clamp(self.current_index);
    }

    /// Move forward, wrapping at the end. Returns `false` if empty.
    pub fn next(&mut self) -> bool {
        let len = self.entries.len();
        if len == 0 {
            self.current_index = None;
            return false;
        }
        self.current_index = Some(match self.current_index {
            Some(i) => (i + 1) % len,
            None => 0,
        });
        true
    }

    /// Move backward, wrapping at the start. Returns `false` if empty.
    pub fn previous(&mut self) -> bool {
        let len = self.entries.len();
        if len == 0 {
            self.current_index = None;
            return false;
        }
        self.current_index = Some(match self.current_index {
            Some(i) => (i + len - 1) % len,
            None => len - 1,
        });
        true
    }

    /// Jump to `index`, clamped into range.
    pub fn set_index(&mut self, index: usize) {
        self.current_index = self.clamp(Some(index));
    }

    /// Remove the entry matching `path` and keep the index valid.
    pub fn remove_entry(&mut self, path: impl AsRef<Path>) -> bool {
        let key = path_key(path.as_ref());
        let Some(removed) = self.entries.iter().position(|e| e.key() == key) else {
            return false;
        };

        self.entries.remove(removed);
        self.current_index = match self.current_index {
            _ if self.entries.is_empty() => None,
            Some(current) if removed < current => Some(current - 1),
            other => self.clamp(other),
        };

        tracing::debug!("Removed {}, index now {:?}", key, self.current_index);
        self.events
            .emit(SlideshowEvent::PlaylistChanged { len: self.entries.len() });
        true
    }

    /// Circular `(next, previous)` indices around `index`.
    pub fn neighbors(&self, index: usize) -> Option<(usize, usize)> {
        neighbor_indices(self.entries.len(), index)
    }

    fn clamp(&self, index: Option<usize>) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        index.map(|i| i.min(self.entries.len() - 1))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&MediaEntry> {
        self.current_index.and_then(|i| self.entries.get(i))
    }

    pub fn current_kind(&self) -> Option<MediaKind> {
        self.current().map(MediaEntry::kind)
    }

    pub fn entry(&self, index: usize) -> Option<&MediaEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[MediaEntry] {
        &self.entries
    }

    pub fn index_of(&self, path: impl AsRef<Path>) -> Option<usize> {
        let key = path_key(path.as_ref());
        self.entries.iter().position(|e| e.key() == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    /// Paths of every entry, in playlist order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|e| e.path().to_path_buf()).collect()
    }
}

/// Circular `(next, previous)` for a list of `len` items.
pub fn neighbor_indices(len: usize, index: usize) -> Option<(usize, usize)> {
    if len == 0 || index >= len {
        return None;
    }
    Some(((index + 1) % len, (index + len - 1) % len))
}

fn modified_time(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn store_with(names: &[&str]) -> PlaylistStore {
        let mut store = PlaylistStore::default();
        for name in names {
            assert!(store.add_entry(format!("/media/{name}"), true));
        }
        store
    }

    fn names(store: &PlaylistStore) -> Vec<String> {
        store.entries().iter().map(|e| e.sort_name()).collect()
    }

    #[test]
    fn load_entries_scans_recursively_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("nested/b.gif"), b"x").unwrap();
        fs::write(dir.path().join("nested/deeper/c.mp4"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.jpg"), b"x").unwrap();

        let (sink, mut rx) = EventSink::channel(8);
        let mut store = PlaylistStore::new(sink);
        store.load_entries(&[dir.path()], true);
        store.sort(SortMode::NameAsc);
        assert_eq!(names(&store), vec!["a.jpg", "b.gif", "c.mp4"]);
        assert_eq!(store.current_index(), None);
        assert_eq!(
            rx.try_recv().ok(),
            Some(SlideshowEvent::PlaylistChanged { len: 3 })
        );

        store.load_entries(&[dir.path()], false);
        assert_eq!(store.len(), 2);
        assert!(store.entries().iter().all(|e| !e.kind().is_video()));
    }

    #[test]
    fn load_entries_skips_missing_folders_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();

        let mut store = PlaylistStore::default();
        let missing = dir.path().join("missing");
        store.load_entries(&[missing.as_path(), dir.path(), dir.path()], true);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn next_and_previous_wrap_and_stay_in_range() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        let len = store.len();

        let moves = [true, true, true, false, false, false, false, true, false, true];
        for forward in moves {
            assert!(if forward { store.next() } else { store.previous() });
            let idx = store.current_index().unwrap();
            assert!(idx < len);
        }

        store.set_index(2);
        store.next();
        assert_eq!(store.current_index(), Some(0));
        store.previous();
        assert_eq!(store.current_index(), Some(2));
    }

    #[test]
    fn navigation_on_empty_playlist_fails() {
        let mut store = PlaylistStore::default();
        assert!(!store.next());
        assert!(!store.previous());
        store.set_index(3);
        assert_eq!(store.current_index(), None);
    }

    #[test]
    fn set_index_clamps() {
        let mut store = store_with(&["a.jpg", "b.jpg"]);
        store.set_index(10);
        assert_eq!(store.current_index(), Some(1));
    }

    #[test]
    fn sort_then_set_index_selects_first_by_name() {
        let mut store = store_with(&["c.gif", "b.mp4", "a.jpg"]);
        store.sort(SortMode::NameAsc);
        store.set_index(0);
        assert_eq!(store.current().unwrap().sort_name(), "a.jpg");

        store.sort(SortMode::NameDesc);
        assert_eq!(names(&store), vec!["c.gif", "b.mp4", "a.jpg"]);
    }

    #[test]
    fn sort_is_case_insensitive() {
        let mut store = store_with(&["B.jpg", "a.jpg", "C.jpg"]);
        store.sort(SortMode::NameAsc);
        assert_eq!(names(&store), vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn sort_preserves_membership_and_clamps_index() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
        store.set_index(4);
        let mut before = names(&store);

        for mode in [SortMode::Random, SortMode::DateDesc, SortMode::NameDesc] {
            store.sort(mode);
            let mut after = names(&store);
            before.sort();
            after.sort();
            assert_eq!(before, after);
            assert!(store.current_index().unwrap() < store.len());
            assert_eq!(store.sort_mode(), mode);
        }
    }

    #[test]
    fn sort_by_date_uses_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("z_old.jpg");
        let new = dir.path().join("a_new.jpg");
        fs::write(&old, b"x").unwrap();
        fs::write(&new, b"x").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let mut store = PlaylistStore::default();
        store.load_entries(&[dir.path()], true);
        store.sort(SortMode::DateAsc);
        assert_eq!(names(&store), vec!["z_old.jpg", "a_new.jpg"]);
        store.sort(SortMode::DateDesc);
        assert_eq!(names(&store), vec!["a_new.jpg", "z_old.jpg"]);
    }

    #[test]
    fn removing_last_current_entry_clamps() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        store.set_index(2);
        assert!(store.remove_entry("/media/c.jpg"));
        assert_eq!(store.current_index(), Some(1));
    }

    #[test]
    fn removing_current_entry_keeps_numeric_index() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        store.set_index(1);
        assert!(store.remove_entry("/MEDIA/B.JPG"));
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current().unwrap().sort_name(), "c.jpg");
    }

    #[test]
    fn removing_entry_before_current_decrements() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        store.set_index(2);
        store.remove_entry("/media/a.jpg");
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current().unwrap().sort_name(), "c.jpg");
    }

    #[test]
    fn removing_entry_after_current_keeps_index() {
        let mut store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        store.set_index(0);
        store.remove_entry("/media/c.jpg");
        assert_eq!(store.current_index(), Some(0));
    }

    #[test]
    fn removing_everything_clears_index() {
        let mut store = store_with(&["a.jpg"]);
        store.set_index(0);
        store.remove_entry("/media/a.jpg");
        assert_eq!(store.current_index(), None);
        assert!(!store.remove_entry("/media/a.jpg"));
    }

    #[test]
    fn neighbors_wrap() {
        let store = store_with(&["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(store.neighbors(0), Some((1, 2)));
        assert_eq!(store.neighbors(2), Some((0, 1)));
        assert_eq!(store.neighbors(3), None);
        assert_eq!(neighbor_indices(1, 0), Some((0, 0)));
        assert_eq!(neighbor_indices(0, 0), None);
    }

    #[test]
    fn add_entry_rejects_duplicates_and_unsupported() {
        let mut store = store_with(&["a.jpg"]);
        assert!(!store.add_entry("/media/A.JPG", true));
        assert!(!store.add_entry("/media/readme.txt", true));
        assert!(!store.add_entry("/media/clip.mp4", false));
        assert_eq!(store.index_of("/media/a.jpg"), Some(0));
    }
}
