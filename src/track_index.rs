//! Track index access: the external catalog trait, the live-query adapter,
//! and the filesystem-backed index implementation.
//!
//! The adapter bridges the index's observer callbacks into a watch channel of
//! [`TrackListState`] snapshots. New subscribers immediately receive the
//! current value, and every index change re-runs the query and replaces the
//! snapshot wholesale.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use log::{debug, warn};
use tokio::sync::watch;

use crate::track::{Track, TrackListState};

const SUBSCRIPTION_POLL_SLEEP: Duration = Duration::from_millis(10);

/// External music catalog. Implementations own the platform's media index.
pub trait TrackIndex: Send + Sync {
    /// Whether the process may read the index at all.
    fn has_permission(&self) -> bool;

    /// Registers a change callback. The registration must be released, and
    /// releasing it must stop further invocations of the callback.
    fn subscribe(&self, on_change: Box<dyn Fn() + Send + Sync>) -> IndexRegistration;

    /// Runs the catalog query. Results are ordered by path; a non-blank
    /// filter restricts them to tracks matching it (see [`matches_filter`]).
    fn query(&self, filter: Option<&str>) -> Vec<Track>;
}

/// Change-callback registration handle. Released explicitly or on drop, so
/// the registration is released on every exit path.
pub struct IndexRegistration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl IndexRegistration {
    pub fn new(release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            release: Some(release),
        }
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for IndexRegistration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Case-insensitive substring match against title, artist, album, and
/// path/filename.
pub fn matches_filter(track: &Track, filter: &str) -> bool {
    let needle = filter.to_lowercase();
    let contains = |value: &str| value.to_lowercase().contains(&needle);
    track.title.as_deref().is_some_and(contains)
        || track.artist.as_deref().is_some_and(contains)
        || track.album.as_deref().is_some_and(contains)
        || contains(&track.filename)
        || contains(&track.directory)
}

/// Treats blank filters as "no filter".
pub fn normalize_filter(filter: Option<&str>) -> Option<String> {
    filter
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// One live track-list subscription. Holds the index registration; dropping
/// the subscription releases it.
pub struct TrackListSubscription {
    receiver: watch::Receiver<TrackListState>,
    _registration: Option<IndexRegistration>,
}

impl TrackListSubscription {
    /// Latest snapshot.
    pub fn current(&self) -> TrackListState {
        self.receiver.borrow().clone()
    }

    /// Blocks until the subscription produces a `Success` snapshot.
    ///
    /// Returns `None` on permission denial (terminal for this subscription)
    /// or when the deadline passes first.
    pub fn wait_for_success(&self, timeout: Duration) -> Option<Vec<Track>> {
        let deadline = Instant::now() + timeout;
        loop {
            match &*self.receiver.borrow() {
                TrackListState::Success(tracks) => return Some(tracks.clone()),
                TrackListState::MissingPermissions => return None,
                TrackListState::Loading => {}
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(SUBSCRIPTION_POLL_SLEEP);
        }
    }
}

/// Bridges the observer-based [`TrackIndex`] into replay-latest snapshots.
#[derive(Clone)]
pub struct TrackIndexAdapter {
    index: Arc<dyn TrackIndex>,
}

impl TrackIndexAdapter {
    pub fn new(index: Arc<dyn TrackIndex>) -> Self {
        Self { index }
    }

    /// Starts one live query.
    ///
    /// Without permission the subscription emits `MissingPermissions` once
    /// and never recovers; permission changes require a fresh subscription.
    /// Otherwise the subscription emits an initial `Success` and re-queries
    /// on every index change until dropped.
    pub fn observe(&self, filter: Option<&str>) -> TrackListSubscription {
        let filter = normalize_filter(filter);

        if !self.index.has_permission() {
            debug!("Track index permission absent; subscription is terminal");
            // The channel closes once the sender drops, but readers keep
            // seeing the final MissingPermissions value.
            let (_, receiver) = watch::channel(TrackListState::MissingPermissions);
            return TrackListSubscription {
                receiver,
                _registration: None,
            };
        }

        let (sender, receiver) = watch::channel(TrackListState::Loading);
        let sender = Arc::new(sender);

        let callback_sender = Arc::clone(&sender);
        let callback_index = Arc::clone(&self.index);
        let callback_filter = filter.clone();
        let registration = self.index.subscribe(Box::new(move || {
            let tracks = callback_index.query(callback_filter.as_deref());
            let _ = callback_sender.send(TrackListState::Success(tracks));
        }));

        let _ = sender.send(TrackListState::Success(self.index.query(filter.as_deref())));

        TrackListSubscription {
            receiver,
            _registration: Some(registration),
        }
    }
}

const SUPPORTED_AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4"];

fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn collect_audio_files_from_folder(folder_path: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut files = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() && is_supported_audio_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort_unstable();
    files
}

fn tag_value(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_track_tags(path: &Path) -> (Option<String>, Option<String>, Option<String>) {
    use lofty::file::TaggedFileExt;
    use lofty::prelude::Accessor;

    let Ok(tagged_file) = lofty::read_from_path(path) else {
        return (None, None, None);
    };
    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return (None, None, None);
    };

    (
        tag_value(tag.title().map(|value| value.into_owned())),
        tag_value(tag.artist().map(|value| value.into_owned())),
        tag_value(tag.album().map(|value| value.into_owned())),
    )
}

fn track_from_path(path: &Path) -> Track {
    let (title, artist, album) = read_track_tags(path);
    Track {
        uri: format!("file://{}", path.display()),
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        directory: path
            .parent()
            .map(|parent| parent.to_string_lossy().to_string())
            .unwrap_or_default(),
        title,
        artist,
        album,
    }
}

type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Filesystem-backed track index scanning the configured library folders.
pub struct FsTrackIndex {
    folders: Vec<PathBuf>,
    listeners: Arc<Mutex<Vec<(u64, ChangeListener)>>>,
    next_listener_id: AtomicU64,
}

impl FsTrackIndex {
    pub fn new(folders: Vec<PathBuf>) -> Self {
        Self {
            folders,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Invokes every registered change listener. Called after the library
    /// content changes (e.g. an explicit rescan).
    pub fn notify_changed(&self) {
        let listeners: Vec<ChangeListener> = {
            let listeners = self.listeners.lock().expect("listener lock poisoned");
            listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect()
        };
        for listener in listeners {
            listener();
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listener lock poisoned").len()
    }
}

impl TrackIndex for FsTrackIndex {
    fn has_permission(&self) -> bool {
        self.folders
            .iter()
            .any(|folder| std::fs::read_dir(folder).is_ok())
    }

    fn subscribe(&self, on_change: Box<dyn Fn() + Send + Sync>) -> IndexRegistration {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.listeners.lock().expect("listener lock poisoned");
            listeners.push((id, Arc::from(on_change)));
        }

        let listeners = Arc::clone(&self.listeners);
        IndexRegistration::new(Box::new(move || {
            let mut listeners = match listeners.lock() {
                Ok(listeners) => listeners,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }))
    }

    fn query(&self, filter: Option<&str>) -> Vec<Track> {
        let mut tracks = Vec::new();
        for folder in &self.folders {
            if !folder.is_dir() {
                warn!("Library folder missing: {}", folder.display());
                continue;
            }
            for path in collect_audio_files_from_folder(folder) {
                tracks.push(track_from_path(&path));
            }
        }
        tracks.sort_unstable_by(|a, b| a.uri.cmp(&b.uri));

        match normalize_filter(filter) {
            None => tracks,
            Some(filter) => tracks
                .into_iter()
                .filter(|track| matches_filter(track, &filter))
                .collect(),
        }
    }
}
