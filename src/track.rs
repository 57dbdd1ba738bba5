//! Core playback value types.
//!
//! Every state here is an immutable snapshot: transitions replace the whole
//! value, never mutate it in place, so readers across threads always observe
//! a consistent state.

/// One track as reported by the track index.
///
/// Tracks are ephemeral snapshots of the external index, not database rows.
/// Identity for queue and persistence lookups is the URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Stable identity, used for persistence and equality.
    pub uri: String,
    /// File name, the fallback display name when tags are missing.
    pub filename: String,
    /// Directory the file lives in.
    pub directory: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl Track {
    /// Display name: tag title when present, file name otherwise.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }
}

/// State of one track-list subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackListState {
    Loading,
    /// Read permission is absent. Terminal for this subscription; a fresh
    /// subscription is required after the user grants permission.
    MissingPermissions,
    /// Re-emitted on every index change with the full (filtered) list.
    Success(Vec<Track>),
}

/// Current playback snapshot, the single source of truth for the app.
///
/// Invariant: `current_track_index` is a valid index into `tracks` whenever
/// the state is `Playing`. `track_duration_millis` is `None` until the
/// engine reports readiness; consumers must render unknown duration rather
/// than a zero-length bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing {
        is_paused: bool,
        tracks: Vec<Track>,
        current_track_index: usize,
        track_progress_millis: u64,
        track_duration_millis: Option<u64>,
    },
}

impl PlaybackState {
    /// The loaded queue, empty when stopped.
    pub fn queue(&self) -> &[Track] {
        match self {
            PlaybackState::Stopped => &[],
            PlaybackState::Playing { tracks, .. } => tracks,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        match self {
            PlaybackState::Stopped => None,
            PlaybackState::Playing {
                current_track_index,
                ..
            } => Some(*current_track_index),
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        match self {
            PlaybackState::Stopped => None,
            PlaybackState::Playing {
                tracks,
                current_track_index,
                ..
            } => tracks.get(*current_track_index),
        }
    }

    pub fn progress_millis(&self) -> u64 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing {
                track_progress_millis,
                ..
            } => *track_progress_millis,
        }
    }

    pub fn duration_millis(&self) -> Option<u64> {
        match self {
            PlaybackState::Stopped => None,
            PlaybackState::Playing {
                track_duration_millis,
                ..
            } => *track_duration_millis,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Playing { is_paused: true, .. })
    }
}

/// Snapshot persisted across process death and restored at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredPlaybackState {
    pub track_uri: Option<String>,
    pub position_ms: u64,
    pub search_filter: Option<String>,
    pub shuffle_enabled: bool,
}
