//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the command traffic exchanged between the transport
//! surfaces (lock screen, Bluetooth, voice, the CLI shell) and the session
//! bridge, plus the payload types the bridge publishes back to the platform
//! session.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Transport(TransportCommand),
    Session(SessionNotice),
}

/// Inbound platform transport commands.
///
/// Every command a media session surface can deliver: media buttons,
/// Bluetooth AVRCP, voice assistants, and the browse tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
    SkipToNext,
    SkipToPrevious,
    /// Jump to a queue item by the id previously published with the queue.
    SkipToQueueItem(u64),
    /// Start playback of a specific track, identified by its media id (URI).
    PlayFromMediaId(String),
    /// Voice/assistant search. An empty query means "play something".
    PlayFromSearch(String),
    SeekTo(u64),
    Custom(CustomAction),
    /// Browse request for the session's track listing.
    Browse,
}

/// Custom session actions attached to the playback descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomAction {
    ToggleShuffle,
    Stop,
}

/// Notifications emitted by the session bridge.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// The bridge promoted itself to a started (foreground) session.
    Started,
    /// The bridge released its foreground claim; the host may terminate.
    Stopped,
    /// Response to [`TransportCommand::Browse`].
    BrowseResult(Vec<SessionQueueItem>),
}

/// Transport action bits advertised in the session playback descriptor.
pub mod actions {
    pub const PLAY: u32 = 1 << 0;
    pub const PAUSE: u32 = 1 << 1;
    pub const PLAY_PAUSE: u32 = 1 << 2;
    pub const STOP: u32 = 1 << 3;
    pub const SEEK_TO: u32 = 1 << 4;
    pub const SKIP_TO_QUEUE_ITEM: u32 = 1 << 5;
    pub const SKIP_TO_PREVIOUS: u32 = 1 << 6;
    pub const SKIP_TO_NEXT: u32 = 1 << 7;
}

/// One entry of the queue published to the platform session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQueueItem {
    /// Absolute index of the track in the full queue.
    pub id: u64,
    /// Media id used by `PlayFromMediaId` (the track URI).
    pub media_id: String,
    pub title: String,
    pub subtitle: Option<String>,
}

/// Track metadata published to the platform session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Coarse transport status reported to the platform session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

/// Icon hint for a custom action button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIcon {
    ShuffleOn,
    ShuffleOff,
    Stop,
}

/// One custom action button attached to the playback descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCustomAction {
    pub action: CustomAction,
    pub label: &'static str,
    pub icon: SessionIcon,
}

/// Playback descriptor published to the platform session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayback {
    pub status: SessionPlaybackStatus,
    pub position_ms: u64,
    /// Bitmask built from [`actions`].
    pub actions: u32,
    /// Queue item id of the active track, when one exists.
    pub active_item_id: Option<u64>,
    pub custom_actions: Vec<SessionCustomAction>,
}
