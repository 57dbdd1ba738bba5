//! Platform media-session bridge.
//!
//! [`SessionManager`] connects the runtime event bus to the platform
//! transport surface: every inbound transport command is mapped onto a
//! player command, and every playback/shuffle change is mapped back onto
//! session queue, metadata, playback-descriptor, and shuffle updates plus
//! the foreground notification. Outbound publishing is deduplicated so the
//! session only sees real changes.

use std::{sync::Arc, thread, time::Duration};

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use crate::{
    config::SearchPlayMode,
    player::Player,
    protocol::{
        actions, CustomAction, Message, SessionCustomAction, SessionIcon, SessionMetadata,
        SessionNotice, SessionPlayback, SessionPlaybackStatus, SessionQueueItem, TransportCommand,
    },
    track::{PlaybackState, Track},
    track_index::{matches_filter, TrackIndexAdapter},
    view_model::SearchFilter,
};

const IDLE_LOOP_SLEEP: Duration = Duration::from_millis(25);

/// How long a command that needs the track list waits for the first
/// successful index snapshot.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The outbound session/browse protocol silently fails or truncates above
/// roughly this many queue items, so the published queue is windowed.
pub const MAX_SESSION_QUEUE_LEN: usize = 100;

/// Outbound platform session surface.
pub trait MediaSession: Send {
    fn set_queue(&mut self, queue: Vec<SessionQueueItem>);
    fn set_metadata(&mut self, metadata: SessionMetadata);
    fn set_playback(&mut self, playback: SessionPlayback);
    fn set_shuffle_mode(&mut self, enabled: bool);
}

/// Foreground-service notification surface.
pub trait NotificationSurface: Send {
    fn show_playing(&mut self, metadata: &SessionMetadata);
    fn show_paused(&mut self, metadata: &SessionMetadata);
    fn remove(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotificationPhase {
    Playing,
    Paused,
    Stopped,
}

fn notification_phase(state: &PlaybackState) -> NotificationPhase {
    match state {
        PlaybackState::Stopped => NotificationPhase::Stopped,
        PlaybackState::Playing { is_paused: true, .. } => NotificationPhase::Paused,
        PlaybackState::Playing { .. } => NotificationPhase::Playing,
    }
}

fn queue_item(id: u64, track: &Track) -> SessionQueueItem {
    SessionQueueItem {
        id,
        media_id: track.uri.clone(),
        title: track.display_title().to_string(),
        subtitle: track.artist.clone(),
    }
}

/// Windows the queue for the session.
///
/// Small queues pass through unchanged. Larger queues publish a window that
/// starts at the current track and extends forward, falling back to the last
/// window-size items when the tail would truncate it. Item ids stay absolute
/// queue indices either way.
pub(crate) fn window_queue(tracks: &[Track], current_index: Option<usize>) -> Vec<SessionQueueItem> {
    let items: Vec<SessionQueueItem> = tracks
        .iter()
        .enumerate()
        .map(|(index, track)| queue_item(index as u64, track))
        .collect();

    if items.len() <= MAX_SESSION_QUEUE_LEN {
        return items;
    }

    let start = current_index.unwrap_or(0);
    let end = (start + MAX_SESSION_QUEUE_LEN).min(items.len());
    if end - start < MAX_SESSION_QUEUE_LEN {
        items[items.len() - MAX_SESSION_QUEUE_LEN..].to_vec()
    } else {
        items[start..end].to_vec()
    }
}

/// Builds the action bitmask for the current snapshot: the skip actions are
/// only advertised while a neighbor exists in that direction.
pub(crate) fn compute_actions(state: &PlaybackState) -> u32 {
    let mut mask = actions::PLAY
        | actions::PAUSE
        | actions::PLAY_PAUSE
        | actions::STOP
        | actions::SEEK_TO
        | actions::SKIP_TO_QUEUE_ITEM;
    if let Some(index) = state.current_index() {
        if index > 0 {
            mask |= actions::SKIP_TO_PREVIOUS;
        }
        if index + 1 < state.queue().len() {
            mask |= actions::SKIP_TO_NEXT;
        }
    }
    mask
}

pub(crate) fn build_metadata(state: &PlaybackState) -> SessionMetadata {
    match state.current_track() {
        None => SessionMetadata::default(),
        Some(track) => SessionMetadata {
            title: Some(track.display_title().to_string()),
            artist: track.artist.clone(),
            album: track.album.clone(),
            duration_ms: state.duration_millis(),
        },
    }
}

fn custom_actions(shuffle_enabled: bool) -> Vec<SessionCustomAction> {
    vec![
        SessionCustomAction {
            action: CustomAction::ToggleShuffle,
            label: if shuffle_enabled {
                "Disable shuffle"
            } else {
                "Enable shuffle"
            },
            icon: if shuffle_enabled {
                SessionIcon::ShuffleOn
            } else {
                SessionIcon::ShuffleOff
            },
        },
        SessionCustomAction {
            action: CustomAction::Stop,
            label: "Stop",
            icon: SessionIcon::Stop,
        },
    ]
}

fn build_playback(state: &PlaybackState, shuffle_enabled: bool) -> SessionPlayback {
    let status = match notification_phase(state) {
        NotificationPhase::Stopped => SessionPlaybackStatus::Stopped,
        NotificationPhase::Paused => SessionPlaybackStatus::Paused,
        NotificationPhase::Playing => SessionPlaybackStatus::Playing,
    };
    SessionPlayback {
        status,
        position_ms: state.progress_millis(),
        actions: compute_actions(state),
        active_item_id: state.current_index().map(|index| index as u64),
        custom_actions: custom_actions(shuffle_enabled),
    }
}

/// Handles inbound transport commands and publishes app playback state.
pub struct SessionManager {
    bus_consumer: broadcast::Receiver<Message>,
    bus_producer: broadcast::Sender<Message>,
    player: Arc<Player>,
    track_index: TrackIndexAdapter,
    search_filter: SearchFilter,
    session: Box<dyn MediaSession>,
    notification: Box<dyn NotificationSurface>,
    search_play: SearchPlayMode,
    playback_rx: watch::Receiver<PlaybackState>,
    shuffle_rx: watch::Receiver<bool>,
    started: bool,
    last_published_queue: Option<Vec<SessionQueueItem>>,
    last_published_metadata: Option<SessionMetadata>,
    last_published_playback: Option<SessionPlayback>,
    last_published_shuffle: Option<bool>,
    last_notified_phase: Option<NotificationPhase>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus_consumer: broadcast::Receiver<Message>,
        bus_producer: broadcast::Sender<Message>,
        player: Arc<Player>,
        track_index: TrackIndexAdapter,
        search_filter: SearchFilter,
        session: Box<dyn MediaSession>,
        notification: Box<dyn NotificationSurface>,
        search_play: SearchPlayMode,
    ) -> Self {
        let playback_rx = player.playback_state();
        let shuffle_rx = player.shuffle_mode_enabled();
        Self {
            bus_consumer,
            bus_producer,
            player,
            track_index,
            search_filter,
            session,
            notification,
            search_play,
            playback_rx,
            shuffle_rx,
            started: false,
            last_published_queue: None,
            last_published_metadata: None,
            last_published_playback: None,
            last_published_shuffle: None,
            last_notified_phase: None,
        }
    }

    /// Starts the blocking manager loop.
    pub fn run(&mut self) {
        info!("SessionManager: started");
        loop {
            if self.process_pending_bus_messages() {
                break;
            }
            self.sync_outbound();
            thread::sleep(IDLE_LOOP_SLEEP);
        }
        info!("SessionManager: bus closed, exiting");
    }

    fn process_pending_bus_messages(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(Message::Transport(command)) => self.handle_transport(command),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty) => return false,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("SessionManager: bus lagged by {} messages", skipped);
                }
                Err(broadcast::error::TryRecvError::Closed) => return true,
            }
        }
    }

    fn handle_transport(&mut self, command: TransportCommand) {
        debug!("SessionManager: transport command {:?}", command);
        match command {
            TransportCommand::Play => {
                self.player.unpause();
                self.ensure_started();
            }
            TransportCommand::Pause => self.player.pause(),
            TransportCommand::Stop | TransportCommand::Custom(CustomAction::Stop) => {
                self.stop_session();
            }
            TransportCommand::SkipToNext => {
                self.player.skip_to_next();
                self.player.unpause();
            }
            TransportCommand::SkipToPrevious => {
                self.player.skip_to_previous();
                self.player.unpause();
            }
            TransportCommand::SkipToQueueItem(id) => {
                self.player.skip_to_track(id as usize);
                self.player.unpause();
            }
            TransportCommand::PlayFromMediaId(media_id) => {
                self.ensure_started();
                self.play_from_media_id(&media_id);
            }
            TransportCommand::PlayFromSearch(query) => {
                self.ensure_started();
                self.play_from_search(&query);
            }
            TransportCommand::SeekTo(position_ms) => self.player.seek_to(position_ms),
            TransportCommand::Custom(CustomAction::ToggleShuffle) => {
                self.player
                    .set_shuffle_mode_enabled(!self.player.current_shuffle_mode());
            }
            TransportCommand::Browse => self.answer_browse(),
        }
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.started = true;
            info!("SessionManager: session started");
            let _ = self
                .bus_producer
                .send(Message::Session(SessionNotice::Started));
        }
    }

    fn stop_session(&mut self) {
        self.player.stop();
        if self.started {
            self.started = false;
            let _ = self
                .bus_producer
                .send(Message::Session(SessionNotice::Stopped));
        }
    }

    fn first_success(&self) -> Option<Vec<Track>> {
        let subscription = self.track_index.observe(None);
        let tracks = subscription.wait_for_success(RESOLVE_TIMEOUT);
        if tracks.is_none() {
            warn!("SessionManager: track index produced no snapshot");
        }
        tracks
    }

    fn play_from_media_id(&mut self, media_id: &str) {
        let Some(tracks) = self.first_success() else {
            return;
        };
        if tracks.is_empty() {
            warn!("SessionManager: no tracks available for media id {}", media_id);
            return;
        }
        let index = tracks
            .iter()
            .position(|track| track.uri == media_id)
            .unwrap_or_else(|| {
                warn!("SessionManager: media id {} not found, falling back", media_id);
                0
            });
        let selected = tracks[index].clone();
        self.player.play(tracks, &selected, true);
        self.search_filter.set(None);
    }

    fn play_from_search(&mut self, query: &str) {
        let Some(tracks) = self.first_success() else {
            return;
        };
        if tracks.is_empty() {
            warn!("SessionManager: track list empty, ignoring search playback");
            return;
        }

        let query = query.trim();
        if query.is_empty() {
            // "Play something": start from the top of the library.
            let first = tracks[0].clone();
            self.player.play(tracks, &first, true);
            self.search_filter.set(None);
            return;
        }

        let matches: Vec<Track> = tracks
            .iter()
            .filter(|track| matches_filter(track, query))
            .cloned()
            .collect();
        if matches.is_empty() {
            warn!("SessionManager: no results for query: {}", query);
            return;
        }

        match self.search_play {
            SearchPlayMode::FirstMatch => {
                let selected = matches[0].clone();
                self.player.play(tracks, &selected, true);
            }
            SearchPlayMode::AllMatches => {
                let selected = matches[0].clone();
                self.player.play(matches, &selected, true);
            }
        }
        self.search_filter.set(Some(query.to_string()));
    }

    fn answer_browse(&mut self) {
        let items = match self.first_success() {
            Some(tracks) => tracks
                .iter()
                .take(MAX_SESSION_QUEUE_LEN)
                .enumerate()
                .map(|(index, track)| queue_item(index as u64, track))
                .collect(),
            None => Vec::new(),
        };
        let _ = self
            .bus_producer
            .send(Message::Session(SessionNotice::BrowseResult(items)));
    }

    fn sync_outbound(&mut self) {
        let playback_changed = self.playback_rx.has_changed().unwrap_or(false);
        let shuffle_changed = self.shuffle_rx.has_changed().unwrap_or(false);
        let never_published = self.last_published_playback.is_none();
        if !playback_changed && !shuffle_changed && !never_published {
            return;
        }

        let state = self.playback_rx.borrow_and_update().clone();
        let shuffle_enabled = *self.shuffle_rx.borrow_and_update();

        self.publish_queue_if_needed(&state);
        self.publish_metadata_if_needed(&state);
        self.publish_playback_if_needed(&state, shuffle_enabled);
        self.publish_shuffle_if_needed(shuffle_enabled);
        self.update_notification_if_needed(&state);
    }

    fn publish_queue_if_needed(&mut self, state: &PlaybackState) {
        let window = window_queue(state.queue(), state.current_index());
        if self.last_published_queue.as_ref() == Some(&window) {
            return;
        }
        self.session.set_queue(window.clone());
        self.last_published_queue = Some(window);
    }

    fn publish_metadata_if_needed(&mut self, state: &PlaybackState) {
        let metadata = build_metadata(state);
        if self.last_published_metadata.as_ref() == Some(&metadata) {
            return;
        }
        self.session.set_metadata(metadata.clone());
        self.last_published_metadata = Some(metadata);
    }

    fn publish_playback_if_needed(&mut self, state: &PlaybackState, shuffle_enabled: bool) {
        let playback = build_playback(state, shuffle_enabled);
        if self.last_published_playback.as_ref() == Some(&playback) {
            return;
        }
        self.session.set_playback(playback.clone());
        self.last_published_playback = Some(playback);
    }

    fn publish_shuffle_if_needed(&mut self, shuffle_enabled: bool) {
        if self.last_published_shuffle == Some(shuffle_enabled) {
            return;
        }
        self.session.set_shuffle_mode(shuffle_enabled);
        self.last_published_shuffle = Some(shuffle_enabled);
    }

    fn update_notification_if_needed(&mut self, state: &PlaybackState) {
        let phase = notification_phase(state);
        if self.last_notified_phase == Some(phase) {
            return;
        }
        let metadata = build_metadata(state);
        match phase {
            NotificationPhase::Playing => self.notification.show_playing(&metadata),
            NotificationPhase::Paused => self.notification.show_paused(&metadata),
            NotificationPhase::Stopped => self.notification.remove(),
        }
        self.last_notified_phase = Some(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClockEngine;
    use crate::track_index::testing::{fixture_track, StaticIndex};

    use std::sync::Mutex;

    #[derive(Default)]
    struct SessionLog {
        queues: Vec<Vec<SessionQueueItem>>,
        metadata: Vec<SessionMetadata>,
        playbacks: Vec<SessionPlayback>,
        shuffles: Vec<bool>,
    }

    struct RecordingSession(Arc<Mutex<SessionLog>>);

    impl MediaSession for RecordingSession {
        fn set_queue(&mut self, queue: Vec<SessionQueueItem>) {
            self.0.lock().unwrap().queues.push(queue);
        }
        fn set_metadata(&mut self, metadata: SessionMetadata) {
            self.0.lock().unwrap().metadata.push(metadata);
        }
        fn set_playback(&mut self, playback: SessionPlayback) {
            self.0.lock().unwrap().playbacks.push(playback);
        }
        fn set_shuffle_mode(&mut self, enabled: bool) {
            self.0.lock().unwrap().shuffles.push(enabled);
        }
    }

    #[derive(Default)]
    struct NotificationLog {
        events: Vec<String>,
    }

    struct RecordingNotification(Arc<Mutex<NotificationLog>>);

    impl NotificationSurface for RecordingNotification {
        fn show_playing(&mut self, _metadata: &SessionMetadata) {
            self.0.lock().unwrap().events.push("playing".to_string());
        }
        fn show_paused(&mut self, _metadata: &SessionMetadata) {
            self.0.lock().unwrap().events.push("paused".to_string());
        }
        fn remove(&mut self) {
            self.0.lock().unwrap().events.push("removed".to_string());
        }
    }

    struct Harness {
        manager: SessionManager,
        player: Arc<Player>,
        session_log: Arc<Mutex<SessionLog>>,
        notification_log: Arc<Mutex<NotificationLog>>,
        bus: broadcast::Sender<Message>,
        search_filter: SearchFilter,
    }

    fn harness_with_tracks(names: &[&str], search_play: SearchPlayMode) -> Harness {
        let tracks: Vec<Track> = names.iter().map(|name| fixture_track(name)).collect();
        let index = Arc::new(StaticIndex::new(tracks));
        let adapter = TrackIndexAdapter::new(index);
        let player = Arc::new(Player::with_poll_interval(
            Box::new(ClockEngine::new()),
            Duration::from_millis(20),
        ));
        let (bus, _) = broadcast::channel(64);
        let session_log = Arc::new(Mutex::new(SessionLog::default()));
        let notification_log = Arc::new(Mutex::new(NotificationLog::default()));
        let search_filter = SearchFilter::new();
        let manager = SessionManager::new(
            bus.subscribe(),
            bus.clone(),
            Arc::clone(&player),
            adapter,
            search_filter.clone(),
            Box::new(RecordingSession(Arc::clone(&session_log))),
            Box::new(RecordingNotification(Arc::clone(&notification_log))),
            search_play,
        );
        Harness {
            manager,
            player,
            session_log,
            notification_log,
            bus,
            search_filter,
        }
    }

    fn tracks_of(names: &[&str]) -> Vec<Track> {
        names.iter().map(|name| fixture_track(name)).collect()
    }

    #[test]
    fn test_window_passes_small_queues_through() {
        let tracks = tracks_of(&["a", "b", "c"]);
        let window = window_queue(&tracks, Some(1));
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].id, 0);
        assert_eq!(window[2].id, 2);
    }

    #[test]
    fn test_window_of_fifty_equals_full_queue() {
        let names: Vec<String> = (0..50).map(|i| format!("t{i:03}")).collect();
        let tracks: Vec<Track> = names.iter().map(|name| fixture_track(name)).collect();
        let window = window_queue(&tracks, Some(30));
        assert_eq!(window.len(), 50);
    }

    #[test]
    fn test_window_near_tail_keeps_current_and_full_size() {
        let names: Vec<String> = (0..250).map(|i| format!("t{i:03}")).collect();
        let tracks: Vec<Track> = names.iter().map(|name| fixture_track(name)).collect();
        let window = window_queue(&tracks, Some(200));
        assert_eq!(window.len(), MAX_SESSION_QUEUE_LEN);
        assert!(window.iter().any(|item| item.id == 200));
    }

    #[test]
    fn test_window_starts_at_current_when_room_remains() {
        let names: Vec<String> = (0..250).map(|i| format!("t{i:03}")).collect();
        let tracks: Vec<Track> = names.iter().map(|name| fixture_track(name)).collect();
        let window = window_queue(&tracks, Some(10));
        assert_eq!(window.len(), MAX_SESSION_QUEUE_LEN);
        assert_eq!(window[0].id, 10);
        assert_eq!(window.last().unwrap().id, 109);
    }

    #[test]
    fn test_actions_reflect_queue_position() {
        let tracks = tracks_of(&["a", "b", "c"]);
        let playing_at = |index: usize| PlaybackState::Playing {
            is_paused: false,
            tracks: tracks.clone(),
            current_track_index: index,
            track_progress_millis: 0,
            track_duration_millis: Some(1_000),
        };

        let first = compute_actions(&playing_at(0));
        assert_eq!(first & actions::SKIP_TO_PREVIOUS, 0);
        assert_ne!(first & actions::SKIP_TO_NEXT, 0);

        let middle = compute_actions(&playing_at(1));
        assert_ne!(middle & actions::SKIP_TO_PREVIOUS, 0);
        assert_ne!(middle & actions::SKIP_TO_NEXT, 0);

        let last = compute_actions(&playing_at(2));
        assert_ne!(last & actions::SKIP_TO_PREVIOUS, 0);
        assert_eq!(last & actions::SKIP_TO_NEXT, 0);

        let stopped = compute_actions(&PlaybackState::Stopped);
        assert_eq!(stopped & actions::SKIP_TO_PREVIOUS, 0);
        assert_eq!(stopped & actions::SKIP_TO_NEXT, 0);
        assert_ne!(stopped & actions::PLAY_PAUSE, 0);
    }

    #[test]
    fn test_play_from_media_id_resolves_uri() {
        let mut harness = harness_with_tracks(&["a", "b", "c"], SearchPlayMode::FirstMatch);
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromMediaId(
                "file:///music/b.mp3".to_string(),
            ));
        let state = harness.player.current_playback_state();
        assert_eq!(state.current_index(), Some(1));
        assert!(!state.is_paused());
    }

    #[test]
    fn test_play_from_media_id_falls_back_to_first_track() {
        let mut harness = harness_with_tracks(&["a", "b"], SearchPlayMode::FirstMatch);
        harness.search_filter.set(Some("old".to_string()));
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromMediaId(
                "file:///music/zzz.mp3".to_string(),
            ));
        assert_eq!(
            harness.player.current_playback_state().current_index(),
            Some(0)
        );
        // A media-id start clears any active search filter.
        assert_eq!(harness.search_filter.get(), None);
    }

    #[test]
    fn test_play_from_search_first_match_keeps_full_queue() {
        let mut harness = harness_with_tracks(&["alpha", "beta", "betamax"], SearchPlayMode::FirstMatch);
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromSearch("beta".to_string()));
        let state = harness.player.current_playback_state();
        assert_eq!(state.queue().len(), 3);
        assert_eq!(state.current_index(), Some(1));
        assert_eq!(harness.search_filter.get(), Some("beta".to_string()));
    }

    #[test]
    fn test_play_from_search_all_matches_replaces_queue() {
        let mut harness = harness_with_tracks(&["alpha", "beta", "betamax"], SearchPlayMode::AllMatches);
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromSearch("beta".to_string()));
        let state = harness.player.current_playback_state();
        assert_eq!(state.queue().len(), 2);
        assert_eq!(state.current_index(), Some(0));
    }

    #[test]
    fn test_play_from_search_without_results_is_a_no_op() {
        let mut harness = harness_with_tracks(&["alpha"], SearchPlayMode::FirstMatch);
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromSearch("zzz".to_string()));
        assert_eq!(
            harness.player.current_playback_state(),
            PlaybackState::Stopped
        );
        assert_eq!(harness.search_filter.get(), None);
    }

    #[test]
    fn test_blank_search_plays_from_the_top() {
        let mut harness = harness_with_tracks(&["alpha", "beta"], SearchPlayMode::FirstMatch);
        harness
            .manager
            .handle_transport(TransportCommand::PlayFromSearch("  ".to_string()));
        assert_eq!(
            harness.player.current_playback_state().current_index(),
            Some(0)
        );
    }

    #[test]
    fn test_custom_shuffle_toggles_player_flag() {
        let mut harness = harness_with_tracks(&["a"], SearchPlayMode::FirstMatch);
        harness
            .manager
            .handle_transport(TransportCommand::Custom(CustomAction::ToggleShuffle));
        assert!(harness.player.current_shuffle_mode());
        harness
            .manager
            .handle_transport(TransportCommand::Custom(CustomAction::ToggleShuffle));
        assert!(!harness.player.current_shuffle_mode());
    }

    #[test]
    fn test_skip_commands_also_unpause() {
        let mut harness = harness_with_tracks(&["a", "b"], SearchPlayMode::FirstMatch);
        let tracks = tracks_of(&["a", "b"]);
        harness.player.play(tracks.clone(), &tracks[0], false);
        assert!(harness.player.current_playback_state().is_paused());

        harness.manager.handle_transport(TransportCommand::SkipToNext);
        let state = harness.player.current_playback_state();
        assert_eq!(state.current_index(), Some(1));
        assert!(!state.is_paused());
    }

    #[test]
    fn test_first_play_command_promotes_session_to_started() {
        let mut harness = harness_with_tracks(&["a"], SearchPlayMode::FirstMatch);
        let mut notices = harness.bus.subscribe();
        harness.manager.handle_transport(TransportCommand::Play);
        harness.manager.handle_transport(TransportCommand::Play);
        let mut started = 0;
        while let Ok(message) = notices.try_recv() {
            if matches!(message, Message::Session(SessionNotice::Started)) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }

    #[test]
    fn test_stop_releases_session_and_notification() {
        let mut harness = harness_with_tracks(&["a"], SearchPlayMode::FirstMatch);
        let tracks = tracks_of(&["a"]);
        harness.manager.handle_transport(TransportCommand::Play);
        harness.player.play(tracks.clone(), &tracks[0], true);
        harness.manager.sync_outbound();

        let mut notices = harness.bus.subscribe();
        harness.manager.handle_transport(TransportCommand::Stop);
        harness.manager.sync_outbound();

        assert_eq!(
            harness.player.current_playback_state(),
            PlaybackState::Stopped
        );
        let events = harness.notification_log.lock().unwrap().events.clone();
        assert_eq!(events.last().map(String::as_str), Some("removed"));
        let mut stopped = false;
        while let Ok(message) = notices.try_recv() {
            if matches!(message, Message::Session(SessionNotice::Stopped)) {
                stopped = true;
            }
        }
        assert!(stopped);
    }

    #[test]
    fn test_outbound_sync_is_deduplicated() {
        let mut harness = harness_with_tracks(&["a", "b"], SearchPlayMode::FirstMatch);
        let tracks = tracks_of(&["a", "b"]);
        // Paused, so the position clock cannot produce fresh snapshots
        // between the sync calls.
        harness.player.play(tracks.clone(), &tracks[0], false);

        harness.manager.sync_outbound();
        harness.manager.sync_outbound();
        harness.manager.sync_outbound();

        let log = harness.session_log.lock().unwrap();
        assert_eq!(log.queues.len(), 1);
        assert_eq!(log.metadata.len(), 1);
        assert_eq!(log.playbacks.len(), 1);
        assert_eq!(log.shuffles.len(), 1);
    }

    #[test]
    fn test_notification_follows_phase_transitions() {
        let mut harness = harness_with_tracks(&["a"], SearchPlayMode::FirstMatch);
        let tracks = tracks_of(&["a"]);

        harness.manager.sync_outbound();
        harness.player.play(tracks.clone(), &tracks[0], true);
        harness.manager.sync_outbound();
        harness.player.pause();
        harness.manager.sync_outbound();
        harness.player.stop();
        harness.manager.sync_outbound();

        let events = harness.notification_log.lock().unwrap().events.clone();
        assert_eq!(events, vec!["removed", "playing", "paused", "removed"]);
    }

    #[test]
    fn test_browse_returns_capped_listing() {
        let names: Vec<String> = (0..150).map(|i| format!("t{i:03}")).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut harness = harness_with_tracks(&name_refs, SearchPlayMode::FirstMatch);
        let mut notices = harness.bus.subscribe();
        harness.manager.handle_transport(TransportCommand::Browse);
        let mut browse: Option<Vec<SessionQueueItem>> = None;
        while let Ok(message) = notices.try_recv() {
            if let Message::Session(SessionNotice::BrowseResult(items)) = message {
                browse = Some(items);
            }
        }
        let items = browse.expect("browse result not published");
        assert_eq!(items.len(), MAX_SESSION_QUEUE_LEN);
    }

    #[test]
    fn test_metadata_carries_duration_sentinel() {
        let tracks = tracks_of(&["a"]);
        let unknown = PlaybackState::Playing {
            is_paused: false,
            tracks: tracks.clone(),
            current_track_index: 0,
            track_progress_millis: 0,
            track_duration_millis: None,
        };
        assert_eq!(build_metadata(&unknown).duration_ms, None);

        let known = PlaybackState::Playing {
            is_paused: false,
            tracks,
            current_track_index: 0,
            track_progress_millis: 0,
            track_duration_millis: Some(42_000),
        };
        assert_eq!(build_metadata(&known).duration_ms, Some(42_000));
    }
}
