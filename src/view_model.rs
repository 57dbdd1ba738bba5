//! Presentation-facing state for the (out-of-scope) UI layer.
//!
//! [`TrackViewModel`] exposes the track list and playback snapshot as
//! replay-latest state: values are cached in watch channels and survive
//! short-lived observer disconnects, rather than being recomputed per
//! observer. Commands simply forward to the player.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    player::Player,
    track::{PlaybackState, Track, TrackListState},
    track_index::{normalize_filter, TrackIndexAdapter, TrackListSubscription},
};

/// Shared active-search state.
///
/// Written by the search box and by voice search (`playFromSearch` sets it,
/// `playFromMediaId` clears it); read by persistence and by the view model's
/// live query. Blank input normalizes to "no filter".
#[derive(Clone)]
pub struct SearchFilter {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl SearchFilter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set(&self, filter: Option<String>) {
        let filter = normalize_filter(filter.as_deref());
        self.sender.send_if_modified(|current| {
            if *current != filter {
                *current = filter;
                true
            } else {
                false
            }
        });
    }

    pub fn get(&self) -> Option<String> {
        self.sender.borrow().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// View state for the track list screen.
pub struct TrackViewModel {
    track_index: TrackIndexAdapter,
    player: Arc<Player>,
    search_filter: SearchFilter,
    subscription: Option<TrackListSubscription>,
    subscribed_filter: Option<String>,
}

impl TrackViewModel {
    pub fn new(
        track_index: TrackIndexAdapter,
        player: Arc<Player>,
        search_filter: SearchFilter,
    ) -> Self {
        let filter = search_filter.get();
        let subscription = track_index.observe(filter.as_deref());
        Self {
            track_index,
            player,
            search_filter,
            subscription: Some(subscription),
            subscribed_filter: filter,
        }
    }

    /// Switch-latest: when the filter changed, the prior subscription is
    /// released before the replacement is opened, so at most one index
    /// registration is live per search session.
    fn refresh_subscription(&mut self) {
        let filter = self.search_filter.get();
        if filter == self.subscribed_filter {
            return;
        }
        self.subscription.take();
        self.subscription = Some(self.track_index.observe(filter.as_deref()));
        self.subscribed_filter = filter;
    }

    /// Latest track-list snapshot for the active search query.
    pub fn tracks(&mut self) -> TrackListState {
        self.refresh_subscription();
        self.subscription
            .as_ref()
            .map(TrackListSubscription::current)
            .unwrap_or(TrackListState::Loading)
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.player.current_playback_state()
    }

    pub fn playback_state_receiver(&self) -> watch::Receiver<PlaybackState> {
        self.player.playback_state()
    }

    pub fn shuffle_mode_enabled(&self) -> bool {
        self.player.current_shuffle_mode()
    }

    pub fn track_progress_millis(&self) -> u64 {
        self.playback_state().progress_millis()
    }

    /// `None` while the engine has not reported a duration yet.
    pub fn track_duration_millis(&self) -> Option<u64> {
        self.playback_state().duration_millis()
    }

    pub fn is_previous_enabled(&mut self) -> bool {
        if !matches!(self.tracks(), TrackListState::Success(_)) {
            return false;
        }
        matches!(self.playback_state().current_index(), Some(index) if index > 0)
    }

    pub fn is_next_enabled(&mut self) -> bool {
        if !matches!(self.tracks(), TrackListState::Success(_)) {
            return false;
        }
        let state = self.playback_state();
        match state.current_index() {
            Some(index) => index + 1 < state.queue().len(),
            None => false,
        }
    }

    pub fn on_track_selected(&mut self, track: &Track) {
        if let TrackListState::Success(tracks) = self.tracks() {
            self.player.play(tracks, track, true);
        }
    }

    pub fn on_play_pause_clicked(&self) {
        self.player.toggle_play_pause();
    }

    pub fn on_seek(&self, position_ms: u64) {
        self.player.seek_to(position_ms);
    }

    pub fn on_previous_clicked(&self) {
        self.player.skip_to_previous();
    }

    pub fn on_next_clicked(&self) {
        self.player.skip_to_next();
    }

    pub fn on_shuffle_clicked(&self) {
        self.player
            .set_shuffle_mode_enabled(!self.player.current_shuffle_mode());
    }

    pub fn on_search_query_changed(&mut self, query: &str) {
        self.search_filter.set(Some(query.to_string()));
        self.refresh_subscription();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClockEngine;
    use crate::track_index::testing::{fixture_track, StaticIndex};
    use crate::track_index::TrackIndex;
    use std::time::Duration;

    fn harness(names: &[&str]) -> (TrackViewModel, Arc<Player>, Arc<StaticIndex>) {
        let tracks: Vec<Track> = names.iter().map(|name| fixture_track(name)).collect();
        let index = Arc::new(StaticIndex::new(tracks));
        let adapter = TrackIndexAdapter::new(Arc::clone(&index) as Arc<dyn TrackIndex>);
        let player = Arc::new(Player::with_poll_interval(
            Box::new(ClockEngine::new()),
            Duration::from_millis(20),
        ));
        let view_model = TrackViewModel::new(adapter, Arc::clone(&player), SearchFilter::new());
        (view_model, player, index)
    }

    #[test]
    fn test_search_filter_normalizes_blank_input() {
        let filter = SearchFilter::new();
        filter.set(Some("  ".to_string()));
        assert_eq!(filter.get(), None);
        filter.set(Some(" jazz ".to_string()));
        assert_eq!(filter.get(), Some("jazz".to_string()));
        filter.set(None);
        assert_eq!(filter.get(), None);
    }

    #[test]
    fn test_tracks_reflect_search_query() {
        let (mut view_model, _player, _index) = harness(&["alpha", "beta", "betamax"]);
        match view_model.tracks() {
            TrackListState::Success(tracks) => assert_eq!(tracks.len(), 3),
            other => panic!("expected Success, got {other:?}"),
        }

        view_model.on_search_query_changed("beta");
        match view_model.tracks() {
            TrackListState::Success(tracks) => assert_eq!(tracks.len(), 2),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_change_keeps_one_live_registration() {
        let (mut view_model, _player, index) = harness(&["alpha", "beta"]);
        assert_eq!(index.listener_count(), 1);
        view_model.on_search_query_changed("beta");
        view_model.tracks();
        assert_eq!(index.listener_count(), 1);
        view_model.on_search_query_changed("");
        view_model.tracks();
        assert_eq!(index.listener_count(), 1);
    }

    #[test]
    fn test_previous_next_enablement_follows_queue_position() {
        let (mut view_model, player, _index) = harness(&["a", "b", "c"]);

        assert!(!view_model.is_previous_enabled());
        assert!(!view_model.is_next_enabled());

        let tracks: Vec<Track> = ["a", "b", "c"].iter().map(|n| fixture_track(n)).collect();
        player.play(tracks.clone(), &tracks[0], true);
        assert!(!view_model.is_previous_enabled());
        assert!(view_model.is_next_enabled());

        player.skip_to_track(1);
        assert!(view_model.is_previous_enabled());
        assert!(view_model.is_next_enabled());

        player.skip_to_track(2);
        assert!(view_model.is_previous_enabled());
        assert!(!view_model.is_next_enabled());

        player.stop();
        assert!(!view_model.is_previous_enabled());
        assert!(!view_model.is_next_enabled());
    }

    #[test]
    fn test_track_selection_plays_the_visible_list() {
        let (mut view_model, player, _index) = harness(&["alpha", "beta", "betamax"]);
        view_model.on_search_query_changed("beta");
        let TrackListState::Success(visible) = view_model.tracks() else {
            panic!("expected Success");
        };
        view_model.on_track_selected(&visible[1]);
        let state = player.current_playback_state();
        assert_eq!(state.queue().len(), 2);
        assert_eq!(state.current_index(), Some(1));
    }

    #[test]
    fn test_commands_forward_to_player() {
        let (mut view_model, player, _index) = harness(&["a", "b"]);
        let tracks: Vec<Track> = ["a", "b"].iter().map(|n| fixture_track(n)).collect();
        player.play(tracks.clone(), &tracks[0], true);

        view_model.on_play_pause_clicked();
        assert!(player.current_playback_state().is_paused());

        view_model.on_next_clicked();
        assert_eq!(player.current_playback_state().current_index(), Some(1));

        view_model.on_previous_clicked();
        assert_eq!(player.current_playback_state().current_index(), Some(0));

        view_model.on_seek(4_000);
        assert_eq!(view_model.track_progress_millis(), 4_000);

        view_model.on_shuffle_clicked();
        assert!(view_model.shuffle_mode_enabled());
    }

    #[test]
    fn test_state_survives_observer_reconnect() {
        let (view_model, player, _index) = harness(&["a"]);
        let tracks = vec![fixture_track("a")];
        player.play(tracks.clone(), &tracks[0], true);

        let receiver = view_model.playback_state_receiver();
        drop(receiver);
        // A fresh observer immediately sees the cached current value.
        let receiver = view_model.playback_state_receiver();
        assert!(matches!(
            &*receiver.borrow(),
            PlaybackState::Playing { .. }
        ));
    }
}
