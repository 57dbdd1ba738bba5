//! Playback engine abstraction.
//!
//! The decode/output engine is a black box behind [`PlaybackEngine`]: it owns
//! the loaded queue, the playing flag, and the position clock, and reports
//! changes through a single listener registration. Events carry no payload;
//! consumers re-read the engine's own getters so a callback racing a queue
//! swap can never observe a stale closure.
//!
//! [`ClockEngine`] is the built-in implementation used by the binary and the
//! tests: it advances position by wall clock while playing and auto-advances
//! at the end of each track.

use std::{
    sync::{mpsc, Mutex},
    time::Instant,
};

use log::debug;
use rand::seq::SliceRandom;

use crate::track::Track;

/// Coarse engine lifecycle, mirrored from the underlying player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    /// Nothing prepared, or stopped.
    Idle,
    /// A queue is prepared; duration is known.
    Ready,
    /// Playback ran off the end of the queue.
    Ended,
}

/// Engine change notification. Deliberately payload-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    IsPlayingChanged,
    MediaItemTransition,
    LifecycleChanged,
}

/// Black-box decode/output engine contract.
pub trait PlaybackEngine: Send {
    /// Registers the single event listener, replacing any previous one.
    fn set_listener(&mut self, listener: mpsc::Sender<EngineEvent>);

    /// Replaces the whole queue, seeks to `start_index` at offset 0, and
    /// starts playing unless `play_when_ready` is false.
    fn set_queue(&mut self, tracks: Vec<Track>, start_index: usize, play_when_ready: bool);

    fn queue(&self) -> Vec<Track>;
    fn current_index(&self) -> Option<usize>;
    fn is_playing(&self) -> bool;
    fn lifecycle(&self) -> EngineLifecycle;
    fn position_ms(&self) -> u64;
    /// `None` until the engine has prepared the current item.
    fn duration_ms(&self) -> Option<u64>;

    fn play(&mut self);
    fn pause(&mut self);
    fn seek_to(&mut self, position_ms: u64);
    fn skip_to_index(&mut self, index: usize);
    fn skip_to_next(&mut self);
    fn skip_to_previous(&mut self);
    fn set_shuffle_enabled(&mut self, enabled: bool);
    fn shuffle_enabled(&self) -> bool;
    /// Stops playback and drops to [`EngineLifecycle::Idle`].
    fn stop(&mut self);
    /// Tears the engine down. Must be safe to call more than once.
    fn release(&mut self);
}

/// Default simulated track length when the source reports nothing.
const DEFAULT_TRACK_DURATION_MS: u64 = 180_000;

struct ClockState {
    tracks: Vec<Track>,
    /// Playback order as absolute queue indices.
    order: Vec<usize>,
    /// Absolute index of the current item.
    current: Option<usize>,
    playing: bool,
    lifecycle: EngineLifecycle,
    shuffle_enabled: bool,
    position_base_ms: u64,
    resumed_at: Option<Instant>,
    listener: Option<mpsc::Sender<EngineEvent>>,
    released: bool,
}

impl ClockState {
    fn emit(&self, event: EngineEvent) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(event);
        }
    }

    fn position(&self) -> u64 {
        let elapsed = self
            .resumed_at
            .map(|resumed_at| resumed_at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.position_base_ms + elapsed
    }

    fn freeze_position(&mut self) {
        self.position_base_ms = self.position();
        self.resumed_at = None;
    }

    fn order_position(&self) -> Option<usize> {
        let current = self.current?;
        self.order.iter().position(|&index| index == current)
    }

    fn rebuild_order(&mut self) {
        self.order = (0..self.tracks.len()).collect();
        if self.shuffle_enabled && self.order.len() > 1 {
            self.order.shuffle(&mut rand::rng());
            // The current item always leads the shuffled order so "previous"
            // has nowhere earlier to land.
            if let Some(current) = self.current {
                if let Some(pos) = self.order.iter().position(|&index| index == current) {
                    self.order.remove(pos);
                    self.order.insert(0, current);
                }
            }
        }
    }

    fn move_to(&mut self, index: usize) {
        self.current = Some(index);
        self.position_base_ms = 0;
        self.resumed_at = self.playing.then(Instant::now);
        self.emit(EngineEvent::MediaItemTransition);
    }

    /// Advances past finished tracks; parks at Ended after the last one.
    fn advance_if_finished(&mut self, duration_ms: u64) {
        while self.playing && self.lifecycle == EngineLifecycle::Ready && self.position() >= duration_ms {
            let Some(order_pos) = self.order_position() else {
                break;
            };
            if order_pos + 1 < self.order.len() {
                let carried = self.position() - duration_ms;
                let next = self.order[order_pos + 1];
                self.current = Some(next);
                self.position_base_ms = carried.min(duration_ms);
                self.resumed_at = Some(Instant::now());
                self.emit(EngineEvent::MediaItemTransition);
            } else {
                self.playing = false;
                self.lifecycle = EngineLifecycle::Ended;
                self.position_base_ms = duration_ms;
                self.resumed_at = None;
                self.emit(EngineEvent::LifecycleChanged);
                self.emit(EngineEvent::IsPlayingChanged);
            }
        }
    }
}

/// Wall-clock playback simulation. Every track runs for a fixed duration;
/// shuffle mode rewrites the traversal order without touching the queue.
pub struct ClockEngine {
    state: Mutex<ClockState>,
    track_duration_ms: u64,
}

impl ClockEngine {
    pub fn new() -> Self {
        Self::with_track_duration(DEFAULT_TRACK_DURATION_MS)
    }

    pub fn with_track_duration(track_duration_ms: u64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                tracks: Vec::new(),
                order: Vec::new(),
                current: None,
                playing: false,
                lifecycle: EngineLifecycle::Idle,
                shuffle_enabled: false,
                position_base_ms: 0,
                resumed_at: None,
                listener: None,
                released: false,
            }),
            track_duration_ms: track_duration_ms.max(1),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ClockState> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let duration = self.track_duration_ms;
        state.advance_if_finished(duration);
        state
    }
}

impl Default for ClockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for ClockEngine {
    fn set_listener(&mut self, listener: mpsc::Sender<EngineEvent>) {
        self.locked().listener = Some(listener);
    }

    fn set_queue(&mut self, tracks: Vec<Track>, start_index: usize, play_when_ready: bool) {
        let mut state = self.locked();
        if state.released || tracks.is_empty() {
            return;
        }
        let start_index = start_index.min(tracks.len() - 1);
        state.tracks = tracks;
        state.current = Some(start_index);
        state.rebuild_order();
        state.lifecycle = EngineLifecycle::Ready;
        state.playing = play_when_ready;
        state.position_base_ms = 0;
        state.resumed_at = play_when_ready.then(Instant::now);
        state.emit(EngineEvent::LifecycleChanged);
        state.emit(EngineEvent::MediaItemTransition);
        state.emit(EngineEvent::IsPlayingChanged);
    }

    fn queue(&self) -> Vec<Track> {
        self.locked().tracks.clone()
    }

    fn current_index(&self) -> Option<usize> {
        self.locked().current
    }

    fn is_playing(&self) -> bool {
        self.locked().playing
    }

    fn lifecycle(&self) -> EngineLifecycle {
        self.locked().lifecycle
    }

    fn position_ms(&self) -> u64 {
        self.locked().position()
    }

    fn duration_ms(&self) -> Option<u64> {
        let state = self.locked();
        (state.lifecycle == EngineLifecycle::Ready && state.current.is_some())
            .then_some(self.track_duration_ms)
    }

    fn play(&mut self) {
        let mut state = self.locked();
        if state.released || state.playing {
            return;
        }
        if state.lifecycle != EngineLifecycle::Ready || state.current.is_none() {
            debug!("ClockEngine: play ignored without a prepared queue");
            return;
        }
        state.playing = true;
        state.resumed_at = Some(Instant::now());
        state.emit(EngineEvent::IsPlayingChanged);
    }

    fn pause(&mut self) {
        let mut state = self.locked();
        if !state.playing {
            return;
        }
        state.freeze_position();
        state.playing = false;
        state.emit(EngineEvent::IsPlayingChanged);
    }

    fn seek_to(&mut self, position_ms: u64) {
        let mut state = self.locked();
        if state.current.is_none() {
            return;
        }
        state.position_base_ms = position_ms.min(self.track_duration_ms);
        state.resumed_at = state.playing.then(Instant::now);
    }

    fn skip_to_index(&mut self, index: usize) {
        let mut state = self.locked();
        if index < state.tracks.len() {
            state.move_to(index);
        } else {
            debug!("ClockEngine: skip_to_index {} out of bounds", index);
        }
    }

    fn skip_to_next(&mut self) {
        let mut state = self.locked();
        let Some(order_pos) = state.order_position() else {
            return;
        };
        if order_pos + 1 < state.order.len() {
            let next = state.order[order_pos + 1];
            state.move_to(next);
        }
    }

    fn skip_to_previous(&mut self) {
        let mut state = self.locked();
        let Some(order_pos) = state.order_position() else {
            return;
        };
        if order_pos > 0 {
            let previous = state.order[order_pos - 1];
            state.move_to(previous);
        }
    }

    fn set_shuffle_enabled(&mut self, enabled: bool) {
        let mut state = self.locked();
        if state.shuffle_enabled == enabled {
            return;
        }
        state.shuffle_enabled = enabled;
        state.rebuild_order();
    }

    fn shuffle_enabled(&self) -> bool {
        self.locked().shuffle_enabled
    }

    fn stop(&mut self) {
        let mut state = self.locked();
        state.playing = false;
        state.lifecycle = EngineLifecycle::Idle;
        state.position_base_ms = 0;
        state.resumed_at = None;
        state.emit(EngineEvent::LifecycleChanged);
        state.emit(EngineEvent::IsPlayingChanged);
    }

    fn release(&mut self) {
        let mut state = self.locked();
        if state.released {
            return;
        }
        state.released = true;
        state.playing = false;
        state.lifecycle = EngineLifecycle::Idle;
        state.resumed_at = None;
        state.listener = None;
    }
}
