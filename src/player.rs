//! Playback state store.
//!
//! [`Player`] wraps the black-box [`PlaybackEngine`] and owns the single
//! authoritative playback snapshot. Every engine callback and every command
//! recomputes the snapshot from the engine's own getters and replaces it
//! wholesale; a watch channel fans the result out to the session bridge,
//! persistence, and the view model with replay-latest semantics. A reactor
//! thread drains engine events and refreshes the position on a ~1s cadence
//! while the engine plays.
//!
//! The player is the only writer of the playback snapshot and the shuffle
//! flag; everything else only reads.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

use log::{debug, info};
use tokio::sync::watch;

use crate::{
    engine::{EngineLifecycle, PlaybackEngine},
    track::{PlaybackState, Track},
};

/// Cadence of the position refresh while the engine plays.
const POSITION_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct PlayerInner {
    engine: Mutex<Box<dyn PlaybackEngine>>,
    playback_tx: watch::Sender<PlaybackState>,
    shuffle_tx: watch::Sender<bool>,
    released: AtomicBool,
}

impl PlayerInner {
    fn engine(&self) -> MutexGuard<'_, Box<dyn PlaybackEngine>> {
        match self.engine.lock() {
            Ok(engine) => engine,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Recomputes the snapshot from the engine and publishes it if changed.
    /// Publishing only on change coalesces duplicate callback bursts.
    fn refresh(&self) {
        let next = {
            let engine = self.engine();
            compute_state(engine.as_ref())
        };
        self.playback_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    fn force_stopped(&self) {
        self.playback_tx.send_if_modified(|current| {
            if *current != PlaybackState::Stopped {
                *current = PlaybackState::Stopped;
                true
            } else {
                false
            }
        });
    }
}

/// Derives the playback snapshot from the engine's current getters.
///
/// No current item, or an idle/ended engine, means `Stopped`; anything else
/// is `Playing` with the paused flag inverted from the engine's playing flag.
fn compute_state(engine: &dyn PlaybackEngine) -> PlaybackState {
    let lifecycle = engine.lifecycle();
    if lifecycle != EngineLifecycle::Ready {
        return PlaybackState::Stopped;
    }
    let tracks = engine.queue();
    match engine.current_index() {
        Some(index) if index < tracks.len() => PlaybackState::Playing {
            is_paused: !engine.is_playing(),
            current_track_index: index,
            track_progress_millis: engine.position_ms(),
            track_duration_millis: engine.duration_ms(),
            tracks,
        },
        _ => PlaybackState::Stopped,
    }
}

/// The engine facade and playback state store.
pub struct Player {
    inner: Arc<PlayerInner>,
    reactor: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Player {
    pub fn new(engine: Box<dyn PlaybackEngine>) -> Self {
        Self::with_poll_interval(engine, POSITION_POLL_INTERVAL)
    }

    pub fn with_poll_interval(mut engine: Box<dyn PlaybackEngine>, poll_interval: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        engine.set_listener(event_tx);

        let (playback_tx, _) = watch::channel(PlaybackState::Stopped);
        let (shuffle_tx, _) = watch::channel(false);
        let inner = Arc::new(PlayerInner {
            engine: Mutex::new(engine),
            playback_tx,
            shuffle_tx,
            released: AtomicBool::new(false),
        });

        let reactor_inner = Arc::clone(&inner);
        let reactor = thread::spawn(move || {
            loop {
                match event_rx.recv_timeout(poll_interval) {
                    Ok(_) => {
                        // Coalesce the rest of the burst before recomputing.
                        while event_rx.try_recv().is_ok() {}
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
                if reactor_inner.released.load(Ordering::Acquire) {
                    break;
                }
                reactor_inner.refresh();
            }
            debug!("Player: reactor stopped");
        });

        Self {
            inner,
            reactor: Mutex::new(Some(reactor)),
        }
    }

    /// Replaces the whole queue and starts at `selected_track` (index 0 when
    /// the track is not in the list) from offset 0.
    pub fn play(&self, tracks: Vec<Track>, selected_track: &Track, play_when_ready: bool) {
        if self.is_released() || tracks.is_empty() {
            return;
        }
        let selected_index = tracks
            .iter()
            .position(|track| track == selected_track)
            .unwrap_or(0);
        self.inner
            .engine()
            .set_queue(tracks, selected_index, play_when_ready);
        self.inner.refresh();
    }

    pub fn toggle_play_pause(&self) {
        if self.is_released() {
            return;
        }
        {
            let mut engine = self.inner.engine();
            if engine.is_playing() {
                engine.pause();
            } else {
                engine.play();
            }
        }
        self.inner.refresh();
    }

    pub fn pause(&self) {
        if self.is_released() {
            return;
        }
        self.inner.engine().pause();
        self.inner.refresh();
    }

    pub fn unpause(&self) {
        if self.is_released() {
            return;
        }
        self.inner.engine().play();
        self.inner.refresh();
    }

    pub fn skip_to_next(&self) {
        if self.is_released() {
            return;
        }
        self.inner.engine().skip_to_next();
        self.inner.refresh();
    }

    pub fn skip_to_previous(&self) {
        if self.is_released() {
            return;
        }
        self.inner.engine().skip_to_previous();
        self.inner.refresh();
    }

    pub fn skip_to_track(&self, index: usize) {
        if self.is_released() {
            return;
        }
        self.inner.engine().skip_to_index(index);
        self.inner.refresh();
    }

    pub fn seek_to(&self, position_ms: u64) {
        if self.is_released() {
            return;
        }
        self.inner.engine().seek_to(position_ms);
        self.inner.refresh();
    }

    /// Stops the engine and forces the snapshot to `Stopped`, regardless of
    /// how the engine reports itself afterwards.
    pub fn stop(&self) {
        if self.is_released() {
            return;
        }
        self.inner.engine().stop();
        self.inner.force_stopped();
    }

    pub fn set_shuffle_mode_enabled(&self, enabled: bool) {
        if self.is_released() {
            return;
        }
        self.inner.engine().set_shuffle_enabled(enabled);
        self.inner.shuffle_tx.send_if_modified(|current| {
            if *current != enabled {
                *current = enabled;
                true
            } else {
                false
            }
        });
    }

    /// Replay-latest handle to the playback snapshot.
    pub fn playback_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.playback_tx.subscribe()
    }

    /// Replay-latest handle to the shuffle flag.
    pub fn shuffle_mode_enabled(&self) -> watch::Receiver<bool> {
        self.inner.shuffle_tx.subscribe()
    }

    pub fn current_playback_state(&self) -> PlaybackState {
        self.inner.playback_tx.borrow().clone()
    }

    pub fn current_shuffle_mode(&self) -> bool {
        *self.inner.shuffle_tx.borrow()
    }

    fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Tears down the position poller first, then the engine, exactly once.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Player: releasing");
        let reactor = {
            let mut reactor = match self.reactor.lock() {
                Ok(reactor) => reactor,
                Err(poisoned) => poisoned.into_inner(),
            };
            reactor.take()
        };
        if let Some(reactor) = reactor {
            let _ = reactor.join();
        }
        self.inner.engine().release();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.release();
    }
}
