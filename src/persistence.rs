//! Durable playback-state storage and the persistence manager.
//!
//! [`StateDb`] keeps one row of playback state (track URI, position, search
//! filter, shuffle flag), read as one snapshot and written in one statement.
//! [`PersistenceManager`] watches the player and writes that row on a
//! debounced reaction to track/shuffle/filter changes, on a repeating timer
//! while playback runs, and immediately on pause/stop; at startup it runs the
//! one-shot restore before entering its loop.

use std::{
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use rusqlite::{params, Connection};
use tokio::sync::{broadcast, watch};

use crate::{
    config::PersistenceConfig,
    error::Result,
    player::Player,
    protocol::Message,
    track::{PlaybackState, StoredPlaybackState},
    track_index::TrackIndexAdapter,
    view_model::SearchFilter,
};

const IDLE_LOOP_SLEEP: Duration = Duration::from_millis(25);

/// How long restore waits for the first successful index snapshot.
const RESTORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-row playback-state database.
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Opens the database in the platform data directory.
    pub fn open_default() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("troubadour");
        std::fs::create_dir_all(&data_dir)?;
        Self::open(&data_dir.join("playback.db"))
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS playback_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                track_uri TEXT,
                position_ms INTEGER NOT NULL,
                search_filter TEXT,
                shuffle_enabled INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Reads the stored snapshot, defaulting when nothing was saved yet.
    pub fn load(&self) -> Result<StoredPlaybackState> {
        let mut stmt = self.conn.prepare(
            "SELECT track_uri, position_ms, search_filter, shuffle_enabled
             FROM playback_state WHERE id = 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(StoredPlaybackState {
                track_uri: row.get(0)?,
                position_ms: row.get::<_, i64>(1)?.max(0) as u64,
                search_filter: row.get(2)?,
                shuffle_enabled: row.get::<_, i64>(3)? != 0,
            }),
            None => Ok(StoredPlaybackState::default()),
        }
    }

    /// Writes the snapshot as one upsert.
    pub fn save(&mut self, state: &StoredPlaybackState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO playback_state (id, track_uri, position_ms, search_filter, shuffle_enabled)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id)
             DO UPDATE SET
                track_uri = excluded.track_uri,
                position_ms = excluded.position_ms,
                search_filter = excluded.search_filter,
                shuffle_enabled = excluded.shuffle_enabled",
            params![
                state.track_uri,
                state.position_ms as i64,
                state.search_filter,
                i64::from(state.shuffle_enabled),
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistPhase {
    Playing,
    Paused,
    Stopped,
}

fn phase_of(state: &PlaybackState) -> PersistPhase {
    match state {
        PlaybackState::Stopped => PersistPhase::Stopped,
        PlaybackState::Playing { is_paused: true, .. } => PersistPhase::Paused,
        PlaybackState::Playing { .. } => PersistPhase::Playing,
    }
}

/// The (track, shuffle, filter) triple whose changes are debounced.
type SnapshotIdentity = (Option<String>, bool, Option<String>);

/// Debounced/periodic playback-state snapshotting plus startup restore.
pub struct PersistenceManager {
    bus_consumer: broadcast::Receiver<Message>,
    db: StateDb,
    player: Arc<Player>,
    track_index: TrackIndexAdapter,
    search_filter: SearchFilter,
    playback_rx: watch::Receiver<PlaybackState>,
    shuffle_rx: watch::Receiver<bool>,
    filter_rx: watch::Receiver<Option<String>>,
    debounce: Duration,
    autosave: Duration,
    debounce_deadline: Option<Instant>,
    autosave_deadline: Option<Instant>,
    last_phase: PersistPhase,
    last_identity: SnapshotIdentity,
    save_count: u64,
}

impl PersistenceManager {
    pub fn new(
        bus_consumer: broadcast::Receiver<Message>,
        db: StateDb,
        player: Arc<Player>,
        track_index: TrackIndexAdapter,
        search_filter: SearchFilter,
        config: &PersistenceConfig,
    ) -> Self {
        let playback_rx = player.playback_state();
        let shuffle_rx = player.shuffle_mode_enabled();
        let filter_rx = search_filter.receiver();
        Self {
            bus_consumer,
            db,
            player,
            track_index,
            search_filter,
            playback_rx,
            shuffle_rx,
            filter_rx,
            debounce: Duration::from_millis(config.debounce_ms),
            autosave: Duration::from_secs(config.autosave_secs),
            debounce_deadline: None,
            autosave_deadline: None,
            last_phase: PersistPhase::Stopped,
            last_identity: (None, false, None),
            save_count: 0,
        }
    }

    /// Starts the blocking manager loop: restore once, then snapshot until
    /// the bus closes, with a final save on the way out.
    pub fn run(&mut self) {
        info!("PersistenceManager: started");
        self.restore();
        loop {
            if self.process_pending_bus_messages() {
                break;
            }
            self.tick(Instant::now());
            thread::sleep(IDLE_LOOP_SLEEP);
        }
        self.save_now();
        info!("PersistenceManager: bus closed, exiting");
    }

    fn process_pending_bus_messages(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty) => return false,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("PersistenceManager: bus lagged by {} messages", skipped);
                }
                Err(broadcast::error::TryRecvError::Closed) => return true,
            }
        }
    }

    /// One-shot restoration of the persisted snapshot.
    ///
    /// Applies the shuffle flag and search filter, then re-resolves the
    /// persisted track URI against the filtered track list before seeking.
    /// Any miss leaves playback stopped.
    fn restore(&mut self) {
        let stored = match self.db.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Failed to load persisted playback state: {}", err);
                return;
            }
        };
        debug!("Restoring playback state: {:?}", stored);

        self.player.set_shuffle_mode_enabled(stored.shuffle_enabled);
        self.search_filter.set(stored.search_filter.clone());

        if let Some(track_uri) = &stored.track_uri {
            let subscription = self.track_index.observe(stored.search_filter.as_deref());
            match subscription.wait_for_success(RESTORE_TIMEOUT) {
                Some(tracks) => match tracks.iter().find(|track| &track.uri == track_uri) {
                    Some(track) => {
                        info!("Restored track {} at {}ms", track_uri, stored.position_ms);
                        let track = track.clone();
                        self.player.play(tracks, &track, false);
                        self.player.seek_to(stored.position_ms);
                    }
                    None => {
                        info!(
                            "Persisted track {} not in the current list; staying stopped",
                            track_uri
                        );
                    }
                },
                None => warn!("Track index produced no snapshot during restore"),
            }
        }

        self.mark_clean(Instant::now());
    }

    fn current_identity(&self) -> SnapshotIdentity {
        let state = self.playback_rx.borrow();
        (
            state.current_track().map(|track| track.uri.clone()),
            *self.shuffle_rx.borrow(),
            self.filter_rx.borrow().clone(),
        )
    }

    /// Resets change tracking so the restore itself schedules no write.
    fn mark_clean(&mut self, now: Instant) {
        self.last_identity = self.current_identity();
        self.last_phase = phase_of(&self.playback_rx.borrow().clone());
        self.debounce_deadline = None;
        self.autosave_deadline = (self.last_phase == PersistPhase::Playing)
            .then(|| now + self.autosave);
    }

    /// One scheduling step. Extracted from the loop so the timer semantics
    /// are testable with synthetic clocks.
    fn tick(&mut self, now: Instant) {
        let phase = phase_of(&self.playback_rx.borrow().clone());

        let identity = self.current_identity();
        if identity != self.last_identity {
            // Cancel-and-restart: only quiescence flushes the write.
            self.debounce_deadline = Some(now + self.debounce);
            self.last_identity = identity;
        }

        if phase != self.last_phase {
            self.last_phase = phase;
            match phase {
                PersistPhase::Playing => {
                    self.autosave_deadline = Some(now + self.autosave);
                }
                PersistPhase::Paused | PersistPhase::Stopped => {
                    // The repeating save loop must not survive out of Playing.
                    self.autosave_deadline = None;
                    self.debounce_deadline = None;
                    self.save_now();
                }
            }
        }

        if let Some(deadline) = self.debounce_deadline {
            if now >= deadline {
                self.debounce_deadline = None;
                self.save_now();
            }
        }

        if let Some(deadline) = self.autosave_deadline {
            if now >= deadline {
                self.save_now();
                self.autosave_deadline = Some(now + self.autosave);
            }
        }
    }

    fn save_now(&mut self) {
        let state = self.playback_rx.borrow().clone();
        let snapshot = StoredPlaybackState {
            track_uri: state.current_track().map(|track| track.uri.clone()),
            position_ms: state.progress_millis(),
            search_filter: self.filter_rx.borrow().clone(),
            shuffle_enabled: *self.shuffle_rx.borrow(),
        };
        match self.db.save(&snapshot) {
            Ok(()) => {
                self.save_count += 1;
                debug!("Saved playback state: {:?}", snapshot);
            }
            Err(err) => error!("Failed to save playback state: {}", err),
        }
    }

    #[cfg(test)]
    fn save_count(&self) -> u64 {
        self.save_count
    }
}
