mod config;
mod engine;
mod error;
mod persistence;
mod player;
mod protocol;
mod session;
mod track;
mod track_index;
mod view_model;

use std::{
    io::BufRead,
    path::PathBuf,
    sync::Arc,
    thread,
};

use log::{debug, error, info};
use tokio::sync::broadcast;

use crate::{
    engine::ClockEngine,
    persistence::{PersistenceManager, StateDb},
    player::Player,
    protocol::{
        CustomAction, Message, SessionMetadata, SessionPlayback, SessionQueueItem,
        TransportCommand,
    },
    session::{MediaSession, NotificationSurface, SessionManager},
    track::{PlaybackState, TrackListState},
    track_index::{FsTrackIndex, TrackIndex, TrackIndexAdapter},
    view_model::{SearchFilter, TrackViewModel},
};

/// Platform session stand-in that logs every outbound update.
struct LoggingMediaSession;

impl MediaSession for LoggingMediaSession {
    fn set_queue(&mut self, queue: Vec<SessionQueueItem>) {
        info!("Session queue updated: {} item(s)", queue.len());
    }

    fn set_metadata(&mut self, metadata: SessionMetadata) {
        info!(
            "Session metadata updated: {} - {}",
            metadata.artist.as_deref().unwrap_or("Unknown artist"),
            metadata.title.as_deref().unwrap_or("Unknown title"),
        );
    }

    fn set_playback(&mut self, playback: SessionPlayback) {
        debug!(
            "Session playback updated: {:?} at {}ms, actions 0x{:02x}",
            playback.status, playback.position_ms, playback.actions
        );
    }

    fn set_shuffle_mode(&mut self, enabled: bool) {
        info!("Session shuffle mode updated: {}", enabled);
    }
}

/// Notification stand-in that logs foreground transitions.
struct LoggingNotification;

impl NotificationSurface for LoggingNotification {
    fn show_playing(&mut self, metadata: &SessionMetadata) {
        info!(
            "Notification: playing {}",
            metadata.title.as_deref().unwrap_or("Unknown title")
        );
    }

    fn show_paused(&mut self, metadata: &SessionMetadata) {
        info!(
            "Notification: paused {}",
            metadata.title.as_deref().unwrap_or("Unknown title")
        );
    }

    fn remove(&mut self) {
        info!("Notification: removed");
    }
}

fn format_millis(millis: u64) -> String {
    let seconds = millis / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn print_track_list(view_model: &mut TrackViewModel) {
    match view_model.tracks() {
        TrackListState::Loading => println!("(loading)"),
        TrackListState::MissingPermissions => {
            println!("Cannot read the music library. Check folder permissions in config.toml.");
        }
        TrackListState::Success(tracks) => {
            if tracks.is_empty() {
                println!("No tracks found.");
            }
            for (index, track) in tracks.iter().enumerate() {
                match &track.artist {
                    Some(artist) => {
                        println!("{:4}  {} - {}", index, artist, track.display_title());
                    }
                    None => println!("{:4}  {}", index, track.display_title()),
                }
            }
        }
    }
}

fn print_status(view_model: &mut TrackViewModel) {
    match view_model.playback_state() {
        PlaybackState::Stopped => println!("stopped"),
        PlaybackState::Playing {
            is_paused,
            tracks,
            current_track_index,
            track_progress_millis,
            track_duration_millis,
        } => {
            let marker = if is_paused { "paused" } else { "playing" };
            let duration = match track_duration_millis {
                Some(duration) => format_millis(duration),
                None => "-:--".to_string(),
            };
            println!(
                "{} {} [{}/{}] ({} of {}){}",
                marker,
                tracks[current_track_index].display_title(),
                format_millis(track_progress_millis),
                duration,
                current_track_index + 1,
                tracks.len(),
                if view_model.shuffle_mode_enabled() {
                    " shuffle"
                } else {
                    ""
                },
            );
        }
    }
}

const HELP: &str = "commands:
  list                show the current track list
  search <text>       filter the track list (empty text clears)
  play [n]            resume, or start track n of the visible list
  pause               pause playback
  toggle              toggle play/pause
  next / prev         skip within the queue
  seek <seconds>      seek within the current track
  shuffle             toggle shuffle mode
  voice <text>        simulate an assistant play-from-search request
  browse              simulate a session browse request
  stop                stop playback and release the session
  rescan              re-query the library folders
  status              show the playback state
  quit                exit";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = config::config_root().join("config.toml");
    let config = config::load_config(&config_file);
    info!("Library folders: {:?}", config.library.folders);

    let index = Arc::new(FsTrackIndex::new(
        config.library.folders.iter().map(PathBuf::from).collect(),
    ));
    let track_index = TrackIndexAdapter::new(Arc::clone(&index) as Arc<dyn TrackIndex>);
    let player = Arc::new(Player::new(Box::new(ClockEngine::new())));
    let search_filter = SearchFilter::new();

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    let db = StateDb::open_default()?;
    let mut persistence_manager = PersistenceManager::new(
        bus_sender.subscribe(),
        db,
        Arc::clone(&player),
        track_index.clone(),
        search_filter.clone(),
        &config.persistence,
    );
    thread::spawn(move || {
        persistence_manager.run();
    });

    let mut session_manager = SessionManager::new(
        bus_sender.subscribe(),
        bus_sender.clone(),
        Arc::clone(&player),
        track_index.clone(),
        search_filter.clone(),
        Box::new(LoggingMediaSession),
        Box::new(LoggingNotification),
        config.playback.search_play,
    );
    thread::spawn(move || {
        session_manager.run();
    });

    let mut view_model = TrackViewModel::new(track_index, Arc::clone(&player), search_filter);

    println!("{HELP}");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to read input: {}", err);
                break;
            }
        };
        let trimmed = line.trim();
        let (command, argument) = match trimmed.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (trimmed, ""),
        };

        match command {
            "" => {}
            "help" => println!("{HELP}"),
            "list" | "ls" => print_track_list(&mut view_model),
            "search" => {
                view_model.on_search_query_changed(argument);
                print_track_list(&mut view_model);
            }
            "play" => {
                if argument.is_empty() {
                    let _ = bus_sender.send(Message::Transport(TransportCommand::Play));
                } else {
                    match argument.parse::<usize>() {
                        Ok(number) => match view_model.tracks() {
                            TrackListState::Success(tracks) if number < tracks.len() => {
                                view_model.on_track_selected(&tracks[number]);
                            }
                            TrackListState::Success(_) => println!("No track {number}."),
                            _ => println!("Track list not ready."),
                        },
                        Err(_) => println!("Usage: play [n]"),
                    }
                }
            }
            "pause" => {
                let _ = bus_sender.send(Message::Transport(TransportCommand::Pause));
            }
            "toggle" => view_model.on_play_pause_clicked(),
            "next" => {
                if view_model.is_next_enabled() {
                    view_model.on_next_clicked();
                } else {
                    println!("Already at the end of the queue.");
                }
            }
            "prev" => {
                if view_model.is_previous_enabled() {
                    view_model.on_previous_clicked();
                } else {
                    println!("Already at the start of the queue.");
                }
            }
            "seek" => match argument.parse::<u64>() {
                Ok(seconds) => view_model.on_seek(seconds * 1000),
                Err(_) => println!("Usage: seek <seconds>"),
            },
            "shuffle" => {
                let _ = bus_sender.send(Message::Transport(TransportCommand::Custom(
                    CustomAction::ToggleShuffle,
                )));
            }
            "voice" => {
                let _ = bus_sender.send(Message::Transport(TransportCommand::PlayFromSearch(
                    argument.to_string(),
                )));
            }
            "browse" => {
                let _ = bus_sender.send(Message::Transport(TransportCommand::Browse));
            }
            "stop" => {
                let _ = bus_sender.send(Message::Transport(TransportCommand::Stop));
            }
            "rescan" => index.notify_changed(),
            "status" => print_status(&mut view_model),
            "quit" | "exit" => break,
            other => println!("Unknown command: {other}. Type 'help' for commands."),
        }
    }

    info!("Application exiting");
    player.release();
    Ok(())
}
