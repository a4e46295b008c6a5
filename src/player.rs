//! Real-time playback of a [`Sequence`] through an [`Injector`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::Result;
use crate::engine::Injector;
use crate::events::{Event, EventKind, Length};
use crate::timing::{LiveTempo, Sequence, TempoMap};

const ALL_NOTES_OFF: u8 = 123;
const ALL_CHANNELS: u32 = 0xFFFF;

/// Player tags live in the upper half of the tag space, one per player.
static NEXT_PLAYER_TAG: AtomicU64 = AtomicU64::new(1 << 63);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Resume,
    Stop,
    Seek(u64),
    SetChannel { channel: u8, enabled: bool },
    SetAllChannels(bool),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    Playing { tick: u64 },
    Paused { tick: u64 },
    Stopped,
    Seeked { tick: u64 },
    ChannelEnabled { channel: u8, enabled: bool },
    Finished { tick: u64 },
}

pub struct PlayerHandle {
    pub command_tx: Sender<PlayerCommand>,
    pub update_rx: Receiver<PlayerUpdate>,
    position: Arc<AtomicU64>,
    channels: Arc<AtomicU32>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn send(&self, command: PlayerCommand) {
        if self.command_tx.send(command).is_err() {
            warn!(?command, "player thread is gone");
        }
    }

    /// Playback position in ticks.
    pub fn current_tick(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn channel_enabled(&self, channel: u8) -> bool {
        self.channels.load(Ordering::Relaxed) & (1 << (channel & 0x0F)) != 0
    }

    pub fn join(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        let _ = self.command_tx.send(PlayerCommand::Quit);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("player thread panicked");
            }
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

pub fn spawn(
    mut sequence: Sequence,
    injector: Injector,
    tempo: Arc<LiveTempo>,
    max_wait: Duration,
) -> Result<PlayerHandle> {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let position = Arc::new(AtomicU64::new(0));
    let channels = Arc::new(AtomicU32::new(ALL_CHANNELS));

    if !sequence.is_finalized() {
        sequence.finalize();
    }
    let state = PlayerState {
        events: playable_events(&sequence),
        tag: NEXT_PLAYER_TAG.fetch_add(1, Ordering::Relaxed),
        tempo_map: sequence.tempo_map(),
        end_tick: sequence.tracks().iter().map(|t| t.last_tick()).max().unwrap_or(0),
        cursor: 0,
        tick: 0.0,
        playing: false,
        last_advance: Instant::now(),
        injector,
        tempo,
        position: position.clone(),
        channels: channels.clone(),
        update_tx,
    };
    state.tempo.set_ticks_per_quarter(sequence.ticks_per_quarter());
    state
        .tempo
        .set_micros_per_quarter(state.tempo_map.micros_per_quarter_at(0));

    let thread = std::thread::Builder::new()
        .name("tempora-player".into())
        .spawn(move || player_thread(state, command_rx, max_wait))?;

    Ok(PlayerHandle {
        command_tx,
        update_rx,
        position,
        channels,
        thread: Some(thread),
    })
}

/// Merged events with the note-offs already covered by a note-on's tick
/// length removed: those notes are released by the scheduler, so an
/// arpeggio built on them is released too.
fn playable_events(sequence: &Sequence) -> Vec<Event> {
    let mut timed: HashMap<(usize, u8, u8), VecDeque<u64>> = HashMap::new();
    let mut events = Vec::new();
    for event in sequence.merged() {
        if let Some((channel, key)) = event.kind.note_key() {
            let open = timed.entry((event.track, channel, key)).or_default();
            while open.front().is_some_and(|&end| end < event.tick) {
                open.pop_front();
            }
            if event.kind.is_note_on() {
                if let Some(Length::Ticks(length)) = event.duration {
                    open.push_back(event.tick + length);
                }
            } else if open.front() == Some(&event.tick) {
                open.pop_front();
                continue;
            }
        }
        events.push(event.clone());
    }
    events
}

struct PlayerState {
    events: Vec<Event>,
    /// Carried by everything this player injects, so a pause can withdraw
    /// what is still queued.
    tag: u64,
    tempo_map: TempoMap,
    end_tick: u64,
    cursor: usize,
    /// Fractional so slow tempos still advance between wake-ups.
    tick: f64,
    playing: bool,
    last_advance: Instant,
    injector: Injector,
    tempo: Arc<LiveTempo>,
    position: Arc<AtomicU64>,
    channels: Arc<AtomicU32>,
    update_tx: Sender<PlayerUpdate>,
}

fn player_thread(mut state: PlayerState, command_rx: Receiver<PlayerCommand>, max_wait: Duration) {
    loop {
        let command = if state.playing {
            match command_rx.recv_timeout(state.wait_time(max_wait)) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match command_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(PlayerCommand::Quit) => break,
            Some(command) => state.handle(command),
            None => {}
        }
        if state.playing {
            state.advance();
        }
    }
    state.silence();
    debug!("player thread exiting");
}

impl PlayerState {
    fn notify(&self, update: PlayerUpdate) {
        let _ = self.update_tx.send(update);
    }

    fn current_tick(&self) -> u64 {
        self.tick as u64
    }

    fn wait_time(&self, max_wait: Duration) -> Duration {
        let target = self.events.get(self.cursor).map_or(self.end_tick, |e| e.tick);
        let ticks = (target as f64 - self.tick).max(0.0);
        Duration::from_secs_f64(ticks * self.tempo.ms_per_tick() / 1000.0).min(max_wait)
    }

    fn handle(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Play => {
                if self.cursor >= self.events.len() {
                    self.seek(0);
                }
                self.start();
            }
            PlayerCommand::Resume => {
                if !self.playing {
                    self.start();
                }
            }
            PlayerCommand::Pause => {
                if self.playing {
                    self.playing = false;
                    self.silence();
                    info!(tick = self.current_tick(), "paused");
                    self.notify(PlayerUpdate::Paused {
                        tick: self.current_tick(),
                    });
                }
            }
            PlayerCommand::Stop => {
                self.playing = false;
                self.silence();
                self.seek(0);
                info!("stopped");
                self.notify(PlayerUpdate::Stopped);
            }
            PlayerCommand::Seek(tick) => {
                self.silence();
                self.seek(tick);
                self.notify(PlayerUpdate::Seeked {
                    tick: self.current_tick(),
                });
            }
            PlayerCommand::SetChannel { channel, enabled } => {
                let bit = 1 << (channel & 0x0F);
                if enabled {
                    self.channels.fetch_or(bit, Ordering::Relaxed);
                } else {
                    self.channels.fetch_and(!bit, Ordering::Relaxed);
                    self.all_notes_off(bit);
                }
                self.notify(PlayerUpdate::ChannelEnabled {
                    channel: channel & 0x0F,
                    enabled,
                });
            }
            PlayerCommand::SetAllChannels(enabled) => {
                let mask = if enabled { ALL_CHANNELS } else { 0 };
                self.channels.store(mask, Ordering::Relaxed);
                if !enabled {
                    self.all_notes_off(ALL_CHANNELS);
                }
                for channel in 0..16 {
                    self.notify(PlayerUpdate::ChannelEnabled { channel, enabled });
                }
            }
            PlayerCommand::Quit => {}
        }
    }

    fn start(&mut self) {
        self.playing = true;
        self.last_advance = Instant::now();
        info!(tick = self.current_tick(), "playing");
        self.notify(PlayerUpdate::Playing {
            tick: self.current_tick(),
        });
    }

    fn seek(&mut self, tick: u64) {
        let tick = tick.min(self.end_tick);
        self.cursor = self.events.partition_point(|e| e.tick < tick);
        self.tick = tick as f64;
        self.last_advance = Instant::now();
        self.tempo
            .set_micros_per_quarter(self.tempo_map.micros_per_quarter_at(tick));
        self.position.store(tick, Ordering::Relaxed);
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_advance).as_secs_f64() * 1000.0;
        self.last_advance = now;
        self.tick += elapsed_ms / self.tempo.ms_per_tick();

        let enabled = self.channels.load(Ordering::Relaxed);
        while let Some(event) = self.events.get(self.cursor) {
            if event.tick as f64 > self.tick {
                break;
            }
            self.cursor += 1;
            if let Some(mpq) = event.kind.tempo() {
                self.tempo.set_micros_per_quarter(mpq);
            }
            let muted = matches!(event.kind, EventKind::Midi { channel, .. } if enabled & (1 << channel) == 0);
            if muted && event.kind.is_note_on() {
                continue;
            }
            let mut event = event.clone();
            event.tag = Some(self.tag);
            self.injector.send(event);
        }
        self.position.store(self.current_tick(), Ordering::Relaxed);

        if self.cursor >= self.events.len() && self.tick >= self.end_tick as f64 {
            self.playing = false;
            self.tick = self.end_tick as f64;
            self.position.store(self.end_tick, Ordering::Relaxed);
            info!(tick = self.end_tick, "finished");
            self.notify(PlayerUpdate::Finished {
                tick: self.end_tick,
            });
        }
    }

    /// Withdraws everything still queued for this player, then releases
    /// whatever sounds.
    fn silence(&self) {
        let cancelled = self.injector.scheduler().cancel_tagged(self.tag);
        if cancelled > 0 {
            debug!(cancelled, "withdrew queued events");
        }
        self.all_notes_off(ALL_CHANNELS);
    }

    /// Control change 123 on every channel in `mask`, straight to the
    /// scheduler.
    fn all_notes_off(&self, mask: u32) {
        for channel in (0..16u8).filter(|c| mask & (1 << c) != 0) {
            self.injector
                .scheduler()
                .submit(Event::new(EventKind::control_change(channel, ALL_NOTES_OFF, 0)), Duration::ZERO);
        }
    }
}
