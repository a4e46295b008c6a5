use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::{MeterMap, TempoMap, bpm_to_micros};
use crate::events::{Event, EventKind, Length, MetaEvent, TextKind};
use crate::{Error, Result, smf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    SingleTrack,
    MultiTrack,
    MultiSequence,
}

impl Format {
    pub fn code(self) -> u16 {
        match self {
            Format::SingleTrack => 0,
            Format::MultiTrack => 1,
            Format::MultiSequence => 2,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Format::SingleTrack),
            1 => Some(Format::MultiTrack),
            2 => Some(Format::MultiSequence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub events: Vec<Event>,
    /// Tick of the end-of-track marker as loaded. The marker itself is not an
    /// event; it is written after the last event, never before it.
    pub end_tick: u64,
}

impl Track {
    pub fn last_tick(&self) -> u64 {
        self.events
            .iter()
            .map(|e| e.tick)
            .max()
            .unwrap_or(0)
            .max(self.end_tick)
    }
}

fn order_key(event: &Event) -> (u64, u8) {
    (event.tick, event.kind.priority())
}

/// Ordered multi-track event store with a fixed time base.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    format: Format,
    ticks_per_quarter: u16,
    tracks: Vec<Track>,
    finalized: bool,
}

impl Sequence {
    pub fn new(ticks_per_quarter: u16) -> Result<Self> {
        if ticks_per_quarter == 0 || ticks_per_quarter > 0x7FFF {
            return Err(Error::InvalidTimeBase(ticks_per_quarter));
        }
        Ok(Self {
            format: Format::MultiTrack,
            ticks_per_quarter,
            tracks: Vec::new(),
            finalized: true,
        })
    }

    pub(crate) fn from_parts(format: Format, ticks_per_quarter: u16, tracks: Vec<Track>) -> Self {
        Self {
            format,
            ticks_per_quarter,
            tracks,
            finalized: false,
        }
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        let decoded = smf::decode(bytes)?;
        for skipped in &decoded.skipped {
            warn!("skipped while loading: {skipped}");
        }
        Ok(decoded.sequence)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::load(&bytes)
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        smf::encode(self, &smf::WriteOptions::default())
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        fs::write(path, self.write()?)?;
        Ok(())
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn track_mut(&mut self, index: usize) -> &mut Track {
        if index >= self.tracks.len() {
            self.tracks.resize_with(index + 1, Track::default);
        }
        if self.tracks.len() > 1 && self.format == Format::SingleTrack {
            self.format = Format::MultiTrack;
        }
        &mut self.tracks[index]
    }

    /// Appends without touching existing events; `finalize` restores order.
    pub fn add_event(&mut self, track: usize, tick: u64, kind: EventKind) -> &mut Event {
        self.push(Event::at(tick, kind).on_track(track))
    }

    pub fn push(&mut self, event: Event) -> &mut Event {
        self.finalized = false;
        let events = &mut self.track_mut(event.track).events;
        events.push(event);
        let last = events.len() - 1;
        &mut events[last]
    }

    /// A note-on and its note-off `length` ticks later. A zero velocity adds
    /// only the note-on, which already means "release".
    pub fn add_note(&mut self, track: usize, tick: u64, channel: u8, key: u8, velocity: u8, length: u64) {
        let on = self.add_event(track, tick, EventKind::note_on(channel, key, velocity));
        if velocity == 0 {
            return;
        }
        on.duration = Some(Length::Ticks(length));
        self.add_event(track, tick + length, EventKind::note_off(channel, key, 0));
    }

    pub fn add_patch_change(&mut self, track: usize, tick: u64, channel: u8, program: u8) {
        self.add_event(track, tick, EventKind::patch_change(channel, program));
    }

    pub fn add_control_change(&mut self, track: usize, tick: u64, channel: u8, controller: u8, value: u8) {
        self.add_event(track, tick, EventKind::control_change(channel, controller, value));
    }

    pub fn add_tempo(&mut self, track: usize, tick: u64, bpm: f64) {
        self.add_event(track, tick, EventKind::meta(MetaEvent::SetTempo(bpm_to_micros(bpm))));
    }

    pub fn add_time_signature(&mut self, track: usize, tick: u64, numerator: u8, denominator: u8) {
        let denominator_pow = denominator.max(1).trailing_zeros() as u8;
        self.add_event(
            track,
            tick,
            EventKind::meta(MetaEvent::TimeSignature {
                numerator,
                denominator_pow,
                clocks_per_click: 24,
                thirty_seconds_per_quarter: 8,
            }),
        );
    }

    pub fn add_text(&mut self, track: usize, tick: u64, kind: TextKind, text: &str) {
        self.add_event(track, tick, EventKind::meta(MetaEvent::text(kind, text)));
    }

    /// Stable sort of every track by tick and kind priority, then recomputes
    /// the derived fields. Running it twice changes nothing.
    pub fn finalize(&mut self) {
        for track in &mut self.tracks {
            track.events.sort_by_key(order_key);
        }

        let (tempo, meter) = {
            let merged = self.merged();
            (
                TempoMap::from_events(self.ticks_per_quarter, merged.iter().copied()),
                MeterMap::from_events(self.ticks_per_quarter, merged.iter().copied()),
            )
        };

        for (index, track) in self.tracks.iter_mut().enumerate() {
            let mut open: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();
            for i in 0..track.events.len() {
                let event = &mut track.events[i];
                event.track = index;
                event.time_ms = tempo.tick_to_ms(event.tick);
                (event.measure, event.beat) = meter.position(event.tick);

                let Some(note) = event.kind.note_key() else {
                    continue;
                };
                if event.kind.is_note_on() {
                    open.entry(note).or_default().push_back(i);
                } else if let Some(on) = open.get_mut(&note).and_then(|q| q.pop_front()) {
                    let off_tick = event.tick;
                    let on_event = &mut track.events[on];
                    if !matches!(on_event.duration, Some(Length::Time(_))) {
                        on_event.duration = Some(Length::Ticks(off_tick - on_event.tick));
                    }
                }
            }
        }
        self.finalized = true;
    }

    /// Every event across all tracks in tick/priority order. Ties keep track
    /// order, then insertion order.
    pub fn merged(&self) -> Vec<&Event> {
        let mut all: Vec<&Event> = self.tracks.iter().flat_map(|t| t.events.iter()).collect();
        all.sort_by_key(|e| order_key(e));
        all
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.merged().last().copied()
    }

    pub fn tempo_map(&self) -> TempoMap {
        TempoMap::from_events(self.ticks_per_quarter, self.merged())
    }

    pub fn duration_ms(&self) -> f64 {
        let last = self.tracks.iter().map(Track::last_tick).max().unwrap_or(0);
        self.tempo_map().tick_to_ms(last)
    }

    pub fn log_events(&self) {
        info!(
            format = ?self.format,
            ticks_per_quarter = self.ticks_per_quarter,
            tracks = self.tracks.len(),
            "sequence"
        );
        for event in self.merged() {
            info!("{event}");
        }
    }
}
