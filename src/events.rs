use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Channel voice messages, i.e. everything carried on status bytes 0x80..=0xEF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMessage {
    NoteOff { key: u8, velocity: u8 },
    NoteOn { key: u8, velocity: u8 },
    KeyPressure { key: u8, pressure: u8 },
    ControlChange { controller: u8, value: u8 },
    PatchChange { program: u8 },
    ChannelPressure { pressure: u8 },
    PitchBend { value: u16 },
}

impl ChannelMessage {
    pub fn status_nibble(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { .. } => 0x80,
            ChannelMessage::NoteOn { .. } => 0x90,
            ChannelMessage::KeyPressure { .. } => 0xA0,
            ChannelMessage::ControlChange { .. } => 0xB0,
            ChannelMessage::PatchChange { .. } => 0xC0,
            ChannelMessage::ChannelPressure { .. } => 0xD0,
            ChannelMessage::PitchBend { .. } => 0xE0,
        }
    }

    /// Number of data bytes following a channel status byte.
    pub fn data_len(status: u8) -> usize {
        match status & 0xF0 {
            0xC0 | 0xD0 => 1,
            _ => 2,
        }
    }

    pub fn from_data(status: u8, d1: u8, d2: u8) -> Option<Self> {
        let (d1, d2) = (d1 & 0x7F, d2 & 0x7F);
        let message = match status & 0xF0 {
            0x80 => ChannelMessage::NoteOff { key: d1, velocity: d2 },
            0x90 => ChannelMessage::NoteOn { key: d1, velocity: d2 },
            0xA0 => ChannelMessage::KeyPressure { key: d1, pressure: d2 },
            0xB0 => ChannelMessage::ControlChange { controller: d1, value: d2 },
            0xC0 => ChannelMessage::PatchChange { program: d1 },
            0xD0 => ChannelMessage::ChannelPressure { pressure: d1 },
            0xE0 => ChannelMessage::PitchBend {
                value: (d2 as u16) << 7 | d1 as u16,
            },
            _ => return None,
        };
        Some(message)
    }

    pub fn write_data(&self, out: &mut Vec<u8>) {
        match *self {
            ChannelMessage::NoteOff { key, velocity } | ChannelMessage::NoteOn { key, velocity } => {
                out.extend_from_slice(&[key & 0x7F, velocity & 0x7F])
            }
            ChannelMessage::KeyPressure { key, pressure } => {
                out.extend_from_slice(&[key & 0x7F, pressure & 0x7F])
            }
            ChannelMessage::ControlChange { controller, value } => {
                out.extend_from_slice(&[controller & 0x7F, value & 0x7F])
            }
            ChannelMessage::PatchChange { program } => out.push(program & 0x7F),
            ChannelMessage::ChannelPressure { pressure } => out.push(pressure & 0x7F),
            ChannelMessage::PitchBend { value } => {
                out.extend_from_slice(&[(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8])
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
    ProgramName,
    DeviceName,
}

impl TextKind {
    pub fn code(self) -> u8 {
        match self {
            TextKind::Text => 0x01,
            TextKind::Copyright => 0x02,
            TextKind::TrackName => 0x03,
            TextKind::InstrumentName => 0x04,
            TextKind::Lyric => 0x05,
            TextKind::Marker => 0x06,
            TextKind::CuePoint => 0x07,
            TextKind::ProgramName => 0x08,
            TextKind::DeviceName => 0x09,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => TextKind::Text,
            0x02 => TextKind::Copyright,
            0x03 => TextKind::TrackName,
            0x04 => TextKind::InstrumentName,
            0x05 => TextKind::Lyric,
            0x06 => TextKind::Marker,
            0x07 => TextKind::CuePoint,
            0x08 => TextKind::ProgramName,
            0x09 => TextKind::DeviceName,
            _ => return None,
        })
    }
}

/// Meta events (status 0xFF). Anything this crate does not model is kept as
/// `Unknown` so it survives a load/write cycle byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetaEvent {
    SequenceNumber(Option<u16>),
    Text(TextKind, Vec<u8>),
    ChannelPrefix(u8),
    Port(u8),
    SetTempo(u32),
    SmpteOffset([u8; 5]),
    TimeSignature {
        numerator: u8,
        denominator_pow: u8,
        clocks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    },
    KeySignature {
        sharps: i8,
        minor: bool,
    },
    SequencerSpecific(Vec<u8>),
    Unknown {
        kind: u8,
        data: Vec<u8>,
    },
}

pub const META_END_OF_TRACK: u8 = 0x2F;

impl MetaEvent {
    pub fn text(kind: TextKind, text: impl Into<String>) -> Self {
        MetaEvent::Text(kind, text.into().into_bytes())
    }

    pub fn kind_byte(&self) -> u8 {
        match self {
            MetaEvent::SequenceNumber(_) => 0x00,
            MetaEvent::Text(kind, _) => kind.code(),
            MetaEvent::ChannelPrefix(_) => 0x20,
            MetaEvent::Port(_) => 0x21,
            MetaEvent::SetTempo(_) => 0x51,
            MetaEvent::SmpteOffset(_) => 0x54,
            MetaEvent::TimeSignature { .. } => 0x58,
            MetaEvent::KeySignature { .. } => 0x59,
            MetaEvent::SequencerSpecific(_) => 0x7F,
            MetaEvent::Unknown { kind, .. } => *kind,
        }
    }

    pub fn encode_data(&self) -> Vec<u8> {
        match self {
            MetaEvent::SequenceNumber(Some(n)) => n.to_be_bytes().to_vec(),
            MetaEvent::SequenceNumber(None) => Vec::new(),
            MetaEvent::Text(_, bytes) => bytes.clone(),
            MetaEvent::ChannelPrefix(c) => vec![*c],
            MetaEvent::Port(p) => vec![*p],
            MetaEvent::SetTempo(mpq) => mpq.to_be_bytes()[1..].to_vec(),
            MetaEvent::SmpteOffset(raw) => raw.to_vec(),
            MetaEvent::TimeSignature {
                numerator,
                denominator_pow,
                clocks_per_click,
                thirty_seconds_per_quarter,
            } => vec![
                *numerator,
                *denominator_pow,
                *clocks_per_click,
                *thirty_seconds_per_quarter,
            ],
            MetaEvent::KeySignature { sharps, minor } => vec![*sharps as u8, *minor as u8],
            MetaEvent::SequencerSpecific(data) => data.clone(),
            MetaEvent::Unknown { data, .. } => data.clone(),
        }
    }

    /// Builds a meta event from its type byte and payload. Known types with an
    /// unexpected payload length fall back to `Unknown`.
    pub fn decode(kind: u8, data: &[u8]) -> Self {
        let unknown = || MetaEvent::Unknown {
            kind,
            data: data.to_vec(),
        };
        if let Some(text_kind) = TextKind::from_code(kind) {
            return MetaEvent::Text(text_kind, data.to_vec());
        }
        match (kind, data.len()) {
            (0x00, 0) => MetaEvent::SequenceNumber(None),
            (0x00, 2) => MetaEvent::SequenceNumber(Some(u16::from_be_bytes([data[0], data[1]]))),
            (0x20, 1) => MetaEvent::ChannelPrefix(data[0]),
            (0x21, 1) => MetaEvent::Port(data[0]),
            (0x51, 3) => {
                MetaEvent::SetTempo(u32::from_be_bytes([0, data[0], data[1], data[2]]))
            }
            (0x54, 5) => MetaEvent::SmpteOffset([data[0], data[1], data[2], data[3], data[4]]),
            (0x58, 4) => MetaEvent::TimeSignature {
                numerator: data[0],
                denominator_pow: data[1],
                clocks_per_click: data[2],
                thirty_seconds_per_quarter: data[3],
            },
            (0x59, 2) if data[1] <= 1 => MetaEvent::KeySignature {
                sharps: data[0] as i8,
                minor: data[1] == 1,
            },
            (0x7F, _) => MetaEvent::SequencerSpecific(data.to_vec()),
            _ => unknown(),
        }
    }

    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            MetaEvent::Text(_, bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Midi {
        channel: u8,
        message: ChannelMessage,
    },
    /// `channel` is the channel this meta event relates to (from a preceding
    /// Channel Prefix meta event or from a rewritten channel event). It is not
    /// written to files.
    Meta {
        channel: Option<u8>,
        meta: MetaEvent,
    },
    SysEx(Vec<u8>),
    Escape(Vec<u8>),
}

impl EventKind {
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        Self::midi(channel, ChannelMessage::NoteOn { key, velocity })
    }

    pub fn note_off(channel: u8, key: u8, velocity: u8) -> Self {
        Self::midi(channel, ChannelMessage::NoteOff { key, velocity })
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::midi(channel, ChannelMessage::ControlChange { controller, value })
    }

    pub fn patch_change(channel: u8, program: u8) -> Self {
        Self::midi(channel, ChannelMessage::PatchChange { program })
    }

    pub fn meta(meta: MetaEvent) -> Self {
        EventKind::Meta {
            channel: None,
            meta,
        }
    }

    fn midi(channel: u8, message: ChannelMessage) -> Self {
        EventKind::Midi {
            channel: channel & 0x0F,
            message,
        }
    }

    /// Ordering among events sharing a tick: meta first, notes last, note-offs
    /// before note-ons so a re-struck key is released before it sounds again.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::Meta { .. } => 0,
            EventKind::SysEx(_) | EventKind::Escape(_) => 1,
            EventKind::Midi { message, .. } => match message {
                ChannelMessage::PatchChange { .. } => 2,
                ChannelMessage::ControlChange { .. } => 3,
                ChannelMessage::KeyPressure { .. }
                | ChannelMessage::ChannelPressure { .. }
                | ChannelMessage::PitchBend { .. } => 4,
                ChannelMessage::NoteOff { .. } => 5,
                ChannelMessage::NoteOn { velocity: 0, .. } => 5,
                ChannelMessage::NoteOn { .. } => 6,
            },
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match self {
            EventKind::Midi { channel, .. } => Some(*channel),
            EventKind::Meta { channel, .. } => *channel,
            _ => None,
        }
    }

    /// A sounding note-on (velocity above zero).
    pub fn is_note_on(&self) -> bool {
        matches!(
            self,
            EventKind::Midi {
                message: ChannelMessage::NoteOn { velocity: 1..=u8::MAX, .. },
                ..
            }
        )
    }

    /// A note-off, including the note-on-with-zero-velocity form.
    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            EventKind::Midi {
                message: ChannelMessage::NoteOff { .. } | ChannelMessage::NoteOn { velocity: 0, .. },
                ..
            }
        )
    }

    pub fn note_key(&self) -> Option<(u8, u8)> {
        match self {
            EventKind::Midi {
                channel,
                message:
                    ChannelMessage::NoteOn { key, .. } | ChannelMessage::NoteOff { key, .. },
            } => Some((*channel, *key)),
            _ => None,
        }
    }

    pub fn tempo(&self) -> Option<u32> {
        match self {
            EventKind::Meta {
                meta: MetaEvent::SetTempo(mpq),
                ..
            } => Some(*mpq),
            _ => None,
        }
    }

    /// Decodes one complete message as received from a live MIDI port.
    /// System real-time and common messages are not modelled and yield `None`.
    pub fn from_midi_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        match status {
            0x80..=0xEF => {
                if data.len() < ChannelMessage::data_len(status) {
                    return None;
                }
                let d2 = data.get(1).copied().unwrap_or(0);
                let message = ChannelMessage::from_data(status, data[0], d2)?;
                Some(EventKind::Midi {
                    channel: status & 0x0F,
                    message,
                })
            }
            0xF0 => Some(EventKind::SysEx(data.to_vec())),
            _ => None,
        }
    }

    /// Encodes the event for a live MIDI port. Meta events have no wire form.
    pub fn to_midi_bytes(&self) -> Option<Vec<u8>> {
        match self {
            EventKind::Midi { channel, message } => {
                let mut out = vec![message.status_nibble() | (channel & 0x0F)];
                message.write_data(&mut out);
                Some(out)
            }
            EventKind::SysEx(data) => {
                let mut out = Vec::with_capacity(data.len() + 1);
                out.push(0xF0);
                out.extend_from_slice(data);
                Some(out)
            }
            EventKind::Escape(data) => Some(data.clone()),
            EventKind::Meta { .. } => None,
        }
    }
}

/// Length of a note. Tick lengths are resolved against the live tempo before
/// the event reaches the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Ticks(u64),
    Time(Duration),
}

/// One timestamped event. Once handed to the scheduler an event is never
/// mutated; transforms build new events instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Absolute position in ticks since the start of the sequence.
    pub tick: u64,
    pub track: usize,
    /// Requested offset from submission time. Never persisted.
    pub delay: Duration,
    /// `None` means "open until an explicit note-off".
    pub duration: Option<Length>,
    pub tag: Option<u64>,
    /// Derived by `Sequence::finalize`.
    pub time_ms: f64,
    pub measure: u32,
    pub beat: u32,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            tick: 0,
            track: 0,
            delay: Duration::ZERO,
            duration: None,
            tag: None,
            time_ms: 0.0,
            measure: 0,
            beat: 0,
        }
    }

    pub fn at(tick: u64, kind: EventKind) -> Self {
        Self {
            tick,
            ..Self::new(kind)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_duration(mut self, duration: Length) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn on_track(mut self, track: usize) -> Self {
        self.track = track;
        self
    }

    pub fn channel(&self) -> Option<u8> {
        self.kind.channel()
    }

    /// Note number, controller number, program or tempo depending on the kind.
    pub fn value(&self) -> u32 {
        match &self.kind {
            EventKind::Midi { message, .. } => match *message {
                ChannelMessage::NoteOff { key, .. }
                | ChannelMessage::NoteOn { key, .. }
                | ChannelMessage::KeyPressure { key, .. } => key as u32,
                ChannelMessage::ControlChange { controller, .. } => controller as u32,
                ChannelMessage::PatchChange { program } => program as u32,
                ChannelMessage::ChannelPressure { pressure } => pressure as u32,
                ChannelMessage::PitchBend { value } => value as u32,
            },
            EventKind::Meta {
                meta: MetaEvent::SetTempo(mpq),
                ..
            } => *mpq,
            _ => 0,
        }
    }

    pub fn velocity(&self) -> u8 {
        match &self.kind {
            EventKind::Midi { message, .. } => match *message {
                ChannelMessage::NoteOff { velocity, .. } | ChannelMessage::NoteOn { velocity, .. } => {
                    velocity
                }
                ChannelMessage::KeyPressure { pressure, .. } => pressure,
                ChannelMessage::ControlChange { value, .. } => value,
                _ => 0,
            },
            _ => 0,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[track {} tick {:>6} {:>9.1}ms {}:{}] ",
            self.track, self.tick, self.time_ms, self.measure, self.beat
        )?;
        match &self.kind {
            EventKind::Midi { channel, message } => write!(f, "ch={channel} {message:?}"),
            EventKind::Meta {
                meta: MetaEvent::Text(kind, _),
                ..
            } => write!(
                f,
                "{kind:?} '{}'",
                self.kind_text().unwrap_or_default()
            ),
            EventKind::Meta { meta, .. } => write!(f, "{meta:?}"),
            EventKind::SysEx(data) => write!(f, "SysEx {} bytes", data.len()),
            EventKind::Escape(data) => write!(f, "Escape {} bytes", data.len()),
        }
    }
}

impl Event {
    fn kind_text(&self) -> Option<Cow<'_, str>> {
        match &self.kind {
            EventKind::Meta { meta, .. } => meta.as_text(),
            _ => None,
        }
    }
}
