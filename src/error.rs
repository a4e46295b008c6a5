use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tempo change at tick {tick} precedes the last tempo change at tick {last_tick}")]
    OutOfOrderTempoChange { tick: u64, last_tick: u64 },

    #[error("invalid tempo: {0} microseconds per quarter note")]
    InvalidTempo(u32),

    #[error("invalid time base: {0} ticks per quarter note")]
    InvalidTimeBase(u16),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("truncated data while reading {context}")]
    TruncatedData { context: &'static str },

    #[error("track {track}: gap of {delta} ticks does not fit a delta time")]
    DeltaTooLarge { track: usize, delta: u64 },

    #[error("unsupported event type 0x{status:02X} at byte {offset}")]
    UnsupportedEventType { status: u8, offset: usize },

    #[error("playback sink failed: {0}")]
    SchedulerSinkFailure(String),

    #[error("transform recursion limit of {limit} exceeded")]
    RecursionLimitExceeded { limit: usize },

    #[error("MIDI device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),

    #[error("failed to write config: {0}")]
    ConfigWrite(#[from] ron::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
