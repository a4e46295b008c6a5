//! MIDI event sequencing: a tempo-aware event model, a real-time scheduler,
//! a per-event transform pipeline, a multi-track store and a Standard MIDI
//! File codec.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod input;
pub mod player;
pub mod sink;
pub mod smf;
pub mod timing;
pub mod transform;

pub use config::{Config, SharedSettings, TransformSettings};
pub use engine::{Engine, Injector};
pub use error::{Error, Result};
pub use events::{ChannelMessage, Event, EventKind, Length, MetaEvent, TextKind};
pub use player::{PlayerCommand, PlayerHandle, PlayerUpdate};
pub use sink::{ChannelSink, PlaybackSink, SinkError};
pub use timing::{EventHandle, LiveTempo, Scheduler, Sequence, TempoMap};
