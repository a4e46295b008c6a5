mod meter;
mod scheduler;
mod sequence;
mod tempo_map;

pub use meter::MeterMap;
pub use scheduler::{CancelOutcome, EventHandle, Scheduler, SchedulerHandle, SchedulerStats};
pub use sequence::{Format, Sequence, Track};
pub use tempo_map::{
    DEFAULT_MICROS_PER_QUARTER, DEFAULT_TICKS_PER_QUARTER, LiveTempo, TempoMap, bpm_to_micros,
    micros_to_bpm,
};
