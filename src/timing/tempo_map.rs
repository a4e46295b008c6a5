use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::events::Event;
use crate::{Error, Result};

/// 120 BPM, the SMF default before any tempo event.
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;
pub const DEFAULT_TICKS_PER_QUARTER: u16 = 480;

pub fn bpm_to_micros(bpm: f64) -> u32 {
    (60_000_000.0 / bpm.max(1.0)).round() as u32
}

pub fn micros_to_bpm(micros_per_quarter: u32) -> f64 {
    60_000_000.0 / micros_per_quarter.max(1) as f64
}

fn ms_per_tick(micros_per_quarter: u32, ticks_per_quarter: u16) -> f64 {
    micros_per_quarter as f64 / ticks_per_quarter.max(1) as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    tick: u64,
    micros_per_quarter: u32,
    /// Accumulated time at `tick`, so conversions never sum per-tick steps.
    start_ms: f64,
}

/// Piecewise-linear tick <-> millisecond conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    segments: Vec<Segment>,
}

impl TempoMap {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            segments: vec![Segment {
                tick: 0,
                micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
                start_ms: 0.0,
            }],
        }
    }

    /// Builds a map from tempo events already sorted by tick. Events that
    /// cannot be applied are logged and skipped.
    pub fn from_events<'a>(
        ticks_per_quarter: u16,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Self {
        let mut map = Self::new(ticks_per_quarter);
        for event in events {
            if let Some(mpq) = event.kind.tempo() {
                if let Err(e) = map.set_tempo(event.tick, mpq) {
                    warn!(tick = event.tick, "ignoring tempo event: {e}");
                }
            }
        }
        map
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn set_tempo(&mut self, tick: u64, micros_per_quarter: u32) -> Result<()> {
        if micros_per_quarter == 0 {
            return Err(Error::InvalidTempo(micros_per_quarter));
        }
        let tpq = self.ticks_per_quarter;
        let last = self
            .segments
            .last_mut()
            .ok_or(Error::InvalidTempo(micros_per_quarter))?;
        if tick < last.tick {
            return Err(Error::OutOfOrderTempoChange {
                tick,
                last_tick: last.tick,
            });
        }
        if tick == last.tick {
            last.micros_per_quarter = micros_per_quarter;
            return Ok(());
        }
        let start_ms = last.start_ms + (tick - last.tick) as f64 * ms_per_tick(last.micros_per_quarter, tpq);
        self.segments.push(Segment {
            tick,
            micros_per_quarter,
            start_ms,
        });
        Ok(())
    }

    fn segment_at_tick(&self, tick: u64) -> &Segment {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        &self.segments[idx.saturating_sub(1)]
    }

    fn segment_at_ms(&self, ms: f64) -> &Segment {
        let idx = self.segments.partition_point(|s| s.start_ms <= ms);
        &self.segments[idx.saturating_sub(1)]
    }

    /// Ticks past the last tempo change extrapolate with the last tempo.
    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        let seg = self.segment_at_tick(tick);
        seg.start_ms + (tick - seg.tick) as f64 * ms_per_tick(seg.micros_per_quarter, self.ticks_per_quarter)
    }

    pub fn ms_to_tick(&self, ms: f64) -> u64 {
        if ms <= 0.0 {
            return 0;
        }
        let seg = self.segment_at_ms(ms);
        let ticks = (ms - seg.start_ms) / ms_per_tick(seg.micros_per_quarter, self.ticks_per_quarter);
        seg.tick + ticks.round() as u64
    }

    pub fn micros_per_quarter_at(&self, tick: u64) -> u32 {
        self.segment_at_tick(tick).micros_per_quarter
    }

    pub fn bpm_at(&self, tick: u64) -> f64 {
        micros_to_bpm(self.micros_per_quarter_at(tick))
    }

    pub fn ms_per_tick_at(&self, tick: u64) -> f64 {
        ms_per_tick(self.micros_per_quarter_at(tick), self.ticks_per_quarter)
    }

    /// `(tick, microseconds per quarter)` pairs, starting with the default at tick 0.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.segments.iter().map(|s| (s.tick, s.micros_per_quarter))
    }
}

/// The tempo a performance is currently running at. Shared between the
/// player, the transform stages and the application; any thread may read or
/// replace it.
#[derive(Debug)]
pub struct LiveTempo {
    ticks_per_quarter: AtomicU32,
    micros_per_quarter: AtomicU32,
}

impl Default for LiveTempo {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_QUARTER)
    }
}

impl LiveTempo {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter: AtomicU32::new(ticks_per_quarter.max(1) as u32),
            micros_per_quarter: AtomicU32::new(DEFAULT_MICROS_PER_QUARTER),
        }
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter.load(Ordering::Relaxed) as u16
    }

    pub fn set_ticks_per_quarter(&self, ticks_per_quarter: u16) {
        self.ticks_per_quarter
            .store(ticks_per_quarter.max(1) as u32, Ordering::Relaxed);
    }

    pub fn micros_per_quarter(&self) -> u32 {
        self.micros_per_quarter.load(Ordering::Relaxed)
    }

    pub fn set_micros_per_quarter(&self, micros_per_quarter: u32) {
        if micros_per_quarter > 0 {
            self.micros_per_quarter
                .store(micros_per_quarter, Ordering::Relaxed);
        }
    }

    pub fn bpm(&self) -> f64 {
        micros_to_bpm(self.micros_per_quarter())
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.set_micros_per_quarter(bpm_to_micros(bpm));
    }

    pub fn ms_per_tick(&self) -> f64 {
        ms_per_tick(self.micros_per_quarter(), self.ticks_per_quarter())
    }

    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_secs_f64(ticks as f64 * self.ms_per_tick() / 1000.0)
    }

    /// Length of a sixteenth note at the current tempo.
    pub fn sixteenth(&self) -> Duration {
        self.ticks_to_duration(self.ticks_per_quarter() as u64 / 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tempo_is_120_bpm() {
        let map = TempoMap::new(480);
        assert_eq!(map.bpm_at(0), 120.0);
        // 480 ticks = one quarter = 500ms at 120 BPM
        assert!((map.tick_to_ms(480) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn conversion_accumulates_across_segments() {
        let mut map = TempoMap::new(480);
        map.set_tempo(960, 1_000_000).unwrap(); // 60 BPM from the third beat
        assert!((map.tick_to_ms(960) - 1000.0).abs() < 1e-9);
        assert!((map.tick_to_ms(1440) - 2000.0).abs() < 1e-9);
        assert_eq!(map.ms_to_tick(2000.0), 1440);
        assert_eq!(map.ms_to_tick(500.0), 480);
    }

    #[test]
    fn rejects_out_of_order_changes() {
        let mut map = TempoMap::new(96);
        map.set_tempo(200, 400_000).unwrap();
        let err = map.set_tempo(100, 600_000).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrderTempoChange {
                tick: 100,
                last_tick: 200
            }
        ));
        assert!(matches!(map.set_tempo(300, 0), Err(Error::InvalidTempo(0))));
    }

    #[test]
    fn same_tick_change_replaces_the_tempo() {
        let mut map = TempoMap::new(96);
        map.set_tempo(0, 400_000).unwrap();
        map.set_tempo(0, 600_000).unwrap();
        assert_eq!(map.entries().collect::<Vec<_>>(), vec![(0, 600_000)]);
    }

    #[test]
    fn ms_to_tick_inverts_tick_to_ms() {
        let mut map = TempoMap::new(500);
        map.set_tempo(0, 650_000).unwrap();
        map.set_tempo(1_234, 333_333).unwrap();
        map.set_tempo(5_000, 1_250_000).unwrap();
        map.set_tempo(5_001, 250_000).unwrap();
        for tick in (0..12_000).step_by(7) {
            let back = map.ms_to_tick(map.tick_to_ms(tick));
            assert!(back.abs_diff(tick) <= 1, "tick {tick} came back as {back}");
        }
    }

    #[test]
    fn extrapolates_past_last_change() {
        let mut map = TempoMap::new(100);
        map.set_tempo(100, 250_000).unwrap();
        let at_change = map.tick_to_ms(100);
        assert!((map.tick_to_ms(1100) - at_change - 2500.0).abs() < 1e-6);
    }

    #[test]
    fn live_tempo_sixteenth() {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let tempo = LiveTempo::new(480);
        assert!((ms(tempo.sixteenth()) - 125.0).abs() < 1e-3);
        tempo.set_bpm(60.0);
        assert!((ms(tempo.sixteenth()) - 250.0).abs() < 1e-3);
        tempo.set_micros_per_quarter(0);
        assert_eq!(tempo.micros_per_quarter(), 1_000_000);
    }
}
