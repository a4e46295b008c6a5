use crate::events::{Event, EventKind, MetaEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeterEntry {
    tick: u64,
    numerator: u32,
    ticks_per_beat: u64,
    /// Zero-based measure index starting at `tick`.
    first_measure: u64,
}

impl MeterEntry {
    fn ticks_per_measure(&self) -> u64 {
        (self.ticks_per_beat * self.numerator as u64).max(1)
    }
}

/// Measure/beat positions from time signature events, 4/4 until the first one.
#[derive(Debug, Clone)]
pub struct MeterMap {
    ticks_per_quarter: u16,
    entries: Vec<MeterEntry>,
}

impl MeterMap {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            entries: vec![MeterEntry {
                tick: 0,
                numerator: 4,
                ticks_per_beat: ticks_per_quarter.max(1) as u64,
                first_measure: 0,
            }],
        }
    }

    /// Expects events sorted by tick.
    pub fn from_events<'a>(
        ticks_per_quarter: u16,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Self {
        let mut map = Self::new(ticks_per_quarter);
        for event in events {
            if let EventKind::Meta {
                meta:
                    MetaEvent::TimeSignature {
                        numerator,
                        denominator_pow,
                        ..
                    },
                ..
            } = event.kind
            {
                map.push(event.tick, numerator, denominator_pow);
            }
        }
        map
    }

    fn push(&mut self, tick: u64, numerator: u8, denominator_pow: u8) {
        let denominator = 1u64 << denominator_pow.min(6);
        let ticks_per_beat = (self.ticks_per_quarter as u64 * 4 / denominator).max(1);
        let Some(last) = self.entries.last_mut() else {
            return;
        };
        if tick < last.tick {
            return;
        }
        let elapsed = tick - last.tick;
        // A change in the middle of a measure starts a new one.
        let first_measure = last.first_measure + elapsed.div_ceil(last.ticks_per_measure());
        let entry = MeterEntry {
            tick,
            numerator: numerator.max(1) as u32,
            ticks_per_beat,
            first_measure,
        };
        if tick == last.tick {
            *last = MeterEntry {
                first_measure: last.first_measure,
                ..entry
            };
        } else {
            self.entries.push(entry);
        }
    }

    /// 1-based `(measure, beat)` of `tick`.
    pub fn position(&self, tick: u64) -> (u32, u32) {
        let idx = self.entries.partition_point(|e| e.tick <= tick);
        let entry = &self.entries[idx.saturating_sub(1)];
        let offset = tick - entry.tick;
        let measure = entry.first_measure + offset / entry.ticks_per_measure();
        let beat = (offset % entry.ticks_per_measure()) / entry.ticks_per_beat;
        (measure as u32 + 1, beat as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_signature(tick: u64, numerator: u8, denominator_pow: u8) -> Event {
        Event::at(
            tick,
            EventKind::meta(MetaEvent::TimeSignature {
                numerator,
                denominator_pow,
                clocks_per_click: 24,
                thirty_seconds_per_quarter: 8,
            }),
        )
    }

    #[test]
    fn defaults_to_four_four() {
        let map = MeterMap::new(480);
        assert_eq!(map.position(0), (1, 1));
        assert_eq!(map.position(479), (1, 1));
        assert_eq!(map.position(480 * 3), (1, 4));
        assert_eq!(map.position(480 * 4), (2, 1));
    }

    #[test]
    fn follows_signature_changes() {
        let events = [time_signature(0, 3, 2), time_signature(480 * 6, 6, 3)];
        let map = MeterMap::from_events(480, &events);
        assert_eq!(map.position(480 * 3), (2, 1));
        // two bars of 3/4, then 6/8 with eighth-note beats
        assert_eq!(map.position(480 * 6), (3, 1));
        assert_eq!(map.position(480 * 6 + 240 * 5), (3, 6));
        assert_eq!(map.position(480 * 6 + 240 * 6), (4, 1));
    }
}
