use std::sync::Arc;

use tracing::trace;

use super::{Action, Stage, StageContext};
use crate::config::SharedSettings;
use crate::events::{Event, EventKind};
use crate::timing::LiveTempo;

/// Replaces a note-on with an arpeggio over the configured scale: note `i`
/// sounds `scale[i]` semitones above the trigger, `i` sixteenth notes later.
/// The sixteenth is taken from the live tempo on every trigger.
pub struct Arpeggiator {
    settings: SharedSettings,
    tempo: Arc<LiveTempo>,
}

impl Arpeggiator {
    pub fn new(settings: SharedSettings, tempo: Arc<LiveTempo>) -> Self {
        Self { settings, tempo }
    }
}

impl Stage for Arpeggiator {
    fn name(&self) -> &str {
        "arpeggiator"
    }

    fn apply(&self, event: &Event, ctx: &mut StageContext) -> Action {
        // Arpeggio notes come back through the pipeline; they never re-trigger.
        if ctx.depth() > 0 || !event.kind.is_note_on() {
            return Action::KeepUnchanged;
        }
        let settings = self.settings.load();
        let arpeggio = &settings.arpeggio;
        let Some((channel, key)) = event.kind.note_key() else {
            return Action::KeepUnchanged;
        };
        if !arpeggio.enabled || !arpeggio.channel.matches(channel) {
            return Action::KeepUnchanged;
        }
        let intervals = arpeggio.scale.intervals();
        let count = arpeggio.count.min(intervals.len());
        if count == 0 {
            return Action::KeepUnchanged;
        }

        let step = self.tempo.sixteenth();
        for (i, interval) in intervals.iter().take(count).enumerate() {
            let value = key as u16 + *interval as u16;
            if value > 127 {
                trace!(key, interval, "arpeggio note out of range");
                continue;
            }
            let mut note = event.clone();
            note.kind = EventKind::note_on(channel, value as u8, event.velocity());
            ctx.emit(note, step * i as u32);
        }
        Action::Suppress
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{ChannelFilter, TransformSettings, shared};
    use crate::events::Length;
    use crate::transform::{Pipeline, Scale};

    fn arpeggio_settings(channel: ChannelFilter, scale: Vec<u8>, count: usize) -> SharedSettings {
        let mut settings = TransformSettings::default();
        settings.arpeggio.enabled = true;
        settings.arpeggio.channel = channel;
        settings.arpeggio.scale = Scale::Custom(scale);
        settings.arpeggio.count = count;
        shared(settings)
    }

    fn pipeline(settings: SharedSettings, tempo: Arc<LiveTempo>) -> Pipeline {
        let mut pipeline = Pipeline::default();
        pipeline.register(Arpeggiator::new(settings, tempo));
        pipeline
    }

    #[test]
    fn count_is_capped_and_notes_step_by_sixteenths() {
        let tempo = Arc::new(LiveTempo::new(480));
        let settings = arpeggio_settings(ChannelFilter::All, vec![0, 4, 7], 2);
        let trigger = Event::new(EventKind::note_on(0, 60, 90))
            .with_duration(Length::Time(Duration::from_millis(300)));

        let out = pipeline(settings, tempo.clone()).process(trigger, Duration::ZERO);
        let notes: Vec<(u32, u8, Duration)> = out
            .events
            .iter()
            .map(|o| (o.event.value(), o.event.velocity(), o.delay))
            .collect();
        assert_eq!(
            notes,
            vec![(60, 90, Duration::ZERO), (64, 90, tempo.sixteenth())]
        );
        assert!(out
            .events
            .iter()
            .all(|o| o.event.duration == Some(Length::Time(Duration::from_millis(300)))));
    }

    #[test]
    fn delay_follows_tempo_changes() {
        let tempo = Arc::new(LiveTempo::new(96));
        let settings = arpeggio_settings(ChannelFilter::All, vec![0, 4, 7], 3);
        let pipeline = pipeline(settings, tempo.clone());

        let before = pipeline.process(Event::new(EventKind::note_on(0, 60, 90)), Duration::ZERO);
        tempo.set_bpm(60.0);
        let after = pipeline.process(Event::new(EventKind::note_on(0, 60, 90)), Duration::ZERO);
        assert!(after.events[2].delay > before.events[2].delay);
        assert!((after.events[1].delay.as_secs_f64() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn other_channels_and_events_pass_untouched() {
        let tempo = Arc::new(LiveTempo::default());
        let settings = arpeggio_settings(ChannelFilter::Only(1), vec![0, 12], 2);
        let pipeline = pipeline(settings, tempo);

        for kind in [
            EventKind::note_on(0, 60, 90),
            EventKind::note_off(1, 60, 0),
            EventKind::note_on(1, 60, 0),
            EventKind::control_change(1, 64, 127),
        ] {
            let out = pipeline.process(Event::new(kind.clone()), Duration::ZERO);
            assert_eq!(out.events.len(), 1, "{kind:?}");
            assert_eq!(out.events[0].event.kind, kind);
        }
        let out = pipeline.process(Event::new(EventKind::note_on(1, 60, 90)), Duration::ZERO);
        assert_eq!(out.events.len(), 2);
    }

    #[test]
    fn notes_above_the_midi_range_are_dropped() {
        let tempo = Arc::new(LiveTempo::default());
        let settings = arpeggio_settings(ChannelFilter::All, vec![0, 4, 7], 3);
        let out = pipeline(settings, tempo).process(
            Event::new(EventKind::note_on(0, 122, 90)),
            Duration::ZERO,
        );
        let keys: Vec<u32> = out.events.iter().map(|o| o.event.value()).collect();
        assert_eq!(keys, vec![122, 126]);
    }

    #[test]
    fn disabled_settings_take_effect_immediately() {
        let tempo = Arc::new(LiveTempo::default());
        let settings = arpeggio_settings(ChannelFilter::All, vec![0, 4, 7], 3);
        let pipeline = pipeline(settings.clone(), tempo);
        assert_eq!(
            pipeline
                .process(Event::new(EventKind::note_on(0, 60, 90)), Duration::ZERO)
                .events
                .len(),
            3
        );

        let mut off = (**settings.load()).clone();
        off.arpeggio.enabled = false;
        settings.store(Arc::new(off));
        assert_eq!(
            pipeline
                .process(Event::new(EventKind::note_on(0, 60, 90)), Duration::ZERO)
                .events
                .len(),
            1
        );
    }
}
