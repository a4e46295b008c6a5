use std::sync::Arc;

use rand::Rng;
use tracing::info;

use super::{Action, Stage, StageContext};
use crate::config::SharedSettings;
use crate::events::{ChannelMessage, Event, EventKind, MetaEvent, TextKind};
use crate::timing::LiveTempo;

/// Turns program changes into text meta events naming the skipped program,
/// so the channel keeps its current preset and the change stays visible.
pub struct PresetSkip {
    settings: SharedSettings,
}

impl PresetSkip {
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }
}

impl Stage for PresetSkip {
    fn name(&self) -> &str {
        "preset-skip"
    }

    fn apply(&self, event: &Event, _ctx: &mut StageContext) -> Action {
        let EventKind::Midi {
            channel,
            message: ChannelMessage::PatchChange { program },
        } = event.kind
        else {
            return Action::KeepUnchanged;
        };
        if !self.settings.load().skip_preset_changes {
            return Action::KeepUnchanged;
        }
        let text = format!("Skipping Preset Change: {program}");
        info!(channel, "{text}");
        let mut skipped = event.clone();
        skipped.kind = EventKind::Meta {
            channel: Some(channel),
            meta: MetaEvent::text(TextKind::Text, text),
        };
        Action::Keep(skipped)
    }
}

/// On every tempo event, sets the live tempo to a random 30..=240 BPM. The
/// event itself goes on unchanged.
pub struct TempoRandomizer {
    settings: SharedSettings,
    tempo: Arc<LiveTempo>,
}

impl TempoRandomizer {
    pub fn new(settings: SharedSettings, tempo: Arc<LiveTempo>) -> Self {
        Self { settings, tempo }
    }
}

impl Stage for TempoRandomizer {
    fn name(&self) -> &str {
        "tempo-randomizer"
    }

    fn apply(&self, event: &Event, _ctx: &mut StageContext) -> Action {
        let Some(micros_per_quarter) = event.kind.tempo() else {
            return Action::KeepUnchanged;
        };
        if self.settings.load().randomize_tempo {
            let bpm: u32 = rand::thread_rng().gen_range(30..=240);
            self.tempo.set_bpm(bpm as f64);
            info!(
                "tempo changed from {:.0} to {bpm} BPM",
                crate::timing::micros_to_bpm(micros_per_quarter)
            );
        }
        Action::KeepUnchanged
    }
}

pub struct EventLogger {
    settings: SharedSettings,
}

impl EventLogger {
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }
}

impl Stage for EventLogger {
    fn name(&self) -> &str {
        "event-logger"
    }

    fn apply(&self, event: &Event, ctx: &mut StageContext) -> Action {
        if self.settings.load().log_events {
            info!(target: "tempora::events", depth = ctx.depth(), "{event}");
        }
        Action::KeepUnchanged
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{TransformSettings, shared};
    use crate::transform::Pipeline;

    fn settings(edit: impl FnOnce(&mut TransformSettings)) -> SharedSettings {
        let mut settings = TransformSettings::default();
        edit(&mut settings);
        shared(settings)
    }

    #[test]
    fn preset_change_becomes_an_audit_text() {
        let mut pipeline = Pipeline::default();
        pipeline.register(PresetSkip::new(settings(|s| s.skip_preset_changes = true)));

        let patch = Event::at(960, EventKind::patch_change(9, 12)).on_track(2).with_tag(5);
        let out = pipeline.process(patch, Duration::ZERO);
        assert_eq!(out.events.len(), 1);

        let text = &out.events[0].event;
        assert_eq!((text.tick, text.track, text.tag), (960, 2, Some(5)));
        assert_eq!(text.channel(), Some(9));
        let EventKind::Meta { meta, .. } = &text.kind else {
            panic!("expected a meta event, got {:?}", text.kind);
        };
        let description = meta.as_text().unwrap();
        assert!(description.contains("12"), "{description}");
    }

    #[test]
    fn preset_changes_pass_when_not_skipping() {
        let mut pipeline = Pipeline::default();
        pipeline.register(PresetSkip::new(settings(|_| {})));
        let patch = Event::new(EventKind::patch_change(0, 3));
        assert_eq!(pipeline.process(patch.clone(), Duration::ZERO).events[0].event, patch);
    }

    #[test]
    fn randomizer_changes_only_the_live_tempo() {
        let tempo = Arc::new(LiveTempo::default());
        let mut pipeline = Pipeline::default();
        pipeline.register(TempoRandomizer::new(
            settings(|s| s.randomize_tempo = true),
            tempo.clone(),
        ));

        let event = Event::new(EventKind::meta(MetaEvent::SetTempo(500_000)));
        for _ in 0..50 {
            let out = pipeline.process(event.clone(), Duration::ZERO);
            assert_eq!(out.events[0].event, event);
            let bpm = tempo.bpm().round();
            assert!((30.0..=240.0).contains(&bpm), "{bpm}");
        }
    }

    #[test]
    fn randomizer_off_leaves_tempo_alone() {
        let tempo = Arc::new(LiveTempo::default());
        let mut pipeline = Pipeline::default();
        pipeline.register(TempoRandomizer::new(settings(|_| {}), tempo.clone()));
        pipeline.process(
            Event::new(EventKind::meta(MetaEvent::SetTempo(250_000))),
            Duration::ZERO,
        );
        assert_eq!(tempo.micros_per_quarter(), 500_000);
    }
}
