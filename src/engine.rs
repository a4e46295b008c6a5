use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Config, SharedSettings, TransformSettings, shared};
use crate::events::{Event, Length};
use crate::input::{self, HardwareInput, InputMonitor, InputThread};
use crate::player::{self, PlayerHandle};
use crate::sink::PlaybackSink;
use crate::timing::{EventHandle, LiveTempo, Scheduler, SchedulerHandle, Sequence};
use crate::transform::{Arpeggiator, EventLogger, Pipeline, PresetSkip, TempoRandomizer};
use crate::Result;

/// Entry point for live events: runs them through the pipeline and queues
/// the result. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct Injector {
    pipeline: Arc<Pipeline>,
    scheduler: SchedulerHandle,
    tempo: Arc<LiveTempo>,
}

impl Injector {
    /// Sends `event`, honouring its `delay`. Returns one handle per event the
    /// pipeline let through or generated.
    pub fn send(&self, event: Event) -> Vec<EventHandle> {
        let delay = event.delay;
        let output = self.pipeline.process(event, delay);
        output
            .events
            .into_iter()
            .map(|out| {
                let mut event = out.event;
                event.delay = out.delay;
                // Tick lengths follow the tempo at the moment the note starts.
                if let Some(Length::Ticks(ticks)) = event.duration {
                    event.duration = Some(Length::Time(self.tempo.ticks_to_duration(ticks)));
                }
                self.scheduler.submit(event, out.delay)
            })
            .collect()
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }
}

/// Scheduler, standard transform stages, shared settings and live tempo
/// wired together.
pub struct Engine {
    config: Config,
    settings: SharedSettings,
    tempo: Arc<LiveTempo>,
    injector: Injector,
    scheduler: Scheduler,
}

impl Engine {
    pub fn new(sink: impl PlaybackSink + 'static, config: &Config) -> Result<Self> {
        Self::with_stages(sink, config, |_| {})
    }

    /// Like [`new`](Self::new), with `extra` registering stages after the
    /// standard ones.
    pub fn with_stages(
        sink: impl PlaybackSink + 'static,
        config: &Config,
        extra: impl FnOnce(&mut Pipeline),
    ) -> Result<Self> {
        let settings = shared(config.transform.clone());
        let tempo = Arc::new(LiveTempo::default());

        let mut pipeline = Pipeline::new(
            config.engine.recursion_limit,
            config.engine.max_generated_events,
        );
        pipeline
            .register(EventLogger::new(settings.clone()))
            .register(PresetSkip::new(settings.clone()))
            .register(TempoRandomizer::new(settings.clone(), tempo.clone()))
            .register(Arpeggiator::new(settings.clone(), tempo.clone()));
        extra(&mut pipeline);
        debug!(stages = ?pipeline.stage_names().collect::<Vec<_>>(), "pipeline ready");

        let scheduler = Scheduler::spawn(sink)?;
        let injector = Injector {
            pipeline: Arc::new(pipeline),
            scheduler: scheduler.handle(),
            tempo: tempo.clone(),
        };
        info!("engine started");
        Ok(Self {
            config: config.clone(),
            settings,
            tempo,
            injector,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    /// Publishes a modified copy of the current transform settings.
    pub fn update_settings(&self, edit: impl Fn(&mut TransformSettings)) {
        self.settings.rcu(|current| {
            let mut next = (**current).clone();
            edit(&mut next);
            next
        });
    }

    pub fn tempo(&self) -> Arc<LiveTempo> {
        self.tempo.clone()
    }

    pub fn scheduler(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn injector(&self) -> Injector {
        self.injector.clone()
    }

    /// Plays an event from the application context, through the pipeline.
    pub fn play_direct(&self, event: Event) -> Vec<EventHandle> {
        self.injector.send(event)
    }

    pub fn stop_direct(&self, handles: &[EventHandle]) -> usize {
        handles.iter().filter(|h| self.scheduler.stop(**h)).count()
    }

    pub fn stop_tagged(&self, tag: u64) -> usize {
        self.scheduler.stop_tagged(tag)
    }

    pub fn spawn_input(&self, source: impl HardwareInput + 'static) -> Result<(InputThread, InputMonitor)> {
        input::spawn(
            source,
            self.injector(),
            Duration::from_millis(self.config.engine.input_poll_interval_ms),
            self.config.engine.monitor_capacity,
        )
    }

    pub fn spawn_player(&self, sequence: Sequence) -> Result<PlayerHandle> {
        player::spawn(
            sequence,
            self.injector(),
            self.tempo.clone(),
            Duration::from_millis(self.config.engine.player_max_wait_ms),
        )
    }

    pub fn shutdown(self) {
        let stats = self.scheduler.stats();
        info!(
            dispatched = stats.dispatched,
            failed = stats.failed,
            dropped = stats.pending,
            "engine stopped"
        );
        self.scheduler.shutdown();
    }
}
