//! Per-event rewriting between an event source and the scheduler.
//!
//! Stages run in registration order. Each one sees the event as left by the
//! stages before it and may keep it, replace it, or suppress it; suppression
//! ends the walk for that event. Stages may also emit new events, which are
//! fed through the whole pipeline again one generation deeper.

mod arpeggio;
mod rules;
mod scales;

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{trace, warn};

use crate::Error;
use crate::events::Event;

pub use arpeggio::Arpeggiator;
pub use rules::{EventLogger, PresetSkip, TempoRandomizer};
pub use scales::{Scale, ScaleName};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Continue with this event in place of the incoming one.
    Keep(Event),
    KeepUnchanged,
    Suppress,
}

/// An event leaving the pipeline, with its delay from submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub event: Event,
    pub delay: Duration,
}

pub struct StageContext {
    depth: usize,
    emitted: Vec<Outgoing>,
}

impl StageContext {
    /// 0 for the source event, 1 for events emitted while processing it, ...
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Queues a new event `delay` after the one being processed.
    pub fn emit(&mut self, event: Event, delay: Duration) {
        self.emitted.push(Outgoing { event, delay });
    }
}

/// Stages run on whatever thread feeds the pipeline and must not touch the
/// scheduler themselves.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, event: &Event, ctx: &mut StageContext) -> Action;
}

impl<F> Stage for F
where
    F: Fn(&Event, &mut StageContext) -> Action + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    fn apply(&self, event: &Event, ctx: &mut StageContext) -> Action {
        self(event, ctx)
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub events: Vec<Outgoing>,
    /// Emitted events dropped by the recursion guards.
    pub errors: Vec<Error>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    max_depth: usize,
    max_events: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(8, 256)
    }
}

impl Pipeline {
    pub fn new(max_depth: usize, max_events: usize) -> Self {
        Self {
            stages: Vec::new(),
            max_depth,
            max_events,
        }
    }

    pub fn register(&mut self, stage: impl Stage + 'static) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name())
    }

    /// Runs `event` and everything the stages emit for it. Output is ordered
    /// source first, then each generation in emission order.
    pub fn process(&self, event: Event, delay: Duration) -> PipelineOutput {
        let mut output = PipelineOutput::default();
        let mut queue = VecDeque::from([(event, delay, 0usize)]);
        let mut generated = 0usize;

        while let Some((event, delay, depth)) = queue.pop_front() {
            let mut ctx = StageContext {
                depth,
                emitted: Vec::new(),
            };
            if let Some(event) = self.run_stages(event, &mut ctx) {
                output.events.push(Outgoing { event, delay });
            }

            for child in ctx.emitted {
                let limit = if depth + 1 > self.max_depth {
                    Some(self.max_depth)
                } else if generated >= self.max_events {
                    Some(self.max_events)
                } else {
                    None
                };
                if let Some(limit) = limit {
                    let err = Error::RecursionLimitExceeded { limit };
                    warn!(depth, event = %child.event, "dropping emitted event: {err}");
                    output.errors.push(err);
                    continue;
                }
                generated += 1;
                queue.push_back((child.event, delay + child.delay, depth + 1));
            }
        }
        output
    }

    fn run_stages(&self, mut event: Event, ctx: &mut StageContext) -> Option<Event> {
        for stage in &self.stages {
            match stage.apply(&event, ctx) {
                Action::Keep(next) => event = next,
                Action::KeepUnchanged => {}
                Action::Suppress => {
                    trace!(stage = stage.name(), "suppressed");
                    return None;
                }
            }
        }
        Some(event)
    }
}
