//! Destinations for dispatched events.

use std::time::Instant;

use crossbeam::channel::{Receiver, Sender};
use tracing::info;

use crate::events::Event;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of scheduled events, typically a synthesizer. Called from the
/// scheduler's dispatch thread only, and must not block for long.
pub trait PlaybackSink: Send {
    fn deliver(&mut self, event: &Event) -> Result<(), SinkError>;
}

impl<F> PlaybackSink for F
where
    F: FnMut(&Event) -> Result<(), SinkError> + Send,
{
    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        self(event)
    }
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub event: Event,
    pub at: Instant,
}

/// Forwards every event, with its dispatch instant, to a channel.
pub struct ChannelSink {
    tx: Sender<Dispatched>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Dispatched>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }
}

impl PlaybackSink for ChannelSink {
    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        self.tx
            .send(Dispatched {
                event: event.clone(),
                at: Instant::now(),
            })
            .map_err(|_| "dispatch receiver dropped".into())
    }
}

#[derive(Debug, Default)]
pub struct LogSink;

impl PlaybackSink for LogSink {
    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        info!(target: "tempora::playback", "{event}");
        Ok(())
    }
}

#[cfg(feature = "midir")]
pub use device::MidirSink;

#[cfg(feature = "midir")]
mod device {
    use midir::{MidiOutput, MidiOutputConnection};
    use tracing::info;

    use super::{PlaybackSink, SinkError};
    use crate::events::Event;
    use crate::{Error, Result};

    /// Sends events to a MIDI output port. Meta events have no wire form and
    /// are dropped.
    pub struct MidirSink {
        connection: MidiOutputConnection,
    }

    impl MidirSink {
        /// Connects to the first port whose name contains `port`, or the first
        /// port at all.
        pub fn connect(port: Option<&str>) -> Result<Self> {
            let output = MidiOutput::new("tempora").map_err(|e| Error::Device(e.to_string()))?;
            let ports = output.ports();
            let selected = ports
                .iter()
                .find(|p| match port {
                    Some(name) => output.port_name(p).unwrap_or_default().contains(name),
                    None => true,
                })
                .ok_or_else(|| Error::Device("no matching MIDI output".into()))?;
            let name = output.port_name(selected).unwrap_or_default();
            let connection = output
                .connect(selected, "tempora-out")
                .map_err(|e| Error::Device(e.to_string()))?;
            info!(port = %name, "connected MIDI output");
            Ok(Self { connection })
        }
    }

    impl PlaybackSink for MidirSink {
        fn deliver(&mut self, event: &Event) -> std::result::Result<(), SinkError> {
            if let Some(bytes) = event.kind.to_midi_bytes() {
                self.connection.send(&bytes)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |event: &Event| -> Result<(), SinkError> {
                seen.push(event.value());
                Ok(())
            };
            sink.deliver(&Event::new(EventKind::note_on(0, 60, 1))).unwrap();
        }
        assert_eq!(seen, vec![60]);
    }

    #[test]
    fn channel_sink_fails_once_the_receiver_is_gone() {
        let (mut sink, rx) = ChannelSink::new();
        let event = Event::new(EventKind::patch_change(1, 4));
        sink.deliver(&event).unwrap();
        assert_eq!(rx.recv().unwrap().event, event);
        drop(rx);
        assert!(sink.deliver(&event).is_err());
    }
}
