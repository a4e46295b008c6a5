//! Polling of live MIDI sources on a dedicated thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{debug, info, warn};

use crate::Result;
use crate::engine::Injector;
use crate::events::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputStatus {
    Ok,
    NoDevice,
    Disconnected,
    Other(String),
}

/// A source of live events. Polled from the input thread, never blocks.
pub trait HardwareInput: Send {
    fn poll_next(&mut self) -> Option<Event>;
    fn last_error(&self) -> InputStatus;
}

/// Input fed through a channel, for software sources and tests.
pub struct QueueInput {
    rx: Receiver<Event>,
    status: InputStatus,
}

impl QueueInput {
    pub fn new() -> (Sender<Event>, Self) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (
            tx,
            Self {
                rx,
                status: InputStatus::Ok,
            },
        )
    }
}

impl HardwareInput for QueueInput {
    fn poll_next(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.status = InputStatus::Disconnected;
                None
            }
        }
    }

    fn last_error(&self) -> InputStatus {
        self.status.clone()
    }
}

/// Copies of the events the input thread forwarded, for the consuming
/// context to read at its own pace. Lossy when it falls behind.
pub struct InputMonitor {
    consumer: HeapCons<Event>,
}

impl InputMonitor {
    pub fn pop(&mut self) -> Option<Event> {
        self.consumer.try_pop()
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.consumer.try_pop()).collect()
    }
}

/// Running input thread. Stopping it (explicitly or on drop) waits until the
/// thread has let go of its source.
pub struct InputThread {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputThread {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("input thread panicked");
            }
        }
    }
}

impl Drop for InputThread {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

pub fn spawn(
    mut source: impl HardwareInput + 'static,
    injector: Injector,
    poll_interval: Duration,
    monitor_capacity: usize,
) -> Result<(InputThread, InputMonitor)> {
    let (producer, consumer) = HeapRb::<Event>::new(monitor_capacity.max(1)).split();
    let running = Arc::new(AtomicBool::new(true));

    let thread = std::thread::Builder::new()
        .name("tempora-input".into())
        .spawn({
            let running = running.clone();
            move || poll_loop(&mut source, &injector, producer, &running, poll_interval)
        })?;

    Ok((
        InputThread {
            running,
            thread: Some(thread),
        },
        InputMonitor { consumer },
    ))
}

fn poll_loop(
    source: &mut impl HardwareInput,
    injector: &Injector,
    mut monitor: HeapProd<Event>,
    running: &AtomicBool,
    poll_interval: Duration,
) {
    info!("input thread started");
    let mut status = InputStatus::Ok;
    let mut overflowed = false;
    while running.load(Ordering::Relaxed) {
        while let Some(event) = source.poll_next() {
            if monitor.try_push(event.clone()).is_err() && !overflowed {
                overflowed = true;
                debug!("input monitor full, dropping copies");
            }
            injector.send(event);
        }
        let current = source.last_error();
        if current != status {
            match &current {
                InputStatus::Ok => info!("input recovered"),
                other => warn!(status = ?other, "input status changed"),
            }
            status = current;
        }
        std::thread::sleep(poll_interval);
    }
    info!("input thread stopped");
}

#[cfg(feature = "midir")]
pub use device::MidirInput;

#[cfg(feature = "midir")]
mod device {
    use crossbeam::channel::{Receiver, TryRecvError};
    use midir::{MidiInput, MidiInputConnection};
    use tracing::{info, trace};

    use super::{HardwareInput, InputStatus};
    use crate::events::{Event, EventKind};
    use crate::{Error, Result};

    /// A MIDI input port. The midir callback only queues raw bytes; decoding
    /// happens when the input thread polls.
    pub struct MidirInput {
        _connection: MidiInputConnection<()>,
        rx: Receiver<Vec<u8>>,
        status: InputStatus,
    }

    impl MidirInput {
        pub fn port_names() -> Result<Vec<String>> {
            let input = MidiInput::new("tempora").map_err(|e| Error::Device(e.to_string()))?;
            Ok(input
                .ports()
                .iter()
                .filter_map(|p| input.port_name(p).ok())
                .collect())
        }

        /// Connects to the first port whose name contains `port`, or the first
        /// port at all.
        pub fn connect(port: Option<&str>) -> Result<Self> {
            let input = MidiInput::new("tempora").map_err(|e| Error::Device(e.to_string()))?;
            let ports = input.ports();
            let selected = ports
                .iter()
                .find(|p| match port {
                    Some(name) => input.port_name(p).unwrap_or_default().contains(name),
                    None => true,
                })
                .ok_or_else(|| Error::Device("no matching MIDI input".into()))?;
            let name = input.port_name(selected).unwrap_or_default();

            let (tx, rx) = crossbeam::channel::unbounded();
            let connection = input
                .connect(
                    selected,
                    "tempora-in",
                    move |_timestamp, message, _| {
                        let _ = tx.send(message.to_vec());
                    },
                    (),
                )
                .map_err(|e| Error::Device(e.to_string()))?;
            info!(port = %name, "connected MIDI input");
            Ok(Self {
                _connection: connection,
                rx,
                status: InputStatus::Ok,
            })
        }
    }

    impl HardwareInput for MidirInput {
        fn poll_next(&mut self) -> Option<Event> {
            loop {
                match self.rx.try_recv() {
                    Ok(bytes) => match EventKind::from_midi_bytes(&bytes) {
                        Some(kind) => return Some(Event::new(kind)),
                        None => trace!(?bytes, "ignoring message"),
                    },
                    Err(TryRecvError::Empty) => return None,
                    Err(TryRecvError::Disconnected) => {
                        self.status = InputStatus::Disconnected;
                        return None;
                    }
                }
            }
        }

        fn last_error(&self) -> InputStatus {
            self.status.clone()
        }
    }
}
