use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::events::{ChannelMessage, Event, EventKind, Length};
use crate::sink::PlaybackSink;
use crate::{Error, Result};

/// Identifies one submission, including the note-off scheduled for a timed
/// note-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Nothing was pending any more. Not an error.
    AlreadyDispatched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub failed: u64,
    pub pending: usize,
}

type Key = (Instant, u64);

const ALL_SOUND_OFF: u8 = 120;
const ALL_NOTES_OFF: u8 = 123;

struct Entry {
    handle: EventHandle,
    event: Event,
}

#[derive(Default)]
struct Queue {
    pending: BTreeMap<Key, Entry>,
    by_handle: HashMap<EventHandle, Vec<Key>>,
    by_tag: HashMap<u64, HashSet<EventHandle>>,
    /// Note-ons already delivered whose key has not been released since.
    sounding: HashMap<EventHandle, Event>,
    /// (channel, key) to the sounding handles holding it down.
    keys_down: HashMap<(u8, u8), Vec<EventHandle>>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    fn insert(&mut self, handle: EventHandle, fire_at: Instant, event: Event) {
        let key = (fire_at, self.next_seq);
        self.next_seq += 1;
        if let Some(tag) = event.tag {
            self.by_tag.entry(tag).or_default().insert(handle);
        }
        self.by_handle.entry(handle).or_default().push(key);
        self.pending.insert(key, Entry { handle, event });
    }

    fn next_handle(&mut self) -> EventHandle {
        let handle = EventHandle(self.next_seq);
        self.next_seq += 1;
        handle
    }

    /// Drops every pending entry of `handle`, returning how many there were.
    fn remove_pending(&mut self, handle: EventHandle) -> usize {
        let keys = self.by_handle.remove(&handle).unwrap_or_default();
        let removed = keys
            .iter()
            .filter(|key| self.pending.remove(*key).is_some())
            .count();
        self.retire(handle);
        removed
    }

    fn retire(&mut self, handle: EventHandle) {
        if self.by_handle.contains_key(&handle) || self.sounding.contains_key(&handle) {
            return;
        }
        self.by_tag.retain(|_, handles| {
            handles.remove(&handle);
            !handles.is_empty()
        });
    }

    /// Pops the earliest entry if it is due, updating the bookkeeping as if
    /// it had been delivered.
    fn pop_due(&mut self, now: Instant) -> Option<Entry> {
        let entry = self.pending.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let (key, entry) = entry.remove_entry();
        if let Some(keys) = self.by_handle.get_mut(&entry.handle) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_handle.remove(&entry.handle);
            }
        }
        self.track_sounding(entry.handle, &entry.event);
        self.retire(entry.handle);
        Some(entry)
    }

    /// Any release of a key ends every submission holding it, whichever
    /// handle the release came from.
    fn track_sounding(&mut self, handle: EventHandle, event: &Event) {
        let Some(note) = event.kind.note_key() else {
            if let EventKind::Midi {
                channel,
                message: ChannelMessage::ControlChange {
                    controller: ALL_SOUND_OFF | ALL_NOTES_OFF,
                    ..
                },
            } = event.kind
            {
                let held: Vec<(u8, u8)> = self
                    .keys_down
                    .keys()
                    .filter(|(c, _)| *c == channel)
                    .copied()
                    .collect();
                for note in held {
                    self.release_key(note);
                }
            }
            return;
        };
        if event.kind.is_note_on() {
            self.sounding.insert(handle, event.clone());
            self.keys_down.entry(note).or_default().push(handle);
        } else {
            self.release_key(note);
        }
    }

    fn release_key(&mut self, note: (u8, u8)) {
        for handle in self.keys_down.remove(&note).unwrap_or_default() {
            self.sounding.remove(&handle);
            self.retire(handle);
        }
    }

    fn next_fire_time(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(at, _)| *at)
    }
}

fn release_of(note_on: &Event) -> Option<Event> {
    let (channel, key) = note_on.kind.note_key()?;
    let mut off = Event::at(note_on.tick, EventKind::note_off(channel, key, 0)).on_track(note_on.track);
    off.tag = note_on.tag;
    Some(off)
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable producer side of a [`Scheduler`]. Safe to use from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Queues `event` to fire `delay` from now. Equal fire times dispatch in
    /// submission order. A note-on with a [`Length::Time`] duration also
    /// queues its note-off.
    pub fn submit(&self, event: Event, delay: Duration) -> EventHandle {
        let fire_at = Instant::now() + delay;
        let release = match event.duration {
            Some(Length::Time(length)) if event.kind.is_note_on() => {
                release_of(&event).map(|off| (fire_at + length, off))
            }
            Some(Length::Ticks(_)) => {
                debug!("tick duration reached the scheduler unresolved, ignoring it");
                None
            }
            _ => None,
        };

        let mut queue = self.shared.queue.lock();
        let handle = queue.next_handle();
        let wake = queue.next_fire_time().is_none_or(|next| fire_at < next);
        queue.insert(handle, fire_at, event);
        if let Some((at, off)) = release {
            queue.insert(handle, at, off);
        }
        drop(queue);
        if wake {
            self.shared.wakeup.notify_one();
        }
        handle
    }

    /// Removes whatever of `handle` is still pending. Cancelling a sounding
    /// note also drops its queued note-off; use [`stop`](Self::stop) to
    /// release it instead.
    pub fn cancel(&self, handle: EventHandle) -> CancelOutcome {
        let mut queue = self.shared.queue.lock();
        if queue.remove_pending(handle) > 0 {
            debug!(?handle, "cancelled");
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::AlreadyDispatched
        }
    }

    /// Drops pending entries of `handle` and releases the note right away if
    /// it is sounding. Returns false when there was nothing left to stop.
    pub fn stop(&self, handle: EventHandle) -> bool {
        let mut queue = self.shared.queue.lock();
        let stopped = Self::stop_locked(&mut queue, handle);
        drop(queue);
        if stopped {
            self.shared.wakeup.notify_one();
        }
        stopped
    }

    fn stop_locked(queue: &mut Queue, handle: EventHandle) -> bool {
        let removed = queue.remove_pending(handle);
        match queue.sounding.remove(&handle).as_ref().and_then(release_of) {
            Some(off) => {
                queue.insert(handle, Instant::now(), off);
                true
            }
            None => removed > 0,
        }
    }

    /// Cancels every pending submission carrying `tag` in one step. Returns
    /// the number of submissions affected.
    pub fn cancel_tagged(&self, tag: u64) -> usize {
        let mut queue = self.shared.queue.lock();
        let handles = queue.by_tag.get(&tag).cloned().unwrap_or_default();
        handles
            .into_iter()
            .filter(|h| queue.remove_pending(*h) > 0)
            .count()
    }

    /// Stops every submission carrying `tag` in one step, releasing the
    /// sounding ones.
    pub fn stop_tagged(&self, tag: u64) -> usize {
        let mut queue = self.shared.queue.lock();
        let handles = queue.by_tag.get(&tag).cloned().unwrap_or_default();
        let stopped = handles
            .into_iter()
            .filter(|h| Self::stop_locked(&mut queue, *h))
            .count();
        drop(queue);
        if stopped > 0 {
            self.shared.wakeup.notify_one();
        }
        stopped
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.shared.queue.lock().pending.len(),
        }
    }
}

/// Time-ordered delivery of events to a single sink on a dedicated thread.
pub struct Scheduler {
    handle: SchedulerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(sink: impl PlaybackSink + 'static) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
            dispatched: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let thread = std::thread::Builder::new()
            .name("tempora-scheduler".into())
            .spawn({
                let shared = shared.clone();
                move || dispatch_loop(shared, sink)
            })?;
        Ok(Self {
            handle: SchedulerHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops the dispatch thread and waits for it. Pending entries are dropped.
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.handle.shared.queue.lock().shutdown = true;
        self.handle.shared.wakeup.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
    }
}

impl Deref for Scheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &SchedulerHandle {
        &self.handle
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn dispatch_loop(shared: Arc<Shared>, mut sink: impl PlaybackSink) {
    let mut due = Vec::new();
    loop {
        {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    debug!(pending = queue.pending.len(), "scheduler shutting down");
                    return;
                }
                match queue.next_fire_time() {
                    Some(at) if at <= Instant::now() => break,
                    Some(at) => {
                        shared.wakeup.wait_until(&mut queue, at);
                    }
                    None => shared.wakeup.wait(&mut queue),
                }
            }
            let now = Instant::now();
            while let Some(entry) = queue.pop_due(now) {
                due.push(entry);
            }
        }

        // Delivery happens without the lock so producers never wait on the sink.
        for entry in due.drain(..) {
            match deliver(&mut sink, &entry.event) {
                Ok(()) => {
                    shared.dispatched.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(handle = ?entry.handle, event = %entry.event, "{err}");
                }
            }
        }
    }
}

fn deliver(sink: &mut impl PlaybackSink, event: &Event) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::SchedulerSinkFailure(e.to_string())),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "sink panicked".into());
            Err(Error::SchedulerSinkFailure(message))
        }
    }
}
