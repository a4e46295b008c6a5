use std::time::{Duration, Instant};

use tempora::config::ChannelFilter;
use tempora::events::{ChannelMessage, EventKind, MetaEvent};
use tempora::sink::ChannelSink;
use tempora::timing::{CancelOutcome, Scheduler};
use tempora::transform::Scale;
use tempora::{Config, Engine, Event, PlayerCommand, PlayerUpdate, Sequence};

const WAIT: Duration = Duration::from_secs(2);

#[test]
fn delayed_events_leave_in_due_order() {
    let (sink, rx) = ChannelSink::new();
    let scheduler = Scheduler::spawn(sink).unwrap();
    let start = Instant::now();
    for (key, delay) in [(3, 150), (1, 50), (2, 100)] {
        scheduler.submit(Event::new(EventKind::note_on(0, key, 100)), Duration::from_millis(delay));
    }

    let out: Vec<_> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(out.iter().map(|d| d.event.value()).collect::<Vec<_>>(), vec![1, 2, 3]);
    for (dispatched, due) in out.iter().zip([50, 100, 150]) {
        assert!(dispatched.at.duration_since(start) >= Duration::from_millis(due));
    }
    scheduler.shutdown();
}

#[test]
fn cancelling_a_dispatched_event_changes_nothing() {
    let (sink, rx) = ChannelSink::new();
    let scheduler = Scheduler::spawn(sink).unwrap();
    let handle = scheduler.submit(Event::new(EventKind::control_change(0, 7, 90)), Duration::ZERO);
    rx.recv_timeout(WAIT).unwrap();

    assert_eq!(scheduler.cancel(handle), CancelOutcome::AlreadyDispatched);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(scheduler.stats().dispatched, 1);
}

#[test]
fn arpeggio_is_capped_by_count() {
    let (sink, rx) = ChannelSink::new();
    let mut config = Config::default();
    config.transform.arpeggio.enabled = true;
    config.transform.arpeggio.channel = ChannelFilter::All;
    config.transform.arpeggio.scale = Scale::Custom(vec![0, 4, 7]);
    config.transform.arpeggio.count = 2;
    let engine = Engine::new(sink, &config).unwrap();
    let sixteenth = engine.tempo().sixteenth();

    let handles = engine.play_direct(Event::new(EventKind::note_on(0, 60, 100)));
    assert_eq!(handles.len(), 2);
    let first = rx.recv_timeout(WAIT).unwrap();
    let second = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(first.event.kind, EventKind::note_on(0, 60, 100));
    assert_eq!(second.event.kind, EventKind::note_on(0, 64, 100));
    assert!(second.at.duration_since(first.at) >= sixteenth - Duration::from_millis(5));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    engine.shutdown();
}

#[test]
fn preset_changes_become_text_on_the_same_channel() {
    let (sink, rx) = ChannelSink::new();
    let mut config = Config::default();
    config.transform.skip_preset_changes = true;
    let engine = Engine::new(sink, &config).unwrap();

    engine.play_direct(Event::new(EventKind::patch_change(5, 12)));
    let out = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(out.event.channel(), Some(5));
    let EventKind::Meta { meta, .. } = &out.event.kind else {
        panic!("expected a meta event, got {:?}", out.event.kind);
    };
    assert!(matches!(meta, MetaEvent::Text(..)));
    assert!(meta.as_text().unwrap().contains("12"));
    engine.shutdown();
}

#[test]
fn a_loaded_file_plays_through_the_engine() {
    let mut sequence = Sequence::new(96).unwrap();
    sequence.add_tempo(0, 0, 600.0);
    sequence.add_patch_change(1, 0, 2, 33);
    sequence.add_note(1, 0, 2, 40, 90, 24);
    sequence.add_note(1, 48, 2, 43, 90, 24);
    sequence.finalize();
    let loaded = Sequence::load(&sequence.write().unwrap()).unwrap();

    let (sink, rx) = ChannelSink::new();
    let engine = Engine::new(sink, &Config::default()).unwrap();
    let player = engine.spawn_player(loaded).unwrap();
    player.send(PlayerCommand::Play);

    let finished = player
        .update_rx
        .iter()
        .find(|u| matches!(u, PlayerUpdate::Finished { .. }));
    assert!(finished.is_some());

    let mut keys = Vec::new();
    while let Ok(out) = rx.recv_timeout(Duration::from_millis(300)) {
        if let EventKind::Midi {
            message: ChannelMessage::NoteOn { key, velocity },
            ..
        } = out.event.kind
        {
            if velocity > 0 {
                keys.push(key);
            }
        }
    }
    assert_eq!(keys, vec![40, 43]);
    player.join();
    engine.shutdown();
}

#[test]
fn released_notes_leave_nothing_to_stop() {
    let (sink, rx) = ChannelSink::new();
    let scheduler = Scheduler::spawn(sink).unwrap();
    let handles: Vec<_> = (0..200u32)
        .map(|i| {
            let key = (i % 128) as u8;
            let on = scheduler.submit(Event::new(EventKind::note_on(0, key, 90)).with_tag(9), Duration::ZERO);
            scheduler.submit(Event::new(EventKind::note_off(0, key, 0)).with_tag(9), Duration::ZERO);
            on
        })
        .collect();
    for _ in 0..400 {
        rx.recv_timeout(WAIT).unwrap();
    }

    assert!(handles.iter().all(|h| !scheduler.stop(*h)));
    assert_eq!(scheduler.stop_tagged(9), 0);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(scheduler.stats().pending, 0);
}

#[test]
fn arpeggiated_file_notes_are_all_released() {
    let mut sequence = Sequence::new(96).unwrap();
    sequence.add_tempo(0, 0, 600.0);
    sequence.add_note(1, 0, 0, 60, 100, 48);
    sequence.add_note(1, 96, 0, 72, 100, 48);
    sequence.finalize();
    let loaded = Sequence::load(&sequence.write().unwrap()).unwrap();

    let (sink, rx) = ChannelSink::new();
    let mut config = Config::default();
    config.transform.arpeggio.enabled = true;
    config.transform.arpeggio.scale = Scale::Custom(vec![0, 4, 7]);
    config.transform.arpeggio.count = 3;
    let engine = Engine::new(sink, &config).unwrap();
    let player = engine.spawn_player(loaded).unwrap();
    player.send(PlayerCommand::Play);

    let mut ons = Vec::new();
    let mut offs = Vec::new();
    while let Ok(out) = rx.recv_timeout(Duration::from_millis(300)) {
        match out.event.kind.note_key() {
            Some((_, key)) if out.event.kind.is_note_on() => ons.push(key),
            Some((_, key)) => offs.push(key),
            None => {}
        }
    }
    assert_eq!(ons, vec![60, 64, 67, 72, 76, 79]);
    offs.sort();
    assert_eq!(offs, vec![60, 64, 67, 72, 76, 79]);
    player.join();
    engine.shutdown();
}
