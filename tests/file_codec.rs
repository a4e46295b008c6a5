use midly::num::{u4, u7, u15, u24, u28};
use midly::{Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use tempora::events::{ChannelMessage, EventKind, MetaEvent};
use tempora::smf::{self, WriteOptions};
use tempora::timing::Format;
use tempora::{Event, Sequence};

fn demo() -> Sequence {
    let mut seq = Sequence::new(500).unwrap();
    seq.add_patch_change(1, 0, 0, 10);
    seq.add_note(1, 500, 0, 62, 50, 500);
    seq.add_note(1, 1000, 0, 64, 50, 500);
    seq.add_note(1, 1500, 0, 67, 50, 500);
    seq.add_note(1, 2500, 0, 80, 0, 500);
    seq.finalize();
    seq
}

fn note_ons(seq: &Sequence) -> Vec<(u64, u8, u8)> {
    seq.merged()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Midi {
                message: ChannelMessage::NoteOn { key, velocity },
                ..
            } => Some((e.tick, key, velocity)),
            _ => None,
        })
        .collect()
}

#[test]
fn written_demo_decodes_to_the_same_notes() {
    let bytes = demo().write().unwrap();
    let decoded = smf::decode(&bytes).unwrap();
    assert!(decoded.skipped.is_empty());

    let seq = decoded.sequence;
    assert_eq!(seq.ticks_per_quarter(), 500);
    assert_eq!(seq.format(), Format::MultiTrack);
    assert_eq!(
        note_ons(&seq),
        vec![(500, 62, 50), (1000, 64, 50), (1500, 67, 50), (2500, 80, 0)]
    );
    assert_eq!(seq.merged()[0].kind, EventKind::patch_change(0, 10));
}

#[test]
fn independent_parser_reads_our_files() {
    let bytes = demo().write().unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    assert_eq!(smf.header.timing, Timing::Metrical(u15::new(500)));
    assert_eq!(smf.tracks.len(), 2);

    let mut tick = 0u32;
    let mut notes = Vec::new();
    for event in &smf.tracks[1] {
        tick += event.delta.as_int();
        if let TrackEventKind::Midi {
            message: MidiMessage::NoteOn { key, vel },
            ..
        } = &event.kind
        {
            notes.push((tick, key.as_int(), vel.as_int()));
        }
    }
    assert_eq!(
        notes,
        vec![(500, 62, 50), (1000, 64, 50), (1500, 67, 50), (2500, 80, 0)]
    );
    assert!(matches!(
        smf.tracks[1].last().map(|e| &e.kind),
        Some(&TrackEventKind::Meta(MetaMessage::EndOfTrack))
    ));
}

#[test]
fn we_read_files_from_an_independent_writer() {
    let midi = |delta: u32, channel: u8, message: MidiMessage| TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        },
    };
    let mut source = Smf::new(Header::new(midly::Format::Parallel, Timing::Metrical(u15::new(96))));
    source.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(400_000))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);
    source.tracks.push(vec![
        midi(0, 3, MidiMessage::NoteOn { key: u7::new(60), vel: u7::new(90) }),
        midi(48, 3, MidiMessage::Controller { controller: u7::new(64), value: u7::new(127) }),
        midi(48, 3, MidiMessage::NoteOff { key: u7::new(60), vel: u7::new(0) }),
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);
    let mut bytes = Vec::new();
    source.write_std(&mut bytes).unwrap();

    let mut seq = Sequence::load(&bytes).unwrap();
    seq.finalize();
    assert_eq!(
        seq.tracks()[0].events[0].kind,
        EventKind::meta(MetaEvent::SetTempo(400_000))
    );
    let track = &seq.tracks()[1].events;
    assert_eq!(
        track.iter().map(|e| e.tick).collect::<Vec<_>>(),
        vec![0, 48, 96]
    );
    assert_eq!(track[0].channel(), Some(3));
    assert!((track[2].time_ms - 400.0).abs() < 1e-9);
}

#[test]
fn appending_after_load_keeps_existing_positions() {
    let bytes = demo().write().unwrap();
    let mut seq = Sequence::load(&bytes).unwrap();
    seq.finalize();
    let before: Vec<(usize, u64)> = seq.merged().iter().map(|e| (e.track, e.tick)).collect();

    let mut tick = seq.last_event().map(|e| e.tick).unwrap_or(0);
    for key in [62, 64, 67] {
        tick += 500;
        seq.add_note(1, tick, 0, key, 50, 500);
    }
    seq.add_note(1, tick + 1000, 0, 80, 0, 500);
    seq.finalize();

    let rewritten = Sequence::load(&seq.write().unwrap()).unwrap();
    let after: Vec<(usize, u64)> = rewritten.merged().iter().map(|e| (e.track, e.tick)).collect();
    assert_eq!(&after[..before.len()], &before[..]);
    assert_eq!(note_ons(&rewritten).len(), 8);
    assert_eq!(rewritten.last_event().map(|e| e.tick), Some(2500 + 500 * 3 + 1000));
}

#[test]
fn vendor_data_survives_a_load_write_cycle() {
    let mut seq = Sequence::new(120).unwrap();
    seq.add_event(0, 0, EventKind::meta(MetaEvent::SequencerSpecific(vec![0x00, 0x20, 0x29, 0x01])));
    seq.add_event(0, 0, EventKind::meta(MetaEvent::Unknown { kind: 0x60, data: vec![1, 2, 3] }));
    seq.add_event(0, 30, EventKind::Escape(vec![0xF3, 0x01]));
    seq.add_event(0, 60, EventKind::meta(MetaEvent::KeySignature { sharps: -3, minor: true }));
    seq.push(Event::at(90, EventKind::note_on(0, 70, 64)));
    seq.finalize();

    for running_status in [true, false] {
        let options = WriteOptions { running_status };
        let bytes = smf::encode(&seq, &options).unwrap();
        let loaded = smf::decode(&bytes).unwrap().sequence;
        assert_eq!(smf::encode(&loaded, &options).unwrap(), bytes);
        assert_eq!(loaded.tracks()[0].events.len(), 5);
    }
}

#[test]
fn structural_errors_abort_the_load() {
    let bytes = demo().write().unwrap();
    assert!(matches!(
        Sequence::load(&bytes[..bytes.len() - 3]),
        Err(tempora::Error::TruncatedData { .. })
    ));
    assert!(matches!(
        Sequence::load(b"MThd\0\0\0\x06\0\x05\0\x01\x01\xE0"),
        Err(tempora::Error::InvalidHeader(_))
    ));
}
