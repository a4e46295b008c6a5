use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

use super::{WriteOptions, vlq};
use crate::events::{Event, EventKind, META_END_OF_TRACK};
use crate::timing::{Format, Sequence, Track};
use crate::{Error, Result};

pub(super) fn encode(sequence: &Sequence, options: &WriteOptions) -> Result<Vec<u8>> {
    let tracks = sequence.tracks();
    if sequence.format() == Format::SingleTrack && tracks.len() > 1 {
        warn!(tracks = tracks.len(), "format 0 sequence holds more than one track");
    }

    let mut out = Vec::with_capacity(14 + tracks.iter().map(|t| t.events.len() * 4 + 12).sum::<usize>());
    out.extend_from_slice(b"MThd");
    let mut header = [0u8; 10];
    BigEndian::write_u32(&mut header[0..4], 6);
    BigEndian::write_u16(&mut header[4..6], sequence.format().code());
    BigEndian::write_u16(&mut header[6..8], tracks.len().min(u16::MAX as usize) as u16);
    BigEndian::write_u16(&mut header[8..10], sequence.ticks_per_quarter());
    out.extend_from_slice(&header);

    for (index, track) in tracks.iter().enumerate() {
        write_track(&mut out, index, track, options)?;
    }
    Ok(out)
}

fn write_track(out: &mut Vec<u8>, index: usize, track: &Track, options: &WriteOptions) -> Result<()> {
    out.extend_from_slice(b"MTrk");
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    let body_start = out.len();

    // Tick order only: priority ordering is `finalize`'s job, and a loaded
    // file must come back out in the order it was read.
    let mut events: Vec<&Event> = track.events.iter().collect();
    events.sort_by_key(|e| e.tick);

    let mut last_tick = 0u64;
    let mut running: Option<u8> = None;
    for event in events {
        write_delta(out, index, event.tick - last_tick)?;
        last_tick = event.tick;
        write_event(out, &event.kind, &mut running, options);
    }

    let end_tick = track.end_tick.max(last_tick);
    write_delta(out, index, end_tick - last_tick)?;
    out.extend_from_slice(&[0xFF, META_END_OF_TRACK, 0x00]);

    let body_len = (out.len() - body_start) as u32;
    BigEndian::write_u32(&mut out[len_at..len_at + 4], body_len);
    Ok(())
}

/// Refuses gaps a delta time cannot hold rather than shifting every later
/// event of the track.
fn write_delta(out: &mut Vec<u8>, track: usize, delta: u64) -> Result<()> {
    let delta = u32::try_from(delta)
        .ok()
        .filter(|&d| d <= vlq::MAX)
        .ok_or(Error::DeltaTooLarge { track, delta })?;
    vlq::write(delta, out);
    Ok(())
}

fn write_event(out: &mut Vec<u8>, kind: &EventKind, running: &mut Option<u8>, options: &WriteOptions) {
    match kind {
        EventKind::Midi { channel, message } => {
            let status = message.status_nibble() | (channel & 0x0F);
            if !(options.running_status && *running == Some(status)) {
                out.push(status);
            }
            *running = Some(status);
            message.write_data(out);
        }
        EventKind::Meta { meta, .. } => {
            *running = None;
            let data = meta.encode_data();
            out.extend_from_slice(&[0xFF, meta.kind_byte()]);
            vlq::write(data.len() as u32, out);
            out.extend_from_slice(&data);
        }
        EventKind::SysEx(data) | EventKind::Escape(data) => {
            *running = None;
            out.push(if matches!(kind, EventKind::SysEx(_)) { 0xF0 } else { 0xF7 });
            vlq::write(data.len() as u32, out);
            out.extend_from_slice(data);
        }
    }
}
