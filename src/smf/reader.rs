use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, warn};

use super::{Decoded, vlq};
use crate::events::{ChannelMessage, Event, EventKind, META_END_OF_TRACK, MetaEvent};
use crate::timing::{Format, Sequence, Track};
use crate::{Error, Result};

fn truncated(context: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |_| Error::TruncatedData { context }
}

struct Header {
    format: Format,
    tracks: u16,
    ticks_per_quarter: u16,
}

fn read_header(cursor: &mut Cursor<&[u8]>) -> Result<Header> {
    let mut id = [0u8; 4];
    cursor
        .read_exact(&mut id)
        .map_err(|_| Error::InvalidHeader("file too short".into()))?;
    if &id != b"MThd" {
        return Err(Error::InvalidHeader("missing MThd chunk".into()));
    }
    let len = cursor.read_u32::<BigEndian>().map_err(truncated("header"))?;
    if len < 6 {
        return Err(Error::InvalidHeader(format!("header length {len} is below 6")));
    }
    let format = cursor.read_u16::<BigEndian>().map_err(truncated("header"))?;
    let tracks = cursor.read_u16::<BigEndian>().map_err(truncated("header"))?;
    let division = cursor.read_u16::<BigEndian>().map_err(truncated("header"))?;

    let format = Format::from_code(format)
        .ok_or_else(|| Error::InvalidHeader(format!("unknown format {format}")))?;
    if division & 0x8000 != 0 {
        return Err(Error::InvalidHeader("SMPTE time division is not supported".into()));
    }
    if division == 0 {
        return Err(Error::InvalidHeader("zero ticks per quarter note".into()));
    }
    if format == Format::SingleTrack && tracks > 1 {
        warn!(tracks, "format 0 file declares more than one track");
    }

    let extra = (len - 6) as u64;
    let end = cursor.position() + extra;
    if end > cursor.get_ref().len() as u64 {
        return Err(Error::TruncatedData { context: "header" });
    }
    cursor.set_position(end);

    Ok(Header {
        format,
        tracks,
        ticks_per_quarter: division,
    })
}

pub(super) fn decode(bytes: &[u8]) -> Result<Decoded> {
    let mut cursor = Cursor::new(bytes);
    let header = read_header(&mut cursor)?;

    let mut tracks = Vec::with_capacity(header.tracks as usize);
    let mut skipped = Vec::new();
    while tracks.len() < header.tracks as usize {
        let mut id = [0u8; 4];
        cursor.read_exact(&mut id).map_err(truncated("chunk header"))?;
        let len = cursor.read_u32::<BigEndian>().map_err(truncated("chunk header"))? as usize;
        let start = cursor.position() as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or(Error::TruncatedData { context: "track chunk" })?;
        cursor.set_position(end as u64);

        if &id != b"MTrk" {
            debug!(chunk = %String::from_utf8_lossy(&id), len, "skipping unknown chunk");
            continue;
        }
        let index = tracks.len();
        tracks.push(read_track(&bytes[start..end], start, index, &mut skipped)?);
    }

    let trailing = bytes.len() - cursor.position() as usize;
    if trailing > 0 {
        debug!(trailing, "ignoring bytes after the last track");
    }

    Ok(Decoded {
        sequence: Sequence::from_parts(header.format, header.ticks_per_quarter, tracks),
        skipped,
    })
}

/// Data bytes following system common status bytes, which have no place in
/// a file and are stepped over.
fn system_common_len(status: u8) -> usize {
    match status {
        0xF1 | 0xF3 => 1,
        0xF2 => 2,
        _ => 0,
    }
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    cursor.read_exact(&mut data).map_err(truncated("event data"))?;
    Ok(data)
}

fn read_track(body: &[u8], base: usize, index: usize, skipped: &mut Vec<Error>) -> Result<Track> {
    let mut cursor = Cursor::new(body);
    let mut tick = 0u64;
    let mut running: Option<u8> = None;
    let mut channel_prefix: Option<u8> = None;
    let mut events = Vec::new();
    let mut end_tick = None;

    while (cursor.position() as usize) < body.len() {
        tick += vlq::read(&mut cursor)? as u64;
        let offset = base + cursor.position() as usize;
        let first = cursor.read_u8().map_err(truncated("event"))?;

        let kind = match first {
            0x00..=0xEF => {
                let (status, d1) = if first & 0x80 != 0 {
                    (first, cursor.read_u8().map_err(truncated("channel message"))?)
                } else if let Some(status) = running {
                    (status, first)
                } else {
                    let err = Error::UnsupportedEventType { status: first, offset };
                    warn!(track = index, tick, "{err}");
                    skipped.push(err);
                    continue;
                };
                running = Some(status);
                let d2 = if ChannelMessage::data_len(status) == 2 {
                    cursor.read_u8().map_err(truncated("channel message"))?
                } else {
                    0
                };
                channel_prefix = None;
                match ChannelMessage::from_data(status, d1, d2) {
                    Some(message) => EventKind::Midi {
                        channel: status & 0x0F,
                        message,
                    },
                    None => continue,
                }
            }
            0xF0 | 0xF7 => {
                running = None;
                let len = vlq::read(&mut cursor)? as usize;
                let data = read_bytes(&mut cursor, len)?;
                if first == 0xF0 {
                    EventKind::SysEx(data)
                } else {
                    EventKind::Escape(data)
                }
            }
            0xFF => {
                running = None;
                let kind = cursor.read_u8().map_err(truncated("meta event"))?;
                let len = vlq::read(&mut cursor)? as usize;
                let data = read_bytes(&mut cursor, len)?;
                if kind == META_END_OF_TRACK {
                    end_tick = Some(tick);
                    break;
                }
                let meta = MetaEvent::decode(kind, &data);
                if let MetaEvent::ChannelPrefix(channel) = meta {
                    channel_prefix = Some(channel & 0x0F);
                }
                EventKind::Meta {
                    channel: channel_prefix,
                    meta,
                }
            }
            status => {
                if status < 0xF8 {
                    running = None;
                }
                let len = system_common_len(status);
                let skip_to = (cursor.position() + len as u64).min(body.len() as u64);
                cursor.set_position(skip_to);
                let err = Error::UnsupportedEventType { status, offset };
                warn!(track = index, tick, "{err}");
                skipped.push(err);
                continue;
            }
        };
        events.push(Event::at(tick, kind).on_track(index));
    }

    let remaining = body.len() - (cursor.position() as usize).min(body.len());
    if end_tick.is_none() {
        debug!(track = index, "track has no end-of-track marker");
    } else if remaining > 0 {
        debug!(track = index, remaining, "ignoring bytes after end-of-track");
    }

    Ok(Track {
        events,
        end_tick: end_tick.unwrap_or(tick),
    })
}
