//! Standard MIDI File tempo scanning.
//!
//! Only the header and the `Set Tempo` meta events are of interest; every
//! other event is decoded just far enough to be skipped.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::err::SmfErr;

use super::tempo::TempoEvent;

const META: u8 = 0xff;
const META_TEMPO: u8 = 0x51;
const META_END_OF_TRACK: u8 = 0x2f;
const SYSEX: u8 = 0xf0;
const SYSEX_ESCAPE: u8 = 0xf7;

#[derive(Clone, Debug, PartialEq)]
pub struct TempoScan {
    pub format: u16,
    pub tracks: u16,
    pub ppq: u32,
    pub events: Vec<TempoEvent>,
}

type Reader<'a> = Cursor<&'a [u8]>;

fn truncated(reader: &Reader) -> SmfErr {
    SmfErr::Truncated(reader.position() as usize)
}

fn read_u8(reader: &mut Reader) -> Result<u8, SmfErr> {
    reader.read_u8().map_err(|_| truncated(reader))
}

fn read_u16(reader: &mut Reader) -> Result<u16, SmfErr> {
    reader.read_u16::<BigEndian>().map_err(|_| truncated(reader))
}

fn read_u32(reader: &mut Reader) -> Result<u32, SmfErr> {
    reader.read_u32::<BigEndian>().map_err(|_| truncated(reader))
}

fn read_tag(reader: &mut Reader) -> Result<[u8; 4], SmfErr> {
    let mut tag = [0; 4];
    reader.read_exact(&mut tag).map_err(|_| truncated(reader))?;
    Ok(tag)
}

/// Variable length quantity, at most four bytes
fn read_var_len(reader: &mut Reader) -> Result<u32, SmfErr> {
    let start = reader.position() as usize;
    let mut value: u32 = 0;
    for _ in 0..4 {
        let byte = read_u8(reader)?;
        value = (value << 7) | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(SmfErr::BadVarLen(start))
}

fn skip(reader: &mut Reader, len: u64) -> Result<(), SmfErr> {
    let end = reader.position() + len;
    if end > reader.get_ref().len() as u64 {
        return Err(truncated(reader));
    }
    reader.set_position(end);
    Ok(())
}

fn channel_data_len(status: u8) -> u64 {
    match status & 0xf0 {
        0xc0 | 0xd0 => 1,
        _ => 2,
    }
}

fn scan_track(data: &[u8], offset: usize, out: &mut Vec<TempoEvent>) -> Result<(), SmfErr> {
    let mut reader = Cursor::new(data);
    let mut tick: u64 = 0;
    let mut running: Option<u8> = None;

    let relocate = |err: SmfErr| match err {
        SmfErr::Truncated(pos) => SmfErr::Truncated(pos + offset),
        SmfErr::BadVarLen(pos) => SmfErr::BadVarLen(pos + offset),
        SmfErr::NoRunningStatus(pos) => SmfErr::NoRunningStatus(pos + offset),
        other => other,
    };

    while (reader.position() as usize) < data.len() {
        tick += u64::from(read_var_len(&mut reader).map_err(relocate)?);
        let pos = reader.position() as usize;
        let status = read_u8(&mut reader).map_err(relocate)?;

        match status {
            META => {
                running = None;
                let kind = read_u8(&mut reader).map_err(relocate)?;
                let len = read_var_len(&mut reader).map_err(relocate)?;
                if kind == META_END_OF_TRACK {
                    break;
                }
                if kind == META_TEMPO && len == 3 {
                    let mut bytes = [0; 3];
                    reader
                        .read_exact(&mut bytes)
                        .map_err(|_| relocate(truncated(&reader)))?;
                    let micros = (u32::from(bytes[0]) << 16)
                        | (u32::from(bytes[1]) << 8)
                        | u32::from(bytes[2]);
                    if micros == 0 {
                        log::warn!(target: "lockstep::smf", "ignoring zero tempo at tick {}", tick);
                    } else {
                        out.push(TempoEvent::new(tick, micros));
                    }
                } else {
                    skip(&mut reader, u64::from(len)).map_err(relocate)?;
                }
            }
            SYSEX | SYSEX_ESCAPE => {
                running = None;
                let len = read_var_len(&mut reader).map_err(relocate)?;
                skip(&mut reader, u64::from(len)).map_err(relocate)?;
            }
            status if status & 0x80 != 0 => {
                running = Some(status);
                skip(&mut reader, channel_data_len(status)).map_err(relocate)?;
            }
            _ => {
                // Running status, the byte just read was the first data byte
                let status = running.ok_or(SmfErr::NoRunningStatus(pos + offset))?;
                skip(&mut reader, channel_data_len(status) - 1).map_err(relocate)?;
            }
        }
    }

    Ok(())
}

/// Collect the time division and every tempo change from a MIDI file
pub fn scan_tempo(bytes: &[u8]) -> Result<TempoScan, SmfErr> {
    let mut reader = Cursor::new(bytes);
    if read_tag(&mut reader).map_err(|_| SmfErr::MissingHeader)? != *b"MThd" {
        return Err(SmfErr::MissingHeader);
    }

    let header_len = read_u32(&mut reader)?;
    let format = read_u16(&mut reader)?;
    let tracks = read_u16(&mut reader)?;
    let division = read_u16(&mut reader)?;
    if header_len > 6 {
        skip(&mut reader, u64::from(header_len - 6))?;
    }

    if division & 0x8000 != 0 {
        return Err(SmfErr::SmpteDivision);
    }
    if division == 0 {
        return Err(SmfErr::ZeroDivision);
    }

    let mut events = Vec::new();
    while bytes.len() - reader.position() as usize >= 8 {
        let tag = read_tag(&mut reader)?;
        let len = read_u32(&mut reader)? as usize;
        let start = reader.position() as usize;
        let end = start + len;
        if end > bytes.len() {
            return Err(SmfErr::Truncated(bytes.len()));
        }
        if tag == *b"MTrk" {
            scan_track(&bytes[start..end], start, &mut events)?;
        }
        reader.set_position(end as u64);
    }

    log::debug!(
        target: "lockstep::smf",
        "scanned {} tracks, ppq {}, {} tempo events",
        tracks,
        division,
        events.len()
    );

    Ok(TempoScan {
        format: format,
        tracks: tracks,
        ppq: u32::from(division),
        events: events,
    })
}
