//! # Session-Layer Framing
//!
//! The frame vocabulary spoken between a device and its bridging agent:
//!
//! | frame      | direction      | layout after the kind byte                    |
//! |------------|----------------|-----------------------------------------------|
//! | `CONNECT`  | device → agent | client key (`u32`)                            |
//! | `CONNACK`  | agent → device | status (`u8`, 0 = accepted)                   |
//! | `ANNOUNCE` | device → agent | name (`u8` len + bytes), namespace (same)     |
//! | `DATA`     | both           | topic (`u8` len + bytes), payload (`u16` len + bytes) |
//!
//! Frames are self-delimiting, so the same incremental parser serves a raw
//! byte stream (serial) and datagrams (UDP): [`decode`] returns `Ok(None)`
//! while a frame is still incomplete and the number of consumed bytes once
//! one has been extracted.

use crate::util;

pub const KIND_CONNECT: u8 = 0x01;
pub const KIND_CONNACK: u8 = 0x02;
pub const KIND_ANNOUNCE: u8 = 0x03;
pub const KIND_DATA: u8 = 0x04;

/// Maximum length of a topic string on the wire.
pub const MAX_TOPIC_LEN: usize = 64;
/// Maximum length of a DATA payload on the wire.
pub const MAX_PAYLOAD_LEN: usize = 256;
/// Maximum length of a node name or namespace on the wire.
pub const MAX_NAME_LEN: usize = 48;

/// A decoded frame, borrowing string and payload data from the parse buffer.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frame<'a> {
    Connect { key: u32 },
    ConnAck { status: u8 },
    Announce { name: &'a str, namespace: &'a str },
    Data { topic: &'a str, payload: &'a [u8] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The kind byte does not name a known frame.
    UnknownKind(u8),
    /// A length field exceeds its wire maximum, or a string is not UTF-8.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The destination buffer cannot hold the encoded frame.
    BufferTooSmall,
    /// A string or payload exceeds its wire maximum.
    FieldTooLong,
}

/// Shorthand for "not enough bytes yet": bail out with `Ok(None)` so the
/// caller keeps accumulating.
macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Attempts to extract one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, `Ok(None)` if the
/// buffer holds only a prefix of a frame, or an error if the bytes can never
/// become a valid frame (the caller is expected to resynchronize by
/// discarding its accumulation buffer).
pub fn decode(buf: &[u8]) -> Result<Option<(Frame<'_>, usize)>, DecodeError> {
    let mut cursor = 0;
    let kind = need!(util::read_u8(&mut cursor, buf));
    match kind {
        KIND_CONNECT => {
            let key = need!(util::read_u32(&mut cursor, buf));
            Ok(Some((Frame::Connect { key }, cursor)))
        }
        KIND_CONNACK => {
            let status = need!(util::read_u8(&mut cursor, buf));
            Ok(Some((Frame::ConnAck { status }, cursor)))
        }
        KIND_ANNOUNCE => {
            let name = need!(read_short_str(&mut cursor, buf, MAX_NAME_LEN)?);
            let namespace = need!(read_short_str(&mut cursor, buf, MAX_NAME_LEN)?);
            Ok(Some((Frame::Announce { name, namespace }, cursor)))
        }
        KIND_DATA => {
            let topic = need!(read_short_str(&mut cursor, buf, MAX_TOPIC_LEN)?);
            let len = need!(util::read_u16(&mut cursor, buf)) as usize;
            if len > MAX_PAYLOAD_LEN {
                return Err(DecodeError::Malformed);
            }
            let payload = need!(util::read_bytes(&mut cursor, buf, len));
            Ok(Some((Frame::Data { topic, payload }, cursor)))
        }
        other => Err(DecodeError::UnknownKind(other)),
    }
}

/// Reads a `u8`-length-prefixed UTF-8 string, enforcing `max`.
fn read_short_str<'a>(
    cursor: &mut usize,
    buf: &'a [u8],
    max: usize,
) -> Result<Option<&'a str>, DecodeError> {
    let len = match util::read_u8(cursor, buf) {
        Some(l) => l as usize,
        None => return Ok(None),
    };
    if len > max {
        return Err(DecodeError::Malformed);
    }
    let bytes = match util::read_bytes(cursor, buf, len) {
        Some(b) => b,
        None => return Ok(None),
    };
    core::str::from_utf8(bytes)
        .map(Some)
        .map_err(|_| DecodeError::Malformed)
}

/// Encodes a CONNECT frame, returning the encoded length.
pub fn encode_connect(buf: &mut [u8], key: u32) -> Result<usize, EncodeError> {
    let mut cursor = 0;
    util::write_u8(&mut cursor, buf, KIND_CONNECT).ok_or(EncodeError::BufferTooSmall)?;
    util::write_u32(&mut cursor, buf, key).ok_or(EncodeError::BufferTooSmall)?;
    Ok(cursor)
}

/// Encodes a CONNACK frame, returning the encoded length.
pub fn encode_connack(buf: &mut [u8], status: u8) -> Result<usize, EncodeError> {
    let mut cursor = 0;
    util::write_u8(&mut cursor, buf, KIND_CONNACK).ok_or(EncodeError::BufferTooSmall)?;
    util::write_u8(&mut cursor, buf, status).ok_or(EncodeError::BufferTooSmall)?;
    Ok(cursor)
}

/// Encodes an ANNOUNCE frame, returning the encoded length.
pub fn encode_announce(buf: &mut [u8], name: &str, namespace: &str) -> Result<usize, EncodeError> {
    let mut cursor = 0;
    util::write_u8(&mut cursor, buf, KIND_ANNOUNCE).ok_or(EncodeError::BufferTooSmall)?;
    write_short_str(&mut cursor, buf, name, MAX_NAME_LEN)?;
    write_short_str(&mut cursor, buf, namespace, MAX_NAME_LEN)?;
    Ok(cursor)
}

/// Encodes a DATA frame, returning the encoded length.
pub fn encode_data(buf: &mut [u8], topic: &str, payload: &[u8]) -> Result<usize, EncodeError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::FieldTooLong);
    }
    let mut cursor = 0;
    util::write_u8(&mut cursor, buf, KIND_DATA).ok_or(EncodeError::BufferTooSmall)?;
    write_short_str(&mut cursor, buf, topic, MAX_TOPIC_LEN)?;
    util::write_u16(&mut cursor, buf, payload.len() as u16).ok_or(EncodeError::BufferTooSmall)?;
    util::write_bytes(&mut cursor, buf, payload).ok_or(EncodeError::BufferTooSmall)?;
    Ok(cursor)
}

fn write_short_str(
    cursor: &mut usize,
    buf: &mut [u8],
    s: &str,
    max: usize,
) -> Result<(), EncodeError> {
    if s.len() > max {
        return Err(EncodeError::FieldTooLong);
    }
    util::write_u8(cursor, buf, s.len() as u8).ok_or(EncodeError::BufferTooSmall)?;
    util::write_bytes(cursor, buf, s.as_bytes()).ok_or(EncodeError::BufferTooSmall)?;
    Ok(())
}
