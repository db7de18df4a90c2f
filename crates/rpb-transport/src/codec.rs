//! Strict OSC 1.0 packet decoding
//!
//! Packet layout:
//! ```text
//! message: address pattern (string) | type tag string (",...") | arguments
//! bundle:  "#bundle\0" | time tag (u32 seconds, u32 fraction) | elements
//! element: size (int32, multiple of 4, >= 4) | message or bundle
//! string:  bytes, NUL terminated, zero padded to a multiple of 4
//! blob:    size (int32) | bytes, zero padded to a multiple of 4
//! ```
//!
//! Only the `i`, `f`, `s`, `b` and `r` argument types are accepted. Unlike a
//! lenient decoder, any structural violation rejects the whole packet.

use bytes::Buf;
use rosc::{OscBundle, OscColor, OscMessage, OscPacket, OscTime, OscType};
use thiserror::Error;

use crate::Result;

/// Bundle identifier string
pub const BUNDLE_TAG: &str = "#bundle";

/// Smallest buffer that can hold an OSC element
pub const MIN_PACKET_SIZE: usize = 4;

/// Reasons a buffer is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("packet size {0} is not a positive multiple of 4")]
    Misaligned(usize),

    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("string is not null terminated")]
    UnterminatedString,

    #[error("string is not valid utf-8")]
    InvalidString,

    #[error("non-zero padding bytes")]
    BadPadding,

    #[error("expected type tag string")]
    MissingTypeTags,

    #[error("unsupported type tag '{0}'")]
    UnsupportedTypeTag(char),

    #[error("invalid bundle header")]
    BadBundleHeader,

    #[error("invalid bundle element size {0}")]
    BadElementSize(i32),

    #[error("invalid blob size {0}")]
    BadBlobSize(i32),

    #[error("unknown element starting with 0x{0:02x}")]
    UnknownElement(u8),

    #[error("{0} unread bytes after element")]
    TrailingBytes(usize),
}

type DecodeResult<T> = std::result::Result<T, FormatError>;

/// Decode one datagram into a message or bundle
pub fn decode(data: &[u8]) -> DecodeResult<OscPacket> {
    if data.is_empty() || data.len() % 4 != 0 {
        return Err(FormatError::Misaligned(data.len()));
    }
    decode_element(data)
}

/// Encode a packet for the wire
pub fn encode(packet: &OscPacket) -> Result<Vec<u8>> {
    Ok(rosc::encoder::encode(packet)?)
}

fn decode_element(data: &[u8]) -> DecodeResult<OscPacket> {
    match data.first() {
        Some(b'/') => decode_message(data).map(OscPacket::Message),
        Some(b'#') => decode_bundle(data).map(OscPacket::Bundle),
        Some(other) => Err(FormatError::UnknownElement(*other)),
        None => Err(FormatError::BufferTooSmall { needed: 4, have: 0 }),
    }
}

fn decode_message(data: &[u8]) -> DecodeResult<OscMessage> {
    let mut buf = data;
    let addr = read_string(&mut buf)?;

    if buf.remaining() < 4 {
        return Err(FormatError::MissingTypeTags);
    }
    let tags = read_string(&mut buf)?;
    let tags = tags.strip_prefix(',').ok_or(FormatError::MissingTypeTags)?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        args.push(read_argument(&mut buf, tag)?);
    }

    if buf.has_remaining() {
        return Err(FormatError::TrailingBytes(buf.remaining()));
    }

    Ok(OscMessage { addr, args })
}

fn decode_bundle(data: &[u8]) -> DecodeResult<OscBundle> {
    let mut buf = data;
    if read_string(&mut buf)? != BUNDLE_TAG {
        return Err(FormatError::BadBundleHeader);
    }

    ensure_remaining(&buf, 8)?;
    let timetag = OscTime {
        seconds: buf.get_u32(),
        fractional: buf.get_u32(),
    };

    let mut content = Vec::new();
    while buf.has_remaining() {
        ensure_remaining(&buf, 4)?;
        let size = buf.get_i32();
        if size < MIN_PACKET_SIZE as i32 || size % 4 != 0 {
            return Err(FormatError::BadElementSize(size));
        }
        let size = size as usize;
        ensure_remaining(&buf, size)?;
        content.push(decode_element(&buf[..size])?);
        buf.advance(size);
    }

    Ok(OscBundle { timetag, content })
}

fn read_argument(buf: &mut &[u8], tag: char) -> DecodeResult<OscType> {
    match tag {
        'i' => {
            ensure_remaining(buf, 4)?;
            Ok(OscType::Int(buf.get_i32()))
        }
        'f' => {
            ensure_remaining(buf, 4)?;
            Ok(OscType::Float(buf.get_f32()))
        }
        's' => read_string(buf).map(OscType::String),
        'b' => read_blob(buf).map(OscType::Blob),
        'r' => {
            ensure_remaining(buf, 4)?;
            Ok(OscType::Color(OscColor {
                red: buf.get_u8(),
                green: buf.get_u8(),
                blue: buf.get_u8(),
                alpha: buf.get_u8(),
            }))
        }
        other => Err(FormatError::UnsupportedTypeTag(other)),
    }
}

fn read_string(buf: &mut &[u8]) -> DecodeResult<String> {
    let chunk = buf.chunk();
    let nul = chunk
        .iter()
        .position(|b| *b == 0)
        .ok_or(FormatError::UnterminatedString)?;
    let padded = padded_len(nul + 1);
    ensure_remaining(buf, padded)?;
    if chunk[nul..padded].iter().any(|b| *b != 0) {
        return Err(FormatError::BadPadding);
    }

    let s = std::str::from_utf8(&chunk[..nul])
        .map_err(|_| FormatError::InvalidString)?
        .to_owned();
    buf.advance(padded);
    Ok(s)
}

fn read_blob(buf: &mut &[u8]) -> DecodeResult<Vec<u8>> {
    ensure_remaining(buf, 4)?;
    let size = buf.get_i32();
    if size < 0 {
        return Err(FormatError::BadBlobSize(size));
    }
    let size = size as usize;
    let padded = padded_len(size);
    ensure_remaining(buf, padded)?;
    if buf[size..padded].iter().any(|b| *b != 0) {
        return Err(FormatError::BadPadding);
    }

    let blob = buf[..size].to_vec();
    buf.advance(padded);
    Ok(blob)
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn ensure_remaining(buf: &&[u8], needed: usize) -> DecodeResult<()> {
    if buf.remaining() < needed {
        return Err(FormatError::BufferTooSmall {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// Messages of a packet in wire order, bundles unrolled recursively
pub fn flatten(packet: &OscPacket) -> Vec<&OscMessage> {
    let mut messages = Vec::new();
    collect_messages(packet, &mut messages);
    messages
}

fn collect_messages<'a>(packet: &'a OscPacket, out: &mut Vec<&'a OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for element in &bundle.content {
                collect_messages(element, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn test_read_string_exact_padding() {
        let mut buf: &[u8] = b"/abc\0\0\0\0rest";
        assert_eq!(read_string(&mut buf).unwrap(), "/abc");
        assert_eq!(buf, b"rest");
    }

    #[test]
    fn test_read_string_dirty_padding() {
        let mut buf: &[u8] = b"/ab\0/x\0x";
        assert_eq!(read_string(&mut buf).unwrap(), "/ab");
        assert_eq!(read_string(&mut buf), Err(FormatError::BadPadding));
    }

    #[test]
    fn test_flatten_nested_bundle() {
        let inner = OscPacket::Bundle(OscBundle {
            timetag: OscTime { seconds: 0, fractional: 1 },
            content: vec![OscPacket::Message(OscMessage {
                addr: "/b".to_string(),
                args: vec![],
            })],
        });
        let outer = OscPacket::Bundle(OscBundle {
            timetag: OscTime { seconds: 0, fractional: 1 },
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: "/a".to_string(),
                    args: vec![],
                }),
                inner,
            ],
        });

        let addrs: Vec<&str> = flatten(&outer).iter().map(|m| m.addr.as_str()).collect();
        assert_eq!(addrs, vec!["/a", "/b"]);
    }
}
