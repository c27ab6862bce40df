//! OSC 1.0 binary codec
//!
//! Layout of a message:
//!
//! ```text
//! address\0 (padded to 4) | ,tags\0 (padded to 4) | payloads in tag order
//! ```
//!
//! `i` and `f` are 4-byte big-endian, `s` is a padded null-terminated string,
//! `b` is a 4-byte big-endian length followed by padded bytes, and `T F N I`
//! carry no payload. A bundle is `#bundle\0`, an 8-byte time tag, then
//! elements each prefixed with a 4-byte size.
//!
//! Decoding is all-or-nothing: any inconsistency fails the whole packet.

use crate::address::is_valid_address;
use crate::error::DecodeError;
use crate::types::{tag, Argument, Bundle, Message, Packet, TimeTag};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bundle header, including its null terminator
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Deepest bundle nesting accepted by the decoder
pub const MAX_BUNDLE_DEPTH: usize = 16;

type DecodeResult<T> = std::result::Result<T, DecodeError>;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Encode a single message
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(estimate_message_size(message));
    encode_message_to_buf(&mut buf, message)?;
    Ok(buf.freeze())
}

/// Encode a message or bundle
pub fn encode_packet(packet: &Packet) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    encode_packet_to_buf(&mut buf, packet)?;
    Ok(buf.freeze())
}

/// Decode a datagram that must hold a single message
pub fn decode(bytes: &[u8]) -> DecodeResult<Message> {
    match decode_packet(bytes)? {
        Packet::Message(m) => Ok(m),
        Packet::Bundle(_) => Err(DecodeError::UnexpectedBundle),
    }
}

/// Decode a datagram holding a message or a bundle
pub fn decode_packet(bytes: &[u8]) -> DecodeResult<Packet> {
    decode_packet_at_depth(bytes, 0)
}

// ============================================================================
// ENCODING
// ============================================================================

#[inline]
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn estimate_message_size(msg: &Message) -> usize {
    let payload: usize = msg
        .args
        .iter()
        .map(|a| match a {
            Argument::String(s) => padded_len(s.len() + 1),
            Argument::Blob(b) => 4 + padded_len(b.len()),
            Argument::Int32(_) | Argument::Float32(_) => 4,
            _ => 0,
        })
        .sum();
    padded_len(msg.address.len() + 1) + padded_len(msg.args.len() + 2) + payload
}

fn encode_packet_to_buf(buf: &mut BytesMut, packet: &Packet) -> Result<()> {
    match packet {
        Packet::Message(m) => encode_message_to_buf(buf, m),
        Packet::Bundle(b) => encode_bundle_to_buf(buf, b),
    }
}

fn encode_message_to_buf(buf: &mut BytesMut, msg: &Message) -> Result<()> {
    if !is_valid_address(&msg.address) {
        return Err(Error::InvalidAddress(msg.address.clone()));
    }
    encode_string(buf, &msg.address)?;
    encode_string(buf, &msg.type_tags())?;
    for arg in &msg.args {
        encode_argument(buf, arg)?;
    }
    Ok(())
}

fn encode_bundle_to_buf(buf: &mut BytesMut, bundle: &Bundle) -> Result<()> {
    buf.put_slice(BUNDLE_TAG);
    buf.put_u64(bundle.timetag.0);
    for packet in &bundle.content {
        // Size prefix is patched once the element is written
        let start = buf.len();
        buf.put_i32(0);
        encode_packet_to_buf(buf, packet)?;
        let size = buf.len() - start - 4;
        let size = i32::try_from(size)
            .map_err(|_| Error::Encode(format!("bundle element too large: {} bytes", size)))?;
        buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
    }
    Ok(())
}

fn encode_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::Encode(format!("string contains a null byte: {:?}", s)));
    }
    buf.put_slice(s.as_bytes());
    let padded = padded_len(s.len() + 1);
    buf.put_bytes(0, padded - s.len());
    Ok(())
}

fn encode_argument(buf: &mut BytesMut, arg: &Argument) -> Result<()> {
    match arg {
        Argument::Int32(i) => buf.put_i32(*i),
        Argument::Float32(f) => buf.put_f32(*f),
        Argument::String(s) => encode_string(buf, s)?,
        Argument::Blob(b) => {
            let len = i32::try_from(b.len())
                .map_err(|_| Error::Encode(format!("blob too large: {} bytes", b.len())))?;
            buf.put_i32(len);
            buf.put_slice(b);
            buf.put_bytes(0, padded_len(b.len()) - b.len());
        }
        Argument::True | Argument::False | Argument::Nil | Argument::Impulse => {}
    }
    Ok(())
}

// ============================================================================
// DECODING
// ============================================================================

fn decode_packet_at_depth(bytes: &[u8], depth: usize) -> DecodeResult<Packet> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::Misaligned(bytes.len()));
    }

    if bytes.starts_with(BUNDLE_TAG) {
        decode_bundle(bytes, depth).map(Packet::Bundle)
    } else {
        decode_message(bytes).map(Packet::Message)
    }
}

fn decode_message(bytes: &[u8]) -> DecodeResult<Message> {
    let mut buf = bytes;

    let address = read_string(&mut buf)?;
    if !is_valid_address(&address) {
        return Err(DecodeError::InvalidAddress(address));
    }

    // Pre-1.0 senders may omit the type tag string entirely
    let mut args = Vec::new();
    if buf.has_remaining() {
        let tags = read_string(&mut buf)?;
        if !tags.starts_with(',') {
            return Err(DecodeError::MissingTypeTags(tags));
        }
        args.reserve(tags.len() - 1);
        for t in tags.bytes().skip(1) {
            args.push(read_argument(&mut buf, t)?);
        }
    }

    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }

    Ok(Message { address, args })
}

fn decode_bundle(bytes: &[u8], depth: usize) -> DecodeResult<Bundle> {
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(DecodeError::InvalidBundle(format!(
            "nested deeper than {} levels",
            MAX_BUNDLE_DEPTH
        )));
    }

    let mut buf = &bytes[BUNDLE_TAG.len()..];
    ensure(buf, 8)?;
    let timetag = TimeTag(buf.get_u64());

    let mut content = Vec::new();
    while buf.has_remaining() {
        ensure(buf, 4)?;
        let size = buf.get_i32();
        if size < 0 {
            return Err(DecodeError::InvalidBundle(format!(
                "negative element size {}",
                size
            )));
        }
        let size = size as usize;
        ensure(buf, size)?;
        content.push(decode_packet_at_depth(&buf[..size], depth + 1)?);
        buf.advance(size);
    }

    Ok(Bundle { timetag, content })
}

fn read_argument(buf: &mut &[u8], type_tag: u8) -> DecodeResult<Argument> {
    match type_tag {
        tag::INT32 => {
            ensure(buf, 4)?;
            Ok(Argument::Int32(buf.get_i32()))
        }
        tag::FLOAT32 => {
            ensure(buf, 4)?;
            Ok(Argument::Float32(buf.get_f32()))
        }
        tag::STRING => read_string(buf).map(Argument::String),
        tag::BLOB => {
            ensure(buf, 4)?;
            let len = buf.get_i32();
            if len < 0 {
                return Err(DecodeError::NegativeLength(len));
            }
            let len = len as usize;
            ensure(buf, padded_len(len))?;
            let data = buf[..len].to_vec();
            buf.advance(padded_len(len));
            Ok(Argument::Blob(data))
        }
        tag::TRUE => Ok(Argument::True),
        tag::FALSE => Ok(Argument::False),
        tag::NIL => Ok(Argument::Nil),
        tag::IMPULSE => Ok(Argument::Impulse),
        other => Err(DecodeError::UnknownTypeTag(other as char)),
    }
}

/// Read a null-terminated, 4-byte padded string
fn read_string(buf: &mut &[u8]) -> DecodeResult<String> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::UnterminatedString)?;
    let padded = padded_len(nul + 1);
    ensure(buf, padded)?;

    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    buf.advance(padded);
    Ok(s)
}

#[inline]
fn ensure(buf: &[u8], needed: usize) -> DecodeResult<()> {
    if buf.len() < needed {
        Err(DecodeError::BufferTooSmall {
            needed,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let msg = Message::new("/foo").with_int(1000).with_float(0.5);
        let bytes = encode(&msg).unwrap();

        assert_eq!(&bytes[0..8], b"/foo\0\0\0\0");
        assert_eq!(&bytes[8..12], b",if\0");
        assert_eq!(&bytes[12..16], &1000i32.to_be_bytes());
        assert_eq!(&bytes[16..20], &0.5f32.to_be_bytes());
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn test_string_padding() {
        // 4 chars + nul needs a full extra word
        let bytes = encode(&Message::new("/abc")).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..8], b"/abc\0\0\0\0");
        assert_eq!(&bytes[8..], b",\0\0\0");

        let bytes = encode(&Message::new("/ab")).unwrap();
        assert_eq!(&bytes[..4], b"/ab\0");
    }

    #[test]
    fn test_blob_padding() {
        let msg = Message::new("/b").with_arg(vec![1u8, 2, 3, 4, 5]);
        let bytes = encode(&msg).unwrap();
        // "/b\0\0" ",b\0\0" len(4) data(5) pad(3)
        assert_eq!(bytes.len(), 4 + 4 + 4 + 8);
        assert_eq!(&bytes[8..12], &5i32.to_be_bytes());
        assert_eq!(&bytes[17..20], &[0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_without_type_tags() {
        let msg = decode(b"/old\0\0\0\0").unwrap();
        assert_eq!(msg.address, "/old");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_encode_rejects_unencodable() {
        let msg = Message::new("/a").with_arg("bad\0string");
        assert!(matches!(encode(&msg), Err(Error::Encode(_))));

        for address in ["", "no/slash", "/has/*"] {
            assert_eq!(
                encode(&Message::new(address)),
                Err(Error::InvalidAddress(address.to_string()))
            );
        }
    }

    #[test]
    fn test_decode_truncated_type_tags() {
        let msg = (1..=5).fold(Message::new("/truncate"), |m, i| m.with_int(i));
        let bytes = encode(&msg).unwrap();
        // Cut in the middle of the type tag string
        let cut = &bytes[..14];
        assert!(decode(cut).is_err());
        // Word-aligned cut inside ",iiiii"
        let cut = &bytes[..16];
        assert!(matches!(decode(cut), Err(DecodeError::UnterminatedString)));
    }

    #[test]
    fn test_decode_misaligned() {
        assert_eq!(decode(b"/ab\0x"), Err(DecodeError::Misaligned(5)));
        assert_eq!(decode(b""), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let bytes = b"/a\0\0,q\0\0";
        assert_eq!(decode(bytes), Err(DecodeError::UnknownTypeTag('q')));
    }

    #[test]
    fn test_decode_invalid_address() {
        assert!(matches!(
            decode(b"abc\0,\0\0\0"),
            Err(DecodeError::InvalidAddress(_))
        ));
        assert!(matches!(
            decode(b"/a/*\0\0\0\0,\0\0\0"),
            Err(DecodeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_decode_missing_payload() {
        let bytes = b"/a\0\0,i\0\0";
        assert_eq!(
            decode(bytes),
            Err(DecodeError::BufferTooSmall { needed: 4, have: 0 })
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = encode(&Message::new("/a").with_int(1)).unwrap().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes(4)));
    }

    #[test]
    fn test_decode_negative_blob() {
        let mut bytes = b"/a\0\0,b\0\0".to_vec();
        bytes.extend_from_slice(&(-4i32).to_be_bytes());
        assert_eq!(decode(&bytes), Err(DecodeError::NegativeLength(-4)));
    }

    #[test]
    fn test_bundle_layout() {
        let bundle = Bundle::new(TimeTag::IMMEDIATE).with_packet(Message::new("/x").with_int(7));
        let bytes = encode_packet(&Packet::Bundle(bundle.clone())).unwrap();

        assert_eq!(&bytes[..8], BUNDLE_TAG);
        assert_eq!(&bytes[8..16], &1u64.to_be_bytes());
        assert_eq!(&bytes[16..20], &12i32.to_be_bytes());
        assert_eq!(bytes.len(), 32);

        assert_eq!(decode_packet(&bytes).unwrap(), Packet::Bundle(bundle));
        assert_eq!(decode(&bytes), Err(DecodeError::UnexpectedBundle));
    }

    #[test]
    fn test_bundle_element_overrun() {
        let mut bytes = BUNDLE_TAG.to_vec();
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&64i32.to_be_bytes());
        bytes.extend_from_slice(b"/a\0\0");
        assert!(matches!(
            decode_packet(&bytes),
            Err(DecodeError::BufferTooSmall { needed: 64, .. })
        ));
    }

    #[test]
    fn test_bundle_depth_limit() {
        let mut packet = Packet::Message(Message::new("/deep"));
        for _ in 0..MAX_BUNDLE_DEPTH + 1 {
            packet = Packet::Bundle(Bundle::new(TimeTag::IMMEDIATE).with_packet(packet));
        }
        let bytes = encode_packet(&packet).unwrap();
        assert!(matches!(
            decode_packet(&bytes),
            Err(DecodeError::InvalidBundle(_))
        ));
    }
}
