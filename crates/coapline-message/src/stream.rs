//! Stream framing (RFC 8323 §3.2).
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬────────┬─────────┬─────────┬──────┬─────────┐
//! │ Len (4) │ TKL (4) │ Extended Len │ Code   │ Token   │ Options │ 0xFF │ Payload │
//! │         │         │ (0/1/2/4 B)  │ (1 B)  │ (TKL B) │         │      │         │
//! └─────────┴─────────┴──────────────┴────────┴─────────┴─────────┴──────┴─────────┘
//! ```
//!
//! `Len` counts the options, payload marker and payload. Values 13, 14 and 15
//! escape to 1, 2 or 4 extension bytes holding `Len - 13`, `Len - 269` and
//! `Len - 65805`. There is no message type and no message ID: the stream is
//! reliable and the token is the only correlator.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::code::{Code, MessageType};
use crate::datagram::validate_common;
use crate::error::{CodecError, Result};
use crate::message::{Message, MAX_TOKEN_LEN};
use crate::option::{decode_options_and_payload, encode_options, encoded_options_len};

/// Default maximum frame size accepted by `decode_stream`: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_EXT1_OFFSET: usize = 13;
const LEN_EXT2_OFFSET: usize = 269;
const LEN_EXT4_OFFSET: usize = 65805;

/// Encode a message into the stream wire format.
///
/// `message_type` and `message_id` are not part of the frame.
pub fn encode_stream(msg: &Message) -> Result<Bytes> {
    validate_common(msg)?;

    let payload_len = if msg.payload.is_empty() {
        0
    } else {
        1 + msg.payload.len()
    };
    let body_len = encoded_options_len(&msg.options) + payload_len;

    let (len_nibble, ext_len) = match body_len {
        0..=12 => (body_len as u8, 0),
        13..=268 => (13, 1),
        269..=65804 => (14, 2),
        _ => (15, 4),
    };
    if ext_len == 4 && body_len - LEN_EXT4_OFFSET > u32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            size: body_len,
            max: u32::MAX as usize + LEN_EXT4_OFFSET,
        });
    }

    let mut dst = BytesMut::with_capacity(1 + ext_len + 1 + msg.token.len() + body_len);
    dst.put_u8((len_nibble << 4) | msg.token.len() as u8);
    match ext_len {
        1 => dst.put_u8((body_len - LEN_EXT1_OFFSET) as u8),
        2 => dst.put_u16((body_len - LEN_EXT2_OFFSET) as u16),
        4 => dst.put_u32((body_len - LEN_EXT4_OFFSET) as u32),
        _ => {}
    }
    dst.put_u8(msg.code.0);
    dst.put_slice(&msg.token);
    encode_options(&msg.options, &mut dst);
    if !msg.payload.is_empty() {
        dst.put_u8(0xFF);
        dst.put_slice(&msg.payload);
    }

    Ok(dst.freeze())
}

struct FrameHeader {
    header_len: usize,
    token_len: usize,
    total_len: usize,
}

fn parse_header(src: &[u8], max_frame_size: usize) -> Result<Option<FrameHeader>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let token_len = usize::from(first & 0x0F);
    if token_len > MAX_TOKEN_LEN {
        return Err(CodecError::TokenTooLong(token_len));
    }

    let ext_len = match first >> 4 {
        0..=12 => 0,
        13 => 1,
        14 => 2,
        _ => 4,
    };
    if src.len() < 1 + ext_len {
        return Ok(None);
    }

    let ext = &src[1..1 + ext_len];
    let body_len = match ext_len {
        0 => usize::from(first >> 4),
        1 => usize::from(ext[0]) + LEN_EXT1_OFFSET,
        2 => usize::from(u16::from_be_bytes([ext[0], ext[1]])) + LEN_EXT2_OFFSET,
        _ => u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]]) as usize + LEN_EXT4_OFFSET,
    };

    // length nibble + extension + code + token
    let header_len = 1 + ext_len + 1 + token_len;
    let total_len = header_len + body_len;
    if total_len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: total_len,
            max: max_frame_size,
        });
    }

    Ok(Some(FrameHeader {
        header_len,
        token_len,
        total_len,
    }))
}

/// Size of the first complete frame in `src`.
///
/// Returns `Ok(None)` if `src` does not yet hold the whole frame.
pub fn stream_frame_len(src: &[u8], max_frame_size: usize) -> Result<Option<usize>> {
    Ok(parse_header(src, max_frame_size)?
        .map(|header| header.total_len)
        .filter(|total| src.len() >= *total))
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` without touching `src` while the buffered bytes are
/// fewer than the declared frame size; call again after appending more. On
/// success the frame's bytes are consumed and any following bytes remain.
///
/// The frame carries no message type, so one is inferred: requests decode as
/// Confirmable, responses as Acknowledgement, and empty or signalling
/// messages as NonConfirmable. `message_id` is always 0.
pub fn decode_stream(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Message>> {
    let Some(header) = parse_header(src, max_frame_size)? else {
        trace!(buffered = src.len(), "stream header incomplete");
        return Ok(None);
    };
    if src.len() < header.total_len {
        trace!(
            buffered = src.len(),
            needed = header.total_len,
            "stream frame incomplete"
        );
        return Ok(None);
    }

    let frame = &src[..header.total_len];
    let code = Code(frame[header.header_len - header.token_len - 1]);
    let token_start = header.header_len - header.token_len;
    let token = Bytes::copy_from_slice(&frame[token_start..header.header_len]);
    let (options, payload) = decode_options_and_payload(&frame[header.header_len..])?;

    if code.is_empty() && (!token.is_empty() || !options.is_empty() || !payload.is_empty()) {
        return Err(CodecError::NonEmptyEmptyMessage);
    }

    let message_type = if code.is_request() {
        MessageType::Confirmable
    } else if code.is_response() {
        MessageType::Acknowledgement
    } else {
        MessageType::NonConfirmable
    };

    src.advance(header.total_len);

    Ok(Some(Message {
        message_type,
        code,
        message_id: 0,
        token,
        options,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::content_format;

    fn request_with_payload(len: usize) -> Message {
        Message::confirmable(Code::POST, 0).with_payload(vec![0x5A; len])
    }

    fn decode_all(wire: &[u8]) -> Message {
        let mut buf = BytesMut::from(wire);
        let msg = decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
        msg
    }

    #[test]
    fn encodes_minimal_request() {
        let mut msg = Message::confirmable(Code::GET, 0).with_token(&[0x42][..]);
        msg.set_path_string("a");
        let wire = encode_stream(&msg).unwrap();
        // Len=2 (option header + value), TKL=1, code, token, option
        assert_eq!(wire.as_ref(), &[0x21, 0x01, 0x42, 0xB1, b'a']);
    }

    #[test]
    fn length_escape_boundaries() {
        // body = marker + payload, so payload = body - 1
        let cases: [(usize, &[u8]); 6] = [
            (12, &[0xC0]),
            (13, &[0xD0, 0x00]),
            (268, &[0xD0, 0xFF]),
            (269, &[0xE0, 0x00, 0x00]),
            (65804, &[0xE0, 0xFF, 0xFF]),
            (65805, &[0xF0, 0x00, 0x00, 0x00, 0x00]),
        ];
        for (body, prefix) in cases {
            let msg = request_with_payload(body - 1);
            let wire = encode_stream(&msg).unwrap();
            assert_eq!(&wire[..prefix.len()], prefix, "body length {body}");
            assert_eq!(wire.len(), prefix.len() + 1 + body);
            assert_eq!(decode_all(&wire), msg, "body length {body}");
        }
    }

    #[test]
    fn roundtrip_request_with_options() {
        let mut msg = Message::confirmable(Code::POST, 0)
            .with_token(&b"tok"[..])
            .with_payload(&b"Content sent by client"[..]);
        msg.set_content_format(content_format::TEXT_PLAIN);
        msg.set_path_string("/req/path");

        assert_eq!(decode_all(&encode_stream(&msg).unwrap()), msg);
    }

    #[test]
    fn decoded_type_follows_code_class() {
        let response = Message::new(MessageType::NonConfirmable, Code::CONTENT, 77);
        let decoded = decode_all(&encode_stream(&response).unwrap());
        assert_eq!(decoded.message_type, MessageType::Acknowledgement);
        assert_eq!(decoded.message_id, 0);

        let signal = Message::new(MessageType::Confirmable, Code::new(7, 1), 0);
        let decoded = decode_all(&encode_stream(&signal).unwrap());
        assert_eq!(decoded.message_type, MessageType::NonConfirmable);
    }

    #[test]
    fn partial_frame_is_not_consumed() {
        let mut msg = Message::confirmable(Code::PUT, 0)
            .with_token(&b"\x01\x02"[..])
            .with_payload(vec![0x11; 400]);
        msg.set_path_string("x/y");
        let wire = encode_stream(&msg).unwrap();

        for split in 0..wire.len() {
            let mut buf = BytesMut::from(&wire[..split]);
            assert!(decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE)
                .unwrap()
                .is_none());
            assert_eq!(buf.len(), split, "split at {split} consumed input");

            buf.extend_from_slice(&wire[split..]);
            let decoded = decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, msg);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn consecutive_frames_leave_tail() {
        let first = request_with_payload(3);
        let second = Message::confirmable(Code::DELETE, 0).with_token(&b"t2"[..]);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_stream(&first).unwrap());
        buf.extend_from_slice(&encode_stream(&second).unwrap());
        buf.extend_from_slice(&[0x30]); // start of a third frame

        assert_eq!(
            decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
            Some(first)
        );
        assert_eq!(
            decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
            Some(second)
        );
        assert_eq!(decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(buf.as_ref(), &[0x30]);
    }

    #[test]
    fn frame_len_reports_complete_frames_only() {
        let wire = encode_stream(&request_with_payload(20)).unwrap();
        assert_eq!(stream_frame_len(&wire[..1], DEFAULT_MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(
            stream_frame_len(&wire, DEFAULT_MAX_FRAME_SIZE).unwrap(),
            Some(wire.len())
        );
    }

    #[test]
    fn oversized_frame_rejected_before_buffering() {
        let mut buf = BytesMut::from(&[0xF0, 0x00, 0x10, 0x00, 0x00][..]);
        let err = decode_stream(&mut buf, 1024).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { max: 1024, .. }));
    }

    #[test]
    fn rejects_token_length_nine() {
        let mut buf = BytesMut::from(&[0x09][..]);
        assert_eq!(
            decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap_err(),
            CodecError::TokenTooLong(9)
        );
    }

    #[test]
    fn rejects_marker_with_empty_payload() {
        // Len=1 holding only the payload marker.
        let mut buf = BytesMut::from(&[0x10, 0x02, 0xFF][..]);
        assert_eq!(
            decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap_err(),
            CodecError::EmptyPayload
        );
    }
}
