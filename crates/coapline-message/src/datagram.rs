//! Datagram framing (RFC 7252 §3).
//!
//! ```text
//!  0                   1                   2                   3
//! ┌───┬───┬───────┬───────────────┬───────────────────────────────┐
//! │Ver│ T │  TKL  │     Code      │          Message ID           │
//! ├───┴───┴───────┴───────────────┴───────────────────────────────┤
//! │ Token (TKL bytes) ...                                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Options ...                                                   │
//! ├───────────────┬───────────────────────────────────────────────┤
//! │ 0xFF          │ Payload ...                                   │
//! └───────────────┴───────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::code::{Code, MessageType};
use crate::error::{CodecError, Result};
use crate::message::{Message, MAX_TOKEN_LEN};
use crate::option::{decode_options_and_payload, encode_options, encoded_options_len, validate_options};

/// Fixed header: version/type/token length (1) + code (1) + message ID (2).
pub const HEADER_SIZE: usize = 4;

/// Protocol version carried in the top two header bits.
pub const VERSION: u8 = 1;

/// Largest datagram encoded or decoded: the 16-bit UDP length limit.
///
/// A receive buffer of this size never truncates a packet.
pub const MAX_PACKET_LEN: usize = 65_535;

pub(crate) fn validate_common(msg: &Message) -> Result<()> {
    if msg.token.len() > MAX_TOKEN_LEN {
        return Err(CodecError::TokenTooLong(msg.token.len()));
    }
    if msg.code.is_empty()
        && (!msg.token.is_empty() || !msg.options.is_empty() || !msg.payload.is_empty())
    {
        return Err(CodecError::NonEmptyEmptyMessage);
    }
    validate_options(&msg.options)
}

/// Encode a message into the datagram wire format.
pub fn encode_datagram(msg: &Message) -> Result<Bytes> {
    validate_common(msg)?;

    let payload_len = if msg.payload.is_empty() {
        0
    } else {
        1 + msg.payload.len()
    };
    let size = HEADER_SIZE + msg.token.len() + encoded_options_len(&msg.options) + payload_len;
    if size > MAX_PACKET_LEN {
        return Err(CodecError::DatagramTooLarge {
            size,
            max: MAX_PACKET_LEN,
        });
    }
    let mut dst = BytesMut::with_capacity(size);

    dst.put_u8((VERSION << 6) | (msg.message_type.as_bits() << 4) | msg.token.len() as u8);
    dst.put_u8(msg.code.0);
    dst.put_u16(msg.message_id);
    dst.put_slice(&msg.token);
    encode_options(&msg.options, &mut dst);
    if !msg.payload.is_empty() {
        dst.put_u8(0xFF);
        dst.put_slice(&msg.payload);
    }

    Ok(dst.freeze())
}

/// Decode one datagram.
pub fn decode_datagram(src: &[u8]) -> Result<Message> {
    if src.len() < HEADER_SIZE {
        return Err(CodecError::Truncated("header"));
    }
    if src.len() > MAX_PACKET_LEN {
        return Err(CodecError::DatagramTooLarge {
            size: src.len(),
            max: MAX_PACKET_LEN,
        });
    }

    let version = src[0] >> 6;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let message_type = MessageType::from_bits(src[0] >> 4);
    let token_len = usize::from(src[0] & 0x0F);
    if token_len > MAX_TOKEN_LEN {
        return Err(CodecError::TokenTooLong(token_len));
    }
    let code = Code(src[1]);
    let message_id = u16::from_be_bytes([src[2], src[3]]);

    let rest = &src[HEADER_SIZE..];
    if rest.len() < token_len {
        return Err(CodecError::Truncated("token"));
    }
    let token = Bytes::copy_from_slice(&rest[..token_len]);
    let (options, payload) = decode_options_and_payload(&rest[token_len..])?;

    if code.is_empty() && (token_len != 0 || !options.is_empty() || !payload.is_empty()) {
        return Err(CodecError::NonEmptyEmptyMessage);
    }

    Ok(Message {
        message_type,
        code,
        message_id,
        token,
        options,
        payload,
    })
}
