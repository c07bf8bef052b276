//! Option registry and option encoding.
//!
//! Options are written in ascending number order. Each header carries the
//! delta from the previous option number and the value length as 4-bit
//! nibbles, with 13 and 14 escaping to one or two extension bytes.

use std::ops::RangeInclusive;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

pub const IF_MATCH: u16 = 1;
pub const URI_HOST: u16 = 3;
pub const ETAG: u16 = 4;
pub const IF_NONE_MATCH: u16 = 5;
pub const URI_PORT: u16 = 7;
pub const LOCATION_PATH: u16 = 8;
pub const URI_PATH: u16 = 11;
pub const CONTENT_FORMAT: u16 = 12;
pub const MAX_AGE: u16 = 14;
pub const URI_QUERY: u16 = 15;
pub const ACCEPT: u16 = 17;
pub const LOCATION_QUERY: u16 = 20;
pub const PROXY_URI: u16 = 35;
pub const PROXY_SCHEME: u16 = 39;
pub const SIZE1: u16 = 60;

/// Largest value length the extended length encoding can express.
pub const MAX_VALUE_LEN: usize = 0xFFFF + 269;

/// Registered content formats.
pub mod content_format {
    pub const TEXT_PLAIN: u16 = 0;
    pub const APP_LINK_FORMAT: u16 = 40;
    pub const APP_XML: u16 = 41;
    pub const APP_OCTETS: u16 = 42;
    pub const APP_EXI: u16 = 47;
    pub const APP_JSON: u16 = 50;
    pub const APP_CBOR: u16 = 60;
}

/// Returns a human-readable name for an option number.
pub fn option_name(number: u16) -> &'static str {
    match number {
        IF_MATCH => "If-Match",
        URI_HOST => "Uri-Host",
        ETAG => "ETag",
        IF_NONE_MATCH => "If-None-Match",
        URI_PORT => "Uri-Port",
        LOCATION_PATH => "Location-Path",
        URI_PATH => "Uri-Path",
        CONTENT_FORMAT => "Content-Format",
        MAX_AGE => "Max-Age",
        URI_QUERY => "Uri-Query",
        ACCEPT => "Accept",
        LOCATION_QUERY => "Location-Query",
        PROXY_URI => "Proxy-Uri",
        PROXY_SCHEME => "Proxy-Scheme",
        SIZE1 => "Size1",
        _ => "Unknown",
    }
}

/// Permitted value length for registered options.
pub fn value_length_bounds(number: u16) -> Option<RangeInclusive<usize>> {
    let bounds = match number {
        IF_MATCH => 0..=8,
        URI_HOST => 1..=255,
        ETAG => 1..=8,
        IF_NONE_MATCH => 0..=0,
        URI_PORT => 0..=2,
        LOCATION_PATH | URI_PATH | URI_QUERY | LOCATION_QUERY => 0..=255,
        CONTENT_FORMAT | ACCEPT => 0..=2,
        MAX_AGE | SIZE1 => 0..=4,
        PROXY_URI => 1..=1034,
        PROXY_SCHEME => 1..=255,
        _ => return None,
    };
    Some(bounds)
}

/// Critical options must be understood by the receiver.
pub fn is_critical(number: u16) -> bool {
    number & 0x01 != 0
}

/// Unsafe options must be understood by a proxy forwarding the message.
pub fn is_unsafe(number: u16) -> bool {
    number & 0x02 != 0
}

/// NoCacheKey options are not part of the cache key.
pub fn is_no_cache_key(number: u16) -> bool {
    number & 0x1E == 0x1C
}

/// Encode an unsigned integer option value in minimal big-endian form.
pub fn encode_uint(value: u32) -> Bytes {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Bytes::copy_from_slice(&bytes[skip..])
}

/// Decode an unsigned integer option value. Values wider than 4 bytes are
/// rejected.
pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// A single option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Bytes,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Bytes>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    pub fn uint(number: u16, value: u32) -> Self {
        Self::new(number, encode_uint(value))
    }
}

/// Split a delta or length into its nibble and extension bytes.
fn nibble_for(value: usize) -> (u8, usize) {
    match value {
        0..=12 => (value as u8, 0),
        13..=268 => (13, 1),
        _ => (14, 2),
    }
}

fn put_extension(dst: &mut BytesMut, value: usize, ext_len: usize) {
    match ext_len {
        1 => dst.put_u8((value - 13) as u8),
        2 => dst.put_u16((value - 269) as u16),
        _ => {}
    }
}

/// Check option ordering and value lengths before anything is written.
pub(crate) fn validate_options(options: &[CoapOption]) -> Result<()> {
    let mut previous = 0u16;
    for option in options {
        if option.number < previous {
            return Err(CodecError::OptionsOutOfOrder {
                previous,
                number: option.number,
            });
        }
        let len = option.value.len();
        let bounds = value_length_bounds(option.number).unwrap_or(0..=MAX_VALUE_LEN);
        if !bounds.contains(&len) || len > MAX_VALUE_LEN {
            return Err(CodecError::OptionLength {
                number: option.number,
                len,
                min: *bounds.start(),
                max: (*bounds.end()).min(MAX_VALUE_LEN),
            });
        }
        previous = option.number;
    }
    Ok(())
}

/// Wire size of the encoded option list.
pub(crate) fn encoded_options_len(options: &[CoapOption]) -> usize {
    let mut previous = 0u16;
    options
        .iter()
        .map(|option| {
            let (_, delta_ext) = nibble_for(usize::from(option.number - previous));
            let (_, len_ext) = nibble_for(option.value.len());
            previous = option.number;
            1 + delta_ext + len_ext + option.value.len()
        })
        .sum()
}

/// Write options; callers must have run `validate_options` first.
pub(crate) fn encode_options(options: &[CoapOption], dst: &mut BytesMut) {
    let mut previous = 0u16;
    for option in options {
        let delta = usize::from(option.number - previous);
        let len = option.value.len();
        let (delta_nibble, delta_ext) = nibble_for(delta);
        let (len_nibble, len_ext) = nibble_for(len);

        dst.put_u8((delta_nibble << 4) | len_nibble);
        put_extension(dst, delta, delta_ext);
        put_extension(dst, len, len_ext);
        dst.put_slice(&option.value);
        previous = option.number;
    }
}

fn read_extension(nibble: u8, src: &[u8], pos: &mut usize, what: &'static str) -> Result<u32> {
    match nibble {
        0..=12 => Ok(u32::from(nibble)),
        13 => {
            let byte = *src.get(*pos).ok_or(CodecError::Truncated(what))?;
            *pos += 1;
            Ok(u32::from(byte) + 13)
        }
        14 => {
            let bytes = src
                .get(*pos..*pos + 2)
                .ok_or(CodecError::Truncated(what))?;
            *pos += 2;
            Ok(u32::from(u16::from_be_bytes([bytes[0], bytes[1]])) + 269)
        }
        _ => Err(CodecError::ReservedNibble(what)),
    }
}

/// Decode options and payload from `src`, which starts right after the
/// token.
pub(crate) fn decode_options_and_payload(src: &[u8]) -> Result<(Vec<CoapOption>, Bytes)> {
    let mut options = Vec::new();
    let mut pos = 0usize;
    let mut number = 0u16;

    while pos < src.len() {
        let header = src[pos];
        pos += 1;

        if header == 0xFF {
            let payload = &src[pos..];
            if payload.is_empty() {
                return Err(CodecError::EmptyPayload);
            }
            return Ok((options, Bytes::copy_from_slice(payload)));
        }

        let delta = read_extension(header >> 4, src, &mut pos, "delta")?;
        let len = read_extension(header & 0x0F, src, &mut pos, "length")? as usize;

        let next = u32::from(number) + delta;
        number = u16::try_from(next).map_err(|_| CodecError::OptionNumberOverflow {
            previous: number,
            delta,
        })?;

        let value = src
            .get(pos..pos + len)
            .ok_or(CodecError::Truncated("option value"))?;
        pos += len;
        options.push(CoapOption::new(number, Bytes::copy_from_slice(value)));
    }

    Ok((options, Bytes::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(options: &[CoapOption]) -> Vec<u8> {
        validate_options(options).unwrap();
        let mut buf = BytesMut::new();
        encode_options(options, &mut buf);
        assert_eq!(buf.len(), encoded_options_len(options));
        buf.to_vec()
    }

    #[test]
    fn short_delta_and_length_fit_one_byte() {
        let wire = encode(&[CoapOption::new(URI_PATH, &b"a"[..])]);
        assert_eq!(wire, vec![0xB1, b'a']);
    }

    #[test]
    fn delta_13_uses_one_extension_byte() {
        let wire = encode(&[CoapOption::new(13, Bytes::new())]);
        assert_eq!(wire, vec![0xD0, 0x00]);
    }

    #[test]
    fn delta_269_uses_two_extension_bytes() {
        let wire = encode(&[CoapOption::new(269, Bytes::new())]);
        assert_eq!(wire, vec![0xE0, 0x00, 0x00]);

        let wire = encode(&[CoapOption::new(268, Bytes::new())]);
        assert_eq!(wire, vec![0xD0, 0xFF]);
    }

    #[test]
    fn long_values_use_length_extension() {
        let value = vec![0x55; 300];
        let wire = encode(&[CoapOption::new(100, value.clone())]);
        // delta 100 -> 13 + 87, length 300 -> 14 + 31
        assert_eq!(&wire[..4], &[0xDE, 87, 0x00, 31]);
        assert_eq!(&wire[4..], value.as_slice());
    }

    #[test]
    fn repeated_options_encode_zero_delta() {
        let wire = encode(&[
            CoapOption::new(URI_PATH, &b"a"[..]),
            CoapOption::new(URI_PATH, &b"b"[..]),
        ]);
        assert_eq!(wire, vec![0xB1, b'a', 0x01, b'b']);
    }

    #[test]
    fn descending_numbers_are_rejected() {
        let err = validate_options(&[
            CoapOption::uint(CONTENT_FORMAT, 0),
            CoapOption::new(URI_PATH, &b"a"[..]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CodecError::OptionsOutOfOrder {
                previous: CONTENT_FORMAT,
                number: URI_PATH
            }
        );
    }

    #[test]
    fn registered_option_length_is_enforced() {
        let err = validate_options(&[CoapOption::new(URI_PATH, vec![b'x'; 256])]).unwrap_err();
        assert!(matches!(err, CodecError::OptionLength { number: URI_PATH, len: 256, .. }));

        let err = validate_options(&[CoapOption::new(ETAG, Bytes::new())]).unwrap_err();
        assert!(matches!(err, CodecError::OptionLength { number: ETAG, len: 0, .. }));
    }

    #[test]
    fn unregistered_option_limited_by_wire_format() {
        let err = validate_options(&[CoapOption::new(65000, vec![0; MAX_VALUE_LEN + 1])])
            .unwrap_err();
        assert!(matches!(err, CodecError::OptionLength { .. }));
    }

    #[test]
    fn decode_rejects_reserved_nibbles() {
        assert_eq!(
            decode_options_and_payload(&[0xF0]).unwrap_err(),
            CodecError::ReservedNibble("delta")
        );
        assert_eq!(
            decode_options_and_payload(&[0x0F]).unwrap_err(),
            CodecError::ReservedNibble("length")
        );
    }

    #[test]
    fn decode_rejects_truncated_extension_and_value() {
        assert_eq!(
            decode_options_and_payload(&[0xD0]).unwrap_err(),
            CodecError::Truncated("delta")
        );
        assert_eq!(
            decode_options_and_payload(&[0xB3, b'a']).unwrap_err(),
            CodecError::Truncated("option value")
        );
    }

    #[test]
    fn decode_rejects_number_overflow() {
        // 65000 via two-byte delta, then another large delta.
        let mut wire = vec![0xE0];
        wire.extend_from_slice(&(65000u16 - 269).to_be_bytes());
        wire.push(0xE0);
        wire.extend_from_slice(&(1000u16 - 269).to_be_bytes());
        let err = decode_options_and_payload(&wire).unwrap_err();
        assert!(matches!(err, CodecError::OptionNumberOverflow { previous: 65000, .. }));
    }

    #[test]
    fn decode_rejects_marker_without_payload() {
        assert_eq!(
            decode_options_and_payload(&[0xB1, b'a', 0xFF]).unwrap_err(),
            CodecError::EmptyPayload
        );
    }

    #[test]
    fn uint_values_are_minimal() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(42).as_ref(), &[42]);
        assert_eq!(encode_uint(0x0102).as_ref(), &[1, 2]);
        assert_eq!(decode_uint(&[1, 2]), Some(0x0102));
        assert_eq!(decode_uint(&[]), Some(0));
        assert_eq!(decode_uint(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn option_number_classes() {
        assert!(is_critical(URI_PATH));
        assert!(!is_critical(CONTENT_FORMAT));
        assert!(is_unsafe(URI_HOST));
        assert!(is_no_cache_key(SIZE1));
        assert!(!is_no_cache_key(URI_PATH));
    }
}
