/// Errors that can occur while encoding or decoding CoAP messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended before a complete structure could be read.
    #[error("message truncated: {0}")]
    Truncated(&'static str),

    /// The datagram header carries a protocol version other than 1.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Token longer than 8 bytes, on the wire or in a message being encoded.
    #[error("token too long ({0} bytes, max 8)")]
    TokenTooLong(usize),

    /// An option header used the reserved nibble value 15.
    #[error("reserved option {0} nibble (15)")]
    ReservedNibble(&'static str),

    /// Accumulated option deltas ran past the 16-bit option number space.
    #[error("option number overflow (previous {previous}, delta {delta})")]
    OptionNumberOverflow { previous: u16, delta: u32 },

    /// A payload marker was present but no payload bytes followed it.
    #[error("payload marker followed by empty payload")]
    EmptyPayload,

    /// Options were not in non-decreasing option-number order.
    #[error("option {number} follows option {previous} (options must be ascending)")]
    OptionsOutOfOrder { previous: u16, number: u16 },

    /// An option value is outside the length range permitted for it.
    #[error("option {number} value length {len} outside permitted range {min}..={max}")]
    OptionLength {
        number: u16,
        len: usize,
        min: usize,
        max: usize,
    },

    /// An empty message (code 0.00) carried a token, options or payload.
    #[error("empty message must not carry token, options or payload")]
    NonEmptyEmptyMessage,

    /// A stream frame declared a size larger than the receiver accepts.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A datagram is larger than the UDP length field allows.
    #[error("datagram too large ({size} bytes, max {max})")]
    DatagramTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;
