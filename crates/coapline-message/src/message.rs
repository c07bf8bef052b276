use bytes::Bytes;

use crate::code::{Code, MessageType};
use crate::option::{self, decode_uint, CoapOption};

/// Maximum token length in bytes.
pub const MAX_TOKEN_LEN: usize = 8;

/// A CoAP message.
///
/// The same shape is used for both framings. The stream framing does not
/// carry `message_type` or `message_id` on the wire; see
/// [`decode_stream`](crate::stream::decode_stream) for how they are filled in
/// on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Bytes,
    /// Options in non-decreasing number order.
    pub options: Vec<CoapOption>,
    pub payload: Bytes,
}

impl Message {
    /// Create a message with no token, options or payload.
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// A Confirmable request.
    pub fn confirmable(code: Code, message_id: u16) -> Self {
        Self::new(MessageType::Confirmable, code, message_id)
    }

    /// A NonConfirmable request.
    pub fn non_confirmable(code: Code, message_id: u16) -> Self {
        Self::new(MessageType::NonConfirmable, code, message_id)
    }

    /// An empty Acknowledgement for `message_id`.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, message_id)
    }

    /// A Reset for `message_id`.
    pub fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message_id)
    }

    /// A piggy-backed response to `request`: an Acknowledgement carrying
    /// `code`, the request's message ID and its token.
    pub fn ack_response(request: &Message, code: Code) -> Self {
        let mut response = Self::new(MessageType::Acknowledgement, code, request.message_id);
        response.token = request.token.clone();
        response
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type == MessageType::Confirmable
    }

    /// Whether this message is an empty message (code 0.00).
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Values of every option with `number`, in order.
    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &Bytes> {
        self.options
            .iter()
            .filter(move |option| option.number == number)
            .map(|option| &option.value)
    }

    /// First value of option `number`.
    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.option_values(number).next()
    }

    /// Append an option, keeping options ordered by number. Same-numbered
    /// options keep their insertion order.
    pub fn add_option(&mut self, number: u16, value: impl Into<Bytes>) {
        let at = self.options.partition_point(|option| option.number <= number);
        self.options.insert(at, CoapOption::new(number, value));
    }

    /// Replace all instances of option `number` with a single value.
    pub fn set_option(&mut self, number: u16, value: impl Into<Bytes>) {
        self.remove_option(number);
        self.add_option(number, value);
    }

    pub fn set_option_uint(&mut self, number: u16, value: u32) {
        self.set_option(number, option::encode_uint(value));
    }

    pub fn option_uint(&self, number: u16) -> Option<u32> {
        self.option(number).and_then(|value| decode_uint(value))
    }

    pub fn remove_option(&mut self, number: u16) {
        self.options.retain(|option| option.number != number);
    }

    pub fn content_format(&self) -> Option<u16> {
        self.option_uint(option::CONTENT_FORMAT)
            .and_then(|value| u16::try_from(value).ok())
    }

    pub fn set_content_format(&mut self, format: u16) {
        self.set_option_uint(option::CONTENT_FORMAT, u32::from(format));
    }

    /// Uri-Path segments. Non-UTF-8 segments are converted lossily.
    pub fn path(&self) -> Vec<String> {
        self.option_values(option::URI_PATH)
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .collect()
    }

    /// Uri-Path segments joined with `/`, without a leading slash.
    pub fn path_string(&self) -> String {
        self.path().join("/")
    }

    /// Replace the Uri-Path options with the given segments.
    pub fn set_path<S: AsRef<str>>(&mut self, segments: &[S]) {
        self.remove_option(option::URI_PATH);
        for segment in segments {
            self.add_option(
                option::URI_PATH,
                Bytes::copy_from_slice(segment.as_ref().as_bytes()),
            );
        }
    }

    /// Set Uri-Path from a `/`-separated string. Leading slashes are ignored
    /// and an empty path clears the option.
    pub fn set_path_string(&mut self, path: &str) {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.remove_option(option::URI_PATH);
            return;
        }
        let segments: Vec<&str> = path.split('/').collect();
        self.set_path(&segments);
    }

    /// Uri-Query values.
    pub fn query(&self) -> Vec<String> {
        self.option_values(option::URI_QUERY)
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .collect()
    }

    pub fn add_query(&mut self, query: &str) {
        self.add_option(option::URI_QUERY, Bytes::copy_from_slice(query.as_bytes()));
    }
}
