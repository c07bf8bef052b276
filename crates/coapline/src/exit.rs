use std::fmt;
use std::io;

use coapline_endpoint::Error;
use coapline_message::CodecError;
use coapline_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn codec_error(context: &str, err: CodecError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Codec(err) => codec_error(context, err),
        TransportError::UnsupportedNetwork(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn endpoint_error(context: &str, err: Error) -> CliError {
    match err {
        Error::Configuration(_) => CliError::new(USAGE, format!("{context}: {err}")),
        Error::Transport(err) => transport_error(context, err),
        Error::Codec(err) => codec_error(context, err),
        Error::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        Error::Rejected { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_errors_map_to_exit_codes() {
        assert_eq!(
            endpoint_error("send", Error::Timeout { transmissions: 5 }).code,
            TIMEOUT
        );
        assert_eq!(
            endpoint_error("send", Error::Rejected { message_id: 1 }).code,
            FAILURE
        );
        assert_eq!(
            endpoint_error("send", Error::Configuration("bad".into())).code,
            USAGE
        );
        assert_eq!(
            endpoint_error("send", Error::Codec(CodecError::EmptyPayload)).code,
            DATA_INVALID
        );
    }

    #[test]
    fn transport_errors_unwrap_io_sources() {
        let refused = TransportError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(transport_error("dial", refused).code, TRANSPORT_ERROR);
        assert_eq!(
            transport_error("recv", TransportError::ConnectionClosed).code,
            TRANSPORT_ERROR
        );
        assert_eq!(
            transport_error("recv", TransportError::Timeout(std::time::Duration::from_secs(1))).code,
            TIMEOUT
        );
    }

    #[test]
    fn message_includes_context() {
        let err = endpoint_error("send failed", Error::Rejected { message_id: 7 });
        assert!(err.to_string().starts_with("send failed: "));
    }
}
