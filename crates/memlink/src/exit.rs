use std::fmt;
use std::io;

use memlink::bridge::{BridgeError, RttError};
use memlink::frame::FrameError;
use memlink::transport::TransportError;

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
        io::ErrorKind::NotFound => FAILURE,
        io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. }
        | TransportError::Spawn { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::UnsupportedBaud(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Io(source) => io_error(context, source),
        FrameError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    match err {
        BridgeError::Frame(err) => frame_error(context, err),
        BridgeError::Argument(_) => CliError::new(USAGE, format!("{context}: {err}")),
        BridgeError::Rtt(RttError::BadDescriptor { .. }) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        BridgeError::Rtt(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other if other.is_protocol() => CliError::new(DATA_INVALID, format!("{context}: {other}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_errors_map_to_exit_codes() {
        let cases = [
            (BridgeError::Argument("misaligned".into()), USAGE),
            (BridgeError::TargetError, DATA_INVALID),
            (
                BridgeError::ShortResponse {
                    command: "read",
                    expected: 9,
                    actual: 5,
                },
                DATA_INVALID,
            ),
            (
                BridgeError::Frame(FrameError::Timeout(std::time::Duration::from_secs(1))),
                TIMEOUT,
            ),
            (
                BridgeError::Frame(FrameError::Transport(TransportError::Closed)),
                TRANSPORT_ERROR,
            ),
            (
                BridgeError::Rtt(RttError::ChannelNotFound("Terminal".into())),
                FAILURE,
            ),
        ];
        for (err, code) in cases {
            let message = err.to_string();
            let mapped = bridge_error("ctx", err);
            assert_eq!(mapped.code, code, "{message}");
            assert!(mapped.message.starts_with("ctx: "));
        }
    }

    #[test]
    fn io_errors_map_by_kind() {
        let err = io_error("open", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.code, PERMISSION_DENIED);
        let err = transport_error(
            "spawn",
            TransportError::Spawn {
                program: "sim".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, FAILURE);
        assert_eq!(
            transport_error("open", TransportError::UnsupportedBaud(7)).code,
            USAGE
        );
    }
}
