//! Crate-wide error type.

use std::fmt;

/// Error kinds surfaced by this driver.
///
/// Mirrors the libairspy error taxonomy: callers get a `Result` back from
/// every fallible operation, the driver never aborts the process.
#[derive(Debug)]
pub enum AirspyError {
    /// Caller violated a precondition (out-of-range length, address, enum value).
    InvalidParam(String),
    /// Device not present or serial mismatch.
    NotFound,
    /// Operation illegal in current state (e.g. `set_packing` while streaming).
    Busy,
    /// Allocation failed.
    NoMem,
    /// Underlying USB backend reported an error or a short transfer.
    Transport(String),
    /// The event pump exited on an unexpected backend error.
    StreamingStopped,
    /// Internal invariant violated; should never occur in a correct build.
    Other(String),
}

impl fmt::Display for AirspyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AirspyError::InvalidParam(msg) => write!(f, "invalid parameter: {msg}"),
            AirspyError::NotFound => write!(f, "device not found"),
            AirspyError::Busy => write!(f, "device busy"),
            AirspyError::NoMem => write!(f, "allocation failed"),
            AirspyError::Transport(msg) => write!(f, "usb transport error: {msg}"),
            AirspyError::StreamingStopped => write!(f, "streaming stopped unexpectedly"),
            AirspyError::Other(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AirspyError {}

impl From<rusb::Error> for AirspyError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NotFound => AirspyError::NotFound,
            rusb::Error::Busy => AirspyError::Busy,
            rusb::Error::NoMem => AirspyError::NoMem,
            other => AirspyError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AirspyError>;
