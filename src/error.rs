//! Error types shared by every pipeline component.
//!
//! All failures are unrecoverable for the affected run and travel back to the
//! caller. Messages embed the engine diagnostic where one exists.

use std::collections::TryReserveError;

use thiserror::Error;

pub type Result<T, E = TranscodeError> = std::result::Result<T, E>;

/// Coarse classification of a [`TranscodeError`], handy for matching in
/// callers and tests without caring about the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    UnsupportedCodec,
    UnsupportedConversion,
    InvalidState,
    ResourceExhausted,
    Io,
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Container could not be identified, parsed, or written.
    #[error("format error: {0}")]
    Format(String),

    /// No codec implementation exists for the requested codec.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A sample/pixel/rate bridge the converters cannot perform.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),

    /// API misuse, such as declaring a stream after headers were written.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A buffer reservation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Byte source or sink fault.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscodeError::Format(_) => ErrorKind::Format,
            TranscodeError::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            TranscodeError::UnsupportedConversion(_) => ErrorKind::UnsupportedConversion,
            TranscodeError::InvalidState(_) => ErrorKind::InvalidState,
            TranscodeError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            TranscodeError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        TranscodeError::Format(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        TranscodeError::InvalidState(message.into())
    }

    pub fn unsupported_conversion(message: impl Into<String>) -> Self {
        TranscodeError::UnsupportedConversion(message.into())
    }

    pub fn unsupported_codec(message: impl Into<String>) -> Self {
        TranscodeError::UnsupportedCodec(message.into())
    }

    /// Wraps a failed reservation, naming the buffer that could not grow.
    pub fn exhausted(what: &str, err: TryReserveError) -> Self {
        TranscodeError::ResourceExhausted(format!("{what}: {err}"))
    }
}
