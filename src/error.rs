use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;

use crate::SideId;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), CtfError>`].
///
/// [`Result<(), CtfError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtfError {
    /// The connection to the peer failed or was closed. This is fatal for the session.
    Transport {
        /// The kind of I/O failure. A peer that closed the connection is reported as
        /// [`io::ErrorKind::UnexpectedEof`].
        kind: io::ErrorKind,
        /// A description of the operation that failed.
        context: String,
    },
    /// A configuration value was rejected.
    InvalidConfig {
        /// Further specifies why the value was rejected.
        info: String,
    },
    /// A token vector had a different length than the negotiated token count.
    TokenCountMismatch {
        /// The negotiated token count.
        expected: usize,
        /// The length that was actually observed.
        actual: usize,
    },
    /// The peer has not sent its base origin yet.
    MissingPeerBoundary {
        /// The side whose boundary is missing.
        side: SideId,
    },
    /// The peer has not sent any coordinates yet.
    MissingPeerPositions {
        /// The side whose positions are missing.
        side: SideId,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
}

impl CtfError {
    /// Builds a [`CtfError::Transport`] from an I/O error.
    #[must_use]
    pub fn transport(err: &io::Error, context: impl Into<String>) -> Self {
        CtfError::Transport {
            kind: err.kind(),
            context: format!("{}: {}", context.into(), err),
        }
    }

    /// Returns `true` for errors that end the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, CtfError::Transport { .. })
    }

    /// Returns `true` for errors after which the current tick's scoring is skipped and retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            CtfError::TokenCountMismatch { .. }
                | CtfError::MissingPeerBoundary { .. }
                | CtfError::MissingPeerPositions { .. }
        )
    }
}

impl Display for CtfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtfError::Transport { kind, context } => {
                write!(f, "Transport error ({:?}): {}", kind, context)
            }
            CtfError::InvalidConfig { info } => write!(f, "Invalid configuration: {}", info),
            CtfError::TokenCountMismatch { expected, actual } => {
                write!(
                    f,
                    "Token count mismatch: expected {} tokens, got {}",
                    expected, actual
                )
            }
            CtfError::MissingPeerBoundary { side } => {
                write!(f, "No base origin received yet for side {}", side)
            }
            CtfError::MissingPeerPositions { side } => {
                write!(f, "No coordinates received yet for side {}", side)
            }
            CtfError::InvalidRequest { info } => write!(f, "Invalid Request: {}", info),
        }
    }
}

impl Error for CtfError {}

/// Reasons a single wire line failed to decode.
///
/// Every variant carries enough of the offending input to log it. A decode error never
/// affects the lines that follow it, and sessions never return one: the line is dropped and
/// reported as a [`ViolationKind::WireDecode`](crate::telemetry::ViolationKind::WireDecode)
/// warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The first token matched no known message.
    UnknownMessage {
        /// The offending line.
        line: String,
    },
    /// A field that should be a number was not, or was not finite.
    InvalidNumber {
        /// The token that failed to parse.
        token: String,
    },
    /// A message carried the wrong number of fields.
    WrongArity {
        /// Name of the message being decoded.
        message: &'static str,
        /// The number of fields found after the keyword.
        found: usize,
    },
    /// A `SetCount` value was outside `0..=MAX_TOKENS`.
    TokenCountOutOfRange {
        /// The decoded count.
        count: u64,
    },
    /// A line exceeded [`MAX_LINE_LEN`](crate::MAX_LINE_LEN) bytes and was discarded.
    LineTooLong {
        /// Number of bytes discarded.
        len: usize,
    },
    /// A line was not valid UTF-8.
    InvalidUtf8,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownMessage { line } => write!(f, "unknown message {:?}", line),
            DecodeError::InvalidNumber { token } => write!(f, "invalid number {:?}", token),
            DecodeError::WrongArity { message, found } => {
                write!(f, "wrong number of fields for {}: {}", message, found)
            }
            DecodeError::TokenCountOutOfRange { count } => {
                write!(f, "token count {} out of range", count)
            }
            DecodeError::LineTooLong { len } => write!(f, "line of {} bytes is too long", len),
            DecodeError::InvalidUtf8 => write!(f, "line is not valid UTF-8"),
        }
    }
}

impl Error for DecodeError {}
