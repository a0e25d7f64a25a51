//! Error types for pipeflow.

use crate::buffer::Buffer;
use crate::signature::Signature;
use thiserror::Error;

/// Result type alias using pipeflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipeflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The request does not apply here; the next handler may take it.
    #[error("unhandled")]
    Unhandled,

    /// Malformed arguments or a contract violation detected locally.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A control call targeted a pipe of another kind.
    #[error("signature mismatch: pipe is {expected}, call was for {actual}")]
    SignatureMismatch {
        /// Signature of the pipe's manager.
        expected: Signature,
        /// Signature carried by the call.
        actual: Signature,
    },

    /// A bounded pipe refused an input. The buffer is handed back.
    #[error("pipe is blocked: buffer rejected")]
    Blocked(Buffer),

    /// The pipe has no output link to forward to.
    #[error("no output linked")]
    NoOutput,

    /// The pipe has been torn down.
    #[error("pipe released")]
    Released,

    /// The pipe is already executing an operation higher up the stack.
    #[error("pipe busy: re-entrant call")]
    Busy,

    /// A queue was cleaned while still holding values.
    #[error("queue not empty: {0} values left")]
    QueueNotEmpty(usize),

    /// The loop backend does not implement this pump kind.
    #[error("pump kind not supported by backend {backend}: {kind}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Requested pump kind.
        kind: &'static str,
    },

    /// Unrecoverable node or event-loop condition.
    #[error("fatal: {0}")]
    Fatal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Shorthand for [`Error::Invalid`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Shorthand for [`Error::Fatal`].
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Check if this is the "not applicable here" outcome.
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled)
    }

    /// Check if this error reports a local contract violation.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::SignatureMismatch { .. })
    }

    /// Recover the buffer carried by a [`Error::Blocked`] rejection.
    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Self::Blocked(buffer) => Some(buffer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_helpers() {
        assert!(Error::Unhandled.is_unhandled());
        assert!(Error::invalid("x").is_invalid());
        assert!(
            Error::SignatureMismatch {
                expected: Signature::new(*b"rlay"),
                actual: Signature::new(*b"asnk"),
            }
            .is_invalid()
        );
        assert!(!Error::fatal("boom").is_invalid());
    }

    #[test]
    fn test_blocked_returns_buffer() {
        let err = Error::Blocked(Buffer::from_static(b"abc", 7));
        let buffer = err.into_buffer().unwrap();
        assert_eq!(buffer.sequence(), 7);
        assert!(Error::NoOutput.into_buffer().is_none());
    }

    #[test]
    fn test_display() {
        let err = Error::SignatureMismatch {
            expected: Signature::new(*b"rlay"),
            actual: Signature::new(*b"asnk"),
        };
        assert_eq!(
            err.to_string(),
            "signature mismatch: pipe is rlay, call was for asnk"
        );
    }
}
