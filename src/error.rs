//! Error taxonomy shared by the RPC client and the record sync engine.

use std::fmt;

use crate::transport::PublishResult;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to callers of the RPC client and the publish path.
///
/// Read paths ([`crate::query`]) never return these; a failed lookup is simply
/// `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The relay session could not carry the request.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The remote service answered with a structured failure.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    /// No signer is configured, or the signer refused.
    #[error("signing failed: {0}")]
    Signing(String),
    /// No relay accepted a write.
    #[error("failed to publish to any relay: {}", DisplayResults(.results))]
    Publish { results: Vec<PublishResult> },
    /// The response did not match the method's schema.
    #[error("invalid response: {0}")]
    Decode(String),
    /// The call was rejected locally before reaching the transport.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// True for failures worth a short, bounded retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(e) if e.transient)
    }
}

/// Class of transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The session has not finished connecting.
    NotReady,
    /// The session or a relay connection was closed.
    Closed,
    /// Every relay refused the outgoing message.
    Rejected,
    /// No answer arrived in time.
    Timeout,
    /// Socket, handshake or framing failure.
    Io,
}

/// Transport-level failure. `transient` is decided by the transport, so retry
/// logic can match on it instead of on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub transient: bool,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: kind == TransportErrorKind::Closed,
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotReady, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }
}

struct DisplayResults<'a>(&'a [PublishResult]);

impl fmt::Display for DisplayResults<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{}: {}",
                r.endpoint,
                r.message.as_deref().unwrap_or("rejected")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_transient() {
        let err = Error::from(TransportError::closed("Connection closed"));
        assert!(err.is_transient());
        let err = Error::from(TransportError::timeout("no answer"));
        assert!(!err.is_transient());
        let err = Error::Remote {
            code: -32602,
            message: "bad params".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn publish_error_lists_every_relay() {
        let err = Error::Publish {
            results: vec![
                PublishResult::rejected("wss://a", "blocked"),
                PublishResult::rejected("wss://b", "rate-limited"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "failed to publish to any relay: wss://a: blocked, wss://b: rate-limited"
        );
    }
}
