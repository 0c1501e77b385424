use std::io;

use thiserror::Error;

use crate::types::AlertDescription;

/// Errors surfaced by the session engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller violated a documented precondition.
    #[error("bad input: {0}")]
    BadInput(&'static str),

    /// Malformed, unexpected or unsupported peer input.
    ///
    /// Fatal to the handshake. The alert is sent to the peer before teardown.
    #[error("protocol violation ({alert:?}): {reason}")]
    ProtocolViolation {
        /// Alert sent to the peer.
        alert: AlertDescription,
        /// Human readable reason.
        reason: String,
    },

    /// Record MAC/tag, padding, Finished or signature check failed.
    ///
    /// Deliberately carries no detail about which check failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The retransmission budget is exhausted.
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// The requested algorithm is not provided.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Password based decryption produced invalid padding.
    #[error("password mismatch")]
    PasswordMismatch,

    /// The peer sent a fatal alert.
    #[error("peer sent fatal alert: {0:?}")]
    AlertReceived(AlertDescription),

    /// The session is closed or failed.
    #[error("connection closed")]
    ConnectionClosed,

    /// More transport input or a timer is needed to make progress.
    #[error("operation would block")]
    WouldBlock,

    /// A renegotiation is already outstanding.
    #[error("renegotiation already in progress")]
    RenegotiationInProgress,

    /// The configuration was rejected.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A crypto primitive failed unexpectedly.
    #[error("crypto error: {0}")]
    CryptoError(String),

    /// Transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn violation(alert: AlertDescription, reason: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            alert,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        Self::violation(AlertDescription::DecodeError, reason)
    }

    pub(crate) fn unexpected(reason: impl Into<String>) -> Self {
        Self::violation(AlertDescription::UnexpectedMessage, reason)
    }

    pub(crate) fn handshake_failure(reason: impl Into<String>) -> Self {
        Self::violation(AlertDescription::HandshakeFailure, reason)
    }

    pub(crate) fn illegal_parameter(reason: impl Into<String>) -> Self {
        Self::violation(AlertDescription::IllegalParameter, reason)
    }

    /// The alert to send before tearing the session down, if any.
    pub(crate) fn alert(&self) -> Option<AlertDescription> {
        match self {
            Error::ProtocolViolation { alert, .. } => Some(*alert),
            Error::AuthenticationFailed => Some(AlertDescription::BadRecordMac),
            Error::Unavailable(_) => Some(AlertDescription::HandshakeFailure),
            Error::CryptoError(_) => Some(AlertDescription::InternalError),
            _ => None,
        }
    }

    /// Whether the error leaves the session unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::WouldBlock
                | Error::BadInput(_)
                | Error::RenegotiationInProgress
                | Error::PasswordMismatch
        )
    }
}

pub(crate) fn io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::WouldBlock,
        _ => Error::Io(e),
    }
}
