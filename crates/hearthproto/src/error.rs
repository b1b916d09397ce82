//! Gateway error taxonomy.
//!
//! Shared by the downstream link and the session/dispatch layers so that
//! every component reports failures in the same vocabulary.

use std::time::Duration;

/// Errors surfaced at component boundaries.
///
/// Link failures (`Connection`, `Timeout`) are handled locally via
/// reconnection and only reach sessions as delayed unavailability.
/// `Auth`, `Protocol`, and `Execution` are surfaced to the originating
/// client as an `error`-typed envelope.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No active downstream transport.
    #[error("connection error: {0}")]
    Connection(String),

    /// A downstream command exceeded its deadline.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Missing, invalid, or expired credential at the protocol boundary.
    #[error("auth error: {0}")]
    Auth(String),

    /// Malformed or unknown inbound message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Domain handler failure; opaque reason only.
    #[error("{0}")]
    Execution(String),
}

impl GatewayError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// True for errors that indicate the link itself is unavailable,
    /// as opposed to a failure of one specific request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
