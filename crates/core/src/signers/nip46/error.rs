use super::manager::ConnectionState;
use super::transport::TransportError;
use super::uri::ParseError;
use std::time::Duration;

/// Errors surfaced by the NIP-46 session engine.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Secure random source unavailable: {0}")]
    Randomness(String),

    #[error("Invalid connection URI: {0}")]
    Parse(#[from] ParseError),

    #[error("No relays available for the remote signer")]
    MissingRelays,

    #[error("No session is active")]
    NoSession,

    #[error("Session has no bunker URI to reconnect with")]
    MissingBunkerUri,

    #[error("Cannot {operation} while {state}")]
    InvalidStateTransition {
        state: ConnectionState,
        operation: &'static str,
    },

    #[error("Not connected to a remote signer")]
    NotConnected,

    #[error("Connection cancelled")]
    Cancelled,

    #[error(
        "Signing request timed out after {}s. Open your signer app and approve the request; \
         if this keeps happening, log out and connect your signer again.",
        .0.as_secs()
    )]
    SigningTimeout(Duration),

    #[error("Remote signer returned an invalid event: {0}")]
    InvalidSignedEvent(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConnectError {
    /// Failures worth another connection attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConnectError::Transport(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// A deliberate cancel, which callers should not report as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectError::Cancelled)
    }
}

impl From<rand_core::Error> for ConnectError {
    fn from(e: rand_core::Error) -> Self {
        ConnectError::Randomness(e.to_string())
    }
}
