//! Seams to the relay-backed NIP-46 client that actually moves the JSON-RPC
//! traffic. The engine only orchestrates; encryption and relay I/O live behind
//! these traits.

use super::uri::BunkerPointer;
use crate::types::{Event, Keys, UnsignedEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives interactive authorization URLs announced by the remote signer.
pub type AuthUrlCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Host capability for opening authorization URLs (browser, in-app view, ...).
pub trait UrlOpener: Send + Sync {
    fn open_url(&self, url: &str);
}

/// Messages of otherwise unclassified errors that are known to be transient.
const RECOVERABLE_PATTERNS: &[&str] = &[
    "subscription closed",
    "connection closed",
    "relay closed",
    "connection failed",
    "failed to connect",
    "timed out",
    "timeout",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timed out waiting for the remote signer")]
    Timeout,

    #[error("remote signer rejected the request: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::SubscriptionClosed(_)
            | TransportError::ConnectionFailed(_)
            | TransportError::Timeout => true,
            TransportError::Rejected(_) => false,
            TransportError::Other(msg) => {
                let msg = msg.to_ascii_lowercase();
                RECOVERABLE_PATTERNS.iter().any(|p| msg.contains(p))
            }
        }
    }
}

/// Everything the transport needs to run the `nostrconnect://` handshake.
pub struct HandshakeRequest<'a> {
    pub connection_string: &'a str,
    pub relays: &'a [String],
    pub secret: &'a str,
    pub client_keys: &'a Keys,
    pub on_auth_url: AuthUrlCallback,
}

/// An established signing channel plus the identities learned while opening it.
pub struct Handshake {
    pub channel: Arc<dyn SignerChannel>,
    /// The end user's identity pubkey (hex).
    pub user_pubkey: String,
    /// The remote signer's service pubkey (hex). This one goes into `bunker://` URIs.
    pub signer_pubkey: String,
}

#[async_trait]
pub trait SignerTransport: Send + Sync {
    /// Publish our interest on the relays and wait for the signer to answer the
    /// `nostrconnect://` invitation with the expected secret.
    async fn connect(&self, request: HandshakeRequest<'_>) -> Result<Handshake, TransportError>;

    /// Open a channel straight to a known signer described by a `bunker://` URI.
    async fn connect_bunker(
        &self,
        pointer: &BunkerPointer,
        client_keys: &Keys,
        on_auth_url: AuthUrlCallback,
    ) -> Result<Handshake, TransportError>;
}

#[async_trait]
pub trait SignerChannel: Send + Sync {
    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event, TransportError>;

    async fn close(&self);
}
