//! Remote signing over relays (Nostr Connect / NIP-46).
//!
//! `identity` mints the ephemeral client session, `uri` speaks the two
//! connection URI formats, `storage` persists sessions, and `manager` drives
//! the connection state machine on top of an injected [`SignerTransport`].
//! `lifecycle` adds the foreground-gated retry used on mobile hosts.

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod manager;
pub mod storage;
pub mod transport;
pub mod uri;


pub use config::{AppMetadata, ConnectConfig};
pub use error::ConnectError;
pub use identity::{generate_session, generate_session_with_rng, Session};
pub use lifecycle::{AlwaysForeground, AppLifecycle, AppState, LifecycleSubscription, RetryCallback};
pub use manager::{ConnectManager, ConnectOutcome, Connection, ConnectionState};
pub use storage::{deserialize_session, serialize_session};
pub use transport::{
    AuthUrlCallback, Handshake, HandshakeRequest, SignerChannel, SignerTransport, TransportError,
    UrlOpener,
};
pub use uri::{
    decode_bunker_uri, decode_initiator_uri, encode_bunker_uri, encode_initiator_uri,
    BunkerPointer, InitiatorUri, ParseError,
};
