//! Session engine for delegating Nostr event signing to a remote signer
//! (NIP-46 / Nostr Connect).

pub mod signers;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use signers::nip46;
pub use types::{Event, Keys, PublicKey, SecretKey, TypesError, UnsignedEvent};
