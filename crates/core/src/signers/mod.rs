/*!
Signers module

- `nip46` : Remote signer over relays (Nostr Connect / NIP-46)

The private key of the user never reaches this crate; events are signed by the
remote signer and verified here before being handed back.
*/
pub mod nip46;

pub use nip46::{ConnectConfig, ConnectError, ConnectManager, ConnectionState, Session};
