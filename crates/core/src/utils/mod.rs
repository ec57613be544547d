pub mod nostr_crypto;
