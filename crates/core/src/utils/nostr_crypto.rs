//! Nostr cryptographic operations
//!
//! Event id computation plus BIP-340 signing and verification of NIP-01 events.

use crate::types::{Event, EventId, Keys, PublicKey, TypesError, UnsignedEvent};
use k256::schnorr::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use signature::hazmat::{PrehashSigner, PrehashVerifier};

type Result<T> = std::result::Result<T, TypesError>;

/// Compute the Nostr event ID (SHA256 of the canonical `[0,pubkey,created_at,kind,tags,content]`)
pub fn compute_event_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let serialized = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    let mut hasher = Sha256::new();
    hasher.update(serialized.to_string().as_bytes());
    EventId(hasher.finalize().into())
}

/// Sign an unsigned event with `keys`, producing a complete event.
pub fn sign_event(keys: &Keys, unsigned: &UnsignedEvent) -> Result<Event> {
    let pubkey = keys.public_key();
    let id = compute_event_id(
        &pubkey,
        unsigned.created_at,
        unsigned.kind,
        &unsigned.tags,
        &unsigned.content,
    );

    let signing_key = keys.secret_key().signing_key()?;
    let signature: Signature = signing_key
        .sign_prehash(&id.to_bytes())
        .map_err(|e| TypesError::Other(format!("Schnorr prehash sign failed: {}", e)))?;

    Ok(Event {
        id: id.to_hex(),
        pubkey: pubkey.to_hex(),
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags.clone(),
        content: unsigned.content.clone(),
        sig: hex::encode(signature.to_bytes()),
    })
}

/// Verify an event's id and signature
pub fn verify_event(event: &Event) -> Result<()> {
    let pubkey = PublicKey::from_hex(&event.pubkey)?;
    let claimed = EventId::from_hex(&event.id)?;
    let computed = compute_event_id(
        &pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    );
    if claimed != computed {
        return Err(TypesError::InvalidFormat("Event id mismatch".to_string()));
    }

    if event.sig.is_empty() {
        return Err(TypesError::MissingField("sig".to_string()));
    }
    let verifying_key = VerifyingKey::from_bytes(&pubkey.0)
        .map_err(|_| TypesError::InvalidFormat("Invalid public key".to_string()))?;
    let signature_bytes = hex::decode(&event.sig)
        .map_err(|_| TypesError::InvalidFormat("Invalid signature hex".to_string()))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| TypesError::InvalidFormat("Invalid signature format".to_string()))?;

    verifying_key
        .verify_prehash(&computed.to_bytes(), &signature)
        .map_err(|_| TypesError::InvalidFormat("Signature verification failed".to_string()))
}
