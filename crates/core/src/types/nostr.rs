use crate::types::TypesError;
use k256::schnorr::SigningKey;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type Result<T> = std::result::Result<T, TypesError>;

/// Event kind used by NIP-42/NIP-98 style authorization challenges.
pub const AUTH_CHALLENGE_KIND: u16 = 22242;

// ============================================================================
// Basic Types - Just byte arrays
// ============================================================================

fn decode_32(s: &str, what: &str) -> Result<[u8; 32]> {
    let bytes =
        hex::decode(s).map_err(|_| TypesError::InvalidFormat("Invalid hex".to_string()))?;
    if bytes.len() != 32 {
        return Err(TypesError::InvalidFormat(format!("Invalid {}", what)));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s, "event ID").map(EventId)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

/// x-only (BIP-340) public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s, "pubkey").map(PublicKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// A secp256k1 secret scalar. Construction rejects zero and out-of-range values.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        SigningKey::from_bytes(&bytes)
            .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))?;
        Ok(SecretKey(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(decode_32(s, "secret key")?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_bytes(&self.0)
            .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Keys {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keys {
    pub fn new(secret_key: SecretKey) -> Result<Self> {
        let signing_key = secret_key.signing_key()?;
        let public_key = PublicKey(signing_key.verifying_key().to_bytes().into());
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Draws 32 bytes at a time until they form a valid scalar. Errors from the
    /// RNG are returned as-is; there is no weaker fallback source.
    pub fn generate_with_rng<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> std::result::Result<Self, rand_core::Error> {
        loop {
            let mut bytes = [0u8; 32];
            rng.try_fill_bytes(&mut bytes)?;
            if let Ok(secret_key) = SecretKey::from_bytes(bytes) {
                if let Ok(keys) = Self::new(secret_key) {
                    return Ok(keys);
                }
            }
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Event
// ============================================================================

pub type Timestamp = u64;

pub fn timestamp_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// An event description handed to a signer: everything except id, pubkey and sig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u16,
    pub created_at: Timestamp,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: timestamp_now(),
            tags,
            content: content.into(),
        }
    }

    /// Kind 22242 challenge event. The backend verifying it depends on this exact shape.
    pub fn auth_challenge(challenge: &str, domain: &str) -> Self {
        Self::new(
            AUTH_CHALLENGE_KIND,
            vec![
                vec!["challenge".to_string(), challenge.to_string()],
                vec!["domain".to_string(), domain.to_string()],
            ],
            "",
        )
    }
}

/// A fully signed NIP-01 event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: Timestamp,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// True when this event carries the same kind, tags and content as `unsigned`.
    /// Signers may refresh `created_at`, so it is not compared.
    pub fn matches_template(&self, unsigned: &UnsignedEvent) -> bool {
        self.kind == unsigned.kind
            && self.tags == unsigned.tags
            && self.content == unsigned.content
    }
}
