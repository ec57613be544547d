use super::config::AppMetadata;
use super::error::ConnectError;
use super::uri::{encode_initiator_uri, ParseError};
use crate::types::{Keys, PublicKey};
use rand_core::{CryptoRng, OsRng, RngCore};
use std::fmt;

/// Prefix of every generated handshake secret.
pub const SECRET_PREFIX: &str = "sec-";

/// Long-lived identity for one signing relationship.
///
/// The client secret key stays inside this struct; only the public key and the
/// connection URIs built from it are meant to leave the process.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    keys: Keys,
    connection_string: String,
    secret: String,
    relays: Vec<String>,
    image: String,
    bunker_uri: Option<String>,
}

impl Session {
    /// Assemble a session from known parts. The connection string is derived here
    /// and never changes afterwards. The handshake secret must not be empty.
    pub fn from_parts(
        keys: Keys,
        secret: String,
        app: &AppMetadata,
        relays: Vec<String>,
    ) -> Result<Self, ConnectError> {
        if secret.is_empty() {
            return Err(ParseError::MissingSecret.into());
        }
        let connection_string =
            encode_initiator_uri(&keys.public_key().to_hex(), &relays, &secret, app);
        Ok(Self {
            keys,
            connection_string,
            secret,
            relays,
            image: app.image.clone(),
            bunker_uri: None,
        })
    }

    pub(crate) fn restore(
        keys: Keys,
        connection_string: String,
        secret: String,
        relays: Vec<String>,
        image: String,
        bunker_uri: Option<String>,
    ) -> Self {
        Self {
            keys,
            connection_string,
            secret,
            relays,
            image,
            bunker_uri,
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn client_public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn bunker_uri(&self) -> Option<&str> {
        self.bunker_uri.as_deref()
    }

    pub(crate) fn set_bunker_uri(&mut self, uri: String) {
        self.bunker_uri = Some(uri);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_public_key", &self.keys.public_key())
            .field("relays", &self.relays)
            .field("bunker_uri", &self.bunker_uri.is_some())
            .finish_non_exhaustive()
    }
}

/// Random handshake secret: `sec-` followed by 32 hex chars.
pub fn generate_secret<R: RngCore + CryptoRng>(rng: &mut R) -> Result<String, ConnectError> {
    let mut bytes = [0u8; 16];
    rng.try_fill_bytes(&mut bytes)?;
    Ok(format!("{}{}", SECRET_PREFIX, hex::encode(bytes)))
}

/// Fresh ephemeral keypair and secret from the OS CSPRNG.
pub fn generate_session(app: &AppMetadata, relays: &[String]) -> Result<Session, ConnectError> {
    generate_session_with_rng(&mut OsRng, app, relays)
}

pub fn generate_session_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
    app: &AppMetadata,
    relays: &[String],
) -> Result<Session, ConnectError> {
    let keys = Keys::generate_with_rng(rng)?;
    let secret = generate_secret(rng)?;
    Session::from_parts(keys, secret, app, relays.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signers::nip46::uri::decode_initiator_uri;
    use k256::schnorr::SigningKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn app() -> AppMetadata {
        AppMetadata::new("Tasks", "https://tasks.example", "https://tasks.example/logo.png")
    }

    fn relays() -> Vec<String> {
        vec!["wss://relay.one".to_string()]
    }

    #[test]
    fn test_generated_keys_match_derivation() {
        let session = generate_session(&app(), &relays()).unwrap();
        let secret = session.keys().secret_key().as_bytes();
        assert_eq!(secret.len(), 32);
        let expected: [u8; 32] = SigningKey::from_bytes(secret)
            .unwrap()
            .verifying_key()
            .to_bytes()
            .into();
        assert_eq!(session.client_public_key().0, expected);
    }

    #[test]
    fn test_secret_format() {
        let session = generate_session(&app(), &relays()).unwrap();
        let hex_part = session.secret().strip_prefix("sec-").unwrap();
        assert_eq!(hex_part.len(), 32);
        assert!(hex_part.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = generate_session_with_rng(&mut StdRng::seed_from_u64(7), &app(), &relays()).unwrap();
        let b = generate_session_with_rng(&mut StdRng::seed_from_u64(7), &app(), &relays()).unwrap();
        let c = generate_session_with_rng(&mut StdRng::seed_from_u64(8), &app(), &relays()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.client_public_key(), c.client_public_key());
        assert_ne!(a.secret(), c.secret());
    }

    #[test]
    fn test_connection_string_describes_session() {
        let session = generate_session(&app(), &relays()).unwrap();
        let parsed = decode_initiator_uri(session.connection_string()).unwrap();
        assert_eq!(parsed.pubkey, session.client_public_key().to_hex());
        assert_eq!(parsed.secret, session.secret());
        assert_eq!(parsed.relays, relays());
        assert_eq!(parsed.app, app());
        assert_eq!(session.bunker_uri(), None);
    }

    #[test]
    fn test_from_parts_requires_secret() {
        let keys = Keys::generate_with_rng(&mut StdRng::seed_from_u64(9)).unwrap();
        let err = Session::from_parts(keys.clone(), String::new(), &app(), relays()).unwrap_err();
        assert!(matches!(err, ConnectError::Parse(ParseError::MissingSecret)));

        let session = Session::from_parts(keys, "sec-fixed".to_string(), &app(), relays()).unwrap();
        assert_eq!(session.secret(), "sec-fixed");
        assert_eq!(session.image(), "https://tasks.example/logo.png");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let session = generate_session(&app(), &relays()).unwrap();
        let printed = format!("{:?}", session);
        assert!(!printed.contains(session.secret()));
        assert!(!printed.contains(&session.keys().secret_key().to_hex()));
    }
}
