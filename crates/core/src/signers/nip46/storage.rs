//! Session persistence codec.
//!
//! The blob holds the raw client secret key (hex). Encrypting it at rest is the
//! job of whatever stores the string.

use super::identity::Session;
use super::uri::{decode_bunker_uri, decode_initiator_uri};
use crate::types::{Keys, SecretKey};
use serde::Deserialize;
use tracing::warn;

const STORAGE_VERSION: u8 = 1;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    version: u8,
    private_key: String,
    connection_string: String,
    secret: String,
    #[serde(default)]
    relays: Option<Vec<String>>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    bunker_uri: Option<String>,
}

pub fn serialize_session(session: &Session) -> String {
    serde_json::json!({
        "version": STORAGE_VERSION,
        "privateKey": session.keys().secret_key().to_hex(),
        "connectionString": session.connection_string(),
        "secret": session.secret(),
        "relays": session.relays(),
        "image": session.image(),
        "bunkerUri": session.bunker_uri(),
    })
    .to_string()
}

/// Returns `None` for any blob that does not describe a valid session, so a
/// corrupt stored session reads as "no session".
pub fn deserialize_session(blob: &str) -> Option<Session> {
    let stored: StoredSession = match serde_json::from_str(blob) {
        Ok(s) => s,
        Err(e) => {
            warn!("[nip46] stored session is not valid JSON: {}", e);
            return None;
        }
    };

    if stored.version != STORAGE_VERSION {
        warn!("[nip46] unsupported stored session version {}", stored.version);
        return None;
    }
    if stored.secret.is_empty() {
        warn!("[nip46] stored session has an empty secret");
        return None;
    }

    let keys = match SecretKey::from_hex(&stored.private_key).and_then(Keys::new) {
        Ok(k) => k,
        Err(e) => {
            warn!("[nip46] stored session has an invalid private key: {}", e);
            return None;
        }
    };

    let initiator = match decode_initiator_uri(&stored.connection_string) {
        Ok(u) => u,
        Err(e) => {
            warn!("[nip46] stored connection string is invalid: {}", e);
            return None;
        }
    };
    if initiator.pubkey != keys.public_key().to_hex() {
        warn!("[nip46] stored connection string does not match the stored key");
        return None;
    }

    if let Some(uri) = &stored.bunker_uri {
        if let Err(e) = decode_bunker_uri(uri) {
            warn!("[nip46] stored bunker URI is invalid: {}", e);
            return None;
        }
    }

    let relays = stored.relays.unwrap_or(initiator.relays);

    Some(Session::restore(
        keys,
        stored.connection_string,
        stored.secret,
        relays,
        stored.image,
        stored.bunker_uri,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signers::nip46::config::AppMetadata;
    use crate::signers::nip46::identity::generate_session;

    fn session() -> Session {
        generate_session(
            &AppMetadata::new("Tasks", "https://tasks.example", "https://tasks.example/i.png"),
            &["wss://relay.one".to_string(), "wss://relay.two".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_roundtrip_fresh_session() {
        let s = session();
        let restored = deserialize_session(&serialize_session(&s)).unwrap();
        assert_eq!(restored, s);
        assert_eq!(
            restored.keys().secret_key().as_bytes(),
            s.keys().secret_key().as_bytes()
        );
    }

    #[test]
    fn test_roundtrip_with_bunker_uri() {
        let mut s = session();
        s.set_bunker_uri(format!("bunker://{}?relay=wss%3A%2F%2Frelay.one", "ab".repeat(32)));
        let restored = deserialize_session(&serialize_session(&s)).unwrap();
        assert_eq!(restored, s);
        assert_eq!(restored.bunker_uri(), s.bunker_uri());
    }

    #[test]
    fn test_invalid_blobs_are_none() {
        assert!(deserialize_session("").is_none());
        assert!(deserialize_session("not json").is_none());
        assert!(deserialize_session("{}").is_none());

        let good: serde_json::Value = serde_json::from_str(&serialize_session(&session())).unwrap();

        let mut bad_hex = good.clone();
        bad_hex["privateKey"] = "xyz".into();
        assert!(deserialize_session(&bad_hex.to_string()).is_none());

        let mut zero_key = good.clone();
        zero_key["privateKey"] = "00".repeat(32).into();
        assert!(deserialize_session(&zero_key.to_string()).is_none());

        let mut missing = good.clone();
        missing.as_object_mut().unwrap().remove("connectionString");
        assert!(deserialize_session(&missing.to_string()).is_none());

        let mut version = good.clone();
        version["version"] = 9.into();
        assert!(deserialize_session(&version.to_string()).is_none());

        let mut foreign = good.clone();
        foreign["privateKey"] = "01".repeat(32).into();
        assert!(deserialize_session(&foreign.to_string()).is_none());

        let mut bunker = good;
        bunker["bunkerUri"] = "https://nope".into();
        assert!(deserialize_session(&bunker.to_string()).is_none());
    }

    #[test]
    fn test_roundtrip_caller_built_session() {
        let keys = Keys::new(SecretKey::from_bytes([9u8; 32]).unwrap()).unwrap();
        let app = AppMetadata::new("Tasks App", "", "");
        let s = Session::from_parts(keys, "s".to_string(), &app, vec![]).unwrap();
        let restored = deserialize_session(&serialize_session(&s)).unwrap();
        assert_eq!(restored, s);
    }

    #[test]
    fn test_relays_fall_back_to_connection_string() {
        let s = session();
        let mut blob: serde_json::Value = serde_json::from_str(&serialize_session(&s)).unwrap();
        blob.as_object_mut().unwrap().remove("relays");
        let restored = deserialize_session(&blob.to_string()).unwrap();
        assert_eq!(restored.relays(), s.relays());
    }
}
