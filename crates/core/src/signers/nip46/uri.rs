//! `nostrconnect://` and `bunker://` connection URIs.

use super::config::{default_relays, AppMetadata};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded;

pub const NOSTRCONNECT_SCHEME: &str = "nostrconnect://";
pub const BUNKER_SCHEME: &str = "bunker://";

/// Characters left alone by `encodeURIComponent`-style component encoding.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("not a bunker:// URI")]
    NotABunkerUri,

    #[error("not a nostrconnect:// URI")]
    NotANostrConnectUri,

    #[error("URI has no pubkey")]
    MissingPubkey,

    #[error("URI has no secret")]
    MissingSecret,
}

/// Parsed `bunker://` URI. `relays` is never empty once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerPointer {
    pub pubkey: String,
    pub relays: Vec<String>,
    pub secret: Option<String>,
}

impl BunkerPointer {
    pub fn to_uri(&self) -> String {
        encode_bunker_uri(&self.pubkey, &self.relays, self.secret.as_deref())
    }

    pub fn without_secret(mut self) -> Self {
        self.secret = None;
        self
    }
}

/// Parsed `nostrconnect://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorUri {
    pub pubkey: String,
    pub relays: Vec<String>,
    pub secret: String,
    pub app: AppMetadata,
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

fn push_param(uri: &mut String, first: &mut bool, key: &str, value: &str) {
    uri.push(if *first { '?' } else { '&' });
    *first = false;
    uri.push_str(key);
    uri.push('=');
    uri.push_str(&encode(value));
}

/// `nostrconnect://<pubkey>?relay=..&relay=..&secret=..&name=..&url=..&image=..`
pub fn encode_initiator_uri(
    pubkey: &str,
    relays: &[String],
    secret: &str,
    app: &AppMetadata,
) -> String {
    let mut uri = format!("{}{}", NOSTRCONNECT_SCHEME, pubkey);
    let mut first = true;
    for relay in relays {
        push_param(&mut uri, &mut first, "relay", relay);
    }
    push_param(&mut uri, &mut first, "secret", secret);
    push_param(&mut uri, &mut first, "name", &app.name);
    push_param(&mut uri, &mut first, "url", &app.url);
    push_param(&mut uri, &mut first, "image", &app.image);
    uri
}

/// `bunker://<signer pubkey>?relay=..&relay=..[&secret=..]`
pub fn encode_bunker_uri(signer_pubkey: &str, relays: &[String], secret: Option<&str>) -> String {
    let mut uri = format!("{}{}", BUNKER_SCHEME, signer_pubkey);
    let mut first = true;
    for relay in relays {
        push_param(&mut uri, &mut first, "relay", relay);
    }
    if let Some(secret) = secret {
        push_param(&mut uri, &mut first, "secret", secret);
    }
    uri
}

/// Splits `<authority>[/][?query][#fragment]` into a non-empty authority and its
/// decoded query pairs.
fn split_authority(rest: &str) -> Result<(String, Vec<(String, String)>), ParseError> {
    let rest = rest.split('#').next().unwrap_or_default();
    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, q),
        None => (rest, ""),
    };
    let authority = authority.trim_end_matches('/');
    if authority.is_empty() {
        return Err(ParseError::MissingPubkey);
    }
    let pairs = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok((authority.to_string(), pairs))
}

fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let uri = uri.trim();
    let prefix = uri.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    uri.get(scheme.len()..)
}

/// Parses a `bunker://` URI. Substitutes the default relay set when none is given.
pub fn decode_bunker_uri(uri: &str) -> Result<BunkerPointer, ParseError> {
    let rest = strip_scheme(uri, BUNKER_SCHEME).ok_or(ParseError::NotABunkerUri)?;
    let (pubkey, pairs) = split_authority(rest)?;

    let mut relays = Vec::new();
    let mut secret = None;
    for (key, value) in pairs {
        match key.as_str() {
            "relay" if !value.is_empty() => relays.push(value),
            "secret" if !value.is_empty() => secret = Some(value),
            _ => {}
        }
    }
    if relays.is_empty() {
        relays = default_relays();
    }

    Ok(BunkerPointer {
        pubkey,
        relays,
        secret,
    })
}

/// Parses a `nostrconnect://` URI as produced by [`encode_initiator_uri`].
pub fn decode_initiator_uri(uri: &str) -> Result<InitiatorUri, ParseError> {
    let rest = strip_scheme(uri, NOSTRCONNECT_SCHEME).ok_or(ParseError::NotANostrConnectUri)?;
    let (pubkey, pairs) = split_authority(rest)?;

    let mut relays = Vec::new();
    let mut secret = None;
    let mut app = AppMetadata::default();
    for (key, value) in pairs {
        match key.as_str() {
            "relay" if !value.is_empty() => relays.push(value),
            "secret" if !value.is_empty() => secret = Some(value),
            "name" => app.name = value,
            "url" => app.url = value,
            "image" => app.image = value,
            _ => {}
        }
    }

    Ok(InitiatorUri {
        pubkey,
        relays,
        secret: secret.ok_or(ParseError::MissingSecret)?,
        app,
    })
}
