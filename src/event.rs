//! Nostr event model.

use std::{fmt, str::FromStr};

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Relay list (NIP-65) carrying `r` tags.
pub const KIND_RELAY_LIST: u32 = 10002;
/// Trusted assertion provider list carrying `<kind>:<subtype>` tags.
pub const KIND_TRUSTED_PROVIDERS: u32 = 10040;
/// Ephemeral ContextVM message wrapping one JSON-RPC payload.
pub const KIND_CONTEXTVM_MESSAGE: u32 = 25910;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element is the key and the second the value that merges match
/// on. Later elements carry hints such as a relay URL or a read/write marker:
///
/// - `["r", "wss://relay.example", "write"]`
/// - `["30382:rank", "<provider pubkey>", "wss://relay.example"]`
/// - `["p", "<pubkey>"]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(fields.into_iter().map(Into::into).collect())
    }

    /// Tag key (position 0).
    pub fn key(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (position 1).
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }
}

/// Hex-encoded x-only public key naming an RPC target or an event author.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

/// Returned when a string is not a 64 character hex key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid public key: {0:?}")]
pub struct InvalidIdentity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened `abcdef...uvwxyz` form for logs.
    pub fn short(&self) -> String {
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 6..])
    }

    /// For compile-time constants already known to be valid.
    pub(crate) fn from_str_unchecked(s: &str) -> Self {
        Identity(s.to_ascii_lowercase())
    }

    pub(crate) fn from_x_only(pk: &XOnlyPublicKey) -> Self {
        Identity(hex::encode(pk.serialize()))
    }
}

impl FromStr for Identity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Identity(s.to_ascii_lowercase()))
        } else {
            Err(InvalidIdentity(s.to_string()))
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = InvalidIdentity;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unsigned event contents handed to a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl EventTemplate {
    pub fn new(kind: u32, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: unix_now(),
            tags,
            content: content.into(),
        }
    }
}

/// Signed Nostr event as exchanged with relays.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "60a6...",
///   "kind": 10040,
///   "created_at": 1700000000,
///   "tags": [["30382:rank", "60a6...", "wss://relay.contextvm.org"]],
///   "content": "",
///   "sig": "deadbeef..."
/// }
/// ```
///
/// The id and signature cover every other field, so a signed event is read
/// only. New versions are built from an [`EventTemplate`] and signed again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    id: String,
    pubkey: String,
    kind: u32,
    created_at: u64,
    tags: Vec<Tag>,
    content: String,
    sig: String,
}

/// Reasons [`Event::verify`] rejects an event.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("id mismatch")]
    IdMismatch,
    #[error("malformed hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Secp(#[from] secp256k1::Error),
}

impl Event {
    /// Assemble a signed event from a template, an author key and a signature
    /// over [`event_hash`].
    pub(crate) fn from_parts(
        template: EventTemplate,
        pubkey: &Identity,
        hash: [u8; 32],
        sig: &Signature,
    ) -> Self {
        Event {
            id: hex::encode(hash),
            pubkey: pubkey.to_string(),
            kind: template.kind,
            created_at: template.created_at,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(sig.as_ref()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// True when any tag has `key` at position 0 and `value` at position 1.
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.key() == Some(key) && t.value() == Some(value))
    }

    /// Verify the event's id and Schnorr signature.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let hash = event_hash(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if hex::encode(hash) != self.id {
            return Err(VerifyError::IdMismatch);
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(&hash)?;
        secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }
}

/// Compute the NIP-01 event hash.
pub(crate) fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> [u8; 32] {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    // Serializing a `Value` built from strings and integers cannot fail.
    let data = arr.to_string();
    Sha256::digest(data.as_bytes()).into()
}

/// Subscription filter sent in `REQ` messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<String>>,
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filter {
    /// Latest replaceable event of `kind` authored by `author`.
    pub fn replaceable(author: &Identity, kind: u32) -> Self {
        Filter {
            kinds: Some(vec![kind]),
            authors: Some(vec![author.to_string()]),
            limit: Some(1),
            ..Default::default()
        }
    }

    /// Whether `ev` satisfies every populated field.
    pub fn matches(&self, ev: &Event) -> bool {
        let tag_match = |key: &str, wanted: &Option<Vec<String>>| {
            wanted
                .as_ref()
                .map_or(true, |vals| vals.iter().any(|v| ev.has_tag(key, v)))
        };
        self.kinds.as_ref().map_or(true, |k| k.contains(&ev.kind))
            && self
                .authors
                .as_ref()
                .map_or(true, |a| a.iter().any(|a| a == &ev.pubkey))
            && tag_match("p", &self.p)
            && tag_match("e", &self.e)
            && self.since.map_or(true, |s| ev.created_at >= s)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::Keypair;

    fn signed(kind: u32, tags: Vec<Tag>) -> Event {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[1u8; 32]).unwrap();
        let pubkey = Identity::from_x_only(&kp.x_only_public_key().0);
        let template = EventTemplate {
            kind,
            created_at: 1,
            tags,
            content: String::new(),
        };
        let hash = event_hash(
            pubkey.as_str(),
            template.created_at,
            template.kind,
            &template.tags,
            &template.content,
        );
        let msg = Message::from_digest_slice(&hash).unwrap();
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
        Event::from_parts(template, &pubkey, hash, &sig)
    }

    #[test]
    fn verify_accepts_signed_and_rejects_tampered() {
        let ev = signed(1, vec![Tag::new(["t", "news"])]);
        ev.verify().unwrap();

        let mut val = serde_json::to_value(&ev).unwrap();
        val["content"] = "changed".into();
        let tampered: Event = serde_json::from_value(val).unwrap();
        assert!(matches!(tampered.verify(), Err(VerifyError::IdMismatch)));
    }

    #[test]
    fn event_json_shape() {
        let ev = signed(KIND_TRUSTED_PROVIDERS, vec![Tag::new(["30382:rank", "aa", "wss://r"])]);
        let val = serde_json::to_value(&ev).unwrap();
        assert_eq!(val["kind"], 10040);
        assert_eq!(val["tags"][0][0], "30382:rank");
        assert_eq!(val["id"].as_str().unwrap().len(), 64);
        assert_eq!(val["sig"].as_str().unwrap().len(), 128);
    }

    #[test]
    fn identity_parse() {
        let hex = "60A6070044e5788bf8a9d4d4e5aaa98a3853eec38c3ecc483ced19800fb6b7b0";
        let id: Identity = hex.parse().unwrap();
        assert_eq!(id.as_str(), hex.to_ascii_lowercase());
        assert_eq!(id.short(), "60a607...b6b7b0");
        assert!("npub1xyz".parse::<Identity>().is_err());
        assert!(hex[..63].parse::<Identity>().is_err());
        assert!(serde_json::from_str::<Identity>("\"zz\"").is_err());
    }

    #[test]
    fn filter_serializes_tag_keys() {
        let filter = Filter {
            kinds: Some(vec![KIND_CONTEXTVM_MESSAGE]),
            p: Some(vec!["abc".into()]),
            ..Default::default()
        };
        let val = serde_json::to_value(&filter).unwrap();
        assert_eq!(val, serde_json::json!({"kinds": [25910], "#p": ["abc"]}));
    }

    #[test]
    fn filter_matches_fields() {
        let ev = signed(KIND_CONTEXTVM_MESSAGE, vec![Tag::new(["e", "req1"])]);
        let mut filter = Filter {
            kinds: Some(vec![KIND_CONTEXTVM_MESSAGE]),
            authors: Some(vec![ev.pubkey().to_string()]),
            e: Some(vec!["req1".into()]),
            ..Default::default()
        };
        assert!(filter.matches(&ev));
        filter.e = Some(vec!["other".into()]);
        assert!(!filter.matches(&ev));
        assert!(!Filter::replaceable(&"0".repeat(64).parse().unwrap(), 1).matches(&ev));
    }
}
