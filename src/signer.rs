//! Signing capabilities: a local key, or a remote approver.

use async_trait::async_trait;
use rand::RngCore;
use secp256k1::{Keypair, Message, Secp256k1};
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Error, Result},
    event::{event_hash, Event, EventTemplate, Identity},
};

/// Turns an [`EventTemplate`] into a signed [`Event`] authored by
/// [`Signer::identity`].
#[async_trait]
pub trait Signer: Send + Sync {
    /// Public key the signer signs as.
    fn identity(&self) -> Identity;

    /// Sign a template or fail with [`Error::Signing`].
    async fn sign(&self, template: EventTemplate) -> Result<Event>;
}

/// Signs with a secp256k1 secret key held in memory.
pub struct KeySigner {
    keypair: Keypair,
    identity: Identity,
}

impl KeySigner {
    /// Build a signer from a 32 byte hex secret key.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim()).map_err(|e| Error::Signing(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair =
            Keypair::from_seckey_slice(&secp, secret).map_err(|e| Error::Signing(e.to_string()))?;
        let identity = Identity::from_x_only(&keypair.x_only_public_key().0);
        Ok(Self { keypair, identity })
    }

    /// Fresh random key, used when no account is configured.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut sk = [0u8; 32];
            rng.fill_bytes(&mut sk);
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(signer) = Self::from_bytes(&sk) {
                return signer;
            }
        }
    }

    /// Synchronous signing; the async trait method delegates here.
    pub fn sign_now(&self, template: EventTemplate) -> Event {
        let secp = Secp256k1::signing_only();
        let hash = event_hash(
            self.identity.as_str(),
            template.created_at,
            template.kind,
            &template.tags,
            &template.content,
        );
        let msg = Message::from_digest(hash);
        let mut aux = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut aux);
        let sig = secp.sign_schnorr_with_aux_rand(&msg, &self.keypair, &aux);
        Event::from_parts(template, &self.identity, hash, &sig)
    }
}

#[async_trait]
impl Signer for KeySigner {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    async fn sign(&self, template: EventTemplate) -> Result<Event> {
        Ok(self.sign_now(template))
    }
}

/// A pending approval handed to whoever drives a [`RemoteSigner`].
#[derive(Debug)]
pub struct SignRequest {
    /// Key the event must be signed with.
    pub pubkey: Identity,
    pub template: EventTemplate,
    reply: oneshot::Sender<std::result::Result<Event, String>>,
}

impl SignRequest {
    pub fn approve(self, event: Event) {
        let _ = self.reply.send(Ok(event));
    }

    pub fn refuse(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(reason.into()));
    }
}

/// Signer whose key lives elsewhere (a bunker, a browser extension, a
/// hardware device). Each template is forwarded as a [`SignRequest`] and the
/// approver's answer is checked before it is returned.
#[derive(Clone)]
pub struct RemoteSigner {
    identity: Identity,
    requests: mpsc::Sender<SignRequest>,
}

impl RemoteSigner {
    /// Create a signer for `identity` and the receiving end the approver
    /// drains.
    pub fn new(identity: Identity, buffer: usize) -> (Self, mpsc::Receiver<SignRequest>) {
        let (requests, rx) = mpsc::channel(buffer.max(1));
        (Self { identity, requests }, rx)
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    async fn sign(&self, template: EventTemplate) -> Result<Event> {
        let (reply, answer) = oneshot::channel();
        let request = SignRequest {
            pubkey: self.identity.clone(),
            template: template.clone(),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::Signing("remote signer is gone".into()))?;
        let event = answer
            .await
            .map_err(|_| Error::Signing("remote signer dropped the request".into()))?
            .map_err(Error::Signing)?;

        event
            .verify()
            .map_err(|e| Error::Signing(format!("remote signature invalid: {e}")))?;
        if event.pubkey() != self.identity.as_str() {
            return Err(Error::Signing("remote signer used a different key".into()));
        }
        if event.kind() != template.kind
            || event.created_at() != template.created_at
            || event.tags() != template.tags.as_slice()
            || event.content() != template.content
        {
            return Err(Error::Signing("remote signer altered the event".into()));
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn template() -> EventTemplate {
        EventTemplate {
            kind: 10040,
            created_at: 1_700_000_000,
            tags: vec![Tag::new(["30382:rank", "aa", "wss://r"])],
            content: String::new(),
        }
    }

    #[tokio::test]
    async fn key_signer_signs_verifiable_events() {
        let signer = KeySigner::from_bytes(&[1u8; 32]).unwrap();
        let ev = signer.sign(template()).await.unwrap();
        ev.verify().unwrap();
        assert_eq!(ev.pubkey(), signer.identity().as_str());
        assert_eq!(ev.created_at(), 1_700_000_000);
    }

    #[test]
    fn key_signer_rejects_bad_hex() {
        assert!(matches!(KeySigner::from_hex("zz"), Err(Error::Signing(_))));
        assert!(matches!(
            KeySigner::from_hex(&"00".repeat(32)),
            Err(Error::Signing(_))
        ));
        assert!(KeySigner::from_hex(&"01".repeat(32)).is_ok());
    }

    #[tokio::test]
    async fn remote_signer_round_trip() {
        let key = KeySigner::generate();
        let (remote, mut rx) = RemoteSigner::new(key.identity(), 4);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let ev = key.sign_now(req.template.clone());
                req.approve(ev);
            }
        });
        let ev = remote.sign(template()).await.unwrap();
        assert_eq!(ev.pubkey(), remote.identity().as_str());
    }

    #[tokio::test]
    async fn remote_signer_refusal_is_signing_error() {
        let (remote, mut rx) = RemoteSigner::new(KeySigner::generate().identity(), 1);
        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                req.refuse("user declined");
            }
        });
        let err = remote.sign(template()).await.unwrap_err();
        assert!(matches!(err, Error::Signing(msg) if msg == "user declined"));
    }

    #[tokio::test]
    async fn remote_signer_rejects_wrong_key() {
        let (remote, mut rx) = RemoteSigner::new(KeySigner::generate().identity(), 1);
        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                let other = KeySigner::generate();
                let ev = other.sign_now(req.template.clone());
                req.approve(ev);
            }
        });
        assert!(matches!(
            remote.sign(template()).await,
            Err(Error::Signing(_))
        ));
    }

    #[tokio::test]
    async fn remote_signer_without_approver_fails() {
        let (remote, rx) = RemoteSigner::new(KeySigner::generate().identity(), 1);
        drop(rx);
        assert!(matches!(
            remote.sign(template()).await,
            Err(Error::Signing(_))
        ));
    }
}
