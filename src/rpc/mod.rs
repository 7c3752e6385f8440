//! Procedure calls to a ContextVM server addressed by its public key.
//!
//! Requests are JSON-RPC 2.0 `tools/call` messages carried in kind 25910
//! events tagged with the server's key; the server answers with an event
//! tagged `["e", <request id>]`.

mod manager;
mod methods;
mod session;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub use manager::ClientManager;
pub use methods::*;
pub use session::ConnectionState;

use crate::{
    error::{Error, Result, TransportError},
    event::{EventTemplate, Identity, Tag, KIND_CONTEXTVM_MESSAGE},
    pool::RelayPool,
    relays::{self, DEFAULT_RELAYS},
    signer::{KeySigner, Signer},
    transport::RelayTransport,
};
use session::{Command, Session};

/// Public key of the hosted Relatr server.
pub const DEFAULT_SERVER_PUBKEY: &str =
    "60a6070044e5788bf8a9d4d4e5aaa98a3853eec38c3ecc483ced19800fb6b7b0";

/// Upper bound for one call, whatever the transport does.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed [`DEFAULT_SERVER_PUBKEY`].
pub fn default_server() -> Identity {
    Identity::from_str_unchecked(DEFAULT_SERVER_PUBKEY)
}

/// Options for [`RpcClient::new`]. Every field has a default.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server to call; defaults to [`DEFAULT_SERVER_PUBKEY`].
    pub target: Option<Identity>,
    /// Signer for requests. Takes precedence over `private_key`.
    pub signer: Option<Arc<dyn Signer>>,
    /// Hex secret key used when no signer is given. Without either, an
    /// ephemeral key is generated.
    pub private_key: Option<String>,
    /// Relays carrying the session; defaults to [`DEFAULT_RELAYS`].
    pub endpoints: Option<Vec<String>>,
    /// Transport; defaults to a [`RelayPool`].
    pub transport: Option<Arc<dyn RelayTransport>>,
    /// Upper bound for one call; defaults to [`DEFAULT_CALL_TIMEOUT`].
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: None,
            signer: None,
            private_key: None,
            endpoints: None,
            transport: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_target(mut self, target: Identity) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn RelayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn resolve_signer(&self) -> Arc<dyn Signer> {
        if let Some(signer) = &self.signer {
            return signer.clone();
        }
        match self.private_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => match KeySigner::from_hex(key) {
                Ok(signer) => Arc::new(signer),
                Err(e) => {
                    warn!(error = %e, "invalid private key, using an ephemeral key");
                    Arc::new(KeySigner::generate())
                }
            },
            None => Arc::new(KeySigner::generate()),
        }
    }
}

/// Bounded retry for read-only calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}

/// Client for one remote server.
///
/// Construction starts connecting in the background and never fails; a
/// connection problem shows up on the first call. Configuration is fixed for
/// the client's lifetime; see [`ClientManager`] for swapping clients.
pub struct RpcClient {
    target: Identity,
    signer: Arc<dyn Signer>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_id: AtomicU64,
    closed: AtomicBool,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl RpcClient {
    /// Build a client and spawn its session. Must be called inside a Tokio
    /// runtime.
    pub fn new(config: ClientConfig) -> Self {
        let target = config.target.clone().unwrap_or_else(default_server);
        let signer = config.resolve_signer();
        let endpoints = config
            .endpoints
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| relays::owned(DEFAULT_RELAYS));
        let transport = config
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(RelayPool::default()));
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let (commands, rx) = mpsc::channel(64);
        let session = Session {
            target: target.clone(),
            client: signer.identity(),
            endpoints,
            transport,
            state: state_tx,
        };
        tokio::spawn(session.run(rx));
        Self {
            target,
            signer,
            commands,
            state,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            call_timeout: config.call_timeout,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used by read-only methods.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn target(&self) -> &Identity {
        &self.target
    }

    /// Key requests are signed with.
    pub fn identity(&self) -> Identity {
        self.signer.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Call `method` with `args` and decode the structured result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, self.call_once(method, args)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::timeout(format!(
                "{method}: no response within {:?}",
                self.call_timeout
            ))
            .into()),
        }
    }

    /// [`RpcClient::call`] under the client's [`RetryPolicy`]. Meant for
    /// read-only methods only.
    pub async fn call_with_retry<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        self.retry
            .run(|| self.call::<T>(method, args.clone()))
            .await
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed("client disconnected").into());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": method, "arguments": args },
        });
        let template = EventTemplate::new(
            KIND_CONTEXTVM_MESSAGE,
            vec![Tag::new(["p", self.target.as_str()])],
            message.to_string(),
        );
        let request = self.signer.sign(template).await?;
        debug!(method, request = %request.id(), "calling");

        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Call { request, reply })
            .await
            .map_err(|_| TransportError::closed("connection closed"))?;
        let response = answer
            .await
            .map_err(|_| TransportError::closed("connection closed"))??;
        decode_response(response)
    }

    /// Close the session. Safe to call more than once; in-flight calls fail
    /// with a transient transport error.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Close { done }).await.is_ok() {
            let _ = wait.await;
        }
    }
}

/// Extract a method result from a JSON-RPC response message.
fn decode_response<T: DeserializeOwned>(response: Value) -> Result<T> {
    if let Some(err) = response.get("error") {
        return Err(Error::Remote {
            code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    let result = response
        .get("result")
        .ok_or_else(|| Error::Decode("response has neither result nor error".into()))?;
    let first_text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.iter().find_map(|b| b.get("text").and_then(Value::as_str)));
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(Error::Remote {
            code: 0,
            message: first_text.unwrap_or("tool reported an error").to_string(),
        });
    }
    let value = match result.get("structuredContent") {
        Some(v) => v.clone(),
        None => {
            let text = first_text
                .ok_or_else(|| Error::Decode("result has no structured content".into()))?;
            serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?
        }
    };
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}
