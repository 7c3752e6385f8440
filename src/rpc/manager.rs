//! Ownership of the current [`RpcClient`] across configuration changes.

use std::sync::Arc;

use tracing::debug;

use super::{ClientConfig, RpcClient};
use crate::{event::Identity, signer::Signer};

/// Holds the live client and rebuilds it when the target, signer or relays
/// change.
///
/// A reconfiguration builds the new client, makes it current, and only then
/// disconnects the old one. Callers that cloned the old `Arc` before the swap
/// keep using it until its disconnect completes, so two sessions can briefly
/// overlap.
pub struct ClientManager {
    config: ClientConfig,
    current: Arc<RpcClient>,
}

impl ClientManager {
    /// Build the first client. Must be called inside a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let current = Arc::new(RpcClient::new(config.clone()));
        Self { config, current }
    }

    /// Current client.
    pub fn get(&self) -> Arc<RpcClient> {
        self.current.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the client with one built from `config` and release the old
    /// session.
    pub async fn reconfigure(&mut self, config: ClientConfig) -> Arc<RpcClient> {
        let next = Arc::new(RpcClient::new(config.clone()));
        let previous = std::mem::replace(&mut self.current, next.clone());
        self.config = config;
        debug!(
            from = %previous.target().short(),
            to = %next.target().short(),
            "swapped rpc client"
        );
        previous.disconnect().await;
        next
    }

    /// Point at another server, keeping signer and relays.
    pub async fn set_target(&mut self, target: Identity) -> Arc<RpcClient> {
        let config = self.config.clone().with_target(target);
        self.reconfigure(config).await
    }

    /// Sign as another account. `None` falls back to the configured private
    /// key, then to an ephemeral key.
    pub async fn set_signer(&mut self, signer: Option<Arc<dyn Signer>>) -> Arc<RpcClient> {
        let mut config = self.config.clone();
        config.signer = signer;
        self.reconfigure(config).await
    }

    /// Disconnect the current client.
    pub async fn shutdown(self) {
        self.current.disconnect().await;
    }
}
