//! Configuration loading from `.env` files.

use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::{
    event::Identity,
    pool::{PoolOptions, RelayPool},
    query::DEFAULT_QUERY_TIMEOUT,
    relays::{self, DEFAULT_RELAYS},
    rpc::{self, ClientConfig, DEFAULT_CALL_TIMEOUT},
};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Server the RPC client talks to.
    pub server_pubkey: Identity,
    /// Relays carrying RPC traffic and used as the default selection.
    pub relays: Vec<String>,
    /// Optional hex secret key; an ephemeral key is used when absent.
    pub private_key: Option<String>,
    /// Upper bound for one RPC call.
    pub call_timeout: Duration,
    /// Budget for relay lookups.
    pub query_timeout: Duration,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file. Variables already set in
    /// the process environment take precedence.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        Self::from_process_env()
    }

    /// Read settings from the process environment only.
    pub fn from_process_env() -> Result<Self> {
        let server_pubkey = match non_empty("RELATR_SERVER_PUBKEY") {
            Some(key) => key.parse().context("RELATR_SERVER_PUBKEY")?,
            None => rpc::default_server(),
        };
        let relays = relay_urls(&env::var("RELATR_RELAYS").unwrap_or_default())
            .unwrap_or_else(|| relays::owned(DEFAULT_RELAYS));
        let private_key = non_empty("RELATR_PRIVATE_KEY");
        let call_timeout = millis("RELATR_CALL_TIMEOUT_MS").unwrap_or(DEFAULT_CALL_TIMEOUT);
        let query_timeout = millis("RELATR_QUERY_TIMEOUT_MS").unwrap_or(DEFAULT_QUERY_TIMEOUT);
        let tor_socks = non_empty("TOR_SOCKS");
        Ok(Self {
            server_pubkey,
            relays,
            private_key,
            call_timeout,
            query_timeout,
            tor_socks,
        })
    }

    /// Relay transport honouring `TOR_SOCKS`.
    pub fn relay_pool(&self) -> RelayPool {
        RelayPool::new(PoolOptions {
            tor_socks: self.tor_socks.clone(),
            ..Default::default()
        })
    }

    /// RPC client options matching these settings.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            target: Some(self.server_pubkey.clone()),
            signer: None,
            private_key: self.private_key.clone(),
            endpoints: Some(self.relays.clone()),
            transport: Some(Arc::new(self.relay_pool())),
            call_timeout: self.call_timeout,
        }
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.trim().is_empty())
}

fn millis(var: &str) -> Option<Duration> {
    non_empty(var)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Comma-separated relay URLs, de-duplicated in order. `None` when the list
/// names no relay.
fn relay_urls(input: &str) -> Option<Vec<String>> {
    let urls = relays::resolve(
        input.split(',').map(str::trim).filter(|url| !url.is_empty()),
        Vec::<String>::new(),
        Vec::<String>::new(),
    );
    (!urls.is_empty()).then_some(urls)
}
