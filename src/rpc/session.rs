//! Session task owning the response subscription and the pending calls.

use std::{collections::HashMap, sync::Arc};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::{
    error::{Error, TransportError},
    event::{Event, Filter, Identity, KIND_CONTEXTVM_MESSAGE},
    transport::{EventStream, RelayTransport},
};

/// Connection state published by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial subscription in progress.
    Connecting,
    /// Listening for responses.
    Ready,
    /// Subscription lost or never established; the next call reconnects.
    Down(TransportError),
    /// Disconnected by the owner.
    Closed,
}

pub(crate) type Reply = oneshot::Sender<Result<Value, Error>>;

pub(crate) enum Command {
    /// Publish a signed request and answer with the raw JSON-RPC response.
    Call { request: Event, reply: Reply },
    Close { done: oneshot::Sender<()> },
}

pub(crate) struct Session {
    pub target: Identity,
    pub client: Identity,
    pub endpoints: Vec<String>,
    pub transport: Arc<dyn RelayTransport>,
    pub state: watch::Sender<ConnectionState>,
}

impl Session {
    fn response_filter(&self) -> Filter {
        Filter {
            kinds: Some(vec![KIND_CONTEXTVM_MESSAGE]),
            authors: Some(vec![self.target.to_string()]),
            p: Some(vec![self.client.to_string()]),
            ..Default::default()
        }
    }

    async fn connect(&self) -> Result<EventStream, TransportError> {
        match self
            .transport
            .subscribe(&self.endpoints, self.response_filter())
            .await
        {
            Ok(stream) => {
                debug!(target = %self.target.short(), "session ready");
                self.state.send_replace(ConnectionState::Ready);
                Ok(stream)
            }
            Err(e) => {
                warn!(target = %self.target.short(), error = %e, "failed to connect to server");
                self.state.send_replace(ConnectionState::Down(e.clone()));
                Err(e)
            }
        }
    }

    pub(crate) async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let mut stream = self.connect().await.ok();
        let mut pending: HashMap<String, Reply> = HashMap::new();
        let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<(String, Error)>();

        let done = loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Call { request, reply }) => {
                        if stream.is_none() {
                            match self.connect().await {
                                Ok(s) => stream = Some(s),
                                Err(e) => {
                                    let mut err = TransportError::not_ready(format!("session not connected: {}", e.message));
                                    err.transient = e.transient;
                                    let _ = reply.send(Err(err.into()));
                                    continue;
                                }
                            }
                        }
                        let id = request.id().to_string();
                        track(&mut pending, id.clone(), reply);
                        let transport = self.transport.clone();
                        let endpoints = self.endpoints.clone();
                        let failed = failed_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = send_request(transport.as_ref(), &endpoints, &request).await {
                                let _ = failed.send((id, e));
                            }
                        });
                    }
                    Some(Command::Close { done }) => break Some(done),
                    None => break None,
                },
                ev = next_event(&mut stream) => match ev {
                    Some(ev) => self.route(ev, &mut pending),
                    None => {
                        let err = TransportError::closed("connection closed");
                        warn!(target = %self.target.short(), "response subscription ended");
                        self.state.send_replace(ConnectionState::Down(err.clone()));
                        stream = None;
                        for (_, reply) in pending.drain() {
                            let _ = reply.send(Err(err.clone().into()));
                        }
                    }
                },
                Some((id, err)) = failed_rx.recv() => {
                    if let Some(reply) = pending.remove(&id) {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        };

        drop(stream);
        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(TransportError::closed("connection closed").into()));
        }
        self.state.send_replace(ConnectionState::Closed);
        debug!(target = %self.target.short(), "session closed");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Hand a response to the call it answers.
    fn route(&self, ev: Event, pending: &mut HashMap<String, Reply>) {
        if ev.pubkey() != self.target.as_str() || ev.kind() != KIND_CONTEXTVM_MESSAGE {
            return;
        }
        if let Err(e) = ev.verify() {
            debug!(id = %ev.id(), error = %e, "dropping unverifiable response");
            return;
        }
        let Some(request_id) = ev
            .tags()
            .iter()
            .find(|t| t.key() == Some("e"))
            .and_then(|t| t.value())
        else {
            return;
        };
        let Some(reply) = pending.remove(request_id) else {
            debug!(request_id, "response for unknown request");
            return;
        };
        let parsed = serde_json::from_str::<Value>(ev.content())
            .map_err(|e| Error::Decode(format!("response is not JSON: {e}")));
        let _ = reply.send(parsed);
    }
}

/// Register a call, first forgetting calls whose caller stopped waiting
/// (timed out or dropped).
fn track(pending: &mut HashMap<String, Reply>, id: String, reply: Reply) {
    pending.retain(|_, r| !r.is_closed());
    pending.insert(id, reply);
}

/// Publish one request; fails unless some relay accepted it.
async fn send_request(
    transport: &dyn RelayTransport,
    endpoints: &[String],
    request: &Event,
) -> Result<(), Error> {
    let results = transport.publish(endpoints, request).await?;
    if results.iter().any(|r| r.accepted) {
        return Ok(());
    }
    let reasons: Vec<String> = results
        .iter()
        .map(|r| format!("{}: {}", r.endpoint, r.message.as_deref().unwrap_or("rejected")))
        .collect();
    Err(TransportError::rejected(format!("request not accepted ({})", reasons.join(", "))).into())
}

/// Next event from the subscription, or pending forever when there is none.
async fn next_event(stream: &mut Option<EventStream>) -> Option<Event> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}
