//! WebSocket relay transport speaking NIP-01.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future::join_all, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::TransportError,
    event::{Event, Filter},
    transport::{EventStream, PublishResult, RelayTransport},
};

type Ws = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Connection settings for [`RelayPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// Budget for TCP, TLS and WebSocket handshakes.
    pub connect_timeout: Duration,
    /// How long to wait for a relay's `OK` after sending an event.
    pub publish_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            tor_socks: None,
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// [`RelayTransport`] opening one WebSocket per relay per operation.
#[derive(Debug, Clone, Default)]
pub struct RelayPool {
    options: PoolOptions,
}

impl RelayPool {
    pub fn new(options: PoolOptions) -> Self {
        Self { options }
    }

    async fn connect(&self, relay: &str) -> Result<Ws, TransportError> {
        let fut = connect_ws(relay, self.options.tor_socks.as_deref());
        match tokio::time::timeout(self.options.connect_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::timeout(format!("connecting to {relay}"))),
        }
    }

    async fn publish_one(&self, relay: &str, event: &Event) -> PublishResult {
        let attempt = async {
            let mut ws = self.connect(relay).await?;
            let frame = json!(["EVENT", event]);
            ws.send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| TransportError::closed(e.to_string()))?;
            let res = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(txt))) => match RelayMessage::parse(&txt) {
                        Some(RelayMessage::Ok {
                            id,
                            accepted,
                            message,
                        }) if id == event.id() => {
                            break Ok((accepted, message));
                        }
                        Some(RelayMessage::Notice(msg)) => debug!(relay, %msg, "notice"),
                        _ => {}
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        break Err(TransportError::closed("connection closed"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(TransportError::closed(e.to_string())),
                }
            };
            let _ = ws.close(None).await;
            res
        };
        let outcome = match tokio::time::timeout(self.options.publish_timeout, attempt).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::timeout("no OK from relay")),
        };
        match outcome {
            Ok((true, _)) => PublishResult::accepted(relay),
            Ok((false, message)) => PublishResult::rejected(relay, message),
            Err(e) => PublishResult::rejected(relay, e.message),
        }
    }

    /// Connect to every relay and issue the same `REQ`. Relays that cannot be
    /// reached are logged and skipped.
    async fn open_all(&self, endpoints: &[String], filter: &Filter) -> Vec<(String, String, Ws)> {
        let attempts = endpoints.iter().map(|relay| async move {
            let sub_id = subscription_id();
            let res = async {
                let mut ws = self.connect(relay).await?;
                let req = json!(["REQ", sub_id, filter]);
                ws.send(Message::Text(req.to_string()))
                    .await
                    .map_err(|e| TransportError::closed(e.to_string()))?;
                Ok::<_, TransportError>(ws)
            }
            .await;
            match res {
                Ok(ws) => Some((relay.clone(), sub_id, ws)),
                Err(e) => {
                    warn!(%relay, error = %e, "relay unavailable");
                    None
                }
            }
        });
        join_all(attempts).await.into_iter().flatten().collect()
    }

    fn spawn_readers(conns: Vec<(String, String, Ws)>, until_eose: bool) -> EventStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (relay, sub_id, ws) in conns {
            let tx = tx.clone();
            tokio::spawn(async move {
                read_subscription(relay, sub_id, ws, tx, until_eose).await;
            });
        }
        drop(tx);
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}

#[async_trait]
impl RelayTransport for RelayPool {
    async fn publish(
        &self,
        endpoints: &[String],
        event: &Event,
    ) -> Result<Vec<PublishResult>, TransportError> {
        let attempts = endpoints.iter().map(|relay| self.publish_one(relay, event));
        Ok(join_all(attempts).await)
    }

    async fn request(
        &self,
        endpoints: &[String],
        filter: Filter,
    ) -> Result<EventStream, TransportError> {
        let conns = self.open_all(endpoints, &filter).await;
        Ok(Self::spawn_readers(conns, true))
    }

    async fn subscribe(
        &self,
        endpoints: &[String],
        filter: Filter,
    ) -> Result<EventStream, TransportError> {
        let conns = self.open_all(endpoints, &filter).await;
        if conns.is_empty() {
            return Err(TransportError::closed("no relay reachable"));
        }
        Ok(Self::spawn_readers(conns, false))
    }
}

/// Forward matching `EVENT`s from one relay until end of stored events (when
/// `until_eose`), the relay closes, or the receiver goes away.
async fn read_subscription(
    relay: String,
    sub_id: String,
    mut ws: Ws,
    tx: mpsc::UnboundedSender<Event>,
    until_eose: bool,
) {
    loop {
        let msg = tokio::select! {
            _ = tx.closed() => break,
            msg = ws.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(txt))) => match RelayMessage::parse(&txt) {
                Some(RelayMessage::Event { sub, event }) if sub == sub_id => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Some(RelayMessage::Eose(sub)) if sub == sub_id && until_eose => break,
                Some(RelayMessage::Closed { sub, message }) if sub == sub_id => {
                    debug!(%relay, %message, "subscription closed by relay");
                    break;
                }
                Some(RelayMessage::Notice(msg)) => debug!(%relay, %msg, "notice"),
                _ => {}
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%relay, error = %e, "read failed");
                break;
            }
        }
    }
    let close = json!(["CLOSE", sub_id]);
    let _ = ws.send(Message::Text(close.to_string())).await;
    let _ = ws.close(None).await;
}

/// Relay-to-client frames this client understands.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelayMessage {
    Event { sub: String, event: Event },
    Eose(String),
    Ok {
        id: String,
        accepted: bool,
        message: String,
    },
    Closed { sub: String, message: String },
    Notice(String),
}

impl RelayMessage {
    pub(crate) fn parse(txt: &str) -> Option<Self> {
        let val: Value = serde_json::from_str(txt).ok()?;
        let arr = val.as_array()?;
        let str_at = |i: usize| arr.get(i).and_then(|v| v.as_str()).map(str::to_string);
        match arr.first()?.as_str()? {
            "EVENT" if arr.len() >= 3 => {
                let event = serde_json::from_value(arr[2].clone()).ok()?;
                Some(RelayMessage::Event {
                    sub: str_at(1)?,
                    event,
                })
            }
            "EOSE" => Some(RelayMessage::Eose(str_at(1)?)),
            "OK" => Some(RelayMessage::Ok {
                id: str_at(1)?,
                accepted: arr.get(2)?.as_bool()?,
                message: str_at(3).unwrap_or_default(),
            }),
            "CLOSED" => Some(RelayMessage::Closed {
                sub: str_at(1)?,
                message: str_at(2).unwrap_or_default(),
            }),
            "NOTICE" => Some(RelayMessage::Notice(str_at(1).unwrap_or_default())),
            _ => None,
        }
    }
}

fn subscription_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<Ws, TransportError> {
    let url = Url::parse(relay).map_err(|e| TransportError::io(format!("{relay}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::io(format!("{relay}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::io(format!("{relay}: missing port")))?;
    let req = relay
        .into_client_request()
        .map_err(|e| TransportError::io(e.to_string()))?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(
            Socks5Stream::connect(proxy, (host, port))
                .await
                .map_err(|e| TransportError::io(e.to_string()))?,
        )
    } else {
        Box::new(
            TcpStream::connect((host, port))
                .await
                .map_err(|e| TransportError::io(e.to_string()))?,
        )
    };
    let (ws, _) = client_async_tls(req, stream)
        .await
        .map_err(|e| TransportError::io(e.to_string()))?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
