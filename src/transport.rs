//! Relay transport capability used by every network-facing component.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    error::TransportError,
    event::{Event, Filter},
};

/// Stream of events received from one or more relays.
pub type EventStream = BoxStream<'static, Event>;

/// Outcome of publishing one event to one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub endpoint: String,
    pub accepted: bool,
    pub message: Option<String>,
}

impl PublishResult {
    pub fn accepted(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            accepted: true,
            message: None,
        }
    }

    pub fn rejected(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            accepted: false,
            message: Some(message.into()),
        }
    }
}

/// Publish/subscribe access to a set of relays.
///
/// Implementations decide which failures are transient; callers only look at
/// [`TransportError::transient`].
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Send `event` to every endpoint and report one result per endpoint.
    /// Unreachable relays are reported as rejected, not as an error.
    async fn publish(
        &self,
        endpoints: &[String],
        event: &Event,
    ) -> Result<Vec<PublishResult>, TransportError>;

    /// One-shot query. The stream ends once every relay has signalled end of
    /// stored events or dropped the connection.
    async fn request(
        &self,
        endpoints: &[String],
        filter: Filter,
    ) -> Result<EventStream, TransportError>;

    /// Live subscription. The stream ends only when every relay connection is
    /// gone; dropping it closes the connections.
    async fn subscribe(
        &self,
        endpoints: &[String],
        filter: Filter,
    ) -> Result<EventStream, TransportError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for unit tests.

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use futures_util::StreamExt;
    use tokio::sync::mpsc;

    use super::*;

    /// Scripted transport: canned query answers, canned publish results and a
    /// record of everything published.
    #[derive(Default)]
    pub struct MockTransport {
        pub stored: Mutex<Vec<Event>>,
        pub publish_script: Mutex<VecDeque<Result<Vec<bool>, TransportError>>>,
        pub published: Mutex<Vec<(Vec<String>, Event)>>,
        pub requested: Mutex<Vec<(Vec<String>, Filter)>>,
        pub request_error: Option<TransportError>,
        /// Keep the request stream open this long after the stored events.
        pub hang: Option<Duration>,
    }

    impl MockTransport {
        pub fn with_events(events: Vec<Event>) -> Arc<Self> {
            Arc::new(Self {
                stored: Mutex::new(events),
                ..Default::default()
            })
        }

        pub fn script_publish(&self, outcome: Result<Vec<bool>, TransportError>) {
            self.publish_script.lock().unwrap().push_back(outcome);
        }
    }

    #[async_trait]
    impl RelayTransport for MockTransport {
        async fn publish(
            &self,
            endpoints: &[String],
            event: &Event,
        ) -> Result<Vec<PublishResult>, TransportError> {
            self.published
                .lock()
                .unwrap()
                .push((endpoints.to_vec(), event.clone()));
            let scripted = self.publish_script.lock().unwrap().pop_front();
            let oks = match scripted {
                Some(outcome) => outcome?,
                None => vec![true; endpoints.len()],
            };
            Ok(endpoints
                .iter()
                .zip(oks)
                .map(|(url, ok)| {
                    if ok {
                        PublishResult::accepted(url.clone())
                    } else {
                        PublishResult::rejected(url.clone(), format!("{url} said no"))
                    }
                })
                .collect())
        }

        async fn request(
            &self,
            endpoints: &[String],
            filter: Filter,
        ) -> Result<EventStream, TransportError> {
            if let Some(err) = &self.request_error {
                return Err(err.clone());
            }
            self.requested
                .lock()
                .unwrap()
                .push((endpoints.to_vec(), filter.clone()));
            let events: Vec<Event> = self
                .stored
                .lock()
                .unwrap()
                .iter()
                .filter(|ev| filter.matches(ev))
                .cloned()
                .collect();
            let hang = self.hang;
            let (tx, mut rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                for ev in events {
                    let _ = tx.send(ev);
                }
                if let Some(d) = hang {
                    tokio::time::sleep(d).await;
                }
            });
            Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
        }

        async fn subscribe(
            &self,
            _endpoints: &[String],
            _filter: Filter,
        ) -> Result<EventStream, TransportError> {
            Ok(futures_util::stream::pending().boxed())
        }
    }
}
