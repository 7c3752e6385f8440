//! Best-effort lookup of the latest replaceable event across relays.

use std::time::Duration;

use futures_util::StreamExt;
use tracing::debug;

use crate::{
    event::{Event, Filter, Identity},
    transport::RelayTransport,
};

/// Time budget for a lookup when the caller does not pass one.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Ask every endpoint for the latest `kind` event of `author` and keep the
/// newest answer.
///
/// Events are collected until the transport closes the stream. If `timeout`
/// elapses first the whole result set is discarded and `None` is returned, as
/// is the case when the request cannot be opened at all. Unreachable relays
/// are never an error here. Events failing id or signature checks are
/// dropped.
///
/// Between events with equal `created_at` the first to arrive wins. Arrival
/// order depends on relay latency, so equal-timestamp versions may resolve
/// differently between runs.
pub async fn fetch_latest(
    transport: &dyn RelayTransport,
    endpoints: &[String],
    author: &Identity,
    kind: u32,
    timeout: Duration,
) -> Option<Event> {
    let filter = Filter::replaceable(author, kind);
    let stream = match transport.request(endpoints, filter.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(kind, author = %author.short(), error = %e, "request failed");
            return None;
        }
    };
    // Relays are not trusted to honour the filter or to relay genuine events.
    let collect = stream
        .filter(|ev| futures_util::future::ready(filter.matches(ev) && authentic(ev)))
        .collect::<Vec<_>>();
    let events = match tokio::time::timeout(timeout, collect).await {
        Ok(events) => events,
        Err(_) => {
            debug!(kind, author = %author.short(), ?timeout, "lookup timed out");
            return None;
        }
    };
    let found = events.len();
    let latest = latest(events);
    debug!(kind, author = %author.short(), found, "lookup finished");
    latest
}

fn authentic(ev: &Event) -> bool {
    match ev.verify() {
        Ok(()) => true,
        Err(e) => {
            debug!(id = %ev.id(), error = %e, "dropping unverifiable event");
            false
        }
    }
}

/// Pick the event with the strictly greatest `created_at`; ties keep the
/// earlier element.
pub fn latest(events: impl IntoIterator<Item = Event>) -> Option<Event> {
    events.into_iter().fold(None, |best, ev| match best {
        Some(b) if ev.created_at() <= b.created_at() => Some(b),
        _ => Some(ev),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::TransportError,
        event::{EventTemplate, Tag},
        signer::{KeySigner, Signer},
        transport::mock::MockTransport,
    };

    fn at(signer: &KeySigner, kind: u32, created_at: u64, marker: &str) -> Event {
        signer.sign_now(EventTemplate {
            kind,
            created_at,
            tags: vec![Tag::new(["t", marker])],
            content: String::new(),
        })
    }

    fn endpoints() -> Vec<String> {
        vec!["wss://a".into(), "wss://b".into()]
    }

    #[tokio::test]
    async fn returns_greatest_created_at() {
        let signer = KeySigner::generate();
        let transport = MockTransport::with_events(vec![
            at(&signer, 10040, 100, "x"),
            at(&signer, 10040, 300, "y"),
            at(&signer, 10040, 200, "z"),
        ]);
        let got = fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &signer.identity(),
            10040,
            DEFAULT_QUERY_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(got.created_at(), 300);

        let requested = transport.requested.lock().unwrap();
        assert_eq!(requested[0].0, endpoints());
        assert_eq!(requested[0].1.limit, Some(1));
    }

    #[tokio::test]
    async fn ignores_other_kinds_and_authors() {
        let me = KeySigner::generate();
        let other = KeySigner::generate();
        let transport = MockTransport::with_events(vec![
            at(&me, 10040, 10, "mine"),
            at(&me, 10002, 50, "relays"),
            at(&other, 10040, 99, "theirs"),
        ]);
        let got = fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &me.identity(),
            10040,
            DEFAULT_QUERY_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(got.created_at(), 10);
    }

    #[tokio::test]
    async fn forged_events_are_ignored() {
        let signer = KeySigner::generate();
        let genuine = at(&signer, 10040, 100, "mine");
        let mut forged = serde_json::to_value(&genuine).unwrap();
        forged["created_at"] = u64::MAX.into();
        forged["tags"] = serde_json::json!([["30382:rank", "attacker", "wss://evil"]]);
        forged["sig"] = "00".repeat(64).into();
        let forged: Event = serde_json::from_value(forged).unwrap();
        let transport = MockTransport::with_events(vec![genuine.clone(), forged]);
        let got = fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &signer.identity(),
            10040,
            DEFAULT_QUERY_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(got, genuine);
    }

    #[test]
    fn ties_keep_first_arrival() {
        let signer = KeySigner::generate();
        let first = at(&signer, 1, 5, "first");
        let second = at(&signer, 1, 5, "second");
        assert_eq!(latest(vec![first.clone(), second]), Some(first));
        assert_eq!(latest(Vec::new()), None);
    }

    #[tokio::test]
    async fn empty_result_is_none() {
        let signer = KeySigner::generate();
        let transport = MockTransport::with_events(vec![]);
        assert!(fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &signer.identity(),
            10040,
            DEFAULT_QUERY_TIMEOUT
        )
        .await
        .is_none());
    }

    #[tokio::test]
    async fn request_error_is_none() {
        let signer = KeySigner::generate();
        let transport = Arc::new(MockTransport {
            request_error: Some(TransportError::io("connection refused")),
            ..Default::default()
        });
        assert!(fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &signer.identity(),
            10040,
            DEFAULT_QUERY_TIMEOUT
        )
        .await
        .is_none());
    }

    #[tokio::test]
    async fn timeout_returns_none_within_budget() {
        let signer = KeySigner::generate();
        let transport = Arc::new(MockTransport {
            hang: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let budget = Duration::from_millis(150);
        let started = std::time::Instant::now();
        let got = fetch_latest(
            transport.as_ref(),
            &endpoints(),
            &signer.identity(),
            10040,
            budget,
        )
        .await;
        assert!(got.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= budget);
        assert!(elapsed < budget + Duration::from_millis(500));
    }
}
