//! Sign a new version of a replaceable event and fan it out to relays.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    event::{unix_now, Event, EventTemplate, Tag},
    relays::{self, RelaySelection},
    signer::Signer,
    transport::{PublishResult, RelayTransport},
};

/// Result of a write that at least one relay accepted.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub event: Event,
    /// Relays that answered `OK true`.
    pub accepted_by: Vec<String>,
    /// Every per-relay answer, accepted or not.
    pub results: Vec<PublishResult>,
}

/// Builds, signs and publishes replaceable events.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn RelayTransport>,
    signer: Option<Arc<dyn Signer>>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn RelayTransport>, signer: Option<Arc<dyn Signer>>) -> Self {
        Self { transport, signer }
    }

    pub fn signer(&self) -> Option<&Arc<dyn Signer>> {
        self.signer.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn RelayTransport> {
        &self.transport
    }

    /// Publish a new version of `base` (or a first version when `None`).
    ///
    /// The write goes to `destinations` plus the selected relays, falling back
    /// to the selection's defaults, so it never reaches fewer relays than the
    /// read that found `base`. The new `created_at` is forced past the base's
    /// so the new version always supersedes it; a base already at `u64::MAX`
    /// is refused with [`Error::InvalidArgument`].
    pub async fn publish(
        &self,
        base: Option<&Event>,
        tags: Vec<Tag>,
        kind: u32,
        content: impl Into<String>,
        destinations: &[String],
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::Signing("no signer configured".into()))?;
        let created_at = match base {
            Some(b) => {
                let next = b.created_at().checked_add(1).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "base event {} has created_at {} and cannot be superseded",
                        b.id(),
                        b.created_at()
                    ))
                })?;
                unix_now().max(next)
            }
            None => unix_now(),
        };
        let template = EventTemplate {
            kind,
            created_at,
            tags,
            content: content.into(),
        };
        let event = signer.sign(template).await?;
        let targets = relays::resolve(destinations, selection.selected(), selection.defaults());
        self.publish_signed(event, &targets).await
    }

    /// Publish an already signed event to exactly `targets`.
    pub async fn publish_signed(&self, event: Event, targets: &[String]) -> Result<PublishOutcome> {
        debug!(id = %event.id(), kind = event.kind(), relays = targets.len(), "publishing");
        let results = self.transport.publish(targets, &event).await?;
        let accepted_by: Vec<String> = results
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.endpoint.clone())
            .collect();
        if accepted_by.is_empty() {
            warn!(id = %event.id(), tried = results.len(), "no relay accepted event");
            return Err(Error::Publish { results });
        }
        for r in results.iter().filter(|r| !r.accepted) {
            debug!(relay = %r.endpoint, message = ?r.message, "relay rejected event");
        }
        Ok(PublishOutcome {
            event,
            accepted_by,
            results,
        })
    }
}
