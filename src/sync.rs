//! Read-merge-write flows for the user's replaceable lists: the NIP-65 relay
//! list and the trusted assertion provider list.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    error::{Error, Result},
    event::{Event, Identity, Tag, KIND_RELAY_LIST, KIND_TRUSTED_PROVIDERS},
    merge::TagEdit,
    publish::{PublishOutcome, Publisher},
    query::{fetch_latest, DEFAULT_QUERY_TIMEOUT},
    relays::{self, RelaySelection, UserRelayList, COMMON_RELAYS},
    signer::Signer,
    transport::RelayTransport,
};

/// Tag key under which a rank provider is listed.
pub const RANK_PROVIDER_TAG: &str = "30382:rank";
/// Prefix shared by every trusted assertion provider tag.
pub const PROVIDER_TAG_PREFIX: &str = "30382";

/// Read/write marker of a relay list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMarker {
    Both,
    Read,
    Write,
}

impl RelayMarker {
    fn tag(self, url: &str) -> Tag {
        match self {
            RelayMarker::Both => Tag::new(["r", url]),
            RelayMarker::Read => Tag::new(["r", url, "read"]),
            RelayMarker::Write => Tag::new(["r", url, "write"]),
        }
    }
}

/// Lookups and edits of a user's replaceable lists.
#[derive(Clone)]
pub struct RecordSync {
    publisher: Publisher,
    discovery: Vec<String>,
    query_timeout: Duration,
}

impl RecordSync {
    pub fn new(transport: Arc<dyn RelayTransport>, signer: Option<Arc<dyn Signer>>) -> Self {
        Self {
            publisher: Publisher::new(transport, signer),
            discovery: relays::owned(COMMON_RELAYS),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Relays searched for relay lists; defaults to [`COMMON_RELAYS`].
    pub fn with_discovery_relays(mut self, relays: Vec<String>) -> Self {
        self.discovery = relays;
        self
    }

    pub fn discovery_relays(&self) -> &[String] {
        &self.discovery
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn transport(&self) -> &dyn RelayTransport {
        self.publisher.transport().as_ref()
    }

    /// The user's relay list, or the discovery relays for read, write and
    /// all when none is published.
    pub async fn user_relays(&self, user: &Identity) -> UserRelayList {
        let latest = self.relay_list(user).await;
        UserRelayList::from_event_or(latest.as_ref(), &self.discovery)
    }

    /// Latest raw relay list event of `user` on the discovery relays.
    pub async fn relay_list(&self, user: &Identity) -> Option<Event> {
        fetch_latest(
            self.transport(),
            &self.discovery,
            user,
            KIND_RELAY_LIST,
            self.query_timeout,
        )
        .await
    }

    /// Latest provider list of `user`, searched on the user's relays and the
    /// selected ones.
    pub async fn providers(
        &self,
        user: &Identity,
        user_relays: &UserRelayList,
        selection: &RelaySelection,
    ) -> Option<Event> {
        if user_relays.relays.is_empty() {
            return None;
        }
        let endpoints = relays::resolve(
            &user_relays.relays,
            selection.selected(),
            Vec::<String>::new(),
        );
        fetch_latest(
            self.transport(),
            &endpoints,
            user,
            KIND_TRUSTED_PROVIDERS,
            self.query_timeout,
        )
        .await
    }

    /// Apply `edit` to `existing` (or to an empty list) and publish the result
    /// to `destinations` plus the selection. The existing content is kept.
    /// `existing` must be the signer's own event of `kind`.
    pub async fn update(
        &self,
        existing: Option<&Event>,
        kind: u32,
        edit: &TagEdit,
        destinations: &[String],
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        if let Some(ev) = existing {
            if ev.kind() != kind {
                return Err(Error::InvalidArgument(format!(
                    "existing event has kind {}, expected {kind}",
                    ev.kind()
                )));
            }
            if let Some(signer) = self.publisher.signer() {
                if ev.pubkey() != signer.identity().as_str() {
                    return Err(Error::InvalidArgument(format!(
                        "existing event belongs to {}, not to the signer",
                        ev.pubkey()
                    )));
                }
            }
        }
        let base_tags = existing.map(Event::tags).unwrap_or_default();
        let tags = edit.apply(base_tags);
        let content = existing.map(Event::content).unwrap_or_default();
        self.publisher
            .publish(existing, tags, kind, content, destinations, selection)
            .await
    }

    /// Look up the signer's latest `kind` event on its read relays and the
    /// selection, then [`RecordSync::update`] it.
    pub async fn edit_latest(
        &self,
        kind: u32,
        edit: &TagEdit,
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        let user = self
            .publisher
            .signer()
            .ok_or_else(|| Error::Signing("no signer configured".into()))?
            .identity();
        let user_relays = self.user_relays(&user).await;
        let endpoints = relays::resolve(&user_relays.read, selection.selected(), selection.defaults());
        let existing = fetch_latest(self.transport(), &endpoints, &user, kind, self.query_timeout).await;
        debug!(kind, found = existing.is_some(), "editing latest list");
        self.update(existing.as_ref(), kind, edit, &user_relays.write, selection)
            .await
    }

    /// List `provider` as the user's rank provider, with the first selected
    /// relay as hint. Replaces an existing entry for the same provider.
    pub async fn set_provider(
        &self,
        provider: &Identity,
        user_relays: &UserRelayList,
        existing: Option<&Event>,
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        if user_relays.write.is_empty() {
            return Err(Error::InvalidArgument("write relays are required".into()));
        }
        let hint = selection
            .primary()
            .or_else(|| selection.defaults().first().map(String::as_str))
            .unwrap_or_default();
        let edit = TagEdit::upsert(Tag::new([RANK_PROVIDER_TAG, provider.as_str(), hint]));
        self.update(
            existing,
            KIND_TRUSTED_PROVIDERS,
            &edit,
            &user_relays.write,
            selection,
        )
        .await
    }

    /// Drop every provider tag naming one of `providers`.
    pub async fn remove_providers(
        &self,
        providers: &[Identity],
        user_relays: &UserRelayList,
        existing: Option<&Event>,
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        let edit = TagEdit::remove(PROVIDER_TAG_PREFIX, providers.iter().map(Identity::to_string));
        self.update(
            existing,
            KIND_TRUSTED_PROVIDERS,
            &edit,
            &user_relays.write,
            selection,
        )
        .await
    }

    /// Add `url` to the relay list or change its marker.
    pub async fn add_relay(
        &self,
        url: &str,
        marker: RelayMarker,
        user_relays: &UserRelayList,
        existing: Option<&Event>,
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        let edit = TagEdit::upsert(marker.tag(url));
        self.update(existing, KIND_RELAY_LIST, &edit, &user_relays.write, selection)
            .await
    }

    /// Remove `urls` from the relay list.
    pub async fn remove_relays(
        &self,
        urls: &[String],
        user_relays: &UserRelayList,
        existing: Option<&Event>,
        selection: &RelaySelection,
    ) -> Result<PublishOutcome> {
        let edit = TagEdit::remove("r", urls.iter().cloned());
        self.update(existing, KIND_RELAY_LIST, &edit, &user_relays.write, selection)
            .await
    }
}
