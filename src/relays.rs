//! Relay endpoint sets: built-in defaults, the user's selection, NIP-65 relay
//! lists, and resolution of the endpoint set for a read or write.

use std::collections::HashSet;

use crate::event::{Event, KIND_RELAY_LIST};

/// Relays the RPC client and publishes use when nothing else is configured.
pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.contextvm.org"];

/// Widely replicated relays used to discover a user's relay list.
pub const COMMON_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://relay.nostr.net",
    "wss://nos.lol",
    "wss://nostr.mom",
];

/// Relays that index profile metadata.
pub const METADATA_RELAYS: &[&str] = &[
    "wss://discovery.eu.nostria.app/",
    "wss://nos.lol",
    "wss://relay.damus.io",
];

/// Local development relay.
pub const DEV_RELAY: &[&str] = &["ws://localhost:10547"];

/// Own a static relay set.
pub fn owned(relays: &[&str]) -> Vec<String> {
    relays.iter().map(|r| r.to_string()).collect()
}

/// Resolve the endpoints for one operation.
///
/// Returns `candidates` followed by `extra`, de-duplicated by exact string
/// equality and keeping the first occurrence. `defaults` are used only when
/// that union is empty.
pub fn resolve<C, E, D>(candidates: C, extra: E, defaults: D) -> Vec<String>
where
    C: IntoIterator,
    C::Item: AsRef<str>,
    E: IntoIterator,
    E::Item: AsRef<str>,
    D: IntoIterator,
    D::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for url in candidates {
        push_unique(&mut seen, &mut out, url.as_ref());
    }
    for url in extra {
        push_unique(&mut seen, &mut out, url.as_ref());
    }
    if out.is_empty() {
        for url in defaults {
            push_unique(&mut seen, &mut out, url.as_ref());
        }
    }
    out
}

fn push_unique(seen: &mut HashSet<String>, out: &mut Vec<String>, url: &str) {
    if seen.insert(url.to_string()) {
        out.push(url.to_string());
    }
}

/// Relays currently selected by the user.
///
/// Owned by the caller and passed by reference into sync operations; there is
/// no process-wide selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySelection {
    selected: Vec<String>,
    defaults: Vec<String>,
}

impl Default for RelaySelection {
    fn default() -> Self {
        Self::new(owned(DEFAULT_RELAYS))
    }
}

impl RelaySelection {
    /// Start with `defaults` selected.
    pub fn new(defaults: Vec<String>) -> Self {
        Self {
            selected: defaults.clone(),
            defaults,
        }
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    /// First selected relay, used as the relay hint in provider tags.
    pub fn primary(&self) -> Option<&str> {
        self.selected.first().map(String::as_str)
    }

    pub fn set(&mut self, relays: Vec<String>) {
        self.selected = resolve(relays, Vec::<String>::new(), Vec::<String>::new());
    }

    pub fn reset(&mut self) {
        self.selected = self.defaults.clone();
    }

    /// Drop selected relays matching any of `relays`, where either URL may be
    /// a prefix of the other (so `wss://nos.lol` also drops `wss://nos.lol/`).
    pub fn remove<S: AsRef<str>>(&mut self, relays: &[S]) {
        self.selected.retain(|sel| {
            !relays.iter().any(|r| {
                let r = r.as_ref();
                sel.starts_with(r) || r.starts_with(sel.as_str())
            })
        });
    }
}

/// A user's NIP-65 relay list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRelayList {
    pub relays: Vec<String>,
    pub read: Vec<String>,
    pub write: Vec<String>,
}

impl UserRelayList {
    /// Every list pointing at the same relays.
    pub fn uniform(relays: Vec<String>) -> Self {
        Self {
            read: relays.clone(),
            write: relays.clone(),
            relays,
        }
    }

    /// Parse the `r` tags of a relay list event. A tag without marker counts
    /// for both read and write; unknown markers are listed in `relays` only.
    pub fn from_event(ev: &Event) -> Self {
        let mut list = Self::default();
        if ev.kind() != KIND_RELAY_LIST {
            return list;
        }
        for tag in ev.tags() {
            let (Some("r"), Some(url)) = (tag.key(), tag.value()) else {
                continue;
            };
            if url.is_empty() {
                continue;
            }
            list.relays.push(url.to_string());
            match tag.get(2) {
                None | Some("") => {
                    list.read.push(url.to_string());
                    list.write.push(url.to_string());
                }
                Some("read") => list.read.push(url.to_string()),
                Some("write") => list.write.push(url.to_string()),
                Some(_) => {}
            }
        }
        list
    }

    /// Parse `ev`, falling back to `fallback` for all three lists when the
    /// event is missing or names no relays.
    pub fn from_event_or(ev: Option<&Event>, fallback: &[String]) -> Self {
        match ev.map(Self::from_event) {
            Some(list) if !list.relays.is_empty() => list,
            _ => Self::uniform(fallback.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{EventTemplate, Tag},
        signer::KeySigner,
    };

    #[test]
    fn resolve_keeps_candidate_order_and_dedups() {
        let got = resolve(
            ["wss://b", "wss://a", "wss://b"],
            ["wss://a", "wss://c"],
            ["wss://d"],
        );
        assert_eq!(got, vec!["wss://b", "wss://a", "wss://c"]);
    }

    #[test]
    fn resolve_falls_back_to_defaults() {
        let none: [&str; 0] = [];
        assert_eq!(
            resolve(none, none, ["wss://d", "wss://d", "wss://e"]),
            vec!["wss://d", "wss://e"]
        );
        assert_eq!(resolve(none, ["wss://x"], ["wss://d"]), vec!["wss://x"]);
    }

    #[test]
    fn resolve_exact_string_equality() {
        let got = resolve(["wss://nos.lol", "wss://nos.lol/"], Vec::<String>::new(), DEV_RELAY);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn selection_remove_matches_prefixes() {
        let mut sel = RelaySelection::new(owned(DEFAULT_RELAYS));
        sel.set(owned(&["wss://nos.lol/", "wss://relay.damus.io", "wss://nos.lol/"]));
        assert_eq!(sel.selected().len(), 2);
        sel.remove(&["wss://nos.lol"]);
        assert_eq!(sel.selected(), ["wss://relay.damus.io"]);
        assert_eq!(sel.primary(), Some("wss://relay.damus.io"));
        sel.reset();
        assert_eq!(sel.selected(), owned(DEFAULT_RELAYS).as_slice());
    }

    #[test]
    fn relay_list_markers() {
        let signer = KeySigner::generate();
        let ev = signer.sign_now(EventTemplate::new(
            KIND_RELAY_LIST,
            vec![
                Tag::new(["r", "wss://both"]),
                Tag::new(["r", "wss://r", "read"]),
                Tag::new(["r", "wss://w", "write"]),
                Tag::new(["r", "wss://odd", "archive"]),
                Tag::new(["p", "ignored"]),
                Tag::new(["r"]),
            ],
            "",
        ));
        let list = UserRelayList::from_event(&ev);
        assert_eq!(list.relays, vec!["wss://both", "wss://r", "wss://w", "wss://odd"]);
        assert_eq!(list.read, vec!["wss://both", "wss://r"]);
        assert_eq!(list.write, vec!["wss://both", "wss://w"]);
    }

    #[test]
    fn relay_list_fallback() {
        let common = owned(COMMON_RELAYS);
        assert_eq!(
            UserRelayList::from_event_or(None, &common),
            UserRelayList::uniform(common.clone())
        );
        let empty = KeySigner::generate().sign_now(EventTemplate::new(KIND_RELAY_LIST, vec![], ""));
        assert_eq!(UserRelayList::from_event_or(Some(&empty), &common).write, common);
    }
}
