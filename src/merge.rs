//! Tag list edits applied before republishing a replaceable event.

use std::collections::HashSet;

use crate::event::Tag;

/// One edit to a replaceable event's tags. Adding and removing are separate
/// variants so a single edit can never ask for both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEdit {
    /// Replace the first tag with `[key, value, ..]` in place, or append
    /// `tag` when there is none.
    Upsert {
        key: String,
        value: String,
        tag: Tag,
    },
    /// Drop every tag whose key starts with `key` and whose value is listed.
    Remove {
        key: String,
        values: HashSet<String>,
    },
}

impl TagEdit {
    /// Upsert keyed on the new tag's own key and value.
    pub fn upsert(tag: Tag) -> Self {
        TagEdit::Upsert {
            key: tag.key().unwrap_or_default().to_string(),
            value: tag.value().unwrap_or_default().to_string(),
            tag,
        }
    }

    pub fn remove<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagEdit::Remove {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Apply the edit, returning a new tag list. `tags` is left untouched.
    pub fn apply(&self, tags: &[Tag]) -> Vec<Tag> {
        match self {
            TagEdit::Upsert { key, value, tag } => {
                let mut out = tags.to_vec();
                let pos = out.iter().position(|t| {
                    t.key() == Some(key.as_str()) && t.value() == Some(value.as_str())
                });
                match pos {
                    Some(i) => out[i] = tag.clone(),
                    None => out.push(tag.clone()),
                }
                out
            }
            TagEdit::Remove { key, values } => tags
                .iter()
                .filter(|t| {
                    let key_hit = t.key().is_some_and(|k| k.starts_with(key.as_str()));
                    let value_hit = t.value().is_some_and(|v| values.contains(v));
                    !(key_hit && value_hit)
                })
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(provider: &str, relay: &str) -> Tag {
        Tag::new(["30382:rank", provider, relay])
    }

    #[test]
    fn upsert_on_empty_appends() {
        let edit = TagEdit::upsert(rank("srv", "wss://a"));
        assert_eq!(edit.apply(&[]), vec![rank("srv", "wss://a")]);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let tags = vec![
            Tag::new(["30382:rank", "other", "wss://x"]),
            rank("srv", "wss://old"),
            Tag::new(["p", "srv"]),
        ];
        let out = TagEdit::upsert(rank("srv", "wss://new")).apply(&tags);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], rank("srv", "wss://new"));
        assert_eq!(tags[1], rank("srv", "wss://old"));
    }

    #[test]
    fn upsert_is_idempotent() {
        let tags = vec![Tag::new(["r", "wss://a"])];
        let edit = TagEdit::upsert(rank("srv", "wss://a"));
        let once = edit.apply(&tags);
        assert_eq!(edit.apply(&once), once);
    }

    #[test]
    fn upsert_then_remove_clears_tuple() {
        let tags = vec![Tag::new(["r", "wss://a"])];
        let added = TagEdit::upsert(rank("srv", "wss://a")).apply(&tags);
        let removed = TagEdit::remove("30382:rank", ["srv"]).apply(&added);
        assert_eq!(removed, tags);
    }

    #[test]
    fn remove_matches_key_prefix_and_value_set() {
        let tags = vec![
            rank("a", "wss://1"),
            Tag::new(["30382:followers", "a", "wss://1"]),
            rank("b", "wss://1"),
            rank("c", "wss://1"),
            Tag::new(["r", "a"]),
        ];
        let out = TagEdit::remove("30382", ["a", "b"]).apply(&tags);
        assert_eq!(out, vec![rank("c", "wss://1"), Tag::new(["r", "a"])]);
    }

    #[test]
    fn remove_ignores_short_tags() {
        let tags = vec![Tag::new(["30382:rank"])];
        assert_eq!(TagEdit::remove("30382", ["a"]).apply(&tags), tags);
    }
}
