//! NIP-01 subscription filters
//!
//! A [`Filter`] is a conjunction of optional constraint categories. An absent
//! category (`None`, or no entry for a tag name) never excludes an event; a
//! present but empty set excludes every event. All sets are ordered so two
//! filters describing the same constraints compare and serialize identically,
//! which the merger relies on.
//!
//! Besides the wire fields a filter may carry a relay pin. The pin is a routing
//! scope (the filter may only be sent to that relay) and is never serialized.

use core::fmt;
use core::str::FromStr;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::CoreError;
use crate::types::{Kind, UnixSeconds};

// ----------------------------------------------------------------------------
// Tag Names
// ----------------------------------------------------------------------------

/// Single-letter tag name used as a filter key (`#e`, `#p`, `#d`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SingleLetterTag(char);

impl SingleLetterTag {
    /// Create a tag name, rejecting anything that is not an ASCII letter
    pub fn new(name: char) -> Option<Self> {
        name.is_ascii_alphabetic().then_some(Self(name))
    }

    pub fn as_char(&self) -> char {
        self.0
    }

    pub(crate) const fn identifier() -> Self {
        Self('d')
    }
}

impl fmt::Display for SingleLetterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for SingleLetterTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidTagName {
            input: s.to_string(),
        };
        let name = s.strip_prefix('#').ok_or_else(invalid)?;
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::new(c).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for SingleLetterTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SingleLetterTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Filter
// ----------------------------------------------------------------------------

/// Canonical subscription filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<Kind>>,
    /// Tag constraints keyed by single-letter tag name
    #[serde(flatten)]
    pub tags: BTreeMap<SingleLetterTag, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<UnixSeconds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<UnixSeconds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// NIP-50 full-text search term, evaluated by the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Routing scope, never sent on the wire
    #[serde(skip)]
    pub relay: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.ids([id])
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .get_or_insert_with(BTreeSet::new)
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn author(self, author: impl Into<String>) -> Self {
        self.authors([author])
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn kind(self, kind: Kind) -> Self {
        self.kinds([kind])
    }

    pub fn kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Require a tag named `tag` carrying `value`
    pub fn tag(self, tag: SingleLetterTag, value: impl Into<String>) -> Self {
        self.tag_values(tag, [value])
    }

    pub fn tag_values<I, S>(mut self, tag: SingleLetterTag, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(tag)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: UnixSeconds) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: UnixSeconds) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Scope this filter to a single relay
    pub fn pinned_to(mut self, relay: impl Into<String>) -> Self {
        self.relay = Some(relay.into());
        self
    }

    /// Whether this filter requires relay-side full-text search
    pub fn requires_search(&self) -> bool {
        self.search.is_some()
    }

    /// Serialize to the NIP-01 JSON object form
    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
