//! Compressed filter expansion
//!
//! Applications often describe "these things" as one mixed list of references:
//! plain event ids next to addressable coordinates (`<kind>:<pubkey>:<d>`).
//! Relays cannot match a coordinate through `ids`, so before a filter is sent
//! or matched locally it is expanded into canonical filters, one per
//! identifier form. Expansion is pure and total.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::CoreError;
use crate::filter::{Filter, SingleLetterTag};
use crate::types::Kind;

/// Length in bytes of a public key
const PUBKEY_LEN: usize = 32;

// ----------------------------------------------------------------------------
// Coordinates
// ----------------------------------------------------------------------------

/// Address of a parameterized replaceable event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub kind: Kind,
    pub pubkey: String,
    pub identifier: String,
}

impl Coordinate {
    pub fn new(kind: Kind, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// Canonical filter selecting exactly this address
    pub fn to_filter(&self) -> Filter {
        Filter::new()
            .kind(self.kind)
            .author(self.pubkey.clone())
            .tag(SingleLetterTag::identifier(), self.identifier.clone())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

impl FromStr for Coordinate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidCoordinate {
            input: s.to_string(),
        };
        // The identifier may itself contain ':'
        let mut parts = s.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<Kind>().ok())
            .ok_or_else(invalid)?;
        let pubkey = parts.next().ok_or_else(invalid)?;
        let identifier = parts.next().ok_or_else(invalid)?;

        match hex::decode(pubkey) {
            Ok(bytes) if bytes.len() == PUBKEY_LEN => {}
            _ => return Err(invalid()),
        }

        Ok(Self::new(kind, pubkey.to_ascii_lowercase(), identifier))
    }
}

// ----------------------------------------------------------------------------
// References
// ----------------------------------------------------------------------------

/// One entry of a mixed identifier list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reference {
    /// Plain event id
    Event(String),
    /// Addressable coordinate
    Address(Coordinate),
}

impl Reference {
    /// Classify a reference string; anything that is not a coordinate is an id
    pub fn parse(input: &str) -> Self {
        match input.parse::<Coordinate>() {
            Ok(coordinate) => Reference::Address(coordinate),
            Err(_) => Reference::Event(input.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Compressed Filter
// ----------------------------------------------------------------------------

/// Filter whose identifier list may mix plain ids with coordinates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedFilter {
    /// Every constraint except coordinates; plain ids live in `base.ids`
    pub base: Filter,
    pub addresses: BTreeSet<Coordinate>,
}

impl CompressedFilter {
    /// Build from a base filter plus a mixed list of references
    pub fn with_references<I, S>(mut base: Filter, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addresses = BTreeSet::new();
        for reference in references {
            match Reference::parse(reference.as_ref()) {
                Reference::Event(id) => {
                    base.ids.get_or_insert_with(BTreeSet::new).insert(id);
                }
                Reference::Address(coordinate) => {
                    addresses.insert(coordinate);
                }
            }
        }
        Self { base, addresses }
    }

    pub fn address(mut self, coordinate: Coordinate) -> Self {
        self.addresses.insert(coordinate);
        self
    }

    /// A filter with no coordinates is already canonical
    pub fn is_canonical(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl From<Filter> for CompressedFilter {
    fn from(base: Filter) -> Self {
        Self {
            base,
            addresses: BTreeSet::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Expansion
// ----------------------------------------------------------------------------

/// Expand a compressed filter into canonical filters with the same union
pub fn expand(filter: &CompressedFilter) -> Vec<Filter> {
    if filter.is_canonical() {
        return vec![filter.base.clone()];
    }

    let mut expanded = Vec::with_capacity(filter.addresses.len() + 1);

    // An empty id set only ever matched through the coordinates
    if filter.base.ids.as_ref().is_some_and(|ids| !ids.is_empty()) {
        expanded.push(filter.base.clone());
    }

    for coordinate in &filter.addresses {
        let mut canonical = filter.base.clone();
        canonical.ids = None;
        canonical.kinds = Some(BTreeSet::from([coordinate.kind]));
        canonical.authors = Some(BTreeSet::from([coordinate.pubkey.clone()]));
        canonical.tags.insert(
            SingleLetterTag::identifier(),
            BTreeSet::from([coordinate.identifier.clone()]),
        );
        expanded.push(canonical);
    }

    expanded
}

/// Expand every filter of a request, preserving order
pub fn expand_all(filters: &[CompressedFilter]) -> Vec<Filter> {
    filters.iter().flat_map(expand).collect()
}
