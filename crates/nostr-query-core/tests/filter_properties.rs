//! Property-based tests for the filter algebra
//!
//! These tests verify that merging never changes which events a filter set
//! matches, that merging is idempotent, and that dropping a constraint never
//! loses matches. Universes are kept tiny so random filters overlap often.

use nostr_query_core::{
    event_matches_any, event_matches_filter, expand_all, flat_merge, CompressedFilter, Coordinate,
    Event, Filter, SingleLetterTag,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const IDS: [&str; 3] = ["e1", "e2", "e3"];
const AUTHORS: [&str; 3] = ["A", "B", "C"];
const PINS: [Option<&str>; 3] = [None, Some("wss://r1"), Some("wss://r2")];

fn p_tag() -> SingleLetterTag {
    SingleLetterTag::new('p').unwrap()
}

/// Generate an optional non-empty subset of a string universe
fn arb_string_set(universe: &'static [&'static str]) -> impl Strategy<Value = Option<BTreeSet<String>>> {
    prop::option::of(
        prop::collection::btree_set(prop::sample::select(universe.to_vec()), 1..=universe.len())
            .prop_map(|set| set.into_iter().map(str::to_string).collect()),
    )
}

/// Generate arbitrary filters over the small universes
fn arb_filter() -> impl Strategy<Value = Filter> {
    (
        arb_string_set(&IDS),
        arb_string_set(&AUTHORS),
        prop::option::of(prop::collection::btree_set(1u16..=3, 1..=3)),
        arb_string_set(&["x", "y"]),
        prop::option::of(0u64..6),
        prop::option::of(4u64..10),
        prop::option::of(prop::sample::select(vec![5usize, 10])),
        prop::sample::select(PINS.to_vec()),
    )
        .prop_map(|(ids, authors, kinds, p_values, since, until, limit, pin)| {
            let mut filter = Filter {
                ids,
                authors,
                kinds,
                since,
                until,
                limit,
                relay: pin.map(str::to_string),
                ..Filter::default()
            };
            if let Some(values) = p_values {
                filter.tags.insert(p_tag(), values);
            }
            filter
        })
}

/// Generate arbitrary events over the same universes
fn arb_event() -> impl Strategy<Value = Event> {
    (
        prop::sample::select(IDS.to_vec()),
        prop::sample::select(AUTHORS.to_vec()),
        1u16..=3,
        0u64..10,
        prop::option::of(prop::sample::select(vec!["x", "y", "z"])),
    )
        .prop_map(|(id, author, kind, created_at, p)| Event {
            id: id.to_string(),
            pubkey: author.to_string(),
            created_at,
            kind,
            tags: p
                .map(|value| vec![vec!["p".to_string(), value.to_string()]])
                .unwrap_or_default(),
            content: String::new(),
            sig: String::new(),
        })
}

fn pinned<'a>(filters: &'a [Filter], pin: Option<&'a str>) -> Vec<Filter> {
    filters
        .iter()
        .filter(|f| f.relay.as_deref() == pin)
        .cloned()
        .collect()
}

proptest! {
    /// Property: merging preserves the matched event set for every relay scope
    #[test]
    fn merge_is_semantically_equivalent(
        filters in prop::collection::vec(arb_filter(), 0..8),
        events in prop::collection::vec(arb_event(), 1..24),
    ) {
        let merged = flat_merge(&filters);
        prop_assert!(merged.len() <= filters.len());

        for pin in PINS {
            let before = pinned(&filters, pin);
            let after = pinned(&merged, pin);
            for event in &events {
                prop_assert_eq!(
                    event_matches_any(event, &before),
                    event_matches_any(event, &after),
                    "pin {:?} event {:?}", pin, event
                );
            }
        }
    }

    /// Property: merging an already merged set changes nothing
    #[test]
    fn merge_is_idempotent(filters in prop::collection::vec(arb_filter(), 0..8)) {
        let once = flat_merge(&filters);
        let twice = flat_merge(&once);
        prop_assert_eq!(once, twice);
    }

    /// Property: merge output does not depend on duplicated input
    #[test]
    fn merge_ignores_duplicates(filters in prop::collection::vec(arb_filter(), 1..6)) {
        let mut doubled = filters.clone();
        doubled.extend(filters.iter().cloned());
        prop_assert_eq!(flat_merge(&doubled), flat_merge(&filters));
    }

    /// Property: removing a constraint category never loses a match
    #[test]
    fn relaxation_is_monotonic(filter in arb_filter(), event in arb_event()) {
        if event_matches_filter(&event, &filter) {
            let relaxations = [
                Filter { ids: None, ..filter.clone() },
                Filter { authors: None, ..filter.clone() },
                Filter { kinds: None, ..filter.clone() },
                Filter { since: None, until: None, ..filter.clone() },
                Filter { tags: Default::default(), ..filter.clone() },
            ];
            for relaxed in &relaxations {
                prop_assert!(event_matches_filter(&event, relaxed));
            }
        }
    }

    /// Property: expanding then merging keeps the meaning of coordinates
    #[test]
    fn expand_then_merge_preserves_addresses(
        identifiers in prop::collection::btree_set("[a-c]", 1..3),
        kind in 30000u16..30003,
    ) {
        let pubkey = "ab".repeat(32);
        let compressed = identifiers
            .iter()
            .fold(CompressedFilter::from(Filter::new()), |f, d| {
                f.address(Coordinate::new(kind, pubkey.clone(), d.clone()))
            });

        let merged = flat_merge(&expand_all(&[compressed]));
        prop_assert_eq!(merged.len(), 1);

        for d in ["a", "b", "c"] {
            let event = Event {
                id: "x".into(),
                pubkey: pubkey.clone(),
                created_at: 1,
                kind,
                tags: vec![vec!["d".into(), d.into()]],
                content: String::new(),
                sig: String::new(),
            };
            prop_assert_eq!(event_matches_any(&event, &merged), identifiers.contains(d));
        }
    }
}
