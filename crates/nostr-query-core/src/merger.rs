//! Filter set merging
//!
//! Multiple filters in one subscription are OR-ed. Merging rewrites a filter
//! set into a smaller one that matches exactly the same events:
//!
//! * simple merge: two filters equal everywhere except one set-valued
//!   dimension become one filter holding the union of that dimension
//! * similar merge: filters diverging in several dimensions are combined only
//!   when one includes the other, so the result is the broader input
//! * flat merge: dedupe, then alternate both strategies until nothing shrinks
//!
//! Filters with different relay pins never merge, since the pin decides where
//! a filter may be sent. A `limit` is compared like any other scalar: equal
//! limits allow a union, and inclusion only holds between identical limited
//! filters.

use smallvec::SmallVec;
use std::collections::BTreeSet;
use tracing::trace;

use crate::filter::{Filter, SingleLetterTag};

/// One set-valued constraint category of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Ids,
    Authors,
    Kinds,
    Tag(SingleLetterTag),
}

/// Non-set fields must agree before any union is considered
fn scalars_equal(a: &Filter, b: &Filter) -> bool {
    a.since == b.since
        && a.until == b.until
        && a.limit == b.limit
        && a.search == b.search
        && a.relay == b.relay
}

fn differing_dimensions(a: &Filter, b: &Filter) -> SmallVec<[Dimension; 4]> {
    let mut differing = SmallVec::new();
    if a.ids != b.ids {
        differing.push(Dimension::Ids);
    }
    if a.authors != b.authors {
        differing.push(Dimension::Authors);
    }
    if a.kinds != b.kinds {
        differing.push(Dimension::Kinds);
    }

    let names: BTreeSet<SingleLetterTag> = a.tags.keys().chain(b.tags.keys()).copied().collect();
    for name in names {
        if a.tags.get(&name) != b.tags.get(&name) {
            differing.push(Dimension::Tag(name));
        }
    }
    differing
}

/// Union of two optional constraints; an unconstrained side stays unconstrained
fn union<T: Ord + Clone>(a: Option<&BTreeSet<T>>, b: Option<&BTreeSet<T>>) -> Option<BTreeSet<T>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
        _ => None,
    }
}

fn union_on(a: &Filter, b: &Filter, dimension: Dimension) -> Filter {
    let mut merged = a.clone();
    match dimension {
        Dimension::Ids => merged.ids = union(a.ids.as_ref(), b.ids.as_ref()),
        Dimension::Authors => merged.authors = union(a.authors.as_ref(), b.authors.as_ref()),
        Dimension::Kinds => merged.kinds = union(a.kinds.as_ref(), b.kinds.as_ref()),
        Dimension::Tag(name) => match union(a.tags.get(&name), b.tags.get(&name)) {
            Some(values) => {
                merged.tags.insert(name, values);
            }
            None => {
                merged.tags.remove(&name);
            }
        },
    }
    merged
}

/// Merge two filters that differ in at most one set-valued dimension
pub fn simple_merge(a: &Filter, b: &Filter) -> Option<Filter> {
    if !scalars_equal(a, b) {
        return None;
    }

    match differing_dimensions(a, b).as_slice() {
        [] => Some(a.clone()),
        [dimension] => Some(union_on(a, b, *dimension)),
        _ => None,
    }
}

fn set_includes<T: Ord>(bigger: Option<&BTreeSet<T>>, smaller: Option<&BTreeSet<T>>) -> bool {
    match (bigger, smaller) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(bigger), Some(smaller)) => smaller.is_subset(bigger),
    }
}

/// Whether every event matched by `smaller` is also matched by `bigger`
pub fn filter_includes(bigger: &Filter, smaller: &Filter) -> bool {
    if bigger.relay != smaller.relay || bigger.search != smaller.search {
        return false;
    }
    if bigger.limit.is_some() {
        return bigger == smaller;
    }

    let since_ok = match (bigger.since, smaller.since) {
        (None, _) => true,
        (Some(b), Some(s)) => s >= b,
        (Some(_), None) => false,
    };
    let until_ok = match (bigger.until, smaller.until) {
        (None, _) => true,
        (Some(b), Some(s)) => s <= b,
        (Some(_), None) => false,
    };

    since_ok
        && until_ok
        && set_includes(bigger.ids.as_ref(), smaller.ids.as_ref())
        && set_includes(bigger.authors.as_ref(), smaller.authors.as_ref())
        && set_includes(bigger.kinds.as_ref(), smaller.kinds.as_ref())
        && bigger
            .tags
            .iter()
            .all(|(name, values)| set_includes(Some(values), smaller.tags.get(name)))
}

/// Merge filters diverging in several dimensions when one includes the other
///
/// Any other divergence is left alone: a union across two dimensions would
/// admit cross combinations that neither input matched.
pub fn merge_similar(a: &Filter, b: &Filter) -> Option<Filter> {
    if filter_includes(a, b) {
        Some(a.clone())
    } else if filter_includes(b, a) {
        Some(b.clone())
    } else {
        None
    }
}

/// Fold each filter into the earliest filter it merges with
fn merge_pass(filters: Vec<Filter>, strategy: fn(&Filter, &Filter) -> Option<Filter>) -> Vec<Filter> {
    let mut out: Vec<Filter> = Vec::with_capacity(filters.len());
    'next: for filter in filters {
        for existing in out.iter_mut() {
            if let Some(merged) = strategy(existing, &filter) {
                *existing = merged;
                continue 'next;
            }
        }
        out.push(filter);
    }
    out
}

/// Reduce a flat list of canonical filters to a minimal equivalent set
pub fn flat_merge(filters: &[Filter]) -> Vec<Filter> {
    let mut merged: Vec<Filter> = Vec::with_capacity(filters.len());
    for filter in filters {
        if !merged.contains(filter) {
            merged.push(filter.clone());
        }
    }

    loop {
        let before = merged.len();
        merged = merge_pass(merged, simple_merge);
        merged = merge_pass(merged, merge_similar);
        if merged.len() == before {
            break;
        }
    }

    trace!(input = filters.len(), output = merged.len(), "merged filter set");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(c: char) -> SingleLetterTag {
        SingleLetterTag::new(c).unwrap()
    }

    #[test]
    fn test_simple_merge_unions_single_dimension() {
        let a = Filter::new().kind(1).author("A");
        let b = Filter::new().kind(1).author("B");

        let merged = simple_merge(&a, &b).unwrap();
        assert_eq!(merged, Filter::new().kind(1).authors(["A", "B"]));
    }

    #[test]
    fn test_simple_merge_rejects_different_since() {
        let a = Filter::new().kind(1).author("A").since(100);
        let b = Filter::new().kind(1).author("B");

        assert!(simple_merge(&a, &b).is_none());
        assert!(merge_similar(&a, &b).is_none());
        assert_eq!(flat_merge(&[a.clone(), b.clone()]), vec![a, b]);
    }

    #[test]
    fn test_unconstrained_side_absorbs_union() {
        let a = Filter::new().kind(1);
        let b = Filter::new().kind(1).author("A");
        assert_eq!(simple_merge(&a, &b), Some(Filter::new().kind(1)));
    }

    #[test]
    fn test_tag_dimension_merge() {
        let a = Filter::new().kind(7).tag(tag('e'), "x");
        let b = Filter::new().kind(7).tag(tag('e'), "y");
        let merged = simple_merge(&a, &b).unwrap();
        assert_eq!(merged, Filter::new().kind(7).tag_values(tag('e'), ["x", "y"]));

        let c = Filter::new().kind(7).tag(tag('p'), "z");
        assert!(simple_merge(&a, &c).is_none());
    }

    #[test]
    fn test_equal_limits_union_and_different_limits_do_not() {
        let a = Filter::new().kind(1).author("A").limit(10);
        let b = Filter::new().kind(1).author("B").limit(10);
        let merged = Filter::new().kind(1).authors(["A", "B"]).limit(10);

        assert_eq!(simple_merge(&a, &b), Some(merged.clone()));
        assert_eq!(simple_merge(&a, &a), Some(a.clone()));
        assert_eq!(flat_merge(&[a.clone(), b.clone(), a.clone()]), vec![merged]);

        let c = Filter::new().kind(1).author("C").limit(20);
        assert!(simple_merge(&a, &c).is_none());
        assert!(!filter_includes(&Filter::new().kind(1).limit(10), &a));
    }

    #[test]
    fn test_similar_merge_keeps_broader_filter() {
        let broad = Filter::new().kinds([1, 6]).authors(["A", "B"]);
        let narrow = Filter::new().kind(1).author("A").since(50).tag(tag('t'), "rust");

        assert!(filter_includes(&broad, &narrow));
        assert!(!filter_includes(&narrow, &broad));
        assert_eq!(merge_similar(&narrow, &broad), Some(broad.clone()));
    }

    #[test]
    fn test_similar_merge_skips_ambiguous_divergence() {
        let a = Filter::new().kind(1).author("A").tag(tag('t'), "x");
        let b = Filter::new().kind(1).author("B").tag(tag('t'), "y");
        assert!(merge_similar(&a, &b).is_none());
    }

    #[test]
    fn test_relay_pins_never_merge() {
        let r1 = Filter::new().kind(1).author("A").pinned_to("wss://r1");
        let r2 = Filter::new().kind(1).author("B").pinned_to("wss://r2");
        let unpinned = Filter::new().kind(1).author("C");

        let merged = flat_merge(&[r1.clone(), r2.clone(), unpinned.clone()]);
        assert_eq!(merged, vec![r1.clone(), r2, unpinned.clone()]);

        let same_pin = Filter::new().kind(1).author("D").pinned_to("wss://r1");
        assert_eq!(
            flat_merge(&[r1, same_pin]),
            vec![Filter::new().kind(1).authors(["A", "D"]).pinned_to("wss://r1")]
        );
        assert!(merge_similar(&Filter::new(), &Filter::new().pinned_to("wss://r1")).is_none());
    }

    #[test]
    fn test_flat_merge_reaches_fixed_point() {
        let filters = vec![
            Filter::new().kind(1).author("A"),
            Filter::new().kind(2).author("A"),
            Filter::new().kind(1).author("B"),
            Filter::new().kind(2).author("B"),
        ];

        let merged = flat_merge(&filters);
        assert_eq!(merged, vec![Filter::new().kinds([1, 2]).authors(["A", "B"])]);
        assert_eq!(flat_merge(&merged), merged);
    }

    #[test]
    fn test_flat_merge_of_empty_input() {
        assert!(flat_merge(&[]).is_empty());
    }
}
