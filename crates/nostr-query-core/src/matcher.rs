//! Local event matching
//!
//! Relays are not trusted to honour filters exactly, so the engine can check
//! received events against the filters of the subscription they arrived on.

use crate::event::Event;
use crate::filter::Filter;

/// Test whether `event` satisfies every constraint present in `filter`
///
/// Absent categories never exclude. A search term cannot be evaluated
/// locally, so it is taken as satisfied by the relay that returned the event.
pub fn event_matches_filter(event: &Event, filter: &Filter) -> bool {
    if let Some(ids) = &filter.ids {
        if !ids.contains(event.id.as_str()) {
            return false;
        }
    }
    if let Some(authors) = &filter.authors {
        if !authors.contains(event.pubkey.as_str()) {
            return false;
        }
    }
    if let Some(kinds) = &filter.kinds {
        if !kinds.contains(&event.kind) {
            return false;
        }
    }
    if filter.since.is_some_and(|since| event.created_at < since) {
        return false;
    }
    if filter.until.is_some_and(|until| event.created_at > until) {
        return false;
    }

    filter.tags.iter().all(|(name, values)| {
        event
            .tag_values(name.as_char())
            .any(|value| values.contains(value))
    })
}

/// Test whether `event` satisfies at least one filter of a subscription
pub fn event_matches_any(event: &Event, filters: &[Filter]) -> bool {
    filters.iter().any(|filter| event_matches_filter(event, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SingleLetterTag;

    fn note() -> Event {
        Event {
            id: "e1".into(),
            pubkey: "alice".into(),
            created_at: 1_000,
            kind: 1,
            tags: vec![
                vec!["p".into(), "bob".into()],
                vec!["t".into(), "nostr".into()],
            ],
            content: "hello".into(),
            sig: String::new(),
        }
    }

    fn tag(c: char) -> SingleLetterTag {
        SingleLetterTag::new(c).unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(event_matches_filter(&note(), &Filter::new()));
    }

    #[test]
    fn test_each_category_can_exclude() {
        let event = note();
        assert!(!event_matches_filter(&event, &Filter::new().id("e2")));
        assert!(!event_matches_filter(&event, &Filter::new().author("carol")));
        assert!(!event_matches_filter(&event, &Filter::new().kind(7)));
        assert!(!event_matches_filter(&event, &Filter::new().since(1_001)));
        assert!(!event_matches_filter(&event, &Filter::new().until(999)));
        assert!(!event_matches_filter(&event, &Filter::new().tag(tag('p'), "carol")));
        assert!(!event_matches_filter(&event, &Filter::new().tag(tag('e'), "x")));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let event = note();
        assert!(event_matches_filter(&event, &Filter::new().since(1_000).until(1_000)));
    }

    #[test]
    fn test_all_present_categories_satisfied() {
        let filter = Filter::new()
            .ids(["e1", "e2"])
            .author("alice")
            .kinds([1, 6])
            .tag(tag('p'), "bob")
            .tag_values(tag('t'), ["rust", "nostr"])
            .since(500);
        assert!(event_matches_filter(&note(), &filter));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let mut filter = Filter::new();
        filter.kinds = Some(Default::default());
        assert!(!event_matches_filter(&note(), &filter));
    }

    #[test]
    fn test_search_is_delegated_to_relay() {
        let filter = Filter::new().kind(1).search("unrelated words");
        assert!(event_matches_filter(&note(), &filter));
    }

    #[test]
    fn test_matches_any() {
        let filters = [Filter::new().kind(7), Filter::new().author("alice")];
        assert!(event_matches_any(&note(), &filters));
        assert!(!event_matches_any(&note(), &filters[..1]));
        assert!(!event_matches_any(&note(), &[]));
    }
}
