use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

use swap_common::canonical::canonical_json;
use swap_common::Criterion;

/// Identity of a criterion: its tag paired with the canonical JSON of
/// its value.
pub type CriterionKey = (String, String);

/// Computes the identity key of a criterion.
#[must_use]
pub fn criterion_key(criterion: &Criterion) -> CriterionKey {
    (criterion.kind.clone(), canonical_json(&criterion.value))
}

/// Registry from endpoint id to its advertised criteria set.
///
/// Matching is a subset test: an endpoint matches a query when every
/// query criterion is present in its set. Selection among matches is
/// uniformly random within the maximum-specificity tier; randomness
/// comes from the OS since the selected peer affects routing fairness.
#[derive(Debug, Default)]
pub struct Matcher {
    endpoints: HashMap<String, HashSet<CriterionKey>>,
}

impl Matcher {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) an endpoint's criteria set.
    pub fn register(&mut self, endpoint_id: &str, criteria: &[Criterion]) {
        let set = criteria.iter().map(criterion_key).collect();
        self.endpoints.insert(endpoint_id.to_string(), set);
    }

    /// Removes an endpoint from the registry.
    pub fn unregister(&mut self, endpoint_id: &str) {
        self.endpoints.remove(endpoint_id);
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` when no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns every endpoint whose criteria set is a superset of the
    /// query. An empty query matches every registered endpoint. The
    /// requesting endpoint is excluded by the caller, not here.
    #[must_use]
    pub fn find_matches(&self, query: &[Criterion]) -> Vec<String> {
        let keys: Vec<CriterionKey> = query.iter().map(criterion_key).collect();
        self.endpoints
            .iter()
            .filter(|(_, set)| keys.iter().all(|key| set.contains(key)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Picks one endpoint uniformly at random from those with the
    /// maximum criteria count among `matches`. Returns `None` for an
    /// empty slice.
    #[must_use]
    pub fn select(&self, matches: &[String]) -> Option<String> {
        let max = matches
            .iter()
            .filter_map(|id| self.endpoints.get(id).map(HashSet::len))
            .max()?;
        let top: Vec<&String> = matches
            .iter()
            .filter(|id| self.endpoints.get(*id).map(HashSet::len) == Some(max))
            .collect();
        top.choose(&mut OsRng).map(|id| (*id).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(value: &str) -> Criterion {
        Criterion::new("service", value)
    }

    #[test]
    fn subset_matching_requires_all_query_criteria() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.register("b2-00112233", &[service("video"), Criterion::new("qos", "high")]);

        let matches = matcher.find_matches(&[service("video")]);
        assert_eq!(matches.len(), 2);

        let matches = matcher.find_matches(&[service("video"), Criterion::new("qos", "high")]);
        assert_eq!(matches, vec!["b2-00112233".to_string()]);

        let matches = matcher.find_matches(&[service("ghost")]);
        assert!(matches.is_empty());
    }

    #[test]
    fn empty_query_matches_every_endpoint() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.register("b2-00112233", &[]);
        assert_eq!(matcher.find_matches(&[]).len(), 2);
    }

    #[test]
    fn criterion_identity_uses_canonical_value() {
        let mut matcher = Matcher::new();
        matcher.register(
            "b1-00112233",
            &[Criterion::new("location", json!({"lat": 1, "lon": 2}))],
        );
        // Same object with a different key order must still match.
        let query = vec![Criterion::new("location", json!({"lon": 2, "lat": 1}))];
        assert_eq!(matcher.find_matches(&query).len(), 1);
    }

    #[test]
    fn reregister_replaces_criteria() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.register("b1-00112233", &[service("audio")]);
        assert!(matcher.find_matches(&[service("video")]).is_empty());
        assert_eq!(matcher.find_matches(&[service("audio")]).len(), 1);
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn select_empty_returns_none() {
        let matcher = Matcher::new();
        assert!(matcher.select(&[]).is_none());
    }

    #[test]
    fn select_prefers_highest_specificity() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.register("b2-00112233", &[service("video"), Criterion::new("qos", "high")]);

        let matches = matcher.find_matches(&[service("video")]);
        for _ in 0..50 {
            assert_eq!(matcher.select(&matches), Some("b2-00112233".to_string()));
        }
    }

    #[test]
    fn selection_is_uniform_within_top_tier() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.register("b2-00112233", &[service("video")]);

        let matches = matcher.find_matches(&[service("video")]);
        let trials = 2000;
        let mut first = 0usize;
        for _ in 0..trials {
            if matcher.select(&matches).as_deref() == Some("b1-00112233") {
                first += 1;
            }
        }
        // Within 5% of 50/50 over many trials.
        let share = first as f64 / trials as f64;
        assert!(
            (share - 0.5).abs() < 0.05,
            "selection share {share} outside tolerance"
        );
    }

    #[test]
    fn unregister_removes_endpoint_from_matching() {
        let mut matcher = Matcher::new();
        matcher.register("b1-00112233", &[service("video")]);
        matcher.unregister("b1-00112233");
        assert!(matcher.is_empty());
        assert!(matcher.find_matches(&[]).is_empty());
    }
}
