//! Probe-vs-registry face matching in Euclidean embedding space.

use crate::types::{Candidate, Embedding, Identity};
use serde::Deserialize;
use std::str::FromStr;

/// Maximum Euclidean distance for two embeddings to be the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// How to choose among several candidates within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// First candidate within tolerance, in registry order (not necessarily the closest).
    #[default]
    First,
    /// Minimum-distance candidate within tolerance.
    Closest,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "closest" => Ok(MatchPolicy::Closest),
            other => Err(format!("unknown match policy '{other}' (expected 'first' or 'closest')")),
        }
    }
}

/// Strategy for comparing a probe embedding against the registered students.
pub trait Matcher {
    fn find(&self, probe: &Embedding, candidates: &[Candidate]) -> Option<Identity>;
}

/// Euclidean-distance matcher.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
    pub policy: MatchPolicy,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            policy: MatchPolicy::First,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32, policy: MatchPolicy) -> Self {
        Self { tolerance, policy }
    }
}

impl Matcher for EuclideanMatcher {
    fn find(&self, probe: &Embedding, candidates: &[Candidate]) -> Option<Identity> {
        let mut best: Option<(f32, &Candidate)> = None;

        for candidate in candidates {
            if candidate.embedding.len() != probe.len() {
                tracing::debug!(
                    student_id = candidate.id,
                    expected = probe.len(),
                    actual = candidate.embedding.len(),
                    "skipping candidate with mismatched embedding length"
                );
                continue;
            }

            let distance = probe.euclidean_distance(&candidate.embedding);
            // NaN never passes this comparison.
            if !(distance <= self.tolerance) {
                continue;
            }

            match self.policy {
                MatchPolicy::First => {
                    best = Some((distance, candidate));
                    break;
                }
                MatchPolicy::Closest => {
                    if best.map_or(true, |(d, _)| distance < d) {
                        best = Some((distance, candidate));
                    }
                }
            }
        }

        best.map(|(distance, candidate)| {
            tracing::trace!(student_id = candidate.id, distance, "probe matched");
            Identity {
                id: candidate.id,
                name: candidate.name.clone(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, name: &str, values: Vec<f32>) -> Candidate {
        Candidate {
            id,
            name: name.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_exact_embedding_matches() {
        let registry = vec![
            candidate(1, "Amy", vec![0.1, 0.2, 0.3]),
            candidate(2, "Ben", vec![0.9, 0.9, 0.9]),
        ];
        let probe = Embedding::new(vec![0.9, 0.9, 0.9]);
        let found = EuclideanMatcher::default().find(&probe, &registry).unwrap();
        assert_eq!(found, Identity { id: 2, name: "Ben".into() });
    }

    #[test]
    fn test_nothing_within_tolerance() {
        let registry = vec![
            candidate(1, "Amy", vec![0.0, 0.0]),
            candidate(2, "Ben", vec![1.0, 1.0]),
        ];
        // distance to Amy = 0.6, to Ben > 0.5
        let probe = Embedding::new(vec![0.6, 0.0]);
        assert!(EuclideanMatcher::default().find(&probe, &registry).is_none());
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let registry = vec![candidate(1, "Amy", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![0.5, 0.0]);
        assert!(EuclideanMatcher::default().find(&probe, &registry).is_some());
    }

    #[test]
    fn test_first_policy_returns_first_not_closest() {
        let registry = vec![
            candidate(1, "Far", vec![0.4, 0.0]),
            candidate(2, "Near", vec![0.05, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let found = EuclideanMatcher::default().find(&probe, &registry).unwrap();
        assert_eq!(found.id, 1);
    }

    #[test]
    fn test_closest_policy_returns_minimum_distance() {
        let registry = vec![
            candidate(1, "Far", vec![0.4, 0.0]),
            candidate(2, "Near", vec![0.05, 0.0]),
            candidate(3, "Out", vec![2.0, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = EuclideanMatcher::new(DEFAULT_TOLERANCE, MatchPolicy::Closest);
        assert_eq!(matcher.find(&probe, &registry).unwrap().id, 2);
    }

    #[test]
    fn test_mismatched_length_skipped() {
        let registry = vec![
            candidate(1, "Short", vec![0.0]),
            candidate(2, "Right", vec![0.0, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(EuclideanMatcher::default().find(&probe, &registry).unwrap().id, 2);
    }

    #[test]
    fn test_empty_registry() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(EuclideanMatcher::default().find(&probe, &[]).is_none());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("first".parse::<MatchPolicy>().unwrap(), MatchPolicy::First);
        assert_eq!("Closest".parse::<MatchPolicy>().unwrap(), MatchPolicy::Closest);
        assert!("best".parse::<MatchPolicy>().is_err());
    }
}
