//! Vote resolution: turns a round of cast votes into a decision.
//!
//! Pure functions only: no transport, no timers, no room access. The
//! resolver never fails; malformed input under a numeric policy falls
//! through to the discussion/revote tier instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::room::types::{CastVote, ClientId, ResolutionPolicy};

/// Fixed estimation scale used for mean snapping.
pub const ESTIMATION_SCALE: [f64; 9] = [1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 40.0, 100.0];

/// Default pause token. A unanimous pause suspends the session.
pub const DEFAULT_PAUSE_TOKEN: &str = "coffee";

/// Outcome of resolving one round of votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// The round produced an estimate.
    Value { value: String },
    /// The two extreme voters must debate before a revote.
    NeedsDiscussion {
        lowest: ClientId,
        highest: ClientId,
        lowest_value: f64,
        highest_value: f64,
    },
    /// The round must be re-run on the same feature.
    NeedsRevote { reason: String },
    /// Every participant played the pause token; suspend and persist.
    Paused,
}

/// Resolve a completed round under the given policy.
///
/// Priority order:
/// 1. unanimous pause token (case-insensitive) -> `Paused`
/// 2. identical raw values -> `Value`
/// 3. the policy's own rule
/// 4. fallback: extremes for discussion, or revote
pub fn resolve(votes: &[CastVote], policy: ResolutionPolicy, pause_token: &str) -> Decision {
    if votes.is_empty() {
        return Decision::NeedsRevote {
            reason: "no votes cast".to_string(),
        };
    }

    if votes
        .iter()
        .all(|v| v.value.eq_ignore_ascii_case(pause_token))
    {
        return Decision::Paused;
    }

    if votes.iter().all(|v| v.value == votes[0].value) {
        return Decision::Value {
            value: votes[0].value.clone(),
        };
    }

    match policy {
        ResolutionPolicy::Mean => {
            if let Some(values) = numeric_values(votes) {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                return Decision::Value {
                    value: format_estimate(snap_to_scale(mean)),
                };
            }
        }
        ResolutionPolicy::Median => {
            if let Some(mut values) = numeric_values(votes) {
                values.sort_by(|a, b| a.partial_cmp(b).expect("finite vote values"));
                let n = values.len();
                let median = if n % 2 == 1 {
                    values[n / 2]
                } else {
                    (values[n / 2 - 1] + values[n / 2]) / 2.0
                };
                return Decision::Value {
                    value: format_estimate(median),
                };
            }
        }
        ResolutionPolicy::Plurality => {
            return Decision::Value {
                value: plurality_winner(votes),
            };
        }
        ResolutionPolicy::AbsoluteMajority => {
            if let Some(winner) = absolute_majority(votes) {
                return Decision::Value { value: winner };
            }
        }
        ResolutionPolicy::UnanimityOnly => {}
    }

    fallback(votes)
}

/// All vote values as numbers, or None if any is non-numeric.
fn numeric_values(votes: &[CastVote]) -> Option<Vec<f64>> {
    votes
        .iter()
        .map(|v| v.value.trim().parse::<f64>().ok().filter(|n| n.is_finite()))
        .collect()
}

/// Nearest scale value; ties go to the lower candidate.
fn snap_to_scale(mean: f64) -> f64 {
    let mut best = ESTIMATION_SCALE[0];
    for &candidate in &ESTIMATION_SCALE[1..] {
        if (candidate - mean).abs() < (best - mean).abs() {
            best = candidate;
        }
    }
    best
}

/// Most frequent raw value; ties broken in favor of the value cast
/// earliest among those holding the maximal count.
fn plurality_winner(votes: &[CastVote]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in votes {
        *counts.entry(v.value.as_str()).or_insert(0) += 1;
    }
    let mut winner = votes[0].value.as_str();
    let mut best = counts[winner];
    for v in &votes[1..] {
        let count = counts[v.value.as_str()];
        if count > best {
            winner = v.value.as_str();
            best = count;
        }
    }
    winner.to_string()
}

/// A raw value held by strictly more than half the voters, if any.
fn absolute_majority(votes: &[CastVote]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in votes {
        *counts.entry(v.value.as_str()).or_insert(0) += 1;
    }
    votes
        .iter()
        .find(|v| counts[v.value.as_str()] * 2 > votes.len())
        .map(|v| v.value.clone())
}

/// No decision under the policy: pick the extreme voters for a
/// discussion round, or request a revote when fewer than two votes
/// are numeric.
fn fallback(votes: &[CastVote]) -> Decision {
    let numeric: Vec<(&CastVote, f64)> = votes
        .iter()
        .filter_map(|v| {
            v.value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| (v, n))
        })
        .collect();

    if numeric.len() < 2 {
        return Decision::NeedsRevote {
            reason: "invalid votes".to_string(),
        };
    }

    // First occurrence wins ties: only a strictly smaller / strictly
    // larger value displaces the current extreme.
    let (mut lowest, mut lowest_value) = (numeric[0].0, numeric[0].1);
    let (mut highest, mut highest_value) = (numeric[0].0, numeric[0].1);
    for &(vote, value) in &numeric[1..] {
        if value < lowest_value {
            lowest = vote;
            lowest_value = value;
        }
        if value > highest_value {
            highest = vote;
            highest_value = value;
        }
    }

    // The extremes must be two distinct participants; when every
    // numeric value ties, pair the first voter with the second.
    if highest.participant == lowest.participant {
        let (second, second_value) = numeric[1];
        highest = second;
        highest_value = second_value;
    }

    Decision::NeedsDiscussion {
        lowest: lowest.participant.clone(),
        highest: highest.participant.clone(),
        lowest_value,
        highest_value,
    }
}

/// Render an estimate without a trailing `.0` for whole numbers.
pub fn format_estimate(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(pairs: &[(&str, &str)]) -> Vec<CastVote> {
        pairs
            .iter()
            .map(|(p, v)| CastVote {
                participant: p.to_string(),
                value: v.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_unanimity_short_circuits_every_policy() {
        let cast = votes(&[("a", "8"), ("b", "8"), ("c", "8")]);
        for policy in [
            ResolutionPolicy::UnanimityOnly,
            ResolutionPolicy::Mean,
            ResolutionPolicy::Median,
            ResolutionPolicy::Plurality,
            ResolutionPolicy::AbsoluteMajority,
        ] {
            assert_eq!(
                resolve(&cast, policy, DEFAULT_PAUSE_TOKEN),
                Decision::Value {
                    value: "8".to_string()
                },
                "policy {}",
                policy
            );
        }
    }

    #[test]
    fn test_unanimous_pause_beats_every_policy() {
        let cast = votes(&[("a", "coffee"), ("b", "Coffee"), ("c", "COFFEE")]);
        for policy in [
            ResolutionPolicy::UnanimityOnly,
            ResolutionPolicy::Mean,
            ResolutionPolicy::Median,
            ResolutionPolicy::Plurality,
            ResolutionPolicy::AbsoluteMajority,
        ] {
            assert_eq!(resolve(&cast, policy, DEFAULT_PAUSE_TOKEN), Decision::Paused);
        }
    }

    #[test]
    fn test_partial_pause_does_not_pause() {
        let cast = votes(&[("a", "coffee"), ("b", "5"), ("c", "8")]);
        let decision = resolve(&cast, ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN);
        assert!(matches!(decision, Decision::NeedsDiscussion { .. }));
    }

    #[test]
    fn test_mean_snaps_to_scale() {
        let cast = votes(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "2".to_string()
            }
        );
    }

    #[test]
    fn test_mean_tie_snaps_low() {
        // Mean of 1 and 2 is 1.5, equidistant from 1 and 2.
        assert_eq!(snap_to_scale(1.5), 1.0);
        // 16.5 sits exactly between 13 and 20.
        assert_eq!(snap_to_scale(16.5), 13.0);
    }

    #[test]
    fn test_median_even_count() {
        let cast = votes(&[("a", "1"), ("b", "3"), ("c", "8"), ("d", "13")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Median, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "5.5".to_string()
            }
        );
    }

    #[test]
    fn test_median_odd_count_sorts_numerically() {
        // Lexicographic sort would put "13" before "8".
        let cast = votes(&[("a", "13"), ("b", "8"), ("c", "2")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Median, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "8".to_string()
            }
        );
    }

    #[test]
    fn test_plurality_most_frequent() {
        let cast = votes(&[("a", "3"), ("b", "3"), ("c", "5"), ("d", "8")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Plurality, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "3".to_string()
            }
        );
    }

    #[test]
    fn test_plurality_tie_first_in_cast_order() {
        let cast = votes(&[("a", "5"), ("b", "8"), ("c", "8"), ("d", "5")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Plurality, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "5".to_string()
            }
        );
    }

    #[test]
    fn test_absolute_majority_wins() {
        let cast = votes(&[("a", "5"), ("b", "5"), ("c", "5"), ("d", "8")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::AbsoluteMajority, DEFAULT_PAUSE_TOKEN),
            Decision::Value {
                value: "5".to_string()
            }
        );
    }

    #[test]
    fn test_no_absolute_majority_falls_to_discussion() {
        let cast = votes(&[("a", "5"), ("b", "5"), ("c", "8"), ("d", "8")]);
        let decision = resolve(&cast, ResolutionPolicy::AbsoluteMajority, DEFAULT_PAUSE_TOKEN);
        match decision {
            Decision::NeedsDiscussion {
                lowest, highest, ..
            } => {
                assert_eq!(lowest, "a");
                assert_eq!(highest, "c");
            }
            other => panic!("expected discussion, got {:?}", other),
        }
    }

    #[test]
    fn test_discussion_identifies_extremes() {
        let cast = votes(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "8"), ("e", "13")]);
        let decision = resolve(&cast, ResolutionPolicy::UnanimityOnly, DEFAULT_PAUSE_TOKEN);
        assert_eq!(
            decision,
            Decision::NeedsDiscussion {
                lowest: "a".to_string(),
                highest: "e".to_string(),
                lowest_value: 1.0,
                highest_value: 13.0,
            }
        );
    }

    #[test]
    fn test_extreme_tie_break_first_occurrence() {
        let cast = votes(&[("a", "1"), ("b", "1"), ("c", "13"), ("d", "13")]);
        let decision = resolve(&cast, ResolutionPolicy::UnanimityOnly, DEFAULT_PAUSE_TOKEN);
        match decision {
            Decision::NeedsDiscussion {
                lowest, highest, ..
            } => {
                assert_eq!(lowest, "a");
                assert_eq!(highest, "c");
            }
            other => panic!("expected discussion, got {:?}", other),
        }
    }

    #[test]
    fn test_extremes_are_distinct_participants() {
        // Numerically equal but raw-distinct, so unanimity misses.
        let cast = votes(&[("a", "5"), ("b", "5.0"), ("c", "nope")]);
        let decision = resolve(&cast, ResolutionPolicy::UnanimityOnly, DEFAULT_PAUSE_TOKEN);
        match decision {
            Decision::NeedsDiscussion {
                lowest, highest, ..
            } => {
                assert_eq!(lowest, "a");
                assert_eq!(highest, "b");
            }
            other => panic!("expected discussion, got {:?}", other),
        }
    }

    #[test]
    fn test_too_few_numeric_votes_requests_revote() {
        let cast = votes(&[("a", "XL"), ("b", "???"), ("c", "8")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN),
            Decision::NeedsRevote {
                reason: "invalid votes".to_string()
            }
        );
    }

    #[test]
    fn test_non_numeric_under_mean_never_panics() {
        let cast = votes(&[("a", "XL"), ("b", "5"), ("c", "8")]);
        let decision = resolve(&cast, ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN);
        assert!(matches!(decision, Decision::NeedsDiscussion { .. }));
    }

    #[test]
    fn test_empty_round_requests_revote() {
        assert!(matches!(
            resolve(&[], ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN),
            Decision::NeedsRevote { .. }
        ));
    }

    #[test]
    fn test_format_estimate() {
        assert_eq!(format_estimate(5.0), "5");
        assert_eq!(format_estimate(5.5), "5.5");
        assert_eq!(format_estimate(100.0), "100");
    }

    #[test]
    fn test_custom_pause_token() {
        let cast = votes(&[("a", "break"), ("b", "BREAK")]);
        assert_eq!(
            resolve(&cast, ResolutionPolicy::Mean, "break"),
            Decision::Paused
        );
        assert!(matches!(
            resolve(&cast, ResolutionPolicy::Mean, DEFAULT_PAUSE_TOKEN),
            Decision::NeedsRevote { .. }
        ));
    }
}
