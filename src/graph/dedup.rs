//! Duplicate-detection primitives for the fact store.
//!
//! Pure functions: value normalization, Levenshtein similarity, and the text
//! verdict that decides between skip, boost, and supersession. The fusion
//! strategies live here too — the advisory seam consulted when a semantic
//! duplicate is found.

use serde::Serialize;

use crate::config::DedupConfig;

use super::types::{is_temporal_fact_type, EntityFact};

/// Normalize a fact value for comparison: lowercase, trim, collapse internal
/// whitespace, strip everything non-alphanumeric except common symbols.
pub fn normalize_value(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = true;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else if c.is_alphanumeric() || matches!(c, '&' | '+' | '-' | '/' | '.' | '#' | '@') {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Classic two-row Levenshtein edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized Levenshtein similarity in `[0, 1]`. Two empty strings are
/// identical by definition.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Outcome of the text-based duplicate check against one entity's active
/// facts of the same type.
#[derive(Debug, Clone, PartialEq)]
pub enum TextVerdict {
    /// No candidate is close enough; create a new fact.
    NoDuplicate,
    /// Exact normalized match; return the existing fact untouched.
    Exact { fact_id: String },
    /// Temporal fact whose value drifted; close the old fact, create the new.
    Supersede { fact_id: String, similarity: f64 },
    /// Near-identical restatement; boost the existing fact instead of
    /// duplicating it.
    Boost { fact_id: String, similarity: f64 },
}

/// Judge a new value against candidate `(fact_id, value)` pairs.
///
/// Precedence: exact match, then the temporal supersession band
/// `[supersede_band_low, supersede_band_high)`, then the fuzzy duplicate
/// threshold. The supersession band is checked first so that a "position"
/// changing from "Engineer" to "Senior Engineer" supersedes rather than
/// being absorbed as a near-duplicate.
pub fn judge_text(
    fact_type: &str,
    new_value: &str,
    candidates: &[(String, String)],
    config: &DedupConfig,
) -> TextVerdict {
    let new_norm = normalize_value(new_value);

    let mut best: Option<(&str, f64)> = None;
    for (fact_id, value) in candidates {
        let norm = normalize_value(value);
        if norm == new_norm {
            return TextVerdict::Exact {
                fact_id: fact_id.clone(),
            };
        }
        let sim = similarity(&new_norm, &norm);
        if best.map(|(_, s)| sim > s).unwrap_or(true) {
            best = Some((fact_id, sim));
        }
    }

    let Some((fact_id, sim)) = best else {
        return TextVerdict::NoDuplicate;
    };

    if is_temporal_fact_type(fact_type)
        && sim >= config.supersede_band_low
        && sim < config.supersede_band_high
    {
        return TextVerdict::Supersede {
            fact_id: fact_id.to_string(),
            similarity: sim,
        };
    }
    if sim >= config.fuzzy_threshold {
        return TextVerdict::Boost {
            fact_id: fact_id.to_string(),
            similarity: sim,
        };
    }
    TextVerdict::NoDuplicate
}

/// The action chosen when a semantic near-duplicate is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionAction {
    /// Keep the existing fact; discard the incoming value.
    Skip,
    /// Edit the existing fact's value in place.
    Update,
    /// Close the existing fact and create the new one.
    Supersede,
    /// Create the new fact flagged for human review.
    Review,
}

/// An advisory fusion decision.
#[derive(Debug, Clone, Serialize)]
pub struct FusionDecision {
    pub action: FusionAction,
    pub confidence: f64,
}

/// Strategy slot consulted when the semantic check finds a duplicate.
///
/// The decision is advisory in origin but binding in effect: the store
/// applies whichever action comes back.
pub trait FusionStrategy: Send + Sync {
    fn decide(&self, existing: &EntityFact, new_value: &str) -> FusionDecision;
}

/// Default policy: a semantic duplicate is skipped.
pub struct AutoSkip;

impl FusionStrategy for AutoSkip {
    fn decide(&self, _existing: &EntityFact, _new_value: &str) -> FusionDecision {
        FusionDecision {
            action: FusionAction::Skip,
            confidence: 1.0,
        }
    }
}

/// Always replace: close the existing fact and create the new one.
pub struct AutoSupersede;

impl FusionStrategy for AutoSupersede {
    fn decide(&self, _existing: &EntityFact, _new_value: &str) -> FusionDecision {
        FusionDecision {
            action: FusionAction::Supersede,
            confidence: 1.0,
        }
    }
}

/// Defer to a human: the incoming fact is created with `needs_review` set.
pub struct DelegateToReviewer;

impl FusionStrategy for DelegateToReviewer {
    fn decide(&self, _existing: &EntityFact, _new_value: &str) -> FusionDecision {
        FusionDecision {
            action: FusionAction::Review,
            confidence: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DedupConfig {
        DedupConfig::default()
    }

    #[test]
    fn normalize_strips_and_collapses() {
        assert_eq!(normalize_value("  Señor   Engineer! "), "señor engineer");
        assert_eq!(normalize_value("Acme, Inc."), "acme inc.");
        assert_eq!(normalize_value("C++ / Rust"), "c++ / rust");
        assert_eq!(normalize_value("a@b.com"), "a@b.com");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("engineer", "engineer"), 0);
    }

    #[test]
    fn similarity_range() {
        assert!((similarity("", "") - 1.0).abs() < f64::EPSILON);
        assert!((similarity("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("abc", "xyz") < 0.01);
    }

    #[test]
    fn judge_exact_match_wins() {
        let candidates = vec![("f1".to_string(), "Acme Inc".to_string())];
        let verdict = judge_text("company", "acme   inc", &candidates, &config());
        assert_eq!(
            verdict,
            TextVerdict::Exact {
                fact_id: "f1".into()
            }
        );
    }

    #[test]
    fn judge_temporal_band_supersedes() {
        // "engineer" vs "senior engineer": similarity ≈ 0.53, inside [0.3, 0.95)
        let candidates = vec![("f1".to_string(), "Engineer".to_string())];
        let verdict = judge_text("position", "Senior Engineer", &candidates, &config());
        match verdict {
            TextVerdict::Supersede { fact_id, similarity } => {
                assert_eq!(fact_id, "f1");
                assert!(similarity >= 0.3 && similarity < 0.95);
            }
            other => panic!("expected Supersede, got {other:?}"),
        }
    }

    #[test]
    fn judge_non_temporal_fuzzy_boosts() {
        // High similarity on a non-temporal type boosts rather than superseding.
        let candidates = vec![("f1".to_string(), "loves hiking".to_string())];
        let verdict = judge_text("interest", "love hiking", &candidates, &config());
        assert!(matches!(verdict, TextVerdict::Boost { .. }));
    }

    #[test]
    fn judge_distant_value_creates() {
        let candidates = vec![("f1".to_string(), "Engineer".to_string())];
        let verdict = judge_text("interest", "plays chess on weekends", &candidates, &config());
        assert_eq!(verdict, TextVerdict::NoDuplicate);
    }

    #[test]
    fn judge_empty_candidates_creates() {
        let verdict = judge_text("position", "Engineer", &[], &config());
        assert_eq!(verdict, TextVerdict::NoDuplicate);
    }

    #[test]
    fn judge_temporal_near_identical_boosts_not_supersedes() {
        // Above the band's upper edge (sim ≈ 0.955): the same value restated.
        let candidates = vec![("f1".to_string(), "senior staff engineers".to_string())];
        let verdict = judge_text("position", "senior staff engineer", &candidates, &config());
        assert!(matches!(verdict, TextVerdict::Boost { .. }));
    }

    #[test]
    fn fusion_defaults() {
        let fact = sample_fact();
        assert_eq!(AutoSkip.decide(&fact, "x").action, FusionAction::Skip);
        assert_eq!(
            AutoSupersede.decide(&fact, "x").action,
            FusionAction::Supersede
        );
        assert_eq!(
            DelegateToReviewer.decide(&fact, "x").action,
            FusionAction::Review
        );
    }

    fn sample_fact() -> EntityFact {
        use super::super::types::{FactRank, FactSource};
        EntityFact {
            id: "f1".into(),
            entity_id: "e1".into(),
            fact_type: "position".into(),
            category: None,
            value: Some("Engineer".into()),
            value_json: None,
            source: FactSource::Extracted,
            confidence: 0.9,
            rank: FactRank::Normal,
            needs_review: false,
            valid_from: "2026-01-01T00:00:00Z".into(),
            valid_until: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }
}
