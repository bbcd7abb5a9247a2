/// Fuzzy ranker: scores candidates against a free-text name fragment.
///
/// The score is 0-100 and blends two views of the strings:
/// - whole-string Jaro-Winkler, which rewards shared prefixes and tolerates
///   transpositions ("Tna" still lands near "Tan");
/// - a token pass, where each query token takes its best score against the
///   name's tokens (containment of a token of three or more characters
///   counts as a full match), averaged over the query tokens.
///
/// The final score is `max(whole, (whole + token) / 2)`, so a fragment that
/// merely appears somewhere in a name ("Tan" in "Lim Tan") scores well below
/// a name that starts with it ("Tan Wei Ming").
///
/// Low scorers are marked low-confidence but never discarded here; users
/// often have typos, and the composer's result cap does the bounding.
use strsim::jaro_winkler;

use crate::model::{Record, ScoredRecord};

/// Score and sort candidates by name similarity, descending. The sort is
/// stable: equal scores keep their filter-stage order.
pub fn rank(candidates: Vec<Record>, name_fragment: &str, min_score: f64) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = candidates
        .into_iter()
        .map(|record| {
            let score = name_similarity(name_fragment, &record.name);
            ScoredRecord {
                fuzzy_score: Some(score),
                low_confidence: score < min_score,
                distance_km: None,
                rank_score: 0.0,
                record,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.fuzzy_score
            .partial_cmp(&a.fuzzy_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// Similarity between a query fragment and a record name, 0-100.
/// Identical strings (ignoring case and surrounding whitespace) score 100.
pub fn name_similarity(fragment: &str, name: &str) -> f64 {
    let fragment = fragment.trim().to_lowercase();
    let name = name.trim().to_lowercase();
    if fragment.is_empty() || name.is_empty() {
        return 0.0;
    }

    let whole = jaro_winkler(&fragment, &name) * 100.0;
    let token = token_similarity(&fragment, &name);
    whole.max((whole + token) / 2.0).clamp(0.0, 100.0)
}

fn token_similarity(fragment: &str, name: &str) -> f64 {
    let query_tokens: Vec<&str> = fragment.split_whitespace().collect();
    let name_tokens: Vec<&str> = name.split_whitespace().collect();
    if query_tokens.is_empty() || name_tokens.is_empty() {
        return 0.0;
    }

    let total: f64 = query_tokens
        .iter()
        .map(|q| {
            name_tokens
                .iter()
                .map(|n| {
                    if q.chars().count() >= 3 && (n.contains(q) || q.contains(n)) {
                        100.0
                    } else {
                        jaro_winkler(q, n) * 100.0
                    }
                })
                .fold(0.0_f64, f64::max)
        })
        .sum();
    total / query_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::model::RecordCategory;

    use super::*;

    fn named(id: &str, name: &str) -> Record {
        Record {
            id: id.to_string(),
            name: name.to_string(),
            category: RecordCategory::Doctor,
            specialty: None,
            languages: Vec::new(),
            area: None,
            postal_code: None,
            address: None,
            services: None,
            raw: BTreeMap::new(),
        }
    }

    #[test]
    fn exact_name_scores_one_hundred() {
        assert_eq!(name_similarity("Tan Wei Ming", "Tan Wei Ming"), 100.0);
        assert_eq!(name_similarity("tan wei ming", "TAN WEI MING"), 100.0);
        assert_eq!(name_similarity("  Tan Wei Ming  ", "Tan Wei Ming"), 100.0);
    }

    #[test]
    fn surname_first_names_outrank_surname_last() {
        let wei_ming = name_similarity("Tan", "Tan Wei Ming");
        let bee_hoon = name_similarity("Tan", "Tan Bee Hoon");
        let lim_tan = name_similarity("Tan", "Lim Tan");

        assert!(wei_ming > lim_tan, "{wei_ming} vs {lim_tan}");
        assert!(bee_hoon > lim_tan, "{bee_hoon} vs {lim_tan}");
    }

    #[test]
    fn transpositions_and_partial_tokens_still_score_high() {
        assert!(name_similarity("Tna", "Tan Wei Ming") > 60.0);
        assert!(name_similarity("wei", "Tan Wei Ming") > 60.0);
        assert!(name_similarity("tan wei", "Tan Wei Ming") > 80.0);
    }

    #[test]
    fn ranking_is_descending_and_stable_on_ties() {
        let candidates = vec![
            named("first", "Ng Siew Lan"),
            named("second", "Tan Wei Ming"),
            named("third", "Ng Siew Lan"),
        ];
        let ranked = rank(candidates, "Tan", 60.0);

        assert_eq!(ranked[0].record.id, "second");
        // The two identical names tie; filter-stage order is preserved.
        assert_eq!(ranked[1].record.id, "first");
        assert_eq!(ranked[2].record.id, "third");
        assert_eq!(ranked[1].fuzzy_score, ranked[2].fuzzy_score);
    }

    #[test]
    fn low_scores_are_kept_but_marked() {
        let ranked = rank(vec![named("a", "Zhou Xiaoming")], "Krishnan", 60.0);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].low_confidence);
        assert!(ranked[0].fuzzy_score.expect("scored") < 60.0);
    }
}
