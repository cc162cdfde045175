//! Advisory near-duplicate detection between patterns.
//!
//! Suggestions only: nothing is ever merged automatically. Acting on a
//! suggestion is an explicit operator action through the normal alias/create
//! workflow.

use std::collections::HashMap;

use crate::analyzer::{PatternGroup, PatternId, PatternKind};

/// Maximum suggestions kept per pattern.
pub const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    /// Minimum normalized edit-distance ratio to call two patterns related.
    pub threshold: f64,
    /// Cap on suggestions per pattern.
    pub max_candidates: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            max_candidates: MAX_CANDIDATES,
        }
    }
}

impl SimilarityConfig {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

/// Common culinary abbreviations expanded before stemming, so "tbsp" and
/// "tablespoon" land in the same bucket.
fn expand_abbreviation(term: &str) -> &str {
    match term {
        "tsp" | "ts" => "teaspoon",
        "tbsp" | "tbs" | "tb" => "tablespoon",
        "oz" => "ounce",
        "lb" | "lbs" => "pound",
        "g" => "gram",
        "kg" => "kilogram",
        "mg" => "milligram",
        "ml" => "milliliter",
        "l" => "liter",
        "c" => "cup",
        "pt" => "pint",
        "qt" => "quart",
        "gal" => "gallon",
        "pkg" => "package",
        other => other,
    }
}

/// Reduce a canonical text to a comparison stem: expand abbreviations, drop
/// trailing periods, strip simple plural suffixes.
pub fn stem(canonical: &str) -> String {
    let trimmed = canonical.trim_end_matches('.');
    let expanded = expand_abbreviation(trimmed);
    let depluralized = if let Some(base) = expanded.strip_suffix("ies") {
        if base.is_empty() {
            expanded
        } else {
            return format!("{}y", base);
        }
    } else if let Some(base) = expanded.strip_suffix("es") {
        if base.len() > 2 {
            base
        } else {
            expanded
        }
    } else if let Some(base) = expanded.strip_suffix('s') {
        if base.len() > 1 {
            base
        } else {
            expanded
        }
    } else {
        expanded
    };
    depluralized.to_string()
}

/// Blocking key: first two characters of the canonical text.
fn prefix_key(canonical: &str) -> String {
    canonical.chars().take(2).collect()
}

/// Fill in `similar_group_ids` for every pattern.
///
/// Candidates are restricted to same-kind patterns sharing a two-character
/// prefix or a stem bucket, then scored with normalized Levenshtein; a shared
/// stem alone also qualifies. At most `max_candidates` survive per pattern,
/// best ratio first.
pub fn build_similarity(groups: &mut [PatternGroup], config: &SimilarityConfig) {
    // Blocking step: bucket indexes by (kind, key) so the pairwise comparison
    // stays tractable for large pattern sets.
    let mut buckets: HashMap<(PatternKind, String), Vec<usize>> = HashMap::new();
    let stems: Vec<String> = groups.iter().map(|g| stem(&g.canonical_text)).collect();

    for (i, group) in groups.iter().enumerate() {
        buckets
            .entry((group.kind, prefix_key(&group.canonical_text)))
            .or_default()
            .push(i);
        let stem_key = format!("stem:{}", stems[i]);
        buckets.entry((group.kind, stem_key)).or_default().push(i);
    }

    let mut candidates: Vec<Vec<(f64, PatternId)>> = vec![Vec::new(); groups.len()];

    for indexes in buckets.values() {
        for (a_pos, &a) in indexes.iter().enumerate() {
            for &b in &indexes[a_pos + 1..] {
                let ratio = strsim::normalized_levenshtein(
                    &groups[a].canonical_text,
                    &groups[b].canonical_text,
                );
                let related = ratio >= config.threshold || stems[a] == stems[b];
                if !related {
                    continue;
                }
                push_candidate(&mut candidates[a], ratio, groups[b].id.clone());
                push_candidate(&mut candidates[b], ratio, groups[a].id.clone());
            }
        }
    }

    for (group, mut found) in groups.iter_mut().zip(candidates) {
        found.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap_or(std::cmp::Ordering::Equal));
        found.dedup_by(|x, y| x.1 == y.1);
        found.truncate(config.max_candidates);
        group.similar_group_ids = found.into_iter().map(|(_, id)| id).collect();
    }
}

fn push_candidate(list: &mut Vec<(f64, PatternId)>, ratio: f64, id: PatternId) {
    if list.iter().any(|(_, existing)| *existing == id) {
        return;
    }
    list.push((ratio, id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{PatternStatus, PatternId};

    fn group(kind: PatternKind, text: &str) -> PatternGroup {
        PatternGroup {
            id: PatternId::derive(kind, text),
            kind,
            canonical_text: text.to_string(),
            display_text: text.to_string(),
            ingredient_refs: Vec::new(),
            recipe_ids: Vec::new(),
            similar_group_ids: Vec::new(),
            status: PatternStatus::Pending,
        }
    }

    fn similars<'a>(groups: &'a [PatternGroup], text: &str) -> &'a [PatternId] {
        &groups
            .iter()
            .find(|g| g.canonical_text == text)
            .unwrap()
            .similar_group_ids
    }

    #[test]
    fn plurals_suggest_each_other() {
        let mut groups = vec![group(PatternKind::Unit, "cup"), group(PatternKind::Unit, "cups")];
        build_similarity(&mut groups, &SimilarityConfig::default());

        assert_eq!(similars(&groups, "cup"), &[groups[1].id.clone()]);
        assert_eq!(similars(&groups, "cups"), &[groups[0].id.clone()]);
    }

    #[test]
    fn abbreviations_bucket_with_their_expansion() {
        let mut groups = vec![
            group(PatternKind::Unit, "tbsp"),
            group(PatternKind::Unit, "tablespoon"),
        ];
        build_similarity(&mut groups, &SimilarityConfig::default());
        assert!(!similars(&groups, "tbsp").is_empty());
        assert!(!similars(&groups, "tablespoon").is_empty());
    }

    #[test]
    fn kinds_never_cross() {
        let mut groups = vec![group(PatternKind::Unit, "cup"), group(PatternKind::Food, "cups")];
        build_similarity(&mut groups, &SimilarityConfig::default());
        assert!(similars(&groups, "cup").is_empty());
        assert!(similars(&groups, "cups").is_empty());
    }

    #[test]
    fn unrelated_texts_stay_unrelated() {
        let mut groups = vec![
            group(PatternKind::Food, "olive oil"),
            group(PatternKind::Food, "oregano"),
        ];
        build_similarity(&mut groups, &SimilarityConfig::default());
        assert!(similars(&groups, "olive oil").is_empty());
    }

    #[test]
    fn near_misses_pass_the_ratio_test() {
        let mut groups = vec![
            group(PatternKind::Food, "tomatoes"),
            group(PatternKind::Food, "tomatoe"),
        ];
        build_similarity(&mut groups, &SimilarityConfig::default());
        assert!(!similars(&groups, "tomatoes").is_empty());
    }

    #[test]
    fn candidates_are_capped() {
        let mut groups: Vec<PatternGroup> = (0..10)
            .map(|i| group(PatternKind::Food, &format!("pepper{}", i)))
            .collect();
        groups.push(group(PatternKind::Food, "pepper"));
        build_similarity(&mut groups, &SimilarityConfig::default());

        for g in &groups {
            assert!(g.similar_group_ids.len() <= MAX_CANDIDATES);
        }
    }

    #[test]
    fn stemming_handles_y_plurals() {
        assert_eq!(stem("berries"), "berry");
        assert_eq!(stem("cups"), "cup");
        assert_eq!(stem("tbsp"), "tablespoon");
        assert_eq!(stem("molasses"), "molass");
    }

    #[test]
    fn large_pattern_sets_finish_quickly() {
        let mut groups: Vec<PatternGroup> = (0..500)
            .map(|i| group(PatternKind::Food, &format!("ingredient-{:03}", i)))
            .collect();
        let start = std::time::Instant::now();
        build_similarity(&mut groups, &SimilarityConfig::default());
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }
}
