//! Pattern analysis: turn a recipe snapshot into deduplicated groups of
//! unparsed-ingredient text.
//!
//! Pure and deterministic: no I/O, and the same snapshot plus the same unit
//! lexicon always yields the same pattern ids and memberships. Callers
//! processing large snapshots should run [`analyze`] on a blocking thread.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::types::{Ingredient, IngredientRef, ParsedHint, Recipe};

/// Which catalog a pattern resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Unit,
    Food,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Unit => "unit",
            PatternKind::Food => "food",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier for a pattern group, derived from kind + canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Derive the id for a kind/canonical-text pair. Deterministic across
    /// runs and processes.
    pub fn derive(kind: PatternKind, canonical_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(canonical_text.as_bytes());
        let digest = hex::encode(hasher.finalize());
        PatternId(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PatternId {
    fn from(s: String) -> Self {
        PatternId(s)
    }
}

/// Lifecycle of a pattern within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Pending,
    Processing,
    Completed,
    Skipped,
}

impl PatternStatus {
    /// Valid transitions:
    /// pending -> processing | skipped; processing -> completed | pending;
    /// skipped -> pending. `completed` is terminal for the session.
    pub fn can_transition_to(&self, next: PatternStatus) -> bool {
        use PatternStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Skipped) | (Processing, Completed) | (Processing, Pending) | (Skipped, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Pending => "pending",
            PatternStatus::Processing => "processing",
            PatternStatus::Completed => "completed",
            PatternStatus::Skipped => "skipped",
        }
    }
}

/// A set of ingredients sharing one canonicalized text fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternGroup {
    pub id: PatternId,
    pub kind: PatternKind,
    pub canonical_text: String,
    /// First observed surface form, for operator presentation.
    pub display_text: String,
    pub ingredient_refs: Vec<IngredientRef>,
    /// Distinct recipes touched, in first-observed order.
    pub recipe_ids: Vec<String>,
    /// Advisory near-duplicates of the same kind. Non-owning back-references.
    #[serde(default)]
    pub similar_group_ids: Vec<PatternId>,
    pub status: PatternStatus,
}

/// Known unit surface forms used to isolate unit fragments from free text.
///
/// Seeded with common cooking units and extended with every name,
/// abbreviation, and alias from the cached unit catalog.
#[derive(Debug, Clone, Default)]
pub struct UnitLexicon {
    terms: HashSet<String>,
}

/// Common cooking units, lowercase.
static BUILTIN_UNITS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Volume
        "teaspoon", "teaspoons", "tsp", "tablespoon", "tablespoons", "tbsp", "tbs",
        "cup", "cups", "pint", "pints", "pt", "quart", "quarts", "qt", "gallon",
        "gallons", "gal", "milliliter", "milliliters", "millilitre", "millilitres",
        "ml", "liter", "liters", "litre", "litres", "l", "dl",
        // Weight
        "ounce", "ounces", "oz", "pound", "pounds", "lb", "lbs", "gram", "grams",
        "g", "kilogram", "kilograms", "kg", "milligram", "milligrams", "mg",
        // Count and size
        "pinch", "pinches", "dash", "dashes", "drop", "drops", "clove", "cloves",
        "slice", "slices", "stick", "sticks", "can", "cans", "jar", "jars",
        "package", "packages", "pkg", "bunch", "bunches", "head", "heads",
        "sprig", "sprigs", "stalk", "stalks", "piece", "pieces", "handful",
        "handfuls", "cube", "cubes", "bag", "bags", "box", "boxes", "bottle",
        "bottles",
    ]
    .into_iter()
    .collect()
});

impl UnitLexicon {
    /// Lexicon with only the built-in culinary units.
    pub fn builtin() -> Self {
        Self {
            terms: BUILTIN_UNITS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Built-in units plus every surface form from the cached catalog.
    pub fn with_catalog_terms(catalog_terms: impl IntoIterator<Item = String>) -> Self {
        let mut lexicon = Self::builtin();
        for term in catalog_terms {
            let canonical = canonicalize(&term);
            if !canonical.is_empty() {
                lexicon.terms.insert(canonical);
            }
        }
        lexicon
    }

    /// Whether a canonicalized token is a known unit, directly or after
    /// stripping a plural s.
    pub fn matches(&self, token: &str) -> bool {
        if self.terms.contains(token) {
            return true;
        }
        token
            .strip_suffix('s')
            .is_some_and(|singular| !singular.is_empty() && self.terms.contains(singular))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Canonical text: NFKC-normalized, lowercased, internal whitespace collapsed
/// to single spaces, leading/trailing whitespace stripped.
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfkc().collect();
    normalized
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A fragment is unusable as a pattern when nothing alphabetic survives
/// canonicalization (empty, purely numeric, or punctuation-only).
fn is_discardable(canonical: &str) -> bool {
    !canonical.chars().any(|c| c.is_alphabetic())
}

/// A candidate pattern fragment: the surface form plus its canonical form.
#[derive(Debug, Clone)]
struct Fragment {
    display: String,
    canonical: String,
}

impl Fragment {
    fn new(display: &str) -> Option<Self> {
        let canonical = canonicalize(display);
        if is_discardable(&canonical) {
            return None;
        }
        Some(Self {
            display: display.trim().to_string(),
            canonical,
        })
    }
}

/// True for quantity-looking tokens: digits with optional fraction/decimal
/// punctuation ("2", "1/2", "2.5").
fn is_quantity_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_numeric() || matches!(c, '/' | '.' | ',' | '-'))
}

/// Split a note into word tokens on whitespace and punctuation.
fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '/' && c != '.'))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Heuristic split of a note into a unit fragment and a food fragment.
///
/// The first token found in the lexicon is the unit fragment; all remaining
/// non-quantity tokens form the food fragment. Deterministic given the same
/// lexicon.
fn split_note(note: &str, lexicon: &UnitLexicon) -> (Option<Fragment>, Option<Fragment>) {
    let tokens = tokenize(note);
    let mut unit: Option<Fragment> = None;
    let mut food_words: Vec<&str> = Vec::new();

    for token in tokens {
        if is_quantity_token(token) {
            continue;
        }
        if unit.is_none() && lexicon.matches(&canonicalize(token)) {
            unit = Fragment::new(token);
            continue;
        }
        food_words.push(token);
    }

    let food = if food_words.is_empty() {
        None
    } else {
        Fragment::new(&food_words.join(" "))
    };
    (unit, food)
}

/// Work out the unit/food fragments for one unparsed ingredient.
///
/// Precedence per kind: the name the server already split into the unit/food
/// slot, then a parser hint, then the heuristic note split, then the whole
/// note (the fully-unparsed fallback).
fn fragments_for(
    ing: &Ingredient,
    note: &str,
    lexicon: &UnitLexicon,
    hint: Option<&ParsedHint>,
) -> (Option<Fragment>, Option<Fragment>) {
    let (heuristic_unit, heuristic_food) = split_note(note, lexicon);
    let whole_note = Fragment::new(note);

    let unit = if ing.has_unit_id() {
        None
    } else {
        ing.unit
            .as_ref()
            .and_then(|u| u.name.as_deref().or(u.abbreviation.as_deref()))
            .and_then(Fragment::new)
            .or_else(|| {
                hint.and_then(|h| h.unit_name.as_deref())
                    .and_then(Fragment::new)
            })
            .or(heuristic_unit)
            .or_else(|| whole_note.clone())
    };

    let food = if ing.has_food_id() {
        None
    } else {
        ing.food
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .and_then(Fragment::new)
            .or_else(|| {
                hint.and_then(|h| h.food_name.as_deref())
                    .and_then(Fragment::new)
            })
            .or(heuristic_food)
            .or(whole_note)
    };

    (unit, food)
}

/// Analyze a snapshot without parser hints.
pub fn analyze(recipes: &[Recipe], lexicon: &UnitLexicon) -> Vec<PatternGroup> {
    analyze_with_hints(recipes, lexicon, &HashMap::new())
}

/// Analyze a snapshot, optionally consulting parser hints keyed by
/// ingredient id. Hints only influence fragment isolation; grouping and ids
/// stay deterministic.
pub fn analyze_with_hints(
    recipes: &[Recipe],
    lexicon: &UnitLexicon,
    hints: &HashMap<String, ParsedHint>,
) -> Vec<PatternGroup> {
    fn record(
        kind: PatternKind,
        fragment: Fragment,
        recipe_id: &str,
        ingredient_id: &str,
        groups: &mut Vec<PatternGroup>,
        index: &mut HashMap<(PatternKind, String), usize>,
    ) {
        let key = (kind, fragment.canonical.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(PatternGroup {
                id: PatternId::derive(kind, &fragment.canonical),
                kind,
                canonical_text: fragment.canonical.clone(),
                display_text: fragment.display.clone(),
                ingredient_refs: Vec::new(),
                recipe_ids: Vec::new(),
                similar_group_ids: Vec::new(),
                status: PatternStatus::Pending,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group
            .ingredient_refs
            .push(IngredientRef::new(recipe_id, ingredient_id));
        if !group.recipe_ids.iter().any(|r| r == recipe_id) {
            group.recipe_ids.push(recipe_id.to_string());
        }
    }

    let mut groups: Vec<PatternGroup> = Vec::new();
    let mut index: HashMap<(PatternKind, String), usize> = HashMap::new();

    for recipe in recipes {
        for ing in &recipe.ingredients {
            if !ing.is_unparsed() {
                continue;
            }
            let Some(ingredient_id) = ing.id.as_deref() else {
                // Nothing to patch later without an id.
                continue;
            };
            let Some(note) = ing.text() else {
                continue;
            };
            let hint = hints.get(ingredient_id);
            let (unit, food) = fragments_for(ing, note, lexicon, hint);

            if let Some(fragment) = unit {
                record(
                    PatternKind::Unit,
                    fragment,
                    &recipe.id,
                    ingredient_id,
                    &mut groups,
                    &mut index,
                );
            }
            if let Some(fragment) = food {
                record(
                    PatternKind::Food,
                    fragment,
                    &recipe.id,
                    ingredient_id,
                    &mut groups,
                    &mut index,
                );
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FoodRef, UnitRef};

    fn recipe(id: &str, ingredients: Vec<Ingredient>) -> Recipe {
        Recipe {
            id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            ingredients,
        }
    }

    fn unparsed(id: &str, note: &str) -> Ingredient {
        Ingredient {
            id: Some(id.to_string()),
            note: Some(note.to_string()),
            ..Default::default()
        }
    }

    fn find<'a>(groups: &'a [PatternGroup], kind: PatternKind, text: &str) -> &'a PatternGroup {
        groups
            .iter()
            .find(|g| g.kind == kind && g.canonical_text == text)
            .unwrap_or_else(|| panic!("no {} group for '{}'", kind, text))
    }

    #[test]
    fn canonicalization_folds_case_whitespace_and_compatibility_forms() {
        assert_eq!(canonicalize("  TSP  "), "tsp");
        assert_eq!(canonicalize("Olive   Oil"), "olive oil");
        // Fullwidth compatibility characters fold to ASCII under NFKC.
        assert_eq!(canonicalize("ＴＳＰ"), "tsp");
        // Precomposed and decomposed accents agree.
        assert_eq!(canonicalize("caf\u{e9}"), canonicalize("cafe\u{301}"));
    }

    #[test]
    fn pattern_ids_are_stable_and_kind_scoped() {
        let a = PatternId::derive(PatternKind::Unit, "tsp");
        let b = PatternId::derive(PatternKind::Unit, "tsp");
        let c = PatternId::derive(PatternKind::Food, "tsp");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn case_variants_share_a_group() {
        let recipes = vec![
            recipe("r1", vec![unparsed("i1", "2 tsp salt")]),
            recipe("r2", vec![unparsed("i2", "1 TSP sugar")]),
            recipe("r3", vec![unparsed("i3", "2 tsp vanilla")]),
        ];
        let groups = analyze(&recipes, &UnitLexicon::builtin());

        let tsp = find(&groups, PatternKind::Unit, "tsp");
        assert_eq!(tsp.ingredient_refs.len(), 3);
        assert_eq!(tsp.recipe_ids.len(), 3);
        assert_eq!(tsp.display_text, "tsp");
    }

    #[test]
    fn analysis_is_deterministic() {
        let recipes = vec![
            recipe(
                "r1",
                vec![unparsed("i1", "2 cups flour"), unparsed("i2", "1 cup sugar")],
            ),
            recipe("r2", vec![unparsed("i3", "3 tbsp butter")]),
        ];
        let lexicon = UnitLexicon::builtin();
        let first = analyze(&recipes, &lexicon);
        let second = analyze(&recipes, &lexicon);

        let ids = |groups: &[PatternGroup]| {
            groups
                .iter()
                .map(|g| (g.id.clone(), g.ingredient_refs.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn every_unparsed_ingredient_lands_in_some_group() {
        let recipes = vec![recipe(
            "r1",
            vec![
                unparsed("i1", "2 tsp salt"),
                unparsed("i2", "fresh basil leaves"),
                unparsed("i3", "glug of mystery sauce"),
            ],
        )];
        let groups = analyze(&recipes, &UnitLexicon::builtin());

        for id in ["i1", "i2", "i3"] {
            assert!(
                groups
                    .iter()
                    .any(|g| g.ingredient_refs.iter().any(|r| r.ingredient_id == id)),
                "ingredient {} missing from all groups",
                id
            );
        }
    }

    #[test]
    fn server_split_unit_name_takes_precedence() {
        let ing = Ingredient {
            id: Some("i1".to_string()),
            note: Some("2 heaping scoops protein".to_string()),
            unit: Some(UnitRef {
                id: None,
                name: Some("scoops".to_string()),
                abbreviation: None,
            }),
            food: Some(FoodRef {
                id: None,
                name: Some("protein powder".to_string()),
            }),
            ..Default::default()
        };
        let groups = analyze(&[recipe("r1", vec![ing])], &UnitLexicon::builtin());

        find(&groups, PatternKind::Unit, "scoops");
        find(&groups, PatternKind::Food, "protein powder");
    }

    #[test]
    fn hint_overrides_heuristic_but_not_wire_split() {
        let hints = HashMap::from([(
            "i1".to_string(),
            ParsedHint {
                input: "2 glugs oil".to_string(),
                unit_name: Some("glug".to_string()),
                food_name: Some("oil".to_string()),
                confidence: Some(0.9),
            },
        )]);
        let recipes = vec![recipe("r1", vec![unparsed("i1", "2 glugs oil")])];
        let groups = analyze_with_hints(&recipes, &UnitLexicon::builtin(), &hints);

        find(&groups, PatternKind::Unit, "glug");
        find(&groups, PatternKind::Food, "oil");
    }

    #[test]
    fn whole_note_is_the_fallback_for_both_kinds() {
        let recipes = vec![recipe("r1", vec![unparsed("i1", "za'atar blend")])];
        let groups = analyze(&recipes, &UnitLexicon::builtin());

        // No unit token matches, so both kinds fall back to the full note.
        assert!(groups
            .iter()
            .any(|g| g.kind == PatternKind::Unit && g.canonical_text.contains("za")));
        assert!(groups
            .iter()
            .any(|g| g.kind == PatternKind::Food && g.canonical_text.contains("za")));
    }

    #[test]
    fn numeric_and_punctuation_notes_are_skipped() {
        let recipes = vec![recipe(
            "r1",
            vec![unparsed("i1", "12345"), unparsed("i2", "---"), unparsed("i3", "½")],
        )];
        let groups = analyze(&recipes, &UnitLexicon::builtin());
        assert!(groups.is_empty());
    }

    #[test]
    fn parsed_ingredients_are_ignored() {
        let ing = Ingredient {
            id: Some("i1".to_string()),
            note: Some("2 tsp salt".to_string()),
            unit: Some(UnitRef {
                id: Some("u1".to_string()),
                ..Default::default()
            }),
            food: Some(FoodRef {
                id: Some("f1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let groups = analyze(&[recipe("r1", vec![ing])], &UnitLexicon::builtin());
        assert!(groups.is_empty());
    }

    #[test]
    fn missing_unit_only_emits_only_unit_patterns() {
        let ing = Ingredient {
            id: Some("i1".to_string()),
            note: Some("2 tsp salt".to_string()),
            food: Some(FoodRef {
                id: Some("f1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let groups = analyze(&[recipe("r1", vec![ing])], &UnitLexicon::builtin());
        assert!(groups.iter().all(|g| g.kind == PatternKind::Unit));
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn lexicon_extends_with_catalog_terms() {
        let lexicon =
            UnitLexicon::with_catalog_terms(vec!["Glug".to_string(), "  ".to_string()]);
        assert!(lexicon.matches("glug"));
        assert!(lexicon.matches("glugs"));
        assert!(!lexicon.matches("blob"));
    }

    #[test]
    fn status_transitions_follow_the_state_machine() {
        use PatternStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Skipped.can_transition_to(Pending));

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Skipped.can_transition_to(Processing));
    }
}
