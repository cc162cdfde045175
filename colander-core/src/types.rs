//! Data model for the recipe server's entities.
//!
//! Field names follow the server's JSON (camelCase, nested unit/food objects
//! that may or may not carry an id). All identifiers are opaque strings
//! assigned by the server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A recipe as returned by the server, with its full ingredient list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default, rename = "recipeIngredient")]
    pub ingredients: Vec<Ingredient>,
}

/// One line of a recipe.
///
/// An ingredient is *unparsed* when it has free text (`note` or
/// `original_text`) but its unit or food reference is missing an id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<UnitRef>,
    #[serde(default)]
    pub food: Option<FoodRef>,
}

impl Ingredient {
    /// The free text to analyze, preferring `note` over `original_text`.
    pub fn text(&self) -> Option<&str> {
        self.note
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.original_text.as_deref().filter(|s| !s.trim().is_empty()))
    }

    pub fn has_unit_id(&self) -> bool {
        self.unit.as_ref().is_some_and(|u| u.id.is_some())
    }

    pub fn has_food_id(&self) -> bool {
        self.food.as_ref().is_some_and(|f| f.id.is_some())
    }

    /// Unparsed: has text but is missing the unit reference, the food
    /// reference, or both.
    pub fn is_unparsed(&self) -> bool {
        self.text().is_some() && (!self.has_unit_id() || !self.has_food_id())
    }
}

/// The unit slot of an ingredient. The server sometimes sends a name-only
/// object here (the parser's guess) without a catalog id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub abbreviation: Option<String>,
}

/// The food slot of an ingredient; same id-may-be-absent caveat as [`UnitRef`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A catalog unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<EntityAlias>,
}

/// A catalog food.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Food {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<EntityAlias>,
}

impl Food {
    /// Case-insensitive check against the food's alias list.
    pub fn has_alias(&self, alias: &str) -> bool {
        let needle = alias.trim().to_lowercase();
        self.aliases
            .iter()
            .any(|a| a.name.trim().to_lowercase() == needle)
    }
}

/// Alias entry as stored on units and foods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub name: String,
}

impl EntityAlias {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Stable address of one ingredient within one recipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngredientRef {
    pub recipe_id: String,
    pub ingredient_id: String,
}

impl IngredientRef {
    pub fn new(recipe_id: impl Into<String>, ingredient_id: impl Into<String>) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            ingredient_id: ingredient_id.into(),
        }
    }
}

impl fmt::Display for IngredientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.recipe_id, self.ingredient_id)
    }
}

/// Patch applied to an ingredient: attach a unit and/or food reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_id: Option<String>,
}

impl IngredientPatch {
    pub fn unit(id: impl Into<String>) -> Self {
        Self {
            unit_id: Some(id.into()),
            food_id: None,
        }
    }

    pub fn food(id: impl Into<String>) -> Self {
        Self {
            unit_id: None,
            food_id: Some(id.into()),
        }
    }
}

/// Advisory output of the server's NLP ingredient parser.
///
/// Best-effort: any field may be absent, and nothing downstream may depend on
/// a hint being present or correct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedHint {
    pub input: String,
    #[serde(default)]
    pub unit_name: Option<String>,
    #[serde(default)]
    pub food_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}
