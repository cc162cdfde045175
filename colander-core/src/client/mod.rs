//! Typed client for the recipe server's HTTP API.
//!
//! The [`RecipeApi`] trait is the seam between the rest of the crate and the
//! network, enabling mockability in tests. [`HttpRecipeClient`] is the
//! production implementation: one authenticated connection pool, transparent
//! pagination, failure classification, and retry-with-backoff for transient
//! errors.

mod backoff;
mod http;
mod mock;

pub use backoff::BackoffPolicy;
pub use http::{HttpRecipeClient, HttpRecipeClientBuilder};
pub use mock::MockRecipeApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::{Food, IngredientPatch, ParsedHint, Recipe, Unit};

/// Payload for creating a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUnit {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Payload for creating a food.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFood {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Operations against the recipe server.
///
/// Implementations must be safe to call from multiple concurrent tasks.
/// Transient failures are retried internally; every error returned from these
/// methods is final from the caller's perspective.
#[async_trait]
pub trait RecipeApi: Send + Sync {
    /// Fetch all recipes with their full ingredient arrays. Paging is handled
    /// internally; result order is unspecified.
    async fn list_recipes(&self) -> Result<Vec<Recipe>, ApiError>;

    /// Fetch a single recipe by slug.
    async fn get_recipe(&self, slug: &str) -> Result<Recipe, ApiError>;

    /// Fetch the full unit catalog.
    async fn list_units(&self) -> Result<Vec<Unit>, ApiError>;

    /// Fetch the full food catalog.
    async fn list_foods(&self) -> Result<Vec<Food>, ApiError>;

    /// Create a unit. A duplicate-conflict whose response body is the existing
    /// entity is treated as success.
    async fn create_unit(&self, unit: &NewUnit) -> Result<Unit, ApiError>;

    /// Create a food, with the same duplicate-conflict semantics as
    /// [`create_unit`](Self::create_unit).
    async fn create_food(&self, food: &NewFood) -> Result<Food, ApiError>;

    /// Attach an alias to an existing food and return the updated entity.
    /// Adding an alias the food already has is a no-op success.
    async fn add_food_alias(&self, food_id: &str, alias: &str) -> Result<Food, ApiError>;

    /// Attach unit and/or food references to one ingredient.
    async fn update_ingredient(
        &self,
        recipe_id: &str,
        ingredient_id: &str,
        patch: &IngredientPatch,
    ) -> Result<(), ApiError>;

    /// Run the server's NLP parser over one ingredient note. Advisory only.
    async fn parse_note(&self, text: &str) -> Result<ParsedHint, ApiError>;
}
