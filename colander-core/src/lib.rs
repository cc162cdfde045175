//! Batch resolution of unparsed recipe ingredients.
//!
//! Scans a recipe server for ingredients whose free text never received a
//! unit or food reference, groups them by canonical pattern, and applies one
//! operator decision per pattern to every affected ingredient, with bounded
//! concurrency, partial-failure reporting, and a resumable on-disk session.

pub mod analyzer;
pub mod batch;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod similarity;
pub mod types;
pub mod validation;

pub use analyzer::{analyze, canonicalize, PatternGroup, PatternId, PatternKind, PatternStatus, UnitLexicon};
pub use batch::{BatchAction, BatchExecutor, BatchOperation, BatchProgress, BatchResult, BatchStatus};
pub use catalog::CatalogCache;
pub use client::{HttpRecipeClient, MockRecipeApi, NewFood, NewUnit, RecipeApi};
pub use config::{Config, ConfigError};
pub use error::{ApiError, ErrorKind, SessionLoadError};
pub use orchestrator::{Orchestrator, OrchestratorError, SessionStartup};
pub use session::{SessionState, SessionStats, SessionStore};
pub use similarity::{build_similarity, SimilarityConfig};
pub use types::{Food, Ingredient, IngredientPatch, IngredientRef, ParsedHint, Recipe, Unit};
