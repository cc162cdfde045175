//! Pre-flight validation for catalog mutations.
//!
//! These checks run against the cached catalogs before any remote write. A
//! failed validation aborts the batch with no network traffic.

use crate::catalog::CatalogCache;

/// Maximum length for unit/food names and aliases.
pub const MAX_NAME_LENGTH: usize = 100;

/// Characters rejected in names and aliases.
const DISALLOWED_CHARS: &[char] = &['<', '>', '&', ';', '|'];

/// Outcome of a validation pass. Warnings do not block the operation.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// All errors joined for display.
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

fn check_name(result: &mut ValidationResult, what: &str, name: &str) {
    if name.trim().is_empty() {
        result.add_error(format!("{} name cannot be empty", what));
        return;
    }
    if name.len() > MAX_NAME_LENGTH {
        result.add_error(format!(
            "{} name cannot exceed {} characters",
            what, MAX_NAME_LENGTH
        ));
    }
    let found: Vec<String> = DISALLOWED_CHARS
        .iter()
        .filter(|c| name.contains(**c))
        .map(|c| c.to_string())
        .collect();
    if !found.is_empty() {
        result.add_error(format!("{} name cannot contain: {}", what, found.join(", ")));
    }
}

/// Validate a unit creation: non-empty name, and neither name nor
/// abbreviation colliding with any cached unit's surface forms.
pub fn validate_new_unit(
    name: &str,
    abbreviation: Option<&str>,
    catalog: &CatalogCache,
) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_name(&mut result, "Unit", name);
    if !result.is_valid() {
        return result;
    }

    if catalog.find_unit_term(name).is_some() {
        result.add_error(format!("Unit '{}' already exists", name.trim()));
    }
    if let Some(abbr) = abbreviation {
        if !abbr.trim().is_empty() {
            if abbr.len() > MAX_NAME_LENGTH {
                result.add_error(format!(
                    "Abbreviation cannot exceed {} characters",
                    MAX_NAME_LENGTH
                ));
            }
            if catalog.find_unit_term(abbr).is_some() {
                result.add_error(format!(
                    "Abbreviation '{}' is already used by another unit",
                    abbr.trim()
                ));
            }
        }
    }
    result
}

/// Validate a food creation: non-empty name, not duplicating any cached food
/// name or alias (case-insensitive).
pub fn validate_new_food(name: &str, catalog: &CatalogCache) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_name(&mut result, "Food", name);
    if !result.is_valid() {
        return result;
    }

    if catalog.find_food_term(name).is_some() {
        result.add_error(format!("Food '{}' already exists", name.trim()));
    }
    result
}

/// Validate an alias addition: target resolves in the cache, alias text is
/// sound, and the alias is not already attached to that food.
pub fn validate_alias(food_id: &str, alias: &str, catalog: &CatalogCache) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_name(&mut result, "Alias", alias);
    if !result.is_valid() {
        return result;
    }

    match catalog.food_by_id(food_id) {
        None => result.add_error(format!("Target food '{}' not found in catalog", food_id)),
        Some(food) => {
            if food.has_alias(alias) {
                result.add_error(format!(
                    "Food '{}' already has alias '{}'",
                    food.name,
                    alias.trim()
                ));
            } else if let Some(other) = catalog.find_food_term(alias) {
                if other.id != food_id {
                    result.add_warning(format!(
                        "Alias '{}' also matches food '{}'",
                        alias.trim(),
                        other.name
                    ));
                }
            }
        }
    }
    result
}
