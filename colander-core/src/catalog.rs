//! Cached unit/food catalogs with case-insensitive lookup.
//!
//! The orchestrator owns one [`CatalogCache`] per session and is the only
//! component that mutates it, either by replacing a whole catalog with a fresh
//! listing or by appending an entity the batch executor just created. The
//! executor and analyzer read a consistent snapshot per batch.

use std::collections::{HashMap, HashSet};

use crate::types::{Food, Unit};

/// Snapshot of the server's unit and food catalogs.
#[derive(Debug, Clone, Default)]
pub struct CatalogCache {
    units: Vec<Unit>,
    foods: Vec<Food>,
    /// Lowercased name/abbreviation/alias -> index into `units`.
    unit_terms: HashMap<String, usize>,
    /// Lowercased name/alias -> index into `foods`.
    food_terms: HashMap<String, usize>,
    food_ids: HashMap<String, usize>,
}

impl CatalogCache {
    pub fn new(units: Vec<Unit>, foods: Vec<Food>) -> Self {
        let mut cache = Self {
            units,
            foods,
            ..Default::default()
        };
        cache.reindex();
        cache
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn foods(&self) -> &[Food] {
        &self.foods
    }

    /// Replace the unit catalog with a fresh listing.
    pub fn replace_units(&mut self, units: Vec<Unit>) {
        self.units = units;
        self.reindex();
    }

    /// Replace the food catalog with a fresh listing.
    pub fn replace_foods(&mut self, foods: Vec<Food>) {
        self.foods = foods;
        self.reindex();
    }

    /// Append a unit created during a batch.
    pub fn push_unit(&mut self, unit: Unit) {
        self.units.push(unit);
        self.reindex();
    }

    /// Append a food created during a batch.
    pub fn push_food(&mut self, food: Food) {
        self.foods.push(food);
        self.reindex();
    }

    /// Find a unit whose name, abbreviation, or alias matches (case-insensitive).
    pub fn find_unit_term(&self, term: &str) -> Option<&Unit> {
        self.unit_terms
            .get(&normalize_term(term))
            .map(|&i| &self.units[i])
    }

    /// Find a food whose name or alias matches (case-insensitive).
    pub fn find_food_term(&self, term: &str) -> Option<&Food> {
        self.food_terms
            .get(&normalize_term(term))
            .map(|&i| &self.foods[i])
    }

    pub fn food_by_id(&self, id: &str) -> Option<&Food> {
        self.food_ids.get(id).map(|&i| &self.foods[i])
    }

    /// Every lowercased surface form of every unit: names, abbreviations, and
    /// aliases. Feeds the analyzer's fragment isolation.
    pub fn unit_terms(&self) -> HashSet<String> {
        self.unit_terms.keys().cloned().collect()
    }

    fn reindex(&mut self) {
        self.unit_terms.clear();
        self.food_terms.clear();
        self.food_ids.clear();

        for (i, unit) in self.units.iter().enumerate() {
            self.unit_terms.entry(normalize_term(&unit.name)).or_insert(i);
            if let Some(abbr) = &unit.abbreviation {
                if !abbr.trim().is_empty() {
                    self.unit_terms.entry(normalize_term(abbr)).or_insert(i);
                }
            }
            for alias in &unit.aliases {
                self.unit_terms
                    .entry(normalize_term(&alias.name))
                    .or_insert(i);
            }
        }

        for (i, food) in self.foods.iter().enumerate() {
            self.food_terms.entry(normalize_term(&food.name)).or_insert(i);
            for alias in &food.aliases {
                self.food_terms
                    .entry(normalize_term(&alias.name))
                    .or_insert(i);
            }
        }
        for (i, food) in self.foods.iter().enumerate() {
            self.food_ids.insert(food.id.clone(), i);
        }
    }
}

fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}
