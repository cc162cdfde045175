//! In-memory [`RecipeApi`] for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{EntityAlias, Food, FoodRef, IngredientPatch, ParsedHint, Recipe, Unit, UnitRef};

use super::{NewFood, NewUnit, RecipeApi};

/// A scripted failure: the status and body returned instead of succeeding.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    status: u16,
    body: String,
}

impl ScriptedFailure {
    fn into_error(self, operation: &'static str) -> ApiError {
        ApiError::Status {
            operation,
            status: self.status,
            body: self.body,
        }
    }
}

#[derive(Default)]
struct MockState {
    recipes: Vec<Recipe>,
    units: Vec<Unit>,
    foods: Vec<Food>,
    hints: HashMap<String, ParsedHint>,
    update_failures: HashMap<String, VecDeque<ScriptedFailure>>,
    list_recipe_failures: VecDeque<ScriptedFailure>,
    create_unit_failures: VecDeque<ScriptedFailure>,
    create_food_failures: VecDeque<ScriptedFailure>,
    alias_failures: VecDeque<ScriptedFailure>,
    unit_creates: u32,
    food_creates: u32,
    update_calls: u32,
    applied_patches: Vec<(String, String, IngredientPatch)>,
    next_id: u32,
}

/// Mock recipe server for tests: in-memory catalogs, scripted per-ingredient
/// failure queues, and call counters for asserting request behavior.
#[derive(Default)]
pub struct MockRecipeApi {
    state: Mutex<MockState>,
}

impl MockRecipeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipes(self, recipes: Vec<Recipe>) -> Self {
        self.state.lock().unwrap().recipes = recipes;
        self
    }

    pub fn with_units(self, units: Vec<Unit>) -> Self {
        self.state.lock().unwrap().units = units;
        self
    }

    pub fn with_foods(self, foods: Vec<Food>) -> Self {
        self.state.lock().unwrap().foods = foods;
        self
    }

    pub fn with_hint(self, input: &str, hint: ParsedHint) -> Self {
        self.state
            .lock()
            .unwrap()
            .hints
            .insert(input.to_string(), hint);
        self
    }

    /// Make the next `times` updates of `ingredient_id` fail with `status`.
    pub fn fail_update(self, ingredient_id: &str, times: u32, status: u16, body: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let queue = state
                .update_failures
                .entry(ingredient_id.to_string())
                .or_default();
            for _ in 0..times {
                queue.push_back(ScriptedFailure {
                    status,
                    body: body.to_string(),
                });
            }
        }
        self
    }

    /// Make the next recipe listing fail with `status`.
    pub fn fail_list_recipes(self, status: u16, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .list_recipe_failures
            .push_back(ScriptedFailure {
                status,
                body: body.to_string(),
            });
        self
    }

    /// Make the next unit create fail with `status`.
    pub fn fail_create_unit(self, status: u16, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_unit_failures
            .push_back(ScriptedFailure {
                status,
                body: body.to_string(),
            });
        self
    }

    /// Make the next food create fail with `status`.
    pub fn fail_create_food(self, status: u16, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_food_failures
            .push_back(ScriptedFailure {
                status,
                body: body.to_string(),
            });
        self
    }

    /// Make the next alias addition fail with `status`.
    pub fn fail_add_alias(self, status: u16, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .alias_failures
            .push_back(ScriptedFailure {
                status,
                body: body.to_string(),
            });
        self
    }

    /// Number of unit create requests that reached the server.
    pub fn unit_creates(&self) -> u32 {
        self.state.lock().unwrap().unit_creates
    }

    /// Number of food create requests that reached the server.
    pub fn food_creates(&self) -> u32 {
        self.state.lock().unwrap().food_creates
    }

    /// Number of ingredient update requests, including failed ones.
    pub fn update_calls(&self) -> u32 {
        self.state.lock().unwrap().update_calls
    }

    /// Patches successfully applied, in application order.
    pub fn applied_patches(&self) -> Vec<(String, String, IngredientPatch)> {
        self.state.lock().unwrap().applied_patches.clone()
    }

    fn next_id(state: &mut MockState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl RecipeApi for MockRecipeApi {
    async fn list_recipes(&self) -> Result<Vec<Recipe>, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.list_recipe_failures.pop_front() {
            return Err(failure.into_error("list recipes"));
        }
        Ok(state.recipes.clone())
    }

    async fn get_recipe(&self, slug: &str) -> Result<Recipe, ApiError> {
        self.state
            .lock()
            .unwrap()
            .recipes
            .iter()
            .find(|r| r.slug == slug)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                operation: "get recipe",
                status: 404,
                body: format!("recipe not found: {}", slug),
            })
    }

    async fn list_units(&self) -> Result<Vec<Unit>, ApiError> {
        Ok(self.state.lock().unwrap().units.clone())
    }

    async fn list_foods(&self) -> Result<Vec<Food>, ApiError> {
        Ok(self.state.lock().unwrap().foods.clone())
    }

    async fn create_unit(&self, unit: &NewUnit) -> Result<Unit, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.unit_creates += 1;
        if let Some(failure) = state.create_unit_failures.pop_front() {
            return Err(failure.into_error("create unit"));
        }
        let created = Unit {
            id: Self::next_id(&mut state, "unit"),
            name: unit.name.clone(),
            abbreviation: unit.abbreviation.clone(),
            description: unit.description.clone(),
            aliases: Vec::new(),
        };
        state.units.push(created.clone());
        Ok(created)
    }

    async fn create_food(&self, food: &NewFood) -> Result<Food, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.food_creates += 1;
        if let Some(failure) = state.create_food_failures.pop_front() {
            return Err(failure.into_error("create food"));
        }
        let created = Food {
            id: Self::next_id(&mut state, "food"),
            name: food.name.clone(),
            description: food.description.clone(),
            aliases: Vec::new(),
        };
        state.foods.push(created.clone());
        Ok(created)
    }

    async fn add_food_alias(&self, food_id: &str, alias: &str) -> Result<Food, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.alias_failures.pop_front() {
            return Err(failure.into_error("update food"));
        }
        let food = state
            .foods
            .iter_mut()
            .find(|f| f.id == food_id)
            .ok_or_else(|| ApiError::Status {
                operation: "get food",
                status: 404,
                body: format!("food not found: {}", food_id),
            })?;
        if !food.has_alias(alias) {
            food.aliases.push(EntityAlias::new(alias));
        }
        Ok(food.clone())
    }

    async fn update_ingredient(
        &self,
        recipe_id: &str,
        ingredient_id: &str,
        patch: &IngredientPatch,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;

        if let Some(queue) = state.update_failures.get_mut(ingredient_id) {
            if let Some(failure) = queue.pop_front() {
                return Err(failure.into_error("update ingredient"));
            }
        }

        let patch_clone = patch.clone();
        for recipe in state.recipes.iter_mut().filter(|r| r.id == recipe_id) {
            for ing in recipe
                .ingredients
                .iter_mut()
                .filter(|i| i.id.as_deref() == Some(ingredient_id))
            {
                if let Some(unit_id) = &patch_clone.unit_id {
                    ing.unit = Some(UnitRef {
                        id: Some(unit_id.clone()),
                        ..Default::default()
                    });
                }
                if let Some(food_id) = &patch_clone.food_id {
                    ing.food = Some(FoodRef {
                        id: Some(food_id.clone()),
                        ..Default::default()
                    });
                }
            }
        }

        state.applied_patches.push((
            recipe_id.to_string(),
            ingredient_id.to_string(),
            patch.clone(),
        ));
        Ok(())
    }

    async fn parse_note(&self, text: &str) -> Result<ParsedHint, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state.hints.get(text).cloned().unwrap_or(ParsedHint {
            input: text.to_string(),
            ..Default::default()
        }))
    }
}
