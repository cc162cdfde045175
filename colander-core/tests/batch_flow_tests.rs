//! End-to-end batch execution against the mock recipe server: happy path,
//! partial failure with retry, pre-flight aborts, and conflict reconciliation.

use std::sync::Arc;

use colander_core::analyzer::{analyze, PatternId, PatternKind, UnitLexicon};
use colander_core::batch::{BatchAction, BatchExecutor, BatchOperation, BatchStatus};
use colander_core::catalog::CatalogCache;
use colander_core::client::MockRecipeApi;
use colander_core::error::ErrorKind;
use colander_core::types::{EntityAlias, Food, Ingredient, IngredientRef, Recipe, Unit};

fn recipe(id: &str, ingredients: Vec<Ingredient>) -> Recipe {
    Recipe {
        id: id.to_string(),
        slug: id.to_string(),
        name: format!("Recipe {}", id),
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

/// Three recipes sharing a "tsp" unit pattern.
fn tsp_snapshot() -> Vec<Recipe> {
    vec![
        recipe("r1", vec![unparsed("i1", "2 tsp salt")]),
        recipe("r2", vec![unparsed("i2", "1 TSP sugar")]),
        recipe("r3", vec![unparsed("i3", "2 tsp vanilla")]),
    ]
}

fn tsp_operation(recipes: &[Recipe]) -> BatchOperation {
    let groups = analyze(recipes, &UnitLexicon::builtin());
    let tsp = groups
        .iter()
        .find(|g| g.kind == PatternKind::Unit && g.canonical_text == "tsp")
        .expect("tsp pattern not found");
    assert_eq!(tsp.ingredient_refs.len(), 3);
    assert_eq!(tsp.recipe_ids.len(), 3);

    BatchOperation {
        pattern_id: tsp.id.clone(),
        action: BatchAction::CreateUnit {
            name: "teaspoon".to_string(),
            abbreviation: Some("tsp".to_string()),
            description: None,
        },
        affected: tsp.ingredient_refs.clone(),
    }
}

fn existing_unit(id: &str, name: &str, abbreviation: Option<&str>) -> Unit {
    Unit {
        id: id.to_string(),
        name: name.to_string(),
        abbreviation: abbreviation.map(|s| s.to_string()),
        description: None,
        aliases: Vec::new(),
    }
}

#[tokio::test]
async fn happy_path_unit_batch() {
    let recipes = tsp_snapshot();
    let op = tsp_operation(&recipes);
    let api = Arc::new(MockRecipeApi::new().with_recipes(recipes));
    let executor = BatchExecutor::new(api.clone(), 10);

    let result = executor.execute(op, &CatalogCache::default()).await;

    assert_eq!(result.status, BatchStatus::AllOk);
    assert!(result.entity_created);
    assert_eq!(result.succeeded.len(), 3);
    assert!(result.failed.is_empty());
    assert_eq!(api.unit_creates(), 1);
    assert_eq!(api.update_calls(), 3);

    // Every ingredient got the created unit's id.
    let entity_id = result.entity_id.expect("entity id");
    for (_, _, patch) in api.applied_patches() {
        assert_eq!(patch.unit_id.as_deref(), Some(entity_id.as_str()));
        assert!(patch.food_id.is_none());
    }
}

#[tokio::test]
async fn partial_failure_then_retry_creates_no_second_entity() {
    let recipes = tsp_snapshot();
    let op = tsp_operation(&recipes);
    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes)
            .fail_update("i2", 1, 500, "internal error"),
    );
    let executor = BatchExecutor::new(api.clone(), 10);

    let first = executor.execute(op, &CatalogCache::default()).await;
    assert_eq!(first.status, BatchStatus::Partial);
    assert_eq!(first.succeeded.len(), 2);
    assert_eq!(first.failed.len(), 1);
    assert_eq!(first.failed[0].ingredient.ingredient_id, "i2");
    assert_eq!(first.failed[0].kind, ErrorKind::Transient);
    assert_eq!(api.unit_creates(), 1);

    // The remote recovered; only the failed subset is retried.
    let calls_before_retry = api.update_calls();
    let second = executor.retry_failed(&first).await;

    assert_eq!(second.status, BatchStatus::AllOk);
    assert_eq!(second.succeeded.len(), 1);
    assert!(second.failed.is_empty());
    assert!(!second.entity_created);
    assert_eq!(second.entity_id, first.entity_id);
    assert_eq!(api.unit_creates(), 1, "retry must not create a second unit");
    assert_eq!(api.update_calls(), calls_before_retry + 1);
}

#[tokio::test]
async fn preflight_duplicate_aborts_without_remote_calls() {
    let recipes = tsp_snapshot();
    let op = tsp_operation(&recipes);
    let api = Arc::new(MockRecipeApi::new().with_recipes(recipes));
    let executor = BatchExecutor::new(api.clone(), 10);

    let catalog = CatalogCache::new(
        vec![existing_unit("u1", "Teaspoon", Some("tsp"))],
        Vec::new(),
    );
    let result = executor.execute(op, &catalog).await;

    assert_eq!(result.status, BatchStatus::Aborted);
    assert_eq!(result.abort_kind, Some(ErrorKind::Validation));
    assert!(result.abort_reason.is_some());
    assert_eq!(api.unit_creates(), 0);
    assert_eq!(api.update_calls(), 0);
}

#[tokio::test]
async fn catalog_mutation_failure_issues_no_updates() {
    let recipes = tsp_snapshot();
    let op = tsp_operation(&recipes);
    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes)
            .fail_create_unit(500, "server exploded"),
    );
    let executor = BatchExecutor::new(api.clone(), 10);

    let result = executor.execute(op, &CatalogCache::default()).await;

    assert_eq!(result.status, BatchStatus::Aborted);
    assert_eq!(result.abort_kind, Some(ErrorKind::Transient));
    assert_eq!(api.update_calls(), 0, "aborted batch must not touch ingredients");
}

#[tokio::test]
async fn create_conflict_adopts_the_existing_entity() {
    let recipes = tsp_snapshot();
    let op = tsp_operation(&recipes);
    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes)
            .with_units(vec![existing_unit("u-existing", "teaspoon", Some("tsp"))])
            .fail_create_unit(409, "duplicate unit"),
    );
    let executor = BatchExecutor::new(api.clone(), 10);

    // Cache is stale (empty), so pre-flight passes; the server conflicts.
    let result = executor.execute(op, &CatalogCache::default()).await;

    assert_eq!(result.status, BatchStatus::AllOk);
    assert!(!result.entity_created, "adopted entity is not a creation");
    assert_eq!(result.entity_id.as_deref(), Some("u-existing"));
    assert_eq!(result.succeeded.len(), 3);
}

#[tokio::test]
async fn alias_conflict_is_idempotent_success() {
    let food = Food {
        id: "f1".to_string(),
        name: "Olive Oil".to_string(),
        description: None,
        aliases: vec![EntityAlias::new("EVOO")],
    };
    let recipes = vec![recipe("r1", vec![unparsed("i1", "splash of EVOO")])];
    let refs = vec![IngredientRef::new("r1", "i1")];

    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes)
            .with_foods(vec![food.clone()])
            .fail_add_alias(409, "alias already exists"),
    );
    let executor = BatchExecutor::new(api.clone(), 10);

    // Cache predates the alias, so pre-flight allows the operation; the
    // server 409s, and the refreshed catalog shows the alias already bound.
    let catalog = CatalogCache::new(
        Vec::new(),
        vec![Food {
            aliases: Vec::new(),
            ..food
        }],
    );
    let op = BatchOperation {
        pattern_id: PatternId::derive(PatternKind::Food, "evoo"),
        action: BatchAction::AddFoodAlias {
            food_id: "f1".to_string(),
            alias: "EVOO".to_string(),
        },
        affected: refs,
    };
    let result = executor.execute(op, &catalog).await;

    assert_eq!(result.status, BatchStatus::AllOk);
    assert_eq!(result.entity_id.as_deref(), Some("f1"));
    assert_eq!(result.succeeded.len(), 1);
    let patches = api.applied_patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].2.food_id.as_deref(), Some("f1"));
}

#[tokio::test]
async fn batch_accounting_adds_up() {
    // 5 ingredients, 2 permanent failures: succeeded + failed == total.
    let recipes = vec![
        recipe(
            "r1",
            vec![
                unparsed("i1", "2 tsp salt"),
                unparsed("i2", "1 tsp sugar"),
                unparsed("i3", "3 tsp flour"),
            ],
        ),
        recipe("r2", vec![unparsed("i4", "1 tsp oil"), unparsed("i5", "2 tsp water")]),
    ];
    let groups = analyze(&recipes, &UnitLexicon::builtin());
    let tsp = groups
        .iter()
        .find(|g| g.kind == PatternKind::Unit && g.canonical_text == "tsp")
        .unwrap();
    assert_eq!(tsp.ingredient_refs.len(), 5);

    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes.clone())
            .fail_update("i2", 1, 404, "ingredient deleted")
            .fail_update("i4", 1, 422, "validation failed"),
    );
    let executor = BatchExecutor::new(api.clone(), 4);

    let op = BatchOperation {
        pattern_id: tsp.id.clone(),
        action: BatchAction::CreateUnit {
            name: "teaspoon".to_string(),
            abbreviation: None,
            description: None,
        },
        affected: tsp.ingredient_refs.clone(),
    };
    let result = executor.execute(op, &CatalogCache::default()).await;

    assert_eq!(result.status, BatchStatus::Partial);
    assert_eq!(result.succeeded.len() + result.failed.len(), 5);
    assert_eq!(result.failed.len(), 2);

    let kinds: Vec<ErrorKind> = result.failed.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&ErrorKind::NotFound));
    assert!(kinds.contains(&ErrorKind::Validation));
}

#[tokio::test]
async fn same_recipe_updates_run_in_submission_order() {
    let recipes = vec![recipe(
        "r1",
        vec![
            unparsed("i1", "1 tsp salt"),
            unparsed("i2", "2 tsp sugar"),
            unparsed("i3", "3 tsp flour"),
        ],
    )];
    let groups = analyze(&recipes, &UnitLexicon::builtin());
    let tsp = groups.iter().find(|g| g.kind == PatternKind::Unit).unwrap();

    let api = Arc::new(MockRecipeApi::new().with_recipes(recipes.clone()));
    let executor = BatchExecutor::new(api.clone(), 10);

    let op = BatchOperation {
        pattern_id: tsp.id.clone(),
        action: BatchAction::CreateUnit {
            name: "teaspoon".to_string(),
            abbreviation: None,
            description: None,
        },
        affected: tsp.ingredient_refs.clone(),
    };
    executor.execute(op, &CatalogCache::default()).await;

    // One recipe means one worker: updates land strictly in pattern order.
    let order: Vec<String> = api
        .applied_patches()
        .into_iter()
        .map(|(_, ingredient_id, _)| ingredient_id)
        .collect();
    assert_eq!(order, vec!["i1", "i2", "i3"]);
}

#[tokio::test]
async fn fully_failed_batch_is_not_partial() {
    let recipes = vec![recipe("r1", vec![unparsed("i1", "1 tsp salt")])];
    let groups = analyze(&recipes, &UnitLexicon::builtin());
    let tsp = groups.iter().find(|g| g.kind == PatternKind::Unit).unwrap();

    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(recipes.clone())
            .fail_update("i1", 1, 500, "down"),
    );
    let executor = BatchExecutor::new(api.clone(), 2);

    let op = BatchOperation {
        pattern_id: tsp.id.clone(),
        action: BatchAction::CreateUnit {
            name: "teaspoon".to_string(),
            abbreviation: None,
            description: None,
        },
        affected: tsp.ingredient_refs.clone(),
    };
    let result = executor.execute(op, &CatalogCache::default()).await;

    assert_eq!(result.status, BatchStatus::Aborted);
    assert_eq!(result.failed.len(), 1);
    assert!(result.succeeded.is_empty());
}
