//! Batch execution: apply one operator decision to every ingredient in a
//! pattern group, tolerating partial failure.
//!
//! The pipeline is a sequence of result-returning steps: pre-flight
//! validation against cached catalogs, at most one catalog mutation, then a
//! bounded-concurrency fan-out of per-ingredient updates. One ingredient
//! failing never poisons the batch; a catalog-mutation failure aborts it
//! before any update is issued.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::analyzer::PatternId;
use crate::catalog::CatalogCache;
use crate::client::{NewFood, NewUnit, RecipeApi};
use crate::error::{ApiError, ErrorKind};
use crate::types::{Food, IngredientPatch, IngredientRef, Unit};
use crate::validation::{validate_alias, validate_new_food, validate_new_unit};

/// The operator's decision for one pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchAction {
    CreateUnit {
        name: String,
        abbreviation: Option<String>,
        description: Option<String>,
    },
    CreateFood {
        name: String,
        description: Option<String>,
    },
    AddFoodAlias {
        food_id: String,
        alias: String,
    },
}

impl BatchAction {
    pub fn op_name(&self) -> &'static str {
        match self {
            BatchAction::CreateUnit { .. } => "create_unit",
            BatchAction::CreateFood { .. } => "create_food",
            BatchAction::AddFoodAlias { .. } => "add_food_alias",
        }
    }
}

/// One confirmed decision plus the ingredients it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperation {
    pub pattern_id: PatternId,
    pub action: BatchAction,
    pub affected: Vec<IngredientRef>,
}

/// Terminal classification of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    AllOk,
    Partial,
    Aborted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::AllOk => "all_ok",
            BatchStatus::Partial => "partial",
            BatchStatus::Aborted => "aborted",
        }
    }
}

/// One ingredient update that failed permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub ingredient: IngredientRef,
    pub kind: ErrorKind,
    pub message: String,
}

/// Fresh catalog listing fetched after a mutation, for the orchestrator to
/// fold into its cache.
#[derive(Debug, Clone)]
pub enum CatalogRefresh {
    Units(Vec<Unit>),
    Foods(Vec<Food>),
}

/// Outcome of one batch operation.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub op: BatchOperation,
    /// Id of the unit/food the updates point at. For alias operations this is
    /// the existing target food.
    pub entity_id: Option<String>,
    /// True only when this batch actually created a new catalog entity
    /// (adopting an existing entity after a conflict does not count).
    pub entity_created: bool,
    pub succeeded: Vec<IngredientRef>,
    pub failed: Vec<BatchFailure>,
    pub duration: Duration,
    pub status: BatchStatus,
    /// Why the batch aborted, when it did.
    pub abort_reason: Option<String>,
    pub abort_kind: Option<ErrorKind>,
    /// Post-mutation catalog refresh, if it could be fetched.
    pub catalog_refresh: Option<CatalogRefresh>,
}

impl BatchResult {
    fn aborted(op: BatchOperation, kind: ErrorKind, reason: String, duration: Duration) -> Self {
        Self {
            op,
            entity_id: None,
            entity_created: false,
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration,
            status: BatchStatus::Aborted,
            abort_reason: Some(reason),
            abort_kind: Some(kind),
            catalog_refresh: None,
        }
    }

    /// The patch the fan-out applies, derivable as long as the catalog
    /// mutation succeeded.
    fn patch_target(&self) -> Option<PatchTarget> {
        let id = self.entity_id.clone()?;
        Some(match self.op.action {
            BatchAction::CreateUnit { .. } => PatchTarget::Unit(id),
            BatchAction::CreateFood { .. } | BatchAction::AddFoodAlias { .. } => {
                PatchTarget::Food(id)
            }
        })
    }
}

/// Which ingredient reference slot the batch fills in.
#[derive(Debug, Clone)]
enum PatchTarget {
    Unit(String),
    Food(String),
}

impl PatchTarget {
    fn patch(&self) -> IngredientPatch {
        match self {
            PatchTarget::Unit(id) => IngredientPatch::unit(id.clone()),
            PatchTarget::Food(id) => IngredientPatch::food(id.clone()),
        }
    }

    fn id(&self) -> &str {
        match self {
            PatchTarget::Unit(id) | PatchTarget::Food(id) => id,
        }
    }
}

/// Progress event published once per completed update plus start/finish
/// markers. The shell renders from these; it never observes executor
/// internals.
#[derive(Debug, Clone)]
pub enum BatchProgress {
    Started {
        total: usize,
    },
    Updated {
        completed: usize,
        total: usize,
        ingredient: IngredientRef,
        ok: bool,
    },
    Finished {
        status: BatchStatus,
    },
}

struct FanoutOutcome {
    succeeded: Vec<IngredientRef>,
    failed: Vec<BatchFailure>,
    attempted_all: bool,
}

/// Executes batch operations against the recipe server.
pub struct BatchExecutor {
    api: Arc<dyn RecipeApi>,
    width: usize,
    cancel: Arc<AtomicBool>,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl BatchExecutor {
    pub fn new(api: Arc<dyn RecipeApi>, width: usize) -> Self {
        Self {
            api,
            width: width.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Attach a progress channel.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Shared cancellation flag. Setting it stops the executor from
    /// submitting further updates; in-flight ones are drained.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one batch to completion.
    pub async fn execute(&self, op: BatchOperation, catalog: &CatalogCache) -> BatchResult {
        let started = Instant::now();
        self.cancel.store(false, Ordering::SeqCst);

        // Step 1: pre-flight against the cached catalogs. No remote writes
        // have happened yet, so an invalid operation costs nothing.
        let validation = match &op.action {
            BatchAction::CreateUnit {
                name, abbreviation, ..
            } => validate_new_unit(name, abbreviation.as_deref(), catalog),
            BatchAction::CreateFood { name, .. } => validate_new_food(name, catalog),
            BatchAction::AddFoodAlias { food_id, alias } => {
                validate_alias(food_id, alias, catalog)
            }
        };
        if !validation.is_valid() {
            let reason = validation.error_summary();
            tracing::warn!(pattern = %op.pattern_id, reason = %reason, "pre-flight validation failed");
            return BatchResult::aborted(op, ErrorKind::Validation, reason, started.elapsed());
        }

        // Step 2: at most one catalog mutation.
        let (target, entity_created) = match self.mutate_catalog(&op).await {
            Ok(outcome) => outcome,
            Err((kind, reason)) => {
                tracing::error!(pattern = %op.pattern_id, reason = %reason, "catalog mutation failed");
                return BatchResult::aborted(op, kind, reason, started.elapsed());
            }
        };

        // Step 3: fan out ingredient updates.
        if let Some(tx) = &self.progress {
            let _ = tx.send(BatchProgress::Started {
                total: op.affected.len(),
            });
        }
        let outcome = self.run_updates(&op.affected, &target).await;

        // Step 4: refresh the affected catalog so fresh entities and aliases
        // feed the next pattern's validation and suggestions. Non-fatal.
        let catalog_refresh = self.refresh_catalog(&op.action).await;

        let status = classify(&outcome);
        if let Some(tx) = &self.progress {
            let _ = tx.send(BatchProgress::Finished { status });
        }
        tracing::info!(
            pattern = %op.pattern_id,
            op = op.action.op_name(),
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            status = status.as_str(),
            "batch finished"
        );

        BatchResult {
            op,
            entity_id: Some(target.id().to_string()),
            entity_created,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            duration: started.elapsed(),
            status,
            abort_reason: None,
            abort_kind: None,
            catalog_refresh,
        }
    }

    /// Re-run only the failed ingredient set of a partial result against the
    /// entity that batch already produced. Never issues a second catalog
    /// create.
    pub async fn retry_failed(&self, prev: &BatchResult) -> BatchResult {
        let started = Instant::now();
        self.cancel.store(false, Ordering::SeqCst);

        let Some(target) = prev.patch_target() else {
            return BatchResult::aborted(
                prev.op.clone(),
                ErrorKind::Validation,
                "previous batch produced no entity to retry against".to_string(),
                started.elapsed(),
            );
        };

        let refs: Vec<IngredientRef> =
            prev.failed.iter().map(|f| f.ingredient.clone()).collect();
        if let Some(tx) = &self.progress {
            let _ = tx.send(BatchProgress::Started { total: refs.len() });
        }
        let outcome = self.run_updates(&refs, &target).await;

        let status = classify(&outcome);
        if let Some(tx) = &self.progress {
            let _ = tx.send(BatchProgress::Finished { status });
        }
        tracing::info!(
            pattern = %prev.op.pattern_id,
            retried = refs.len(),
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "retry finished"
        );

        BatchResult {
            op: prev.op.clone(),
            entity_id: prev.entity_id.clone(),
            entity_created: false,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            duration: started.elapsed(),
            status,
            abort_reason: None,
            abort_kind: None,
            catalog_refresh: None,
        }
    }

    /// Perform the operation's single catalog write, reconciling conflicts
    /// against a fresh listing where that is safe.
    async fn mutate_catalog(
        &self,
        op: &BatchOperation,
    ) -> Result<(PatchTarget, bool), (ErrorKind, String)> {
        match &op.action {
            BatchAction::CreateUnit {
                name,
                abbreviation,
                description,
            } => {
                let request = NewUnit {
                    name: name.clone(),
                    abbreviation: abbreviation.clone(),
                    description: description.clone(),
                };
                match self.api.create_unit(&request).await {
                    Ok(unit) => Ok((PatchTarget::Unit(unit.id), true)),
                    Err(e) if e.kind() == ErrorKind::Conflict => {
                        // Someone created it out from under us; a fresh
                        // listing tells us whether the existing entity is
                        // usable as our result.
                        let fresh = self.api.list_units().await.map_err(|le| {
                            (le.kind(), format!("conflict reconciliation failed: {}", le))
                        })?;
                        let existing = fresh.iter().find(|u| {
                            names_match(&u.name, name)
                                || u.abbreviation
                                    .as_deref()
                                    .zip(abbreviation.as_deref())
                                    .is_some_and(|(a, b)| names_match(a, b))
                        });
                        match existing {
                            Some(unit) => {
                                tracing::info!(name = %name, id = %unit.id, "adopted existing unit after conflict");
                                Ok((PatchTarget::Unit(unit.id.clone()), false))
                            }
                            None => Err((ErrorKind::Conflict, e.to_string())),
                        }
                    }
                    Err(e) => Err((e.kind(), e.to_string())),
                }
            }
            BatchAction::CreateFood { name, description } => {
                let request = NewFood {
                    name: name.clone(),
                    description: description.clone(),
                };
                match self.api.create_food(&request).await {
                    Ok(food) => Ok((PatchTarget::Food(food.id), true)),
                    Err(e) if e.kind() == ErrorKind::Conflict => {
                        let fresh = self.api.list_foods().await.map_err(|le| {
                            (le.kind(), format!("conflict reconciliation failed: {}", le))
                        })?;
                        match fresh.iter().find(|f| names_match(&f.name, name)) {
                            Some(food) => {
                                tracing::info!(name = %name, id = %food.id, "adopted existing food after conflict");
                                Ok((PatchTarget::Food(food.id.clone()), false))
                            }
                            None => Err((ErrorKind::Conflict, e.to_string())),
                        }
                    }
                    Err(e) => Err((e.kind(), e.to_string())),
                }
            }
            BatchAction::AddFoodAlias { food_id, alias } => {
                match self.api.add_food_alias(food_id, alias).await {
                    Ok(_) => Ok((PatchTarget::Food(food_id.clone()), false)),
                    Err(e) if e.kind() == ErrorKind::Conflict => {
                        // "Alias exists" is success when it is bound to the
                        // food we wanted anyway.
                        let fresh = self.api.list_foods().await.map_err(|le| {
                            (le.kind(), format!("conflict reconciliation failed: {}", le))
                        })?;
                        let bound = fresh
                            .iter()
                            .find(|f| f.id == *food_id)
                            .is_some_and(|f| f.has_alias(alias));
                        if bound {
                            tracing::info!(food_id = %food_id, alias = %alias, "alias already bound, treating as success");
                            Ok((PatchTarget::Food(food_id.clone()), false))
                        } else {
                            Err((ErrorKind::Conflict, e.to_string()))
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        // Cached food deleted out of band.
                        Err((
                            ErrorKind::NotFound,
                            format!("selected target no longer exists: {}", e),
                        ))
                    }
                    Err(e) => Err((e.kind(), e.to_string())),
                }
            }
        }
    }

    /// Issue ingredient updates with bounded concurrency.
    ///
    /// Updates touching the same recipe run sequentially inside one worker so
    /// a server that implements ingredient updates as whole-recipe
    /// replacement cannot lose writes; recipes fan out in parallel up to the
    /// configured width. Submission follows the pattern's ingredient order.
    async fn run_updates(&self, refs: &[IngredientRef], target: &PatchTarget) -> FanoutOutcome {
        let total = refs.len();
        let patch = target.patch();

        // Per-recipe buckets, ordered by each recipe's first occurrence.
        let mut buckets: Vec<(String, Vec<IngredientRef>)> = Vec::new();
        for r in refs {
            match buckets.iter_mut().find(|(id, _)| *id == r.recipe_id) {
                Some((_, bucket)) => bucket.push(r.clone()),
                None => buckets.push((r.recipe_id.clone(), vec![r.clone()])),
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.width));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (_, bucket) in buckets {
            let api = self.api.clone();
            let patch = patch.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            let completed = completed.clone();

            tasks.spawn(async move {
                let mut results: Vec<(IngredientRef, Result<(), ApiError>)> = Vec::new();
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return results,
                };
                for ingredient in bucket {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = api
                        .update_ingredient(
                            &ingredient.recipe_id,
                            &ingredient.ingredient_id,
                            &patch,
                        )
                        .await;
                    let ok = result.is_ok();
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(tx) = &progress {
                        let _ = tx.send(BatchProgress::Updated {
                            completed: done,
                            total,
                            ingredient: ingredient.clone(),
                            ok,
                        });
                    }
                    results.push((ingredient, result));
                }
                results
            });
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut attempted = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let results = match joined {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "fan-out worker panicked");
                    continue;
                }
            };
            for (ingredient, result) in results {
                attempted += 1;
                match result {
                    Ok(()) => succeeded.push(ingredient),
                    Err(e) => {
                        tracing::warn!(ingredient = %ingredient, error = %e, "ingredient update failed");
                        failed.push(BatchFailure {
                            ingredient,
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        FanoutOutcome {
            succeeded,
            failed,
            attempted_all: attempted == total,
        }
    }

    /// Re-list the catalog the operation touched. Failure is logged and
    /// non-fatal; the next batch will try again.
    async fn refresh_catalog(&self, action: &BatchAction) -> Option<CatalogRefresh> {
        let refreshed = match action {
            BatchAction::CreateUnit { .. } => {
                self.api.list_units().await.map(CatalogRefresh::Units)
            }
            BatchAction::CreateFood { .. } | BatchAction::AddFoodAlias { .. } => {
                self.api.list_foods().await.map(CatalogRefresh::Foods)
            }
        };
        match refreshed {
            Ok(refresh) => Some(refresh),
            Err(e) => {
                tracing::warn!(error = %e, "catalog refresh failed after batch");
                None
            }
        }
    }
}

fn names_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn classify(outcome: &FanoutOutcome) -> BatchStatus {
    if outcome.failed.is_empty() && outcome.attempted_all {
        BatchStatus::AllOk
    } else if !outcome.succeeded.is_empty() {
        BatchStatus::Partial
    } else {
        BatchStatus::Aborted
    }
}
