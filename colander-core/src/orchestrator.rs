//! End-to-end session driver.
//!
//! Owns the catalog caches, the pattern table, and the session state; the
//! batch executor only ever sees immutable snapshots and hands back results
//! for the orchestrator to fold in. Batches run one at a time, and the
//! session file is persisted after every state mutation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::analyzer::{self, PatternGroup, PatternId, PatternStatus, UnitLexicon};
use crate::batch::{
    BatchAction, BatchExecutor, BatchOperation, BatchProgress, BatchResult, BatchStatus,
    CatalogRefresh,
};
use crate::catalog::CatalogCache;
use crate::client::RecipeApi;
use crate::config::Config;
use crate::error::{ApiError, ErrorKind, SessionLoadError};
use crate::session::{OperationRecord, SessionState, SessionStats, SessionStore};
use crate::similarity::{build_similarity, SimilarityConfig};
use crate::types::{Food, ParsedHint, Recipe, Unit};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to persist session: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("unknown pattern: {0}")]
    UnknownPattern(PatternId),

    #[error("pattern {id} is {status}, expected {expected}")]
    InvalidPatternState {
        id: PatternId,
        status: &'static str,
        expected: &'static str,
    },

    #[error("no previous result with failures for pattern {0}")]
    NothingToRetry(PatternId),

    #[error("internal error: {0}")]
    Internal(String),
}

/// What the session store held at startup. The operator decides what happens
/// next in every non-fresh case.
pub enum SessionStartup {
    /// No session file; start fresh silently.
    Fresh,
    /// A valid previous session exists and can be resumed.
    Resumable(SessionState),
    /// The file exists but is unusable; offer "start fresh".
    Broken(SessionLoadError),
}

/// One affected-ingredient line for the preview screen.
#[derive(Debug, Clone)]
pub struct PreviewLine {
    pub recipe_name: String,
    pub ingredient_text: String,
}

fn fatal_or_api(e: ApiError) -> OrchestratorError {
    if e.is_fatal() {
        OrchestratorError::Auth(e.to_string())
    } else {
        OrchestratorError::Api(e)
    }
}

/// Drives one operator session from snapshot to clean exit.
pub struct Orchestrator {
    api: Arc<dyn RecipeApi>,
    config: Config,
    store: SessionStore,
    executor: BatchExecutor,
    save_lock: Mutex<()>,
    recipes: Vec<Recipe>,
    recipe_index: HashMap<String, usize>,
    catalog: CatalogCache,
    patterns: Vec<PatternGroup>,
    pattern_index: HashMap<PatternId, usize>,
    state: SessionState,
    last_results: HashMap<PatternId, BatchResult>,
}

impl Orchestrator {
    /// Fetch the snapshot, analyze it, and report what the session store
    /// holds. Auth failures halt before anything else happens.
    pub async fn start(
        api: Arc<dyn RecipeApi>,
        config: Config,
    ) -> Result<(Self, SessionStartup), OrchestratorError> {
        let (recipes, units, foods) =
            tokio::try_join!(api.list_recipes(), api.list_units(), api.list_foods())
                .map_err(fatal_or_api)?;
        tracing::info!(
            recipes = recipes.len(),
            units = units.len(),
            foods = foods.len(),
            "snapshot fetched"
        );

        let catalog = CatalogCache::new(units, foods);
        let lexicon = UnitLexicon::with_catalog_terms(catalog.unit_terms());
        let similarity = SimilarityConfig::with_threshold(config.similarity_threshold);

        // Analysis is pure CPU; keep it off the scheduler so the caller's
        // event loop stays responsive on large snapshots.
        let snapshot = recipes.clone();
        let patterns = tokio::task::spawn_blocking(move || {
            let mut patterns = analyzer::analyze(&snapshot, &lexicon);
            build_similarity(&mut patterns, &similarity);
            patterns
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("analysis task failed: {}", e)))?;
        tracing::info!(patterns = patterns.len(), "analysis complete");

        let store = SessionStore::new(&config.session_file);
        let startup = match store.load() {
            Ok(state) => SessionStartup::Resumable(state),
            Err(SessionLoadError::Missing) => SessionStartup::Fresh,
            Err(e) => {
                tracing::warn!(error = %e, "session file unusable");
                SessionStartup::Broken(e)
            }
        };

        let executor = BatchExecutor::new(api.clone(), config.batch_width);
        let recipe_index = recipes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let pattern_index = patterns
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.clone(), i))
            .collect();

        let orchestrator = Self {
            api,
            config,
            store,
            executor,
            save_lock: Mutex::new(()),
            recipes,
            recipe_index,
            catalog,
            patterns,
            pattern_index,
            state: SessionState::new(),
            last_results: HashMap::new(),
        };
        Ok((orchestrator, startup))
    }

    /// Adopt a previous session, reconciling it against the fresh analysis.
    pub async fn resume_previous(
        &mut self,
        previous: SessionState,
    ) -> Result<(), OrchestratorError> {
        self.state = previous;
        reconcile(&mut self.state, &mut self.patterns);
        self.persist().await?;
        tracing::info!("resumed session: {}", self.state.summary());
        Ok(())
    }

    /// Begin a brand-new session, optionally discarding an unusable file.
    pub async fn start_fresh(&mut self, discard_existing: bool) -> Result<(), OrchestratorError> {
        if discard_existing {
            self.store.discard()?;
        }
        self.state = SessionState::new();
        for group in &mut self.patterns {
            group.status = PatternStatus::Pending;
        }
        self.persist().await?;
        Ok(())
    }

    pub fn patterns(&self) -> &[PatternGroup] {
        &self.patterns
    }

    pub fn pattern(&self, id: &PatternId) -> Option<&PatternGroup> {
        self.pattern_index.get(id).map(|&i| &self.patterns[i])
    }

    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    pub fn stats(&self) -> &SessionStats {
        &self.state.stats
    }

    pub fn session(&self) -> &SessionState {
        &self.state
    }

    /// Last batch result recorded for a pattern this session.
    pub fn last_result(&self, id: &PatternId) -> Option<&BatchResult> {
        self.last_results.get(id)
    }

    /// Route executor progress events to the given channel.
    pub fn attach_progress(&mut self, tx: mpsc::UnboundedSender<BatchProgress>) {
        self.executor = BatchExecutor::new(self.api.clone(), self.config.batch_width)
            .with_progress(tx);
    }

    /// Shared flag that cancels the in-flight fan-out when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.executor.cancel_flag()
    }

    /// Recipe-name + ingredient-text lines for the confirmation preview.
    pub fn preview(&self, id: &PatternId) -> Vec<PreviewLine> {
        let Some(group) = self.pattern(id) else {
            return Vec::new();
        };
        group
            .ingredient_refs
            .iter()
            .map(|r| {
                let recipe = self.recipe_index.get(&r.recipe_id).map(|&i| &self.recipes[i]);
                let ingredient_text = recipe
                    .and_then(|rec| {
                        rec.ingredients
                            .iter()
                            .find(|i| i.id.as_deref() == Some(r.ingredient_id.as_str()))
                    })
                    .and_then(|i| i.text())
                    .unwrap_or("<missing>")
                    .to_string();
                PreviewLine {
                    recipe_name: recipe.map(|rec| rec.name.clone()).unwrap_or_else(|| r.recipe_id.clone()),
                    ingredient_text,
                }
            })
            .collect()
    }

    /// Ask the server's NLP parser for an advisory reading of a pattern's
    /// text. Purely informational; nothing downstream depends on it.
    pub async fn parse_hint(&self, id: &PatternId) -> Result<ParsedHint, OrchestratorError> {
        let group = self
            .pattern(id)
            .ok_or_else(|| OrchestratorError::UnknownPattern(id.clone()))?;
        self.api
            .parse_note(&group.display_text)
            .await
            .map_err(fatal_or_api)
    }

    /// Execute one operator decision against a pending pattern.
    pub async fn resolve(
        &mut self,
        id: &PatternId,
        action: BatchAction,
    ) -> Result<BatchResult, OrchestratorError> {
        let idx = self.pattern_idx(id)?;
        self.ensure_status(idx, PatternStatus::Pending)?;
        self.patterns[idx].status = PatternStatus::Processing;

        let op = BatchOperation {
            pattern_id: id.clone(),
            action,
            affected: self.patterns[idx].ingredient_refs.clone(),
        };
        let result = self.executor.execute(op, &self.catalog).await;

        self.fold_result(idx, &result);
        self.persist().await?;

        if result.abort_kind == Some(ErrorKind::Auth) {
            let reason = result
                .abort_reason
                .clone()
                .unwrap_or_else(|| "authentication failed".to_string());
            return Err(OrchestratorError::Auth(reason));
        }
        Ok(result)
    }

    /// Re-run the failed subset of a previous partial batch.
    pub async fn retry_failed(
        &mut self,
        id: &PatternId,
    ) -> Result<BatchResult, OrchestratorError> {
        let idx = self.pattern_idx(id)?;
        let previous = self
            .last_results
            .get(id)
            .filter(|r| !r.failed.is_empty() && r.entity_id.is_some())
            .cloned()
            .ok_or_else(|| OrchestratorError::NothingToRetry(id.clone()))?;

        self.ensure_status(idx, PatternStatus::Pending)?;
        self.patterns[idx].status = PatternStatus::Processing;

        let result = self.executor.retry_failed(&previous).await;
        self.fold_result(idx, &result);
        self.persist().await?;
        Ok(result)
    }

    /// Set a pending pattern aside.
    pub async fn skip(&mut self, id: &PatternId) -> Result<(), OrchestratorError> {
        let idx = self.pattern_idx(id)?;
        self.ensure_status(idx, PatternStatus::Pending)?;
        self.patterns[idx].status = PatternStatus::Skipped;
        self.state.mark_skipped(id);
        self.persist().await?;
        Ok(())
    }

    /// Bring a skipped pattern back into play.
    pub async fn unskip(&mut self, id: &PatternId) -> Result<(), OrchestratorError> {
        let idx = self.pattern_idx(id)?;
        self.ensure_status(idx, PatternStatus::Skipped)?;
        self.patterns[idx].status = PatternStatus::Pending;
        self.state.unskip(id);
        self.persist().await?;
        Ok(())
    }

    /// Final persistence on clean exit.
    pub async fn finish(&mut self) -> Result<(), OrchestratorError> {
        self.persist().await?;
        tracing::info!("session closed: {}", self.state.summary());
        Ok(())
    }

    fn pattern_idx(&self, id: &PatternId) -> Result<usize, OrchestratorError> {
        self.pattern_index
            .get(id)
            .copied()
            .ok_or_else(|| OrchestratorError::UnknownPattern(id.clone()))
    }

    fn ensure_status(
        &self,
        idx: usize,
        expected: PatternStatus,
    ) -> Result<(), OrchestratorError> {
        let group = &self.patterns[idx];
        if group.status != expected {
            return Err(OrchestratorError::InvalidPatternState {
                id: group.id.clone(),
                status: group.status.as_str(),
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    /// Fold one batch result into the pattern table, the session state, and
    /// the catalog caches.
    fn fold_result(&mut self, idx: usize, result: &BatchResult) {
        let group = &mut self.patterns[idx];
        match result.status {
            BatchStatus::AllOk => {
                group.status = PatternStatus::Completed;
                self.state.mark_completed(&group.id);
                let recipe_ids: Vec<&str> =
                    group.recipe_ids.iter().map(|s| s.as_str()).collect();
                self.state.record_processed_recipes(recipe_ids);
            }
            BatchStatus::Partial | BatchStatus::Aborted => {
                group.status = PatternStatus::Pending;
            }
        }

        self.state.stats.ingredients_updated += result.succeeded.len() as u64;

        if result.entity_created {
            if let Some(entity_id) = &result.entity_id {
                match &result.op.action {
                    BatchAction::CreateUnit { .. } => {
                        if !self.state.created_unit_ids.iter().any(|u| u == entity_id) {
                            self.state.created_unit_ids.push(entity_id.clone());
                            self.state.stats.units_created += 1;
                        }
                    }
                    BatchAction::CreateFood { .. } => {
                        if !self.state.created_food_ids.iter().any(|f| f == entity_id) {
                            self.state.created_food_ids.push(entity_id.clone());
                            self.state.stats.foods_created += 1;
                        }
                    }
                    BatchAction::AddFoodAlias { .. } => {}
                }
            }
        }
        if let BatchAction::AddFoodAlias { food_id, alias } = &result.op.action {
            if result.entity_id.is_some() {
                let addition = crate::session::AliasAddition {
                    food_id: food_id.clone(),
                    alias: alias.clone(),
                };
                if !self.state.alias_additions.contains(&addition) {
                    self.state.alias_additions.push(addition);
                    self.state.stats.aliases_added += 1;
                }
            }
        }

        self.state.push_operation(OperationRecord {
            ts: chrono::Utc::now(),
            op: result.op.action.op_name().to_string(),
            pattern_id: result.op.pattern_id.to_string(),
            count: result.succeeded.len(),
            status: result.status.as_str().to_string(),
        });

        self.apply_catalog_refresh(result);
        self.last_results
            .insert(result.op.pattern_id.clone(), result.clone());
    }

    /// Fold the executor's post-batch catalog listing into the caches, or
    /// synthesize the created entity if the refresh failed.
    fn apply_catalog_refresh(&mut self, result: &BatchResult) {
        match &result.catalog_refresh {
            Some(CatalogRefresh::Units(units)) => self.catalog.replace_units(units.clone()),
            Some(CatalogRefresh::Foods(foods)) => self.catalog.replace_foods(foods.clone()),
            None => {
                let Some(entity_id) = &result.entity_id else {
                    return;
                };
                if !result.entity_created {
                    return;
                }
                match &result.op.action {
                    BatchAction::CreateUnit {
                        name,
                        abbreviation,
                        description,
                    } => self.catalog.push_unit(Unit {
                        id: entity_id.clone(),
                        name: name.clone(),
                        abbreviation: abbreviation.clone(),
                        description: description.clone(),
                        aliases: Vec::new(),
                    }),
                    BatchAction::CreateFood { name, description } => {
                        self.catalog.push_food(Food {
                            id: entity_id.clone(),
                            name: name.clone(),
                            description: description.clone(),
                            aliases: vec![],
                        })
                    }
                    BatchAction::AddFoodAlias { .. } => {}
                }
            }
        }
    }

    /// Serialize and write the session file. Saves are totally ordered: the
    /// lock guarantees no two serializations interleave even if callers race.
    async fn persist(&mut self) -> Result<(), OrchestratorError> {
        let _guard = self.save_lock.lock().await;
        self.state.stats.patterns_completed = self.state.completed_pattern_ids.len() as u64;
        self.state.stats.patterns_skipped = self.state.skipped_pattern_ids.len() as u64;
        self.store.save(&self.state)?;
        Ok(())
    }
}

/// Align a resumed session with a fresh analysis: ids that no longer exist
/// are dropped, ids new to this analysis start pending, and surviving
/// completed/skipped marks are applied to the pattern table.
pub fn reconcile(state: &mut SessionState, patterns: &mut [PatternGroup]) {
    let known: HashSet<&str> = patterns.iter().map(|g| g.id.as_str()).collect();
    state
        .completed_pattern_ids
        .retain(|id| known.contains(id.as_str()));
    state
        .skipped_pattern_ids
        .retain(|id| known.contains(id.as_str()));

    for group in patterns.iter_mut() {
        group.status = if state.is_completed(&group.id) {
            PatternStatus::Completed
        } else if state.is_skipped(&group.id) {
            PatternStatus::Skipped
        } else {
            PatternStatus::Pending
        };
    }
}
