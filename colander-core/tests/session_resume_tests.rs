//! Session persistence across orchestrator runs: resume, reconciliation,
//! corruption recovery, and crash-safe saves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colander_core::analyzer::{PatternId, PatternKind, PatternStatus};
use colander_core::batch::BatchAction;
use colander_core::client::MockRecipeApi;
use colander_core::config::Config;
use colander_core::orchestrator::{Orchestrator, OrchestratorError, SessionStartup};
use colander_core::session::{SessionState, SessionStore};
use colander_core::types::{Ingredient, Recipe};

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

fn tsp_snapshot() -> Vec<Recipe> {
    vec![
        recipe("r1", vec![unparsed("i1", "2 tsp salt")]),
        recipe("r2", vec![unparsed("i2", "1 TSP sugar")]),
        recipe("r3", vec![unparsed("i3", "2 tsp vanilla")]),
    ]
}

fn config(session_file: PathBuf) -> Config {
    Config {
        server_url: "http://localhost:9000/api".to_string(),
        api_token: "test-token".to_string(),
        batch_width: 4,
        similarity_threshold: 0.85,
        session_file,
        request_timeout: Duration::from_secs(10),
        max_retries: 3,
    }
}

fn tsp_id() -> PatternId {
    PatternId::derive(PatternKind::Unit, "tsp")
}

async fn run_first_session(session_file: PathBuf) {
    let api = Arc::new(MockRecipeApi::new().with_recipes(tsp_snapshot()));
    let (mut orchestrator, startup) = Orchestrator::start(api, config(session_file))
        .await
        .expect("startup failed");
    assert!(matches!(startup, SessionStartup::Fresh));
    orchestrator.start_fresh(false).await.unwrap();

    let result = orchestrator
        .resolve(
            &tsp_id(),
            BatchAction::CreateUnit {
                name: "teaspoon".to_string(),
                abbreviation: Some("tsp".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded.len(), 3);
    assert_eq!(orchestrator.stats().units_created, 1);
    assert_eq!(orchestrator.stats().ingredients_updated, 3);
    assert_eq!(
        orchestrator.pattern(&tsp_id()).unwrap().status,
        PatternStatus::Completed
    );
    orchestrator.finish().await.unwrap();
}

#[tokio::test]
async fn completed_work_survives_restart_and_stale_ids_drop() {
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session.json");

    run_first_session(session_file.clone()).await;

    // Simulate work recorded for a pattern the server no longer has.
    let store = SessionStore::new(&session_file);
    let mut state = store.load().unwrap();
    state.mark_completed(&PatternId::derive(PatternKind::Unit, "cup"));
    store.save(&state).unwrap();

    // Next session: the server still shows the tsp ingredients unparsed and
    // grew a new tbsp recipe.
    let mut recipes = tsp_snapshot();
    recipes.push(recipe("r4", vec![unparsed("i4", "1 tbsp butter")]));
    let api = Arc::new(MockRecipeApi::new().with_recipes(recipes));

    let (mut orchestrator, startup) = Orchestrator::start(api, config(session_file))
        .await
        .unwrap();
    let SessionStartup::Resumable(previous) = startup else {
        panic!("expected a resumable session");
    };
    assert_eq!(previous.stats.units_created, 1);
    orchestrator.resume_previous(previous).await.unwrap();

    // tsp stays completed and is not re-offered; tbsp is fresh work.
    assert_eq!(
        orchestrator.pattern(&tsp_id()).unwrap().status,
        PatternStatus::Completed
    );
    let tbsp = PatternId::derive(PatternKind::Unit, "tbsp");
    assert_eq!(
        orchestrator.pattern(&tbsp).unwrap().status,
        PatternStatus::Pending
    );

    // The vanished "cup" id was silently dropped during reconciliation.
    let cup = PatternId::derive(PatternKind::Unit, "cup");
    assert!(!orchestrator.session().is_completed(&cup));
    orchestrator.session().validate().unwrap();
}

#[tokio::test]
async fn resolving_a_completed_pattern_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session.json");
    run_first_session(session_file.clone()).await;

    let api = Arc::new(MockRecipeApi::new().with_recipes(tsp_snapshot()));
    let (mut orchestrator, startup) = Orchestrator::start(api, config(session_file))
        .await
        .unwrap();
    let SessionStartup::Resumable(previous) = startup else {
        panic!("expected a resumable session");
    };
    orchestrator.resume_previous(previous).await.unwrap();

    let err = orchestrator
        .resolve(
            &tsp_id(),
            BatchAction::CreateUnit {
                name: "teaspoon".to_string(),
                abbreviation: None,
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidPatternState { .. }
    ));
}

#[tokio::test]
async fn skip_and_unskip_persist_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session.json");

    {
        let api = Arc::new(MockRecipeApi::new().with_recipes(tsp_snapshot()));
        let (mut orchestrator, _) = Orchestrator::start(api, config(session_file.clone()))
            .await
            .unwrap();
        orchestrator.start_fresh(false).await.unwrap();
        orchestrator.skip(&tsp_id()).await.unwrap();
    }

    let api = Arc::new(MockRecipeApi::new().with_recipes(tsp_snapshot()));
    let (mut orchestrator, startup) = Orchestrator::start(api, config(session_file))
        .await
        .unwrap();
    let SessionStartup::Resumable(previous) = startup else {
        panic!("expected a resumable session");
    };
    orchestrator.resume_previous(previous).await.unwrap();
    assert_eq!(
        orchestrator.pattern(&tsp_id()).unwrap().status,
        PatternStatus::Skipped
    );

    orchestrator.unskip(&tsp_id()).await.unwrap();
    assert_eq!(
        orchestrator.pattern(&tsp_id()).unwrap().status,
        PatternStatus::Pending
    );
    assert!(!orchestrator.session().is_skipped(&tsp_id()));
}

#[tokio::test]
async fn corrupted_session_offers_fresh_start_and_leaks_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session.json");
    std::fs::write(&session_file, b"{ definitely not json").unwrap();

    let api = Arc::new(MockRecipeApi::new().with_recipes(tsp_snapshot()));
    let (mut orchestrator, startup) = Orchestrator::start(api, config(session_file.clone()))
        .await
        .unwrap();
    assert!(matches!(startup, SessionStartup::Broken(_)));

    orchestrator.start_fresh(true).await.unwrap();
    assert!(orchestrator.session().completed_pattern_ids.is_empty());
    assert_eq!(orchestrator.stats().units_created, 0);

    // The replacement file is valid and fresh.
    let reloaded = SessionStore::new(&session_file).load().unwrap();
    assert!(reloaded.completed_pattern_ids.is_empty());
}

#[tokio::test]
async fn auth_failure_halts_startup() {
    let api = Arc::new(
        MockRecipeApi::new()
            .with_recipes(tsp_snapshot())
            .fail_list_recipes(401, "invalid token"),
    );
    let dir = tempfile::tempdir().unwrap();
    let result = Orchestrator::start(api, config(dir.path().join("session.json"))).await;
    assert!(matches!(result, Err(OrchestratorError::Auth(_))));
}

#[test]
fn a_stray_temp_file_never_shadows_the_committed_state() {
    // A crash between writing the temp file and the rename leaves garbage
    // beside the real file; load must still see the committed state.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let store = SessionStore::new(&path);

    let mut state = SessionState::new();
    state.mark_completed(&tsp_id());
    store.save(&state).unwrap();

    std::fs::write(dir.path().join("session.tmp"), b"partial garbage").unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.completed_pattern_ids, state.completed_pattern_ids);
}
