//! The `run` subcommand: a line-oriented operator loop over the pattern
//! table. No screen stack, just prompts and tables.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colander_core::{
    BatchAction, BatchProgress, BatchResult, BatchStatus, Config, HttpRecipeClient, Orchestrator,
    OrchestratorError, PatternId, SessionStartup,
};
use tokio::sync::mpsc;

use crate::analyze::{print_table, truncate};
use crate::session::print_stats;

pub async fn run(config: Config) -> Result<()> {
    println!("Connecting to {} ...", config.server_url);
    let client = HttpRecipeClient::from_config(&config).context("failed to build HTTP client")?;
    let (mut orchestrator, startup) = Orchestrator::start(Arc::new(client), config).await?;

    match startup {
        SessionStartup::Fresh => orchestrator.start_fresh(false).await?,
        SessionStartup::Resumable(state) => {
            println!("Found previous session: {}", state.summary());
            if confirm("Resume it?", true)? {
                orchestrator.resume_previous(state).await?;
            } else {
                orchestrator.start_fresh(true).await?;
            }
        }
        SessionStartup::Broken(error) => {
            println!("Saved session is unusable: {}", error);
            if confirm("Start fresh (discards the file)?", true)? {
                orchestrator.start_fresh(true).await?;
            } else {
                bail!("cannot continue with an unusable session file");
            }
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    orchestrator.attach_progress(tx);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let BatchProgress::Updated {
                completed, total, ..
            } = event
            {
                print!("\r  updating ingredients {}/{}", completed, total);
                let _ = io::stdout().flush();
                if completed == total {
                    println!();
                }
            }
        }
    });

    print_help();
    print_table(orchestrator.patterns());

    loop {
        let line = prompt("> ")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let outcome = match command {
            "list" | "ls" => {
                print_table(orchestrator.patterns());
                Ok(())
            }
            "show" => show_pattern(&orchestrator, &args).await,
            "unit" => resolve_unit(&mut orchestrator, &args).await,
            "food" => resolve_food(&mut orchestrator, &args).await,
            "alias" => resolve_alias(&mut orchestrator, &args).await,
            "retry" => retry(&mut orchestrator, &args).await,
            "skip" => skip(&mut orchestrator, &args).await,
            "unskip" => unskip(&mut orchestrator, &args).await,
            "stats" => {
                print_stats(orchestrator.stats());
                Ok(())
            }
            "help" | "?" => {
                print_help();
                Ok(())
            }
            "quit" | "q" | "exit" => break,
            other => {
                println!("Unknown command: {} (try `help`)", other);
                Ok(())
            }
        };

        if let Err(error) = outcome {
            if matches!(error, OrchestratorError::Auth(_)) {
                eprintln!("Fatal: {}", error);
                bail!("session halted on authentication failure");
            }
            println!("Error: {}", error);
        }
    }

    orchestrator.finish().await?;
    println!("Session saved.");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  list                       show the pattern table");
    println!("  show <n>                   details and affected ingredients");
    println!("  unit <n> <name> [abbrev]   create a unit and apply to the group");
    println!("  food <n> <name...>         create a food and apply to the group");
    println!("  alias <n> <food or id>     alias an existing food and apply");
    println!("  retry <n>                  retry the failed subset of the last batch");
    println!("  skip <n> / unskip <n>      set a pattern aside / bring it back");
    println!("  stats                      session statistics");
    println!("  quit                       save and exit");
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read input")?;
    Ok(line)
}

fn confirm(message: &str, default_yes: bool) -> Result<bool> {
    let suffix = if default_yes { "[Y/n]" } else { "[y/N]" };
    let answer = prompt(&format!("{} {} ", message, suffix))?;
    let answer = answer.trim().to_lowercase();
    Ok(match answer.as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    })
}

fn pattern_at(
    orchestrator: &Orchestrator,
    args: &[&str],
) -> Result<PatternId, OrchestratorError> {
    let index: usize = args
        .first()
        .and_then(|a| a.parse().ok())
        .filter(|&n| n >= 1 && n <= orchestrator.patterns().len())
        .ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "expected a pattern number between 1 and {}",
                orchestrator.patterns().len()
            ))
        })?;
    Ok(orchestrator.patterns()[index - 1].id.clone())
}

async fn show_pattern(
    orchestrator: &Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    let Some(group) = orchestrator.pattern(&id) else {
        return Ok(());
    };

    println!("Pattern:  {} ({})", group.display_text, group.kind.as_str());
    println!("Status:   {}", group.status.as_str());
    println!(
        "Scope:    {} ingredient(s) across {} recipe(s)",
        group.ingredient_refs.len(),
        group.recipe_ids.len()
    );
    if !group.similar_group_ids.is_empty() {
        let names: Vec<String> = group
            .similar_group_ids
            .iter()
            .filter_map(|s| orchestrator.pattern(s))
            .map(|g| g.display_text.clone())
            .collect();
        println!("Similar:  {}", names.join(", "));
    }
    // Advisory only; a parser outage should not break `show`.
    if let Ok(hint) = orchestrator.parse_hint(&id).await {
        if hint.unit_name.is_some() || hint.food_name.is_some() {
            println!(
                "Parser:   unit={} food={}",
                hint.unit_name.as_deref().unwrap_or("-"),
                hint.food_name.as_deref().unwrap_or("-"),
            );
        }
    }
    print_preview(orchestrator, &id);
    if let Some(result) = orchestrator.last_result(&id) {
        if !result.failed.is_empty() {
            println!("Last batch left {} failed ingredient(s):", result.failed.len());
            for failure in &result.failed {
                println!("  {}  {}", failure.ingredient, truncate(&failure.message, 60));
            }
        }
    }
    Ok(())
}

fn print_preview(orchestrator: &Orchestrator, id: &PatternId) {
    let lines = orchestrator.preview(id);
    println!("Affected ingredients:");
    for line in lines.iter().take(10) {
        println!("  {:<30}  {}", truncate(&line.recipe_name, 30), line.ingredient_text);
    }
    if lines.len() > 10 {
        println!("  ... and {} more", lines.len() - 10);
    }
}

async fn apply(
    orchestrator: &mut Orchestrator,
    id: PatternId,
    action: BatchAction,
) -> Result<(), OrchestratorError> {
    print_preview(orchestrator, &id);
    let count = orchestrator
        .pattern(&id)
        .map(|g| g.ingredient_refs.len())
        .unwrap_or(0);
    match confirm(&format!("Apply to {} ingredient(s)?", count), false) {
        Ok(true) => {}
        _ => {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let result = orchestrator.resolve(&id, action).await?;
    print_result(&result);
    Ok(())
}

async fn resolve_unit(
    orchestrator: &mut Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    let Some(name) = args.get(1) else {
        return Err(OrchestratorError::Internal(
            "usage: unit <n> <name> [abbreviation]".to_string(),
        ));
    };
    let action = BatchAction::CreateUnit {
        name: name.to_string(),
        abbreviation: args.get(2).map(|a| a.to_string()),
        description: None,
    };
    apply(orchestrator, id, action).await
}

async fn resolve_food(
    orchestrator: &mut Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    if args.len() < 2 {
        return Err(OrchestratorError::Internal(
            "usage: food <n> <name...>".to_string(),
        ));
    }
    let action = BatchAction::CreateFood {
        name: args[1..].join(" "),
        description: None,
    };
    apply(orchestrator, id, action).await
}

async fn resolve_alias(
    orchestrator: &mut Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    if args.len() < 2 {
        return Err(OrchestratorError::Internal(
            "usage: alias <n> <existing food name or id>".to_string(),
        ));
    }
    let target = args[1..].join(" ");

    // Accept either a food name/alias or a raw id.
    let food_id = orchestrator
        .catalog()
        .find_food_term(&target)
        .map(|f| f.id.clone())
        .or_else(|| {
            orchestrator
                .catalog()
                .food_by_id(&target)
                .map(|f| f.id.clone())
        })
        .ok_or_else(|| {
            OrchestratorError::Internal(format!("no cached food matches '{}'", target))
        })?;

    let alias = orchestrator
        .pattern(&id)
        .map(|g| g.display_text.clone())
        .unwrap_or_else(|| target.clone());
    let action = BatchAction::AddFoodAlias { food_id, alias };
    apply(orchestrator, id, action).await
}

async fn retry(
    orchestrator: &mut Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    let result = orchestrator.retry_failed(&id).await?;
    print_result(&result);
    Ok(())
}

async fn skip(orchestrator: &mut Orchestrator, args: &[&str]) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    orchestrator.skip(&id).await?;
    println!("Skipped.");
    Ok(())
}

async fn unskip(
    orchestrator: &mut Orchestrator,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let id = pattern_at(orchestrator, args)?;
    orchestrator.unskip(&id).await?;
    println!("Back to pending.");
    Ok(())
}

fn print_result(result: &BatchResult) {
    println!();
    match result.status {
        BatchStatus::AllOk => {
            println!(
                "Done: {} ingredient(s) updated in {:.1}s",
                result.succeeded.len(),
                result.duration.as_secs_f64()
            );
        }
        BatchStatus::Partial => {
            println!(
                "Partial: {} updated, {} failed (pattern stays pending)",
                result.succeeded.len(),
                result.failed.len()
            );
            for failure in &result.failed {
                println!("  {}  {}", failure.ingredient, truncate(&failure.message, 60));
            }
            println!("Use `retry <n>` to re-run the failed subset.");
        }
        BatchStatus::Aborted => {
            println!(
                "Aborted: {}",
                result
                    .abort_reason
                    .as_deref()
                    .unwrap_or("every attempted update failed")
            );
            for failure in &result.failed {
                println!("  {}  {}", failure.ingredient, truncate(&failure.message, 60));
            }
            if !result.failed.is_empty() {
                println!("Use `retry <n>` to re-run the failed subset.");
            }
        }
    }
}
