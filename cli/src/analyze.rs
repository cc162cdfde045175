//! The `analyze` subcommand: fetch, analyze, print, exit. Touches nothing.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use colander_core::{Config, HttpRecipeClient, Orchestrator, PatternGroup, PatternStatus};

pub async fn analyze(config: Config, json: bool) -> Result<()> {
    let client = HttpRecipeClient::from_config(&config).context("failed to build HTTP client")?;
    let (orchestrator, _startup) = Orchestrator::start(Arc::new(client), config).await?;

    let patterns = orchestrator.patterns();
    if json {
        println!("{}", serde_json::to_string_pretty(patterns)?);
        return Ok(());
    }

    print_table(patterns);
    Ok(())
}

pub fn print_table(patterns: &[PatternGroup]) {
    let by_id: HashMap<&str, &str> = patterns
        .iter()
        .map(|g| (g.id.as_str(), g.canonical_text.as_str()))
        .collect();

    println!("Pattern Analysis");
    println!("================");
    println!("{} pattern group(s)", patterns.len());
    println!();
    println!(
        "{:>4}  {:<5}  {:<10}  {:>5}  {:>7}  {:<30}  {}",
        "#", "kind", "status", "ings", "recipes", "pattern", "similar"
    );

    for (i, group) in patterns.iter().enumerate() {
        let similar: Vec<&str> = group
            .similar_group_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        println!(
            "{:>4}  {:<5}  {:<10}  {:>5}  {:>7}  {:<30}  {}",
            i + 1,
            group.kind.as_str(),
            group.status.as_str(),
            group.ingredient_refs.len(),
            group.recipe_ids.len(),
            truncate(&group.display_text, 30),
            similar.join(", "),
        );
    }

    let pending = patterns
        .iter()
        .filter(|g| g.status == PatternStatus::Pending)
        .count();
    println!();
    println!("{} pending of {} total", pending, patterns.len());
}

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
