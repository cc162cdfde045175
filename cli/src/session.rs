//! The `session` and `stats` subcommands: inspect or discard the saved file.

use anyhow::Result;
use colander_core::{Config, SessionLoadError, SessionStats, SessionStore};

pub fn show(config: &Config) -> Result<()> {
    let store = SessionStore::new(&config.session_file);
    let state = match store.load() {
        Ok(state) => state,
        Err(SessionLoadError::Missing) => {
            println!("No saved session at {}", store.path().display());
            return Ok(());
        }
        Err(e) => {
            println!("Session file at {} is unusable: {}", store.path().display(), e);
            println!("Run `colander session clear` to remove it.");
            return Ok(());
        }
    };

    println!("Session file: {}", store.path().display());
    println!("Last updated: {}", state.timestamp.to_rfc3339());
    println!("Summary: {}", state.summary());
    print_stats(&state.stats);

    if !state.recent_operations.is_empty() {
        println!();
        println!("Recent operations:");
        for record in state.recent_operations.iter().rev().take(10) {
            println!(
                "  {}  {:<15}  {}  ({} updated, {})",
                record.ts.format("%Y-%m-%d %H:%M:%S"),
                record.op,
                record.pattern_id,
                record.count,
                record.status,
            );
        }
    }
    Ok(())
}

pub fn clear(config: &Config) -> Result<()> {
    let store = SessionStore::new(&config.session_file);
    if !store.exists() {
        println!("No session file to clear");
        return Ok(());
    }
    store.discard()?;
    println!("Cleared session file: {}", store.path().display());
    Ok(())
}

pub fn stats(config: &Config) -> Result<()> {
    let store = SessionStore::new(&config.session_file);
    match store.load() {
        Ok(state) => {
            print_stats(&state.stats);
            Ok(())
        }
        Err(SessionLoadError::Missing) => {
            println!("No saved session");
            Ok(())
        }
        Err(e) => {
            println!("Session file is unusable: {}", e);
            Ok(())
        }
    }
}

pub fn print_stats(stats: &SessionStats) {
    println!();
    println!("Statistics:");
    println!("  Units created:       {}", stats.units_created);
    println!("  Foods created:       {}", stats.foods_created);
    println!("  Aliases added:       {}", stats.aliases_added);
    println!("  Ingredients updated: {}", stats.ingredients_updated);
    println!("  Patterns completed:  {}", stats.patterns_completed);
    println!("  Patterns skipped:    {}", stats.patterns_skipped);
}
