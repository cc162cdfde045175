//! Durable session state: one JSON file recording operator progress.
//!
//! The file is a resumption aid, never a system of record; the recipe server
//! stays authoritative. Writes are atomic (temp file + rename in the same
//! directory) and large states are gzip-compressed on disk.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::analyzer::PatternId;
use crate::error::SessionLoadError;

/// Current session file schema. Bump on incompatible layout changes.
pub const SCHEMA_VERSION: &str = "1.0";

/// Cap on retained operation records; oldest entries drop first.
pub const RECENT_OPERATIONS_CAP: usize = 50;

/// Serialized size above which the file is gzip-compressed on disk.
pub const GZIP_THRESHOLD_BYTES: usize = 100 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Aggregate counters shown to the operator and persisted across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    #[serde(default)]
    pub units_created: u64,
    #[serde(default)]
    pub foods_created: u64,
    #[serde(default)]
    pub aliases_added: u64,
    #[serde(default)]
    pub ingredients_updated: u64,
    #[serde(default)]
    pub patterns_completed: u64,
    #[serde(default)]
    pub patterns_skipped: u64,
}

/// One line of the capped operation audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub ts: DateTime<Utc>,
    pub op: String,
    pub pattern_id: String,
    pub count: usize,
    pub status: String,
}

/// An alias the operator attached to a food during this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasAddition {
    pub food_id: String,
    pub alias: String,
}

/// Everything needed to resume an interrupted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub completed_pattern_ids: Vec<String>,
    #[serde(default)]
    pub skipped_pattern_ids: Vec<String>,
    #[serde(default)]
    pub processed_recipe_ids: Vec<String>,
    #[serde(default)]
    pub created_unit_ids: Vec<String>,
    #[serde(default)]
    pub created_food_ids: Vec<String>,
    #[serde(default)]
    pub alias_additions: Vec<AliasAddition>,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default)]
    pub recent_operations: Vec<OperationRecord>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            completed_pattern_ids: Vec::new(),
            skipped_pattern_ids: Vec::new(),
            processed_recipe_ids: Vec::new(),
            created_unit_ids: Vec::new(),
            created_food_ids: Vec::new(),
            alias_additions: Vec::new(),
            stats: SessionStats::default(),
            recent_operations: Vec::new(),
        }
    }

    /// Mark a pattern completed, removing it from the skipped set if present.
    pub fn mark_completed(&mut self, id: &PatternId) {
        let id = id.as_str();
        self.skipped_pattern_ids.retain(|s| s != id);
        if !self.completed_pattern_ids.iter().any(|s| s == id) {
            self.completed_pattern_ids.push(id.to_string());
        }
        self.touch();
    }

    /// Mark a pattern skipped. Completed patterns cannot be skipped.
    pub fn mark_skipped(&mut self, id: &PatternId) {
        let id = id.as_str();
        if self.completed_pattern_ids.iter().any(|s| s == id) {
            return;
        }
        if !self.skipped_pattern_ids.iter().any(|s| s == id) {
            self.skipped_pattern_ids.push(id.to_string());
        }
        self.touch();
    }

    /// Move a pattern out of the skipped set.
    pub fn unskip(&mut self, id: &PatternId) {
        let id = id.as_str();
        self.skipped_pattern_ids.retain(|s| s != id);
        self.touch();
    }

    pub fn is_completed(&self, id: &PatternId) -> bool {
        self.completed_pattern_ids.iter().any(|s| s == id.as_str())
    }

    pub fn is_skipped(&self, id: &PatternId) -> bool {
        self.skipped_pattern_ids.iter().any(|s| s == id.as_str())
    }

    /// Record recipes touched by a completed batch.
    pub fn record_processed_recipes<'a>(&mut self, recipe_ids: impl IntoIterator<Item = &'a str>) {
        for id in recipe_ids {
            if !self.processed_recipe_ids.iter().any(|s| s == id) {
                self.processed_recipe_ids.push(id.to_string());
            }
        }
    }

    /// Append to the audit trail, dropping the oldest entry past the cap.
    pub fn push_operation(&mut self, record: OperationRecord) {
        self.recent_operations.push(record);
        if self.recent_operations.len() > RECENT_OPERATIONS_CAP {
            let excess = self.recent_operations.len() - RECENT_OPERATIONS_CAP;
            self.recent_operations.drain(..excess);
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Enforce the invariants a well-formed session file must satisfy:
    /// distinct members within each set and completed ∩ skipped = ∅.
    pub fn validate(&self) -> Result<(), String> {
        for (name, ids) in [
            ("completed_pattern_ids", &self.completed_pattern_ids),
            ("skipped_pattern_ids", &self.skipped_pattern_ids),
            ("processed_recipe_ids", &self.processed_recipe_ids),
            ("created_unit_ids", &self.created_unit_ids),
            ("created_food_ids", &self.created_food_ids),
        ] {
            let distinct: HashSet<&String> = ids.iter().collect();
            if distinct.len() != ids.len() {
                return Err(format!("duplicate entries in {}", name));
            }
        }

        let completed: HashSet<&String> = self.completed_pattern_ids.iter().collect();
        if let Some(overlap) = self.skipped_pattern_ids.iter().find(|s| completed.contains(s)) {
            return Err(format!(
                "pattern {} is both completed and skipped",
                overlap
            ));
        }
        Ok(())
    }

    /// Human-readable one-liner for logs and the resume prompt.
    pub fn summary(&self) -> String {
        format!(
            "{} completed, {} skipped, {} units created, {} foods created, {} aliases added",
            self.completed_pattern_ids.len(),
            self.skipped_pattern_ids.len(),
            self.stats.units_created,
            self.stats.foods_created,
            self.stats.aliases_added,
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads and writes the session file.
///
/// `save` must not be called concurrently with itself; the orchestrator
/// serializes calls behind a lock.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and validate the session file.
    pub fn load(&self) -> Result<SessionState, SessionLoadError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionLoadError::Missing);
            }
            Err(e) => {
                return Err(SessionLoadError::Corrupted(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let json = if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| SessionLoadError::Corrupted(format!("gzip decode failed: {}", e)))?;
            out
        } else {
            bytes
        };

        let state: SessionState = serde_json::from_slice(&json)
            .map_err(|e| SessionLoadError::Corrupted(format!("invalid JSON: {}", e)))?;

        if state.schema_version != SCHEMA_VERSION {
            return Err(SessionLoadError::IncompatibleSchema {
                found: state.schema_version,
                expected: SCHEMA_VERSION.to_string(),
            });
        }

        state
            .validate()
            .map_err(SessionLoadError::Corrupted)?;

        tracing::info!(path = %self.path.display(), "loaded session: {}", state.summary());
        Ok(state)
    }

    /// Atomically persist the state: write a temp file in the same directory,
    /// then rename over the target. Gzip-compresses past the size threshold.
    pub fn save(&self, state: &SessionState) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let payload = if json.len() > GZIP_THRESHOLD_BYTES {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json)?;
            let compressed = encoder.finish()?;
            tracing::debug!(
                raw = json.len(),
                compressed = compressed.len(),
                "session file compressed"
            );
            compressed
        } else {
            json
        };

        let temp = self.path.with_extension("tmp");
        fs::write(&temp, &payload)?;
        fs::rename(&temp, &self.path)?;

        tracing::debug!(path = %self.path.display(), bytes = payload.len(), "saved session");
        Ok(())
    }

    /// Delete the session file. Missing files are not an error.
    pub fn discard(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "discarded session file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
