//! Local history of finished monitoring sessions.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use drivewatch_core::SessionSummary;

use crate::error::Result;

/// Persists session summaries.
pub trait SummaryStore: Send + Sync {
    /// Appends one summary.
    fn save(&self, summary: &SessionSummary) -> Result<()>;

    /// Returns every stored summary, oldest first.
    fn load_all(&self) -> Result<Vec<SessionSummary>>;
}

// ============================================================================
// JSON Lines Store
// ============================================================================

/// Stores one JSON object per line in an append-only file.
#[derive(Debug, Clone)]
pub struct JsonlSummaryStore {
    path: PathBuf,
}

impl JsonlSummaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SummaryStore for JsonlSummaryStore {
    fn save(&self, summary: &SessionSummary) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(summary)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;

        debug!(path = %self.path.display(), "Session summary saved");
        Ok(())
    }

    /// Lines that fail to parse are skipped with a warning.
    fn load_all(&self) -> Result<Vec<SessionSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let summaries = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match serde_json::from_str(line) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping unreadable session summary"
                    );
                    None
                }
            })
            .collect();
        Ok(summaries)
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Keeps summaries in memory. Useful when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemorySummaryStore {
    summaries: Mutex<Vec<SessionSummary>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SummaryStore for MemorySummaryStore {
    fn save(&self, summary: &SessionSummary) -> Result<()> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(summary.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SessionSummary>> {
        Ok(self
            .summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
