//! End-of-run statistics.

use crate::error::DumpError;
use crate::models::ServerVersion;
use crate::Result;
use serde::Serialize;
use std::path::Path;

/// Counters collected while a dump runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub database: String,
    pub server_version: ServerVersion,
    pub tables_attempted: usize,
    /// Tables whose section contains at least one inline note
    pub tables_with_notes: usize,
    pub insert_statements: usize,
    pub fallback_tables: usize,
    pub skipped_tables: usize,
    pub notes: usize,
    pub elapsed_ms: u128,
}

impl DumpSummary {
    /// Writes the summary as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| DumpError::Summary {
            context: "JSON serialization".to_string(),
            source: e,
        })?;

        tokio::fs::write(path, json)
            .await
            .map_err(|e| DumpError::io(format!("Failed to write {}", path.display()), e))
    }
}
