//! Query execution seam between the dump engine and the server.
//!
//! The engine only ever issues SQL text and reads back text cells. Keeping
//! the transport behind [`QueryExecutor`] lets the introspector, serializer
//! and orchestrator be driven by an in-memory double in tests.

use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[cfg(feature = "mssql")]
pub mod sqlserver;

#[cfg(feature = "mssql")]
pub use sqlserver::SqlServerExecutor;

/// One result row; `None` cells are SQL `NULL`.
pub type TextRow = Vec<Option<String>>;

/// Returns the first cell of a row as text, if present and not NULL.
pub fn first_cell(row: &TextRow) -> Option<&str> {
    row.first().and_then(|cell| cell.as_deref())
}

/// Returns a cell by index as text, if present and not NULL.
pub fn cell(row: &TextRow, index: usize) -> Option<&str> {
    row.get(index).and_then(|cell| cell.as_deref())
}

/// Blocking-per-call query execution against a named database.
///
/// An empty result set is not an error. Implementations surface server
/// rejections, transport failures and timeouts as `Err`.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Verifies that the target database can be reached.
    ///
    /// # Errors
    /// Returns [`crate::DumpError::Connectivity`] when the server is unreachable
    async fn test_connection(&self) -> Result<()>;

    /// Runs `sql` in `database` and returns the first result set as text.
    async fn execute_query(&self, database: &str, sql: &str) -> Result<Vec<TextRow>>;

    /// Runs `sql` in `database` and writes one line per row to `path`.
    ///
    /// Cells of a row are concatenated; NULL cells contribute nothing.
    async fn execute_query_to_file(&self, database: &str, sql: &str, path: &Path) -> Result<()>;

    /// Name of the database the dump targets.
    fn database(&self) -> &str;

    /// Description of the server safe for logs and the script header.
    fn safe_description(&self) -> String;
}
