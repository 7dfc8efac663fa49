//! Dump orchestration: one run, one append-only script.
//!
//! A run moves through four phases:
//! 1. **Resolve**: connectivity check, the only fatal step.
//! 2. **Configure**: server version, drop syntax and the normalised filter
//!    are fixed in a [`DumpTarget`].
//! 3. **Enumerate**: the ordered table list.
//! 4. **Tables**: each table is written as one section. Failures inside a
//!    section become `-- Note:` comments and processing continues.
//!
//! The script ends with the session options block.

use crate::config::{DumpOptions, OutputDestination};
use crate::ddl::{self, DropSyntax};
use crate::error::DumpError;
use crate::executor::QueryExecutor;
use crate::filter::GlobalFilter;
use crate::introspect::SchemaIntrospector;
use crate::models::{ColumnMeta, ServerVersion, TableRef};
use crate::rows::{DataOutcome, RowSerializer};
use crate::summary::DumpSummary;
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Session options appended once at the end of the script.
pub const SESSION_OPTIONS: [&str; 4] = [
    "SET NOCOUNT ON;",
    "SET XACT_ABORT ON;",
    "SET ANSI_NULLS ON;",
    "SET QUOTED_IDENTIFIER ON;",
];

/// Immutable context of one run, built before any table is processed.
#[derive(Debug, Clone)]
pub struct DumpTarget {
    /// Database every catalog and data query runs against
    pub database: String,
    /// Server identity for the header, without credentials
    pub server: String,
    /// Decides the drop syntax; `Unknown` selects the legacy form
    pub server_version: ServerVersion,
    /// Tables in the order their sections are written
    pub tables: Vec<TableRef>,
    /// Normalised predicate shared by every data query
    pub filter: GlobalFilter,
    /// Drop statement form, or `None` when drops were not requested
    pub drop: Option<DropSyntax>,
    /// Where the script goes; the orchestrator itself writes to any sink
    pub output: OutputDestination,
    /// Timestamp written into the header
    pub generated_at: DateTime<Utc>,
    /// Set when the table list could not be obtained
    pub enumeration_note: Option<String>,
}

/// Drives introspection, DDL rendering and row serialization for a run.
pub struct DumpOrchestrator<'a> {
    executor: &'a dyn QueryExecutor,
    options: DumpOptions,
}

impl<'a> DumpOrchestrator<'a> {
    /// Orchestrator issuing every query through `executor`.
    pub fn new(executor: &'a dyn QueryExecutor, options: DumpOptions) -> Self {
        Self { executor, options }
    }

    /// Resolve, configure and enumerate.
    ///
    /// # Errors
    /// Only a failed connectivity check is returned as an error.
    pub async fn prepare(&self) -> Result<DumpTarget> {
        self.executor.test_connection().await?;
        info!("Connected to {}", self.executor.safe_description());

        let database = self.executor.database().to_string();
        let introspector = SchemaIntrospector::new(self.executor, database.clone());

        let server_version = introspector.server_major_version().await;
        let drop = DropSyntax::select(self.options.drop_tables, server_version);
        let filter = GlobalFilter::from_option(self.options.filter.as_deref());
        info!(%server_version, ?drop, filter = ?filter.predicate(), "Run configured");

        let (tables, enumeration_note) = match introspector
            .discover_tables(self.options.tables.as_deref())
            .await
        {
            Ok(tables) => (tables, None),
            Err(e) => {
                warn!("Table enumeration failed: {}", e);
                (Vec::new(), Some(format!("Could not list tables: {}", e)))
            }
        };

        Ok(DumpTarget {
            database,
            server: self.executor.safe_description(),
            server_version,
            tables,
            filter,
            drop,
            output: self.options.output.clone(),
            generated_at: Utc::now(),
            enumeration_note,
        })
    }

    /// Writes the whole script for a prepared target.
    ///
    /// # Errors
    /// Only failures writing to `out` are returned; every per-table problem
    /// is written into the script as a note.
    pub async fn write_dump<W>(&self, target: &DumpTarget, out: &mut W) -> Result<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let mut script = ScriptWriter::new(out);
        let mut summary = DumpSummary {
            database: target.database.clone(),
            server_version: target.server_version,
            ..Default::default()
        };

        write_header(&mut script, target).await?;
        if let Some(note) = &target.enumeration_note {
            script.note(note).await?;
        }

        for table in &target.tables {
            info!(%table, "Dumping table");
            let notes_before = script.notes;
            let outcome = self.dump_table(&mut script, target, table).await?;

            summary.tables_attempted = summary.tables_attempted.saturating_add(1);
            if let Some(outcome) = outcome {
                summary.insert_statements =
                    summary.insert_statements.saturating_add(outcome.insert_count());
                match outcome {
                    DataOutcome::Fallback(_) => {
                        summary.fallback_tables = summary.fallback_tables.saturating_add(1);
                    }
                    DataOutcome::Skipped(_) => {
                        summary.skipped_tables = summary.skipped_tables.saturating_add(1);
                    }
                    DataOutcome::Primary(_) => {}
                }
            } else {
                summary.skipped_tables = summary.skipped_tables.saturating_add(1);
            }
            if script.notes > notes_before {
                summary.tables_with_notes = summary.tables_with_notes.saturating_add(1);
            }
        }

        script.comment("Session options").await?;
        for option in SESSION_OPTIONS {
            script.line(option).await?;
        }
        script.flush().await?;

        summary.notes = script.notes;
        summary.elapsed_ms = started.elapsed().as_millis();
        info!(
            tables = summary.tables_attempted,
            inserts = summary.insert_statements,
            notes = summary.notes,
            "Dump finished"
        );
        Ok(summary)
    }

    /// Prepares and writes in one call.
    ///
    /// # Errors
    /// Connectivity failure or output write failure.
    pub async fn run<W>(&self, out: &mut W) -> Result<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let target = self.prepare().await?;
        self.write_dump(&target, out).await
    }

    /// Writes one table section. Returns the data outcome, or `None` when the
    /// data phase could not run for lack of column metadata.
    async fn dump_table<W>(
        &self,
        script: &mut ScriptWriter<'_, W>,
        target: &DumpTarget,
        table: &TableRef,
    ) -> Result<Option<DataOutcome>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let introspector = SchemaIntrospector::new(self.executor, target.database.as_str());
        let serializer = RowSerializer::new(self.executor, target.database.as_str());

        script.banner(table).await?;

        if let Some(syntax) = target.drop {
            script.line(&ddl::build_drop_table(table, syntax)).await?;
        }

        let columns = match introspector.get_columns(table).await {
            Ok(columns) => {
                script.line(&ddl::build_create_table(table, &columns)).await?;
                Some(columns)
            }
            Err(e) => {
                script.note_error("CREATE TABLE not scripted", &e).await?;
                None
            }
        };

        match introspector.get_primary_key(table).await {
            Ok(Some(pk)) => {
                if let Some(stmt) = ddl::build_primary_key(table, Some(&pk)) {
                    script.line(&stmt).await?;
                }
            }
            Ok(None) => {
                let e = DumpError::data_absence(table, "no primary key defined");
                script.note_error("Primary key not scripted", &e).await?;
            }
            Err(e) => script.note_error("Primary key not scripted", &e).await?,
        }

        let has_identity = match introspector.has_identity_column(table).await {
            Ok(flag) => flag,
            Err(e) => {
                script.note_error("Identity check failed", &e).await?;
                columns_have(columns.as_deref(), |c| c.is_identity)
            }
        };

        if has_identity {
            script
                .line(&format!("SET IDENTITY_INSERT {} ON;", table.qualified()))
                .await?;
        }

        let outcome = match &columns {
            Some(columns) => {
                let has_binary = match introspector.has_binary_column(table).await {
                    Ok(flag) => flag,
                    Err(e) => {
                        script.note_error("Binary column check failed", &e).await?;
                        columns.iter().any(ColumnMeta::is_binary)
                    }
                };
                let outcome = serializer
                    .export(table, columns, &target.filter, has_binary)
                    .await;
                write_outcome(script, &outcome).await?;
                Some(outcome)
            }
            None => {
                let e = DumpError::data_absence(table, "no column metadata");
                script.note_error("Data export skipped", &e).await?;
                None
            }
        };

        if has_identity {
            script
                .line(&format!("SET IDENTITY_INSERT {} OFF;", table.qualified()))
                .await?;
        }
        script.blank().await?;

        Ok(outcome)
    }
}

fn columns_have(columns: Option<&[ColumnMeta]>, pred: impl Fn(&ColumnMeta) -> bool) -> bool {
    columns.is_some_and(|cols| cols.iter().any(pred))
}

async fn write_header<W>(script: &mut ScriptWriter<'_, W>, target: &DumpTarget) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    script.comment("tsqldump SQL script").await?;
    script
        .comment(&format!("Generated: {}", target.generated_at.to_rfc3339()))
        .await?;
    script.comment(&format!("Server: {}", target.server)).await?;
    script.comment(&format!("Database: {}", target.database)).await?;
    script
        .comment(&format!("Server version: {}", target.server_version))
        .await?;
    if let Some(predicate) = target.filter.predicate() {
        script.comment(&format!("Filter: WHERE {}", predicate)).await?;
    }
    script
        .comment(&format!("Tables: {}", target.tables.len()))
        .await?;
    script.blank().await
}

async fn write_outcome<W>(script: &mut ScriptWriter<'_, W>, outcome: &DataOutcome) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    match outcome {
        DataOutcome::Primary(statements) => {
            for stmt in statements {
                script.line(stmt).await?;
            }
        }
        DataOutcome::Fallback(rows) => {
            if !rows.statements.is_empty() {
                script
                    .note("Rows recovered through the delimited-text fallback")
                    .await?;
            }
            for stmt in &rows.statements {
                script.line(stmt).await?;
            }
            for note in &rows.notes {
                script.note(note).await?;
            }
        }
        DataOutcome::Skipped(reason) => script.note(reason).await?,
    }
    Ok(())
}

/// Replaces line breaks so text can sit inside a `--` comment.
fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Line-oriented writer over the output document that counts notes.
struct ScriptWriter<'w, W> {
    out: &'w mut W,
    notes: usize,
}

impl<'w, W> ScriptWriter<'w, W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn new(out: &'w mut W) -> Self {
        Self { out, notes: 0 }
    }

    async fn line(&mut self, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .await
            .map_err(|e| DumpError::io("Failed to write dump output", e))?;
        self.out
            .write_all(b"\n")
            .await
            .map_err(|e| DumpError::io("Failed to write dump output", e))
    }

    async fn blank(&mut self) -> Result<()> {
        self.line("").await
    }

    async fn banner(&mut self, table: &TableRef) -> Result<()> {
        let rule = "-".repeat(60);
        self.comment(&rule).await?;
        self.comment(&format!("Table: {}", table)).await?;
        self.comment(&rule).await
    }

    /// Writes `text` as one `--` comment line, whatever line breaks it holds.
    async fn comment(&mut self, text: &str) -> Result<()> {
        self.line(&format!("-- {}", single_line(text))).await
    }

    /// Writes a `-- Note:` comment.
    async fn note(&mut self, text: &str) -> Result<()> {
        self.notes = self.notes.saturating_add(1);
        self.comment(&format!("Note: {}", text)).await
    }

    async fn note_error(&mut self, what: &str, error: &DumpError) -> Result<()> {
        warn!("{}: {}", what, error);
        self.note(&format!("{}: {}", what, error)).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .await
            .map_err(|e| DumpError::io("Failed to flush dump output", e))
    }
}
