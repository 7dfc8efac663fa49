//! Core engine for tsqldump.
//!
//! This crate turns the catalog and rows of one SQL Server database into a
//! single replayable T-SQL script. It is shared by the `tsqldump` binary and
//! the integration tests, which drive it through an in-memory
//! [`QueryExecutor`].
//!
//! # Guarantees
//! - Every operation against the server is read-only
//! - Credentials are never written to logs, errors or the script
//! - Only an unreachable server or invalid configuration aborts a run;
//!   every per-table failure becomes an inline `-- Note:` comment
//!
//! # Layout
//! - [`introspect`] reads tables, columns, keys and the server version
//! - [`ddl`] renders `CREATE TABLE`, primary key and drop statements
//! - [`rows`] renders data rows as `INSERT` statements
//! - [`dump`] sequences all of the above into one script

pub mod config;
pub mod ddl;
pub mod dump;
pub mod error;
pub mod executor;
pub mod filter;
pub mod introspect;
pub mod logging;
pub mod models;
pub mod rows;
pub mod summary;

// Re-export commonly used types
pub use config::{ConnectionSettings, Credentials, DumpOptions, OutputDestination};
pub use ddl::DropSyntax;
pub use dump::{DumpOrchestrator, DumpTarget};
pub use error::{DumpError, Result};
pub use executor::{QueryExecutor, TextRow};
pub use filter::GlobalFilter;
pub use introspect::SchemaIntrospector;
pub use logging::init_logging;
pub use models::{ColumnMeta, IdentitySpec, PrimaryKeyMeta, ServerVersion, TableRef};
pub use rows::{DataOutcome, LiteralKind, RowSerializer};
pub use summary::DumpSummary;

#[cfg(feature = "mssql")]
pub use executor::SqlServerExecutor;
