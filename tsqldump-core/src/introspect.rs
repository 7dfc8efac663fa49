//! Catalog introspection: tables, columns, primary keys, server version.
//!
//! Every query is plain T-SQL text issued through [`QueryExecutor`]; values
//! interpolated into catalog predicates are escaped with
//! [`escape_literal`]. All result columns are cast to NVARCHAR on the server
//! so the executor only ever reads text.

use crate::error::DumpError;
use crate::executor::{QueryExecutor, TextRow, cell, first_cell};
use crate::models::{
    ColumnMeta, IdentitySpec, PrimaryKeyMeta, ServerVersion, TableRef, escape_literal,
};
use crate::Result;
use tracing::{debug, warn};

/// Database tried first when probing the server version.
pub const ADMIN_DATABASE: &str = "master";

const LIST_TABLES_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_SCHEMA, TABLE_NAME";

const SERVER_VERSION_SQL: &str =
    "SELECT CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128))";

/// `OBJECT_ID(N'[schema].[table]')` for use in catalog predicates.
fn object_id(table: &TableRef) -> String {
    format!("OBJECT_ID(N'{}')", escape_literal(&table.qualified()))
}

/// Catalog query returning one row per column, in ordinal order.
///
/// Computed columns are excluded; alias types are reported as their base
/// system type.
pub fn columns_query(table: &TableRef) -> String {
    format!(
        "SELECT CAST(c.column_id AS NVARCHAR(10)), c.name, \
         CASE WHEN ty.is_user_defined = 1 AND ty.is_assembly_type = 0 \
              THEN TYPE_NAME(c.system_type_id) ELSE ty.name END, \
         CAST(c.max_length AS NVARCHAR(10)), \
         CAST(c.precision AS NVARCHAR(10)), \
         CAST(c.scale AS NVARCHAR(10)), \
         CAST(c.is_nullable AS NVARCHAR(1)), \
         CAST(c.is_identity AS NVARCHAR(1)), \
         CAST(ic.seed_value AS NVARCHAR(40)), \
         CAST(ic.increment_value AS NVARCHAR(40)), \
         dc.definition \
         FROM sys.columns c \
         JOIN sys.types ty ON ty.user_type_id = c.user_type_id \
         LEFT JOIN sys.identity_columns ic \
              ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
         LEFT JOIN sys.default_constraints dc \
              ON dc.parent_object_id = c.object_id AND dc.parent_column_id = c.column_id \
         WHERE c.object_id = {} AND c.is_computed = 0 \
         ORDER BY c.column_id",
        object_id(table)
    )
}

/// Catalog query returning `(constraint, column)` rows in key order.
pub fn primary_key_query(table: &TableRef) -> String {
    format!(
        "SELECT kc.name, c.name \
         FROM sys.key_constraints kc \
         JOIN sys.index_columns ic \
              ON ic.object_id = kc.parent_object_id AND ic.index_id = kc.unique_index_id \
         JOIN sys.columns c \
              ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
         WHERE kc.type = 'PK' AND kc.parent_object_id = {} \
         ORDER BY ic.key_ordinal",
        object_id(table)
    )
}

/// Count of identity columns on the table.
pub fn identity_query(table: &TableRef) -> String {
    format!(
        "SELECT CAST(COUNT(*) AS NVARCHAR(10)) FROM sys.identity_columns WHERE object_id = {}",
        object_id(table)
    )
}

/// Count of `binary`/`varbinary`/`image` columns on the table.
pub fn binary_query(table: &TableRef) -> String {
    format!(
        "SELECT CAST(COUNT(*) AS NVARCHAR(10)) FROM sys.columns c \
         JOIN sys.types ty ON ty.user_type_id = c.system_type_id \
         WHERE c.object_id = {} AND ty.name IN ('binary', 'varbinary', 'image')",
        object_id(table)
    )
}

/// Reads table metadata from the catalog of one database.
pub struct SchemaIntrospector<'a> {
    executor: &'a dyn QueryExecutor,
    database: String,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(executor: &'a dyn QueryExecutor, database: impl Into<String>) -> Self {
        Self {
            executor,
            database: database.into(),
        }
    }

    /// Resolves the ordered table set.
    ///
    /// With an explicit comma-separated list, entries are trimmed and
    /// qualified with `dbo` when unqualified, keeping caller order and
    /// duplicates. Without one, every base table is listed ordered by
    /// schema then name.
    ///
    /// # Errors
    /// Fails only when the catalog listing itself fails.
    pub async fn discover_tables(&self, explicit: Option<&str>) -> Result<Vec<TableRef>> {
        if let Some(list) = explicit.filter(|l| !l.trim().is_empty()) {
            let tables = parse_table_list(list);
            debug!(count = tables.len(), "Using explicit table list");
            return Ok(tables);
        }

        let rows = self
            .executor
            .execute_query(&self.database, LIST_TABLES_SQL)
            .await?;

        let tables: Vec<TableRef> = rows
            .iter()
            .filter_map(|row| match (cell(row, 0), cell(row, 1)) {
                (Some(schema), Some(name)) => Some(TableRef::new(schema, name)),
                _ => None,
            })
            .collect();

        debug!(count = tables.len(), "Discovered base tables");
        Ok(tables)
    }

    /// Columns of `table` in ordinal order.
    ///
    /// # Errors
    /// [`DumpError::Metadata`] when the query fails or a row cannot be read,
    /// [`DumpError::DataAbsence`] when the table reports no columns.
    pub async fn get_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>> {
        let rows = self
            .executor
            .execute_query(&self.database, &columns_query(table))
            .await
            .map_err(|e| DumpError::metadata(table, format!("column query failed: {}", e)))?;

        if rows.is_empty() {
            return Err(DumpError::data_absence(table, "no columns found"));
        }

        rows.iter().map(|row| parse_column(table, row)).collect()
    }

    /// Primary key of `table`, if it has one.
    ///
    /// # Errors
    /// [`DumpError::Metadata`] when the query fails.
    pub async fn get_primary_key(&self, table: &TableRef) -> Result<Option<PrimaryKeyMeta>> {
        let rows = self
            .executor
            .execute_query(&self.database, &primary_key_query(table))
            .await
            .map_err(|e| DumpError::metadata(table, format!("primary key query failed: {}", e)))?;

        let Some(name) = rows.first().and_then(first_cell) else {
            return Ok(None);
        };

        let columns = rows
            .iter()
            .filter_map(|row| cell(row, 1))
            .map(ToString::to_string)
            .collect();

        Ok(Some(PrimaryKeyMeta {
            name: name.to_string(),
            columns,
        }))
    }

    /// Whether `table` has an identity column.
    ///
    /// # Errors
    /// [`DumpError::Metadata`] when the query fails or returns no count.
    pub async fn has_identity_column(&self, table: &TableRef) -> Result<bool> {
        self.count_positive(table, &identity_query(table), "identity").await
    }

    /// Whether `table` has a `binary`, `varbinary` or `image` column.
    ///
    /// # Errors
    /// [`DumpError::Metadata`] when the query fails or returns no count.
    pub async fn has_binary_column(&self, table: &TableRef) -> Result<bool> {
        self.count_positive(table, &binary_query(table), "binary column").await
    }

    async fn count_positive(&self, table: &TableRef, sql: &str, what: &str) -> Result<bool> {
        let rows = self
            .executor
            .execute_query(&self.database, sql)
            .await
            .map_err(|e| DumpError::metadata(table, format!("{} query failed: {}", what, e)))?;

        rows.first()
            .and_then(first_cell)
            .and_then(|count| count.trim().parse::<i64>().ok())
            .map(|count| count > 0)
            .ok_or_else(|| DumpError::metadata(table, format!("{} query returned no count", what)))
    }

    /// Major version of the server.
    ///
    /// The administrative database is asked first, then the target
    /// database. A failed query or an empty or unparseable answer moves on
    /// to the next database; when neither answers usefully the result is
    /// [`ServerVersion::Unknown`]. This never errors.
    pub async fn server_major_version(&self) -> ServerVersion {
        for database in [ADMIN_DATABASE, self.database.as_str()] {
            match self.executor.execute_query(database, SERVER_VERSION_SQL).await {
                Ok(rows) => {
                    let version = rows
                        .first()
                        .and_then(first_cell)
                        .map_or(ServerVersion::Unknown, ServerVersion::parse);
                    debug!(database, %version, "Server version lookup");
                    if version.major().is_some() {
                        return version;
                    }
                }
                Err(e) => warn!(database, "Server version lookup failed: {}", e),
            }
        }
        ServerVersion::Unknown
    }
}

/// Splits, trims and qualifies an explicit table list.
pub fn parse_table_list(list: &str) -> Vec<TableRef> {
    list.split(',').filter_map(TableRef::parse).collect()
}

fn parse_column(table: &TableRef, row: &TextRow) -> Result<ColumnMeta> {
    let required = |index: usize, field: &str| {
        cell(row, index)
            .ok_or_else(|| DumpError::metadata(table, format!("column row is missing {}", field)))
    };
    let number = |index: usize, field: &str| -> Result<i64> {
        let text = required(index, field)?;
        text.trim().parse::<i64>().map_err(|_| {
            DumpError::metadata(table, format!("unparseable {} '{}'", field, text))
        })
    };

    let ordinal = u32::try_from(number(0, "ordinal")?)
        .map_err(|_| DumpError::metadata(table, "negative column ordinal"))?;
    let name = required(1, "name")?.to_string();
    let type_name = required(2, "type")?.to_string();
    let max_length = i32::try_from(number(3, "max_length")?)
        .map_err(|_| DumpError::metadata(table, "max_length out of range"))?;
    let precision = u8::try_from(number(4, "precision")?).unwrap_or(0);
    let scale = u8::try_from(number(5, "scale")?).unwrap_or(0);
    let is_nullable = number(6, "nullability")? != 0;
    let is_identity = number(7, "identity flag")? != 0;

    // Seed and increment may be absent or non-integral (decimal identities);
    // the DDL generator falls back to 0 for whatever is missing.
    let identity = is_identity.then(|| IdentitySpec {
        seed: parse_identity_value(cell(row, 8)),
        increment: parse_identity_value(cell(row, 9)),
    });

    Ok(ColumnMeta {
        ordinal,
        name,
        type_name,
        max_length,
        precision,
        scale,
        is_nullable,
        is_identity,
        identity,
        default_definition: cell(row, 10).map(ToString::to_string),
    })
}

fn parse_identity_value(text: Option<&str>) -> i64 {
    text.map(str::trim)
        .and_then(|t| t.split('.').next())
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(0)
}
