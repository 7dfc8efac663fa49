//! Row serialization into `INSERT` statements.
//!
//! The primary path asks the server to render every row as a finished
//! `INSERT` statement. Literal rendering is dispatched on a closed set of
//! column categories ([`LiteralKind`]), each owning one server-side
//! expression. When the primary path yields nothing, a pipe-delimited text
//! export is parsed client-side instead, unless the table holds binary data.
//!
//! The export escapes backslashes, the delimiter and line breaks on the
//! server, so one line is always one row. The client reverses the escapes,
//! checks each value against its column category and does the quoting itself.

use crate::error::DumpError;
use crate::executor::{QueryExecutor, first_cell};
use crate::filter::GlobalFilter;
use crate::models::{ColumnMeta, TableRef, escape_literal, quote_ident};
use crate::Result;
use tracing::{debug, warn};

/// Field separator of the fallback export.
pub const FALLBACK_DELIMITER: char = '|';

/// Escape character of the fallback export.
pub const FALLBACK_ESCAPE: char = '\\';

/// Token the fallback export uses for SQL NULL.
///
/// A backslash inside a value is always doubled, so no value escapes to it.
pub const NULL_TOKEN: &str = "\\N";

/// How a column's values are written as SQL literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    /// `binary`, `varbinary`, `image`: `0x` hex
    Binary,
    /// Character, XML and `uniqueidentifier`: `N'...'` with quotes doubled
    Text,
    /// `date`, `time`, `datetime`, `datetime2`, `datetimeoffset`:
    /// `N'...'` in ISO-8601 form
    Temporal,
    /// Exact and approximate numerics, money and `bit`: bare text
    Numeric,
    /// Anything else: `CAST(N'...' AS <type>)`
    Typed,
}

impl LiteralKind {
    /// Category of a column, from its native type name.
    pub fn of(column: &ColumnMeta) -> Self {
        match column.type_key().as_str() {
            "binary" | "varbinary" | "image" => Self::Binary,
            "char" | "varchar" | "text" | "nchar" | "nvarchar" | "ntext" | "xml"
            | "uniqueidentifier" => Self::Text,
            "datetime" | "date" | "datetime2" | "datetimeoffset" | "time" => Self::Temporal,
            "tinyint" | "smallint" | "int" | "bigint" | "bit" | "decimal" | "numeric"
            | "money" | "smallmoney" | "float" | "real" => Self::Numeric,
            _ => Self::Typed,
        }
    }

    /// Server-side expression converting `column` to NVARCHAR text.
    ///
    /// Styles: 126 keeps full temporal precision in ISO-8601, 2 keeps
    /// every significant digit of float and money values.
    fn text_expr(self, column: &ColumnMeta) -> String {
        let col = quote_ident(&column.name);
        match self {
            Self::Binary => format!("CONVERT(NVARCHAR(MAX), CONVERT(VARBINARY(MAX), {}), 1)", col),
            Self::Temporal => format!("CONVERT(NVARCHAR(MAX), {}, 126)", col),
            Self::Numeric => match column.type_key().as_str() {
                "float" | "real" | "money" | "smallmoney" => {
                    format!("CONVERT(NVARCHAR(MAX), {}, 2)", col)
                }
                _ => format!("CONVERT(NVARCHAR(MAX), {})", col),
            },
            Self::Text | Self::Typed => format!("CONVERT(NVARCHAR(MAX), {})", col),
        }
    }

    /// Server-side expression producing the finished literal for one value,
    /// `NULL` included.
    pub fn literal_expr(self, column: &ColumnMeta) -> String {
        let text = self.text_expr(column);
        let rendered = match self {
            Self::Binary | Self::Numeric => text,
            Self::Text | Self::Temporal => format!(
                "N'N''' + REPLACE({}, N'''', N'''''') + N''''",
                text
            ),
            Self::Typed => format!(
                "N'CAST(N''' + REPLACE({}, N'''', N'''''') + N''' AS {})'",
                text,
                escape_literal(&column.type_key())
            ),
        };
        format!(
            "CASE WHEN {} IS NULL THEN N'NULL' ELSE {} END",
            quote_ident(&column.name),
            rendered
        )
    }

    /// Client-side literal for one unescaped fallback value, or `None` when
    /// the text cannot be a value of this category.
    fn render_value(self, column: &ColumnMeta, value: &str) -> Option<String> {
        match self {
            Self::Numeric => is_numeric_text(value).then(|| value.to_string()),
            Self::Binary => is_hex_literal(value).then(|| value.to_string()),
            Self::Typed => Some(format!(
                "CAST(N'{}' AS {})",
                escape_literal(value),
                column.type_key()
            )),
            Self::Text | Self::Temporal => Some(format!("N'{}'", escape_literal(value))),
        }
    }
}

/// Plain decimal or scientific notation; `inf` and `NaN` are refused.
fn is_numeric_text(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && value.parse::<f64>().is_ok()
}

fn is_hex_literal(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// `INSERT INTO [s].[t] ([a],[b]) VALUES (` prefix shared by both paths.
pub fn insert_prefix(table: &TableRef, columns: &[ColumnMeta]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(",");
    format!("INSERT INTO {} ({}) VALUES (", table.qualified(), names)
}

/// Query whose result has one finished `INSERT` statement per data row.
pub fn build_primary_row_selector(
    table: &TableRef,
    columns: &[ColumnMeta],
    filter: &GlobalFilter,
) -> String {
    let values = columns
        .iter()
        .map(|c| LiteralKind::of(c).literal_expr(c))
        .collect::<Vec<_>>()
        .join(" + N', ' + ");

    format!(
        "SELECT N'{}' + {} + N');' FROM {}{}",
        escape_literal(&insert_prefix(table, columns)),
        values,
        table.qualified(),
        filter.where_clause()
    )
}

/// Server-side expression for one fallback field.
///
/// The innermost `REPLACE` doubles the escape character, so the later
/// replacements and the NULL token cannot be confused with value text.
fn fallback_field_expr(column: &ColumnMeta) -> String {
    format!(
        r"ISNULL(REPLACE(REPLACE(REPLACE(REPLACE({}, N'\', N'\\'), N'|', N'\p'), NCHAR(13), N'\r'), NCHAR(10), N'\n'), N'{}')",
        LiteralKind::of(column).text_expr(column),
        NULL_TOKEN
    )
}

/// Query whose result has one pipe-delimited line per data row.
///
/// Each value is NULL-guarded and escaped on the server; quoting is left to
/// [`parse_fallback_lines`].
pub fn build_fallback_query(
    table: &TableRef,
    columns: &[ColumnMeta],
    filter: &GlobalFilter,
) -> String {
    let fields = columns
        .iter()
        .map(fallback_field_expr)
        .collect::<Vec<_>>()
        .join(&format!(" + N'{}' + ", FALLBACK_DELIMITER));

    format!(
        "SELECT {} FROM {}{}",
        fields,
        table.qualified(),
        filter.where_clause()
    )
}

/// Reverses the server-side escaping of one fallback field.
///
/// Returns `None` on a dangling or unknown escape sequence.
pub fn unescape_field(field: &str) -> Option<String> {
    let mut value = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != FALLBACK_ESCAPE {
            value.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => value.push('\\'),
            'p' => value.push(FALLBACK_DELIMITER),
            'r' => value.push('\r'),
            'n' => value.push('\n'),
            _ => return None,
        }
    }
    Some(value)
}

/// Literal for one raw fallback field, or the reason it was refused.
fn render_field(column: &ColumnMeta, field: &str) -> std::result::Result<String, String> {
    if field == NULL_TOKEN {
        return Ok("NULL".to_string());
    }
    let value = unescape_field(field).ok_or_else(|| {
        format!(
            "column {} has a malformed escape sequence",
            quote_ident(&column.name)
        )
    })?;
    LiteralKind::of(column)
        .render_value(column, &value)
        .ok_or_else(|| {
            format!(
                "column {} does not hold a valid {} value",
                quote_ident(&column.name),
                column.type_key()
            )
        })
}

/// Statements and notes recovered from a fallback export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackRows {
    /// One finished `INSERT` per accepted line, in export order
    pub statements: Vec<String>,
    /// One entry per refused line, plus a final one when nothing was usable
    pub notes: Vec<String>,
}

/// Rebuilds `INSERT` statements from fallback export text.
///
/// Blank lines are ignored. A line is reported as a note and not converted
/// when its field count differs from the column count, when a field carries
/// a bad escape sequence, or when a field does not fit its column category
/// (non-numeric text in a numeric column, for instance).
pub fn parse_fallback_lines(table: &TableRef, columns: &[ColumnMeta], text: &str) -> FallbackRows {
    let prefix = insert_prefix(table, columns);
    let mut rows = FallbackRows::default();

    for (index, line) in text.lines().enumerate() {
        let row = index.saturating_add(1);
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(FALLBACK_DELIMITER).collect();
        if fields.len() != columns.len() {
            rows.notes.push(format!(
                "Row {} of {} skipped: expected {} fields, found {}",
                row,
                table,
                columns.len(),
                fields.len()
            ));
            continue;
        }

        let values = columns
            .iter()
            .zip(fields)
            .map(|(column, field)| render_field(column, field))
            .collect::<std::result::Result<Vec<_>, _>>();

        match values {
            Ok(values) => rows
                .statements
                .push(format!("{}{});", prefix, values.join(", "))),
            Err(reason) => rows
                .notes
                .push(format!("Row {} of {} skipped: {}", row, table, reason)),
        }
    }

    if rows.statements.is_empty() {
        rows.notes
            .push(format!("No parseable rows recovered for {}", table));
    }
    rows
}

/// What the data phase of one table produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOutcome {
    /// Statements rendered by the server
    Primary(Vec<String>),
    /// Statements rebuilt from the delimited export, plus any notes
    Fallback(FallbackRows),
    /// No data written; the note says why
    Skipped(String),
}

impl DataOutcome {
    /// Number of `INSERT` statements carried.
    pub fn insert_count(&self) -> usize {
        match self {
            Self::Primary(statements) => statements.len(),
            Self::Fallback(rows) => rows.statements.len(),
            Self::Skipped(_) => 0,
        }
    }
}

/// Next step after the primary path has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStep {
    /// The primary path rendered these statements
    Done(Vec<String>),
    /// Nothing usable came back and the table has no binary column
    Fallback,
    /// Nothing usable came back but the fallback cannot carry binary data;
    /// holds the primary path's failure reason
    SkipBinary(String),
}

/// Decides between the primary result, the fallback path and a skip note.
pub fn next_step(primary: Result<Vec<String>>, has_binary: bool) -> DataStep {
    let reason = match primary {
        Ok(statements) if !statements.is_empty() => return DataStep::Done(statements),
        Ok(_) => "primary query produced no INSERT statements".to_string(),
        Err(e) => e.to_string(),
    };

    if has_binary {
        DataStep::SkipBinary(reason)
    } else {
        DataStep::Fallback
    }
}

/// Keeps the result lines that carry an `INSERT` statement.
fn insert_lines(rows: Vec<crate::executor::TextRow>) -> Vec<String> {
    rows.iter()
        .filter_map(first_cell)
        .filter(|line| line.trim_start().starts_with("INSERT INTO"))
        .map(ToString::to_string)
        .collect()
}

/// Runs the data phase of one table against a database.
pub struct RowSerializer<'a> {
    executor: &'a dyn QueryExecutor,
    database: String,
}

impl<'a> RowSerializer<'a> {
    /// Serializer reading rows of `database` through `executor`.
    pub fn new(executor: &'a dyn QueryExecutor, database: impl Into<String>) -> Self {
        Self {
            executor,
            database: database.into(),
        }
    }

    /// Executes the primary selector and returns the `INSERT` lines.
    ///
    /// # Errors
    /// [`DumpError::Serialization`] when the query fails.
    pub async fn primary_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnMeta],
        filter: &GlobalFilter,
    ) -> Result<Vec<String>> {
        let sql = build_primary_row_selector(table, columns, filter);
        let rows = self
            .executor
            .execute_query(&self.database, &sql)
            .await
            .map_err(|e| DumpError::serialization(table, e.to_string()))?;
        Ok(insert_lines(rows))
    }

    /// Exports through the delimited-text path.
    ///
    /// # Errors
    /// Fails when the temporary file cannot be created or read, or when the
    /// export query fails.
    pub async fn fallback_csv_export(
        &self,
        table: &TableRef,
        columns: &[ColumnMeta],
        filter: &GlobalFilter,
    ) -> Result<FallbackRows> {
        let sql = build_fallback_query(table, columns, filter);
        let scratch = tempfile::Builder::new()
            .prefix("tsqldump-")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| DumpError::io("Failed to create fallback scratch file", e))?;

        self.executor
            .execute_query_to_file(&self.database, &sql, scratch.path())
            .await
            .map_err(|e| DumpError::serialization(table, format!("fallback export failed: {}", e)))?;

        let text = tokio::fs::read_to_string(scratch.path()).await.map_err(|e| {
            DumpError::io(
                format!("Failed to read fallback export {}", scratch.path().display()),
                e,
            )
        })?;

        Ok(parse_fallback_lines(table, columns, &text))
    }

    /// Full data phase: primary path, then fallback or skip.
    ///
    /// Never fails; every problem ends up in the returned outcome.
    pub async fn export(
        &self,
        table: &TableRef,
        columns: &[ColumnMeta],
        filter: &GlobalFilter,
        has_binary: bool,
    ) -> DataOutcome {
        let primary = self.primary_rows(table, columns, filter).await;

        match next_step(primary, has_binary) {
            DataStep::Done(statements) => {
                debug!(%table, rows = statements.len(), "Primary path rendered rows");
                DataOutcome::Primary(statements)
            }
            DataStep::SkipBinary(reason) => {
                warn!(%table, "Data export skipped due to binary columns: {}", reason);
                DataOutcome::Skipped(format!(
                    "Data export skipped due to binary columns ({})",
                    reason
                ))
            }
            DataStep::Fallback => {
                debug!(%table, "Primary path empty, trying delimited fallback");
                match self.fallback_csv_export(table, columns, filter).await {
                    Ok(rows) => DataOutcome::Fallback(rows),
                    Err(e) => {
                        warn!(%table, "Fallback export failed: {}", e);
                        DataOutcome::Skipped(format!("Data export failed: {}", e))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn customers() -> (TableRef, Vec<ColumnMeta>) {
        (
            TableRef::new("dbo", "Customers"),
            vec![
                ColumnMeta::new(1, "Id", "int").not_null().with_identity(1, 1),
                ColumnMeta::new(2, "Name", "nvarchar").with_max_length(100).not_null(),
            ],
        )
    }

    fn notes() -> (TableRef, Vec<ColumnMeta>) {
        (
            TableRef::new("dbo", "Notes"),
            vec![
                ColumnMeta::new(1, "Id", "int"),
                ColumnMeta::new(2, "Body", "nvarchar"),
            ],
        )
    }

    #[test]
    fn test_literal_kind_table() {
        let cases = [
            ("varbinary", LiteralKind::Binary),
            ("IMAGE", LiteralKind::Binary),
            ("nvarchar", LiteralKind::Text),
            ("ntext", LiteralKind::Text),
            ("xml", LiteralKind::Text),
            ("uniqueidentifier", LiteralKind::Text),
            ("datetime2", LiteralKind::Temporal),
            ("datetimeoffset", LiteralKind::Temporal),
            ("int", LiteralKind::Numeric),
            ("bit", LiteralKind::Numeric),
            ("money", LiteralKind::Numeric),
            ("hierarchyid", LiteralKind::Typed),
            ("smalldatetime", LiteralKind::Typed),
            ("sql_variant", LiteralKind::Typed),
        ];
        for (type_name, expected) in cases {
            assert_eq!(
                LiteralKind::of(&ColumnMeta::new(1, "c", type_name)),
                expected,
                "for {}",
                type_name
            );
        }
    }

    #[test]
    fn test_literal_expr_per_kind() {
        const QUOTED_TEXT: &str =
            r"N'N''' + REPLACE(CONVERT(NVARCHAR(MAX), [c]), N'''', N'''''') + N''''";
        const QUOTED_TEMPORAL: &str =
            r"N'N''' + REPLACE(CONVERT(NVARCHAR(MAX), [c], 126), N'''', N'''''') + N''''";
        let cases = [
            (
                "varbinary",
                "CONVERT(NVARCHAR(MAX), CONVERT(VARBINARY(MAX), [c]), 1)",
            ),
            ("nvarchar", QUOTED_TEXT),
            ("uniqueidentifier", QUOTED_TEXT),
            ("datetime2", QUOTED_TEMPORAL),
            ("datetimeoffset", QUOTED_TEMPORAL),
            ("int", "CONVERT(NVARCHAR(MAX), [c])"),
            ("decimal", "CONVERT(NVARCHAR(MAX), [c])"),
            ("float", "CONVERT(NVARCHAR(MAX), [c], 2)"),
            ("real", "CONVERT(NVARCHAR(MAX), [c], 2)"),
            ("money", "CONVERT(NVARCHAR(MAX), [c], 2)"),
            ("smallmoney", "CONVERT(NVARCHAR(MAX), [c], 2)"),
            (
                "hierarchyid",
                r"N'CAST(N''' + REPLACE(CONVERT(NVARCHAR(MAX), [c]), N'''', N'''''') + N''' AS hierarchyid)'",
            ),
            (
                "SQL_VARIANT",
                r"N'CAST(N''' + REPLACE(CONVERT(NVARCHAR(MAX), [c]), N'''', N'''''') + N''' AS sql_variant)'",
            ),
        ];
        for (type_name, body) in cases {
            let column = ColumnMeta::new(1, "c", type_name);
            assert_eq!(
                LiteralKind::of(&column).literal_expr(&column),
                format!("CASE WHEN [c] IS NULL THEN N'NULL' ELSE {} END", body),
                "for {}",
                type_name
            );
        }
    }

    #[test]
    fn test_fallback_field_rendering() {
        let cases = [
            ("hierarchyid", "/1/2/", "CAST(N'/1/2/' AS hierarchyid)"),
            ("sql_variant", "it's", "CAST(N'it''s' AS sql_variant)"),
            (
                "datetime2",
                "2024-01-02T03:04:05.1234567",
                "N'2024-01-02T03:04:05.1234567'",
            ),
            ("date", "2024-01-02", "N'2024-01-02'"),
            ("nvarchar", "O'Brien", "N'O''Brien'"),
            ("nvarchar", "NULL", "N'NULL'"),
            ("nvarchar", r"C:\\temp\p", r"N'C:\temp|'"),
            ("int", "-42", "-42"),
            ("float", "1.5000000000000000e+000", "1.5000000000000000e+000"),
            ("money", "12.5000", "12.5000"),
            ("varbinary", "0xDEADBEEF", "0xDEADBEEF"),
            ("int", NULL_TOKEN, "NULL"),
            ("hierarchyid", NULL_TOKEN, "NULL"),
        ];
        for (type_name, field, expected) in cases {
            let column = ColumnMeta::new(1, "c", type_name);
            assert_eq!(
                render_field(&column, field).as_deref(),
                Ok(expected),
                "for {} {:?}",
                type_name,
                field
            );
        }
    }

    #[test]
    fn test_fallback_field_refusals() {
        let cases = [
            ("int", "0); DROP TABLE dbo.Users; --"),
            ("int", ""),
            ("float", "inf"),
            ("float", "NaN"),
            ("bigint", "1 OR 1=1"),
            ("varbinary", "DEADBEEF"),
            ("varbinary", "0xZZ"),
            ("nvarchar", r"dangling\"),
            ("nvarchar", r"unknown\q"),
        ];
        for (type_name, field) in cases {
            let column = ColumnMeta::new(1, "c", type_name);
            assert!(
                render_field(&column, field).is_err(),
                "{} {:?} was accepted",
                type_name,
                field
            );
        }
    }

    #[test]
    fn test_primary_selector_shape() {
        let (table, columns) = customers();
        let sql = build_primary_row_selector(&table, &columns, &GlobalFilter::default());

        assert!(sql.starts_with(
            "SELECT N'INSERT INTO [dbo].[Customers] ([Id],[Name]) VALUES (' + "
        ));
        assert!(sql.contains(" + N', ' + "));
        assert!(sql.contains("REPLACE(CONVERT(NVARCHAR(MAX), [Name]), N'''', N'''''')"));
        assert!(sql.ends_with(" + N');' FROM [dbo].[Customers]"));
    }

    #[test]
    fn test_primary_selector_escapes_quoted_table_name() {
        let table = TableRef::new("dbo", "O'Hare");
        let columns = vec![ColumnMeta::new(1, "Id", "int")];
        let sql = build_primary_row_selector(&table, &columns, &GlobalFilter::default());
        assert!(sql.starts_with("SELECT N'INSERT INTO [dbo].[O''Hare] ([Id]) VALUES ('"));
    }

    #[test]
    fn test_filter_is_injected_once() {
        let (table, columns) = customers();
        let bare = build_primary_row_selector(&table, &columns, &GlobalFilter::new("Id > 5"));
        let keyed =
            build_primary_row_selector(&table, &columns, &GlobalFilter::new("WHERE Id > 5"));
        assert_eq!(bare, keyed);
        assert!(bare.ends_with("FROM [dbo].[Customers] WHERE Id > 5"));
        assert_eq!(bare.matches("WHERE").count(), 1);

        let fallback = build_fallback_query(&table, &columns, &GlobalFilter::new("WHERE Id > 5"));
        assert!(fallback.ends_with("FROM [dbo].[Customers] WHERE Id > 5"));
    }

    #[test]
    fn test_fallback_query_guards_each_value() {
        let (table, columns) = customers();
        let sql = build_fallback_query(&table, &columns, &GlobalFilter::default());
        assert_eq!(sql.matches("ISNULL(").count(), 2);
        assert!(sql.contains(" + N'|' + "));
        assert!(sql.contains(
            r"ISNULL(REPLACE(REPLACE(REPLACE(REPLACE(CONVERT(NVARCHAR(MAX), [Name]), N'\', N'\\'), N'|', N'\p'), NCHAR(13), N'\r'), NCHAR(10), N'\n'), N'\N')"
        ));
        // Quoting happens client-side after unescaping.
        assert!(!sql.contains("N''''"));
    }

    #[test]
    fn test_parse_fallback_lines() {
        let (table, columns) = customers();
        let rows = parse_fallback_lines(&table, &columns, "1|O'Brien\r\n\n2|\\N\n3|NULL\n");

        assert_eq!(
            rows.statements,
            vec![
                "INSERT INTO [dbo].[Customers] ([Id],[Name]) VALUES (1, N'O''Brien');".to_string(),
                "INSERT INTO [dbo].[Customers] ([Id],[Name]) VALUES (2, NULL);".to_string(),
                "INSERT INTO [dbo].[Customers] ([Id],[Name]) VALUES (3, N'NULL');".to_string(),
            ]
        );
        assert!(rows.notes.is_empty());
    }

    #[test]
    fn test_parse_fallback_restores_line_breaks_in_last_column() {
        let (table, columns) = notes();
        let export = "1|first line\\nsecond line\\r\\nthird \\p pipe \\\\ slash\n2|tail\\n\n";
        let rows = parse_fallback_lines(&table, &columns, export);

        assert!(rows.notes.is_empty(), "{:?}", rows.notes);
        assert_eq!(
            rows.statements,
            vec![
                "INSERT INTO [dbo].[Notes] ([Id],[Body]) VALUES (1, N'first line\nsecond line\r\nthird | pipe \\ slash');"
                    .to_string(),
                "INSERT INTO [dbo].[Notes] ([Id],[Body]) VALUES (2, N'tail\n');".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_fallback_refuses_text_in_numeric_slot() {
        let (table, columns) = notes();
        let rows = parse_fallback_lines(&table, &columns, "1|hi\n0); DROP TABLE dbo.Users; --|x\n");

        assert_eq!(
            rows.statements,
            vec!["INSERT INTO [dbo].[Notes] ([Id],[Body]) VALUES (1, N'hi');".to_string()]
        );
        assert_eq!(
            rows.notes,
            vec![
                "Row 2 of dbo.Notes skipped: column [Id] does not hold a valid int value"
                    .to_string()
            ]
        );
        assert!(rows.statements.iter().all(|s| !s.contains("DROP")));
    }

    #[test]
    fn test_parse_fallback_refuses_bad_escape() {
        let (table, columns) = customers();
        let rows = parse_fallback_lines(&table, &columns, "1|broken\\\n2|ok\n");
        assert_eq!(rows.statements.len(), 1);
        assert_eq!(
            rows.notes,
            vec![
                "Row 1 of dbo.Customers skipped: column [Name] has a malformed escape sequence"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_parse_fallback_reports_mis_split_rows() {
        let (table, columns) = customers();
        let rows = parse_fallback_lines(&table, &columns, "1|a|b\n2|ok\n");
        assert_eq!(rows.statements.len(), 1);
        assert_eq!(rows.notes.len(), 1);
        assert!(rows.notes[0].contains("expected 2 fields, found 3"));
    }

    #[test]
    fn test_parse_fallback_with_nothing_usable() {
        let (table, columns) = customers();
        let rows = parse_fallback_lines(&table, &columns, "\n\n");
        assert!(rows.statements.is_empty());
        assert_eq!(rows.notes, vec!["No parseable rows recovered for dbo.Customers".to_string()]);
    }

    #[test]
    fn test_next_step_decisions() {
        let stmt = vec!["INSERT INTO x VALUES (1);".to_string()];
        assert_eq!(next_step(Ok(stmt.clone()), true), DataStep::Done(stmt));
        assert_eq!(next_step(Ok(vec![]), false), DataStep::Fallback);
        assert!(matches!(next_step(Ok(vec![]), true), DataStep::SkipBinary(_)));

        let failed = Err(DumpError::serialization("dbo.T", "boom"));
        assert!(matches!(next_step(failed, true), DataStep::SkipBinary(r) if r.contains("boom")));
        let failed = Err(DumpError::serialization("dbo.T", "boom"));
        assert_eq!(next_step(failed, false), DataStep::Fallback);
    }

    #[test]
    fn test_insert_lines_filters_noise() {
        let rows = vec![
            vec![Some("INSERT INTO [dbo].[T] ([a]) VALUES (1);".to_string())],
            vec![Some("(1 rows affected)".to_string())],
            vec![None],
        ];
        assert_eq!(insert_lines(rows).len(), 1);
    }

    /// Mirrors the `REPLACE` chain of the fallback query.
    fn server_escape(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace('|', "\\p")
            .replace('\r', "\\r")
            .replace('\n', "\\n")
    }

    proptest! {
        // Any text value exported by the server comes back as one statement
        // whose literal reads as the original string under T-SQL quoting.
        #[test]
        fn prop_fallback_text_round_trips(value in r"[a-zA-Z0-9 '|\\\r\nN]{0,40}") {
            let (table, columns) = customers();
            let escaped = server_escape(&value);
            prop_assert_eq!(unescape_field(&escaped), Some(value.clone()));

            let rows = parse_fallback_lines(&table, &columns, &format!("7|{}\n", escaped));
            prop_assert!(rows.notes.is_empty());
            prop_assert_eq!(rows.statements.len(), 1);

            let literal = rows.statements[0]
                .strip_prefix("INSERT INTO [dbo].[Customers] ([Id],[Name]) VALUES (7, N'")
                .and_then(|l| l.strip_suffix("');"))
                .unwrap();
            prop_assert!(!literal.replace("''", "").contains('\''));
            prop_assert_eq!(literal.replace("''", "'"), value);
        }
    }
}
