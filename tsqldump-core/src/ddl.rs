//! Rendering of `CREATE TABLE`, primary-key and `DROP TABLE` statements.
//!
//! Everything here is a pure function of metadata; no server access.

use crate::models::{ColumnMeta, PrimaryKeyMeta, ServerVersion, TableRef, escape_literal, quote_ident};

/// First server major version that understands `DROP TABLE IF EXISTS`.
pub const MODERN_DROP_MIN_VERSION: u32 = 13;

/// Which form of drop statement to emit for every table in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropSyntax {
    /// `DROP TABLE IF EXISTS`
    Modern,
    /// `IF OBJECT_ID(...) IS NOT NULL DROP TABLE`
    Legacy,
}

impl DropSyntax {
    /// Decides the drop form once per run.
    ///
    /// Returns `None` when no drop was requested. An unknown version always
    /// selects the legacy form.
    pub fn select(drop_requested: bool, version: ServerVersion) -> Option<Self> {
        if !drop_requested {
            return None;
        }
        match version.major() {
            Some(major) if major >= MODERN_DROP_MIN_VERSION => Some(Self::Modern),
            _ => Some(Self::Legacy),
        }
    }
}

/// Renders a column's type, e.g. `nvarchar(50)`, `varchar(MAX)`,
/// `decimal(18,2)` or plain `int`.
pub fn render_type(column: &ColumnMeta) -> String {
    let key = column.type_key();
    match key.as_str() {
        "varchar" | "char" | "nvarchar" | "nchar" if column.max_length == -1 => {
            format!("{}(MAX)", key)
        }
        "nvarchar" | "nchar" => format!("{}({})", key, column.max_length / 2),
        "varchar" | "char" => format!("{}({})", key, column.max_length),
        "decimal" | "numeric" => format!("{}({},{})", key, column.precision, column.scale),
        _ => key,
    }
}

/// Renders one column definition without trailing separator.
pub fn render_column(column: &ColumnMeta) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), render_type(column));

    def.push_str(if column.is_nullable { " NULL" } else { " NOT NULL" });

    if column.is_identity {
        let spec = column.identity.unwrap_or_default();
        def.push_str(&format!(" IDENTITY({},{})", spec.seed, spec.increment));
    }

    if let Some(default) = &column.default_definition {
        def.push_str(&format!(" DEFAULT ({})", default));
    }

    def
}

/// `CREATE TABLE` for `table` with columns in ordinal order.
pub fn build_create_table(table: &TableRef, columns: &[ColumnMeta]) -> String {
    let body = columns
        .iter()
        .map(|c| format!("    {}", render_column(c)))
        .collect::<Vec<_>>()
        .join(",\n");

    format!("CREATE TABLE {} (\n{}\n);", table.qualified(), body)
}

/// `ALTER TABLE ... ADD CONSTRAINT ... PRIMARY KEY`, or `None` without a key.
pub fn build_primary_key(table: &TableRef, pk: Option<&PrimaryKeyMeta>) -> Option<String> {
    let pk = pk.filter(|pk| !pk.columns.is_empty())?;
    let columns = pk
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
        table.qualified(),
        quote_ident(&pk.name),
        columns
    ))
}

/// Drop statement for `table` in the chosen syntax.
pub fn build_drop_table(table: &TableRef, syntax: DropSyntax) -> String {
    match syntax {
        DropSyntax::Modern => format!("DROP TABLE IF EXISTS {};", table.qualified()),
        DropSyntax::Legacy => format!(
            "IF OBJECT_ID(N'{}', N'U') IS NOT NULL DROP TABLE {};",
            escape_literal(&table.qualified()),
            table.qualified()
        ),
    }
}
