//! Table metadata produced by the introspector and consumed by the
//! DDL generator and row serializer.
//!
//! All of these are fetched fresh per table and never mutated after
//! construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema used when a table name is given without one.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Quotes an identifier with square brackets, doubling any closing bracket.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Escapes a value for use inside a single-quoted T-SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// A schema-qualified base table.
///
/// `Display` renders the plain `schema.table` key used in logs and notes;
/// [`TableRef::qualified`] renders the bracket-quoted form used in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    /// Creates a table reference from its parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses a user-supplied `table` or `schema.table` entry.
    ///
    /// Surrounding whitespace and bracket quoting are removed; an entry
    /// without a schema is placed in [`DEFAULT_SCHEMA`]. Returns `None` for
    /// an empty entry.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }

        let (schema, name) = match entry.split_once('.') {
            Some((schema, name)) => (unbracket(schema), unbracket(name)),
            None => (DEFAULT_SCHEMA.to_string(), unbracket(entry)),
        };

        if name.is_empty() {
            return None;
        }
        let schema = if schema.is_empty() {
            DEFAULT_SCHEMA.to_string()
        } else {
            schema
        };

        Some(Self { schema, name })
    }

    /// Bracket-quoted `[schema].[table]`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn unbracket(part: &str) -> String {
    let part = part.trim();
    part.strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .map_or_else(|| part.to_string(), |p| p.replace("]]", "]"))
}

/// Seed and increment of an identity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentitySpec {
    pub seed: i64,
    pub increment: i64,
}

/// One column of a base table, as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// 1-based ordinal; defines the canonical column order
    pub ordinal: u32,
    pub name: String,
    /// Native type name as reported by the server (e.g. `nvarchar`)
    pub type_name: String,
    /// Raw storage length in bytes, `-1` for MAX
    pub max_length: i32,
    pub precision: u8,
    pub scale: u8,
    pub is_nullable: bool,
    pub is_identity: bool,
    /// Present only when `is_identity` is set and the catalog recorded it
    pub identity: Option<IdentitySpec>,
    /// Default constraint definition text, verbatim
    pub default_definition: Option<String>,
}

impl ColumnMeta {
    /// Creates a nullable, non-identity column with no length information.
    pub fn new(ordinal: u32, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            type_name: type_name.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            identity: None,
            default_definition: None,
        }
    }

    /// Lower-cased type name used for dispatch.
    pub fn type_key(&self) -> String {
        self.type_name.trim().to_ascii_lowercase()
    }

    /// Whether the column holds `binary`, `varbinary` or `image` data.
    pub fn is_binary(&self) -> bool {
        matches!(self.type_key().as_str(), "binary" | "varbinary" | "image")
    }

    /// Builder method to set the storage length.
    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    /// Builder method to set precision and scale.
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Builder method to mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Builder method to mark the column as an identity column.
    pub fn with_identity(mut self, seed: i64, increment: i64) -> Self {
        self.is_identity = true;
        self.identity = Some(IdentitySpec { seed, increment });
        self
    }

    /// Builder method to set the default constraint text.
    pub fn with_default(mut self, definition: impl Into<String>) -> Self {
        self.default_definition = Some(definition.into());
        self
    }
}

/// Primary key constraint; columns are in key order, not column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyMeta {
    pub name: String,
    pub columns: Vec<String>,
}

/// Major version of the connected server, when it could be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerVersion {
    Known(u32),
    #[default]
    Unknown,
}

impl ServerVersion {
    /// Parses `ProductVersion`-style text such as `16.0.4135.4` or `13`.
    pub fn parse(text: &str) -> Self {
        text.trim()
            .split('.')
            .next()
            .and_then(|major| major.trim().parse::<u32>().ok())
            .map_or(Self::Unknown, Self::Known)
    }

    /// Major version number, if known.
    pub fn major(self) -> Option<u32> {
        match self {
            Self::Known(major) => Some(major),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(major) => write!(f, "{}", major),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
