//! Global row filter applied to every table's data query.
//!
//! The predicate is normalised once, when the run context is built, so every
//! query template receives the identical `WHERE <predicate>` text.

/// A single optional predicate shared by all tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalFilter {
    predicate: Option<String>,
}

impl GlobalFilter {
    /// Normalises raw user input.
    ///
    /// A leading `WHERE` keyword (any case) is removed together with
    /// surrounding whitespace. Blank input yields an empty filter.
    ///
    /// ```rust
    /// use tsqldump_core::filter::GlobalFilter;
    ///
    /// let bare = GlobalFilter::new("IsActive = 1");
    /// let keyed = GlobalFilter::new("  where IsActive = 1");
    /// assert_eq!(bare, keyed);
    /// assert_eq!(bare.where_clause(), " WHERE IsActive = 1");
    /// ```
    pub fn new(raw: &str) -> Self {
        let mut predicate = raw.trim();
        while let Some(rest) = strip_where_keyword(predicate) {
            predicate = rest;
        }

        Self {
            predicate: (!predicate.is_empty()).then(|| predicate.to_string()),
        }
    }

    /// Builds a filter from an optional CLI value.
    pub fn from_option(raw: Option<&str>) -> Self {
        raw.map(Self::new).unwrap_or_default()
    }

    /// The predicate without the keyword, if any.
    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    /// True when no predicate was given, so data queries run unfiltered.
    ///
    /// ```rust
    /// use tsqldump_core::filter::GlobalFilter;
    ///
    /// assert!(GlobalFilter::new("  WHERE  ").is_empty());
    /// assert!(!GlobalFilter::new("Id > 5").is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.predicate.is_none()
    }

    /// Clause to append to a `SELECT ... FROM <table>`; empty when no filter.
    pub fn where_clause(&self) -> String {
        self.predicate
            .as_ref()
            .map_or_else(String::new, |p| format!(" WHERE {}", p))
    }
}

fn strip_where_keyword(text: &str) -> Option<&str> {
    let head = text.get(..5)?;
    if !head.eq_ignore_ascii_case("where") {
        return None;
    }
    let rest = &text[5..];
    // `WHEREAS = 1` is a predicate on a column, not a keyword.
    if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
        Some(rest.trim_start())
    } else {
        None
    }
}
