//! SQL identifiers for derived tables
//!
//! Nothing client-controlled reaches DDL except through these types. Schema and
//! table names are validated against a strict pattern; column names come from
//! CSV headers and are sanitized and quoted instead.

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use super::error::IngestError;

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Synthetic primary key added to every derived table.
pub const ROW_ID_COLUMN: &str = "_row_id";

#[allow(clippy::expect_used)]
static SAFE_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

/// A schema or table name safe to splice into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeIdent(String);

impl SafeIdent {
    pub fn new(name: impl Into<String>) -> Result<Self, IngestError> {
        let name = name.into();
        if SAFE_IDENT.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(IngestError::InvalidIdentifier(name))
        }
    }

    /// `kb_<knowledge_base_id>`
    pub fn schema_for(knowledge_base_id: i64) -> Result<Self, IngestError> {
        Self::new(format!("kb_{}", knowledge_base_id))
    }

    /// `doc_<document_id>`
    pub fn table_for(document_id: i64) -> Result<Self, IngestError> {
        Self::new(format!("doc_{}", document_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders quoted, e.g. `"kb_7"`.
impl fmt::Display for SafeIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// A sanitized column name derived from a CSV header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName(String);

impl ColumnName {
    /// Unquoted name as stored in the catalog.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Delimited identifier with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

/// Turn a header row into distinct column names.
///
/// NUL bytes are stripped, empty headers become `column_<n>` (1-based) and
/// names are cut to [`MAX_IDENTIFIER_BYTES`]. Names that collide after that,
/// or with [`ROW_ID_COLUMN`], get a `_2`, `_3`, ... suffix.
pub fn column_names<S: AsRef<str>>(headers: &[S]) -> Vec<ColumnName> {
    let mut taken: HashSet<String> = HashSet::from([ROW_ID_COLUMN.to_string()]);
    let mut columns = Vec::with_capacity(headers.len());

    for (index, header) in headers.iter().enumerate() {
        let cleaned = header.as_ref().replace('\0', "");
        let base = if cleaned.trim().is_empty() {
            format!("column_{}", index + 1)
        } else {
            truncate_bytes(&cleaned, MAX_IDENTIFIER_BYTES).to_string()
        };

        let mut name = base.clone();
        let mut n = 2;
        while taken.contains(&name) {
            let suffix = format!("_{}", n);
            name = format!(
                "{}{}",
                truncate_bytes(&base, MAX_IDENTIFIER_BYTES - suffix.len()),
                suffix
            );
            n += 1;
        }

        taken.insert(name.clone());
        columns.push(ColumnName(name));
    }

    columns
}

/// Longest prefix of `s` of at most `max` bytes ending on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Single-quoted string literal for `COMMENT ON`, which takes no bind parameters.
pub fn comment_literal(text: &str) -> String {
    format!("'{}'", text.replace('\0', "").replace('\'', "''"))
}
