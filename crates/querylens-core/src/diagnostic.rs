//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Reference resolution (1xxx)
    /// A path segment, alias or definition does not exist
    RefNotFound,

    /// A name is found in more than one source
    RefAmbiguous,

    /// A wildcard introduces the same name from several sources
    WildcardAmbiguous,

    /// Two sources of one query share an alias
    AliasDuplicate,

    /// Two output columns share a name
    ElementDuplicate,

    // Filters and pseudo paths (2xxx)
    /// Infix filter after a step that is not an association
    FilterNonAssociation,

    /// Navigation filter reaches beyond the association's foreign keys
    FilterOnlyForeignKeys,

    /// `$self` path continues through an association
    SelfPathAssociation,

    // Column shape (3xxx)
    /// Expression column without a derivable name
    AliasRequired,

    /// Cast applied to a structured element
    CastStructured,

    /// Structured element used as a scalar operand
    ExprStructured,

    /// Association used as a scalar operand
    ExprAssociation,

    /// ORDER BY reference expands to several columns
    OrderByMultiField,

    // Query shape (4xxx)
    /// Scoped source does not end on an entity
    QuerySourceInvalid,

    /// UNION, multi-source flattening and friends
    UnsupportedConstruct,

    // Inputs (9xxx)
    /// Failed to parse SQL text
    SqlParseError,

    /// Failed to load the schema model
    ModelError,

    /// General informational message
    Info,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefNotFound => "REF_NOT_FOUND",
            Self::RefAmbiguous => "REF_AMBIGUOUS",
            Self::WildcardAmbiguous => "WILDCARD_AMBIGUOUS",
            Self::AliasDuplicate => "ALIAS_DUPLICATE",
            Self::ElementDuplicate => "ELEMENT_DUPLICATE",
            Self::FilterNonAssociation => "FILTER_NON_ASSOCIATION",
            Self::FilterOnlyForeignKeys => "FILTER_ONLY_FOREIGN_KEYS",
            Self::SelfPathAssociation => "SELF_PATH_ASSOCIATION",
            Self::AliasRequired => "ALIAS_REQUIRED",
            Self::CastStructured => "CAST_STRUCTURED",
            Self::ExprStructured => "EXPR_STRUCTURED",
            Self::ExprAssociation => "EXPR_ASSOCIATION",
            Self::OrderByMultiField => "ORDER_BY_MULTI_FIELD",
            Self::QuerySourceInvalid => "QUERY_SOURCE_INVALID",
            Self::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            Self::SqlParseError => "SQL_PARSE_ERROR",
            Self::ModelError => "MODEL_ERROR",
            Self::Info => "INFO",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - blocking issue that should fail CI
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Where a diagnostic originates: a query file and, optionally, a named query in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to the working directory
    pub file: String,

    /// Name of the query inside the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Optional line number (1-indexed), for SQL text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    /// Optional column number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            query: None,
            line: None,
            column: None,
        }
    }

    /// Location of a named query in a file
    pub fn query(file: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::new(file)
        }
    }

    /// Create a location with file, line, and column
    pub fn with_position(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            ..Self::new(file)
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Offending path or name, when the error names one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Qualified alternatives the user could write instead
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            subject: None,
            candidates: Vec::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the offending path or name
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the suggested alternatives
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        // Ensure codes are stable strings
        assert_eq!(DiagnosticCode::RefNotFound.as_str(), "REF_NOT_FOUND");
        assert_eq!(DiagnosticCode::OrderByMultiField.as_str(), "ORDER_BY_MULTI_FIELD");
        assert_eq!(
            serde_json::to_string(&DiagnosticCode::WildcardAmbiguous).unwrap(),
            "\"WILDCARD_AMBIGUOUS\""
        );
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::RefAmbiguous,
            Severity::Error,
            "ambiguous reference to \"ID\"",
        )
        .with_location(Location::query("queries.json", "booksAndAuthors"))
        .with_subject("ID")
        .with_candidates(vec!["Books.ID".to_string(), "Authors.ID".to_string()]);

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("REF_AMBIGUOUS"));
        assert!(json.contains("booksAndAuthors"));
        assert!(json.contains("Authors.ID"));
        assert!(json.contains("error"));
    }
}
