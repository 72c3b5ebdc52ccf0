//! Resolution errors
//!
//! Every variant renders the exact wording callers match on, so the
//! `#[error]` attributes below are the only place messages are formatted.

use querylens_core::{Diagnostic, DiagnosticCode, Location, Severity};

/// Error raised while inferring or flattening a query. All of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// First segment of a path is not an element of any source
    #[error("\"{}\" not found in the elements of {}", .name, quoted(.sources))]
    NotFoundInElements { name: String, sources: Vec<String> },

    /// Later segment of a path is not an element of the previous step
    #[error("\"{name}\" not found in \"{scope}\"")]
    NotFoundIn { name: String, scope: String },

    /// Query source names no definition
    #[error("\"{name}\" not found in the definitions of your model")]
    DefinitionNotFound { name: String },

    /// `$self.<name>` with no such select-list column
    #[error("\"{}\" not found in the columns list of query{}", .name, did_you_mean(.suggestion))]
    NotFoundInColumns {
        name: String,
        suggestion: Option<String>,
    },

    #[error("ambiguous reference to \"{}\", write {} instead", .name, quoted(.candidates))]
    AmbiguousReference { name: String, candidates: Vec<String> },

    /// Names introduced by `*` from more than one source, with their qualified forms
    #[error("Ambiguous wildcard elements:{}", wildcard_lines(.collisions))]
    AmbiguousWildcard { collisions: Vec<(String, Vec<String>)> },

    #[error("Duplicate alias \"{alias}\"")]
    DuplicateAlias { alias: String },

    #[error("Duplicate definition of element \"{name}\"")]
    DuplicateDefinition { name: String },

    #[error("A filter can only be provided when navigating along associations, but found \"{segment}\"")]
    FilterOnNonAssociation { segment: String },

    #[error("Only foreign keys of \"{association}\" can be accessed in infix filter, but found \"{name}\"")]
    OnlyForeignKeysInFilter { association: String, name: String },

    #[error("Paths starting with \"$self\" must not contain steps of type \"cds.Association\": ref: {}", ref_list(.path))]
    SelfPathThroughAssociation { path: Vec<String> },

    #[error("Expecting expression to have an alias name")]
    AliasRequired,

    #[error("Structured elements can't be cast to a different type, but found \"{path}\"")]
    StructuredCastNotAllowed { path: String },

    #[error("A structured element can't be used as a value in an expression, but found \"{path}\"")]
    StructInExpression { path: String },

    #[error("An association can't be used as a value in an expression, but found \"{path}\"")]
    AssociationInExpression { path: String },

    #[error("\"{path}\" can't be used in order by as it expands to multiple fields")]
    OrderByMultiField { path: String },

    #[error("Query source must be an entity or an association, but found \"{path}\"")]
    InvalidQuerySource { path: String },

    #[error("Unsupported construct: {0}")]
    Unsupported(String),
}

fn quoted(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("\"{}\"", item))
        .collect::<Vec<_>>()
        .join(", ")
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(alternative) => format!(", did you mean \"{}\"?", alternative),
        None => String::new(),
    }
}

fn ref_list(path: &[String]) -> String {
    format!("[ {} ]", path.join(", "))
}

fn wildcard_lines(collisions: &[(String, Vec<String>)]) -> String {
    collisions
        .iter()
        .map(|(name, qualified)| {
            format!("\n    select \"{}\" explicitly with {}", name, quoted(qualified))
        })
        .collect()
}

impl ResolveError {
    /// Stable diagnostic code for this error kind
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::NotFoundInElements { .. }
            | Self::NotFoundIn { .. }
            | Self::DefinitionNotFound { .. }
            | Self::NotFoundInColumns { .. } => DiagnosticCode::RefNotFound,
            Self::AmbiguousReference { .. } => DiagnosticCode::RefAmbiguous,
            Self::AmbiguousWildcard { .. } => DiagnosticCode::WildcardAmbiguous,
            Self::DuplicateAlias { .. } => DiagnosticCode::AliasDuplicate,
            Self::DuplicateDefinition { .. } => DiagnosticCode::ElementDuplicate,
            Self::FilterOnNonAssociation { .. } => DiagnosticCode::FilterNonAssociation,
            Self::OnlyForeignKeysInFilter { .. } => DiagnosticCode::FilterOnlyForeignKeys,
            Self::SelfPathThroughAssociation { .. } => DiagnosticCode::SelfPathAssociation,
            Self::AliasRequired => DiagnosticCode::AliasRequired,
            Self::StructuredCastNotAllowed { .. } => DiagnosticCode::CastStructured,
            Self::StructInExpression { .. } => DiagnosticCode::ExprStructured,
            Self::AssociationInExpression { .. } => DiagnosticCode::ExprAssociation,
            Self::OrderByMultiField { .. } => DiagnosticCode::OrderByMultiField,
            Self::InvalidQuerySource { .. } => DiagnosticCode::QuerySourceInvalid,
            Self::Unsupported(_) => DiagnosticCode::UnsupportedConstruct,
        }
    }

    /// Name or path the error is about, if any
    pub fn subject(&self) -> Option<String> {
        match self {
            Self::NotFoundInElements { name, .. }
            | Self::NotFoundIn { name, .. }
            | Self::DefinitionNotFound { name }
            | Self::NotFoundInColumns { name, .. }
            | Self::AmbiguousReference { name, .. }
            | Self::DuplicateDefinition { name }
            | Self::OnlyForeignKeysInFilter { name, .. } => Some(name.clone()),
            Self::DuplicateAlias { alias } => Some(alias.clone()),
            Self::FilterOnNonAssociation { segment } => Some(segment.clone()),
            Self::SelfPathThroughAssociation { path } => Some(path.join(".")),
            Self::StructuredCastNotAllowed { path }
            | Self::StructInExpression { path }
            | Self::AssociationInExpression { path }
            | Self::OrderByMultiField { path }
            | Self::InvalidQuerySource { path } => Some(path.clone()),
            Self::AmbiguousWildcard { .. } | Self::AliasRequired | Self::Unsupported(_) => None,
        }
    }

    /// Convert to a QueryLens diagnostic
    pub fn to_diagnostic(&self, location: Option<Location>) -> Diagnostic {
        let mut diag = Diagnostic::new(self.code(), Severity::Error, self.to_string());

        if let Some(subject) = self.subject() {
            diag = diag.with_subject(subject);
        }

        let candidates = match self {
            Self::AmbiguousReference { candidates, .. } => candidates.clone(),
            Self::AmbiguousWildcard { collisions } => collisions
                .iter()
                .flat_map(|(_, qualified)| qualified.iter().cloned())
                .collect(),
            Self::NotFoundInColumns {
                suggestion: Some(s),
                ..
            } => vec![s.clone()],
            _ => Vec::new(),
        };
        if !candidates.is_empty() {
            diag = diag.with_candidates(candidates);
        }

        if let Some(loc) = location {
            diag = diag.with_location(loc);
        }

        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_wordings() {
        let err = ResolveError::NotFoundInElements {
            name: "foo".to_string(),
            sources: vec!["bookshop.Books".to_string(), "bookshop.Authors".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "\"foo\" not found in the elements of \"bookshop.Books\", \"bookshop.Authors\""
        );

        let err = ResolveError::NotFoundIn {
            name: "bar".to_string(),
            scope: "author".to_string(),
        };
        assert_eq!(err.to_string(), "\"bar\" not found in \"author\"");

        let err = ResolveError::NotFoundInColumns {
            name: "title".to_string(),
            suggestion: Some("Books.title".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "\"title\" not found in the columns list of query, did you mean \"Books.title\"?"
        );
    }

    #[test]
    fn ambiguity_wordings() {
        let err = ResolveError::AmbiguousReference {
            name: "ID".to_string(),
            candidates: vec!["Books.ID".to_string(), "Authors.ID".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "ambiguous reference to \"ID\", write \"Books.ID\", \"Authors.ID\" instead"
        );

        let err = ResolveError::AmbiguousWildcard {
            collisions: vec![
                ("ID".to_string(), vec!["A.ID".to_string(), "B.ID".to_string()]),
                ("name".to_string(), vec!["A.name".to_string(), "B.name".to_string()]),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Ambiguous wildcard elements:\n    select \"ID\" explicitly with \"A.ID\", \"B.ID\"\n    select \"name\" explicitly with \"A.name\", \"B.name\""
        );
    }

    #[test]
    fn self_path_wording() {
        let err = ResolveError::SelfPathThroughAssociation {
            path: vec!["$self".to_string(), "author".to_string(), "name".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Paths starting with \"$self\" must not contain steps of type \"cds.Association\": ref: [ $self, author, name ]"
        );
    }

    #[test]
    fn diagnostic_conversion() {
        let err = ResolveError::DuplicateDefinition {
            name: "ID".to_string(),
        };
        let diag = err.to_diagnostic(Some(Location::query("queries.json", "dup")));

        assert_eq!(diag.code, DiagnosticCode::ElementDuplicate);
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.message, "Duplicate definition of element \"ID\"");
        assert_eq!(diag.subject.as_deref(), Some("ID"));
        assert!(diag.location.is_some());
    }
}
