//! Check report (report.json)
//!
//! Written by `querylens check`. The layout is versioned; breaking changes
//! bump the major version.

use crate::diagnostic::{Diagnostic, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    pub major: u32,
    pub minor: u32,
}

impl ReportVersion {
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Counts over all checked queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub queries_checked: usize,
    pub queries_passed: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// Outcome of one named query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub version: ReportVersion,

    /// RFC 3339
    pub timestamp: String,

    pub summary: ReportSummary,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<QueryOutcome>,

    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary::default(),
            queries: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Add a diagnostic, counting errors and warnings
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => {}
        }
        self.diagnostics.push(diagnostic);
    }

    /// Record the outcome of one checked query
    pub fn record_query(&mut self, name: impl Into<String>, passed: bool) {
        self.summary.queries_checked += 1;
        if passed {
            self.summary.queries_passed += 1;
        }
        self.queries.push(QueryOutcome {
            name: name.into(),
            passed,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
