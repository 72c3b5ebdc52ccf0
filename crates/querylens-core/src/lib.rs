//! QueryLens Core
//!
//! Stable domain types shared by the resolver and the CLI: the linked schema
//! model, the query tree, diagnostics, reports and configuration.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod csn;
pub mod diagnostic;
pub mod model;
pub mod query;
pub mod report;

pub use config::{Config, ConfigError, DialectConfig, FlattenConfig, InferenceConfig, SeverityThreshold};
pub use csn::ModelError;
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Severity};
pub use model::{
    Definition, DefinitionKind, Element, ElementKind, Elements, ForeignKey, HasElements, HasTarget,
    Leaf, Model, ScalarType,
};
pub use query::{
    Column, Delete, Expr, Insert, Join, JoinKind, Query, Ref, Segment, Select, SelectItem, Source,
    SourceRef, Update,
};
pub use report::{QueryOutcome, Report, ReportSummary, ReportVersion};
