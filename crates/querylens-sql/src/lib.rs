//! Query inference and flattening
//!
//! This crate handles:
//! - Lowering SQL text into the query tree (datafusion-sqlparser-rs)
//! - Resolving references against the schema model and the query's sources
//! - Inferring the element map a query produces
//! - Flattening queries to plain table columns: structures become leaf
//!   columns, association paths become foreign-key columns, joins, `exists`
//!   subqueries and correlated subqueries

pub mod data;
pub mod elements;
pub mod error;
pub mod flatten;
pub mod inference;
pub mod joins;
pub mod parser;
pub mod resolver;
pub mod scope;
pub mod wildcard;

#[cfg(test)]
mod testing;

pub use elements::{ElementMap, InferredElement};
pub use error::ResolveError;
pub use flatten::QueryFlattener;
pub use inference::{InferredQuery, QueryInference};
pub use parser::{ParseError, ParsedSql, SqlParser};
pub use resolver::{ResolvedRef, Resolver};
pub use scope::{Binding, Scope, SourceTarget};
