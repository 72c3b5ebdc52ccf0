//! SQL front end using datafusion-sqlparser-rs
//!
//! Parses SQL text and lowers a `SELECT` statement into the query tree the
//! inference and flattening passes operate on. Path expressions are written
//! as compound identifiers (`author.name`), column casts as `CAST(x AS T)`.

use querylens_core::model::ScalarType;
use querylens_core::query::{
    Column, Expr, Join, JoinKind, Limit, NullsOrder, OrderBy, Param, Query, Ref, Segment, Select, SelectItem,
    SetOperation, SetSource, SortOrder, Source, SourceRef, SubQuerySource,
};
use querylens_core::{Diagnostic, DiagnosticCode, DialectConfig, Location, Severity};
use sqlparser::ast;
use sqlparser::dialect::{BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::parser::{Parser, ParserError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    pub fn bigquery() -> Self {
        Self {
            dialect: Box::new(BigQueryDialect {}),
        }
    }

    pub fn postgres() -> Self {
        Self {
            dialect: Box::new(PostgreSqlDialect {}),
        }
    }

    pub fn snowflake() -> Self {
        Self {
            dialect: Box::new(SnowflakeDialect {}),
        }
    }

    pub fn duckdb() -> Self {
        Self {
            dialect: Box::new(DuckDbDialect {}),
        }
    }

    /// Create a parser from a dialect config
    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        match dialect {
            DialectConfig::BigQuery => Self::bigquery(),
            DialectConfig::Snowflake => Self::snowflake(),
            DialectConfig::Postgres => Self::postgres(),
            DialectConfig::DuckDb => Self::duckdb(),
            DialectConfig::Ansi => Self::new(),
        }
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str, file_path: Option<&Path>) -> Result<ParsedSql, ParseError> {
        let statements = Parser::parse_sql(&*self.dialect, sql).map_err(|error| ParseError::Syntax {
            error,
            file_path: file_path.map(Path::to_path_buf),
        })?;

        Ok(ParsedSql {
            sql: sql.to_string(),
            statements,
            file_path: file_path.map(Path::to_path_buf),
        })
    }

    /// Parse SQL from a file
    pub fn parse_file(&self, path: &Path) -> Result<ParsedSql, ParseError> {
        let sql = std::fs::read_to_string(path).map_err(|e| ParseError::Syntax {
            error: ParserError::ParserError(format!("Failed to read file: {}", e)),
            file_path: Some(path.to_path_buf()),
        })?;

        self.parse(&sql, Some(path))
    }

    /// Parse a single `SELECT` statement into a query tree
    pub fn parse_query(&self, sql: &str) -> Result<Query, ParseError> {
        let parsed = self.parse(sql, None)?;
        let query = parsed.to_query()?;
        tracing::debug!(statements = parsed.statement_count(), "lowered SQL to query tree");
        Ok(query)
    }

    /// Parse a query and return a diagnostic on error
    pub fn parse_with_diagnostic(&self, sql: &str) -> Result<Query, Diagnostic> {
        self.parse_query(sql).map_err(|e| e.to_diagnostic())
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    pub statements: Vec<ast::Statement>,

    /// Source file path (if parsed from file)
    pub file_path: Option<PathBuf>,
}

impl ParsedSql {
    pub fn first_statement(&self) -> Option<&ast::Statement> {
        self.statements.first()
    }

    pub fn is_select(&self) -> bool {
        matches!(self.first_statement(), Some(ast::Statement::Query(_)))
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Lower the first statement; only queries are accepted
    pub fn to_query(&self) -> Result<Query, ParseError> {
        match self.first_statement() {
            Some(ast::Statement::Query(query)) => Ok(Query::Select(lower_query(query)?)),
            Some(other) => Err(ParseError::UnsupportedStatement(statement_kind(other))),
            None => Err(ParseError::UnsupportedStatement("empty input".to_string())),
        }
    }
}

/// SQL parsing or lowering error
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("SQL parse error: {error}")]
    Syntax {
        error: ParserError,
        file_path: Option<PathBuf>,
    },

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),
}

impl ParseError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Syntax { error, file_path } => {
                let mut diag = Diagnostic::new(
                    DiagnosticCode::SqlParseError,
                    Severity::Error,
                    format!("Failed to parse SQL: {}", error),
                );
                if let Some(path) = file_path {
                    diag = diag.with_location(Location::new(path.display().to_string()));
                }
                diag
            }
            Self::UnsupportedStatement(_) | Self::Unsupported(_) => {
                Diagnostic::new(DiagnosticCode::UnsupportedConstruct, Severity::Error, self.to_string())
            }
        }
    }

    /// Check if this is an unsupported syntax error
    pub fn is_unsupported_syntax(&self) -> bool {
        match self {
            Self::Syntax { error, .. } => {
                let error_msg = error.to_string().to_lowercase();
                error_msg.contains("expected") || error_msg.contains("unexpected")
            }
            _ => true,
        }
    }
}

fn unsupported(what: impl std::fmt::Display) -> ParseError {
    ParseError::Unsupported(what.to_string())
}

fn statement_kind(statement: &ast::Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn lower_query(query: &ast::Query) -> Result<Select, ParseError> {
    if query.with.is_some() {
        return Err(unsupported("WITH clause"));
    }

    let mut select = lower_set_expr(&query.body)?;

    if let Some(order_by) = &query.order_by {
        select.order_by = order_by.exprs.iter().map(lower_order_by).collect::<Result<_, _>>()?;
    }

    if let Some(rows) = &query.limit {
        select.limit = Some(Limit {
            rows: value(rows)?,
            offset: query.offset.as_ref().map(|o| value(&o.value)).transpose()?,
        });
    } else if query.offset.is_some() {
        return Err(unsupported("OFFSET without LIMIT"));
    }

    Ok(select)
}

fn lower_set_expr(body: &ast::SetExpr) -> Result<Select, ParseError> {
    match body {
        ast::SetExpr::Select(select) => lower_select(select),
        ast::SetExpr::Query(query) => lower_query(query),
        ast::SetExpr::SetOperation { op, left, right, .. } => Ok(Select::from_source(Source::Set(SetSource {
            set: SetOperation {
                op: op.to_string().to_lowercase(),
                args: vec![Query::Select(lower_set_expr(left)?), Query::Select(lower_set_expr(right)?)],
            },
        }))),
        other => Err(unsupported(format!("query body {}", other))),
    }
}

fn lower_select(select: &ast::Select) -> Result<Select, ParseError> {
    let mut out = Select::from_source(lower_from(&select.from)?);
    out.distinct = select.distinct.is_some();

    let mut columns = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            ast::SelectItem::UnnamedExpr(expr) => columns.push(lower_column(expr, None)?),
            ast::SelectItem::ExprWithAlias { expr, alias } => columns.push(lower_column(expr, Some(&alias.value))?),
            ast::SelectItem::Wildcard(options) => {
                columns.push(SelectItem::wildcard());
                match &options.opt_exclude {
                    Some(ast::ExcludeSelectItem::Single(ident)) => out.excluding.push(ident.value.clone()),
                    Some(ast::ExcludeSelectItem::Multiple(idents)) => {
                        out.excluding.extend(idents.iter().map(|ident| ident.value.clone()))
                    }
                    None => {}
                }
            }
            other => return Err(unsupported(format!("select item {}", other))),
        }
    }
    out.columns = Some(columns);

    if let Some(selection) = &select.selection {
        out.where_clause = Some(tokens(selection)?);
    }

    match &select.group_by {
        ast::GroupByExpr::Expressions(exprs, _) => {
            out.group_by = exprs.iter().map(value).collect::<Result<_, _>>()?;
        }
        ast::GroupByExpr::All(_) => return Err(unsupported("GROUP BY ALL")),
    }

    if let Some(having) = &select.having {
        out.having = Some(tokens(having)?);
    }

    Ok(out)
}

fn lower_column(expr: &ast::Expr, alias: Option<&str>) -> Result<SelectItem, ParseError> {
    let mut column = match expr {
        ast::Expr::Cast { expr, data_type, .. } => Column::new(value(expr)?).with_cast(lower_type(data_type)?),
        other => Column::new(value(other)?),
    };
    if let Some(alias) = alias {
        column = column.with_alias(alias);
    }
    Ok(column.into())
}

fn lower_order_by(item: &ast::OrderByExpr) -> Result<OrderBy, ParseError> {
    let mut order_by = OrderBy::new(value(&item.expr)?);
    order_by.sort = item.asc.map(|asc| if asc { SortOrder::Asc } else { SortOrder::Desc });
    order_by.nulls = item
        .nulls_first
        .map(|first| if first { NullsOrder::First } else { NullsOrder::Last });
    Ok(order_by)
}

fn lower_from(from: &[ast::TableWithJoins]) -> Result<Source, ParseError> {
    let mut sources = from.iter().map(lower_table_with_joins).collect::<Result<Vec<_>, _>>()?;
    match sources.len() {
        0 => Err(unsupported("SELECT without FROM")),
        1 => Ok(sources.remove(0)),
        _ => Ok(Source::cross(sources)),
    }
}

fn lower_table_with_joins(table: &ast::TableWithJoins) -> Result<Source, ParseError> {
    let mut source = lower_table_factor(&table.relation)?;
    for join in &table.joins {
        let (kind, constraint) = match &join.join_operator {
            ast::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
            ast::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
            ast::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
            ast::JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
            ast::JoinOperator::CrossJoin => (JoinKind::Cross, None),
            other => return Err(unsupported(format!("join operator {:?}", other))),
        };
        let on = match constraint {
            Some(ast::JoinConstraint::On(expr)) => Some(tokens(expr)?),
            Some(ast::JoinConstraint::None) | None => None,
            Some(_) => return Err(unsupported("join constraint other than ON")),
        };
        source = Source::Join(Join {
            join: kind,
            args: vec![source, lower_table_factor(&join.relation)?],
            on,
        });
    }
    Ok(source)
}

fn lower_table_factor(factor: &ast::TableFactor) -> Result<Source, ParseError> {
    match factor {
        ast::TableFactor::Table { name, alias, .. } => {
            let entity = name.0.iter().map(|ident| ident.value.as_str()).collect::<Vec<_>>().join(".");
            let mut source = SourceRef::entity(entity);
            if let Some(alias) = alias {
                source = source.with_alias(alias.name.value.clone());
            }
            Ok(Source::Ref(source))
        }
        ast::TableFactor::Derived { subquery, alias, .. } => Ok(Source::SubQuery(SubQuerySource {
            select: Box::new(lower_query(subquery)?),
            alias: alias.as_ref().map(|alias| alias.name.value.clone()),
        })),
        other => Err(unsupported(format!("table factor {}", other))),
    }
}

/// A single operand: one token as is, several wrapped in an `xpr`
fn value(expr: &ast::Expr) -> Result<Expr, ParseError> {
    let mut tokens = tokens(expr)?;
    if tokens.len() == 1 {
        return Ok(tokens.remove(0));
    }
    Ok(Expr::xpr(tokens))
}

/// Token sequence in source order; parentheses become nested `xpr`s
fn tokens(expr: &ast::Expr) -> Result<Vec<Expr>, ParseError> {
    let mut out = Vec::new();
    push_tokens(expr, &mut out)?;
    Ok(out)
}

fn push_tokens(expr: &ast::Expr, out: &mut Vec<Expr>) -> Result<(), ParseError> {
    match expr {
        ast::Expr::Identifier(ident) => out.push(Expr::path(&[ident.value.as_str()])),
        ast::Expr::CompoundIdentifier(idents) => out.push(Expr::Ref(Ref {
            segments: idents.iter().map(|ident| Segment::new(ident.value.clone())).collect(),
        })),
        ast::Expr::Value(v) => out.push(literal(v)?),
        ast::Expr::Nested(inner) => out.push(Expr::xpr(tokens(inner)?)),
        ast::Expr::BinaryOp { left, op, right } => {
            push_tokens(left, out)?;
            out.push(Expr::op(op.to_string().to_lowercase()));
            push_tokens(right, out)?;
        }
        ast::Expr::UnaryOp { op, expr } => {
            out.push(Expr::op(op.to_string().to_lowercase()));
            out.push(value(expr)?);
        }
        ast::Expr::IsNull(inner) => {
            push_tokens(inner, out)?;
            out.extend([Expr::op("is"), Expr::op("null")]);
        }
        ast::Expr::IsNotNull(inner) => {
            push_tokens(inner, out)?;
            out.extend([Expr::op("is"), Expr::op("not"), Expr::op("null")]);
        }
        ast::Expr::InList { expr, list, negated } => {
            push_tokens(expr, out)?;
            push_negation(*negated, out);
            out.push(Expr::op("in"));
            out.push(Expr::list(list.iter().map(value).collect::<Result<_, _>>()?));
        }
        ast::Expr::InSubquery { expr, subquery, negated } => {
            push_tokens(expr, out)?;
            push_negation(*negated, out);
            out.push(Expr::op("in"));
            out.push(Expr::select(lower_query(subquery)?));
        }
        ast::Expr::Between { expr, negated, low, high } => {
            push_tokens(expr, out)?;
            push_negation(*negated, out);
            out.push(Expr::op("between"));
            push_tokens(low, out)?;
            out.push(Expr::op("and"));
            push_tokens(high, out)?;
        }
        ast::Expr::Like { negated, expr, pattern, .. } => {
            push_tokens(expr, out)?;
            push_negation(*negated, out);
            out.push(Expr::op("like"));
            push_tokens(pattern, out)?;
        }
        ast::Expr::Exists { subquery, negated } => {
            push_negation(*negated, out);
            out.push(Expr::op("exists"));
            out.push(Expr::select(lower_query(subquery)?));
        }
        ast::Expr::Subquery(subquery) => out.push(Expr::select(lower_query(subquery)?)),
        ast::Expr::Function(function) => out.push(lower_function(function)?),
        ast::Expr::Cast { .. } => return Err(unsupported("CAST inside an expression")),
        other => return Err(unsupported(format!("expression {}", other))),
    }
    Ok(())
}

fn push_negation(negated: bool, out: &mut Vec<Expr>) {
    if negated {
        out.push(Expr::op("not"));
    }
}

fn lower_function(function: &ast::Function) -> Result<Expr, ParseError> {
    let args = match &function.args {
        ast::FunctionArguments::None => Vec::new(),
        ast::FunctionArguments::Subquery(query) => vec![Expr::select(lower_query(query)?)],
        ast::FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr)) => value(expr),
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => Ok(Expr::op("*")),
                other => Err(unsupported(format!("function argument {}", other))),
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(Expr::func(function.name.to_string().to_lowercase(), args))
}

fn literal(v: &ast::Value) -> Result<Expr, ParseError> {
    Ok(match v {
        ast::Value::Number(n, _) => match n.parse::<i64>() {
            Ok(i) => Expr::val(i),
            Err(_) => {
                let f: f64 = n.parse().map_err(|_| unsupported(format!("numeric literal {}", n)))?;
                Expr::val(f)
            }
        },
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => Expr::val(s.clone()),
        ast::Value::Boolean(b) => Expr::val(*b),
        ast::Value::Null => Expr::val(serde_json::Value::Null),
        ast::Value::Placeholder(p) => placeholder(p),
        other => return Err(unsupported(format!("literal {}", other))),
    })
}

/// `?` is positional; `:name`, `@name` and `$1` are named
fn placeholder(token: &str) -> Expr {
    if token == "?" {
        return Expr::param();
    }
    let name = token.trim_start_matches(&[':', '@', '$'][..]);
    Expr::Param(Param {
        name: Some(name.to_string()),
        value: None,
    })
}

fn lower_type(data_type: &ast::DataType) -> Result<ScalarType, ParseError> {
    use ast::DataType;

    Ok(match data_type {
        DataType::SmallInt(_) | DataType::Int(_) | DataType::Integer(_) => ScalarType::new("cds.Integer"),
        DataType::BigInt(_) => ScalarType::new("cds.Integer64"),
        DataType::Float(_) | DataType::Real | DataType::Double | DataType::DoublePrecision => {
            ScalarType::new("cds.Double")
        }
        DataType::Decimal(info) | DataType::Numeric(info) => {
            let decimal = ScalarType::new("cds.Decimal");
            match info {
                ast::ExactNumberInfo::None => decimal,
                ast::ExactNumberInfo::Precision(p) => decimal.with_precision(narrow(*p)?, None),
                ast::ExactNumberInfo::PrecisionAndScale(p, s) => {
                    decimal.with_precision(narrow(*p)?, Some(narrow(*s)?))
                }
            }
        }
        DataType::Boolean => ScalarType::new("cds.Boolean"),
        DataType::Char(length) | DataType::Varchar(length) => {
            let string = ScalarType::new("cds.String");
            match length {
                Some(ast::CharacterLength::IntegerLength { length, .. }) => string.with_length(narrow(*length)?),
                _ => string,
            }
        }
        DataType::String(length) => {
            let string = ScalarType::new("cds.String");
            match length {
                Some(length) => string.with_length(narrow(*length)?),
                None => string,
            }
        }
        DataType::Text => ScalarType::new("cds.LargeString"),
        DataType::Uuid => ScalarType::new("cds.UUID"),
        DataType::Date => ScalarType::new("cds.Date"),
        DataType::Time(_, _) => ScalarType::new("cds.Time"),
        DataType::Timestamp(_, _) => ScalarType::new("cds.Timestamp"),
        DataType::Datetime(_) => ScalarType::new("cds.DateTime"),
        DataType::Blob(_) | DataType::Bytea => ScalarType::new("cds.LargeBinary"),
        other => return Err(unsupported(format!("cast to {}", other))),
    })
}

fn narrow<N>(n: N) -> Result<u32, ParseError>
where
    N: Copy + std::fmt::Display,
    u32: TryFrom<N>,
{
    u32::try_from(n).map_err(|_| unsupported(format!("type argument {}", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn select(sql: &str) -> Select {
        match SqlParser::new().parse_query(sql).unwrap() {
            Query::Select(select) => select,
            other => panic!("expected a select, got {:?}", other),
        }
    }

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let parsed = parser.parse("SELECT id, name FROM users WHERE active = true", None).unwrap();
        assert_eq!(parsed.statement_count(), 1);
        assert!(parsed.is_select());
    }

    #[test]
    fn lowers_paths_and_clauses() {
        let lowered = select("SELECT ID, author.name AS writer FROM Books WHERE stock > 10 ORDER BY title DESC LIMIT 5");

        let mut expected = Select::from_entity("Books")
            .with_columns(vec![
                SelectItem::path(&["ID"]),
                Column::path(&["author", "name"]).with_alias("writer").into(),
            ])
            .with_where(vec![Expr::path(&["stock"]), Expr::op(">"), Expr::val(10)])
            .with_order_by(vec![OrderBy::new(Expr::path(&["title"])).desc()]);
        expected.limit = Some(Limit {
            rows: Expr::val(5),
            offset: None,
        });

        assert_eq!(lowered, expected);
    }

    #[test]
    fn wildcard_with_exclude() {
        let lowered = select("SELECT * EXCLUDE (image, texts) FROM Books");
        assert_eq!(lowered.columns, Some(vec![SelectItem::wildcard()]));
        assert_eq!(lowered.excluding, vec!["image", "texts"]);
    }

    #[test]
    fn column_cast_keeps_precision() {
        let lowered = select("SELECT CAST(price AS DECIMAL(10, 3)) AS price2 FROM Books");
        assert_eq!(
            lowered.columns,
            Some(vec![Column::path(&["price"])
                .with_cast(ScalarType::new("cds.Decimal").with_precision(10, Some(3)))
                .with_alias("price2")
                .into()])
        );
    }

    #[test]
    fn placeholders_become_params() {
        let lowered = select("SELECT ID FROM Books WHERE ID = ? AND title = $1");
        assert_eq!(
            lowered.where_clause,
            Some(vec![
                Expr::path(&["ID"]),
                Expr::op("="),
                Expr::param(),
                Expr::op("and"),
                Expr::path(&["title"]),
                Expr::op("="),
                Expr::Param(Param {
                    name: Some("1".to_string()),
                    value: None,
                }),
            ])
        );
    }

    #[test]
    fn parenthesized_conditions_nest() {
        let lowered = select("SELECT ID FROM Books WHERE (stock > 1 OR stock IS NULL) AND ID IN (1, 2)");
        assert_eq!(
            lowered.where_clause,
            Some(vec![
                Expr::xpr(vec![
                    Expr::path(&["stock"]),
                    Expr::op(">"),
                    Expr::val(1),
                    Expr::op("or"),
                    Expr::path(&["stock"]),
                    Expr::op("is"),
                    Expr::op("null"),
                ]),
                Expr::op("and"),
                Expr::path(&["ID"]),
                Expr::op("in"),
                Expr::list(vec![Expr::val(1), Expr::val(2)]),
            ])
        );
    }

    #[test]
    fn joins_and_exists_subqueries() {
        let lowered = select(
            "SELECT b.title, a.name FROM Books AS b JOIN Authors AS a ON a.ID = b.author_ID \
             WHERE EXISTS (SELECT 1 FROM Texts WHERE locale = 'de')",
        );

        assert_eq!(
            lowered.from,
            Source::Join(Join {
                join: JoinKind::Inner,
                args: vec![Source::entity_as("Books", "b"), Source::entity_as("Authors", "a")],
                on: Some(vec![Expr::path(&["a", "ID"]), Expr::op("="), Expr::path(&["b", "author_ID"])]),
            })
        );

        let texts = Select::from_entity("Texts")
            .with_columns(vec![Column::new(Expr::val(1)).into()])
            .with_where(vec![Expr::path(&["locale"]), Expr::op("="), Expr::val("de")]);
        assert_eq!(lowered.where_clause, Some(vec![Expr::op("exists"), Expr::select(texts)]));
    }

    #[test]
    fn comma_joined_tables_are_cross_joined() {
        let lowered = select("SELECT * FROM Books, Authors");
        assert_eq!(
            lowered.from,
            Source::cross(vec![Source::entity("Books"), Source::entity("Authors")])
        );
    }

    #[test]
    fn functions_are_lowercased() {
        let lowered = select("SELECT COUNT(*) AS n FROM Books GROUP BY genre.ID");
        assert_eq!(
            lowered.columns,
            Some(vec![Column::new(Expr::func("count", vec![Expr::op("*")])).with_alias("n").into()])
        );
        assert_eq!(lowered.group_by, vec![Expr::path(&["genre", "ID"])]);
    }

    #[test]
    fn union_becomes_set_source() {
        let lowered = select("SELECT ID FROM Books UNION SELECT ID FROM Authors");
        match lowered.from {
            Source::Set(set) => {
                assert_eq!(set.set.op, "union");
                assert_eq!(set.set.args.len(), 2);
            }
            other => panic!("expected a set source, got {:?}", other),
        }
    }

    #[test]
    fn non_select_statements_are_rejected() {
        let err = SqlParser::new().parse_query("DELETE FROM Books").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported statement: DELETE");
        assert_eq!(err.to_diagnostic().code, DiagnosticCode::UnsupportedConstruct);
    }

    #[test]
    fn parse_invalid_sql() {
        let error = SqlParser::new().parse_query("SELECT FROM WHERE").unwrap_err();
        assert!(error.is_unsupported_syntax());

        let diag = error.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::SqlParseError);
        assert_eq!(diag.severity, Severity::Error);
    }

    #[test]
    fn different_dialects() {
        let sql = "SELECT ID FROM Books";
        for dialect in [
            DialectConfig::Ansi,
            DialectConfig::BigQuery,
            DialectConfig::Postgres,
            DialectConfig::Snowflake,
            DialectConfig::DuckDb,
        ] {
            assert!(SqlParser::from_dialect(&dialect).parse_query(sql).is_ok());
        }
    }
}
