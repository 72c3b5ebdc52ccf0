//! Query tree
//!
//! A tagged tree for SELECT/INSERT/UPDATE/DELETE whose JSON form follows the
//! CQN conventions (`{"SELECT": {...}}`, `{"ref": [...]}`, `{"val": ...}`).
//! Builder helpers keep hand-written trees in tests and front ends short.

use crate::model::ScalarType;
use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One step of a path, optionally narrowed by an infix filter (`author[name = 'x']`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSegment", into = "RawSegment")]
pub struct Segment {
    pub id: String,
    pub filter: Option<Vec<Expr>>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSegment {
    Name(String),
    Filtered {
        id: String,
        #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
        filter: Option<Vec<Expr>>,
    },
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        match raw {
            RawSegment::Name(id) => Segment { id, filter: None },
            RawSegment::Filtered { id, filter } => Segment { id, filter },
        }
    }
}

impl From<Segment> for RawSegment {
    fn from(segment: Segment) -> Self {
        match segment.filter {
            None => RawSegment::Name(segment.id),
            Some(filter) => RawSegment::Filtered {
                id: segment.id,
                filter: Some(filter),
            },
        }
    }
}

impl Segment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filter: None,
        }
    }
}

/// A dotted reference path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    #[serde(rename = "ref")]
    pub segments: Vec<Segment>,
}

impl Ref {
    /// Path of plain segments
    pub fn path(ids: &[&str]) -> Self {
        Self {
            segments: ids.iter().map(|id| Segment::new(*id)).collect(),
        }
    }

    /// Flat two-part reference `alias.column`
    pub fn flat(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::new(alias), Segment::new(column)],
        }
    }

    /// Attach an infix filter to the segment at `index`
    pub fn with_filter(mut self, index: usize, filter: Vec<Expr>) -> Self {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.filter = Some(filter);
        }
        self
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(|s| s.id.as_str())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn has_filter(&self) -> bool {
        self.segments.iter().any(|s| s.filter.is_some())
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ids().join("."))
    }
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Val {
    pub val: serde_json::Value,
}

impl Val {
    /// Printed form used as implicit column name (`'foo'` -> `foo`, `1` -> `1`)
    pub fn printed(&self) -> String {
        match &self.val {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Bound parameter: positional (`?`), named (`:name`) or carrying a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawParam", into = "RawParam")]
pub struct Param {
    pub name: Option<String>,
    pub value: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct RawParam {
    param: bool,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    val: Option<serde_json::Value>,
}

impl From<RawParam> for Param {
    fn from(raw: RawParam) -> Self {
        let name = raw
            .path
            .and_then(|path| path.into_iter().next())
            .filter(|name| name != "?");
        Param {
            name,
            value: raw.val,
        }
    }
}

impl From<Param> for RawParam {
    fn from(param: Param) -> Self {
        let path = match (&param.name, &param.value) {
            (Some(name), _) => Some(vec![name.clone()]),
            (None, None) => Some(vec!["?".to_string()]),
            (None, Some(_)) => None,
        };
        RawParam {
            param: true,
            path,
            val: param.value,
        }
    }
}

/// Function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Func {
    pub func: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

/// Token list expression (`a + b`, `x = 1 and y = 2`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Xpr {
    pub xpr: Vec<Expr>,
}

/// Value list (`in (1, 2)`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub list: Vec<Expr>,
}

/// Nested select used as a value or predicate operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    #[serde(rename = "SELECT")]
    pub select: Box<Select>,
}

/// Expression node. Operators and keywords are plain string tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    Param(Param),
    Ref(Ref),
    Val(Val),
    Func(Func),
    Xpr(Xpr),
    List(List),
    SubQuery(SubQuery),
    Op(String),
}

impl Expr {
    pub fn path(ids: &[&str]) -> Self {
        Self::Ref(Ref::path(ids))
    }

    pub fn val(value: impl Into<serde_json::Value>) -> Self {
        Self::Val(Val { val: value.into() })
    }

    pub fn op(token: impl Into<String>) -> Self {
        Self::Op(token.into())
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Func(Func {
            func: name.into(),
            args,
        })
    }

    pub fn xpr(tokens: Vec<Expr>) -> Self {
        Self::Xpr(Xpr { xpr: tokens })
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Self::List(List { list: items })
    }

    pub fn select(select: Select) -> Self {
        Self::SubQuery(SubQuery {
            select: Box::new(select),
        })
    }

    /// Positional `?` parameter
    pub fn param() -> Self {
        Self::Param(Param {
            name: None,
            value: None,
        })
    }

    pub fn as_path(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_op(&self, token: &str) -> bool {
        matches!(self, Self::Op(op) if op.eq_ignore_ascii_case(token))
    }
}

/// Marker for the `*` select item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Wildcard;

impl Serialize for Wildcard {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("*")
    }
}

impl<'de> Deserialize<'de> for Wildcard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        if token == "*" {
            Ok(Wildcard)
        } else {
            Err(de::Error::invalid_value(Unexpected::Str(&token), &"\"*\""))
        }
    }
}

/// Select-list entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectItem {
    Wildcard(Wildcard),
    Column(Column),
}

impl SelectItem {
    pub fn wildcard() -> Self {
        Self::Wildcard(Wildcard)
    }

    /// Plain path column
    pub fn path(ids: &[&str]) -> Self {
        Self::Column(Column::path(ids))
    }
}

impl From<Column> for SelectItem {
    fn from(column: Column) -> Self {
        Self::Column(column)
    }
}

/// A select-list column with optional alias, cast and nested projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    #[serde(flatten)]
    pub expr: Expr,

    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<ScalarType>,

    /// `col { ... }`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<Vec<SelectItem>>,

    /// `col.{ ... }`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<Vec<SelectItem>>,

    /// Names removed from a `*` inside `expand`/`inline`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluding: Vec<String>,
}

impl Column {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            alias: None,
            cast: None,
            expand: None,
            inline: None,
            excluding: Vec::new(),
        }
    }

    pub fn path(ids: &[&str]) -> Self {
        Self::new(Expr::path(ids))
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_cast(mut self, cast: ScalarType) -> Self {
        self.cast = Some(cast);
        self
    }

    pub fn with_expand(mut self, items: Vec<SelectItem>) -> Self {
        self.expand = Some(items);
        self
    }

    pub fn with_inline(mut self, items: Vec<SelectItem>) -> Self {
        self.inline = Some(items);
        self
    }

    pub fn with_excluding(mut self, names: &[&str]) -> Self {
        self.excluding = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(flatten)]
    pub expr: Expr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            sort: None,
            nulls: None,
        }
    }

    pub fn desc(mut self) -> Self {
        self.sort = Some(SortOrder::Desc);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub rows: Expr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Expr>,
}

/// Named source, possibly a scoped path (`Books:author`) with an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(flatten)]
    pub path: Ref,

    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SourceRef {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            path: Ref {
                segments: vec![Segment::new(name)],
            },
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub join: JoinKind,
    pub args: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuerySource {
    #[serde(rename = "SELECT")]
    pub select: Box<Select>,

    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOperation {
    pub op: String,
    pub args: Vec<Query>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSource {
    #[serde(rename = "SET")]
    pub set: SetOperation,
}

/// `from` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Join(Join),
    SubQuery(SubQuerySource),
    Set(SetSource),
    Ref(SourceRef),
}

impl Source {
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Ref(SourceRef::entity(name))
    }

    pub fn entity_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Ref(SourceRef::entity(name).with_alias(alias))
    }

    /// Scoped path source (`Books:author` is `["Books", "author"]`)
    pub fn path(path: Ref) -> Self {
        Self::Ref(SourceRef { path, alias: None })
    }

    /// Comma-joined sources
    pub fn cross(sources: Vec<Source>) -> Self {
        Self::Join(Join {
            join: JoinKind::Cross,
            args: sources,
            on: None,
        })
    }

    pub fn subquery(select: Select, alias: impl Into<String>) -> Self {
        Self::SubQuery(SubQuerySource {
            select: Box::new(select),
            alias: Some(alias.into()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Select {
    pub from: Source,

    /// `None` selects all elements (implicit `*`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<SelectItem>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluding: Vec<String>,

    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Vec<Expr>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Vec<Expr>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub distinct: bool,

    /// Single-row result
    #[serde(default, skip_serializing_if = "is_false")]
    pub one: bool,
}

impl Select {
    pub fn from_source(from: Source) -> Self {
        Self {
            from,
            columns: None,
            excluding: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            distinct: false,
            one: false,
        }
    }

    pub fn from_entity(name: impl Into<String>) -> Self {
        Self::from_source(Source::entity(name))
    }

    pub fn with_columns(mut self, columns: Vec<SelectItem>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_excluding(mut self, names: &[&str]) -> Self {
        self.excluding = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_where(mut self, tokens: Vec<Expr>) -> Self {
        self.where_clause = Some(tokens);
        self
    }

    pub fn with_group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn with_having(mut self, tokens: Vec<Expr>) -> Self {
        self.having = Some(tokens);
        self
    }

    pub fn with_order_by(mut self, items: Vec<OrderBy>) -> Self {
        self.order_by = items;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub into: SourceRef,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<serde_json::Map<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<serde_json::Value>>,

    /// `INSERT ... AS SELECT`
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub from_query: Option<Box<Query>>,
}

impl Insert {
    pub fn into_entity(name: impl Into<String>) -> Self {
        Self {
            into: SourceRef::entity(name),
            entries: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            from_query: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub entity: SourceRef,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,

    /// Computed assignments (`set stock = stock - 1`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, Expr>,

    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Vec<Expr>>,
}

impl Update {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            entity: SourceRef::entity(name),
            data: serde_json::Map::new(),
            with: BTreeMap::new(),
            where_clause: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub from: SourceRef,

    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Vec<Expr>>,
}

impl Delete {
    pub fn from_entity(name: impl Into<String>) -> Self {
        Self {
            from: SourceRef::entity(name),
            where_clause: None,
        }
    }
}

/// Top-level statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    #[serde(rename = "SELECT")]
    Select(Select),

    #[serde(rename = "INSERT")]
    Insert(Insert),

    #[serde(rename = "UPDATE")]
    Update(Update),

    #[serde(rename = "DELETE")]
    Delete(Delete),
}

impl Query {
    /// Parse a query from its JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn as_select(&self) -> Option<&Select> {
        match self {
            Self::Select(select) => Some(select),
            _ => None,
        }
    }
}

impl From<Select> for Query {
    fn from(select: Select) -> Self {
        Self::Select(select)
    }
}
