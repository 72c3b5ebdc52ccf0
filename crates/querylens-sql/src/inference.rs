//! Element inference for query trees
//!
//! Computes the output element map of a query without executing it: every
//! reference of every clause is resolved, wildcards and inline blocks are
//! spelled out, and subqueries and nested projections are inferred
//! recursively, each in a fresh child scope.

use crate::elements::{ElementMap, InferredElement};
use crate::error::ResolveError;
use crate::resolver::{Resolver, ScopedSource};
use crate::scope::{Binding, Scope, SourceTarget};
use crate::wildcard;
use querylens_core::config::InferenceConfig;
use querylens_core::model::{Definition, ElementKind, HasTarget, Model, ScalarType};
use querylens_core::query::{Column, Expr, Query, Ref, Segment, Select, SelectItem, Source, SourceRef};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::rc::Rc;

const SELF: &str = "$self";

/// How an output column came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Introduced by `*`
    Wildcard,

    /// Listed in the select list (directly or through an inline block)
    Explicit,
}

/// One output column of a query level, in output order
#[derive(Debug, Clone, PartialEq)]
pub struct Projection<'m> {
    pub name: String,

    /// Column to evaluate; wildcard entries and inline blocks are spelled out
    pub column: Column,

    pub origin: Origin,

    pub element: InferredElement<'m>,
}

/// Inference result of one select level
#[derive(Debug, Clone)]
pub struct SelectLevel<'m> {
    /// Aliases of the level, with `$self` pointing at its own columns
    pub scope: Scope<'m>,

    /// Entity sources by alias, with the path they were reached by
    pub sources: Vec<(String, ScopedSource<'m>)>,

    pub columns: Vec<Projection<'m>>,

    pub elements: ElementMap<'m>,
}

impl<'m> SelectLevel<'m> {
    /// Entity source registered under `alias`
    pub fn source(&self, alias: &str) -> Option<&ScopedSource<'m>> {
        self.sources.iter().find(|(a, _)| a == alias).map(|(_, s)| s)
    }
}

/// Resolved target of a write statement
#[derive(Debug, Clone)]
pub struct WriteTarget<'m> {
    pub alias: String,
    pub source: ScopedSource<'m>,
    pub scope: Scope<'m>,
}

/// Inference result of a statement
#[derive(Debug, Clone)]
pub struct InferredQuery<'m> {
    /// Result entity; `None` for multi-source reads and subquery sources
    pub target: Option<&'m Definition>,

    /// Alias and source name of every source, in `from` order
    pub sources: Vec<(String, String)>,

    pub elements: ElementMap<'m>,
}

impl Serialize for InferredQuery<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("target", &self.target.map(|d| d.name.as_str()))?;
        map.serialize_entry("sources", &SourceNames(&self.sources))?;
        map.serialize_entry("elements", &self.elements)?;
        map.end()
    }
}

struct SourceNames<'a>(&'a [(String, String)]);

impl Serialize for SourceNames<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (alias, name) in self.0 {
            map.serialize_entry(alias, name)?;
        }
        map.end()
    }
}

/// Select-list entry after inline blocks are spelled out
enum Slot {
    Star,
    Column(Column),
}

/// Query inference engine
pub struct QueryInference<'m> {
    model: &'m Model,
    config: InferenceConfig,
}

impl<'m> QueryInference<'m> {
    /// Create an inference engine with default options
    pub fn new(model: &'m Model) -> Self {
        Self::with_config(model, InferenceConfig::default())
    }

    pub fn with_config(model: &'m Model, config: InferenceConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    /// Infer the target and output elements of a statement
    pub fn infer(&self, query: &Query) -> Result<InferredQuery<'m>, ResolveError> {
        match query {
            Query::Select(select) => {
                let level = self.infer_select(select, &Scope::new())?;
                let target = match level.scope.single().map(|b| &b.target) {
                    Some(SourceTarget::Entity(def)) => Some(*def),
                    _ => None,
                };
                let sources = level
                    .scope
                    .bindings()
                    .iter()
                    .map(|b| (b.alias.clone(), b.display_name()))
                    .collect();
                Ok(InferredQuery {
                    target,
                    sources,
                    elements: level.elements,
                })
            }
            Query::Insert(insert) => {
                let target = self.infer_write_target(&insert.into)?;
                for column in &insert.columns {
                    Resolver::new(self.model, &target.scope).resolve(&Ref::path(&[column.as_str()]))?;
                }
                if let Some(source) = &insert.from_query {
                    self.infer(source)?;
                }
                Ok(self.write_result(&target))
            }
            Query::Update(update) => {
                let target = self.infer_write_target(&update.entity)?;
                let resolver = Resolver::new(self.model, &target.scope);
                for (name, expr) in &update.with {
                    resolver.resolve(&Ref::path(&[name.as_str()]))?;
                    self.check_tokens(std::slice::from_ref(expr), &target.scope)?;
                }
                if let Some(tokens) = &update.where_clause {
                    self.check_tokens(tokens, &target.scope)?;
                }
                Ok(self.write_result(&target))
            }
            Query::Delete(delete) => {
                let target = self.infer_write_target(&delete.from)?;
                if let Some(tokens) = &delete.where_clause {
                    self.check_tokens(tokens, &target.scope)?;
                }
                Ok(self.write_result(&target))
            }
        }
    }

    /// Resolve the entity a write statement addresses
    pub fn infer_write_target(&self, source: &SourceRef) -> Result<WriteTarget<'m>, ResolveError> {
        let empty = Scope::new();
        let scoped = Resolver::new(self.model, &empty).resolve_source(&source.path)?;
        let alias = source.alias.clone().unwrap_or_else(|| scoped.implicit_alias());

        let mut scope = Scope::new();
        scope.add(Binding::new(alias.clone(), SourceTarget::Entity(scoped.target)))?;
        tracing::debug!(target: "querylens::infer", entity = %scoped.target.name, "write target");

        Ok(WriteTarget {
            alias,
            source: scoped,
            scope,
        })
    }

    fn write_result(&self, target: &WriteTarget<'m>) -> InferredQuery<'m> {
        InferredQuery {
            target: Some(target.source.target),
            sources: vec![(target.alias.clone(), target.source.target.name.clone())],
            elements: ElementMap::from_elements(&target.source.target.elements),
        }
    }

    /// Infer one select level below `outer`
    pub fn infer_select(&self, select: &Select, outer: &Scope<'m>) -> Result<SelectLevel<'m>, ResolveError> {
        let mut scope = outer.child();
        let mut sources = Vec::new();
        let mut conditions: Vec<&[Expr]> = Vec::new();
        self.bind_source(&select.from, outer, &mut scope, &mut sources, &mut conditions)?;
        tracing::debug!(
            target: "querylens::infer",
            sources = ?scope.bindings().iter().map(|b| b.alias.as_str()).collect::<Vec<_>>(),
            "infer select"
        );

        for on in conditions {
            self.check_tokens(on, &scope)?;
        }

        let implicit = [SelectItem::wildcard()];
        let items: &[SelectItem] = select.columns.as_deref().unwrap_or(&implicit);
        let columns = self.project(items, &select.excluding, &mut scope)?;
        let elements = to_map(&columns)?;
        scope.set_columns(Rc::new(elements.clone()));

        if let Some(tokens) = &select.where_clause {
            self.check_tokens(tokens, &scope)?;
        }
        self.check_tokens(&select.group_by, &scope)?;
        if let Some(tokens) = &select.having {
            self.check_tokens(tokens, &scope)?;
        }
        for item in &select.order_by {
            match &item.expr {
                // output columns may be ordered by name
                Expr::Ref(r) if r.len() == 1 && elements.contains(&r.segments[0].id) => {}
                expr => self.check_tokens(std::slice::from_ref(expr), &scope)?,
            }
        }

        Ok(SelectLevel {
            scope,
            sources,
            columns,
            elements,
        })
    }

    fn bind_source<'s>(
        &self,
        source: &'s Source,
        outer: &Scope<'m>,
        scope: &mut Scope<'m>,
        sources: &mut Vec<(String, ScopedSource<'m>)>,
        conditions: &mut Vec<&'s [Expr]>,
    ) -> Result<(), ResolveError> {
        match source {
            Source::Ref(source) => {
                let scoped = Resolver::new(self.model, scope).resolve_source(&source.path)?;
                let alias = source.alias.clone().unwrap_or_else(|| scoped.implicit_alias());
                scope.add(Binding::new(alias.clone(), SourceTarget::Entity(scoped.target)))?;
                sources.push((alias, scoped));
            }
            Source::SubQuery(sub) => {
                let alias = sub.alias.clone().ok_or(ResolveError::AliasRequired)?;
                // siblings in the same from clause are not visible to the subquery
                let level = self.infer_select(&sub.select, outer)?;
                scope.add(Binding::new(alias, SourceTarget::Query(Rc::new(level.elements))))?;
            }
            Source::Join(join) => {
                for arg in &join.args {
                    self.bind_source(arg, outer, scope, sources, conditions)?;
                }
                if let Some(on) = &join.on {
                    conditions.push(on);
                }
            }
            Source::Set(set) => return Err(ResolveError::Unsupported(set.set.op.to_uppercase())),
        }
        Ok(())
    }

    /// Resolve the references of a token list and infer its subqueries
    pub fn check_tokens(&self, tokens: &[Expr], scope: &Scope<'m>) -> Result<(), ResolveError> {
        Resolver::new(self.model, scope).check_refs(tokens)?;
        for_each_subquery(tokens, &mut |select| self.infer_select(select, scope).map(|_| ()))
    }

    /// Compute the projections of a select list
    fn project(
        &self,
        items: &[SelectItem],
        excluding: &[String],
        scope: &mut Scope<'m>,
    ) -> Result<Vec<Projection<'m>>, ResolveError> {
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SelectItem::Wildcard(_) => slots.push(Slot::Star),
                SelectItem::Column(column) => {
                    for spelled in self.spell_inline(column, scope)? {
                        slots.push(Slot::Column(spelled));
                    }
                }
            }
        }

        let mut explicit = Vec::new();
        let mut before = Vec::new();
        let mut star_seen = false;
        for slot in &slots {
            match slot {
                Slot::Star => star_seen = true,
                Slot::Column(column) => {
                    let name = column_name(column, scope)?;
                    if !star_seen {
                        before.push(name.clone());
                    }
                    explicit.push(name);
                }
            }
        }

        let mut out: Vec<Projection<'m>> = Vec::new();
        let mut from_star: Vec<String> = Vec::new();
        let mut star_seen = false;
        let mut names = explicit.iter();

        for slot in slots {
            match slot {
                Slot::Star if star_seen => {}
                Slot::Star => {
                    star_seen = true;
                    let entries = wildcard::expand(
                        scope,
                        excluding,
                        &before,
                        &explicit,
                        self.config.exclude_large_binaries,
                    )?;
                    for entry in entries {
                        from_star.push(entry.name.clone());
                        out.push(Projection {
                            column: entry.to_column(),
                            name: entry.name,
                            origin: Origin::Wildcard,
                            element: entry.element,
                        });
                    }
                }
                Slot::Column(column) => {
                    let Some(name) = names.next().cloned() else {
                        break;
                    };
                    let element = if mentions_self(&column.expr) {
                        InferredElement::untyped()
                    } else {
                        self.infer_column(&column, scope)?
                    };
                    let projection = Projection {
                        name: name.clone(),
                        column,
                        origin: Origin::Explicit,
                        element,
                    };

                    if let Some(pos) = from_star.iter().position(|n| *n == name) {
                        from_star.remove(pos);
                        if let Some(slot) = out.iter_mut().find(|p| p.name == name) {
                            *slot = projection;
                            continue;
                        }
                    }
                    if out.iter().any(|p| p.name == name) {
                        return Err(ResolveError::DuplicateDefinition { name });
                    }
                    out.push(projection);
                }
            }
        }

        // $self columns see the columns computed so far
        if out.iter().any(|p| p.origin == Origin::Explicit && mentions_self(&p.column.expr)) {
            scope.set_columns(Rc::new(to_map(&out)?));
            for projection in out.iter_mut() {
                if projection.origin == Origin::Explicit && mentions_self(&projection.column.expr) {
                    projection.element = self.infer_column(&projection.column, scope)?;
                }
            }
        }

        Ok(out)
    }

    /// Element of one explicit column
    fn infer_column(&self, column: &Column, scope: &Scope<'m>) -> Result<InferredElement<'m>, ResolveError> {
        let element = match &column.expr {
            Expr::Ref(r) => {
                let resolved = Resolver::new(self.model, scope).resolve(r)?;
                if let Some(items) = &column.expand {
                    return self.infer_expand(column, r, items, &resolved, scope);
                }
                if column.cast.is_some() && resolved.is_structured() {
                    return Err(ResolveError::StructuredCastNotAllowed { path: r.to_string() });
                }
                resolved
                    .terminal()
                    .map(|link| link.element.clone())
                    .unwrap_or_else(InferredElement::untyped)
            }
            Expr::Param(param) => InferredElement::Value(param.value.as_ref().and_then(literal_type)),
            Expr::SubQuery(sub) => {
                self.infer_select(&sub.select, scope)?;
                InferredElement::untyped()
            }
            other => {
                self.check_tokens(std::slice::from_ref(other), scope)?;
                InferredElement::untyped()
            }
        };

        Ok(match &column.cast {
            Some(cast) => InferredElement::typed(cast.clone()),
            None => element,
        })
    }

    /// `assoc { ... }` / `struct { ... }`
    fn infer_expand(
        &self,
        column: &Column,
        path: &Ref,
        items: &[SelectItem],
        resolved: &crate::resolver::ResolvedRef<'m>,
        scope: &Scope<'m>,
    ) -> Result<InferredElement<'m>, ResolveError> {
        let Some(link) = resolved.terminal() else {
            return Err(ResolveError::Unsupported(format!("expand on \"{}\"", path)));
        };

        let (target, to_many) = match link.schema().map(|e| (e, &e.kind)) {
            Some((element, kind)) if kind.target().is_some() => {
                let def = self.model.target_of(element).ok_or_else(|| {
                    ResolveError::DefinitionNotFound {
                        name: kind.target().unwrap_or_default().to_string(),
                    }
                })?;
                (SourceTarget::Entity(def), kind.is_to_many())
            }
            Some((_, ElementKind::Structured(children))) => (
                SourceTarget::Structure {
                    name: link.id.clone(),
                    elements: children,
                    definition: link.definition,
                },
                false,
            ),
            _ => {
                return Err(ResolveError::Unsupported(format!(
                    "expand on \"{}\", which is neither an association nor a structure",
                    path
                )))
            }
        };

        let mut nested = scope.child();
        nested.add(Binding::new(link.id.clone(), target))?;
        let columns = self.project(items, &column.excluding, &mut nested)?;

        Ok(InferredElement::Nested {
            elements: to_map(&columns)?,
            to_many,
        })
    }

    /// Spell out `path.{ ... }` into one aliased column per member.
    ///
    /// Names inside the block are local: a column listed after a `*` of the
    /// same block replaces the wildcard entry in place.
    pub fn spell_inline(&self, column: &Column, scope: &Scope<'m>) -> Result<Vec<Column>, ResolveError> {
        let Some(items) = &column.inline else {
            return Ok(vec![column.clone()]);
        };
        let Expr::Ref(base) = &column.expr else {
            return Err(ResolveError::Unsupported("inline projection on an expression".to_string()));
        };

        let prefix = column_name(column, scope)?;
        let resolved = Resolver::new(self.model, scope).resolve(base)?;
        let members: Vec<(String, InferredElement<'m>)> = match resolved.terminal_element() {
            Some(element) => match &element.kind {
                ElementKind::Structured(children) => children
                    .iter()
                    .map(|e| (e.name.clone(), InferredElement::Element(e)))
                    .collect(),
                kind if kind.target().is_some() => self
                    .model
                    .target_of(element)
                    .map(|def| ElementMap::from_elements(&def.elements))
                    .map(|map| {
                        map.iter()
                            .map(|(name, e)| (name.to_string(), e.clone()))
                            .collect()
                    })
                    .unwrap_or_default(),
                _ => {
                    return Err(ResolveError::Unsupported(format!(
                        "inline on \"{}\", which is neither an association nor a structure",
                        base
                    )))
                }
            },
            None => {
                return Err(ResolveError::Unsupported(format!(
                    "inline on \"{}\", which is neither an association nor a structure",
                    base
                )))
            }
        };

        let extend = |tail: &[Segment]| {
            let mut segments = base.segments.clone();
            segments.extend(tail.iter().cloned());
            Expr::Ref(Ref { segments })
        };

        let mut local: Vec<(String, Column)> = Vec::new();
        let mut from_star: Vec<String> = Vec::new();
        let mut star_seen = false;

        for item in items {
            match item {
                SelectItem::Wildcard(_) if star_seen => {}
                SelectItem::Wildcard(_) => {
                    star_seen = true;
                    for (name, element) in &members {
                        if column.excluding.contains(name) || local.iter().any(|(n, _)| n == name) {
                            continue;
                        }
                        if self.config.exclude_large_binaries
                            && element.element().map_or(false, |e| e.is_large_binary())
                        {
                            continue;
                        }
                        let spelled = Column::new(extend(&[Segment::new(name.clone())]))
                            .with_alias(format!("{}_{}", prefix, name));
                        local.push((name.clone(), spelled));
                        from_star.push(name.clone());
                    }
                }
                SelectItem::Column(sub) => {
                    let Expr::Ref(r) = &sub.expr else {
                        return Err(ResolveError::Unsupported(
                            "expressions inside inline projections".to_string(),
                        ));
                    };
                    let name = sub.alias.clone().unwrap_or_else(|| r.ids().join("_"));
                    let mut spelled = sub.clone();
                    spelled.expr = extend(&r.segments);
                    spelled.alias = Some(format!("{}_{}", prefix, name));

                    if let Some(pos) = from_star.iter().position(|n| *n == name) {
                        from_star.remove(pos);
                        if let Some(slot) = local.iter_mut().find(|(n, _)| *n == name) {
                            slot.1 = spelled;
                            continue;
                        }
                    }
                    if local.iter().any(|(n, _)| *n == name) {
                        return Err(ResolveError::DuplicateDefinition {
                            name: format!("{}_{}", prefix, name),
                        });
                    }
                    local.push((name, spelled));
                }
            }
        }

        let mut columns = Vec::with_capacity(local.len());
        for (_, spelled) in local {
            columns.extend(self.spell_inline(&spelled, scope)?);
        }
        Ok(columns)
    }
}

/// Output name of an explicit column
pub fn column_name(column: &Column, scope: &Scope<'_>) -> Result<String, ResolveError> {
    if let Some(alias) = &column.alias {
        return Ok(alias.clone());
    }
    match &column.expr {
        Expr::Ref(r) => Ok(implicit_name(r, scope)),
        Expr::Val(val) => Ok(val.printed()),
        Expr::Param(param) => param.name.clone().ok_or(ResolveError::AliasRequired),
        Expr::Func(func) => Ok(func.func.clone()),
        _ => Err(ResolveError::AliasRequired),
    }
}

/// Navigated steps of a path joined with `_`, without a leading alias or `$self`
pub fn implicit_name(r: &Ref, scope: &Scope<'_>) -> String {
    let ids = r.ids();
    let qualified = ids.len() > 1
        && (ids[0] == SELF
            || scope.binding(ids[0]).is_some()
            || (scope.outer_binding(ids[0]).is_some()
                && !scope.bindings().iter().any(|b| b.target.member(ids[0]).is_some())));
    let skip = usize::from(qualified);
    ids[skip..].join("_")
}

/// Type of a literal bound to a parameter
fn literal_type(value: &serde_json::Value) -> Option<ScalarType> {
    match value {
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(ScalarType::new("cds.Integer")),
        serde_json::Value::Number(_) => Some(ScalarType::new("cds.Double")),
        serde_json::Value::String(_) => Some(ScalarType::new("cds.String")),
        serde_json::Value::Bool(_) => Some(ScalarType::new("cds.Boolean")),
        _ => None,
    }
}

/// Does the expression reference a `$self` column?
pub fn mentions_self(expr: &Expr) -> bool {
    match expr {
        Expr::Ref(r) => r.first() == Some(SELF) && r.len() > 1,
        Expr::Func(func) => func.args.iter().any(mentions_self),
        Expr::Xpr(xpr) => xpr.xpr.iter().any(mentions_self),
        Expr::List(list) => list.list.iter().any(mentions_self),
        _ => false,
    }
}

/// Call `f` for every subquery of a token list, not descending into them
pub fn for_each_subquery(
    tokens: &[Expr],
    f: &mut dyn FnMut(&Select) -> Result<(), ResolveError>,
) -> Result<(), ResolveError> {
    for token in tokens {
        match token {
            Expr::SubQuery(sub) => f(&sub.select)?,
            Expr::Func(func) => for_each_subquery(&func.args, f)?,
            Expr::Xpr(xpr) => for_each_subquery(&xpr.xpr, f)?,
            Expr::List(list) => for_each_subquery(&list.list, f)?,
            _ => {}
        }
    }
    Ok(())
}

fn to_map<'m>(columns: &[Projection<'m>]) -> Result<ElementMap<'m>, ResolveError> {
    let mut map = ElementMap::new();
    for projection in columns {
        map.insert(projection.name.clone(), projection.element.clone())?;
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bookshop;
    use querylens_core::query::{Delete, Update};

    fn infer(model: &Model, select: Select) -> Result<InferredQuery<'_>, ResolveError> {
        QueryInference::new(model).infer(&Query::Select(select))
    }

    fn names<'a>(inferred: &'a InferredQuery<'_>) -> Vec<&'a str> {
        inferred.elements.names()
    }

    #[test]
    fn infer_preserves_column_order() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![
                SelectItem::path(&["ID"]),
                SelectItem::path(&["dedication", "sub", "foo"]),
                SelectItem::path(&["dedication", "sub"]),
            ]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["ID", "dedication_sub_foo", "dedication_sub"]);
        assert_eq!(inferred.target.map(|d| d.name.as_str()), Some("Books"));
    }

    #[test]
    fn infer_association_path_type() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![
                SelectItem::path(&["ID"]),
                SelectItem::path(&["currency", "code"]),
            ]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["ID", "currency_code"]);
        let code = inferred.elements.get("currency_code").unwrap();
        assert_eq!(code.scalar_type().map(|t| t.name.as_str()), Some("cds.String"));
    }

    #[test]
    fn infer_implicit_wildcard_skips_large_binaries() {
        let model = bookshop();
        let inferred = infer(&model, Select::from_entity("Authors")).unwrap();
        assert_eq!(
            names(&inferred),
            vec!["ID", "name", "dateOfBirth", "address", "country", "books"]
        );

        let inferred = infer(&model, Select::from_entity("Books")).unwrap();
        assert!(!inferred.elements.contains("image"));
    }

    #[test]
    fn excluding_only_affects_wildcard() {
        let model = bookshop();
        let all = infer(&model, Select::from_entity("Genres")).unwrap();
        assert_eq!(names(&all), vec!["ID", "name", "parent"]);

        let without = infer(&model, Select::from_entity("Genres").with_excluding(&["name"])).unwrap();
        assert_eq!(names(&without), vec!["ID", "parent"]);

        // an excluded element listed after the star keeps its explicit position
        let explicit = infer(
            &model,
            Select::from_entity("Genres")
                .with_columns(vec![SelectItem::wildcard(), SelectItem::path(&["name"])])
                .with_excluding(&["name"]),
        )
        .unwrap();
        assert_eq!(names(&explicit), vec!["ID", "parent", "name"]);
    }

    #[test]
    fn explicit_after_wildcard_keeps_position() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Genres").with_columns(vec![
                SelectItem::wildcard(),
                Column::new(Expr::val("x")).with_alias("name").into(),
            ]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["ID", "name", "parent"]);
        assert_eq!(inferred.elements.get("name"), Some(&InferredElement::untyped()));
    }

    #[test]
    fn explicit_before_wildcard_wins() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Genres").with_columns(vec![
                Column::new(Expr::val(1)).with_alias("parent").into(),
                SelectItem::wildcard(),
            ]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["parent", "ID", "name"]);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let model = bookshop();
        let err = infer(
            &model,
            Select::from_entity("Books")
                .with_columns(vec![SelectItem::path(&["ID"]), SelectItem::path(&["ID"])]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate definition of element \"ID\"");

        // implicit function names collide as well
        let func = || Column::new(Expr::func("count", vec![Expr::op("*")]));
        let err = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![func().into(), func().into()]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate definition of element \"count\"");
    }

    #[test]
    fn expressions_need_alias() {
        let model = bookshop();
        let xpr = Expr::xpr(vec![Expr::path(&["stock"]), Expr::op("*"), Expr::val(2)]);
        let err = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![Column::new(xpr.clone()).into()]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Expecting expression to have an alias name");

        let err = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![Column::new(Expr::param()).into()]),
        )
        .unwrap_err();
        assert_eq!(err, ResolveError::AliasRequired);

        let inferred = infer(
            &model,
            Select::from_entity("Books")
                .with_columns(vec![Column::new(xpr).with_alias("twice").into()]),
        )
        .unwrap();
        assert_eq!(names(&inferred), vec!["twice"]);
    }

    #[test]
    fn literal_and_cast_types() {
        let model = bookshop();
        let literal_param = Expr::Param(querylens_core::query::Param {
            name: Some("limit".to_string()),
            value: Some(serde_json::json!(5)),
        });
        let inferred = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![
                Column::new(Expr::val("hello")).into(),
                Column::new(literal_param).into(),
                Column::path(&["stock"])
                    .with_cast(ScalarType::new("cds.Decimal").with_precision(10, Some(2)))
                    .with_alias("amount")
                    .into(),
            ]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["hello", "limit", "amount"]);
        assert_eq!(inferred.elements.get("hello"), Some(&InferredElement::untyped()));
        assert_eq!(
            inferred.elements.get("limit").and_then(|e| e.scalar_type()).map(|t| t.name.as_str()),
            Some("cds.Integer")
        );
        let amount = inferred.elements.get("amount").and_then(|e| e.scalar_type()).cloned();
        assert_eq!(amount, Some(ScalarType::new("cds.Decimal").with_precision(10, Some(2))));
    }

    #[test]
    fn structured_cast_is_rejected() {
        let model = bookshop();
        let err = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![Column::path(&["dedication"])
                .with_cast(ScalarType::new("cds.String"))
                .into()]),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Structured elements can't be cast to a different type, but found \"dedication\""
        );
    }

    #[test]
    fn expand_builds_nested_maps() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Authors").with_columns(vec![
                SelectItem::path(&["name"]),
                Column::path(&["books"])
                    .with_expand(vec![SelectItem::path(&["title"])])
                    .into(),
                Column::path(&["country"])
                    .with_expand(vec![SelectItem::wildcard()])
                    .into(),
            ]),
        )
        .unwrap();

        let json = serde_json::to_value(&inferred.elements).unwrap();
        assert_eq!(
            json["books"],
            serde_json::json!({ "items": { "elements": { "title": { "type": "cds.String", "length": 111 } } } })
        );
        assert_eq!(
            json["country"]["elements"]["code"],
            serde_json::json!({ "type": "cds.String", "length": 3, "key": true })
        );
    }

    #[test]
    fn inline_spells_out_prefixed_columns() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Authors").with_columns(vec![
                SelectItem::path(&["ID"]),
                Column::path(&["address"])
                    .with_inline(vec![
                        SelectItem::wildcard(),
                        Column::path(&["street"]).with_alias("city").into(),
                    ])
                    .into(),
            ]),
        )
        .unwrap();

        // the local override replaces address_city in place
        assert_eq!(names(&inferred), vec!["ID", "address_street", "address_city"]);
    }

    #[test]
    fn inline_blocks_do_not_override_each_other() {
        let model = bookshop();
        let err = infer(
            &model,
            Select::from_entity("Authors").with_columns(vec![
                Column::path(&["address"]).with_inline(vec![SelectItem::wildcard()]).into(),
                Column::path(&["address"])
                    .with_inline(vec![Column::path(&["street"]).with_alias("city").into()])
                    .into(),
            ]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate definition of element \"address_city\"");
    }

    #[test]
    fn multi_source_ambiguity() {
        let model = bookshop();
        let from = Source::cross(vec![Source::entity("Books"), Source::entity("Authors")]);

        let err = infer(
            &model,
            Select::from_source(from.clone()).with_columns(vec![SelectItem::path(&["ID"])]),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ambiguous reference to \"ID\", write \"Books.ID\", \"Authors.ID\" instead"
        );

        let err = infer(&model, Select::from_source(from.clone())).unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousWildcard { .. }));

        let inferred = infer(
            &model,
            Select::from_source(from).with_columns(vec![
                SelectItem::path(&["Books", "ID"]),
                Column::path(&["Authors", "ID"]).with_alias("author").into(),
            ]),
        )
        .unwrap();
        assert_eq!(names(&inferred), vec!["ID", "author"]);
        assert_eq!(inferred.target, None);
        assert_eq!(inferred.sources.len(), 2);
    }

    #[test]
    fn self_columns_are_resolved_after_the_select_list() {
        let model = bookshop();
        let inferred = infer(
            &model,
            Select::from_entity("Books").with_columns(vec![
                Column::path(&["$self", "total"]).with_alias("copy").into(),
                Column::new(Expr::xpr(vec![Expr::path(&["stock"]), Expr::op("*"), Expr::path(&["price"])]))
                    .with_alias("total")
                    .into(),
            ]),
        )
        .unwrap();
        assert_eq!(names(&inferred), vec!["copy", "total"]);

        let err = infer(
            &model,
            Select::from_entity("Books")
                .with_columns(vec![SelectItem::path(&["ID"])])
                .with_where(vec![Expr::path(&["$self", "title"]), Expr::op("="), Expr::val("x")]),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"title\" not found in the columns list of query, did you mean \"Books.title\"?"
        );
    }

    #[test]
    fn scoped_source_sets_target() {
        let model = bookshop();
        let path = Ref::path(&["Books", "author"]).with_filter(
            0,
            vec![Expr::path(&["ID"]), Expr::op("="), Expr::val(201)],
        );
        let inferred = infer(
            &model,
            Select::from_source(Source::path(path)).with_columns(vec![SelectItem::path(&["name"])]),
        )
        .unwrap();

        assert_eq!(inferred.target.map(|d| d.name.as_str()), Some("Authors"));
        assert_eq!(inferred.sources, vec![("author".to_string(), "Authors".to_string())]);
    }

    #[test]
    fn union_is_rejected() {
        let model = bookshop();
        let set = Source::Set(querylens_core::query::SetSource {
            set: querylens_core::query::SetOperation {
                op: "union".to_string(),
                args: vec![],
            },
        });
        let err = infer(&model, Select::from_source(set)).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported construct: UNION");
    }

    #[test]
    fn subquery_in_from() {
        let model = bookshop();
        let inner = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"]), SelectItem::path(&["author"])]);
        let inferred = infer(
            &model,
            Select::from_source(Source::subquery(inner, "B"))
                .with_columns(vec![SelectItem::path(&["author", "name"])]),
        )
        .unwrap();

        assert_eq!(names(&inferred), vec!["author_name"]);
        assert_eq!(inferred.sources, vec![("B".to_string(), "B".to_string())]);
    }

    #[test]
    fn inference_is_idempotent() {
        let model = bookshop();
        let inference = QueryInference::new(&model);
        let query = Query::Select(Select::from_entity("Books").with_columns(vec![
            SelectItem::wildcard(),
            Column::path(&["author"]).with_expand(vec![SelectItem::path(&["name"])]).into(),
        ]));

        let first = inference.infer(&query).unwrap();
        let second = inference.infer(&query).unwrap();
        assert_eq!(first.elements, second.elements);
    }

    #[test]
    fn write_statements_report_target_elements() {
        let model = bookshop();
        let inference = QueryInference::new(&model);

        let mut update = Update::entity("Books");
        update.with.insert(
            "stock".to_string(),
            Expr::xpr(vec![Expr::path(&["stock"]), Expr::op("-"), Expr::val(1)]),
        );
        update.where_clause = Some(vec![Expr::path(&["ID"]), Expr::op("="), Expr::val(1)]);
        let inferred = inference.infer(&Query::Update(update)).unwrap();
        assert_eq!(inferred.target.map(|d| d.name.as_str()), Some("Books"));
        assert!(inferred.elements.contains("title"));

        let mut delete = Delete::from_entity("Books");
        delete.where_clause = Some(vec![Expr::path(&["nope"]), Expr::op("="), Expr::val(1)]);
        let err = inference.infer(&Query::Delete(delete)).unwrap_err();
        assert_eq!(err.to_string(), "\"nope\" not found in the elements of \"Books\"");
    }
}
