//! Flattening & rewrite engine
//!
//! Rewrites an inferable query so that every reference is an alias-qualified
//! flat column: structured elements become their leaves, managed associations
//! their foreign keys, and paths that leave the foreign keys are served by
//! generated `LEFT JOIN`s. `exists` predicates, scoped sources and expands
//! over associations become correlated subqueries.

use crate::data;
use crate::elements::InferredElement;
use crate::error::ResolveError;
use crate::inference::{mentions_self, Origin, Projection, QueryInference, SelectLevel, WriteTarget};
use crate::joins::{self, and, association_condition, AliasRegistry, JoinSpec};
use crate::resolver::{Link, RefRoot, ResolvedRef, Resolver, ScopedSource};
use crate::scope::{Binding, Scope, SourceTarget};
use querylens_core::config::{FlattenConfig, InferenceConfig};
use querylens_core::model::{Definition, Element, ElementKind, HasTarget, Model};
use querylens_core::query::{
    Column, Delete, Expr, Insert, Join, JoinKind, Limit, OrderBy, Query, Ref, Select, SelectItem, Source,
    SourceRef, SubQuerySource, Update,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a flattened path denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathKind {
    Scalar,
    Structured,
    Managed,
    Unmanaged,
    Virtual,
}

/// One flat column of a flattened path
#[derive(Debug, Clone)]
struct FlatLeaf {
    expr: Expr,

    /// Path below the flattened element (`["sub", "foo"]` for `dedication`)
    suffix: Vec<String>,
}

#[derive(Debug)]
struct FlatPath {
    kind: PathKind,
    leaves: Vec<FlatLeaf>,
}

impl FlatPath {
    fn scalar(expr: Expr) -> Self {
        Self {
            kind: PathKind::Scalar,
            leaves: vec![FlatLeaf {
                expr,
                suffix: Vec::new(),
            }],
        }
    }
}

/// Outcome of walking the steps of a path
enum Walk {
    /// Stopped before the final step: table alias and column prefix reached
    At { alias: String, prefix: Vec<String> },

    /// The path was flattened completely
    Done(FlatPath),
}

/// An association step with the structure path leading to it
struct Step<'l, 'm> {
    link: &'l Link<'m>,
    element: &'m Element,
    prefix: Vec<String>,
}

/// Rewrite state of one select level
struct Level<'s, 'm> {
    scope: &'s Scope<'m>,
    joins: Vec<JoinSpec>,

    /// Flattened select-list columns, for `$self` references
    self_columns: Vec<(String, Vec<FlatLeaf>)>,
}

impl<'s, 'm> Level<'s, 'm> {
    fn new(scope: &'s Scope<'m>) -> Self {
        Self {
            scope,
            joins: Vec::new(),
            self_columns: Vec::new(),
        }
    }
}

/// Query flattener
pub struct QueryFlattener<'m> {
    model: &'m Model,
    inference: QueryInference<'m>,
    config: FlattenConfig,
}

impl<'m> QueryFlattener<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self::with_config(model, InferenceConfig::default(), FlattenConfig::default())
    }

    pub fn with_config(model: &'m Model, inference: InferenceConfig, config: FlattenConfig) -> Self {
        Self {
            model,
            inference: QueryInference::with_config(model, inference),
            config,
        }
    }

    /// Flatten a statement.
    ///
    /// Multi-source reads are inferred but returned unchanged.
    pub fn flatten(&self, query: &Query) -> Result<Query, ResolveError> {
        let mut aliases = AliasRegistry::new();
        match query {
            Query::Select(select) => {
                let outer = Scope::new();
                let level = self.inference.infer_select(select, &outer)?;
                if level.scope.is_multi_source() {
                    tracing::debug!(
                        target: "querylens::flatten",
                        sources = level.scope.bindings().len(),
                        "multi-source query left as inferred"
                    );
                    return Ok(query.clone());
                }
                Ok(Query::Select(self.flatten_select(select, &outer, &mut aliases)?))
            }
            Query::Insert(insert) => self.flatten_insert(insert, &mut aliases).map(Query::Insert),
            Query::Update(update) => self.flatten_update(update, &mut aliases).map(Query::Update),
            Query::Delete(delete) => self.flatten_delete(delete, &mut aliases).map(Query::Delete),
        }
    }

    fn flatten_select(
        &self,
        select: &Select,
        outer: &Scope<'m>,
        aliases: &mut AliasRegistry,
    ) -> Result<Select, ResolveError> {
        let SelectLevel {
            mut scope,
            sources,
            columns,
            elements,
        } = self.inference.infer_select(select, outer)?;
        if scope.is_multi_source() {
            return Err(ResolveError::Unsupported(
                "flattening of a nested query with several sources".to_string(),
            ));
        }

        let Some(binding) = scope.bindings_mut().first_mut() else {
            return Err(ResolveError::Unsupported("query without a source".to_string()));
        };
        let flat_alias = aliases.fresh(&binding.alias);
        binding.flat_alias = flat_alias.clone();
        let alias = binding.alias.clone();
        tracing::debug!(target: "querylens::flatten", alias = %alias, flat_alias = %flat_alias, "flatten select");

        let scoped = sources.iter().find(|(a, _)| *a == alias).map(|(_, s)| s);
        let mut from = match (&select.from, scoped) {
            (Source::Ref(_), Some(scoped)) => Source::entity_as(scoped.target.name.clone(), flat_alias.clone()),
            (Source::SubQuery(sub), _) => Source::SubQuery(SubQuerySource {
                select: Box::new(self.flatten_select(&sub.select, outer, aliases)?),
                alias: Some(flat_alias.clone()),
            }),
            _ => return Err(ResolveError::Unsupported("query source of this shape".to_string())),
        };

        let mut where_clause = match scoped {
            Some(scoped) if !scoped.links.is_empty() => {
                self.scoped_condition(scoped, &flat_alias, &scope, aliases)?
            }
            _ => Vec::new(),
        };

        let mut level = Level::new(&scope);

        if let Some(filter) = scoped.filter(|s| s.links.is_empty()).and_then(|s| s.root_filter.as_ref()) {
            let flat = self.flatten_tokens(filter, &mut level, aliases)?;
            conjoin(&mut where_clause, flat);
        }

        // $self columns see the other columns in flattened form
        let mut flat_columns: Vec<Option<Vec<(Column, Vec<String>)>>> = vec![None; columns.len()];
        for deferred in [false, true] {
            for (i, projection) in columns.iter().enumerate() {
                if mentions_self(&projection.column.expr) != deferred {
                    continue;
                }
                let flat = self.flatten_projection(projection, &mut level, aliases)?;
                let leaves = flat
                    .iter()
                    .map(|(column, suffix)| FlatLeaf {
                        expr: column.expr.clone(),
                        suffix: suffix.clone(),
                    })
                    .collect();
                level.self_columns.push((projection.name.clone(), leaves));
                flat_columns[i] = Some(flat);
            }
        }
        let out_columns: Vec<SelectItem> = flat_columns
            .into_iter()
            .flatten()
            .flatten()
            .map(|(column, _)| SelectItem::Column(column))
            .collect();

        if let Some(tokens) = &select.where_clause {
            let flat = self.flatten_tokens(tokens, &mut level, aliases)?;
            conjoin(&mut where_clause, flat);
        }

        let mut group_by = Vec::new();
        for expr in &select.group_by {
            match expr {
                Expr::Ref(r) => {
                    let flat = self.flatten_ref(r, &mut level, aliases)?;
                    if !matches!(flat.kind, PathKind::Unmanaged | PathKind::Virtual) {
                        group_by.extend(flat.leaves.into_iter().map(|leaf| leaf.expr));
                    }
                }
                other => group_by.push(self.flatten_value(other, &mut level, aliases)?),
            }
        }

        let having = match &select.having {
            Some(tokens) => Some(self.flatten_tokens(tokens, &mut level, aliases)?),
            None => None,
        };

        let mut order_by = Vec::new();
        for item in &select.order_by {
            let expr = match &item.expr {
                Expr::Ref(r) => {
                    let output_name = r.len() == 1 && elements.contains(&r.segments[0].id);
                    match self.flatten_ref(r, &mut level, aliases) {
                        Ok(flat) => match (flat.kind, flat.leaves.as_slice()) {
                            (PathKind::Unmanaged | PathKind::Virtual, _) | (_, []) => continue,
                            (_, [leaf]) => leaf.expr.clone(),
                            _ => return Err(ResolveError::OrderByMultiField { path: r.to_string() }),
                        },
                        Err(_) if output_name => item.expr.clone(),
                        Err(err) => return Err(err),
                    }
                }
                other => self.flatten_value(other, &mut level, aliases)?,
            };
            order_by.push(OrderBy {
                expr,
                sort: item.sort.clone(),
                nulls: item.nulls.clone(),
            });
        }

        let limit = match &select.limit {
            Some(limit) => {
                let rows = self.flatten_value(&limit.rows, &mut level, aliases)?;
                let offset = match &limit.offset {
                    Some(offset) => Some(self.flatten_value(offset, &mut level, aliases)?),
                    None => None,
                };
                Some(Limit { rows, offset })
            }
            None => None,
        };

        for join in level.joins {
            from = Source::Join(Join {
                join: JoinKind::Left,
                args: vec![from, Source::entity_as(join.target, join.alias)],
                on: Some(join.on),
            });
        }

        Ok(Select {
            from,
            columns: Some(out_columns),
            excluding: Vec::new(),
            where_clause: (!where_clause.is_empty()).then_some(where_clause),
            group_by,
            having,
            order_by,
            limit,
            distinct: select.distinct,
            one: select.one,
        })
    }

    /// Flat columns of one select-list entry, each with its leaf suffix
    fn flatten_projection(
        &self,
        projection: &Projection<'m>,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<(Column, Vec<String>)>, ResolveError> {
        let column = &projection.column;
        let Expr::Ref(r) = &column.expr else {
            let mut flat = Column::new(self.flatten_value(&column.expr, level, aliases)?)
                .with_alias(projection.name.clone());
            flat.cast = column.cast.clone();
            return Ok(vec![(flat, Vec::new())]);
        };

        if column.expand.is_some() {
            return self.flatten_expand(projection, r, level, aliases);
        }

        let flat = self.flatten_ref(r, level, aliases)?;
        match flat.kind {
            PathKind::Unmanaged => return Ok(Vec::new()),
            PathKind::Virtual if self.config.skip_virtual => {
                if projection.origin == Origin::Wildcard {
                    return Ok(Vec::new());
                }
                let null = Column::new(Expr::val(Value::Null)).with_alias(projection.name.clone());
                return Ok(vec![(null, Vec::new())]);
            }
            _ => {}
        }

        Ok(flat
            .leaves
            .into_iter()
            .map(|leaf| {
                let name = leaf_name(&projection.name, &leaf.suffix);
                let mut out = Column::new(leaf.expr);
                if column_of(&out.expr) != Some(name.as_str()) {
                    out.alias = Some(name);
                }
                out.cast = column.cast.clone();
                (out, leaf.suffix)
            })
            .collect())
    }

    /// `assoc { ... }` becomes a correlated subquery, `struct { ... }` its leaves
    fn flatten_expand(
        &self,
        projection: &Projection<'m>,
        r: &Ref,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<(Column, Vec<String>)>, ResolveError> {
        let column = &projection.column;
        let resolved = Resolver::new(self.model, level.scope).resolve(r)?;
        let unsupported = || ResolveError::Unsupported(format!("expand on \"{}\"", r));
        let (Some(last), Some(element)) = (resolved.terminal(), resolved.terminal_element()) else {
            return Err(unsupported());
        };

        if element.is_structured() {
            let mut inline = column.clone();
            inline.inline = inline.expand.take();
            inline.alias = Some(projection.name.clone());
            let prefix = format!("{}_", projection.name);

            let mut out = Vec::new();
            for spelled in self.inference.spell_inline(&inline, level.scope)? {
                let name = spelled.alias.clone().unwrap_or_default();
                let member = name.strip_prefix(&prefix).unwrap_or(&name).to_string();
                let nested = Projection {
                    name,
                    column: spelled,
                    origin: Origin::Explicit,
                    element: InferredElement::untyped(),
                };
                for (flat, suffix) in self.flatten_projection(&nested, level, aliases)? {
                    let mut path = vec![member.clone()];
                    path.extend(suffix);
                    out.push((flat, path));
                }
            }
            return Ok(out);
        }

        if !element.is_association() {
            return Err(unsupported());
        }
        let RefRoot::Source { flat_alias, .. } = &resolved.root else {
            return Err(unsupported());
        };
        let init = &resolved.links[..resolved.links.len() - 1];
        let Walk::At { alias: parent, prefix } = self.walk(init, flat_alias.clone(), false, level, aliases)? else {
            return Err(unsupported());
        };

        let target = self.target(element)?;
        let mut sub = Select::from_source(Source::entity_as(target.name.clone(), last.id.clone()))
            .with_columns(column.expand.clone().unwrap_or_default());
        sub.excluding = column.excluding.clone();
        sub.where_clause = last.filter.clone();
        sub.one = !element.is_to_many();

        let mut flat = self.flatten_select(&sub, level.scope, aliases)?;
        let Some(sub_alias) = base_alias(&flat.from) else {
            return Err(unsupported());
        };
        let mut correlation = association_condition(self.model, element, &last.id, &parent, &prefix, &sub_alias)?;
        if let Some(own) = flat.where_clause.take() {
            and(&mut correlation, vec![Expr::xpr(own)]);
        }
        flat.where_clause = Some(correlation);

        let column = Column::new(Expr::select(flat)).with_alias(projection.name.clone());
        Ok(vec![(column, Vec::new())])
    }

    fn flatten_ref(
        &self,
        r: &Ref,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<FlatPath, ResolveError> {
        let resolved = Resolver::new(self.model, level.scope).resolve(r)?;
        tracing::trace!(target: "querylens::flatten", path = %r, "flatten reference");

        match &resolved.root {
            RefRoot::Pseudo => Ok(FlatPath::scalar(Expr::Ref(r.clone()))),
            RefRoot::SelfColumn => self.self_column(r, &resolved, level),
            RefRoot::Source { flat_alias, .. } => {
                match self.walk(&resolved.links, flat_alias.clone(), true, level, aliases)? {
                    Walk::Done(flat) => Ok(flat),
                    Walk::At { .. } => Err(ResolveError::Unsupported(format!(
                        "reference \"{}\" without navigation steps",
                        r
                    ))),
                }
            }
        }
    }

    /// Walk `links` from table `alias`, joining association targets on the way.
    ///
    /// With `finish` the last step is flattened to its leaves; otherwise the
    /// walk stops after the last step, joining it if it is an association.
    fn walk(
        &self,
        links: &[Link<'m>],
        mut alias: String,
        finish: bool,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Walk, ResolveError> {
        let mut prefix: Vec<String> = Vec::new();

        for (i, link) in links.iter().enumerate() {
            let last = finish && i + 1 == links.len();

            let Some(element) = link.schema() else {
                // column of a subquery source
                prefix.push(link.id.clone());
                if last {
                    return Ok(Walk::Done(FlatPath::scalar(flat_ref(&alias, &prefix))));
                }
                continue;
            };

            if last {
                prefix.push(link.id.clone());
                return Ok(Walk::Done(self.leaves_of(element, &alias, &prefix)));
            }
            if !element.is_association() {
                prefix.push(link.id.clone());
                continue;
            }

            if finish && link.filter.is_none() {
                let rest: Vec<String> = links[i + 1..].iter().map(|l| l.id.clone()).collect();
                if let Some(flat) = self.foreign_key_path(element, &link.id, &alias, &prefix, &rest) {
                    return Ok(Walk::Done(flat));
                }
            }
            alias = self.join(level, aliases, &alias, &prefix, link, element)?;
            prefix.clear();
        }

        Ok(Walk::At { alias, prefix })
    }

    /// Flat columns of an element at `path` inside table `alias`
    fn leaves_of(&self, element: &'m Element, alias: &str, path: &[String]) -> FlatPath {
        let kind = match &element.kind {
            ElementKind::Structured(_) => PathKind::Structured,
            ElementKind::ManagedAssociation { .. } => PathKind::Managed,
            ElementKind::UnmanagedAssociation { .. } => {
                return FlatPath {
                    kind: PathKind::Unmanaged,
                    leaves: Vec::new(),
                }
            }
            _ if element.is_virtual => PathKind::Virtual,
            _ => PathKind::Scalar,
        };

        let column = joins::column(path);
        let skip_virtual = self.config.skip_virtual && kind != PathKind::Virtual;
        let leaves = self
            .model
            .leaves(element, skip_virtual)
            .into_iter()
            .map(|leaf| FlatLeaf {
                expr: Expr::Ref(Ref::flat(alias, leaf.column_name(&column))),
                suffix: leaf.suffix,
            })
            .collect();
        FlatPath { kind, leaves }
    }

    /// Paths like `author.ID` that stay inside the foreign keys need no join
    fn foreign_key_path(
        &self,
        element: &'m Element,
        name: &str,
        alias: &str,
        prefix: &[String],
        rest: &[String],
    ) -> Option<FlatPath> {
        if !element.is_managed_association() {
            return None;
        }
        let matching: Vec<_> = self
            .model
            .foreign_keys(element)
            .into_iter()
            .filter(|fk| fk.target_column.starts_with(rest))
            .collect();
        if matching.is_empty() {
            return None;
        }

        let exact = matching.len() == 1 && matching[0].target_column.len() == rest.len();
        let mut own = prefix.to_vec();
        own.push(name.to_string());
        let leaves = matching
            .into_iter()
            .map(|fk| {
                let mut column = own.clone();
                column.extend(fk.suffix);
                FlatLeaf {
                    expr: flat_ref(alias, &column),
                    suffix: fk.target_column[rest.len()..].to_vec(),
                }
            })
            .collect();

        Some(FlatPath {
            kind: if exact { PathKind::Scalar } else { PathKind::Structured },
            leaves,
        })
    }

    /// Alias of the join for an association step, generating it on first use
    fn join(
        &self,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
        parent: &str,
        prefix: &[String],
        link: &Link<'m>,
        element: &'m Element,
    ) -> Result<String, ResolveError> {
        let mut path = prefix.to_vec();
        path.push(link.id.clone());
        if let Some(existing) = level
            .joins
            .iter()
            .find(|j| j.parent == parent && j.path == path && j.filter == link.filter)
        {
            return Ok(existing.alias.clone());
        }

        let target = self.target(element)?;
        let alias = aliases.fresh(&link.id);
        let mut on = association_condition(self.model, element, &link.id, parent, prefix, &alias)?;
        if let Some(filter) = &link.filter {
            let scope = level.scope;
            let filter = self.flatten_filter(filter, target, &link.id, &alias, scope, aliases)?;
            and(&mut on, vec![Expr::xpr(filter)]);
        }
        tracing::trace!(
            target: "querylens::flatten",
            parent,
            alias = %alias,
            entity = %target.name,
            "generate join"
        );

        level.joins.push(JoinSpec {
            parent: parent.to_string(),
            path,
            filter: link.filter.clone(),
            alias: alias.clone(),
            target: target.name.clone(),
            on,
        });
        Ok(alias)
    }

    /// `$self.<column>`: the flattened form of that select-list column
    fn self_column(&self, r: &Ref, resolved: &ResolvedRef<'m>, level: &Level<'_, 'm>) -> Result<FlatPath, ResolveError> {
        let Some((first, rest)) = resolved.links.split_first() else {
            return Err(ResolveError::Unsupported(format!("reference \"{}\"", r)));
        };
        let rest: Vec<String> = rest.iter().map(|l| l.id.clone()).collect();
        let Some((_, leaves)) = level.self_columns.iter().find(|(name, _)| *name == first.id) else {
            return Err(ResolveError::Unsupported(format!(
                "\"{}\" refers to a column that itself refers to $self",
                r
            )));
        };

        let leaves: Vec<FlatLeaf> = leaves
            .iter()
            .filter(|leaf| leaf.suffix.starts_with(&rest))
            .map(|leaf| FlatLeaf {
                expr: leaf.expr.clone(),
                suffix: leaf.suffix[rest.len()..].to_vec(),
            })
            .collect();
        let kind = match resolved.terminal_element() {
            Some(e) if e.is_managed_association() => PathKind::Managed,
            Some(e) if e.is_association() => PathKind::Unmanaged,
            Some(e) if e.is_structured() => PathKind::Structured,
            _ if leaves.len() == 1 && leaves[0].suffix.is_empty() => PathKind::Scalar,
            _ => PathKind::Structured,
        };
        Ok(FlatPath { kind, leaves })
    }

    fn flatten_tokens(
        &self,
        tokens: &[Expr],
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<Expr>, ResolveError> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].is_op("exists") {
                if let Some(Expr::Ref(r)) = tokens.get(i + 1) {
                    out.push(tokens[i].clone());
                    out.push(self.exists_subquery(r, level, aliases)?);
                    i += 2;
                    continue;
                }
            }
            out.push(self.flatten_value(&tokens[i], level, aliases)?);
            i += 1;
        }
        Ok(out)
    }

    fn flatten_value(
        &self,
        expr: &Expr,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Expr, ResolveError> {
        Ok(match expr {
            Expr::Ref(r) => {
                let flat = self.flatten_ref(r, level, aliases)?;
                self.value_of(r, flat)?
            }
            Expr::Func(func) => Expr::func(func.func.clone(), self.flatten_tokens(&func.args, level, aliases)?),
            Expr::Xpr(xpr) => Expr::xpr(self.flatten_tokens(&xpr.xpr, level, aliases)?),
            Expr::List(list) => Expr::list(self.flatten_tokens(&list.list, level, aliases)?),
            Expr::SubQuery(sub) => {
                let scope = level.scope;
                Expr::select(self.flatten_select(&sub.select, scope, aliases)?)
            }
            other => other.clone(),
        })
    }

    /// A flattened path used as a scalar value
    fn value_of(&self, r: &Ref, flat: FlatPath) -> Result<Expr, ResolveError> {
        match flat.kind {
            PathKind::Structured => Err(ResolveError::StructInExpression { path: r.to_string() }),
            PathKind::Managed | PathKind::Unmanaged => {
                Err(ResolveError::AssociationInExpression { path: r.to_string() })
            }
            PathKind::Virtual if self.config.skip_virtual => Ok(Expr::val(Value::Null)),
            _ => {
                let mut leaves = flat.leaves.into_iter();
                match (leaves.next(), leaves.next()) {
                    (Some(leaf), None) => Ok(leaf.expr),
                    _ => Err(ResolveError::StructInExpression { path: r.to_string() }),
                }
            }
        }
    }

    /// `exists <path>`: one correlated subquery per association step
    fn exists_subquery(
        &self,
        r: &Ref,
        level: &mut Level<'_, 'm>,
        aliases: &mut AliasRegistry,
    ) -> Result<Expr, ResolveError> {
        let resolved = Resolver::new(self.model, level.scope).resolve(r)?;
        let unsupported = || {
            ResolveError::Unsupported(format!("exists on \"{}\", which does not end in an association", r))
        };
        let RefRoot::Source { flat_alias, .. } = &resolved.root else {
            return Err(unsupported());
        };
        let (steps, trailing) = association_steps(&resolved.links).ok_or_else(unsupported)?;
        if steps.is_empty() || !trailing.is_empty() {
            return Err(unsupported());
        }

        let scope = level.scope;
        let select = self.exists_chain(&steps, flat_alias, scope, aliases)?;
        Ok(Expr::select(select))
    }

    fn exists_chain(
        &self,
        steps: &[Step<'_, 'm>],
        parent: &str,
        scope: &Scope<'m>,
        aliases: &mut AliasRegistry,
    ) -> Result<Select, ResolveError> {
        let Some((step, rest)) = steps.split_first() else {
            return Err(ResolveError::Unsupported("exists without association steps".to_string()));
        };
        let target = self.target(step.element)?;
        let alias = aliases.fresh(&step.link.id);

        let mut condition = association_condition(self.model, step.element, &step.link.id, parent, &step.prefix, &alias)?;
        if let Some(filter) = &step.link.filter {
            let filter = self.flatten_filter(filter, target, &step.link.id, &alias, scope, aliases)?;
            and(&mut condition, vec![Expr::xpr(filter)]);
        }
        if !rest.is_empty() {
            let inner = self.exists_chain(rest, &alias, scope, aliases)?;
            and(&mut condition, vec![Expr::op("exists"), Expr::select(inner)]);
        }
        Ok(exists_select(&target.name, &alias, condition))
    }

    /// `Root[filter]:a.b` read as `b`: an `exists` chain back to the root
    fn scoped_condition(
        &self,
        scoped: &ScopedSource<'m>,
        target_alias: &str,
        scope: &Scope<'m>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<Expr>, ResolveError> {
        let Some((steps, _)) = association_steps(&scoped.links) else {
            return Err(ResolveError::InvalidQuerySource {
                path: scoped.root.name.clone(),
            });
        };
        self.scoped_chain(scoped, &steps, target_alias, scope, aliases)
    }

    fn scoped_chain(
        &self,
        scoped: &ScopedSource<'m>,
        steps: &[Step<'_, 'm>],
        child: &str,
        scope: &Scope<'m>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<Expr>, ResolveError> {
        let Some((step, earlier)) = steps.split_last() else {
            return Ok(Vec::new());
        };
        let holder = step.link.definition.unwrap_or(scoped.root);
        let parent = aliases.fresh(holder.short_name());

        let mut condition = association_condition(self.model, step.element, &step.link.id, &parent, &step.prefix, child)?;
        if let Some(filter) = &step.link.filter {
            let target = self.target(step.element)?;
            let filter = self.flatten_filter(filter, target, &step.link.id, child, scope, aliases)?;
            and(&mut condition, vec![Expr::xpr(filter)]);
        }
        if earlier.is_empty() {
            if let Some(filter) = &scoped.root_filter {
                let root = scoped.root;
                let filter = self.flatten_filter(filter, root, root.short_name(), &parent, scope, aliases)?;
                and(&mut condition, vec![Expr::xpr(filter)]);
            }
        } else {
            let inner = self.scoped_chain(scoped, earlier, &parent, scope, aliases)?;
            and(&mut condition, inner);
        }

        Ok(vec![
            Expr::op("exists"),
            Expr::select(exists_select(&holder.name, &parent, condition)),
        ])
    }

    /// Flatten an infix filter relative to `target`, addressed as `flat_alias`
    fn flatten_filter(
        &self,
        filter: &[Expr],
        target: &'m Definition,
        alias: &str,
        flat_alias: &str,
        outer: &Scope<'m>,
        aliases: &mut AliasRegistry,
    ) -> Result<Vec<Expr>, ResolveError> {
        let mut scope = outer.child();
        let mut binding = Binding::new(alias, SourceTarget::Entity(target));
        binding.flat_alias = flat_alias.to_string();
        scope.add(binding)?;

        let mut level = Level::new(&scope);
        let tokens = self.flatten_tokens(filter, &mut level, aliases)?;
        if !level.joins.is_empty() {
            return Err(ResolveError::Unsupported("association path in an infix filter".to_string()));
        }
        Ok(tokens)
    }

    fn target(&self, element: &'m Element) -> Result<&'m Definition, ResolveError> {
        self.model
            .target_of(element)
            .ok_or_else(|| ResolveError::DefinitionNotFound {
                name: element.target().unwrap_or_default().to_string(),
            })
    }

    fn flatten_insert(&self, insert: &Insert, aliases: &mut AliasRegistry) -> Result<Insert, ResolveError> {
        let target = self.inference.infer_write_target(&insert.into)?;
        let entity = target.source.target;
        tracing::debug!(target: "querylens::flatten", entity = %entity.name, "flatten insert");

        let entries = insert
            .entries
            .iter()
            .map(|entry| data::flatten_entry(self.model, &entity.elements, entry))
            .collect::<Result<Vec<_>, _>>()?;
        let columns = data::flatten_columns(self.model, &entity.elements, &insert.columns)?;
        let rows = data::flatten_rows(self.model, &entity.elements, &insert.columns, &insert.rows)?;

        let from_query = match insert.from_query.as_deref() {
            Some(Query::Select(select)) => Some(Box::new(Query::Select(self.flatten_select(
                select,
                &Scope::new(),
                aliases,
            )?))),
            Some(_) => {
                return Err(ResolveError::Unsupported(
                    "INSERT from a statement other than SELECT".to_string(),
                ))
            }
            None => None,
        };

        Ok(Insert {
            into: SourceRef::entity(entity.name.clone()),
            entries,
            columns,
            rows,
            from_query,
        })
    }

    fn flatten_update(&self, update: &Update, aliases: &mut AliasRegistry) -> Result<Update, ResolveError> {
        let mut target = self.inference.infer_write_target(&update.entity)?;
        let flat_alias = self.bind_write_alias(&mut target, aliases);
        let entity = target.source.target;

        let data = data::flatten_entry(self.model, &entity.elements, &update.data)?;

        let mut with = BTreeMap::new();
        let mut level = Level::new(&target.scope);
        for (name, expr) in &update.with {
            let path = Ref::path(&[name.as_str()]);
            let flat = self.flatten_ref(&path, &mut level, aliases)?;
            let column = match self.value_of(&path, flat)? {
                Expr::Ref(r) => r.segments.last().map(|s| s.id.clone()).unwrap_or_else(|| name.clone()),
                _ => continue,
            };
            with.insert(column, self.flatten_value(expr, &mut level, aliases)?);
        }
        if !level.joins.is_empty() {
            return Err(write_join_error());
        }

        let where_clause = self.write_where(&target, &flat_alias, update.where_clause.as_deref(), aliases)?;
        Ok(Update {
            entity: SourceRef::entity(entity.name.clone()).with_alias(flat_alias),
            data,
            with,
            where_clause,
        })
    }

    fn flatten_delete(&self, delete: &Delete, aliases: &mut AliasRegistry) -> Result<Delete, ResolveError> {
        let mut target = self.inference.infer_write_target(&delete.from)?;
        let flat_alias = self.bind_write_alias(&mut target, aliases);
        let where_clause = self.write_where(&target, &flat_alias, delete.where_clause.as_deref(), aliases)?;

        Ok(Delete {
            from: SourceRef::entity(target.source.target.name.clone()).with_alias(flat_alias),
            where_clause,
        })
    }

    fn bind_write_alias(&self, target: &mut WriteTarget<'m>, aliases: &mut AliasRegistry) -> String {
        let flat_alias = aliases.fresh(&target.alias);
        if let Some(binding) = target.scope.bindings_mut().first_mut() {
            binding.flat_alias = flat_alias.clone();
        }
        tracing::debug!(
            target: "querylens::flatten",
            entity = %target.source.target.name,
            alias = %flat_alias,
            "flatten write statement"
        );
        flat_alias
    }

    fn write_where(
        &self,
        target: &WriteTarget<'m>,
        flat_alias: &str,
        tokens: Option<&[Expr]>,
        aliases: &mut AliasRegistry,
    ) -> Result<Option<Vec<Expr>>, ResolveError> {
        let mut level = Level::new(&target.scope);
        let mut condition = if target.source.links.is_empty() {
            match &target.source.root_filter {
                Some(filter) => self.flatten_tokens(filter, &mut level, aliases)?,
                None => Vec::new(),
            }
        } else {
            self.scoped_condition(&target.source, flat_alias, &target.scope, aliases)?
        };

        if let Some(tokens) = tokens {
            let flat = self.flatten_tokens(tokens, &mut level, aliases)?;
            conjoin(&mut condition, flat);
        }
        if !level.joins.is_empty() {
            return Err(write_join_error());
        }
        Ok((!condition.is_empty()).then_some(condition))
    }
}

fn write_join_error() -> ResolveError {
    ResolveError::Unsupported("association path in a write statement".to_string())
}

/// Split links into association steps, each with the structure path leading
/// to it, plus the structure path after the last association. `None` if a
/// step is not a schema element.
fn association_steps<'l, 'm>(links: &'l [Link<'m>]) -> Option<(Vec<Step<'l, 'm>>, Vec<String>)> {
    let mut steps = Vec::new();
    let mut prefix = Vec::new();
    for link in links {
        let element = link.schema()?;
        if element.is_association() {
            steps.push(Step {
                link,
                element,
                prefix: std::mem::take(&mut prefix),
            });
        } else {
            prefix.push(link.id.clone());
        }
    }
    Some((steps, prefix))
}

fn exists_select(entity: &str, alias: &str, condition: Vec<Expr>) -> Select {
    Select::from_source(Source::entity_as(entity, alias))
        .with_columns(vec![Column::new(Expr::val(1)).into()])
        .with_where(condition)
}

/// Add `condition` to `tokens`; parenthesized unless it is the first
fn conjoin(tokens: &mut Vec<Expr>, condition: Vec<Expr>) {
    if condition.is_empty() {
        return;
    }
    if tokens.is_empty() {
        *tokens = condition;
    } else {
        and(tokens, vec![Expr::xpr(condition)]);
    }
}

fn flat_ref(alias: &str, path: &[String]) -> Expr {
    Expr::Ref(Ref::flat(alias, joins::column(path)))
}

fn leaf_name(name: &str, suffix: &[String]) -> String {
    if suffix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", name, suffix.join("_"))
    }
}

/// Column name a flat reference addresses
fn column_of(expr: &Expr) -> Option<&str> {
    expr.as_path()
        .and_then(|r| r.segments.last())
        .map(|s| s.id.as_str())
}

/// Table alias of the first table of a `from` clause
fn base_alias(source: &Source) -> Option<String> {
    match source {
        Source::Ref(r) => r.alias.clone(),
        Source::SubQuery(sub) => sub.alias.clone(),
        Source::Join(join) => join.args.first().and_then(base_alias),
        Source::Set(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bookshop;
    use pretty_assertions::assert_eq;

    fn at(alias: &str, column: &str) -> Expr {
        Expr::Ref(Ref::flat(alias, column))
    }

    fn column(alias: &str, name: &str) -> SelectItem {
        Column::new(at(alias, name)).into()
    }

    fn flatten(model: &Model, query: impl Into<Query>) -> Result<Select, ResolveError> {
        match QueryFlattener::new(model).flatten(&query.into())? {
            Query::Select(select) => Ok(select),
            other => panic!("expected a select, got {:?}", other),
        }
    }

    #[test]
    fn flatten_association_path_to_foreign_key() {
        let model = bookshop();
        let select = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"]), SelectItem::path(&["currency", "code"])]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(
            flat,
            Select::from_source(Source::entity_as("Books", "Books"))
                .with_columns(vec![column("Books", "ID"), column("Books", "currency_code")])
        );
    }

    #[test]
    fn flatten_structures_and_managed_associations() {
        let model = bookshop();
        let select = Select::from_entity("Books").with_columns(vec![
            SelectItem::path(&["structure"]),
            SelectItem::path(&["author"]),
            Column::path(&["dedication"]).with_alias("d").into(),
        ]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(
            flat.columns.unwrap(),
            vec![
                column("Books", "structure_foo"),
                column("Books", "structure_baz"),
                column("Books", "author_ID"),
                Column::new(at("Books", "dedication_text")).with_alias("d_text").into(),
                Column::new(at("Books", "dedication_sub_foo")).with_alias("d_sub_foo").into(),
            ]
        );
    }

    #[test]
    fn flatten_drops_unmanaged_associations() {
        let model = bookshop();
        let select = Select::from_entity("Books").with_columns(vec![SelectItem::path(&["texts"])]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(flat.columns, Some(vec![]));
    }

    #[test]
    fn flatten_wildcard_skips_virtual_and_unmanaged() {
        let model = bookshop();
        let flat = flatten(&model, Select::from_entity("Authors")).unwrap();
        assert_eq!(
            flat.columns.unwrap(),
            vec![
                column("Authors", "ID"),
                column("Authors", "name"),
                column("Authors", "dateOfBirth"),
                column("Authors", "address_street"),
                column("Authors", "address_city"),
                column("Authors", "country_code"),
            ]
        );

        let select = Select::from_entity("Books").with_columns(vec![SelectItem::path(&["isReviewable"])]);
        let flat = flatten(&model, select).unwrap();
        assert_eq!(
            flat.columns.unwrap(),
            vec![Column::new(Expr::val(Value::Null)).with_alias("isReviewable").into()]
        );
    }

    #[test]
    fn flatten_order_by() {
        let model = bookshop();
        let base = Select::from_entity("Books").with_columns(vec![SelectItem::path(&["ID"])]);

        let flat = flatten(
            &model,
            base.clone().with_order_by(vec![
                OrderBy::new(Expr::path(&["author"])).desc(),
                OrderBy::new(Expr::path(&["texts"])),
            ]),
        )
        .unwrap();
        assert_eq!(flat.order_by, vec![OrderBy::new(at("Books", "author_ID")).desc()]);

        let err = flatten(&model, base.with_order_by(vec![OrderBy::new(Expr::path(&["dedication"]))])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"dedication\" can't be used in order by as it expands to multiple fields"
        );
    }

    #[test]
    fn flatten_generates_left_joins() {
        let model = bookshop();
        let select = Select::from_entity("Books").with_columns(vec![
            SelectItem::path(&["author", "name"]),
            SelectItem::path(&["author", "dateOfBirth"]),
        ]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(
            flat.from,
            Source::Join(Join {
                join: JoinKind::Left,
                args: vec![Source::entity_as("Books", "Books"), Source::entity_as("Authors", "author")],
                on: Some(vec![at("author", "ID"), Expr::op("="), at("Books", "author_ID")]),
            })
        );
        assert_eq!(
            flat.columns.unwrap(),
            vec![
                Column::new(at("author", "name")).with_alias("author_name").into(),
                Column::new(at("author", "dateOfBirth")).with_alias("author_dateOfBirth").into(),
            ]
        );
    }

    #[test]
    fn flatten_filtered_association_joins_with_filter() {
        let model = bookshop();
        let path = Ref::path(&["author", "name"]).with_filter(
            0,
            vec![Expr::path(&["name"]), Expr::op("="), Expr::val("Poe")],
        );
        let select = Select::from_entity("Books").with_columns(vec![Column::new(Expr::Ref(path)).into()]);

        let flat = flatten(&model, select).unwrap();
        let Source::Join(join) = flat.from else {
            panic!("expected a join");
        };
        assert_eq!(
            join.on,
            Some(vec![
                at("author", "ID"),
                Expr::op("="),
                at("Books", "author_ID"),
                Expr::op("and"),
                Expr::xpr(vec![at("author", "name"), Expr::op("="), Expr::val("Poe")]),
            ])
        );
    }

    #[test]
    fn flatten_subquery_gets_fresh_alias() {
        let model = bookshop();
        let select = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"])])
            .with_where(vec![
                Expr::path(&["ID"]),
                Expr::op("in"),
                Expr::select(Select::from_entity("Books").with_columns(vec![SelectItem::path(&["ID"])])),
            ]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(
            flat.where_clause,
            Some(vec![
                at("Books", "ID"),
                Expr::op("in"),
                Expr::select(
                    Select::from_source(Source::entity_as("Books", "Books2"))
                        .with_columns(vec![column("Books2", "ID")])
                ),
            ])
        );
    }

    #[test]
    fn flatten_exists_predicate() {
        let model = bookshop();
        let select = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"])])
            .with_where(vec![Expr::op("exists"), Expr::path(&["texts"])]);

        let flat = flatten(&model, select).unwrap();
        let exists = Select::from_source(Source::entity_as("Texts", "texts"))
            .with_columns(vec![Column::new(Expr::val(1)).into()])
            .with_where(vec![Expr::xpr(vec![
                at("texts", "book_ID"),
                Expr::op("="),
                at("Books", "ID"),
            ])]);
        assert_eq!(flat.where_clause, Some(vec![Expr::op("exists"), Expr::select(exists)]));
    }

    #[test]
    fn flatten_scoped_source() {
        let model = bookshop();
        let select = Select::from_source(Source::path(Ref::path(&["Books", "author"])))
            .with_columns(vec![SelectItem::path(&["name"])])
            .with_where(vec![Expr::path(&["ID"]), Expr::op(">"), Expr::val(1)]);

        let flat = flatten(&model, select).unwrap();
        assert_eq!(flat.from, Source::entity_as("Authors", "author"));

        let exists = Select::from_source(Source::entity_as("Books", "Books"))
            .with_columns(vec![Column::new(Expr::val(1)).into()])
            .with_where(vec![at("author", "ID"), Expr::op("="), at("Books", "author_ID")]);
        assert_eq!(
            flat.where_clause,
            Some(vec![
                Expr::op("exists"),
                Expr::select(exists),
                Expr::op("and"),
                Expr::xpr(vec![at("author", "ID"), Expr::op(">"), Expr::val(1)]),
            ])
        );
    }

    #[test]
    fn flatten_expand_to_correlated_subquery() {
        let model = bookshop();
        let select = Select::from_entity("Books").with_columns(vec![
            SelectItem::path(&["ID"]),
            Column::path(&["author"]).with_expand(vec![SelectItem::path(&["name"])]).into(),
        ]);

        let flat = flatten(&model, select).unwrap();
        let mut author = Select::from_source(Source::entity_as("Authors", "author"))
            .with_columns(vec![column("author", "name")])
            .with_where(vec![at("author", "ID"), Expr::op("="), at("Books", "author_ID")]);
        author.one = true;

        assert_eq!(
            flat.columns.unwrap(),
            vec![
                column("Books", "ID"),
                Column::new(Expr::select(author)).with_alias("author").into(),
            ]
        );
    }

    #[test]
    fn flatten_self_references() {
        let model = bookshop();
        let total = Expr::xpr(vec![Expr::path(&["price"]), Expr::op("*"), Expr::path(&["stock"])]);
        let select = Select::from_entity("Books")
            .with_columns(vec![
                Column::path(&["$self", "total"]).with_alias("copy").into(),
                Column::new(total).with_alias("total").into(),
            ])
            .with_where(vec![Expr::path(&["$self", "total"]), Expr::op(">"), Expr::val(10)]);

        let flat = flatten(&model, select).unwrap();
        let product = Expr::xpr(vec![at("Books", "price"), Expr::op("*"), at("Books", "stock")]);
        assert_eq!(
            flat.columns.unwrap(),
            vec![
                Column::new(product.clone()).with_alias("copy").into(),
                Column::new(product.clone()).with_alias("total").into(),
            ]
        );
        assert_eq!(flat.where_clause, Some(vec![product, Expr::op(">"), Expr::val(10)]));
    }

    #[test]
    fn flatten_rejects_structures_in_expressions() {
        let model = bookshop();
        let select = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"])])
            .with_where(vec![Expr::path(&["author"]), Expr::op("="), Expr::val(1)]);
        let err = flatten(&model, select).unwrap_err();
        assert_eq!(
            err.to_string(),
            "An association can't be used as a value in an expression, but found \"author\""
        );

        let select = Select::from_entity("Books")
            .with_columns(vec![SelectItem::path(&["ID"])])
            .with_where(vec![Expr::path(&["dedication"]), Expr::op("="), Expr::val(1)]);
        let err = flatten(&model, select).unwrap_err();
        assert_eq!(
            err.to_string(),
            "A structured element can't be used as a value in an expression, but found \"dedication\""
        );
    }

    #[test]
    fn flatten_rejects_structures_in_clause_expressions() {
        let model = bookshop();
        let base = Select::from_entity("Books").with_columns(vec![SelectItem::path(&["ID"])]);

        let err = flatten(
            &model,
            base.clone().with_having(vec![Expr::path(&["author"]), Expr::op("="), Expr::val(1)]),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::AssociationInExpression { .. }));

        let err = flatten(
            &model,
            base.clone().with_group_by(vec![Expr::func("lower", vec![Expr::path(&["dedication"])])]),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::StructInExpression { .. }));

        let err = flatten(
            &model,
            base.with_order_by(vec![OrderBy::new(Expr::func("lower", vec![Expr::path(&["author"])]))]),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::AssociationInExpression { .. }));
    }

    #[test]
    fn flatten_group_by_keys_to_leaves() {
        let model = bookshop();
        let base = Select::from_entity("Books").with_columns(vec![SelectItem::path(&["ID"])]);

        let flat = flatten(
            &model,
            base.clone()
                .with_group_by(vec![Expr::path(&["dedication"]), Expr::path(&["author"])]),
        )
        .unwrap();
        assert_eq!(
            flat.group_by,
            vec![
                at("Books", "dedication_text"),
                at("Books", "dedication_sub_foo"),
                at("Books", "author_ID"),
            ]
        );

        let flat = flatten(&model, base.with_group_by(vec![Expr::path(&["texts"])])).unwrap();
        assert!(flat.group_by.is_empty());
    }

    #[test]
    fn flatten_renamed_association_of_subquery() {
        let model = bookshop();
        let inner = Select::from_entity("Books").with_columns(vec![
            SelectItem::path(&["ID"]),
            Column::path(&["author"]).with_alias("a").into(),
        ]);
        let flat_inner = Select::from_source(Source::entity_as("Books", "Books")).with_columns(vec![
            column("Books", "ID"),
            Column::new(at("Books", "author_ID")).with_alias("a_ID").into(),
        ]);
        let outer = |path: &[&str]| {
            Select::from_source(Source::subquery(inner.clone(), "B")).with_columns(vec![SelectItem::path(path)])
        };

        let flat = flatten(&model, outer(&["a", "ID"])).unwrap();
        assert_eq!(
            flat,
            Select::from_source(Source::subquery(flat_inner.clone(), "B")).with_columns(vec![column("B", "a_ID")])
        );

        let flat = flatten(&model, outer(&["a", "name"])).unwrap();
        assert_eq!(
            flat.from,
            Source::Join(Join {
                join: JoinKind::Left,
                args: vec![Source::subquery(flat_inner, "B"), Source::entity_as("Authors", "a")],
                on: Some(vec![at("a", "ID"), Expr::op("="), at("B", "a_ID")]),
            })
        );
        assert_eq!(
            flat.columns,
            Some(vec![Column::new(at("a", "name")).with_alias("a_name").into()])
        );
    }

    #[test]
    fn flatten_leaves_multi_source_queries_alone() {
        let model = bookshop();
        let query = Query::Select(
            Select::from_source(Source::cross(vec![
                Source::entity_as("Books", "B"),
                Source::entity_as("Authors", "A"),
            ]))
            .with_columns(vec![SelectItem::path(&["B", "ID"]), SelectItem::path(&["A", "name"])]),
        );

        let flat = QueryFlattener::new(&model).flatten(&query).unwrap();
        assert_eq!(flat, query);
    }

    #[test]
    fn flatten_write_statements() {
        let model = bookshop();

        let mut update = Update::entity("Books");
        update.data.insert("author".to_string(), serde_json::json!({ "ID": 7 }));
        update
            .with
            .insert("stock".to_string(), Expr::xpr(vec![Expr::path(&["stock"]), Expr::op("-"), Expr::val(1)]));
        update.where_clause = Some(vec![Expr::path(&["ID"]), Expr::op("="), Expr::val(1)]);

        let Query::Update(flat_update) = QueryFlattener::new(&model).flatten(&Query::Update(update)).unwrap() else {
            panic!("expected an update");
        };
        assert_eq!(flat_update.entity, SourceRef::entity("Books").with_alias("Books"));
        assert_eq!(flat_update.data.get("author_ID"), Some(&serde_json::json!(7)));
        assert_eq!(
            flat_update.with.get("stock"),
            Some(&Expr::xpr(vec![at("Books", "stock"), Expr::op("-"), Expr::val(1)]))
        );
        assert_eq!(
            flat_update.where_clause,
            Some(vec![at("Books", "ID"), Expr::op("="), Expr::val(1)])
        );

        let mut delete = Delete::from_entity("Books");
        delete.where_clause = Some(vec![Expr::path(&["author", "name"]), Expr::op("="), Expr::val("x")]);
        let err = QueryFlattener::new(&model).flatten(&Query::Delete(delete)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported construct: association path in a write statement"
        );
    }
}
