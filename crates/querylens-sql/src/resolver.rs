//! Reference resolution
//!
//! Resolves a dotted path within a [`Scope`] to one [`Link`] per step.
//! Table aliases, `$self` and the builtin pseudo variables are handled here,
//! as are the rules for where infix filters may appear.

use crate::elements::{ElementMap, InferredElement};
use crate::error::ResolveError;
use crate::scope::{Binding, Scope, SourceTarget};
use querylens_core::model::{
    Definition, DefinitionKind, Element, ElementKind, Elements, HasTarget, Model, ScalarType,
};
use querylens_core::query::{Expr, Ref, Segment};

/// Builtin variables with a fixed shape
pub const PSEUDO_VARIABLES: &[&str] = &["$user", "$now", "$at", "$from", "$to", "$locale", "$tenant"];

const SELF: &str = "$self";

/// Where a resolved path starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefRoot {
    /// A source of this query level (or an enclosing one when `outer`)
    Source {
        alias: String,
        flat_alias: String,
        /// The path starts with the alias
        qualified: bool,
        outer: bool,
    },

    /// `$self.<column>`: a column of the query itself
    SelfColumn,

    /// `$user`, `$now`, ...
    Pseudo,
}

/// One resolved step of a path
#[derive(Debug, Clone, PartialEq)]
pub struct Link<'m> {
    pub id: String,

    /// What the step denotes
    pub element: InferredElement<'m>,

    /// Infix filter written on this step
    pub filter: Option<Vec<Expr>>,

    /// Entity the step was looked up in
    pub definition: Option<&'m Definition>,
}

impl<'m> Link<'m> {
    /// Schema element of the step, if it is one
    pub fn schema(&self) -> Option<&'m Element> {
        self.element.element()
    }

    pub fn is_association(&self) -> bool {
        self.schema().map_or(false, |e| e.is_association())
    }
}

/// A fully resolved path
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRef<'m> {
    pub root: RefRoot,
    pub links: Vec<Link<'m>>,
}

impl<'m> ResolvedRef<'m> {
    pub fn terminal(&self) -> Option<&Link<'m>> {
        self.links.last()
    }

    /// Element of the last step
    pub fn terminal_element(&self) -> Option<&'m Element> {
        self.terminal().and_then(|link| link.schema())
    }

    /// Ids of the navigated steps (without a leading table alias or `$self`)
    pub fn ids(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.id.as_str()).collect()
    }

    /// Implicit column name: navigated steps joined with `_`
    pub fn implicit_name(&self) -> String {
        self.ids().join("_")
    }

    pub fn is_structured(&self) -> bool {
        self.terminal_element().map_or(false, |e| e.is_structured())
            || matches!(
                self.terminal().map(|l| &l.element),
                Some(InferredElement::Nested { .. })
            )
    }

    pub fn is_association(&self) -> bool {
        self.terminal_element().map_or(false, |e| e.is_association())
    }
}

/// A `from` path (`Books[ID = 1]:author.books`) resolved to its final entity
#[derive(Debug, Clone)]
pub struct ScopedSource<'m> {
    pub root: &'m Definition,
    pub root_filter: Option<Vec<Expr>>,

    /// Steps after the root entity; empty for plain entity sources
    pub links: Vec<Link<'m>>,

    pub target: &'m Definition,
}

impl ScopedSource<'_> {
    /// Implicit alias: the last navigated step, or the entity's short name
    pub fn implicit_alias(&self) -> String {
        match self.links.last() {
            Some(link) => link.id.clone(),
            None => self.root.short_name().to_string(),
        }
    }
}

/// Where to look up the next step
enum Next<'s, 'm> {
    Source(&'s SourceTarget<'m>),
    Elements(&'m Elements),
    Nested(ElementMap<'m>),
    End,
}

/// Reference resolver over one scope
pub struct Resolver<'a, 'm> {
    model: &'m Model,
    scope: &'a Scope<'m>,
}

impl<'a, 'm> Resolver<'a, 'm> {
    pub fn new(model: &'m Model, scope: &'a Scope<'m>) -> Self {
        Self { model, scope }
    }

    pub fn scope(&self) -> &'a Scope<'m> {
        self.scope
    }

    /// Resolve a path in this scope
    pub fn resolve(&self, r: &Ref) -> Result<ResolvedRef<'m>, ResolveError> {
        let Some(first) = r.segments.first() else {
            return Err(ResolveError::Unsupported("empty reference".to_string()));
        };

        if first.id == SELF {
            if r.len() == 1 {
                return Err(self.not_found_in_elements(SELF));
            }
            return self.resolve_self(r);
        }

        // a lone segment is always an element, never a table alias
        if r.len() > 1 {
            if let Some(binding) = self.scope.binding(&first.id) {
                return self.resolve_in_binding(binding, r, false);
            }
        }

        let candidates: Vec<&Binding<'m>> = self
            .scope
            .bindings()
            .iter()
            .filter(|b| b.target.member(&first.id).is_some())
            .collect();

        match candidates.as_slice() {
            [binding] => {
                let root = RefRoot::Source {
                    alias: binding.alias.clone(),
                    flat_alias: binding.flat_alias.clone(),
                    qualified: false,
                    outer: false,
                };
                let sources = vec![binding.display_name()];
                self.walk(
                    root,
                    Next::Source(&binding.target),
                    binding.target.definition(),
                    &r.segments,
                    |name| ResolveError::NotFoundInElements {
                        name: name.to_string(),
                        sources: sources.clone(),
                    },
                )
            }
            [] => {
                if PSEUDO_VARIABLES.contains(&first.id.as_str()) {
                    return self.resolve_pseudo(r);
                }
                if r.len() > 1 {
                    if let Some(binding) = self.scope.outer_binding(&first.id) {
                        return self.resolve_in_binding(binding, r, true);
                    }
                }
                Err(self.not_found_in_elements(&first.id))
            }
            many => Err(ResolveError::AmbiguousReference {
                name: first.id.clone(),
                candidates: many
                    .iter()
                    .map(|b| format!("{}.{}", b.alias, first.id))
                    .collect(),
            }),
        }
    }

    /// Resolve an alias-qualified path; the first segment names the binding
    fn resolve_in_binding(
        &self,
        binding: &Binding<'m>,
        r: &Ref,
        outer: bool,
    ) -> Result<ResolvedRef<'m>, ResolveError> {
        if r.segments[0].filter.is_some() {
            return Err(ResolveError::FilterOnNonAssociation {
                segment: r.segments[0].id.clone(),
            });
        }

        let root = RefRoot::Source {
            alias: binding.alias.clone(),
            flat_alias: binding.flat_alias.clone(),
            qualified: true,
            outer,
        };
        let alias = binding.alias.clone();
        self.walk(
            root,
            Next::Source(&binding.target),
            binding.target.definition(),
            &r.segments[1..],
            |name| ResolveError::NotFoundIn {
                name: name.to_string(),
                scope: alias.clone(),
            },
        )
    }

    fn walk(
        &self,
        root: RefRoot,
        mut next: Next<'_, 'm>,
        mut definition: Option<&'m Definition>,
        segments: &[Segment],
        first_miss: impl Fn(&str) -> ResolveError,
    ) -> Result<ResolvedRef<'m>, ResolveError> {
        let mut links: Vec<Link<'m>> = Vec::with_capacity(segments.len());

        for segment in segments {
            let found = match &next {
                Next::Source(target) => target.member(&segment.id),
                Next::Elements(elements) => elements.get(&segment.id).map(InferredElement::Element),
                Next::Nested(map) => map.get(&segment.id).cloned(),
                Next::End => None,
            };

            let Some(element) = found else {
                return Err(match links.last() {
                    None => first_miss(&segment.id),
                    Some(prev) => ResolveError::NotFoundIn {
                        name: segment.id.clone(),
                        scope: prev.id.clone(),
                    },
                });
            };

            let link_definition = definition;
            next = match (&element, element.element().map(|e| &e.kind)) {
                (_, Some(ElementKind::Structured(children))) => Next::Elements(children),
                (_, Some(ElementKind::ManagedAssociation { target, .. }))
                | (_, Some(ElementKind::UnmanagedAssociation { target, .. })) => {
                    let target = self.definition(target)?;
                    definition = Some(target);
                    Next::Elements(&target.elements)
                }
                (InferredElement::Nested { elements, .. }, _) => Next::Nested(elements.clone()),
                _ => Next::End,
            };

            if let Some(filter) = &segment.filter {
                match element.element() {
                    Some(e) if e.is_association() => self.check_filter(&segment.id, e, filter)?,
                    _ => {
                        return Err(ResolveError::FilterOnNonAssociation {
                            segment: segment.id.clone(),
                        })
                    }
                }
            }

            links.push(Link {
                id: segment.id.clone(),
                element,
                filter: segment.filter.clone(),
                definition: link_definition,
            });
        }

        tracing::trace!(path = ?links.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), "resolved path");
        Ok(ResolvedRef { root, links })
    }

    /// `$self.<column>...` against the query's own element map
    fn resolve_self(&self, r: &Ref) -> Result<ResolvedRef<'m>, ResolveError> {
        let name = &r.segments[1].id;
        let entry = self
            .scope
            .columns()
            .and_then(|columns| columns.get(name))
            .cloned()
            .ok_or_else(|| ResolveError::NotFoundInColumns {
                name: name.clone(),
                suggestion: self.suggest(name),
            })?;

        let path = || r.ids().iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let check_step = |element: &InferredElement<'m>, segment: &Segment| {
            if segment.filter.is_some() {
                return Err(ResolveError::Unsupported(format!(
                    "infix filter on \"{}\" in a $self path",
                    segment.id
                )));
            }
            if element.is_association() {
                return Err(ResolveError::SelfPathThroughAssociation { path: path() });
            }
            Ok(())
        };

        let mut links = vec![Link {
            id: name.clone(),
            element: entry,
            filter: None,
            definition: None,
        }];

        for segment in &r.segments[2..] {
            let prev = &links[links.len() - 1];
            check_step(&prev.element, segment)?;

            let found = match (&prev.element, prev.element.element().map(|e| &e.kind)) {
                (_, Some(ElementKind::Structured(children))) => {
                    children.get(&segment.id).map(InferredElement::Element)
                }
                (InferredElement::Nested { elements, .. }, _) => elements.get(&segment.id).cloned(),
                _ => None,
            };

            let element = found.ok_or_else(|| ResolveError::NotFoundIn {
                name: segment.id.clone(),
                scope: prev.id.clone(),
            })?;
            links.push(Link {
                id: segment.id.clone(),
                element,
                filter: None,
                definition: None,
            });
        }

        Ok(ResolvedRef {
            root: RefRoot::SelfColumn,
            links,
        })
    }

    /// `$user.id`, `$now`, ... Unknown members of `$user` are untyped.
    fn resolve_pseudo(&self, r: &Ref) -> Result<ResolvedRef<'m>, ResolveError> {
        let var = r.segments[0].id.as_str();
        let string = || Some(ScalarType::new("cds.String"));
        let timestamp = || Some(ScalarType::new("cds.Timestamp"));

        let base = match var {
            "$user" | "$locale" | "$tenant" => string(),
            _ => timestamp(),
        };

        let mut links = vec![Link {
            id: var.to_string(),
            element: InferredElement::Value(base),
            filter: None,
            definition: None,
        }];

        for segment in &r.segments[1..] {
            if var != "$user" {
                return Err(ResolveError::NotFoundIn {
                    name: segment.id.clone(),
                    scope: var.to_string(),
                });
            }
            let scalar = match (links.len(), segment.id.as_str()) {
                (1, "id") | (1, "locale") | (1, "tenant") => string(),
                _ => None,
            };
            links.push(Link {
                id: segment.id.clone(),
                element: InferredElement::Value(scalar),
                filter: None,
                definition: None,
            });
        }

        Ok(ResolvedRef {
            root: RefRoot::Pseudo,
            links,
        })
    }

    /// Resolve a `from` path: an entity name followed by association steps
    pub fn resolve_source(&self, path: &Ref) -> Result<ScopedSource<'m>, ResolveError> {
        let Some(first) = path.segments.first() else {
            return Err(ResolveError::Unsupported("empty query source".to_string()));
        };

        let root = self
            .model
            .definition(&first.id)
            .ok_or_else(|| ResolveError::DefinitionNotFound {
                name: first.id.clone(),
            })?;

        let display = || {
            let rest: Vec<&str> = path.segments[1..].iter().map(|s| s.id.as_str()).collect();
            if rest.is_empty() {
                first.id.clone()
            } else {
                format!("{}:{}", first.id, rest.join("."))
            }
        };

        if root.kind != DefinitionKind::Entity {
            return Err(ResolveError::InvalidQuerySource { path: display() });
        }

        if let Some(filter) = &first.filter {
            let mut scope = self.scope.child();
            scope.add(Binding::new(root.short_name(), SourceTarget::Entity(root)))?;
            Resolver::new(self.model, &scope).check_refs(filter)?;
        }

        let root_name = root.name.clone();
        let resolved = self.walk(
            RefRoot::Pseudo,
            Next::Elements(&root.elements),
            Some(root),
            &path.segments[1..],
            |name| ResolveError::NotFoundInElements {
                name: name.to_string(),
                sources: vec![root_name.clone()],
            },
        )?;

        let target = match resolved.links.last() {
            None => root,
            Some(link) => match link.schema().and_then(|e| self.model.target_of(e)) {
                Some(target) => target,
                None => return Err(ResolveError::InvalidQuerySource { path: display() }),
            },
        };

        Ok(ScopedSource {
            root,
            root_filter: first.filter.clone(),
            links: resolved.links,
            target,
        })
    }

    /// Validate an infix filter written on association step `id`.
    ///
    /// Filter paths are relative to the association target and may step
    /// through a further association only to read its foreign keys.
    fn check_filter(&self, id: &str, association: &'m Element, filter: &[Expr]) -> Result<(), ResolveError> {
        let target = self
            .model
            .target_of(association)
            .ok_or_else(|| ResolveError::DefinitionNotFound {
                name: association.target().unwrap_or_default().to_string(),
            })?;

        let mut scope = self.scope.child();
        scope.add(Binding::new(id, SourceTarget::Entity(target)))?;
        let resolver = Resolver::new(self.model, &scope);

        for_each_ref(filter, &mut |r| {
            if r.first() == Some(SELF) {
                return Ok(());
            }
            let resolved = resolver.resolve(r)?;
            resolver.check_foreign_key_access(&resolved)
        })
    }

    /// Resolve every reference of a token list (subqueries excluded)
    pub fn check_refs(&self, tokens: &[Expr]) -> Result<(), ResolveError> {
        for_each_ref(tokens, &mut |r| self.resolve(r).map(|_| ()))
    }

    fn check_foreign_key_access(&self, resolved: &ResolvedRef<'m>) -> Result<(), ResolveError> {
        for (i, link) in resolved.links.iter().enumerate() {
            let rest: Vec<String> = resolved.links[i + 1..].iter().map(|l| l.id.clone()).collect();
            let Some(next) = rest.first() else {
                break;
            };
            let Some(element) = link.schema().filter(|e| e.is_association()) else {
                continue;
            };

            let reaches_key = self
                .model
                .foreign_keys(element)
                .iter()
                .any(|fk| fk.target_column.starts_with(&rest));
            if !reaches_key {
                return Err(ResolveError::OnlyForeignKeysInFilter {
                    association: link.id.clone(),
                    name: next.clone(),
                });
            }
            break;
        }
        Ok(())
    }

    fn definition(&self, name: &str) -> Result<&'m Definition, ResolveError> {
        self.model
            .definition(name)
            .ok_or_else(|| ResolveError::DefinitionNotFound {
                name: name.to_string(),
            })
    }

    fn not_found_in_elements(&self, name: &str) -> ResolveError {
        ResolveError::NotFoundInElements {
            name: name.to_string(),
            sources: self.scope.bindings().iter().map(|b| b.display_name()).collect(),
        }
    }

    /// `"<alias>.<name>"` for the first source that has an element `name`
    fn suggest(&self, name: &str) -> Option<String> {
        self.scope
            .bindings()
            .iter()
            .find(|b| b.target.member(name).is_some())
            .map(|b| format!("{}.{}", b.alias, name))
    }
}

/// Call `f` for every reference in a token list, descending into nested
/// expressions and infix filters but not into subqueries
pub fn for_each_ref(
    tokens: &[Expr],
    f: &mut dyn FnMut(&Ref) -> Result<(), ResolveError>,
) -> Result<(), ResolveError> {
    for token in tokens {
        match token {
            Expr::Ref(r) => f(r)?,
            Expr::Func(func) => for_each_ref(&func.args, f)?,
            Expr::Xpr(xpr) => for_each_ref(&xpr.xpr, f)?,
            Expr::List(list) => for_each_ref(&list.list, f)?,
            Expr::Val(_) | Expr::Param(_) | Expr::Op(_) | Expr::SubQuery(_) => {}
        }
    }
    Ok(())
}
