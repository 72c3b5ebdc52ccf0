//! Scope table
//!
//! Maps the table aliases of one query level to what they denote. Nested
//! levels get a [`Scope::child`] whose outer bindings are an owned snapshot,
//! so sibling subqueries never share mutable scope state.

use crate::elements::{ElementMap, InferredElement};
use crate::error::ResolveError;
use querylens_core::model::{Definition, Elements};
use std::rc::Rc;

/// What a table alias denotes
#[derive(Debug, Clone)]
pub enum SourceTarget<'m> {
    /// Entity of the model (direct or navigated source)
    Entity(&'m Definition),

    /// Element map of a subquery in `from`
    Query(Rc<ElementMap<'m>>),

    /// Structured element, used as scope for expand and inline over structures
    Structure {
        name: String,
        elements: &'m Elements,
        definition: Option<&'m Definition>,
    },
}

impl<'m> SourceTarget<'m> {
    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<InferredElement<'m>> {
        match self {
            Self::Query(columns) => columns.get(name).cloned(),
            _ => self
                .schema_elements()
                .and_then(|elements| elements.get(name))
                .map(InferredElement::Element),
        }
    }

    /// All members in declaration order
    pub fn members(&self) -> Vec<(String, InferredElement<'m>)> {
        match self {
            Self::Query(columns) => columns
                .iter()
                .map(|(name, e)| (name.to_string(), e.clone()))
                .collect(),
            _ => self
                .schema_elements()
                .map(|elements| {
                    elements
                        .iter()
                        .map(|e| (e.name.clone(), InferredElement::Element(e)))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn schema_elements(&self) -> Option<&'m Elements> {
        match *self {
            Self::Entity(def) => Some(&def.elements),
            Self::Structure { elements, .. } => Some(elements),
            Self::Query(_) => None,
        }
    }

    /// Entity whose table holds the members
    pub fn definition(&self) -> Option<&'m Definition> {
        match *self {
            Self::Entity(def) => Some(def),
            Self::Structure { definition, .. } => definition,
            Self::Query(_) => None,
        }
    }

    fn same_as(&self, other: &SourceTarget<'m>) -> bool {
        match (self, other) {
            (Self::Entity(a), Self::Entity(b)) => a.name == b.name,
            (Self::Query(a), Self::Query(b)) => Rc::ptr_eq(a, b),
            (Self::Structure { name: a, .. }, Self::Structure { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// A table alias registered in a scope
#[derive(Debug, Clone)]
pub struct Binding<'m> {
    /// Alias as written (or implied) in the query
    pub alias: String,

    /// Alias used in flattened output; equals `alias` until flattening renames it
    pub flat_alias: String,

    pub target: SourceTarget<'m>,
}

impl<'m> Binding<'m> {
    pub fn new(alias: impl Into<String>, target: SourceTarget<'m>) -> Self {
        let alias = alias.into();
        Self {
            flat_alias: alias.clone(),
            alias,
            target,
        }
    }

    /// Name used in "not found" messages
    pub fn display_name(&self) -> String {
        match &self.target {
            SourceTarget::Entity(def) => def.name.clone(),
            SourceTarget::Structure { name, .. } => name.clone(),
            SourceTarget::Query(_) => self.alias.clone(),
        }
    }
}

/// Aliases of one query level plus a snapshot of the enclosing levels
#[derive(Debug, Clone, Default)]
pub struct Scope<'m> {
    bindings: Vec<Binding<'m>>,
    outer: Vec<Binding<'m>>,
    columns: Option<Rc<ElementMap<'m>>>,
}

impl<'m> Scope<'m> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias. Rebinding an alias to the same target is a no-op.
    pub fn add(&mut self, binding: Binding<'m>) -> Result<(), ResolveError> {
        if let Some(existing) = self.binding(&binding.alias) {
            if existing.target.same_as(&binding.target) {
                return Ok(());
            }
            return Err(ResolveError::DuplicateAlias {
                alias: binding.alias,
            });
        }
        tracing::trace!(alias = %binding.alias, source = %binding.display_name(), "bind alias");
        self.bindings.push(binding);
        Ok(())
    }

    pub fn bindings(&self) -> &[Binding<'m>] {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut [Binding<'m>] {
        &mut self.bindings
    }

    /// Binding of this level by alias
    pub fn binding(&self, alias: &str) -> Option<&Binding<'m>> {
        self.bindings.iter().find(|b| b.alias == alias)
    }

    /// Binding of an enclosing level by alias, innermost first
    pub fn outer_binding(&self, alias: &str) -> Option<&Binding<'m>> {
        self.outer.iter().find(|b| b.alias == alias)
    }

    /// The only binding, for single-source levels
    pub fn single(&self) -> Option<&Binding<'m>> {
        match self.bindings.as_slice() {
            [binding] => Some(binding),
            _ => None,
        }
    }

    pub fn is_multi_source(&self) -> bool {
        self.bindings.len() > 1
    }

    /// Scope for a nested query level
    pub fn child(&self) -> Scope<'m> {
        let mut outer = self.bindings.clone();
        outer.extend(self.outer.iter().cloned());
        Scope {
            bindings: Vec::new(),
            outer,
            columns: None,
        }
    }

    /// Make the level's own columns addressable through `$self`
    pub fn set_columns(&mut self, columns: Rc<ElementMap<'m>>) {
        self.columns = Some(columns);
    }

    pub fn columns(&self) -> Option<&ElementMap<'m>> {
        self.columns.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querylens_core::model::Element;

    fn books() -> Definition {
        Definition::entity(
            "bookshop.Books",
            vec![
                Element::scalar("ID", "cds.Integer").with_key(),
                Element::scalar("title", "cds.String"),
            ],
        )
    }

    fn authors() -> Definition {
        Definition::entity("bookshop.Authors", vec![Element::scalar("ID", "cds.Integer")])
    }

    #[test]
    fn duplicate_alias_on_different_targets() {
        let books = books();
        let authors = authors();

        let mut scope = Scope::new();
        scope.add(Binding::new("B", SourceTarget::Entity(&books))).unwrap();

        let err = scope
            .add(Binding::new("B", SourceTarget::Entity(&authors)))
            .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate alias \"B\"");
    }

    #[test]
    fn same_alias_same_target_is_allowed() {
        let books = books();

        let mut scope = Scope::new();
        scope.add(Binding::new("Books", SourceTarget::Entity(&books))).unwrap();
        scope.add(Binding::new("Books", SourceTarget::Entity(&books))).unwrap();

        assert_eq!(scope.bindings().len(), 1);
        assert!(!scope.is_multi_source());
    }

    #[test]
    fn child_sees_outer_bindings() {
        let books = books();
        let authors = authors();

        let mut scope = Scope::new();
        scope.add(Binding::new("Books", SourceTarget::Entity(&books))).unwrap();

        let mut child = scope.child();
        child.add(Binding::new("Authors", SourceTarget::Entity(&authors))).unwrap();

        assert!(child.binding("Books").is_none());
        assert!(child.outer_binding("Books").is_some());
        assert_eq!(child.single().map(|b| b.alias.as_str()), Some("Authors"));
    }

    #[test]
    fn members_in_declaration_order() {
        let books = books();
        let target = SourceTarget::Entity(&books);

        let names: Vec<String> = target.members().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["ID", "title"]);
        assert!(target.member("title").is_some());
        assert!(target.member("price").is_none());
    }
}
