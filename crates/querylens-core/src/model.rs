//! Schema model: definitions, elements and associations
//!
//! The model is linked once (see [`crate::csn`]) and is never mutated afterwards,
//! so a single instance can be shared read-only by any number of inferences.

use crate::query::Expr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base type excluded from wildcard expansion by default
pub const LARGE_BINARY: &str = "cds.LargeBinary";

/// Upper bound for foreign-key recursion (managed association keys that are
/// themselves managed associations)
pub const MAX_KEY_DEPTH: usize = 16;

/// Kind of a top-level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// Queryable entity
    Entity,

    /// Named structured type
    Type,

    /// Aspect (reusable element set, not queryable)
    Aspect,
}

/// Scalar type with optional type arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalarType {
    /// Qualified base type name, e.g. `cds.Integer`
    #[serde(rename = "type")]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl ScalarType {
    /// Scalar type without type arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// Set the length argument
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set precision and scale
    pub fn with_precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.length, self.precision, self.scale) {
            (Some(l), _, _) => write!(f, "{}({})", self.name, l),
            (None, Some(p), Some(s)) => write!(f, "{}({}, {})", self.name, p, s),
            (None, Some(p), None) => write!(f, "{}({})", self.name, p),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Foreign key of a managed association, addressing an element of the target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Path of the key element inside the target entity
    pub path: Vec<String>,

    /// Optional rename of the key (`keys { ID as id }`)
    pub alias: Option<String>,
}

impl ForeignKey {
    /// Foreign key addressing a top-level element of the target
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            path: vec![name.into()],
            alias: None,
        }
    }

    /// Name the key contributes to generated foreign-key columns
    pub fn name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.path.join("_"))
    }
}

/// What an element is. Exactly one shape per element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    /// Scalar column
    Primitive(ScalarType),

    /// Nested record with its own elements
    Structured(Elements),

    /// Collection-valued element (`many ...`); stored as a single column
    Collection(Box<ElementKind>),

    /// Association whose foreign keys are derived from the target's keys
    ManagedAssociation {
        target: String,
        keys: Vec<ForeignKey>,
        to_many: bool,
        composition: bool,
    },

    /// Association defined by an explicit `on` condition
    UnmanagedAssociation {
        target: String,
        on: Vec<Expr>,
        to_many: bool,
        composition: bool,
    },
}

/// Capability: owns an ordered set of named elements
pub trait HasElements {
    fn elements(&self) -> Option<&Elements>;

    fn element(&self, name: &str) -> Option<&Element> {
        self.elements().and_then(|elements| elements.get(name))
    }
}

/// Capability: points at an association target
pub trait HasTarget {
    fn target(&self) -> Option<&str>;

    fn is_to_many(&self) -> bool;
}

impl HasElements for ElementKind {
    fn elements(&self) -> Option<&Elements> {
        match self {
            Self::Structured(elements) => Some(elements),
            _ => None,
        }
    }
}

impl HasTarget for ElementKind {
    fn target(&self) -> Option<&str> {
        match self {
            Self::ManagedAssociation { target, .. } | Self::UnmanagedAssociation { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    fn is_to_many(&self) -> bool {
        match self {
            Self::ManagedAssociation { to_many, .. } | Self::UnmanagedAssociation { to_many, .. } => {
                *to_many
            }
            _ => false,
        }
    }
}

/// A member of an entity or structured type
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Element name (unqualified)
    pub name: String,

    /// Shape of the element
    pub kind: ElementKind,

    /// Part of the primary key
    pub key: bool,

    /// Virtual elements have no database column
    pub is_virtual: bool,

    pub not_null: bool,

    pub unique: bool,
}

impl Element {
    /// Create an element with all flags unset
    pub fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
            is_virtual: false,
            not_null: false,
            unique: false,
        }
    }

    /// Scalar element of the given base type
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, ElementKind::Primitive(ScalarType::new(type_name)))
    }

    /// Structured element with the given children
    pub fn structured(name: impl Into<String>, elements: Vec<Element>) -> Self {
        Self::new(name, ElementKind::Structured(Elements::from(elements)))
    }

    /// To-one managed association
    pub fn managed(name: impl Into<String>, target: impl Into<String>, keys: Vec<ForeignKey>) -> Self {
        Self::new(
            name,
            ElementKind::ManagedAssociation {
                target: target.into(),
                keys,
                to_many: false,
                composition: false,
            },
        )
    }

    /// Unmanaged association with an `on` condition
    pub fn unmanaged(
        name: impl Into<String>,
        target: impl Into<String>,
        on: Vec<Expr>,
        to_many: bool,
    ) -> Self {
        Self::new(
            name,
            ElementKind::UnmanagedAssociation {
                target: target.into(),
                on,
                to_many,
                composition: false,
            },
        )
    }

    /// Mark as key element
    pub fn with_key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark as virtual element
    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn is_association(&self) -> bool {
        self.target().is_some()
    }

    pub fn is_managed_association(&self) -> bool {
        matches!(self.kind, ElementKind::ManagedAssociation { .. })
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.kind, ElementKind::Structured(_))
    }

    /// Scalar type, if this element is a primitive
    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match &self.kind {
            ElementKind::Primitive(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// Type name as it appears in the model (`cds.Association` for associations)
    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Primitive(scalar) => Some(&scalar.name),
            ElementKind::ManagedAssociation { composition: true, .. }
            | ElementKind::UnmanagedAssociation { composition: true, .. } => Some("cds.Composition"),
            ElementKind::ManagedAssociation { .. } | ElementKind::UnmanagedAssociation { .. } => {
                Some("cds.Association")
            }
            ElementKind::Collection(items) => match items.as_ref() {
                ElementKind::Primitive(scalar) => Some(&scalar.name),
                _ => None,
            },
            ElementKind::Structured(_) => None,
        }
    }

    pub fn is_large_binary(&self) -> bool {
        self.type_name() == Some(LARGE_BINARY)
    }
}

impl HasElements for Element {
    fn elements(&self) -> Option<&Elements> {
        self.kind.elements()
    }
}

impl HasTarget for Element {
    fn target(&self) -> Option<&str> {
        self.kind.target()
    }

    fn is_to_many(&self) -> bool {
        self.kind.is_to_many()
    }
}

/// Ordered, name-unique element list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Elements(Vec<Element>);

impl Elements {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Find an element by name
    pub fn get(&self, name: &str) -> Option<&Element> {
        self.0.iter().find(|e| e.name == name)
    }

    /// Append an element, replacing a same-named one in place
    pub fn push(&mut self, element: Element) {
        match self.0.iter_mut().find(|e| e.name == element.name) {
            Some(existing) => *existing = element,
            None => self.0.push(element),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Element>> for Elements {
    fn from(elements: Vec<Element>) -> Self {
        let mut out = Elements::new();
        for element in elements {
            out.push(element);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Elements {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A named top-level definition with elements
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    /// Qualified name, e.g. `bookshop.Books`
    pub name: String,

    pub kind: DefinitionKind,

    pub elements: Elements,
}

impl Definition {
    /// Create an entity definition
    pub fn entity(name: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Entity,
            elements: Elements::from(elements),
        }
    }

    /// Last dot-separated part of the qualified name (`bookshop.Books` -> `Books`)
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Key elements in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.key)
    }
}

impl HasElements for Definition {
    fn elements(&self) -> Option<&Elements> {
        Some(&self.elements)
    }
}

/// A scalar leaf of a (possibly structured or associated) element
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<'m> {
    /// Path below the flattened element, joined with `_` into the column suffix
    pub suffix: Vec<String>,

    /// The scalar element (for foreign keys: the key element of the target)
    pub element: &'m Element,
}

impl Leaf<'_> {
    /// Column name of this leaf below `prefix`
    pub fn column_name(&self, prefix: &str) -> String {
        let mut name = prefix.to_string();
        for segment in &self.suffix {
            if !name.is_empty() {
                name.push('_');
            }
            name.push_str(segment);
        }
        name
    }
}

/// A foreign-key column of a managed association
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyLeaf<'m> {
    /// Suffix below the association name (`author` + `["ID"]` -> `author_ID`)
    pub suffix: Vec<String>,

    /// Flat column path inside the target entity (`["ID"]`)
    pub target_column: Vec<String>,

    pub element: &'m Element,
}

/// Linked schema model
#[derive(Debug, Clone, Default)]
pub struct Model {
    definitions: HashMap<String, Definition>,
}

impl Model {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, replacing one of the same name
    pub fn add_definition(&mut self, definition: Definition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Builder-style variant of [`Model::add_definition`]
    pub fn with_definition(mut self, definition: Definition) -> Self {
        self.add_definition(definition);
        self
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Queryable entity by qualified name
    pub fn entity(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .get(name)
            .filter(|d| d.kind == DefinitionKind::Entity)
    }

    /// Target entity of an association element
    pub fn target_of(&self, element: &Element) -> Option<&Definition> {
        element.target().and_then(|target| self.definition(target))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Scalar leaves of an element in declaration order.
    ///
    /// Structured elements contribute their leaves depth-first, managed
    /// associations their foreign keys, unmanaged associations nothing.
    pub fn leaves<'m>(&'m self, element: &'m Element, skip_virtual: bool) -> Vec<Leaf<'m>> {
        let mut out = Vec::new();
        self.collect_leaves(element, skip_virtual, Vec::new(), 0, &mut out);
        out
    }

    fn collect_leaves<'m>(
        &'m self,
        element: &'m Element,
        skip_virtual: bool,
        suffix: Vec<String>,
        depth: usize,
        out: &mut Vec<Leaf<'m>>,
    ) {
        if skip_virtual && element.is_virtual {
            return;
        }

        match &element.kind {
            ElementKind::Primitive(_) | ElementKind::Collection(_) => {
                out.push(Leaf { suffix, element });
            }
            ElementKind::Structured(elements) => {
                for child in elements {
                    let mut child_suffix = suffix.clone();
                    child_suffix.push(child.name.clone());
                    self.collect_leaves(child, skip_virtual, child_suffix, depth, out);
                }
            }
            ElementKind::ManagedAssociation { .. } => {
                if depth >= MAX_KEY_DEPTH {
                    return;
                }
                for fk in self.foreign_keys_at(element, depth) {
                    let mut fk_suffix = suffix.clone();
                    fk_suffix.extend(fk.suffix);
                    out.push(Leaf {
                        suffix: fk_suffix,
                        element: fk.element,
                    });
                }
            }
            ElementKind::UnmanagedAssociation { .. } => {}
        }
    }

    /// Foreign-key columns of a managed association, fully expanded to scalars
    pub fn foreign_keys<'m>(&'m self, element: &'m Element) -> Vec<ForeignKeyLeaf<'m>> {
        self.foreign_keys_at(element, 0)
    }

    fn foreign_keys_at<'m>(&'m self, element: &'m Element, depth: usize) -> Vec<ForeignKeyLeaf<'m>> {
        let ElementKind::ManagedAssociation { target, keys, .. } = &element.kind else {
            return Vec::new();
        };
        let Some(target) = self.definition(target) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for key in keys {
            let Some(key_element) = resolve_path(&target.elements, &key.path) else {
                continue;
            };

            let mut inner = Vec::new();
            self.collect_leaves(key_element, false, Vec::new(), depth + 1, &mut inner);
            for leaf in inner {
                let mut suffix = vec![key.name()];
                suffix.extend(leaf.suffix.iter().cloned());

                let mut target_column = key.path.clone();
                target_column.extend(leaf.suffix);

                out.push(ForeignKeyLeaf {
                    suffix,
                    target_column,
                    element: leaf.element,
                });
            }
        }
        out
    }
}

/// Walk a path of element names through structured elements
pub fn resolve_path<'e>(elements: &'e Elements, path: &[String]) -> Option<&'e Element> {
    let (first, rest) = path.split_first()?;
    let element = elements.get(first)?;
    if rest.is_empty() {
        return Some(element);
    }
    element.elements().and_then(|children| resolve_path(children, rest))
}
