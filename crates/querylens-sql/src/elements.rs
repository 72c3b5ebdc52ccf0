//! Query element maps
//!
//! The output schema of one query level: an ordered, name-unique list of
//! column names and what each column denotes.

use crate::error::ResolveError;
use querylens_core::model::{Element, ElementKind, HasTarget, ScalarType};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// What an output column denotes
#[derive(Debug, Clone, PartialEq)]
pub enum InferredElement<'m> {
    /// A path column resolved to a schema element
    Element(&'m Element),

    /// Literal, expression, function or parameter, typed only if a cast or
    /// literal value gives the type
    Value(Option<ScalarType>),

    /// Expand or inline projection with its own element map
    Nested {
        elements: ElementMap<'m>,
        to_many: bool,
    },
}

impl<'m> InferredElement<'m> {
    /// Untyped synthetic column
    pub fn untyped() -> Self {
        Self::Value(None)
    }

    pub fn typed(scalar: ScalarType) -> Self {
        Self::Value(Some(scalar))
    }

    pub fn element(&self) -> Option<&'m Element> {
        match self {
            Self::Element(element) => Some(*element),
            _ => None,
        }
    }

    /// Scalar type of the column, if known
    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match self {
            Self::Element(element) => element.scalar_type(),
            Self::Value(scalar) => scalar.as_ref(),
            Self::Nested { .. } => None,
        }
    }

    pub fn is_association(&self) -> bool {
        self.element().map_or(false, |e| e.is_association())
    }
}

/// Ordered, name-unique map from output column name to [`InferredElement`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementMap<'m> {
    entries: Vec<(String, InferredElement<'m>)>,
}

impl<'m> ElementMap<'m> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&InferredElement<'m>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a new column; a name that is already present is a duplicate definition
    pub fn insert(&mut self, name: impl Into<String>, element: InferredElement<'m>) -> Result<(), ResolveError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(ResolveError::DuplicateDefinition { name });
        }
        self.entries.push((name, element));
        Ok(())
    }

    /// Replace a column in place, or append it if absent
    pub fn upsert(&mut self, name: impl Into<String>, element: InferredElement<'m>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = element,
            None => self.entries.push((name, element)),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InferredElement<'m>)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map of a definition's elements, in declaration order
    pub fn from_elements(elements: impl IntoIterator<Item = &'m Element>) -> Self {
        Self {
            entries: elements
                .into_iter()
                .map(|e| (e.name.clone(), InferredElement::Element(e)))
                .collect(),
        }
    }
}

impl Serialize for ElementMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, element) in &self.entries {
            map.serialize_entry(name, element)?;
        }
        map.end()
    }
}

impl Serialize for InferredElement<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Element(element) => ElementShape(element).serialize(serializer),
            Self::Value(None) => serializer.serialize_map(Some(0))?.end(),
            Self::Value(Some(scalar)) => scalar.serialize(serializer),
            Self::Nested {
                elements,
                to_many: false,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("elements", elements)?;
                map.end()
            }
            Self::Nested {
                elements,
                to_many: true,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("items", &Items(elements))?;
                map.end()
            }
        }
    }
}

struct Items<'a, 'm>(&'a ElementMap<'m>);

impl Serialize for Items<'_, '_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("elements", self.0)?;
        map.end()
    }
}

/// JSON view of a schema element
struct ElementShape<'a>(&'a Element);

struct KindShape<'a>(&'a ElementKind);

struct ChildElements<'a>(&'a querylens_core::Elements);

impl Serialize for ElementShape<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let element = self.0;
        let mut map = serializer.serialize_map(None)?;
        write_kind(&mut map, &element.kind)?;
        if element.key {
            map.serialize_entry("key", &true)?;
        }
        if element.is_virtual {
            map.serialize_entry("virtual", &true)?;
        }
        if element.not_null {
            map.serialize_entry("notNull", &true)?;
        }
        map.end()
    }
}

impl Serialize for KindShape<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        write_kind(&mut map, self.0)?;
        map.end()
    }
}

impl Serialize for ChildElements<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for child in self.0 {
            map.serialize_entry(&child.name, &ElementShape(child))?;
        }
        map.end()
    }
}

fn write_kind<M: SerializeMap>(map: &mut M, kind: &ElementKind) -> Result<(), M::Error> {
    match kind {
        ElementKind::Primitive(scalar) => {
            map.serialize_entry("type", &scalar.name)?;
            if let Some(length) = scalar.length {
                map.serialize_entry("length", &length)?;
            }
            if let Some(precision) = scalar.precision {
                map.serialize_entry("precision", &precision)?;
            }
            if let Some(scale) = scalar.scale {
                map.serialize_entry("scale", &scale)?;
            }
        }
        ElementKind::Structured(elements) => {
            map.serialize_entry("elements", &ChildElements(elements))?;
        }
        ElementKind::Collection(items) => {
            map.serialize_entry("items", &KindShape(items))?;
        }
        ElementKind::ManagedAssociation {
            target,
            keys,
            composition,
            ..
        } => {
            map.serialize_entry("type", association_type(*composition))?;
            map.serialize_entry("target", target)?;
            let keys: Vec<serde_json::Value> = keys
                .iter()
                .map(|k| match &k.alias {
                    Some(alias) => serde_json::json!({ "ref": k.path, "as": alias }),
                    None => serde_json::json!({ "ref": k.path }),
                })
                .collect();
            map.serialize_entry("keys", &keys)?;
        }
        ElementKind::UnmanagedAssociation {
            target,
            on,
            composition,
            ..
        } => {
            map.serialize_entry("type", association_type(*composition))?;
            map.serialize_entry("target", target)?;
            map.serialize_entry("on", on)?;
        }
    }
    if kind.is_to_many() {
        map.serialize_entry("cardinality", &serde_json::json!({ "max": "*" }))?;
    }
    Ok(())
}

fn association_type(composition: bool) -> &'static str {
    if composition {
        "cds.Composition"
    } else {
        "cds.Association"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querylens_core::model::ForeignKey;

    #[test]
    fn insert_rejects_duplicates() {
        let mut map = ElementMap::new();
        map.insert("ID", InferredElement::untyped()).unwrap();

        let err = map.insert("ID", InferredElement::untyped()).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate definition of element \"ID\"");
    }

    #[test]
    fn upsert_keeps_position() {
        let mut map = ElementMap::new();
        map.insert("a", InferredElement::untyped()).unwrap();
        map.insert("b", InferredElement::untyped()).unwrap();
        map.insert("c", InferredElement::untyped()).unwrap();

        map.upsert("b", InferredElement::typed(ScalarType::new("cds.String")));
        map.upsert("d", InferredElement::untyped());

        assert_eq!(map.names(), vec!["a", "b", "c", "d"]);
        assert_eq!(
            map.get("b").and_then(|e| e.scalar_type()).map(|t| t.name.as_str()),
            Some("cds.String")
        );
    }

    #[test]
    fn serializes_in_insertion_order() {
        let id = Element::scalar("ID", "cds.Integer").with_key();
        let author = Element::managed("author", "Authors", vec![ForeignKey::new("ID")]);

        let mut nested = ElementMap::new();
        nested.insert("title", InferredElement::untyped()).unwrap();

        let mut map = ElementMap::new();
        map.insert("zeta", InferredElement::Element(&id)).unwrap();
        map.insert("author", InferredElement::Element(&author)).unwrap();
        map.insert(
            "books",
            InferredElement::Nested {
                elements: nested,
                to_many: true,
            },
        )
        .unwrap();
        map.insert("total", InferredElement::typed(ScalarType::new("cds.Integer")))
            .unwrap();

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(
            json,
            r#"{"zeta":{"type":"cds.Integer","key":true},"author":{"type":"cds.Association","target":"Authors","keys":[{"ref":["ID"]}]},"books":{"items":{"elements":{"title":{}}}},"total":{"type":"cds.Integer"}}"#
        );
    }
}
