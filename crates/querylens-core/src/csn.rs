//! CSN-like model loading
//!
//! Parses the JSON schema description and links it into a [`Model`]:
//! named types are resolved, associations are classified as managed or
//! unmanaged, and missing foreign keys are propagated from the target's keys.

use crate::model::{
    Definition, DefinitionKind, Element, ElementKind, Elements, ForeignKey, Model, ScalarType,
    MAX_KEY_DEPTH,
};
use crate::query::Expr;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

const ASSOCIATION: &str = "cds.Association";
const COMPOSITION: &str = "cds.Composition";

/// Maximum depth when following named type chains
const MAX_TYPE_DEPTH: usize = 16;

#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(default)]
    definitions: HashMap<String, RawDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    kind: Option<String>,

    #[serde(rename = "type", default)]
    type_name: Option<String>,

    #[serde(default)]
    elements: Option<RawElements>,

    #[serde(default)]
    items: Option<Box<RawElement>>,

    #[serde(default)]
    length: Option<u32>,

    #[serde(default)]
    precision: Option<u32>,

    #[serde(default)]
    scale: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    #[serde(rename = "type", default)]
    type_name: Option<String>,

    #[serde(default)]
    key: bool,

    #[serde(rename = "virtual", default)]
    is_virtual: bool,

    #[serde(default)]
    not_null: bool,

    #[serde(default)]
    unique: bool,

    #[serde(default)]
    target: Option<String>,

    #[serde(default)]
    keys: Option<Vec<RawKey>>,

    #[serde(default)]
    on: Option<Vec<Expr>>,

    #[serde(default)]
    cardinality: Option<RawCardinality>,

    #[serde(default)]
    elements: Option<RawElements>,

    #[serde(default)]
    items: Option<Box<RawElement>>,

    #[serde(default)]
    length: Option<u32>,

    #[serde(default)]
    precision: Option<u32>,

    #[serde(default)]
    scale: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawKey {
    #[serde(rename = "ref")]
    path: Vec<String>,

    #[serde(rename = "as", default)]
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCardinality {
    #[serde(default)]
    max: Option<serde_json::Value>,
}

impl RawCardinality {
    fn is_to_many(&self) -> bool {
        match &self.max {
            Some(serde_json::Value::String(s)) => s == "*",
            Some(serde_json::Value::Number(n)) => n.as_u64().map_or(false, |n| n > 1),
            _ => false,
        }
    }
}

/// Element map that keeps JSON declaration order
#[derive(Debug, Default)]
struct RawElements(Vec<(String, RawElement)>);

impl<'de> Deserialize<'de> for RawElements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ElementsVisitor;

        impl<'de> Visitor<'de> for ElementsVisitor {
            type Value = RawElements;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of element definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut elements = Vec::new();
                while let Some((name, element)) = map.next_entry::<String, RawElement>()? {
                    if elements.iter().any(|(n, _): &(String, RawElement)| *n == name) {
                        return Err(de::Error::custom(format!("duplicate element \"{}\"", name)));
                    }
                    elements.push((name, element));
                }
                Ok(RawElements(elements))
            }
        }

        deserializer.deserialize_map(ElementsVisitor)
    }
}

/// Load a model from a JSON string
pub fn load(json: &str) -> Result<Model, ModelError> {
    let raw: RawModel =
        serde_json::from_str(json).map_err(|e| ModelError::ParseError(e.to_string()))?;
    Linker { raw: &raw }.link()
}

/// Load a model from a JSON file
pub fn load_file(path: &Path) -> Result<Model, ModelError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ModelError::IoError(path.display().to_string(), e.to_string()))?;
    load(&contents)
}

impl Model {
    /// Parse and link a model from its JSON form
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        load(json)
    }
}

struct Linker<'r> {
    raw: &'r RawModel,
}

impl<'r> Linker<'r> {
    fn link(&self) -> Result<Model, ModelError> {
        let mut model = Model::new();

        for (name, def) in &self.raw.definitions {
            let kind = match def.kind.as_deref() {
                Some("entity") => DefinitionKind::Entity,
                Some("aspect") => DefinitionKind::Aspect,
                Some("type") | None => DefinitionKind::Type,
                Some(_) => continue,
            };

            // scalar types only matter while linking
            let Some(elements) = &def.elements else {
                continue;
            };

            model.add_definition(Definition {
                name: name.clone(),
                kind,
                elements: self.link_elements(name, elements, 0)?,
            });
        }

        self.check_foreign_keys(&model)?;

        tracing::debug!(definitions = model.len(), "linked model");
        Ok(model)
    }

    fn link_elements(
        &self,
        owner: &str,
        raw: &RawElements,
        depth: usize,
    ) -> Result<Elements, ModelError> {
        let mut elements = Elements::new();
        for (name, element) in &raw.0 {
            elements.push(self.link_element(owner, name, element, depth)?);
        }
        Ok(elements)
    }

    fn link_element(
        &self,
        owner: &str,
        name: &str,
        raw: &RawElement,
        depth: usize,
    ) -> Result<Element, ModelError> {
        let qualified = format!("{}:{}", owner, name);
        let kind = self.link_kind(&qualified, raw, depth)?;

        Ok(Element {
            name: name.to_string(),
            kind,
            key: raw.key,
            is_virtual: raw.is_virtual,
            not_null: raw.not_null,
            unique: raw.unique,
        })
    }

    fn link_kind(
        &self,
        qualified: &str,
        raw: &RawElement,
        depth: usize,
    ) -> Result<ElementKind, ModelError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ModelError::CyclicType(qualified.to_string()));
        }

        let type_name = raw.type_name.as_deref();
        if matches!(type_name, Some(ASSOCIATION) | Some(COMPOSITION)) {
            return self.link_association(qualified, raw);
        }

        if let Some(elements) = &raw.elements {
            return Ok(ElementKind::Structured(
                self.link_elements(qualified, elements, depth + 1)?,
            ));
        }

        if let Some(items) = &raw.items {
            let inner = self.link_kind(qualified, items, depth + 1)?;
            return Ok(ElementKind::Collection(Box::new(inner)));
        }

        match type_name {
            None => Err(ModelError::MissingType(qualified.to_string())),
            Some(t) if t.starts_with("cds.") => Ok(ElementKind::Primitive(ScalarType {
                name: t.to_string(),
                length: raw.length,
                precision: raw.precision,
                scale: raw.scale,
            })),
            Some(t) => self.link_named_type(qualified, t, raw, depth + 1),
        }
    }

    /// Resolve an element typed by another definition
    fn link_named_type(
        &self,
        qualified: &str,
        type_name: &str,
        raw: &RawElement,
        depth: usize,
    ) -> Result<ElementKind, ModelError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ModelError::CyclicType(qualified.to_string()));
        }

        let def = self
            .raw
            .definitions
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType {
                element: qualified.to_string(),
                type_name: type_name.to_string(),
            })?;

        if let Some(elements) = &def.elements {
            return Ok(ElementKind::Structured(
                self.link_elements(type_name, elements, depth + 1)?,
            ));
        }

        if let Some(items) = &def.items {
            let inner = self.link_kind(qualified, items, depth + 1)?;
            return Ok(ElementKind::Collection(Box::new(inner)));
        }

        match def.type_name.as_deref() {
            Some(base) if base.starts_with("cds.") => Ok(ElementKind::Primitive(ScalarType {
                name: base.to_string(),
                length: raw.length.or(def.length),
                precision: raw.precision.or(def.precision),
                scale: raw.scale.or(def.scale),
            })),
            Some(next) => self.link_named_type(qualified, next, raw, depth + 1),
            None => Err(ModelError::MissingType(type_name.to_string())),
        }
    }

    fn link_association(&self, qualified: &str, raw: &RawElement) -> Result<ElementKind, ModelError> {
        let target = raw
            .target
            .clone()
            .ok_or_else(|| ModelError::MissingTarget(qualified.to_string()))?;

        let target_def = self
            .raw
            .definitions
            .get(&target)
            .filter(|d| d.elements.is_some())
            .ok_or_else(|| ModelError::UnknownTarget {
                element: qualified.to_string(),
                target: target.clone(),
            })?;

        let to_many = raw.cardinality.as_ref().map_or(false, |c| c.is_to_many());
        let composition = raw.type_name.as_deref() == Some(COMPOSITION);

        if let Some(on) = &raw.on {
            return Ok(ElementKind::UnmanagedAssociation {
                target,
                on: on.clone(),
                to_many,
                composition,
            });
        }

        let target_elements = target_def
            .elements
            .as_ref()
            .map(|e| e.0.as_slice())
            .unwrap_or_default();

        let keys = match &raw.keys {
            Some(keys) => {
                let mut out = Vec::new();
                for key in keys {
                    let known = key
                        .path
                        .first()
                        .map_or(false, |first| target_elements.iter().any(|(n, _)| n == first));
                    if !known {
                        return Err(ModelError::UnknownForeignKey {
                            element: qualified.to_string(),
                            key: key.path.join("."),
                        });
                    }
                    out.push(ForeignKey {
                        path: key.path.clone(),
                        alias: key.alias.clone(),
                    });
                }
                out
            }
            None if to_many => Vec::new(),
            None => target_elements
                .iter()
                .filter(|(_, e)| e.key)
                .map(|(name, _)| ForeignKey::new(name.clone()))
                .collect(),
        };

        Ok(ElementKind::ManagedAssociation {
            target,
            keys,
            to_many,
            composition,
        })
    }

    /// Reject managed associations whose keys lead back to themselves
    fn check_foreign_keys(&self, model: &Model) -> Result<(), ModelError> {
        for def in model.definitions() {
            for element in def.elements.iter().filter(|e| e.is_managed_association()) {
                let mut chain = Vec::new();
                if !key_chain_terminates(model, element, &mut chain) {
                    return Err(ModelError::CyclicForeignKey(format!(
                        "{}:{}",
                        def.name, element.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn key_chain_terminates<'m>(model: &'m Model, element: &'m Element, chain: &mut Vec<&'m str>) -> bool {
    let ElementKind::ManagedAssociation { target, keys, .. } = &element.kind else {
        return true;
    };
    if chain.len() >= MAX_KEY_DEPTH || chain.contains(&target.as_str()) {
        return false;
    }
    let Some(target_def) = model.definition(target) else {
        return true;
    };

    chain.push(target);
    let ok = keys.iter().all(|key| {
        match crate::model::resolve_path(&target_def.elements, &key.path) {
            Some(key_element) => key_chain_terminates(model, key_element, chain),
            None => true,
        }
    });
    chain.pop();
    ok
}

/// Model loading errors
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to read model {0}: {1}")]
    IoError(String, String),

    #[error("Model parse error: {0}")]
    ParseError(String),

    #[error("Element \"{0}\" has no type")]
    MissingType(String),

    #[error("Association \"{0}\" has no target")]
    MissingTarget(String),

    #[error("Association \"{element}\" targets unknown entity \"{target}\"")]
    UnknownTarget { element: String, target: String },

    #[error("Foreign key \"{key}\" of \"{element}\" is not an element of the target")]
    UnknownForeignKey { element: String, key: String },

    #[error("Element \"{element}\" has unknown type \"{type_name}\"")]
    UnknownType { element: String, type_name: String },

    #[error("Type of \"{0}\" is cyclic")]
    CyclicType(String),

    #[error("Foreign keys of \"{0}\" are cyclic")]
    CyclicForeignKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HasElements, HasTarget};

    const BOOKSHOP: &str = r#"{
        "definitions": {
            "bookshop.Books": {
                "kind": "entity",
                "elements": {
                    "ID": { "type": "cds.Integer", "key": true },
                    "title": { "type": "cds.String", "length": 111 },
                    "price": { "type": "bookshop.Price" },
                    "author": { "type": "cds.Association", "target": "bookshop.Authors" },
                    "texts": {
                        "type": "cds.Composition",
                        "target": "bookshop.Texts",
                        "cardinality": { "max": "*" },
                        "on": [{ "ref": ["texts", "book"] }, "=", { "ref": ["$self"] }]
                    },
                    "address": { "type": "bookshop.Address" },
                    "image": { "type": "cds.LargeBinary" }
                }
            },
            "bookshop.Authors": {
                "kind": "entity",
                "elements": {
                    "ID": { "type": "cds.Integer", "key": true },
                    "name": { "type": "cds.String" }
                }
            },
            "bookshop.Texts": {
                "kind": "entity",
                "elements": {
                    "locale": { "type": "cds.String", "key": true },
                    "book": { "type": "cds.Association", "target": "bookshop.Books", "keys": [{ "ref": ["ID"], "as": "id" }] }
                }
            },
            "bookshop.Price": { "kind": "type", "type": "cds.Decimal", "precision": 10, "scale": 2 },
            "bookshop.Address": {
                "kind": "type",
                "elements": {
                    "street": { "type": "cds.String" },
                    "city": { "type": "cds.String" }
                }
            },
            "bookshop.CatalogService": { "kind": "service" }
        }
    }"#;

    #[test]
    fn link_bookshop() {
        let model = load(BOOKSHOP).unwrap();
        let books = model.entity("bookshop.Books").unwrap();

        assert_eq!(books.kind, DefinitionKind::Entity);
        assert_eq!(
            books.elements.names(),
            vec!["ID", "title", "price", "author", "texts", "address", "image"]
        );
    }

    #[test]
    fn named_scalar_type_is_resolved() {
        let model = load(BOOKSHOP).unwrap();
        let price = model.entity("bookshop.Books").unwrap().element("price").unwrap();

        let scalar = price.scalar_type().unwrap();
        assert_eq!(scalar.name, "cds.Decimal");
        assert_eq!(scalar.precision, Some(10));
        assert_eq!(scalar.scale, Some(2));
    }

    #[test]
    fn named_structured_type_is_inlined() {
        let model = load(BOOKSHOP).unwrap();
        let address = model.entity("bookshop.Books").unwrap().element("address").unwrap();

        assert!(address.is_structured());
        assert_eq!(address.elements().unwrap().names(), vec!["street", "city"]);
    }

    #[test]
    fn managed_keys_are_propagated() {
        let model = load(BOOKSHOP).unwrap();
        let author = model.entity("bookshop.Books").unwrap().element("author").unwrap();

        match &author.kind {
            ElementKind::ManagedAssociation { keys, to_many, .. } => {
                assert_eq!(keys, &vec![ForeignKey::new("ID")]);
                assert!(!to_many);
            }
            other => panic!("expected managed association, got {:?}", other),
        }
    }

    #[test]
    fn on_condition_makes_unmanaged() {
        let model = load(BOOKSHOP).unwrap();
        let texts = model.entity("bookshop.Books").unwrap().element("texts").unwrap();

        assert!(matches!(texts.kind, ElementKind::UnmanagedAssociation { .. }));
        assert!(texts.is_to_many());
        assert_eq!(texts.type_name(), Some("cds.Composition"));
    }

    #[test]
    fn aliased_foreign_key() {
        let model = load(BOOKSHOP).unwrap();
        let book = model.entity("bookshop.Texts").unwrap().element("book").unwrap();

        let names: Vec<String> = model
            .leaves(book, true)
            .iter()
            .map(|l| l.column_name("book"))
            .collect();
        assert_eq!(names, vec!["book_id"]);
    }

    #[test]
    fn non_entity_kinds_are_skipped() {
        let model = load(BOOKSHOP).unwrap();
        assert!(model.definition("bookshop.CatalogService").is_none());
        assert!(model.entity("bookshop.Address").is_none());
        assert!(model.definition("bookshop.Address").is_some());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let json = r#"{"definitions": {"A": {"kind": "entity", "elements": {
            "b": {"type": "cds.Association", "target": "B"}
        }}}}"#;
        let err = load(json).unwrap_err();
        assert!(matches!(err, ModelError::UnknownTarget { .. }));
    }

    #[test]
    fn cyclic_foreign_keys_are_rejected() {
        let json = r#"{"definitions": {"A": {"kind": "entity", "elements": {
            "self": {"type": "cds.Association", "target": "A", "keys": [{"ref": ["self"]}]}
        }}}}"#;
        let err = load(json).unwrap_err();
        assert!(matches!(err, ModelError::CyclicForeignKey(_)));
    }
}
