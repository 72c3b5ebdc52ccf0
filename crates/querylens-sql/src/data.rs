//! Write payload flattening
//!
//! Rewrites the keys of `entries`/`data` objects and insert column lists to
//! flat column names: structured values become `struct_leaf` keys, managed
//! association values become their foreign-key columns.

use crate::error::ResolveError;
use querylens_core::model::{Element, ElementKind, Elements, ForeignKeyLeaf, HasTarget, Model};
use serde_json::{Map, Value};

/// Flatten one row object. Keys that name no element are kept verbatim.
pub fn flatten_entry(
    model: &Model,
    elements: &Elements,
    entry: &Map<String, Value>,
) -> Result<Map<String, Value>, ResolveError> {
    let mut out = Map::new();
    for (key, value) in entry {
        match elements.get(key) {
            Some(element) if element.is_virtual => {}
            Some(element) => flatten_member(model, element, key, value, &mut out)?,
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(out)
}

/// Flat column names for an insert column list
pub fn flatten_columns(model: &Model, elements: &Elements, columns: &[String]) -> Result<Vec<String>, ResolveError> {
    let mut out = Vec::with_capacity(columns.len());
    for name in columns {
        match elements.get(name) {
            Some(element) => {
                reject_deep_write(element)?;
                out.extend(model.leaves(element, false).iter().map(|leaf| leaf.column_name(name)));
            }
            None => out.push(name.clone()),
        }
    }
    Ok(out)
}

/// Re-shape positional insert rows to the flattened column list
pub fn flatten_rows(
    model: &Model,
    elements: &Elements,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<Vec<Vec<Value>>, ResolveError> {
    let flat_columns = flatten_columns(model, elements, columns)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let entry: Map<String, Value> = columns.iter().cloned().zip(row.iter().cloned()).collect();
        let flat = flatten_entry(model, elements, &entry)?;
        out.push(
            flat_columns
                .iter()
                .map(|name| flat.get(name).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }
    Ok(out)
}

fn flatten_member(
    model: &Model,
    element: &Element,
    column: &str,
    value: &Value,
    out: &mut Map<String, Value>,
) -> Result<(), ResolveError> {
    match &element.kind {
        ElementKind::Primitive(_) | ElementKind::Collection(_) => {
            out.insert(column.to_string(), value.clone());
        }
        ElementKind::Structured(children) => match value {
            Value::Object(object) => {
                for (key, child_value) in object {
                    let child_column = format!("{}_{}", column, key);
                    match children.get(key) {
                        Some(child) => flatten_member(model, child, &child_column, child_value, out)?,
                        None => {
                            out.insert(child_column, child_value.clone());
                        }
                    }
                }
            }
            Value::Null => {
                for leaf in model.leaves(element, false) {
                    out.insert(leaf.column_name(column), Value::Null);
                }
            }
            other => {
                out.insert(column.to_string(), other.clone());
            }
        },
        ElementKind::ManagedAssociation { .. } => {
            reject_deep_write(element)?;
            let keys = model.foreign_keys(element);
            match value {
                Value::Object(object) => {
                    let known = |key: &String| keys.iter().any(|fk| fk.target_column.first() == Some(key));
                    if let Some(extra) = object.keys().find(|key| !known(key)) {
                        return Err(ResolveError::Unsupported(format!(
                            "deep write of \"{}\" into \"{}\"",
                            extra, element.name
                        )));
                    }
                    for fk in &keys {
                        if let Some(key_value) = lookup(object, &fk.target_column) {
                            out.insert(fk_column(column, fk), key_value.clone());
                        }
                    }
                }
                Value::Null => {
                    for fk in &keys {
                        out.insert(fk_column(column, fk), Value::Null);
                    }
                }
                scalar => match keys.as_slice() {
                    [fk] => {
                        out.insert(fk_column(column, fk), scalar.clone());
                    }
                    _ => {
                        return Err(ResolveError::Unsupported(format!(
                            "scalar value for \"{}\" with {} foreign keys",
                            element.name,
                            keys.len()
                        )))
                    }
                },
            }
        }
        ElementKind::UnmanagedAssociation { .. } => reject_deep_write(element)?,
    }
    Ok(())
}

fn reject_deep_write(element: &Element) -> Result<(), ResolveError> {
    let deep = match &element.kind {
        ElementKind::UnmanagedAssociation { .. } => true,
        kind => kind.is_to_many(),
    };
    if deep {
        return Err(ResolveError::Unsupported(format!("deep write into \"{}\"", element.name)));
    }
    Ok(())
}

fn fk_column(column: &str, fk: &ForeignKeyLeaf<'_>) -> String {
    format!("{}_{}", column, fk.suffix.join("_"))
}

/// Value at a key path, through nested objects or as a flat `a_b` key
fn lookup<'v>(object: &'v Map<String, Value>, path: &[String]) -> Option<&'v Value> {
    if let Some(value) = object.get(&path.join("_")) {
        return Some(value);
    }
    let (first, rest) = path.split_first()?;
    let value = object.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(nested) => lookup(nested, rest),
        _ => None,
    }
}
