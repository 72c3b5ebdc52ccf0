//! Wildcard expansion
//!
//! Turns `*` into the members of every source in scope, in declaration
//! order, and detects names that more than one source would contribute.

use crate::elements::InferredElement;
use crate::error::ResolveError;
use crate::scope::Scope;
use querylens_core::query::Column;

/// One element introduced by `*`
#[derive(Debug, Clone, PartialEq)]
pub struct WildcardEntry<'m> {
    pub name: String,

    /// Alias of the source the element comes from
    pub alias: String,

    pub element: InferredElement<'m>,

    /// Several sources are in scope, so the column must be alias-qualified
    pub qualified: bool,
}

impl WildcardEntry<'_> {
    /// Column equivalent to this entry
    pub fn to_column(&self) -> Column {
        if self.qualified {
            Column::path(&[self.alias.as_str(), self.name.as_str()])
        } else {
            Column::path(&[self.name.as_str()])
        }
    }
}

/// Expand `*` over all sources of `scope`.
///
/// `excluding` removes names from the expansion only, as does `before` (the
/// columns listed ahead of the `*`). `explicit` lists every name the select
/// list defines itself; those never count as ambiguous and keep the position
/// of their first source.
pub fn expand<'m>(
    scope: &Scope<'m>,
    excluding: &[String],
    before: &[String],
    explicit: &[String],
    exclude_large_binaries: bool,
) -> Result<Vec<WildcardEntry<'m>>, ResolveError> {
    let qualified = scope.is_multi_source();
    let mut entries: Vec<WildcardEntry<'m>> = Vec::new();
    let mut collisions: Vec<(String, Vec<String>)> = Vec::new();

    for binding in scope.bindings() {
        for (name, element) in binding.target.members() {
            if excluding.contains(&name) || before.contains(&name) {
                continue;
            }
            if exclude_large_binaries && element.element().map_or(false, |e| e.is_large_binary()) {
                continue;
            }

            let qualified_name = format!("{}.{}", binding.alias, name);
            if let Some(existing) = entries.iter().find(|e| e.name == name) {
                if explicit.contains(&name) {
                    continue;
                }
                match collisions.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, candidates)) => candidates.push(qualified_name),
                    None => collisions.push((
                        name.clone(),
                        vec![format!("{}.{}", existing.alias, name), qualified_name],
                    )),
                }
                continue;
            }

            entries.push(WildcardEntry {
                name,
                alias: binding.alias.clone(),
                element,
                qualified,
            });
        }
    }

    if !collisions.is_empty() {
        collisions.sort_by_key(|(name, _)| entries.iter().position(|e| e.name == *name));
        return Err(ResolveError::AmbiguousWildcard { collisions });
    }

    tracing::trace!(count = entries.len(), "expanded wildcard");
    Ok(entries)
}
