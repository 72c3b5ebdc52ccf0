//! Join conditions for association steps
//!
//! Builds the condition that links rows of a parent table to rows of an
//! association target, used for generated joins, `exists` predicates,
//! scoped sources and expand subqueries alike.

use crate::error::ResolveError;
use querylens_core::model::{resolve_path, Element, ElementKind, HasTarget, Model};
use querylens_core::query::{Expr, Ref};

const SELF: &str = "$self";

/// Table aliases handed out within one statement
#[derive(Debug, Default)]
pub struct AliasRegistry {
    used: Vec<String>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base`, or `base2`, `base3`, ... if taken
    pub fn fresh(&mut self, base: &str) -> String {
        let mut alias = base.to_string();
        let mut n = 2;
        while self.used.contains(&alias) {
            alias = format!("{}{}", base, n);
            n += 1;
        }
        tracing::trace!(alias = %alias, "assign table alias");
        self.used.push(alias.clone());
        alias
    }
}

/// A `LEFT JOIN` generated for an association step
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Alias of the table the association belongs to
    pub parent: String,

    /// Column path of the association inside the parent (`dedication.author`)
    pub path: Vec<String>,

    pub filter: Option<Vec<Expr>>,

    pub alias: String,

    /// Target entity name
    pub target: String,

    pub on: Vec<Expr>,
}

/// Flat column name for a path inside a table
pub fn column(path: &[String]) -> String {
    path.join("_")
}

/// Condition linking rows of `parent` to rows of `target` along `association`.
///
/// `name` is the column name of the association inside `parent`, which
/// differs from the element name when a subquery renamed it. `prefix` is the
/// column path of the structure holding the association (empty for
/// top-level associations).
pub fn association_condition(
    model: &Model,
    association: &Element,
    name: &str,
    parent: &str,
    prefix: &[String],
    target: &str,
) -> Result<Vec<Expr>, ResolveError> {
    match &association.kind {
        ElementKind::ManagedAssociation { .. } => {
            let keys = model.foreign_keys(association);
            if keys.is_empty() {
                return Err(ResolveError::Unsupported(format!(
                    "association \"{}\" without foreign keys",
                    association.name
                )));
            }

            let mut own = prefix.to_vec();
            own.push(name.to_string());

            let mut tokens = Vec::new();
            for fk in keys {
                let mut fk_column = own.clone();
                fk_column.extend(fk.suffix);
                and(
                    &mut tokens,
                    vec![
                        flat(target, &column(&fk.target_column)),
                        Expr::op("="),
                        flat(parent, &column(&fk_column)),
                    ],
                );
            }
            Ok(tokens)
        }
        ElementKind::UnmanagedAssociation { on, .. } => {
            let rewrite = OnRewrite {
                model,
                association,
                name,
                parent,
                prefix,
                target,
            };
            rewrite.tokens(on)
        }
        _ => Err(ResolveError::Unsupported(format!(
            "\"{}\" is not an association",
            association.name
        ))),
    }
}

/// Append `condition` to `tokens`, separated by `and`
pub fn and(tokens: &mut Vec<Expr>, condition: Vec<Expr>) {
    if condition.is_empty() {
        return;
    }
    if !tokens.is_empty() {
        tokens.push(Expr::op("and"));
    }
    tokens.extend(condition);
}

fn flat(alias: &str, column: &str) -> Expr {
    Expr::Ref(Ref::flat(alias, column))
}

/// Rewrites the `on` condition of an unmanaged association
struct OnRewrite<'a> {
    model: &'a Model,
    association: &'a Element,
    name: &'a str,
    parent: &'a str,
    prefix: &'a [String],
    target: &'a str,
}

impl OnRewrite<'_> {
    /// The `on` condition names the association by its declared name
    fn is_root(&self, id: &str) -> bool {
        id == self.association.name || id == self.name
    }

    fn tokens(&self, on: &[Expr]) -> Result<Vec<Expr>, ResolveError> {
        let mut out = Vec::with_capacity(on.len());
        let mut i = 0;
        while i < on.len() {
            if let Some(backlink) = self.backlink(&on[i..])? {
                out.push(backlink);
                i += 3;
                continue;
            }
            out.push(self.token(&on[i])?);
            i += 1;
        }
        Ok(out)
    }

    fn token(&self, token: &Expr) -> Result<Expr, ResolveError> {
        Ok(match token {
            Expr::Ref(r) => {
                let ids: Vec<String> = r.ids().iter().map(|s| s.to_string()).collect();
                if ids.len() > 1 && self.is_root(&ids[0]) {
                    flat(self.target, &column(&ids[1..]))
                } else {
                    let mut path = self.prefix.to_vec();
                    path.extend(ids);
                    flat(self.parent, &column(&path))
                }
            }
            Expr::Xpr(xpr) => Expr::xpr(self.tokens(&xpr.xpr)?),
            Expr::Func(func) => Expr::func(func.func.clone(), self.tokens(&func.args)?),
            other => other.clone(),
        })
    }

    /// `<assoc>.<back> = $self` (either way round): the back association's
    /// foreign keys equal the parent's keys
    fn backlink(&self, window: &[Expr]) -> Result<Option<Expr>, ResolveError> {
        let [left, op, right, ..] = window else {
            return Ok(None);
        };
        if !op.is_op("=") {
            return Ok(None);
        }

        let is_self = |e: &Expr| matches!(e.as_path(), Some(r) if r.len() == 1 && r.first() == Some(SELF));
        let back = match (left.as_path(), right.as_path()) {
            (Some(r), _) if is_self(right) => r,
            (_, Some(r)) if is_self(left) => r,
            _ => return Ok(None),
        };
        if back.len() < 2 || !back.first().is_some_and(|id| self.is_root(id)) {
            return Ok(None);
        }

        let back_path: Vec<String> = back.ids()[1..].iter().map(|s| s.to_string()).collect();
        let target = self
            .model
            .target_of(self.association)
            .ok_or_else(|| ResolveError::DefinitionNotFound {
                name: self.association.target().unwrap_or_default().to_string(),
            })?;
        let Some(back_element) = resolve_path(&target.elements, &back_path) else {
            return Err(ResolveError::NotFoundIn {
                name: back_path.join("."),
                scope: self.association.name.clone(),
            });
        };

        let mut tokens = Vec::new();
        for fk in self.model.foreign_keys(back_element) {
            let mut fk_column = back_path.clone();
            fk_column.extend(fk.suffix);
            and(
                &mut tokens,
                vec![
                    flat(self.target, &column(&fk_column)),
                    Expr::op("="),
                    flat(self.parent, &column(&fk.target_column)),
                ],
            );
        }
        if tokens.is_empty() {
            return Err(ResolveError::Unsupported(format!(
                "\"{}\" compared with $self has no foreign keys",
                back
            )));
        }
        Ok(Some(Expr::xpr(tokens)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bookshop;

    #[test]
    fn fresh_aliases_are_numbered() {
        let mut aliases = AliasRegistry::new();
        assert_eq!(aliases.fresh("Books"), "Books");
        assert_eq!(aliases.fresh("Books"), "Books2");
        assert_eq!(aliases.fresh("Books"), "Books3");
        assert_eq!(aliases.fresh("author"), "author");
    }

    #[test]
    fn managed_condition_uses_foreign_keys() {
        let model = bookshop();
        let author = model.entity("Books").unwrap().elements.get("author").unwrap();

        let on = association_condition(&model, author, "author", "Books", &[], "author").unwrap();
        assert_eq!(
            on,
            vec![
                Expr::Ref(Ref::flat("author", "ID")),
                Expr::op("="),
                Expr::Ref(Ref::flat("Books", "author_ID")),
            ]
        );
    }

    #[test]
    fn managed_condition_uses_column_name_of_parent() {
        let model = bookshop();
        let author = model.entity("Books").unwrap().elements.get("author").unwrap();

        let on = association_condition(&model, author, "a", "B", &[], "a").unwrap();
        assert_eq!(
            on,
            vec![
                Expr::Ref(Ref::flat("a", "ID")),
                Expr::op("="),
                Expr::Ref(Ref::flat("B", "a_ID")),
            ]
        );
    }

    #[test]
    fn unmanaged_backlink_compares_keys() {
        let model = bookshop();
        let books = model.entity("Authors").unwrap().elements.get("books").unwrap();

        let on = association_condition(&model, books, "books", "Authors", &[], "books").unwrap();
        assert_eq!(
            on,
            vec![Expr::xpr(vec![
                Expr::Ref(Ref::flat("books", "author_ID")),
                Expr::op("="),
                Expr::Ref(Ref::flat("Authors", "ID")),
            ])]
        );
    }
}
