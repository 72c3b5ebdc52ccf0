//! Bookshop model shared by the unit tests

use querylens_core::model::{Definition, Element, ForeignKey, Model, ScalarType};
use querylens_core::query::Expr;
use querylens_core::ElementKind;

fn string(name: &str, length: u32) -> Element {
    Element::new(name, ElementKind::Primitive(ScalarType::new("cds.String").with_length(length)))
}

/// `on: [<assoc>.<back>, =, $self]`
fn backlink(assoc: &str, back: &str) -> Vec<Expr> {
    vec![Expr::path(&[assoc, back]), Expr::op("="), Expr::path(&["$self"])]
}

pub fn bookshop() -> Model {
    Model::new()
        .with_definition(Definition::entity(
            "Books",
            vec![
                Element::scalar("ID", "cds.Integer").with_key(),
                string("title", 111),
                Element::scalar("stock", "cds.Integer"),
                Element::new(
                    "price",
                    ElementKind::Primitive(ScalarType::new("cds.Decimal").with_precision(9, Some(2))),
                ),
                Element::managed("currency", "Currencies", vec![ForeignKey::new("code")]),
                Element::managed("author", "Authors", vec![ForeignKey::new("ID")]),
                Element::managed("genre", "Genres", vec![ForeignKey::new("ID")]),
                Element::structured(
                    "dedication",
                    vec![
                        Element::scalar("text", "cds.String"),
                        Element::structured("sub", vec![Element::scalar("foo", "cds.String")]),
                    ],
                ),
                Element::structured(
                    "structure",
                    vec![
                        Element::scalar("foo", "cds.String"),
                        Element::scalar("baz", "cds.Integer"),
                    ],
                ),
                Element::unmanaged("texts", "Texts", backlink("texts", "book"), true),
                Element::scalar("image", "cds.LargeBinary"),
                Element::scalar("isReviewable", "cds.Boolean").with_virtual(),
            ],
        ))
        .with_definition(Definition::entity(
            "Authors",
            vec![
                Element::scalar("ID", "cds.Integer").with_key(),
                string("name", 111),
                Element::scalar("dateOfBirth", "cds.Date"),
                Element::structured(
                    "address",
                    vec![
                        Element::scalar("street", "cds.String"),
                        Element::scalar("city", "cds.String"),
                    ],
                ),
                Element::managed("country", "Countries", vec![ForeignKey::new("code")]),
                Element::unmanaged("books", "Books", backlink("books", "author"), true),
            ],
        ))
        .with_definition(Definition::entity(
            "Currencies",
            vec![
                string("code", 3).with_key(),
                Element::scalar("symbol", "cds.String"),
                Element::scalar("name", "cds.String"),
            ],
        ))
        .with_definition(Definition::entity(
            "Countries",
            vec![string("code", 3).with_key(), Element::scalar("name", "cds.String")],
        ))
        .with_definition(Definition::entity(
            "Genres",
            vec![
                Element::scalar("ID", "cds.Integer").with_key(),
                Element::scalar("name", "cds.String"),
                Element::managed("parent", "Genres", vec![ForeignKey::new("ID")]),
            ],
        ))
        .with_definition(Definition::entity(
            "Texts",
            vec![
                string("locale", 14).with_key(),
                Element::managed("book", "Books", vec![ForeignKey::new("ID")]).with_key(),
                Element::scalar("title", "cds.String"),
            ],
        ))
}
