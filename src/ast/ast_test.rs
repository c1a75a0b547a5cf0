use std::collections::BTreeMap;

use crate::ast::Block;
use crate::ast::Body;
use crate::ast::Expr;

#[test]
fn test_block_id_fragments_with_label() {
    let b = Block::new(["remote", "http"], Some("example"), Body::new());
    assert_eq!(b.id_fragments(), vec!["remote", "http", "example"]);
    assert_eq!(b.block_name(), "remote.http");
}

#[test]
fn test_block_id_fragments_without_label() {
    let b = Block::new(["logging"], None, Body::new());
    assert_eq!(b.id_fragments(), vec!["logging"]);
}

#[test]
fn test_references_in_attributes() {
    let body = Body::new()
        .with_attr("input", Expr::reference(["a", "output"]))
        .with_attr("constant", Expr::number(5));

    assert_eq!(body.references(), vec![vec!["a", "output"]]);
}

#[test]
fn test_references_in_composites_and_nested_blocks() {
    let mut object = BTreeMap::new();
    object.insert("x".to_string(), Expr::reference(["c", "exports", "value"]));

    let body = Body::new()
        .with_attr(
            "list",
            Expr::Array(vec![
                Expr::reference(["a", "output"]),
                Expr::string("literal"),
            ]),
        )
        .with_attr("obj", Expr::Object(object))
        .with_block(Block::new(
            ["inner"],
            None,
            Body::new().with_attr("y", Expr::reference(["b", "output"])),
        ));

    let mut refs = body.references();
    refs.sort();
    assert_eq!(
        refs,
        vec![
            vec!["a".to_string(), "output".to_string()],
            vec!["b".to_string(), "output".to_string()],
            vec!["c".to_string(), "exports".to_string(), "value".to_string()],
        ]
    );
}

#[test]
fn test_expr_from_value_round_trips_literals() {
    let value = serde_json::json!({
        "s": "text",
        "n": 3,
        "nested": { "flag": true, "items": [1, null] },
    });
    let expr = Expr::from_value(&value);

    match expr {
        Expr::Object(entries) => {
            assert_eq!(entries.get("s"), Some(&Expr::string("text")));
            assert!(matches!(entries.get("nested"), Some(Expr::Object(_))));
        }
        other => panic!("expected object expression, got {other:?}"),
    }
}
