//! The `Meta` standard macros.

mod common;

use common::*;
use stagecraft::ast::builder::*;
use stagecraft::ast::{CallExpr, Expr, Item, Span, TypeRef};
use stagecraft::diagnostics::ErrorKind;
use stagecraft::macros::{register_builtins, Expander, HandleRegistry, SpliceKind};
use stagecraft::semantic::SymbolTable;

fn builtins() -> (SymbolTable, HandleRegistry) {
    let mut table = SymbolTable::new();
    let registry = HandleRegistry::new();
    register_builtins(&mut table, &registry);
    (table, registry)
}

#[test]
fn here_reports_file_and_offset_through_the_call_binding() {
    let (table, registry) = builtins();
    let here = Expr::Call(CallExpr {
        span: Span::new(17, 28),
        ..call_expr("Meta.Here", vec![])
    });
    let tree = script("src/main.cs", vec![local(TypeRef::String, "at", Some(here))]);

    let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
    assert_eq!(rendered(&expansion.tree), vec!["string at = \"src/main.cs:17\";"]);
    assert_eq!(expansion.trace[0].splice, SpliceKind::Expression);
}

#[test]
fn function_name_names_the_enclosing_function() {
    let (table, registry) = builtins();
    let tree = stagecraft::ast::SyntaxTree::new(
        "names.cs",
        vec![
            Item::Function(function(
                "Render",
                vec![],
                TypeRef::Void,
                vec![expr_stmt(call("Log", vec![call("Meta.FunctionName", vec![])]))],
            )),
            Item::Statements(block(vec![expr_stmt(call("Log", vec![call("FunctionName", vec![])]))])),
        ],
    );

    let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
    match (&expansion.tree.items[0], &expansion.tree.items[1]) {
        (Item::Function(render), Item::Statements(top)) => {
            assert_eq!(render.body.to_string(), "{ Log(\"Render\"); }");
            assert_eq!(top.to_string(), "{ Log(\"<top-level>\"); }");
        }
        other => panic!("unexpected items {:?}", other),
    }
}

#[test]
fn stringify_prints_constants_and_expressions_as_written() {
    let (table, registry) = builtins();
    let tree = script(
        "stringify.cs",
        vec![
            local(TypeRef::String, "a", Some(call("Stringify", vec![int(42)]))),
            local(TypeRef::String, "b", Some(call("Stringify", vec![string("hi")]))),
            local(
                TypeRef::String,
                "c",
                Some(call("Stringify", vec![call("Scale", vec![name("w"), int(2)])])),
            ),
        ],
    );

    let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
    assert_eq!(
        rendered(&expansion.tree),
        vec![
            "string a = \"42\";",
            "string b = \"\\\"hi\\\"\";",
            "string c = \"Scale(w, 2)\";",
        ]
    );
}

#[test]
fn repeat_runs_a_captured_loop_body() {
    let (table, registry) = builtins();
    let tree = script(
        "repeat.cs",
        vec![
            local(TypeRef::Int, "total", Some(int(0))),
            expr_stmt(call("Repeat", vec![int(4)])),
            block_stmt(vec![expr_stmt(assign(
                name("total"),
                binary(stagecraft::ast::BinaryOp::Add, name("total"), int(5)),
            ))]),
        ],
    );

    let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
    assert_eq!(top_level(&expansion.tree).len(), 5);
    assert_eq!(run(top_level(&expansion.tree))["total"], 20);
}

#[test]
fn repeat_rejects_negative_counts() {
    let (table, registry) = builtins();
    let tree = script(
        "negative.cs",
        vec![
            expr_stmt(call("Repeat", vec![int(-1)])),
            expr_stmt(name("body")),
        ],
    );

    let err = Expander::new(&table, &registry).expand(&tree).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);
    assert!(err.to_string().contains("must not be negative"));
}
