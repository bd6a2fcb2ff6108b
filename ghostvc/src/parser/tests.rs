//! Parser tests for the annotated surface language

use crate::ast::*;
use crate::parser::parse_source;

fn parse_ok(source: &str) -> SourceFile {
    parse_source("test.go", source).expect("parse should succeed")
}

fn parse_fails(source: &str) -> bool {
    parse_source("test.go", source).is_err()
}

fn only_func(file: &SourceFile) -> &FuncDef {
    match file.items.as_slice() {
        [Item::Func(f)] => f,
        other => panic!("expected a single function, got {other:?}"),
    }
}

/// Expression of the first `assert` in the only function
fn first_assert(source: &str) -> Expr {
    let file = parse_ok(source);
    let body = only_func(&file).body.clone().expect("body");
    match &body.stmts[0].kind {
        StmtKind::Assert(e) => e.node.clone(),
        other => panic!("expected assert, got {other:?}"),
    }
}

fn binop(expr: &Expr) -> BinOp {
    match expr {
        Expr::Binary { op, .. } => *op,
        other => panic!("expected binary, got {other:?}"),
    }
}

fn operands(expr: &Expr) -> (&Expr, &Expr) {
    match expr {
        Expr::Binary { left, right, .. } => (&left.node, &right.node),
        other => panic!("expected binary, got {other:?}"),
    }
}

// ============================================
// Files and imports
// ============================================

#[test]
fn test_parse_package_clause() {
    let file = parse_ok("package pkg\n");
    assert_eq!(file.package.node, "pkg");
    assert!(file.items.is_empty());
}

#[test]
fn test_parse_import_forms() {
    let file = parse_ok(
        "package main\n\nimport b \"bar\"\nimport (\n  \"baz\"\n  . \"dot\"\n  _ \"blank\"\n)\n",
    );
    let aliases: Vec<_> = file.imports.iter().map(|i| i.alias.clone()).collect();
    assert!(matches!(&aliases[0], ImportAlias::Named(a) if a.node == "b"));
    assert_eq!(aliases[1], ImportAlias::Implicit);
    assert_eq!(aliases[2], ImportAlias::Dot);
    assert_eq!(aliases[3], ImportAlias::Blank);
    assert_eq!(file.imports[0].path.node, "bar");
}

#[test]
fn test_parse_missing_package_fails() {
    assert!(parse_fails("func f() {}\n"));
}

// ============================================
// Declarations
// ============================================

#[test]
fn test_parse_struct_with_grouped_fields() {
    let file = parse_ok("package main\ntype Rectangle struct {\n    Width, Height int\n}\n");
    let Item::Struct(def) = &file.items[0] else {
        panic!("expected struct");
    };
    let names: Vec<_> = def.fields.iter().map(|f| f.name.node.as_str()).collect();
    assert_eq!(names, ["Width", "Height"]);
    assert!(def.fields.iter().all(|f| f.ty.node.to_string() == "int"));
}

#[test]
fn test_parse_method_with_spec() {
    let file = parse_ok(
        "package main\n\
         requires acc(r.Width)\n\
         ensures acc(r.Width)\n\
         ensures res == r.Width * r.Width\n\
         ensures old(r.Width) == r.Width\n\
         func (r *Rectangle) Area() (res int) {\n\
             return r.Width * r.Width\n\
         }\n",
    );
    let f = only_func(&file);
    assert_eq!(f.name.node, "Area");
    let receiver = f.receiver.as_ref().expect("receiver");
    assert_eq!(receiver.name.node, "r");
    assert_eq!(receiver.ty.node.to_string(), "*Rectangle");
    assert_eq!(f.spec.requires.len(), 1);
    assert_eq!(f.spec.ensures.len(), 3);
    assert!(matches!(f.spec.ensures[2].node, Expr::Binary { op: BinOp::Eq, .. }));
    assert_eq!(f.results[0].name.as_ref().map(|n| n.node.as_str()), Some("res"));
}

#[test]
fn test_parse_ghost_params_and_results() {
    let file = parse_ok("package pkg\nfunc example1(ghost m mset[int]) (ghost n int) {\n\tn = |m|\n}\n");
    let f = only_func(&file);
    assert!(f.params[0].ghost);
    assert_eq!(f.params[0].ty.node.to_string(), "mset[int]");
    assert!(f.results[0].ghost);
    let body = f.body.as_ref().expect("body");
    assert!(matches!(&body.stmts[0].kind, StmtKind::Assign { values, .. }
        if matches!(values[0].node, Expr::Cardinality(_))));
}

#[test]
fn test_parse_grouped_params_share_type() {
    let file = parse_ok("package p\nfunc f(a, b int, ghost s set[int]) {}\n");
    let f = only_func(&file);
    let names: Vec<_> = f.params.iter().map(|p| p.name.as_ref().map(|n| n.node.clone())).collect();
    assert_eq!(names, [Some("a".into()), Some("b".into()), Some("s".into())]);
    assert_eq!(f.params[0].ty.node.to_string(), "int");
    assert!(f.params[2].ghost);
}

#[test]
fn test_parse_unnamed_result() {
    let file = parse_ok("package p\npure func sq(x int) int {\n  return x * x\n}\n");
    let f = only_func(&file);
    assert!(f.pure);
    assert_eq!(f.results.len(), 1);
    assert!(f.results[0].name.is_none());
}

#[test]
fn test_parse_abstract_ghost_function() {
    let file = parse_ok("package p\nghost\nensures res >= 0\nfunc abs(x int) (res int)\n");
    let f = only_func(&file);
    assert!(f.ghost);
    assert!(f.body.is_none());
}

#[test]
fn test_parse_spec_clause_trailing_semicolon() {
    let file = parse_ok("package pkg\nensures x # s <= |s|;\nfunc example6(ghost x int, ghost s set[int]) {\n}\n");
    assert_eq!(only_func(&file).spec.ensures.len(), 1);
}

// ============================================
// Expressions
// ============================================

#[test]
fn test_chained_membership_is_left_associative() {
    let e = first_assert("package p\nfunc f() {\n  assert 1 in mset[int] { 1 } in mset[bool] { true }\n}\n");
    assert_eq!(binop(&e), BinOp::In);
    let (left, right) = operands(&e);
    assert_eq!(binop(left), BinOp::In);
    assert!(matches!(right, Expr::Collection { kind: CollectionKind::Multiset, .. }));
}

#[test]
fn test_membership_binds_tighter_than_equality() {
    let e = first_assert("package p\nfunc f() {\n  assert x in m1 in m2 == (x in m1) in m2\n}\n");
    assert_eq!(binop(&e), BinOp::Eq);
    let (left, right) = operands(&e);
    assert_eq!(binop(left), BinOp::In);
    assert_eq!(binop(right), BinOp::In);
}

#[test]
fn test_multiplicity_over_union() {
    let e = first_assert("package p\nfunc f() {\n  assert 0 < x # s1 union s2 ==> x in s1 || x in s2\n}\n");
    assert_eq!(binop(&e), BinOp::Implies);
    let (premise, conclusion) = operands(&e);
    assert_eq!(binop(premise), BinOp::Lt);
    let (_, mult) = operands(premise);
    assert_eq!(binop(mult), BinOp::Multiplicity);
    assert_eq!(binop(operands(mult).1), BinOp::Union);
    assert_eq!(binop(conclusion), BinOp::Or);
}

#[test]
fn test_implication_is_right_associative() {
    let e = first_assert("package p\nfunc f() {\n  assert a ==> b ==> c\n}\n");
    let (left, right) = operands(&e);
    assert!(matches!(left, Expr::Ident(n) if n == "a"));
    assert_eq!(binop(right), BinOp::Implies);
}

#[test]
fn test_intersection_binds_tighter_than_union() {
    let e = first_assert("package p\nfunc f() {\n  assert x in a union b intersection c\n}\n");
    let (_, coll) = operands(&e);
    assert_eq!(binop(coll), BinOp::Union);
    assert_eq!(binop(operands(coll).1), BinOp::Intersection);
}

#[test]
fn test_cardinality_of_union_literal() {
    let e = first_assert("package p\nfunc f() {\n  assert |mset[int] { 1, 2 } union mset[int] { 2, 3 }| == 4\n}\n");
    let (card, four) = operands(&e);
    assert!(matches!(four, Expr::IntLit(4)));
    let Expr::Cardinality(inner) = card else {
        panic!("expected cardinality");
    };
    assert_eq!(binop(&inner.node), BinOp::Union);
}

#[test]
fn test_empty_collection_literal() {
    let e = first_assert("package p\nfunc f() {\n  assert 1 # set[int] { } == 0\n}\n");
    let (mult, _) = operands(&e);
    let (_, coll) = operands(mult);
    assert!(matches!(coll, Expr::Collection { kind: CollectionKind::Set, elems, .. } if elems.is_empty()));
}

#[test]
fn test_method_expression_call() {
    let e = first_assert("package p\nfunc f() {\n  assert (*(b.Rectangle)).Area(&r) == 10\n}\n");
    let (call, _) = operands(&e);
    let Expr::Call { callee, args } = call else {
        panic!("expected call");
    };
    assert!(matches!(&args[0].node, Expr::Unary { op: UnOp::AddrOf, .. }));
    let Expr::Selector { base, field } = &callee.node else {
        panic!("expected selector");
    };
    assert_eq!(field.node, "Area");
    assert!(matches!(&base.node, Expr::Unary { op: UnOp::Deref, expr }
        if matches!(&expr.node, Expr::Selector { .. })));
}

#[test]
fn test_keyed_and_positional_composites() {
    let file = parse_ok(
        "package main\nfunc foo() {\n    r! := b.Rectangle{Width: 2, Height: 5}\n    r1 := Rectangle{2, 5}\n}\n",
    );
    let body = only_func(&file).body.clone().expect("body");
    let StmtKind::ShortVarDecl { names, values } = &body.stmts[0].kind else {
        panic!("expected short var decl");
    };
    assert!(names[0].addressable);
    let Expr::Composite { ty, fields } = &values[0].node else {
        panic!("expected composite");
    };
    assert_eq!(ty.node.to_string(), "b.Rectangle");
    assert_eq!(fields[0].0.as_ref().map(|k| k.node.as_str()), Some("Width"));

    let StmtKind::ShortVarDecl { names, values } = &body.stmts[1].kind else {
        panic!("expected short var decl");
    };
    assert!(!names[0].addressable);
    assert!(matches!(&values[0].node, Expr::Composite { fields, .. } if fields[0].0.is_none()));
}

#[test]
fn test_composite_disabled_in_if_header() {
    let file = parse_ok("package p\nfunc f(x int) {\n  if x == y {\n    x = 1\n  } else {\n    x = 2\n  }\n}\n");
    let body = only_func(&file).body.clone().expect("body");
    assert!(matches!(&body.stmts[0].kind, StmtKind::If { else_block: Some(_), .. }));
}

// ============================================
// Statements
// ============================================

#[test]
fn test_ghost_statements() {
    let file = parse_ok(
        "package pkg\nfunc f(ghost x int, ghost m mset[int]) {\n  ghost var b bool\n  b = x in m\n  ghost n := |m|\n}\n",
    );
    let body = only_func(&file).body.clone().expect("body");
    assert!(body.stmts[0].ghost);
    assert!(matches!(&body.stmts[0].kind, StmtKind::VarDecl { ty: Some(_), init: None, .. }));
    assert!(!body.stmts[1].ghost);
    assert!(body.stmts[2].ghost);
}

#[test]
fn test_loop_with_invariants() {
    let file = parse_ok(
        "package p\nfunc f(n int) {\n  i := 0\n  invariant 0 <= i && i <= n\n  for i < n {\n    i = i + 1\n  }\n}\n",
    );
    let body = only_func(&file).body.clone().expect("body");
    let StmtKind::For { invariants, cond, .. } = &body.stmts[1].kind else {
        panic!("expected for");
    };
    assert_eq!(invariants.len(), 1);
    assert!(cond.is_some());
}

#[test]
fn test_else_if_chain() {
    let file = parse_ok("package p\nfunc f(x int) {\n  if x < 0 {\n  } else if x == 0 {\n  } else {\n  }\n}\n");
    let body = only_func(&file).body.clone().expect("body");
    let StmtKind::If { else_block: Some(else_block), .. } = &body.stmts[0].kind else {
        panic!("expected if/else");
    };
    assert!(matches!(&else_block.stmts[0].kind, StmtKind::If { .. }));
}

#[test]
fn test_bare_return_and_multi_assign() {
    let file = parse_ok("package p\nfunc f() (a, b int) {\n  a, b = 1, 2\n  return\n}\n");
    let body = only_func(&file).body.clone().expect("body");
    assert!(matches!(&body.stmts[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
    assert!(matches!(&body.stmts[1].kind, StmtKind::Return(v) if v.is_empty()));
}

#[test]
fn test_spans_cover_statement() {
    let source = "package p\nfunc f() {\n  assert true\n}\n";
    let file = parse_ok(source);
    let body = only_func(&file).body.clone().expect("body");
    let span = body.stmts[0].span;
    assert_eq!(&source[span.start..span.end], "assert true");
    assert_eq!(file.lines.line_col(span.start), (3, 3));
}

#[test]
fn test_unbalanced_cardinality_fails() {
    assert!(parse_fails("package p\nfunc f() {\n  assert |s == 1\n}\n"));
}

#[test]
fn test_statement_without_separator_fails() {
    assert!(parse_fails("package p\nfunc f() {\n  x = 1 y = 2\n}\n"));
}
