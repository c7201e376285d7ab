use indoc::indoc;
use pretty_assertions::assert_eq;

use sable_bytecode::opcode::Op;
use sable_bytecode::value::Const;
use sable_bytecode::verify::verify;
use sable_bytecode::{Module, TypeTag};

use crate::ast::*;
use crate::compile;
use crate::diag::Diagnostic;
use crate::error::CompileError;
use crate::lexer::{self, Token, TokenKind};
use crate::parser;
use crate::resolve;
use crate::typeck::{self, TypeTable};
use crate::types::Type;

fn lex(source: &str) -> Vec<Token> {
    lexer::tokenize(source).expect("lexing failed")
}

fn parse_ok(source: &str) -> Program {
    let (program, errors) = parser::parse(lex(source));
    assert!(errors.is_empty(), "unexpected syntax errors: {errors:?}");
    program
}

fn check_src(source: &str) -> Result<(Program, TypeTable), Vec<Diagnostic>> {
    let program = parse_ok(source);
    let mut resolution = resolve::resolve(&program);
    assert!(
        resolution.diagnostics.is_empty(),
        "unexpected name errors: {:?}",
        resolution.diagnostics
    );
    typeck::check(&program, &mut resolution).map(|types| (program, types))
}

fn check_errors(source: &str) -> Vec<Diagnostic> {
    match check_src(source) {
        Ok(_) => panic!("expected type errors"),
        Err(diagnostics) => diagnostics,
    }
}

fn compile_ok(source: &str) -> Module {
    compile("test", source).expect("compilation failed")
}

fn first_stmt(program: &Program) -> &Stmt {
    &program.decls[0].body.stmts[0]
}

fn stmt_expr(stmt: &Stmt) -> &Expr {
    match stmt {
        Stmt::Expr(expr_stmt) => &expr_stmt.expr,
        other => panic!("expected expression statement, got {other:?}"),
    }
}

fn collect_expr_ids(program: &Program) -> Vec<NodeId> {
    fn walk_expr(expr: &Expr, out: &mut Vec<NodeId>) {
        out.push(expr.id);
        match &expr.kind {
            ExprKind::Unary { operand, .. } => walk_expr(operand, out),
            ExprKind::Binary { lhs, rhs, .. } => {
                walk_expr(lhs, out);
                walk_expr(rhs, out);
            }
            ExprKind::Assign { target, value } => {
                walk_expr(target, out);
                walk_expr(value, out);
            }
            ExprKind::Call { callee, args } => {
                walk_expr(callee, out);
                for arg in args {
                    walk_expr(arg, out);
                }
            }
            ExprKind::Group(inner) => walk_expr(inner, out),
            _ => {}
        }
    }
    fn walk_block(block: &Block, out: &mut Vec<NodeId>) {
        for stmt in &block.stmts {
            walk_stmt(stmt, out);
        }
    }
    fn walk_stmt(stmt: &Stmt, out: &mut Vec<NodeId>) {
        match stmt {
            Stmt::Let(let_stmt) => walk_expr(&let_stmt.value, out),
            Stmt::Expr(expr_stmt) => walk_expr(&expr_stmt.expr, out),
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    walk_expr(value, out);
                }
            }
            Stmt::If(if_stmt) => {
                walk_expr(&if_stmt.cond, out);
                walk_block(&if_stmt.then_block, out);
                if let Some(else_block) = &if_stmt.else_block {
                    walk_block(else_block, out);
                }
            }
            Stmt::While(while_stmt) => {
                walk_expr(&while_stmt.cond, out);
                walk_block(&while_stmt.body, out);
            }
            Stmt::Block(block) => walk_block(block, out),
        }
    }
    let mut out = Vec::new();
    for decl in &program.decls {
        walk_block(&decl.body, &mut out);
    }
    out
}

// --- Lexer ---

#[test]
fn test_lex_keywords_and_idents() {
    let tokens = lex("fn fnx let lettuce mut if else while return true false");
    let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
    assert!(matches!(kinds[0], TokenKind::Fn));
    assert!(matches!(kinds[1], TokenKind::Ident(name) if name == "fnx"));
    assert!(matches!(kinds[2], TokenKind::Let));
    assert!(matches!(kinds[3], TokenKind::Ident(name) if name == "lettuce"));
    assert!(matches!(kinds[4], TokenKind::Mut));
    assert!(matches!(kinds[5], TokenKind::If));
    assert!(matches!(kinds[6], TokenKind::Else));
    assert!(matches!(kinds[7], TokenKind::While));
    assert!(matches!(kinds[8], TokenKind::Return));
    assert!(matches!(kinds[9], TokenKind::True));
    assert!(matches!(kinds[10], TokenKind::False));
}

#[test]
fn test_lex_positions_roundtrip() {
    // Every token's recorded offset points at its exact lexeme.
    let source = "let x = 42;\nx = x + 1;\n// gone\nwhile true { }";
    let tokens = lex(source);
    assert!(!tokens.is_empty());
    for token in &tokens {
        let start = token.pos.offset as usize;
        assert_eq!(
            &source[start..start + token.lexeme.len()],
            token.lexeme,
            "offset mismatch for {:?}",
            token.kind
        );
    }
}

#[test]
fn test_lex_line_and_column() {
    let source = "let x = 42;\nx";
    let tokens = lex(source);
    let expected = [
        (1, 1, 0),
        (1, 5, 4),
        (1, 7, 6),
        (1, 9, 8),
        (1, 11, 10),
        (2, 1, 12),
    ];
    assert_eq!(tokens.len(), expected.len());
    for (token, (line, col, offset)) in tokens.iter().zip(expected) {
        assert_eq!((token.pos.line, token.pos.col, token.pos.offset), (line, col, offset));
    }
}

#[test]
fn test_lex_maximal_munch_operators() {
    let tokens = lex("<= < == = ++ + -> -");
    let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::LtEq,
            TokenKind::Lt,
            TokenKind::EqEq,
            TokenKind::Eq,
            TokenKind::PlusPlus,
            TokenKind::Plus,
            TokenKind::Arrow,
            TokenKind::Minus,
        ]
    );
}

#[test]
fn test_lex_string_escapes() {
    let tokens = lex("\"a\\nb\\\"c\\\\d\\te\"");
    assert!(
        matches!(&tokens[0].kind, TokenKind::StrLit(s) if s == "a\nb\"c\\d\te")
    );
}

#[test]
fn test_lex_numeric_literals() {
    let tokens = lex("1.5 2 0.25");
    assert!(matches!(tokens[0].kind, TokenKind::FloatLit(f) if f == 1.5));
    assert!(matches!(tokens[1].kind, TokenKind::IntLit(2)));
    assert!(matches!(tokens[2].kind, TokenKind::FloatLit(f) if f == 0.25));
}

#[test]
fn test_lex_comments_skipped() {
    let tokens = lex("1 // this is a comment\n2");
    let ints: Vec<_> = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::IntLit(_)))
        .collect();
    assert_eq!(ints.len(), 2);
    assert_eq!(tokens.len(), 2);
}

#[test]
fn test_lex_unterminated_string() {
    let err = lexer::tokenize("\"abc").unwrap_err();
    assert!(err.message.contains("unterminated string literal"));
    assert_eq!((err.pos.line, err.pos.col), (1, 1));
}

#[test]
fn test_lex_unexpected_character() {
    let err = lexer::tokenize("let @ = 1;").unwrap_err();
    assert!(err.message.contains("unexpected character"));
    assert_eq!(err.pos.col, 5);
}

#[test]
fn test_lex_oversized_int() {
    // One past i64::MAX.
    let err = lexer::tokenize("9223372036854775808").unwrap_err();
    assert!(err.message.contains("malformed numeric literal"));
}

// --- Parser ---

#[test]
fn test_parse_fn_decl() {
    let program = parse_ok("fn add(a: Int, b: Int) -> Int { return a + b; }");
    assert_eq!(program.decls.len(), 1);
    let decl = &program.decls[0];
    assert_eq!(decl.name, "add");
    assert_eq!(decl.params.len(), 2);
    assert_eq!(decl.params[0].name, "a");
    assert_eq!(decl.params[1].ty.name, "Int");
    assert_eq!(decl.return_type.as_ref().unwrap().name, "Int");
    assert_eq!(decl.body.stmts.len(), 1);
}

#[test]
fn test_parse_precedence_mul_over_add() {
    let program = parse_ok("fn main() { 1 + 2 * 3; }");
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &expr.kind else {
        panic!("expected `+` at the root, got {expr:?}");
    };
    assert!(matches!(
        rhs.kind,
        ExprKind::Binary { op: BinOp::Mul, .. }
    ));
}

#[test]
fn test_parse_grouping_overrides_precedence() {
    let program = parse_ok("fn main() { (1 + 2) * 3; }");
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Binary { op: BinOp::Mul, lhs, .. } = &expr.kind else {
        panic!("expected `*` at the root, got {expr:?}");
    };
    assert!(matches!(lhs.kind, ExprKind::Group(_)));
}

#[test]
fn test_parse_unary_binds_tighter_than_binary() {
    let program = parse_ok("fn main() { -1 + 2; }");
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Binary { op: BinOp::Add, lhs, .. } = &expr.kind else {
        panic!("expected `+` at the root, got {expr:?}");
    };
    assert!(matches!(
        lhs.kind,
        ExprKind::Unary { op: UnOp::Neg, .. }
    ));
}

#[test]
fn test_parse_assignment_right_associative() {
    let source = indoc! {"
        fn main() {
            a = b = 1;
        }
    "};
    let program = parse_ok(source);
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment, got {expr:?}");
    };
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn test_parse_concat_precedence() {
    // `++` binds tighter than `==` and looser than `+`.
    let program = parse_ok("fn main() { \"a\" ++ \"b\" == \"ab\"; }");
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Binary { op: BinOp::Eq, lhs, .. } = &expr.kind else {
        panic!("expected `==` at the root, got {expr:?}");
    };
    assert!(matches!(
        lhs.kind,
        ExprKind::Binary { op: BinOp::Concat, .. }
    ));
}

#[test]
fn test_parse_else_if_desugars() {
    let source = indoc! {"
        fn main() {
            if a {
                1;
            } else if b {
                2;
            } else {
                3;
            }
        }
    "};
    let program = parse_ok(source);
    let Stmt::If(if_stmt) = first_stmt(&program) else {
        panic!("expected if");
    };
    let else_block = if_stmt.else_block.as_ref().unwrap();
    assert_eq!(else_block.stmts.len(), 1);
    let Stmt::If(nested) = &else_block.stmts[0] else {
        panic!("expected nested if in else block");
    };
    assert!(nested.else_block.is_some());
}

#[test]
fn test_parse_call_arguments() {
    let program = parse_ok("fn main() { f(1, 2 + 3, g()); }");
    let expr = stmt_expr(first_stmt(&program));
    let ExprKind::Call { callee, args } = &expr.kind else {
        panic!("expected call, got {expr:?}");
    };
    assert!(matches!(&callee.kind, ExprKind::Ident(name) if name == "f"));
    assert_eq!(args.len(), 3);
    assert!(matches!(args[2].kind, ExprKind::Call { .. }));
}

#[test]
fn test_parse_invalid_assignment_target() {
    let (_, errors) = parser::parse(lex("fn main() { 1 = 2; }"));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("invalid assignment target"));
}

#[test]
fn test_parse_recovery_reports_both_errors() {
    let source = indoc! {"
        fn main() {
            let = 1;
            let x: Int = 2;
            let = 3;
        }
    "};
    let (program, errors) = parser::parse(lex(source));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].pos.line, 2);
    assert_eq!(errors[1].pos.line, 4);
    // The good statement in between survived.
    assert_eq!(program.decls[0].body.stmts.len(), 1);
}

#[test]
fn test_parse_recovery_across_declarations() {
    let source = indoc! {"
        fn broken( { }
        fn ok() { 1; }
    "};
    let (program, errors) = parser::parse(lex(source));
    assert!(!errors.is_empty());
    assert_eq!(program.decls.len(), 1);
    assert_eq!(program.decls[0].name, "ok");
}

#[test]
fn test_parse_missing_semicolon() {
    let (program, errors) = parser::parse(lex("fn main() { 1 }"));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected `;`"));
    assert!(program.decls[0].body.stmts.is_empty());
}

#[test]
fn test_parse_rejects_top_level_statement() {
    let (program, errors) = parser::parse(lex("let x = 1;"));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected `fn`"));
    assert!(program.decls.is_empty());
}

#[test]
fn test_parse_unterminated_block() {
    let (_, errors) = parser::parse(lex("fn main() {"));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("end of input"));
}

// --- Resolver ---

#[test]
fn test_resolve_clean_program() {
    let source = indoc! {"
        fn add(a: Int, b: Int) -> Int {
            return a + b;
        }
        fn main() -> Int {
            let x: Int = 1;
            return add(x, 2);
        }
    "};
    let resolution = resolve::resolve(&parse_ok(source));
    assert!(resolution.diagnostics.is_empty());
}

#[test]
fn test_resolve_undeclared_identifier() {
    let program = parse_ok("fn main() { y; }");
    let resolution = resolve::resolve(&program);
    assert_eq!(resolution.diagnostics.len(), 1);
    let diagnostic = &resolution.diagnostics[0];
    assert!(diagnostic.message.contains("undeclared identifier `y`"));
    assert_eq!((diagnostic.pos.line, diagnostic.pos.col), (1, 13));
}

#[test]
fn test_resolve_duplicate_in_same_scope() {
    let source = "fn main() { let x: Int = 1; let x: Int = 2; }";
    let resolution = resolve::resolve(&parse_ok(source));
    assert_eq!(resolution.diagnostics.len(), 1);
    assert!(resolution.diagnostics[0]
        .message
        .contains("duplicate declaration of `x`"));
}

#[test]
fn test_resolve_shadowing_in_nested_scope() {
    let source = indoc! {"
        fn main() {
            let x: Int = 1;
            {
                let x: Int = 2;
                x;
            }
            x;
        }
    "};
    let resolution = resolve::resolve(&parse_ok(source));
    assert!(resolution.diagnostics.is_empty());
}

#[test]
fn test_resolve_innermost_scope_wins() {
    let source = indoc! {"
        fn main() {
            let x: Int = 1;
            {
                let x: Int = 2;
                x;
            }
        }
    "};
    let program = parse_ok(source);
    let resolution = resolve::resolve(&program);
    let Stmt::Block(inner) = &program.decls[0].body.stmts[1] else {
        panic!("expected block");
    };
    let reference = stmt_expr(&inner.stmts[1]);
    let symbol = resolution.symbol(resolution.binding(reference.id).unwrap());
    // Bound to the inner `let` on line 4, not the outer one.
    assert_eq!(symbol.pos.line, 4);
}

#[test]
fn test_resolve_duplicate_function() {
    let source = "fn f() { }\nfn f() { }";
    let resolution = resolve::resolve(&parse_ok(source));
    assert_eq!(resolution.diagnostics.len(), 1);
    assert!(resolution.diagnostics[0]
        .message
        .contains("duplicate declaration of `f`"));
}

#[test]
fn test_resolve_duplicate_parameter() {
    let resolution = resolve::resolve(&parse_ok("fn f(a: Int, a: Int) { }"));
    assert_eq!(resolution.diagnostics.len(), 1);
}

#[test]
fn test_resolve_forward_function_reference() {
    let source = "fn main() { helper(); }\nfn helper() { }";
    let resolution = resolve::resolve(&parse_ok(source));
    assert!(resolution.diagnostics.is_empty());
}

#[test]
fn test_resolve_let_initializer_sees_outer_binding_only() {
    let resolution = resolve::resolve(&parse_ok("fn main() { let x: Int = x; }"));
    assert_eq!(resolution.diagnostics.len(), 1);
    assert!(resolution.diagnostics[0]
        .message
        .contains("undeclared identifier `x`"));
}

#[test]
fn test_resolve_params_visible_in_body() {
    let resolution = resolve::resolve(&parse_ok("fn f(a: Int) -> Int { return a; }"));
    assert!(resolution.diagnostics.is_empty());
}

// --- Type checker ---

#[test]
fn test_check_well_typed_program_is_total() {
    let source = indoc! {r#"
        fn mix(a: Int, b: Float, flag: Bool, s: Str) -> Int {
            let c: Float = b * 2.0;
            let mut n: Int = a;
            if flag && c > 1.0 {
                n = n + 1;
            } else {
                n = -n;
            }
            while n > 0 {
                n = n - 2;
            }
            let msg: Str = s ++ "!";
            msg == "done!";
            return n;
        }
    "#};
    let (program, types) = check_src(source).expect("expected clean check");
    for id in collect_expr_ids(&program) {
        let ty = types.get(&id).expect("expression missing from type table");
        assert!(!ty.is_error(), "error type leaked into a clean program");
    }
}

#[test]
fn test_check_arithmetic_operator_table() {
    assert!(check_src("fn f() -> Int { return 1 + 2 * 3 % 4; }").is_ok());
    assert!(check_src("fn f() -> Float { return 1.5 / 0.5 - 2.0; }").is_ok());

    let errors = check_errors("fn f() -> Int { return true + 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `+`"));

    let errors = check_errors("fn f() -> Str { return \"a\" + \"b\"; }");
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_check_int_literal_widens_to_float() {
    let source = "fn f() -> Float { return 1 + 2.0; }";
    let (program, types) = check_src(source).expect("expected clean check");
    let Stmt::Return(ret) = first_stmt(&program) else {
        panic!("expected return");
    };
    let value = ret.value.as_ref().unwrap();
    let ExprKind::Binary { lhs, .. } = &value.kind else {
        panic!("expected binary");
    };
    assert_eq!(types.get(&lhs.id), Some(&Type::Float));
    assert_eq!(types.get(&value.id), Some(&Type::Float));
}

#[test]
fn test_check_no_float_to_int_narrowing() {
    let errors = check_errors("fn f() -> Int { let n: Int = 1.0; return n; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected Int, got Float"));
}

#[test]
fn test_check_widening_only_applies_to_literals() {
    // A non-literal Int expression never silently widens.
    let errors = check_errors("fn f(n: Int) -> Float { return n + 2.0; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `+`"));
}

#[test]
fn test_check_comparison_operator_table() {
    assert!(check_src("fn f() -> Bool { return 1 < 2; }").is_ok());
    assert!(check_src("fn f() -> Bool { return 1.5 >= 0.5; }").is_ok());
    assert!(check_src("fn f() -> Bool { return 1 <= 2.0; }").is_ok());

    let errors = check_errors("fn f() -> Bool { return \"a\" < \"b\"; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `<`"));
}

#[test]
fn test_check_equality_operator_table() {
    assert!(check_src("fn f() -> Bool { return 1 == 2; }").is_ok());
    assert!(check_src("fn f() -> Bool { return true != false; }").is_ok());
    assert!(check_src("fn f() -> Bool { return \"a\" == \"b\"; }").is_ok());

    let errors = check_errors("fn f() -> Bool { return 1 == true; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `==`"));
}

#[test]
fn test_check_logical_operator_table() {
    assert!(check_src("fn f() -> Bool { return true && false || true; }").is_ok());

    let errors = check_errors("fn f() -> Bool { return 1 && true; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `&&`"));
}

#[test]
fn test_check_concat_operator() {
    assert!(check_src("fn f() -> Str { return \"a\" ++ \"b\"; }").is_ok());

    let errors = check_errors("fn f() -> Str { return \"a\" ++ 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `++`"));
}

#[test]
fn test_check_unary_operators() {
    assert!(check_src("fn f() -> Int { return -1; }").is_ok());
    assert!(check_src("fn f() -> Float { return -1.5; }").is_ok());
    assert!(check_src("fn f() -> Bool { return !true; }").is_ok());

    let errors = check_errors("fn f() -> Bool { return !1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `!`"));

    let errors = check_errors("fn f() -> Int { return -true; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("operator `-`"));
}

#[test]
fn test_check_if_condition_must_be_bool() {
    let errors = check_errors("fn f() { if 1 { } }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("if condition must be Bool, got Int"));
}

#[test]
fn test_check_while_condition_must_be_bool() {
    let errors = check_errors("fn f() { while \"x\" { } }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("while condition must be Bool, got Str"));
}

#[test]
fn test_check_assignment_requires_mut() {
    let source = indoc! {"
        fn main() {
            let x: Int = 1;
            x = 2;
        }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("cannot assign to immutable variable `x`"));

    let ok = indoc! {"
        fn main() {
            let mut x: Int = 1;
            x = 2;
        }
    "};
    assert!(check_src(ok).is_ok());
}

#[test]
fn test_check_assignment_type_mismatch_position() {
    // A string literal assigned to an Int variable yields
    // exactly one error at the assignment.
    let source = indoc! {r#"
        fn main() {
            let mut x: Int = 1;
            x = "oops";
        }
    "#};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("assignment to `x`: expected Int, got Str"));
    assert_eq!((errors[0].pos.line, errors[0].pos.col), (3, 5));
}

#[test]
fn test_check_assignment_to_parameter_rejected() {
    let errors = check_errors("fn f(a: Int) { a = 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("immutable"));
}

#[test]
fn test_check_let_mismatch() {
    let errors = check_errors("fn f() { let x: Int = \"s\"; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("let binding `x`: expected Int, got Str"));
}

#[test]
fn test_check_let_infers_from_initializer() {
    let source = indoc! {"
        fn f() -> Int {
            let x = 41;
            return x + 1;
        }
    "};
    assert!(check_src(source).is_ok());
}

#[test]
fn test_check_let_with_float_literal_coercion() {
    let source = "fn f() -> Float { let x: Float = 1; return x; }";
    let (program, types) = check_src(source).expect("expected clean check");
    let Stmt::Let(let_stmt) = first_stmt(&program) else {
        panic!("expected let");
    };
    assert_eq!(types.get(&let_stmt.value.id), Some(&Type::Float));
}

#[test]
fn test_check_unknown_type_name() {
    let errors = check_errors("fn f() { let x: Wat = 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unknown type `Wat`"));

    let errors = check_errors("fn f(a: Wat) { }");
    assert_eq!(errors.len(), 1);

    let errors = check_errors("fn f() -> Wat { return 1; }");
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_check_unit_restrictions() {
    let errors = check_errors("fn f() { let x: Unit = 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("cannot have type Unit"));

    let errors = check_errors("fn f(a: Unit) { }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("parameter `a`"));

    let source = indoc! {"
        fn side() { }
        fn main() { let x = side(); }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("initializer of `x`"));
}

#[test]
fn test_check_call_arity_mismatch() {
    // Calling a two-parameter function with three
    // arguments is exactly one arity error.
    let source = indoc! {"
        fn add(a: Int, b: Int) -> Int {
            return a + b;
        }
        fn main() -> Int {
            return add(1, 2, 3);
        }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("function `add` expects 2 argument(s), got 3"));
    assert_eq!(errors[0].pos.line, 5);
}

#[test]
fn test_check_call_argument_mismatch() {
    let source = indoc! {r#"
        fn add(a: Int, b: Int) -> Int {
            return a + b;
        }
        fn main() -> Int {
            return add(1, "two");
        }
    "#};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("argument 2 of `add`: expected Int, got Str"));
}

#[test]
fn test_check_call_argument_literal_widens() {
    let source = indoc! {"
        fn scale(x: Float) -> Float {
            return x;
        }
        fn main() -> Float {
            return scale(2);
        }
    "};
    assert!(check_src(source).is_ok());
}

#[test]
fn test_check_not_callable() {
    let errors = check_errors("fn main() { let x: Int = 1; x(); }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("`x` is not callable"));
}

#[test]
fn test_check_function_used_as_value() {
    let source = "fn f() { }\nfn main() { let g: Int = f; }";
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("function `f` used as a value"));
}

#[test]
fn test_check_call_result_type_flows() {
    let source = indoc! {r#"
        fn greeting() -> Str {
            return "hi";
        }
        fn main() {
            let n: Int = greeting();
        }
    "#};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected Int, got Str"));
}

#[test]
fn test_check_return_rules() {
    // Value in a unit function.
    let errors = check_errors("fn f() { return 1; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("cannot return a value from a Unit function"));

    // Bare return in a non-unit function.
    let errors = check_errors("fn f() -> Int { return; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("return needs a value of type Int"));

    // Mismatched return value, reported at the value.
    let errors = check_errors("fn f() -> Int { return \"x\"; }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("return value: expected Int, got Str"));

    // Explicit Unit return type with a bare return is fine.
    assert!(check_src("fn f() -> Unit { return; }").is_ok());
}

#[test]
fn test_check_missing_return_on_some_path() {
    let source = indoc! {"
        fn f(b: Bool) -> Int {
            if b {
                return 1;
            }
        }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .contains("function `f` does not return on every path"));
}

#[test]
fn test_check_if_else_both_returning_is_complete() {
    let source = indoc! {"
        fn f(b: Bool) -> Int {
            if b {
                return 1;
            } else {
                return 2;
            }
        }
    "};
    assert!(check_src(source).is_ok());
}

#[test]
fn test_check_loop_never_counts_as_returning() {
    let source = indoc! {"
        fn f() -> Int {
            while true {
                return 1;
            }
        }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("does not return on every path"));
}

#[test]
fn test_check_nested_block_return_counts() {
    let source = indoc! {"
        fn f() -> Int {
            {
                return 1;
            }
        }
    "};
    assert!(check_src(source).is_ok());
}

#[test]
fn test_check_error_sentinel_stops_cascades() {
    // One bad binding: the uses of `x` downstream stay quiet.
    let source = indoc! {"
        fn main() -> Int {
            let x: Int = true;
            return x + 1;
        }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 1);

    // One bad operand: the enclosing expression stays quiet.
    let errors = check_errors("fn main() -> Int { return (1 + true) + 2; }");
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_check_reports_all_independent_errors() {
    let source = indoc! {r#"
        fn main() {
            let a: Int = "one";
            let b: Bool = 2;
            if 3 { }
        }
    "#};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 3);
    // Source order.
    assert!(errors[0].pos < errors[1].pos);
    assert!(errors[1].pos < errors[2].pos);
}

#[test]
fn test_check_diagnostics_sorted_across_passes() {
    // The signature pass sees line 4 before the body pass sees line 2;
    // the reported list is still in source order.
    let source = indoc! {"
        fn a() -> Int {
            return true;
        }
        fn b(x: Wat) { }
    "};
    let errors = check_errors(source);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].pos.line, 2);
    assert_eq!(errors[1].pos.line, 4);
}

// --- Code generator ---

#[test]
fn test_codegen_constant_return() {
    // An integer literal with a matching declared return
    // type compiles to one push and one typed return.
    let module = compile_ok("fn seven() -> Int { return 7; }");
    assert_eq!(module.routines.len(), 1);
    let routine = &module.routines[0];
    assert_eq!(routine.name, "seven");
    assert_eq!(routine.code, vec![Op::PushConst(0), Op::Ret]);
    assert_eq!(module.constants, vec![Const::Int(7)]);
    assert_eq!(routine.max_stack, 1);
    assert_eq!(routine.local_slots, 0);
    assert_eq!(routine.ret, TypeTag::Int);
    assert!(routine.params.is_empty());
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_implicit_unit_return() {
    let module = compile_ok("fn noop() { }");
    let routine = &module.routines[0];
    assert_eq!(routine.code, vec![Op::RetUnit]);
    assert_eq!(routine.max_stack, 0);
    assert_eq!(routine.ret, TypeTag::Unit);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_while_loop_shape() {
    let source = indoc! {"
        fn count() {
            let mut i: Int = 0;
            while i < 3 {
                i = i + 1;
            }
        }
    "};
    let module = compile_ok(source);
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![
            Op::PushConst(0),
            Op::StoreLocal(0),
            Op::LoadLocal(0),
            Op::PushConst(1),
            Op::IntLt,
            Op::JumpIfFalse(13),
            Op::LoadLocal(0),
            Op::PushConst(2),
            Op::IntAdd,
            Op::Dup,
            Op::StoreLocal(0),
            Op::Pop,
            Op::Jump(2),
            Op::RetUnit,
        ]
    );
    assert_eq!(
        module.constants,
        vec![Const::Int(0), Const::Int(3), Const::Int(1)]
    );
    assert_eq!(routine.max_stack, 2);
    assert_eq!(routine.local_slots, 1);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_branch_max_stack_is_max_not_sum() {
    // Each arm needs depth 2; the routine maximum is 2,
    // not the sum over both arms.
    let source = indoc! {"
        fn pick(flag: Bool) -> Int {
            if flag {
                return 1 + 2;
            } else {
                return 3 + 4;
            }
        }
    "};
    let module = compile_ok(source);
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![
            Op::LoadLocal(0),
            Op::JumpIfFalse(6),
            Op::PushConst(0),
            Op::PushConst(1),
            Op::IntAdd,
            Op::Ret,
            Op::PushConst(2),
            Op::PushConst(3),
            Op::IntAdd,
            Op::Ret,
        ]
    );
    assert_eq!(routine.max_stack, 2);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_constant_pool_dedup() {
    let source = indoc! {"
        fn pair() -> Int {
            let a: Int = 7;
            return a + 7;
        }
    "};
    let module = compile_ok(source);
    assert_eq!(module.constants, vec![Const::Int(7)]);
    assert_eq!(
        module.routines[0].code,
        vec![
            Op::PushConst(0),
            Op::StoreLocal(0),
            Op::LoadLocal(0),
            Op::PushConst(0),
            Op::IntAdd,
            Op::Ret,
        ]
    );
}

#[test]
fn test_codegen_widened_literal_pools_as_float() {
    let module = compile_ok("fn half() -> Float { return 1; }");
    assert_eq!(module.constants, vec![Const::Float(1.0)]);
    let routine = &module.routines[0];
    assert_eq!(routine.code, vec![Op::PushConst(0), Op::Ret]);
    assert_eq!(routine.ret, TypeTag::Float);
}

#[test]
fn test_codegen_float_operator_selection() {
    let module = compile_ok("fn scale(x: Float) -> Float { return x * 2; }");
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![Op::LoadLocal(0), Op::PushConst(0), Op::FloatMul, Op::Ret]
    );
    assert_eq!(module.constants, vec![Const::Float(2.0)]);
}

#[test]
fn test_codegen_string_ops() {
    let module = compile_ok(r#"fn shout(s: Str) -> Bool { return s ++ "!" == "hi!"; }"#);
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![
            Op::LoadLocal(0),
            Op::PushConst(0),
            Op::StrConcat,
            Op::PushConst(1),
            Op::StrEq,
            Op::Ret,
        ]
    );
    assert_eq!(
        module.constants,
        vec![Const::Str("!".into()), Const::Str("hi!".into())]
    );
}

#[test]
fn test_codegen_call_targets_by_declaration_order() {
    let source = indoc! {"
        fn double(n: Int) -> Int {
            return n + n;
        }
        fn main() -> Int {
            return double(21);
        }
    "};
    let module = compile_ok(source);
    assert_eq!(module.routines.len(), 2);
    assert_eq!(module.routines[0].name, "double");
    assert_eq!(module.routines[1].name, "main");
    assert_eq!(
        module.routines[1].code,
        vec![Op::PushConst(0), Op::Call(0, 1), Op::Ret]
    );
    assert_eq!(module.routines[0].params, vec![TypeTag::Int]);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_assignment_expression_keeps_value() {
    let source = indoc! {"
        fn run() -> Int {
            let mut x: Int = 0;
            return x = 5;
        }
    "};
    let module = compile_ok(source);
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![
            Op::PushConst(0),
            Op::StoreLocal(0),
            Op::PushConst(1),
            Op::Dup,
            Op::StoreLocal(0),
            Op::Ret,
        ]
    );
    assert_eq!(routine.max_stack, 2);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_shadowed_locals_get_distinct_slots() {
    let source = indoc! {"
        fn shadow() -> Int {
            let x: Int = 1;
            {
                let x: Int = 2;
                x;
            }
            return x;
        }
    "};
    let module = compile_ok(source);
    let routine = &module.routines[0];
    assert_eq!(
        routine.code,
        vec![
            Op::PushConst(0),
            Op::StoreLocal(0),
            Op::PushConst(1),
            Op::StoreLocal(1),
            Op::LoadLocal(1),
            Op::Pop,
            Op::LoadLocal(0),
            Op::Ret,
        ]
    );
    assert_eq!(routine.local_slots, 2);
}

#[test]
fn test_codegen_unit_fn_with_returning_else_arm() {
    // The then arm falls through while the else arm returns; the branch
    // over the else arm still needs a real landing instruction.
    let source = indoc! {"
        fn f(b: Bool) {
            if b {
                1;
            } else {
                return;
            }
        }
    "};
    let module = compile_ok(source);
    verify(&module).expect("verifier rejected module");
    let routine = &module.routines[0];
    assert_eq!(routine.code.last(), Some(&Op::RetUnit));
}

#[test]
fn test_codegen_if_without_else_at_end_of_unit_fn() {
    let source = indoc! {"
        fn f(b: Bool) {
            if b {
                return;
            }
        }
    "};
    let module = compile_ok(source);
    verify(&module).expect("verifier rejected module");
}

#[test]
fn test_codegen_idempotent_output() {
    let source = indoc! {r#"
        fn grade(score: Int) -> Str {
            if score >= 90 {
                return "A";
            } else if score >= 80 {
                return "B";
            }
            return "C";
        }
        fn shout(label: Str) -> Str {
            return label ++ "!";
        }
        fn main() -> Str {
            let mut s: Int = 0;
            while s < 100 {
                s = s + 17;
            }
            return shout(grade(s));
        }
    "#};
    let first = compile_ok(source).to_bytes().unwrap();
    let second = compile_ok(source).to_bytes().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_codegen_full_program_passes_verifier() {
    let source = indoc! {r#"
        fn grade(score: Int) -> Str {
            if score >= 90 {
                return "A";
            } else if score >= 80 {
                return "B";
            }
            return "C";
        }
        fn shout(label: Str) -> Str {
            return label ++ "!";
        }
        fn main() -> Str {
            let mut s: Int = 0;
            while s < 100 {
                s = s + 17;
            }
            return shout(grade(s));
        }
    "#};
    let module = compile_ok(source);
    assert_eq!(module.routines.len(), 3);
    verify(&module).expect("verifier rejected module");
}

// --- Pipeline ---

#[test]
fn test_pipeline_lex_error_stops_everything() {
    // An unterminated string is one LexError and nothing
    // else from later stages.
    let result = compile("test", "fn main() { let s: Str = \"abc");
    let Err(err) = result else {
        panic!("expected failure");
    };
    assert!(matches!(err, CompileError::Lex(_)));
    assert_eq!(err.diagnostics().len(), 1);
    assert!(err.diagnostics()[0].message.contains("unterminated string"));
}

#[test]
fn test_pipeline_syntax_errors_reported_together() {
    let source = indoc! {"
        fn main() {
            let = 1;
            let x: Int = 2;
            let = 3;
        }
    "};
    let Err(err) = compile("test", source) else {
        panic!("expected failure");
    };
    assert!(matches!(err, CompileError::Syntax(_)));
    assert_eq!(err.diagnostics().len(), 2);
}

#[test]
fn test_pipeline_name_errors_stop_before_typeck() {
    let Err(err) = compile("test", "fn main() { y; }") else {
        panic!("expected failure");
    };
    assert!(matches!(err, CompileError::Name(_)));
    assert_eq!(err.diagnostics().len(), 1);
}

#[test]
fn test_pipeline_type_errors_stop_before_codegen() {
    let source = indoc! {r#"
        fn main() {
            let mut x: Int = 1;
            x = "oops";
        }
    "#};
    let Err(err) = compile("test", source) else {
        panic!("expected failure");
    };
    assert!(matches!(err, CompileError::Type(_)));
    assert_eq!(err.diagnostics().len(), 1);
}

#[test]
fn test_pipeline_success_roundtrips_through_binary_format() {
    let module = compile_ok("fn main() -> Int { return 7; }");
    let bytes = module.to_bytes().unwrap();
    let restored = Module::from_bytes(&bytes).unwrap();
    assert_eq!(module, restored);
}

#[test]
fn test_diagnostic_rendering() {
    let Err(err) = compile("test", "fn main() { y; }") else {
        panic!("expected failure");
    };
    let rendered = err.diagnostics()[0].to_string();
    assert_eq!(rendered, "error: undeclared identifier `y` at 1:13");
}
