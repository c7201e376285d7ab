use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::diag::{Diagnostic, Pos};
use crate::resolve::{Resolution, SymbolKind};
use crate::types::{is_assignable, FnType, Type};

/// Final type of every expression node, keyed by `NodeId`. After a clean
/// check every expression has exactly one entry and none of them is the
/// error sentinel.
pub type TypeTable = HashMap<NodeId, Type>;

/// Type-check a resolved program. Declared and inferred types are
/// attached to the symbols in `resolution`; expression types land in the
/// returned table. Checking never stops at the first problem: offending
/// nodes get the error sentinel and the walk continues, so one pass
/// yields every independent diagnostic without cascades.
pub fn check(program: &Program, resolution: &mut Resolution) -> Result<TypeTable, Vec<Diagnostic>> {
    let mut checker = Checker {
        resolution,
        types: TypeTable::new(),
        diagnostics: Vec::new(),
    };
    checker.declare_signatures(program);
    for decl in &program.decls {
        checker.check_fn(decl);
    }
    if checker.diagnostics.is_empty() {
        Ok(checker.types)
    } else {
        let mut diagnostics = checker.diagnostics;
        diagnostics.sort_by_key(|d| d.pos);
        Err(diagnostics)
    }
}

/// The distinct type-error classes. Each renders to one positioned
/// diagnostic.
#[derive(Debug)]
enum TypeError {
    Mismatch {
        expected: Type,
        found: Type,
        what: String,
    },
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    NotCallable {
        what: String,
    },
    FnAsValue {
        name: String,
    },
    NonBoolCondition {
        construct: &'static str,
        found: Type,
    },
    MissingReturn {
        name: String,
    },
    ImmutableAssign {
        name: String,
    },
    UnknownType {
        name: String,
    },
    UnitBinding {
        what: String,
    },
    ReturnValueInUnitFn,
    MissingReturnValue {
        expected: Type,
    },
    InvalidBinary {
        op: &'static str,
        lhs: Type,
        rhs: Type,
    },
    InvalidUnary {
        op: &'static str,
        operand: Type,
    },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Mismatch {
                expected,
                found,
                what,
            } => write!(f, "type mismatch in {what}: expected {expected}, got {found}"),
            TypeError::ArityMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "function `{name}` expects {expected} argument(s), got {found}"
            ),
            TypeError::NotCallable { what } => write!(f, "{what} is not callable"),
            TypeError::FnAsValue { name } => write!(
                f,
                "function `{name}` used as a value; functions may only be called"
            ),
            TypeError::NonBoolCondition { construct, found } => {
                write!(f, "{construct} condition must be Bool, got {found}")
            }
            TypeError::MissingReturn { name } => {
                write!(f, "function `{name}` does not return on every path")
            }
            TypeError::ImmutableAssign { name } => {
                write!(f, "cannot assign to immutable variable `{name}`")
            }
            TypeError::UnknownType { name } => write!(f, "unknown type `{name}`"),
            TypeError::UnitBinding { what } => write!(f, "{what} cannot have type Unit"),
            TypeError::ReturnValueInUnitFn => {
                write!(f, "cannot return a value from a Unit function")
            }
            TypeError::MissingReturnValue { expected } => {
                write!(f, "return needs a value of type {expected}")
            }
            TypeError::InvalidBinary { op, lhs, rhs } => {
                write!(f, "operator `{op}` cannot be applied to {lhs} and {rhs}")
            }
            TypeError::InvalidUnary { op, operand } => {
                write!(f, "operator `{op}` cannot be applied to {operand}")
            }
        }
    }
}

struct Checker<'a> {
    resolution: &'a mut Resolution,
    types: TypeTable,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn report(&mut self, error: TypeError, pos: Pos) {
        self.diagnostics.push(Diagnostic::error(error.to_string(), pos));
    }

    fn resolve_type_expr(&mut self, type_expr: &TypeExpr) -> Type {
        match Type::from_name(&type_expr.name) {
            Some(ty) => ty,
            None => {
                self.report(
                    TypeError::UnknownType {
                        name: type_expr.name.clone(),
                    },
                    type_expr.pos,
                );
                Type::Error
            }
        }
    }

    /// First pass: attach parameter types and the function type to every
    /// top-level symbol, so bodies can call forward in source order.
    fn declare_signatures(&mut self, program: &Program) {
        for decl in &program.decls {
            let mut params = Vec::new();
            for param in &decl.params {
                let mut ty = self.resolve_type_expr(&param.ty);
                if ty == Type::Unit {
                    self.report(
                        TypeError::UnitBinding {
                            what: format!("parameter `{}`", param.name),
                        },
                        param.pos,
                    );
                    ty = Type::Error;
                }
                if let Some(sym) = self.resolution.binding(param.id) {
                    self.resolution.symbol_mut(sym).ty = Some(ty.clone());
                }
                params.push(ty);
            }
            let ret = match &decl.return_type {
                Some(type_expr) => self.resolve_type_expr(type_expr),
                None => Type::Unit,
            };
            if let Some(sym) = self.resolution.binding(decl.id) {
                self.resolution.symbol_mut(sym).ty =
                    Some(Type::Fn(Box::new(FnType { params, ret })));
            }
        }
    }

    fn fn_return_type(&self, decl: &FnDecl) -> Type {
        match self.resolution.binding(decl.id) {
            Some(sym) => match &self.resolution.symbol(sym).ty {
                Some(Type::Fn(sig)) => sig.ret.clone(),
                _ => Type::Error,
            },
            None => Type::Error,
        }
    }

    fn check_fn(&mut self, decl: &FnDecl) {
        let ret = self.fn_return_type(decl);
        self.check_block(&decl.body, &ret);
        if ret != Type::Unit && !ret.is_error() && !always_returns(&decl.body.stmts) {
            self.report(
                TypeError::MissingReturn {
                    name: decl.name.clone(),
                },
                decl.pos,
            );
        }
    }

    fn check_block(&mut self, block: &Block, expected_ret: &Type) {
        for stmt in &block.stmts {
            self.check_stmt(stmt, expected_ret);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, expected_ret: &Type) {
        match stmt {
            Stmt::Let(let_stmt) => self.check_let(let_stmt),
            Stmt::Expr(expr_stmt) => {
                self.check_expr(&expr_stmt.expr, None);
            }
            Stmt::Return(ret) => self.check_return(ret, expected_ret),
            Stmt::If(if_stmt) => {
                let cond_ty = self.check_expr(&if_stmt.cond, None);
                if cond_ty != Type::Bool && !cond_ty.is_error() {
                    self.report(
                        TypeError::NonBoolCondition {
                            construct: "if",
                            found: cond_ty,
                        },
                        if_stmt.cond.pos,
                    );
                }
                self.check_block(&if_stmt.then_block, expected_ret);
                if let Some(else_block) = &if_stmt.else_block {
                    self.check_block(else_block, expected_ret);
                }
            }
            Stmt::While(while_stmt) => {
                let cond_ty = self.check_expr(&while_stmt.cond, None);
                if cond_ty != Type::Bool && !cond_ty.is_error() {
                    self.report(
                        TypeError::NonBoolCondition {
                            construct: "while",
                            found: cond_ty,
                        },
                        while_stmt.cond.pos,
                    );
                }
                self.check_block(&while_stmt.body, expected_ret);
            }
            Stmt::Block(block) => self.check_block(block, expected_ret),
        }
    }

    fn check_let(&mut self, let_stmt: &LetStmt) {
        let mut declared = let_stmt.ty.as_ref().map(|t| self.resolve_type_expr(t));
        if declared == Some(Type::Unit) {
            self.report(
                TypeError::UnitBinding {
                    what: format!("let binding `{}`", let_stmt.name),
                },
                let_stmt.pos,
            );
            declared = Some(Type::Error);
        }

        let value_ty = self.check_expr(&let_stmt.value, declared.as_ref());

        let final_ty = if value_ty == Type::Unit {
            self.report(
                TypeError::UnitBinding {
                    what: format!("initializer of `{}`", let_stmt.name),
                },
                let_stmt.value.pos,
            );
            declared.unwrap_or(Type::Error)
        } else {
            if let Some(declared_ty) = &declared {
                if !is_assignable(declared_ty, &value_ty) {
                    self.report(
                        TypeError::Mismatch {
                            expected: declared_ty.clone(),
                            found: value_ty.clone(),
                            what: format!("let binding `{}`", let_stmt.name),
                        },
                        let_stmt.value.pos,
                    );
                }
            }
            declared.unwrap_or(value_ty)
        };

        if let Some(sym) = self.resolution.binding(let_stmt.id) {
            self.resolution.symbol_mut(sym).ty = Some(final_ty);
        }
    }

    fn check_return(&mut self, ret: &ReturnStmt, expected_ret: &Type) {
        match &ret.value {
            Some(value) if *expected_ret == Type::Unit => {
                self.check_expr(value, None);
                self.report(TypeError::ReturnValueInUnitFn, ret.pos);
            }
            Some(value) => {
                let ty = self.check_expr(value, Some(expected_ret));
                if !is_assignable(expected_ret, &ty) {
                    self.report(
                        TypeError::Mismatch {
                            expected: expected_ret.clone(),
                            found: ty,
                            what: "return value".to_string(),
                        },
                        value.pos,
                    );
                }
            }
            None if *expected_ret == Type::Unit || expected_ret.is_error() => {}
            None => {
                self.report(
                    TypeError::MissingReturnValue {
                        expected: expected_ret.clone(),
                    },
                    ret.pos,
                );
            }
        }
    }

    /// Infer the expression's type and record it in the table. `expected`
    /// only drives integer-literal widening; it never suppresses a
    /// mismatch diagnostic at the use site.
    fn check_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        let ty = self.infer_expr(expr, expected);
        self.types.insert(expr.id, ty.clone());
        ty
    }

    fn infer_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        match &expr.kind {
            ExprKind::Int(_) => {
                if expected == Some(&Type::Float) {
                    Type::Float
                } else {
                    Type::Int
                }
            }
            ExprKind::Float(_) => Type::Float,
            ExprKind::Str(_) => Type::Str,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Ident(name) => self.infer_ident(expr, name),
            ExprKind::Unary { op, operand } => self.infer_unary(expr, *op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.infer_binary(expr, *op, lhs, rhs),
            ExprKind::Assign { target, value } => self.infer_assign(expr, target, value),
            ExprKind::Call { callee, args } => self.infer_call(expr, callee, args),
            ExprKind::Group(inner) => self.check_expr(inner, expected),
        }
    }

    fn infer_ident(&mut self, expr: &Expr, name: &str) -> Type {
        let Some(sym_id) = self.resolution.binding(expr.id) else {
            return Type::Error;
        };
        let (kind, ty) = {
            let sym = self.resolution.symbol(sym_id);
            (sym.kind, sym.ty.clone())
        };
        if kind == SymbolKind::Function {
            self.report(
                TypeError::FnAsValue {
                    name: name.to_string(),
                },
                expr.pos,
            );
            return Type::Error;
        }
        ty.unwrap_or(Type::Error)
    }

    fn infer_unary(&mut self, expr: &Expr, op: UnOp, operand: &Expr) -> Type {
        let ty = self.check_expr(operand, None);
        if ty.is_error() {
            return Type::Error;
        }
        match op {
            UnOp::Neg if ty.is_numeric() => ty,
            UnOp::Not if ty == Type::Bool => Type::Bool,
            _ => {
                self.report(
                    TypeError::InvalidUnary {
                        op: op.symbol(),
                        operand: ty,
                    },
                    expr.pos,
                );
                Type::Error
            }
        }
    }

    fn infer_binary(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Type {
        let mut lt = self.check_expr(lhs, None);
        let mut rt = self.check_expr(rhs, None);

        // An integer literal meeting a Float operand widens to Float.
        if lt == Type::Float && rt == Type::Int && self.retype_float(rhs) {
            rt = Type::Float;
        }
        if rt == Type::Float && lt == Type::Int && self.retype_float(lhs) {
            lt = Type::Float;
        }

        if lt.is_error() || rt.is_error() {
            return Type::Error;
        }

        use BinOp::*;
        let result = match op {
            Add | Sub | Mul | Div | Rem => (lt == rt && lt.is_numeric()).then(|| lt.clone()),
            Lt | Le | Gt | Ge => (lt == rt && lt.is_numeric()).then_some(Type::Bool),
            Eq | Ne => (lt == rt
                && matches!(lt, Type::Int | Type::Float | Type::Bool | Type::Str))
            .then_some(Type::Bool),
            And | Or => (lt == Type::Bool && rt == Type::Bool).then_some(Type::Bool),
            Concat => (lt == Type::Str && rt == Type::Str).then_some(Type::Str),
        };
        match result {
            Some(ty) => ty,
            None => {
                self.report(
                    TypeError::InvalidBinary {
                        op: op.symbol(),
                        lhs: lt,
                        rhs: rt,
                    },
                    expr.pos,
                );
                Type::Error
            }
        }
    }

    fn infer_assign(&mut self, expr: &Expr, target: &Expr, value: &Expr) -> Type {
        let ExprKind::Ident(name) = &target.kind else {
            // The parser only builds identifier targets.
            self.types.insert(target.id, Type::Error);
            self.check_expr(value, None);
            return Type::Error;
        };
        let Some(sym_id) = self.resolution.binding(target.id) else {
            self.types.insert(target.id, Type::Error);
            self.check_expr(value, None);
            return Type::Error;
        };
        let (kind, mutable, ty) = {
            let sym = self.resolution.symbol(sym_id);
            (sym.kind, sym.mutable, sym.ty.clone())
        };
        if kind == SymbolKind::Function {
            self.types.insert(target.id, Type::Error);
            self.report(
                TypeError::FnAsValue {
                    name: name.clone(),
                },
                target.pos,
            );
            self.check_expr(value, None);
            return Type::Error;
        }

        let target_ty = ty.unwrap_or(Type::Error);
        self.types.insert(target.id, target_ty.clone());

        if !mutable {
            self.report(
                TypeError::ImmutableAssign { name: name.clone() },
                target.pos,
            );
        }

        let value_ty = self.check_expr(value, Some(&target_ty));
        if !is_assignable(&target_ty, &value_ty) {
            self.report(
                TypeError::Mismatch {
                    expected: target_ty.clone(),
                    found: value_ty,
                    what: format!("assignment to `{name}`"),
                },
                expr.pos,
            );
        }
        target_ty
    }

    fn infer_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Type {
        let ExprKind::Ident(name) = &callee.kind else {
            self.check_expr(callee, None);
            self.report(
                TypeError::NotCallable {
                    what: "this expression".to_string(),
                },
                callee.pos,
            );
            for arg in args {
                self.check_expr(arg, None);
            }
            return Type::Error;
        };

        let Some(sym_id) = self.resolution.binding(callee.id) else {
            self.types.insert(callee.id, Type::Error);
            for arg in args {
                self.check_expr(arg, None);
            }
            return Type::Error;
        };
        let (kind, sym_ty) = {
            let sym = self.resolution.symbol(sym_id);
            (sym.kind, sym.ty.clone())
        };

        if kind != SymbolKind::Function {
            self.types
                .insert(callee.id, sym_ty.unwrap_or(Type::Error));
            self.report(
                TypeError::NotCallable {
                    what: format!("`{name}`"),
                },
                callee.pos,
            );
            for arg in args {
                self.check_expr(arg, None);
            }
            return Type::Error;
        }

        let Some(Type::Fn(sig)) = sym_ty else {
            self.types.insert(callee.id, Type::Error);
            for arg in args {
                self.check_expr(arg, None);
            }
            return Type::Error;
        };
        self.types.insert(callee.id, Type::Fn(sig.clone()));

        if sig.params.len() != args.len() {
            self.report(
                TypeError::ArityMismatch {
                    name: name.clone(),
                    expected: sig.params.len(),
                    found: args.len(),
                },
                expr.pos,
            );
            for arg in args {
                self.check_expr(arg, None);
            }
            return Type::Error;
        }

        for (i, (arg, param_ty)) in args.iter().zip(&sig.params).enumerate() {
            let arg_ty = self.check_expr(arg, Some(param_ty));
            if !is_assignable(param_ty, &arg_ty) {
                self.report(
                    TypeError::Mismatch {
                        expected: param_ty.clone(),
                        found: arg_ty,
                        what: format!("argument {} of `{name}`", i + 1),
                    },
                    arg.pos,
                );
            }
        }
        sig.ret.clone()
    }

    /// Retype a (possibly parenthesized) integer literal as Float,
    /// returning whether the node was such a literal. The whole group
    /// chain is rewritten so the table stays consistent.
    fn retype_float(&mut self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Int(_) => {
                self.types.insert(expr.id, Type::Float);
                true
            }
            ExprKind::Group(inner) => {
                if self.retype_float(inner) {
                    self.types.insert(expr.id, Type::Float);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

/// Conservative "returns on every path" analysis: a plain `return`, an
/// `if`/`else` whose both arms always return, or a nested block that
/// does. Loops never count, even `while true`.
fn always_returns(stmts: &[Stmt]) -> bool {
    for stmt in stmts {
        match stmt {
            Stmt::Return(_) => return true,
            Stmt::If(if_stmt) => {
                if let Some(else_block) = &if_stmt.else_block {
                    if always_returns(&if_stmt.then_block.stmts)
                        && always_returns(&else_block.stmts)
                    {
                        return true;
                    }
                }
            }
            Stmt::Block(block) => {
                if always_returns(&block.stmts) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
