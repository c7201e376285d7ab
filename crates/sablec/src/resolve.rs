use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{Diagnostic, Pos};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// One lexical scope: a symbol table plus a back-link to its parent for
/// lookup chaining. Scopes live in the [`Resolution`] arena and are
/// never freed while the compilation holds references into them.
#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    symbols: HashMap<String, SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Param,
    Var,
}

/// A named, typed declaration. Created during resolution; the type is
/// attached later by the checker and never changes after that.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub mutable: bool,
    pub decl: NodeId,
    pub pos: Pos,
    pub scope: ScopeId,
    pub ty: Option<Type>,
}

/// The resolver's output: scope and symbol arenas plus the side table
/// linking identifier and declaration nodes to their symbols.
#[derive(Debug, Default)]
pub struct Resolution {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    bindings: HashMap<NodeId, SymbolId>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// The symbol an identifier or declaration node is bound to.
    pub fn binding(&self, node: NodeId) -> Option<SymbolId> {
        self.bindings.get(&node).copied()
    }

    /// Look a name up from the given scope outward. The innermost
    /// enclosing scope containing the name wins.
    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(from);
        while let Some(scope_id) = current {
            let scope = self.scope(scope_id);
            if let Some(&sym) = scope.symbols.get(name) {
                return Some(sym);
            }
            current = scope.parent;
        }
        None
    }
}

/// Walk the AST binding identifiers to declarations. Errors (undeclared
/// identifier, duplicate declaration in one scope) are collected, not
/// fatal: the walk continues so every name error surfaces in one pass.
pub fn resolve(program: &Program) -> Resolution {
    let mut resolver = Resolver {
        resolution: Resolution::default(),
        stack: Vec::new(),
    };
    resolver.run(program);
    resolver.resolution.diagnostics.sort_by_key(|d| d.pos);
    resolver.resolution
}

struct Resolver {
    resolution: Resolution,
    stack: Vec<ScopeId>,
}

impl Resolver {
    fn push_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.resolution.scopes.len() as u32);
        self.resolution.scopes.push(Scope {
            parent: self.stack.last().copied(),
            symbols: HashMap::new(),
        });
        self.stack.push(id);
        id
    }

    fn pop_scope(&mut self) {
        self.stack.pop();
    }

    fn current_scope(&self) -> ScopeId {
        *self.stack.last().unwrap_or(&ScopeId(0))
    }

    fn error(&mut self, message: String, pos: Pos) {
        self.resolution
            .diagnostics
            .push(Diagnostic::error(message, pos));
    }

    /// Register a symbol in the innermost scope. Duplicate names within
    /// one scope are an error; shadowing an outer scope is fine.
    fn declare(
        &mut self,
        name: &str,
        kind: SymbolKind,
        mutable: bool,
        decl: NodeId,
        pos: Pos,
    ) -> Option<SymbolId> {
        let scope_id = self.current_scope();
        if self.resolution.scope(scope_id).symbols.contains_key(name) {
            self.error(
                format!("duplicate declaration of `{name}` in this scope"),
                pos,
            );
            return None;
        }
        let id = SymbolId(self.resolution.symbols.len() as u32);
        self.resolution.symbols.push(Symbol {
            name: name.to_string(),
            kind,
            mutable,
            decl,
            pos,
            scope: scope_id,
            ty: None,
        });
        self.resolution.scopes[scope_id.0 as usize]
            .symbols
            .insert(name.to_string(), id);
        self.resolution.bindings.insert(decl, id);
        Some(id)
    }

    fn run(&mut self, program: &Program) {
        self.push_scope();

        // Register all top-level functions first so forward calls resolve.
        for decl in &program.decls {
            self.declare(&decl.name, SymbolKind::Function, false, decl.id, decl.pos);
        }
        for decl in &program.decls {
            self.resolve_fn(decl);
        }

        self.pop_scope();
    }

    fn resolve_fn(&mut self, decl: &FnDecl) {
        // Parameters get their own scope wrapping the body block.
        self.push_scope();
        for param in &decl.params {
            self.declare(&param.name, SymbolKind::Param, false, param.id, param.pos);
        }
        self.resolve_block(&decl.body);
        self.pop_scope();
    }

    fn resolve_block(&mut self, block: &Block) {
        self.push_scope();
        for stmt in &block.stmts {
            self.resolve_stmt(stmt);
        }
        self.pop_scope();
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(let_stmt) => {
                // The initializer is resolved before the name is visible,
                // so `let x = x;` refers to an outer `x` or fails.
                self.resolve_expr(&let_stmt.value);
                self.declare(
                    &let_stmt.name,
                    SymbolKind::Var,
                    let_stmt.mutable,
                    let_stmt.id,
                    let_stmt.pos,
                );
            }
            Stmt::Expr(expr_stmt) => self.resolve_expr(&expr_stmt.expr),
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.resolve_expr(value);
                }
            }
            Stmt::If(if_stmt) => {
                self.resolve_expr(&if_stmt.cond);
                self.resolve_block(&if_stmt.then_block);
                if let Some(else_block) = &if_stmt.else_block {
                    self.resolve_block(else_block);
                }
            }
            Stmt::While(while_stmt) => {
                self.resolve_expr(&while_stmt.cond);
                self.resolve_block(&while_stmt.body);
            }
            Stmt::Block(block) => self.resolve_block(block),
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Ident(name) => {
                match self.resolution.lookup(self.current_scope(), name) {
                    Some(sym) => {
                        self.resolution.bindings.insert(expr.id, sym);
                    }
                    None => self.error(format!("undeclared identifier `{name}`"), expr.pos),
                }
            }
            ExprKind::Unary { operand, .. } => self.resolve_expr(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs);
                self.resolve_expr(rhs);
            }
            ExprKind::Assign { target, value } => {
                self.resolve_expr(target);
                self.resolve_expr(value);
            }
            ExprKind::Call { callee, args } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            ExprKind::Group(inner) => self.resolve_expr(inner),
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) => {}
        }
    }
}
