use crate::ast::*;
use crate::diag::{Diagnostic, Pos};
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into a program plus any syntax errors collected
/// along the way. On a malformed construct the parser records a
/// diagnostic, skips to a synchronization point, and keeps going, so one
/// pass reports every independent error. Malformed constructs are dropped
/// from the tree.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<Diagnostic>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    let mut diagnostics = parser.diagnostics;
    diagnostics.sort_by_key(|d| d.pos);
    (program, diagnostics)
}

/// Marker for an aborted production; the diagnostic is already recorded.
struct ParseAbort;

type PResult<T> = Result<T, ParseAbort>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: u32,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            next_id: 0,
            diagnostics: Vec::new(),
        }
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind, pos: Pos) -> Expr {
        Expr {
            id: self.node_id(),
            kind,
            pos,
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn current_pos(&self) -> Pos {
        match self.tokens.get(self.pos) {
            Some(tok) => tok.pos,
            None => self.end_pos(),
        }
    }

    fn end_pos(&self) -> Pos {
        self.tokens
            .last()
            .map(|t| t.pos)
            .unwrap_or(Pos::new(1, 1, 0))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        match self.peek_kind() {
            Some(k) => std::mem::discriminant(k) == std::mem::discriminant(kind),
            None => false,
        }
    }

    /// Advance past the current token if it matches, returning whether it did.
    fn take(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> PResult<Token> {
        if let Some(tok) = self.tokens.get(self.pos) {
            if std::mem::discriminant(&tok.kind) == std::mem::discriminant(expected) {
                let tok = tok.clone();
                self.pos += 1;
                return Ok(tok);
            }
            let lexeme = tok.lexeme.clone();
            let pos = tok.pos;
            return Err(self.error_at(pos, format!("expected {expected}, got `{lexeme}`")));
        }
        let pos = self.end_pos();
        Err(self.error_at(pos, format!("expected {expected}, found end of input")))
    }

    fn expect_ident(&mut self) -> PResult<(String, Pos)> {
        if let Some(tok) = self.tokens.get(self.pos) {
            if let TokenKind::Ident(name) = &tok.kind {
                let result = (name.clone(), tok.pos);
                self.pos += 1;
                return Ok(result);
            }
            let lexeme = tok.lexeme.clone();
            let pos = tok.pos;
            return Err(self.error_at(pos, format!("expected an identifier, got `{lexeme}`")));
        }
        let pos = self.end_pos();
        Err(self.error_at(pos, "expected an identifier, found end of input".to_string()))
    }

    fn error_at(&mut self, pos: Pos, message: String) -> ParseAbort {
        self.diagnostics.push(Diagnostic::error(message, pos));
        ParseAbort
    }

    // Recovery

    /// Skip to the next statement boundary: past a `;`, or up to a token
    /// that can only start a new statement or close the current block.
    fn synchronize(&mut self) {
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semi => {
                    self.pos += 1;
                    return;
                }
                TokenKind::RBrace
                | TokenKind::Fn
                | TokenKind::Let
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return => return,
                _ => self.pos += 1,
            }
        }
    }

    /// Skip to the next top-level declaration.
    fn synchronize_decl(&mut self) {
        while let Some(kind) = self.peek_kind() {
            if matches!(kind, TokenKind::Fn) {
                return;
            }
            self.pos += 1;
        }
    }

    // Declarations

    fn parse_program(&mut self) -> Program {
        let mut decls = Vec::new();
        while self.peek_kind().is_some() {
            if self.check(&TokenKind::Fn) {
                match self.parse_fn() {
                    Ok(decl) => decls.push(decl),
                    Err(ParseAbort) => self.synchronize_decl(),
                }
            } else {
                let pos = self.current_pos();
                let lexeme = self.tokens[self.pos].lexeme.clone();
                self.error_at(pos, format!("expected `fn`, got `{lexeme}`"));
                self.pos += 1;
                self.synchronize_decl();
            }
        }
        Program { decls }
    }

    fn parse_fn(&mut self) -> PResult<FnDecl> {
        let fn_tok = self.expect(&TokenKind::Fn)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;

        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if !params.is_empty() {
                self.expect(&TokenKind::Comma)?;
            }
            let (pname, ppos) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            params.push(Param {
                id: self.node_id(),
                name: pname,
                ty,
                pos: ppos,
            });
        }
        self.expect(&TokenKind::RParen)?;

        let return_type = if self.take(&TokenKind::Arrow) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let body = self.parse_block()?;

        Ok(FnDecl {
            id: self.node_id(),
            name,
            params,
            return_type,
            body,
            pos: fn_tok.pos,
        })
    }

    fn parse_type_expr(&mut self) -> PResult<TypeExpr> {
        let (name, pos) = self.expect_ident()?;
        Ok(TypeExpr { name, pos })
    }

    // Statements

    fn parse_block(&mut self) -> PResult<Block> {
        let lbrace = self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                // `fn` cannot occur inside a block; treat it as a missing
                // close brace and let the caller recover.
                None | Some(TokenKind::RBrace) | Some(TokenKind::Fn) => break,
                _ => {
                    let before = self.pos;
                    match self.parse_stmt() {
                        Ok(stmt) => stmts.push(stmt),
                        Err(ParseAbort) => {
                            self.synchronize();
                            if self.pos == before {
                                break;
                            }
                        }
                    }
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Block {
            stmts,
            pos: lbrace.pos,
        })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek_kind() {
            Some(TokenKind::Let) => self.parse_let(),
            Some(TokenKind::Return) => self.parse_return(),
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::While) => self.parse_while(),
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            _ => {
                let expr = self.parse_expr()?;
                let pos = expr.pos;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Expr(ExprStmt { expr, pos }))
            }
        }
    }

    fn parse_let(&mut self) -> PResult<Stmt> {
        let let_tok = self.expect(&TokenKind::Let)?;
        let mutable = self.take(&TokenKind::Mut);
        let (name, _) = self.expect_ident()?;
        let ty = if self.take(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::Let(LetStmt {
            id: self.node_id(),
            name,
            mutable,
            ty,
            value,
            pos: let_tok.pos,
        }))
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let ret_tok = self.expect(&TokenKind::Return)?;
        let value = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::Return(ReturnStmt {
            value,
            pos: ret_tok.pos,
        }))
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let if_tok = self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.take(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let pos = self.current_pos();
                let nested = self.parse_if()?;
                Some(Block {
                    stmts: vec![nested],
                    pos,
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            cond,
            then_block,
            else_block,
            pos: if_tok.pos,
        }))
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let while_tok = self.expect(&TokenKind::While)?;
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::While(WhileStmt {
            cond,
            body,
            pos: while_tok.pos,
        }))
    }

    // Expressions, lowest precedence first

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> PResult<Expr> {
        let lhs = self.parse_or()?;
        if !self.check(&TokenKind::Eq) {
            return Ok(lhs);
        }
        let eq_pos = self.current_pos();
        self.pos += 1;
        // Right-associative: `a = b = c` assigns `b = c` first.
        let value = self.parse_assign()?;
        if !matches!(lhs.kind, ExprKind::Ident(_)) {
            return Err(self.error_at(eq_pos, "invalid assignment target".to_string()));
        }
        let pos = lhs.pos;
        Ok(self.expr(
            ExprKind::Assign {
                target: Box::new(lhs),
                value: Box::new(value),
            },
            pos,
        ))
    }

    fn binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
        self.expr(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        )
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::OrOr) {
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_and()?;
            left = self.binary(BinOp::Or, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_equality()?;
            left = self.binary(BinOp::And, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::BangEq) => BinOp::Ne,
                _ => break,
            };
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = self.binary(op, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::LtEq) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::GtEq) => BinOp::Ge,
                _ => break,
            };
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_concat()?;
            left = self.binary(op, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        while self.check(&TokenKind::PlusPlus) {
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_additive()?;
            left = self.binary(BinOp::Concat, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            let op_pos = self.current_pos();
            self.pos += 1;
            let right = self.parse_unary()?;
            left = self.binary(op, left, right, op_pos);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnOp::Neg,
            Some(TokenKind::Bang) => UnOp::Not,
            _ => return self.parse_call(),
        };
        let op_pos = self.current_pos();
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(self.expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            op_pos,
        ))
    }

    fn parse_call(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.check(&TokenKind::LParen) {
            self.pos += 1;
            let mut args = Vec::new();
            while !self.check(&TokenKind::RParen) {
                if !args.is_empty() {
                    self.expect(&TokenKind::Comma)?;
                }
                args.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::RParen)?;
            let pos = expr.pos;
            expr = self.expr(
                ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                },
                pos,
            );
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.current_pos();
        match self.peek_kind().cloned() {
            Some(TokenKind::IntLit(n)) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Int(n), pos))
            }
            Some(TokenKind::FloatLit(n)) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Float(n), pos))
            }
            Some(TokenKind::StrLit(s)) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Str(s), pos))
            }
            Some(TokenKind::True) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Bool(true), pos))
            }
            Some(TokenKind::False) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Bool(false), pos))
            }
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                Ok(self.expr(ExprKind::Ident(name), pos))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(self.expr(ExprKind::Group(Box::new(inner)), pos))
            }
            Some(other) => Err(self.error_at(pos, format!("expected an expression, got {other}"))),
            None => Err(self.error_at(pos, "expected an expression, found end of input".to_string())),
        }
    }
}
