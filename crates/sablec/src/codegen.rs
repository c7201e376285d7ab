use std::collections::HashMap;

use sable_bytecode::module::{Module, Routine, TypeTag};
use sable_bytecode::opcode::Op;
use sable_bytecode::value::Const;

use crate::ast::*;
use crate::error::CompileError;
use crate::resolve::{Resolution, SymbolId};
use crate::typeck::TypeTable;
use crate::types::{FnType, Type};

/// Emit a bytecode module from a fully checked program: one routine per
/// function, in source order. Requires an error-free typed AST; any
/// violated invariant here is a compiler bug surfacing as
/// `CompileError::Internal`, never a user-facing diagnostic.
pub fn emit(
    name: &str,
    program: &Program,
    resolution: &Resolution,
    types: &TypeTable,
) -> Result<Module, CompileError> {
    let mut emitter = Emitter {
        module: Module::new(name),
        resolution,
        types,
        fn_indices: HashMap::new(),
    };
    emitter.emit_program(program)?;
    Ok(emitter.module)
}

fn internal(msg: impl Into<String>) -> CompileError {
    CompileError::Internal(msg.into())
}

/// Symbolic branch target. Emission refers to labels; the resolution
/// pass rewrites them into instruction offsets once every block length
/// is known, so forward references need no in-place patching.
#[derive(Clone, Copy)]
struct Label(usize);

enum Inst {
    Plain(Op),
    Jump(Label),
    JumpIfFalse(Label),
}

struct Emitter<'a> {
    module: Module,
    resolution: &'a Resolution,
    types: &'a TypeTable,
    /// Routine index for every function symbol, assigned in source order.
    fn_indices: HashMap<SymbolId, u32>,
}

/// Per-routine emission state: instruction buffer, label table, local
/// slot map, and the running/maximum operand-stack depth.
struct FnEmitter {
    code: Vec<Inst>,
    labels: Vec<Option<u32>>,
    slots: HashMap<SymbolId, u32>,
    next_slot: u32,
    depth: i32,
    max_depth: i32,
}

impl FnEmitter {
    fn new() -> Self {
        FnEmitter {
            code: Vec::new(),
            labels: Vec::new(),
            slots: HashMap::new(),
            next_slot: 0,
            depth: 0,
            max_depth: 0,
        }
    }

    fn track(&mut self, effect: i32) -> Result<(), CompileError> {
        self.depth += effect;
        if self.depth < 0 {
            return Err(internal("operand stack underflow during emission"));
        }
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
        Ok(())
    }

    fn push(&mut self, op: Op) -> Result<(), CompileError> {
        self.track(op.stack_effect())?;
        self.code.push(Inst::Plain(op));
        Ok(())
    }

    fn jump(&mut self, label: Label) {
        self.code.push(Inst::Jump(label));
    }

    fn jump_if_false(&mut self, label: Label) -> Result<(), CompileError> {
        self.track(-1)?;
        self.code.push(Inst::JumpIfFalse(label));
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len() as u32);
    }

    /// Slots are handed out monotonically, parameters first, with no
    /// reuse across sibling scopes. Keyed by symbol, so shadowed names
    /// keep distinct slots.
    fn alloc_slot(&mut self, sym: SymbolId) -> u32 {
        let slot = self.next_slot;
        self.slots.insert(sym, slot);
        self.next_slot += 1;
        slot
    }

    fn slot(&self, sym: SymbolId) -> Result<u32, CompileError> {
        self.slots
            .get(&sym)
            .copied()
            .ok_or_else(|| internal("local used before its slot was allocated"))
    }

    fn last_is_return(&self) -> bool {
        matches!(self.code.last(), Some(Inst::Plain(Op::Ret | Op::RetUnit)))
    }

    /// Resolution pass: map every label to its bound instruction offset.
    fn resolve_labels(self) -> Result<Vec<Op>, CompileError> {
        let FnEmitter { code, labels, .. } = self;
        let bound = |label: Label| {
            labels[label.0].ok_or_else(|| internal("branch label never bound"))
        };
        code.into_iter()
            .map(|inst| match inst {
                Inst::Plain(op) => Ok(op),
                Inst::Jump(label) => Ok(Op::Jump(bound(label)?)),
                Inst::JumpIfFalse(label) => Ok(Op::JumpIfFalse(bound(label)?)),
            })
            .collect()
    }
}

impl Emitter<'_> {
    fn binding(&self, node: NodeId) -> Result<SymbolId, CompileError> {
        self.resolution
            .binding(node)
            .ok_or_else(|| internal("node missing its symbol binding"))
    }

    fn node_type(&self, node: NodeId) -> Result<&Type, CompileError> {
        self.types
            .get(&node)
            .ok_or_else(|| internal("expression missing from the type table"))
    }

    fn fn_sig(&self, decl: &FnDecl) -> Result<FnType, CompileError> {
        let sym = self.binding(decl.id)?;
        match &self.resolution.symbol(sym).ty {
            Some(Type::Fn(sig)) => Ok((**sig).clone()),
            _ => Err(internal("function symbol has no signature")),
        }
    }

    fn emit_program(&mut self, program: &Program) -> Result<(), CompileError> {
        for (index, decl) in program.decls.iter().enumerate() {
            let sym = self.binding(decl.id)?;
            self.fn_indices.insert(sym, index as u32);
        }
        for decl in &program.decls {
            self.emit_fn(decl)?;
        }
        Ok(())
    }

    fn emit_fn(&mut self, decl: &FnDecl) -> Result<(), CompileError> {
        let sig = self.fn_sig(decl)?;
        let mut fe = FnEmitter::new();

        for param in &decl.params {
            let sym = self.binding(param.id)?;
            fe.alloc_slot(sym);
        }

        self.emit_block(&decl.body, &mut fe)?;

        // Unit functions may fall off the end; give them an implicit
        // return. Non-unit functions were proven by the checker to
        // return on every reachable path.
        if !fe.last_is_return() && sig.ret == Type::Unit {
            fe.push(Op::RetUnit)?;
        }

        // A branch may still land on the end boundary (an else arm that
        // returns while the then arm falls through); give it a real
        // instruction to land on.
        let code_len = fe.code.len() as u32;
        let dangling = fe.code.iter().any(|inst| {
            matches!(inst, Inst::Jump(l) | Inst::JumpIfFalse(l)
                if fe.labels[l.0] == Some(code_len))
        });
        if dangling {
            if sig.ret != Type::Unit {
                return Err(internal("branch to routine end in a non-unit routine"));
            }
            fe.push(Op::RetUnit)?;
        }

        if fe.depth != 0 {
            return Err(internal("operand stack not empty at routine end"));
        }

        let params = sig
            .params
            .iter()
            .map(type_tag)
            .collect::<Result<Vec<_>, _>>()?;
        let ret = type_tag(&sig.ret)?;
        let max_stack = fe.max_depth as u16;
        let local_slots = fe.next_slot as u16;
        let code = fe.resolve_labels()?;

        self.module.add_routine(Routine {
            name: decl.name.clone(),
            params,
            ret,
            max_stack,
            local_slots,
            code,
        });
        Ok(())
    }

    fn emit_block(&mut self, block: &Block, fe: &mut FnEmitter) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.emit_stmt(stmt, fe)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, fe: &mut FnEmitter) -> Result<(), CompileError> {
        let entry_depth = fe.depth;
        match stmt {
            Stmt::Let(let_stmt) => {
                self.emit_expr(&let_stmt.value, fe)?;
                let sym = self.binding(let_stmt.id)?;
                let slot = fe.alloc_slot(sym);
                fe.push(Op::StoreLocal(slot))?;
            }
            Stmt::Expr(expr_stmt) => {
                self.emit_expr(&expr_stmt.expr, fe)?;
                fe.push(Op::Pop)?;
            }
            Stmt::Return(ret) => match &ret.value {
                Some(value) => {
                    self.emit_expr(value, fe)?;
                    fe.push(Op::Ret)?;
                }
                None => fe.push(Op::RetUnit)?,
            },
            Stmt::If(if_stmt) => {
                self.emit_expr(&if_stmt.cond, fe)?;
                let else_label = fe.new_label();
                fe.jump_if_false(else_label)?;
                self.emit_block(&if_stmt.then_block, fe)?;
                match &if_stmt.else_block {
                    Some(else_block) => {
                        let end_label = fe.new_label();
                        // A then arm that already returned cannot fall
                        // through; the jump over the else arm would be
                        // dead and could dangle past the routine end.
                        if !fe.last_is_return() {
                            fe.jump(end_label);
                        }
                        fe.bind(else_label);
                        self.emit_block(else_block, fe)?;
                        fe.bind(end_label);
                    }
                    None => fe.bind(else_label),
                }
            }
            Stmt::While(while_stmt) => {
                let loop_label = fe.new_label();
                fe.bind(loop_label);
                self.emit_expr(&while_stmt.cond, fe)?;
                let end_label = fe.new_label();
                fe.jump_if_false(end_label)?;
                self.emit_block(&while_stmt.body, fe)?;
                fe.jump(loop_label);
                fe.bind(end_label);
            }
            Stmt::Block(block) => self.emit_block(block, fe)?,
        }
        if fe.depth != entry_depth {
            return Err(internal("statement changed the operand stack depth"));
        }
        Ok(())
    }

    fn emit_expr(&mut self, expr: &Expr, fe: &mut FnEmitter) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Int(n) => {
                // The checker may have widened this literal to Float.
                let value = if *self.node_type(expr.id)? == Type::Float {
                    Const::Float(*n as f64)
                } else {
                    Const::Int(*n)
                };
                let idx = self.module.add_const(value);
                fe.push(Op::PushConst(idx))
            }
            ExprKind::Float(x) => {
                let idx = self.module.add_const(Const::Float(*x));
                fe.push(Op::PushConst(idx))
            }
            ExprKind::Str(s) => {
                let idx = self.module.add_const(Const::Str(s.clone()));
                fe.push(Op::PushConst(idx))
            }
            ExprKind::Bool(b) => fe.push(if *b { Op::PushTrue } else { Op::PushFalse }),
            ExprKind::Ident(_) => {
                let sym = self.binding(expr.id)?;
                let slot = fe.slot(sym)?;
                fe.push(Op::LoadLocal(slot))
            }
            ExprKind::Unary { op, operand } => {
                self.emit_expr(operand, fe)?;
                let operand_ty = self.node_type(operand.id)?;
                let selected = match (op, operand_ty) {
                    (UnOp::Neg, Type::Int) => Op::IntNeg,
                    (UnOp::Neg, Type::Float) => Op::FloatNeg,
                    (UnOp::Not, Type::Bool) => Op::Not,
                    _ => {
                        return Err(internal(format!(
                            "no instruction for unary `{}` on {operand_ty}",
                            op.symbol()
                        )))
                    }
                };
                fe.push(selected)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs, fe)?;
                self.emit_expr(rhs, fe)?;
                let operand_ty = self.node_type(lhs.id)?;
                fe.push(binary_op(*op, operand_ty)?)
            }
            ExprKind::Assign { target, value } => {
                self.emit_expr(value, fe)?;
                fe.push(Op::Dup)?;
                let sym = self.binding(target.id)?;
                let slot = fe.slot(sym)?;
                fe.push(Op::StoreLocal(slot))
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    self.emit_expr(arg, fe)?;
                }
                let sym = self.binding(callee.id)?;
                let index = self
                    .fn_indices
                    .get(&sym)
                    .copied()
                    .ok_or_else(|| internal("call target has no routine index"))?;
                fe.push(Op::Call(index, args.len() as u8))
            }
            ExprKind::Group(inner) => self.emit_expr(inner, fe),
        }
    }
}

fn binary_op(op: BinOp, operand_ty: &Type) -> Result<Op, CompileError> {
    use BinOp::*;
    let selected = match (op, operand_ty) {
        (Add, Type::Int) => Op::IntAdd,
        (Sub, Type::Int) => Op::IntSub,
        (Mul, Type::Int) => Op::IntMul,
        (Div, Type::Int) => Op::IntDiv,
        (Rem, Type::Int) => Op::IntRem,
        (Add, Type::Float) => Op::FloatAdd,
        (Sub, Type::Float) => Op::FloatSub,
        (Mul, Type::Float) => Op::FloatMul,
        (Div, Type::Float) => Op::FloatDiv,
        (Rem, Type::Float) => Op::FloatRem,
        (Eq, Type::Int) => Op::IntEq,
        (Ne, Type::Int) => Op::IntNe,
        (Lt, Type::Int) => Op::IntLt,
        (Le, Type::Int) => Op::IntLe,
        (Gt, Type::Int) => Op::IntGt,
        (Ge, Type::Int) => Op::IntGe,
        (Eq, Type::Float) => Op::FloatEq,
        (Ne, Type::Float) => Op::FloatNe,
        (Lt, Type::Float) => Op::FloatLt,
        (Le, Type::Float) => Op::FloatLe,
        (Gt, Type::Float) => Op::FloatGt,
        (Ge, Type::Float) => Op::FloatGe,
        (Eq, Type::Bool) => Op::BoolEq,
        (Ne, Type::Bool) => Op::BoolNe,
        (Eq, Type::Str) => Op::StrEq,
        (Ne, Type::Str) => Op::StrNe,
        (And, Type::Bool) => Op::BoolAnd,
        (Or, Type::Bool) => Op::BoolOr,
        (Concat, Type::Str) => Op::StrConcat,
        _ => {
            return Err(internal(format!(
                "no instruction for operator `{}` on {operand_ty}",
                op.symbol()
            )))
        }
    };
    Ok(selected)
}

fn type_tag(ty: &Type) -> Result<TypeTag, CompileError> {
    match ty {
        Type::Int => Ok(TypeTag::Int),
        Type::Float => Ok(TypeTag::Float),
        Type::Bool => Ok(TypeTag::Bool),
        Type::Str => Ok(TypeTag::Str),
        Type::Unit => Ok(TypeTag::Unit),
        Type::Fn(_) | Type::Error => {
            Err(internal(format!("type {ty} has no runtime representation")))
        }
    }
}
