use serde::{Deserialize, Serialize};

/// Bytecode instructions for the Sable runtime.
/// Stack-based: operands are pushed and popped from the operand stack.
/// Arithmetic, comparison, and return instructions are typed per operand
/// kind; the compiler selects the variant from the checked expression type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Push a constant from the constant pool onto the stack.
    PushConst(u32),

    /// Push the boolean `true`.
    PushTrue,

    /// Push the boolean `false`.
    PushFalse,

    /// Push the unit value.
    PushUnit,

    /// Load a local slot onto the stack.
    LoadLocal(u32),

    /// Pop the top of stack into a local slot.
    StoreLocal(u32),

    // Integer arithmetic
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntRem,
    IntNeg,

    // Float arithmetic
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatRem,
    FloatNeg,

    // Integer comparison
    IntEq,
    IntNe,
    IntLt,
    IntLe,
    IntGt,
    IntGe,

    // Float comparison
    FloatEq,
    FloatNe,
    FloatLt,
    FloatLe,
    FloatGt,
    FloatGe,

    // Boolean and string equality
    BoolEq,
    BoolNe,
    StrEq,
    StrNe,

    // Logical (strict, both operands already evaluated)
    BoolAnd,
    BoolOr,
    Not,

    /// Pop two strings, push their concatenation.
    StrConcat,

    /// Unconditional jump to an instruction index within this routine.
    Jump(u32),

    /// Pop a boolean; jump to the instruction index if it is false.
    JumpIfFalse(u32),

    /// Pop N args, call the routine at the given index. Pushes the result.
    Call(u32, u8),

    /// Return the popped top of stack to the caller.
    Ret,

    /// Return the unit value to the caller.
    RetUnit,

    /// Pop and discard the top of stack.
    Pop,

    /// Duplicate the top of stack.
    Dup,
}

impl Op {
    /// Encode to a byte tag (for tooling that needs a stable opcode id).
    pub fn to_byte_tag(&self) -> u8 {
        match self {
            Op::PushConst(_) => 0x01,
            Op::PushTrue => 0x02,
            Op::PushFalse => 0x03,
            Op::PushUnit => 0x04,
            Op::LoadLocal(_) => 0x05,
            Op::StoreLocal(_) => 0x06,
            Op::IntAdd => 0x10,
            Op::IntSub => 0x11,
            Op::IntMul => 0x12,
            Op::IntDiv => 0x13,
            Op::IntRem => 0x14,
            Op::IntNeg => 0x15,
            Op::FloatAdd => 0x18,
            Op::FloatSub => 0x19,
            Op::FloatMul => 0x1A,
            Op::FloatDiv => 0x1B,
            Op::FloatRem => 0x1C,
            Op::FloatNeg => 0x1D,
            Op::IntEq => 0x20,
            Op::IntNe => 0x21,
            Op::IntLt => 0x22,
            Op::IntLe => 0x23,
            Op::IntGt => 0x24,
            Op::IntGe => 0x25,
            Op::FloatEq => 0x28,
            Op::FloatNe => 0x29,
            Op::FloatLt => 0x2A,
            Op::FloatLe => 0x2B,
            Op::FloatGt => 0x2C,
            Op::FloatGe => 0x2D,
            Op::BoolEq => 0x30,
            Op::BoolNe => 0x31,
            Op::StrEq => 0x32,
            Op::StrNe => 0x33,
            Op::BoolAnd => 0x40,
            Op::BoolOr => 0x41,
            Op::Not => 0x42,
            Op::StrConcat => 0x50,
            Op::Jump(_) => 0x60,
            Op::JumpIfFalse(_) => 0x61,
            Op::Call(_, _) => 0x62,
            Op::Ret => 0x63,
            Op::RetUnit => 0x64,
            Op::Pop => 0x70,
            Op::Dup => 0x71,
        }
    }

    /// Operand-stack pops and pushes performed by this instruction.
    pub fn stack_io(&self) -> (u32, u32) {
        match self {
            Op::PushConst(_) | Op::PushTrue | Op::PushFalse | Op::PushUnit | Op::LoadLocal(_) => {
                (0, 1)
            }
            Op::StoreLocal(_) | Op::Pop | Op::JumpIfFalse(_) | Op::Ret => (1, 0),
            Op::IntNeg | Op::FloatNeg | Op::Not => (1, 1),
            Op::IntAdd
            | Op::IntSub
            | Op::IntMul
            | Op::IntDiv
            | Op::IntRem
            | Op::FloatAdd
            | Op::FloatSub
            | Op::FloatMul
            | Op::FloatDiv
            | Op::FloatRem
            | Op::IntEq
            | Op::IntNe
            | Op::IntLt
            | Op::IntLe
            | Op::IntGt
            | Op::IntGe
            | Op::FloatEq
            | Op::FloatNe
            | Op::FloatLt
            | Op::FloatLe
            | Op::FloatGt
            | Op::FloatGe
            | Op::BoolEq
            | Op::BoolNe
            | Op::StrEq
            | Op::StrNe
            | Op::BoolAnd
            | Op::BoolOr
            | Op::StrConcat => (2, 1),
            Op::Jump(_) | Op::RetUnit => (0, 0),
            Op::Dup => (1, 2),
            Op::Call(_, argc) => (u32::from(*argc), 1),
        }
    }

    /// Net effect on the operand-stack depth.
    pub fn stack_effect(&self) -> i32 {
        let (pops, pushes) = self.stack_io();
        pushes as i32 - pops as i32
    }
}
