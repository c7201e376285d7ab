use thiserror::Error;

use crate::module::{Module, Routine, TypeTag};
use crate::opcode::Op;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("routine `{routine}` has no code")]
    EmptyCode { routine: String },

    #[error("routine `{routine}`: branch target {target} out of bounds at instruction {at}")]
    BranchOutOfBounds {
        routine: String,
        at: usize,
        target: u32,
    },

    #[error("routine `{routine}`: constant index {index} out of bounds at instruction {at}")]
    ConstOutOfBounds {
        routine: String,
        at: usize,
        index: u32,
    },

    #[error("routine `{routine}`: local slot {slot} out of bounds at instruction {at}")]
    LocalOutOfBounds {
        routine: String,
        at: usize,
        slot: u32,
    },

    #[error("routine `{routine}`: call target {target} out of bounds at instruction {at}")]
    CallOutOfBounds {
        routine: String,
        at: usize,
        target: u32,
    },

    #[error(
        "routine `{routine}`: call at instruction {at} passes {found} arguments, \
         callee `{callee}` takes {expected}"
    )]
    CallArityMismatch {
        routine: String,
        at: usize,
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("routine `{routine}`: operand stack underflow at instruction {at}")]
    StackUnderflow { routine: String, at: usize },

    #[error(
        "routine `{routine}`: operand stack depth {depth} exceeds declared maximum \
         {max_stack} at instruction {at}"
    )]
    MaxStackExceeded {
        routine: String,
        at: usize,
        depth: u32,
        max_stack: u16,
    },

    #[error("routine `{routine}`: inconsistent stack depth at instruction {at} ({first} vs {second})")]
    InconsistentDepth {
        routine: String,
        at: usize,
        first: u32,
        second: u32,
    },

    #[error("routine `{routine}`: execution can fall off the end of the code")]
    FallsOffEnd { routine: String },

    #[error("routine `{routine}`: return instruction does not match return type at instruction {at}")]
    ReturnMismatch { routine: String, at: usize },
}

/// Re-check the invariants a loader relies on before accepting a module:
/// every branch lands on an instruction boundary within its routine, every
/// constant/local/call index is in bounds, call arity matches the callee,
/// and the declared `max_stack` is an upper bound on the operand-stack
/// depth of every reachable execution path.
pub fn verify(module: &Module) -> Result<(), VerifyError> {
    for routine in &module.routines {
        verify_routine(module, routine)?;
    }
    Ok(())
}

/// Abstract walk over one routine. Tracks the stack depth entering each
/// instruction; depths must agree wherever control paths join.
fn verify_routine(module: &Module, routine: &Routine) -> Result<(), VerifyError> {
    let code = &routine.code;
    if code.is_empty() {
        return Err(VerifyError::EmptyCode {
            routine: routine.name.clone(),
        });
    }

    let mut depths: Vec<Option<u32>> = vec![None; code.len()];
    let mut work: Vec<(usize, u32)> = vec![(0, 0)];

    while let Some((pc, depth)) = work.pop() {
        match depths[pc] {
            Some(seen) => {
                if seen != depth {
                    return Err(VerifyError::InconsistentDepth {
                        routine: routine.name.clone(),
                        at: pc,
                        first: seen,
                        second: depth,
                    });
                }
                continue;
            }
            None => depths[pc] = Some(depth),
        }

        let op = code[pc];
        check_operands(module, routine, pc, op)?;

        let (pops, pushes) = op.stack_io();
        if depth < pops {
            return Err(VerifyError::StackUnderflow {
                routine: routine.name.clone(),
                at: pc,
            });
        }
        let next_depth = depth - pops + pushes;
        if next_depth > u32::from(routine.max_stack) {
            return Err(VerifyError::MaxStackExceeded {
                routine: routine.name.clone(),
                at: pc,
                depth: next_depth,
                max_stack: routine.max_stack,
            });
        }

        let branch = |target: u32, work: &mut Vec<(usize, u32)>| {
            if target as usize >= code.len() {
                return Err(VerifyError::BranchOutOfBounds {
                    routine: routine.name.clone(),
                    at: pc,
                    target,
                });
            }
            work.push((target as usize, next_depth));
            Ok(())
        };
        let fall_through = |work: &mut Vec<(usize, u32)>| {
            if pc + 1 >= code.len() {
                return Err(VerifyError::FallsOffEnd {
                    routine: routine.name.clone(),
                });
            }
            work.push((pc + 1, next_depth));
            Ok(())
        };

        match op {
            Op::Jump(target) => branch(target, &mut work)?,
            Op::JumpIfFalse(target) => {
                branch(target, &mut work)?;
                fall_through(&mut work)?;
            }
            Op::Ret | Op::RetUnit => {}
            _ => fall_through(&mut work)?,
        }
    }

    Ok(())
}

fn check_operands(
    module: &Module,
    routine: &Routine,
    pc: usize,
    op: Op,
) -> Result<(), VerifyError> {
    match op {
        Op::PushConst(index) => {
            if index as usize >= module.constants.len() {
                return Err(VerifyError::ConstOutOfBounds {
                    routine: routine.name.clone(),
                    at: pc,
                    index,
                });
            }
        }
        Op::LoadLocal(slot) | Op::StoreLocal(slot) => {
            if slot >= u32::from(routine.local_slots) {
                return Err(VerifyError::LocalOutOfBounds {
                    routine: routine.name.clone(),
                    at: pc,
                    slot,
                });
            }
        }
        Op::Call(target, argc) => {
            let Some(callee) = module.routines.get(target as usize) else {
                return Err(VerifyError::CallOutOfBounds {
                    routine: routine.name.clone(),
                    at: pc,
                    target,
                });
            };
            if callee.params.len() != usize::from(argc) {
                return Err(VerifyError::CallArityMismatch {
                    routine: routine.name.clone(),
                    at: pc,
                    callee: callee.name.clone(),
                    expected: callee.params.len(),
                    found: usize::from(argc),
                });
            }
        }
        Op::Ret => {
            if routine.ret == TypeTag::Unit {
                return Err(VerifyError::ReturnMismatch {
                    routine: routine.name.clone(),
                    at: pc,
                });
            }
        }
        Op::RetUnit => {
            if routine.ret != TypeTag::Unit {
                return Err(VerifyError::ReturnMismatch {
                    routine: routine.name.clone(),
                    at: pc,
                });
            }
        }
        _ => {}
    }
    Ok(())
}
