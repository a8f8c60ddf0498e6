// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static program verification.
//!
//! The verifier proves stack discipline before any dynamic execution: a
//! single worklist pass of abstract interpretation assigns each reachable PC
//! a unique expected stack depth on entry. Two control-flow edges reaching
//! the same PC with different depths reject the program, as does any
//! instruction that would underflow its entry depth. Operand well-formedness
//! (constant, input, native, and function indices) is checked along the way.
//!
//! A successor PC equal to the code length is the implicit program end; all
//! edges reaching it must agree on depth. PCs strictly past the end are
//! invalid jump targets.
//!
//! Function bodies are not traversed from their entry PCs. The verifier
//! checks each descriptor's `entry` bound and `local_count >= arity`
//! invariant up front; inside frames the interpreter retains its dynamic
//! underflow and local-index checks.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, ErrorKind, Result};
use crate::native::NativeRegistry;
use crate::opcode::OpCode;
use crate::program::Program;

/// Verifies `program` against `available_inputs` input slots and the
/// VM's native registry.
pub fn verify_program(
    program: &Program,
    available_inputs: usize,
    natives: &NativeRegistry,
) -> Result<()> {
    if program.code.is_empty() {
        return Err(Error::new(
            ErrorKind::VerificationFailed,
            "Program has no instructions.",
        ));
    }

    for function in &program.functions {
        if function.entry as usize >= program.code.len() {
            return Err(Error::new(
                ErrorKind::InvalidFunctionIndex,
                "Function entry points outside bytecode.",
            ));
        }
        if function.local_count < function.arity {
            return Err(Error::new(
                ErrorKind::InvalidFunctionSignature,
                "Function local_count must be >= arity.",
            ));
        }
    }

    let mut state = DepthState {
        code_len: program.code.len(),
        depth_at_pc: vec![None; program.code.len()],
        depth_at_end: None,
        worklist: Vec::with_capacity(program.code.len()),
    };

    state.record_successor(0, 0)?;

    while let Some(pc) = state.worklist.pop() {
        let instruction = program.code[pc];
        let depth = state.depth_at_pc[pc].unwrap_or(0);

        let mut pops = 0_usize;
        let mut pushes = 0_usize;
        let mut explicit_target = None;
        let mut has_fallthrough = true;

        match instruction.opcode {
            OpCode::PushConstant => {
                if instruction.operand as usize >= program.constants.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidConstantIndex,
                        "push_constant operand out of range during verification.",
                    ));
                }
                pushes = 1;
            }
            OpCode::PushInput => {
                if instruction.operand as usize >= available_inputs {
                    return Err(Error::new(
                        ErrorKind::InvalidInputIndex,
                        "push_input operand out of range during verification.",
                    ));
                }
                pushes = 1;
            }
            OpCode::AddI64
            | OpCode::SubI64
            | OpCode::MulI64
            | OpCode::ModI64
            | OpCode::CmpEqI64
            | OpCode::CmpLtI64
            | OpCode::AndI64
            | OpCode::OrI64
            | OpCode::XorI64
            | OpCode::ShlI64
            | OpCode::ShrI64 => {
                pops = 2;
                pushes = 1;
            }
            OpCode::CallNative => {
                let Some(binding) = natives.get(instruction.operand as usize) else {
                    return Err(Error::new(
                        ErrorKind::InvalidNativeIndex,
                        "call_native operand out of range during verification.",
                    ));
                };
                if !binding.is_bound() {
                    return Err(Error::new(
                        ErrorKind::EmptyNativeBinding,
                        "call_native resolved to empty native binding during verification.",
                    ));
                }
                pops = binding.arity();
                pushes = 1;
            }
            OpCode::Jump => {
                explicit_target = Some(instruction.operand as usize);
                has_fallthrough = false;
            }
            OpCode::JumpIfTrue => {
                pops = 1;
                explicit_target = Some(instruction.operand as usize);
            }
            OpCode::Dup => {
                if depth == 0 {
                    return Err(Error::new(
                        ErrorKind::StackUnderflow,
                        "dup requires at least one value on stack.",
                    ));
                }
                pushes = 1;
            }
            OpCode::Pop => {
                pops = 1;
            }
            OpCode::Call => {
                let Some(function) = program.functions.get(instruction.operand as usize) else {
                    return Err(Error::new(
                        ErrorKind::InvalidFunctionIndex,
                        "call operand out of range during verification.",
                    ));
                };
                pops = function.arity as usize;
                pushes = 1;
            }
            OpCode::Ret => {
                pops = 1;
                has_fallthrough = false;
            }
            OpCode::LoadLocal => {
                pushes = 1;
            }
            OpCode::StoreLocal => {
                pops = 1;
            }
            OpCode::Halt => {
                has_fallthrough = false;
            }
        }

        if depth < pops {
            return Err(Error::new(
                ErrorKind::StackUnderflow,
                "Instruction would underflow stack during verification.",
            ));
        }
        let next_depth = depth - pops + pushes;

        if let Some(target) = explicit_target {
            state.record_successor(target, next_depth)?;
        }
        if has_fallthrough {
            state.record_successor(pc + 1, next_depth)?;
        }
    }

    Ok(())
}

struct DepthState {
    code_len: usize,
    depth_at_pc: Vec<Option<usize>>,
    depth_at_end: Option<usize>,
    worklist: Vec<usize>,
}

impl DepthState {
    /// Records `depth` as the entry depth of `pc`, enqueueing the PC on first
    /// visit and rejecting the program on a depth mismatch.
    fn record_successor(&mut self, pc: usize, depth: usize) -> Result<()> {
        if pc == self.code_len {
            return match self.depth_at_end {
                None => {
                    self.depth_at_end = Some(depth);
                    Ok(())
                }
                Some(known) if known == depth => Ok(()),
                Some(_) => Err(Error::new(
                    ErrorKind::VerificationFailed,
                    "Inconsistent stack depth at implicit program end.",
                )),
            };
        }

        if pc > self.code_len {
            return Err(Error::new(
                ErrorKind::InvalidJumpTarget,
                "Jump target points past end of bytecode.",
            ));
        }

        match self.depth_at_pc[pc] {
            None => {
                self.depth_at_pc[pc] = Some(depth);
                self.worklist.push(pc);
                Ok(())
            }
            Some(known) if known == depth => Ok(()),
            Some(_) => Err(Error::new(
                ErrorKind::VerificationFailed,
                "Inconsistent stack depth across control-flow merge.",
            )),
        }
    }
}
