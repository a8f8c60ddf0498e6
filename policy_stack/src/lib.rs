// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `policy_stack`: an embeddable stack-based bytecode VM for short
//! policy-style programs over tagged dynamic values.
//!
//! A host builds (or deserializes) a [`program::Program`], registers native
//! callbacks, pushes input values, and runs. [`vm::Vm::run`] verifies the
//! program once; [`vm::Vm::run_unchecked`] is the low-overhead path for
//! repeated runs of an already-verified program. The verifier proves stack
//! discipline statically, which is what lets the interpreter skip per-step
//! depth bookkeeping in its hot path.
//!
//! ## Example
//!
//! ```
//! extern crate alloc;
//!
//! use alloc::vec;
//!
//! use policy_stack::opcode::OpCode;
//! use policy_stack::program::{Instruction, Program};
//! use policy_stack::value::Value;
//! use policy_stack::vm::Vm;
//!
//! let mut program = Program::new();
//! let base = program.add_constant(Value::I64(40)) as u32;
//! let bump = program.add_constant(Value::I64(2)) as u32;
//! program.code = vec![
//!     Instruction::new(OpCode::PushConstant, base),
//!     Instruction::new(OpCode::PushConstant, bump),
//!     Instruction::new(OpCode::AddI64, 0),
//!     Instruction::new(OpCode::Halt, 0),
//! ];
//!
//! let mut vm = Vm::new();
//! let result = vm.run(&program)?;
//! assert_eq!(result, Value::I64(42));
//! # Ok::<(), policy_stack::error::Error>(())
//! ```

#![no_std]

extern crate alloc;

pub mod arena;
pub mod buffer;
pub mod codec;
pub mod error;
pub(crate) mod format;
pub mod native;
pub mod opcode;
pub mod profile;
pub mod program;
pub mod trace;
pub mod value;
pub mod verifier;
pub mod vm;
