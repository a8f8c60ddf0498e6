// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interpreter.
//!
//! [`Vm::run`] verifies a program once and then delegates to
//! [`Vm::run_unchecked`], the hot path, which trusts the verifier's stack
//! discipline proof. Data-dependent checks that cannot be resolved
//! statically (division and shift domains, type errors at value joins,
//! runtime index state) remain in the hot path.
//!
//! Each run clears the value stack and call frames at entry, so a failed run
//! leaves no residue for the next one. The arena is not auto-reset; embedders
//! that allocate through it around a run should hold an arena mark.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use crate::arena::Arena;
use crate::error::{Error, ErrorKind, Result};
use crate::native::{NativeAdapter, NativeBuilder, NativeRegistry};
use crate::opcode::OpCode;
use crate::profile::{Clock, ProfileStats};
use crate::program::{Instruction, Program};
use crate::trace::{TraceEvent, TraceSink};
use crate::value::Value;
use crate::verifier::verify_program;

/// Construction parameters for a [`Vm`].
#[derive(Copy, Clone, Debug)]
pub struct VmOptions {
    /// Initial capacity of the value stack.
    pub stack_reserve: usize,
    /// Bytes pre-allocated for the arena (zero for lazy allocation).
    pub arena_bytes: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            stack_reserve: 64,
            arena_bytes: 1024,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct CallFrame {
    return_pc: usize,
    base: usize,
    local_count: usize,
}

/// How an instruction hands control back to the run loop.
enum Flow {
    Advance,
    Jump(usize),
    Halt(Value),
}

/// A stack-based bytecode interpreter over tagged values.
///
/// A `Vm` owns its value stack, call frames, input slots, native registry,
/// arena, optional trace sink, and profile counters. It is single-threaded;
/// embedders that want parallelism instantiate independent VMs.
pub struct Vm {
    stack: Vec<Value>,
    call_frames: Vec<CallFrame>,
    inputs: Vec<Value>,
    natives: NativeRegistry,
    arena: Arena,
    step_budget: usize,
    trace_sink: Option<TraceSink>,
    profiling_enabled: bool,
    clock: Option<Box<dyn Clock>>,
    profile: ProfileStats,
    in_run: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("stack_depth", &self.stack.len())
            .field("call_depth", &self.call_frames.len())
            .field("inputs", &self.inputs.len())
            .field("natives", &self.natives.len())
            .field("step_budget", &self.step_budget)
            .finish_non_exhaustive()
    }
}

impl Vm {
    /// Creates a VM with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Creates a VM with explicit stack and arena sizing.
    #[must_use]
    pub fn with_options(options: VmOptions) -> Self {
        Self {
            stack: Vec::with_capacity(options.stack_reserve),
            call_frames: Vec::with_capacity(16),
            inputs: Vec::new(),
            natives: NativeRegistry::default(),
            arena: Arena::new(options.arena_bytes),
            step_budget: 0,
            trace_sink: None,
            profiling_enabled: false,
            clock: None,
            profile: ProfileStats::default(),
            in_run: false,
        }
    }

    /// Registers a hand-written native adapter and returns its binding
    /// index. The registry is append-only; indices are stable.
    pub fn bind_native<F>(&mut self, name: impl Into<String>, arity: usize, adapter: F) -> usize
    where
        F: FnMut(&mut Vm, &mut [Value]) -> Result<Value> + 'static,
    {
        self.bind_native_adapter(name.into(), arity, Box::new(adapter))
    }

    pub(crate) fn bind_native_adapter(
        &mut self,
        name: String,
        arity: usize,
        adapter: NativeAdapter,
    ) -> usize {
        self.natives.push(name, arity, Some(adapter))
    }

    /// Reserves a binding index with no adapter. Invoking it fails with
    /// `empty_native_binding` until the host binds one at a later index and
    /// rebuilds the program, so this is mainly useful for pinning an index
    /// layout up front.
    pub fn declare_native(&mut self, name: impl Into<String>, arity: usize) -> usize {
        self.natives.push(name.into(), arity, None)
    }

    /// Starts a typed binding registration. See [`NativeBuilder`].
    pub fn native(&mut self, name: impl Into<String>) -> NativeBuilder<'_> {
        NativeBuilder::new(self, name.into())
    }

    /// Returns the native registry.
    #[must_use]
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Appends an input value and returns its slot index.
    ///
    /// `push_input` opcodes move values out of their slots; a consumed slot
    /// reads as empty.
    pub fn push_input(&mut self, value: Value) -> usize {
        self.inputs.push(value);
        self.inputs.len() - 1
    }

    /// Removes all input slots.
    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    /// Clears the value stack.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Returns the value stack, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Returns the VM's arena.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Returns the VM's arena mutably (for [`Arena::reset`]).
    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Bounds the number of steps per run; `0` disables the bound.
    pub fn set_step_budget(&mut self, max_steps: usize) {
        self.step_budget = max_steps;
    }

    /// Removes the step bound.
    pub fn clear_step_budget(&mut self) {
        self.step_budget = 0;
    }

    /// Installs the trace sink, dropping any previous one. The sink is
    /// invoked before every dispatched instruction.
    pub fn set_trace_sink<F>(&mut self, trace_sink: F)
    where
        F: FnMut(&TraceEvent) + 'static,
    {
        self.trace_sink = Some(Box::new(trace_sink));
    }

    /// Drops the trace sink.
    pub fn clear_trace_sink(&mut self) {
        self.trace_sink = None;
    }

    /// Enables or disables profiling. Off by default; enabling it adds
    /// observable overhead.
    pub fn set_profiling_enabled(&mut self, enabled: bool) {
        self.profiling_enabled = enabled;
    }

    /// Returns whether profiling is enabled.
    #[must_use]
    pub fn profiling_enabled(&self) -> bool {
        self.profiling_enabled
    }

    /// Installs the clock used for profiling durations. Without a clock,
    /// profiling records counts only.
    pub fn set_clock(&mut self, clock: impl Clock + 'static) {
        self.clock = Some(Box::new(clock));
    }

    /// Removes the profiling clock.
    pub fn clear_clock(&mut self) {
        self.clock = None;
    }

    /// Zeros the profile counters.
    pub fn reset_profile(&mut self) {
        self.profile = ProfileStats::default();
    }

    /// Returns the profile counters.
    #[must_use]
    pub fn profile(&self) -> &ProfileStats {
        &self.profile
    }

    /// Statically verifies `program` against `available_inputs` input slots
    /// and this VM's native registry.
    pub fn verify(&self, program: &Program, available_inputs: usize) -> Result<()> {
        verify_program(program, available_inputs, &self.natives)
    }

    /// Verifies and executes `program`, returning its result value.
    pub fn run(&mut self, program: &Program) -> Result<Value> {
        self.verify(program, self.inputs.len())?;
        self.run_unchecked(program)
    }

    /// Executes `program` without re-verifying it.
    ///
    /// This is the hot path for programs the embedder has verified once and
    /// runs repeatedly. Running an unverified program is safe in the memory
    /// sense but may fail with any runtime error the verifier would have
    /// reported statically.
    pub fn run_unchecked(&mut self, program: &Program) -> Result<Value> {
        if self.in_run {
            return Err(Error::new(
                ErrorKind::NativeReentrancy,
                "run reentered while the VM is already executing.",
            ));
        }

        self.in_run = true;
        let run_started = if self.profiling_enabled {
            self.clock_now()
        } else {
            None
        };

        let result = self.run_loop(program);

        if self.profiling_enabled {
            self.profile.runs += 1;
            if let (Some(started), Some(finished)) = (run_started, self.clock_now()) {
                self.profile.total_run_nanoseconds += finished.saturating_sub(started);
            }
        }
        self.in_run = false;
        result
    }

    fn clock_now(&self) -> Option<u64> {
        self.clock.as_ref().map(|clock| clock.now_nanos())
    }

    fn run_loop(&mut self, program: &Program) -> Result<Value> {
        self.stack.clear();
        self.call_frames.clear();
        let mut executed_steps = 0_usize;
        let mut pc = 0_usize;

        while pc < program.code.len() {
            if self.step_budget != 0 && executed_steps >= self.step_budget {
                return Err(Error::new(
                    ErrorKind::StepBudgetExceeded,
                    "VM step budget exhausted before termination.",
                ));
            }
            executed_steps += 1;

            let instruction = program.code[pc];
            let opcode_index = instruction.opcode as usize;

            let step_started = if self.profiling_enabled {
                self.profile.executed_steps += 1;
                self.profile.opcode_counts[opcode_index] += 1;
                self.clock_now()
            } else {
                None
            };

            if self.trace_sink.is_some() {
                let event = TraceEvent {
                    pc,
                    opcode: instruction.opcode,
                    stack_size: self.stack.len(),
                    call_depth: self.call_frames.len(),
                };
                if let Some(sink) = self.trace_sink.as_mut() {
                    sink(&event);
                }
            }

            let flow = self.dispatch(program, pc, instruction);

            if let Some(started) = step_started
                && let Some(finished) = self.clock_now()
            {
                self.profile.opcode_nanoseconds[opcode_index] +=
                    finished.saturating_sub(started);
            }

            match flow? {
                Flow::Advance => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Halt(value) => return Ok(value),
            }
        }

        // Fell off the end of the code: implicit halt.
        Ok(self.stack.pop().unwrap_or_default())
    }

    fn dispatch(
        &mut self,
        program: &Program,
        pc: usize,
        instruction: Instruction,
    ) -> Result<Flow> {
        match instruction.opcode {
            OpCode::PushConstant => self.execute_push_constant(program, pc, instruction.operand),
            OpCode::PushInput => {
                let index = instruction.operand as usize;
                if index >= self.inputs.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidInputIndex,
                        "push_input operand out of range.",
                    ));
                }
                let value = mem::take(&mut self.inputs[index]);
                self.stack.push(value);
                Ok(Flow::Advance)
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
                let value = self.execute_i64_binary(instruction.opcode)?;
                self.stack.push(value);
                Ok(Flow::Advance)
            }
            OpCode::Jump => {
                let target = instruction.operand as usize;
                if target > program.code.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidJumpTarget,
                        "jump target out of range.",
                    ));
                }
                Ok(Flow::Jump(target))
            }
            OpCode::JumpIfTrue => {
                let target = instruction.operand as usize;
                if target > program.code.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidJumpTarget,
                        "jump_if_true target out of range.",
                    ));
                }
                let condition = self.pop_value()?.expect_i64("jump_if_true")?;
                if condition != 0 {
                    Ok(Flow::Jump(target))
                } else {
                    Ok(Flow::Advance)
                }
            }
            OpCode::Dup => {
                let Some(top) = self.stack.last() else {
                    return Err(Error::new(
                        ErrorKind::StackUnderflow,
                        "dup requires non-empty stack.",
                    ));
                };
                let copy = top.try_clone()?;
                self.stack.push(copy);
                Ok(Flow::Advance)
            }
            OpCode::Pop => {
                self.pop_value()?;
                Ok(Flow::Advance)
            }
            OpCode::Call => self.execute_call(program, pc, instruction.operand),
            OpCode::Ret => {
                let return_value = self.pop_value()?;
                let Some(frame) = self.call_frames.pop() else {
                    return Ok(Flow::Halt(return_value));
                };
                if frame.base > self.stack.len() {
                    return Err(Error::new(
                        ErrorKind::MissingCallFrame,
                        "Corrupted call frame base exceeds stack size.",
                    ));
                }
                self.stack.truncate(frame.base);
                self.stack.push(return_value);
                Ok(Flow::Jump(frame.return_pc))
            }
            OpCode::LoadLocal => {
                let stack_index = self.local_stack_index(instruction.operand, "load_local")?;
                if stack_index >= self.stack.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidLocalIndex,
                        "load_local resolved stack index out of range.",
                    ));
                }
                let copy = self.stack[stack_index].try_clone()?;
                self.stack.push(copy);
                Ok(Flow::Advance)
            }
            OpCode::StoreLocal => {
                let stack_index = self.local_stack_index(instruction.operand, "store_local")?;
                let value = self.pop_value()?;
                if stack_index >= self.stack.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidLocalIndex,
                        "store_local resolved stack index out of range.",
                    ));
                }
                self.stack[stack_index] = value;
                Ok(Flow::Advance)
            }
            OpCode::CallNative => {
                let value = self.execute_call_native(instruction.operand as usize)?;
                self.stack.push(value);
                Ok(Flow::Advance)
            }
            OpCode::Halt => Ok(Flow::Halt(self.stack.pop().unwrap_or_default())),
        }
    }

    /// `push_constant`, including the peephole fusion: an i64 constant
    /// followed by an i64 binary opcode updates the stack top in place and
    /// skips both instructions.
    fn execute_push_constant(
        &mut self,
        program: &Program,
        pc: usize,
        operand: u32,
    ) -> Result<Flow> {
        let Some(constant) = program.constants.get(operand as usize) else {
            return Err(Error::new(
                ErrorKind::InvalidConstantIndex,
                "push_constant operand out of range.",
            ));
        };

        if let Value::I64(rhs) = constant
            && pc + 1 < program.code.len()
            && program.code[pc + 1].opcode.is_i64_binary()
            && let Some(top) = self.stack.last_mut()
        {
            let rhs = *rhs;
            let lhs = top.expect_i64("fused_i64 lhs")?;
            let fused = apply_i64_binary(program.code[pc + 1].opcode, lhs, rhs)?;
            *top = Value::I64(fused);
            return Ok(Flow::Jump(pc + 2));
        }

        let value = constant.try_clone()?;
        self.stack.push(value);
        Ok(Flow::Advance)
    }

    fn execute_i64_binary(&mut self, opcode: OpCode) -> Result<Value> {
        let rhs = self.pop_value()?;
        let lhs = self.pop_value()?;
        let (lhs_context, rhs_context) = i64_binary_contexts(opcode);
        let lhs = lhs.expect_i64(lhs_context)?;
        let rhs = rhs.expect_i64(rhs_context)?;
        apply_i64_binary(opcode, lhs, rhs).map(Value::I64)
    }

    fn execute_call(&mut self, program: &Program, pc: usize, operand: u32) -> Result<Flow> {
        let Some(function) = program.functions.get(operand as usize).copied() else {
            return Err(Error::new(
                ErrorKind::InvalidFunctionIndex,
                "call operand out of range.",
            ));
        };

        if function.local_count < function.arity {
            return Err(Error::new(
                ErrorKind::InvalidFunctionSignature,
                "Function local_count must be >= arity.",
            ));
        }
        if function.entry as usize >= program.code.len() {
            return Err(Error::new(
                ErrorKind::InvalidFunctionIndex,
                "Function entry points outside bytecode.",
            ));
        }

        let arity = function.arity as usize;
        if self.stack.len() < arity {
            return Err(Error::new(
                ErrorKind::StackUnderflow,
                "call does not have enough stack arguments.",
            ));
        }

        let base = self.stack.len() - arity;
        self.stack
            .resize_with(base + function.local_count as usize, Value::default);
        self.call_frames.push(CallFrame {
            return_pc: pc + 1,
            base,
            local_count: function.local_count as usize,
        });
        Ok(Flow::Jump(function.entry as usize))
    }

    fn execute_call_native(&mut self, index: usize) -> Result<Value> {
        let Some(binding) = self.natives.get(index) else {
            return Err(Error::new(
                ErrorKind::InvalidNativeIndex,
                "call_native operand out of range.",
            ));
        };
        let arity = binding.arity();
        if !binding.is_bound() {
            return Err(Error::new(
                ErrorKind::EmptyNativeBinding,
                "Native function binding is empty.",
            ));
        }
        if self.stack.len() < arity {
            return Err(Error::new(
                ErrorKind::InsufficientNativeArguments,
                "call_native does not have enough stack arguments.",
            ));
        }

        let args_offset = self.stack.len() - arity;
        let mut args: Vec<Value> = self.stack.drain(args_offset..).collect();

        // The adapter leaves its slot for the duration of the call so it can
        // receive the VM mutably; the slot reads as unbound meanwhile.
        let Some(mut adapter) = self.natives.take_adapter(index) else {
            return Err(Error::new(
                ErrorKind::EmptyNativeBinding,
                "Native function binding is empty.",
            ));
        };
        let result = adapter(self, &mut args);
        self.natives.restore_adapter(index, adapter);
        result
    }

    fn local_stack_index(&self, operand: u32, context: &str) -> Result<usize> {
        let Some(frame) = self.call_frames.last() else {
            return Err(Error::new(
                ErrorKind::MissingCallFrame,
                alloc::format!("{context} requires an active call frame."),
            ));
        };
        let local_index = operand as usize;
        if local_index >= frame.local_count {
            return Err(Error::new(
                ErrorKind::InvalidLocalIndex,
                alloc::format!("{context} operand out of range."),
            ));
        }
        Ok(frame.base + local_index)
    }

    fn pop_value(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| {
            Error::new(ErrorKind::StackUnderflow, "VM stack underflow.")
        })
    }
}

fn apply_i64_binary(opcode: OpCode, lhs: i64, rhs: i64) -> Result<i64> {
    match opcode {
        OpCode::AddI64 => Ok(lhs.wrapping_add(rhs)),
        OpCode::SubI64 => Ok(lhs.wrapping_sub(rhs)),
        OpCode::MulI64 => Ok(lhs.wrapping_mul(rhs)),
        OpCode::ModI64 => {
            if rhs == 0 {
                return Err(Error::new(
                    ErrorKind::DivisionByZero,
                    "mod_i64 divisor cannot be zero.",
                ));
            }
            Ok(lhs.wrapping_rem(rhs))
        }
        OpCode::CmpEqI64 => Ok(i64::from(lhs == rhs)),
        OpCode::CmpLtI64 => Ok(i64::from(lhs < rhs)),
        OpCode::AndI64 => Ok(lhs & rhs),
        OpCode::OrI64 => Ok(lhs | rhs),
        OpCode::XorI64 => Ok(lhs ^ rhs),
        OpCode::ShlI64 => {
            check_shift_amount(rhs, "shl_i64")?;
            Ok(lhs << rhs)
        }
        OpCode::ShrI64 => {
            check_shift_amount(rhs, "shr_i64")?;
            Ok(lhs >> rhs)
        }
        _ => unreachable!("caller guarantees an i64 binary opcode"),
    }
}

fn check_shift_amount(amount: i64, opcode_name: &str) -> Result<()> {
    if !(0..=63).contains(&amount) {
        return Err(Error::new(
            ErrorKind::InvalidShiftAmount,
            alloc::format!("{opcode_name} shift amount must be in [0, 63]."),
        ));
    }
    Ok(())
}

const fn i64_binary_contexts(opcode: OpCode) -> (&'static str, &'static str) {
    match opcode {
        OpCode::AddI64 => ("add_i64 lhs", "add_i64 rhs"),
        OpCode::SubI64 => ("sub_i64 lhs", "sub_i64 rhs"),
        OpCode::MulI64 => ("mul_i64 lhs", "mul_i64 rhs"),
        OpCode::ModI64 => ("mod_i64 lhs", "mod_i64 rhs"),
        OpCode::CmpEqI64 => ("cmp_eq_i64 lhs", "cmp_eq_i64 rhs"),
        OpCode::CmpLtI64 => ("cmp_lt_i64 lhs", "cmp_lt_i64 rhs"),
        OpCode::AndI64 => ("and_i64 lhs", "and_i64 rhs"),
        OpCode::OrI64 => ("or_i64 lhs", "or_i64 rhs"),
        OpCode::XorI64 => ("xor_i64 lhs", "xor_i64 rhs"),
        OpCode::ShlI64 => ("shl_i64 lhs", "shl_i64 rhs"),
        OpCode::ShrI64 => ("shr_i64 lhs", "shr_i64 rhs"),
        _ => ("i64 binary lhs", "i64 binary rhs"),
    }
}
