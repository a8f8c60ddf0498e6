// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Opcode byte values for the bytecode format.
//!
//! The byte values are stable: they are part of the serialized container
//! format and must not be renumbered. The remaining `u8` space is reserved
//! for future opcodes; unknown bytes are rejected when bytecode is decoded.

/// An instruction opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Push a constant-pool value. Operand: constant index.
    PushConstant = 0,
    /// Move an input slot onto the stack, leaving the slot empty. Operand:
    /// input index.
    PushInput = 1,
    /// Pop two i64 values and push their wrapping sum.
    AddI64 = 2,
    /// Pop two i64 values and push their wrapping difference.
    SubI64 = 3,
    /// Pop two i64 values and push their wrapping product.
    MulI64 = 4,
    /// Pop two i64 values and push the remainder. Zero divisor is an error.
    ModI64 = 5,
    /// Pop two i64 values and push 1 if equal, else 0.
    CmpEqI64 = 6,
    /// Pop two i64 values and push 1 if lhs < rhs, else 0.
    CmpLtI64 = 7,
    /// Pop two i64 values and push their bitwise AND.
    AndI64 = 8,
    /// Pop two i64 values and push their bitwise OR.
    OrI64 = 9,
    /// Pop two i64 values and push their bitwise XOR.
    XorI64 = 10,
    /// Pop shift amount and value, push the left shift. Amount must be in
    /// `[0, 63]`.
    ShlI64 = 11,
    /// Pop shift amount and value, push the arithmetic right shift. Amount
    /// must be in `[0, 63]`.
    ShrI64 = 12,
    /// Unconditional jump. Operand: absolute target PC.
    Jump = 13,
    /// Pop an i64; jump to the operand PC if it is non-zero.
    JumpIfTrue = 14,
    /// Duplicate the top of stack.
    Dup = 15,
    /// Discard the top of stack.
    Pop = 16,
    /// Call a function. Operand: function index.
    Call = 17,
    /// Pop the return value and return to the caller (or finish the run).
    Ret = 18,
    /// Push a copy of a local slot. Operand: local index.
    LoadLocal = 19,
    /// Pop into a local slot. Operand: local index.
    StoreLocal = 20,
    /// Invoke a native binding. Operand: binding index.
    CallNative = 21,
    /// Stop execution and return the top of stack (empty if none).
    Halt = 22,
}

/// Number of defined opcodes; profile counters are sized by this.
pub const OPCODE_COUNT: usize = 23;

impl OpCode {
    /// Returns the opcode byte value.
    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Parses an opcode from its byte value.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::PushConstant,
            1 => Self::PushInput,
            2 => Self::AddI64,
            3 => Self::SubI64,
            4 => Self::MulI64,
            5 => Self::ModI64,
            6 => Self::CmpEqI64,
            7 => Self::CmpLtI64,
            8 => Self::AndI64,
            9 => Self::OrI64,
            10 => Self::XorI64,
            11 => Self::ShlI64,
            12 => Self::ShrI64,
            13 => Self::Jump,
            14 => Self::JumpIfTrue,
            15 => Self::Dup,
            16 => Self::Pop,
            17 => Self::Call,
            18 => Self::Ret,
            19 => Self::LoadLocal,
            20 => Self::StoreLocal,
            21 => Self::CallNative,
            22 => Self::Halt,
            _ => return None,
        })
    }

    /// Returns the opcode's mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PushConstant => "push_constant",
            Self::PushInput => "push_input",
            Self::AddI64 => "add_i64",
            Self::SubI64 => "sub_i64",
            Self::MulI64 => "mul_i64",
            Self::ModI64 => "mod_i64",
            Self::CmpEqI64 => "cmp_eq_i64",
            Self::CmpLtI64 => "cmp_lt_i64",
            Self::AndI64 => "and_i64",
            Self::OrI64 => "or_i64",
            Self::XorI64 => "xor_i64",
            Self::ShlI64 => "shl_i64",
            Self::ShrI64 => "shr_i64",
            Self::Jump => "jump",
            Self::JumpIfTrue => "jump_if_true",
            Self::Dup => "dup",
            Self::Pop => "pop",
            Self::Call => "call",
            Self::Ret => "ret",
            Self::LoadLocal => "load_local",
            Self::StoreLocal => "store_local",
            Self::CallNative => "call_native",
            Self::Halt => "halt",
        }
    }

    /// Returns `true` for the binary i64 opcodes eligible for constant-push
    /// fusion.
    #[must_use]
    pub const fn is_i64_binary(self) -> bool {
        matches!(
            self,
            Self::AddI64
                | Self::SubI64
                | Self::MulI64
                | Self::ModI64
                | Self::CmpEqI64
                | Self::CmpLtI64
                | Self::AndI64
                | Self::OrI64
                | Self::XorI64
                | Self::ShlI64
                | Self::ShrI64
        )
    }
}
