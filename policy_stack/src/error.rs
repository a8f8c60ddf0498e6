// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for `policy_stack`.
//!
//! Every fallible operation in the crate returns [`Error`], which pairs a
//! stable [`ErrorKind`] tag with a short human-readable message. Panics are
//! reserved for contract violations (see the raw `as_*` accessors on
//! [`crate::value::Value`]).

use alloc::string::String;
use core::fmt;

/// Stable error kind tags.
///
/// The tag names returned by [`ErrorKind::name`] are part of the public
/// contract and must not change across releases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A value had the wrong kind for an operation.
    TypeMismatch,
    /// A buffer was taken from (or cloned out of) a non-buffer value, or a
    /// buffer value was cloned.
    InvalidBufferAccess,
    /// A `push_constant` operand was out of range.
    InvalidConstantIndex,
    /// A `push_input` operand was out of range.
    InvalidInputIndex,
    /// The value stack underflowed.
    StackUnderflow,
    /// A `call_native` operand was out of range.
    InvalidNativeIndex,
    /// A `call_native` operand resolved to a declared-but-unbound native.
    EmptyNativeBinding,
    /// The stack held fewer values than a native binding's arity.
    InsufficientNativeArguments,
    /// An instruction byte did not map to any opcode.
    UnknownOpcode,
    /// `mod_i64` with a zero divisor.
    DivisionByZero,
    /// A jump target pointed past the end of the bytecode.
    InvalidJumpTarget,
    /// The verifier rejected the program (inconsistent stack depths).
    VerificationFailed,
    /// A `call` operand or function entry was out of range.
    InvalidFunctionIndex,
    /// A local slot index was out of range for the active frame.
    InvalidLocalIndex,
    /// `load_local`/`store_local` without an active call frame.
    MissingCallFrame,
    /// The configured step budget was exhausted.
    StepBudgetExceeded,
    /// A function or native binding signature was inconsistent.
    InvalidFunctionSignature,
    /// A shift amount was outside `[0, 63]`.
    InvalidShiftAmount,
    /// The bytecode container magic did not match.
    InvalidBytecodeMagic,
    /// The bytecode container version is not supported.
    UnsupportedBytecodeVersion,
    /// The bytecode container was truncated, oversized, or otherwise invalid.
    MalformedBytecode,
    /// Reserved: checked arithmetic overflow. Current opcodes wrap instead.
    ArithmeticOverflow,
    /// `run` was reentered from inside a native binding.
    NativeReentrancy,
    /// A program exceeded the bytecode container size limits.
    BytecodeLimitExceeded,
}

impl ErrorKind {
    /// Returns the stable snake_case tag for this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TypeMismatch => "type_mismatch",
            Self::InvalidBufferAccess => "invalid_buffer_access",
            Self::InvalidConstantIndex => "invalid_constant_index",
            Self::InvalidInputIndex => "invalid_input_index",
            Self::StackUnderflow => "stack_underflow",
            Self::InvalidNativeIndex => "invalid_native_index",
            Self::EmptyNativeBinding => "empty_native_binding",
            Self::InsufficientNativeArguments => "insufficient_native_arguments",
            Self::UnknownOpcode => "unknown_opcode",
            Self::DivisionByZero => "division_by_zero",
            Self::InvalidJumpTarget => "invalid_jump_target",
            Self::VerificationFailed => "verification_failed",
            Self::InvalidFunctionIndex => "invalid_function_index",
            Self::InvalidLocalIndex => "invalid_local_index",
            Self::MissingCallFrame => "missing_call_frame",
            Self::StepBudgetExceeded => "step_budget_exceeded",
            Self::InvalidFunctionSignature => "invalid_function_signature",
            Self::InvalidShiftAmount => "invalid_shift_amount",
            Self::InvalidBytecodeMagic => "invalid_bytecode_magic",
            Self::UnsupportedBytecodeVersion => "unsupported_bytecode_version",
            Self::MalformedBytecode => "malformed_bytecode",
            Self::ArithmeticOverflow => "arithmetic_overflow",
            Self::NativeReentrancy => "native_reentrancy",
            Self::BytecodeLimitExceeded => "bytecode_limit_exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the VM, verifier, codec, or value layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error from a kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the stable error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl core::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
