// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tagged dynamic value model.
//!
//! [`Value`] is the currency of the VM: inputs, constants, stack slots, and
//! native-call arguments are all `Value`s. Exactly one variant is active at a
//! time. The buffer variant is move-only, which is why `Value` offers
//! [`Value::try_clone`] instead of implementing `Clone`.

use alloc::format;
use alloc::string::String;
use core::fmt;
use core::mem;

use crate::buffer::MoveBuffer;
use crate::error::{Error, ErrorKind, Result};

/// The kind of the active [`Value`] variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// No value (the default and moved-from state).
    Empty,
    /// Signed 64-bit integer.
    I64,
    /// 64-bit float. Carried by the value model; no opcode operates on it.
    F64,
    /// Borrowed string slice with static lifetime.
    BorrowedStr,
    /// Owned string.
    OwnedStr,
    /// Move-only byte buffer.
    Buffer,
}

impl Kind {
    /// Returns the kind name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::BorrowedStr => "borrowed_string",
            Self::OwnedStr => "owned_string",
            Self::Buffer => "buffer",
        }
    }
}

/// A tagged dynamic value.
#[derive(Debug, Default)]
pub enum Value {
    /// No value.
    #[default]
    Empty,
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Borrowed string slice. Restricted to `'static` data; hosts with
    /// dynamic strings use [`Value::OwnedStr`].
    BorrowedStr(&'static str),
    /// Owned string.
    OwnedStr(String),
    /// Move-only byte buffer.
    Buffer(MoveBuffer),
}

impl Value {
    /// Returns the kind of the active variant.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Empty => Kind::Empty,
            Self::I64(_) => Kind::I64,
            Self::F64(_) => Kind::F64,
            Self::BorrowedStr(_) => Kind::BorrowedStr,
            Self::OwnedStr(_) => Kind::OwnedStr,
            Self::Buffer(_) => Kind::Buffer,
        }
    }

    /// Returns `true` if no variant is active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` for the integer variant.
    #[must_use]
    pub const fn is_i64(&self) -> bool {
        matches!(self, Self::I64(_))
    }

    /// Returns `true` for the float variant.
    #[must_use]
    pub const fn is_f64(&self) -> bool {
        matches!(self, Self::F64(_))
    }

    /// Returns `true` for either string variant.
    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::BorrowedStr(_) | Self::OwnedStr(_))
    }

    /// Returns `true` for the buffer variant.
    #[must_use]
    pub const fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Returns the integer payload.
    ///
    /// # Panics
    ///
    /// Panics if the active variant is not [`Value::I64`]. Use
    /// [`Value::expect_i64`] for a recoverable check.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::I64(v) => *v,
            other => panic!("as_i64 on {} value", other.kind().name()),
        }
    }

    /// Returns the float payload.
    ///
    /// # Panics
    ///
    /// Panics if the active variant is not [`Value::F64`].
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::F64(v) => *v,
            other => panic!("as_f64 on {} value", other.kind().name()),
        }
    }

    /// Returns the string payload of either string variant.
    ///
    /// # Panics
    ///
    /// Panics if the active variant is not a string. Use
    /// [`Value::expect_string`] for a recoverable check.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BorrowedStr(s) => s,
            Self::OwnedStr(s) => s,
            other => panic!("as_str on {} value", other.kind().name()),
        }
    }

    /// Returns the buffer payload by reference.
    ///
    /// # Panics
    ///
    /// Panics if the active variant is not [`Value::Buffer`]. Use
    /// [`Value::take_buffer`] to move the buffer out.
    #[must_use]
    pub fn as_buffer(&self) -> &MoveBuffer {
        match self {
            Self::Buffer(b) => b,
            other => panic!("as_buffer on {} value", other.kind().name()),
        }
    }

    /// Returns the integer payload, or a `type_mismatch` error whose message
    /// embeds `context` and the observed kind.
    pub fn expect_i64(&self, context: &str) -> Result<i64> {
        match self {
            Self::I64(v) => Ok(*v),
            other => Err(Error::new(
                ErrorKind::TypeMismatch,
                format!("{context} expected i64 but got {}.", other.kind().name()),
            )),
        }
    }

    /// Returns the string payload of either string variant, or a
    /// `type_mismatch` error whose message embeds `context`.
    pub fn expect_string(&self, context: &str) -> Result<&str> {
        match self {
            Self::BorrowedStr(s) => Ok(s),
            Self::OwnedStr(s) => Ok(s),
            other => Err(Error::new(
                ErrorKind::TypeMismatch,
                format!("{context} expected string but got {}.", other.kind().name()),
            )),
        }
    }

    /// Moves the buffer out and resets this value to [`Value::Empty`].
    ///
    /// Fails with `invalid_buffer_access` if the active variant is not a
    /// buffer.
    pub fn take_buffer(&mut self) -> Result<MoveBuffer> {
        if !self.is_buffer() {
            return Err(Error::new(
                ErrorKind::InvalidBufferAccess,
                "Attempted to take MoveBuffer from non-buffer Value.",
            ));
        }

        let Self::Buffer(buffer) = mem::take(self) else {
            unreachable!()
        };
        Ok(buffer)
    }

    /// Clones this value.
    ///
    /// The buffer variant is move-only, so cloning a buffer value fails with
    /// `invalid_buffer_access`. All other variants clone cheaply or by
    /// copying their bytes.
    pub fn try_clone(&self) -> Result<Value> {
        match self {
            Self::Empty => Ok(Self::Empty),
            Self::I64(v) => Ok(Self::I64(*v)),
            Self::F64(v) => Ok(Self::F64(*v)),
            Self::BorrowedStr(s) => Ok(Self::BorrowedStr(s)),
            Self::OwnedStr(s) => Ok(Self::OwnedStr(s.clone())),
            Self::Buffer(_) => Err(Error::new(
                ErrorKind::InvalidBufferAccess,
                "Attempted to clone a move-only buffer Value.",
            )),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Self::BorrowedStr(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::OwnedStr(v)
    }
}

impl From<MoveBuffer> for Value {
    fn from(v: MoveBuffer) -> Self {
        Self::Buffer(v)
    }
}

/// String variants compare by contents; ownership is not part of equality.
/// This keeps codec round-trips (which always materialize owned strings)
/// equal to their sources.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            (a, b) if a.is_string() && b.is_string() => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::BorrowedStr(s) => write!(f, "{s:?}"),
            Self::OwnedStr(s) => write!(f, "{s:?}"),
            Self::Buffer(b) => write!(f, "buffer[{}]", b.len()),
        }
    }
}
