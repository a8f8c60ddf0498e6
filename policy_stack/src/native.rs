// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Native (host) function bindings.
//!
//! The registry is append-only: binding indices are stable for the lifetime
//! of a VM, and `call_native` operands refer to them. Two registration paths
//! exist:
//!
//! - [`Vm::bind_native`] takes a hand-written adapter over raw value slots;
//! - [`Vm::native`] returns a [`NativeBuilder`] that accepts a typed callable
//!   and synthesizes the adapter, inferring the arity from the callable's
//!   parameter list.
//!
//! Adapters receive `&mut Vm` so natives can use the VM's arena for
//! temporaries. Reentering `run` from inside an adapter is rejected by the
//! interpreter with `native_reentrancy`.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::mem;

use crate::buffer::MoveBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::value::Value;
use crate::vm::Vm;

/// A type-erased native adapter: uniform `(vm, args) -> Result<Value>`.
pub type NativeAdapter = Box<dyn FnMut(&mut Vm, &mut [Value]) -> Result<Value>>;

/// A registered native binding.
pub struct NativeBinding {
    name: String,
    arity: usize,
    adapter: Option<NativeAdapter>,
}

impl NativeBinding {
    /// Returns the binding name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stack values the binding consumes.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// Returns `true` if an adapter is installed.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.adapter.is_some()
    }
}

impl core::fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeBinding")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// The append-only native binding table of a VM.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    bindings: Vec<NativeBinding>,
}

impl NativeRegistry {
    /// Returns the number of registered bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if no bindings are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Returns the binding at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&NativeBinding> {
        self.bindings.get(index)
    }

    pub(crate) fn push(
        &mut self,
        name: String,
        arity: usize,
        adapter: Option<NativeAdapter>,
    ) -> usize {
        self.bindings.push(NativeBinding {
            name,
            arity,
            adapter,
        });
        self.bindings.len() - 1
    }

    /// Takes the adapter out of its slot for the duration of a call. The
    /// interpreter restores it afterwards; while it is out the slot reads as
    /// unbound.
    pub(crate) fn take_adapter(&mut self, index: usize) -> Option<NativeAdapter> {
        self.bindings.get_mut(index)?.adapter.take()
    }

    pub(crate) fn restore_adapter(&mut self, index: usize, adapter: NativeAdapter) {
        if let Some(binding) = self.bindings.get_mut(index) {
            binding.adapter = Some(adapter);
        }
    }
}

/// Typed builder for a native binding. Created by [`Vm::native`].
#[must_use = "the binding is registered by calling bind()"]
pub struct NativeBuilder<'vm> {
    vm: &'vm mut Vm,
    name: String,
    declared_arity: Option<usize>,
}

impl<'vm> NativeBuilder<'vm> {
    pub(crate) fn new(vm: &'vm mut Vm, name: String) -> Self {
        Self {
            vm,
            name,
            declared_arity: None,
        }
    }

    /// Declares an explicit arity.
    ///
    /// If the declared arity does not match the callable's parameter count,
    /// invoking the binding fails with `invalid_function_signature`.
    pub fn arity(mut self, expected_arity: usize) -> Self {
        self.declared_arity = Some(expected_arity);
        self
    }

    /// Registers `callable` and returns the binding index.
    ///
    /// The arity is inferred from the callable's parameters; a leading
    /// `&mut Vm` parameter is not counted.
    pub fn bind<Marker, F>(self, mut callable: F) -> usize
    where
        F: NativeCallable<Marker>,
    {
        let name = self.name.clone();
        let declared = self.declared_arity;
        let inferred = F::ARITY;
        let adapter: NativeAdapter = Box::new(move |vm, args| {
            if let Some(declared) = declared
                && declared != inferred
            {
                return Err(Error::new(
                    ErrorKind::InvalidFunctionSignature,
                    format!(
                        "native '{name}' declared arity {declared} but its callable takes {inferred} arguments."
                    ),
                ));
            }
            callable.call(vm, args, &name)
        });
        let arity = self.declared_arity.unwrap_or(inferred);
        self.vm.bind_native_adapter(self.name, arity, adapter)
    }
}

/// A parameter type the typed builder can decode from a stack slot.
///
/// Decoding may move the value out of its slot (buffers always do).
pub trait NativeArg: Sized {
    /// Kind name used in mismatch diagnostics.
    const EXPECTED: &'static str;

    /// Decodes the argument at `index` for native `name`.
    fn from_slot(slot: &mut Value, name: &str, index: usize) -> Result<Self>;
}

fn arg_mismatch(name: &str, index: usize, expected: &str, slot: &Value) -> Error {
    Error::new(
        ErrorKind::TypeMismatch,
        format!(
            "native '{name}' argument {index} expected {expected} but got {}.",
            slot.kind().name()
        ),
    )
}

impl NativeArg for i64 {
    const EXPECTED: &'static str = "i64";

    fn from_slot(slot: &mut Value, name: &str, index: usize) -> Result<Self> {
        match slot {
            Value::I64(v) => Ok(*v),
            other => Err(arg_mismatch(name, index, Self::EXPECTED, other)),
        }
    }
}

impl NativeArg for f64 {
    const EXPECTED: &'static str = "f64";

    fn from_slot(slot: &mut Value, name: &str, index: usize) -> Result<Self> {
        match slot {
            Value::F64(v) => Ok(*v),
            other => Err(arg_mismatch(name, index, Self::EXPECTED, other)),
        }
    }
}

impl NativeArg for String {
    const EXPECTED: &'static str = "string";

    fn from_slot(slot: &mut Value, name: &str, index: usize) -> Result<Self> {
        match slot {
            Value::BorrowedStr(s) => Ok(String::from(*s)),
            Value::OwnedStr(_) => {
                let Value::OwnedStr(s) = mem::take(slot) else {
                    unreachable!()
                };
                Ok(s)
            }
            other => Err(arg_mismatch(name, index, Self::EXPECTED, other)),
        }
    }
}

impl NativeArg for MoveBuffer {
    const EXPECTED: &'static str = "buffer";

    fn from_slot(slot: &mut Value, name: &str, index: usize) -> Result<Self> {
        if !slot.is_buffer() {
            return Err(arg_mismatch(name, index, Self::EXPECTED, slot));
        }
        slot.take_buffer()
    }
}

impl NativeArg for Value {
    const EXPECTED: &'static str = "value";

    fn from_slot(slot: &mut Value, _name: &str, _index: usize) -> Result<Self> {
        Ok(mem::take(slot))
    }
}

/// A return type the typed builder can push back onto the stack.
pub trait NativeReturn {
    /// Converts the host return into a stack value.
    fn into_value(self) -> Result<Value>;
}

impl NativeReturn for i64 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::I64(self))
    }
}

impl NativeReturn for f64 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::F64(self))
    }
}

impl NativeReturn for String {
    fn into_value(self) -> Result<Value> {
        Ok(Value::OwnedStr(self))
    }
}

impl NativeReturn for MoveBuffer {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Buffer(self))
    }
}

impl NativeReturn for Value {
    fn into_value(self) -> Result<Value> {
        Ok(self)
    }
}

impl NativeReturn for Result<Value> {
    fn into_value(self) -> Result<Value> {
        self
    }
}

/// A typed callable the builder can wrap into a [`NativeAdapter`].
///
/// Implemented for closures of zero to four [`NativeArg`] parameters, with or
/// without a leading `&mut Vm` parameter. The `Marker` parameter exists only
/// to keep the two families of impls apart during inference.
pub trait NativeCallable<Marker>: 'static {
    /// Parameter count, not counting a leading VM parameter.
    const ARITY: usize;

    /// Decodes `args` and invokes the callable.
    fn call(&mut self, vm: &mut Vm, args: &mut [Value], name: &str) -> Result<Value>;
}

macro_rules! impl_native_callable {
    ($count:expr $(, $arg:ident : $idx:expr)*) => {
        impl<F, R $(, $arg)*> NativeCallable<fn($($arg,)*) -> R> for F
        where
            F: FnMut($($arg),*) -> R + 'static,
            R: NativeReturn,
            $($arg: NativeArg,)*
        {
            const ARITY: usize = $count;

            #[allow(unused_variables, non_snake_case)]
            fn call(&mut self, vm: &mut Vm, args: &mut [Value], name: &str) -> Result<Value> {
                $(let $arg = <$arg as NativeArg>::from_slot(&mut args[$idx], name, $idx)?;)*
                (self)($($arg),*).into_value()
            }
        }

        impl<F, R $(, $arg)*> NativeCallable<fn(&mut Vm, $($arg,)*) -> R> for F
        where
            F: FnMut(&mut Vm, $($arg),*) -> R + 'static,
            R: NativeReturn,
            $($arg: NativeArg,)*
        {
            const ARITY: usize = $count;

            #[allow(unused_variables, non_snake_case)]
            fn call(&mut self, vm: &mut Vm, args: &mut [Value], name: &str) -> Result<Value> {
                $(let $arg = <$arg as NativeArg>::from_slot(&mut args[$idx], name, $idx)?;)*
                (self)(vm, $($arg),*).into_value()
            }
        }
    };
}

impl_native_callable!(0);
impl_native_callable!(1, A0: 0);
impl_native_callable!(2, A0: 0, A1: 1);
impl_native_callable!(3, A0: 0, A1: 1, A2: 2);
impl_native_callable!(4, A0: 0, A1: 1, A2: 2, A3: 3);
