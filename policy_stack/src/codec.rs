// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bit-exact binary serialization of [`Program`]s.
//!
//! Container layout (all integers little-endian, packed):
//!
//! ```text
//! header:      magic u32, version u16, reserved u16,
//!              instruction_count u32, constant_count u32, function_count u32
//! instruction: opcode u8, operand u32
//! constant:    tag u8, payload (i64/f64 fixed width; string/buffer as
//!              u32 length + bytes; empty has no payload)
//! function:    entry u32, arity u32, local_count u32
//! ```
//!
//! Decoding is strict: the magic and version must match, every table must be
//! complete, unknown opcode bytes and constant tags are rejected, and
//! trailing bytes are an error. String constants always decode to owned
//! strings regardless of how they were represented before serialization.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::buffer::MoveBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::format::{Reader, Writer};
use crate::opcode::OpCode;
use crate::program::{Function, Instruction, Program};
use crate::value::Value;

/// Magic number identifying a serialized program.
pub const BYTECODE_MAGIC: u32 = u32::from_le_bytes(*b"PSB1");

/// Container format version accepted by this crate.
pub const BYTECODE_VERSION: u16 = 1;

/// Constant-pool payload tags. Stable, like the opcode bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum ConstantTag {
    Empty = 0,
    I64 = 1,
    F64 = 2,
    Str = 3,
    Buffer = 4,
}

fn truncated(what: &str) -> Error {
    Error::new(ErrorKind::MalformedBytecode, format!("{what} is truncated."))
}

/// Serializes `program` into a fresh [`MoveBuffer`].
///
/// Fails with `bytecode_limit_exceeded` if any table or payload exceeds the
/// `u32` limits of the container format.
pub fn serialize_program(program: &Program) -> Result<MoveBuffer> {
    let limit = u32::MAX as usize;
    if program.code.len() > limit
        || program.constants.len() > limit
        || program.functions.len() > limit
    {
        return Err(Error::new(
            ErrorKind::BytecodeLimitExceeded,
            "Program exceeds bytecode format size limits.",
        ));
    }

    let mut writer = Writer::new();
    writer.write_u32(BYTECODE_MAGIC);
    writer.write_u16(BYTECODE_VERSION);
    writer.write_u16(0);
    writer.write_u32(program.code.len() as u32);
    writer.write_u32(program.constants.len() as u32);
    writer.write_u32(program.functions.len() as u32);

    for instruction in &program.code {
        writer.write_u8(instruction.opcode.byte());
        writer.write_u32(instruction.operand);
    }

    for constant in &program.constants {
        write_constant(&mut writer, constant)?;
    }

    for function in &program.functions {
        writer.write_u32(function.entry);
        writer.write_u32(function.arity);
        writer.write_u32(function.local_count);
    }

    Ok(writer.finish())
}

fn write_constant(writer: &mut Writer, constant: &Value) -> Result<()> {
    match constant {
        Value::Empty => writer.write_u8(ConstantTag::Empty as u8),
        Value::I64(v) => {
            writer.write_u8(ConstantTag::I64 as u8);
            writer.write_i64(*v);
        }
        Value::F64(v) => {
            writer.write_u8(ConstantTag::F64 as u8);
            writer.write_f64(*v);
        }
        Value::BorrowedStr(_) | Value::OwnedStr(_) => {
            let text = constant.expect_string("serialize_program")?;
            if text.len() > u32::MAX as usize {
                return Err(Error::new(
                    ErrorKind::BytecodeLimitExceeded,
                    "String constant exceeds bytecode format size limits.",
                ));
            }
            writer.write_u8(ConstantTag::Str as u8);
            writer.write_u32(text.len() as u32);
            writer.write_bytes(text.as_bytes());
        }
        Value::Buffer(buffer) => {
            if buffer.len() > u32::MAX as usize {
                return Err(Error::new(
                    ErrorKind::BytecodeLimitExceeded,
                    "Buffer constant exceeds bytecode format size limits.",
                ));
            }
            writer.write_u8(ConstantTag::Buffer as u8);
            writer.write_u32(buffer.len() as u32);
            writer.write_bytes(buffer.bytes());
        }
    }
    Ok(())
}

/// Deserializes a program from `bytes`.
pub fn deserialize_program(bytes: &[u8]) -> Result<Program> {
    let mut reader = Reader::new(bytes);

    let header = (|| {
        let magic = reader.read_u32()?;
        let version = reader.read_u16()?;
        let _reserved = reader.read_u16()?;
        let instruction_count = reader.read_u32()?;
        let constant_count = reader.read_u32()?;
        let function_count = reader.read_u32()?;
        Some((magic, version, instruction_count, constant_count, function_count))
    })();
    let Some((magic, version, instruction_count, constant_count, function_count)) = header else {
        return Err(truncated("Bytecode header"));
    };

    if magic != BYTECODE_MAGIC {
        return Err(Error::new(
            ErrorKind::InvalidBytecodeMagic,
            "Bytecode magic number mismatch.",
        ));
    }
    if version != BYTECODE_VERSION {
        return Err(Error::new(
            ErrorKind::UnsupportedBytecodeVersion,
            "Unsupported bytecode version.",
        ));
    }

    // Reservations are clamped by the remaining payload so a hostile count
    // cannot force a huge allocation before the truncation checks fire.
    let mut program = Program::new();
    program
        .code
        .reserve((instruction_count as usize).min(reader.remaining() / 5));
    program
        .constants
        .reserve((constant_count as usize).min(reader.remaining()));
    program
        .functions
        .reserve((function_count as usize).min(reader.remaining() / 12));

    for _ in 0..instruction_count {
        let (Some(opcode_raw), Some(operand)) = (reader.read_u8(), reader.read_u32()) else {
            return Err(truncated("Instruction table"));
        };
        let Some(opcode) = OpCode::from_u8(opcode_raw) else {
            return Err(Error::new(
                ErrorKind::UnknownOpcode,
                format!("Unknown opcode byte {opcode_raw:#04x} in bytecode."),
            ));
        };
        program.code.push(Instruction::new(opcode, operand));
    }

    for _ in 0..constant_count {
        program.constants.push(read_constant(&mut reader)?);
    }

    for _ in 0..function_count {
        let (Some(entry), Some(arity), Some(local_count)) =
            (reader.read_u32(), reader.read_u32(), reader.read_u32())
        else {
            return Err(truncated("Function table"));
        };
        program.functions.push(Function {
            entry,
            arity,
            local_count,
        });
    }

    if reader.remaining() != 0 {
        return Err(Error::new(
            ErrorKind::MalformedBytecode,
            "Bytecode payload has trailing bytes.",
        ));
    }

    Ok(program)
}

fn read_constant(reader: &mut Reader<'_>) -> Result<Value> {
    let Some(tag) = reader.read_u8() else {
        return Err(truncated("Constant table"));
    };

    match tag {
        t if t == ConstantTag::Empty as u8 => Ok(Value::Empty),
        t if t == ConstantTag::I64 as u8 => {
            let v = reader.read_i64().ok_or_else(|| truncated("i64 constant"))?;
            Ok(Value::I64(v))
        }
        t if t == ConstantTag::F64 as u8 => {
            let v = reader.read_f64().ok_or_else(|| truncated("f64 constant"))?;
            Ok(Value::F64(v))
        }
        t if t == ConstantTag::Str as u8 => {
            let length = reader
                .read_u32()
                .ok_or_else(|| truncated("String constant length"))?;
            let payload = reader
                .read_bytes(length as usize)
                .ok_or_else(|| truncated("String constant payload"))?;
            let text = core::str::from_utf8(payload).map_err(|_| {
                Error::new(
                    ErrorKind::MalformedBytecode,
                    "String constant is not valid UTF-8.",
                )
            })?;
            Ok(Value::OwnedStr(String::from(text)))
        }
        t if t == ConstantTag::Buffer as u8 => {
            let length = reader
                .read_u32()
                .ok_or_else(|| truncated("Buffer constant length"))?;
            let payload = reader
                .read_bytes(length as usize)
                .ok_or_else(|| truncated("Buffer constant payload"))?;
            Ok(Value::Buffer(MoveBuffer::from_vec(Vec::from(payload))))
        }
        _ => Err(Error::new(
            ErrorKind::MalformedBytecode,
            "Unknown constant tag in bytecode.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    fn sample_program() -> Program {
        let mut program = Program::new();
        let lhs = program.add_constant(Value::I64(40)) as u32;
        let rhs = program.add_constant(Value::I64(2)) as u32;
        program.add_constant(Value::F64(2.5));
        program.add_constant(Value::BorrowedStr("deny"));
        program.add_constant(Value::OwnedStr("allow".to_string()));
        program.add_constant(Value::Empty);
        program.add_constant(Value::Buffer(MoveBuffer::from_vec(vec![9, 8, 7])));
        program.add_function(0, 1, 2);
        program.code = vec![
            Instruction::new(OpCode::PushConstant, lhs),
            Instruction::new(OpCode::PushConstant, rhs),
            Instruction::new(OpCode::AddI64, 0),
            Instruction::new(OpCode::Halt, 0),
        ];
        program
    }

    #[test]
    fn roundtrip_preserves_the_program() {
        let program = sample_program();
        let blob = serialize_program(&program).unwrap();
        let decoded = deserialize_program(blob.bytes()).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn string_constants_decode_as_owned() {
        let mut program = Program::new();
        program.add_constant(Value::BorrowedStr("deny"));
        let blob = serialize_program(&program).unwrap();
        let decoded = deserialize_program(blob.bytes()).unwrap();
        assert!(matches!(decoded.constants[0], Value::OwnedStr(_)));
        assert_eq!(decoded.constants[0], Value::BorrowedStr("deny"));
    }

    #[test]
    fn zero_magic_is_rejected() {
        let program = sample_program();
        let blob = serialize_program(&program).unwrap();
        let mut bytes = Vec::from(blob.bytes());
        bytes[0] = 0;
        bytes[1] = 0;
        bytes[2] = 0;
        bytes[3] = 0;
        let err = deserialize_program(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBytecodeMagic);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let program = sample_program();
        let blob = serialize_program(&program).unwrap();
        let mut bytes = Vec::from(blob.bytes());
        bytes[4] = 0xff;
        let err = deserialize_program(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedBytecodeVersion);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let program = sample_program();
        let blob = serialize_program(&program).unwrap();
        let mut bytes = Vec::from(blob.bytes());
        bytes.push(0);
        let err = deserialize_program(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedBytecode);
        assert_eq!(err.message(), "Bytecode payload has trailing bytes.");
    }

    #[test]
    fn truncated_tables_are_rejected() {
        let program = sample_program();
        let blob = serialize_program(&program).unwrap();
        let bytes = blob.bytes();
        for cut in [4, 16, 18, 22, bytes.len() - 1] {
            let err = deserialize_program(&bytes[..cut]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedBytecode, "cut at {cut}");
        }
    }

    #[test]
    fn unknown_opcode_byte_is_rejected() {
        let mut program = Program::new();
        program.code = vec![Instruction::new(OpCode::Halt, 0)];
        let blob = serialize_program(&program).unwrap();
        let mut bytes = Vec::from(blob.bytes());
        // First instruction's opcode byte sits right after the 20-byte header.
        bytes[20] = 0xee;
        let err = deserialize_program(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOpcode);
    }

    #[test]
    fn unknown_constant_tag_is_rejected() {
        let mut program = Program::new();
        program.add_constant(Value::Empty);
        let blob = serialize_program(&program).unwrap();
        let mut bytes = Vec::from(blob.bytes());
        let tag_offset = bytes.len() - 1;
        bytes[tag_offset] = 200;
        let err = deserialize_program(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedBytecode);
        assert_eq!(err.message(), "Unknown constant tag in bytecode.");
    }
}
