// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance suite for the VM core: container format lock, end-to-end
//! execution scenarios, the arithmetic differential, and boundary behavior.

use policy_stack::buffer::MoveBuffer;
use policy_stack::codec::{deserialize_program, serialize_program};
use policy_stack::error::ErrorKind;
use policy_stack::opcode::OpCode;
use policy_stack::program::{Instruction, Program};
use policy_stack::value::Value;
use policy_stack::vm::Vm;

fn instr(opcode: OpCode, operand: u32) -> Instruction {
    Instruction::new(opcode, operand)
}

/// The splitmix64 mixer; keeps differential inputs deterministic without an
/// RNG dependency.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut x = *state;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[test]
fn golden_minimal_program_bytes_v1() {
    let mut program = Program::new();
    let lhs = program.add_constant(Value::I64(40)) as u32;
    let rhs = program.add_constant(Value::I64(2)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, lhs),
        instr(OpCode::PushConstant, rhs),
        instr(OpCode::AddI64, 0),
        instr(OpCode::Halt, 0),
    ];

    // Intentionally strict: locks the container encoding for a minimal
    // program as a regression signal for format changes.
    #[rustfmt::skip]
    let expected: &[u8] = &[
        // magic "PSB1"
        0x50, 0x53, 0x42, 0x31,
        // version=1, reserved=0
        0x01, 0x00, 0x00, 0x00,
        // instruction_count=4, constant_count=2, function_count=0
        0x04, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        // push_constant 0; push_constant 1; add_i64; halt
        0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x01, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00, 0x00,
        0x16, 0x00, 0x00, 0x00, 0x00,
        // constants: i64 40, i64 2
        0x01, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    let blob = serialize_program(&program).unwrap();
    assert_eq!(blob.bytes(), expected);

    let back = deserialize_program(blob.bytes()).unwrap();
    assert_eq!(back, program);
}

#[test]
fn scenario_trivial_add() {
    let mut program = Program::new();
    let a = program.add_constant(Value::I64(40)) as u32;
    let b = program.add_constant(Value::I64(2)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, a),
        instr(OpCode::PushConstant, b),
        instr(OpCode::AddI64, 0),
        instr(OpCode::Halt, 0),
    ];

    let mut vm = Vm::new();
    assert_eq!(vm.run(&program).unwrap(), Value::I64(42));
}

#[test]
fn scenario_native_sum_of_three() -> anyhow::Result<()> {
    let mut vm = Vm::new();
    let sum3 = vm
        .native("sum3")
        .bind(|a: i64, b: i64, c: i64| a + b + c);

    let mut program = Program::new();
    let a = program.add_constant(Value::I64(10)) as u32;
    let b = program.add_constant(Value::I64(20)) as u32;
    let c = program.add_constant(Value::I64(12)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, a),
        instr(OpCode::PushConstant, b),
        instr(OpCode::PushConstant, c),
        instr(OpCode::CallNative, sum3 as u32),
        instr(OpCode::Halt, 0),
    ];

    assert_eq!(vm.run(&program)?, Value::I64(42));
    Ok(())
}

/// `x mod 7 < 3 ? x * 3 + 17 : x * 5 + 100`, with the working copy of `x`
/// kept below the scratch values via `dup`.
fn branch_and_arith_program() -> Program {
    let mut program = Program::new();
    let seven = program.add_constant(Value::I64(7)) as u32;
    let three = program.add_constant(Value::I64(3)) as u32;
    let five = program.add_constant(Value::I64(5)) as u32;
    let hundred = program.add_constant(Value::I64(100)) as u32;
    let seventeen = program.add_constant(Value::I64(17)) as u32;
    program.code = vec![
        instr(OpCode::PushInput, 0),
        instr(OpCode::Dup, 0),
        instr(OpCode::PushConstant, seven),
        instr(OpCode::ModI64, 0),
        instr(OpCode::PushConstant, three),
        instr(OpCode::CmpLtI64, 0),
        instr(OpCode::JumpIfTrue, 12),
        instr(OpCode::PushConstant, five),
        instr(OpCode::MulI64, 0),
        instr(OpCode::PushConstant, hundred),
        instr(OpCode::AddI64, 0),
        instr(OpCode::Jump, 16),
        instr(OpCode::PushConstant, three),
        instr(OpCode::MulI64, 0),
        instr(OpCode::PushConstant, seventeen),
        instr(OpCode::AddI64, 0),
        instr(OpCode::Halt, 0),
    ];
    program
}

#[test]
fn scenario_branch_and_arith() -> anyhow::Result<()> {
    let program = branch_and_arith_program();

    let mut vm = Vm::new();
    vm.push_input(Value::I64(10));
    assert_eq!(vm.run(&program)?, Value::I64(150));

    vm.clear_inputs();
    vm.push_input(Value::I64(9));
    assert_eq!(vm.run(&program)?, Value::I64(44));
    Ok(())
}

#[test]
fn scenario_function_call_with_locals() -> anyhow::Result<()> {
    let mut program = Program::new();
    let three = program.add_constant(Value::I64(3)) as u32;
    let two = program.add_constant(Value::I64(2)) as u32;
    let six = program.add_constant(Value::I64(6)) as u32;
    let function = program.add_function(3, 1, 2) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, six),
        instr(OpCode::Call, function),
        instr(OpCode::Halt, 0),
        // Function body: local 0 is the argument, local 1 is scratch.
        instr(OpCode::LoadLocal, 0),
        instr(OpCode::PushConstant, three),
        instr(OpCode::AddI64, 0),
        instr(OpCode::StoreLocal, 1),
        instr(OpCode::LoadLocal, 1),
        instr(OpCode::PushConstant, two),
        instr(OpCode::MulI64, 0),
        instr(OpCode::Ret, 0),
    ];

    let mut vm = Vm::new();
    assert_eq!(vm.run(&program)?, Value::I64(18));
    Ok(())
}

#[test]
fn scenario_bitwise_pipeline() -> anyhow::Result<()> {
    // 13 & 7 = 5; 5 << 2 = 20; 20 | 6 = 22; 22 ^ 3 = 21; 21 >> 1 = 10.
    let mut program = Program::new();
    let thirteen = program.add_constant(Value::I64(13)) as u32;
    let seven = program.add_constant(Value::I64(7)) as u32;
    let two = program.add_constant(Value::I64(2)) as u32;
    let six = program.add_constant(Value::I64(6)) as u32;
    let three = program.add_constant(Value::I64(3)) as u32;
    let one = program.add_constant(Value::I64(1)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, thirteen),
        instr(OpCode::PushConstant, seven),
        instr(OpCode::AndI64, 0),
        instr(OpCode::PushConstant, two),
        instr(OpCode::ShlI64, 0),
        instr(OpCode::PushConstant, six),
        instr(OpCode::OrI64, 0),
        instr(OpCode::PushConstant, three),
        instr(OpCode::XorI64, 0),
        instr(OpCode::PushConstant, one),
        instr(OpCode::ShrI64, 0),
        instr(OpCode::Halt, 0),
    ];

    let mut vm = Vm::new();
    assert_eq!(vm.run(&program)?, Value::I64(10));
    Ok(())
}

#[test]
fn scenario_buffer_identity_through_native() -> anyhow::Result<()> {
    let mut vm = Vm::new();
    let identity = vm.native("identity_buffer").bind(|buffer: MoveBuffer| buffer);

    let mut payload = MoveBuffer::new(8);
    payload.bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let original_ptr = payload.data_ptr();

    let input = vm.push_input(Value::Buffer(payload)) as u32;
    let mut program = Program::new();
    program.code = vec![
        instr(OpCode::PushInput, input),
        instr(OpCode::CallNative, identity as u32),
        instr(OpCode::Halt, 0),
    ];

    let mut result = vm.run(&program)?;
    let returned = result.take_buffer()?;
    assert_eq!(returned.len(), 8);
    assert_eq!(returned.data_ptr(), original_ptr);
    assert_eq!(returned.bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    Ok(())
}

#[test]
fn codec_roundtrip_preserves_execution() -> anyhow::Result<()> {
    let program = branch_and_arith_program();
    let blob = serialize_program(&program)?;
    let decoded = deserialize_program(blob.bytes())?;
    assert_eq!(decoded, program);

    let mut vm = Vm::new();
    vm.push_input(Value::I64(10));
    let direct = vm.run(&program)?;
    vm.clear_inputs();
    vm.push_input(Value::I64(10));
    let via_codec = vm.run(&decoded)?;
    assert_eq!(direct, via_codec);
    Ok(())
}

const DIFFERENTIAL_OPS: &[OpCode] = &[
    OpCode::AddI64,
    OpCode::SubI64,
    OpCode::MulI64,
    OpCode::ModI64,
    OpCode::CmpEqI64,
    OpCode::CmpLtI64,
    OpCode::AndI64,
    OpCode::OrI64,
    OpCode::XorI64,
    OpCode::ShlI64,
    OpCode::ShrI64,
];

/// Constrains `rhs` into the legal domain of `opcode`.
fn constrain_rhs(opcode: OpCode, rhs: i64) -> i64 {
    match opcode {
        OpCode::ModI64 => {
            if rhs == 0 {
                1
            } else {
                rhs
            }
        }
        OpCode::ShlI64 | OpCode::ShrI64 => rhs & 63,
        _ => rhs,
    }
}

/// Two's-complement host evaluation of the same operation.
fn host_eval(opcode: OpCode, lhs: i64, rhs: i64) -> i64 {
    match opcode {
        OpCode::AddI64 => lhs.wrapping_add(rhs),
        OpCode::SubI64 => lhs.wrapping_sub(rhs),
        OpCode::MulI64 => lhs.wrapping_mul(rhs),
        OpCode::ModI64 => lhs.wrapping_rem(rhs),
        OpCode::CmpEqI64 => i64::from(lhs == rhs),
        OpCode::CmpLtI64 => i64::from(lhs < rhs),
        OpCode::AndI64 => lhs & rhs,
        OpCode::OrI64 => lhs | rhs,
        OpCode::XorI64 => lhs ^ rhs,
        OpCode::ShlI64 => lhs << rhs,
        OpCode::ShrI64 => lhs >> rhs,
        _ => unreachable!("not a differential opcode"),
    }
}

#[test]
fn arithmetic_differential_unfused() -> anyhow::Result<()> {
    let mut state = 0x5eed_u64;

    for &opcode in DIFFERENTIAL_OPS {
        // Operands arrive via inputs, so the constant-push fusion never
        // fires and the popping path is exercised.
        let mut program = Program::new();
        program.code = vec![
            instr(OpCode::PushInput, 0),
            instr(OpCode::PushInput, 1),
            instr(opcode, 0),
            instr(OpCode::Halt, 0),
        ];

        let mut vm = Vm::new();
        vm.verify(&program, 2)?;

        for _ in 0..200 {
            let lhs = splitmix64(&mut state) as i64;
            let rhs = constrain_rhs(opcode, splitmix64(&mut state) as i64);

            vm.clear_inputs();
            vm.push_input(Value::I64(lhs));
            vm.push_input(Value::I64(rhs));
            let result = vm.run_unchecked(&program)?;
            assert_eq!(
                result,
                Value::I64(host_eval(opcode, lhs, rhs)),
                "{} {lhs} {rhs}",
                opcode.name()
            );
        }
    }
    Ok(())
}

#[test]
fn arithmetic_differential_fused() -> anyhow::Result<()> {
    let mut state = 0xfeed_u64;

    for &opcode in DIFFERENTIAL_OPS {
        for _ in 0..200 {
            let lhs = splitmix64(&mut state) as i64;
            let rhs = constrain_rhs(opcode, splitmix64(&mut state) as i64);

            // The rhs rides in a constant, so the peephole fuses the pair.
            let mut program = Program::new();
            let rhs_const = program.add_constant(Value::I64(rhs)) as u32;
            program.code = vec![
                instr(OpCode::PushInput, 0),
                instr(OpCode::PushConstant, rhs_const),
                instr(opcode, 0),
                instr(OpCode::Halt, 0),
            ];

            let mut vm = Vm::new();
            vm.push_input(Value::I64(lhs));
            let result = vm.run(&program)?;
            assert_eq!(
                result,
                Value::I64(host_eval(opcode, lhs, rhs)),
                "fused {} {lhs} {rhs}",
                opcode.name()
            );
        }
    }
    Ok(())
}

#[test]
fn wrapping_edge_cases_match_host_semantics() -> anyhow::Result<()> {
    let cases: &[(OpCode, i64, i64)] = &[
        (OpCode::AddI64, i64::MAX, 1),
        (OpCode::SubI64, i64::MIN, 1),
        (OpCode::MulI64, i64::MAX, 2),
        (OpCode::ModI64, i64::MIN, -1),
        (OpCode::ShrI64, -8, 1),
    ];

    for &(opcode, lhs, rhs) in cases {
        let mut program = Program::new();
        program.code = vec![
            instr(OpCode::PushInput, 0),
            instr(OpCode::PushInput, 1),
            instr(opcode, 0),
            instr(OpCode::Halt, 0),
        ];
        let mut vm = Vm::new();
        vm.push_input(Value::I64(lhs));
        vm.push_input(Value::I64(rhs));
        assert_eq!(
            vm.run(&program)?,
            Value::I64(host_eval(opcode, lhs, rhs)),
            "{} {lhs} {rhs}",
            opcode.name()
        );
    }
    Ok(())
}

#[test]
fn boundary_mod_by_zero() {
    let mut program = Program::new();
    program.code = vec![
        instr(OpCode::PushInput, 0),
        instr(OpCode::PushInput, 1),
        instr(OpCode::ModI64, 0),
        instr(OpCode::Halt, 0),
    ];
    let mut vm = Vm::new();
    vm.push_input(Value::I64(1));
    vm.push_input(Value::I64(0));
    let err = vm.run(&program).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);
}

#[test]
fn boundary_shift_by_64() {
    for opcode in [OpCode::ShlI64, OpCode::ShrI64] {
        let mut program = Program::new();
        program.code = vec![
            instr(OpCode::PushInput, 0),
            instr(OpCode::PushInput, 1),
            instr(opcode, 0),
            instr(OpCode::Halt, 0),
        ];
        let mut vm = Vm::new();
        vm.push_input(Value::I64(1));
        vm.push_input(Value::I64(64));
        let err = vm.run(&program).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidShiftAmount);
    }
}

#[test]
fn boundary_verifier_rejects_jump_past_the_end() {
    let mut program = Program::new();
    program.code = vec![instr(OpCode::Jump, 99), instr(OpCode::Halt, 0)];
    let vm = Vm::new();
    let err = vm.verify(&program, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidJumpTarget);
}

#[test]
fn boundary_verifier_rejects_depth_mismatch() {
    let mut program = Program::new();
    let one = program.add_constant(Value::I64(1)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, one),
        instr(OpCode::JumpIfTrue, 3),
        instr(OpCode::PushConstant, one),
        instr(OpCode::Halt, 0),
    ];
    let vm = Vm::new();
    let err = vm.verify(&program, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn boundary_zero_magic_is_rejected() {
    let mut program = Program::new();
    program.code = vec![instr(OpCode::Halt, 0)];
    let blob = serialize_program(&program).unwrap();
    let mut bytes = Vec::from(blob.bytes());
    bytes[..4].fill(0);
    let err = deserialize_program(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBytecodeMagic);
}

#[test]
fn boundary_trailing_bytes_are_rejected() {
    let mut program = Program::new();
    program.code = vec![instr(OpCode::Halt, 0)];
    let blob = serialize_program(&program).unwrap();
    let mut bytes = Vec::from(blob.bytes());
    bytes.push(0xff);
    let err = deserialize_program(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedBytecode);
}

#[test]
fn boundary_builder_arity_mismatch() {
    let mut vm = Vm::new();
    let bad = vm.native("bad").arity(3).bind(|a: i64, b: i64| a + b);

    let mut program = Program::new();
    let one = program.add_constant(Value::I64(1)) as u32;
    program.code = vec![
        instr(OpCode::PushConstant, one),
        instr(OpCode::PushConstant, one),
        instr(OpCode::PushConstant, one),
        instr(OpCode::CallNative, bad as u32),
        instr(OpCode::Halt, 0),
    ];

    let err = vm.run(&program).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFunctionSignature);
}
