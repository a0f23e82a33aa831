//! Instruction encoder
//!
//! Lowers the bound logical program to bytes, picking the most compact
//! concrete opcode for every instruction:
//!
//! | Logical | Concrete forms |
//! |---------|----------------|
//! | `LoadConst n` | `push.0`..`push.8`, `push.s` (i8), `push` (i32) |
//! | `LoadLocal i` / `StoreLocal i` | `ldloc.0`, `ldloc.1`, `ldloc.s` (u8) |
//! | `BranchNe -> t` | `bne.s` (i8), `bne` (i32) |
//!
//! Branch displacements are relative to the end of the branch instruction.
//! Their size depends on the layout, and the layout depends on their size,
//! so branches are relaxed: every branch starts short, and a pass widens
//! each short branch whose displacement no longer fits. Widening only grows
//! the code, so a branch never needs to shrink back and the passes reach a
//! fixed point.

use tracing::trace;

use super::compiler::{CompileError, CompileResult};
use super::ir::{InstrId, Instruction, InstructionArena, Op, Operand};
use super::opcodes::Opcode;
use crate::config::CompilerConfig;

/// Statistics about one encoding run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodingStats {
    /// Relaxation passes until the layout was stable
    pub passes: usize,
    /// Branches encoded with an i8 displacement
    pub short_branches: usize,
    /// Branches that had to be widened to an i32 displacement
    pub long_branches: usize,
    /// Integer loads encoded without an immediate
    pub inline_consts: usize,
}

/// Encoded byte code plus the layout of its logical instructions
#[derive(Debug, Clone)]
pub struct EncodedProgram {
    /// The byte code
    pub code: Vec<u8>,
    /// Byte offset of each logical instruction, by instruction id
    pub offsets: Vec<usize>,
    pub stats: EncodingStats,
}

/// Encode a fully bound program
pub fn encode(arena: &InstructionArena, config: &CompilerConfig) -> CompileResult<EncodedProgram> {
    let instructions = arena.as_slice();
    let mut opcodes = instructions
        .iter()
        .enumerate()
        .map(|(at, instr)| select_opcode(at, instr, instructions.len()))
        .collect::<CompileResult<Vec<_>>>()?;

    let (mut offsets, passes) = relax(instructions, &mut opcodes, config.max_encode_passes)?;

    let code_len = offsets.pop().unwrap_or(0);
    let mut code = Vec::with_capacity(code_len);
    let mut stats = EncodingStats {
        passes,
        ..EncodingStats::default()
    };

    for (at, (instr, &opcode)) in instructions.iter().zip(opcodes.iter()).enumerate() {
        debug_assert_eq!(code.len(), offsets[at]);
        code.push(opcode.to_byte());
        match opcode {
            Opcode::BranchNeShort => {
                stats.short_branches += 1;
                let disp = displacement_in(&offsets, code_len, at, instr);
                code.push(disp as i8 as u8);
            }
            Opcode::BranchNe => {
                stats.long_branches += 1;
                let disp = displacement_in(&offsets, code_len, at, instr);
                let disp = i32::try_from(disp).map_err(|_| CompileError::InvalidOperand { at, op: instr.op })?;
                code.extend_from_slice(&disp.to_be_bytes());
            }
            Opcode::PushIntSmall => {
                if let Operand::Const(n) = instr.operand {
                    code.push(n as i8 as u8);
                }
            }
            Opcode::PushInt => {
                if let Operand::Const(n) = instr.operand {
                    code.extend_from_slice(&(n as i32).to_be_bytes());
                }
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                if let Operand::Local(i) = instr.operand {
                    code.push(i as u8);
                }
            }
            Opcode::CastTo => {
                if let Operand::Type(ty) = instr.operand {
                    code.push(ty.to_byte());
                }
            }
            Opcode::CallHandler => {
                if let Operand::Handler(h) = instr.operand {
                    code.extend_from_slice(&h.to_be_bytes());
                }
            }
            op if op.inline_int().is_some() => stats.inline_consts += 1,
            _ => {}
        }
    }

    Ok(EncodedProgram {
        code,
        offsets,
        stats,
    })
}

/// Pick the concrete opcode for an instruction; branches start short
fn select_opcode(at: InstrId, instr: &Instruction, len: usize) -> CompileResult<Opcode> {
    let invalid = || CompileError::InvalidOperand { at, op: instr.op };
    let opcode = match (instr.op, instr.operand) {
        (Op::LoadKey, Operand::None) => Opcode::LoadKey,
        (Op::KeyLength, Operand::None) => Opcode::KeyLength,
        (Op::KeyCharAt, Operand::None) => Opcode::KeyCharAt,
        (Op::LoadArgs, Operand::None) => Opcode::LoadArgs,
        (Op::LoadElem, Operand::None) => Opcode::LoadElem,
        (Op::Add, Operand::None) => Opcode::Add,
        (Op::Return, Operand::None) => Opcode::Return,
        (Op::StoreOut, Operand::None) => Opcode::StoreOut,
        (Op::ClearOut, Operand::None) => Opcode::ClearOut,
        (Op::CastTo, Operand::Type(_)) => Opcode::CastTo,
        (Op::CallHandler, Operand::Handler(_)) => Opcode::CallHandler,

        (Op::LoadLocal, Operand::Local(0)) => Opcode::LoadLocal0,
        (Op::LoadLocal, Operand::Local(1)) => Opcode::LoadLocal1,
        (Op::LoadLocal, Operand::Local(i)) if i <= u8::MAX as u16 => Opcode::LoadLocal,
        (Op::StoreLocal, Operand::Local(0)) => Opcode::StoreLocal0,
        (Op::StoreLocal, Operand::Local(1)) => Opcode::StoreLocal1,
        (Op::StoreLocal, Operand::Local(i)) if i <= u8::MAX as u16 => Opcode::StoreLocal,

        (Op::LoadConst, Operand::Const(n)) => match Opcode::for_inline_int(n) {
            Some(op) => op,
            None if i8::try_from(n).is_ok() => Opcode::PushIntSmall,
            None if i32::try_from(n).is_ok() => Opcode::PushInt,
            None => return Err(invalid()),
        },

        (Op::BranchNe, Operand::Pending) => return Err(CompileError::UnresolvedPlaceholder { at }),
        (Op::BranchNe, Operand::Target(target)) if target >= len => {
            return Err(CompileError::DanglingBranch { at, target })
        }
        (Op::BranchNe, Operand::Target(_)) => Opcode::BranchNeShort,

        _ => return Err(invalid()),
    };
    Ok(opcode)
}

/// Widen short branches until every displacement fits.
///
/// Returns the final layout (with the end offset as last entry) and the
/// number of passes it took.
fn relax(
    instructions: &[Instruction],
    opcodes: &mut [Opcode],
    max_passes: usize,
) -> CompileResult<(Vec<usize>, usize)> {
    // Laying out the code always takes one pass
    let max_passes = max_passes.max(1);
    let mut passes = 0;
    loop {
        if passes == max_passes {
            return Err(CompileError::EncodingDivergence { passes });
        }
        passes += 1;

        let offsets = layout(opcodes);
        let mut widened = 0;
        for (at, instr) in instructions.iter().enumerate() {
            if opcodes[at] != Opcode::BranchNeShort {
                continue;
            }
            if i8::try_from(displacement(&offsets, at, instr)).is_err() {
                opcodes[at] = Opcode::BranchNe;
                widened += 1;
            }
        }
        trace!(
            target: "hookdispatch::encoder",
            pass = passes,
            widened,
            bytes = offsets.last().copied().unwrap_or(0),
            "relaxation pass"
        );
        if widened == 0 {
            return Ok((offsets, passes));
        }
    }
}

/// Byte offset of every instruction, plus the end offset as the last entry
fn layout(opcodes: &[Opcode]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(opcodes.len() + 1);
    let mut offset = 0;
    for op in opcodes {
        offsets.push(offset);
        offset += op.encoded_size();
    }
    offsets.push(offset);
    offsets
}

/// Displacement of a branch during relaxation (`offsets` includes the end)
#[inline]
fn displacement(offsets: &[usize], at: InstrId, instr: &Instruction) -> isize {
    let target = instr.target().unwrap_or(at);
    offsets[target] as isize - offsets[at + 1] as isize
}

/// Displacement against the final layout (`offsets` excludes the end)
#[inline]
fn displacement_in(offsets: &[usize], code_len: usize, at: InstrId, instr: &Instruction) -> isize {
    let target = instr.target().unwrap_or(at);
    let next = offsets.get(at + 1).copied().unwrap_or(code_len);
    offsets[target] as isize - next as isize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ParamType;

    fn config() -> CompilerConfig {
        CompilerConfig::default()
    }

    #[test]
    fn test_compact_integer_forms() {
        let mut arena = InstructionArena::new();
        arena.push(Op::LoadConst, Operand::Const(0));
        arena.push(Op::LoadConst, Operand::Const(8));
        arena.push(Op::LoadConst, Operand::Const(9));
        arena.push(Op::LoadConst, Operand::Const(-1));
        arena.push(Op::LoadConst, Operand::Const(0x4E2D));
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(
            encoded.code,
            vec![0x20, 0x28, 0x29, 9, 0x29, 0xFF, 0x2A, 0x00, 0x00, 0x4E, 0x2D]
        );
        assert_eq!(encoded.offsets, vec![0, 1, 2, 4, 6]);
        assert_eq!(encoded.stats.inline_consts, 2);
    }

    #[test]
    fn test_local_forms() {
        let mut arena = InstructionArena::new();
        arena.push(Op::StoreLocal, Operand::Local(0));
        arena.push(Op::LoadLocal, Operand::Local(1));
        arena.push(Op::LoadLocal, Operand::Local(7));
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(encoded.code, vec![0x13, 0x11, 0x12, 7]);
    }

    #[test]
    fn test_operand_bytes() {
        let mut arena = InstructionArena::new();
        arena.push(Op::CastTo, Operand::Type(ParamType::Str));
        arena.push(Op::CallHandler, Operand::Handler(0x0102));
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(encoded.code, vec![0x50, 3, 0x51, 0x01, 0x02]);
    }

    #[test]
    fn test_short_forward_branch() {
        let mut arena = InstructionArena::new();
        arena.push(Op::BranchNe, Operand::Target(2));
        arena.push(Op::Add, Operand::None);
        arena.push(Op::Return, Operand::None);
        let encoded = encode(&arena, &config()).unwrap();
        // Displacement is from the end of the 2-byte branch to the ret
        assert_eq!(encoded.code, vec![0x40, 1, 0x30, 0x42]);
        assert_eq!(encoded.stats.short_branches, 1);
        assert_eq!(encoded.stats.passes, 1);
    }

    #[test]
    fn test_far_branch_is_widened() {
        let mut arena = InstructionArena::new();
        arena.push(Op::BranchNe, Operand::Target(201));
        for _ in 0..200 {
            arena.push(Op::Add, Operand::None);
        }
        arena.push(Op::Return, Operand::None);
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(encoded.code[0], Opcode::BranchNe.to_byte());
        assert_eq!(i32::from_be_bytes([encoded.code[1], encoded.code[2], encoded.code[3], encoded.code[4]]), 200);
        assert_eq!(encoded.stats.long_branches, 1);
        assert_eq!(encoded.stats.passes, 2);
    }

    #[test]
    fn test_widening_cascades() {
        // The first branch only stops fitting once the second one grows
        let mut arena = InstructionArena::new();
        arena.push(Op::BranchNe, Operand::Target(126));
        arena.push(Op::BranchNe, Operand::Target(130));
        for _ in 0..128 {
            arena.push(Op::Add, Operand::None);
        }
        arena.push(Op::Return, Operand::None);
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(encoded.stats.long_branches, 2);
        assert_eq!(encoded.stats.passes, 3);

        for (at, instr) in arena.iter() {
            if let Some(target) = instr.target() {
                let start = encoded.offsets[at];
                let op = Opcode::from_byte(encoded.code[start]).unwrap();
                let disp = match op {
                    Opcode::BranchNeShort => encoded.code[start + 1] as i8 as isize,
                    _ => i32::from_be_bytes([
                        encoded.code[start + 1],
                        encoded.code[start + 2],
                        encoded.code[start + 3],
                        encoded.code[start + 4],
                    ]) as isize,
                };
                let end = (start + op.encoded_size()) as isize;
                assert_eq!(end + disp, encoded.offsets[target] as isize);
            }
        }
    }

    #[test]
    fn test_backward_branch() {
        let mut arena = InstructionArena::new();
        arena.push(Op::Add, Operand::None);
        arena.push(Op::BranchNe, Operand::Target(0));
        let encoded = encode(&arena, &config()).unwrap();
        assert_eq!(encoded.code, vec![0x30, 0x40, (-3i8) as u8]);
    }

    #[test]
    fn test_pending_branch_rejected() {
        let mut arena = InstructionArena::new();
        arena.push(Op::BranchNe, Operand::Pending);
        let err = encode(&arena, &config()).unwrap_err();
        assert_eq!(err, CompileError::UnresolvedPlaceholder { at: 0 });
    }

    #[test]
    fn test_mismatched_operand_rejected() {
        let mut arena = InstructionArena::new();
        arena.push(Op::Add, Operand::Const(1));
        assert_eq!(
            encode(&arena, &config()).unwrap_err(),
            CompileError::InvalidOperand { at: 0, op: Op::Add }
        );

        let mut arena = InstructionArena::new();
        arena.push(Op::LoadConst, Operand::Const(i64::MAX));
        assert!(matches!(
            encode(&arena, &config()),
            Err(CompileError::InvalidOperand { at: 0, .. })
        ));
    }

    #[test]
    fn test_zero_pass_limit_still_encodes() {
        let mut arena = InstructionArena::new();
        arena.push(Op::LoadConst, Operand::Const(0));
        arena.push(Op::Return, Operand::None);
        let zero = CompilerConfig {
            max_encode_passes: 0,
            ..CompilerConfig::default()
        };
        let encoded = encode(&arena, &zero).unwrap();
        assert_eq!(encoded.code, vec![0x20, 0x42]);
        assert_eq!(encoded.stats.passes, 1);
    }

    #[test]
    fn test_pass_limit() {
        let mut arena = InstructionArena::new();
        arena.push(Op::BranchNe, Operand::Target(201));
        for _ in 0..200 {
            arena.push(Op::Add, Operand::None);
        }
        arena.push(Op::Return, Operand::None);
        let tight = CompilerConfig {
            max_encode_passes: 1,
            ..CompilerConfig::default()
        };
        assert_eq!(
            encode(&arena, &tight).unwrap_err(),
            CompileError::EncodingDivergence { passes: 1 }
        );
    }
}
