//! Operand stack depth analysis.
//!
//! Walks every path through a bound instruction arena and records the
//! deepest the operand stack gets. The VM sizes its stack limit from this,
//! so a routine that compiled never overflows at dispatch time.

use crate::bytecode::ir::{Instruction, InstructionArena, Op, Operand};
use crate::handler::HandlerDescriptor;

use super::error::{CompileError, CompileResult};

/// (values popped, values pushed) by one instruction
fn stack_effect(instr: &Instruction, handlers: &[HandlerDescriptor]) -> (usize, usize) {
    match instr.op {
        Op::LoadKey | Op::LoadArgs | Op::LoadLocal | Op::LoadConst => (0, 1),
        Op::KeyLength | Op::CastTo => (1, 1),
        Op::KeyCharAt | Op::LoadElem | Op::Add => (2, 1),
        Op::StoreLocal | Op::StoreOut | Op::Return => (1, 0),
        Op::BranchNe => (2, 0),
        Op::ClearOut => (0, 0),
        Op::CallHandler => {
            let arity = match instr.operand {
                Operand::Handler(h) => handlers.get(h as usize).map_or(0, HandlerDescriptor::arity),
                _ => 0,
            };
            (arity, 1)
        }
    }
}

/// Maximum operand stack depth over every reachable instruction
pub fn max_stack_depth(arena: &InstructionArena, handlers: &[HandlerDescriptor]) -> CompileResult<usize> {
    let instructions = arena.as_slice();
    let mut entry: Vec<Option<usize>> = vec![None; instructions.len()];
    let mut worklist = Vec::new();
    if !instructions.is_empty() {
        entry[0] = Some(0);
        worklist.push(0);
    }

    let mut max = 0;
    while let Some(at) = worklist.pop() {
        let Some(depth) = entry[at] else { continue };
        let instr = &instructions[at];
        let (pops, pushes) = stack_effect(instr, handlers);
        let after = depth
            .checked_sub(pops)
            .ok_or(CompileError::StackUnderflow { at })?
            + pushes;
        max = max.max(depth).max(after);

        let mut successors = smallvec::SmallVec::<[usize; 2]>::new();
        match instr.op {
            Op::Return => {}
            Op::BranchNe => {
                successors.push(at + 1);
                if let Some(target) = instr.target() {
                    successors.push(target);
                }
            }
            _ => successors.push(at + 1),
        }

        for next in successors {
            if next >= instructions.len() {
                continue;
            }
            match entry[next] {
                None => {
                    entry[next] = Some(after);
                    worklist.push(next);
                }
                Some(seen) if seen != after => {
                    return Err(CompileError::InconsistentStackDepth { at: next });
                }
                Some(_) => {}
            }
        }
    }
    Ok(max)
}
