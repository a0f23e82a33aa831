//! Forward branch resolution.
//!
//! The emitter cannot know where a mismatch branch lands until the sibling
//! subtree (or the shared epilogue) it jumps to has been emitted. It leaves
//! a [`Operand::Pending`] operand and records the placeholder here, keyed by
//! the branch's emission index. Once the whole tree and the epilogue exist,
//! [`JumpResolver`] binds every placeholder and then checks that nothing is
//! left pending or dangling.

use std::collections::BTreeMap;

use tracing::trace;

use crate::bytecode::ir::{InstrId, InstructionArena, Operand};

use super::error::{CompileError, CompileResult};

/// Where a placeholder branch must eventually land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    /// First instruction of the n-th emitted subtree (preorder); out of range
    /// binds to the epilogue
    Subtree(usize),
    /// The shared "not found" epilogue
    Epilogue,
}

/// Placeholder branches keyed by emission index
pub type PlaceholderMap = BTreeMap<InstrId, Fixup>;

/// Binds placeholder branches to concrete instructions
#[derive(Debug)]
pub struct JumpResolver<'a> {
    /// First instruction of every subtree, in preorder
    subtree_starts: &'a [InstrId],
    /// First instruction of the epilogue
    epilogue: InstrId,
}

impl<'a> JumpResolver<'a> {
    pub fn new(subtree_starts: &'a [InstrId], epilogue: InstrId) -> Self {
        Self {
            subtree_starts,
            epilogue,
        }
    }

    /// Concrete target for a fix-up class
    pub fn target_of(&self, fixup: Fixup) -> InstrId {
        match fixup {
            Fixup::Subtree(index) => self
                .subtree_starts
                .get(index)
                .copied()
                .unwrap_or(self.epilogue),
            Fixup::Epilogue => self.epilogue,
        }
    }

    /// Bind every placeholder, then verify the arena.
    ///
    /// Returns the number of placeholders bound.
    pub fn resolve(
        &self,
        arena: &mut InstructionArena,
        placeholders: &PlaceholderMap,
    ) -> CompileResult<usize> {
        for (&at, &fixup) in placeholders {
            let target = self.target_of(fixup);
            let instruction = arena
                .get_mut(at)
                .ok_or(CompileError::UnresolvedPlaceholder { at })?;
            instruction.operand = Operand::Target(target);
            trace!(
                target: "hookdispatch::compiler::fixup",
                at,
                ?fixup,
                target,
                "bound placeholder"
            );
        }
        verify_branches(arena)?;
        Ok(placeholders.len())
    }
}

/// Check that no branch is pending and every target exists
pub fn verify_branches(arena: &InstructionArena) -> CompileResult<()> {
    let len = arena.len();
    for (at, instruction) in arena.iter() {
        match instruction.operand {
            Operand::Pending => return Err(CompileError::UnresolvedPlaceholder { at }),
            Operand::Target(target) if target >= len => {
                return Err(CompileError::DanglingBranch { at, target })
            }
            _ => {}
        }
    }
    Ok(())
}
