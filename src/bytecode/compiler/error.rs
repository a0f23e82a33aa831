//! Compiler error types for the dispatch routine compiler.

use crate::bytecode::ir::{InstrId, Op};

/// Compiler error types
///
/// All variants are fatal for the routine being built: no partial routine
/// is ever produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Two handlers registered under the same name
    DuplicateHandlerName(String),
    /// A handler with an empty name
    EmptyHandlerName,
    /// More handlers than a call operand can index
    TooManyHandlers(usize),
    /// A trie name with no entry in the handler table
    UnknownHandler(String),
    /// A branch reached the encoder without a bound target
    UnresolvedPlaceholder { at: InstrId },
    /// A bound branch points outside the instruction arena
    DanglingBranch { at: InstrId, target: InstrId },
    /// An instruction carries an operand its operation cannot encode
    InvalidOperand { at: InstrId, op: Op },
    /// Branch relaxation did not reach a fixed point
    EncodingDivergence { passes: usize },
    /// An instruction pops more values than the stack holds
    StackUnderflow { at: InstrId },
    /// Two paths reach an instruction with different stack depths
    InconsistentStackDepth { at: InstrId },
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateHandlerName(name) => {
                write!(f, "Duplicate handler name: {}", name)
            }
            Self::EmptyHandlerName => write!(f, "Handler name must not be empty"),
            Self::TooManyHandlers(count) => {
                write!(f, "Too many handlers ({}, max {})", count, u16::MAX as usize + 1)
            }
            Self::UnknownHandler(name) => write!(f, "No handler registered as {}", name),
            Self::UnresolvedPlaceholder { at } => {
                write!(f, "Unresolved branch placeholder at instruction {}", at)
            }
            Self::DanglingBranch { at, target } => {
                write!(
                    f,
                    "Branch at instruction {} targets missing instruction {}",
                    at, target
                )
            }
            Self::InvalidOperand { at, op } => {
                write!(f, "Invalid operand for {:?} at instruction {}", op, at)
            }
            Self::EncodingDivergence { passes } => {
                write!(f, "Branch encoding did not converge after {} passes", passes)
            }
            Self::StackUnderflow { at } => {
                write!(f, "Stack underflow at instruction {}", at)
            }
            Self::InconsistentStackDepth { at } => {
                write!(f, "Inconsistent stack depth at instruction {}", at)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
