//! Type definitions for the routine VM.
//!
//! - VmError: Error types that can occur during execution
//! - Slot: A value on the operand stack
//! - VmConfig: VM configuration options

use serde::Deserialize;

use crate::handler::HookValue;

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
///
/// A well-formed routine never raises any of these; they signal malformed
/// byte code or an exhausted resource limit. An unmatched key is not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Stack underflow
    StackUnderflow,
    /// Value stack overflow
    ValueStackOverflow,
    /// Invalid opcode byte
    InvalidOpcode(u8),
    /// Invalid local variable index
    InvalidLocal(u16),
    /// Invalid handler table index
    InvalidHandler(u16),
    /// Invalid parameter type tag
    InvalidTypeTag(u8),
    /// Type error in operation
    TypeError { expected: &'static str, got: &'static str },
    /// Arithmetic overflow
    ArithmeticOverflow,
    /// Instruction pointer out of bounds
    IpOutOfBounds,
    /// Step budget exhausted
    StepLimitExceeded(u64),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::ValueStackOverflow => write!(f, "Value stack overflow"),
            Self::InvalidOpcode(b) => write!(f, "Invalid opcode: 0x{:02x}", b),
            Self::InvalidLocal(i) => write!(f, "Invalid local variable index: {}", i),
            Self::InvalidHandler(i) => write!(f, "Invalid handler index: {}", i),
            Self::InvalidTypeTag(t) => write!(f, "Invalid parameter type tag: {}", t),
            Self::TypeError { expected, got } => {
                write!(f, "Type error: expected {}, got {}", expected, got)
            }
            Self::ArithmeticOverflow => write!(f, "Arithmetic overflow"),
            Self::IpOutOfBounds => write!(f, "Instruction pointer out of bounds"),
            Self::StepLimitExceeded(n) => write!(f, "Step limit of {} exceeded", n),
        }
    }
}

impl std::error::Error for VmError {}

/// A value on the operand stack
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Integer (positions, lengths, char codes, flags)
    Int(i64),
    /// Reference to the dispatch key
    Key,
    /// Reference to the caller's argument array
    Args,
    /// A hook value (an argument or a handler result)
    Value(HookValue),
    /// Result of a handler that produced no value
    Void,
}

impl Slot {
    pub fn type_name(&self) -> &'static str {
        match self {
            Slot::Int(_) => "int",
            Slot::Key => "key",
            Slot::Args => "args",
            Slot::Value(_) => "value",
            Slot::Void => "void",
        }
    }
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum value stack size
    pub max_stack: usize,
    /// Maximum instructions executed per dispatch
    pub max_steps: u64,
    /// Trace every executed instruction
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: 256,
            max_steps: 1_000_000,
            trace: false,
        }
    }
}
