//! Logical instruction arena
//!
//! The emitter produces instructions in a generic, encoding-independent form:
//! integer loads carry an `i64`, branches carry the id of their target
//! instruction, locals carry a slot number. Only the encoder knows how each
//! of these maps to bytes.
//!
//! Instructions live in an append-only arena and are identified by their
//! emission index ([`InstrId`]). Forward branches are emitted with a
//! [`Operand::Pending`] operand and bound later by the jump resolver.

use std::fmt;

use crate::handler::ParamType;

/// Identity of an instruction: its position in the arena at emission time
pub type InstrId = usize;

/// Logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    LoadKey,
    KeyLength,
    KeyCharAt,
    LoadArgs,
    LoadElem,
    /// Push a local slot (operand: `Local`)
    LoadLocal,
    /// Pop into a local slot (operand: `Local`)
    StoreLocal,
    /// Push an integer constant (operand: `Const`)
    LoadConst,
    Add,
    /// Branch when the top two integers differ (operand: `Target`)
    BranchNe,
    Return,
    /// Narrow the top value to a parameter type (operand: `Type`)
    CastTo,
    /// Invoke a handler from the routine's table (operand: `Handler`)
    CallHandler,
    StoreOut,
    ClearOut,
}

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Const(i64),
    Local(u16),
    Type(ParamType),
    Target(InstrId),
    Handler(u16),
    /// Branch target not yet known
    Pending,
}

/// A single logical instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(op: Op, operand: Operand) -> Self {
        Self { op, operand }
    }

    #[inline]
    pub fn is_branch(&self) -> bool {
        self.op == Op::BranchNe
    }

    /// Branch target if this is a bound branch
    #[inline]
    pub fn target(&self) -> Option<InstrId> {
        match self.operand {
            Operand::Target(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.op)?;
        match self.operand {
            Operand::None => Ok(()),
            Operand::Const(n) => write!(f, " {}", n),
            Operand::Local(i) => write!(f, " loc{}", i),
            Operand::Type(ty) => write!(f, " {}", ty),
            Operand::Target(id) => write!(f, " -> #{}", id),
            Operand::Handler(h) => write!(f, " handler#{}", h),
            Operand::Pending => write!(f, " -> ?"),
        }
    }
}

/// Append-only arena of logical instructions
#[derive(Debug, Clone, Default)]
pub struct InstructionArena {
    instructions: Vec<Instruction>,
}

impl InstructionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction, returning its id
    pub fn push(&mut self, op: Op, operand: Operand) -> InstrId {
        let id = self.instructions.len();
        self.instructions.push(Instruction::new(op, operand));
        id
    }

    #[inline]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.instructions.get_mut(id)
    }

    /// Id the next pushed instruction will receive
    #[inline]
    pub fn next_id(&self) -> InstrId {
        self.instructions.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.instructions.iter().enumerate()
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }
}
