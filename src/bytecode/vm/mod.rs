//! Routine Virtual Machine
//!
//! Executes an encoded dispatch routine the way the host runtime would run
//! the patched override slot: `(key, out, args) -> found`.
//!
//! The VM itself is immutable and shareable; each call gets a fresh
//! [`Frame`] holding the operand stack, the locals and the instruction
//! pointer, so concurrent dispatch through one VM is safe.
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, Slot)
//! - `stack`: Stack, local slot and arithmetic operations
//! - `hook_ops`: Key inspection, argument marshalling and handler calls

use std::ops::ControlFlow;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::opcodes::Opcode;
use super::routine::Routine;
use crate::handler::HookValue;

mod hook_ops;
mod stack;
mod types;


pub use types::{Slot, VmConfig, VmError, VmResult};

/// Interpreter for compiled dispatch routines
#[derive(Debug, Clone)]
pub struct RoutineVm {
    routine: Arc<Routine>,
    config: VmConfig,
}

impl RoutineVm {
    /// Create a new VM for the given routine
    pub fn new(routine: Arc<Routine>) -> Self {
        Self::with_config(routine, VmConfig::default())
    }

    /// Create a new VM with custom configuration
    pub fn with_config(routine: Arc<Routine>, config: VmConfig) -> Self {
        Self { routine, config }
    }

    #[inline]
    pub fn routine(&self) -> &Arc<Routine> {
        &self.routine
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Dispatch `key` through the routine.
    ///
    /// Returns whether a handler matched. When one did, `out` holds its
    /// result (or `None` if it produced no value); otherwise `out` is `None`.
    pub fn run(&self, key: &str, out: &mut Option<HookValue>, args: &[HookValue]) -> VmResult<bool> {
        let mut frame = Frame::new(&self.routine, &self.config, key, out, args);
        loop {
            match frame.step()? {
                ControlFlow::Continue(()) => continue,
                ControlFlow::Break(found) => return Ok(found),
            }
        }
    }
}

/// Execution state of a single dispatch
pub(super) struct Frame<'a> {
    routine: &'a Routine,
    trace: bool,
    max_steps: u64,
    pub(super) max_stack: usize,

    /// Key as chars, so positions index Unicode scalar values
    pub(super) key: SmallVec<[char; 32]>,
    pub(super) args: &'a [HookValue],
    pub(super) out: &'a mut Option<HookValue>,

    pub(super) stack: Vec<Slot>,
    pub(super) locals: SmallVec<[i64; 4]>,
    ip: usize,
    steps: u64,
}

impl<'a> Frame<'a> {
    fn new(
        routine: &'a Routine,
        config: &VmConfig,
        key: &str,
        out: &'a mut Option<HookValue>,
        args: &'a [HookValue],
    ) -> Self {
        Self {
            routine,
            trace: config.trace,
            max_steps: config.max_steps,
            // A compiled routine always gets the depth it was measured to need
            max_stack: config.max_stack.max(routine.max_stack_depth()),
            key: key.chars().collect(),
            args,
            out,
            stack: Vec::with_capacity(8),
            locals: SmallVec::from_elem(0, routine.local_count() as usize),
            ip: 0,
            steps: 0,
        }
    }

    /// Execute a single instruction
    fn step(&mut self) -> VmResult<ControlFlow<bool>> {
        if self.steps >= self.max_steps {
            return Err(VmError::StepLimitExceeded(self.max_steps));
        }
        self.steps += 1;

        // Read opcode
        let opcode_byte = self
            .routine
            .read_byte(self.ip)
            .ok_or(VmError::IpOutOfBounds)?;
        let opcode = Opcode::from_byte(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

        // Trace if enabled
        if self.trace {
            let (disasm, _) = self.routine.disassemble_instruction(self.ip);
            trace!(target: "hookdispatch::vm::step", ip = self.ip, mnemonic = %disasm, stack_depth = self.stack.len());
        }

        // Advance IP past opcode
        self.ip += 1;

        match opcode {
            // Key and argument access
            Opcode::LoadKey => self.push(Slot::Key)?,
            Opcode::KeyLength => self.op_key_length()?,
            Opcode::KeyCharAt => self.op_key_char_at()?,
            Opcode::LoadArgs => self.push(Slot::Args)?,
            Opcode::LoadElem => self.op_load_elem()?,

            // Locals
            Opcode::LoadLocal0 => self.load_local(0)?,
            Opcode::LoadLocal1 => self.load_local(1)?,
            Opcode::LoadLocal => {
                let index = self.read_u8()? as u16;
                self.load_local(index)?;
            }
            Opcode::StoreLocal0 => self.store_local(0)?,
            Opcode::StoreLocal1 => self.store_local(1)?,
            Opcode::StoreLocal => {
                let index = self.read_u8()? as u16;
                self.store_local(index)?;
            }

            // Integer constants
            Opcode::PushIntSmall => {
                let value = self.read_i8()? as i64;
                self.push(Slot::Int(value))?;
            }
            Opcode::PushInt => {
                let value = self.read_i32()? as i64;
                self.push(Slot::Int(value))?;
            }
            op if op.inline_int().is_some() => {
                let value = op.inline_int().unwrap_or_default();
                self.push(Slot::Int(value))?;
            }

            // Arithmetic
            Opcode::Add => self.op_add()?,

            // Control flow
            Opcode::BranchNeShort => {
                let disp = self.read_i8()? as isize;
                self.branch_ne(disp)?;
            }
            Opcode::BranchNe => {
                let disp = self.read_i32()? as isize;
                self.branch_ne(disp)?;
            }
            Opcode::Return => {
                let found = self.pop_int()? != 0;
                trace!(target: "hookdispatch::vm", found, steps = self.steps, "return");
                return Ok(ControlFlow::Break(found));
            }

            // Handler invocation
            Opcode::CastTo => {
                let tag = self.read_u8()?;
                self.op_cast_to(tag)?;
            }
            Opcode::CallHandler => {
                let index = self.read_u16()?;
                self.op_call_handler(index)?;
            }
            Opcode::StoreOut => self.op_store_out()?,
            Opcode::ClearOut => *self.out = None,

            // push.0..push.8 are handled by the inline-int arm
            _ => return Err(VmError::InvalidOpcode(opcode_byte)),
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Pop b, pop a; jump by `disp` (relative to the current ip) when a != b
    fn branch_ne(&mut self, disp: isize) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        if a != b {
            let target = self.ip as isize + disp;
            if target < 0 || target as usize >= self.routine.len() {
                return Err(VmError::IpOutOfBounds);
            }
            self.ip = target as usize;
        }
        Ok(())
    }

    // === Bytecode Reading Helpers ===

    #[inline]
    fn read_u8(&mut self) -> VmResult<u8> {
        let byte = self
            .routine
            .read_byte(self.ip)
            .ok_or(VmError::IpOutOfBounds)?;
        self.ip += 1;
        Ok(byte)
    }

    #[inline]
    fn read_i8(&mut self) -> VmResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    #[inline]
    fn read_u16(&mut self) -> VmResult<u16> {
        let value = self.routine.read_u16(self.ip).ok_or(VmError::IpOutOfBounds)?;
        self.ip += 2;
        Ok(value)
    }

    #[inline]
    fn read_i32(&mut self) -> VmResult<i32> {
        let value = self.routine.read_i32(self.ip).ok_or(VmError::IpOutOfBounds)?;
        self.ip += 4;
        Ok(value)
    }
}
