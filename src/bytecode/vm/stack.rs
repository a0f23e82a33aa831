//! Stack and local slot operations.

use crate::handler::HookValue;

use super::types::{Slot, VmError, VmResult};
use super::Frame;

impl Frame<'_> {
    #[inline]
    pub(super) fn push(&mut self, slot: Slot) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(VmError::ValueStackOverflow);
        }
        self.stack.push(slot);
        Ok(())
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Slot> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub(super) fn pop_int(&mut self) -> VmResult<i64> {
        match self.pop()? {
            Slot::Int(n) => Ok(n),
            other => Err(VmError::TypeError {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    pub(super) fn pop_value(&mut self) -> VmResult<HookValue> {
        match self.pop()? {
            Slot::Value(v) => Ok(v),
            other => Err(VmError::TypeError {
                expected: "value",
                got: other.type_name(),
            }),
        }
    }

    pub(super) fn expect_key(&mut self) -> VmResult<()> {
        match self.pop()? {
            Slot::Key => Ok(()),
            other => Err(VmError::TypeError {
                expected: "key",
                got: other.type_name(),
            }),
        }
    }

    pub(super) fn expect_args(&mut self) -> VmResult<()> {
        match self.pop()? {
            Slot::Args => Ok(()),
            other => Err(VmError::TypeError {
                expected: "args",
                got: other.type_name(),
            }),
        }
    }

    pub(super) fn load_local(&mut self, index: u16) -> VmResult<()> {
        let value = *self
            .locals
            .get(index as usize)
            .ok_or(VmError::InvalidLocal(index))?;
        self.push(Slot::Int(value))
    }

    pub(super) fn store_local(&mut self, index: u16) -> VmResult<()> {
        let value = self.pop_int()?;
        let slot = self
            .locals
            .get_mut(index as usize)
            .ok_or(VmError::InvalidLocal(index))?;
        *slot = value;
        Ok(())
    }

    /// Pop b, pop a, push a + b
    pub(super) fn op_add(&mut self) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let sum = a.checked_add(b).ok_or(VmError::ArithmeticOverflow)?;
        self.push(Slot::Int(sum))
    }
}
