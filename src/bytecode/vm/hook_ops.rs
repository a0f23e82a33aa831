//! Key inspection, argument marshalling and handler invocation.

use smallvec::SmallVec;
use tracing::trace;

use crate::handler::{HookValue, ParamType};

use super::types::{Slot, VmError, VmResult};
use super::Frame;

/// Char code pushed when reading past either end of the key
pub const KEY_END: i64 = -1;

impl Frame<'_> {
    /// Pop key, push its length in chars
    pub(super) fn op_key_length(&mut self) -> VmResult<()> {
        self.expect_key()?;
        self.push(Slot::Int(self.key.len() as i64))
    }

    /// Pop position, pop key, push the char code at position
    pub(super) fn op_key_char_at(&mut self) -> VmResult<()> {
        let pos = self.pop_int()?;
        self.expect_key()?;
        let code = usize::try_from(pos)
            .ok()
            .and_then(|p| self.key.get(p))
            .map_or(KEY_END, |&c| c as i64);
        self.push(Slot::Int(code))
    }

    /// Pop index, pop argument array, push the element (null if missing)
    pub(super) fn op_load_elem(&mut self) -> VmResult<()> {
        let index = self.pop_int()?;
        self.expect_args()?;
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| self.args.get(i))
            .cloned()
            .unwrap_or_default();
        self.push(Slot::Value(value))
    }

    /// Narrow the top value to a parameter type; a mismatch yields null
    pub(super) fn op_cast_to(&mut self, tag: u8) -> VmResult<()> {
        let ty = ParamType::from_byte(tag).ok_or(VmError::InvalidTypeTag(tag))?;
        let value = self.pop_value()?;
        self.push(Slot::Value(ty.narrow(value)))
    }

    /// Pop the handler's arguments, call it and push its result
    pub(super) fn op_call_handler(&mut self, index: u16) -> VmResult<()> {
        let routine = self.routine;
        let handler = routine.handler(index).ok_or(VmError::InvalidHandler(index))?;
        let arity = handler.arity();
        if self.stack.len() < arity {
            return Err(VmError::StackUnderflow);
        }

        let mut args: SmallVec<[HookValue; 4]> = SmallVec::with_capacity(arity);
        for slot in self.stack.drain(self.stack.len() - arity..) {
            match slot {
                Slot::Value(v) => args.push(v),
                other => {
                    return Err(VmError::TypeError {
                        expected: "value",
                        got: other.type_name(),
                    })
                }
            }
        }

        trace!(target: "hookdispatch::vm", handler = handler.name(), arity, "call handler");
        let result = match handler.invoke(&args) {
            Some(value) => Slot::Value(value),
            None => Slot::Void,
        };
        self.push(result)
    }

    /// Pop a handler result into the output slot; no value leaves it untouched
    pub(super) fn op_store_out(&mut self) -> VmResult<()> {
        match self.pop()? {
            Slot::Value(v) => *self.out = Some(v),
            Slot::Void => {}
            other => {
                return Err(VmError::TypeError {
                    expected: "value",
                    got: other.type_name(),
                })
            }
        }
        Ok(())
    }
}
