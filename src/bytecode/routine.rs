//! Encoded dispatch routine
//!
//! A [`Routine`] is the finished product of compilation: the byte code, the
//! byte offset of every logical instruction, and the handler table the
//! `call` operands index into. Routines are immutable after compilation and
//! can be shared across threads.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use super::encoder::{EncodedProgram, EncodingStats};
use super::ir::InstrId;
use super::opcodes::Opcode;
use crate::handler::{HandlerDescriptor, ParamType};

/// The named extension point a routine replaces, with its parameter shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideSlot {
    name: Arc<str>,
    params: Arc<[ParamType]>,
}

impl OverrideSlot {
    /// Name of the standard string-keyed hook slot
    pub const DIRECT_CALL_HOOK: &'static str = "DirectCallHook";

    /// `(key, out, args)`
    pub const DIRECT_CALL_HOOK_PARAMS: &'static [ParamType] = &[ParamType::Str, ParamType::Any, ParamType::List];

    /// Slot with the `(key, out, args)` shape
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            params: Self::DIRECT_CALL_HOOK_PARAMS.into(),
        }
    }

    /// The standard `DirectCallHook(key, out, args) -> found` slot
    pub fn direct_call_hook() -> Self {
        Self::new(Self::DIRECT_CALL_HOOK)
    }

    pub fn with_params(mut self, params: &[ParamType]) -> Self {
        self.params = params.into();
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// e.g. `DirectCallHook(str, any, list)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.iter().join(", "))
    }
}

impl Default for OverrideSlot {
    fn default() -> Self {
        Self::direct_call_hook()
    }
}

impl fmt::Display for OverrideSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A compiled dispatch routine
#[derive(Debug, Clone)]
pub struct Routine {
    /// Slot this routine is installed into
    slot: OverrideSlot,

    /// The byte code
    code: Vec<u8>,

    /// Byte offset of every logical instruction
    offsets: Vec<usize>,

    /// Handler table, indexed by `call` operands
    handlers: Vec<HandlerDescriptor>,

    /// Number of local slots needed
    local_count: u16,

    /// Deepest the operand stack gets on any path
    max_stack_depth: usize,

    stats: EncodingStats,
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Byte offset of the opcode
    pub offset: usize,
    pub opcode: Opcode,
    /// Immediate operand, sign-extended where the encoding is signed
    pub immediate: Option<i64>,
}

impl DecodedInstruction {
    /// Encoded size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.opcode.encoded_size()
    }

    /// Offset of the following instruction
    #[inline]
    pub fn next_offset(&self) -> usize {
        self.offset + self.size()
    }

    /// Absolute target offset if this is a branch
    pub fn branch_target(&self) -> Option<usize> {
        if !self.opcode.is_branch() {
            return None;
        }
        let disp = self.immediate?;
        usize::try_from(self.next_offset() as i64 + disp).ok()
    }

    /// Integer pushed by this instruction, for any integer load form
    pub fn int_value(&self) -> Option<i64> {
        match self.opcode {
            Opcode::PushIntSmall | Opcode::PushInt => self.immediate,
            op => op.inline_int(),
        }
    }
}

impl Routine {
    /// Assemble a routine from an encoded program
    pub fn new(
        slot: OverrideSlot,
        encoded: EncodedProgram,
        handlers: Vec<HandlerDescriptor>,
        local_count: u16,
    ) -> Self {
        Self {
            slot,
            code: encoded.code,
            offsets: encoded.offsets,
            handlers,
            local_count,
            max_stack_depth: 0,
            stats: encoded.stats,
        }
    }

    /// Record the operand stack depth the routine needs
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    #[inline]
    pub fn slot(&self) -> &OverrideSlot {
        &self.slot
    }

    /// The byte code
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Length of the byte code
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Number of logical instructions the routine was encoded from
    #[inline]
    pub fn instruction_count(&self) -> usize {
        self.offsets.len()
    }

    /// Byte offset of a logical instruction
    #[inline]
    pub fn offset_of(&self, id: InstrId) -> Option<usize> {
        self.offsets.get(id).copied()
    }

    /// Byte offsets of all logical instructions
    #[inline]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    #[inline]
    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    #[inline]
    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    #[inline]
    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }

    #[inline]
    pub fn handler(&self, index: u16) -> Option<&HandlerDescriptor> {
        self.handlers.get(index as usize)
    }

    /// Largest declared parameter count across the handler table
    pub fn max_arity(&self) -> usize {
        self.handlers.iter().map(HandlerDescriptor::arity).max().unwrap_or(0)
    }

    #[inline]
    pub fn stats(&self) -> &EncodingStats {
        &self.stats
    }

    // === Byte Reading Helpers ===

    #[inline]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    #[inline]
    pub fn read_opcode(&self, offset: usize) -> Option<Opcode> {
        self.code.get(offset).and_then(|&b| Opcode::from_byte(b))
    }

    /// Read a signed i8
    #[inline]
    pub fn read_i8(&self, offset: usize) -> Option<i8> {
        self.code.get(offset).map(|&b| b as i8)
    }

    /// Read a u16 (big-endian)
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.code.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a signed i32 (big-endian)
    #[inline]
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        let bytes = self.code.get(offset..offset + 4)?;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    // === Decoding ===

    /// Decode the instruction at a byte offset
    pub fn decode_at(&self, offset: usize) -> Option<DecodedInstruction> {
        let opcode = self.read_opcode(offset)?;
        let at = offset + 1;
        let immediate = match opcode {
            Opcode::PushIntSmall | Opcode::BranchNeShort => Some(self.read_i8(at)? as i64),
            Opcode::PushInt | Opcode::BranchNe => Some(self.read_i32(at)? as i64),
            Opcode::LoadLocal | Opcode::StoreLocal | Opcode::CastTo => {
                Some(self.read_byte(at)? as i64)
            }
            Opcode::CallHandler => Some(self.read_u16(at)? as i64),
            _ => None,
        };
        Some(DecodedInstruction {
            offset,
            opcode,
            immediate,
        })
    }

    /// Walk the encoded stream from the start
    pub fn decode(&self) -> Decoder<'_> {
        Decoder {
            routine: self,
            offset: 0,
        }
    }

    /// Target offsets of every branch, in code order
    pub fn branch_targets(&self) -> Vec<usize> {
        self.decode().filter_map(|i| i.branch_target()).collect()
    }

    // === Disassembly ===

    /// Disassemble the routine to a string
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== {} ===\n", self.slot));
        output.push_str(&format!(
            "locals: {}, handlers: {}, instructions: {}, bytes: {}\n",
            self.local_count,
            self.handlers.len(),
            self.offsets.len(),
            self.code.len()
        ));

        let mut offset = 0;
        while offset < self.code.len() {
            let (disasm, next_offset) = self.disassemble_instruction(offset);
            output.push_str(&format!("{:04x} {}\n", offset, disasm));
            offset = next_offset;
        }

        output
    }

    /// Disassemble a single instruction, returns (string, next_offset)
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let Some(instr) = self.decode_at(offset) else {
            return (
                format!("??? (0x{:02x})", self.read_byte(offset).unwrap_or(0)),
                offset + 1,
            );
        };

        let operand_str = match (instr.opcode, instr.immediate) {
            (op, _) if op.is_branch() => match instr.branch_target() {
                Some(target) => format!(" -> {:04x}", target),
                None => " -> ???".to_string(),
            },
            (Opcode::CastTo, Some(tag)) => match ParamType::from_byte(tag as u8) {
                Some(ty) => format!(" {}", ty),
                None => format!(" ??? ({})", tag),
            },
            (Opcode::CallHandler, Some(index)) => {
                let name = self
                    .handler(index as u16)
                    .map(HandlerDescriptor::signature)
                    .unwrap_or_else(|| "???".to_string());
                format!(" #{} ({})", index, name)
            }
            (Opcode::PushIntSmall | Opcode::PushInt, Some(n)) => match char_literal(n) {
                Some(c) => format!(" {} ({:?})", n, c),
                None => format!(" {}", n),
            },
            (_, Some(value)) => format!(" {}", value),
            (_, None) => String::new(),
        };

        (format!("{}{}", instr.opcode.mnemonic(), operand_str), instr.next_offset())
    }
}

/// Printable char for an integer constant, used to annotate char compares
fn char_literal(n: i64) -> Option<char> {
    let c = char::from_u32(u32::try_from(n).ok()?)?;
    (n >= 0x20 && !c.is_control()).then_some(c)
}

/// Iterator over the instructions of a routine.
///
/// Stops at the end of the code or at the first byte that does not decode.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    routine: &'a Routine,
    offset: usize,
}

impl Iterator for Decoder<'_> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        let instr = self.routine.decode_at(self.offset)?;
        self.offset = instr.next_offset();
        Some(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{InstructionArena, Op, Operand};
    use crate::bytecode::encoder::encode;
    use crate::config::CompilerConfig;

    fn routine_from(arena: &InstructionArena, handlers: Vec<HandlerDescriptor>) -> Routine {
        let encoded = encode(arena, &CompilerConfig::default()).unwrap();
        Routine::new(OverrideSlot::default(), encoded, handlers, 2)
    }

    #[test]
    fn test_slot_defaults_to_direct_call_hook() {
        assert_eq!(OverrideSlot::default().name(), "DirectCallHook");
        assert_eq!(OverrideSlot::new("OnEvent").to_string(), "OnEvent");
        assert_eq!(OverrideSlot::default().signature(), "DirectCallHook(str, any, list)");
        assert_ne!(
            OverrideSlot::default(),
            OverrideSlot::default().with_params(&[ParamType::Str])
        );
    }

    #[test]
    fn test_decode_walks_every_instruction() {
        let mut arena = InstructionArena::new();
        arena.push(Op::LoadConst, Operand::Const(77));
        arena.push(Op::LoadConst, Operand::Const(3));
        arena.push(Op::BranchNe, Operand::Target(4));
        arena.push(Op::StoreLocal, Operand::Local(1));
        arena.push(Op::LoadConst, Operand::Const(0));
        arena.push(Op::Return, Operand::None);
        let routine = routine_from(&arena, Vec::new());

        let decoded: Vec<_> = routine.decode().collect();
        assert_eq!(decoded.len(), routine.instruction_count());
        for (id, instr) in decoded.iter().enumerate() {
            assert_eq!(Some(instr.offset), routine.offset_of(id));
        }
        assert_eq!(decoded[0].int_value(), Some(77));
        assert_eq!(decoded[1].int_value(), Some(3));
        assert_eq!(routine.branch_targets(), vec![routine.offset_of(4).unwrap()]);
    }

    #[test]
    fn test_disassemble_listing() {
        let handler = HandlerDescriptor::new("OnMy", &[ParamType::Str], |_| None);
        let mut arena = InstructionArena::new();
        arena.push(Op::LoadConst, Operand::Const('M' as i64));
        arena.push(Op::CastTo, Operand::Type(ParamType::Str));
        arena.push(Op::CallHandler, Operand::Handler(0));
        arena.push(Op::BranchNe, Operand::Target(0));
        let routine = routine_from(&arena, vec![handler]);

        let listing = routine.disassemble();
        assert!(listing.starts_with("=== DirectCallHook ===\n"));
        assert!(listing.contains("push.s 77 ('M')"));
        assert!(listing.contains("isinst str"));
        assert!(listing.contains("call #0 (OnMy(str))"));
        assert!(listing.contains("bne.s -> 0000"));
    }

    #[test]
    fn test_invalid_byte_disassembles_as_unknown() {
        let routine = Routine::new(
            OverrideSlot::default(),
            EncodedProgram {
                code: vec![0xFF],
                offsets: vec![0],
                stats: EncodingStats::default(),
            },
            Vec::new(),
            0,
        );
        assert_eq!(routine.disassemble_instruction(0), ("??? (0xff)".to_string(), 1));
        assert_eq!(routine.decode().count(), 0);
    }

    #[test]
    fn test_read_helpers_bounds() {
        let routine = Routine::new(
            OverrideSlot::default(),
            EncodedProgram {
                code: vec![0x00, 0x01, 0xFF],
                offsets: Vec::new(),
                stats: EncodingStats::default(),
            },
            Vec::new(),
            0,
        );
        assert_eq!(routine.read_u16(0), Some(1));
        assert_eq!(routine.read_u16(2), None);
        assert_eq!(routine.read_i8(2), Some(-1));
        assert_eq!(routine.read_i32(0), None);
    }
}
