//! Concrete opcodes for encoded dispatch routines
//!
//! This module defines the byte-level instruction set produced by the
//! encoder and executed by the routine VM. Several logical operations have
//! more than one concrete form (e.g. `push_0`..`push_8`, `push_i8` and
//! `push_i32` for integer loads, `bne_s` and `bne` for branches); the encoder
//! always picks the most compact form that can represent the operand.

use std::fmt;

/// Bytecode opcode enumeration
///
/// Each opcode is assigned a unique u8 value, grouped by category.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Key and Argument Access (0x00-0x0F) ===
    /// Push the dispatch key
    LoadKey = 0x01,
    /// Pop key, push its length in chars
    KeyLength = 0x02,
    /// Pop position and key, push the char code at position (-1 past the end)
    KeyCharAt = 0x03,
    /// Push the caller's argument array
    LoadArgs = 0x04,
    /// Pop index and argument array, push the element (null if missing)
    LoadElem = 0x05,

    // === Locals (0x10-0x1F) ===
    /// Push local 0
    LoadLocal0 = 0x10,
    /// Push local 1
    LoadLocal1 = 0x11,
    /// Push local, index is next byte
    LoadLocal = 0x12,
    /// Pop into local 0
    StoreLocal0 = 0x13,
    /// Pop into local 1
    StoreLocal1 = 0x14,
    /// Pop into local, index is next byte
    StoreLocal = 0x15,

    // === Integer Constants (0x20-0x2F) ===
    PushInt0 = 0x20,
    PushInt1 = 0x21,
    PushInt2 = 0x22,
    PushInt3 = 0x23,
    PushInt4 = 0x24,
    PushInt5 = 0x25,
    PushInt6 = 0x26,
    PushInt7 = 0x27,
    PushInt8 = 0x28,
    /// Push small integer (-128 to 127), value is next byte
    PushIntSmall = 0x29,
    /// Push i32, value is next 4 bytes (big-endian)
    PushInt = 0x2A,

    // === Arithmetic (0x30-0x3F) ===
    /// Pop b, pop a, push a + b
    Add = 0x30,

    // === Control Flow (0x40-0x4F) ===
    /// Short branch if the top two integers differ, offset is next byte (signed)
    BranchNeShort = 0x40,
    /// Branch if the top two integers differ, offset is next 4 bytes (signed)
    BranchNe = 0x41,
    /// Pop the found flag and return it
    Return = 0x42,

    // === Handler Invocation (0x50-0x5F) ===
    /// Narrow top value to a parameter type, tag is next byte
    CastTo = 0x50,
    /// Call handler, table index is next 2 bytes
    CallHandler = 0x51,
    /// Pop handler result into the output slot
    StoreOut = 0x52,
    /// Reset the output slot to unset
    ClearOut = 0x53,
}

impl Opcode {
    /// Convert a byte to an opcode
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODE_TABLE[byte as usize]
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the size of immediate operands for this opcode
    pub fn immediate_size(self) -> usize {
        match self {
            Self::LoadLocal
            | Self::StoreLocal
            | Self::PushIntSmall
            | Self::BranchNeShort
            | Self::CastTo => 1,

            Self::CallHandler => 2,

            Self::PushInt | Self::BranchNe => 4,

            _ => 0,
        }
    }

    /// Total encoded size (opcode byte plus immediates)
    #[inline]
    pub fn encoded_size(self) -> usize {
        1 + self.immediate_size()
    }

    /// Get the mnemonic name for disassembly
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::LoadKey => "ldkey",
            Self::KeyLength => "key_len",
            Self::KeyCharAt => "key_char",
            Self::LoadArgs => "ldargs",
            Self::LoadElem => "ldelem",
            Self::LoadLocal0 => "ldloc.0",
            Self::LoadLocal1 => "ldloc.1",
            Self::LoadLocal => "ldloc.s",
            Self::StoreLocal0 => "stloc.0",
            Self::StoreLocal1 => "stloc.1",
            Self::StoreLocal => "stloc.s",
            Self::PushInt0 => "push.0",
            Self::PushInt1 => "push.1",
            Self::PushInt2 => "push.2",
            Self::PushInt3 => "push.3",
            Self::PushInt4 => "push.4",
            Self::PushInt5 => "push.5",
            Self::PushInt6 => "push.6",
            Self::PushInt7 => "push.7",
            Self::PushInt8 => "push.8",
            Self::PushIntSmall => "push.s",
            Self::PushInt => "push",
            Self::Add => "add",
            Self::BranchNeShort => "bne.s",
            Self::BranchNe => "bne",
            Self::Return => "ret",
            Self::CastTo => "isinst",
            Self::CallHandler => "call",
            Self::StoreOut => "stout",
            Self::ClearOut => "clrout",
        }
    }

    /// Check if this opcode is a branch instruction
    #[inline]
    pub fn is_branch(self) -> bool {
        matches!(self, Self::BranchNeShort | Self::BranchNe)
    }

    /// Check if this opcode ends execution
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return)
    }

    /// The inline integer pushed by `push.0`..`push.8`
    pub fn inline_int(self) -> Option<i64> {
        let byte = self.to_byte();
        if (Self::PushInt0.to_byte()..=Self::PushInt8.to_byte()).contains(&byte) {
            Some((byte - Self::PushInt0.to_byte()) as i64)
        } else {
            None
        }
    }

    /// The `push.N` opcode for an inline integer in 0..=8
    pub fn for_inline_int(value: i64) -> Option<Self> {
        if (0..=8).contains(&value) {
            Self::from_byte(Self::PushInt0.to_byte() + value as u8)
        } else {
            None
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Lookup table for byte -> Opcode conversion
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];

    // Key and argument access
    table[0x01] = Some(Opcode::LoadKey);
    table[0x02] = Some(Opcode::KeyLength);
    table[0x03] = Some(Opcode::KeyCharAt);
    table[0x04] = Some(Opcode::LoadArgs);
    table[0x05] = Some(Opcode::LoadElem);

    // Locals
    table[0x10] = Some(Opcode::LoadLocal0);
    table[0x11] = Some(Opcode::LoadLocal1);
    table[0x12] = Some(Opcode::LoadLocal);
    table[0x13] = Some(Opcode::StoreLocal0);
    table[0x14] = Some(Opcode::StoreLocal1);
    table[0x15] = Some(Opcode::StoreLocal);

    // Integer constants
    table[0x20] = Some(Opcode::PushInt0);
    table[0x21] = Some(Opcode::PushInt1);
    table[0x22] = Some(Opcode::PushInt2);
    table[0x23] = Some(Opcode::PushInt3);
    table[0x24] = Some(Opcode::PushInt4);
    table[0x25] = Some(Opcode::PushInt5);
    table[0x26] = Some(Opcode::PushInt6);
    table[0x27] = Some(Opcode::PushInt7);
    table[0x28] = Some(Opcode::PushInt8);
    table[0x29] = Some(Opcode::PushIntSmall);
    table[0x2A] = Some(Opcode::PushInt);

    // Arithmetic
    table[0x30] = Some(Opcode::Add);

    // Control flow
    table[0x40] = Some(Opcode::BranchNeShort);
    table[0x41] = Some(Opcode::BranchNe);
    table[0x42] = Some(Opcode::Return);

    // Handler invocation
    table[0x50] = Some(Opcode::CastTo);
    table[0x51] = Some(Opcode::CallHandler);
    table[0x52] = Some(Opcode::StoreOut);
    table[0x53] = Some(Opcode::ClearOut);

    table
};
