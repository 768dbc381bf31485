use core::fmt;
use std::str::FromStr;

use crate::AsmError;

/// Kind of the immediate argument that follows an opcode in the bytecode
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// The opcode is a single byte.
    None,
    /// 4-byte little-endian two's-complement integer.
    Int,
    /// 4-byte little-endian IEEE-754 float.
    Float,
    /// 4-byte little-endian absolute offset, written by the assembler's
    /// label-resolution pass.
    Label,
}

impl ArgKind {
    /// Byte length of the immediate.
    pub const fn len(&self) -> usize {
        match self {
            ArgKind::None => 0,
            ArgKind::Int | ArgKind::Float | ArgKind::Label => 4,
        }
    }

    /// `true` when the opcode carries no immediate.
    pub const fn is_empty(&self) -> bool {
        matches!(self, ArgKind::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
/// Instruction opcodes of the Buzz VM, in bytecode ordinal order.
pub enum Opcode {
    /// No operation.
    Nop = 0x00,
    /// Stop execution, leaving the VM in the `Done` state.
    Done = 0x01,
    /// Unconditional jump to the absolute offset in the immediate.
    Jump = 0x02,
    /// Pop the stack top; jump when it is nil or numerically zero.
    Jumpz = 0x03,
    /// Pop the stack top; jump when it is neither nil nor zero.
    Jumpnz = 0x04,
    /// Pop two operands, push their sum.
    Add = 0x05,
    /// Pop two operands, push their difference.
    Sub = 0x06,
    /// Pop two operands, push their product.
    Mul = 0x07,
    /// Pop two operands, push their quotient.
    Div = 0x08,
    /// Pop two operands, push the remainder; the sign follows the dividend.
    Mod = 0x09,
    /// Pop two operands, push the power; the result is always a float.
    Pow = 0x0a,
    /// Logical and of two popped operands, pushed as int 1/0.
    Land = 0x0b,
    /// Logical or of two popped operands, pushed as int 1/0.
    Lor = 0x0c,
    /// Logical negation of the popped operand, pushed as int 1/0.
    Lnot = 0x0d,
    /// Bitwise and of two popped integers.
    Band = 0x0e,
    /// Bitwise or of two popped integers.
    Bor = 0x0f,
    /// Bitwise complement of the popped integer.
    Bnot = 0x10,
    /// Left shift.
    Lshift = 0x11,
    /// Right shift.
    Rshift = 0x12,
    /// Unary minus, preserving the operand tag.
    Unm = 0x13,
    /// Equality test, pushed as int 1/0.
    Eq = 0x14,
    /// Inequality test.
    Neq = 0x15,
    /// Greater-than test.
    Gt = 0x16,
    /// Greater-or-equal test.
    Gte = 0x17,
    /// Less-than test.
    Lt = 0x18,
    /// Less-or-equal test.
    Lte = 0x19,
    /// Duplicate the stack top.
    Dup = 0x1a,
    /// Discard the stack top.
    Pop = 0x1b,
    /// Push nil.
    Pushnil = 0x1c,
    /// Push the integer immediate.
    Pushi = 0x1d,
    /// Push the float immediate.
    Pushf = 0x1e,
    /// Push the string with the interned id in the immediate.
    Pushs = 0x1f,
    /// Push a native closure; the immediate is the registration id.
    Pushcn = 0x20,
    /// Push a bytecode closure; the immediate is its code offset.
    Pushcc = 0x21,
    /// Push a lambda closure capturing the current locals as upvalues.
    Pushl = 0x22,
    /// Push the local at the immediate index, or nil past the table.
    Lload = 0x23,
    /// Pop the stack top into the local at the immediate index.
    Lstore = 0x24,
    /// Remove the local at the immediate index.
    Lremove = 0x25,
    /// Pop a string, push the global it names.
    Gload = 0x26,
    /// Pop a value and a string, store the value as a global.
    Gstore = 0x27,
    /// Push a new empty table.
    Pusht = 0x28,
    /// Pop value, key and table; store the pair in the table.
    Tput = 0x29,
    /// Pop key and table; push the stored value or nil.
    Tget = 0x2a,
    /// Call the closure under the immediate number of arguments.
    Callc = 0x2b,
    /// Like `Callc`, in the current swarm context.
    Calls = 0x2c,
    /// Return with no value.
    Ret0 = 0x2d,
    /// Return with the value on top of the stack.
    Ret1 = 0x2e,
}

impl Opcode {
    /// Number of defined opcodes; bytes at or beyond this value are invalid.
    pub const COUNT: u8 = 0x2f;

    /// The immediate argument this opcode expects.
    pub const fn arg_kind(&self) -> ArgKind {
        match self {
            Opcode::Jump | Opcode::Jumpz | Opcode::Jumpnz => ArgKind::Label,
            Opcode::Pushf => ArgKind::Float,
            Opcode::Pushi
            | Opcode::Pushs
            | Opcode::Pushcn
            | Opcode::Pushcc
            | Opcode::Pushl
            | Opcode::Lload
            | Opcode::Lstore
            | Opcode::Lremove
            | Opcode::Callc
            | Opcode::Calls => ArgKind::Int,
            _ => ArgKind::None,
        }
    }

    /// Total encoded length of the instruction, immediate included.
    pub const fn len(&self) -> usize {
        1 + self.arg_kind().len()
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Done => "done",
            Opcode::Jump => "jump",
            Opcode::Jumpz => "jumpz",
            Opcode::Jumpnz => "jumpnz",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Pow => "pow",
            Opcode::Land => "land",
            Opcode::Lor => "lor",
            Opcode::Lnot => "lnot",
            Opcode::Band => "band",
            Opcode::Bor => "bor",
            Opcode::Bnot => "bnot",
            Opcode::Lshift => "lshift",
            Opcode::Rshift => "rshift",
            Opcode::Unm => "unm",
            Opcode::Eq => "eq",
            Opcode::Neq => "neq",
            Opcode::Gt => "gt",
            Opcode::Gte => "gte",
            Opcode::Lt => "lt",
            Opcode::Lte => "lte",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Pushnil => "pushnil",
            Opcode::Pushi => "pushi",
            Opcode::Pushf => "pushf",
            Opcode::Pushs => "pushs",
            Opcode::Pushcn => "pushcn",
            Opcode::Pushcc => "pushcc",
            Opcode::Pushl => "pushl",
            Opcode::Lload => "lload",
            Opcode::Lstore => "lstore",
            Opcode::Lremove => "lremove",
            Opcode::Gload => "gload",
            Opcode::Gstore => "gstore",
            Opcode::Pusht => "pusht",
            Opcode::Tput => "tput",
            Opcode::Tget => "tget",
            Opcode::Callc => "callc",
            Opcode::Calls => "calls",
            Opcode::Ret0 => "ret0",
            Opcode::Ret1 => "ret1",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        use Opcode::*;
        Ok(match b {
            0x00 => Nop,
            0x01 => Done,
            0x02 => Jump,
            0x03 => Jumpz,
            0x04 => Jumpnz,
            0x05 => Add,
            0x06 => Sub,
            0x07 => Mul,
            0x08 => Div,
            0x09 => Mod,
            0x0a => Pow,
            0x0b => Land,
            0x0c => Lor,
            0x0d => Lnot,
            0x0e => Band,
            0x0f => Bor,
            0x10 => Bnot,
            0x11 => Lshift,
            0x12 => Rshift,
            0x13 => Unm,
            0x14 => Eq,
            0x15 => Neq,
            0x16 => Gt,
            0x17 => Gte,
            0x18 => Lt,
            0x19 => Lte,
            0x1a => Dup,
            0x1b => Pop,
            0x1c => Pushnil,
            0x1d => Pushi,
            0x1e => Pushf,
            0x1f => Pushs,
            0x20 => Pushcn,
            0x21 => Pushcc,
            0x22 => Pushl,
            0x23 => Lload,
            0x24 => Lstore,
            0x25 => Lremove,
            0x26 => Gload,
            0x27 => Gstore,
            0x28 => Pusht,
            0x29 => Tput,
            0x2a => Tget,
            0x2b => Callc,
            0x2c => Calls,
            0x2d => Ret0,
            0x2e => Ret1,
            _ => return Err(b),
        })
    }
}

impl FromStr for Opcode {
    type Err = AsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use strum::IntoEnumIterator;
        Opcode::iter()
            .find(|op| op.mnemonic() == s)
            .ok_or_else(|| AsmError::UnknownOpcode(s.to_string()))
    }
}
