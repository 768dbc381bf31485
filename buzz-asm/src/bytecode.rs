//! The `.bo` bytecode container.
//!
//! A container is a single byte buffer: a little-endian `u16` string count,
//! that many zero-terminated UTF-8 strings, then the instruction stream.
//! Jump targets, closure offsets and the VM program counter all index the
//! whole buffer, string table included; execution starts at
//! [`BytecodeBlob::code_start`].

use core::fmt;
use std::fs;
use std::path::Path;

use crate::{ArgKind, AsmError, Opcode};

/// Immediate argument decoded from the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstrArg {
    /// Two's-complement integer immediate.
    Int(i32),
    /// IEEE-754 float immediate.
    Float(f32),
    /// Absolute bytecode offset, as written by label resolution.
    Offset(u32),
}

impl fmt::Display for InstrArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrArg::Int(i) => write!(f, "{i}"),
            InstrArg::Float(x) => write!(f, "{x:?}"),
            InstrArg::Offset(o) => write!(f, "{o}"),
        }
    }
}

/// A decoded instruction: opcode plus optional immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    /// The opcode.
    pub op: Opcode,
    /// The immediate, when [`Opcode::arg_kind`] requires one.
    pub arg: Option<InstrArg>,
}

impl Instr {
    /// Encoded length in bytes.
    pub const fn len(&self) -> usize {
        self.op.len()
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arg {
            Some(arg) => write!(f, "{} {arg}", self.op),
            None => write!(f, "{}", self.op),
        }
    }
}

/// An immutable, loaded bytecode container.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BytecodeBlob {
    bytes: Vec<u8>,
    code_start: usize,
    strings: Vec<String>,
}

impl BytecodeBlob {
    /// Decode a container from its raw bytes, validating the string table.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AsmError> {
        if bytes.len() < 2 {
            return Err(AsmError::MissingArgument("string count".into()));
        }
        let count = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut strings = Vec::with_capacity(count as usize);
        let mut at = 2usize;
        for _ in 0..count {
            let start = at;
            while at < bytes.len() && bytes[at] != 0 {
                at += 1;
            }
            if at >= bytes.len() {
                return Err(AsmError::MissingArgument(format!(
                    "string table ({} strings still to parse)",
                    count as usize - strings.len()
                )));
            }
            let s = String::from_utf8_lossy(&bytes[start..at]).into_owned();
            strings.push(s);
            at += 1;
        }
        Ok(Self {
            bytes,
            code_start: at,
            strings,
        })
    }

    /// Load a container from a `.bo` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AsmError> {
        Self::from_bytes(fs::read(path)?)
    }

    /// Write the container to a `.bo` file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), AsmError> {
        Ok(fs::write(path, &self.bytes)?)
    }

    /// The raw container bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total container size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` when the container holds no strings and no code.
    pub fn is_empty(&self) -> bool {
        self.code_start >= self.bytes.len() && self.strings.is_empty()
    }

    /// Offset of the first instruction, right past the string table.
    pub const fn code_start(&self) -> usize {
        self.code_start
    }

    /// The decoded string table, in id order.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// The string at the given table index.
    pub fn string(&self, idx: usize) -> Option<&str> {
        self.strings.get(idx).map(String::as_str)
    }

    /// The raw byte at an offset.
    pub fn byte_at(&self, off: usize) -> Option<u8> {
        self.bytes.get(off).copied()
    }

    fn read_u32(&self, off: usize) -> Option<u32> {
        let b = self.bytes.get(off..off + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Decode the instruction starting at an offset.
    ///
    /// Fails with [`AsmError::UnknownOpcode`] for a byte outside the opcode
    /// range and [`AsmError::MissingArgument`] for a truncated immediate.
    pub fn fetch(&self, off: usize) -> Result<Instr, AsmError> {
        let byte = self
            .byte_at(off)
            .ok_or_else(|| AsmError::MissingArgument(format!("opcode at {off}")))?;
        let op = Opcode::try_from(byte)
            .map_err(|b| AsmError::UnknownOpcode(format!("{b} at {off}")))?;
        let arg = match op.arg_kind() {
            ArgKind::None => None,
            kind => {
                let raw = self.read_u32(off + 1).ok_or_else(|| {
                    AsmError::MissingArgument(format!("argument of {op} at {off}"))
                })?;
                Some(match kind {
                    ArgKind::Int => InstrArg::Int(raw as i32),
                    ArgKind::Float => InstrArg::Float(f32::from_bits(raw)),
                    ArgKind::Label => InstrArg::Offset(raw),
                    ArgKind::None => unreachable!(),
                })
            }
        };
        Ok(Instr { op, arg })
    }

    /// Iterate the instruction stream as `(offset, instruction)` pairs.
    pub fn instructions(&self) -> InstrIter<'_> {
        InstrIter {
            blob: self,
            at: self.code_start,
        }
    }
}

/// Iterator over the decoded instruction stream of a blob.
#[derive(Debug)]
pub struct InstrIter<'a> {
    blob: &'a BytecodeBlob,
    at: usize,
}

impl Iterator for InstrIter<'_> {
    type Item = (usize, Result<Instr, AsmError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.at >= self.blob.len() {
            return None;
        }
        let off = self.at;
        let item = self.blob.fetch(off);
        match &item {
            Ok(instr) => self.at += instr.len(),
            // Decoding cannot resume past a malformed instruction.
            Err(_) => self.at = self.blob.len(),
        }
        Some((off, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(strings: &[&str], code: &[u8]) -> Vec<u8> {
        let mut bytes = (strings.len() as u16).to_le_bytes().to_vec();
        for s in strings {
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
        }
        bytes.extend_from_slice(code);
        bytes
    }

    #[test]
    fn decodes_string_table() {
        let b = BytecodeBlob::from_bytes(blob(&["hi", "bye"], &[0x00])).unwrap();
        assert_eq!(b.strings(), ["hi".to_string(), "bye".to_string()]);
        assert_eq!(b.code_start(), 2 + 3 + 4);
        assert_eq!(b.byte_at(b.code_start()), Some(0x00));
    }

    #[test]
    fn rejects_truncated_string_table() {
        let mut bytes = 3u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"only\0one\0");
        assert!(matches!(
            BytecodeBlob::from_bytes(bytes),
            Err(AsmError::MissingArgument(_))
        ));
    }

    #[test]
    fn fetches_immediates() {
        let mut code = vec![Opcode::Pushi as u8];
        code.extend_from_slice(&42i32.to_le_bytes());
        code.push(Opcode::Pushf as u8);
        code.extend_from_slice(&1.5f32.to_le_bytes());
        code.push(Opcode::Done as u8);
        let b = BytecodeBlob::from_bytes(blob(&[], &code)).unwrap();

        let (off, i) = b.instructions().next().unwrap();
        assert_eq!(off, b.code_start());
        assert_eq!(i.unwrap().arg, Some(InstrArg::Int(42)));

        let all: Vec<_> = b.instructions().map(|(_, i)| i.unwrap()).collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].arg, Some(InstrArg::Float(1.5)));
        assert_eq!(all[2].op, Opcode::Done);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let b = BytecodeBlob::from_bytes(blob(&[], &[0xee])).unwrap();
        assert!(matches!(
            b.fetch(b.code_start()),
            Err(AsmError::UnknownOpcode(_))
        ));
    }

    #[test]
    fn rejects_truncated_immediate() {
        let b = BytecodeBlob::from_bytes(blob(&[], &[Opcode::Pushi as u8, 1, 2])).unwrap();
        assert!(matches!(
            b.fetch(b.code_start()),
            Err(AsmError::MissingArgument(_))
        ));
    }
}
