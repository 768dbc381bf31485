//! Runtime error types.
//!
//! Instruction failures never unwind out of the VM: they are recorded as a
//! terminal `(state = Error, kind, pc)` triple. [`ErrorKind`] is that
//! taxonomy; [`VmError`] is the host-facing wrapper used by loading and the
//! registration API.

use core::fmt;
use std::io;
use thiserror::Error;

use crate::value::TypeTag;

/// Why a program died. Set once, fatal to the current program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum ErrorKind {
    /// Pop with the stack height below the required floor.
    StackUnderflow = 0x01,
    /// The frame stack exceeded the host-chosen limit.
    StackOverflow = 0x02,
    /// An instruction received an operand of the wrong tag.
    TypeError = 0x03,
    /// Integer division or modulo with a zero divisor.
    DivByZero = 0x04,
    /// A computed jump target landed outside the bytecode.
    PcOutOfRange = 0x05,
    /// Global lookup of an unknown symbol under strict scoping.
    NoSuchSymbol = 0x06,
    /// `function_call` of a name that is not a closure.
    NoSuchFunction = 0x07,
    /// A call through an invalid closure target.
    NoSuchClosure = 0x08,
    /// A byte outside the defined opcode range.
    UnknownOpcode = 0x09,
    /// Virtual-stigmergy monotonicity violation.
    VstigViolation = 0x0a,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StackUnderflow => "stack underflow",
            ErrorKind::StackOverflow => "stack overflow",
            ErrorKind::TypeError => "type mismatch",
            ErrorKind::DivByZero => "division by zero",
            ErrorKind::PcOutOfRange => "program counter out of range",
            ErrorKind::NoSuchSymbol => "no such symbol",
            ErrorKind::NoSuchFunction => "no such function",
            ErrorKind::NoSuchClosure => "no such closure",
            ErrorKind::UnknownOpcode => "unknown opcode",
            ErrorKind::VstigViolation => "virtual stigmergy monotonicity violation",
        };
        f.write_str(name)
    }
}

impl ErrorKind {
    /// Build the type-mismatch kind while logging what was expected; the
    /// taxonomy itself stays a bare discriminant.
    pub fn type_mismatch(expected: TypeTag, got: TypeTag) -> Self {
        tracing::debug!(%expected, %got, "type mismatch");
        ErrorKind::TypeError
    }
}

/// Host-facing runtime error.
#[derive(Debug, Error)]
pub enum VmError {
    /// The program died; the triple mirrors the VM's terminal state.
    #[error("execution error: {kind} at pc {pc}")]
    Runtime {
        /// Failure taxonomy entry.
        kind: ErrorKind,
        /// Program counter at the failing instruction.
        pc: usize,
    },
    /// The bytecode container could not be decoded.
    #[error("malformed bytecode: {0}")]
    Bytecode(#[from] buzz_asm::AsmError),
    /// The VM is not in the `Ready` state.
    #[error("the VM is not ready (state is {0})")]
    NotReady(crate::state::VmState),
    /// I/O and OS related errors.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn kinds_are_nonzero_and_distinct() {
        let mut seen = std::collections::BTreeSet::new();
        for kind in ErrorKind::iter() {
            assert_ne!(kind as u8, 0);
            assert!(seen.insert(kind as u8));
        }
        assert_eq!(seen.len(), 10);
    }
}
