//! Assembler and bytecode container error types.

use core::fmt;
use std::io;
use thiserror::Error;

/// Errors produced while assembling, disassembling or decoding bytecode.
///
/// Unlike VM runtime failures these are recoverable: the command-line tools
/// report them as diagnostics and exit with a non-zero status.
#[derive(Debug, Error)]
pub enum AsmError {
    /// An instruction that requires an immediate had none, or the bytecode
    /// stream ended in the middle of one.
    #[error("missing argument for \"{0}\"")]
    MissingArgument(String),
    /// Unrecognized mnemonic in a source line, or a byte outside the opcode
    /// range in a bytecode stream.
    #[error("unknown instruction \"{0}\"")]
    UnknownOpcode(String),
    /// A label argument never defined with a `@label` line.
    #[error("unknown label \"{0}\"")]
    UnknownLabel(String),
    /// A label resolved past the end of the emitted bytecode.
    #[error("label \"{label}\" at {target} is beyond the bytecode size {size}")]
    LabelOutOfRange {
        /// Label name.
        label: String,
        /// Offset the label resolved to.
        target: u32,
        /// Total bytecode size.
        size: u32,
    },
    /// I/O and OS related errors.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AsmError {
    /// Process exit code for the command-line tools: 1 for I/O, 2 for parse.
    pub const fn exit_code(&self) -> i32 {
        match self {
            AsmError::Io(_) => 1,
            _ => 2,
        }
    }

    /// Attach a source location, producing a printable diagnostic.
    pub fn at(self, file: impl Into<String>, line: usize, col: usize) -> Diagnostic {
        Diagnostic {
            file: file.into(),
            line: Some((line, col)),
            kind: self,
        }
    }

    /// Attach only a file name, for errors with no meaningful line.
    pub fn in_file(self, file: impl Into<String>) -> Diagnostic {
        Diagnostic {
            file: file.into(),
            line: None,
            kind: self,
        }
    }
}

/// An [`AsmError`] with the source position it was detected at.
#[derive(Debug)]
pub struct Diagnostic {
    file: String,
    line: Option<(usize, usize)>,
    kind: AsmError,
}

impl Diagnostic {
    /// The underlying error.
    pub const fn kind(&self) -> &AsmError {
        &self.kind
    }

    /// Process exit code, forwarded from the underlying error.
    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some((line, col)) => write!(f, "{}:{}:{}: {}", self.file, line, col, self.kind),
            None => write!(f, "{}: {}", self.file, self.kind),
        }
    }
}

impl std::error::Error for Diagnostic {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<io::Error> for Diagnostic {
    fn from(e: io::Error) -> Self {
        AsmError::from(e).in_file("<io>")
    }
}
