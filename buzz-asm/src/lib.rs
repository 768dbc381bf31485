//! Instruction set, bytecode container and assembler for the Buzz VM.
//!
//! The crate owns everything that exists before a program runs: the opcode
//! enumeration and its immediate encoding, the `.bo` container with its
//! string table, the `.bdbg` debug sidecar, and the textual assembler and
//! disassembler that convert between `.basm` listings and containers.

#![warn(missing_docs)]

pub mod asm;
mod bytecode;
mod debug;
pub mod deasm;
mod error;
mod opcode;

pub use asm::{assemble, assemble_file};
pub use bytecode::{BytecodeBlob, Instr, InstrArg, InstrIter};
pub use deasm::disassemble;
pub use debug::{DebugInfo, SourceLoc};
pub use error::{AsmError, Diagnostic};
pub use opcode::{ArgKind, Opcode};
