//! Disassembler: binary container back to an assemblable listing.
//!
//! Jump targets (and closure offsets pointing into the code region) are
//! rendered as synthetic `@L<n>` labels numbered in offset order, so a
//! listing survives an assemble/disassemble round trip modulo label names.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::{AsmError, BytecodeBlob, DebugInfo, Instr, InstrArg, Opcode};

/// Disassemble a blob (and its optional debug info) into source text.
pub fn disassemble(blob: &BytecodeBlob, dbg: &DebugInfo) -> Result<String, AsmError> {
    // First sweep: collect every offset that needs a label.
    let mut targets: BTreeSet<usize> = BTreeSet::new();
    for (_, instr) in blob.instructions() {
        let instr = instr?;
        if let Some(target) = label_target(blob, &instr) {
            targets.insert(target);
        }
    }
    let label_of = |off: usize| -> usize {
        targets.iter().position(|t| *t == off).expect("collected target")
    };

    let mut out = String::new();
    writeln!(out, "!{}", blob.strings().len()).expect("infallible write");
    for s in blob.strings() {
        writeln!(out, "'{s}").expect("infallible write");
    }
    for (off, instr) in blob.instructions() {
        let instr = instr?;
        if targets.contains(&off) {
            writeln!(out, "@L{}", label_of(off)).expect("infallible write");
        }
        match label_target(blob, &instr) {
            Some(target) => write!(out, "{} L{}", instr.op, label_of(target)),
            None => write!(out, "{instr}"),
        }
        .expect("infallible write");
        if let Some(loc) = dbg.get(off as u32) {
            write!(out, "\t|{},{},{}", loc.line, loc.col, loc.file).expect("infallible write");
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a single instruction, raw offsets and all. Used by trace output.
pub fn disassemble_instr(blob: &BytecodeBlob, off: usize) -> Result<Instr, AsmError> {
    blob.fetch(off)
}

/// The offset an instruction argument refers to, when it should be shown as
/// a label.
fn label_target(blob: &BytecodeBlob, instr: &Instr) -> Option<usize> {
    match (instr.op, instr.arg) {
        (_, Some(InstrArg::Offset(target))) => Some(target as usize),
        // Closure targets are plain integers in the stream, but they name
        // code offsets and reassemble cleanly as labels.
        (Opcode::Pushcc | Opcode::Pushl, Some(InstrArg::Int(target))) => {
            let target = usize::try_from(target).ok()?;
            (target >= blob.code_start() && target < blob.len()).then_some(target)
        }
        _ => None,
    }
}
