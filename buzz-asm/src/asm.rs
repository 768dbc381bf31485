//! Two-pass textual assembler.
//!
//! One record per line:
//!
//! ```text
//! !N                      string count declaration
//! 'STRING                 one interned string
//! @LABEL[|line,col,file]  label definition, optional debug location
//! OPCODE [ARG][|l,c,f]    instruction, optional debug location
//! # comment
//! ```
//!
//! Pass 1 emits bytes in order and collects label definitions plus a
//! back-patch entry for every label argument; pass 2 writes the resolved
//! offsets into the emitted stream.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::{ArgKind, AsmError, BytecodeBlob, DebugInfo, Diagnostic, Opcode};

/// A label argument occurrence waiting for resolution.
#[derive(Debug)]
struct BackPatch {
    /// Offset of the 4-byte slot to patch.
    at: usize,
    label: String,
    line: usize,
    col: usize,
}

/// Assemble a source listing into a bytecode blob and its debug sidecar.
///
/// `fname` is only used in diagnostics.
pub fn assemble(src: &str, fname: &str) -> Result<(BytecodeBlob, DebugInfo), Diagnostic> {
    let mut buf: Vec<u8> = Vec::with_capacity(256);
    let mut dbg = DebugInfo::new();
    let mut labels: BTreeMap<String, usize> = BTreeMap::new();
    let mut patches: Vec<BackPatch> = Vec::new();

    for (idx, raw) in src.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim_start();
        let col = raw.len() - line.len() + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // String line: verbatim content, zero-terminated in the table.
        if let Some(s) = line.strip_prefix('\'') {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            continue;
        }

        let line = line.trim_end();

        // String count marker.
        if let Some(n) = line.strip_prefix('!') {
            let count: u16 = n.trim().parse().map_err(|_| {
                AsmError::MissingArgument(format!("string count \"{n}\"")).at(fname, lineno, col)
            })?;
            buf.extend_from_slice(&count.to_le_bytes());
            continue;
        }

        // Label definition.
        if let Some(rest) = line.strip_prefix('@') {
            let (label, dbginfo) = split_debug(rest);
            if let Some((l, c, file)) = dbginfo {
                dbg.set(buf.len() as u32, l, c, file);
            }
            labels.insert(label.trim_end().to_string(), buf.len());
            continue;
        }

        // Instruction line.
        let (text, dbginfo) = split_debug(line);
        if let Some((l, c, file)) = dbginfo {
            dbg.set(buf.len() as u32, l, c, file);
        }
        let mut parts = text.split_whitespace();
        let mnemonic = parts.next().expect("non-empty line");
        let argstr = parts.next();
        let op: Opcode = mnemonic
            .parse()
            .map_err(|e: AsmError| e.at(fname, lineno, col))?;
        buf.push(op as u8);
        match op.arg_kind() {
            ArgKind::None => {
                if let Some(extra) = argstr {
                    warn!(file = fname, line = lineno, %op, %extra, "ignored argument");
                }
            }
            kind => {
                let arg = argstr.ok_or_else(|| {
                    AsmError::MissingArgument(op.to_string()).at(fname, lineno, col)
                })?;
                match kind {
                    ArgKind::Int => match arg.parse::<i32>() {
                        Ok(v) => buf.extend_from_slice(&v.to_le_bytes()),
                        // Closure offsets may be written as label names.
                        Err(_) => defer_label(&mut buf, &mut patches, arg, lineno, col),
                    },
                    ArgKind::Float => {
                        let v: f32 = arg.parse().map_err(|_| {
                            AsmError::MissingArgument(format!("float argument \"{arg}\""))
                                .at(fname, lineno, col)
                        })?;
                        buf.extend_from_slice(&v.to_le_bytes());
                    }
                    ArgKind::Label => defer_label(&mut buf, &mut patches, arg, lineno, col),
                    ArgKind::None => unreachable!(),
                }
            }
        }
    }

    // Pass 2: label substitution.
    let size = buf.len();
    for patch in patches {
        let target = *labels.get(&patch.label).ok_or_else(|| {
            AsmError::UnknownLabel(patch.label.clone()).at(fname, patch.line, patch.col)
        })?;
        if target >= size {
            return Err(AsmError::LabelOutOfRange {
                label: patch.label,
                target: target as u32,
                size: size as u32,
            }
            .at(fname, patch.line, patch.col));
        }
        buf[patch.at..patch.at + 4].copy_from_slice(&(target as u32).to_le_bytes());
    }

    let blob = BytecodeBlob::from_bytes(buf).map_err(|e| e.in_file(fname))?;
    Ok((blob, dbg))
}

/// Assemble a `.basm` file.
pub fn assemble_file(path: impl AsRef<Path>) -> Result<(BytecodeBlob, DebugInfo), Diagnostic> {
    let path = path.as_ref();
    let fname = path.display().to_string();
    let src = fs::read_to_string(path).map_err(|e| AsmError::from(e).in_file(&fname))?;
    assemble(&src, &fname)
}

fn defer_label(buf: &mut Vec<u8>, patches: &mut Vec<BackPatch>, label: &str, line: usize, col: usize) {
    patches.push(BackPatch {
        at: buf.len(),
        label: label.to_string(),
        line,
        col,
    });
    buf.extend_from_slice(&[0; 4]);
}

/// Split an instruction or label line from its `|line,col,file` suffix.
fn split_debug(line: &str) -> (&str, Option<(u64, u64, &str)>) {
    let Some((text, info)) = line.split_once('|') else {
        return (line, None);
    };
    let mut fields = info.splitn(3, ',');
    let l = fields.next().and_then(|f| f.trim().parse().ok());
    let c = fields.next().and_then(|f| f.trim().parse().ok());
    let file = fields.next().map(str::trim);
    match (l, c, file) {
        (Some(l), Some(c), Some(file)) if !file.is_empty() => (text, Some((l, c, file))),
        _ => (text, None),
    }
}
