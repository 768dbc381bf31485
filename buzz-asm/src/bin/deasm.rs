//! `deasm <in.bo> <in.bdbg> <out.basm>`: disassemble a container.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use buzz_asm::{disassemble, AsmError, BytecodeBlob, DebugInfo};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "deasm", about = "Disassemble Buzz bytecode into a .basm listing")]
struct Args {
    /// Input bytecode file.
    bytecode: PathBuf,
    /// Input debug-info file; may be absent.
    debug: PathBuf,
    /// Output assembly listing.
    output: PathBuf,
}

fn run(args: &Args) -> Result<(), AsmError> {
    let blob = BytecodeBlob::from_file(&args.bytecode)?;
    let dbg = DebugInfo::from_file(&args.debug)?;
    let listing = disassemble(&blob, &dbg)?;
    Ok(fs::write(&args.output, listing)?)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}: {e}", args.bytecode.display());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
