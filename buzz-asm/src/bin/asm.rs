//! `asm <in.basm> <out.bo> <out.bdbg>`: assemble a listing.

use std::path::PathBuf;
use std::process::ExitCode;

use buzz_asm::assemble_file;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "asm", about = "Assemble a Buzz .basm listing into bytecode")]
struct Args {
    /// Input assembly listing.
    input: PathBuf,
    /// Output bytecode file.
    bytecode: PathBuf,
    /// Output debug-info file.
    debug: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let (blob, dbg) = match assemble_file(&args.input) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };
    if let Err(e) = blob.to_file(&args.bytecode).and_then(|()| dbg.to_file(&args.debug)) {
        eprintln!("ERROR: {e}");
        return ExitCode::from(e.exit_code() as u8);
    }
    ExitCode::SUCCESS
}
