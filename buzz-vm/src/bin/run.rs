//! `run [--trace] <prog.bo>`: execute a program until done or dead.

use std::path::PathBuf;
use std::process::ExitCode;

use buzz_asm::DebugInfo;
use buzz_vm::prelude::*;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "run", about = "Run a Buzz bytecode program")]
struct Args {
    /// Dump the VM state before each step.
    #[arg(long)]
    trace: bool,
    /// Bytecode program.
    program: PathBuf,
    /// Robot id to run under.
    #[arg(long, default_value_t = 0)]
    robot: u16,
}

fn dump_state(vm: &Vm) {
    let instr = vm
        .bcode()
        .fetch(vm.pc())
        .map(|i| i.to_string())
        .unwrap_or_else(|e| format!("<{e}>"));
    eprintln!(
        "pc={:5}  state={}  depth={}  stack={}  next: {}",
        vm.pc(),
        vm.state(),
        vm.call_depth(),
        vm.stack_height(),
        instr,
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut vm = match Vm::from_file(&args.program, args.robot) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("ERROR: {}: {e}", args.program.display());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = install_stdlib(&mut vm) {
        eprintln!("ERROR: installing the standard library: {e}");
        return ExitCode::FAILURE;
    }

    if args.trace {
        while vm.state().is_ready() {
            dump_state(&vm);
            vm.step();
        }
    } else {
        vm.execute();
    }

    match vm.state() {
        VmState::Done => ExitCode::SUCCESS,
        state => {
            if let Some(err) = vm.error() {
                // Point back at the source when a debug sidecar sits next
                // to the program.
                let loc = DebugInfo::from_file(args.program.with_extension("bdbg"))
                    .ok()
                    .and_then(|dbg| dbg.get(err.pc as u32).cloned())
                    .map(|loc| format!(" ({}:{}:{})", loc.file, loc.line, loc.col))
                    .unwrap_or_default();
                eprintln!("ERROR: {}: {} at pc {}{loc}", args.program.display(), err.kind, err.pc);
            } else {
                eprintln!("ERROR: {}: stopped in state {state}", args.program.display());
            }
            ExitCode::FAILURE
        }
    }
}
