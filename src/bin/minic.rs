//! The compiler's command-line entry point. Parses a `.mini` file and drives
//! it through the front end, middle end, and a target printer, then on to
//! the host C compiler.
//!
//! run with `--help` for more info.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use minic::driver::{self, Options, Passes, Target};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input .mini file
    file: PathBuf,
    /// emit the textual IR/assembly file and do not invoke the host compiler
    #[arg(short = 'S', default_value_t = false)]
    emit_only: bool,
    /// rewrite tail-recursive calls into loops
    #[arg(long, default_value_t = false)]
    tail: bool,
    /// emit ARM64 assembly instead of LLVM IR
    #[arg(long, default_value_t = false)]
    arm: bool,
    /// construct SSA before printing
    #[arg(long, default_value_t = false)]
    ssa: bool,
    /// run sparse simple constant propagation (requires --ssa)
    #[arg(long, default_value_t = false, requires = "ssa")]
    sscp: bool,
    /// run unused-result elimination (requires --ssa)
    #[arg(long, default_value_t = false, requires = "ssa")]
    unused: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let opts = Options {
        emit_only: args.emit_only,
        target: if args.arm { Target::Arm } else { Target::Llvm },
        passes: Passes { tail: args.tail, ssa: args.ssa, sscp: args.sscp, unused: args.unused },
    };

    match driver::compile_file(&args.file, &opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("minic: {e}");
            ExitCode::FAILURE
        }
    }
}
