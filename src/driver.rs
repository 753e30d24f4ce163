//! Ties the pipeline stages together: read a `.mini` file, run it through the
//! front end, middle end, and a target printer, then hand the result to the
//! host C compiler. This is pure wiring, not compiler engineering.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::back;
use crate::front::{check, parse};
use crate::middle::{aasm, cfg, sscp, tailrec, ssa, unused};

/// Runtime sources linked in alongside the compiled program. Kept as a
/// compiled-in string rather than a path so the driver doesn't depend on
/// being run from any particular working directory.
const RUNTIME_C: &str = include_str!("../demos/util.c");

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}: input file must end in .mini")]
    BadExtension(String),
    #[error("{0}: {1}")]
    Io(String, std::io::Error),
    #[error("{0}")]
    Parse(#[from] parse::ParseError),
    #[error("{0}")]
    Check(#[from] check::CheckError),
    #[error("clang: {0}")]
    Clang(String),
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Which target printer to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Llvm,
    Arm,
}

/// Which optional middle-end passes to run, mirroring the CLI flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passes {
    pub tail: bool,
    pub ssa: bool,
    pub sscp: bool,
    pub unused: bool,
}

/// Full set of knobs the CLI exposes.
pub struct Options {
    pub emit_only: bool,
    pub target: Target,
    pub passes: Passes,
}

/// Run the full pipeline on `path` and return the text of the emitted IR or
/// assembly, without touching the filesystem beyond reading `path`. Exposed
/// separately from [`compile_file`] so tests can assert on pipeline output
/// without needing a host compiler.
pub fn compile_to_text(path: &Path, opts: &Options) -> Result<String, DriverError> {
    let source = fs::read_to_string(path).map_err(|e| DriverError::Io(display_path(path), e))?;
    let mut ast = parse::parse(&source)?;
    check::check(&mut ast)?;

    let mut prog = cfg::build(&ast);

    if opts.passes.tail {
        for func in prog.functions.values_mut() {
            tailrec::apply(func);
        }
    }

    aasm::lower(&mut prog);

    if opts.passes.ssa {
        ssa::apply(&mut prog);
        if opts.passes.sscp {
            sscp::apply(&mut prog);
        }
        if opts.passes.unused {
            unused::apply(&mut prog);
        }
    }

    let text = match opts.target {
        Target::Llvm => back::llvm::emit(&prog, opts.passes.ssa),
        Target::Arm => back::arm::emit(&prog, opts.passes.ssa),
    };
    Ok(text)
}

/// Output file extension for a target, matching the CLI contract (`.ll` for
/// LLVM IR, `.s` for ARM64 assembly).
fn ir_extension(target: Target) -> &'static str {
    match target {
        Target::Llvm => "ll",
        Target::Arm => "s",
    }
}

/// Compile `path` end to end: write the intermediate file, and unless
/// `emit_only` is set, invoke the host C compiler to produce `<stem>` and
/// remove the intermediate afterwards.
pub fn compile_file(path: &Path, opts: &Options) -> Result<(), DriverError> {
    if path.extension().and_then(|e| e.to_str()) != Some("mini") {
        return Err(DriverError::BadExtension(display_path(path)));
    }

    let text = compile_to_text(path, opts)?;

    let stem = path.with_extension("");
    let ir_path = stem.with_extension(ir_extension(opts.target));
    fs::write(&ir_path, &text).map_err(|e| DriverError::Io(display_path(&ir_path), e))?;

    if opts.emit_only {
        return Ok(());
    }

    let runtime_path = stem.with_extension("runtime.c");
    fs::write(&runtime_path, RUNTIME_C).map_err(|e| DriverError::Io(display_path(&runtime_path), e))?;

    let output = Command::new("clang")
        .arg(&runtime_path)
        .arg(&ir_path)
        .arg("-o")
        .arg(&stem)
        .output()
        .map_err(|e| DriverError::Clang(format!("failed to run clang: {e}")))?;

    fs::remove_file(&runtime_path).ok();
    fs::remove_file(&ir_path).ok();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Clang(stderr.trim().to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mini(name: &str, src: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(src.as_bytes()).unwrap();
        path
    }

    #[test]
    fn rejects_wrong_extension() {
        let path = write_mini("driver_test_bad_ext.txt", "fun main()->int { return 0; }");
        let opts = Options { emit_only: true, target: Target::Llvm, passes: Passes::default() };
        let err = compile_file(&path, &opts).unwrap_err();
        assert!(matches!(err, DriverError::BadExtension(_)));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn emits_llvm_ir_for_trivial_program() {
        let path = write_mini("driver_test_trivial.mini", "fun main()->int { return 0; }");
        let opts = Options { emit_only: true, target: Target::Llvm, passes: Passes::default() };
        let text = compile_to_text(&path, &opts).unwrap();
        assert!(text.contains("define i64 @main()"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn emits_arm_assembly_when_requested() {
        let path = write_mini("driver_test_arm.mini", "fun main()->int { return 0; }");
        let opts = Options { emit_only: true, target: Target::Arm, passes: Passes::default() };
        let text = compile_to_text(&path, &opts).unwrap();
        assert!(text.contains("main:"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn constant_folding_removes_binary_on_immediates() {
        let path = write_mini(
            "driver_test_fold.mini",
            "fun f()->bool { return 1+2*3<10 && true; } fun main()->int { return 0; }",
        );
        let opts = Options {
            emit_only: true,
            target: Target::Llvm,
            passes: Passes { tail: false, ssa: true, sscp: true, unused: true },
        };
        let text = compile_to_text(&path, &opts).unwrap();
        assert!(!text.contains("add i64"), "expected folded constants, got:\n{text}");
        fs::remove_file(&path).ok();
    }
}
