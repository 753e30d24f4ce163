//! ARM64 (AAPCS64) assembly printer.
//!
//! This backend does no register allocation: every AASM `Var` and every
//! named local gets its own 8-byte stack slot, and each instruction is
//! lowered independently through a handful of scratch registers
//! (`x9`-`x12`) whose use never spans an instruction boundary. AAPCS64
//! conventions: `x0`-`x7` argument/return registers, `x9`-`x15`
//! caller-saved temporaries, `x29`/`x30` frame pointer/link register. A
//! global is a real memory symbol (`adrp`/`add`/`:lo12:`); a local or SSA
//! temporary is a frame slot. No effort goes into instruction selection or
//! peephole cleanup — this backend exists so `--arm` produces correct
//! output, not fast output.

use std::fmt::Write as _;

use crate::common::Id;
use crate::front::ast::Type;
use crate::middle::aasm::{BinOp, Ins, Operand, Value};
use crate::middle::cfg::{self, BlockId, Function, Program};

const SCRATCH: [&str; 4] = ["x9", "x10", "x11", "x12"];

/// Where one operand's current value lives: a frame-relative stack slot (a
/// named local or an AASM `Var`) or a linker symbol (a global).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Slot {
    Local(Id),
    Var(u32),
}

struct Frame {
    offsets: crate::common::Map<Slot, i32>,
    locals_size: i32,
}

fn collect_slots(func: &Function) -> crate::common::Set<Slot> {
    let mut slots = crate::common::Set::new();
    for param in &func.parameters {
        slots.insert(Slot::Local(param.id));
    }
    let mut note = |op: &Operand| match op.value {
        Value::Local(id) => {
            slots.insert(Slot::Local(id));
        }
        Value::Var(v) => {
            slots.insert(Slot::Var(v));
        }
        _ => {}
    };
    for b in cfg::pre_order(func.entry, &func.arena) {
        for ins in &func.arena.get(b).insns {
            if let Some(t) = crate::middle::aasm::result_of(ins) {
                note(t);
            }
            crate::middle::aasm::for_each_operand(ins, &mut note);
        }
    }
    slots
}

fn build_frame(func: &Function) -> Frame {
    let slots = collect_slots(func);
    let mut offsets = crate::common::Map::new();
    let mut off = 0i32;
    for slot in slots {
        off += 8;
        offsets.insert(slot, off);
    }
    let locals_size = (off + 15) / 16 * 16;
    Frame { offsets, locals_size }
}

impl Frame {
    fn offset(&self, slot: Slot) -> i32 {
        self.offsets[&slot]
    }
}

fn global_sym(id: Id) -> String {
    format!("_mini_global_{id}")
}

/// Materialize an operand's *value* into `dst`: an immediate move for
/// literals, a frame-slot load for a local/temporary, or a page/offset
/// address computation followed by a load for a global.
fn read_value(out: &mut String, frame: &Frame, op: &Operand, dst: &str) {
    match op.value {
        Value::Imm(i) => writeln!(out, "    mov {dst}, #{i}").unwrap(),
        Value::ImmB(b) => writeln!(out, "    mov {dst}, #{}", b as i64).unwrap(),
        Value::Null => writeln!(out, "    mov {dst}, #0").unwrap(),
        Value::Local(id) => writeln!(out, "    ldr {dst}, [x29, #-{}]", frame.offset(Slot::Local(id))).unwrap(),
        Value::Var(v) => writeln!(out, "    ldr {dst}, [x29, #-{}]", frame.offset(Slot::Var(v))).unwrap(),
        Value::Global(id) => {
            let sym = global_sym(id);
            writeln!(out, "    adrp {dst}, {sym}").unwrap();
            writeln!(out, "    add {dst}, {dst}, :lo12:{sym}").unwrap();
            writeln!(out, "    ldr {dst}, [{dst}]").unwrap();
        }
    }
}

/// Store `src` into the frame slot backing a `Var`/`Local` operand (never a
/// global or an immediate: those never appear as instruction results).
fn write_slot(out: &mut String, frame: &Frame, op: &Operand, src: &str) {
    let slot = match op.value {
        Value::Var(v) => Slot::Var(v),
        Value::Local(id) => Slot::Local(id),
        _ => unreachable!("instruction results are always Var or, for parameters, Local"),
    };
    writeln!(out, "    str {src}, [x29, #-{}]", frame.offset(slot)).unwrap();
}

/// Read through one level of pointer indirection for the `ptr`/`base`
/// operand of `Load`/`Gep`: a `Local`/`Global` operand *is* the addressed
/// value (no indirection, matching the LLVM printer's pre-alloca model); a
/// `Var` operand holds a genuine heap pointer computed earlier (by a prior
/// `Gep`, `NewS`, or `NewA`) and must be dereferenced.
fn read_through(out: &mut String, frame: &Frame, ptr: &Operand, dst: &str) {
    match ptr.value {
        Value::Var(_) => {
            read_value(out, frame, ptr, SCRATCH[3]);
            writeln!(out, "    ldr {dst}, [{}]", SCRATCH[3]).unwrap();
        }
        _ => read_value(out, frame, ptr, dst),
    }
}

fn write_through(out: &mut String, frame: &Frame, ptr: &Operand, src: &str) {
    match ptr.value {
        Value::Var(_) => {
            read_value(out, frame, ptr, SCRATCH[3]);
            writeln!(out, "    str {src}, [{}]", SCRATCH[3]).unwrap();
        }
        Value::Local(_) => write_slot(out, frame, ptr, src),
        Value::Global(id) => {
            let sym = global_sym(id);
            writeln!(out, "    adrp {}, {sym}", SCRATCH[3]).unwrap();
            writeln!(out, "    add {0}, {0}, :lo12:{sym}", SCRATCH[3]).unwrap();
            writeln!(out, "    str {src}, [{}]", SCRATCH[3]).unwrap();
        }
        Value::Imm(_) | Value::ImmB(_) | Value::Null => unreachable!("store target is never a literal"),
    }
}

fn binop_mnemonic(op: BinOp) -> Option<&'static str> {
    use BinOp::*;
    match op {
        Add => Some("add"),
        Sub => Some("sub"),
        Mul => Some("mul"),
        Div => Some("sdiv"),
        Xor => Some("eor"),
        And => Some("and"),
        Or => Some("orr"),
        _ => None,
    }
}

fn cond_suffix(op: BinOp) -> &'static str {
    use BinOp::*;
    match op {
        Eq => "eq",
        Ne => "ne",
        Gt => "gt",
        Ge => "ge",
        Lt => "lt",
        Le => "le",
        _ => unreachable!("not a comparison"),
    }
}

/// Assigns each reachable block a dense label number in pre-order, so
/// `lN` is stable within one compilation.
fn label_of(func: &Function) -> crate::common::Map<BlockId, u32> {
    cfg::pre_order(func.entry, &func.arena).into_iter().enumerate().map(|(i, b)| (b, i as u32)).collect()
}

/// Out-of-SSA copy insertion: every phi in `to` with a binding for `from`
/// gets that binding copied into the phi's target slot. Called at the point
/// in `from`'s text where control is about to transfer to `to` — once per
/// edge, so a conditional branch's two successors each get their own copies
/// on their own path (see `print_terminator`).
fn phi_copies(out: &mut String, frame: &Frame, func: &Function, from: BlockId, to: BlockId) {
    for ins in &func.arena.get(to).insns {
        if let Ins::Phi { target, bindings, .. } = ins {
            if let Some(value) = bindings.get(&from) {
                read_value(out, frame, value, SCRATCH[0]);
                write_slot(out, frame, target, SCRATCH[0]);
            }
        }
    }
}

fn print_terminator(out: &mut String, frame: &Frame, func: &Function, block_id: BlockId, ins: &Ins, labels: &crate::common::Map<BlockId, u32>) {
    match ins {
        Ins::Jump(next) => {
            phi_copies(out, frame, func, block_id, *next);
            writeln!(out, "    b l{}", labels[next]).unwrap();
        }
        Ins::Br { guard, tru, fals } => {
            read_value(out, frame, guard, SCRATCH[0]);
            let trampoline = format!(".Lt{}", labels[&block_id]);
            writeln!(out, "    cbnz {}, {trampoline}", SCRATCH[0]).unwrap();
            phi_copies(out, frame, func, block_id, *fals);
            writeln!(out, "    b l{}", labels[fals]).unwrap();
            writeln!(out, "{trampoline}:").unwrap();
            phi_copies(out, frame, func, block_id, *tru);
            writeln!(out, "    b l{}", labels[tru]).unwrap();
        }
        _ => unreachable!("print_terminator only called on Jump/Br"),
    }
}

fn print_ins(out: &mut String, frame: &Frame, func: &Function, returns: &crate::common::Map<Id, Type>, block_id: BlockId, ins: &Ins, labels: &crate::common::Map<BlockId, u32>) {
    match ins {
        Ins::Binary { op, target, left, right } => {
            read_value(out, frame, left, SCRATCH[0]);
            read_value(out, frame, right, SCRATCH[1]);
            if let Some(mn) = binop_mnemonic(*op) {
                writeln!(out, "    {mn} {}, {}, {}", SCRATCH[2], SCRATCH[0], SCRATCH[1]).unwrap();
            } else {
                writeln!(out, "    cmp {}, {}", SCRATCH[0], SCRATCH[1]).unwrap();
                writeln!(out, "    cset {}, {}", SCRATCH[2], cond_suffix(*op)).unwrap();
            }
            write_slot(out, frame, target, SCRATCH[2]);
        }
        Ins::Load { target, ptr } => {
            read_through(out, frame, ptr, SCRATCH[0]);
            write_slot(out, frame, target, SCRATCH[0]);
        }
        Ins::Store { value, ptr } => {
            read_value(out, frame, value, SCRATCH[0]);
            write_through(out, frame, ptr, SCRATCH[0]);
        }
        Ins::Gep { target, base, index } => {
            read_value(out, frame, base, SCRATCH[0]);
            read_value(out, frame, index, SCRATCH[1]);
            writeln!(out, "    lsl {}, {}, #3", SCRATCH[1], SCRATCH[1]).unwrap();
            writeln!(out, "    add {}, {}, {}", SCRATCH[2], SCRATCH[0], SCRATCH[1]).unwrap();
            write_slot(out, frame, target, SCRATCH[2]);
        }
        Ins::NewS { .. } | Ins::NewA { .. } => unreachable!("NewS/NewA are dispatched to print_new before print_ins is called"),
        Ins::Free(value) => {
            read_value(out, frame, value, "x0");
            writeln!(out, "    bl free").unwrap();
        }
        Ins::Call { target, callee, args } => {
            for (i, arg) in args.iter().enumerate() {
                read_value(out, frame, arg, &format!("x{i}"));
            }
            writeln!(out, "    bl {callee}").unwrap();
            let _ = returns;
            if let Some(t) = target {
                write_slot(out, frame, t, "x0");
            }
        }
        Ins::Ret(value) => {
            if let Some(v) = value {
                read_value(out, frame, v, "x0");
            }
            writeln!(out, "    b .Lepilogue_{}", func.id).unwrap();
        }
        Ins::Jump(_) | Ins::Br { .. } => print_terminator(out, frame, func, block_id, ins, labels),
        Ins::Phi { .. } => {}
    }
}

fn print_new(out: &mut String, frame: &Frame, types: &crate::front::ast::TypeDeclarations, ins: &Ins) {
    match ins {
        Ins::NewS { target, name } => {
            let size = types.get(name).map(|m| m.len() * 8).unwrap_or(0);
            writeln!(out, "    mov x0, #{size}").unwrap();
            writeln!(out, "    bl malloc").unwrap();
            write_slot(out, frame, target, "x0");
        }
        Ins::NewA { target, size } => {
            writeln!(out, "    mov x0, #{}", size * 8).unwrap();
            writeln!(out, "    bl malloc").unwrap();
            write_slot(out, frame, target, "x0");
        }
        _ => {}
    }
}

fn print_function(out: &mut String, func: &Function, returns: &crate::common::Map<Id, Type>, types: &crate::front::ast::TypeDeclarations) {
    assert!(func.parameters.len() <= 8, "arm backend: more than 8 parameters is not supported");

    let frame = build_frame(func);
    let labels = label_of(func);

    writeln!(out, ".globl {}", func.id).unwrap();
    writeln!(out, "{}:", func.id).unwrap();
    writeln!(out, "    stp x29, x30, [sp, #-16]!").unwrap();
    writeln!(out, "    mov x29, sp").unwrap();
    if frame.locals_size > 0 {
        writeln!(out, "    sub sp, sp, #{}", frame.locals_size).unwrap();
    }

    for (i, param) in func.parameters.iter().enumerate() {
        writeln!(out, "    str x{i}, [x29, #-{}]", frame.offset(Slot::Local(param.id))).unwrap();
    }

    let order = cfg::pre_order(func.entry, &func.arena);
    for (i, &block_id) in order.iter().enumerate() {
        if i > 0 {
            writeln!(out, "l{}:", labels[&block_id]).unwrap();
        }
        let block = func.arena.get(block_id);
        for ins in &block.insns {
            match ins {
                Ins::NewS { .. } | Ins::NewA { .. } => print_new(out, &frame, types, ins),
                Ins::Jump(_) | Ins::Br { .. } => print_terminator(out, &frame, func, block_id, ins, &labels),
                _ => print_ins(out, &frame, func, returns, block_id, ins, &labels),
            }
        }
    }

    writeln!(out, ".Lepilogue_{}:", func.id).unwrap();
    if frame.locals_size > 0 {
        writeln!(out, "    add sp, sp, #{}", frame.locals_size).unwrap();
    }
    writeln!(out, "    ldp x29, x30, [sp], #16").unwrap();
    writeln!(out, "    ret").unwrap();
}

/// Emit a whole program as ARM64 assembly. `ssa` has no effect on this
/// backend's instruction selection (every value lives in a frame slot either
/// way) beyond which instructions actually appear in the AASM it is handed —
/// it is accepted for symmetry with [`crate::back::llvm::emit`] and because a
/// future, smarter ARM backend would want it.
pub fn emit(program: &Program, _ssa: bool) -> String {
    let mut out = String::new();
    out.push_str(".text\n");

    let returns: crate::common::Map<Id, Type> =
        program.functions.iter().map(|(id, f)| (*id, f.return_type.clone())).collect();

    for func in program.functions.values() {
        print_function(&mut out, func, &returns, &program.types);
        out.push('\n');
    }

    out.push_str(".data\n");
    for (id, ty) in &program.top_env {
        let _ = ty;
        writeln!(out, "{}:", global_sym(*id)).unwrap();
        writeln!(out, "    .xword 0").unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Map;
    use crate::front::ast::{self, Expr, Stmt, Type};
    use crate::middle::{aasm, cfg as mcfg};

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    #[test]
    fn emits_a_prologue_and_epilogue() {
        let body = vec![Stmt::Return(Some(Expr::Int(0)))];
        let mut functions = Map::new();
        functions.insert(
            id("main"),
            ast::Function { id: id("main"), parameters: vec![], return_type: Type::Int, declarations: vec![], body, local_env: Map::new() },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        let text = emit(&prog, false);
        assert!(text.contains("main:"));
        assert!(text.contains("stp x29, x30"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn parameter_is_spilled_to_its_frame_slot() {
        let param = ast::Declaration { ty: Type::Int, id: id("n") };
        let mut lenv = Map::new();
        lenv.insert(id("n"), Type::Int);
        let body = vec![Stmt::Return(Some(Expr::Var(id("n"))))];
        let mut functions = Map::new();
        functions.insert(
            id("f"),
            ast::Function { id: id("f"), parameters: vec![param], return_type: Type::Int, declarations: vec![], body, local_env: lenv },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        let text = emit(&prog, false);
        assert!(text.contains("str x0, [x29"));
    }
}
