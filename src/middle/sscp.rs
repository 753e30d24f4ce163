//! Sparse simple constant propagation.
//!
//! Runs after SSA construction. Lattice per SSA variable: `Top` (not yet
//! known), a concrete `Int`/`Bool`/`Null` value, or `Bot` (proven
//! non-constant). Only `Binary` and `Phi` results are tracked — every other
//! producer (`Load`, `Call`, `Gep`, `NewS`, `NewA`) is opaque and its uses
//! read through as `Bot` the moment they're consulted, via [`op_value`].

use std::collections::HashMap;

use crate::middle::aasm::{BinOp, Ins, Operand, Value};
use crate::middle::cfg::{self, Program};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lattice {
    Top,
    Int(i64),
    Bool(bool),
    Null,
    Bot,
}

use Lattice::*;

/// The meet of two lattice values: `Top` is the identity, `Bot` absorbs
/// everything, two unequal concretes collapse to `Bot`.
fn meet(a: Lattice, b: Lattice) -> Lattice {
    match (a, b) {
        (Top, x) | (x, Top) => x,
        (Bot, _) | (_, Bot) => Bot,
        (x, y) if x == y => x,
        _ => Bot,
    }
}

/// What this operand evaluates to right now: a literal for immediates, the
/// tracked lattice value for an SSA variable (defaulting to `Top` before its
/// first visit), and `Bot` for anything whose value is opaque to this pass —
/// globals and symbolic locals, i.e. addresses SSA never promoted.
fn op_value(op: &Operand, values: &HashMap<Operand, Lattice>) -> Lattice {
    match op.value {
        Value::Imm(i) => Int(i),
        Value::ImmB(b) => Bool(b),
        Value::Global(_) | Value::Local(_) => Bot,
        Value::Var(_) => values.get(op).copied().unwrap_or(Top),
        Value::Null => Null,
    }
}

fn fold_binary(op: BinOp, l: Lattice, r: Lattice) -> Lattice {
    use BinOp::*;
    // Short-circuit constants override the other operand regardless of its
    // lattice state, even if that operand is still Top or proven Bot.
    if op == Or && (l == Bool(true) || r == Bool(true)) {
        return Bool(true);
    }
    if op == And && (l == Bool(false) || r == Bool(false)) {
        return Bool(false);
    }
    if l == Bot || r == Bot {
        return Bot;
    }
    if l == Top || r == Top {
        return Top;
    }
    match (op, l, r) {
        (Add, Int(a), Int(b)) => Int(a.wrapping_add(b)),
        (Sub, Int(a), Int(b)) => Int(a.wrapping_sub(b)),
        (Mul, Int(a), Int(b)) => Int(a.wrapping_mul(b)),
        (Div, Int(_), Int(0)) => Bot,
        (Div, Int(a), Int(b)) => Int(a.wrapping_div(b)),
        (Xor, Bool(a), Bool(b)) => Bool(a != b),
        (And, Bool(a), Bool(b)) => Bool(a && b),
        (Or, Bool(a), Bool(b)) => Bool(a || b),
        (Gt, Int(a), Int(b)) => Bool(a > b),
        (Ge, Int(a), Int(b)) => Bool(a >= b),
        (Lt, Int(a), Int(b)) => Bool(a < b),
        (Le, Int(a), Int(b)) => Bool(a <= b),
        (Eq, Int(a), Int(b)) => Bool(a == b),
        (Eq, Bool(a), Bool(b)) => Bool(a == b),
        (Eq, Null, Null) => Bool(true),
        (Ne, Int(a), Int(b)) => Bool(a != b),
        (Ne, Bool(a), Bool(b)) => Bool(a != b),
        (Ne, Null, Null) => Bool(false),
        _ => Bot,
    }
}

fn sscp_function(func: &mut cfg::Function) {
    let blocks = cfg::pre_order(func.entry, &func.arena);

    // Seed every Binary and Phi result at Top.
    let mut values: HashMap<Operand, Lattice> = HashMap::new();
    for &b in &blocks {
        for ins in &func.arena.get(b).insns {
            if matches!(ins, Ins::Binary { .. } | Ins::Phi { .. }) {
                if let Some(target) = crate::middle::aasm::result_of(ins) {
                    values.insert(target.clone(), Top);
                }
            }
        }
    }

    loop {
        let mut changed = false;

        for &b in &blocks {
            for ins in func.arena.get(b).insns.clone() {
                let target = match crate::middle::aasm::result_of(&ins) {
                    Some(t) if values.get(t) != Some(&Bot) => t.clone(),
                    _ => continue,
                };
                let new_val = match &ins {
                    Ins::Binary { op, left, right, .. } => {
                        fold_binary(*op, op_value(left, &values), op_value(right, &values))
                    }
                    Ins::Phi { bindings, .. } => {
                        bindings.values().map(|v| op_value(v, &values)).fold(Top, meet)
                    }
                    _ => Top,
                };
                if values.get(&target) != Some(&new_val) {
                    values.insert(target, new_val);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }

    // One final pass substitutes every use of a folded value with its
    // literal and collapses any branch whose guard is now constant,
    // whether that constant came from folding or was already a literal.
    for &b in &blocks {
        let count = func.arena.get(b).insns.len();
        for index in 0..count {
            rewrite(func.arena.get_mut(b), index, &values);
        }
    }
}

/// Rewrite every operand of the instruction at `index` that has become
/// constant, replacing it with its literal; collapse a `Br` whose guard just
/// became a concrete bool into an unconditional `Jump`.
fn rewrite(block: &mut cfg::Block, index: usize, values: &HashMap<Operand, Lattice>) {
    let mut ins = block.insns[index].clone();
    crate::middle::aasm::for_each_operand_mut(&mut ins, |op| {
        if let Some(v) = values.get(op) {
            match v {
                Int(i) => op.value = Value::Imm(*i),
                Bool(b) => op.value = Value::ImmB(*b),
                Null => op.value = Value::Null,
                Top | Bot => {}
            }
        }
    });
    if let Ins::Br { guard, tru, fals } = &ins {
        if let Value::ImmB(b) = guard.value {
            ins = Ins::Jump(if b { *tru } else { *fals });
        }
    }
    block.insns[index] = ins;
}

/// Run SSCP over every function. Must follow SSA construction (it reads and
/// rewrites SSA-variable operands; pre-SSA locals/globals are always `Bot`
/// and never fold).
pub fn apply(program: &mut Program) {
    for func in program.functions.values_mut() {
        sscp_function(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Id, Map};
    use crate::front::ast::{self, BinaryOp, Expr, Stmt, Type};
    use crate::middle::{aasm, cfg as mcfg, ssa};

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    fn pipeline(body: ast::Block, ret: Type) -> Program {
        let mut functions = Map::new();
        functions.insert(
            id("f"),
            ast::Function { id: id("f"), parameters: vec![], return_type: ret, declarations: vec![], body, local_env: Map::new() },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        ssa::apply(&mut prog);
        prog
    }

    fn binop(op: BinaryOp, l: i64, r: i64) -> Expr {
        Expr::Binary { op, left: Box::new(Expr::Int(l)), right: Box::new(Expr::Int(r)) }
    }

    #[test]
    fn constant_arithmetic_folds_to_a_literal() {
        // 1 + 2 < 10 && true
        let guard = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Lst,
                left: Box::new(binop(BinaryOp::Add, 1, 2)),
                right: Box::new(Expr::Int(10)),
            }),
            right: Box::new(Expr::True),
        };
        let mut prog = pipeline(vec![Stmt::Return(Some(guard))], Type::Bool);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        // The Binary producers stay (that's unused-result's job to clean up);
        // what SSCP guarantees is that every *use* of their folded results,
        // including the final Ret, now reads the literal directly.
        let ret = func.arena.get(func.ret_sink).insns.last().cloned();
        assert!(matches!(ret, Some(Ins::Ret(Some(op))) if op.value == Value::ImmB(true)), "expected Ret to read a folded literal, got {ret:?}");
    }

    #[test]
    fn constant_branch_collapses_to_jump() {
        let body = vec![Stmt::Conditional {
            guard: Expr::True,
            then: vec![Stmt::Return(Some(Expr::Int(1)))],
            els: Some(vec![Stmt::Return(Some(Expr::Int(2)))]),
        }];
        let mut prog = pipeline(body, Type::Int);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let has_br = cfg::pre_order(func.entry, &func.arena)
            .into_iter()
            .any(|b| func.arena.get(b).insns.iter().any(|i| matches!(i, Ins::Br { .. })));
        assert!(!has_br);
    }

    #[test]
    fn division_by_zero_constant_does_not_fold() {
        let body = vec![Stmt::Return(Some(binop(BinaryOp::Div, 1, 0)))];
        let mut prog = pipeline(body, Type::Int);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let ret = func.arena.get(func.ret_sink).insns.last().cloned();
        assert!(matches!(ret, Some(Ins::Ret(Some(op))) if matches!(op.value, Value::Var(_))));
    }

    #[test]
    fn lattice_never_regresses_from_concrete_to_top() {
        // A Phi merging the same constant from both branches must settle,
        // not oscillate: every value the fixed point assigns a variable
        // either stays or moves toward Bot, never back to Top.
        let body = vec![
            Stmt::Conditional {
                guard: Expr::True,
                then: vec![],
                els: Some(vec![]),
            },
            Stmt::Return(Some(Expr::Int(7))),
        ];
        let mut prog = pipeline(body, Type::Int);
        apply(&mut prog);
        // Reapplying should be idempotent (monotonicity means a second pass
        // changes nothing further).
        let before = format!("{:?}", prog.functions[&id("f")].arena.get(prog.functions[&id("f")].ret_sink).insns);
        apply(&mut prog);
        let after = format!("{:?}", prog.functions[&id("f")].arena.get(prog.functions[&id("f")].ret_sink).insns);
        assert_eq!(before, after);
    }
}
