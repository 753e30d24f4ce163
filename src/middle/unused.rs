//! Unused-result elimination.
//!
//! Runs after SSA construction (usually after SSCP, which tends to feed it
//! work: folding a variable's uses down to literals strips its last reader).
//! Iterates to a fixed point: build the set of operands read anywhere, drop
//! every producing instruction whose result isn't in it, repeat until a full
//! pass removes nothing. `Store`, `Free`, `Ret`, `Jump`, `Br`, and a
//! target-less `Call` are never candidates — they're either terminators or
//! carry a side effect with no result to judge usefulness by. A `Call` that
//! does have a target is judged like any other producer: if nothing reads
//! its result, the whole call goes, side effects included.

use std::collections::HashSet;

use crate::middle::aasm::{Ins, Operand};
use crate::middle::cfg::{self, BlockId, Program};

/// The operand this instruction defines, for the instructions that count as
/// producers. Mirrors [`crate::middle::aasm::result_of`] but only counts a
/// target-less `Call` out, since `result_of` already returns `None` for it.
fn produced(ins: &Ins) -> Option<&Operand> {
    crate::middle::aasm::result_of(ins)
}

fn unused_result_function(func: &mut cfg::Function) {
    loop {
        let blocks = cfg::pre_order(func.entry, &func.arena);

        let mut useful: HashSet<Operand> = HashSet::new();
        for &b in &blocks {
            for ins in &func.arena.get(b).insns {
                crate::middle::aasm::for_each_operand(ins, |op| {
                    useful.insert(op.clone());
                });
            }
        }

        let mut dead: Vec<(BlockId, usize)> = Vec::new();
        for &b in &blocks {
            for (index, ins) in func.arena.get(b).insns.iter().enumerate() {
                if let Some(target) = produced(ins) {
                    if !useful.contains(target) {
                        dead.push((b, index));
                    }
                }
            }
        }

        if dead.is_empty() {
            break;
        }
        for &(b, index) in dead.iter().rev() {
            func.arena.get_mut(b).insns.remove(index);
        }
    }
}

/// Run unused-result elimination over every function.
pub fn apply(program: &mut Program) {
    for func in program.functions.values_mut() {
        unused_result_function(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Id, Map};
    use crate::front::ast::{self, BinaryOp, Declaration, Expr, LValue, Source, Stmt, Type};
    use crate::middle::{aasm, cfg as mcfg, ssa};

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    fn pipeline(body: ast::Block, decls: Vec<Declaration>, ret: Type) -> Program {
        let mut lenv = Map::new();
        for d in &decls {
            lenv.insert(d.id, d.ty.clone());
        }
        let mut functions = Map::new();
        functions.insert(
            id("f"),
            ast::Function { id: id("f"), parameters: vec![], return_type: ret, declarations: decls, body, local_env: lenv },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        ssa::apply(&mut prog);
        prog
    }

    fn binary_count(prog: &Program) -> usize {
        let func = &prog.functions[&id("f")];
        cfg::pre_order(func.entry, &func.arena).into_iter().flat_map(|b| func.arena.get(b).insns.clone()).filter(|i| matches!(i, Ins::Binary { .. })).count()
    }

    #[test]
    fn dead_local_computation_is_removed() {
        let decl = Declaration { ty: Type::Int, id: id("x") };
        let body = vec![
            Stmt::Assignment {
                lvalue: LValue::Var(id("x")),
                source: Source::Expr(Expr::Binary { op: BinaryOp::Add, left: Box::new(Expr::Int(1)), right: Box::new(Expr::Int(2)) }),
            },
            Stmt::Return(Some(Expr::Int(0))),
        ];
        let mut prog = pipeline(body, vec![decl], Type::Int);
        apply(&mut prog);
        assert_eq!(binary_count(&prog), 0);
    }

    #[test]
    fn value_used_by_the_return_survives() {
        let decl = Declaration { ty: Type::Int, id: id("x") };
        let body = vec![
            Stmt::Assignment {
                lvalue: LValue::Var(id("x")),
                source: Source::Expr(Expr::Binary { op: BinaryOp::Add, left: Box::new(Expr::Int(1)), right: Box::new(Expr::Int(2)) }),
            },
            Stmt::Return(Some(Expr::Var(id("x")))),
        ];
        let mut prog = pipeline(body, vec![decl], Type::Int);
        apply(&mut prog);
        assert_eq!(binary_count(&prog), 1);
    }

    #[test]
    fn statement_position_call_survives_even_though_its_target_is_unread() {
        // Stmt::Invocation lowers with no target at all, so it is never a
        // dead-code candidate regardless of whether the callee is pure.
        let mut functions = Map::new();
        functions.insert(
            id("g"),
            ast::Function { id: id("g"), parameters: vec![], return_type: Type::Int, declarations: vec![], body: vec![Stmt::Return(Some(Expr::Int(1)))], local_env: Map::new() },
        );
        functions.insert(
            id("f"),
            ast::Function {
                id: id("f"),
                parameters: vec![],
                return_type: Type::Void,
                declarations: vec![],
                body: vec![Stmt::Invocation(ast::Invocation { id: id("g"), arguments: vec![] }), Stmt::Return(None)],
                local_env: Map::new(),
            },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        ssa::apply(&mut prog);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let calls: usize = cfg::pre_order(func.entry, &func.arena).into_iter().flat_map(|b| func.arena.get(b).insns.clone()).filter(|i| matches!(i, Ins::Call { .. })).count();
        assert_eq!(calls, 1);
    }

    #[test]
    fn chained_dead_geps_are_all_removed() {
        // Array indexing lowers to a Gep+Load chain; if the loaded value is
        // unused the whole chain, not just its last link, should go, even
        // though it takes repeated passes to peel back to the base pointer.
        let decl = Declaration { ty: Type::Array, id: id("a") };
        let x_decl = Declaration { ty: Type::Int, id: id("x") };
        let body = vec![
            Stmt::Assignment { lvalue: LValue::Var(id("a")), source: Source::Expr(Expr::NewArray(4)) },
            Stmt::Assignment {
                lvalue: LValue::Var(id("x")),
                source: Source::Expr(Expr::Index { left: Box::new(Expr::Var(id("a"))), index: Box::new(Expr::Int(0)) }),
            },
            Stmt::Return(None),
        ];
        let mut prog = pipeline(body, vec![decl, x_decl], Type::Void);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let geps: usize = cfg::pre_order(func.entry, &func.arena).into_iter().flat_map(|b| func.arena.get(b).insns.clone()).filter(|i| matches!(i, Ins::Gep { .. })).count();
        let loads: usize = cfg::pre_order(func.entry, &func.arena).into_iter().flat_map(|b| func.arena.get(b).insns.clone()).filter(|i| matches!(i, Ins::Load { .. })).count();
        assert_eq!(geps, 0);
        assert_eq!(loads, 0);
    }
}
