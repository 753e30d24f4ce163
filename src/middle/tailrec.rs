//! Tail-call-to-loop rewriting.
//!
//! Runs on the CFG before AASM lowering. Turns a direct, same-function tail
//! call into an assignment-and-jump-to-entry so that deep recursion in tail
//! position doesn't grow the native call stack. Only exact self tail calls
//! are rewritten; anything else (mutual recursion, non-tail calls) is left
//! alone.

use crate::common::Id;
use crate::front::ast::{Expr, Invocation, LValue, Source, Stmt};
use crate::middle::cfg::{self, BlockKind, Function};

fn temp_name(param: Id) -> Id {
    Id::new(format!("_{param}"))
}

/// The last statement of a block whose successor is the return sink, if it
/// is a same-function tail call, together with the call's arguments.
fn tail_call<'a>(func: &Function, stmt: &'a Stmt) -> Option<&'a Invocation> {
    match stmt {
        Stmt::Invocation(inv) if inv.id == func.id => Some(inv),
        Stmt::Assignment { lvalue: LValue::Var(v), source: Source::Expr(Expr::Invocation(inv)) }
            if *v == cfg::return_id() && inv.id == func.id =>
        {
            Some(inv)
        }
        _ => None,
    }
}

/// Rewrite every direct tail call in `func` into a loop back to its entry.
pub fn apply(func: &mut Function) {
    let original_entry = func.entry;
    let block_ids: Vec<_> = {
        let mut ids = Vec::new();
        cfg::visit(func.entry, &func.arena, |id| ids.push(id));
        ids
    };

    let mut tailed = false;

    for id in block_ids {
        let next = match func.arena.get(id).kind {
            BlockKind::Basic { next } => next,
            _ => continue,
        };
        if next != func.ret_sink {
            continue;
        }

        let block = func.arena.get(id);
        let call = match block.stmts.last().and_then(|s| tail_call(func, s)) {
            Some(inv) => inv.clone(),
            None => continue,
        };

        let block = func.arena.get_mut(id);
        block.stmts.pop();

        for (param, arg) in func.parameters.iter().zip(call.arguments.iter()) {
            func.local_env.insert(temp_name(param.id), param.ty.clone());
            func.arena.get_mut(id).stmts.push(Stmt::Assignment {
                lvalue: LValue::Var(temp_name(param.id)),
                source: Source::Expr(arg.clone()),
            });
        }
        for param in &func.parameters {
            func.arena.get_mut(id).stmts.push(Stmt::Assignment {
                lvalue: LValue::Var(param.id),
                source: Source::Expr(Expr::Var(temp_name(param.id))),
            });
        }

        match &mut func.arena.get_mut(id).kind {
            BlockKind::Basic { next } => *next = original_entry,
            _ => unreachable!("matched Basic above"),
        }
        tailed = true;
    }

    if tailed {
        func.entry = func.arena.push_basic(vec![], original_entry);
    }
}
