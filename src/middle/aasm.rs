//! Abstract assembly: the linear, low-level instruction form that statements
//! and expressions are lowered into, attached to each CFG node.

use crate::common::{Id, Map};
use crate::front::ast::{self, BinaryOp, Declaration, Environment, Expr, Invocation, LValue, Source, Stmt, Type, TypeDeclarations, UnaryOp};
use crate::middle::cfg::{self, BlockId, BlockKind};

/// The tagged value an operand carries. Carrying `Local`/`Global` as separate
/// tags (rather than relying on the printer to re-derive locality from
/// environment membership) is what lets SSA renaming treat the two
/// differently: `Local` names get promoted to SSA values, `Global` names
/// always stay in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Imm(i64),
    ImmB(bool),
    Var(u32),
    Local(Id),
    Global(Id),
    Null,
}

/// A value together with its language-level type. Equality and hashing are
/// defined on `value` alone — two operands referring to the same value are
/// the same operand for map-keying purposes regardless of how their type
/// field got threaded through a particular pass.
#[derive(Clone, Debug)]
pub struct Operand {
    pub value: Value,
    pub ty: Type,
}

impl Operand {
    pub fn imm(i: i64) -> Self {
        Operand { value: Value::Imm(i), ty: Type::Int }
    }
    pub fn imm_bool(b: bool) -> Self {
        Operand { value: Value::ImmB(b), ty: Type::Bool }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl Eq for Operand {}
impl std::hash::Hash for Operand {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Xor,
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

fn bin_op(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Neq => BinOp::Ne,
        BinaryOp::Grt => BinOp::Gt,
        BinaryOp::Geq => BinOp::Ge,
        BinaryOp::Lst => BinOp::Lt,
        BinaryOp::Leq => BinOp::Le,
        BinaryOp::And => BinOp::And,
        BinaryOp::Or => BinOp::Or,
    }
}

fn result_type(op: BinaryOp) -> Type {
    use BinaryOp::*;
    match op {
        Add | Sub | Mul | Div => Type::Int,
        Eq | Neq | Grt | Geq | Lst | Leq | And | Or => Type::Bool,
    }
}

/// One instruction. The set is closed: every pass that touches AASM matches
/// on this enum exhaustively.
#[derive(Clone, Debug)]
pub enum Ins {
    Load { target: Operand, ptr: Operand },
    Store { value: Operand, ptr: Operand },
    Binary { op: BinOp, target: Operand, left: Operand, right: Operand },
    Call { target: Option<Operand>, callee: Id, args: Vec<Operand> },
    Ret(Option<Operand>),
    Free(Operand),
    NewS { target: Operand, name: Id },
    NewA { target: Operand, size: i64 },
    Gep { target: Operand, base: Operand, index: Operand },
    Jump(BlockId),
    Br { guard: Operand, tru: BlockId, fals: BlockId },
    Phi { target: Operand, var: Id, bindings: Map<BlockId, Operand> },
}

/// Per-function lowering context: what's needed to resolve a name's type
/// without re-running the type checker.
pub struct LowerCtx<'a> {
    pub types: &'a TypeDeclarations,
    pub tenv: &'a Environment,
    pub returns: &'a Map<Id, Type>,
}

fn env_type(ctx: &LowerCtx, lenv: &Environment, id: Id) -> Type {
    lenv.get(&id).or_else(|| ctx.tenv.get(&id)).cloned().expect("name resolved by the type checker")
}

fn addr_operand(lenv: &Environment, id: Id, ty: Type) -> Operand {
    if lenv.contains_key(&id) {
        Operand { value: Value::Local(id), ty }
    } else {
        Operand { value: Value::Global(id), ty }
    }
}

fn struct_member(ctx: &LowerCtx, name: Id, field: Id) -> (i64, Type) {
    let members = ctx.types.get(&name).expect("struct type resolved by the type checker");
    let (index, decl) = members
        .iter()
        .enumerate()
        .find(|(_, d)| d.id == field)
        .expect("member resolved by the type checker");
    (index as i64, decl.ty.clone())
}

fn fresh(var: &mut u32, ty: Type) -> Operand {
    let id = *var;
    *var += 1;
    Operand { value: Value::Var(id), ty }
}

fn lower_unary(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, op: UnaryOp, expr: &Expr) -> Operand {
    let operand = lower_expr(ctx, lenv, insns, var, expr);
    match op {
        UnaryOp::Negative => {
            let target = fresh(var, Type::Int);
            insns.push(Ins::Binary { op: BinOp::Sub, target: target.clone(), left: Operand::imm(0), right: operand });
            target
        }
        UnaryOp::Not => {
            let target = fresh(var, Type::Bool);
            insns.push(Ins::Binary { op: BinOp::Xor, target: target.clone(), left: Operand::imm_bool(true), right: operand });
            target
        }
    }
}

fn lower_binary(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, op: BinaryOp, left: &Expr, right: &Expr) -> Operand {
    let l = lower_expr(ctx, lenv, insns, var, left);
    let r = lower_expr(ctx, lenv, insns, var, right);
    let target = fresh(var, result_type(op));
    insns.push(Ins::Binary { op: bin_op(op), target: target.clone(), left: l, right: r });
    target
}

/// `returns = true` for expression-position calls (which get a target);
/// `false` for statement-position calls. Both consume a fresh id, so target
/// numbering stays in step regardless of call position.
fn lower_invocation(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, inv: &Invocation, returns: bool) -> Option<Operand> {
    let args: Vec<Operand> = inv.arguments.iter().map(|a| lower_expr(ctx, lenv, insns, var, a)).collect();
    let ret_ty = ctx.returns.get(&inv.id).cloned().unwrap_or(Type::Void);
    let target = fresh(var, ret_ty);
    if returns {
        insns.push(Ins::Call { target: Some(target.clone()), callee: inv.id, args });
        Some(target)
    } else {
        insns.push(Ins::Call { target: None, callee: inv.id, args });
        None
    }
}

fn lower_expr(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, expr: &Expr) -> Operand {
    match expr {
        Expr::Var(id) => {
            let ty = env_type(ctx, lenv, *id);
            let addr = addr_operand(lenv, *id, ty.clone());
            let target = fresh(var, ty);
            insns.push(Ins::Load { target: target.clone(), ptr: addr });
            target
        }
        Expr::Int(i) => Operand::imm(*i),
        Expr::True => Operand::imm_bool(true),
        Expr::False => Operand::imm_bool(false),
        Expr::Null => Operand { value: Value::Null, ty: Type::Null },
        Expr::NewStruct(name) => {
            let target = fresh(var, Type::Struct(*name));
            insns.push(Ins::NewS { target: target.clone(), name: *name });
            target
        }
        Expr::NewArray(n) => {
            let target = fresh(var, Type::Array);
            insns.push(Ins::NewA { target: target.clone(), size: *n });
            target
        }
        Expr::Unary { op, expr } => lower_unary(ctx, lenv, insns, var, *op, expr),
        Expr::Binary { op, left, right } => lower_binary(ctx, lenv, insns, var, *op, left, right),
        Expr::Invocation(inv) => lower_invocation(ctx, lenv, insns, var, inv, true).expect("expression-position call returns a target"),
        Expr::Dot { expr, id } => {
            let base = lower_expr(ctx, lenv, insns, var, expr);
            let struct_name = match &base.ty {
                Type::Struct(name) => *name,
                _ => unreachable!("dot target type-checked as a struct"),
            };
            let (index, field_ty) = struct_member(ctx, struct_name, *id);
            let gep = fresh(var, field_ty.clone());
            insns.push(Ins::Gep { target: gep.clone(), base, index: Operand::imm(index) });
            let target = fresh(var, field_ty);
            insns.push(Ins::Load { target: target.clone(), ptr: gep });
            target
        }
        Expr::Index { left, index } => {
            let base = lower_expr(ctx, lenv, insns, var, left);
            let idx = lower_expr(ctx, lenv, insns, var, index);
            let gep = fresh(var, Type::Int);
            insns.push(Ins::Gep { target: gep.clone(), base, index: idx });
            let target = fresh(var, Type::Int);
            insns.push(Ins::Load { target: target.clone(), ptr: gep });
            target
        }
    }
}

/// Returns the address a field/index l-value resolves to, together with the
/// resolved type of its owner (needed by the caller to type the next Gep).
fn lower_lvalue(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, lvalue: &LValue) -> Operand {
    match lvalue {
        LValue::Var(id) => addr_operand(lenv, *id, env_type(ctx, lenv, *id)),
        LValue::Dot { lvalue, id } => {
            let inner_addr = lower_lvalue(ctx, lenv, insns, var, lvalue);
            let load_target = fresh(var, inner_addr.ty.clone());
            insns.push(Ins::Load { target: load_target.clone(), ptr: inner_addr });
            let struct_name = match &load_target.ty {
                Type::Struct(name) => *name,
                _ => unreachable!("dot l-value owner type-checked as a struct"),
            };
            let (index, field_ty) = struct_member(ctx, struct_name, *id);
            let gep = fresh(var, field_ty);
            insns.push(Ins::Gep { target: gep.clone(), base: load_target, index: Operand::imm(index) });
            gep
        }
        LValue::Index { lvalue, index } => {
            let inner_addr = lower_lvalue(ctx, lenv, insns, var, lvalue);
            let load_target = fresh(var, Type::Array);
            insns.push(Ins::Load { target: load_target.clone(), ptr: inner_addr });
            let idx = lower_expr(ctx, lenv, insns, var, index);
            let gep = fresh(var, Type::Int);
            insns.push(Ins::Gep { target: gep.clone(), base: load_target, index: idx });
            gep
        }
    }
}

fn lower_stmt(ctx: &LowerCtx, lenv: &Environment, insns: &mut Vec<Ins>, var: &mut u32, stmt: &Stmt) {
    match stmt {
        Stmt::Print(e) => {
            let arg = lower_expr(ctx, lenv, insns, var, e);
            insns.push(Ins::Call { target: None, callee: Id::new("print".to_string()), args: vec![arg] });
        }
        Stmt::PrintLn(e) => {
            let arg = lower_expr(ctx, lenv, insns, var, e);
            insns.push(Ins::Call { target: None, callee: Id::new("println".to_string()), args: vec![arg] });
        }
        Stmt::Delete(e) => {
            let arg = lower_expr(ctx, lenv, insns, var, e);
            insns.push(Ins::Free(arg));
        }
        Stmt::Return(expr) => {
            let value = expr.as_ref().map(|e| lower_expr(ctx, lenv, insns, var, e));
            insns.push(Ins::Ret(value));
        }
        Stmt::Invocation(inv) => {
            lower_invocation(ctx, lenv, insns, var, inv, false);
        }
        Stmt::Assignment { lvalue, source } => {
            let value = match source {
                Source::Expr(e) => lower_expr(ctx, lenv, insns, var, e),
                Source::Read => {
                    let target = fresh(var, Type::Int);
                    insns.push(Ins::Call { target: Some(target.clone()), callee: Id::new("readnum".to_string()), args: vec![] });
                    target
                }
            };
            let addr = lower_lvalue(ctx, lenv, insns, var, lvalue);
            insns.push(Ins::Store { value, ptr: addr });
        }
        Stmt::Conditional { .. } | Stmt::Loop { .. } => {
            unreachable!("control-flow statements are extracted into the CFG before lowering")
        }
    }
}

fn lower_function(ctx: &LowerCtx, func: &mut cfg::Function) {
    let mut var: u32 = 0;
    let order = cfg::pre_order(func.entry, &func.arena);
    for id in order {
        let (stmts, kind) = {
            let block = func.arena.get(id);
            (block.stmts.clone(), block.kind.clone())
        };
        let insns = &mut func.arena.get_mut(id).insns;
        for stmt in &stmts {
            lower_stmt(ctx, &func.local_env, insns, &mut var, stmt);
        }
        match kind {
            BlockKind::Basic { next } => insns.push(Ins::Jump(next)),
            BlockKind::Conditional { guard, tru, fals } => {
                let g = lower_expr(ctx, &func.local_env, insns, &mut var, &guard);
                insns.push(Ins::Br { guard: g, tru, fals });
            }
            BlockKind::Return => {}
        }
    }
}

/// Lower every function's statements into instructions. Runs after CFG
/// construction (and, when enabled, after tail-call-to-loop).
pub fn lower(program: &mut cfg::Program) {
    let returns: Map<Id, Type> =
        program.functions.iter().map(|(id, f)| (*id, f.return_type.clone())).collect();
    let types = program.types.clone();
    let tenv = program.top_env.clone();
    let ctx = LowerCtx { types: &types, tenv: &tenv, returns: &returns };
    for func in program.functions.values_mut() {
        lower_function(&ctx, func);
    }
}

/// Visits every operand an instruction *reads* (as opposed to produces).
/// Shared by SSCP's use-map construction and unused-result's liveness
/// marking so both passes agree on what counts as a use.
pub fn for_each_operand(ins: &Ins, mut f: impl FnMut(&Operand)) {
    match ins {
        Ins::Load { ptr, .. } => f(ptr),
        Ins::Store { value, ptr } => {
            f(value);
            f(ptr);
        }
        Ins::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        Ins::Call { args, .. } => {
            for a in args {
                f(a);
            }
        }
        Ins::Ret(value) => {
            if let Some(v) = value {
                f(v);
            }
        }
        Ins::Free(value) => f(value),
        Ins::NewS { .. } | Ins::NewA { .. } | Ins::Jump(_) => {}
        Ins::Gep { base, index, .. } => {
            f(base);
            f(index);
        }
        Ins::Br { guard, .. } => f(guard),
        Ins::Phi { bindings, .. } => {
            for v in bindings.values() {
                f(v);
            }
        }
    }
}

/// The mutable counterpart of [`for_each_operand`], used by SSCP to rewrite
/// operands in place once they are discovered to be constant.
pub fn for_each_operand_mut(ins: &mut Ins, mut f: impl FnMut(&mut Operand)) {
    match ins {
        Ins::Load { ptr, .. } => f(ptr),
        Ins::Store { value, ptr } => {
            f(value);
            f(ptr);
        }
        Ins::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        Ins::Call { args, .. } => {
            for a in args.iter_mut() {
                f(a);
            }
        }
        Ins::Ret(value) => {
            if let Some(v) = value {
                f(v);
            }
        }
        Ins::Free(value) => f(value),
        Ins::NewS { .. } | Ins::NewA { .. } | Ins::Jump(_) => {}
        Ins::Gep { base, index, .. } => {
            f(base);
            f(index);
        }
        Ins::Br { guard, .. } => f(guard),
        Ins::Phi { bindings, .. } => {
            for v in bindings.values_mut() {
                f(v);
            }
        }
    }
}

/// The operand an instruction *produces*, if any. `None` for instructions
/// with no result (Store, Free, Ret, Jump, Br) or void Calls.
pub fn result_of(ins: &Ins) -> Option<&Operand> {
    match ins {
        Ins::Load { target, .. }
        | Ins::Binary { target, .. }
        | Ins::NewS { target, .. }
        | Ins::NewA { target, .. }
        | Ins::Gep { target, .. }
        | Ins::Phi { target, .. } => Some(target),
        Ins::Call { target, .. } => target.as_ref(),
        Ins::Store { .. } | Ins::Ret(_) | Ins::Free(_) | Ins::Jump(_) | Ins::Br { .. } => None,
    }
}
