//! The type checker.
//!
//! Walks the AST bottom-up, computing the `Type` of every expression and
//! rejecting the program the moment one doesn't fit. On success it fills in
//! `Program::top_env` and every `Function::local_env`, which the CFG builder
//! and AASM lowering both rely on instead of re-deriving types themselves.

use crate::common::{Id, Map};

use super::ast::*;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("invalid type {0} in declaration of '{1}'")]
    InvalidType(Type, Id),
    #[error("no such struct type '{0}'")]
    UnknownStructType(Id),
    #[error("duplicate declaration '{0}'")]
    DuplicateDeclaration(Id),
    #[error("use of undeclared variable '{0}'")]
    UndeclaredVariable(Id),
    #[error("{0} is not a valid operand for unary '-'")]
    BadNegation(Type),
    #[error("{0} is not a valid operand for '!'")]
    BadNot(Type),
    #[error("non-int operands for '+', '-', '*' or '/': {0} and {1}")]
    NonIntArithmetic(Type, Type),
    #[error("non-int operands for '<', '<=', '>' or '>=': {0} and {1}")]
    NonIntComparison(Type, Type),
    #[error("non-bool operands for '&&' or '||': {0} and {1}")]
    NonBoolLogic(Type, Type),
    #[error("mismatched operand types for '==' or '!=': {0} and {1}")]
    MismatchedEquality(Type, Type),
    #[error("type '{0}' has no member '{1}'")]
    NoSuchMember(Id, Id),
    #[error("cannot use '.' on {0}")]
    NotAStruct(Type),
    #[error("cannot index {0}")]
    NotAnArray(Type),
    #[error("array index must be int, got {0}")]
    BadIndex(Type),
    #[error("function '{0}' does not exist")]
    NoSuchFunction(Id),
    #[error("function '{0}' expects {1} argument(s) but got {2}")]
    ArityMismatch(Id, usize, usize),
    #[error("parameter '{0}' of '{1}' expects {2} but got {3}")]
    ArgumentTypeMismatch(Id, Id, Type, Type),
    #[error("cannot print {0}")]
    BadPrint(Type),
    #[error("cannot delete {0}")]
    BadDelete(Type),
    #[error("function '{0}' cannot return {1}, its declared return type is {2}")]
    BadReturn(Id, Type, Type),
    #[error("{0} is not a valid 'while' guard")]
    BadLoopGuard(Type),
    #[error("{0} is not a valid 'if' guard")]
    BadIfGuard(Type),
    #[error("cannot assign {1} to a place of type {0}")]
    BadAssignment(Type, Type),
    #[error("not all control paths in '{0}' return a value")]
    MissingReturn(Id),
    #[error("no function 'main' with return type 'int' found")]
    NoMain,
}

/// The pieces of a function's signature needed to check calls to it, kept
/// separate from `Function` so checking one function's body never needs a
/// live borrow of the whole `Functions` map.
struct Signature {
    parameters: Vec<Declaration>,
    return_type: Type,
}

/// Type-checks a whole program in place, filling in `top_env` and every
/// function's `local_env`. Void functions that fall off the end without an
/// explicit `return` get one appended.
pub fn check(program: &mut Program) -> Result<(), CheckError> {
    for members in program.types.values() {
        check_declarations(members, &program.types)?;
    }
    check_declarations(&program.declarations, &program.types)?;

    let tenv = environment(&program.declarations);

    let main_id = Id::new("main".to_string());
    let main_returns_int =
        program.functions.get(&main_id).is_some_and(|f| f.return_type == Type::Int);
    if !main_returns_int {
        return Err(CheckError::NoMain);
    }

    let signatures: Map<Id, Signature> = program
        .functions
        .iter()
        .map(|(id, f)| {
            (*id, Signature { parameters: f.parameters.clone(), return_type: f.return_type.clone() })
        })
        .collect();

    for func in program.functions.values_mut() {
        check_function(&program.types, &signatures, &tenv, func)?;
    }

    program.top_env = tenv;
    Ok(())
}

fn check_type(ty: &Type, types: &TypeDeclarations, owner: Id) -> Result<(), CheckError> {
    if let Type::Struct(name) = ty {
        if !types.contains_key(name) {
            return Err(CheckError::InvalidType(ty.clone(), owner));
        }
    }
    Ok(())
}

fn check_declarations(decls: &[Declaration], types: &TypeDeclarations) -> Result<(), CheckError> {
    let mut seen = std::collections::HashSet::new();
    for decl in decls {
        if !seen.insert(decl.id) {
            return Err(CheckError::DuplicateDeclaration(decl.id));
        }
        check_type(&decl.ty, types, decl.id)?;
    }
    Ok(())
}

fn environment(decls: &[Declaration]) -> Environment {
    decls.iter().map(|d| (d.id, d.ty.clone())).collect()
}

fn check_env(lenv: &Environment, tenv: &Environment, id: Id) -> Result<Type, CheckError> {
    lenv.get(&id)
        .or_else(|| tenv.get(&id))
        .cloned()
        .ok_or(CheckError::UndeclaredVariable(id))
}

struct Ctx<'a> {
    types: &'a TypeDeclarations,
    signatures: &'a Map<Id, Signature>,
    tenv: &'a Environment,
}

fn check_expr(ctx: &Ctx, lenv: &Environment, expr: &Expr) -> Result<Type, CheckError> {
    match expr {
        Expr::Int(_) => Ok(Type::Int),
        Expr::True | Expr::False => Ok(Type::Bool),
        Expr::Null => Ok(Type::Null),
        Expr::NewArray(_) => Ok(Type::Array),
        Expr::NewStruct(name) => {
            if !ctx.types.contains_key(name) {
                return Err(CheckError::UnknownStructType(*name));
            }
            Ok(Type::Struct(*name))
        }
        Expr::Var(id) => check_env(lenv, ctx.tenv, *id),
        Expr::Unary { op, expr } => check_unary(ctx, lenv, *op, expr),
        Expr::Binary { op, left, right } => check_binary(ctx, lenv, *op, left, right),
        Expr::Dot { expr, id } => check_dot(ctx, lenv, expr, *id),
        Expr::Index { left, index } => check_index(ctx, lenv, left, index),
        Expr::Invocation(inv) => check_invocation(ctx, lenv, inv),
    }
}

fn check_unary(ctx: &Ctx, lenv: &Environment, op: UnaryOp, expr: &Expr) -> Result<Type, CheckError> {
    let t = check_expr(ctx, lenv, expr)?;
    match op {
        UnaryOp::Negative if t == Type::Int => Ok(Type::Int),
        UnaryOp::Negative => Err(CheckError::BadNegation(t)),
        UnaryOp::Not if t == Type::Bool => Ok(Type::Bool),
        UnaryOp::Not => Err(CheckError::BadNot(t)),
    }
}

fn check_binary(
    ctx: &Ctx,
    lenv: &Environment,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> Result<Type, CheckError> {
    let lt = check_expr(ctx, lenv, left)?;
    let rt = check_expr(ctx, lenv, right)?;

    use BinaryOp::*;
    match op {
        Add | Sub | Mul | Div => {
            if lt == Type::Int && rt == Type::Int {
                Ok(Type::Int)
            } else {
                Err(CheckError::NonIntArithmetic(lt, rt))
            }
        }
        Grt | Geq | Lst | Leq => {
            if lt == Type::Int && rt == Type::Int {
                Ok(Type::Bool)
            } else {
                Err(CheckError::NonIntComparison(lt, rt))
            }
        }
        And | Or => {
            if lt == Type::Bool && rt == Type::Bool {
                Ok(Type::Bool)
            } else {
                Err(CheckError::NonBoolLogic(lt, rt))
            }
        }
        Eq | Neq => {
            if lt == rt {
                Ok(Type::Bool)
            } else {
                Err(CheckError::MismatchedEquality(lt, rt))
            }
        }
    }
}

fn struct_member(types: &TypeDeclarations, name: Id, member: Id) -> Result<Type, CheckError> {
    types
        .get(&name)
        .into_iter()
        .flatten()
        .find(|d| d.id == member)
        .map(|d| d.ty.clone())
        .ok_or(CheckError::NoSuchMember(name, member))
}

fn check_dot(ctx: &Ctx, lenv: &Environment, expr: &Expr, id: Id) -> Result<Type, CheckError> {
    match check_expr(ctx, lenv, expr)? {
        Type::Struct(name) => struct_member(ctx.types, name, id),
        other => Err(CheckError::NotAStruct(other)),
    }
}

fn check_index(ctx: &Ctx, lenv: &Environment, left: &Expr, index: &Expr) -> Result<Type, CheckError> {
    let lt = check_expr(ctx, lenv, left)?;
    if lt != Type::Array {
        return Err(CheckError::NotAnArray(lt));
    }
    let it = check_expr(ctx, lenv, index)?;
    if it != Type::Int {
        return Err(CheckError::BadIndex(it));
    }
    Ok(Type::Int)
}

fn check_invocation(ctx: &Ctx, lenv: &Environment, inv: &Invocation) -> Result<Type, CheckError> {
    let sig = ctx.signatures.get(&inv.id).ok_or(CheckError::NoSuchFunction(inv.id))?;

    if sig.parameters.len() != inv.arguments.len() {
        return Err(CheckError::ArityMismatch(inv.id, sig.parameters.len(), inv.arguments.len()));
    }

    for (param, arg) in sig.parameters.iter().zip(&inv.arguments) {
        let at = check_expr(ctx, lenv, arg)?;
        if param.ty != at {
            return Err(CheckError::ArgumentTypeMismatch(param.id, inv.id, param.ty.clone(), at));
        }
    }

    Ok(sig.return_type.clone())
}

fn check_lvalue(ctx: &Ctx, lenv: &Environment, lvalue: &LValue) -> Result<Type, CheckError> {
    match lvalue {
        LValue::Var(id) => check_env(lenv, ctx.tenv, *id),
        LValue::Index { lvalue, index } => {
            let lt = check_lvalue(ctx, lenv, lvalue)?;
            if lt != Type::Array {
                return Err(CheckError::NotAnArray(lt));
            }
            let it = check_expr(ctx, lenv, index)?;
            if it != Type::Int {
                return Err(CheckError::BadIndex(it));
            }
            Ok(Type::Int)
        }
        LValue::Dot { lvalue, id } => match check_lvalue(ctx, lenv, lvalue)? {
            Type::Struct(name) => struct_member(ctx.types, name, *id),
            other => Err(CheckError::NotAStruct(other)),
        },
    }
}

fn check_block(
    ctx: &Ctx,
    lenv: &Environment,
    return_type: &Type,
    func_id: Id,
    block: &Block,
) -> Result<(), CheckError> {
    for stmt in block {
        check_stmt(ctx, lenv, return_type, func_id, stmt)?;
    }
    Ok(())
}

fn check_stmt(
    ctx: &Ctx,
    lenv: &Environment,
    return_type: &Type,
    func_id: Id,
    stmt: &Stmt,
) -> Result<(), CheckError> {
    match stmt {
        Stmt::Print(e) => {
            let t = check_expr(ctx, lenv, e)?;
            if t != Type::Int {
                return Err(CheckError::BadPrint(t));
            }
            Ok(())
        }
        Stmt::PrintLn(e) => {
            let t = check_expr(ctx, lenv, e)?;
            if t != Type::Int {
                return Err(CheckError::BadPrint(t));
            }
            Ok(())
        }
        Stmt::Delete(e) => {
            let t = check_expr(ctx, lenv, e)?;
            if !matches!(t, Type::Struct(_)) {
                return Err(CheckError::BadDelete(t));
            }
            Ok(())
        }
        Stmt::Return(e) => {
            let t = match e {
                Some(e) => check_expr(ctx, lenv, e)?,
                None => Type::Void,
            };
            if t != *return_type {
                return Err(CheckError::BadReturn(func_id, t, return_type.clone()));
            }
            Ok(())
        }
        Stmt::Loop { guard, body } => {
            let t = check_expr(ctx, lenv, guard)?;
            if t != Type::Bool {
                return Err(CheckError::BadLoopGuard(t));
            }
            check_block(ctx, lenv, return_type, func_id, body)
        }
        Stmt::Conditional { guard, then, els } => {
            let t = check_expr(ctx, lenv, guard)?;
            if t != Type::Bool {
                return Err(CheckError::BadIfGuard(t));
            }
            check_block(ctx, lenv, return_type, func_id, then)?;
            if let Some(els) = els {
                check_block(ctx, lenv, return_type, func_id, els)?;
            }
            Ok(())
        }
        Stmt::Assignment { lvalue, source } => {
            let lt = check_lvalue(ctx, lenv, lvalue)?;
            let rt = match source {
                Source::Expr(e) => check_expr(ctx, lenv, e)?,
                Source::Read => Type::Int,
            };
            if lt != rt {
                return Err(CheckError::BadAssignment(lt, rt));
            }
            Ok(())
        }
        Stmt::Invocation(inv) => {
            check_invocation(ctx, lenv, inv)?;
            Ok(())
        }
    }
}

/// Does every path through `block` end in a `return`?
fn all_paths_return(block: &Block) -> bool {
    block.iter().any(|stmt| match stmt {
        Stmt::Return(_) => true,
        Stmt::Conditional { then, els: Some(els), .. } => {
            all_paths_return(then) && all_paths_return(els)
        }
        _ => false,
    })
}

fn check_function(
    types: &TypeDeclarations,
    signatures: &Map<Id, Signature>,
    tenv: &Environment,
    func: &mut Function,
) -> Result<(), CheckError> {
    let mut decls = func.declarations.clone();
    decls.extend(func.parameters.clone());
    check_declarations(&decls, types)?;

    let lenv = environment(&decls);
    let ctx = Ctx { types, signatures, tenv };
    check_block(&ctx, &lenv, &func.return_type, func.id, &func.body)?;

    if !all_paths_return(&func.body) {
        if func.return_type == Type::Void {
            func.body.push(Stmt::Return(None));
        } else {
            return Err(CheckError::MissingReturn(func.id));
        }
    }

    func.local_env = lenv;
    Ok(())
}
