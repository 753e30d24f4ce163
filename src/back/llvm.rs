//! LLVM textual IR printer.
//!
//! One text form per AASM instruction, struct/global declarations up front,
//! and a fixed set of runtime `declare`s at the end. Whether an `Id`
//! operand is local or global never needs consulting an environment at
//! print time — the AASM already bakes that into the operand's `Value` tag
//! (see `middle::aasm::Value::{Local, Global}`).
//!
//! Branches on `ssa`: pre-SSA bodies spill parameters
//! to `alloca`+`store` and read every local through `load`; SSA bodies name
//! parameters directly and the renamer has already turned local reads/writes
//! into direct operand uses (and phis), so no alloca preamble is printed.

use std::fmt::Write as _;

use crate::common::Id;
use crate::front::ast::{Type, TypeDeclarations};
use crate::middle::aasm::{BinOp, Ins, Operand, Value};
use crate::middle::cfg::{self, BlockId, Function, Program};

fn aasm_type(ty: &Type) -> &'static str {
    match ty {
        Type::Int => "i64",
        Type::Bool => "i1",
        Type::Struct(_) | Type::Array | Type::Null => "ptr",
        Type::Void => "void",
    }
}

fn gep_type(ty: &Type) -> String {
    match ty {
        Type::Struct(name) => format!("%struct.{name}"),
        _ => "i64".to_string(),
    }
}

fn print_operand(op: &Operand) -> String {
    match op.value {
        Value::Imm(i) => i.to_string(),
        Value::ImmB(b) => if b { "1" } else { "0" }.to_string(),
        Value::Var(v) => format!("%{v}"),
        Value::Local(id) => format!("%{id}"),
        Value::Global(id) => format!("@{id}"),
        Value::Null => "null".to_string(),
    }
}

fn binop_mnemonic(op: BinOp) -> &'static str {
    use BinOp::*;
    match op {
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "sdiv",
        Xor => "xor",
        And => "and",
        Or => "or",
        Eq => "icmp eq",
        Ne => "icmp ne",
        Gt => "icmp sgt",
        Ge => "icmp sge",
        Lt => "icmp slt",
        Le => "icmp sle",
    }
}

fn print_types(out: &mut String, types: &TypeDeclarations) {
    for (name, members) in types {
        let fields: Vec<&str> = members.iter().map(|d| aasm_type(&d.ty)).collect();
        writeln!(out, "%struct.{name} = type {{{}}}", fields.join(", ")).unwrap();
    }
}

fn print_globals(out: &mut String, tenv: &crate::front::ast::Environment) {
    for (id, ty) in tenv {
        let init = match ty {
            Type::Struct(_) | Type::Array => "null",
            _ => "0",
        };
        writeln!(out, "@{id} = common global {} {init}, align 4", aasm_type(ty)).unwrap();
    }
}

/// Label numbers for one function's blocks, assigned in the same pre-order
/// traversal the CFG builder's enumeration uses, so `lN` is stable within a
/// compilation.
fn labels(func: &Function) -> crate::common::Map<BlockId, u32> {
    cfg::pre_order(func.entry, &func.arena)
        .into_iter()
        .enumerate()
        .map(|(i, b)| (b, i as u32))
        .collect()
}

fn runtime_return_type(name: Id, types: &crate::common::Map<Id, Type>) -> Type {
    match name.as_ref().as_str() {
        "print" | "println" => Type::Void,
        "readnum" => Type::Int,
        _ => types.get(&name).cloned().unwrap_or(Type::Void),
    }
}

fn print_ins(out: &mut String, ins: &Ins, label_of: &crate::common::Map<BlockId, u32>, returns: &crate::common::Map<Id, Type>, types: &TypeDeclarations) {
    match ins {
        Ins::Binary { op, target, left, right } => {
            writeln!(
                out,
                "{} = {} {} {}, {}",
                print_operand(target),
                binop_mnemonic(*op),
                aasm_type(&left.ty),
                print_operand(left),
                print_operand(right)
            )
            .unwrap();
        }
        Ins::Load { target, ptr } => {
            writeln!(out, "{} = load {}, ptr {}", print_operand(target), aasm_type(&target.ty), print_operand(ptr)).unwrap();
        }
        Ins::Store { value, ptr } => {
            writeln!(out, "store {} {}, ptr {}", aasm_type(&value.ty), print_operand(value), print_operand(ptr)).unwrap();
        }
        Ins::Ret(value) => match value {
            Some(v) => writeln!(out, "ret {} {}", aasm_type(&v.ty), print_operand(v)).unwrap(),
            None => writeln!(out, "ret void").unwrap(),
        },
        Ins::Jump(target) => writeln!(out, "br label %l{}", label_of[target]).unwrap(),
        Ins::Br { guard, tru, fals } => {
            writeln!(out, "br i1 {}, label %l{}, label %l{}", print_operand(guard), label_of[tru], label_of[fals]).unwrap();
        }
        Ins::Gep { target, base, index } => {
            let ty = gep_type(&base.ty);
            if matches!(base.ty, Type::Struct(_)) {
                writeln!(out, "{} = getelementptr {}, ptr {}, i1 0, i32 {}", print_operand(target), ty, print_operand(base), print_operand(index)).unwrap();
            } else {
                writeln!(out, "{} = getelementptr {}, ptr {}, i64 {}", print_operand(target), ty, print_operand(base), print_operand(index)).unwrap();
            }
        }
        Ins::NewS { target, name } => {
            let size = types.get(name).map(|members| members.len() * 8).unwrap_or(0);
            writeln!(out, "{} = call ptr @malloc(i64 {size})", print_operand(target)).unwrap();
        }
        Ins::NewA { target, size } => {
            writeln!(out, "{} = call ptr @malloc(i64 {})", print_operand(target), size * 8).unwrap();
        }
        Ins::Free(value) => {
            writeln!(out, "call void @free(ptr {})", print_operand(value)).unwrap();
        }
        Ins::Call { target, callee, args } => {
            let ret_ty = runtime_return_type(*callee, returns);
            let arglist: Vec<String> = args.iter().map(|a| format!("{} {}", aasm_type(&a.ty), print_operand(a))).collect();
            match target {
                Some(t) => writeln!(out, "{} = call {} @{callee}({})", print_operand(t), aasm_type(&ret_ty), arglist.join(", ")).unwrap(),
                None => writeln!(out, "call {} @{callee}({})", aasm_type(&ret_ty), arglist.join(", ")).unwrap(),
            }
        }
        Ins::Phi { target, bindings, .. } => {
            let parts: Vec<String> = bindings.iter().map(|(b, v)| format!("[ {}, %l{} ]", print_operand(v), label_of[b])).collect();
            writeln!(out, "{} = phi {} {}", print_operand(target), aasm_type(&target.ty), parts.join(", ")).unwrap();
        }
    }
}

fn print_function(out: &mut String, func: &Function, ssa: bool, returns: &crate::common::Map<Id, Type>, types: &TypeDeclarations) {
    let param_list: Vec<String> = func
        .parameters
        .iter()
        .map(|p| format!("{} %{}{}", aasm_type(&p.ty), if ssa { "" } else { "_" }, p.id))
        .collect();
    writeln!(out, "define {} @{}({}) {{", aasm_type(&func.return_type), func.id, param_list.join(", ")).unwrap();

    if !ssa {
        for param in &func.parameters {
            writeln!(out, "%{} = alloca {}", param.id, aasm_type(&param.ty)).unwrap();
            writeln!(out, "store {} %_{}, ptr %{}", aasm_type(&param.ty), param.id, param.id).unwrap();
        }
        let param_ids: crate::common::Set<Id> = func.parameters.iter().map(|p| p.id).collect();
        for (id, ty) in &func.local_env {
            if !param_ids.contains(id) {
                writeln!(out, "%{id} = alloca {}", aasm_type(ty)).unwrap();
            }
        }
    }

    let label_of = labels(func);
    let order = cfg::pre_order(func.entry, &func.arena);
    for (i, &block_id) in order.iter().enumerate() {
        if i > 0 {
            writeln!(out, "\nl{}:", label_of[&block_id]).unwrap();
        }
        let block = func.arena.get(block_id);
        for ins in &block.insns {
            print_ins(out, ins, &label_of, returns, types);
        }
    }
    writeln!(out, "}}").unwrap();
}

/// Emit a whole program as LLVM textual IR. `ssa` selects the pre-/post-SSA
/// printing convention (see module docs).
pub fn emit(program: &Program, ssa: bool) -> String {
    let mut out = String::new();
    print_types(&mut out, &program.types);
    out.push('\n');
    print_globals(&mut out, &program.top_env);
    out.push('\n');

    let returns: crate::common::Map<Id, Type> =
        program.functions.iter().map(|(id, f)| (*id, f.return_type.clone())).collect();

    for func in program.functions.values() {
        print_function(&mut out, func, ssa, &returns, &program.types);
        out.push('\n');
    }

    out.push_str("declare ptr @malloc(i64)\n");
    out.push_str("declare void @free(ptr)\n");
    out.push_str("declare void @print(i64)\n");
    out.push_str("declare void @println(i64)\n");
    out.push_str("declare i64 @readnum()\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Map;
    use crate::front::ast::{self, Declaration, Expr, Stmt, Type};
    use crate::middle::{aasm, cfg as mcfg, ssa, sscp, unused};

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    fn simple_add_program() -> ast::Program {
        let body = vec![Stmt::Return(Some(Expr::Binary {
            op: ast::BinaryOp::Add,
            left: Box::new(Expr::Int(1)),
            right: Box::new(Expr::Int(2)),
        }))];
        let mut functions = Map::new();
        functions.insert(
            id("main"),
            ast::Function { id: id("main"), parameters: vec![], return_type: Type::Int, declarations: vec![], body, local_env: Map::new() },
        );
        ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() }
    }

    #[test]
    fn emits_function_header_and_ret() {
        let mut prog = mcfg::build(&simple_add_program());
        aasm::lower(&mut prog);
        let text = emit(&prog, false);
        assert!(text.contains("define i64 @main()"));
        assert!(text.contains("ret i64"));
    }

    #[test]
    fn ssa_mode_names_parameters_directly_with_no_alloca_preamble() {
        let param = Declaration { ty: Type::Int, id: id("n") };
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
        ssa::apply(&mut prog);
        let text = emit(&prog, true);
        assert!(text.contains("define i64 @f(i64 %n)"));
        assert!(!text.contains("alloca"));
    }

    #[test]
    fn struct_type_and_new_size_are_printed() {
        let mut types = ast::TypeDeclarations::new();
        types.insert(id("P"), vec![Declaration { ty: Type::Int, id: id("x") }, Declaration { ty: Type::Int, id: id("y") }]);
        let body = vec![Stmt::Return(Some(Expr::NewStruct(id("P"))))];
        let mut functions = Map::new();
        functions.insert(
            id("main"),
            ast::Function { id: id("main"), parameters: vec![], return_type: Type::Struct(id("P")), declarations: vec![], body, local_env: Map::new() },
        );
        let ast = ast::Program { types, declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        let text = emit(&prog, false);
        assert!(text.contains("%struct.P = type {i64, i64}"));
        assert!(text.contains("call ptr @malloc(i64 16)"));
    }

    #[test]
    fn fully_optimized_pipeline_collapses_constant_branch_to_a_jump() {
        let body = vec![ast::Stmt::Conditional {
            guard: Expr::True,
            then: vec![Stmt::Return(Some(Expr::Int(1)))],
            els: Some(vec![Stmt::Return(Some(Expr::Int(2)))]),
        }];
        let mut functions = Map::new();
        functions.insert(
            id("main"),
            ast::Function { id: id("main"), parameters: vec![], return_type: Type::Int, declarations: vec![], body, local_env: Map::new() },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: Map::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        ssa::apply(&mut prog);
        sscp::apply(&mut prog);
        unused::apply(&mut prog);
        let text = emit(&prog, true);
        assert!(!text.contains(" br i1"));
        assert!(text.contains("br label"));
    }
}
