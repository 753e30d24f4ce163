//! SSA construction: dominators, dominance frontiers, phi placement, and
//! dominator-tree-driven renaming, after Cytron et al. Runs per function on
//! the AASM attached by [`crate::middle::aasm::lower`]; turns per-local
//! loads/stores into versioned SSA values with phi nodes at merge points.
//! Globals and addresses of aggregate memory (struct/array element
//! addresses) are left in load/store form — only scalars whose address is
//! never taken get promoted.

use std::collections::HashMap;

use crate::common::{Id, Map, Set};
use crate::middle::aasm::{Ins, Operand, Value};
use crate::middle::cfg::{self, Block, BlockId, BlockKind, Function};

/// Blocks that `Store _, %x` for each local `x`, in traversal order (the
/// order iterated-frontier placement consumes them in).
fn edit_blocks(func: &Function) -> Map<Id, Vec<BlockId>> {
    let mut edits: Map<Id, Vec<BlockId>> = Map::new();
    for id in cfg::pre_order(func.entry, &func.arena) {
        for ins in &func.arena.get(id).insns {
            if let Ins::Store { ptr, .. } = ins {
                if let Value::Local(x) = ptr.value {
                    if func.local_env.contains_key(&x) {
                        edits.entry(x).or_default().push(id);
                    }
                }
            }
        }
    }
    edits
}

/// Iterative fixed-point dominator computation. `dom(b) = {b} ∪ ⋂ dom(p)` for
/// `p ∈ preds(b)`, seeded with `dom(entry) = {entry}` and everything else at
/// the universal set; converges because the lattice only shrinks.
fn dominators(entry: BlockId, all: &[BlockId], preds: &Map<BlockId, Set<BlockId>>) -> Map<BlockId, Set<BlockId>> {
    let universe: Set<BlockId> = all.iter().copied().collect();
    let mut doms: Map<BlockId, Set<BlockId>> = all.iter().map(|&b| (b, universe.clone())).collect();
    doms.insert(entry, Set::from([entry]));

    let mut changed = true;
    while changed {
        changed = false;
        for &b in all {
            if b == entry {
                continue;
            }
            let mut new_dom: Option<Set<BlockId>> = None;
            for p in preds.get(&b).into_iter().flatten() {
                new_dom = Some(match new_dom {
                    None => doms[p].clone(),
                    Some(acc) => acc.intersection(&doms[p]).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(b);
            if new_dom != doms[&b] {
                changed = true;
                doms.insert(b, new_dom);
            }
        }
    }
    doms
}

/// `idom(b)` is the element of `dom(b) \ {b}` dominated by every other
/// element of `dom(b) \ {b}`, found by pairwise elimination: of any two
/// remaining candidates, the one *not* dominating the other survives, since
/// a strict dominator of `b` that is itself dominated by another strict
/// dominator of `b` cannot be the immediate one.
fn immediate_dominators(entry: BlockId, all: &[BlockId], doms: &Map<BlockId, Set<BlockId>>) -> Map<BlockId, BlockId> {
    let mut idom = Map::new();
    for &b in all {
        if b == entry {
            continue;
        }
        let mut candidates: Vec<BlockId> = doms[&b].iter().copied().filter(|&d| d != b).collect();
        while candidates.len() > 1 {
            let left = candidates.pop().unwrap();
            let right = candidates.pop().unwrap();
            if doms[&left].contains(&right) {
                candidates.push(left);
            } else {
                candidates.push(right);
            }
        }
        if let Some(&only) = candidates.first() {
            idom.insert(b, only);
        }
    }
    idom
}

fn dom_tree(idom: &Map<BlockId, BlockId>) -> Map<BlockId, Set<BlockId>> {
    let mut tree: Map<BlockId, Set<BlockId>> = Map::new();
    for (&child, &parent) in idom {
        tree.entry(parent).or_default().insert(child);
    }
    tree
}

/// For every join point (`|preds(b)| >= 2`), walk each predecessor upward via
/// `idom` until reaching a strict dominator of `b`; every intermediate node
/// gets `b` added to its frontier.
fn frontiers(
    all: &[BlockId],
    preds: &Map<BlockId, Set<BlockId>>,
    idom: &Map<BlockId, BlockId>,
) -> Map<BlockId, Set<BlockId>> {
    let mut fronts: Map<BlockId, Set<BlockId>> = all.iter().map(|&b| (b, Set::new())).collect();
    for &b in all {
        let ps = preds.get(&b).cloned().unwrap_or_default();
        if ps.len() < 2 {
            continue;
        }
        for pred in ps {
            let mut runner = pred;
            while Some(runner) != idom.get(&b).copied() {
                fronts.entry(runner).or_default().insert(b);
                match idom.get(&runner) {
                    Some(&next) => runner = next,
                    None => break,
                }
            }
        }
    }
    fronts
}

/// Highest `Var` id any instruction in the function already reads or
/// produces, so freshly placed phi targets can continue the same numbering
/// without colliding with values AASM lowering already handed out.
fn max_var_id(func: &Function) -> u32 {
    let mut max = 0u32;
    let mut bump = |op: &Operand| {
        if let Value::Var(v) = op.value {
            max = max.max(v);
        }
    };
    for id in cfg::pre_order(func.entry, &func.arena) {
        for ins in &func.arena.get(id).insns {
            if let Some(target) = crate::middle::aasm::result_of(ins) {
                bump(target);
            }
            crate::middle::aasm::for_each_operand(ins, &mut bump);
        }
    }
    max
}

/// Iterated dominance-frontier phi placement, per variable: seed the
/// worklist with `x`'s edit blocks, and whenever a block on the worklist's
/// frontier lacks a phi for `x`, insert one and add that block to the
/// worklist too (so phis placed for the frontier of a phi insertion are
/// themselves propagated).
fn place_phis(
    func: &mut Function,
    edits: &Map<Id, Vec<BlockId>>,
    fronts: &Map<BlockId, Set<BlockId>>,
    preds: &Map<BlockId, Set<BlockId>>,
) {
    let mut next_var = max_var_id(func) + 1;
    for (&var, blocks) in edits {
        let mut worklist = blocks.clone();
        let mut placed: Set<BlockId> = Set::new();
        let mut i = 0;
        while i < worklist.len() {
            let b = worklist[i];
            let front = fronts.get(&b).cloned().unwrap_or_default();
            for target in front {
                if placed.contains(&target) {
                    continue;
                }
                let already = func.arena.get(target).insns.iter().any(|ins| {
                    matches!(ins, Ins::Phi { var: v, .. } if *v == var)
                });
                if already {
                    continue;
                }
                let ty = func.local_env[&var].clone();
                let bindings: Map<BlockId, Operand> = preds
                    .get(&target)
                    .into_iter()
                    .flatten()
                    .map(|&p| (p, Operand { value: Value::Local(var), ty: ty.clone() }))
                    .collect();
                let phi = Ins::Phi { target: Operand { value: Value::Var(next_var), ty }, var, bindings };
                next_var += 1;
                func.arena.get_mut(target).insns.insert(0, phi);
                placed.insert(target);
                worklist.push(target);
            }
            i += 1;
        }
    }
}

/// Strip a `.k`-style disambiguator before looking a name up on the rename
/// stack. Mini identifiers never contain `.`, so this only ever matches
/// synthetic suffixes this pass itself might add — kept as a no-op hook for
/// fidelity with the reference renamer, which relies on the same contract.
fn root_name(id: Id) -> Id {
    match id.as_ref().find('.') {
        Some(i) => Id::new(id.as_ref()[..i].to_string()),
        None => id,
    }
}

struct Renamer<'a> {
    func: &'a mut Function,
    succs: &'a Map<BlockId, Set<BlockId>>,
    tree: &'a Map<BlockId, Set<BlockId>>,
    /// Per-local-name stack of the current SSA value, keyed by root name.
    stacks: HashMap<Id, Vec<Operand>>,
    /// Remembers, for a `Var` id produced by a folded local load, the
    /// address operand it was read from — so a later use of that `Var` can
    /// be resolved the same way a direct `Id` use would be.
    folded: HashMap<u32, Operand>,
}

impl<'a> Renamer<'a> {
    fn lookup(&self, op: &Operand) -> Operand {
        match op.value {
            Value::Local(id) => {
                let root = root_name(id);
                match self.stacks.get(&root).and_then(|s| s.last()) {
                    Some(top) => top.clone(),
                    None => op.clone(),
                }
            }
            Value::Var(v) => match self.folded.get(&v) {
                Some(addr) => self.lookup(addr),
                None => op.clone(),
            },
            _ => op.clone(),
        }
    }

    fn push(&mut self, root: Id, value: Operand) {
        self.stacks.entry(root).or_default().push(value);
    }

    fn rename_block(&mut self, id: BlockId) {
        let old = std::mem::take(&mut self.func.arena.get_mut(id).insns);
        let mut pushed: Vec<Id> = Vec::new();
        let mut new_insns = Vec::with_capacity(old.len());

        for ins in old {
            match ins {
                Ins::Load { target, ptr } => {
                    if let (Value::Var(v), Value::Local(x)) = (target.value, ptr.value) {
                        if self.func.local_env.contains_key(&x) {
                            self.folded.insert(v, ptr);
                            continue;
                        }
                    }
                    new_insns.push(Ins::Load { target, ptr: self.lookup(&ptr) });
                }
                Ins::Store { value, ptr } => {
                    if let Value::Local(x) = ptr.value {
                        if self.func.local_env.contains_key(&x) {
                            let root = root_name(x);
                            let resolved = self.lookup(&value);
                            self.push(root, resolved);
                            pushed.push(root);
                            continue;
                        }
                    }
                    new_insns.push(Ins::Store { value: self.lookup(&value), ptr: self.lookup(&ptr) });
                }
                Ins::Phi { target, var, bindings } => {
                    self.push(root_name(var), target.clone());
                    pushed.push(root_name(var));
                    new_insns.push(Ins::Phi { target, var, bindings });
                }
                mut other => {
                    let renamed = {
                        crate::middle::aasm::for_each_operand_mut(&mut other, |o| *o = self.lookup(o));
                        other
                    };
                    new_insns.push(renamed);
                }
            }
        }
        self.func.arena.get_mut(id).insns = new_insns;

        for succ in self.succs.get(&id).cloned().unwrap_or_default() {
            self.patch_phis(succ, id);
        }

        for child in self.tree.get(&id).cloned().unwrap_or_default() {
            self.rename_block(child);
        }

        for root in pushed {
            self.stacks.get_mut(&root).unwrap().pop();
        }
    }

    /// After renaming block `pred`, fix up every phi in `succ` whose binding
    /// came from `pred`: replace it with the current stack top for that
    /// variable, or drop the binding if the variable was never defined along
    /// this path (dropping the whole phi if it ends up with no bindings).
    fn patch_phis(&mut self, succ: BlockId, pred: BlockId) {
        let block: &mut Block = self.func.arena.get_mut(succ);
        let mut keep = Vec::with_capacity(block.insns.len());
        for ins in std::mem::take(&mut block.insns) {
            match ins {
                Ins::Phi { target, var, mut bindings } => {
                    if bindings.contains_key(&pred) {
                        let root = root_name(var);
                        match self.stacks.get(&root).and_then(|s| s.last()) {
                            Some(top) => {
                                bindings.insert(pred, top.clone());
                            }
                            None => {
                                bindings.remove(&pred);
                            }
                        }
                    }
                    if !bindings.is_empty() {
                        keep.push(Ins::Phi { target, var, bindings });
                    }
                }
                other => keep.push(other),
            }
        }
        self.func.arena.get_mut(succ).insns = keep;
    }
}

fn ssa_function(func: &mut Function) {
    let all = cfg::pre_order(func.entry, &func.arena);
    let (preds, succs) = cfg::preds_succs(func.entry, &func.arena);
    let edits = edit_blocks(func);
    let doms = dominators(func.entry, &all, &preds);
    let idom = immediate_dominators(func.entry, &all, &doms);
    let tree = dom_tree(&idom);
    let fronts = frontiers(&all, &preds, &idom);

    place_phis(func, &edits, &fronts, &preds);

    let mut stacks: HashMap<Id, Vec<Operand>> = HashMap::new();
    for param in &func.parameters {
        stacks.insert(param.id, vec![Operand { value: Value::Local(param.id), ty: param.ty.clone() }]);
    }

    let entry = func.entry;
    let mut renamer = Renamer { func, succs: &succs, tree: &tree, stacks, folded: HashMap::new() };
    renamer.rename_block(entry);
}

/// Run SSA construction over every function in a lowered program.
pub fn apply(program: &mut cfg::Program) {
    for func in program.functions.values_mut() {
        ssa_function(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Map as CMap;
    use crate::front::ast::{self, BinaryOp, Declaration, Expr, LValue, Source, Stmt, Type};
    use crate::middle::{aasm, cfg as mcfg};

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    fn build(body: ast::Block, decls: Vec<Declaration>, ret: Type) -> cfg::Program {
        let mut lenv = CMap::new();
        for d in &decls {
            lenv.insert(d.id, d.ty.clone());
        }
        let mut functions = CMap::new();
        functions.insert(
            id("f"),
            ast::Function { id: id("f"), parameters: vec![], return_type: ret, declarations: decls, body, local_env: lenv },
        );
        let ast = ast::Program { types: ast::TypeDeclarations::new(), declarations: vec![], functions, top_env: CMap::new() };
        let mut prog = mcfg::build(&ast);
        aasm::lower(&mut prog);
        prog
    }

    fn if_else_program() -> cfg::Program {
        // x is defined on both branches of an if, then returned: the join
        // point must get exactly one phi for x.
        let body = vec![
            Stmt::Conditional {
                guard: Expr::True,
                then: vec![Stmt::Assignment { lvalue: LValue::Var(id("x")), source: Source::Expr(Expr::Int(1)) }],
                els: Some(vec![Stmt::Assignment { lvalue: LValue::Var(id("x")), source: Source::Expr(Expr::Int(2)) }]),
            },
            Stmt::Return(Some(Expr::Var(id("x")))),
        ];
        build(body, vec![Declaration { ty: Type::Int, id: id("x") }], Type::Int)
    }

    #[test]
    fn join_point_gets_exactly_one_phi_for_the_merged_variable() {
        let mut prog = if_else_program();
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let phis: Vec<_> = func
            .arena
            .get(func.ret_sink)
            .insns
            .iter()
            .filter(|i| matches!(i, Ins::Phi { var, .. } if *var == id("x")))
            .collect();
        assert_eq!(phis.len(), 1);
    }

    #[test]
    fn phi_bindings_cover_exactly_the_predecessors() {
        let mut prog = if_else_program();
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let (preds, _) = cfg::preds_succs(func.entry, &func.arena);
        let ret_preds = preds.get(&func.ret_sink).cloned().unwrap_or_default();
        let phi = func
            .arena
            .get(func.ret_sink)
            .insns
            .iter()
            .find_map(|i| match i {
                Ins::Phi { var, bindings, .. } if *var == id("x") => Some(bindings.clone()),
                _ => None,
            })
            .expect("phi for x");
        let binding_keys: Set<BlockId> = phi.keys().copied().collect();
        assert_eq!(binding_keys, ret_preds);
    }

    #[test]
    fn stores_to_locals_are_eliminated() {
        let mut prog = if_else_program();
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let has_store = cfg::pre_order(func.entry, &func.arena).into_iter().any(|b| {
            func.arena.get(b).insns.iter().any(|i| matches!(i, Ins::Store { .. }))
        });
        assert!(!has_store);
    }

    #[test]
    fn straight_line_function_gets_no_phis() {
        let body = vec![
            Stmt::Assignment { lvalue: LValue::Var(id("x")), source: Source::Expr(Expr::Int(5)) },
            Stmt::Return(Some(Expr::Var(id("x")))),
        ];
        let mut prog = build(body, vec![Declaration { ty: Type::Int, id: id("x") }], Type::Int);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let any_phi = cfg::pre_order(func.entry, &func.arena)
            .into_iter()
            .any(|b| func.arena.get(b).insns.iter().any(|i| matches!(i, Ins::Phi { .. })));
        assert!(!any_phi);
    }

    #[test]
    fn loop_variable_gets_a_phi_at_the_header() {
        let body = vec![
            Stmt::Loop {
                guard: Expr::Binary { op: BinaryOp::Lst, left: Box::new(Expr::Var(id("i"))), right: Box::new(Expr::Int(10)) },
                body: vec![Stmt::Assignment {
                    lvalue: LValue::Var(id("i")),
                    source: Source::Expr(Expr::Binary { op: BinaryOp::Add, left: Box::new(Expr::Var(id("i"))), right: Box::new(Expr::Int(1)) }),
                }],
            },
            Stmt::Return(None),
        ];
        let mut prog = build(body, vec![Declaration { ty: Type::Int, id: id("i") }], Type::Void);
        apply(&mut prog);
        let func = &prog.functions[&id("f")];
        let any_phi = cfg::pre_order(func.entry, &func.arena)
            .into_iter()
            .any(|b| func.arena.get(b).insns.iter().any(|i| matches!(i, Ins::Phi { var, .. } if *var == id("i"))));
        assert!(any_phi);
    }
}
