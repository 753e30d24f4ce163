//! The abstract syntax tree.

use crate::common::{Id, Map};

/// A Mini source-level type.
///
/// Equality is structural except that `Null` compares equal to any `Struct`,
/// so `s == null` type-checks for any struct-typed `s`.
#[derive(Clone, Debug)]
pub enum Type {
    Int,
    Bool,
    Struct(Id),
    Array,
    Null,
    Void,
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        use Type::*;
        match (self, other) {
            (Struct(_), Null) | (Null, Struct(_)) => true,
            (Struct(a), Struct(b)) => a == b,
            (Int, Int) | (Bool, Bool) | (Array, Array) | (Null, Null) | (Void, Void) => true,
            _ => false,
        }
    }
}
impl Eq for Type {}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "'int'"),
            Type::Bool => write!(f, "'bool'"),
            Type::Struct(id) => write!(f, "'struct {id}'"),
            Type::Array => write!(f, "'array'"),
            Type::Null => write!(f, "'null'"),
            Type::Void => write!(f, "'void'"),
        }
    }
}

/// A declared name paired with its type, used for parameters, struct
/// members, and local `declare`d variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub ty: Type,
    pub id: Id,
}

/// Member lists by type name, in declaration order.
pub type TypeDeclarations = Map<Id, Vec<Declaration>>;

/// identifier -> type, used for both the per-function local environment and
/// the program's top (global) environment.
pub type Environment = Map<Id, Type>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Add,
    Sub,
    Eq,
    Neq,
    Grt,
    Geq,
    Lst,
    Leq,
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Var(Id),
    Int(i64),
    True,
    False,
    Null,
    NewStruct(Id),
    /// `new int[n]`. The size is a literal, not a general expression: array
    /// dimensions are fixed at the allocation site.
    NewArray(i64),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Invocation(Invocation),
    Dot {
        expr: Box<Expr>,
        id: Id,
    },
    Index {
        left: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub id: Id,
    pub arguments: Vec<Expr>,
}

/// L-values: assignable places. Distinct from `Expr` because `new T`,
/// literals, calls, etc. can never appear on the left of `=`.
#[derive(Clone, Debug, PartialEq)]
pub enum LValue {
    Var(Id),
    Dot { lvalue: Box<LValue>, id: Id },
    Index { lvalue: Box<LValue>, index: Box<Expr> },
}

/// The right-hand side of an assignment: either a normal expression or the
/// `read` builtin, which has no expression form of its own (it is neither a
/// literal nor a call the user can write anywhere else).
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Expr(Expr),
    Read,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Print(Expr),
    PrintLn(Expr),
    Delete(Expr),
    Return(Option<Expr>),
    Invocation(Invocation),
    Assignment { lvalue: LValue, source: Source },
    Conditional {
        guard: Expr,
        then: Block,
        els: Option<Block>,
    },
    Loop {
        guard: Expr,
        body: Block,
    },
}

pub type Block = Vec<Stmt>;

/// A function definition. `local_env` starts empty and is filled in by the
/// type checker.
#[derive(Clone, Debug)]
pub struct Function {
    pub id: Id,
    pub parameters: Vec<Declaration>,
    pub return_type: Type,
    pub declarations: Vec<Declaration>,
    pub body: Block,
    pub local_env: Environment,
}

pub type Functions = Map<Id, Function>;

/// A whole program. `top_env` starts empty and is filled in by the type
/// checker.
#[derive(Clone, Debug)]
pub struct Program {
    pub types: TypeDeclarations,
    pub declarations: Vec<Declaration>,
    pub functions: Functions,
    pub top_env: Environment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    #[test]
    fn null_equals_any_struct() {
        assert_eq!(Type::Struct(id("P")), Type::Null);
        assert_eq!(Type::Null, Type::Struct(id("Q")));
    }

    #[test]
    fn distinct_structs_are_not_equal() {
        assert_ne!(Type::Struct(id("P")), Type::Struct(id("Q")));
    }

    #[test]
    fn same_struct_name_equal() {
        assert_eq!(Type::Struct(id("P")), Type::Struct(id("P")));
    }

    #[test]
    fn scalars_are_not_cross_equal() {
        assert_ne!(Type::Int, Type::Bool);
        assert_ne!(Type::Array, Type::Null);
    }
}
