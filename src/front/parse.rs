//! The parser.
//!
//! A hand-written recursive-descent parser over the token stream `lex`
//! produces. Mini's grammar has two declaration shapes that read in opposite
//! orders: struct members and function parameters are `id ':' type`, while
//! globals and function-local variables are `type id (',' id)*`. Both are
//! ports of the corresponding ANTLR rules in the reference grammar, just
//! collapsed into one recursive-descent parser instead of a generated one.

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::Id;

use super::ast::*;
use super::lex::*;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError(e.to_string())
    }
}

impl std::error::Error for ParseError {}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = Lexer::new(input);
    while let Some(tok) = lexer.next()? {
        tokens.push(tok);
    }
    Parser { tokens, pos: 0 }.program()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek2_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| t.kind)
    }

    fn bump(&mut self) -> Token<'src> {
        let tok = self.tokens[self.pos];
        self.pos += 1;
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        match self.peek() {
            Some(tok) => {
                ParseError(format!("expected {wanted}, found '{}' at byte {}", tok.text, tok.pos))
            }
            None => ParseError(format!("expected {wanted}, found end of input")),
        }
    }

    fn id(&mut self) -> Result<Id, ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(Id::new(tok.text.to_string()))
    }

    fn num(&mut self) -> Result<i64, ParseError> {
        let tok = self.expect(TokenKind::Num)?;
        tok.text
            .parse()
            .map_err(|_| ParseError(format!("integer literal '{}' out of range", tok.text)))
    }

    // --- top level -----------------------------------------------------

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut types = TypeDeclarations::new();
        let mut declarations = Vec::new();
        let mut functions = Functions::new();

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Struct => {
                    let (name, members) = self.struct_decl()?;
                    if types.insert(name, members).is_some() {
                        return Err(ParseError(format!("struct '{name}' is defined more than once")));
                    }
                }
                TokenKind::Fun => {
                    let f = self.function()?;
                    if functions.insert(f.id, f).is_some() {
                        return Err(ParseError("a function is defined more than once".to_string()));
                    }
                }
                _ => declarations.extend(self.declaration_group()?),
            }
        }

        Ok(Program { types, declarations, functions, top_env: Environment::new() })
    }

    fn struct_decl(&mut self) -> Result<(Id, Vec<Declaration>), ParseError> {
        self.expect(TokenKind::Struct)?;
        let name = self.id()?;
        self.expect(TokenKind::LBrace)?;
        let members = self.decl_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;
        Ok((name, members))
    }

    /// A comma-separated list of `id ':' type`, used for struct members and
    /// function parameters. `end` terminates the list without being
    /// consumed.
    fn decl_list(&mut self, end: TokenKind) -> Result<Vec<Declaration>, ParseError> {
        let mut out = Vec::new();
        if self.at(end) {
            return Ok(out);
        }
        loop {
            let id = self.id()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.ty()?;
            out.push(Declaration { ty, id });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(out)
    }

    /// `type id (',' id)* ';'`: a group of variables sharing one type, used
    /// for globals and function-local declarations.
    fn declaration_group(&mut self) -> Result<Vec<Declaration>, ParseError> {
        let ty = self.ty()?;
        let mut out = vec![Declaration { ty: ty.clone(), id: self.id()? }];
        while self.eat(TokenKind::Comma) {
            out.push(Declaration { ty: ty.clone(), id: self.id()? });
        }
        self.expect(TokenKind::Semi)?;
        Ok(out)
    }

    fn ty(&mut self) -> Result<Type, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::IntTy) => {
                self.bump();
                if self.eat(TokenKind::LBracket) {
                    self.expect(TokenKind::RBracket)?;
                    Ok(Type::Array)
                } else {
                    Ok(Type::Int)
                }
            }
            Some(TokenKind::BoolTy) => {
                self.bump();
                Ok(Type::Bool)
            }
            Some(TokenKind::Id) => Ok(Type::Struct(self.id()?)),
            _ => Err(self.unexpected("a type")),
        }
    }

    fn return_type(&mut self) -> Result<Type, ParseError> {
        if self.eat(TokenKind::VoidTy) {
            Ok(Type::Void)
        } else {
            self.ty()
        }
    }

    fn function(&mut self) -> Result<Function, ParseError> {
        self.expect(TokenKind::Fun)?;
        let id = self.id()?;
        self.expect(TokenKind::LParen)?;
        let parameters = self.decl_list(TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let return_type = self.return_type()?;
        self.expect(TokenKind::LBrace)?;
        let (declarations, body) = self.function_body()?;
        self.expect(TokenKind::RBrace)?;
        Ok(Function {
            id,
            parameters,
            return_type,
            declarations,
            body,
            local_env: Environment::new(),
        })
    }

    /// A function body is a run of local declarations followed by a run of
    /// statements. A declaration is distinguished from a statement by its
    /// leading tokens: `int`/`bool` always start one, and two consecutive
    /// identifiers (`StructName name`) start a struct-typed one; everything
    /// else is a statement.
    fn function_body(&mut self) -> Result<(Vec<Declaration>, Block), ParseError> {
        let mut declarations = Vec::new();
        while self.starts_declaration() {
            declarations.extend(self.declaration_group()?);
        }

        let mut body = Vec::new();
        while !self.at(TokenKind::RBrace) {
            self.stmt(&mut body)?;
        }
        Ok((declarations, body))
    }

    fn starts_declaration(&self) -> bool {
        match self.peek_kind() {
            Some(TokenKind::IntTy) | Some(TokenKind::BoolTy) => true,
            Some(TokenKind::Id) => self.peek2_kind() == Some(TokenKind::Id),
            _ => false,
        }
    }

    // --- statements ------------------------------------------------------

    /// Parses one statement, pushing it onto `out`. A bare `{ ... }` is not
    /// its own statement kind: its contents are spliced directly into `out`.
    fn stmt(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        match self.peek_kind() {
            Some(TokenKind::LBrace) => {
                self.bump();
                while !self.at(TokenKind::RBrace) {
                    self.stmt(out)?;
                }
                self.expect(TokenKind::RBrace)?;
            }
            Some(TokenKind::Print) => {
                self.bump();
                let e = self.expr()?;
                self.expect(TokenKind::Semi)?;
                out.push(Stmt::Print(e));
            }
            Some(TokenKind::PrintLn) => {
                self.bump();
                let e = self.expr()?;
                self.expect(TokenKind::Semi)?;
                out.push(Stmt::PrintLn(e));
            }
            Some(TokenKind::Delete) => {
                self.bump();
                let e = self.expr()?;
                self.expect(TokenKind::Semi)?;
                out.push(Stmt::Delete(e));
            }
            Some(TokenKind::Return) => {
                self.bump();
                let e = if self.at(TokenKind::Semi) { None } else { Some(self.expr()?) };
                self.expect(TokenKind::Semi)?;
                out.push(Stmt::Return(e));
            }
            Some(TokenKind::If) => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let guard = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let then = self.block_or_stmt()?;
                let els = if self.eat(TokenKind::Else) { Some(self.block_or_stmt()?) } else { None };
                out.push(Stmt::Conditional { guard, then, els });
            }
            Some(TokenKind::While) => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let guard = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.block_or_stmt()?;
                out.push(Stmt::Loop { guard, body });
            }
            Some(TokenKind::Id) => out.push(self.id_led_stmt()?),
            _ => return Err(self.unexpected("a statement")),
        }
        Ok(())
    }

    /// Either a braced block or a single statement: `if`/`while` bodies in
    /// Mini do not require braces.
    fn block_or_stmt(&mut self) -> Result<Block, ParseError> {
        let mut block = Vec::new();
        self.stmt(&mut block)?;
        Ok(block)
    }

    /// A statement beginning with an identifier: either a bare call
    /// (`f(args);`) or an assignment to an lvalue (`x = ...;`, `x.f = ...;`,
    /// `x[i] = ...;`).
    fn id_led_stmt(&mut self) -> Result<Stmt, ParseError> {
        let id = self.id()?;
        if self.at(TokenKind::LParen) {
            let invocation = self.invocation_args(id)?;
            self.expect(TokenKind::Semi)?;
            return Ok(Stmt::Invocation(invocation));
        }

        let mut lvalue = LValue::Var(id);
        loop {
            if self.eat(TokenKind::Dot) {
                let field = self.id()?;
                lvalue = LValue::Dot { lvalue: Box::new(lvalue), id: field };
            } else if self.eat(TokenKind::LBracket) {
                let index = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                lvalue = LValue::Index { lvalue: Box::new(lvalue), index: Box::new(index) };
            } else {
                break;
            }
        }
        self.expect(TokenKind::Assign)?;
        let source =
            if self.eat(TokenKind::Read) { Source::Read } else { Source::Expr(self.expr()?) };
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Assignment { lvalue, source })
    }

    fn invocation_args(&mut self, id: Id) -> Result<Invocation, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut arguments = Vec::new();
        if !self.at(TokenKind::RParen) {
            arguments.push(self.expr()?);
            while self.eat(TokenKind::Comma) {
                arguments.push(self.expr()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Invocation { id, arguments })
    }

    // --- expressions, precedence climbing, loosest-binding first -------

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.and_expr()?;
            left = Expr::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.eq_expr()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.eq_expr()?;
            left = Expr::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn eq_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.rel_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinaryOp::Eq,
                Some(TokenKind::Neq) => BinaryOp::Neq,
                _ => break,
            };
            self.bump();
            let right = self.rel_expr()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn rel_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.add_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinaryOp::Lst,
                Some(TokenKind::Leq) => BinaryOp::Leq,
                Some(TokenKind::Gt) => BinaryOp::Grt,
                Some(TokenKind::Geq) => BinaryOp::Geq,
                _ => break,
            };
            self.bump();
            let right = self.add_expr()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.mul_expr()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.bump();
            let right = self.unary_expr()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(UnaryOp::Negative),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.unary_expr()?;
            Ok(Expr::Unary { op, expr: Box::new(expr) })
        } else {
            self.postfix_expr()
        }
    }

    fn postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.eat(TokenKind::Dot) {
                let id = self.id()?;
                expr = Expr::Dot { expr: Box::new(expr), id };
            } else if self.eat(TokenKind::LBracket) {
                let index = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index { left: Box::new(expr), index: Box::new(index) };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Num) => Ok(Expr::Int(self.num()?)),
            Some(TokenKind::True) => {
                self.bump();
                Ok(Expr::True)
            }
            Some(TokenKind::False) => {
                self.bump();
                Ok(Expr::False)
            }
            Some(TokenKind::Null) => {
                self.bump();
                Ok(Expr::Null)
            }
            Some(TokenKind::New) => {
                self.bump();
                if self.eat(TokenKind::IntTy) {
                    self.expect(TokenKind::LBracket)?;
                    let size = self.num()?;
                    self.expect(TokenKind::RBracket)?;
                    Ok(Expr::NewArray(size))
                } else {
                    Ok(Expr::NewStruct(self.id()?))
                }
            }
            Some(TokenKind::LParen) => {
                self.bump();
                let e = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            Some(TokenKind::Id) => {
                let id = self.id()?;
                if self.at(TokenKind::LParen) {
                    Ok(Expr::Invocation(self.invocation_args(id)?))
                } else {
                    Ok(Expr::Var(id))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}
