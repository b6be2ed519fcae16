use crate::span::Spanned;
use crate::types::Ty;

/// A parsed `.cf` source file: a sequence of top-level declarations.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub name: String,
    pub declarations: Vec<Spanned<Declaration>>,
}

#[derive(Clone, Debug)]
pub enum Declaration {
    Fn(FnDecl),
    Let(LetDecl),
}

/// `fn name(params) type? (block | ;)` — a missing return type means `void`,
/// a missing body makes this a forward declaration.
#[derive(Clone, Debug)]
pub struct FnDecl {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub return_ty: Option<Spanned<Ty>>,
    pub body: Option<Spanned<Block>>,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Spanned<Ty>,
}

/// `let name: type (= init)? ;`
#[derive(Clone, Debug)]
pub struct LetDecl {
    pub name: Spanned<String>,
    pub ty: Spanned<Ty>,
    pub init: Option<Spanned<Expr>>,
}

/// An ordered statement sequence forming a lexical scope.
#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Expr(Spanned<Expr>),
    Decl(Declaration),
    Block(Spanned<Block>),
    If {
        cond: Spanned<Expr>,
        then_block: Spanned<Block>,
        else_block: Option<Spanned<Block>>,
    },
    While {
        cond: Spanned<Expr>,
        body: Spanned<Block>,
    },
}

/// Expressions. Literal nodes are untyped until a surrounding conversion
/// or assignment/call context fixes their type.
#[derive(Clone, Debug)]
pub enum Expr {
    Integer(u64),
    Floating(f64),
    Ident(String),
    Call {
        callee: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
    },
    Conversion {
        inner: Box<Spanned<Expr>>,
        ty: Spanned<Ty>,
    },
    Assignment {
        dest: Spanned<String>,
        op: AssignOp,
        value: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Plain, // =
    Add,   // +=
    Sub,   // -=
    Mul,   // *=
    Div,   // /=
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}
