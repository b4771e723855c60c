//! The parsed expression AST. Deliberately small: the testable scenarios in
//! spec §8 only exercise literals, property/index access, `.length`, and
//! equality/inequality, so the grammar stops there rather than growing a
//! general-purpose scripting language (an explicit scope decision, recorded
//! in DESIGN.md).

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// A bare identifier: one of `inputs`, `self`, `runtime`.
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    /// A code-block `return` statement (spec §4.A code blocks are "wrapped
    /// as a zero-arg function invocation; return value becomes the result").
    Return(Box<Expr>),
}
