//! Syntax tree consumed and produced by the expansion engine.
//!
//! The engine never parses source itself: a host compiler hands it an
//! already-built [`SyntaxTree`] together with a semantic model bound against
//! it. This module defines that tree, a C-like surface rendering used for
//! traces and textual comparisons, and (in [`builder`]) constructors for the
//! fragments macros emit.
//!
//! All nodes carry a [`Span`] so that diagnostics can point back at the
//! original call site. Nodes synthesized by macros use `Span::default()`.

// ============================================================================
// IMPORTS
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod builder;
pub mod visit;

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Represents a span in the source code.
///
/// # Examples
///
/// ```rust
/// use stagecraft::ast::Span;
/// let span = Span { start: 0, end: 5 };
/// assert_eq!(span.len(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes; zero-width spans report 0.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A type as written in a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Void,
    Int,
    Bool,
    String,
    Object,
    /// A syntax statement handed to a macro as a value.
    Statement,
    /// A syntax block handed to a macro as a value.
    Block,
    /// The quote context, bare (`Quote`) or parameterized by a result type (`Quote<T>`).
    Quote(Option<Box<TypeRef>>),
    Named(String),
    /// A reference to a generic type parameter of the enclosing declaration.
    Generic(String),
    /// No type written (lambda parameters, `var`).
    Inferred,
}

impl TypeRef {
    pub fn quote() -> Self {
        TypeRef::Quote(None)
    }

    pub fn quote_of(result: TypeRef) -> Self {
        TypeRef::Quote(Some(Box::new(result)))
    }

    pub fn is_quote(&self) -> bool {
        matches!(self, TypeRef::Quote(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    /// The name used when matching declarations against compiled implementations.
    pub fn type_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Int => f.write_str("int"),
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::String => f.write_str("string"),
            TypeRef::Object => f.write_str("object"),
            TypeRef::Statement => f.write_str("Statement"),
            TypeRef::Block => f.write_str("Block"),
            TypeRef::Quote(None) => f.write_str("Quote"),
            TypeRef::Quote(Some(result)) => write!(f, "Quote<{}>", result),
            TypeRef::Named(name) | TypeRef::Generic(name) => f.write_str(name),
            TypeRef::Inferred => f.write_str("var"),
        }
    }
}

/// Compile-time constant literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Literal::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    Name {
        name: String,
        span: Span,
    },
    Call(CallExpr),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
    Lambda(Lambda),
}

/// A call to a (possibly qualified) function, e.g. `Meta.Repeat<int>(3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    /// Dotted callee path as written.
    pub callee: String,
    pub type_args: Vec<TypeRef>,
    pub args: Vec<Expr>,
    pub span: Span,
}

impl CallExpr {
    /// Last segment of the callee path.
    pub fn simple_name(&self) -> &str {
        self.callee.rsplit('.').next().unwrap_or(&self.callee)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: LambdaBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LambdaBody {
    Expr(Box<Expr>),
    Block(Block),
}

/// A declared parameter of a function or lambda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Expr>,
}

/// Statement node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Empty {
        span: Span,
    },
    Expr {
        expr: Expr,
        span: Span,
    },
    Local {
        ty: TypeRef,
        name: String,
        init: Option<Expr>,
        span: Span,
    },
    Block(Block),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub is_static: bool,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub body: Block,
    /// Attribute names written on the declaration, e.g. `Macro`.
    pub attributes: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessorKind {
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessor {
    pub kind: AccessorKind,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: TypeRef,
    pub accessors: Vec<Accessor>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    Function(FunctionDecl),
    Property(PropertyDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub members: Vec<Member>,
    pub span: Span,
}

/// Top-level item of a compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Type(TypeDecl),
    Function(FunctionDecl),
    /// Top-level statements of a script-style unit.
    Statements(Block),
}

/// One compilation unit (file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxTree {
    pub path: String,
    /// Original source text, if the host kept it; used to render diagnostics.
    pub source: Option<String>,
    pub items: Vec<Item>,
}

impl SyntaxTree {
    pub fn new(path: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            path: path.into(),
            source: None,
            items,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ============================================================================
// PUBLIC API IMPLEMENTATION
// ============================================================================

impl Expr {
    /// Returns the span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Name { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Assign { span, .. } => *span,
            Expr::Call(call) => call.span,
            Expr::Lambda(lambda) => lambda.span,
        }
    }

    pub fn as_call(&self) -> Option<&CallExpr> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }

    /// The literal value when this expression is a plain constant.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    // Operands of these kinds are parenthesized when nested.
    fn needs_parens(&self) -> bool {
        matches!(
            self,
            Expr::Binary { .. } | Expr::Assign { .. } | Expr::Lambda(_)
        )
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Empty { span }
            | Stmt::Expr { span, .. }
            | Stmt::Local { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Return { span, .. } => *span,
            Stmt::Block(block) => block.span,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Stmt::Block(_))
    }

    /// Wraps a bare expression as an expression statement.
    pub fn from_expr(expr: Expr) -> Self {
        let span = expr.span();
        Stmt::Expr { expr, span }
    }
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self {
            statements,
            span: Span::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl FunctionDecl {
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ============================================================================
// PRETTY PRINTING
// ============================================================================

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value, .. } => write!(f, "{}", value),
            Expr::Name { name, .. } => f.write_str(name),
            Expr::Call(call) => write!(f, "{}", call),
            Expr::Unary { op, operand, .. } => fmt_unary(f, *op, operand),
            Expr::Binary { op, lhs, rhs, .. } => {
                fmt_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(f, rhs)
            }
            Expr::Assign { target, value, .. } => write!(f, "{} = {}", target, value),
            Expr::Lambda(lambda) => write!(f, "{}", lambda),
        }
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, operand: &Expr) -> fmt::Result {
    if operand.needs_parens() {
        write!(f, "({})", operand)
    } else {
        write!(f, "{}", operand)
    }
}

fn fmt_unary(f: &mut fmt::Formatter<'_>, op: UnaryOp, operand: &Expr) -> fmt::Result {
    let (prefix, suffix) = match op {
        UnaryOp::Neg => ("-", ""),
        UnaryOp::Not => ("!", ""),
        UnaryOp::PreIncrement => ("++", ""),
        UnaryOp::PreDecrement => ("--", ""),
        UnaryOp::PostIncrement => ("", "++"),
        UnaryOp::PostDecrement => ("", "--"),
    };
    f.write_str(prefix)?;
    fmt_operand(f, operand)?;
    f.write_str(suffix)
}

impl fmt::Display for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.callee)?;
        if !self.type_args.is_empty() {
            write!(f, "<{}>", join(&self.type_args, ", "))?;
        }
        write!(f, "({})", join(&self.args, ", "))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            TypeRef::Inferred => f.write_str(&self.name)?,
            ref ty => write!(f, "{} {}", ty, self.name)?,
        }
        if let Some(default) = &self.default {
            write!(f, " = {}", default)?;
        }
        Ok(())
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) => ", join(&self.params, ", "))?;
        match &self.body {
            LambdaBody::Expr(expr) => write!(f, "{}", expr),
            LambdaBody::Block(block) => write!(f, "{}", block),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Empty { .. } => f.write_str(";"),
            Stmt::Expr { expr, .. } => write!(f, "{};", expr),
            Stmt::Local { ty, name, init, .. } => match init {
                Some(init) => write!(f, "{} {} = {};", ty, name, init),
                None => write!(f, "{} {};", ty, name),
            },
            Stmt::Block(block) => write!(f, "{}", block),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                write!(f, "if ({}) {}", condition, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " else {}", else_branch)?;
                }
                Ok(())
            }
            Stmt::While {
                condition, body, ..
            } => write!(f, "while ({}) {}", condition, body),
            Stmt::Return { value: None, .. } => f.write_str("return;"),
            Stmt::Return {
                value: Some(value), ..
            } => write!(f, "return {};", value),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statements.is_empty() {
            return f.write_str("{ }");
        }
        write!(f, "{{ {} }}", join(&self.statements, " "))
    }
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for attribute in &self.attributes {
            write!(f, "[{}] ", attribute)?;
        }
        if self.is_static {
            f.write_str("static ")?;
        }
        write!(f, "{} {}", self.return_type, self.name)?;
        if !self.type_params.is_empty() {
            write!(f, "<{}>", self.type_params.join(", "))?;
        }
        write!(f, "({}) {}", join(&self.params, ", "), self.body)
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}
