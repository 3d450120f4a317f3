//! Quote context: what a macro sees of its call site, and where it writes.
//!
//! One [`InvocationSite`] is built per expanded call. Every quote-typed
//! parameter of the macro receives its own [`Quote`] (a *sequence clone*
//! whose [`Quote::sequence`] is the parameter position), but all clones of
//! one invocation share a single [`AccumulationBuffer`]. Fragments land in the
//! buffer in the order the macro body emits them, whichever clone it uses.
//!
//! The buffer is written only while the macro body runs and is read exactly
//! once by the driver after the call returns ([`AccumulationBuffer::take`]).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{AccessorKind, Block, CallExpr, Expr, FunctionDecl, Lambda, Stmt};

// ============================================================================
// INVOCATION SITE
// ============================================================================

/// The nearest function, lambda or property accessor around a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Enclosing {
    TopLevel,
    Function(Rc<FunctionDecl>),
    Lambda(Rc<Lambda>),
    Accessor {
        property: String,
        kind: AccessorKind,
    },
}

impl Enclosing {
    /// Display name of the enclosing member, e.g. `Main`, `get_Count`.
    pub fn member_name(&self) -> String {
        match self {
            Enclosing::TopLevel => "<top-level>".to_string(),
            Enclosing::Function(decl) => decl.name.clone(),
            Enclosing::Lambda(_) => "<lambda>".to_string(),
            Enclosing::Accessor { property, kind } => match kind {
                AccessorKind::Get => format!("get_{}", property),
                AccessorKind::Set => format!("set_{}", property),
            },
        }
    }
}

/// Syntax and context of one macro call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationSite {
    /// Path of the compilation unit.
    pub file: String,
    pub call: CallExpr,
    /// The statement containing the call, as currently rewritten.
    pub statement: Stmt,
    pub enclosing: Enclosing,
    /// The function being compiled, when the call is inside one (also through
    /// lambdas), with every expansion made so far in place.
    pub function: Option<Rc<FunctionDecl>>,
    /// The smallest block around the statement, with earlier expansions in it applied.
    pub block: Rc<Block>,
    /// Position of the statement in `block`.
    pub statement_index: usize,
}

impl InvocationSite {
    /// Statements of the enclosing block that come before the call's statement.
    pub fn preceding_statements(&self) -> &[Stmt] {
        let end = self.statement_index.min(self.block.statements.len());
        &self.block.statements[..end]
    }

    /// The `offset`-th statement after the call's statement (0 is the next one).
    pub fn following_statement(&self, offset: usize) -> Option<&Stmt> {
        self.block.statements.get(self.statement_index + 1 + offset)
    }
}

// ============================================================================
// FRAGMENTS AND THE ACCUMULATION BUFFER
// ============================================================================

/// A piece of syntax produced by a macro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fragment {
    Expr(Expr),
    Stmt(Stmt),
    Function(FunctionDecl),
}

impl Fragment {
    /// Statement form of the fragment; bare expressions become expression statements.
    pub fn into_statement(self) -> Option<Stmt> {
        match self {
            Fragment::Expr(expr) => Some(Stmt::from_expr(expr)),
            Fragment::Stmt(stmt) => Some(stmt),
            Fragment::Function(_) => None,
        }
    }
}

impl From<Expr> for Fragment {
    fn from(expr: Expr) -> Self {
        Fragment::Expr(expr)
    }
}

impl From<Stmt> for Fragment {
    fn from(stmt: Stmt) -> Self {
        Fragment::Stmt(stmt)
    }
}

impl From<FunctionDecl> for Fragment {
    fn from(decl: FunctionDecl) -> Self {
        Fragment::Function(decl)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Expr(expr) => write!(f, "{}", expr),
            Fragment::Stmt(stmt) => write!(f, "{}", stmt),
            Fragment::Function(decl) => write!(f, "{}", decl),
        }
    }
}

/// Ordered fragments produced by one invocation.
#[derive(Debug, Clone, Default)]
pub struct AccumulationBuffer(Rc<RefCell<Vec<Fragment>>>);

impl AccumulationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fragment: Fragment) {
        self.0.borrow_mut().push(fragment);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Drains the buffer. A second call returns nothing.
    pub fn take(&self) -> Vec<Fragment> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn shares_with(&self, other: &AccumulationBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ============================================================================
// QUOTE
// ============================================================================

/// Per-invocation context handed to a quote-typed macro parameter.
///
/// Macros emit code through an explicit builder API:
///
/// ```rust
/// use stagecraft::ast::builder::{expr_stmt, name, post_increment};
/// use stagecraft::macros::{Invocation, MacroFailure};
///
/// fn increment_x(invocation: &mut Invocation) -> Result<(), MacroFailure> {
///     invocation.quote()?.emit(expr_stmt(post_increment(name("x"))));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Quote {
    sequence: usize,
    site: Rc<InvocationSite>,
    buffer: AccumulationBuffer,
}

impl Quote {
    pub fn new(site: Rc<InvocationSite>, buffer: AccumulationBuffer) -> Self {
        Self {
            sequence: 0,
            site,
            buffer,
        }
    }

    /// A clone for another parameter slot, sharing site and buffer.
    pub fn with_sequence(&self, sequence: usize) -> Self {
        Self {
            sequence,
            site: Rc::clone(&self.site),
            buffer: self.buffer.clone(),
        }
    }

    /// Position of the parameter this quote was passed to.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn site(&self) -> &InvocationSite {
        &self.site
    }

    pub fn call(&self) -> &CallExpr {
        &self.site.call
    }

    pub fn statement(&self) -> &Stmt {
        &self.site.statement
    }

    pub fn enclosing(&self) -> &Enclosing {
        &self.site.enclosing
    }

    /// Syntax of the call-site argument at `index`.
    pub fn argument(&self, index: usize) -> Option<&Expr> {
        self.site.call.args.get(index)
    }

    /// Appends a fragment (statement, expression or function declaration).
    pub fn emit(&self, fragment: impl Into<Fragment>) {
        self.buffer.push(fragment.into());
    }

    /// Produces the value of the call: a single expression replacing it in place.
    pub fn result(&self, expr: Expr) {
        self.buffer.push(Fragment::Expr(expr));
    }

    /// Number of fragments emitted so far by any clone.
    pub fn emitted(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &AccumulationBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::TypeRef;

    fn site() -> Rc<InvocationSite> {
        let statements = vec![
            local(TypeRef::Int, "x", Some(int(0))),
            expr_stmt(call("M", vec![])),
            local(TypeRef::Int, "y", Some(int(0))),
        ];
        Rc::new(InvocationSite {
            file: "main.cs".to_string(),
            call: call_expr("M", vec![]),
            statement: statements[1].clone(),
            enclosing: Enclosing::TopLevel,
            function: None,
            block: Rc::new(block(statements)),
            statement_index: 1,
        })
    }

    #[test]
    fn sequence_clones_share_one_buffer_in_call_order() {
        let root = Quote::new(site(), AccumulationBuffer::new());
        let first = root.with_sequence(0);
        let second = root.with_sequence(2);
        second.emit(expr_stmt(name("b")));
        first.emit(expr_stmt(name("a")));

        assert_eq!(second.sequence(), 2);
        assert!(first.buffer().shares_with(second.buffer()));
        let fragments: Vec<String> = root.buffer().take().iter().map(|f| f.to_string()).collect();
        assert_eq!(fragments, vec!["b;", "a;"]);
        assert!(root.buffer().take().is_empty());
    }

    #[test]
    fn site_exposes_neighbouring_statements() {
        let site = site();
        assert_eq!(site.preceding_statements().len(), 1);
        assert_eq!(
            site.following_statement(0).map(|s| s.to_string()),
            Some("int y = 0;".to_string())
        );
        assert!(site.following_statement(1).is_none());
    }
}
