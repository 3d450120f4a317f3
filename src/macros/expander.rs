//! The expansion driver.
//!
//! [`Expander`] rewrites one compilation unit at a time. Every block is
//! walked statement by statement; each statement is expanded to a fixpoint
//! (a call's output may itself contain macro calls), then its nested
//! statements and lambda bodies are walked the same way.
//!
//! What an invocation produced decides how it is placed:
//!
//! | Fragments | Placement |
//! |---|---|
//! | none | the statement becomes `;` (void, standalone calls only) |
//! | one expression | replaces the call expression in place |
//! | one statement | replaces the call's statement |
//! | one function | replaces the enclosing function, whose rewrite restarts |
//! | several | spliced into the enclosing block in place of the call's statement |
//!
//! Captured following statements are deleted together with the call's
//! statement. Splices are recorded against the block's original positions and
//! applied once the block has been walked (see [`SpliceStack`]); a later call
//! in the same block already sees them in its [`InvocationSite`]. Inserted
//! statements are walked again before they are spliced, so macro calls they
//! contain are expanded too. The statements after the call stay visible while
//! they are walked, and an inserted call may capture them.

use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::visit::{self, is_standalone_call, replace_call};
use crate::ast::{
    Block, CallExpr, Expr, FunctionDecl, Item, Lambda, LambdaBody, Member, PropertyDecl, Span,
    Stmt, SyntaxTree,
};
use crate::config::ExpansionConfig;
use crate::diagnostics::{
    to_error_source, DiagnosticRecord, DiagnosticSink, ExpansionError, SourceArc,
};
use crate::err_ctx;
use crate::macros::invoke::{
    invoke, resolve_type_args, HandleRegistry, Invocation, MetadataResolver, NameMetadataResolver,
};
use crate::macros::quote::{Enclosing, Fragment, InvocationSite};
use crate::macros::resolve::{MacroResolver, ResolvedCall};
use crate::macros::splice::SpliceStack;
use crate::semantic::{MarkerLookup, MethodSymbol, SemanticModel, SymbolMarkers};

/// Diagnostic code of the warning reported for placeholder arguments.
pub const PLACEHOLDER_WARNING: &str = "stagecraft::placeholder";

/// Cooperative cancellation, checked between visited statements.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// EXPANSION TRACE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpliceKind {
    Empty,
    Expression,
    Statement,
    Block,
    Function,
}

/// One expanded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionStep {
    pub macro_name: String,
    pub span: Span,
    /// The call as written when it was expanded.
    pub call: String,
    pub fragments: Vec<String>,
    pub splice: SpliceKind,
}

/// Result of expanding one compilation unit.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub tree: SyntaxTree,
    pub trace: Vec<ExpansionStep>,
    pub warnings: Vec<DiagnosticRecord>,
}

// ============================================================================
// EXPANDER
// ============================================================================

/// Rewrites compilation units by expanding the macro calls they contain.
pub struct Expander<'a> {
    semantic: &'a dyn SemanticModel,
    markers: &'a dyn MarkerLookup,
    handles: &'a HandleRegistry,
    metadata: &'a dyn MetadataResolver,
    cancellation: CancellationToken,
    config: ExpansionConfig,
}

impl<'a> Expander<'a> {
    pub fn new(semantic: &'a dyn SemanticModel, handles: &'a HandleRegistry) -> Self {
        Self {
            semantic,
            markers: &SymbolMarkers,
            handles,
            metadata: &NameMetadataResolver,
            cancellation: CancellationToken::new(),
            config: ExpansionConfig::default(),
        }
    }

    pub fn with_markers(mut self, markers: &'a dyn MarkerLookup) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_metadata(mut self, metadata: &'a dyn MetadataResolver) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_config(mut self, config: ExpansionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// Expands every macro call in `tree`, stopping at the first error.
    pub fn expand(&self, tree: &SyntaxTree) -> Result<Expansion, ExpansionError> {
        let _span = tracing::debug_span!("rewrite", file = %tree.path).entered();
        let mut rewriter = FileRewriter {
            expander: self,
            resolver: MacroResolver::new(self.semantic, self.markers, &self.config),
            file: tree.path.clone(),
            source: tree
                .source
                .as_ref()
                .map(|text| to_error_source(&tree.path, text)),
            trace: Vec::new(),
            warnings: Vec::new(),
        };
        let mut rewritten = tree.clone();
        rewriter.rewrite_items(&mut rewritten.items)?;
        tracing::debug!(expansions = rewriter.trace.len(), "file rewritten");
        Ok(Expansion {
            tree: rewritten,
            trace: rewriter.trace,
            warnings: rewriter.warnings,
        })
    }

    /// Expands `tree`, reporting diagnostics to `sink`.
    ///
    /// Returns `None` when expansion failed (one error is reported) or was cancelled.
    pub fn rewrite(&self, tree: &SyntaxTree, sink: &dyn DiagnosticSink) -> Option<SyntaxTree> {
        match self.expand(tree) {
            Ok(expansion) => {
                for warning in expansion.warnings {
                    sink.report(warning);
                }
                Some(expansion.tree)
            }
            Err(ExpansionError::Cancelled) => {
                tracing::debug!(file = %tree.path, "expansion cancelled");
                None
            }
            Err(error) => {
                tracing::debug!(file = %tree.path, %error, "expansion failed");
                sink.report(DiagnosticRecord::from_error(&error, &tree.path));
                None
            }
        }
    }

    /// Rewrites each file independently; a failing file does not stop the others.
    pub fn rewrite_all(&self, trees: &[SyntaxTree], sink: &dyn DiagnosticSink) -> Vec<Option<SyntaxTree>> {
        trees.iter().map(|tree| self.rewrite(tree, sink)).collect()
    }
}

// ============================================================================
// PER-FILE REWRITE
// ============================================================================

macro_rules! forward_break {
    ($flow:expr) => {
        if let ControlFlow::Break(replacement) = $flow {
            return Ok(ControlFlow::Break(replacement));
        }
    };
}

/// `Break` carries a declaration replacing the function being rewritten.
type Flow = ControlFlow<FunctionDecl>;

/// Like [`Flow`]; `Continue` carries the position a statement walk stopped at.
type Walk = ControlFlow<FunctionDecl, usize>;

fn finished(walk: Walk) -> Flow {
    match walk {
        ControlFlow::Continue(_) => ControlFlow::Continue(()),
        ControlFlow::Break(decl) => ControlFlow::Break(decl),
    }
}

#[derive(Clone)]
struct Scope {
    enclosing: Enclosing,
    /// Where the walked statements sit in the function being compiled.
    frame: Option<Rc<Frame>>,
}

impl Scope {
    /// Scope of the statements nested in `slot` of `statements[index]`.
    fn nested(&self, slot: Slot, statements: &[Stmt], splices: &SpliceStack, index: usize, span: Span) -> Scope {
        let frame = self.frame.as_ref().map(|parent| {
            Rc::new(Frame::Nested {
                parent: Rc::clone(parent),
                statements: splices.preview(statements),
                span,
                index: splices.shifted(index),
                slot,
            })
        });
        Scope {
            enclosing: self.enclosing.clone(),
            frame,
        }
    }
}

/// The function being compiled, minus the statements currently walked.
///
/// Each level holds its statements as they read when the walk descended
/// from it; the walked level supplies its own when a site is built.
enum Frame {
    Body(Rc<FunctionDecl>),
    Nested {
        parent: Rc<Frame>,
        statements: Vec<Stmt>,
        span: Span,
        index: usize,
        slot: Slot,
    },
}

impl Frame {
    fn rebuild(&self, current: Block) -> FunctionDecl {
        match self {
            Frame::Body(decl) => {
                let mut decl = (**decl).clone();
                decl.body = current;
                decl
            }
            Frame::Nested {
                parent,
                statements,
                span,
                index,
                slot,
            } => {
                let mut statements = statements.clone();
                if let Some(stmt) = statements.get_mut(*index) {
                    slot.fill(stmt, current);
                }
                parent.rebuild(Block {
                    statements,
                    span: *span,
                })
            }
        }
    }
}

/// Which nested statements of a statement are walked.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Block,
    Then,
    Else,
    Loop,
    /// The n-th lambda among the statement's own expressions.
    Lambda(usize),
}

impl Slot {
    fn fill(self, stmt: &mut Stmt, current: Block) {
        match (self, stmt) {
            (Slot::Block, Stmt::Block(block)) => *block = current,
            (Slot::Then, Stmt::If { then_branch: body, .. })
            | (Slot::Else, Stmt::If { else_branch: Some(body), .. })
            | (Slot::Loop, Stmt::While { body, .. }) => match body.as_mut() {
                Stmt::Block(block) => *block = current,
                other => *other = synthesized_body(current.statements, current.span),
            },
            (Slot::Lambda(n), stmt) => {
                if let Some(lambda) = visit::lambdas_mut(stmt).into_iter().nth(n) {
                    set_lambda_body(lambda, current.statements, current.span);
                }
            }
            _ => {}
        }
    }
}

/// A branch or loop body: the statement itself, or a block synthesized around several.
fn synthesized_body(mut statements: Vec<Stmt>, span: Span) -> Stmt {
    if statements.len() == 1 {
        statements.remove(0)
    } else {
        Stmt::Block(Block { statements, span })
    }
}

/// An expression lambda stays one while its body is a single expression.
fn set_lambda_body(lambda: &mut Lambda, mut statements: Vec<Stmt>, span: Span) {
    let expression_bodied = matches!(lambda.body, LambdaBody::Expr(_));
    lambda.body = match (statements.pop(), statements.is_empty()) {
        (Some(Stmt::Expr { expr, .. }), true) if expression_bodied => LambdaBody::Expr(Box::new(expr)),
        (last, _) => {
            statements.extend(last);
            LambdaBody::Block(Block { statements, span })
        }
    };
}

enum StatementOutcome {
    Kept,
    Spliced {
        deletion_count: usize,
        replacement: Vec<Stmt>,
    },
    ReplaceFunction(FunctionDecl),
}

enum Placement {
    Empty,
    InPlace(Expr),
    Statement(Stmt),
    Function(FunctionDecl),
    Splice(Vec<Stmt>),
}

impl Placement {
    fn kind(&self) -> SpliceKind {
        match self {
            Placement::Empty => SpliceKind::Empty,
            Placement::InPlace(_) => SpliceKind::Expression,
            Placement::Statement(_) => SpliceKind::Statement,
            Placement::Function(_) => SpliceKind::Function,
            Placement::Splice(_) => SpliceKind::Block,
        }
    }
}

struct FileRewriter<'s> {
    expander: &'s Expander<'s>,
    resolver: MacroResolver<'s>,
    file: String,
    source: Option<SourceArc>,
    trace: Vec<ExpansionStep>,
    warnings: Vec<DiagnosticRecord>,
}

impl<'s> FileRewriter<'s> {
    fn rewrite_items(&mut self, items: &mut [Item]) -> Result<(), ExpansionError> {
        for item in items {
            match item {
                Item::Function(decl) => self.rewrite_function(decl)?,
                Item::Type(ty) => {
                    for member in ty.members.iter_mut() {
                        match member {
                            Member::Function(decl) => self.rewrite_function(decl)?,
                            Member::Property(property) => self.rewrite_property(property)?,
                        }
                    }
                }
                Item::Statements(block) => {
                    let scope = Scope {
                        enclosing: Enclosing::TopLevel,
                        frame: None,
                    };
                    let flow = self.rewrite_block(block, &scope, 0)?;
                    self.no_function_replacement(flow, block.span)?;
                }
            }
        }
        Ok(())
    }

    fn rewrite_function(&mut self, decl: &mut FunctionDecl) -> Result<(), ExpansionError> {
        let mut rounds = 0;
        loop {
            let mut body = std::mem::take(&mut decl.body);
            let current = Rc::new(decl.clone());
            let scope = Scope {
                enclosing: Enclosing::Function(Rc::clone(&current)),
                frame: Some(Rc::new(Frame::Body(current))),
            };
            match self.rewrite_block(&mut body, &scope, 0)? {
                ControlFlow::Continue(()) => {
                    decl.body = body;
                    return Ok(());
                }
                ControlFlow::Break(replacement) => {
                    rounds += 1;
                    if rounds > self.expander.config.max_expansion_depth {
                        return Err(err_ctx!(
                            Internal,
                            decl.span,
                            self.source.clone(),
                            "function '{}' was replaced more than {} times",
                            decl.name,
                            self.expander.config.max_expansion_depth
                        ));
                    }
                    tracing::debug!(function = %decl.name, "enclosing function replaced; rewriting again");
                    *decl = replacement;
                }
            }
        }
    }

    fn rewrite_property(&mut self, property: &mut PropertyDecl) -> Result<(), ExpansionError> {
        for accessor in property.accessors.iter_mut() {
            let scope = Scope {
                enclosing: Enclosing::Accessor {
                    property: property.name.clone(),
                    kind: accessor.kind,
                },
                frame: None,
            };
            let flow = self.rewrite_block(&mut accessor.body, &scope, 0)?;
            self.no_function_replacement(flow, accessor.span)?;
        }
        Ok(())
    }

    // Function fragments are rejected where no function encloses the call, so this only fires on a driver bug.
    fn no_function_replacement(&self, flow: Flow, span: Span) -> Result<(), ExpansionError> {
        match flow {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(decl) => Err(err_ctx!(
                Internal,
                span,
                self.source.clone(),
                "function '{}' escaped its enclosing function",
                decl.name
            )),
        }
    }

    fn rewrite_block(&mut self, block: &mut Block, scope: &Scope, depth: usize) -> Result<Flow, ExpansionError> {
        let end = block.statements.len();
        let walk = self.rewrite_statements(&mut block.statements, block.span, 0, end, scope, depth)?;
        Ok(finished(walk))
    }

    /// Rewrites `statements[start..end]`; the others are context only.
    ///
    /// The walk stops past `end` when a capture took statements after it.
    fn rewrite_statements(
        &mut self,
        statements: &mut Vec<Stmt>,
        span: Span,
        start: usize,
        end: usize,
        scope: &Scope,
        depth: usize,
    ) -> Result<Walk, ExpansionError> {
        let mut splices = SpliceStack::new();
        let mut index = start;
        while index < end {
            if self.expander.cancellation.is_cancelled() {
                return Err(ExpansionError::Cancelled);
            }
            match self.rewrite_statement(statements, &splices, span, index, scope, depth)? {
                StatementOutcome::Kept => index += 1,
                StatementOutcome::Spliced {
                    deletion_count,
                    replacement,
                } => {
                    splices.push(index, deletion_count, replacement);
                    index += deletion_count;
                }
                StatementOutcome::ReplaceFunction(decl) => return Ok(ControlFlow::Break(decl)),
            }
        }
        splices.apply(statements);
        Ok(ControlFlow::Continue(index))
    }

    fn rewrite_statement(
        &mut self,
        statements: &mut Vec<Stmt>,
        splices: &SpliceStack,
        span: Span,
        index: usize,
        scope: &Scope,
        depth: usize,
    ) -> Result<StatementOutcome, ExpansionError> {
        let limit = self.expander.config.max_expansion_depth;
        let mut rounds = 0;
        while let Some(resolved) = self.next_expansion(statements, splices, span, index, scope)? {
            let call = resolved.site.call.clone();
            rounds += 1;
            if rounds > limit || depth > limit {
                return Err(err_ctx!(
                    Internal,
                    call.span,
                    self.source.clone(),
                    "expansion of '{}' exceeded the depth limit of {}",
                    call.callee,
                    limit
                )
                .with_help("a macro keeps producing calls to itself"));
            }

            let consumed = resolved.consumed;
            let placement = self
                .expand_call(resolved)
                .map_err(|e| e.located(call.span, self.source.as_ref()))?;
            match placement {
                Placement::Empty => {
                    statements[index] = Stmt::Empty {
                        span: statements[index].span(),
                    };
                }
                Placement::InPlace(expr) => {
                    if !replace_call(&mut statements[index], &call, expr) {
                        return Err(err_ctx!(
                            Internal,
                            call.span,
                            self.source.clone(),
                            "call '{}' vanished from its statement during expansion",
                            call.callee
                        ));
                    }
                }
                Placement::Statement(stmt) => statements[index] = stmt,
                Placement::Function(decl) => return Ok(StatementOutcome::ReplaceFunction(decl)),
                Placement::Splice(run) => {
                    // The run is walked in place of the call, between the rewritten
                    // prefix and the statements still to come.
                    let tail_start = (index + 1 + consumed).min(statements.len());
                    let mut inserted = splices.preview(&statements[..index]);
                    let prefix = inserted.len();
                    inserted.extend(run);
                    let end = inserted.len();
                    inserted.extend_from_slice(&statements[tail_start..]);
                    let tail = inserted.len() - end;
                    let stopped = match self.rewrite_statements(&mut inserted, span, prefix, end, scope, depth + 1)? {
                        ControlFlow::Continue(stopped) => stopped,
                        ControlFlow::Break(decl) => return Ok(StatementOutcome::ReplaceFunction(decl)),
                    };
                    let overrun = stopped.saturating_sub(end).min(tail);
                    inserted.truncate(inserted.len() - (tail - overrun));
                    return Ok(StatementOutcome::Spliced {
                        deletion_count: 1 + consumed + overrun,
                        replacement: inserted.split_off(prefix),
                    });
                }
            }
        }

        Ok(match self.rewrite_nested(statements, splices, span, index, scope, depth)? {
            ControlFlow::Continue(()) => StatementOutcome::Kept,
            ControlFlow::Break(decl) => StatementOutcome::ReplaceFunction(decl),
        })
    }

    /// The first call of `statements[index]` to expand, with its arguments bound.
    fn next_expansion(
        &self,
        statements: &[Stmt],
        splices: &SpliceStack,
        span: Span,
        index: usize,
        scope: &Scope,
    ) -> Result<Option<ResolvedCall>, ExpansionError> {
        let statement = &statements[index];
        let calls: Vec<CallExpr> = visit::own_calls(statement).into_iter().cloned().collect();
        if calls.is_empty() {
            return Ok(None);
        }
        let mut context = None;
        for call in calls {
            let Some(symbol) = self.resolver.candidate(&call) else {
                continue;
            };
            let (block, enclosing, function) = context
                .get_or_insert_with(|| site_context(statements, splices, span, scope))
                .clone();
            let site = InvocationSite {
                file: self.file.clone(),
                call,
                statement: statement.clone(),
                enclosing,
                function,
                block,
                statement_index: splices.shifted(index),
            };
            if let Some(resolved) = self.resolver.bind(symbol, site, self.source.as_ref())? {
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    fn expand_call(&mut self, resolved: ResolvedCall) -> Result<Placement, ExpansionError> {
        let ResolvedCall {
            symbol,
            site,
            args,
            buffer,
            consumed,
            placeholders,
        } = resolved;

        for parameter in placeholders {
            self.warnings.push(DiagnosticRecord::warning(
                PLACEHOLDER_WARNING,
                format!(
                    "macro '{}' received no argument for parameter '{}'",
                    symbol.qualified_name(),
                    parameter
                ),
                &self.file,
                site.call.span,
            ));
        }

        let handle = self
            .expander
            .handles
            .resolve(&symbol, &site, self.source.as_ref())?;
        let type_args = resolve_type_args(&symbol, &site, self.expander.metadata, self.source.as_ref())?;
        let mut invocation = Invocation::new(Rc::clone(&site), args, type_args);
        let ambient = invoke(&handle, &mut invocation, &self.expander.config, self.source.as_ref())?;
        drop(invocation);

        let quoted = buffer.take();
        let fragments = match (quoted.is_empty(), ambient.is_empty()) {
            (_, true) => quoted,
            (true, false) => ambient,
            (false, false) => {
                return Err(err_ctx!(
                    Contract,
                    site.call.span,
                    self.source.clone(),
                    "macro '{}' wrote through both its quote and the call binding",
                    symbol.qualified_name()
                ))
            }
        };

        let rendered: Vec<String> = if self.expander.config.record_trace {
            fragments.iter().map(ToString::to_string).collect()
        } else {
            Vec::new()
        };
        let fragment_count = fragments.len();
        let placement = self.place(&symbol, &site, consumed, fragments)?;

        tracing::debug!(
            macro_name = %symbol.qualified_name(),
            fragments = fragment_count,
            consumed,
            splice = ?placement.kind(),
            "expanded macro call"
        );
        if self.expander.config.record_trace {
            self.trace.push(ExpansionStep {
                macro_name: symbol.qualified_name(),
                span: site.call.span,
                call: site.call.to_string(),
                fragments: rendered,
                splice: placement.kind(),
            });
        }
        Ok(placement)
    }

    fn place(
        &self,
        symbol: &MethodSymbol,
        site: &InvocationSite,
        consumed: usize,
        fragments: Vec<Fragment>,
    ) -> Result<Placement, ExpansionError> {
        let mut fragments = fragments.into_iter();
        let placement = match (fragments.next(), fragments.next()) {
            (None, _) => {
                if symbol.has_result() || !is_standalone_call(&site.statement, &site.call) {
                    return Err(err_ctx!(
                        Contract,
                        site.call.span,
                        self.source.clone(),
                        "macro '{}' produced no code, but its call {}",
                        symbol.qualified_name(),
                        if symbol.has_result() {
                            "must produce a value"
                        } else {
                            "is part of a larger statement"
                        }
                    )
                    .with_help("produce the call's value with `Quote::result`"));
                }
                if consumed > 0 {
                    Placement::Splice(Vec::new())
                } else {
                    Placement::Empty
                }
            }
            (Some(Fragment::Expr(expr)), None) => Placement::InPlace(expr),
            (Some(Fragment::Stmt(stmt)), None) => Placement::Statement(stmt),
            (Some(Fragment::Function(decl)), None) => {
                if site.function.is_none() {
                    return Err(err_ctx!(
                        Contract,
                        site.call.span,
                        self.source.clone(),
                        "macro '{}' produced a function declaration, but its call is not inside a function",
                        symbol.qualified_name()
                    ));
                }
                Placement::Function(decl)
            }
            (Some(first), Some(second)) => {
                let run = [first, second]
                    .into_iter()
                    .chain(fragments)
                    .map(Fragment::into_statement)
                    .collect::<Option<Vec<Stmt>>>()
                    .ok_or_else(|| {
                        err_ctx!(
                            Contract,
                            site.call.span,
                            self.source.clone(),
                            "macro '{}' produced a function declaration among other fragments",
                            symbol.qualified_name()
                        )
                        .with_help("a function declaration must be the only fragment")
                    })?;
                Placement::Splice(run)
            }
        };

        if consumed == 0 {
            return Ok(placement);
        }
        Ok(match placement {
            Placement::InPlace(expr) => {
                let mut statement = site.statement.clone();
                replace_call(&mut statement, &site.call, expr);
                Placement::Splice(vec![statement])
            }
            Placement::Statement(stmt) => Placement::Splice(vec![stmt]),
            other => other,
        })
    }

    fn rewrite_nested(
        &mut self,
        statements: &mut Vec<Stmt>,
        splices: &SpliceStack,
        span: Span,
        index: usize,
        scope: &Scope,
        depth: usize,
    ) -> Result<Flow, ExpansionError> {
        let mut slots = match &statements[index] {
            Stmt::Block(_) => vec![Slot::Block],
            Stmt::If {
                else_branch: Some(_),
                ..
            } => vec![Slot::Then, Slot::Else],
            Stmt::If { .. } => vec![Slot::Then],
            Stmt::While { .. } => vec![Slot::Loop],
            Stmt::Empty { .. } | Stmt::Expr { .. } | Stmt::Local { .. } | Stmt::Return { .. } => Vec::new(),
        };
        slots.extend((0..visit::lambdas_mut(&mut statements[index]).len()).map(Slot::Lambda));

        for slot in slots {
            let inner = scope.nested(slot, statements, splices, index, span);
            let flow = match (slot, &mut statements[index]) {
                (Slot::Block, Stmt::Block(block)) => self.rewrite_block(block, &inner, depth)?,
                (Slot::Then, Stmt::If { then_branch, .. }) => self.rewrite_body(then_branch, &inner, depth)?,
                (
                    Slot::Else,
                    Stmt::If {
                        else_branch: Some(else_branch),
                        ..
                    },
                ) => self.rewrite_body(else_branch, &inner, depth)?,
                (Slot::Loop, Stmt::While { body, .. }) => self.rewrite_body(body, &inner, depth)?,
                (Slot::Lambda(n), stmt) => match visit::lambdas_mut(stmt).into_iter().nth(n) {
                    Some(lambda) => self.rewrite_lambda(lambda, &inner, depth)?,
                    None => ControlFlow::Continue(()),
                },
                _ => ControlFlow::Continue(()),
            };
            forward_break!(flow);
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Rewrites a branch or loop body, synthesizing a block when one statement becomes several.
    fn rewrite_body(&mut self, body: &mut Box<Stmt>, scope: &Scope, depth: usize) -> Result<Flow, ExpansionError> {
        if let Stmt::Block(block) = body.as_mut() {
            return self.rewrite_block(block, scope, depth);
        }
        let span = body.span();
        let mut statements = vec![std::mem::replace(body.as_mut(), Stmt::Empty { span })];
        let walk = self.rewrite_statements(&mut statements, span, 0, 1, scope, depth)?;
        **body = synthesized_body(statements, span);
        Ok(finished(walk))
    }

    fn rewrite_lambda(&mut self, lambda: &mut Lambda, scope: &Scope, depth: usize) -> Result<Flow, ExpansionError> {
        let inner = Scope {
            enclosing: Enclosing::Lambda(Rc::new(lambda.clone())),
            frame: scope.frame.clone(),
        };
        if let LambdaBody::Block(block) = &mut lambda.body {
            return self.rewrite_block(block, &inner, depth);
        }
        let (expr, span) = match &lambda.body {
            LambdaBody::Expr(expr) => ((**expr).clone(), expr.span()),
            LambdaBody::Block(_) => return Ok(ControlFlow::Continue(())),
        };
        let mut statements = vec![Stmt::Expr { expr, span }];
        let walk = self.rewrite_statements(&mut statements, span, 0, 1, &inner, depth)?;
        set_lambda_body(lambda, statements, span);
        Ok(finished(walk))
    }
}

type SiteContext = (Rc<Block>, Enclosing, Option<Rc<FunctionDecl>>);

/// The block around a call as it currently reads, and the function being
/// compiled with that block in place.
fn site_context(statements: &[Stmt], splices: &SpliceStack, span: Span, scope: &Scope) -> SiteContext {
    let block = Block {
        statements: splices.preview(statements),
        span,
    };
    let function = scope
        .frame
        .as_ref()
        .map(|frame| Rc::new(frame.rebuild(block.clone())));
    let enclosing = match (&scope.enclosing, &function) {
        (Enclosing::Function(_), Some(current)) => Enclosing::Function(Rc::clone(current)),
        (other, _) => other.clone(),
    };
    (Rc::new(block), enclosing, function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::TypeRef;
    use crate::diagnostics::{CollectingSink, ErrorKind};
    use crate::semantic::{Marker, ParameterSymbol, SymbolTable};
    use std::sync::Mutex;

    fn script(statements: Vec<Stmt>) -> SyntaxTree {
        SyntaxTree::new("script.cs", vec![Item::Statements(block(statements))])
    }

    fn top_level(tree: &SyntaxTree) -> Vec<String> {
        match &tree.items[0] {
            Item::Statements(block) => block.statements.iter().map(|s| s.to_string()).collect(),
            other => panic!("unexpected item {:?}", other),
        }
    }

    fn emitting(table: &mut SymbolTable, registry: &HandleRegistry, name: &str, fragments: Vec<Fragment>) {
        let symbol = MethodSymbol::new("Test", name).with_param(ParameterSymbol::quote("quote"));
        registry.register_fn(&symbol, move |inv| {
            let quote = inv.quote()?;
            for fragment in &fragments {
                quote.emit(fragment.clone());
            }
            Ok(())
        });
        table.declare(symbol);
    }

    #[test]
    fn placement_follows_fragment_count_and_kind() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(&mut table, &registry, "Nothing", vec![]);
        emitting(&mut table, &registry, "Value", vec![Fragment::Expr(int(7))]);
        emitting(&mut table, &registry, "One", vec![Fragment::Stmt(expr_stmt(name("one")))]);
        emitting(
            &mut table,
            &registry,
            "Two",
            vec![Fragment::Expr(name("a")), Fragment::Stmt(expr_stmt(name("b")))],
        );

        let tree = script(vec![
            expr_stmt(call("Nothing", vec![])),
            local(TypeRef::Int, "v", Some(call("Value", vec![]))),
            expr_stmt(call("One", vec![])),
            expr_stmt(call("Two", vec![])),
        ]);
        let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();

        assert_eq!(
            top_level(&expansion.tree),
            vec![";", "int v = 7;", "one;", "a;", "b;"]
        );
        let kinds: Vec<SpliceKind> = expansion.trace.iter().map(|s| s.splice).collect();
        assert_eq!(
            kinds,
            vec![SpliceKind::Empty, SpliceKind::Expression, SpliceKind::Statement, SpliceKind::Block]
        );
    }

    #[test]
    fn empty_output_in_a_larger_statement_violates_the_contract() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(&mut table, &registry, "Nothing", vec![]);
        let tree = script(vec![local(TypeRef::Int, "v", Some(call("Nothing", vec![])))]);

        let err = Expander::new(&table, &registry).expand(&tree).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
    }

    #[test]
    fn branch_bodies_get_a_synthesized_block() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(
            &mut table,
            &registry,
            "Two",
            vec![Fragment::Stmt(expr_stmt(name("a"))), Fragment::Stmt(expr_stmt(name("b")))],
        );
        let tree = script(vec![if_stmt(
            name("ready"),
            expr_stmt(call("Two", vec![])),
            None,
        )]);

        let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
        assert_eq!(top_level(&expansion.tree), vec!["if (ready) { a; b; }"]);
    }

    #[test]
    fn expression_lambdas_keep_their_shape_when_possible() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(&mut table, &registry, "Value", vec![Fragment::Expr(int(7))]);
        let tree = script(vec![expr_stmt(call(
            "Run",
            vec![lambda(vec![], call("Value", vec![]))],
        ))]);

        let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
        assert_eq!(top_level(&expansion.tree), vec!["Run(() => 7);"]);
    }

    #[test]
    fn self_reproducing_macros_hit_the_depth_limit() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(
            &mut table,
            &registry,
            "Again",
            vec![Fragment::Stmt(expr_stmt(call("Again", vec![])))],
        );
        let tree = script(vec![expr_stmt(call("Again", vec![]))]);
        let config = ExpansionConfig {
            max_expansion_depth: 4,
            ..ExpansionConfig::default()
        };

        let err = Expander::new(&table, &registry)
            .with_config(config)
            .expand(&tree)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("depth limit of 4"));
    }

    #[test]
    fn function_fragments_replace_the_enclosing_function() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        let symbol = MethodSymbol::new("Test", "Rename").with_param(ParameterSymbol::quote("quote"));
        registry.register_fn(&symbol, |inv| {
            let quote = inv.quote()?;
            let mut decl = match &quote.site().function {
                Some(function) => (**function).clone(),
                None => return Err("not in a function".into()),
            };
            decl.name = format!("{}Renamed", decl.name);
            decl.body.statements.remove(quote.site().statement_index);
            quote.emit(decl);
            Ok(())
        });
        table.declare(symbol);

        let tree = SyntaxTree::new(
            "f.cs",
            vec![Item::Function(function(
                "Main",
                vec![],
                TypeRef::Void,
                vec![expr_stmt(call("Rename", vec![])), expr_stmt(name("work"))],
            ))],
        );
        let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
        match &expansion.tree.items[0] {
            Item::Function(decl) => {
                assert_eq!(decl.name, "MainRenamed");
                assert_eq!(decl.body.to_string(), "{ work; }");
            }
            other => panic!("unexpected item {:?}", other),
        }
        assert_eq!(expansion.trace[0].splice, SpliceKind::Function);
    }

    #[test]
    fn nested_sites_see_the_function_as_rewritten_so_far() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(&mut table, &registry, "Value", vec![Fragment::Expr(int(7))]);
        emitting(
            &mut table,
            &registry,
            "Two",
            vec![Fragment::Stmt(expr_stmt(name("a"))), Fragment::Stmt(expr_stmt(name("b")))],
        );
        let seen = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&seen);
        let symbol = MethodSymbol::new("Test", "Inspect").with_param(ParameterSymbol::quote("quote"));
        registry.register_fn(&symbol, move |inv| {
            let quote = inv.quote()?;
            *recorded.lock().unwrap() = quote.site().function.as_ref().map(|f| f.body.to_string());
            quote.emit(expr_stmt(name("inspected")));
            Ok(())
        });
        table.declare(symbol);

        let tree = SyntaxTree::new(
            "f.cs",
            vec![Item::Function(function(
                "Main",
                vec![],
                TypeRef::Void,
                vec![
                    local(TypeRef::Int, "v", Some(call("Value", vec![]))),
                    expr_stmt(call("Two", vec![])),
                    if_stmt(name("ready"), block_stmt(vec![expr_stmt(call("Inspect", vec![]))]), None),
                ],
            ))],
        );
        Expander::new(&table, &registry).expand(&tree).unwrap();
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("{ int v = 7; a; b; if (ready) { Inspect(); } }")
        );
    }

    #[test]
    fn cancellation_stops_without_a_diagnostic() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        emitting(&mut table, &registry, "Value", vec![Fragment::Expr(int(1))]);
        let token = CancellationToken::new();
        token.cancel();
        let sink = CollectingSink::new();

        let rewritten = Expander::new(&table, &registry)
            .with_cancellation(token)
            .rewrite(&script(vec![expr_stmt(call("Value", vec![]))]), &sink);
        assert!(rewritten.is_none());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn marked_macros_without_a_handle_fail_resolution() {
        let mut table = SymbolTable::new();
        let registry = HandleRegistry::new();
        table.declare(MethodSymbol::new("Test", "Ghost").with_marker(Marker::Macro));
        let sink = CollectingSink::new();

        let rewritten = Expander::new(&table, &registry)
            .rewrite(&script(vec![expr_stmt(call("Ghost", vec![]))]), &sink);
        assert!(rewritten.is_none());
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "stagecraft::resolution");
    }
}
