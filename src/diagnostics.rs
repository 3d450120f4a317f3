//!
//! Unified, `miette`-based diagnostics for the expansion engine.
//!
//! # Overview
//!
//! Every failure raised while expanding a compilation unit is an
//! [`ExpansionError`]. The variants follow the engine's taxonomy:
//!
//! - **Binding**: argument shape mismatch (wrong captured statement kind, missing block,
//!   missing required argument).
//! - **Invocation**: the macro body returned an error or panicked.
//! - **Contract**: the macro produced the wrong number or kind of fragments.
//! - **Resolution**: no compiled implementation matches the bound declaration.
//! - **Internal**: engine invariants (expansion depth, re-entrant binding).
//!
//! Errors are caught at the top of each file's rewrite pass and turned into a
//! [`DiagnosticRecord`] for the host's [`DiagnosticSink`].
//!
//! # Error Construction Macros
//!
//! - `err_msg!(Internal, "message {}", arg)` for message-only errors.
//! - `err_ctx!(Contract, span, source, "message {}", arg)` for errors located at a call site.
//!   `source` is an `Option<SourceArc>`; pass `None` when the host kept no source text.
//!
//! Never construct `ErrorContext` by hand unless a help text or a custom cause is needed.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::Span;

// Type aliases for clarity and brevity
pub type SourceArc = Arc<NamedSource<String>>;
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Type-safe classification of [`ExpansionError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Binding,
    Invocation,
    Contract,
    Resolution,
    Internal,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Binding => "Binding",
            ErrorKind::Invocation => "Invocation",
            ErrorKind::Contract => "Contract",
            ErrorKind::Resolution => "Resolution",
            ErrorKind::Internal => "Internal",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Stable diagnostic code reported to the sink.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Binding => "stagecraft::binding",
            ErrorKind::Invocation => "stagecraft::invocation",
            ErrorKind::Contract => "stagecraft::contract",
            ErrorKind::Resolution => "stagecraft::resolution",
            ErrorKind::Internal => "stagecraft::internal",
            ErrorKind::Cancelled => "stagecraft::cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location context for an error.
#[derive(Debug, Default)]
pub struct ErrorContext {
    /// The source text of the compilation unit (if the host kept it).
    pub source: Option<SourceArc>,
    /// The call-site span this error is reported at.
    pub span: Option<Span>,
    pub help: Option<String>,
}

impl ErrorContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn at(span: Span, source: Option<SourceArc>) -> Self {
        Self {
            source,
            span: Some(span),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// Errors raised while expanding macro calls in one compilation unit.
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("Binding error: {message}")]
    Binding {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Invocation error: {message}")]
    Invocation {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Contract error: {message}")]
    Contract {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Resolution error: {message}")]
    Resolution {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Expansion cancelled")]
    Cancelled,
}

impl ExpansionError {
    fn ctx(&self) -> Option<&ErrorContext> {
        match self {
            ExpansionError::Binding { ctx, .. }
            | ExpansionError::Invocation { ctx, .. }
            | ExpansionError::Contract { ctx, .. }
            | ExpansionError::Resolution { ctx, .. }
            | ExpansionError::Internal { ctx, .. } => Some(ctx),
            ExpansionError::Cancelled => None,
        }
    }

    fn ctx_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            ExpansionError::Binding { ctx, .. }
            | ExpansionError::Invocation { ctx, .. }
            | ExpansionError::Contract { ctx, .. }
            | ExpansionError::Resolution { ctx, .. }
            | ExpansionError::Internal { ctx, .. } => Some(ctx),
            ExpansionError::Cancelled => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExpansionError::Binding { .. } => ErrorKind::Binding,
            ExpansionError::Invocation { .. } => ErrorKind::Invocation,
            ExpansionError::Contract { .. } => ErrorKind::Contract,
            ExpansionError::Resolution { .. } => ErrorKind::Resolution,
            ExpansionError::Internal { .. } => ErrorKind::Internal,
            ExpansionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExpansionError::Binding { message, .. }
            | ExpansionError::Invocation { message, .. }
            | ExpansionError::Contract { message, .. }
            | ExpansionError::Resolution { message, .. }
            | ExpansionError::Internal { message, .. } => message,
            ExpansionError::Cancelled => "expansion cancelled",
        }
    }

    pub fn span(&self) -> Option<Span> {
        self.ctx().and_then(|ctx| ctx.span)
    }

    /// Attaches a call-site location unless the error already carries one.
    pub fn located(mut self, span: Span, source: Option<&SourceArc>) -> Self {
        if let Some(ctx) = self.ctx_mut() {
            if ctx.span.is_none() {
                ctx.span = Some(span);
            }
            if ctx.source.is_none() {
                ctx.source = source.cloned();
            }
        }
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        if let Some(ctx) = self.ctx_mut() {
            ctx.help = Some(help.into());
        }
        self
    }

    pub fn with_source(mut self, cause: BoxError) -> Self {
        match &mut self {
            ExpansionError::Binding { source, .. }
            | ExpansionError::Invocation { source, .. }
            | ExpansionError::Contract { source, .. }
            | ExpansionError::Resolution { source, .. }
            | ExpansionError::Internal { source, .. } => *source = Some(cause),
            ExpansionError::Cancelled => {}
        }
        self
    }
}

impl Diagnostic for ExpansionError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind().code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.ctx()?
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.ctx()?
            .source
            .as_ref()
            .map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let span = self.span()?;
        let len = if span.end > span.start {
            span.end - span.start
        } else {
            1
        };
        let label = LabeledSpan::new(Some(self.message().to_string()), span.start, len);
        Some(Box::new(std::iter::once(label)))
    }
}

/// Converts a source string into an `Arc<NamedSource<String>>` for use in error contexts.
pub fn to_error_source(name: &str, source: &str) -> SourceArc {
    Arc::new(NamedSource::new(name, source.to_string()))
}

/// Constructs an `ExpansionError` variant with a formatted message and no location.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::diagnostics::ExpansionError::$variant {
            message: format!($fmt $(, $arg)*),
            ctx: $crate::diagnostics::ErrorContext::none(),
            source: None,
        }
    };
}

/// Constructs an `ExpansionError` variant located at `span` in `source`.
#[macro_export]
macro_rules! err_ctx {
    ($variant:ident, $span:expr, $source:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::diagnostics::ExpansionError::$variant {
            message: format!($fmt $(, $arg)*),
            ctx: $crate::diagnostics::ErrorContext::at($span, $source),
            source: None,
        }
    };
}

// ============================================================================
// DIAGNOSTIC SINK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub span: Span,
}

/// A diagnostic as handed to the host compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub location: Option<Location>,
}

impl DiagnosticRecord {
    pub fn from_error(error: &ExpansionError, file: &str) -> Self {
        Self {
            severity: Severity::Error,
            code: error.kind().code().to_string(),
            message: error.to_string(),
            location: error.span().map(|span| Location {
                file: file.to_string(),
                span,
            }),
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, file: &str, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            location: Some(Location {
                file: file.to_string(),
                span,
            }),
        }
    }
}

/// Receives diagnostics produced while rewriting compilation units.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: DiagnosticRecord);
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<DiagnosticRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.severity == Severity::Error)
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: DiagnosticRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
