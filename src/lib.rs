pub use crate::config::ExpansionConfig;
pub use crate::diagnostics::{
    to_error_source, CollectingSink, DiagnosticRecord, DiagnosticSink, ErrorContext, ErrorKind,
    ExpansionError, Severity,
};
pub use crate::macros::{Expander, Expansion, Fragment, HandleRegistry, Invocation, Quote};

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod macros;
pub mod semantic;
