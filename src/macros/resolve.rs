//! Macro resolution and argument binding.
//!
//! A call is expanded when the semantic model binds it to a static function
//! that is a macro: at least one parameter is quote-typed (`Quote` or
//! `Quote<T>`, or carries the quote-parameter marker), or the function itself
//! carries the macro marker.
//!
//! ## Forwarded contexts
//!
//! Inside a macro's own body, a call passing the macro's quote parameter on to
//! another macro (`Inner(quote)`) is ordinary code that runs when the outer
//! macro runs. Such calls are never expanded on their own.
//!
//! ## Arguments
//!
//! Parameters are bound by position:
//!
//! | Parameter | Argument |
//! |---|---|
//! | quote-typed | a [`Quote`] clone with `sequence` = parameter index, sharing the invocation's buffer |
//! | `Statement`/`Block` with a default | the next sibling statement, which is then deleted on splice |
//! | declared default | the default value |
//! | call-site constant | the constant |
//! | call-site expression | its syntax |
//! | nothing | binding error, or a placeholder under [`MissingArgumentPolicy::Placeholder`] |

use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{Block, CallExpr, Expr, Literal, Stmt, TypeRef};
use crate::config::{ExpansionConfig, MissingArgumentPolicy};
use crate::diagnostics::{ExpansionError, SourceArc};
use crate::err_ctx;
use crate::macros::quote::{AccumulationBuffer, InvocationSite, Quote};
use crate::semantic::{Marker, MarkerLookup, MethodSymbol, SemanticModel, SymbolRef};

/// A runtime argument passed to a macro implementation.
#[derive(Debug, Clone)]
pub enum MacroArg {
    Quote(Quote),
    /// Captured following statement.
    Statement(Stmt),
    /// Captured following block.
    Block(Block),
    Constant(Literal),
    /// A non-constant call-site argument, passed as syntax.
    Syntax(Expr),
    /// No argument could be supplied (placeholder policy only).
    Missing,
}

/// A call that will be expanded, with its arguments bound.
#[derive(Debug)]
pub struct ResolvedCall {
    pub symbol: Arc<MethodSymbol>,
    pub site: Rc<InvocationSite>,
    pub args: Vec<MacroArg>,
    /// Shared by every quote argument; read by the driver after the call.
    pub buffer: AccumulationBuffer,
    /// Following sibling statements captured as arguments.
    pub consumed: usize,
    /// Parameters that received a placeholder.
    pub placeholders: Vec<String>,
}

pub struct MacroResolver<'a> {
    semantic: &'a dyn SemanticModel,
    markers: &'a dyn MarkerLookup,
    config: &'a ExpansionConfig,
}

impl<'a> MacroResolver<'a> {
    pub fn new(
        semantic: &'a dyn SemanticModel,
        markers: &'a dyn MarkerLookup,
        config: &'a ExpansionConfig,
    ) -> Self {
        Self {
            semantic,
            markers,
            config,
        }
    }

    pub fn is_quote_parameter(&self, symbol: &MethodSymbol, index: usize) -> bool {
        let Some(param) = symbol.params.get(index) else {
            return false;
        };
        param.ty.is_quote()
            || self
                .markers
                .markers(SymbolRef::Parameter(symbol, index))
                .contains(&Marker::QuoteParameter)
    }

    pub fn is_macro(&self, symbol: &MethodSymbol) -> bool {
        if !symbol.is_static {
            return false;
        }
        (0..symbol.params.len()).any(|index| self.is_quote_parameter(symbol, index))
            || self
                .markers
                .markers(SymbolRef::Method(symbol))
                .contains(&Marker::Macro)
    }

    /// The macro a call binds to, if it binds to one.
    pub fn candidate(&self, call: &CallExpr) -> Option<Arc<MethodSymbol>> {
        let symbol = self.semantic.bind_call(call)?;
        if self.is_macro(&symbol) {
            Some(symbol)
        } else {
            tracing::trace!(callee = %call.callee, "call is not a macro");
            None
        }
    }

    /// Binds arguments for `symbol` at `site`.
    ///
    /// Returns `Ok(None)` when the call forwards an ambient quote and must run as plain code.
    pub fn bind(
        &self,
        symbol: Arc<MethodSymbol>,
        site: InvocationSite,
        source: Option<&SourceArc>,
    ) -> Result<Option<ResolvedCall>, ExpansionError> {
        if self.forwards_ambient_quote(&symbol, &site) {
            tracing::trace!(
                callee = %site.call.callee,
                "call forwards the enclosing macro's quote; left as code"
            );
            return Ok(None);
        }

        let site = Rc::new(site);
        let buffer = AccumulationBuffer::new();
        let root = Quote::new(Rc::clone(&site), buffer.clone());
        let mut args = Vec::with_capacity(symbol.params.len());
        let mut consumed = 0;
        let mut placeholders = Vec::new();

        for (index, param) in symbol.params.iter().enumerate() {
            if self.is_quote_parameter(&symbol, index) {
                args.push(MacroArg::Quote(root.with_sequence(index)));
                continue;
            }

            if param.default.is_some() && matches!(param.ty, TypeRef::Statement | TypeRef::Block) {
                args.push(capture_following(&symbol, index, &site, consumed, source)?);
                consumed += 1;
                continue;
            }

            if let Some(default) = &param.default {
                args.push(MacroArg::Constant(default.clone()));
                continue;
            }

            if let Some(arg) = site.call.args.get(index) {
                args.push(match self.semantic.constant_value(arg) {
                    Some(constant) => MacroArg::Constant(constant),
                    None => MacroArg::Syntax(arg.clone()),
                });
                continue;
            }

            match self.config.missing_arguments {
                MissingArgumentPolicy::Error => {
                    return Err(err_ctx!(
                        Binding,
                        site.call.span,
                        source.cloned(),
                        "macro '{}' requires an argument for parameter '{}'",
                        symbol.qualified_name(),
                        param.name
                    ));
                }
                MissingArgumentPolicy::Placeholder => {
                    tracing::warn!(
                        macro_name = %symbol.qualified_name(),
                        parameter = %param.name,
                        "no argument supplied; passing a placeholder"
                    );
                    placeholders.push(param.name.clone());
                    args.push(MacroArg::Missing);
                }
            }
        }

        Ok(Some(ResolvedCall {
            symbol,
            site,
            args,
            buffer,
            consumed,
            placeholders,
        }))
    }

    // True when a quote-typed argument names a quote parameter of the function being compiled.
    fn forwards_ambient_quote(&self, symbol: &MethodSymbol, site: &InvocationSite) -> bool {
        let Some(function) = &site.function else {
            return false;
        };
        let declared = self.semantic.declared_symbol(function);
        (0..symbol.params.len())
            .filter(|index| self.is_quote_parameter(symbol, *index))
            .filter_map(|index| match site.call.args.get(index) {
                Some(Expr::Name { name, .. }) => Some(name),
                _ => None,
            })
            .any(|name| {
                let Some(position) = function.params.iter().position(|p| &p.name == name) else {
                    return false;
                };
                match &declared {
                    Some(outer) => self.is_quote_parameter(outer, position),
                    None => function.params[position].ty.is_quote(),
                }
            })
    }
}

fn capture_following(
    symbol: &MethodSymbol,
    index: usize,
    site: &InvocationSite,
    already_captured: usize,
    source: Option<&SourceArc>,
) -> Result<MacroArg, ExpansionError> {
    let param = &symbol.params[index];
    let Some(following) = site.following_statement(already_captured) else {
        return Err(err_ctx!(
            Binding,
            site.call.span,
            source.cloned(),
            "macro '{}' captures the statement following its call for parameter '{}', but none follows",
            symbol.qualified_name(),
            param.name
        ));
    };
    match (&param.ty, following) {
        (TypeRef::Block, Stmt::Block(block)) => Ok(MacroArg::Block(block.clone())),
        (TypeRef::Block, other) => Err(err_ctx!(
            Binding,
            other.span(),
            source.cloned(),
            "macro '{}' requires a block after its call for parameter '{}', found a statement",
            symbol.qualified_name(),
            param.name
        )
        .with_help("wrap the following statement in braces")),
        (_, stmt) => Ok(MacroArg::Statement(stmt.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::TypeRef;
    use crate::diagnostics::ErrorKind;
    use crate::macros::quote::Enclosing;
    use crate::semantic::{ParameterSymbol, SymbolMarkers, SymbolTable};

    fn site_in(statements: Vec<Stmt>, index: usize) -> InvocationSite {
        let statement = statements[index].clone();
        let call = crate::ast::visit::own_calls(&statement)[0].clone();
        InvocationSite {
            file: "resolve.cs".to_string(),
            call,
            statement,
            enclosing: Enclosing::TopLevel,
            function: None,
            block: Rc::new(block(statements)),
            statement_index: index,
        }
    }

    #[test]
    fn eligibility_requires_static_and_a_quote_parameter_or_marker() {
        let table = SymbolTable::new();
        let config = ExpansionConfig::default();
        let resolver = MacroResolver::new(&table, &SymbolMarkers, &config);

        let plain = MethodSymbol::new("P", "Plain").with_param(ParameterSymbol::new("x", TypeRef::Int));
        let quoted = MethodSymbol::new("P", "Quoted").with_param(ParameterSymbol::quote("quote"));
        let typed = MethodSymbol::new("P", "Typed")
            .with_param(ParameterSymbol::new("q", TypeRef::quote_of(TypeRef::Int)));
        let marked = MethodSymbol::new("P", "Marked").with_marker(Marker::Macro);
        let instance = MethodSymbol::new("P", "Instance")
            .with_param(ParameterSymbol::quote("quote"))
            .instance();

        assert!(!resolver.is_macro(&plain));
        assert!(resolver.is_macro(&quoted));
        assert!(resolver.is_macro(&typed));
        assert!(resolver.is_macro(&marked));
        assert!(!resolver.is_macro(&instance));
    }

    #[test]
    fn binds_quotes_captures_defaults_and_constants() {
        let symbol = Arc::new(
            MethodSymbol::new("Meta", "Repeat")
                .with_param(ParameterSymbol::new("count", TypeRef::Int))
                .with_param(ParameterSymbol::new("body", TypeRef::Statement).with_default(Literal::Null))
                .with_param(ParameterSymbol::quote("quote"))
                .with_param(ParameterSymbol::new("label", TypeRef::String).with_default(Literal::String("x".into())))
                .with_param(ParameterSymbol::quote("again")),
        );
        let table = SymbolTable::new();
        let config = ExpansionConfig::default();
        let resolver = MacroResolver::new(&table, &SymbolMarkers, &config);
        let site = site_in(
            vec![
                expr_stmt(call("Repeat", vec![int(3)])),
                expr_stmt(call("Log", vec![])),
            ],
            0,
        );

        let resolved = resolver.bind(symbol, site, None).unwrap().unwrap();
        assert_eq!(resolved.consumed, 1);
        assert!(matches!(resolved.args[0], MacroArg::Constant(Literal::Int(3))));
        assert!(matches!(&resolved.args[1], MacroArg::Statement(s) if s.to_string() == "Log();"));
        assert!(matches!(&resolved.args[3], MacroArg::Constant(Literal::String(s)) if s == "x"));
        match (&resolved.args[2], &resolved.args[4]) {
            (MacroArg::Quote(a), MacroArg::Quote(b)) => {
                assert_eq!((a.sequence(), b.sequence()), (2, 4));
                assert!(a.buffer().shares_with(&resolved.buffer));
                assert!(b.buffer().shares_with(&resolved.buffer));
            }
            other => panic!("expected quotes, got {:?}", other),
        }
    }

    #[test]
    fn block_capture_rejects_bare_statements() {
        let symbol = Arc::new(
            MethodSymbol::new("Meta", "Guarded")
                .with_param(ParameterSymbol::new("body", TypeRef::Block).with_default(Literal::Null))
                .with_param(ParameterSymbol::quote("quote")),
        );
        let table = SymbolTable::new();
        let config = ExpansionConfig::default();
        let resolver = MacroResolver::new(&table, &SymbolMarkers, &config);

        let bare = site_in(
            vec![expr_stmt(call("Guarded", vec![])), expr_stmt(call("Log", vec![]))],
            0,
        );
        let err = resolver.bind(Arc::clone(&symbol), bare, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);

        let missing = site_in(vec![expr_stmt(call("Guarded", vec![]))], 0);
        let err = resolver.bind(symbol, missing, None).unwrap_err();
        assert!(err.to_string().contains("none follows"));
    }

    #[test]
    fn missing_arguments_follow_the_policy() {
        let symbol = Arc::new(
            MethodSymbol::new("Meta", "Needs")
                .with_param(ParameterSymbol::new("value", TypeRef::Int))
                .with_param(ParameterSymbol::quote("quote")),
        );
        let table = SymbolTable::new();
        let strict = ExpansionConfig::default();
        let site = site_in(vec![expr_stmt(call("Needs", vec![]))], 0);
        let err = MacroResolver::new(&table, &SymbolMarkers, &strict)
            .bind(Arc::clone(&symbol), site.clone(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);

        let lenient = ExpansionConfig {
            missing_arguments: MissingArgumentPolicy::Placeholder,
            ..ExpansionConfig::default()
        };
        let resolved = MacroResolver::new(&table, &SymbolMarkers, &lenient)
            .bind(symbol, site, None)
            .unwrap()
            .unwrap();
        assert!(matches!(resolved.args[0], MacroArg::Missing));
        assert_eq!(resolved.placeholders, vec!["value".to_string()]);
    }

    #[test]
    fn non_constant_arguments_are_passed_as_syntax() {
        let symbol = Arc::new(
            MethodSymbol::new("Meta", "Stringify")
                .with_param(ParameterSymbol::new("value", TypeRef::Object))
                .with_param(ParameterSymbol::quote("quote")),
        );
        let table = SymbolTable::new();
        let config = ExpansionConfig::default();
        let site = site_in(vec![expr_stmt(call("Stringify", vec![name("total")]))], 0);
        let resolved = MacroResolver::new(&table, &SymbolMarkers, &config)
            .bind(symbol, site, None)
            .unwrap()
            .unwrap();
        assert!(matches!(&resolved.args[0], MacroArg::Syntax(Expr::Name { name, .. }) if name == "total"));
    }

    #[test]
    fn forwarded_quote_is_left_as_code() {
        let inner = Arc::new(MethodSymbol::new("Meta", "Inner").with_param(ParameterSymbol::quote("quote")));
        let outer_decl = function(
            "Outer",
            vec![param_with_default("quote", TypeRef::quote(), null())],
            TypeRef::Void,
            vec![expr_stmt(call("Inner", vec![name("quote")]))],
        );
        let table = SymbolTable::new();
        let config = ExpansionConfig::default();
        let resolver = MacroResolver::new(&table, &SymbolMarkers, &config);

        let mut site = site_in(outer_decl.body.statements.clone(), 0);
        site.function = Some(Rc::new(outer_decl));
        assert!(resolver.bind(Arc::clone(&inner), site.clone(), None).unwrap().is_none());

        site.call.args = vec![name("other")];
        assert!(resolver.bind(inner, site, None).unwrap().is_some());
    }
}
