//! Standard macros, declared on the `Meta` type.
//!
//! | Declaration | Expands to |
//! |---|---|
//! | `static string Stringify(object value, Quote<string> quote = null)` | the argument's source text as a string literal |
//! | `static void Repeat(int count, Statement body = null, Quote quote = null)` | the following statement, `count` times |
//! | `static string FunctionName(Quote<string> quote = null)` | the name of the enclosing member |
//! | `[Macro] static string Here()` | `"file:offset"` of the call |
//!
//! `Here` takes no quote: it reads its call through the call binding.

use crate::ast::builder::string;
use crate::ast::{Literal, TypeRef};
use crate::macros::binder;
use crate::macros::invoke::{HandleRegistry, Invocation, MacroFailure};
use crate::semantic::{Marker, MethodSymbol, ParameterSymbol, SymbolTable};

pub const META: &str = "Meta";

// ===================================================================================================
// REGISTRY: Standard Macro Registration
// ===================================================================================================

/// Declares the standard macros in `table` and registers their implementations.
pub fn register_builtins(table: &mut SymbolTable, registry: &HandleRegistry) {
    let builtins: [(MethodSymbol, fn(&mut Invocation) -> Result<(), MacroFailure>); 4] = [
        (function_name_symbol(), expand_function_name),
        (here_symbol(), expand_here),
        (repeat_symbol(), expand_repeat),
        (stringify_symbol(), expand_stringify),
    ];
    for (symbol, body) in builtins {
        registry.register_fn(&symbol, body);
        table.declare(symbol);
    }
}

fn function_name_symbol() -> MethodSymbol {
    MethodSymbol::new(META, "FunctionName")
        .with_param(ParameterSymbol::new("quote", TypeRef::quote_of(TypeRef::String)).with_default(Literal::Null))
        .returning(TypeRef::String)
}

fn here_symbol() -> MethodSymbol {
    MethodSymbol::new(META, "Here")
        .with_marker(Marker::Macro)
        .returning(TypeRef::String)
}

fn repeat_symbol() -> MethodSymbol {
    MethodSymbol::new(META, "Repeat")
        .with_param(ParameterSymbol::new("count", TypeRef::Int))
        .with_param(ParameterSymbol::new("body", TypeRef::Statement).with_default(Literal::Null))
        .with_param(ParameterSymbol::quote("quote"))
}

fn stringify_symbol() -> MethodSymbol {
    MethodSymbol::new(META, "Stringify")
        .with_param(ParameterSymbol::new("value", TypeRef::Object))
        .with_param(ParameterSymbol::new("quote", TypeRef::quote_of(TypeRef::String)).with_default(Literal::Null))
        .returning(TypeRef::String)
}

// ===================================================================================================
// IMPLEMENTATIONS
// ===================================================================================================

fn expand_function_name(invocation: &mut Invocation) -> Result<(), MacroFailure> {
    let quote = invocation.quote()?;
    quote.result(string(&quote.enclosing().member_name()));
    Ok(())
}

fn expand_here(_invocation: &mut Invocation) -> Result<(), MacroFailure> {
    let site = binder::current_site().ok_or("Here called outside a macro expansion")?;
    let location = format!("{}:{}", site.file, site.call.span.start);
    binder::replace_with_expression(string(&location))?;
    Ok(())
}

fn expand_repeat(invocation: &mut Invocation) -> Result<(), MacroFailure> {
    let count = invocation.int(0)?;
    let count = usize::try_from(count).map_err(|_| format!("Repeat count must not be negative, got {}", count))?;
    let body = invocation.statement(1)?;
    let quote = invocation.quote()?;
    for _ in 0..count {
        quote.emit(body.clone());
    }
    Ok(())
}

fn expand_stringify(invocation: &mut Invocation) -> Result<(), MacroFailure> {
    let text = invocation
        .syntax(0)
        .map(ToString::to_string)
        .ok_or("Stringify needs an argument")?;
    invocation.quote()?.result(string(&text));
    Ok(())
}
