//! Macro invocation: runtime handles and how bound symbols find them.
//!
//! Implementations are registered by [`MacroSignature`] (declaring type,
//! name, static-ness, generic arity and parameter type names). The first time
//! a bound symbol is expanded its signature is matched against the registered
//! implementations and the result is cached by [`SymbolId`], so later call
//! sites reach the handle without matching again.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, PoisonError, RwLock};

use crate::ast::{Block, Expr, Literal, Stmt, TypeRef};
use crate::config::ExpansionConfig;
use crate::diagnostics::{BoxError, ExpansionError, SourceArc};
use crate::macros::binder;
use crate::macros::quote::{Fragment, InvocationSite, Quote};
use crate::macros::resolve::MacroArg;
use crate::semantic::{MethodSymbol, SymbolId};
use crate::err_ctx;

/// Error type macro bodies return.
pub type MacroFailure = BoxError;

/// A compiled macro body.
pub type MacroFn = dyn Fn(&mut Invocation) -> Result<(), MacroFailure> + Send + Sync;

/// An invocable implementation.
#[derive(Clone)]
pub struct MacroHandle {
    pub name: String,
    body: Arc<MacroFn>,
}

impl MacroHandle {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut Invocation) -> Result<(), MacroFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            body: Arc::new(body),
        }
    }

    pub fn call(&self, invocation: &mut Invocation) -> Result<(), MacroFailure> {
        (self.body)(invocation)
    }
}

impl fmt::Debug for MacroHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroHandle").field("name", &self.name).finish()
    }
}

/// What an implementation must agree on with the declaration it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacroSignature {
    pub declaring_type: String,
    pub name: String,
    pub is_static: bool,
    pub generic_arity: usize,
    pub parameter_types: Vec<String>,
}

impl MacroSignature {
    pub fn of(symbol: &MethodSymbol) -> Self {
        Self {
            declaring_type: symbol.declaring_type.clone(),
            name: symbol.name.clone(),
            is_static: symbol.is_static,
            generic_arity: symbol.generic_arity(),
            parameter_types: symbol.params.iter().map(|p| p.ty.type_name()).collect(),
        }
    }
}

impl fmt::Display for MacroSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            write!(f, "static ")?;
        }
        write!(f, "{}.{}", self.declaring_type, self.name)?;
        if self.generic_arity > 0 {
            write!(f, "`{}", self.generic_arity)?;
        }
        write!(f, "({})", self.parameter_types.join(", "))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Registered implementations plus the symbol → handle cache.
///
/// Both maps are only ever added to, and sit behind locks so one registry can
/// serve files rewritten on several threads.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    implementations: RwLock<HashMap<MacroSignature, MacroHandle>>,
    resolved: RwLock<HashMap<SymbolId, MacroHandle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation. Returns the one it replaced, if any.
    pub fn register(&self, signature: MacroSignature, handle: MacroHandle) -> Option<MacroHandle> {
        self.implementations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(signature, handle)
    }

    /// Registers `body` as the implementation of `symbol`.
    pub fn register_fn<F>(&self, symbol: &MethodSymbol, body: F) -> Option<MacroHandle>
    where
        F: Fn(&mut Invocation) -> Result<(), MacroFailure> + Send + Sync + 'static,
    {
        let handle = MacroHandle::new(&symbol.qualified_name(), body);
        self.register(MacroSignature::of(symbol), handle)
    }

    /// Matches `symbol` once and remembers the result.
    pub fn discover(&self, symbol: &MethodSymbol) -> Option<MacroHandle> {
        if let Some(handle) = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&symbol.id)
        {
            return Some(handle.clone());
        }

        let signature = MacroSignature::of(symbol);
        let handle = self
            .implementations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&signature)
            .cloned()?;
        tracing::trace!(%signature, "matched macro implementation");
        self.resolved
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.id)
            .or_insert_with(|| handle.clone());
        Some(handle)
    }

    /// The handle serving `symbol`, or a resolution error at the call site.
    pub fn resolve(
        &self,
        symbol: &MethodSymbol,
        site: &InvocationSite,
        source: Option<&SourceArc>,
    ) -> Result<MacroHandle, ExpansionError> {
        self.discover(symbol).ok_or_else(|| {
            err_ctx!(
                Resolution,
                site.call.span,
                source.cloned(),
                "no compiled implementation matches '{}'",
                MacroSignature::of(symbol)
            )
            .with_help("the macro must be compiled and registered before the files that call it")
        })
    }

    pub fn contains(&self, signature: &MacroSignature) -> bool {
        self.implementations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.implementations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// GENERIC INSTANTIATION
// ============================================================================

/// A type as the runtime knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeType(pub String);

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves call-site type arguments to runtime types.
pub trait MetadataResolver: Send + Sync {
    fn resolve_type(&self, ty: &TypeRef) -> Option<RuntimeType>;
}

/// Resolves every concrete type to its name; open type parameters stay unresolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameMetadataResolver;

impl MetadataResolver for NameMetadataResolver {
    fn resolve_type(&self, ty: &TypeRef) -> Option<RuntimeType> {
        match ty {
            TypeRef::Generic(_) | TypeRef::Inferred => None,
            other => Some(RuntimeType(other.type_name())),
        }
    }
}

/// Instantiates a generic target with the call's type arguments.
pub fn resolve_type_args(
    symbol: &MethodSymbol,
    site: &InvocationSite,
    metadata: &dyn MetadataResolver,
    source: Option<&SourceArc>,
) -> Result<Vec<RuntimeType>, ExpansionError> {
    let supplied = &site.call.type_args;
    if supplied.len() != symbol.generic_arity() {
        return Err(err_ctx!(
            Resolution,
            site.call.span,
            source.cloned(),
            "macro '{}' takes {} type argument(s) but the call supplies {}",
            symbol.qualified_name(),
            symbol.generic_arity(),
            supplied.len()
        ));
    }
    supplied
        .iter()
        .map(|ty| {
            metadata.resolve_type(ty).ok_or_else(|| {
                err_ctx!(
                    Resolution,
                    site.call.span,
                    source.cloned(),
                    "cannot resolve type argument '{}' of macro '{}'",
                    ty,
                    symbol.qualified_name()
                )
            })
        })
        .collect()
}

// ============================================================================
// INVOCATION
// ============================================================================

/// Everything a macro body receives.
#[derive(Debug)]
pub struct Invocation {
    site: Rc<InvocationSite>,
    args: Vec<MacroArg>,
    type_args: Vec<RuntimeType>,
}

fn failure(message: String) -> MacroFailure {
    message.into()
}

impl Invocation {
    pub fn new(site: Rc<InvocationSite>, args: Vec<MacroArg>, type_args: Vec<RuntimeType>) -> Self {
        Self {
            site,
            args,
            type_args,
        }
    }

    pub fn site(&self) -> &InvocationSite {
        &self.site
    }

    pub fn args(&self) -> &[MacroArg] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&MacroArg> {
        self.args.get(index)
    }

    pub fn type_args(&self) -> &[RuntimeType] {
        &self.type_args
    }

    /// The first quote argument.
    pub fn quote(&self) -> Result<&Quote, MacroFailure> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                MacroArg::Quote(quote) => Some(quote),
                _ => None,
            })
            .ok_or_else(|| failure(format!("macro '{}' has no quote parameter", self.site.call.callee)))
    }

    /// The quote passed to parameter `index`.
    pub fn quote_at(&self, index: usize) -> Result<&Quote, MacroFailure> {
        match self.args.get(index) {
            Some(MacroArg::Quote(quote)) => Ok(quote),
            _ => Err(failure(format!("parameter {} is not a quote", index))),
        }
    }

    pub fn constant(&self, index: usize) -> Result<&Literal, MacroFailure> {
        match self.args.get(index) {
            Some(MacroArg::Constant(value)) => Ok(value),
            _ => Err(failure(format!("parameter {} is not a constant", index))),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, MacroFailure> {
        match self.constant(index)? {
            Literal::Int(value) => Ok(*value),
            other => Err(failure(format!("parameter {} is {}, expected an int", index, other))),
        }
    }

    /// The captured following statement (a captured block is returned as a block statement).
    pub fn statement(&self, index: usize) -> Result<Stmt, MacroFailure> {
        match self.args.get(index) {
            Some(MacroArg::Statement(stmt)) => Ok(stmt.clone()),
            Some(MacroArg::Block(block)) => Ok(Stmt::Block(block.clone())),
            _ => Err(failure(format!("parameter {} did not capture a statement", index))),
        }
    }

    pub fn block(&self, index: usize) -> Result<&Block, MacroFailure> {
        match self.args.get(index) {
            Some(MacroArg::Block(block)) => Ok(block),
            _ => Err(failure(format!("parameter {} did not capture a block", index))),
        }
    }

    /// Call-site syntax of the argument at `index`, constant or not.
    pub fn syntax(&self, index: usize) -> Option<&Expr> {
        match self.args.get(index) {
            Some(MacroArg::Syntax(expr)) => Some(expr),
            _ => self.site.call.args.get(index),
        }
    }
}

/// Runs `handle` inside the call binding and returns what the ambient style asked for.
///
/// Fragments written through quotes stay in the invocation's buffer for the
/// caller to read.
pub fn invoke(
    handle: &MacroHandle,
    invocation: &mut Invocation,
    config: &ExpansionConfig,
    source: Option<&SourceArc>,
) -> Result<Vec<Fragment>, ExpansionError> {
    let site = Rc::clone(&invocation.site);
    let scope = binder::enter(Rc::clone(&site))?;

    let outcome = if config.catch_panics {
        panic::catch_unwind(AssertUnwindSafe(|| handle.call(invocation)))
    } else {
        Ok(handle.call(invocation))
    };
    let ambient = scope.exit();

    match outcome {
        Ok(Ok(())) => Ok(ambient),
        Ok(Err(cause)) => Err(err_ctx!(
            Invocation,
            site.call.span,
            source.cloned(),
            "macro '{}' failed: {}",
            handle.name,
            cause
        )
        .with_source(cause)),
        Err(payload) => Err(err_ctx!(
            Invocation,
            site.call.span,
            source.cloned(),
            "macro '{}' panicked: {}",
            handle.name,
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
