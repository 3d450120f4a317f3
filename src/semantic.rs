//! Semantic-model collaborators.
//!
//! The engine relies on the host's semantic model to decide what a call
//! refers to. A host implements [`SemanticModel`] (binding calls and
//! declarations to [`MethodSymbol`]s) and [`MarkerLookup`] (listing the
//! markers, i.e. attributes, on a bound declaration). [`SymbolTable`] is an
//! in-memory model binding calls by their callee path, enough for hosts whose
//! macros are declared up front and for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::{CallExpr, Expr, FunctionDecl, Literal, TypeRef};

/// Identity of a bound declaration, stable for the lifetime of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

static NEXT_SYMBOL_ID: AtomicU32 = AtomicU32::new(1);

impl SymbolId {
    pub fn fresh() -> Self {
        SymbolId(NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Declarative annotation opting a declaration into a macro role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    /// The function is a macro even without a quote-typed parameter.
    Macro,
    /// The parameter receives the quote context regardless of its declared type.
    QuoteParameter,
    Other(String),
}

impl Marker {
    /// Maps an attribute name as written in source to a marker.
    pub fn from_attribute(name: &str) -> Self {
        match name {
            "Macro" => Marker::Macro,
            "Quote" | "QuoteParameter" => Marker::QuoteParameter,
            other => Marker::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSymbol {
    pub name: String,
    pub ty: TypeRef,
    /// Declared default value, if any.
    pub default: Option<Literal>,
    pub markers: Vec<Marker>,
}

impl ParameterSymbol {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
            markers: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Literal) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// A `Quote quote = null` parameter.
    pub fn quote(name: &str) -> Self {
        Self::new(name, TypeRef::quote()).with_default(Literal::Null)
    }
}

/// A bound function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSymbol {
    pub id: SymbolId,
    pub declaring_type: String,
    pub name: String,
    pub is_static: bool,
    pub type_params: Vec<String>,
    pub params: Vec<ParameterSymbol>,
    pub return_type: TypeRef,
    pub markers: Vec<Marker>,
}

impl MethodSymbol {
    /// A static method with a fresh id, no parameters and no result.
    pub fn new(declaring_type: &str, name: &str) -> Self {
        Self {
            id: SymbolId::fresh(),
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            is_static: true,
            type_params: Vec::new(),
            params: Vec::new(),
            return_type: TypeRef::Void,
            markers: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParameterSymbol) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_type_param(mut self, name: &str) -> Self {
        self.type_params.push(name.to_string());
        self
    }

    pub fn returning(mut self, return_type: TypeRef) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// `Type.Name`, the path calls use to reach a static method.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }

    pub fn generic_arity(&self) -> usize {
        self.type_params.len()
    }

    pub fn has_result(&self) -> bool {
        !self.return_type.is_void()
    }

    /// Builds the symbol a source declaration binds to.
    pub fn from_decl(declaring_type: &str, decl: &FunctionDecl) -> Self {
        Self {
            id: SymbolId::fresh(),
            declaring_type: declaring_type.to_string(),
            name: decl.name.clone(),
            is_static: decl.is_static,
            type_params: decl.type_params.clone(),
            params: decl
                .params
                .iter()
                .map(|p| ParameterSymbol {
                    name: p.name.clone(),
                    ty: p.ty.clone(),
                    default: p.default.as_ref().and_then(|d| d.as_literal().cloned()),
                    markers: Vec::new(),
                })
                .collect(),
            return_type: decl.return_type.clone(),
            markers: decl
                .attributes
                .iter()
                .map(|a| Marker::from_attribute(a))
                .collect(),
        }
    }
}

/// A bound declaration whose markers can be listed.
#[derive(Debug, Clone, Copy)]
pub enum SymbolRef<'a> {
    Method(&'a MethodSymbol),
    Parameter(&'a MethodSymbol, usize),
}

// ============================================================================
// COLLABORATOR INTERFACES
// ============================================================================

/// Per-tree facility resolving calls and declarations to bound symbols.
pub trait SemanticModel: Send + Sync {
    /// The declaration a call binds to, if any.
    fn bind_call(&self, call: &CallExpr) -> Option<Arc<MethodSymbol>>;

    /// The symbol of a function declared in the tree being compiled.
    fn declared_symbol(&self, decl: &FunctionDecl) -> Option<Arc<MethodSymbol>>;

    /// Compile-time constant value of an expression.
    fn constant_value(&self, expr: &Expr) -> Option<Literal> {
        expr.as_literal().cloned()
    }
}

/// Lists the markers on a bound declaration.
pub trait MarkerLookup: Send + Sync {
    fn markers(&self, symbol: SymbolRef<'_>) -> Vec<Marker>;
}

/// Reads markers stored on the symbols themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolMarkers;

impl MarkerLookup for SymbolMarkers {
    fn markers(&self, symbol: SymbolRef<'_>) -> Vec<Marker> {
        match symbol {
            SymbolRef::Method(method) => method.markers.clone(),
            SymbolRef::Parameter(method, index) => method
                .params
                .get(index)
                .map(|p| p.markers.clone())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// IN-MEMORY MODEL
// ============================================================================

/// Binds calls by callee path.
///
/// A method registered as `Meta.Repeat` is reachable both as `Meta.Repeat(...)`
/// and, unless another type declares the same name, as `Repeat(...)`.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_path: HashMap<String, Arc<MethodSymbol>>,
    by_simple_name: HashMap<String, Vec<Arc<MethodSymbol>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a method. Returns the previous declaration with the same path.
    pub fn declare(&mut self, symbol: MethodSymbol) -> Option<Arc<MethodSymbol>> {
        let symbol = Arc::new(symbol);
        let previous = self
            .by_path
            .insert(symbol.qualified_name(), Arc::clone(&symbol));
        let same_name = self.by_simple_name.entry(symbol.name.clone()).or_default();
        if let Some(previous) = &previous {
            same_name.retain(|s| s.id != previous.id);
        }
        same_name.push(symbol);
        previous
    }

    /// Declares every function of a type declaration in the tree being compiled.
    pub fn declare_functions(&mut self, declaring_type: &str, decls: &[FunctionDecl]) {
        for decl in decls {
            self.declare(MethodSymbol::from_decl(declaring_type, decl));
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<MethodSymbol>> {
        if let Some(symbol) = self.by_path.get(path) {
            return Some(Arc::clone(symbol));
        }
        match self.by_simple_name.get(path).map(Vec::as_slice) {
            Some([only]) => Some(Arc::clone(only)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Arc<MethodSymbol>> {
        self.by_path.values()
    }
}

impl SemanticModel for SymbolTable {
    fn bind_call(&self, call: &CallExpr) -> Option<Arc<MethodSymbol>> {
        self.get(&call.callee)
    }

    fn declared_symbol(&self, decl: &FunctionDecl) -> Option<Arc<MethodSymbol>> {
        match self.by_simple_name.get(&decl.name).map(Vec::as_slice) {
            Some([only]) => Some(Arc::clone(only)),
            _ => None,
        }
    }
}

impl MarkerLookup for SymbolTable {
    fn markers(&self, symbol: SymbolRef<'_>) -> Vec<Marker> {
        SymbolMarkers.markers(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::call_expr;

    #[test]
    fn binds_qualified_and_unambiguous_simple_names() {
        let mut table = SymbolTable::new();
        table.declare(MethodSymbol::new("Meta", "Repeat"));
        table.declare(MethodSymbol::new("A", "Log"));
        table.declare(MethodSymbol::new("B", "Log"));

        assert!(table.bind_call(&call_expr("Meta.Repeat", vec![])).is_some());
        assert!(table.bind_call(&call_expr("Repeat", vec![])).is_some());
        assert!(table.bind_call(&call_expr("A.Log", vec![])).is_some());
        assert!(table.bind_call(&call_expr("Log", vec![])).is_none());
    }

    #[test]
    fn redeclaring_replaces_the_simple_name_entry() {
        let mut table = SymbolTable::new();
        table.declare(MethodSymbol::new("Meta", "M"));
        let previous = table.declare(MethodSymbol::new("Meta", "M").returning(TypeRef::Int));
        assert!(previous.is_some());
        let bound = table.bind_call(&call_expr("M", vec![])).unwrap();
        assert_eq!(bound.return_type, TypeRef::Int);
    }

    #[test]
    fn attributes_become_markers() {
        let mut decl = crate::ast::builder::function("Here", vec![], TypeRef::String, vec![]);
        decl.attributes.push("Macro".to_string());
        let symbol = MethodSymbol::from_decl("Meta", &decl);
        assert_eq!(SymbolMarkers.markers(SymbolRef::Method(&symbol)), vec![Marker::Macro]);
    }
}
