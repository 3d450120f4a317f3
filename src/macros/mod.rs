//! # Compile-Time Macro Expansion
//!
//! A macro is an ordinary static function that runs while its caller is
//! being compiled. It receives a [`Quote`] describing the call site and emits
//! syntax fragments; the [`Expander`] splices those fragments back into the
//! tree in place of the call.
//!
//! ## Pipeline
//!
//! 1. [`resolve`]: decide whether a call binds to a macro and build its arguments.
//! 2. [`invoke`]: find the compiled implementation and run it under the call binding.
//! 3. [`expander`]: read what the macro produced and splice it into the tree,
//!    then walk the inserted code for further macro calls.
//!
//! At most one macro body runs at any instant in the process ([`binder`]).
//!
//! ## Writing a macro
//!
//! ```rust
//! use stagecraft::ast::builder::{call, expr_stmt, name, post_increment};
//! use stagecraft::ast::{Item, SyntaxTree};
//! use stagecraft::macros::{Expander, HandleRegistry};
//! use stagecraft::semantic::{MethodSymbol, ParameterSymbol, SymbolTable};
//!
//! let bump = MethodSymbol::new("Counters", "Bump").with_param(ParameterSymbol::quote("quote"));
//! let registry = HandleRegistry::new();
//! registry.register_fn(&bump, |invocation| {
//!     invocation.quote()?.emit(expr_stmt(post_increment(name("count"))));
//!     Ok(())
//! });
//! let mut table = SymbolTable::new();
//! table.declare(bump);
//!
//! let tree = SyntaxTree::new(
//!     "main.cs",
//!     vec![Item::Statements(stagecraft::ast::builder::block(vec![expr_stmt(call("Bump", vec![]))]))],
//! );
//! let expansion = Expander::new(&table, &registry).expand(&tree).unwrap();
//! match &expansion.tree.items[0] {
//!     Item::Statements(block) => assert_eq!(block.to_string(), "{ count++; }"),
//!     _ => unreachable!(),
//! }
//! ```

pub mod binder;
pub mod builtins;
pub mod expander;
pub mod invoke;
pub mod quote;
pub mod resolve;
pub mod splice;

pub use binder::CallScope;
pub use builtins::register_builtins;
pub use expander::{CancellationToken, Expander, Expansion, ExpansionStep, SpliceKind};
pub use invoke::{
    HandleRegistry, Invocation, MacroFailure, MacroHandle, MacroSignature, MetadataResolver,
    NameMetadataResolver, RuntimeType,
};
pub use quote::{AccumulationBuffer, Enclosing, Fragment, InvocationSite, Quote};
pub use resolve::{MacroArg, MacroResolver, ResolvedCall};
pub use splice::{PendingSplice, SpliceStack};
