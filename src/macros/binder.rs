//! Dynamic call binding.
//!
//! Some macros take no quote parameter at all: they find out which call they
//! are expanding, and say what it should become, through ambient state.
//! [`enter`] publishes the active invocation and returns a [`CallScope`];
//! while the scope lives, the functions of this module expose the call and
//! record the desired replacement.
//!
//! Entering takes a process-wide lock, so at most one macro body executes at
//! any instant and macro code needs no thread-safety of its own. The
//! published state is cleared when the scope ends, whether the macro
//! returned, failed or panicked.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::ast::{CallExpr, Expr, Stmt};
use crate::diagnostics::ExpansionError;
use crate::err_msg;
use crate::macros::quote::{Fragment, InvocationSite};

static EXECUTION_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

thread_local! {
    static ACTIVE: RefCell<Option<CallBinding>> = const { RefCell::new(None) };
}

/// State published for the invocation currently executing on this thread.
#[derive(Debug)]
struct CallBinding {
    site: Rc<InvocationSite>,
    replacement: Vec<Fragment>,
}

/// Exclusive right to execute a macro body, with its call published.
///
/// Dropping the scope clears the published state and releases the lock.
#[derive(Debug)]
pub struct CallScope {
    _lock: MutexGuard<'static, ()>,
}

/// Publishes `site` as the active invocation, blocking until no other
/// invocation is executing.
///
/// Entering again from inside a macro body on the same thread is an error
/// rather than a deadlock.
pub fn enter(site: Rc<InvocationSite>) -> Result<CallScope, ExpansionError> {
    if is_active() {
        return Err(err_msg!(
            Internal,
            "macro call '{}' entered the call binding while another invocation was active on this thread",
            site.call.callee
        ));
    }
    let lock = EXECUTION_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    ACTIVE.with(|active| {
        *active.borrow_mut() = Some(CallBinding {
            site,
            replacement: Vec::new(),
        });
    });
    Ok(CallScope { _lock: lock })
}

impl CallScope {
    /// Ends the scope, returning the replacement recorded through the binding.
    pub fn exit(self) -> Vec<Fragment> {
        ACTIVE.with(|active| {
            active
                .borrow_mut()
                .take()
                .map(|binding| binding.replacement)
                .unwrap_or_default()
        })
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        // The lock guard field is released after this body runs.
        ACTIVE.with(|active| active.borrow_mut().take());
    }
}

pub fn is_active() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

pub fn current_site() -> Option<Rc<InvocationSite>> {
    ACTIVE.with(|active| active.borrow().as_ref().map(|b| Rc::clone(&b.site)))
}

pub fn current_call() -> Option<CallExpr> {
    current_site().map(|site| site.call.clone())
}

pub fn current_statement() -> Option<Stmt> {
    current_site().map(|site| site.statement.clone())
}

/// Asks for the active call to be replaced by `expr`.
pub fn replace_with_expression(expr: Expr) -> Result<(), ExpansionError> {
    with_binding(|binding| {
        binding.replacement.clear();
        binding.replacement.push(Fragment::Expr(expr));
    })
}

/// Asks for the active call's statement to be replaced by `statements`.
pub fn replace_with_statements(statements: Vec<Stmt>) -> Result<(), ExpansionError> {
    with_binding(|binding| {
        binding.replacement = statements.into_iter().map(Fragment::Stmt).collect();
    })
}

fn with_binding(f: impl FnOnce(&mut CallBinding)) -> Result<(), ExpansionError> {
    ACTIVE.with(|active| match active.borrow_mut().as_mut() {
        Some(binding) => {
            f(binding);
            Ok(())
        }
        None => Err(err_msg!(
            Internal,
            "no macro invocation is active on this thread"
        )),
    })
}
