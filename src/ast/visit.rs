//! Traversal helpers used by the expansion driver.
//!
//! A statement's *own* expressions are the ones it evaluates directly: the
//! expression of an expression statement, a local's initializer, a condition,
//! a returned value. Nested statements (branches, loop bodies, blocks) and
//! lambda bodies belong to their own scopes and are never entered here.
//!
//! Calls are visited in pre-order: an outer call comes before the calls in its
//! arguments, and arguments are visited left to right.

use crate::ast::{CallExpr, Expr, Lambda, Stmt};

/// Mutable references to the expressions a statement evaluates directly.
pub fn own_expressions_mut(stmt: &mut Stmt) -> Vec<&mut Expr> {
    match stmt {
        Stmt::Expr { expr, .. } => vec![expr],
        Stmt::Local {
            init: Some(init), ..
        } => vec![init],
        Stmt::If { condition, .. } | Stmt::While { condition, .. } => vec![condition],
        Stmt::Return {
            value: Some(value), ..
        } => vec![value],
        _ => Vec::new(),
    }
}

/// The expressions a statement evaluates directly.
pub fn own_expressions(stmt: &Stmt) -> Vec<&Expr> {
    match stmt {
        Stmt::Expr { expr, .. } => vec![expr],
        Stmt::Local {
            init: Some(init), ..
        } => vec![init],
        Stmt::If { condition, .. } | Stmt::While { condition, .. } => vec![condition],
        Stmt::Return {
            value: Some(value), ..
        } => vec![value],
        _ => Vec::new(),
    }
}

/// Calls evaluated directly by `stmt`, in pre-order.
pub fn own_calls(stmt: &Stmt) -> Vec<&CallExpr> {
    let mut calls = Vec::new();
    for expr in own_expressions(stmt) {
        collect_calls(expr, &mut calls);
    }
    calls
}

fn collect_calls<'a>(expr: &'a Expr, out: &mut Vec<&'a CallExpr>) {
    match expr {
        Expr::Call(call) => {
            out.push(call);
            for arg in &call.args {
                collect_calls(arg, out);
            }
        }
        Expr::Unary { operand, .. } => collect_calls(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_calls(lhs, out);
            collect_calls(rhs, out);
        }
        Expr::Assign { target, value, .. } => {
            collect_calls(target, out);
            collect_calls(value, out);
        }
        Expr::Literal { .. } | Expr::Name { .. } | Expr::Lambda(_) => {}
    }
}

/// Replaces the first call equal to `target` (in pre-order) with `replacement`.
///
/// Returns `false` when no such call is found; `stmt` is then left untouched.
pub fn replace_call(stmt: &mut Stmt, target: &CallExpr, replacement: Expr) -> bool {
    let mut slot = Some(replacement);
    for expr in own_expressions_mut(stmt) {
        if replace_in_expr(expr, target, &mut slot) {
            return true;
        }
    }
    false
}

fn replace_in_expr(expr: &mut Expr, target: &CallExpr, slot: &mut Option<Expr>) -> bool {
    if let Expr::Call(call) = &*expr {
        if call == target {
            if let Some(replacement) = slot.take() {
                *expr = replacement;
                return true;
            }
            return false;
        }
    }
    match expr {
        Expr::Call(call) => call
            .args
            .iter_mut()
            .any(|arg| replace_in_expr(arg, target, slot)),
        Expr::Unary { operand, .. } => replace_in_expr(operand, target, slot),
        Expr::Binary { lhs, rhs, .. } => {
            replace_in_expr(lhs, target, slot) || replace_in_expr(rhs, target, slot)
        }
        Expr::Assign { target: lhs, value, .. } => {
            replace_in_expr(lhs, target, slot) || replace_in_expr(value, target, slot)
        }
        Expr::Literal { .. } | Expr::Name { .. } | Expr::Lambda(_) => false,
    }
}

/// Lambdas appearing in the statement's own expressions (not nested ones).
pub fn lambdas_mut(stmt: &mut Stmt) -> Vec<&mut Lambda> {
    let mut lambdas = Vec::new();
    for expr in own_expressions_mut(stmt) {
        collect_lambdas_mut(expr, &mut lambdas);
    }
    lambdas
}

fn collect_lambdas_mut<'a>(expr: &'a mut Expr, out: &mut Vec<&'a mut Lambda>) {
    match expr {
        Expr::Lambda(lambda) => out.push(lambda),
        Expr::Call(call) => {
            for arg in call.args.iter_mut() {
                collect_lambdas_mut(arg, out);
            }
        }
        Expr::Unary { operand, .. } => collect_lambdas_mut(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_lambdas_mut(lhs, out);
            collect_lambdas_mut(rhs, out);
        }
        Expr::Assign { target, value, .. } => {
            collect_lambdas_mut(target, out);
            collect_lambdas_mut(value, out);
        }
        Expr::Literal { .. } | Expr::Name { .. } => {}
    }
}

/// True when `stmt` is exactly `call;`.
pub fn is_standalone_call(stmt: &Stmt, call: &CallExpr) -> bool {
    matches!(stmt, Stmt::Expr { expr: Expr::Call(inner), .. } if inner == call)
}
