//! # Stagecraft Test Fixtures
//!
//! Shared helpers for the integration tests: tree and symbol builders, macro
//! registration shorthands, and a tiny interpreter for the statement subset
//! so expanded code can be executed and checked by its effect.

#![allow(dead_code)]

use std::collections::HashMap;

use stagecraft::ast::{BinaryOp, Block, Expr, Item, Literal, Stmt, SyntaxTree, TypeRef, UnaryOp};
use stagecraft::macros::{HandleRegistry, Invocation, MacroFailure};
use stagecraft::semantic::{MethodSymbol, ParameterSymbol, SymbolTable};

/// Declaring type used for test macros.
pub const FIXTURES: &str = "Fixtures";

/// A compilation unit made of top-level statements.
pub fn script(path: &str, statements: Vec<Stmt>) -> SyntaxTree {
    SyntaxTree::new(path, vec![Item::Statements(Block::new(statements))])
}

/// The top-level statements of a script, rendered.
pub fn rendered(tree: &SyntaxTree) -> Vec<String> {
    top_level(tree).iter().map(|s| s.to_string()).collect()
}

pub fn top_level(tree: &SyntaxTree) -> &[Stmt] {
    match tree.items.first() {
        Some(Item::Statements(block)) => &block.statements,
        other => panic!("expected top-level statements, found {:?}", other),
    }
}

/// `static void <name>(Quote quote = null)`
pub fn quote_macro(name: &str) -> MethodSymbol {
    MethodSymbol::new(FIXTURES, name).with_param(ParameterSymbol::quote("quote"))
}

/// Declares `symbol` and registers `body` as its implementation.
pub fn define<F>(table: &mut SymbolTable, registry: &HandleRegistry, symbol: MethodSymbol, body: F)
where
    F: Fn(&mut Invocation) -> Result<(), MacroFailure> + Send + Sync + 'static,
{
    registry.register_fn(&symbol, body);
    table.declare(symbol);
}

/// The macro `M` of the counter scenario: one `v++;` per `int v` declared
/// earlier in the enclosing block.
pub fn define_counter_macro(table: &mut SymbolTable, registry: &HandleRegistry) {
    define(table, registry, quote_macro("M"), |invocation| {
        let quote = invocation.quote()?;
        let declared: Vec<String> = quote
            .site()
            .preceding_statements()
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Local {
                    ty: TypeRef::Int,
                    name,
                    ..
                } => Some(name.clone()),
                _ => None,
            })
            .collect();
        for name in declared {
            quote.emit(stagecraft::ast::builder::expr_stmt(
                stagecraft::ast::builder::post_increment(stagecraft::ast::builder::name(&name)),
            ));
        }
        Ok(())
    });
}

// ============================================================================
// INTERPRETER
// ============================================================================

/// Runs integer statements and returns the final variable values.
///
/// Supports locals, assignments, increments, arithmetic and comparisons,
/// blocks, `if` and `while`. Calls evaluate to 0.
pub fn run(statements: &[Stmt]) -> HashMap<String, i64> {
    let mut vars = HashMap::new();
    exec_all(statements, &mut vars);
    vars
}

fn exec_all(statements: &[Stmt], vars: &mut HashMap<String, i64>) {
    for stmt in statements {
        exec(stmt, vars);
    }
}

fn exec(stmt: &Stmt, vars: &mut HashMap<String, i64>) {
    match stmt {
        Stmt::Empty { .. } | Stmt::Return { .. } => {}
        Stmt::Expr { expr, .. } => {
            eval(expr, vars);
        }
        Stmt::Local { name, init, .. } => {
            let value = init.as_ref().map_or(0, |e| eval(e, vars));
            vars.insert(name.clone(), value);
        }
        Stmt::Block(block) => exec_all(&block.statements, vars),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            if eval(condition, vars) != 0 {
                exec(then_branch, vars);
            } else if let Some(else_branch) = else_branch {
                exec(else_branch, vars);
            }
        }
        Stmt::While {
            condition, body, ..
        } => {
            while eval(condition, vars) != 0 {
                exec(body, vars);
            }
        }
    }
}

fn eval(expr: &Expr, vars: &mut HashMap<String, i64>) -> i64 {
    match expr {
        Expr::Literal { value, .. } => match value {
            Literal::Int(v) => *v,
            Literal::Bool(b) => i64::from(*b),
            Literal::String(_) | Literal::Null => 0,
        },
        Expr::Name { name, .. } => vars.get(name).copied().unwrap_or(0),
        Expr::Call(_) | Expr::Lambda(_) => 0,
        Expr::Unary { op, operand, .. } => match op {
            UnaryOp::Neg => -eval(operand, vars),
            UnaryOp::Not => i64::from(eval(operand, vars) == 0),
            UnaryOp::PreIncrement | UnaryOp::PostIncrement => step(operand, 1, *op, vars),
            UnaryOp::PreDecrement | UnaryOp::PostDecrement => step(operand, -1, *op, vars),
        },
        Expr::Binary { op, lhs, rhs, .. } => {
            let (l, r) = (eval(lhs, vars), eval(rhs, vars));
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Eq => i64::from(l == r),
                BinaryOp::Ne => i64::from(l != r),
                BinaryOp::Lt => i64::from(l < r),
                BinaryOp::Le => i64::from(l <= r),
                BinaryOp::Gt => i64::from(l > r),
                BinaryOp::Ge => i64::from(l >= r),
                BinaryOp::And => i64::from(l != 0 && r != 0),
                BinaryOp::Or => i64::from(l != 0 || r != 0),
            }
        }
        Expr::Assign { target, value, .. } => {
            let value = eval(value, vars);
            if let Expr::Name { name, .. } = target.as_ref() {
                vars.insert(name.clone(), value);
            }
            value
        }
    }
}

fn step(operand: &Expr, by: i64, op: UnaryOp, vars: &mut HashMap<String, i64>) -> i64 {
    let Expr::Name { name, .. } = operand else {
        panic!("cannot increment {}", operand);
    };
    let before = vars.get(name).copied().unwrap_or(0);
    vars.insert(name.clone(), before + by);
    match op {
        UnaryOp::PostIncrement | UnaryOp::PostDecrement => before,
        _ => before + by,
    }
}
