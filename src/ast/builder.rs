//! Constructors for syntax fragments.
//!
//! Macros build their output with these helpers instead of spelling out node
//! structs. Every node produced here carries `Span::default()`; spans are only
//! meaningful for nodes that came from real source.

use crate::ast::{
    Accessor, AccessorKind, BinaryOp, Block, CallExpr, Expr, FunctionDecl, Lambda, LambdaBody,
    Literal, Param, PropertyDecl, Span, Stmt, TypeRef, UnaryOp,
};

// ----------------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------------

pub fn literal(value: Literal) -> Expr {
    Expr::Literal {
        value,
        span: Span::default(),
    }
}

pub fn int(value: i64) -> Expr {
    literal(Literal::Int(value))
}

pub fn boolean(value: bool) -> Expr {
    literal(Literal::Bool(value))
}

pub fn string(value: &str) -> Expr {
    literal(Literal::String(value.to_string()))
}

pub fn null() -> Expr {
    literal(Literal::Null)
}

pub fn name(name: &str) -> Expr {
    Expr::Name {
        name: name.to_string(),
        span: Span::default(),
    }
}

pub fn call_expr(callee: &str, args: Vec<Expr>) -> CallExpr {
    CallExpr {
        callee: callee.to_string(),
        type_args: Vec::new(),
        args,
        span: Span::default(),
    }
}

pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(call_expr(callee, args))
}

pub fn generic_call(callee: &str, type_args: Vec<TypeRef>, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        type_args,
        ..call_expr(callee, args)
    })
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
        span: Span::default(),
    }
}

pub fn post_increment(operand: Expr) -> Expr {
    unary(UnaryOp::PostIncrement, operand)
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span: Span::default(),
    }
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    Expr::Assign {
        target: Box::new(target),
        value: Box::new(value),
        span: Span::default(),
    }
}

pub fn lambda(params: Vec<Param>, body: Expr) -> Expr {
    Expr::Lambda(Lambda {
        params,
        body: LambdaBody::Expr(Box::new(body)),
        span: Span::default(),
    })
}

pub fn block_lambda(params: Vec<Param>, body: Vec<Stmt>) -> Expr {
    Expr::Lambda(Lambda {
        params,
        body: LambdaBody::Block(Block::new(body)),
        span: Span::default(),
    })
}

// ----------------------------------------------------------------------------
// Statements
// ----------------------------------------------------------------------------

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr {
        expr,
        span: Span::default(),
    }
}

pub fn empty() -> Stmt {
    Stmt::Empty {
        span: Span::default(),
    }
}

pub fn local(ty: TypeRef, name: &str, init: Option<Expr>) -> Stmt {
    Stmt::Local {
        ty,
        name: name.to_string(),
        init,
        span: Span::default(),
    }
}

pub fn block(statements: Vec<Stmt>) -> Block {
    Block::new(statements)
}

pub fn block_stmt(statements: Vec<Stmt>) -> Stmt {
    Stmt::Block(Block::new(statements))
}

pub fn if_stmt(condition: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    Stmt::If {
        condition,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
        span: Span::default(),
    }
}

pub fn while_stmt(condition: Expr, body: Stmt) -> Stmt {
    Stmt::While {
        condition,
        body: Box::new(body),
        span: Span::default(),
    }
}

pub fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return {
        value,
        span: Span::default(),
    }
}

// ----------------------------------------------------------------------------
// Declarations
// ----------------------------------------------------------------------------

pub fn param(name: &str, ty: TypeRef) -> Param {
    Param {
        name: name.to_string(),
        ty,
        default: None,
    }
}

pub fn param_with_default(name: &str, ty: TypeRef, default: Expr) -> Param {
    Param {
        default: Some(default),
        ..param(name, ty)
    }
}

/// A static function declaration with no attributes.
pub fn function(name: &str, params: Vec<Param>, return_type: TypeRef, body: Vec<Stmt>) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        is_static: true,
        type_params: Vec::new(),
        params,
        return_type,
        body: Block::new(body),
        attributes: Vec::new(),
        span: Span::default(),
    }
}

pub fn getter(body: Vec<Stmt>) -> Accessor {
    Accessor {
        kind: AccessorKind::Get,
        body: Block::new(body),
        span: Span::default(),
    }
}

pub fn property(name: &str, ty: TypeRef, accessors: Vec<Accessor>) -> PropertyDecl {
    PropertyDecl {
        name: name.to_string(),
        ty,
        accessors,
        span: Span::default(),
    }
}
