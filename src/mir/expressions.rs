//! The fully typed tree produced by instantiation.
//!
//! Every expression carries a concrete `Type`. Symbol-typed values never make
//! it in here: symbol arguments only take part in overload matching and are
//! dropped from the runtime argument list.

use crate::{
    cst::{DeclKind, LogicalOp, Span},
    types::Type,
};

use super::instance::FnKey;

#[derive(Clone, Debug)]
pub struct TypedExpr {
    pub span: Span,
    pub ty: Type,
    pub kind: TypedExprKind,
}

#[derive(Clone, Debug)]
pub enum TypedArg {
    Value(TypedExpr),

    /// `rest...`, where `rest` is a vararg group
    Spread { name: String, types: Vec<Type> },
}

#[derive(Clone, Debug)]
pub enum TypedExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),

    Var(String),

    Call {
        target: FnKey,
        args: Vec<TypedArg>,
    },

    /// Calls a variable holding a lambda
    CallLambda {
        name: String,
        args: Vec<TypedExpr>,
    },

    /// `malloc(Class, ..)`, with the attributes in declaration order
    Malloc {
        class: Type,
        attributes: Vec<(String, TypedExpr)>,
    },

    Attribute {
        owner: Box<TypedExpr>,
        name: String,
    },

    Logical {
        op: LogicalOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },

    List(Vec<TypedExpr>),

    Lambda {
        params: Vec<Option<String>>,
        body: Vec<TypedStmt>,
    },

    Await(Box<TypedExpr>),

    /// The implicit Int to Float conversion
    IntToFloat(Box<TypedExpr>),
}

impl TypedExpr {
    pub fn new(span: Span, ty: Type, kind: TypedExprKind) -> TypedExpr {
        TypedExpr { span, ty, kind }
    }
}

#[derive(Clone, Debug)]
pub enum AssignTarget {
    Var(String),
    Attribute { owner: TypedExpr, name: String },
}

#[derive(Clone, Debug)]
pub struct TypedStmt {
    pub span: Span,
    pub kind: TypedStmtKind,
}

#[derive(Clone, Debug)]
pub enum TypedStmtKind {
    Expr(TypedExpr),

    Decl {
        kind: DeclKind,
        name: String,
        ty: Type,
        value: TypedExpr,

        /// For `auto`: the `delete` instantiation the cleanup calls
        delete: Option<FnKey>,
    },

    Assign {
        target: AssignTarget,
        value: TypedExpr,
    },

    If {
        cond: TypedExpr,
        then: Vec<TypedStmt>,
        otherwise: Vec<TypedStmt>,
    },

    While {
        cond: TypedExpr,
        body: Vec<TypedStmt>,
    },

    For {
        init: Option<Box<TypedStmt>>,
        cond: Option<TypedExpr>,
        step: Option<Box<TypedStmt>>,
        body: Vec<TypedStmt>,
    },

    Return(Option<TypedExpr>),
    Break,
    Continue,

    Block(Vec<TypedStmt>),
}

/// Visits every expression under `stmts`, outermost first
pub fn walk_exprs<'a>(stmts: &'a [TypedStmt], f: &mut dyn FnMut(&'a TypedExpr)) {
    for s in stmts {
        walk_stmt(s, f);
    }
}

fn walk_stmt<'a>(s: &'a TypedStmt, f: &mut dyn FnMut(&'a TypedExpr)) {
    match &s.kind {
        TypedStmtKind::Expr(e) | TypedStmtKind::Decl { value: e, .. } => walk_expr(e, f),
        TypedStmtKind::Assign { target, value } => {
            if let AssignTarget::Attribute { owner, .. } = target {
                walk_expr(owner, f);
            }
            walk_expr(value, f);
        }
        TypedStmtKind::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, f);
            walk_exprs(then, f);
            walk_exprs(otherwise, f);
        }
        TypedStmtKind::While { cond, body } => {
            walk_expr(cond, f);
            walk_exprs(body, f);
        }
        TypedStmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            if let Some(i) = init {
                walk_stmt(i, f);
            }
            if let Some(c) = cond {
                walk_expr(c, f);
            }
            if let Some(s) = step {
                walk_stmt(s, f);
            }
            walk_exprs(body, f);
        }
        TypedStmtKind::Return(Some(e)) => walk_expr(e, f),
        TypedStmtKind::Block(b) => walk_exprs(b, f),
        TypedStmtKind::Return(None) | TypedStmtKind::Break | TypedStmtKind::Continue => {}
    }
}

fn walk_expr<'a>(e: &'a TypedExpr, f: &mut dyn FnMut(&'a TypedExpr)) {
    f(e);

    match &e.kind {
        TypedExprKind::Call { args, .. } => {
            for a in args {
                if let TypedArg::Value(v) = a {
                    walk_expr(v, f);
                }
            }
        }
        TypedExprKind::CallLambda { args, .. } | TypedExprKind::List(args) => {
            args.iter().for_each(|a| walk_expr(a, f))
        }
        TypedExprKind::Malloc { attributes, .. } => {
            attributes.iter().for_each(|(_, a)| walk_expr(a, f))
        }
        TypedExprKind::Attribute { owner: inner, .. }
        | TypedExprKind::Await(inner)
        | TypedExprKind::IntToFloat(inner) => walk_expr(inner, f),
        TypedExprKind::Logical { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        TypedExprKind::Lambda { body, .. } => walk_exprs(body, f),
        TypedExprKind::Int(_)
        | TypedExprKind::Float(_)
        | TypedExprKind::Str(_)
        | TypedExprKind::Bool(_)
        | TypedExprKind::Var(_) => {}
    }
}
