//! Type resolution of function bodies.
//!
//! A `BodyResolver` walks the statement templates of one instantiation under
//! that instantiation's bindings, checks them, and produces the typed tree.
//! Every function or class it runs into is queued on the instantiator.

use itertools::Itertools;
use tracing::trace;

use crate::{
    cst::{
        ArgTemplate, CallArgTemplate, DeclKind, ExprTemplate, ExprTemplateInner, FunctionBody,
        FunctionTemplate, Span, StmtTemplate, StmtTemplateInner, TypeTemplate,
    },
    errors::{bail, CompileError, CompileResult, ErrorKind, InstantiationFrame},
    types::{serialize_list, Bindings, Type},
};

use super::{
    expressions::{AssignTarget, TypedArg, TypedExpr, TypedExprKind, TypedStmt, TypedStmtKind},
    instance::{FnKey, InstantiatedBody, InstantiatedFunction, Param, VarargParam},
    instantiator::{Chain, Instantiator},
    scope::{FrameKind, LookupError, Scope, VarType, Variable},
};

/// Whether a statement list returns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnConclusion {
    Never,
    Maybe,
    Definitely,
}

pub fn conclusion(stmts: &[TypedStmt]) -> ReturnConclusion {
    let mut acc = ReturnConclusion::Never;

    for s in stmts {
        match stmt_conclusion(s) {
            ReturnConclusion::Definitely => return ReturnConclusion::Definitely,
            ReturnConclusion::Maybe => acc = ReturnConclusion::Maybe,
            ReturnConclusion::Never => {}
        }
    }

    acc
}

fn stmt_conclusion(s: &TypedStmt) -> ReturnConclusion {
    match &s.kind {
        TypedStmtKind::Return(_) => ReturnConclusion::Definitely,
        TypedStmtKind::If {
            then, otherwise, ..
        } => match (conclusion(then), conclusion(otherwise)) {
            (ReturnConclusion::Definitely, ReturnConclusion::Definitely) => {
                ReturnConclusion::Definitely
            }
            (ReturnConclusion::Never, ReturnConclusion::Never) => ReturnConclusion::Never,
            _ => ReturnConclusion::Maybe,
        },
        // a loop body may run zero times
        TypedStmtKind::While { body, .. } | TypedStmtKind::For { body, .. } => {
            match conclusion(body) {
                ReturnConclusion::Never => ReturnConclusion::Never,
                _ => ReturnConclusion::Maybe,
            }
        }
        TypedStmtKind::Block(b) => conclusion(b),
        _ => ReturnConclusion::Never,
    }
}

/// What a `return` inside the current body has to produce
#[derive(Clone, Debug)]
struct ReturnContext {
    returns: Type,
    is_async: bool,
    in_lambda: bool,
    loops: usize,
}

/// One argument of an overloaded call after resolution
struct ResolvedArg {
    /// What overload matching sees; more than one for a spread group
    types: Vec<Type>,

    /// None for compile-time-only symbol arguments
    runtime: Option<TypedArg>,
}

pub(super) struct BodyResolver<'i, 't> {
    inst: &'i mut Instantiator<'t>,
    scope: Scope,
    bindings: Bindings,
    contexts: Vec<ReturnContext>,
    chain: Chain,

    /// Resolving top level declarations rather than a function body
    top_level: bool,

    temps: usize,
}

pub(super) fn instantiate_function(
    inst: &mut Instantiator<'_>,
    template: &FunctionTemplate,
    key: &FnKey,
    bindings: Bindings,
    chain: &[InstantiationFrame],
) -> CompileResult<InstantiatedFunction> {
    let declared = template
        .returns
        .resolve(&bindings)
        .map_err(|e| e.at(template.span))?;

    let returns = if template.is_async {
        Type::promise(declared.clone())
    } else {
        declared.clone()
    };

    inst.enqueue_class(&returns, Some(template.span), chain)?;

    let explicit = template.args.len();
    let params = template
        .args
        .iter()
        .zip(key.args.iter())
        .map(|(a, ty)| Param {
            name: a.name.clone(),
            ty: ty.clone(),
        })
        .collect_vec();

    for p in params.iter() {
        inst.enqueue_class(&p.ty, Some(template.span), chain)?;
    }

    let vararg = template.vararg.as_ref().map(|v| VarargParam {
        name: v.name.clone(),
        types: key.args.get(explicit..).unwrap_or(&[]).to_vec(),
    });

    let display_name = if template.is_static {
        "static".to_owned()
    } else {
        template.name.clone()
    };

    let body = match &template.body {
        FunctionBody::Native(code) => InstantiatedBody::Native(code.clone()),
        FunctionBody::Block(stmts) => {
            let scope = inst.globals.clone();
            let mut r = BodyResolver::new(inst, scope, bindings, chain.to_vec());

            r.scope.push(FrameKind::Full);
            for (a, p) in template.args.iter().zip(params.iter()) {
                if let Some(name) = &a.name {
                    r.declare(name, VarType::Value(p.ty.clone()), a.is_final, template.span)?;
                }
            }
            if let Some(VarargParam {
                name: Some(name),
                types,
            }) = &vararg
            {
                r.declare(name, VarType::Group(types.clone()), true, template.span)?;
            }

            r.contexts.push(ReturnContext {
                returns: declared.clone(),
                is_async: template.is_async,
                in_lambda: false,
                loops: 0,
            });

            // the body shares the parameters' frame, so redeclaring a parameter is an error
            let body = r.resolve_stmts(stmts)?;

            if !declared.is_void() && conclusion(&body) != ReturnConclusion::Definitely {
                bail!(
                    Return,
                    template.span,
                    "{key} must return {declared} on every path"
                );
            }

            InstantiatedBody::Block(body)
        }
    };

    Ok(InstantiatedFunction {
        key: key.clone(),
        display_name,
        span: template.span,
        returns,
        params,
        vararg,
        is_async: template.is_async,
        is_static: template.is_static,
        body,
    })
}

impl<'i, 't> BodyResolver<'i, 't> {
    fn new(inst: &'i mut Instantiator<'t>, scope: Scope, bindings: Bindings, chain: Chain) -> Self {
        BodyResolver {
            inst,
            scope,
            bindings,
            contexts: Vec::new(),
            chain,
            top_level: false,
            temps: 0,
        }
    }

    pub(super) fn for_globals(inst: &'i mut Instantiator<'t>, scope: Scope, chain: Chain) -> Self {
        let mut r = BodyResolver::new(inst, scope, Bindings::new(), chain);
        r.top_level = true;
        r.contexts.push(ReturnContext {
            returns: Type::void(),
            is_async: false,
            in_lambda: false,
            loops: 0,
        });
        r
    }

    pub(super) fn into_scope(self) -> Scope {
        self.scope
    }

    fn context(&self) -> CompileResult<&ReturnContext> {
        self.contexts.last().ok_or_else(|| {
            CompileError::new(ErrorKind::Scope, "statement outside of any function body")
        })
    }

    fn context_mut(&mut self) -> CompileResult<&mut ReturnContext> {
        self.contexts.last_mut().ok_or_else(|| {
            CompileError::new(ErrorKind::Scope, "statement outside of any function body")
        })
    }

    fn declare(&mut self, name: &str, ty: VarType, is_final: bool, span: Span) -> CompileResult<()> {
        let is_global = self.top_level && self.scope.depth() == 1;

        self.scope
            .declare(Variable {
                name: name.to_owned(),
                ty,
                is_final,
                is_global,
            })
            .map_err(|_| {
                CompileError::new(
                    ErrorKind::Scope,
                    format!("{name} is already declared in this block"),
                )
                .at(span)
            })
    }

    fn lookup(&self, name: &str, span: Span) -> CompileResult<&Variable> {
        match self.scope.lookup(name) {
            Ok(v) => Ok(v),
            Err(LookupError::Unknown) => bail!(Scope, span, "{name} is not declared"),
            Err(LookupError::NotCapturable) => bail!(
                Capture,
                span,
                "a lambda can only capture final variables, and {name} is not final"
            ),
        }
    }

    /// Resolves a type template under the current bindings and queues the result
    fn resolve_type(&mut self, t: &TypeTemplate, span: Span) -> CompileResult<Type> {
        let ty = t.resolve(&self.bindings).map_err(|e| e.at(span))?;
        self.inst.enqueue_class(&ty, Some(span), &self.chain)?;
        Ok(ty)
    }

    /// Applies the one implicit conversion there is, Int to Float
    fn coerce(&self, e: TypedExpr, expected: &Type) -> CompileResult<TypedExpr> {
        if &e.ty == expected {
            return Ok(e);
        }

        if e.ty == Type::int() && *expected == Type::float() {
            return Ok(TypedExpr::new(
                e.span,
                Type::float(),
                TypedExprKind::IntToFloat(Box::new(e)),
            ));
        }

        bail!(TypeMismatch, e.span, "expected {expected}, found {}", e.ty)
    }

    fn resolve_stmts(&mut self, stmts: &[StmtTemplate]) -> CompileResult<Vec<TypedStmt>> {
        stmts.iter().map(|s| self.resolve_stmt(s)).collect()
    }

    fn resolve_block(&mut self, stmts: &[StmtTemplate]) -> CompileResult<Vec<TypedStmt>> {
        self.scope.push(FrameKind::Full);
        let r = self.resolve_stmts(stmts);
        self.scope.pop();
        r
    }

    fn resolve_loop_body(&mut self, stmts: &[StmtTemplate]) -> CompileResult<Vec<TypedStmt>> {
        self.context_mut()?.loops += 1;
        let r = self.resolve_block(stmts);
        self.context_mut()?.loops -= 1;
        r
    }

    fn resolve_cond(&mut self, e: &ExprTemplate) -> CompileResult<TypedExpr> {
        let c = self.resolve_expr(e, None)?;
        if c.ty != Type::bool() {
            bail!(TypeMismatch, c.span, "a condition must be Bool, found {}", c.ty);
        }
        Ok(c)
    }

    pub(super) fn resolve_stmt(&mut self, s: &StmtTemplate) -> CompileResult<TypedStmt> {
        let span = s.span;

        let kind = match &s.inner {
            StmtTemplateInner::Expr(e) => TypedStmtKind::Expr(self.resolve_expr(e, None)?),

            StmtTemplateInner::Decl {
                kind,
                name,
                ty,
                value,
            } => {
                let declared = match ty {
                    Some(t) => Some(self.resolve_type(t, span)?),
                    None => None,
                };

                let value = self.resolve_expr(value, declared.as_ref())?;
                let (ty, value) = match declared {
                    Some(d) => {
                        let v = self.coerce(value, &d)?;
                        (d, v)
                    }
                    None => (value.ty.clone(), value),
                };

                if ty.is_void() {
                    bail!(TypeMismatch, span, "{name} cannot be declared with type Void");
                }

                let delete = if *kind == DeclKind::Auto {
                    if self.top_level {
                        bail!(Scope, span, "auto declarations are not allowed at the top level");
                    }
                    let (key, _) = self.call_key("delete", vec![ty.clone()], span)?;
                    Some(key)
                } else {
                    None
                };

                self.declare(name, VarType::Value(ty.clone()), kind.is_final(), span)?;

                TypedStmtKind::Decl {
                    kind: *kind,
                    name: name.clone(),
                    ty,
                    value,
                    delete,
                }
            }

            StmtTemplateInner::Assign { target, value } => return self.resolve_assign(span, target, value),

            StmtTemplateInner::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.resolve_cond(cond)?;
                let then = self.resolve_block(then)?;
                let otherwise = match otherwise {
                    Some(o) => self.resolve_block(o)?,
                    None => Vec::new(),
                };

                TypedStmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }

            StmtTemplateInner::While { cond, body } => {
                let cond = self.resolve_cond(cond)?;
                let body = self.resolve_loop_body(body)?;

                TypedStmtKind::While { cond, body }
            }

            StmtTemplateInner::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scope.push(FrameKind::Full);
                let r = self.resolve_for(init.as_deref(), cond.as_ref(), step.as_deref(), body);
                self.scope.pop();
                r?
            }

            StmtTemplateInner::ForIn {
                name,
                iterable,
                body,
            } => {
                self.scope.push(FrameKind::Full);
                let r = self.resolve_for_in(span, name, iterable, body);
                self.scope.pop();
                r?
            }

            StmtTemplateInner::Return(value) => {
                let expected = self.context()?.returns.clone();

                match value {
                    None if expected.is_void() => TypedStmtKind::Return(None),
                    None => bail!(Return, span, "this function must return a {expected}"),
                    Some(_) if expected.is_void() => {
                        bail!(Return, span, "a Void function cannot return a value")
                    }
                    Some(v) => {
                        let v = self.resolve_expr(v, Some(&expected))?;
                        TypedStmtKind::Return(Some(self.coerce(v, &expected)?))
                    }
                }
            }

            StmtTemplateInner::Break | StmtTemplateInner::Continue => {
                if self.context()?.loops == 0 {
                    bail!(Scope, span, "break and continue only work inside a loop");
                }

                match &s.inner {
                    StmtTemplateInner::Break => TypedStmtKind::Break,
                    _ => TypedStmtKind::Continue,
                }
            }

            StmtTemplateInner::Block(b) => TypedStmtKind::Block(self.resolve_block(b)?),
        };

        Ok(TypedStmt { span, kind })
    }

    fn resolve_assign(&mut self, span: Span, target: &ExprTemplate, value: &ExprTemplate) -> CompileResult<TypedStmt> {
        match &target.inner {
            ExprTemplateInner::Name(name) => {
                let var = self.lookup(name, target.span)?;

                let ty = match &var.ty {
                    VarType::Value(t) => t.clone(),
                    VarType::Group(_) => bail!(TypeMismatch, target.span, "cannot assign to the vararg group {name}"),
                };
                if var.is_final {
                    bail!(Scope, target.span, "cannot assign to {name}, it is final");
                }

                let value = self.resolve_expr(value, Some(&ty))?;
                let value = self.coerce(value, &ty)?;

                Ok(TypedStmt {
                    span,
                    kind: TypedStmtKind::Assign {
                        target: AssignTarget::Var(name.clone()),
                        value,
                    },
                })
            }

            ExprTemplateInner::Attribute { owner, name } => {
                let owner = self.resolve_expr(owner, None)?;

                let declared = self
                    .inst
                    .class_attributes(&owner.ty)
                    .map_err(|e| e.at(target.span))?
                    .and_then(|attrs| attrs.into_iter().find(|(n, _)| n == name));

                if let Some((_, ty)) = declared {
                    let value = self.resolve_expr(value, Some(&ty))?;
                    let value = self.coerce(value, &ty)?;

                    return Ok(TypedStmt {
                        span,
                        kind: TypedStmtKind::Assign {
                            target: AssignTarget::Attribute {
                                owner,
                                name: name.clone(),
                            },
                            value,
                        },
                    });
                }

                // no such attribute: `setattr(owner, :name, value)`
                let value = self.resolve_expr(value, None)?;
                let owner_ty = owner.ty.clone();
                let args = vec![
                    ResolvedArg {
                        types: vec![owner_ty.clone()],
                        runtime: Some(TypedArg::Value(owner)),
                    },
                    ResolvedArg {
                        types: vec![Type::Symbol(name.clone())],
                        runtime: None,
                    },
                    ResolvedArg {
                        types: vec![value.ty.clone()],
                        runtime: Some(TypedArg::Value(value)),
                    },
                ];

                let call = self.overloaded_call("setattr", args, target.span).map_err(|e| {
                    if e.kind == ErrorKind::NoMatchingFunction {
                        CompileError::new(
                            ErrorKind::NoMatchingFunction,
                            format!("{owner_ty} has no attribute {name}, and {}", e.message),
                        )
                        .at(target.span)
                    } else {
                        e
                    }
                })?;

                Ok(TypedStmt {
                    span,
                    kind: TypedStmtKind::Expr(call),
                })
            }

            _ => bail!(Syntax, target.span, "only names and attributes can be assigned to"),
        }
    }

    fn resolve_for(
        &mut self,
        init: Option<&StmtTemplate>,
        cond: Option<&ExprTemplate>,
        step: Option<&StmtTemplate>,
        body: &[StmtTemplate],
    ) -> CompileResult<TypedStmtKind> {
        let init = match init {
            Some(StmtTemplate {
                span,
                inner: StmtTemplateInner::Decl {
                    kind: DeclKind::Auto, ..
                },
            }) => bail!(Scope, *span, "auto is not allowed in a for initializer"),
            Some(i) => Some(Box::new(self.resolve_stmt(i)?)),
            None => None,
        };

        let cond = match cond {
            Some(c) => Some(self.resolve_cond(c)?),
            None => None,
        };

        let step = match step {
            Some(s) => Some(Box::new(self.resolve_stmt(s)?)),
            None => None,
        };

        let body = self.resolve_loop_body(body)?;

        Ok(TypedStmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    /// `for (x in xs) body` becomes
    /// `for (final $it = iter(xs); hasNext($it);) { final x = next($it); { body } }`
    fn resolve_for_in(
        &mut self,
        span: Span,
        name: &str,
        iterable: &ExprTemplate,
        body: &[StmtTemplate],
    ) -> CompileResult<TypedStmtKind> {
        let iterable = self.resolve_expr(iterable, None)?;
        let iter = self.call_with_values("iter", vec![iterable], span)?;

        let it_name = format!("$it{}", self.temps);
        self.temps += 1;
        self.declare(&it_name, VarType::Value(iter.ty.clone()), true, span)?;

        let it_var = || TypedExpr::new(span, iter.ty.clone(), TypedExprKind::Var(it_name.clone()));

        let cond = self.call_with_values("hasNext", vec![it_var()], span)?;
        if cond.ty != Type::bool() {
            bail!(TypeMismatch, span, "hasNext({}) must return Bool, found {}", iter.ty, cond.ty);
        }

        let next = self.call_with_values("next", vec![it_var()], span)?;
        if next.ty.is_void() {
            bail!(TypeMismatch, span, "next({}) must return a value", iter.ty);
        }

        self.scope.push(FrameKind::Full);
        let r = self
            .declare(name, VarType::Value(next.ty.clone()), true, span)
            .and_then(|_| self.resolve_loop_body(body));
        self.scope.pop();
        let inner = r?;

        let init = TypedStmt {
            span,
            kind: TypedStmtKind::Decl {
                kind: DeclKind::Final,
                name: it_name.clone(),
                ty: iter.ty.clone(),
                value: iter,
                delete: None,
            },
        };

        let body = vec![
            TypedStmt {
                span,
                kind: TypedStmtKind::Decl {
                    kind: DeclKind::Final,
                    name: name.to_owned(),
                    ty: next.ty.clone(),
                    value: next,
                    delete: None,
                },
            },
            TypedStmt {
                span,
                kind: TypedStmtKind::Block(inner),
            },
        ];

        Ok(TypedStmtKind::For {
            init: Some(Box::new(init)),
            cond: Some(cond),
            step: None,
            body,
        })
    }

    /// Resolves an expression and queues its type. `expected` is only a hint,
    /// used where a type can't be inferred bottom up (an empty list)
    fn resolve_expr(&mut self, e: &ExprTemplate, expected: Option<&Type>) -> CompileResult<TypedExpr> {
        let r = self.resolve_expr_inner(e, expected)?;

        if r.ty.is_symbol() {
            bail!(TypeMismatch, e.span, "the symbol {} has no runtime value", r.ty);
        }

        self.inst.enqueue_class(&r.ty, Some(e.span), &self.chain)?;
        Ok(r)
    }

    fn resolve_expr_inner(&mut self, e: &ExprTemplate, expected: Option<&Type>) -> CompileResult<TypedExpr> {
        let span = e.span;
        let lit = |ty: Type, kind: TypedExprKind| -> CompileResult<TypedExpr> {
            Ok(TypedExpr::new(span, ty, kind))
        };

        match &e.inner {
            ExprTemplateInner::Int(v) => lit(Type::int(), TypedExprKind::Int(*v)),
            ExprTemplateInner::Float(v) => lit(Type::float(), TypedExprKind::Float(*v)),
            ExprTemplateInner::Str(v) => lit(Type::string(), TypedExprKind::Str(v.clone())),
            ExprTemplateInner::Bool(v) => lit(Type::bool(), TypedExprKind::Bool(*v)),

            ExprTemplateInner::Name(name) => {
                let var = self.lookup(name, span)?;
                match &var.ty {
                    VarType::Value(t) => lit(t.clone(), TypedExprKind::Var(name.clone())),
                    VarType::Group(_) => bail!(
                        TypeMismatch,
                        span,
                        "the vararg group {name} can only be spread into a call, as {name}..."
                    ),
                }
            }

            ExprTemplateInner::Type(t) => {
                let ty = t.resolve(&self.bindings).map_err(|e| e.at(span))?;
                bail!(TypeMismatch, span, "the type {ty} cannot be used as a value")
            }

            ExprTemplateInner::Call { callee, args } => self.resolve_call(span, callee, args),

            ExprTemplateInner::Attribute { owner, name } => {
                let owner = self.resolve_expr(owner, None)?;

                let declared = self
                    .inst
                    .class_attributes(&owner.ty)
                    .map_err(|e| e.at(span))?
                    .and_then(|attrs| attrs.into_iter().find(|(n, _)| n == name));

                if let Some((_, ty)) = declared {
                    return lit(
                        ty,
                        TypedExprKind::Attribute {
                            owner: Box::new(owner),
                            name: name.clone(),
                        },
                    );
                }

                // no such attribute: `getattr(owner, :name)`
                let owner_ty = owner.ty.clone();
                let args = vec![
                    ResolvedArg {
                        types: vec![owner_ty.clone()],
                        runtime: Some(TypedArg::Value(owner)),
                    },
                    ResolvedArg {
                        types: vec![Type::Symbol(name.clone())],
                        runtime: None,
                    },
                ];

                self.overloaded_call("getattr", args, span).map_err(|e| {
                    if e.kind == ErrorKind::NoMatchingFunction {
                        CompileError::new(
                            ErrorKind::NoMatchingFunction,
                            format!("{owner_ty} has no attribute {name}, and {}", e.message),
                        )
                        .at(span)
                    } else {
                        e
                    }
                })
            }

            ExprTemplateInner::Logical { op, lhs, rhs } => {
                let lhs = self.resolve_expr(lhs, None)?;
                let rhs = self.resolve_expr(rhs, None)?;

                for side in [&lhs, &rhs] {
                    if side.ty != Type::bool() {
                        bail!(TypeMismatch, side.span, "{op} takes Bool operands, found {}", side.ty);
                    }
                }

                lit(
                    Type::bool(),
                    TypedExprKind::Logical {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                )
            }

            ExprTemplateInner::List(items) => self.resolve_list(span, items, expected),

            ExprTemplateInner::Lambda {
                args,
                returns,
                body,
            } => self.resolve_lambda(span, args, returns, body),

            ExprTemplateInner::Await(inner) => {
                let ctx = self.context()?;
                if ctx.in_lambda {
                    bail!(Scope, span, "await cannot be used inside a lambda");
                }
                if !ctx.is_async {
                    bail!(Scope, span, "await can only be used inside an async function");
                }

                let inner = self.resolve_expr(inner, None)?;
                let ty = match inner.ty.promised() {
                    Some(t) => t.clone(),
                    None => bail!(TypeMismatch, span, "await needs a Promise, found {}", inner.ty),
                };

                lit(ty, TypedExprKind::Await(Box::new(inner)))
            }
        }
    }

    fn resolve_list(&mut self, span: Span, items: &[ExprTemplate], expected: Option<&Type>) -> CompileResult<TypedExpr> {
        let hinted = match expected {
            Some(Type::Template(n, args)) if n == "List" && args.len() == 1 => Some(args[0].clone()),
            _ => None,
        };

        let mut elem = hinted;
        let mut typed = Vec::with_capacity(items.len());

        for item in items {
            let v = self.resolve_expr(item, elem.as_ref())?;
            let v = match &elem {
                Some(t) => self.coerce(v, t)?,
                None => {
                    elem = Some(v.ty.clone());
                    v
                }
            };
            typed.push(v);
        }

        match elem {
            Some(t) => Ok(TypedExpr::new(span, Type::list(t), TypedExprKind::List(typed))),
            None => bail!(
                TypeMismatch,
                span,
                "the element type of an empty list has to come from a declared type"
            ),
        }
    }

    fn resolve_lambda(
        &mut self,
        span: Span,
        args: &[ArgTemplate],
        returns: &TypeTemplate,
        body: &[StmtTemplate],
    ) -> CompileResult<TypedExpr> {
        let ret = self.resolve_type(returns, span)?;

        let mut param_types = Vec::with_capacity(args.len());
        for a in args {
            let t = self.resolve_type(&a.ty, span)?;
            if t.is_symbol() {
                bail!(TypeMismatch, span, "lambda parameters cannot be symbols");
            }
            param_types.push(t);
        }

        self.scope.push(FrameKind::FinalsOnly);
        self.contexts.push(ReturnContext {
            returns: ret.clone(),
            is_async: false,
            in_lambda: true,
            loops: 0,
        });

        let r = self.resolve_lambda_body(span, args, &param_types, body);

        self.contexts.pop();
        self.scope.pop();
        let body = r?;

        if !ret.is_void() && conclusion(&body) != ReturnConclusion::Definitely {
            bail!(Return, span, "this lambda must return {ret} on every path");
        }

        Ok(TypedExpr::new(
            span,
            Type::lambda(ret, param_types),
            TypedExprKind::Lambda {
                params: args.iter().map(|a| a.name.clone()).collect(),
                body,
            },
        ))
    }

    fn resolve_lambda_body(
        &mut self,
        span: Span,
        args: &[ArgTemplate],
        param_types: &[Type],
        body: &[StmtTemplate],
    ) -> CompileResult<Vec<TypedStmt>> {
        for (a, t) in args.iter().zip(param_types) {
            if let Some(name) = &a.name {
                self.declare(name, VarType::Value(t.clone()), a.is_final, span)?;
            }
        }

        self.resolve_block(body)
    }

    fn resolve_call(&mut self, span: Span, callee: &str, args: &[CallArgTemplate]) -> CompileResult<TypedExpr> {
        // a variable holding a lambda shadows every function of that name
        match self.scope.lookup(callee) {
            Ok(var) => {
                let var = var.clone();
                return self.call_lambda(span, &var, args);
            }
            Err(LookupError::NotCapturable) => bail!(
                Capture,
                span,
                "a lambda can only capture final variables, and {callee} is not final"
            ),
            Err(LookupError::Unknown) => {}
        }

        if callee == "malloc" {
            if let Some(first) = args.first() {
                let is_type = match &first.value.inner {
                    ExprTemplateInner::Type(t) => !matches!(t, TypeTemplate::Symbol(_)),
                    ExprTemplateInner::Name(n) => self.scope.lookup(n).is_err(),
                    _ => false,
                };

                if is_type && !first.spread {
                    return self.resolve_malloc(span, args);
                }
            }
        }

        let resolved = args
            .iter()
            .map(|a| self.resolve_call_arg(a))
            .collect::<CompileResult<Vec<_>>>()?;

        self.overloaded_call(callee, resolved, span)
    }

    fn call_lambda(&mut self, span: Span, var: &Variable, args: &[CallArgTemplate]) -> CompileResult<TypedExpr> {
        let ty = match &var.ty {
            VarType::Value(t) => t.clone(),
            VarType::Group(_) => bail!(TypeMismatch, span, "{} is a vararg group, not a lambda", var.name),
        };

        let (ret, params) = match ty.as_lambda() {
            Some((r, p)) => (r.clone(), p.to_vec()),
            None => bail!(TypeMismatch, span, "{} is a {ty}, not a lambda", var.name),
        };

        if args.len() != params.len() {
            bail!(
                TypeMismatch,
                span,
                "{} takes {} arguments, but {} were given",
                var.name,
                params.len(),
                args.len()
            );
        }

        let mut typed = Vec::with_capacity(args.len());
        for (a, p) in args.iter().zip(params.iter()) {
            if a.spread {
                bail!(TypeMismatch, a.value.span, "arguments to a lambda cannot be spread");
            }
            let v = self.resolve_expr(&a.value, Some(p))?;
            typed.push(self.coerce(v, p)?);
        }

        Ok(TypedExpr::new(
            span,
            ret,
            TypedExprKind::CallLambda {
                name: var.name.clone(),
                args: typed,
            },
        ))
    }

    fn resolve_call_arg(&mut self, a: &CallArgTemplate) -> CompileResult<ResolvedArg> {
        let span = a.value.span;

        if a.spread {
            let name = match &a.value.inner {
                ExprTemplateInner::Name(n) => n,
                _ => bail!(TypeMismatch, span, "only a vararg group can be spread"),
            };

            return match &self.lookup(name, span)?.ty {
                VarType::Group(types) => Ok(ResolvedArg {
                    types: types.clone(),
                    runtime: Some(TypedArg::Spread {
                        name: name.clone(),
                        types: types.clone(),
                    }),
                }),
                VarType::Value(t) => bail!(TypeMismatch, span, "{name} is a {t}, and only a vararg group can be spread"),
            };
        }

        match &a.value.inner {
            ExprTemplateInner::Type(t) => {
                let ty = t.resolve(&self.bindings).map_err(|e| e.at(span))?;
                if !ty.is_symbol() {
                    bail!(TypeMismatch, span, "the type {ty} cannot be used as a value");
                }
                return Ok(ResolvedArg {
                    types: vec![ty],
                    runtime: None,
                });
            }
            ExprTemplateInner::Name(n) => {
                if let Ok(Variable {
                    ty: VarType::Value(t),
                    ..
                }) = self.scope.lookup(n)
                {
                    if t.is_symbol() {
                        return Ok(ResolvedArg {
                            types: vec![t.clone()],
                            runtime: None,
                        });
                    }
                }
            }
            _ => {}
        }

        let v = self.resolve_expr(&a.value, None)?;
        Ok(ResolvedArg {
            types: vec![v.ty.clone()],
            runtime: Some(TypedArg::Value(v)),
        })
    }

    /// Matches an overload and queues it, returning the key and its return type
    fn call_key(&mut self, name: &str, args: Vec<Type>, span: Span) -> CompileResult<(FnKey, Type)> {
        let templates = self.inst.templates;

        let m = match self.inst.match_function(name, &args) {
            Some(m) => m,
            None => {
                let candidates = self.inst.candidates_for(name);
                let mut msg = format!("no function matches {name}({})", serialize_list(&args));
                if !candidates.is_empty() {
                    msg.push_str(&format!("; candidates are {}", candidates.join(", ")));
                }
                return Err(CompileError::new(ErrorKind::NoMatchingFunction, msg).at(span));
            }
        };

        let template = &templates.functions[m.template];
        let mut returns = template.returns.resolve(&m.bindings).map_err(|e| e.at(span))?;
        if template.is_async {
            returns = Type::promise(returns);
        }

        let key = FnKey::new(name, args);
        trace!("call to {key} returns {returns}");

        self.inst.enqueue_function(key.clone(), Some(span), &self.chain)?;
        Ok((key, returns))
    }

    fn overloaded_call(&mut self, name: &str, args: Vec<ResolvedArg>, span: Span) -> CompileResult<TypedExpr> {
        let types = args.iter().flat_map(|a| a.types.iter().cloned()).collect_vec();
        let (key, returns) = self.call_key(name, types, span)?;

        Ok(TypedExpr::new(
            span,
            returns,
            TypedExprKind::Call {
                target: key,
                args: args.into_iter().filter_map(|a| a.runtime).collect(),
            },
        ))
    }

    fn call_with_values(&mut self, name: &str, values: Vec<TypedExpr>, span: Span) -> CompileResult<TypedExpr> {
        let args = values
            .into_iter()
            .map(|v| ResolvedArg {
                types: vec![v.ty.clone()],
                runtime: Some(TypedArg::Value(v)),
            })
            .collect();

        let call = self.overloaded_call(name, args, span)?;
        self.inst.enqueue_class(&call.ty, Some(span), &self.chain)?;
        Ok(call)
    }

    /// `malloc(Class, attr0, attr1, ..)`
    fn resolve_malloc(&mut self, span: Span, args: &[CallArgTemplate]) -> CompileResult<TypedExpr> {
        let first = &args[0].value;
        let pattern = match &first.inner {
            ExprTemplateInner::Type(t) => t.clone(),
            ExprTemplateInner::Name(n) => TypeTemplate::named(n),
            _ => bail!(TypeMismatch, first.span, "malloc needs a class as its first argument"),
        };
        let class = pattern.resolve(&self.bindings).map_err(|e| e.at(first.span))?;

        let templates = self.inst.templates;
        let m = match self.inst.match_class(&class) {
            Some(m) => m,
            None => bail!(NoMatchingClass, first.span, "no class matches {class}"),
        };

        let template = &templates.classes[m.template];
        if template.is_native || template.is_abstract {
            let what = if template.is_native { "native" } else { "abstract" };
            bail!(TypeMismatch, first.span, "malloc needs a concrete class, but {class} is {what}");
        }

        let attributes = self
            .inst
            .class_attributes(&class)
            .map_err(|e| e.at(first.span))?
            .unwrap_or_default();

        let values = &args[1..];
        let expected = attributes
            .iter()
            .map(|(n, t)| format!("{n} {t}"))
            .join(", ");

        if values.len() != attributes.len() {
            bail!(
                TypeMismatch,
                span,
                "malloc({class}, ..) takes the attributes ({expected}), but {} values were given",
                values.len()
            );
        }

        let mut typed = Vec::with_capacity(values.len());
        let mut raw_types = vec![class.clone()];

        for (a, (name, ty)) in values.iter().zip(attributes.iter()) {
            if a.spread {
                bail!(TypeMismatch, a.value.span, "malloc arguments cannot be spread");
            }

            let v = self.resolve_expr(&a.value, Some(ty))?;
            let got = v.ty.clone();
            raw_types.push(got.clone());

            let v = self.coerce(v, ty).map_err(|_| {
                CompileError::new(
                    ErrorKind::TypeMismatch,
                    format!("attribute {name} of {class} is a {ty}, but got a {got}"),
                )
                .at(a.value.span)
            })?;

            typed.push((name.clone(), v));
        }

        if let Some(m) = self.inst.match_function("malloc", &raw_types) {
            bail!(
                MallocShadowed,
                span,
                "{} shadows the builtin malloc({})",
                templates.functions[m.template].display_signature(),
                serialize_list(&raw_types)
            );
        }

        self.inst.enqueue_class(&class, Some(span), &self.chain)?;

        Ok(TypedExpr::new(
            span,
            class.clone(),
            TypedExprKind::Malloc {
                class,
                attributes: typed,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(kind: TypedStmtKind) -> TypedStmt {
        TypedStmt {
            span: Span::BUILTIN,
            kind,
        }
    }

    fn ret() -> TypedStmt {
        stmt(TypedStmtKind::Return(None))
    }

    fn cond() -> TypedExpr {
        TypedExpr::new(Span::BUILTIN, Type::bool(), TypedExprKind::Bool(true))
    }

    #[test]
    fn if_needs_both_branches_to_definitely_return() {
        let both = stmt(TypedStmtKind::If {
            cond: cond(),
            then: vec![ret()],
            otherwise: vec![ret()],
        });
        let one = stmt(TypedStmtKind::If {
            cond: cond(),
            then: vec![ret()],
            otherwise: vec![],
        });

        assert_eq!(conclusion(&[both]), ReturnConclusion::Definitely);
        assert_eq!(conclusion(&[one.clone()]), ReturnConclusion::Maybe);
        assert_eq!(conclusion(&[one, ret()]), ReturnConclusion::Definitely);
    }

    #[test]
    fn loops_only_maybe_return() {
        let l = stmt(TypedStmtKind::While {
            cond: cond(),
            body: vec![ret()],
        });

        assert_eq!(conclusion(&[l]), ReturnConclusion::Maybe);
        assert_eq!(conclusion(&[stmt(TypedStmtKind::Break)]), ReturnConclusion::Never);
    }
}
