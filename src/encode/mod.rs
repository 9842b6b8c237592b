//! JavaScript emission for an instantiated program.

pub mod native;
pub mod tags;

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use indent::indent_all_by;
use itertools::Itertools;
use tracing::debug;

use crate::{
    compile::file_tree::SourceRegistry,
    cst::{DeclKind, Span},
    errors::{CompileError, CompileResult, ErrorKind},
    mir::{
        expressions::{AssignTarget, TypedArg, TypedExpr, TypedExprKind, TypedStmt, TypedStmtKind},
        FnKey, InstantiatedBody, InstantiatedFunction, Program,
    },
    types::Type,
};

use tags::TagTable;

/// The runtime every generated program starts with; it binds `$rt`
pub const RUNTIME: &str = include_str!("runtime.js");

const GLOBALS_FN: &str = "$globals";
const GLOBAL_CONTEXT: &str = "<global>";

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield", "Array", "Error", "JSON", "Map", "Math", "NaN", "Infinity", "Number",
    "Object", "Promise", "Set", "String", "Symbol", "WeakMap", "console", "globalThis",
    "module", "process", "require", "setTimeout",
];

/// A source name as a JS identifier that can't collide with the language or the host
pub fn js_ident(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}$")
    } else {
        name.to_owned()
    }
}

/// An attribute as an object literal key. A plain `__proto__` key would set the
/// prototype, so that one is written as a computed key to make it an own field
fn js_key(attribute: &str) -> String {
    if attribute == "__proto__" {
        format!("[{}]", serde_json::Value::from(attribute))
    } else {
        attribute.to_owned()
    }
}

fn block(body: &str) -> String {
    if body.is_empty() {
        "{\n}".to_owned()
    } else {
        format!("{{\n{}\n}}", indent_all_by(4, body).trim_end())
    }
}

pub struct Generator<'a> {
    program: &'a Program,
    sources: &'a SourceRegistry,
    emit_type_comments: bool,

    fn_names: HashMap<FnKey, String>,
    class_names: HashMap<Type, String>,
    next_name: usize,

    /// Source names of every global, which locals must not reuse as is
    global_names: HashSet<String>,

    tags: TagTable,
}

impl<'a> Generator<'a> {
    pub fn new(program: &'a Program, sources: &'a SourceRegistry, emit_type_comments: bool) -> Generator<'a> {
        Generator {
            program,
            sources,
            emit_type_comments,
            fn_names: HashMap::new(),
            class_names: HashMap::new(),
            next_name: 0,
            global_names: program
                .globals
                .iter()
                .filter_map(|g| match &g.kind {
                    TypedStmtKind::Decl { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect(),
            tags: TagTable::new(),
        }
    }

    fn unique(&mut self, base: &str) -> String {
        let n = self.next_name;
        self.next_name += 1;
        format!("{base}__${n}")
    }

    /// Every class and function gets its name before any body is generated
    fn assign_names(&mut self) {
        let program = self.program;

        for c in program.classes.iter() {
            let name = self.unique(c.ty.base_name());
            self.class_names.insert(c.ty.clone(), name);
        }

        for f in program.functions.iter() {
            let name = self.unique(&f.display_name);
            self.fn_names.insert(f.key.clone(), name);
        }
    }

    fn fn_name(&self, key: &FnKey) -> CompileResult<&str> {
        self.fn_names.get(key).map(|s| s.as_str()).ok_or_else(|| {
            CompileError::new(
                ErrorKind::NoMatchingFunction,
                format!("{key} is called but was never instantiated"),
            )
        })
    }

    fn tag(&mut self, context: &str, span: Span) -> usize {
        let uri = self.sources.uri(span.file).to_owned();
        self.tags.tag(context, &uri, span.line)
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// Generates the whole output text
    pub fn generate(&mut self) -> CompileResult<String> {
        self.assign_names();
        let program = self.program;

        let main = match &program.main {
            Some(m) => self.fn_name(m)?.to_owned(),
            None => {
                return Err(CompileError::new(
                    ErrorKind::NoMatchingFunction,
                    "the program has no main function",
                ))
            }
        };

        let mut out = String::new();
        let _ = writeln!(out, "// ttc output");

        if self.emit_type_comments {
            for c in program.classes.iter() {
                let _ = writeln!(out, "// class {} => {}", c.ty, self.class_names[&c.ty]);
            }
            for f in program.functions.iter() {
                let _ = writeln!(out, "// fn {} {} => {}", f.key, f.returns, self.fn_names[&f.key]);
            }
        }

        out.push('\n');
        out.push_str(RUNTIME);
        out.push('\n');

        for c in program.classes.iter() {
            let descriptor = if c.is_native {
                serde_json::json!({ "name": c.ty.to_string(), "native": true })
            } else {
                let attributes = c.attributes.iter().map(|(n, _)| n.clone()).collect_vec();
                serde_json::json!({ "name": c.ty.to_string(), "attributes": attributes })
            };

            let _ = writeln!(
                out,
                "const {} = Object.freeze({descriptor});",
                self.class_names[&c.ty]
            );
        }

        out.push('\n');
        out.push_str(&self.globals()?);
        out.push('\n');

        for f in program.functions.iter() {
            debug!("generating {}", f.key);
            out.push_str(&self.function(f)?);
            out.push_str("\n\n");
        }

        let mut entry = vec![GLOBALS_FN.to_owned()];
        for s in program.statics.iter() {
            entry.push(self.fn_name(s)?.to_owned());
        }

        let _ = writeln!(out, "$rt.tags = {};", self.tags.to_json());
        let _ = writeln!(
            out,
            "$rt.run([{}], {main}, {});",
            entry.join(", "),
            program.main_is_async
        );

        debug!(
            "generated {} bytes with {} tags",
            out.len(),
            self.tags.len()
        );

        Ok(out)
    }

    /// Global names are hoisted; their initializers run first thing in `$rt.run`
    fn globals(&mut self) -> CompileResult<String> {
        let program = self.program;
        let mut out = String::new();

        let names = program
            .globals
            .iter()
            .filter_map(|g| match &g.kind {
                TypedStmtKind::Decl { name, .. } => Some(js_ident(name)),
                _ => None,
            })
            .collect_vec();

        if !names.is_empty() {
            let _ = writeln!(out, "let {};", names.join(", "));
        }

        let mut enc = FunctionEncoder::new(self, GLOBAL_CONTEXT.to_owned());
        let mut lines = Vec::new();

        for g in program.globals.iter() {
            match &g.kind {
                TypedStmtKind::Decl { name, value, .. } => {
                    let v = enc.expr(value)?;
                    lines.push(enc.tagged(g.span, format!("{} = {v};", js_ident(name))));
                }
                _ => lines.push(enc.stmt(g)?),
            }
        }

        let _ = writeln!(out, "function {GLOBALS_FN}() {}", block(&lines.join("\n")));
        Ok(out)
    }

    fn function(&mut self, f: &InstantiatedFunction) -> CompileResult<String> {
        let name = self.fn_name(&f.key)?.to_owned();

        let source_params = f
            .runtime_params()
            .map(|(i, p)| (i, p.name.as_deref()))
            .collect_vec();
        let vararg = f.vararg.as_ref().map(|v| v.name.as_deref());

        let (params, body) = match &f.body {
            // native code refers to its parameters by their source names
            InstantiatedBody::Native(code) => {
                let mut params = source_params
                    .iter()
                    .map(|&(i, p)| p.map(js_ident).unwrap_or_else(|| format!("$a{i}")))
                    .collect_vec();
                if let Some(v) = vararg {
                    params.push(format!("...{}", v.map(js_ident).unwrap_or_else(|| "$rest".to_owned())));
                }

                (params, native::native_body(f, code)?)
            }
            InstantiatedBody::Block(stmts) => {
                let mut enc = FunctionEncoder::new(self, f.display_name.clone());

                let mut params = source_params
                    .iter()
                    .map(|&(i, p)| p.map(|n| enc.bind(n)).unwrap_or_else(|| format!("$a{i}")))
                    .collect_vec();
                if let Some(v) = vararg {
                    let n = v.map(|n| enc.bind(n)).unwrap_or_else(|| "$rest".to_owned());
                    params.push(format!("...{n}"));
                }

                let body = enc.block(stmts)?;

                let body = if f.is_async {
                    format!("return $rt.async(function* () {});", block(&body))
                } else {
                    body
                };

                (params, body)
            }
        };

        Ok(format!(
            "function {name}({}) {}",
            params.join(", "),
            block(body.trim())
        ))
    }
}

/// Emission state for one function body
struct FunctionEncoder<'g, 'a> {
    gen: &'g mut Generator<'a>,

    /// What tags attribute statements to
    context: String,

    autos: usize,

    /// Locals in scope, innermost frame last, each mapped to its emitted name
    locals: Vec<HashMap<String, String>>,
    renamed: usize,
}

impl<'g, 'a> FunctionEncoder<'g, 'a> {
    fn new(gen: &'g mut Generator<'a>, context: String) -> Self {
        FunctionEncoder {
            gen,
            context,
            autos: 0,
            locals: vec![HashMap::new()],
            renamed: 0,
        }
    }

    /// Names a new local in the innermost frame.
    ///
    /// A local that shadows a visible name gets a fresh name, since a JS `let`
    /// would put the outer binding in its temporal dead zone for the whole
    /// block, initializer included.
    fn bind(&mut self, name: &str) -> String {
        let shadows = self.locals.iter().any(|f| f.contains_key(name)) || self.gen.global_names.contains(name);

        let js = if shadows {
            self.renamed += 1;
            format!("{}$${}", js_ident(name), self.renamed)
        } else {
            js_ident(name)
        };

        if let Some(frame) = self.locals.last_mut() {
            frame.insert(name.to_owned(), js.clone());
        }
        js
    }

    /// The emitted name of a visible variable
    fn local(&self, name: &str) -> String {
        self.locals
            .iter()
            .rev()
            .find_map(|f| f.get(name).cloned())
            .unwrap_or_else(|| js_ident(name))
    }

    fn enter(&mut self) {
        self.locals.push(HashMap::new());
    }

    fn leave(&mut self) {
        self.locals.pop();
    }

    fn tag(&mut self, span: Span) -> usize {
        let context = self.context.clone();
        self.gen.tag(&context, span)
    }

    /// Brackets `code` with a push and pop of the statement's tag
    fn tagged(&mut self, span: Span, code: String) -> String {
        let t = self.tag(span);
        format!("$rt.stack.push({t}); {code} $rt.stack.pop();")
    }

    /// A statement list. The first `auto` splits it: everything from there on
    /// runs in a `try` whose `finally` deletes each initialized auto in the
    /// order they were declared.
    fn block(&mut self, stmts: &[TypedStmt]) -> CompileResult<String> {
        self.enter();
        let body = self.block_in_frame(stmts);
        self.leave();
        body
    }

    fn block_in_frame(&mut self, stmts: &[TypedStmt]) -> CompileResult<String> {
        let mut lines = Vec::with_capacity(stmts.len());

        for (i, s) in stmts.iter().enumerate() {
            if matches!(s.kind, TypedStmtKind::Decl { kind: DeclKind::Auto, .. }) {
                let guard = format!("$auto{}", self.autos);
                self.autos += 1;

                let rest = self.guarded(&guard, &stmts[i..])?;

                lines.push(format!("const {guard} = [];"));
                lines.push(format!(
                    "try {} finally {}",
                    block(&rest),
                    block(&format!("for (const $d of {guard}) $d();"))
                ));
                break;
            }

            lines.push(self.stmt(s)?);
        }

        Ok(lines.join("\n"))
    }

    /// The statements inside an auto's `try`, where every auto registers its cleanup on `guard`
    fn guarded(&mut self, guard: &str, stmts: &[TypedStmt]) -> CompileResult<String> {
        let mut lines = Vec::with_capacity(stmts.len());

        for s in stmts {
            match &s.kind {
                TypedStmtKind::Decl {
                    kind: DeclKind::Auto,
                    name,
                    value,
                    delete: Some(delete),
                    ..
                } => {
                    let v = self.expr(value)?;
                    let name = self.bind(name);
                    let t = self.tag(s.span);
                    let delete = self.gen.fn_name(delete)?.to_owned();

                    lines.push(format!(
                        "$rt.stack.push({t}); const {name} = {v}; $rt.stack.pop();"
                    ));
                    lines.push(format!(
                        "{guard}.push(() => {{ $rt.stack.push({t}); {delete}({name}); $rt.stack.pop(); }});"
                    ));
                }
                _ => lines.push(self.stmt(s)?),
            }
        }

        Ok(lines.join("\n"))
    }

    /// A statement inside a `for (..)` header: no tag, no semicolon
    fn header(&mut self, s: &TypedStmt) -> CompileResult<String> {
        match &s.kind {
            TypedStmtKind::Decl {
                kind, name, value, ..
            } => {
                let kw = if kind.is_final() { "const" } else { "let" };
                let value = self.expr(value)?;
                Ok(format!("{kw} {} = {value}", self.bind(name)))
            }
            TypedStmtKind::Assign { target, value } => {
                let target = self.target(target)?;
                Ok(format!("{target} = {}", self.expr(value)?))
            }
            TypedStmtKind::Expr(e) => self.expr(e),
            _ => Err(CompileError::new(
                ErrorKind::Syntax,
                "only declarations, assignments and expressions can appear in a for header",
            )
            .at(s.span)),
        }
    }

    fn target(&mut self, t: &AssignTarget) -> CompileResult<String> {
        match t {
            AssignTarget::Var(n) => Ok(self.local(n)),
            AssignTarget::Attribute { owner, name } => Ok(format!("{}.{name}", self.expr(owner)?)),
        }
    }

    fn stmt(&mut self, s: &TypedStmt) -> CompileResult<String> {
        let code = match &s.kind {
            TypedStmtKind::Expr(e) => {
                let e = self.expr(e)?;
                self.tagged(s.span, format!("{e};"))
            }
            TypedStmtKind::Decl { .. } | TypedStmtKind::Assign { .. } => {
                let h = self.header(s)?;
                self.tagged(s.span, format!("{h};"))
            }
            TypedStmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.expr(cond)?;
                let then = self.block(then)?;

                if otherwise.is_empty() {
                    format!("if ({cond}) {}", block(&then))
                } else {
                    let otherwise = self.block(otherwise)?;
                    format!("if ({cond}) {} else {}", block(&then), block(&otherwise))
                }
            }
            TypedStmtKind::While { cond, body } => {
                let cond = self.expr(cond)?;
                format!("while ({cond}) {}", block(&self.block(body)?))
            }
            TypedStmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.enter();
                let init = match init {
                    Some(i) => self.header(i)?,
                    None => String::new(),
                };
                let cond = match cond {
                    Some(c) => self.expr(c)?,
                    None => String::new(),
                };
                let step = match step {
                    Some(s) => self.header(s)?,
                    None => String::new(),
                };

                let body = self.block(body)?;
                self.leave();

                format!("for ({init}; {cond}; {step}) {}", block(&body))
            }
            TypedStmtKind::Return(None) => "return;".to_owned(),
            TypedStmtKind::Return(Some(e)) => {
                let e = self.expr(e)?;
                let t = self.tag(s.span);
                format!("{{ $rt.stack.push({t}); const $r = {e}; $rt.stack.pop(); return $r; }}")
            }
            TypedStmtKind::Break => "break;".to_owned(),
            TypedStmtKind::Continue => "continue;".to_owned(),
            TypedStmtKind::Block(b) => block(&self.block(b)?),
        };

        Ok(code)
    }

    fn expr(&mut self, e: &TypedExpr) -> CompileResult<String> {
        let code = match &e.kind {
            TypedExprKind::Int(v) => v.to_string(),
            TypedExprKind::Float(v) => format!("{v:?}"),
            TypedExprKind::Str(v) => serde_json::Value::from(v.as_str()).to_string(),
            TypedExprKind::Bool(v) => v.to_string(),
            TypedExprKind::Var(n) => self.local(n),

            TypedExprKind::Call { target, args } => {
                let name = self.gen.fn_name(target)?.to_owned();
                let args = args
                    .iter()
                    .map(|a| match a {
                        TypedArg::Value(v) => self.expr(v),
                        TypedArg::Spread { name, .. } => Ok(format!("...{}", self.local(name))),
                    })
                    .collect::<CompileResult<Vec<_>>>()?;

                format!("{name}({})", args.join(", "))
            }

            TypedExprKind::CallLambda { name, args } => {
                let args = self.exprs(args)?;
                format!("{}({})", self.local(name), args.join(", "))
            }

            TypedExprKind::Malloc { attributes, .. } => {
                let fields = attributes
                    .iter()
                    .map(|(n, v)| Ok(format!("{}: {}", js_key(n), self.expr(v)?)))
                    .collect::<CompileResult<Vec<_>>>()?;

                format!("({{ {} }})", fields.join(", "))
            }

            TypedExprKind::Attribute { owner, name } => format!("{}.{name}", self.expr(owner)?),

            TypedExprKind::Logical { op, lhs, rhs } => {
                format!("({} {op} {})", self.expr(lhs)?, self.expr(rhs)?)
            }

            TypedExprKind::List(items) => format!("[{}]", self.exprs(items)?.join(", ")),

            TypedExprKind::Lambda { params, body } => {
                self.enter();
                let params = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| match p {
                        Some(n) => self.bind(n),
                        None => format!("$a{i}"),
                    })
                    .join(", ");
                let body = self.block(body)?;
                self.leave();

                format!("(({params}) => {})", block(&body))
            }

            TypedExprKind::Await(inner) => format!("(yield {})", self.expr(inner)?),

            TypedExprKind::IntToFloat(inner) => self.expr(inner)?,
        };

        Ok(code)
    }

    fn exprs(&mut self, es: &[TypedExpr]) -> CompileResult<Vec<String>> {
        es.iter().map(|e| self.expr(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_mangled() {
        assert_eq!(js_ident("new"), "new$");
        assert_eq!(js_ident("Object"), "Object$");
        assert_eq!(js_ident("count"), "count");
    }

    #[test]
    fn proto_is_an_own_field() {
        assert_eq!(js_key("x"), "x");
        assert_eq!(js_key("__proto__"), r#"["__proto__"]"#);
    }

    #[test]
    fn blocks_indent_their_body() {
        assert_eq!(block("a;\nb;"), "{\n    a;\n    b;\n}");
        assert_eq!(block(""), "{\n}");
    }
}
