//! Native function bodies and the `#meta` compile-time hook.
//!
//! A native body starting with `#meta` is a template over the instantiation it
//! belongs to. Placeholders in double braces are replaced before emission:
//!
//! - `{{arg N}}` the type of argument N
//! - `{{argc}}` the number of arguments
//! - `{{ret}}` the return type
//! - `{{name}}` the function's name
//!
//! Prefixing a placeholder with `json`, as in `{{json ret}}`, emits it as a
//! JSON string literal instead of raw text.

use crate::{
    errors::{CompileError, CompileResult, ErrorKind},
    mir::InstantiatedFunction,
    types::Type,
};

pub const META_MARKER: &str = "#meta";

/// What a meta body can see of the instantiation it is expanded for
#[derive(Clone, Debug)]
pub struct CompilationContext<'a> {
    pub name: &'a str,
    pub args: Vec<Type>,
    pub returns: &'a Type,
}

impl<'a> CompilationContext<'a> {
    pub fn for_function(f: &'a InstantiatedFunction) -> CompilationContext<'a> {
        CompilationContext {
            name: &f.key.name,
            args: f.key.args.clone(),
            returns: &f.returns,
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let mut words = key.split_whitespace();

        let value = match (words.next(), words.next(), words.next()) {
            (Some("arg"), Some(n), None) => self.args.get(n.parse::<usize>().ok()?)?.to_string(),
            (Some("argc"), None, None) => self.args.len().to_string(),
            (Some("ret"), None, None) => self.returns.to_string(),
            (Some("name"), None, None) => self.name.to_owned(),
            _ => return None,
        };

        Some(value)
    }

    /// Replaces every placeholder in `body`
    pub fn expand(&self, body: &str) -> CompileResult<String> {
        let mut out = String::with_capacity(body.len());
        let mut rest = body;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);

            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                CompileError::new(
                    ErrorKind::Native,
                    format!("unclosed placeholder in the meta body of {}", self.name),
                )
            })?;

            let key = after[..close].trim();
            let (json, key) = match key.strip_prefix("json ") {
                Some(k) => (true, k.trim()),
                None => (false, key),
            };

            let value = self.lookup(key).ok_or_else(|| {
                CompileError::new(
                    ErrorKind::Native,
                    format!("unknown placeholder {{{{{key}}}}} in the meta body of {}", self.name),
                )
            })?;

            if json {
                out.push_str(&serde_json::Value::from(value).to_string());
            } else {
                out.push_str(&value);
            }

            rest = &after[close + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// The code to emit for a native body, with `#meta` bodies expanded
pub fn native_body(f: &InstantiatedFunction, code: &str) -> CompileResult<String> {
    match code.trim_start().strip_prefix(META_MARKER) {
        Some(meta) => CompilationContext::for_function(f)
            .expand(meta.trim_start())
            .map_err(|e| e.at(f.span)),
        None => Ok(code.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(returns: &Type) -> CompilationContext<'_> {
        CompilationContext {
            name: "describe",
            args: vec![Type::list(Type::int()), Type::string()],
            returns,
        }
    }

    #[test]
    fn expands_placeholders() {
        let ret = Type::string();
        let out = ctx(&ret)
            .expand("return {{json arg 0}} + {{argc}}; // {{name}} -> {{ret}}")
            .unwrap();

        assert_eq!(out, r#"return "List[Int]" + 2; // describe -> String"#);
    }

    #[test]
    fn rejects_unknown_placeholders() {
        let ret = Type::void();

        let e = ctx(&ret).expand("{{arg 7}}").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Native);
        assert!(ctx(&ret).expand("{{ret").is_err());
    }
}
