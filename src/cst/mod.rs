//! Unexpanded templates, as handed to the instantiation engine by the parser.
//!
//! Everything in here is immutable once parsed; instantiation only ever reads it.

pub mod declarations;
pub mod expressions;
pub mod types;

use std::collections::HashMap;

pub use declarations::*;
pub use expressions::*;
pub use types::*;

use tracing::debug;

use crate::{
    compile::file_tree::FileId,
    errors::{CompileError, CompileResult, ErrorKind},
};

/// Location of a node, with the line/column precomputed by the lexer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub file: FileId,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    /// Used by nodes the compiler synthesizes itself
    pub const BUILTIN: Span = Span {
        file: usize::MAX,
        start: 0,
        end: 0,
        line: 0,
        col: 0,
    };

    pub fn is_builtin(&self) -> bool {
        self.file == usize::MAX
    }

    /// From the start of `self` to the end of `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            end: other.end.max(self.end),
            ..self
        }
    }
}

/// Everything one source file declares
#[derive(Clone, Debug, Default)]
pub struct UnexpandedModule {
    pub file: FileId,
    pub functions: Vec<FunctionTemplate>,
    pub classes: Vec<ClassTemplate>,
    pub declarations: Vec<StmtTemplate>,
}

/// The merged, flat namespace of every module in a compilation
#[derive(Clone, Debug, Default)]
pub struct TemplateSet {
    pub functions: Vec<FunctionTemplate>,
    pub classes: Vec<ClassTemplate>,
    pub declarations: Vec<StmtTemplate>,

    functions_by_name: HashMap<String, Vec<usize>>,
    classes_by_name: HashMap<String, Vec<usize>>,
}

impl TemplateSet {
    /// Merges modules in order and rejects duplicate function or class
    /// definitions across all of them, before anything is instantiated
    pub fn merge(modules: Vec<UnexpandedModule>) -> CompileResult<TemplateSet> {
        let mut set = TemplateSet::default();

        for m in modules {
            set.functions.extend(m.functions);
            set.classes.extend(m.classes);
            set.declarations.extend(m.declarations);
        }

        set.check_duplicates()?;

        for (i, f) in set.functions.iter().enumerate() {
            set.functions_by_name
                .entry(f.name.clone())
                .or_default()
                .push(i);
        }

        for (i, c) in set.classes.iter().enumerate() {
            set.classes_by_name
                .entry(c.pattern.base_name().to_owned())
                .or_default()
                .push(i);
        }

        debug!(
            "merged {} function templates, {} class templates, {} top level declarations",
            set.functions.len(),
            set.classes.len(),
            set.declarations.len()
        );

        Ok(set)
    }

    fn check_duplicates(&self) -> CompileResult<()> {
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (i, f) in self.functions.iter().enumerate() {
            if f.is_static {
                continue;
            }

            if let Some(&prev) = seen.get(&f.canonical_signature()) {
                let first = &self.functions[prev];
                return Err(CompileError::new(
                    ErrorKind::DuplicateDefinition,
                    format!(
                        "function {} is defined twice (first definition at line {})",
                        f.display_signature(),
                        first.span.line
                    ),
                )
                .at(f.span));
            }

            seen.insert(f.canonical_signature(), i);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();

        for (i, c) in self.classes.iter().enumerate() {
            let key = c.pattern.canonical();

            if let Some(&prev) = seen.get(&key) {
                let first = &self.classes[prev];
                return Err(CompileError::new(
                    ErrorKind::DuplicateDefinition,
                    format!(
                        "class {} is defined twice (first definition at line {})",
                        c.pattern,
                        first.span.line
                    ),
                )
                .at(c.span));
            }

            seen.insert(key, i);
        }

        Ok(())
    }

    pub fn functions_named(&self, name: &str) -> &[usize] {
        self.functions_by_name
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn classes_named(&self, name: &str) -> &[usize] {
        self.classes_by_name
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Static blocks in declaration order
    pub fn statics(&self) -> impl Iterator<Item = &FunctionTemplate> {
        self.functions.iter().filter(|f| f.is_static)
    }
}
