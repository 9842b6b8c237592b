use std::fmt::Write;

use colored::*;

use crate::{compile::file_tree::SourceRegistry, cst::Span};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::IntoStaticStr)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
pub enum ErrorKind {
    #[strum(serialize = "lex error")]
    Lex,
    #[strum(serialize = "syntax error")]
    Syntax,
    #[strum(serialize = "duplicate definition")]
    DuplicateDefinition,
    #[strum(serialize = "unresolved type")]
    UnresolvedType,
    #[strum(serialize = "no matching function")]
    NoMatchingFunction,
    #[strum(serialize = "no matching class")]
    NoMatchingClass,
    #[strum(serialize = "malloc shadowed")]
    MallocShadowed,
    #[strum(serialize = "type error")]
    TypeMismatch,
    #[strum(serialize = "scope error")]
    Scope,
    #[strum(serialize = "capture error")]
    Capture,
    #[strum(serialize = "return error")]
    Return,
    #[strum(serialize = "instantiation depth exceeded")]
    InstantiationDepth,
    #[strum(serialize = "native body error")]
    Native,
}

/// One step of the demand chain that led to a failing instantiation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstantiationFrame {
    pub site: Option<Span>,
    pub description: String,

    /// The template family this frame instantiates, like `fn grow` or `class Box`
    pub origin: Option<String>,
}

/// Any compile-time failure. The first one aborts the whole run.
///
/// An error that carries frames is an instantiation error: it happened while
/// expanding a template, and the frames say which demand chain got there.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
    pub frames: Vec<InstantiationFrame>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            message: message.into(),
            span: None,
            frames: Vec::new(),
        }
    }

    /// Attaches a location, unless a more precise one is already present
    pub fn at(mut self, span: Span) -> CompileError {
        if self.span.is_none() && !span.is_builtin() {
            self.span = Some(span);
        }
        self
    }

    /// Attaches the instantiation chain. The innermost chain wins, so
    /// an error bubbling through several instantiations keeps its first frames
    pub fn with_frames(mut self, frames: Vec<InstantiationFrame>) -> CompileError {
        if self.frames.is_empty() {
            self.frames = frames;
        }
        self
    }

    pub fn is_instantiation_error(&self) -> bool {
        !self.frames.is_empty()
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

macro_rules! bail {
    ($kind:ident, $span:expr, $($fmt:tt)+) => {
        return Err($crate::errors::CompileError::new(
            $crate::errors::ErrorKind::$kind,
            format!($($fmt)+),
        )
        .at($span))
    };
}

pub(crate) use bail;

pub struct ErrorPrinter<'a> {
    sources: &'a SourceRegistry,
}

impl<'a> ErrorPrinter<'a> {
    pub fn new(sources: &'a SourceRegistry) -> ErrorPrinter<'a> {
        ErrorPrinter { sources }
    }

    pub fn render(&self, e: &CompileError) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "{}: {}",
            e.kind.to_string().bold().bright_red(),
            e.message.bold().bright_yellow()
        );

        if let Some(span) = e.span {
            self.print_context(&mut out, span);
        }

        for frame in e.frames.iter() {
            let _ = writeln!(
                out,
                "   {} {}",
                ">".bright_blue().bold(),
                frame.description.bright_yellow()
            );

            if let Some(site) = frame.site {
                self.print_context(&mut out, site);
            }
        }

        self.print_bar(&mut out);
        out
    }

    pub fn print_context(&self, out: &mut String, span: Span) {
        let file = match self.sources.get(span.file) {
            Some(f) => f,
            None => return,
        };

        let filename = file.uri().bold();
        let _ = writeln!(
            out,
            "  {} {filename}:{}:{}",
            "-->".blue().bold(),
            span.line,
            span.col
        );

        let line = file.line(span.line).unwrap_or("");
        let pad = span.line.to_string().len() + 1;

        let _ = writeln!(out, " {:pad$} |", "");
        let _ = writeln!(out, " {:<pad$} | {}", span.line, line);

        let width = (span.end.saturating_sub(span.start))
            .min(line.len().saturating_sub(span.col - 1))
            .max(1);

        let _ = writeln!(
            out,
            " {:pad$} | {}{}",
            "",
            " ".repeat(span.col - 1),
            "^".repeat(width).bright_red()
        );
    }

    pub fn print_bar(&self, out: &mut String) {
        let w = term_size::dimensions().map(|(w, _)| w).unwrap_or(40);
        let _ = writeln!(out, "{}", "―".repeat(w).cyan());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_line_and_caret() {
        colored::control::set_override(false);

        let mut sources = SourceRegistry::new();
        let file = sources.add("main.tt", "fn main() {\n  nope(1);\n}\n");

        let e = CompileError::new(ErrorKind::NoMatchingFunction, "no function matches nope(Int)")
            .at(Span {
                file,
                start: 14,
                end: 18,
                line: 2,
                col: 3,
            })
            .with_frames(vec![InstantiationFrame {
                site: None,
                description: "while instantiating main()".to_owned(),
                origin: Some("fn main".to_owned()),
            }]);

        let text = ErrorPrinter::new(&sources).render(&e);

        assert!(text.contains("no matching function: no function matches nope(Int)"));
        assert!(text.contains("main.tt:2:3"));
        assert!(text.contains("  nope(1);"));
        assert!(text.contains("   ^^^^"));
        assert!(text.contains("while instantiating main()"));
        assert!(e.is_instantiation_error());
    }

    #[test]
    fn every_kind_has_its_own_name() {
        use std::collections::HashSet;
        use strum::IntoEnumIterator;

        let names: HashSet<&'static str> = ErrorKind::iter().map(|k| k.into()).collect();
        assert_eq!(names.len(), ErrorKind::iter().count());
    }
}
