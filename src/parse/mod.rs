mod parse_base;
mod parse_expr;
mod parse_type;

use itertools::Itertools;
use tracing::debug;

use crate::{
    compile::file_tree::{FileId, SourceFile},
    cst::{Span, UnexpandedModule},
    errors::{CompileError, CompileResult, ErrorKind},
    lex::{lex, Token, TokenWrapper},
};

/// A cursor over the tokens of one file
pub struct TokenProvider {
    tokens: Vec<TokenWrapper>,
    index: usize,
    eof: Span,
}

impl TokenProvider {
    pub fn new(tokens: Vec<TokenWrapper>, eof: Span) -> TokenProvider {
        TokenProvider {
            tokens,
            index: 0,
            eof,
        }
    }

    /// Looks ahead `offset` tokens without consuming
    pub fn la(&self, offset: usize) -> Option<&TokenWrapper> {
        self.tokens.get(self.index + offset)
    }

    pub fn peek(&self) -> Option<Token> {
        self.la(0).map(|t| t.token)
    }

    pub fn at(&self, t: Token) -> bool {
        self.peek() == Some(t)
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    /// Span of the next token, or of the end of the file
    pub fn here(&self) -> Span {
        self.la(0).map(|t| t.span).unwrap_or(self.eof)
    }

    /// Span of the last consumed token
    pub fn prev(&self) -> Span {
        self.index
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or(self.eof)
    }

    pub fn advance(&mut self) -> Option<TokenWrapper> {
        let t = self.tokens.get(self.index).cloned();
        if t.is_some() {
            self.index += 1;
        }
        t
    }

    pub fn try_take(&mut self, t: Token) -> Option<TokenWrapper> {
        if self.at(t) {
            self.advance()
        } else {
            None
        }
    }

    pub fn take(&mut self, t: Token, context: &str) -> CompileResult<TokenWrapper> {
        self.take_in(&[t], context)
    }

    pub fn take_in(&mut self, ts: &[Token], context: &str) -> CompileResult<TokenWrapper> {
        if let Some(tw) = self.la(0) {
            if !ts.contains(&tw.token) {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    format!(
                        "unexpected token `{}` {context}, expected one of: {}",
                        tw.slice,
                        ts.iter().join(", ")
                    ),
                )
                .at(tw.span));
            }
        }

        self.advance().ok_or_else(|| {
            CompileError::new(
                ErrorKind::Syntax,
                format!("unexpected end of file {context}"),
            )
            .at(self.eof)
        })
    }
}

pub struct Parser<'ids> {
    t: TokenProvider,
    file: FileId,

    /// Shared by every module of a compilation so `Or` ids stay unique
    or_ids: &'ids mut u32,

    statics: usize,
}

impl<'ids> Parser<'ids> {
    pub fn new(file: &SourceFile, or_ids: &'ids mut u32) -> CompileResult<Parser<'ids>> {
        let tokens = lex(file)?;
        let (line, col) = file.location(file.contents().len());
        let eof = Span {
            file: file.id(),
            start: file.contents().len(),
            end: file.contents().len(),
            line,
            col,
        };

        Ok(Parser {
            t: TokenProvider::new(tokens, eof),
            file: file.id(),
            or_ids,
            statics: 0,
        })
    }

    pub fn err<T>(&self, span: Span, msg: impl Into<String>) -> CompileResult<T> {
        Err(CompileError::new(ErrorKind::Syntax, msg).at(span))
    }
}

/// Parses one source file into its unexpanded templates
pub fn parse_module(file: &SourceFile, or_ids: &mut u32) -> CompileResult<UnexpandedModule> {
    let mut p = Parser::new(file, or_ids)?;
    let m = p.parse_module()?;

    debug!(
        "parsed {}: {} functions, {} classes, {} declarations",
        file.uri(),
        m.functions.len(),
        m.classes.len(),
        m.declarations.len()
    );

    Ok(m)
}
