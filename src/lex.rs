use logos::{Filter, Lexer, Logos};

use crate::{
    compile::file_tree::SourceFile,
    cst::Span,
    errors::{CompileError, CompileResult, ErrorKind},
};

#[derive(Logos, Debug, PartialEq, Eq, Hash, Clone, Copy, strum_macros::Display)]
pub enum Token {
    #[token("fn")]
    Function,

    #[token("class")]
    Class,

    #[token("native")]
    Native,

    #[token("abstract")]
    Abstract,

    #[token("async")]
    Async,

    #[token("await")]
    Await,

    #[token("static")]
    Static,

    #[token("let")]
    Let,

    #[token("final")]
    Final,

    #[token("auto")]
    Auto,

    #[token("if")]
    If,

    #[token("else")]
    Else,

    #[token("while")]
    While,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[token("return")]
    Return,

    #[token("break")]
    Break,

    #[token("continue")]
    Continue,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token(";")]
    Semicolon,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token("...")]
    Ellipsis,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("=")]
    Equals,

    #[token("==")]
    CmpEqual,

    #[token("!=")]
    CmpNotEqual,

    #[token("<")]
    CmpLessThan,

    #[token("<=")]
    CmpLessThanOrEqual,

    #[token(">")]
    CmpGreaterThan,

    #[token(">=")]
    CmpGreaterThanOrEqual,

    #[token("+")]
    Plus,

    #[token("-")]
    Dash,

    #[token("*")]
    Asterisk,

    #[token("/")]
    FSlash,

    #[token("%")]
    Modulo,

    #[token("&&")]
    LogicalAnd,

    #[token("||")]
    LogicalOr,

    #[token("!")]
    Bang,

    #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    /// `$T`
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*")]
    TypeVariable,

    /// `:name`
    #[regex(":[a-zA-Z_][a-zA-Z0-9_]*")]
    Symbol,

    #[regex("[0-9]+")]
    IntegerLiteral,

    #[regex(r"[0-9]+\.[0-9]+")]
    FloatLiteral,

    #[regex(r#""([^"\\]|\\.)*""#)]
    StringLiteral,

    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    #[token("/*", block_comment)]
    #[error]
    Error,
}

/// Skips to the closing `*/`. An unterminated comment swallows the rest of the
/// file and comes out as an error token
fn block_comment(lex: &mut Lexer<Token>) -> Filter<()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            Filter::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            Filter::Emit(())
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TokenWrapper {
    pub token: Token,
    pub slice: String,
    pub span: Span,
}

/// Lexes a whole file, failing on the first character that isn't part of any token
pub fn lex(file: &SourceFile) -> CompileResult<Vec<TokenWrapper>> {
    let mut lexer = Token::lexer(file.contents());
    let mut out = Vec::new();

    while let Some(token) = lexer.next() {
        let range = lexer.span();
        let (line, col) = file.location(range.start);

        let span = Span {
            file: file.id(),
            start: range.start,
            end: range.end,
            line,
            col,
        };

        if token == Token::Error {
            let msg = if lexer.slice().starts_with("/*") {
                "unterminated block comment".to_owned()
            } else {
                format!("unknown token `{}`", lexer.slice())
            };

            return Err(CompileError::new(ErrorKind::Lex, msg).at(span));
        }

        out.push(TokenWrapper {
            token,
            slice: lexer.slice().to_owned(),
            span,
        });
    }

    Ok(out)
}

/// Strips the quotes from a string literal and processes its escapes
pub fn unescape(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::file_tree::SourceRegistry;

    fn tokens(src: &str) -> Vec<Token> {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", src);
        lex(reg.get(id).unwrap())
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn string_literal() {
        let pstring = "\"test string literal with keywords like fn class and \\n\"";
        let mut lex = Token::lexer(pstring);
        let t = lex.next();
        assert!(matches!(t, Some(Token::StringLiteral)));
        assert_eq!(lex.slice(), pstring);
        assert!(matches!(lex.next(), None));
        assert_eq!(
            unescape(pstring),
            "test string literal with keywords like fn class and \n"
        );
    }

    #[test]
    fn type_syntax() {
        assert_eq!(
            tokens("fn id($T x) List[$R...] // trailing"),
            vec![
                Token::Function,
                Token::Identifier,
                Token::LParen,
                Token::TypeVariable,
                Token::Identifier,
                Token::RParen,
                Token::Identifier,
                Token::LBracket,
                Token::TypeVariable,
                Token::Ellipsis,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn symbols_and_numbers() {
        assert_eq!(
            tokens("getattr(p, :x) 1.5 /* skip */ 42"),
            vec![
                Token::Identifier,
                Token::LParen,
                Token::Identifier,
                Token::Comma,
                Token::Symbol,
                Token::RParen,
                Token::FloatLiteral,
                Token::IntegerLiteral,
            ]
        );
    }

    #[test]
    fn block_comments_span_lines() {
        assert_eq!(
            tokens("a /* one * two\n ** three */ b /**/ c /* x */"),
            vec![Token::Identifier, Token::Identifier, Token::Identifier]
        );

        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", "let x = 1; /* never closed");
        let e = lex(reg.get(id).unwrap()).unwrap_err();

        assert_eq!(e.kind, ErrorKind::Lex);
        assert!(e.message.contains("unterminated"), "{}", e.message);
    }

    #[test]
    fn spans_carry_lines() {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", "let x = 1;\n  foo();");
        let toks = lex(reg.get(id).unwrap()).unwrap();
        let foo = toks.iter().find(|t| t.slice == "foo").unwrap();

        assert_eq!((foo.span.line, foo.span.col), (2, 3));
    }

    #[test]
    fn unknown_character_is_an_error() {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", "let x = @;");
        let e = lex(reg.get(id).unwrap()).unwrap_err();

        assert_eq!(e.kind, ErrorKind::Lex);
        assert_eq!(e.span.map(|s| s.col), Some(9));
    }
}
