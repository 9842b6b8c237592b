use crate::{
    cst::{CallArgTemplate, ExprTemplate, ExprTemplateInner, LogicalOp, Span, TypeTemplate},
    errors::CompileResult,
    lex::{unescape, Token},
};

use super::Parser;

/// Binary operators that resolve through ordinary overloading
#[derive(Clone, Copy, Debug, strum_macros::IntoStaticStr)]
enum OverloadedOp {
    #[strum(serialize = "__add__")]
    Add,
    #[strum(serialize = "__sub__")]
    Sub,
    #[strum(serialize = "__mul__")]
    Mul,
    #[strum(serialize = "__div__")]
    Div,
    #[strum(serialize = "__mod__")]
    Mod,
    #[strum(serialize = "__eq__")]
    Eq,
    #[strum(serialize = "__ne__")]
    Ne,
    #[strum(serialize = "__lt__")]
    Lt,
    #[strum(serialize = "__le__")]
    Le,
    #[strum(serialize = "__gt__")]
    Gt,
    #[strum(serialize = "__ge__")]
    Ge,
}

impl OverloadedOp {
    fn from_token(t: Token) -> Option<(OverloadedOp, u8)> {
        let r = match t {
            Token::CmpEqual => (OverloadedOp::Eq, 3),
            Token::CmpNotEqual => (OverloadedOp::Ne, 3),
            Token::CmpLessThan => (OverloadedOp::Lt, 4),
            Token::CmpLessThanOrEqual => (OverloadedOp::Le, 4),
            Token::CmpGreaterThan => (OverloadedOp::Gt, 4),
            Token::CmpGreaterThanOrEqual => (OverloadedOp::Ge, 4),
            Token::Plus => (OverloadedOp::Add, 5),
            Token::Dash => (OverloadedOp::Sub, 5),
            Token::Asterisk => (OverloadedOp::Mul, 6),
            Token::FSlash => (OverloadedOp::Div, 6),
            Token::Modulo => (OverloadedOp::Mod, 6),
            _ => return None,
        };

        Some(r)
    }
}

fn call(span: Span, callee: &str, args: Vec<ExprTemplate>) -> ExprTemplate {
    ExprTemplate {
        span,
        inner: ExprTemplateInner::Call {
            callee: callee.to_owned(),
            args: args
                .into_iter()
                .map(|value| CallArgTemplate {
                    value,
                    spread: false,
                })
                .collect(),
        },
    }
}

impl<'ids> Parser<'ids> {
    pub fn parse_expr(&mut self) -> CompileResult<ExprTemplate> {
        self.parse_binary(1)
    }

    /// Precedence climbing. `||` binds loosest at 1, `&&` at 2, and the
    /// overloadable operators take 3 through 6
    fn parse_binary(&mut self, min_prec: u8) -> CompileResult<ExprTemplate> {
        let mut lhs = self.parse_unary()?;

        loop {
            let next = match self.t.peek() {
                Some(t) => t,
                None => break,
            };

            let prec = match next {
                Token::LogicalOr => 1,
                Token::LogicalAnd => 2,
                other => match OverloadedOp::from_token(other) {
                    Some((_, p)) => p,
                    None => break,
                },
            };

            if prec < min_prec {
                break;
            }

            self.t.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span.to(rhs.span);

            lhs = match next {
                Token::LogicalOr | Token::LogicalAnd => ExprTemplate {
                    span,
                    inner: ExprTemplateInner::Logical {
                        op: if next == Token::LogicalOr {
                            LogicalOp::Or
                        } else {
                            LogicalOp::And
                        },
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                },
                other => match OverloadedOp::from_token(other) {
                    Some((op, _)) => {
                        let callee: &'static str = op.into();
                        call(span, callee, vec![lhs, rhs])
                    }
                    None => break,
                },
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> CompileResult<ExprTemplate> {
        let start = self.t.here();

        if self.t.try_take(Token::Dash).is_some() {
            let inner = self.parse_unary()?;
            return Ok(call(start.to(inner.span), "__neg__", vec![inner]));
        }

        if self.t.try_take(Token::Bang).is_some() {
            let inner = self.parse_unary()?;
            return Ok(call(start.to(inner.span), "__not__", vec![inner]));
        }

        if self.t.try_take(Token::Await).is_some() {
            let inner = self.parse_unary()?;
            return Ok(ExprTemplate {
                span: start.to(inner.span),
                inner: ExprTemplateInner::Await(Box::new(inner)),
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<ExprTemplate> {
        let mut e = self.parse_primary()?;

        while self.t.try_take(Token::Dot).is_some() {
            let name = self.t.take(Token::Identifier, "after `.`")?;

            if self.t.at(Token::LParen) {
                // recv.name(args) is name(recv, args)
                let mut args = vec![CallArgTemplate {
                    value: e,
                    spread: false,
                }];
                args.extend(self.parse_call_args()?);

                let span = args[0].value.span.to(self.t.prev());
                e = ExprTemplate {
                    span,
                    inner: ExprTemplateInner::Call {
                        callee: name.slice,
                        args,
                    },
                };
            } else {
                e = ExprTemplate {
                    span: e.span.to(name.span),
                    inner: ExprTemplateInner::Attribute {
                        owner: Box::new(e),
                        name: name.slice,
                    },
                };
            }
        }

        Ok(e)
    }

    fn parse_call_args(&mut self) -> CompileResult<Vec<CallArgTemplate>> {
        self.t.take(Token::LParen, "to open an argument list")?;
        let mut args = Vec::new();

        while !self.t.at(Token::RParen) {
            let value = self.parse_expr()?;
            let spread = self.t.try_take(Token::Ellipsis).is_some();

            args.push(CallArgTemplate { value, spread });

            if self.t.try_take(Token::Comma).is_none() {
                break;
            }
        }

        self.t.take(Token::RParen, "to close an argument list")?;

        Ok(args)
    }

    fn parse_primary(&mut self) -> CompileResult<ExprTemplate> {
        let tw = self.t.take_in(
            &[
                Token::IntegerLiteral,
                Token::FloatLiteral,
                Token::StringLiteral,
                Token::True,
                Token::False,
                Token::LParen,
                Token::LBracket,
                Token::Function,
                Token::TypeVariable,
                Token::Symbol,
                Token::Identifier,
            ],
            "while parsing an expression",
        )?;

        let span = tw.span;
        let inner = match tw.token {
            Token::IntegerLiteral => match tw.slice.parse::<i64>() {
                Ok(v) => ExprTemplateInner::Int(v),
                Err(_) => return self.err(span, format!("integer literal {} is out of range", tw.slice)),
            },
            Token::FloatLiteral => match tw.slice.parse::<f64>() {
                Ok(v) if v.is_finite() => ExprTemplateInner::Float(v),
                Ok(_) => return self.err(span, format!("float literal {} is out of range", tw.slice)),
                Err(_) => return self.err(span, format!("bad float literal {}", tw.slice)),
            },
            Token::StringLiteral => ExprTemplateInner::Str(unescape(&tw.slice)),
            Token::True => ExprTemplateInner::Bool(true),
            Token::False => ExprTemplateInner::Bool(false),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.t.take(Token::RParen, "to close a parenthesized expression")?;
                return Ok(inner);
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while !self.t.at(Token::RBracket) {
                    items.push(self.parse_expr()?);
                    if self.t.try_take(Token::Comma).is_none() {
                        break;
                    }
                }
                self.t.take(Token::RBracket, "to close a list literal")?;
                ExprTemplateInner::List(items)
            }
            Token::Function => return self.parse_lambda(span),
            Token::TypeVariable => ExprTemplateInner::Type(TypeTemplate::Variable(tw.slice[1..].to_owned())),
            Token::Symbol => ExprTemplateInner::Type(TypeTemplate::Symbol(tw.slice[1..].to_owned())),
            _ => {
                if self.t.at(Token::LParen) {
                    let args = self.parse_call_args()?;
                    ExprTemplateInner::Call {
                        callee: tw.slice,
                        args,
                    }
                } else if self.t.at(Token::LBracket) {
                    ExprTemplateInner::Type(self.parse_type_after_name(tw.slice)?)
                } else {
                    ExprTemplateInner::Name(tw.slice)
                }
            }
        };

        Ok(ExprTemplate {
            span: span.to(self.t.prev()),
            inner,
        })
    }

    /// `fn(Int x) Int { ... }` in expression position
    fn parse_lambda(&mut self, start: Span) -> CompileResult<ExprTemplate> {
        let (args, vararg) = self.parse_args()?;
        if vararg.is_some() {
            return self.err(start, "lambdas cannot take a vararg");
        }

        let returns = if self.at_type() {
            self.parse_type()?
        } else {
            TypeTemplate::named("Void")
        };

        let body = self.parse_block()?;

        Ok(ExprTemplate {
            span: start.to(self.t.prev()),
            inner: ExprTemplateInner::Lambda {
                args,
                returns,
                body,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        compile::file_tree::SourceRegistry,
        cst::{ExprTemplate, ExprTemplateInner, LogicalOp},
        parse::Parser,
    };

    fn parse(src: &str) -> ExprTemplate {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", src);
        let mut ids = 0;
        let mut p = Parser::new(reg.get(id).unwrap(), &mut ids).unwrap();
        p.parse_expr().unwrap()
    }

    fn callee(e: &ExprTemplate) -> &str {
        match &e.inner {
            ExprTemplateInner::Call { callee, .. } => callee,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[test]
    fn precedence_desugars_to_calls() {
        let e = parse("1 + 2 * 3");
        assert_eq!(callee(&e), "__add__");

        match &e.inner {
            ExprTemplateInner::Call { args, .. } => assert_eq!(callee(&args[1].value), "__mul__"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn logical_binds_loosest() {
        let e = parse("a < b && !c || d");
        match &e.inner {
            ExprTemplateInner::Logical { op, lhs, .. } => {
                assert_eq!(*op, LogicalOp::Or);
                assert!(matches!(
                    lhs.inner,
                    ExprTemplateInner::Logical {
                        op: LogicalOp::And,
                        ..
                    }
                ));
            }
            other => panic!("expected ||, got {other:?}"),
        }
    }

    #[test]
    fn method_syntax_is_a_call() {
        let e = parse("xs.push(1)");
        match &e.inner {
            ExprTemplateInner::Call { callee, args } => {
                assert_eq!(callee, "push");
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[0].value.inner, ExprTemplateInner::Name(n) if n == "xs"));
            }
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[test]
    fn malloc_takes_a_type() {
        let e = parse("malloc(Pair[Int, $T], 1, x)");
        match &e.inner {
            ExprTemplateInner::Call { args, .. } => {
                assert!(matches!(args[0].value.inner, ExprTemplateInner::Type(_)));
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[test]
    fn float_literals_must_be_finite() {
        let huge = format!("{}.0", "9".repeat(400));

        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", &huge);
        let mut ids = 0;
        let mut p = Parser::new(reg.get(id).unwrap(), &mut ids).unwrap();
        let e = p.parse_expr().unwrap_err();

        assert!(e.message.contains("out of range"), "{}", e.message);
        assert!(matches!(parse("2.5").inner, ExprTemplateInner::Float(v) if v == 2.5));
    }

    #[test]
    fn spread_arguments() {
        let e = parse("g(first, rest...)");
        match &e.inner {
            ExprTemplateInner::Call { args, .. } => {
                assert!(!args[0].spread);
                assert!(args[1].spread);
            }
            other => panic!("expected a call, got {other:?}"),
        }
    }
}
