use crate::{
    cst::{
        ArgTemplate, AttributeTemplate, ClassTemplate, DeclKind, ExprTemplateInner, FunctionBody,
        FunctionTemplate, StmtTemplate, StmtTemplateInner, TypeTemplate, UnexpandedModule,
        VarargTemplate,
    },
    errors::CompileResult,
    lex::{unescape, Token},
};

use super::Parser;

impl<'ids> Parser<'ids> {
    pub fn parse_module(&mut self) -> CompileResult<UnexpandedModule> {
        let mut m = UnexpandedModule {
            file: self.file,
            ..Default::default()
        };

        while !self.t.at_end() {
            self.parse_outer(&mut m)?;
        }

        Ok(m)
    }

    fn parse_outer(&mut self, m: &mut UnexpandedModule) -> CompileResult<()> {
        let start = self.t.here();

        let is_native = self.t.try_take(Token::Native).is_some();
        let is_abstract = self.t.try_take(Token::Abstract).is_some();
        let is_async = self.t.try_take(Token::Async).is_some();

        match self.t.peek() {
            Some(Token::Function) if !is_abstract => {
                let f = self.parse_function(is_native, is_async)?;
                m.functions.push(f);
            }
            Some(Token::Class) if !is_async => {
                let c = self.parse_class(is_native, is_abstract)?;
                m.classes.push(c);
            }
            Some(Token::Static) if !(is_native || is_abstract || is_async) => {
                self.t.advance();
                let body = self.parse_block()?;
                let name = format!("static${}${}", self.file, self.statics);
                self.statics += 1;

                m.functions.push(FunctionTemplate::new(
                    start,
                    name,
                    Vec::new(),
                    None,
                    TypeTemplate::named("Void"),
                    false,
                    false,
                    true,
                    FunctionBody::Block(body),
                ));
            }
            Some(Token::Let | Token::Final) if !(is_native || is_abstract || is_async) => {
                let d = self.parse_statement()?;
                m.declarations.push(d);
            }
            Some(Token::Auto) => {
                return self.err(start, "auto declarations are not allowed at the top level");
            }
            _ => {
                self.t.take_in(
                    &[Token::Function, Token::Class, Token::Static, Token::Let, Token::Final],
                    "at the top level",
                )?;
                return self.err(start, "misplaced modifier before a declaration");
            }
        }

        Ok(())
    }

    /// `(final Int a, $T b, $Rest... rest)`
    pub fn parse_args(&mut self) -> CompileResult<(Vec<ArgTemplate>, Option<VarargTemplate>)> {
        self.t.take(Token::LParen, "to open a parameter list")?;

        let mut args = Vec::new();
        let mut vararg = None;

        while !self.t.at(Token::RParen) {
            if vararg.is_some() {
                return self.err(self.t.here(), "a vararg parameter must come last");
            }

            let is_final = self.t.try_take(Token::Final).is_some();

            let is_vararg = self.t.at(Token::TypeVariable)
                && self.t.la(1).map(|t| t.token) == Some(Token::Ellipsis);

            if is_vararg {
                let tv = self.t.take(Token::TypeVariable, "in a vararg parameter")?;
                self.t.take(Token::Ellipsis, "in a vararg parameter")?;
                let name = self.t.try_take(Token::Identifier).map(|t| t.slice);

                vararg = Some(VarargTemplate {
                    name,
                    type_name: tv.slice[1..].to_owned(),
                });
            } else {
                let ty = self.parse_type()?;
                let name = self.t.try_take(Token::Identifier).map(|t| t.slice);

                args.push(ArgTemplate { name, ty, is_final });
            }

            if self.t.try_take(Token::Comma).is_none() {
                break;
            }
        }

        self.t.take(Token::RParen, "to close a parameter list")?;

        Ok((args, vararg))
    }

    fn parse_function(&mut self, is_native: bool, is_async: bool) -> CompileResult<FunctionTemplate> {
        let start = self.t.take(Token::Function, "to start a function")?.span;
        let name = self.t.take(Token::Identifier, "as a function name")?.slice;
        let (args, vararg) = self.parse_args()?;

        let returns = if self.at_type() {
            self.parse_type()?
        } else {
            TypeTemplate::named("Void")
        };

        let body = if is_native {
            self.t.take(Token::Equals, "before a native body")?;
            let code = self.t.take(Token::StringLiteral, "as a native body")?;
            self.t.take(Token::Semicolon, "after a native body")?;
            FunctionBody::Native(unescape(&code.slice))
        } else {
            FunctionBody::Block(self.parse_block()?)
        };

        if is_native && is_async {
            return self.err(start, "native functions cannot be async; return a Promise instead");
        }

        Ok(FunctionTemplate::new(
            start, name, args, vararg, returns, is_native, is_async, false, body,
        ))
    }

    fn parse_class(&mut self, is_native: bool, is_abstract: bool) -> CompileResult<ClassTemplate> {
        let start = self.t.take(Token::Class, "to start a class")?.span;
        let pattern = self.parse_type()?;

        if !matches!(
            pattern,
            TypeTemplate::Typename(_) | TypeTemplate::Template { .. }
        ) {
            return self.err(start, format!("{pattern} cannot name a class"));
        }

        let mut attributes = Vec::new();

        if self.t.try_take(Token::Semicolon).is_none() {
            self.t.take(Token::LBrace, "to open a class body")?;

            while self.t.try_take(Token::RBrace).is_none() {
                let attr_start = self.t.take(Token::Let, "to declare an attribute")?.span;
                let name = self.t.take(Token::Identifier, "as an attribute name")?.slice;
                let ty = self.parse_type()?;
                self.t.take(Token::Semicolon, "after an attribute")?;

                if attributes.iter().any(|a: &AttributeTemplate| a.name == name) {
                    return self.err(attr_start, format!("attribute {name} is declared twice"));
                }

                attributes.push(AttributeTemplate {
                    span: attr_start,
                    name,
                    ty,
                });
            }
        }

        Ok(ClassTemplate {
            span: start,
            pattern,
            is_native,
            is_abstract,
            attributes,
        })
    }

    pub fn parse_block(&mut self) -> CompileResult<Vec<StmtTemplate>> {
        self.t.take(Token::LBrace, "to open a block")?;
        let mut stmts = Vec::new();

        while self.t.try_take(Token::RBrace).is_none() {
            stmts.push(self.parse_statement()?);
        }

        Ok(stmts)
    }

    pub fn parse_statement(&mut self) -> CompileResult<StmtTemplate> {
        let start = self.t.here();

        let inner = match self.t.peek() {
            Some(Token::Let | Token::Final | Token::Auto) => {
                let d = self.parse_declaration()?;
                self.t.take(Token::Semicolon, "after a declaration")?;
                d
            }
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.t.advance();
                self.t.take(Token::LParen, "after while")?;
                let cond = self.parse_expr()?;
                self.t.take(Token::RParen, "after a while condition")?;
                let body = self.parse_block()?;

                StmtTemplateInner::While { cond, body }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Return) => {
                self.t.advance();
                let value = if self.t.at(Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.t.take(Token::Semicolon, "after return")?;

                StmtTemplateInner::Return(value)
            }
            Some(Token::Break) => {
                self.t.advance();
                self.t.take(Token::Semicolon, "after break")?;
                StmtTemplateInner::Break
            }
            Some(Token::Continue) => {
                self.t.advance();
                self.t.take(Token::Semicolon, "after continue")?;
                StmtTemplateInner::Continue
            }
            Some(Token::LBrace) => StmtTemplateInner::Block(self.parse_block()?),
            _ => {
                let s = self.parse_simple()?;
                self.t.take(Token::Semicolon, "after a statement")?;
                s
            }
        };

        Ok(StmtTemplate {
            span: start.to(self.t.prev()),
            inner,
        })
    }

    /// `let x [Type] = value`, without the semicolon
    fn parse_declaration(&mut self) -> CompileResult<StmtTemplateInner> {
        let kw = self
            .t
            .take_in(&[Token::Let, Token::Final, Token::Auto], "to start a declaration")?;

        let kind = match kw.token {
            Token::Let => DeclKind::Let,
            Token::Final => DeclKind::Final,
            _ => DeclKind::Auto,
        };

        let name = self.t.take(Token::Identifier, "as a variable name")?.slice;

        let ty = if self.t.at(Token::Equals) {
            None
        } else {
            Some(self.parse_type()?)
        };

        if !self.t.at(Token::Equals) {
            return self.err(
                self.t.here(),
                format!("{name} must be initialized where it is declared"),
            );
        }
        self.t.advance();

        let value = self.parse_expr()?;

        Ok(StmtTemplateInner::Decl {
            kind,
            name,
            ty,
            value,
        })
    }

    /// An expression or an assignment, without the semicolon
    fn parse_simple(&mut self) -> CompileResult<StmtTemplateInner> {
        let e = self.parse_expr()?;

        if self.t.try_take(Token::Equals).is_none() {
            return Ok(StmtTemplateInner::Expr(e));
        }

        if !matches!(
            e.inner,
            ExprTemplateInner::Name(_) | ExprTemplateInner::Attribute { .. }
        ) {
            return self.err(e.span, "only names and attributes can be assigned to");
        }

        let value = self.parse_expr()?;

        Ok(StmtTemplateInner::Assign { target: e, value })
    }

    fn parse_if(&mut self) -> CompileResult<StmtTemplateInner> {
        self.t.take(Token::If, "to start an if")?;
        self.t.take(Token::LParen, "after if")?;
        let cond = self.parse_expr()?;
        self.t.take(Token::RParen, "after an if condition")?;
        let then = self.parse_block()?;

        let otherwise = if self.t.try_take(Token::Else).is_some() {
            if self.t.at(Token::If) {
                let start = self.t.here();
                let nested = self.parse_if()?;
                Some(vec![StmtTemplate {
                    span: start.to(self.t.prev()),
                    inner: nested,
                }])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Ok(StmtTemplateInner::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> CompileResult<StmtTemplateInner> {
        self.t.take(Token::For, "to start a for")?;
        self.t.take(Token::LParen, "after for")?;

        let is_for_in = self.t.at(Token::Identifier)
            && self.t.la(1).map(|t| t.token) == Some(Token::In);

        if is_for_in {
            let name = self.t.take(Token::Identifier, "as a loop variable")?.slice;
            self.t.take(Token::In, "in a for-in loop")?;
            let iterable = self.parse_expr()?;
            self.t.take(Token::RParen, "after a for-in header")?;
            let body = self.parse_block()?;

            return Ok(StmtTemplateInner::ForIn {
                name,
                iterable,
                body,
            });
        }

        let init = if self.t.at(Token::Semicolon) {
            None
        } else {
            let start = self.t.here();
            let inner = match self.t.peek() {
                Some(Token::Let | Token::Final | Token::Auto) => self.parse_declaration()?,
                _ => self.parse_simple()?,
            };
            Some(Box::new(StmtTemplate {
                span: start.to(self.t.prev()),
                inner,
            }))
        };
        self.t.take(Token::Semicolon, "after a for initializer")?;

        let cond = if self.t.at(Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.t.take(Token::Semicolon, "after a for condition")?;

        let step = if self.t.at(Token::RParen) {
            None
        } else {
            let start = self.t.here();
            let inner = self.parse_simple()?;
            Some(Box::new(StmtTemplate {
                span: start.to(self.t.prev()),
                inner,
            }))
        };
        self.t.take(Token::RParen, "after a for header")?;

        let body = self.parse_block()?;

        Ok(StmtTemplateInner::For {
            init,
            cond,
            step,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{
        compile::file_tree::SourceRegistry,
        cst::{FunctionBody, StmtTemplateInner, TypeTemplate, UnexpandedModule},
        errors::ErrorKind,
        parse::parse_module,
    };

    fn parse(src: &str) -> UnexpandedModule {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", src);
        let mut ids = 0;
        parse_module(reg.get(id).unwrap(), &mut ids).unwrap()
    }

    #[test]
    fn functions_and_classes() {
        let m = parse(indoc! {r#"
            class Point { let x Int; let y Int; }
            native class List[$T];
            fn id($T x) $T { return x; }
            native fn len(List[$T] xs) Int = "return xs.length;";
            async fn fetch(final Int id, $R... rest) Int { return id; }
        "#});

        assert_eq!(m.classes.len(), 2);
        assert_eq!(m.classes[0].attributes.len(), 2);
        assert!(m.classes[1].is_native);

        assert_eq!(m.functions.len(), 3);
        assert_eq!(m.functions[0].display_signature(), "id($T)");
        assert_eq!(m.functions[0].returns, TypeTemplate::var("T"));
        assert!(matches!(&m.functions[1].body, FunctionBody::Native(s) if s == "return xs.length;"));

        let fetch = &m.functions[2];
        assert!(fetch.is_async);
        assert!(fetch.args[0].is_final);
        assert_eq!(fetch.vararg.as_ref().map(|v| v.type_name.as_str()), Some("R"));
        assert_eq!(fetch.display_signature(), "fetch(Int, $R...)");
    }

    #[test]
    fn statics_and_declarations() {
        let m = parse(indoc! {"
            let counter = 0;
            static { counter = 1; }
            static { counter = 2; }
        "});

        assert_eq!(m.declarations.len(), 1);
        let statics: Vec<_> = m.functions.iter().filter(|f| f.is_static).collect();
        assert_eq!(statics.len(), 2);
        assert_ne!(statics[0].name, statics[1].name);
    }

    #[test]
    fn loops() {
        let m = parse(indoc! {"
            fn main() {
                for (let i = 0; i < 3; i = i + 1) { }
                for (x in xs) { print(x); }
                while (true) { break; }
            }
        "});

        let body = match &m.functions[0].body {
            FunctionBody::Block(b) => b,
            _ => unreachable!(),
        };

        assert!(matches!(
            &body[0].inner,
            StmtTemplateInner::For {
                init: Some(_),
                cond: Some(_),
                step: Some(_),
                ..
            }
        ));
        assert!(matches!(&body[1].inner, StmtTemplateInner::ForIn { name, .. } if name == "x"));
        assert!(matches!(&body[2].inner, StmtTemplateInner::While { .. }));
    }

    #[test]
    fn declarations_must_be_initialized() {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", "fn main() { let x Int; }");
        let mut ids = 0;
        let e = parse_module(reg.get(id).unwrap(), &mut ids).unwrap_err();

        assert_eq!(e.kind, ErrorKind::Syntax);
        assert!(e.message.contains("must be initialized"));
    }
}
