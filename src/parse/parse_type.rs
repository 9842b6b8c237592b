use crate::{
    cst::{TemplateArgs, TypeTemplate},
    errors::CompileResult,
    lex::Token,
    types::OrId,
};

use super::Parser;

impl<'ids> Parser<'ids> {
    /// True if the next token can start a type
    pub fn at_type(&self) -> bool {
        matches!(
            self.t.peek(),
            Some(Token::Identifier | Token::TypeVariable | Token::Symbol)
        )
    }

    pub fn parse_type(&mut self) -> CompileResult<TypeTemplate> {
        let tw = self.t.take_in(
            &[Token::Identifier, Token::TypeVariable, Token::Symbol],
            "while parsing a type",
        )?;

        match tw.token {
            Token::TypeVariable => Ok(TypeTemplate::Variable(tw.slice[1..].to_owned())),
            Token::Symbol => Ok(TypeTemplate::Symbol(tw.slice[1..].to_owned())),
            _ => self.parse_type_after_name(tw.slice),
        }
    }

    /// Continues a type whose leading identifier was already consumed
    pub fn parse_type_after_name(&mut self, name: String) -> CompileResult<TypeTemplate> {
        if self.t.try_take(Token::LBracket).is_none() {
            return Ok(TypeTemplate::Typename(name));
        }

        let start = self.t.prev();
        let mut args = TemplateArgs::new();
        let mut vararg = None;

        while !self.t.at(Token::RBracket) {
            if vararg.is_some() {
                return self.err(self.t.here(), "a vararg must be the last type argument");
            }

            let is_vararg = self.t.at(Token::TypeVariable)
                && self.t.la(1).map(|t| t.token) == Some(Token::Ellipsis);

            if is_vararg {
                let v = self.t.take(Token::TypeVariable, "in a vararg")?;
                self.t.take(Token::Ellipsis, "after a vararg")?;
                vararg = Some(v.slice[1..].to_owned());
            } else {
                args.push(Box::new(self.parse_type()?));
            }

            if self.t.try_take(Token::Comma).is_none() {
                break;
            }
        }

        self.t.take(Token::RBracket, "to close a type argument list")?;

        let combinator = name == "And" || name == "Or";

        if combinator && vararg.is_some() {
            return self.err(start, format!("{name}[...] does not take a vararg"));
        }
        if combinator && args.is_empty() {
            return self.err(start, format!("{name}[...] needs at least one member"));
        }

        if name == "And" {
            return Ok(TypeTemplate::And(args.into_iter().map(|a| *a).collect()));
        }

        if name == "Or" {
            let id = OrId(*self.or_ids);
            *self.or_ids += 1;

            return Ok(TypeTemplate::Or {
                id,
                options: args.into_iter().map(|a| *a).collect(),
            });
        }

        Ok(TypeTemplate::Template { name, args, vararg })
    }
}

#[cfg(test)]
mod tests {
    use crate::{compile::file_tree::SourceRegistry, cst::TypeTemplate, parse::Parser};

    fn parse(src: &str, ids: &mut u32) -> TypeTemplate {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", src);
        let mut p = Parser::new(reg.get(id).unwrap(), ids).unwrap();
        p.parse_type().unwrap()
    }

    #[test]
    fn round_trips_through_display() {
        let mut ids = 0;
        for src in ["Int", "$T", ":name", "List[$T]", "Tuple[Int, $R...]", "Map[String, List[$V]]"] {
            assert_eq!(parse(src, &mut ids).to_string(), src);
        }
    }

    #[test]
    fn or_ids_are_unique() {
        let mut ids = 0;
        let a = parse("Or[Int, String]", &mut ids);
        let b = parse("Or[Int, String]", &mut ids);

        match (a, b) {
            (TypeTemplate::Or { id: a, .. }, TypeTemplate::Or { id: b, .. }) => assert_ne!(a, b),
            other => panic!("expected two Or templates, got {other:?}"),
        }
        assert_eq!(ids, 2);
    }

    #[test]
    fn vararg_must_be_last() {
        let mut reg = SourceRegistry::new();
        let id = reg.add("t.tt", "Tuple[$R..., Int]");
        let mut ids = 0;
        let mut p = Parser::new(reg.get(id).unwrap(), &mut ids).unwrap();

        assert!(p.parse_type().is_err());
    }
}
