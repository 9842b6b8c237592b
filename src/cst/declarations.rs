use std::collections::BTreeMap;

use itertools::Itertools;

use super::{Span, StmtTemplate, TypeTemplate};

#[derive(Clone, Debug)]
pub struct ArgTemplate {
    pub name: Option<String>,
    pub ty: TypeTemplate,
    pub is_final: bool,
}

/// `$Rest... rest`: captures every remaining argument type as a group
#[derive(Clone, Debug)]
pub struct VarargTemplate {
    pub name: Option<String>,
    pub type_name: String,
}

#[derive(Clone, Debug)]
pub enum FunctionBody {
    Block(Vec<StmtTemplate>),

    /// Opaque target code; may start with the `#meta` marker
    Native(String),
}

#[derive(Clone, Debug)]
pub struct FunctionTemplate {
    pub span: Span,
    pub name: String,
    pub args: Vec<ArgTemplate>,
    pub vararg: Option<VarargTemplate>,
    pub returns: TypeTemplate,

    pub is_native: bool,
    pub is_async: bool,
    pub is_static: bool,

    pub body: FunctionBody,

    /// The argument list as one synthetic `fn[...]` template, which is what
    /// overloads are matched and compared by
    pub signature: TypeTemplate,
}

impl FunctionTemplate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        span: Span,
        name: String,
        args: Vec<ArgTemplate>,
        vararg: Option<VarargTemplate>,
        returns: TypeTemplate,
        is_native: bool,
        is_async: bool,
        is_static: bool,
        body: FunctionBody,
    ) -> FunctionTemplate {
        let signature = TypeTemplate::Template {
            name: "fn".to_owned(),
            args: args.iter().map(|a| Box::new(a.ty.clone())).collect(),
            vararg: vararg.as_ref().map(|v| v.type_name.clone()),
        };

        FunctionTemplate {
            span,
            name,
            args,
            vararg,
            returns,
            is_native,
            is_async,
            is_static,
            body,
            signature,
        }
    }

    /// Key used by the upfront duplicate check
    pub fn canonical_signature(&self) -> String {
        let mut names = BTreeMap::new();
        format!("{}{}", self.name, self.signature.canonical_into(&mut names))
    }

    /// `id($T)`, for messages
    pub fn display_signature(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|a| a.ty.to_string())
            .chain(self.vararg.iter().map(|v| format!("${}...", v.type_name)));

        format!("{}({})", self.name, args.format(", "))
    }
}

#[derive(Clone, Debug)]
pub struct AttributeTemplate {
    pub span: Span,
    pub name: String,
    pub ty: TypeTemplate,
}

#[derive(Clone, Debug)]
pub struct ClassTemplate {
    pub span: Span,

    /// The class's own name, possibly with free variables: `Pair[$A, $B]`
    pub pattern: TypeTemplate,

    pub is_native: bool,
    pub is_abstract: bool,

    pub attributes: Vec<AttributeTemplate>,
}
