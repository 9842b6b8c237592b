use super::{ArgTemplate, Span, TypeTemplate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum DeclKind {
    #[strum(serialize = "let")]
    Let,
    #[strum(serialize = "final")]
    Final,
    #[strum(serialize = "auto")]
    Auto,
}

impl DeclKind {
    /// `auto` bindings are final as well
    pub fn is_final(self) -> bool {
        !matches!(self, DeclKind::Let)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum LogicalOp {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

#[derive(Clone, Debug)]
pub struct ExprTemplate {
    pub span: Span,
    pub inner: ExprTemplateInner,
}

#[derive(Clone, Debug)]
pub struct CallArgTemplate {
    pub value: ExprTemplate,

    /// `rest...`
    pub spread: bool,
}

#[derive(Clone, Debug)]
pub enum ExprTemplateInner {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),

    Name(String),

    /// A type written where an expression is expected: the first argument
    /// of `malloc`, or a `:symbol` tag
    Type(TypeTemplate),

    /// Operators and `recv.name(..)` are already desugared into calls here
    Call {
        callee: String,
        args: Vec<CallArgTemplate>,
    },

    Attribute {
        owner: Box<ExprTemplate>,
        name: String,
    },

    Logical {
        op: LogicalOp,
        lhs: Box<ExprTemplate>,
        rhs: Box<ExprTemplate>,
    },

    List(Vec<ExprTemplate>),

    Lambda {
        args: Vec<ArgTemplate>,
        returns: TypeTemplate,
        body: Vec<StmtTemplate>,
    },

    Await(Box<ExprTemplate>),
}

#[derive(Clone, Debug)]
pub struct StmtTemplate {
    pub span: Span,
    pub inner: StmtTemplateInner,
}

#[derive(Clone, Debug)]
pub enum StmtTemplateInner {
    Expr(ExprTemplate),

    Decl {
        kind: DeclKind,
        name: String,
        ty: Option<TypeTemplate>,
        value: ExprTemplate,
    },

    /// `target = value`, where target is a name or an attribute
    Assign {
        target: ExprTemplate,
        value: ExprTemplate,
    },

    If {
        cond: ExprTemplate,
        then: Vec<StmtTemplate>,
        otherwise: Option<Vec<StmtTemplate>>,
    },

    While {
        cond: ExprTemplate,
        body: Vec<StmtTemplate>,
    },

    For {
        init: Option<Box<StmtTemplate>>,
        cond: Option<ExprTemplate>,
        step: Option<Box<StmtTemplate>>,
        body: Vec<StmtTemplate>,
    },

    /// `for (name in iterable)`; desugared during resolution onto `iter`/`hasNext`/`next`
    ForIn {
        name: String,
        iterable: ExprTemplate,
        body: Vec<StmtTemplate>,
    },

    Return(Option<ExprTemplate>),
    Break,
    Continue,

    Block(Vec<StmtTemplate>),
}
