use std::fmt::{Display, Formatter};

use crate::{
    cst::Span,
    types::{serialize_list, Type},
};

use super::expressions::TypedStmt;

/// A concrete function instantiation: a name and the argument types it was demanded with
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FnKey {
    pub name: String,
    pub args: Vec<Type>,
}

impl FnKey {
    pub fn new(name: &str, args: Vec<Type>) -> FnKey {
        FnKey {
            name: name.to_owned(),
            args,
        }
    }

    /// Canonical string key, e.g. `id(Int)`
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl Display for FnKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, serialize_list(&self.args))
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    /// Unnamed parameters still take a slot at runtime
    pub name: Option<String>,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct VarargParam {
    pub name: Option<String>,
    pub types: Vec<Type>,
}

#[derive(Clone, Debug)]
pub enum InstantiatedBody {
    Block(Vec<TypedStmt>),
    Native(String),
}

#[derive(Clone, Debug)]
pub struct InstantiatedFunction {
    pub key: FnKey,

    /// What traces and generated names call this function
    pub display_name: String,

    pub span: Span,

    /// Declared return type, already wrapped in `Promise` for async functions
    pub returns: Type,

    pub params: Vec<Param>,
    pub vararg: Option<VarargParam>,

    pub is_async: bool,
    pub is_static: bool,

    pub body: InstantiatedBody,
}

impl InstantiatedFunction {
    /// Parameters that exist at runtime, in order; symbol-typed ones are compile-time only
    pub fn runtime_params(&self) -> impl Iterator<Item = (usize, &Param)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.ty.is_symbol())
    }
}

#[derive(Clone, Debug)]
pub struct InstantiatedClass {
    pub ty: Type,
    pub span: Span,
    pub is_native: bool,
    pub is_abstract: bool,

    /// In declaration order
    pub attributes: Vec<(String, Type)>,
}

/// The whole instantiated program, everything reachable from the seeds
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// In instantiation order
    pub functions: Vec<InstantiatedFunction>,

    /// In instantiation order
    pub classes: Vec<InstantiatedClass>,

    /// Top level declarations, initialized before any static block runs
    pub globals: Vec<TypedStmt>,

    /// Static blocks in declaration order
    pub statics: Vec<FnKey>,

    pub main: Option<FnKey>,
    pub main_is_async: bool,
}

impl Program {
    pub fn function(&self, key: &FnKey) -> Option<&InstantiatedFunction> {
        self.functions.iter().find(|f| &f.key == key)
    }

    pub fn class(&self, ty: &Type) -> Option<&InstantiatedClass> {
        self.classes.iter().find(|c| &c.ty == ty)
    }

    /// How many times `key` was instantiated; at most one for any key
    pub fn instantiation_count(&self, key: &FnKey) -> usize {
        self.functions.iter().filter(|f| &f.key == key).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_serialize_like_signatures() {
        let k = FnKey::new("id", vec![Type::list(Type::int()), Type::string()]);
        assert_eq!(k.serialize(), "id(List[Int], String)");
        assert_eq!(FnKey::new("main", vec![]).to_string(), "main()");
    }
}
