use std::fmt::{Display, Formatter};

use itertools::Itertools;

/// A fully resolved type.
///
/// Equality is structural; two types are the same type iff they serialize
/// to the same string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    /// A nominal type such as `Int`
    Typename(String),

    /// A compile-time tag type such as `:name`.
    /// Never inhabited at runtime and never instantiated as a class
    Symbol(String),

    /// A parameterized type such as `List[Int]`
    Template(String, Vec<Type>),
}

impl Type {
    pub fn named(name: &str) -> Type {
        Type::Typename(name.to_owned())
    }

    pub fn void() -> Type {
        Type::named("Void")
    }

    pub fn bool() -> Type {
        Type::named("Bool")
    }

    pub fn int() -> Type {
        Type::named("Int")
    }

    pub fn float() -> Type {
        Type::named("Float")
    }

    pub fn string() -> Type {
        Type::named("String")
    }

    pub fn list(of: Type) -> Type {
        Type::Template("List".to_owned(), vec![of])
    }

    pub fn promise(of: Type) -> Type {
        Type::Template("Promise".to_owned(), vec![of])
    }

    /// `Lambda[Ret, Arg0, Arg1, ...]`
    pub fn lambda(returns: Type, args: Vec<Type>) -> Type {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(returns);
        all.extend(args);

        Type::Template("Lambda".to_owned(), all)
    }

    /// The base name: `List` for `List[Int]`, `name` for `:name`
    pub fn base_name(&self) -> &str {
        match self {
            Type::Typename(n) | Type::Symbol(n) | Type::Template(n, _) => n.as_str(),
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Type::Symbol(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Typename(n) if n == "Void")
    }

    /// If this is `Promise[T]`, returns `T`
    pub fn promised(&self) -> Option<&Type> {
        match self {
            Type::Template(n, args) if n == "Promise" && args.len() == 1 => args.first(),
            _ => None,
        }
    }

    /// If this is `Lambda[R, A...]`, returns `(R, [A...])`
    pub fn as_lambda(&self) -> Option<(&Type, &[Type])> {
        match self {
            Type::Template(n, args) if n == "Lambda" && !args.is_empty() => {
                Some((&args[0], &args[1..]))
            }
            _ => None,
        }
    }

    /// Canonical string key
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Typename(n) => write!(f, "{n}"),
            Type::Symbol(n) => write!(f, ":{n}"),
            Type::Template(n, args) => write!(f, "{n}[{}]", args.iter().join(", ")),
        }
    }
}

/// Serializes an argument list the way signatures are keyed: `Int, List[Int]`
pub fn serialize_list(types: &[Type]) -> String {
    types.iter().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_nested_types() {
        let t = Type::Template(
            "Map".to_owned(),
            vec![Type::string(), Type::list(Type::int())],
        );

        assert_eq!(t.serialize(), "Map[String, List[Int]]");
        assert_eq!(Type::Symbol("x".to_owned()).serialize(), ":x");
    }

    #[test]
    fn lambda_shape() {
        let l = Type::lambda(Type::bool(), vec![Type::int(), Type::string()]);
        let (r, a) = l.as_lambda().unwrap();

        assert_eq!(r, &Type::bool());
        assert_eq!(a, &[Type::int(), Type::string()]);
        assert!(Type::int().as_lambda().is_none());
    }

    #[test]
    fn promise_unwraps() {
        assert_eq!(Type::promise(Type::int()).promised(), Some(&Type::int()));
        assert_eq!(Type::list(Type::int()).promised(), None);
    }
}
