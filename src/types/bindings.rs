use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use super::Type;

/// Identifies one `Or[...]` template. Assigned by the parser from a counter
/// shared by every module of a compilation, so it is stable and comparable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrId(pub u32);

/// What a key in a substitution map is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bound {
    /// `$T` => `Int`
    One(Type),

    /// `...R` => `[Int, String]`, captured by a vararg
    Group(Vec<Type>),
}

/// A substitution map built while matching templates against concrete types.
///
/// Plain variables are keyed by their name (`T` for `$T`), vararg groups by
/// `...name`. The `or` map records which branch each `Or` template chose, since
/// that choice has to stay fixed for the rest of the instantiation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    vars: BTreeMap<String, Bound>,
    or: BTreeMap<OrId, usize>,
}

pub fn group_key(name: &str) -> String {
    format!("...{name}")
}

impl Bindings {
    pub fn new() -> Bindings {
        Bindings::default()
    }

    pub fn get(&self, var: &str) -> Option<&Type> {
        match self.vars.get(var) {
            Some(Bound::One(t)) => Some(t),
            _ => None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&[Type]> {
        match self.vars.get(&group_key(name)) {
            Some(Bound::Group(g)) => Some(g.as_slice()),
            _ => None,
        }
    }

    /// Binds `$var` to `ty`, or checks it against the existing binding.
    /// Returns false on conflict, in which case nothing changed
    pub fn bind_var(&mut self, var: &str, ty: &Type) -> bool {
        match self.vars.get(var) {
            Some(Bound::One(existing)) => existing == ty,
            Some(Bound::Group(_)) => false,
            None => {
                self.vars.insert(var.to_owned(), Bound::One(ty.clone()));
                true
            }
        }
    }

    /// Binds the vararg group `...name`; a pre-existing group must be pointwise equal
    pub fn bind_group(&mut self, name: &str, tys: &[Type]) -> bool {
        let key = group_key(name);

        match self.vars.get(&key) {
            Some(Bound::Group(existing)) => existing.as_slice() == tys,
            Some(Bound::One(_)) => false,
            None => {
                self.vars.insert(key, Bound::Group(tys.to_vec()));
                true
            }
        }
    }

    pub fn or_choice(&self, id: OrId) -> Option<usize> {
        self.or.get(&id).copied()
    }

    pub fn choose_or(&mut self, id: OrId, branch: usize) {
        self.or.insert(id, branch);
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|k| k.as_str())
    }
}

impl Display for Bindings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let vars = self.vars.iter().map(|(k, v)| match v {
            Bound::One(t) => format!("${k} = {t}"),
            Bound::Group(g) => format!("{k} = [{}]", g.iter().join(", ")),
        });

        let ors = self.or.iter().map(|(id, b)| format!("|or#{} = {b}", id.0));

        write!(f, "{{{}}}", vars.chain(ors).join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_bind_consistently() {
        let mut b = Bindings::new();

        assert!(b.bind_var("T", &Type::int()));
        assert!(b.bind_var("T", &Type::int()));
        assert!(!b.bind_var("T", &Type::string()));
        assert_eq!(b.get("T"), Some(&Type::int()));
    }

    #[test]
    fn groups_never_overwrite() {
        let mut b = Bindings::new();

        assert!(b.bind_group("R", &[Type::int(), Type::bool()]));
        assert!(!b.bind_group("R", &[Type::int()]));
        assert_eq!(b.group("R"), Some(&[Type::int(), Type::bool()][..]));
        assert!(b.get("...R").is_none());
    }

    #[test]
    fn displays_choices() {
        let mut b = Bindings::new();
        b.bind_var("T", &Type::int());
        b.choose_or(OrId(3), 1);

        assert_eq!(b.to_string(), "{$T = Int, |or#3 = 1}");
    }
}
