use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use smallvec::SmallVec;

use crate::{
    errors::{CompileError, CompileResult, ErrorKind},
    types::{Bindings, OrId, Type},
};

pub type TemplateArgs = SmallVec<[Box<TypeTemplate>; 2]>;

/// An unresolved type expression, possibly containing free variables
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeTemplate {
    /// `Int`
    Typename(String),

    /// `:name`
    Symbol(String),

    /// `List[$T]`, or `Tuple[Int, $Rest...]` when a vararg captures the tail
    Template {
        name: String,
        args: TemplateArgs,
        vararg: Option<String>,
    },

    /// `$T`
    Variable(String),

    /// `And[A, B]`: every member must bind
    And(Vec<TypeTemplate>),

    /// `Or[A, B]`: the first member that binds is chosen, and the choice is remembered
    Or { id: OrId, options: Vec<TypeTemplate> },
}

impl TypeTemplate {
    pub fn named(name: &str) -> TypeTemplate {
        TypeTemplate::Typename(name.to_owned())
    }

    pub fn var(name: &str) -> TypeTemplate {
        TypeTemplate::Variable(name.to_owned())
    }

    pub fn template(name: &str, args: Vec<TypeTemplate>, vararg: Option<&str>) -> TypeTemplate {
        TypeTemplate::Template {
            name: name.to_owned(),
            args: args.into_iter().map(Box::new).collect(),
            vararg: vararg.map(|v| v.to_owned()),
        }
    }

    pub fn base_name(&self) -> &str {
        match self {
            TypeTemplate::Typename(n)
            | TypeTemplate::Symbol(n)
            | TypeTemplate::Template { name: n, .. }
            | TypeTemplate::Variable(n) => n.as_str(),
            TypeTemplate::And(_) => "And",
            TypeTemplate::Or { .. } => "Or",
        }
    }

    /// Attempts to unify this template with `ty`, extending `bindings`.
    ///
    /// Returns `None` on mismatch; an existing binding is never overwritten
    /// by an incompatible value.
    pub fn bind(&self, ty: &Type, bindings: &Bindings) -> Option<Bindings> {
        match (self, ty) {
            (TypeTemplate::Typename(a), Type::Typename(b))
            | (TypeTemplate::Symbol(a), Type::Symbol(b)) => (a == b).then(|| bindings.clone()),

            (
                TypeTemplate::Template { name, args, vararg },
                Type::Template(tname, targs),
            ) => {
                if name != tname {
                    return None;
                }

                let explicit = match vararg {
                    Some(_) if targs.len() >= args.len() => args.len(),
                    None if targs.len() == args.len() => args.len(),
                    _ => return None,
                };

                let mut b = bindings.clone();
                for (a, t) in args.iter().zip(targs.iter()) {
                    b = a.bind(t, &b)?;
                }

                if let Some(v) = vararg {
                    if !b.bind_group(v, &targs[explicit..]) {
                        return None;
                    }
                }

                Some(b)
            }

            (TypeTemplate::Variable(v), _) => {
                let mut b = bindings.clone();
                b.bind_var(v, ty).then(|| b)
            }

            (TypeTemplate::And(members), _) => members
                .iter()
                .try_fold(bindings.clone(), |b, m| m.bind(ty, &b)),

            (TypeTemplate::Or { id, options }, _) => match bindings.or_choice(*id) {
                Some(chosen) => options.get(chosen)?.bind(ty, bindings),
                None => options.iter().enumerate().find_map(|(i, o)| {
                    let mut b = o.bind(ty, bindings)?;
                    b.choose_or(*id, i);
                    Some(b)
                }),
            },

            _ => None,
        }
    }

    /// Substitutes bindings into this template, producing a concrete type
    pub fn resolve(&self, bindings: &Bindings) -> CompileResult<Type> {
        match self {
            TypeTemplate::Typename(n) => Ok(Type::Typename(n.clone())),
            TypeTemplate::Symbol(n) => Ok(Type::Symbol(n.clone())),
            TypeTemplate::Template { name, args, vararg } => {
                let mut resolved = args
                    .iter()
                    .map(|a| a.resolve(bindings))
                    .collect::<CompileResult<Vec<_>>>()?;

                if let Some(v) = vararg {
                    let group = bindings.group(v).ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::UnresolvedType,
                            format!("vararg ${v}... is not bound in {self}"),
                        )
                    })?;
                    resolved.extend(group.iter().cloned());
                }

                Ok(Type::Template(name.clone(), resolved))
            }
            TypeTemplate::Variable(v) => bindings.get(v).cloned().ok_or_else(|| {
                CompileError::new(
                    ErrorKind::UnresolvedType,
                    format!("type variable ${v} is not bound"),
                )
            }),
            TypeTemplate::And(members) => match most_specialized(members) {
                Some(m) => m.resolve(bindings),
                None => Err(CompileError::new(
                    ErrorKind::UnresolvedType,
                    "empty And[] cannot be resolved",
                )),
            },
            TypeTemplate::Or { id, options } => {
                if let Some(chosen) = bindings.or_choice(*id) {
                    if let Some(o) = options.get(chosen) {
                        return o.resolve(bindings);
                    }
                }

                options
                    .iter()
                    .find_map(|o| o.resolve(bindings).ok())
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::UnresolvedType,
                            format!("no alternative of {self} can be resolved"),
                        )
                    })
            }
        }
    }

    /// Canonical string key
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Like `serialize`, but with variables renamed by first occurrence so
    /// alpha-equivalent templates produce the same key
    pub fn canonical(&self) -> String {
        let mut names = BTreeMap::new();
        self.canonical_into(&mut names)
    }

    pub(crate) fn canonical_into(&self, names: &mut BTreeMap<String, usize>) -> String {
        let rename = |v: &str, names: &mut BTreeMap<String, usize>| {
            let next = names.len();
            format!("${}", names.entry(v.to_owned()).or_insert(next))
        };

        match self {
            TypeTemplate::Typename(n) => n.clone(),
            TypeTemplate::Symbol(n) => format!(":{n}"),
            TypeTemplate::Variable(v) => rename(v, names),
            TypeTemplate::Template { name, args, vararg } => {
                let mut parts = args.iter().map(|a| a.canonical_into(names)).collect_vec();
                if let Some(v) = vararg {
                    parts.push(format!("{}...", rename(v, names)));
                }
                format!("{name}[{}]", parts.join(", "))
            }
            TypeTemplate::And(m) => format!(
                "And[{}]",
                m.iter().map(|a| a.canonical_into(names)).join(", ")
            ),
            TypeTemplate::Or { options, .. } => format!(
                "Or[{}]",
                options.iter().map(|a| a.canonical_into(names)).join(", ")
            ),
        }
    }

    /// Free variables, including vararg groups as `...name`
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            TypeTemplate::Typename(_) | TypeTemplate::Symbol(_) => {}
            TypeTemplate::Variable(v) => {
                out.insert(v.clone());
            }
            TypeTemplate::Template { args, vararg, .. } => {
                args.iter().for_each(|a| a.collect_variables(out));
                if let Some(v) = vararg {
                    out.insert(format!("...{v}"));
                }
            }
            TypeTemplate::And(m) | TypeTemplate::Or { options: m, .. } => {
                m.iter().for_each(|a| a.collect_variables(out))
            }
        }
    }

    fn free_count(&self, bound: &BTreeSet<String>) -> usize {
        self.variables().difference(bound).count()
    }

    /// Specialization order used to pick the best of several matching templates.
    ///
    /// `Greater` means `self` is more specialized than `other`. `bound` holds the
    /// variables considered already bound; it grows as parameterized arguments
    /// are compared left to right, so the result depends on argument order.
    pub fn compare_specialization(&self, other: &TypeTemplate, bound: &mut BTreeSet<String>) -> Ordering {
        // an And is represented by its most specialized member
        if let TypeTemplate::And(m) = self {
            if let Some(best) = most_specialized(m) {
                return best.compare_specialization(other, bound);
            }
        }
        if let TypeTemplate::And(m) = other {
            if let Some(best) = most_specialized(m) {
                return self.compare_specialization(best, bound);
            }
        }

        match (self, other) {
            (TypeTemplate::Or { .. }, TypeTemplate::Or { .. }) => return Ordering::Equal,
            (_, TypeTemplate::Or { .. }) => return Ordering::Greater,
            (TypeTemplate::Or { .. }, _) => return Ordering::Less,
            _ => {}
        }

        // fewer free variables is more specialized
        match self.free_count(bound).cmp(&other.free_count(bound)) {
            Ordering::Less => return Ordering::Greater,
            Ordering::Greater => return Ordering::Less,
            Ordering::Equal => {}
        }

        match (self, other) {
            (TypeTemplate::Variable(_), TypeTemplate::Variable(_)) => Ordering::Equal,
            (TypeTemplate::Variable(_), _) => Ordering::Less,
            (_, TypeTemplate::Variable(_)) => Ordering::Greater,
            (
                TypeTemplate::Template {
                    args: a_args,
                    vararg: a_var,
                    ..
                },
                TypeTemplate::Template {
                    args: b_args,
                    vararg: b_var,
                    ..
                },
            ) => {
                for (a, b) in a_args.iter().zip(b_args.iter()) {
                    let r = a.compare_specialization(b, bound);

                    bound.extend(a.variables());
                    bound.extend(b.variables());

                    if r != Ordering::Equal {
                        return r;
                    }
                }

                match (a_var, b_var) {
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    // with both varargs, more explicit positions wins, and otherwise
                    // the longer list wins, which for equal lengths is a tie
                    _ => a_args.len().cmp(&b_args.len()),
                }
            }
            _ => Ordering::Equal,
        }
    }
}

/// Among `candidates`, the one that no later candidate beats.
///
/// Ties go to the last candidate that doesn't lose to the current best, which
/// keeps the choice deterministic without reporting ambiguity.
pub fn most_specialized(candidates: &[TypeTemplate]) -> Option<&TypeTemplate> {
    best_by(candidates.iter(), |t| *t)
}

pub fn best_by<'x, T, F>(candidates: impl Iterator<Item = T>, template: F) -> Option<T>
where
    F: Fn(&T) -> &'x TypeTemplate,
{
    let mut best: Option<T> = None;

    for c in candidates {
        best = match best {
            None => Some(c),
            Some(b) => {
                let mut bound = BTreeSet::new();
                if template(&c).compare_specialization(template(&b), &mut bound) != Ordering::Less {
                    Some(c)
                } else {
                    Some(b)
                }
            }
        };
    }

    best
}

impl Display for TypeTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTemplate::Typename(n) => write!(f, "{n}"),
            TypeTemplate::Symbol(n) => write!(f, ":{n}"),
            TypeTemplate::Variable(v) => write!(f, "${v}"),
            TypeTemplate::Template { name, args, vararg } => {
                let parts = args
                    .iter()
                    .map(|a| a.to_string())
                    .chain(vararg.iter().map(|v| format!("${v}...")));
                write!(f, "{name}[{}]", parts.format(", "))
            }
            TypeTemplate::And(m) => write!(f, "And[{}]", m.iter().format(", ")),
            TypeTemplate::Or { options, .. } => write!(f, "Or[{}]", options.iter().format(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(of: TypeTemplate) -> TypeTemplate {
        TypeTemplate::template("List", vec![of], None)
    }

    fn cmp(a: &TypeTemplate, b: &TypeTemplate) -> Ordering {
        a.compare_specialization(b, &mut BTreeSet::new())
    }

    #[test]
    fn binds_variables_consistently() {
        let pair = TypeTemplate::template(
            "Pair",
            vec![TypeTemplate::var("T"), TypeTemplate::var("T")],
            None,
        );

        let same = Type::Template("Pair".into(), vec![Type::int(), Type::int()]);
        let mixed = Type::Template("Pair".into(), vec![Type::int(), Type::string()]);

        let b = pair.bind(&same, &Bindings::new()).unwrap();
        assert_eq!(b.get("T"), Some(&Type::int()));
        assert!(pair.bind(&mixed, &Bindings::new()).is_none());
    }

    #[test]
    fn vararg_captures_tail() {
        let t = TypeTemplate::template("Tuple", vec![TypeTemplate::var("A")], Some("R"));
        let ty = Type::Template(
            "Tuple".into(),
            vec![Type::int(), Type::string(), Type::bool()],
        );

        let b = t.bind(&ty, &Bindings::new()).unwrap();
        assert_eq!(b.get("A"), Some(&Type::int()));
        assert_eq!(b.group("R"), Some(&[Type::string(), Type::bool()][..]));
        assert_eq!(t.resolve(&b).unwrap(), ty);

        let empty = Type::Template("Tuple".into(), vec![Type::int()]);
        let b = t.bind(&empty, &Bindings::new()).unwrap();
        assert_eq!(b.group("R"), Some(&[][..]));
    }

    #[test]
    fn or_choice_is_memoized() {
        let or = TypeTemplate::Or {
            id: OrId(0),
            options: vec![TypeTemplate::named("Int"), TypeTemplate::named("String")],
        };

        let b = or.bind(&Type::string(), &Bindings::new()).unwrap();
        assert_eq!(b.or_choice(OrId(0)), Some(1));

        // once chosen, the other branch no longer matches
        assert!(or.bind(&Type::int(), &b).is_none());
        assert_eq!(or.resolve(&b).unwrap(), Type::string());
    }

    #[test]
    fn and_requires_every_member() {
        let and = TypeTemplate::And(vec![list(TypeTemplate::var("T")), TypeTemplate::var("U")]);
        let ty = Type::list(Type::int());

        let b = and.bind(&ty, &Bindings::new()).unwrap();
        assert_eq!(b.get("T"), Some(&Type::int()));
        assert_eq!(b.get("U"), Some(&ty));
        assert!(and.bind(&Type::int(), &Bindings::new()).is_none());
        assert_eq!(and.resolve(&b).unwrap(), ty);
    }

    #[test]
    fn unbound_variable_fails_to_resolve() {
        let e = TypeTemplate::var("Q").resolve(&Bindings::new()).unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnresolvedType);
    }

    #[test]
    fn concrete_beats_variable() {
        let int = TypeTemplate::named("Int");
        let t = TypeTemplate::var("T");

        assert_eq!(cmp(&int, &t), Ordering::Greater);
        assert_eq!(cmp(&t, &int), Ordering::Less);
        assert_eq!(cmp(&t, &TypeTemplate::var("U")), Ordering::Equal);
        assert_eq!(cmp(&list(t.clone()), &t), Ordering::Greater);
    }

    #[test]
    fn fewer_free_variables_wins() {
        let fn_tt = TypeTemplate::template(
            "fn",
            vec![TypeTemplate::var("T"), TypeTemplate::var("T")],
            None,
        );
        let fn_tu = TypeTemplate::template(
            "fn",
            vec![TypeTemplate::var("T"), TypeTemplate::var("U")],
            None,
        );

        assert_eq!(cmp(&fn_tt, &fn_tu), Ordering::Greater);
        assert_eq!(cmp(&fn_tu, &fn_tt), Ordering::Less);
    }

    #[test]
    fn argument_order_decides_ties() {
        let a = TypeTemplate::template(
            "fn",
            vec![TypeTemplate::named("Int"), TypeTemplate::var("T")],
            None,
        );
        let b = TypeTemplate::template(
            "fn",
            vec![TypeTemplate::var("T"), TypeTemplate::named("Int")],
            None,
        );

        assert_eq!(cmp(&a, &b), Ordering::Greater);
        assert_eq!(cmp(&b, &a), Ordering::Less);
    }

    #[test]
    fn or_loses_to_everything_else() {
        let or = TypeTemplate::Or {
            id: OrId(1),
            options: vec![TypeTemplate::named("Int")],
        };
        let other = TypeTemplate::Or {
            id: OrId(2),
            options: vec![TypeTemplate::named("Int")],
        };

        assert_eq!(cmp(&or, &TypeTemplate::var("T")), Ordering::Less);
        assert_eq!(cmp(&TypeTemplate::var("T"), &or), Ordering::Greater);
        assert_eq!(cmp(&or, &other), Ordering::Equal);
    }

    #[test]
    fn vararg_rules() {
        let fixed = TypeTemplate::template("T", vec![TypeTemplate::named("Int")], None);
        let var1 = TypeTemplate::template("T", vec![TypeTemplate::named("Int")], Some("R"));
        let var0 = TypeTemplate::template("T", vec![], Some("R"));

        // equal free-variable counts only between the two vararg forms
        assert_eq!(cmp(&var1, &var0), Ordering::Greater);
        assert_eq!(cmp(&fixed, &var1), Ordering::Greater);
    }

    #[test]
    fn specialization_is_antisymmetric_over_every_shape() {
        let int = TypeTemplate::named("Int");
        let t = TypeTemplate::var("T");

        let shapes = vec![
            int.clone(),
            TypeTemplate::named("String"),
            TypeTemplate::Symbol("name".to_owned()),
            t.clone(),
            list(int.clone()),
            list(t.clone()),
            TypeTemplate::template("Pair", vec![t.clone(), t.clone()], None),
            TypeTemplate::template("Pair", vec![t.clone(), TypeTemplate::var("U")], None),
            TypeTemplate::Or {
                id: OrId(0),
                options: vec![int.clone(), TypeTemplate::named("String")],
            },
            TypeTemplate::Or {
                id: OrId(1),
                options: vec![list(t.clone()), t.clone()],
            },
            TypeTemplate::And(vec![t.clone(), list(TypeTemplate::var("U"))]),
            TypeTemplate::And(vec![int.clone()]),
            TypeTemplate::template("fn", vec![int.clone()], None),
            TypeTemplate::template("fn", vec![int.clone()], Some("R")),
            TypeTemplate::template("fn", vec![], Some("R")),
            TypeTemplate::template("fn", vec![t.clone(), int.clone()], Some("R")),
        ];

        for a in shapes.iter() {
            assert_eq!(cmp(a, a), Ordering::Equal, "{a} against itself");

            for b in shapes.iter() {
                assert_eq!(cmp(a, b), cmp(b, a).reverse(), "{a} against {b}");
            }
        }
    }

    #[test]
    fn last_non_losing_candidate_wins_ties() {
        let a = TypeTemplate::var("A");
        let b = TypeTemplate::var("B");
        let candidates = [a, b.clone()];
        let picked = most_specialized(&candidates).unwrap();

        assert_eq!(picked, &b);
    }

    #[test]
    fn canonical_ignores_variable_names() {
        let a = TypeTemplate::template(
            "Pair",
            vec![TypeTemplate::var("X"), TypeTemplate::var("Y")],
            Some("Z"),
        );
        let b = TypeTemplate::template(
            "Pair",
            vec![TypeTemplate::var("A"), TypeTemplate::var("B")],
            Some("C"),
        );

        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "Pair[$0, $1, $2...]");
        assert_eq!(a.serialize(), "Pair[$X, $Y, $Z...]");
    }
}
