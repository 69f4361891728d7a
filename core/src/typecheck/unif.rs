//! Goal-directed unification.
//!
//! [`unify`] finds a substitution of *goal* type variables — the quantifier
//! variables of the polymorphic type being instantiated — that makes a
//! template type match a target type. This is not general two-sided
//! inference: only variables in the goal set are ever solved, and a goal
//! variable occurring on the target side is rejected up front (the occurs
//! check), so the resulting [`Unifier`] maps goal variables to types, index
//! expressions and constraints drawn purely from the target side.
//!
//! Index-expression unification peels additive and multiplicative structure
//! symbolically before falling back to solver-proved equality: `'n + k`
//! unifies with `m` by unifying `'n` with `m - k` when `k` mentions no goal
//! variable, and `c * 'n` unifies with `m` only once `mod(m, c) = 0` and
//! `c != 0` have been proved, guarding the conversion of the multiplication
//! into a division.
use indexmap::{IndexMap, IndexSet};
use log::trace;

use crate::identifier::Kid;
use crate::tcenv::Env;
use crate::typ::{
    names, Integer, NConstraint, NcKind, Nexp, NexpKind, Typ, TypArg, TypArgKind, TypKind,
};
use crate::typecheck::error::{UnifResult, UnifyError};
use crate::typecheck::subtyping::prove;
use crate::typecheck::State;

use malachite::base::num::basic::traits::{One, Zero};

/// A substitution from type variables to type arguments, built incrementally
/// during instantiation. Insertion order is preserved: it is observable in
/// annotations and error output.
#[derive(Clone, Debug, Default)]
pub struct Unifier {
    map: IndexMap<Kid, TypArg>,
}

impl Unifier {
    pub fn new() -> Self {
        Unifier::default()
    }

    pub fn singleton(kid: Kid, arg: TypArg) -> Self {
        let mut unifier = Unifier::new();
        unifier.map.insert(kid, arg);
        unifier
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, kid: Kid) -> Option<&TypArg> {
        self.map.get(&kid)
    }

    pub fn contains(&self, kid: Kid) -> bool {
        self.map.contains_key(&kid)
    }

    pub fn insert(&mut self, kid: Kid, arg: TypArg) {
        self.map.insert(kid, arg);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Kid, &TypArg)> {
        self.map.iter().map(|(kid, arg)| (*kid, arg))
    }

    pub fn apply_typ(&self, typ: &Typ) -> Typ {
        self.map
            .iter()
            .fold(typ.clone(), |acc, (kid, arg)| acc.subst(*kid, arg))
    }

    pub fn apply_arg(&self, arg: &TypArg) -> TypArg {
        self.map
            .iter()
            .fold(arg.clone(), |acc, (kid, sub)| acc.subst(*kid, sub))
    }

    pub fn apply_nexp(&self, nexp: &Nexp) -> Nexp {
        self.map
            .iter()
            .fold(nexp.clone(), |acc, (kid, arg)| acc.subst(*kid, arg))
    }

    pub fn apply_constraint(&self, nc: &NConstraint) -> NConstraint {
        self.map
            .iter()
            .fold(nc.clone(), |acc, (kid, arg)| acc.subst(*kid, arg))
    }
}

impl std::fmt::Display for Unifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (kid, arg)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kid} => {arg}")?;
        }
        write!(f, "}}")
    }
}

/// Unify the template `t1` (which may mention goal variables) against the
/// target `t2`, returning the substitution of goal variables that makes them
/// match. Fails with a recoverable [`UnifyError`].
pub fn unify(
    state: &mut State,
    env: &Env,
    goals: &IndexSet<Kid>,
    t1: &Typ,
    t2: &Typ,
) -> UnifResult<Unifier> {
    trace!("unify {t1} against {t2} for {goals:?}");
    // Unifying a type against itself yields the identity substitution; this
    // is the one case where goal variables may appear on the target side.
    if t1 == t2 {
        return Ok(identity_unifier(t1, goals));
    }
    for kid in t2.tyvars() {
        if goals.contains(&kid) {
            return Err(UnifyError::OccursCheck(kid));
        }
    }
    unify_typ(state, env, goals, t1, t2)
}

/// The substitution mapping each goal variable occurring in `typ` to
/// itself, tagged with the kind its position implies.
fn identity_unifier(typ: &Typ, goals: &IndexSet<Kid>) -> Unifier {
    fn walk_typ(typ: &Typ, goals: &IndexSet<Kid>, out: &mut Unifier) {
        match &typ.typ {
            TypKind::Var(kid) => {
                if goals.contains(kid) {
                    out.insert(*kid, TypArg::typ(Typ::var(*kid)));
                }
            }
            TypKind::Id(_) => {}
            TypKind::App(_, args) => args.iter().for_each(|a| walk_arg(a, goals, out)),
            TypKind::Tuple(typs) => typs.iter().for_each(|t| walk_typ(t, goals, out)),
            TypKind::Fn(args, ret) => {
                args.iter().for_each(|t| walk_typ(t, goals, out));
                walk_typ(ret, goals, out);
            }
            TypKind::Bidir(t1, t2) => {
                walk_typ(t1, goals, out);
                walk_typ(t2, goals, out);
            }
            TypKind::Exist(_, nc, body) => {
                walk_nc(nc, goals, out);
                walk_typ(body, goals, out);
            }
        }
    }
    fn walk_nexp(nexp: &Nexp, goals: &IndexSet<Kid>, out: &mut Unifier) {
        for kid in nexp.tyvars() {
            if goals.contains(&kid) {
                out.insert(kid, TypArg::nexp(Nexp::var(kid)));
            }
        }
    }
    fn walk_nc(nc: &NConstraint, goals: &IndexSet<Kid>, out: &mut Unifier) {
        match &nc.nc {
            NcKind::Var(kid) => {
                if goals.contains(kid) {
                    out.insert(*kid, TypArg::bool(NConstraint::var(*kid)));
                }
            }
            NcKind::Equal(a1, a2) | NcKind::NotEqual(a1, a2) => {
                walk_arg(a1, goals, out);
                walk_arg(a2, goals, out);
            }
            NcKind::Ge(e1, e2)
            | NcKind::Gt(e1, e2)
            | NcKind::Le(e1, e2)
            | NcKind::Lt(e1, e2) => {
                walk_nexp(e1, goals, out);
                walk_nexp(e2, goals, out);
            }
            NcKind::Set(e, _) => walk_nexp(e, goals, out),
            NcKind::And(c1, c2) | NcKind::Or(c1, c2) => {
                walk_nc(c1, goals, out);
                walk_nc(c2, goals, out);
            }
            NcKind::App(_, args) => args.iter().for_each(|a| walk_arg(a, goals, out)),
            NcKind::True | NcKind::False => {}
        }
    }
    fn walk_arg(arg: &TypArg, goals: &IndexSet<Kid>, out: &mut Unifier) {
        match &arg.arg {
            TypArgKind::Nexp(n) => walk_nexp(n, goals, out),
            TypArgKind::Typ(t) => walk_typ(t, goals, out),
            TypArgKind::Bool(nc) => walk_nc(nc, goals, out),
        }
    }
    let mut out = Unifier::new();
    walk_typ(typ, goals, &mut out);
    out
}

fn unify_typ(
    state: &mut State,
    env: &Env,
    goals: &IndexSet<Kid>,
    t1: &Typ,
    t2: &Typ,
) -> UnifResult<Unifier> {
    let t1 = env.expand_synonyms(t1).simp();
    let t2 = env.expand_synonyms(t2).simp();

    let mismatch = || UnifyError::Mismatch {
        left: t1.clone(),
        right: t2.clone(),
    };

    match (&t1.typ, &t2.typ) {
        (TypKind::Var(kid), _) if goals.contains(kid) => {
            Ok(Unifier::singleton(*kid, TypArg::typ(t2.clone())))
        }
        (TypKind::Var(k1), TypKind::Var(k2)) if k1 == k2 => Ok(Unifier::new()),
        (TypKind::Id(id1), TypKind::Id(id2)) if id1 == id2 => Ok(Unifier::new()),
        // int and nat generalize any numeric type: nothing to solve. The
        // subtype obligations of the instantiation re-check the details.
        (TypKind::Id(id), TypKind::App(head, _))
            if (*id == names::int() || *id == names::nat())
                && (*head == names::atom() || *head == names::range()) =>
        {
            Ok(Unifier::new())
        }
        // A range template against an atom target pins both bounds.
        (TypKind::App(head1, args1), TypKind::App(head2, args2))
            if *head1 == names::range() && *head2 == names::atom() =>
        {
            let (lo, hi) = match args1.as_slice() {
                [lo, hi] => (lo, hi),
                _ => return Err(mismatch()),
            };
            let n = args2
                .first()
                .and_then(TypArg::as_nexp)
                .ok_or_else(mismatch)?;
            let u1 = unify_arg(state, env, goals, lo, &TypArg::nexp(n.clone()))?;
            let u2 = unify_arg(state, env, goals, hi, &TypArg::nexp(n.clone()))?;
            merge(state, env, u1, u2)
        }
        (TypKind::App(id1, args1), TypKind::App(id2, args2))
            if id1 == id2 && args1.len() == args2.len() =>
        {
            let mut unifier = Unifier::new();
            for (a1, a2) in args1.iter().zip(args2.iter()) {
                let u = unify_arg(state, env, goals, a1, a2)?;
                unifier = merge(state, env, unifier, u)?;
            }
            Ok(unifier)
        }
        (TypKind::Tuple(ts1), TypKind::Tuple(ts2)) => {
            if ts1.len() != ts2.len() {
                return Err(UnifyError::ArityMismatch {
                    left: ts1.len(),
                    right: ts2.len(),
                });
            }
            let mut unifier = Unifier::new();
            for (s1, s2) in ts1.iter().zip(ts2.iter()) {
                let u = unify_typ(state, env, goals, s1, s2)?;
                unifier = merge(state, env, unifier, u)?;
            }
            Ok(unifier)
        }
        (TypKind::Fn(args1, ret1), TypKind::Fn(args2, ret2)) => {
            if args1.len() != args2.len() {
                return Err(UnifyError::ArityMismatch {
                    left: args1.len(),
                    right: args2.len(),
                });
            }
            let mut unifier = Unifier::new();
            for (s1, s2) in args1.iter().zip(args2.iter()) {
                let u = unify_typ(state, env, goals, s1, s2)?;
                unifier = merge(state, env, unifier, u)?;
            }
            let u = unify_typ(state, env, goals, ret1, ret2)?;
            merge(state, env, unifier, u)
        }
        (TypKind::Bidir(a1, b1), TypKind::Bidir(a2, b2)) => {
            let u1 = unify_typ(state, env, goals, a1, a2)?;
            let u2 = unify_typ(state, env, goals, b1, b2)?;
            merge(state, env, u1, u2)
        }
        // Existentials: unification works on the bodies. The constraints are
        // not lost — the caller (subtyping or instantiation) discharges them
        // separately, with the bound variables unpacked into the
        // environment.
        (TypKind::Exist(_, _, body), _) => unify_typ(state, env, goals, body, &t2),
        (_, TypKind::Exist(_, _, body)) => unify_typ(state, env, goals, &t1, body),
        _ => Err(mismatch()),
    }
}

pub fn unify_arg(
    state: &mut State,
    env: &Env,
    goals: &IndexSet<Kid>,
    a1: &TypArg,
    a2: &TypArg,
) -> UnifResult<Unifier> {
    match (&a1.arg, &a2.arg) {
        (TypArgKind::Nexp(n1), TypArgKind::Nexp(n2)) => unify_nexp(state, env, goals, n1, n2),
        (TypArgKind::Typ(t1), TypArgKind::Typ(t2)) => unify_typ(state, env, goals, t1, t2),
        (TypArgKind::Bool(c1), TypArgKind::Bool(c2)) => unify_constraint(state, env, goals, c1, c2),
        _ => Err(UnifyError::ArgMismatch {
            left: a1.clone(),
            right: a2.clone(),
        }),
    }
}

fn unify_constraint(
    _state: &mut State,
    _env: &Env,
    goals: &IndexSet<Kid>,
    c1: &NConstraint,
    c2: &NConstraint,
) -> UnifResult<Unifier> {
    let c1 = c1.simp();
    let c2 = c2.simp();
    match &c1.nc {
        NcKind::Var(kid) if goals.contains(kid) => {
            Ok(Unifier::singleton(*kid, TypArg::bool(c2)))
        }
        _ if c1 == c2 => Ok(Unifier::new()),
        _ => Err(UnifyError::ConstraintMismatch {
            left: c1,
            right: c2,
        }),
    }
}

pub fn unify_nexp(
    state: &mut State,
    env: &Env,
    goals: &IndexSet<Kid>,
    n1: &Nexp,
    n2: &Nexp,
) -> UnifResult<Unifier> {
    let n1 = n1.simp();
    let n2 = n2.simp();

    let goal_vars = |n: &Nexp| -> bool { n.tyvars().iter().any(|kid| goals.contains(kid)) };

    // If the template mentions no goal variable there is nothing to solve:
    // defer to direct constraint proof.
    if !goal_vars(&n1) {
        if n1 == n2 || prove(state, env, &NConstraint::nexp_equal(n1.clone(), n2.clone())) {
            return Ok(Unifier::new());
        }
        return Err(UnifyError::NexpMismatch { left: n1, right: n2 });
    }

    let err = || UnifyError::NexpMismatch {
        left: n1.clone(),
        right: n2.clone(),
    };

    match &n1.nexp {
        NexpKind::Var(kid) if goals.contains(kid) => {
            Ok(Unifier::singleton(*kid, TypArg::nexp(n2.clone())))
        }
        NexpKind::Sum(a, b) => {
            if !goal_vars(b) {
                unify_nexp(state, env, goals, a, &Nexp::minus(n2.clone(), (**b).clone()))
            } else if !goal_vars(a) {
                unify_nexp(state, env, goals, b, &Nexp::minus(n2.clone(), (**a).clone()))
            } else {
                Err(err())
            }
        }
        NexpKind::Minus(a, b) => {
            if !goal_vars(b) {
                unify_nexp(state, env, goals, a, &Nexp::sum(n2.clone(), (**b).clone()))
            } else if !goal_vars(a) {
                unify_nexp(state, env, goals, b, &Nexp::minus((**a).clone(), n2.clone()))
            } else {
                Err(err())
            }
        }
        NexpKind::Neg(a) => unify_nexp(state, env, goals, a, &Nexp::neg(n2.clone())),
        NexpKind::Times(a, b) => {
            let (known, unknown) = if !goal_vars(a) {
                (&**a, &**b)
            } else if !goal_vars(b) {
                (&**b, &**a)
            } else {
                return Err(err());
            };
            // Converting the multiplication into a division is only valid
            // when the target is divisible by the known factor and the
            // factor is non-zero.
            let valid = NConstraint::and(
                NConstraint::nexp_equal(
                    Nexp::app(names::modulo(), vec![n2.clone(), known.clone()]),
                    Nexp::constant(0),
                ),
                NConstraint::not_equal(
                    TypArg::nexp(known.clone()),
                    TypArg::nexp(Nexp::constant(0)),
                ),
            );
            if !prove(state, env, &valid) {
                return Err(err());
            }
            unify_nexp(state, env, goals, unknown, &div_nexp(&n2, known))
        }
        NexpKind::Exp(e) => match &n2.nexp {
            NexpKind::Constant(c) => {
                let log = as_power_of_two(c).ok_or_else(err)?;
                unify_nexp(state, env, goals, e, &Nexp::constant(Integer::from(log)))
            }
            NexpKind::Exp(e2) => unify_nexp(state, env, goals, e, e2),
            _ => Err(err()),
        },
        _ => Err(err()),
    }
}

/// Merge two unifiers. A variable bound by both must be bound to the same
/// argument, or to two index expressions the solver can prove equal — in
/// which case a variable reference is preferred over a literal.
pub fn merge(
    state: &mut State,
    env: &Env,
    mut left: Unifier,
    right: Unifier,
) -> UnifResult<Unifier> {
    for (kid, arg) in right.map {
        match left.get(kid) {
            None => {
                left.insert(kid, arg);
            }
            Some(existing) if *existing == arg => {}
            Some(existing) => {
                let (e1, e2) = match (existing.as_nexp(), arg.as_nexp()) {
                    (Some(e1), Some(e2)) => (e1.clone(), e2.clone()),
                    _ => {
                        return Err(UnifyError::MergeConflict {
                            kid,
                            first: existing.clone(),
                            second: arg,
                        })
                    }
                };
                if !prove(state, env, &NConstraint::nexp_equal(e1.clone(), e2.clone())) {
                    return Err(UnifyError::MergeConflict {
                        kid,
                        first: left.get(kid).cloned().expect("just looked up"),
                        second: arg,
                    });
                }
                // Both are valid: keep a variable reference in preference to
                // a literal.
                let existing_is_var = matches!(e1.nexp, NexpKind::Var(_));
                let new_is_var = matches!(e2.nexp, NexpKind::Var(_));
                if !existing_is_var && new_is_var {
                    left.insert(kid, arg);
                }
            }
        }
    }
    Ok(left)
}

fn div_nexp(num: &Nexp, den: &Nexp) -> Nexp {
    if let (Some(n), Some(d)) = (num.as_constant(), den.as_constant()) {
        if *d != Integer::ZERO && (n % d) == Integer::ZERO {
            return Nexp::constant(n / d);
        }
    }
    Nexp::app(names::div(), vec![num.clone(), den.clone()])
}

fn as_power_of_two(c: &Integer) -> Option<u64> {
    if *c <= Integer::ZERO {
        return None;
    }
    let two = Integer::from(2u32);
    let mut value = c.clone();
    let mut log = 0u64;
    while (&value % &two) == Integer::ZERO {
        value = &value / &two;
        log += 1;
    }
    (value == Integer::ONE).then_some(log)
}
