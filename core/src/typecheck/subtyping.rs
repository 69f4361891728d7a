//! Subtyping and constraint discharge.
//!
//! [`subtyp`] decides whether a value of one type can be used where another
//! type is expected. The algorithm tries, in priority order:
//!
//! 1. an alpha-equivalence fast path — structurally identical types (after
//!    canonical relabeling of bound variables) are subtypes in both
//!    directions, without any solver call, so re-checking already-elaborated
//!    types never fails spuriously;
//! 2. numeric reduction — when the supertype is `atom`, `range`, `int` or
//!    `nat`, both sides reduce to index expressions (existentially bound
//!    variables of the subtype side are unpacked into the environment first)
//!    and the question becomes a provable constraint;
//! 3. structural congruence — tuples pointwise, identical applied
//!    constructors pointwise, functions contravariant in their arguments and
//!    covariant in their return, plus the built-in coercions
//!    `atom_bool <= bool` and `string_literal <= string`;
//! 4. existential rules — a subtype-side existential is unpacked and the
//!    check recurses; a supertype-side existential has its body *unified*
//!    against the subtype to solve its bound variables, and its constraint
//!    is then discharged under the resulting substitution;
//! 5. otherwise the check fails, naming the types (and the unprovable
//!    constraint if the failure came down to one).
//!
//! Constraint discharge ([`prove`]) asks the solver for the satisfiability
//! of `assumptions & not(goal)`: `Unsat` proves the goal. A retry that
//! strips assumptions mentioning `2 ^ _` terms works around solver
//! weaknesses with exponentiation. Dropping an assumption is not a sound
//! inference rule in general, so the fallback is opt-in
//! ([`crate::typecheck::Options::pow2_fallback`]) and every use is logged.
use indexmap::IndexSet;
use log::warn;

use crate::identifier::Kid;
use crate::position::TermPos;
use crate::solver::Verdict;
use crate::tcenv::Env;
use crate::typ::{
    names, KindedId, NConstraint, NcKind, Nexp, NexpKind, Typ, TypArg, TypArgKind, TypKind,
};
use crate::typecheck::error::{TcResult, TypeError, TypeErrorKind};
use crate::typecheck::unif::unify;
use crate::typecheck::State;

/// Prove a constraint from the environment's assumptions. `true` is proved
/// without consulting the solver; everything else queries it.
pub fn prove(state: &mut State, env: &Env, nc: &NConstraint) -> bool {
    let nc = nc.simp();
    if nc.is_true() {
        return true;
    }
    let formula = env.proof_formula(&nc);
    if state.solver.check(&formula) == Verdict::Unsat {
        return true;
    }
    if state.opts.pow2_fallback && constraint_mentions_exp(&formula.constraint) {
        let retry = env.proof_formula_filtered(&nc, |assumption| {
            !constraint_mentions_exp(assumption)
        });
        if retry != formula && state.solver.check(&retry) == Verdict::Unsat {
            warn!(
                "proved {nc} only after dropping assumptions mentioning 2 ^ _; \
                 this is a workaround for solver weaknesses, not a sound inference rule"
            );
            return true;
        }
    }
    false
}

/// [`prove`], failing with an [`TypeErrorKind::Unprovable`] error.
pub fn prove_or_err(
    state: &mut State,
    env: &Env,
    nc: &NConstraint,
    pos: TermPos,
) -> TcResult<()> {
    if prove(state, env, nc) {
        Ok(())
    } else {
        Err(TypeError::new(pos, TypeErrorKind::Unprovable(nc.simp())))
    }
}

/// Decide `t1 <= t2` in `env`, or fail with a documented reason.
pub fn subtyp(state: &mut State, env: &Env, t1: &Typ, t2: &Typ, pos: TermPos) -> TcResult<()> {
    let t1 = env.expand_synonyms(t1).simp();
    let t2 = env.expand_synonyms(t2).simp();

    if t1.alpha_equivalent(&t2) {
        return Ok(());
    }

    let failed = |unproved: Option<NConstraint>| {
        TypeError::new(
            pos,
            TypeErrorKind::SubtypeFailed {
                sub: t1.clone(),
                sup: t2.clone(),
                unproved,
            },
        )
    };

    // Numeric supertypes reduce to constraint proofs, with the subtype
    // side's quantified variables existentially bound into the environment
    // first.
    if let Some(shape) = numeric_shape(&t2) {
        if let Some((inner, e1)) = destruct_numeric(env, &t1, pos) {
            let goal = match shape {
                NumericShape::Atom(e2) => NConstraint::nexp_equal(e1, e2),
                NumericShape::Range(lo, hi) => NConstraint::and(
                    NConstraint::le(lo, e1.clone()),
                    NConstraint::le(e1, hi),
                ),
                NumericShape::Int => NConstraint::tru(),
                NumericShape::Nat => NConstraint::ge(e1, Nexp::constant(0)),
            };
            return if prove(state, &inner, &goal) {
                Ok(())
            } else {
                Err(failed(Some(goal.simp())))
            };
        }
    }

    match (&t1.typ, &t2.typ) {
        (TypKind::Id(id1), TypKind::Id(id2)) if id1 == id2 => Ok(()),
        // atom_bool(c) <= bool
        (TypKind::App(head, _), TypKind::Id(id))
            if *head == names::atom_bool() && *id == names::bool() =>
        {
            Ok(())
        }
        // string_literal <= string
        (TypKind::Id(id1), TypKind::Id(id2))
            if *id1 == names::string_literal() && *id2 == names::string() =>
        {
            Ok(())
        }
        (TypKind::Tuple(ts1), TypKind::Tuple(ts2)) if ts1.len() == ts2.len() => ts1
            .iter()
            .zip(ts2.iter())
            .try_for_each(|(s1, s2)| subtyp(state, env, s1, s2, pos)),
        (TypKind::App(id1, args1), TypKind::App(id2, args2))
            if id1 == id2 && args1.len() == args2.len() =>
        {
            args1
                .iter()
                .zip(args2.iter())
                .try_for_each(|(a1, a2)| subtyp_arg(state, env, a1, a2, pos))
        }
        // Functions are contravariant in their arguments and covariant in
        // their return type.
        (TypKind::Fn(args1, ret1), TypKind::Fn(args2, ret2)) if args1.len() == args2.len() => {
            for (a1, a2) in args1.iter().zip(args2.iter()) {
                subtyp(state, env, a2, a1, pos)?;
            }
            subtyp(state, env, ret1, ret2, pos)
        }
        (TypKind::Bidir(x1, y1), TypKind::Bidir(x2, y2)) => {
            subtyp(state, env, x1, x2, pos)?;
            subtyp(state, env, y1, y2, pos)
        }
        // Subtype-side existential: unpack into the environment and recurse.
        (TypKind::Exist(..), _) => {
            let (inner, body) = env.unpack_exist(&t1, pos);
            subtyp(state, &inner, &body, &t2, pos)
        }
        // Supertype-side existential: solve its bound variables by unifying
        // its body against the subtype, then discharge its constraint under
        // the resulting substitution.
        (_, TypKind::Exist(kids, nc, body)) => {
            // Freshen the binders so they cannot collide with variables of
            // the subtype side.
            let mut goals: IndexSet<Kid> = IndexSet::new();
            let mut fresh_nc = (**nc).clone();
            let mut fresh_body = (**body).clone();
            for kinded in kids.iter() {
                let fresh = Kid::fresh(kinded.kid.label());
                let arg = super::var_arg(KindedId::new(fresh, kinded.kind));
                fresh_nc = fresh_nc.subst(kinded.kid, &arg);
                fresh_body = fresh_body.subst(kinded.kid, &arg);
                goals.insert(fresh);
            }

            let unifier = unify(state, env, &goals, &fresh_body, &t1)
                .map_err(|unif_err| {
                    failed(None).because(unif_err.into_type_error(pos))
                })?;
            for kid in &goals {
                if !unifier.contains(*kid) {
                    return Err(failed(None).because(TypeError::msg(
                        pos,
                        format!("existential variable {kid} could not be instantiated"),
                    )));
                }
            }
            let goal = unifier.apply_constraint(&fresh_nc);
            // The subtype side may itself carry quantified variables that
            // the instantiated constraint mentions.
            let (inner, _) = env.unpack_exist(&t1, pos);
            if prove(state, &inner, &goal) {
                Ok(())
            } else {
                Err(failed(Some(goal.simp())))
            }
        }
        _ => Err(failed(None)),
    }
}

/// Pointwise subtyping of type arguments: index arguments must be provably
/// equal, boolean arguments provably equivalent, type arguments recurse.
pub fn subtyp_arg(
    state: &mut State,
    env: &Env,
    a1: &TypArg,
    a2: &TypArg,
    pos: TermPos,
) -> TcResult<()> {
    match (&a1.arg, &a2.arg) {
        (TypArgKind::Nexp(e1), TypArgKind::Nexp(e2)) => {
            prove_or_err(state, env, &NConstraint::nexp_equal(e1.clone(), e2.clone()), pos)
        }
        (TypArgKind::Typ(s1), TypArgKind::Typ(s2)) => subtyp(state, env, s1, s2, pos),
        (TypArgKind::Bool(c1), TypArgKind::Bool(c2)) => prove_or_err(
            state,
            env,
            &NConstraint::equal(TypArg::bool((**c1).clone()), TypArg::bool((**c2).clone())),
            pos,
        ),
        _ => Err(TypeError::msg(
            pos,
            format!("type argument {a1} has kind {}, expected {}", a1.kind(), a2.kind()),
        )),
    }
}

enum NumericShape {
    Atom(Nexp),
    Range(Nexp, Nexp),
    Int,
    Nat,
}

/// Recognize the numeric supertypes that reduce subtyping to a constraint.
fn numeric_shape(typ: &Typ) -> Option<NumericShape> {
    match &typ.typ {
        TypKind::Id(id) if *id == names::int() => Some(NumericShape::Int),
        TypKind::Id(id) if *id == names::nat() => Some(NumericShape::Nat),
        TypKind::App(id, args) if *id == names::atom() && args.len() == 1 => {
            args[0].as_nexp().cloned().map(NumericShape::Atom)
        }
        TypKind::App(id, args) if *id == names::range() && args.len() == 2 => {
            match (args[0].as_nexp(), args[1].as_nexp()) {
                (Some(lo), Some(hi)) => Some(NumericShape::Range(lo.clone(), hi.clone())),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Reduce a numeric type to an index expression, existentially binding any
/// quantified variables into the environment. `int` and `nat` become fresh
/// variables (unconstrained, respectively constrained non-negative).
pub fn destruct_numeric(env: &Env, typ: &Typ, pos: TermPos) -> Option<(Env, Nexp)> {
    match &typ.typ {
        TypKind::App(id, args) if *id == names::atom() && args.len() == 1 => {
            args[0].as_nexp().map(|e| (env.clone(), e.clone()))
        }
        TypKind::App(id, args) if *id == names::range() && args.len() == 2 => {
            let lo = args[0].as_nexp()?.clone();
            let hi = args[1].as_nexp()?.clone();
            let kid = Kid::fresh("n");
            let inner = env
                .add_typ_var(KindedId::int(kid), pos)
                .add_constraint(NConstraint::and(
                    NConstraint::le(lo, Nexp::var(kid)),
                    NConstraint::le(Nexp::var(kid), hi),
                ));
            Some((inner, Nexp::var(kid)))
        }
        TypKind::Id(id) if *id == names::int() => {
            let kid = Kid::fresh("n");
            let inner = env.add_typ_var(KindedId::int(kid), pos);
            Some((inner, Nexp::var(kid)))
        }
        TypKind::Id(id) if *id == names::nat() => {
            let kid = Kid::fresh("n");
            let inner = env
                .add_typ_var(KindedId::int(kid), pos)
                .add_constraint(NConstraint::ge(Nexp::var(kid), Nexp::constant(0)));
            Some((inner, Nexp::var(kid)))
        }
        TypKind::Exist(..) => {
            let (inner, body) = env.unpack_exist(typ, pos);
            destruct_numeric(&inner, &body, pos)
        }
        _ => None,
    }
}

fn constraint_mentions_exp(nc: &NConstraint) -> bool {
    fn nexp_mentions(nexp: &Nexp) -> bool {
        match &nexp.nexp {
            NexpKind::Exp(_) => true,
            NexpKind::Var(_) | NexpKind::Id(_) | NexpKind::Constant(_) => false,
            NexpKind::App(_, args) => args.iter().any(nexp_mentions),
            NexpKind::Sum(e1, e2) | NexpKind::Minus(e1, e2) | NexpKind::Times(e1, e2) => {
                nexp_mentions(e1) || nexp_mentions(e2)
            }
            NexpKind::Neg(e) => nexp_mentions(e),
            NexpKind::If(c, e1, e2) => {
                constraint_mentions_exp(c) || nexp_mentions(e1) || nexp_mentions(e2)
            }
        }
    }
    fn arg_mentions(arg: &TypArg) -> bool {
        match &arg.arg {
            TypArgKind::Nexp(n) => nexp_mentions(n),
            TypArgKind::Bool(nc) => constraint_mentions_exp(nc),
            TypArgKind::Typ(_) => false,
        }
    }
    match &nc.nc {
        NcKind::Equal(a1, a2) | NcKind::NotEqual(a1, a2) => arg_mentions(a1) || arg_mentions(a2),
        NcKind::Ge(e1, e2) | NcKind::Gt(e1, e2) | NcKind::Le(e1, e2) | NcKind::Lt(e1, e2) => {
            nexp_mentions(e1) || nexp_mentions(e2)
        }
        NcKind::Set(e, _) => nexp_mentions(e),
        NcKind::And(c1, c2) | NcKind::Or(c1, c2) => {
            constraint_mentions_exp(c1) || constraint_mentions_exp(c2)
        }
        NcKind::App(_, args) => args.iter().any(arg_mentions),
        NcKind::Var(_) | NcKind::True | NcKind::False => false,
    }
}
