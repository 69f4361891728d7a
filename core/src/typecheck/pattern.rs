//! Pattern binding and inference.
//!
//! [`bind`] checks a pattern against an expected type, returning the
//! elaborated pattern, the environment extended with the pattern's bindings,
//! and the list of guard expressions synthesized for literal sub-patterns: a
//! literal inside a larger pattern is desugared into a fresh variable
//! binding plus an equality guard evaluated after the match, and the same
//! rule applies recursively inside `as`-patterns, or-patterns, vector
//! concatenations and the rest.
//!
//! Existential expected types are unpacked into the environment before
//! structural matching, mirroring the subtype-side existential rule.
use indexmap::IndexMap;

use crate::ast::{Expr, ExprKind, Pat, PatKind, Tannot};
use crate::identifier::{Ident, Kid, LocIdent};
use crate::position::TermPos;
use crate::tcenv::{Env, Mutability};
use crate::typ::{names, Integer, KindedId, NConstraint, Nexp, Typ, TypKind};
use crate::typecheck::error::{TcResult, TypeError, TypeErrorKind};
use crate::typecheck::subtyping::{prove, subtyp};
use crate::typecheck::unif::{unify, Unifier};
use crate::typecheck::State;

/// The external exhaustiveness oracle consulted once per `match` or
/// function-clause set, unless a user attribute suppresses the check.
pub trait CompletenessOracle {
    fn is_complete(&self, env: &Env, pats: &[&Pat]) -> bool;
}

/// The conservative default oracle: a clause set is complete exactly when
/// its last pattern is irrefutable.
#[derive(Clone, Copy, Debug, Default)]
pub struct IrrefutableLastArm;

impl CompletenessOracle for IrrefutableLastArm {
    fn is_complete(&self, _env: &Env, pats: &[&Pat]) -> bool {
        pats.last().is_some_and(|pat| pat.is_irrefutable())
    }
}

/// The result of a successful pattern binding.
#[derive(Debug)]
pub struct PatBindData {
    /// The elaborated pattern, annotated at every node.
    pub pat: Pat,
    /// The environment extended with the pattern's bindings.
    pub env: Env,
    /// Guard expressions synthesized for literal sub-patterns, to be
    /// conjoined with the user guard and checked after the match.
    pub guards: Vec<Expr>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BindClass {
    Ordinary,
    Subrange,
}

type Seen = IndexMap<Ident, (TermPos, BindClass)>;

/// Bind `pat` against the expected type `typ`, extending `env`.
pub fn bind(state: &mut State, env: &Env, pat: &Pat, typ: &Typ) -> TcResult<PatBindData> {
    let mut seen = Seen::new();
    let mut guards = Vec::new();
    let (pat, env) = bind_inner(state, env, pat, typ, &mut seen, &mut guards)?;
    Ok(PatBindData { pat, env, guards })
}

fn record_binding(
    seen: &mut Seen,
    id: Ident,
    pos: TermPos,
    class: BindClass,
) -> TcResult<()> {
    if let Some((first, _)) = seen.get(&id) {
        return Err(TypeError::new(
            pos,
            TypeErrorKind::DuplicateBinding {
                id,
                first: *first,
                second: pos,
            },
        ));
    }
    seen.insert(id, (pos, class));
    Ok(())
}

fn bind_inner(
    state: &mut State,
    env: &Env,
    pat: &Pat,
    typ: &Typ,
    seen: &mut Seen,
    guards: &mut Vec<Expr>,
) -> TcResult<(Pat, Env)> {
    let expanded = env.expand_synonyms(typ).simp();
    let (env, typ) = env.unpack_exist(&expanded, pat.pos);
    let annot = |env: &Env| Tannot::new(env.clone(), typ.clone());

    match &pat.kind {
        PatKind::Wild => {
            let elab = Pat::wild(pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Id(id) => {
            // Enumeration members are matches, not bindings.
            if let Some(enum_id) = env.enum_of_member(*id) {
                subtyp(state, &env, &Typ::id(enum_id), &typ, pat.pos)?;
                let elab = Pat::id(*id, pat.pos).with_annot(annot(&env));
                return Ok((elab, env));
            }
            record_binding(seen, *id, pat.pos, BindClass::Ordinary)?;
            let env = env.add_local(*id, Mutability::Immutable, typ.clone());
            let elab = Pat::id(*id, pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Lit(lit) => {
            // Literal patterns become a fresh binding plus an equality
            // guard on the bound variable.
            let fresh = LocIdent::fresh();
            let guard_pos = pat.pos.into_inherited();
            let guard = Expr::app(
                "==",
                vec![
                    Expr::id(fresh.ident(), guard_pos),
                    Expr::lit(lit.clone(), guard_pos),
                ],
                guard_pos,
            );
            guards.push(guard);
            let env = env.add_local(fresh.ident(), Mutability::Immutable, typ.clone());
            let elab = Pat::id(fresh.ident(), pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::As(inner, id) => {
            let (elab_inner, env) = bind_inner(state, &env, inner, &typ, seen, guards)?;
            record_binding(seen, id.ident(), id.pos, BindClass::Ordinary)?;
            let env = env.add_local(id.ident(), Mutability::Immutable, typ.clone());
            let elab = Pat::new(PatKind::As(Box::new(elab_inner), *id), pat.pos)
                .with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Typ(inner, annot_typ) => {
            env.wf_typ(annot_typ)?;
            subtyp(state, &env, &typ, annot_typ, pat.pos)?;
            let (elab_inner, env) = bind_inner(state, &env, inner, annot_typ, seen, guards)?;
            let elab = Pat::new(
                PatKind::Typ(Box::new(elab_inner), annot_typ.clone()),
                pat.pos,
            )
            .with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Tuple(pats) => {
            let elem_typs = match &typ.typ {
                TypKind::Tuple(typs) if typs.len() == pats.len() => typs.clone(),
                _ => {
                    return Err(TypeError::new(
                        pat.pos,
                        TypeErrorKind::Mismatch {
                            expected: typ.clone(),
                            inferred: Typ::tuple(vec![]),
                        },
                    )
                    .because(TypeError::msg(
                        pat.pos,
                        format!("tuple pattern with {} components", pats.len()),
                    )))
                }
            };
            let mut env = env;
            let mut elab_pats = Vec::with_capacity(pats.len());
            for (sub, sub_typ) in pats.iter().zip(elem_typs.iter()) {
                let (elab, next) = bind_inner(state, &env, sub, sub_typ, seen, guards)?;
                elab_pats.push(elab);
                env = next;
            }
            let elab = Pat::new(PatKind::Tuple(elab_pats), pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::App(ctor, pats) => bind_ctor(state, &env, pat, *ctor, pats, &typ, seen, guards),
        PatKind::Vector(pats) => {
            let (len, elem_typ) = vector_shape(&env, &typ).ok_or_else(|| {
                TypeError::msg(pat.pos, format!("vector pattern against type {typ}"))
            })?;
            let actual = Nexp::constant(pats.len() as i64);
            if !prove(
                state,
                &env,
                &NConstraint::nexp_equal(len.clone(), actual.clone()),
            ) {
                return Err(TypeError::new(
                    pat.pos,
                    TypeErrorKind::LengthMismatch {
                        expected: len,
                        actual,
                    },
                ));
            }
            let elem = elem_typ.unwrap_or_else(Typ::bit);
            let mut env = env;
            let mut elab_pats = Vec::with_capacity(pats.len());
            for sub in pats {
                let (elab, next) = bind_inner(state, &env, sub, &elem, seen, guards)?;
                elab_pats.push(elab);
                env = next;
            }
            let elab = Pat::new(PatKind::Vector(elab_pats), pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::VectorConcat(pats) => {
            bind_vector_concat(state, &env, pat, pats, &typ, seen, guards)
        }
        PatKind::VectorSubrange(id, hi, lo) => {
            if hi < lo {
                return Err(TypeError::msg(
                    pat.pos,
                    format!("empty bit range {hi} .. {lo}"),
                ));
            }
            if vector_shape(&env, &typ).is_none() {
                return Err(TypeError::msg(
                    pat.pos,
                    format!("subrange pattern against type {typ}"),
                ));
            }
            record_binding(seen, *id, pat.pos, BindClass::Subrange)?;
            let len = hi - lo + Integer::from(1);
            let env = env.add_local(
                *id,
                Mutability::Immutable,
                Typ::bitvector(Nexp::constant(len)),
            );
            let elab = Pat::new(
                PatKind::VectorSubrange(*id, hi.clone(), lo.clone()),
                pat.pos,
            )
            .with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::List(pats) => {
            let elem_typ = list_elem(&env, &typ).ok_or_else(|| {
                TypeError::msg(pat.pos, format!("list pattern against type {typ}"))
            })?;
            let mut env = env;
            let mut elab_pats = Vec::with_capacity(pats.len());
            for sub in pats {
                let (elab, next) = bind_inner(state, &env, sub, &elem_typ, seen, guards)?;
                elab_pats.push(elab);
                env = next;
            }
            let elab = Pat::new(PatKind::List(elab_pats), pat.pos).with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Cons(head, tail) => {
            let elem_typ = list_elem(&env, &typ).ok_or_else(|| {
                TypeError::msg(pat.pos, format!("cons pattern against type {typ}"))
            })?;
            let (elab_head, env) = bind_inner(state, &env, head, &elem_typ, seen, guards)?;
            let (elab_tail, env) = bind_inner(state, &env, tail, &typ, seen, guards)?;
            let elab = Pat::new(
                PatKind::Cons(Box::new(elab_head), Box::new(elab_tail)),
                pat.pos,
            )
            .with_annot(annot(&env));
            Ok((elab, env))
        }
        PatKind::Or(left, right) => {
            // Each alternative is bound independently; both must introduce
            // the same variables. Guards from both sides are collected.
            let mut seen_left = seen.clone();
            let (elab_left, env_left) =
                bind_inner(state, &env, left, &typ, &mut seen_left, guards)?;
            let mut seen_right = seen.clone();
            let (elab_right, _) =
                bind_inner(state, &env, right, &typ, &mut seen_right, guards)?;

            let left_names: Vec<Ident> =
                seen_left.keys().filter(|id| !seen.contains_key(*id)).copied().collect();
            let right_names: Vec<Ident> =
                seen_right.keys().filter(|id| !seen.contains_key(*id)).copied().collect();
            if left_names != right_names {
                return Err(TypeError::msg(
                    pat.pos,
                    "both sides of an or-pattern must bind the same variables",
                ));
            }
            *seen = seen_left;
            let elab = Pat::new(
                PatKind::Or(Box::new(elab_left), Box::new(elab_right)),
                pat.pos,
            )
            .with_annot(annot(&env_left));
            Ok((elab, env_left))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn bind_ctor(
    state: &mut State,
    env: &Env,
    pat: &Pat,
    ctor: Ident,
    pats: &[Pat],
    typ: &Typ,
    seen: &mut Seen,
    guards: &mut Vec<Expr>,
) -> TcResult<(Pat, Env)> {
    let (_union_id, scheme) = env
        .get_union_ctor(ctor)
        .cloned()
        .ok_or_else(|| TypeError::new(pat.pos, TypeErrorKind::NotBound(ctor)))?;

    // Freshen the constructor's quantifier so its variables cannot collide
    // with anything in scope.
    let mut fresh_map = Unifier::new();
    let mut goals = indexmap::IndexSet::new();
    let mut fresh_kids = Vec::new();
    for kinded in scheme.quant.kinded_ids() {
        let fresh = Kid::fresh(kinded.kid.label());
        fresh_map.insert(kinded.kid, super::var_arg(KindedId::new(fresh, kinded.kind)));
        goals.insert(fresh);
        fresh_kids.push(KindedId::new(fresh, kinded.kind));
    }
    let (arg_template, ret_template) = match &scheme.typ.typ {
        TypKind::Fn(args, ret) if args.len() == 1 => (
            fresh_map.apply_typ(&args[0]),
            fresh_map.apply_typ(ret),
        ),
        _ => {
            return Err(TypeError::msg(
                pat.pos,
                format!("{ctor} is not a unary constructor"),
            ))
        }
    };

    let unifier = unify(state, env, &goals, &ret_template, typ)
        .map_err(|err| err.into_type_error(pat.pos))?;

    // Matching refines: variables the scrutinee type leaves undetermined are
    // bound existentially, and the constructor's constraints are assumed.
    let mut env = env.clone();
    let mut full = unifier;
    for kinded in &fresh_kids {
        if !full.contains(kinded.kid) {
            env = env.add_typ_var(*kinded, pat.pos);
            full.insert(kinded.kid, super::var_arg(*kinded));
        }
    }
    for nc in scheme.quant.constraints() {
        env = env.add_constraint(full.apply_constraint(&fresh_map.apply_constraint(nc)));
    }

    let arg_typ = full.apply_typ(&arg_template);
    let sub_pat = match pats {
        [single] => single.clone(),
        many => Pat::new(PatKind::Tuple(many.to_vec()), pat.pos),
    };
    let (elab_sub, env) = bind_inner(state, &env, &sub_pat, &arg_typ, seen, guards)?;
    let elab = Pat::new(PatKind::App(ctor, vec![elab_sub]), pat.pos)
        .with_annot(Tannot::new(env.clone(), typ.clone()));
    Ok((elab, env))
}

#[allow(clippy::too_many_arguments)]
fn bind_vector_concat(
    state: &mut State,
    env: &Env,
    pat: &Pat,
    pats: &[Pat],
    typ: &Typ,
    seen: &mut Seen,
    guards: &mut Vec<Expr>,
) -> TcResult<(Pat, Env)> {
    let (total, elem_typ) = vector_shape(env, typ).ok_or_else(|| {
        TypeError::msg(pat.pos, format!("vector concatenation against type {typ}"))
    })?;

    let lens: Vec<Option<Nexp>> = pats.iter().map(|p| static_length(env, p)).collect();
    let unknown: Vec<usize> = lens
        .iter()
        .enumerate()
        .filter_map(|(i, len)| len.is_none().then_some(i))
        .collect();

    // At most one sub-pattern may have a length that cannot be statically
    // inferred; its length is solved from the total.
    if unknown.len() >= 2 {
        return Err(TypeError::new(
            pat.pos,
            TypeErrorKind::UninferrableConcat {
                first: pats[unknown[0]].pos,
                second: pats[unknown[1]].pos,
            },
        ));
    }

    let known_sum = lens
        .iter()
        .flatten()
        .cloned()
        .reduce(Nexp::sum)
        .unwrap_or_else(|| Nexp::constant(0));

    let solved: Option<Nexp> = if unknown.is_empty() {
        if !prove(
            state,
            env,
            &NConstraint::nexp_equal(total.clone(), known_sum.clone()),
        ) {
            return Err(TypeError::new(
                pat.pos,
                TypeErrorKind::LengthMismatch {
                    expected: total,
                    actual: known_sum.simp(),
                },
            ));
        }
        None
    } else {
        Some(Nexp::minus(total.clone(), known_sum).simp())
    };

    let mk_sub_typ = |len: Nexp| match &elem_typ {
        Some(elem) => Typ::vector(len, elem.clone()),
        None => Typ::bitvector(len),
    };

    let mut env = env.clone();
    let mut elab_pats = Vec::with_capacity(pats.len());
    for (i, sub) in pats.iter().enumerate() {
        let sub_len = match &lens[i] {
            Some(len) => len.clone(),
            // unwrap(): `solved` is Some exactly when one length is unknown.
            None => solved.clone().unwrap(),
        };
        let (elab, next) = bind_inner(state, &env, sub, &mk_sub_typ(sub_len), seen, guards)?;
        elab_pats.push(elab);
        env = next;
    }
    let elab = Pat::new(PatKind::VectorConcat(elab_pats), pat.pos)
        .with_annot(Tannot::new(env.clone(), typ.clone()));
    Ok((elab, env))
}

/// The length and element type of a vector-like type. `bitvector(n)` has no
/// element type (`None` marks bits).
fn vector_shape(env: &Env, typ: &Typ) -> Option<(Nexp, Option<Typ>)> {
    let typ = env.expand_synonyms(typ);
    match &typ.typ {
        TypKind::App(id, args) if *id == names::bitvector() && args.len() == 1 => {
            args[0].as_nexp().map(|n| (n.clone(), None))
        }
        TypKind::App(id, args) if *id == names::vector() && args.len() == 2 => {
            match (args[0].as_nexp(), args[1].as_typ()) {
                (Some(n), Some(elem)) => Some((n.clone(), Some(elem.clone()))),
                _ => None,
            }
        }
        _ => None,
    }
}

fn list_elem(env: &Env, typ: &Typ) -> Option<Typ> {
    let typ = env.expand_synonyms(typ);
    match &typ.typ {
        TypKind::App(id, args) if *id == names::list() && args.len() == 1 => {
            args[0].as_typ().cloned()
        }
        _ => None,
    }
}

/// The statically inferrable length of a vector sub-pattern, if any.
fn static_length(env: &Env, pat: &Pat) -> Option<Nexp> {
    match &pat.kind {
        PatKind::Lit(lit) => lit
            .bitvector_length()
            .map(|len| Nexp::constant(len as i64)),
        PatKind::Vector(pats) => Some(Nexp::constant(pats.len() as i64)),
        PatKind::VectorConcat(pats) => pats
            .iter()
            .map(|p| static_length(env, p))
            .collect::<Option<Vec<_>>>()
            .map(|lens| {
                lens.into_iter()
                    .reduce(Nexp::sum)
                    .unwrap_or_else(|| Nexp::constant(0))
            }),
        PatKind::As(inner, _) => static_length(env, inner),
        PatKind::Typ(_, typ) => vector_shape(env, typ).map(|(len, _)| len),
        PatKind::VectorSubrange(_, hi, lo) => {
            (hi >= lo).then(|| Nexp::constant(hi - lo + Integer::from(1)))
        }
        _ => None,
    }
}

/// Turn the synthesized guards and an optional user guard into a single
/// conjunction, if any guard exists at all.
pub fn fold_guards(synthesized: Vec<Expr>, user: Option<Expr>) -> Option<Expr> {
    let mut guards = synthesized;
    if let Some(user) = user {
        guards.push(user);
    }
    guards.into_iter().reduce(|acc, guard| {
        let pos = acc.pos.fuse(guard.pos).into_inherited();
        Expr::new(
            ExprKind::App(Ident::new("and_bool"), vec![acc, guard]),
            pos,
        )
    })
}
