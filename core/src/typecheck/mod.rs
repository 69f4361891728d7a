//! Typechecking and elaboration.
//!
//! The checker is a bidirectional algorithm with two entry points:
//! [`check`], which checks an expression against an expected type, and
//! [`infer`], which synthesizes a type. Every syntactic form has a rule in
//! at least one mode; checking falls back to "infer, then require the
//! inferred type to be a subtype of the expected one" for forms without a
//! dedicated checking rule.
//!
//! Elaboration and checking are one pass: both entry points return a new
//! syntax tree in which every node carries a [`Tannot`] — the environment in
//! effect, the type, the expected type when checking mode was used, and the
//! instantiation produced for polymorphic calls.
//!
//! # Instantiation
//!
//! Application of a polymorphic function proceeds by (a) solving the simple
//! equations among its quantifier constraints to seed a unifier, (b)
//! propagating a non-existential expected return type backwards, (c) a
//! defer-and-retry fixpoint over the arguments — an argument whose type
//! still mentions unsolved quantifier variables is inferred and unified,
//! deferred on a unification mismatch, and retried until a pass makes no
//! progress — then (d) proving every quantifier constraint under the final
//! substitution and (e) re-existentializing into the return type the
//! introduced variables that survive undetermined.
//!
//! # Errors and recovery
//!
//! No exceptions are used for ordinary control flow. Exactly two kinds of
//! failure are deliberately caught: unification failures (recoverable —
//! they drive instantiation deferral) and general type errors at the two
//! trial boundaries (overload candidates, mapping directions), where every
//! caught failure is preserved and re-surfaced if all alternatives fail.
use indexmap::IndexSet;
use log::trace;

use crate::ast::{
    Completeness, Expr, ExprKind, LetBind, Lit, LValue, LValueKind, MatchArm, MatchData,
    MappingDir, Pat, Tannot,
};
use crate::identifier::{Ident, Kid};
use crate::position::TermPos;
use crate::solver::{Solver, Verdict};
use crate::tcenv::{Binding, Env, Mutability};
use crate::typ::{
    names, KindedId, NConstraint, NcKind, Nexp, NexpKind, Typ, TypArg, TypKind, TypScheme,
};

pub mod defs;
pub mod error;
pub mod pattern;
pub mod subtyping;
pub mod unif;

use error::{TcResult, TypeError, TypeErrorKind};
use pattern::{fold_guards, CompletenessOracle};
use subtyping::{prove, subtyp};
use unif::{merge, unify, Unifier};

/// Checker-wide switches.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// In strict mode, an assignment to an unbound name inside a block is an
    /// error; relaxed (the default), it declares a new mutable binding
    /// scoped to the remainder of the block.
    pub strict_bindings: bool,
    /// Enable the second solver attempt that drops assumptions mentioning
    /// `2 ^ _` terms. Off by default: dropping an assumption is not a sound
    /// inference rule, see [`subtyping`].
    pub pow2_fallback: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            strict_bindings: false,
            pow2_fallback: false,
        }
    }
}

/// The checker's mutable state: the injected solver and exhaustiveness
/// oracle, and the option switches. All typing state proper lives in the
/// threaded [`Env`] values.
pub struct State<'a> {
    pub solver: &'a mut dyn Solver,
    pub oracle: &'a dyn CompletenessOracle,
    pub opts: Options,
}

impl<'a> State<'a> {
    pub fn new(solver: &'a mut dyn Solver, oracle: &'a dyn CompletenessOracle) -> Self {
        State {
            solver,
            oracle,
            opts: Options::default(),
        }
    }

    pub fn with_options(
        solver: &'a mut dyn Solver,
        oracle: &'a dyn CompletenessOracle,
        opts: Options,
    ) -> Self {
        State {
            solver,
            oracle,
            opts,
        }
    }
}

pub(crate) fn var_arg(kinded: KindedId) -> TypArg {
    match kinded.kind {
        crate::typ::Kind::Int => TypArg::nexp(Nexp::var(kinded.kid)),
        crate::typ::Kind::Bool => TypArg::bool(NConstraint::var(kinded.kid)),
        crate::typ::Kind::Type => TypArg::typ(Typ::var(kinded.kid)),
    }
}

/// The type of an elaborated node.
pub(crate) fn typ_of(expr: &Expr) -> &Typ {
    // unwrap(): every expression returned by check/infer carries a filled
    // annotation.
    expr.typ().expect("node has been elaborated")
}

/// Check `expr` against the expected type `typ`.
pub fn check(state: &mut State, env: &Env, expr: &Expr, typ: &Typ) -> TcResult<Expr> {
    let expected = env.expand_synonyms(typ).simp();
    trace!("check {:?} against {expected}", expr.pos);

    match &expr.kind {
        ExprKind::Block(stmts) => {
            let (elab_stmts, block_typ) =
                check_block(state, env, stmts, Some(&expected), expr.pos)?;
            Ok(Expr::new(ExprKind::Block(elab_stmts), expr.pos).with_annot(
                Tannot::new(env.clone(), block_typ).with_expected(expected),
            ))
        }
        ExprKind::If(cond, then_expr, else_expr) => {
            let (elab_cond, cond_nc) = check_condition(state, env, cond)?;
            let (then_env, else_env) = branch_envs(env, &cond_nc);
            let elab_then = check(state, &then_env, then_expr, &expected)?;
            let elab_else = check(state, &else_env, else_expr, &expected)?;
            Ok(Expr::new(
                ExprKind::If(
                    Box::new(elab_cond),
                    Box::new(elab_then),
                    Box::new(elab_else),
                ),
                expr.pos,
            )
            .with_annot(Tannot::new(env.clone(), expected.clone()).with_expected(expected)))
        }
        ExprKind::Match(data) => check_match(state, env, data, Some(&expected), expr.pos),
        ExprKind::Let(bind, body) => check_let(state, env, bind, body, Some(&expected), expr.pos),
        ExprKind::Tuple(exprs) => match &expected.typ {
            TypKind::Tuple(typs) if typs.len() == exprs.len() => {
                let elab: Vec<Expr> = exprs
                    .iter()
                    .zip(typs.iter())
                    .map(|(e, t)| check(state, env, e, t))
                    .collect::<TcResult<_>>()?;
                Ok(Expr::new(ExprKind::Tuple(elab), expr.pos).with_annot(
                    Tannot::new(env.clone(), expected.clone()).with_expected(expected),
                ))
            }
            _ => check_fallback(state, env, expr, &expected),
        },
        ExprKind::Vector(exprs) => check_vector(state, env, exprs, &expected, expr.pos),
        ExprKind::List(exprs) => match list_elem_typ(env, &expected) {
            Some(elem) => {
                let elab: Vec<Expr> = exprs
                    .iter()
                    .map(|e| check(state, env, e, &elem))
                    .collect::<TcResult<_>>()?;
                Ok(Expr::new(ExprKind::List(elab), expr.pos).with_annot(
                    Tannot::new(env.clone(), expected.clone()).with_expected(expected),
                ))
            }
            None => check_fallback(state, env, expr, &expected),
        },
        ExprKind::Cons(head, tail) => match list_elem_typ(env, &expected) {
            Some(elem) => {
                let elab_head = check(state, env, head, &elem)?;
                let elab_tail = check(state, env, tail, &expected)?;
                Ok(Expr::new(
                    ExprKind::Cons(Box::new(elab_head), Box::new(elab_tail)),
                    expr.pos,
                )
                .with_annot(Tannot::new(env.clone(), expected.clone()).with_expected(expected)))
            }
            None => check_fallback(state, env, expr, &expected),
        },
        ExprKind::Annot(inner, annot_typ) => {
            env.wf_typ(annot_typ)?;
            subtyp(state, env, annot_typ, &expected, expr.pos)?;
            let elab = check(state, env, inner, annot_typ)?;
            Ok(Expr::new(
                ExprKind::Annot(Box::new(elab), annot_typ.clone()),
                expr.pos,
            )
            .with_annot(Tannot::new(env.clone(), annot_typ.clone()).with_expected(expected)))
        }
        // An exit never returns, so it checks against any type.
        ExprKind::Exit(inner) => {
            let elab = check(state, env, inner, &Typ::unit())?;
            Ok(Expr::new(ExprKind::Exit(Box::new(elab)), expr.pos).with_annot(
                Tannot::new(env.clone(), expected.clone()).with_expected(expected),
            ))
        }
        ExprKind::App(f, args) => {
            let elab = infer_app(state, env, *f, args, expr.pos, Some(&expected))?;
            let inferred = typ_of(&elab).clone();
            subtyp(state, env, &inferred, &expected, expr.pos).map_err(|cause| {
                TypeError::new(
                    expr.pos,
                    TypeErrorKind::Mismatch {
                        expected: expected.clone(),
                        inferred,
                    },
                )
                .because(cause)
            })?;
            let mut elab = elab;
            elab.annot = elab.annot.with_expected(expected);
            Ok(elab)
        }
        _ => check_fallback(state, env, expr, &expected),
    }
}

/// The universal checking rule: infer, then require the inferred type to be
/// a subtype of the expected one.
fn check_fallback(state: &mut State, env: &Env, expr: &Expr, expected: &Typ) -> TcResult<Expr> {
    let elab = infer(state, env, expr)?;
    let inferred = typ_of(&elab).clone();
    subtyp(state, env, &inferred, expected, expr.pos).map_err(|cause| {
        TypeError::new(
            expr.pos,
            TypeErrorKind::Mismatch {
                expected: expected.clone(),
                inferred: inferred.clone(),
            },
        )
        .because(cause)
    })?;
    let mut elab = elab;
    elab.annot = elab.annot.with_expected(expected.clone());
    Ok(elab)
}

/// Synthesize the type of `expr`.
pub fn infer(state: &mut State, env: &Env, expr: &Expr) -> TcResult<Expr> {
    let annot = |typ: Typ| Tannot::new(env.clone(), typ);
    match &expr.kind {
        ExprKind::Lit(lit) => {
            let typ = infer_lit(lit);
            Ok(Expr::lit(lit.clone(), expr.pos).with_annot(annot(typ)))
        }
        ExprKind::Id(id) => {
            let typ = match env.lookup(*id) {
                Binding::Local(_, typ) | Binding::Register(typ) => typ,
                Binding::EnumMember(enum_id) => Typ::id(enum_id),
                Binding::Unbound => {
                    let kind = if env.get_val_spec(*id).is_some() {
                        TypeErrorKind::BadBinding {
                            id: *id,
                            explanation:
                                "is a function or mapping; apply it to use it".to_owned(),
                        }
                    } else {
                        TypeErrorKind::NotBound(*id)
                    };
                    return Err(TypeError::new(expr.pos, kind));
                }
            };
            Ok(Expr::id(*id, expr.pos).with_annot(annot(typ)))
        }
        ExprKind::App(f, args) => infer_app(state, env, *f, args, expr.pos, None),
        ExprKind::Tuple(exprs) => {
            let elab: Vec<Expr> = exprs
                .iter()
                .map(|e| infer(state, env, e))
                .collect::<TcResult<_>>()?;
            let typ = Typ::tuple(elab.iter().map(|e| typ_of(e).clone()).collect());
            Ok(Expr::new(ExprKind::Tuple(elab), expr.pos).with_annot(annot(typ)))
        }
        ExprKind::If(cond, then_expr, else_expr) => {
            infer_if(state, env, cond, then_expr, else_expr, expr.pos)
        }
        ExprKind::Match(data) => check_match(state, env, data, None, expr.pos),
        ExprKind::Let(bind, body) => check_let(state, env, bind, body, None, expr.pos),
        ExprKind::Block(stmts) => {
            let (elab_stmts, typ) = check_block(state, env, stmts, None, expr.pos)?;
            Ok(Expr::new(ExprKind::Block(elab_stmts), expr.pos).with_annot(annot(typ)))
        }
        ExprKind::Assign(lvalue, rhs) => {
            let (elab_lv, elab_rhs, _env) = check_assign(state, env, lvalue, rhs, false)?;
            Ok(Expr::new(
                ExprKind::Assign(elab_lv, Box::new(elab_rhs)),
                expr.pos,
            )
            .with_annot(annot(Typ::unit())))
        }
        ExprKind::Var(lvalue, init, body) => {
            let x = match &lvalue.kind {
                LValueKind::Id(x) => *x,
                LValueKind::Tuple(_) => {
                    return Err(TypeError::msg(
                        lvalue.pos,
                        "a declaration introduces a single variable",
                    ))
                }
            };
            let elab_init = infer(state, env, init)?;
            let init_typ = widen_singleton(env, typ_of(&elab_init));
            let body_env = env.add_local(x, Mutability::Mutable, init_typ.clone());
            let elab_body = infer(state, &body_env, body)?;
            let body_typ = env.check_shadow_leak(&body_env, typ_of(&elab_body), expr.pos)?;
            let elab_lv = LValue::id(x, lvalue.pos)
                .with_annot(Tannot::new(body_env.clone(), init_typ));
            Ok(Expr::new(
                ExprKind::Var(elab_lv, Box::new(elab_init), Box::new(elab_body)),
                expr.pos,
            )
            .with_annot(annot(body_typ)))
        }
        ExprKind::Vector(exprs) => infer_vector(state, env, exprs, expr.pos),
        ExprKind::List(exprs) => {
            if exprs.is_empty() {
                return Err(TypeError::msg(
                    expr.pos,
                    "cannot infer the element type of an empty list",
                ));
            }
            let elab_first = infer(state, env, &exprs[0])?;
            let elem = widen_singleton(env, typ_of(&elab_first));
            let mut elab = vec![elab_first];
            for e in &exprs[1..] {
                elab.push(check(state, env, e, &elem)?);
            }
            let typ = Typ::list(elem);
            Ok(Expr::new(ExprKind::List(elab), expr.pos).with_annot(annot(typ)))
        }
        ExprKind::Cons(head, tail) => {
            let elab_head = infer(state, env, head)?;
            let elem = widen_singleton(env, typ_of(&elab_head));
            let typ = Typ::list(elem);
            let elab_tail = check(state, env, tail, &typ)?;
            Ok(Expr::new(
                ExprKind::Cons(Box::new(elab_head), Box::new(elab_tail)),
                expr.pos,
            )
            .with_annot(annot(typ)))
        }
        ExprKind::Annot(inner, typ) => {
            env.wf_typ(typ)?;
            let elab = check(state, env, inner, typ)?;
            Ok(Expr::new(ExprKind::Annot(Box::new(elab), typ.clone()), expr.pos)
                .with_annot(annot(typ.clone())))
        }
        ExprKind::Assert(cond, msg) => {
            let (elab_cond, _nc) = check_condition(state, env, cond)?;
            let elab_msg = check(state, env, msg, &Typ::string())?;
            Ok(Expr::new(
                ExprKind::Assert(Box::new(elab_cond), Box::new(elab_msg)),
                expr.pos,
            )
            .with_annot(annot(Typ::unit())))
        }
        ExprKind::Exit(inner) => {
            let elab = check(state, env, inner, &Typ::unit())?;
            Ok(Expr::new(ExprKind::Exit(Box::new(elab)), expr.pos)
                .with_annot(annot(Typ::unit())))
        }
        ExprKind::Field(inner, field) => infer_field(state, env, inner, *field, expr.pos),
        ExprKind::SizeOf(nexp) => infer_sizeof(state, env, nexp, expr.pos),
        ExprKind::Constraint(nc) => {
            env.wf_constraint(nc)?;
            Ok(Expr::new(ExprKind::Constraint(nc.clone()), expr.pos)
                .with_annot(annot(Typ::atom_bool(nc.clone()))))
        }
    }
}

fn infer_lit(lit: &Lit) -> Typ {
    match lit {
        Lit::Unit => Typ::unit(),
        Lit::True => Typ::atom_bool(NConstraint::tru()),
        Lit::False => Typ::atom_bool(NConstraint::fls()),
        Lit::Zero | Lit::One => Typ::bit(),
        Lit::Num(n) => Typ::atom(Nexp::constant(n.clone())),
        Lit::Hex(_) | Lit::Bin(_) => {
            // unwrap(): hex and bin literals always have a bit length.
            let len = lit.bitvector_length().unwrap();
            Typ::bitvector(Nexp::constant(len as i64))
        }
        Lit::String(_) => Typ::string_literal(),
    }
}

/// Elaborate a condition: any subtype of `bool` is accepted, and when the
/// condition's type carries a constraint (`atom_bool(c)`), that constraint
/// is returned for flow typing.
pub(crate) fn check_condition(
    state: &mut State,
    env: &Env,
    cond: &Expr,
) -> TcResult<(Expr, Option<NConstraint>)> {
    let elab = infer(state, env, cond)?;
    let typ = typ_of(&elab).clone();
    subtyp(state, env, &typ, &Typ::bool(), cond.pos).map_err(|cause| {
        TypeError::new(
            cond.pos,
            TypeErrorKind::Mismatch {
                expected: Typ::bool(),
                inferred: typ.clone(),
            },
        )
        .because(cause)
    })?;
    let nc = env.expand_synonyms(&typ).simp().as_atom_bool().cloned();
    Ok((elab, nc))
}

/// The environments for the two branches of a conditional: the condition
/// (or its negation) is assumed in each.
fn branch_envs(env: &Env, cond_nc: &Option<NConstraint>) -> (Env, Env) {
    match cond_nc {
        Some(nc) => (
            env.add_constraint(nc.clone()),
            env.add_constraint(nc.negate()),
        ),
        None => (env.clone(), env.clone()),
    }
}

fn infer_if(
    state: &mut State,
    env: &Env,
    cond: &Expr,
    then_expr: &Expr,
    else_expr: &Expr,
    pos: TermPos,
) -> TcResult<Expr> {
    let (elab_cond, cond_nc) = check_condition(state, env, cond)?;

    // A condition of unrefined type `bool` still flow-types the branches:
    // a fresh boolean variable names the unknown condition, and is bound in
    // the result type if the branches are combined symbolically.
    let (cond_constraint, cond_binder) = match cond_nc {
        Some(nc) => (nc, None),
        None => {
            let p = Kid::fresh("p");
            (NConstraint::var(p), Some(KindedId::bool(p)))
        }
    };
    let mut then_env = env.add_constraint(cond_constraint.clone());
    let mut else_env = env.add_constraint(cond_constraint.negate());
    if let Some(binder) = cond_binder {
        then_env = then_env.add_typ_var(binder, pos);
        else_env = else_env.add_typ_var(binder, pos);
    }

    let elab_then = infer(state, &then_env, then_expr)?;
    let elab_else = infer(state, &else_env, else_expr)?;
    let then_typ = typ_of(&elab_then).clone();
    let else_typ = typ_of(&elab_else).clone();

    // Two simple numeric branches combine symbolically into a conditional
    // index, so `if b then 2 else 4` is `{2, 4}`, not a generic int.
    let typ = match (
        simple_numeric(env, &then_typ),
        simple_numeric(env, &else_typ),
    ) {
        (Some(then_num), Some(else_num)) => {
            let result = Kid::fresh("n");
            let mut kids: Vec<KindedId> = Vec::new();
            let mut constraints: Vec<NConstraint> = Vec::new();
            for branch in [&then_num, &else_num] {
                kids.extend(branch.binders.iter().copied());
                constraints.extend(branch.constraint.iter().cloned());
            }
            kids.push(KindedId::int(result));
            kids.extend(cond_binder);
            constraints.push(NConstraint::nexp_equal(
                Nexp::var(result),
                Nexp::cond(cond_constraint, then_num.index, else_num.index),
            ));
            Typ::exist(kids, NConstraint::conj(constraints), Typ::atom(Nexp::var(result)))
        }
        _ => {
            if subtyp(state, env, &else_typ, &then_typ, pos).is_ok() {
                then_typ
            } else if subtyp(state, env, &then_typ, &else_typ, pos).is_ok() {
                else_typ
            } else {
                return Err(TypeError::new(
                    pos,
                    TypeErrorKind::Mismatch {
                        expected: then_typ,
                        inferred: else_typ,
                    },
                ));
            }
        }
    };

    Ok(Expr::new(
        ExprKind::If(
            Box::new(elab_cond),
            Box::new(elab_then),
            Box::new(elab_else),
        ),
        pos,
    )
    .with_annot(Tannot::new(env.clone(), typ)))
}

/// A numeric type destructed to binders, an optional constraint and a
/// single index expression.
struct SimpleNumeric {
    binders: Vec<KindedId>,
    constraint: Option<NConstraint>,
    index: Nexp,
}

/// Recognize "simple numeric" types: singleton atoms and existentials over
/// a single integer. Binders are freshened so that two branches can be
/// combined without capture.
fn simple_numeric(env: &Env, typ: &Typ) -> Option<SimpleNumeric> {
    let typ = env.expand_synonyms(typ).simp();
    match &typ.typ {
        TypKind::App(id, args) if *id == names::atom() && args.len() == 1 => {
            args[0].as_nexp().map(|index| SimpleNumeric {
                binders: Vec::new(),
                constraint: None,
                index: index.clone(),
            })
        }
        TypKind::Exist(kids, nc, body) => {
            let mut nc = (**nc).clone();
            let mut body = (**body).clone();
            let mut binders = Vec::with_capacity(kids.len());
            for kinded in kids.iter() {
                let fresh = Kid::fresh(kinded.kid.label());
                let arg = var_arg(KindedId::new(fresh, kinded.kind));
                nc = nc.subst(kinded.kid, &arg);
                body = body.subst(kinded.kid, &arg);
                binders.push(KindedId::new(fresh, kinded.kind));
            }
            match &body.typ {
                TypKind::App(id, args) if *id == names::atom() && args.len() == 1 => {
                    args[0].as_nexp().map(|index| SimpleNumeric {
                        binders,
                        constraint: Some(nc.clone()),
                        index: index.clone(),
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn check_match(
    state: &mut State,
    env: &Env,
    data: &MatchData,
    expected: Option<&Typ>,
    pos: TermPos,
) -> TcResult<Expr> {
    if data.arms.is_empty() {
        return Err(TypeError::msg(pos, "match expression with no clauses"));
    }

    let elab_scrutinee = infer(state, env, &data.scrutinee)?;
    let scrutinee_typ = typ_of(&elab_scrutinee).clone();

    let mut result_typ = expected.cloned();
    let mut elab_arms = Vec::with_capacity(data.arms.len());
    for arm in &data.arms {
        let bound = pattern::bind(state, env, &arm.pat, &scrutinee_typ)?;
        let guard = fold_guards(bound.guards, arm.guard.clone());
        let (elab_guard, body_env) = match guard {
            Some(guard) => {
                let (elab_guard, guard_nc) = check_condition(state, &bound.env, &guard)?;
                let body_env = match guard_nc {
                    Some(nc) => bound.env.add_constraint(nc),
                    None => bound.env,
                };
                (Some(elab_guard), body_env)
            }
            None => (None, bound.env),
        };
        let elab_body = match expected {
            Some(typ) => check(state, &body_env, &arm.body, typ)?,
            None => {
                let elab = infer(state, &body_env, &arm.body)?;
                // An arm's type must survive outside the arm's bindings; the
                // types of successive arms are joined.
                let arm_typ = env.check_shadow_leak(&body_env, typ_of(&elab), arm.pos)?;
                result_typ = Some(match result_typ.take() {
                    None => arm_typ,
                    Some(current) => join_branch(state, env, &current, &arm_typ, arm.pos)?,
                });
                elab
            }
        };
        elab_arms.push(MatchArm {
            pat: bound.pat,
            guard: elab_guard,
            body: elab_body,
            pos: arm.pos,
        });
    }

    // A user-provided attribute suppresses the completeness check entirely;
    // otherwise the oracle's verdict is cached on the node.
    let completeness = match data.completeness {
        Some(verdict) => Some(verdict),
        None => {
            let pats: Vec<&Pat> = elab_arms.iter().map(|arm| &arm.pat).collect();
            Some(if state.oracle.is_complete(env, &pats) {
                Completeness::Complete
            } else {
                Completeness::Incomplete
            })
        }
    };

    // unwrap(): there is at least one arm, so the type has been fixed.
    let typ = result_typ.unwrap();
    let mut annot = Tannot::new(env.clone(), typ);
    if let Some(expected) = expected {
        annot = annot.with_expected(expected.clone());
    }
    Ok(Expr::new(
        ExprKind::Match(Box::new(MatchData {
            scrutinee: elab_scrutinee,
            arms: elab_arms,
            completeness,
        })),
        pos,
    )
    .with_annot(annot))
}

/// Join two branch types: the more general of the two under subtyping, or
/// their symbolic union when both are simple numerics.
fn join_branch(state: &mut State, env: &Env, t1: &Typ, t2: &Typ, pos: TermPos) -> TcResult<Typ> {
    if subtyp(state, env, t2, t1, pos).is_ok() {
        return Ok(t1.clone());
    }
    if subtyp(state, env, t1, t2, pos).is_ok() {
        return Ok(t2.clone());
    }
    match (simple_numeric(env, t1), simple_numeric(env, t2)) {
        (Some(a), Some(b)) => {
            let result = Kid::fresh("n");
            let mut kids = a.binders;
            kids.extend(b.binders);
            kids.push(KindedId::int(result));
            let mut constraints: Vec<NConstraint> =
                a.constraint.into_iter().chain(b.constraint).collect();
            constraints.push(NConstraint::or(
                NConstraint::nexp_equal(Nexp::var(result), a.index),
                NConstraint::nexp_equal(Nexp::var(result), b.index),
            ));
            Ok(Typ::exist(
                kids,
                NConstraint::conj(constraints),
                Typ::atom(Nexp::var(result)),
            ))
        }
        _ => Err(TypeError::new(
            pos,
            TypeErrorKind::Mismatch {
                expected: t1.clone(),
                inferred: t2.clone(),
            },
        )),
    }
}

fn check_let(
    state: &mut State,
    env: &Env,
    bind: &LetBind,
    body: &Expr,
    expected: Option<&Typ>,
    pos: TermPos,
) -> TcResult<Expr> {
    let elab_rhs = infer(state, env, &bind.expr)?;
    let rhs_typ = typ_of(&elab_rhs).clone();

    let bound = pattern::bind(state, env, &bind.pat, &rhs_typ)?;
    if !bound.guards.is_empty() {
        return Err(TypeError::msg(
            bind.pat.pos,
            "the pattern of a let binding must be irrefutable",
        ));
    }

    let elab_body = match expected {
        Some(typ) => check(state, &bound.env, body, typ)?,
        None => infer(state, &bound.env, body)?,
    };
    // Whatever the body's type says about variables unpacked by the binding
    // must make sense outside the let.
    let typ = env.check_shadow_leak(&bound.env, typ_of(&elab_body), pos)?;

    let mut annot = Tannot::new(env.clone(), typ);
    if let Some(expected) = expected {
        annot = annot.with_expected(expected.clone());
    }
    Ok(Expr::new(
        ExprKind::Let(
            Box::new(LetBind {
                pat: bound.pat,
                expr: elab_rhs,
                pos: bind.pos,
            }),
            Box::new(elab_body),
        ),
        pos,
    )
    .with_annot(annot))
}

/// Elaborate a block. Non-final statements check against `unit`, except
/// assignments (declaration or update, by binding status) and asserts
/// (which refine the assumption set for the remainder of the block). A
/// provably inconsistent assumption set makes the rest of the block dead:
/// it is still checked, and the elaborated block ends in a synthetic exit
/// carrying the block's expected type.
fn check_block(
    state: &mut State,
    env: &Env,
    stmts: &[Expr],
    expected: Option<&Typ>,
    pos: TermPos,
) -> TcResult<(Vec<Expr>, Typ)> {
    let entry_env = env.clone();
    let mut env = env.clone();
    let mut elab = Vec::with_capacity(stmts.len());
    let mut dead = false;

    if stmts.is_empty() {
        let typ = Typ::unit();
        if let Some(expected) = expected {
            subtyp(state, &env, &typ, expected, pos)?;
        }
        return Ok((elab, typ));
    }

    let mut typ = Typ::unit();
    for (i, stmt) in stmts.iter().enumerate() {
        let is_last = i == stmts.len() - 1;
        if is_last && !dead {
            let e = match expected {
                Some(t) => check(state, &env, stmt, t)?,
                None => infer(state, &env, stmt)?,
            };
            typ = typ_of(&e).clone();
            elab.push(e);
            break;
        }
        match &stmt.kind {
            ExprKind::Assign(lvalue, rhs) => {
                let (elab_lv, elab_rhs, next_env) =
                    check_assign(state, &env, lvalue, rhs, true)?;
                env = next_env;
                elab.push(
                    Expr::new(ExprKind::Assign(elab_lv, Box::new(elab_rhs)), stmt.pos)
                        .with_annot(Tannot::new(env.clone(), Typ::unit())),
                );
            }
            ExprKind::Assert(cond, msg) => {
                let (elab_cond, nc) = check_condition(state, &env, cond)?;
                let elab_msg = check(state, &env, msg, &Typ::string())?;
                if let Some(nc) = nc {
                    env = env.add_constraint(nc);
                    // Inconsistent assumptions: everything after this assert
                    // is unreachable.
                    if !dead && prove(state, &env, &NConstraint::fls()) {
                        dead = true;
                    }
                }
                elab.push(
                    Expr::new(
                        ExprKind::Assert(Box::new(elab_cond), Box::new(elab_msg)),
                        stmt.pos,
                    )
                    .with_annot(Tannot::new(env.clone(), Typ::unit())),
                );
            }
            _ => {
                let e = if is_last {
                    // Dead tail: the final expression no longer produces the
                    // block's value, so it is inferred rather than checked.
                    infer(state, &env, stmt)?
                } else {
                    check(state, &env, stmt, &Typ::unit())?
                };
                elab.push(e);
            }
        }
    }

    if dead {
        typ = expected.cloned().unwrap_or_else(Typ::unit);
        let exit_pos = pos.into_inherited();
        elab.push(
            Expr::new(
                ExprKind::Exit(Box::new(
                    Expr::unit(exit_pos)
                        .with_annot(Tannot::new(env.clone(), Typ::unit())),
                )),
                exit_pos,
            )
            .with_annot(Tannot::new(env.clone(), typ.clone())),
        );
    }

    let typ = entry_env.check_shadow_leak(&env, &typ, pos)?;
    Ok((elab, typ))
}

/// Elaborate an assignment. Whether it declares or updates is a property of
/// the target's current binding status, not of syntax: an unbound target
/// declares a new mutable binding (when `allow_declare` and not in strict
/// mode), a mutable local or register updates, and everything else is a
/// static error at the assignment site.
fn check_assign(
    state: &mut State,
    env: &Env,
    lvalue: &LValue,
    rhs: &Expr,
    allow_declare: bool,
) -> TcResult<(LValue, Expr, Env)> {
    if let LValueKind::Id(x) = &lvalue.kind {
        match env.lookup(*x) {
            Binding::Local(Mutability::Mutable, typ) | Binding::Register(typ) => {
                let elab_rhs = check(state, env, rhs, &typ)?;
                let elab_lv =
                    LValue::id(*x, lvalue.pos).with_annot(Tannot::new(env.clone(), typ));
                return Ok((elab_lv, elab_rhs, env.clone()));
            }
            Binding::Local(Mutability::Immutable, _) => {
                return Err(TypeError::new(
                    lvalue.pos,
                    TypeErrorKind::AssignImmutable { id: *x },
                ));
            }
            Binding::EnumMember(_) => {
                return Err(TypeError::new(
                    lvalue.pos,
                    TypeErrorKind::BadBinding {
                        id: *x,
                        explanation: "is an enumeration member and cannot be assigned"
                            .to_owned(),
                    },
                ));
            }
            Binding::Unbound => {
                if !allow_declare || state.opts.strict_bindings {
                    return Err(TypeError::new(
                        lvalue.pos,
                        TypeErrorKind::NotBound(*x),
                    )
                    .because(TypeError::msg(
                        lvalue.pos,
                        "assignment can only declare a new variable inside a block, \
                         with strict bindings disabled",
                    )));
                }
                let elab_rhs = infer(state, env, rhs)?;
                // A declaration widens singleton literal types, so that the
                // new mutable binding can be updated with other values.
                let typ = widen_singleton(env, typ_of(&elab_rhs));
                let next_env = env.add_local(*x, Mutability::Mutable, typ.clone());
                let elab_lv = LValue::id(*x, lvalue.pos)
                    .with_annot(Tannot::new(next_env.clone(), typ));
                return Ok((elab_lv, elab_rhs, next_env));
            }
        }
    }

    // Tuple targets: infer the right-hand side, then distribute.
    let elab_rhs = infer(state, env, rhs)?;
    let rhs_typ = typ_of(&elab_rhs).clone();
    let (elab_lv, next_env) = bind_lvalue(state, env, lvalue, &rhs_typ, allow_declare)?;
    Ok((elab_lv, elab_rhs, next_env))
}

fn bind_lvalue(
    state: &mut State,
    env: &Env,
    lvalue: &LValue,
    typ: &Typ,
    allow_declare: bool,
) -> TcResult<(LValue, Env)> {
    match &lvalue.kind {
        LValueKind::Id(x) => match env.lookup(*x) {
            Binding::Local(Mutability::Mutable, existing) | Binding::Register(existing) => {
                subtyp(state, env, typ, &existing, lvalue.pos)?;
                let elab =
                    LValue::id(*x, lvalue.pos).with_annot(Tannot::new(env.clone(), existing));
                Ok((elab, env.clone()))
            }
            Binding::Local(Mutability::Immutable, _) => Err(TypeError::new(
                lvalue.pos,
                TypeErrorKind::AssignImmutable { id: *x },
            )),
            Binding::EnumMember(_) => Err(TypeError::new(
                lvalue.pos,
                TypeErrorKind::BadBinding {
                    id: *x,
                    explanation: "is an enumeration member and cannot be assigned".to_owned(),
                },
            )),
            Binding::Unbound => {
                if !allow_declare || state.opts.strict_bindings {
                    return Err(TypeError::new(lvalue.pos, TypeErrorKind::NotBound(*x)));
                }
                let typ = widen_singleton(env, typ);
                let next_env = env.add_local(*x, Mutability::Mutable, typ.clone());
                let elab = LValue::id(*x, lvalue.pos)
                    .with_annot(Tannot::new(next_env.clone(), typ));
                Ok((elab, next_env))
            }
        },
        LValueKind::Tuple(lvalues) => {
            let typs = match &env.expand_synonyms(typ).simp().typ {
                TypKind::Tuple(typs) if typs.len() == lvalues.len() => typs.clone(),
                _ => {
                    return Err(TypeError::msg(
                        lvalue.pos,
                        format!(
                            "tuple assignment target with {} components against type {typ}",
                            lvalues.len()
                        ),
                    ))
                }
            };
            let mut env = env.clone();
            let mut elab = Vec::with_capacity(lvalues.len());
            for (lv, t) in lvalues.iter().zip(typs.iter()) {
                let (elab_lv, next_env) = bind_lvalue(state, &env, lv, t, allow_declare)?;
                elab.push(elab_lv);
                env = next_env;
            }
            let annot = Tannot::new(env.clone(), typ.clone());
            Ok((
                LValue::new(LValueKind::Tuple(elab), lvalue.pos).with_annot(annot),
                env,
            ))
        }
    }
}

fn check_vector(
    state: &mut State,
    env: &Env,
    exprs: &[Expr],
    expected: &Typ,
    pos: TermPos,
) -> TcResult<Expr> {
    let Some((len, elem)) = vector_shape_typ(env, expected) else {
        // Not a directly vector-shaped expectation (e.g. an existential over
        // a bitvector): infer and let subtyping sort it out.
        let expr = Expr::new(ExprKind::Vector(exprs.to_vec()), pos);
        return check_fallback(state, env, &expr, expected);
    };
    let elem = elem.unwrap_or_else(Typ::bit);
    let elab: Vec<Expr> = exprs
        .iter()
        .map(|e| check(state, env, e, &elem))
        .collect::<TcResult<_>>()?;
    let actual = Nexp::constant(exprs.len() as i64);
    if !prove(
        state,
        env,
        &NConstraint::nexp_equal(len.clone(), actual.clone()),
    ) {
        return Err(TypeError::new(
            pos,
            TypeErrorKind::LengthMismatch {
                expected: len,
                actual,
            },
        ));
    }
    Ok(Expr::new(ExprKind::Vector(elab), pos).with_annot(
        Tannot::new(env.clone(), expected.clone()).with_expected(expected.clone()),
    ))
}

fn infer_vector(state: &mut State, env: &Env, exprs: &[Expr], pos: TermPos) -> TcResult<Expr> {
    if exprs.is_empty() {
        return Err(TypeError::msg(
            pos,
            "cannot infer the element type of an empty vector",
        ));
    }
    let elab_first = infer(state, env, &exprs[0])?;
    let elem = widen_singleton(env, typ_of(&elab_first));
    let mut elab = vec![elab_first];
    for e in &exprs[1..] {
        elab.push(check(state, env, e, &elem)?);
    }
    let len = Nexp::constant(exprs.len() as i64);
    let typ = if elem == Typ::bit() {
        Typ::bitvector(len)
    } else {
        Typ::vector(len, elem)
    };
    Ok(Expr::new(ExprKind::Vector(elab), pos).with_annot(Tannot::new(env.clone(), typ)))
}

/// Widen a literal element type so that the remaining elements of a
/// sequence can check against it: singleton numerics widen to `int`,
/// boolean atoms to `bool`, string literals to `string`.
fn widen_singleton(env: &Env, typ: &Typ) -> Typ {
    let typ = env.expand_synonyms(typ).simp();
    if typ.as_atom().is_some() {
        return Typ::int();
    }
    if typ.as_atom_bool().is_some() {
        return Typ::bool();
    }
    if let Some((_, _, body)) = typ.as_exist() {
        if body.as_atom().is_some() {
            return Typ::int();
        }
        if body.as_atom_bool().is_some() {
            return Typ::bool();
        }
    }
    if typ.typ == TypKind::Id(names::string_literal()) {
        return Typ::string();
    }
    typ
}

fn vector_shape_typ(env: &Env, typ: &Typ) -> Option<(Nexp, Option<Typ>)> {
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

fn list_elem_typ(env: &Env, typ: &Typ) -> Option<Typ> {
    let typ = env.expand_synonyms(typ);
    match &typ.typ {
        TypKind::App(id, args) if *id == names::list() && args.len() == 1 => {
            args[0].as_typ().cloned()
        }
        _ => None,
    }
}

fn infer_field(
    state: &mut State,
    env: &Env,
    inner: &Expr,
    field: crate::identifier::LocIdent,
    pos: TermPos,
) -> TcResult<Expr> {
    let elab = infer(state, env, inner)?;
    let typ = env.expand_synonyms(typ_of(&elab)).simp();
    let (inner_env, base) = env.unpack_exist(&typ, pos);

    let (rec_id, args) = match &base.typ {
        TypKind::Id(id) => (*id, Vec::new()),
        TypKind::App(id, args) => (*id, args.clone()),
        _ => {
            return Err(TypeError::msg(
                pos,
                format!("type {typ} has no fields"),
            ))
        }
    };
    let record = inner_env
        .get_record(rec_id)
        .cloned()
        .ok_or_else(|| TypeError::msg(pos, format!("type {typ} has no fields")))?;

    let params: Vec<KindedId> = record.quant.kinded_ids().copied().collect();
    if params.len() != args.len() {
        return Err(TypeError::msg(
            pos,
            format!("{rec_id} applied at the wrong arity"),
        ));
    }
    let mut unifier = Unifier::new();
    for (param, arg) in params.iter().zip(args.iter()) {
        unifier.insert(param.kid, arg.clone());
    }

    let field_typ = record
        .fields
        .iter()
        .find(|(_, id)| *id == field.ident())
        .map(|(typ, _)| unifier.apply_typ(typ))
        .ok_or_else(|| {
            TypeError::msg(
                field.pos,
                format!("{rec_id} has no field named {field}"),
            )
        })?;
    let field_typ = env.check_shadow_leak(&inner_env, &field_typ, pos)?;

    Ok(
        Expr::new(ExprKind::Field(Box::new(elab), field), pos).with_annot(
            Tannot::new(env.clone(), field_typ).with_instantiation(unifier),
        ),
    )
}

/// A `sizeof` expression has the singleton type of its index. When the
/// current assumptions pin the index to a unique integer, the solver's
/// unique-solution query resolves it to that constant.
fn infer_sizeof(state: &mut State, env: &Env, nexp: &Nexp, pos: TermPos) -> TcResult<Expr> {
    env.wf_nexp(nexp)?;
    let simped = nexp.simp();
    let typ = match &simped.nexp {
        NexpKind::Var(kid) => {
            let formula = env.sat_formula(std::iter::empty());
            match state.solver.solve_unique(&formula, *kid) {
                Some(value) => Typ::atom(Nexp::constant(value)),
                None => Typ::atom(simped.clone()),
            }
        }
        _ => Typ::atom(simped.clone()),
    };
    Ok(Expr::new(ExprKind::SizeOf(simped), pos).with_annot(Tannot::new(env.clone(), typ)))
}

// ---------------------------------------------------------------------------
// Application

fn infer_app(
    state: &mut State,
    env: &Env,
    f: Ident,
    args: &[Expr],
    pos: TermPos,
    expected: Option<&Typ>,
) -> TcResult<Expr> {
    // Short-circuit boolean operators get their own rule: the right operand
    // is checked under the refined environment, and its type must be
    // non-empty even though evaluation might skip it.
    if (f == Ident::new("and_bool") || f == Ident::new("or_bool")) && args.len() == 2 {
        return infer_short_circuit(state, env, f, &args[0], &args[1], pos);
    }

    // Union constructor application: multi-argument calls collapse to a
    // single tuple argument.
    if let Some((_, scheme)) = env.get_union_ctor(f).cloned() {
        let arg = tupled(args, pos);
        let (elab_args, typ, unifier) =
            infer_funapp(state, env, f, &scheme, &[arg], pos, expected)?;
        return Ok(Expr::new(ExprKind::App(f, elab_args), pos)
            .with_annot(Tannot::new(env.clone(), typ).with_instantiation(unifier)));
    }

    // Mapping application: the forwards direction is attempted first; only
    // if it fails with a type error is the backwards direction tried, and a
    // double failure reports both attributed to their directions.
    if let Some((quant, t1, t2)) = env.get_mapping(f) {
        let arg = tupled(args, pos);
        let forwards = TypScheme::new(quant.clone(), Typ::func(vec![t1.clone()], t2.clone()));
        match infer_funapp(state, env, f, &forwards, &[arg.clone()], pos, expected) {
            Ok((elab_args, typ, unifier)) => {
                return Ok(Expr::new(ExprKind::App(f, elab_args), pos).with_annot(
                    Tannot::new(env.clone(), typ)
                        .with_instantiation(unifier)
                        .with_direction(MappingDir::Forwards),
                ));
            }
            Err(forwards_err) => {
                let backwards = TypScheme::new(quant, Typ::func(vec![t2], t1));
                match infer_funapp(state, env, f, &backwards, &[arg], pos, expected) {
                    Ok((elab_args, typ, unifier)) => {
                        return Ok(Expr::new(ExprKind::App(f, elab_args), pos).with_annot(
                            Tannot::new(env.clone(), typ)
                                .with_instantiation(unifier)
                                .with_direction(MappingDir::Backwards),
                        ));
                    }
                    Err(backwards_err) => {
                        return Err(TypeError::new(
                            pos,
                            TypeErrorKind::AllFailed(vec![
                                ("forwards".to_owned(), forwards_err),
                                ("backwards".to_owned(), backwards_err),
                            ]),
                        ));
                    }
                }
            }
        }
    }

    // Overloaded identifier: prune candidates by a cheap plausibility
    // filter, then try each remaining candidate in turn. If none succeeds,
    // every failure is reported.
    if let Some(members) = env.get_overloads(f).cloned() {
        let plausible: Vec<Ident> = members
            .iter()
            .copied()
            .filter(|member| candidate_plausible(env, *member, args, expected))
            .collect();
        // The filter is a heuristic: if it rejects everything, fall back to
        // trying the whole set rather than inventing an empty error.
        let candidates = if plausible.is_empty() { members } else { plausible };

        let mut failures: Vec<(String, TypeError)> = Vec::new();
        for member in candidates {
            match infer_app(state, env, member, args, pos, expected) {
                Ok(elab) => return Ok(elab),
                Err(err) => failures.push((member.into_label(), err)),
            }
        }
        return Err(TypeError::new(pos, TypeErrorKind::AllFailed(failures)));
    }

    // A plain function application.
    if let Some(scheme) = env.get_val_spec(f).cloned() {
        let (elab_args, typ, unifier) =
            infer_funapp(state, env, f, &scheme, args, pos, expected)?;
        return Ok(Expr::new(ExprKind::App(f, elab_args), pos)
            .with_annot(Tannot::new(env.clone(), typ).with_instantiation(unifier)));
    }

    Err(TypeError::new(pos, TypeErrorKind::NotBound(f)))
}

/// Collapse a multi-argument application into a single tuple argument.
fn tupled(args: &[Expr], pos: TermPos) -> Expr {
    match args {
        [single] => single.clone(),
        [] => Expr::unit(pos.into_inherited()),
        many => Expr::new(ExprKind::Tuple(many.to_vec()), pos.into_inherited()),
    }
}

fn infer_short_circuit(
    state: &mut State,
    env: &Env,
    op: Ident,
    lhs: &Expr,
    rhs: &Expr,
    pos: TermPos,
) -> TcResult<Expr> {
    let is_and = op == Ident::new("and_bool");
    let (elab_lhs, lhs_nc) = check_condition(state, env, lhs)?;
    let rhs_env = match &lhs_nc {
        Some(nc) => env.add_constraint(if is_and { nc.clone() } else { nc.negate() }),
        None => env.clone(),
    };

    let elab_rhs = infer(state, &rhs_env, rhs)?;
    let rhs_typ = typ_of(&elab_rhs).clone();
    // The right operand's type must be non-empty independent of whether it
    // is dynamically evaluated: an empty type would make the whole
    // expression's type vacuous. An existential type is re-checked against
    // a plain boolean and its constraint checked for satisfiability.
    subtyp(state, &rhs_env, &rhs_typ, &Typ::bool(), rhs.pos)?;
    if let TypKind::Exist(..) = env.expand_synonyms(&rhs_typ).simp().typ {
        let (exist_env, _) = rhs_env.unpack_exist(&rhs_typ, rhs.pos);
        let formula = exist_env.sat_formula(std::iter::empty());
        if state.solver.check(&formula) == Verdict::Unsat {
            return Err(TypeError::new(rhs.pos, TypeErrorKind::EmptyType(rhs_typ)));
        }
    }

    let rhs_nc = env.expand_synonyms(&rhs_typ).simp().as_atom_bool().cloned();
    let typ = match (lhs_nc, rhs_nc) {
        (Some(l), Some(r)) => Typ::atom_bool(if is_and {
            NConstraint::and(l, r)
        } else {
            NConstraint::or(l, r)
        }),
        _ => Typ::bool(),
    };
    Ok(
        Expr::new(ExprKind::App(op, vec![elab_lhs, elab_rhs]), pos)
            .with_annot(Tannot::new(env.clone(), typ)),
    )
}

/// A coarse classification of type heads, used to prune implausible
/// overload candidates cheaply before any elaboration is attempted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum HeadClass {
    Numeric,
    Boolean,
    Stringish,
    Other(Ident),
    Unknown,
}

fn typ_head_class(env: &Env, typ: &Typ) -> HeadClass {
    let typ = env.expand_synonyms(typ).simp();
    match &typ.typ {
        TypKind::App(id, _) | TypKind::Id(id) => {
            let id = *id;
            if id == names::atom() || id == names::range() || id == names::int()
                || id == names::nat()
            {
                HeadClass::Numeric
            } else if id == names::atom_bool() || id == names::bool() {
                HeadClass::Boolean
            } else if id == names::string() || id == names::string_literal() {
                HeadClass::Stringish
            } else {
                HeadClass::Other(id)
            }
        }
        TypKind::Exist(_, _, body) => typ_head_class(env, body),
        _ => HeadClass::Unknown,
    }
}

/// The head class of an argument expression, when it is cheap to see.
fn expr_head_class(env: &Env, expr: &Expr) -> HeadClass {
    match &expr.kind {
        ExprKind::Lit(Lit::Num(_)) => HeadClass::Numeric,
        ExprKind::Lit(Lit::True) | ExprKind::Lit(Lit::False) => HeadClass::Boolean,
        ExprKind::Lit(Lit::String(_)) => HeadClass::Stringish,
        ExprKind::Id(id) => match env.lookup(*id) {
            Binding::Local(_, typ) | Binding::Register(typ) => typ_head_class(env, &typ),
            Binding::EnumMember(enum_id) => HeadClass::Other(enum_id),
            Binding::Unbound => HeadClass::Unknown,
        },
        ExprKind::Annot(_, typ) => typ_head_class(env, typ),
        _ => HeadClass::Unknown,
    }
}

fn heads_compatible(a: HeadClass, b: HeadClass) -> bool {
    match (a, b) {
        (HeadClass::Unknown, _) | (_, HeadClass::Unknown) => true,
        (HeadClass::Other(x), HeadClass::Other(y)) => x == y,
        _ => a == b,
    }
}

/// Cheap plausibility: arity and head-constructor compatibility of the
/// candidate's parameters against the visible argument heads and the
/// expected return head.
fn candidate_plausible(
    env: &Env,
    member: Ident,
    args: &[Expr],
    expected: Option<&Typ>,
) -> bool {
    let Some(scheme) = env.get_val_spec(member).or_else(|| {
        env.get_union_ctor(member).map(|(_, scheme)| scheme)
    }) else {
        return true;
    };
    let (params, ret) = match &scheme.typ.typ {
        TypKind::Fn(params, ret) => (params.clone(), (**ret).clone()),
        TypKind::Bidir(..) => return true,
        _ => return true,
    };

    if let Some(expected) = expected {
        if !heads_compatible(typ_head_class(env, &ret), typ_head_class(env, expected)) {
            return false;
        }
    }

    // Implicit parameters make the candidate's effective arity smaller, and
    // multi-argument applications of constructors are tupled into a single
    // argument, so several arities can line up.
    let explicit = params
        .iter()
        .filter(|p| p.head_id() != Some(names::implicit()))
        .count();
    let arity_ok = params.len() == args.len()
        || explicit == args.len()
        || (explicit == 0 && args.len() <= 1)
        || (params.len() == 1 && args.len() > 1);
    if !arity_ok {
        return false;
    }

    // Head compatibility is only comparable positionally.
    if params.len() == args.len() {
        for (param, arg) in params.iter().zip(args.iter()) {
            if !heads_compatible(typ_head_class(env, param), expr_head_class(env, arg)) {
                return false;
            }
        }
    }
    true
}

/// Instantiate a polymorphic function scheme against the given arguments.
/// Returns the elaborated arguments (synthesized implicits included), the
/// instantiated return type, and the final substitution.
#[allow(clippy::too_many_arguments)]
fn infer_funapp(
    state: &mut State,
    env: &Env,
    f: Ident,
    scheme: &TypScheme,
    args: &[Expr],
    pos: TermPos,
    expected: Option<&Typ>,
) -> TcResult<(Vec<Expr>, Typ, Unifier)> {
    // Freshen the quantifier so the goal variables cannot collide with
    // anything in scope.
    let mut fresh_map = Unifier::new();
    let mut goals: IndexSet<Kid> = IndexSet::new();
    let mut fresh_kids: Vec<KindedId> = Vec::new();
    for kinded in scheme.quant.kinded_ids() {
        let fresh = Kid::fresh(kinded.kid.label());
        fresh_map.insert(kinded.kid, var_arg(KindedId::new(fresh, kinded.kind)));
        goals.insert(fresh);
        fresh_kids.push(KindedId::new(fresh, kinded.kind));
    }
    let quant_constraints: Vec<NConstraint> = scheme
        .quant
        .constraints()
        .map(|nc| fresh_map.apply_constraint(nc))
        .collect();
    let (params, ret_typ) = match &fresh_map.apply_typ(&scheme.typ).typ {
        TypKind::Fn(params, ret) => (params.clone(), (**ret).clone()),
        _ => {
            return Err(TypeError::new(
                pos,
                TypeErrorKind::BadBinding {
                    id: f,
                    explanation: "is not a function".to_owned(),
                },
            ))
        }
    };

    // Split implicit parameters (the `implicit('n)` marker) from the ones
    // the caller supplies positionally.
    let implicit_idx: Vec<usize> = params
        .iter()
        .enumerate()
        .filter_map(|(i, p)| (p.head_id() == Some(names::implicit())).then_some(i))
        .collect();
    let explicit_idx: Vec<usize> = params
        .iter()
        .enumerate()
        .filter_map(|(i, p)| (p.head_id() != Some(names::implicit())).then_some(i))
        .collect();

    // A function whose only parameters are implicit may be called with an
    // explicit unit argument, or with no arguments at all.
    let caller_args: &[Expr] = if explicit_idx.is_empty() {
        match args {
            [] => &[],
            [only] if matches!(only.kind, ExprKind::Lit(Lit::Unit)) => &[],
            _ => {
                return Err(TypeError::msg(
                    pos,
                    format!("{f} takes no explicit arguments"),
                ))
            }
        }
    } else {
        if args.len() != explicit_idx.len() {
            return Err(TypeError::msg(
                pos,
                format!(
                    "{f} expects {} argument(s), but was applied to {}",
                    explicit_idx.len(),
                    args.len()
                ),
            ));
        }
        args
    };

    // (a) Solve the simple equations among the quantifier constraints to
    // seed the unifier.
    let mut unifier = Unifier::new();
    for nc in &quant_constraints {
        if let Some((kid, nexp)) = simple_equation(nc, &goals) {
            if !unifier.contains(kid) {
                unifier.insert(kid, TypArg::nexp(nexp));
            }
        }
    }

    // (b) Propagate the expected return type backwards, unless it is
    // itself existential. Failure here is not an error: the arguments may
    // still determine everything.
    if let Some(expected) = expected {
        if !matches!(expected.typ, TypKind::Exist(..)) {
            if let Ok(u) = unify(state, env, &goals, &ret_typ, expected) {
                if let Ok(merged) = merge(state, env, unifier.clone(), u) {
                    unifier = merged;
                }
            }
        }
    }

    // (c) The defer-and-retry fixpoint over the explicit arguments. Mutual
    // dependency between argument types is tolerated; a full pass without
    // progress reports every deferred argument. Arguments of non-singleton
    // numeric or existential types are opened into `local_env` — their
    // hidden witnesses become type variables the unifier can target and the
    // quantifier proofs can reason about.
    let mut local_env = env.clone();
    let mut elaborated: Vec<Option<Expr>> = vec![None; caller_args.len()];
    let mut deferred: Vec<usize> = (0..caller_args.len()).collect();
    let max_passes = caller_args.len() + 1;
    for _pass in 0..max_passes {
        if deferred.is_empty() {
            break;
        }
        let mut progressed = false;
        let mut still_deferred = Vec::new();
        for &i in &deferred {
            let param_typ = unifier.apply_typ(&params[explicit_idx[i]]);
            let residual: Vec<Kid> = param_typ
                .tyvars()
                .into_iter()
                .filter(|kid| goals.contains(kid) && !unifier.contains(*kid))
                .collect();
            if residual.is_empty() {
                let elab = check(state, &local_env, &caller_args[i], &param_typ)?;
                elaborated[i] = Some(elab);
                progressed = true;
                continue;
            }
            // The parameter type still mentions unsolved goal variables:
            // infer the argument and unify. A unification failure defers
            // the argument to a later pass.
            let elab = infer(state, &local_env, &caller_args[i])?;
            let (opened_env, arg_typ) =
                open_arg_typ(&local_env, typ_of(&elab), caller_args[i].pos);
            match unify(state, &opened_env, &goals, &param_typ, &arg_typ)
                .and_then(|u| merge(state, &opened_env, unifier.clone(), u))
            {
                Ok(merged) => {
                    unifier = merged;
                    local_env = opened_env;
                    elaborated[i] = Some(elab);
                    progressed = true;
                }
                Err(unif_err) => {
                    trace!("deferring argument {i} of {f}: {unif_err}");
                    still_deferred.push(i);
                }
            }
        }
        deferred = still_deferred;
        if !progressed && !deferred.is_empty() {
            return Err(TypeError::new(
                pos,
                TypeErrorKind::UnresolvedArguments(
                    deferred.iter().map(|&i| caller_args[i].pos).collect(),
                ),
            ));
        }
    }
    debug_assert!(deferred.is_empty(), "fixpoint terminated with a non-empty worklist");

    // The variables that survive instantiation and are mentioned by the
    // return type will be re-existentialized; constraints about them are
    // carried into the binder rather than proved.
    let ret_inst = unifier.apply_typ(&ret_typ).simp();
    let surviving: Vec<KindedId> = fresh_kids
        .iter()
        .filter(|kinded| !unifier.contains(kinded.kid))
        .filter(|kinded| ret_inst.tyvars().contains(&kinded.kid))
        .copied()
        .collect();
    let surviving_set: IndexSet<Kid> = surviving.iter().map(|k| k.kid).collect();

    // Implicit arguments are auto-solved from the unifier rather than
    // supplied by the caller.
    let mut implicit_exprs: Vec<(usize, Expr)> = Vec::new();
    for &i in &implicit_idx {
        let param_typ = unifier.apply_typ(&params[i]);
        let index = match &param_typ.typ {
            TypKind::App(id, args) if *id == names::implicit() && args.len() == 1 => {
                args[0].as_nexp().cloned()
            }
            _ => None,
        };
        let index = index.ok_or_else(|| {
            TypeError::msg(pos, format!("malformed implicit parameter of {f}"))
        })?;
        let unsolved: Vec<Kid> = index
            .tyvars()
            .into_iter()
            .filter(|kid| goals.contains(kid) && !unifier.contains(*kid))
            .collect();
        if !unsolved.is_empty() {
            return Err(TypeError::msg(
                pos,
                format!("implicit argument of {f} could not be inferred from the call"),
            ));
        }
        let synth = Expr::new(ExprKind::SizeOf(index.clone()), pos.into_inherited())
            .with_annot(Tannot::new(env.clone(), Typ::atom(index)));
        implicit_exprs.push((i, synth));
    }

    // (d) Every quantifier constraint must hold under the final
    // substitution; constraints about surviving variables travel with the
    // re-existentialized return type instead.
    let mut carried: Vec<NConstraint> = Vec::new();
    let mut unresolved: Vec<NConstraint> = Vec::new();
    for nc in &quant_constraints {
        let inst = unifier.apply_constraint(nc);
        let open: Vec<Kid> = inst
            .tyvars()
            .into_iter()
            .filter(|kid| goals.contains(kid) && !unifier.contains(*kid))
            .collect();
        if open.is_empty() {
            if !prove(state, &local_env, &inst) {
                unresolved.push(inst.simp());
            }
        } else if open.iter().all(|kid| surviving_set.contains(kid)) {
            carried.push(inst);
        } else {
            unresolved.push(inst.simp());
        }
    }
    if !unresolved.is_empty() {
        return Err(TypeError::new(
            pos,
            TypeErrorKind::UnresolvedQuantifiers(unresolved),
        ));
    }

    // (e) Re-existentialize the surviving introduced variables into the
    // return type. The witnesses opened from the arguments escape along
    // with whatever `local_env` learned about them.
    let final_ret = if surviving.is_empty() {
        ret_inst
    } else {
        Typ::exist(surviving, NConstraint::conj(carried), ret_inst)
    };
    let final_ret = env.check_shadow_leak(&local_env, &final_ret, pos)?;

    // Splice the synthesized implicit arguments into parameter order.
    let mut final_args: Vec<Option<Expr>> = (0..params.len()).map(|_| None).collect();
    for (slot, &param_i) in explicit_idx.iter().enumerate() {
        if let Some(elab) = elaborated.get(slot).cloned().flatten() {
            final_args[param_i] = Some(elab);
        }
    }
    for (param_i, synth) in implicit_exprs {
        final_args[param_i] = Some(synth);
    }
    let final_args: Vec<Expr> = final_args.into_iter().flatten().collect();

    Ok((final_args, final_ret, unifier))
}

/// Open an inferred argument type for unification: non-singleton numeric
/// types (`int`, `nat`, `range`) and existentials are destructed so that
/// their hidden witnesses become type variables in the environment, ready
/// to instantiate `atom`-shaped parameters.
fn open_arg_typ(env: &Env, typ: &Typ, pos: TermPos) -> (Env, Typ) {
    let typ = env.expand_synonyms(typ).simp();
    if let Some((opened, index)) = subtyping::destruct_numeric(env, &typ, pos) {
        (opened, Typ::atom(index))
    } else if matches!(typ.typ, TypKind::Exist(..)) {
        env.unpack_exist(&typ, pos)
    } else {
        (env.clone(), typ)
    }
}

/// Recognize quantifier constraints of the form `'n == e` (or `e == 'n`)
/// where `'n` is a goal variable and `e` mentions none: these instantiate
/// `'n` directly.
fn simple_equation(nc: &NConstraint, goals: &IndexSet<Kid>) -> Option<(Kid, Nexp)> {
    let NcKind::Equal(a1, a2) = &nc.nc else {
        return None;
    };
    let (e1, e2) = (a1.as_nexp()?, a2.as_nexp()?);
    let var_side = |e: &Nexp| match e.nexp {
        NexpKind::Var(kid) if goals.contains(&kid) => Some(kid),
        _ => None,
    };
    let closed = |e: &Nexp| e.tyvars().iter().all(|kid| !goals.contains(kid));
    if let Some(kid) = var_side(e1) {
        if closed(e2) {
            return Some((kid, e2.clone()));
        }
    }
    if let Some(kid) = var_side(e2) {
        if closed(e1) {
            return Some((kid, e1.clone()));
        }
    }
    None
}
