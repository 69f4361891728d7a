//! Top-level definition checking.
//!
//! [`check_defs`] threads the environment through a program in declaration
//! order: later definitions see exactly the bindings earlier ones left
//! behind. Function bodies are checked against a previously registered value
//! specification, so recursive (and, with specs declared up front, mutually
//! recursive) calls resolve against the registered scheme.
//!
//! A definition that fails to check aborts the pass: nothing it would have
//! bound reaches subsequent definitions. The one deliberate asymmetry is
//! that a value specification registered before a failing body is not
//! retracted — the overall pass still reports failure.
use log::debug;

use crate::ast::{
    Completeness, Def, DefKind, FunClause, FunDef, LetBind, MapClause, MappingDef, Pat,
    RegisterDef, TypeDef, ValSpec,
};
use crate::tcenv::Env;
use crate::typ::{Typ, TypArgKind, TypKind};
use crate::typecheck::error::{TcResult, TypeError, TypeErrorKind};
use crate::typecheck::pattern;
use crate::typecheck::subtyping::subtyp;
use crate::typecheck::{check, check_condition, infer, typ_of, State};

/// Check a whole program, in declaration order, against an initial
/// environment. Returns the elaborated definitions and the final
/// environment.
pub fn check_defs(state: &mut State, env: Env, defs: &[Def]) -> TcResult<(Vec<Def>, Env)> {
    let mut env = env;
    let mut elaborated = Vec::with_capacity(defs.len());
    for def in defs {
        let (elab, next_env) = check_def(state, &env, def)?;
        elaborated.push(elab);
        env = next_env;
    }
    Ok((elaborated, env))
}

/// Check one definition, returning its elaborated form and the environment
/// for the definitions that follow.
pub fn check_def(state: &mut State, env: &Env, def: &Def) -> TcResult<(Def, Env)> {
    match &def.kind {
        DefKind::ValSpec(spec) => check_val_spec(env, spec, def.pos),
        DefKind::Fun(fundef) => check_fundef(state, env, fundef, def.pos),
        DefKind::Mapping(mapdef) => check_mapping(state, env, mapdef, def.pos),
        DefKind::Type(typedef) => check_typedef(env, typedef, def.pos),
        DefKind::Register(register) => check_register(state, env, register, def.pos),
        DefKind::Let(bind) => check_global_let(state, env, bind, def.pos),
        DefKind::Overload(id, members) => {
            for member in members {
                if env.get_val_spec(*member).is_none() && env.get_union_ctor(*member).is_none() {
                    return Err(TypeError::new(def.pos, TypeErrorKind::NotBound(*member)));
                }
            }
            let env = env.add_overload(id.ident(), members.clone());
            Ok((def.clone(), env))
        }
        DefKind::Default(order) => Ok((def.clone(), env.set_default_order(*order))),
    }
}

fn check_val_spec(env: &Env, spec: &ValSpec, pos: crate::position::TermPos) -> TcResult<(Def, Env)> {
    if env.get_val_spec(spec.id.ident()).is_some() {
        return Err(TypeError::msg(
            spec.id.pos,
            format!("{} already has a value specification", spec.id),
        ));
    }
    let quant_env = env.add_typ_quant(&spec.scheme.quant);
    quant_env.wf_typ(&spec.scheme.typ)?;
    debug!("val {} : {}", spec.id, spec.scheme);
    let env = env.add_val_spec(spec.id.ident(), spec.scheme.clone());
    Ok((
        Def::new(DefKind::ValSpec(spec.clone()), pos),
        env,
    ))
}

fn check_fundef(
    state: &mut State,
    env: &Env,
    fundef: &FunDef,
    pos: crate::position::TermPos,
) -> TcResult<(Def, Env)> {
    let id = fundef.id;
    let scheme = env.get_val_spec(id.ident()).cloned().ok_or_else(|| {
        TypeError::msg(
            id.pos,
            format!("function {id} has no preceding value specification"),
        )
    })?;
    let quant_env = env.add_typ_quant(&scheme.quant);
    let (params, ret_typ) = match &scheme.typ.typ {
        TypKind::Fn(params, ret) => (params.clone(), (**ret).clone()),
        _ => {
            return Err(TypeError::new(
                id.pos,
                TypeErrorKind::BadBinding {
                    id: id.ident(),
                    explanation: "has a value specification that is not a function type"
                        .to_owned(),
                },
            ))
        }
    };
    let pat_typ = match params.as_slice() {
        [single] => single.clone(),
        many => Typ::tuple(many.to_vec()),
    };

    debug!("checking function {id}");
    let mut elab_clauses = Vec::with_capacity(fundef.clauses.len());
    for clause in &fundef.clauses {
        let bound = pattern::bind(state, &quant_env, &clause.pat, &pat_typ)?;
        let guard = pattern::fold_guards(bound.guards, clause.guard.clone());
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
        let elab_body = check(state, &body_env, &clause.body, &ret_typ)?;
        elab_clauses.push(FunClause {
            pat: bound.pat,
            guard: elab_guard,
            body: elab_body,
            pos: clause.pos,
        });
    }

    let completeness = match fundef.completeness {
        Some(verdict) => Some(verdict),
        None => {
            let pats: Vec<&Pat> = elab_clauses.iter().map(|clause| &clause.pat).collect();
            Some(if state.oracle.is_complete(&quant_env, &pats) {
                Completeness::Complete
            } else {
                Completeness::Incomplete
            })
        }
    };

    Ok((
        Def::new(
            DefKind::Fun(FunDef {
                id,
                clauses: elab_clauses,
                completeness,
            }),
            pos,
        ),
        env.clone(),
    ))
}

fn check_mapping(
    state: &mut State,
    env: &Env,
    mapdef: &MappingDef,
    pos: crate::position::TermPos,
) -> TcResult<(Def, Env)> {
    let id = mapdef.id;
    let (quant, left_typ, right_typ) = env.get_mapping(id.ident()).ok_or_else(|| {
        TypeError::msg(
            id.pos,
            format!("mapping {id} has no preceding bidirectional value specification"),
        )
    })?;
    let quant_env = env.add_typ_quant(&quant);

    debug!("checking mapping {id}");
    let mut elab_clauses = Vec::with_capacity(mapdef.clauses.len());
    for clause in &mapdef.clauses {
        let left = pattern::bind(state, &quant_env, &clause.left, &left_typ)?;
        let right = pattern::bind(state, &quant_env, &clause.right, &right_typ)?;

        // Both sides must bind the same variables, at types usable in
        // either direction.
        let left_bound = clause_bindings(&left.pat);
        let right_bound = clause_bindings(&right.pat);
        for id in left_bound.iter().chain(&right_bound) {
            let in_left = left_bound.contains(id);
            let in_right = right_bound.contains(id);
            if !(in_left && in_right) {
                return Err(TypeError::msg(
                    clause.pos,
                    format!("{id} is bound on only one side of the mapping clause"),
                ));
            }
        }
        for var in &left_bound {
            if let (crate::tcenv::Binding::Local(_, t_left), crate::tcenv::Binding::Local(_, t_right)) =
                (left.env.lookup(*var), right.env.lookup(*var))
            {
                subtyp(state, &quant_env, &t_left, &t_right, clause.pos)?;
                subtyp(state, &quant_env, &t_right, &t_left, clause.pos)?;
            }
        }

        // Literal sub-patterns synthesize guards; each side's guards are
        // checked in that side's binding environment.
        if let Some(guard) = pattern::fold_guards(left.guards, None) {
            check_condition(state, &left.env, &guard)?;
        }
        if let Some(guard) = pattern::fold_guards(right.guards, None) {
            check_condition(state, &right.env, &guard)?;
        }

        elab_clauses.push(MapClause {
            left: left.pat,
            right: right.pat,
            pos: clause.pos,
        });
    }

    Ok((
        Def::new(
            DefKind::Mapping(MappingDef {
                id,
                clauses: elab_clauses,
            }),
            pos,
        ),
        env.clone(),
    ))
}

/// The ordinary variables bound by an elaborated pattern, in order.
fn clause_bindings(pat: &Pat) -> Vec<crate::identifier::Ident> {
    use crate::ast::PatKind;
    fn walk(pat: &Pat, out: &mut Vec<crate::identifier::Ident>) {
        match &pat.kind {
            PatKind::Id(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            PatKind::As(inner, id) => {
                walk(inner, out);
                if !out.contains(&id.ident()) {
                    out.push(id.ident());
                }
            }
            PatKind::Typ(inner, _) => walk(inner, out),
            PatKind::Tuple(pats)
            | PatKind::App(_, pats)
            | PatKind::Vector(pats)
            | PatKind::VectorConcat(pats)
            | PatKind::List(pats) => pats.iter().for_each(|p| walk(p, out)),
            PatKind::VectorSubrange(id, _, _) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            PatKind::Cons(head, tail) => {
                walk(head, out);
                walk(tail, out);
            }
            PatKind::Or(left, _) => walk(left, out),
            PatKind::Wild | PatKind::Lit(_) => {}
        }
    }
    let mut out = Vec::new();
    walk(pat, &mut out);
    out
}

fn check_typedef(
    env: &Env,
    typedef: &TypeDef,
    pos: crate::position::TermPos,
) -> TcResult<(Def, Env)> {
    let env = match typedef {
        TypeDef::Record { id, quant, fields } => {
            let quant_env = env.add_typ_quant(quant);
            for (typ, field) in fields {
                quant_env.wf_typ(typ).map_err(|err| {
                    err.because(TypeError::msg(
                        field.pos,
                        format!("in the type of field {field}"),
                    ))
                })?;
            }
            env.add_record(
                id.ident(),
                quant.clone(),
                fields
                    .iter()
                    .map(|(typ, field)| (typ.clone(), field.ident()))
                    .collect(),
            )
        }
        TypeDef::Variant { id, quant, ctors } => {
            let quant_env = env.add_typ_quant(quant);
            for (ctor, typ) in ctors {
                quant_env.wf_typ(typ).map_err(|err| {
                    err.because(TypeError::msg(
                        ctor.pos,
                        format!("in the argument type of constructor {ctor}"),
                    ))
                })?;
            }
            env.add_variant(
                id.ident(),
                quant.clone(),
                ctors
                    .iter()
                    .map(|(ctor, typ)| (ctor.ident(), typ.clone()))
                    .collect(),
            )
        }
        TypeDef::Enum { id, members } => env.add_enum(
            id.ident(),
            members.iter().map(|m| m.ident()).collect(),
        ),
        TypeDef::Abbrev { id, quant, arg } => {
            let quant_env = env.add_typ_quant(quant);
            match &arg.arg {
                TypArgKind::Typ(typ) => quant_env.wf_typ(typ)?,
                TypArgKind::Nexp(nexp) => quant_env.wf_nexp(nexp)?,
                TypArgKind::Bool(nc) => quant_env.wf_constraint(nc)?,
            }
            env.add_synonym(id.ident(), quant.clone(), arg.clone())
        }
        TypeDef::Abstract { id, kind } => env.add_abstract(id.ident(), *kind),
    };
    Ok((Def::new(DefKind::Type(typedef.clone()), pos), env))
}

fn check_register(
    state: &mut State,
    env: &Env,
    register: &RegisterDef,
    pos: crate::position::TermPos,
) -> TcResult<(Def, Env)> {
    env.wf_typ(&register.typ)?;
    let init = register
        .init
        .as_ref()
        .map(|init| check(state, env, init, &register.typ))
        .transpose()?;
    let env = env.add_register(register.id.ident(), register.typ.clone());
    Ok((
        Def::new(
            DefKind::Register(RegisterDef {
                id: register.id,
                typ: register.typ.clone(),
                init,
            }),
            pos,
        ),
        env,
    ))
}

fn check_global_let(
    state: &mut State,
    env: &Env,
    bind: &LetBind,
    pos: crate::position::TermPos,
) -> TcResult<(Def, Env)> {
    let elab_rhs = infer(state, env, &bind.expr)?;
    let rhs_typ = typ_of(&elab_rhs).clone();
    let bound = pattern::bind(state, env, &bind.pat, &rhs_typ)?;
    if !bound.guards.is_empty() {
        return Err(TypeError::msg(
            bind.pat.pos,
            "the pattern of a top-level let must be irrefutable",
        ));
    }
    Ok((
        Def::new(
            DefKind::Let(LetBind {
                pat: bound.pat,
                expr: elab_rhs,
                pos: bind.pos,
            }),
            pos,
        ),
        bound.env,
    ))
}
