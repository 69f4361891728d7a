//! The typing environment.
//!
//! An [`Env`] maps identifiers to their bindings (locals with mutability,
//! registers, enumeration members), type variables to their kinds and
//! introduction sites, and accumulates the path condition — the conjunction
//! of constraints assumed so far — used as the assumption set for every
//! subsequent proof query in the scope.
//!
//! Every environment-returning operation returns a *new* environment value.
//! Callers thread environments explicitly; constraints from an outer scope
//! are visible to nested scopes but never vice versa, simply because a
//! nested scope works on its own copy.
use indexmap::IndexSet;
use log::trace;

use crate::ast::Order;
use crate::environment::Environment;
use crate::identifier::{Ident, Kid, LocIdent};
use crate::position::TermPos;
use crate::solver::Formula;
use crate::typ::{
    names, Kind, KindedId, NConstraint, Nexp, NexpKind, Typ, TypArg, TypArgKind, TypKind,
    TypQuant, TypScheme,
};
use crate::typecheck::error::{TypeError, TypeErrorKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mutability {
    Immutable,
    Mutable,
}

/// What an identifier resolves to. A lookup answers with exactly one of
/// these.
#[derive(Clone, Debug)]
pub enum Binding {
    Local(Mutability, Typ),
    Register(Typ),
    /// A member of the named enumeration.
    EnumMember(Ident),
    Unbound,
}

/// A record definition: quantifier and fields in declaration order.
#[derive(Clone, Debug)]
pub struct RecordDefn {
    pub quant: TypQuant,
    pub fields: Vec<(Typ, Ident)>,
}

/// A variant (tagged union) definition.
#[derive(Clone, Debug)]
pub struct VariantDefn {
    pub quant: TypQuant,
    pub ctors: Vec<(Ident, Typ)>,
}

/// The typing environment. Cloning is cheap (structurally shared layers);
/// the accumulated constraint list is carried by value so that nested scopes
/// naturally drop their refinements on exit.
#[derive(Clone, Debug, Default)]
pub struct Env {
    locals: Environment<Ident, (Mutability, Typ)>,
    registers: Environment<Ident, Typ>,
    typ_vars: Environment<Kid, (Kind, TermPos)>,
    constraints: Vec<NConstraint>,
    enums: Environment<Ident, Vec<Ident>>,
    enum_members: Environment<Ident, Ident>,
    records: Environment<Ident, RecordDefn>,
    variants: Environment<Ident, VariantDefn>,
    union_ctors: Environment<Ident, (Ident, TypScheme)>,
    val_specs: Environment<Ident, TypScheme>,
    overloads: Environment<Ident, Vec<Ident>>,
    synonyms: Environment<Ident, (TypQuant, TypArg)>,
    abstracts: Environment<Ident, Kind>,
    default_order: Order,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    /// The initial environment: the built-in value specifications the rest
    /// of the system is defined against. These are externally implemented
    /// primitives — conversions between sized values and their `itself`
    /// singleton wrapper, the assumption-injection primitive used by
    /// property tooling, and the primitive comparison and arithmetic
    /// operations that literal-pattern guards elaborate to.
    pub fn initial() -> Self {
        let mut env = Env::new();

        let n = Kid::new("n");
        let m = Kid::new("m");
        let p = Kid::new("p");

        let forall = |kids: Vec<KindedId>, constraints: Vec<NConstraint>| {
            let mut items: Vec<_> = kids
                .into_iter()
                .map(crate::typ::QuantItem::KindedId)
                .collect();
            items.extend(constraints.into_iter().map(crate::typ::QuantItem::Constraint));
            TypQuant::new(items, TermPos::None)
        };

        // eq_int : forall 'n 'm. (atom('n), atom('m)) -> atom_bool('n == 'm)
        let eq_int = TypScheme::new(
            forall(vec![KindedId::int(n), KindedId::int(m)], vec![]),
            Typ::func(
                vec![Typ::atom(Nexp::var(n)), Typ::atom(Nexp::var(m))],
                Typ::atom_bool(NConstraint::nexp_equal(Nexp::var(n), Nexp::var(m))),
            ),
        );
        env = env.add_val_spec(Ident::new("eq_int"), eq_int);

        let eq_bool = TypScheme::monomorphic(Typ::func(
            vec![Typ::bool(), Typ::bool()],
            Typ::bool(),
        ));
        env = env.add_val_spec(Ident::new("eq_bool"), eq_bool);

        let eq_string = TypScheme::monomorphic(Typ::func(
            vec![Typ::string(), Typ::string()],
            Typ::bool(),
        ));
        env = env.add_val_spec(Ident::new("eq_string"), eq_string);

        // eq_bits : forall 'n. (bitvector('n), bitvector('n)) -> bool
        let eq_bits = TypScheme::new(
            forall(vec![KindedId::int(n)], vec![]),
            Typ::func(
                vec![
                    Typ::bitvector(Nexp::var(n)),
                    Typ::bitvector(Nexp::var(n)),
                ],
                Typ::bool(),
            ),
        );
        env = env.add_val_spec(Ident::new("eq_bits"), eq_bits);

        env = env.add_overload(
            Ident::new("=="),
            vec![
                Ident::new("eq_int"),
                Ident::new("eq_bool"),
                Ident::new("eq_string"),
                Ident::new("eq_bits"),
            ],
        );

        // add_atom : forall 'n 'm. (atom('n), atom('m)) -> atom('n + 'm)
        let add_atom = TypScheme::new(
            forall(vec![KindedId::int(n), KindedId::int(m)], vec![]),
            Typ::func(
                vec![Typ::atom(Nexp::var(n)), Typ::atom(Nexp::var(m))],
                Typ::atom(Nexp::sum(Nexp::var(n), Nexp::var(m))),
            ),
        );
        env = env.add_val_spec(Ident::new("add_atom"), add_atom);
        env = env.add_overload(Ident::new("+"), vec![Ident::new("add_atom")]);

        // not_bool : forall 'p. atom_bool('p) -> atom_bool(not('p))
        let not_bool = TypScheme::new(
            forall(vec![KindedId::bool(p)], vec![]),
            Typ::func(
                vec![Typ::atom_bool(NConstraint::var(p))],
                Typ::atom_bool(NConstraint::var(p).negate()),
            ),
        );
        env = env.add_val_spec(Ident::new("not_bool"), not_bool);

        // The short-circuit operators are special-cased by the checker; the
        // specs are what uses through overloads fall back to.
        for op in ["and_bool", "or_bool"] {
            let spec = TypScheme::monomorphic(Typ::func(
                vec![Typ::bool(), Typ::bool()],
                Typ::bool(),
            ));
            env = env.add_val_spec(Ident::new(op), spec);
        }

        // itself_to_int : forall 'n. itself('n) -> atom('n)
        let itself_to_int = TypScheme::new(
            forall(vec![KindedId::int(n)], vec![]),
            Typ::func(
                vec![Typ::itself(Nexp::var(n))],
                Typ::atom(Nexp::var(n)),
            ),
        );
        env = env.add_val_spec(Ident::new("itself_to_int"), itself_to_int);

        // int_to_itself : forall 'n. atom('n) -> itself('n)
        let int_to_itself = TypScheme::new(
            forall(vec![KindedId::int(n)], vec![]),
            Typ::func(
                vec![Typ::atom(Nexp::var(n))],
                Typ::itself(Nexp::var(n)),
            ),
        );
        env = env.add_val_spec(Ident::new("int_to_itself"), int_to_itself);

        // assume : bool -> unit
        let assume = TypScheme::monomorphic(Typ::func(vec![Typ::bool()], Typ::unit()));
        env = env.add_val_spec(Ident::new("assume"), assume);

        env
    }

    /// Resolve an identifier. Locals shadow registers, which shadow
    /// enumeration members; a lookup answers with exactly one binding class.
    pub fn lookup(&self, id: Ident) -> Binding {
        if let Some((mutability, typ)) = self.locals.get(&id) {
            Binding::Local(*mutability, typ.clone())
        } else if let Some(typ) = self.registers.get(&id) {
            Binding::Register(typ.clone())
        } else if let Some(enum_id) = self.enum_members.get(&id) {
            Binding::EnumMember(*enum_id)
        } else {
            Binding::Unbound
        }
    }

    pub fn add_local(&self, id: Ident, mutability: Mutability, typ: Typ) -> Env {
        let mut env = self.clone();
        env.locals.insert(id, (mutability, typ));
        env
    }

    pub fn add_register(&self, id: Ident, typ: Typ) -> Env {
        let mut env = self.clone();
        env.registers.insert(id, typ);
        env
    }

    pub fn get_register(&self, id: Ident) -> Option<&Typ> {
        self.registers.get(&id)
    }

    pub fn add_typ_var(&self, kinded: KindedId, pos: TermPos) -> Env {
        let mut env = self.clone();
        env.typ_vars.insert(kinded.kid, (kinded.kind, pos));
        env
    }

    pub fn get_typ_var(&self, kid: Kid) -> Option<Kind> {
        self.typ_vars.get(&kid).map(|(kind, _)| *kind)
    }

    /// The kind and introduction site of a type variable, used by the
    /// shadow-leak check.
    pub fn typ_var_site(&self, kid: Kid) -> Option<(Kind, TermPos)> {
        self.typ_vars.get(&kid).copied()
    }

    /// All type variables in scope, oldest first. Shadowing variables appear
    /// once, with their innermost kind.
    pub fn typ_vars(&self) -> Vec<(Kid, Kind)> {
        self.typ_vars
            .iter()
            .map(|(kid, (kind, _))| (*kid, *kind))
            .collect()
    }

    pub fn add_constraint(&self, nc: NConstraint) -> Env {
        let mut env = self.clone();
        trace!("assuming {nc}");
        env.constraints.push(nc);
        env
    }

    pub fn constraints(&self) -> &[NConstraint] {
        &self.constraints
    }

    pub fn add_enum(&self, id: Ident, members: Vec<Ident>) -> Env {
        let mut env = self.clone();
        for member in &members {
            env.enum_members.insert(*member, id);
        }
        env.enums.insert(id, members);
        env
    }

    pub fn get_enum(&self, id: Ident) -> Option<&Vec<Ident>> {
        self.enums.get(&id)
    }

    pub fn enum_of_member(&self, id: Ident) -> Option<Ident> {
        self.enum_members.get(&id).copied()
    }

    pub fn add_record(&self, id: Ident, quant: TypQuant, fields: Vec<(Typ, Ident)>) -> Env {
        let mut env = self.clone();
        env.records.insert(id, RecordDefn { quant, fields });
        env
    }

    pub fn get_record(&self, id: Ident) -> Option<&RecordDefn> {
        self.records.get(&id)
    }

    /// Register a variant definition along with a constructor scheme for
    /// each of its constructors: `Ctor : forall <quant>. arg -> id(<vars>)`.
    pub fn add_variant(&self, id: Ident, quant: TypQuant, ctors: Vec<(Ident, Typ)>) -> Env {
        let mut env = self.clone();
        let self_typ = variant_self_typ(id, &quant);
        for (ctor, arg_typ) in &ctors {
            let scheme = TypScheme::new(
                quant.clone(),
                Typ::func(vec![arg_typ.clone()], self_typ.clone()),
            );
            env.union_ctors.insert(*ctor, (id, scheme));
        }
        env.variants.insert(id, VariantDefn { quant, ctors });
        env
    }

    pub fn get_variant(&self, id: Ident) -> Option<&VariantDefn> {
        self.variants.get(&id)
    }

    pub fn get_union_ctor(&self, id: Ident) -> Option<&(Ident, TypScheme)> {
        self.union_ctors.get(&id)
    }

    pub fn add_val_spec(&self, id: Ident, scheme: TypScheme) -> Env {
        let mut env = self.clone();
        env.val_specs.insert(id, scheme);
        env
    }

    pub fn get_val_spec(&self, id: Ident) -> Option<&TypScheme> {
        self.val_specs.get(&id)
    }

    /// If `id` is declared as a bidirectional mapping, its two types.
    pub fn get_mapping(&self, id: Ident) -> Option<(TypQuant, Typ, Typ)> {
        let scheme = self.val_specs.get(&id)?;
        match &scheme.typ.typ {
            TypKind::Bidir(t1, t2) => {
                Some((scheme.quant.clone(), (**t1).clone(), (**t2).clone()))
            }
            _ => None,
        }
    }

    /// Extend the overload set of `id`, appending to the members already
    /// registered.
    pub fn add_overload(&self, id: Ident, members: Vec<Ident>) -> Env {
        let mut env = self.clone();
        let mut all = env.overloads.get(&id).cloned().unwrap_or_default();
        all.extend(members);
        env.overloads.insert(id, all);
        env
    }

    pub fn get_overloads(&self, id: Ident) -> Option<&Vec<Ident>> {
        self.overloads.get(&id)
    }

    pub fn add_synonym(&self, id: Ident, quant: TypQuant, arg: TypArg) -> Env {
        let mut env = self.clone();
        env.synonyms.insert(id, (quant, arg));
        env
    }

    pub fn add_abstract(&self, id: Ident, kind: Kind) -> Env {
        let mut env = self.clone();
        env.abstracts.insert(id, kind);
        env
    }

    /// The abstract type constants in scope, forwarded to the solver as
    /// uninterpreted symbols.
    pub fn abstract_typs(&self) -> Vec<Ident> {
        self.abstracts.iter().map(|(id, _)| *id).collect()
    }

    pub fn default_order(&self) -> Order {
        self.default_order
    }

    pub fn set_default_order(&self, order: Order) -> Env {
        let mut env = self.clone();
        env.default_order = order;
        env
    }

    /// Expand type synonyms at the head of `typ`, recursively, and inside
    /// its components. Nexp-level named constants are left alone: they are
    /// either abstract (solver-uninterpreted) or rejected by wellformedness.
    pub fn expand_synonyms(&self, typ: &Typ) -> Typ {
        match &typ.typ {
            TypKind::Id(id) => {
                if let Some((quant, arg)) = self.synonyms.get(id) {
                    if quant.kinded_ids().count() == 0 {
                        if let TypArgKind::Typ(t) = &arg.arg {
                            return self.expand_synonyms(t);
                        }
                    }
                }
                typ.clone()
            }
            TypKind::App(id, args) => {
                let args: Vec<TypArg> = args
                    .iter()
                    .map(|a| match &a.arg {
                        TypArgKind::Typ(t) => TypArg::typ(self.expand_synonyms(t)),
                        _ => a.clone(),
                    })
                    .collect();
                if let Some((quant, arg)) = self.synonyms.get(id) {
                    let params: Vec<KindedId> = quant.kinded_ids().copied().collect();
                    if params.len() == args.len() {
                        let mut expanded = arg.clone();
                        for (param, actual) in params.iter().zip(args.iter()) {
                            expanded = expanded.subst(param.kid, actual);
                        }
                        if let TypArgKind::Typ(t) = &expanded.arg {
                            return self.expand_synonyms(t);
                        }
                    }
                }
                Typ::new(TypKind::App(*id, args), typ.pos)
            }
            TypKind::Tuple(typs) => Typ::new(
                TypKind::Tuple(typs.iter().map(|t| self.expand_synonyms(t)).collect()),
                typ.pos,
            ),
            TypKind::Fn(args, ret) => Typ::new(
                TypKind::Fn(
                    args.iter().map(|t| self.expand_synonyms(t)).collect(),
                    Box::new(self.expand_synonyms(ret)),
                ),
                typ.pos,
            ),
            TypKind::Bidir(t1, t2) => Typ::new(
                TypKind::Bidir(
                    Box::new(self.expand_synonyms(t1)),
                    Box::new(self.expand_synonyms(t2)),
                ),
                typ.pos,
            ),
            TypKind::Exist(kids, nc, body) => Typ::new(
                TypKind::Exist(
                    kids.clone(),
                    nc.clone(),
                    Box::new(self.expand_synonyms(body)),
                ),
                typ.pos,
            ),
            TypKind::Var(_) => typ.clone(),
        }
    }

    /// Unpack an existential type into the environment: its bound variables
    /// become type variables in scope (keeping their names, shadowing any
    /// outer variables of the same name) and its constraint is assumed.
    /// Returns the environment and the body; a non-existential type is
    /// returned unchanged.
    pub fn unpack_exist(&self, typ: &Typ, pos: TermPos) -> (Env, Typ) {
        match &typ.typ {
            TypKind::Exist(kids, nc, body) => {
                let mut env = self.clone();
                for kinded in kids {
                    env = env.add_typ_var(*kinded, pos);
                }
                env = env.add_constraint((**nc).clone());
                // Existentials can nest through synonym expansion.
                env.unpack_exist(&body.clone(), pos)
            }
            _ => (self.clone(), typ.clone()),
        }
    }

    /// Verify that a type computed in `inner` (an extension of `self`) can
    /// escape into `self`'s scope.
    ///
    /// Variables introduced by `inner` and invisible outside are
    /// re-existentialized: the type is wrapped in an existential binding
    /// them, carrying the constraints `inner` accumulated about them. But a
    /// variable whose name is *shadowed* — bound in both environments at
    /// different introduction sites — cannot be soundly rebound, and is
    /// reported as a leak naming both sites.
    pub fn check_shadow_leak(
        &self,
        inner: &Env,
        typ: &Typ,
        pos: TermPos,
    ) -> Result<Typ, TypeError> {
        let mut escaping: Vec<KindedId> = Vec::new();
        for kid in typ.tyvars() {
            let inner_site = inner.typ_var_site(kid);
            let outer_site = self.typ_var_site(kid);
            match (inner_site, outer_site) {
                (Some(site), Some(outer)) if site == outer => {}
                (None, _) => {}
                (Some((kind, _)), None) => escaping.push(KindedId::new(kid, kind)),
                (Some((_, introduced)), Some((_, shadowed))) => {
                    return Err(TypeError::new(
                        pos,
                        TypeErrorKind::ShadowLeak {
                            kid,
                            introduced,
                            shadowed,
                        },
                    ));
                }
            }
        }

        if escaping.is_empty() {
            return Ok(typ.clone());
        }

        // Re-existentialize: keep the constraints the inner scope learned
        // about the escaping variables, as long as they don't mention other
        // inner-only variables that are not escaping along with them.
        let escaping_set: IndexSet<Kid> = escaping.iter().map(|k| k.kid).collect();
        let extra = inner
            .constraints
            .get(self.constraints.len()..)
            .unwrap_or(&[])
            .iter()
            .filter(|nc| {
                let vars = nc.tyvars();
                vars.iter().any(|kid| escaping_set.contains(kid))
                    && vars.iter().all(|kid| {
                        escaping_set.contains(kid) || self.typ_var_site(*kid).is_some()
                    })
            })
            .cloned();
        Ok(Typ::exist(escaping, NConstraint::conj(extra), typ.clone()))
    }

    /// The type variables that reach the solver: `Type`-kinded variables are
    /// excluded, as type arguments only ever compare structurally.
    fn solver_tyvars(&self) -> Vec<(Kid, Kind)> {
        self.typ_vars()
            .into_iter()
            .filter(|(_, kind)| !matches!(kind, Kind::Type))
            .collect()
    }

    /// The formula deciding `assumptions => goal`: its *unsatisfiability*
    /// proves the goal.
    pub fn proof_formula(&self, goal: &NConstraint) -> Formula {
        let constraint = NConstraint::conj(
            self.constraints
                .iter()
                .cloned()
                .chain(std::iter::once(goal.negate())),
        );
        Formula {
            tyvars: self.solver_tyvars(),
            abstracts: self.abstract_typs(),
            constraint: constraint.simp(),
        }
    }

    /// Like [`Env::proof_formula`], but keeping only the assumptions
    /// accepted by `keep`. Used by the power-of-two fallback, which retries
    /// a failed proof with the assumptions mentioning `2 ^ _` stripped out.
    pub fn proof_formula_filtered(
        &self,
        goal: &NConstraint,
        keep: impl Fn(&NConstraint) -> bool,
    ) -> Formula {
        let constraint = NConstraint::conj(
            self.constraints
                .iter()
                .filter(|nc| keep(nc))
                .cloned()
                .chain(std::iter::once(goal.negate())),
        );
        Formula {
            tyvars: self.solver_tyvars(),
            abstracts: self.abstract_typs(),
            constraint: constraint.simp(),
        }
    }

    /// The formula asking whether the current assumptions, extended with
    /// `extra`, are satisfiable at all.
    pub fn sat_formula(&self, extra: impl IntoIterator<Item = NConstraint>) -> Formula {
        let constraint =
            NConstraint::conj(self.constraints.iter().cloned().chain(extra));
        Formula {
            tyvars: self.solver_tyvars(),
            abstracts: self.abstract_typs(),
            constraint: constraint.simp(),
        }
    }

    /// Check that a type is well-formed: every free type variable is bound
    /// in the environment with the kind its position requires, and built-in
    /// and user-defined constructors are applied at the right arity. Must be
    /// invoked before trusting a user-written annotation.
    pub fn wf_typ(&self, typ: &Typ) -> Result<(), TypeError> {
        let typ = self.expand_synonyms(typ);
        match &typ.typ {
            TypKind::Var(kid) => match self.get_typ_var(*kid) {
                Some(Kind::Type) => Ok(()),
                Some(kind) => Err(TypeError::new(
                    typ.pos,
                    TypeErrorKind::Message(format!(
                        "type variable {kid} has kind {kind}, but is used as a type"
                    )),
                )),
                None => Err(TypeError::new(
                    typ.pos,
                    TypeErrorKind::UnboundTypeVariable(*kid),
                )),
            },
            TypKind::Id(id) => {
                if self.typ_id_exists(*id) {
                    Ok(())
                } else {
                    Err(TypeError::new(typ.pos, TypeErrorKind::NotBound(*id)))
                }
            }
            TypKind::App(id, args) => self.wf_app(typ.pos, *id, args),
            TypKind::Tuple(typs) => typs.iter().try_for_each(|t| self.wf_typ(t)),
            TypKind::Fn(args, ret) => {
                args.iter().try_for_each(|t| self.wf_typ(t))?;
                self.wf_typ(ret)
            }
            TypKind::Bidir(t1, t2) => {
                self.wf_typ(t1)?;
                self.wf_typ(t2)
            }
            TypKind::Exist(kids, nc, body) => {
                let mut env = self.clone();
                for kinded in kids.iter() {
                    env = env.add_typ_var(*kinded, typ.pos);
                }
                env.wf_constraint(nc)?;
                env.wf_typ(body)
            }
        }
    }

    fn wf_app(&self, pos: TermPos, id: Ident, args: &[TypArg]) -> Result<(), TypeError> {
        let arity_error = |expected: &str| {
            Err(TypeError::new(
                pos,
                TypeErrorKind::Message(format!(
                    "{id} expects {expected}, but was applied to {} argument(s)",
                    args.len()
                )),
            ))
        };
        let expect_kinds = |kinds: &[Kind]| -> Result<(), TypeError> {
            if args.len() != kinds.len() {
                return arity_error(&format!("{} argument(s)", kinds.len()));
            }
            for (arg, kind) in args.iter().zip(kinds) {
                if arg.kind() != *kind {
                    return Err(TypeError::new(
                        arg.pos,
                        TypeErrorKind::Message(format!(
                            "argument of {id} has kind {}, expected {kind}",
                            arg.kind()
                        )),
                    ));
                }
                self.wf_arg(arg)?;
            }
            Ok(())
        };

        if id == names::atom() || id == names::bitvector() || id == names::implicit()
            || id == names::itself()
        {
            expect_kinds(&[Kind::Int])
        } else if id == names::atom_bool() {
            expect_kinds(&[Kind::Bool])
        } else if id == names::range() {
            expect_kinds(&[Kind::Int, Kind::Int])
        } else if id == names::vector() {
            expect_kinds(&[Kind::Int, Kind::Type])
        } else if id == names::list() {
            expect_kinds(&[Kind::Type])
        } else if let Some(record) = self.records.get(&id) {
            let kinds: Vec<Kind> = record.quant.kinded_ids().map(|k| k.kind).collect();
            expect_kinds(&kinds)
        } else if let Some(variant) = self.variants.get(&id) {
            let kinds: Vec<Kind> = variant.quant.kinded_ids().map(|k| k.kind).collect();
            expect_kinds(&kinds)
        } else {
            Err(TypeError::new(pos, TypeErrorKind::NotBound(id)))
        }
    }

    fn wf_arg(&self, arg: &TypArg) -> Result<(), TypeError> {
        match &arg.arg {
            TypArgKind::Nexp(n) => self.wf_nexp(n),
            TypArgKind::Typ(t) => self.wf_typ(t),
            TypArgKind::Bool(nc) => self.wf_constraint(nc),
        }
    }

    pub fn wf_nexp(&self, nexp: &Nexp) -> Result<(), TypeError> {
        match &nexp.nexp {
            NexpKind::Var(kid) => match self.get_typ_var(*kid) {
                Some(Kind::Int) => Ok(()),
                Some(kind) => Err(TypeError::new(
                    nexp.pos,
                    TypeErrorKind::Message(format!(
                        "type variable {kid} has kind {kind}, but is used as an index"
                    )),
                )),
                None => Err(TypeError::new(
                    nexp.pos,
                    TypeErrorKind::UnboundTypeVariable(*kid),
                )),
            },
            NexpKind::Id(id) => match self.abstracts.get(id) {
                Some(Kind::Int) => Ok(()),
                Some(kind) => Err(TypeError::new(
                    nexp.pos,
                    TypeErrorKind::Message(format!(
                        "abstract type {id} has kind {kind}, but is used as an index"
                    )),
                )),
                None => Err(TypeError::new(nexp.pos, TypeErrorKind::NotBound(*id))),
            },
            NexpKind::Constant(_) => Ok(()),
            NexpKind::App(_, args) => args.iter().try_for_each(|a| self.wf_nexp(a)),
            NexpKind::Sum(e1, e2) | NexpKind::Minus(e1, e2) | NexpKind::Times(e1, e2) => {
                self.wf_nexp(e1)?;
                self.wf_nexp(e2)
            }
            NexpKind::Exp(e) | NexpKind::Neg(e) => self.wf_nexp(e),
            NexpKind::If(c, e1, e2) => {
                self.wf_constraint(c)?;
                self.wf_nexp(e1)?;
                self.wf_nexp(e2)
            }
        }
    }

    pub fn wf_constraint(&self, nc: &NConstraint) -> Result<(), TypeError> {
        use crate::typ::NcKind;
        match &nc.nc {
            NcKind::Equal(a1, a2) | NcKind::NotEqual(a1, a2) => {
                self.wf_arg(a1)?;
                self.wf_arg(a2)
            }
            NcKind::Ge(e1, e2) | NcKind::Gt(e1, e2) | NcKind::Le(e1, e2) | NcKind::Lt(e1, e2) => {
                self.wf_nexp(e1)?;
                self.wf_nexp(e2)
            }
            NcKind::Set(e, _) => self.wf_nexp(e),
            NcKind::And(c1, c2) | NcKind::Or(c1, c2) => {
                self.wf_constraint(c1)?;
                self.wf_constraint(c2)
            }
            NcKind::App(_, args) => args.iter().try_for_each(|a| self.wf_arg(a)),
            NcKind::Var(kid) => match self.get_typ_var(*kid) {
                Some(Kind::Bool) => Ok(()),
                Some(kind) => Err(TypeError::new(
                    nc.pos,
                    TypeErrorKind::Message(format!(
                        "type variable {kid} has kind {kind}, but is used as a constraint"
                    )),
                )),
                None => Err(TypeError::new(
                    nc.pos,
                    TypeErrorKind::UnboundTypeVariable(*kid),
                )),
            },
            NcKind::True | NcKind::False => Ok(()),
        }
    }

    fn typ_id_exists(&self, id: Ident) -> bool {
        const BUILTIN_IDS: &[&str] = &[
            "int",
            "nat",
            "bool",
            "unit",
            "string",
            "string_literal",
            "bit",
        ];
        BUILTIN_IDS.iter().any(|b| Ident::new(b) == id)
            || self.enums.contains_key(&id)
            || self.records.contains_key(&id)
            || self.variants.contains_key(&id)
            || self.synonyms.contains_key(&id)
            || self.abstracts.contains_key(&id)
    }

    /// Register the quantifier of a scheme: its variables enter scope and
    /// its constraints are assumed.
    pub fn add_typ_quant(&self, quant: &TypQuant) -> Env {
        let mut env = self.clone();
        for kinded in quant.kinded_ids() {
            env = env.add_typ_var(*kinded, quant.pos);
        }
        for nc in quant.constraints() {
            env = env.add_constraint(nc.clone());
        }
        env
    }
}

/// The type a variant's constructors construct: `id(<quantifier vars>)`, or
/// the bare `id` for an unparameterized variant.
fn variant_self_typ(id: Ident, quant: &TypQuant) -> Typ {
    let args: Vec<TypArg> = quant
        .kinded_ids()
        .map(|kinded| match kinded.kind {
            Kind::Int => TypArg::nexp(Nexp::var(kinded.kid)),
            Kind::Bool => TypArg::bool(NConstraint::var(kinded.kid)),
            Kind::Type => TypArg::typ(Typ::var(kinded.kid)),
        })
        .collect();
    if args.is_empty() {
        Typ::id(id)
    } else {
        Typ::app(id, args)
    }
}

/// Convenience: build a located identifier list into plain identifiers.
pub fn idents(ids: &[LocIdent]) -> Vec<Ident> {
    ids.iter().map(LocIdent::ident).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn lookup_classes() {
        let env = Env::new()
            .add_local(Ident::new("x"), Mutability::Immutable, Typ::int())
            .add_register(Ident::new("r"), Typ::bitvector(Nexp::constant(32)))
            .add_enum(Ident::new("color"), vec![Ident::new("Red"), Ident::new("Blue")]);

        assert_matches!(
            env.lookup(Ident::new("x")),
            Binding::Local(Mutability::Immutable, _)
        );
        assert_matches!(env.lookup(Ident::new("r")), Binding::Register(_));
        assert_matches!(env.lookup(Ident::new("Red")), Binding::EnumMember(_));
        assert_matches!(env.lookup(Ident::new("y")), Binding::Unbound);
    }

    #[test]
    fn locals_shadow_registers() {
        let env = Env::new()
            .add_register(Ident::new("r"), Typ::int())
            .add_local(Ident::new("r"), Mutability::Mutable, Typ::bool());
        assert_matches!(env.lookup(Ident::new("r")), Binding::Local(_, t) if t == Typ::bool());
    }

    #[test]
    fn constraints_scope_with_values() {
        let outer = Env::new().add_constraint(NConstraint::tru());
        let inner = outer.add_constraint(NConstraint::fls());
        assert_eq!(outer.constraints().len(), 1);
        assert_eq!(inner.constraints().len(), 2);
    }

    #[test]
    fn wf_requires_bound_variables() {
        let n = Kid::new("n");
        let env = Env::new();
        let typ = Typ::atom(Nexp::var(n));
        assert_matches!(
            env.wf_typ(&typ),
            Err(err) if matches!(err.kind, TypeErrorKind::UnboundTypeVariable(_))
        );

        let env = env.add_typ_var(KindedId::int(n), TermPos::None);
        assert!(env.wf_typ(&typ).is_ok());
    }

    #[test]
    fn wf_checks_builtin_arity() {
        let env = Env::new();
        let bad = Typ::app(names::atom(), vec![]);
        assert!(env.wf_typ(&bad).is_err());

        let bad_kind = Typ::app(names::atom(), vec![TypArg::typ(Typ::int())]);
        assert!(env.wf_typ(&bad_kind).is_err());
    }

    #[test]
    fn synonym_expansion() {
        let n = Kid::new("n");
        let quant = TypQuant::new(
            vec![crate::typ::QuantItem::KindedId(KindedId::int(n))],
            TermPos::None,
        );
        let env = Env::new().add_synonym(
            Ident::new("word"),
            quant,
            TypArg::typ(Typ::bitvector(Nexp::var(n))),
        );
        let expanded = env.expand_synonyms(&Typ::app(
            Ident::new("word"),
            vec![TypArg::nexp(Nexp::constant(16))],
        ));
        assert_eq!(expanded, Typ::bitvector(Nexp::constant(16)));
    }

    #[test]
    fn unpack_exist_assumes_constraint() {
        let n = Kid::new("n");
        let typ = Typ::exist(
            [KindedId::int(n)],
            NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
            Typ::atom(Nexp::var(n)),
        );
        let (env, body) = Env::new().unpack_exist(&typ, TermPos::None);
        assert_eq!(body, Typ::atom(Nexp::var(n)));
        assert_eq!(env.constraints().len(), 1);
        assert_eq!(env.get_typ_var(n), Some(Kind::Int));
    }

    #[test]
    fn escaping_variable_is_reexistentialized() {
        let outer = Env::new();
        let n = Kid::new("n");
        let inner = outer
            .add_typ_var(KindedId::int(n), TermPos::None)
            .add_constraint(NConstraint::ge(Nexp::var(n), Nexp::constant(0)));
        let typ = Typ::atom(Nexp::var(n));
        let escaped = outer.check_shadow_leak(&inner, &typ, TermPos::None).unwrap();
        assert!(escaped.as_exist().is_some());
        assert!(escaped.tyvars().is_empty());
    }

    #[test]
    fn shadowed_variable_leak_is_an_error() {
        let mut files = crate::files::Files::new();
        let file = files.add("test.tern", "0123456789");
        let outer_pos =
            TermPos::Original(crate::position::RawSpan::from_range(file, 0..1));
        let inner_pos =
            TermPos::Original(crate::position::RawSpan::from_range(file, 5..6));

        let n = Kid::new("n");
        let outer = Env::new().add_typ_var(KindedId::int(n), outer_pos);
        let inner = outer.add_typ_var(KindedId::int(n), inner_pos);
        let typ = Typ::atom(Nexp::var(n));
        let err = outer
            .check_shadow_leak(&inner, &typ, TermPos::None)
            .unwrap_err();
        assert_matches!(
            err.kind,
            TypeErrorKind::ShadowLeak { kid, introduced, shadowed }
                if kid == n && introduced == inner_pos && shadowed == outer_pos
        );
    }
}
