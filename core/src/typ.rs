//! Tern static types and the type-level index algebra.
//!
//! The type system of Tern is first-order with lightweight dependent types:
//! types may be indexed by integer expressions ([`Nexp`]) and boolean
//! constraints ([`NConstraint`]). The three building blocks are:
//!
//! - `atom(e)`: the singleton numeric type whose only inhabitant is the value
//!   of the index expression `e`;
//! - `atom_bool(c)`: the singleton boolean type whose inhabitant is the truth
//!   value of the constraint `c` (used for flow typing);
//! - existential types `{'n : Int, c. t}`, hiding index witnesses while still
//!   constraining them.
//!
//! Index expressions and constraints are immutable value types. Two
//! expressions denoting the same integer under every variable assignment are
//! not necessarily syntactically equal: [`Nexp::simp`] computes a normal form
//! that over-approximates syntactic equality of semantically-equal
//! expressions for the common cases (constant folding, flattening of nested
//! sums and products, canonical ordering of commutative operands), but the
//! constraint solver is always the final arbiter. Structural equality is only
//! a fast path.
//!
//! Equality and hashing of every node in this module ignore source positions,
//! so that types can be used as keys (e.g. for solver memoization) and
//! compared structurally without caring where they were written.
use std::fmt;

use indexmap::IndexSet;
use malachite::base::num::arithmetic::traits::Pow;
use malachite::base::num::basic::traits::{One, Zero};
pub use malachite::Integer;
use smallvec::SmallVec;

use crate::identifier::{Ident, Kid};
use crate::position::TermPos;

/// The kind of a type-level entity: an integer index, a boolean constraint,
/// or a proper type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    Int,
    Bool,
    Type,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kind::Int => write!(f, "Int"),
            Kind::Bool => write!(f, "Bool"),
            Kind::Type => write!(f, "Type"),
        }
    }
}

/// A type variable together with its kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct KindedId {
    pub kid: Kid,
    pub kind: Kind,
}

impl KindedId {
    pub fn new(kid: Kid, kind: Kind) -> Self {
        KindedId { kid, kind }
    }

    pub fn int(kid: Kid) -> Self {
        KindedId {
            kid,
            kind: Kind::Int,
        }
    }

    pub fn bool(kid: Kid) -> Self {
        KindedId {
            kid,
            kind: Kind::Bool,
        }
    }
}

impl fmt::Display for KindedId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} : {}", self.kid, self.kind)
    }
}

/// An integer-valued type-level expression (a type index).
#[derive(Clone, Debug)]
pub struct Nexp {
    pub nexp: NexpKind,
    pub pos: TermPos,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum NexpKind {
    /// A type variable of kind `Int`.
    Var(Kid),
    /// A named type-level constant (an abstract type or a synonym of kind
    /// `Int`).
    Id(Ident),
    /// An integer literal.
    Constant(Integer),
    /// A named n-ary application, e.g. `div(n, 8)`. Uninterpreted by the
    /// algebra, forwarded to the solver.
    App(Ident, Vec<Nexp>),
    Sum(Box<Nexp>, Box<Nexp>),
    Minus(Box<Nexp>, Box<Nexp>),
    Times(Box<Nexp>, Box<Nexp>),
    /// `2 ^ e`.
    Exp(Box<Nexp>),
    Neg(Box<Nexp>),
    /// A conditional on a constraint, `if c then e1 else e2`.
    If(Box<NConstraint>, Box<Nexp>, Box<Nexp>),
}

impl PartialEq for Nexp {
    fn eq(&self, other: &Self) -> bool {
        self.nexp == other.nexp
    }
}

impl Eq for Nexp {}

impl std::hash::Hash for Nexp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.nexp.hash(state)
    }
}

impl Nexp {
    pub fn new(nexp: NexpKind, pos: TermPos) -> Self {
        Nexp { nexp, pos }
    }

    pub fn constant(n: impl Into<Integer>) -> Self {
        Nexp::new(NexpKind::Constant(n.into()), TermPos::None)
    }

    pub fn var(kid: Kid) -> Self {
        Nexp::new(NexpKind::Var(kid), TermPos::None)
    }

    pub fn id(id: Ident) -> Self {
        Nexp::new(NexpKind::Id(id), TermPos::None)
    }

    pub fn sum(e1: Nexp, e2: Nexp) -> Self {
        let pos = e1.pos.fuse(e2.pos);
        Nexp::new(NexpKind::Sum(Box::new(e1), Box::new(e2)), pos)
    }

    pub fn minus(e1: Nexp, e2: Nexp) -> Self {
        let pos = e1.pos.fuse(e2.pos);
        Nexp::new(NexpKind::Minus(Box::new(e1), Box::new(e2)), pos)
    }

    pub fn times(e1: Nexp, e2: Nexp) -> Self {
        let pos = e1.pos.fuse(e2.pos);
        Nexp::new(NexpKind::Times(Box::new(e1), Box::new(e2)), pos)
    }

    pub fn exp(e: Nexp) -> Self {
        let pos = e.pos;
        Nexp::new(NexpKind::Exp(Box::new(e)), pos)
    }

    pub fn neg(e: Nexp) -> Self {
        let pos = e.pos;
        Nexp::new(NexpKind::Neg(Box::new(e)), pos)
    }

    pub fn cond(c: NConstraint, e1: Nexp, e2: Nexp) -> Self {
        let pos = e1.pos.fuse(e2.pos);
        Nexp::new(
            NexpKind::If(Box::new(c), Box::new(e1), Box::new(e2)),
            pos,
        )
    }

    pub fn app(id: Ident, args: Vec<Nexp>) -> Self {
        Nexp::new(NexpKind::App(id, args), TermPos::None)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.nexp, NexpKind::Constant(_))
    }

    pub fn as_constant(&self) -> Option<&Integer> {
        match &self.nexp {
            NexpKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// The free type variables of this expression, in first-occurrence
    /// order.
    pub fn tyvars(&self) -> IndexSet<Kid> {
        let mut out = IndexSet::new();
        self.collect_tyvars(&mut out);
        out
    }

    pub(crate) fn collect_tyvars(&self, out: &mut IndexSet<Kid>) {
        match &self.nexp {
            NexpKind::Var(kid) => {
                out.insert(*kid);
            }
            NexpKind::Id(_) | NexpKind::Constant(_) => {}
            NexpKind::App(_, args) => {
                for arg in args {
                    arg.collect_tyvars(out);
                }
            }
            NexpKind::Sum(e1, e2) | NexpKind::Minus(e1, e2) | NexpKind::Times(e1, e2) => {
                e1.collect_tyvars(out);
                e2.collect_tyvars(out);
            }
            NexpKind::Exp(e) | NexpKind::Neg(e) => e.collect_tyvars(out),
            NexpKind::If(c, e1, e2) => {
                c.collect_tyvars(out);
                e1.collect_tyvars(out);
                e2.collect_tyvars(out);
            }
        }
    }

    /// Replace every free occurrence of `kid` by `arg`. Type variables are
    /// globally unique names by construction, so no alpha-renaming is ever
    /// required; substituting a non-`Int` argument at an `Int` position is a
    /// kinding violation that has been ruled out upstream, and leaves the
    /// variable in place.
    pub fn subst(&self, kid: Kid, arg: &TypArg) -> Nexp {
        let nexp = match &self.nexp {
            NexpKind::Var(k) if *k == kid => match &arg.arg {
                TypArgKind::Nexp(n) => return n.clone(),
                _ => NexpKind::Var(*k),
            },
            NexpKind::Var(k) => NexpKind::Var(*k),
            NexpKind::Id(id) => NexpKind::Id(*id),
            NexpKind::Constant(c) => NexpKind::Constant(c.clone()),
            NexpKind::App(id, args) => {
                NexpKind::App(*id, args.iter().map(|a| a.subst(kid, arg)).collect())
            }
            NexpKind::Sum(e1, e2) => NexpKind::Sum(
                Box::new(e1.subst(kid, arg)),
                Box::new(e2.subst(kid, arg)),
            ),
            NexpKind::Minus(e1, e2) => NexpKind::Minus(
                Box::new(e1.subst(kid, arg)),
                Box::new(e2.subst(kid, arg)),
            ),
            NexpKind::Times(e1, e2) => NexpKind::Times(
                Box::new(e1.subst(kid, arg)),
                Box::new(e2.subst(kid, arg)),
            ),
            NexpKind::Exp(e) => NexpKind::Exp(Box::new(e.subst(kid, arg))),
            NexpKind::Neg(e) => NexpKind::Neg(Box::new(e.subst(kid, arg))),
            NexpKind::If(c, e1, e2) => NexpKind::If(
                Box::new(c.subst(kid, arg)),
                Box::new(e1.subst(kid, arg)),
                Box::new(e2.subst(kid, arg)),
            ),
        };
        Nexp::new(nexp, self.pos)
    }

    /// Compute a normal form: constants folded, nested sums and products
    /// flattened with operands in a canonical order, double negations and
    /// trivial conditionals removed. The normal form is stable under
    /// re-normalization.
    pub fn simp(&self) -> Nexp {
        match &self.nexp {
            NexpKind::Var(_) | NexpKind::Id(_) | NexpKind::Constant(_) => self.clone(),
            NexpKind::Sum(..) | NexpKind::Minus(..) | NexpKind::Neg(..) => {
                let mut terms = Vec::new();
                self.collect_sum_terms(false, &mut terms);
                let mut konst = Integer::ZERO;
                let mut rest: Vec<Nexp> = Vec::new();
                for (term, negated) in terms {
                    match term.nexp {
                        NexpKind::Constant(c) => {
                            if negated {
                                konst -= c;
                            } else {
                                konst += c;
                            }
                        }
                        _ => rest.push(if negated {
                            Nexp::new(NexpKind::Neg(Box::new(term)), TermPos::None)
                        } else {
                            term
                        }),
                    }
                }
                rest.sort_by_key(|n| n.to_string());
                let mut iter = rest.into_iter();
                let acc = match iter.next() {
                    None => return Nexp::new(NexpKind::Constant(konst), self.pos),
                    Some(first) => iter.fold(first, Nexp::sum),
                };
                let nexp = if konst == Integer::ZERO {
                    acc.nexp
                } else {
                    NexpKind::Sum(Box::new(acc), Box::new(Nexp::constant(konst)))
                };
                Nexp::new(nexp, self.pos)
            }
            NexpKind::Times(..) => {
                let mut factors = Vec::new();
                self.collect_product_factors(&mut factors);
                let mut konst = Integer::ONE;
                let mut rest: Vec<Nexp> = Vec::new();
                for factor in factors {
                    match factor.nexp {
                        NexpKind::Constant(c) => konst *= c,
                        _ => rest.push(factor),
                    }
                }
                if konst == Integer::ZERO {
                    return Nexp::new(NexpKind::Constant(Integer::ZERO), self.pos);
                }
                rest.sort_by_key(|n| n.to_string());
                let mut iter = rest.into_iter();
                let acc = match iter.next() {
                    None => return Nexp::new(NexpKind::Constant(konst), self.pos),
                    Some(first) => iter.fold(first, Nexp::times),
                };
                let nexp = if konst == Integer::ONE {
                    acc.nexp
                } else {
                    NexpKind::Times(Box::new(Nexp::constant(konst)), Box::new(acc))
                };
                Nexp::new(nexp, self.pos)
            }
            NexpKind::Exp(e) => {
                let e = e.simp();
                if let NexpKind::Constant(c) = &e.nexp {
                    if let Ok(exp) = u64::try_from(c) {
                        // Cap the exponent: a type-level 2^e with a larger
                        // constant is kept symbolic rather than materialized.
                        if exp <= 4096 {
                            return Nexp::new(
                                NexpKind::Constant(Integer::from(2u32).pow(exp)),
                                self.pos,
                            );
                        }
                    }
                }
                Nexp::new(NexpKind::Exp(Box::new(e)), self.pos)
            }
            NexpKind::If(c, e1, e2) => {
                let c = c.simp();
                let e1 = e1.simp();
                let e2 = e2.simp();
                match &c.nc {
                    NcKind::True => e1,
                    NcKind::False => e2,
                    _ if e1 == e2 => e1,
                    _ => Nexp::new(
                        NexpKind::If(Box::new(c), Box::new(e1), Box::new(e2)),
                        self.pos,
                    ),
                }
            }
            NexpKind::App(id, args) => Nexp::new(
                NexpKind::App(*id, args.iter().map(Nexp::simp).collect()),
                self.pos,
            ),
        }
    }

    fn collect_sum_terms(&self, negated: bool, out: &mut Vec<(Nexp, bool)>) {
        match &self.nexp {
            NexpKind::Sum(e1, e2) => {
                e1.collect_sum_terms(negated, out);
                e2.collect_sum_terms(negated, out);
            }
            NexpKind::Minus(e1, e2) => {
                e1.collect_sum_terms(negated, out);
                e2.collect_sum_terms(!negated, out);
            }
            NexpKind::Neg(e) => e.collect_sum_terms(!negated, out),
            _ => {
                let simped = self.simp();
                match simped.nexp {
                    NexpKind::Sum(..) | NexpKind::Minus(..) | NexpKind::Neg(..) => {
                        simped.collect_sum_terms(negated, out)
                    }
                    _ => out.push((simped, negated)),
                }
            }
        }
    }

    fn collect_product_factors(&self, out: &mut Vec<Nexp>) {
        match &self.nexp {
            NexpKind::Times(e1, e2) => {
                e1.collect_product_factors(out);
                e2.collect_product_factors(out);
            }
            _ => {
                let simped = self.simp();
                match simped.nexp {
                    NexpKind::Times(..) => simped.collect_product_factors(out),
                    _ => out.push(simped),
                }
            }
        }
    }
}

impl fmt::Display for Nexp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn atomic(n: &Nexp) -> bool {
            matches!(
                n.nexp,
                NexpKind::Var(_) | NexpKind::Id(_) | NexpKind::Constant(_) | NexpKind::App(..)
            )
        }
        fn paren(n: &Nexp, f: &mut fmt::Formatter) -> fmt::Result {
            if atomic(n) {
                write!(f, "{n}")
            } else {
                write!(f, "({n})")
            }
        }
        match &self.nexp {
            NexpKind::Var(kid) => write!(f, "{kid}"),
            NexpKind::Id(id) => write!(f, "{id}"),
            NexpKind::Constant(c) => write!(f, "{c}"),
            NexpKind::App(id, args) => {
                write!(f, "{id}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            NexpKind::Sum(e1, e2) => {
                paren(e1, f)?;
                write!(f, " + ")?;
                paren(e2, f)
            }
            NexpKind::Minus(e1, e2) => {
                paren(e1, f)?;
                write!(f, " - ")?;
                paren(e2, f)
            }
            NexpKind::Times(e1, e2) => {
                paren(e1, f)?;
                write!(f, " * ")?;
                paren(e2, f)
            }
            NexpKind::Exp(e) => {
                write!(f, "2 ^ ")?;
                paren(e, f)
            }
            NexpKind::Neg(e) => {
                write!(f, "- ")?;
                paren(e, f)
            }
            NexpKind::If(c, e1, e2) => {
                write!(f, "if {c} then ")?;
                paren(e1, f)?;
                write!(f, " else ")?;
                paren(e2, f)
            }
        }
    }
}

/// A boolean-valued type-level proposition over index expressions and type
/// arguments.
#[derive(Clone, Debug)]
pub struct NConstraint {
    pub nc: NcKind,
    pub pos: TermPos,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum NcKind {
    /// Equality of two type arguments (indices, constraints or types).
    Equal(TypArg, TypArg),
    NotEqual(TypArg, TypArg),
    Ge(Nexp, Nexp),
    Gt(Nexp, Nexp),
    Le(Nexp, Nexp),
    Lt(Nexp, Nexp),
    /// Set membership, `e in {c1, .., cn}`.
    Set(Nexp, Vec<Integer>),
    And(Box<NConstraint>, Box<NConstraint>),
    Or(Box<NConstraint>, Box<NConstraint>),
    /// A named n-ary application, uninterpreted by the algebra. `not(c)` is
    /// the conventional spelling of a negation that cannot be pushed
    /// structurally.
    App(Ident, Vec<TypArg>),
    /// A type variable of kind `Bool`.
    Var(Kid),
    True,
    False,
}

impl PartialEq for NConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.nc == other.nc
    }
}

impl Eq for NConstraint {}

impl std::hash::Hash for NConstraint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.nc.hash(state)
    }
}

impl NConstraint {
    pub fn new(nc: NcKind, pos: TermPos) -> Self {
        NConstraint { nc, pos }
    }

    pub fn tru() -> Self {
        NConstraint::new(NcKind::True, TermPos::None)
    }

    pub fn fls() -> Self {
        NConstraint::new(NcKind::False, TermPos::None)
    }

    pub fn var(kid: Kid) -> Self {
        NConstraint::new(NcKind::Var(kid), TermPos::None)
    }

    pub fn equal(a1: TypArg, a2: TypArg) -> Self {
        NConstraint::new(NcKind::Equal(a1, a2), TermPos::None)
    }

    pub fn nexp_equal(e1: Nexp, e2: Nexp) -> Self {
        NConstraint::equal(TypArg::nexp(e1), TypArg::nexp(e2))
    }

    pub fn not_equal(a1: TypArg, a2: TypArg) -> Self {
        NConstraint::new(NcKind::NotEqual(a1, a2), TermPos::None)
    }

    pub fn ge(e1: Nexp, e2: Nexp) -> Self {
        NConstraint::new(NcKind::Ge(e1, e2), TermPos::None)
    }

    pub fn gt(e1: Nexp, e2: Nexp) -> Self {
        NConstraint::new(NcKind::Gt(e1, e2), TermPos::None)
    }

    pub fn le(e1: Nexp, e2: Nexp) -> Self {
        NConstraint::new(NcKind::Le(e1, e2), TermPos::None)
    }

    pub fn lt(e1: Nexp, e2: Nexp) -> Self {
        NConstraint::new(NcKind::Lt(e1, e2), TermPos::None)
    }

    pub fn set(e: Nexp, values: Vec<Integer>) -> Self {
        NConstraint::new(NcKind::Set(e, values), TermPos::None)
    }

    pub fn and(c1: NConstraint, c2: NConstraint) -> Self {
        let pos = c1.pos.fuse(c2.pos);
        NConstraint::new(NcKind::And(Box::new(c1), Box::new(c2)), pos)
    }

    pub fn or(c1: NConstraint, c2: NConstraint) -> Self {
        let pos = c1.pos.fuse(c2.pos);
        NConstraint::new(NcKind::Or(Box::new(c1), Box::new(c2)), pos)
    }

    pub fn app(id: Ident, args: Vec<TypArg>) -> Self {
        NConstraint::new(NcKind::App(id, args), TermPos::None)
    }

    /// Conjoin a sequence of constraints, folding away trivial `true`s.
    pub fn conj(constraints: impl IntoIterator<Item = NConstraint>) -> NConstraint {
        let mut acc: Option<NConstraint> = None;
        for c in constraints {
            if matches!(c.nc, NcKind::True) {
                continue;
            }
            acc = Some(match acc {
                None => c,
                Some(prev) => NConstraint::and(prev, c),
            });
        }
        acc.unwrap_or_else(NConstraint::tru)
    }

    pub fn is_true(&self) -> bool {
        matches!(self.nc, NcKind::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self.nc, NcKind::False)
    }

    pub fn tyvars(&self) -> IndexSet<Kid> {
        let mut out = IndexSet::new();
        self.collect_tyvars(&mut out);
        out
    }

    pub(crate) fn collect_tyvars(&self, out: &mut IndexSet<Kid>) {
        match &self.nc {
            NcKind::Equal(a1, a2) | NcKind::NotEqual(a1, a2) => {
                a1.collect_tyvars(out);
                a2.collect_tyvars(out);
            }
            NcKind::Ge(e1, e2) | NcKind::Gt(e1, e2) | NcKind::Le(e1, e2) | NcKind::Lt(e1, e2) => {
                e1.collect_tyvars(out);
                e2.collect_tyvars(out);
            }
            NcKind::Set(e, _) => e.collect_tyvars(out),
            NcKind::And(c1, c2) | NcKind::Or(c1, c2) => {
                c1.collect_tyvars(out);
                c2.collect_tyvars(out);
            }
            NcKind::App(_, args) => {
                for arg in args {
                    arg.collect_tyvars(out);
                }
            }
            NcKind::Var(kid) => {
                out.insert(*kid);
            }
            NcKind::True | NcKind::False => {}
        }
    }

    pub fn subst(&self, kid: Kid, arg: &TypArg) -> NConstraint {
        let nc = match &self.nc {
            NcKind::Equal(a1, a2) => NcKind::Equal(a1.subst(kid, arg), a2.subst(kid, arg)),
            NcKind::NotEqual(a1, a2) => NcKind::NotEqual(a1.subst(kid, arg), a2.subst(kid, arg)),
            NcKind::Ge(e1, e2) => NcKind::Ge(e1.subst(kid, arg), e2.subst(kid, arg)),
            NcKind::Gt(e1, e2) => NcKind::Gt(e1.subst(kid, arg), e2.subst(kid, arg)),
            NcKind::Le(e1, e2) => NcKind::Le(e1.subst(kid, arg), e2.subst(kid, arg)),
            NcKind::Lt(e1, e2) => NcKind::Lt(e1.subst(kid, arg), e2.subst(kid, arg)),
            NcKind::Set(e, values) => NcKind::Set(e.subst(kid, arg), values.clone()),
            NcKind::And(c1, c2) => NcKind::And(
                Box::new(c1.subst(kid, arg)),
                Box::new(c2.subst(kid, arg)),
            ),
            NcKind::Or(c1, c2) => NcKind::Or(
                Box::new(c1.subst(kid, arg)),
                Box::new(c2.subst(kid, arg)),
            ),
            NcKind::App(id, args) => {
                NcKind::App(*id, args.iter().map(|a| a.subst(kid, arg)).collect())
            }
            NcKind::Var(k) if *k == kid => match &arg.arg {
                TypArgKind::Bool(nc) => return (**nc).clone(),
                _ => NcKind::Var(*k),
            },
            NcKind::Var(k) => NcKind::Var(*k),
            NcKind::True => NcKind::True,
            NcKind::False => NcKind::False,
        };
        NConstraint::new(nc, self.pos)
    }

    /// Compute a normal form, folding ground relations and trivial boolean
    /// connectives.
    pub fn simp(&self) -> NConstraint {
        let nc = match &self.nc {
            NcKind::Equal(a1, a2) => {
                let (a1, a2) = (a1.simp(), a2.simp());
                if a1 == a2 {
                    NcKind::True
                } else if let (Some(c1), Some(c2)) = (a1.as_constant(), a2.as_constant()) {
                    if c1 == c2 {
                        NcKind::True
                    } else {
                        NcKind::False
                    }
                } else {
                    NcKind::Equal(a1, a2)
                }
            }
            NcKind::NotEqual(a1, a2) => {
                let (a1, a2) = (a1.simp(), a2.simp());
                if a1 == a2 {
                    NcKind::False
                } else if let (Some(c1), Some(c2)) = (a1.as_constant(), a2.as_constant()) {
                    if c1 == c2 {
                        NcKind::False
                    } else {
                        NcKind::True
                    }
                } else {
                    NcKind::NotEqual(a1, a2)
                }
            }
            NcKind::Ge(e1, e2) => Self::simp_order(e1, e2, NcKind::Ge, |o| o.is_ge()),
            NcKind::Gt(e1, e2) => Self::simp_order(e1, e2, NcKind::Gt, |o| o.is_gt()),
            NcKind::Le(e1, e2) => Self::simp_order(e1, e2, NcKind::Le, |o| o.is_le()),
            NcKind::Lt(e1, e2) => Self::simp_order(e1, e2, NcKind::Lt, |o| o.is_lt()),
            NcKind::Set(e, values) => {
                let e = e.simp();
                match e.as_constant() {
                    Some(c) if values.contains(c) => NcKind::True,
                    Some(_) => NcKind::False,
                    None => NcKind::Set(e, values.clone()),
                }
            }
            NcKind::And(c1, c2) => {
                let (c1, c2) = (c1.simp(), c2.simp());
                match (&c1.nc, &c2.nc) {
                    (NcKind::False, _) | (_, NcKind::False) => NcKind::False,
                    (NcKind::True, _) => c2.nc,
                    (_, NcKind::True) => c1.nc,
                    _ => NcKind::And(Box::new(c1), Box::new(c2)),
                }
            }
            NcKind::Or(c1, c2) => {
                let (c1, c2) = (c1.simp(), c2.simp());
                match (&c1.nc, &c2.nc) {
                    (NcKind::True, _) | (_, NcKind::True) => NcKind::True,
                    (NcKind::False, _) => c2.nc,
                    (_, NcKind::False) => c1.nc,
                    _ => NcKind::Or(Box::new(c1), Box::new(c2)),
                }
            }
            NcKind::App(id, args) => NcKind::App(*id, args.iter().map(TypArg::simp).collect()),
            NcKind::Var(kid) => NcKind::Var(*kid),
            NcKind::True => NcKind::True,
            NcKind::False => NcKind::False,
        };
        NConstraint::new(nc, self.pos)
    }

    fn simp_order(
        e1: &Nexp,
        e2: &Nexp,
        rebuild: fn(Nexp, Nexp) -> NcKind,
        holds: fn(std::cmp::Ordering) -> bool,
    ) -> NcKind {
        let (e1, e2) = (e1.simp(), e2.simp());
        if let (Some(c1), Some(c2)) = (e1.as_constant(), e2.as_constant()) {
            if holds(c1.cmp(c2)) {
                NcKind::True
            } else {
                NcKind::False
            }
        } else {
            rebuild(e1, e2)
        }
    }

    /// The negation of this constraint, pushed through the structure where
    /// possible. Negations of opaque constraints (boolean variables, named
    /// applications) are represented with the uninterpreted `not(..)`
    /// application, which the solver boundary understands.
    pub fn negate(&self) -> NConstraint {
        let nc = match &self.nc {
            NcKind::Equal(a1, a2) => NcKind::NotEqual(a1.clone(), a2.clone()),
            NcKind::NotEqual(a1, a2) => NcKind::Equal(a1.clone(), a2.clone()),
            NcKind::Ge(e1, e2) => NcKind::Lt(e1.clone(), e2.clone()),
            NcKind::Gt(e1, e2) => NcKind::Le(e1.clone(), e2.clone()),
            NcKind::Le(e1, e2) => NcKind::Gt(e1.clone(), e2.clone()),
            NcKind::Lt(e1, e2) => NcKind::Ge(e1.clone(), e2.clone()),
            NcKind::Set(e, values) => {
                return NConstraint::conj(values.iter().map(|v| {
                    NConstraint::not_equal(
                        TypArg::nexp(e.clone()),
                        TypArg::nexp(Nexp::constant(v.clone())),
                    )
                }))
            }
            NcKind::And(c1, c2) => NcKind::Or(Box::new(c1.negate()), Box::new(c2.negate())),
            NcKind::Or(c1, c2) => NcKind::And(Box::new(c1.negate()), Box::new(c2.negate())),
            NcKind::App(id, args) if *id == names::not() && args.len() == 1 => {
                // not(not(c)) collapses back to c.
                match &args[0].arg {
                    TypArgKind::Bool(inner) => return (**inner).clone(),
                    _ => NcKind::App(names::not(), vec![TypArg::bool(self.clone())]),
                }
            }
            NcKind::App(..) | NcKind::Var(_) => {
                NcKind::App(names::not(), vec![TypArg::bool(self.clone())])
            }
            NcKind::True => NcKind::False,
            NcKind::False => NcKind::True,
        };
        NConstraint::new(nc, self.pos)
    }
}

impl fmt::Display for NConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.nc {
            NcKind::Equal(a1, a2) => write!(f, "{a1} == {a2}"),
            NcKind::NotEqual(a1, a2) => write!(f, "{a1} != {a2}"),
            NcKind::Ge(e1, e2) => write!(f, "{e1} >= {e2}"),
            NcKind::Gt(e1, e2) => write!(f, "{e1} > {e2}"),
            NcKind::Le(e1, e2) => write!(f, "{e1} <= {e2}"),
            NcKind::Lt(e1, e2) => write!(f, "{e1} < {e2}"),
            NcKind::Set(e, values) => {
                write!(f, "{e} in {{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            NcKind::And(c1, c2) => write!(f, "({c1} & {c2})"),
            NcKind::Or(c1, c2) => write!(f, "({c1} | {c2})"),
            NcKind::App(id, args) => {
                write!(f, "{id}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            NcKind::Var(kid) => write!(f, "{kid}"),
            NcKind::True => write!(f, "true"),
            NcKind::False => write!(f, "false"),
        }
    }
}

/// A type argument: what a type constructor is applied to. Tagged by the
/// kind it instantiates.
#[derive(Clone, Debug)]
pub struct TypArg {
    pub arg: TypArgKind,
    pub pos: TermPos,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypArgKind {
    Nexp(Nexp),
    Typ(Typ),
    Bool(Box<NConstraint>),
}

impl PartialEq for TypArg {
    fn eq(&self, other: &Self) -> bool {
        self.arg == other.arg
    }
}

impl Eq for TypArg {}

impl std::hash::Hash for TypArg {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.arg.hash(state)
    }
}

impl TypArg {
    pub fn nexp(n: Nexp) -> Self {
        let pos = n.pos;
        TypArg {
            arg: TypArgKind::Nexp(n),
            pos,
        }
    }

    pub fn typ(t: Typ) -> Self {
        let pos = t.pos;
        TypArg {
            arg: TypArgKind::Typ(t),
            pos,
        }
    }

    pub fn bool(nc: NConstraint) -> Self {
        let pos = nc.pos;
        TypArg {
            arg: TypArgKind::Bool(Box::new(nc)),
            pos,
        }
    }

    pub fn kind(&self) -> Kind {
        match self.arg {
            TypArgKind::Nexp(_) => Kind::Int,
            TypArgKind::Typ(_) => Kind::Type,
            TypArgKind::Bool(_) => Kind::Bool,
        }
    }

    pub fn as_nexp(&self) -> Option<&Nexp> {
        match &self.arg {
            TypArgKind::Nexp(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_typ(&self) -> Option<&Typ> {
        match &self.arg {
            TypArgKind::Typ(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&NConstraint> {
        match &self.arg {
            TypArgKind::Bool(nc) => Some(nc),
            _ => None,
        }
    }

    fn as_constant(&self) -> Option<&Integer> {
        self.as_nexp().and_then(Nexp::as_constant)
    }

    pub fn tyvars(&self) -> IndexSet<Kid> {
        let mut out = IndexSet::new();
        self.collect_tyvars(&mut out);
        out
    }

    pub(crate) fn collect_tyvars(&self, out: &mut IndexSet<Kid>) {
        match &self.arg {
            TypArgKind::Nexp(n) => n.collect_tyvars(out),
            TypArgKind::Typ(t) => t.collect_tyvars(out),
            TypArgKind::Bool(nc) => nc.collect_tyvars(out),
        }
    }

    pub fn subst(&self, kid: Kid, arg: &TypArg) -> TypArg {
        let new_arg = match &self.arg {
            TypArgKind::Nexp(n) => TypArgKind::Nexp(n.subst(kid, arg)),
            TypArgKind::Typ(t) => TypArgKind::Typ(t.subst(kid, arg)),
            TypArgKind::Bool(nc) => TypArgKind::Bool(Box::new(nc.subst(kid, arg))),
        };
        TypArg {
            arg: new_arg,
            pos: self.pos,
        }
    }

    pub fn simp(&self) -> TypArg {
        let arg = match &self.arg {
            TypArgKind::Nexp(n) => TypArgKind::Nexp(n.simp()),
            TypArgKind::Typ(t) => TypArgKind::Typ(t.simp()),
            TypArgKind::Bool(nc) => TypArgKind::Bool(Box::new(nc.simp())),
        };
        TypArg {
            arg,
            pos: self.pos,
        }
    }
}

impl fmt::Display for TypArg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.arg {
            TypArgKind::Nexp(n) => write!(f, "{n}"),
            TypArgKind::Typ(t) => write!(f, "{t}"),
            TypArgKind::Bool(nc) => write!(f, "{nc}"),
        }
    }
}

/// A Tern type.
#[derive(Clone, Debug)]
pub struct Typ {
    pub typ: TypKind,
    pub pos: TermPos,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypKind {
    /// A type variable of kind `Type`.
    Var(Kid),
    /// A named type without arguments (`int`, `bool`, a synonym, an abstract
    /// type, an enumeration).
    Id(Ident),
    /// Application of a named constructor to type arguments, e.g.
    /// `bitvector(32)` or `vector(8, bit)`.
    App(Ident, Vec<TypArg>),
    Tuple(Vec<Typ>),
    /// A function type, from argument types to a return type.
    Fn(Vec<Typ>, Box<Typ>),
    /// A bidirectional mapping between two types.
    Bidir(Box<Typ>, Box<Typ>),
    /// An existential: bound kinded variables, a constraint over them, and a
    /// body. `{'n : Int, 'n >= 0. atom('n)}` is the natural numbers.
    Exist(SmallVec<[KindedId; 2]>, Box<NConstraint>, Box<Typ>),
}

impl PartialEq for Typ {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
    }
}

impl Eq for Typ {}

impl std::hash::Hash for Typ {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.typ.hash(state)
    }
}

impl Typ {
    pub fn new(typ: TypKind, pos: TermPos) -> Self {
        Typ { typ, pos }
    }

    pub fn var(kid: Kid) -> Self {
        Typ::new(TypKind::Var(kid), TermPos::None)
    }

    pub fn id(id: Ident) -> Self {
        Typ::new(TypKind::Id(id), TermPos::None)
    }

    pub fn app(id: Ident, args: Vec<TypArg>) -> Self {
        Typ::new(TypKind::App(id, args), TermPos::None)
    }

    pub fn int() -> Self {
        Typ::id(names::int())
    }

    pub fn nat() -> Self {
        Typ::id(names::nat())
    }

    pub fn bool() -> Self {
        Typ::id(names::bool())
    }

    pub fn unit() -> Self {
        Typ::id(names::unit())
    }

    pub fn string() -> Self {
        Typ::id(names::string())
    }

    pub fn string_literal() -> Self {
        Typ::id(names::string_literal())
    }

    pub fn bit() -> Self {
        Typ::id(names::bit())
    }

    pub fn atom(n: Nexp) -> Self {
        Typ::app(names::atom(), vec![TypArg::nexp(n)])
    }

    pub fn atom_bool(nc: NConstraint) -> Self {
        Typ::app(names::atom_bool(), vec![TypArg::bool(nc)])
    }

    pub fn range(lo: Nexp, hi: Nexp) -> Self {
        Typ::app(names::range(), vec![TypArg::nexp(lo), TypArg::nexp(hi)])
    }

    pub fn bitvector(n: Nexp) -> Self {
        Typ::app(names::bitvector(), vec![TypArg::nexp(n)])
    }

    pub fn vector(n: Nexp, elem: Typ) -> Self {
        Typ::app(names::vector(), vec![TypArg::nexp(n), TypArg::typ(elem)])
    }

    pub fn list(elem: Typ) -> Self {
        Typ::app(names::list(), vec![TypArg::typ(elem)])
    }

    pub fn implicit(n: Nexp) -> Self {
        Typ::app(names::implicit(), vec![TypArg::nexp(n)])
    }

    pub fn itself(n: Nexp) -> Self {
        Typ::app(names::itself(), vec![TypArg::nexp(n)])
    }

    pub fn tuple(typs: Vec<Typ>) -> Self {
        Typ::new(TypKind::Tuple(typs), TermPos::None)
    }

    pub fn func(args: Vec<Typ>, ret: Typ) -> Self {
        Typ::new(TypKind::Fn(args, Box::new(ret)), TermPos::None)
    }

    pub fn bidir(t1: Typ, t2: Typ) -> Self {
        Typ::new(TypKind::Bidir(Box::new(t1), Box::new(t2)), TermPos::None)
    }

    pub fn exist(
        kids: impl IntoIterator<Item = KindedId>,
        constraint: NConstraint,
        body: Typ,
    ) -> Self {
        let kids: SmallVec<[KindedId; 2]> = kids.into_iter().collect();
        if kids.is_empty() && constraint.is_true() {
            body
        } else {
            let pos = body.pos;
            Typ::new(
                TypKind::Exist(kids, Box::new(constraint), Box::new(body)),
                pos,
            )
        }
    }

    pub fn with_pos(mut self, pos: TermPos) -> Self {
        self.pos = pos;
        self
    }

    /// The head constructor name, if the type is a named type or an
    /// application.
    pub fn head_id(&self) -> Option<Ident> {
        match &self.typ {
            TypKind::Id(id) | TypKind::App(id, _) => Some(*id),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        self.typ == TypKind::Id(names::unit())
    }

    /// Return the index of `atom(e)`, if this type is an atom.
    pub fn as_atom(&self) -> Option<&Nexp> {
        match &self.typ {
            TypKind::App(id, args) if *id == names::atom() && args.len() == 1 => {
                args[0].as_nexp()
            }
            _ => None,
        }
    }

    /// Return the constraint of `atom_bool(c)`, if this type is a boolean
    /// atom.
    pub fn as_atom_bool(&self) -> Option<&NConstraint> {
        match &self.typ {
            TypKind::App(id, args) if *id == names::atom_bool() && args.len() == 1 => {
                args[0].as_bool()
            }
            _ => None,
        }
    }

    pub fn as_exist(&self) -> Option<(&[KindedId], &NConstraint, &Typ)> {
        match &self.typ {
            TypKind::Exist(kids, nc, body) => Some((kids, nc, body)),
            _ => None,
        }
    }

    pub fn tyvars(&self) -> IndexSet<Kid> {
        let mut out = IndexSet::new();
        self.collect_tyvars(&mut out);
        out
    }

    pub(crate) fn collect_tyvars(&self, out: &mut IndexSet<Kid>) {
        match &self.typ {
            TypKind::Var(kid) => {
                out.insert(*kid);
            }
            TypKind::Id(_) => {}
            TypKind::App(_, args) => {
                for arg in args {
                    arg.collect_tyvars(out);
                }
            }
            TypKind::Tuple(typs) => {
                for t in typs {
                    t.collect_tyvars(out);
                }
            }
            TypKind::Fn(args, ret) => {
                for t in args {
                    t.collect_tyvars(out);
                }
                ret.collect_tyvars(out);
            }
            TypKind::Bidir(t1, t2) => {
                t1.collect_tyvars(out);
                t2.collect_tyvars(out);
            }
            TypKind::Exist(kids, nc, body) => {
                let mut inner = IndexSet::new();
                nc.collect_tyvars(&mut inner);
                body.collect_tyvars(&mut inner);
                for kid in inner {
                    if !kids.iter().any(|k| k.kid == kid) {
                        out.insert(kid);
                    }
                }
            }
        }
    }

    pub fn subst(&self, kid: Kid, arg: &TypArg) -> Typ {
        let typ = match &self.typ {
            TypKind::Var(k) if *k == kid => match &arg.arg {
                TypArgKind::Typ(t) => return t.clone(),
                _ => TypKind::Var(*k),
            },
            TypKind::Var(k) => TypKind::Var(*k),
            TypKind::Id(id) => TypKind::Id(*id),
            TypKind::App(id, args) => {
                TypKind::App(*id, args.iter().map(|a| a.subst(kid, arg)).collect())
            }
            TypKind::Tuple(typs) => {
                TypKind::Tuple(typs.iter().map(|t| t.subst(kid, arg)).collect())
            }
            TypKind::Fn(args, ret) => TypKind::Fn(
                args.iter().map(|t| t.subst(kid, arg)).collect(),
                Box::new(ret.subst(kid, arg)),
            ),
            TypKind::Bidir(t1, t2) => TypKind::Bidir(
                Box::new(t1.subst(kid, arg)),
                Box::new(t2.subst(kid, arg)),
            ),
            TypKind::Exist(kids, nc, body) => {
                if kids.iter().any(|k| k.kid == kid) {
                    // The variable is shadowed by the binder; globally unique
                    // names make this unreachable in practice.
                    TypKind::Exist(kids.clone(), nc.clone(), body.clone())
                } else {
                    TypKind::Exist(
                        kids.clone(),
                        Box::new(nc.subst(kid, arg)),
                        Box::new(body.subst(kid, arg)),
                    )
                }
            }
        };
        Typ::new(typ, self.pos)
    }

    pub fn simp(&self) -> Typ {
        let typ = match &self.typ {
            TypKind::Var(kid) => TypKind::Var(*kid),
            TypKind::Id(id) => TypKind::Id(*id),
            TypKind::App(id, args) => TypKind::App(*id, args.iter().map(TypArg::simp).collect()),
            TypKind::Tuple(typs) => TypKind::Tuple(typs.iter().map(Typ::simp).collect()),
            TypKind::Fn(args, ret) => {
                TypKind::Fn(args.iter().map(Typ::simp).collect(), Box::new(ret.simp()))
            }
            TypKind::Bidir(t1, t2) => {
                TypKind::Bidir(Box::new(t1.simp()), Box::new(t2.simp()))
            }
            TypKind::Exist(kids, nc, body) => {
                let nc = nc.simp();
                let body = body.simp();
                // An existential with a trivially true constraint and unused
                // binders is just its body.
                if nc.is_true() {
                    let used = body.tyvars();
                    if !kids.iter().any(|k| used.contains(&k.kid)) {
                        return body.with_pos(self.pos);
                    }
                }
                TypKind::Exist(kids.clone(), Box::new(nc), Box::new(body))
            }
        };
        Typ::new(typ, self.pos)
    }

    /// Relabel all existentially bound variables to canonical names, in
    /// traversal order. Two types are alpha-equivalent exactly when their
    /// canonical forms are structurally equal.
    fn canonicalize(&self, counter: &mut usize) -> Typ {
        let typ = match &self.typ {
            TypKind::Var(kid) => TypKind::Var(*kid),
            TypKind::Id(id) => TypKind::Id(*id),
            TypKind::App(id, args) => TypKind::App(
                *id,
                args.iter()
                    .map(|a| match &a.arg {
                        TypArgKind::Typ(t) => TypArg::typ(t.canonicalize(counter)),
                        _ => a.clone(),
                    })
                    .collect(),
            ),
            TypKind::Tuple(typs) => {
                TypKind::Tuple(typs.iter().map(|t| t.canonicalize(counter)).collect())
            }
            TypKind::Fn(args, ret) => TypKind::Fn(
                args.iter().map(|t| t.canonicalize(counter)).collect(),
                Box::new(ret.canonicalize(counter)),
            ),
            TypKind::Bidir(t1, t2) => TypKind::Bidir(
                Box::new(t1.canonicalize(counter)),
                Box::new(t2.canonicalize(counter)),
            ),
            TypKind::Exist(kids, nc, body) => {
                let mut nc = (**nc).clone();
                let mut body = (**body).clone();
                let mut canon_kids = SmallVec::new();
                for kinded in kids {
                    let canon = Kid::new(format!("#{}", *counter));
                    *counter += 1;
                    let arg = match kinded.kind {
                        Kind::Int => TypArg::nexp(Nexp::var(canon)),
                        Kind::Bool => TypArg::bool(NConstraint::var(canon)),
                        Kind::Type => TypArg::typ(Typ::var(canon)),
                    };
                    nc = nc.subst(kinded.kid, &arg);
                    body = body.subst(kinded.kid, &arg);
                    canon_kids.push(KindedId::new(canon, kinded.kind));
                }
                TypKind::Exist(
                    canon_kids,
                    Box::new(nc),
                    Box::new(body.canonicalize(counter)),
                )
            }
        };
        Typ::new(typ, self.pos)
    }

    /// Alpha-equivalence: structural equality after canonical relabeling of
    /// bound variables. This never consults the solver, so re-checking an
    /// already-elaborated type against itself cannot fail spuriously.
    pub fn alpha_equivalent(&self, other: &Typ) -> bool {
        if self == other {
            return true;
        }
        self.simp().canonicalize(&mut 0) == other.simp().canonicalize(&mut 0)
    }
}

impl fmt::Display for Typ {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.typ {
            TypKind::Var(kid) => write!(f, "{kid}"),
            TypKind::Id(id) => write!(f, "{id}"),
            TypKind::App(id, args) => {
                write!(f, "{id}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            TypKind::Tuple(typs) => {
                write!(f, "(")?;
                for (i, t) in typs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            TypKind::Fn(args, ret) => {
                write!(f, "(")?;
                for (i, t) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {ret}")
            }
            TypKind::Bidir(t1, t2) => write!(f, "{t1} <-> {t2}"),
            TypKind::Exist(kids, nc, body) => {
                write!(f, "{{")?;
                for (i, k) in kids.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{k},")?;
                }
                write!(f, " {nc}. {body}}}")
            }
        }
    }
}

/// One item of a quantifier: a kinded variable or a constraint over the
/// variables bound so far.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum QuantItem {
    KindedId(KindedId),
    Constraint(NConstraint),
}

/// The quantifier prefix of a polymorphic type scheme,
/// `forall 'n : Int, 'n >= 0. ..`.
#[derive(Clone, Debug, Default)]
pub struct TypQuant {
    pub items: Vec<QuantItem>,
    pub pos: TermPos,
}

impl PartialEq for TypQuant {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl TypQuant {
    pub fn new(items: Vec<QuantItem>, pos: TermPos) -> Self {
        TypQuant { items, pos }
    }

    pub fn empty() -> Self {
        TypQuant::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn kinded_ids(&self) -> impl Iterator<Item = &KindedId> {
        self.items.iter().filter_map(|item| match item {
            QuantItem::KindedId(k) => Some(k),
            QuantItem::Constraint(_) => None,
        })
    }

    pub fn constraints(&self) -> impl Iterator<Item = &NConstraint> {
        self.items.iter().filter_map(|item| match item {
            QuantItem::Constraint(nc) => Some(nc),
            QuantItem::KindedId(_) => None,
        })
    }
}

impl fmt::Display for TypQuant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "forall ")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match item {
                QuantItem::KindedId(k) => write!(f, "{k}")?,
                QuantItem::Constraint(nc) => write!(f, "{nc}")?,
            }
        }
        Ok(())
    }
}

/// A polymorphic type scheme: a quantifier prefix and a body type.
#[derive(Clone, PartialEq, Debug)]
pub struct TypScheme {
    pub quant: TypQuant,
    pub typ: Typ,
}

impl TypScheme {
    pub fn new(quant: TypQuant, typ: Typ) -> Self {
        TypScheme { quant, typ }
    }

    pub fn monomorphic(typ: Typ) -> Self {
        TypScheme {
            quant: TypQuant::empty(),
            typ,
        }
    }
}

impl fmt::Display for TypScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.quant.is_empty() {
            write!(f, "{}", self.typ)
        } else {
            write!(f, "{}. {}", self.quant, self.typ)
        }
    }
}

/// The names of the built-in type constructors.
pub mod names {
    use crate::identifier::Ident;

    macro_rules! builtin {
        ($($fn_name:ident => $label:literal),* $(,)?) => {
            $(pub fn $fn_name() -> Ident {
                Ident::new($label)
            })*
        };
    }

    builtin! {
        atom => "atom",
        atom_bool => "atom_bool",
        range => "range",
        int => "int",
        nat => "nat",
        bool => "bool",
        unit => "unit",
        string => "string",
        string_literal => "string_literal",
        bit => "bit",
        bitvector => "bitvector",
        vector => "vector",
        list => "list",
        implicit => "implicit",
        itself => "itself",
        not => "not",
        modulo => "mod",
        div => "div",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(label: &str) -> Nexp {
        Nexp::var(Kid::new(label))
    }

    #[test]
    fn simp_folds_constants() {
        let e = Nexp::sum(Nexp::constant(1), Nexp::constant(2));
        assert_eq!(e.simp(), Nexp::constant(3));

        let e = Nexp::times(Nexp::constant(4), Nexp::constant(8));
        assert_eq!(e.simp(), Nexp::constant(32));

        let e = Nexp::exp(Nexp::constant(10));
        assert_eq!(e.simp(), Nexp::constant(1024));
    }

    #[test]
    fn simp_flattens_and_orders_sums() {
        let left = Nexp::sum(Nexp::sum(var("a"), Nexp::constant(1)), var("b"));
        let right = Nexp::sum(var("b"), Nexp::sum(var("a"), Nexp::constant(1)));
        assert_eq!(left.simp(), right.simp());
    }

    #[test]
    fn simp_recognizes_commuted_products() {
        let ab = Nexp::times(var("a"), var("b"));
        let ba = Nexp::times(var("b"), var("a"));
        assert_eq!(ab.simp(), ba.simp());
    }

    #[test]
    fn simp_is_idempotent() {
        let exprs = [
            Nexp::minus(Nexp::sum(var("a"), Nexp::constant(3)), var("b")),
            Nexp::times(Nexp::constant(2), Nexp::sum(var("a"), var("a"))),
            Nexp::cond(
                NConstraint::var(Kid::new("p")),
                Nexp::sum(var("x"), Nexp::constant(0)),
                var("y"),
            ),
            Nexp::neg(Nexp::neg(var("z"))),
        ];
        for e in exprs {
            let once = e.simp();
            assert_eq!(once.simp(), once, "not idempotent for {e}");
        }
    }

    #[test]
    fn constraint_simp_folds_ground_relations() {
        let c = NConstraint::lt(Nexp::constant(3), Nexp::constant(5));
        assert!(c.simp().is_true());

        let c = NConstraint::nexp_equal(
            Nexp::sum(var("n"), Nexp::constant(0)),
            var("n"),
        );
        assert!(c.simp().is_true());

        let c = NConstraint::and(NConstraint::tru(), NConstraint::var(Kid::new("p")));
        assert_eq!(c.simp(), NConstraint::var(Kid::new("p")));
    }

    #[test]
    fn negate_round_trips() {
        let cases = [
            NConstraint::ge(var("n"), Nexp::constant(0)),
            NConstraint::var(Kid::new("p")),
            NConstraint::and(
                NConstraint::lt(var("n"), Nexp::constant(4)),
                NConstraint::var(Kid::new("p")),
            ),
        ];
        for c in cases {
            assert_eq!(c.negate().negate().simp(), c.simp(), "for {c}");
        }
    }

    #[test]
    fn subst_replaces_free_occurrences() {
        let n = Kid::new("n");
        let e = Nexp::sum(Nexp::var(n), Nexp::constant(1));
        let subbed = e.subst(n, &TypArg::nexp(Nexp::constant(7)));
        assert_eq!(subbed.simp(), Nexp::constant(8));
    }

    #[test]
    fn exist_binders_are_not_free() {
        let n = Kid::new("n");
        let t = Typ::exist(
            [KindedId::int(n)],
            NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
            Typ::atom(Nexp::var(n)),
        );
        assert!(t.tyvars().is_empty());

        let m = Kid::new("m");
        let t2 = Typ::exist(
            [KindedId::int(n)],
            NConstraint::ge(Nexp::var(n), Nexp::var(m)),
            Typ::atom(Nexp::var(n)),
        );
        assert_eq!(t2.tyvars().into_iter().collect::<Vec<_>>(), vec![m]);
    }

    #[test]
    fn alpha_equivalence_relabels_binders() {
        let mk = |label: &str| {
            let k = Kid::new(label);
            Typ::exist(
                [KindedId::int(k)],
                NConstraint::ge(Nexp::var(k), Nexp::constant(0)),
                Typ::atom(Nexp::var(k)),
            )
        };
        assert!(mk("n").alpha_equivalent(&mk("m")));
        assert!(!mk("n").alpha_equivalent(&Typ::int()));
    }

    #[test]
    fn atom_accessors() {
        let t = Typ::atom(Nexp::constant(3));
        assert_eq!(t.as_atom(), Some(&Nexp::constant(3)));
        assert!(t.as_atom_bool().is_none());
        assert_eq!(t.head_id(), Some(names::atom()));
    }
}
