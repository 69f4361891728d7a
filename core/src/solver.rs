//! The constraint-solver boundary.
//!
//! The checker reduces every proof obligation to a closed [`Formula`] — a
//! boolean constraint over the integer and boolean type variables in scope,
//! together with the set of abstract type constants the solver must treat as
//! uninterpreted — and submits it through the [`Solver`] trait for a
//! [`Verdict`]. Proving a goal `g` under assumptions `as` is done by asking
//! for the satisfiability of `as & not(g)`: `Unsat` means the goal holds.
//!
//! The solver is an injected dependency: the production driver wires in an
//! external decision procedure behind this trait, while unit tests use
//! [`SmallModelSolver`], a bounded model enumeration that is exact on the
//! small ground formulas the tests exercise.
//!
//! [`CachingSolver`] memoizes verdicts. The memo key is the *entire* formula,
//! assumptions included: the same goal under different assumptions can have
//! different verdicts, so keying on the goal alone would be unsound.
use std::collections::HashMap;

use indexmap::IndexSet;
use log::{debug, trace};
use malachite::base::num::arithmetic::traits::Pow;
use malachite::base::num::basic::traits::{One, Zero};

use crate::identifier::{Ident, Kid};
use crate::typ::{names, Integer, Kind, NConstraint, NcKind, Nexp, NexpKind, TypArgKind};

/// The answer of a satisfiability query.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    Sat,
    Unsat,
    Unknown,
}

/// A closed satisfiability query.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Formula {
    /// The type variables the constraint ranges over, with their kinds.
    /// Variables of kind `Type` never reach the solver.
    pub tyvars: Vec<(Kid, Kind)>,
    /// Abstract type constants, to be treated as uninterpreted.
    pub abstracts: Vec<Ident>,
    /// The constraint whose satisfiability is queried.
    pub constraint: NConstraint,
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "exists")?;
        for (kid, kind) in &self.tyvars {
            write!(f, " {kid} : {kind},")?;
        }
        write!(f, " {}", self.constraint)
    }
}

/// The external decision procedure, seen from the checker.
pub trait Solver {
    /// Decide the satisfiability of a formula. The call is synchronous and
    /// may be arbitrarily slow; the checker imposes no timeout of its own.
    fn check(&mut self, formula: &Formula) -> Verdict;

    /// Ask for the unique value of `kid` among the models of `formula`
    /// (which holds plain assumptions, not a negated goal). Returns `None`
    /// if there is no solution, more than one, or the solver cannot tell.
    fn solve_unique(&mut self, formula: &Formula, kid: Kid) -> Option<Integer>;
}

impl<S: Solver + ?Sized> Solver for &mut S {
    fn check(&mut self, formula: &Formula) -> Verdict {
        (**self).check(formula)
    }

    fn solve_unique(&mut self, formula: &Formula, kid: Kid) -> Option<Integer> {
        (**self).solve_unique(formula, kid)
    }
}

/// A solver that answers `Unknown` to everything. Useful as a placeholder
/// when elaborating code that is expected to avoid solver-dependent typing.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnknownSolver;

impl Solver for UnknownSolver {
    fn check(&mut self, _formula: &Formula) -> Verdict {
        Verdict::Unknown
    }

    fn solve_unique(&mut self, _formula: &Formula, _kid: Kid) -> Option<Integer> {
        None
    }
}

/// Memoization layer over an underlying solver.
pub struct CachingSolver<S> {
    inner: S,
    check_cache: HashMap<Formula, Verdict>,
    unique_cache: HashMap<(Formula, Kid), Option<Integer>>,
    hits: usize,
    misses: usize,
}

impl<S: Solver> CachingSolver<S> {
    pub fn new(inner: S) -> Self {
        CachingSolver {
            inner,
            check_cache: HashMap::new(),
            unique_cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// The number of queries answered from the cache and by the underlying
    /// solver, respectively.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Solver> Solver for CachingSolver<S> {
    fn check(&mut self, formula: &Formula) -> Verdict {
        if let Some(verdict) = self.check_cache.get(formula) {
            self.hits += 1;
            trace!("solver cache hit: {formula} -> {verdict:?}");
            return *verdict;
        }
        self.misses += 1;
        let verdict = self.inner.check(formula);
        debug!("solver query: {formula} -> {verdict:?}");
        self.check_cache.insert(formula.clone(), verdict);
        verdict
    }

    fn solve_unique(&mut self, formula: &Formula, kid: Kid) -> Option<Integer> {
        let key = (formula.clone(), kid);
        if let Some(cached) = self.unique_cache.get(&key) {
            self.hits += 1;
            return cached.clone();
        }
        self.misses += 1;
        let solution = self.inner.solve_unique(formula, kid);
        self.unique_cache.insert(key, solution.clone());
        solution
    }
}

/// A value assigned to a type variable during model enumeration.
#[derive(Clone, PartialEq, Debug)]
enum ModelValue {
    Int(Integer),
    Bool(bool),
}

/// A bounded model-enumeration solver.
///
/// Integer variables range over a candidate set derived from the constants
/// occurring in the formula (each constant, its neighbors, and a small window
/// around zero). This makes the solver exact for the ground and
/// small-constant formulas unit tests build, and *only* for those: `Unsat`
/// answers on formulas whose models would need values outside the candidate
/// set are wrong. It is a development and testing oracle, not a decision
/// procedure.
#[derive(Clone, Debug, Default)]
pub struct SmallModelSolver {
    /// Upper bound on the number of assignments enumerated before giving up
    /// with `Unknown`. Zero means the default (100 000).
    pub budget: usize,
}

impl SmallModelSolver {
    pub fn new() -> Self {
        SmallModelSolver::default()
    }

    fn budget(&self) -> usize {
        if self.budget == 0 {
            100_000
        } else {
            self.budget
        }
    }

    fn candidates(formula: &Formula) -> Vec<Integer> {
        let mut constants = IndexSet::new();
        collect_constants(&formula.constraint, &mut constants);
        let mut candidates = IndexSet::new();
        for small in -2i64..=2 {
            candidates.insert(Integer::from(small));
        }
        for c in constants {
            candidates.insert(&c - Integer::ONE);
            candidates.insert(&c + Integer::ONE);
            candidates.insert(c);
        }
        let mut candidates: Vec<_> = candidates.into_iter().collect();
        candidates.sort();
        candidates
    }

    /// Enumerate all assignments, calling `found` on each model. `found`
    /// returns `false` to stop the enumeration early. The result is `None`
    /// when the formula cannot be enumerated at all (a `Type`-kinded
    /// variable, or the assignment space exceeds the budget).
    fn enumerate(
        &self,
        formula: &Formula,
        found: &mut dyn FnMut(&[(Kid, ModelValue)]) -> bool,
    ) -> Option<EnumOutcome> {
        let candidates = Self::candidates(formula);
        let mut total: usize = 1;
        for (_, kind) in &formula.tyvars {
            let width = match kind {
                Kind::Int => candidates.len().max(1),
                Kind::Bool => 2,
                // A `Type`-kinded variable can only appear in (dis)equalities
                // between type arguments; enumeration does not model it.
                Kind::Type => return None,
            };
            total = match total.checked_mul(width) {
                Some(t) if t <= self.budget() => t,
                _ => return None,
            };
        }

        let mut assignment: Vec<(Kid, ModelValue)> = Vec::new();
        let mut outcome = EnumOutcome::default();
        self.enumerate_rec(formula, &candidates, 0, &mut assignment, &mut outcome, found);
        Some(outcome)
    }

    /// Returns `false` when the walk was stopped early by `found`.
    fn enumerate_rec(
        &self,
        formula: &Formula,
        candidates: &[Integer],
        depth: usize,
        assignment: &mut Vec<(Kid, ModelValue)>,
        outcome: &mut EnumOutcome,
        found: &mut dyn FnMut(&[(Kid, ModelValue)]) -> bool,
    ) -> bool {
        if depth == formula.tyvars.len() {
            match eval_nc(&formula.constraint, assignment) {
                Some(true) => {
                    if !found(assignment) {
                        outcome.stopped_early = true;
                        return false;
                    }
                }
                Some(false) => {}
                None => outcome.undetermined = true,
            }
            return true;
        }
        let (kid, kind) = formula.tyvars[depth];
        match kind {
            Kind::Int => {
                for c in candidates {
                    assignment.push((kid, ModelValue::Int(c.clone())));
                    let keep_going = self
                        .enumerate_rec(formula, candidates, depth + 1, assignment, outcome, found);
                    assignment.pop();
                    if !keep_going {
                        return false;
                    }
                }
            }
            Kind::Bool => {
                for b in [false, true] {
                    assignment.push((kid, ModelValue::Bool(b)));
                    let keep_going = self
                        .enumerate_rec(formula, candidates, depth + 1, assignment, outcome, found);
                    assignment.pop();
                    if !keep_going {
                        return false;
                    }
                }
            }
            Kind::Type => unreachable!("rejected before enumeration"),
        }
        true
    }
}

#[derive(Clone, Copy, Default, Debug)]
struct EnumOutcome {
    /// The callback asked to stop before the space was exhausted.
    stopped_early: bool,
    /// Some assignment left the constraint undetermined (abstract constants,
    /// uninterpreted applications).
    undetermined: bool,
}

impl Solver for SmallModelSolver {
    fn check(&mut self, formula: &Formula) -> Verdict {
        let mut sat = false;
        let outcome = self.enumerate(formula, &mut |_model| {
            sat = true;
            // Stop at the first model.
            false
        });
        match outcome {
            _ if sat => Verdict::Sat,
            Some(outcome) if !outcome.undetermined => Verdict::Unsat,
            _ => Verdict::Unknown,
        }
    }

    fn solve_unique(&mut self, formula: &Formula, kid: Kid) -> Option<Integer> {
        let mut values: IndexSet<Integer> = IndexSet::new();
        let outcome = self.enumerate(formula, &mut |model| {
            for (k, v) in model {
                if *k == kid {
                    if let ModelValue::Int(i) = v {
                        values.insert(i.clone());
                    }
                }
            }
            values.len() <= 1
        });
        match outcome {
            Some(outcome)
                if !outcome.stopped_early && !outcome.undetermined && values.len() == 1 =>
            {
                values.into_iter().next()
            }
            _ => None,
        }
    }
}

fn collect_constants(nc: &NConstraint, out: &mut IndexSet<Integer>) {
    fn nexp_constants(nexp: &Nexp, out: &mut IndexSet<Integer>) {
        match &nexp.nexp {
            NexpKind::Constant(c) => {
                out.insert(c.clone());
            }
            NexpKind::Var(_) | NexpKind::Id(_) => {}
            NexpKind::App(_, args) => args.iter().for_each(|a| nexp_constants(a, out)),
            NexpKind::Sum(e1, e2) | NexpKind::Minus(e1, e2) | NexpKind::Times(e1, e2) => {
                nexp_constants(e1, out);
                nexp_constants(e2, out);
            }
            NexpKind::Exp(e) | NexpKind::Neg(e) => nexp_constants(e, out),
            NexpKind::If(c, e1, e2) => {
                collect_constants(c, out);
                nexp_constants(e1, out);
                nexp_constants(e2, out);
            }
        }
    }
    fn arg_constants(arg: &crate::typ::TypArg, out: &mut IndexSet<Integer>) {
        match &arg.arg {
            TypArgKind::Nexp(n) => nexp_constants(n, out),
            TypArgKind::Bool(nc) => collect_constants(nc, out),
            TypArgKind::Typ(_) => {}
        }
    }
    match &nc.nc {
        NcKind::Equal(a1, a2) | NcKind::NotEqual(a1, a2) => {
            arg_constants(a1, out);
            arg_constants(a2, out);
        }
        NcKind::Ge(e1, e2) | NcKind::Gt(e1, e2) | NcKind::Le(e1, e2) | NcKind::Lt(e1, e2) => {
            nexp_constants(e1, out);
            nexp_constants(e2, out);
        }
        NcKind::Set(e, values) => {
            nexp_constants(e, out);
            for v in values {
                out.insert(v.clone());
            }
        }
        NcKind::And(c1, c2) | NcKind::Or(c1, c2) => {
            collect_constants(c1, out);
            collect_constants(c2, out);
        }
        NcKind::App(_, args) => args.iter().for_each(|a| arg_constants(a, out)),
        NcKind::Var(_) | NcKind::True | NcKind::False => {}
    }
}

fn lookup<'a>(assignment: &'a [(Kid, ModelValue)], kid: Kid) -> Option<&'a ModelValue> {
    assignment
        .iter()
        .rev()
        .find_map(|(k, v)| (*k == kid).then_some(v))
}

fn eval_nexp(nexp: &Nexp, assignment: &[(Kid, ModelValue)]) -> Option<Integer> {
    match &nexp.nexp {
        NexpKind::Var(kid) => match lookup(assignment, *kid)? {
            ModelValue::Int(i) => Some(i.clone()),
            ModelValue::Bool(_) => None,
        },
        // Abstract type constants are uninterpreted: any formula depending on
        // them is undetermined for this solver.
        NexpKind::Id(_) => None,
        NexpKind::Constant(c) => Some(c.clone()),
        NexpKind::Sum(e1, e2) => Some(eval_nexp(e1, assignment)? + eval_nexp(e2, assignment)?),
        NexpKind::Minus(e1, e2) => Some(eval_nexp(e1, assignment)? - eval_nexp(e2, assignment)?),
        NexpKind::Times(e1, e2) => Some(eval_nexp(e1, assignment)? * eval_nexp(e2, assignment)?),
        NexpKind::Exp(e) => {
            let e = eval_nexp(e, assignment)?;
            let exp = u64::try_from(&e).ok()?;
            (exp <= 4096).then(|| Integer::from(2u32).pow(exp))
        }
        NexpKind::Neg(e) => Some(-eval_nexp(e, assignment)?),
        NexpKind::If(c, e1, e2) => {
            if eval_nc(c, assignment)? {
                eval_nexp(e1, assignment)
            } else {
                eval_nexp(e2, assignment)
            }
        }
        NexpKind::App(id, args) => {
            let values: Option<Vec<Integer>> =
                args.iter().map(|a| eval_nexp(a, assignment)).collect();
            let values = values?;
            if *id == names::modulo() && values.len() == 2 && values[1] != Integer::ZERO {
                Some(&values[0] % &values[1])
            } else if *id == names::div() && values.len() == 2 && values[1] != Integer::ZERO {
                Some(&values[0] / &values[1])
            } else {
                None
            }
        }
    }
}

fn eval_arg(
    arg: &crate::typ::TypArg,
    assignment: &[(Kid, ModelValue)],
) -> Option<ModelValue> {
    match &arg.arg {
        TypArgKind::Nexp(n) => eval_nexp(n, assignment).map(ModelValue::Int),
        TypArgKind::Bool(nc) => eval_nc(nc, assignment).map(ModelValue::Bool),
        TypArgKind::Typ(_) => None,
    }
}

fn eval_nc(nc: &NConstraint, assignment: &[(Kid, ModelValue)]) -> Option<bool> {
    match &nc.nc {
        NcKind::Equal(a1, a2) => {
            // Ground type arguments compare structurally without evaluation.
            if let (TypArgKind::Typ(t1), TypArgKind::Typ(t2)) = (&a1.arg, &a2.arg) {
                return Some(t1 == t2);
            }
            Some(eval_arg(a1, assignment)? == eval_arg(a2, assignment)?)
        }
        NcKind::NotEqual(a1, a2) => {
            if let (TypArgKind::Typ(t1), TypArgKind::Typ(t2)) = (&a1.arg, &a2.arg) {
                return Some(t1 != t2);
            }
            Some(eval_arg(a1, assignment)? != eval_arg(a2, assignment)?)
        }
        NcKind::Ge(e1, e2) => Some(eval_nexp(e1, assignment)? >= eval_nexp(e2, assignment)?),
        NcKind::Gt(e1, e2) => Some(eval_nexp(e1, assignment)? > eval_nexp(e2, assignment)?),
        NcKind::Le(e1, e2) => Some(eval_nexp(e1, assignment)? <= eval_nexp(e2, assignment)?),
        NcKind::Lt(e1, e2) => Some(eval_nexp(e1, assignment)? < eval_nexp(e2, assignment)?),
        NcKind::Set(e, values) => {
            let v = eval_nexp(e, assignment)?;
            Some(values.contains(&v))
        }
        NcKind::And(c1, c2) => match (eval_nc(c1, assignment), eval_nc(c2, assignment)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        NcKind::Or(c1, c2) => match (eval_nc(c1, assignment), eval_nc(c2, assignment)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        NcKind::App(id, args) => {
            if *id == names::not() && args.len() == 1 {
                match eval_arg(&args[0], assignment)? {
                    ModelValue::Bool(b) => Some(!b),
                    ModelValue::Int(_) => None,
                }
            } else {
                None
            }
        }
        NcKind::Var(kid) => match lookup(assignment, *kid)? {
            ModelValue::Bool(b) => Some(*b),
            ModelValue::Int(_) => None,
        },
        NcKind::True => Some(true),
        NcKind::False => Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typ::TypArg;

    fn formula(tyvars: Vec<(Kid, Kind)>, constraint: NConstraint) -> Formula {
        Formula {
            tyvars,
            abstracts: Vec::new(),
            constraint,
        }
    }

    #[test]
    fn ground_formulas_are_decided() {
        let mut solver = SmallModelSolver::new();
        let sat = formula(
            vec![],
            NConstraint::lt(Nexp::constant(1), Nexp::constant(2)),
        );
        assert_eq!(solver.check(&sat), Verdict::Sat);

        let unsat = formula(
            vec![],
            NConstraint::lt(Nexp::constant(2), Nexp::constant(1)),
        );
        assert_eq!(solver.check(&unsat), Verdict::Unsat);
    }

    #[test]
    fn negated_goal_discharge() {
        // assumptions: n = 3; negated goal: n != 3. Unsat means proved.
        let n = Kid::fresh("n");
        let mut solver = SmallModelSolver::new();
        let f = formula(
            vec![(n, Kind::Int)],
            NConstraint::and(
                NConstraint::nexp_equal(Nexp::var(n), Nexp::constant(3)),
                NConstraint::not_equal(
                    TypArg::nexp(Nexp::var(n)),
                    TypArg::nexp(Nexp::constant(3)),
                ),
            ),
        );
        assert_eq!(solver.check(&f), Verdict::Unsat);
    }

    #[test]
    fn unique_solution() {
        let n = Kid::fresh("n");
        let mut solver = SmallModelSolver::new();
        let f = formula(
            vec![(n, Kind::Int)],
            NConstraint::nexp_equal(
                Nexp::sum(Nexp::var(n), Nexp::constant(1)),
                Nexp::constant(5),
            ),
        );
        assert_eq!(solver.solve_unique(&f, n), Some(Integer::from(4)));

        let ambiguous = formula(
            vec![(n, Kind::Int)],
            NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
        );
        assert_eq!(solver.solve_unique(&ambiguous, n), None);
    }

    #[test]
    fn abstract_constants_are_unknown() {
        let mut solver = SmallModelSolver::new();
        let f = formula(
            vec![],
            NConstraint::nexp_equal(Nexp::id(Ident::new("XLEN")), Nexp::constant(64)),
        );
        assert_eq!(solver.check(&f), Verdict::Unknown);
    }

    #[test]
    fn caching_reuses_verdicts() {
        let mut solver = CachingSolver::new(SmallModelSolver::new());
        let f = formula(
            vec![],
            NConstraint::lt(Nexp::constant(1), Nexp::constant(2)),
        );
        assert_eq!(solver.check(&f), Verdict::Sat);
        assert_eq!(solver.check(&f), Verdict::Sat);
        let (hits, misses) = solver.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn boolean_variables_enumerate() {
        let p = Kid::fresh("p");
        let mut solver = SmallModelSolver::new();
        // p & not(p) is unsatisfiable.
        let f = formula(
            vec![(p, Kind::Bool)],
            NConstraint::and(NConstraint::var(p), NConstraint::var(p).negate()),
        );
        assert_eq!(solver.check(&f), Verdict::Unsat);
    }
}
