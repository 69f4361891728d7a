//! The core of the Tern specification language: a constraint-based type
//! checker and elaborator for a first-order imperative language with
//! lightweight dependent numeric and boolean types.
//!
//! Tern types can be indexed by integer expressions (bitvector lengths,
//! integer singletons) and boolean constraints (flow types). The checker
//! consumes kinded, parsed definitions ([`ast::Def`]) and an initial typing
//! environment ([`tcenv::Env`]), and produces the same definitions with a
//! type annotation on every expression, pattern and l-value node, plus the
//! final environment reflecting all top-level bindings:
//!
//! ```ignore
//! let mut solver = CachingSolver::new(my_solver);
//! let oracle = IrrefutableLastArm;
//! let mut state = State::new(&mut solver, &oracle);
//! let (elaborated, final_env) = check_defs(&mut state, Env::initial(), &defs)?;
//! ```
//!
//! Proof obligations — subtype checks between indexed types, vector length
//! equalities, flow-typing refinements — are reduced to closed boolean
//! formulas over the type variables in scope and discharged through the
//! [`solver::Solver`] trait, an injected dependency standing for an external
//! decision procedure.
//!
//! This crate deliberately excludes the front end (lexing, parsing, kind
//! inference), the solver's own decision procedure, code generation and the
//! driver; see the module documentation of [`typecheck`] for the shape of
//! the algorithm itself.
pub mod ast;
pub mod environment;
pub mod error;
pub mod files;
pub mod identifier;
pub mod position;
pub mod solver;
pub mod tcenv;
pub mod typ;
pub mod typecheck;

pub use error::{Error, IntoDiagnostics};
pub use typecheck::defs::check_defs;
pub use typecheck::{check, infer, Options, State};
