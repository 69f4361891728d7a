//! Internal error types for typechecking.
//!
//! There is a hierarchy between error types, from the most local/specific to
//! the most high-level:
//!
//! - [`UnifyError`]: a unification mismatch. Deliberately distinct from
//!   [`TypeError`], because call sites genuinely branch on which occurred:
//!   overload resolution and argument-instantiation deferral catch
//!   unification errors and try something else, while a general type error
//!   at the same place is (for overloads) also caught but reported
//!   differently.
//! - [`TypeError`]: the general typechecking error, carrying a source
//!   location and a composable explanation. Secondary explanations at other
//!   locations are attached with [`TypeError::because`]; the failures of
//!   every candidate of an exhausted overload set (or both directions of a
//!   mapping) are aggregated in [`TypeErrorKind::AllFailed`].
//!
//! No error is ever silently discarded: a caught-and-retried error is
//! re-surfaced, composed into the final report, if every retry also fails.
use std::fmt;

use crate::identifier::{Ident, Kid};
use crate::position::TermPos;
use crate::typ::{NConstraint, Nexp, Typ, TypArg};

pub type TcResult<T> = Result<T, TypeError>;
pub type UnifResult<T> = Result<T, UnifyError>;

/// A typechecking error: a location and a structured explanation.
#[derive(Clone, Debug)]
pub struct TypeError {
    pub pos: TermPos,
    pub kind: TypeErrorKind,
}

#[derive(Clone, Debug)]
pub enum TypeErrorKind {
    /// A free-form explanation, for the conditions that don't warrant their
    /// own variant.
    Message(String),
    /// An expression's inferred type is not a subtype of the expected one.
    Mismatch { expected: Typ, inferred: Typ },
    /// A subtype check failed; if the failure came down to a single
    /// unprovable constraint, it is named.
    SubtypeFailed {
        sub: Typ,
        sup: Typ,
        unproved: Option<NConstraint>,
    },
    /// A constraint could not be proved from the current assumptions.
    Unprovable(NConstraint),
    /// An identifier has no binding at all.
    NotBound(Ident),
    /// An identifier is bound, but not by the kind of binding this position
    /// requires (e.g. assigning to an enumeration member).
    BadBinding { id: Ident, explanation: String },
    /// Assignment to an immutable binding.
    AssignImmutable { id: Ident },
    /// A type variable bound in an inner scope would escape into a scope
    /// where its name is bound to something else.
    ShadowLeak {
        kid: Kid,
        introduced: TermPos,
        shadowed: TermPos,
    },
    /// The same variable is bound twice within one pattern.
    DuplicateBinding {
        id: Ident,
        first: TermPos,
        second: TermPos,
    },
    /// A vector length did not match the expected length.
    LengthMismatch { expected: Nexp, actual: Nexp },
    /// A function's quantifier constraints could not be proved after full
    /// argument unification.
    UnresolvedQuantifiers(Vec<NConstraint>),
    /// The argument-instantiation fixpoint made no progress with these
    /// argument positions still unresolved.
    UnresolvedArguments(Vec<TermPos>),
    /// More than one sub-pattern of a vector concatenation has no statically
    /// inferrable length.
    UninferrableConcat { first: TermPos, second: TermPos },
    /// An unbound type variable was referenced.
    UnboundTypeVariable(Kid),
    /// A type that provably has no inhabitants where a non-empty type is
    /// required.
    EmptyType(Typ),
    /// A unification failure surfaced as a hard error.
    Unification(UnifyError),
    /// An error explained by a secondary error at another location.
    Because {
        error: Box<TypeError>,
        cause: Box<TypeError>,
    },
    /// Several alternatives all failed and none is clearly "the" cause:
    /// every labeled failure is reported.
    AllFailed(Vec<(String, TypeError)>),
}

impl TypeError {
    pub fn new(pos: TermPos, kind: TypeErrorKind) -> Self {
        TypeError { pos, kind }
    }

    pub fn msg(pos: TermPos, message: impl Into<String>) -> Self {
        TypeError::new(pos, TypeErrorKind::Message(message.into()))
    }

    /// Attach a secondary explanation: `self` happened because of `cause`,
    /// which carries its own location.
    pub fn because(self, cause: TypeError) -> Self {
        let pos = self.pos;
        TypeError::new(
            pos,
            TypeErrorKind::Because {
                error: Box::new(self),
                cause: Box::new(cause),
            },
        )
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for TypeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeErrorKind::Message(msg) => write!(f, "{msg}"),
            TypeErrorKind::Mismatch { expected, inferred } => {
                write!(f, "expected {expected}, found {inferred}")
            }
            TypeErrorKind::SubtypeFailed { sub, sup, unproved } => {
                write!(f, "{sub} is not a subtype of {sup}")?;
                if let Some(nc) = unproved {
                    write!(f, " ({nc} could not be proved)")?;
                }
                Ok(())
            }
            TypeErrorKind::Unprovable(nc) => write!(f, "could not prove {nc}"),
            TypeErrorKind::NotBound(id) => write!(f, "{id} is not bound"),
            TypeErrorKind::BadBinding { id, explanation } => write!(f, "{id} {explanation}"),
            TypeErrorKind::AssignImmutable { id } => {
                write!(f, "cannot assign to {id}: it is bound immutably")
            }
            TypeErrorKind::ShadowLeak { kid, .. } => write!(
                f,
                "type variable {kid} would leak into a scope where it is shadowed"
            ),
            TypeErrorKind::DuplicateBinding { id, .. } => {
                write!(f, "{id} is bound more than once in the same pattern")
            }
            TypeErrorKind::LengthMismatch { expected, actual } => {
                write!(f, "vector length mismatch: expected {expected}, found {actual}")
            }
            TypeErrorKind::UnresolvedQuantifiers(ncs) => {
                write!(f, "could not resolve quantifier constraint(s)")?;
                for nc in ncs {
                    write!(f, " {nc}")?;
                }
                Ok(())
            }
            TypeErrorKind::UnresolvedArguments(positions) => write!(
                f,
                "could not instantiate {} argument(s): their types mention undetermined \
                 type variables",
                positions.len()
            ),
            TypeErrorKind::UninferrableConcat { .. } => write!(
                f,
                "more than one sub-pattern of this vector concatenation has no statically \
                 inferrable length"
            ),
            TypeErrorKind::UnboundTypeVariable(kid) => {
                write!(f, "type variable {kid} is not bound")
            }
            TypeErrorKind::EmptyType(typ) => {
                write!(f, "type {typ} has no inhabitants")
            }
            TypeErrorKind::Unification(err) => write!(f, "{err}"),
            TypeErrorKind::Because { error, .. } => write!(f, "{error}"),
            TypeErrorKind::AllFailed(alternatives) => {
                write!(f, "no alternative applies:")?;
                for (label, err) in alternatives {
                    write!(f, " [{label}: {err}]")?;
                }
                Ok(())
            }
        }
    }
}

/// Error during the unification of two types, type arguments, index
/// expressions or constraints.
///
/// In each variant, `left` is the template side (the one containing goal
/// variables) and `right` the side being matched against.
#[derive(Clone, Debug)]
pub enum UnifyError {
    Mismatch { left: Typ, right: Typ },
    ArgMismatch { left: TypArg, right: TypArg },
    NexpMismatch { left: Nexp, right: Nexp },
    ConstraintMismatch {
        left: NConstraint,
        right: NConstraint,
    },
    ArityMismatch { left: usize, right: usize },
    /// A goal variable occurs on the side being unified against.
    OccursCheck(Kid),
    /// Two unifiers assign provably different values to the same variable.
    MergeConflict {
        kid: Kid,
        first: TypArg,
        second: TypArg,
    },
}

impl UnifyError {
    /// Lift a unification error into a typechecking error, at the point
    /// where it stops being recoverable.
    pub fn into_type_error(self, pos: TermPos) -> TypeError {
        TypeError::new(pos, TypeErrorKind::Unification(self))
    }
}

impl fmt::Display for UnifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnifyError::Mismatch { left, right } => {
                write!(f, "cannot unify {left} with {right}")
            }
            UnifyError::ArgMismatch { left, right } => {
                write!(f, "cannot unify type argument {left} with {right}")
            }
            UnifyError::NexpMismatch { left, right } => {
                write!(f, "cannot unify index {left} with {right}")
            }
            UnifyError::ConstraintMismatch { left, right } => {
                write!(f, "cannot unify constraint {left} with {right}")
            }
            UnifyError::ArityMismatch { left, right } => {
                write!(f, "arity mismatch: {left} versus {right}")
            }
            UnifyError::OccursCheck(kid) => {
                write!(f, "goal variable {kid} occurs in the unification target")
            }
            UnifyError::MergeConflict { kid, first, second } => {
                write!(
                    f,
                    "conflicting instantiations for {kid}: {first} and {second}"
                )
            }
        }
    }
}
