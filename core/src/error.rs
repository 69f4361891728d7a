//! User-facing errors and their conversion to renderable diagnostics.
//!
//! The checker's structured errors ([`crate::typecheck::error::TypeError`])
//! carry source locations and composable secondary explanations. This module
//! turns them into `codespan-reporting` diagnostics — primary label at the
//! failing node, secondary labels for every "because" in the chain — leaving
//! the actual rendering loop to the surrounding driver.
use std::fmt;

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::files::FileId;
use crate::position::TermPos;
use crate::typecheck::error::{TypeError, TypeErrorKind};

/// The errors this crate surfaces to its callers.
#[derive(Clone, Debug)]
pub enum Error {
    Typecheck(TypeError),
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Typecheck(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Typecheck(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

/// Conversion of structured errors into diagnostics.
pub trait IntoDiagnostics {
    fn into_diagnostics(self) -> Vec<Diagnostic<FileId>>;
}

impl IntoDiagnostics for Error {
    fn into_diagnostics(self) -> Vec<Diagnostic<FileId>> {
        match self {
            Error::Typecheck(err) => err.into_diagnostics(),
        }
    }
}

fn primary(pos: TermPos, message: impl Into<String>) -> Option<Label<FileId>> {
    pos.into_opt()
        .map(|span| Label::primary(span.src_id, span.to_range()).with_message(message.into()))
}

fn secondary(pos: TermPos, message: impl Into<String>) -> Option<Label<FileId>> {
    pos.into_opt()
        .map(|span| Label::secondary(span.src_id, span.to_range()).with_message(message.into()))
}

impl IntoDiagnostics for TypeError {
    fn into_diagnostics(self) -> Vec<Diagnostic<FileId>> {
        let mut labels: Vec<Label<FileId>> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let message = headline(&self);

        collect(&self, true, &mut labels, &mut notes);

        vec![Diagnostic::error()
            .with_message(message)
            .with_labels(labels)
            .with_notes(notes)]
    }
}

/// The top-line message: the outermost non-`Because` explanation.
fn headline(err: &TypeError) -> String {
    match &err.kind {
        TypeErrorKind::Because { error, .. } => headline(error),
        kind => kind.to_string(),
    }
}

fn collect(err: &TypeError, is_primary: bool, labels: &mut Vec<Label<FileId>>, notes: &mut Vec<String>) {
    let push = |labels: &mut Vec<Label<FileId>>, label: Option<Label<FileId>>| {
        if let Some(label) = label {
            labels.push(label);
        }
    };
    match &err.kind {
        TypeErrorKind::Because { error, cause } => {
            collect(error, is_primary, labels, notes);
            collect(cause, false, labels, notes);
        }
        TypeErrorKind::ShadowLeak {
            kid,
            introduced,
            shadowed,
        } => {
            push(labels, primary(err.pos, err.kind.to_string()));
            push(labels, secondary(*introduced, format!("{kid} introduced here")));
            push(labels, secondary(*shadowed, format!("{kid} shadowed here")));
        }
        TypeErrorKind::DuplicateBinding { id, first, second } => {
            push(labels, primary(err.pos, err.kind.to_string()));
            push(labels, secondary(*first, format!("{id} first bound here")));
            push(labels, secondary(*second, format!("{id} bound again here")));
        }
        TypeErrorKind::UninferrableConcat { first, second } => {
            push(labels, primary(err.pos, err.kind.to_string()));
            push(labels, secondary(*first, "length not inferrable here"));
            push(labels, secondary(*second, "nor here"));
        }
        TypeErrorKind::UnresolvedArguments(positions) => {
            push(labels, primary(err.pos, err.kind.to_string()));
            for pos in positions {
                push(labels, secondary(*pos, "argument deferred until no progress was made"));
            }
        }
        TypeErrorKind::AllFailed(alternatives) => {
            push(labels, primary(err.pos, "no alternative applies"));
            for (label, alt) in alternatives {
                notes.push(format!("{label}: {alt}"));
                collect(alt, false, labels, notes);
            }
        }
        kind => {
            let label = if is_primary {
                primary(err.pos, kind.to_string())
            } else {
                secondary(err.pos, kind.to_string())
            };
            push(labels, label);
        }
    }
}
