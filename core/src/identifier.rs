//! Define the types of identifiers and type variables.
use once_cell::sync::Lazy;
use std::{
    borrow::Borrow,
    fmt::{self, Debug},
    hash::Hash,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::position::TermPos;

static INTERNER: Lazy<interner::Interner> = Lazy::new(interner::Interner::new);
static FRESH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// An interned identifier.
//
// Implementation-wise, this is just a wrapper around interner::Symbol that
// uses a hard-coded, static `Interner`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident(interner::Symbol);

impl Ident {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(INTERNER.get_or_intern(s.as_ref()))
    }

    /// Return the string representation of this identifier.
    pub fn label(&self) -> &'static str {
        INTERNER.lookup(self.0)
    }

    pub fn into_label(self) -> String {
        self.label().to_owned()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.label())
    }
}

impl PartialOrd for Ident {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ident {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.label().cmp(other.label())
    }
}

impl<F> From<F> for Ident
where
    String: From<F>,
{
    fn from(val: F) -> Self {
        Ident::new(String::from(val))
    }
}

/// Special character used for generating fresh identifiers. It must be
/// syntactically impossible to use in a standard Tern program, to avoid name
/// clashes with user identifiers.
pub const GEN_PREFIX: char = '%';

/// An identifier with a location.
///
/// The location is ignored for equality comparison and hashing; it's mainly
/// intended for error messages.
#[derive(Clone, Copy, Debug)]
pub struct LocIdent {
    ident: Ident,
    pub pos: TermPos,
    generated: bool,
}

impl LocIdent {
    pub fn new_with_pos(label: impl AsRef<str>, pos: TermPos) -> Self {
        let generated = label.as_ref().starts_with(GEN_PREFIX);
        Self {
            ident: Ident::new(label),
            pos,
            generated,
        }
    }

    pub fn new(label: impl AsRef<str>) -> Self {
        Self::new_with_pos(label, TermPos::None)
    }

    /// Create an identifier with the same label as this one, but a specified
    /// position.
    pub fn with_pos(self, pos: TermPos) -> LocIdent {
        LocIdent { pos, ..self }
    }

    /// Create a new fresh identifier. This identifier is unique and is
    /// guaranteed not to collide with any identifier defined before.
    /// Generated identifiers start with a special prefix that can't be used
    /// by normal, user-defined identifiers.
    pub fn fresh() -> Self {
        Self::new(format!(
            "{}{}",
            GEN_PREFIX,
            FRESH_COUNTER.fetch_add(1, Ordering::SeqCst)
        ))
    }

    /// Return the identifier without its position.
    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Return the string representation of this identifier.
    pub fn label(&self) -> &'static str {
        self.ident.label()
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

impl From<Ident> for LocIdent {
    fn from(ident: Ident) -> Self {
        LocIdent {
            ident,
            pos: TermPos::None,
            generated: ident.label().starts_with(GEN_PREFIX),
        }
    }
}

impl PartialEq for LocIdent {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident
    }
}

impl Eq for LocIdent {}

impl Hash for LocIdent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ident.hash(state)
    }
}

impl PartialOrd for LocIdent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocIdent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.label().cmp(other.label())
    }
}

impl Borrow<Ident> for LocIdent {
    fn borrow(&self) -> &Ident {
        &self.ident
    }
}

impl fmt::Display for LocIdent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl<F> From<F> for LocIdent
where
    String: From<F>,
{
    fn from(val: F) -> Self {
        Self::new(String::from(val))
    }
}

/// A type-level variable (a "kid", by convention written with a leading
/// quote, as in `'n`).
///
/// Type variables are globally unique names by construction: fresh variables
/// produced during elaboration are drawn from [`Kid::fresh`] and can never
/// collide with source-level ones, so substitution never needs
/// alpha-renaming.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kid(Ident);

impl Kid {
    /// Create a type variable from its label. A leading quote is added if the
    /// label doesn't carry one already.
    pub fn new(label: impl AsRef<str>) -> Self {
        let label = label.as_ref();
        if label.starts_with('\'') {
            Kid(Ident::new(label))
        } else {
            Kid(Ident::new(format!("'{label}")))
        }
    }

    /// Generate a fresh type variable, unique for the lifetime of the
    /// process. `hint` is kept in the label for readability of debug output
    /// and error messages.
    pub fn fresh(hint: &str) -> Self {
        let hint = hint.trim_start_matches('\'');
        Kid(Ident::new(format!(
            "'{}{}#{}",
            GEN_PREFIX,
            hint,
            FRESH_COUNTER.fetch_add(1, Ordering::SeqCst)
        )))
    }

    pub fn ident(&self) -> Ident {
        self.0
    }

    pub fn label(&self) -> &'static str {
        self.0.label()
    }

    pub fn is_generated(&self) -> bool {
        self.label().starts_with(&format!("'{GEN_PREFIX}"))
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl fmt::Debug for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.label())
    }
}

mod interner {
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// A symbol is a correspondence between an [Ident](super::Ident) and its
    /// string representation stored in the [Interner].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct Symbol(u32);

    /// The interner. It makes it so that labels are stored only once and can
    /// be compared and hashed as plain integers.
    pub(crate) struct Interner(RwLock<InnerInterner>);

    impl Interner {
        pub(crate) fn new() -> Self {
            Self(RwLock::new(InnerInterner::default()))
        }

        /// Store a string inside the interner if it does not exist, and
        /// return the corresponding [Symbol].
        pub(crate) fn get_or_intern(&self, string: impl AsRef<str>) -> Symbol {
            self.0.write().unwrap().get_or_intern(string.as_ref())
        }

        /// Look up the stored string corresponding to the [Symbol].
        ///
        /// This operation cannot fail since the only way to have a [Symbol]
        /// is to have interned the corresponding string first.
        pub(crate) fn lookup(&self, sym: Symbol) -> &'static str {
            self.0.read().unwrap().lookup(sym)
        }
    }

    /// The interner's mutable state. Interned strings are leaked: identifiers
    /// live for the whole process, which is the lifetime of a checking run
    /// anyway.
    #[derive(Default)]
    struct InnerInterner {
        map: HashMap<&'static str, Symbol>,
        vec: Vec<&'static str>,
    }

    impl InnerInterner {
        fn get_or_intern(&mut self, string: &str) -> Symbol {
            if let Some(sym) = self.map.get(string) {
                return *sym;
            }
            let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
            let sym = Symbol(self.vec.len() as u32);
            self.vec.push(leaked);
            self.map.insert(leaked, sym);
            sym
        }

        fn lookup(&self, sym: Symbol) -> &'static str {
            self.vec[sym.0 as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = Ident::new("foo");
        let b = Ident::new("foo");
        assert_eq!(a, b);
        assert_eq!(a.label(), "foo");
    }

    #[test]
    fn loc_ident_ignores_position() {
        let mut x = LocIdent::new("x");
        let y = LocIdent::new("x");
        x.pos = TermPos::None;
        assert_eq!(x, y);
    }

    #[test]
    fn kids_are_quoted() {
        assert_eq!(Kid::new("n").label(), "'n");
        assert_eq!(Kid::new("'n").label(), "'n");
        assert_eq!(Kid::new("n"), Kid::new("'n"));
    }

    #[test]
    fn fresh_kids_are_unique() {
        let a = Kid::fresh("ex");
        let b = Kid::fresh("ex");
        assert_ne!(a, b);
        assert!(a.is_generated());
    }
}
