//! The Tern syntax tree, shared between the (kinded) surface program and the
//! elaborated output of the checker.
//!
//! Every expression, pattern and l-value node carries a [`Tannot`]. Nodes
//! coming out of the parser and kind-inference passes carry an empty
//! annotation; the checker rebuilds the tree with every annotation filled in
//! (environment in effect, inferred type, the expected type when checking
//! mode was used, and the instantiation produced for polymorphic calls).
//! Nodes are never mutated in place, elaboration always produces new values.
use std::fmt;

use crate::identifier::{Ident, LocIdent};
use crate::position::TermPos;
use crate::tcenv::Env;
use crate::typ::{Integer, NConstraint, Nexp, Typ, TypArg, TypQuant, TypScheme};
use crate::typecheck::unif::Unifier;

/// A literal value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Lit {
    Unit,
    True,
    False,
    /// The bit literals `bitzero` and `bitone`.
    Zero,
    One,
    Num(Integer),
    /// A hexadecimal bitvector literal; the payload is the digit string
    /// without the `0x` prefix.
    Hex(String),
    /// A binary bitvector literal; the payload is the digit string without
    /// the `0b` prefix.
    Bin(String),
    String(String),
}

impl Lit {
    /// The length in bits of a bitvector literal, if this is one.
    pub fn bitvector_length(&self) -> Option<usize> {
        match self {
            Lit::Hex(digits) => Some(4 * digits.len()),
            Lit::Bin(digits) => Some(digits.len()),
            _ => None,
        }
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Lit::Unit => write!(f, "()"),
            Lit::True => write!(f, "true"),
            Lit::False => write!(f, "false"),
            Lit::Zero => write!(f, "bitzero"),
            Lit::One => write!(f, "bitone"),
            Lit::Num(n) => write!(f, "{n}"),
            Lit::Hex(digits) => write!(f, "0x{digits}"),
            Lit::Bin(digits) => write!(f, "0b{digits}"),
            Lit::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Which direction of a bidirectional mapping an application was elaborated
/// to use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MappingDir {
    Forwards,
    Backwards,
}

/// The type annotation attached to every elaborated node.
///
/// An empty annotation (the default) marks a node the checker has not visited
/// yet; the checker's output carries a filled annotation on every node.
#[derive(Clone, Debug, Default)]
pub struct Tannot(Option<Box<TannotData>>);

#[derive(Clone, Debug)]
pub struct TannotData {
    /// The environment in effect at this node.
    pub env: Env,
    /// The inferred or checked type of this node.
    pub typ: Typ,
    /// The expected type, if the node was visited in checking mode.
    pub expected: Option<Typ>,
    /// The unifying substitution, if the node is an application of a
    /// polymorphic function, mapping or constructor.
    pub instantiation: Option<Unifier>,
    /// The direction used, if the node is a mapping application.
    pub direction: Option<MappingDir>,
}

impl Tannot {
    pub fn empty() -> Self {
        Tannot(None)
    }

    pub fn new(env: Env, typ: Typ) -> Self {
        Tannot(Some(Box::new(TannotData {
            env,
            typ,
            expected: None,
            instantiation: None,
            direction: None,
        })))
    }

    pub fn with_expected(mut self, expected: Typ) -> Self {
        if let Some(data) = self.0.as_mut() {
            data.expected = Some(expected);
        }
        self
    }

    pub fn with_instantiation(mut self, unifier: Unifier) -> Self {
        if let Some(data) = self.0.as_mut() {
            data.instantiation = Some(unifier);
        }
        self
    }

    pub fn with_direction(mut self, direction: MappingDir) -> Self {
        if let Some(data) = self.0.as_mut() {
            data.direction = Some(direction);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn data(&self) -> Option<&TannotData> {
        self.0.as_deref()
    }

    /// The type recorded in this annotation, if the node has been
    /// elaborated.
    pub fn typ(&self) -> Option<&Typ> {
        self.data().map(|data| &data.typ)
    }

    pub fn env(&self) -> Option<&Env> {
        self.data().map(|data| &data.env)
    }

    pub fn instantiation(&self) -> Option<&Unifier> {
        self.data().and_then(|data| data.instantiation.as_ref())
    }

    pub fn direction(&self) -> Option<MappingDir> {
        self.data().and_then(|data| data.direction)
    }
}

/// An expression.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: TermPos,
    pub annot: Tannot,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Lit(Lit),
    Id(Ident),
    /// Application of a function, union constructor, mapping or overload.
    App(Ident, Vec<Expr>),
    Tuple(Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Match(Box<MatchData>),
    Let(Box<LetBind>, Box<Expr>),
    Block(Vec<Expr>),
    /// Assignment. Inside a block this either updates an existing mutable
    /// binding or, in relaxed mode, declares a new one scoped to the
    /// remainder of the block.
    Assign(LValue, Box<Expr>),
    /// Explicit scoped declaration, `var lexp = init in body`.
    Var(LValue, Box<Expr>, Box<Expr>),
    Vector(Vec<Expr>),
    List(Vec<Expr>),
    Cons(Box<Expr>, Box<Expr>),
    /// A type ascription, `e : t`.
    Annot(Box<Expr>, Typ),
    /// `assert(cond, msg)`. In blocks, a provable assertion refines the
    /// assumption set of the remainder of the block.
    Assert(Box<Expr>, Box<Expr>),
    /// Abnormal termination; the expression as a whole can take any type.
    Exit(Box<Expr>),
    /// Field projection on a record-typed expression.
    Field(Box<Expr>, LocIdent),
    /// The value of a type-level index expression.
    SizeOf(Nexp),
    /// A type-level constraint reflected as a boolean value.
    Constraint(NConstraint),
}

impl Expr {
    pub fn new(kind: ExprKind, pos: TermPos) -> Self {
        Expr {
            kind,
            pos,
            annot: Tannot::empty(),
        }
    }

    pub fn with_annot(mut self, annot: Tannot) -> Self {
        self.annot = annot;
        self
    }

    /// The elaborated type of this node. Only meaningful on checker output.
    pub fn typ(&self) -> Option<&Typ> {
        self.annot.typ()
    }

    pub fn lit(lit: Lit, pos: TermPos) -> Self {
        Expr::new(ExprKind::Lit(lit), pos)
    }

    pub fn unit(pos: TermPos) -> Self {
        Expr::lit(Lit::Unit, pos)
    }

    pub fn id(id: impl Into<Ident>, pos: TermPos) -> Self {
        Expr::new(ExprKind::Id(id.into()), pos)
    }

    pub fn app(id: impl Into<Ident>, args: Vec<Expr>, pos: TermPos) -> Self {
        Expr::new(ExprKind::App(id.into(), args), pos)
    }
}

/// A match expression: scrutinee, arms, and the cached completeness verdict.
///
/// `completeness` is `None` on surface trees, unless the user annotated the
/// match explicitly, in which case the annotation is taken at face value and
/// the completeness oracle is not consulted. The checker caches the oracle's
/// verdict here so it is computed at most once per match.
#[derive(Clone, Debug)]
pub struct MatchData {
    pub scrutinee: Expr,
    pub arms: Vec<MatchArm>,
    pub completeness: Option<Completeness>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Completeness {
    Complete,
    Incomplete,
}

#[derive(Clone, Debug)]
pub struct MatchArm {
    pub pat: Pat,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub pos: TermPos,
}

/// A let binding, `let pat = expr`.
#[derive(Clone, Debug)]
pub struct LetBind {
    pub pat: Pat,
    pub expr: Expr,
    pub pos: TermPos,
}

/// An l-value, the target of an assignment.
#[derive(Clone, Debug)]
pub struct LValue {
    pub kind: LValueKind,
    pub pos: TermPos,
    pub annot: Tannot,
}

#[derive(Clone, Debug)]
pub enum LValueKind {
    Id(Ident),
    Tuple(Vec<LValue>),
}

impl LValue {
    pub fn new(kind: LValueKind, pos: TermPos) -> Self {
        LValue {
            kind,
            pos,
            annot: Tannot::empty(),
        }
    }

    pub fn id(id: impl Into<Ident>, pos: TermPos) -> Self {
        LValue::new(LValueKind::Id(id.into()), pos)
    }

    pub fn with_annot(mut self, annot: Tannot) -> Self {
        self.annot = annot;
        self
    }
}

/// A pattern.
#[derive(Clone, Debug)]
pub struct Pat {
    pub kind: PatKind,
    pub pos: TermPos,
    pub annot: Tannot,
}

#[derive(Clone, Debug)]
pub enum PatKind {
    Wild,
    /// An identifier: binds a new variable, unless the identifier is an
    /// enumeration member, in which case it matches that member.
    Id(Ident),
    Lit(Lit),
    /// `pat as id`, binding `id` to the whole matched value.
    As(Box<Pat>, LocIdent),
    /// A pattern with a type annotation, `pat : typ`.
    Typ(Box<Pat>, Typ),
    Tuple(Vec<Pat>),
    /// A union constructor pattern.
    App(Ident, Vec<Pat>),
    Vector(Vec<Pat>),
    /// Vector concatenation, `p1 @ p2 @ .. @ pn`.
    VectorConcat(Vec<Pat>),
    /// Binds `id` to the bits `hi .. lo` of the matched vector.
    VectorSubrange(Ident, Integer, Integer),
    List(Vec<Pat>),
    Cons(Box<Pat>, Box<Pat>),
    Or(Box<Pat>, Box<Pat>),
}

impl Pat {
    pub fn new(kind: PatKind, pos: TermPos) -> Self {
        Pat {
            kind,
            pos,
            annot: Tannot::empty(),
        }
    }

    pub fn wild(pos: TermPos) -> Self {
        Pat::new(PatKind::Wild, pos)
    }

    pub fn id(id: impl Into<Ident>, pos: TermPos) -> Self {
        Pat::new(PatKind::Id(id.into()), pos)
    }

    pub fn lit(lit: Lit, pos: TermPos) -> Self {
        Pat::new(PatKind::Lit(lit), pos)
    }

    pub fn with_annot(mut self, annot: Tannot) -> Self {
        self.annot = annot;
        self
    }

    pub fn typ(&self) -> Option<&Typ> {
        self.annot.typ()
    }

    /// Whether this pattern matches any value of its type, binding at most
    /// variables.
    pub fn is_irrefutable(&self) -> bool {
        match &self.kind {
            PatKind::Wild => true,
            PatKind::Id(_) => true,
            PatKind::As(pat, _) | PatKind::Typ(pat, _) => pat.is_irrefutable(),
            PatKind::Tuple(pats) => pats.iter().all(Pat::is_irrefutable),
            _ => false,
        }
    }
}

/// A top-level definition.
#[derive(Clone, Debug)]
pub struct Def {
    pub kind: DefKind,
    pub pos: TermPos,
}

#[derive(Clone, Debug)]
pub enum DefKind {
    /// A value specification, registering the type scheme of a function or
    /// mapping before its body is seen.
    ValSpec(ValSpec),
    Fun(FunDef),
    Mapping(MappingDef),
    Type(TypeDef),
    Register(RegisterDef),
    /// A top-level immutable binding.
    Let(LetBind),
    /// An overload set: applications of the overloaded name try each member.
    Overload(LocIdent, Vec<Ident>),
    Default(Order),
}

impl Def {
    pub fn new(kind: DefKind, pos: TermPos) -> Self {
        Def { kind, pos }
    }
}

#[derive(Clone, Debug)]
pub struct ValSpec {
    pub id: LocIdent,
    pub scheme: TypScheme,
}

#[derive(Clone, Debug)]
pub struct FunDef {
    pub id: LocIdent,
    pub clauses: Vec<FunClause>,
    /// Cached completeness verdict for the clause set; `Some` on surface
    /// trees when the user annotated the definition, which suppresses the
    /// oracle.
    pub completeness: Option<Completeness>,
}

#[derive(Clone, Debug)]
pub struct FunClause {
    pub pat: Pat,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub pos: TermPos,
}

/// A mapping definition. Each clause relates a left pattern (of the mapping's
/// first type) to a right pattern (of its second type); both sides must bind
/// the same variables.
#[derive(Clone, Debug)]
pub struct MappingDef {
    pub id: LocIdent,
    pub clauses: Vec<MapClause>,
}

#[derive(Clone, Debug)]
pub struct MapClause {
    pub left: Pat,
    pub right: Pat,
    pub pos: TermPos,
}

#[derive(Clone, Debug)]
pub enum TypeDef {
    Record {
        id: LocIdent,
        quant: TypQuant,
        fields: Vec<(Typ, LocIdent)>,
    },
    Variant {
        id: LocIdent,
        quant: TypQuant,
        ctors: Vec<(LocIdent, Typ)>,
    },
    Enum {
        id: LocIdent,
        members: Vec<LocIdent>,
    },
    /// A parameterized type abbreviation.
    Abbrev {
        id: LocIdent,
        quant: TypQuant,
        arg: TypArg,
    },
    /// An abstract type constant, treated as uninterpreted by the solver.
    Abstract { id: LocIdent, kind: crate::typ::Kind },
}

impl TypeDef {
    pub fn id(&self) -> LocIdent {
        match self {
            TypeDef::Record { id, .. }
            | TypeDef::Variant { id, .. }
            | TypeDef::Enum { id, .. }
            | TypeDef::Abbrev { id, .. }
            | TypeDef::Abstract { id, .. } => *id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegisterDef {
    pub id: LocIdent,
    pub typ: Typ,
    pub init: Option<Expr>,
}

/// The default bit ordering of vectors. Purely bookkeeping at the typing
/// level: lengths do not depend on it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Order {
    Inc,
    #[default]
    Dec,
}
