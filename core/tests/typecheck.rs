//! End-to-end checks of the elaborator against the bounded-enumeration
//! solver oracle.
use assert_matches::assert_matches;

use tern_lang_core::ast::{
    Def, DefKind, Expr, ExprKind, FunClause, FunDef, LetBind, LValue, MappingDir, Pat, PatKind,
    TypeDef, ValSpec,
};
use tern_lang_core::identifier::{Ident, Kid, LocIdent};
use tern_lang_core::position::TermPos;
use tern_lang_core::solver::{CachingSolver, Formula, SmallModelSolver, Solver, Verdict};
use tern_lang_core::tcenv::{Env, Mutability};
use tern_lang_core::typ::{
    Integer, KindedId, NConstraint, Nexp, QuantItem, Typ, TypQuant, TypScheme,
};
use tern_lang_core::typecheck::error::{TypeError, TypeErrorKind};
use tern_lang_core::typecheck::pattern::{bind, IrrefutableLastArm};
use tern_lang_core::typecheck::subtyping::subtyp;
use tern_lang_core::typecheck::unif::unify;
use tern_lang_core::typecheck::{check, infer, Options, State};

const NOWHERE: TermPos = TermPos::None;

fn with_state<T>(f: impl FnOnce(&mut State) -> T) -> T {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut solver = CachingSolver::new(SmallModelSolver::new());
    let oracle = IrrefutableLastArm;
    let mut state = State::new(&mut solver, &oracle);
    f(&mut state)
}

fn num(n: i64) -> Expr {
    Expr::lit(tern_lang_core::ast::Lit::Num(Integer::from(n)), NOWHERE)
}

fn string(s: &str) -> Expr {
    Expr::lit(tern_lang_core::ast::Lit::String(s.to_owned()), NOWHERE)
}

fn atom(n: i64) -> Typ {
    Typ::atom(Nexp::constant(n))
}

/// A solver that fails the test if it is ever consulted.
struct PanicSolver;

impl Solver for PanicSolver {
    fn check(&mut self, formula: &Formula) -> Verdict {
        panic!("solver consulted for {formula}");
    }

    fn solve_unique(&mut self, formula: &Formula, _kid: Kid) -> Option<Integer> {
        panic!("solver consulted for {formula}");
    }
}

#[test]
fn alpha_equivalent_types_never_reach_the_solver() {
    let mut solver = PanicSolver;
    let oracle = IrrefutableLastArm;
    let mut state = State::new(&mut solver, &oracle);
    let env = Env::initial();

    let n = Kid::new("n");
    let existential = Typ::exist(
        [KindedId::int(n)],
        NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
        Typ::atom(Nexp::var(n)),
    );
    for typ in [atom(5), Typ::int(), existential] {
        subtyp(&mut state, &env, &typ, &typ, NOWHERE).unwrap();
    }
}

#[test]
fn numeric_literals_have_singleton_types() {
    with_state(|state| {
        let env = Env::initial();
        let elab = infer(state, &env, &num(42)).unwrap();
        assert_eq!(elab.typ(), Some(&atom(42)));

        check(state, &env, &num(42), &atom(42)).unwrap();
        let err = check(state, &env, &num(42), &atom(43)).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::Mismatch { .. } | TypeErrorKind::Because { .. });
    });
}

#[test]
fn unification_against_self_is_the_identity() {
    with_state(|state| {
        let env = Env::initial();
        let n = Kid::new("n");
        let m = Kid::new("m");
        let typ = Typ::func(
            vec![Typ::atom(Nexp::var(n)), Typ::bitvector(Nexp::var(m))],
            Typ::atom(Nexp::sum(Nexp::var(n), Nexp::var(m))),
        );
        let goals = typ.tyvars();
        let unifier = unify(state, &env, &goals, &typ, &typ).unwrap();
        assert_eq!(unifier.len(), 2);
        assert_eq!(
            unifier.get(n).and_then(|arg| arg.as_nexp()),
            Some(&Nexp::var(n))
        );
        assert_eq!(
            unifier.get(m).and_then(|arg| arg.as_nexp()),
            Some(&Nexp::var(m))
        );
    });
}

#[test]
fn nexp_unification_peels_structure() {
    with_state(|state| {
        let env = Env::initial();
        let n = Kid::new("n");
        let goals = [n].into_iter().collect();

        // 'n + 1 against 8 pins 'n to 7.
        let template = Typ::atom(Nexp::sum(Nexp::var(n), Nexp::constant(1)));
        let unifier = unify(state, &env, &goals, &template, &atom(8)).unwrap();
        assert_eq!(
            unifier
                .get(n)
                .and_then(|arg| arg.as_nexp())
                .map(Nexp::simp),
            Some(Nexp::constant(7))
        );

        // 8 * 'n against 32 pins 'n to 4, after the divisibility proof.
        let template = Typ::atom(Nexp::times(Nexp::constant(8), Nexp::var(n)));
        let unifier = unify(state, &env, &goals, &template, &atom(32)).unwrap();
        assert_eq!(
            unifier
                .get(n)
                .and_then(|arg| arg.as_nexp())
                .map(Nexp::simp),
            Some(Nexp::constant(4))
        );

        // 8 * 'n against 30 is rejected: 30 is not divisible by 8.
        let template = Typ::atom(Nexp::times(Nexp::constant(8), Nexp::var(n)));
        assert!(unify(state, &env, &goals, &template, &atom(30)).is_err());
    });
}

#[test]
fn vector_literal_length_is_checked_against_the_type() {
    with_state(|state| {
        let env = Env::initial();
        let bits = Expr::new(
            ExprKind::Vector(vec![
                Expr::lit(tern_lang_core::ast::Lit::Zero, NOWHERE),
                Expr::lit(tern_lang_core::ast::Lit::One, NOWHERE),
                Expr::lit(tern_lang_core::ast::Lit::Zero, NOWHERE),
            ]),
            NOWHERE,
        );
        check(state, &env, &bits, &Typ::bitvector(Nexp::constant(3))).unwrap();

        let err = check(state, &env, &bits, &Typ::bitvector(Nexp::constant(4))).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::LengthMismatch { .. });
    });
}

#[test]
fn duplicate_pattern_bindings_are_rejected() {
    with_state(|state| {
        let env = Env::initial();
        let pat = Pat::new(
            PatKind::Tuple(vec![Pat::id("x", NOWHERE), Pat::id("x", NOWHERE)]),
            NOWHERE,
        );
        let typ = Typ::tuple(vec![Typ::int(), Typ::int()]);
        let err = bind(state, &env, &pat, &typ).unwrap_err();
        assert_matches!(
            err.kind,
            TypeErrorKind::DuplicateBinding { id, .. } if id == Ident::new("x")
        );
    });
}

#[test]
fn literal_patterns_desugar_into_guards() {
    with_state(|state| {
        let env = Env::initial();
        let pat = Pat::new(
            PatKind::Tuple(vec![
                Pat::id("x", NOWHERE),
                Pat::lit(tern_lang_core::ast::Lit::Num(Integer::from(0)), NOWHERE),
            ]),
            NOWHERE,
        );
        let typ = Typ::tuple(vec![Typ::int(), atom(0)]);
        let bound = bind(state, &env, &pat, &typ).unwrap();
        assert_eq!(bound.guards.len(), 1);
        assert_matches!(&bound.guards[0].kind, ExprKind::App(op, args)
            if *op == Ident::new("==") && args.len() == 2);
    });
}

#[test]
fn vector_concat_solves_the_single_unknown_length() {
    with_state(|state| {
        let env = Env::initial();
        // 0b01 @ rest, against bitvector(8): rest must be bitvector(6).
        let pat = Pat::new(
            PatKind::VectorConcat(vec![
                Pat::lit(tern_lang_core::ast::Lit::Bin("01".to_owned()), NOWHERE),
                Pat::id("rest", NOWHERE),
            ]),
            NOWHERE,
        );
        let bound = bind(state, &env, &pat, &Typ::bitvector(Nexp::constant(8))).unwrap();
        let rest_typ = match bound.env.lookup(Ident::new("rest")) {
            tern_lang_core::tcenv::Binding::Local(_, typ) => typ,
            other => panic!("unexpected binding {other:?}"),
        };
        assert!(rest_typ.alpha_equivalent(&Typ::bitvector(Nexp::constant(6))));
    });
}

#[test]
fn vector_concat_rejects_two_unknown_lengths() {
    with_state(|state| {
        let env = Env::initial();
        let pat = Pat::new(
            PatKind::VectorConcat(vec![
                Pat::id("a", NOWHERE),
                Pat::id("b", NOWHERE),
            ]),
            NOWHERE,
        );
        let err = bind(state, &env, &pat, &Typ::bitvector(Nexp::constant(8))).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::UninferrableConcat { .. });
    });
}

#[test]
fn existential_witness_shadow_leak_is_detected() {
    with_state(|state| {
        let mut files = tern_lang_core::files::Files::new();
        let file = files.add("leak.tern", "0123456789abcdef");
        let outer_pos = TermPos::Original(tern_lang_core::position::RawSpan::from_range(
            file, 0..2,
        ));

        let n = Kid::new("n");
        // 'n is already bound in the outer scope...
        let env = Env::initial().add_typ_var(KindedId::int(n), outer_pos);

        // ...and the let's right-hand side has an existential type that
        // rebinds the same name.
        let existential = Typ::exist(
            [KindedId::int(n)],
            NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
            Typ::atom(Nexp::var(n)),
        );
        let rhs = Expr::new(
            ExprKind::Annot(Box::new(num(5)), existential),
            NOWHERE,
        );
        let expr = Expr::new(
            ExprKind::Let(
                Box::new(LetBind {
                    pat: Pat::id("x", NOWHERE),
                    expr: rhs,
                    pos: NOWHERE,
                }),
                Box::new(Expr::id("x", NOWHERE)),
            ),
            NOWHERE,
        );
        let err = infer(state, &env, &expr).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::ShadowLeak { kid, .. } if kid == n);
    });
}

#[test]
fn escaping_witness_is_reexistentialized_without_shadowing() {
    with_state(|state| {
        let env = Env::initial();
        let n = Kid::new("n");
        let existential = Typ::exist(
            [KindedId::int(n)],
            NConstraint::ge(Nexp::var(n), Nexp::constant(0)),
            Typ::atom(Nexp::var(n)),
        );
        let rhs = Expr::new(
            ExprKind::Annot(Box::new(num(5)), existential.clone()),
            NOWHERE,
        );
        let expr = Expr::new(
            ExprKind::Let(
                Box::new(LetBind {
                    pat: Pat::id("x", NOWHERE),
                    expr: rhs,
                    pos: NOWHERE,
                }),
                Box::new(Expr::id("x", NOWHERE)),
            ),
            NOWHERE,
        );
        let elab = infer(state, &env, &expr).unwrap();
        let typ = elab.typ().unwrap();
        assert!(typ.tyvars().is_empty(), "no free witnesses may escape");
        assert!(typ.as_exist().is_some());
    });
}

#[test]
fn mapping_calls_fall_back_to_the_backwards_direction() {
    with_state(|state| {
        let env = Env::initial().add_val_spec(
            Ident::new("decode"),
            TypScheme::monomorphic(Typ::bidir(Typ::string(), atom(5))),
        );
        let call = Expr::app("decode", vec![num(5)], NOWHERE);
        let elab = infer(state, &env, &call).unwrap();
        assert!(elab.typ().unwrap().alpha_equivalent(&Typ::string()));
        assert_eq!(elab.annot.direction(), Some(MappingDir::Backwards));

        let forwards = Expr::app("decode", vec![string("five")], NOWHERE);
        let elab = infer(state, &env, &forwards).unwrap();
        assert_eq!(elab.annot.direction(), Some(MappingDir::Forwards));

        // Neither direction applies: both failures are reported.
        let bad = Expr::app(
            "decode",
            vec![Expr::lit(tern_lang_core::ast::Lit::True, NOWHERE)],
            NOWHERE,
        );
        let err = infer(state, &env, &bad).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::AllFailed(failures) if failures.len() == 2);
    });
}

#[test]
fn boolean_union_if_infers_the_two_point_type() {
    with_state(|state| {
        let env = Env::initial().add_local(
            Ident::new("flag"),
            Mutability::Immutable,
            Typ::bool(),
        );
        let expr = Expr::new(
            ExprKind::If(
                Box::new(Expr::id("flag", NOWHERE)),
                Box::new(num(2)),
                Box::new(num(4)),
            ),
            NOWHERE,
        );
        let elab = infer(state, &env, &expr).unwrap();
        let typ = elab.typ().unwrap().clone();
        assert!(typ.as_exist().is_some(), "expected an existential, got {typ}");

        // The result is provably "2 or 4"...
        let m = Kid::new("m");
        let two_or_four = Typ::exist(
            [KindedId::int(m)],
            NConstraint::or(
                NConstraint::nexp_equal(Nexp::var(m), Nexp::constant(2)),
                NConstraint::nexp_equal(Nexp::var(m), Nexp::constant(4)),
            ),
            Typ::atom(Nexp::var(m)),
        );
        subtyp(state, &env, &typ, &two_or_four, NOWHERE).unwrap();

        // ...and not a single known value.
        assert!(subtyp(state, &env, &typ, &atom(2), NOWHERE).is_err());
    });
}

#[test]
fn exhausted_overloads_report_every_candidate() {
    with_state(|state| {
        let env = Env::initial()
            .add_val_spec(
                Ident::new("f1"),
                TypScheme::monomorphic(Typ::func(vec![Typ::int()], Typ::int())),
            )
            .add_val_spec(
                Ident::new("f2"),
                TypScheme::monomorphic(Typ::func(vec![Typ::bool()], Typ::bool())),
            )
            .add_overload(Ident::new("f"), vec![Ident::new("f1"), Ident::new("f2")]);

        let call = Expr::app("f", vec![string("hello")], NOWHERE);
        let err = infer(state, &env, &call).unwrap_err();
        let failures = assert_matches!(err.kind, TypeErrorKind::AllFailed(failures) => failures);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|(label, _)| label == "f1"));
        assert!(failures.iter().any(|(label, _)| label == "f2"));
    });
}

#[test]
fn overload_resolution_picks_the_numeric_candidate() {
    with_state(|state| {
        let env = Env::initial();
        let call = Expr::app("==", vec![num(2), num(2)], NOWHERE);
        let elab = infer(state, &env, &call).unwrap();
        let typ = elab.typ().unwrap();
        assert!(typ.alpha_equivalent(&Typ::atom_bool(NConstraint::tru())));
    });
}

#[test]
fn addition_of_singletons_is_a_singleton() {
    with_state(|state| {
        let env = Env::initial();
        let call = Expr::app("+", vec![num(2), num(3)], NOWHERE);
        let elab = infer(state, &env, &call).unwrap();
        assert!(elab.typ().unwrap().alpha_equivalent(&atom(5)));
        assert!(elab.annot.instantiation().is_some());
    });
}

#[test]
fn blocks_declare_then_update_by_binding_status() {
    with_state(|state| {
        let env = Env::initial();
        let assign = |x: &str, value: i64| {
            Expr::new(
                ExprKind::Assign(LValue::id(x, NOWHERE), Box::new(num(value))),
                NOWHERE,
            )
        };
        let block = Expr::new(
            ExprKind::Block(vec![
                assign("x", 5),
                assign("x", 6),
                Expr::id("x", NOWHERE),
            ]),
            NOWHERE,
        );
        let elab = infer(state, &env, &block).unwrap();
        assert!(elab.typ().unwrap().alpha_equivalent(&Typ::int()));
    });
}

#[test]
fn assigning_an_immutable_binding_is_an_error() {
    with_state(|state| {
        let env = Env::initial().add_local(
            Ident::new("x"),
            Mutability::Immutable,
            Typ::int(),
        );
        let assign = Expr::new(
            ExprKind::Assign(LValue::id("x", NOWHERE), Box::new(num(5))),
            NOWHERE,
        );
        let err = infer(state, &env, &assign).unwrap_err();
        assert_matches!(err.kind, TypeErrorKind::AssignImmutable { id } if id == Ident::new("x"));
    });
}

#[test]
fn strict_mode_rejects_implicit_declarations() {
    let mut solver = CachingSolver::new(SmallModelSolver::new());
    let oracle = IrrefutableLastArm;
    let mut state = State::with_options(
        &mut solver,
        &oracle,
        Options {
            strict_bindings: true,
            ..Options::default()
        },
    );
    let env = Env::initial();
    let block = Expr::new(
        ExprKind::Block(vec![
            Expr::new(
                ExprKind::Assign(LValue::id("x", NOWHERE), Box::new(num(5))),
                NOWHERE,
            ),
            Expr::unit(NOWHERE),
        ]),
        NOWHERE,
    );
    let err = infer(&mut state, &env, &block).unwrap_err();
    fn mentions_not_bound(err: &TypeError) -> bool {
        match &err.kind {
            TypeErrorKind::NotBound(_) => true,
            TypeErrorKind::Because { error, cause } => {
                mentions_not_bound(error) || mentions_not_bound(cause)
            }
            _ => false,
        }
    }
    assert!(mentions_not_bound(&err));
}

#[test]
fn inconsistent_assertions_make_the_rest_of_a_block_dead() {
    with_state(|state| {
        let env = Env::initial();
        let assert_false = Expr::new(
            ExprKind::Assert(
                Box::new(Expr::new(
                    ExprKind::Constraint(NConstraint::fls()),
                    NOWHERE,
                )),
                Box::new(string("unreachable")),
            ),
            NOWHERE,
        );
        let block = Expr::new(ExprKind::Block(vec![assert_false, num(5)]), NOWHERE);
        // Checking against unit succeeds even though the (dead) final
        // statement has a numeric type: the block elaborates to end in a
        // synthetic exit.
        let elab = check(state, &env, &block, &Typ::unit()).unwrap();
        let stmts = assert_matches!(&elab.kind, ExprKind::Block(stmts) => stmts);
        assert_matches!(stmts.last().map(|e| &e.kind), Some(ExprKind::Exit(_)));
    });
}

#[test]
fn implicit_arguments_are_solved_from_the_expected_type() {
    with_state(|state| {
        let n = Kid::new("n");
        let zeros = TypScheme::new(
            TypQuant::new(vec![QuantItem::KindedId(KindedId::int(n))], NOWHERE),
            Typ::func(
                vec![Typ::implicit(Nexp::var(n))],
                Typ::bitvector(Nexp::var(n)),
            ),
        );
        let env = Env::initial().add_val_spec(Ident::new("zeros"), zeros);

        // Both the zero-argument and the explicit-unit call forms work.
        for call in [
            Expr::app("zeros", vec![], NOWHERE),
            Expr::app("zeros", vec![Expr::unit(NOWHERE)], NOWHERE),
        ] {
            let elab = check(state, &env, &call, &Typ::bitvector(Nexp::constant(8))).unwrap();
            let args = assert_matches!(&elab.kind, ExprKind::App(_, args) => args);
            // The implicit argument was synthesized from the instantiation.
            assert_eq!(args.len(), 1);
            assert_matches!(&args[0].kind, ExprKind::SizeOf(_));
        }

        // Without an expected type the implicit cannot be inferred.
        let call = Expr::app("zeros", vec![], NOWHERE);
        assert!(infer(state, &env, &call).is_err());
    });
}

#[test]
fn sizeof_resolves_to_a_unique_solution() {
    with_state(|state| {
        let n = Kid::new("n");
        let env = Env::initial()
            .add_typ_var(KindedId::int(n), NOWHERE)
            .add_constraint(NConstraint::nexp_equal(Nexp::var(n), Nexp::constant(4)));
        let expr = Expr::new(ExprKind::SizeOf(Nexp::var(n)), NOWHERE);
        let elab = infer(state, &env, &expr).unwrap();
        assert_eq!(elab.typ(), Some(&atom(4)));
    });
}

#[test]
fn whole_programs_thread_the_environment() {
    with_state(|state| {
        // val double : forall 'n. atom('n) -> atom('n + 'n)
        // function double(x) = x + x
        // let four = double(2)
        let n = Kid::new("n");
        let spec = ValSpec {
            id: LocIdent::new("double"),
            scheme: TypScheme::new(
                TypQuant::new(vec![QuantItem::KindedId(KindedId::int(n))], NOWHERE),
                Typ::func(
                    vec![Typ::atom(Nexp::var(n))],
                    Typ::atom(Nexp::sum(Nexp::var(n), Nexp::var(n))),
                ),
            ),
        };
        let fundef = FunDef {
            id: LocIdent::new("double"),
            clauses: vec![FunClause {
                pat: Pat::id("x", NOWHERE),
                guard: None,
                body: Expr::app(
                    "+",
                    vec![Expr::id("x", NOWHERE), Expr::id("x", NOWHERE)],
                    NOWHERE,
                ),
                pos: NOWHERE,
            }],
            completeness: None,
        };
        let global = LetBind {
            pat: Pat::id("four", NOWHERE),
            expr: Expr::app("double", vec![num(2)], NOWHERE),
            pos: NOWHERE,
        };
        let defs = vec![
            Def::new(DefKind::ValSpec(spec), NOWHERE),
            Def::new(DefKind::Fun(fundef), NOWHERE),
            Def::new(DefKind::Let(global), NOWHERE),
        ];

        let (elaborated, final_env) =
            tern_lang_core::check_defs(state, Env::initial(), &defs).unwrap();
        assert_eq!(elaborated.len(), 3);

        let four_typ = match final_env.lookup(Ident::new("four")) {
            tern_lang_core::tcenv::Binding::Local(Mutability::Immutable, typ) => typ,
            other => panic!("unexpected binding {other:?}"),
        };
        assert!(four_typ.alpha_equivalent(&atom(4)), "got {four_typ}");
    });
}

#[test]
fn enums_and_variants_participate_in_matching() {
    with_state(|state| {
        let defs = vec![
            Def::new(
                DefKind::Type(TypeDef::Enum {
                    id: LocIdent::new("signal"),
                    members: vec![LocIdent::new("Low"), LocIdent::new("High")],
                }),
                NOWHERE,
            ),
        ];
        let (_, env) = tern_lang_core::check_defs(state, Env::initial(), &defs).unwrap();

        // Matching on an enum scrutinee with member patterns.
        let scrutinee = Expr::id("High", NOWHERE);
        let arms = vec![
            tern_lang_core::ast::MatchArm {
                pat: Pat::id("Low", NOWHERE),
                guard: None,
                body: num(0),
                pos: NOWHERE,
            },
            tern_lang_core::ast::MatchArm {
                pat: Pat::wild(NOWHERE),
                guard: None,
                body: num(1),
                pos: NOWHERE,
            },
        ];
        let expr = Expr::new(
            ExprKind::Match(Box::new(tern_lang_core::ast::MatchData {
                scrutinee,
                arms,
                completeness: None,
            })),
            NOWHERE,
        );
        let elab = infer(state, &env, &expr).unwrap();
        let data = assert_matches!(&elab.kind, ExprKind::Match(data) => data);
        assert_eq!(
            data.completeness,
            Some(tern_lang_core::ast::Completeness::Complete)
        );

        // The arm types 0 and 1 join into "0 or 1".
        let m = Kid::new("m");
        let zero_or_one = Typ::exist(
            [KindedId::int(m)],
            NConstraint::or(
                NConstraint::nexp_equal(Nexp::var(m), Nexp::constant(0)),
                NConstraint::nexp_equal(Nexp::var(m), Nexp::constant(1)),
            ),
            Typ::atom(Nexp::var(m)),
        );
        let typ = elab.typ().unwrap().clone();
        subtyp(state, &env, &typ, &zero_or_one, NOWHERE).unwrap();
    });
}
