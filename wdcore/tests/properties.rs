use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wdcore::{
    compiler::Compiler,
    facts::{Atom, Context, Fact, Prop, Term, set::FactSet},
    utils::conf::AnalysisConfig,
};
use wdinstr::{
    modules::{
        Function, Unit,
        builder::FunctionBuilder,
        int::BinaryOp,
        operand::{index, len, var},
        scope::Scope,
    },
    types::{Type, interval::Interval},
};

fn scope() -> Scope {
    let mut scope = Scope::default();
    scope.declare("x", Type::u32());
    scope.declare("y", Type::u32());
    scope.declare("z", Type::i32());
    scope.declare("c", Type::Bool);
    scope
}

fn random_interval(rng: &mut ChaCha8Rng) -> Interval {
    let lo: i64 = rng.random_range(0..200);
    let width: i64 = rng.random_range(0..100);
    Interval::new(lo, lo + width).unwrap()
}

fn random_set(rng: &mut ChaCha8Rng, ctx: &Context<'_>) -> FactSet {
    let mut set = FactSet::new();
    for name in ["x", "y"] {
        if rng.random_bool(0.8) {
            set.assume(
                Fact::Range {
                    atom: Atom::var(name),
                    range: random_interval(rng),
                },
                ctx,
            );
        }
    }
    if rng.random_bool(0.5) {
        let cond = Term::binary(BinaryOp::Le, Term::var("x"), Term::var("y"));
        set.assume_cond(&cond, true, ctx);
    }
    if rng.random_bool(0.3) {
        set.assume_cond(&Term::var("c"), rng.random_bool(0.5), ctx);
    }
    set
}

#[test]
fn merge_keeps_only_what_both_sides_prove() {
    let scope = scope();
    let config = AnalysisConfig::default();
    let ctx = Context::new(&scope, &config);
    let mut rng = ChaCha8Rng::seed_from_u64(0x3e7_9e);

    for _ in 0..400 {
        let a = random_set(&mut rng, &ctx);
        let b = random_set(&mut rng, &ctx);
        let merged = a.merge(&b);
        for fact in merged.iter() {
            let prop = fact.to_prop();
            assert!(a.prove(&prop, &ctx), "`{}` not implied by {}", prop, a);
            assert!(b.prove(&prop, &ctx), "`{}` not implied by {}", prop, b);
        }
        for side in [&a, &b] {
            if side.is_unreachable() {
                continue;
            }
            for name in ["x", "y"] {
                let atom = Atom::var(name);
                if let (Some(narrow), Some(wide)) = (side.range_of(&atom), merged.range_of(&atom)) {
                    assert!(narrow.is_subset_of(wide), "{} lost values of {}", merged, side);
                }
            }
        }
    }
}

#[test]
fn merge_with_unreachable_is_identity() {
    let scope = scope();
    let config = AnalysisConfig::default();
    let ctx = Context::new(&scope, &config);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let a = random_set(&mut rng, &ctx);
    assert_eq!(a.merge(&FactSet::unreachable()), a);
    assert_eq!(FactSet::unreachable().merge(&a), a);
}

fn random_prop(rng: &mut ChaCha8Rng) -> Term {
    let k = Term::int(rng.random_range(1..1000));
    match rng.random_range(0..7) {
        0 => Term::binary(BinaryOp::Le, Term::var("x"), k),
        1 => Term::binary(BinaryOp::Ge, Term::var("y"), k),
        2 => Term::binary(BinaryOp::Lt, Term::var("x"), Term::var("y")),
        3 => Term::binary(
            BinaryOp::Le,
            Term::binary(BinaryOp::Add, Term::var("x"), k),
            Term::var("y"),
        ),
        4 => Term::binary(BinaryOp::Eq, Term::var("x"), Term::var("y")),
        5 => Term::var("c"),
        _ => Term::not(Term::var("c")),
    }
}

#[test]
fn assumed_propositions_are_provable() {
    let scope = scope();
    let config = AnalysisConfig::default();
    let ctx = Context::new(&scope, &config);
    let mut rng = ChaCha8Rng::seed_from_u64(0xa55);

    for _ in 0..300 {
        let mut facts = FactSet::new();
        let mut assumed = Vec::new();
        for _ in 0..rng.random_range(1..4) {
            let p = random_prop(&mut rng);
            facts.assume_cond(&p, true, &ctx);
            assumed.push(p);
        }
        for p in assumed {
            assert!(facts.prove(&Prop::Holds(p.clone()), &ctx), "{} from {}", p, facts);
        }
    }
}

#[test]
fn range_facts_prove_their_own_proposition() {
    let scope = scope();
    let config = AnalysisConfig::default();
    let ctx = Context::new(&scope, &config);
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..200 {
        let lo: i64 = rng.random_range(-500..500);
        let range = Interval::new(lo, lo + rng.random_range(0..50)).unwrap();
        let fact = Fact::Range {
            atom: Atom::var("z"),
            range,
        };
        let mut facts = FactSet::new();
        facts.assume(fact.clone(), &ctx);
        assert!(facts.prove(&fact.to_prop(), &ctx));
    }
}

fn find_zero(name: &str) -> Function {
    FunctionBuilder::new(name)
        .param("buf", Type::slice(Type::u8()))
        .returns(Type::u64())
        .requires(len("buf").le(1024))
        .body(|b| {
            b.var("i", Type::u64());
            b.while_(var("i").lt(len("buf")), |b| {
                b.if_(index("buf", var("i")).equals(0), |b| {
                    b.ret_value(var("i"));
                });
                b.assign("i", var("i") + 1);
            });
            b.ret_value(var("i"));
        })
        .build_raw()
}

#[test]
fn compilation_is_deterministic() {
    let unit = Unit::new((0..8).map(|i| find_zero(&format!("find{}", i))));
    let compiler = Compiler::default();
    let first = compiler.compile(&unit);
    let second = compiler.compile(&unit);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.diagnostics, second.diagnostics);
    assert!(first.is_ok(), "{}", first);

    let sequential = Compiler::new(AnalysisConfig {
        parallel: false,
        ..AnalysisConfig::default()
    })
    .compile(&unit);
    assert_eq!(first.to_string(), sequential.to_string());
}
