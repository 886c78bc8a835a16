use wdcore::{
    compiler::{CompileOutput, Compiler},
    prover::obligation::ObligationKind,
    utils::{conf::AnalysisConfig, error::ErrorKind},
};
use wdinstr::{
    modules::{
        Function, Unit,
        builder::{FunctionBuilder, LoopClauses},
        operand::{Expr, SourceLoc, index, lit, var},
    },
    types::{IntType, Type},
};

fn compile(functions: impl IntoIterator<Item = Function>) -> CompileOutput {
    let config = AnalysisConfig {
        parallel: false,
        ..AnalysisConfig::default()
    };
    Compiler::new(config).compile(&Unit::new(functions))
}

fn only_obligation(output: &CompileOutput) -> (ObligationKind, SourceLoc) {
    assert_eq!(output.diagnostics.len(), 1, "{}", output);
    let d = &output.diagnostics[0];
    assert_eq!(d.kind, ErrorKind::UnprovableObligation);
    assert!(d.proposition.is_some());
    assert!(d.facts.is_some());
    (d.obligation.unwrap(), d.loc)
}

fn decrement(guarded: bool) -> Function {
    let mut builder = FunctionBuilder::new("decrement")
        .param("x", Type::u32())
        .returns(Type::u32());
    if guarded {
        builder = builder.requires(var("x").ge(1));
    }
    builder
        .body(|b| {
            b.var_init("y", Type::u32(), var("x"));
            b.assign("y", var("y") - 1);
            b.ret_value(var("y"));
        })
        .build_raw()
}

#[test]
fn unguarded_decrement_underflows() {
    let output = compile([decrement(false)]);
    let (kind, loc) = only_obligation(&output);
    assert_eq!(kind, ObligationKind::Underflow);
    assert_eq!(loc, SourceLoc::new(3, 5));
    assert!(output.functions.is_empty());
}

#[test]
fn precondition_makes_decrement_compile() {
    let output = compile([decrement(true)]);
    assert!(output.is_ok(), "{}", output);
    assert_eq!(output.functions.len(), 1);
}

fn lookup(len: u64, index_ty: Type, bounded: bool) -> Function {
    let mut builder = FunctionBuilder::new("lookup")
        .param("i", index_ty)
        .returns(Type::u8());
    if bounded {
        builder = builder.requires(var("i").le(4));
    }
    builder
        .body(|b| {
            b.var("a", Type::array(Type::u8(), len));
            b.ret_value(index("a", var("i")));
        })
        .build_raw()
}

#[test]
fn index_within_fixed_length_compiles() {
    assert!(compile([lookup(5, Type::u32(), true)]).is_ok());
    let refined = Type::refined(IntType::U32, 0, 4).unwrap();
    assert!(compile([lookup(5, refined, false)]).is_ok());
}

#[test]
fn shorter_array_rejects_the_same_index() {
    let output = compile([lookup(4, Type::u32(), true)]);
    let (kind, loc) = only_obligation(&output);
    assert_eq!(kind, ObligationKind::IndexBounds);
    assert_eq!(loc, SourceLoc::new(3, 5));

    let refined = Type::refined(IntType::U32, 0, 4).unwrap();
    let (kind, _) = only_obligation(&compile([lookup(4, refined, false)]));
    assert_eq!(kind, ObligationKind::IndexBounds);
}

fn divide(cond: Expr) -> Function {
    FunctionBuilder::new("divide")
        .param("c", Type::Bool)
        .param("x", Type::u32())
        .returns(Type::u32())
        .body(|b| {
            b.var("y", Type::u32());
            b.if_else(
                cond,
                |b| {
                    b.assign("y", Expr::from(10) / var("x"));
                },
                |b| {
                    b.assign("y", 0);
                },
            );
            b.ret_value(var("y"));
        })
        .build_raw()
}

#[test]
fn branch_implying_nonzero_divisor_compiles() {
    for cond in [
        var("x").not_equals(0),
        var("x").gt(0),
        var("x").ge(1),
        var("x").gt(3).and(var("c")),
    ] {
        let rendered = cond.to_string();
        let output = compile([divide(cond)]);
        assert!(output.is_ok(), "`{}`: {}", rendered, output);
    }
}

#[test]
fn unrelated_branch_fails_inside_the_true_branch() {
    let output = compile([divide(var("c"))]);
    let (kind, loc) = only_obligation(&output);
    assert_eq!(kind, ObligationKind::DivisionByZero);
    // Statement inside the `then` body, not the `else` one on the next line.
    assert_eq!(loc, SourceLoc::new(4, 5));
}

#[test]
fn failures_are_reported_per_function() {
    let output = compile([decrement(false), lookup(4, Type::u32(), true), decrement(true)]);
    // Duplicate name: the unit is rejected as a whole.
    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(output.diagnostics[0].kind, ErrorKind::UnsupportedConstruct);

    let mut renamed = decrement(true);
    renamed.name = "decrement_checked".to_string();
    let output = compile([decrement(false), lookup(4, Type::u32(), true), renamed]);
    let failed: Vec<_> = output.diagnostics.iter().map(|d| d.function.as_str()).collect();
    assert_eq!(failed, vec!["decrement", "lookup"]);
    assert!(output.function("decrement_checked").is_some());
}

/// An inner loop that always leaves through `continue outer`.
fn restart(initialised: bool) -> Function {
    FunctionBuilder::new("restart")
        .body(|b| {
            b.var("i", Type::u32());
            b.var("j", Type::u32());
            b.loop_(LoopClauses::default().label("outer"), var("i").lt(100), |b| {
                b.assign("i", var("i") + 1);
                b.assign("j", 0);
                b.while_(var("j").lt(10), |b| {
                    b.var("z", Type::u8());
                    if initialised {
                        b.assign("z", 1);
                    }
                    b.assign("z", var("z") - 1);
                    b.continue_to("outer");
                });
            });
        })
        .build_raw()
}

#[test]
fn inner_loop_left_by_outer_continue_is_checked() {
    let output = compile([restart(false)]);
    let (kind, loc) = only_obligation(&output);
    assert_eq!(kind, ObligationKind::Underflow);
    assert_eq!(loc, SourceLoc::new(9, 5));
}

#[test]
fn nested_labelled_loops_reach_every_block() {
    let output = compile([restart(true)]);
    assert!(output.is_ok(), "{}", output);
    let analysis = &output.function("restart").unwrap().analysis;
    let reachable = analysis.cfg.reverse_post_order(&[analysis.cfg.entry]);
    assert!(reachable.len() > 4);
    for block in reachable {
        assert!(analysis.state(block).is_some(), "{} was skipped:\n{}", block, analysis);
    }
}

fn remainder(positive_divisor: bool) -> Function {
    let divisor = if positive_divisor {
        var("y").gt(0)
    } else {
        var("y").not_equals(0)
    };
    FunctionBuilder::new("remainder")
        .param("x", Type::i32())
        .param("y", Type::i32())
        .returns(Type::i32())
        .requires(divisor)
        .body(|b| {
            b.ret_value(var("x") % var("y"));
        })
        .build_raw()
}

#[test]
fn signed_remainder_by_minus_one_is_rejected() {
    let output = compile([remainder(false)]);
    let (kind, loc) = only_obligation(&output);
    assert_eq!(kind, ObligationKind::Overflow);
    assert_eq!(loc, SourceLoc::new(2, 5));
    let rendered = output.diagnostics[0].proposition.as_deref().unwrap();
    assert!(rendered.contains("-2147483648"), "{}", rendered);

    assert!(compile([remainder(true)]).is_ok());
}
