use num_bigint::BigInt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wdcore::{
    compiler::{CompileOutput, Compiler},
    exec::{ExecFault, Machine, Status, Value},
    prover::obligation::ObligationKind,
};
use wdinstr::{
    modules::{
        Function, Unit,
        builder::{FunctionBuilder, LoopClauses},
        operand::{index, len, slice, var},
    },
    types::{BoundedInt, IntType, Type},
};

fn checksum() -> Function {
    FunctionBuilder::new("checksum")
        .param("buf", Type::slice(Type::u8()))
        .returns(Type::u32())
        .body(|b| {
            b.var("h", Type::u32());
            b.var("i", Type::u64());
            b.while_(var("i").lt(len("buf")), |b| {
                let byte = index("buf", var("i")).cast(BoundedInt::full(IntType::U32));
                b.assign("h", var("h").wrapping_mul(31).wrapping_add(byte));
                b.assign("i", var("i") + 1);
            });
            b.ret_value(var("h"));
        })
        .build_raw()
}

fn clamp_sub() -> Function {
    FunctionBuilder::new("clamp_sub")
        .param("a", Type::u16())
        .param("b", Type::u16())
        .returns(Type::u16())
        .body(|b| {
            b.if_(var("a").lt(var("b")), |b| {
                b.ret_value(0);
            });
            b.ret_value(var("a") - var("b"));
        })
        .build_raw()
}

fn average() -> Function {
    FunctionBuilder::new("average")
        .param("x", Type::u32())
        .param("n", Type::u32())
        .requires(var("n").ge(1))
        .returns(Type::u32())
        .body(|b| {
            b.ret_value(var("x") / var("n"));
        })
        .build_raw()
}

/// First byte of `buf[lo..hi]`, or 0 for an empty window.
fn window_head() -> Function {
    FunctionBuilder::new("window_head")
        .param("buf", Type::slice(Type::u8()))
        .param("lo", Type::u64())
        .param("hi", Type::u64())
        .requires(var("lo").le(var("hi")))
        .requires(var("hi").le(len("buf")))
        .returns(Type::u8())
        .body(|b| {
            b.var_init("w", Type::slice(Type::u8()), slice("buf", Some(var("lo")), Some(var("hi"))));
            b.if_(len("w").gt(0), |b| {
                b.ret_value(index("w", 0));
            });
            b.ret_value(0);
        })
        .build_raw()
}

/// Counts the bytes of `buf` that are at least 16, stopping at the first 0.
fn count_marks() -> Function {
    FunctionBuilder::new("count_marks")
        .param("buf", Type::slice(Type::u8()))
        .returns(Type::u64())
        .body(|b| {
            b.var("i", Type::u64());
            b.var("count", Type::u64());
            b.loop_(
                LoopClauses::default().label("scan"),
                var("i").lt(len("buf")),
                |b| {
                    b.var_init("byte", Type::u8(), index("buf", var("i")));
                    b.assign("i", var("i") + 1);
                    b.while_(var("byte").lt(16), |b| {
                        b.if_(var("byte").equals(0), |b| {
                            b.break_to("scan");
                        });
                        b.continue_to("scan");
                    });
                    b.assign("count", var("count").wrapping_add(1));
                },
            );
            b.ret_value(var("count"));
        })
        .build_raw()
}

fn compile() -> CompileOutput {
    let unit = Unit::new([checksum(), clamp_sub(), average(), window_head(), count_marks()]);
    let output = Compiler::default().compile(&unit);
    assert!(output.is_ok(), "{}", output);
    output
}

fn random_bytes(rng: &mut ChaCha8Rng, max: usize) -> Vec<u8> {
    let n = rng.random_range(0..=max);
    (0..n).map(|_| rng.random()).collect()
}

fn completed_int(result: Result<Status, ExecFault>) -> BigInt {
    match result {
        Ok(Status::Completed(Some(Value::Int(v)))) => v,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn compiled_functions_never_fault() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut rng = ChaCha8Rng::seed_from_u64(0x0dd_ba11);

    for _ in 0..200 {
        let buf = random_bytes(&mut rng, 48);
        let expected = buf
            .iter()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(*b)));
        let h = completed_int(machine.call("checksum", vec![Value::bytes(&buf)]));
        assert_eq!(h, BigInt::from(expected));

        let (a, b): (u16, u16) = (rng.random(), rng.random());
        let d = completed_int(machine.call("clamp_sub", vec![Value::int(a), Value::int(b)]));
        assert_eq!(d, BigInt::from(a.saturating_sub(b)));

        let x: u32 = rng.random();
        let n: u32 = rng.random_range(1..=u32::MAX);
        let q = completed_int(machine.call("average", vec![Value::int(x), Value::int(n)]));
        assert_eq!(q, BigInt::from(x / n));

        let lo = rng.random_range(0..=buf.len());
        let hi = rng.random_range(lo..=buf.len());
        let head = completed_int(machine.call(
            "window_head",
            vec![Value::bytes(&buf), Value::int(lo), Value::int(hi)],
        ));
        let expected = if lo < hi { buf[lo] } else { 0 };
        assert_eq!(head, BigInt::from(expected));
    }
}

#[test]
fn labelled_exits_match_a_plain_scan() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut rng = ChaCha8Rng::seed_from_u64(0x5ca_4);

    for _ in 0..200 {
        let n = rng.random_range(0..=40);
        let buf: Vec<u8> = (0..n)
            .map(|_| {
                if rng.random_bool(0.3) {
                    rng.random_range(0..16)
                } else {
                    rng.random()
                }
            })
            .collect();
        let mut expected = 0u64;
        for &byte in &buf {
            if byte == 0 {
                break;
            }
            if byte < 16 {
                continue;
            }
            expected += 1;
        }
        let count = completed_int(machine.call("count_marks", vec![Value::bytes(&buf)]));
        assert_eq!(count, BigInt::from(expected), "{:?}", buf);
    }
}

#[test]
fn violated_precondition_is_reported() {
    let output = compile();
    let mut machine = Machine::new(&output);
    match machine.call("average", vec![Value::int(10), Value::int(0)]) {
        Err(ExecFault::Violation { kind, .. }) => assert_eq!(kind, ObligationKind::CalleePrecondition),
        other => panic!("unexpected outcome {other:?}"),
    }
    match machine.call("clamp_sub", vec![Value::int(70_000), Value::int(0)]) {
        Err(ExecFault::Violation { kind, .. }) => assert_eq!(kind, ObligationKind::ArgumentRange),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        machine.call("clamp_sub", vec![Value::int(1)]),
        Err(ExecFault::Arity { .. })
    ));
    assert!(matches!(
        machine.call("missing", vec![]),
        Err(ExecFault::UndefinedFunction(_))
    ));
}

#[test]
fn step_limit_stops_long_runs() {
    let output = compile();
    let mut machine = Machine::new(&output).with_step_limit(10);
    let buf = vec![1u8; 64];
    assert_eq!(
        machine.call("checksum", vec![Value::bytes(&buf)]),
        Err(ExecFault::StepLimit(10))
    );
}
