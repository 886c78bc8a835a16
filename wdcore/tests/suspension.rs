use wdcore::{
    compiler::{CompileOutput, Compiler},
    exec::{Continuation, InputBuffer, Io, Machine, OutputBuffer, Status, Value},
    magic::{STATUS_INTERLEAVED_CALLS, STATUS_UNEXPECTED_EOF},
    suspend::CheckpointKind,
    utils::conf::AnalysisConfig,
};
use wdinstr::{
    modules::{Function, Unit, builder::FunctionBuilder, operand::var},
    types::Type,
};

fn read_byte() -> Function {
    FunctionBuilder::new("read_byte")
        .param("src", Type::Reader)
        .returns(Type::u8())
        .suspendible()
        .body(|b| {
            b.var("x", Type::u8());
            b.read("x", "src");
            b.ret_value(var("x"));
        })
        .build_raw()
}

/// Expands `pairs` (count, byte) pairs into `count` copies of `byte`.
fn expand() -> Function {
    FunctionBuilder::new("expand")
        .param("src", Type::Reader)
        .param("dst", Type::Writer)
        .param("pairs", Type::u32())
        .suspendible()
        .body(|b| {
            b.var("i", Type::u32());
            b.var("count", Type::u8());
            b.var("value", Type::u8());
            b.var("j", Type::u8());
            b.while_(var("i").lt(var("pairs")), |b| {
                b.call_into("count", "read_byte", vec![var("src")]);
                b.call_into("value", "read_byte", vec![var("src")]);
                b.assign("j", 0);
                b.while_(var("j").lt(var("count")), |b| {
                    b.write("dst", var("value"));
                    b.assign("j", var("j") + 1);
                });
                b.assign("i", var("i") + 1);
            });
        })
        .build_raw()
}

fn compile() -> CompileOutput {
    let config = AnalysisConfig {
        parallel: false,
        ..AnalysisConfig::default()
    };
    let output = Compiler::new(config).compile(&Unit::new([read_byte(), expand()]));
    assert!(output.is_ok(), "{}", output);
    output
}

const INPUT: [u8; 6] = [3, b'a', 0, b'z', 2, b'q'];

fn args() -> Vec<Value> {
    vec![Value::Reader, Value::Writer, Value::int(3)]
}

#[test]
fn lowering_records_nested_checkpoints() {
    let output = compile();
    let lowered = output.function("expand").unwrap().lowered.as_ref().unwrap();
    let kinds: Vec<_> = lowered.checkpoints.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![CheckpointKind::Call, CheckpointKind::Call, CheckpointKind::Write]
    );
    assert_eq!(lowered.layout.depth, 2);
    let write = lowered.checkpoint(3).unwrap();
    let saved: Vec<_> = write.saved.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(saved, vec!["count", "i", "j", "value"]);
}

#[test]
fn whole_input_runs_to_completion() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut io = Io::new(InputBuffer::complete(&INPUT), OutputBuffer::with_capacity(64));
    let mut cont = Continuation::new();
    let status = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
    assert_eq!(status, Status::Completed(None));
    assert_eq!(io.output.data(), b"aaaqq");
    assert!(!cont.is_suspended());
}

#[test]
fn one_byte_at_a_time_gives_the_same_output() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut io = Io::new(InputBuffer::new(), OutputBuffer::with_capacity(1));
    let mut cont = Continuation::new();
    let mut pending = INPUT.iter();
    let mut produced = Vec::new();
    let mut deepest = 0;
    let mut suspensions = 0;

    loop {
        let status = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
        produced.extend(io.output.take());
        match status {
            Status::Completed(value) => {
                assert_eq!(value, None);
                break;
            }
            Status::NeedsMoreInput => match pending.next() {
                Some(b) => io.input.push(&[*b]),
                None => io.input.close(),
            },
            Status::NeedsMoreOutput => {}
            Status::Failed(status) => panic!("failed with `{status}`"),
        }
        suspensions += 1;
        deepest = deepest.max(cont.depth());
        assert!(cont.is_suspended());
    }

    assert_eq!(produced, b"aaaqq");
    assert!(suspensions >= INPUT.len());
    assert_eq!(deepest, 2);
}

#[test]
fn end_of_input_failure_is_sticky() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut io = Io::new(InputBuffer::complete(&[2, b'x', 1]), OutputBuffer::with_capacity(64));
    let mut cont = Continuation::new();

    let status = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
    assert_eq!(status, Status::Failed(STATUS_UNEXPECTED_EOF.to_string()));
    assert_eq!(io.output.take(), b"xx");

    io.input.push(&[b'y', 1, b'z']);
    for _ in 0..3 {
        let again = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
        assert_eq!(again, status);
        assert!(io.output.data().is_empty());
    }
    assert_eq!(cont.failure(), Some(STATUS_UNEXPECTED_EOF));
}

#[test]
fn resuming_through_another_function_fails() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut io = Io::new(InputBuffer::new(), OutputBuffer::with_capacity(8));
    let mut cont = Continuation::new();

    let status = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
    assert_eq!(status, Status::NeedsMoreInput);

    let status = machine
        .resume("read_byte", vec![Value::Reader], &mut cont, &mut io)
        .unwrap();
    assert_eq!(status, Status::Failed(STATUS_INTERLEAVED_CALLS.to_string()));

    io.input.push(&INPUT);
    let status = machine.resume("expand", args(), &mut cont, &mut io).unwrap();
    assert_eq!(status, Status::Failed(STATUS_INTERLEAVED_CALLS.to_string()));
}

#[test]
fn dropping_a_continuation_cancels_the_call() {
    let output = compile();
    let mut machine = Machine::new(&output);
    let mut io = Io::new(InputBuffer::new(), OutputBuffer::with_capacity(2));
    let mut cont = Continuation::new();
    assert_eq!(
        machine.resume("expand", args(), &mut cont, &mut io).unwrap(),
        Status::NeedsMoreInput
    );
    drop(cont);

    let mut fresh = Continuation::new();
    io.input.push(&INPUT);
    io.input.close();
    let status = machine.resume("expand", args(), &mut fresh, &mut io).unwrap();
    assert!(status.is_needs_more_output());
    assert_eq!(io.output.take(), b"aa");
    assert_eq!(fresh.depth(), 1);
}
