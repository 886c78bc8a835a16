use std::collections::BTreeSet;

use wdinstr::{
    modules::{
        Unit,
        block::{BlockId, Cfg, LoopHeader},
        builder::FunctionBuilder,
        operand::{SourceLoc, index, len, var},
        symbol::SymbolTable,
        terminator::Terminator,
    },
    types::{IntType, Interval, Type},
    utils::Error,
};

#[test]
fn symbol_table_keeps_declaration_order() {
    let functions = ["zeta", "alpha", "mid"].map(|name| {
        FunctionBuilder::new(name)
            .param("x", Type::u8())
            .returns(Type::u8())
            .requires(var("x").lt(200))
            .body(|b| {
                b.ret_value(var("x"));
            })
            .build()
            .unwrap()
    });
    let unit = Unit::new(functions);
    let symbols = SymbolTable::from_unit(&unit).unwrap();
    let order: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    let alpha = symbols.get("alpha").unwrap();
    assert_eq!(alpha.index, 1);
    assert_eq!(alpha.preconditions.len(), 1);
    assert!(!alpha.is_suspendible());
}

#[test]
fn duplicate_functions_are_rejected() {
    let make = || FunctionBuilder::new("twice").build_raw();
    let err = SymbolTable::from_unit(&Unit::new([make(), make()])).unwrap_err();
    assert_eq!(err, Error::DuplicateFunction("twice".to_string()));
}

#[test]
fn callees_are_listed_in_call_order() {
    let f = FunctionBuilder::new("driver")
        .param("buf", Type::slice(Type::u8()))
        .body(|b| {
            b.var("n", Type::u64());
            b.call("reset", vec![]);
            b.if_(len("buf").gt(0), |b| {
                b.call_into("n", "measure", vec![var("buf")]);
            });
            b.call("reset", vec![]);
        })
        .build()
        .unwrap();
    let callees: Vec<_> = f.callees().into_iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(callees, vec!["reset", "measure", "reset"]);
    assert_eq!(f.statement_count(), 5);
}

#[test]
fn indexing_a_scalar_is_rejected() {
    let err = FunctionBuilder::new("scalar")
        .param("x", Type::u32())
        .returns(Type::u32())
        .body(|b| {
            b.ret_value(index("x", 0));
        })
        .build()
        .unwrap_err();
    assert!(err.is_not_a_sequence());
}

#[test]
fn refinements_must_fit_the_machine_type() {
    assert!(Type::refined(IntType::U8, 0, 255).is_ok());
    assert!(Type::refined(IntType::U8, 1, 300).unwrap_err().is_refinement_out_of_range());
    assert!(Type::refined(IntType::I8, -129, 0).is_err());
    let t = Type::refined(IntType::U16, 2, 9).unwrap();
    assert_eq!(t.interval(), Interval::new(2, 9).as_ref());
    assert_eq!(t.base(), Type::u16());
}

#[test]
fn reverse_post_order_follows_the_graph() {
    let mut cfg = Cfg::new("diamond");
    let [entry, left, right, join, orphan] = [(); 5].map(|_| cfg.add_block());
    cfg.block_mut(entry).terminator = Terminator::Branch {
        cond: var("c"),
        then_target: left,
        else_target: right,
    };
    cfg.block_mut(left).terminator = Terminator::Jump { target: join };
    cfg.block_mut(right).terminator = Terminator::Jump { target: join };
    cfg.block_mut(orphan).term_loc = SourceLoc::new(9, 1);
    cfg.check_targets().unwrap();

    let order = cfg.reverse_post_order(&[entry]);
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], entry);
    assert_eq!(order[3], join);
    assert!(!order.contains(&orphan));

    let preds = cfg.predecessors();
    assert_eq!(preds[&join], vec![left, right]);
    assert!(preds[&orphan].is_empty());

    cfg.block_mut(join).terminator = Terminator::Jump { target: BlockId(42) };
    assert!(cfg.check_targets().unwrap_err().is_undefined_basic_block());
}

#[test]
fn blocks_added_beside_a_loop_block_join_the_loop() {
    let mut cfg = Cfg::new("spin");
    let [_, header, body, exit] = [(); 4].map(|_| cfg.add_block());
    cfg.block_mut(header).header = Some(LoopHeader {
        label: None,
        invariants: vec![],
        written: BTreeSet::new(),
        body: BTreeSet::from([header, body]),
        loc: SourceLoc::new(2, 5),
    });
    let tail = cfg.add_block_beside(body);
    let after = cfg.add_block_beside(exit);
    let loop_body = &cfg.block(header).header.as_ref().unwrap().body;
    assert!(loop_body.contains(&tail));
    assert!(!loop_body.contains(&after));
    assert_eq!(loop_body.len(), 3);
}
