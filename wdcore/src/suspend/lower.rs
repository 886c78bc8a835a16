use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};
use wdinstr::{
    modules::{
        Function,
        block::{BlockId, Cfg, Op, OpKind},
        operand::{Name, SourceLoc},
        symbol::SymbolTable,
        terminator::Terminator,
    },
    types::Type,
};

use crate::{
    cfg::{AnalyzedFunction, propagate},
    facts::{Context, set::FactSet},
    prover::Checker,
    suspend::{Checkpoint, CheckpointKind, ContinuationLayout, LoweredFunction, liveness::Liveness},
    utils::{conf::AnalysisConfig, error::CoreResult},
};

fn checkpoint_kind(op: &Op, symbols: &SymbolTable) -> Option<(CheckpointKind, Option<Name>)> {
    match &op.kind {
        OpKind::Read { .. } => Some((CheckpointKind::Read, None)),
        OpKind::Write { .. } => Some((CheckpointKind::Write, None)),
        OpKind::Call { callee, .. } if symbols.get(callee).is_some_and(|s| s.is_suspendible()) => {
            Some((CheckpointKind::Call, Some(callee.clone())))
        }
        _ => None,
    }
}

/// Splits blocks so that every suspending op starts a block of its own.
fn split_at_checkpoints(cfg: &Cfg, symbols: &SymbolTable) -> Cfg {
    let mut out = cfg.clone();
    for index in 0..cfg.len() {
        let id = cfg.blocks[index].id;
        let ops = std::mem::take(&mut out.block_mut(id).ops);
        let mut segments: Vec<Vec<Op>> = vec![Vec::new()];
        for op in ops {
            let starts = checkpoint_kind(&op, symbols).is_some();
            if let Some(last) = segments.last_mut() {
                if starts && !last.is_empty() {
                    segments.push(Vec::new());
                }
            }
            if let Some(last) = segments.last_mut() {
                last.push(op);
            }
        }

        let terminator = out.block(id).terminator.clone();
        let term_loc = out.block(id).term_loc;
        let mut current = id;
        let mut segments = segments.into_iter();
        if let Some(first) = segments.next() {
            out.block_mut(id).ops = first;
        }
        for segment in segments {
            let next = out.add_block_beside(current);
            let loc = segment.first().map(|op| op.loc).unwrap_or(term_loc);
            let b = out.block_mut(current);
            b.terminator = Terminator::Jump { target: next };
            b.term_loc = loc;
            out.block_mut(next).ops = segment;
            current = next;
        }
        let last = out.block_mut(current);
        last.terminator = terminator;
        last.term_loc = term_loc;
    }
    out
}

/// Lowers a checked suspendible function into a resumable state machine
/// and proves it again with every resume point as an additional entry.
pub fn lower_function(
    function: &Function,
    analysis: &AnalyzedFunction,
    symbols: &SymbolTable,
    config: &AnalysisConfig,
) -> CoreResult<LoweredFunction> {
    let scope = &analysis.scope;
    let post_scope = scope.with_result(function.ret.as_ref());
    let ctx = Context::new(scope, config);

    let split = split_at_checkpoints(&analysis.cfg, symbols);
    let mut checker = Checker::new(function, scope, &post_scope, symbols, config);
    let entry_facts = checker.entry_facts()?;
    let states = propagate(&mut checker, &split, vec![(split.entry, entry_facts.clone())])?;
    let liveness = Liveness::compute(&split, scope);

    // Labels follow source order, ties broken by block.
    let mut sites: Vec<(SourceLoc, BlockId, CheckpointKind, Option<Name>)> = split
        .blocks
        .iter()
        .filter_map(|b| {
            let op = b.ops.first()?;
            let (kind, callee) = checkpoint_kind(op, symbols)?;
            Some((op.loc, b.id, kind, callee))
        })
        .collect();
    sites.sort();

    let params: BTreeSet<Name> = function.params.iter().map(|p| p.name.clone()).collect();
    let mut lowered = split;
    let mut checkpoints = Vec::with_capacity(sites.len());
    let mut layout = ContinuationLayout {
        locals: BTreeMap::new(),
        depth: 1,
    };

    for (i, (loc, block, kind, callee)) in sites.into_iter().enumerate() {
        let label = i as u32 + 1;
        let saved: Vec<(Name, Type)> = liveness
            .live_in(block)
            .into_iter()
            .filter(|n| !params.contains(n))
            .filter_map(|n| scope.type_of(&n).map(|ty| (n, ty.clone())))
            .collect();
        let mut kept: BTreeSet<Name> = saved.iter().map(|(n, _)| n.clone()).collect();
        kept.extend(params.iter().cloned());
        let precondition = match states.get(block.index()).and_then(Option::as_ref) {
            Some(state) => state.project(&kept, &ctx),
            None => FactSet::unreachable(),
        };
        for (name, ty) in &saved {
            layout.locals.insert(name.clone(), ty.clone());
        }

        let resume = lowered.add_block();
        let r = lowered.block_mut(resume);
        r.terminator = Terminator::Jump { target: block };
        r.term_loc = loc;
        if let Some(op) = lowered.block_mut(block).ops.first_mut() {
            op.checkpoint = Some(label);
        }
        trace!(
            "`{}` checkpoint #{} ({}) at {} saves {} locals",
            function.name,
            label,
            kind,
            loc,
            saved.len()
        );
        checkpoints.push(Checkpoint {
            label,
            kind,
            block,
            resume,
            loc,
            saved,
            precondition,
            callee,
        });
    }

    let dispatch = lowered.add_block();
    let entry = lowered.entry;
    let d = lowered.block_mut(dispatch);
    d.terminator = Terminator::Dispatch {
        entry,
        resumes: checkpoints.iter().map(|c| (c.label, c.resume)).collect(),
    };
    d.term_loc = function.loc;
    lowered.entry = dispatch;
    lowered.check_targets()?;

    let mut entries = vec![(dispatch, entry_facts)];
    entries.extend(checkpoints.iter().map(|c| (c.resume, c.precondition.clone())));
    let mut verifier = Checker::new(function, scope, &post_scope, symbols, config);
    let states = propagate(&mut verifier, &lowered, entries)?;
    debug!(
        "`{}` lowered with {} checkpoints, {} saved locals",
        function.name,
        checkpoints.len(),
        layout.locals.len()
    );

    Ok(LoweredFunction {
        name: function.name.clone(),
        cfg: lowered,
        checkpoints,
        layout,
        states,
    })
}

#[cfg(test)]
mod tests {
    use wdinstr::modules::{
        Unit,
        builder::FunctionBuilder,
        operand::{lit, var},
    };

    use super::*;
    use crate::cfg::analyze_function;

    fn lower(f: Function) -> CoreResult<LoweredFunction> {
        let unit = Unit::new([f.clone()]);
        let symbols = SymbolTable::from_unit(&unit).unwrap();
        let config = AnalysisConfig::default();
        let analysis = analyze_function(&f, &symbols, &config)?;
        lower_function(&f, &analysis, &symbols, &config)
    }

    #[test]
    fn reads_become_checkpoints() {
        let f = FunctionBuilder::new("first_of_two")
            .param("src", Type::Reader)
            .returns(Type::u8())
            .suspendible()
            .body(|b| {
                b.var("a", Type::u8());
                b.var("c", Type::u8());
                b.read("a", "src");
                b.read("c", "src");
                b.ret_value(var("a"));
            })
            .build()
            .unwrap();
        let lowered = lower(f).unwrap();
        assert_eq!(lowered.checkpoints.len(), 2);
        let first = lowered.checkpoint(1).unwrap();
        assert!(first.saved.is_empty());
        let second = lowered.checkpoint(2).unwrap();
        let saved: Vec<_> = second.saved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(saved, vec!["a"]);
        assert!(matches!(
            lowered.cfg.block(lowered.cfg.entry).terminator,
            Terminator::Dispatch { .. }
        ));
        assert_eq!(lowered.layout.locals.len(), 1);
    }

    #[test]
    fn write_values_are_checked_again_after_resume() {
        let f = FunctionBuilder::new("echo")
            .param("dst", Type::Writer)
            .suspendible()
            .body(|b| {
                b.var_init("x", Type::u32(), lit(7));
                b.write("dst", var("x"));
                b.write("dst", var("x"));
            })
            .build()
            .unwrap();
        let lowered = lower(f).unwrap();
        let second = lowered.checkpoint(2).unwrap();
        assert_eq!(second.kind, CheckpointKind::Write);
        assert!(second.precondition.to_string().contains("x"));
    }
}
