//! Branch-sensitive fact propagation over a control-flow graph.
//!
//! Blocks are visited from a worklist ordered by reverse post-order. Every
//! edge carries the facts holding when it is taken: branch edges assume
//! their condition or its negation, joins merge their incoming edges and
//! loop headers widen before assuming the loop invariants. A header that
//! keeps changing past `loop_iteration_cap` visits fails the analysis.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace, warn};
use wdinstr::modules::{
    Function,
    block::{BlockId, Cfg},
    scope::Scope,
    symbol::SymbolTable,
    terminator::Terminator,
};

use crate::{
    cfg::builder::build_cfg,
    facts::{Prop, Term, set::FactSet},
    prover::{Checker, obligation::ObligationKind},
    utils::{
        conf::AnalysisConfig,
        error::{CoreError, CoreResult},
    },
};

/// Result of checking one function.
#[derive(Debug, Clone)]
pub struct AnalyzedFunction {
    pub name: String,
    pub scope: Scope,
    pub cfg: Cfg,
    /// Stable in-state of every block, `None` for blocks never reached.
    pub states: Vec<Option<FactSet>>,
    /// Number of obligations discharged.
    pub obligations: usize,
}

impl AnalyzedFunction {
    pub fn state(&self, block: BlockId) -> Option<&FactSet> {
        self.states.get(block.index()).and_then(Option::as_ref)
    }
}

impl std::fmt::Display for AnalyzedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in &self.cfg.blocks {
            match self.state(block.id) {
                Some(state) => writeln!(f, "; {}", state)?,
                None => writeln!(f, "; never reached")?,
            }
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}

/// Builds the graph of `function` and proves every obligation in it.
pub fn analyze_function(
    function: &Function,
    symbols: &SymbolTable,
    config: &AnalysisConfig,
) -> CoreResult<AnalyzedFunction> {
    debug!("analysing `{}`", function.name);
    let cfg = build_cfg(function)?;
    let scope = Scope::of(function);
    let post_scope = scope.with_result(function.ret.as_ref());
    let mut checker = Checker::new(function, &scope, &post_scope, symbols, config);
    let entry = checker.entry_facts()?;
    let states = propagate(&mut checker, &cfg, vec![(cfg.entry, entry)])?;
    debug!(
        "`{}`: {} obligations discharged over {} blocks",
        function.name,
        checker.discharged(),
        cfg.len()
    );
    let obligations = checker.discharged();
    Ok(AnalyzedFunction {
        name: function.name.clone(),
        scope,
        cfg,
        states,
        obligations,
    })
}

fn merge_all<'s>(states: impl IntoIterator<Item = &'s FactSet>) -> Option<FactSet> {
    states.into_iter().fold(None, |acc, s| match acc {
        None => Some(s.clone()),
        Some(acc) => Some(acc.merge(s)),
    })
}

/// Runs the worklist from the given entry states until every block's
/// in-state is stable.
///
/// Each entry is a block paired with the facts holding when control starts
/// there. Returns the in-state of every block.
pub fn propagate(
    checker: &mut Checker<'_>,
    cfg: &Cfg,
    entries: Vec<(BlockId, FactSet)>,
) -> CoreResult<Vec<Option<FactSet>>> {
    let roots: Vec<BlockId> = entries.iter().map(|(b, _)| *b).collect();
    let synthetic: BTreeMap<BlockId, FactSet> = entries.into_iter().collect();
    let order = cfg.reverse_post_order(&roots);
    let position: BTreeMap<BlockId, usize> =
        order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
    let preds = cfg.predecessors();
    let loops: BTreeMap<BlockId, &BTreeSet<BlockId>> = cfg
        .blocks
        .iter()
        .filter_map(|b| b.header.as_ref().map(|h| (b.id, &h.body)))
        .collect();

    let mut edges: BTreeMap<(BlockId, BlockId), FactSet> = BTreeMap::new();
    let mut states: Vec<Option<FactSet>> = vec![None; cfg.len()];
    let mut visits: BTreeMap<BlockId, u32> = BTreeMap::new();
    let mut entry_inputs: BTreeMap<BlockId, FactSet> = BTreeMap::new();
    let mut worklist: BTreeSet<usize> = roots.iter().filter_map(|r| position.get(r).copied()).collect();
    let config = checker.config();

    while let Some(pos) = worklist.pop_first() {
        let id = order[pos];
        let block = cfg.block(id);
        let incoming: Vec<(BlockId, &FactSet)> = preds
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|p| edges.get(&(*p, id)).map(|s| (*p, s)))
            .collect();

        let state = match (&block.header, loops.get(&id).copied()) {
            (Some(header), Some(body)) => {
                let (back, entry): (Vec<_>, Vec<_>) =
                    incoming.iter().partition(|(p, _)| body.contains(p));
                let entry_states: Vec<&FactSet> = synthetic
                    .get(&id)
                    .into_iter()
                    .chain(entry.iter().map(|(_, s)| *s))
                    .collect();
                let Some(entry_in) = merge_all(entry_states.iter().copied()) else {
                    continue;
                };

                for s in &entry_states {
                    for inv in &header.invariants {
                        checker.check_invariant(inv, ObligationKind::LoopInvariantEntry, header.loc, s)?;
                    }
                }
                for (_, s) in &back {
                    for inv in &header.invariants {
                        checker.check_invariant(inv, ObligationKind::LoopInvariantPreserved, header.loc, s)?;
                    }
                }

                if entry_inputs.get(&id) != Some(&entry_in) {
                    visits.insert(id, 0);
                    entry_inputs.insert(id, entry_in.clone());
                }
                let joined = match merge_all(back.iter().map(|(_, s)| *s)) {
                    Some(b) => entry_in.merge(&b),
                    None => entry_in,
                };
                let mut state = joined.widen_for_loop(&header.written);
                for inv in &header.invariants {
                    checker.assume(inv, true, &mut state);
                }
                if state.is_unreachable() && !joined.is_unreachable() {
                    return Err(CoreError::InconsistentFactSet {
                        function: cfg.function.clone(),
                        loc: header.loc,
                        message: "the loop invariants contradict the facts they were proven from"
                            .to_string(),
                    });
                }

                if states[id.index()].as_ref() == Some(&state) {
                    continue;
                }
                let count = visits.entry(id).or_insert(0);
                *count += 1;
                if *count > config.loop_iteration_cap {
                    warn!(
                        "loop at {} in `{}` did not stabilise within {} iterations",
                        header.loc, cfg.function, config.loop_iteration_cap
                    );
                    let cond = match &block.terminator {
                        Terminator::Branch { cond, .. } => Term::from_expr(cond),
                        _ => None,
                    };
                    return Err(CoreError::UnprovableObligation {
                        function: cfg.function.clone(),
                        loc: header.loc,
                        kind: ObligationKind::LoopConvergence,
                        prop: Prop::Holds(cond.unwrap_or(Term::Bool(true))),
                        facts: Box::new(state),
                    });
                }
                trace!("loop header {} visit {}: {}", id, count, state);
                state
            }
            _ => {
                let merged = merge_all(
                    synthetic
                        .get(&id)
                        .into_iter()
                        .chain(incoming.iter().map(|(_, s)| *s)),
                );
                let Some(state) = merged else {
                    continue;
                };
                if states[id.index()].as_ref() == Some(&state) {
                    continue;
                }
                state
            }
        };

        states[id.index()] = Some(state.clone());
        let mut out = state;
        for op in &block.ops {
            checker.check_op(op, &mut out)?;
        }

        let mut outgoing: Vec<(BlockId, FactSet)> = Vec::new();
        match &block.terminator {
            Terminator::Jump { target } => outgoing.push((*target, out)),
            Terminator::Branch {
                cond,
                then_target,
                else_target,
            } => {
                checker.check_branch(cond, &out)?;
                let mut taken = out.clone();
                checker.assume(cond, true, &mut taken);
                let mut not_taken = out;
                checker.assume(cond, false, &mut not_taken);
                if then_target == else_target {
                    outgoing.push((*then_target, taken.merge(&not_taken)));
                } else {
                    outgoing.push((*then_target, taken));
                    outgoing.push((*else_target, not_taken));
                }
            }
            Terminator::Return { value } => {
                checker.check_return(value.as_ref(), block.term_loc, &out)?;
            }
            Terminator::Fail { .. } => {}
            // Resume targets are entered through their own synthetic state.
            Terminator::Dispatch { entry, .. } => outgoing.push((*entry, out)),
        }

        for (target, s) in outgoing {
            if edges.get(&(id, target)) == Some(&s) {
                continue;
            }
            edges.insert((id, target), s);
            if let Some(p) = position.get(&target) {
                worklist.insert(*p);
            }
        }
    }

    if let Some(missed) = order.iter().find(|b| states[b.index()].is_none()) {
        return Err(CoreError::UnanalysedBlock {
            function: cfg.function.clone(),
            block: *missed,
        });
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use wdinstr::{
        modules::{
            Unit,
            builder::{FunctionBuilder, LoopClauses},
            operand::{len, lit, var},
        },
        types::Type,
    };

    use super::*;

    fn analyze(f: Function) -> CoreResult<AnalyzedFunction> {
        let unit = Unit::new([f.clone()]);
        let symbols = SymbolTable::from_unit(&unit).unwrap();
        analyze_function(&f, &symbols, &AnalysisConfig::default())
    }

    #[test]
    fn loop_bounded_by_parameter() {
        let f = FunctionBuilder::new("walk")
            .param("buf", Type::slice(Type::u8()))
            .returns(Type::u64())
            .body(|b| {
                b.var("i", Type::u64());
                b.while_(var("i").lt(len("buf")), |b| {
                    b.assign("i", var("i") + 1);
                });
                b.ret_value(var("i"));
            })
            .build()
            .unwrap();
        let analyzed = analyze(f).unwrap();
        assert!(analyzed.obligations > 0);
        assert!(analyzed.states.iter().all(Option::is_some));
    }

    #[test]
    fn unguarded_increment_overflows() {
        let f = FunctionBuilder::new("inc")
            .param("x", Type::u8())
            .returns(Type::u8())
            .body(|b| {
                b.ret_value(var("x") + lit(1));
            })
            .build()
            .unwrap();
        let err = analyze(f).unwrap_err();
        match err {
            CoreError::UnprovableObligation { kind, .. } => assert_eq!(kind, ObligationKind::Overflow),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn branch_condition_guards_the_increment() {
        let f = FunctionBuilder::new("sat")
            .param("x", Type::u8())
            .returns(Type::u8())
            .body(|b| {
                b.if_(var("x").lt(lit(255)), |b| {
                    b.ret_value(var("x") + lit(1));
                });
                b.ret_value(var("x"));
            })
            .build()
            .unwrap();
        analyze(f).unwrap();
    }

    #[test]
    fn invariant_must_hold_on_entry() {
        let f = FunctionBuilder::new("bad_inv")
            .body(|b| {
                b.var_init("i", Type::u32(), lit(5));
                b.loop_(
                    LoopClauses::default().inv(var("i").le(lit(3))),
                    var("i").lt(lit(3)),
                    |b| {
                        b.assign("i", var("i") + 1);
                    },
                );
            })
            .build()
            .unwrap();
        match analyze(f).unwrap_err() {
            CoreError::UnprovableObligation { kind, .. } => {
                assert_eq!(kind, ObligationKind::LoopInvariantEntry)
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
