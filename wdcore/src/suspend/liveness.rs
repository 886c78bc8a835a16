//! Backward liveness of variables over a control-flow graph.
use std::collections::{BTreeMap, BTreeSet};

use bit_set::BitSet;
use wdinstr::modules::{
    block::{BlockId, Cfg},
    operand::Name,
    scope::Scope,
};

/// Variables live at the start of every block.
#[derive(Debug, Clone)]
pub struct Liveness {
    names: Vec<Name>,
    live_in: Vec<BitSet>,
}

impl Liveness {
    pub fn compute(cfg: &Cfg, scope: &Scope) -> Self {
        let names: Vec<Name> = scope.names().cloned().collect();
        let index: BTreeMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let set_of = |vars: &BTreeSet<Name>| -> BitSet {
            vars.iter()
                .filter_map(|n| index.get(n.as_str()).copied())
                .collect()
        };

        // Per block: names read before any write, and names written.
        let mut gen_sets = Vec::with_capacity(cfg.len());
        let mut kill_sets = Vec::with_capacity(cfg.len());
        for block in &cfg.blocks {
            let mut live: BTreeSet<Name> = block
                .terminator
                .operands()
                .flat_map(|e| e.names())
                .collect();
            let mut kill = BTreeSet::new();
            for op in block.ops.iter().rev() {
                if let Some(def) = op.def() {
                    live.remove(def);
                    kill.insert(def.clone());
                }
                live.extend(op.uses());
            }
            if let Some(header) = &block.header {
                live.extend(header.invariants.iter().flat_map(|e| e.names()));
            }
            gen_sets.push(set_of(&live));
            kill_sets.push(set_of(&kill));
        }

        let mut live_in: Vec<BitSet> = gen_sets.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for block in cfg.blocks.iter().rev() {
                let i = block.id.index();
                let mut out = BitSet::new();
                for succ in block.terminator.successors() {
                    out.union_with(&live_in[succ.index()]);
                }
                out.difference_with(&kill_sets[i]);
                out.union_with(&gen_sets[i]);
                if out != live_in[i] {
                    live_in[i] = out;
                    changed = true;
                }
            }
        }

        Self { names, live_in }
    }

    /// Names live on entry to `block`, sorted.
    pub fn live_in(&self, block: BlockId) -> BTreeSet<Name> {
        self.live_in
            .get(block.index())
            .map(|set| set.iter().map(|i| self.names[i].clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use wdinstr::{
        modules::{builder::FunctionBuilder, operand::var},
        types::Type,
    };

    use super::*;
    use crate::cfg::build_cfg;

    #[test]
    fn loop_counter_is_live_at_header() {
        let f = FunctionBuilder::new("live")
            .param("n", Type::u32())
            .body(|b| {
                b.var("i", Type::u32());
                b.var("dead", Type::u32());
                b.while_(var("i").lt(var("n")), |b| {
                    b.assign("i", var("i") + 1);
                });
            })
            .build()
            .unwrap();
        let cfg = build_cfg(&f).unwrap();
        let scope = Scope::of(&f);
        let liveness = Liveness::compute(&cfg, &scope);
        let header = cfg.blocks.iter().find(|b| b.header.is_some()).unwrap().id;
        let live = liveness.live_in(header);
        assert!(live.contains("i"));
        assert!(live.contains("n"));
        assert!(!live.contains("dead"));
        assert!(liveness.live_in(cfg.entry).contains("n"));
        assert!(!liveness.live_in(cfg.entry).contains("i"));
    }
}
