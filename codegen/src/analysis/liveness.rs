//! Liveness of values at block granularity.
//!
//! The middle end tracks liveness per SSA value: a value is live-in at a block if some path
//! from that block reaches a use without passing the definition. Uses by a phi count at the end
//! of the corresponding predecessor block, not in the phi's own block. The back end later
//! refines these block-boundary sets with the instruction schedule to obtain per-class register
//! pressure.

use crate::analysis::cfg::BlockGraph;
use crate::fx::FxHashSet;
use crate::ir::{Graph, Node, Opcode};
use crate::timing;
use seagraph_entity::SecondaryMap;

/// Live-in and live-out value sets per block.
pub struct Liveness {
    live_in: SecondaryMap<Node, FxHashSet<Node>>,
    live_out: SecondaryMap<Node, FxHashSet<Node>>,
    valid: bool,
}

/// Is `n` a node whose result participates in liveness?
pub fn is_tracked(graph: &Graph, n: Node) -> bool {
    graph.mode(n).is_data()
}

impl Liveness {
    /// Allocate a blank liveness analysis.
    pub fn new() -> Self {
        Self {
            live_in: SecondaryMap::new(),
            live_out: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute liveness for `graph`.
    pub fn with_graph(graph: &Graph, cfg: &BlockGraph) -> Self {
        let mut liveness = Self::new();
        liveness.compute(graph, cfg);
        liveness
    }

    /// Clear the analysis; `is_valid()` becomes false.
    pub fn clear(&mut self) {
        self.live_in.clear();
        self.live_out.clear();
        self.valid = false;
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Recompute liveness from scratch.
    pub fn compute(&mut self, graph: &Graph, cfg: &BlockGraph) {
        let _tt = timing::liveness();
        self.clear();

        // Per-block uses and defs at block granularity.
        let mut uses: SecondaryMap<Node, FxHashSet<Node>> = SecondaryMap::new();
        let mut defs: SecondaryMap<Node, FxHashSet<Node>> = SecondaryMap::new();
        for block in graph.blocks() {
            for n in graph.nodes_in_block(block) {
                if graph.opcode(n) == Opcode::Bad {
                    continue;
                }
                if is_tracked(graph, n) {
                    defs[block].insert(n);
                }
                if graph.opcode(n) == Opcode::Phi {
                    // A phi uses its operand at the end of the matching predecessor.
                    let preds = cfg.preds(block).to_vec();
                    for (i, &v) in graph.inputs(n).iter().enumerate() {
                        if is_tracked(graph, v) {
                            self.live_out[preds[i]].insert(v);
                        }
                    }
                } else {
                    for &v in graph.inputs(n) {
                        if is_tracked(graph, v) {
                            uses[block].insert(v);
                        }
                    }
                }
            }
        }

        // Backward dataflow to a fixed point.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.blocks() {
                // live_out = union of successor live_ins (phi uses were seeded above).
                let mut out: FxHashSet<Node> = self.live_out[block].clone();
                for &succ in cfg.succs(block) {
                    for &v in &self.live_in[succ] {
                        out.insert(v);
                    }
                }

                // live_in = uses + (live_out - defs).
                let mut inn: FxHashSet<Node> = uses[block].clone();
                for &v in &out {
                    if !defs[block].contains(&v) {
                        inn.insert(v);
                    }
                }

                if out.len() != self.live_out[block].len() || inn.len() != self.live_in[block].len()
                {
                    self.live_out[block] = out;
                    self.live_in[block] = inn;
                    changed = true;
                }
            }
        }
        self.valid = true;
    }

    /// The values live at the entry of `block`.
    pub fn live_in(&self, block: Node) -> &FxHashSet<Node> {
        &self.live_in[block]
    }

    /// The values live at the exit of `block`.
    pub fn live_out(&self, block: Node) -> &FxHashSet<Node> {
        &self.live_out[block]
    }

    /// Is `value` live at the entry of `block`?
    pub fn is_live_in(&self, block: Node, value: Node) -> bool {
        self.live_in[block].contains(&value)
    }

    /// Is `value` live at the exit of `block`?
    pub fn is_live_out(&self, block: Node, value: Node) -> bool {
        self.live_out[block].contains(&value)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, Tarval, TypeRef};

    #[test]
    fn value_live_across_a_block() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let a_block = g.new_block(&[start_jump]);
        let arg = g.new_proj(g.start(), pn::start::ARGS_BASE, Mode::IS32);

        let jmp_a = g.new_jmp(a_block);
        let b_block = g.new_block(&[jmp_a]);
        let jmp_b = g.new_jmp(b_block);
        let c_block = g.new_block(&[jmp_b]);

        // `arg` is defined via Start (start block) and used in c_block only.
        let one = g.new_const(Tarval::new(Mode::IS32, 1));
        let sum = g.new_add(c_block, arg, one);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let ret = g.new_return(c_block, mem, &[sum]);
        g.add_input(g.end_block(), ret);

        let cfg = BlockGraph::with_graph(&g);
        let live = Liveness::with_graph(&g, &cfg);

        // The argument travels through the intermediate block.
        assert!(live.is_live_in(b_block, arg));
        assert!(live.is_live_out(b_block, arg));
        assert!(live.is_live_in(c_block, arg));
        assert!(!live.is_live_out(c_block, sum));
        assert!(!live.is_live_in(a_block, sum));
    }
}
