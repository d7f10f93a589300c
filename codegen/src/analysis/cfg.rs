//! The control-flow skeleton of a graph.
//!
//! Blocks reference their predecessors through control-flow edges (Jmp, Return, projections out
//! of Cond, and other block-terminating nodes). This analysis derives the forward direction:
//! for each block, the blocks its terminators can reach. Predecessor blocks are listed in the
//! same order as the block's input edges, so position `i` of a phi corresponds to position `i`
//! here.

use crate::ir::{Graph, Node, Opcode};
use seagraph_entity::SecondaryMap;

/// Successor and predecessor blocks for every block of a graph.
pub struct BlockGraph {
    blocks: Vec<Node>,
    succs: SecondaryMap<Node, Vec<Node>>,
    preds: SecondaryMap<Node, Vec<Node>>,
    valid: bool,
}

impl BlockGraph {
    /// Allocate a new blank block graph.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            succs: SecondaryMap::new(),
            preds: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute the block graph for `graph`.
    pub fn with_graph(graph: &Graph) -> Self {
        let mut cfg = Self::new();
        cfg.compute(graph);
        cfg
    }

    /// Clear all data structures in this block graph.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.succs.clear();
        self.preds.clear();
        self.valid = false;
    }

    /// Compute the block graph of `graph`, overwriting any previous information.
    pub fn compute(&mut self, graph: &Graph) {
        self.clear();
        for block in graph.blocks() {
            self.blocks.push(block);
            for &ctrl in graph.block_preds(block) {
                let pred_block = graph.block_of(ctrl);
                // Keep dead edges in the pred list so positions stay aligned with phi inputs,
                // but don't give them a forward direction.
                self.preds[block].push(pred_block);
                if graph.opcode(ctrl) != Opcode::Bad {
                    self.succs[pred_block].push(block);
                }
            }
        }
        self.valid = true;
    }

    /// Check if the block graph is in a computed state.
    ///
    /// This does not check consistency with the current graph.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// All block nodes, in node order.
    pub fn blocks(&self) -> &[Node] {
        &self.blocks
    }

    /// The successor blocks of `block`.
    pub fn succs(&self, block: Node) -> &[Node] {
        self.succs.get(block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The predecessor blocks of `block`, aligned with the block's input edges.
    pub fn preds(&self, block: Node) -> &[Node] {
        self.preds.get(block).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, Tarval, TypeRef};

    #[test]
    fn diamond() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let header = g.new_block(&[start_jump]);

        // An opaque condition keeps the branch from folding.
        let sel = g.add_raw(
            crate::ir::NodeData::Plain(Opcode::Phi),
            Mode::B,
            Some(header),
            &[],
        );
        let cond = g.new_cond(header, sel);
        let t = g.new_proj(cond, pn::cond::TRUE, Mode::X);
        let f = g.new_proj(cond, pn::cond::FALSE, Mode::X);
        let then_block = g.new_block(&[t]);
        let else_block = g.new_block(&[f]);
        let jt = g.new_jmp(then_block);
        let je = g.new_jmp(else_block);
        let join = g.new_block(&[jt, je]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let zero = g.new_const(Tarval::new(Mode::IS32, 0));
        let ret = g.new_return(join, mem, &[zero]);
        g.add_input(g.end_block(), ret);

        let cfg = BlockGraph::with_graph(&g);
        assert_eq!(cfg.preds(join), &[then_block, else_block]);
        assert_eq!(cfg.succs(header).len(), 2);
        assert!(cfg.succs(header).contains(&then_block));
        assert!(cfg.succs(header).contains(&else_block));
        assert_eq!(cfg.succs(join), &[g.end_block()]);
        assert_eq!(cfg.preds(header), &[g.start_block()]);
    }
}
