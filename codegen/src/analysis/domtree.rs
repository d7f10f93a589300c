//! Dominator trees represented as mappings of blocks to their immediate dominator.
//!
//! Built with Cooper, Harvey and Kennedy's "A Simple, Fast Dominance Algorithm" over the block
//! skeleton. The post-dominator tree runs the same algorithm over the reversed edges, rooted at
//! the end block.

use crate::analysis::cfg::BlockGraph;
use crate::ir::{Graph, Node};
use crate::timing;
use core::cmp::Ordering;
use seagraph_entity::packed_option::PackedOption;
use seagraph_entity::SecondaryMap;

/// RPO numbers are not assigned contiguously but as multiples of STRIDE, to leave room for
/// localized modifications of the dominator tree.
const STRIDE: u32 = 4;

/// Special RPO numbers used during `compute_postorder`.
const DONE: u32 = 1;
const SEEN: u32 = 2;

/// Dominator tree node. We keep one of these per block.
#[derive(Clone, Default)]
struct DomNode {
    /// Number of this node in a reverse post-order traversal of the CFG, starting from 2.
    /// Unreachable nodes get number 0, all others are positive.
    rpo_number: u32,

    /// The immediate dominating block.
    ///
    /// This is `None` for unreachable blocks and for the root, which has no dominator.
    idom: PackedOption<Node>,
}

struct DomData {
    nodes: SecondaryMap<Node, DomNode>,

    /// CFG post-order of all reachable blocks.
    postorder: Vec<Node>,

    /// Scratch memory used by `compute_postorder()`.
    stack: Vec<Node>,

    valid: bool,
}

impl DomData {
    fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            stack: Vec::new(),
            valid: false,
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        debug_assert!(self.stack.is_empty());
        self.valid = false;
    }

    fn is_reachable(&self, block: Node) -> bool {
        self.nodes[block].rpo_number != 0
    }

    fn idom(&self, block: Node) -> Option<Node> {
        self.nodes[block].idom.into()
    }

    fn rpo_cmp(&self, a: Node, b: Node) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Returns `true` if `a` dominates `b`. A block dominates itself.
    fn dominates(&self, a: Node, b: Node) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let rpo_a = self.nodes[a].rpo_number;
        let mut finger = b;
        // Run a finger up the dominator tree from b until we pass a.
        while rpo_a < self.nodes[finger].rpo_number {
            match self.idom(finger) {
                Some(idom) => finger = idom,
                None => return false,
            }
        }
        finger == a
    }

    /// Reset all internal data structures and compute a post-order from `root` along `succ`.
    fn compute_postorder(&mut self, root: Node, n_blocks: usize, succ: impl Fn(Node) -> Vec<Node>) {
        self.clear();
        self.nodes.resize(n_blocks);

        // During this algorithm only, `rpo_number` holds the traversal state:
        //
        //   0:    block has not yet been reached in the pre-order.
        //   SEEN: block has been pushed on the stack but successors not yet pushed.
        //   DONE: successors pushed.

        self.stack.push(root);
        self.nodes[root].rpo_number = SEEN;

        while let Some(block) = self.stack.pop() {
            match self.nodes[block].rpo_number {
                SEEN => {
                    // First pop: scan successors, then revisit.
                    self.nodes[block].rpo_number = DONE;
                    self.stack.push(block);
                    for s in succ(block) {
                        if self.nodes[s].rpo_number == 0 {
                            self.nodes[s].rpo_number = SEEN;
                            self.stack.push(s);
                        }
                    }
                }
                DONE => {
                    // Second pop: all successors have been processed.
                    self.postorder.push(block);
                }
                _ => unreachable!(),
            }
        }
    }

    /// Build the dominator tree using Cooper's "Simple, Fast Dominator Algorithm".
    fn compute_domtree(&mut self, pred: impl Fn(Node) -> Vec<Node>) {
        // We iterate over a reverse post-order of the CFG, skipping the root.
        let (root, postorder) = match self.postorder.as_slice().split_last() {
            Some((&root, rest)) => (root, rest.to_vec()),
            None => return,
        };

        // First pass: assign RPO numbers to all reachable nodes and compute initial immediate
        // dominator estimates. Due to the nature of the post-order traversal, every node we
        // visit has at least one predecessor that was already visited.
        self.nodes[root].rpo_number = 2 * STRIDE;
        for (rpo_idx, &block) in postorder.iter().rev().enumerate() {
            self.nodes[block] = DomNode {
                idom: self.compute_idom(block, &pred).into(),
                rpo_number: (rpo_idx as u32 + 3) * STRIDE,
            }
        }

        // Iterate until convergence. Without irreducible control flow this exits after one
        // iteration.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                let idom = self.compute_idom(block, &pred).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    /// Compute the immediate dominator for `block` using the current `idom` states for the
    /// reachable nodes.
    fn compute_idom(&self, block: Node, pred: &impl Fn(Node) -> Vec<Node>) -> Node {
        // Only consider already-visited predecessors; `rpo_number` is 1 or 2 for reachable
        // blocks not yet numbered.
        let mut reachable = pred(block)
            .into_iter()
            .filter(|&p| self.nodes[p].rpo_number > SEEN);

        let mut idom = reachable
            .next()
            .expect("block must have one reachable predecessor");

        for p in reachable {
            idom = self.common_dominator(idom, p);
        }
        idom
    }

    /// Compute the common dominator of two blocks, both assumed reachable.
    fn common_dominator(&self, mut a: Node, mut b: Node) -> Node {
        loop {
            match self.rpo_cmp(a, b) {
                Ordering::Less => {
                    // `a` comes before `b` in the RPO. Move `b` up.
                    b = self.nodes[b].idom.expect("unreachable block?");
                }
                Ordering::Greater => {
                    // `b` comes before `a` in the RPO. Move `a` up.
                    a = self.nodes[a].idom.expect("unreachable block?");
                }
                Ordering::Equal => break,
            }
        }
        debug_assert_eq!(a, b, "unreachable block passed to common_dominator?");
        a
    }
}

/// The dominator tree for a single graph.
pub struct DominatorTree {
    data: DomData,
}

impl DominatorTree {
    /// Allocate a new blank dominator tree. Use `compute` to fill it in.
    pub fn new() -> Self {
        Self {
            data: DomData::new(),
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_graph(graph: &Graph, cfg: &BlockGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(graph, cfg);
        domtree
    }

    /// Reset and compute the CFG post-order and dominator tree.
    pub fn compute(&mut self, graph: &Graph, cfg: &BlockGraph) {
        let _tt = timing::domtree();
        debug_assert!(cfg.is_valid());
        self.data
            .compute_postorder(graph.start_block(), graph.node_count(), |b| {
                cfg.succs(b).to_vec()
            });
        self.data.compute_domtree(|b| cfg.preds(b).to_vec());
        self.data.valid = true;
    }

    /// Clear the data structures; `is_valid()` becomes false.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.data.valid
    }

    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Node) -> bool {
        self.data.is_reachable(block)
    }

    /// Get the CFG post-order of blocks used to compute the dominator tree.
    pub fn cfg_postorder(&self) -> &[Node] {
        debug_assert!(self.is_valid());
        &self.data.postorder
    }

    /// Returns the immediate dominator of `block`, or `None` for the entry block and
    /// unreachable blocks.
    pub fn idom(&self, block: Node) -> Option<Node> {
        self.data.idom(block)
    }

    /// Returns `true` if `a` dominates `b`: every path from the entry to `b` goes through `a`.
    ///
    /// A block dominates itself. Dominance is ill-defined for unreachable blocks; this returns
    /// `false` if either block is unreachable.
    pub fn dominates(&self, a: Node, b: Node) -> bool {
        self.data.dominates(a, b)
    }

    /// Returns `true` if `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: Node, b: Node) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Compare two blocks relative to the reverse post-order.
    pub fn rpo_cmp(&self, a: Node, b: Node) -> Ordering {
        self.data.rpo_cmp(a, b)
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

/// The post-dominator tree for a single graph: dominance over reversed control flow, rooted at
/// the end block.
pub struct PostDominatorTree {
    data: DomData,
}

impl PostDominatorTree {
    /// Allocate a new blank post-dominator tree.
    pub fn new() -> Self {
        Self {
            data: DomData::new(),
        }
    }

    /// Allocate and compute a post-dominator tree.
    pub fn with_graph(graph: &Graph, cfg: &BlockGraph) -> Self {
        let mut tree = Self::new();
        tree.compute(graph, cfg);
        tree
    }

    /// Reset and compute the post-dominator tree.
    pub fn compute(&mut self, graph: &Graph, cfg: &BlockGraph) {
        let _tt = timing::postdomtree();
        debug_assert!(cfg.is_valid());
        self.data
            .compute_postorder(graph.end_block(), graph.node_count(), |b| {
                cfg.preds(b).to_vec()
            });
        self.data.compute_domtree(|b| cfg.succs(b).to_vec());
        self.data.valid = true;
    }

    /// Clear the data structures; `is_valid()` becomes false.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.data.valid
    }

    /// Returns the immediate post-dominator of `block`.
    pub fn ipostdom(&self, block: Node) -> Option<Node> {
        self.data.idom(block)
    }

    /// Returns `true` if every path from `b` to the end block goes through `a`.
    pub fn post_dominates(&self, a: Node, b: Node) -> bool {
        self.data.dominates(a, b)
    }
}

impl Default for PostDominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, NodeData, Opcode, Tarval, TypeRef};

    struct Diamond {
        graph: Graph,
        header: Node,
        then_block: Node,
        else_block: Node,
        join: Node,
    }

    fn diamond() -> Diamond {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let header = g.new_block(&[start_jump]);
        let sel = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::B, Some(header), &[]);
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
        Diamond {
            graph: g,
            header,
            then_block,
            else_block,
            join,
        }
    }

    #[test]
    fn dominance_in_a_diamond() {
        let d = diamond();
        let cfg = BlockGraph::with_graph(&d.graph);
        let dt = DominatorTree::with_graph(&d.graph, &cfg);

        assert!(dt.dominates(d.header, d.then_block));
        assert!(dt.dominates(d.header, d.else_block));
        assert!(dt.dominates(d.header, d.join));
        assert!(!dt.dominates(d.then_block, d.join));
        assert!(!dt.dominates(d.else_block, d.join));
        assert!(dt.dominates(d.join, d.join));
        assert!(!dt.strictly_dominates(d.join, d.join));

        assert_eq!(dt.idom(d.then_block), Some(d.header));
        assert_eq!(dt.idom(d.else_block), Some(d.header));
        assert_eq!(dt.idom(d.join), Some(d.header));
        assert_eq!(dt.idom(d.graph.start_block()), None);
    }

    #[test]
    fn post_dominance_in_a_diamond() {
        let d = diamond();
        let cfg = BlockGraph::with_graph(&d.graph);
        let pdt = PostDominatorTree::with_graph(&d.graph, &cfg);

        assert!(pdt.post_dominates(d.join, d.header));
        assert!(pdt.post_dominates(d.join, d.then_block));
        assert!(!pdt.post_dominates(d.then_block, d.header));
        assert_eq!(pdt.ipostdom(d.then_block), Some(d.join));
    }

    #[test]
    fn unreachable_blocks() {
        let mut d = diamond();
        let orphan = d.graph.new_block(&[]);
        let cfg = BlockGraph::with_graph(&d.graph);
        let dt = DominatorTree::with_graph(&d.graph, &cfg);
        assert!(!dt.is_reachable(orphan));
        assert!(!dt.dominates(d.header, orphan));
        assert!(!dt.dominates(orphan, d.header));
    }
}
