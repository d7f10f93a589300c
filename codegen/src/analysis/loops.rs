//! A loop tree of natural loops.
//!
//! Loops are detected from back edges: an edge `u -> h` where `h` dominates `u` makes `h` a
//! loop header. Loops sharing a header are merged. The loops form a tree by containment; each
//! loop knows its header block, its blocks, its parent and children, and whether control enters
//! its body around the header (an irreducible region).

use crate::analysis::cfg::BlockGraph;
use crate::analysis::domtree::DominatorTree;
use crate::ir::{Graph, Node};
use crate::timing;
use seagraph_entity::packed_option::PackedOption;
use seagraph_entity::{entity_impl, PrimaryMap, SecondaryMap};

/// An opaque reference to a loop.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopRef(u32);
entity_impl!(LoopRef, "loop");

struct LoopData {
    header: Node,
    parent: PackedOption<LoopRef>,
    children: Vec<LoopRef>,
    /// Blocks of the loop, header first. Includes the blocks of nested loops.
    blocks: Vec<Node>,
    irreducible: bool,
    depth: u32,
}

/// The loop tree for a single graph.
pub struct LoopTree {
    loops: PrimaryMap<LoopRef, LoopData>,
    /// Innermost loop containing each block.
    block_loop: SecondaryMap<Node, PackedOption<LoopRef>>,
    valid: bool,
}

impl LoopTree {
    /// Allocate a new blank loop tree.
    pub fn new() -> Self {
        Self {
            loops: PrimaryMap::new(),
            block_loop: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute the loop tree.
    pub fn with_graph(graph: &Graph, cfg: &BlockGraph, domtree: &DominatorTree) -> Self {
        let mut tree = Self::new();
        tree.compute(graph, cfg, domtree);
        tree
    }

    /// Clear the tree; `is_valid()` becomes false.
    pub fn clear(&mut self) {
        self.loops.clear();
        self.block_loop.clear();
        self.valid = false;
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Detect loops and rebuild the tree.
    pub fn compute(&mut self, graph: &Graph, cfg: &BlockGraph, domtree: &DominatorTree) {
        let _tt = timing::loop_tree();
        debug_assert!(domtree.is_valid());
        self.clear();
        let _ = graph;

        // Find back edges and collect one body per header.
        let mut headers: Vec<Node> = Vec::new();
        let mut bodies: Vec<Vec<Node>> = Vec::new();
        for &block in domtree.cfg_postorder() {
            for &succ in cfg.succs(block) {
                if domtree.dominates(succ, block) {
                    // `block -> succ` is a back edge with header `succ`.
                    let idx = match headers.iter().position(|&h| h == succ) {
                        Some(idx) => idx,
                        None => {
                            headers.push(succ);
                            bodies.push(vec![succ]);
                            headers.len() - 1
                        }
                    };
                    collect_body(&mut bodies[idx], cfg, succ, block);
                }
            }
        }

        // Create the loops, innermost last, by sorting on body size. Containment then means a
        // loop's parent is the smallest other loop holding its header.
        let mut order: Vec<usize> = (0..headers.len()).collect();
        order.sort_by_key(|&i| bodies[i].len());
        let mut created: Vec<LoopRef> = Vec::new();
        for &i in order.iter().rev() {
            let lp = self.loops.push(LoopData {
                header: headers[i],
                parent: PackedOption::default(),
                children: Vec::new(),
                blocks: bodies[i].clone(),
                irreducible: false,
                depth: 0,
            });
            created.push(lp);
            // Later-created loops are smaller: record as the innermost for their blocks.
            for &b in &bodies[i] {
                self.block_loop[b] = lp.into();
            }
        }

        // Link parents: the innermost strictly-containing loop of each header.
        for lp in self.loops.keys().collect::<Vec<_>>() {
            let header = self.loops[lp].header;
            let mut best: Option<LoopRef> = None;
            for other in self.loops.keys() {
                if other == lp || !self.loops[other].blocks.contains(&header) {
                    continue;
                }
                if self.loops[other].blocks.contains(&self.loops[lp].header)
                    && best.map_or(true, |b| {
                        self.loops[other].blocks.len() < self.loops[b].blocks.len()
                    })
                {
                    best = Some(other);
                }
            }
            if let Some(parent) = best {
                self.loops[lp].parent = parent.into();
                self.loops[parent].children.push(lp);
            }
        }

        // Depths.
        for lp in self.loops.keys().collect::<Vec<_>>() {
            let mut depth = 1;
            let mut cur = self.loops[lp].parent;
            while let Some(p) = cur.expand() {
                depth += 1;
                cur = self.loops[p].parent;
            }
            self.loops[lp].depth = depth;
        }

        // Irreducible regions: an edge entering a loop at a block other than its header.
        for lp in self.loops.keys().collect::<Vec<_>>() {
            let header = self.loops[lp].header;
            let blocks = self.loops[lp].blocks.clone();
            for &b in &blocks {
                if b == header {
                    continue;
                }
                for &p in cfg.preds(b) {
                    if !blocks.contains(&p) {
                        self.loops[lp].irreducible = true;
                    }
                }
            }
        }

        self.valid = true;
    }

    /// All loops.
    pub fn loops(&self) -> impl Iterator<Item = LoopRef> + '_ {
        self.loops.keys()
    }

    /// Number of loops.
    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_of(&self, block: Node) -> Option<LoopRef> {
        self.block_loop.get(block).and_then(|p| p.expand())
    }

    /// The header block of `lp`: the block dominating all of the loop's blocks.
    pub fn header(&self, lp: LoopRef) -> Node {
        self.loops[lp].header
    }

    /// The blocks of `lp`, header first, including blocks of nested loops.
    pub fn blocks(&self, lp: LoopRef) -> &[Node] {
        &self.loops[lp].blocks
    }

    /// Is `block` inside `lp` (including nested loops)?
    pub fn contains_block(&self, lp: LoopRef, block: Node) -> bool {
        self.loops[lp].blocks.contains(&block)
    }

    /// The parent loop, if `lp` is nested.
    pub fn parent(&self, lp: LoopRef) -> Option<LoopRef> {
        self.loops[lp].parent.expand()
    }

    /// The loops directly nested in `lp`.
    pub fn children(&self, lp: LoopRef) -> &[LoopRef] {
        &self.loops[lp].children
    }

    /// Nesting depth of `lp`; outermost loops have depth 1.
    pub fn depth(&self, lp: LoopRef) -> u32 {
        self.loops[lp].depth
    }

    /// Does control enter this loop's body other than through its header?
    pub fn is_irreducible(&self, lp: LoopRef) -> bool {
        self.loops[lp].irreducible
    }

    /// The exit edges of `lp`: pairs of (block inside, successor block outside).
    pub fn exit_edges(&self, lp: LoopRef, cfg: &BlockGraph) -> Vec<(Node, Node)> {
        let mut exits = Vec::new();
        for &b in &self.loops[lp].blocks {
            for &s in cfg.succs(b) {
                if !self.contains_block(lp, s) {
                    exits.push((b, s));
                }
            }
        }
        exits
    }
}

impl Default for LoopTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk backwards from `from` adding blocks to `body` until `header` is reached.
fn collect_body(body: &mut Vec<Node>, cfg: &BlockGraph, header: Node, from: Node) {
    let mut stack = vec![from];
    while let Some(b) = stack.pop() {
        if b == header || body.contains(&b) {
            continue;
        }
        body.push(b);
        for &p in cfg.preds(b) {
            stack.push(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, NodeData, Opcode, Tarval, TypeRef};

    /// start -> header <-> body, header -> exit
    fn loop_graph() -> (Graph, Node, Node, Node) {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);

        let header = g.new_block(&[start_jump]);
        let sel = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::B, Some(header), &[]);
        let cond = g.new_cond(header, sel);
        let stay = g.new_proj(cond, pn::cond::TRUE, Mode::X);
        let leave = g.new_proj(cond, pn::cond::FALSE, Mode::X);

        let body = g.new_block(&[stay]);
        let back = g.new_jmp(body);
        g.add_input(header, back);

        let exit = g.new_block(&[leave]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let ret = g.new_return(exit, mem, &[]);
        g.add_input(g.end_block(), ret);
        (g, header, body, exit)
    }

    #[test]
    fn single_loop() {
        let (g, header, body, exit) = loop_graph();
        let cfg = BlockGraph::with_graph(&g);
        let dt = DominatorTree::with_graph(&g, &cfg);
        let loops = LoopTree::with_graph(&g, &cfg, &dt);

        assert_eq!(loops.num_loops(), 1);
        let lp = loops.loops().next().unwrap();
        assert_eq!(loops.header(lp), header);
        assert!(loops.contains_block(lp, body));
        assert!(!loops.contains_block(lp, exit));
        assert_eq!(loops.loop_of(body), Some(lp));
        assert_eq!(loops.loop_of(exit), None);
        assert_eq!(loops.depth(lp), 1);
        assert!(!loops.is_irreducible(lp));

        let exits = loops.exit_edges(lp, &cfg);
        assert_eq!(exits, vec![(header, exit)]);
    }
}
