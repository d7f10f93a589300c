//! Compilation context and pass sequencing.
//!
//! A `Context` bundles one graph with the analysis structures derived from it, so the analyses'
//! memory is reused across passes and across graphs. Passes declare the properties they require
//! through [`assure`](Context::assure); stale ones are recomputed, and passes declare what they
//! invalidated through [`invalidate`](Context::invalidate). This replaces manual recomputation
//! calls sprinkled through pass code.
//!
//! An ISA is not part of the context: ISA instances are immutable and shared between
//! compilation threads, so they are passed as arguments where needed.

use crate::analysis::cfg::BlockGraph;
use crate::analysis::domtree::{DominatorTree, PostDominatorTree};
use crate::analysis::liveness::Liveness;
use crate::analysis::loops::LoopTree;
use crate::ir::{Graph, Properties};
use crate::verifier::{self, VerifierErrors, VerifierResult};

/// Persistent data structures for compiling one graph at a time.
pub struct Context {
    /// The graph being worked on.
    pub graph: Graph,

    /// The control-flow skeleton of `graph`.
    pub cfg: BlockGraph,

    /// Dominator tree for `graph`.
    pub domtree: DominatorTree,

    /// Post-dominator tree for `graph`.
    pub postdomtree: PostDominatorTree,

    /// Loop tree for `graph`.
    pub loops: LoopTree,

    /// Block-granular liveness for `graph`.
    pub liveness: Liveness,
}

impl Context {
    /// Create a context around an existing graph.
    pub fn for_graph(graph: Graph) -> Self {
        Self {
            graph,
            cfg: BlockGraph::new(),
            domtree: DominatorTree::new(),
            postdomtree: PostDominatorTree::new(),
            loops: LoopTree::new(),
            liveness: Liveness::new(),
        }
    }

    /// Compute the control flow graph.
    pub fn compute_cfg(&mut self) {
        self.cfg.compute(&self.graph);
    }

    /// Compute the dominator tree.
    pub fn compute_domtree(&mut self) {
        if !self.cfg.is_valid() {
            self.compute_cfg();
        }
        self.domtree.compute(&self.graph, &self.cfg);
        self.graph.set_fresh(Properties::DOMINANCE);
    }

    /// Compute the post-dominator tree.
    pub fn compute_postdomtree(&mut self) {
        if !self.cfg.is_valid() {
            self.compute_cfg();
        }
        self.postdomtree.compute(&self.graph, &self.cfg);
        self.graph.set_fresh(Properties::POSTDOMINANCE);
    }

    /// Compute the loop tree.
    pub fn compute_loops(&mut self) {
        if !self.graph.properties().contains(Properties::DOMINANCE) {
            self.compute_domtree();
        }
        self.loops.compute(&self.graph, &self.cfg, &self.domtree);
        self.graph.set_fresh(Properties::LOOP_TREE);
    }

    /// Compute block-granular liveness.
    pub fn compute_liveness(&mut self) {
        if !self.cfg.is_valid() {
            self.compute_cfg();
        }
        self.liveness.compute(&self.graph, &self.cfg);
        self.graph.set_fresh(Properties::LIVENESS);
    }

    /// Recompute every property in `props` whose cache is stale.
    pub fn assure(&mut self, props: Properties) {
        if props.contains(Properties::OUT_EDGES) {
            self.graph.assure_edges();
        }
        if props.contains(Properties::NO_BADS)
            && !self.graph.properties().contains(Properties::NO_BADS)
        {
            crate::opt::dce::remove_bads(&mut self.graph);
            self.graph.remove_dead_nodes();
            // Node ids were renumbered; every derived structure is stale.
            self.invalidate(
                Properties::DOMINANCE
                    | Properties::POSTDOMINANCE
                    | Properties::LOOP_TREE
                    | Properties::LIVENESS,
            );
        }
        if props.contains(Properties::DOMINANCE)
            && !self.graph.properties().contains(Properties::DOMINANCE)
        {
            self.compute_domtree();
        }
        if props.contains(Properties::POSTDOMINANCE)
            && !self.graph.properties().contains(Properties::POSTDOMINANCE)
        {
            self.compute_postdomtree();
        }
        if props.contains(Properties::LOOP_TREE)
            && !self.graph.properties().contains(Properties::LOOP_TREE)
        {
            self.compute_loops();
        }
        if props.contains(Properties::LIVENESS)
            && !self.graph.properties().contains(Properties::LIVENESS)
        {
            self.compute_liveness();
        }
        if props.contains(Properties::LOOP_CLOSED_SSA)
            && !self.graph.properties().contains(Properties::LOOP_CLOSED_SSA)
        {
            self.assure(Properties::LOOP_TREE);
            crate::analysis::lcssa::assure_loop_closed_ssa(&mut self.graph, &self.cfg, &self.loops);
        }
    }

    /// Mark `props` stale after a pass mutated the graph.
    pub fn invalidate(&mut self, props: Properties) {
        self.graph.invalidate(props);
        if props.contains(Properties::DOMINANCE) || props.contains(Properties::POSTDOMINANCE) {
            self.cfg.clear();
            self.domtree.clear();
            self.postdomtree.clear();
        }
        if props.contains(Properties::LOOP_TREE) {
            self.loops.clear();
        }
        if props.contains(Properties::LIVENESS) {
            self.liveness.clear();
        }
    }

    /// Perform dead node elimination. Node ids are renumbered, so everything derived is stale.
    pub fn dead_node_elimination(&mut self) {
        crate::opt::dce::do_dce(&mut self.graph);
        let edges = if self.graph.edges_active() {
            Properties::OUT_EDGES
        } else {
            Properties::NONE
        };
        let keep = edges | Properties::NO_BADS;
        self.invalidate(Properties::ALL.without(keep));
    }

    /// Run the verifier on the graph with whatever dominance information is current.
    pub fn verify(&self) -> VerifierResult<()> {
        let mut errors = VerifierErrors::default();
        let (cfg, domtree) = if self.cfg.is_valid() && self.domtree.is_valid() {
            (Some(&self.cfg), Some(&self.domtree))
        } else {
            (None, None)
        };
        verifier::verify_graph(&self.graph, cfg, domtree, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Unroll every eligible loop with an automatically chosen factor of at most `max_factor`.
    pub fn unroll_loops(&mut self, store: &crate::ir::TypeStore, max_factor: u32) {
        crate::opt::unroll::unroll_loops(self, store, max_factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Entity, Mode, Tarval, TypeRef};

    #[test]
    fn assure_computes_stale_properties() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let v = g.new_const(Tarval::new(Mode::IS32, 1));
        g.keep_alive(v);

        let mut ctx = Context::for_graph(g);
        assert!(!ctx.domtree.is_valid());
        ctx.assure(Properties::DOMINANCE | Properties::LOOP_TREE);
        assert!(ctx.domtree.is_valid());
        assert!(ctx.loops.is_valid());
        assert!(ctx
            .graph
            .properties()
            .contains(Properties::DOMINANCE | Properties::LOOP_TREE));

        ctx.invalidate(Properties::DOMINANCE);
        assert!(!ctx.domtree.is_valid());
        assert!(!ctx.graph.properties().contains(Properties::DOMINANCE));
    }
}
