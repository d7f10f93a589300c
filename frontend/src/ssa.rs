//! On-demand SSA construction.
//!
//! Tracks, per block, the current definition of every variable slot. Reads in a block without
//! a local definition recurse into the predecessors; joins synthesize phis. Open (immature)
//! blocks get placeholder phis that are patched when the block's predecessors become known,
//! and phis whose operands all agree are removed again, recursively. This is the construction
//! of Braun et al., "Simple and Efficient Construction of Static Single Assignment Form".

use seagraph_codegen::ir::{Graph, Mode, Node, NodeData, Opcode};
use std::collections::{HashMap, HashSet};

/// A variable slot. The facade numbers source variables 0..n and keeps the memory state in an
/// extra slot past them.
pub type Slot = usize;

#[derive(Default)]
pub struct SsaBuilder {
    /// Current definition of each slot per block.
    defs: HashMap<(Node, Slot), Node>,
    /// Blocks whose predecessor list is final.
    sealed: HashSet<Node>,
    /// Placeholder phis of open blocks, waiting for maturation.
    incomplete: HashMap<Node, Vec<(Slot, Node)>>,
    /// Forwarding pointers for removed trivial phis.
    resolved: HashMap<Node, Node>,
}

impl SsaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow forwarding pointers of removed phis.
    pub fn resolve(&self, mut n: Node) -> Node {
        while let Some(&fwd) = self.resolved.get(&n) {
            n = fwd;
        }
        n
    }

    /// Record a definition of `slot` in `block`.
    pub fn def_var(&mut self, block: Node, slot: Slot, value: Node) {
        self.defs.insert((block, slot), value);
    }

    /// The current definition of `slot` as seen from `block`, synthesizing phis as needed.
    pub fn use_var(&mut self, graph: &mut Graph, block: Node, slot: Slot, mode: Mode) -> Node {
        if let Some(&def) = self.defs.get(&(block, slot)) {
            return self.resolve(def);
        }
        self.use_var_recursive(graph, block, slot, mode)
    }

    fn use_var_recursive(&mut self, graph: &mut Graph, block: Node, slot: Slot, mode: Mode) -> Node {
        let value = if !self.is_sealed(block) {
            // The block may still grow predecessors: leave a placeholder to be patched by
            // `seal_block`.
            let phi = graph.add_raw(NodeData::Plain(Opcode::Phi), mode, Some(block), &[]);
            self.incomplete.entry(block).or_default().push((slot, phi));
            phi
        } else {
            let preds: Vec<Node> = graph.block_preds(block).to_vec();
            match preds.len() {
                0 => graph.new_unknown(mode),
                1 => {
                    let pred_block = graph.block_of(preds[0]);
                    self.use_var(graph, pred_block, slot, mode)
                }
                _ => {
                    // A join: create the phi before descending, so cycles through this block
                    // find it instead of recursing forever.
                    let phi = graph.add_raw(NodeData::Plain(Opcode::Phi), mode, Some(block), &[]);
                    self.defs.insert((block, slot), phi);
                    self.fill_phi(graph, block, slot, phi, mode)
                }
            }
        };
        self.defs.insert((block, slot), value);
        value
    }

    fn fill_phi(&mut self, graph: &mut Graph, block: Node, slot: Slot, phi: Node, mode: Mode) -> Node {
        let preds: Vec<Node> = graph.block_preds(block).to_vec();
        for ctrl in preds {
            let pred_block = graph.block_of(ctrl);
            let operand = self.use_var(graph, pred_block, slot, mode);
            graph.add_input(phi, operand);
        }
        self.try_remove_trivial(graph, phi)
    }

    /// Is the predecessor list of `block` final?
    pub fn is_sealed(&self, block: Node) -> bool {
        self.sealed.contains(&block)
    }

    /// Declare the predecessor list of `block` final and patch its placeholder phis.
    ///
    /// Maturing a block twice is a contract violation.
    pub fn seal_block(&mut self, graph: &mut Graph, block: Node) {
        assert!(!self.is_sealed(block), "{} matured twice", block);
        self.sealed.insert(block);
        let pending = self.incomplete.remove(&block).unwrap_or_default();
        for (slot, phi) in pending {
            let mode = graph.mode(phi);
            self.fill_phi(graph, block, slot, phi, mode);
        }
    }

    /// Remove `phi` if all its operands agree; cascades into phi users whose triviality this
    /// may have exposed.
    fn try_remove_trivial(&mut self, graph: &mut Graph, phi: Node) -> Node {
        let mut same = None;
        for &op in graph.inputs(phi) {
            let op = self.resolve(op);
            if op == phi || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return phi;
            }
            same = Some(op);
        }
        let same = match same {
            Some(same) => same,
            // Unreachable or undefined: the merge of nothing.
            None => graph.new_unknown(graph.mode(phi)),
        };

        let phi_users: Vec<Node> = graph
            .users(phi)
            .iter()
            .map(|u| u.node)
            .filter(|&u| u != phi && graph.opcode(u) == Opcode::Phi)
            .collect();
        log::trace!("ssa: trivial {} becomes {}", phi, same);
        graph.exchange(phi, same);
        self.resolved.insert(phi, same);

        for user in phi_users {
            if graph.opcode(user) == Opcode::Phi {
                self.try_remove_trivial(graph, user);
            }
        }
        same
    }
}
