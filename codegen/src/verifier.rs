//! Middle-end graph verifier.
//!
//! Checks the structural invariants that every pass must preserve: block ownership, phi arity,
//! projection validity, mode signatures, memory shape, and (when dominance information is
//! supplied) the dominance of definitions over uses. Findings are collected as warnings; the
//! verifier never mutates the graph and never aborts.

use crate::analysis::cfg::BlockGraph;
use crate::analysis::domtree::DominatorTree;
use crate::ir::{Graph, Mode, Node, NodeData, Opcode};
use core::fmt;

/// A verifier finding: the offending node, its block, and a message.
#[derive(Debug, Clone)]
pub struct VerifierError {
    /// The node the finding is about.
    pub node: Node,
    /// The block of that node, if it has one.
    pub block: Option<Node>,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{} in {}: {}", self.node, block, self.message),
            None => write!(f, "{}: {}", self.node, self.message),
        }
    }
}

/// A list of verifier findings.
#[derive(Debug, Clone, Default)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Return whether no errors were collected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Report a finding.
    pub fn report(&mut self, graph: &Graph, node: Node, message: impl Into<String>) {
        let message = message.into();
        let error = VerifierError {
            node,
            block: graph.block(node),
            message,
        };
        log::warn!("verify: {}: {}", graph.entity(), error);
        self.0.push(error);
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifierErrors {}

/// A verifier result.
pub type VerifierResult<T> = Result<T, VerifierErrors>;

/// Verify the structural invariants of `graph`; dominance checks run when `domtree` and `cfg`
/// are supplied and valid.
pub fn verify_graph(
    graph: &Graph,
    cfg: Option<&BlockGraph>,
    domtree: Option<&DominatorTree>,
    errors: &mut VerifierErrors,
) {
    let _tt = crate::timing::verifier();
    for n in graph.nodes() {
        let opcode = graph.opcode(n);
        if opcode == Opcode::Bad {
            continue;
        }
        verify_block_ownership(graph, n, errors);
        match opcode {
            Opcode::Phi => verify_phi(graph, n, errors),
            Opcode::Proj => verify_proj(graph, n, errors),
            Opcode::Block => verify_block(graph, n, errors),
            _ => {}
        }
        verify_modes(graph, n, errors);
        if let (Some(cfg), Some(domtree)) = (cfg, domtree) {
            if domtree.is_valid() {
                verify_dominance(graph, cfg, domtree, n, errors);
            }
        }
        if graph.edges_active() {
            verify_memory(graph, n, errors);
        }
    }
}

/// Verify `graph` with freshly computed dominance information, collecting all findings.
pub fn verify(graph: &Graph) -> VerifierResult<()> {
    let mut errors = VerifierErrors::default();
    let cfg = BlockGraph::with_graph(graph);
    let domtree = DominatorTree::with_graph(graph, &cfg);
    verify_graph(graph, Some(&cfg), Some(&domtree), &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn verify_block_ownership(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    let opcode = graph.opcode(n);
    if opcode == Opcode::Block {
        return;
    }
    match graph.block(n) {
        None if opcode != Opcode::End => {
            errors.report(graph, n, "node has no owning block");
        }
        Some(b) if graph.opcode(b) != Opcode::Block => {
            errors.report(graph, n, format!("owning block {} is not a Block", b));
        }
        _ => {}
    }
}

fn verify_phi(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    let block = match graph.block(n) {
        Some(b) => b,
        None => return,
    };
    if graph.arity(n) != graph.arity(block) {
        errors.report(
            graph,
            n,
            format!(
                "phi arity {} does not match block arity {}",
                graph.arity(n),
                graph.arity(block)
            ),
        );
    }
    let mode = graph.mode(n);
    for &input in graph.inputs(n) {
        if graph.opcode(input) != Opcode::Bad && graph.mode(input) != mode {
            errors.report(
                graph,
                n,
                format!("phi operand {} has mode {}", input, graph.mode(input)),
            );
        }
    }
}

fn verify_proj(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    let pred = graph.input(n, 0);
    let pred_op = graph.opcode(pred);
    if !pred_op.is_tuple_producer() {
        errors.report(
            graph,
            n,
            format!("projection out of non-tuple node {}", pred),
        );
        return;
    }
    let num = match graph.data(n) {
        NodeData::Proj(num) => *num,
        _ => unreachable!(),
    };
    let max = match pred_op {
        Opcode::Load | Opcode::Alloc | Opcode::Cond => Some(1),
        Opcode::Store => Some(0),
        Opcode::Tuple => Some(graph.arity(pred) as u32 - 1),
        _ => None,
    };
    if let Some(max) = max {
        if num > max {
            errors.report(
                graph,
                n,
                format!("projection number {} out of range for {}", num, pred_op),
            );
        }
    }
}

fn verify_block(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    for &pred in graph.block_preds(n) {
        if graph.opcode(pred) == Opcode::Bad {
            continue;
        }
        if !graph.is_cf(pred) {
            errors.report(
                graph,
                n,
                format!("block predecessor {} is not a control-flow node", pred),
            );
        }
    }
}

fn verify_modes(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    let opcode = graph.opcode(n);
    let mode = graph.mode(n);
    let ins = graph.inputs(n);
    let bad = |g: &Graph, x: Node| g.opcode(x) == Opcode::Bad;
    match opcode {
        op if op.is_binary() => {
            if ins.len() != 2 {
                errors.report(graph, n, "binary node without two operands");
                return;
            }
            if !bad(graph, ins[0]) && graph.mode(ins[0]) != mode {
                errors.report(graph, n, "left operand mode mismatch");
            }
            let shift = matches!(op, Opcode::Shl | Opcode::Shr | Opcode::Shrs);
            if !bad(graph, ins[1]) {
                if shift {
                    if !graph.mode(ins[1]).is_int() {
                        errors.report(graph, n, "shift amount is not an integer");
                    }
                } else if graph.mode(ins[1]) != mode {
                    errors.report(graph, n, "right operand mode mismatch");
                }
            }
        }
        Opcode::Cmp => {
            if mode != Mode::B {
                errors.report(graph, n, "comparison does not produce a boolean");
            }
            if ins.len() == 2
                && !bad(graph, ins[0])
                && !bad(graph, ins[1])
                && graph.mode(ins[0]) != graph.mode(ins[1])
            {
                errors.report(graph, n, "comparison of distinct modes");
            }
        }
        Opcode::Cond => {
            if ins.len() != 1 || (!bad(graph, ins[0]) && graph.mode(ins[0]) != Mode::B) {
                errors.report(graph, n, "cond selector is not a boolean");
            }
        }
        Opcode::Load => {
            if ins.len() != 2 {
                errors.report(graph, n, "load needs memory and address inputs");
                return;
            }
            if graph.mode(ins[0]) != Mode::M {
                errors.report(graph, n, "load input 0 is not memory");
            }
            if graph.mode(ins[1]) != Mode::P {
                errors.report(graph, n, "load input 1 is not an address");
            }
        }
        Opcode::Store => {
            if ins.len() != 3 {
                errors.report(graph, n, "store needs memory, address and value inputs");
                return;
            }
            if graph.mode(ins[0]) != Mode::M {
                errors.report(graph, n, "store input 0 is not memory");
            }
            if graph.mode(ins[1]) != Mode::P {
                errors.report(graph, n, "store input 1 is not an address");
            }
        }
        Opcode::Return => {
            if ins.is_empty() || graph.mode(ins[0]) != Mode::M {
                errors.report(graph, n, "return input 0 is not memory");
            }
        }
        Opcode::Call => {
            if ins.len() < 2 {
                errors.report(graph, n, "call needs memory and callee inputs");
                return;
            }
            if graph.mode(ins[0]) != Mode::M {
                errors.report(graph, n, "call input 0 is not memory");
            }
            if graph.mode(ins[1]) != Mode::P {
                errors.report(graph, n, "callee is not an address");
            }
        }
        _ => {}
    }
}

fn verify_dominance(
    graph: &Graph,
    cfg: &BlockGraph,
    domtree: &DominatorTree,
    n: Node,
    errors: &mut VerifierErrors,
) {
    let opcode = graph.opcode(n);
    if opcode == Opcode::Block || opcode == Opcode::End {
        return;
    }
    let block = match graph.block(n) {
        Some(b) => b,
        None => return,
    };
    if !domtree.is_reachable(block) {
        return;
    }
    if opcode == Opcode::Phi {
        // A phi operand must dominate the matching predecessor block. Arity mismatches are
        // reported separately; don't trip over them here.
        let preds = cfg.preds(block);
        for (i, &input) in graph.inputs(n).iter().enumerate() {
            if i >= preds.len() {
                break;
            }
            if graph.opcode(input) == Opcode::Bad || graph.opcode(input) == Opcode::Unknown {
                continue;
            }
            let def_block = graph.block_of(input);
            if domtree.is_reachable(preds[i]) && !domtree.dominates(def_block, preds[i]) {
                errors.report(
                    graph,
                    n,
                    format!(
                        "phi operand {} does not dominate predecessor {}",
                        input, preds[i]
                    ),
                );
            }
        }
        return;
    }
    for &input in graph.inputs(n) {
        let input_op = graph.opcode(input);
        if input_op == Opcode::Block || input_op == Opcode::Bad || input_op == Opcode::Unknown {
            continue;
        }
        // Floating computations are placed loosely; dominance is only meaningful between
        // pinned definitions here.
        if !input_op.is_pinned() {
            continue;
        }
        let def_block = graph.block_of(input);
        if domtree.is_reachable(def_block) && !domtree.dominates(def_block, block) {
            errors.report(
                graph,
                n,
                format!("use of {} is not dominated by its definition", input),
            );
        }
    }
}

fn verify_memory(graph: &Graph, n: Node, errors: &mut VerifierErrors) {
    // Every store has exactly one memory successor: the program order of side effects along a
    // path is total.
    if graph.opcode(n) == Opcode::Proj && graph.mode(n) == Mode::M {
        let pred = graph.input(n, 0);
        if graph.opcode(pred) == Opcode::Store && graph.n_users(n) > 1 {
            errors.report(
                graph,
                n,
                format!("store memory result has {} successors", graph.n_users(n)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Tarval, TypeRef};

    #[test]
    fn clean_graph_verifies() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jump]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let v = g.new_const(Tarval::new(Mode::IS32, 1));
        let ret = g.new_return(block, mem, &[v]);
        g.add_input(g.end_block(), ret);
        assert!(verify(&g).is_ok());
    }

    #[test]
    fn phi_arity_mismatch_is_reported() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jump]);
        let one = g.new_const(Tarval::new(Mode::IS32, 1));
        let two = g.new_const(Tarval::new(Mode::IS32, 2));
        // Two operands in a one-predecessor block.
        let phi = g.add_raw(
            NodeData::Plain(Opcode::Phi),
            Mode::IS32,
            Some(block),
            &[one, two],
        );
        g.keep_alive(phi);
        let result = verify(&g);
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("phi arity")));
    }

    #[test]
    fn mode_mismatch_is_reported() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let block = g.start_block();
        let narrow = g.new_const(Tarval::new(Mode::IS16, 1));
        let wide = g.new_const(Tarval::new(Mode::IS32, 2));
        let add = g.add_raw(
            NodeData::Plain(Opcode::Add),
            Mode::IS32,
            Some(block),
            &[narrow, wide],
        );
        g.keep_alive(add);
        let result = verify(&g);
        assert!(result.is_err());
    }

    #[test]
    fn verifier_does_not_mutate() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let v = g.new_const(Tarval::new(Mode::IS32, 1));
        g.keep_alive(v);
        let before = g.node_count();
        let _ = verify(&g);
        let _ = verify(&g);
        assert_eq!(g.node_count(), before);
    }
}
