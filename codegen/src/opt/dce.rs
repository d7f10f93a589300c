//! Dead node elimination and Bad-edge removal.
//!
//! Passes never free individual nodes: they exchange them away and leave the arena to be
//! garbage-collected in one step. [`do_dce`] performs that collection. [`remove_bads`] cleans
//! control flow after branch folding: block predecessors that turned into Bad are dropped
//! together with the matching phi operands.

use crate::ir::{Graph, Node, Opcode};

/// Perform dead node elimination on `graph`: every node unreachable from the graph's roots is
/// dropped and the arena compacted. Node ids are renumbered.
pub fn do_dce(graph: &mut Graph) {
    graph.remove_dead_nodes();
}

/// Remove Bad control-flow predecessors and the matching phi operands.
///
/// Blocks left without predecessors (other than the start block) become unreachable and are
/// collected by the next dead-node elimination.
pub fn remove_bads(graph: &mut Graph) {
    let blocks: Vec<Node> = graph.blocks().collect();
    for block in blocks {
        let preds = graph.block_preds(block).to_vec();
        let dead: Vec<usize> = preds
            .iter()
            .enumerate()
            .filter(|(_, &p)| graph.opcode(p) == Opcode::Bad)
            .map(|(i, _)| i)
            .collect();
        if dead.is_empty() {
            continue;
        }

        let keep: Vec<Node> = preds
            .iter()
            .copied()
            .filter(|&p| graph.opcode(p) != Opcode::Bad)
            .collect();
        log::trace!(
            "remove_bads: {} loses {} of {} predecessors",
            block,
            dead.len(),
            preds.len()
        );

        let phis: Vec<Node> = graph
            .nodes_in_block(block)
            .filter(|&n| graph.opcode(n) == Opcode::Phi)
            .collect();
        for phi in phis {
            let ins: Vec<Node> = graph
                .inputs(phi)
                .iter()
                .enumerate()
                .filter(|(i, _)| !dead.contains(i))
                .map(|(_, &v)| v)
                .collect();
            graph.set_inputs(phi, &ins);
        }
        graph.set_inputs(block, &keep);
    }
    graph.invalidate(
        crate::ir::Properties::DOMINANCE
            .union(crate::ir::Properties::POSTDOMINANCE)
            .union(crate::ir::Properties::LOOP_TREE),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, NodeData, Tarval, TypeRef};

    #[test]
    fn folded_branch_leaves_no_bad_edges() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jump = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let header = g.new_block(&[start_jump]);

        // A branch on a constant: the local optimizer turns the taken exit into a Jmp and the
        // other into Bad.
        let t = g.new_const(Tarval::bool_val(true));
        let cond = g.new_cond(header, t);
        let taken = g.new_proj(cond, pn::cond::TRUE, Mode::X);
        let untaken = g.new_proj(cond, pn::cond::FALSE, Mode::X);

        let a = g.new_const(Tarval::new(Mode::IS32, 1));
        let b = g.new_const(Tarval::new(Mode::IS32, 2));
        let join = g.new_block(&[taken, untaken]);
        let phi = g.add_raw(
            NodeData::Plain(Opcode::Phi),
            Mode::IS32,
            Some(join),
            &[a, b],
        );
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let ret = g.new_return(join, mem, &[phi]);
        g.add_input(g.end_block(), ret);

        assert_eq!(g.opcode(untaken), Opcode::Bad);
        remove_bads(&mut g);

        assert_eq!(g.block_preds(join).len(), 1);
        assert_eq!(g.arity(phi), 1);
        assert_eq!(g.input(phi, 0), a);

        do_dce(&mut g);
        assert!(crate::verifier::verify(&g).is_ok());
    }
}
