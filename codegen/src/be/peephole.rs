//! Two-address fix-up and final peephole pass.
//!
//! Targets whose opcodes destroy an input express that with a "should be same" tie between the
//! result and that input. After register allocation the tie may be unsatisfied; this pass
//! repairs each case, either through a target-specific rewrite (e.g. `sub -> neg; add` when
//! the result landed on the subtrahend) or by inserting a copy of the tied input into the
//! result register. The target's finalize hook runs afterwards.

use crate::be::regalloc::{Assignments, RegAssignment};
use crate::be::sched::Schedule;
use crate::be::select::Constraints;
use crate::ir::{Graph, Node, NodeData, Opcode};
use crate::isa::{TargetIsa, TwoAddressFix};
use crate::result::CodegenResult;
use crate::timing;

/// Run the target's finalization hook.
pub fn finalize(
    isa: &dyn TargetIsa,
    graph: &mut Graph,
    schedule: &mut Schedule,
    regs: &mut Assignments,
) -> CodegenResult<()> {
    let _tt = timing::peephole();
    isa.peephole(graph, schedule, regs)
}

/// Repair unsatisfied two-address ties.
pub fn fix_two_address(
    isa: &dyn TargetIsa,
    graph: &mut Graph,
    constraints: &mut Constraints,
    schedule: &mut Schedule,
    regs: &mut Assignments,
) {
    let blocks: Vec<Node> = graph.blocks().collect();
    for block in blocks {
        let nodes: Vec<Node> = schedule.nodes(block).to_vec();
        for n in nodes {
            let req = match constraints.out_req(n) {
                Some(req) => req,
                None => continue,
            };
            let tied = match req.should_be_same {
                Some(tied) => usize::from(tied),
                None => continue,
            };
            let out = match regs.get(n) {
                Some(reg) => reg,
                None => continue,
            };
            let tied_in = graph.input(n, tied);
            let tied_reg = match regs.get(tied_in) {
                Some(reg) => reg,
                None => continue,
            };
            if out == tied_reg {
                continue;
            }

            log::trace!(
                "two-address: {} result in {:?}, tied operand in {:?}",
                n,
                out,
                tied_reg
            );
            match isa.fix_two_address(graph, n, constraints, schedule, regs) {
                TwoAddressFix::Handled => {}
                TwoAddressFix::InsertCopy => {
                    insert_tied_copy(graph, constraints, schedule, regs, n, tied, out);
                }
            }
        }
    }
}

/// The default repair: copy the tied input into the result register in front of the node.
fn insert_tied_copy(
    graph: &mut Graph,
    constraints: &mut Constraints,
    schedule: &mut Schedule,
    regs: &mut Assignments,
    n: Node,
    tied: usize,
    out: RegAssignment,
) {
    let input = graph.input(n, tied);
    let block = graph.block_of(n);
    let copy = graph.add_raw(
        NodeData::Plain(Opcode::Copy),
        graph.mode(input),
        Some(block),
        &[input],
    );
    constraints.set_out(copy, crate::be::select::OutReq::class(out.class));
    regs.set(copy, out);
    schedule.insert_before(graph, block, copy, n);
    graph.set_input(n, tied, copy);
}
