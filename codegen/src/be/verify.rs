//! Back-end verifier.
//!
//! Checks the invariants each pipeline stage must establish: schedule shape, register
//! constraints, per-class register pressure, spill-slot reachability, allocation consistency,
//! and a recompute-and-compare pass over the cached liveness. Findings are warnings collected
//! into [`VerifierErrors`]; the pipeline logs them and proceeds.

use crate::analysis::cfg::BlockGraph;
use crate::analysis::liveness::Liveness;
use crate::be::regalloc::Assignments;
use crate::be::sched::Schedule;
use crate::be::select::Constraints;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Graph, Node, NodeData, Opcode};
use crate::isa::TargetIsa;
use crate::verifier::VerifierErrors;

/// Verify the schedule: each node in its own block, phis first, one control-flow op at the
/// tail, strictly increasing timestamps, keeps immediately after their anchor, and every
/// in-block operand defined before its use.
pub fn verify_schedule(graph: &Graph, schedule: &Schedule, errors: &mut VerifierErrors) {
    let _tt = crate::timing::verifier();
    for block in graph.blocks() {
        let nodes = schedule.nodes(block);
        let mut seen_non_phi = false;
        let mut last_pos = 0;
        for (i, &n) in nodes.iter().enumerate() {
            if graph.opcode(n) == Opcode::Bad {
                errors.report(graph, n, "dead node is scheduled");
                continue;
            }
            if graph.block_of(n) != block {
                errors.report(graph, n, "scheduled outside its own block");
            }
            match graph.opcode(n) {
                Opcode::Phi => {
                    if seen_non_phi {
                        errors.report(graph, n, "phi scheduled after a non-phi node");
                    }
                }
                _ => seen_non_phi = true,
            }
            let pos = schedule.pos(graph, n);
            if pos <= last_pos {
                errors.report(graph, n, "timestamps are not strictly increasing");
            }
            last_pos = pos;

            if is_cf_op(graph, n) && i + 1 != nodes.len() {
                errors.report(graph, n, "control-flow op is not at the schedule tail");
            }
            if graph.opcode(n) == Opcode::Keep {
                let anchor = graph
                    .inputs(n)
                    .iter()
                    .map(|&a| schedule.pos(graph, a))
                    .max()
                    .unwrap_or(0);
                if pos != anchor + 1 {
                    errors.report(graph, n, "keep is not scheduled right after its anchor");
                }
            }
            if graph.opcode(n) != Opcode::Phi {
                for &input in graph.inputs(n) {
                    if graph.opcode(input) == Opcode::Block {
                        continue;
                    }
                    if graph.block_of(input) == block
                        && schedule.is_scheduled(graph, input)
                        && schedule.pos(graph, input) >= pos
                    {
                        errors.report(
                            graph,
                            n,
                            format!("operand {} does not precede its use", input),
                        );
                    }
                }
            }
        }
    }
}

/// Verify register constraints on every value: class matches the mode's class, the register is
/// allocatable and within the limited set, must-be-different pairs differ, and every input's
/// register class matches the consumer's requirement.
pub fn verify_node_regs(
    graph: &Graph,
    isa: &dyn TargetIsa,
    constraints: &Constraints,
    regs: &Assignments,
    errors: &mut VerifierErrors,
) {
    let _tt = crate::timing::verifier();
    let info = isa.reg_info();
    for n in graph.nodes() {
        if graph.opcode(n) == Opcode::Bad {
            continue;
        }
        if let Some(reg) = regs.get(n) {
            if let Some(expected) = isa.class_for_mode(graph.mode(n)) {
                if reg.class != expected {
                    errors.report(
                        graph,
                        n,
                        format!(
                            "register class {} does not match mode {}",
                            info.class(reg.class),
                            graph.mode(n)
                        ),
                    );
                }
            }
            let class = info.class(reg.class);
            if !class.is_allocatable(reg.index) {
                errors.report(
                    graph,
                    n,
                    format!("{} is not allocatable", info.reg_name(reg.class, reg.index)),
                );
            }
            if let Some(req) = constraints.out_req(n) {
                if let Some(limited) = req.req.limited {
                    if limited & (1 << reg.index) == 0 {
                        errors.report(graph, n, "register outside the limited set");
                    }
                }
                for (i, &input) in graph.inputs(n).iter().enumerate() {
                    if req.must_be_different & (1 << i) != 0 {
                        if regs.get(input) == Some(reg) {
                            errors.report(
                                graph,
                                n,
                                format!("must-be-different operand {} shares the register", input),
                            );
                        }
                    }
                }
            }
        }
        for (i, &input) in graph.inputs(n).iter().enumerate() {
            if let Some(req) = constraints.in_req(n, i) {
                if let Some(reg) = regs.get(input) {
                    if reg.class != req.class {
                        errors.report(
                            graph,
                            n,
                            format!("operand {} is in class {}", input, info.class(reg.class)),
                        );
                    }
                }
            }
        }
    }
}

/// Verify per-class register pressure: walking each block backwards from its live-out set, the
/// number of simultaneously live values never exceeds the class's allocatable count.
pub fn verify_pressure(
    graph: &Graph,
    isa: &dyn TargetIsa,
    schedule: &Schedule,
    liveness: &Liveness,
    errors: &mut VerifierErrors,
) {
    let _tt = crate::timing::verifier();
    for class in isa.reg_info().classes {
        let limit = class.allocatable_count() as usize;
        for block in graph.blocks() {
            let mut live: FxHashSet<Node> = liveness
                .live_out(block)
                .iter()
                .copied()
                .filter(|&v| isa.class_for_mode(graph.mode(v)) == Some(class.index))
                .collect();
            if live.len() > limit {
                errors.report(
                    graph,
                    block,
                    format!("{} values of class {} live at block end", live.len(), class),
                );
            }
            for &n in schedule.nodes(block).iter().rev() {
                live.remove(&n);
                // A tuple's register results are its projections.
                if graph.mode(n) == crate::ir::Mode::T {
                    for u in graph.users(n) {
                        if graph.opcode(u.node) == Opcode::Proj {
                            live.remove(&u.node);
                        }
                    }
                }
                if graph.opcode(n) != Opcode::Phi {
                    for &input in graph.inputs(n) {
                        if isa.class_for_mode(graph.mode(input)) == Some(class.index)
                            && graph.mode(input).is_data()
                        {
                            live.insert(input);
                        }
                    }
                }
                if live.len() > limit {
                    errors.report(
                        graph,
                        n,
                        format!(
                            "{} values of class {} live across this node",
                            live.len(),
                            class
                        ),
                    );
                }
            }
        }
    }
}

/// Verify the register allocation: every used value has a register, no two simultaneously live
/// values share one (exempt registers opt out), and a phi's register equals its operands'.
pub fn verify_allocation(
    graph: &Graph,
    isa: &dyn TargetIsa,
    schedule: &Schedule,
    liveness: &Liveness,
    regs: &Assignments,
    errors: &mut VerifierErrors,
) {
    let _tt = crate::timing::verifier();
    let exempt: FxHashSet<(u8, u16)> = isa.non_ssa_regs().iter().copied().collect();

    for n in graph.nodes() {
        if graph.opcode(n) == Opcode::Bad {
            continue;
        }
        // Every register value that is used must have a register.
        if graph.mode(n).is_data()
            && isa.class_for_mode(graph.mode(n)).is_some()
            && graph.edges_active()
            && graph
                .users(n)
                .iter()
                .any(|u| u.node != graph.end() && graph.opcode(u.node) != Opcode::Proj)
            && regs.get(n).is_none()
        {
            errors.report(graph, n, "used value has no register");
        }
        if graph.opcode(n) == Opcode::Phi && graph.mode(n).is_data() {
            let phi_reg = regs.get(n);
            for &input in graph.inputs(n) {
                if matches!(graph.opcode(input), Opcode::Unknown | Opcode::Bad) {
                    continue;
                }
                if regs.get(input) != phi_reg {
                    errors.report(
                        graph,
                        n,
                        format!("phi operand {} is in a different register", input),
                    );
                }
            }
        }
    }

    // Walk each block backwards tracking which value owns each register.
    for block in graph.blocks() {
        let mut owner: FxHashMap<(u8, u16), Node> = FxHashMap::default();
        for &v in liveness.live_out(block) {
            if let Some(reg) = regs.get(v) {
                if exempt.contains(&(reg.class, reg.index)) {
                    continue;
                }
                if let Some(&other) = owner.get(&(reg.class, reg.index)) {
                    if other != v {
                        errors.report(
                            graph,
                            v,
                            format!(
                                "shares {} with {} at the end of {}",
                                isa.reg_info().reg_name(reg.class, reg.index),
                                other,
                                block
                            ),
                        );
                    }
                }
                owner.insert((reg.class, reg.index), v);
            }
        }
        for &n in schedule.nodes(block).iter().rev() {
            if let Some(reg) = regs.get(n) {
                owner.remove(&(reg.class, reg.index));
            }
            if graph.opcode(n) != Opcode::Phi {
                for &input in graph.inputs(n) {
                    if let Some(reg) = regs.get(input) {
                        if exempt.contains(&(reg.class, reg.index)) {
                            continue;
                        }
                        if let Some(&other) = owner.get(&(reg.class, reg.index)) {
                            if other != input {
                                errors.report(
                                    graph,
                                    input,
                                    format!(
                                        "shares {} with {}",
                                        isa.reg_info().reg_name(reg.class, reg.index),
                                        other
                                    ),
                                );
                            }
                        }
                        owner.insert((reg.class, reg.index), input);
                    }
                }
            }
        }
    }
}

/// Verify spill slots: every reload's memory edge reaches a spill or a memory phi of spills,
/// and spills sharing a frame entity store the same value (so their live ranges cannot
/// interfere).
pub fn verify_spill_slots(graph: &Graph, errors: &mut VerifierErrors) {
    let _tt = crate::timing::verifier();
    let mut slot_value: FxHashMap<crate::ir::Entity, Node> = FxHashMap::default();
    for n in graph.nodes() {
        match graph.data(n) {
            NodeData::Reload(_) => {
                if !memory_reaches_spill(graph, graph.input(n, 0)) {
                    errors.report(graph, n, "memory edge does not reach a spill");
                }
            }
            NodeData::Spill(slot) => {
                if let Some(slot) = slot.expand() {
                    let value = graph.input(n, 1);
                    if let Some(&other) = slot_value.get(&slot) {
                        if other != value {
                            errors.report(
                                graph,
                                n,
                                format!("slot {} shared with a spill of {}", slot, other),
                            );
                        }
                    }
                    slot_value.insert(slot, value);
                }
            }
            _ => {}
        }
    }
}

fn memory_reaches_spill(graph: &Graph, mem: Node) -> bool {
    let mut seen = FxHashSet::default();
    let mut stack = vec![mem];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        match graph.opcode(n) {
            Opcode::Spill => return true,
            Opcode::Phi => stack.extend(graph.inputs(n).iter().copied()),
            Opcode::Proj => stack.push(graph.input(n, 0)),
            _ => {}
        }
    }
    false
}

/// Recompute liveness and compare it with the cached sets.
pub fn verify_liveness(
    graph: &Graph,
    cfg: &BlockGraph,
    cached: &Liveness,
    errors: &mut VerifierErrors,
) {
    let _tt = crate::timing::verifier();
    let fresh = Liveness::with_graph(graph, cfg);
    for block in graph.blocks() {
        if fresh.live_in(block) != cached.live_in(block) {
            errors.report(graph, block, "cached live-in set is stale");
        }
        if fresh.live_out(block) != cached.live_out(block) {
            errors.report(graph, block, "cached live-out set is stale");
        }
    }
}

fn is_cf_op(graph: &Graph, n: Node) -> bool {
    matches!(graph.opcode(n), Opcode::Jmp | Opcode::Cond | Opcode::Return)
        || (graph.mode(n) == crate::ir::Mode::X && graph.opcode(n) != Opcode::Proj)
}
