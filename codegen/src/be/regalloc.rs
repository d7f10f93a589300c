//! Register allocation.
//!
//! A target-agnostic allocator driven by the requirements attached during instruction
//! selection, with target callbacks for spills and reloads. The allocator works on scheduled
//! code:
//!
//! 1. Phi operands are routed through fresh Copy nodes at the end of the predecessor blocks,
//!    so every phi congruence class has its own short-lived members.
//! 2. Live ranges are built per block from the block-boundary liveness sets and the schedule
//!    timestamps.
//! 3. Values are colored greedily, preferring tied registers ("should be same") and phi
//!    congruence, honoring limited sets and "must be different" constraints.
//! 4. When a value finds no register, it is spilled through the target's `new_spill` /
//!    `new_reload` callbacks and the coloring restarts with the shortened ranges.
//!
//! Exempt registers (`non_ssa_regs`, e.g. the stack pointer) never participate.

use crate::be::sched::Schedule;
use crate::be::select::Constraints;
use crate::context::Context;
use crate::fx::FxHashMap;
use crate::ir::{Graph, Node, NodeData, Opcode};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::timing;
use seagraph_entity::SecondaryMap;

/// A register assigned to a value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegAssignment {
    /// The register class.
    pub class: u8,
    /// The in-class register index.
    pub index: u16,
}

/// The register assigned to every value.
pub struct Assignments {
    map: SecondaryMap<Node, Option<RegAssignment>>,
}

impl Assignments {
    /// No assignments.
    pub fn new() -> Self {
        Self {
            map: SecondaryMap::new(),
        }
    }

    /// The register of `n`, if one was assigned.
    pub fn get(&self, n: Node) -> Option<RegAssignment> {
        self.map.get(n).copied().flatten()
    }

    /// Assign a register to `n`.
    pub fn set(&mut self, n: Node, reg: RegAssignment) {
        self.map[n] = Some(reg);
    }
}

impl Default for Assignments {
    fn default() -> Self {
        Self::new()
    }
}

/// How often the allocator restarts after spilling before giving up.
const MAX_SPILL_ROUNDS: usize = 8;

/// Allocate registers for every value of the graph.
///
/// Unassignable values are left without a register after the spill budget is exhausted; the
/// verifier reports them.
pub fn allocate(
    ctx: &mut Context,
    isa: &dyn TargetIsa,
    constraints: &mut Constraints,
    schedule: &mut Schedule,
) -> CodegenResult<Assignments> {
    let _tt = timing::regalloc();
    insert_phi_copies(ctx, isa, constraints, schedule);

    for round in 0..MAX_SPILL_ROUNDS {
        ctx.compute_liveness();
        match try_color(ctx, isa, constraints, schedule) {
            Ok(assignments) => return Ok(assignments),
            Err(victim) => {
                log::debug!(
                    "regalloc: round {}: no register for {}, spilling",
                    round,
                    victim
                );
                if !spill_value(ctx, isa, constraints, schedule, victim) {
                    log::warn!("regalloc: {} cannot be spilled", victim);
                    break;
                }
            }
        }
    }

    // Out of options: color what can be colored and let the verifier report the rest.
    ctx.compute_liveness();
    Ok(try_color(ctx, isa, constraints, schedule).unwrap_or_else(|_| {
        color_best_effort(ctx, isa, constraints, schedule)
    }))
}

/// Route every data phi operand through a Copy in the predecessor block.
fn insert_phi_copies(
    ctx: &mut Context,
    isa: &dyn TargetIsa,
    constraints: &mut Constraints,
    schedule: &mut Schedule,
) {
    let graph = &mut ctx.graph;
    let phis: Vec<Node> = graph
        .nodes()
        .filter(|&n| graph.opcode(n) == Opcode::Phi && graph.mode(n).is_data())
        .collect();
    for phi in phis {
        let class = match isa.class_for_mode(graph.mode(phi)) {
            Some(class) => class,
            None => continue,
        };
        let block = graph.block_of(phi);
        let preds: Vec<Node> = graph.block_preds(block).to_vec();
        for (i, ctrl) in preds.into_iter().enumerate() {
            let input = graph.input(phi, i);
            if graph.opcode(input) == Opcode::Unknown || graph.opcode(input) == Opcode::Bad {
                continue;
            }
            let pred_block = graph.block_of(ctrl);
            let copy = graph.add_raw(
                NodeData::Plain(Opcode::Copy),
                graph.mode(phi),
                Some(pred_block),
                &[input],
            );
            constraints.set_out(copy, crate::be::select::OutReq::class(class));
            constraints.set_in(copy, 0, crate::be::select::RegReq::class(class));
            schedule.append(graph, pred_block, copy);
            graph.set_input(phi, i, copy);
        }
    }
}

/// One live interval of a value within a block, in doubled schedule coordinates: uses happen
/// at even points, definitions at the following odd point.
#[derive(Clone, Copy, Debug)]
struct Interval {
    block: Node,
    start: u32,
    end: u32,
}

fn block_len(schedule: &Schedule, block: Node) -> u32 {
    schedule.nodes(block).len() as u32
}

/// Build the live intervals of `v`.
fn intervals_of(
    ctx: &Context,
    schedule: &Schedule,
    v: Node,
) -> Vec<Interval> {
    let graph = &ctx.graph;
    let def_block = graph.block_of(v);
    let mut out = Vec::new();
    for block in graph.blocks() {
        let live_in = ctx.liveness.is_live_in(block, v);
        let live_out = ctx.liveness.is_live_out(block, v);
        let def_here = block == def_block;

        let mut max_use = None;
        for u in graph.users(v) {
            let user = u.node;
            if graph.opcode(user) == Opcode::Phi || graph.opcode(user) == Opcode::Proj {
                continue;
            }
            if user == graph.end() {
                continue;
            }
            if graph.block_of(user) == block {
                let pos = schedule.pos(graph, user);
                max_use = Some(max_use.map_or(pos, |m: u32| m.max(pos)));
            }
        }

        if !live_in && !live_out && !def_here && max_use.is_none() {
            continue;
        }
        let start = if def_here {
            2 * schedule.pos(graph, v) + 1
        } else {
            0
        };
        let end = if live_out {
            2 * (block_len(schedule, block) + 1)
        } else if let Some(m) = max_use {
            2 * m + 1
        } else {
            start + 1
        };
        if end > start {
            out.push(Interval {
                block,
                start,
                end,
            });
        }
    }
    out
}

fn overlaps(a: &[Interval], b: &[Interval]) -> bool {
    for x in a {
        for y in b {
            if x.block == y.block && x.start < y.end && y.start < x.end {
                return true;
            }
        }
    }
    false
}

/// The values that need registers, in coloring order: phis first, then definition order.
fn register_values(ctx: &Context, isa: &dyn TargetIsa) -> Vec<Node> {
    let graph = &ctx.graph;
    let mut values: Vec<Node> = graph
        .nodes()
        .filter(|&n| {
            graph.mode(n).is_data()
                && !matches!(graph.opcode(n), Opcode::Bad | Opcode::Unknown | Opcode::Block)
                && isa.class_for_mode(graph.mode(n)).is_some()
        })
        .collect();
    values.sort_by_key(|&n| (graph.opcode(n) != Opcode::Phi, n));
    values
}

/// The class of `v`: the selected requirement, or the default class of its mode.
fn class_of(ctx: &Context, isa: &dyn TargetIsa, constraints: &Constraints, v: Node) -> u8 {
    constraints
        .out_req(v)
        .map(|r| r.req.class)
        .or_else(|| isa.class_for_mode(ctx.graph.mode(v)))
        .expect("value without a register class")
}

/// Greedy coloring. Returns the first value that could not be assigned.
fn try_color(
    ctx: &Context,
    isa: &dyn TargetIsa,
    constraints: &Constraints,
    schedule: &Schedule,
) -> Result<Assignments, Node> {
    color(ctx, isa, constraints, schedule, false).map_err(|v| v)
}

fn color_best_effort(
    ctx: &Context,
    isa: &dyn TargetIsa,
    constraints: &Constraints,
    schedule: &Schedule,
) -> Assignments {
    match color(ctx, isa, constraints, schedule, true) {
        Ok(a) => a,
        Err(_) => Assignments::new(),
    }
}

fn color(
    ctx: &Context,
    isa: &dyn TargetIsa,
    constraints: &Constraints,
    schedule: &Schedule,
    best_effort: bool,
) -> Result<Assignments, Node> {
    let graph = &ctx.graph;
    let values = register_values(ctx, isa);
    let mut ranges: FxHashMap<Node, Vec<Interval>> = FxHashMap::default();
    for &v in &values {
        ranges.insert(v, intervals_of(ctx, schedule, v));
    }

    // Phi congruence groups: the phi and its operand copies prefer one register.
    let mut group_of: FxHashMap<Node, Node> = FxHashMap::default();
    for &v in &values {
        if graph.opcode(v) == Opcode::Phi {
            for &input in graph.inputs(v) {
                if graph.opcode(input) == Opcode::Copy {
                    group_of.insert(input, v);
                }
            }
        }
    }
    let mut group_reg: FxHashMap<Node, u16> = FxHashMap::default();

    let mut assignments = Assignments::new();
    let mut failed = None;
    for &v in &values {
        let class = class_of(ctx, isa, constraints, v);
        let class_descr = isa.reg_info().class(class);
        let out_req = constraints.out_req(v);

        let mut allowed = class_descr.allocatable;
        if let Some(req) = out_req {
            if let Some(mask) = req.req.limited {
                allowed &= mask;
            }
        }

        // Registers of interfering, already-colored values of the same class are taken.
        for &w in &values {
            if w == v {
                continue;
            }
            if let Some(reg) = assignments.get(w) {
                if reg.class == class && overlaps(&ranges[&v], &ranges[&w]) {
                    allowed &= !(1 << reg.index);
                }
            }
        }

        // "Must be different" excludes the named input registers even when their ranges have
        // ended.
        if let Some(req) = out_req {
            for (i, &input) in graph.inputs(v).iter().enumerate() {
                if req.must_be_different & (1 << i) != 0 {
                    if let Some(reg) = assignments.get(input) {
                        if reg.class == class {
                            allowed &= !(1 << reg.index);
                        }
                    }
                }
            }
        }

        // Preferences: the tied input's register, or the phi group's register.
        let mut preference = None;
        if let Some(req) = out_req {
            if let Some(tied) = req.should_be_same {
                let input = graph.input(v, usize::from(tied));
                if let Some(reg) = assignments.get(input) {
                    preference = Some(reg.index);
                }
            }
        }
        if preference.is_none() {
            let group = if graph.opcode(v) == Opcode::Phi {
                Some(v)
            } else {
                group_of.get(&v).copied()
            };
            if let Some(group) = group {
                preference = group_reg.get(&group).copied();
            }
        }

        let chosen = match preference {
            Some(p) if allowed & (1 << p) != 0 => Some(p),
            _ => (0..64).find(|i| allowed & (1 << i) != 0),
        };
        match chosen {
            Some(index) => {
                assignments.set(v, RegAssignment { class, index });
                let group = if graph.opcode(v) == Opcode::Phi {
                    Some(v)
                } else {
                    group_of.get(&v).copied()
                };
                if let Some(group) = group {
                    group_reg.entry(group).or_insert(index);
                }
            }
            None if best_effort => {
                log::warn!("regalloc: leaving {} unassigned", v);
                failed = Some(v);
            }
            None => return Err(v),
        }
    }
    let _ = failed;
    Ok(assignments)
}

/// Split the live range of `v`: store it after its definition and reload it in front of every
/// use. Returns false for values that cannot be spilled.
fn spill_value(
    ctx: &mut Context,
    isa: &dyn TargetIsa,
    constraints: &mut Constraints,
    schedule: &mut Schedule,
    v: Node,
) -> bool {
    if matches!(
        ctx.graph.opcode(v),
        Opcode::Phi | Opcode::Copy | Opcode::Reload
    ) {
        return false;
    }
    let graph = &mut ctx.graph;
    let class = match isa.class_for_mode(graph.mode(v)) {
        Some(class) => class,
        None => return false,
    };

    let def_block = graph.block_of(v);
    let mem = graph.no_mem();
    let spill = isa.new_spill(graph, v, mem, def_block);
    let anchor = resolve_proj(graph, v);
    schedule.insert_after(graph, def_block, spill, anchor);

    let users: Vec<crate::ir::graph::NodeUse> = graph
        .users(v)
        .iter()
        .copied()
        .filter(|u| {
            u.node != spill
                && u.node != graph.end()
                && graph.opcode(u.node) != Opcode::Phi
                && graph.opcode(u.node) != Opcode::Proj
        })
        .collect();
    if users.is_empty() {
        return false;
    }
    for u in users {
        let use_block = graph.block_of(u.node);
        let reload = isa.new_reload(graph, v, spill, use_block);
        constraints.set_out(reload, crate::be::select::OutReq::class(class));
        schedule.insert_before(graph, use_block, reload, u.node);
        graph.set_input(u.node, u.pos as usize, reload);
    }
    ctx.invalidate(crate::ir::Properties::LIVENESS);
    true
}

fn resolve_proj(graph: &Graph, mut n: Node) -> Node {
    while graph.opcode(n) == Opcode::Proj {
        n = graph.input(n, 0);
    }
    n
}
