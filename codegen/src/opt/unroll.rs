//! Loop unrolling.
//!
//! Two strategies over a loop-closed SSA graph:
//!
//! - **Full/fixed-factor unrolling** when the iteration count is statically known: the loop
//!   body is cloned `factor` times and the back edge rewired, or the loop is dissolved into
//!   straight-line code when the factor equals the count. Reached through [`unroll_loop`].
//! - **Duff's-device unrolling** for loops with one exit, a recognized induction variable, and
//!   a valid bound: a fix-up runs the residue iterations, then an unrolled loop with a
//!   `factor`-sized stride takes over. The fix-up is either a literal duplicate of the loop or
//!   a chain of compares selecting a landing pad among peeled body copies. Reached through the
//!   [`unroll_loops`] driver.
//!
//! Preconditions for both: loop-closed SSA, consistent dominance, consistent out-edges, and no
//! Bad nodes. On any precondition violation the pass returns without mutating the graph.

use crate::analysis::loops::LoopRef;
use crate::context::Context;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{pn, Graph, Mode, Node, NodeData, Opcode, Properties, Relation, Tarval, TypeStore};
use crate::timing;

/// The analyzed shape of an unrollable candidate loop.
struct LoopShape {
    header: Node,
    /// Position of the entry edge among the header's predecessors.
    entry_pos: usize,
    /// Position of the back edge among the header's predecessors.
    back_pos: usize,
    /// All blocks of the loop.
    blocks: Vec<Node>,
    /// The blocks of the loop without the header.
    body_blocks: Vec<Node>,
    /// The loop-carried phis, all in the header.
    phis: Vec<Node>,

    /// The compare controlling the loop.
    cmp: Node,
    /// Effective relation with the induction variable on the left.
    relation: Relation,
    /// Input position of the bound within `cmp`.
    bound_pos: usize,
    /// The bound value.
    bound: Node,

    /// The exit projection in the header and the block it leads to.
    leave_proj: Node,
    exit_block: Node,
    /// The projection continuing into the body.
    stay_proj: Node,

    /// The induction phi.
    iv: Node,
    /// Its value on loop entry.
    start: Node,
    /// The increment operation and its pieces.
    step_op: Opcode,
    step: Node,
}

/// Unroll every eligible innermost loop of `ctx` with an automatically chosen factor of at
/// most `max_factor`.
///
/// The static-count strategy asks [`find_suitable_factor`] for a factor; the Duff strategy is
/// tried when that yields nothing.
pub fn unroll_loops(ctx: &mut Context, store: &TypeStore, max_factor: u32) {
    let _tt = timing::unroll();
    let mut done: FxHashSet<Node> = FxHashSet::default();
    loop {
        ctx.assure(
            Properties::NO_BADS
                | Properties::OUT_EDGES
                | Properties::DOMINANCE
                | Properties::LOOP_TREE
                | Properties::LOOP_CLOSED_SSA,
        );

        // Innermost loops only: unrolling invalidates the analysis of everything nested in
        // the unrolled region.
        let candidate = ctx
            .loops
            .loops()
            .find(|&lp| ctx.loops.children(lp).is_empty() && !done.contains(&ctx.loops.header(lp)));
        let lp = match candidate {
            Some(lp) => lp,
            None => break,
        };
        done.insert(ctx.loops.header(lp));

        let shape = match analyze_loop(ctx, store, lp) {
            Some(shape) => shape,
            None => {
                log::debug!("unroll: loop at {} not eligible", ctx.loops.header(lp));
                continue;
            }
        };

        let factor = find_suitable_factor(ctx, &shape, max_factor);
        if factor > 1 {
            let count = trip_count(&ctx.graph, &shape).unwrap_or(0);
            fixed_factor_unroll(ctx, &shape, factor, u64::from(factor) == count);
            continue;
        }

        let factor = find_suitable_factor_duff(&shape, max_factor);
        if factor > 1 {
            duff_unroll(ctx, &shape, factor);
        }
    }
}

/// Unroll one loop with an explicit factor. The iteration count must be statically known and a
/// multiple of the factor; when it equals the factor the loop dissolves into straight-line
/// code. Returns whether the graph was changed.
pub fn unroll_loop(ctx: &mut Context, store: &TypeStore, lp: LoopRef, factor: u32) -> bool {
    let _tt = timing::unroll();
    if factor < 2 {
        return false;
    }
    ctx.assure(
        Properties::NO_BADS
            | Properties::OUT_EDGES
            | Properties::DOMINANCE
            | Properties::LOOP_TREE
            | Properties::LOOP_CLOSED_SSA,
    );
    let shape = match analyze_loop(ctx, store, lp) {
        Some(shape) => shape,
        None => return false,
    };
    let count = match trip_count(&ctx.graph, &shape) {
        Some(count) => count,
        None => return false,
    };
    if count == 0 || u64::from(factor) > count || count % u64::from(factor) != 0 {
        return false;
    }
    fixed_factor_unroll(ctx, &shape, factor, u64::from(factor) == count);
    true
}

/// Choose an unroll factor for the static-count strategy.
//
// Disabled: this returns no factor ahead of its analysis, so the driver always falls through
// to the Duff strategy. Kept in place pending clarification of the static-count heuristics;
// explicit factors still reach the static path through `unroll_loop`.
fn find_suitable_factor(ctx: &Context, shape: &LoopShape, max_factor: u32) -> u32 {
    if true {
        return 0;
    }
    match trip_count(&ctx.graph, shape) {
        Some(count) if count > 0 && count <= u64::from(max_factor) => count as u32,
        _ => 0,
    }
}

/// Choose an unroll factor for the Duff strategy.
fn find_suitable_factor_duff(shape: &LoopShape, max_factor: u32) -> u32 {
    let _ = shape;
    if max_factor < 2 {
        0
    } else {
        max_factor.min(4)
    }
}

// ----------------------------------------------------------------------------------------
// Loop analysis.

/// Recognize the loop shape the unroller understands. Returns `None` when any validity
/// condition fails; the graph is untouched in that case.
fn analyze_loop(ctx: &Context, store: &TypeStore, lp: LoopRef) -> Option<LoopShape> {
    let graph = &ctx.graph;
    let header = ctx.loops.header(lp);
    let blocks = ctx.loops.blocks(lp).to_vec();

    // Two-predecessor header: one entry, one back edge.
    let header_preds = ctx.cfg.preds(header);
    if header_preds.len() != 2 {
        return None;
    }
    let (entry_pos, back_pos) = if ctx.loops.contains_block(lp, header_preds[0]) {
        (1, 0)
    } else if ctx.loops.contains_block(lp, header_preds[1]) {
        (0, 1)
    } else {
        return None;
    };

    // Exactly one exit edge, leaving from the header.
    let exits = ctx.loops.exit_edges(lp, &ctx.cfg);
    if exits.len() != 1 || exits[0].0 != header {
        return None;
    }
    let exit_block = exits[0].1;

    // The header's branch.
    let mut conds = graph
        .nodes_in_block(header)
        .filter(|&n| graph.opcode(n) == Opcode::Cond);
    let cond = conds.next()?;
    if conds.next().is_some() {
        return None;
    }
    let cmp = graph.input(cond, 0);
    if graph.opcode(cmp) != Opcode::Cmp {
        return None;
    }

    let (stay_proj, leave_proj) = classify_exits(graph, cond, exit_block)?;

    // The compared relation must be a strict or non-strict magnitude test; equality,
    // inequality, and unordered float relations are out.
    let raw_relation = match graph.data(cmp) {
        NodeData::Cmp(rel) => *rel,
        _ => return None,
    };
    if !raw_relation.is_ordered_magnitude() {
        return None;
    }

    // One side is a phi of the header: the induction variable.
    let lhs = graph.input(cmp, 0);
    let rhs = graph.input(cmp, 1);
    let (iv, bound, bound_pos, relation) = if is_header_phi(graph, lhs, header) {
        (lhs, rhs, 1, raw_relation)
    } else if is_header_phi(graph, rhs, header) {
        (rhs, lhs, 0, raw_relation.inversed())
    } else {
        return None;
    };
    if graph.mode(iv).is_float() {
        return None;
    }

    // The increment is reached from the phi through exactly the back edge.
    let increment = graph.input(iv, back_pos);
    let step_op = graph.opcode(increment);
    if !matches!(step_op, Opcode::Add | Opcode::Sub | Opcode::Mul) {
        return None;
    }
    let (a, b) = (graph.input(increment, 0), graph.input(increment, 1));
    let step = if a == iv {
        b
    } else if b == iv && step_op != Opcode::Sub {
        a
    } else {
        return None;
    };
    if !is_loop_invariant(ctx, lp, step) {
        return None;
    }

    // Every non-increment phi input must be a valid base, and so must the bound.
    let start = graph.input(iv, entry_pos);
    if !is_valid_base(ctx, store, lp, start) || !is_valid_base(ctx, store, lp, bound) {
        return None;
    }

    let body_blocks: Vec<Node> = blocks.iter().copied().filter(|&b| b != header).collect();
    if body_blocks.is_empty() {
        // A header looping straight onto itself has no body to clone.
        return None;
    }
    let phis: Vec<Node> = graph
        .nodes_in_block(header)
        .filter(|&n| graph.opcode(n) == Opcode::Phi)
        .collect();

    Some(LoopShape {
        header,
        entry_pos,
        back_pos,
        blocks,
        body_blocks,
        phis,
        cmp,
        relation,
        bound_pos,
        bound,
        leave_proj,
        exit_block,
        stay_proj,
        iv,
        start,
        step_op,
        step,
    })
}

fn is_header_phi(graph: &Graph, n: Node, header: Node) -> bool {
    graph.opcode(n) == Opcode::Phi && graph.block_of(n) == header
}

/// Find the Cond projection continuing the loop and the one leaving it.
fn classify_exits(graph: &Graph, cond: Node, exit_block: Node) -> Option<(Node, Node)> {
    let mut stay = None;
    let mut leave = None;
    for u in graph.users(cond) {
        if graph.opcode(u.node) != Opcode::Proj {
            continue;
        }
        let proj = u.node;
        // A control projection is the predecessor of exactly one block.
        let target = graph
            .users(proj)
            .iter()
            .find(|t| graph.opcode(t.node) == Opcode::Block)?
            .node;
        if target == exit_block {
            leave = Some(proj);
        } else {
            stay = Some(proj);
        }
    }
    match (stay, leave) {
        (Some(stay), Some(leave)) => Some((stay, leave)),
        _ => None,
    }
}

fn is_loop_invariant(ctx: &Context, lp: LoopRef, n: Node) -> bool {
    ctx.graph.opcode(n) == Opcode::Const || !ctx.loops.contains_block(lp, ctx.graph.block_of(n))
}

/// A valid base for the loop bound: a constant, a loop-invariant value, a load whose location
/// no store in the loop can touch, or a call of a pure callee whose arguments are valid bases.
fn is_valid_base(ctx: &Context, store: &TypeStore, lp: LoopRef, n: Node) -> bool {
    let graph = &ctx.graph;
    if is_loop_invariant(ctx, lp, n) {
        return true;
    }
    match graph.data(n) {
        NodeData::Proj(num) => {
            let pred = graph.input(n, 0);
            match graph.data(pred) {
                NodeData::Load(loaded) if *num == pn::load::RES => {
                    let addr = graph.input(pred, 1);
                    is_loop_invariant(ctx, lp, addr)
                        && no_aliasing_stores(ctx, store, lp, addr, *loaded)
                }
                NodeData::Call(_) if *num >= pn::call::RES_BASE => {
                    let callee = graph.input(pred, 1);
                    let pure = match graph.data(callee) {
                        NodeData::Address(ent) => store.entity(*ent).pure,
                        _ => false,
                    };
                    pure
                        && graph.inputs(pred)[2..]
                            .iter()
                            .all(|&arg| is_valid_base(ctx, store, lp, arg))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Do the loop's stores stay clear of the bound's read?
fn no_aliasing_stores(
    ctx: &Context,
    store: &TypeStore,
    lp: LoopRef,
    addr: Node,
    loaded: Mode,
) -> bool {
    let graph = &ctx.graph;
    for &block in ctx.loops.blocks(lp) {
        for n in graph.nodes_in_block(block) {
            if graph.opcode(n) != Opcode::Store {
                continue;
            }
            let store_addr = graph.input(n, 1);
            let store_mode = graph.mode(graph.input(n, 2));
            if crate::analysis::alias::alias_relation(
                graph, store, addr, loaded, store_addr, store_mode,
            ) != crate::analysis::alias::AliasRelation::NoAlias
            {
                return false;
            }
        }
    }
    true
}

/// The statically known iteration count, if start, step, and bound are constants.
fn trip_count(graph: &Graph, shape: &LoopShape) -> Option<u64> {
    let start = as_const(graph, shape.start)?;
    let step = as_const(graph, shape.step)?;
    let bound = as_const(graph, shape.bound)?;

    const LIMIT: u64 = 1 << 20;
    let mut i = start;
    let mut count = 0u64;
    while shape.relation.contains(i.compare(bound)) {
        i = match shape.step_op {
            Opcode::Add => i.add(step),
            Opcode::Sub => i.sub(step),
            Opcode::Mul => i.mul(step),
            _ => unreachable!(),
        };
        count += 1;
        if count > LIMIT {
            return None;
        }
    }
    Some(count)
}

fn as_const(graph: &Graph, n: Node) -> Option<Tarval> {
    match graph.data(n) {
        NodeData::Const(tv) => Some(*tv),
        _ => None,
    }
}

// ----------------------------------------------------------------------------------------
// Region cloning.

/// Clones the nodes of a block region within one graph.
///
/// Each original maps to its clone; nodes outside the region (loop-invariant values, outer
/// control) are shared, and the seed map redirects chosen nodes (header phis, the entry
/// control) without copying them.
struct RegionCopier {
    region: FxHashSet<Node>,
    map: FxHashMap<Node, Node>,
}

impl RegionCopier {
    fn new(region: impl IntoIterator<Item = Node>, seeds: FxHashMap<Node, Node>) -> Self {
        Self {
            region: region.into_iter().collect(),
            map: seeds,
        }
    }

    /// The clone of `n`, or `n` itself when it was not copied.
    fn get(&self, n: Node) -> Node {
        *self.map.get(&n).unwrap_or(&n)
    }

    fn copy(&mut self, graph: &mut Graph, n: Node) -> Node {
        if let Some(&mapped) = self.map.get(&n) {
            return mapped;
        }
        let opcode = graph.opcode(n);
        let in_region = if opcode == Opcode::Block {
            self.region.contains(&n)
        } else {
            self.region.contains(&graph.block_of(n))
        };
        if !in_region {
            return n;
        }
        match opcode {
            Opcode::Block => {
                let new = graph.new_block(&[]);
                self.map.insert(n, new);
                for p in graph.block_preds(n).to_vec() {
                    let copied = self.copy(graph, p);
                    graph.add_input(new, copied);
                }
                new
            }
            Opcode::Phi => {
                let block = self.copy(graph, graph.block_of(n));
                let new =
                    graph.add_raw(NodeData::Plain(Opcode::Phi), graph.mode(n), Some(block), &[]);
                self.map.insert(n, new);
                for i in graph.inputs(n).to_vec() {
                    let copied = self.copy(graph, i);
                    graph.add_input(new, copied);
                }
                new
            }
            _ => {
                let ins: Vec<Node> = graph
                    .inputs(n)
                    .to_vec()
                    .into_iter()
                    .map(|i| self.copy(graph, i))
                    .collect();
                let block = self.copy(graph, graph.block_of(n));
                let data = graph.data(n).clone();
                let mode = graph.mode(n);
                let new = if opcode.is_pinned() {
                    graph.add_raw(data, mode, Some(block), &ins)
                } else {
                    graph.new_node(data, mode, Some(block), &ins)
                };
                self.map.insert(n, new);
                new
            }
        }
    }
}

// ----------------------------------------------------------------------------------------
// Fixed-factor unrolling.

/// Clone the loop body `factor` times. With `dissolve` (factor equals the full count), the
/// clones run straight-line and the header's branch is deleted; otherwise the last clone's
/// back edge returns to the header and the bound is rewritten for the wider stride.
fn fixed_factor_unroll(ctx: &mut Context, shape: &LoopShape, factor: u32, dissolve: bool) {
    log::debug!(
        "unroll: fixed factor {} (dissolve: {}) at header {}",
        factor,
        dissolve,
        shape.header
    );
    if dissolve {
        dissolve_loop(ctx, shape, u64::from(factor));
    } else {
        clone_body_chain(&mut ctx.graph, shape, factor - 1);
        adjust_bound(&mut ctx.graph, shape, factor);
        finish(ctx);
    }
}

/// Replace the whole loop by `count` straight-line copies of its body.
fn dissolve_loop(ctx: &mut Context, shape: &LoopShape, count: u64) {
    let graph = &mut ctx.graph;

    // Values carried into the next iteration, starting with the entry values.
    let mut carried: FxHashMap<Node, Node> = shape
        .phis
        .iter()
        .map(|&phi| (phi, graph.input(phi, shape.entry_pos)))
        .collect();
    let mut prev_ctrl = graph.input(shape.header, shape.entry_pos);
    let back_ctrl = graph.input(shape.header, shape.back_pos);

    for _ in 0..count {
        let mut seeds: FxHashMap<Node, Node> = carried.clone();
        seeds.insert(shape.stay_proj, prev_ctrl);
        let mut copier = RegionCopier::new(shape.body_blocks.iter().copied(), seeds);

        // Clone starting from the back-edge control; everything live in the body hangs off it
        // or off the carried values.
        prev_ctrl = copier.copy(graph, back_ctrl);
        let next: Vec<(Node, Node)> = shape
            .phis
            .iter()
            .map(|&phi| {
                let back = graph.input(phi, shape.back_pos);
                (phi, copier.copy(graph, back))
            })
            .collect();
        carried.extend(next);
    }

    // The exit edge now comes straight from the last copy; header, branch, and original body
    // become unreachable.
    let exit_pos = graph
        .block_preds(shape.exit_block)
        .iter()
        .position(|&p| p == shape.leave_proj)
        .expect("exit block lost its loop edge");
    graph.set_input(shape.exit_block, exit_pos, prev_ctrl);

    // Exit phis see the final carried values.
    let exit_phis: Vec<Node> = graph
        .nodes_in_block(shape.exit_block)
        .filter(|&n| graph.opcode(n) == Opcode::Phi)
        .collect();
    for phi in exit_phis {
        let old = graph.input(phi, exit_pos);
        if let Some(&new) = carried.get(&old) {
            graph.set_input(phi, exit_pos, new);
        }
    }

    // Disconnect the dissolved loop: the entry control feeds the first copy now, and the
    // header must not keep a second claim on it.
    graph.set_inputs(shape.header, &[]);

    remove_loop_keepalives(graph, &shape.blocks);
    finish(ctx);
    ctx.dead_node_elimination();
}

/// Chain `copies` clones of the body inside the loop: the header's back edge comes from the
/// last clone and the phis carry the last clone's values.
fn clone_body_chain(graph: &mut Graph, shape: &LoopShape, copies: u32) {
    let mut carried: FxHashMap<Node, Node> = shape
        .phis
        .iter()
        .map(|&phi| (phi, graph.input(phi, shape.back_pos)))
        .collect();
    let back_ctrl = graph.input(shape.header, shape.back_pos);
    let mut prev_ctrl = back_ctrl;

    for _ in 0..copies {
        let mut seeds: FxHashMap<Node, Node> = carried.clone();
        seeds.insert(shape.stay_proj, prev_ctrl);
        let mut copier = RegionCopier::new(shape.body_blocks.iter().copied(), seeds);
        prev_ctrl = copier.copy(graph, back_ctrl);
        let next: Vec<(Node, Node)> = shape
            .phis
            .iter()
            .map(|&phi| {
                let back = graph.input(phi, shape.back_pos);
                (phi, copier.copy(graph, back))
            })
            .collect();
        carried.extend(next);
    }

    // Wire the last clone back into the header.
    graph.set_input(shape.header, shape.back_pos, prev_ctrl);
    for &phi in &shape.phis {
        let last = carried[&phi];
        graph.set_input(phi, shape.back_pos, last);
    }
}

/// Rewrite the header compare's bound for the `factor`-sized iteration space:
/// `N -+ c*(factor-1)` for add/sub, `N / c^(factor-1)` for multiply.
fn adjust_bound(graph: &mut Graph, shape: &LoopShape, factor: u32) {
    let block = graph.block_of(shape.bound);
    let mode = graph.mode(shape.bound);
    let f1 = graph.new_const(Tarval::new(mode, i64::from(factor) - 1));
    let new_bound = match shape.step_op {
        Opcode::Add => {
            let delta = graph.new_mul(block, shape.step, f1);
            graph.new_sub(block, shape.bound, delta)
        }
        Opcode::Sub => {
            let delta = graph.new_mul(block, shape.step, f1);
            graph.new_add(block, shape.bound, delta)
        }
        Opcode::Mul => {
            let mut divisor = graph.new_const(Tarval::one(mode));
            for _ in 1..factor {
                divisor = graph.new_mul(block, divisor, shape.step);
            }
            graph.new_binop(Opcode::Div, block, shape.bound, divisor)
        }
        _ => unreachable!(),
    };
    graph.set_input(shape.cmp, shape.bound_pos, new_bound);
}

/// Remove keep-alive edges rooted in the dissolved loop.
fn remove_loop_keepalives(graph: &mut Graph, loop_blocks: &[Node]) {
    let end = graph.end();
    let keeps: Vec<Node> = graph
        .inputs(end)
        .iter()
        .copied()
        .filter(|&k| {
            !loop_blocks.contains(&k)
                && !loop_blocks.contains(&graph.block_of(k))
        })
        .collect();
    graph.set_inputs(end, &keeps);
}

/// Invalidate what unrolling destroyed and re-establish loop-closed SSA.
fn finish(ctx: &mut Context) {
    ctx.invalidate(
        Properties::DOMINANCE
            | Properties::POSTDOMINANCE
            | Properties::LOOP_TREE
            | Properties::LIVENESS
            | Properties::LOOP_CLOSED_SSA,
    );
    ctx.assure(Properties::LOOP_CLOSED_SSA);
}

// ----------------------------------------------------------------------------------------
// Duff's-device unrolling.

/// Unroll with a fix-up for the residue iterations.
fn duff_unroll(ctx: &mut Context, shape: &LoopShape, factor: u32) {
    // The switch fix-up needs an integer induction space with a known-positive additive or
    // subtractive stride, and peels single-block bodies; the loop fix-up covers everything
    // else.
    let positive_step = as_const(&ctx.graph, shape.step).is_some_and(|c| {
        !c.is_negative() && !c.is_zero()
    });
    let use_switch = shape.step_op != Opcode::Mul
        && ctx.graph.mode(shape.iv).is_int()
        && positive_step
        && shape.body_blocks.len() == 1;
    log::debug!(
        "unroll: duff factor {} at header {} ({} fix-up)",
        factor,
        shape.header,
        if use_switch { "switch" } else { "loop" }
    );

    if use_switch {
        build_switch_fixup(&mut ctx.graph, shape, factor);
    } else {
        build_loop_fixup(&mut ctx.graph, shape, factor);
    }
    clone_body_chain(&mut ctx.graph, shape, factor - 1);
    adjust_bound(&mut ctx.graph, shape, factor);
    finish(ctx);
}

/// Always-available fix-up: a literal duplicate of the original loop, entered first, that runs
/// the residue iterations and then hands its values to the unrolled loop.
fn build_loop_fixup(graph: &mut Graph, shape: &LoopShape, factor: u32) {
    let entry_ctrl = graph.input(shape.header, shape.entry_pos);
    let entry_block = graph.block_of(entry_ctrl);
    let mode = graph.mode(shape.iv);

    // The fix-up loop runs until the induction variable is aligned for the unrolled stride:
    // its bound is `i0 + (N - i0) mod (factor * c)` (mirrored for subtractive strides).
    let f = graph.new_const(Tarval::new(mode, i64::from(factor)));
    let m = graph.new_mul(entry_block, shape.step, f);
    let (distance, rebase): (Node, fn(&mut Graph, Node, Node, Node) -> Node) =
        match shape.step_op {
            Opcode::Sub => (
                graph.new_sub(entry_block, shape.start, shape.bound),
                |g, b, s, r| g.new_sub(b, s, r),
            ),
            _ => (
                graph.new_sub(entry_block, shape.bound, shape.start),
                |g, b, s, r| g.new_add(b, s, r),
            ),
        };
    let rem = graph.new_binop(Opcode::Mod, entry_block, distance, m);
    let fixup_bound = rebase(graph, entry_block, shape.start, rem);

    // Duplicate the whole loop. The entry control is shared for the moment; the original
    // header is rewired onto the duplicate's exit right after.
    let mut copier = RegionCopier::new(shape.blocks.iter().copied(), FxHashMap::default());
    for &block in shape.blocks.iter() {
        copier.copy(graph, block);
    }
    // Carried values must exist in the duplicate even when nothing on the control side
    // references them.
    for &phi in &shape.phis {
        copier.copy(graph, phi);
    }
    let fixup_leave = copier.copy(graph, shape.leave_proj);
    let fixup_cmp = copier.get(shape.cmp);
    graph.set_input(fixup_cmp, shape.bound_pos, fixup_bound);

    // The unrolled loop is entered from the fix-up loop's exit, with its final values.
    graph.set_input(shape.header, shape.entry_pos, fixup_leave);
    for &phi in &shape.phis {
        let fixup_phi = copier.get(phi);
        graph.set_input(phi, shape.entry_pos, fixup_phi);
    }
}

/// Integer fix-up without a loop: peel `factor - 1` copies of the body and select the landing
/// pad with a chain of compares, so the residue runs in straight-line code.
///
/// The residue is `(|N - i0| + (c - 1)) mod (factor * c)`: at most `factor - 1` whole steps.
/// Pad `k` (counting the pads actually executed) is selected by the first test that holds in
///
/// ```text
/// entry -> T0 --rem == 0--> merge
///           \-> T1 --rem <= c--------> run 1 pad
///                \-> T2 --rem <= 2c--> run 2 pads
///                     \--------------> run factor-1 pads
/// ```
///
/// where "run j pads" enters the peeled chain at its j-th position from the end. Every pad
/// merges the dispatched entry values with the fallthrough values of its predecessor pad; the
/// merge block hands the final values to the unrolled loop's header.
fn build_switch_fixup(graph: &mut Graph, shape: &LoopShape, factor: u32) {
    let entry_ctrl = graph.input(shape.header, shape.entry_pos);
    let entry_block = graph.block_of(entry_ctrl);
    let mode = graph.mode(shape.iv);
    let n_pads = (factor - 1) as usize;

    // Residue, rounded up to whole steps: (|N - i0| + (c - 1)) mod (factor * c).
    let f = graph.new_const(Tarval::new(mode, i64::from(factor)));
    let m = graph.new_mul(entry_block, shape.step, f);
    let raw_distance = match shape.step_op {
        Opcode::Sub => graph.new_sub(entry_block, shape.start, shape.bound),
        _ => graph.new_sub(entry_block, shape.bound, shape.start),
    };
    let zero = graph.new_const(Tarval::zero(mode));
    let negated = graph.new_minus(entry_block, raw_distance);
    let is_neg = graph.new_cmp(entry_block, raw_distance, zero, Relation::LESS);
    let distance = graph.new_mux(entry_block, is_neg, raw_distance, negated);
    let one = graph.new_const(Tarval::one(mode));
    let cm1 = graph.new_sub(entry_block, shape.step, one);
    let rounded = graph.new_add(entry_block, distance, cm1);
    let rem = graph.new_binop(Opcode::Mod, entry_block, rounded, m);

    let start_vals: FxHashMap<Node, Node> = shape
        .phis
        .iter()
        .map(|&phi| (phi, graph.input(phi, shape.entry_pos)))
        .collect();

    // Dispatch chain: test block k decides "run exactly k pads". Its hit edge targets the
    // (n_pads - k)-th pad of the chain, except k = 0, which hits the merge directly. The final
    // miss edge runs all pads.
    let mut pad_entry_edges: Vec<Vec<Node>> = vec![Vec::new(); n_pads];
    let mut merge_edges: Vec<Node> = Vec::new();
    let mut merge_edge_vals: Vec<FxHashMap<Node, Node>> = Vec::new();

    let mut test_pred = entry_ctrl;
    for k in 0..factor {
        if k as usize == n_pads {
            // No test left: run every pad.
            pad_entry_edges[0].push(test_pred);
            break;
        }
        let test_block = graph.new_block(&[test_pred]);
        let threshold = if k == 0 {
            zero
        } else {
            let kc = graph.new_const(Tarval::new(mode, i64::from(k)));
            graph.new_mul(test_block, shape.step, kc)
        };
        let relation = if k == 0 {
            Relation::EQUAL
        } else {
            Relation::LESS_EQUAL
        };
        let test = graph.new_cmp(test_block, rem, threshold, relation);
        let cond = graph.new_cond(test_block, test);
        let hit = graph.new_proj(cond, pn::cond::TRUE, Mode::X);
        let miss = graph.new_proj(cond, pn::cond::FALSE, Mode::X);
        if k == 0 {
            merge_edges.push(hit);
            merge_edge_vals.push(start_vals.clone());
        } else {
            pad_entry_edges[n_pads - k as usize].push(hit);
        }
        test_pred = miss;
    }

    // Build the pads front to back. Each pad's entry values are phis over its dispatch edges
    // and the fallthrough from the previous pad.
    let body = shape.body_blocks[0];
    let back_ctrl = graph.input(shape.header, shape.back_pos);
    let mut fall_ctrl: Option<Node> = None;
    let mut fall_vals: FxHashMap<Node, Node> = FxHashMap::default();
    for pad_edges in pad_entry_edges.into_iter() {
        let mut preds: Vec<Node> = Vec::new();
        if let Some(ctrl) = fall_ctrl {
            preds.push(ctrl);
        }
        preds.extend(pad_edges.iter().copied());
        debug_assert!(!preds.is_empty());

        let pad_head = graph.new_block(&preds);
        let entry_jmp = graph.new_jmp(pad_head);

        // Entry value per carried phi: merge fallthrough and dispatch values.
        let mut entry_vals: FxHashMap<Node, Node> = FxHashMap::default();
        for &phi in &shape.phis {
            let phi_mode = graph.mode(phi);
            let mut ins: Vec<Node> = Vec::new();
            if fall_ctrl.is_some() {
                ins.push(fall_vals[&phi]);
            }
            for _ in 0..preds.len() - ins.len() {
                ins.push(start_vals[&phi]);
            }
            let value = if ins.iter().all(|&v| v == ins[0]) {
                ins[0]
            } else {
                graph.add_raw(NodeData::Plain(Opcode::Phi), phi_mode, Some(pad_head), &ins)
            };
            entry_vals.insert(phi, value);
        }

        // The peeled body copy hangs off the pad head.
        let mut seeds = entry_vals.clone();
        seeds.insert(shape.stay_proj, entry_jmp);
        let mut copier = RegionCopier::new([body], seeds);
        fall_ctrl = Some(copier.copy(graph, back_ctrl));
        let mut out_vals: FxHashMap<Node, Node> = FxHashMap::default();
        for &phi in &shape.phis {
            let back = graph.input(phi, shape.back_pos);
            let value = copier.copy(graph, back);
            out_vals.insert(phi, value);
        }
        fall_vals = out_vals;
    }

    // The merge block joins "no pads" with "ran the chain" and feeds the unrolled loop.
    merge_edges.push(fall_ctrl.expect("switch fix-up without pads"));
    merge_edge_vals.push(fall_vals);
    let merge = graph.new_block(&merge_edges);
    let merge_jmp = graph.new_jmp(merge);
    graph.set_input(shape.header, shape.entry_pos, merge_jmp);
    for &phi in &shape.phis {
        let phi_mode = graph.mode(phi);
        let ins: Vec<Node> = merge_edge_vals.iter().map(|vals| vals[&phi]).collect();
        let value = if ins.iter().all(|&v| v == ins[0]) {
            ins[0]
        } else {
            graph.add_raw(NodeData::Plain(Opcode::Phi), phi_mode, Some(merge), &ins)
        };
        graph.set_input(phi, shape.entry_pos, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Ident;

    struct TestLoop {
        ctx: Context,
        store: TypeStore,
        header: Node,
    }

    /// `for (int i = 0; i < limit; i += step) s += a[i]; return s;`
    ///
    /// `s` starts from the first argument; `limit` is either a constant or the second
    /// argument; `a` is a global array.
    fn sum_loop(const_limit: Option<i64>, step: i64) -> TestLoop {
        let mut store = TypeStore::new();
        let i32t = store.new_primitive(Mode::IS32);
        let arr = store.new_array(i32t, 64);
        let arr_ent = store.new_entity(Ident::intern("a"), arr);
        let func_ty = store.new_method(vec![i32t], vec![i32t]);
        let func = store.new_entity(Ident::intern("sum"), func_ty);
        let frame = store.new_frame_type();

        let mut g = Graph::new(func, frame);
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);

        let s_init = g.new_proj(g.start(), pn::start::ARGS_BASE, Mode::IS32);
        let limit = match const_limit {
            Some(v) => g.new_const(Tarval::new(Mode::IS32, v)),
            None => g.new_proj(g.start(), pn::start::ARGS_BASE + 1, Mode::IS32),
        };

        let header = g.new_block(&[start_jmp]);
        let zero = g.new_const(Tarval::zero(Mode::IS32));
        let i_phi = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(header), &[zero]);
        let s_phi = g.add_raw(
            NodeData::Plain(Opcode::Phi),
            Mode::IS32,
            Some(header),
            &[s_init],
        );
        let cmp = g.new_cmp(header, i_phi, limit, Relation::LESS);
        let cond = g.new_cond(header, cmp);
        let stay = g.new_proj(cond, pn::cond::TRUE, Mode::X);
        let leave = g.new_proj(cond, pn::cond::FALSE, Mode::X);

        let body = g.new_block(&[stay]);
        let base = g.new_address(arr_ent);
        let addr = g.new_sel(body, base, i_phi, i32t);
        let load = g.add_raw(NodeData::Load(Mode::IS32), Mode::T, Some(body), &[mem, addr]);
        let value = g.new_proj(load, pn::load::RES, Mode::IS32);
        let s_next = g.new_add(body, s_phi, value);
        let step_c = g.new_const(Tarval::new(Mode::IS32, step));
        let i_next = g.new_add(body, i_phi, step_c);
        let back = g.new_jmp(body);
        g.add_input(header, back);
        g.add_input(i_phi, i_next);
        g.add_input(s_phi, s_next);

        let exit = g.new_block(&[leave]);
        let ret = g.new_return(exit, mem, &[s_phi]);
        g.add_input(g.end_block(), ret);

        let _ = ret;
        let ctx = Context::for_graph(g);
        TestLoop { ctx, store, header }
    }

    fn count_opcode(graph: &Graph, opcode: Opcode) -> usize {
        graph.nodes().filter(|&n| graph.opcode(n) == opcode).count()
    }

    #[test]
    fn fully_unrolls_constant_loop() {
        let mut t = sum_loop(Some(4), 1);
        t.ctx.assure(Properties::LOOP_TREE);
        let lp = t.ctx.loops.loops().next().unwrap();
        assert_eq!(t.ctx.loops.header(lp), t.header);

        assert!(unroll_loop(&mut t.ctx, &t.store, lp, 4));

        // Straight-line: no loop remains, and the body was replicated four times.
        t.ctx.assure(Properties::LOOP_TREE);
        assert_eq!(t.ctx.loops.num_loops(), 0);
        assert_eq!(count_opcode(&t.ctx.graph, Opcode::Load), 4);
        assert_eq!(count_opcode(&t.ctx.graph, Opcode::Add), 4);
        assert!(t.ctx.verify().is_ok());
    }

    #[test]
    fn explicit_factor_must_divide_the_count() {
        let mut t = sum_loop(Some(5), 1);
        t.ctx.assure(Properties::LOOP_TREE);
        let lp = t.ctx.loops.loops().next().unwrap();
        assert!(!unroll_loop(&mut t.ctx, &t.store, lp, 4));
    }

    #[test]
    fn duff_unrolls_symbolic_bound() {
        let mut t = sum_loop(None, 3);
        // The driver's static path is disabled, so this exercises the Duff strategy.
        unroll_loops(&mut t.ctx, &t.store, 4);

        // Still one loop, now with a four-wide body: the induction chain steps four times
        // before reaching the phi again.
        t.ctx.assure(Properties::LOOP_TREE);
        assert_eq!(t.ctx.loops.num_loops(), 1);
        let lp = t.ctx.loops.loops().next().unwrap();
        let graph = &t.ctx.graph;
        let header = t.ctx.loops.header(lp);

        let iv = graph
            .nodes_in_block(header)
            .find(|&n| {
                graph.opcode(n) == Opcode::Phi
                    && graph.inputs(n).iter().any(|&i| graph.opcode(i) == Opcode::Add)
            })
            .expect("induction phi survived");
        let back = graph
            .inputs(iv)
            .iter()
            .copied()
            .find(|&i| graph.opcode(i) == Opcode::Add)
            .unwrap();
        let mut chain = back;
        let mut steps = 0;
        while graph.opcode(chain) == Opcode::Add && chain != iv {
            chain = graph.input(chain, 0);
            steps += 1;
        }
        assert_eq!(chain, iv);
        assert_eq!(steps, 4);

        // The header compare's bound became `N - step * (factor - 1)`.
        let cmp = graph
            .nodes_in_block(header)
            .find(|&n| graph.opcode(n) == Opcode::Cmp)
            .unwrap();
        let bound = graph.input(cmp, 1);
        assert_eq!(graph.opcode(bound), Opcode::Sub);
        match graph.data(graph.input(bound, 1)) {
            NodeData::Const(tv) => assert_eq!(tv.as_i64(), 9),
            other => panic!("bound adjustment not folded: {:?}", other),
        }

        // A fix-up was built in front of the loop: the switch form dispatches through a chain
        // of compares, one Cond per possible landing pad plus the loop's own.
        assert_eq!(count_opcode(graph, Opcode::Cond), 4);

        // Loop-closed SSA was re-established.
        assert!(t
            .ctx
            .graph
            .properties()
            .contains(Properties::LOOP_CLOSED_SSA));
    }

    #[test]
    fn declines_inequality_relations() {
        let mut t = sum_loop(None, 1);
        // Rewrite the loop compare into `!=`, which the recognizer must reject.
        let cmp = t
            .ctx
            .graph
            .nodes()
            .find(|&n| t.ctx.graph.opcode(n) == Opcode::Cmp)
            .unwrap();
        *t.ctx.graph.data_mut(cmp) = NodeData::Cmp(Relation::LESS_GREATER);

        t.ctx.assure(
            Properties::NO_BADS
                | Properties::OUT_EDGES
                | Properties::DOMINANCE
                | Properties::LOOP_TREE
                | Properties::LOOP_CLOSED_SSA,
        );
        let before = t.ctx.graph.node_count();
        unroll_loops(&mut t.ctx, &t.store, 4);
        assert_eq!(t.ctx.graph.node_count(), before);
    }
}
