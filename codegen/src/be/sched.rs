//! Instruction scheduling.
//!
//! Lists each block's nodes in a legal order: data dependencies respected, phis first, at most
//! one control-flow operation and only at the tail, Keep nodes immediately after their anchor.
//! Projections are not scheduled; they name results of the node they project from and share
//! its timestamp.

use crate::fx::FxHashMap;
use crate::ir::{Graph, Node, Opcode};
use crate::timing;
use seagraph_entity::SecondaryMap;

/// A schedule: per-block node order plus per-node timestamps.
pub struct Schedule {
    order: SecondaryMap<Node, Vec<Node>>,
    /// Timestamp within the block, starting at 1. Zero means unscheduled.
    pos: SecondaryMap<Node, u32>,
    valid: bool,
}

impl Schedule {
    /// Allocate an empty schedule.
    pub fn new() -> Self {
        Self {
            order: SecondaryMap::new(),
            pos: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Compute a schedule for every block of `graph`.
    pub fn compute(graph: &Graph) -> Self {
        let _tt = timing::schedule();
        let mut schedule = Self::new();
        for block in graph.blocks() {
            let order = schedule_block(graph, block);
            schedule.order[block] = order;
        }
        schedule.renumber(graph);
        schedule.valid = true;
        schedule
    }

    /// Has this schedule been computed?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The scheduled nodes of `block`, in order.
    pub fn nodes(&self, block: Node) -> &[Node] {
        self.order
            .get(block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The timestamp of `n` within its block. Projections share the timestamp of the node they
    /// project from.
    pub fn pos(&self, graph: &Graph, n: Node) -> u32 {
        let mut n = n;
        while graph.opcode(n) == Opcode::Proj {
            n = graph.input(n, 0);
        }
        self.pos[n]
    }

    /// Is `n` scheduled?
    pub fn is_scheduled(&self, graph: &Graph, n: Node) -> bool {
        self.pos(graph, n) != 0
    }

    /// Insert `n` into `block` directly before the node at `before`'s position.
    pub fn insert_before(&mut self, graph: &Graph, block: Node, n: Node, before: Node) {
        let list = &mut self.order[block];
        let idx = list
            .iter()
            .position(|&x| x == before)
            .expect("insertion point is not scheduled here");
        list.insert(idx, n);
        self.renumber_block(graph, block);
    }

    /// Insert `n` into `block` directly after the node at `after`'s position.
    pub fn insert_after(&mut self, graph: &Graph, block: Node, n: Node, after: Node) {
        let list = &mut self.order[block];
        let idx = list
            .iter()
            .position(|&x| x == after)
            .expect("insertion point is not scheduled here");
        list.insert(idx + 1, n);
        self.renumber_block(graph, block);
    }

    /// Append `n` to the end of `block`'s schedule, before a trailing control-flow op if the
    /// block has one.
    pub fn append(&mut self, graph: &Graph, block: Node, n: Node) {
        let list = &mut self.order[block];
        match list.last().copied() {
            Some(last) if is_cf_op(graph, last) => {
                let idx = list.len() - 1;
                list.insert(idx, n);
            }
            _ => list.push(n),
        }
        self.renumber_block(graph, block);
    }

    /// Replace scheduled node `old` in `block` by the sequence `new`.
    pub fn replace(&mut self, graph: &Graph, block: Node, old: Node, new: &[Node]) {
        let list = &mut self.order[block];
        let idx = list
            .iter()
            .position(|&x| x == old)
            .expect("replaced node is not scheduled here");
        list.splice(idx..=idx, new.iter().copied());
        self.renumber_block(graph, block);
    }

    fn renumber(&mut self, graph: &Graph) {
        for block in graph.blocks() {
            self.renumber_block(graph, block);
        }
    }

    fn renumber_block(&mut self, _graph: &Graph, block: Node) {
        let list = self.order[block].clone();
        for (i, &n) in list.iter().enumerate() {
            self.pos[n] = i as u32 + 1;
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Is `n` the kind of node that terminates a block's schedule?
fn is_cf_op(graph: &Graph, n: Node) -> bool {
    matches!(
        graph.opcode(n),
        Opcode::Jmp | Opcode::Cond | Opcode::Return
    ) || (graph.mode(n) == crate::ir::Mode::X && graph.opcode(n) != Opcode::Proj)
}

fn schedule_block(graph: &Graph, block: Node) -> Vec<Node> {
    let mut phis: Vec<Node> = Vec::new();
    let mut keeps: Vec<Node> = Vec::new();
    let mut cf: Option<Node> = None;
    let mut plain: Vec<Node> = Vec::new();

    for n in graph.nodes_in_block(block) {
        match graph.opcode(n) {
            Opcode::Bad | Opcode::Proj => {}
            Opcode::Phi => phis.push(n),
            Opcode::Keep => keeps.push(n),
            _ if is_cf_op(graph, n) => {
                debug_assert!(cf.is_none(), "two control-flow ops in one block");
                cf = Some(n);
            }
            _ => plain.push(n),
        }
    }

    // Dependency counts among the plain nodes of this block. Phis don't count: they read
    // their operands at block entry, which is what breaks the cycles of the loop.
    let resolve = |mut n: Node| {
        while graph.opcode(n) == Opcode::Proj {
            n = graph.input(n, 0);
        }
        n
    };
    let in_block: FxHashMap<Node, usize> = plain.iter().map(|&n| (n, 0)).collect();
    let mut deps: FxHashMap<Node, usize> = in_block;
    let mut dependents: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
    for &n in &plain {
        for &input in graph.inputs(n) {
            let src = resolve(input);
            if src != n && deps.contains_key(&src) {
                *deps.get_mut(&n).unwrap() += 1;
                dependents.entry(src).or_default().push(n);
            }
        }
    }

    let mut order: Vec<Node> = phis;
    order.sort();

    // Kahn's algorithm with node order as the tie breaker, so schedules are deterministic.
    // The ready list is kept sorted descending; popping takes the lowest-numbered node.
    let mut ready: Vec<Node> = deps
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&n, _)| n)
        .collect();
    ready.sort_by(|a, b| b.cmp(a));
    while let Some(n) = ready.pop() {
        order.push(n);
        if let Some(users) = dependents.get(&n) {
            for &u in users {
                let count = deps.get_mut(&u).unwrap();
                *count -= 1;
                if *count == 0 {
                    ready.push(u);
                }
            }
            ready.sort_by(|a, b| b.cmp(a));
        }
    }
    debug_assert!(
        deps.values().all(|&c| c == 0),
        "dependency cycle among scheduled nodes"
    );

    // Keeps go immediately after their anchor: the latest-scheduled input.
    keeps.sort();
    for keep in keeps {
        let anchor = graph
            .inputs(keep)
            .iter()
            .map(|&i| resolve(i))
            .filter_map(|i| order.iter().position(|&x| x == i))
            .max();
        match anchor {
            Some(idx) => order.insert(idx + 1, keep),
            None => order.push(keep),
        }
    }

    // Exactly one control-flow op, at the tail.
    if let Some(cf) = cf {
        order.push(cf);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Mode, NodeData, Tarval, TypeRef};

    #[test]
    fn respects_dependencies_and_shape() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);

        let phi = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let one = g.new_const(Tarval::new(Mode::IS32, 1));
        let sum = g.new_add(block, phi, one);
        let double = g.new_add(block, sum, sum);
        let ret = g.new_return(block, mem, &[double]);
        g.add_input(g.end_block(), ret);

        let schedule = Schedule::compute(&g);
        let order = schedule.nodes(block);

        // Phi first, return last, adds in dependency order.
        assert_eq!(order[0], phi);
        assert_eq!(*order.last().unwrap(), ret);
        assert!(schedule.pos(&g, sum) < schedule.pos(&g, double));
        assert!(schedule.pos(&g, double) < schedule.pos(&g, ret));
    }

    #[test]
    fn keep_follows_anchor() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);

        let phi = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let one = g.new_const(Tarval::new(Mode::IS32, 1));
        let sum = g.new_add(block, phi, one);
        let keep = g.new_keep(block, &[sum]);
        let ret = g.new_return(block, mem, &[phi]);
        g.add_input(g.end_block(), ret);

        let schedule = Schedule::compute(&g);
        assert_eq!(schedule.pos(&g, keep), schedule.pos(&g, sum) + 1);
    }

    #[test]
    fn proj_shares_producer_timestamp() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let addr = g.new_address(Entity::from_u32(1));
        let load = g.add_raw(NodeData::Load(Mode::IS32), Mode::T, Some(block), &[mem, addr]);
        let value = g.new_proj(load, pn::load::RES, Mode::IS32);
        let ret = g.new_return(block, mem, &[value]);
        g.add_input(g.end_block(), ret);

        let schedule = Schedule::compute(&g);
        assert_eq!(schedule.pos(&g, value), schedule.pos(&g, load));
        assert!(schedule.pos(&g, load) < schedule.pos(&g, ret));
    }
}
