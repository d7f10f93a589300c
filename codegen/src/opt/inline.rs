//! Procedure inlining.
//!
//! This is "inlining as a library": the pass walks the graph's calls and asks a caller-supplied
//! hook whether to inline each one. The hook owns the heuristics and knows how to find the
//! callee's graph; this module owns the mechanics of splicing one graph into another.
//!
//! Splicing maps the callee's Start projections onto the call's memory input and arguments,
//! turns its Returns into jumps to a fresh join block, merges the returned values and memory
//! with phis, and reroutes the call's result projections to those phis. The inlined body's
//! control hangs between the call's block and the join block; pinned nodes of the call's block
//! that depended on the call move into the join block.

use crate::fx::FxHashMap;
use crate::ir::{pn, Entity, Graph, Mode, Node, NodeData, Opcode};
use crate::timing;

/// A command directing whether or not to inline a particular call.
pub enum InlineCommand<'a> {
    /// Keep the call as-is, out-of-line.
    KeepCall,
    /// Inline the call, using this graph as the body of the callee.
    ///
    /// It is the hook's responsibility that this graph actually implements the callee.
    Inline(&'a Graph),
}

/// A hook directing which calls to inline.
pub trait Inline {
    /// Invoked for each call whose callee is a known entity. The returned command decides
    /// whether the call is replaced by the callee's body.
    fn inline(&mut self, caller: &Graph, call: Node, callee: Entity, args: &[Node])
        -> InlineCommand<'_>;
}

impl<'a, T> Inline for &'a mut T
where
    T: Inline,
{
    fn inline(
        &mut self,
        caller: &Graph,
        call: Node,
        callee: Entity,
        args: &[Node],
    ) -> InlineCommand<'_> {
        (*self).inline(caller, call, callee, args)
    }
}

/// Walk the calls of `graph`, invoke the hook for each one, and inline where directed.
///
/// Returns whether any call was inlined. Requires and maintains out edges; dominance, loop and
/// liveness information is invalidated when a call was inlined.
pub fn do_inlining(graph: &mut Graph, mut inliner: impl Inline) -> bool {
    let _tt = timing::inlining();
    graph.assure_edges();

    let mut inlined_any = false;
    let mut considered: crate::fx::FxHashSet<Node> = Default::default();
    // New calls can appear while splicing (the callee contained calls); they are considered in
    // later iterations, enabling multi-level inlining if the hook keeps saying yes.
    loop {
        let call = graph
            .nodes()
            .find(|&n| graph.opcode(n) == Opcode::Call && !considered.contains(&n));
        let call = match call {
            Some(c) => c,
            None => break,
        };
        considered.insert(call);

        let callee = match graph.data(graph.input(call, 1)) {
            NodeData::Address(ent) => *ent,
            _ => continue,
        };
        let args: Vec<Node> = graph.inputs(call)[2..].to_vec();
        match inliner.inline(graph, call, callee, &args) {
            InlineCommand::KeepCall => {
                log::trace!("inline: keeping {}", call);
            }
            InlineCommand::Inline(callee_graph) => {
                if inline_one(graph, call, &args, callee_graph) {
                    inlined_any = true;
                }
            }
        }
    }

    if inlined_any {
        graph.invalidate(
            crate::ir::Properties::DOMINANCE
                .union(crate::ir::Properties::POSTDOMINANCE)
                .union(crate::ir::Properties::LOOP_TREE)
                .union(crate::ir::Properties::LIVENESS)
                .union(crate::ir::Properties::LOOP_CLOSED_SSA),
        );
    }
    inlined_any
}

/// Copy state for one splice: maps callee nodes to caller nodes.
struct Splice<'a> {
    callee: &'a Graph,
    map: FxHashMap<Node, Node>,
}

impl<'a> Splice<'a> {
    /// Copy `n` (a callee node) into `caller`, recursively copying its inputs. Cycles go
    /// through blocks and phis, which are created empty and filled afterwards.
    fn copy(&mut self, caller: &mut Graph, n: Node) -> Node {
        if let Some(&mapped) = self.map.get(&n) {
            return mapped;
        }
        let opcode = self.callee.opcode(n);
        match opcode {
            Opcode::Block => {
                let new = caller.new_block(&[]);
                self.map.insert(n, new);
                let preds: Vec<Node> = self.callee.block_preds(n).to_vec();
                for p in preds {
                    let copied = self.copy(caller, p);
                    caller.add_input(new, copied);
                }
                new
            }
            Opcode::Phi => {
                let block = self.copy(caller, self.callee.block_of(n));
                let new = caller.add_raw(
                    self.callee.data(n).clone(),
                    self.callee.mode(n),
                    Some(block),
                    &[],
                );
                self.map.insert(n, new);
                let ins: Vec<Node> = self.callee.inputs(n).to_vec();
                for i in ins {
                    let copied = self.copy(caller, i);
                    caller.add_input(new, copied);
                }
                new
            }
            _ => {
                let ins: Vec<Node> = self
                    .callee
                    .inputs(n)
                    .to_vec()
                    .into_iter()
                    .map(|i| self.copy(caller, i))
                    .collect();
                let block = self.copy(caller, self.callee.block_of(n));
                let new = if opcode.is_pinned() {
                    caller.add_raw(
                        self.callee.data(n).clone(),
                        self.callee.mode(n),
                        Some(block),
                        &ins,
                    )
                } else {
                    // Floating nodes go through the local optimizer so callee computations fold
                    // against caller constants.
                    caller.new_node(
                        self.callee.data(n).clone(),
                        self.callee.mode(n),
                        Some(block),
                        &ins,
                    )
                };
                self.map.insert(n, new);
                new
            }
        }
    }
}

/// Splice `callee_graph` into `graph` at `call`. Returns false when the call shape is not
/// supported (the callee uses its frame, or never returns).
fn inline_one(graph: &mut Graph, call: Node, args: &[Node], callee: &Graph) -> bool {
    // The callee's frame would have to be merged into the caller's; decline such callees.
    let frame_used = graph_frame_proj_used(callee);
    if frame_used {
        log::debug!("inline: declining {}, callee uses its frame", call);
        return false;
    }
    let returns: Vec<Node> = callee
        .block_preds(callee.end_block())
        .iter()
        .copied()
        .filter(|&r| callee.opcode(r) == Opcode::Return)
        .collect();
    if returns.is_empty() {
        log::debug!("inline: declining {}, callee never returns", call);
        return false;
    }

    log::trace!("inline: splicing callee into {}", call);
    let call_block = graph.block_of(call);
    let call_mem = graph.input(call, 0);

    let mut splice = Splice {
        callee,
        map: FxHashMap::default(),
    };

    // Seed the map: the callee's entry context is the call site.
    splice.map.insert(callee.start_block(), call_block);
    splice.map.insert(callee.no_mem(), graph.no_mem());
    let entry_jmp = graph.new_jmp(call_block);
    for user in callee_start_projs(callee) {
        let num = match callee.data(user) {
            NodeData::Proj(num) => *num,
            _ => continue,
        };
        let mapped = match num {
            pn::start::X_INITIAL_EXEC => entry_jmp,
            pn::start::MEM => call_mem,
            pn::start::FRAME => continue,
            _ => args[(num - pn::start::ARGS_BASE) as usize],
        };
        splice.map.insert(user, mapped);
    }

    // Copy each return's operands, turning the return itself into a jump to the join block.
    let mut jmps: Vec<Node> = Vec::new();
    let mut mems: Vec<Node> = Vec::new();
    let mut results: Vec<Vec<Node>> = Vec::new();
    for &ret in &returns {
        let ret_block = splice.copy(graph, callee.block_of(ret));
        let ins: Vec<Node> = callee.inputs(ret).to_vec();
        let mem = splice.copy(graph, ins[0]);
        let values: Vec<Node> = ins[1..]
            .iter()
            .map(|&v| splice.copy(graph, v))
            .collect();
        jmps.push(graph.new_jmp(ret_block));
        mems.push(mem);
        results.push(values);
    }

    // Keep-alive edges of the callee stay alive in the caller.
    let keeps: Vec<Node> = callee.inputs(callee.end()).to_vec();
    for k in keeps {
        let copied = splice.copy(graph, k);
        graph.keep_alive(copied);
    }

    // The join block merges all returns.
    let join = graph.new_block(&jmps);
    let merged_mem = merge(graph, join, &mems, Mode::M);
    let n_results = results[0].len();
    let merged_results: Vec<Node> = (0..n_results)
        .map(|i| {
            let row: Vec<Node> = results.iter().map(|r| r[i]).collect();
            let mode = graph.mode(row[0]);
            merge(graph, join, &row, mode)
        })
        .collect();

    // Pinned users of the call's block that depended on the call now live after the inlined
    // body; move them, and every control-flow op of the block, into the join block.
    move_dependent_nodes(graph, call, call_block, entry_jmp, join);

    // Reroute the call's projections.
    let projs: Vec<Node> = graph
        .users(call)
        .iter()
        .map(|u| u.node)
        .filter(|&p| graph.opcode(p) == Opcode::Proj)
        .collect();
    for p in projs {
        let num = match graph.data(p) {
            NodeData::Proj(num) => *num,
            _ => unreachable!(),
        };
        let replacement = if num == pn::call::MEM {
            merged_mem
        } else {
            merged_results[(num - pn::call::RES_BASE) as usize]
        };
        graph.exchange(p, replacement);
    }
    graph.kill(call);
    true
}

/// Does the callee project its frame pointer out of Start with users?
fn graph_frame_proj_used(callee: &Graph) -> bool {
    callee.nodes().any(|n| {
        callee.opcode(n) == Opcode::Proj
            && callee.input(n, 0) == callee.start()
            && matches!(callee.data(n), NodeData::Proj(num) if *num == pn::start::FRAME)
            && callee_has_users(callee, n)
    })
}

fn callee_has_users(callee: &Graph, n: Node) -> bool {
    callee
        .nodes()
        .any(|u| callee.inputs(u).contains(&n))
}

fn callee_start_projs(callee: &Graph) -> Vec<Node> {
    callee
        .nodes()
        .filter(|&n| callee.opcode(n) == Opcode::Proj && callee.input(n, 0) == callee.start())
        .collect()
}

/// A phi over `values` in `join`, or the single value when they all agree.
fn merge(graph: &mut Graph, join: Node, values: &[Node], mode: Mode) -> Node {
    if values.iter().all(|&v| v == values[0]) {
        values[0]
    } else {
        graph.add_raw(NodeData::Plain(Opcode::Phi), mode, Some(join), values)
    }
}

/// Move pinned nodes of `block` that transitively depend on `call`, and all of the block's
/// control-flow ops, into `join`.
fn move_dependent_nodes(graph: &mut Graph, call: Node, block: Node, entry_jmp: Node, join: Node) {
    let mut dependent: Vec<Node> = Vec::new();
    let mut stack = vec![call];
    graph.inc_visited();
    graph.mark_visited(call);
    while let Some(n) = stack.pop() {
        let users: Vec<Node> = graph.users(n).iter().map(|u| u.node).collect();
        for u in users {
            if !graph.visited(u) {
                graph.mark_visited(u);
                dependent.push(u);
                stack.push(u);
            }
        }
    }
    for n in graph.nodes_in_block(block).collect::<Vec<_>>() {
        if n == call || n == entry_jmp || graph.opcode(n) == Opcode::Phi {
            continue;
        }
        let is_dependent = graph.visited(n);
        let is_cf_op = graph.is_cf(n) || graph.opcode(n) == Opcode::Cond;
        if (is_dependent || is_cf_op) && graph.opcode(n).is_pinned() {
            graph.set_block(n, join);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Ident, Tarval, TypeStore};

    /// Build `int double_it(int a) { return a + a; }`.
    fn callee_graph(store: &mut TypeStore) -> (Graph, Entity) {
        let i32t = store.new_primitive(Mode::IS32);
        let sig = store.new_method(vec![i32t], vec![i32t]);
        let ent = store.new_entity(Ident::intern("double_it"), sig);
        let frame = store.new_frame_type();
        let mut g = Graph::new(ent, frame);

        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let a = g.new_proj(g.start(), pn::start::ARGS_BASE, Mode::IS32);
        let sum = g.new_add(block, a, a);
        let ret = g.new_return(block, mem, &[sum]);
        g.add_input(g.end_block(), ret);
        (g, ent)
    }

    struct AlwaysInline<'a>(&'a Graph);

    impl Inline for AlwaysInline<'_> {
        fn inline(
            &mut self,
            _caller: &Graph,
            _call: Node,
            _callee: Entity,
            _args: &[Node],
        ) -> InlineCommand<'_> {
            InlineCommand::Inline(self.0)
        }
    }

    #[test]
    fn inlines_simple_callee() {
        let mut store = TypeStore::new();
        let (callee, ent) = callee_graph(&mut store);
        let sig = store.entity(ent).ty;

        // Caller: return double_it(21);
        let caller_ent = store.new_entity(Ident::intern("caller"), sig);
        let frame = store.new_frame_type();
        let mut g = Graph::new(caller_ent, frame);
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let callee_addr = g.new_address(ent);
        let arg = g.new_const(Tarval::new(Mode::IS32, 21));
        let call = g.new_call(block, mem, callee_addr, &[arg], sig);
        let call_mem = g.new_proj(call, pn::call::MEM, Mode::M);
        let res = g.new_proj(call, pn::call::RES_BASE, Mode::IS32);
        let ret = g.new_return(block, call_mem, &[res]);
        g.add_input(g.end_block(), ret);

        let inlined = do_inlining(&mut g, AlwaysInline(&callee));
        assert!(inlined);

        // No calls remain, and the result folded to 42.
        g.remove_dead_nodes();
        assert!(g.nodes().all(|n| g.opcode(n) != Opcode::Call));
        let end_preds = g.block_preds(g.end_block()).to_vec();
        assert_eq!(end_preds.len(), 1);
        let ret = end_preds[0];
        let returned = g.input(ret, 1);
        assert_eq!(g.opcode(returned), Opcode::Const);
        match g.data(returned) {
            NodeData::Const(tv) => assert_eq!(tv.as_i64(), 42),
            _ => unreachable!(),
        }
    }

    #[test]
    fn respects_keep_call() {
        struct Never;
        impl Inline for Never {
            fn inline(
                &mut self,
                _caller: &Graph,
                _call: Node,
                _callee: Entity,
                _args: &[Node],
            ) -> InlineCommand<'_> {
                InlineCommand::KeepCall
            }
        }

        let mut store = TypeStore::new();
        let (_callee, ent) = callee_graph(&mut store);
        let sig = store.entity(ent).ty;
        let caller_ent = store.new_entity(Ident::intern("caller"), sig);
        let frame = store.new_frame_type();
        let mut g = Graph::new(caller_ent, frame);
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let callee_addr = g.new_address(ent);
        let arg = g.new_const(Tarval::new(Mode::IS32, 21));
        let call = g.new_call(block, mem, callee_addr, &[arg], sig);
        let call_mem = g.new_proj(call, pn::call::MEM, Mode::M);
        let res = g.new_proj(call, pn::call::RES_BASE, Mode::IS32);
        let ret = g.new_return(block, call_mem, &[res]);
        g.add_input(g.end_block(), ret);

        assert!(!do_inlining(&mut g, Never));
        assert!(g.nodes().any(|n| g.opcode(n) == Opcode::Call));
    }
}
