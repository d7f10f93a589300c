//! The local optimizer.
//!
//! Runs on every newly introduced node, before it is allocated in the arena. Rules are applied
//! in order, to a fixed point on each node:
//!
//! 1. Constant folding: if every input is a Const of compatible mode, compute the result
//!    through the tarval module.
//! 2. Algebraic identities: `x+0`, `x-x`, `x*1`, `x&x`, `x|0`, `x^x`, shifts by zero, double
//!    negation, redundant Conv.
//! 3. Value numbering: congruent nodes are merged through the graph's identity map.
//! 4. Proj normalization: `Proj(Tuple)` projects through, `Proj(Cond(Const))` collapses to the
//!    taken branch's jump.
//!
//! All rules are shape-preserving: they never violate memory or control dependencies. Mixing
//! construction with optimization is deliberate: CSE is not an optional pass but an invariant
//! of the builder, and graphs stay compact from birth.

use crate::ir::graph::Graph;
use crate::ir::node::{pn, NodeData, Opcode};
use crate::ir::tarval::Tarval;
use crate::ir::{Mode, Node};

/// Construct a node described by `(data, mode, block, ins)`, optimized and value-numbered.
///
/// The result may be an existing node. This is the single entry point behind all of the typed
/// `Graph::new_*` constructors.
pub fn new_node(
    graph: &mut Graph,
    data: NodeData,
    mode: Mode,
    block: Option<Node>,
    ins: &[Node],
) -> Node {
    if let Some(folded) = fold(graph, &data, mode, ins) {
        return folded;
    }
    if let Some(simplified) = identities(graph, &data, mode, ins) {
        return simplified;
    }
    if let Some(normalized) = normalize_proj(graph, &data, mode, ins) {
        return normalized;
    }
    if let Some(existing) = graph.find_identical(&data, mode, block, ins) {
        return existing;
    }
    let n = graph.add_raw(data, mode, block, ins);
    graph.insert_identity(n);
    n
}

/// Re-run the local optimizer on an existing node, exchanging it if a better form exists.
/// Returns the node to use in its place. Requires active out edges for the exchange.
pub fn optimize_node(graph: &mut Graph, n: Node) -> Node {
    let data = graph.data(n).clone();
    let mode = graph.mode(n);
    let block = graph.block(n);
    let ins: Vec<Node> = graph.inputs(n).to_vec();

    if let Some(better) = fold(graph, &data, mode, &ins)
        .or_else(|| identities(graph, &data, mode, &ins))
        .or_else(|| normalize_proj(graph, &data, mode, &ins))
    {
        if better != n {
            graph.exchange(n, better);
        }
        return better;
    }
    if let Some(existing) = graph.find_identical(&data, mode, block, &ins) {
        if existing != n {
            graph.exchange(n, existing);
            return existing;
        }
    }
    graph.insert_identity(n);
    n
}

/// Re-run the local optimizer over the whole graph to a fixed point.
///
/// Construction already optimizes every node, but passes that splice foreign nodes in
/// (inlining, cloning) expose new folding opportunities after the fact.
pub fn optimize_graph(graph: &mut Graph) {
    let _tt = crate::timing::localopt();
    graph.assure_edges();
    loop {
        let mut changed = false;
        let nodes: Vec<Node> = graph.nodes().collect();
        for n in nodes {
            if graph.opcode(n) == Opcode::Bad || graph.opcode(n) == Opcode::Block {
                continue;
            }
            if optimize_node(graph, n) != n {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn as_const(graph: &Graph, n: Node) -> Option<Tarval> {
    match graph.data(n) {
        NodeData::Const(tv) => Some(*tv),
        _ => None,
    }
}

/// Rule 1: constant folding.
fn fold(graph: &mut Graph, data: &NodeData, mode: Mode, ins: &[Node]) -> Option<Node> {
    let opcode = data.opcode();
    match opcode {
        op if op.is_binary() => {
            let l = as_const(graph, ins[0])?;
            let r = as_const(graph, ins[1])?;
            let tv = match op {
                Opcode::Add => l.add(r),
                Opcode::Sub => l.sub(r),
                Opcode::Mul => l.mul(r),
                Opcode::Div => l.div(r)?,
                Opcode::Mod => l.rem(r)?,
                Opcode::And => l.and(r),
                Opcode::Or => l.or(r),
                Opcode::Eor => l.eor(r),
                Opcode::Shl => l.shl(r),
                Opcode::Shr => l.shr(r),
                Opcode::Shrs => l.shrs(r),
                _ => unreachable!(),
            };
            Some(graph.new_const(tv))
        }
        Opcode::Not => {
            let v = as_const(graph, ins[0])?;
            Some(graph.new_const(v.not()))
        }
        Opcode::Minus => {
            let v = as_const(graph, ins[0])?;
            Some(graph.new_const(v.neg()))
        }
        Opcode::Conv => {
            let v = as_const(graph, ins[0])?;
            let converted = v.convert(mode)?;
            Some(graph.new_const(converted))
        }
        Opcode::Cmp => {
            let relation = match data {
                NodeData::Cmp(rel) => *rel,
                _ => unreachable!(),
            };
            let l = as_const(graph, ins[0])?;
            let r = as_const(graph, ins[1])?;
            let outcome = l.compare(r);
            Some(graph.new_const(Tarval::bool_val(relation.contains(outcome))))
        }
        _ => None,
    }
}

/// Rule 2: algebraic identities.
fn identities(graph: &mut Graph, data: &NodeData, mode: Mode, ins: &[Node]) -> Option<Node> {
    let opcode = data.opcode();
    let const_of = |graph: &Graph, n: Node| as_const(graph, n);
    match opcode {
        Opcode::Add => {
            // x + 0 -> x
            if const_of(graph, ins[1]).is_some_and(Tarval::is_zero) {
                return Some(ins[0]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_zero) {
                return Some(ins[1]);
            }
            None
        }
        Opcode::Sub => {
            // x - 0 -> x, x - x -> 0
            if const_of(graph, ins[1]).is_some_and(Tarval::is_zero) {
                return Some(ins[0]);
            }
            if ins[0] == ins[1] && mode.is_int() {
                return Some(graph.new_const(Tarval::zero(mode)));
            }
            None
        }
        Opcode::Mul => {
            // x * 1 -> x, x * 0 -> 0
            if const_of(graph, ins[1]).is_some_and(Tarval::is_one) {
                return Some(ins[0]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_one) {
                return Some(ins[1]);
            }
            if mode.is_int()
                && (const_of(graph, ins[0]).is_some_and(Tarval::is_zero)
                    || const_of(graph, ins[1]).is_some_and(Tarval::is_zero))
            {
                return Some(graph.new_const(Tarval::zero(mode)));
            }
            None
        }
        Opcode::Div => {
            // x / 1 -> x
            if const_of(graph, ins[1]).is_some_and(Tarval::is_one) {
                return Some(ins[0]);
            }
            None
        }
        Opcode::And => {
            // x & x -> x, x & ~0 -> x, x & 0 -> 0
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            if const_of(graph, ins[1]).is_some_and(Tarval::is_all_ones) {
                return Some(ins[0]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_all_ones) {
                return Some(ins[1]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_zero)
                || const_of(graph, ins[1]).is_some_and(Tarval::is_zero)
            {
                return Some(graph.new_const(Tarval::zero(mode)));
            }
            None
        }
        Opcode::Or => {
            // x | 0 -> x, x | x -> x
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            if const_of(graph, ins[1]).is_some_and(Tarval::is_zero) {
                return Some(ins[0]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_zero) {
                return Some(ins[1]);
            }
            None
        }
        Opcode::Eor => {
            // x ^ x -> 0, x ^ 0 -> x
            if ins[0] == ins[1] {
                return Some(graph.new_const(Tarval::zero(mode)));
            }
            if const_of(graph, ins[1]).is_some_and(Tarval::is_zero) {
                return Some(ins[0]);
            }
            if const_of(graph, ins[0]).is_some_and(Tarval::is_zero) {
                return Some(ins[1]);
            }
            None
        }
        Opcode::Shl | Opcode::Shr | Opcode::Shrs => {
            // x shift 0 -> x
            if const_of(graph, ins[1]).is_some_and(Tarval::is_zero) {
                return Some(ins[0]);
            }
            None
        }
        Opcode::Minus => {
            // -(-x) -> x
            if graph.opcode(ins[0]) == Opcode::Minus {
                return Some(graph.input(ins[0], 0));
            }
            None
        }
        Opcode::Not => {
            // ~~x -> x
            if graph.opcode(ins[0]) == Opcode::Not {
                return Some(graph.input(ins[0], 0));
            }
            None
        }
        Opcode::Conv => {
            let op = ins[0];
            let from = graph.mode(op);
            // A conversion to the same mode vanishes.
            if from == mode {
                return Some(op);
            }
            // Conv(Conv(x)) collapses when the middle mode loses no information the outer
            // conversion could still see.
            if graph.opcode(op) == Opcode::Conv {
                let inner = graph.input(op, 0);
                let orig = graph.mode(inner);
                if from.is_int() && mode.is_int() && orig.is_int() && from.bits() >= mode.bits() {
                    let block = graph.block_of(op);
                    return Some(graph.new_conv(block, inner, mode));
                }
            }
            None
        }
        Opcode::Phi => {
            // A phi whose operands all agree merges nothing.
            if !ins.is_empty() && ins.iter().all(|&i| i == ins[0]) {
                return Some(ins[0]);
            }
            None
        }
        Opcode::Mux => {
            if let Some(sel) = const_of(graph, ins[0]) {
                return Some(if sel.is_true() { ins[2] } else { ins[1] });
            }
            if ins[1] == ins[2] {
                return Some(ins[1]);
            }
            None
        }
        Opcode::Cmp => {
            // x == x holds for every non-float mode; floats may be unordered.
            if ins[0] == ins[1] && !graph.mode(ins[0]).is_float() {
                let relation = match data {
                    NodeData::Cmp(rel) => *rel,
                    _ => unreachable!(),
                };
                let holds = relation.contains(crate::ir::Relation::EQUAL);
                return Some(graph.new_const(Tarval::bool_val(holds)));
            }
            None
        }
        _ => None,
    }
}

/// Rule 4: Proj normalization.
fn normalize_proj(graph: &mut Graph, data: &NodeData, mode: Mode, ins: &[Node]) -> Option<Node> {
    let num = match data {
        NodeData::Proj(num) => *num,
        _ => return None,
    };
    let pred = ins[0];
    match graph.opcode(pred) {
        // Proj(Tuple, n) selects the tuple's n-th input directly.
        Opcode::Tuple => Some(graph.input(pred, num as usize)),
        // A load fed directly by a store to the same address reads the stored value; both its
        // results forward and the load itself becomes dead.
        Opcode::Load => {
            let store_mem = graph.input(pred, 0);
            if graph.opcode(store_mem) != Opcode::Proj {
                return None;
            }
            let store = graph.input(store_mem, 0);
            if graph.opcode(store) != Opcode::Store {
                return None;
            }
            let loaded = match graph.data(pred) {
                NodeData::Load(loaded) => *loaded,
                _ => unreachable!(),
            };
            let value = graph.input(store, 2);
            if graph.input(store, 1) != graph.input(pred, 1) || graph.mode(value) != loaded {
                return None;
            }
            match num {
                pn::load::RES => Some(value),
                pn::load::MEM => Some(store_mem),
                _ => None,
            }
        }
        Opcode::Cond => {
            let selector = graph.input(pred, 0);
            let value = as_const(graph, selector)?;
            let taken = if value.is_true() {
                pn::cond::TRUE
            } else {
                pn::cond::FALSE
            };
            let block = graph.block_of(pred);
            if num == taken {
                Some(graph.new_jmp(block))
            } else {
                Some(graph.new_bad(mode))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Entity, Relation, TypeRef};

    fn test_graph() -> Graph {
        Graph::new(Entity::from_u32(0), TypeRef::from_u32(0))
    }

    fn iconst(graph: &mut Graph, v: i64) -> Node {
        graph.new_const(Tarval::new(Mode::IS32, v))
    }

    #[test]
    fn folds_constants() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = iconst(&mut g, 20);
        let b = iconst(&mut g, 22);
        let sum = g.new_add(block, a, b);
        assert_eq!(g.opcode(sum), Opcode::Const);
        assert_eq!(as_const(&g, sum).unwrap().as_i64(), 42);
    }

    #[test]
    fn declines_division_by_zero() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = iconst(&mut g, 7);
        let z = iconst(&mut g, 0);
        let div = g.new_binop(Opcode::Div, block, a, z);
        assert_eq!(g.opcode(div), Opcode::Div);
    }

    #[test]
    fn additive_identity() {
        let mut g = test_graph();
        let block = g.start_block();
        let zero = iconst(&mut g, 0);
        let x = g.add_raw(
            NodeData::Plain(Opcode::Phi),
            Mode::IS32,
            Some(block),
            &[],
        );
        assert_eq!(g.new_add(block, x, zero), x);
        assert_eq!(g.new_add(block, zero, x), x);
        assert_eq!(g.new_binop(Opcode::Shl, block, x, zero), x);

        let x_minus_x = g.new_sub(block, x, x);
        assert_eq!(as_const(&g, x_minus_x).unwrap().as_i64(), 0);
        let x_xor_x = g.new_eor(block, x, x);
        assert_eq!(as_const(&g, x_xor_x).unwrap().as_i64(), 0);
    }

    #[test]
    fn double_negation_cancels() {
        let mut g = test_graph();
        let block = g.start_block();
        let x = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let neg = g.new_minus(block, x);
        assert_eq!(g.new_minus(block, neg), x);
        let not = g.new_not(block, x);
        assert_eq!(g.new_not(block, not), x);
    }

    #[test]
    fn value_numbering_merges_congruent_nodes() {
        let mut g = test_graph();
        let block = g.start_block();
        let x = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let y = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let a = g.new_add(block, x, y);
        let b = g.new_add(block, x, y);
        assert_eq!(a, b);
        let c = g.new_add(block, y, x);
        assert_ne!(a, c);
    }

    #[test]
    fn proj_through_tuple() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = iconst(&mut g, 1);
        let b = iconst(&mut g, 2);
        let tuple = g.new_tuple(block, &[a, b]);
        let p = g.new_proj(tuple, 1, Mode::IS32);
        assert_eq!(p, b);
    }

    #[test]
    fn proj_of_constant_cond_collapses() {
        let mut g = test_graph();
        let block = g.start_block();
        let t = g.new_const(Tarval::bool_val(true));
        let cond = g.new_cond(block, t);
        let taken = g.new_proj(cond, pn::cond::TRUE, Mode::X);
        let untaken = g.new_proj(cond, pn::cond::FALSE, Mode::X);
        assert_eq!(g.opcode(taken), Opcode::Jmp);
        assert_eq!(g.opcode(untaken), Opcode::Bad);
    }

    #[test]
    fn folded_comparison() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = iconst(&mut g, 3);
        let b = iconst(&mut g, 5);
        let lt = g.new_cmp(block, a, b, Relation::LESS);
        assert!(as_const(&g, lt).unwrap().is_true());
        let ge = g.new_cmp(block, a, b, Relation::GREATER_EQUAL);
        assert!(!as_const(&g, ge).unwrap().is_true());
    }

    #[test]
    fn idempotent() {
        let mut g = test_graph();
        let block = g.start_block();
        let x = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[]);
        let one = iconst(&mut g, 1);
        let n = g.new_add(block, x, one);
        // Applying the optimizer to the already-optimized node changes nothing.
        g.assure_edges();
        assert_eq!(optimize_node(&mut g, n), n);
        assert_eq!(g.new_add(block, x, one), n);
    }
}
