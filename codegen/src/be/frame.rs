//! Prologue, epilogue, and stack-pointer bookkeeping.
//!
//! One `IncSp +size` after Start grows the frame, one `IncSp -size` before each Return shrinks
//! it; a zero-sized frame gets neither. A stack-pointer simulation then walks every schedule
//! recording the offset between the stack pointer and the frame base at each node, so emission
//! can rewrite frame-relative references into sp-relative addressing.

use crate::be::sched::Schedule;
use crate::ir::{Graph, Mode, Node, NodeData, Opcode, TypeStore};
use crate::timing;
use seagraph_entity::SecondaryMap;

/// Stack frame facts collected for emission.
pub struct FrameInfo {
    /// Total frame size in bytes.
    pub size: u32,
    /// Bytes between the stack pointer and the frame base at each scheduled node. Zero after
    /// the prologue; non-zero only around stack-pointer adjustments.
    pub sp_offset: SecondaryMap<Node, i32>,
}

/// Insert the prologue and epilogue adjustments and run the stack-pointer simulation.
pub fn build_frame(
    graph: &mut Graph,
    store: &TypeStore,
    schedule: &mut Schedule,
) -> FrameInfo {
    let _tt = timing::frame();
    let size = store.size_of(graph.frame_type());

    if size > 0 {
        // Prologue: right after Start.
        let start = graph.start();
        let start_block = graph.start_block();
        let grow = graph.add_raw(
            NodeData::IncSp(size as i32),
            Mode::P,
            Some(start_block),
            &[],
        );
        schedule.insert_after(graph, start_block, grow, start);

        // Epilogue: right before every Return.
        let returns: Vec<Node> = graph
            .nodes()
            .filter(|&n| graph.opcode(n) == Opcode::Return)
            .collect();
        for ret in returns {
            let block = graph.block_of(ret);
            let shrink = graph.add_raw(
                NodeData::IncSp(-(size as i32)),
                Mode::P,
                Some(block),
                &[],
            );
            schedule.insert_before(graph, block, shrink, ret);
        }
    }

    // Stack-pointer simulation: accumulate IncSp effects in schedule order. The frame base is
    // where the stack pointer rests after the prologue, so inside the body the offset is zero.
    let mut sp_offset: SecondaryMap<Node, i32> = SecondaryMap::new();
    for block in graph.blocks() {
        let mut offset = if block == graph.start_block() && size > 0 {
            -(size as i32)
        } else {
            0
        };
        for &n in schedule.nodes(block) {
            if let NodeData::IncSp(delta) = graph.data(n) {
                offset += delta;
            }
            sp_offset[n] = offset;
        }
    }

    FrameInfo { size, sp_offset }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Entity, Ident, Tarval};

    #[test]
    fn sized_frame_gets_prologue_and_epilogue() {
        let mut store = TypeStore::new();
        let i64t = store.new_primitive(Mode::IS64);
        let frame = store.new_frame_type();
        store.add_member(frame, Ident::intern("slot"), i64t);
        store.layout_frame(frame);

        let mut g = Graph::new(Entity::from_u32(0), frame);
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let zero = g.new_const(Tarval::new(Mode::IS32, 0));
        let ret = g.new_return(block, mem, &[zero]);
        g.add_input(g.end_block(), ret);

        let mut schedule = Schedule::compute(&g);
        let info = build_frame(&mut g, &store, &mut schedule);
        assert_eq!(info.size, 8);

        let incsps: Vec<Node> = g
            .nodes()
            .filter(|&n| g.opcode(n) == Opcode::IncSp)
            .collect();
        assert_eq!(incsps.len(), 2);

        // The prologue adjustment follows Start; the epilogue precedes the return.
        let grow = incsps
            .iter()
            .copied()
            .find(|&n| matches!(g.data(n), NodeData::IncSp(8)))
            .unwrap();
        let shrink = incsps
            .iter()
            .copied()
            .find(|&n| matches!(g.data(n), NodeData::IncSp(-8)))
            .unwrap();
        assert_eq!(schedule.pos(&g, grow), schedule.pos(&g, g.start()) + 1);
        assert_eq!(schedule.pos(&g, shrink) + 1, schedule.pos(&g, ret));

        // After the prologue the stack pointer sits on the frame base.
        assert_eq!(info.sp_offset[grow], 0);
        assert_eq!(info.sp_offset[ret], -8);
    }

    #[test]
    fn empty_frame_is_omitted() {
        let mut store = TypeStore::new();
        let frame = store.new_frame_type();
        store.layout_frame(frame);

        let mut g = Graph::new(Entity::from_u32(0), frame);
        let start_jmp = g.new_proj(g.start(), pn::start::X_INITIAL_EXEC, Mode::X);
        let block = g.new_block(&[start_jmp]);
        let mem = g.new_proj(g.start(), pn::start::MEM, Mode::M);
        let ret = g.new_return(block, mem, &[]);
        g.add_input(g.end_block(), ret);

        let mut schedule = Schedule::compute(&g);
        let info = build_frame(&mut g, &store, &mut schedule);
        assert_eq!(info.size, 0);
        assert!(g.nodes().all(|n| g.opcode(n) != Opcode::IncSp));
    }
}
