//! Spill slot assignment and coalescing.
//!
//! Every spilled value needs a slot in the stack frame. Spills of the same value share one
//! frame entity (their stored contents are identical, so their live ranges cannot conflict);
//! the frame type is then laid out by ascending alignment so small slots pack tightly.

use crate::ir::{Graph, Ident, Node, NodeData, Opcode, TypeStore};
use crate::timing;
use std::collections::hash_map::Entry;

/// Assign frame entities to every Spill and Reload node and lay out the frame.
pub fn assign_spill_slots(graph: &mut Graph, store: &mut TypeStore) {
    let _tt = timing::spill_slots();
    let frame = graph.frame_type();

    let mut slot_of_value: crate::fx::FxHashMap<Node, crate::ir::Entity> = Default::default();
    let mut n_slots = 0;

    // Spills first: the stored value determines the slot.
    let spills: Vec<Node> = graph
        .nodes()
        .filter(|&n| graph.opcode(n) == Opcode::Spill)
        .collect();
    for spill in spills {
        let value = graph.input(spill, 1);
        let slot = match slot_of_value.entry(value) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let mode = graph.mode(value);
                let ty = store.new_primitive(mode);
                let name = Ident::intern(&format!("spill{}", n_slots));
                n_slots += 1;
                *e.insert(store.add_member(frame, name, ty))
            }
        };
        *graph.data_mut(spill) = NodeData::Spill(slot.into());
    }

    // Reloads inherit the slot of the spill their memory edge reaches.
    let reloads: Vec<Node> = graph
        .nodes()
        .filter(|&n| graph.opcode(n) == Opcode::Reload)
        .collect();
    for reload in reloads {
        if let Some(spill) = find_spill(graph, graph.input(reload, 0)) {
            let slot = match graph.data(spill) {
                NodeData::Spill(slot) => *slot,
                _ => unreachable!(),
            };
            *graph.data_mut(reload) = NodeData::Reload(slot);
        } else {
            log::warn!("spill slots: {} has no reachable spill", reload);
        }
    }

    store.layout_frame(frame);
    log::debug!(
        "spill slots: {} slots, frame size {}",
        n_slots,
        store.size_of(frame)
    );
}

/// Walk a memory edge to the spill feeding it, looking through memory phis.
fn find_spill(graph: &Graph, mem: Node) -> Option<Node> {
    let mut seen = crate::fx::FxHashSet::default();
    let mut stack = vec![mem];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        match graph.opcode(n) {
            Opcode::Spill => return Some(n),
            Opcode::Phi => stack.extend(graph.inputs(n).iter().copied()),
            Opcode::Proj => stack.push(graph.input(n, 0)),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Entity, Mode, Tarval, TypeRef};

    #[test]
    fn spills_of_one_value_share_a_slot() {
        let mut store = TypeStore::new();
        let frame = store.new_frame_type();
        let mut g = Graph::new(Entity::from_u32(0), frame);
        let block = g.start_block();
        let v = g.new_const(Tarval::new(Mode::IS32, 7));
        let mem = g.no_mem();

        let s1 = g.add_raw(NodeData::Spill(None.into()), Mode::M, Some(block), &[mem, v]);
        let s2 = g.add_raw(NodeData::Spill(None.into()), Mode::M, Some(block), &[mem, v]);
        let r1 = g.add_raw(NodeData::Reload(None.into()), Mode::IS32, Some(block), &[s1]);
        let r2 = g.add_raw(NodeData::Reload(None.into()), Mode::IS32, Some(block), &[s2]);

        assign_spill_slots(&mut g, &mut store);

        let slot = match g.data(s1) {
            NodeData::Spill(slot) => slot.expand().unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(*g.data(s2), NodeData::Spill(slot.into()));
        assert_eq!(*g.data(r1), NodeData::Reload(slot.into()));
        assert_eq!(*g.data(r2), NodeData::Reload(slot.into()));

        // The frame was laid out.
        assert_eq!(store.size_of(frame), 4);
        assert_eq!(store.entity(slot).offset, 0);
    }
}
