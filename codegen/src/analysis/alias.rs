//! Alias queries.
//!
//! Answers whether two memory accesses can touch the same bytes. The result is derived from the
//! address base (which entity, allocation, or frame slot the pointer descends from), the
//! symbolic offset accumulated over Member/Sel/pointer arithmetic, and the accessed sizes.
//! `NoAlias` and `MustAlias` are definitive; `MayAlias` is the safe default.

use crate::ir::{Graph, Mode, Node, NodeData, Opcode, TypeStore};

/// The possible answers of an alias query.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AliasRelation {
    /// The accesses are disjoint.
    NoAlias,
    /// The accesses may overlap.
    MayAlias,
    /// The accesses cover exactly the same bytes.
    MustAlias,
}

/// The root storage a pointer descends from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum StorageRoot {
    /// The address of a global entity.
    Global(crate::ir::Entity),
    /// The result of a dynamic allocation, identified by the Alloc node.
    Alloc(Node),
    /// The procedure's frame.
    Frame,
    /// Anything else.
    Unknown(Node),
}

/// Strip Member/Sel/constant pointer arithmetic, accumulating a byte offset.
/// Returns the base pointer and the offset, or `None` when the offset is not a compile-time
/// constant.
fn base_and_offset(graph: &Graph, store: &TypeStore, mut ptr: Node) -> (Node, Option<i64>) {
    let mut offset: Option<i64> = Some(0);
    loop {
        match graph.data(ptr) {
            NodeData::Member(ent) => {
                let member_off = store.entity(*ent).offset;
                offset = match (offset, member_off) {
                    (Some(o), off) if off >= 0 => Some(o + i64::from(off)),
                    _ => None,
                };
                ptr = graph.input(ptr, 0);
            }
            NodeData::Sel(element) => {
                let index = graph.input(ptr, 1);
                offset = match (offset, graph.data(index)) {
                    (Some(o), NodeData::Const(tv)) => {
                        Some(o + tv.as_i64() * i64::from(store.size_of(*element)))
                    }
                    _ => None,
                };
                ptr = graph.input(ptr, 0);
            }
            NodeData::Plain(Opcode::Add) if graph.mode(ptr) == Mode::P => {
                let rhs = graph.input(ptr, 1);
                offset = match (offset, graph.data(rhs)) {
                    (Some(o), NodeData::Const(tv)) => Some(o + tv.as_i64()),
                    _ => None,
                };
                ptr = graph.input(ptr, 0);
            }
            _ => return (ptr, offset),
        }
    }
}

fn storage_root(graph: &Graph, base: Node) -> StorageRoot {
    match graph.data(base) {
        NodeData::Address(ent) => StorageRoot::Global(*ent),
        NodeData::Proj(num) => {
            let pred = graph.input(base, 0);
            match graph.opcode(pred) {
                Opcode::Alloc if *num == crate::ir::pn::alloc::RES => StorageRoot::Alloc(pred),
                Opcode::Start if *num == crate::ir::pn::start::FRAME => StorageRoot::Frame,
                _ => StorageRoot::Unknown(base),
            }
        }
        _ => StorageRoot::Unknown(base),
    }
}

/// Classify the relation between an access of `a_mode` bytes at `a` and an access of `b_mode`
/// bytes at `b`.
pub fn alias_relation(
    graph: &Graph,
    store: &TypeStore,
    a: Node,
    a_mode: Mode,
    b: Node,
    b_mode: Mode,
) -> AliasRelation {
    // Different members of the same compound never overlap, whatever their offsets.
    if let (NodeData::Member(e1), NodeData::Member(e2)) = (graph.data(a), graph.data(b)) {
        if e1 != e2
            && graph.input(a, 0) == graph.input(b, 0)
            && store.entity(*e1).owner == store.entity(*e2).owner
        {
            return AliasRelation::NoAlias;
        }
    }

    let (base_a, off_a) = base_and_offset(graph, store, a);
    let (base_b, off_b) = base_and_offset(graph, store, b);

    if base_a == base_b {
        return match (off_a, off_b) {
            (Some(x), Some(y)) => {
                let size_a = i64::from(a_mode.bytes());
                let size_b = i64::from(b_mode.bytes());
                if x == y && size_a == size_b {
                    AliasRelation::MustAlias
                } else if x + size_a <= y || y + size_b <= x {
                    AliasRelation::NoAlias
                } else {
                    AliasRelation::MayAlias
                }
            }
            _ => AliasRelation::MayAlias,
        };
    }

    match (storage_root(graph, base_a), storage_root(graph, base_b)) {
        (StorageRoot::Global(e1), StorageRoot::Global(e2)) => {
            if e1 != e2 {
                AliasRelation::NoAlias
            } else {
                AliasRelation::MayAlias
            }
        }
        // A fresh allocation is disjoint from every other root.
        (StorageRoot::Alloc(n1), StorageRoot::Alloc(n2)) => {
            if n1 != n2 {
                AliasRelation::NoAlias
            } else {
                AliasRelation::MayAlias
            }
        }
        (StorageRoot::Alloc(_), StorageRoot::Global(_) | StorageRoot::Frame)
        | (StorageRoot::Global(_) | StorageRoot::Frame, StorageRoot::Alloc(_)) => {
            AliasRelation::NoAlias
        }
        // Globals live in static storage, the frame on the stack.
        (StorageRoot::Global(_), StorageRoot::Frame)
        | (StorageRoot::Frame, StorageRoot::Global(_)) => AliasRelation::NoAlias,
        _ => AliasRelation::MayAlias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Entity, Ident, Tarval, TypeRef};

    fn setup() -> (Graph, TypeStore) {
        let store = TypeStore::new();
        let graph = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        (graph, store)
    }

    #[test]
    fn distinct_globals_do_not_alias() {
        let (mut g, mut store) = setup();
        let i32t = store.new_primitive(Mode::IS32);
        let ga = store.new_entity(Ident::intern("a"), i32t);
        let gb = store.new_entity(Ident::intern("b"), i32t);
        let pa = g.new_address(ga);
        let pb = g.new_address(gb);
        assert_eq!(
            alias_relation(&g, &store, pa, Mode::IS32, pb, Mode::IS32),
            AliasRelation::NoAlias
        );
        assert_eq!(
            alias_relation(&g, &store, pa, Mode::IS32, pa, Mode::IS32),
            AliasRelation::MustAlias
        );
    }

    #[test]
    fn struct_members() {
        let (mut g, mut store) = setup();
        let i32t = store.new_primitive(Mode::IS32);
        let s = store.new_struct(Ident::intern("s"));
        let f1 = store.add_member(s, Ident::intern("f1"), i32t);
        let f2 = store.add_member(s, Ident::intern("f2"), i32t);
        store.layout_struct(s);
        let base = store.new_entity(Ident::intern("obj"), s);

        let block = g.start_block();
        let p = g.new_address(base);
        let m1 = g.new_member(block, p, f1);
        let m2 = g.new_member(block, p, f2);
        assert_eq!(
            alias_relation(&g, &store, m1, Mode::IS32, m2, Mode::IS32),
            AliasRelation::NoAlias
        );
        assert_eq!(
            alias_relation(&g, &store, m1, Mode::IS32, m1, Mode::IS32),
            AliasRelation::MustAlias
        );
    }

    #[test]
    fn array_elements_with_constant_indexes() {
        let (mut g, mut store) = setup();
        let i32t = store.new_primitive(Mode::IS32);
        let base = store.new_entity(Ident::intern("arr"), i32t);

        let block = g.start_block();
        let p = g.new_address(base);
        let i0 = g.new_const(Tarval::new(Mode::IS64, 0));
        let i1 = g.new_const(Tarval::new(Mode::IS64, 1));
        let e0 = g.new_sel(block, p, i0, i32t);
        let e1 = g.new_sel(block, p, i1, i32t);
        assert_eq!(
            alias_relation(&g, &store, e0, Mode::IS32, e1, Mode::IS32),
            AliasRelation::NoAlias
        );

        // A symbolic index may be anything.
        let sym = g.add_raw(
            NodeData::Plain(Opcode::Phi),
            Mode::IS64,
            Some(block),
            &[],
        );
        let es = g.new_sel(block, p, sym, i32t);
        assert_eq!(
            alias_relation(&g, &store, e0, Mode::IS32, es, Mode::IS32),
            AliasRelation::MayAlias
        );
    }
}
