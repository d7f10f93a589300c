//! The per-procedure node graph.
//!
//! A `Graph` owns an arena of nodes addressed by [`Node`] indices. Nodes reference each other
//! through input edges stored in a shared list pool; reverse ("out") edges are a side table
//! built on demand and maintained incrementally while active. The graph also owns the identity
//! map used for value numbering, the visited counter, and the cache-freshness tags for derived
//! properties.
//!
//! Nodes are never mutated in-opcode. A node is replaced by structural exchange: every out-edge
//! of the old node is rerouted to the new node, the old node becomes unreachable, and
//! [`remove_dead_nodes`](Graph::remove_dead_nodes) later compacts the arena in one step.

use crate::fx::FxHashMap;
use crate::ir::entities::{Entity, Node, TypeRef};
use crate::ir::modes::Mode;
use crate::ir::node::{NodeData, Opcode, Relation};
use crate::ir::tarval::Tarval;
use seagraph_entity::packed_option::PackedOption;
use seagraph_entity::{EntityList, EntitySet, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// Derived properties of a graph, tracked fresh/stale.
///
/// A pass declares the properties it requires (the framework recomputes stale ones) and the
/// properties it invalidates on exit.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Properties(u32);

impl Properties {
    /// No properties.
    pub const NONE: Self = Self(0);
    /// The out-edge side table matches the graph.
    pub const OUT_EDGES: Self = Self(1);
    /// The dominance information matches the graph.
    pub const DOMINANCE: Self = Self(2);
    /// The post-dominance information matches the graph.
    pub const POSTDOMINANCE: Self = Self(4);
    /// The loop tree matches the graph.
    pub const LOOP_TREE: Self = Self(8);
    /// The graph is in loop-closed SSA form.
    pub const LOOP_CLOSED_SSA: Self = Self(16);
    /// The graph contains no Bad nodes.
    pub const NO_BADS: Self = Self(32);
    /// Liveness information matches the graph.
    pub const LIVENESS: Self = Self(64);
    /// All properties.
    pub const ALL: Self = Self(127);

    /// Does this set contain all of `other`?
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The union of two property sets.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// This set with all of `other` removed.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for Properties {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::fmt::Debug for Properties {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Properties({:#x})", self.0)
    }
}

/// A single use of a node: the using node and the input position.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct NodeUse {
    /// The node that has the edge.
    pub node: Node,
    /// The input position of the edge.
    pub pos: u32,
}

struct NodeRecord {
    data: NodeData,
    mode: Mode,
    block: PackedOption<Node>,
    inputs: EntityList<Node>,
}

/// Key for the identity map: the fields that make two nodes congruent.
///
/// Floating nodes are keyed without their block, so pure computations are value-numbered
/// globally; pinned nodes only merge within one block.
#[derive(PartialEq, Eq, Hash)]
struct IdentKey {
    data: NodeData,
    mode: Mode,
    block: PackedOption<Node>,
    inputs: SmallVec<[Node; 4]>,
}

/// A per-procedure sea-of-nodes graph.
pub struct Graph {
    nodes: PrimaryMap<Node, NodeRecord>,
    pool: ListPool<Node>,
    identity: FxHashMap<IdentKey, Node>,
    edges: Option<SecondaryMap<Node, Vec<NodeUse>>>,
    visit_marks: SecondaryMap<Node, u64>,
    visit_counter: u64,
    properties: Properties,

    entity: Entity,
    frame_type: TypeRef,
    start_block: Node,
    end_block: Node,
    start: Node,
    end: Node,
    no_mem: Node,
}

impl Graph {
    /// Create a graph for the procedure `entity` with the given frame type.
    ///
    /// The graph starts out with its anchor nodes: a start block holding the Start and NoMem
    /// nodes, and an end block holding the End node.
    pub fn new(entity: Entity, frame_type: TypeRef) -> Self {
        let mut graph = Self {
            nodes: PrimaryMap::new(),
            pool: ListPool::new(),
            identity: FxHashMap::default(),
            edges: None,
            visit_marks: SecondaryMap::new(),
            visit_counter: 0,
            properties: Properties::NONE,
            entity,
            frame_type,
            start_block: Node::from_u32(0),
            end_block: Node::from_u32(0),
            start: Node::from_u32(0),
            end: Node::from_u32(0),
            no_mem: Node::from_u32(0),
        };
        graph.start_block = graph.add_raw(NodeData::Plain(Opcode::Block), Mode::BB, None, &[]);
        graph.start = graph.add_raw(
            NodeData::Plain(Opcode::Start),
            Mode::T,
            Some(graph.start_block),
            &[],
        );
        graph.no_mem = graph.add_raw(
            NodeData::Plain(Opcode::NoMem),
            Mode::M,
            Some(graph.start_block),
            &[],
        );
        graph.end_block = graph.add_raw(NodeData::Plain(Opcode::Block), Mode::BB, None, &[]);
        graph.end = graph.add_raw(
            NodeData::Plain(Opcode::End),
            Mode::X,
            Some(graph.end_block),
            &[],
        );
        graph
    }

    /// The procedure entity this graph defines.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// The frame type describing this procedure's stack layout.
    pub fn frame_type(&self) -> TypeRef {
        self.frame_type
    }

    /// The start block.
    pub fn start_block(&self) -> Node {
        self.start_block
    }

    /// The end block.
    pub fn end_block(&self) -> Node {
        self.end_block
    }

    /// The Start node.
    pub fn start(&self) -> Node {
        self.start
    }

    /// The End node.
    pub fn end(&self) -> Node {
        self.end
    }

    /// The NoMem node.
    pub fn no_mem(&self) -> Node {
        self.no_mem
    }

    /// Number of node slots allocated, including dead ones.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Is `n` a node of this graph? Killed nodes remain valid Bad nodes until dead-node
    /// elimination compacts the arena.
    pub fn is_valid(&self, n: Node) -> bool {
        self.nodes.is_valid(n)
    }

    /// The opcode of `n`.
    pub fn opcode(&self, n: Node) -> Opcode {
        self.nodes[n].data.opcode()
    }

    /// The attribute payload of `n`.
    pub fn data(&self, n: Node) -> &NodeData {
        &self.nodes[n].data
    }

    /// The attribute payload of `n`, mutable version.
    ///
    /// Attribute fields are mutable only until the graph is handed to analyses; the back end
    /// also uses this to assign spill slots.
    pub fn data_mut(&mut self, n: Node) -> &mut NodeData {
        &mut self.nodes[n].data
    }

    /// The mode of `n`.
    pub fn mode(&self, n: Node) -> Mode {
        self.nodes[n].mode
    }

    /// The block `n` belongs to. `None` for blocks and the End node.
    pub fn block(&self, n: Node) -> Option<Node> {
        if self.opcode(n) == Opcode::Block {
            None
        } else {
            self.nodes[n].block.expand()
        }
    }

    /// The block of `n`, where a block is its own block.
    pub fn block_of(&self, n: Node) -> Node {
        if self.opcode(n) == Opcode::Block {
            n
        } else {
            self.nodes[n].block.expect("node without block")
        }
    }

    /// Move `n` into `block`.
    pub fn set_block(&mut self, n: Node, block: Node) {
        debug_assert_eq!(self.opcode(block), Opcode::Block);
        self.nodes[n].block = block.into();
    }

    /// The input nodes of `n` in order.
    pub fn inputs(&self, n: Node) -> &[Node] {
        self.nodes[n].inputs.as_slice(&self.pool)
    }

    /// Input `pos` of `n`.
    pub fn input(&self, n: Node, pos: usize) -> Node {
        self.inputs(n)[pos]
    }

    /// Number of inputs of `n`.
    pub fn arity(&self, n: Node) -> usize {
        self.nodes[n].inputs.len(&self.pool)
    }

    /// Replace input `pos` of `n`.
    pub fn set_input(&mut self, n: Node, pos: usize, new: Node) {
        let old = self.input(n, pos);
        if old == new {
            return;
        }
        if let Some(edges) = &mut self.edges {
            let uses = &mut edges[old];
            let idx = uses
                .iter()
                .position(|u| u.node == n && u.pos as usize == pos)
                .expect("stale out-edge table");
            uses.swap_remove(idx);
            edges[new].push(NodeUse {
                node: n,
                pos: pos as u32,
            });
        }
        self.nodes[n].inputs.as_mut_slice(&mut self.pool)[pos] = new;
    }

    /// Append an input to `n`. Used for block predecessors, phi operands, and keep-alive edges.
    pub fn add_input(&mut self, n: Node, new: Node) {
        let pos = {
            let rec = &mut self.nodes[n];
            rec.inputs.push(new, &mut self.pool)
        };
        if let Some(edges) = &mut self.edges {
            edges[new].push(NodeUse {
                node: n,
                pos: pos as u32,
            });
        }
    }

    /// Replace all inputs of `n`.
    pub fn set_inputs(&mut self, n: Node, ins: &[Node]) {
        if self.edges.is_some() {
            self.unregister_uses(n);
        }
        {
            let rec = &mut self.nodes[n];
            rec.inputs.clear(&mut self.pool);
            rec.inputs.extend(ins.iter().copied(), &mut self.pool);
        }
        if self.edges.is_some() {
            self.register_uses(n);
        }
    }

    /// Add a raw node without local optimization or value numbering.
    ///
    /// Passes use this when cloning or when the node must not be merged with an existing one;
    /// ordinary construction goes through [`new_node`](Self::new_node).
    pub fn add_raw(
        &mut self,
        data: NodeData,
        mode: Mode,
        block: Option<Node>,
        ins: &[Node],
    ) -> Node {
        let inputs = EntityList::from_slice(ins, &mut self.pool);
        let n = self.nodes.push(NodeRecord {
            data,
            mode,
            block: block.into(),
            inputs,
        });
        if self.edges.is_some() {
            self.register_uses(n);
        }
        n
    }

    /// Add a node, running the local optimizer first.
    ///
    /// The returned node may be an existing canonical node or a constant-folded equivalent; it
    /// is inserted into the identity map, so later congruent constructions return it again.
    pub fn new_node(
        &mut self,
        data: NodeData,
        mode: Mode,
        block: Option<Node>,
        ins: &[Node],
    ) -> Node {
        crate::opt::local::new_node(self, data, mode, block, ins)
    }

    // ------------------------------------------------------------------------------
    // Identity map (value numbering).

    fn key_for(&self, data: &NodeData, mode: Mode, block: Option<Node>, ins: &[Node]) -> IdentKey {
        let block = if data.opcode().is_pinned() {
            block.into()
        } else {
            PackedOption::default()
        };
        IdentKey {
            data: data.clone(),
            mode,
            block,
            inputs: SmallVec::from_slice(ins),
        }
    }

    fn key_of(&self, n: Node) -> IdentKey {
        let rec = &self.nodes[n];
        self.key_for(
            &rec.data.clone(),
            rec.mode,
            rec.block.expand(),
            self.inputs(n),
        )
    }

    /// Look up a node congruent to the given description.
    ///
    /// The map may hold entries for nodes that were changed after insertion; a hit is validated
    /// against the node's current state and dropped if stale.
    pub(crate) fn find_identical(
        &mut self,
        data: &NodeData,
        mode: Mode,
        block: Option<Node>,
        ins: &[Node],
    ) -> Option<Node> {
        let key = self.key_for(data, mode, block, ins);
        if let Some(&n) = self.identity.get(&key) {
            if self.is_valid(n) && self.key_of(n) == key {
                return Some(n);
            }
            self.identity.remove(&key);
        }
        None
    }

    /// Insert `n` into the identity map.
    pub(crate) fn insert_identity(&mut self, n: Node) {
        let key = self.key_of(n);
        self.identity.insert(key, n);
    }

    fn remove_identity(&mut self, n: Node) {
        let key = self.key_of(n);
        if self.identity.get(&key) == Some(&n) {
            self.identity.remove(&key);
        }
    }

    // ------------------------------------------------------------------------------
    // Out edges.

    /// Is the out-edge side table active?
    pub fn edges_active(&self) -> bool {
        self.edges.is_some()
    }

    /// Build the out-edge side table if it is not active, and mark it fresh.
    pub fn assure_edges(&mut self) {
        if self.edges.is_none() {
            let _tt = crate::timing::out_edges();
            let mut table: SecondaryMap<Node, Vec<NodeUse>> = SecondaryMap::new();
            table.resize(self.nodes.len());
            for n in self.nodes.keys() {
                for (pos, &input) in self.nodes[n].inputs.as_slice(&self.pool).iter().enumerate() {
                    table[input].push(NodeUse {
                        node: n,
                        pos: pos as u32,
                    });
                }
            }
            self.edges = Some(table);
        }
        self.properties = self.properties | Properties::OUT_EDGES;
    }

    /// Drop the out-edge side table.
    pub fn discard_edges(&mut self) {
        self.edges = None;
        self.properties = self.properties.without(Properties::OUT_EDGES);
    }

    /// The uses of `n`. Requires active out edges.
    pub fn users(&self, n: Node) -> &[NodeUse] {
        self.edges
            .as_ref()
            .expect("out edges are not active")
            .get(n)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Number of uses of `n`. Requires active out edges.
    pub fn n_users(&self, n: Node) -> usize {
        self.users(n).len()
    }

    fn register_uses(&mut self, n: Node) {
        let ins: SmallVec<[Node; 4]> = SmallVec::from_slice(self.inputs(n));
        let edges = self.edges.as_mut().unwrap();
        for (pos, input) in ins.into_iter().enumerate() {
            edges[input].push(NodeUse {
                node: n,
                pos: pos as u32,
            });
        }
    }

    fn unregister_uses(&mut self, n: Node) {
        let ins: SmallVec<[Node; 4]> = SmallVec::from_slice(self.inputs(n));
        let edges = self.edges.as_mut().unwrap();
        for (pos, input) in ins.into_iter().enumerate() {
            let uses = &mut edges[input];
            if let Some(idx) = uses
                .iter()
                .position(|u| u.node == n && u.pos as usize == pos)
            {
                uses.swap_remove(idx);
            }
        }
    }

    // ------------------------------------------------------------------------------
    // Structural exchange.

    /// Reroute every out-edge of `old` to `new` and kill `old`.
    ///
    /// Requires active out edges. Note that a node's owning-block field is not an edge: when
    /// exchanging blocks, the caller migrates block contents itself.
    pub fn exchange(&mut self, old: Node, new: Node) {
        debug_assert_ne!(old, new, "exchanging a node with itself");
        log::trace!("exchange {} -> {}", old, new);
        let uses: Vec<NodeUse> = self.users(old).to_vec();
        for u in uses {
            self.set_input(u.node, u.pos as usize, new);
        }
        self.kill(old);
    }

    /// Turn `n` into a Bad node with no inputs. The slot is reclaimed by dead-node elimination.
    pub fn kill(&mut self, n: Node) {
        debug_assert!(
            n != self.start && n != self.end && n != self.start_block && n != self.end_block,
            "killing an anchor node"
        );
        self.remove_identity(n);
        if self.edges.is_some() {
            self.unregister_uses(n);
        }
        let rec = &mut self.nodes[n];
        rec.inputs.clear(&mut self.pool);
        rec.data = NodeData::Plain(Opcode::Bad);
        self.properties = self.properties.without(Properties::NO_BADS);
    }

    /// Add a keep-alive edge from the End node to `n`.
    pub fn keep_alive(&mut self, n: Node) {
        let end = self.end;
        if !self.inputs(end).contains(&n) {
            self.add_input(end, n);
        }
    }

    // ------------------------------------------------------------------------------
    // Traversal support.

    /// Start a fresh traversal: all nodes become unvisited.
    pub fn inc_visited(&mut self) {
        self.visit_counter += 1;
    }

    /// Mark `n` visited in the current traversal.
    pub fn mark_visited(&mut self, n: Node) {
        self.visit_marks[n] = self.visit_counter;
    }

    /// Was `n` visited in the current traversal?
    pub fn visited(&self, n: Node) -> bool {
        self.visit_marks[n] == self.visit_counter
    }

    /// Iterate over all nodes, including Bad placeholders of killed nodes.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes.keys()
    }

    /// Iterate over all block nodes.
    pub fn blocks(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .keys()
            .filter(move |&n| self.opcode(n) == Opcode::Block)
    }

    /// Iterate over the non-block nodes placed in `block`.
    pub fn nodes_in_block(&self, block: Node) -> impl Iterator<Item = Node> + '_ {
        self.nodes.keys().filter(move |&n| {
            self.opcode(n) != Opcode::Block && self.nodes[n].block.expand() == Some(block)
        })
    }

    /// The control-flow predecessors of a block.
    pub fn block_preds(&self, block: Node) -> &[Node] {
        debug_assert_eq!(self.opcode(block), Opcode::Block);
        self.inputs(block)
    }

    /// Is `n` a control-flow edge source: a node that can be a block predecessor?
    pub fn is_cf(&self, n: Node) -> bool {
        self.mode(n) == Mode::X && self.opcode(n) != Opcode::End
    }

    /// Is `n` a memory phi?
    pub fn is_memory_phi(&self, n: Node) -> bool {
        self.opcode(n) == Opcode::Phi && self.mode(n) == Mode::M
    }

    // ------------------------------------------------------------------------------
    // Property cache.

    /// The set of properties currently marked fresh.
    pub fn properties(&self) -> Properties {
        self.properties
    }

    /// Mark `props` fresh.
    pub fn set_fresh(&mut self, props: Properties) {
        self.properties = self.properties | props;
    }

    /// Mark `props` stale.
    pub fn invalidate(&mut self, props: Properties) {
        self.properties = self.properties.without(props);
        if props.contains(Properties::OUT_EDGES) {
            self.edges = None;
        }
    }

    // ------------------------------------------------------------------------------
    // Dead node elimination.

    /// Compact the arena, dropping every node not reachable from the graph's roots.
    ///
    /// Node ids are renumbered. The identity map is rebuilt and the out-edge table recomputed
    /// if it was active. Derived analyses are invalidated.
    pub fn remove_dead_nodes(&mut self) {
        let _tt = crate::timing::dead_node_elim();

        // Mark: inputs and owning blocks, from the anchors and everything kept alive by End.
        let mut live = EntitySet::new();
        let mut stack: Vec<Node> = vec![
            self.end,
            self.end_block,
            self.start,
            self.start_block,
            self.no_mem,
        ];
        while let Some(n) = stack.pop() {
            if !live.insert(n) {
                continue;
            }
            for &input in self.inputs(n) {
                stack.push(input);
            }
            if let Some(block) = self.nodes[n].block.expand() {
                stack.push(block);
            }
        }

        // Sweep: copy live nodes into a fresh arena, preserving relative order.
        let mut map: SecondaryMap<Node, PackedOption<Node>> = SecondaryMap::new();
        let mut nodes: PrimaryMap<Node, NodeRecord> = PrimaryMap::with_capacity(self.nodes.len());
        let mut pool: ListPool<Node> = ListPool::new();
        let mut any_bad = false;
        for old in self.nodes.keys() {
            if !live.contains(old) {
                continue;
            }
            let rec = &self.nodes[old];
            any_bad |= rec.data.opcode() == Opcode::Bad;
            let new = nodes.push(NodeRecord {
                data: rec.data.clone(),
                mode: rec.mode,
                block: rec.block,
                inputs: rec.inputs.deep_clone(&mut self.pool),
            });
            map[old] = new.into();
        }
        // Rewrite edges and block fields to the new numbering. The input lists were cloned in
        // the old pool; move them into the fresh pool while remapping.
        let new_keys: Vec<Node> = nodes.keys().collect();
        for n in new_keys {
            let old_list = core::mem::take(&mut nodes[n].inputs);
            let mut new_list = EntityList::new();
            for &old_in in old_list.as_slice(&self.pool) {
                new_list.push(map[old_in].expect("dead input of live node"), &mut pool);
            }
            nodes[n].inputs = new_list;
            if let Some(b) = nodes[n].block.expand() {
                nodes[n].block = map[b].expect("dead block of live node").into();
            }
        }

        let edges_were_active = self.edges.is_some();
        let n_before = self.nodes.len();
        self.nodes = nodes;
        self.pool = pool;
        self.identity.clear();
        self.edges = None;
        self.visit_marks.clear();
        self.visit_counter = 0;
        self.start = map[self.start].unwrap();
        self.start_block = map[self.start_block].unwrap();
        self.end = map[self.end].unwrap();
        self.end_block = map[self.end_block].unwrap();
        self.no_mem = map[self.no_mem].unwrap();

        let live_keys: Vec<Node> = self.nodes.keys().collect();
        for n in live_keys {
            if self.opcode(n) != Opcode::Block && self.opcode(n) != Opcode::Bad {
                self.insert_identity(n);
            }
        }
        if edges_were_active {
            self.assure_edges();
        }
        self.properties = if edges_were_active {
            Properties::OUT_EDGES
        } else {
            Properties::NONE
        };
        if !any_bad {
            self.properties = self.properties | Properties::NO_BADS;
        }

        log::debug!(
            "dead node elimination: {} of {} nodes survive",
            self.nodes.len(),
            n_before,
        );
    }

    // ------------------------------------------------------------------------------
    // Typed constructors. These run the local optimizer; the returned node may be an existing
    // canonical node.

    /// A constant.
    pub fn new_const(&mut self, value: Tarval) -> Node {
        let block = self.start_block;
        self.new_node(NodeData::Const(value), value.mode(), Some(block), &[])
    }

    /// The address of an entity.
    pub fn new_address(&mut self, entity: Entity) -> Node {
        let block = self.start_block;
        self.new_node(NodeData::Address(entity), Mode::P, Some(block), &[])
    }

    /// A binary arithmetic node.
    pub fn new_binop(&mut self, opcode: Opcode, block: Node, left: Node, right: Node) -> Node {
        debug_assert!(opcode.is_binary());
        let mode = self.mode(left);
        self.new_node(NodeData::Plain(opcode), mode, Some(block), &[left, right])
    }

    /// Addition.
    pub fn new_add(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Add, block, l, r)
    }

    /// Subtraction.
    pub fn new_sub(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Sub, block, l, r)
    }

    /// Multiplication.
    pub fn new_mul(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Mul, block, l, r)
    }

    /// Bitwise and.
    pub fn new_and(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::And, block, l, r)
    }

    /// Bitwise or.
    pub fn new_or(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Or, block, l, r)
    }

    /// Bitwise exclusive or.
    pub fn new_eor(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Eor, block, l, r)
    }

    /// Shift left.
    pub fn new_shl(&mut self, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(Opcode::Shl, block, l, r)
    }

    /// Bitwise complement.
    pub fn new_not(&mut self, block: Node, op: Node) -> Node {
        let mode = self.mode(op);
        self.new_node(NodeData::Plain(Opcode::Not), mode, Some(block), &[op])
    }

    /// Arithmetic negation.
    pub fn new_minus(&mut self, block: Node, op: Node) -> Node {
        let mode = self.mode(op);
        self.new_node(NodeData::Plain(Opcode::Minus), mode, Some(block), &[op])
    }

    /// Mode conversion.
    pub fn new_conv(&mut self, block: Node, op: Node, to: Mode) -> Node {
        self.new_node(NodeData::Plain(Opcode::Conv), to, Some(block), &[op])
    }

    /// Comparison testing `relation`.
    pub fn new_cmp(&mut self, block: Node, l: Node, r: Node, relation: Relation) -> Node {
        self.new_node(NodeData::Cmp(relation), Mode::B, Some(block), &[l, r])
    }

    /// Value multiplexer: `sel ? if_true : if_false`.
    pub fn new_mux(&mut self, block: Node, sel: Node, if_false: Node, if_true: Node) -> Node {
        let mode = self.mode(if_false);
        self.new_node(
            NodeData::Plain(Opcode::Mux),
            mode,
            Some(block),
            &[sel, if_false, if_true],
        )
    }

    /// A phi merging one value per block predecessor.
    pub fn new_phi(&mut self, block: Node, mode: Mode, ins: &[Node]) -> Node {
        self.new_node(NodeData::Plain(Opcode::Phi), mode, Some(block), ins)
    }

    /// An unconditional jump out of `block`.
    pub fn new_jmp(&mut self, block: Node) -> Node {
        self.new_node(NodeData::Plain(Opcode::Jmp), Mode::X, Some(block), &[])
    }

    /// A conditional branch on `selector`; use Proj to pick up the exits.
    pub fn new_cond(&mut self, block: Node, selector: Node) -> Node {
        debug_assert_eq!(self.mode(selector), Mode::B);
        self.new_node(NodeData::Plain(Opcode::Cond), Mode::T, Some(block), &[selector])
    }

    /// A projection of result `num` out of the tuple produced by `pred`.
    pub fn new_proj(&mut self, pred: Node, num: u32, mode: Mode) -> Node {
        let block = self.block_of(pred);
        self.new_node(NodeData::Proj(num), mode, Some(block), &[pred])
    }

    /// A load of a `loaded`-mode value.
    pub fn new_load(&mut self, block: Node, mem: Node, ptr: Node, loaded: Mode) -> Node {
        self.new_node(NodeData::Load(loaded), Mode::T, Some(block), &[mem, ptr])
    }

    /// A store.
    pub fn new_store(&mut self, block: Node, mem: Node, ptr: Node, value: Node) -> Node {
        self.new_node(
            NodeData::Plain(Opcode::Store),
            Mode::T,
            Some(block),
            &[mem, ptr, value],
        )
    }

    /// A call of `callee` with the given method type.
    pub fn new_call(
        &mut self,
        block: Node,
        mem: Node,
        callee: Node,
        args: &[Node],
        callee_ty: TypeRef,
    ) -> Node {
        let mut ins: SmallVec<[Node; 8]> = SmallVec::new();
        ins.push(mem);
        ins.push(callee);
        ins.extend_from_slice(args);
        self.new_node(NodeData::Call(callee_ty), Mode::T, Some(block), &ins)
    }

    /// A return; becomes a predecessor of the end block.
    pub fn new_return(&mut self, block: Node, mem: Node, values: &[Node]) -> Node {
        let mut ins: SmallVec<[Node; 4]> = SmallVec::new();
        ins.push(mem);
        ins.extend_from_slice(values);
        self.new_node(NodeData::Plain(Opcode::Return), Mode::X, Some(block), &ins)
    }

    /// A dynamic stack allocation.
    pub fn new_alloc(&mut self, block: Node, mem: Node, size: Node, align: u32) -> Node {
        self.new_node(NodeData::Alloc(align), Mode::T, Some(block), &[mem, size])
    }

    /// Select member `entity` from the compound pointed to by `ptr`.
    pub fn new_member(&mut self, block: Node, ptr: Node, entity: Entity) -> Node {
        self.new_node(NodeData::Member(entity), Mode::P, Some(block), &[ptr])
    }

    /// Select element `index` from the array pointed to by `ptr`.
    pub fn new_sel(&mut self, block: Node, ptr: Node, index: Node, element: TypeRef) -> Node {
        self.new_node(NodeData::Sel(element), Mode::P, Some(block), &[ptr, index])
    }

    /// A tuple of values.
    pub fn new_tuple(&mut self, block: Node, ins: &[Node]) -> Node {
        self.new_node(NodeData::Plain(Opcode::Tuple), Mode::T, Some(block), ins)
    }

    /// A new block with the given control-flow predecessors. Blocks are never value-numbered.
    pub fn new_block(&mut self, preds: &[Node]) -> Node {
        self.add_raw(NodeData::Plain(Opcode::Block), Mode::BB, None, preds)
    }

    /// A Bad node of the given mode.
    pub fn new_bad(&mut self, mode: Mode) -> Node {
        let block = self.start_block;
        self.new_node(NodeData::Plain(Opcode::Bad), mode, Some(block), &[])
    }

    /// An Unknown node of the given mode.
    pub fn new_unknown(&mut self, mode: Mode) -> Node {
        let block = self.start_block;
        self.new_node(NodeData::Plain(Opcode::Unknown), mode, Some(block), &[])
    }

    /// A back-end Keep node anchoring `ins` in `block`.
    pub fn new_keep(&mut self, block: Node, ins: &[Node]) -> Node {
        self.add_raw(NodeData::Plain(Opcode::Keep), Mode::BB, Some(block), ins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Mode;

    fn test_graph() -> Graph {
        Graph::new(Entity::from_u32(0), TypeRef::from_u32(0))
    }

    #[test]
    fn anchors() {
        let g = test_graph();
        assert_eq!(g.opcode(g.start()), Opcode::Start);
        assert_eq!(g.opcode(g.end()), Opcode::End);
        assert_eq!(g.block(g.start()), Some(g.start_block()));
        assert_eq!(g.block_of(g.start_block()), g.start_block());
        assert_eq!(g.mode(g.no_mem()), Mode::M);
    }

    #[test]
    fn constants_are_value_numbered() {
        let mut g = test_graph();
        let a = g.new_const(Tarval::new(Mode::IS32, 7));
        let b = g.new_const(Tarval::new(Mode::IS32, 7));
        let c = g.new_const(Tarval::new(Mode::IS32, 8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn exchange_reroutes_users() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = g.new_const(Tarval::new(Mode::IS32, 1));
        let b = g.new_const(Tarval::new(Mode::IS32, 2));
        // A phi is opaque to folding, so the add below keeps both inputs.
        let phi = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[a, b]);
        let add = g.new_add(block, phi, b);

        g.assure_edges();
        let c = g.new_const(Tarval::new(Mode::IS32, 5));
        g.exchange(phi, c);

        assert_eq!(g.input(add, 0), c);
        assert_eq!(g.opcode(phi), Opcode::Bad);
        assert!(g.users(c).iter().any(|u| u.node == add));
    }

    #[test]
    fn keep_alive_edges() {
        let mut g = test_graph();
        let c = g.new_const(Tarval::new(Mode::IS32, 1));
        g.keep_alive(c);
        g.keep_alive(c);
        assert_eq!(g.inputs(g.end()), &[c]);
    }

    #[test]
    fn dead_node_elimination_compacts() {
        let mut g = test_graph();
        let block = g.start_block();
        let a = g.new_const(Tarval::new(Mode::IS32, 1));
        let phi = g.add_raw(NodeData::Plain(Opcode::Phi), Mode::IS32, Some(block), &[a, a]);
        let _dead = g.new_const(Tarval::new(Mode::IS32, 99));
        g.keep_alive(phi);

        let before = g.node_count();
        g.remove_dead_nodes();
        assert!(g.node_count() < before);

        // The kept phi and its input survived, renumbered.
        let kept = g.inputs(g.end())[0];
        assert_eq!(g.opcode(kept), Opcode::Phi);
        let input = g.input(kept, 0);
        assert_eq!(g.opcode(input), Opcode::Const);
    }

    #[test]
    fn visited_marks() {
        let mut g = test_graph();
        let a = g.new_const(Tarval::new(Mode::IS32, 1));
        g.inc_visited();
        assert!(!g.visited(a));
        g.mark_visited(a);
        assert!(g.visited(a));
        g.inc_visited();
        assert!(!g.visited(a));
    }
}
