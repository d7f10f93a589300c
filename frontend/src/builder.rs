//! The graph construction facade.

use crate::ssa::{Slot, SsaBuilder};
use seagraph_codegen::ir::{
    pn, Entity, Graph, Mode, Node, Opcode, Relation, Tarval, TypeRef,
};
use core::fmt;

/// An error reported by the facade's fallible operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// An operation that requires finalized construction ran while a block was still open.
    OpenBlock(Node),
    /// A value's mode is incompatible with where it is being used.
    TypeMismatch {
        /// The offending value.
        value: Node,
        /// The mode found.
        found: Mode,
        /// The mode required.
        expected: Mode,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OpenBlock(block) => write!(f, "block {} is still open", block),
            Self::TypeMismatch {
                value,
                found,
                expected,
            } => write!(f, "{} has mode {}, expected {}", value, found, expected),
        }
    }
}

impl std::error::Error for BuildError {}

/// Builds one graph for an imperative front end.
///
/// The builder keeps an implicit current block and a table of `n_local_vars` variable slots;
/// the memory state lives in one extra slot and is threaded automatically through the
/// memory-touching constructors. Blocks are created open ([`new_imm_block`]), gather
/// predecessors ([`add_pred`]), and are matured exactly once ([`mature_block`]), which
/// synthesizes the minimal phis for every slot read while the block was open.
///
/// All constructors run the local optimizer, so the node returned may be an existing canonical
/// node or a folded constant.
///
/// [`new_imm_block`]: GraphBuilder::new_imm_block
/// [`add_pred`]: GraphBuilder::add_pred
/// [`mature_block`]: GraphBuilder::mature_block
pub struct GraphBuilder<'a> {
    /// The graph under construction.
    pub graph: &'a mut Graph,
    ssa: SsaBuilder,
    current: Option<Node>,
    n_vars: usize,
    open_blocks: Vec<Node>,
}

impl<'a> GraphBuilder<'a> {
    /// Begin construction of `graph` with `n_local_vars` variable slots.
    ///
    /// Creates the first block, reached from Start, and switches to it.
    pub fn begin_graph(graph: &'a mut Graph, n_local_vars: usize) -> Self {
        graph.assure_edges();
        let start = graph.start();
        let initial_exec = graph.new_proj(start, pn::start::X_INITIAL_EXEC, Mode::X);
        let initial_mem = graph.new_proj(start, pn::start::MEM, Mode::M);

        let mut builder = Self {
            graph,
            ssa: SsaBuilder::new(),
            current: None,
            n_vars: n_local_vars,
            open_blocks: Vec::new(),
        };

        // The start block is complete from the beginning and defines the initial memory.
        let start_block = builder.graph.start_block();
        builder.ssa.seal_block(builder.graph, start_block);
        builder
            .ssa
            .def_var(start_block, builder.mem_slot(), initial_mem);

        let first = builder.new_imm_block();
        builder.add_pred(first, initial_exec);
        builder.mature_block(first);
        builder.switch_to_block(first);
        builder
    }

    fn mem_slot(&self) -> Slot {
        self.n_vars
    }

    /// The block new nodes are inserted into.
    pub fn current_block(&self) -> Node {
        self.current.expect("no current block")
    }

    /// Switch construction to `block`.
    pub fn switch_to_block(&mut self, block: Node) {
        self.current = Some(block);
    }

    /// Create a new open block. Predecessors are added with [`add_pred`](Self::add_pred) and
    /// the block is closed with [`mature_block`](Self::mature_block).
    pub fn new_imm_block(&mut self) -> Node {
        let block = self.graph.new_block(&[]);
        self.open_blocks.push(block);
        block
    }

    /// Add a control-flow predecessor to an open block.
    pub fn add_pred(&mut self, block: Node, ctrl: Node) {
        assert!(
            !self.ssa.is_sealed(block),
            "{} gained a predecessor after maturing",
            block
        );
        self.graph.add_input(block, ctrl);
    }

    /// Close `block`'s predecessor list and synthesize the pending phis.
    ///
    /// Maturing a block twice is a contract violation and panics.
    pub fn mature_block(&mut self, block: Node) {
        self.ssa.seal_block(self.graph, block);
        self.open_blocks.retain(|&b| b != block);
    }

    /// Record `node` as the current value of `slot`.
    pub fn set_value(&mut self, slot: Slot, node: Node) {
        debug_assert!(slot < self.n_vars, "slot out of range");
        let block = self.current_block();
        self.ssa.def_var(block, slot, node);
    }

    /// The current value of `slot`, as a node of mode `mode`.
    ///
    /// On a matured block with known predecessors this returns the existing definition; on an
    /// open block it returns a placeholder that is resolved at maturation.
    pub fn get_value(&mut self, slot: Slot, mode: Mode) -> Result<Node, BuildError> {
        debug_assert!(slot < self.n_vars, "slot out of range");
        let block = self.current_block();
        let value = self.ssa.use_var(self.graph, block, slot, mode);
        let found = self.graph.mode(value);
        if found != mode && self.graph.opcode(value) != Opcode::Unknown {
            return Err(BuildError::TypeMismatch {
                value,
                found,
                expected: mode,
            });
        }
        Ok(value)
    }

    /// The current memory state.
    pub fn get_memory(&mut self) -> Node {
        let block = self.current_block();
        let slot = self.mem_slot();
        self.ssa.use_var(self.graph, block, slot, Mode::M)
    }

    /// Replace the current memory state.
    pub fn set_memory(&mut self, mem: Node) {
        let block = self.current_block();
        let slot = self.mem_slot();
        self.ssa.def_var(block, slot, mem);
    }

    /// Finish construction. Fails if any block is still open.
    pub fn finalize(self) -> Result<(), BuildError> {
        if let Some(&block) = self.open_blocks.first() {
            return Err(BuildError::OpenBlock(block));
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------
    // Typed constructors. Each inserts into the current block through the local optimizer.

    /// A constant.
    pub fn iconst(&mut self, mode: Mode, value: i64) -> Node {
        self.graph.new_const(Tarval::new(mode, value))
    }

    /// The address of an entity.
    pub fn address(&mut self, entity: Entity) -> Node {
        self.graph.new_address(entity)
    }

    /// Procedure argument `index`.
    pub fn arg(&mut self, index: u32, mode: Mode) -> Node {
        let start = self.graph.start();
        self.graph
            .new_proj(start, pn::start::ARGS_BASE + index, mode)
    }

    fn binop(&mut self, opcode: Opcode, left: Node, right: Node) -> Node {
        let block = self.current_block();
        self.graph.new_binop(opcode, block, left, right)
    }

    /// Addition.
    pub fn add(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Add, l, r)
    }

    /// Subtraction.
    pub fn sub(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Sub, l, r)
    }

    /// Multiplication.
    pub fn mul(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Mul, l, r)
    }

    /// Division.
    pub fn div(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Div, l, r)
    }

    /// Bitwise and.
    pub fn and(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::And, l, r)
    }

    /// Bitwise or.
    pub fn or(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Or, l, r)
    }

    /// Bitwise exclusive or.
    pub fn eor(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Eor, l, r)
    }

    /// Shift left.
    pub fn shl(&mut self, l: Node, r: Node) -> Node {
        self.binop(Opcode::Shl, l, r)
    }

    /// Arithmetic negation.
    pub fn minus(&mut self, op: Node) -> Node {
        let block = self.current_block();
        self.graph.new_minus(block, op)
    }

    /// Bitwise complement.
    pub fn not(&mut self, op: Node) -> Node {
        let block = self.current_block();
        self.graph.new_not(block, op)
    }

    /// Mode conversion.
    pub fn conv(&mut self, op: Node, to: Mode) -> Node {
        let block = self.current_block();
        self.graph.new_conv(block, op, to)
    }

    /// Comparison testing `relation`.
    pub fn cmp(&mut self, l: Node, r: Node, relation: Relation) -> Node {
        let block = self.current_block();
        self.graph.new_cmp(block, l, r, relation)
    }

    /// Value multiplexer.
    pub fn mux(&mut self, sel: Node, if_false: Node, if_true: Node) -> Node {
        let block = self.current_block();
        self.graph.new_mux(block, sel, if_false, if_true)
    }

    /// An unconditional jump out of the current block. Feed the result to
    /// [`add_pred`](Self::add_pred) of the target.
    pub fn jump(&mut self) -> Node {
        let block = self.current_block();
        self.graph.new_jmp(block)
    }

    /// A conditional branch on `selector`: returns the `(if_true, if_false)` control exits.
    pub fn branch(&mut self, selector: Node) -> (Node, Node) {
        let block = self.current_block();
        let cond = self.graph.new_cond(block, selector);
        let t = self.graph.new_proj(cond, pn::cond::TRUE, Mode::X);
        let f = self.graph.new_proj(cond, pn::cond::FALSE, Mode::X);
        (t, f)
    }

    /// A load; threads the memory state and returns the loaded value.
    pub fn load(&mut self, ptr: Node, mode: Mode) -> Node {
        let block = self.current_block();
        let mem = self.get_memory();
        let load = self.graph.new_load(block, mem, ptr, mode);
        let new_mem = self.graph.new_proj(load, pn::load::MEM, Mode::M);
        self.set_memory(new_mem);
        self.graph.new_proj(load, pn::load::RES, mode)
    }

    /// A store; threads the memory state.
    pub fn store(&mut self, ptr: Node, value: Node) {
        let block = self.current_block();
        let mem = self.get_memory();
        let store = self.graph.new_store(block, mem, ptr, value);
        let new_mem = self.graph.new_proj(store, pn::store::MEM, Mode::M);
        self.set_memory(new_mem);
    }

    /// A call; threads the memory state and returns the call node. Use
    /// [`call_result`](Self::call_result) for the results.
    pub fn call(&mut self, callee: Node, args: &[Node], callee_ty: TypeRef) -> Node {
        let block = self.current_block();
        let mem = self.get_memory();
        let call = self.graph.new_call(block, mem, callee, args, callee_ty);
        let new_mem = self.graph.new_proj(call, pn::call::MEM, Mode::M);
        self.set_memory(new_mem);
        call
    }

    /// Result `index` of a call.
    pub fn call_result(&mut self, call: Node, index: u32, mode: Mode) -> Node {
        self.graph
            .new_proj(call, pn::call::RES_BASE + index, mode)
    }

    /// Select member `entity` from the compound pointed to by `ptr`.
    pub fn member(&mut self, ptr: Node, entity: Entity) -> Node {
        let block = self.current_block();
        self.graph.new_member(block, ptr, entity)
    }

    /// Select array element `index` from `ptr`.
    pub fn sel(&mut self, ptr: Node, index: Node, element: TypeRef) -> Node {
        let block = self.current_block();
        self.graph.new_sel(block, ptr, index, element)
    }

    /// A dynamic stack allocation; threads the memory state and returns the address.
    pub fn alloc(&mut self, size: Node, align: u32) -> Node {
        let block = self.current_block();
        let mem = self.get_memory();
        let alloc = self.graph.new_alloc(block, mem, size, align);
        let new_mem = self.graph.new_proj(alloc, pn::alloc::MEM, Mode::M);
        self.set_memory(new_mem);
        self.graph.new_proj(alloc, pn::alloc::RES, Mode::P)
    }

    /// A return of `values`; ends the current block and leaves no current block behind.
    pub fn return_(&mut self, values: &[Node]) -> Node {
        let block = self.current_block();
        let mem = self.get_memory();
        let ret = self.graph.new_return(block, mem, values);
        let end_block = self.graph.end_block();
        self.graph.add_input(end_block, ret);
        self.current = None;
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seagraph_codegen::ir::{NodeData, TypeStore};
    use seagraph_codegen::verifier;

    fn new_graph(store: &mut TypeStore) -> Graph {
        let i32t = store.new_primitive(Mode::IS32);
        let sig = store.new_method(vec![i32t], vec![i32t]);
        let ent = store.new_entity(seagraph_codegen::ir::Ident::intern("f"), sig);
        let frame = store.new_frame_type();
        Graph::new(ent, frame)
    }

    #[test]
    fn straight_line_variables() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);

        // v0 = 20; v0 = v0 + 22; return v0;
        let c = b.iconst(Mode::IS32, 20);
        b.set_value(0, c);
        let v = b.get_value(0, Mode::IS32).unwrap();
        let c2 = b.iconst(Mode::IS32, 22);
        let sum = b.add(v, c2);
        b.set_value(0, sum);
        let out = b.get_value(0, Mode::IS32).unwrap();
        b.return_(&[out]);
        b.finalize().unwrap();

        // Folded while building.
        match graph.data(out) {
            NodeData::Const(tv) => assert_eq!(tv.as_i64(), 42),
            other => panic!("not folded: {:?}", other),
        }
        assert!(verifier::verify(&graph).is_ok());
    }

    #[test]
    fn diamond_makes_one_phi() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);

        // v0 = arg > 0 ? 1 : 2; return v0;
        let arg = b.arg(0, Mode::IS32);
        let zero = b.iconst(Mode::IS32, 0);
        let is_pos = b.cmp(arg, zero, Relation::GREATER);
        let (t, f) = b.branch(is_pos);

        let then_block = b.new_imm_block();
        b.add_pred(then_block, t);
        b.mature_block(then_block);
        b.switch_to_block(then_block);
        let one = b.iconst(Mode::IS32, 1);
        b.set_value(0, one);
        let jt = b.jump();

        let else_block = b.new_imm_block();
        b.add_pred(else_block, f);
        b.mature_block(else_block);
        b.switch_to_block(else_block);
        let two = b.iconst(Mode::IS32, 2);
        b.set_value(0, two);
        let je = b.jump();

        let join = b.new_imm_block();
        b.add_pred(join, jt);
        b.add_pred(join, je);
        b.mature_block(join);
        b.switch_to_block(join);
        let merged = b.get_value(0, Mode::IS32).unwrap();
        b.return_(&[merged]);
        b.finalize().unwrap();

        assert_eq!(graph.opcode(merged), Opcode::Phi);
        assert_eq!(graph.inputs(merged), &[one, two]);
        assert!(verifier::verify(&graph).is_ok());
    }

    #[test]
    fn no_phi_when_operands_agree() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);

        // Both branches leave the variable alone: no phi materializes.
        let arg = b.arg(0, Mode::IS32);
        b.set_value(0, arg);
        let zero = b.iconst(Mode::IS32, 0);
        let is_pos = b.cmp(arg, zero, Relation::GREATER);
        let (t, f) = b.branch(is_pos);

        let join = b.new_imm_block();
        b.add_pred(join, t);
        b.add_pred(join, f);
        b.mature_block(join);
        b.switch_to_block(join);
        let merged = b.get_value(0, Mode::IS32).unwrap();
        assert_eq!(merged, arg);
        b.return_(&[merged]);
        b.finalize().unwrap();
    }

    #[test]
    fn loop_phi_through_open_block() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);

        // v0 = 0; while (v0 < 10) v0 = v0 + 1; return v0;
        let zero = b.iconst(Mode::IS32, 0);
        b.set_value(0, zero);
        let entry_jmp = b.jump();

        let header = b.new_imm_block();
        b.add_pred(header, entry_jmp);
        b.switch_to_block(header);
        // Read while the header is still open: a placeholder phi.
        let i = b.get_value(0, Mode::IS32).unwrap();
        let ten = b.iconst(Mode::IS32, 10);
        let in_range = b.cmp(i, ten, Relation::LESS);
        let (stay, leave) = b.branch(in_range);

        let body = b.new_imm_block();
        b.add_pred(body, stay);
        b.mature_block(body);
        b.switch_to_block(body);
        let i2 = b.get_value(0, Mode::IS32).unwrap();
        let one = b.iconst(Mode::IS32, 1);
        let next = b.add(i2, one);
        b.set_value(0, next);
        let back = b.jump();
        b.add_pred(header, back);
        b.mature_block(header);

        let exit = b.new_imm_block();
        b.add_pred(exit, leave);
        b.mature_block(exit);
        b.switch_to_block(exit);
        let result = b.get_value(0, Mode::IS32).unwrap();
        b.return_(&[result]);
        b.finalize().unwrap();

        // The placeholder became a real two-operand phi in the header.
        let i = graph.nodes().find(|&n| graph.opcode(n) == Opcode::Phi).unwrap();
        assert_eq!(graph.block_of(i), header);
        assert_eq!(graph.arity(i), 2);
        assert_eq!(graph.input(i, 0), zero);
        assert_eq!(graph.opcode(graph.input(i, 1)), Opcode::Add);
        assert!(verifier::verify(&graph).is_ok());
    }

    #[test]
    fn open_block_fails_finalize() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 0);
        let open = b.new_imm_block();
        let _ = open;
        b.return_(&[]);
        assert!(matches!(b.finalize(), Err(BuildError::OpenBlock(_))));
    }

    #[test]
    fn mode_mismatch_is_reported() {
        let mut store = TypeStore::new();
        let mut graph = new_graph(&mut store);
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);
        let wide = b.iconst(Mode::IS64, 1);
        b.set_value(0, wide);
        assert!(matches!(
            b.get_value(0, Mode::IS32),
            Err(BuildError::TypeMismatch { .. })
        ));
    }
}
