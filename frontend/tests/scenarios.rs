//! End-to-end scenarios: construction through the facade, middle-end passes, and the demo
//! back end.

use seagraph_codegen::analysis::cfg::BlockGraph;
use seagraph_codegen::ir::{
    Graph, Ident, Mode, Node, NodeData, Opcode, Properties, Relation, TypeStore,
};
use seagraph_codegen::opt::inline::{do_inlining, Inline, InlineCommand};
use seagraph_codegen::opt::local;
use seagraph_codegen::{be, isa, opt, verifier, Context};
use seagraph_frontend::GraphBuilder;

fn function_graph(store: &mut TypeStore, name: &str, n_params: usize, n_results: usize) -> Graph {
    let i32t = store.new_primitive(Mode::IS32);
    let sig = store.new_method(vec![i32t; n_params], vec![i32t; n_results]);
    let ent = store.new_entity(Ident::intern(name), sig);
    let frame = store.new_frame_type();
    Graph::new(ent, frame)
}

fn count_opcode(graph: &Graph, opcode: Opcode) -> usize {
    graph.nodes().filter(|&n| graph.opcode(n) == opcode).count()
}

/// A void procedure with no locals: one label, no frame adjustment, one return.
#[test]
fn empty_main() {
    let mut store = TypeStore::new();
    let mut graph = function_graph(&mut store, "main", 0, 0);
    let mut b = GraphBuilder::begin_graph(&mut graph, 0);
    b.return_(&[]);
    b.finalize().unwrap();
    assert!(verifier::verify(&graph).is_ok());

    let isa = isa::lookup("demo").unwrap();
    let mut ctx = Context::for_graph(graph);
    let mut asm = Vec::new();
    be::generate_code(&*isa, &mut ctx, &mut store, &mut asm).unwrap();
    let asm = String::from_utf8(asm).unwrap();

    assert_eq!(asm.matches("main:").count(), 1);
    assert_eq!(asm.matches("\tret").count(), 1);
    // A zero-sized frame gets no prologue or epilogue.
    assert!(!asm.contains("sp, sp"));
}

/// `int f(int a) { return (a > 2 && a < 10) ? 1 : a; }` as the facade builds it: two
/// compares, an And, one branch, one phi. No folding happens without knowing `a`.
#[test]
fn conditional_structure() {
    let mut store = TypeStore::new();
    let mut graph = function_graph(&mut store, "f", 1, 1);
    let mut b = GraphBuilder::begin_graph(&mut graph, 1);

    let a = b.arg(0, Mode::IS32);
    b.set_value(0, a);
    let two = b.iconst(Mode::IS32, 2);
    let ten = b.iconst(Mode::IS32, 10);
    let gt = b.cmp(a, two, Relation::GREATER);
    let lt = b.cmp(a, ten, Relation::LESS);
    let both = b.and(gt, lt);
    let (t, f) = b.branch(both);

    let then_block = b.new_imm_block();
    b.add_pred(then_block, t);
    b.mature_block(then_block);
    b.switch_to_block(then_block);
    let one = b.iconst(Mode::IS32, 1);
    b.set_value(0, one);
    let jt = b.jump();

    let join = b.new_imm_block();
    b.add_pred(join, jt);
    b.add_pred(join, f);
    b.mature_block(join);
    b.switch_to_block(join);
    let result = b.get_value(0, Mode::IS32).unwrap();
    b.return_(&[result]);
    b.finalize().unwrap();

    assert_eq!(count_opcode(&graph, Opcode::Cmp), 2);
    assert_eq!(count_opcode(&graph, Opcode::And), 1);
    assert_eq!(count_opcode(&graph, Opcode::Cond), 1);
    assert_eq!(count_opcode(&graph, Opcode::Phi), 1);
    assert_eq!(graph.opcode(result), Opcode::Phi);
    assert!(verifier::verify(&graph).is_ok());
}

struct Callees<'a> {
    graphs: Vec<(seagraph_codegen::ir::Entity, &'a Graph)>,
}

impl Inline for Callees<'_> {
    fn inline(
        &mut self,
        _caller: &Graph,
        _call: Node,
        callee: seagraph_codegen::ir::Entity,
        _args: &[Node],
    ) -> InlineCommand<'_> {
        match self.graphs.iter().find(|(ent, _)| *ent == callee) {
            Some((_, graph)) => InlineCommand::Inline(graph),
            None => InlineCommand::KeepCall,
        }
    }
}

/// A setter and a getter on a fresh allocation: after inlining and local optimization there is
/// no call left, the load is forwarded from the store, and the function returns `arg + 17`.
#[test]
fn inline_and_forward() {
    let mut store = TypeStore::new();
    let i32t = store.new_primitive(Mode::IS32);
    let p32 = store.new_pointer(i32t);

    // void set(int *p, int v) { *p = v; }
    let set_sig = store.new_method(vec![p32, i32t], vec![]);
    let set_ent = store.new_entity(Ident::intern("set"), set_sig);
    let set_frame = store.new_frame_type();
    let mut set_graph = Graph::new(set_ent, set_frame);
    {
        let mut b = GraphBuilder::begin_graph(&mut set_graph, 0);
        let p = b.arg(0, Mode::P);
        let v = b.arg(1, Mode::IS32);
        b.store(p, v);
        b.return_(&[]);
        b.finalize().unwrap();
    }

    // int get(int *p) { return *p; }
    let get_sig = store.new_method(vec![p32], vec![i32t]);
    let get_ent = store.new_entity(Ident::intern("get"), get_sig);
    let get_frame = store.new_frame_type();
    let mut get_graph = Graph::new(get_ent, get_frame);
    {
        let mut b = GraphBuilder::begin_graph(&mut get_graph, 0);
        let p = b.arg(0, Mode::P);
        let v = b.load(p, Mode::IS32);
        b.return_(&[v]);
        b.finalize().unwrap();
    }

    // int caller(int a) { int *p = alloc(4); set(p, 17); return a + get(p); }
    let mut graph = function_graph(&mut store, "caller", 1, 1);
    {
        let mut b = GraphBuilder::begin_graph(&mut graph, 0);
        let a = b.arg(0, Mode::IS32);
        let four = b.iconst(Mode::P, 4);
        let p = b.alloc(four, 4);
        let set_addr = b.address(set_ent);
        let seventeen = b.iconst(Mode::IS32, 17);
        b.call(set_addr, &[p, seventeen], set_sig);
        let get_addr = b.address(get_ent);
        let call = b.call(get_addr, &[p], get_sig);
        let v = b.call_result(call, 0, Mode::IS32);
        let sum = b.add(a, v);
        b.return_(&[sum]);
        b.finalize().unwrap();
    }

    let mut hook = Callees {
        graphs: vec![(set_ent, &set_graph), (get_ent, &get_graph)],
    };
    assert!(do_inlining(&mut graph, &mut hook));
    local::optimize_graph(&mut graph);
    opt::dce::do_dce(&mut graph);

    assert_eq!(count_opcode(&graph, Opcode::Call), 0);
    assert_eq!(count_opcode(&graph, Opcode::Load), 0);

    // The returned value is arg + the stored constant.
    let ret = graph.block_preds(graph.end_block())[0];
    let returned = graph.input(ret, 1);
    assert_eq!(graph.opcode(returned), Opcode::Add);
    let has_17 = graph.inputs(returned).iter().any(|&op| {
        matches!(graph.data(op), NodeData::Const(tv) if tv.as_i64() == 17)
    });
    assert!(has_17, "store value was not forwarded");
    assert!(verifier::verify(&graph).is_ok());
}

/// `for (int i = 0; i < 4; ++i) s += a[i];` fully unrolled by an explicit factor of four:
/// straight-line code with four loads.
#[test]
fn full_unroll_through_facade() {
    let mut store = TypeStore::new();
    let i32t = store.new_primitive(Mode::IS32);
    let arr = store.new_array(i32t, 4);
    let arr_ent = store.new_entity(Ident::intern("a"), arr);

    let mut graph = function_graph(&mut store, "sum4", 1, 1);
    {
        let mut b = GraphBuilder::begin_graph(&mut graph, 2);
        let s0 = b.arg(0, Mode::IS32);
        let zero = b.iconst(Mode::IS32, 0);
        b.set_value(0, zero); // i
        b.set_value(1, s0); // s
        let entry = b.jump();

        let header = b.new_imm_block();
        b.add_pred(header, entry);
        b.switch_to_block(header);
        let i = b.get_value(0, Mode::IS32).unwrap();
        let four = b.iconst(Mode::IS32, 4);
        let in_range = b.cmp(i, four, Relation::LESS);
        let (stay, leave) = b.branch(in_range);

        let body = b.new_imm_block();
        b.add_pred(body, stay);
        b.mature_block(body);
        b.switch_to_block(body);
        let base = b.address(arr_ent);
        let i_body = b.get_value(0, Mode::IS32).unwrap();
        let addr = b.sel(base, i_body, i32t);
        let elem = b.load(addr, Mode::IS32);
        let s = b.get_value(1, Mode::IS32).unwrap();
        let s_next = b.add(s, elem);
        b.set_value(1, s_next);
        let one = b.iconst(Mode::IS32, 1);
        let i_next = b.add(i_body, one);
        b.set_value(0, i_next);
        let back = b.jump();
        b.add_pred(header, back);
        b.mature_block(header);

        let exit = b.new_imm_block();
        b.add_pred(exit, leave);
        b.mature_block(exit);
        b.switch_to_block(exit);
        let result = b.get_value(1, Mode::IS32).unwrap();
        b.return_(&[result]);
        b.finalize().unwrap();
    }

    let mut ctx = Context::for_graph(graph);
    ctx.assure(Properties::LOOP_TREE);
    let lp = ctx.loops.loops().next().expect("loop was built");
    assert!(opt::unroll::unroll_loop(&mut ctx, &store, lp, 4));

    ctx.assure(Properties::LOOP_TREE);
    assert_eq!(ctx.loops.num_loops(), 0, "back edge to the header survived");
    assert_eq!(count_opcode(&ctx.graph, Opcode::Load), 4);
    assert_eq!(count_opcode(&ctx.graph, Opcode::Add), 4);
    assert!(ctx.verify().is_ok());
}

/// A `sub` whose result register lands on the subtrahend is rewritten to `neg; add` by the
/// demo target's two-address fix-up.
#[test]
fn two_address_sub_fix() {
    let mut store = TypeStore::new();
    let mut graph = function_graph(&mut store, "diff", 2, 1);
    {
        let mut b = GraphBuilder::begin_graph(&mut graph, 0);
        let a = b.arg(0, Mode::IS32);
        let bb = b.arg(1, Mode::IS32);
        let diff = b.sub(a, bb);
        // Keep `a` live across the subtraction so the result cannot reuse its register.
        let sum = b.add(diff, a);
        b.return_(&[sum]);
        b.finalize().unwrap();
    }
    assert!(verifier::verify(&graph).is_ok());

    let isa = isa::lookup("demo").unwrap();
    let mut ctx = Context::for_graph(graph);
    let mut asm = Vec::new();
    be::generate_code(&*isa, &mut ctx, &mut store, &mut asm).unwrap();
    let asm = String::from_utf8(asm).unwrap();

    assert!(asm.contains("\tneg r1, r1"), "missing neg rewrite:\n{}", asm);
    assert!(asm.contains("\tadd r1, r1, r0"), "missing add rewrite:\n{}", asm);
    assert!(!asm.contains("\tsub "), "destructive sub survived:\n{}", asm);

    // The rewrite lives in the graph too.
    assert_eq!(count_opcode(&ctx.graph, Opcode::Sub), 0);
}

/// Loop-closed SSA and the verifier are idempotent.
#[test]
fn idempotence_laws() {
    let mut store = TypeStore::new();
    let mut graph = function_graph(&mut store, "count", 0, 1);
    {
        let mut b = GraphBuilder::begin_graph(&mut graph, 1);
        let zero = b.iconst(Mode::IS32, 0);
        b.set_value(0, zero);
        let entry = b.jump();

        let header = b.new_imm_block();
        b.add_pred(header, entry);
        b.switch_to_block(header);
        let i = b.get_value(0, Mode::IS32).unwrap();
        let limit = b.iconst(Mode::IS32, 100);
        let in_range = b.cmp(i, limit, Relation::LESS);
        let (stay, leave) = b.branch(in_range);

        let body = b.new_imm_block();
        b.add_pred(body, stay);
        b.mature_block(body);
        b.switch_to_block(body);
        let i_body = b.get_value(0, Mode::IS32).unwrap();
        let one = b.iconst(Mode::IS32, 1);
        let next = b.add(i_body, one);
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
    }

    let mut ctx = Context::for_graph(graph);
    ctx.assure(Properties::LOOP_CLOSED_SSA);
    let count = ctx.graph.node_count();

    // Re-asserting loop-closed SSA is a no-op.
    seagraph_codegen::analysis::lcssa::assure_loop_closed_ssa(
        &mut ctx.graph,
        &ctx.cfg,
        &ctx.loops,
    );
    assert_eq!(ctx.graph.node_count(), count);

    // The verifier does not mutate the graph.
    let _ = ctx.verify();
    let _ = ctx.verify();
    assert_eq!(ctx.graph.node_count(), count);

    let cfg = BlockGraph::with_graph(&ctx.graph);
    assert!(cfg.is_valid());
}
