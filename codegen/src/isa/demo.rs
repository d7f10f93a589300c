//! The demo target.
//!
//! A small RISC-like machine used as the reference instance of the back-end contract and as
//! the test vehicle for the ISA-independent pipeline. Its properties are chosen to exercise
//! the interesting paths: the ALU is two-address (the result register must be the first
//! operand's, like IA-32), `sub` gets the `neg; add` repair when the result lands on the
//! subtrahend, arguments arrive in fixed registers (limited sets), and only the general
//! purpose class can spill.

use crate::be::regalloc::{Assignments, RegAssignment};
use crate::be::sched::Schedule;
use crate::be::select::{Constraints, OutReq, RegReq};
use crate::ir::node::MachOpcode;
use crate::ir::{pn, Graph, Mode, Node, NodeData, Opcode, Relation, TypeStore};
use crate::isa::registers::{RegClassDescr, RegInfo, RegisterDescr};
use crate::isa::{TargetIsa, TwoAddressFix};
use crate::result::CodegenResult;
use std::io;
use std::io::Write as _;

/// General purpose register class index.
const GP: u8 = 0;
/// Float register class index.
const FP: u8 = 1;
/// In-class index of the stack pointer.
const SP_INDEX: u16 = 6;

static CLASSES: [RegClassDescr; 2] = [
    RegClassDescr {
        name: "gp",
        index: GP,
        mode: Mode::IS64,
        count: 7,
        allocatable: 0b011_1111,
    },
    RegClassDescr {
        name: "fp",
        index: FP,
        mode: Mode::F64,
        count: 4,
        allocatable: 0b1111,
    },
];

static REGS: [RegisterDescr; 11] = [
    RegisterDescr { name: "r0", class: GP, index: 0, global_index: 0, virtual_reg: false },
    RegisterDescr { name: "r1", class: GP, index: 1, global_index: 1, virtual_reg: false },
    RegisterDescr { name: "r2", class: GP, index: 2, global_index: 2, virtual_reg: false },
    RegisterDescr { name: "r3", class: GP, index: 3, global_index: 3, virtual_reg: false },
    RegisterDescr { name: "r4", class: GP, index: 4, global_index: 4, virtual_reg: false },
    RegisterDescr { name: "r5", class: GP, index: 5, global_index: 5, virtual_reg: false },
    RegisterDescr { name: "sp", class: GP, index: SP_INDEX, global_index: 6, virtual_reg: false },
    RegisterDescr { name: "f0", class: FP, index: 0, global_index: 7, virtual_reg: false },
    RegisterDescr { name: "f1", class: FP, index: 1, global_index: 8, virtual_reg: false },
    RegisterDescr { name: "f2", class: FP, index: 2, global_index: 9, virtual_reg: false },
    RegisterDescr { name: "f3", class: FP, index: 3, global_index: 10, virtual_reg: false },
];

static REG_INFO: RegInfo = RegInfo {
    classes: &CLASSES,
    regs: &REGS,
};

/// The demo operation table. Indexed by `MachOpcode`.
static OPS: [&str; 13] = [
    "add", "sub", "mul", "sdiv", "smod", "and", "orr", "eor", "lsl", "lsr", "asr", "neg", "mvn",
];

const OP_ADD: MachOpcode = MachOpcode(0);
const OP_SUB: MachOpcode = MachOpcode(1);
const OP_NEG: MachOpcode = MachOpcode(11);

fn op_for(opcode: Opcode) -> Option<MachOpcode> {
    let idx = match opcode {
        Opcode::Add => 0,
        Opcode::Sub => 1,
        Opcode::Mul => 2,
        Opcode::Div => 3,
        Opcode::Mod => 4,
        Opcode::And => 5,
        Opcode::Or => 6,
        Opcode::Eor => 7,
        Opcode::Shl => 8,
        Opcode::Shr => 9,
        Opcode::Shrs => 10,
        Opcode::Minus => 11,
        Opcode::Not => 12,
        _ => return None,
    };
    Some(MachOpcode(idx))
}

/// Is this a two-address operation: the result register must equal the first operand's?
fn is_two_address(op: MachOpcode) -> bool {
    // The divider writes a separate result register; everything else destroys operand 0.
    !matches!(op.0, 3 | 4)
}

struct DemoIsa;

/// Create the demo ISA.
pub fn isa_builder() -> Box<dyn TargetIsa> {
    Box::new(DemoIsa)
}

impl TargetIsa for DemoIsa {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn reg_info(&self) -> &RegInfo {
        &REG_INFO
    }

    fn non_ssa_regs(&self) -> &[(u8, u16)] {
        &[(GP, SP_INDEX)]
    }

    fn class_for_mode(&self, mode: Mode) -> Option<u8> {
        if mode.is_float() {
            Some(FP)
        } else if mode.is_data() {
            Some(GP)
        } else {
            None
        }
    }

    fn select(&self, graph: &mut Graph, constraints: &mut Constraints) -> CodegenResult<()> {
        let nodes: Vec<Node> = graph.nodes().collect();
        for n in nodes {
            let opcode = graph.opcode(n);
            let mode = graph.mode(n);
            match opcode {
                // The ALU: generic arithmetic becomes demo opcodes with two-address ties.
                _ if op_for(opcode).is_some() && mode.is_data() => {
                    let op = op_for(opcode).unwrap();
                    let class = self.class_for_mode(mode).unwrap();
                    let ins: Vec<Node> = graph.inputs(n).to_vec();
                    let block = graph.block_of(n);
                    let mach = graph.add_raw(NodeData::Mach(op), mode, Some(block), &ins);
                    let mut out = OutReq::class(class);
                    if is_two_address(op) {
                        out = out.same_as(0);
                    }
                    constraints.set_out(mach, out);
                    for i in 0..graph.arity(mach) {
                        constraints.set_in(mach, i, RegReq::class(class));
                    }
                    graph.exchange(n, mach);
                }
                Opcode::Const | Opcode::Address | Opcode::Mux | Opcode::Cmp | Opcode::Conv => {
                    if let Some(class) = self.class_for_mode(mode) {
                        constraints.set_out(n, OutReq::class(class));
                    }
                }
                Opcode::Phi | Opcode::Reload => {
                    if let Some(class) = self.class_for_mode(mode) {
                        constraints.set_out(n, OutReq::class(class));
                    }
                }
                Opcode::Load => {
                    constraints.set_in(n, 1, RegReq::class(GP));
                }
                Opcode::Store => {
                    constraints.set_in(n, 1, RegReq::class(GP));
                    if let Some(class) = self.class_for_mode(graph.mode(graph.input(n, 2))) {
                        constraints.set_in(n, 2, RegReq::class(class));
                    }
                }
                Opcode::Proj => {
                    // Result projections carry the registers of tuple producers. Arguments
                    // arrive in fixed registers.
                    if let Some(class) = self.class_for_mode(mode) {
                        let pred = graph.input(n, 0);
                        let num = match graph.data(n) {
                            NodeData::Proj(num) => *num,
                            _ => unreachable!(),
                        };
                        let mut out = OutReq::class(class);
                        if graph.opcode(pred) == Opcode::Start && num >= pn::start::ARGS_BASE {
                            let arg = num - pn::start::ARGS_BASE;
                            if arg < 6 {
                                out = out.limit(1 << arg);
                            }
                        }
                        constraints.set_out(n, out);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn op_name(&self, op: MachOpcode) -> &'static str {
        OPS[usize::from(op.0)]
    }

    fn op_estimated_cost(&self, graph: &Graph, node: Node) -> u32 {
        match graph.data(node) {
            NodeData::Load(_) | NodeData::Plain(Opcode::Store) => 3,
            NodeData::Call(_) => 5,
            NodeData::Mach(op) if matches!(op.0, 2 | 3 | 4) => 3,
            _ => 1,
        }
    }

    fn is_valid_clobber(&self, clobber: &str) -> bool {
        clobber == "memory"
            || clobber == "cc"
            || REGS.iter().any(|r| r.name == clobber)
    }

    fn new_spill(&self, graph: &mut Graph, value: Node, mem: Node, block: Node) -> Node {
        if self.class_for_mode(graph.mode(value)) != Some(GP) {
            panic!("unimplemented mode {} in demo spill", graph.mode(value));
        }
        graph.add_raw(
            NodeData::Spill(None.into()),
            Mode::M,
            Some(block),
            &[mem, value],
        )
    }

    fn new_reload(&self, graph: &mut Graph, value: Node, spill: Node, block: Node) -> Node {
        let mode = graph.mode(value);
        if self.class_for_mode(mode) != Some(GP) {
            panic!("unimplemented mode {} in demo reload", mode);
        }
        graph.add_raw(NodeData::Reload(None.into()), mode, Some(block), &[spill])
    }

    /// `sub` destroys its first operand. When the result register was assigned to the
    /// *subtrahend* instead, a copy would clobber it; rewrite to `neg; add`, which computes
    /// `-b + a` in the subtrahend's register.
    fn fix_two_address(
        &self,
        graph: &mut Graph,
        node: Node,
        constraints: &mut Constraints,
        schedule: &mut Schedule,
        regs: &mut Assignments,
    ) -> TwoAddressFix {
        if *graph.data(node) != NodeData::Mach(OP_SUB) {
            return TwoAddressFix::InsertCopy;
        }
        let out = match regs.get(node) {
            Some(reg) => reg,
            None => return TwoAddressFix::InsertCopy,
        };
        let minuend = graph.input(node, 0);
        let subtrahend = graph.input(node, 1);
        if regs.get(subtrahend) != Some(out) || regs.get(minuend) == Some(out) {
            return TwoAddressFix::InsertCopy;
        }

        log::trace!("demo: rewriting {} to neg; add", node);
        let mode = graph.mode(node);
        let block = graph.block_of(node);
        let neg = graph.add_raw(NodeData::Mach(OP_NEG), mode, Some(block), &[subtrahend]);
        let add = graph.add_raw(NodeData::Mach(OP_ADD), mode, Some(block), &[neg, minuend]);
        for m in [neg, add] {
            constraints.set_out(m, OutReq::class(out.class).same_as(0));
            regs.set(m, out);
        }
        schedule.replace(graph, block, node, &[neg, add]);
        graph.exchange(node, add);
        TwoAddressFix::Handled
    }

    fn emit_node(
        &self,
        graph: &Graph,
        store: &TypeStore,
        node: Node,
        regs: &Assignments,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        emit_node(self, graph, store, node, regs, out)
    }
}

fn reg_name(regs: &Assignments, n: Node) -> &'static str {
    match regs.get(n) {
        Some(RegAssignment { class, index }) => REG_INFO.reg_name(class, index),
        None => "?",
    }
}

/// The block a control-flow edge jumps to.
fn jump_target(graph: &Graph, ctrl: Node) -> Option<Node> {
    graph
        .users(ctrl)
        .iter()
        .map(|u| u.node)
        .find(|&b| graph.opcode(b) == Opcode::Block)
}

fn slot_offset(store: &TypeStore, slot: seagraph_entity::packed_option::PackedOption<crate::ir::Entity>) -> i32 {
    slot.expand().map(|s| store.entity(s).offset).unwrap_or(0)
}

fn emit_node(
    isa: &DemoIsa,
    graph: &Graph,
    store: &TypeStore,
    node: Node,
    regs: &Assignments,
    out: &mut dyn io::Write,
) -> io::Result<()> {
    let rd = |n: Node| reg_name(regs, n);
    match graph.data(node) {
        // Structure without code.
        NodeData::Plain(
            Opcode::Start
            | Opcode::End
            | Opcode::Block
            | Opcode::Phi
            | Opcode::NoMem
            | Opcode::Unknown
            | Opcode::Tuple
            | Opcode::Keep
            | Opcode::Bad,
        ) => Ok(()),
        NodeData::Const(value) => writeln!(out, "\tmov {}, #{}", rd(node), value),
        NodeData::Address(ent) => writeln!(out, "\tadr {}, {}", rd(node), store.entity(*ent).ld_name),
        NodeData::Mach(op) => {
            let ins = graph.inputs(node);
            match ins.len() {
                1 => writeln!(out, "\t{} {}, {}", isa.op_name(*op), rd(node), rd(ins[0])),
                _ => writeln!(
                    out,
                    "\t{} {}, {}, {}",
                    isa.op_name(*op),
                    rd(node),
                    rd(ins[0]),
                    rd(ins[1])
                ),
            }
        }
        NodeData::Plain(Opcode::Copy) => {
            let src = graph.input(node, 0);
            if regs.get(node) == regs.get(src) {
                Ok(())
            } else {
                writeln!(out, "\tmov {}, {}", rd(node), rd(src))
            }
        }
        NodeData::Plain(Opcode::Conv) => {
            writeln!(out, "\tmov {}, {}", rd(node), rd(graph.input(node, 0)))
        }
        NodeData::Cmp(relation) => {
            let suffix = match *relation {
                Relation::LESS => "lt",
                Relation::LESS_EQUAL => "le",
                Relation::GREATER => "gt",
                Relation::GREATER_EQUAL => "ge",
                Relation::EQUAL => "eq",
                _ => "ne",
            };
            writeln!(
                out,
                "\tcmp{} {}, {}, {}",
                suffix,
                rd(node),
                rd(graph.input(node, 0)),
                rd(graph.input(node, 1))
            )
        }
        NodeData::Plain(Opcode::Mux) => writeln!(
            out,
            "\tcsel {}, {}, {}, {}",
            rd(node),
            rd(graph.input(node, 0)),
            rd(graph.input(node, 2)),
            rd(graph.input(node, 1))
        ),
        NodeData::Load(_) => {
            let result = graph
                .users(node)
                .iter()
                .map(|u| u.node)
                .find(|&p| matches!(graph.data(p), NodeData::Proj(num) if *num == pn::load::RES));
            match result {
                Some(res) => writeln!(out, "\tldr {}, [{}]", rd(res), rd(graph.input(node, 1))),
                None => Ok(()),
            }
        }
        NodeData::Plain(Opcode::Store) => writeln!(
            out,
            "\tstr {}, [{}]",
            rd(graph.input(node, 2)),
            rd(graph.input(node, 1))
        ),
        NodeData::Spill(slot) => writeln!(
            out,
            "\tstr {}, [sp, #{}]",
            rd(graph.input(node, 1)),
            slot_offset(store, *slot)
        ),
        NodeData::Reload(slot) => writeln!(
            out,
            "\tldr {}, [sp, #{}]",
            rd(node),
            slot_offset(store, *slot)
        ),
        NodeData::IncSp(delta) => {
            // The stack grows downwards.
            if *delta >= 0 {
                writeln!(out, "\tsub sp, sp, #{}", delta)
            } else {
                writeln!(out, "\tadd sp, sp, #{}", -delta)
            }
        }
        NodeData::Member(ent) => writeln!(
            out,
            "\tadd {}, {}, #{}",
            rd(node),
            rd(graph.input(node, 0)),
            store.entity(*ent).offset.max(0)
        ),
        NodeData::Sel(element) => writeln!(
            out,
            "\tadr.idx {}, {}, {}, #{}",
            rd(node),
            rd(graph.input(node, 0)),
            rd(graph.input(node, 1)),
            store.size_of(*element)
        ),
        NodeData::Plain(Opcode::Jmp) => match jump_target(graph, node) {
            Some(target) => writeln!(out, "\tb .L{}", target.as_u32()),
            None => Ok(()),
        },
        NodeData::Plain(Opcode::Cond) => {
            let mut true_target = None;
            let mut false_target = None;
            for u in graph.users(node) {
                if let NodeData::Proj(num) = graph.data(u.node) {
                    let target = jump_target(graph, u.node);
                    if *num == pn::cond::TRUE {
                        true_target = target;
                    } else {
                        false_target = target;
                    }
                }
            }
            if let Some(t) = true_target {
                writeln!(out, "\tcbnz {}, .L{}", rd(graph.input(node, 0)), t.as_u32())?;
            }
            if let Some(f) = false_target {
                writeln!(out, "\tb .L{}", f.as_u32())?;
            }
            Ok(())
        }
        NodeData::Plain(Opcode::Return) => {
            let values = &graph.inputs(node)[1..];
            for (i, &v) in values.iter().enumerate() {
                let target = REG_INFO.reg_name(GP, i as u16);
                if reg_name(regs, v) != target {
                    writeln!(out, "\tmov {}, {}", target, rd(v))?;
                }
            }
            writeln!(out, "\tret")
        }
        NodeData::Call(_) => {
            let callee = graph.input(node, 1);
            let args = &graph.inputs(node)[2..];
            for (i, &arg) in args.iter().enumerate() {
                let target = REG_INFO.reg_name(GP, i as u16);
                if reg_name(regs, arg) != target {
                    writeln!(out, "\tmov {}, {}", target, rd(arg))?;
                }
            }
            match graph.data(callee) {
                NodeData::Address(ent) => {
                    writeln!(out, "\tbl {}", store.entity(*ent).ld_name)?
                }
                _ => writeln!(out, "\tblr {}", rd(callee))?,
            }
            for u in graph.users(node) {
                if let NodeData::Proj(num) = graph.data(u.node) {
                    if *num >= pn::call::RES_BASE {
                        let src = REG_INFO.reg_name(GP, (*num - pn::call::RES_BASE) as u16);
                        if reg_name(regs, u.node) != src {
                            writeln!(out, "\tmov {}, {}", rd(u.node), src)?;
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Tarval;

    #[test]
    fn op_table() {
        assert_eq!(op_for(Opcode::Add), Some(OP_ADD));
        assert_eq!(op_for(Opcode::Sub), Some(OP_SUB));
        assert!(op_for(Opcode::Phi).is_none());
        assert!(is_two_address(OP_SUB));
        assert!(!is_two_address(MachOpcode(3)));
    }

    #[test]
    fn clobbers() {
        let isa = DemoIsa;
        assert!(isa.is_valid_clobber("memory"));
        assert!(isa.is_valid_clobber("r3"));
        assert!(!isa.is_valid_clobber("r9"));
    }

    #[test]
    #[should_panic(expected = "unimplemented mode")]
    fn float_spill_is_unimplemented() {
        let isa = DemoIsa;
        let mut g = Graph::new(
            crate::ir::Entity::from_u32(0),
            crate::ir::TypeRef::from_u32(0),
        );
        let v = g.new_const(Tarval::from_f64(Mode::F64, 1.0));
        let mem = g.no_mem();
        let block = g.start_block();
        isa.new_spill(&mut g, v, mem, block);
    }
}
