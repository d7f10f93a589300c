//! Assembly emission.
//!
//! Writes the procedure's assembly text to the caller-provided stream: an entry label, one
//! local label per block in layout order, and one line per scheduled node, delegated to the
//! target. Blocks are laid out in reverse post-order, so fall-through paths stay close.

use crate::be::frame::FrameInfo;
use crate::be::regalloc::Assignments;
use crate::be::sched::Schedule;
use crate::ir::{Graph, Node, TypeStore};
use crate::isa::TargetIsa;
use crate::timing;
use std::io;
use std::io::Write as _;

/// Write the assembly for one procedure.
pub fn emit_graph(
    isa: &dyn TargetIsa,
    graph: &Graph,
    store: &TypeStore,
    schedule: &Schedule,
    regs: &Assignments,
    frame: &FrameInfo,
    layout: &[Node],
    out: &mut dyn io::Write,
) -> io::Result<()> {
    let _tt = timing::emit();
    let _ = frame;

    let name = store.entity(graph.entity()).ld_name;
    writeln!(out, "\t.text")?;
    writeln!(out, "\t.globl {}", name)?;
    writeln!(out, "{}:", name)?;

    for &block in layout {
        writeln!(out, ".L{}:", block.as_u32())?;
        for &n in schedule.nodes(block) {
            isa.emit_node(graph, store, n, regs, out)?;
        }
    }
    writeln!(out)
}
