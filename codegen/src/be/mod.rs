//! The back-end pipeline.
//!
//! Per procedure, in order: lower-for-target, instruction selection, scheduling, register
//! allocation, two-address fix-up, spill-slot coalescing, prologue/epilogue insertion, the
//! target's peephole pass, and emission. Each stage runs its slice of the verifier; verifier
//! findings are logged but never abort, while I/O failures during emission abort the procedure.

pub mod emit;
pub mod frame;
pub mod peephole;
pub mod regalloc;
pub mod sched;
pub mod select;
pub mod spillslots;
pub mod verify;

pub use self::sched::Schedule;

use crate::context::Context;
use crate::ir::{Node, Properties, TypeStore};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::verifier::VerifierErrors;
use std::io;
use std::io::Write as _;

/// Run the full back-end pipeline for one graph and write its assembly to `out`.
pub fn generate_code(
    isa: &dyn TargetIsa,
    ctx: &mut Context,
    store: &mut TypeStore,
    out: &mut dyn io::Write,
) -> CodegenResult<()> {
    generate_code_for_unit(isa, ctx, store, out, "")
}

/// Like [`generate_code`], additionally naming the compilation unit in the output.
pub fn generate_code_for_unit(
    isa: &dyn TargetIsa,
    ctx: &mut Context,
    store: &mut TypeStore,
    out: &mut dyn io::Write,
    unit_name: &str,
) -> CodegenResult<()> {
    if !unit_name.is_empty() {
        writeln!(out, "\t.file \"{}\"", unit_name)?;
    }
    ctx.assure(
        Properties::NO_BADS | Properties::OUT_EDGES | Properties::DOMINANCE | Properties::LIVENESS,
    );

    // 1. Machine-word lowering.
    isa.lower_for_target(&mut ctx.graph)?;

    // 2. Instruction selection.
    let mut constraints = select::run_selection(isa, &mut ctx.graph)?;
    report(ctx, |ctx, errors| {
        crate::verifier::verify_graph(&ctx.graph, Some(&ctx.cfg), Some(&ctx.domtree), errors);
    });

    // 3. Scheduling.
    let mut schedule = Schedule::compute(&ctx.graph);
    report(ctx, |ctx, errors| {
        verify::verify_schedule(&ctx.graph, &schedule, errors);
    });

    // 4. Register allocation.
    let mut regs = regalloc::allocate(ctx, isa, &mut constraints, &mut schedule)?;
    report(ctx, |ctx, errors| {
        verify::verify_node_regs(&ctx.graph, isa, &constraints, &regs, errors);
        verify::verify_pressure(&ctx.graph, isa, &schedule, &ctx.liveness, errors);
        verify::verify_allocation(&ctx.graph, isa, &schedule, &ctx.liveness, &regs, errors);
        verify::verify_liveness(&ctx.graph, &ctx.cfg, &ctx.liveness, errors);
    });

    // 5. Two-address fix-up.
    peephole::fix_two_address(isa, &mut ctx.graph, &mut constraints, &mut schedule, &mut regs);

    // 6. Spill-slot coalescing and frame layout.
    spillslots::assign_spill_slots(&mut ctx.graph, store);
    report(ctx, |ctx, errors| {
        verify::verify_spill_slots(&ctx.graph, errors);
    });

    // 7. Prologue and epilogue.
    let frame = frame::build_frame(&mut ctx.graph, store, &mut schedule);

    // 8. Target finalization.
    peephole::finalize(isa, &mut ctx.graph, &mut schedule, &mut regs)?;
    report(ctx, |ctx, errors| {
        verify::verify_schedule(&ctx.graph, &schedule, errors);
    });

    // 9. Emission.
    let layout = block_layout(ctx);
    emit::emit_graph(
        isa, &ctx.graph, store, &schedule, &regs, &frame, &layout, out,
    )?;
    Ok(())
}

/// Blocks in emission order: reverse post-order, without the end block.
fn block_layout(ctx: &mut Context) -> Vec<Node> {
    ctx.assure(Properties::DOMINANCE);
    ctx.domtree
        .cfg_postorder()
        .iter()
        .rev()
        .copied()
        .filter(|&b| b != ctx.graph.end_block())
        .collect()
}

/// Run a verifier slice; findings are logged by the collector and the pipeline proceeds.
fn report<F>(ctx: &mut Context, check: F)
where
    F: FnOnce(&Context, &mut VerifierErrors),
{
    let mut errors = VerifierErrors::default();
    check(ctx, &mut errors);
    if !errors.is_empty() {
        log::warn!("backend verifier: {} finding(s)", errors.0.len());
    }
}
