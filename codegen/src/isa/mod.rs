//! Instruction set architectures.
//!
//! The `isa` module provides the [`TargetIsa`] trait with the behavior specialization the
//! ISA-independent back end needs: the register file description, the instruction selector,
//! the spill/reload constructors driven by the register allocator, the two-address fix-up
//! hooks, and assembly emission. Targets register themselves under a short name ("amd64",
//! "arm", "ia32", "sparc", "mips") and are instantiated through [`lookup`].
//!
//! One target ships in-tree: [`demo`], a small RISC-like machine with a destructive `sub`.
//! It is the reference instance of the contract and the vehicle for the back-end tests;
//! production targets live out of tree and register themselves at startup.

pub mod demo;
mod registers;

pub use self::registers::{RegClassDescr, RegInfo, RegisterDescr, RegisterSet};

use crate::be::regalloc::Assignments;
use crate::be::select::Constraints;
use crate::be::Schedule;
use crate::init::InitParams;
use crate::ir::node::MachOpcode;
use crate::ir::{Graph, Mode, Node, TypeStore};
use crate::result::CodegenResult;
use core::fmt;
use std::io;
use std::sync::Mutex;

/// Describes reason for target lookup failure.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum LookupError {
    /// No target is registered under this name.
    Unsupported,
}

// This is manually implementing Error and Display instead of using thiserror to reduce the
// amount of dependencies used by this crate.
impl std::error::Error for LookupError {}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LookupError::Unsupported => write!(f, "No target registered under this name"),
        }
    }
}

/// What the target wants done about a two-address conflict: the output register of `node` was
/// assigned to one of its input registers other than the tied one.
pub enum TwoAddressFix {
    /// The target rewrote the node (and possibly its neighborhood) itself.
    Handled,
    /// Insert a copy of the tied input into the output register before the node.
    InsertCopy,
}

/// Methods that are specialized to a target ISA.
pub trait TargetIsa: Send + Sync {
    /// The short name of this ISA.
    fn name(&self) -> &'static str;

    /// The register file description.
    fn reg_info(&self) -> &RegInfo;

    /// Registers exempt from the one-value-per-register rule, e.g. the stack pointer.
    fn non_ssa_regs(&self) -> &[(u8, u16)];

    /// The register class holding values of `mode`, if any.
    fn class_for_mode(&self, mode: Mode) -> Option<u8>;

    /// One-time target setup.
    fn init(&self) {}

    /// One-time target teardown.
    fn finish(&self) {}

    /// The machine-wide parameters this target was built for.
    fn params(&self) -> &InitParams {
        crate::init::params()
    }

    /// Machine-word lowering: 64-bit arithmetic rewrites, switch lowering, soft float.
    fn lower_for_target(&self, graph: &mut Graph) -> CodegenResult<()> {
        let _ = graph;
        Ok(())
    }

    /// Instruction selection: replace generic opcodes with target opcodes and attach register
    /// requirements to every value-producing node.
    fn select(&self, graph: &mut Graph, constraints: &mut Constraints) -> CodegenResult<()>;

    /// The mnemonic of a target opcode.
    fn op_name(&self, op: MachOpcode) -> &'static str;

    /// Rough cost of executing `node`, for spill placement decisions.
    fn op_estimated_cost(&self, graph: &Graph, node: Node) -> u32;

    /// Is `clobber` a valid clobber specification in inline assembly?
    fn is_valid_clobber(&self, clobber: &str) -> bool;

    /// Create a spill of `value`, consuming `mem` in `block`. Returns the spill node, whose
    /// result is memory.
    fn new_spill(&self, graph: &mut Graph, value: Node, mem: Node, block: Node) -> Node;

    /// Create a reload of the value stored by `spill`, in `block`. Returns the reload node,
    /// whose result is the reloaded value.
    fn new_reload(&self, graph: &mut Graph, value: Node, spill: Node, block: Node) -> Node;

    /// Resolve a two-address conflict on `node`. The default asks for a plain copy.
    fn fix_two_address(
        &self,
        graph: &mut Graph,
        node: Node,
        constraints: &mut Constraints,
        schedule: &mut Schedule,
        regs: &mut Assignments,
    ) -> TwoAddressFix {
        let _ = (graph, node, constraints, schedule, regs);
        TwoAddressFix::InsertCopy
    }

    /// Target-specific final touches after register allocation and frame construction.
    fn peephole(
        &self,
        graph: &mut Graph,
        schedule: &mut Schedule,
        regs: &mut Assignments,
    ) -> CodegenResult<()> {
        let _ = (graph, schedule, regs);
        Ok(())
    }

    /// Write the assembly for one scheduled node.
    fn emit_node(
        &self,
        graph: &Graph,
        store: &TypeStore,
        node: Node,
        regs: &Assignments,
        out: &mut dyn io::Write,
    ) -> io::Result<()>;
}

impl fmt::Debug for &dyn TargetIsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetIsa {{ name: {} }}", self.name())
    }
}

type IsaConstructor = fn() -> Box<dyn TargetIsa>;

static REGISTRY: Mutex<Vec<(&'static str, IsaConstructor)>> = Mutex::new(Vec::new());

/// Register a target under a short name. Later registrations under the same name win, so a
/// host can shadow the built-in targets.
pub fn register(name: &'static str, constructor: IsaConstructor) {
    REGISTRY.lock().unwrap().push((name, constructor));
}

/// Look for a registered target with the given name and instantiate it.
pub fn lookup(name: &str) -> Result<Box<dyn TargetIsa>, LookupError> {
    if let Some(&(_, ctor)) = REGISTRY
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|(n, _)| *n == name)
    {
        let isa = ctor();
        isa.init();
        return Ok(isa);
    }
    // The reference target is always available.
    if name == "demo" {
        let isa = demo::isa_builder();
        isa.init();
        return Ok(isa);
    }
    Err(LookupError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_demo() {
        let isa = lookup("demo").unwrap();
        assert_eq!(isa.name(), "demo");
        assert!(lookup("m68k").is_err());
    }
}
