//! Instruction selection support.
//!
//! Selection itself is a target-specific walker (see [`TargetIsa::select`]); this module owns
//! the data it produces: per-node register requirements. An output requirement names the
//! register class, an optional limited set of permitted registers, an input the output must
//! share a register with ("should be same", for two-address targets), and inputs the output
//! must not share a register with ("must be different"). Input requirements name the class the
//! consumer reads the operand from.
//!
//! [`TargetIsa::select`]: crate::isa::TargetIsa::select

use crate::ir::{Graph, Node};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::timing;
use seagraph_entity::SecondaryMap;
use smallvec::SmallVec;

/// A register requirement for one operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegReq {
    /// The register class the operand lives in.
    pub class: u8,
    /// If set, a bit mask of the only registers permitted.
    pub limited: Option<u64>,
}

impl RegReq {
    /// An unconstrained requirement in `class`.
    pub fn class(class: u8) -> Self {
        Self {
            class,
            limited: None,
        }
    }

    /// A requirement limited to the registers in `mask`.
    pub fn limited(class: u8, mask: u64) -> Self {
        Self {
            class,
            limited: Some(mask),
        }
    }
}

/// The output requirement of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutReq {
    /// Class and limited set of the result register.
    pub req: RegReq,
    /// The result must use the same register as this input.
    pub should_be_same: Option<u16>,
    /// Bit mask of inputs whose register the result must not use.
    pub must_be_different: u32,
}

impl OutReq {
    /// A plain class requirement.
    pub fn class(class: u8) -> Self {
        Self {
            req: RegReq::class(class),
            should_be_same: None,
            must_be_different: 0,
        }
    }

    /// Tie the result register to input `index`.
    pub fn same_as(mut self, index: u16) -> Self {
        self.should_be_same = Some(index);
        self
    }

    /// Forbid the result register from matching input `index`.
    pub fn different_from(mut self, index: u16) -> Self {
        self.must_be_different |= 1 << index;
        self
    }

    /// Restrict the result to the registers in `mask`.
    pub fn limit(mut self, mask: u64) -> Self {
        self.req.limited = Some(mask);
        self
    }
}

/// Per-node requirements attached by instruction selection.
#[derive(Clone, Default)]
pub struct NodeConstraints {
    /// Requirements per input; missing entries are unconstrained (non-register operands).
    pub in_reqs: SmallVec<[Option<RegReq>; 4]>,
    /// Requirement of the result, if the node produces a register value.
    pub out_req: Option<OutReq>,
}

/// The requirements of every node, produced by selection and consumed by the allocator, the
/// fix-up passes and the verifier.
pub struct Constraints {
    map: SecondaryMap<Node, NodeConstraints>,
}

impl Constraints {
    /// An empty set of constraints.
    pub fn new() -> Self {
        Self {
            map: SecondaryMap::new(),
        }
    }

    /// Set the output requirement of `n`.
    pub fn set_out(&mut self, n: Node, req: OutReq) {
        self.map[n].out_req = Some(req);
    }

    /// Set the requirement of input `index` of `n`.
    pub fn set_in(&mut self, n: Node, index: usize, req: RegReq) {
        let reqs = &mut self.map[n].in_reqs;
        if reqs.len() <= index {
            reqs.resize(index + 1, None);
        }
        reqs[index] = Some(req);
    }

    /// The output requirement of `n`.
    pub fn out_req(&self, n: Node) -> Option<OutReq> {
        self.map.get(n).and_then(|c| c.out_req)
    }

    /// The requirement of input `index` of `n`.
    pub fn in_req(&self, n: Node, index: usize) -> Option<RegReq> {
        self.map
            .get(n)
            .and_then(|c| c.in_reqs.get(index))
            .copied()
            .flatten()
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the target's instruction selector over `graph`.
pub fn run_selection(isa: &dyn TargetIsa, graph: &mut Graph) -> CodegenResult<Constraints> {
    let _tt = timing::select();
    let mut constraints = Constraints::new();
    isa.select(graph, &mut constraints)?;
    Ok(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_req_builders() {
        let req = OutReq::class(0).same_as(0).different_from(1).limit(0b111);
        assert_eq!(req.should_be_same, Some(0));
        assert_eq!(req.must_be_different, 0b10);
        assert_eq!(req.req.limited, Some(0b111));
    }

    #[test]
    fn sparse_in_reqs() {
        let mut c = Constraints::new();
        let n = Node::from_u32(5);
        c.set_in(n, 2, RegReq::class(1));
        assert_eq!(c.in_req(n, 0), None);
        assert_eq!(c.in_req(n, 2), Some(RegReq::class(1)));
        assert_eq!(c.out_req(n), None);
    }
}
