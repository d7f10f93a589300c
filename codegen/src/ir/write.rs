//! Converting graphs to text.
//!
//! This is the diagnostic dump used by the verifier and by tests; it is organized per block and
//! prints every node with its opcode, mode, payload, and inputs.

use crate::ir::graph::Graph;
use crate::ir::node::{NodeData, Opcode};
use crate::ir::Node;
use core::fmt;

/// A wrapper that displays a single node with its payload and inputs.
pub struct DisplayNode<'a> {
    graph: &'a Graph,
    node: Node,
}

impl Graph {
    /// Return an object that can display `node` in context.
    pub fn display_node(&self, node: Node) -> DisplayNode<'_> {
        DisplayNode { graph: self, node }
    }
}

impl fmt::Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let g = self.graph;
        let n = self.node;
        write!(f, "{} = {}", n, g.opcode(n))?;
        match g.data(n) {
            NodeData::Const(tv) => write!(f, " {}", tv)?,
            NodeData::Address(ent) => write!(f, " {}", ent)?,
            NodeData::Cmp(rel) => write!(f, " {}", rel)?,
            NodeData::Load(mode) => write!(f, " {}", mode)?,
            NodeData::Call(ty) => write!(f, " {}", ty)?,
            NodeData::Alloc(align) => write!(f, " align{}", align)?,
            NodeData::Member(ent) => write!(f, " {}", ent)?,
            NodeData::Sel(ty) => write!(f, " {}", ty)?,
            NodeData::Proj(num) => write!(f, " {}", num)?,
            NodeData::IncSp(offset) => write!(f, " {}", offset)?,
            NodeData::Spill(slot) | NodeData::Reload(slot) => {
                if let Some(slot) = slot.expand() {
                    write!(f, " {}", slot)?;
                }
            }
            NodeData::Mach(op) => write!(f, " op{}", op.0)?,
            NodeData::Plain(_) => {}
        }
        write!(f, " {}", g.mode(n))?;
        let inputs = g.inputs(n);
        if !inputs.is_empty() {
            write!(f, " (")?;
            for (i, input) in inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", input)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "graph {} {{", self.entity())?;
        for block in self.blocks() {
            write!(f, "  {}:", block)?;
            let preds = self.block_preds(block);
            if !preds.is_empty() {
                write!(f, " preds(")?;
                for (i, p) in preds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")?;
            }
            writeln!(f)?;
            for n in self.nodes_in_block(block) {
                if self.opcode(n) == Opcode::Bad {
                    continue;
                }
                writeln!(f, "    {}", self.display_node(n))?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Entity, Mode, Tarval, TypeRef};

    #[test]
    fn dump_contains_nodes() {
        let mut g = Graph::new(Entity::from_u32(0), TypeRef::from_u32(0));
        let c = g.new_const(Tarval::new(Mode::IS32, 42));
        let text = g.to_string();
        assert!(text.contains("Const 42 is32"));
        assert!(text.contains(&format!("{} = Const", c)));
        assert!(text.starts_with("graph ent0 {"));
    }
}
