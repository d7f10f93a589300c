//! Representation of sea-of-nodes IR graphs.

pub mod entities;
pub mod graph;
pub mod ident;
pub mod modes;
pub mod node;
pub mod tarval;
pub mod types;
pub mod write;

pub use crate::ir::entities::{Entity, Node, TypeRef};
pub use crate::ir::graph::{Graph, Properties};
pub use crate::ir::ident::Ident;
pub use crate::ir::modes::Mode;
pub use crate::ir::node::{pn, NodeData, Opcode, Relation};
pub use crate::ir::tarval::Tarval;
pub use crate::ir::types::{EntityData, TypeData, TypeStore};
