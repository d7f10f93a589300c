//! IR entity references.
//!
//! Nodes in a graph need to reference other nodes, types, and symbols. These references are not
//! Rust references: the graph is inherently cyclic (a phi depends on a loop body that depends on
//! the phi), so nodes are entries in a per-graph arena addressed by compact typed indices, and
//! the arena is the single lifetime authority. Each index type is a `u32` wrapper so we keep
//! type safety without paying for 64-bit pointers.
//!
//! The entity references implement `Display` in a way that matches the graph dump format.

use seagraph_entity::entity_impl;

/// An opaque reference to a node in a [`Graph`](super::Graph).
///
/// Blocks are nodes too: a basic block is represented as a node whose inputs are its
/// control-flow predecessors.
///
/// While the order is stable, it is arbitrary; dead-node elimination renumbers nodes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

/// An opaque reference to a type in a [`TypeStore`](super::TypeStore).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "ty");

/// An opaque reference to an entity: a persistent symbol such as a function, a struct field, a
/// global variable, or a stack frame slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u32);
entity_impl!(Entity, "ent");
