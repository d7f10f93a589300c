//! A frontend for building seagraph IR from imperative languages.
//!
//! Imperative front ends think in statements, mutable local variables, and a "current point of
//! execution"; the graph wants SSA values. The [`GraphBuilder`] bridges the two: it keeps a
//! current block, a numbered table of local variables read and written with
//! [`get_value`](GraphBuilder::get_value) / [`set_value`](GraphBuilder::set_value), and it
//! threads the memory state implicitly through loads, stores, and calls. Phi nodes are
//! synthesized on demand when a block is matured, using the on-demand SSA construction of
//! Braun et al.; phis whose operands all agree never materialize.
//!
//! Every constructor routes through the graph's local optimizer, so the graph is compact and
//! value-numbered from birth.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

mod builder;
mod ssa;

pub use crate::builder::{BuildError, GraphBuilder};
