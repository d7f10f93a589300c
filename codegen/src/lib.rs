//! Seagraph code generation library.
//!
//! This crate implements an optimizing compiler middle-end and back-end around a sea-of-nodes
//! intermediate representation: a per-procedure graph whose nodes denote value and control
//! operations, independent of source statement order. Clients construct graphs (usually through
//! the `seagraph-frontend` crate), run analyses and transformations, and ask a registered target
//! to emit assembly.
//!
//! The major pieces:
//!
//! - [`ir`]: modes, target-exact constants, interned identifiers, the type graph, and the node
//!   graph itself.
//! - [`opt`]: the local optimizer that canonicalizes every node on construction, plus dead-node
//!   elimination, inlining, and loop unrolling.
//! - [`analysis`]: out-edges, dominance, the loop tree, liveness, loop-closed SSA form, and
//!   alias queries, all cached on the graph with explicit freshness tracking.
//! - [`isa`] and [`be`]: the target description and the lowering pipeline (selection,
//!   scheduling, register allocation, stack frame construction, emission) together with the
//!   back-end verifier.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use seagraph_entity as entity;
pub use seagraph_entity::packed_option;

pub mod analysis;
pub mod be;
pub mod context;
pub mod init;
pub mod io;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod settings;
pub mod timing;
pub mod verifier;

mod diag;
mod fx;
mod result;

pub use crate::context::Context;
pub use crate::diag::{set_panic_hook, PanicHook};
pub use crate::init::{init, params, InitParams};
pub use crate::result::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
