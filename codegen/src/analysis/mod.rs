//! Graph analyses.
//!
//! Each analysis reads the graph and populates a cache; freshness is recorded in the graph's
//! property set and re-analysis is idempotent. Passes declare the properties they require
//! through [`Context::assure`](crate::Context::assure).

pub mod alias;
pub mod cfg;
pub mod domtree;
pub mod lcssa;
pub mod liveness;
pub mod loops;

pub use self::alias::{alias_relation, AliasRelation};
pub use self::cfg::BlockGraph;
pub use self::domtree::{DominatorTree, PostDominatorTree};
pub use self::lcssa::assure_loop_closed_ssa;
pub use self::liveness::Liveness;
pub use self::loops::{LoopRef, LoopTree};
