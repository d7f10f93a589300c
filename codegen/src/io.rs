//! Interfaces to the persisted IR format.
//!
//! The textual IR format itself lives in a separate crate: it enumerates types, entities, and
//! per-graph node lists with numeric ids, and its round-trip law is that deserializing a
//! serialized graph yields a graph structurally equal to the original modulo node ids. Only
//! the interface surfaces here, so the core does not grow a parser dependency; the diagnostic
//! `Display` dump of [`Graph`](crate::ir::Graph) is not the persisted format.

use crate::ir::{Graph, TypeStore};
use std::io::{Read, Write};

/// Writes compilation units in the persisted IR format.
pub trait IrExporter {
    /// Serialize the type store and the given graphs to `out`.
    fn export_unit(
        &mut self,
        store: &TypeStore,
        graphs: &[&Graph],
        out: &mut dyn Write,
    ) -> std::io::Result<()>;
}

/// Reads compilation units in the persisted IR format.
pub trait IrImporter {
    /// The importer's error type: I/O problems or malformed input.
    type Error;

    /// Deserialize a compilation unit from `input`, populating `store` and returning the
    /// graphs in file order.
    fn import_unit(
        &mut self,
        input: &mut dyn Read,
        store: &mut TypeStore,
    ) -> Result<Vec<Graph>, Self::Error>;
}
