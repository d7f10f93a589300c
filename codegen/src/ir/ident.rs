//! Interned identifiers.
//!
//! Names of entities and types are interned in a process-wide pool: equal strings get equal
//! `Ident`s, so name comparison is an integer compare and names can be stored in 4 bytes. The
//! pool is append-only and shared between threads behind a mutex; interned strings are leaked so
//! lookups hand out `&'static str` without holding the lock.

use crate::fx::FxHashMap;
use seagraph_entity::entity_impl;
use std::sync::{Mutex, OnceLock};

/// An interned identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(u32);
entity_impl!(Ident);

#[derive(Default)]
struct Pool {
    strings: Vec<&'static str>,
    index: FxHashMap<&'static str, u32>,
}

fn pool() -> &'static Mutex<Pool> {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Pool::default()))
}

impl Ident {
    /// Intern a string, returning its identifier. Interning the same string twice returns the
    /// same identifier.
    pub fn intern(s: &str) -> Self {
        let mut pool = pool().lock().unwrap();
        if let Some(&idx) = pool.index.get(s) {
            return Self(idx);
        }
        let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
        let idx = pool.strings.len() as u32;
        pool.strings.push(leaked);
        pool.index.insert(leaked, idx);
        Self(idx)
    }

    /// Get the interned string back.
    pub fn as_str(self) -> &'static str {
        pool().lock().unwrap().strings[self.0 as usize]
    }
}

impl core::fmt::Display for Ident {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Debug for Ident {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Ident::intern("main");
        let b = Ident::intern("main");
        let c = Ident::intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "main");
        assert_eq!(a.to_string(), "main");
    }
}
