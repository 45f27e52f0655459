//! Family relationship graph engine internals.
//!
//! # Responsibility
//! - Hold the in-memory adjacency of one family (`index`).
//! - Check structural rules before a mutation (`validator`).
//! - Derive generation numbers from parent edges (`generation`).
//! - Bundle the above into a per-family context (`family_graph`).
//!
//! # Invariants
//! - Nothing in this module performs I/O or takes locks; callers serialize
//!   mutations per family.

pub mod family_graph;
pub mod generation;
pub mod index;
pub mod validator;
