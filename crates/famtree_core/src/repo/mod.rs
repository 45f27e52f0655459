//! Collaborator contracts and their bundled adapters.
//!
//! # Responsibility
//! - `store`: load family graphs and persist committed deltas.
//! - `activity`: receive audit records.
//! - `sqlite_store`: SQLite-backed store.

pub mod activity;
pub mod sqlite_store;
pub mod store;
