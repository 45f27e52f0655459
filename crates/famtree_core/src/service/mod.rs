//! Engine use cases.
//!
//! # Responsibility
//! - `graph_service`: the `FamilyGraphService` facade, its registry and commit
//!   pipeline.
//! - `relationship_service`, `member_service`, `family_service`: operations on
//!   that facade, grouped by target.
//! - `mutation`: lifecycle phases and cancellation.

pub mod family_service;
pub mod graph_service;
pub mod member_service;
pub mod mutation;
pub mod relationship_service;
