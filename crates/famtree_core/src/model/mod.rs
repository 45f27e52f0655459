//! Family graph domain model.
//!
//! # Responsibility
//! - Define the records the graph engine reads, mutates and hands to
//!   collaborators: families, members, relationships and activity entries.
//!
//! # Invariants
//! - Every record is identified by a stable, non-nil UUID.
//! - Timestamps and calendar dates are Unix epoch milliseconds.
//! - A member, relationship or activity entry belongs to exactly one family.

pub mod activity;
pub mod family;
pub mod member;
pub mod relationship;

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identity of the acting user, as supplied by the host's session layer.
pub type UserId = Uuid;

/// Returns the current wall-clock time in epoch milliseconds.
///
/// Clocks set before the Unix epoch collapse to `0` instead of failing.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
