//! Mutation lifecycle and cancellation.
//!
//! # Responsibility
//! - Model the phases one mutation moves through and log each transition.
//! - Carry the caller's cancellation request into the engine.
//!
//! # Invariants
//! - `Rejected` and `Committed` are terminal.
//! - Cancellation is only honored before `Mutating`.

use crate::graph::validator::Rejection;
use crate::model::family::FamilyId;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Phase of one structural mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Received,
    Validating,
    Rejected,
    Mutating,
    Recomputing,
    Committed,
}

impl MutationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Mutating => "mutating",
            Self::Recomputing => "recomputing",
            Self::Committed => "committed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Committed)
    }

    /// Legal transitions of the lifecycle.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validating)
                | (Self::Validating, Self::Rejected | Self::Mutating)
                | (
                    Self::Mutating,
                    Self::Recomputing | Self::Committed | Self::Rejected
                )
                | (Self::Recomputing, Self::Committed | Self::Rejected)
        )
    }
}

/// Shared cancellation request. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Phase tracker that emits the lifecycle as log events.
#[derive(Debug)]
pub(crate) struct MutationTrace {
    op: &'static str,
    family_id: FamilyId,
    phase: MutationPhase,
    started_at: Instant,
}

impl MutationTrace {
    pub(crate) fn start(op: &'static str, family_id: FamilyId) -> Self {
        debug!(
            "event=mutation_phase module=service op={op} family_id={family_id} phase=received"
        );
        Self {
            op,
            family_id,
            phase: MutationPhase::Received,
            started_at: Instant::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> MutationPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: MutationPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal mutation transition {} -> {}",
            self.phase.as_str(),
            next.as_str()
        );
        debug!(
            "event=mutation_phase module=service op={} family_id={} phase={} from={}",
            self.op,
            self.family_id,
            next.as_str(),
            self.phase.as_str()
        );
        self.phase = next;
    }

    pub(crate) fn reject(&mut self, rejection: &Rejection) {
        self.advance(MutationPhase::Rejected);
        info!(
            "event={} module=service status=rejected family_id={} reason={} duration_ms={}",
            self.op,
            self.family_id,
            rejection.code(),
            self.started_at.elapsed().as_millis()
        );
    }

    /// Honors `cancel` if set; only valid before `Mutating`.
    pub(crate) fn cancelled(&self, cancel: &CancelFlag) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        debug_assert!(matches!(
            self.phase,
            MutationPhase::Received | MutationPhase::Validating
        ));
        info!(
            "event={} module=service status=cancelled family_id={} phase={}",
            self.op,
            self.family_id,
            self.phase.as_str()
        );
        true
    }

    pub(crate) fn committed(&mut self, target_id: impl std::fmt::Display) {
        self.advance(MutationPhase::Committed);
        info!(
            "event={} module=service status=ok family_id={} target_id={} duration_ms={}",
            self.op,
            self.family_id,
            target_id,
            self.started_at.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelFlag, MutationPhase, MutationTrace};
    use uuid::Uuid;

    #[test]
    fn terminal_phases_accept_no_transition() {
        for terminal in [MutationPhase::Rejected, MutationPhase::Committed] {
            assert!(terminal.is_terminal());
            for next in [
                MutationPhase::Validating,
                MutationPhase::Mutating,
                MutationPhase::Committed,
            ] {
                assert!(!terminal.can_advance_to(next));
            }
        }
        assert!(MutationPhase::Recomputing.can_advance_to(MutationPhase::Rejected));
        assert!(!MutationPhase::Received.can_advance_to(MutationPhase::Mutating));
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn trace_follows_happy_path() {
        let mut trace = MutationTrace::start("relationship_add", Uuid::new_v4());
        trace.advance(MutationPhase::Validating);
        assert!(!trace.cancelled(&CancelFlag::new()));
        trace.advance(MutationPhase::Mutating);
        trace.advance(MutationPhase::Recomputing);
        trace.committed(Uuid::new_v4());
        assert_eq!(trace.phase(), MutationPhase::Committed);
    }
}
