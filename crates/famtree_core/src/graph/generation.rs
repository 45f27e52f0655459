//! Generation numbers derived from parent edges.
//!
//! # Responsibility
//! - Keep `generation(parent) == generation(child) - 1` for every stored
//!   `Parent` edge.
//! - Propagate the effect of one new edge without recomputing the whole graph.
//!
//! # Invariants
//! - Planning never mutates the index; a conflicting plan leaves stored
//!   generations untouched.
//! - Removing an edge never changes a stored generation.
//! - Roots default to generation `0`; shifting a whole tree by a constant is
//!   not a semantic change.

use crate::graph::index::{GraphIndex, IndexError};
use crate::graph::validator::Rejection;
use crate::model::member::{Generation, MemberId};
use crate::model::relationship::{Direction, Relationship, RelationshipType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Two ancestry paths disagree on one member's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConflict {
    pub member_id: MemberId,
    /// Value implied by the path being propagated.
    pub expected: Generation,
    /// Value already fixed by another path.
    pub actual: Generation,
}

impl Display for GenerationConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "generation conflict at member {}: expected {}, found {}",
            self.member_id, self.expected, self.actual
        )
    }
}

impl Error for GenerationConflict {}

/// Why a generation plan or check could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationError {
    Conflict(GenerationConflict),
    /// The value implied for `member_id` does not fit a `Generation`.
    OutOfRange { member_id: MemberId },
}

impl GenerationError {
    pub fn member_id(&self) -> MemberId {
        match self {
            Self::Conflict(conflict) => conflict.member_id,
            Self::OutOfRange { member_id } => *member_id,
        }
    }
}

impl Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict(conflict) => write!(f, "{conflict}"),
            Self::OutOfRange { member_id } => {
                write!(f, "generation of member {member_id} is out of range")
            }
        }
    }
}

impl Error for GenerationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::OutOfRange { .. } => None,
        }
    }
}

impl From<GenerationConflict> for GenerationError {
    fn from(value: GenerationConflict) -> Self {
        Self::Conflict(value)
    }
}

impl From<GenerationError> for Rejection {
    fn from(value: GenerationError) -> Self {
        match value {
            GenerationError::Conflict(conflict) => Rejection::InconsistentGeneration {
                member_id: conflict.member_id,
                expected: conflict.expected,
                actual: conflict.actual,
            },
            GenerationError::OutOfRange { member_id } => {
                Rejection::GenerationOutOfRange { member_id }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationChange {
    pub member_id: MemberId,
    pub previous: Generation,
    pub next: Generation,
}

/// Ordered set of generation updates produced by one propagation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationPlan {
    changes: Vec<GenerationChange>,
}

impl GenerationPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[GenerationChange] {
        &self.changes
    }

    pub fn changed_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.changes.iter().map(|change| change.member_id)
    }

    pub fn apply(&self, index: &mut GraphIndex) -> Result<(), IndexError> {
        for change in &self.changes {
            index.set_generation(change.member_id, change.next)?;
        }
        Ok(())
    }

    /// Restores the values recorded before `apply`.
    pub fn revert(&self, index: &mut GraphIndex) -> Result<(), IndexError> {
        for change in self.changes.iter().rev() {
            index.set_generation(change.member_id, change.previous)?;
        }
        Ok(())
    }
}

/// Differential breadth-first generation propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationCalculator;

impl GenerationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Plans the updates implied by a `Parent` edge already present in `index`.
    ///
    /// The parent is held fixed and the child side moves, except when the
    /// parent has no other lineage edge while the child does; then the child
    /// is held fixed and the parent moves. Spouse edges are ignored.
    pub fn plan_for_edge(
        &self,
        index: &GraphIndex,
        edge: &Relationship,
    ) -> Result<GenerationPlan, GenerationError> {
        if edge.kind == RelationshipType::Spouse {
            return Ok(GenerationPlan::default());
        }
        let (parent, child) = match edge.kind {
            RelationshipType::Child => (edge.to_member_id, edge.from_member_id),
            _ => (edge.from_member_id, edge.to_member_id),
        };
        let parent_generation = generation_of(index, parent);
        let child_generation = generation_of(index, child);

        let parent_is_fresh = index.lineage_degree(parent) <= 1;
        let child_is_fresh = index.lineage_degree(child) <= 1;
        if parent_is_fresh && !child_is_fresh {
            let value = step(child_generation, -1, parent)?;
            self.propagate(index, child, parent, value)
        } else {
            let value = step(parent_generation, 1, child)?;
            self.propagate(index, parent, child, value)
        }
    }

    /// Re-checks the components touched by a removed edge.
    ///
    /// Removing a constraint cannot break a consistent graph, so the plan is
    /// empty unless the stored state was already corrupt.
    pub fn plan_for_removal(
        &self,
        index: &GraphIndex,
        edge: &Relationship,
    ) -> Result<GenerationPlan, GenerationError> {
        if edge.kind.is_lineage() {
            let mut seen = HashSet::new();
            for endpoint in [edge.from_member_id, edge.to_member_id] {
                check_component(index, endpoint, &mut seen)?;
            }
        }
        Ok(GenerationPlan::default())
    }

    /// Checks every stored `Parent` edge of the index.
    pub fn verify(&self, index: &GraphIndex) -> Result<(), GenerationError> {
        for edge in index.edges() {
            if edge.kind == RelationshipType::Spouse {
                continue;
            }
            check_edge(index, edge.from_member_id, edge.to_member_id)?;
        }
        Ok(())
    }

    /// BFS from `start` (set to `start_value`) with `anchor` held fixed.
    ///
    /// A neighbor whose stored value already matches is pinned but not
    /// expanded; a neighbor pinned to a different value is a conflict.
    fn propagate(
        &self,
        index: &GraphIndex,
        anchor: MemberId,
        start: MemberId,
        start_value: Generation,
    ) -> Result<GenerationPlan, GenerationError> {
        let start_stored = generation_of(index, start);
        if start_stored == start_value {
            return Ok(GenerationPlan::default());
        }

        let mut pinned: HashMap<MemberId, Generation> = HashMap::new();
        pinned.insert(anchor, generation_of(index, anchor));
        pinned.insert(start, start_value);

        let mut changes = vec![GenerationChange {
            member_id: start,
            previous: start_stored,
            next: start_value,
        }];
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let value = pinned.get(&current).copied().unwrap_or_default();
            let parents = index
                .neighbors(current, RelationshipType::Parent, Direction::Incoming)
                .map(|parent| (parent, -1));
            let children = index
                .neighbors(current, RelationshipType::Parent, Direction::Outgoing)
                .map(|child| (child, 1));

            for (neighbor, delta) in parents.chain(children) {
                let expected = step(value, delta, neighbor)?;
                if let Some(&fixed) = pinned.get(&neighbor) {
                    if fixed != expected {
                        return Err(GenerationConflict {
                            member_id: neighbor,
                            expected,
                            actual: fixed,
                        }
                        .into());
                    }
                    continue;
                }

                let stored = generation_of(index, neighbor);
                pinned.insert(neighbor, expected);
                if stored == expected {
                    continue;
                }
                changes.push(GenerationChange {
                    member_id: neighbor,
                    previous: stored,
                    next: expected,
                });
                queue.push_back(neighbor);
            }
        }

        Ok(GenerationPlan { changes })
    }
}

fn generation_of(index: &GraphIndex, member_id: MemberId) -> Generation {
    index.member(member_id).map_or(0, |member| member.generation)
}

/// Generation one step away from `value`; overflow is reported against `target`.
fn step(
    value: Generation,
    delta: Generation,
    target: MemberId,
) -> Result<Generation, GenerationError> {
    value
        .checked_add(delta)
        .ok_or(GenerationError::OutOfRange { member_id: target })
}

fn check_edge(
    index: &GraphIndex,
    parent: MemberId,
    child: MemberId,
) -> Result<(), GenerationError> {
    let parent_generation = generation_of(index, parent);
    let child_generation = generation_of(index, child);
    let expected = step(parent_generation, 1, child)?;
    if child_generation != expected {
        return Err(GenerationConflict {
            member_id: child,
            expected,
            actual: child_generation,
        }
        .into());
    }
    Ok(())
}

fn check_component(
    index: &GraphIndex,
    start: MemberId,
    seen: &mut HashSet<MemberId>,
) -> Result<(), GenerationError> {
    if !seen.insert(start) {
        return Ok(());
    }
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for child in index.neighbors(current, RelationshipType::Parent, Direction::Outgoing) {
            check_edge(index, current, child)?;
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
        for parent in index.neighbors(current, RelationshipType::Parent, Direction::Incoming) {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(())
}
