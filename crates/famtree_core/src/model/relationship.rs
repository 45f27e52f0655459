//! Relationship (typed directed edge) model.
//!
//! # Responsibility
//! - Define edge kinds and the canonical stored form of an edge.
//! - Derive the CHILD view of a PARENT edge instead of storing it.
//!
//! # Invariants
//! - Stored edges are always `Parent` or `Spouse`; a `Child` request is
//!   rewritten to the `Parent` edge pointing the other way.
//! - `Parent` from A to B means "A is parent of B".
//! - `Spouse` is symmetric; `EdgeKey` orders its endpoints so `(A, B)` and
//!   `(B, A)` collide.

use crate::model::family::FamilyId;
use crate::model::member::MemberId;
use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable relationship identifier.
pub type RelationshipId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Parent,
    Spouse,
    Child,
}

impl RelationshipType {
    /// Kind of the same fact seen from the other endpoint.
    pub fn inverse(self) -> Self {
        match self {
            Self::Parent => Self::Child,
            Self::Child => Self::Parent,
            Self::Spouse => Self::Spouse,
        }
    }

    /// Returns whether this kind participates in ancestry.
    pub fn is_lineage(self) -> bool {
        matches!(self, Self::Parent | Self::Child)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Spouse => "spouse",
            Self::Child => "child",
        }
    }
}

/// Direction of traversal relative to an edge's `from -> to` orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Canonical identity of an edge fact, used for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from: MemberId,
    pub to: MemberId,
    pub kind: RelationshipType,
}

impl EdgeKey {
    pub fn canonical(from: MemberId, to: MemberId, kind: RelationshipType) -> Self {
        match kind {
            RelationshipType::Parent => Self { from, to, kind },
            RelationshipType::Child => Self {
                from: to,
                to: from,
                kind: RelationshipType::Parent,
            },
            RelationshipType::Spouse => Self {
                from: from.min(to),
                to: from.max(to),
                kind,
            },
        }
    }
}

/// Read-only view of one half of an edge fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeView {
    pub id: RelationshipId,
    pub from_member_id: MemberId,
    pub to_member_id: MemberId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
}

/// Stored relationship edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub family_id: FamilyId,
    pub from_member_id: MemberId,
    pub to_member_id: MemberId,
    /// Serialized as `type` to match the external schema naming.
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Relationship {
    /// Creates a new edge in canonical stored form with a generated id.
    pub fn new(
        family_id: FamilyId,
        from_member_id: MemberId,
        to_member_id: MemberId,
        kind: RelationshipType,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), family_id, from_member_id, to_member_id, kind)
    }

    /// Same as [`Relationship::new`] with a caller-provided id.
    pub fn with_id(
        id: RelationshipId,
        family_id: FamilyId,
        from_member_id: MemberId,
        to_member_id: MemberId,
        kind: RelationshipType,
    ) -> Self {
        let now = now_epoch_ms();
        let (from_member_id, to_member_id, kind) = match kind {
            RelationshipType::Child => (to_member_id, from_member_id, RelationshipType::Parent),
            other => (from_member_id, to_member_id, other),
        };
        Self {
            id,
            family_id,
            from_member_id,
            to_member_id,
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rewrites a `Child` edge into its stored `Parent` orientation.
    pub fn into_canonical(self) -> Self {
        if self.kind != RelationshipType::Child {
            return self;
        }
        Self {
            from_member_id: self.to_member_id,
            to_member_id: self.from_member_id,
            kind: RelationshipType::Parent,
            ..self
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::canonical(self.from_member_id, self.to_member_id, self.kind)
    }

    /// Stored orientation of this edge.
    pub fn view(&self) -> EdgeView {
        EdgeView {
            id: self.id,
            from_member_id: self.from_member_id,
            to_member_id: self.to_member_id,
            kind: self.kind,
        }
    }

    /// Mirrored half: the CHILD view of a PARENT edge, or the reversed SPOUSE.
    pub fn inverse(&self) -> EdgeView {
        EdgeView {
            id: self.id,
            from_member_id: self.to_member_id,
            to_member_id: self.from_member_id,
            kind: self.kind.inverse(),
        }
    }

    /// Returns whether `member_id` is one of the endpoints.
    pub fn touches(&self, member_id: MemberId) -> bool {
        self.from_member_id == member_id || self.to_member_id == member_id
    }

    /// Returns the endpoint opposite to `member_id`, if it is an endpoint.
    pub fn other_endpoint(&self, member_id: MemberId) -> Option<MemberId> {
        if self.from_member_id == member_id {
            Some(self.to_member_id)
        } else if self.to_member_id == member_id {
            Some(self.from_member_id)
        } else {
            None
        }
    }
}
