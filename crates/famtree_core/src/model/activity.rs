//! Activity (audit) record produced for every accepted mutation.
//!
//! # Invariants
//! - Exactly one record per accepted relationship or member mutation.
//! - Records are produced by the engine but owned by the recorder.

use crate::model::family::FamilyId;
use crate::model::member::FamilyMember;
use crate::model::relationship::RelationshipType;
use crate::model::{now_epoch_ms, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of change captured by an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    New,
    Update,
    Delete,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Kind of record an activity entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityTarget {
    Relationship,
    FamilyMember,
}

impl ActivityTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relationship => "RELATIONSHIP",
            Self::FamilyMember => "FAMILY_MEMBER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RELATIONSHIP" => Some(Self::Relationship),
            "FAMILY_MEMBER" => Some(Self::FamilyMember),
            _ => None,
        }
    }
}

/// One audit entry handed to the activity recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub family_id: FamilyId,
    pub acting_user_id: UserId,
    pub action: ActivityAction,
    pub target_type: ActivityTarget,
    pub target_id: Uuid,
    /// Human-readable summary shown in the family activity feed.
    pub content: String,
    pub created_at: i64,
}

impl ActivityRecord {
    pub fn new(
        family_id: FamilyId,
        acting_user_id: UserId,
        action: ActivityAction,
        target_type: ActivityTarget,
        target_id: Uuid,
        content: impl Into<String>,
    ) -> Self {
        Self {
            family_id,
            acting_user_id,
            action,
            target_type,
            target_id,
            content: content.into(),
            created_at: now_epoch_ms(),
        }
    }

    /// Record for a relationship being added or removed.
    pub fn relationship(
        acting_user_id: UserId,
        action: ActivityAction,
        relationship_id: Uuid,
        kind: RelationshipType,
        from: &FamilyMember,
        to: &FamilyMember,
    ) -> Self {
        let verb = match action {
            ActivityAction::New => "is now",
            ActivityAction::Update => "remains",
            ActivityAction::Delete => "is no longer",
        };
        let role = match kind {
            RelationshipType::Parent => "parent of",
            RelationshipType::Child => "child of",
            RelationshipType::Spouse => "spouse of",
        };
        Self::new(
            from.family_id,
            acting_user_id,
            action,
            ActivityTarget::Relationship,
            relationship_id,
            format!("{} {verb} {role} {}", from.full_name, to.full_name),
        )
    }

    /// Record for a member being added, edited or removed.
    pub fn member(acting_user_id: UserId, action: ActivityAction, member: &FamilyMember) -> Self {
        let content = match action {
            ActivityAction::New => format!("{} joined the family tree", member.full_name),
            ActivityAction::Update => format!("{}'s profile was updated", member.full_name),
            ActivityAction::Delete => format!("{} was removed from the family tree", member.full_name),
        };
        Self::new(
            member.family_id,
            acting_user_id,
            action,
            ActivityTarget::FamilyMember,
            member.id,
            content,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityAction, ActivityRecord, ActivityTarget};
    use crate::model::member::{FamilyMember, Gender, MemberProfile};
    use crate::model::relationship::RelationshipType;
    use uuid::Uuid;

    #[test]
    fn relationship_record_summarizes_both_endpoints() {
        let family_id = Uuid::new_v4();
        let alice = FamilyMember::new(
            family_id,
            MemberProfile::living("Alice", Gender::Female, 0).into(),
        )
        .unwrap();
        let bob =
            FamilyMember::new(family_id, MemberProfile::living("Bob", Gender::Male, 0).into())
                .unwrap();

        let edge_id = Uuid::new_v4();
        let record = ActivityRecord::relationship(
            Uuid::new_v4(),
            ActivityAction::New,
            edge_id,
            RelationshipType::Parent,
            &alice,
            &bob,
        );
        assert_eq!(record.family_id, family_id);
        assert_eq!(record.target_type, ActivityTarget::Relationship);
        assert_eq!(record.target_id, edge_id);
        assert_eq!(record.content, "Alice is now parent of Bob");
    }

    #[test]
    fn action_and_target_strings_round_trip() {
        for action in [ActivityAction::New, ActivityAction::Update, ActivityAction::Delete] {
            assert_eq!(ActivityAction::parse(action.as_str()), Some(action));
        }
        for target in [ActivityTarget::Relationship, ActivityTarget::FamilyMember] {
            assert_eq!(ActivityTarget::parse(target.as_str()), Some(target));
        }
    }
}
