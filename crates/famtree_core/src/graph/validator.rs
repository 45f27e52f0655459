//! Structural rules checked before a relationship mutation touches the index.
//!
//! # Responsibility
//! - Decide whether a proposed edge keeps one family graph consistent.
//! - Model every expected domain violation as a `Rejection` value.
//!
//! # Invariants
//! - Rules run in a fixed order and the first failure wins.
//! - Validation never mutates the index.
//!
//! Rule order for additions:
//! 1. both endpoints are members of the family (`CrossFamilyReference`)
//! 2. endpoints differ (`SelfRelationship`)
//! 3. the fact is not already stored (`DuplicateEdge`)
//! 4. lineage edges do not close an ancestry cycle (`CyclicAncestry`)
//! 5. spouses are not already parent and child (`IncestuousRelationship`)
//! 6. the child stays within the parent limit (`TooManyParents`)

use crate::graph::index::{GraphIndex, IndexError};
use crate::model::family::FamilyId;
use crate::model::member::{Generation, MemberId};
use crate::model::relationship::{RelationshipId, RelationshipType};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Default upper bound on parents per member.
pub const DEFAULT_MAX_PARENTS: usize = 2;

/// Configurable domain rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphPolicy {
    /// Maximum parents per member; `None` disables the limit (adoption,
    /// step-parents and donor records).
    pub max_parents: Option<usize>,
    /// Rejects a spouse edge between two members already linked as parent
    /// and child.
    pub reject_spouse_of_parent_child: bool,
}

impl Default for GraphPolicy {
    fn default() -> Self {
        Self {
            max_parents: Some(DEFAULT_MAX_PARENTS),
            reject_spouse_of_parent_child: true,
        }
    }
}

/// Domain rejection. Always returned as a value and safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Endpoint is not a member of the family being mutated.
    CrossFamilyReference { member_id: MemberId },
    SelfRelationship { member_id: MemberId },
    DuplicateEdge { existing: RelationshipId },
    /// Edge would make `ancestor` its own descendant.
    CyclicAncestry {
        ancestor: MemberId,
        descendant: MemberId,
    },
    /// Spouse edge between members already linked by `existing`.
    IncestuousRelationship { existing: RelationshipId },
    TooManyParents { member_id: MemberId, limit: usize },
    /// Two ancestry paths disagree on the relative depth of `member_id`.
    InconsistentGeneration {
        member_id: MemberId,
        expected: Generation,
        actual: Generation,
    },
    /// The generation implied for `member_id` does not fit the numeric range.
    GenerationOutOfRange { member_id: MemberId },
    /// Relationship, member or family does not exist.
    NotFound(Uuid),
    /// Member cannot be removed while relationships reference it.
    MemberInUse { member_id: MemberId },
}

impl Rejection {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CrossFamilyReference { .. } => "cross_family_reference",
            Self::SelfRelationship { .. } => "self_relationship",
            Self::DuplicateEdge { .. } => "duplicate_edge",
            Self::CyclicAncestry { .. } => "cyclic_ancestry",
            Self::IncestuousRelationship { .. } => "incestuous_relationship",
            Self::TooManyParents { .. } => "too_many_parents",
            Self::InconsistentGeneration { .. } => "inconsistent_generation",
            Self::GenerationOutOfRange { .. } => "generation_out_of_range",
            Self::NotFound(_) => "not_found",
            Self::MemberInUse { .. } => "member_in_use",
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CrossFamilyReference { member_id } => {
                write!(f, "member {member_id} does not belong to this family")
            }
            Self::SelfRelationship { member_id } => {
                write!(f, "member {member_id} cannot be related to themselves")
            }
            Self::DuplicateEdge { existing } => {
                write!(f, "relationship already exists: {existing}")
            }
            Self::CyclicAncestry {
                ancestor,
                descendant,
            } => write!(
                f,
                "member {ancestor} would become their own ancestor through {descendant}"
            ),
            Self::IncestuousRelationship { existing } => write!(
                f,
                "members are already related as parent and child by {existing}"
            ),
            Self::TooManyParents { member_id, limit } => {
                write!(f, "member {member_id} already has {limit} parents")
            }
            Self::InconsistentGeneration {
                member_id,
                expected,
                actual,
            } => write!(
                f,
                "member {member_id} would need generation {expected} but is fixed at {actual}"
            ),
            Self::GenerationOutOfRange { member_id } => {
                write!(f, "member {member_id} would leave the supported generation range")
            }
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::MemberInUse { member_id } => {
                write!(f, "member {member_id} still has relationships")
            }
        }
    }
}

impl Error for Rejection {}

/// Raw index failures seen by callers that skipped or raced validation.
impl From<IndexError> for Rejection {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::AlreadyExists(existing) | IndexError::MemberAlreadyExists(existing) => {
                Self::DuplicateEdge { existing }
            }
            IndexError::NotFound(id) | IndexError::MemberNotFound(id) => Self::NotFound(id),
            IndexError::MemberInUse(member_id) => Self::MemberInUse { member_id },
            IndexError::FamilyMismatch { actual, .. } => {
                Self::CrossFamilyReference { member_id: actual }
            }
        }
    }
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Accepted => Ok(()),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

impl From<Result<(), Rejection>> for Verdict {
    fn from(value: Result<(), Rejection>) -> Self {
        match value {
            Ok(()) => Self::Accepted,
            Err(rejection) => Self::Rejected(rejection),
        }
    }
}

/// Stateless rule set parameterized by policy.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: GraphPolicy,
}

impl Validator {
    pub fn new(policy: GraphPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GraphPolicy {
        &self.policy
    }

    /// Checks a proposed edge `from -> to` of `kind` against the index.
    pub fn validate_add(
        &self,
        index: &GraphIndex,
        family_id: FamilyId,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
    ) -> Verdict {
        self.check_add(index, family_id, from, to, kind).into()
    }

    /// Checks that `edge_id` can be removed from the family.
    pub fn validate_remove(
        &self,
        index: &GraphIndex,
        family_id: FamilyId,
        edge_id: RelationshipId,
    ) -> Verdict {
        match index.edge(edge_id) {
            Some(edge) if edge.family_id == family_id && index.family_id() == family_id => {
                Verdict::Accepted
            }
            _ => Verdict::Rejected(Rejection::NotFound(edge_id)),
        }
    }

    fn check_add(
        &self,
        index: &GraphIndex,
        family_id: FamilyId,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
    ) -> Result<(), Rejection> {
        for member_id in [from, to] {
            ensure_member_of(index, family_id, member_id)?;
        }

        if from == to {
            return Err(Rejection::SelfRelationship { member_id: from });
        }

        if let Some(existing) = index.find_edge(from, to, kind) {
            return Err(Rejection::DuplicateEdge { existing });
        }

        match kind {
            RelationshipType::Parent | RelationshipType::Child => {
                let (parent, child) = lineage_endpoints(from, to, kind);
                if index.has_path(child, parent, &[RelationshipType::Parent]) {
                    return Err(Rejection::CyclicAncestry {
                        ancestor: child,
                        descendant: parent,
                    });
                }
                if let Some(limit) = self.policy.max_parents {
                    if index.parent_count(child) >= limit {
                        return Err(Rejection::TooManyParents {
                            member_id: child,
                            limit,
                        });
                    }
                }
            }
            RelationshipType::Spouse => {
                if self.policy.reject_spouse_of_parent_child {
                    let existing = index
                        .find_edge(from, to, RelationshipType::Parent)
                        .or_else(|| index.find_edge(to, from, RelationshipType::Parent));
                    if let Some(existing) = existing {
                        return Err(Rejection::IncestuousRelationship { existing });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Returns `(parent, child)` for a lineage request.
pub fn lineage_endpoints(
    from: MemberId,
    to: MemberId,
    kind: RelationshipType,
) -> (MemberId, MemberId) {
    match kind {
        RelationshipType::Child => (to, from),
        _ => (from, to),
    }
}

fn ensure_member_of(
    index: &GraphIndex,
    family_id: FamilyId,
    member_id: MemberId,
) -> Result<(), Rejection> {
    match index.member(member_id) {
        Some(member) if member.family_id == family_id && index.family_id() == family_id => Ok(()),
        _ => Err(Rejection::CrossFamilyReference { member_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::{GraphPolicy, Rejection, Validator, Verdict};
    use crate::graph::index::{GraphIndex, IndexError};
    use crate::model::member::{FamilyMember, Gender, MemberId, MemberProfile};
    use crate::model::relationship::{Relationship, RelationshipType};
    use uuid::Uuid;

    fn family(size: usize) -> (GraphIndex, Vec<MemberId>) {
        let family_id = Uuid::new_v4();
        let mut index = GraphIndex::new(family_id);
        let mut ids = Vec::new();
        for position in 0..size {
            let member = FamilyMember::new(
                family_id,
                MemberProfile::living(format!("Member {position}"), Gender::Other, 0).into(),
            )
            .unwrap();
            ids.push(member.id);
            index.insert_member(member).unwrap();
        }
        (index, ids)
    }

    fn link(index: &mut GraphIndex, from: MemberId, to: MemberId, kind: RelationshipType) {
        let family_id = index.family_id();
        index
            .add_edge(Relationship::new(family_id, from, to, kind))
            .unwrap();
    }

    #[test]
    fn unknown_member_is_cross_family_reference() {
        let (index, ids) = family(1);
        let stranger = Uuid::new_v4();
        let verdict = Validator::default().validate_add(
            &index,
            index.family_id(),
            ids[0],
            stranger,
            RelationshipType::Parent,
        );
        assert_eq!(
            verdict,
            Verdict::Rejected(Rejection::CrossFamilyReference {
                member_id: stranger
            })
        );
    }

    #[test]
    fn cross_family_check_runs_before_self_check() {
        let (index, ids) = family(1);
        let verdict = Validator::default().validate_add(
            &index,
            Uuid::new_v4(),
            ids[0],
            ids[0],
            RelationshipType::Spouse,
        );
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection::CrossFamilyReference { .. })
        ));
    }

    #[test]
    fn child_request_duplicates_existing_parent_edge() {
        let (mut index, ids) = family(2);
        link(&mut index, ids[0], ids[1], RelationshipType::Parent);
        let verdict = Validator::default().validate_add(
            &index,
            index.family_id(),
            ids[1],
            ids[0],
            RelationshipType::Child,
        );
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection::DuplicateEdge { .. })
        ));
    }

    #[test]
    fn grandchild_cannot_become_grandparent() {
        let (mut index, ids) = family(3);
        link(&mut index, ids[0], ids[1], RelationshipType::Parent);
        link(&mut index, ids[1], ids[2], RelationshipType::Parent);

        let verdict = Validator::default().validate_add(
            &index,
            index.family_id(),
            ids[2],
            ids[0],
            RelationshipType::Parent,
        );
        assert_eq!(
            verdict,
            Verdict::Rejected(Rejection::CyclicAncestry {
                ancestor: ids[0],
                descendant: ids[2],
            })
        );
    }

    #[test]
    fn spouse_of_parent_toggle() {
        let (mut index, ids) = family(2);
        link(&mut index, ids[0], ids[1], RelationshipType::Parent);

        let strict = Validator::default().validate_add(
            &index,
            index.family_id(),
            ids[1],
            ids[0],
            RelationshipType::Spouse,
        );
        assert!(matches!(
            strict,
            Verdict::Rejected(Rejection::IncestuousRelationship { .. })
        ));

        let lenient = Validator::new(GraphPolicy {
            reject_spouse_of_parent_child: false,
            ..GraphPolicy::default()
        })
        .validate_add(
            &index,
            index.family_id(),
            ids[1],
            ids[0],
            RelationshipType::Spouse,
        );
        assert!(lenient.is_accepted());
    }

    #[test]
    fn parent_limit_is_configurable() {
        let (mut index, ids) = family(4);
        link(&mut index, ids[0], ids[3], RelationshipType::Parent);
        link(&mut index, ids[1], ids[3], RelationshipType::Parent);

        let verdict = Validator::default().validate_add(
            &index,
            index.family_id(),
            ids[2],
            ids[3],
            RelationshipType::Parent,
        );
        assert_eq!(
            verdict,
            Verdict::Rejected(Rejection::TooManyParents {
                member_id: ids[3],
                limit: 2,
            })
        );

        let unlimited = Validator::new(GraphPolicy {
            max_parents: None,
            ..GraphPolicy::default()
        });
        assert!(unlimited
            .validate_add(
                &index,
                index.family_id(),
                ids[2],
                ids[3],
                RelationshipType::Parent
            )
            .is_accepted());
    }

    #[test]
    fn remove_of_unknown_edge_is_not_found() {
        let (index, _) = family(0);
        let edge_id = Uuid::new_v4();
        assert_eq!(
            Validator::default().validate_remove(&index, index.family_id(), edge_id),
            Verdict::Rejected(Rejection::NotFound(edge_id))
        );
    }
}
