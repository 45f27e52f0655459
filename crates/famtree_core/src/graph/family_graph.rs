//! Per-family graph context.
//!
//! # Responsibility
//! - Pair one `Family` record with the `GraphIndex` holding its members and
//!   edges.
//! - Rebuild that pair from collaborator-provided records, rejecting
//!   corrupted state instead of repairing it.
//!
//! # Invariants
//! - Every member and edge in the index belongs to `family.id`.
//! - A hydrated graph has no ancestry cycle and consistent generations.

use crate::graph::generation::{GenerationCalculator, GenerationError};
use crate::graph::index::{GraphIndex, IndexError};
use crate::model::family::{Family, FamilyId, FamilyValidationError};
use crate::model::member::{FamilyMember, MemberId, MemberValidationError};
use crate::model::relationship::{Relationship, RelationshipId, RelationshipType};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Corrupted records found while hydrating a family graph. Fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphLoadError {
    InvalidFamily(FamilyValidationError),
    InvalidMember {
        member_id: MemberId,
        source: MemberValidationError,
    },
    ForeignMember {
        member_id: MemberId,
        family_id: FamilyId,
    },
    DuplicateMember(MemberId),
    ForeignRelationship(RelationshipId),
    UnknownEndpoint {
        relationship_id: RelationshipId,
        member_id: MemberId,
    },
    SelfRelationship(RelationshipId),
    DuplicateRelationship(RelationshipId),
    CyclicAncestry(RelationshipId),
    InconsistentGeneration(GenerationError),
}

impl Display for GraphLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFamily(err) => write!(f, "invalid family record: {err}"),
            Self::InvalidMember { member_id, source } => {
                write!(f, "invalid member record {member_id}: {source}")
            }
            Self::ForeignMember {
                member_id,
                family_id,
            } => write!(f, "member {member_id} belongs to family {family_id}"),
            Self::DuplicateMember(id) => write!(f, "duplicate member record: {id}"),
            Self::ForeignRelationship(id) => {
                write!(f, "relationship {id} belongs to another family")
            }
            Self::UnknownEndpoint {
                relationship_id,
                member_id,
            } => write!(
                f,
                "relationship {relationship_id} references unknown member {member_id}"
            ),
            Self::SelfRelationship(id) => write!(f, "relationship {id} links a member to itself"),
            Self::DuplicateRelationship(id) => write!(f, "duplicate relationship record: {id}"),
            Self::CyclicAncestry(id) => write!(f, "relationship {id} closes an ancestry cycle"),
            Self::InconsistentGeneration(conflict) => write!(f, "{conflict}"),
        }
    }
}

impl Error for GraphLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFamily(err) => Some(err),
            Self::InvalidMember { source, .. } => Some(source),
            Self::InconsistentGeneration(conflict) => Some(conflict),
            _ => None,
        }
    }
}

/// Materialized graph of one family.
#[derive(Debug, Clone)]
pub struct FamilyGraph {
    family: Family,
    index: GraphIndex,
}

impl FamilyGraph {
    /// Empty graph for a newly created family.
    pub fn new(family: Family) -> Self {
        let index = GraphIndex::new(family.id);
        Self { family, index }
    }

    /// Rebuilds a graph from stored records.
    pub fn hydrate(
        family: Family,
        members: Vec<FamilyMember>,
        relationships: Vec<Relationship>,
        calculator: &GenerationCalculator,
    ) -> Result<Self, GraphLoadError> {
        family.validate().map_err(GraphLoadError::InvalidFamily)?;
        let mut graph = Self::new(family);

        for member in members {
            member
                .validate()
                .map_err(|source| GraphLoadError::InvalidMember {
                    member_id: member.id,
                    source,
                })?;
            let member_id = member.id;
            let member_family = member.family_id;
            graph
                .index
                .insert_member(member)
                .map_err(|err| match err {
                    IndexError::FamilyMismatch { .. } => GraphLoadError::ForeignMember {
                        member_id,
                        family_id: member_family,
                    },
                    _ => GraphLoadError::DuplicateMember(member_id),
                })?;
        }

        for relationship in relationships {
            let relationship = relationship.into_canonical();
            let relationship_id = relationship.id;
            if relationship.family_id != graph.family.id {
                return Err(GraphLoadError::ForeignRelationship(relationship_id));
            }
            for member_id in [relationship.from_member_id, relationship.to_member_id] {
                if !graph.index.contains_member(member_id) {
                    return Err(GraphLoadError::UnknownEndpoint {
                        relationship_id,
                        member_id,
                    });
                }
            }
            if relationship.from_member_id == relationship.to_member_id {
                return Err(GraphLoadError::SelfRelationship(relationship_id));
            }
            if relationship.kind == RelationshipType::Parent
                && graph.index.has_path(
                    relationship.to_member_id,
                    relationship.from_member_id,
                    &[RelationshipType::Parent],
                )
            {
                return Err(GraphLoadError::CyclicAncestry(relationship_id));
            }
            graph
                .index
                .add_edge(relationship)
                .map_err(|_| GraphLoadError::DuplicateRelationship(relationship_id))?;
        }

        calculator
            .verify(&graph.index)
            .map_err(GraphLoadError::InconsistentGeneration)?;
        Ok(graph)
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn family_id(&self) -> FamilyId {
        self.family.id
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut GraphIndex {
        &mut self.index
    }

    pub(crate) fn touch(&mut self) {
        self.family.touch();
    }

    /// Owned copies of all records, members in insertion order.
    pub fn records(&self) -> (Family, Vec<FamilyMember>, Vec<Relationship>) {
        let members = self.index.members().cloned().collect();
        let mut relationships: Vec<Relationship> = self.index.edges().cloned().collect();
        relationships.sort_by_key(|edge| (edge.created_at, edge.id));
        (self.family.clone(), members, relationships)
    }
}
