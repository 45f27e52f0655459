//! Member lifecycle use cases and member reads.
//!
//! # Responsibility
//! - Create, edit and remove person nodes of one family.
//! - Create a member together with its first edge as one atomic step.
//!
//! # Invariants
//! - Profile edits never touch `generation`.
//! - A member is only removed once no relationship references it.

use crate::graph::validator::Rejection;
use crate::model::activity::{ActivityAction, ActivityRecord};
use crate::model::family::FamilyId;
use crate::model::member::{
    FamilyMember, Generation, MemberId, MemberProfile, MemberWarning, NewMember,
};
use crate::model::relationship::{Direction, Relationship, RelationshipId, RelationshipType};
use crate::model::UserId;
use crate::repo::activity::ActivityRecorder;
use crate::repo::store::{FamilyStore, GraphDelta};
use crate::service::graph_service::{FamilyGraphService, GraphServiceResult, Staged};
use crate::service::mutation::{MutationPhase, MutationTrace};
use crate::service::relationship_service::{changed_members, relationship_record};
use log::info;

/// Stored member plus the soft findings about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberWrite {
    pub member: FamilyMember,
    pub warnings: Vec<MemberWarning>,
}

impl MemberWrite {
    fn new(member: FamilyMember) -> Self {
        let warnings = member.warnings();
        Self { member, warnings }
    }
}

impl<S: FamilyStore, R: ActivityRecorder> FamilyGraphService<S, R> {
    /// Adds a standalone member at generation 0 or the requested one.
    pub fn add_member(
        &self,
        family_id: FamilyId,
        request: NewMember,
        acting_user_id: UserId,
    ) -> GraphServiceResult<MemberWrite> {
        let member = FamilyMember::new(family_id, request)?;
        let mut trace = MutationTrace::start("member_add", family_id);

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            trace.advance(MutationPhase::Mutating);
            if let Err(err) = graph.index_mut().insert_member(member.clone()) {
                let rejection = Rejection::from(err);
                trace.reject(&rejection);
                return Err(rejection.into());
            }
            graph.touch();
            trace.committed(member.id);

            for warning in member.warnings() {
                info!(
                    "event=member_warning module=service family_id={} member_id={} code={}",
                    family_id,
                    member.id,
                    warning.code()
                );
            }

            Ok(Staged {
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    upserted_members: vec![member.clone()],
                    ..GraphDelta::default()
                },
                records: vec![ActivityRecord::member(
                    acting_user_id,
                    ActivityAction::New,
                    &member,
                )],
                value: MemberWrite::new(member),
            })
        })
    }

    /// Adds a member and the edge `new member -> anchor` of `kind` together.
    ///
    /// `Child` makes the new member a child of `anchor`, `Parent` a parent of
    /// it. Without a requested generation the member is placed relative to
    /// `anchor`, so the anchor's side never moves. When the edge is rejected
    /// the member is not created either.
    pub fn add_member_with_relationship(
        &self,
        family_id: FamilyId,
        request: NewMember,
        anchor_id: MemberId,
        kind: RelationshipType,
        acting_user_id: UserId,
    ) -> GraphServiceResult<(MemberWrite, RelationshipId)> {
        let place_beside_anchor = request.generation.is_none();
        let member = FamilyMember::new(family_id, request)?;
        let mut trace = MutationTrace::start("member_add_linked", family_id);

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            if let Err(err) = graph.index_mut().insert_member(member.clone()) {
                let rejection = Rejection::from(err);
                trace.reject(&rejection);
                return Err(rejection.into());
            }
            let verdict = self
                .validator()
                .validate_add(graph.index(), family_id, member.id, anchor_id, kind)
                .into_result();
            if let Err(rejection) = verdict {
                let _ = graph.index_mut().remove_member(member.id);
                trace.reject(&rejection);
                return Err(rejection.into());
            }

            trace.advance(MutationPhase::Mutating);
            if place_beside_anchor {
                let placed = graph
                    .index()
                    .member(anchor_id)
                    .and_then(|anchor| generation_beside(anchor.generation, kind));
                let Some(generation) = placed else {
                    let _ = graph.index_mut().remove_member(member.id);
                    let rejection = Rejection::GenerationOutOfRange {
                        member_id: member.id,
                    };
                    trace.reject(&rejection);
                    return Err(rejection.into());
                };
                let _ = graph.index_mut().set_generation(member.id, generation);
            }
            let edge = Relationship::new(family_id, member.id, anchor_id, kind);
            let edge_record =
                match relationship_record(graph, acting_user_id, ActivityAction::New, &edge) {
                    Ok(record) => record,
                    Err(rejection) => {
                        let _ = graph.index_mut().remove_member(member.id);
                        trace.reject(&rejection);
                        return Err(rejection.into());
                    }
                };
            let (edge, plan) = match self.link(graph, &mut trace, edge) {
                Ok(linked) => linked,
                Err(rejection) => {
                    let _ = graph.index_mut().remove_member(member.id);
                    return Err(rejection.into());
                }
            };
            graph.touch();
            trace.committed(edge.id);

            let mut upserted = vec![graph
                .index()
                .member(member.id)
                .cloned()
                .unwrap_or_else(|| member.clone())];
            upserted.extend(
                changed_members(graph, &plan)
                    .into_iter()
                    .filter(|changed| changed.id != member.id),
            );
            let stored = upserted[0].clone();

            Ok(Staged {
                value: (MemberWrite::new(stored.clone()), edge.id),
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    upserted_members: upserted,
                    added_relationships: vec![edge],
                    ..GraphDelta::default()
                },
                records: vec![
                    ActivityRecord::member(acting_user_id, ActivityAction::New, &stored),
                    edge_record,
                ],
            })
        })
    }

    /// Replaces the editable profile of one member.
    pub fn update_member_profile(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
        profile: MemberProfile,
        acting_user_id: UserId,
    ) -> GraphServiceResult<MemberWrite> {
        let mut trace = MutationTrace::start("member_update", family_id);

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            let Some(member) = graph.index_mut().member_mut(member_id) else {
                let rejection = Rejection::NotFound(member_id);
                trace.reject(&rejection);
                return Err(rejection.into());
            };
            trace.advance(MutationPhase::Mutating);
            member.apply_profile(profile)?;
            let member = member.clone();
            graph.touch();
            trace.committed(member_id);

            Ok(Staged {
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    upserted_members: vec![member.clone()],
                    ..GraphDelta::default()
                },
                records: vec![ActivityRecord::member(
                    acting_user_id,
                    ActivityAction::Update,
                    &member,
                )],
                value: MemberWrite::new(member),
            })
        })
    }

    /// Removes a member that no relationship references any more.
    pub fn remove_member(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
        acting_user_id: UserId,
    ) -> GraphServiceResult<FamilyMember> {
        let mut trace = MutationTrace::start("member_remove", family_id);

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            let in_use = graph.index().contains_member(member_id)
                && !graph.index().incident_edges(member_id).is_empty();
            if in_use {
                let rejection = Rejection::MemberInUse { member_id };
                trace.reject(&rejection);
                return Err(rejection.into());
            }
            trace.advance(MutationPhase::Mutating);
            let member = match graph.index_mut().remove_member(member_id) {
                Ok(member) => member,
                Err(err) => {
                    let rejection = Rejection::from(err);
                    trace.reject(&rejection);
                    return Err(rejection.into());
                }
            };
            graph.touch();
            trace.committed(member_id);

            Ok(Staged {
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    removed_members: vec![member_id],
                    ..GraphDelta::default()
                },
                records: vec![ActivityRecord::member(
                    acting_user_id,
                    ActivityAction::Delete,
                    &member,
                )],
                value: member,
            })
        })
    }

    pub fn member(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
    ) -> GraphServiceResult<Option<FamilyMember>> {
        self.read(family_id, |graph| graph.index().member(member_id).cloned())
    }

    /// Members in insertion order.
    pub fn members(&self, family_id: FamilyId) -> GraphServiceResult<Vec<FamilyMember>> {
        self.read(family_id, |graph| graph.index().members().cloned().collect())
    }

    pub fn generation_of(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
    ) -> GraphServiceResult<Option<Generation>> {
        self.read(family_id, |graph| {
            graph.index().member(member_id).map(|member| member.generation)
        })
    }

    /// Adjacent members for one kind and direction.
    pub fn neighbors(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
        kind: RelationshipType,
        direction: Direction,
    ) -> GraphServiceResult<Vec<MemberId>> {
        self.read(family_id, |graph| {
            graph.index().neighbors(member_id, kind, direction).collect()
        })
    }

    /// Members without a recorded parent.
    pub fn roots(&self, family_id: FamilyId) -> GraphServiceResult<Vec<MemberId>> {
        self.read(family_id, |graph| graph.index().roots())
    }

    /// Every ancestor of `member_id`, nearest first.
    pub fn ancestors(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
    ) -> GraphServiceResult<Vec<MemberId>> {
        self.read(family_id, |graph| {
            graph
                .index()
                .reachable(member_id, &[RelationshipType::Child])
        })
    }

    /// Every descendant of `member_id`, nearest first.
    pub fn descendants(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
    ) -> GraphServiceResult<Vec<MemberId>> {
        self.read(family_id, |graph| {
            graph
                .index()
                .reachable(member_id, &[RelationshipType::Parent])
        })
    }
}

/// Generation of a member linked to an anchor at `anchor` by `kind`.
fn generation_beside(anchor: Generation, kind: RelationshipType) -> Option<Generation> {
    match kind {
        RelationshipType::Parent => anchor.checked_sub(1),
        RelationshipType::Child => anchor.checked_add(1),
        RelationshipType::Spouse => Some(anchor),
    }
}
