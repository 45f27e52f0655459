//! Relationship mutation use cases.
//!
//! # Responsibility
//! - Add and remove edges through validation, mutation and generation
//!   recomputation as one atomic step per family.
//! - Expose edge reads from either endpoint.
//!
//! # Invariants
//! - A rejected or cancelled call leaves adjacency and generations unchanged.
//! - Every committed call emits exactly one relationship activity record.
//! - Removing an edge never rewrites a stored generation.

use crate::graph::family_graph::FamilyGraph;
use crate::graph::generation::GenerationPlan;
use crate::graph::validator::Rejection;
use crate::model::activity::{ActivityAction, ActivityRecord};
use crate::model::family::FamilyId;
use crate::model::member::{FamilyMember, MemberId};
use crate::model::relationship::{EdgeView, Relationship, RelationshipId, RelationshipType};
use crate::model::UserId;
use crate::repo::activity::ActivityRecorder;
use crate::repo::store::{FamilyStore, GraphDelta};
use crate::service::graph_service::{
    FamilyGraphService, GraphServiceError, GraphServiceResult, Staged,
};
use crate::service::mutation::{CancelFlag, MutationPhase, MutationTrace};

impl<S: FamilyStore, R: ActivityRecorder> FamilyGraphService<S, R> {
    /// Adds `from -> to` of `kind` and returns the stored edge id.
    ///
    /// A `Child` request is stored as the mirrored `Parent` edge.
    pub fn add_relationship(
        &self,
        family_id: FamilyId,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
        acting_user_id: UserId,
    ) -> GraphServiceResult<RelationshipId> {
        self.add_relationship_cancellable(
            family_id,
            from,
            to,
            kind,
            acting_user_id,
            &CancelFlag::new(),
        )
    }

    pub fn add_relationship_cancellable(
        &self,
        family_id: FamilyId,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
        acting_user_id: UserId,
        cancel: &CancelFlag,
    ) -> GraphServiceResult<RelationshipId> {
        let mut trace = MutationTrace::start("relationship_add", family_id);
        if trace.cancelled(cancel) {
            return Err(GraphServiceError::Cancelled);
        }

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            if let Err(rejection) = self
                .validator()
                .validate_add(graph.index(), family_id, from, to, kind)
                .into_result()
            {
                trace.reject(&rejection);
                return Err(rejection.into());
            }
            if trace.cancelled(cancel) {
                return Err(GraphServiceError::Cancelled);
            }

            trace.advance(MutationPhase::Mutating);
            let edge = Relationship::new(family_id, from, to, kind);
            let record = relationship_record(graph, acting_user_id, ActivityAction::New, &edge)?;
            let (edge, plan) = self.link(graph, &mut trace, edge)?;
            graph.touch();
            trace.committed(edge.id);

            Ok(Staged {
                value: edge.id,
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    upserted_members: changed_members(graph, &plan),
                    added_relationships: vec![edge],
                    ..GraphDelta::default()
                },
                records: vec![record],
            })
        })
    }

    /// Removes one edge (and with it the derived mirror).
    ///
    /// Members keep their generations, including members left without any
    /// lineage edge.
    pub fn remove_relationship(
        &self,
        family_id: FamilyId,
        edge_id: RelationshipId,
        acting_user_id: UserId,
    ) -> GraphServiceResult<()> {
        self.remove_relationship_cancellable(family_id, edge_id, acting_user_id, &CancelFlag::new())
    }

    pub fn remove_relationship_cancellable(
        &self,
        family_id: FamilyId,
        edge_id: RelationshipId,
        acting_user_id: UserId,
        cancel: &CancelFlag,
    ) -> GraphServiceResult<()> {
        let mut trace = MutationTrace::start("relationship_remove", family_id);
        if trace.cancelled(cancel) {
            return Err(GraphServiceError::Cancelled);
        }

        self.mutate(family_id, |_, graph| {
            trace.advance(MutationPhase::Validating);
            if let Err(rejection) = self
                .validator()
                .validate_remove(graph.index(), family_id, edge_id)
                .into_result()
            {
                trace.reject(&rejection);
                return Err(rejection.into());
            }
            if trace.cancelled(cancel) {
                return Err(GraphServiceError::Cancelled);
            }

            trace.advance(MutationPhase::Mutating);
            let record = graph
                .index()
                .edge(edge_id)
                .ok_or(Rejection::NotFound(edge_id))
                .and_then(|edge| {
                    relationship_record(graph, acting_user_id, ActivityAction::Delete, edge)
                })?;
            let edge = self.unlink(graph, &mut trace, edge_id)?;
            graph.touch();
            trace.committed(edge.id);

            Ok(Staged {
                value: (),
                delta: GraphDelta {
                    family: Some(graph.family().clone()),
                    removed_relationships: vec![edge.id],
                    ..GraphDelta::default()
                },
                records: vec![record],
            })
        })
    }

    /// All edges of the family in stored orientation, oldest first.
    pub fn relationships(&self, family_id: FamilyId) -> GraphServiceResult<Vec<Relationship>> {
        self.read(family_id, |graph| graph.records().2)
    }

    /// Edges touching `member_id`, oriented away from it.
    ///
    /// A parent edge seen from the child comes back as its `Child` view, and a
    /// spouse edge reads the same from both partners.
    pub fn relationships_of(
        &self,
        family_id: FamilyId,
        member_id: MemberId,
    ) -> GraphServiceResult<Vec<EdgeView>> {
        self.read(family_id, |graph| {
            graph
                .index()
                .incident_edges(member_id)
                .into_iter()
                .map(|edge| {
                    if edge.from_member_id == member_id {
                        edge.view()
                    } else {
                        edge.inverse()
                    }
                })
                .collect()
        })
    }

    /// Stored id of the fact `from -> to` of `kind`, in any orientation.
    pub fn find_relationship(
        &self,
        family_id: FamilyId,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
    ) -> GraphServiceResult<Option<RelationshipId>> {
        self.read(family_id, |graph| graph.index().find_edge(from, to, kind))
    }

    /// Inserts an already validated edge and propagates generations.
    ///
    /// On a generation conflict the edge is taken out again and the graph is
    /// exactly as before.
    pub(crate) fn link(
        &self,
        graph: &mut FamilyGraph,
        trace: &mut MutationTrace,
        edge: Relationship,
    ) -> Result<(Relationship, GenerationPlan), Rejection> {
        let edge = edge.into_canonical();
        let edge_id = match graph.index_mut().add_edge(edge.clone()) {
            Ok(edge_id) => edge_id,
            Err(err) => {
                let rejection = Rejection::from(err);
                trace.reject(&rejection);
                return Err(rejection);
            }
        };

        trace.advance(MutationPhase::Recomputing);
        let plan = match self.calculator().plan_for_edge(graph.index(), &edge) {
            Ok(plan) => plan,
            Err(conflict) => {
                let _ = graph.index_mut().remove_edge(edge_id);
                let rejection = Rejection::from(conflict);
                trace.reject(&rejection);
                return Err(rejection);
            }
        };
        if let Err(err) = plan.apply(graph.index_mut()) {
            let _ = plan.revert(graph.index_mut());
            let _ = graph.index_mut().remove_edge(edge_id);
            let rejection = Rejection::from(err);
            trace.reject(&rejection);
            return Err(rejection);
        }
        Ok((edge, plan))
    }

    /// Takes an edge out and re-checks the touched components.
    pub(crate) fn unlink(
        &self,
        graph: &mut FamilyGraph,
        trace: &mut MutationTrace,
        edge_id: RelationshipId,
    ) -> Result<Relationship, Rejection> {
        let edge = match graph.index_mut().remove_edge(edge_id) {
            Ok(edge) => edge,
            Err(err) => {
                let rejection = Rejection::from(err);
                trace.reject(&rejection);
                return Err(rejection);
            }
        };

        trace.advance(MutationPhase::Recomputing);
        if let Err(conflict) = self.calculator().plan_for_removal(graph.index(), &edge) {
            let _ = graph.index_mut().add_edge(edge);
            let rejection = Rejection::from(conflict);
            trace.reject(&rejection);
            return Err(rejection);
        }
        Ok(edge)
    }
}

/// Audit record for `edge` with both endpoints resolved.
pub(crate) fn relationship_record(
    graph: &FamilyGraph,
    acting_user_id: UserId,
    action: ActivityAction,
    edge: &Relationship,
) -> Result<ActivityRecord, Rejection> {
    let index = graph.index();
    let from = index
        .member(edge.from_member_id)
        .ok_or(Rejection::NotFound(edge.from_member_id))?;
    let to = index
        .member(edge.to_member_id)
        .ok_or(Rejection::NotFound(edge.to_member_id))?;
    Ok(ActivityRecord::relationship(
        acting_user_id,
        action,
        edge.id,
        edge.kind,
        from,
        to,
    ))
}

/// Current records of members whose generation a plan moved.
pub(crate) fn changed_members(
    graph: &FamilyGraph,
    plan: &GenerationPlan,
) -> Vec<FamilyMember> {
    plan.changed_members()
        .filter_map(|member_id| graph.index().member(member_id).cloned())
        .collect()
}
