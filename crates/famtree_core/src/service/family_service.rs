//! Family lifecycle use cases.
//!
//! # Responsibility
//! - Create a family and register its empty graph.
//! - Delete a family by cascading over its edges and members.
//!
//! # Invariants
//! - A family is registered only after the store accepted it.
//! - Cascade deletion emits one DELETE record per removed edge and member.

use crate::graph::family_graph::FamilyGraph;
use crate::model::activity::{ActivityAction, ActivityRecord};
use crate::model::family::{Family, FamilyId};
use crate::model::UserId;
use crate::repo::activity::ActivityRecorder;
use crate::repo::store::{FamilySnapshot, FamilyStore, GraphDelta};
use crate::service::graph_service::{
    FamilyGraphService, GraphServiceError, GraphServiceResult, Staged,
};
use crate::service::mutation::{MutationPhase, MutationTrace};
use crate::service::relationship_service::relationship_record;
use log::{error, info};

impl<S: FamilyStore, R: ActivityRecorder> FamilyGraphService<S, R> {
    /// Creates an empty family owned by `owner_id`.
    pub fn create_family(
        &self,
        name: impl Into<String>,
        owner_id: UserId,
    ) -> GraphServiceResult<Family> {
        let family = Family::new(name, owner_id)?;
        let delta = GraphDelta {
            family: Some(family.clone()),
            ..GraphDelta::default()
        };
        if let Err(err) = self.store().persist(family.id, &delta) {
            error!(
                "event=family_create module=service status=error family_id={} error={}",
                family.id, err
            );
            return Err(GraphServiceError::Store(err));
        }
        self.register(FamilyGraph::new(family.clone()))?;
        info!(
            "event=family_create module=service status=ok family_id={}",
            family.id
        );
        Ok(family)
    }

    pub fn family(&self, family_id: FamilyId) -> GraphServiceResult<Family> {
        self.read(family_id, |graph| graph.family().clone())
    }

    /// Consistent copy of everything the family holds.
    pub fn snapshot(&self, family_id: FamilyId) -> GraphServiceResult<FamilySnapshot> {
        self.read(family_id, |graph| {
            let (family, members, relationships) = graph.records();
            FamilySnapshot {
                family,
                members,
                relationships,
            }
        })
    }

    /// Removes every edge, then every member, then the family itself.
    pub fn delete_family(
        &self,
        family_id: FamilyId,
        acting_user_id: UserId,
    ) -> GraphServiceResult<()> {
        let mut trace = MutationTrace::start("family_delete", family_id);

        self.mutate(family_id, |entry, graph| {
            trace.advance(MutationPhase::Validating);
            let (_, members, relationships) = graph.records();
            let mut records = Vec::with_capacity(members.len() + relationships.len());
            for edge in &relationships {
                match relationship_record(graph, acting_user_id, ActivityAction::Delete, edge) {
                    Ok(record) => records.push(record),
                    Err(rejection) => {
                        trace.reject(&rejection);
                        return Err(rejection.into());
                    }
                }
            }
            records.extend(members.iter().map(|member| {
                ActivityRecord::member(acting_user_id, ActivityAction::Delete, member)
            }));

            trace.advance(MutationPhase::Mutating);
            *graph = FamilyGraph::new(graph.family().clone());
            entry.mark_deleted();
            trace.committed(family_id);

            Ok(Staged {
                value: (),
                delta: GraphDelta {
                    family_deleted: true,
                    removed_members: members.iter().map(|member| member.id).collect(),
                    removed_relationships: relationships.iter().map(|edge| edge.id).collect(),
                    ..GraphDelta::default()
                },
                records,
            })
        })
    }
}
