//! Identity/persistence collaborator contract.
//!
//! # Responsibility
//! - Define how the engine loads one family and hands back committed changes.
//! - Provide an in-memory adapter for embedding and tests.
//!
//! # Invariants
//! - `persist` applies a delta atomically: either every change lands or none.
//! - Stores never validate graph rules; the engine hydrates and re-checks.

use crate::db::DbError;
use crate::model::family::{Family, FamilyId};
use crate::model::member::{FamilyMember, MemberId};
use crate::model::relationship::{Relationship, RelationshipId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

pub type StoreResult<T> = Result<T, StoreError>;

/// Host-side storage failure. Fatal for the operation that hit it.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Stored rows cannot be decoded into model records.
    InvalidData(String),
    /// Delta targets a family the store does not hold.
    UnknownFamily(FamilyId),
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid stored family data: {message}"),
            Self::UnknownFamily(id) => write!(f, "family not present in store: {id}"),
            Self::Unavailable(message) => write!(f, "family store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Everything stored for one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilySnapshot {
    pub family: Family,
    pub members: Vec<FamilyMember>,
    pub relationships: Vec<Relationship>,
}

/// Record changes produced by one committed mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDelta {
    /// Family row to insert or update.
    pub family: Option<Family>,
    /// Drops the family and everything it owns. Applied last.
    pub family_deleted: bool,
    /// New members and members whose profile or generation changed.
    pub upserted_members: Vec<FamilyMember>,
    pub removed_members: Vec<MemberId>,
    pub added_relationships: Vec<Relationship>,
    pub removed_relationships: Vec<RelationshipId>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.family.is_none()
            && !self.family_deleted
            && self.upserted_members.is_empty()
            && self.removed_members.is_empty()
            && self.added_relationships.is_empty()
            && self.removed_relationships.is_empty()
    }
}

/// Contract the engine consumes from the host's storage layer.
pub trait FamilyStore: Send + Sync {
    /// Returns `None` when the family does not exist.
    fn load_family_graph(&self, family_id: FamilyId) -> StoreResult<Option<FamilySnapshot>>;

    /// Called after commit, outside the per-family lock.
    fn persist(&self, family_id: FamilyId, delta: &GraphDelta) -> StoreResult<()>;
}

impl<T: FamilyStore + ?Sized> FamilyStore for Arc<T> {
    fn load_family_graph(&self, family_id: FamilyId) -> StoreResult<Option<FamilySnapshot>> {
        (**self).load_family_graph(family_id)
    }

    fn persist(&self, family_id: FamilyId, delta: &GraphDelta) -> StoreResult<()> {
        (**self).persist(family_id, delta)
    }
}

/// Process-local store keeping snapshots in a map.
#[derive(Debug, Default)]
pub struct MemoryFamilyStore {
    families: Mutex<HashMap<FamilyId, FamilySnapshot>>,
}

impl MemoryFamilyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a snapshot directly, bypassing the engine (imports, tests).
    pub fn insert_snapshot(&self, snapshot: FamilySnapshot) -> StoreResult<()> {
        let mut families = self.lock()?;
        families.insert(snapshot.family.id, snapshot);
        Ok(())
    }

    pub fn family_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<FamilyId, FamilySnapshot>>> {
        self.families
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl FamilyStore for MemoryFamilyStore {
    fn load_family_graph(&self, family_id: FamilyId) -> StoreResult<Option<FamilySnapshot>> {
        Ok(self.lock()?.get(&family_id).cloned())
    }

    fn persist(&self, family_id: FamilyId, delta: &GraphDelta) -> StoreResult<()> {
        let mut families = self.lock()?;

        if delta.family_deleted {
            families.remove(&family_id);
            return Ok(());
        }

        // Work on a copy so a failing delta leaves the stored snapshot intact.
        let mut snapshot = match (families.get(&family_id), &delta.family) {
            (Some(existing), _) => existing.clone(),
            (None, Some(family)) => FamilySnapshot {
                family: family.clone(),
                members: Vec::new(),
                relationships: Vec::new(),
            },
            (None, None) => return Err(StoreError::UnknownFamily(family_id)),
        };
        if let Some(family) = &delta.family {
            snapshot.family = family.clone();
        }

        for member in &delta.upserted_members {
            match snapshot.members.iter_mut().find(|stored| stored.id == member.id) {
                Some(stored) => *stored = member.clone(),
                None => snapshot.members.push(member.clone()),
            }
        }
        snapshot
            .relationships
            .retain(|edge| !delta.removed_relationships.contains(&edge.id));
        for edge in &delta.added_relationships {
            if snapshot.relationships.iter().any(|stored| stored.id == edge.id) {
                return Err(StoreError::InvalidData(format!(
                    "relationship {} already stored",
                    edge.id
                )));
            }
            snapshot.relationships.push(edge.clone());
        }
        snapshot
            .members
            .retain(|member| !delta.removed_members.contains(&member.id));
        // Members cascade their edges, the way the SQLite schema does.
        snapshot.relationships.retain(|edge| {
            !delta
                .removed_members
                .iter()
                .any(|member_id| edge.touches(*member_id))
        });

        families.insert(family_id, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FamilySnapshot, FamilyStore, GraphDelta, MemoryFamilyStore, StoreError};
    use crate::model::family::Family;
    use crate::model::member::{FamilyMember, Gender, MemberProfile};
    use crate::model::relationship::{Relationship, RelationshipType};
    use uuid::Uuid;

    fn member(family: &Family, name: &str) -> FamilyMember {
        FamilyMember::new(family.id, MemberProfile::living(name, Gender::Other, 0).into()).unwrap()
    }

    #[test]
    fn persist_creates_and_updates_snapshot() {
        let store = MemoryFamilyStore::new();
        let family = Family::new("Smiths", Uuid::new_v4()).unwrap();
        let a = member(&family, "A");
        let b = member(&family, "B");
        let edge = Relationship::new(family.id, a.id, b.id, RelationshipType::Parent);

        store
            .persist(
                family.id,
                &GraphDelta {
                    family: Some(family.clone()),
                    upserted_members: vec![a.clone(), b.clone()],
                    added_relationships: vec![edge.clone()],
                    ..GraphDelta::default()
                },
            )
            .unwrap();

        let snapshot = store.load_family_graph(family.id).unwrap().unwrap();
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(snapshot.relationships, vec![edge]);

        store
            .persist(
                family.id,
                &GraphDelta {
                    removed_members: vec![a.id],
                    ..GraphDelta::default()
                },
            )
            .unwrap();
        let snapshot = store.load_family_graph(family.id).unwrap().unwrap();
        assert_eq!(snapshot.members, vec![b]);
        assert!(snapshot.relationships.is_empty());
    }

    #[test]
    fn persist_rejects_unknown_family_and_deletes() {
        let store = MemoryFamilyStore::new();
        let family = Family::new("Smiths", Uuid::new_v4()).unwrap();

        let err = store
            .persist(family.id, &GraphDelta::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownFamily(id) if id == family.id));

        store
            .insert_snapshot(FamilySnapshot {
                family: family.clone(),
                members: Vec::new(),
                relationships: Vec::new(),
            })
            .unwrap();
        assert_eq!(store.family_count().unwrap(), 1);

        store
            .persist(
                family.id,
                &GraphDelta {
                    family_deleted: true,
                    ..GraphDelta::default()
                },
            )
            .unwrap();
        assert!(store.load_family_graph(family.id).unwrap().is_none());
    }

    #[test]
    fn empty_delta_reports_empty() {
        assert!(GraphDelta::default().is_empty());
        let delta = GraphDelta {
            removed_relationships: vec![Uuid::new_v4()],
            ..GraphDelta::default()
        };
        assert!(!delta.is_empty());
    }
}
