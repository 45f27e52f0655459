//! In-memory adjacency index for one family graph.
//!
//! # Responsibility
//! - Own the member arena and the typed adjacency lists of one family.
//! - Answer neighbor and reachability queries without any I/O.
//!
//! # Invariants
//! - Members are addressed by `MemberHandle` slots; a removed member's slot
//!   is reused, so handles must not outlive the member they were issued for.
//! - Every stored edge appears in the adjacency lists of both endpoints.
//! - Only canonical `Parent`/`Spouse` edges are stored; `Child` is derived.
//! - The index performs no domain validation; callers validate first.

use crate::model::family::FamilyId;
use crate::model::member::{FamilyMember, Generation, MemberId};
use crate::model::relationship::{
    Direction, EdgeKey, Relationship, RelationshipId, RelationshipType,
};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Arena slot of one member inside a `GraphIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberHandle(u32);

impl MemberHandle {
    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Errors from raw index mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Same edge fact (or same edge id) is already stored; carries the stored id.
    AlreadyExists(RelationshipId),
    MemberAlreadyExists(MemberId),
    NotFound(RelationshipId),
    MemberNotFound(MemberId),
    /// Member still has incident edges and cannot be removed.
    MemberInUse(MemberId),
    FamilyMismatch {
        expected: FamilyId,
        actual: FamilyId,
    },
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(id) => write!(f, "relationship already exists: {id}"),
            Self::MemberAlreadyExists(id) => write!(f, "member already exists: {id}"),
            Self::NotFound(id) => write!(f, "relationship not found: {id}"),
            Self::MemberNotFound(id) => write!(f, "member not found: {id}"),
            Self::MemberInUse(id) => write!(f, "member still has relationships: {id}"),
            Self::FamilyMismatch { expected, actual } => {
                write!(f, "record belongs to family {actual}, expected {expected}")
            }
        }
    }
}

impl Error for IndexError {}

#[derive(Debug, Clone, Copy)]
struct Adjacent {
    edge_id: RelationshipId,
    peer: MemberHandle,
}

#[derive(Debug, Clone)]
struct MemberSlot {
    member: FamilyMember,
    /// Insertion sequence; orders member listings across slot reuse.
    inserted: u64,
    /// Incoming `Parent` edges; peers are this member's parents.
    parents: Vec<Adjacent>,
    /// Outgoing `Parent` edges; peers are this member's children.
    children: Vec<Adjacent>,
    spouses: Vec<Adjacent>,
}

impl MemberSlot {
    fn list(&self, kind: RelationshipType, direction: Direction) -> &[Adjacent] {
        match (kind, direction) {
            (RelationshipType::Parent, Direction::Outgoing)
            | (RelationshipType::Child, Direction::Incoming) => &self.children,
            (RelationshipType::Parent, Direction::Incoming)
            | (RelationshipType::Child, Direction::Outgoing) => &self.parents,
            (RelationshipType::Spouse, _) => &self.spouses,
        }
    }

    fn is_orphan(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty() && self.spouses.is_empty()
    }
}

/// Adjacency structure of one family.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    family_id: FamilyId,
    slots: Vec<Option<MemberSlot>>,
    /// Vacated slots, reused before the arena grows.
    free: Vec<MemberHandle>,
    next_inserted: u64,
    handles: HashMap<MemberId, MemberHandle>,
    edges: HashMap<RelationshipId, Relationship>,
    keys: HashMap<EdgeKey, RelationshipId>,
}

impl GraphIndex {
    pub fn new(family_id: FamilyId) -> Self {
        Self {
            family_id,
            slots: Vec::new(),
            free: Vec::new(),
            next_inserted: 0,
            handles: HashMap::new(),
            edges: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn member_count(&self) -> usize {
        self.handles.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_member(&self, member_id: MemberId) -> bool {
        self.handles.contains_key(&member_id)
    }

    pub fn handle(&self, member_id: MemberId) -> Option<MemberHandle> {
        self.handles.get(&member_id).copied()
    }

    pub fn member(&self, member_id: MemberId) -> Option<&FamilyMember> {
        self.slot(member_id).map(|slot| &slot.member)
    }

    pub(crate) fn member_mut(&mut self, member_id: MemberId) -> Option<&mut FamilyMember> {
        let handle = self.handle(member_id)?;
        self.slots
            .get_mut(handle.slot())
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.member)
    }

    /// Members in insertion order.
    pub fn members(&self) -> impl Iterator<Item = &FamilyMember> + '_ {
        self.ordered_slots().into_iter().map(|slot| &slot.member)
    }

    /// Arena capacity, including vacated slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn edge(&self, edge_id: RelationshipId) -> Option<&Relationship> {
        self.edges.get(&edge_id)
    }

    /// Stored (canonical) edges in no particular order.
    pub fn edges(&self) -> impl Iterator<Item = &Relationship> + '_ {
        self.edges.values()
    }

    /// Looks up the stored edge for a fact in any orientation the kind allows.
    pub fn find_edge(
        &self,
        from: MemberId,
        to: MemberId,
        kind: RelationshipType,
    ) -> Option<RelationshipId> {
        self.keys.get(&EdgeKey::canonical(from, to, kind)).copied()
    }

    /// Inserts a member node.
    pub fn insert_member(&mut self, member: FamilyMember) -> Result<MemberHandle, IndexError> {
        if member.family_id != self.family_id {
            return Err(IndexError::FamilyMismatch {
                expected: self.family_id,
                actual: member.family_id,
            });
        }
        if self.handles.contains_key(&member.id) {
            return Err(IndexError::MemberAlreadyExists(member.id));
        }

        let slot = MemberSlot {
            member,
            inserted: self.next_inserted,
            parents: Vec::new(),
            children: Vec::new(),
            spouses: Vec::new(),
        };
        self.next_inserted += 1;
        let member_id = slot.member.id;
        let handle = match self.free.pop() {
            Some(handle) => {
                if let Some(vacant) = self.slots.get_mut(handle.slot()) {
                    *vacant = Some(slot);
                }
                handle
            }
            None => {
                let handle = MemberHandle(self.slots.len() as u32);
                self.slots.push(Some(slot));
                handle
            }
        };
        self.handles.insert(member_id, handle);
        Ok(handle)
    }

    /// Removes an orphaned member node and returns it.
    pub fn remove_member(&mut self, member_id: MemberId) -> Result<FamilyMember, IndexError> {
        let handle = self
            .handle(member_id)
            .ok_or(IndexError::MemberNotFound(member_id))?;
        let in_use = self
            .slots
            .get(handle.slot())
            .and_then(Option::as_ref)
            .map_or(false, |slot| !slot.is_orphan());
        if in_use {
            return Err(IndexError::MemberInUse(member_id));
        }

        self.handles.remove(&member_id);
        let removed = self
            .slots
            .get_mut(handle.slot())
            .and_then(Option::take)
            .map(|slot| slot.member)
            .ok_or(IndexError::MemberNotFound(member_id))?;
        self.free.push(handle);
        Ok(removed)
    }

    /// Overwrites one member's generation and returns the previous value.
    pub fn set_generation(
        &mut self,
        member_id: MemberId,
        generation: Generation,
    ) -> Result<Generation, IndexError> {
        let member = self
            .member_mut(member_id)
            .ok_or(IndexError::MemberNotFound(member_id))?;
        let previous = member.generation;
        member.generation = generation;
        Ok(previous)
    }

    /// Inserts an edge into both endpoints' adjacency lists.
    ///
    /// `Child` edges are stored as the mirrored `Parent` edge. A duplicate fact
    /// is a no-op returning `AlreadyExists` with the stored edge id.
    pub fn add_edge(&mut self, edge: Relationship) -> Result<RelationshipId, IndexError> {
        let edge = edge.into_canonical();
        if edge.family_id != self.family_id {
            return Err(IndexError::FamilyMismatch {
                expected: self.family_id,
                actual: edge.family_id,
            });
        }
        if let Some(existing) = self.keys.get(&edge.key()) {
            return Err(IndexError::AlreadyExists(*existing));
        }
        if self.edges.contains_key(&edge.id) {
            return Err(IndexError::AlreadyExists(edge.id));
        }
        let from = self
            .handle(edge.from_member_id)
            .ok_or(IndexError::MemberNotFound(edge.from_member_id))?;
        let to = self
            .handle(edge.to_member_id)
            .ok_or(IndexError::MemberNotFound(edge.to_member_id))?;

        let edge_id = edge.id;
        let kind = edge.kind;
        if let Some(slot) = self.slots.get_mut(from.slot()).and_then(Option::as_mut) {
            let entry = Adjacent { edge_id, peer: to };
            match kind {
                RelationshipType::Spouse => slot.spouses.push(entry),
                _ => slot.children.push(entry),
            }
        }
        if let Some(slot) = self.slots.get_mut(to.slot()).and_then(Option::as_mut) {
            let entry = Adjacent {
                edge_id,
                peer: from,
            };
            match kind {
                RelationshipType::Spouse => slot.spouses.push(entry),
                _ => slot.parents.push(entry),
            }
        }
        self.keys.insert(edge.key(), edge_id);
        self.edges.insert(edge_id, edge);
        Ok(edge_id)
    }

    /// Removes an edge from both adjacency lists and returns it.
    pub fn remove_edge(&mut self, edge_id: RelationshipId) -> Result<Relationship, IndexError> {
        let edge = self
            .edges
            .remove(&edge_id)
            .ok_or(IndexError::NotFound(edge_id))?;
        self.keys.remove(&edge.key());

        for member_id in [edge.from_member_id, edge.to_member_id] {
            let Some(handle) = self.handle(member_id) else {
                continue;
            };
            if let Some(slot) = self.slots.get_mut(handle.slot()).and_then(Option::as_mut) {
                slot.parents.retain(|entry| entry.edge_id != edge_id);
                slot.children.retain(|entry| entry.edge_id != edge_id);
                slot.spouses.retain(|entry| entry.edge_id != edge_id);
            }
        }
        Ok(edge)
    }

    /// Adjacent member ids for one kind and direction.
    ///
    /// The returned iterator is `Clone`, so it can be restarted freely. An
    /// unknown member yields an empty sequence.
    pub fn neighbors(
        &self,
        member_id: MemberId,
        kind: RelationshipType,
        direction: Direction,
    ) -> Neighbors<'_> {
        let entries = self
            .slot(member_id)
            .map(|slot| slot.list(kind, direction))
            .unwrap_or(&[]);
        Neighbors {
            slots: &self.slots,
            entries: entries.iter(),
        }
    }

    /// Edges touching `member_id`, in stored orientation.
    pub fn incident_edges(&self, member_id: MemberId) -> Vec<&Relationship> {
        let Some(slot) = self.slot(member_id) else {
            return Vec::new();
        };
        slot.parents
            .iter()
            .chain(slot.children.iter())
            .chain(slot.spouses.iter())
            .filter_map(|entry| self.edges.get(&entry.edge_id))
            .collect()
    }

    pub fn parent_count(&self, member_id: MemberId) -> usize {
        self.slot(member_id).map_or(0, |slot| slot.parents.len())
    }

    /// Number of `Parent` edges in either direction.
    pub fn lineage_degree(&self, member_id: MemberId) -> usize {
        self.slot(member_id)
            .map_or(0, |slot| slot.parents.len() + slot.children.len())
    }

    /// Members with no incoming `Parent` edge.
    pub fn roots(&self) -> Vec<MemberId> {
        self.ordered_slots()
            .into_iter()
            .filter(|slot| slot.parents.is_empty())
            .map(|slot| slot.member.id)
            .collect()
    }

    /// Returns whether `to` is reachable from `from` following the outgoing
    /// direction of the given kinds. A member always reaches itself.
    pub fn has_path(&self, from: MemberId, to: MemberId, through: &[RelationshipType]) -> bool {
        let Some(target) = self.handle(to) else {
            return false;
        };
        let mut found = false;
        self.walk(from, through, |handle| {
            found = handle == target;
            !found
        });
        found
    }

    /// Members reachable from `from` (excluding itself), in BFS order.
    pub fn reachable(&self, from: MemberId, through: &[RelationshipType]) -> Vec<MemberId> {
        let mut reached = Vec::new();
        self.walk(from, through, |handle| {
            if let Some(slot) = self.slots.get(handle.slot()).and_then(Option::as_ref) {
                if slot.member.id != from {
                    reached.push(slot.member.id);
                }
            }
            true
        });
        reached
    }

    /// Breadth-first walk with a visited guard. `visit` returns `false` to stop.
    fn walk(
        &self,
        from: MemberId,
        through: &[RelationshipType],
        mut visit: impl FnMut(MemberHandle) -> bool,
    ) {
        let Some(start) = self.handle(from) else {
            return;
        };
        let mut visited = vec![false; self.slots.len()];
        let mut queue = VecDeque::from([start]);
        visited[start.slot()] = true;

        while let Some(current) = queue.pop_front() {
            if !visit(current) {
                return;
            }
            let Some(slot) = self.slots.get(current.slot()).and_then(Option::as_ref) else {
                continue;
            };
            for kind in through {
                for entry in slot.list(*kind, Direction::Outgoing) {
                    if !visited[entry.peer.slot()] {
                        visited[entry.peer.slot()] = true;
                        queue.push_back(entry.peer);
                    }
                }
            }
        }
    }

    fn ordered_slots(&self) -> Vec<&MemberSlot> {
        let mut slots: Vec<&MemberSlot> = self.slots.iter().flatten().collect();
        slots.sort_by_key(|slot| slot.inserted);
        slots
    }

    fn slot(&self, member_id: MemberId) -> Option<&MemberSlot> {
        let handle = self.handle(member_id)?;
        self.slots.get(handle.slot()).and_then(Option::as_ref)
    }
}

/// Restartable sequence of adjacent member ids.
#[derive(Debug, Clone)]
pub struct Neighbors<'a> {
    slots: &'a [Option<MemberSlot>],
    entries: std::slice::Iter<'a, Adjacent>,
}

impl Iterator for Neighbors<'_> {
    type Item = MemberId;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            if let Some(slot) = self.slots.get(entry.peer.slot()).and_then(Option::as_ref) {
                return Some(slot.member.id);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::{GraphIndex, IndexError};
    use crate::model::member::{FamilyMember, Gender, MemberId, MemberProfile};
    use crate::model::relationship::{Direction, Relationship, RelationshipType};
    use uuid::Uuid;

    fn index_with(names: &[&str]) -> (GraphIndex, Vec<MemberId>) {
        let family_id = Uuid::new_v4();
        let mut index = GraphIndex::new(family_id);
        let ids = names
            .iter()
            .map(|name| {
                let member = FamilyMember::new(
                    family_id,
                    MemberProfile::living(*name, Gender::Other, 0).into(),
                )
                .unwrap();
                let id = member.id;
                index.insert_member(member).unwrap();
                id
            })
            .collect();
        (index, ids)
    }

    #[test]
    fn parent_edge_is_visible_from_both_endpoints() {
        let (mut index, ids) = index_with(&["A", "B"]);
        let edge = Relationship::new(index.family_id(), ids[0], ids[1], RelationshipType::Parent);
        index.add_edge(edge).unwrap();

        let children: Vec<_> = index
            .neighbors(ids[0], RelationshipType::Parent, Direction::Outgoing)
            .collect();
        assert_eq!(children, vec![ids[1]]);
        let parents: Vec<_> = index
            .neighbors(ids[1], RelationshipType::Child, Direction::Outgoing)
            .collect();
        assert_eq!(parents, vec![ids[0]]);
        assert_eq!(index.parent_count(ids[1]), 1);
        assert_eq!(index.roots(), vec![ids[0]]);
    }

    #[test]
    fn duplicate_edge_is_a_no_op() {
        let (mut index, ids) = index_with(&["A", "B"]);
        let first = index
            .add_edge(Relationship::new(
                index.family_id(),
                ids[0],
                ids[1],
                RelationshipType::Spouse,
            ))
            .unwrap();
        let err = index
            .add_edge(Relationship::new(
                index.family_id(),
                ids[1],
                ids[0],
                RelationshipType::Spouse,
            ))
            .unwrap_err();
        assert_eq!(err, IndexError::AlreadyExists(first));
        assert_eq!(index.edge_count(), 1);
    }

    #[test]
    fn remove_edge_clears_both_adjacency_lists() {
        let (mut index, ids) = index_with(&["A", "B"]);
        let edge_id = index
            .add_edge(Relationship::new(
                index.family_id(),
                ids[0],
                ids[1],
                RelationshipType::Parent,
            ))
            .unwrap();
        index.remove_edge(edge_id).unwrap();

        assert_eq!(
            index
                .neighbors(ids[0], RelationshipType::Parent, Direction::Outgoing)
                .count(),
            0
        );
        assert_eq!(index.parent_count(ids[1]), 0);
        assert_eq!(
            index.remove_edge(edge_id).unwrap_err(),
            IndexError::NotFound(edge_id)
        );
    }

    #[test]
    fn neighbors_iterator_is_restartable() {
        let (mut index, ids) = index_with(&["P", "C1", "C2"]);
        for child in &ids[1..] {
            index
                .add_edge(Relationship::new(
                    index.family_id(),
                    ids[0],
                    *child,
                    RelationshipType::Parent,
                ))
                .unwrap();
        }
        let children = index.neighbors(ids[0], RelationshipType::Parent, Direction::Outgoing);
        let first_pass: Vec<_> = children.clone().collect();
        let second_pass: Vec<_> = children.collect();
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass.len(), 2);
    }

    #[test]
    fn has_path_terminates_on_cycles() {
        let (mut index, ids) = index_with(&["A", "B", "C", "D"]);
        let family_id = index.family_id();
        // The index does not validate, so a cycle can be built directly.
        for (from, to) in [(0, 1), (1, 2), (2, 0)] {
            index
                .add_edge(Relationship::new(
                    family_id,
                    ids[from],
                    ids[to],
                    RelationshipType::Parent,
                ))
                .unwrap();
        }
        assert!(index.has_path(ids[0], ids[2], &[RelationshipType::Parent]));
        assert!(!index.has_path(ids[0], ids[3], &[RelationshipType::Parent]));
        assert_eq!(index.reachable(ids[0], &[RelationshipType::Parent]).len(), 2);
    }

    #[test]
    fn remove_member_requires_orphan() {
        let (mut index, ids) = index_with(&["A", "B"]);
        let edge_id = index
            .add_edge(Relationship::new(
                index.family_id(),
                ids[0],
                ids[1],
                RelationshipType::Spouse,
            ))
            .unwrap();
        assert_eq!(
            index.remove_member(ids[0]).unwrap_err(),
            IndexError::MemberInUse(ids[0])
        );
        index.remove_edge(edge_id).unwrap();
        let removed = index.remove_member(ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert!(!index.contains_member(ids[0]));
        assert_eq!(index.member_count(), 1);
    }

    #[test]
    fn removed_slots_are_reused_in_insertion_order() {
        let (mut index, ids) = index_with(&["A", "B"]);
        let family_id = index.family_id();

        for round in 0..10 {
            let member = FamilyMember::new(
                family_id,
                MemberProfile::living(format!("Temp {round}"), Gender::Other, 0).into(),
            )
            .unwrap();
            let temp = member.id;
            index.insert_member(member).unwrap();
            index.remove_member(temp).unwrap();
        }
        assert_eq!(index.slot_count(), 3);

        index.remove_member(ids[0]).unwrap();
        let late =
            FamilyMember::new(family_id, MemberProfile::living("C", Gender::Other, 0).into())
                .unwrap();
        let late_id = late.id;
        index.insert_member(late).unwrap();
        index
            .add_edge(Relationship::new(family_id, ids[1], late_id, RelationshipType::Parent))
            .unwrap();

        let listed: Vec<_> = index.members().map(|member| member.id).collect();
        assert_eq!(listed, vec![ids[1], late_id]);
        assert_eq!(index.roots(), vec![ids[1]]);
        assert!(index.has_path(ids[1], late_id, &[RelationshipType::Parent]));
        assert_eq!(index.slot_count(), 3);
    }

    #[test]
    fn insert_member_rejects_foreign_family() {
        let (mut index, _) = index_with(&[]);
        let stranger = FamilyMember::new(
            Uuid::new_v4(),
            MemberProfile::living("Stranger", Gender::Male, 0).into(),
        )
        .unwrap();
        assert!(matches!(
            index.insert_member(stranger),
            Err(IndexError::FamilyMismatch { .. })
        ));
    }
}
