//! Engine facade: family registry and commit pipeline.
//!
//! # Responsibility
//! - Materialize family graphs on demand from the store and evict them.
//! - Serialize writers per family while letting readers share a snapshot.
//! - Persist committed deltas in commit order, then emit audit records.
//!
//! # Invariants
//! - The registry lock is never held while a family lock is being acquired.
//! - A family lock is never held while the store or recorder runs.
//! - Deltas of one family are persisted in commit order.
//! - A family is only evicted while no mutation on it is in flight.
//! - A failed persist evicts the family; the next access re-hydrates it.
//! - Recorder failures are logged and never undo a commit.

use crate::config::EngineConfig;
use crate::graph::family_graph::{FamilyGraph, GraphLoadError};
use crate::graph::generation::GenerationCalculator;
use crate::graph::validator::{GraphPolicy, Rejection, Validator};
use crate::model::activity::ActivityRecord;
use crate::model::family::{FamilyId, FamilyValidationError};
use crate::model::member::MemberValidationError;
use crate::repo::activity::ActivityRecorder;
use crate::repo::store::{FamilyStore, GraphDelta, StoreError};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Instant;

/// Errors returned by every engine operation.
#[derive(Debug)]
pub enum GraphServiceError {
    /// Domain rule violation; nothing changed.
    Rejected(Rejection),
    InvalidMember(MemberValidationError),
    InvalidFamily(FamilyValidationError),
    /// Caller cancelled before the graph was touched.
    Cancelled,
    /// Stored records of the family are corrupt.
    Load(GraphLoadError),
    Store(StoreError),
    LockPoisoned,
}

impl GraphServiceError {
    /// The domain rejection, when this is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

impl Display for GraphServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(rejection) => write!(f, "{rejection}"),
            Self::InvalidMember(err) => write!(f, "{err}"),
            Self::InvalidFamily(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "mutation cancelled before it was applied"),
            Self::Load(err) => write!(f, "failed to load family graph: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::LockPoisoned => write!(f, "family graph lock is poisoned"),
        }
    }
}

impl Error for GraphServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected(err) => Some(err),
            Self::InvalidMember(err) => Some(err),
            Self::InvalidFamily(err) => Some(err),
            Self::Load(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Cancelled | Self::LockPoisoned => None,
        }
    }
}

impl From<Rejection> for GraphServiceError {
    fn from(value: Rejection) -> Self {
        Self::Rejected(value)
    }
}

impl From<MemberValidationError> for GraphServiceError {
    fn from(value: MemberValidationError) -> Self {
        Self::InvalidMember(value)
    }
}

impl From<FamilyValidationError> for GraphServiceError {
    fn from(value: FamilyValidationError) -> Self {
        Self::InvalidFamily(value)
    }
}

impl From<GraphLoadError> for GraphServiceError {
    fn from(value: GraphLoadError) -> Self {
        Self::Load(value)
    }
}

impl From<StoreError> for GraphServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub type GraphServiceResult<T> = Result<T, GraphServiceError>;

/// One materialized family.
#[derive(Debug)]
pub(crate) struct FamilyEntry {
    graph: RwLock<FamilyGraph>,
    /// Commit tickets; deltas are persisted in ticket order.
    commits: Mutex<CommitQueue>,
    persisted: Condvar,
    /// Mutations holding this entry that have not finished persisting.
    in_flight: AtomicUsize,
    /// An earlier delta failed to persist; memory is ahead of the store.
    stale: AtomicBool,
    deleted: AtomicBool,
}

#[derive(Debug, Default)]
struct CommitQueue {
    issued: u64,
    persisted: u64,
}

impl FamilyEntry {
    fn new(graph: FamilyGraph) -> Self {
        Self {
            graph: RwLock::new(graph),
            commits: Mutex::new(CommitQueue::default()),
            persisted: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            stale: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    fn read(&self, family_id: FamilyId) -> GraphServiceResult<RwLockReadGuard<'_, FamilyGraph>> {
        let guard = self
            .graph
            .read()
            .map_err(|_| GraphServiceError::LockPoisoned)?;
        if self.deleted.load(Ordering::SeqCst) {
            return Err(Rejection::NotFound(family_id).into());
        }
        Ok(guard)
    }

    fn write(&self, family_id: FamilyId) -> GraphServiceResult<RwLockWriteGuard<'_, FamilyGraph>> {
        let guard = self
            .graph
            .write()
            .map_err(|_| GraphServiceError::LockPoisoned)?;
        if self.deleted.load(Ordering::SeqCst) {
            return Err(Rejection::NotFound(family_id).into());
        }
        if self.stale.load(Ordering::SeqCst) {
            return Err(stale_error(family_id));
        }
        Ok(guard)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    /// Next commit ticket. Callers hold the graph write lock, so tickets
    /// follow commit order.
    fn issue_ticket(&self) -> u64 {
        // The queue only holds counters; a poisoned lock still has valid ones.
        let mut queue = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = queue.issued;
        queue.issued += 1;
        ticket
    }

    /// Blocks until every earlier ticket has been persisted.
    fn wait_turn(&self, ticket: u64) -> PersistTurn<'_> {
        let mut queue = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
        while queue.persisted != ticket {
            queue = self
                .persisted
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        PersistTurn { entry: self }
    }
}

/// Exclusive right to persist; dropping it admits the next ticket.
struct PersistTurn<'a> {
    entry: &'a FamilyEntry,
}

impl Drop for PersistTurn<'_> {
    fn drop(&mut self) {
        let mut queue = self
            .entry
            .commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.persisted += 1;
        self.entry.persisted.notify_all();
    }
}

/// Keeps an entry registered until the mutation holding it has persisted.
struct WriteClaim {
    entry: Arc<FamilyEntry>,
}

impl WriteClaim {
    /// Must run under the registry lock so `evict` sees the claim.
    fn new(entry: &Arc<FamilyEntry>) -> Self {
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            entry: Arc::clone(entry),
        }
    }
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of an in-memory commit, waiting to be persisted.
#[derive(Debug)]
pub(crate) struct Staged<T> {
    pub(crate) value: T,
    pub(crate) delta: GraphDelta,
    pub(crate) records: Vec<ActivityRecord>,
}

/// Family relationship graph engine.
///
/// Generic over the host's store and activity recorder; pass `Arc<_>` to keep
/// a handle on either.
pub struct FamilyGraphService<S: FamilyStore, R: ActivityRecorder> {
    store: S,
    recorder: R,
    validator: Validator,
    calculator: GenerationCalculator,
    families: RwLock<HashMap<FamilyId, Arc<FamilyEntry>>>,
    /// Bumped whenever an entry leaves the registry.
    removals: AtomicU64,
}

impl<S: FamilyStore, R: ActivityRecorder> FamilyGraphService<S, R> {
    /// Engine with the default policy.
    pub fn new(store: S, recorder: R) -> Self {
        Self::with_policy(store, recorder, GraphPolicy::default())
    }

    pub fn with_policy(store: S, recorder: R, policy: GraphPolicy) -> Self {
        Self {
            store,
            recorder,
            validator: Validator::new(policy),
            calculator: GenerationCalculator::new(),
            families: RwLock::new(HashMap::new()),
            removals: AtomicU64::new(0),
        }
    }

    pub fn from_config(store: S, recorder: R, config: &EngineConfig) -> Self {
        Self::with_policy(store, recorder, config.policy.clone())
    }

    pub fn policy(&self) -> &GraphPolicy {
        self.validator.policy()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub(crate) fn validator(&self) -> &Validator {
        &self.validator
    }

    pub(crate) fn calculator(&self) -> &GenerationCalculator {
        &self.calculator
    }

    /// Returns whether the family graph is currently materialized.
    pub fn is_loaded(&self, family_id: FamilyId) -> GraphServiceResult<bool> {
        let families = self
            .families
            .read()
            .map_err(|_| GraphServiceError::LockPoisoned)?;
        Ok(families.contains_key(&family_id))
    }

    /// Drops the materialized graph; returns whether it was dropped.
    ///
    /// A family with mutations still committing or persisting stays loaded;
    /// the host retries on its next idle pass.
    pub fn evict(&self, family_id: FamilyId) -> GraphServiceResult<bool> {
        let mut families = self
            .families
            .write()
            .map_err(|_| GraphServiceError::LockPoisoned)?;
        let Some(entry) = families.get(&family_id) else {
            return Ok(false);
        };
        let in_flight = entry.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            info!(
                "event=family_evict module=service status=busy family_id={family_id} in_flight={in_flight}"
            );
            return Ok(false);
        }
        families.remove(&family_id);
        self.removals.fetch_add(1, Ordering::SeqCst);
        info!("event=family_evict module=service status=ok family_id={family_id}");
        Ok(true)
    }

    pub(crate) fn register(&self, graph: FamilyGraph) -> GraphServiceResult<()> {
        let family_id = graph.family_id();
        let mut families = self
            .families
            .write()
            .map_err(|_| GraphServiceError::LockPoisoned)?;
        families
            .entry(family_id)
            .or_insert_with(|| Arc::new(FamilyEntry::new(graph)));
        Ok(())
    }

    /// Removes `entry` from the registry unless it was already replaced.
    pub(crate) fn unregister(&self, family_id: FamilyId, entry: &Arc<FamilyEntry>) {
        let Ok(mut families) = self.families.write() else {
            return;
        };
        if families
            .get(&family_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            families.remove(&family_id);
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Registered entry, hydrating it from the store on first access.
    pub(crate) fn entry(&self, family_id: FamilyId) -> GraphServiceResult<Arc<FamilyEntry>> {
        self.lookup(family_id, Arc::clone)
    }

    /// Resolves the family entry and runs `hold` on it under the registry lock.
    fn lookup<T>(
        &self,
        family_id: FamilyId,
        hold: impl Fn(&Arc<FamilyEntry>) -> T,
    ) -> GraphServiceResult<T> {
        loop {
            {
                let families = self
                    .families
                    .read()
                    .map_err(|_| GraphServiceError::LockPoisoned)?;
                if let Some(entry) = families.get(&family_id) {
                    return Ok(hold(entry));
                }
            }

            let removals = self.removals.load(Ordering::SeqCst);
            let graph = self.hydrate(family_id)?;

            let mut families = self
                .families
                .write()
                .map_err(|_| GraphServiceError::LockPoisoned)?;
            // Another thread may have hydrated the same family meanwhile.
            if let Some(entry) = families.get(&family_id) {
                return Ok(hold(entry));
            }
            // An entry was dropped while we read the store; the read may predate
            // its last persist.
            if self.removals.load(Ordering::SeqCst) != removals {
                debug!("event=family_load module=service status=retry family_id={family_id}");
                continue;
            }
            let entry = Arc::new(FamilyEntry::new(graph));
            let held = hold(&entry);
            families.insert(family_id, entry);
            return Ok(held);
        }
    }

    fn hydrate(&self, family_id: FamilyId) -> GraphServiceResult<FamilyGraph> {
        let started_at = Instant::now();
        let snapshot = self
            .store
            .load_family_graph(family_id)?
            .ok_or(Rejection::NotFound(family_id))?;
        let graph = FamilyGraph::hydrate(
            snapshot.family,
            snapshot.members,
            snapshot.relationships,
            &self.calculator,
        )
        .map_err(|err| {
            error!("event=family_load module=service status=error family_id={family_id} error={err}");
            GraphServiceError::Load(err)
        })?;
        info!(
            "event=family_load module=service status=ok family_id={} members={} edges={} duration_ms={}",
            family_id,
            graph.index().member_count(),
            graph.index().edge_count(),
            started_at.elapsed().as_millis()
        );
        Ok(graph)
    }

    /// Runs `f` against a consistent snapshot of the family.
    pub(crate) fn read<T>(
        &self,
        family_id: FamilyId,
        f: impl FnOnce(&FamilyGraph) -> T,
    ) -> GraphServiceResult<T> {
        let entry = self.entry(family_id)?;
        let graph = entry.read(family_id)?;
        Ok(f(&graph))
    }

    /// Applies `f` under the family write lock, then persists and records.
    ///
    /// `f` must leave the graph untouched whenever it returns `Err`. The write
    /// lock is released before waiting for earlier commits to persist.
    pub(crate) fn mutate<T>(
        &self,
        family_id: FamilyId,
        f: impl FnOnce(&Arc<FamilyEntry>, &mut FamilyGraph) -> GraphServiceResult<Staged<T>>,
    ) -> GraphServiceResult<T> {
        let claim = self.lookup(family_id, WriteClaim::new)?;
        let entry = &claim.entry;
        let mut graph = entry.write(family_id)?;
        let staged = f(entry, &mut graph)?;
        if cfg!(debug_assertions) && !entry.deleted.load(Ordering::SeqCst) {
            if let Err(err) = self.calculator.verify(graph.index()) {
                error!(
                    "event=generation_verify module=service status=error family_id={family_id} member_id={}",
                    err.member_id()
                );
            }
        }
        let ticket = entry.issue_ticket();
        drop(graph);
        let turn = entry.wait_turn(ticket);
        self.finish(family_id, entry, turn, staged)
    }

    fn finish<T>(
        &self,
        family_id: FamilyId,
        entry: &Arc<FamilyEntry>,
        _turn: PersistTurn<'_>,
        staged: Staged<T>,
    ) -> GraphServiceResult<T> {
        if entry.stale.load(Ordering::SeqCst) {
            return Err(stale_error(family_id));
        }

        let started_at = Instant::now();
        if let Err(err) = self.store.persist(family_id, &staged.delta) {
            entry.stale.store(true, Ordering::SeqCst);
            self.unregister(family_id, entry);
            error!(
                "event=family_persist module=service status=error family_id={family_id} error={err}"
            );
            return Err(GraphServiceError::Store(err));
        }
        info!(
            "event=family_persist module=service status=ok family_id={} duration_ms={}",
            family_id,
            started_at.elapsed().as_millis()
        );
        // A deleted family stays registered until the store has dropped it too.
        if entry.deleted.load(Ordering::SeqCst) {
            self.unregister(family_id, entry);
        }

        for record in &staged.records {
            if let Err(err) = self.recorder.record(record) {
                warn!(
                    "event=activity_record module=service status=error family_id={} target_id={} error={}",
                    family_id, record.target_id, err
                );
            }
        }
        Ok(staged.value)
    }
}

fn stale_error(family_id: FamilyId) -> GraphServiceError {
    GraphServiceError::Store(StoreError::Unavailable(format!(
        "family {family_id} was evicted after a failed write"
    )))
}

#[cfg(test)]
mod tests {
    use super::{FamilyGraphService, GraphServiceError};
    use crate::graph::validator::{GraphPolicy, Rejection};
    use crate::repo::activity::MemoryActivityRecorder;
    use crate::repo::store::MemoryFamilyStore;
    use uuid::Uuid;

    #[test]
    fn unknown_family_is_not_found() {
        let service = FamilyGraphService::new(MemoryFamilyStore::new(), MemoryActivityRecorder::new());
        let family_id = Uuid::new_v4();
        let err = service.entry(family_id).unwrap_err();
        assert!(matches!(
            err,
            GraphServiceError::Rejected(Rejection::NotFound(id)) if id == family_id
        ));
        assert!(!service.is_loaded(family_id).unwrap());
    }

    #[test]
    fn policy_is_exposed() {
        let policy = GraphPolicy {
            max_parents: None,
            reject_spouse_of_parent_child: false,
        };
        let service = FamilyGraphService::with_policy(
            MemoryFamilyStore::new(),
            MemoryActivityRecorder::new(),
            policy.clone(),
        );
        assert_eq!(service.policy(), &policy);
    }
}
