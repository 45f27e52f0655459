//! Family relationship graph engine.
//! Single source of truth for genealogy invariants: typed edges between the
//! members of one family, acyclic ancestry, symmetric spouse links and
//! coherent generation depth.

pub mod config;
pub mod db;
pub mod graph;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig, LoggingConfig};
pub use graph::family_graph::{FamilyGraph, GraphLoadError};
pub use graph::generation::{
    GenerationCalculator, GenerationConflict, GenerationError, GenerationPlan,
};
pub use graph::index::{GraphIndex, IndexError, MemberHandle};
pub use graph::validator::{GraphPolicy, Rejection, Validator, Verdict};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::activity::{ActivityAction, ActivityRecord, ActivityTarget};
pub use model::family::{Family, FamilyId, FamilyValidationError};
pub use model::member::{
    FamilyMember, Gender, Generation, MemberId, MemberProfile, MemberValidationError,
    MemberWarning, NewMember,
};
pub use model::relationship::{
    Direction, EdgeView, Relationship, RelationshipId, RelationshipType,
};
pub use model::UserId;
pub use repo::activity::{
    ActivityRecorder, MemoryActivityRecorder, RecorderError, SqliteActivityRecorder,
};
pub use repo::sqlite_store::SqliteFamilyStore;
pub use repo::store::{FamilySnapshot, FamilyStore, GraphDelta, MemoryFamilyStore, StoreError};
pub use service::graph_service::{FamilyGraphService, GraphServiceError, GraphServiceResult};
pub use service::member_service::MemberWrite;
pub use service::mutation::{CancelFlag, MutationPhase};

/// Returns the engine crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
