//! Activity recorder contract and adapters.
//!
//! # Responsibility
//! - Receive one audit record per accepted mutation.
//!
//! # Invariants
//! - Recording is fire-and-forget for the engine: a failure here never rolls
//!   back a committed mutation.

use crate::db::migrations::ensure_schema_ready;
use crate::db::{DbError, SharedConnection};
use crate::model::activity::{ActivityAction, ActivityRecord, ActivityTarget};
use crate::model::family::FamilyId;
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub type RecorderResult<T> = Result<T, RecorderError>;

#[derive(Debug)]
pub enum RecorderError {
    Db(DbError),
    InvalidData(String),
    Unavailable(String),
}

impl Display for RecorderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid activity log data: {message}"),
            Self::Unavailable(message) => write!(f, "activity recorder unavailable: {message}"),
        }
    }
}

impl Error for RecorderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RecorderError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RecorderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Sink for audit records produced by the engine.
pub trait ActivityRecorder: Send + Sync {
    fn record(&self, record: &ActivityRecord) -> RecorderResult<()>;
}

impl<T: ActivityRecorder + ?Sized> ActivityRecorder for Arc<T> {
    fn record(&self, record: &ActivityRecord) -> RecorderResult<()> {
        (**self).record(record)
    }
}

/// Keeps records in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryActivityRecorder {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record seen so far.
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_for_family(&self, family_id: FamilyId) -> Vec<ActivityRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.family_id == family_id)
            .collect()
    }
}

impl ActivityRecorder for MemoryActivityRecorder {
    fn record(&self, record: &ActivityRecord) -> RecorderResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RecorderError::Unavailable("memory recorder lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }
}

/// Appends records to the `activity_logs` table.
#[derive(Debug, Clone)]
pub struct SqliteActivityRecorder {
    conn: SharedConnection,
}

impl SqliteActivityRecorder {
    pub fn try_new(conn: SharedConnection) -> RecorderResult<Self> {
        {
            let guard = lock(&conn)?;
            ensure_schema_ready(&guard, &["activity_logs"])?;
        }
        Ok(Self { conn })
    }

    /// Activity feed of one family, oldest first.
    pub fn list_for_family(&self, family_id: FamilyId) -> RecorderResult<Vec<ActivityRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT family_id, acting_user_id, action, target_type, target_id, content, created_at
             FROM activity_logs
             WHERE family_id = ?1
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([family_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_activity_row(row)?);
        }
        Ok(records)
    }
}

impl ActivityRecorder for SqliteActivityRecorder {
    fn record(&self, record: &ActivityRecord) -> RecorderResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO activity_logs (
                family_id, acting_user_id, action, target_type, target_id, content, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                record.family_id.to_string(),
                record.acting_user_id.to_string(),
                record.action.as_str(),
                record.target_type.as_str(),
                record.target_id.to_string(),
                record.content,
                record.created_at,
            ],
        )?;
        Ok(())
    }
}

fn lock(conn: &SharedConnection) -> RecorderResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| RecorderError::Db(DbError::ConnectionPoisoned))
}

fn parse_activity_row(row: &Row<'_>) -> RecorderResult<ActivityRecord> {
    let action_text: String = row.get(2)?;
    let action = ActivityAction::parse(&action_text).ok_or_else(|| {
        RecorderError::InvalidData(format!("invalid action `{action_text}` in activity_logs.action"))
    })?;
    let target_text: String = row.get(3)?;
    let target_type = ActivityTarget::parse(&target_text).ok_or_else(|| {
        RecorderError::InvalidData(format!(
            "invalid target type `{target_text}` in activity_logs.target_type"
        ))
    })?;

    Ok(ActivityRecord {
        family_id: parse_uuid(row, 0, "activity_logs.family_id")?,
        acting_user_id: parse_uuid(row, 1, "activity_logs.acting_user_id")?,
        action,
        target_type,
        target_id: parse_uuid(row, 4, "activity_logs.target_id")?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn parse_uuid(row: &Row<'_>, column: usize, label: &str) -> RecorderResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RecorderError::InvalidData(format!("invalid uuid value `{text}` in {label}")))
}

#[cfg(test)]
mod tests {
    use super::{ActivityRecorder, MemoryActivityRecorder, SqliteActivityRecorder};
    use crate::db::{open_db_in_memory, share};
    use crate::model::activity::{ActivityAction, ActivityRecord, ActivityTarget};
    use uuid::Uuid;

    fn sample(family_id: Uuid) -> ActivityRecord {
        ActivityRecord::new(
            family_id,
            Uuid::new_v4(),
            ActivityAction::New,
            ActivityTarget::FamilyMember,
            Uuid::new_v4(),
            "Alice joined the family tree",
        )
    }

    #[test]
    fn memory_recorder_filters_by_family() {
        let recorder = MemoryActivityRecorder::new();
        let family_id = Uuid::new_v4();
        recorder.record(&sample(family_id)).unwrap();
        recorder.record(&sample(Uuid::new_v4())).unwrap();

        assert_eq!(recorder.records().len(), 2);
        assert_eq!(recorder.records_for_family(family_id).len(), 1);
    }

    #[test]
    fn sqlite_recorder_round_trips_feed() {
        let recorder = SqliteActivityRecorder::try_new(share(open_db_in_memory().unwrap())).unwrap();
        let family_id = Uuid::new_v4();
        let record = sample(family_id);
        recorder.record(&record).unwrap();
        recorder.record(&sample(Uuid::new_v4())).unwrap();

        assert_eq!(recorder.list_for_family(family_id).unwrap(), vec![record]);
    }
}
