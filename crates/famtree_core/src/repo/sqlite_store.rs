//! SQLite adapter of the family store contract.
//!
//! # Responsibility
//! - Load a family with its members and relationships.
//! - Apply one `GraphDelta` per immediate transaction.
//!
//! # Invariants
//! - Read paths reject undecodable rows instead of masking them.
//! - The connection must come from `db::open_db*` (migrated, foreign keys on).

use crate::db::migrations::ensure_schema_ready;
use crate::db::{DbError, SharedConnection};
use crate::model::family::{Family, FamilyId};
use crate::model::member::{FamilyMember, Gender};
use crate::model::relationship::{Relationship, RelationshipType};
use crate::repo::store::{FamilySnapshot, FamilyStore, GraphDelta, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::MutexGuard;
use uuid::Uuid;

const REQUIRED_TABLES: &[&str] = &["families", "family_members", "relationships"];

const MEMBER_SELECT_SQL: &str = "SELECT
    id,
    family_id,
    full_name,
    gender,
    date_of_birth,
    date_of_death,
    is_alive,
    avatar,
    biography,
    generation,
    created_at,
    updated_at
FROM family_members
WHERE family_id = ?1
ORDER BY created_at ASC, rowid ASC;";

const RELATIONSHIP_SELECT_SQL: &str = "SELECT
    id,
    family_id,
    from_member_id,
    to_member_id,
    type,
    created_at,
    updated_at
FROM relationships
WHERE family_id = ?1
ORDER BY created_at ASC, rowid ASC;";

/// `FamilyStore` over a shared SQLite connection.
#[derive(Debug, Clone)]
pub struct SqliteFamilyStore {
    conn: SharedConnection,
}

impl SqliteFamilyStore {
    /// Wraps a migrated connection; fails fast on an unprepared one.
    pub fn try_new(conn: SharedConnection) -> StoreResult<Self> {
        {
            let guard = lock(&conn)?;
            ensure_schema_ready(&guard, REQUIRED_TABLES)?;
        }
        Ok(Self { conn })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }
}

impl FamilyStore for SqliteFamilyStore {
    fn load_family_graph(&self, family_id: FamilyId) -> StoreResult<Option<FamilySnapshot>> {
        let conn = self.conn()?;

        let family = conn
            .query_row(
                "SELECT id, owner_id, name, created_at, updated_at
                 FROM families
                 WHERE id = ?1;",
                [family_id.to_string()],
                |row| Ok(parse_family_row(row)),
            )
            .optional()?
            .transpose()?;
        let Some(family) = family else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(MEMBER_SELECT_SQL)?;
        let mut rows = stmt.query([family_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_member_row(row)?);
        }

        let mut stmt = conn.prepare(RELATIONSHIP_SELECT_SQL)?;
        let mut rows = stmt.query([family_id.to_string()])?;
        let mut relationships = Vec::new();
        while let Some(row) = rows.next()? {
            relationships.push(parse_relationship_row(row)?);
        }

        Ok(Some(FamilySnapshot {
            family,
            members,
            relationships,
        }))
    }

    fn persist(&self, family_id: FamilyId, delta: &GraphDelta) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let family_key = family_id.to_string();

        if let Some(family) = &delta.family {
            tx.execute(
                "INSERT INTO families (id, owner_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    name = excluded.name,
                    updated_at = excluded.updated_at;",
                params![
                    family.id.to_string(),
                    family.owner_id.to_string(),
                    family.name,
                    family.created_at,
                    family.updated_at,
                ],
            )?;
        }

        let known: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM families WHERE id = ?1);",
            [&family_key],
            |row| row.get(0),
        )?;
        if !known {
            return Err(StoreError::UnknownFamily(family_id));
        }

        for member in &delta.upserted_members {
            tx.execute(
                "INSERT INTO family_members (
                    id, family_id, full_name, gender, date_of_birth, date_of_death,
                    is_alive, avatar, biography, generation, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    full_name = excluded.full_name,
                    gender = excluded.gender,
                    date_of_birth = excluded.date_of_birth,
                    date_of_death = excluded.date_of_death,
                    is_alive = excluded.is_alive,
                    avatar = excluded.avatar,
                    biography = excluded.biography,
                    generation = excluded.generation,
                    updated_at = excluded.updated_at;",
                params![
                    member.id.to_string(),
                    member.family_id.to_string(),
                    member.full_name,
                    gender_to_db(member.gender),
                    member.date_of_birth,
                    member.date_of_death,
                    member.is_alive,
                    member.avatar,
                    member.biography,
                    member.generation,
                    member.created_at,
                    member.updated_at,
                ],
            )?;
        }

        for edge_id in &delta.removed_relationships {
            tx.execute(
                "DELETE FROM relationships WHERE id = ?1 AND family_id = ?2;",
                params![edge_id.to_string(), family_key],
            )?;
        }

        for edge in &delta.added_relationships {
            let edge = edge.clone().into_canonical();
            tx.execute(
                "INSERT INTO relationships (
                    id, family_id, from_member_id, to_member_id, type, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    edge.id.to_string(),
                    edge.family_id.to_string(),
                    edge.from_member_id.to_string(),
                    edge.to_member_id.to_string(),
                    edge.kind.as_str(),
                    edge.created_at,
                    edge.updated_at,
                ],
            )?;
        }

        for member_id in &delta.removed_members {
            tx.execute(
                "DELETE FROM family_members WHERE id = ?1 AND family_id = ?2;",
                params![member_id.to_string(), family_key],
            )?;
        }

        if delta.family_deleted {
            tx.execute("DELETE FROM families WHERE id = ?1;", [&family_key])?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn lock(conn: &SharedConnection) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Db(DbError::ConnectionPoisoned))
}

fn parse_family_row(row: &Row<'_>) -> StoreResult<Family> {
    let family = Family {
        id: parse_uuid(row, 0, "families.id")?,
        owner_id: parse_uuid(row, 1, "families.owner_id")?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    };
    family.validate().map_err(|err| {
        StoreError::InvalidData(format!("family {} failed validation: {err}", family.id))
    })?;
    Ok(family)
}

fn parse_member_row(row: &Row<'_>) -> StoreResult<FamilyMember> {
    let gender_text: String = row.get(3)?;
    let gender = parse_gender(&gender_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid gender `{gender_text}` in family_members.gender"
        ))
    })?;

    let member = FamilyMember {
        id: parse_uuid(row, 0, "family_members.id")?,
        family_id: parse_uuid(row, 1, "family_members.family_id")?,
        full_name: row.get(2)?,
        gender,
        date_of_birth: row.get(4)?,
        date_of_death: row.get(5)?,
        is_alive: row.get(6)?,
        avatar: row.get(7)?,
        biography: row.get(8)?,
        generation: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    };
    member.validate().map_err(|err| {
        StoreError::InvalidData(format!("member {} failed validation: {err}", member.id))
    })?;
    Ok(member)
}

fn parse_relationship_row(row: &Row<'_>) -> StoreResult<Relationship> {
    let type_text: String = row.get(4)?;
    let kind = parse_relationship_type(&type_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid relationship type `{type_text}` in relationships.type"
        ))
    })?;

    Ok(Relationship {
        id: parse_uuid(row, 0, "relationships.id")?,
        family_id: parse_uuid(row, 1, "relationships.family_id")?,
        from_member_id: parse_uuid(row, 2, "relationships.from_member_id")?,
        to_member_id: parse_uuid(row, 3, "relationships.to_member_id")?,
        kind,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_uuid(row: &Row<'_>, column: usize, label: &str) -> StoreResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{text}` in {label}")))
}

fn gender_to_db(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Other => "other",
    }
}

fn parse_gender(value: &str) -> Option<Gender> {
    match value {
        "male" => Some(Gender::Male),
        "female" => Some(Gender::Female),
        "other" => Some(Gender::Other),
        _ => None,
    }
}

fn parse_relationship_type(value: &str) -> Option<RelationshipType> {
    match value {
        "parent" => Some(RelationshipType::Parent),
        "spouse" => Some(RelationshipType::Spouse),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_gender, parse_relationship_type, SqliteFamilyStore};
    use crate::db::{open_db_in_memory, share, DbError};
    use crate::model::member::Gender;
    use crate::model::relationship::RelationshipType;
    use crate::repo::store::StoreError;
    use rusqlite::Connection;

    #[test]
    fn rejects_unmigrated_connection() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteFamilyStore::try_new(share(conn)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Db(DbError::UninitializedConnection { .. })
        ));
    }

    #[test]
    fn accepts_migrated_connection() {
        let conn = open_db_in_memory().unwrap();
        assert!(SqliteFamilyStore::try_new(share(conn)).is_ok());
    }

    #[test]
    fn child_is_never_a_stored_type() {
        assert_eq!(parse_relationship_type("parent"), Some(RelationshipType::Parent));
        assert_eq!(parse_relationship_type("child"), None);
        assert_eq!(parse_gender("female"), Some(Gender::Female));
        assert_eq!(parse_gender("FEMALE"), None);
    }
}
