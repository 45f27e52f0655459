use famtree_core::db::{open_db, open_db_in_memory, share, SharedConnection};
use famtree_core::{
    ActivityAction, ActivityTarget, FamilyGraphService, FamilyStore, Gender, GraphServiceError,
    MemberProfile, NewMember, RelationshipType, SqliteActivityRecorder, SqliteFamilyStore,
    StoreError,
};
use uuid::Uuid;

type SqliteEngine = FamilyGraphService<SqliteFamilyStore, SqliteActivityRecorder>;

fn engine(conn: &SharedConnection) -> SqliteEngine {
    FamilyGraphService::new(
        SqliteFamilyStore::try_new(conn.clone()).unwrap(),
        SqliteActivityRecorder::try_new(conn.clone()).unwrap(),
    )
}

fn add(engine: &SqliteEngine, family_id: Uuid, user: Uuid, name: &str) -> Uuid {
    engine
        .add_member(
            family_id,
            MemberProfile::living(name, Gender::Other, 0).into(),
            user,
        )
        .unwrap()
        .member
        .id
}

#[test]
fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("family.db");
    let user = Uuid::new_v4();

    let (family_id, before) = {
        let conn = share(open_db(&path).unwrap());
        let engine = engine(&conn);
        let family_id = engine.create_family("Persisted", user).unwrap().id;
        let grandma = add(&engine, family_id, user, "Grandma");
        let mom = add(&engine, family_id, user, "Mom");
        let dad = add(&engine, family_id, user, "Dad");
        let kid = add(&engine, family_id, user, "Kid");
        engine
            .add_relationship(family_id, grandma, mom, RelationshipType::Parent, user)
            .unwrap();
        engine
            .add_relationship(family_id, mom, dad, RelationshipType::Spouse, user)
            .unwrap();
        engine
            .add_relationship(family_id, kid, mom, RelationshipType::Child, user)
            .unwrap();
        let mut profile = engine.member(family_id, kid).unwrap().unwrap().profile();
        profile.avatar = Some("media/kid.png".to_string());
        engine
            .update_member_profile(family_id, kid, profile, user)
            .unwrap();
        (family_id, engine.snapshot(family_id).unwrap())
    };

    let conn = share(open_db(&path).unwrap());
    let reopened = engine(&conn);
    let after = reopened.snapshot(family_id).unwrap();

    assert_eq!(after, before);
    assert!(after
        .relationships
        .iter()
        .all(|edge| edge.kind != RelationshipType::Child));
    let kid = after
        .members
        .iter()
        .find(|member| member.full_name == "Kid")
        .unwrap();
    assert_eq!(kid.generation, 2);
    assert_eq!(kid.avatar.as_deref(), Some("media/kid.png"));
}

#[test]
fn removals_and_family_delete_reach_the_database() {
    let conn = share(open_db_in_memory().unwrap());
    let engine = engine(&conn);
    let user = Uuid::new_v4();
    let family_id = engine.create_family("Shrinking", user).unwrap().id;
    let a = add(&engine, family_id, user, "A");
    let b = add(&engine, family_id, user, "B");
    let edge_id = engine
        .add_relationship(family_id, a, b, RelationshipType::Parent, user)
        .unwrap();

    engine.remove_relationship(family_id, edge_id, user).unwrap();
    engine.remove_member(family_id, b, user).unwrap();
    let stored = engine.store().load_family_graph(family_id).unwrap().unwrap();
    assert!(stored.relationships.is_empty());
    assert_eq!(stored.members.len(), 1);

    engine.delete_family(family_id, user).unwrap();
    assert!(engine.store().load_family_graph(family_id).unwrap().is_none());
    let rows: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM family_members;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn activity_feed_is_written_in_commit_order() {
    let conn = share(open_db_in_memory().unwrap());
    let engine = engine(&conn);
    let user = Uuid::new_v4();
    let family_id = engine.create_family("Audited", user).unwrap().id;
    let parent = add(&engine, family_id, user, "Parent");

    let (child, edge_id) = engine
        .add_member_with_relationship(
            family_id,
            NewMember::from(MemberProfile::living("Child", Gender::Female, 0)),
            parent,
            RelationshipType::Child,
            user,
        )
        .unwrap();

    let feed = engine.recorder().list_for_family(family_id).unwrap();
    let summary: Vec<_> = feed
        .iter()
        .map(|record| (record.action, record.target_type, record.target_id))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ActivityAction::New, ActivityTarget::FamilyMember, parent),
            (ActivityAction::New, ActivityTarget::FamilyMember, child.member.id),
            (ActivityAction::New, ActivityTarget::Relationship, edge_id),
        ]
    );
    assert!(feed.iter().all(|record| record.acting_user_id == user));
    assert!(engine
        .recorder()
        .list_for_family(Uuid::new_v4())
        .unwrap()
        .is_empty());
}

#[test]
fn corrupt_rows_surface_as_invalid_data() {
    let conn = share(open_db_in_memory().unwrap());
    let engine = engine(&conn);
    let user = Uuid::new_v4();
    let family_id = engine.create_family("Corrupt", user).unwrap().id;
    add(&engine, family_id, user, "Valid");
    conn.lock()
        .unwrap()
        .execute(
            "INSERT INTO family_members
                (id, family_id, full_name, gender, date_of_birth, is_alive, created_at, updated_at)
             VALUES ('not-a-uuid', ?1, 'Broken', 'other', 0, 1, 0, 0);",
            [family_id.to_string()],
        )
        .unwrap();
    engine.evict(family_id).unwrap();

    let err = engine.members(family_id).unwrap_err();

    assert!(matches!(
        err,
        GraphServiceError::Store(StoreError::InvalidData(ref message)) if message.contains("not-a-uuid")
    ));
}

#[test]
fn delta_for_unknown_family_is_refused() {
    let conn = share(open_db_in_memory().unwrap());
    let store = SqliteFamilyStore::try_new(conn).unwrap();

    let err = store
        .persist(Uuid::new_v4(), &famtree_core::GraphDelta::default())
        .unwrap_err();

    assert!(matches!(err, StoreError::UnknownFamily(_)));
}
