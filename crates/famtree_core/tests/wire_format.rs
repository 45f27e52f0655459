use famtree_core::{
    ActivityAction, ActivityRecord, ActivityTarget, FamilyMember, Gender, MemberProfile,
    Relationship, RelationshipType,
};
use serde_json::{json, Value};
use uuid::Uuid;

#[test]
fn relationship_serializes_kind_as_type() {
    let family_id = Uuid::new_v4();
    let edge = Relationship::new(
        family_id,
        Uuid::new_v4(),
        Uuid::new_v4(),
        RelationshipType::Child,
    )
    .into_canonical();

    let value = serde_json::to_value(&edge).unwrap();

    assert_eq!(value["type"], "parent");
    assert_eq!(value["family_id"], family_id.to_string());
    assert!(value.get("kind").is_none());
    let back: Relationship = serde_json::from_value(value).unwrap();
    assert_eq!(back, edge);
}

#[test]
fn activity_record_uses_upper_case_codes() {
    let record = ActivityRecord::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        ActivityAction::New,
        ActivityTarget::FamilyMember,
        Uuid::new_v4(),
        "Added member Ada".to_string(),
    );

    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["action"], "NEW");
    assert_eq!(value["target_type"], "FAMILY_MEMBER");
}

#[test]
fn member_json_is_validated_on_the_way_in() {
    let member = FamilyMember::new(
        Uuid::new_v4(),
        MemberProfile::living("Ada", Gender::Female, 100).into(),
    )
    .unwrap();
    let mut value = serde_json::to_value(&member).unwrap();
    assert_eq!(value["gender"], "female");
    assert_eq!(value["date_of_death"], Value::Null);

    value["date_of_death"] = json!(50);
    value["is_alive"] = json!(false);
    let err = serde_json::from_value::<FamilyMember>(value).unwrap_err();
    assert!(err.to_string().contains("date_of_death"));

    let mut blank = serde_json::to_value(&member).unwrap();
    blank["full_name"] = json!("   ");
    assert!(serde_json::from_value::<FamilyMember>(blank).is_err());
}
