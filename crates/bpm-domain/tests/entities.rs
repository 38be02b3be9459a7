use bpm_domain::{cached_state, DbEntity, Entity, EntityKind, EventSubscriptionEntity, EventType, ExecutionEntity,
                 IdentityLinkEntity, PropertyEntity, SuspensionState};
use serde_json::json;

#[test]
fn every_kind_has_a_unique_name() {
  let mut names: Vec<&str> = EntityKind::ALL.iter().map(|k| k.name()).collect();
  names.sort();
  names.dedup();
  assert_eq!(names.len(), EntityKind::ALL.len());
  assert_eq!(EntityKind::from_name("Execution"), Some(EntityKind::Execution));
  assert_eq!(EntityKind::from_name("Molecule"), None);
}

#[test]
fn revision_capability_follows_kind() {
  let pi = ExecutionEntity::new_process_instance("proc:1", Some("bk".into()));
  assert_eq!(pi.revision(), Some(0));
  assert!(EntityKind::Execution.has_revision());

  let link = IdentityLinkEntity { id: "l1".into(), ..Default::default() };
  assert_eq!(link.revision(), None);
  assert!(!EntityKind::IdentityLink.has_revision());

  let mut e = link.into_entity();
  e.set_revision(7);
  assert_eq!(e.revision(), None);
}

#[test]
fn entity_json_uses_camel_case_field_names() {
  let mut pi = ExecutionEntity::new_process_instance("proc:1", None);
  pi.activity_id = Some("start".into());
  let v = pi.clone().into_entity().to_json().unwrap();
  assert_eq!(v["processDefinitionId"], json!("proc:1"));
  assert_eq!(v["isScope"], json!(true));
  assert_eq!(v["suspensionState"], json!(1));

  let back = Entity::from_json(EntityKind::Execution, v).unwrap();
  assert_eq!(ExecutionEntity::from_entity(back).unwrap(), pi);
}

#[test]
fn property_name_is_its_identifier() {
  let mut p = PropertyEntity { name: "historyLevel".into(), revision: 1, value: Some("3".into()) };
  assert_eq!(p.id(), "historyLevel");
  p.set_id("schema.version".into());
  assert_eq!(p.name, "schema.version");
}

#[test]
fn event_type_and_suspension_state_serialize_as_scalars() {
  let sub = EventSubscriptionEntity { id: "s1".into(), event_type: EventType::Signal, ..Default::default() };
  let v = serde_json::to_value(&sub).unwrap();
  assert_eq!(v["eventType"], json!("signal"));
  assert_eq!(serde_json::to_value(SuspensionState::Suspended).unwrap(), json!(2));
  assert!(serde_json::from_value::<SuspensionState>(json!(9)).is_err());
}

#[test]
fn cached_state_bits_toggle_independently() {
  let mut e = ExecutionEntity::default();
  e.set_cached_state(cached_state::TASKS, true);
  e.set_cached_state(cached_state::VARIABLES, true);
  assert!(e.has_cached_state(cached_state::TASKS));
  assert!(!e.has_cached_state(cached_state::JOBS));
  e.set_cached_state(cached_state::TASKS, false);
  assert!(!e.has_cached_state(cached_state::TASKS));
  assert!(e.has_cached_state(cached_state::VARIABLES));
}

#[test]
fn from_entity_rejects_other_kinds() {
  let e = IdentityLinkEntity { id: "x".into(), ..Default::default() }.into_entity();
  assert!(ExecutionEntity::from_entity(e).is_none());
}
