use bpm_domain::{ByteArrayEntity, DbEntity, EntityKind, ExecutionEntity, ProcessDefinitionEntity, ResourceEntity};
use bpm_flow::{EngineError, MapGrid, MapSession, MapSessionFactory, Page, ParamValue, PersistenceSession,
               ProcessDefinitionQuery, QueryParameter, Row, Session};
use std::sync::Arc;

fn factory() -> MapSessionFactory {
  MapSessionFactory::with_defaults(Arc::new(MapGrid::new())).unwrap()
}

fn resource(id: &str, deployment: &str) -> ResourceEntity {
  ResourceEntity { id: id.into(),
                   name: Some(format!("{}.bpmn", id)),
                   deployment_id: Some(deployment.into()),
                   bytes: vec![1, 2, 3],
                   generated: false }
}

fn commit(mut s: MapSession) {
  Session::commit(&mut s).unwrap();
  Session::close(&mut s).unwrap();
}

#[test]
fn revision_grows_by_one_per_update_and_stale_update_fails() {
  let f = factory();
  let mut s = f.open_map_session();
  let mut e = ExecutionEntity::new_process_instance("order:1", None);
  assert_eq!(s.insert(&e.clone().into_entity()).unwrap(), Some(1));
  e.revision = 1;
  for expected in 2..=3 {
    let written = s.update(&e.clone().into_entity()).unwrap();
    assert_eq!(written, Some(expected));
    e.revision = expected;
  }
  commit(s);

  let mut s = f.open_map_session();
  let mut stale = e.clone();
  stale.revision = 2;
  let stale = stale.into_entity();
  let err = s.update(&stale).unwrap_err();
  assert!(err.is_optimistic_locking());
  assert_eq!(stale.revision(), Some(2));
  let stored = s.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  assert_eq!(stored.revision(), Some(3));
}

#[test]
fn update_of_missing_row_is_an_optimistic_locking_error() {
  let mut s = factory().open_map_session();
  let mut ghost = ExecutionEntity::new_process_instance("order:1", None);
  ghost.revision = 1;
  assert!(matches!(s.update(&ghost.into_entity()), Err(EngineError::OptimisticLocking(_))));
}

#[test]
fn delete_checks_revision_for_revisioned_kinds() {
  let f = factory();
  let mut s = f.open_map_session();
  let mut e = ExecutionEntity::new_process_instance("order:1", None);
  s.insert(&e.clone().into_entity()).unwrap();
  commit(s);

  let mut s = f.open_map_session();
  assert!(s.delete(&e.clone().into_entity()).unwrap_err().is_optimistic_locking());
  e.revision = 1;
  s.delete(&e.clone().into_entity()).unwrap();
  assert!(s.select_by_id(EntityKind::Execution, &e.id).unwrap().is_none());
  commit(s);
}

#[test]
fn second_unit_of_work_loses_at_commit() {
  let f = factory();
  let mut s = f.open_map_session();
  let mut e = ExecutionEntity::new_process_instance("order:1", None);
  s.insert(&e.clone().into_entity()).unwrap();
  commit(s);
  e.revision = 1;

  let mut first = f.open_map_session();
  let mut second = f.open_map_session();
  assert_eq!(first.update(&e.clone().into_entity()).unwrap(), Some(2));
  assert_eq!(second.update(&e.clone().into_entity()).unwrap(), Some(2));
  Session::commit(&mut first).unwrap();
  let err = Session::commit(&mut second).unwrap_err();
  assert!(err.is_optimistic_locking());

  let mut check = f.open_map_session();
  let stored = check.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  assert_eq!(stored.revision(), Some(2));
}

#[test]
fn rolled_back_writes_are_never_visible() {
  let f = factory();
  let mut s = f.open_map_session();
  let e = ExecutionEntity::new_process_instance("order:1", None);
  s.insert(&e.clone().into_entity()).unwrap();
  assert!(s.select_by_id(EntityKind::Execution, &e.id).unwrap().is_some());
  Session::rollback(&mut s).unwrap();

  let mut other = f.open_map_session();
  assert!(other.select_by_id(EntityKind::Execution, &e.id).unwrap().is_none());
}

#[test]
fn bulk_delete_removes_only_matching_deployment() {
  let f = factory();
  let mut s = f.open_map_session();
  for (id, dep) in [("r1", "D1"), ("r2", "D1"), ("r3", "D1"), ("r4", "D2")] {
    s.insert(&resource(id, dep).into_entity()).unwrap();
  }
  let shared_map = ByteArrayEntity { id: "b1".into(),
                                     deployment_id: Some("D1".into()),
                                     ..Default::default() };
  s.insert(&shared_map.into_entity()).unwrap();
  commit(s);

  let mut s = f.open_map_session();
  let removed = s.delete_bulk("deleteResourcesByDeploymentId", &QueryParameter::text("D1")).unwrap();
  assert_eq!(removed, 3);
  commit(s);

  let mut s = f.open_map_session();
  assert!(s.select_list("selectResourcesByDeploymentId", &QueryParameter::text("D1"))
           .unwrap()
           .is_empty());
  let d2 = s.select_list("selectResourcesByDeploymentId", &QueryParameter::text("D2")).unwrap();
  assert_eq!(d2.len(), 1);
  assert!(s.select_by_id(EntityKind::ByteArray, "b1").unwrap().is_some());
}

#[test]
fn latest_definition_by_key() {
  let f = factory();
  let mut s = f.open_map_session();
  for (id, key, version) in [("order:1", "order", 1), ("order:3", "order", 3), ("order:2", "order", 2), ("invoice:7", "invoice", 7)] {
    s.insert(&ProcessDefinitionEntity::new(id, key, version).into_entity()).unwrap();
  }
  commit(s);

  let mut s = f.open_map_session();
  let latest = s.select_one("selectLatestProcessDefinitionByKey", &QueryParameter::text("order")).unwrap();
  match latest {
    Some(Row::Entity(e)) => assert_eq!(e.id(), "order:3"),
    other => panic!("fila inesperada: {:?}", other),
  }
  assert!(s.select_one("selectLatestProcessDefinitionByKey", &QueryParameter::text("shipping"))
           .unwrap()
           .is_none());

  let query = QueryParameter::ProcessDefinition(ProcessDefinitionQuery { latest: true,
                                                                         ..Default::default() });
  let all_latest = s.select_list("selectProcessDefinitionsByQueryCriteria", &query).unwrap();
  let ids: Vec<&str> = all_latest.iter()
                                 .filter_map(|r| match r {
                                   Row::Entity(e) => Some(e.id()),
                                   _ => None,
                                 })
                                 .collect();
  assert_eq!(ids, vec!["order:3", "invoice:7"]);
}

#[test]
fn unknown_statement_is_a_configuration_error() {
  let mut s = factory().open_map_session();
  let p = QueryParameter::text("x");
  assert!(matches!(s.select_list("selectNothingAtAll", &p), Err(EngineError::Configuration(_))));
  assert!(matches!(s.select_one("selectNothingAtAll", &p), Err(EngineError::Configuration(_))));
  assert!(matches!(s.delete_bulk("selectExecution", &p), Err(EngineError::Configuration(_))));
}

#[test]
fn paging_and_projection() {
  let f = factory();
  let mut s = f.open_map_session();
  let root = ExecutionEntity::new_process_instance("order:1", None);
  let other = ExecutionEntity::new_process_instance("order:1", None);
  let child = ExecutionEntity { id: "child".into(),
                                parent_id: Some(root.id.clone()),
                                process_instance_id: Some(root.id.clone()),
                                process_definition_id: Some("order:1".into()),
                                ..Default::default() };
  for e in [&root, &other, &child] {
    s.insert(&e.clone().into_entity()).unwrap();
  }
  Session::commit(&mut s).unwrap();
  let mut s = f.open_map_session();
  s.db_schema_create().unwrap();

  let ids = s.select_list("selectProcessInstanceIdsByProcessDefinitionId", &QueryParameter::text("order:1"))
             .unwrap();
  assert_eq!(ids,
             vec![Row::Value(ParamValue::Text(root.id.clone())), Row::Value(ParamValue::Text(other.id.clone()))]);

  let paged = QueryParameter::Page { parameter: Box::new(QueryParameter::text("order:1")),
                                     page: Page::new(Some(1), Some(5)) };
  let rows = s.select_list("selectProcessInstanceIdsByProcessDefinitionId", &paged).unwrap();
  assert_eq!(rows, vec![Row::Value(ParamValue::Text(other.id.clone()))]);

  let children = s.select_list("selectExecutionsByParentExecutionId", &QueryParameter::text(root.id.as_str()))
                  .unwrap();
  assert_eq!(children.len(), 1);
}

#[test]
fn schema_lifecycle_on_the_grid() {
  let grid = Arc::new(MapGrid::new());
  let f = MapSessionFactory::with_defaults(grid.clone()).unwrap();
  let mut s = f.open_map_session();
  assert!(!s.is_engine_table_present().unwrap());
  s.db_schema_create().unwrap();
  assert!(s.is_engine_table_present().unwrap());
  assert_eq!(s.db_schema_check_version().unwrap().as_deref(), Some(bpm_flow::map_store::SCHEMA_VERSION));
  assert_eq!(grid.map_counts().unwrap().get("cam.engine.property"), Some(&1));
  s.db_schema_drop().unwrap();
  assert!(grid.map_counts().unwrap().is_empty());
}
