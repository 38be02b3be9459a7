use bpm_domain::{ByteArrayEntity, DbEntity, EntityKind, ExecutionEntity, ProcessDefinitionEntity, ResourceEntity};
use bpm_flow::{EngineError, PersistenceSession, ProcessDefinitionQuery, QueryParameter, Row, Session};
use bpm_persistence::{StatementSession, StatementSessionFactory};

fn factory() -> StatementSessionFactory {
  let url = format!("file:{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
  let f = StatementSessionFactory::new(&url, 2).unwrap();
  let mut s = f.open_statement_session().unwrap();
  s.db_schema_create().unwrap();
  commit(s);
  f
}

fn commit(mut s: StatementSession) {
  Session::commit(&mut s).unwrap();
  Session::close(&mut s).unwrap();
}

fn resource(id: &str, deployment: &str) -> ResourceEntity {
  ResourceEntity { id: id.into(),
                   name: Some(format!("{}.bpmn", id)),
                   deployment_id: Some(deployment.into()),
                   bytes: vec![1, 2, 3],
                   generated: false }
}

fn entity_ids(rows: &[Row]) -> Vec<String> {
  rows.iter()
      .filter_map(|r| match r {
        Row::Entity(e) => Some(e.id().to_string()),
        _ => None,
      })
      .collect()
}

#[test]
fn schema_version_and_presence() {
  let url = format!("file:{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
  let f = StatementSessionFactory::new(&url, 1).unwrap();
  let mut s = f.open_statement_session().unwrap();
  assert!(!s.is_engine_table_present().unwrap());
  assert_eq!(s.db_schema_check_version().unwrap(), None);
  s.db_schema_create().unwrap();
  assert!(s.is_engine_table_present().unwrap());
  assert_eq!(s.db_schema_check_version().unwrap().as_deref(), Some("1.0.0"));
  s.db_schema_drop().unwrap();
  assert!(!s.is_engine_table_present().unwrap());
  commit(s);
}

#[test]
fn revisions_and_optimistic_locking() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  let mut e = ExecutionEntity::new_process_instance("order:1", None);
  assert_eq!(s.insert(&e.clone().into_entity()).unwrap(), Some(1));
  e.revision = 1;
  assert_eq!(s.update(&e.clone().into_entity()).unwrap(), Some(2));
  e.revision = 2;
  assert_eq!(s.update(&e.clone().into_entity()).unwrap(), Some(3));
  commit(s);

  let mut s = f.open_statement_session().unwrap();
  let mut stale = e.clone();
  stale.revision = 2;
  assert!(s.update(&stale.clone().into_entity()).unwrap_err().is_optimistic_locking());
  assert!(s.delete(&stale.into_entity()).unwrap_err().is_optimistic_locking());
  let stored = s.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  assert_eq!(stored.revision(), Some(3));

  e.revision = 3;
  s.delete(&e.clone().into_entity()).unwrap();
  assert!(s.select_by_id(EntityKind::Execution, &e.id).unwrap().is_none());
  commit(s);

  // the row is gone, so the update reports it as missing
  let mut s = f.open_statement_session().unwrap();
  assert!(matches!(s.update(&e.into_entity()), Err(EngineError::OptimisticLocking(_))));
}

#[test]
fn rollback_discards_the_transaction() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  let e = ExecutionEntity::new_process_instance("order:1", None);
  s.insert(&e.clone().into_entity()).unwrap();
  assert!(s.select_by_id(EntityKind::Execution, &e.id).unwrap().is_some());
  Session::rollback(&mut s).unwrap();
  Session::close(&mut s).unwrap();

  let mut s = f.open_statement_session().unwrap();
  assert!(s.select_by_id(EntityKind::Execution, &e.id).unwrap().is_none());
}

#[test]
fn bulk_delete_removes_only_matching_deployment() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  for (id, dep) in [("r1", "D1"), ("r2", "D1"), ("r3", "D1"), ("r4", "D2")] {
    s.insert(&resource(id, dep).into_entity()).unwrap();
  }
  let same_table = ByteArrayEntity { id: "b1".into(),
                                     deployment_id: Some("D1".into()),
                                     ..Default::default() };
  s.insert(&same_table.into_entity()).unwrap();
  commit(s);

  let mut s = f.open_statement_session().unwrap();
  assert_eq!(s.delete_bulk("deleteResourcesByDeploymentId", &QueryParameter::text("D1")).unwrap(), 3);
  commit(s);

  let mut s = f.open_statement_session().unwrap();
  assert!(s.select_list("selectResourcesByDeploymentId", &QueryParameter::text("D1"))
           .unwrap()
           .is_empty());
  let d2 = s.select_list("selectResourcesByDeploymentId", &QueryParameter::text("D2")).unwrap();
  assert_eq!(entity_ids(&d2), vec!["r4".to_string()]);
  assert!(s.select_by_id(EntityKind::ByteArray, "b1").unwrap().is_some());
}

#[test]
fn latest_definition_by_key() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  for (id, key, version) in [("order:1", "order", 1), ("order:3", "order", 3), ("order:2", "order", 2), ("invoice:7", "invoice", 7)] {
    s.insert(&ProcessDefinitionEntity::new(id, key, version).into_entity()).unwrap();
  }
  commit(s);

  let mut s = f.open_statement_session().unwrap();
  match s.select_one("selectLatestProcessDefinitionByKey", &QueryParameter::text("order")).unwrap() {
    Some(Row::Entity(e)) => assert_eq!(e.id(), "order:3"),
    other => panic!("fila inesperada: {:?}", other),
  }
  assert!(s.select_one("selectLatestProcessDefinitionByKey", &QueryParameter::text("shipping"))
           .unwrap()
           .is_none());

  let query = QueryParameter::ProcessDefinition(ProcessDefinitionQuery { latest: true,
                                                                         ..Default::default() });
  let mut ids = entity_ids(&s.select_list("selectProcessDefinitionsByQueryCriteria", &query).unwrap());
  ids.sort();
  assert_eq!(ids, vec!["invoice:7".to_string(), "order:3".to_string()]);
}

#[test]
fn unknown_statement_is_a_configuration_error() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  let p = QueryParameter::text("x");
  assert!(matches!(s.select_list("selectNothingAtAll", &p), Err(EngineError::Configuration(_))));
  assert!(matches!(s.delete_bulk("selectExecution", &p), Err(EngineError::Configuration(_))));
}

#[test]
fn children_are_found_through_the_parent_column() {
  let f = factory();
  let mut s = f.open_statement_session().unwrap();
  let root = ExecutionEntity::new_process_instance("order:1", None);
  let child = ExecutionEntity { id: "child".into(),
                                parent_id: Some(root.id.clone()),
                                process_instance_id: Some(root.id.clone()),
                                process_definition_id: Some("order:1".into()),
                                ..Default::default() };
  s.insert(&root.clone().into_entity()).unwrap();
  s.insert(&child.into_entity()).unwrap();

  let children = s.select_list("selectExecutionsByParentExecutionId", &QueryParameter::text(root.id.as_str()))
                  .unwrap();
  assert_eq!(entity_ids(&children), vec!["child".to_string()]);
  assert_eq!(s.backend_name(), "statement");
  commit(s);
}

#[test]
fn racing_units_of_work_on_one_row_leave_a_single_winner() {
  let dir = tempfile::TempDir::new().unwrap();
  let url = dir.path().join("engine.db").to_string_lossy().into_owned();
  let f = StatementSessionFactory::new(&url, 2).unwrap();
  let mut s = f.open_statement_session().unwrap();
  s.db_schema_create().unwrap();
  let e = ExecutionEntity::new_process_instance("order:1", None);
  s.insert(&e.clone().into_entity()).unwrap();
  commit(s);

  // both units of work read revision 1 before either writes
  let mut first = f.open_statement_session().unwrap();
  let mut second = f.open_statement_session().unwrap();
  let seen_by_first = first.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  let seen_by_second = second.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  assert_eq!(seen_by_first.revision(), Some(1));
  assert_eq!(seen_by_second.revision(), Some(1));

  assert_eq!(first.update(&seen_by_first).unwrap(), Some(2));
  Session::commit(&mut first).unwrap();
  Session::close(&mut first).unwrap();
  drop(first);

  let lost = second.update(&seen_by_second)
                   .and_then(|_| Session::commit(&mut second));
  let err = lost.unwrap_err();
  assert!(err.is_optimistic_locking(), "{:?}", err);
  Session::rollback(&mut second).unwrap();
  Session::close(&mut second).unwrap();
  drop(second);

  let mut check = f.open_statement_session().unwrap();
  let stored = check.select_by_id(EntityKind::Execution, &e.id).unwrap().unwrap();
  assert_eq!(stored.revision(), Some(2));
}
