use bpm_domain::{cached_state, DeploymentEntity, EventSubscriptionEntity, ExecutionEntity, IdentityLinkEntity,
                 JobDefinitionEntity, JobEntity, ProcessDefinitionEntity, ProcessDefinitionGraph, ResourceEntity,
                 ScopeRef, TaskEntity, VariableInstanceEntity};
use bpm_flow::{DbOperation, DeploymentManager, EngineConfig, EngineError, MapGrid, Page, ProcessApplicationRef,
               ProcessDefinitionManager, ProcessEngine, ProcessEngineConfiguration, ProcessInstanceQuery, QueryParameter,
               Row, SchemaUpdate};
use std::sync::Arc;

fn order_graph() -> ProcessDefinitionGraph {
  let mut graph = ProcessDefinitionGraph::new("order");
  graph.add_activity(ScopeRef::Process, "A0", false).unwrap();
  graph.add_activity(ScopeRef::Process, "A1", false).unwrap();
  graph
}

fn engine() -> (ProcessEngine, Arc<MapGrid>) {
  let grid = Arc::new(MapGrid::new());
  let engine = ProcessEngineConfiguration::with_map_backend(EngineConfig::default(), grid.clone())
    .unwrap()
    .build_process_engine()
    .unwrap();
  engine.register_definition(ProcessDefinitionEntity::new("order:1", "order", 1), order_graph())
        .unwrap();
  (engine, grid)
}

#[test]
fn start_then_fork_then_delete() {
  let (engine, _grid) = engine();
  let runtime = engine.runtime_service();

  let root = runtime.start_process_instance_by_key("order", "A0", Some("po-17".into()))
                    .unwrap();
  // the returned root is the stored row
  assert_eq!(root.revision, 1);
  let before = runtime.executions_of(&root.id).unwrap();
  assert_eq!(before.len(), 1);
  assert_eq!(before[0].revision, 1);
  assert_eq!(before[0].activity_id.as_deref(), Some("A0"));

  let created = runtime.create_concurrent_execution(&root.id, "A1").unwrap();
  let after = runtime.executions_of(&root.id).unwrap();
  assert_eq!(after.len(), 3);
  let root_now = &after[0];
  assert_eq!(root_now.id, root.id);
  assert_eq!(root_now.revision, 2);
  assert!(root_now.activity_id.is_none());
  assert!(!root_now.is_active);
  let new = after.iter().find(|e| e.id == created).unwrap();
  assert_eq!(new.activity_id.as_deref(), Some("A1"));
  assert!(new.is_concurrent);
  assert!(after.iter().any(|e| e.activity_id.as_deref() == Some("A0") && e.is_concurrent));

  assert_eq!(runtime.delete_process_instance(&root.id).unwrap(), 3);
  assert!(matches!(runtime.executions_of(&root.id), Err(EngineError::NotFound(_))));
}

#[test]
fn fork_works_inside_a_registered_application() {
  let (engine, _grid) = engine();
  engine.applications()
        .register("order:1", ProcessApplicationRef::new("billing"));
  let runtime = engine.runtime_service();
  let root = runtime.start_process_instance_by_key("order", "A0", None).unwrap();
  let created = runtime.create_concurrent_execution(&root.id, "A1").unwrap();
  assert_eq!(runtime.executions_of(&root.id).unwrap().len(), 3);
  assert!(runtime.executions_of(&root.id)
                 .unwrap()
                 .iter()
                 .any(|e| e.id == created));
}

#[test]
fn start_uses_the_latest_version_and_checks_inputs() {
  let (engine, _grid) = engine();
  engine.register_definition(ProcessDefinitionEntity::new("order:2", "order", 2), order_graph())
        .unwrap();
  let runtime = engine.runtime_service();

  let root = runtime.start_process_instance_by_key("order", "A1", None).unwrap();
  assert_eq!(root.process_definition_id.as_deref(), Some("order:2"));

  assert!(matches!(runtime.start_process_instance_by_key("shipping", "A0", None),
                   Err(EngineError::NotFound(_))));
  assert!(runtime.start_process_instance_by_key("order", "Missing", None).is_err());
  assert!(runtime.create_concurrent_execution(&root.id, "Missing").is_err());
  // the failed fork left the instance untouched
  assert_eq!(runtime.executions_of(&root.id).unwrap().len(), 1);
}

#[test]
fn process_instance_query_filters_by_definition_and_business_key() {
  let (engine, _grid) = engine();
  let runtime = engine.runtime_service();
  runtime.start_process_instance_by_key("order", "A0", Some("a".into())).unwrap();
  runtime.start_process_instance_by_key("order", "A0", Some("b".into())).unwrap();

  let all = runtime.process_instances(ProcessInstanceQuery { process_definition_id: Some("order:1".into()),
                                                             ..Default::default() })
                   .unwrap();
  assert_eq!(all.len(), 2);
  let only_b = runtime.process_instances(ProcessInstanceQuery { business_key: Some("b".into()),
                                                                ..Default::default() })
                      .unwrap();
  assert_eq!(only_b.len(), 1);
  assert_eq!(only_b[0].business_key.as_deref(), Some("b"));
}

#[test]
fn stale_update_fails_the_command_and_keeps_the_stored_revision() {
  let (engine, _grid) = engine();
  let runtime = engine.runtime_service();
  let root = runtime.start_process_instance_by_key("order", "A0", None).unwrap();

  let stale: ExecutionEntity = engine.execute(|ctx| {
                                       let em = ctx.entity_manager()?;
                                       let found = em.borrow_mut().select_by_id::<ExecutionEntity>(&root.id)?;
                                       found.ok_or_else(|| EngineError::NotFound(root.id.clone()))
                                     })
                                     .unwrap();
  assert_eq!(stale.revision, 1);

  runtime.create_concurrent_execution(&root.id, "A1").unwrap();

  let err = engine.execute(|ctx| {
                    let em = ctx.entity_manager()?;
                    let mut changed = stale.clone();
                    changed.business_key = Some("late".into());
                    let r = em.borrow_mut().update(changed);
                    r
                  })
                  .unwrap_err();
  assert!(err.is_optimistic_locking());

  let stored = runtime.executions_of(&root.id).unwrap();
  assert_eq!(stored[0].revision, 2);
  assert!(stored[0].business_key.is_none());
}

#[test]
fn failed_command_persists_nothing() {
  let (engine, _grid) = engine();
  let err = engine.execute(|ctx| -> bpm_flow::Result<()> {
                    let em = ctx.entity_manager()?;
                    em.borrow_mut()
                      .insert(DeploymentEntity { id: "D9".into(),
                                                 ..Default::default() })?;
                    Err(EngineError::BadUserRequest("abortado".into()))
                  })
                  .unwrap_err();
  assert_eq!(err, EngineError::BadUserRequest("abortado".into()));
  let found = engine.execute(|ctx| {
                      let em = ctx.entity_manager()?;
                      let found = em.borrow_mut().select_by_id::<DeploymentEntity>("D9")?;
                      Ok(found)
                    })
                    .unwrap();
  assert!(found.is_none());
}

#[test]
fn entity_manager_folds_pending_operations() {
  let (engine, _grid) = engine();
  engine.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let mut em = em.borrow_mut();

          let id = em.insert(ExecutionEntity { process_definition_id: Some("order:1".into()),
                                               ..Default::default() })?;
          assert!(!id.is_empty());
          let mut pending = em.select_by_id::<ExecutionEntity>(&id)?.unwrap();
          pending.activity_id = Some("A0".into());
          em.update(pending.clone())?;
          assert_eq!(em.pending_operations().len(), 1);
          assert!(matches!(&em.pending_operations()[0], DbOperation::Insert(e) if e.id() == id));

          em.delete(&pending)?;
          assert!(!em.has_pending_operations());
          assert!(em.select_by_id::<ExecutionEntity>(&id)?.is_none());

          em.delete_bulk("deleteResourcesByDeploymentId", QueryParameter::text("D0"));
          em.insert(ResourceEntity { id: "r".into(),
                                     ..Default::default() })?;
          let kinds: Vec<&str> = em.pending_operations()
                                   .iter()
                                   .map(|op| match op {
                                     DbOperation::Insert(_) => "insert",
                                     DbOperation::Update(_) => "update",
                                     DbOperation::DeleteBulk { .. } => "bulk",
                                     DbOperation::Delete(_) => "delete",
                                   })
                                   .collect();
          assert_eq!(kinds, vec!["insert", "bulk"]);
          Ok(())
        })
        .unwrap();
}

#[test]
fn deleting_an_instance_cascades_to_flagged_dependents() {
  let (engine, grid) = engine();
  let root_id = engine.execute(|ctx| {
                        let em = ctx.entity_manager()?;
                        let mut em = em.borrow_mut();
                        let mut root = ExecutionEntity::new_process_instance("order:1", None);
                        for bit in [cached_state::TASKS,
                                    cached_state::VARIABLES,
                                    cached_state::JOBS,
                                    cached_state::EVENT_SUBSCRIPTIONS]
                        {
                          root.set_cached_state(bit, true);
                        }
                        let root_id = em.insert(root)?;
                        let exec = Some(root_id.clone());
                        em.insert(TaskEntity { id: "t1".into(),
                                               execution_id: exec.clone(),
                                               ..Default::default() })?;
                        em.insert(IdentityLinkEntity { id: "l1".into(),
                                                       task_id: Some("t1".into()),
                                                       ..Default::default() })?;
                        em.insert(VariableInstanceEntity { id: "v1".into(),
                                                           name: "amount".into(),
                                                           execution_id: exec.clone(),
                                                           ..Default::default() })?;
                        em.insert(JobEntity { id: "j1".into(),
                                              execution_id: exec.clone(),
                                              ..Default::default() })?;
                        em.insert(EventSubscriptionEntity { id: "s1".into(),
                                                            execution_id: exec,
                                                            ..Default::default() })?;
                        em.insert(TaskEntity { id: "t-other".into(),
                                               execution_id: Some("elsewhere".into()),
                                               ..Default::default() })?;
                        Ok(root_id)
                      })
                      .unwrap();

  assert_eq!(engine.runtime_service().delete_process_instance(&root_id).unwrap(), 1);

  let counts = grid.map_counts().unwrap();
  assert_eq!(counts.get("cam.engine.execution"), Some(&0));
  assert_eq!(counts.get("cam.engine.task"), Some(&1));
  assert_eq!(counts.get("cam.engine.identity_link"), Some(&0));
  assert_eq!(counts.get("cam.engine.variable"), Some(&0));
  assert_eq!(counts.get("cam.engine.job"), Some(&0));
  assert_eq!(counts.get("cam.engine.event_subscription"), Some(&0));
}

#[test]
fn deleting_a_deployment_removes_everything_it_owns() {
  let (engine, _grid) = engine();
  engine.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let mut em = em.borrow_mut();
          for dep in ["D1", "D2"] {
            em.insert(DeploymentEntity { id: dep.into(),
                                         ..Default::default() })?;
          }
          for (id, dep) in [("r1", "D1"), ("r2", "D1"), ("r3", "D2")] {
            em.insert(ResourceEntity { id: id.into(),
                                       deployment_id: Some(dep.into()),
                                       ..Default::default() })?;
          }
          for (id, dep) in [("invoice:1", "D1"), ("invoice:2", "D2")] {
            let mut def = ProcessDefinitionEntity::new(id, "invoice", if dep == "D1" { 1 } else { 2 });
            def.deployment_id = Some(dep.into());
            em.insert(def)?;
          }
          em.insert(IdentityLinkEntity { id: "l1".into(),
                                         process_def_id: Some("invoice:1".into()),
                                         ..Default::default() })?;
          em.insert(JobDefinitionEntity { id: "jd1".into(),
                                          process_definition_id: Some("invoice:1".into()),
                                          ..Default::default() })?;
          Ok(())
        })
        .unwrap();

  engine.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let r = DeploymentManager::new(&mut em.borrow_mut()).delete_deployment("D1");
          r
        })
        .unwrap();

  engine.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let mut em = em.borrow_mut();
          assert!(DeploymentManager::new(&mut em).find_resources("D1")?.is_empty());
          assert_eq!(DeploymentManager::new(&mut em).find_resources("D2")?.len(), 1);
          let mut defs = ProcessDefinitionManager::new(&mut em);
          assert!(defs.find_by_id("invoice:1")?.is_none());
          assert_eq!(defs.find_latest_by_key("invoice")?.map(|d| d.id), Some("invoice:2".to_string()));
          let links: Vec<IdentityLinkEntity> =
            em.select_entities("selectIdentityLinksByProcessDefinition", &QueryParameter::text("invoice:1"))?;
          assert!(links.is_empty());
          let job_defs: Vec<JobDefinitionEntity> =
            em.select_entities("selectJobDefinitionsByProcessDefinitionId", &QueryParameter::text("invoice:1"))?;
          assert!(job_defs.is_empty());
          assert!(em.select_by_id::<DeploymentEntity>("D1")?.is_none());
          Ok(())
        })
        .unwrap();

  let missing = engine.execute(|ctx| {
                        let em = ctx.entity_manager()?;
                        let r = DeploymentManager::new(&mut em.borrow_mut()).delete_deployment("D1");
                        r
                      });
  assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[test]
fn create_drop_engine_clears_the_grid_on_close() {
  let grid = Arc::new(MapGrid::new());
  let config = EngineConfig { schema_update: SchemaUpdate::CreateDrop,
                              ..Default::default() };
  let engine = ProcessEngineConfiguration::with_map_backend(config, grid.clone())
    .unwrap()
    .build_process_engine()
    .unwrap();
  assert!(grid.map_counts().unwrap().contains_key("cam.engine.execution"));
  engine.close().unwrap();
  assert!(grid.map_counts().unwrap().is_empty());
}

#[test]
fn validate_strategy_requires_an_existing_schema() {
  let config = EngineConfig { schema_update: SchemaUpdate::Validate,
                              ..Default::default() };
  let built = ProcessEngineConfiguration::with_map_backend(config, Arc::new(MapGrid::new()))
    .unwrap()
    .build_process_engine();
  assert!(matches!(built, Err(EngineError::Configuration(_))));
}

#[test]
fn paged_list_is_cut_after_pending_deletes_are_hidden() {
  let (engine, _grid) = engine();
  let runtime = engine.runtime_service();
  let ids: Vec<String> = (0..3).map(|_| runtime.start_process_instance_by_key("order", "A0", None).unwrap().id)
                               .collect();
  engine.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let mut em = em.borrow_mut();
          let first = em.select_by_id::<ExecutionEntity>(&ids[0])?.unwrap();
          em.delete(&first)?;

          let query = QueryParameter::ProcessInstance(ProcessInstanceQuery { process_definition_id: Some("order:1".into()),
                                                                             ..Default::default() });
          let rows = em.select_list_page("selectProcessInstanceByQueryCriteria", &query, Page::new(Some(0), Some(2)))?;
          let got: Vec<String> = rows.into_iter()
                                     .filter_map(|r| match r {
                                       Row::Entity(e) => Some(e.id().to_string()),
                                       _ => None,
                                     })
                                     .collect();
          assert_eq!(got, vec![ids[1].clone(), ids[2].clone()]);
          Ok(())
        })
        .unwrap();
}
