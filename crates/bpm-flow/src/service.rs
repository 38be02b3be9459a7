// Archivo: service.rs
// Propósito: fachada de tiempo de ejecución. Cada método es un comando que
// corre en su propia unidad de trabajo del motor.
use crate::app_switch::ProcessApplicationContext;
use crate::concurrency::CreateConcurrentExecution;
use crate::engine::ProcessEngine;
use crate::errors::{EngineError, Result};
use crate::managers::{ExecutionManager, ProcessDefinitionManager};
use crate::query::ProcessInstanceQuery;
use crate::tree::ExecutionTree;
use bpm_domain::ExecutionEntity;

pub struct RuntimeService<'a> {
  engine: &'a ProcessEngine,
}

impl<'a> RuntimeService<'a> {
  pub fn new(engine: &'a ProcessEngine) -> Self {
    Self { engine }
  }

  /// Arranca una instancia de la última versión de `key`, situada en
  /// `initial_activity`. Devuelve la ejecución raíz tal como quedó
  /// almacenada.
  pub fn start_process_instance_by_key(&self,
                                       key: &str,
                                       initial_activity: &str,
                                       business_key: Option<String>)
                                       -> Result<ExecutionEntity> {
    let root_id = self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut em = em.borrow_mut();
                 let definition = ProcessDefinitionManager::new(&mut em)
                   .find_latest_by_key(key)?
                   .ok_or_else(|| EngineError::NotFound(format!("definición de proceso con key '{}'", key)))?;
                 let graph = self.engine.definition_graph(&definition.id)?;
                 graph.require(initial_activity)?;

                 let mut root = ExecutionEntity::new_process_instance(&definition.id, business_key);
                 root.activity_id = Some(initial_activity.to_string());
                 let root_id = root.id.clone();
                 let mut tree = ExecutionTree::new(root);
                 tree.persist(&mut em)?;
                 Ok(root_id)
               })?;
    self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut em = em.borrow_mut();
                 ExecutionManager::new(&mut em).find_execution_by_id(&root_id)?
                                               .ok_or_else(|| EngineError::NotFound(format!("ejecución '{}'", root_id)))
               })
  }

  /// Crea una ejecución concurrente para `activity_id` a partir de la
  /// ejecución indicada. Devuelve el id de la nueva ejecución.
  pub fn create_concurrent_execution(&self, execution_id: &str, activity_id: &str) -> Result<String> {
    self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut tree = {
                   let mut em = em.borrow_mut();
                   let execution = em.select_by_id::<ExecutionEntity>(execution_id)?
                                     .ok_or_else(|| EngineError::NotFound(format!("ejecución '{}'", execution_id)))?;
                   let process_instance_id = execution.process_instance_id.clone().unwrap_or(execution.id);
                   ExecutionTree::load(&mut em, &process_instance_id)?
                 };
                 let definition_id =
                   tree.execution(execution_id)?
                       .process_definition_id
                       .clone()
                       .ok_or_else(|| EngineError::Other(format!("la ejecución '{}' no tiene definición", execution_id)))?;
                 let graph = self.engine.definition_graph(&definition_id)?;

                 let op = CreateConcurrentExecution::new(&graph, activity_id);
                 let switch = ProcessApplicationContext::new(self.engine.applications().clone());
                 ctx.perform_operation(&op, &mut tree, execution_id, &switch)?;
                 tree.validate()?;
                 tree.persist(&mut em.borrow_mut())?;
                 op.created_execution()
                   .ok_or_else(|| EngineError::Other("la operación no creó ninguna ejecución".into()))
               })
  }

  /// Borra la instancia y sus filas dependientes. Devuelve cuántas
  /// ejecuciones se borraron.
  pub fn delete_process_instance(&self, process_instance_id: &str) -> Result<usize> {
    self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut em = em.borrow_mut();
                 ExecutionManager::new(&mut em).delete_process_instance(process_instance_id)
               })
  }

  /// Ejecuciones de una instancia, la raíz primero.
  pub fn executions_of(&self, process_instance_id: &str) -> Result<Vec<ExecutionEntity>> {
    self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut em = em.borrow_mut();
                 let tree = ExecutionTree::load(&mut em, process_instance_id)?;
                 let mut out = vec![tree.root().clone()];
                 out.extend(tree.executions().filter(|e| e.id != tree.root_id()).cloned());
                 Ok(out)
               })
  }

  pub fn process_instances(&self, query: ProcessInstanceQuery) -> Result<Vec<ExecutionEntity>> {
    self.engine.execute(|ctx| {
                 let em = ctx.entity_manager()?;
                 let mut em = em.borrow_mut();
                 ExecutionManager::new(&mut em).find_process_instances(query)
               })
  }
}
