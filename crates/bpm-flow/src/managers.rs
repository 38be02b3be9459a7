// Archivo: managers.rs
// Propósito: gestores de negocio sobre el `EntityManager`: ejecuciones
// (borrado en cascada de instancias), definiciones de proceso (búsquedas
// por key/versión) y despliegues (borrado en cascada).
use crate::entity_manager::EntityManager;
use crate::errors::{EngineError, Result};
use crate::query::{ProcessDefinitionQuery, ProcessInstanceQuery, QueryParameter};
use crate::tree::ExecutionTree;
use bpm_domain::{cached_state, DeploymentEntity, EventSubscriptionEntity, ExecutionEntity, IdentityLinkEntity,
                 JobEntity, ProcessDefinitionEntity, ResourceEntity, TaskEntity, VariableInstanceEntity};
use log::debug;

pub struct ExecutionManager<'a> {
  em: &'a mut EntityManager,
}

impl<'a> ExecutionManager<'a> {
  pub fn new(em: &'a mut EntityManager) -> Self {
    Self { em }
  }

  pub fn find_execution_by_id(&mut self, id: &str) -> Result<Option<ExecutionEntity>> {
    self.em.select_by_id(id)
  }

  pub fn find_child_executions(&mut self, parent_id: &str) -> Result<Vec<ExecutionEntity>> {
    self.em
        .select_entities("selectExecutionsByParentExecutionId", &QueryParameter::text(parent_id))
  }

  pub fn find_process_instances(&mut self, query: ProcessInstanceQuery) -> Result<Vec<ExecutionEntity>> {
    self.em
        .select_entities("selectProcessInstanceByQueryCriteria", &QueryParameter::ProcessInstance(query))
  }

  /// Borra una instancia de proceso: primero las filas dependientes de
  /// cada ejecución (según sus bits de estado cacheado), después las
  /// ejecuciones de las hojas hacia la raíz. Devuelve cuántas ejecuciones
  /// se borraron.
  pub fn delete_process_instance(&mut self, process_instance_id: &str) -> Result<usize> {
    let tree = ExecutionTree::load(self.em, process_instance_id)?;
    let order = tree.post_order();
    for id in &order {
      let execution = tree.execution(id)?.clone();
      self.delete_dependents(&execution)?;
      self.em.delete(&execution)?;
    }
    debug!("instancia '{}' borrada: {} ejecuciones", process_instance_id, order.len());
    Ok(order.len())
  }

  fn delete_dependents(&mut self, execution: &ExecutionEntity) -> Result<()> {
    let by_execution = QueryParameter::text(execution.id.as_str());
    if execution.has_cached_state(cached_state::TASKS) {
      let tasks: Vec<TaskEntity> = self.em.select_entities("selectTasksByExecutionId", &by_execution)?;
      for task in tasks {
        let links: Vec<IdentityLinkEntity> =
          self.em.select_entities("selectIdentityLinksByTask", &QueryParameter::text(task.id.as_str()))?;
        for link in &links {
          self.em.delete(link)?;
        }
        self.em.delete(&task)?;
      }
    }
    if execution.has_cached_state(cached_state::VARIABLES) {
      let variables: Vec<VariableInstanceEntity> =
        self.em.select_entities("selectVariablesByExecutionId", &by_execution)?;
      for variable in &variables {
        self.em.delete(variable)?;
      }
    }
    if execution.has_cached_state(cached_state::EVENT_SUBSCRIPTIONS) {
      let subscriptions: Vec<EventSubscriptionEntity> =
        self.em.select_entities("selectEventSubscriptionsByExecution", &by_execution)?;
      for subscription in &subscriptions {
        self.em.delete(subscription)?;
      }
    }
    if execution.has_cached_state(cached_state::JOBS) {
      let jobs: Vec<JobEntity> = self.em.select_entities("selectJobsByExecutionId", &by_execution)?;
      for job in &jobs {
        self.em.delete(job)?;
      }
    }
    Ok(())
  }
}

pub struct ProcessDefinitionManager<'a> {
  em: &'a mut EntityManager,
}

impl<'a> ProcessDefinitionManager<'a> {
  pub fn new(em: &'a mut EntityManager) -> Self {
    Self { em }
  }

  pub fn find_by_id(&mut self, id: &str) -> Result<Option<ProcessDefinitionEntity>> {
    self.em.select_by_id(id)
  }

  /// Versión más alta desplegada para `key`, o `None` si no hay ninguna.
  pub fn find_latest_by_key(&mut self, key: &str) -> Result<Option<ProcessDefinitionEntity>> {
    self.em
        .select_one_entity("selectLatestProcessDefinitionByKey", &QueryParameter::text(key))
  }

  pub fn find_by_deployment_and_key(&mut self,
                                    deployment_id: &str,
                                    key: &str)
                                    -> Result<Option<ProcessDefinitionEntity>> {
    let parameter = QueryParameter::map([("deploymentId", deployment_id), ("processDefinitionKey", key)]);
    self.em
        .select_one_entity("selectProcessDefinitionByDeploymentAndKey", &parameter)
  }

  pub fn find_by_query(&mut self, query: ProcessDefinitionQuery) -> Result<Vec<ProcessDefinitionEntity>> {
    self.em
        .select_entities("selectProcessDefinitionsByQueryCriteria", &QueryParameter::ProcessDefinition(query))
  }
}

pub struct DeploymentManager<'a> {
  em: &'a mut EntityManager,
}

impl<'a> DeploymentManager<'a> {
  pub fn new(em: &'a mut EntityManager) -> Self {
    Self { em }
  }

  pub fn find_resources(&mut self, deployment_id: &str) -> Result<Vec<ResourceEntity>> {
    self.em
        .select_entities("selectResourcesByDeploymentId", &QueryParameter::text(deployment_id))
  }

  /// Borra un despliegue con todo lo que cuelga de él: vínculos de
  /// identidad y definiciones de job de sus definiciones de proceso, las
  /// definiciones de proceso y de caso, los recursos y el propio
  /// despliegue.
  pub fn delete_deployment(&mut self, deployment_id: &str) -> Result<()> {
    if self.em.select_by_id::<DeploymentEntity>(deployment_id)?.is_none() {
      return Err(EngineError::NotFound(format!("despliegue '{}'", deployment_id)));
    }
    let by_deployment = QueryParameter::text(deployment_id);
    let definitions: Vec<ProcessDefinitionEntity> =
      self.em.select_entities("selectProcessDefinitionByDeploymentId", &by_deployment)?;
    for definition in &definitions {
      let by_definition = QueryParameter::text(definition.id.as_str());
      self.em.delete_bulk("deleteIdentityLinkByProcDef", by_definition.clone());
      self.em.delete_bulk("deleteJobDefinitionsByProcessDefinitionId", by_definition);
    }
    self.em.delete_bulk("deleteProcessDefinitionsByDeploymentId", by_deployment.clone());
    self.em.delete_bulk("deleteCaseDefinitionsByDeploymentId", by_deployment.clone());
    self.em.delete_bulk("deleteResourcesByDeploymentId", by_deployment.clone());
    self.em.delete_bulk("deleteDeployment", by_deployment);
    debug!("despliegue '{}' borrado con {} definiciones de proceso", deployment_id, definitions.len());
    Ok(())
  }
}
