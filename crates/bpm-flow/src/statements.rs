// Archivo: statements.rs
// Propósito: registro de despacho de sentencias. Asocia cada nombre lógico
// de sentencia a un handler que traduce el objeto de parámetros del
// llamador a criterios de búsqueda neutros (`Lookup`) y post-procesa las
// filas devueltas por el backend.
//
// El registro se construye una vez al arrancar el motor y se comparte en
// sólo lectura (`Arc<StatementRegistry>`) con las sesiones de persistencia.
use crate::errors::{EngineError, Result};
use crate::query::{ParamValue, QueryParameter, Row};
use bpm_domain::{DbEntity, Entity, EntityKind, ProcessDefinitionEntity};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Conjunción de igualdades campo = valor, independiente del backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
  conditions: BTreeMap<String, ParamValue>,
}

impl Criteria {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, field: &str, value: impl Into<ParamValue>) -> Self {
    self.conditions.insert(field.to_string(), value.into());
    self
  }

  /// Añade la condición sólo si el valor existe (los campos nulos del
  /// objeto de criterios se ignoran).
  pub fn with_opt(self, field: &str, value: &Option<String>) -> Self {
    match value {
      Some(v) => self.with(field, v.as_str()),
      None => self,
    }
  }

  pub fn conditions(&self) -> &BTreeMap<String, ParamValue> {
    &self.conditions
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }
}

/// Forma de búsqueda que el backend debe ejecutar.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
  /// Acceso directo por clave primaria.
  ById(String),
  /// Filtrado por igualdades sobre los valores almacenados.
  Matching(Criteria),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementCategory {
  SelectOne,
  SelectList,
  Delete,
}

impl fmt::Display for StatementCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StatementCategory::SelectOne => "select-one",
      StatementCategory::SelectList => "select-list",
      StatementCategory::Delete => "delete",
    };
    f.write_str(s)
  }
}

/// Handler de una sentencia con nombre.
pub trait StatementHandler: Send + Sync {
  fn entity_kind(&self) -> EntityKind;

  fn lookup(&self, parameter: &QueryParameter) -> Result<Lookup>;

  /// Post-filtro aplicado a las entidades encontradas (agregaciones,
  /// proyecciones). Por defecto devuelve las entidades tal cual.
  fn post_process(&self, _parameter: &QueryParameter, rows: Vec<Entity>) -> Result<Vec<Row>> {
    Ok(rows.into_iter().map(Row::Entity).collect())
  }
}

fn unexpected(expected: &str, got: &QueryParameter) -> EngineError {
  EngineError::BadUserRequest(format!("se esperaba {} como parámetro, se recibió {:?}", expected, got))
}

fn single_value(parameter: &QueryParameter) -> Result<ParamValue> {
  match parameter.inner() {
    QueryParameter::Value(v) => Ok(v.clone()),
    other => Err(unexpected("un valor", other)),
  }
}

/// Búsqueda/borrado por identificador.
pub struct ByIdentifier {
  kind: EntityKind,
}

impl ByIdentifier {
  pub fn new(kind: EntityKind) -> Self {
    Self { kind }
  }
}

impl StatementHandler for ByIdentifier {
  fn entity_kind(&self) -> EntityKind {
    self.kind
  }

  fn lookup(&self, parameter: &QueryParameter) -> Result<Lookup> {
    match single_value(parameter)? {
      ParamValue::Text(id) => Ok(Lookup::ById(id)),
      other => Err(EngineError::BadUserRequest(format!("identificador inválido: {}", other))),
    }
  }
}

/// Búsqueda/borrado por un campo fijo (normalmente una clave foránea).
pub struct ByForeignKey {
  kind: EntityKind,
  field: &'static str,
}

impl ByForeignKey {
  pub fn new(kind: EntityKind, field: &'static str) -> Self {
    Self { kind, field }
  }
}

impl StatementHandler for ByForeignKey {
  fn entity_kind(&self) -> EntityKind {
    self.kind
  }

  fn lookup(&self, parameter: &QueryParameter) -> Result<Lookup> {
    Ok(Lookup::Matching(Criteria::new().with(self.field, single_value(parameter)?)))
  }
}

/// Post-filtros de `ByEqualityMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFilter {
  None,
  /// Última versión por `key` si el objeto de criterios lo pide.
  LatestVersionIfRequested,
  /// Proyección de un campo de texto de cada fila.
  Project(&'static str),
}

type CriteriaFn = fn(&QueryParameter) -> Result<Criteria>;

/// Selección por mapa de igualdades extraído del objeto de criterios.
pub struct ByEqualityMap {
  kind: EntityKind,
  criteria: CriteriaFn,
  post: PostFilter,
}

impl ByEqualityMap {
  pub fn new(kind: EntityKind, criteria: CriteriaFn) -> Self {
    Self { kind,
           criteria,
           post: PostFilter::None }
  }

  pub fn with_post_filter(mut self, post: PostFilter) -> Self {
    self.post = post;
    self
  }
}

impl StatementHandler for ByEqualityMap {
  fn entity_kind(&self) -> EntityKind {
    self.kind
  }

  fn lookup(&self, parameter: &QueryParameter) -> Result<Lookup> {
    Ok(Lookup::Matching((self.criteria)(parameter.inner())?))
  }

  fn post_process(&self, parameter: &QueryParameter, rows: Vec<Entity>) -> Result<Vec<Row>> {
    match self.post {
      PostFilter::None => Ok(rows.into_iter().map(Row::Entity).collect()),
      PostFilter::LatestVersionIfRequested => {
        let wants_latest = matches!(parameter.inner(), QueryParameter::ProcessDefinition(q) if q.latest);
        if !wants_latest {
          return Ok(rows.into_iter().map(Row::Entity).collect());
        }
        let defs = process_definitions(rows)?;
        Ok(latest_per_key(defs).into_iter().map(|d| Row::Entity(d.into_entity())).collect())
      }
      PostFilter::Project(field) => rows.into_iter().map(|e| project(&e, field)).collect(),
    }
  }
}

fn project(entity: &Entity, field: &str) -> Result<Row> {
  let json = entity.to_json()?;
  let value = match json.get(field) {
    Some(serde_json::Value::String(s)) => ParamValue::Text(s.clone()),
    Some(serde_json::Value::Bool(b)) => ParamValue::Bool(*b),
    Some(serde_json::Value::Number(n)) => n.as_i64().map(ParamValue::Int).unwrap_or(ParamValue::Null),
    _ => ParamValue::Null,
  };
  Ok(Row::Value(value))
}

fn process_definitions(rows: Vec<Entity>) -> Result<Vec<ProcessDefinitionEntity>> {
  rows.into_iter()
      .map(|e| {
        let kind = e.kind();
        ProcessDefinitionEntity::from_entity(e)
          .ok_or_else(|| EngineError::Other(format!("se esperaba ProcessDefinition, se obtuvo {}", kind)))
      })
      .collect()
}

/// Conserva la versión más alta por `key`. Empates: gana el id
/// lexicográficamente menor. El orden de salida es el de primera aparición
/// de cada `key`.
pub fn latest_per_key(defs: Vec<ProcessDefinitionEntity>) -> Vec<ProcessDefinitionEntity> {
  let mut latest: IndexMap<String, ProcessDefinitionEntity> = IndexMap::new();
  for def in defs {
    let replace = latest.get(&def.key).map_or(true, |current| supersedes(&def, current));
    if replace {
      latest.insert(def.key.clone(), def);
    }
  }
  latest.into_values().collect()
}

fn supersedes(candidate: &ProcessDefinitionEntity, current: &ProcessDefinitionEntity) -> bool {
  candidate.version > current.version || (candidate.version == current.version && candidate.id < current.id)
}

/// Agregación "última versión para la key X".
pub struct LatestProcessDefinitionByKey;

impl StatementHandler for LatestProcessDefinitionByKey {
  fn entity_kind(&self) -> EntityKind {
    EntityKind::ProcessDefinition
  }

  fn lookup(&self, parameter: &QueryParameter) -> Result<Lookup> {
    Ok(Lookup::Matching(Criteria::new().with("key", single_value(parameter)?)))
  }

  fn post_process(&self, _parameter: &QueryParameter, rows: Vec<Entity>) -> Result<Vec<Row>> {
    let defs = process_definitions(rows)?;
    Ok(latest_per_key(defs).into_iter().map(|d| Row::Entity(d.into_entity())).collect())
  }
}

/// Ejecuta una selección con el handler dado. `fetch` resuelve el `Lookup`
/// contra el backend; después se aplican post-filtro y paginación.
pub fn run_select<F>(handler: &dyn StatementHandler, parameter: &QueryParameter, fetch: F) -> Result<Vec<Row>>
  where F: FnOnce(EntityKind, &Lookup) -> Result<Vec<Entity>>
{
  let lookup = handler.lookup(parameter)?;
  let found = fetch(handler.entity_kind(), &lookup)?;
  let rows = handler.post_process(parameter, found)?;
  Ok(match parameter.page() {
       Some(page) => page.apply(rows),
       None => rows,
     })
}

struct RegisteredStatement {
  category: StatementCategory,
  handler: Arc<dyn StatementHandler>,
}

/// Registro inmutable nombre de sentencia → handler.
#[derive(Default)]
pub struct StatementRegistry {
  statements: HashMap<String, RegisteredStatement>,
}

impl StatementRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, name: &str, category: StatementCategory, handler: impl StatementHandler + 'static) -> &mut Self {
    self.statements.insert(name.to_string(),
                           RegisteredStatement { category,
                                                 handler: Arc::new(handler) });
    self
  }

  fn resolve(&self, name: &str, category: StatementCategory) -> Result<&dyn StatementHandler> {
    match self.statements.get(name) {
      Some(s) if s.category == category => Ok(s.handler.as_ref()),
      _ => Err(EngineError::Configuration(format!("La sentencia {} '{}' no está soportada actualmente", category, name))),
    }
  }

  pub fn select_one(&self, name: &str) -> Result<&dyn StatementHandler> {
    self.resolve(name, StatementCategory::SelectOne)
  }

  pub fn select_list(&self, name: &str) -> Result<&dyn StatementHandler> {
    self.resolve(name, StatementCategory::SelectList)
  }

  pub fn delete(&self, name: &str) -> Result<&dyn StatementHandler> {
    self.resolve(name, StatementCategory::Delete)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.statements.contains_key(name)
  }

  /// Nombres registrados con su categoría, ordenados por nombre.
  pub fn names(&self) -> Vec<(&str, StatementCategory)> {
    let mut names: Vec<(&str, StatementCategory)> =
      self.statements.iter().map(|(n, s)| (n.as_str(), s.category)).collect();
    names.sort_by(|a, b| a.0.cmp(b.0));
    names
  }

  /// Vocabulario de sentencias del motor.
  pub fn engine_defaults() -> Self {
    use EntityKind::*;
    use StatementCategory::{Delete, SelectList, SelectOne};

    let mut r = Self::new();
    r.register("deleteResourcesByDeploymentId", Delete, ByForeignKey::new(Resource, "deploymentId"))
     .register("deleteCaseDefinitionsByDeploymentId", Delete, ByForeignKey::new(CaseDefinition, "deploymentId"))
     .register("deleteProcessDefinitionsByDeploymentId",
               Delete,
               ByForeignKey::new(ProcessDefinition, "deploymentId"))
     .register("deleteDeployment", Delete, ByIdentifier::new(Deployment))
     .register("deleteIdentityLinkByProcDef", Delete, ByForeignKey::new(IdentityLink, "processDefId"))
     .register("deleteJobDefinitionsByProcessDefinitionId",
               Delete,
               ByForeignKey::new(JobDefinition, "processDefinitionId"))
     .register("deleteByteArrayNoRevisionCheck", Delete, ByIdentifier::new(ByteArray));

    r.register("selectExecution", SelectOne, ByIdentifier::new(Execution))
     .register("selectTask", SelectOne, ByIdentifier::new(Task))
     .register("selectDeployment", SelectOne, ByIdentifier::new(Deployment))
     .register("selectVariableInstance", SelectOne, ByIdentifier::new(VariableInstance))
     .register("selectProcessDefinitionById", SelectOne, ByIdentifier::new(ProcessDefinition))
     .register("selectJob", SelectOne, ByIdentifier::new(Job))
     .register("selectProperty", SelectOne, ByIdentifier::new(Property))
     .register("selectLatestProcessDefinitionByKey", SelectOne, LatestProcessDefinitionByKey)
     .register("selectProcessDefinitionByDeploymentAndKey",
               SelectOne,
               ByEqualityMap::new(ProcessDefinition, deployment_and_key_criteria));

    r.register("selectExecutionsByParentExecutionId", SelectList, ByForeignKey::new(Execution, "parentId"))
     .register("selectExecutionsByProcessInstanceId",
               SelectList,
               ByForeignKey::new(Execution, "processInstanceId"))
     .register("selectSubProcessInstanceBySuperExecutionId",
               SelectList,
               ByForeignKey::new(Execution, "superExecutionId"))
     .register("selectSubProcessInstanceBySuperCaseExecutionId",
               SelectList,
               ByForeignKey::new(Execution, "superCaseExecutionId"))
     .register("selectExecutionsByQueryCriteria",
               SelectList,
               ByEqualityMap::new(Execution, execution_criteria))
     .register("selectProcessInstanceByQueryCriteria",
               SelectList,
               ByEqualityMap::new(Execution, process_instance_criteria))
     .register("selectProcessInstanceIdsByProcessDefinitionId",
               SelectList,
               ByEqualityMap::new(Execution, process_instances_of_definition).with_post_filter(PostFilter::Project("processInstanceId")));

    r.register("selectTasksByParentTaskId", SelectList, ByForeignKey::new(Task, "parentTaskId"))
     .register("selectTasksByExecutionId", SelectList, ByForeignKey::new(Task, "executionId"))
     .register("selectTaskByCaseExecutionId", SelectList, ByForeignKey::new(Task, "caseExecutionId"))
     .register("selectTasksByProcessInstanceId", SelectList, ByForeignKey::new(Task, "processInstanceId"))
     .register("selectTaskByQueryCriteria", SelectList, ByEqualityMap::new(Task, task_criteria));

    r.register("selectVariablesByExecutionId", SelectList, ByForeignKey::new(VariableInstance, "executionId"))
     .register("selectVariablesByCaseExecutionId",
               SelectList,
               ByForeignKey::new(VariableInstance, "caseExecutionId"))
     .register("selectVariablesByTaskId", SelectList, ByForeignKey::new(VariableInstance, "taskId"))
     .register("selectVariableInstanceByQueryCriteria",
               SelectList,
               ByEqualityMap::new(VariableInstance, variable_criteria));

    r.register("selectJobsByExecutionId", SelectList, ByForeignKey::new(Job, "executionId"))
     .register("selectJobsByConfiguration", SelectList, ByEqualityMap::new(Job, job_configuration_criteria))
     .register("selectJobDefinitionsByProcessDefinitionId",
               SelectList,
               ByForeignKey::new(JobDefinition, "processDefinitionId"));

    r.register("selectProcessDefinitionByDeploymentId",
               SelectList,
               ByForeignKey::new(ProcessDefinition, "deploymentId"))
     .register("selectProcessDefinitionsByQueryCriteria",
               SelectList,
               ByEqualityMap::new(ProcessDefinition, process_definition_criteria).with_post_filter(PostFilter::LatestVersionIfRequested))
     .register("selectCaseDefinitionByDeploymentId",
               SelectList,
               ByForeignKey::new(CaseDefinition, "deploymentId"))
     .register("selectResourcesByDeploymentId", SelectList, ByForeignKey::new(Resource, "deploymentId"));

    r.register("selectEventSubscriptionsByConfiguration",
               SelectList,
               ByEqualityMap::new(EventSubscription, event_configuration_criteria))
     .register("selectEventSubscriptionsByExecution",
               SelectList,
               ByForeignKey::new(EventSubscription, "executionId"))
     .register("selectEventSubscriptionByQueryCriteria",
               SelectList,
               ByEqualityMap::new(EventSubscription, event_subscription_criteria))
     .register("selectIdentityLinksByTask", SelectList, ByForeignKey::new(IdentityLink, "taskId"))
     .register("selectIdentityLinksByProcessDefinition",
               SelectList,
               ByForeignKey::new(IdentityLink, "processDefId"));
    r
  }
}

/// Copia al criterio los parámetros presentes y no nulos, renombrando
/// parámetro → campo.
fn from_parameter_map(parameter: &QueryParameter, renames: &[(&str, &str)]) -> Result<Criteria> {
  let QueryParameter::Map(map) = parameter else {
    return Err(unexpected("un mapa de parámetros", parameter));
  };
  let mut criteria = Criteria::new();
  for (param, field) in renames {
    match map.get(*param) {
      Some(ParamValue::Null) | None => {}
      Some(v) => criteria = criteria.with(field, v.clone()),
    }
  }
  Ok(criteria)
}

fn deployment_and_key_criteria(p: &QueryParameter) -> Result<Criteria> {
  from_parameter_map(p, &[("deploymentId", "deploymentId"), ("processDefinitionKey", "key")])
}

fn job_configuration_criteria(p: &QueryParameter) -> Result<Criteria> {
  from_parameter_map(p,
                     &[("handlerType", "jobHandlerType"), ("handlerConfiguration", "jobHandlerConfiguration")])
}

fn event_configuration_criteria(p: &QueryParameter) -> Result<Criteria> {
  from_parameter_map(p, &[("eventType", "eventType"), ("configuration", "configuration")])
}

fn execution_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::Execution(q) => Ok(Criteria::new().with_opt("processInstanceId", &q.process_instance_id)
                                                      .with_opt("activityId", &q.activity_id)),
    other => Err(unexpected("ExecutionQuery", other)),
  }
}

fn process_instance_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::ProcessInstance(q) => Ok(Criteria::new().with("parentId", ParamValue::Null)
                                                            .with_opt("processInstanceId", &q.process_instance_id)
                                                            .with_opt("processDefinitionId", &q.process_definition_id)
                                                            .with_opt("businessKey", &q.business_key)),
    other => Err(unexpected("ProcessInstanceQuery", other)),
  }
}

fn process_instances_of_definition(p: &QueryParameter) -> Result<Criteria> {
  Ok(Criteria::new().with("parentId", ParamValue::Null)
                    .with("processDefinitionId", single_value(p)?))
}

fn process_definition_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::ProcessDefinition(q) => Ok(Criteria::new().with_opt("id", &q.id)
                                                              .with_opt("key", &q.key)
                                                              .with_opt("deploymentId", &q.deployment_id)),
    other => Err(unexpected("ProcessDefinitionQuery", other)),
  }
}

fn task_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::Task(q) => Ok(Criteria::new().with_opt("id", &q.task_id)
                                                 .with_opt("processInstanceId", &q.process_instance_id)
                                                 .with_opt("assignee", &q.assignee)
                                                 .with_opt("name", &q.name)),
    other => Err(unexpected("TaskQuery", other)),
  }
}

fn variable_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::VariableInstance(q) => Ok(Criteria::new().with_opt("name", &q.variable_name)
                                                             .with_opt("executionId", &q.execution_id)),
    other => Err(unexpected("VariableInstanceQuery", other)),
  }
}

fn event_subscription_criteria(p: &QueryParameter) -> Result<Criteria> {
  match p {
    QueryParameter::EventSubscription(q) => Ok(Criteria::new().with_opt("id", &q.event_subscription_id)
                                                              .with_opt("activityId", &q.activity_id)
                                                              .with_opt("eventName", &q.event_name)
                                                              .with_opt("eventType", &q.event_type)
                                                              .with_opt("executionId", &q.execution_id)
                                                              .with_opt("processInstanceId", &q.process_instance_id)),
    other => Err(unexpected("EventSubscriptionQuery", other)),
  }
}
