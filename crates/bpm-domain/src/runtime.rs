// Archivo: runtime.rs
// Propósito: entidades de tiempo de ejecución. La central es
// `ExecutionEntity`, nodo del árbol de ejecuciones de una instancia de
// proceso; el resto son filas dependientes (tareas, variables,
// suscripciones a eventos, vínculos de identidad y jobs).
use crate::entity::new_entity_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estado de suspensión persistido como entero (1 = activo, 2 = suspendido).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SuspensionState {
  #[default]
  Active,
  Suspended,
}

impl From<SuspensionState> for i32 {
  fn from(s: SuspensionState) -> i32 {
    match s {
      SuspensionState::Active => 1,
      SuspensionState::Suspended => 2,
    }
  }
}

impl TryFrom<i32> for SuspensionState {
  type Error = String;

  fn try_from(v: i32) -> Result<Self, Self::Error> {
    match v {
      1 => Ok(SuspensionState::Active),
      2 => Ok(SuspensionState::Suspended),
      other => Err(format!("estado de suspensión desconocido: {}", other)),
    }
  }
}

/// Bits del `cached_entity_state` de una ejecución. Un bit a cero indica
/// que no hace falta consultar esa clase de filas dependientes.
pub mod cached_state {
  pub const EVENT_SUBSCRIPTIONS: u32 = 1;
  pub const TASKS: u32 = 2;
  pub const JOBS: u32 = 3;
  pub const INCIDENTS: u32 = 4;
  pub const VARIABLES: u32 = 5;
  pub const SUB_PROCESS_INSTANCE: u32 = 6;
  pub const SUB_CASE_INSTANCE: u32 = 7;
}

/// Nodo del árbol de ejecuciones.
///
/// Los hijos no se embeben: cada ejecución es una fila independiente que
/// apunta a su padre mediante `parent_id`. La raíz (instancia de proceso)
/// tiene `parent_id == None` y `process_instance_id == id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEntity {
  pub id: String,
  pub revision: i32,
  pub process_instance_id: Option<String>,
  pub business_key: Option<String>,
  pub process_definition_id: Option<String>,
  pub activity_id: Option<String>,
  pub activity_instance_id: Option<String>,
  pub is_active: bool,
  pub is_concurrent: bool,
  pub is_scope: bool,
  pub is_event_scope: bool,
  pub parent_id: Option<String>,
  pub super_execution_id: Option<String>,
  pub super_case_execution_id: Option<String>,
  pub case_instance_id: Option<String>,
  pub suspension_state: SuspensionState,
  pub cached_entity_state: i32,
}

impl ExecutionEntity {
  /// Crea la raíz de una nueva instancia de proceso: scope, activa y sin
  /// padre.
  pub fn new_process_instance(process_definition_id: &str, business_key: Option<String>) -> Self {
    let id = new_entity_id();
    Self { process_instance_id: Some(id.clone()),
           id,
           business_key,
           process_definition_id: Some(process_definition_id.to_string()),
           is_active: true,
           is_scope: true,
           ..Default::default() }
  }

  pub fn is_process_instance(&self) -> bool {
    self.parent_id.is_none()
  }

  pub fn has_cached_state(&self, bit: u32) -> bool {
    self.cached_entity_state & (1 << bit) != 0
  }

  pub fn set_cached_state(&mut self, bit: u32, present: bool) {
    if present {
      self.cached_entity_state |= 1 << bit;
    } else {
      self.cached_entity_state &= !(1 << bit);
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntity {
  pub id: String,
  pub revision: i32,
  pub name: Option<String>,
  pub description: Option<String>,
  pub priority: i32,
  pub assignee: Option<String>,
  pub owner: Option<String>,
  pub execution_id: Option<String>,
  pub process_instance_id: Option<String>,
  pub process_definition_id: Option<String>,
  pub case_execution_id: Option<String>,
  pub parent_task_id: Option<String>,
  pub task_definition_key: Option<String>,
  pub create_time: Option<DateTime<Utc>>,
  pub suspension_state: SuspensionState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub type_name: Option<String>,
  pub execution_id: Option<String>,
  pub process_instance_id: Option<String>,
  pub case_execution_id: Option<String>,
  pub task_id: Option<String>,
  pub byte_array_id: Option<String>,
  pub text_value: Option<String>,
  pub long_value: Option<i64>,
}

/// Tipo de una suscripción a evento. Las tres variantes comparten
/// ubicación de almacenamiento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
  #[default]
  Message,
  Signal,
  Compensate,
}

impl EventType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventType::Message => "message",
      EventType::Signal => "signal",
      EventType::Compensate => "compensate",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscriptionEntity {
  pub id: String,
  pub revision: i32,
  pub event_type: EventType,
  pub event_name: Option<String>,
  pub execution_id: Option<String>,
  pub process_instance_id: Option<String>,
  pub activity_id: Option<String>,
  pub configuration: Option<String>,
  pub created: Option<DateTime<Utc>>,
}

/// Vínculo de identidad (candidato, asignado, iniciador) de una tarea o de
/// una definición de proceso.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLinkEntity {
  pub id: String,
  #[serde(rename = "type")]
  pub link_type: Option<String>,
  pub user_id: Option<String>,
  pub group_id: Option<String>,
  pub task_id: Option<String>,
  pub process_def_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntity {
  pub id: String,
  pub revision: i32,
  pub execution_id: Option<String>,
  pub process_instance_id: Option<String>,
  pub process_definition_id: Option<String>,
  pub job_definition_id: Option<String>,
  pub job_handler_type: Option<String>,
  pub job_handler_configuration: Option<String>,
  pub retries: i32,
  pub exception_message: Option<String>,
  pub due_date: Option<DateTime<Utc>>,
  pub suspension_state: SuspensionState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinitionEntity {
  pub id: String,
  pub revision: i32,
  pub process_definition_id: Option<String>,
  pub process_definition_key: Option<String>,
  pub activity_id: Option<String>,
  pub job_type: Option<String>,
  pub job_configuration: Option<String>,
  pub suspension_state: SuspensionState,
}

impl_db_entity!(ExecutionEntity, Execution, id, revisioned);
impl_db_entity!(TaskEntity, Task, id, revisioned);
impl_db_entity!(VariableInstanceEntity, VariableInstance, id, revisioned);
impl_db_entity!(EventSubscriptionEntity, EventSubscription, id, revisioned);
impl_db_entity!(IdentityLinkEntity, IdentityLink, id);
impl_db_entity!(JobEntity, Job, id, revisioned);
impl_db_entity!(JobDefinitionEntity, JobDefinition, id, revisioned);
