// Archivo: query.rs
// Propósito: objetos de parámetros que los llamadores pasan junto al nombre
// de sentencia, los criterios de consulta tipados y las filas devueltas.
use bpm_domain::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Valor escalar de un parámetro o criterio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamValue {
  Text(String),
  Int(i64),
  Bool(bool),
  Null,
}

impl ParamValue {
  pub fn as_text(&self) -> Option<&str> {
    match self {
      ParamValue::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Text(s) => write!(f, "'{}'", s),
      ParamValue::Int(n) => write!(f, "{}", n),
      ParamValue::Bool(b) => write!(f, "{}", b),
      ParamValue::Null => f.write_str("null"),
    }
  }
}

impl From<&str> for ParamValue {
  fn from(s: &str) -> Self {
    ParamValue::Text(s.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(s: String) -> Self {
    ParamValue::Text(s)
  }
}

impl From<i64> for ParamValue {
  fn from(n: i64) -> Self {
    ParamValue::Int(n)
  }
}

impl From<i32> for ParamValue {
  fn from(n: i32) -> Self {
    ParamValue::Int(n as i64)
  }
}

impl From<bool> for ParamValue {
  fn from(b: bool) -> Self {
    ParamValue::Bool(b)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionQuery {
  pub process_instance_id: Option<String>,
  pub activity_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessInstanceQuery {
  pub process_instance_id: Option<String>,
  pub process_definition_id: Option<String>,
  pub business_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessDefinitionQuery {
  pub id: Option<String>,
  pub key: Option<String>,
  pub deployment_id: Option<String>,
  /// Conserva sólo la versión más alta de cada `key`.
  pub latest: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
  pub task_id: Option<String>,
  pub process_instance_id: Option<String>,
  pub assignee: Option<String>,
  pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableInstanceQuery {
  pub variable_name: Option<String>,
  pub execution_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSubscriptionQuery {
  pub event_subscription_id: Option<String>,
  pub activity_id: Option<String>,
  pub event_name: Option<String>,
  pub event_type: Option<String>,
  pub execution_id: Option<String>,
  pub process_instance_id: Option<String>,
}

/// Parámetro de una sentencia con nombre.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParameter {
  /// Valor único, normalmente un identificador o una clave foránea.
  Value(ParamValue),
  /// Mapa nombre → valor (por ejemplo `deploymentId` + `processDefinitionKey`).
  Map(BTreeMap<String, ParamValue>),
  Execution(ExecutionQuery),
  ProcessInstance(ProcessInstanceQuery),
  ProcessDefinition(ProcessDefinitionQuery),
  Task(TaskQuery),
  VariableInstance(VariableInstanceQuery),
  EventSubscription(EventSubscriptionQuery),
  /// Parámetro paginado: envuelve otro parámetro con ventana de resultados.
  Page { parameter: Box<QueryParameter>, page: Page },
}

impl QueryParameter {
  pub fn text(value: impl Into<String>) -> Self {
    QueryParameter::Value(ParamValue::Text(value.into()))
  }

  pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where K: Into<String>,
          V: Into<ParamValue>
  {
    QueryParameter::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  /// Parámetro efectivo, sin la envoltura de paginación.
  pub fn inner(&self) -> &QueryParameter {
    match self {
      QueryParameter::Page { parameter, .. } => parameter.inner(),
      other => other,
    }
  }

  pub fn page(&self) -> Option<Page> {
    match self {
      QueryParameter::Page { page, .. } => Some(*page),
      _ => None,
    }
  }
}

/// Máximo de resultados por defecto (`MAX_INT`).
pub const MAX_RESULTS: usize = i32::MAX as usize;

/// Ventana de resultados de una consulta paginada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub first_result: usize,
  pub max_results: usize,
}

impl Default for Page {
  fn default() -> Self {
    Self { first_result: 0,
           max_results: MAX_RESULTS }
  }
}

impl Page {
  pub fn new(first_result: Option<usize>, max_results: Option<usize>) -> Self {
    Self { first_result: first_result.unwrap_or(0),
           max_results: max_results.unwrap_or(MAX_RESULTS) }
  }

  pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
    rows.into_iter().skip(self.first_result).take(self.max_results).collect()
  }
}

/// Fila devuelta por una sentencia de selección: una entidad completa o un
/// valor proyectado (por ejemplo listas de ids).
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
  Entity(Entity),
  Value(ParamValue),
}
