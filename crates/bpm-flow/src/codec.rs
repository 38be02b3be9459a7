// Archivo: codec.rs
// Propósito: codificación portable de entidades para el backend de mapas.
//
// Cada tipo de entidad declara su definición de clase (lista de campos y
// tipo nativo). Los campos numéricos no tienen null nativo: el valor mínimo
// reservado (`NULL_INT` / `NULL_LONG`) significa "ausente" y nunca puede
// usarse como dato real. Los campos de texto ausentes simplemente no se
// escriben.
use crate::errors::{EngineError, Result};
use crate::query::ParamValue;
use bpm_domain::{Entity, EntityKind};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

pub const NULL_INT: i32 = i32::MIN;
pub const NULL_LONG: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
  Chars,
  Int,
  Long,
  Bool,
  Bytes,
}

/// Valor nativo de un campo portable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortableValue {
  Chars(String),
  Int(i32),
  Long(i64),
  Bool(bool),
  Bytes(Vec<u8>),
}

/// Clave normalizada de un campo, usada por índices y predicados. Los
/// centinelas y los campos ausentes se normalizan a `Absent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
  Absent,
  Text(String),
  Number(i64),
  Bool(bool),
  Bytes(Vec<u8>),
}

impl FieldKey {
  pub fn of(value: Option<&PortableValue>) -> Self {
    match value {
      None => FieldKey::Absent,
      Some(PortableValue::Int(NULL_INT)) | Some(PortableValue::Long(NULL_LONG)) => FieldKey::Absent,
      Some(PortableValue::Chars(s)) => FieldKey::Text(s.clone()),
      Some(PortableValue::Int(n)) => FieldKey::Number(*n as i64),
      Some(PortableValue::Long(n)) => FieldKey::Number(*n),
      Some(PortableValue::Bool(b)) => FieldKey::Bool(*b),
      Some(PortableValue::Bytes(b)) => FieldKey::Bytes(b.clone()),
    }
  }

  pub fn from_param(value: &ParamValue) -> Self {
    match value {
      ParamValue::Text(s) => FieldKey::Text(s.clone()),
      ParamValue::Int(n) => FieldKey::Number(*n),
      ParamValue::Bool(b) => FieldKey::Bool(*b),
      ParamValue::Null => FieldKey::Absent,
    }
  }
}

/// Registro portable: id de clase + campos nativos.
#[derive(Debug, Clone, PartialEq)]
pub struct PortableRecord {
  class_id: EntityKind,
  fields: BTreeMap<String, PortableValue>,
}

impl PortableRecord {
  pub fn class_id(&self) -> EntityKind {
    self.class_id
  }

  pub fn field(&self, name: &str) -> Option<&PortableValue> {
    self.fields.get(name)
  }

  pub fn key_of(&self, name: &str) -> FieldKey {
    FieldKey::of(self.fields.get(name))
  }

  /// Revisión almacenada, si el tipo la lleva.
  pub fn revision(&self) -> Option<i32> {
    match self.fields.get("revision") {
      Some(PortableValue::Int(r)) if *r != NULL_INT => Some(*r),
      _ => None,
    }
  }

  pub fn matches(&self, field: &str, expected: &ParamValue) -> bool {
    self.key_of(field) == FieldKey::from_param(expected)
  }
}

/// Definición de clase portable de un tipo de entidad.
#[derive(Debug, Clone, Copy)]
pub struct ClassDefinition {
  pub kind: EntityKind,
  pub fields: &'static [(&'static str, FieldType)],
}

use FieldType::{Bool, Bytes, Chars, Int, Long};

const DEPLOYMENT: &[(&str, FieldType)] = &[("id", Chars), ("name", Chars), ("deploymentTime", Chars)];

const RESOURCE: &[(&str, FieldType)] =
  &[("id", Chars), ("name", Chars), ("deploymentId", Chars), ("bytes", Bytes), ("generated", Bool)];

const BYTE_ARRAY: &[(&str, FieldType)] =
  &[("id", Chars), ("revision", Int), ("name", Chars), ("deploymentId", Chars), ("bytes", Bytes)];

const PROCESS_DEFINITION: &[(&str, FieldType)] = &[("id", Chars),
                                                   ("revision", Int),
                                                   ("key", Chars),
                                                   ("version", Int),
                                                   ("name", Chars),
                                                   ("category", Chars),
                                                   ("deploymentId", Chars),
                                                   ("resourceName", Chars),
                                                   ("diagramResourceName", Chars),
                                                   ("hasStartFormKey", Bool),
                                                   ("suspensionState", Int)];

const CASE_DEFINITION: &[(&str, FieldType)] = &[("id", Chars),
                                                ("revision", Int),
                                                ("key", Chars),
                                                ("version", Int),
                                                ("name", Chars),
                                                ("category", Chars),
                                                ("deploymentId", Chars),
                                                ("resourceName", Chars)];

const PROPERTY: &[(&str, FieldType)] = &[("name", Chars), ("revision", Int), ("value", Chars)];

const EXECUTION: &[(&str, FieldType)] = &[("id", Chars),
                                          ("revision", Int),
                                          ("processInstanceId", Chars),
                                          ("businessKey", Chars),
                                          ("processDefinitionId", Chars),
                                          ("activityId", Chars),
                                          ("activityInstanceId", Chars),
                                          ("isActive", Bool),
                                          ("isConcurrent", Bool),
                                          ("isScope", Bool),
                                          ("isEventScope", Bool),
                                          ("parentId", Chars),
                                          ("superExecutionId", Chars),
                                          ("superCaseExecutionId", Chars),
                                          ("caseInstanceId", Chars),
                                          ("suspensionState", Int),
                                          ("cachedEntityState", Int)];

const JOB: &[(&str, FieldType)] = &[("id", Chars),
                                    ("revision", Int),
                                    ("executionId", Chars),
                                    ("processInstanceId", Chars),
                                    ("processDefinitionId", Chars),
                                    ("jobDefinitionId", Chars),
                                    ("jobHandlerType", Chars),
                                    ("jobHandlerConfiguration", Chars),
                                    ("retries", Int),
                                    ("exceptionMessage", Chars),
                                    ("dueDate", Chars),
                                    ("suspensionState", Int)];

const JOB_DEFINITION: &[(&str, FieldType)] = &[("id", Chars),
                                               ("revision", Int),
                                               ("processDefinitionId", Chars),
                                               ("processDefinitionKey", Chars),
                                               ("activityId", Chars),
                                               ("jobType", Chars),
                                               ("jobConfiguration", Chars),
                                               ("suspensionState", Int)];

const EVENT_SUBSCRIPTION: &[(&str, FieldType)] = &[("id", Chars),
                                                   ("revision", Int),
                                                   ("eventType", Chars),
                                                   ("eventName", Chars),
                                                   ("executionId", Chars),
                                                   ("processInstanceId", Chars),
                                                   ("activityId", Chars),
                                                   ("configuration", Chars),
                                                   ("created", Chars)];

const IDENTITY_LINK: &[(&str, FieldType)] = &[("id", Chars),
                                              ("type", Chars),
                                              ("userId", Chars),
                                              ("groupId", Chars),
                                              ("taskId", Chars),
                                              ("processDefId", Chars)];

const TASK: &[(&str, FieldType)] = &[("id", Chars),
                                     ("revision", Int),
                                     ("name", Chars),
                                     ("description", Chars),
                                     ("priority", Int),
                                     ("assignee", Chars),
                                     ("owner", Chars),
                                     ("executionId", Chars),
                                     ("processInstanceId", Chars),
                                     ("processDefinitionId", Chars),
                                     ("caseExecutionId", Chars),
                                     ("parentTaskId", Chars),
                                     ("taskDefinitionKey", Chars),
                                     ("createTime", Chars),
                                     ("suspensionState", Int)];

const VARIABLE_INSTANCE: &[(&str, FieldType)] = &[("id", Chars),
                                                  ("revision", Int),
                                                  ("name", Chars),
                                                  ("typeName", Chars),
                                                  ("executionId", Chars),
                                                  ("processInstanceId", Chars),
                                                  ("caseExecutionId", Chars),
                                                  ("taskId", Chars),
                                                  ("byteArrayId", Chars),
                                                  ("textValue", Chars),
                                                  ("longValue", Long)];

/// Codec portable con una definición de clase por tipo de entidad.
#[derive(Debug, Clone)]
pub struct PortableCodec {
  definitions: BTreeMap<EntityKind, ClassDefinition>,
}

impl PortableCodec {
  /// Construye el codec y verifica que todos los tipos tengan definición.
  pub fn new(definitions: impl IntoIterator<Item = ClassDefinition>) -> Result<Self> {
    let definitions: BTreeMap<EntityKind, ClassDefinition> = definitions.into_iter().map(|d| (d.kind, d)).collect();
    if let Some(missing) = EntityKind::ALL.iter().find(|k| !definitions.contains_key(*k)) {
      return Err(EngineError::Configuration(format!("codec portable: {} sin definición de clase", missing)));
    }
    Ok(Self { definitions })
  }

  pub fn engine_defaults() -> Result<Self> {
    use EntityKind::*;
    let defs = [(Deployment, DEPLOYMENT),
                (Resource, RESOURCE),
                (ByteArray, BYTE_ARRAY),
                (ProcessDefinition, PROCESS_DEFINITION),
                (CaseDefinition, CASE_DEFINITION),
                (Property, PROPERTY),
                (Execution, EXECUTION),
                (Job, JOB),
                (JobDefinition, JOB_DEFINITION),
                (EventSubscription, EVENT_SUBSCRIPTION),
                (IdentityLink, IDENTITY_LINK),
                (Task, TASK),
                (VariableInstance, VARIABLE_INSTANCE)];
    Self::new(defs.into_iter().map(|(kind, fields)| ClassDefinition { kind, fields }))
  }

  fn definition(&self, kind: EntityKind) -> Result<&ClassDefinition> {
    self.definitions
        .get(&kind)
        .ok_or_else(|| EngineError::Configuration(format!("codec portable: {} sin definición de clase", kind)))
  }

  pub fn encode(&self, entity: &Entity) -> Result<PortableRecord> {
    let kind = entity.kind();
    let def = self.definition(kind)?;
    let json = entity.to_json()?;
    let obj = json.as_object()
                  .ok_or_else(|| EngineError::Codec(format!("{} no se serializa como objeto", kind)))?;
    if let Some(undeclared) = obj.keys().find(|k| !def.fields.iter().any(|(name, _)| *name == k.as_str())) {
      return Err(EngineError::Codec(format!("{}: campo no declarado '{}'", kind, undeclared)));
    }
    let mut fields = BTreeMap::new();
    for (name, field_type) in def.fields {
      let value = obj.get(*name).unwrap_or(&Value::Null);
      if let Some(v) = encode_field(kind, name, *field_type, value)? {
        fields.insert(name.to_string(), v);
      }
    }
    Ok(PortableRecord { class_id: kind,
                        fields })
  }

  pub fn decode(&self, record: &PortableRecord) -> Result<Entity> {
    let def = self.definition(record.class_id)?;
    let mut obj = Map::new();
    for (name, _) in def.fields {
      let value = match record.fields.get(*name) {
        None => Value::Null,
        Some(PortableValue::Chars(s)) => Value::String(s.clone()),
        Some(PortableValue::Int(NULL_INT)) | Some(PortableValue::Long(NULL_LONG)) => Value::Null,
        Some(PortableValue::Int(n)) => Value::Number(Number::from(*n)),
        Some(PortableValue::Long(n)) => Value::Number(Number::from(*n)),
        Some(PortableValue::Bool(b)) => Value::Bool(*b),
        Some(PortableValue::Bytes(bytes)) => Value::Array(bytes.iter().map(|b| Value::Number(Number::from(*b))).collect()),
      };
      obj.insert(name.to_string(), value);
    }
    Ok(Entity::from_json(record.class_id, Value::Object(obj))?)
  }
}

fn encode_field(kind: EntityKind, name: &str, field_type: FieldType, value: &Value) -> Result<Option<PortableValue>> {
  let mismatch = || EngineError::Codec(format!("{}.{}: tipo inesperado {}", kind, name, value));
  let reserved = || EngineError::Codec(format!("{}.{}: el valor mínimo está reservado como null", kind, name));
  let encoded = match (field_type, value) {
    (FieldType::Int, Value::Null) => Some(PortableValue::Int(NULL_INT)),
    (FieldType::Long, Value::Null) => Some(PortableValue::Long(NULL_LONG)),
    (_, Value::Null) => None,
    (FieldType::Chars, Value::String(s)) => Some(PortableValue::Chars(s.clone())),
    (FieldType::Int, Value::Number(n)) => {
      let v = n.as_i64().and_then(|v| i32::try_from(v).ok()).ok_or_else(mismatch)?;
      if v == NULL_INT {
        return Err(reserved());
      }
      Some(PortableValue::Int(v))
    }
    (FieldType::Long, Value::Number(n)) => {
      let v = n.as_i64().ok_or_else(mismatch)?;
      if v == NULL_LONG {
        return Err(reserved());
      }
      Some(PortableValue::Long(v))
    }
    (FieldType::Bool, Value::Bool(b)) => Some(PortableValue::Bool(*b)),
    (FieldType::Bytes, Value::Array(items)) => {
      let bytes = items.iter()
                       .map(|i| i.as_u64().and_then(|b| u8::try_from(b).ok()))
                       .collect::<Option<Vec<u8>>>()
                       .ok_or_else(mismatch)?;
      Some(PortableValue::Bytes(bytes))
    }
    _ => return Err(mismatch()),
  };
  Ok(encoded)
}
