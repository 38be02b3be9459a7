// Archivo: repository.rs
// Propósito: entidades del repositorio de definiciones (despliegues,
// recursos, definiciones de proceso/caso y propiedades del motor).
use crate::runtime::SuspensionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Despliegue: agrupa recursos y definiciones publicadas juntas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEntity {
  pub id: String,
  pub name: Option<String>,
  pub deployment_time: Option<DateTime<Utc>>,
}

/// Recurso de un despliegue (por ejemplo el XML de un proceso).
///
/// Comparte ubicación de almacenamiento con `ByteArrayEntity`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntity {
  pub id: String,
  pub name: Option<String>,
  pub deployment_id: Option<String>,
  pub bytes: Vec<u8>,
  pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteArrayEntity {
  pub id: String,
  pub revision: i32,
  pub name: Option<String>,
  pub deployment_id: Option<String>,
  pub bytes: Vec<u8>,
}

/// Definición de proceso desplegada. `key` + `version` identifican la
/// versión; la más alta por `key` es la "última".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinitionEntity {
  pub id: String,
  pub revision: i32,
  pub key: String,
  pub version: i32,
  pub name: Option<String>,
  pub category: Option<String>,
  pub deployment_id: Option<String>,
  pub resource_name: Option<String>,
  pub diagram_resource_name: Option<String>,
  pub has_start_form_key: bool,
  pub suspension_state: SuspensionState,
}

impl ProcessDefinitionEntity {
  pub fn new(id: impl Into<String>, key: impl Into<String>, version: i32) -> Self {
    Self { id: id.into(),
           key: key.into(),
           version,
           ..Default::default() }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDefinitionEntity {
  pub id: String,
  pub revision: i32,
  pub key: String,
  pub version: i32,
  pub name: Option<String>,
  pub category: Option<String>,
  pub deployment_id: Option<String>,
  pub resource_name: Option<String>,
}

/// Propiedad del motor (`historyLevel`, `schema.version`, ...). El nombre
/// hace de identificador.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyEntity {
  pub name: String,
  pub revision: i32,
  pub value: Option<String>,
}

impl_db_entity!(DeploymentEntity, Deployment, id);
impl_db_entity!(ResourceEntity, Resource, id);
impl_db_entity!(ByteArrayEntity, ByteArray, id, revisioned);
impl_db_entity!(ProcessDefinitionEntity, ProcessDefinition, id, revisioned);
impl_db_entity!(CaseDefinitionEntity, CaseDefinition, id, revisioned);
impl_db_entity!(PropertyEntity, Property, name, revisioned);
