// Archivo: config.rs
// Propósito: configuración del motor leída del entorno (`.env` incluido).
//
// Variables:
//   BPM_ENGINE_NAME      nombre del motor (por defecto "default")
//   BPM_PERSISTENCE      map | sql (por defecto map)
//   DATABASE_URL         obligatoria con BPM_PERSISTENCE=sql
//   BPM_SCHEMA_UPDATE    true | false | create-drop (por defecto true)
//   BPM_POOL_SIZE        conexiones del pool relacional (por defecto 4)
use crate::errors::{EngineError, Result};
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceVariant {
  #[default]
  DistributedMap,
  Statement,
}

impl FromStr for PersistenceVariant {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "map" | "distributed-map" => Ok(PersistenceVariant::DistributedMap),
      "sql" | "statement" => Ok(PersistenceVariant::Statement),
      other => Err(EngineError::Configuration(format!("BPM_PERSISTENCE desconocido: '{}'", other))),
    }
  }
}

impl fmt::Display for PersistenceVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PersistenceVariant::DistributedMap => f.write_str("map"),
      PersistenceVariant::Statement => f.write_str("sql"),
    }
  }
}

/// Estrategia de esquema al construir el motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaUpdate {
  /// Crea lo que falte.
  #[default]
  Update,
  /// Exige que el esquema ya exista.
  Validate,
  /// Borra y recrea al arrancar y borra al cerrar el motor.
  CreateDrop,
}

impl FromStr for SchemaUpdate {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "true" => Ok(SchemaUpdate::Update),
      "false" => Ok(SchemaUpdate::Validate),
      "create-drop" => Ok(SchemaUpdate::CreateDrop),
      other => Err(EngineError::Configuration(format!("BPM_SCHEMA_UPDATE desconocido: '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  pub engine_name: String,
  pub persistence: PersistenceVariant,
  pub database_url: Option<String>,
  pub schema_update: SchemaUpdate,
  pub pool_size: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { engine_name: "default".into(),
           persistence: PersistenceVariant::default(),
           database_url: None,
           schema_update: SchemaUpdate::default(),
           pool_size: 4 }
  }
}

impl EngineConfig {
  /// Carga `.env` si existe y lee las variables del entorno.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Igual que `from_env` pero con una función de búsqueda arbitraria.
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where F: Fn(&str) -> Option<String>
  {
    let defaults = Self::default();
    let persistence = match lookup("BPM_PERSISTENCE") {
      Some(v) => v.parse()?,
      None => defaults.persistence,
    };
    let schema_update = match lookup("BPM_SCHEMA_UPDATE") {
      Some(v) => v.parse()?,
      None => defaults.schema_update,
    };
    let pool_size = match lookup("BPM_POOL_SIZE") {
      Some(v) => v.trim()
                  .parse::<u32>()
                  .ok()
                  .filter(|n| *n > 0)
                  .ok_or_else(|| EngineError::Configuration(format!("BPM_POOL_SIZE inválido: '{}'", v)))?,
      None => defaults.pool_size,
    };
    let database_url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty());
    if persistence == PersistenceVariant::Statement && database_url.is_none() {
      return Err(EngineError::Configuration("DATABASE_URL no está definido".into()));
    }
    Ok(Self { engine_name: lookup("BPM_ENGINE_NAME").unwrap_or(defaults.engine_name),
              persistence,
              database_url,
              schema_update,
              pool_size })
  }
}
