// Archivo: mapping.rs
// Propósito: tabla estática tipo de entidad → ubicación de almacenamiento
// (mapa con nombre o tabla). Se valida al construirla: cada tipo debe tener
// exactamente una entrada.
use crate::errors::{EngineError, Result};
use bpm_domain::EntityKind;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct EntityMapping {
  name: String,
  locations: BTreeMap<EntityKind, String>,
}

impl EntityMapping {
  /// Construye un mapeo total. Falla con `Configuration` si algún tipo no
  /// tiene ubicación o aparece más de una vez.
  pub fn new<'a>(name: &str, entries: impl IntoIterator<Item = (EntityKind, &'a str)>) -> Result<Self> {
    let mut locations = BTreeMap::new();
    for (kind, location) in entries {
      if locations.insert(kind, location.to_string()).is_some() {
        return Err(EngineError::Configuration(format!("mapeo '{}': el tipo {} tiene más de una ubicación",
                                                      name, kind)));
      }
    }
    let missing: Vec<&str> = EntityKind::ALL.iter()
                                            .filter(|k| !locations.contains_key(*k))
                                            .map(|k| k.name())
                                            .collect();
    if !missing.is_empty() {
      return Err(EngineError::Configuration(format!("mapeo '{}': tipos sin ubicación: {}",
                                                    name,
                                                    missing.join(", "))));
    }
    Ok(Self { name: name.to_string(),
              locations })
  }

  /// Nombres de mapa del backend de mapas distribuidos.
  pub fn distributed_map_defaults() -> Result<Self> {
    use EntityKind::*;
    Self::new("distributed-map",
              [(Deployment, "cam.engine.deployment"),
               (Resource, "cam.engine.byte_array"),
               (ByteArray, "cam.engine.byte_array"),
               (ProcessDefinition, "cam.engine.process_definition"),
               (CaseDefinition, "cam.engine.case_definition"),
               (Property, "cam.engine.property"),
               (Execution, "cam.engine.execution"),
               (Job, "cam.engine.job"),
               (JobDefinition, "cam.engine.job_definition"),
               (EventSubscription, "cam.engine.event_subscription"),
               (IdentityLink, "cam.engine.identity_link"),
               (Task, "cam.engine.task"),
               (VariableInstance, "cam.engine.variable")])
  }

  /// Nombres de tabla del backend relacional.
  pub fn relational_defaults() -> Result<Self> {
    use EntityKind::*;
    Self::new("relational",
              [(Deployment, "act_re_deployment"),
               (Resource, "act_ge_bytearray"),
               (ByteArray, "act_ge_bytearray"),
               (ProcessDefinition, "act_re_procdef"),
               (CaseDefinition, "act_re_case_def"),
               (Property, "act_ge_property"),
               (Execution, "act_ru_execution"),
               (Job, "act_ru_job"),
               (JobDefinition, "act_ru_jobdef"),
               (EventSubscription, "act_ru_event_subscr"),
               (IdentityLink, "act_ru_identitylink"),
               (Task, "act_ru_task"),
               (VariableInstance, "act_ru_variable")])
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn location(&self, kind: EntityKind) -> Result<&str> {
    self.locations
        .get(&kind)
        .map(String::as_str)
        .ok_or_else(|| EngineError::Configuration(format!("mapeo '{}': tipo {} sin ubicación", self.name, kind)))
  }

  /// Ubicaciones distintas, ordenadas y sin repetir.
  pub fn locations(&self) -> Vec<&str> {
    let mut all: Vec<&str> = self.locations.values().map(String::as_str).collect();
    all.sort_unstable();
    all.dedup();
    all
  }
}
