// Archivo: entity.rs
// Propósito: capacidad común de las entidades persistentes (`DbEntity`), el
// catálogo cerrado de tipos (`EntityKind`) y la suma `Entity` que viaja por
// el contrato de sesión de persistencia.
use crate::errors::DomainError;
use crate::repository::{ByteArrayEntity, CaseDefinitionEntity, DeploymentEntity, ProcessDefinitionEntity, PropertyEntity,
                        ResourceEntity};
use crate::runtime::{EventSubscriptionEntity, ExecutionEntity, IdentityLinkEntity, JobDefinitionEntity, JobEntity,
                     TaskEntity, VariableInstanceEntity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Registro persistente con identificador opaco y, opcionalmente, revisión.
///
/// Los tipos con revisión (`HasRevision` en el modelo original) sobrescriben
/// `revision`/`set_revision`; el resto devuelve `None`.
pub trait DbEntity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
  /// Tipo lógico usado para enrutar la entidad a su ubicación de
  /// almacenamiento.
  const KIND: EntityKind;

  fn id(&self) -> &str;

  fn set_id(&mut self, id: String);

  fn revision(&self) -> Option<i32> {
    None
  }

  fn set_revision(&mut self, _revision: i32) {}

  fn into_entity(self) -> Entity;

  fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! entity_kinds {
  ($( $variant:ident($ty:ty) ),* $(,)?) => {
    /// Tipos lógicos de entidad. Cada uno tiene exactamente una ubicación de
    /// almacenamiento por backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum EntityKind {
      $($variant),*
    }

    impl EntityKind {
      pub const ALL: &'static [EntityKind] = &[$(EntityKind::$variant),*];

      pub fn name(&self) -> &'static str {
        match self {
          $(EntityKind::$variant => stringify!($variant)),*
        }
      }

      pub fn from_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL.iter().copied().find(|k| k.name() == name)
      }
    }

    /// Cualquier entidad persistente, tal como la manejan los backends.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Entity {
      $($variant($ty)),*
    }

    impl Entity {
      pub fn kind(&self) -> EntityKind {
        match self {
          $(Entity::$variant(_) => EntityKind::$variant),*
        }
      }

      pub fn id(&self) -> &str {
        match self {
          $(Entity::$variant(e) => DbEntity::id(e)),*
        }
      }

      pub fn set_id(&mut self, id: String) {
        match self {
          $(Entity::$variant(e) => DbEntity::set_id(e, id)),*
        }
      }

      pub fn revision(&self) -> Option<i32> {
        match self {
          $(Entity::$variant(e) => DbEntity::revision(e)),*
        }
      }

      pub fn set_revision(&mut self, revision: i32) {
        match self {
          $(Entity::$variant(e) => DbEntity::set_revision(e, revision)),*
        }
      }

      /// Serializa la entidad a un objeto JSON con nombres de campo en
      /// camelCase (los mismos que usan los predicados).
      pub fn to_json(&self) -> Result<Value, DomainError> {
        match self {
          $(Entity::$variant(e) => Ok(serde_json::to_value(e)?)),*
        }
      }

      /// Reconstruye una entidad del tipo indicado desde su objeto JSON.
      pub fn from_json(kind: EntityKind, value: Value) -> Result<Entity, DomainError> {
        match kind {
          $(EntityKind::$variant => Ok(Entity::$variant(serde_json::from_value(value)?))),*
        }
      }
    }
  };
}

entity_kinds! {
  Deployment(DeploymentEntity),
  Resource(ResourceEntity),
  ByteArray(ByteArrayEntity),
  ProcessDefinition(ProcessDefinitionEntity),
  CaseDefinition(CaseDefinitionEntity),
  Property(PropertyEntity),
  Execution(ExecutionEntity),
  Job(JobEntity),
  JobDefinition(JobDefinitionEntity),
  EventSubscription(EventSubscriptionEntity),
  IdentityLink(IdentityLinkEntity),
  Task(TaskEntity),
  VariableInstance(VariableInstanceEntity),
}

impl EntityKind {
  /// Indica si el tipo lleva contador de revisión (bloqueo optimista).
  pub fn has_revision(&self) -> bool {
    !matches!(self, EntityKind::Deployment | EntityKind::Resource | EntityKind::IdentityLink)
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Genera un identificador nuevo (UUID v4) para entidades insertadas sin id.
pub fn new_entity_id() -> String {
  uuid::Uuid::new_v4().to_string()
}
