// Archivo: session.rs
// Propósito: contrato común de las sesiones de persistencia. Los dos
// backends (mapas distribuidos y sentencias relacionales) lo implementan
// igual; el motor elige la fábrica concreta al configurarse y el resto del
// núcleo sólo ve `PersistenceProvider`.
use crate::context::{CommandContext, OpenedSession, Session, SessionFactory};
use crate::errors::{EngineError, Result};
use crate::query::{QueryParameter, Row};
use bpm_domain::{Entity, EntityKind};
use std::any::TypeId;
use std::sync::Arc;

/// Sesión de persistencia de una unidad de trabajo.
///
/// Revisiones: `insert` y `update` no modifican la entidad recibida;
/// devuelven la revisión que quedó escrita (`None` si el tipo no lleva
/// revisión). El llamador la aplica a su copia sólo tras el éxito.
pub trait PersistenceSession: Session {
  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<Entity>>;

  fn select_list(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<Row>>;

  /// Primera fila de la sentencia, o `None` si no hay ninguna.
  fn select_one(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Option<Row>>;

  fn insert(&mut self, entity: &Entity) -> Result<Option<i32>>;

  /// Escribe la entidad con revisión `actual + 1`. Falla con
  /// `OptimisticLocking` si la revisión almacenada no es la de `entity` o si
  /// la fila ya no existe.
  fn update(&mut self, entity: &Entity) -> Result<Option<i32>>;

  /// Borra por identificador, comprobando la revisión si el tipo la lleva.
  fn delete(&mut self, entity: &Entity) -> Result<()>;

  /// Borrado masivo mediante una sentencia con nombre. Devuelve cuántas
  /// filas se eliminaron.
  fn delete_bulk(&mut self, statement: &str, parameter: &QueryParameter) -> Result<usize>;

  /// Bloqueo pesimista. Ningún backend lo necesita.
  fn lock(&mut self, _statement: &str) -> Result<()> {
    Ok(())
  }

  fn db_schema_create(&mut self) -> Result<()>;

  fn db_schema_drop(&mut self) -> Result<()>;

  /// Versión del esquema instalado, si el backend la conoce.
  fn db_schema_check_version(&mut self) -> Result<Option<String>>;

  fn is_engine_table_present(&mut self) -> Result<bool>;

  fn backend_name(&self) -> &'static str;
}

/// Sesión de persistencia en uso dentro de un contexto de comando.
pub type PersistenceProvider = Box<dyn PersistenceSession>;

impl Session for PersistenceProvider {
  fn flush(&mut self) -> Result<()> {
    Session::flush(&mut **self)
  }

  fn close(&mut self) -> Result<()> {
    Session::close(&mut **self)
  }

  fn commit(&mut self) -> Result<()> {
    Session::commit(&mut **self)
  }

  fn rollback(&mut self) -> Result<()> {
    Session::rollback(&mut **self)
  }
}

/// Fábrica de sesiones de un backend concreto.
pub trait PersistenceSessionFactory: Send + Sync {
  fn open_persistence_session(&self) -> Result<PersistenceProvider>;

  fn backend_name(&self) -> &'static str;
}

/// Adapta una `PersistenceSessionFactory` al registro de fábricas del
/// contexto de comando.
pub struct PersistenceProviderFactory {
  inner: Arc<dyn PersistenceSessionFactory>,
}

impl PersistenceProviderFactory {
  pub fn new(inner: Arc<dyn PersistenceSessionFactory>) -> Self {
    Self { inner }
  }

  pub fn backend_name(&self) -> &'static str {
    self.inner.backend_name()
  }
}

impl SessionFactory for PersistenceProviderFactory {
  fn session_type(&self) -> TypeId {
    TypeId::of::<PersistenceProvider>()
  }

  fn open_session(&self, _ctx: &CommandContext) -> Result<OpenedSession> {
    Ok(OpenedSession::new(self.inner.open_persistence_session()?))
  }
}

/// Error de bloqueo optimista con el formato común de ambos backends.
pub fn optimistic_locking(action: &str, entity: &Entity, found: Option<i32>) -> EngineError {
  let found = match found {
    Some(r) => format!("revisión almacenada {}", r),
    None => "la fila ya no existe".to_string(),
  };
  EngineError::OptimisticLocking(format!("{} de {} '{}' con revisión {:?} falló: {}",
                                         action,
                                         entity.kind(),
                                         entity.id(),
                                         entity.revision(),
                                         found))
}

/// Revisión siguiente a la que presenta la entidad (1 si no tenía).
pub fn next_revision(entity: &Entity) -> Option<i32> {
  entity.revision().map(|r| r + 1)
}
