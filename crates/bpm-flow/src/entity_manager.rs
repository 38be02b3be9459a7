// Archivo: entity_manager.rs
// Propósito: fachada de entidades sobre la sesión de persistencia activa.
//
// Las escrituras se acumulan como operaciones pendientes y se envían al
// backend en el flush del contexto de comando, en este orden: inserciones,
// actualizaciones, borrados masivos y borrados individuales (cada grupo en
// orden de llegada). El bloqueo optimista es cosa del backend; aquí sólo se
// propagan sus errores sin tocarlos.
use crate::context::{CommandContext, OpenedSession, Session, SessionFactory};
use crate::errors::{EngineError, Result};
use crate::query::{ParamValue, Page, QueryParameter, Row};
use crate::session::PersistenceProvider;
use bpm_domain::{DbEntity, Entity, EntityKind};
use indexmap::IndexMap;
use log::trace;
use std::any::TypeId;
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Generador de identificadores para entidades insertadas sin id.
pub trait IdGenerator: Send + Sync {
  fn next_id(&self) -> String;
}

/// Identificadores UUID v4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
  fn next_id(&self) -> String {
    uuid::Uuid::new_v4().to_string()
  }
}

/// Operación pendiente de enviar al backend.
#[derive(Debug, Clone, PartialEq)]
pub enum DbOperation {
  Insert(Entity),
  Update(Entity),
  DeleteBulk { statement: String, parameter: QueryParameter },
  Delete(Entity),
}

type EntityKey = (EntityKind, String);

fn key_of(entity: &Entity) -> EntityKey {
  (entity.kind(), entity.id().to_string())
}

pub struct EntityManager {
  persistence: Rc<RefCell<PersistenceProvider>>,
  id_generator: Arc<dyn IdGenerator>,
  cache: HashMap<EntityKey, Entity>,
  inserts: IndexMap<EntityKey, Entity>,
  updates: IndexMap<EntityKey, Entity>,
  bulk_deletes: Vec<(String, QueryParameter)>,
  deletes: IndexMap<EntityKey, Entity>,
}

impl EntityManager {
  pub fn new(persistence: Rc<RefCell<PersistenceProvider>>, id_generator: Arc<dyn IdGenerator>) -> Self {
    Self { persistence,
           id_generator,
           cache: HashMap::new(),
           inserts: IndexMap::new(),
           updates: IndexMap::new(),
           bulk_deletes: Vec::new(),
           deletes: IndexMap::new() }
  }

  fn backend(&self) -> Result<RefMut<'_, PersistenceProvider>> {
    self.persistence
        .try_borrow_mut()
        .map_err(|_| EngineError::Other("la sesión de persistencia está en uso".into()))
  }

  /// Versión visible de una entidad en esta unidad de trabajo, sin ir al
  /// backend. `Some(None)` = borrada aquí.
  fn local(&self, key: &EntityKey) -> Option<Option<Entity>> {
    if self.deletes.contains_key(key) {
      return Some(None);
    }
    self.inserts
        .get(key)
        .or_else(|| self.updates.get(key))
        .or_else(|| self.cache.get(key))
        .map(|e| Some(e.clone()))
  }

  pub fn select_entity_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
    let key = (kind, id.to_string());
    if let Some(local) = self.local(&key) {
      return Ok(local);
    }
    let found = self.backend()?.select_by_id(kind, id)?;
    if let Some(e) = &found {
      self.cache.insert(key, e.clone());
    }
    Ok(found)
  }

  pub fn select_by_id<T: DbEntity>(&mut self, id: &str) -> Result<Option<T>> {
    self.select_entity_by_id(T::KIND, id)?.map(downcast::<T>).transpose()
  }

  /// Filas de una sentencia de lista. Las consultas ven el estado ya
  /// enviado al backend; las entidades con cambios pendientes en esta
  /// unidad de trabajo se devuelven en su versión local y las borradas se
  /// omiten. La paginación se aplica después de esa superposición.
  pub fn select_list(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<Row>> {
    let rows = self.backend()?.select_list(statement, parameter.inner())?;
    let rows: Vec<Row> = rows.into_iter().filter_map(|row| self.overlay(row)).collect();
    Ok(match parameter.page() {
         Some(page) => page.apply(rows),
         None => rows,
       })
  }

  pub fn select_list_page(&mut self, statement: &str, parameter: &QueryParameter, page: Page) -> Result<Vec<Row>> {
    let paged = QueryParameter::Page { parameter: Box::new(parameter.clone()),
                                       page };
    self.select_list(statement, &paged)
  }

  pub fn select_one(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Option<Row>> {
    let row = self.backend()?.select_one(statement, parameter)?;
    Ok(row.and_then(|r| self.overlay(r)))
  }

  /// `select_list` tipado: falla si la sentencia devuelve otra cosa que
  /// entidades de tipo `T`.
  pub fn select_entities<T: DbEntity>(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<T>> {
    self.select_list(statement, parameter)?.into_iter().map(row_to::<T>).collect()
  }

  pub fn select_one_entity<T: DbEntity>(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Option<T>> {
    self.select_one(statement, parameter)?.map(row_to::<T>).transpose()
  }

  /// Valores proyectados (por ejemplo listas de ids).
  pub fn select_values(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<ParamValue>> {
    self.select_list(statement, parameter)?
        .into_iter()
        .map(|row| match row {
          Row::Value(v) => Ok(v),
          Row::Entity(e) => Err(EngineError::Other(format!("{}: se esperaba un valor y llegó {} '{}'",
                                                           statement,
                                                           e.kind(),
                                                           e.id()))),
        })
        .collect()
  }

  fn overlay(&mut self, row: Row) -> Option<Row> {
    match row {
      Row::Entity(e) => {
        let key = key_of(&e);
        if self.deletes.contains_key(&key) {
          return None;
        }
        if let Some(local) = self.inserts.get(&key).or_else(|| self.updates.get(&key)) {
          return Some(Row::Entity(local.clone()));
        }
        self.cache.insert(key, e.clone());
        Some(Row::Entity(e))
      }
      value => Some(value),
    }
  }

  /// Registra una inserción. Si la entidad no tiene id se le asigna uno.
  /// Devuelve el id definitivo.
  pub fn insert<T: DbEntity>(&mut self, entity: T) -> Result<String> {
    self.insert_entity(entity.into_entity())
  }

  pub fn insert_entity(&mut self, mut entity: Entity) -> Result<String> {
    if entity.id().is_empty() {
      entity.set_id(self.id_generator.next_id());
    }
    let key = key_of(&entity);
    if self.deletes.contains_key(&key) {
      return Err(EngineError::BadUserRequest(format!("{} '{}' se borró en esta unidad de trabajo", key.0, key.1)));
    }
    let id = key.1.clone();
    self.inserts.insert(key, entity);
    Ok(id)
  }

  /// Registra una actualización. La revisión de `entity` debe ser la
  /// última leída; el backend la compara en el flush.
  pub fn update<T: DbEntity>(&mut self, entity: T) -> Result<()> {
    self.update_entity(entity.into_entity())
  }

  pub fn update_entity(&mut self, entity: Entity) -> Result<()> {
    let key = key_of(&entity);
    if self.deletes.contains_key(&key) {
      return Err(EngineError::BadUserRequest(format!("{} '{}' se borró en esta unidad de trabajo", key.0, key.1)));
    }
    if let Some(pending) = self.inserts.get_mut(&key) {
      *pending = entity;
    } else {
      self.updates.insert(key, entity);
    }
    Ok(())
  }

  pub fn delete<T: DbEntity>(&mut self, entity: &T) -> Result<()> {
    self.delete_entity(entity.clone().into_entity())
  }

  /// Registra un borrado. Borrar una inserción pendiente la cancela.
  pub fn delete_entity(&mut self, entity: Entity) -> Result<()> {
    let key = key_of(&entity);
    if self.inserts.shift_remove(&key).is_some() {
      trace!("inserción pendiente de {} '{}' cancelada", key.0, key.1);
      return Ok(());
    }
    self.updates.shift_remove(&key);
    self.deletes.insert(key, entity);
    Ok(())
  }

  pub fn delete_bulk(&mut self, statement: &str, parameter: QueryParameter) {
    self.bulk_deletes.push((statement.to_string(), parameter));
  }

  /// Operaciones pendientes en el orden en que se enviarán.
  pub fn pending_operations(&self) -> Vec<DbOperation> {
    let mut ops: Vec<DbOperation> = self.inserts.values().cloned().map(DbOperation::Insert).collect();
    ops.extend(self.updates.values().cloned().map(DbOperation::Update));
    ops.extend(self.bulk_deletes
                   .iter()
                   .cloned()
                   .map(|(statement, parameter)| DbOperation::DeleteBulk { statement, parameter }));
    ops.extend(self.deletes.values().cloned().map(DbOperation::Delete));
    ops
  }

  pub fn has_pending_operations(&self) -> bool {
    !(self.inserts.is_empty() && self.updates.is_empty() && self.bulk_deletes.is_empty() && self.deletes.is_empty())
  }

  fn flush_pending(&mut self) -> Result<()> {
    let inserts: Vec<(EntityKey, Entity)> = self.inserts.drain(..).collect();
    let updates: Vec<(EntityKey, Entity)> = self.updates.drain(..).collect();
    let bulk: Vec<(String, QueryParameter)> = self.bulk_deletes.drain(..).collect();
    let deletes: Vec<(EntityKey, Entity)> = self.deletes.drain(..).collect();
    let persistence = self.persistence.clone();
    let mut backend = persistence.try_borrow_mut()
                                 .map_err(|_| EngineError::Other("la sesión de persistencia está en uso".into()))?;

    for (key, mut entity) in inserts {
      if let Some(revision) = backend.insert(&entity)? {
        entity.set_revision(revision);
      }
      self.cache.insert(key, entity);
    }
    for (key, mut entity) in updates {
      if let Some(revision) = backend.update(&entity)? {
        entity.set_revision(revision);
      }
      self.cache.insert(key, entity);
    }
    if !bulk.is_empty() {
      for (statement, parameter) in &bulk {
        let n = backend.delete_bulk(statement, parameter)?;
        trace!("{}: {} filas", statement, n);
      }
      self.cache.clear();
    }
    for (key, entity) in deletes {
      backend.delete(&entity)?;
      self.cache.remove(&key);
    }
    Ok(())
  }

  fn discard(&mut self) {
    self.inserts.clear();
    self.updates.clear();
    self.bulk_deletes.clear();
    self.deletes.clear();
    self.cache.clear();
  }
}

fn downcast<T: DbEntity>(entity: Entity) -> Result<T> {
  let kind = entity.kind();
  T::from_entity(entity).ok_or_else(|| EngineError::Other(format!("se esperaba {} y llegó {}", T::KIND, kind)))
}

fn row_to<T: DbEntity>(row: Row) -> Result<T> {
  match row {
    Row::Entity(e) => downcast::<T>(e),
    Row::Value(v) => Err(EngineError::Other(format!("se esperaba {} y llegó el valor {}", T::KIND, v))),
  }
}

impl Session for EntityManager {
  fn flush(&mut self) -> Result<()> {
    self.flush_pending()
  }

  fn close(&mut self) -> Result<()> {
    self.discard();
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    self.discard();
    Ok(())
  }
}

/// Abre un `EntityManager` sobre la sesión de persistencia del contexto.
pub struct EntityManagerFactory {
  id_generator: Arc<dyn IdGenerator>,
}

impl EntityManagerFactory {
  pub fn new(id_generator: Arc<dyn IdGenerator>) -> Self {
    Self { id_generator }
  }
}

impl SessionFactory for EntityManagerFactory {
  fn session_type(&self) -> TypeId {
    TypeId::of::<EntityManager>()
  }

  fn open_session(&self, ctx: &CommandContext) -> Result<OpenedSession> {
    let persistence = ctx.persistence_session()?;
    Ok(OpenedSession::new(EntityManager::new(persistence, self.id_generator.clone())))
  }
}
