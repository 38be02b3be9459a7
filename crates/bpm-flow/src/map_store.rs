// Archivo: map_store.rs
// Propósito: backend de mapas distribuidos. Cada tipo de entidad vive en un
// mapa con nombre (clave = identificador, valor = registro portable). Las
// escrituras de una unidad de trabajo se acumulan en un contexto
// transaccional y se aplican todas juntas al confirmar, bloqueando los
// mapas tocados en orden de nombre.
//
// Las búsquedas por criterios se traducen a predicados textuales
// (`predicate.rs`) y se resuelven con índices secundarios cuando existen.
use crate::codec::{FieldKey, PortableCodec, PortableRecord};
use crate::context::Session;
use crate::errors::{EngineError, Result};
use crate::mapping::EntityMapping;
use crate::predicate::{and_predicate, SqlPredicate};
use crate::query::{QueryParameter, Row};
use crate::session::{next_revision, optimistic_locking, PersistenceProvider, PersistenceSession,
                     PersistenceSessionFactory};
use crate::statements::{run_select, Lookup, StatementRegistry};
use bpm_domain::{Entity, EntityKind, PropertyEntity};
use dashmap::DashMap;
use indexmap::IndexMap;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Helper para bloquear un mapa devolviendo `Storage` si el mutex quedó
/// envenenado.
fn lock(map: &Mutex<NamedMap>) -> Result<MutexGuard<'_, NamedMap>> {
  map.lock().map_err(|e| EngineError::Storage(format!("mutex poisoned: {:?}", e)))
}

/// Mapa con nombre con índices secundarios opcionales.
#[derive(Debug, Default)]
pub struct NamedMap {
  entries: IndexMap<String, PortableRecord>,
  indexes: HashMap<String, HashMap<FieldKey, BTreeSet<String>>>,
}

impl NamedMap {
  pub fn get(&self, key: &str) -> Option<&PortableRecord> {
    self.entries.get(key)
  }

  /// Inserta o reemplaza. Devuelve el valor anterior.
  pub fn put(&mut self, key: &str, record: PortableRecord) -> Option<PortableRecord> {
    if let Some(old) = self.entries.get(key).cloned() {
      self.unindex(key, &old);
    }
    for (field, index) in self.indexes.iter_mut() {
      index.entry(record.key_of(field)).or_default().insert(key.to_string());
    }
    self.entries.insert(key.to_string(), record)
  }

  pub fn remove(&mut self, key: &str) -> Option<PortableRecord> {
    let removed = self.entries.shift_remove(key);
    if let Some(old) = &removed {
      self.unindex(key, old);
    }
    removed
  }

  fn unindex(&mut self, key: &str, old: &PortableRecord) {
    for (field, index) in self.indexes.iter_mut() {
      let old_key = old.key_of(field);
      if let Some(keys) = index.get_mut(&old_key) {
        keys.remove(key);
        if keys.is_empty() {
          index.remove(&old_key);
        }
      }
    }
  }

  /// Crea (o reconstruye) un índice secundario sobre `field`.
  pub fn add_index(&mut self, field: &str) {
    let mut index: HashMap<FieldKey, BTreeSet<String>> = HashMap::new();
    for (key, record) in &self.entries {
      index.entry(record.key_of(field)).or_default().insert(key.clone());
    }
    self.indexes.insert(field.to_string(), index);
  }

  pub fn has_index(&self, field: &str) -> bool {
    self.indexes.contains_key(field)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Pares clave/valor que cumplen el predicado, en orden de inserción.
  pub fn values(&self, predicate: Option<&SqlPredicate>) -> Vec<(String, PortableRecord)> {
    let Some(predicate) = predicate else {
      return self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    };
    let indexed = predicate.conditions()
                           .iter()
                           .find_map(|(field, value)| self.indexes.get(field).map(|idx| (idx, value)));
    match indexed {
      Some((index, value)) => {
        let mut positions: Vec<usize> = index.get(&FieldKey::from_param(value))
                                             .map(|keys| keys.iter().filter_map(|k| self.entries.get_index_of(k)).collect())
                                             .unwrap_or_default();
        positions.sort_unstable();
        positions.into_iter()
                 .filter_map(|i| self.entries.get_index(i))
                 .filter(|(_, v)| predicate.matches(v))
                 .map(|(k, v)| (k.clone(), v.clone()))
                 .collect()
      }
      None => self.entries
                  .iter()
                  .filter(|(_, v)| predicate.matches(v))
                  .map(|(k, v)| (k.clone(), v.clone()))
                  .collect(),
    }
  }
}

/// Grid en proceso de mapas con nombre, compartido por todas las unidades
/// de trabajo.
#[derive(Debug, Default)]
pub struct MapGrid {
  maps: DashMap<String, Arc<Mutex<NamedMap>>>,
}

impl MapGrid {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mapa con ese nombre, creándolo vacío si no existe.
  pub fn map(&self, name: &str) -> Arc<Mutex<NamedMap>> {
    self.maps.entry(name.to_string()).or_default().value().clone()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.maps.contains_key(name)
  }

  pub fn destroy(&self, name: &str) {
    self.maps.remove(name);
  }

  pub fn add_index(&self, map: &str, field: &str) -> Result<()> {
    let m = self.map(map);
    lock(&m)?.add_index(field);
    Ok(())
  }

  /// Entradas por mapa, ordenadas por nombre.
  pub fn map_counts(&self) -> Result<BTreeMap<String, usize>> {
    let maps: Vec<(String, Arc<Mutex<NamedMap>>)> =
      self.maps.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
    let mut counts = BTreeMap::new();
    for (name, map) in maps {
      counts.insert(name, lock(&map)?.len());
    }
    Ok(counts)
  }

  pub fn new_transaction_context(self: &Arc<Self>) -> TransactionContext {
    TransactionContext::new(self.clone())
  }
}

#[derive(Debug, Clone)]
struct PendingWrite {
  value: Option<PortableRecord>,
  /// Revisión confirmada que se leyó al tocar la clave por primera vez.
  /// `None` = escritura sin comprobación (inserciones, borrados masivos).
  expected_revision: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
  Active,
  Committed,
  RolledBack,
}

/// Escrituras pendientes de una unidad de trabajo sobre varios mapas.
/// Se aplican todas o ninguna.
#[derive(Debug)]
pub struct TransactionContext {
  grid: Arc<MapGrid>,
  pending: BTreeMap<String, IndexMap<String, PendingWrite>>,
  state: TransactionState,
}

impl TransactionContext {
  pub fn new(grid: Arc<MapGrid>) -> Self {
    Self { grid,
           pending: BTreeMap::new(),
           state: TransactionState::Active }
  }

  pub fn state(&self) -> TransactionState {
    self.state
  }

  fn ensure_active(&self) -> Result<()> {
    match self.state {
      TransactionState::Active => Ok(()),
      other => Err(EngineError::Storage(format!("la transacción ya terminó ({:?})", other))),
    }
  }

  fn committed(&self, map: &str, key: &str) -> Result<Option<PortableRecord>> {
    let m = self.grid.map(map);
    let guard = lock(&m)?;
    Ok(guard.get(key).cloned())
  }

  /// Valor visible para esta transacción (pendiente o confirmado).
  pub fn get(&self, map: &str, key: &str) -> Result<Option<PortableRecord>> {
    if let Some(w) = self.pending.get(map).and_then(|m| m.get(key)) {
      return Ok(w.value.clone());
    }
    self.committed(map, key)
  }

  fn record(&mut self, map: &str, key: &str, value: Option<PortableRecord>, checked: bool) -> Result<()> {
    self.ensure_active()?;
    let first_touch = !self.pending.get(map).is_some_and(|m| m.contains_key(key));
    let expected_revision = if checked && first_touch {
      self.committed(map, key)?.and_then(|r| r.revision())
    } else {
      None
    };
    let writes = self.pending.entry(map.to_string()).or_default();
    match writes.get_mut(key) {
      Some(existing) => existing.value = value,
      None => {
        writes.insert(key.to_string(), PendingWrite { value, expected_revision });
      }
    }
    Ok(())
  }

  pub fn put(&mut self, map: &str, key: &str, value: PortableRecord) -> Result<()> {
    self.record(map, key, Some(value), false)
  }

  /// Escritura que al confirmar exige que la revisión confirmada no haya
  /// cambiado desde que esta transacción tocó la clave.
  pub fn put_checked(&mut self, map: &str, key: &str, value: PortableRecord) -> Result<()> {
    self.record(map, key, Some(value), true)
  }

  pub fn remove(&mut self, map: &str, key: &str) -> Result<()> {
    self.record(map, key, None, false)
  }

  pub fn remove_checked(&mut self, map: &str, key: &str) -> Result<()> {
    self.record(map, key, None, true)
  }

  /// Valores confirmados que cumplen el predicado, con las escrituras
  /// pendientes superpuestas.
  pub fn values(&self, map: &str, predicate: Option<&SqlPredicate>) -> Result<Vec<(String, PortableRecord)>> {
    let m = self.grid.map(map);
    let committed = lock(&m)?.values(predicate);
    let mut view: IndexMap<String, PortableRecord> = committed.into_iter().collect();
    if let Some(writes) = self.pending.get(map) {
      for (key, w) in writes {
        match &w.value {
          Some(v) if predicate.map_or(true, |p| p.matches(v)) => {
            view.insert(key.clone(), v.clone());
          }
          _ => {
            view.shift_remove(key);
          }
        }
      }
    }
    Ok(view.into_iter().collect())
  }

  pub fn commit(&mut self) -> Result<()> {
    self.ensure_active()?;
    let maps: Vec<(String, Arc<Mutex<NamedMap>>)> =
      self.pending.keys().map(|name| (name.clone(), self.grid.map(name))).collect();
    let mut guards = Vec::with_capacity(maps.len());
    for (_, m) in &maps {
      guards.push(lock(m)?);
    }

    let conflict = self.pending.iter().zip(guards.iter()).find_map(|((name, writes), guard)| {
      writes.iter().find_map(|(key, w)| {
        let expected = w.expected_revision?;
        let found = guard.get(key).and_then(|r| r.revision());
        (found != Some(expected)).then(|| {
          EngineError::OptimisticLocking(format!("'{}' en {} cambió a {:?} (se esperaba {}) antes de confirmar",
                                                 key, name, found, expected))
        })
      })
    });
    if let Some(err) = conflict {
      drop(guards);
      self.pending.clear();
      self.state = TransactionState::RolledBack;
      return Err(err);
    }

    let mut written = 0usize;
    for (writes, guard) in self.pending.values().zip(guards.iter_mut()) {
      for (key, w) in writes {
        match &w.value {
          Some(v) => {
            guard.put(key, v.clone());
          }
          None => {
            guard.remove(key);
          }
        }
        written += 1;
      }
    }
    drop(guards);
    debug!("transacción de mapas confirmada: {} escrituras en {} mapas", written, maps.len());
    self.pending.clear();
    self.state = TransactionState::Committed;
    Ok(())
  }

  pub fn rollback(&mut self) -> Result<()> {
    if self.state == TransactionState::Active {
      debug!("transacción de mapas revertida: {} mapas descartados", self.pending.len());
      self.pending.clear();
      self.state = TransactionState::RolledBack;
    }
    Ok(())
  }
}

/// Sesión de persistencia sobre el grid de mapas.
pub struct MapSession {
  tx: TransactionContext,
  mapping: Arc<EntityMapping>,
  codec: Arc<PortableCodec>,
  statements: Arc<StatementRegistry>,
}

impl MapSession {
  pub fn new(grid: Arc<MapGrid>,
             mapping: Arc<EntityMapping>,
             codec: Arc<PortableCodec>,
             statements: Arc<StatementRegistry>)
             -> Self {
    Self { tx: grid.new_transaction_context(),
           mapping,
           codec,
           statements }
  }

  fn visible(&self, kind: EntityKind, id: &str) -> Result<Option<PortableRecord>> {
    let map = self.mapping.location(kind)?;
    Ok(self.tx.get(map, id)?.filter(|r| r.class_id() == kind))
  }

  fn fetch(&self, kind: EntityKind, lookup: &Lookup) -> Result<Vec<Entity>> {
    let records = self.matching(kind, lookup)?;
    records.iter().map(|(_, r)| self.codec.decode(r)).collect()
  }

  fn matching(&self, kind: EntityKind, lookup: &Lookup) -> Result<Vec<(String, PortableRecord)>> {
    match lookup {
      Lookup::ById(id) => Ok(self.visible(kind, id)?.map(|r| (id.clone(), r)).into_iter().collect()),
      Lookup::Matching(criteria) => {
        let map = self.mapping.location(kind)?;
        let predicate = and_predicate(criteria.conditions())?;
        trace!("consulta sobre {}: {}",
               map,
               predicate.as_ref().map(|p| p.text()).unwrap_or("(todo)"));
        Ok(self.tx
               .values(map, predicate.as_ref())?
               .into_iter()
               .filter(|(_, r)| r.class_id() == kind)
               .collect())
      }
    }
  }

  fn encode_with_revision(&self, entity: &Entity, revision: Option<i32>) -> Result<PortableRecord> {
    match revision {
      Some(r) => {
        let mut copy = entity.clone();
        copy.set_revision(r);
        self.codec.encode(&copy)
      }
      None => self.codec.encode(entity),
    }
  }
}

impl Session for MapSession {
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }

  fn close(&mut self) -> Result<()> {
    if self.tx.state() == TransactionState::Active {
      warn!("sesión de mapas cerrada con la transacción abierta; se descarta");
      self.tx.rollback()?;
    }
    Ok(())
  }

  fn commit(&mut self) -> Result<()> {
    self.tx.commit()
  }

  fn rollback(&mut self) -> Result<()> {
    self.tx.rollback()
  }
}

impl PersistenceSession for MapSession {
  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
    self.visible(kind, id)?.map(|r| self.codec.decode(&r)).transpose()
  }

  fn select_list(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<Row>> {
    let statements = self.statements.clone();
    let handler = statements.select_list(statement)?;
    run_select(handler, parameter, |kind, lookup| self.fetch(kind, lookup))
  }

  fn select_one(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Option<Row>> {
    let statements = self.statements.clone();
    let handler = statements.select_one(statement)?;
    Ok(run_select(handler, parameter, |kind, lookup| self.fetch(kind, lookup))?.into_iter().next())
  }

  fn insert(&mut self, entity: &Entity) -> Result<Option<i32>> {
    let revision = entity.kind().has_revision().then_some(1);
    let record = self.encode_with_revision(entity, revision)?;
    let map = self.mapping.location(entity.kind())?;
    self.tx.put(map, entity.id(), record)?;
    Ok(revision)
  }

  fn update(&mut self, entity: &Entity) -> Result<Option<i32>> {
    let kind = entity.kind();
    let map = self.mapping.location(kind)?.to_string();
    let current = self.visible(kind, entity.id())?;
    let Some(current) = current else {
      return Err(optimistic_locking("update", entity, None));
    };
    if !kind.has_revision() {
      let record = self.codec.encode(entity)?;
      self.tx.put(&map, entity.id(), record)?;
      return Ok(None);
    }
    if current.revision() != entity.revision() {
      return Err(optimistic_locking("update", entity, current.revision()));
    }
    let revision = next_revision(entity);
    let record = self.encode_with_revision(entity, revision)?;
    self.tx.put_checked(&map, entity.id(), record)?;
    Ok(revision)
  }

  fn delete(&mut self, entity: &Entity) -> Result<()> {
    let kind = entity.kind();
    let map = self.mapping.location(kind)?.to_string();
    if kind.has_revision() {
      let current = self.visible(kind, entity.id())?;
      let found = current.as_ref().and_then(|r| r.revision());
      if current.is_none() || found != entity.revision() {
        return Err(optimistic_locking("delete", entity, found));
      }
      self.tx.remove_checked(&map, entity.id())
    } else {
      self.tx.remove(&map, entity.id())
    }
  }

  fn delete_bulk(&mut self, statement: &str, parameter: &QueryParameter) -> Result<usize> {
    let statements = self.statements.clone();
    let handler = statements.delete(statement)?;
    let kind = handler.entity_kind();
    let lookup = handler.lookup(parameter)?;
    let map = self.mapping.location(kind)?.to_string();
    let keys: Vec<String> = self.matching(kind, &lookup)?.into_iter().map(|(k, _)| k).collect();
    for key in &keys {
      self.tx.remove(&map, key)?;
    }
    debug!("{}: {} entradas eliminadas de {}", statement, keys.len(), map);
    Ok(keys.len())
  }

  fn db_schema_create(&mut self) -> Result<()> {
    let grid = self.tx.grid.clone();
    for name in self.mapping.locations() {
      grid.map(name);
    }
    let executions = self.mapping.location(EntityKind::Execution)?;
    for field in ["parentId", "processInstanceId", "processDefinitionId"] {
      grid.add_index(executions, field)?;
    }
    let version = PropertyEntity { name: "schema.version".into(),
                                   revision: 1,
                                   value: Some(SCHEMA_VERSION.into()) };
    let record = self.codec.encode(&Entity::Property(version))?;
    let map = self.mapping.location(EntityKind::Property)?;
    let m = grid.map(map);
    lock(&m)?.put("schema.version", record);
    Ok(())
  }

  fn db_schema_drop(&mut self) -> Result<()> {
    for name in self.mapping.locations() {
      self.tx.grid.destroy(name);
    }
    Ok(())
  }

  fn db_schema_check_version(&mut self) -> Result<Option<String>> {
    let found = self.select_by_id(EntityKind::Property, "schema.version")?;
    Ok(match found {
         Some(Entity::Property(p)) => p.value,
         _ => None,
       })
  }

  fn is_engine_table_present(&mut self) -> Result<bool> {
    let executions = self.mapping.location(EntityKind::Execution)?;
    Ok(self.tx.grid.contains(executions))
  }

  fn backend_name(&self) -> &'static str {
    "distributed-map"
  }
}

/// Fábrica de sesiones del backend de mapas.
pub struct MapSessionFactory {
  grid: Arc<MapGrid>,
  mapping: Arc<EntityMapping>,
  codec: Arc<PortableCodec>,
  statements: Arc<StatementRegistry>,
}

impl MapSessionFactory {
  pub fn new(grid: Arc<MapGrid>,
             mapping: Arc<EntityMapping>,
             codec: Arc<PortableCodec>,
             statements: Arc<StatementRegistry>)
             -> Self {
    Self { grid,
           mapping,
           codec,
           statements }
  }

  /// Fábrica con el mapeo, el codec y las sentencias del motor.
  pub fn with_defaults(grid: Arc<MapGrid>) -> Result<Self> {
    Ok(Self::new(grid,
                 Arc::new(EntityMapping::distributed_map_defaults()?),
                 Arc::new(PortableCodec::engine_defaults()?),
                 Arc::new(StatementRegistry::engine_defaults())))
  }

  pub fn grid(&self) -> &Arc<MapGrid> {
    &self.grid
  }

  pub fn open_map_session(&self) -> MapSession {
    MapSession::new(self.grid.clone(),
                    self.mapping.clone(),
                    self.codec.clone(),
                    self.statements.clone())
  }
}

impl PersistenceSessionFactory for MapSessionFactory {
  fn open_persistence_session(&self) -> Result<PersistenceProvider> {
    Ok(Box::new(self.open_map_session()))
  }

  fn backend_name(&self) -> &'static str {
    "distributed-map"
  }
}
