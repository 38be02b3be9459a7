// Archivo: definition.rs
// Propósito: grafo de una definición de proceso ya resuelta (actividades y
// scopes) tal como lo necesita el motor del árbol de ejecuciones.
//
// Las actividades viven en una arena; `ScopeRef` es un handle a la raíz
// del proceso o a una actividad. Dos scopes son "el mismo" sólo si sus
// handles coinciden, nunca por comparar identificadores textuales.
use crate::errors::DomainError;
use std::collections::HashMap;

/// Handle opaco a una actividad dentro de un `ProcessDefinitionGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityHandle(usize);

/// Referencia a un scope del grafo: la definición de proceso o una
/// actividad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeRef {
  Process,
  Activity(ActivityHandle),
}

#[derive(Debug, Clone)]
pub struct ActivityDefinition {
  id: String,
  is_scope: bool,
  /// Padre estructural (para un evento de borde, la actividad anfitriona).
  parent: ScopeRef,
  /// Scope de flujo que contiene la actividad: el scope de concurrencia.
  flow_scope: ScopeRef,
}

impl ActivityDefinition {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn is_scope(&self) -> bool {
    self.is_scope
  }

  pub fn parent(&self) -> ScopeRef {
    self.parent
  }

  pub fn flow_scope(&self) -> ScopeRef {
    self.flow_scope
  }
}

/// Grafo de actividades de una definición de proceso.
#[derive(Debug, Clone)]
pub struct ProcessDefinitionGraph {
  key: String,
  activities: Vec<ActivityDefinition>,
  index: HashMap<String, ActivityHandle>,
}

impl ProcessDefinitionGraph {
  pub fn new(key: impl Into<String>) -> Self {
    Self { key: key.into(),
           activities: Vec::new(),
           index: HashMap::new() }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Añade una actividad contenida en `parent`. El padre debe ser un scope
  /// (la raíz del proceso o una actividad scope como un subproceso).
  pub fn add_activity(&mut self, parent: ScopeRef, id: &str, is_scope: bool) -> Result<ActivityHandle, DomainError> {
    if !self.is_scope(parent)? {
      return Err(DomainError::ValidationError(format!("la actividad '{}' no puede anidarse en un padre que no es scope",
                                                      id)));
    }
    self.push(ActivityDefinition { id: id.to_string(),
                                   is_scope,
                                   parent,
                                   flow_scope: parent })
  }

  /// Adjunta un evento de borde a `host`. Su padre estructural es la
  /// anfitriona, pero su scope de concurrencia es el scope de flujo que
  /// contiene a la anfitriona.
  pub fn attach_boundary_event(&mut self, host: ActivityHandle, id: &str) -> Result<ActivityHandle, DomainError> {
    let host_def = self.activity(host)?;
    if !host_def.is_scope {
      return Err(DomainError::ValidationError(format!("la actividad '{}' debe ser scope para admitir eventos de borde",
                                                      host_def.id)));
    }
    let flow_scope = host_def.flow_scope;
    self.push(ActivityDefinition { id: id.to_string(),
                                   is_scope: false,
                                   parent: ScopeRef::Activity(host),
                                   flow_scope })
  }

  fn push(&mut self, def: ActivityDefinition) -> Result<ActivityHandle, DomainError> {
    if self.index.contains_key(&def.id) {
      return Err(DomainError::ValidationError(format!("actividad duplicada: {}", def.id)));
    }
    let handle = ActivityHandle(self.activities.len());
    self.index.insert(def.id.clone(), handle);
    self.activities.push(def);
    Ok(handle)
  }

  pub fn activity(&self, handle: ActivityHandle) -> Result<&ActivityDefinition, DomainError> {
    self.activities
        .get(handle.0)
        .ok_or_else(|| DomainError::UnknownActivity(format!("handle {} en '{}'", handle.0, self.key)))
  }

  pub fn find(&self, activity_id: &str) -> Option<ActivityHandle> {
    self.index.get(activity_id).copied()
  }

  /// Busca una actividad por id y falla si no existe.
  pub fn require(&self, activity_id: &str) -> Result<ActivityHandle, DomainError> {
    self.find(activity_id)
        .ok_or_else(|| DomainError::UnknownActivity(format!("'{}' en '{}'", activity_id, self.key)))
  }

  pub fn is_scope(&self, scope: ScopeRef) -> Result<bool, DomainError> {
    match scope {
      ScopeRef::Process => Ok(true),
      ScopeRef::Activity(h) => Ok(self.activity(h)?.is_scope),
    }
  }

  /// Scope de concurrencia de una actividad (el scope de flujo que la
  /// contiene).
  pub fn concurrency_scope(&self, handle: ActivityHandle) -> Result<ScopeRef, DomainError> {
    Ok(self.activity(handle)?.flow_scope)
  }

  /// Padre estructural de una actividad.
  pub fn parent_scope(&self, handle: ActivityHandle) -> Result<ScopeRef, DomainError> {
    Ok(self.activity(handle)?.parent)
  }

  pub fn activities(&self) -> impl Iterator<Item = (ActivityHandle, &ActivityDefinition)> {
    self.activities.iter().enumerate().map(|(i, a)| (ActivityHandle(i), a))
  }
}
