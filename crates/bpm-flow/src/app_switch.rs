// Archivo: app_switch.rs
// Propósito: capacidad explícita de "ejecutar dentro de otra aplicación de
// procesos". El contexto de comando la recibe como parámetro en
// `perform_operation`; no hay búsqueda ambiental del contexto actual.
use crate::errors::Result;
use bpm_domain::ExecutionEntity;
use dashmap::DashMap;
use log::debug;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Referencia a una aplicación de procesos desplegada.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessApplicationRef {
  name: String,
}

impl ProcessApplicationRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

pub trait ProcessApplicationSwitch {
  /// Aplicación a la que pertenece la ejecución, si alguna.
  fn target_application(&self, execution: &ExecutionEntity) -> Option<ProcessApplicationRef>;

  /// Indica si `target` es distinta de la aplicación en curso.
  fn requires_context_switch(&self, target: &ProcessApplicationRef) -> bool;

  /// Ejecuta `callback` dentro del contexto de `target` y devuelve su
  /// resultado sin envolverlo.
  fn execute_within(&self, target: &ProcessApplicationRef, callback: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Motor sin aplicaciones de procesos: nunca cambia de contexto.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProcessApplications;

impl ProcessApplicationSwitch for NoProcessApplications {
  fn target_application(&self, _execution: &ExecutionEntity) -> Option<ProcessApplicationRef> {
    None
  }

  fn requires_context_switch(&self, _target: &ProcessApplicationRef) -> bool {
    false
  }

  fn execute_within(&self, _target: &ProcessApplicationRef, callback: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    callback()
  }
}

/// Registro compartido definición de proceso → aplicación que la desplegó.
#[derive(Debug, Default, Clone)]
pub struct ProcessApplicationRegistry {
  by_definition: Arc<DashMap<String, ProcessApplicationRef>>,
}

impl ProcessApplicationRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, process_definition_id: &str, app: ProcessApplicationRef) {
    self.by_definition.insert(process_definition_id.to_string(), app);
  }

  pub fn unregister(&self, process_definition_id: &str) {
    self.by_definition.remove(process_definition_id);
  }

  pub fn application_for(&self, process_definition_id: &str) -> Option<ProcessApplicationRef> {
    self.by_definition.get(process_definition_id).map(|r| r.value().clone())
  }
}

/// Cambio de contexto de una unidad de trabajo: pila de aplicaciones en
/// curso más el registro compartido.
#[derive(Debug)]
pub struct ProcessApplicationContext {
  registry: ProcessApplicationRegistry,
  current: RefCell<Vec<ProcessApplicationRef>>,
  switches: Cell<usize>,
}

impl ProcessApplicationContext {
  pub fn new(registry: ProcessApplicationRegistry) -> Self {
    Self { registry,
           current: RefCell::new(Vec::new()),
           switches: Cell::new(0) }
  }

  pub fn current(&self) -> Option<ProcessApplicationRef> {
    self.current.borrow().last().cloned()
  }

  /// Número de cambios de contexto realizados.
  pub fn switch_count(&self) -> usize {
    self.switches.get()
  }
}

impl ProcessApplicationSwitch for ProcessApplicationContext {
  fn target_application(&self, execution: &ExecutionEntity) -> Option<ProcessApplicationRef> {
    execution.process_definition_id
             .as_deref()
             .and_then(|id| self.registry.application_for(id))
  }

  fn requires_context_switch(&self, target: &ProcessApplicationRef) -> bool {
    self.current.borrow().last() != Some(target)
  }

  fn execute_within(&self, target: &ProcessApplicationRef, callback: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    debug!("entrando en la aplicación '{}'", target.name());
    self.switches.set(self.switches.get() + 1);
    let _frame = Frame::push(&self.current, target.clone());
    callback()
  }
}

struct Frame<'a> {
  stack: &'a RefCell<Vec<ProcessApplicationRef>>,
}

impl<'a> Frame<'a> {
  fn push(stack: &'a RefCell<Vec<ProcessApplicationRef>>, app: ProcessApplicationRef) -> Self {
    stack.borrow_mut().push(app);
    Self { stack }
  }
}

impl Drop for Frame<'_> {
  fn drop(&mut self) {
    self.stack.borrow_mut().pop();
  }
}
