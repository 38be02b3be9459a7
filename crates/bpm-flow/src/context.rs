// Archivo: context.rs
// Propósito: contexto de comando. Acota una unidad de trabajo, abre las
// sesiones de forma perezosa, y al cerrarse dispara listeners, hace flush,
// confirma o revierte la transacción y cierra cada sesión una sola vez.
//
// Fases: Open -> Closing -> Closed. El primer fallo registrado durante el
// cierre es el que se devuelve; los posteriores sólo se registran en el log.
use crate::app_switch::ProcessApplicationSwitch;
use crate::entity_manager::EntityManager;
use crate::errors::{EngineError, LogSeverity, Result};
use crate::operation::AtomicOperation;
use crate::session::PersistenceProvider;
use crate::tree::ExecutionTree;
use log::{debug, error, info, trace, warn};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Sesión abierta dentro de un contexto de comando.
pub trait Session {
  fn flush(&mut self) -> Result<()>;

  fn close(&mut self) -> Result<()>;

  fn commit(&mut self) -> Result<()> {
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    Ok(())
  }
}

/// Sesión recién abierta por una fábrica: un handle tipado (para
/// `get_session`) y la vista como `Session` (para el cierre).
pub struct OpenedSession {
  handle: Rc<dyn Any>,
  session: Rc<RefCell<dyn Session>>,
}

impl OpenedSession {
  pub fn new<S: Session + 'static>(session: S) -> Self {
    let rc = Rc::new(RefCell::new(session));
    Self { handle: rc.clone(),
           session: rc }
  }
}

/// Fábrica de sesiones de un tipo concreto.
pub trait SessionFactory: Send + Sync {
  /// `TypeId` del tipo de sesión que abre.
  fn session_type(&self) -> TypeId;

  fn open_session(&self, ctx: &CommandContext) -> Result<OpenedSession>;
}

/// Registro inmutable de fábricas de sesión por tipo.
#[derive(Default)]
pub struct SessionFactoryRegistry {
  factories: HashMap<TypeId, Arc<dyn SessionFactory>>,
}

impl SessionFactoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, factory: Arc<dyn SessionFactory>) {
    self.factories.insert(factory.session_type(), factory);
  }

  pub fn get(&self, session_type: TypeId) -> Option<Arc<dyn SessionFactory>> {
    self.factories.get(&session_type).cloned()
  }

  pub fn len(&self) -> usize {
    self.factories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.factories.is_empty()
  }
}

/// Listener del cierre del contexto.
pub trait CommandContextListener {
  /// Se llama antes del flush cuando el comando terminó sin fallo.
  fn on_command_context_close(&self, ctx: &CommandContext) -> Result<()>;

  /// Se llama cuando el contexto se cierra con un fallo registrado.
  fn on_command_failed(&self, _ctx: &CommandContext, _failure: &EngineError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
  Committing,
  Committed,
  RollingBack,
  RolledBack,
}

type TransactionListener = Box<dyn Fn(&CommandContext) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
  Open,
  Closing,
  Closed,
}

/// Unidad de trabajo transaccional. No es `Send`: la usa un único
/// llamador.
pub struct CommandContext {
  registry: Arc<SessionFactoryRegistry>,
  phase: Cell<ContextPhase>,
  sessions: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
  /// Orden inverso de apertura: la más reciente primero.
  session_list: RefCell<Vec<Rc<RefCell<dyn Session>>>>,
  close_listeners: RefCell<Vec<Rc<dyn CommandContextListener>>>,
  transaction_listeners: RefCell<HashMap<TransactionState, Vec<TransactionListener>>>,
  execution_stack: RefCell<Vec<String>>,
}

impl fmt::Debug for CommandContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandContext")
     .field("phase", &self.phase.get())
     .field("sessions", &self.session_list.borrow().len())
     .field("execution_stack", &self.execution_stack.borrow())
     .finish()
  }
}

impl CommandContext {
  pub fn new(registry: Arc<SessionFactoryRegistry>) -> Self {
    Self { registry,
           phase: Cell::new(ContextPhase::Open),
           sessions: RefCell::new(HashMap::new()),
           session_list: RefCell::new(Vec::new()),
           close_listeners: RefCell::new(Vec::new()),
           transaction_listeners: RefCell::new(HashMap::new()),
           execution_stack: RefCell::new(Vec::new()) }
  }

  pub fn phase(&self) -> ContextPhase {
    self.phase.get()
  }

  /// Devuelve la sesión de tipo `S`, abriéndola con su fábrica la primera
  /// vez.
  pub fn get_session<S: Session + 'static>(&self) -> Result<Rc<RefCell<S>>> {
    if self.phase.get() == ContextPhase::Closed {
      return Err(EngineError::Other("el contexto de comando ya está cerrado".into()));
    }
    let type_id = TypeId::of::<S>();
    let existing = self.sessions.borrow().get(&type_id).cloned();
    let handle = match existing {
      Some(h) => h,
      None => {
        let factory = self.registry.get(type_id).ok_or_else(|| {
                                                    EngineError::Configuration(format!("no hay fábrica de sesión para {}",
                                                                                       std::any::type_name::<S>()))
                                                  })?;
        let opened = factory.open_session(self)?;
        trace!("sesión abierta: {}", std::any::type_name::<S>());
        self.sessions.borrow_mut().insert(type_id, opened.handle.clone());
        self.session_list.borrow_mut().insert(0, opened.session);
        opened.handle
      }
    };
    handle.downcast::<RefCell<S>>().map_err(|_| {
                                     EngineError::Configuration(format!("la fábrica de {} abrió una sesión de otro tipo",
                                                                        std::any::type_name::<S>()))
                                   })
  }

  pub fn persistence_session(&self) -> Result<Rc<RefCell<PersistenceProvider>>> {
    self.get_session::<PersistenceProvider>()
  }

  pub fn entity_manager(&self) -> Result<Rc<RefCell<EntityManager>>> {
    self.get_session::<EntityManager>()
  }

  /// Registra un listener de cierre. Registrar dos veces el mismo listener
  /// no tiene efecto.
  pub fn register_close_listener(&self, listener: Rc<dyn CommandContextListener>) {
    let mut listeners = self.close_listeners.borrow_mut();
    if !listeners.iter().any(|l| Rc::ptr_eq(l, &listener)) {
      listeners.push(listener);
    }
  }

  pub fn add_transaction_listener(&self,
                                  state: TransactionState,
                                  listener: impl Fn(&CommandContext) -> Result<()> + 'static) {
    self.transaction_listeners
        .borrow_mut()
        .entry(state)
        .or_default()
        .push(Box::new(listener));
  }

  /// Ejecución sobre la que corre la operación atómica en curso.
  pub fn current_execution(&self) -> Option<String> {
    self.execution_stack.borrow().last().cloned()
  }

  /// Ejecuta `op` sobre la ejecución indicada. Si la ejecución pertenece a
  /// otra aplicación de procesos, la misma llamada se reemite dentro de su
  /// contexto a través de `switch`.
  pub fn perform_operation(&self,
                           op: &dyn AtomicOperation,
                           tree: &mut ExecutionTree,
                           execution_id: &str,
                           switch: &dyn ProcessApplicationSwitch)
                           -> Result<()> {
    let target = switch.target_application(tree.execution(execution_id)?);
    if let Some(app) = target.filter(|app| switch.requires_context_switch(app)) {
      debug!("{} sobre '{}' requiere cambiar a la aplicación '{}'",
             op.canonical_name(),
             execution_id,
             app.name());
      return switch.execute_within(&app, &mut || self.perform_operation(op, tree, execution_id, switch));
    }
    let _guard = ExecutionGuard::push(self, execution_id);
    trace!("operación atómica {} sobre '{}'", op.canonical_name(), execution_id);
    op.execute(self, tree, execution_id)
  }

  /// Cierra la unidad de trabajo. `failure` es el fallo del comando, si lo
  /// hubo: en ese caso no se hace flush y la transacción se revierte.
  pub fn close(self, failure: Option<EngineError>) -> Result<()> {
    self.close_internal(failure)
  }

  fn close_internal(&self, failure: Option<EngineError>) -> Result<()> {
    if self.phase.get() != ContextPhase::Open {
      return Err(EngineError::Other("el contexto de comando ya se está cerrando".into()));
    }
    self.phase.set(ContextPhase::Closing);
    let mut failure = failure;

    if failure.is_none() {
      failure = self.fire_close_listeners().err();
    }
    if failure.is_none() {
      failure = self.flush_sessions().err();
    }
    if failure.is_none() {
      failure = self.commit().err();
    }

    if let Some(e) = &failure {
      log_failure(e);
      self.fire_command_failed(e);
      if let Err(rollback_err) = self.rollback() {
        error!("fallo adicional durante el rollback: {}", rollback_err);
      }
    }

    if let Err(close_err) = self.close_sessions() {
      match failure {
        None => failure = Some(close_err),
        Some(_) => error!("fallo adicional al cerrar sesiones: {}", close_err),
      }
    }

    self.phase.set(ContextPhase::Closed);
    match failure {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn fire_close_listeners(&self) -> Result<()> {
    let mut i = 0;
    loop {
      let listener = match self.close_listeners.borrow().get(i) {
        Some(l) => l.clone(),
        None => break,
      };
      listener.on_command_context_close(self)?;
      i += 1;
    }
    Ok(())
  }

  fn fire_command_failed(&self, failure: &EngineError) {
    let listeners: Vec<Rc<dyn CommandContextListener>> = self.close_listeners.borrow().clone();
    for l in listeners {
      l.on_command_failed(self, failure);
    }
  }

  fn fire_transaction(&self, state: TransactionState) -> Result<()> {
    let listeners = self.transaction_listeners.borrow_mut().remove(&state).unwrap_or_default();
    for l in listeners {
      l(self)?;
    }
    Ok(())
  }

  fn sessions_snapshot(&self) -> Vec<Rc<RefCell<dyn Session>>> {
    self.session_list.borrow().clone()
  }

  fn flush_sessions(&self) -> Result<()> {
    for session in self.sessions_snapshot() {
      borrow_session(&session)?.flush()?;
    }
    Ok(())
  }

  fn commit(&self) -> Result<()> {
    self.fire_transaction(TransactionState::Committing)?;
    for session in self.sessions_snapshot() {
      borrow_session(&session)?.commit()?;
    }
    debug!("transacción confirmada ({} sesiones)", self.session_list.borrow().len());
    self.fire_transaction(TransactionState::Committed)
  }

  fn rollback(&self) -> Result<()> {
    let mut first: Option<EngineError> = None;
    if let Err(e) = self.fire_transaction(TransactionState::RollingBack) {
      first.get_or_insert(e);
    }
    for session in self.sessions_snapshot() {
      if let Err(e) = borrow_session(&session).and_then(|mut s| s.rollback()) {
        first.get_or_insert(e);
      }
    }
    debug!("transacción revertida");
    if let Err(e) = self.fire_transaction(TransactionState::RolledBack) {
      first.get_or_insert(e);
    }
    first.map_or(Ok(()), Err)
  }

  fn close_sessions(&self) -> Result<()> {
    let mut first: Option<EngineError> = None;
    for session in self.sessions_snapshot() {
      if let Err(e) = borrow_session(&session).and_then(|mut s| s.close()) {
        first.get_or_insert(e);
      }
    }
    first.map_or(Ok(()), Err)
  }
}

impl Drop for CommandContext {
  fn drop(&mut self) {
    if self.phase.get() == ContextPhase::Open {
      warn!("contexto de comando descartado sin cerrar; se revierte");
      let _ = self.close_internal(Some(EngineError::Other("contexto descartado sin cerrar".into())));
    }
  }
}

fn borrow_session(session: &Rc<RefCell<dyn Session>>) -> Result<std::cell::RefMut<'_, dyn Session + 'static>> {
  session.try_borrow_mut()
         .map_err(|_| EngineError::Other("la sesión está en uso".into()))
}

fn log_failure(e: &EngineError) {
  match e.close_severity() {
    LogSeverity::Info => info!("Error al cerrar el contexto de comando: {}", e),
    LogSeverity::Fine => debug!("Error al cerrar el contexto de comando: {}", e),
    LogSeverity::Severe => error!("Error al cerrar el contexto de comando: {}", e),
  }
}

/// Fija la ejecución en curso mientras vive y la retira al soltarse, haya
/// fallado o no la operación.
struct ExecutionGuard<'a> {
  ctx: &'a CommandContext,
}

impl<'a> ExecutionGuard<'a> {
  fn push(ctx: &'a CommandContext, execution_id: &str) -> Self {
    ctx.execution_stack.borrow_mut().push(execution_id.to_string());
    Self { ctx }
  }
}

impl Drop for ExecutionGuard<'_> {
  fn drop(&mut self) {
    self.ctx.execution_stack.borrow_mut().pop();
  }
}
