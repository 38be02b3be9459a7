use bpm_domain::ExecutionEntity;
use bpm_flow::{AtomicOperation, CommandContext, CommandContextListener, ContextPhase, EngineError, ExecutionTree,
               NoProcessApplications, OpenedSession, ProcessApplicationContext, ProcessApplicationRef,
               ProcessApplicationRegistry, Result, Session, SessionFactory, SessionFactoryRegistry, TransactionState};
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

// A session that records every lifecycle call and can be told to fail one of them.
struct Recording<const ID: u8> {
  log: Log,
  fail_on: Option<&'static str>,
}

impl<const ID: u8> Recording<ID> {
  fn step(&self, name: &'static str) -> Result<()> {
    self.log.lock().unwrap().push(format!("{}:{}", ID, name));
    if self.fail_on == Some(name) {
      return Err(EngineError::Other(format!("sesión {} falló en {}", ID, name)));
    }
    Ok(())
  }
}

impl<const ID: u8> Session for Recording<ID> {
  fn flush(&mut self) -> Result<()> {
    self.step("flush")
  }

  fn close(&mut self) -> Result<()> {
    self.step("close")
  }

  fn commit(&mut self) -> Result<()> {
    self.step("commit")
  }

  fn rollback(&mut self) -> Result<()> {
    self.step("rollback")
  }
}

struct RecordingFactory<const ID: u8> {
  log: Log,
  fail_on: Option<&'static str>,
}

impl<const ID: u8> SessionFactory for RecordingFactory<ID> {
  fn session_type(&self) -> TypeId {
    TypeId::of::<Recording<ID>>()
  }

  fn open_session(&self, _ctx: &CommandContext) -> Result<OpenedSession> {
    Ok(OpenedSession::new(Recording::<ID> { log: self.log.clone(),
                                            fail_on: self.fail_on }))
  }
}

fn context(log: &Log, fail_first: Option<&'static str>, fail_second: Option<&'static str>) -> CommandContext {
  let mut registry = SessionFactoryRegistry::new();
  registry.register(Arc::new(RecordingFactory::<1> { log: log.clone(),
                                                     fail_on: fail_first }));
  registry.register(Arc::new(RecordingFactory::<2> { log: log.clone(),
                                                     fail_on: fail_second }));
  CommandContext::new(Arc::new(registry))
}

fn open_both(ctx: &CommandContext) {
  ctx.get_session::<Recording<1>>().unwrap();
  ctx.get_session::<Recording<2>>().unwrap();
}

fn entries(log: &Log) -> Vec<String> {
  log.lock().unwrap().clone()
}

#[test]
fn success_flushes_commits_and_closes_newest_first() {
  let log = Log::default();
  let ctx = context(&log, None, None);
  open_both(&ctx);
  // asking again must not open a second session
  ctx.get_session::<Recording<1>>().unwrap();
  ctx.close(None).unwrap();
  assert_eq!(entries(&log),
             vec!["2:flush", "1:flush", "2:commit", "1:commit", "2:close", "1:close"]);
}

#[test]
fn flush_failure_rolls_back_and_still_closes_every_session_once() {
  let log = Log::default();
  let ctx = context(&log, None, Some("flush"));
  open_both(&ctx);
  let err = ctx.close(None).unwrap_err();
  assert_eq!(err, EngineError::Other("sesión 2 falló en flush".into()));
  assert_eq!(entries(&log), vec!["2:flush", "2:rollback", "1:rollback", "2:close", "1:close"]);
}

#[test]
fn first_failure_wins_over_later_close_failure() {
  let log = Log::default();
  let ctx = context(&log, Some("commit"), Some("close"));
  open_both(&ctx);
  let err = ctx.close(None).unwrap_err();
  assert_eq!(err, EngineError::Other("sesión 1 falló en commit".into()));
  let log = entries(&log);
  assert_eq!(log.iter().filter(|s| s.ends_with(":close")).count(), 2);
  assert!(log.contains(&"1:rollback".to_string()));
}

#[test]
fn close_failure_alone_is_reported() {
  let log = Log::default();
  let ctx = context(&log, Some("close"), None);
  open_both(&ctx);
  let err = ctx.close(None).unwrap_err();
  assert_eq!(err, EngineError::Other("sesión 1 falló en close".into()));
  assert!(!entries(&log).iter().any(|s| s.ends_with(":rollback")));
}

#[test]
fn command_failure_skips_flush_and_is_returned() {
  let log = Log::default();
  let ctx = context(&log, None, None);
  open_both(&ctx);
  let failure = EngineError::OptimisticLocking("la ejecución e1 cambió".into());
  let err = ctx.close(Some(failure.clone())).unwrap_err();
  assert_eq!(err, failure);
  assert_eq!(entries(&log), vec!["2:rollback", "1:rollback", "2:close", "1:close"]);
}

#[test]
fn missing_factory_is_a_configuration_error() {
  let ctx = CommandContext::new(Arc::new(SessionFactoryRegistry::new()));
  assert!(matches!(ctx.get_session::<Recording<9>>(), Err(EngineError::Configuration(_))));
  assert_eq!(ctx.phase(), ContextPhase::Open);
  ctx.close(None).unwrap();
}

struct CountingListener {
  closes: Cell<usize>,
  failures: RefCell<Vec<String>>,
}

impl CommandContextListener for CountingListener {
  fn on_command_context_close(&self, _ctx: &CommandContext) -> Result<()> {
    self.closes.set(self.closes.get() + 1);
    Ok(())
  }

  fn on_command_failed(&self, _ctx: &CommandContext, failure: &EngineError) {
    self.failures.borrow_mut().push(failure.to_string());
  }
}

#[test]
fn listeners_are_deduplicated_and_transaction_hooks_fire_in_order() {
  let log = Log::default();
  let ctx = context(&log, None, None);
  ctx.get_session::<Recording<1>>().unwrap();
  let listener = Rc::new(CountingListener { closes: Cell::new(0),
                                            failures: RefCell::new(Vec::new()) });
  ctx.register_close_listener(listener.clone());
  ctx.register_close_listener(listener.clone());
  for (state, name) in [(TransactionState::Committing, "committing"), (TransactionState::Committed, "committed")] {
    let log = log.clone();
    ctx.add_transaction_listener(state, move |_| {
         log.lock().unwrap().push(name.to_string());
         Ok(())
       });
  }
  ctx.close(None).unwrap();
  assert_eq!(listener.closes.get(), 1);
  assert!(listener.failures.borrow().is_empty());
  assert_eq!(entries(&log), vec!["1:flush", "committing", "1:commit", "committed", "1:close"]);
}

#[test]
fn failed_command_is_reported_to_listeners() {
  let log = Log::default();
  let ctx = context(&log, None, None);
  let listener = Rc::new(CountingListener { closes: Cell::new(0),
                                            failures: RefCell::new(Vec::new()) });
  ctx.register_close_listener(listener.clone());
  ctx.close(Some(EngineError::NotFound("ejecución 'x'".into()))).unwrap_err();
  assert_eq!(listener.closes.get(), 0);
  assert_eq!(listener.failures.borrow().len(), 1);
}

// Records where it ran and optionally fails.
struct Recorder<'a> {
  switch: &'a ProcessApplicationContext,
  seen: RefCell<Vec<(Option<String>, Option<String>)>>,
  fail: bool,
}

impl AtomicOperation for Recorder<'_> {
  fn canonical_name(&self) -> &'static str {
    "recorder"
  }

  fn execute(&self, ctx: &CommandContext, _tree: &mut ExecutionTree, _execution_id: &str) -> Result<()> {
    self.seen
        .borrow_mut()
        .push((ctx.current_execution(), self.switch.current().map(|a| a.name().to_string())));
    if self.fail {
      return Err(EngineError::Other("la sonda falló".into()));
    }
    Ok(())
  }
}

#[test]
fn operation_runs_inside_the_target_application() {
  let applications = ProcessApplicationRegistry::new();
  applications.register("order:1", ProcessApplicationRef::new("billing"));
  let switch = ProcessApplicationContext::new(applications);
  let root = ExecutionEntity::new_process_instance("order:1", None);
  let root_id = root.id.clone();
  let mut tree = ExecutionTree::new(root);
  let ctx = CommandContext::new(Arc::new(SessionFactoryRegistry::new()));

  let recorder = Recorder { switch: &switch,
                      seen: RefCell::new(Vec::new()),
                      fail: false };
  ctx.perform_operation(&recorder, &mut tree, &root_id, &switch).unwrap();
  assert_eq!(recorder.seen.borrow().as_slice(),
             &[(Some(root_id.clone()), Some("billing".to_string()))]);
  assert_eq!(switch.switch_count(), 1);
  assert!(switch.current().is_none());
  assert!(ctx.current_execution().is_none());
  ctx.close(None).unwrap();
}

#[test]
fn execution_is_cleared_after_a_failed_operation() {
  let switch = ProcessApplicationContext::new(ProcessApplicationRegistry::new());
  let root = ExecutionEntity::new_process_instance("order:1", None);
  let root_id = root.id.clone();
  let mut tree = ExecutionTree::new(root);
  let ctx = CommandContext::new(Arc::new(SessionFactoryRegistry::new()));

  let recorder = Recorder { switch: &switch,
                      seen: RefCell::new(Vec::new()),
                      fail: true };
  assert!(ctx.perform_operation(&recorder, &mut tree, &root_id, &NoProcessApplications).is_err());
  assert_eq!(recorder.seen.borrow()[0].0.as_deref(), Some(root_id.as_str()));
  assert!(ctx.current_execution().is_none());
  assert_eq!(switch.switch_count(), 0);
  ctx.close(None).unwrap();
}
