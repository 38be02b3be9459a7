use bpm_domain::{DomainError, ProcessDefinitionGraph, ScopeRef};

#[test]
fn activities_nested_in_subprocess_use_it_as_flow_scope() {
  let mut g = ProcessDefinitionGraph::new("order");
  let sub = g.add_activity(ScopeRef::Process, "sub", true).unwrap();
  let inner = g.add_activity(ScopeRef::Activity(sub), "inner", false).unwrap();

  assert_eq!(g.concurrency_scope(inner).unwrap(), ScopeRef::Activity(sub));
  assert_eq!(g.parent_scope(inner).unwrap(), ScopeRef::Activity(sub));
  assert_eq!(g.find("inner"), Some(inner));
  assert!(g.is_scope(ScopeRef::Process).unwrap());
}

#[test]
fn boundary_event_is_concurrent_with_its_host() {
  let mut g = ProcessDefinitionGraph::new("order");
  let sub = g.add_activity(ScopeRef::Process, "sub", true).unwrap();
  let timer = g.attach_boundary_event(sub, "timer").unwrap();

  assert_eq!(g.parent_scope(timer).unwrap(), ScopeRef::Activity(sub));
  assert_eq!(g.concurrency_scope(timer).unwrap(), ScopeRef::Process);
}

#[test]
fn invalid_graphs_are_rejected() {
  let mut g = ProcessDefinitionGraph::new("order");
  let task = g.add_activity(ScopeRef::Process, "task", false).unwrap();
  assert!(matches!(g.add_activity(ScopeRef::Activity(task), "x", false), Err(DomainError::ValidationError(_))));
  assert!(matches!(g.attach_boundary_event(task, "b"), Err(DomainError::ValidationError(_))));
  assert!(matches!(g.add_activity(ScopeRef::Process, "task", false), Err(DomainError::ValidationError(_))));
  assert!(matches!(g.require("missing"), Err(DomainError::UnknownActivity(_))));
}
