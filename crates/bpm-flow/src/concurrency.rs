// Archivo: concurrency.rs
// Propósito: `createConcurrentExecution`. Dada una ejecución E que va a
// empezar la actividad A en paralelo a lo que ya corre, decide bajo qué
// nodo colgar la nueva ejecución concurrente (reestructurando el árbol si
// hace falta) y la crea.
//
// La decisión es un procedimiento explícito sobre tres formas de árbol
// (hoja, un hijo, varios hijos) y cinco acciones de injerto. La alineación
// de scopes se decide comparando `ScopeRef` del grafo de la definición,
// nunca identificadores de actividad.
use crate::context::CommandContext;
use crate::errors::{EngineError, Result};
use crate::operation::AtomicOperation;
use crate::tree::ExecutionTree;
use bpm_domain::{ActivityHandle, ProcessDefinitionGraph, ScopeRef};
use log::debug;
use std::cell::RefCell;

/// Forma de E en el árbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeShape {
  /// Sin hijos.
  Leaf,
  /// Un único hijo y E es un nodo estructural (sin actividad, inactivo).
  SingleChild,
  /// Cualquier otro caso con hijos: E ya es raíz de una concurrencia.
  MultiChild,
}

/// Dónde se injerta la nueva ejecución y qué se marca antes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraftAction {
  /// E se divide: un reemplazo hereda su actividad y E queda como nodo
  /// estructural; la nueva ejecución cuelga de E.
  SplitAndGraftUnderSelf,
  /// El único hijo de E pasa a ser concurrente; la nueva cuelga de E.
  MarkChildAndGraftUnderSelf,
  /// La nueva cuelga directamente de E.
  GraftUnderSelf,
  /// E pasa a ser concurrente; la nueva cuelga del padre de E.
  MarkSelfAndGraftUnderParent,
  /// El padre de E ya es concurrente; la nueva cuelga del abuelo.
  GraftUnderGrandparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyDecision {
  pub shape: TreeShape,
  pub action: GraftAction,
}

fn shape_of(tree: &ExecutionTree, execution_id: &str) -> Result<TreeShape> {
  let e = tree.execution(execution_id)?;
  Ok(match tree.children(execution_id).len() {
       0 => TreeShape::Leaf,
       1 if e.activity_id.is_none() && !e.is_active => TreeShape::SingleChild,
       _ => TreeShape::MultiChild,
     })
}

/// Subida de uno o dos niveles hacia la raíz de concurrencia. `fallback`
/// se usa cuando E no tiene padre.
fn climb(tree: &ExecutionTree, execution_id: &str, fallback: GraftAction) -> Result<GraftAction> {
  let Some(parent) = tree.parent(execution_id)? else {
    return Ok(fallback);
  };
  if !parent.is_concurrent {
    return Ok(GraftAction::MarkSelfAndGraftUnderParent);
  }
  Ok(match parent.parent_id {
       Some(_) => GraftAction::GraftUnderGrandparent,
       None => GraftAction::MarkSelfAndGraftUnderParent,
     })
}

/// Decide la forma y la acción sin modificar el árbol.
pub fn decide(tree: &ExecutionTree,
              graph: &ProcessDefinitionGraph,
              execution_id: &str,
              activity: ActivityHandle)
              -> Result<ConcurrencyDecision> {
  let e = tree.execution(execution_id)?;
  let concurrency_scope = graph.concurrency_scope(activity)?;
  let parent_scope = graph.parent_scope(activity)?;
  let shape = shape_of(tree, execution_id)?;

  let action = match shape {
    TreeShape::Leaf => {
      let current = match &e.activity_id {
        Some(id) => Some(graph.require(id)?),
        None => None,
      };
      let splits = match current {
        Some(h) => {
          e.is_scope && !graph.activity(h)?.is_scope() && graph.parent_scope(h)? == concurrency_scope
        }
        None => false,
      };
      if splits {
        GraftAction::SplitAndGraftUnderSelf
      } else {
        climb(tree, execution_id, GraftAction::SplitAndGraftUnderSelf)?
      }
    }
    TreeShape::SingleChild => {
      if parent_scope == concurrency_scope {
        GraftAction::MarkChildAndGraftUnderSelf
      } else {
        climb(tree, execution_id, GraftAction::MarkChildAndGraftUnderSelf)?
      }
    }
    TreeShape::MultiChild => {
      let host_is_scope_activity = match parent_scope {
        ScopeRef::Activity(h) => graph.activity(h)?.is_scope(),
        ScopeRef::Process => false,
      };
      let busy = e.activity_id.is_some() || e.is_active;
      if parent_scope != concurrency_scope && host_is_scope_activity && busy {
        climb(tree, execution_id, GraftAction::GraftUnderSelf)?
      } else {
        GraftAction::GraftUnderSelf
      }
    }
  };
  Ok(ConcurrencyDecision { shape, action })
}

fn graft(tree: &mut ExecutionTree, parent_id: &str, activity_id: &str) -> Result<String> {
  let id = tree.create_child(parent_id)?;
  tree.update(&id, |n| {
        n.activity_id = Some(activity_id.to_string());
        n.is_scope = false;
        n.is_active = true;
        n.is_concurrent = true;
      })?;
  Ok(id)
}

/// Aplica una decisión ya tomada. Devuelve el id de la nueva ejecución.
pub fn apply(tree: &mut ExecutionTree,
             decision: ConcurrencyDecision,
             execution_id: &str,
             activity_id: &str)
             -> Result<String> {
  match decision.action {
    GraftAction::SplitAndGraftUnderSelf => {
      let e = tree.execution(execution_id)?.clone();
      let replacement = tree.create_child(execution_id)?;
      tree.update(&replacement, |r| {
            r.activity_id = e.activity_id.clone();
            r.activity_instance_id = e.activity_instance_id.clone();
            r.is_active = e.is_active;
            r.is_scope = false;
            r.is_concurrent = true;
          })?;
      tree.update(execution_id, |e| {
            e.activity_id = None;
            e.is_active = false;
          })?;
      graft(tree, execution_id, activity_id)
    }
    GraftAction::MarkChildAndGraftUnderSelf => {
      let child = tree.children(execution_id)
                      .first()
                      .cloned()
                      .ok_or_else(|| EngineError::Other(format!("'{}' no tiene hijos que marcar", execution_id)))?;
      tree.update(&child, |c| c.is_concurrent = true)?;
      graft(tree, execution_id, activity_id)
    }
    GraftAction::GraftUnderSelf => graft(tree, execution_id, activity_id),
    GraftAction::MarkSelfAndGraftUnderParent => {
      let parent = tree.parent(execution_id)?.map(|p| p.id.clone());
      tree.update(execution_id, |e| e.is_concurrent = true)?;
      match parent {
        Some(p) => graft(tree, &p, activity_id),
        None => graft(tree, execution_id, activity_id),
      }
    }
    GraftAction::GraftUnderGrandparent => {
      let grandparent = tree.parent(execution_id)?
                            .and_then(|p| p.parent_id.clone())
                            .unwrap_or_else(|| execution_id.to_string());
      graft(tree, &grandparent, activity_id)
    }
  }
}

/// Crea la ejecución concurrente para `activity` a partir de E.
pub fn create_concurrent_execution(tree: &mut ExecutionTree,
                                   graph: &ProcessDefinitionGraph,
                                   execution_id: &str,
                                   activity: ActivityHandle)
                                   -> Result<String> {
  let decision = decide(tree, graph, execution_id, activity)?;
  let activity_id = graph.activity(activity)?.id().to_string();
  debug!("createConcurrentExecution '{}' -> {}: {:?}", execution_id, activity_id, decision);
  apply(tree, decision, execution_id, &activity_id)
}

type CreatedHook<'a> = Box<dyn Fn(&CommandContext, &mut ExecutionTree, &str) -> Result<()> + 'a>;

/// Operación atómica que crea una ejecución concurrente para una actividad
/// y, opcionalmente, continúa con ella mediante un hook.
pub struct CreateConcurrentExecution<'a> {
  graph: &'a ProcessDefinitionGraph,
  activity_id: String,
  created: RefCell<Option<String>>,
  on_created: Option<CreatedHook<'a>>,
}

impl<'a> CreateConcurrentExecution<'a> {
  pub fn new(graph: &'a ProcessDefinitionGraph, activity_id: impl Into<String>) -> Self {
    Self { graph,
           activity_id: activity_id.into(),
           created: RefCell::new(None),
           on_created: None }
  }

  pub fn on_created(mut self, hook: impl Fn(&CommandContext, &mut ExecutionTree, &str) -> Result<()> + 'a) -> Self {
    self.on_created = Some(Box::new(hook));
    self
  }

  /// Id de la ejecución creada por la última ejecución de la operación.
  pub fn created_execution(&self) -> Option<String> {
    self.created.borrow().clone()
  }
}

impl AtomicOperation for CreateConcurrentExecution<'_> {
  fn canonical_name(&self) -> &'static str {
    "create-concurrent-execution"
  }

  fn execute(&self, ctx: &CommandContext, tree: &mut ExecutionTree, execution_id: &str) -> Result<()> {
    let activity = self.graph.require(&self.activity_id)?;
    let created = create_concurrent_execution(tree, self.graph, execution_id, activity)?;
    *self.created.borrow_mut() = Some(created.clone());
    match &self.on_created {
      Some(hook) => hook(ctx, tree, &created),
      None => Ok(()),
    }
  }
}
