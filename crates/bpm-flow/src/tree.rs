// Archivo: tree.rs
// Propósito: árbol de ejecuciones de una instancia de proceso en memoria.
//
// Los nodos son filas `ExecutionEntity` enlazadas por `parent_id`. El árbol
// recuerda qué nodos creó y cuáles modificó para que `persist` los envíe al
// gestor de entidades como inserciones o actualizaciones.
use crate::entity_manager::EntityManager;
use crate::errors::{EngineError, Result};
use crate::query::QueryParameter;
use bpm_domain::{new_entity_id, ExecutionEntity};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ExecutionTree {
  root: String,
  nodes: IndexMap<String, ExecutionEntity>,
  children: HashMap<String, Vec<String>>,
  created: IndexSet<String>,
  modified: HashSet<String>,
}

fn invalid(msg: String) -> EngineError {
  EngineError::Other(format!("árbol de ejecuciones inválido: {}", msg))
}

impl ExecutionTree {
  /// Árbol nuevo cuya raíz aún no está persistida.
  pub fn new(root: ExecutionEntity) -> Self {
    let id = root.id.clone();
    let mut created = IndexSet::new();
    created.insert(id.clone());
    let mut nodes = IndexMap::new();
    nodes.insert(id.clone(), root);
    Self { root: id,
           nodes,
           children: HashMap::new(),
           created,
           modified: HashSet::new() }
  }

  /// Reconstruye el árbol a partir de filas ya persistidas.
  pub fn from_executions(executions: Vec<ExecutionEntity>) -> Result<Self> {
    let roots: Vec<&ExecutionEntity> = executions.iter().filter(|e| e.parent_id.is_none()).collect();
    let root = match roots.as_slice() {
      [single] => single.id.clone(),
      [] => return Err(invalid("no hay raíz".into())),
      many => return Err(invalid(format!("{} raíces", many.len()))),
    };
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for e in &executions {
      if let Some(parent) = &e.parent_id {
        children.entry(parent.clone()).or_default().push(e.id.clone());
      }
    }
    let tree = Self { root,
                      nodes: executions.into_iter().map(|e| (e.id.clone(), e)).collect(),
                      children,
                      created: IndexSet::new(),
                      modified: HashSet::new() };
    tree.validate()?;
    Ok(tree)
  }

  /// Carga todas las ejecuciones de una instancia de proceso.
  pub fn load(em: &mut EntityManager, process_instance_id: &str) -> Result<Self> {
    let executions: Vec<ExecutionEntity> =
      em.select_entities("selectExecutionsByProcessInstanceId", &QueryParameter::text(process_instance_id))?;
    if executions.is_empty() {
      return Err(EngineError::NotFound(format!("instancia de proceso '{}'", process_instance_id)));
    }
    Self::from_executions(executions)
  }

  pub fn root(&self) -> &ExecutionEntity {
    &self.nodes[&self.root]
  }

  pub fn root_id(&self) -> &str {
    &self.root
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.nodes.contains_key(id)
  }

  pub fn execution(&self, id: &str) -> Result<&ExecutionEntity> {
    self.nodes
        .get(id)
        .ok_or_else(|| EngineError::NotFound(format!("ejecución '{}'", id)))
  }

  /// Modifica una ejecución y la marca para actualizarla al persistir.
  pub fn update<F>(&mut self, id: &str, f: F) -> Result<()>
    where F: FnOnce(&mut ExecutionEntity)
  {
    let node = self.nodes
                   .get_mut(id)
                   .ok_or_else(|| EngineError::NotFound(format!("ejecución '{}'", id)))?;
    f(node);
    if !self.created.contains(id) {
      self.modified.insert(id.to_string());
    }
    Ok(())
  }

  pub fn parent(&self, id: &str) -> Result<Option<&ExecutionEntity>> {
    match &self.execution(id)?.parent_id {
      Some(p) => self.execution(p).map(Some),
      None => Ok(None),
    }
  }

  pub fn children(&self, id: &str) -> &[String] {
    self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Crea un hijo de `parent_id` que hereda instancia y definición. Por
  /// defecto es scope y está activo.
  pub fn create_child(&mut self, parent_id: &str) -> Result<String> {
    let parent = self.execution(parent_id)?;
    let child = ExecutionEntity { id: new_entity_id(),
                                  process_instance_id: parent.process_instance_id.clone(),
                                  process_definition_id: parent.process_definition_id.clone(),
                                  parent_id: Some(parent_id.to_string()),
                                  is_active: true,
                                  is_scope: true,
                                  ..Default::default() };
    let id = child.id.clone();
    self.children.entry(parent_id.to_string()).or_default().push(id.clone());
    self.created.insert(id.clone());
    self.nodes.insert(id.clone(), child);
    Ok(id)
  }

  /// Ids en post-orden: cada hijo antes que su padre.
  pub fn post_order(&self) -> Vec<String> {
    let mut out = Vec::with_capacity(self.nodes.len());
    let mut stack: Vec<(String, bool)> = vec![(self.root.clone(), false)];
    while let Some((id, expanded)) = stack.pop() {
      if expanded {
        out.push(id);
        continue;
      }
      stack.push((id.clone(), true));
      for child in self.children(&id).iter().rev() {
        stack.push((child.clone(), false));
      }
    }
    out
  }

  pub fn executions(&self) -> impl Iterator<Item = &ExecutionEntity> {
    self.nodes.values()
  }

  /// Comprueba la forma del árbol: una raíz, padres conocidos, sin ciclos,
  /// ningún nodo activo bajo un ancestro activo y ninguna ejecución
  /// concurrente sin hermano concurrente.
  pub fn validate(&self) -> Result<()> {
    let roots = self.nodes.values().filter(|e| e.parent_id.is_none()).count();
    if roots != 1 {
      return Err(invalid(format!("{} raíces", roots)));
    }
    for e in self.nodes.values() {
      if let Some(p) = &e.parent_id {
        if !self.nodes.contains_key(p) {
          return Err(invalid(format!("'{}' apunta a un padre desconocido '{}'", e.id, p)));
        }
      }
    }
    for e in self.nodes.values() {
      let mut steps = 0;
      let mut cursor = e.parent_id.as_deref();
      while let Some(p) = cursor {
        steps += 1;
        if steps > self.nodes.len() {
          return Err(invalid(format!("ciclo que pasa por '{}'", e.id)));
        }
        let ancestor = &self.nodes[p];
        if e.is_active && ancestor.is_active {
          return Err(invalid(format!("'{}' está activa bajo el ancestro activo '{}'", e.id, ancestor.id)));
        }
        cursor = ancestor.parent_id.as_deref();
      }
    }
    for e in self.nodes.values().filter(|e| e.is_concurrent) {
      let siblings = e.parent_id
                      .as_deref()
                      .map(|p| self.children(p))
                      .unwrap_or(&[])
                      .iter()
                      .filter(|s| s.as_str() != e.id && self.nodes.get(*s).is_some_and(|n| n.is_concurrent))
                      .count();
      if siblings == 0 {
        return Err(invalid(format!("'{}' es concurrente sin hermanos concurrentes", e.id)));
      }
    }
    Ok(())
  }

  /// Envía al gestor de entidades los nodos creados (en orden de creación)
  /// y los modificados.
  pub fn persist(&mut self, em: &mut EntityManager) -> Result<()> {
    for id in &self.created {
      em.insert(self.nodes[id].clone())?;
    }
    for (id, node) in &self.nodes {
      if self.modified.contains(id) {
        em.update(node.clone())?;
      }
    }
    self.created.clear();
    self.modified.clear();
    Ok(())
  }

  pub fn created(&self) -> impl Iterator<Item = &String> {
    self.created.iter()
  }

  pub fn is_modified(&self, id: &str) -> bool {
    self.modified.contains(id)
  }
}
