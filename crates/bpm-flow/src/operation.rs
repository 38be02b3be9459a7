// Archivo: operation.rs
// Propósito: operaciones atómicas sobre el árbol de ejecuciones.
use crate::context::CommandContext;
use crate::errors::Result;
use crate::tree::ExecutionTree;

/// Paso indivisible del motor sobre una ejecución del árbol.
pub trait AtomicOperation {
  fn canonical_name(&self) -> &'static str;

  fn execute(&self, ctx: &CommandContext, tree: &mut ExecutionTree, execution_id: &str) -> Result<()>;
}
