//! Crate `bpm-domain`: modelo de datos del núcleo de ejecución.
//!
//! Contiene las entidades persistentes del motor de procesos (ejecuciones,
//! definiciones, despliegues, tareas, variables, ...), la capacidad común
//! `DbEntity` (identificador + revisión opcional), la suma `Entity` que usan
//! los backends de persistencia y el grafo de definición de proceso que
//! consulta el motor del árbol de ejecuciones.
//!
//! Ejemplo rápido:
//! ```rust
//! use bpm_domain::{DbEntity, EntityKind, ExecutionEntity};
//! let pi = ExecutionEntity::new_process_instance("order:1", None);
//! assert_eq!(ExecutionEntity::KIND, EntityKind::Execution);
//! assert_eq!(pi.process_instance_id.as_deref(), Some(pi.id()));
//! ```
#[macro_use]
mod macros;

pub mod definition;
pub mod entity;
pub mod errors;
pub mod repository;
pub mod runtime;

pub use definition::*;
pub use entity::*;
pub use errors::*;
pub use repository::*;
pub use runtime::*;
