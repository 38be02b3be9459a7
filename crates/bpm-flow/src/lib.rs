//! Crate `bpm-flow`: núcleo de ejecución del motor de procesos.
//!
//! Reúne las tres piezas que trabajan juntas en cada unidad de trabajo:
//! - El contexto de comando (`CommandContext`): abre sesiones bajo demanda
//!   y al cerrarse hace flush, confirma o revierte y cierra cada sesión una
//!   sola vez.
//! - La persistencia de entidades: el contrato `PersistenceSession`, el
//!   registro de sentencias con nombre, el `EntityManager` y el backend de
//!   mapas distribuidos (`map_store`). El backend relacional vive en el
//!   crate `bpm-persistence`.
//! - El árbol de ejecuciones y la operación `createConcurrentExecution`.
//!
//! Ejemplo rápido:
//! ```rust
//! use bpm_flow::{EngineConfig, MapGrid, ProcessEngineConfiguration};
//! use std::sync::Arc;
//! let engine = ProcessEngineConfiguration::with_map_backend(EngineConfig::default(), Arc::new(MapGrid::new()))
//!   .unwrap()
//!   .build_process_engine()
//!   .unwrap();
//! assert_eq!(engine.persistence_backend(), "distributed-map");
//! ```
pub mod app_switch;
pub mod codec;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod engine;
pub mod entity_manager;
pub mod errors;
pub mod managers;
pub mod map_store;
pub mod mapping;
pub mod operation;
pub mod predicate;
pub mod query;
pub mod service;
pub mod session;
pub mod statements;
pub mod tree;

pub use app_switch::*;
pub use concurrency::{create_concurrent_execution, ConcurrencyDecision, CreateConcurrentExecution, GraftAction,
                      TreeShape};
pub use config::*;
pub use context::*;
pub use engine::*;
pub use entity_manager::*;
pub use errors::*;
pub use managers::*;
pub use map_store::{MapGrid, MapSession, MapSessionFactory};
pub use mapping::*;
pub use operation::*;
pub use query::*;
pub use service::*;
pub use session::*;
pub use statements::{latest_per_key, run_select, Criteria, Lookup, StatementCategory, StatementHandler, StatementRegistry};
pub use tree::*;
