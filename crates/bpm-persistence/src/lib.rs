//! Crate `bpm-persistence`: backend relacional del motor de procesos.
//!
//! Implementa `PersistenceSession` sobre Diesel + SQLite: cada sesión usa
//! una conexión del pool r2d2 con una transacción abierta, las sentencias
//! con nombre se resuelven con el registro de `bpm-flow` y el SQL sale del
//! catálogo `statements/engine.json`. Las migraciones crean las tablas del
//! motor y la propiedad `schema.version`.
//!
//! `configuration_for` elige entre este backend y el de mapas a partir de
//! `EngineConfig`.
mod backend;
mod catalog;
pub mod schema;
mod statement_session;

pub use backend::{configuration_for, configuration_from_env};
pub use catalog::{RenderedSql, StatementCatalog};
pub use statement_session::{StatementSession, StatementSessionFactory, MIGRATIONS};
