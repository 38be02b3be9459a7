// Archivo: errors.rs
// Propósito: taxonomía de errores del núcleo y alias Result<T>. El cierre del
// contexto de comando usa `close_severity` para decidir el nivel de log.
use bpm_domain::DomainError;
use thiserror::Error;

/// Errores del núcleo de ejecución.
///
/// - `Configuration`: tipo sin ubicación, sentencia desconocida, wiring
///   incompleto. Fatal, nunca se reintenta.
/// - `OptimisticLocking`: una escritura perdió una carrera de revisión.
///   Recuperable reintentando la unidad de trabajo completa.
/// - `BadUserRequest` / `TaskAlreadyClaimed`: petición inválida del
///   usuario; se registra con severidad reducida.
/// - `Storage`, `Codec`, `Other`: fallos no previstos.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
  #[error("Error de configuración: {0}")]
  Configuration(String),
  #[error("Bloqueo optimista: {0}")]
  OptimisticLocking(String),
  #[error("Petición inválida: {0}")]
  BadUserRequest(String),
  #[error("La tarea '{task_id}' ya fue reclamada por '{assignee}'")]
  TaskAlreadyClaimed { task_id: String, assignee: String },
  #[error("No encontrado: {0}")]
  NotFound(String),
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  #[error("Error de codificación: {0}")]
  Codec(String),
  #[error("Otro: {0}")]
  Other(String),
}

/// Severidad con la que el cierre del contexto registra un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
  Info,
  Fine,
  Severe,
}

impl EngineError {
  pub fn close_severity(&self) -> LogSeverity {
    match self {
      EngineError::TaskAlreadyClaimed { .. } => LogSeverity::Info,
      EngineError::OptimisticLocking(_) | EngineError::BadUserRequest(_) => LogSeverity::Fine,
      _ => LogSeverity::Severe,
    }
  }

  pub fn is_optimistic_locking(&self) -> bool {
    matches!(self, EngineError::OptimisticLocking(_))
  }
}

impl From<DomainError> for EngineError {
  fn from(e: DomainError) -> Self {
    match e {
      DomainError::SerializationError(m) => EngineError::Codec(m),
      DomainError::UnknownActivity(m) => EngineError::NotFound(format!("actividad {}", m)),
      DomainError::ValidationError(m) => EngineError::BadUserRequest(m),
    }
  }
}

impl From<serde_json::Error> for EngineError {
  fn from(e: serde_json::Error) -> Self {
    EngineError::Codec(e.to_string())
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, EngineError>;
