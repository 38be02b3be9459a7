// Archivo: backend.rs
// Propósito: elegir el backend de persistencia según `EngineConfig`.
use crate::statement_session::StatementSessionFactory;
use bpm_flow::{EngineConfig, MapGrid, PersistenceVariant, ProcessEngineConfiguration, Result};
use log::info;
use std::sync::Arc;

/// Configuración del motor con el backend que pide `config.persistence`.
/// Para `map` se crea una rejilla nueva en memoria.
pub fn configuration_for(config: EngineConfig) -> Result<ProcessEngineConfiguration> {
  match config.persistence {
    PersistenceVariant::DistributedMap => {
      info!("persistencia en mapas distribuidos (rejilla en memoria)");
      ProcessEngineConfiguration::with_map_backend(config, Arc::new(MapGrid::new()))
    }
    PersistenceVariant::Statement => {
      let factory = StatementSessionFactory::from_config(&config)?;
      info!("persistencia relacional (pool de {} conexiones)", config.pool_size);
      Ok(ProcessEngineConfiguration::new(config, Arc::new(factory)))
    }
  }
}

/// Igual que `configuration_for` leyendo la configuración del entorno.
pub fn configuration_from_env() -> Result<ProcessEngineConfiguration> {
  configuration_for(EngineConfig::from_env()?)
}
