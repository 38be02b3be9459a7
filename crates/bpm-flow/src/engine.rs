// Archivo: engine.rs
// Propósito: configuración del motor de procesos y ejecutor de comandos.
//
// `ProcessEngineConfiguration` reúne una sola vez todo lo que se comparte
// en sólo lectura (fábricas de sesión, generador de ids, registro de
// aplicaciones) y elige el backend de persistencia por fábrica. El
// `ProcessEngine` resultante abre un `CommandContext` por comando y lo
// cierra con el resultado del comando.
use crate::app_switch::ProcessApplicationRegistry;
use crate::config::{EngineConfig, SchemaUpdate};
use crate::context::{CommandContext, Session, SessionFactory, SessionFactoryRegistry};
use crate::entity_manager::{EntityManagerFactory, IdGenerator, UuidGenerator};
use crate::errors::{EngineError, Result};
use crate::map_store::{MapGrid, MapSessionFactory};
use crate::service::RuntimeService;
use crate::session::{PersistenceProviderFactory, PersistenceSessionFactory};
use bpm_domain::{ProcessDefinitionEntity, ProcessDefinitionGraph};
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

pub struct ProcessEngineConfiguration {
  config: EngineConfig,
  persistence: Arc<dyn PersistenceSessionFactory>,
  id_generator: Arc<dyn IdGenerator>,
  session_factories: Vec<Arc<dyn SessionFactory>>,
  applications: ProcessApplicationRegistry,
}

impl ProcessEngineConfiguration {
  pub fn new(config: EngineConfig, persistence: Arc<dyn PersistenceSessionFactory>) -> Self {
    Self { config,
           persistence,
           id_generator: Arc::new(UuidGenerator),
           session_factories: Vec::new(),
           applications: ProcessApplicationRegistry::new() }
  }

  /// Configuración con el backend de mapas sobre `grid`.
  pub fn with_map_backend(config: EngineConfig, grid: Arc<MapGrid>) -> Result<Self> {
    Ok(Self::new(config, Arc::new(MapSessionFactory::with_defaults(grid)?)))
  }

  pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
    self.id_generator = id_generator;
    self
  }

  /// Fábrica de sesión adicional. Sustituye a otra del mismo tipo.
  pub fn register_session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
    self.session_factories.push(factory);
    self
  }

  pub fn with_applications(mut self, applications: ProcessApplicationRegistry) -> Self {
    self.applications = applications;
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn build_process_engine(self) -> Result<ProcessEngine> {
    let mut registry = SessionFactoryRegistry::new();
    registry.register(Arc::new(PersistenceProviderFactory::new(self.persistence.clone())));
    registry.register(Arc::new(EntityManagerFactory::new(self.id_generator.clone())));
    for factory in self.session_factories {
      registry.register(factory);
    }

    apply_schema_strategy(self.persistence.as_ref(), self.config.schema_update)?;
    info!("motor '{}' listo (persistencia: {}, esquema: {:?})",
          self.config.engine_name,
          self.persistence.backend_name(),
          self.config.schema_update);

    Ok(ProcessEngine { config: self.config,
                       registry: Arc::new(registry),
                       persistence: self.persistence,
                       definitions: DashMap::new(),
                       applications: self.applications })
  }
}

fn apply_schema_strategy(factory: &dyn PersistenceSessionFactory, strategy: SchemaUpdate) -> Result<()> {
  let mut session = factory.open_persistence_session()?;
  let outcome = match strategy {
    SchemaUpdate::Update => {
      if session.is_engine_table_present()? {
        Ok(())
      } else {
        session.db_schema_create()
      }
    }
    SchemaUpdate::CreateDrop => {
      session.db_schema_drop()?;
      session.db_schema_create()
    }
    SchemaUpdate::Validate => {
      if session.is_engine_table_present()? {
        Ok(())
      } else {
        Err(EngineError::Configuration("no hay tablas del motor en la base de datos".into()))
      }
    }
  };
  match outcome {
    Ok(()) => Session::commit(&mut session)?,
    Err(e) => {
      Session::rollback(&mut session)?;
      Session::close(&mut session)?;
      return Err(e);
    }
  }
  if let Some(version) = session.db_schema_check_version()? {
    debug!("versión de esquema: {}", version);
  }
  Session::close(&mut session)
}

/// Motor de procesos construido. Se comparte entre hilos; cada comando
/// corre en su propio `CommandContext`.
pub struct ProcessEngine {
  config: EngineConfig,
  registry: Arc<SessionFactoryRegistry>,
  persistence: Arc<dyn PersistenceSessionFactory>,
  definitions: DashMap<String, Arc<ProcessDefinitionGraph>>,
  applications: ProcessApplicationRegistry,
}

impl ProcessEngine {
  pub fn name(&self) -> &str {
    &self.config.engine_name
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn persistence_backend(&self) -> &'static str {
    self.persistence.backend_name()
  }

  pub fn applications(&self) -> &ProcessApplicationRegistry {
    &self.applications
  }

  /// Ejecuta un comando en una unidad de trabajo nueva. El contexto se
  /// cierra con el resultado: confirma si el comando tuvo éxito y revierte
  /// si falló.
  pub fn execute<T, F>(&self, command: F) -> Result<T>
    where F: FnOnce(&CommandContext) -> Result<T>
  {
    let ctx = CommandContext::new(self.registry.clone());
    let (value, failure) = match command(&ctx) {
      Ok(v) => (Some(v), None),
      Err(e) => (None, Some(e)),
    };
    ctx.close(failure)?;
    value.ok_or_else(|| EngineError::Other("el comando terminó sin resultado".into()))
  }

  /// Publica una definición de proceso: guarda la fila (si no existe) y
  /// deja su grafo en la caché del motor.
  pub fn register_definition(&self, definition: ProcessDefinitionEntity, graph: ProcessDefinitionGraph) -> Result<()> {
    let id = definition.id.clone();
    self.execute(|ctx| {
          let em = ctx.entity_manager()?;
          let mut em = em.borrow_mut();
          if em.select_by_id::<ProcessDefinitionEntity>(&definition.id)?.is_none() {
            em.insert(definition)?;
          }
          Ok(())
        })?;
    self.definitions.insert(id, Arc::new(graph));
    Ok(())
  }

  pub fn definition_graph(&self, process_definition_id: &str) -> Result<Arc<ProcessDefinitionGraph>> {
    self.definitions
        .get(process_definition_id)
        .map(|g| g.value().clone())
        .ok_or_else(|| EngineError::NotFound(format!("grafo de la definición '{}'", process_definition_id)))
  }

  pub fn runtime_service(&self) -> RuntimeService<'_> {
    RuntimeService::new(self)
  }

  /// Cierra el motor. Con `create-drop` borra el esquema.
  pub fn close(self) -> Result<()> {
    if self.config.schema_update == SchemaUpdate::CreateDrop {
      let mut session = self.persistence.open_persistence_session()?;
      session.db_schema_drop()?;
      Session::commit(&mut session)?;
      Session::close(&mut session)?;
    }
    info!("motor '{}' cerrado", self.config.engine_name);
    Ok(())
  }
}
