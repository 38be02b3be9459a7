// Archivo: statement_session.rs
// Propósito: backend relacional de sentencias sobre Diesel + SQLite.
//
// Cada sesión toma una conexión del pool y abre una transacción que dura lo
// mismo que la unidad de trabajo. Las filas se guardan como (id, kind, rev,
// data) con la entidad serializada a JSON en `data`; las sentencias con
// nombre se resuelven con el registro compartido y el SQL sale del
// catálogo externo.
use crate::catalog::{RenderedSql, StatementCatalog};
use crate::schema;
use bpm_domain::{Entity, EntityKind, PropertyEntity};
use bpm_flow::{next_revision, optimistic_locking, run_select, EngineConfig, EngineError, EntityMapping, Lookup,
               ParamValue, PersistenceProvider, PersistenceSession, PersistenceSessionFactory, QueryParameter, Result,
               Row, Session, StatementRegistry};
use diesel::connection::{AnsiTransactionManager, SimpleConnection, TransactionManager};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel::sql_types::{BigInt, Integer, Nullable, Text};
use diesel::sqlite::Sqlite;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, trace, warn};
use std::env;
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| EngineError::Storage(format!("db: {}", e)))
}

/// SQLite responde `database is locked` (SQLITE_BUSY, también
/// BUSY_SNAPSHOT en WAL) o `database table is locked` (caché compartida)
/// cuando otra unidad de trabajo ya escribió en la base.
fn is_write_conflict(e: &DieselError) -> bool {
  match e {
    DieselError::DatabaseError(_, info) => {
      let message = info.message();
      message.contains("database is locked") || message.contains("table is locked")
    }
    _ => false,
  }
}

/// Como `map_db_err`, pero un conflicto de escritura con otra unidad de
/// trabajo se informa como bloqueo optimista.
fn map_write_err<T>(action: &str, entity: Option<&Entity>, res: std::result::Result<T, DieselError>) -> Result<T> {
  match res {
    Err(e) if is_write_conflict(&e) => {
      let target = match entity {
        Some(entity) => format!("{} de {} '{}' con revisión {:?}", action, entity.kind(), entity.id(), entity.revision()),
        None => action.to_string(),
      };
      Err(EngineError::OptimisticLocking(format!("{} falló: otra unidad de trabajo escribió antes ({})", target, e)))
    }
    other => map_db_err(other),
  }
}

#[derive(Debug, QueryableByName)]
struct EntityRow {
  #[diesel(sql_type = Text)]
  id: String,
  #[diesel(sql_type = Text)]
  kind: String,
  #[diesel(sql_type = Nullable<Integer>)]
  rev: Option<i32>,
  #[diesel(sql_type = Text)]
  data: String,
}

impl EntityRow {
  fn into_entity(self) -> Result<Entity> {
    let kind = EntityKind::from_name(&self.kind).ok_or_else(|| {
                                                  EngineError::Storage(format!("fila '{}' con tipo desconocido '{}'",
                                                                               self.id, self.kind))
                                                })?;
    let value: serde_json::Value = serde_json::from_str(&self.data)?;
    let mut entity = Entity::from_json(kind, value)?;
    if let Some(rev) = self.rev {
      entity.set_revision(rev);
    }
    Ok(entity)
  }
}

#[derive(Debug, QueryableByName)]
struct Count {
  #[diesel(sql_type = BigInt)]
  n: i64,
}

fn bind_all<'f>(rendered: RenderedSql) -> BoxedSqlQuery<'f, Sqlite, SqlQuery> {
  let mut query = diesel::sql_query(rendered.sql).into_boxed::<Sqlite>();
  for value in rendered.binds {
    query = match value {
      ParamValue::Text(s) => query.bind::<Text, _>(s),
      ParamValue::Int(n) => query.bind::<BigInt, _>(n),
      ParamValue::Bool(b) => query.bind::<Integer, _>(i32::from(b)),
      ParamValue::Null => query,
    };
  }
  query
}

fn row_data(entity: &Entity, revision: Option<i32>) -> Result<String> {
  let mut copy = entity.clone();
  if let Some(r) = revision {
    copy.set_revision(r);
  }
  Ok(copy.to_json()?.to_string())
}

/// Ajustes por conexión: espera en lugar de fallar cuando otra conexión
/// tiene la base bloqueada y usa WAL para que los lectores no bloqueen la
/// confirmación de quien escribe. Las bases en memoria ignoran el WAL.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

/// Sesión de persistencia relacional de una unidad de trabajo.
pub struct StatementSession {
  conn: DbConn,
  in_transaction: bool,
  mapping: Arc<EntityMapping>,
  statements: Arc<StatementRegistry>,
  catalog: Arc<StatementCatalog>,
}

impl StatementSession {
  fn open(mut conn: DbConn,
          mapping: Arc<EntityMapping>,
          statements: Arc<StatementRegistry>,
          catalog: Arc<StatementCatalog>)
          -> Result<Self> {
    map_db_err(AnsiTransactionManager::begin_transaction(&mut *conn))?;
    Ok(Self { conn,
              in_transaction: true,
              mapping,
              statements,
              catalog })
  }

  fn table(&self, kind: EntityKind) -> Result<String> {
    Ok(self.mapping.location(kind)?.to_string())
  }

  fn fetch(&mut self, statement: &str, kind: EntityKind, lookup: &Lookup) -> Result<Vec<Entity>> {
    let rendered = self.catalog.render(statement, lookup)?;
    trace!("{} ({}): {}", statement, kind, rendered.sql);
    let rows: Vec<EntityRow> = map_db_err(bind_all(rendered).load(&mut *self.conn))?;
    rows.into_iter().map(EntityRow::into_entity).collect()
  }

  fn select(&mut self, statement: &str, handler_kind: &str, parameter: &QueryParameter) -> Result<Vec<Row>> {
    let statements = self.statements.clone();
    let handler = match handler_kind {
      "one" => statements.select_one(statement)?,
      _ => statements.select_list(statement)?,
    };
    run_select(handler, parameter, |kind, lookup| self.fetch(statement, kind, lookup))
  }

  fn stored_revision(&mut self, entity: &Entity) -> Result<Option<i32>> {
    Ok(self.select_by_id(entity.kind(), entity.id())?.and_then(|e| e.revision()))
  }

  fn finish(&mut self, commit: bool) -> Result<()> {
    if !self.in_transaction {
      return Ok(());
    }
    self.in_transaction = false;
    if commit {
      map_write_err("confirmación", None, AnsiTransactionManager::commit_transaction(&mut *self.conn))?;
      debug!("transacción relacional confirmada");
    } else {
      map_db_err(AnsiTransactionManager::rollback_transaction(&mut *self.conn))?;
      debug!("transacción relacional revertida");
    }
    Ok(())
  }
}

impl Session for StatementSession {
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }

  fn close(&mut self) -> Result<()> {
    if self.in_transaction {
      warn!("sesión relacional cerrada con la transacción abierta; se revierte");
      self.finish(false)?;
    }
    Ok(())
  }

  fn commit(&mut self) -> Result<()> {
    self.finish(true)
  }

  fn rollback(&mut self) -> Result<()> {
    self.finish(false)
  }
}

impl Drop for StatementSession {
  fn drop(&mut self) {
    if self.in_transaction {
      let _ = self.finish(false);
    }
  }
}

impl PersistenceSession for StatementSession {
  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
    let sql = format!("SELECT id, kind, rev, data FROM {} WHERE id = ? AND kind = ?", self.table(kind)?);
    let row = map_db_err(diesel::sql_query(sql).bind::<Text, _>(id)
                                               .bind::<Text, _>(kind.name())
                                               .get_result::<EntityRow>(&mut *self.conn)
                                               .optional())?;
    row.map(EntityRow::into_entity).transpose()
  }

  fn select_list(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Vec<Row>> {
    self.select(statement, "list", parameter)
  }

  fn select_one(&mut self, statement: &str, parameter: &QueryParameter) -> Result<Option<Row>> {
    Ok(self.select(statement, "one", parameter)?.into_iter().next())
  }

  fn insert(&mut self, entity: &Entity) -> Result<Option<i32>> {
    let revision = entity.kind().has_revision().then_some(1);
    let sql = format!("INSERT INTO {} (id, kind, rev, data) VALUES (?, ?, ?, ?)", self.table(entity.kind())?);
    map_db_err(diesel::sql_query(sql).bind::<Text, _>(entity.id())
                                     .bind::<Text, _>(entity.kind().name())
                                     .bind::<Nullable<Integer>, _>(revision)
                                     .bind::<Text, _>(row_data(entity, revision)?)
                                     .execute(&mut *self.conn))?;
    Ok(revision)
  }

  fn update(&mut self, entity: &Entity) -> Result<Option<i32>> {
    let kind = entity.kind();
    let table = self.table(kind)?;
    let written = if kind.has_revision() {
      let revision = next_revision(entity);
      let sql = format!("UPDATE {} SET rev = ?, data = ? WHERE id = ? AND kind = ? AND rev = ?", table);
      let n = map_write_err("update",
                            Some(entity),
                            diesel::sql_query(sql).bind::<Nullable<Integer>, _>(revision)
                                                  .bind::<Text, _>(row_data(entity, revision)?)
                                                  .bind::<Text, _>(entity.id())
                                                  .bind::<Text, _>(kind.name())
                                                  .bind::<Nullable<Integer>, _>(entity.revision())
                                                  .execute(&mut *self.conn))?;
      (n, revision)
    } else {
      let sql = format!("UPDATE {} SET data = ? WHERE id = ? AND kind = ?", table);
      let n = map_write_err("update",
                            Some(entity),
                            diesel::sql_query(sql).bind::<Text, _>(row_data(entity, None)?)
                                                  .bind::<Text, _>(entity.id())
                                                  .bind::<Text, _>(kind.name())
                                                  .execute(&mut *self.conn))?;
      (n, None)
    };
    match written {
      (0, _) => {
        let found = self.stored_revision(entity)?;
        Err(optimistic_locking("update", entity, found))
      }
      (_, revision) => Ok(revision),
    }
  }

  fn delete(&mut self, entity: &Entity) -> Result<()> {
    let kind = entity.kind();
    let table = self.table(kind)?;
    if !kind.has_revision() {
      let sql = format!("DELETE FROM {} WHERE id = ? AND kind = ?", table);
      map_write_err("delete",
                    Some(entity),
                    diesel::sql_query(sql).bind::<Text, _>(entity.id())
                                          .bind::<Text, _>(kind.name())
                                          .execute(&mut *self.conn))?;
      return Ok(());
    }
    let sql = format!("DELETE FROM {} WHERE id = ? AND kind = ? AND rev = ?", table);
    let n = map_write_err("delete",
                          Some(entity),
                          diesel::sql_query(sql).bind::<Text, _>(entity.id())
                                                .bind::<Text, _>(kind.name())
                                                .bind::<Nullable<Integer>, _>(entity.revision())
                                                .execute(&mut *self.conn))?;
    if n == 0 {
      let found = self.stored_revision(entity)?;
      return Err(optimistic_locking("delete", entity, found));
    }
    Ok(())
  }

  fn delete_bulk(&mut self, statement: &str, parameter: &QueryParameter) -> Result<usize> {
    let statements = self.statements.clone();
    let handler = statements.delete(statement)?;
    let rendered = self.catalog.render(statement, &handler.lookup(parameter)?)?;
    let n = map_db_err(bind_all(rendered).execute(&mut *self.conn))?;
    debug!("{}: {} filas eliminadas", statement, n);
    Ok(n)
  }

  fn db_schema_create(&mut self) -> Result<()> {
    let applied = self.conn
                      .run_pending_migrations(MIGRATIONS)
                      .map_err(|e| EngineError::Storage(format!("migraciones: {}", e)))?;
    debug!("{} migraciones aplicadas", applied.len());
    Ok(())
  }

  fn db_schema_drop(&mut self) -> Result<()> {
    let reverted = self.conn
                       .revert_all_migrations(MIGRATIONS)
                       .map_err(|e| EngineError::Storage(format!("migraciones: {}", e)))?;
    debug!("{} migraciones revertidas", reverted.len());
    Ok(())
  }

  fn db_schema_check_version(&mut self) -> Result<Option<String>> {
    use schema::act_ge_property::dsl;
    if !self.is_engine_table_present()? {
      return Ok(None);
    }
    let data = map_db_err(dsl::act_ge_property.filter(dsl::id.eq("schema.version"))
                                              .select(dsl::data)
                                              .first::<String>(&mut *self.conn)
                                              .optional())?;
    match data {
      Some(text) => {
        let property: PropertyEntity = serde_json::from_str(&text)?;
        Ok(property.value)
      }
      None => Ok(None),
    }
  }

  fn is_engine_table_present(&mut self) -> Result<bool> {
    let table = self.table(EntityKind::Execution)?;
    let count = map_db_err(diesel::sql_query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
      .bind::<Text, _>(table)
      .get_result::<Count>(&mut *self.conn))?;
    Ok(count.n > 0)
  }

  fn backend_name(&self) -> &'static str {
    "statement"
  }
}

/// Fábrica de sesiones relacionales sobre un pool r2d2.
pub struct StatementSessionFactory {
  pool: Arc<DbPool>,
  mapping: Arc<EntityMapping>,
  statements: Arc<StatementRegistry>,
  catalog: Arc<StatementCatalog>,
}

impl StatementSessionFactory {
  /// Crea el pool y comprueba que el catálogo cubre todas las sentencias
  /// registradas.
  pub fn new(database_url: &str, pool_size: u32) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(pool_size)
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)
                              .map_err(|e| EngineError::Storage(format!("pool: {}", e)))?;
    let statements = StatementRegistry::engine_defaults();
    let catalog = StatementCatalog::engine_defaults()?;
    catalog.verify_against(&statements)?;
    debug!("backend relacional sobre '{}' ({} sentencias)", database_url, catalog.len());
    Ok(Self { pool: Arc::new(pool),
              mapping: Arc::new(EntityMapping::relational_defaults()?),
              statements: Arc::new(statements),
              catalog: Arc::new(catalog) })
  }

  pub fn from_config(config: &EngineConfig) -> Result<Self> {
    let url = config.database_url
                    .as_deref()
                    .ok_or_else(|| EngineError::Configuration("DATABASE_URL no está definido".into()))?;
    Self::new(url, config.pool_size)
  }

  /// Lee `DATABASE_URL` (con `.env` si existe) y usa el tamaño de pool por
  /// defecto.
  pub fn new_from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL").map_err(|_| EngineError::Configuration("DATABASE_URL no está definido".into()))?;
    Self::new(&url, EngineConfig::default().pool_size)
  }

  pub fn open_statement_session(&self) -> Result<StatementSession> {
    let conn = self.pool
                   .get()
                   .map_err(|e| EngineError::Storage(format!("pool: {}", e)))?;
    StatementSession::open(conn, self.mapping.clone(), self.statements.clone(), self.catalog.clone())
  }
}

impl PersistenceSessionFactory for StatementSessionFactory {
  fn open_persistence_session(&self) -> Result<PersistenceProvider> {
    Ok(Box::new(self.open_statement_session()?))
  }

  fn backend_name(&self) -> &'static str {
    "statement"
  }
}
