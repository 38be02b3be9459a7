// Archivo: catalog.rs
// Propósito: catálogo externo de sentencias SQL (`statements/engine.json`).
//
// Cada nombre de sentencia del registro tiene una plantilla SQL. La marca
// `{criteria}` se sustituye por las condiciones que el handler extrae del
// objeto de parámetros, siempre con parámetros enlazados.
use bpm_flow::{Criteria, EngineError, Lookup, ParamValue, Result, StatementCategory, StatementRegistry};
use std::collections::BTreeMap;

const ENGINE_STATEMENTS: &str = include_str!("../statements/engine.json");
const CRITERIA: &str = "{criteria}";

#[derive(Debug, Clone)]
pub struct StatementCatalog {
  templates: BTreeMap<String, String>,
}

/// SQL listo para ejecutar y los valores a enlazar, en orden.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
  pub sql: String,
  pub binds: Vec<ParamValue>,
}

impl StatementCatalog {
  pub fn from_json(text: &str) -> Result<Self> {
    let templates: BTreeMap<String, String> =
      serde_json::from_str(text).map_err(|e| EngineError::Configuration(format!("catálogo de sentencias: {}", e)))?;
    Ok(Self { templates })
  }

  /// Catálogo del motor embebido en el binario.
  pub fn engine_defaults() -> Result<Self> {
    Self::from_json(ENGINE_STATEMENTS)
  }

  pub fn template(&self, name: &str) -> Result<&str> {
    self.templates
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| EngineError::Configuration(format!("no hay SQL para la sentencia '{}'", name)))
  }

  pub fn len(&self) -> usize {
    self.templates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.templates.is_empty()
  }

  /// Comprueba que cada sentencia registrada tiene plantilla y que la
  /// plantilla es del tipo adecuado (SELECT o DELETE).
  pub fn verify_against(&self, registry: &StatementRegistry) -> Result<()> {
    for (name, category) in registry.names() {
      let template = self.template(name)?;
      let expected = match category {
        StatementCategory::Delete => "DELETE",
        StatementCategory::SelectOne | StatementCategory::SelectList => "SELECT",
      };
      if !template.trim_start().to_ascii_uppercase().starts_with(expected) {
        return Err(EngineError::Configuration(format!("la sentencia {} '{}' no empieza por {}",
                                                      category, name, expected)));
      }
      if !template.contains(CRITERIA) {
        return Err(EngineError::Configuration(format!("la sentencia '{}' no tiene {}", name, CRITERIA)));
      }
    }
    Ok(())
  }

  pub fn render(&self, name: &str, lookup: &Lookup) -> Result<RenderedSql> {
    let template = self.template(name)?;
    let (clause, binds) = match lookup {
      Lookup::ById(id) => (" AND id = ?".to_string(), vec![ParamValue::Text(id.clone())]),
      Lookup::Matching(criteria) => criteria_clause(criteria),
    };
    Ok(RenderedSql { sql: template.replace(CRITERIA, &clause),
                     binds })
  }
}

fn criteria_clause(criteria: &Criteria) -> (String, Vec<ParamValue>) {
  let mut clause = String::new();
  let mut binds = Vec::new();
  for (field, value) in criteria.conditions() {
    let column = if field == "id" {
      "id".to_string()
    } else {
      format!("json_extract(data, '$.{}')", field)
    };
    match value {
      ParamValue::Null => clause.push_str(&format!(" AND {} IS NULL", column)),
      v => {
        clause.push_str(&format!(" AND {} = ?", column));
        binds.push(v.clone());
      }
    }
  }
  (clause, binds)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn engine_catalog_covers_the_registry() {
    let catalog = StatementCatalog::engine_defaults().unwrap();
    catalog.verify_against(&StatementRegistry::engine_defaults()).unwrap();
    assert_eq!(catalog.len(), StatementRegistry::engine_defaults().names().len());
  }

  #[test]
  fn null_criteria_render_as_is_null() {
    let catalog = StatementCatalog::engine_defaults().unwrap();
    let criteria = Criteria::new().with("parentId", ParamValue::Null)
                                  .with("processDefinitionId", "order:1");
    let r = catalog.render("selectProcessInstanceByQueryCriteria", &Lookup::Matching(criteria))
                   .unwrap();
    assert!(r.sql.contains("json_extract(data, '$.parentId') IS NULL"));
    assert!(r.sql.contains("json_extract(data, '$.processDefinitionId') = ?"));
    assert_eq!(r.binds, vec![ParamValue::Text("order:1".into())]);
  }

  #[test]
  fn missing_template_is_a_configuration_error() {
    let catalog = StatementCatalog::from_json(r#"{"selectExecution": "SELECT id, kind, rev, data FROM t WHERE 1 = 1{criteria}"}"#).unwrap();
    let err = catalog.verify_against(&StatementRegistry::engine_defaults()).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
  }
}
