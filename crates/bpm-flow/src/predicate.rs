// Archivo: predicate.rs
// Propósito: predicados textuales del backend de mapas.
//
// Los criterios se renderizan como `campo == 'texto' AND n == 3 AND
// flag == true AND padre == null` y el mapa los vuelve a interpretar. Los
// textos se entrecomillan pero no se escapan: un valor con `' AND ` cambia
// el significado del predicado. Los llamadores no deben construir
// criterios con entrada no confiable.
use crate::codec::PortableRecord;
use crate::errors::{EngineError, Result};
use crate::query::ParamValue;
use std::collections::BTreeMap;
use std::fmt;

const AND: &str = " AND ";

/// Conjunción de igualdades sobre campos de un registro portable.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPredicate {
  text: String,
  conditions: Vec<(String, ParamValue)>,
}

impl SqlPredicate {
  /// Interpreta un predicado textual. Acepta `==` y `=` como igualdad.
  pub fn parse(text: &str) -> Result<Self> {
    let invalid = || EngineError::BadUserRequest(format!("predicado inválido: {}", text));
    let mut conditions = Vec::new();
    for term in text.split(AND) {
      let (field, raw) = term.split_once("==").or_else(|| term.split_once('=')).ok_or_else(invalid)?;
      let field = field.trim();
      if field.is_empty() {
        return Err(invalid());
      }
      conditions.push((field.to_string(), parse_literal(raw.trim()).ok_or_else(invalid)?));
    }
    Ok(Self { text: text.to_string(),
              conditions })
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn conditions(&self) -> &[(String, ParamValue)] {
    &self.conditions
  }

  pub fn matches(&self, record: &PortableRecord) -> bool {
    self.conditions.iter().all(|(field, value)| record.matches(field, value))
  }
}

impl fmt::Display for SqlPredicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

fn parse_literal(raw: &str) -> Option<ParamValue> {
  if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
    return Some(ParamValue::Text(raw[1..raw.len() - 1].to_string()));
  }
  match raw {
    "null" => Some(ParamValue::Null),
    "true" => Some(ParamValue::Bool(true)),
    "false" => Some(ParamValue::Bool(false)),
    other => other.parse::<i64>().ok().map(ParamValue::Int),
  }
}

/// Igualdad simple `campo = valor`.
pub fn equal_predicate(field: &str, value: &ParamValue) -> Result<SqlPredicate> {
  SqlPredicate::parse(&format!("{} = {}", field, value))
}

/// Conjunción de igualdades. Un mapa vacío no filtra nada (`None`).
pub fn and_predicate(conditions: &BTreeMap<String, ParamValue>) -> Result<Option<SqlPredicate>> {
  if conditions.is_empty() {
    return Ok(None);
  }
  let text = conditions.iter()
                       .map(|(field, value)| format!("{} == {}", field, value))
                       .collect::<Vec<_>>()
                       .join(AND);
  SqlPredicate::parse(&text).map(Some)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_quoted_text_and_bare_scalars() {
    let mut c = BTreeMap::new();
    c.insert("parentId".to_string(), ParamValue::Null);
    c.insert("processInstanceId".to_string(), ParamValue::Text("pi-1".into()));
    c.insert("version".to_string(), ParamValue::Int(3));
    let p = and_predicate(&c).unwrap().unwrap();
    assert_eq!(p.text(), "parentId == null AND processInstanceId == 'pi-1' AND version == 3");
    assert_eq!(p.conditions().len(), 3);
  }

  #[test]
  fn unescaped_text_can_inject_extra_terms() {
    let mut c = BTreeMap::new();
    c.insert("name".to_string(), ParamValue::Text("x' AND isActive == 'true".into()));
    let p = and_predicate(&c).unwrap().unwrap();
    assert_eq!(p.conditions().len(), 2);
  }

  #[test]
  fn garbage_is_rejected() {
    assert!(SqlPredicate::parse("nothing here").is_err());
    assert!(SqlPredicate::parse("a == b").is_err());
    assert_eq!(equal_predicate("id", &ParamValue::Text("e1".into())).unwrap().text(), "id = 'e1'");
  }
}
