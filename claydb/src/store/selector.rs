use crate::store::{Document, ID_KEY};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// A plain keyed selector document, matched structurally against stored
/// documents. Top-level keys combine by conjunction; `$or` takes a list of
/// alternative selectors; a field position may carry `{"$in": [..]}` or
/// `{"$all": [..]}`. Equality against an array field matches when any
/// element equals the probe value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selector(Map<String, Value>);

impl Selector {
    /// Matches every document.
    pub fn all() -> Self {
        Selector(Map::new())
    }

    /// Matches the document with the given identity.
    pub fn id(id: &str) -> Self {
        Selector::field_eq(ID_KEY, Value::String(id.to_string()))
    }

    pub fn field_eq(field: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), value);
        Selector(map)
    }

    /// Disjunction over alternative selectors.
    pub fn or(branches: Vec<Selector>) -> Self {
        let alternatives = branches.into_iter().map(|b| Value::Object(b.0)).collect();
        let mut map = Map::new();
        map.insert("$or".to_string(), Value::Array(alternatives));
        Selector(map)
    }

    /// Field equals any of the given values.
    pub fn field_in(field: &str, values: Vec<Value>) -> Self {
        let mut clause = Map::new();
        clause.insert("$in".to_string(), Value::Array(values));
        Selector::field_eq(field, Value::Object(clause))
    }

    /// Array field contains every one of the given values.
    pub fn field_all(field: &str, values: Vec<Value>) -> Self {
        let mut clause = Map::new();
        clause.insert("$all".to_string(), Value::Array(values));
        Selector::field_eq(field, Value::Object(clause))
    }

    /// Add another field equality to this selector.
    pub fn and_field_eq(mut self, field: &str, value: Value) -> Self {
        self.0.insert(field.to_string(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        matches_map(&self.0, doc)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

fn matches_map(selector: &Map<String, Value>, doc: &Document) -> bool {
    selector.iter().all(|(key, probe)| {
        if key == "$or" {
            return match probe {
                Value::Array(branches) => branches.iter().any(|branch| {
                    branch
                        .as_object()
                        .map_or(false, |inner| matches_map(inner, doc))
                }),
                _ => false,
            };
        }
        field_matches(doc.get(key), probe)
    })
}

fn field_matches(actual: Option<&Value>, probe: &Value) -> bool {
    if let Some(clause) = probe.as_object() {
        if let Some(Value::Array(choices)) = clause.get("$in") {
            return choices.iter().any(|choice| value_matches(actual, choice));
        }
        if let Some(Value::Array(needed)) = clause.get("$all") {
            return match actual {
                Some(Value::Array(items)) => needed.iter().all(|n| items.contains(n)),
                _ => false,
            };
        }
    }
    value_matches(actual, probe)
}

fn value_matches(actual: Option<&Value>, probe: &Value) -> bool {
    match actual {
        None => probe.is_null(),
        Some(Value::Array(items)) if !probe.is_array() => items.contains(probe),
        Some(value) => value == probe,
    }
}

/// Total order over JSON values used for sorting: null < booleans < numbers
/// < strings < arrays < objects, with arrays and objects tying inside their
/// rank so a stable sort preserves insertion order.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
