use crate::error::{ClayError, Result};
use crate::field::Field;
use crate::store::{Document, ID_KEY};
use serde_json::Value;
use std::collections::HashSet;

pub mod parser;

pub use parser::parse_manifest;

/// Controls for client-facing serialization.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Include sensitive fields.
    pub verbose: bool,
    /// Replace references with their serialized target documents.
    pub expand_foreign_keys: bool,
    /// How many reference levels to expand.
    pub expand_max_depth: usize,
    /// Collections whose references stay as raw identifiers.
    pub expand_schema_blacklist: Vec<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            verbose: false,
            expand_foreign_keys: false,
            expand_max_depth: 1,
            expand_schema_blacklist: Vec::new(),
        }
    }
}

/// An ordered set of field descriptors. Order is declaration order and is
/// observable everywhere: validation stops at the first failing field,
/// serialized documents carry keys in this order.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema from fields. Duplicate names are rejected.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name() == ID_KEY {
                return Err(ClayError::Schema(format!(
                    "field name '{ID_KEY}' is reserved"
                )));
            }
            if !seen.insert(field.name().to_string()) {
                return Err(ClayError::Schema(format!(
                    "duplicate field '{}'",
                    field.name()
                )));
            }
        }
        Ok(Schema { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name() == name)
    }

    /// Copy values out of a plain document into matching fields. Unknown
    /// keys are ignored; read-only fields are skipped unless
    /// `allow_read_only` is set. The `_id` key is never a field value.
    pub fn apply(&mut self, data: &Document, allow_read_only: bool) {
        for (key, value) in data {
            if key == ID_KEY {
                continue;
            }
            if let Some(field) = self.field_mut(key) {
                if field.is_read_only() && !allow_read_only {
                    continue;
                }
                field.set_value(value.clone());
            }
        }
    }

    /// Validate every field in declaration order, reporting the first
    /// failure.
    pub fn validate(&self, check_required: bool) -> Result<()> {
        for field in &self.fields {
            field.validate(check_required)?;
        }
        Ok(())
    }

    /// The store-ready document: one key per field, in schema order, each
    /// carrying the field's normalized db value.
    pub fn to_db_document(&self) -> Result<Document> {
        let mut doc = Document::new();
        for field in &self.fields {
            doc.insert(field.name().to_string(), field.db_value()?);
        }
        Ok(doc)
    }

    /// Load stored values back into the fields, read-only ones included.
    /// Fields absent from the document reset to null.
    pub fn hydrate(&mut self, doc: &Document) {
        for field in &mut self.fields {
            let value = doc.get(field.name()).cloned().unwrap_or(Value::Null);
            field.set_value(value);
        }
    }

    /// The client-facing document. Sensitive fields are omitted entirely
    /// unless `options.verbose`; `_id` leads when an identity is known.
    pub fn to_client_json(&self, id: Option<&str>, options: &RenderOptions) -> Value {
        let mut doc = Document::new();
        if let Some(id) = id {
            doc.insert(ID_KEY.to_string(), Value::String(id.to_string()));
        }
        for field in &self.fields {
            if field.is_sensitive() && !options.verbose {
                continue;
            }
            doc.insert(field.name().to_string(), field.client_value(options.verbose));
        }
        Value::Object(doc)
    }

    /// Names of fields flagged unique, in schema order.
    pub fn unique_field_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_unique())
            .map(|f| f.name())
            .collect()
    }
}
