use crate::error::{ClayError, Result};
use crate::field::Field;
use crate::sanitize::HtmlPolicy;
use crate::schema::Schema;
use serde_yaml::{Mapping, Value as Yaml};

/// Parse a YAML manifest into named schemas, preserving both collection
/// order and field declaration order.
///
/// ```yaml
/// collections:
///   users:
///     fields:
///       username: { type: text, required: true, unique: true }
///       password_hash: { type: text, required: true, sensitive: true }
/// ```
pub fn parse_manifest(content: &str) -> Result<Vec<(String, Schema)>> {
    let root: Yaml = serde_yaml::from_str(content)?;
    let root = as_mapping(&root, "manifest")?;
    let collections = root
        .get("collections")
        .ok_or_else(|| ClayError::Schema("manifest has no 'collections' key".to_string()))?;
    let collections = as_mapping(collections, "collections")?;

    let mut parsed = Vec::new();
    for (name, definition) in collections {
        let name = name
            .as_str()
            .ok_or_else(|| ClayError::Schema("collection names must be text".to_string()))?;
        let definition = as_mapping(definition, name)?;
        let fields = definition
            .get("fields")
            .ok_or_else(|| ClayError::Schema(format!("collection '{name}' has no fields")))?;
        let fields = as_mapping(fields, &format!("{name}.fields"))?;

        let mut parsed_fields = Vec::with_capacity(fields.len());
        for (field_name, spec) in fields {
            let field_name = field_name.as_str().ok_or_else(|| {
                ClayError::Schema(format!("field names in '{name}' must be text"))
            })?;
            let spec = as_mapping(spec, &format!("{name}.{field_name}"))?;
            parsed_fields.push(build_field(name, field_name, spec)?);
        }

        parsed.push((name.to_string(), Schema::new(parsed_fields)?));
    }

    Ok(parsed)
}

fn build_field(collection: &str, name: &str, spec: &Mapping) -> Result<Field> {
    let kind = str_entry(spec, "type")
        .ok_or_else(|| ClayError::Schema(format!("{collection}.{name} has no type")))?;

    let mut field = match kind {
        "text" => {
            let mut field = Field::text(name);
            if let Some(n) = usize_entry(spec, "min_chars")? {
                field = field.min_chars(n);
            }
            if let Some(n) = usize_entry(spec, "max_chars")? {
                field = field.max_chars(n);
            }
            field
        }
        "number" => {
            let mut field = Field::number(name);
            if let Some(bound) = f64_entry(spec, "min")? {
                field = field.min_value(bound);
            }
            if let Some(bound) = f64_entry(spec, "max")? {
                field = field.max_value(bound);
            }
            if let Some(places) = usize_entry(spec, "decimal_places")? {
                field = field.decimal_places(places as u32);
            }
            field
        }
        "boolean" => Field::boolean(name),
        "date" => Field::date(name),
        "json" => Field::json(name),
        "id" => Field::id(name),
        "id_array" => {
            let mut field = Field::id_array(name);
            if let Some(target) = str_entry(spec, "target") {
                field = field.target(target);
            }
            field
        }
        "reference" => {
            let target = str_entry(spec, "target").ok_or_else(|| {
                ClayError::Schema(format!("{collection}.{name} reference has no target"))
            })?;
            let mut field = Field::reference(name, target);
            if bool_entry(spec, "nullable")?.unwrap_or(false) {
                field = field.nullable();
            }
            field
        }
        "text_array" => Field::text_array(name),
        "number_array" => Field::number_array(name),
        "html" => {
            let mut field = Field::html(name);
            let tags = str_list_entry(spec, "allowed_tags")?;
            let attributes = str_list_entry(spec, "allowed_attributes")?;
            if tags.is_some() || attributes.is_some() {
                let tags = tags.unwrap_or_default();
                let attributes = attributes.unwrap_or_default();
                field = field.policy(HtmlPolicy::new(
                    &tags.iter().map(String::as_str).collect::<Vec<_>>(),
                    &attributes.iter().map(String::as_str).collect::<Vec<_>>(),
                ));
            }
            if bool_entry(spec, "error_bad_html")?.unwrap_or(false) {
                field = field.strict_html();
            }
            field
        }
        other => {
            return Err(ClayError::Schema(format!(
                "{collection}.{name} has unknown type '{other}'"
            )));
        }
    };

    if bool_entry(spec, "required")?.unwrap_or(false) {
        field = field.required();
    }
    if bool_entry(spec, "read_only")?.unwrap_or(false) {
        field = field.read_only();
    }
    if bool_entry(spec, "unique")?.unwrap_or(false) {
        field = field.unique();
    }
    if bool_entry(spec, "unique_index")?.unwrap_or(false) {
        field = field.unique_index();
    }
    if bool_entry(spec, "sensitive")?.unwrap_or(false) {
        field = field.sensitive();
    }
    if bool_entry(spec, "indexed")?.unwrap_or(false) {
        field = field.indexed();
    }

    Ok(field)
}

fn as_mapping<'a>(value: &'a Yaml, what: &str) -> Result<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| ClayError::Schema(format!("'{what}' must be a mapping")))
}

fn str_entry<'a>(spec: &'a Mapping, key: &str) -> Option<&'a str> {
    spec.get(key).and_then(Yaml::as_str)
}

fn bool_entry(spec: &Mapping, key: &str) -> Result<Option<bool>> {
    match spec.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ClayError::Schema(format!("'{key}' must be a boolean"))),
    }
}

fn f64_entry(spec: &Mapping, key: &str) -> Result<Option<f64>> {
    match spec.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| ClayError::Schema(format!("'{key}' must be a number"))),
    }
}

fn usize_entry(spec: &Mapping, key: &str) -> Result<Option<usize>> {
    match spec.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ClayError::Schema(format!("'{key}' must be a non-negative integer"))),
    }
}

fn str_list_entry(spec: &Mapping, key: &str) -> Result<Option<Vec<String>>> {
    match spec.get(key) {
        None => Ok(None),
        Some(value) => {
            let sequence = value
                .as_sequence()
                .ok_or_else(|| ClayError::Schema(format!("'{key}' must be a list")))?;
            let mut items = Vec::with_capacity(sequence.len());
            for item in sequence {
                let item = item
                    .as_str()
                    .ok_or_else(|| ClayError::Schema(format!("'{key}' entries must be text")))?;
                items.push(item.to_string());
            }
            Ok(Some(items))
        }
    }
}
