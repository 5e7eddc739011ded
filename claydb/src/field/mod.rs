use crate::error::{ClayError, Result};
use crate::integrity::{DependencyEdge, ReferenceCardinality};
use crate::sanitize::HtmlPolicy;
use crate::store::ID_KEY;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// The typed behavior of a field. Every variant carries its own constraint
/// parameters; there is no untyped catch-all, so a value always passes
/// through the checks of exactly one kind.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Text {
        min_chars: Option<usize>,
        max_chars: Option<usize>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        decimal_places: Option<u32>,
    },
    Boolean,
    Date,
    /// Arbitrary JSON, stored as given.
    Json,
    /// A single opaque identifier.
    Id,
    /// Identifiers of documents in `target`, or loose identifiers when
    /// `target` is not set.
    IdArray { target: Option<String> },
    /// Foreign key into `target`. A non-nullable reference must always
    /// name a document.
    Reference { target: String, can_be_null: bool },
    TextArray,
    NumberArray,
    /// Rich text run through an allow-list rewriter. With `error_bad_html`
    /// set, input that the policy would alter is rejected instead of
    /// silently cleaned.
    Html {
        policy: HtmlPolicy,
        error_bad_html: bool,
    },
}

/// One named, flagged slot in a schema. Flags are set builder-style at
/// declaration; the value is whatever the last `set_value`/hydration put in.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    value: Value,
    required: bool,
    read_only: bool,
    unique: bool,
    unique_index: bool,
    sensitive: bool,
    indexed: bool,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Field {
            name: name.to_string(),
            kind,
            value: Value::Null,
            required: false,
            read_only: false,
            unique: false,
            unique_index: false,
            sensitive: false,
            indexed: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Field::new(
            name,
            FieldKind::Text {
                min_chars: None,
                max_chars: None,
            },
        )
    }

    pub fn number(name: &str) -> Self {
        Field::new(
            name,
            FieldKind::Number {
                min: None,
                max: None,
                decimal_places: None,
            },
        )
    }

    pub fn boolean(name: &str) -> Self {
        Field::new(name, FieldKind::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Field::new(name, FieldKind::Date)
    }

    pub fn json(name: &str) -> Self {
        Field::new(name, FieldKind::Json)
    }

    pub fn id(name: &str) -> Self {
        Field::new(name, FieldKind::Id)
    }

    pub fn id_array(name: &str) -> Self {
        Field::new(name, FieldKind::IdArray { target: None })
    }

    pub fn reference(name: &str, target: &str) -> Self {
        Field::new(
            name,
            FieldKind::Reference {
                target: target.to_string(),
                can_be_null: false,
            },
        )
    }

    pub fn text_array(name: &str) -> Self {
        Field::new(name, FieldKind::TextArray)
    }

    pub fn number_array(name: &str) -> Self {
        Field::new(name, FieldKind::NumberArray)
    }

    pub fn html(name: &str) -> Self {
        Field::new(
            name,
            FieldKind::Html {
                policy: HtmlPolicy::default(),
                error_bad_html: false,
            },
        )
    }

    // ── Flag builders ────────────────────────────────────────────────────

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Ask the model to maintain a unique store index on this field.
    pub fn unique_index(mut self) -> Self {
        self.unique_index = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    // ── Kind parameter builders ──────────────────────────────────────────

    pub fn min_chars(mut self, n: usize) -> Self {
        match &mut self.kind {
            FieldKind::Text { min_chars, .. } => *min_chars = Some(n),
            _ => debug_assert!(false, "min_chars only applies to text fields"),
        }
        self
    }

    pub fn max_chars(mut self, n: usize) -> Self {
        match &mut self.kind {
            FieldKind::Text { max_chars, .. } => *max_chars = Some(n),
            _ => debug_assert!(false, "max_chars only applies to text fields"),
        }
        self
    }

    pub fn min_value(mut self, bound: f64) -> Self {
        match &mut self.kind {
            FieldKind::Number { min, .. } => *min = Some(bound),
            _ => debug_assert!(false, "min_value only applies to number fields"),
        }
        self
    }

    pub fn max_value(mut self, bound: f64) -> Self {
        match &mut self.kind {
            FieldKind::Number { max, .. } => *max = Some(bound),
            _ => debug_assert!(false, "max_value only applies to number fields"),
        }
        self
    }

    pub fn decimal_places(mut self, places: u32) -> Self {
        match &mut self.kind {
            FieldKind::Number { decimal_places, .. } => *decimal_places = Some(places),
            _ => debug_assert!(false, "decimal_places only applies to number fields"),
        }
        self
    }

    /// Allow a reference to hold null instead of a target.
    pub fn nullable(mut self) -> Self {
        match &mut self.kind {
            FieldKind::Reference { can_be_null, .. } => *can_be_null = true,
            _ => debug_assert!(false, "nullable only applies to reference fields"),
        }
        self
    }

    /// Bind an identifier array to a target collection.
    pub fn target(mut self, collection: &str) -> Self {
        match &mut self.kind {
            FieldKind::IdArray { target } => *target = Some(collection.to_string()),
            _ => debug_assert!(false, "target only applies to identifier arrays"),
        }
        self
    }

    pub fn policy(mut self, html_policy: HtmlPolicy) -> Self {
        match &mut self.kind {
            FieldKind::Html { policy, .. } => *policy = html_policy,
            _ => debug_assert!(false, "policy only applies to html fields"),
        }
        self
    }

    /// Reject rich text the policy would alter instead of cleaning it.
    pub fn strict_html(mut self) -> Self {
        match &mut self.kind {
            FieldKind::Html { error_bad_html, .. } => *error_bad_html = true,
            _ => debug_assert!(false, "strict_html only applies to html fields"),
        }
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn has_unique_index(&self) -> bool {
        self.unique_index
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Index this field should have on the store, if any. `Some(true)` means
    /// a unique index.
    pub fn index_request(&self) -> Option<bool> {
        if self.unique_index {
            Some(true)
        } else if self.indexed {
            Some(false)
        } else {
            None
        }
    }

    // ── Value behavior ───────────────────────────────────────────────────

    /// Check the current value against this field's kind and flags.
    /// `check_required` off relaxes only the required-presence rule; kind
    /// checks always run on non-null values.
    pub fn validate(&self, check_required: bool) -> Result<()> {
        if self.value.is_null() {
            if self.required && check_required {
                return Err(self.invalid("is required"));
            }
            if let FieldKind::Reference { can_be_null, .. } = &self.kind {
                if !can_be_null {
                    return Err(self.invalid("must name a target document"));
                }
            }
            return Ok(());
        }

        match &self.kind {
            FieldKind::Text {
                min_chars,
                max_chars,
            } => {
                let text = self
                    .value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected text"))?;
                let length = text.chars().count();
                if let Some(min) = min_chars {
                    if length < *min {
                        return Err(self.invalid(&format!("shorter than {min} characters")));
                    }
                }
                if let Some(max) = max_chars {
                    if length > *max {
                        return Err(self.invalid(&format!("longer than {max} characters")));
                    }
                }
                Ok(())
            }
            FieldKind::Number { min, max, .. } => {
                let number = self
                    .value
                    .as_f64()
                    .ok_or_else(|| self.invalid("expected a number"))?;
                if let Some(min) = min {
                    if number < *min {
                        return Err(self.invalid(&format!("below the minimum of {min}")));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        return Err(self.invalid(&format!("above the maximum of {max}")));
                    }
                }
                Ok(())
            }
            FieldKind::Boolean => match self.value.as_bool() {
                Some(_) => Ok(()),
                None => Err(self.invalid("expected a boolean")),
            },
            FieldKind::Date => match parse_date(&self.value) {
                Some(_) => Ok(()),
                None => Err(self.invalid("expected an RFC 3339 date or epoch milliseconds")),
            },
            FieldKind::Json => Ok(()),
            FieldKind::Id => match &self.value {
                Value::String(s) if !s.is_empty() => Ok(()),
                _ => Err(self.invalid("expected an identifier")),
            },
            FieldKind::IdArray { .. } => match &self.value {
                Value::Array(items) if items.iter().all(|i| reference_id(i).is_some()) => Ok(()),
                _ => Err(self.invalid("expected an array of identifiers")),
            },
            FieldKind::Reference { .. } => match reference_id(&self.value) {
                Some(_) => Ok(()),
                None => Err(self.invalid("expected an identifier")),
            },
            FieldKind::TextArray => match &self.value {
                Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err(self.invalid("expected an array of text values")),
            },
            FieldKind::NumberArray => match &self.value {
                Value::Array(items) if items.iter().all(Value::is_number) => Ok(()),
                _ => Err(self.invalid("expected an array of numbers")),
            },
            FieldKind::Html {
                policy,
                error_bad_html,
            } => {
                let text = self
                    .value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected text"))?;
                if *error_bad_html && !policy.is_clean(text) {
                    return Err(self.invalid("contains disallowed HTML"));
                }
                Ok(())
            }
        }
    }

    /// The store-ready form of the current value. Dates normalize to
    /// RFC 3339, numbers round to their declared places, references reduce
    /// to the raw identifier, rich text is sanitized.
    pub fn db_value(&self) -> Result<Value> {
        if self.value.is_null() {
            return Ok(Value::Null);
        }

        match &self.kind {
            FieldKind::Text { .. }
            | FieldKind::Boolean
            | FieldKind::Json
            | FieldKind::Id
            | FieldKind::TextArray
            | FieldKind::NumberArray
            | FieldKind::Number {
                decimal_places: None,
                ..
            } => Ok(self.value.clone()),
            FieldKind::Number {
                decimal_places: Some(places),
                ..
            } => {
                let number = self
                    .value
                    .as_f64()
                    .ok_or_else(|| self.invalid("expected a number"))?;
                let factor = 10f64.powi(*places as i32);
                let rounded = (number * factor).round() / factor;
                let rounded = serde_json::Number::from_f64(rounded)
                    .ok_or_else(|| self.invalid("not representable as a stored number"))?;
                Ok(Value::Number(rounded))
            }
            FieldKind::Date => {
                let date = parse_date(&self.value)
                    .ok_or_else(|| self.invalid("expected an RFC 3339 date or epoch milliseconds"))?;
                Ok(Value::String(date.to_rfc3339()))
            }
            FieldKind::Reference { .. } => {
                let id = reference_id(&self.value)
                    .ok_or_else(|| self.invalid("expected an identifier"))?;
                Ok(Value::String(id))
            }
            FieldKind::IdArray { .. } => {
                let items = self
                    .value
                    .as_array()
                    .ok_or_else(|| self.invalid("expected an array of identifiers"))?;
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let id = reference_id(item)
                        .ok_or_else(|| self.invalid("expected an array of identifiers"))?;
                    ids.push(Value::String(id));
                }
                Ok(Value::Array(ids))
            }
            FieldKind::Html {
                policy,
                error_bad_html,
            } => {
                let text = self
                    .value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected text"))?;
                if *error_bad_html {
                    Ok(self.value.clone())
                } else {
                    Ok(Value::String(policy.sanitize(text)))
                }
            }
        }
    }

    /// The client-facing form of the current value. Sensitive fields read
    /// as null unless `verbose` is set.
    pub fn client_value(&self, verbose: bool) -> Value {
        if self.sensitive && !verbose {
            return Value::Null;
        }
        self.value.clone()
    }

    /// Dependency edges this field's value creates, with the owning document
    /// named by `collection`/`id` as the dependent side.
    pub fn dependency_edges(&self, collection: &str, id: &str) -> Vec<DependencyEdge> {
        match &self.kind {
            FieldKind::Reference {
                target,
                can_be_null,
            } => {
                let Some(target_id) = reference_id(&self.value) else {
                    return Vec::new();
                };
                let cardinality = if *can_be_null {
                    ReferenceCardinality::Optional
                } else {
                    ReferenceCardinality::Required
                };
                vec![DependencyEdge {
                    target_collection: target.clone(),
                    target_id,
                    dependent_collection: collection.to_string(),
                    dependent_id: id.to_string(),
                    dependent_field: self.name.clone(),
                    cardinality,
                }]
            }
            FieldKind::IdArray {
                target: Some(target),
            } => {
                let Some(items) = self.value.as_array() else {
                    return Vec::new();
                };
                let cardinality = if self.required {
                    ReferenceCardinality::Required
                } else {
                    ReferenceCardinality::Optional
                };
                items
                    .iter()
                    .filter_map(reference_id)
                    .map(|target_id| DependencyEdge {
                        target_collection: target.clone(),
                        target_id,
                        dependent_collection: collection.to_string(),
                        dependent_id: id.to_string(),
                        dependent_field: self.name.clone(),
                        cardinality,
                    })
                    .collect()
            }
            FieldKind::IdArray { target: None }
            | FieldKind::Text { .. }
            | FieldKind::Number { .. }
            | FieldKind::Boolean
            | FieldKind::Date
            | FieldKind::Json
            | FieldKind::Id
            | FieldKind::TextArray
            | FieldKind::NumberArray
            | FieldKind::Html { .. } => Vec::new(),
        }
    }

    fn invalid(&self, reason: &str) -> ClayError {
        ClayError::Validation {
            field: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Accept an RFC 3339 string or integer epoch milliseconds.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// The raw identifier a reference value names: a plain string, or the `_id`
/// of an expanded target document.
pub(crate) fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get(ID_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}
