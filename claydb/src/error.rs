use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClayError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error on '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Unique constraint violated on: {}", .fields.join(", "))]
    Uniqueness { fields: Vec<String> },

    #[error("Reference error on '{field}': no document '{id}' in '{collection}'")]
    Reference {
        field: String,
        collection: String,
        id: String,
    },

    #[error("No document matched in '{collection}': {selector}")]
    NotFound { collection: String, selector: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClayError {
    /// Field name carried by validation, uniqueness and reference errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            ClayError::Validation { field, .. } => Some(field),
            ClayError::Reference { field, .. } => Some(field),
            ClayError::Uniqueness { fields } => fields.first().map(String::as_str),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClayError>;
