pub mod error;
pub mod expand;
pub mod field;
pub mod integrity;
pub mod model;
pub mod registry;
pub mod sanitize;
pub mod schema;
pub mod store;

pub use error::{ClayError, Result};
pub use field::{Field, FieldKind};
pub use integrity::{DependencyEdge, EdgeAction, ReferenceCardinality, ResolvedEdge};
pub use model::{DeleteReport, Model, ModelInstance, StoredInstance, UpdateOptions, UpdateOutcome};
pub use registry::ModelRegistry;
pub use sanitize::HtmlPolicy;
pub use schema::{RenderOptions, Schema};
pub use store::{Document, DocumentStore, FindOptions, MemoryStore, Selector, SortOrder};
