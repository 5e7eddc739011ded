use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod memory;
pub mod selector;

pub use memory::MemoryStore;
pub use selector::Selector;

/// A stored document: one top-level entry per field, keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Key under which every store carries its native document identity.
pub const ID_KEY: &str = "_id";

/// Name of the store's primary identity index. Index reconciliation never drops it.
pub const PRIMARY_INDEX: &str = "_id_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Cursor controls for `find`: sort keys applied in order, then skip/limit,
/// then an optional projection of top-level keys (`_id` is always kept).
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn limited(limit: usize) -> Self {
        FindOptions {
            limit: Some(limit),
            ..FindOptions::default()
        }
    }

    pub fn projected(keys: &[&str]) -> Self {
        FindOptions {
            projection: Some(keys.iter().map(|k| k.to_string()).collect()),
            ..FindOptions::default()
        }
    }
}

/// A secondary index as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub field: String,
    pub unique: bool,
}

/// Backend contract for a schemaless document store. Collections accept any
/// document shape; every structural guarantee lives in the modeling layer
/// above. Implementations assign an `_id` to inserted documents that lack one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ensure the named collection exists. Idempotent.
    async fn create_collection(&self, collection: &str) -> Result<()>;

    /// Documents matching `selector`, shaped by `options`. A collection that
    /// does not exist yet reads as empty.
    async fn find(
        &self,
        collection: &str,
        selector: &Selector,
        options: &FindOptions,
    ) -> Result<Vec<Document>>;

    /// Insert documents, minting an identity for any without one.
    /// Returns the identities in input order.
    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<String>>;

    /// Merge `patch` into the first matching document. Returns the number
    /// of documents updated (0 or 1). The `_id` key is never patched.
    async fn update_one(
        &self,
        collection: &str,
        selector: &Selector,
        patch: &Document,
    ) -> Result<u64>;

    /// Merge `patch` into every matching document. Returns the count updated.
    async fn update_many(
        &self,
        collection: &str,
        selector: &Selector,
        patch: &Document,
    ) -> Result<u64>;

    /// Remove the first matching document. Returns the count removed (0 or 1).
    async fn delete_one(&self, collection: &str, selector: &Selector) -> Result<u64>;

    /// Remove every matching document. Returns the count removed.
    async fn delete_many(&self, collection: &str, selector: &Selector) -> Result<u64>;

    /// Number of documents matching `selector`.
    async fn count(&self, collection: &str, selector: &Selector) -> Result<u64>;

    /// All indices on the collection, the primary identity index included.
    async fn index_information(&self, collection: &str) -> Result<Vec<IndexInfo>>;

    /// Create a single-field index named `{field}_1`. Idempotent per field.
    async fn create_index(&self, collection: &str, field: &str, unique: bool) -> Result<()>;

    /// Drop the named index. Dropping the primary index is an error.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<()>;
}

/// Conventional name for a single-field index.
pub fn index_name(field: &str) -> String {
    format!("{field}_1")
}
