use crate::error::{ClayError, Result};
use crate::store::selector::{compare_values, Selector};
use crate::store::{
    index_name, Document, DocumentStore, FindOptions, IndexInfo, SortOrder, ID_KEY, PRIMARY_INDEX,
};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory store backend. Documents live in insertion order inside a
/// per-collection vector; identities are lowercase ULIDs. Index flags are
/// recorded, not enforced; uniqueness screening happens above the store.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

#[derive(Default)]
struct MemoryCollection {
    docs: Vec<Document>,
    indices: Vec<IndexInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn mint_id() -> String {
        ulid::Ulid::new().to_string().to_lowercase()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_collection(&self, collection: &str) -> Result<()> {
        let mut guard = self.collections.write().await;
        guard.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        selector: &Selector,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<Document> = coll
            .docs
            .iter()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect();

        if !options.sort.is_empty() {
            hits.sort_by(|a, b| {
                for (field, order) in &options.sort {
                    let left = a.get(field).unwrap_or(&Value::Null);
                    let right = b.get(field).unwrap_or(&Value::Null);
                    let mut ord = compare_values(left, right);
                    if *order == SortOrder::Descending {
                        ord = ord.reverse();
                    }
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = options.skip.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);
        let mut page: Vec<Document> = hits.into_iter().skip(skip).take(limit).collect();

        if let Some(keys) = &options.projection {
            page = page
                .into_iter()
                .map(|doc| {
                    let mut projected = Document::new();
                    if let Some(id) = doc.get(ID_KEY) {
                        projected.insert(ID_KEY.to_string(), id.clone());
                    }
                    for key in keys {
                        if key == ID_KEY {
                            continue;
                        }
                        if let Some(value) = doc.get(key) {
                            projected.insert(key.clone(), value.clone());
                        }
                    }
                    projected
                })
                .collect();
        }

        Ok(page)
    }

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<String>> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = match doc.get(ID_KEY) {
                Some(Value::String(given)) => given.clone(),
                Some(other) => {
                    return Err(ClayError::Store(format!(
                        "document identity must be a string, got {other}"
                    )));
                }
                None => Self::mint_id(),
            };

            if coll
                .docs
                .iter()
                .any(|existing| existing.get(ID_KEY).and_then(Value::as_str) == Some(id.as_str()))
            {
                return Err(ClayError::Store(format!(
                    "duplicate identity '{id}' in '{collection}'"
                )));
            }

            let mut stored = Document::new();
            stored.insert(ID_KEY.to_string(), Value::String(id.clone()));
            stored.extend(doc);
            coll.docs.push(stored);
            ids.push(id);
        }

        Ok(ids)
    }

    async fn update_one(
        &self,
        collection: &str,
        selector: &Selector,
        patch: &Document,
    ) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        for doc in coll.docs.iter_mut() {
            if selector.matches(doc) {
                apply_patch(doc, patch);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn update_many(
        &self,
        collection: &str,
        selector: &Selector,
        patch: &Document,
    ) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let mut updated = 0;
        for doc in coll.docs.iter_mut() {
            if selector.matches(doc) {
                apply_patch(doc, patch);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_one(&self, collection: &str, selector: &Selector) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        match coll.docs.iter().position(|doc| selector.matches(doc)) {
            Some(pos) => {
                coll.docs.remove(pos);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, selector: &Selector) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = coll.docs.len();
        coll.docs.retain(|doc| !selector.matches(doc));
        Ok((before - coll.docs.len()) as u64)
    }

    async fn count(&self, collection: &str, selector: &Selector) -> Result<u64> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(0);
        };
        Ok(coll.docs.iter().filter(|doc| selector.matches(doc)).count() as u64)
    }

    async fn index_information(&self, collection: &str) -> Result<Vec<IndexInfo>> {
        let guard = self.collections.read().await;
        let mut indices = vec![IndexInfo {
            name: PRIMARY_INDEX.to_string(),
            field: ID_KEY.to_string(),
            unique: true,
        }];
        if let Some(coll) = guard.get(collection) {
            indices.extend(coll.indices.iter().cloned());
        }
        Ok(indices)
    }

    async fn create_index(&self, collection: &str, field: &str, unique: bool) -> Result<()> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        let name = index_name(field);
        if let Some(existing) = coll.indices.iter().find(|idx| idx.name == name) {
            if existing.unique == unique {
                return Ok(());
            }
            return Err(ClayError::Store(format!(
                "index '{name}' on '{collection}' already exists with different options"
            )));
        }
        coll.indices.push(IndexInfo {
            name,
            field: field.to_string(),
            unique,
        });
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        if name == PRIMARY_INDEX {
            return Err(ClayError::Store(format!(
                "cannot drop the primary index on '{collection}'"
            )));
        }
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Err(ClayError::Store(format!("no collection '{collection}'")));
        };
        match coll.indices.iter().position(|idx| idx.name == name) {
            Some(pos) => {
                coll.indices.remove(pos);
                Ok(())
            }
            None => Err(ClayError::Store(format!(
                "no index '{name}' on '{collection}'"
            ))),
        }
    }
}

fn apply_patch(doc: &mut Document, patch: &Document) {
    for (key, value) in patch {
        if key == ID_KEY {
            continue;
        }
        doc.insert(key.clone(), value.clone());
    }
}
