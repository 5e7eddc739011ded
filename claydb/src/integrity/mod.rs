use crate::error::{ClayError, Result};
use crate::registry::ModelRegistry;
use crate::store::{Document, DocumentStore, FindOptions, Selector};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Reserved collection holding one document per dependency edge.
pub const EDGE_COLLECTION: &str = "_dependencies";

/// How a dependent reacts when its target disappears: an optional reference
/// is nullified, a required one drags the dependent down with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceCardinality {
    Required,
    Optional,
}

/// A persisted edge from a referencing document to the document it names.
/// `target_*` is the side whose deletion triggers resolution; `dependent_*`
/// locates the field holding the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub target_collection: String,
    pub target_id: String,
    pub dependent_collection: String,
    pub dependent_id: String,
    pub dependent_field: String,
    pub cardinality: ReferenceCardinality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    Nullified,
    Cascaded,
}

/// One resolved edge from a deletion, for auditing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub edge: DependencyEdge,
    pub action: EdgeAction,
}

/// Bookkeeper for dependency edges. Writes go through `record`/`discard`
/// as documents change; `resolve_deletion` walks incoming edges when a
/// document is removed, nullifying or cascading per edge cardinality.
pub struct DependencyTracker {
    store: Arc<dyn DocumentStore>,
}

impl DependencyTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        DependencyTracker { store }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.store.create_collection(EDGE_COLLECTION).await
    }

    /// Replace the outgoing edge set of `collection`/`id` with `edges`.
    pub async fn record(&self, collection: &str, id: &str, edges: &[DependencyEdge]) -> Result<()> {
        self.store
            .delete_many(EDGE_COLLECTION, &dependent_selector(collection, id))
            .await?;
        if edges.is_empty() {
            return Ok(());
        }
        let mut docs = Vec::with_capacity(edges.len());
        for edge in edges {
            docs.push(edge_document(edge)?);
        }
        self.store.insert(EDGE_COLLECTION, docs).await?;
        Ok(())
    }

    /// Drop every outgoing edge of `collection`/`id`.
    pub async fn discard(&self, collection: &str, id: &str) -> Result<()> {
        self.store
            .delete_many(EDGE_COLLECTION, &dependent_selector(collection, id))
            .await?;
        Ok(())
    }

    /// Edges whose target is `collection`/`id`.
    pub async fn edges_for_target(&self, collection: &str, id: &str) -> Result<Vec<DependencyEdge>> {
        let docs = self
            .store
            .find(
                EDGE_COLLECTION,
                &target_selector(collection, id),
                &FindOptions::default(),
            )
            .await?;
        docs.iter().map(edge_from_document).collect()
    }

    /// Edges held by `collection`/`id`.
    pub async fn edges_for_dependent(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Vec<DependencyEdge>> {
        let docs = self
            .store
            .find(
                EDGE_COLLECTION,
                &dependent_selector(collection, id),
                &FindOptions::default(),
            )
            .await?;
        docs.iter().map(edge_from_document).collect()
    }

    /// Resolve every edge pointing at a deleted document. Optional edges
    /// nullify the referencing field; required edges delete the dependent
    /// through its own model, so resolution recurses. Dependents that are
    /// already gone are tolerated. Returns the actions taken, nested
    /// cascades included.
    pub fn resolve_deletion<'a>(
        &'a self,
        registry: &'a ModelRegistry,
        target_collection: &'a str,
        target_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ResolvedEdge>>> {
        Box::pin(async move {
            let edges = self.edges_for_target(target_collection, target_id).await?;
            let mut resolved = Vec::new();

            for edge in edges {
                match edge.cardinality {
                    ReferenceCardinality::Optional => {
                        if self.nullify_dependent(&edge).await? {
                            resolved.push(ResolvedEdge {
                                edge,
                                action: EdgeAction::Nullified,
                            });
                        }
                    }
                    ReferenceCardinality::Required => {
                        let model = match registry.model(&edge.dependent_collection) {
                            Ok(model) => model,
                            Err(_) => {
                                log::warn!(
                                    "no model registered for '{}'; cannot cascade {}/{}",
                                    edge.dependent_collection,
                                    edge.dependent_collection,
                                    edge.dependent_id
                                );
                                continue;
                            }
                        };
                        let report = model.delete_where(Selector::id(&edge.dependent_id)).await?;
                        resolved.extend(report.resolved);
                        if report.removed > 0 {
                            resolved.push(ResolvedEdge {
                                edge,
                                action: EdgeAction::Cascaded,
                            });
                        } else {
                            log::warn!(
                                "dependent {}/{} already gone while cascading",
                                edge.dependent_collection,
                                edge.dependent_id
                            );
                        }
                    }
                }
            }

            // Everything that pointed at the deleted document is stale now
            self.store
                .delete_many(
                    EDGE_COLLECTION,
                    &target_selector(target_collection, target_id),
                )
                .await?;

            Ok(resolved)
        })
    }

    /// Clear the reference out of the dependent's field: single references
    /// go to null, identifier arrays lose the target's entry. Returns false
    /// when the dependent no longer exists.
    async fn nullify_dependent(&self, edge: &DependencyEdge) -> Result<bool> {
        let hits = self
            .store
            .find(
                &edge.dependent_collection,
                &Selector::id(&edge.dependent_id),
                &FindOptions::limited(1),
            )
            .await?;
        let Some(doc) = hits.into_iter().next() else {
            log::warn!(
                "dependent {}/{} already gone while nullifying '{}'",
                edge.dependent_collection,
                edge.dependent_id,
                edge.dependent_field
            );
            return Ok(false);
        };

        let replacement = match doc.get(&edge.dependent_field) {
            Some(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .filter(|item| item.as_str() != Some(edge.target_id.as_str()))
                    .cloned()
                    .collect(),
            ),
            _ => Value::Null,
        };

        let mut patch = Document::new();
        patch.insert(edge.dependent_field.clone(), replacement);
        self.store
            .update_one(
                &edge.dependent_collection,
                &Selector::id(&edge.dependent_id),
                &patch,
            )
            .await?;
        Ok(true)
    }
}

fn dependent_selector(collection: &str, id: &str) -> Selector {
    Selector::field_eq("dependent_collection", Value::String(collection.to_string()))
        .and_field_eq("dependent_id", Value::String(id.to_string()))
}

fn target_selector(collection: &str, id: &str) -> Selector {
    Selector::field_eq("target_collection", Value::String(collection.to_string()))
        .and_field_eq("target_id", Value::String(id.to_string()))
}

fn edge_document(edge: &DependencyEdge) -> Result<Document> {
    match serde_json::to_value(edge)? {
        Value::Object(map) => Ok(map),
        _ => Err(ClayError::Store(
            "dependency edge must serialize as an object".to_string(),
        )),
    }
}

fn edge_from_document(doc: &Document) -> Result<DependencyEdge> {
    Ok(serde_json::from_value(Value::Object(doc.clone()))?)
}
