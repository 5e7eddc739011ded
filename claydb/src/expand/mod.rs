use crate::error::Result;
use crate::field::{reference_id, FieldKind};
use crate::model::ModelInstance;
use crate::registry::ModelRegistry;
use crate::schema::RenderOptions;
use crate::store::{FindOptions, Selector};
use futures::future::BoxFuture;
use serde_json::Value;

/// Recursive reference expander. Replaces reference values with their
/// serialized target documents, fetching one store round-trip per reference
/// field per level. Recursion is bounded only by `expand_max_depth` and the
/// schema blacklist; there is no cycle detection, so a mutually-referencing
/// pair under a large depth is fetched again at every level until the depth
/// budget runs out.
pub struct Expander<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> Expander<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Expander { registry }
    }

    pub async fn expand(
        &self,
        instance: &ModelInstance,
        options: &RenderOptions,
    ) -> Result<Value> {
        self.expand_at(instance, options, 0).await
    }

    fn expand_at<'b>(
        &'b self,
        instance: &'b ModelInstance,
        options: &'b RenderOptions,
        depth: usize,
    ) -> BoxFuture<'b, Result<Value>> {
        Box::pin(async move {
            let mut rendered = instance.to_client_json(options);
            let Some(map) = rendered.as_object_mut() else {
                return Ok(rendered);
            };

            for field in instance.schema().fields() {
                if field.is_sensitive() && !options.verbose {
                    continue;
                }
                match field.kind() {
                    FieldKind::Reference { target, .. } => {
                        if self.blocked(target, options, depth) {
                            continue;
                        }
                        let Some(id) = reference_id(field.value()) else {
                            continue;
                        };
                        if let Some(nested) = self.fetch_expanded(target, &id, options, depth).await?
                        {
                            map.insert(field.name().to_string(), nested);
                        }
                    }
                    FieldKind::IdArray {
                        target: Some(target),
                    } => {
                        if self.blocked(target, options, depth) {
                            continue;
                        }
                        let Some(items) = field.value().as_array() else {
                            continue;
                        };
                        let mut expanded = Vec::with_capacity(items.len());
                        for item in items {
                            let Some(id) = reference_id(item) else {
                                expanded.push(item.clone());
                                continue;
                            };
                            match self.fetch_expanded(target, &id, options, depth).await? {
                                Some(nested) => expanded.push(nested),
                                None => expanded.push(item.clone()),
                            }
                        }
                        map.insert(field.name().to_string(), Value::Array(expanded));
                    }
                    _ => {}
                }
            }

            Ok(rendered)
        })
    }

    fn blocked(&self, target: &str, options: &RenderOptions, depth: usize) -> bool {
        depth >= options.expand_max_depth
            || options
                .expand_schema_blacklist
                .iter()
                .any(|name| name == target)
    }

    /// The expanded target document, or None when the reference has to stay
    /// a raw identifier: target collection unregistered, or target document
    /// gone.
    async fn fetch_expanded(
        &self,
        target: &str,
        id: &str,
        options: &RenderOptions,
        depth: usize,
    ) -> Result<Option<Value>> {
        let Some(template) = self.registry.template(target) else {
            log::warn!("no model registered for '{target}'; reference left unexpanded");
            return Ok(None);
        };
        let docs = self
            .registry
            .store()
            .find(target, &Selector::id(id), &FindOptions::limited(1))
            .await?;
        let Some(doc) = docs.into_iter().next() else {
            log::warn!("dangling reference: {target}/{id} is gone");
            return Ok(None);
        };
        let nested = ModelInstance::from_document(template, &doc);
        let rendered = self.expand_at(&nested, options, depth + 1).await?;
        Ok(Some(rendered))
    }
}
