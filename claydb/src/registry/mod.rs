use crate::error::{ClayError, Result};
use crate::integrity::DependencyTracker;
use crate::model::Model;
use crate::schema::{parse_manifest, Schema};
use crate::store::DocumentStore;
use std::sync::Arc;

/// Owner of every registered collection template, the store handle and the
/// dependency tracker. Models are borrowed from here per collection; there
/// is no global lookup.
pub struct ModelRegistry {
    store: Arc<dyn DocumentStore>,
    tracker: DependencyTracker,
    templates: Vec<(String, Schema)>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let tracker = DependencyTracker::new(store.clone());
        ModelRegistry {
            store,
            tracker,
            templates: Vec::new(),
        }
    }

    /// Register a collection under its template schema. Names starting with
    /// an underscore are reserved for the layer's own collections.
    pub fn register(&mut self, collection: &str, template: Schema) -> Result<()> {
        if collection.is_empty() || collection.starts_with('_') {
            return Err(ClayError::Schema(format!(
                "collection name '{collection}' is reserved"
            )));
        }
        if self.templates.iter().any(|(name, _)| name == collection) {
            return Err(ClayError::Schema(format!(
                "collection '{collection}' is already registered"
            )));
        }
        self.templates.push((collection.to_string(), template));
        Ok(())
    }

    /// Register every collection in a YAML manifest.
    pub fn load_manifest(&mut self, content: &str) -> Result<()> {
        for (name, schema) in parse_manifest(content)? {
            self.register(&name, schema)?;
        }
        Ok(())
    }

    /// Borrow the model for a registered collection.
    pub fn model(&self, collection: &str) -> Result<Model<'_>> {
        let template = self.template(collection).ok_or_else(|| {
            ClayError::Schema(format!("collection '{collection}' is not registered"))
        })?;
        Ok(Model::new(self, collection, template))
    }

    /// Registered collection names, in registration order.
    pub fn collections(&self) -> Vec<&str> {
        self.templates.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Create every collection and reconcile indices, the edge collection
    /// included. Run once after registration, before serving reads/writes.
    pub async fn initialize_all(&self) -> Result<()> {
        self.tracker.initialize().await?;
        for (name, _) in &self.templates {
            self.model(name)?.initialize().await?;
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub(crate) fn template(&self, collection: &str) -> Option<&Schema> {
        self.templates
            .iter()
            .find(|(name, _)| name == collection)
            .map(|(_, schema)| schema)
    }
}
