use crate::error::{ClayError, Result};
use crate::expand::Expander;
use crate::field::{reference_id, FieldKind};
use crate::integrity::{DependencyEdge, ResolvedEdge};
use crate::registry::ModelRegistry;
use crate::schema::{RenderOptions, Schema};
use crate::store::{Document, FindOptions, Selector, ID_KEY, PRIMARY_INDEX};
use futures::future::BoxFuture;
use serde_json::Value;

/// One document bound to a schema: the schema holds the values, `id` is the
/// store identity once the instance has been persisted.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    id: Option<String>,
    schema: Schema,
}

impl ModelInstance {
    pub(crate) fn new(template: &Schema) -> Self {
        ModelInstance {
            id: None,
            schema: template.clone(),
        }
    }

    pub(crate) fn from_document(template: &Schema, doc: &Document) -> Self {
        let mut instance = ModelInstance::new(template);
        instance.id = doc.get(ID_KEY).and_then(Value::as_str).map(str::to_string);
        instance.schema.hydrate(doc);
        instance
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// Copy values in, skipping read-only fields and unknown keys.
    pub fn apply(&mut self, data: &Document) {
        self.schema.apply(data, false);
    }

    /// Current value of a field, if the schema has it.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.schema.field(field).map(|f| f.value())
    }

    pub fn to_client_json(&self, options: &RenderOptions) -> Value {
        self.schema.to_client_json(self.id(), options)
    }
}

/// Receipt for a persisted instance: the instance with its minted identity,
/// and the dependency edges the write recorded.
#[derive(Debug)]
pub struct StoredInstance {
    pub instance: ModelInstance,
    pub edges: Vec<DependencyEdge>,
}

/// Per-document result of an update pass. A failed document carries its
/// error here instead of aborting the batch.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub instance: ModelInstance,
    pub error: Option<ClayError>,
    pub edges: Vec<DependencyEdge>,
}

impl UpdateOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Receipt for a deletion: how many documents went away, and every edge
/// resolution (nullified or cascaded) the walk performed, nested cascades
/// included.
#[derive(Debug)]
pub struct DeleteReport {
    pub removed: u64,
    pub resolved: Vec<ResolvedEdge>,
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Enforce required-presence during update validation. On by default;
    /// turn off for partial patches that intentionally leave required
    /// fields untouched.
    pub check_required: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            check_required: true,
        }
    }
}

/// Handle for one registered collection, borrowed from the registry.
/// Every operation round-trips the backing store; writes keep the
/// dependency edge set in step with the document's reference values.
pub struct Model<'a> {
    registry: &'a ModelRegistry,
    collection: String,
    template: &'a Schema,
}

impl std::fmt::Debug for Model<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl<'a> Model<'a> {
    pub(crate) fn new(registry: &'a ModelRegistry, collection: &str, template: &'a Schema) -> Self {
        Model {
            registry,
            collection: collection.to_string(),
            template,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// A blank instance of this collection's template.
    pub fn instance(&self) -> ModelInstance {
        ModelInstance::new(self.template)
    }

    /// Create the collection if needed and reconcile its indices: build
    /// what the schema asks for, drop the leftovers. The primary identity
    /// index is never touched.
    pub async fn initialize(&self) -> Result<()> {
        let store = self.registry.store();
        store.create_collection(&self.collection).await?;
        let existing = store.index_information(&self.collection).await?;

        let mut wanted: Vec<(String, bool)> = Vec::new();
        for field in self.template.fields() {
            if let Some(unique) = field.index_request() {
                wanted.push((field.name().to_string(), unique));
            }
        }

        for (field, unique) in &wanted {
            let current = existing
                .iter()
                .find(|idx| idx.field == *field && idx.name != PRIMARY_INDEX);
            match current {
                Some(idx) if idx.unique == *unique => {}
                Some(idx) => {
                    log::debug!("rebuilding index '{}' on '{}'", idx.name, self.collection);
                    store.drop_index(&self.collection, &idx.name).await?;
                    store.create_index(&self.collection, field, *unique).await?;
                }
                None => {
                    store.create_index(&self.collection, field, *unique).await?;
                }
            }
        }

        for idx in &existing {
            if idx.name == PRIMARY_INDEX {
                continue;
            }
            if !wanted.iter().any(|(field, _)| *field == idx.field) {
                log::debug!("dropping stale index '{}' on '{}'", idx.name, self.collection);
                store.drop_index(&self.collection, &idx.name).await?;
            }
        }

        Ok(())
    }

    pub async fn count(&self, selector: &Selector) -> Result<u64> {
        self.registry.store().count(&self.collection, selector).await
    }

    /// Matching documents, hydrated into instances.
    pub async fn find_instances(
        &self,
        selector: &Selector,
        options: &FindOptions,
    ) -> Result<Vec<ModelInstance>> {
        let docs = self
            .registry
            .store()
            .find(&self.collection, selector, options)
            .await?;
        Ok(docs
            .iter()
            .map(|doc| ModelInstance::from_document(self.template, doc))
            .collect())
    }

    /// The first matching instance, if any.
    pub async fn find_one(&self, selector: &Selector) -> Result<Option<ModelInstance>> {
        Ok(self
            .find_instances(selector, &FindOptions::limited(1))
            .await?
            .into_iter()
            .next())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ModelInstance>> {
        self.find_one(&Selector::id(id)).await
    }

    /// Screen every unique field against documents already in the
    /// collection, excluding the instance itself once it has an identity.
    /// Check-then-insert is not atomic: two concurrent writers can both
    /// pass and both insert. A store-level unique index (`unique_index`)
    /// is the backstop for collections where that matters.
    pub async fn check_uniqueness(&self, instance: &ModelInstance) -> Result<()> {
        let mut probes: Vec<(String, Value)> = Vec::new();
        for field in instance.schema().fields() {
            if field.is_unique() && !field.value().is_null() {
                probes.push((field.name().to_string(), field.db_value()?));
            }
        }
        if probes.is_empty() {
            return Ok(());
        }

        let mut branches: Vec<Selector> = probes
            .iter()
            .map(|(name, value)| Selector::field_eq(name, value.clone()))
            .collect();
        let selector = if branches.len() == 1 {
            branches.remove(0)
        } else {
            Selector::or(branches)
        };
        let projection: Vec<&str> = probes.iter().map(|(name, _)| name.as_str()).collect();
        let hits = self
            .registry
            .store()
            .find(
                &self.collection,
                &selector,
                &FindOptions::projected(&projection),
            )
            .await?;

        let mut offending: Vec<String> = Vec::new();
        for hit in &hits {
            if let Some(own) = instance.id() {
                if hit.get(ID_KEY).and_then(Value::as_str) == Some(own) {
                    continue;
                }
            }
            for (name, value) in &probes {
                if hit.get(name) == Some(value) && !offending.iter().any(|n| n == name) {
                    offending.push(name.clone());
                }
            }
        }

        if offending.is_empty() {
            Ok(())
        } else {
            Err(ClayError::Uniqueness { fields: offending })
        }
    }

    /// Build, screen, validate and persist one instance from plain data.
    /// Read-only fields are settable here; nothing is written unless every
    /// check passes.
    pub async fn create_instance(&self, data: Document) -> Result<StoredInstance> {
        let mut instance = self.instance();
        instance.schema.apply(&data, true);
        self.check_uniqueness(&instance).await?;
        instance.schema.validate(true)?;
        self.verify_references(&instance).await?;
        self.persist_new(instance).await
    }

    /// Persist already-built instances, screening each like
    /// `create_instance`. Fails fast: a failure mid-batch leaves earlier
    /// inserts in place.
    pub async fn insert(&self, instances: Vec<ModelInstance>) -> Result<Vec<StoredInstance>> {
        let mut stored = Vec::with_capacity(instances.len());
        for instance in instances {
            self.check_uniqueness(&instance).await?;
            instance.schema.validate(true)?;
            self.verify_references(&instance).await?;
            stored.push(self.persist_new(instance).await?);
        }
        Ok(stored)
    }

    /// Apply `data` to every matching document. Each document is screened
    /// and written independently; failures land in that document's outcome
    /// and the rest of the batch continues. Only changed keys are written.
    pub async fn update(
        &self,
        selector: &Selector,
        data: Document,
        options: &UpdateOptions,
    ) -> Result<Vec<UpdateOutcome>> {
        let docs = self
            .registry
            .store()
            .find(&self.collection, selector, &FindOptions::default())
            .await?;

        let mut outcomes = Vec::with_capacity(docs.len());
        for stored in docs {
            let mut instance = ModelInstance::from_document(self.template, &stored);
            instance.schema.apply(&data, false);
            match self.apply_update(&instance, &stored, options).await {
                Ok(edges) => outcomes.push(UpdateOutcome {
                    instance,
                    error: None,
                    edges,
                }),
                Err(error) => outcomes.push(UpdateOutcome {
                    instance,
                    error: Some(error),
                    edges: Vec::new(),
                }),
            }
        }
        Ok(outcomes)
    }

    async fn apply_update(
        &self,
        instance: &ModelInstance,
        stored: &Document,
        options: &UpdateOptions,
    ) -> Result<Vec<DependencyEdge>> {
        self.check_uniqueness(instance).await?;
        instance.schema.validate(options.check_required)?;
        self.verify_references(instance).await?;

        let id = instance
            .id()
            .ok_or_else(|| ClayError::Store("stored document has no identity".to_string()))?;
        let fresh = instance.schema.to_db_document()?;
        let mut patch = Document::new();
        for (key, value) in &fresh {
            if stored.get(key) != Some(value) {
                patch.insert(key.clone(), value.clone());
            }
        }
        if patch.is_empty() {
            return Ok(Vec::new());
        }

        self.registry
            .store()
            .update_one(&self.collection, &Selector::id(id), &patch)
            .await?;
        let edges = outgoing_edges(&instance.schema, &self.collection, id);
        self.registry
            .tracker()
            .record(&self.collection, id, &edges)
            .await?;
        log::debug!(
            "updated {}/{} ({} keys)",
            self.collection,
            id,
            patch.len()
        );
        Ok(edges)
    }

    /// Delete every matching document and resolve the edges that pointed at
    /// each one. Matching nothing is an error.
    pub async fn delete_instances(&self, selector: &Selector) -> Result<DeleteReport> {
        let report = self.delete_where(selector.clone()).await?;
        if report.removed == 0 {
            return Err(ClayError::NotFound {
                collection: self.collection.clone(),
                selector: selector.to_string(),
            });
        }
        Ok(report)
    }

    /// Deletion walk shared with cascade resolution, which tolerates an
    /// empty match. Per document: remove the row, drop its outgoing edges,
    /// then resolve whatever pointed at it.
    pub(crate) fn delete_where(&self, selector: Selector) -> BoxFuture<'_, Result<DeleteReport>> {
        Box::pin(async move {
            let store = self.registry.store();
            let tracker = self.registry.tracker();
            let docs = store
                .find(&self.collection, &selector, &FindOptions::projected(&[]))
                .await?;

            let mut removed = 0u64;
            let mut resolved = Vec::new();
            for doc in docs {
                let Some(id) = doc.get(ID_KEY).and_then(Value::as_str).map(str::to_string)
                else {
                    log::warn!("skipping document without identity in '{}'", self.collection);
                    continue;
                };
                removed += store.delete_one(&self.collection, &Selector::id(&id)).await?;
                tracker.discard(&self.collection, &id).await?;
                let mut nested = tracker
                    .resolve_deletion(self.registry, &self.collection, &id)
                    .await?;
                resolved.append(&mut nested);
                log::debug!("deleted {}/{}", self.collection, id);
            }

            Ok(DeleteReport { removed, resolved })
        })
    }

    /// Client-facing JSON for an instance, expanding references when the
    /// options ask for it.
    pub async fn render(&self, instance: &ModelInstance, options: &RenderOptions) -> Result<Value> {
        if options.expand_foreign_keys {
            Expander::new(self.registry).expand(instance, options).await
        } else {
            Ok(instance.to_client_json(options))
        }
    }

    /// Every non-nullable reference must name a document that exists right
    /// now. Nullable references may dangle; they resolve to null or drop
    /// out at read time.
    async fn verify_references(&self, instance: &ModelInstance) -> Result<()> {
        for field in instance.schema().fields() {
            let (target, can_be_null) = match field.kind() {
                FieldKind::Reference {
                    target,
                    can_be_null,
                } => (target, *can_be_null),
                _ => continue,
            };
            if can_be_null {
                continue;
            }
            let Some(id) = reference_id(field.value()) else {
                continue;
            };
            let found = self
                .registry
                .store()
                .count(target, &Selector::id(&id))
                .await?;
            if found == 0 {
                return Err(ClayError::Reference {
                    field: field.name().to_string(),
                    collection: target.clone(),
                    id,
                });
            }
        }
        Ok(())
    }

    async fn persist_new(&self, mut instance: ModelInstance) -> Result<StoredInstance> {
        let doc = instance.schema.to_db_document()?;
        instance.schema.hydrate(&doc);
        let ids = self
            .registry
            .store()
            .insert(&self.collection, vec![doc])
            .await?;
        let Some(id) = ids.into_iter().next() else {
            return Err(ClayError::Store(
                "insert returned no identity".to_string(),
            ));
        };

        let edges = outgoing_edges(&instance.schema, &self.collection, &id);
        self.registry
            .tracker()
            .record(&self.collection, &id, &edges)
            .await?;
        log::debug!("created {}/{}", self.collection, id);

        instance.id = Some(id);
        Ok(StoredInstance { instance, edges })
    }
}

fn outgoing_edges(schema: &Schema, collection: &str, id: &str) -> Vec<DependencyEdge> {
    schema
        .fields()
        .iter()
        .flat_map(|field| field.dependency_edges(collection, id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{EdgeAction, ReferenceCardinality, EDGE_COLLECTION};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    const MANIFEST: &str = r#"
collections:
  users:
    fields:
      username: { type: text, required: true, unique: true, indexed: true }
      password_hash: { type: text, required: true, sensitive: true }
  categories:
    fields:
      name: { type: text, required: true, unique: true }
  media:
    fields:
      path: { type: text, required: true }
  posts:
    fields:
      title: { type: text, required: true, min_chars: 1 }
      slug: { type: text, required: true, unique: true, unique_index: true }
      author: { type: reference, target: users, required: true }
      category: { type: reference, target: categories, nullable: true }
      media: { type: id_array, target: media }
      tags: { type: text_array }
      views: { type: number, read_only: true }
      published_at: { type: date }
  comments:
    fields:
      body: { type: text, required: true }
      post: { type: reference, target: posts, required: true }
      parent: { type: reference, target: comments, nullable: true }
"#;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    async fn setup_registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        registry.load_manifest(MANIFEST).unwrap();
        registry.initialize_all().await.unwrap();
        registry
    }

    async fn create_user(registry: &ModelRegistry, username: &str) -> String {
        let users = registry.model("users").unwrap();
        let stored = users
            .create_instance(doc(json!({
                "username": username,
                "password_hash": "bcrypt$x",
            })))
            .await
            .unwrap();
        stored.instance.id().unwrap().to_string()
    }

    async fn create_post(
        registry: &ModelRegistry,
        title: &str,
        slug: &str,
        author: &str,
    ) -> String {
        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": title,
                "slug": slug,
                "author": author,
            })))
            .await
            .unwrap();
        stored.instance.id().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_and_find_round_trip() {
        let registry = setup_registry().await;
        let id = create_user(&registry, "ada").await;
        assert_eq!(id.len(), 26);

        let users = registry.model("users").unwrap();
        let found = users
            .find_one(&Selector::field_eq("username", json!("ada")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), Some(id.as_str()));
        assert_eq!(found.value("username"), Some(&json!("ada")));
        assert_eq!(found.value("password_hash"), Some(&json!("bcrypt$x")));
    }

    #[tokio::test]
    async fn test_create_records_dependency_edges() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": "Hello",
                "slug": "hello",
                "author": author,
            })))
            .await
            .unwrap();

        assert_eq!(stored.edges.len(), 1);
        assert_eq!(stored.edges[0].target_collection, "users");
        assert_eq!(stored.edges[0].target_id, author);
        assert_eq!(stored.edges[0].dependent_field, "author");
        assert_eq!(stored.edges[0].cardinality, ReferenceCardinality::Required);

        let persisted = registry
            .store()
            .count(EDGE_COLLECTION, &Selector::all())
            .await
            .unwrap();
        assert_eq!(persisted, 1);
    }

    #[tokio::test]
    async fn test_duplicate_unique_value_rejected_naming_the_field() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        create_post(&registry, "First", "my-post", &author).await;

        let posts = registry.model("posts").unwrap();
        let err = posts
            .create_instance(doc(json!({
                "title": "Second",
                "slug": "my-post",
                "author": author,
            })))
            .await
            .unwrap_err();
        match err {
            ClayError::Uniqueness { fields } => assert_eq!(fields, vec!["slug".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(posts.count(&Selector::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_into_conflict_reported_per_document() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let a = create_post(&registry, "A", "a", &author).await;
        let b = create_post(&registry, "B", "b", &author).await;

        let posts = registry.model("posts").unwrap();
        let outcomes = posts
            .update(
                &Selector::or(vec![Selector::id(&a), Selector::id(&b)]),
                doc(json!({"slug": "fresh"})),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();

        // documents are processed in store order: the first takes the slug,
        // the second then collides with it
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        match outcomes[1].error.as_ref().unwrap() {
            ClayError::Uniqueness { fields } => assert_eq!(fields, &vec!["slug".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }

        let reloaded = posts.get(&b).await.unwrap().unwrap();
        assert_eq!(reloaded.value("slug"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_update_keeping_own_unique_value_is_not_a_conflict() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let a = create_post(&registry, "A", "a", &author).await;

        let posts = registry.model("posts").unwrap();
        let outcomes = posts
            .update(
                &Selector::id(&a),
                doc(json!({"title": "A, revised"})),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert_eq!(
            posts.get(&a).await.unwrap().unwrap().value("title"),
            Some(&json!("A, revised"))
        );
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let posts = registry.model("posts").unwrap();

        let err = posts
            .create_instance(doc(json!({
                "title": "",
                "slug": "empty-title",
                "author": author,
            })))
            .await
            .unwrap_err();
        match err {
            ClayError::Validation { field, .. } => assert_eq!(field, "title"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(posts.count(&Selector::all()).await.unwrap(), 0);
        assert_eq!(
            registry
                .store()
                .count(EDGE_COLLECTION, &Selector::all())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_missing_required_reference_target_rejected() {
        let registry = setup_registry().await;
        let posts = registry.model("posts").unwrap();
        let err = posts
            .create_instance(doc(json!({
                "title": "Orphan",
                "slug": "orphan",
                "author": "01hf5s8y0000000000000000no",
            })))
            .await
            .unwrap_err();
        match err {
            ClayError::Reference {
                field, collection, ..
            } => {
                assert_eq!(field, "author");
                assert_eq!(collection, "users");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(posts.count(&Selector::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nullable_reference_may_dangle() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": "Categorized later",
                "slug": "later",
                "author": author,
                "category": "missing-category",
            })))
            .await
            .unwrap();
        assert_eq!(
            stored.instance.value("category"),
            Some(&json!("missing-category"))
        );
    }

    #[tokio::test]
    async fn test_read_only_field_set_at_create_frozen_at_update() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": "Counted",
                "slug": "counted",
                "author": author,
                "views": 5,
            })))
            .await
            .unwrap();
        let id = stored.instance.id().unwrap().to_string();

        let outcomes = posts
            .update(
                &Selector::id(&id),
                doc(json!({"views": 99, "title": "Counted, renamed"})),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());

        let reloaded = posts.get(&id).await.unwrap().unwrap();
        assert_eq!(reloaded.value("views"), Some(&json!(5)));
        assert_eq!(reloaded.value("title"), Some(&json!("Counted, renamed")));
    }

    #[tokio::test]
    async fn test_date_values_normalize_on_write() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": "Dated",
                "slug": "dated",
                "author": author,
                "published_at": 0,
            })))
            .await
            .unwrap();
        assert_eq!(
            stored.instance.value("published_at"),
            Some(&json!("1970-01-01T00:00:00+00:00"))
        );

        let id = stored.instance.id().unwrap();
        let reloaded = posts.get(id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.value("published_at"),
            Some(&json!("1970-01-01T00:00:00+00:00"))
        );
    }

    #[tokio::test]
    async fn test_update_matching_nothing_returns_no_outcomes() {
        let registry = setup_registry().await;
        let posts = registry.model("posts").unwrap();
        let outcomes = posts
            .update(
                &Selector::field_eq("slug", json!("nope")),
                doc(json!({"title": "X"})),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_delete_matching_nothing_is_not_found() {
        let registry = setup_registry().await;
        let posts = registry.model("posts").unwrap();
        let err = posts
            .delete_instances(&Selector::field_eq("slug", json!("nope")))
            .await
            .unwrap_err();
        match err {
            ClayError::NotFound { collection, .. } => assert_eq!(collection, "posts"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_required_edges_cascade_transitively() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let post = create_post(&registry, "Hello", "hello", &author).await;
        let comments = registry.model("comments").unwrap();
        let comment = comments
            .create_instance(doc(json!({"body": "Nice", "post": post})))
            .await
            .unwrap();
        let comment_id = comment.instance.id().unwrap().to_string();

        let users = registry.model("users").unwrap();
        let report = users.delete_instances(&Selector::id(&author)).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.resolved.len(), 2);
        assert!(report
            .resolved
            .iter()
            .all(|r| r.action == EdgeAction::Cascaded));
        let cascaded: Vec<&str> = report
            .resolved
            .iter()
            .map(|r| r.edge.dependent_id.as_str())
            .collect();
        assert!(cascaded.contains(&post.as_str()));
        assert!(cascaded.contains(&comment_id.as_str()));

        assert_eq!(users.count(&Selector::all()).await.unwrap(), 0);
        assert_eq!(
            registry
                .model("posts")
                .unwrap()
                .count(&Selector::all())
                .await
                .unwrap(),
            0
        );
        assert_eq!(comments.count(&Selector::all()).await.unwrap(), 0);
        // no dangling bookkeeping either
        assert_eq!(
            registry
                .store()
                .count(EDGE_COLLECTION, &Selector::all())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_optional_edge_nullified_on_target_delete() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let post = create_post(&registry, "Hello", "hello", &author).await;
        let comments = registry.model("comments").unwrap();

        let parent = comments
            .create_instance(doc(json!({"body": "First", "post": post})))
            .await
            .unwrap();
        let parent_id = parent.instance.id().unwrap().to_string();
        let reply = comments
            .create_instance(doc(json!({
                "body": "Reply",
                "post": post,
                "parent": parent_id,
            })))
            .await
            .unwrap();
        let reply_id = reply.instance.id().unwrap().to_string();

        let report = comments
            .delete_instances(&Selector::id(&parent_id))
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].action, EdgeAction::Nullified);
        assert_eq!(report.resolved[0].edge.dependent_id, reply_id);
        assert_eq!(report.resolved[0].edge.dependent_field, "parent");

        let reloaded = comments.get(&reply_id).await.unwrap().unwrap();
        assert_eq!(reloaded.value("parent"), Some(&Value::Null));
        assert_eq!(reloaded.value("body"), Some(&json!("Reply")));
    }

    #[tokio::test]
    async fn test_id_array_entry_removed_on_target_delete() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        let media = registry.model("media").unwrap();
        let m1 = media
            .create_instance(doc(json!({"path": "a.png"})))
            .await
            .unwrap();
        let m1 = m1.instance.id().unwrap().to_string();
        let m2 = media
            .create_instance(doc(json!({"path": "b.png"})))
            .await
            .unwrap();
        let m2 = m2.instance.id().unwrap().to_string();

        let posts = registry.model("posts").unwrap();
        let stored = posts
            .create_instance(doc(json!({
                "title": "Gallery",
                "slug": "gallery",
                "author": author,
                "media": [m1, m2],
            })))
            .await
            .unwrap();
        let post_id = stored.instance.id().unwrap().to_string();
        assert_eq!(stored.edges.len(), 3);

        let report = media.delete_instances(&Selector::id(&m1)).await.unwrap();
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].action, EdgeAction::Nullified);

        let reloaded = posts.get(&post_id).await.unwrap().unwrap();
        assert_eq!(reloaded.value("media"), Some(&json!([m2])));
    }

    #[tokio::test]
    async fn test_update_rewrites_edge_set() {
        let registry = setup_registry().await;
        let ada = create_user(&registry, "ada").await;
        let grace = create_user(&registry, "grace").await;
        let post = create_post(&registry, "Hello", "hello", &ada).await;

        let posts = registry.model("posts").unwrap();
        let outcomes = posts
            .update(
                &Selector::id(&post),
                doc(json!({"author": grace})),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[0].edges.len(), 1);
        assert_eq!(outcomes[0].edges[0].target_id, grace);

        let edges = registry
            .tracker()
            .edges_for_target("users", &ada)
            .await
            .unwrap();
        assert!(edges.is_empty());
        let edges = registry
            .tracker()
            .edges_for_target("users", &grace)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn test_render_masks_sensitive_unless_verbose() {
        let registry = setup_registry().await;
        let id = create_user(&registry, "ada").await;
        let users = registry.model("users").unwrap();
        let instance = users.get(&id).await.unwrap().unwrap();

        let plain = users
            .render(&instance, &RenderOptions::default())
            .await
            .unwrap();
        assert!(plain.as_object().unwrap().get("password_hash").is_none());

        let verbose = users
            .render(
                &instance,
                &RenderOptions {
                    verbose: true,
                    ..RenderOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            verbose.as_object().unwrap().get("password_hash"),
            Some(&json!("bcrypt$x"))
        );
    }

    #[tokio::test]
    async fn test_find_instances_sorted_page() {
        let registry = setup_registry().await;
        let author = create_user(&registry, "ada").await;
        create_post(&registry, "Banana", "banana", &author).await;
        create_post(&registry, "Apple", "apple", &author).await;
        create_post(&registry, "Cherry", "cherry", &author).await;

        let posts = registry.model("posts").unwrap();
        let page = posts
            .find_instances(
                &Selector::all(),
                &FindOptions {
                    sort: vec![("title".to_string(), crate::store::SortOrder::Ascending)],
                    limit: Some(2),
                    ..FindOptions::default()
                },
            )
            .await
            .unwrap();
        let titles: Vec<&Value> = page.iter().filter_map(|i| i.value("title")).collect();
        assert_eq!(titles, vec![&json!("Apple"), &json!("Banana")]);
    }

    #[tokio::test]
    async fn test_check_uniqueness_sees_committed_rows_only() {
        let registry = setup_registry().await;
        create_user(&registry, "ada").await;
        let users = registry.model("users").unwrap();

        let mut probe = users.instance();
        probe.apply(&doc(json!({"username": "ada"})));
        let err = users.check_uniqueness(&probe).await.unwrap_err();
        match err {
            ClayError::Uniqueness { fields } => assert_eq!(fields, vec!["username".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }

        let mut fresh = users.instance();
        fresh.apply(&doc(json!({"username": "grace"})));
        users.check_uniqueness(&fresh).await.unwrap();
    }
}
