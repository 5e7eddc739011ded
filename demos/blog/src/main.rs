use claydb::{
    ClayError, Document, MemoryStore, ModelRegistry, RenderOptions, Selector, UpdateOptions,
};
use serde_json::json;
use std::sync::Arc;

/// Collections for a small blog: authors, categories, posts and threaded
/// comments.
const MANIFEST: &str = r#"
collections:
  users:
    fields:
      username: { type: text, required: true, unique: true, indexed: true, max_chars: 64 }
      password_hash: { type: text, required: true, sensitive: true }
      bio: { type: html }
  categories:
    fields:
      name: { type: text, required: true, unique: true }
  posts:
    fields:
      title: { type: text, required: true, min_chars: 1 }
      slug: { type: text, required: true, unique: true, unique_index: true }
      author: { type: reference, target: users, required: true }
      category: { type: reference, target: categories, nullable: true }
      tags: { type: text_array }
      body: { type: html }
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
        _ => panic!("demo documents are object literals"),
    }
}

#[tokio::main]
async fn main() -> claydb::Result<()> {
    env_logger::init();
    log::info!("Starting blog walkthrough on an in-memory store");

    let expand_depth: usize = std::env::var("BLOG_EXPAND_DEPTH")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(1);

    let mut registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
    registry.load_manifest(MANIFEST)?;
    registry.initialize_all().await?;
    log::info!("Registered collections: {:?}", registry.collections());

    let users = registry.model("users")?;
    let ada = users
        .create_instance(doc(json!({
            "username": "ada",
            "password_hash": "bcrypt$2y$tOqz",
            "bio": "<p>Analyst. <script>alert('gotcha')</script>Writes about engines.</p>",
        })))
        .await?;
    let ada_id = ada
        .instance
        .id()
        .expect("created user has no identity")
        .to_string();
    log::info!("Created users/{ada_id}");
    println!(
        "sanitized bio: {}",
        ada.instance.value("bio").cloned().unwrap_or_default()
    );

    let categories = registry.model("categories")?;
    let engines = categories
        .create_instance(doc(json!({"name": "Engines"})))
        .await?;
    let engines_id = engines
        .instance
        .id()
        .expect("created category has no identity")
        .to_string();

    let posts = registry.model("posts")?;
    let post = posts
        .create_instance(doc(json!({
            "title": "Notes on the Analytical Engine",
            "slug": "analytical-engine",
            "author": ada_id,
            "category": engines_id,
            "tags": ["history", "computing"],
            "body": "<p>The engine weaves <b>algebraic patterns</b>.</p>",
            "published_at": "2026-03-01T09:00:00Z",
        })))
        .await?;
    let post_id = post
        .instance
        .id()
        .expect("created post has no identity")
        .to_string();
    log::info!(
        "Created posts/{post_id} with {} dependency edge(s)",
        post.edges.len()
    );

    // a second post on the same slug is turned away before anything is written
    match posts
        .create_instance(doc(json!({
            "title": "Duplicate",
            "slug": "analytical-engine",
            "author": ada_id,
        })))
        .await
    {
        Err(ClayError::Uniqueness { fields }) => {
            log::info!("Duplicate slug rejected, offending fields: {fields:?}");
        }
        Err(other) => return Err(other),
        Ok(_) => log::warn!("Duplicate slug was accepted unexpectedly"),
    }

    let comments = registry.model("comments")?;
    let first = comments
        .create_instance(doc(json!({"body": "Lovely read.", "post": post_id})))
        .await?;
    let first_id = first
        .instance
        .id()
        .expect("created comment has no identity")
        .to_string();
    comments
        .create_instance(doc(json!({
            "body": "Agreed, the notes section especially.",
            "post": post_id,
            "parent": first_id,
        })))
        .await?;

    // the post pulls its author and category in, one nesting level deep
    let instance = posts
        .get(&post_id)
        .await?
        .expect("post vanished mid-walkthrough");
    let expanded = posts
        .render(
            &instance,
            &RenderOptions {
                expand_foreign_keys: true,
                expand_max_depth: expand_depth,
                ..RenderOptions::default()
            },
        )
        .await?;
    println!(
        "expanded post:\n{}",
        serde_json::to_string_pretty(&expanded)?
    );

    // retitle through the model; only the changed key is written
    let outcomes = posts
        .update(
            &Selector::id(&post_id),
            doc(json!({"title": "Notes on the Analytical Engine, annotated"})),
            &UpdateOptions::default(),
        )
        .await?;
    for outcome in &outcomes {
        match &outcome.error {
            None => log::info!("Update ok, {} edge(s) re-recorded", outcome.edges.len()),
            Some(err) => log::warn!("Update failed: {err}"),
        }
    }

    // deleting the category nullifies the post's optional reference
    let report = categories
        .delete_instances(&Selector::id(&engines_id))
        .await?;
    log::info!(
        "Category removed: {} document(s), {} edge(s) resolved",
        report.removed,
        report.resolved.len()
    );

    // deleting the author cascades through the post and its comments
    let report = users.delete_instances(&Selector::id(&ada_id)).await?;
    log::info!(
        "Author removed: {} document(s), {} edge resolution(s)",
        report.removed,
        report.resolved.len()
    );
    for resolved in &report.resolved {
        log::info!(
            "  {:?}: {}/{} via '{}'",
            resolved.action,
            resolved.edge.dependent_collection,
            resolved.edge.dependent_id,
            resolved.edge.dependent_field
        );
    }

    let leftover = comments.count(&Selector::all()).await?;
    log::info!("Comments remaining after the cascade: {leftover}");

    Ok(())
}
