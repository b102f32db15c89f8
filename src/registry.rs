use std::sync::Arc;

use crate::data_loader::{DataLoader, FieldDataLoader};
use crate::request_context::RequestContext;
use crate::runtime::Runtime;
use crate::source::{CachedContent, EntitySource, FieldSourceLoader, SourceLoader};

/// The loaders that batch and cache the upstream requests needed for a
/// single inbound operation.
///
/// Loader names base plurality on the relationship between the data
/// being queried: one id resolves one campaign, one slug resolves one
/// page.
pub struct LoaderRegistry {
    pub users: FieldDataLoader<String, FieldSourceLoader>,
    pub campaigns: DataLoader<String, SourceLoader>,
    pub posts: DataLoader<String, SourceLoader>,
    pub conversations: DataLoader<String, SourceLoader>,
    pub entries: DataLoader<String, CachedContent>,
    pub assets: DataLoader<String, CachedContent>,
    pub pages_by_slug: DataLoader<String, CachedContent>,
}

impl LoaderRegistry {
    pub fn new(runtime: &Runtime, ctx: &RequestContext) -> Self {
        tracing::debug!(preview = ctx.preview, "creating loaders for this request");
        let window = runtime.batch.window();
        let max_size = runtime.batch.max_size;
        let auth = &ctx.authorization;

        let batched = |source: Arc<dyn EntitySource>| {
            DataLoader::new(SourceLoader::new(source, auth.clone()), tokio::spawn)
                .delay(window)
                .max_batch_size(max_size)
        };
        let content = |source, prefix| {
            let loader = CachedContent::new(
                source,
                runtime.content_cache.clone(),
                prefix,
                ctx.preview,
            );
            DataLoader::new(loader, tokio::spawn)
                .delay(window)
                .max_batch_size(max_size)
        };

        Self {
            users: FieldDataLoader::new(
                FieldSourceLoader::new(runtime.users.clone(), auth.clone()),
                tokio::spawn,
            )
            .delay(window),
            campaigns: batched(runtime.campaigns.clone()),
            posts: batched(runtime.posts.clone()),
            conversations: batched(runtime.conversations.clone()),
            entries: content(runtime.entries.clone(), "entry"),
            assets: content(runtime.assets.clone(), "asset"),
            pages_by_slug: content(runtime.pages.clone(), "page"),
        }
    }
}
